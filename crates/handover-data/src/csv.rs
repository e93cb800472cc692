//! Append-only CSV tables.
//!
//! Rows are buffered in memory and appended on [`CsvTable::flush`]. The
//! header is written only when the file is created, so successive trial
//! blocks accumulate in the same table. Every table starts with the
//! [`ParticipantContext::COLUMNS`].

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use handover_types::ParticipantContext;
use tracing::debug;

/// Errors raised while persisting a table.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Creating, reading or appending to the file failed.
    #[error("record I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The existing file was written with different columns.
    #[error("{} has header {found:?}, expected {expected:?}", path.display())]
    HeaderMismatch {
        /// The table file.
        path: PathBuf,
        /// Header line the file starts with.
        found: String,
        /// Header line this table writes.
        expected: String,
    },
}

/// One CSV file with a fixed set of columns.
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
    header: String,
    width: usize,
    pending: Vec<String>,
}

impl CsvTable {
    /// A table at `path` whose columns are the participant context followed
    /// by `columns`.
    pub fn new(path: impl Into<PathBuf>, columns: &[&str]) -> Self {
        let all: Vec<&str> = ParticipantContext::COLUMNS
            .iter()
            .chain(columns)
            .copied()
            .collect();
        Self {
            path: path.into(),
            header: render_row(all.iter().copied()),
            width: all.len(),
            pending: Vec::new(),
        }
    }

    /// File the table is appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of columns, context included.
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Rows buffered since the last flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Buffer one row. `values` fill the columns after the context.
    pub fn push_row<I, S>(&mut self, context: &ParticipantContext, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<S> = values.into_iter().collect();
        let row = render_row(
            context
                .columns()
                .into_iter()
                .chain(values.iter().map(AsRef::as_ref)),
        );
        self.pending.push(row);
    }

    /// Append every buffered row, creating the file and its directory with
    /// a header line if needed. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::HeaderMismatch`] if the file exists with other
    /// columns and [`RecordError::Io`] if it cannot be written. Buffered rows
    /// are kept on failure.
    pub fn flush(&mut self) -> Result<usize, RecordError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let needs_header = match existing_header(&self.path)? {
            None => true,
            Some(found) if found == self.header => false,
            Some(found) => {
                return Err(RecordError::HeaderMismatch {
                    path: self.path.clone(),
                    found,
                    expected: self.header.clone(),
                });
            }
        };

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut out = BufWriter::new(file);
        if needs_header {
            writeln!(out, "{}", self.header)?;
        }
        for row in &self.pending {
            writeln!(out, "{row}")?;
        }
        out.flush()?;

        let written = self.pending.len();
        self.pending.clear();
        debug!(path = %self.path.display(), rows = written, "Table flushed");
        Ok(written)
    }
}

/// First line of `path`, or `None` if the file is absent or empty.
fn existing_header(path: &Path) -> Result<Option<String>, RecordError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut first = String::new();
    if BufReader::new(file).read_line(&mut first)? == 0 {
        return Ok(None);
    }
    Ok(Some(first.trim_end_matches(['\r', '\n']).to_owned()))
}

fn render_row<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    fields.map(escape).collect::<Vec<_>>().join(",")
}

/// Quote a field if it contains a delimiter, quote or line break.
pub fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context() -> ParticipantContext {
        ParticipantContext {
            participant_id: "P01".to_owned(),
            block: "Block1Trial1".to_owned(),
            interruption_method: "Immediate".to_owned(),
            task_type: "VisualNBackTask".to_owned(),
            task_setting: "One".to_owned(),
            traffic: "1RV".to_owned(),
        }
    }

    #[test]
    fn header_written_once_across_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DrivingData").join("speed.csv");
        let mut table = CsvTable::new(&path, &["Timestamp", "Speed"]);
        assert_eq!(table.width(), 7);

        table.push_row(&context(), ["02/05/2024 10:00:00.000", "48.5"]);
        assert_eq!(table.flush().unwrap(), 1);
        table.push_row(&context(), ["02/05/2024 10:00:00.050", "48.7"]);
        assert_eq!(table.flush().unwrap(), 1);
        assert_eq!(table.flush().unwrap(), 0);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "ParticipantID,InterruptionMethod,TaskType,TaskSetting,Traffic,Timestamp,Speed",
                "P01,Immediate,VisualNBackTask,One,1RV,02/05/2024 10:00:00.000,48.5",
                "P01,Immediate,VisualNBackTask,One,1RV,02/05/2024 10:00:00.050,48.7",
            ]
        );
    }

    #[test]
    fn second_table_instance_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speed.csv");
        for speed in ["10", "20"] {
            let mut table = CsvTable::new(&path, &["Timestamp", "Speed"]);
            table.push_row(&context(), ["t", speed]);
            table.flush().unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn mismatched_header_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speed.csv");
        fs::write(&path, "Something,Else\n").unwrap();

        let mut table = CsvTable::new(&path, &["Timestamp", "Speed"]);
        table.push_row(&context(), ["t", "1"]);
        let err = table.flush().unwrap_err();
        assert!(matches!(err, RecordError::HeaderMismatch { .. }));
        assert_eq!(table.pending(), 1);
    }

    #[test]
    fn fields_with_delimiters_are_quoted() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
