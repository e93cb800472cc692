//! Minimal INI document model.
//!
//! Keeps what the experiment tooling relies on when rewriting a file:
//! the `#` comment block at the top, section order, and key case. Comments
//! anywhere else are dropped on rewrite. Values are stored raw, quotes
//! included; [`IniDocument::value`] strips them.
//!
//! Key lookups ignore ASCII case. Written entries use `key=value` with no
//! spaces around the delimiter.

use std::fmt::Write as _;
use std::path::Path;

/// Errors that can occur when reading or writing an INI document.
#[derive(Debug, thiserror::Error)]
pub enum IniError {
    /// Failed to read or write the file.
    #[error("INI I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A line is neither a section header, an entry, a comment nor blank.
    #[error("line {line}: {message}")]
    Syntax {
        /// One-based line number.
        line: usize,
        /// What was wrong with it.
        message: String,
    },

    /// The same section appears twice.
    #[error("duplicate section [{name}]")]
    DuplicateSection {
        /// The section name.
        name: String,
    },

    /// The same key appears twice in one section.
    #[error("duplicate key {key} in [{section}]")]
    DuplicateKey {
        /// The section name.
        section: String,
        /// The key.
        key: String,
    },

    /// A referenced section does not exist.
    #[error("no section [{name}]")]
    MissingSection {
        /// The section name.
        name: String,
    },
}

/// One `[name]` section and its entries, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    /// An empty section.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Section name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw value of `key`, quotes included.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Value of `key` with surrounding double quotes removed.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.raw(key).map(unquote)
    }

    /// Entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace the raw value of `key`, keeping its position and case, or
    /// append it if absent.
    pub fn set(&mut self, key: &str, raw_value: impl Into<String>) {
        let raw_value = raw_value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            entry.1 = raw_value;
        } else {
            self.entries.push((key.to_owned(), raw_value));
        }
    }
}

/// A whole INI file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    header_comments: Vec<String>,
    sections: Vec<IniSection>,
}

impl IniDocument {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IniError::Io`] if the file cannot be read, or any parse
    /// error from [`IniDocument::parse`].
    pub fn load(path: &Path) -> Result<Self, IniError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse INI text.
    ///
    /// # Errors
    ///
    /// Returns [`IniError::Syntax`] for malformed lines or entries outside a
    /// section, and the duplicate errors for repeated sections or keys.
    pub fn parse(text: &str) -> Result<Self, IniError> {
        let mut doc = Self::new();
        let mut in_header = true;

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index.saturating_add(1);

            if in_header && raw_line.starts_with('#') {
                doc.header_comments.push(raw_line.to_owned());
                continue;
            }
            in_header = false;

            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| IniError::Syntax {
                        line: line_no,
                        message: format!("malformed section header {line:?}"),
                    })?;
                if doc.section(name).is_some() {
                    return Err(IniError::DuplicateSection {
                        name: name.to_owned(),
                    });
                }
                doc.sections.push(IniSection::new(name));
                continue;
            }

            let Some((key, value)) = split_entry(line) else {
                return Err(IniError::Syntax {
                    line: line_no,
                    message: format!("expected key=value, got {line:?}"),
                });
            };
            let Some(section) = doc.sections.last_mut() else {
                return Err(IniError::Syntax {
                    line: line_no,
                    message: "entry before the first section".to_owned(),
                });
            };
            if section.raw(key).is_some() {
                return Err(IniError::DuplicateKey {
                    section: section.name.clone(),
                    key: key.to_owned(),
                });
            }
            section.entries.push((key.to_owned(), value.to_owned()));
        }

        Ok(doc)
    }

    /// The `#` lines at the very top of the file.
    pub fn header_comments(&self) -> &[String] {
        &self.header_comments
    }

    /// Replace the top-of-file comment block. Lines should start with `#`.
    pub fn set_header_comments(&mut self, lines: Vec<String>) {
        self.header_comments = lines;
    }

    /// Sections in file order.
    pub fn sections(&self) -> &[IniSection] {
        &self.sections
    }

    /// Section named `name` (case-sensitive, like section headers).
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Mutable section named `name`.
    pub fn section_mut(&mut self, name: &str) -> Option<&mut IniSection> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    /// Append `section`.
    ///
    /// # Errors
    ///
    /// Returns [`IniError::DuplicateSection`] if a section with that name
    /// already exists.
    pub fn push_section(&mut self, section: IniSection) -> Result<(), IniError> {
        if self.section(&section.name).is_some() {
            return Err(IniError::DuplicateSection { name: section.name });
        }
        self.sections.push(section);
        Ok(())
    }

    /// Set the raw value of `key` in `section`, creating the section at the
    /// end if needed.
    pub fn set_raw(&mut self, section: &str, key: &str, raw_value: impl Into<String>) {
        match self.sections.iter_mut().find(|s| s.name == section) {
            Some(existing) => existing.set(key, raw_value),
            None => {
                let mut created = IniSection::new(section);
                created.set(key, raw_value);
                self.sections.push(created);
            }
        }
    }

    /// Unquoted value of `key` in `section`.
    pub fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.value(key))
    }

    /// Set `key` in an existing `section` to `value`, wrapping it in double
    /// quotes unless it already is.
    ///
    /// # Errors
    ///
    /// Returns [`IniError::MissingSection`] if the section does not exist.
    pub fn set_quoted(&mut self, section: &str, key: &str, value: &str) -> Result<(), IniError> {
        let target = self
            .section_mut(section)
            .ok_or_else(|| IniError::MissingSection {
                name: section.to_owned(),
            })?;
        target.set(key, quote(value));
        Ok(())
    }

    /// Render the document: header comments, then each section followed by
    /// a blank line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for comment in &self.header_comments {
            out.push_str(comment);
            out.push('\n');
        }
        for section in &self.sections {
            let _ = writeln!(out, "[{}]", section.name);
            for (key, value) in &section.entries {
                let _ = writeln!(out, "{key}={value}");
            }
            out.push('\n');
        }
        out
    }

    /// Render and write the document to `path`, replacing the file.
    ///
    /// # Errors
    ///
    /// Returns [`IniError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), IniError> {
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

/// Split `key=value` or `key: value` at the first delimiter.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let at = line.find(['=', ':'])?;
    let (key, rest) = line.split_at(at);
    let value = rest.get(1..)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Strip one pair of surrounding double quotes, if present.
pub fn unquote(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Wrap `value` in double quotes unless it already starts/ends with one.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len().saturating_add(2));
    if !value.starts_with('"') {
        quoted.push('"');
    }
    quoted.push_str(value);
    if !value.ends_with('"') {
        quoted.push('"');
    }
    quoted
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Experiment configuration
# Do not edit while a trial is running

[General]
ParticipantID=\"P07\"
LogPerformance=\"True\"
CurrentBlock=\"Block0Trial1\"

; trial blocks
[Block1Trial1]
SkipSR = \"False\"
NDRTTaskType: \"VisualNBackTask\"
";

    #[test]
    fn parses_sections_in_order_with_header_comments() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.header_comments().len(), 2);
        let names: Vec<&str> = doc.sections().iter().map(IniSection::name).collect();
        assert_eq!(names, vec!["General", "Block1Trial1"]);
        assert_eq!(doc.value("General", "ParticipantID"), Some("P07"));
        assert_eq!(doc.value("Block1Trial1", "ndrttasktype"), Some("VisualNBackTask"));
        assert_eq!(doc.section("Block1Trial1").unwrap().raw("SkipSR"), Some("\"False\""));
    }

    #[test]
    fn set_quoted_keeps_key_case_and_position() {
        let mut doc = IniDocument::parse(SAMPLE).unwrap();
        doc.set_quoted("General", "currentblock", "Block1Trial1").unwrap();
        let general = doc.section("General").unwrap();
        let keys: Vec<&str> = general.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ParticipantID", "LogPerformance", "CurrentBlock"]);
        assert_eq!(general.raw("CurrentBlock"), Some("\"Block1Trial1\""));
    }

    #[test]
    fn render_uses_tight_delimiter_and_keeps_header() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        let text = doc.render();
        assert!(text.starts_with("# Experiment configuration\n# Do not edit"));
        assert!(text.contains("[Block1Trial1]\nSkipSR=\"False\"\nNDRTTaskType=\"VisualNBackTask\"\n"));
        assert!(!text.contains("; trial blocks"));
        assert_eq!(IniDocument::parse(&text).unwrap(), doc);
    }

    #[test]
    fn entry_before_section_is_rejected() {
        let err = IniDocument::parse("key=value\n[General]\n").unwrap_err();
        assert!(matches!(err, IniError::Syntax { line: 1, .. }));
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = IniDocument::parse("[A]\n[A]\n").unwrap_err();
        assert!(matches!(err, IniError::DuplicateSection { .. }));
        let err = IniDocument::parse("[A]\nx=1\nX=2\n").unwrap_err();
        assert!(matches!(err, IniError::DuplicateKey { .. }));
    }

    #[test]
    fn quoting_is_idempotent() {
        assert_eq!(quote("Block2"), "\"Block2\"");
        assert_eq!(quote("\"Block2\""), "\"Block2\"");
        assert_eq!(quote("\"Block2"), "\"Block2\"");
        assert_eq!(unquote("\"x\""), "x");
        assert_eq!(unquote("x"), "x");
    }

    #[test]
    fn set_raw_creates_section_once() {
        let mut doc = IniDocument::new();
        doc.set_raw("General", "ParticipantID", "\"P01\"");
        doc.set_raw("General", "LogPerformance", "\"True\"");
        assert_eq!(doc.sections().len(), 1);
        assert_eq!(doc.value("General", "LogPerformance"), Some("True"));
        let err = doc.push_section(IniSection::new("General")).unwrap_err();
        assert!(matches!(err, IniError::DuplicateSection { .. }));
    }
}
