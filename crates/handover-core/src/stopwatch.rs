//! Reaction-time stopwatch.
//!
//! Started when the take-over request is issued and stopped when the
//! participant takes manual control. Instants are supplied by the caller so
//! the tick loop can drive it from an injected clock.

use std::time::{Duration, Instant};

use crate::state::ConsistencyError;

/// Two-state stopwatch: [`Stopwatch::Idle`] or [`Stopwatch::Running`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stopwatch {
    /// Not measuring.
    #[default]
    Idle,
    /// Measuring since `started_at`.
    Running {
        /// When the measurement started.
        started_at: Instant,
    },
}

impl Stopwatch {
    /// Start measuring at `at`. No-op if already running.
    pub const fn start(&mut self, at: Instant) {
        if let Self::Idle = self {
            *self = Self::Running { started_at: at };
        }
    }

    /// Stop measuring at `at` and return the elapsed time.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::StopwatchIdle`] if the stopwatch was not
    /// running, or [`ConsistencyError::NonPositiveElapsed`] if `at` is not
    /// strictly after the start.
    pub fn stop(&mut self, at: Instant) -> Result<Duration, ConsistencyError> {
        let Self::Running { started_at } = *self else {
            return Err(ConsistencyError::StopwatchIdle);
        };
        *self = Self::Idle;
        match at.checked_duration_since(started_at) {
            Some(elapsed) if !elapsed.is_zero() => Ok(elapsed),
            _ => Err(ConsistencyError::NonPositiveElapsed),
        }
    }

    /// Whether a measurement is in progress.
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn start_then_stop_yields_elapsed() {
        let t0 = Instant::now();
        let t1 = t0.checked_add(Duration::from_millis(840)).unwrap();
        let mut watch = Stopwatch::default();
        watch.start(t0);
        assert!(watch.is_running());
        assert_eq!(watch.stop(t1).unwrap(), Duration::from_millis(840));
        assert!(!watch.is_running());
    }

    #[test]
    fn stop_without_start_fails() {
        let mut watch = Stopwatch::default();
        let err = watch.stop(Instant::now()).unwrap_err();
        assert!(matches!(err, ConsistencyError::StopwatchIdle));
    }

    #[test]
    fn second_start_keeps_first_instant() {
        let t0 = Instant::now();
        let t1 = t0.checked_add(Duration::from_millis(300)).unwrap();
        let t2 = t0.checked_add(Duration::from_millis(500)).unwrap();
        let mut watch = Stopwatch::default();
        watch.start(t0);
        watch.start(t1);
        assert_eq!(watch.stop(t2).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn zero_elapsed_is_rejected() {
        let t0 = Instant::now();
        let mut watch = Stopwatch::default();
        watch.start(t0);
        let err = watch.stop(t0).unwrap_err();
        assert!(matches!(err, ConsistencyError::NonPositiveElapsed));
    }
}
