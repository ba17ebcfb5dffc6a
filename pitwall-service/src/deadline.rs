//! Deadline budgets for queue-message processing.
//!
//! Every ingestion job runs under a [`Deadline`]. The worker reduces the
//! incoming deadline by a configured buffer before invoking the handler so
//! downstream I/O aborts with enough time left to produce a clean error and
//! reset the message visibility. Handlers check the deadline between phases.

use std::time::{Duration, Instant};

/// A point in time before which work must finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

/// Error of [`Deadline::reduced`] when the buffer exceeds the remaining
/// budget.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("attempt to reduce deadline by more than possible")]
pub struct ReduceDeadlineError;

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// A deadline at the given instant.
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// The remaining budget; zero once the deadline passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the deadline passed.
    pub fn expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Returns a deadline `buffer` earlier than this one.
    ///
    /// Fails when the buffer meets or exceeds the remaining budget; callers
    /// are expected to fail fast without starting the guarded work.
    pub fn reduced(&self, buffer: Duration) -> Result<Deadline, ReduceDeadlineError> {
        if self.remaining() <= buffer {
            return Err(ReduceDeadlineError);
        }
        Ok(Deadline {
            at: self.at - buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduces_by_buffer() {
        let deadline = Deadline::after(Duration::from_secs(30));
        let reduced = deadline.reduced(Duration::from_secs(5)).unwrap();
        let diff = deadline.remaining() - reduced.remaining();
        // the two `remaining` calls race the clock, allow some slack
        assert!(diff >= Duration::from_millis(4900) && diff <= Duration::from_millis(5100));
    }

    #[test]
    fn fails_fast_when_buffer_exceeds_remaining() {
        let deadline = Deadline::after(Duration::from_secs(3));
        let err = deadline.reduced(Duration::from_secs(5)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "attempt to reduce deadline by more than possible"
        );
    }

    #[test]
    fn expired_deadline_has_no_remaining_budget() {
        let deadline = Deadline::at(Instant::now());
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
