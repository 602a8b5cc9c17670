use std::time::{Duration, Instant};

use crate::error::MigrationError;
use crate::models::RowFailure;

/// Caller-supplied limit for one import or reconciliation call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self) -> Result<(), MigrationError> {
        self.check_rejecting(&[])
    }

    /// Like `check`, but the error carries the rows rejected so far.
    pub fn check_rejecting(&self, rejected: &[RowFailure]) -> Result<(), MigrationError> {
        if self.is_expired() {
            return Err(MigrationError::DeadlineExceeded {
                rejected: rejected.to_vec(),
            });
        }
        Ok(())
    }
}
