use thiserror::Error;
use uuid::Uuid;

/// Error kinds surfaced by the scheduling core. Every operation returns
/// synchronously; the core never retries a failed business operation on its
/// own. `Busy` is the only kind a caller should retry (with backoff), all
/// others need a corrected request.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Scheduling conflict: {0}")]
    Conflict(String),

    #[error("Request is not eligible for this action (status: {0})")]
    NotPending(String),

    #[error("Doctor {0} has already recorded a decision on this request")]
    AlreadyDecided(Uuid),

    #[error("Schedule is still in use: {0}")]
    InUse(String),

    #[error("Timed out waiting for the {0} lock")]
    Busy(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl SchedulingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulingError::Busy(_))
    }
}
