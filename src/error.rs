use std::time::Duration;

/// Failure of a single transport call.
///
/// Transient failures are retried in place by the transfer engine; anything else is
/// escalated to a reset and, if that does not help, to the session.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("device error: {0}")]
    Device(String),
}

impl TransportError {
    /// True if retrying the same request on the same slot may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Device(_))
    }
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("transport reset failed: {0}")]
    ResetFailed(TransportError),

    #[error("resubmitting slot {slot} failed after reset: {source}")]
    ResubmitFailed {
        slot: usize,
        source: TransportError,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_not_transient() {
        assert!(TransportError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(TransportError::Transfer("stall".into()).is_transient());
        assert!(!TransportError::Device("gone".into()).is_transient());
    }

    #[test]
    fn resubmit_failure_names_the_slot() {
        let err = Error::ResubmitFailed {
            slot: 2,
            source: TransportError::Device("unplugged".into()),
        };
        assert_eq!(
            err.to_string(),
            "resubmitting slot 2 failed after reset: device error: unplugged"
        );
    }
}
