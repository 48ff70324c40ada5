use thiserror::Error;

use crate::broker::BrokerError;
use crate::event::DecodeError;

/// Errors surfaced by the relay to the callers of its operations.
///
/// None of these are fatal to the worker pool: decode failures are dropped by
/// the workers, and every other variant is returned to the caller of the
/// operation that produced it.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Subscription limit of {limit} reached, cannot subscribe to {topic}")]
    CapacityExceeded { topic: String, limit: usize },

    #[error("Release of {topic} without a matching subscribe")]
    InvalidRelease { topic: String },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Relay is already running")]
    AlreadyRunning,
}

impl RelayError {
    /// Whether the error is a caller contract violation rather than an
    /// infrastructure failure
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidRelease { .. }
                | RelayError::CapacityExceeded { .. }
                | RelayError::AlreadyRunning
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violations() {
        let release = RelayError::InvalidRelease {
            topic: "client:c1".to_string(),
        };
        let capacity = RelayError::CapacityExceeded {
            topic: "client:c1".to_string(),
            limit: 1,
        };
        let broker = RelayError::Broker(BrokerError::Closed);

        assert!(release.is_contract_violation());
        assert!(capacity.is_contract_violation());
        assert!(RelayError::AlreadyRunning.is_contract_violation());
        assert!(!broker.is_contract_violation());
    }

    #[test]
    fn test_error_messages_name_the_topic() {
        let err = RelayError::CapacityExceeded {
            topic: "user:u1".to_string(),
            limit: 8,
        };
        assert_eq!(
            err.to_string(),
            "Subscription limit of 8 reached, cannot subscribe to user:u1"
        );
    }
}
