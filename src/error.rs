//! Error types for the broker integration harness
//!
//! Only failures that must interrupt the caller are errors. A bounded wait that
//! elapses is not an error: waits return `None` instead. A refused connection is
//! not an error either: it is reported as a [`ConnectOutcome`] value so that the
//! scenario decides whether it was expected.
//!
//! [`ConnectOutcome`]: crate::transport::mqtt::ConnectOutcome

use std::process::ExitStatus;
use thiserror::Error;

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The broker process exited during its startup grace period
    #[error("Broker '{executable}' exited during startup: {status}")]
    StartupFailure {
        executable: String,
        status: ExitStatus,
    },

    /// The broker executable could not be spawned at all
    #[error("Failed to spawn broker '{executable}': {source}")]
    SpawnFailed {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` called on a supervisor that already failed or was stopped
    #[error("Supervisor '{name}' has finished and cannot be restarted")]
    SupervisorFinished { name: String },

    /// The client library rejected a publish request before it left the process
    #[error("Publish to '{topic}' rejected by client '{client}': {reason}")]
    PublishFailure {
        client: String,
        topic: String,
        reason: String,
    },

    /// The client library refused to queue a request other than a publish
    #[error("{request} from client '{client}' not queued: {reason}")]
    RequestRejected {
        client: String,
        request: &'static str,
        reason: String,
    },

    /// A raw probe read or write did not complete the expected byte count
    #[error("Protocol framing error during {stage}: expected {expected} bytes, got {actual}")]
    ProtocolFramingError {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A raw probe received bytes that are not the packet it expected
    #[error("Unexpected packet during {stage}: {bytes:02x?}")]
    UnexpectedPacket { stage: &'static str, bytes: Vec<u8> },

    /// A QoS level outside 0..=2
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),

    /// An adapter operation called out of order (e.g. publish before connect)
    #[error("Adapter '{client}' is not connected")]
    NotConnected { client: String },

    /// An adapter operation that may happen only once was repeated
    #[error("Adapter '{client}' already connected")]
    AlreadyConnected { client: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Create a publish failure for the given client and topic
    pub fn publish_failure<S: Into<String>>(client: &str, topic: &str, reason: S) -> Self {
        Self::PublishFailure {
            client: client.to_string(),
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a rejection for a non-publish client request
    pub fn request_rejected<S: Into<String>>(client: &str, request: &'static str, reason: S) -> Self {
        Self::RequestRejected {
            client: client.to_string(),
            request,
            reason: reason.into(),
        }
    }

    /// Create a framing error for a short read or write
    pub fn framing(stage: &'static str, expected: usize, actual: usize) -> Self {
        Self::ProtocolFramingError {
            stage,
            expected,
            actual,
        }
    }

    /// Whether this error is fatal to the whole suite rather than a single scenario
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::StartupFailure { .. }
                | HarnessError::SpawnFailed { .. }
                | HarnessError::Config(_)
        )
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_rejected_keeps_reason() {
        let error = HarnessError::request_rejected("sub-1", "UNSUBSCRIBE", "request channel closed");
        assert!(!error.is_fatal());
        assert_eq!(
            error.to_string(),
            "UNSUBSCRIBE from client 'sub-1' not queued: request channel closed"
        );
    }

    #[test]
    fn test_publish_failure_constructor() {
        let error = HarnessError::publish_failure("pub-1", "/test/topic", "request channel closed");
        assert!(matches!(error, HarnessError::PublishFailure { .. }));
        assert_eq!(
            error.to_string(),
            "Publish to '/test/topic' rejected by client 'pub-1': request channel closed"
        );
    }

    #[test]
    fn test_framing_error_display() {
        let error = HarnessError::framing("CONNACK read", 4, 1);
        assert_eq!(
            error.to_string(),
            "Protocol framing error during CONNACK read: expected 4 bytes, got 1"
        );
    }

    #[test]
    fn test_unexpected_packet_display_is_hex() {
        let error = HarnessError::UnexpectedPacket {
            stage: "CONNACK read",
            bytes: vec![0x30, 0x02],
        };
        assert!(error.to_string().contains("30"));
        assert!(error.to_string().contains("02"));
    }

    #[test]
    fn test_fatal_classification() {
        let spawn = HarnessError::SpawnFailed {
            executable: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(spawn.is_fatal());
        assert!(!HarnessError::InvalidQos(3).is_fatal());
        assert!(!HarnessError::framing("CONNECT write", 23, 0).is_fatal());
    }
}
