use thiserror::Error;

use crate::ids::{PeerId, Stamp};

/// Errors that can occur in the load-balancing layer.
#[derive(Debug, Error)]
pub enum RaubzugError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The peer is gone: its connection was closed or it was never reachable.
    #[error("peer {0} is disconnected")]
    Disconnected(PeerId),

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("steal reply from {from} matches no outstanding steal request")]
    UnmatchedReply { from: PeerId },

    #[error("task {0} has no outcome to send")]
    MissingOutcome(Stamp),

    #[error("truncated message: {0}")]
    Truncated(String),

    #[error("scheduler is exiting")]
    Exiting,
}

impl RaubzugError {
    /// Programming-invariant violations after which the process must not
    /// continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RaubzugError::UnknownOpcode(_) | RaubzugError::UnmatchedReply { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_protocol_violations_are_fatal() {
        assert!(RaubzugError::UnknownOpcode(0xff).is_fatal());
        assert!(RaubzugError::UnmatchedReply {
            from: PeerId::new("x", "d1")
        }
        .is_fatal());
        assert!(!RaubzugError::Disconnected(PeerId::new("x", "d1")).is_fatal());
        assert!(!RaubzugError::Exiting.is_fatal());
    }

    #[test]
    fn unknown_opcode_message_is_hex() {
        assert_eq!(
            RaubzugError::UnknownOpcode(0x2a).to_string(),
            "unknown opcode 0x2a"
        );
    }
}
