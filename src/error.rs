//! Error types and result definitions for the rustgree crate.
//! Includes conversions from standard IO/JSON/base64 errors.

use crate::engine::ConnectionState;
use thiserror::Error;

/// Represents all possible errors that can occur when talking to a unit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GreeError {
    /// Socket bind or send failure. Retried internally with a fixed backoff.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A received datagram could not be decrypted or parsed
    #[error("Codec error: {0}")]
    Codec(String),

    /// A well-formed packet arrived that the current connection state does not accept
    #[error("Unexpected '{packet}' packet while {state}")]
    ProtocolViolation {
        packet: String,
        state: ConnectionState,
    },

    /// A command was issued before binding completed
    #[error("Device is not bound")]
    NotConnected,

    /// Caller supplied a value outside the parameter's domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device's background task has exited
    #[error("Device stopped")]
    Stopped,
}

/// A specialized Result type for device operations.
pub type Result<T> = std::result::Result<T, GreeError>;

impl GreeError {
    /// Transport failures heal themselves through the retry policy; everything
    /// else is either a dropped packet or a caller mistake.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GreeError::Transport(_))
    }

    pub(crate) fn violation(packet: impl Into<String>, state: ConnectionState) -> Self {
        GreeError::ProtocolViolation {
            packet: packet.into(),
            state,
        }
    }
}

impl From<std::io::Error> for GreeError {
    fn from(err: std::io::Error) -> Self {
        GreeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for GreeError {
    fn from(err: serde_json::Error) -> Self {
        GreeError::Codec(err.to_string())
    }
}

impl From<base64::DecodeError> for GreeError {
    fn from(err: base64::DecodeError) -> Self {
        GreeError::Codec(format!("base64: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_recoverable() {
        assert!(GreeError::Transport("port in use".into()).is_recoverable());
        assert!(!GreeError::NotConnected.is_recoverable());
        assert!(!GreeError::Codec("bad padding".into()).is_recoverable());
    }

    #[test]
    fn violation_message_names_packet_and_state() {
        let err = GreeError::violation("dat", ConnectionState::AwaitingIdentity);
        assert_eq!(
            err.to_string(),
            "Unexpected 'dat' packet while awaiting identity"
        );
    }

    #[test]
    fn io_errors_map_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        assert!(matches!(GreeError::from(io), GreeError::Transport(_)));
    }
}
