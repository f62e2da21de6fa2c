//! Error taxonomy shared by every [`ProtocolClient`](crate::ProtocolClient)
//! implementation.

use serde::{Deserialize, Serialize};

/// Errors surfaced by a protocol client.
///
/// Implementations map their transport failures onto these variants; the
/// engine decides retry policy from the variant alone and never sees
/// transport-library error types.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The endpoint could not be reached or did not answer in time.
    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// The server answered with a failure not covered by the other variants.
    #[error("server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// The credential was rejected.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The server's committed offset disagrees with the offset we sent.
    #[error("offset conflict: sent {expected}, server at {actual}")]
    OffsetConflict { expected: u64, actual: u64 },

    /// The upload session no longer exists on the server.
    #[error("upload session expired")]
    SessionExpired,
}

impl ProtocolError {
    /// Classification without payloads, for event surfaces and logs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EndpointUnavailable(_) => ErrorKind::EndpointUnavailable,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::AuthRejected(_) => ErrorKind::AuthRejected,
            Self::OffsetConflict { .. } => ErrorKind::OffsetConflict,
            Self::SessionExpired => ErrorKind::SessionExpired,
        }
    }

    /// Returns `true` if another attempt at the same operation may succeed.
    ///
    /// Offset conflicts are excluded: they need reconciliation, not a blind
    /// retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EndpointUnavailable(_) | Self::ServerError { .. }
        )
    }

    /// Returns `true` if the session is beyond saving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected(_) | Self::SessionExpired)
    }
}

/// Fieldless copy of the [`ProtocolError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EndpointUnavailable,
    ServerError,
    AuthRejected,
    OffsetConflict,
    SessionExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> Vec<ProtocolError> {
        vec![
            ProtocolError::EndpointUnavailable("connection refused".into()),
            ProtocolError::ServerError {
                status: 503,
                message: "try later".into(),
            },
            ProtocolError::AuthRejected("token expired".into()),
            ProtocolError::OffsetConflict {
                expected: 1024,
                actual: 512,
            },
            ProtocolError::SessionExpired,
        ]
    }

    #[test]
    fn kind_matches_variant() {
        let kinds: Vec<ErrorKind> = all_kinds().iter().map(ProtocolError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::EndpointUnavailable,
                ErrorKind::ServerError,
                ErrorKind::AuthRejected,
                ErrorKind::OffsetConflict,
                ErrorKind::SessionExpired,
            ]
        );
    }

    #[test]
    fn transient_only_for_endpoint_and_server() {
        let flags: Vec<bool> = all_kinds().iter().map(ProtocolError::is_transient).collect();
        assert_eq!(flags, vec![true, true, false, false, false]);
    }

    #[test]
    fn fatal_only_for_auth_and_expired() {
        let flags: Vec<bool> = all_kinds().iter().map(ProtocolError::is_fatal).collect();
        assert_eq!(flags, vec![false, false, true, false, true]);
    }

    #[test]
    fn conflict_is_neither_transient_nor_fatal() {
        let err = ProtocolError::OffsetConflict {
            expected: 10,
            actual: 20,
        };
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn conflict_display_carries_both_offsets() {
        let err = ProtocolError::OffsetConflict {
            expected: 5_242_880,
            actual: 2_097_152,
        };
        let msg = err.to_string();
        assert!(msg.contains("5242880"), "missing sent offset: {msg}");
        assert!(msg.contains("2097152"), "missing server offset: {msg}");
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::EndpointUnavailable).unwrap();
        assert_eq!(json, "\"endpoint_unavailable\"");
        let json = serde_json::to_string(&ErrorKind::OffsetConflict).unwrap();
        assert_eq!(json, "\"offset_conflict\"");
    }
}
