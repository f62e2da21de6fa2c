//! Transfer state, progress, and event types.

use std::sync::RwLock;
use std::time::Duration;

use hoist_protocol::{ErrorKind, SessionLocation, UploadMetadata};
use serde::{Deserialize, Serialize};

use crate::rate::RateEstimate;
use crate::retry::BackoffSchedule;
use crate::DEFAULT_CHUNK_SIZE;

/// Lifecycle states of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "creating")]
    Creating,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TransferStatus {
    /// Terminal states never transition again; a new transfer needs a reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// True while a transfer owns the session, including while paused.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Creating | Self::Uploading | Self::Paused)
    }
}

/// Why a transfer ended in [`TransferStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EndpointUnavailable,
    ServerError,
    AuthRejected,
    OffsetConflict,
    SessionExpired,
    SourceIo,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::EndpointUnavailable => Self::EndpointUnavailable,
            ErrorKind::ServerError => Self::ServerError,
            ErrorKind::AuthRejected => Self::AuthRejected,
            ErrorKind::OffsetConflict => Self::OffsetConflict,
            ErrorKind::SessionExpired => Self::SessionExpired,
        }
    }
}

/// Snapshot of how far the upload has come.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    /// Whole percent in `0..=100`, floored.
    pub percentage: u8,
    /// Bytes per second; zero while unknown.
    pub speed: f64,
    /// Seconds remaining at the current speed; zero while unknown.
    pub remaining_seconds: f64,
}

/// Events emitted while a transfer runs.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    StateChanged { status: TransferStatus },
    Progress(TransferProgress),
    Retrying { attempt: u32, delay_secs: f64 },
    Completed { location: SessionLocation },
    Failed { kind: FailureKind, message: String },
}

/// Tuning knobs for one upload.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Chunk size in bytes; zero falls back to [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: u64,
    pub backoff: BackoffSchedule,
    /// Limit for session create and offset queries.
    pub request_timeout: Duration,
    /// Limit for one chunk upload; sized for the payload, not a handshake.
    pub chunk_timeout: Duration,
    pub metadata: UploadMetadata,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            backoff: BackoffSchedule::default(),
            request_timeout: Duration::from_secs(30),
            chunk_timeout: Duration::from_secs(120),
            metadata: UploadMetadata::default(),
        }
    }
}

/// How a finished transfer ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Completed { location: SessionLocation },
    Failed { kind: FailureKind, message: String },
    Cancelled,
}

// ---------------------------------------------------------------------- //
// Session state
// ---------------------------------------------------------------------- //

#[derive(Debug)]
struct SessionInner {
    id: String,
    status: TransferStatus,
    bytes_total: u64,
    bytes_uploaded: u64,
    location: Option<SessionLocation>,
    rate: RateEstimate,
    failure: Option<(FailureKind, String)>,
}

/// Shared transfer state, readable from any thread while the drive task
/// mutates it.
#[derive(Debug)]
pub(crate) struct TransferSession {
    inner: RwLock<SessionInner>,
}

impl TransferSession {
    /// State before any transfer has started.
    pub(crate) fn idle() -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                id: String::new(),
                status: TransferStatus::Idle,
                bytes_total: 0,
                bytes_uploaded: 0,
                location: None,
                rate: RateEstimate::UNKNOWN,
                failure: None,
            }),
        }
    }

    /// Fresh transfer; starts in `Creating` so a concurrent start sees the
    /// session as taken before the drive task runs.
    pub(crate) fn new(id: String, bytes_total: u64) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                id,
                status: TransferStatus::Creating,
                bytes_total,
                bytes_uploaded: 0,
                location: None,
                rate: RateEstimate::UNKNOWN,
                failure: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> String {
        self.inner.read().unwrap().id.clone()
    }

    pub(crate) fn status(&self) -> TransferStatus {
        self.inner.read().unwrap().status
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub(crate) fn location(&self) -> Option<SessionLocation> {
        self.inner.read().unwrap().location.clone()
    }

    pub(crate) fn set_status(&self, status: TransferStatus) {
        self.inner.write().unwrap().status = status;
    }

    pub(crate) fn set_location(&self, location: SessionLocation) {
        self.inner.write().unwrap().location = Some(location);
    }

    /// Records the server-committed offset and the rate measured for it.
    pub(crate) fn set_offset(&self, bytes_uploaded: u64, rate: RateEstimate) {
        let mut inner = self.inner.write().unwrap();
        inner.bytes_uploaded = bytes_uploaded;
        inner.rate = rate;
    }

    pub(crate) fn complete(&self) {
        self.inner.write().unwrap().status = TransferStatus::Completed;
    }

    pub(crate) fn fail(&self, kind: FailureKind, message: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.status = TransferStatus::Failed;
        inner.failure = Some((kind, message.to_string()));
    }

    pub(crate) fn cancel(&self) {
        self.inner.write().unwrap().status = TransferStatus::Cancelled;
    }

    pub(crate) fn progress(&self) -> TransferProgress {
        let inner = self.inner.read().unwrap();
        let percentage = if inner.bytes_total == 0 {
            // An empty file has nothing to send; it is done exactly when the
            // transfer is.
            if inner.status == TransferStatus::Completed {
                100
            } else {
                0
            }
        } else {
            // Widened so the scaling cannot overflow near u64::MAX totals.
            let uploaded = inner.bytes_uploaded.min(inner.bytes_total) as u128;
            (uploaded * 100 / inner.bytes_total as u128) as u8
        };
        TransferProgress {
            bytes_uploaded: inner.bytes_uploaded,
            bytes_total: inner.bytes_total,
            percentage,
            speed: inner.rate.speed,
            remaining_seconds: inner.rate.remaining_seconds,
        }
    }

    pub(crate) fn outcome(&self) -> Option<TransferOutcome> {
        let inner = self.inner.read().unwrap();
        match inner.status {
            TransferStatus::Completed => inner
                .location
                .clone()
                .map(|location| TransferOutcome::Completed { location }),
            TransferStatus::Failed => inner
                .failure
                .clone()
                .map(|(kind, message)| TransferOutcome::Failed { kind, message }),
            TransferStatus::Cancelled => Some(TransferOutcome::Cancelled),
            _ => None,
        }
    }
}
