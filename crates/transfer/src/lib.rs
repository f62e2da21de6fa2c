//! Resumable upload engine.
//!
//! [`Uploader`] drives a file through any [`hoist_protocol::ProtocolClient`]:
//! it plans fixed-size chunks, sends them one at a time, retries transient
//! failures with backoff, reconciles offsets with the server after conflicts
//! and pauses, and reports progress over a channel. Interrupted transfers
//! resume from the server's committed offset instead of starting over.

mod controller;
mod plan;
mod rate;
mod retry;
mod source;
mod types;

pub use controller::Uploader;
pub use plan::{ByteRange, ChunkPlan};
pub use rate::{RateEstimate, RateEstimator};
pub use retry::{BackoffSchedule, RetryState};
pub use source::ChunkSource;
pub use types::{
    FailureKind, TransferEvent, TransferOutcome, TransferProgress, TransferStatus, UploadConfig,
};

/// Default chunk size of 5 MiB.
///
/// Large enough to amortize per-request overhead on fast links, small enough
/// that a retry after a dropped connection re-sends little.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Errors produced by the engine itself, as opposed to the protocol taxonomy
/// a server answers with.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] hoist_protocol::ProtocolError),

    #[error("an upload is already running")]
    AlreadyRunning,

    #[error("background task failed: {0}")]
    Join(String),
}

impl TransferError {
    /// Classification for the failure event surface. Local errors count as
    /// source I/O; protocol errors keep their own kind.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Io(_) | Self::AlreadyRunning | Self::Join(_) => FailureKind::SourceIo,
            Self::Protocol(err) => err.kind().into(),
        }
    }
}
