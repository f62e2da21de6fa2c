//! The swappable client boundary.

use std::future::Future;
use std::pin::Pin;

use crate::error::ProtocolError;
use crate::types::{SessionLocation, UploadMetadata};

/// Abstract resumable-upload server.
///
/// The engine talks to the server through this trait only, which keeps the
/// transport swappable and the engine testable with scripted mocks. Methods
/// return boxed futures so the trait stays dyn-compatible; implementations
/// clone borrowed arguments before building the future.
pub trait ProtocolClient: Send + Sync {
    /// Opens a session for `total_len` bytes and returns where it lives.
    fn create(
        &self,
        total_len: u64,
        metadata: &UploadMetadata,
    ) -> Pin<Box<dyn Future<Output = Result<SessionLocation, ProtocolError>> + Send + '_>>;

    /// Appends `bytes` at `offset` and returns the server's new committed
    /// offset.
    ///
    /// On success the returned offset is `offset + bytes.len()`; a server
    /// whose committed offset disagrees with `offset` answers with
    /// [`ProtocolError::OffsetConflict`] instead of accepting the write.
    fn send_chunk(
        &self,
        location: &SessionLocation,
        offset: u64,
        bytes: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<u64, ProtocolError>> + Send + '_>>;

    /// Returns the server's committed offset for the session.
    fn query_offset(
        &self,
        location: &SessionLocation,
    ) -> Pin<Box<dyn Future<Output = Result<u64, ProtocolError>> + Send + '_>>;
}
