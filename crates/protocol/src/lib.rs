//! Client-side contract for resumable upload servers.
//!
//! The upload engine drives any server that can answer three questions:
//! where does a new session live, what is the committed offset after a chunk
//! lands, and how far has a session got. [`ProtocolClient`] captures exactly
//! that surface so transports can be swapped without touching the engine.

pub mod client;
pub mod error;
pub mod types;

pub use client::ProtocolClient;
pub use error::{ErrorKind, ProtocolError};
pub use types::{SessionLocation, UploadMetadata};
