//! HTTP transport for the upload engine.
//!
//! Implements the three protocol verbs over an offset-negotiating resumable
//! dialect: creation returns a session `Location`, chunk bytes travel in
//! `PATCH` requests positioned by `Upload-Offset`, and the server answers
//! accepted writes and `HEAD` probes with its committed offset.

pub mod client;

pub use client::{BuildError, HttpUploadClient};
