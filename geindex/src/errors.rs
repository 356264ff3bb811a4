//! Error and result types shared by every layer of the storage engine.

use std::io;
use thiserror::Error;

/// Errors raised by file bundles, index bundles and the quadtree index.
///
/// `NotFound` is an ordinary control-flow outcome for lookups (a missing
/// tile), every other variant should be treated as fatal for the request
/// that produced it.
#[derive(Debug, Error)]
pub enum GeIndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// CRC mismatch, bad magic or a malformed bucket/header.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported format version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    /// Write into a read-only segment, across a segment boundary, beyond the
    /// allocated space, or into a closed bundle.
    #[error("Write error: {0}")]
    Write(String),

    #[error("Quadtree path {current} written after {previous}, paths must be increasing")]
    OrderViolation { previous: String, current: String },

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Usage error: {0}")]
    Usage(String),
}

impl GeIndexError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        GeIndexError::Corruption(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GeIndexError::NotFound(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        GeIndexError::Write(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        GeIndexError::Usage(msg.into())
    }

    /// True when the error only reports that the requested entry is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GeIndexError::NotFound(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, GeIndexError::Corruption(_))
    }
}

/// Result type for storage and index operations
pub type GeIndexResult<T> = Result<T, GeIndexError>;
