//! Error taxonomy for the allocator.
//!
//! Only configuration mistakes and snapshot I/O surface as errors. Guard
//! hard stops return an empty target map, and a failing data source degrades
//! to a neutral factor inside the stage that consumes it.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to allocator callers.
#[derive(Error, Debug)]
pub enum AllocatorError {
    /// Allocation mode string did not parse.
    #[error("unknown allocation mode: {0}")]
    UnknownMode(String),

    /// Snapshot path does not exist.
    #[error("snapshot not found: {}", .0.display())]
    SnapshotNotFound(PathBuf),

    /// Snapshot exceeds the hard size ceiling.
    #[error("snapshot too large: {} is {size} bytes (limit {limit})", .path.display())]
    SnapshotTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    /// Snapshot payload is not valid JSON for the expected layout.
    #[error("snapshot parse error: {0}")]
    SnapshotParse(#[from] serde_json::Error),

    /// Snapshot carries a layout version this build does not understand.
    #[error("unsupported snapshot version: {0}")]
    SnapshotVersion(u32),

    /// IO error reading or writing a snapshot.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AllocatorError {
    /// Whether the error belongs to the snapshot family.
    pub fn is_snapshot_error(&self) -> bool {
        !matches!(self, AllocatorError::UnknownMode(_))
    }
}

pub type AllocatorResult<T> = std::result::Result<T, AllocatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AllocatorError::UnknownMode("momentum".to_string());
        assert_eq!(err.to_string(), "unknown allocation mode: momentum");
        assert!(!err.is_snapshot_error());

        let err = AllocatorError::SnapshotTooLarge {
            path: PathBuf::from("state/alloc.json"),
            size: 2_000_000,
            limit: 1_048_576,
        };
        assert!(err.to_string().contains("2000000 bytes"));
        assert!(err.is_snapshot_error());
    }
}
