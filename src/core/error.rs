//! Error types for the snapshot and regeneration engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid voxel token: {0}")]
    InvalidToken(String),

    #[error("unsupported snapshot format version {0}")]
    UnsupportedFormatVersion(u32),

    #[error("world '{0}' is not available")]
    WorldUnavailable(String),

    #[error("recursive load of region '{0}'")]
    RecursiveLoad(String),

    #[error("timed out loading region '{0}'")]
    LoadTimeout(String),

    #[error("failed to write snapshot for region '{0}': {1}")]
    WriteFailure(String, String),

    #[error("regeneration already in progress for region '{0}'")]
    RegenerationInProgress(String),

    #[error("no voxels captured for region '{0}'")]
    NoVoxelsCaptured(String),

    #[error("unknown region '{0}'")]
    UnknownRegion(String),

    #[error("region '{0}' already exists")]
    RegionExists(String),

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("regeneration cancelled for region '{0}'")]
    Cancelled(String),

    #[error("snapshot load failed: {0}")]
    LoadFailed(String),
}
