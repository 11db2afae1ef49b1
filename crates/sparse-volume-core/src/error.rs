//! Error types for sparse-volume.

use thiserror::Error;

/// The main error type for sparse-volume operations.
#[derive(Error, Debug)]
pub enum VolumeError {
    /// The volume module has not been started.
    #[error("volume module not started - call sparse_volume::startup_module() first")]
    NotInitialized,

    /// The volume module has already been started.
    #[error("volume module already started")]
    AlreadyInitialized,

    /// An index-to-local transform or index extent violated its invariants.
    #[error("invalid volume transform: {0}")]
    InvalidTransform(String),

    /// A render parameter was out of range.
    #[error("invalid render parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Voxel payload size does not match its declared dimensions and format.
    #[error("voxel payload size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A proxy with the given id was not found on the render timeline.
    #[error("scene proxy {0} not found")]
    ProxyNotFound(u64),

    /// A proxy with the given id is already registered.
    #[error("scene proxy {0} already exists")]
    ProxyExists(u64),

    /// A volume-track handler with the given name is already registered.
    #[error("volume track handler '{0}' already registered")]
    TrackHandlerExists(String),

    /// The render timeline has shut down and no longer accepts commands.
    #[error("render timeline disconnected")]
    Disconnected,

    /// A volume sequence has no frames.
    #[error("volume sequence '{0}' has no frames")]
    EmptySequence(String),

    /// Rendering error.
    #[error("render error: {0}")]
    RenderError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for sparse-volume operations.
pub type Result<T> = std::result::Result<T, VolumeError>;
