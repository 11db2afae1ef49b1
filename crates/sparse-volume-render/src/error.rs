//! Rendering error types.

use sparse_volume_core::VolumeError;
use thiserror::Error;

use crate::extension::ExtensionState;

/// Errors that can occur during rendering operations.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Failed to create wgpu adapter.
    #[error("failed to create graphics adapter")]
    AdapterCreationFailed,

    /// Failed to create wgpu device.
    #[error("failed to create graphics device: {0}")]
    DeviceCreationFailed(#[from] wgpu::RequestDeviceError),

    /// Shader source could not be resolved or compiled.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),

    /// Buffer creation failed.
    #[error("buffer creation failed: {0}")]
    BufferCreationFailed(String),

    /// The allocator ran out of memory.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory {
        /// Bytes requested by the failed allocation.
        requested: u64,
    },

    /// A render extension hook was called in the wrong state.
    #[error("render extension '{extension}' is {actual:?}, expected {expected:?}")]
    ExtensionState {
        /// Extension name.
        extension: &'static str,
        /// State required by the hook.
        expected: ExtensionState,
        /// State the extension was in.
        actual: ExtensionState,
    },
}

/// A specialized Result type for rendering operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

impl From<RenderError> for VolumeError {
    fn from(err: RenderError) -> Self {
        VolumeError::RenderError(err.to_string())
    }
}
