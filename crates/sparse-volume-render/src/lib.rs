//! Rendering backend for sparse-volume.
//!
//! This crate provides the render-timeline side of volume rendering:
//! - GPU-resident voxel buffers and their deferred release
//! - the [`VolumeSceneProxy`] implementation of the proxy capability trait
//! - the per-frame [`VolumeRenderExtension`] and [`ResearchRenderExtension`]
//! - shader permutations, uniform layouts and the wgpu pipelines (WGSL)

// Internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod buffer;
pub mod collector;
pub mod error;
pub mod extension;
pub mod gpu;
pub mod release;
pub mod research;
pub mod scene_proxy;
pub mod shader;
pub mod slots;
pub mod uniforms;

pub use buffer::{
    pack_half_payload, BufferAllocator, BufferStorage, HostAllocator, RenderBuffer,
    RenderBufferPool, WgpuAllocator,
};
pub use collector::{DrawElement, FramePacket, FrameStats, MeshElementCollector, ViewPacket};
pub use error::{RenderError, RenderResult};
pub use extension::{ExtensionState, VisibilityPass, VolumeRenderExtension};
pub use gpu::{
    new_headless_device, request_headless_device, GpuContext, ViewTarget, VolumeRenderer,
};
pub use release::DeferredReleaseQueue;
pub use research::{ResearchDrawElement, ResearchFramePacket, ResearchRenderExtension};
pub use scene_proxy::VolumeSceneProxy;
pub use shader::{
    ShaderBuilder, ShaderDescriptor, ShaderPermutation, ShaderSourceMap, ShaderStageSource,
    UniformBlockLayout, SHADER_VIRTUAL_DIR,
};
pub use slots::ExtensionSlots;
pub use uniforms::{ResearchShaderParams, VolumeProxyUniforms, VolumeViewUniforms};
