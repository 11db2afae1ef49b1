//! sparse-volume: render sparse VDB volumes inside a real-time renderer.
//!
//! The crate keeps three concerns in step across two timelines:
//!
//! - the **scene proxy**, the render-timeline mirror of a volume,
//! - the **render buffer**, the GPU-visible voxel payload,
//! - the per-frame **render extension** that decides visibility, builds
//!   per-view parameters and emits ray-march draws.
//!
//! The simulation side owns [`VolumeComponent`]s and talks to the render
//! timeline only through a command queue. The render timeline is a
//! [`RenderScene`], driven directly or on its own [`RenderThread`].
//!
//! # Quick Start
//!
//! ```no_run
//! use sparse_volume::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!     startup_module(VolumeRenderOptions::default())?;
//!
//!     let (sender, receiver) = command_queue();
//!     let mut scene = RenderScene::from_module(receiver, host_allocator(64 << 20))?;
//!
//!     let mut volume = VolumeComponent::new(sender, ProxyDesc::default());
//!     volume.register()?;
//!     volume.upload_grid(VoxelPayload::from_f32(UVec3::ONE, &[1.0])?)?;
//!
//!     let view = SceneView::new(ViewId(0), Mat4::IDENTITY, Mat4::IDENTITY);
//!     scene.begin_frame();
//!     let frame = scene.render(&[view])?;
//!     scene.end_frame();
//!     println!("{} draws", frame.main.element_count());
//!
//!     drop(scene);
//!     shutdown_module();
//!     Ok(())
//! }
//! ```

pub mod component;
pub mod headless;
pub mod module;
pub mod render_thread;
pub mod scene;
pub mod sequence;
pub mod track;

use std::sync::Arc;

// Re-export core types
pub use sparse_volume_core::{
    command_queue, type_hash_of, CommandReceiver, CommandSender, DrawContext, Mat4, MaterialDesc,
    ProxyDesc, ProxyId, ProxyRegistry, RayMarchSteps, RenderBufferId, RenderCommand,
    RenderParameters, Result, SceneProxy, SceneView, ShadingMode, ShowFlags, UVec3, Vec3, Vec4,
    ViewId, ViewRelevance, VisibilitySet, VolumeError, VolumeMeshBatch, VolumePipeline,
    VolumeRenderOptions, VolumeTransform, VoxelFormat, VoxelPayload,
};

// Re-export render types
pub use sparse_volume_render::{
    pack_half_payload, BufferAllocator, DeferredReleaseQueue, DrawElement, ExtensionSlots,
    ExtensionState, FramePacket, FrameStats, HostAllocator, RenderBufferPool, RenderError,
    ResearchFramePacket, ResearchRenderExtension, ShaderPermutation, ShaderSourceMap, ViewTarget,
    VolumeRenderExtension, VolumeSceneProxy, WgpuAllocator,
};

pub use component::VolumeComponent;
pub use headless::HeadlessVolumeRenderer;
pub use module::{
    render_extension, research_render_extension, shutdown_module, startup_module,
    try_render_extension, try_research_render_extension, ModuleLifecycle,
};
pub use render_thread::{FrameRequest, RenderThread};
pub use scene::{RenderScene, SceneFrame};
pub use sequence::{sequence_default_transform, VolumeSequence};
pub use track::{SequenceTrackHandler, TrackHandlerRegistry, VolumeTrackHandler};

/// Initializes `env_logger` from `RUST_LOG`. Repeated calls are harmless.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Host-memory allocator with the given byte budget, for headless scenes.
#[must_use]
pub fn host_allocator(budget: u64) -> Arc<dyn BufferAllocator> {
    Arc::new(HostAllocator::new(budget))
}
