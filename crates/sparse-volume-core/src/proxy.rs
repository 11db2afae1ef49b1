//! Scene proxy capability trait and related types.
//!
//! A [`SceneProxy`] is the render-timeline mirror of a simulation-side volume.
//! It lives on the render timeline only; the simulation side refers to it by
//! [`ProxyId`] and changes it through queued render commands.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3};

use crate::params::RenderParameters;
use crate::transform::VolumeTransform;
use crate::view::{SceneView, ViewRelevance};
use crate::voxel::RenderBufferId;

/// Identifier of a proxy on the render timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(pub u64);

impl ProxyId {
    /// Mints a fresh id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ProxyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proxy#{}", self.0)
    }
}

/// Which render extension draws a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VolumePipeline {
    /// Level-set / fog-volume ray marcher.
    #[default]
    Standard,
    /// Experimental research pipeline.
    Research,
}

/// Everything needed to create a proxy on the render timeline.
#[derive(Debug, Clone, Default)]
pub struct ProxyDesc {
    /// Grid placement in local space.
    pub transform: VolumeTransform,
    /// Shading inputs.
    pub params: RenderParameters,
    /// Object-to-world matrix.
    pub local_to_world: Mat4,
    /// Buffer to draw, if already minted.
    pub render_buffer: Option<RenderBufferId>,
    /// Hidden proxies are drawn only in views showing hidden objects.
    pub hidden_in_game: bool,
    /// Extension that draws the proxy.
    pub pipeline: VolumePipeline,
}

/// One draw of a proxy into one view, in engine-agnostic form.
#[derive(Debug, Clone)]
pub struct VolumeMeshBatch {
    /// Proxy that emitted the batch.
    pub proxy: ProxyId,
    /// Grid placement.
    pub transform: VolumeTransform,
    /// Object-to-world matrix.
    pub local_to_world: Mat4,
    /// Shading inputs.
    pub params: RenderParameters,
    /// Buffer sampled by the ray marcher.
    pub render_buffer: RenderBufferId,
}

/// Sink for draw batches, implemented by the render backend.
pub trait DrawContext {
    /// Returns true if the buffer is allocated and may be sampled this frame.
    fn is_buffer_resident(&self, buffer: RenderBufferId) -> bool;

    /// Adds a batch for the view at `view_index` of the frame's view list.
    fn add_batch(&mut self, view_index: usize, batch: VolumeMeshBatch);

    /// Notes a proxy that skipped emission because its buffer is not ready.
    fn note_missing_buffer(&mut self, _proxy: ProxyId, _buffer: Option<RenderBufferId>) {}
}

/// Render-timeline capability interface of a volume proxy.
pub trait SceneProxy: Send {
    /// Stable identity of the concrete proxy kind, used to batch and sort.
    fn type_hash(&self) -> u64;

    /// Returns the proxy id.
    fn id(&self) -> ProxyId;

    /// Returns the extension that draws this proxy.
    fn pipeline(&self) -> VolumePipeline;

    /// Replaces the transform and current buffer.
    ///
    /// Returns the previously referenced buffer if it differs from the new one
    /// so the caller can schedule its deferred release.
    fn update(
        &mut self,
        transform: VolumeTransform,
        render_buffer: Option<RenderBufferId>,
    ) -> Option<RenderBufferId>;

    /// Returns the buffer currently drawn, if any.
    fn render_resource(&self) -> Option<RenderBufferId>;

    /// Moves the proxy in the world.
    fn set_local_to_world(&mut self, local_to_world: Mat4);

    /// Marks the proxy hidden in game.
    fn set_hidden(&mut self, hidden: bool);

    /// Clears per-view visibility for `frame`.
    fn reset_visibility(&mut self, frame: u64);

    /// Returns true if the proxy was found visible in `view` this frame.
    fn is_visible(&self, view: crate::view::ViewId) -> bool;

    /// Decides whether the proxy is drawn in `view` and records the view when it is.
    fn compute_view_relevance(&mut self, view: &SceneView, frame: u64) -> ViewRelevance;

    /// Emits one batch per view whose bit is set in `visibility_map`.
    fn collect_draw_elements(
        &self,
        views: &[SceneView],
        visibility_map: u32,
        ctx: &mut dyn DrawContext,
    );

    /// World-space bounds as `(min, max)`.
    fn world_bounds(&self) -> (Vec3, Vec3);

    /// Bytes used by the proxy and its allocations.
    fn memory_footprint(&self) -> usize;
}

/// FNV-1a hash of a type name, usable in const context.
#[must_use]
pub const fn type_hash_of(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}
