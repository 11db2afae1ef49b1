//! Draw-element collection for one frame.

use sparse_volume_core::{
    DrawContext, ProxyId, RenderBufferId, SceneView, VolumeMeshBatch, DEFAULT_MAX_RAY_STEPS,
};

use crate::buffer::RenderBufferPool;
use crate::shader::ShaderPermutation;
use crate::uniforms::{VolumeProxyUniforms, VolumeViewUniforms};

/// One ray-march draw of a proxy into a view.
#[derive(Debug, Clone)]
pub struct DrawElement {
    /// Proxy drawn.
    pub proxy: ProxyId,
    /// Index of the target view in the frame's view list.
    pub view_index: usize,
    /// Pipeline variant.
    pub permutation: ShaderPermutation,
    /// Buffer sampled.
    pub render_buffer: RenderBufferId,
    /// Per-volume uniform block.
    pub uniforms: VolumeProxyUniforms,
}

/// Everything drawn into one view.
#[derive(Debug, Clone)]
pub struct ViewPacket {
    /// The view.
    pub view: SceneView,
    /// Shared per-view block, built once before any element.
    pub uniforms: VolumeViewUniforms,
    /// Draws into this view.
    pub elements: Vec<DrawElement>,
}

/// Counters for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Registered proxies.
    pub proxies: usize,
    /// Proxies relevant to at least one view.
    pub visible_proxies: usize,
    /// Emitted draw elements.
    pub draw_elements: usize,
    /// Proxies skipped because their buffer was absent or not resident.
    pub skipped_missing_buffer: usize,
}

/// Output of one frame of the main extension.
#[derive(Debug, Clone, Default)]
pub struct FramePacket {
    /// Frame number.
    pub frame: u64,
    /// Per-view output, in view order.
    pub views: Vec<ViewPacket>,
    /// Counters.
    pub stats: FrameStats,
}

impl FramePacket {
    /// Iterates over every draw element of the frame.
    pub fn elements(&self) -> impl Iterator<Item = &DrawElement> {
        self.views.iter().flat_map(|v| v.elements.iter())
    }

    /// Total number of draw elements.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.views.iter().map(|v| v.elements.len()).sum()
    }
}

/// Turns proxy batches into draw elements for the main extension.
pub struct MeshElementCollector<'a> {
    pool: &'a RenderBufferPool,
    views: &'a mut [ViewPacket],
    max_ray_steps: u32,
    skipped_missing_buffer: usize,
}

impl<'a> MeshElementCollector<'a> {
    /// Creates a collector writing into `views`, resolving buffers in `pool`.
    pub fn new(pool: &'a RenderBufferPool, views: &'a mut [ViewPacket]) -> Self {
        Self {
            pool,
            views,
            max_ray_steps: DEFAULT_MAX_RAY_STEPS,
            skipped_missing_buffer: 0,
        }
    }

    /// Sets the ray-march loop bound.
    #[must_use]
    pub fn with_max_ray_steps(mut self, max_ray_steps: u32) -> Self {
        self.max_ray_steps = max_ray_steps;
        self
    }

    /// Number of proxies skipped for a missing buffer so far.
    pub fn skipped_missing_buffer(&self) -> usize {
        self.skipped_missing_buffer
    }
}

impl DrawContext for MeshElementCollector<'_> {
    fn is_buffer_resident(&self, buffer: RenderBufferId) -> bool {
        self.pool.is_resident(buffer)
    }

    fn add_batch(&mut self, view_index: usize, batch: VolumeMeshBatch) {
        let Some(buffer) = self.pool.get(batch.render_buffer) else {
            self.skipped_missing_buffer += 1;
            return;
        };
        let Some(packet) = self.views.get_mut(view_index) else {
            log::warn!("{} emitted for unknown view index {view_index}", batch.proxy);
            return;
        };
        let uniforms = VolumeProxyUniforms::from_batch(
            &batch,
            buffer.dims(),
            buffer.format(),
            self.max_ray_steps,
        );
        packet.elements.push(DrawElement {
            proxy: batch.proxy,
            view_index,
            permutation: ShaderPermutation::for_mode(batch.params.mode()),
            render_buffer: batch.render_buffer,
            uniforms,
        });
    }

    fn note_missing_buffer(&mut self, _proxy: ProxyId, _buffer: Option<RenderBufferId>) {
        self.skipped_missing_buffer += 1;
    }
}
