//! Experimental research extension.
//!
//! Runs alongside [`VolumeRenderExtension`](crate::extension::VolumeRenderExtension)
//! with its own proxy set, parameter block and single shader pair. The two
//! extensions share no mutable state.

use std::collections::BTreeSet;

use sparse_volume_core::{
    DrawContext, ProxyId, ProxyRegistry, RenderBufferId, SceneView, VolumeMeshBatch,
    DEFAULT_MAX_RAY_STEPS,
};

use crate::buffer::RenderBufferPool;
use crate::collector::FrameStats;
use crate::error::RenderResult;
use crate::extension::{run_visibility_pass, ExtensionLifecycle, ExtensionState, VisibilityPass};
use crate::shader::ShaderPermutation;
use crate::uniforms::ResearchShaderParams;

/// One research draw.
#[derive(Debug, Clone)]
pub struct ResearchDrawElement {
    /// Proxy drawn.
    pub proxy: ProxyId,
    /// Target view index.
    pub view_index: usize,
    /// Buffer sampled.
    pub render_buffer: RenderBufferId,
    /// Self-contained parameter block.
    pub params: ResearchShaderParams,
}

impl ResearchDrawElement {
    /// The research pipeline has a single permutation.
    pub const PERMUTATION: ShaderPermutation = ShaderPermutation::Research;
}

/// Output of one frame of the research extension.
#[derive(Debug, Clone, Default)]
pub struct ResearchFramePacket {
    /// Frame number.
    pub frame: u64,
    /// Views the frame was rendered for.
    pub views: Vec<SceneView>,
    /// Draws, grouped by view index.
    pub elements: Vec<ResearchDrawElement>,
    /// Counters.
    pub stats: FrameStats,
}

impl ResearchFramePacket {
    /// Draws targeting the view at `view_index`.
    pub fn elements_for_view(
        &self,
        view_index: usize,
    ) -> impl Iterator<Item = &ResearchDrawElement> + '_ {
        self.elements
            .iter()
            .filter(move |element| element.view_index == view_index)
    }
}

struct ResearchCollector<'a> {
    pool: &'a RenderBufferPool,
    views: &'a [SceneView],
    max_ray_steps: u32,
    elements: Vec<ResearchDrawElement>,
    skipped_missing_buffer: usize,
}

impl DrawContext for ResearchCollector<'_> {
    fn is_buffer_resident(&self, buffer: RenderBufferId) -> bool {
        self.pool.is_resident(buffer)
    }

    fn add_batch(&mut self, view_index: usize, batch: VolumeMeshBatch) {
        let Some(buffer) = self.pool.get(batch.render_buffer) else {
            self.skipped_missing_buffer += 1;
            return;
        };
        let Some(view) = self.views.get(view_index) else {
            log::warn!("{} emitted for unknown view index {view_index}", batch.proxy);
            return;
        };
        let params = ResearchShaderParams::from_batch(
            view,
            &batch,
            buffer.dims(),
            buffer.format(),
            self.max_ray_steps,
        );
        self.elements.push(ResearchDrawElement {
            proxy: batch.proxy,
            view_index,
            render_buffer: batch.render_buffer,
            params,
        });
    }

    fn note_missing_buffer(&mut self, _proxy: ProxyId, _buffer: Option<RenderBufferId>) {
        self.skipped_missing_buffer += 1;
    }
}

/// The research render extension.
#[derive(Debug)]
pub struct ResearchRenderExtension {
    lifecycle: ExtensionLifecycle,
    proxies: BTreeSet<ProxyId>,
    max_ray_steps: u32,
}

impl ResearchRenderExtension {
    const NAME: &'static str = "ResearchRenderExtension";

    /// Creates an uninitialized extension. Outside this crate extensions are
    /// only obtained through [`ExtensionSlots`](crate::slots::ExtensionSlots).
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: ExtensionLifecycle::new(Self::NAME),
            proxies: BTreeSet::new(),
            max_ray_steps: DEFAULT_MAX_RAY_STEPS,
        }
    }

    /// Sets the ray-march loop bound.
    #[must_use]
    pub(crate) fn with_max_ray_steps(mut self, max_ray_steps: u32) -> Self {
        self.max_ray_steps = max_ray_steps.max(1);
        self
    }

    /// Moves the extension to `Initialized`.
    pub(crate) fn init(&mut self) -> RenderResult<()> {
        self.lifecycle.init()
    }

    /// Tears the extension down. Idempotent.
    pub fn release(&mut self) {
        if self.lifecycle.release() {
            self.proxies.clear();
        }
    }

    /// Current state.
    pub fn state(&self) -> ExtensionState {
        self.lifecycle.state()
    }

    /// Number of times `init` succeeded.
    pub fn init_count(&self) -> u32 {
        self.lifecycle.init_count()
    }

    /// Registers a proxy. Returns false if already known.
    pub fn add_proxy(&mut self, id: ProxyId) -> bool {
        self.proxies.insert(id)
    }

    /// Unregisters a proxy. Returns false if unknown.
    pub fn remove_proxy(&mut self, id: ProxyId) -> bool {
        self.proxies.remove(&id)
    }

    /// Returns true if the proxy is registered.
    pub fn contains_proxy(&self, id: ProxyId) -> bool {
        self.proxies.contains(&id)
    }

    /// Number of registered proxies.
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Pre-render hook, same contract as the main extension.
    pub fn pre_render(
        &mut self,
        registry: &mut ProxyRegistry,
        views: &[SceneView],
        frame: u64,
    ) -> RenderResult<VisibilityPass> {
        self.lifecycle
            .transition(ExtensionState::Initialized, ExtensionState::Active)?;
        Ok(run_visibility_pass(
            Self::NAME,
            registry,
            &self.proxies,
            views,
            frame,
        ))
    }

    /// Builds one self-contained parameter block per visible proxy per view.
    pub fn render_views(
        &mut self,
        registry: &ProxyRegistry,
        pool: &RenderBufferPool,
        views: &[SceneView],
        pass: &VisibilityPass,
    ) -> RenderResult<ResearchFramePacket> {
        self.lifecycle
            .transition(ExtensionState::Active, ExtensionState::Initialized)?;

        let views = &views[..pass.view_count.min(views.len())];
        let mut collector = ResearchCollector {
            pool,
            views,
            max_ray_steps: self.max_ray_steps,
            elements: Vec::new(),
            skipped_missing_buffer: 0,
        };
        for (id, map) in &pass.visible {
            if let Some(proxy) = registry.get(*id) {
                proxy.collect_draw_elements(views, *map, &mut collector);
            }
        }

        let mut elements = collector.elements;
        elements.sort_by_key(|e| e.view_index);
        Ok(ResearchFramePacket {
            frame: pass.frame,
            views: views.to_vec(),
            stats: FrameStats {
                proxies: pass.proxies,
                visible_proxies: pass.visible.len(),
                draw_elements: elements.len(),
                skipped_missing_buffer: collector.skipped_missing_buffer,
            },
            elements,
        })
    }

    /// Runs both hooks for one frame.
    pub fn render_frame(
        &mut self,
        registry: &mut ProxyRegistry,
        pool: &RenderBufferPool,
        views: &[SceneView],
        frame: u64,
    ) -> RenderResult<ResearchFramePacket> {
        let pass = self.pre_render(registry, views, frame)?;
        self.render_views(registry, pool, views, &pass)
    }
}
