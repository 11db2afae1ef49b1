//! Per-frame render extension for sparse volumes.
//!
//! The extension is the single per-frame entry point for every standard
//! volume proxy. One frame runs in two hooks:
//!
//! 1. [`VolumeRenderExtension::pre_render`] resets visibility on every known
//!    proxy, then evaluates relevance per proxy per view.
//! 2. [`VolumeRenderExtension::render_views`] builds each view's uniform
//!    block once and collects draw elements from the visible proxies.
//!
//! Nothing computed in one frame is carried into the next.

use std::collections::BTreeSet;

use sparse_volume_core::{ProxyId, ProxyRegistry, SceneView, DEFAULT_MAX_RAY_STEPS};

use crate::buffer::RenderBufferPool;
use crate::collector::{FramePacket, FrameStats, MeshElementCollector, ViewPacket};
use crate::error::{RenderError, RenderResult};
use crate::uniforms::VolumeViewUniforms;

/// Lifecycle of a render extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    /// Constructed, `init` not yet called.
    Uninitialized,
    /// Ready to run a frame.
    Initialized,
    /// Between `pre_render` and `render_views` of a frame.
    Active,
    /// Torn down; every hook is rejected.
    Released,
}

/// State machine shared in shape by both extensions.
#[derive(Debug)]
pub(crate) struct ExtensionLifecycle {
    name: &'static str,
    state: ExtensionState,
    init_count: u32,
}

impl ExtensionLifecycle {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: ExtensionState::Uninitialized,
            init_count: 0,
        }
    }

    pub(crate) fn state(&self) -> ExtensionState {
        self.state
    }

    pub(crate) fn init_count(&self) -> u32 {
        self.init_count
    }

    pub(crate) fn expect(&self, expected: ExtensionState) -> RenderResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::ExtensionState {
                extension: self.name,
                expected,
                actual: self.state,
            })
        }
    }

    pub(crate) fn init(&mut self) -> RenderResult<()> {
        self.expect(ExtensionState::Uninitialized)?;
        self.state = ExtensionState::Initialized;
        self.init_count += 1;
        log::info!("{} initialized", self.name);
        Ok(())
    }

    pub(crate) fn transition(
        &mut self,
        from: ExtensionState,
        to: ExtensionState,
    ) -> RenderResult<()> {
        self.expect(from)?;
        self.state = to;
        Ok(())
    }

    /// Returns false if already released.
    pub(crate) fn release(&mut self) -> bool {
        if self.state == ExtensionState::Released {
            return false;
        }
        self.state = ExtensionState::Released;
        log::info!("{} released", self.name);
        true
    }
}

/// Result of a frame's visibility pass.
#[derive(Debug, Clone, Default)]
pub struct VisibilityPass {
    /// Frame the pass ran for.
    pub frame: u64,
    /// Views evaluated, at most 32.
    pub view_count: usize,
    /// Known proxies evaluated.
    pub proxies: usize,
    /// Proxies relevant to at least one view, with one bit per view index.
    pub visible: Vec<(ProxyId, u32)>,
}

impl VisibilityPass {
    /// Returns the visibility map of `proxy`, 0 when not drawn.
    #[must_use]
    pub fn visibility_map(&self, proxy: ProxyId) -> u32 {
        self.visible
            .iter()
            .find(|(id, _)| *id == proxy)
            .map_or(0, |(_, map)| *map)
    }
}

/// Resets then evaluates every known proxy against every view.
///
/// All resets complete before the first relevance evaluation.
pub(crate) fn run_visibility_pass(
    name: &str,
    registry: &mut ProxyRegistry,
    known: &BTreeSet<ProxyId>,
    views: &[SceneView],
    frame: u64,
) -> VisibilityPass {
    let max_views = u32::BITS as usize;
    if views.len() > max_views {
        log::warn!(
            "{name}: {} views in frame {frame}, only the first {max_views} are drawn",
            views.len()
        );
    }
    let views = &views[..views.len().min(max_views)];

    for id in known {
        if let Some(proxy) = registry.get_mut(*id) {
            proxy.reset_visibility(frame);
        }
    }

    let mut visible = Vec::new();
    for id in known {
        let Some(proxy) = registry.get_mut(*id) else {
            continue;
        };
        let mut map = 0u32;
        for (view_index, view) in views.iter().enumerate() {
            if proxy.compute_view_relevance(view, frame).is_relevant() {
                map |= 1 << view_index;
            }
        }
        if map != 0 {
            visible.push((*id, map));
        }
    }

    VisibilityPass {
        frame,
        view_count: views.len(),
        proxies: known.len(),
        visible,
    }
}

/// The main volume render extension (level-set and fog-volume permutations).
#[derive(Debug)]
pub struct VolumeRenderExtension {
    lifecycle: ExtensionLifecycle,
    proxies: BTreeSet<ProxyId>,
    max_ray_steps: u32,
    frames_rendered: u64,
}

impl VolumeRenderExtension {
    const NAME: &'static str = "VolumeRenderExtension";

    /// Creates an uninitialized extension. Outside this crate extensions are
    /// only obtained through [`ExtensionSlots`](crate::slots::ExtensionSlots).
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: ExtensionLifecycle::new(Self::NAME),
            proxies: BTreeSet::new(),
            max_ray_steps: DEFAULT_MAX_RAY_STEPS,
            frames_rendered: 0,
        }
    }

    /// Sets the ray-march loop bound written into proxy uniforms.
    #[must_use]
    pub(crate) fn with_max_ray_steps(mut self, max_ray_steps: u32) -> Self {
        self.max_ray_steps = max_ray_steps.max(1);
        self
    }

    /// Moves the extension to `Initialized`.
    pub(crate) fn init(&mut self) -> RenderResult<()> {
        self.lifecycle.init()
    }

    /// Tears the extension down and forgets every proxy. Idempotent.
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

    /// Frames completed since init.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Ray-march loop bound.
    pub fn max_ray_steps(&self) -> u32 {
        self.max_ray_steps
    }

    /// Registers a proxy created on the render timeline. Returns false if already known.
    pub fn add_proxy(&mut self, id: ProxyId) -> bool {
        self.proxies.insert(id)
    }

    /// Unregisters a destroyed proxy. Returns false if unknown.
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

    /// Pre-render hook: visibility reset then relevance for `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ExtensionState`] unless the extension is
    /// `Initialized`.
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

    /// Render hook: per-view parameter build, then draw-element collection.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ExtensionState`] unless `pre_render` ran first.
    pub fn render_views(
        &mut self,
        registry: &ProxyRegistry,
        pool: &RenderBufferPool,
        views: &[SceneView],
        pass: &VisibilityPass,
    ) -> RenderResult<FramePacket> {
        self.lifecycle
            .transition(ExtensionState::Active, ExtensionState::Initialized)?;

        let views = &views[..pass.view_count.min(views.len())];
        let mut packets: Vec<ViewPacket> = views
            .iter()
            .map(|view| ViewPacket {
                uniforms: VolumeViewUniforms::from_view(view),
                view: view.clone(),
                elements: Vec::new(),
            })
            .collect();

        let mut collector =
            MeshElementCollector::new(pool, &mut packets).with_max_ray_steps(self.max_ray_steps);
        for (id, map) in &pass.visible {
            if let Some(proxy) = registry.get(*id) {
                proxy.collect_draw_elements(views, *map, &mut collector);
            }
        }
        let skipped_missing_buffer = collector.skipped_missing_buffer();

        let draw_elements = packets.iter().map(|p| p.elements.len()).sum();
        self.frames_rendered += 1;
        Ok(FramePacket {
            frame: pass.frame,
            views: packets,
            stats: FrameStats {
                proxies: pass.proxies,
                visible_proxies: pass.visible.len(),
                draw_elements,
                skipped_missing_buffer,
            },
        })
    }

    /// Runs both hooks for one frame.
    pub fn render_frame(
        &mut self,
        registry: &mut ProxyRegistry,
        pool: &RenderBufferPool,
        views: &[SceneView],
        frame: u64,
    ) -> RenderResult<FramePacket> {
        let pass = self.pre_render(registry, views, frame)?;
        self.render_views(registry, pool, views, &pass)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::{Mat4, UVec3, Vec3};
    use sparse_volume_core::{
        MaterialDesc, ProxyDesc, RenderBufferId, RenderParameters, SceneProxy, ShadingMode,
        ShowFlags, ViewId, VolumeTransform, VoxelPayload,
    };

    use super::*;
    use crate::buffer::{BufferAllocator, HostAllocator};
    use crate::scene_proxy::VolumeSceneProxy;
    use crate::shader::ShaderPermutation;

    fn view(id: u32) -> SceneView {
        SceneView::new(
            ViewId(id),
            Mat4::look_at_rh(Vec3::new(4.0, 4.0, 40.0), Vec3::splat(4.0), Vec3::Y),
            Mat4::perspective_rh(1.0, 1.0, 0.1, 1000.0),
        )
    }

    fn setup(mode: ShadingMode) -> (ProxyRegistry, RenderBufferPool, ProxyId, RenderBufferId) {
        let alloc: Arc<dyn BufferAllocator> = Arc::new(HostAllocator::new(1 << 20));
        let mut pool = RenderBufferPool::new(alloc);
        let buffer = RenderBufferId::next();
        let payload = VoxelPayload::from_f32(UVec3::splat(8), &[0.25; 512]).unwrap();
        pool.create_from_payload(buffer, &payload).unwrap();

        let id = ProxyId::next();
        let mut registry = ProxyRegistry::new();
        registry
            .register(Box::new(VolumeSceneProxy::new(
                id,
                ProxyDesc {
                    transform: VolumeTransform::from_dims(UVec3::splat(8)),
                    params: RenderParameters::new(1.0, 0.5, mode, MaterialDesc::default())
                        .unwrap(),
                    render_buffer: Some(buffer),
                    ..ProxyDesc::default()
                },
            )))
            .unwrap();
        (registry, pool, id, buffer)
    }

    #[test]
    fn test_state_machine() {
        let mut ext = VolumeRenderExtension::new();
        assert_eq!(ext.state(), ExtensionState::Uninitialized);
        ext.init().unwrap();
        assert!(ext.init().is_err());
        assert_eq!(ext.init_count(), 1);

        let mut registry = ProxyRegistry::new();
        let pass = ext.pre_render(&mut registry, &[view(0)], 1).unwrap();
        assert_eq!(ext.state(), ExtensionState::Active);
        assert!(ext.pre_render(&mut registry, &[view(0)], 1).is_err());

        let alloc: Arc<dyn BufferAllocator> = Arc::new(HostAllocator::new(0));
        let pool = RenderBufferPool::new(alloc);
        ext.render_views(&registry, &pool, &[view(0)], &pass).unwrap();
        assert_eq!(ext.state(), ExtensionState::Initialized);

        ext.release();
        ext.release();
        assert_eq!(ext.state(), ExtensionState::Released);
        let err = ext.render_frame(&mut registry, &pool, &[view(0)], 2).unwrap_err();
        assert!(matches!(
            err,
            RenderError::ExtensionState {
                actual: ExtensionState::Released,
                ..
            }
        ));
    }

    #[test]
    fn test_frame_before_init_is_rejected() {
        let mut ext = VolumeRenderExtension::new();
        let mut registry = ProxyRegistry::new();
        assert!(ext.pre_render(&mut registry, &[], 0).is_err());
    }

    #[test]
    fn test_fog_volume_frame_emits_one_element() {
        let (mut registry, pool, id, buffer) = setup(ShadingMode::FogVolume);
        let mut ext = VolumeRenderExtension::new();
        ext.init().unwrap();
        ext.add_proxy(id);

        let packet = ext.render_frame(&mut registry, &pool, &[view(0)], 1).unwrap();
        assert_eq!(packet.element_count(), 1);
        let element = packet.elements().next().unwrap();
        assert_eq!(element.permutation, ShaderPermutation::FogVolume);
        assert_eq!(element.render_buffer, buffer);
        assert_eq!(element.uniforms.step_multiplier, 0.5);
        assert_eq!(element.uniforms.density_multiplier, 1.0);
        assert_eq!(packet.stats.visible_proxies, 1);
        assert_eq!(ext.frames_rendered(), 1);
    }

    #[test]
    fn test_level_set_selects_level_set_permutation() {
        let (mut registry, pool, id, _) = setup(ShadingMode::LevelSet);
        let mut ext = VolumeRenderExtension::new();
        ext.init().unwrap();
        ext.add_proxy(id);
        let packet = ext.render_frame(&mut registry, &pool, &[view(0)], 1).unwrap();
        assert_eq!(
            packet.elements().next().unwrap().permutation,
            ShaderPermutation::LevelSet
        );
    }

    #[test]
    fn test_unregistered_proxy_is_not_drawn() {
        let (mut registry, pool, _, _) = setup(ShadingMode::FogVolume);
        let mut ext = VolumeRenderExtension::new();
        ext.init().unwrap();
        let packet = ext.render_frame(&mut registry, &pool, &[view(0)], 1).unwrap();
        assert_eq!(packet.element_count(), 0);
        assert_eq!(packet.stats.proxies, 0);
    }

    #[test]
    fn test_one_view_uniform_block_per_view() {
        let (mut registry, pool, id, _) = setup(ShadingMode::FogVolume);
        let mut ext = VolumeRenderExtension::new();
        ext.init().unwrap();
        ext.add_proxy(id);
        let hidden = view(1).with_show_flags(ShowFlags {
            volumes: false,
            ..ShowFlags::default()
        });
        let packet = ext
            .render_frame(&mut registry, &pool, &[view(0), hidden, view(2)], 4)
            .unwrap();
        assert_eq!(packet.views.len(), 3);
        assert_eq!(packet.views[0].elements.len(), 1);
        assert!(packet.views[1].elements.is_empty());
        assert_eq!(packet.views[2].elements.len(), 1);
        assert_eq!(packet.views[2].elements[0].view_index, 2);
    }

    #[test]
    fn test_visibility_reset_every_frame() {
        let (mut registry, pool, id, _) = setup(ShadingMode::FogVolume);
        let mut ext = VolumeRenderExtension::new();
        ext.init().unwrap();
        ext.add_proxy(id);
        ext.render_frame(&mut registry, &pool, &[view(0)], 1).unwrap();
        assert!(registry.get(id).unwrap().is_visible(ViewId(0)));

        ext.render_frame(&mut registry, &pool, &[view(5)], 2).unwrap();
        let proxy = registry.get(id).unwrap();
        assert!(!proxy.is_visible(ViewId(0)));
        assert!(proxy.is_visible(ViewId(5)));
    }

    #[test]
    fn test_missing_buffer_is_counted_not_drawn() {
        let (mut registry, pool, id, _) = setup(ShadingMode::FogVolume);
        let t = VolumeTransform::from_dims(UVec3::splat(8));
        registry.get_mut(id).unwrap().update(t, None);
        let mut ext = VolumeRenderExtension::new();
        ext.init().unwrap();
        ext.add_proxy(id);
        let packet = ext.render_frame(&mut registry, &pool, &[view(0)], 1).unwrap();
        assert_eq!(packet.element_count(), 0);
        assert_eq!(packet.stats.skipped_missing_buffer, 1);
    }
}
