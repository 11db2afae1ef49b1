//! The render timeline.
//!
//! A [`RenderScene`] owns every proxy and render buffer. It is driven one
//! frame at a time:
//!
//! 1. [`RenderScene::begin_frame`] advances the frame counter, destroys
//!    resources whose in-flight frames have completed, then applies the
//!    commands queued by the simulation side.
//! 2. [`RenderScene::render`] runs both extensions for the frame's views.
//! 3. [`RenderScene::end_frame`] closes the frame.
//!
//! Commands applied in `begin_frame(F)` are stamped with frame `F`. A buffer
//! superseded in frame `F` is destroyed at the start of frame
//! `F + frames_in_flight` at the earliest.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::ThreadId;

use sparse_volume_core::SceneProxy;
use sparse_volume_render::{
    BufferAllocator, DeferredReleaseQueue, FramePacket, RenderBufferPool, ResearchFramePacket,
    ResearchRenderExtension, VolumeRenderExtension, VolumeSceneProxy,
};

use crate::module::{try_with_module, ModuleLifecycle};
use crate::{
    CommandReceiver, ProxyId, ProxyRegistry, RenderBufferId, RenderCommand, Result, SceneView,
    VolumeError, VolumePipeline, VolumeRenderOptions,
};

/// Output of one rendered frame.
#[derive(Debug, Clone, Default)]
pub struct SceneFrame {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Draws of the standard extension.
    pub main: FramePacket,
    /// Draws of the research extension.
    pub research: ResearchFramePacket,
}

impl SceneFrame {
    /// Total draws across both extensions.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.main.element_count() + self.research.elements.len()
    }

    /// Proxies skipped because their buffer was not resident.
    #[must_use]
    pub fn skipped_missing_buffer(&self) -> usize {
        self.main.stats.skipped_missing_buffer + self.research.stats.skipped_missing_buffer
    }
}

/// Render-timeline owner of proxies and buffers.
pub struct RenderScene {
    receiver: CommandReceiver,
    registry: ProxyRegistry,
    pool: RenderBufferPool,
    buffer_release: DeferredReleaseQueue<RenderBufferId>,
    proxy_release: DeferredReleaseQueue<ProxyId>,
    graveyard: HashMap<ProxyId, Box<dyn SceneProxy>>,
    extension: Arc<RwLock<VolumeRenderExtension>>,
    research: Arc<RwLock<ResearchRenderExtension>>,
    options: VolumeRenderOptions,
    frame: u64,
    in_frame: bool,
    owner: Option<ThreadId>,
}

impl RenderScene {
    /// Creates a scene drawing through the extensions owned by `module`.
    ///
    /// The module creates them on first use; scenes built from the same
    /// module share them. Keep the module alive for as long as the scene
    /// renders: shutting it down releases the extensions.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotInitialized`] unless `module` is started.
    pub fn with_module(
        receiver: CommandReceiver,
        allocator: Arc<dyn BufferAllocator>,
        module: &mut ModuleLifecycle,
    ) -> Result<Self> {
        let extension = module.get_or_create_render_extension()?;
        let research = module.get_or_create_research_extension()?;
        Ok(Self::assemble(
            receiver,
            allocator,
            module.options().clone(),
            extension,
            research,
        ))
    }

    /// Creates a scene drawing through the process-wide module's extensions.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotInitialized`] before `startup_module`.
    pub fn from_module(
        receiver: CommandReceiver,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        try_with_module(|module| Self::with_module(receiver, allocator, module))?
    }

    fn assemble(
        receiver: CommandReceiver,
        allocator: Arc<dyn BufferAllocator>,
        options: VolumeRenderOptions,
        extension: Arc<RwLock<VolumeRenderExtension>>,
        research: Arc<RwLock<ResearchRenderExtension>>,
    ) -> Self {
        Self {
            receiver,
            registry: ProxyRegistry::new(),
            pool: RenderBufferPool::new(allocator),
            buffer_release: DeferredReleaseQueue::new(options.frames_in_flight),
            proxy_release: DeferredReleaseQueue::new(options.frames_in_flight),
            graveyard: HashMap::new(),
            extension,
            research,
            options,
            frame: 0,
            in_frame: false,
            owner: None,
        }
    }

    /// Starts a frame and returns its number.
    ///
    /// Releases whatever the completed frames no longer need, then applies
    /// every queued command.
    pub fn begin_frame(&mut self) -> u64 {
        self.check_owner();
        if self.in_frame {
            log::warn!("begin_frame({}) without end_frame", self.frame + 1);
        }
        self.frame += 1;
        self.in_frame = true;

        for id in self.buffer_release.drain_ready(self.frame) {
            if self.registry.is_buffer_referenced(id, None) {
                continue;
            }
            if self.pool.destroy(id) {
                log::debug!("released {id} at frame {}", self.frame);
            }
        }
        for id in self.proxy_release.drain_ready(self.frame) {
            self.graveyard.remove(&id);
        }

        for command in self.receiver.drain() {
            log::trace!("frame {}: {}", self.frame, command.name());
            self.apply(command);
        }
        self.frame
    }

    /// Runs both extensions for `views` in the current frame.
    ///
    /// # Errors
    ///
    /// Fails outside `begin_frame`/`end_frame` or when an extension has been
    /// released.
    pub fn render(&mut self, views: &[SceneView]) -> Result<SceneFrame> {
        self.check_owner();
        if !self.in_frame {
            return Err(VolumeError::RenderError(
                "render called outside begin_frame/end_frame".to_string(),
            ));
        }

        let main = self
            .extension
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .render_frame(&mut self.registry, &self.pool, views, self.frame)?;
        let research = self
            .research
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .render_frame(&mut self.registry, &self.pool, views, self.frame)?;

        Ok(SceneFrame {
            frame: self.frame,
            main,
            research,
        })
    }

    /// Marks the frame's submissions complete.
    pub fn end_frame(&mut self) {
        self.check_owner();
        if !self.in_frame {
            log::warn!("end_frame without begin_frame");
        }
        self.in_frame = false;
    }

    /// Runs `begin_frame`, `render` and `end_frame`.
    pub fn render_frame(&mut self, views: &[SceneView]) -> Result<SceneFrame> {
        self.begin_frame();
        let frame = self.render(views);
        self.end_frame();
        frame
    }

    /// Destroys every proxy and buffer immediately.
    ///
    /// Only valid once the GPU has finished all submitted frames.
    pub fn teardown(&mut self) {
        let proxies = self.registry.drain();
        {
            let mut extension = self
                .extension
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let mut research = self
                .research
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for proxy in &proxies {
                extension.remove_proxy(proxy.id());
                research.remove_proxy(proxy.id());
            }
        }
        self.graveyard.clear();
        self.proxy_release.drain_all();
        self.buffer_release.drain_all();
        if !self.pool.is_empty() || !proxies.is_empty() {
            log::debug!(
                "render scene teardown: {} proxies, {} buffers",
                proxies.len(),
                self.pool.len()
            );
        }
        self.pool.clear();
    }

    fn apply(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::CreateBuffer { id, payload } => {
                self.buffer_release.cancel(&id);
                if let Err(err) = self.pool.create_from_payload(id, &payload) {
                    log::warn!("{id} left unresident: {err}");
                }
            }
            RenderCommand::ReleaseBuffer { id } => self.retire_buffer(id),
            RenderCommand::AddProxy { id, desc } => {
                let pipeline = desc.pipeline;
                if let Some(buffer) = desc.render_buffer {
                    self.buffer_release.cancel(&buffer);
                }
                let proxy = VolumeSceneProxy::new(id, desc)
                    .with_default_max_draw_distance(self.options.default_max_draw_distance);
                if let Err(err) = self.registry.register(Box::new(proxy)) {
                    log::warn!("AddProxy ignored: {err}");
                    return;
                }
                match pipeline {
                    VolumePipeline::Standard => {
                        self.extension
                            .write()
                            .unwrap_or_else(PoisonError::into_inner)
                            .add_proxy(id);
                    }
                    VolumePipeline::Research => {
                        self.research
                            .write()
                            .unwrap_or_else(PoisonError::into_inner)
                            .add_proxy(id);
                    }
                }
            }
            RenderCommand::UpdateProxy {
                id,
                transform,
                render_buffer,
            } => {
                let Some(proxy) = self.registry.get_mut(id) else {
                    log::debug!("UpdateProxy for unknown {id}");
                    return;
                };
                let previous = proxy.update(transform, render_buffer);
                if let Some(buffer) = render_buffer {
                    self.buffer_release.cancel(&buffer);
                }
                if let Some(previous) = previous {
                    self.retire_buffer(previous);
                }
            }
            RenderCommand::UpdateProxyTransform { id, local_to_world } => {
                if let Some(proxy) = self.registry.get_mut(id) {
                    proxy.set_local_to_world(local_to_world);
                }
            }
            RenderCommand::SetProxyHidden { id, hidden } => {
                if let Some(proxy) = self.registry.get_mut(id) {
                    proxy.set_hidden(hidden);
                }
            }
            RenderCommand::RemoveProxy { id } => {
                let Some(proxy) = self.registry.remove(id) else {
                    log::debug!("RemoveProxy for unknown {id}");
                    return;
                };
                self.extension
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove_proxy(id);
                self.research
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove_proxy(id);
                if let Some(buffer) = proxy.render_resource() {
                    self.retire_buffer(buffer);
                }
                self.graveyard.insert(id, proxy);
                self.proxy_release.retire(id, self.frame);
            }
        }
    }

    fn retire_buffer(&mut self, id: RenderBufferId) {
        if self.registry.is_buffer_referenced(id, None) {
            log::trace!("{id} still drawn by another proxy");
            return;
        }
        if self.buffer_release.retire(id, self.frame) {
            log::debug!("retired {id} at frame {}", self.frame);
        }
    }

    fn check_owner(&mut self) {
        let current = std::thread::current().id();
        let owner = *self.owner.get_or_insert(current);
        debug_assert_eq!(
            owner, current,
            "render scene used from a thread other than its render thread"
        );
    }

    /// Forgets the owning thread so the scene can be handed to another one.
    pub(crate) fn clear_owner(&mut self) {
        self.owner = None;
    }

    /// Current frame number; 0 before the first frame.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Returns true between `begin_frame` and `end_frame`.
    #[must_use]
    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    /// Live proxies.
    #[must_use]
    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    /// Live buffers.
    #[must_use]
    pub fn pool(&self) -> &RenderBufferPool {
        &self.pool
    }

    /// Buffers waiting for in-flight frames to complete.
    #[must_use]
    pub fn pending_buffer_releases(&self) -> usize {
        self.buffer_release.len()
    }

    /// Returns true if `id` is waiting to be destroyed.
    #[must_use]
    pub fn is_release_pending(&self, id: RenderBufferId) -> bool {
        self.buffer_release.contains(&id)
    }

    /// Removed proxies not yet destroyed.
    #[must_use]
    pub fn pending_proxy_releases(&self) -> usize {
        self.graveyard.len()
    }

    /// Options the scene was created with.
    #[must_use]
    pub fn options(&self) -> &VolumeRenderOptions {
        &self.options
    }

    /// The standard extension.
    #[must_use]
    pub fn extension(&self) -> &Arc<RwLock<VolumeRenderExtension>> {
        &self.extension
    }

    /// The research extension.
    #[must_use]
    pub fn research_extension(&self) -> &Arc<RwLock<ResearchRenderExtension>> {
        &self.research
    }
}

impl Drop for RenderScene {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for RenderScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScene")
            .field("frame", &self.frame)
            .field("proxies", &self.registry.len())
            .field("buffers", &self.pool.len())
            .field("pending_buffer_releases", &self.buffer_release.len())
            .field("pending_proxy_releases", &self.graveyard.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command_queue, host_allocator, ProxyDesc, ViewId, VolumeTransform, VoxelPayload};
    use glam::{Mat4, UVec3, Vec3};

    fn camera() -> SceneView {
        SceneView::new(
            ViewId(0),
            Mat4::look_at_rh(Vec3::new(0.5, 0.5, 5.0), Vec3::splat(0.5), Vec3::Y),
            Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0),
        )
    }

    fn payload() -> VoxelPayload {
        VoxelPayload::from_f32(UVec3::splat(2), &[1.0; 8]).unwrap()
    }

    fn started_module() -> ModuleLifecycle {
        let mut module = ModuleLifecycle::new(VolumeRenderOptions::default());
        module.startup().unwrap();
        module
    }

    fn scene(receiver: CommandReceiver, budget: u64) -> (ModuleLifecycle, RenderScene) {
        let mut module = started_module();
        let scene =
            RenderScene::with_module(receiver, host_allocator(budget), &mut module).unwrap();
        (module, scene)
    }

    #[test]
    fn test_first_frame_is_one() {
        let (_sender, receiver) = command_queue();
        let (_module, mut scene) = scene(receiver, 1024);
        assert_eq!(scene.frame(), 0);
        assert_eq!(scene.begin_frame(), 1);
        scene.end_frame();
        assert!(!scene.is_in_frame());
    }

    #[test]
    fn test_render_outside_frame_fails() {
        let (_sender, receiver) = command_queue();
        let (_module, mut scene) = scene(receiver, 1024);
        assert!(scene.render(&[camera()]).is_err());
    }

    #[test]
    fn test_scenes_share_the_module_extensions() {
        let (_, stopped_receiver) = command_queue();
        let mut module = ModuleLifecycle::new(VolumeRenderOptions::default());
        assert!(matches!(
            RenderScene::with_module(stopped_receiver, host_allocator(1024), &mut module),
            Err(VolumeError::NotInitialized)
        ));

        module.startup().unwrap();
        let (_a, first) = command_queue();
        let (_b, second) = command_queue();
        let first = RenderScene::with_module(first, host_allocator(1024), &mut module).unwrap();
        let second = RenderScene::with_module(second, host_allocator(1024), &mut module).unwrap();
        assert!(Arc::ptr_eq(first.extension(), second.extension()));
        assert!(Arc::ptr_eq(first.research_extension(), second.research_extension()));
        assert_eq!(first.extension().read().unwrap().init_count(), 1);
    }

    #[test]
    fn test_shared_buffer_survives_one_proxy_update() {
        let (sender, receiver) = command_queue();
        let (_module, mut scene) = scene(receiver, 1 << 20);
        let shared = RenderBufferId::next();
        let (a, b) = (ProxyId::next(), ProxyId::next());
        sender
            .send(RenderCommand::CreateBuffer {
                id: shared,
                payload: payload(),
            })
            .unwrap();
        for id in [a, b] {
            sender
                .send(RenderCommand::AddProxy {
                    id,
                    desc: ProxyDesc {
                        transform: VolumeTransform::from_dims(UVec3::splat(2)),
                        render_buffer: Some(shared),
                        ..Default::default()
                    },
                })
                .unwrap();
        }
        sender
            .send(RenderCommand::UpdateProxy {
                id: a,
                transform: VolumeTransform::from_dims(UVec3::splat(2)),
                render_buffer: None,
            })
            .unwrap();

        scene.render_frame(&[camera()]).unwrap();
        assert!(!scene.is_release_pending(shared));
        scene.render_frame(&[camera()]).unwrap();
        assert!(scene.pool().is_resident(shared));
    }

    #[test]
    fn test_teardown_destroys_everything() {
        let (sender, receiver) = command_queue();
        let (_module, mut scene) = scene(receiver, 1 << 20);
        let buffer = RenderBufferId::next();
        let proxy = ProxyId::next();
        sender
            .send(RenderCommand::CreateBuffer {
                id: buffer,
                payload: payload(),
            })
            .unwrap();
        sender
            .send(RenderCommand::AddProxy {
                id: proxy,
                desc: ProxyDesc {
                    render_buffer: Some(buffer),
                    ..Default::default()
                },
            })
            .unwrap();
        scene.render_frame(&[camera()]).unwrap();
        assert_eq!(scene.registry().len(), 1);

        scene.teardown();
        assert!(scene.registry().is_empty());
        assert!(scene.pool().is_empty());
        assert_eq!(scene.extension().read().unwrap().proxy_count(), 0);
    }
}
