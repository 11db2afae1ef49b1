//! Module startup and shutdown.
//!
//! [`ModuleLifecycle`] owns at most one [`VolumeRenderExtension`] and one
//! [`ResearchRenderExtension`] for the whole process, the shader directory
//! mapping and the volume-track handler registration. Extensions are created
//! lazily on first request and initialized exactly once.
//!
//! The process-wide instance is reached through [`startup_module`],
//! [`render_extension`], [`research_render_extension`] and
//! [`shutdown_module`]. Unlike a bare `OnceLock`, the module can be started
//! again after shutdown.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use sparse_volume_render::{
    ExtensionSlots, ResearchRenderExtension, ShaderSourceMap, VolumeRenderExtension,
    SHADER_VIRTUAL_DIR,
};

use crate::track::{SequenceTrackHandler, TrackHandlerRegistry};
use crate::{Result, VolumeError, VolumeRenderOptions};

static MODULE: OnceLock<RwLock<Option<ModuleLifecycle>>> = OnceLock::new();

/// Owner of the process-wide render extensions.
#[derive(Debug)]
pub struct ModuleLifecycle {
    options: VolumeRenderOptions,
    shader_sources: ShaderSourceMap,
    track_handlers: TrackHandlerRegistry,
    extensions: ExtensionSlots,
    started: bool,
}

impl ModuleLifecycle {
    /// Creates a stopped module.
    #[must_use]
    pub fn new(options: VolumeRenderOptions) -> Self {
        Self {
            extensions: ExtensionSlots::new(options.max_ray_steps),
            options,
            shader_sources: ShaderSourceMap::new(),
            track_handlers: TrackHandlerRegistry::new(),
            started: false,
        }
    }

    /// Maps the shader directory and registers the volume track handler.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::AlreadyInitialized`] if already started.
    pub fn startup(&mut self) -> Result<()> {
        if self.started {
            return Err(VolumeError::AlreadyInitialized);
        }
        self.shader_sources
            .add_mapping(SHADER_VIRTUAL_DIR, self.options.shader_directory.clone());
        self.track_handlers
            .register(Arc::new(SequenceTrackHandler))?;
        self.started = true;
        log::info!("volume module started");
        Ok(())
    }

    /// Unregisters the track handler and releases whichever extensions exist.
    ///
    /// Safe to call when nothing was created or the module never started.
    pub fn shutdown(&mut self) {
        self.track_handlers
            .unregister(SequenceTrackHandler::TRACK_NAME);
        self.shader_sources.remove_mapping(SHADER_VIRTUAL_DIR);

        self.extensions.release_all();

        if self.started {
            log::info!("volume module shut down");
        }
        self.started = false;
    }

    /// Returns the standard extension, creating and initializing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotInitialized`] before [`startup`](Self::startup).
    pub fn get_or_create_render_extension(
        &mut self,
    ) -> Result<Arc<RwLock<VolumeRenderExtension>>> {
        if !self.started {
            return Err(VolumeError::NotInitialized);
        }
        Ok(self.extensions.get_or_create_render()?)
    }

    /// Returns the research extension, creating and initializing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotInitialized`] before [`startup`](Self::startup).
    pub fn get_or_create_research_extension(
        &mut self,
    ) -> Result<Arc<RwLock<ResearchRenderExtension>>> {
        if !self.started {
            return Err(VolumeError::NotInitialized);
        }
        Ok(self.extensions.get_or_create_research()?)
    }

    /// Returns true between startup and shutdown.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Returns true once the standard extension exists.
    #[must_use]
    pub fn has_render_extension(&self) -> bool {
        self.extensions.render().is_some()
    }

    /// Returns true once the research extension exists.
    #[must_use]
    pub fn has_research_extension(&self) -> bool {
        self.extensions.research().is_some()
    }

    /// Options the module was started with.
    #[must_use]
    pub fn options(&self) -> &VolumeRenderOptions {
        &self.options
    }

    /// Shader directory mappings.
    #[must_use]
    pub fn shader_sources(&self) -> &ShaderSourceMap {
        &self.shader_sources
    }

    /// Registered volume-track handlers.
    #[must_use]
    pub fn track_handlers(&self) -> &TrackHandlerRegistry {
        &self.track_handlers
    }

    /// Mutable access to the track handlers, for sequencer integrations.
    pub fn track_handlers_mut(&mut self) -> &mut TrackHandlerRegistry {
        &mut self.track_handlers
    }
}

impl Drop for ModuleLifecycle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts the process-wide module.
///
/// # Errors
///
/// Returns [`VolumeError::AlreadyInitialized`] if the module is running.
pub fn startup_module(options: VolumeRenderOptions) -> Result<()> {
    let lock = MODULE.get_or_init(|| RwLock::new(None));
    let mut slot = lock.write().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(ModuleLifecycle::is_started) {
        return Err(VolumeError::AlreadyInitialized);
    }
    let mut module = ModuleLifecycle::new(options);
    module.startup()?;
    *slot = Some(module);
    Ok(())
}

/// Shuts the process-wide module down. Safe to call at any time.
pub fn shutdown_module() {
    if let Some(lock) = MODULE.get() {
        let module = lock.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut module) = module {
            module.shutdown();
        }
    }
}

/// Returns whether the process-wide module is running.
pub fn is_module_started() -> bool {
    MODULE
        .get()
        .and_then(|lock| lock.read().ok())
        .is_some_and(|slot| slot.as_ref().is_some_and(ModuleLifecycle::is_started))
}

/// Runs `f` against the running module.
///
/// # Errors
///
/// Returns [`VolumeError::NotInitialized`] before [`startup_module`].
pub fn try_with_module<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&mut ModuleLifecycle) -> R,
{
    let lock = MODULE.get().ok_or(VolumeError::NotInitialized)?;
    let mut slot = lock.write().unwrap_or_else(PoisonError::into_inner);
    slot.as_mut().map(f).ok_or(VolumeError::NotInitialized)
}

/// Returns the process-wide standard extension.
///
/// # Errors
///
/// Returns [`VolumeError::NotInitialized`] before [`startup_module`].
pub fn try_render_extension() -> Result<Arc<RwLock<VolumeRenderExtension>>> {
    try_with_module(ModuleLifecycle::get_or_create_render_extension)?
}

/// Returns the process-wide research extension.
///
/// # Errors
///
/// Returns [`VolumeError::NotInitialized`] before [`startup_module`].
pub fn try_research_render_extension() -> Result<Arc<RwLock<ResearchRenderExtension>>> {
    try_with_module(ModuleLifecycle::get_or_create_research_extension)?
}

/// Returns the process-wide standard extension.
///
/// # Panics
///
/// Panics if the module has not been started.
pub fn render_extension() -> Arc<RwLock<VolumeRenderExtension>> {
    match try_render_extension() {
        Ok(extension) => extension,
        Err(err) => panic!("volume module not started: {err}"),
    }
}

/// Returns the process-wide research extension.
///
/// # Panics
///
/// Panics if the module has not been started.
pub fn research_render_extension() -> Arc<RwLock<ResearchRenderExtension>> {
    match try_research_render_extension() {
        Ok(extension) => extension,
        Err(err) => panic!("volume module not started: {err}"),
    }
}
