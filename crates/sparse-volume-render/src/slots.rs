//! Ownership of the render extensions.
//!
//! [`ExtensionSlots`] is the only way to obtain a [`VolumeRenderExtension`] or
//! a [`ResearchRenderExtension`] from outside this crate. Each slot holds at
//! most one extension, constructed and initialized on first request and
//! released together on [`ExtensionSlots::release_all`].

use std::sync::{Arc, PoisonError, RwLock};

use sparse_volume_core::DEFAULT_MAX_RAY_STEPS;

use crate::error::RenderResult;
use crate::extension::VolumeRenderExtension;
use crate::research::ResearchRenderExtension;

/// Lazily created, shared render extensions.
#[derive(Debug)]
pub struct ExtensionSlots {
    max_ray_steps: u32,
    render: Option<Arc<RwLock<VolumeRenderExtension>>>,
    research: Option<Arc<RwLock<ResearchRenderExtension>>>,
}

impl ExtensionSlots {
    /// Creates empty slots. Extensions created later bound their ray march
    /// loops at `max_ray_steps`.
    #[must_use]
    pub fn new(max_ray_steps: u32) -> Self {
        Self {
            max_ray_steps: max_ray_steps.max(1),
            render: None,
            research: None,
        }
    }

    /// Returns the standard extension, creating and initializing it once.
    pub fn get_or_create_render(&mut self) -> RenderResult<Arc<RwLock<VolumeRenderExtension>>> {
        if let Some(extension) = &self.render {
            return Ok(Arc::clone(extension));
        }
        let mut extension = VolumeRenderExtension::new().with_max_ray_steps(self.max_ray_steps);
        extension.init()?;
        let extension = Arc::new(RwLock::new(extension));
        self.render = Some(Arc::clone(&extension));
        Ok(extension)
    }

    /// Returns the research extension, creating and initializing it once.
    pub fn get_or_create_research(
        &mut self,
    ) -> RenderResult<Arc<RwLock<ResearchRenderExtension>>> {
        if let Some(extension) = &self.research {
            return Ok(Arc::clone(extension));
        }
        let mut extension = ResearchRenderExtension::new().with_max_ray_steps(self.max_ray_steps);
        extension.init()?;
        let extension = Arc::new(RwLock::new(extension));
        self.research = Some(Arc::clone(&extension));
        Ok(extension)
    }

    /// The standard extension, if created.
    pub fn render(&self) -> Option<&Arc<RwLock<VolumeRenderExtension>>> {
        self.render.as_ref()
    }

    /// The research extension, if created.
    pub fn research(&self) -> Option<&Arc<RwLock<ResearchRenderExtension>>> {
        self.research.as_ref()
    }

    /// Releases and forgets whichever extensions exist. Safe when empty.
    pub fn release_all(&mut self) {
        if let Some(extension) = self.render.take() {
            extension
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .release();
        }
        if let Some(extension) = self.research.take() {
            extension
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .release();
        }
    }
}

impl Default for ExtensionSlots {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RAY_STEPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ExtensionState;

    #[test]
    fn test_extensions_are_created_once() {
        let mut slots = ExtensionSlots::new(64);
        assert!(slots.render().is_none());

        let first = slots.get_or_create_render().unwrap();
        let second = slots.get_or_create_render().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.read().unwrap().init_count(), 1);
        assert_eq!(first.read().unwrap().max_ray_steps(), 64);
        assert!(slots.research().is_none());

        let research = slots.get_or_create_research().unwrap();
        assert_eq!(research.read().unwrap().state(), ExtensionState::Initialized);
    }

    #[test]
    fn test_release_all_releases_and_empties() {
        let mut slots = ExtensionSlots::default();
        slots.release_all();

        let render = slots.get_or_create_render().unwrap();
        let research = slots.get_or_create_research().unwrap();
        slots.release_all();
        assert!(slots.render().is_none() && slots.research().is_none());
        assert_eq!(render.read().unwrap().state(), ExtensionState::Released);
        assert_eq!(research.read().unwrap().state(), ExtensionState::Released);

        let fresh = slots.get_or_create_render().unwrap();
        assert!(!Arc::ptr_eq(&render, &fresh));
        assert_eq!(fresh.read().unwrap().state(), ExtensionState::Initialized);
    }
}
