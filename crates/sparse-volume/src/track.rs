//! Volume-track handlers for an external sequencer.
//!
//! A sequencer drives volume sequences through named track handlers. The
//! module registers [`SequenceTrackHandler`] at startup and removes it at
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use crate::sequence::VolumeSequence;
use crate::{Result, VolumeError};

/// Evaluates a sequencer track against a volume sequence.
pub trait VolumeTrackHandler: Send + Sync {
    /// Name the sequencer knows the track type by.
    fn track_name(&self) -> &str;

    /// Applies the track at `time` seconds. Returns true if the shown frame changed.
    fn evaluate(&self, sequence: &mut VolumeSequence, time: f32) -> Result<bool>;
}

/// Plays a [`VolumeSequence`] at the sequencer's time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceTrackHandler;

impl SequenceTrackHandler {
    /// Track name registered at module startup.
    pub const TRACK_NAME: &'static str = "VdbVolumeSequence";
}

impl VolumeTrackHandler for SequenceTrackHandler {
    fn track_name(&self) -> &str {
        Self::TRACK_NAME
    }

    fn evaluate(&self, sequence: &mut VolumeSequence, time: f32) -> Result<bool> {
        sequence.set_time(time)
    }
}

/// Registered track handlers, keyed by track name.
#[derive(Default)]
pub struct TrackHandlerRegistry {
    handlers: HashMap<String, Arc<dyn VolumeTrackHandler>>,
}

impl TrackHandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::TrackHandlerExists`] if the name is taken.
    pub fn register(&mut self, handler: Arc<dyn VolumeTrackHandler>) -> Result<()> {
        let name = handler.track_name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(VolumeError::TrackHandlerExists(name));
        }
        log::debug!("registered volume track handler '{name}'");
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Unregisters a handler by name. Returns false if it was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.handlers.remove(name).is_some();
        if removed {
            log::debug!("unregistered volume track handler '{name}'");
        }
        removed
    }

    /// Returns the handler for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn VolumeTrackHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for TrackHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("TrackHandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_fails() {
        let mut registry = TrackHandlerRegistry::new();
        registry.register(Arc::new(SequenceTrackHandler)).unwrap();
        let err = registry.register(Arc::new(SequenceTrackHandler)).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::TrackHandlerExists(name) if name == "VdbVolumeSequence"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut registry = TrackHandlerRegistry::new();
        registry.register(Arc::new(SequenceTrackHandler)).unwrap();
        assert!(registry.contains(SequenceTrackHandler::TRACK_NAME));
        assert!(registry.unregister(SequenceTrackHandler::TRACK_NAME));
        assert!(!registry.unregister(SequenceTrackHandler::TRACK_NAME));
        assert!(registry.is_empty());
    }
}
