//! Proxy registry owned by the render timeline.

use std::collections::BTreeMap;

use crate::error::{Result, VolumeError};
use crate::proxy::{ProxyId, SceneProxy};
use crate::voxel::RenderBufferId;

/// Registry of all live proxies.
///
/// Proxies are grouped by type hash and then ordered by id, so iteration
/// visits proxies of one kind together and in a stable order.
#[derive(Default)]
pub struct ProxyRegistry {
    /// Map from type hash -> (proxy id -> proxy)
    proxies: BTreeMap<u64, BTreeMap<ProxyId, Box<dyn SceneProxy>>>,
}

impl ProxyRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a proxy.
    ///
    /// Returns an error if a proxy with the same id already exists.
    pub fn register(&mut self, proxy: Box<dyn SceneProxy>) -> Result<()> {
        let id = proxy.id();
        if self.contains(id) {
            return Err(VolumeError::ProxyExists(id.0));
        }
        self.proxies
            .entry(proxy.type_hash())
            .or_default()
            .insert(id, proxy);
        Ok(())
    }

    /// Gets a proxy by id.
    pub fn get(&self, id: ProxyId) -> Option<&dyn SceneProxy> {
        self.proxies
            .values()
            .find_map(|m| m.get(&id))
            .map(|p| p.as_ref())
    }

    /// Gets a mutable proxy by id.
    pub fn get_mut(&mut self, id: ProxyId) -> Option<&mut Box<dyn SceneProxy>> {
        self.proxies.values_mut().find_map(|m| m.get_mut(&id))
    }

    /// Checks if a proxy with the given id exists.
    pub fn contains(&self, id: ProxyId) -> bool {
        self.proxies.values().any(|m| m.contains_key(&id))
    }

    /// Removes a proxy by id.
    pub fn remove(&mut self, id: ProxyId) -> Option<Box<dyn SceneProxy>> {
        let removed = self.proxies.values_mut().find_map(|m| m.remove(&id));
        self.proxies.retain(|_, m| !m.is_empty());
        removed
    }

    /// Removes all proxies, returning them.
    pub fn drain(&mut self) -> Vec<Box<dyn SceneProxy>> {
        std::mem::take(&mut self.proxies)
            .into_values()
            .flat_map(BTreeMap::into_values)
            .collect()
    }

    /// Returns an iterator over all proxies.
    pub fn iter(&self) -> impl Iterator<Item = &dyn SceneProxy> {
        self.proxies
            .values()
            .flat_map(|m| m.values())
            .map(|p| p.as_ref())
    }

    /// Returns a mutable iterator over all proxies.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn SceneProxy>> + '_ {
        self.proxies.values_mut().flat_map(|m| m.values_mut())
    }

    /// Returns true if any proxy other than `except` draws `buffer`.
    pub fn is_buffer_referenced(&self, buffer: RenderBufferId, except: Option<ProxyId>) -> bool {
        self.iter()
            .any(|p| Some(p.id()) != except && p.render_resource() == Some(buffer))
    }

    /// Returns the total number of registered proxies.
    pub fn len(&self) -> usize {
        self.proxies.values().map(BTreeMap::len).sum()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.proxies.values().all(BTreeMap::is_empty)
    }

    /// Returns all proxies with the given type hash.
    pub fn get_all_of_type(&self, type_hash: u64) -> impl Iterator<Item = &dyn SceneProxy> {
        self.proxies
            .get(&type_hash)
            .into_iter()
            .flat_map(|m| m.values())
            .map(|p| p.as_ref())
    }
}

impl std::fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;
    use crate::proxy::{type_hash_of, DrawContext, VolumePipeline};
    use crate::transform::VolumeTransform;
    use crate::view::{SceneView, ViewId, ViewRelevance};

    struct StubProxy {
        id: ProxyId,
        type_hash: u64,
        buffer: Option<RenderBufferId>,
    }

    impl StubProxy {
        fn boxed(type_name: &str, buffer: Option<RenderBufferId>) -> Box<dyn SceneProxy> {
            Box::new(Self {
                id: ProxyId::next(),
                type_hash: type_hash_of(type_name),
                buffer,
            })
        }
    }

    impl SceneProxy for StubProxy {
        fn type_hash(&self) -> u64 {
            self.type_hash
        }
        fn id(&self) -> ProxyId {
            self.id
        }
        fn pipeline(&self) -> VolumePipeline {
            VolumePipeline::Standard
        }
        fn update(
            &mut self,
            _transform: VolumeTransform,
            render_buffer: Option<RenderBufferId>,
        ) -> Option<RenderBufferId> {
            std::mem::replace(&mut self.buffer, render_buffer)
        }
        fn render_resource(&self) -> Option<RenderBufferId> {
            self.buffer
        }
        fn set_local_to_world(&mut self, _local_to_world: Mat4) {}
        fn set_hidden(&mut self, _hidden: bool) {}
        fn reset_visibility(&mut self, _frame: u64) {}
        fn is_visible(&self, _view: ViewId) -> bool {
            false
        }
        fn compute_view_relevance(&mut self, _view: &SceneView, _frame: u64) -> ViewRelevance {
            ViewRelevance::NONE
        }
        fn collect_draw_elements(
            &self,
            _views: &[SceneView],
            _visibility_map: u32,
            _ctx: &mut dyn DrawContext,
        ) {
        }
        fn world_bounds(&self) -> (Vec3, Vec3) {
            (Vec3::ZERO, Vec3::ONE)
        }
        fn memory_footprint(&self) -> usize {
            std::mem::size_of::<Self>()
        }
    }

    #[test]
    fn test_register_get_remove() {
        let mut registry = ProxyRegistry::new();
        let proxy = StubProxy::boxed("Stub", None);
        let id = proxy.id();
        registry.register(proxy).unwrap();

        assert!(registry.contains(id));
        assert_eq!(registry.get(id).map(|p| p.id()), Some(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = ProxyRegistry::new();
        let id = ProxyId::next();
        let stub = || {
            Box::new(StubProxy {
                id,
                type_hash: type_hash_of("Stub"),
                buffer: None,
            })
        };
        registry.register(stub()).unwrap();
        let err = registry.register(stub()).unwrap_err();
        assert!(matches!(err, VolumeError::ProxyExists(raw) if raw == id.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_grouped_by_type() {
        let mut registry = ProxyRegistry::new();
        registry.register(StubProxy::boxed("A", None)).unwrap();
        registry.register(StubProxy::boxed("B", None)).unwrap();
        registry.register(StubProxy::boxed("A", None)).unwrap();

        assert_eq!(registry.get_all_of_type(type_hash_of("A")).count(), 2);
        assert_eq!(registry.get_all_of_type(type_hash_of("B")).count(), 1);
        assert_eq!(registry.get_all_of_type(type_hash_of("C")).count(), 0);
        assert_eq!(registry.drain().len(), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_buffer_reference_tracking() {
        let mut registry = ProxyRegistry::new();
        let shared = RenderBufferId::next();
        let a = StubProxy::boxed("Stub", Some(shared));
        let b = StubProxy::boxed("Stub", Some(shared));
        let (a_id, b_id) = (a.id(), b.id());
        registry.register(a).unwrap();
        registry.register(b).unwrap();

        assert!(registry.is_buffer_referenced(shared, Some(a_id)));
        let previous = registry
            .get_mut(b_id)
            .and_then(|p| p.update(VolumeTransform::default(), None));
        assert_eq!(previous, Some(shared));
        assert!(!registry.is_buffer_referenced(shared, Some(a_id)));
        assert!(registry.is_buffer_referenced(shared, None));
    }
}
