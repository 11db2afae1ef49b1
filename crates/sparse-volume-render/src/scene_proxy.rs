//! Render-timeline proxy of one sparse volume.

use glam::{Mat4, Vec3};
use sparse_volume_core::{
    type_hash_of, DrawContext, MaterialDesc, ProxyDesc, ProxyId, RenderBufferId,
    RenderParameters, SceneProxy, SceneView, ViewId, ViewRelevance, VisibilitySet,
    VolumeMeshBatch, VolumePipeline, VolumeTransform,
};

/// Mirror of a simulation-side volume, owned by the render timeline.
#[derive(Debug)]
pub struct VolumeSceneProxy {
    id: ProxyId,
    transform: VolumeTransform,
    params: RenderParameters,
    local_to_world: Mat4,
    render_buffer: Option<RenderBufferId>,
    hidden_in_game: bool,
    pipeline: VolumePipeline,
    default_max_draw_distance: Option<f32>,
    visibility: VisibilitySet,
}

impl VolumeSceneProxy {
    /// Type hash shared by every volume proxy.
    pub const TYPE_HASH: u64 = type_hash_of("VolumeSceneProxy");

    /// Creates a proxy from its description.
    #[must_use]
    pub fn new(id: ProxyId, desc: ProxyDesc) -> Self {
        Self {
            id,
            transform: desc.transform,
            params: desc.params,
            local_to_world: desc.local_to_world,
            render_buffer: desc.render_buffer,
            hidden_in_game: desc.hidden_in_game,
            pipeline: desc.pipeline,
            default_max_draw_distance: None,
            visibility: VisibilitySet::new(),
        }
    }

    /// Culls beyond `distance` in views that set no draw distance of their own.
    #[must_use]
    pub fn with_default_max_draw_distance(mut self, distance: Option<f32>) -> Self {
        self.default_max_draw_distance = distance;
        self
    }

    /// Index-to-local matrix.
    pub fn index_to_local(&self) -> Mat4 {
        self.transform.index_to_local()
    }

    /// Index-space minimum corner.
    pub fn index_min(&self) -> Vec3 {
        self.transform.index_min()
    }

    /// Index-space extent.
    pub fn index_size(&self) -> Vec3 {
        self.transform.index_size()
    }

    /// Full transform.
    pub fn transform(&self) -> &VolumeTransform {
        &self.transform
    }

    /// Step multiplier.
    pub fn step_multiplier(&self) -> f32 {
        self.params.step_multiplier()
    }

    /// Density multiplier.
    pub fn density_multiplier(&self) -> f32 {
        self.params.density_multiplier()
    }

    /// Material description.
    pub fn material(&self) -> &MaterialDesc {
        self.params.material()
    }

    /// Shading inputs.
    pub fn params(&self) -> &RenderParameters {
        &self.params
    }

    /// Returns true when shaded as a level set.
    pub fn is_level_set(&self) -> bool {
        self.params.is_level_set()
    }

    /// Object-to-world matrix.
    pub fn local_to_world(&self) -> Mat4 {
        self.local_to_world
    }

    /// Returns true if hidden in game.
    pub fn is_hidden(&self) -> bool {
        self.hidden_in_game
    }

    /// Visibility recorded for the current frame.
    pub fn visibility(&self) -> &VisibilitySet {
        &self.visibility
    }

    fn shown_in(&self, view: &SceneView) -> bool {
        let flags = view.show_flags;
        if !flags.volumes {
            return false;
        }
        if self.is_level_set() && !flags.level_sets {
            return false;
        }
        if !self.is_level_set() && !flags.fog_volumes {
            return false;
        }
        !self.hidden_in_game || flags.hidden_in_game
    }

    fn within_draw_distance(&self, view: &SceneView) -> bool {
        match view.max_draw_distance.or(self.default_max_draw_distance) {
            Some(max_distance) => {
                let (min, max) = self.world_bounds();
                view.distance_to_box(min, max) <= max_distance
            }
            None => true,
        }
    }
}

impl SceneProxy for VolumeSceneProxy {
    fn type_hash(&self) -> u64 {
        Self::TYPE_HASH
    }

    fn id(&self) -> ProxyId {
        self.id
    }

    fn pipeline(&self) -> VolumePipeline {
        self.pipeline
    }

    fn update(
        &mut self,
        transform: VolumeTransform,
        render_buffer: Option<RenderBufferId>,
    ) -> Option<RenderBufferId> {
        self.transform = transform;
        let previous = std::mem::replace(&mut self.render_buffer, render_buffer);
        previous.filter(|prev| Some(*prev) != render_buffer)
    }

    fn render_resource(&self) -> Option<RenderBufferId> {
        self.render_buffer
    }

    fn set_local_to_world(&mut self, local_to_world: Mat4) {
        self.local_to_world = local_to_world;
    }

    fn set_hidden(&mut self, hidden: bool) {
        self.hidden_in_game = hidden;
    }

    fn reset_visibility(&mut self, frame: u64) {
        self.visibility.reset(frame);
    }

    fn is_visible(&self, view: ViewId) -> bool {
        self.visibility.contains(view)
    }

    fn compute_view_relevance(&mut self, view: &SceneView, frame: u64) -> ViewRelevance {
        debug_assert!(
            self.visibility.is_current(frame),
            "{} evaluated for {} in frame {frame} before its visibility reset",
            self.id,
            view.id
        );
        if self.transform.is_empty() || !self.shown_in(view) || !self.within_draw_distance(view) {
            return ViewRelevance::NONE;
        }

        self.visibility.insert(view.id, frame);
        ViewRelevance {
            draw: true,
            dynamic: true,
            main_pass: true,
            translucent: !self.is_level_set(),
        }
    }

    fn collect_draw_elements(
        &self,
        views: &[SceneView],
        visibility_map: u32,
        ctx: &mut dyn DrawContext,
    ) {
        let Some(buffer) = self.render_buffer.filter(|b| ctx.is_buffer_resident(*b)) else {
            log::trace!("{} has no resident buffer, skipping", self.id);
            ctx.note_missing_buffer(self.id, self.render_buffer);
            return;
        };

        for (view_index, view) in views.iter().enumerate().take(u32::BITS as usize) {
            if visibility_map & (1 << view_index) == 0 || !self.is_visible(view.id) {
                continue;
            }
            ctx.add_batch(
                view_index,
                VolumeMeshBatch {
                    proxy: self.id,
                    transform: self.transform,
                    local_to_world: self.local_to_world,
                    params: self.params.clone(),
                    render_buffer: buffer,
                },
            );
        }
    }

    fn world_bounds(&self) -> (Vec3, Vec3) {
        self.transform.bounds_in(self.local_to_world)
    }

    fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.visibility.allocated_size()
            + self.params.material().name.capacity()
    }
}
