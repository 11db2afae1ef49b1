//! Views rendered each frame and per-view relevance.

use glam::{Mat4, Vec3};

/// Identifier of a view within the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u32);

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Per-view show flags supplied by the view system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ShowFlags {
    /// Draw sparse volumes at all.
    pub volumes: bool,
    /// Draw grids shaded as level sets.
    pub level_sets: bool,
    /// Draw grids shaded as fog volumes.
    pub fog_volumes: bool,
    /// Show proxies marked hidden in game (editor-style views).
    pub hidden_in_game: bool,
}

impl Default for ShowFlags {
    fn default() -> Self {
        Self {
            volumes: true,
            level_sets: true,
            fog_volumes: true,
            hidden_in_game: false,
        }
    }
}

/// One camera view rendered this frame.
#[derive(Debug, Clone)]
pub struct SceneView {
    /// Unique view id.
    pub id: ViewId,
    /// World-to-view matrix.
    pub view_matrix: Mat4,
    /// View-to-clip matrix.
    pub projection_matrix: Mat4,
    /// Render target size in pixels.
    pub viewport_size: (u32, u32),
    /// Show flags for this view.
    pub show_flags: ShowFlags,
    /// Proxies whose bounds lie farther than this are culled.
    pub max_draw_distance: Option<f32>,
}

impl SceneView {
    /// Creates a view with default show flags and no distance culling.
    #[must_use]
    pub fn new(id: ViewId, view_matrix: Mat4, projection_matrix: Mat4) -> Self {
        Self {
            id,
            view_matrix,
            projection_matrix,
            viewport_size: (1, 1),
            show_flags: ShowFlags::default(),
            max_draw_distance: None,
        }
    }

    /// Sets the viewport size.
    #[must_use]
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_size = (width.max(1), height.max(1));
        self
    }

    /// Sets the show flags.
    #[must_use]
    pub fn with_show_flags(mut self, show_flags: ShowFlags) -> Self {
        self.show_flags = show_flags;
        self
    }

    /// Sets the maximum draw distance.
    #[must_use]
    pub fn with_max_draw_distance(mut self, distance: f32) -> Self {
        self.max_draw_distance = Some(distance);
        self
    }

    /// Returns the view origin in world space.
    #[must_use]
    pub fn origin(&self) -> Vec3 {
        self.view_matrix.inverse().w_axis.truncate()
    }

    /// Returns the combined world-to-clip matrix.
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix * self.view_matrix
    }

    /// Distance from the view origin to the closest point of a world-space box.
    #[must_use]
    pub fn distance_to_box(&self, min: Vec3, max: Vec3) -> f32 {
        let origin = self.origin();
        let closest = origin.clamp(min, max);
        origin.distance(closest)
    }
}

/// Result of evaluating whether a proxy contributes to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ViewRelevance {
    /// The proxy must be drawn in this view.
    pub draw: bool,
    /// The proxy emits dynamic (per-frame) draw elements.
    pub dynamic: bool,
    /// The proxy renders in the main pass.
    pub main_pass: bool,
    /// The proxy renders with translucency.
    pub translucent: bool,
}

impl ViewRelevance {
    /// Relevance for a proxy that is not drawn.
    pub const NONE: Self = Self {
        draw: false,
        dynamic: false,
        main_pass: false,
        translucent: false,
    };

    /// Returns true if the proxy must be drawn.
    #[must_use]
    pub fn is_relevant(&self) -> bool {
        self.draw
    }
}
