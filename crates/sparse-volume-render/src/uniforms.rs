//! GPU uniform blocks shared with the WGSL ray marchers.
//!
//! Field order and types are the contract with the shaders in `shaders/`;
//! each struct here must match its WGSL counterpart exactly.

use glam::{Mat4, Vec3};
use sparse_volume_core::{RayMarchSteps, SceneView, VolumeMeshBatch, VoxelFormat};

/// Per-view block (`VdbViewParams`, group 0 binding 0).
///
/// Built once per view per frame and shared by every volume drawn into it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct VolumeViewUniforms {
    /// World-to-view matrix.
    pub view: [[f32; 4]; 4],
    /// View-to-clip matrix.
    pub projection: [[f32; 4]; 4],
    /// World-to-clip matrix.
    pub view_projection: [[f32; 4]; 4],
    /// Clip-to-world matrix, used to rebuild scene depth positions.
    pub inv_view_projection: [[f32; 4]; 4],
    /// Camera position in world space.
    pub camera_position: [f32; 3],
    pub _pad0: f32,
    /// Render target size in pixels.
    pub viewport_size: [f32; 2],
    /// Reciprocal render target size.
    pub inv_viewport_size: [f32; 2],
}

impl VolumeViewUniforms {
    /// Builds the block for `view`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_view(view: &SceneView) -> Self {
        let view_projection = view.view_projection();
        let (width, height) = view.viewport_size;
        let (width, height) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            view: view.view_matrix.to_cols_array_2d(),
            projection: view.projection_matrix.to_cols_array_2d(),
            view_projection: view_projection.to_cols_array_2d(),
            inv_view_projection: view_projection.inverse().to_cols_array_2d(),
            camera_position: view.origin().to_array(),
            _pad0: 0.0,
            viewport_size: [width, height],
            inv_viewport_size: [1.0 / width, 1.0 / height],
        }
    }
}

impl Default for VolumeViewUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY.to_cols_array_2d(),
            projection: Mat4::IDENTITY.to_cols_array_2d(),
            view_projection: Mat4::IDENTITY.to_cols_array_2d(),
            inv_view_projection: Mat4::IDENTITY.to_cols_array_2d(),
            camera_position: [0.0; 3],
            _pad0: 0.0,
            viewport_size: [1.0, 1.0],
            inv_viewport_size: [1.0, 1.0],
        }
    }
}

/// Per-volume block (`VdbParams`, group 1 binding 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct VolumeProxyUniforms {
    /// Unit cube to world: the proxy box drawn by the vertex shader.
    pub normalized_to_world: [[f32; 4]; 4],
    /// World to index space, where the ray is marched.
    pub world_to_index: [[f32; 4]; 4],
    /// Index to world, for surface normals and hit positions.
    pub index_to_world: [[f32; 4]; 4],
    /// Minimum index-space corner.
    pub index_min: [f32; 3],
    /// Step length in voxels.
    pub step_length: f32,
    /// Index-space extent.
    pub index_size: [f32; 3],
    /// Density multiplier.
    pub density_multiplier: f32,
    /// Dense grid dimensions of the buffer.
    pub grid_dims: [u32; 3],
    /// Loop bound for the ray marcher.
    pub max_steps: u32,
    /// Material base color.
    pub base_color: [f32; 3],
    /// Material emissive strength.
    pub emissive_strength: f32,
    /// Buffer element format tag (0 = f32, 1 = packed f16).
    pub voxel_format: u32,
    /// 1 when shaded as a level set, 0 for fog volumes.
    pub level_set: u32,
    /// Step multiplier as set on the proxy.
    pub step_multiplier: f32,
    pub _pad0: f32,
}

impl VolumeProxyUniforms {
    /// Packs a draw batch for the buffer it samples.
    #[must_use]
    pub fn from_batch(
        batch: &VolumeMeshBatch,
        grid_dims: glam::UVec3,
        format: VoxelFormat,
        max_ray_steps: u32,
    ) -> Self {
        let transform = &batch.transform;
        let params = &batch.params;
        let index_to_world = batch.local_to_world * transform.index_to_local();
        let steps = RayMarchSteps::new(
            transform.index_size(),
            params.step_multiplier(),
            max_ray_steps,
        );
        let material = params.material();
        Self {
            normalized_to_world: (batch.local_to_world * transform.normalized_to_local())
                .to_cols_array_2d(),
            world_to_index: index_to_world.inverse().to_cols_array_2d(),
            index_to_world: index_to_world.to_cols_array_2d(),
            index_min: transform.index_min().to_array(),
            step_length: steps.step_length,
            index_size: transform.index_size().to_array(),
            density_multiplier: params.density_multiplier(),
            grid_dims: grid_dims.to_array(),
            max_steps: steps.max_steps,
            base_color: material.base_color.to_array(),
            emissive_strength: material.emissive_strength,
            voxel_format: format.shader_tag(),
            level_set: u32::from(params.is_level_set()),
            step_multiplier: params.step_multiplier(),
            _pad0: 0.0,
        }
    }
}

impl Default for VolumeProxyUniforms {
    fn default() -> Self {
        Self {
            normalized_to_world: Mat4::IDENTITY.to_cols_array_2d(),
            world_to_index: Mat4::IDENTITY.to_cols_array_2d(),
            index_to_world: Mat4::IDENTITY.to_cols_array_2d(),
            index_min: [0.0; 3],
            step_length: 1.0,
            index_size: [1.0; 3],
            density_multiplier: 1.0,
            grid_dims: [1; 3],
            max_steps: 1,
            base_color: Vec3::splat(0.8).to_array(),
            emissive_strength: 0.0,
            voxel_format: 0,
            level_set: 0,
            step_multiplier: 1.0,
            _pad0: 0.0,
        }
    }
}

/// Block for the research pipeline (`VdbResearchParams`, group 0 binding 0).
///
/// Self-contained: carries its own view data so the research pass shares no
/// bindings with the main extension.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct ResearchShaderParams {
    /// World-to-clip matrix of the view.
    pub view_projection: [[f32; 4]; 4],
    /// Unit cube to world.
    pub normalized_to_world: [[f32; 4]; 4],
    /// World to index space.
    pub world_to_index: [[f32; 4]; 4],
    /// Camera position in world space.
    pub camera_position: [f32; 3],
    /// Density multiplier applied before the maximum is taken.
    pub density_multiplier: f32,
    /// Minimum index-space corner.
    pub index_min: [f32; 3],
    /// Step length in voxels.
    pub step_length: f32,
    /// Index-space extent.
    pub index_size: [f32; 3],
    /// Loop bound for the ray marcher.
    pub max_steps: u32,
    /// Dense grid dimensions of the buffer.
    pub grid_dims: [u32; 3],
    /// Buffer element format tag.
    pub voxel_format: u32,
}

impl ResearchShaderParams {
    /// Packs a draw batch as seen from `view`.
    #[must_use]
    pub fn from_batch(
        view: &SceneView,
        batch: &VolumeMeshBatch,
        grid_dims: glam::UVec3,
        format: VoxelFormat,
        max_ray_steps: u32,
    ) -> Self {
        let transform = &batch.transform;
        let index_to_world = batch.local_to_world * transform.index_to_local();
        let steps = RayMarchSteps::new(
            transform.index_size(),
            batch.params.step_multiplier(),
            max_ray_steps,
        );
        Self {
            view_projection: view.view_projection().to_cols_array_2d(),
            normalized_to_world: (batch.local_to_world * transform.normalized_to_local())
                .to_cols_array_2d(),
            world_to_index: index_to_world.inverse().to_cols_array_2d(),
            camera_position: view.origin().to_array(),
            density_multiplier: batch.params.density_multiplier(),
            index_min: transform.index_min().to_array(),
            step_length: steps.step_length,
            index_size: transform.index_size().to_array(),
            max_steps: steps.max_steps,
            grid_dims: grid_dims.to_array(),
            voxel_format: format.shader_tag(),
        }
    }
}
