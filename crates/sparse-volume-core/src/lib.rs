//! Core abstractions for sparse-volume.
//!
//! This crate holds the engine-agnostic data model shared by the render
//! backend and the facade:
//! - [`VolumeTransform`] and [`RenderParameters`] describing a grid and its shading
//! - [`SceneView`], [`ViewRelevance`] and the per-frame [`VisibilitySet`]
//! - the [`SceneProxy`] capability trait implemented by render backends
//! - [`RenderCommand`] and the simulation-to-render command queue
//! - configuration [`VolumeRenderOptions`]

// Internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod command;
pub mod error;
pub mod options;
pub mod params;
pub mod proxy;
pub mod registry;
pub mod transform;
pub mod view;
pub mod visibility;
pub mod voxel;

pub use command::{command_queue, CommandReceiver, CommandSender, RenderCommand};
pub use error::{Result, VolumeError};
pub use options::VolumeRenderOptions;
pub use params::{MaterialDesc, RenderParameters, ShadingMode};
pub use proxy::{
    type_hash_of, DrawContext, ProxyDesc, ProxyId, SceneProxy, VolumeMeshBatch, VolumePipeline,
};
pub use registry::ProxyRegistry;
pub use transform::{RayMarchSteps, VolumeTransform, DEFAULT_MAX_RAY_STEPS};
pub use view::{SceneView, ShowFlags, ViewId, ViewRelevance};
pub use visibility::VisibilitySet;
pub use voxel::{voxel_count, RenderBufferId, VoxelFormat, VoxelPayload};

// Re-export glam types for convenience
pub use glam::{Mat4, UVec3, Vec3, Vec4};
