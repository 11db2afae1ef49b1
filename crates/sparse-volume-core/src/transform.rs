//! Index-space to local-space volume transforms and ray-march stepping.
//!
//! A sparse grid stores voxels in integer index space. The [`VolumeTransform`]
//! describes the active index-space box (`index_min`, `index_size`) and the
//! affine map from index space into the object's local space. Shaders draw a
//! unit cube and map it through [`VolumeTransform::normalized_to_local`].

use glam::{Mat4, UVec3, Vec3, Vec4};

use crate::error::{Result, VolumeError};

/// Smallest accepted absolute determinant for an index-to-local matrix.
pub const MIN_DETERMINANT: f32 = 1e-12;

/// Default upper bound on ray-march iterations per pixel.
pub const DEFAULT_MAX_RAY_STEPS: u32 = 2048;

/// Placement of a voxel grid in object-local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeTransform {
    index_to_local: Mat4,
    index_min: Vec3,
    index_size: Vec3,
}

impl VolumeTransform {
    /// Creates a validated transform.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidTransform`] if the matrix is not an
    /// invertible affine map or if any extent component is negative or not
    /// finite.
    pub fn new(index_to_local: Mat4, index_min: Vec3, index_size: Vec3) -> Result<Self> {
        if !index_min.is_finite() {
            return Err(VolumeError::InvalidTransform(format!(
                "index minimum {index_min} is not finite"
            )));
        }
        if !index_size.is_finite() || index_size.min_element() < 0.0 {
            return Err(VolumeError::InvalidTransform(format!(
                "index extent {index_size} must be finite and non-negative"
            )));
        }
        if !index_to_local.is_finite() {
            return Err(VolumeError::InvalidTransform(
                "index-to-local matrix contains non-finite values".into(),
            ));
        }
        let bottom_row = index_to_local.row(3);
        if !bottom_row.abs_diff_eq(Vec4::W, 1e-6) {
            return Err(VolumeError::InvalidTransform(format!(
                "index-to-local matrix is not affine (bottom row {bottom_row})"
            )));
        }
        let det = index_to_local.determinant();
        if det.abs() <= MIN_DETERMINANT {
            return Err(VolumeError::InvalidTransform(format!(
                "index-to-local matrix is singular (determinant {det})"
            )));
        }

        Ok(Self {
            index_to_local,
            index_min,
            index_size,
        })
    }

    /// Identity placement for a dense grid of the given dimensions.
    #[must_use]
    pub fn from_dims(dims: UVec3) -> Self {
        Self {
            index_to_local: Mat4::IDENTITY,
            index_min: Vec3::ZERO,
            index_size: dims.as_vec3(),
        }
    }

    /// Returns the index-to-local matrix.
    #[must_use]
    pub fn index_to_local(&self) -> Mat4 {
        self.index_to_local
    }

    /// Returns the minimum index-space corner of the active box.
    #[must_use]
    pub fn index_min(&self) -> Vec3 {
        self.index_min
    }

    /// Returns the index-space extent of the active box.
    #[must_use]
    pub fn index_size(&self) -> Vec3 {
        self.index_size
    }

    /// Returns the local-to-index matrix.
    #[must_use]
    pub fn local_to_index(&self) -> Mat4 {
        self.index_to_local.inverse()
    }

    /// Maps the unit cube `[0, 1]^3` onto the active box in local space.
    #[must_use]
    pub fn normalized_to_local(&self) -> Mat4 {
        self.index_to_local
            * Mat4::from_translation(self.index_min)
            * Mat4::from_scale(self.index_size)
    }

    /// Returns true if any extent component is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index_size.min_element() <= 0.0
    }

    /// Returns the index-space bounding box as `(min, max)`.
    #[must_use]
    pub fn index_bounds(&self) -> (Vec3, Vec3) {
        (self.index_min, self.index_min + self.index_size)
    }

    /// Returns the axis-aligned bounds of the active box after `to_space`
    /// (applied after the index-to-local map).
    #[must_use]
    pub fn bounds_in(&self, to_space: Mat4) -> (Vec3, Vec3) {
        let m = to_space * self.index_to_local;
        let (lo, hi) = self.index_bounds();
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for corner in 0..8u32 {
            let p = Vec3::new(
                if corner & 1 == 0 { lo.x } else { hi.x },
                if corner & 2 == 0 { lo.y } else { hi.y },
                if corner & 4 == 0 { lo.z } else { hi.z },
            );
            let q = m.transform_point3(p);
            min = min.min(q);
            max = max.max(q);
        }
        (min, max)
    }

    /// Returns the local-space axis-aligned bounds.
    #[must_use]
    pub fn local_bounds(&self) -> (Vec3, Vec3) {
        self.bounds_in(Mat4::IDENTITY)
    }

    /// Computes ray-march stepping for this box.
    ///
    /// `step_multiplier` is the step length in voxels and must be positive.
    #[must_use]
    pub fn ray_march_steps(&self, step_multiplier: f32, max_steps: u32) -> RayMarchSteps {
        RayMarchSteps::new(self.index_size, step_multiplier, max_steps)
    }
}

impl Default for VolumeTransform {
    fn default() -> Self {
        Self::from_dims(UVec3::ONE)
    }
}

/// Bounded stepping for one ray-marched volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayMarchSteps {
    /// Step length in index-space voxels.
    pub step_length: f32,
    /// Number of steps needed to cross the box diagonal, clamped to `[1, max]`.
    pub max_steps: u32,
}

impl RayMarchSteps {
    /// Computes stepping for a box of the given index extent.
    #[must_use]
    pub fn new(index_size: Vec3, step_multiplier: f32, max_steps: u32) -> Self {
        let max_steps = max_steps.max(1);
        let step_length = if step_multiplier.is_finite() && step_multiplier > 0.0 {
            step_multiplier
        } else {
            1.0
        };
        let diagonal = index_size.length();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let needed = (diagonal / step_length).ceil() as u32;
        Self {
            step_length,
            max_steps: needed.clamp(1, max_steps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_negative_extent() {
        let result = VolumeTransform::new(Mat4::IDENTITY, Vec3::ZERO, Vec3::new(1.0, -1.0, 1.0));
        assert!(matches!(result, Err(VolumeError::InvalidTransform(_))));
    }

    #[test]
    fn test_rejects_singular_matrix() {
        let singular = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        let result = VolumeTransform::new(singular, Vec3::ZERO, Vec3::ONE);
        assert!(matches!(result, Err(VolumeError::InvalidTransform(_))));
    }

    #[test]
    fn test_rejects_projective_matrix() {
        let projective = Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0);
        let result = VolumeTransform::new(projective, Vec3::ZERO, Vec3::ONE);
        assert!(matches!(result, Err(VolumeError::InvalidTransform(_))));
    }

    #[test]
    fn test_zero_extent_is_allowed_but_empty() {
        let t = VolumeTransform::new(Mat4::IDENTITY, Vec3::ZERO, Vec3::new(4.0, 0.0, 4.0))
            .expect("zero extent is valid");
        assert!(t.is_empty());
    }

    #[test]
    fn test_normalized_to_local_maps_unit_cube() {
        let t = VolumeTransform::new(
            Mat4::from_scale(Vec3::splat(0.5)),
            Vec3::new(-8.0, 0.0, 2.0),
            Vec3::new(16.0, 8.0, 4.0),
        )
        .unwrap();
        let m = t.normalized_to_local();
        assert!(m.transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::new(-4.0, 0.0, 1.0), 1e-5));
        assert!(m.transform_point3(Vec3::ONE).abs_diff_eq(Vec3::new(4.0, 4.0, 3.0), 1e-5));
    }

    #[test]
    fn test_local_bounds_of_rotated_box() {
        let rot = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let t = VolumeTransform::new(rot, Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0)).unwrap();
        let (min, max) = t.local_bounds();
        assert!(min.abs_diff_eq(Vec3::new(-1.0, 0.0, 0.0), 1e-5));
        assert!(max.abs_diff_eq(Vec3::new(0.0, 2.0, 1.0), 1e-5));
    }

    #[test]
    fn test_local_to_index_inverts() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::splat(0.1),
            glam::Quat::from_rotation_y(0.3),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let t = VolumeTransform::new(m, Vec3::ZERO, Vec3::ONE).unwrap();
        let p = Vec3::new(3.0, -2.0, 7.0);
        let back = t.local_to_index().transform_point3(t.index_to_local().transform_point3(p));
        assert!(back.abs_diff_eq(p, 1e-3));
    }

    #[test]
    fn test_ray_march_steps_finer_step_means_more_samples() {
        let size = Vec3::new(30.0, 40.0, 0.0); // diagonal 50
        let coarse = RayMarchSteps::new(size, 1.0, DEFAULT_MAX_RAY_STEPS);
        let fine = RayMarchSteps::new(size, 0.5, DEFAULT_MAX_RAY_STEPS);
        assert_eq!(coarse.max_steps, 50);
        assert_eq!(fine.max_steps, 100);
        assert!((fine.step_length - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_ray_march_steps_clamped() {
        let steps = RayMarchSteps::new(Vec3::splat(1.0e6), 0.01, 256);
        assert_eq!(steps.max_steps, 256);
        let empty = RayMarchSteps::new(Vec3::ZERO, 1.0, 256);
        assert_eq!(empty.max_steps, 1);
    }
}
