//! Render parameters attached to a volume proxy.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};

/// How a grid is shaded by the ray marcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadingMode {
    /// The grid stores a signed distance; the zero crossing is shaded as a surface.
    LevelSet,
    /// The grid stores density; shaded as participating media.
    #[default]
    FogVolume,
}

impl ShadingMode {
    /// Returns true for [`ShadingMode::LevelSet`].
    #[must_use]
    pub fn is_level_set(self) -> bool {
        matches!(self, ShadingMode::LevelSet)
    }

    /// Selects the mode from a level-set flag.
    #[must_use]
    pub fn from_level_set(level_set: bool) -> Self {
        if level_set {
            ShadingMode::LevelSet
        } else {
            ShadingMode::FogVolume
        }
    }
}

/// Material description resolved by the shader system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDesc {
    /// Material name used for pipeline lookup and logging.
    pub name: String,
    /// Albedo for level sets, scattering color for fog volumes.
    pub base_color: Vec3,
    /// Emissive contribution added per sample.
    pub emissive_strength: f32,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec3::splat(0.8),
            emissive_strength: 0.0,
        }
    }
}

/// Shading inputs that stay fixed for a proxy update cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParameters {
    density_multiplier: f32,
    step_multiplier: f32,
    mode: ShadingMode,
    material: MaterialDesc,
}

impl RenderParameters {
    /// Creates validated render parameters.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidParameter`] if `density_multiplier` is
    /// negative or `step_multiplier` is not strictly positive.
    pub fn new(
        density_multiplier: f32,
        step_multiplier: f32,
        mode: ShadingMode,
        material: MaterialDesc,
    ) -> Result<Self> {
        if !density_multiplier.is_finite() || density_multiplier < 0.0 {
            return Err(VolumeError::InvalidParameter {
                name: "density_multiplier",
                reason: format!("must be finite and >= 0, got {density_multiplier}"),
            });
        }
        if !step_multiplier.is_finite() || step_multiplier <= 0.0 {
            return Err(VolumeError::InvalidParameter {
                name: "step_multiplier",
                reason: format!("must be finite and > 0, got {step_multiplier}"),
            });
        }
        Ok(Self {
            density_multiplier,
            step_multiplier,
            mode,
            material,
        })
    }

    /// Returns the density multiplier.
    #[must_use]
    pub fn density_multiplier(&self) -> f32 {
        self.density_multiplier
    }

    /// Returns the step multiplier (step length in voxels).
    #[must_use]
    pub fn step_multiplier(&self) -> f32 {
        self.step_multiplier
    }

    /// Returns the shading mode.
    #[must_use]
    pub fn mode(&self) -> ShadingMode {
        self.mode
    }

    /// Returns true if the grid is shaded as a level set.
    #[must_use]
    pub fn is_level_set(&self) -> bool {
        self.mode.is_level_set()
    }

    /// Returns the material description.
    #[must_use]
    pub fn material(&self) -> &MaterialDesc {
        &self.material
    }
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            density_multiplier: 1.0,
            step_multiplier: 1.0,
            mode: ShadingMode::FogVolume,
            material: MaterialDesc::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_step() {
        for step in [0.0, -1.0, f32::NAN] {
            let result =
                RenderParameters::new(1.0, step, ShadingMode::FogVolume, MaterialDesc::default());
            assert!(matches!(
                result,
                Err(VolumeError::InvalidParameter { name: "step_multiplier", .. })
            ));
        }
    }

    #[test]
    fn test_rejects_negative_density() {
        let result =
            RenderParameters::new(-0.1, 1.0, ShadingMode::LevelSet, MaterialDesc::default());
        assert!(matches!(
            result,
            Err(VolumeError::InvalidParameter { name: "density_multiplier", .. })
        ));
    }

    #[test]
    fn test_zero_density_is_valid() {
        let params =
            RenderParameters::new(0.0, 0.25, ShadingMode::LevelSet, MaterialDesc::default())
                .unwrap();
        assert!(params.is_level_set());
        assert_eq!(params.density_multiplier(), 0.0);
    }

    #[test]
    fn test_mode_from_level_set_flag() {
        assert_eq!(ShadingMode::from_level_set(true), ShadingMode::LevelSet);
        assert_eq!(ShadingMode::from_level_set(false), ShadingMode::FogVolume);
    }
}
