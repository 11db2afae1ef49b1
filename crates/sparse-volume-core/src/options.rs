//! Configuration options for sparse-volume.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transform::DEFAULT_MAX_RAY_STEPS;

/// Global configuration options for volume rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeRenderOptions {
    /// Frames a retired buffer waits before it is destroyed (minimum 1).
    pub frames_in_flight: u32,

    /// Upper bound on ray-march iterations per pixel.
    pub max_ray_steps: u32,

    /// Distance culling applied to views that do not set their own.
    pub default_max_draw_distance: Option<f32>,

    /// Directory mapped to the `/Plugin/VdbVolume` virtual shader path.
    pub shader_directory: PathBuf,

    /// Byte budget of the host allocator used without a GPU device.
    pub host_buffer_budget: u64,
}

impl Default for VolumeRenderOptions {
    fn default() -> Self {
        Self {
            frames_in_flight: 1,
            max_ray_steps: DEFAULT_MAX_RAY_STEPS,
            default_max_draw_distance: None,
            shader_directory: PathBuf::from("shaders"),
            host_buffer_budget: 512 * 1024 * 1024,
        }
    }
}

impl VolumeRenderOptions {
    /// Parses options from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut options: Self = serde_json::from_str(json)?;
        options.sanitize();
        Ok(options)
    }

    /// Reads options from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes options to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn sanitize(&mut self) {
        if self.frames_in_flight == 0 {
            log::warn!("frames_in_flight = 0 would release buffers still in use; using 1");
            self.frames_in_flight = 1;
        }
        if self.max_ray_steps == 0 {
            self.max_ray_steps = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let options = VolumeRenderOptions::from_json_str(r#"{ "max_ray_steps": 512 }"#).unwrap();
        assert_eq!(options.max_ray_steps, 512);
        assert_eq!(options.frames_in_flight, 1);
        assert_eq!(options.shader_directory, PathBuf::from("shaders"));
    }

    #[test]
    fn test_zero_frames_in_flight_is_raised() {
        let options =
            VolumeRenderOptions::from_json_str(r#"{ "frames_in_flight": 0 }"#).unwrap();
        assert_eq!(options.frames_in_flight, 1);
    }

    #[test]
    fn test_json_round_trip() {
        let options = VolumeRenderOptions {
            frames_in_flight: 3,
            default_max_draw_distance: Some(250.0),
            ..Default::default()
        };
        let json = options.to_json_string().unwrap();
        assert_eq!(VolumeRenderOptions::from_json_str(&json).unwrap(), options);
    }
}
