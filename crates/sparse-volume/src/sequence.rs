//! Frame-by-frame volume animation.

use std::f32::consts::FRAC_PI_2;

use glam::Mat4;

use crate::component::VolumeComponent;
use crate::{CommandSender, ProxyDesc, RenderBufferId, Result, VolumeError, VoxelPayload};

/// Orientation applied to sequence volumes: a -90 degree roll, turning
/// Y-up grids into a Z-up world.
#[must_use]
pub fn sequence_default_transform() -> Mat4 {
    Mat4::from_rotation_x(-FRAC_PI_2)
}

/// An ordered list of grids played back over time.
///
/// Each time the shown frame changes, its payload is uploaded into a fresh
/// buffer and the proxy is pointed at it; the previous buffer goes through
/// deferred release on the render timeline.
#[derive(Debug)]
pub struct VolumeSequence {
    name: String,
    frames: Vec<VoxelPayload>,
    frame_rate: f32,
    looping: bool,
    component: VolumeComponent,
    current: Option<usize>,
}

impl VolumeSequence {
    /// Creates a sequence and registers its proxy.
    ///
    /// `desc.local_to_world` is composed with [`sequence_default_transform`].
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::EmptySequence`] without frames and
    /// [`VolumeError::InvalidParameter`] for a non-positive frame rate.
    pub fn new(
        name: impl Into<String>,
        sender: CommandSender,
        mut desc: ProxyDesc,
        frames: Vec<VoxelPayload>,
        frame_rate: f32,
    ) -> Result<Self> {
        let name = name.into();
        if frames.is_empty() {
            return Err(VolumeError::EmptySequence(name));
        }
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(VolumeError::InvalidParameter {
                name: "frame_rate",
                reason: format!("must be positive, got {frame_rate}"),
            });
        }

        desc.local_to_world *= sequence_default_transform();
        let mut component = VolumeComponent::new(sender, desc);
        component.register()?;
        log::debug!("volume sequence '{name}': {} frames at {frame_rate} fps", frames.len());

        Ok(Self {
            name,
            frames,
            frame_rate,
            looping: true,
            component,
            current: None,
        })
    }

    /// Sets whether playback wraps around or holds the last frame.
    #[must_use]
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Frame shown at `time` seconds.
    #[must_use]
    pub fn frame_index_at(&self, time: f32) -> usize {
        let count = self.frames.len();
        if !time.is_finite() || time <= 0.0 {
            return 0;
        }
        // Truncation is intended: the frame holds until the next one starts
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (time * self.frame_rate).floor() as usize;
        if self.looping {
            index % count
        } else {
            index.min(count - 1)
        }
    }

    /// Shows the frame for `time`. Returns true if a new frame was uploaded.
    pub fn set_time(&mut self, time: f32) -> Result<bool> {
        let index = self.frame_index_at(time);
        if self.current == Some(index) {
            return Ok(false);
        }
        self.component.upload_grid(self.frames[index].clone())?;
        self.current = Some(index);
        Ok(true)
    }

    /// Length of one pass through the frames, in seconds.
    #[must_use]
    pub fn duration(&self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let count = self.frames.len() as f32;
        count / self.frame_rate
    }

    /// Sequence name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frames per second.
    #[must_use]
    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    /// Index of the frame currently shown.
    #[must_use]
    pub fn current_frame(&self) -> Option<usize> {
        self.current
    }

    /// Buffer of the frame currently shown.
    #[must_use]
    pub fn render_buffer(&self) -> Option<RenderBufferId> {
        self.component.render_buffer()
    }

    /// Underlying component.
    #[must_use]
    pub fn component(&self) -> &VolumeComponent {
        &self.component
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command_queue, RenderCommand};
    use glam::{UVec3, Vec3};
    use proptest::prelude::*;

    fn frames(count: usize) -> Vec<VoxelPayload> {
        (0..count)
            .map(|i| VoxelPayload::from_f32(UVec3::ONE, &[i as f32]).unwrap())
            .collect()
    }

    #[test]
    fn test_default_transform_rolls_y_up_to_z_up() {
        let up = sequence_default_transform().transform_vector3(Vec3::Y);
        assert!((up - Vec3::NEG_Z).length() < 1e-6);
        let rotated = sequence_default_transform().transform_vector3(Vec3::Z);
        assert!((rotated - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_frame_index_loops_or_clamps() {
        let (sender, _receiver) = command_queue();
        let sequence =
            VolumeSequence::new("smoke", sender.clone(), ProxyDesc::default(), frames(4), 2.0)
                .unwrap();
        assert_eq!(sequence.frame_index_at(0.0), 0);
        assert_eq!(sequence.frame_index_at(0.6), 1);
        assert_eq!(sequence.frame_index_at(2.1), 0);
        assert!((sequence.duration() - 2.0).abs() < f32::EPSILON);

        let clamped = VolumeSequence::new("smoke", sender, ProxyDesc::default(), frames(4), 2.0)
            .unwrap()
            .with_looping(false);
        assert_eq!(clamped.frame_index_at(10.0), 3);
        assert_eq!(clamped.frame_index_at(-1.0), 0);
    }

    #[test]
    fn test_set_time_uploads_on_frame_change_only() {
        let (sender, receiver) = command_queue();
        let mut sequence =
            VolumeSequence::new("smoke", sender, ProxyDesc::default(), frames(3), 1.0).unwrap();
        assert!(sequence.set_time(0.0).unwrap());
        assert!(!sequence.set_time(0.5).unwrap());
        assert!(sequence.set_time(1.0).unwrap());
        assert_eq!(sequence.current_frame(), Some(1));

        let uploads = receiver
            .drain()
            .iter()
            .filter(|c| matches!(c, RenderCommand::CreateBuffer { .. }))
            .count();
        assert_eq!(uploads, 2);
    }

    #[test]
    fn test_invalid_sequences_rejected() {
        let (sender, _receiver) = command_queue();
        assert!(matches!(
            VolumeSequence::new("empty", sender.clone(), ProxyDesc::default(), Vec::new(), 24.0),
            Err(VolumeError::EmptySequence(name)) if name == "empty"
        ));
        assert!(matches!(
            VolumeSequence::new("still", sender, ProxyDesc::default(), frames(1), 0.0),
            Err(VolumeError::InvalidParameter { name: "frame_rate", .. })
        ));
    }

    proptest! {
        #[test]
        fn frame_index_stays_in_range(
            count in 1usize..16,
            frame_rate in 0.5f32..120.0,
            time in -10.0f32..1000.0,
            looping in any::<bool>(),
        ) {
            let (sender, _receiver) = command_queue();
            let sequence =
                VolumeSequence::new("prop", sender, ProxyDesc::default(), frames(count), frame_rate)
                    .unwrap()
                    .with_looping(looping);
            prop_assert!(sequence.frame_index_at(time) < count);
        }
    }
}
