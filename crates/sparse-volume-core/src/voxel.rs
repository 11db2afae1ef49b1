//! Voxel payloads handed from the asset side to the render timeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::UVec3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};

/// Element format of a voxel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VoxelFormat {
    /// One 32-bit float per voxel.
    #[default]
    R32Float,
    /// One 16-bit float per voxel, packed two per 32-bit word.
    R16Float,
}

impl VoxelFormat {
    /// Bytes occupied by one voxel.
    #[must_use]
    pub fn bytes_per_voxel(self) -> usize {
        match self {
            VoxelFormat::R32Float => 4,
            VoxelFormat::R16Float => 2,
        }
    }

    /// Shader-side format tag.
    #[must_use]
    pub fn shader_tag(self) -> u32 {
        match self {
            VoxelFormat::R32Float => 0,
            VoxelFormat::R16Float => 1,
        }
    }

    /// Buffer size for `voxel_count` voxels, rounded up to a 4-byte multiple.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidParameter`] if the size overflows `usize`.
    pub fn buffer_size(self, voxel_count: usize) -> Result<usize> {
        voxel_count
            .checked_mul(self.bytes_per_voxel())
            .and_then(|bytes| bytes.checked_next_multiple_of(4))
            .ok_or_else(|| VolumeError::InvalidParameter {
                name: "dims",
                reason: format!("{voxel_count} voxels of {self:?} overflow the address space"),
            })
    }
}

/// Process-unique identifier of a render buffer.
///
/// Ids are minted on the simulation side before the buffer exists so that
/// later commands can reference it in queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderBufferId(pub u64);

impl RenderBufferId {
    /// Mints a fresh id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RenderBufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// A dense voxel grid ready for upload.
///
/// The byte payload is shared so sequences can resend a frame without copying.
#[derive(Debug, Clone)]
pub struct VoxelPayload {
    dims: UVec3,
    format: VoxelFormat,
    bytes: Arc<[u8]>,
}

impl VoxelPayload {
    /// Wraps raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::SizeMismatch`] if `bytes` does not hold exactly
    /// `dims` voxels of `format` (padded to a 4-byte multiple), and
    /// [`VolumeError::InvalidParameter`] if that size is not addressable.
    pub fn from_bytes(
        dims: UVec3,
        format: VoxelFormat,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<Self> {
        let bytes = bytes.into();
        let expected = format.buffer_size(voxel_count(dims)?)?;
        if bytes.len() != expected {
            return Err(VolumeError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { dims, format, bytes })
    }

    /// Builds a 32-bit float payload from values in x-fastest order.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::SizeMismatch`] if `values.len()` differs from the
    /// voxel count of `dims`.
    pub fn from_f32(dims: UVec3, values: &[f32]) -> Result<Self> {
        let count = voxel_count(dims)?;
        if values.len() != count {
            return Err(VolumeError::SizeMismatch {
                expected: count,
                actual: values.len(),
            });
        }
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(dims, VoxelFormat::R32Float, bytes)
    }

    /// Grid dimensions.
    #[must_use]
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Element format.
    #[must_use]
    pub fn format(&self) -> VoxelFormat {
        self.format
    }

    /// Raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the payload in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Number of voxels in a grid of `dims`.
///
/// # Errors
///
/// Returns [`VolumeError::InvalidParameter`] if the count overflows `usize`.
pub fn voxel_count(dims: UVec3) -> Result<usize> {
    (dims.x as usize)
        .checked_mul(dims.y as usize)
        .and_then(|xy| xy.checked_mul(dims.z as usize))
        .ok_or_else(|| VolumeError::InvalidParameter {
            name: "dims",
            reason: format!("{dims} voxels overflow the address space"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_pads_half_floats() {
        assert_eq!(VoxelFormat::R16Float.buffer_size(3).unwrap(), 8);
        assert_eq!(VoxelFormat::R16Float.buffer_size(4).unwrap(), 8);
        assert_eq!(VoxelFormat::R32Float.buffer_size(3).unwrap(), 12);
        assert!(VoxelFormat::R32Float.buffer_size(usize::MAX / 2).is_err());
    }

    #[test]
    fn test_oversized_dims_are_rejected() {
        let dims = UVec3::splat(1 << 22);
        assert!(matches!(
            VoxelPayload::from_bytes(dims, VoxelFormat::R32Float, vec![0u8; 4]),
            Err(VolumeError::InvalidParameter { name: "dims", .. })
        ));
        assert!(matches!(
            VoxelPayload::from_f32(dims, &[0.0]),
            Err(VolumeError::InvalidParameter { name: "dims", .. })
        ));
        assert!(voxel_count(UVec3::new(u32::MAX, u32::MAX, 2)).is_err());
        assert_eq!(voxel_count(UVec3::new(2, 3, 4)).unwrap(), 24);
    }

    #[test]
    fn test_from_f32_checks_count() {
        let dims = UVec3::new(2, 2, 2);
        assert!(VoxelPayload::from_f32(dims, &[0.0; 8]).is_ok());
        assert!(matches!(
            VoxelPayload::from_f32(dims, &[0.0; 7]),
            Err(VolumeError::SizeMismatch { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn test_buffer_ids_are_unique() {
        let a = RenderBufferId::next();
        let b = RenderBufferId::next();
        assert_ne!(a, b);
    }
}
