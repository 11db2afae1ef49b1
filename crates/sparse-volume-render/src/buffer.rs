//! GPU-resident voxel buffers.
//!
//! A [`RenderBuffer`] owns the storage for one grid's voxel payload. Buffers
//! are created and destroyed on the render timeline only, through a
//! [`BufferAllocator`]: [`WgpuAllocator`] on a real device, or
//! [`HostAllocator`] when rendering headless without a GPU.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::UVec3;
use sparse_volume_core::{voxel_count, RenderBufferId, VolumeError, VoxelFormat, VoxelPayload};

use crate::error::{RenderError, RenderResult};

/// Backing memory of a render buffer.
#[derive(Debug)]
pub enum BufferStorage {
    /// A wgpu storage buffer.
    Gpu(wgpu::Buffer),
    /// Host memory standing in for a device buffer.
    Host(Box<[u8]>),
}

impl BufferStorage {
    /// Returns the wgpu buffer, if device-backed.
    #[must_use]
    pub fn as_wgpu(&self) -> Option<&wgpu::Buffer> {
        match self {
            BufferStorage::Gpu(buffer) => Some(buffer),
            BufferStorage::Host(_) => None,
        }
    }
}

/// Allocates and frees buffer storage.
pub trait BufferAllocator: Send + Sync {
    /// Allocator name for logging.
    fn name(&self) -> &'static str;

    /// Allocates zeroed storage of `size_in_bytes`.
    fn allocate(&self, label: &str, size_in_bytes: u64) -> RenderResult<BufferStorage>;

    /// Writes `bytes` at `offset`.
    fn write(&self, storage: &mut BufferStorage, offset: u64, bytes: &[u8]);

    /// Releases storage.
    fn free(&self, storage: BufferStorage);
}

/// Allocator backed by a wgpu device.
pub struct WgpuAllocator {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuAllocator {
    /// Creates an allocator on the given device.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }
}

impl BufferAllocator for WgpuAllocator {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn allocate(&self, label: &str, size_in_bytes: u64) -> RenderResult<BufferStorage> {
        let limits = self.device.limits();
        let max_binding = u64::from(limits.max_storage_buffer_binding_size);
        if size_in_bytes > max_binding || size_in_bytes > limits.max_buffer_size {
            return Err(RenderError::BufferCreationFailed(format!(
                "{size_in_bytes} bytes exceeds the device storage binding limit of {max_binding}"
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size_in_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::warn!("allocation of '{label}' failed: {err}");
            buffer.destroy();
            return Err(RenderError::OutOfMemory {
                requested: size_in_bytes,
            });
        }
        Ok(BufferStorage::Gpu(buffer))
    }

    fn write(&self, storage: &mut BufferStorage, offset: u64, bytes: &[u8]) {
        match storage {
            BufferStorage::Gpu(buffer) => self.queue.write_buffer(buffer, offset, bytes),
            BufferStorage::Host(data) => write_host(data, offset, bytes),
        }
    }

    fn free(&self, storage: BufferStorage) {
        if let BufferStorage::Gpu(buffer) = storage {
            buffer.destroy();
        }
    }
}

/// Allocator that keeps buffers in host memory under a byte budget.
///
/// Used for headless rendering and tests. Allocations beyond the budget fail
/// with [`RenderError::OutOfMemory`].
#[derive(Debug)]
pub struct HostAllocator {
    budget: u64,
    used: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl HostAllocator {
    /// Creates an allocator with the given byte budget.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            used: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Bytes currently allocated.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Number of successful allocations so far.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of frees so far.
    #[must_use]
    pub fn free_count(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }
}

impl BufferAllocator for HostAllocator {
    fn name(&self) -> &'static str {
        "host"
    }

    fn allocate(&self, _label: &str, size_in_bytes: u64) -> RenderResult<BufferStorage> {
        let len = usize::try_from(size_in_bytes).map_err(|_| RenderError::OutOfMemory {
            requested: size_in_bytes,
        })?;
        let reserved = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size_in_bytes)
                    .filter(|total| *total <= self.budget)
            });
        if reserved.is_err() {
            return Err(RenderError::OutOfMemory {
                requested: size_in_bytes,
            });
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(BufferStorage::Host(vec![0u8; len].into_boxed_slice()))
    }

    fn write(&self, storage: &mut BufferStorage, offset: u64, bytes: &[u8]) {
        if let BufferStorage::Host(data) = storage {
            write_host(data, offset, bytes);
        }
    }

    fn free(&self, storage: BufferStorage) {
        if let BufferStorage::Host(data) = storage {
            self.used.fetch_sub(data.len() as u64, Ordering::AcqRel);
            self.frees.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn write_host(data: &mut [u8], offset: u64, bytes: &[u8]) {
    let Ok(start) = usize::try_from(offset) else {
        return;
    };
    let end = start.saturating_add(bytes.len()).min(data.len());
    if start < end {
        data[start..end].copy_from_slice(&bytes[..end - start]);
    }
}

/// One grid's voxel payload in buffer storage.
pub struct RenderBuffer {
    id: RenderBufferId,
    size_in_bytes: u64,
    format: VoxelFormat,
    dims: UVec3,
    storage: Option<BufferStorage>,
    allocator: Arc<dyn BufferAllocator>,
}

impl RenderBuffer {
    /// Allocates a zeroed buffer of `size_in_bytes` for voxels of `format`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::BufferCreationFailed`] for a zero size and
    /// propagates allocator failures.
    pub fn create(
        allocator: &Arc<dyn BufferAllocator>,
        id: RenderBufferId,
        size_in_bytes: u64,
        format: VoxelFormat,
    ) -> RenderResult<Self> {
        if size_in_bytes == 0 {
            return Err(RenderError::BufferCreationFailed(format!(
                "{id} has zero size"
            )));
        }
        let size_in_bytes = size_in_bytes.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let storage = allocator.allocate(&format!("vdb {id}"), size_in_bytes)?;
        log::debug!(
            "created {id}: {size_in_bytes} bytes of {format:?} ({})",
            allocator.name()
        );
        Ok(Self {
            id,
            size_in_bytes,
            format,
            dims: UVec3::ZERO,
            storage: Some(storage),
            allocator: Arc::clone(allocator),
        })
    }

    /// Allocates a buffer sized for `payload` and uploads it.
    ///
    /// # Errors
    ///
    /// Propagates [`RenderBuffer::create`] failures.
    pub fn from_payload(
        allocator: &Arc<dyn BufferAllocator>,
        id: RenderBufferId,
        payload: &VoxelPayload,
    ) -> RenderResult<Self> {
        let mut buffer = Self::create(
            allocator,
            id,
            payload.size_in_bytes() as u64,
            payload.format(),
        )?;
        buffer.dims = payload.dims();
        buffer.write(0, payload.bytes());
        Ok(buffer)
    }

    /// Writes bytes at `offset`. No-op once destroyed.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) {
        if let Some(storage) = self.storage.as_mut() {
            self.allocator.write(storage, offset, bytes);
        }
    }

    /// Releases the storage. Calling it again does nothing.
    pub fn destroy(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.allocator.free(storage);
            log::debug!("destroyed {}", self.id);
        }
    }

    /// Returns true until the buffer is destroyed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.storage.is_some()
    }

    /// Buffer id.
    #[must_use]
    pub fn id(&self) -> RenderBufferId {
        self.id
    }

    /// Allocated size.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    /// Voxel format.
    #[must_use]
    pub fn format(&self) -> VoxelFormat {
        self.format
    }

    /// Grid dimensions, zero for buffers created without a payload.
    #[must_use]
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Returns the storage while the buffer is valid.
    #[must_use]
    pub fn storage(&self) -> Option<&BufferStorage> {
        self.storage.as_ref()
    }
}

impl Drop for RenderBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for RenderBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBuffer")
            .field("id", &self.id)
            .field("size_in_bytes", &self.size_in_bytes)
            .field("format", &self.format)
            .field("dims", &self.dims)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// All render buffers alive on the render timeline.
pub struct RenderBufferPool {
    allocator: Arc<dyn BufferAllocator>,
    buffers: HashMap<RenderBufferId, RenderBuffer>,
    destroyed: u64,
}

impl RenderBufferPool {
    /// Creates an empty pool allocating through `allocator`.
    #[must_use]
    pub fn new(allocator: Arc<dyn BufferAllocator>) -> Self {
        Self {
            allocator,
            buffers: HashMap::new(),
            destroyed: 0,
        }
    }

    /// Allocates and uploads a buffer for `payload` under `id`.
    ///
    /// An existing buffer with the same id is destroyed first.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures; the id stays non-resident.
    pub fn create_from_payload(
        &mut self,
        id: RenderBufferId,
        payload: &VoxelPayload,
    ) -> RenderResult<()> {
        self.destroy(id);
        let buffer = RenderBuffer::from_payload(&self.allocator, id, payload)?;
        self.buffers.insert(id, buffer);
        Ok(())
    }

    /// Returns the buffer with `id`.
    #[must_use]
    pub fn get(&self, id: RenderBufferId) -> Option<&RenderBuffer> {
        self.buffers.get(&id)
    }

    /// Returns true if `id` is allocated and valid.
    #[must_use]
    pub fn is_resident(&self, id: RenderBufferId) -> bool {
        self.buffers.get(&id).is_some_and(RenderBuffer::is_valid)
    }

    /// Destroys the buffer with `id`. Returns false if it did not exist.
    pub fn destroy(&mut self, id: RenderBufferId) -> bool {
        match self.buffers.remove(&id) {
            Some(mut buffer) => {
                buffer.destroy();
                self.destroyed += 1;
                true
            }
            None => false,
        }
    }

    /// Destroys every buffer.
    pub fn clear(&mut self) {
        let ids: Vec<_> = self.buffers.keys().copied().collect();
        for id in ids {
            self.destroy(id);
        }
    }

    /// Number of live buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns true if no buffer is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Number of buffers destroyed so far.
    #[must_use]
    pub fn destroyed_count(&self) -> u64 {
        self.destroyed
    }

    /// Bytes held by live buffers.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.buffers.values().map(RenderBuffer::size_in_bytes).sum()
    }

    /// The pool's allocator.
    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }
}

impl std::fmt::Debug for RenderBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBufferPool")
            .field("allocator", &self.allocator.name())
            .field("buffers", &self.buffers.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

/// Packs float values into a half-float payload, two voxels per 32-bit word.
///
/// # Errors
///
/// Returns [`VolumeError::SizeMismatch`] if `values.len()` differs from the
/// voxel count of `dims`, and [`VolumeError::InvalidParameter`] if that count
/// overflows.
pub fn pack_half_payload(dims: UVec3, values: &[f32]) -> Result<VoxelPayload, VolumeError> {
    let count = voxel_count(dims)?;
    if values.len() != count {
        return Err(VolumeError::SizeMismatch {
            expected: count,
            actual: values.len(),
        });
    }
    let mut halves: Vec<half::f16> = values.iter().copied().map(half::f16::from_f32).collect();
    if halves.len() % 2 == 1 {
        halves.push(half::f16::ZERO);
    }
    let bytes: Vec<u8> = bytemuck::cast_slice(&halves).to_vec();
    VoxelPayload::from_bytes(dims, VoxelFormat::R16Float, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(budget: u64) -> (Arc<HostAllocator>, Arc<dyn BufferAllocator>) {
        let host = Arc::new(HostAllocator::new(budget));
        let dyn_alloc: Arc<dyn BufferAllocator> = host.clone();
        (host, dyn_alloc)
    }

    #[test]
    fn test_create_and_destroy_is_idempotent() {
        let (host, alloc) = host(1024);
        let mut buffer =
            RenderBuffer::create(&alloc, RenderBufferId::next(), 64, VoxelFormat::R32Float)
                .unwrap();
        assert!(buffer.is_valid());
        assert_eq!(host.used_bytes(), 64);

        buffer.destroy();
        buffer.destroy();
        assert!(!buffer.is_valid());
        assert_eq!(host.free_count(), 1);
        assert_eq!(host.used_bytes(), 0);
    }

    #[test]
    fn test_drop_releases_storage() {
        let (host, alloc) = host(1024);
        {
            let _buffer =
                RenderBuffer::create(&alloc, RenderBufferId::next(), 16, VoxelFormat::R32Float)
                    .unwrap();
        }
        assert_eq!(host.free_count(), 1);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let (_, alloc) = host(1024);
        let result = RenderBuffer::create(&alloc, RenderBufferId::next(), 0, VoxelFormat::R32Float);
        assert!(matches!(result, Err(RenderError::BufferCreationFailed(_))));
    }

    #[test]
    fn test_budget_exhaustion_surfaces_out_of_memory() {
        let (host, alloc) = host(100);
        let _a = RenderBuffer::create(&alloc, RenderBufferId::next(), 64, VoxelFormat::R32Float)
            .unwrap();
        let result =
            RenderBuffer::create(&alloc, RenderBufferId::next(), 64, VoxelFormat::R32Float);
        assert!(matches!(result, Err(RenderError::OutOfMemory { requested: 64 })));
        assert_eq!(host.allocation_count(), 1);
    }

    #[test]
    fn test_failed_allocation_keeps_budget() {
        let (host, alloc) = host(100);
        let result = alloc.allocate("too big", u64::MAX);
        assert!(matches!(result, Err(RenderError::OutOfMemory { .. })));
        assert_eq!(host.used_bytes(), 0);

        let fits = RenderBuffer::create(&alloc, RenderBufferId::next(), 100, VoxelFormat::R32Float)
            .unwrap();
        assert_eq!(host.used_bytes(), 100);
        drop(fits);
        assert_eq!(host.used_bytes(), 0);
    }

    #[test]
    fn test_payload_upload_lands_in_storage() {
        let (_, alloc) = host(1024);
        let payload = VoxelPayload::from_f32(UVec3::new(2, 1, 1), &[1.0, 2.0]).unwrap();
        let buffer = RenderBuffer::from_payload(&alloc, RenderBufferId::next(), &payload).unwrap();
        assert_eq!(buffer.dims(), UVec3::new(2, 1, 1));
        match buffer.storage() {
            Some(BufferStorage::Host(bytes)) => assert_eq!(&bytes[..], payload.bytes()),
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn test_pool_destroy_counts_once() {
        let (host, alloc) = host(1024);
        let mut pool = RenderBufferPool::new(alloc);
        let id = RenderBufferId::next();
        let payload = VoxelPayload::from_f32(UVec3::ONE, &[0.5]).unwrap();
        pool.create_from_payload(id, &payload).unwrap();
        assert!(pool.is_resident(id));

        assert!(pool.destroy(id));
        assert!(!pool.destroy(id));
        assert!(!pool.is_resident(id));
        assert_eq!(pool.destroyed_count(), 1);
        assert_eq!(host.free_count(), 1);
    }

    #[test]
    fn test_half_payload_packs_pairs() {
        let payload = pack_half_payload(UVec3::new(3, 1, 1), &[1.0, 0.5, -2.0]).unwrap();
        assert_eq!(payload.format(), VoxelFormat::R16Float);
        assert_eq!(payload.size_in_bytes(), 8);
        let b = payload.bytes();
        assert_eq!(half::f16::from_le_bytes([b[4], b[5]]).to_f32(), -2.0);
        assert_eq!(half::f16::from_le_bytes([b[6], b[7]]).to_f32(), 0.0);
    }

    #[test]
    fn test_half_payload_rejects_oversized_dims() {
        let result = pack_half_payload(UVec3::splat(1 << 22), &[1.0]);
        assert!(matches!(result, Err(VolumeError::InvalidParameter { name: "dims", .. })));
    }
}
