//! Common types for device-memory sub-allocation.
//!
//! This module contains the usage classes, resource kinds, request
//! descriptors and the allocation handle returned to callers.

use std::ptr::NonNull;

/// Intended access pattern for an allocation.
///
/// Drives both memory-type selection and the size of newly created chunks
/// (device-local chunks are larger than host-visible ones, since they are
/// rarer and more expensive to create).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryUsage {
    /// No stated preference; the first admissible memory type wins.
    #[default]
    Unknown,
    /// GPU-only data: render targets, static meshes, sampled images.
    DeviceLocal,
    /// CPU-written data: staging and readback buffers.
    HostVisible,
    /// CPU-written data that profits from device-local placement
    /// (dynamic uniform buffers on resizable-BAR hardware).
    HostVisiblePreferDeviceLocal,
    /// GPU data the CPU occasionally reads back; prefers cached host access.
    DeviceLocalPreferHostVisible,
}

/// What a placed region holds.
///
/// `Free` regions carry no resource. The distinction between linear and
/// optimal image tiling matters for granularity-conflict checks: the
/// hardware forbids certain kind pairs from sharing a memory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Unoccupied space.
    Free,
    /// A buffer resource.
    Buffer,
    /// A linearly-tiled image.
    ImageLinear,
    /// An optimally-tiled image.
    ImageOptimal,
}

impl ResourceKind {
    /// Whether two resource kinds may not share a buffer/image granularity page.
    ///
    /// The table is symmetric and encodes a hardware aliasing hazard, not a
    /// policy choice: raw buffer data and optimally-tiled image data (and
    /// any two distinctly-cached linear mappings) corrupt each other when
    /// they land on the same granule.
    pub fn conflicts_with(self, other: ResourceKind) -> bool {
        use ResourceKind::*;
        match (self, other) {
            (Free, _) | (_, Free) => false,
            (Buffer, ImageOptimal) | (ImageOptimal, Buffer) => true,
            (ImageLinear, ImageOptimal) | (ImageOptimal, ImageLinear) => true,
            (ImageLinear, ImageLinear) => true,
            _ => false,
        }
    }
}

/// Descriptor for requesting a sub-allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationRequest {
    /// Debug label, reported in leak logs.
    pub label: Option<String>,
    /// Size in bytes. Must be non-zero.
    pub size: u64,
    /// Required placement alignment in bytes. Must be a power of two.
    pub alignment: u64,
    /// Kind of resource that will be bound to the allocation.
    pub kind: ResourceKind,
    /// Intended access pattern.
    pub usage: MemoryUsage,
    /// Bitmask of admissible hardware memory-type indices
    /// (`VkMemoryRequirements::memoryTypeBits`); bit N set means type N
    /// may back this resource.
    pub memory_type_bits: u32,
}

impl AllocationRequest {
    /// Create a new request admitting every memory type.
    pub fn new(size: u64, alignment: u64, kind: ResourceKind, usage: MemoryUsage) -> Self {
        Self {
            label: None,
            size,
            alignment,
            kind,
            usage,
            memory_type_bits: u32::MAX,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Restrict the admissible memory types.
    pub fn with_memory_type_bits(mut self, bits: u32) -> Self {
        self.memory_type_bits = bits;
        self
    }
}

/// Handle to a placed sub-allocation.
///
/// A plain copyable value. `offset` and `mapped_ptr` stay valid until the
/// allocation is freed; the `(memory_type_index, chunk_id, region_id)`
/// triple identifies the owning chunk and region for `free` and is
/// validated there, so a stale handle fails the lookup instead of touching
/// freed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub(crate) memory_type_index: u32,
    pub(crate) chunk_id: u64,
    pub(crate) region_id: u32,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) mapped_ptr: Option<NonNull<u8>>,
}

// SAFETY: the handle is immutable value data. The mapped pointer targets a
// host-visible coarse block that outlives the allocation, and the allocator
// never hands the same byte range to two live allocations.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    /// Hardware memory-type index the allocation was placed in.
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Byte offset of the allocation within its coarse block.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size in bytes as requested by the caller.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Host pointer to the start of the allocation, if the backing memory
    /// is host-visible.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped_ptr
    }

    /// View the allocation as a mutable byte slice.
    ///
    /// Returns `None` for non-host-visible memory.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other slice over the same allocation is
    /// live and that the allocation has not been freed.
    pub unsafe fn mapped_slice_mut(&self) -> Option<&mut [u8]> {
        self.mapped_ptr
            .map(|ptr| unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) })
    }
}

/// Sizing policy for newly created chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Chunk size for device-local usages.
    pub device_local_chunk_size: u64,
    /// Chunk size for host-visible usages.
    pub host_visible_chunk_size: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            device_local_chunk_size: 256 * 1024 * 1024,
            host_visible_chunk_size: 64 * 1024 * 1024,
        }
    }
}

impl AllocatorConfig {
    /// Chunk size used for the given usage class.
    pub fn chunk_size_for(&self, usage: MemoryUsage) -> u64 {
        match usage {
            MemoryUsage::DeviceLocal | MemoryUsage::DeviceLocalPreferHostVisible => {
                self.device_local_chunk_size
            }
            MemoryUsage::HostVisible
            | MemoryUsage::HostVisiblePreferDeviceLocal
            | MemoryUsage::Unknown => self.host_visible_chunk_size,
        }
    }
}
