//! Memory provider abstraction.
//!
//! The allocator consumes coarse memory blocks from a backend and
//! subdivides them itself; the backend is queried once for the device's
//! memory-type table and buffer/image granularity, then only asked to
//! allocate, free, map and unmap whole blocks.
//!
//! # Available Backends
//!
//! - `dummy` (default): host-memory-backed blocks for testing and development
//! - `vulkan-backend`: real device memory via ash

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use std::ptr::NonNull;

#[cfg(feature = "vulkan-backend")]
use ash::vk;

use crate::error::AllocatorError;
use crate::memory_type::MemoryTypeDescriptor;

/// Handle to one coarse device-memory block.
///
/// A chunk owns exactly one block for its lifetime. The block frees its
/// underlying memory when dropped.
pub enum DeviceBlock {
    /// Host heap allocation standing in for device memory.
    Dummy { base: NonNull<u8>, size: u64 },
    /// Real device memory allocated through Vulkan.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        memory: vk::DeviceMemory,
        size: u64,
    },
}

// SAFETY: the dummy base is an exclusively-owned heap allocation; Vulkan
// device-memory handles are plain ids that may be used from any thread.
unsafe impl Send for DeviceBlock {}
unsafe impl Sync for DeviceBlock {}

impl DeviceBlock {
    /// Size of the block in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for DeviceBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { size, .. } => f
                .debug_struct("DeviceBlock::Dummy")
                .field("size", size)
                .finish_non_exhaustive(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { memory, size, .. } => f
                .debug_struct("DeviceBlock::Vulkan")
                .field("memory", memory)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

impl Drop for DeviceBlock {
    fn drop(&mut self) {
        match self {
            Self::Dummy { base, size } => {
                // SAFETY: allocated in DummyBackend::allocate_block with
                // this exact layout.
                unsafe {
                    std::alloc::dealloc(base.as_ptr(), dummy::block_layout(*size));
                }
            }
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { device, memory, .. } => {
                // SAFETY: the allocator only drops a block after every
                // sub-allocation in it has been freed.
                unsafe {
                    device.free_memory(*memory, None);
                }
            }
        }
    }
}

/// Provider of coarse device-memory blocks.
///
/// Implementations wrap the graphics driver (or emulate one). All calls
/// are synchronous and never block on the device.
pub trait MemoryBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// The device's memory-type table. Stable for the process lifetime.
    fn memory_types(&self) -> Vec<MemoryTypeDescriptor>;

    /// The page size within which buffer and image resources of
    /// conflicting kinds may not coexist. Always a power of two.
    fn buffer_image_granularity(&self) -> u64;

    /// Allocate one coarse block of `size` bytes from the given memory type.
    fn allocate_block(
        &self,
        memory_type_index: u32,
        size: u64,
    ) -> Result<DeviceBlock, AllocatorError>;

    /// Return a coarse block to the driver.
    fn free_block(&self, block: DeviceBlock) {
        drop(block);
    }

    /// Map a block for host access. Only valid for host-visible types.
    fn map_block(&self, block: &DeviceBlock) -> Result<NonNull<u8>, AllocatorError>;

    /// Release a block's host mapping.
    fn unmap_block(&self, block: &DeviceBlock);
}
