//! Dummy memory backend for testing and development.
//!
//! Blocks are plain host heap allocations, so mapping works and data
//! written through mapped pointers can be read back without GPU hardware.
//! The memory-type table, granularity and total budget are configurable to
//! emulate different devices.

use std::alloc::Layout;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::AllocatorError;
use crate::memory_type::{MemoryPropertyFlags, MemoryTypeDescriptor};

use super::{DeviceBlock, MemoryBackend};

/// Alignment of dummy blocks; generous enough for any sub-allocation test.
const BLOCK_ALIGNMENT: usize = 64;

/// Layout of a dummy block's backing allocation.
pub(crate) fn block_layout(size: u64) -> Layout {
    // SAFETY: the alignment is a power of two and the size was validated
    // against it when the block was allocated.
    unsafe { Layout::from_size_align_unchecked(size as usize, BLOCK_ALIGNMENT) }
}

/// Dummy memory backend.
#[derive(Debug)]
pub struct DummyBackend {
    memory_types: Vec<MemoryTypeDescriptor>,
    granularity: u64,
    /// Total bytes the backend will hand out before reporting
    /// out-of-device-memory. `None` means unlimited.
    budget: Option<u64>,
    bytes_in_use: Mutex<u64>,
}

impl DummyBackend {
    /// Create a backend modeling a discrete GPU: a device-local type, a
    /// coherent staging type, a small device-local host-visible type and a
    /// cached readback type.
    pub fn new() -> Self {
        use MemoryPropertyFlags as F;
        Self {
            memory_types: vec![
                MemoryTypeDescriptor::new(F::DEVICE_LOCAL, 0),
                MemoryTypeDescriptor::new(F::HOST_VISIBLE | F::HOST_COHERENT, 1),
                MemoryTypeDescriptor::new(F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT, 0),
                MemoryTypeDescriptor::new(F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED, 1),
            ],
            granularity: 1024,
            budget: None,
            bytes_in_use: Mutex::new(0),
        }
    }

    /// Replace the memory-type table.
    pub fn with_memory_types(mut self, memory_types: Vec<MemoryTypeDescriptor>) -> Self {
        self.memory_types = memory_types;
        self
    }

    /// Set the buffer/image granularity. Must be a power of two.
    pub fn with_granularity(mut self, granularity: u64) -> Self {
        assert!(granularity.is_power_of_two());
        self.granularity = granularity;
        self
    }

    /// Cap the total bytes the backend will hand out, so tests can provoke
    /// out-of-device-memory failures.
    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Total bytes currently handed out in live blocks.
    pub fn bytes_in_use(&self) -> u64 {
        *self.bytes_in_use.lock()
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn memory_types(&self) -> Vec<MemoryTypeDescriptor> {
        self.memory_types.clone()
    }

    fn buffer_image_granularity(&self) -> u64 {
        self.granularity
    }

    fn allocate_block(
        &self,
        memory_type_index: u32,
        size: u64,
    ) -> Result<DeviceBlock, AllocatorError> {
        if memory_type_index as usize >= self.memory_types.len() {
            return Err(AllocatorError::Internal(format!(
                "memory type index {memory_type_index} out of range"
            )));
        }
        let layout = Layout::from_size_align(size as usize, BLOCK_ALIGNMENT)
            .map_err(|e| AllocatorError::Internal(format!("bad block layout: {e}")))?;
        if layout.size() == 0 {
            return Err(AllocatorError::Internal("zero-size block".to_string()));
        }

        {
            let mut in_use = self.bytes_in_use.lock();
            if let Some(budget) = self.budget {
                if *in_use + size > budget {
                    log::trace!(
                        "DummyBackend: refusing block of {size} bytes ({} of {budget} in use)",
                        *in_use
                    );
                    return Err(AllocatorError::OutOfDeviceMemory);
                }
            }
            *in_use += size;
        }

        // SAFETY: layout has non-zero size.
        let base = unsafe { std::alloc::alloc(layout) };
        let Some(base) = NonNull::new(base) else {
            *self.bytes_in_use.lock() -= size;
            return Err(AllocatorError::OutOfDeviceMemory);
        };

        log::trace!("DummyBackend: allocated block of {size} bytes in type {memory_type_index}");
        Ok(DeviceBlock::Dummy { base, size })
    }

    fn free_block(&self, block: DeviceBlock) {
        log::trace!("DummyBackend: freeing block of {} bytes", block.size());
        *self.bytes_in_use.lock() -= block.size();
        drop(block);
    }

    fn map_block(&self, block: &DeviceBlock) -> Result<NonNull<u8>, AllocatorError> {
        match block {
            DeviceBlock::Dummy { base, .. } => Ok(*base),
            #[cfg(feature = "vulkan-backend")]
            DeviceBlock::Vulkan { .. } => Err(AllocatorError::MappingFailed(
                "Vulkan block passed to dummy backend".to_string(),
            )),
        }
    }

    fn unmap_block(&self, _block: &DeviceBlock) {
        // Host memory stays addressable; nothing to do.
    }
}
