//! Vulkan memory backend using ash.
//!
//! Wraps `vkAllocateMemory`/`vkFreeMemory` and whole-block mapping. Device
//! capabilities are queried once at construction and cached.

use std::ptr::NonNull;

use ash::vk;

use crate::error::AllocatorError;
use crate::memory_type::{MemoryPropertyFlags, MemoryTypeDescriptor};

use super::{DeviceBlock, MemoryBackend};

/// Convert Vulkan memory property flags to the crate's representation.
///
/// The bit values match `VkMemoryPropertyFlagBits`, so this is a
/// truncating reinterpretation (bits beyond the modeled set are dropped).
fn convert_memory_type(memory_type: &vk::MemoryType) -> MemoryTypeDescriptor {
    MemoryTypeDescriptor::new(
        MemoryPropertyFlags::from_bits_truncate(memory_type.property_flags.as_raw()),
        memory_type.heap_index,
    )
}

/// Vulkan-backed memory provider.
pub struct VulkanBackend {
    device: ash::Device,
    memory_types: Vec<MemoryTypeDescriptor>,
    granularity: u64,
}

impl VulkanBackend {
    /// Create a backend for the given device, caching its memory-type
    /// table and buffer/image granularity.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;

        let memory_types = memory_properties.memory_types
            [..memory_properties.memory_type_count as usize]
            .iter()
            .map(convert_memory_type)
            .collect::<Vec<_>>();
        let granularity = limits.buffer_image_granularity.max(1);

        log::info!(
            "Vulkan memory backend: {} memory types, buffer/image granularity {}",
            memory_types.len(),
            granularity
        );

        Self {
            device,
            memory_types,
            granularity,
        }
    }
}

impl MemoryBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
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
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }.map_err(
            |e| match e {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    AllocatorError::OutOfDeviceMemory
                }
                e => AllocatorError::Internal(format!("vkAllocateMemory failed: {e:?}")),
            },
        )?;

        log::debug!("allocated {size}-byte block in memory type {memory_type_index}");
        Ok(DeviceBlock::Vulkan {
            device: self.device.clone(),
            memory,
            size,
        })
    }

    fn map_block(&self, block: &DeviceBlock) -> Result<NonNull<u8>, AllocatorError> {
        match block {
            DeviceBlock::Vulkan { memory, .. } => {
                let ptr = unsafe {
                    self.device.map_memory(
                        *memory,
                        0,
                        vk::WHOLE_SIZE,
                        vk::MemoryMapFlags::empty(),
                    )
                }
                .map_err(|e| AllocatorError::MappingFailed(format!("vkMapMemory failed: {e:?}")))?;
                NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
                    AllocatorError::MappingFailed("vkMapMemory returned null".to_string())
                })
            }
            DeviceBlock::Dummy { .. } => Err(AllocatorError::MappingFailed(
                "dummy block passed to Vulkan backend".to_string(),
            )),
        }
    }

    fn unmap_block(&self, block: &DeviceBlock) {
        if let DeviceBlock::Vulkan { memory, .. } = block {
            unsafe {
                self.device.unmap_memory(*memory);
            }
        }
    }
}
