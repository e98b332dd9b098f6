//! Hardware memory-type descriptors and selection.
//!
//! A device reports a fixed table of memory types at startup; every
//! allocation request carries a bitmask of admissible indices into that
//! table. Selection scores each admissible type by how many preferred
//! property bits it is missing and keeps the best.

use bitflags::bitflags;

use crate::types::MemoryUsage;

bitflags! {
    /// Property flags of a hardware memory type.
    ///
    /// Bit values mirror `VkMemoryPropertyFlagBits`, so the Vulkan backend
    /// converts by reinterpreting the raw bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        /// Memory local to the device; fastest for GPU access.
        const DEVICE_LOCAL = 1 << 0;
        /// Memory the host can map.
        const HOST_VISIBLE = 1 << 1;
        /// Host writes are visible to the device without explicit flushes.
        const HOST_COHERENT = 1 << 2;
        /// Host access goes through the CPU cache; fast host reads.
        const HOST_CACHED = 1 << 3;
        /// Memory that may be committed lazily by the driver.
        const LAZILY_ALLOCATED = 1 << 4;
    }
}

impl Default for MemoryPropertyFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// One entry of the device's memory-type table.
///
/// Populated once at allocator creation and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryTypeDescriptor {
    /// Property flags reported by the device.
    pub property_flags: MemoryPropertyFlags,
    /// Index of the heap this type allocates from.
    pub heap_index: u32,
}

impl MemoryTypeDescriptor {
    /// Create a new descriptor.
    pub fn new(property_flags: MemoryPropertyFlags, heap_index: u32) -> Self {
        Self {
            property_flags,
            heap_index,
        }
    }
}

/// Required and preferred property flags for a usage class.
pub(crate) fn usage_flags(usage: MemoryUsage) -> (MemoryPropertyFlags, MemoryPropertyFlags) {
    use MemoryPropertyFlags as F;
    match usage {
        MemoryUsage::Unknown => (F::empty(), F::empty()),
        MemoryUsage::DeviceLocal => (F::empty(), F::DEVICE_LOCAL),
        MemoryUsage::HostVisible => (F::HOST_VISIBLE | F::HOST_COHERENT, F::empty()),
        MemoryUsage::HostVisiblePreferDeviceLocal => {
            (F::HOST_VISIBLE | F::HOST_COHERENT, F::DEVICE_LOCAL)
        }
        MemoryUsage::DeviceLocalPreferHostVisible => {
            (F::DEVICE_LOCAL, F::HOST_VISIBLE | F::HOST_CACHED)
        }
    }
}

/// Select the best memory type for a usage class.
///
/// Types whose index bit is clear in `memory_type_bits` or that miss a
/// required flag are skipped; the remaining candidates are scored by the
/// number of preferred flags they lack (lower is better, ties keep the
/// lowest index). Returns `None` when no admissible type satisfies the
/// required flags.
///
/// Pure function: identical inputs always produce identical output.
pub fn select_memory_type(
    types: &[MemoryTypeDescriptor],
    usage: MemoryUsage,
    memory_type_bits: u32,
) -> Option<u32> {
    let (required, preferred) = usage_flags(usage);

    let mut best_index = None;
    let mut best_score = u32::MAX;

    for (index, descriptor) in types.iter().enumerate() {
        if index >= 32 || memory_type_bits & (1 << index) == 0 {
            continue;
        }
        if !descriptor.property_flags.contains(required) {
            continue;
        }

        // Number of preferred bits this type is missing.
        let score = (preferred - descriptor.property_flags).bits().count_ones();
        if score < best_score {
            best_score = score;
            best_index = Some(index as u32);
            if score == 0 {
                break;
            }
        }
    }

    best_index
}

#[cfg(test)]
mod tests {
    use super::*;

    use MemoryPropertyFlags as F;

    fn discrete_gpu_types() -> Vec<MemoryTypeDescriptor> {
        vec![
            MemoryTypeDescriptor::new(F::DEVICE_LOCAL, 0),
            MemoryTypeDescriptor::new(F::HOST_VISIBLE | F::HOST_COHERENT, 1),
            MemoryTypeDescriptor::new(F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT, 0),
            MemoryTypeDescriptor::new(F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED, 1),
        ]
    }

    #[test]
    fn test_device_local_prefers_device_local_bit() {
        let types = discrete_gpu_types();
        let index = select_memory_type(&types, MemoryUsage::DeviceLocal, u32::MAX).unwrap();
        assert!(types[index as usize]
            .property_flags
            .contains(F::DEVICE_LOCAL));
    }

    #[test]
    fn test_host_visible_requires_coherent() {
        let types = vec![
            MemoryTypeDescriptor::new(F::DEVICE_LOCAL, 0),
            MemoryTypeDescriptor::new(F::HOST_VISIBLE, 1),
            MemoryTypeDescriptor::new(F::HOST_VISIBLE | F::HOST_COHERENT, 1),
        ];
        // Type 1 is host-visible but not coherent; type 2 must win.
        assert_eq!(
            select_memory_type(&types, MemoryUsage::HostVisible, u32::MAX),
            Some(2)
        );
    }

    #[test]
    fn test_admissible_bits_filter() {
        let types = discrete_gpu_types();
        // Only type 1 admissible: DeviceLocal has no required bits, so the
        // non-device-local type is still selected.
        assert_eq!(
            select_memory_type(&types, MemoryUsage::DeviceLocal, 0b0010),
            Some(1)
        );
        // No admissible type satisfies required flags.
        assert_eq!(
            select_memory_type(&types, MemoryUsage::HostVisible, 0b0001),
            None
        );
    }

    #[test]
    fn test_preferred_scoring_picks_closest_match() {
        let types = discrete_gpu_types();
        // HostVisiblePreferDeviceLocal: types 1, 2 and 3 satisfy the
        // required flags, type 2 also has DEVICE_LOCAL.
        assert_eq!(
            select_memory_type(&types, MemoryUsage::HostVisiblePreferDeviceLocal, u32::MAX),
            Some(2)
        );
        // DeviceLocalPreferHostVisible: only types 0 and 2 are device-local;
        // type 2 is also host-visible.
        assert_eq!(
            select_memory_type(&types, MemoryUsage::DeviceLocalPreferHostVisible, u32::MAX),
            Some(2)
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let types = discrete_gpu_types();
        for usage in [
            MemoryUsage::Unknown,
            MemoryUsage::DeviceLocal,
            MemoryUsage::HostVisible,
            MemoryUsage::HostVisiblePreferDeviceLocal,
            MemoryUsage::DeviceLocalPreferHostVisible,
        ] {
            let first = select_memory_type(&types, usage, u32::MAX);
            let second = select_memory_type(&types, usage, u32::MAX);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_no_types_yields_none() {
        assert_eq!(select_memory_type(&[], MemoryUsage::Unknown, u32::MAX), None);
    }
}
