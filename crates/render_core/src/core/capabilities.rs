//! Device capability set
//!
//! Extension availability is decided once, when the physical device is
//! selected, and handed to the device constructor. Nothing reads or writes
//! it afterwards.

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Optional device extensions and features the backend may take advantage of
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceCapabilities: u32 {
        /// `VK_KHR_get_memory_requirements2` (promoted in 1.1)
        const GET_MEMORY_REQUIREMENTS2 = 1 << 0;
        /// `VK_KHR_get_physical_device_properties2` (promoted in 1.1)
        const GET_PHYSICAL_DEVICE_PROPERTIES2 = 1 << 1;
        /// `VK_KHR_dedicated_allocation` (promoted in 1.1)
        const DEDICATED_ALLOCATION = 1 << 2;
        /// `VK_KHR_bind_memory2` (promoted in 1.1)
        const BIND_MEMORY2 = 1 << 3;
        /// `VK_EXT_memory_budget`
        const MEMORY_BUDGET = 1 << 4;
        /// `VK_AMD_device_coherent_memory`
        const AMD_DEVICE_COHERENT_MEMORY = 1 << 5;
        /// `VK_KHR_buffer_device_address` or `VK_EXT_buffer_device_address`
        const BUFFER_DEVICE_ADDRESS = 1 << 6;
        /// Sparse binding feature
        const SPARSE_BINDING = 1 << 7;
    }
}

impl DeviceCapabilities {
    /// Derive the capability set from the device extension names reported by
    /// the driver.
    ///
    /// Extensions promoted to core in `api_version` are not recorded: the
    /// allocator picks them up from the API version instead.
    pub fn from_extensions<'a>(api_version: u32, extensions: impl IntoIterator<Item = &'a str>) -> Self {
        let pre_1_1 = vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) == 0;
        let mut caps = Self::empty();

        for name in extensions {
            caps |= match name {
                "VK_KHR_get_memory_requirements2" if pre_1_1 => Self::GET_MEMORY_REQUIREMENTS2,
                "VK_KHR_get_physical_device_properties2" if pre_1_1 => Self::GET_PHYSICAL_DEVICE_PROPERTIES2,
                "VK_KHR_dedicated_allocation" if pre_1_1 => Self::DEDICATED_ALLOCATION,
                "VK_KHR_bind_memory2" if pre_1_1 => Self::BIND_MEMORY2,
                "VK_EXT_memory_budget" => Self::MEMORY_BUDGET,
                "VK_AMD_device_coherent_memory" => Self::AMD_DEVICE_COHERENT_MEMORY,
                "VK_KHR_buffer_device_address" | "VK_EXT_buffer_device_address" => {
                    Self::BUFFER_DEVICE_ADDRESS
                }
                _ => Self::empty(),
            };
        }

        // The budget extension needs properties2, either core or as an extension
        if caps.contains(Self::MEMORY_BUDGET) && pre_1_1 && !caps.contains(Self::GET_PHYSICAL_DEVICE_PROPERTIES2) {
            caps.remove(Self::MEMORY_BUDGET);
        }

        caps
    }

    /// Allocator creation flags implied by this capability set
    #[must_use]
    pub fn allocator_flags(self) -> vk_mem::AllocatorCreateFlags {
        let mut flags = vk_mem::AllocatorCreateFlags::empty();
        if self.contains(Self::DEDICATED_ALLOCATION) {
            flags |= vk_mem::AllocatorCreateFlags::KHR_DEDICATED_ALLOCATION;
        }
        if self.contains(Self::BIND_MEMORY2) {
            flags |= vk_mem::AllocatorCreateFlags::KHR_BIND_MEMORY2;
        }
        if self.contains(Self::MEMORY_BUDGET) {
            flags |= vk_mem::AllocatorCreateFlags::EXT_MEMORY_BUDGET;
        }
        if self.contains(Self::AMD_DEVICE_COHERENT_MEMORY) {
            flags |= vk_mem::AllocatorCreateFlags::AMD_DEVICE_COHERENT_MEMORY;
        }
        if self.contains(Self::BUFFER_DEVICE_ADDRESS) {
            flags |= vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        }
        flags
    }
}
