//! Vulkan backend on `ash` and `vk-mem`
//!
//! Instance, physical device, logical device, queue and surface are chosen
//! upstream and handed over in [`DeviceHandles`]; this backend owns
//! everything it creates from them.

mod commands;
mod descriptors;
mod device;
mod render_pass;
mod swapchain;

pub use descriptors::{create_descriptor_set_layout, DescriptorPoolAllocator, DescriptorSetWriter};
pub use device::{DeviceHandles, VulkanDevice};
pub use render_pass::{RenderPass, DEPTH_FORMAT};
pub use swapchain::Swapchain;
