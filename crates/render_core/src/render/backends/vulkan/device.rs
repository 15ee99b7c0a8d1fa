//! Vulkan device: allocator, sync objects and resource creation
//!
//! [`VulkanDevice`] owns everything it creates from the externally selected
//! [`DeviceHandles`]: the `vk-mem` allocator, a command pool, every fence and
//! semaphore handed out, the swapchain with its per-image depth buffers and
//! framebuffers, and the offscreen render passes. The instance, logical
//! device and surface stay owned by the caller.

use std::collections::HashMap;

use ash::extensions::khr::Surface;
use ash::vk;
use slotmap::SlotMap;
use vk_mem::Alloc;

use super::render_pass::{RenderPass, DEPTH_FORMAT};
use super::swapchain::Swapchain;
use crate::core::DeviceCapabilities;
use crate::render::api::{
    AllocationId, BufferClass, GpuFramebuffer, GpuImage, MemoryDevice, ResourceLifetime, SyncDevice, VulkanError,
    VulkanResult,
};

/// Externally selected Vulkan objects the device is built on
#[derive(Clone)]
pub struct DeviceHandles {
    /// Instance the device was created from
    pub instance: ash::Instance,
    /// Selected physical device
    pub physical_device: vk::PhysicalDevice,
    /// Logical device
    pub device: ash::Device,
    /// Queue used for graphics, transfer and present
    pub queue: vk::Queue,
    /// Family of `queue`
    pub queue_family_index: u32,
    /// Presentation surface
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader
    pub surface_loader: Surface,
    /// API version the device was created with
    pub api_version: u32,
}

enum TrackedResource {
    Buffer(vk::Buffer),
    Image { image: vk::Image, view: vk::ImageView, sampler: vk::Sampler },
}

struct Tracked {
    allocation: vk_mem::Allocation,
    resource: TrackedResource,
}

/// Depth buffer and framebuffer of one swapchain image
pub(super) struct SwapchainTarget {
    pub(super) framebuffer: vk::Framebuffer,
    depth: GpuImage,
}

/// [`GpuDevice`](crate::render::api::GpuDevice) on `ash` and `vk-mem`
pub struct VulkanDevice {
    pub(super) handles: DeviceHandles,
    capabilities: DeviceCapabilities,
    allocator: vk_mem::Allocator,
    memory_types: [Option<u32>; BufferClass::ALL.len()],
    allocations: SlotMap<AllocationId, Tracked>,
    pub(super) command_pool: vk::CommandPool,
    fences: Vec<vk::Fence>,
    semaphores: Vec<vk::Semaphore>,
    pub(super) swapchain: Swapchain,
    pub(super) swapchain_pass: RenderPass,
    pub(super) swapchain_targets: Vec<SwapchainTarget>,
    offscreen_passes: HashMap<vk::Format, RenderPass>,
}

impl VulkanDevice {
    /// Build the device: swapchain for `initial_extent`, its render pass and
    /// framebuffers, the allocator and a resettable command pool
    pub fn new(
        handles: DeviceHandles,
        capabilities: DeviceCapabilities,
        initial_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        // Swapchain and its render pass
        let swapchain = Swapchain::new(&handles, initial_extent, vk::SwapchainKHR::null())?;
        let swapchain_pass = RenderPass::new_swapchain_pass(handles.device.clone(), swapchain.format().format)?;

        // Create memory allocator
        let allocator_info =
            vk_mem::AllocatorCreateInfo::new(&handles.instance, &handles.device, handles.physical_device)
                .flags(capabilities.allocator_flags())
                .vulkan_api_version(handles.api_version);
        let allocator = vk_mem::Allocator::new(allocator_info)
            .map_err(|e| VulkanError::InitializationFailed(format!("memory allocator: {e:?}")))?;

        // Create command pool
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(handles.queue_family_index);
        let command_pool = unsafe { handles.device.create_command_pool(&pool_info, None) }
            .map_err(|e| VulkanError::InitializationFailed(format!("command pool: {e:?}")))?;

        let mut device = Self {
            handles,
            capabilities,
            allocator,
            memory_types: [None; BufferClass::ALL.len()],
            allocations: SlotMap::with_key(),
            command_pool,
            fences: Vec::new(),
            semaphores: Vec::new(),
            swapchain,
            swapchain_pass,
            swapchain_targets: Vec::new(),
            offscreen_passes: HashMap::new(),
        };
        device.create_swapchain_targets()?;

        log::info!("Vulkan device ready with capabilities {:?}", device.capabilities);
        Ok(device)
    }

    /// Capability set the device was built with
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    /// Logical device
    pub fn raw_device(&self) -> &ash::Device {
        &self.handles.device
    }

    /// Render pass of the swapchain framebuffers, for pipeline creation
    pub fn swapchain_render_pass(&self) -> vk::RenderPass {
        self.swapchain_pass.handle()
    }

    /// Offscreen render pass for `format`, created on first use
    pub fn offscreen_render_pass(&mut self, format: vk::Format) -> VulkanResult<vk::RenderPass> {
        if let Some(pass) = self.offscreen_passes.get(&format) {
            return Ok(pass.handle());
        }
        let pass = RenderPass::new_offscreen_pass(self.handles.device.clone(), format)?;
        let handle = pass.handle();
        self.offscreen_passes.insert(format, pass);
        Ok(handle)
    }

    pub(super) fn create_swapchain_targets(&mut self) -> VulkanResult<()> {
        let extent = self.swapchain.extent();
        let views = self.swapchain.image_views().to_vec();

        for color_view in views {
            let depth = self.create_image(extent, DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT, false)?;
            let framebuffer = match self.create_framebuffer(self.swapchain_pass.handle(), &[color_view, depth.view], extent) {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    self.destroy_image(&depth);
                    return Err(e);
                }
            };
            self.swapchain_targets.push(SwapchainTarget { framebuffer, depth });
        }

        log::debug!("Created {} swapchain framebuffers", self.swapchain_targets.len());
        Ok(())
    }

    pub(super) fn destroy_swapchain_targets(&mut self) {
        for target in std::mem::take(&mut self.swapchain_targets) {
            unsafe { self.handles.device.destroy_framebuffer(target.framebuffer, None) };
            self.destroy_image(&target.depth);
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe { self.handles.device.create_framebuffer(&create_info, None) }
            .map_err(|e| VulkanError::InitializationFailed(format!("framebuffer: {e:?}")))
    }

    /// Device-local 2D image with a view, and a sampler when `sampled`
    fn create_image(
        &mut self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        sampled: bool,
    ) -> VulkanResult<GpuImage> {
        let aspect_mask = if format == DEPTH_FORMAT { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        let usage = if sampled { usage | vk::ImageUsageFlags::SAMPLED } else { usage };

        // Create image
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        };

        let (image, mut allocation) =
            unsafe { self.allocator.create_image(&image_info, &allocation_info) }.map_err(VulkanError::Api)?;

        // Create image view
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { self.handles.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(VulkanError::Api(e));
            }
        };

        // Create sampler for sampled images
        let sampler = if sampled {
            let sampler_info = vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
                .unnormalized_coordinates(false)
                .compare_enable(false)
                .compare_op(vk::CompareOp::ALWAYS)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .min_lod(0.0)
                .max_lod(0.0);
            match unsafe { self.handles.device.create_sampler(&sampler_info, None) } {
                Ok(sampler) => sampler,
                Err(e) => {
                    unsafe {
                        self.handles.device.destroy_image_view(view, None);
                        self.allocator.destroy_image(image, &mut allocation);
                    }
                    return Err(VulkanError::Api(e));
                }
            }
        } else {
            vk::Sampler::null()
        };

        let allocation = self
            .allocations
            .insert(Tracked { allocation, resource: TrackedResource::Image { image, view, sampler } });

        Ok(GpuImage { image, view, sampler, allocation, format, extent, lifetime: ResourceLifetime::Persistent })
    }
}

/// Memory requirements of a buffer class
fn allocation_info(class: BufferClass) -> vk_mem::AllocationCreateInfo {
    if class.is_host_visible() {
        vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ..Default::default()
        }
    } else {
        vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        }
    }
}

fn buffer_info(class: BufferClass, size: vk::DeviceSize) -> vk::BufferCreateInfo {
    vk::BufferCreateInfo::builder()
        .size(size)
        .usage(class.usage())
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .build()
}

impl MemoryDevice for VulkanDevice {
    fn prepare_memory_class(&mut self, class: BufferClass) -> VulkanResult<()> {
        let index = unsafe {
            self.allocator
                .find_memory_type_index_for_buffer_info(&buffer_info(class, 1), &allocation_info(class))
        }
        .map_err(|_| VulkanError::NoSuitableMemoryType)?;

        log::debug!("{class:?} buffers use memory type {index}");
        self.memory_types[class.index()] = Some(index);
        Ok(())
    }

    fn create_buffer(
        &mut self,
        class: BufferClass,
        capacity: vk::DeviceSize,
    ) -> VulkanResult<(vk::Buffer, AllocationId)> {
        let memory_type = self.memory_types[class.index()]
            .ok_or_else(|| VulkanError::invalid(format!("{class:?} memory class was never prepared")))?;
        let allocation_info =
            vk_mem::AllocationCreateInfo { memory_type_bits: 1 << memory_type, ..allocation_info(class) };

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_info(class, capacity), &allocation_info) }
            .map_err(VulkanError::Api)?;

        let id = self.allocations.insert(Tracked { allocation, resource: TrackedResource::Buffer(buffer) });
        Ok((buffer, id))
    }

    fn write_buffer(&mut self, allocation: AllocationId, data: &[u8]) -> VulkanResult<()> {
        let tracked = self
            .allocations
            .get_mut(allocation)
            .ok_or_else(|| VulkanError::invalid("write to a released allocation"))?;

        unsafe {
            let mapped = self.allocator.map_memory(&mut tracked.allocation).map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
            self.allocator.unmap_memory(&mut tracked.allocation);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationId) {
        match self.allocations.remove(allocation) {
            Some(mut tracked) => unsafe { self.allocator.destroy_buffer(buffer, &mut tracked.allocation) },
            None => log::error!("Buffer {buffer:?} released with an unknown allocation"),
        }
    }

    fn create_texture(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<GpuImage> {
        self.create_image(extent, format, vk::ImageUsageFlags::TRANSFER_DST, true)
    }

    fn create_offscreen_target(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<GpuFramebuffer> {
        let render_pass = self.offscreen_render_pass(format)?;
        let color = self.create_image(extent, format, vk::ImageUsageFlags::COLOR_ATTACHMENT, true)?;
        let depth = match self.create_image(extent, DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT, false) {
            Ok(depth) => depth,
            Err(e) => {
                self.destroy_image(&color);
                return Err(e);
            }
        };

        match self.create_framebuffer(render_pass, &[color.view, depth.view], extent) {
            Ok(framebuffer) => Ok(GpuFramebuffer { framebuffer, render_pass, extent, color, depth }),
            Err(e) => {
                self.destroy_image(&color);
                self.destroy_image(&depth);
                Err(e)
            }
        }
    }

    fn destroy_image(&mut self, image: &GpuImage) {
        let Some(mut tracked) = self.allocations.remove(image.allocation) else {
            log::error!("Image {:?} released with an unknown allocation", image.image);
            return;
        };
        unsafe {
            if image.sampler != vk::Sampler::null() {
                self.handles.device.destroy_sampler(image.sampler, None);
            }
            self.handles.device.destroy_image_view(image.view, None);
            self.allocator.destroy_image(image.image, &mut tracked.allocation);
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: &GpuFramebuffer) {
        unsafe { self.handles.device.destroy_framebuffer(framebuffer.framebuffer, None) };
        self.destroy_image(&framebuffer.color);
        self.destroy_image(&framebuffer.depth);
    }
}

impl SyncDevice for VulkanDevice {
    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.handles.device.create_fence(&create_info, None) }.map_err(VulkanError::Api)?;
        self.fences.push(fence);
        Ok(fence)
    }

    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore =
            unsafe { self.handles.device.create_semaphore(&create_info, None) }.map_err(VulkanError::Api)?;
        self.semaphores.push(semaphore);
        Ok(semaphore)
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        match unsafe { self.handles.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(VulkanError::FenceTimeout { timeout_ns }),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.handles.device.reset_fences(&[fence]) }.map_err(VulkanError::Api)
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        unsafe { self.handles.device.device_wait_idle() }.map_err(VulkanError::Api)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Device wait before teardown failed: {e}");
        }

        self.destroy_swapchain_targets();

        if !self.allocations.is_empty() {
            log::warn!("{} allocations still alive at device teardown", self.allocations.len());
        }
        // Release allocations nobody freed
        let device = &self.handles.device;
        for (_, mut tracked) in self.allocations.drain() {
            unsafe {
                match tracked.resource {
                    TrackedResource::Buffer(buffer) => self.allocator.destroy_buffer(buffer, &mut tracked.allocation),
                    TrackedResource::Image { image, view, sampler } => {
                        if sampler != vk::Sampler::null() {
                            device.destroy_sampler(sampler, None);
                        }
                        device.destroy_image_view(view, None);
                        self.allocator.destroy_image(image, &mut tracked.allocation);
                    }
                }
            }
        }

        // Destroy sync objects and command pool
        unsafe {
            for &fence in &self.fences {
                device.destroy_fence(fence, None);
            }
            for &semaphore in &self.semaphores {
                device.destroy_semaphore(semaphore, None);
            }
            device.destroy_command_pool(self.command_pool, None);
        }
        self.offscreen_passes.clear();
        log::debug!("Vulkan device destroyed");
    }
}
