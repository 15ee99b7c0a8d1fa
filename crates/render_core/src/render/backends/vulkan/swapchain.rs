//! Vulkan swapchain management
//!
//! Handles swapchain creation and recreation following RAII principles, and
//! implements [`PresentDevice`] for [`VulkanDevice`].

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;

use super::device::{DeviceHandles, VulkanDevice};
use super::render_pass::RenderPass;
use crate::render::api::{AcquireOutcome, PresentDevice, PresentOutcome, VulkanError, VulkanResult};

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: ash::Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `window_extent`, retiring `old_swapchain` if it
    /// is not null
    ///
    /// Prefers `B8G8R8A8_SRGB` and mailbox presentation, falling back to the
    /// first reported format and FIFO.
    pub fn new(
        handles: &DeviceHandles,
        window_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let loader = SwapchainLoader::new(&handles.instance, &handles.device);
        let surface_loader = &handles.surface_loader;

        // Get surface capabilities
        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(handles.physical_device, handles.surface)
                .map_err(VulkanError::Api)?
        };

        // Choose surface format
        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(handles.physical_device, handles.surface)
                .map_err(VulkanError::Api)?
        };
        let format = surface_formats
            .iter()
            .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| surface_formats.first())
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))?;

        // Choose present mode
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(handles.physical_device, handles.surface)
                .map_err(VulkanError::Api)?
        };
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        // Choose extent
        let extent = choose_extent(&surface_caps, window_extent);

        // Choose image count
        let image_count = if surface_caps.max_image_count > 0 {
            (surface_caps.min_image_count + 1).min(surface_caps.max_image_count)
        } else {
            surface_caps.min_image_count + 1
        };

        // Create swapchain, retiring the old one if any
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(handles.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }.map_err(VulkanError::Api)?;

        // From here on Drop cleans up whatever was created
        let mut this = Self {
            device: handles.device.clone(),
            loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            extent,
        };

        // Get swapchain images
        this.images = unsafe { this.loader.get_swapchain_images(swapchain) }.map_err(VulkanError::Api)?;

        // Create image views
        for &image in &this.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { this.device.create_image_view(&view_info, None) }.map_err(VulkanError::Api)?;
            this.image_views.push(view);
        }

        log::debug!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            this.images.len(),
            format.format,
            present_mode
        );
        Ok(this)
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get swapchain loader
    pub fn loader(&self) -> &SwapchainLoader {
        &self.loader
    }

    /// Get image count
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            // Cleanup image views
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            // Cleanup swapchain
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// The surface's current extent, or the window's clamped to the surface
/// limits when the surface leaves it to the swapchain
fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window_extent.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

impl PresentDevice for VulkanDevice {
    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout_ns: u64) -> VulkanResult<AcquireOutcome> {
        let swapchain = &self.swapchain;
        let result = unsafe { swapchain.loader().acquire_next_image(swapchain.handle(), timeout_ns, signal, vk::Fence::null()) };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireOutcome::NotReady),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain.loader().queue_present(self.handles.queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<vk::Extent2D> {
        self.destroy_swapchain_targets();

        // The surface may change again while the swapchain is created
        let swapchain = Swapchain::new(&self.handles, extent, self.swapchain.handle()).map_err(|e| match e {
            VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR) => VulkanError::SwapchainOutOfDate,
            e => e,
        })?;
        self.swapchain = swapchain;

        let format = self.swapchain.format().format;
        if format != self.swapchain_pass.color_format() {
            log::debug!("Surface format changed to {format:?}, recreating render pass");
            self.swapchain_pass = RenderPass::new_swapchain_pass(self.handles.device.clone(), format)?;
        }

        self.create_swapchain_targets()?;
        Ok(self.swapchain.extent())
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn swapchain_image_count(&self) -> usize {
        self.swapchain.image_count()
    }
}
