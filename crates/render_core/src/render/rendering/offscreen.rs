//! Offscreen render target passes
//!
//! An offscreen pass records into its own command buffer and render pass and
//! submits without joining the present chain. Its fence is waited before the
//! command buffer is reused, and by the frame slot that ends up owning the
//! target before that slot retires it.

use ash::vk;

use crate::render::api::{
    CommandDevice, GpuFramebuffer, MemoryDevice, PassTarget, Submission, SyncDevice, VulkanError, VulkanResult,
};

/// Dedicated command buffer and fence for offscreen rendering
#[derive(Debug)]
pub struct OffscreenPass {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    active: Option<GpuFramebuffer>,
    fence_timeout_ns: u64,
}

impl OffscreenPass {
    /// Allocate the command buffer and a signalled fence
    pub fn new(device: &mut (impl CommandDevice + SyncDevice), fence_timeout_ns: u64) -> VulkanResult<Self> {
        let command_buffer = device
            .allocate_command_buffers(1)?
            .pop()
            .ok_or_else(|| VulkanError::InitializationFailed("offscreen command buffer".to_string()))?;
        let fence = device
            .create_fence(true)
            .map_err(|e| VulkanError::InitializationFailed(format!("offscreen fence: {e}")))?;

        Ok(Self { command_buffer, fence, active: None, fence_timeout_ns })
    }

    /// Create a target and begin recording a pass into it
    pub fn begin(
        &mut self,
        device: &mut (impl MemoryDevice + CommandDevice + SyncDevice),
        extent: vk::Extent2D,
        format: vk::Format,
        clear_color: [f32; 4],
    ) -> VulkanResult<GpuFramebuffer> {
        if self.active.is_some() {
            return Err(VulkanError::invalid("offscreen pass already recording"));
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::invalid(format!(
                "offscreen target of {}x{} pixels",
                extent.width, extent.height
            )));
        }

        device.wait_for_fence(self.fence, self.fence_timeout_ns)?;
        let target = device.create_offscreen_target(extent, format)?;

        if let Err(e) = device.begin_commands(self.command_buffer, true) {
            device.destroy_framebuffer(&target);
            return Err(e);
        }
        device.begin_pass(
            self.command_buffer,
            PassTarget::Offscreen { framebuffer: target.framebuffer, render_pass: target.render_pass },
            extent,
            clear_color,
        );

        log::trace!("Offscreen pass began ({}x{})", extent.width, extent.height);
        self.active = Some(target);
        Ok(target)
    }

    /// End and submit the active pass, returning its target
    pub fn end(&mut self, device: &mut (impl CommandDevice + SyncDevice)) -> VulkanResult<GpuFramebuffer> {
        let target = self.active.take().ok_or_else(|| VulkanError::invalid("no offscreen pass recording"))?;

        device.end_pass(self.command_buffer);
        device.end_commands(self.command_buffer)?;
        device.reset_fence(self.fence)?;
        device.submit(&Submission::fenced(self.command_buffer, self.fence)).map_err(|e| {
            log::error!("Offscreen submission failed: {e}");
            e
        })?;

        Ok(target)
    }

    /// Block until the last offscreen submission has completed
    pub fn wait(&self, device: &mut impl SyncDevice) -> VulkanResult<()> {
        device.wait_for_fence(self.fence, self.fence_timeout_ns)
    }

    /// Whether a pass is recording
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Command buffer the pass records into
    #[must_use]
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Fence signalled by the last submission
    #[must_use]
    pub const fn fence(&self) -> vk::Fence {
        self.fence
    }
}
