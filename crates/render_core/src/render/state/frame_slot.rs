//! Per-slot synchronization objects and bookkeeping

use ash::vk;

use crate::render::api::{SyncDevice, VulkanError, VulkanResult};
use crate::render::resources::FrameResources;

/// Lifecycle of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Not in use, or its last frame was skipped
    #[default]
    Idle,
    /// Fence waited, waiting for a swapchain image
    Acquiring,
    /// Commands are being recorded
    Recording,
    /// Submitted; the in-flight fence signals on completion
    Submitted,
}

/// Everything one frame in flight owns
///
/// `image_available` is signalled by acquisition and waited by the
/// submission; `render_finished` is signalled by the submission and waited
/// by presentation; `in_flight` is signalled when the GPU is done with the
/// slot and is the only thing that makes its resources reclaimable.
#[derive(Debug)]
pub struct FrameSlot {
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) image_available: vk::Semaphore,
    pub(crate) render_finished: vk::Semaphore,
    pub(crate) in_flight: vk::Fence,
    pub(crate) resources: FrameResources,
    pub(crate) state: SlotState,
}

impl FrameSlot {
    /// Create the slot's semaphores and its (signalled) fence
    pub(crate) fn new(device: &mut impl SyncDevice, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        let sync_failed = |what: &str, e: VulkanError| VulkanError::InitializationFailed(format!("{what}: {e}"));

        let image_available = device.create_semaphore().map_err(|e| sync_failed("image-available semaphore", e))?;
        let render_finished = device.create_semaphore().map_err(|e| sync_failed("render-finished semaphore", e))?;
        let in_flight = device.create_fence(true).map_err(|e| sync_failed("in-flight fence", e))?;

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
            resources: FrameResources::default(),
            state: SlotState::Idle,
        })
    }

    /// Primary command buffer
    #[must_use]
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Completion fence
    #[must_use]
    pub const fn in_flight_fence(&self) -> vk::Fence {
        self.in_flight
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SlotState {
        self.state
    }

    /// Transient resources awaiting retirement
    #[must_use]
    pub const fn resources(&self) -> &FrameResources {
        &self.resources
    }
}
