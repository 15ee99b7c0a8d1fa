//! Device seam
//!
//! The frame controller, memory pools and upload batcher talk to the GPU only
//! through these traits. The Vulkan backend implements them on `ash` and
//! `vk-mem`; tests implement them with an in-memory mock.

use ash::vk;

use super::error::VulkanResult;
use super::handles::{AllocationId, BufferClass, GpuFramebuffer, GpuImage};

/// Buffer, image and render target lifetime
pub trait MemoryDevice {
    /// Select the backing memory type for a buffer class; called once per class
    fn prepare_memory_class(&mut self, class: BufferClass) -> VulkanResult<()>;

    /// Create a buffer of exactly `capacity` bytes from the class's memory
    fn create_buffer(&mut self, class: BufferClass, capacity: vk::DeviceSize)
        -> VulkanResult<(vk::Buffer, AllocationId)>;

    /// Copy `data` to the start of a host-visible allocation
    fn write_buffer(&mut self, allocation: AllocationId, data: &[u8]) -> VulkanResult<()>;

    /// Destroy a buffer and release its allocation
    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationId);

    /// Create a sampled, transfer-destination image with view and sampler
    fn create_texture(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<GpuImage>;

    /// Create an offscreen colour + depth target and its framebuffer
    fn create_offscreen_target(&mut self, extent: vk::Extent2D, format: vk::Format)
        -> VulkanResult<GpuFramebuffer>;

    /// Destroy an image, its view and its sampler
    fn destroy_image(&mut self, image: &GpuImage);

    /// Destroy a framebuffer and both of its attachments
    fn destroy_framebuffer(&mut self, framebuffer: &GpuFramebuffer);
}

/// Target of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    /// Swapchain framebuffer for the acquired image
    Swapchain {
        /// Acquired image index
        image_index: u32,
    },
    /// Offscreen framebuffer
    Offscreen {
        /// Framebuffer to render into
        framebuffer: vk::Framebuffer,
        /// Render pass it was created for
        render_pass: vk::RenderPass,
    },
}

/// One queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Command buffer to execute
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on and the stage that waits
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    /// Semaphore signalled on completion
    pub signal: Option<vk::Semaphore>,
    /// Fence signalled on completion
    pub fence: Option<vk::Fence>,
}

impl Submission {
    /// Submission with no semaphores, signalling `fence`
    #[must_use]
    pub const fn fenced(command_buffer: vk::CommandBuffer, fence: vk::Fence) -> Self {
        Self { command_buffer, wait: None, signal: None, fence: Some(fence) }
    }
}

/// Command buffer recording and submission
pub trait CommandDevice {
    /// Allocate resettable primary command buffers
    fn allocate_command_buffers(&mut self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>>;

    /// Reset and begin recording
    fn begin_commands(&mut self, command_buffer: vk::CommandBuffer, one_time_submit: bool) -> VulkanResult<()>;

    /// Finish recording
    fn end_commands(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Begin a render pass and set a full-target viewport and scissor
    fn begin_pass(
        &mut self,
        command_buffer: vk::CommandBuffer,
        target: PassTarget,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );

    /// End the current render pass
    fn end_pass(&mut self, command_buffer: vk::CommandBuffer);

    /// Record a buffer to buffer copy of `size` bytes
    fn copy_buffer(&mut self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);

    /// Record a buffer to image copy, transitioning the image from undefined
    /// to transfer-destination and then to shader-read-only
    fn copy_buffer_to_image(&mut self, command_buffer: vk::CommandBuffer, src: vk::Buffer, image: &GpuImage);

    /// Make transfer writes visible to vertex input, index, uniform and
    /// shader reads
    fn transfer_barrier(&mut self, command_buffer: vk::CommandBuffer);

    /// Submit to the single graphics / transfer queue
    fn submit(&mut self, submission: &Submission) -> VulkanResult<()>;
}

/// Fences and semaphores
pub trait SyncDevice {
    /// Create a fence, optionally already signalled
    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence>;

    /// Create a binary semaphore
    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore>;

    /// Block until the fence is signalled or `timeout_ns` elapses
    ///
    /// Expiry is reported as [`VulkanError::FenceTimeout`](super::VulkanError::FenceTimeout).
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()>;

    /// Return a fence to the unsignalled state
    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()>;

    /// Block until the device is idle
    fn wait_idle(&mut self) -> VulkanResult<()>;
}

/// Result of an acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available
    Acquired {
        /// Index of the acquired image
        image_index: u32,
        /// The swapchain still works but no longer matches the surface
        suboptimal: bool,
    },
    /// No image became available within the timeout
    NotReady,
    /// The swapchain must be rebuilt before acquiring again
    OutOfDate,
}

/// Result of a presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented and the swapchain matches the surface
    Presented,
    /// Presented but the swapchain should be rebuilt
    Suboptimal,
    /// Not presented; the swapchain must be rebuilt
    OutOfDate,
}

/// Swapchain acquisition, presentation and rebuild
pub trait PresentDevice {
    /// Acquire the next image, signalling `signal` when it is ready
    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout_ns: u64) -> VulkanResult<AcquireOutcome>;

    /// Present an image once `wait` is signalled
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome>;

    /// Recreate swapchain, image views and framebuffers for `extent`
    ///
    /// Returns the extent actually used after clamping to the surface limits,
    /// or [`VulkanError::SwapchainOutOfDate`] when the surface changed again
    /// while rebuilding.
    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<vk::Extent2D>;

    /// Current swapchain extent
    fn swapchain_extent(&self) -> vk::Extent2D;

    /// Number of swapchain images
    fn swapchain_image_count(&self) -> usize;
}

/// Everything the frame controller needs from a device
pub trait GpuDevice: MemoryDevice + CommandDevice + SyncDevice + PresentDevice {}

impl<T: MemoryDevice + CommandDevice + SyncDevice + PresentDevice> GpuDevice for T {}

/// Upstream window collaborator, queried for the drawable size on rebuild
pub trait SurfaceExtent {
    /// Current drawable size in pixels
    fn drawable_extent(&self) -> vk::Extent2D;
}

impl<F: Fn() -> vk::Extent2D> SurfaceExtent for F {
    fn drawable_extent(&self) -> vk::Extent2D {
        self()
    }
}
