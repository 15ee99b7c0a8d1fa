//! Transfer batching
//!
//! Copies issued between flushes are recorded into one open transfer command
//! buffer. A flush makes the writes visible to vertex, index, uniform and
//! shader reads, submits, and moves on to the next command buffer of a small
//! ring so that recording never waits on a transfer that was just submitted.

use ash::vk;

use crate::foundation::collections::FrameRing;
use crate::render::api::{CommandDevice, GpuImage, Submission, SyncDevice, VulkanError, VulkanResult};

#[derive(Debug)]
struct UploadStream {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

/// Ring of transfer command buffers with at most one open at a time
#[derive(Debug)]
pub struct UploadBatcher {
    streams: FrameRing<UploadStream>,
    open: bool,
    fence_timeout_ns: u64,
    submitted: usize,
}

impl UploadBatcher {
    /// Allocate `stream_count` command buffers, each with a signalled fence
    pub fn new(
        device: &mut (impl CommandDevice + SyncDevice),
        stream_count: usize,
        fence_timeout_ns: u64,
    ) -> VulkanResult<Self> {
        let count = u32::try_from(stream_count)
            .map_err(|_| VulkanError::InitializationFailed(format!("{stream_count} upload streams")))?;
        let command_buffers = device.allocate_command_buffers(count)?;

        let streams = FrameRing::try_new(stream_count, |id| -> VulkanResult<UploadStream> {
            let fence = device
                .create_fence(true)
                .map_err(|e| VulkanError::InitializationFailed(format!("upload fence: {e}")))?;
            Ok(UploadStream { command_buffer: command_buffers[id.index()], fence })
        })?;

        Ok(Self { streams, open: false, fence_timeout_ns, submitted: 0 })
    }

    /// Open the current stream for recording if it is not open already
    ///
    /// Waits for the stream's previous submission before reusing it.
    pub fn begin_upload(&mut self, device: &mut (impl CommandDevice + SyncDevice)) -> VulkanResult<vk::CommandBuffer> {
        let stream = self.streams.current();
        if self.open {
            return Ok(stream.command_buffer);
        }

        device.wait_for_fence(stream.fence, self.fence_timeout_ns)?;
        device.begin_commands(stream.command_buffer, true)?;
        self.open = true;
        log::trace!("Opened upload stream {}", self.streams.current_id());
        Ok(stream.command_buffer)
    }

    /// Record a buffer to buffer copy
    pub fn copy_buffer(
        &mut self,
        device: &mut (impl CommandDevice + SyncDevice),
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_upload(device)?;
        device.copy_buffer(command_buffer, src, dst, size);
        Ok(())
    }

    /// Record a buffer to image copy with layout transitions
    pub fn copy_buffer_to_image(
        &mut self,
        device: &mut (impl CommandDevice + SyncDevice),
        src: vk::Buffer,
        image: &GpuImage,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_upload(device)?;
        device.copy_buffer_to_image(command_buffer, src, image);
        Ok(())
    }

    /// Flush the open stream, if any
    ///
    /// Returns whether anything was submitted.
    pub fn push_uploads(&mut self, device: &mut (impl CommandDevice + SyncDevice)) -> VulkanResult<bool> {
        if !self.open {
            return Ok(false);
        }

        let stream = self.streams.current();
        device.transfer_barrier(stream.command_buffer);
        device.end_commands(stream.command_buffer)?;
        device.reset_fence(stream.fence)?;
        self.open = false;

        device.submit(&Submission::fenced(stream.command_buffer, stream.fence)).map_err(|e| {
            log::error!("Upload submission failed: {e}");
            e
        })?;

        self.submitted += 1;
        self.streams.advance();
        Ok(true)
    }

    /// Whether a stream is currently recording
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Number of flushes submitted so far
    #[must_use]
    pub const fn submitted(&self) -> usize {
        self.submitted
    }

    /// Number of streams in the ring
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}
