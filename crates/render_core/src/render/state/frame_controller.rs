//! # Frame Cycle Controller
//!
//! Drives one frame at a time through a fixed ring of frame slots:
//!
//! ```text
//! begin_frame: wait slot fence -> acquire image -> wait image's last fence
//!              -> begin commands + pass -> retire slot -> reset cursors
//! end_frame:   flush uploads -> end pass + commands -> submit -> present
//!              -> advance ring
//! ```
//!
//! A slot's resources are reclaimed only after that slot's own fence has
//! been waited on, at its next `begin_frame`. Out-of-date or resized
//! swapchains are rebuilt synchronously and the frame is reported as
//! skipped; callers simply try again.
//!
//! The controller is single-threaded: every entry point takes `&mut self`.

use ash::vk;

use crate::core::config::RenderCoreConfig;
use crate::foundation::collections::{FrameRing, FrameSlotId};
use crate::render::api::{
    AcquireOutcome, BufferClass, GpuBuffer, GpuDevice, GpuFramebuffer, GpuImage, PassTarget, PresentOutcome,
    Submission, SurfaceExtent, VulkanError, VulkanResult,
};
use crate::render::rendering::{OffscreenPass, UploadBatcher};
use crate::render::resources::{
    FrameResources, GroupSignature, MemoryPools, ResourceGroupAllocator, ResourceGroupCache, SignatureIndex,
};

use super::frame_slot::{FrameSlot, SlotState};

/// Format of textures created by the upload helpers
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// The frame currently being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFrame {
    /// Slot that owns this frame's resources
    pub slot: FrameSlotId,
    /// Acquired swapchain image
    pub image_index: u32,
    /// Primary command buffer, inside the swapchain render pass
    pub command_buffer: vk::CommandBuffer,
    /// Swapchain extent
    pub extent: vk::Extent2D,
}

/// Why `begin_frame` did not start a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The requested extent differs from the swapchain; it was rebuilt
    ExtentChanged,
    /// The swapchain was out of date; it was rebuilt
    OutOfDate,
    /// No image became available within the acquisition attempts
    AcquireTimeout,
    /// The surface has zero area; rebuilding waits until it has some
    SurfaceHidden,
}

/// Result of `begin_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame is recording
    Recording(ActiveFrame),
    /// Nothing is recording; call `begin_frame` again
    Skipped(SkipReason),
}

/// Result of `end_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// Presented, swapchain unchanged
    Presented,
    /// Presentation reported a stale swapchain and it was rebuilt
    SwapchainRebuilt,
    /// The swapchain is stale but the surface has zero area
    RebuildDeferred,
}

/// Frame loop over a [`GpuDevice`]
pub struct FrameController<D: GpuDevice, G: ResourceGroupAllocator> {
    device: D,
    pools: MemoryPools,
    groups: ResourceGroupCache<G>,
    ring: FrameRing<FrameSlot>,
    uploads: UploadBatcher,
    offscreen: OffscreenPass,
    /// Transients created while no frame records; handed to the next slot
    /// that begins
    deferred: FrameResources,
    surface: Box<dyn SurfaceExtent>,
    config: RenderCoreConfig,
    /// Fence of the slot that last rendered to each swapchain image
    image_fences: Vec<Option<vk::Fence>>,
    /// Extent the swapchain was last built for, before surface clamping
    requested_extent: Option<vk::Extent2D>,
    active: Option<ActiveFrame>,
    rebuild_pending: bool,
}

impl<D: GpuDevice, G: ResourceGroupAllocator> FrameController<D, G> {
    /// Create every per-slot object, the memory pools, the descriptor cache
    /// and the upload ring
    ///
    /// Any creation failure is fatal and reported as
    /// [`VulkanError::InitializationFailed`] or the underlying error.
    pub fn new(
        mut device: D,
        allocator: G,
        surface: impl SurfaceExtent + 'static,
        config: RenderCoreConfig,
    ) -> VulkanResult<Self> {
        config.validate()?;
        let frames = config.frames_in_flight;

        let pools = MemoryPools::init(&mut device, &config.memory)?;

        let count = u32::try_from(frames)
            .map_err(|_| VulkanError::InitializationFailed(format!("{frames} frames in flight")))?;
        let command_buffers = device
            .allocate_command_buffers(count)
            .map_err(|e| VulkanError::InitializationFailed(format!("frame command buffers: {e}")))?;
        let ring = FrameRing::try_new(frames, |id| FrameSlot::new(&mut device, command_buffers[id.index()]))?;

        let uploads = UploadBatcher::new(&mut device, config.upload.stream_count, config.timing.fence_timeout_ns)?;
        let offscreen = OffscreenPass::new(&mut device, config.timing.fence_timeout_ns)?;
        let image_fences = vec![None; device.swapchain_image_count()];

        log::debug!(
            "Frame controller ready: {frames} slots, {} swapchain images, {} upload streams",
            image_fences.len(),
            uploads.stream_count()
        );

        Ok(Self {
            device,
            pools,
            groups: ResourceGroupCache::new(allocator, frames),
            ring,
            uploads,
            offscreen,
            deferred: FrameResources::default(),
            surface: Box::new(surface),
            config,
            image_fences,
            requested_extent: None,
            active: None,
            rebuild_pending: false,
        })
    }

    /// Start recording the next frame
    ///
    /// Blocks on the current slot's fence and on image acquisition, both
    /// bounded by the configured timeouts.
    pub fn begin_frame(&mut self, extent: Option<vk::Extent2D>) -> VulkanResult<FrameStatus> {
        if self.active.is_some() {
            return Err(VulkanError::invalid("begin_frame called while a frame is recording"));
        }

        let timing = self.config.timing.clone();
        let slot_id = self.ring.current_id();
        let (command_buffer, image_available, in_flight) = {
            let slot = self.ring.current();
            (slot.command_buffer, slot.image_available, slot.in_flight)
        };

        if let Err(e) = self.device.wait_for_fence(in_flight, timing.fence_timeout_ns) {
            log::warn!("Waiting for {slot_id} failed: {e}");
            return Err(e);
        }
        // Offscreen work between frames took its descriptor sets from this slot
        if self.ring.current().resources.awaits_offscreen() || self.deferred.awaits_offscreen() {
            self.offscreen.wait(&mut self.device)?;
        }
        self.ring.current_mut().state = SlotState::Acquiring;

        if let Some(requested) = extent {
            let built_for = self.requested_extent.unwrap_or_else(|| self.device.swapchain_extent());
            if requested != built_for {
                log::debug!("Extent changed to {}x{}", requested.width, requested.height);
                return self.skip_with_rebuild(Some(requested), SkipReason::ExtentChanged);
            }
        }
        if self.rebuild_pending {
            return self.skip_with_rebuild(None, SkipReason::OutOfDate);
        }

        let mut acquired = None;
        for attempt in 0..=timing.acquire_retries {
            match self.device.acquire_next_image(image_available, timing.acquire_timeout_ns)? {
                AcquireOutcome::Acquired { image_index, suboptimal } => {
                    if suboptimal {
                        log::debug!("Acquired image {image_index} from a suboptimal swapchain");
                        self.rebuild_pending = true;
                    }
                    acquired = Some(image_index);
                    break;
                }
                AcquireOutcome::NotReady => {
                    log::trace!("Image acquisition attempt {} timed out", attempt + 1);
                }
                AcquireOutcome::OutOfDate => {
                    log::warn!("Swapchain out of date at acquire");
                    return self.skip_with_rebuild(None, SkipReason::OutOfDate);
                }
            }
        }
        let Some(image_index) = acquired else {
            log::warn!("No swapchain image after {} attempts", timing.acquire_retries + 1);
            self.ring.current_mut().state = SlotState::Idle;
            return Ok(FrameStatus::Skipped(SkipReason::AcquireTimeout));
        };

        // Another slot may still be rendering to this image
        let image_slot = image_index as usize;
        if let Some(Some(previous)) = self.image_fences.get(image_slot).copied() {
            if previous != in_flight {
                self.device.wait_for_fence(previous, timing.fence_timeout_ns)?;
            }
        }
        if let Some(entry) = self.image_fences.get_mut(image_slot) {
            *entry = Some(in_flight);
        }

        let swapchain_extent = self.device.swapchain_extent();
        self.device.begin_commands(command_buffer, true)?;
        self.device.begin_pass(
            command_buffer,
            PassTarget::Swapchain { image_index },
            swapchain_extent,
            self.config.clear_color,
        );

        let slot = self.ring.current_mut();
        let retired = slot.resources.retire(&mut self.device, &mut self.pools);
        slot.resources.absorb(&mut self.deferred);
        slot.state = SlotState::Recording;
        self.groups.reset_slot(slot_id);

        if retired != Default::default() {
            log::trace!(
                "{slot_id} retired {} buffers, {} images, {} framebuffers",
                retired.buffers,
                retired.images,
                retired.framebuffers
            );
        }

        let frame = ActiveFrame { slot: slot_id, image_index, command_buffer, extent: swapchain_extent };
        self.active = Some(frame);
        Ok(FrameStatus::Recording(frame))
    }

    fn skip_with_rebuild(&mut self, extent: Option<vk::Extent2D>, reason: SkipReason) -> VulkanResult<FrameStatus> {
        self.ring.current_mut().state = SlotState::Idle;
        match self.rebuild_swapchain(extent) {
            Ok(true) => Ok(FrameStatus::Skipped(reason)),
            Ok(false) => Ok(FrameStatus::Skipped(SkipReason::SurfaceHidden)),
            Err(e) if e.is_retryable() => {
                log::warn!("Swapchain rebuild interrupted: {e}");
                Ok(FrameStatus::Skipped(SkipReason::OutOfDate))
            }
            Err(e) => Err(e),
        }
    }

    /// Submit and present the recording frame, then advance the ring
    ///
    /// Pending uploads are flushed first so the frame sees them. A failed
    /// submission is fatal.
    pub fn end_frame(&mut self) -> VulkanResult<FrameEnd> {
        let frame = self.active.ok_or_else(|| VulkanError::invalid("end_frame called without a recording frame"))?;
        if self.offscreen.is_active() {
            return Err(VulkanError::invalid("end_frame called while an offscreen pass is recording"));
        }
        self.active = None;

        self.uploads.push_uploads(&mut self.device)?;

        let (image_available, render_finished, in_flight) = {
            let slot = self.ring.current();
            (slot.image_available, slot.render_finished, slot.in_flight)
        };

        self.device.end_pass(frame.command_buffer);
        self.device.end_commands(frame.command_buffer)?;
        self.device.reset_fence(in_flight)?;

        let submission = Submission {
            command_buffer: frame.command_buffer,
            wait: Some((image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal: Some(render_finished),
            fence: Some(in_flight),
        };
        if let Err(e) = self.device.submit(&submission) {
            log::error!("Frame submission for {} failed: {e}", frame.slot);
            return Err(e);
        }

        self.ring.current_mut().state = SlotState::Submitted;
        self.ring.advance();

        let stale = match self.device.present(frame.image_index, render_finished)? {
            PresentOutcome::Presented => self.rebuild_pending,
            PresentOutcome::Suboptimal => {
                log::warn!("Swapchain suboptimal at present");
                true
            }
            PresentOutcome::OutOfDate => {
                log::warn!("Swapchain out of date at present");
                true
            }
        };

        if !stale {
            return Ok(FrameEnd::Presented);
        }
        match self.rebuild_swapchain(None) {
            Ok(true) => Ok(FrameEnd::SwapchainRebuilt),
            Ok(false) => Ok(FrameEnd::RebuildDeferred),
            Err(e) if e.is_retryable() => {
                log::warn!("Swapchain rebuild interrupted: {e}");
                Ok(FrameEnd::RebuildDeferred)
            }
            Err(e) => Err(e),
        }
    }

    /// Recreate the swapchain for `extent`, or for the surface's current
    /// size when `None`
    ///
    /// Returns `false` without touching the swapchain when the extent has
    /// zero area; the rebuild is retried by the next `begin_frame`. A
    /// retryable error, such as the surface changing again mid-rebuild, also
    /// leaves the rebuild pending.
    pub fn rebuild_swapchain(&mut self, extent: Option<vk::Extent2D>) -> VulkanResult<bool> {
        if self.active.is_some() {
            return Err(VulkanError::invalid("cannot rebuild the swapchain while a frame is recording"));
        }

        let extent = extent.unwrap_or_else(|| self.surface.drawable_extent());
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has zero area, deferring swapchain rebuild");
            self.rebuild_pending = true;
            return Ok(false);
        }

        self.device.wait_idle()?;
        let actual = match self.device.rebuild_swapchain(extent) {
            Ok(actual) => actual,
            Err(e) => {
                self.rebuild_pending = e.is_retryable();
                return Err(e);
            }
        };
        self.image_fences = vec![None; self.device.swapchain_image_count()];
        self.requested_extent = Some(extent);
        self.rebuild_pending = false;

        log::warn!("Swapchain rebuilt at {}x{}", actual.width, actual.height);
        Ok(true)
    }

    /// Begin an offscreen pass into a new target
    ///
    /// While the pass records, [`command_buffer`](Self::command_buffer)
    /// returns the offscreen command buffer.
    pub fn begin_framebuffer(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<GpuFramebuffer> {
        let clear = self.config.clear_color;
        self.offscreen.begin(&mut self.device, extent, format, clear)
    }

    /// Flush uploads, then end and submit the offscreen pass
    ///
    /// The target is owned by the current frame slot from here on and is
    /// destroyed when that slot retires.
    pub fn end_framebuffer(&mut self) -> VulkanResult<GpuFramebuffer> {
        if !self.offscreen.is_active() {
            return Err(VulkanError::invalid("end_framebuffer called without an offscreen pass"));
        }

        self.uploads.push_uploads(&mut self.device)?;
        let target = self.offscreen.end(&mut self.device)?;

        let sink = self.transient_sink();
        sink.push_framebuffer(target);
        sink.mark_offscreen();
        Ok(target)
    }

    fn transient_sink(&mut self) -> &mut FrameResources {
        if self.active.is_some() {
            &mut self.ring.current_mut().resources
        } else {
            &mut self.deferred
        }
    }

    /// Take a buffer from the pool of its class
    pub fn alloc_buffer(
        &mut self,
        class: BufferClass,
        data: Option<&[u8]>,
        size: vk::DeviceSize,
    ) -> VulkanResult<GpuBuffer> {
        self.pools.get_mut(class).alloc(&mut self.device, data, size)
    }

    /// Give a buffer back; it returns to its pool once the current slot
    /// retires
    pub fn free_buffer(&mut self, buffer: GpuBuffer) {
        self.transient_sink().push_buffer(buffer);
    }

    /// Track a buffer used only by the current frame
    pub fn push_transient_buffer(&mut self, buffer: GpuBuffer) {
        self.transient_sink().push_buffer(buffer);
    }

    /// Track an image used only by the current frame
    pub fn push_transient_image(&mut self, image: GpuImage) {
        self.transient_sink().push_image(image);
    }

    /// Track an offscreen target used only by the current frame
    pub fn push_transient_framebuffer(&mut self, framebuffer: GpuFramebuffer) {
        self.transient_sink().push_framebuffer(framebuffer);
    }

    /// Upload bytes into a new buffer of `class`
    ///
    /// Device-local classes go through a staging buffer that is retired with
    /// the current slot.
    pub fn upload_buffer(&mut self, class: BufferClass, data: &[u8]) -> VulkanResult<GpuBuffer> {
        if data.is_empty() {
            return Err(VulkanError::invalid("empty buffer upload"));
        }
        let size = data.len() as vk::DeviceSize;
        if class.is_host_visible() {
            return self.alloc_buffer(class, Some(data), size);
        }

        let staging = self.alloc_buffer(BufferClass::Transfer, Some(data), size)?;
        let destination = match self.alloc_buffer(class, None, size) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.pools.free(staging);
                return Err(e);
            }
        };

        if let Err(e) = self.uploads.copy_buffer(&mut self.device, staging.buffer, destination.buffer, size) {
            self.pools.free(staging);
            self.pools.free(destination);
            return Err(e);
        }

        self.transient_sink().push_buffer(staging);
        Ok(destination)
    }

    /// Upload a slice of plain-old-data values
    pub fn upload_slice<T: bytemuck::Pod>(&mut self, class: BufferClass, values: &[T]) -> VulkanResult<GpuBuffer> {
        self.upload_buffer(class, bytemuck::cast_slice(values))
    }

    /// Upload tightly packed RGBA8 pixels into a new sampled texture
    pub fn upload_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> VulkanResult<GpuImage> {
        let expected = u64::from(width) * u64::from(height) * 4;
        if expected == 0 || rgba.len() as u64 != expected {
            return Err(VulkanError::invalid(format!(
                "{width}x{height} texture needs {expected} RGBA bytes, got {}",
                rgba.len()
            )));
        }

        let staging = self.alloc_buffer(BufferClass::Transfer, Some(rgba), expected)?;
        let image = match self.device.create_texture(vk::Extent2D { width, height }, TEXTURE_FORMAT) {
            Ok(image) => image,
            Err(e) => {
                self.pools.free(staging);
                return Err(e);
            }
        };

        if let Err(e) = self.uploads.copy_buffer_to_image(&mut self.device, staging.buffer, &image) {
            self.pools.free(staging);
            self.device.destroy_image(&image);
            return Err(e);
        }

        self.transient_sink().push_buffer(staging);
        Ok(image)
    }

    /// Upload an RGB image, expanding it to RGBA with opaque alpha
    pub fn upload_rgb_image(&mut self, image: &image::RgbImage) -> VulkanResult<GpuImage> {
        let rgba = image::DynamicImage::ImageRgb8(image.clone()).into_rgba8();
        self.upload_rgba_image(&rgba)
    }

    /// Upload an RGBA image
    pub fn upload_rgba_image(&mut self, image: &image::RgbaImage) -> VulkanResult<GpuImage> {
        self.upload_texture(image.width(), image.height(), image.as_raw())
    }

    /// Submit recorded uploads now
    pub fn push_uploads(&mut self) -> VulkanResult<bool> {
        self.uploads.push_uploads(&mut self.device)
    }

    /// Index of the signature of `bindings`, registering it on first use
    ///
    /// Called by generated pipeline code when creating descriptor layouts.
    pub fn signature_index(&mut self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VulkanResult<SignatureIndex> {
        self.groups.get_or_create_signature_index(&GroupSignature::from_bindings(bindings))
    }

    /// Next descriptor set of a signature for the current frame slot
    ///
    /// Called by generated pipeline code for every bind.
    pub fn descriptor_set(
        &mut self,
        index: SignatureIndex,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let slot = self.ring.current_id();
        self.groups.acquire_set(index, slot, layout)
    }

    /// Command buffer draws should be recorded into: the offscreen one while
    /// an offscreen pass records, otherwise the current frame's
    #[must_use]
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        if self.offscreen.is_active() {
            Some(self.offscreen.command_buffer())
        } else {
            self.active.map(|frame| frame.command_buffer)
        }
    }

    /// Frame currently recording
    #[must_use]
    pub const fn active_frame(&self) -> Option<ActiveFrame> {
        self.active
    }

    /// Slot the next or current frame uses
    #[must_use]
    pub const fn current_slot(&self) -> FrameSlotId {
        self.ring.current_id()
    }

    /// Slot bookkeeping by id
    #[must_use]
    pub fn slot(&self, id: FrameSlotId) -> &FrameSlot {
        self.ring.get(id)
    }

    /// Whether a swapchain rebuild is waiting
    #[must_use]
    pub const fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Block until the device is idle
    pub fn wait_idle(&mut self) -> VulkanResult<()> {
        self.device.wait_idle()
    }

    /// Memory pools
    #[must_use]
    pub const fn pools(&self) -> &MemoryPools {
        &self.pools
    }

    /// Descriptor cache
    #[must_use]
    pub const fn resource_groups(&self) -> &ResourceGroupCache<G> {
        &self.groups
    }

    /// Upload ring
    #[must_use]
    pub const fn uploads(&self) -> &UploadBatcher {
        &self.uploads
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &RenderCoreConfig {
        &self.config
    }

    /// Underlying device
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Mutable underlying device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: GpuDevice, G: ResourceGroupAllocator> Drop for FrameController<D, G> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait before teardown failed: {e}");
        }

        for (_, slot) in self.ring.iter_mut() {
            slot.resources.retire(&mut self.device, &mut self.pools);
        }
        self.deferred.retire(&mut self.device, &mut self.pools);
        self.pools.destroy(&mut self.device);
        log::debug!("Frame controller destroyed");
    }
}
