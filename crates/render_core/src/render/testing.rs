//! In-memory device used by unit tests
//!
//! Handles are fabricated from a counter. Fences model a GPU that finishes a
//! submission the first time the CPU waits on it, so a fence wait is the
//! only point where "GPU work" completes.

use std::collections::{HashMap, HashSet, VecDeque};

use ash::vk::{self, Handle};
use slotmap::SlotMap;

use super::api::{
    AcquireOutcome, AllocationId, BufferClass, CommandDevice, GpuFramebuffer, GpuImage, MemoryDevice, PassTarget,
    PresentDevice, PresentOutcome, ResourceLifetime, Submission, SurfaceExtent, SyncDevice, VulkanError, VulkanResult,
};
use super::resources::{GroupSignature, GrowthPolicy, ResourceGroupAllocator, SignatureIndex};

/// Backing memory of a mock allocation
#[derive(Debug)]
pub struct MockAllocation {
    pub capacity: vk::DeviceSize,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
struct MockFence {
    signaled: bool,
    pending: bool,
}

/// Recorded device call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    BeginCommands(vk::CommandBuffer),
    EndCommands(vk::CommandBuffer),
    BeginPass(vk::CommandBuffer, PassTarget),
    EndPass(vk::CommandBuffer),
    CopyBuffer { command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize },
    CopyImage { command_buffer: vk::CommandBuffer, src: vk::Buffer, image: vk::Image },
    Barrier(vk::CommandBuffer),
    Submit(Submission),
    FenceCompleted(vk::Fence),
    ResetFence(vk::Fence),
    Present(u32),
    Rebuild(vk::Extent2D),
    WaitIdle,
    DestroyBuffer(vk::Buffer),
    DestroyImage(vk::Image),
    DestroyFramebuffer(vk::Framebuffer),
}

/// Mock implementation of every device trait
#[derive(Debug)]
pub struct MockDevice {
    allocations: SlotMap<AllocationId, MockAllocation>,
    fences: HashMap<vk::Fence, MockFence>,
    recording: HashSet<vk::CommandBuffer>,
    next_raw: u64,
    next_image: u32,
    extent: vk::Extent2D,
    image_count: usize,
    pub prepared_classes: Vec<BufferClass>,
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub images_destroyed: usize,
    pub framebuffers_destroyed: usize,
    pub semaphores_created: usize,
    pub events: Vec<MockEvent>,
    pub acquire_script: VecDeque<AcquireOutcome>,
    pub present_script: VecDeque<PresentOutcome>,
    /// Submitted work never completes while set
    pub stall_gpu: bool,
    /// Rebuilds produce this extent whatever was asked for, like a surface
    /// that dictates its own size
    pub fixed_surface_extent: Option<vk::Extent2D>,
    /// Number of upcoming rebuilds that fail as out of date
    pub rebuilds_out_of_date: usize,
    /// Fence creation fails while set
    pub fail_fence_creation: bool,
    /// Queue submission fails with this result while set
    pub fail_submit: Option<vk::Result>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_swapchain(vk::Extent2D { width: 800, height: 600 }, 3)
    }

    pub fn with_swapchain(extent: vk::Extent2D, image_count: usize) -> Self {
        Self {
            allocations: SlotMap::with_key(),
            fences: HashMap::new(),
            recording: HashSet::new(),
            next_raw: 0x1000,
            next_image: 0,
            extent,
            image_count,
            prepared_classes: Vec::new(),
            buffers_created: 0,
            buffers_destroyed: 0,
            images_destroyed: 0,
            framebuffers_destroyed: 0,
            semaphores_created: 0,
            events: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            stall_gpu: false,
            fixed_surface_extent: None,
            rebuilds_out_of_date: 0,
            fail_fence_creation: false,
            fail_submit: None,
        }
    }

    fn next_raw(&mut self) -> u64 {
        self.next_raw += 1;
        self.next_raw
    }

    pub fn allocation_capacity(&self, allocation: AllocationId) -> Option<vk::DeviceSize> {
        self.allocations.get(allocation).map(|a| a.capacity)
    }

    pub fn allocation_contents(&self, allocation: AllocationId) -> Option<&[u8]> {
        self.allocations.get(allocation).map(|a| a.contents.as_slice())
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence).is_some_and(|f| f.signaled)
    }

    pub fn is_fence_pending(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence).is_some_and(|f| f.pending)
    }

    /// Index of the first event matching `pred`
    pub fn position(&self, pred: impl Fn(&MockEvent) -> bool) -> Option<usize> {
        self.events.iter().position(pred)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Submit(submission) => Some(*submission),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&MockEvent) -> bool) -> usize {
        self.events.iter().filter(|event| pred(event)).count()
    }

    fn image(&mut self, extent: vk::Extent2D, format: vk::Format, sampled: bool) -> GpuImage {
        let bytes = u64::from(extent.width) * u64::from(extent.height) * 4;
        let allocation = self.allocations.insert(MockAllocation { capacity: bytes, contents: Vec::new() });
        GpuImage {
            image: vk::Image::from_raw(self.next_raw()),
            view: vk::ImageView::from_raw(self.next_raw()),
            sampler: if sampled { vk::Sampler::from_raw(self.next_raw()) } else { vk::Sampler::null() },
            allocation,
            format,
            extent,
            lifetime: ResourceLifetime::Persistent,
        }
    }
}

impl MemoryDevice for MockDevice {
    fn prepare_memory_class(&mut self, class: BufferClass) -> VulkanResult<()> {
        self.prepared_classes.push(class);
        Ok(())
    }

    fn create_buffer(&mut self, _class: BufferClass, capacity: vk::DeviceSize) -> VulkanResult<(vk::Buffer, AllocationId)> {
        let allocation = self.allocations.insert(MockAllocation { capacity, contents: Vec::new() });
        self.buffers_created += 1;
        Ok((vk::Buffer::from_raw(self.next_raw()), allocation))
    }

    fn write_buffer(&mut self, allocation: AllocationId, data: &[u8]) -> VulkanResult<()> {
        let target = self.allocations.get_mut(allocation).ok_or_else(|| VulkanError::invalid("unknown allocation"))?;
        assert!(data.len() as u64 <= target.capacity, "write past the end of the allocation");
        target.contents = data.to_vec();
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationId) {
        assert!(self.allocations.remove(allocation).is_some(), "buffer destroyed twice");
        self.buffers_destroyed += 1;
        self.events.push(MockEvent::DestroyBuffer(buffer));
    }

    fn create_texture(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<GpuImage> {
        Ok(self.image(extent, format, true))
    }

    fn create_offscreen_target(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<GpuFramebuffer> {
        let color = self.image(extent, format, true);
        let depth = self.image(extent, vk::Format::D32_SFLOAT, false);
        Ok(GpuFramebuffer {
            framebuffer: vk::Framebuffer::from_raw(self.next_raw()),
            render_pass: vk::RenderPass::from_raw(0xAA),
            extent,
            color,
            depth,
        })
    }

    fn destroy_image(&mut self, image: &GpuImage) {
        assert!(self.allocations.remove(image.allocation).is_some(), "image destroyed twice");
        self.images_destroyed += 1;
        self.events.push(MockEvent::DestroyImage(image.image));
    }

    fn destroy_framebuffer(&mut self, framebuffer: &GpuFramebuffer) {
        self.destroy_image(&framebuffer.color);
        self.destroy_image(&framebuffer.depth);
        self.framebuffers_destroyed += 1;
        self.events.push(MockEvent::DestroyFramebuffer(framebuffer.framebuffer));
    }
}

impl CommandDevice for MockDevice {
    fn allocate_command_buffers(&mut self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        Ok((0..count).map(|_| vk::CommandBuffer::from_raw(self.next_raw())).collect())
    }

    fn begin_commands(&mut self, command_buffer: vk::CommandBuffer, _one_time_submit: bool) -> VulkanResult<()> {
        assert!(self.recording.insert(command_buffer), "command buffer begun while recording");
        self.events.push(MockEvent::BeginCommands(command_buffer));
        Ok(())
    }

    fn end_commands(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        assert!(self.recording.remove(&command_buffer), "ending a command buffer that is not recording");
        self.events.push(MockEvent::EndCommands(command_buffer));
        Ok(())
    }

    fn begin_pass(&mut self, command_buffer: vk::CommandBuffer, target: PassTarget, _extent: vk::Extent2D, _clear: [f32; 4]) {
        assert!(self.recording.contains(&command_buffer), "render pass outside recording");
        self.events.push(MockEvent::BeginPass(command_buffer, target));
    }

    fn end_pass(&mut self, command_buffer: vk::CommandBuffer) {
        self.events.push(MockEvent::EndPass(command_buffer));
    }

    fn copy_buffer(&mut self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        assert!(self.recording.contains(&command_buffer), "copy outside recording");
        self.events.push(MockEvent::CopyBuffer { command_buffer, src, dst, size });
    }

    fn copy_buffer_to_image(&mut self, command_buffer: vk::CommandBuffer, src: vk::Buffer, image: &GpuImage) {
        assert!(self.recording.contains(&command_buffer), "copy outside recording");
        self.events.push(MockEvent::CopyImage { command_buffer, src, image: image.image });
    }

    fn transfer_barrier(&mut self, command_buffer: vk::CommandBuffer) {
        self.events.push(MockEvent::Barrier(command_buffer));
    }

    fn submit(&mut self, submission: &Submission) -> VulkanResult<()> {
        if let Some(result) = self.fail_submit {
            return Err(VulkanError::Api(result));
        }
        assert!(!self.recording.contains(&submission.command_buffer), "submitting a recording command buffer");
        if let Some(fence) = submission.fence {
            let state = self.fences.get_mut(&fence).expect("submit with unknown fence");
            assert!(!state.signaled, "submit with a signalled fence");
            state.pending = true;
        }
        self.events.push(MockEvent::Submit(*submission));
        Ok(())
    }
}

impl SyncDevice for MockDevice {
    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence> {
        if self.fail_fence_creation {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        let fence = vk::Fence::from_raw(self.next_raw());
        self.fences.insert(fence, MockFence { signaled, pending: false });
        Ok(fence)
    }

    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore> {
        self.semaphores_created += 1;
        Ok(vk::Semaphore::from_raw(self.next_raw()))
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        let stall = self.stall_gpu;
        let state = self.fences.get_mut(&fence).expect("wait on unknown fence");
        if state.signaled {
            return Ok(());
        }
        if state.pending && !stall {
            state.pending = false;
            state.signaled = true;
            self.events.push(MockEvent::FenceCompleted(fence));
            return Ok(());
        }
        Err(VulkanError::FenceTimeout { timeout_ns })
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        let state = self.fences.get_mut(&fence).expect("reset of unknown fence");
        assert!(!state.pending, "resetting a fence with work in flight");
        state.signaled = false;
        self.events.push(MockEvent::ResetFence(fence));
        Ok(())
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        if !self.stall_gpu {
            for (fence, state) in &mut self.fences {
                if state.pending {
                    state.pending = false;
                    state.signaled = true;
                    self.events.push(MockEvent::FenceCompleted(*fence));
                }
            }
        }
        self.events.push(MockEvent::WaitIdle);
        Ok(())
    }
}

impl PresentDevice for MockDevice {
    fn acquire_next_image(&mut self, _signal: vk::Semaphore, _timeout_ns: u64) -> VulkanResult<AcquireOutcome> {
        if let Some(outcome) = self.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = self.next_image;
        #[allow(clippy::cast_possible_truncation)]
        let count = self.image_count as u32;
        self.next_image = (self.next_image + 1) % count;
        Ok(AcquireOutcome::Acquired { image_index, suboptimal: false })
    }

    fn present(&mut self, image_index: u32, _wait: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        self.events.push(MockEvent::Present(image_index));
        Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<vk::Extent2D> {
        if self.rebuilds_out_of_date > 0 {
            self.rebuilds_out_of_date -= 1;
            return Err(VulkanError::SwapchainOutOfDate);
        }
        self.extent = self.fixed_surface_extent.unwrap_or(extent);
        self.next_image = 0;
        self.events.push(MockEvent::Rebuild(extent));
        Ok(self.extent)
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn swapchain_image_count(&self) -> usize {
        self.image_count
    }
}

/// Descriptor set source with a fixed capacity per signature
#[derive(Debug)]
pub struct MockGroupAllocator {
    policy: GrowthPolicy,
    allocated: Vec<u32>,
    next_raw: u64,
    pub registered: Vec<GroupSignature>,
    pub grow_calls: usize,
}

impl MockGroupAllocator {
    pub fn new(capacity: u32, chunk: u32) -> Self {
        Self {
            policy: GrowthPolicy { chunk, capacity },
            allocated: Vec::new(),
            next_raw: 0x10_0000,
            registered: Vec::new(),
            grow_calls: 0,
        }
    }
}

impl ResourceGroupAllocator for MockGroupAllocator {
    fn register(&mut self, index: SignatureIndex, signature: &GroupSignature) -> VulkanResult<()> {
        assert_eq!(index.index(), self.registered.len(), "signatures registered out of order");
        self.registered.push(signature.clone());
        self.allocated.push(0);
        Ok(())
    }

    fn grow(
        &mut self,
        index: SignatureIndex,
        _layout: vk::DescriptorSetLayout,
        _current_len: usize,
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let allocated = &mut self.allocated[index.index()];
        let batch = self.policy.next_batch(*allocated)?;
        *allocated += batch;
        self.grow_calls += 1;
        Ok((0..batch)
            .map(|_| {
                self.next_raw += 1;
                vk::DescriptorSet::from_raw(self.next_raw)
            })
            .collect())
    }
}

/// Surface whose size tests can change
#[derive(Debug, Clone)]
pub struct FixedSurface(pub std::rc::Rc<std::cell::Cell<vk::Extent2D>>);

impl FixedSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self(std::rc::Rc::new(std::cell::Cell::new(vk::Extent2D { width, height })))
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.0.set(vk::Extent2D { width, height });
    }
}

impl SurfaceExtent for FixedSurface {
    fn drawable_extent(&self) -> vk::Extent2D {
        self.0.get()
    }
}
