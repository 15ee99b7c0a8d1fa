//! Command buffer recording and queue submission for [`VulkanDevice`]

use ash::vk;

use super::device::VulkanDevice;
use crate::render::api::{CommandDevice, GpuImage, PassTarget, Submission, VulkanError, VulkanResult};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Memory barrier making transfer writes visible to every buffer and image
/// read the frame may perform
fn transfer_to_read_barrier() -> vk::MemoryBarrier {
    vk::MemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                | vk::AccessFlags::INDEX_READ
                | vk::AccessFlags::UNIFORM_READ
                | vk::AccessFlags::SHADER_READ,
        )
        .build()
}

fn image_transition(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build()
}

impl CommandDevice for VulkanDevice {
    fn allocate_command_buffers(&mut self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.handles.device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)
    }

    fn begin_commands(&mut self, command_buffer: vk::CommandBuffer, one_time_submit: bool) -> VulkanResult<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe {
            let device = &self.handles.device;
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device.begin_command_buffer(command_buffer, &begin_info).map_err(VulkanError::Api)
        }
    }

    fn end_commands(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.handles.device.end_command_buffer(command_buffer) }.map_err(VulkanError::Api)
    }

    fn begin_pass(
        &mut self,
        command_buffer: vk::CommandBuffer,
        target: PassTarget,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let (render_pass, framebuffer) = match target {
            PassTarget::Swapchain { image_index } => {
                let Some(target) = self.swapchain_targets.get(image_index as usize) else {
                    log::error!("No swapchain framebuffer for image {image_index}");
                    return;
                };
                (self.swapchain_pass.handle(), target.framebuffer)
            }
            PassTarget::Offscreen { framebuffer, render_pass } => (render_pass, framebuffer),
        };

        // Clear colour and depth
        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: clear_color } },
            vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 } },
        ];
        let render_area = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        // Dynamic viewport covering the whole target
        #[allow(clippy::cast_precision_loss)]
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            let device = &self.handles.device;
            device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[render_area]);
        }
    }

    fn end_pass(&mut self, command_buffer: vk::CommandBuffer) {
        unsafe { self.handles.device.cmd_end_render_pass(command_buffer) };
    }

    fn copy_buffer(&mut self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        unsafe { self.handles.device.cmd_copy_buffer(command_buffer, src, dst, &[region]) };
    }

    fn copy_buffer_to_image(&mut self, command_buffer: vk::CommandBuffer, src: vk::Buffer, image: &GpuImage) {
        let to_transfer = image_transition(
            image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        );
        // Copy the whole buffer into mip level 0
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D { width: image.extent.width, height: image.extent.height, depth: 1 })
            .build();
        let to_shader_read = image_transition(
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        );

        unsafe {
            let device = &self.handles.device;
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            device.cmd_copy_buffer_to_image(
                command_buffer,
                src,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader_read],
            );
        }
    }

    fn transfer_barrier(&mut self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.handles.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT
                    | vk::PipelineStageFlags::VERTEX_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[transfer_to_read_barrier()],
                &[],
                &[],
            );
        }
    }

    fn submit(&mut self, submission: &Submission) -> VulkanResult<()> {
        let command_buffers = [submission.command_buffer];
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal_semaphores: Vec<_> = submission.signal.into_iter().collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.handles.device.queue_submit(
                self.handles.queue,
                &[submit_info],
                submission.fence.unwrap_or_else(vk::Fence::null),
            )
        }
        .map_err(VulkanError::Api)
    }
}
