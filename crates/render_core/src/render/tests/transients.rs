use ash::vk;

use super::{begin, controller, run_empty_frames};
use crate::render::api::{BufferClass, VulkanError};
use crate::render::resources::GroupSignature;
use crate::render::testing::MockEvent;

#[test]
fn test_no_premature_reuse_for_any_ring_size() {
    for frames in 1..=4 {
        let (mut controller, _surface) = controller(frames);

        let frame = begin(&mut controller);
        let buffer = controller.alloc_buffer(BufferClass::Vertex, None, 50).unwrap();
        controller.push_transient_buffer(buffer);
        let fence = controller.slot(frame.slot).in_flight_fence();
        controller.end_frame().unwrap();

        for _ in 1..frames {
            begin(&mut controller);
            assert!(!controller.pools().is_stashed(&buffer), "reused early with {frames} slots");
            controller.end_frame().unwrap();
        }
        assert!(!controller.pools().is_stashed(&buffer));

        let again = begin(&mut controller);
        assert_eq!(again.slot, frame.slot);
        assert!(controller.pools().is_stashed(&buffer));
        assert!(controller.device().is_fence_signaled(fence));
        controller.end_frame().unwrap();
    }
}

#[test]
fn test_steady_state_frames_do_not_allocate() {
    let (mut controller, _surface) = controller(2);
    let frame_work = |controller: &mut super::TestController| {
        begin(controller);
        for size in [20, 60, 100] {
            let buffer = controller.alloc_buffer(BufferClass::Uniform, None, size).unwrap();
            controller.push_transient_buffer(buffer);
        }
        controller.end_frame().unwrap();
    };

    for _ in 0..2 {
        frame_work(&mut controller);
    }
    let warmed_up = controller.pools().get(BufferClass::Uniform).allocations_created();
    assert_eq!(warmed_up, 6);

    for _ in 0..10 {
        frame_work(&mut controller);
    }
    assert_eq!(controller.pools().get(BufferClass::Uniform).allocations_created(), warmed_up);
}

#[test]
fn test_freed_buffer_waits_for_slot_retirement() {
    let (mut controller, _surface) = controller(2);
    begin(&mut controller);
    let buffer = controller.alloc_buffer(BufferClass::Index, None, 64).unwrap();
    controller.free_buffer(buffer);
    assert!(!controller.pools().is_stashed(&buffer));
    controller.end_frame().unwrap();

    run_empty_frames(&mut controller, 1);
    begin(&mut controller);
    assert!(controller.pools().is_stashed(&buffer));
}

#[test]
fn test_upload_is_flushed_before_frame_submission() {
    let (mut controller, _surface) = controller(2);
    let frame = begin(&mut controller);
    let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
    let buffer = controller.upload_slice(BufferClass::Vertex, &vertices).unwrap();
    assert_eq!(buffer.capacity, 32);
    assert_eq!(buffer.class, BufferClass::Vertex);

    let staging = controller.slot(frame.slot).resources().buffers()[0];
    assert_eq!(staging.class, BufferClass::Transfer);
    assert_eq!(controller.device().allocation_contents(staging.allocation).map(<[u8]>::len), Some(24));

    controller.end_frame().unwrap();

    let submissions = controller.device().submissions();
    assert_eq!(submissions.len(), 2);
    assert_ne!(submissions[0].command_buffer, frame.command_buffer);
    assert_eq!(submissions[1].command_buffer, frame.command_buffer);
    assert_eq!(
        controller.device().count(|e| matches!(e, MockEvent::CopyBuffer { size: 24, .. })),
        1
    );
    assert_eq!(controller.device().count(|e| matches!(e, MockEvent::Barrier(_))), 1);

    // Staging returns to the transfer pool only when the slot comes back
    assert!(!controller.pools().is_stashed(&staging));
    run_empty_frames(&mut controller, 1);
    begin(&mut controller);
    assert!(controller.pools().is_stashed(&staging));
}

#[test]
fn test_uploads_between_frames_belong_to_next_slot() {
    let (mut controller, _surface) = controller(2);
    let buffer = controller.upload_buffer(BufferClass::Index, &[1, 0, 2, 0, 3, 0]).unwrap();
    assert_eq!(buffer.capacity, 32);
    assert!(controller.uploads().is_open());

    let frame = begin(&mut controller);
    let staging = controller.slot(frame.slot).resources().buffers()[0];
    assert!(!controller.pools().is_stashed(&staging));
    controller.end_frame().unwrap();
    assert!(!controller.uploads().is_open());
    assert_eq!(controller.uploads().submitted(), 1);

    run_empty_frames(&mut controller, 1);
    assert!(!controller.pools().is_stashed(&staging));
    let again = begin(&mut controller);
    assert_eq!(again.slot, frame.slot);
    assert!(controller.pools().is_stashed(&staging));
}

#[test]
fn test_transfer_class_upload_skips_staging() {
    let (mut controller, _surface) = controller(2);
    let buffer = controller.upload_buffer(BufferClass::Transfer, &[9; 10]).unwrap();
    assert_eq!(controller.device().allocation_contents(buffer.allocation), Some(&[9u8; 10][..]));
    assert!(!controller.uploads().is_open());
}

#[test]
fn test_empty_upload_is_rejected() {
    let (mut controller, _surface) = controller(2);
    assert!(matches!(
        controller.upload_buffer(BufferClass::Vertex, &[]),
        Err(VulkanError::InvalidOperation { .. })
    ));
}

#[test]
fn test_rgb_image_upload_expands_to_rgba() {
    let (mut controller, _surface) = controller(2);
    let frame = begin(&mut controller);

    let rgb = image::RgbImage::from_raw(2, 1, vec![10, 20, 30, 40, 50, 60]).unwrap();
    let texture = controller.upload_rgb_image(&rgb).unwrap();
    assert_eq!(texture.extent, vk::Extent2D { width: 2, height: 1 });
    assert_eq!(texture.format, vk::Format::R8G8B8A8_UNORM);
    assert_ne!(texture.sampler, vk::Sampler::null());

    let staging = controller.slot(frame.slot).resources().buffers()[0];
    assert_eq!(
        controller.device().allocation_contents(staging.allocation),
        Some(&[10u8, 20, 30, 255, 40, 50, 60, 255][..])
    );
    assert_eq!(
        controller.device().count(|e| matches!(e, MockEvent::CopyImage { image, .. } if *image == texture.image)),
        1
    );
    controller.end_frame().unwrap();
}

#[test]
fn test_texture_size_mismatch_is_rejected() {
    let (mut controller, _surface) = controller(2);
    assert!(controller.upload_texture(4, 4, &[0; 15]).is_err());
    assert!(controller.upload_texture(0, 4, &[]).is_err());
    assert_eq!(controller.pools().get(BufferClass::Transfer).allocations_created(), 0);
}

#[test]
fn test_transient_image_destroyed_when_slot_returns() {
    let (mut controller, _surface) = controller(2);
    begin(&mut controller);
    let texture = controller.upload_texture(1, 1, &[1, 2, 3, 4]).unwrap();
    controller.push_transient_image(texture);
    controller.end_frame().unwrap();

    run_empty_frames(&mut controller, 1);
    assert_eq!(controller.device().images_destroyed, 0);
    begin(&mut controller);
    assert_eq!(controller.device().images_destroyed, 1);
}

#[test]
fn test_offscreen_pass_records_on_own_buffer() {
    let (mut controller, _surface) = controller(2);
    let frame = begin(&mut controller);
    assert_eq!(controller.command_buffer(), Some(frame.command_buffer));

    let extent = vk::Extent2D { width: 128, height: 128 };
    let target = controller.begin_framebuffer(extent, vk::Format::R8G8B8A8_UNORM).unwrap();
    let offscreen_cmd = controller.command_buffer().unwrap();
    assert_ne!(offscreen_cmd, frame.command_buffer);
    assert!(matches!(controller.end_frame(), Err(VulkanError::InvalidOperation { .. })));

    assert_eq!(controller.end_framebuffer().unwrap(), target);
    assert_eq!(controller.command_buffer(), Some(frame.command_buffer));
    controller.end_frame().unwrap();

    let submissions = controller.device().submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].command_buffer, offscreen_cmd);
    assert!(submissions[0].wait.is_none() && submissions[0].signal.is_none());
}

#[test]
fn test_offscreen_target_retired_after_both_fences() {
    let (mut controller, _surface) = controller(2);
    let frame = begin(&mut controller);
    let slot_fence = controller.slot(frame.slot).in_flight_fence();
    let target = controller
        .begin_framebuffer(vk::Extent2D { width: 16, height: 16 }, vk::Format::R8G8B8A8_UNORM)
        .unwrap();
    controller.end_framebuffer().unwrap();
    let offscreen_fence = controller.device().submissions().last().and_then(|s| s.fence).unwrap();
    controller.end_frame().unwrap();

    run_empty_frames(&mut controller, 1);
    assert_eq!(controller.device().framebuffers_destroyed, 0);
    begin(&mut controller);
    assert_eq!(controller.device().framebuffers_destroyed, 1);

    let device = controller.device();
    let destroyed = device.position(|e| *e == MockEvent::DestroyFramebuffer(target.framebuffer)).unwrap();
    let slot_done = device.position(|e| *e == MockEvent::FenceCompleted(slot_fence)).unwrap();
    let offscreen_done = device.position(|e| *e == MockEvent::FenceCompleted(offscreen_fence)).unwrap();
    assert!(slot_done < destroyed && offscreen_done < destroyed);
}

#[test]
fn test_offscreen_pass_outside_frame_flushes_uploads_first() {
    let (mut controller, _surface) = controller(2);
    controller.upload_buffer(BufferClass::Uniform, &[0; 16]).unwrap();
    controller
        .begin_framebuffer(vk::Extent2D { width: 8, height: 8 }, vk::Format::R8G8B8A8_UNORM)
        .unwrap();
    controller.end_framebuffer().unwrap();

    let submissions = controller.device().submissions();
    assert_eq!(submissions.len(), 2);
    assert!(!controller.uploads().is_open());
    assert_eq!(controller.uploads().submitted(), 1);

    let upload_cmd = controller
        .device()
        .events
        .iter()
        .find_map(|e| match e {
            MockEvent::CopyBuffer { command_buffer, .. } => Some(*command_buffer),
            _ => None,
        })
        .unwrap();
    assert_eq!(submissions[0].command_buffer, upload_cmd);
    assert_ne!(submissions[1].command_buffer, upload_cmd);

    // The target waits in the deferred tracker for the next slot
    let frame = begin(&mut controller);
    assert_eq!(controller.slot(frame.slot).resources().framebuffers().len(), 1);
    assert!(controller.slot(frame.slot).resources().awaits_offscreen());
}

#[test]
fn test_offscreen_sets_outside_frame_survive_until_fence_completes() {
    let (mut controller, _surface) = controller(2);
    let bindings = GroupSignature::builder()
        .combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
        .build()
        .layout_bindings();
    let layout = vk::DescriptorSetLayout::null();
    let index = controller.signature_index(&bindings).unwrap();

    controller
        .begin_framebuffer(vk::Extent2D { width: 16, height: 16 }, vk::Format::R8G8B8A8_UNORM)
        .unwrap();
    let offscreen_set = controller.descriptor_set(index, layout).unwrap();
    controller.end_framebuffer().unwrap();
    let offscreen_fence = controller.device().submissions().last().and_then(|s| s.fence).unwrap();
    assert!(controller.device().is_fence_pending(offscreen_fence));

    let frame = begin(&mut controller);
    assert!(controller.device().is_fence_signaled(offscreen_fence));
    let completed = controller
        .device()
        .position(|e| *e == MockEvent::FenceCompleted(offscreen_fence))
        .unwrap();
    let recorded = controller
        .device()
        .position(|e| *e == MockEvent::BeginCommands(frame.command_buffer))
        .unwrap();
    assert!(completed < recorded);

    // The rewound cursor hands the set out again only now that it is idle
    assert_eq!(controller.descriptor_set(index, layout).unwrap(), offscreen_set);
}
