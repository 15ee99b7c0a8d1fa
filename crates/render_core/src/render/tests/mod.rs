//! Frame-cycle scenarios against the mock device

mod transients;

use ash::vk;

use crate::core::config::RenderCoreConfig;
use crate::foundation::logging::{self, LevelFilter};
use crate::render::state::{ActiveFrame, FrameController, FrameStatus};
use crate::render::testing::{FixedSurface, MockDevice, MockGroupAllocator};

type TestController = FrameController<MockDevice, MockGroupAllocator>;

fn small_config(frames: usize) -> RenderCoreConfig {
    RenderCoreConfig::default()
        .with_frames_in_flight(frames)
        .with_bucket_sizes([32, 64, 128])
        .with_upload_streams(4)
}

fn controller(frames: usize) -> (TestController, FixedSurface) {
    logging::init_with_filter(LevelFilter::Trace);
    let surface = FixedSurface::new(800, 600);
    let controller = FrameController::new(
        MockDevice::with_swapchain(vk::Extent2D { width: 800, height: 600 }, 3),
        MockGroupAllocator::new(64, 8),
        surface.clone(),
        small_config(frames),
    )
    .expect("controller");
    (controller, surface)
}

fn begin(controller: &mut TestController) -> ActiveFrame {
    match controller.begin_frame(None).expect("begin_frame") {
        FrameStatus::Recording(frame) => frame,
        FrameStatus::Skipped(reason) => panic!("frame unexpectedly skipped: {reason:?}"),
    }
}

fn run_empty_frames(controller: &mut TestController, count: usize) {
    for _ in 0..count {
        begin(controller);
        controller.end_frame().expect("end_frame");
    }
}
