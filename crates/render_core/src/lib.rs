//! # Render Core
//!
//! The resource-lifecycle core of a Vulkan rendering backend.
//!
//! ## Features
//!
//! - **Frame cycling**: a fixed ring of frame slots, each gated by its own
//!   completion fence, driving acquire / record / submit / present
//! - **Pooled GPU memory**: size-bucketed free lists per buffer class so
//!   steady-state frames never touch the allocator
//! - **Transient tracking**: per-slot lists of buffers, images and
//!   framebuffers reclaimed when the slot comes around again
//! - **Descriptor caching**: descriptor sets deduplicated by binding
//!   signature and handed out per frame with resettable cursors
//! - **Upload batching**: host → device copies coalesced into a ring of
//!   transfer command buffers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn run(controller: &mut FrameController<VulkanDevice, DescriptorPoolAllocator>) -> VulkanResult<()> {
//!     loop {
//!         match controller.begin_frame(None)? {
//!             FrameStatus::Skipped(reason) => {
//!                 log::debug!("frame skipped: {reason:?}");
//!                 continue;
//!             }
//!             FrameStatus::Recording(frame) => {
//!                 // record draws into frame.command_buffer
//!                 let _ = frame;
//!                 controller.end_frame()?;
//!             }
//!         }
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for users of the crate
pub mod prelude {
    pub use crate::config::{Config, ConfigError};
    pub use crate::core::{DeviceCapabilities, RenderCoreConfig};
    pub use crate::foundation::collections::{FrameRing, FrameSlotId};
    pub use crate::render::api::{
        BufferClass, GpuBuffer, GpuDevice, GpuFramebuffer, GpuImage, ResourceLifetime, SurfaceExtent,
        VulkanError, VulkanResult,
    };
    pub use crate::render::backends::vulkan::{DescriptorPoolAllocator, DeviceHandles, VulkanDevice};
    pub use crate::render::resources::{GroupSignature, ResourceGroupAllocator, SignatureIndex};
    pub use crate::render::state::{ActiveFrame, FrameController, FrameEnd, FrameStatus, SkipReason};
}
