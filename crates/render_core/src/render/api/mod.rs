//! Backend-neutral types: errors, resource handles and the device seam

pub mod device;
pub mod error;
pub mod handles;

pub use device::{
    AcquireOutcome, CommandDevice, GpuDevice, MemoryDevice, PassTarget, PresentDevice, PresentOutcome,
    Submission, SurfaceExtent, SyncDevice,
};
pub use error::{VulkanError, VulkanResult};
pub use handles::{AllocationId, BufferClass, GpuBuffer, GpuFramebuffer, GpuImage, ResourceLifetime};
