//! Per-slot transient resource tracking
//!
//! Anything created for a single frame is pushed into the tracker of the
//! frame slot that recorded it. The tracker is retired only when that same
//! slot begins its next frame, after its completion fence has been waited
//! on, so nothing is reclaimed while the GPU may still read it.

use crate::render::api::{GpuBuffer, GpuFramebuffer, GpuImage, MemoryDevice, ResourceLifetime};

use super::memory_pool::MemoryPools;

/// Counts of what one retirement released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetiredCounts {
    /// Buffers returned to their pools
    pub buffers: usize,
    /// Images destroyed
    pub images: usize,
    /// Framebuffers destroyed
    pub framebuffers: usize,
}

/// Transient resources owned by one frame slot
#[derive(Debug, Default)]
pub struct FrameResources {
    buffers: Vec<GpuBuffer>,
    images: Vec<GpuImage>,
    framebuffers: Vec<GpuFramebuffer>,
    awaits_offscreen: bool,
}

impl FrameResources {
    /// Take ownership of a buffer until the slot retires
    pub fn push_buffer(&mut self, buffer: GpuBuffer) {
        debug_assert!(!buffer.is_null(), "tracking a null buffer");
        self.buffers.push(GpuBuffer { lifetime: ResourceLifetime::SingleFrame, ..buffer });
    }

    /// Take ownership of an image until the slot retires
    pub fn push_image(&mut self, image: GpuImage) {
        self.images.push(GpuImage { lifetime: ResourceLifetime::SingleFrame, ..image });
    }

    /// Take ownership of an offscreen target until the slot retires
    pub fn push_framebuffer(&mut self, framebuffer: GpuFramebuffer) {
        self.framebuffers.push(framebuffer);
    }

    /// Mark that work recorded on the offscreen command buffer reads or
    /// writes these resources
    pub fn mark_offscreen(&mut self) {
        self.awaits_offscreen = true;
    }

    /// Whether the offscreen fence has to be waited before retiring
    #[must_use]
    pub const fn awaits_offscreen(&self) -> bool {
        self.awaits_offscreen
    }

    /// Move everything tracked by `other` into this tracker
    pub fn absorb(&mut self, other: &mut Self) {
        self.buffers.append(&mut other.buffers);
        self.images.append(&mut other.images);
        self.framebuffers.append(&mut other.framebuffers);
        self.awaits_offscreen |= std::mem::take(&mut other.awaits_offscreen);
    }

    /// Release everything: buffers go back to their class pool, images and
    /// framebuffers are destroyed
    ///
    /// The caller has already waited on every fence guarding this slot.
    pub fn retire(&mut self, device: &mut impl MemoryDevice, pools: &mut MemoryPools) -> RetiredCounts {
        let counts = RetiredCounts {
            buffers: self.buffers.len(),
            images: self.images.len(),
            framebuffers: self.framebuffers.len(),
        };

        for buffer in self.buffers.drain(..) {
            pools.free(buffer);
        }
        for image in self.images.drain(..) {
            device.destroy_image(&image);
        }
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(&framebuffer);
        }
        self.awaits_offscreen = false;

        counts
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty() && self.framebuffers.is_empty()
    }

    /// Tracked buffers
    #[must_use]
    pub fn buffers(&self) -> &[GpuBuffer] {
        &self.buffers
    }

    /// Tracked images
    #[must_use]
    pub fn images(&self) -> &[GpuImage] {
        &self.images
    }

    /// Tracked framebuffers
    #[must_use]
    pub fn framebuffers(&self) -> &[GpuFramebuffer] {
        &self.framebuffers
    }
}
