//! Lightweight GPU resource handles
//!
//! Handles are plain `Copy` structs. Whoever allocated one owns it; passing a
//! handle around never duplicates the underlying GPU object.

use ash::vk;

slotmap::new_key_type! {
    /// Device-side key of the memory allocation backing a buffer or image
    pub struct AllocationId;
}

/// Usage class of a pooled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferClass {
    /// Host-visible staging memory used as a transfer source
    Transfer,
    /// Device-local vertex data
    Vertex,
    /// Device-local index data
    Index,
    /// Device-local uniform data
    Uniform,
}

impl BufferClass {
    /// Every class, in pool order
    pub const ALL: [Self; 4] = [Self::Transfer, Self::Vertex, Self::Index, Self::Uniform];

    /// Buffer usage flags for this class
    #[must_use]
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Transfer => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Whether the CPU writes this class's memory directly
    #[must_use]
    pub const fn is_host_visible(self) -> bool {
        matches!(self, Self::Transfer)
    }

    /// Position of the class in [`ALL`](Self::ALL)
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Transfer => 0,
            Self::Vertex => 1,
            Self::Index => 2,
            Self::Uniform => 3,
        }
    }
}

/// Lifetime category of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceLifetime {
    /// Owned by the caller until explicitly released
    #[default]
    Persistent,
    /// Owned by a frame slot and reclaimed when the slot comes around again
    SingleFrame,
}

/// Pooled buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    /// Buffer object
    pub buffer: vk::Buffer,
    /// Backing allocation
    pub allocation: AllocationId,
    /// Committed capacity in bytes; decides the bucket on free
    pub capacity: vk::DeviceSize,
    /// Pool the buffer belongs to
    pub class: BufferClass,
    /// Lifetime category
    pub lifetime: ResourceLifetime,
}

impl GpuBuffer {
    /// Whether this handle refers to no buffer
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }
}

/// Image handle with its default view and optional sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuImage {
    /// Image object
    pub image: vk::Image,
    /// View over the whole image
    pub view: vk::ImageView,
    /// Sampler, null for attachments never sampled
    pub sampler: vk::Sampler,
    /// Backing allocation
    pub allocation: AllocationId,
    /// Pixel format
    pub format: vk::Format,
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Lifetime category
    pub lifetime: ResourceLifetime,
}

/// Offscreen render target: framebuffer plus its colour and depth images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuFramebuffer {
    /// Framebuffer object
    pub framebuffer: vk::Framebuffer,
    /// Render pass the framebuffer is compatible with
    pub render_pass: vk::RenderPass,
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Sampled colour attachment
    pub color: GpuImage,
    /// Depth attachment
    pub depth: GpuImage,
}
