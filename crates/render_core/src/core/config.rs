//! # Render Core Configuration
//!
//! Tuning knobs for the frame ring, pooled memory, descriptor caching,
//! upload batching and the bounded waits of the frame loop.
//!
//! All sections have defaults and can be loaded from `.toml` or `.ron` via
//! the [`Config`] trait. Call [`RenderCoreConfig::validate`] before handing a
//! configuration to the frame controller; the controller calls it again.

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Upper bound on frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Memory pool configuration, shared by every buffer class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPoolConfig {
    /// Canonical bucket capacities in bytes, strictly increasing
    pub bucket_sizes: Vec<u64>,
    /// Overflow entries are reused when `request <= capacity < ratio * request`
    pub overflow_reuse_ratio: f64,
}

impl Default for MemoryPoolConfig {
    fn default() -> Self {
        Self {
            bucket_sizes: vec![256, KIB, 4 * KIB, 16 * KIB, 64 * KIB, 256 * KIB, MIB, 4 * MIB],
            overflow_reuse_ratio: 1.5,
        }
    }
}

/// Descriptor set cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGroupConfig {
    /// Capacity of the fixed descriptor pool backing each signature
    pub max_sets_per_signature: u32,
    /// Number of sets allocated each time a slot's backing array runs out
    pub growth_chunk: u32,
}

impl Default for ResourceGroupConfig {
    fn default() -> Self {
        Self { max_sets_per_signature: 1024, growth_chunk: 128 }
    }
}

/// Transfer batching configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Number of transfer command buffers in the upload ring
    pub stream_count: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { stream_count: 16 }
    }
}

/// Bounded waits of the frame loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fence wait timeout in nanoseconds
    pub fence_timeout_ns: u64,
    /// Timeout of a single image acquisition attempt in nanoseconds
    pub acquire_timeout_ns: u64,
    /// Additional acquisition attempts after the first one times out
    pub acquire_retries: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ns: 1_000_000_000,
            acquire_timeout_ns: 100_000_000,
            acquire_retries: 3,
        }
    }
}

/// # Render Core Configuration
///
/// Top-level configuration consumed by the frame controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderCoreConfig {
    /// Number of frame slots in the ring
    pub frames_in_flight: usize,
    /// Bucket table and overflow policy
    pub memory: MemoryPoolConfig,
    /// Descriptor cache sizing
    pub resource_groups: ResourceGroupConfig,
    /// Upload ring sizing
    pub upload: UploadConfig,
    /// Wait bounds
    pub timing: TimingConfig,
    /// Clear colour of the swapchain pass (RGBA)
    pub clear_color: [f32; 4],
}

impl Default for RenderCoreConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            memory: MemoryPoolConfig::default(),
            resource_groups: ResourceGroupConfig::default(),
            upload: UploadConfig::default(),
            timing: TimingConfig::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RenderCoreConfig {
    /// Set the number of frames in flight
    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Replace the bucket table
    #[must_use]
    pub fn with_bucket_sizes(mut self, sizes: impl Into<Vec<u64>>) -> Self {
        self.memory.bucket_sizes = sizes.into();
        self
    }

    /// Set the overflow reuse ratio
    #[must_use]
    pub const fn with_overflow_reuse_ratio(mut self, ratio: f64) -> Self {
        self.memory.overflow_reuse_ratio = ratio;
        self
    }

    /// Set descriptor pool capacity and growth chunk
    #[must_use]
    pub const fn with_resource_groups(mut self, max_sets_per_signature: u32, growth_chunk: u32) -> Self {
        self.resource_groups = ResourceGroupConfig { max_sets_per_signature, growth_chunk };
        self
    }

    /// Set the number of transfer command buffers
    #[must_use]
    pub const fn with_upload_streams(mut self, count: usize) -> Self {
        self.upload.stream_count = count;
        self
    }

    /// Set the fence wait timeout
    #[must_use]
    pub const fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.timing.fence_timeout_ns = timeout_ns;
        self
    }

    /// Set the swapchain clear colour
    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }

        let sizes = &self.memory.bucket_sizes;
        if sizes.is_empty() {
            return Err(ConfigError::Invalid("bucket_sizes must not be empty".to_string()));
        }
        if sizes[0] == 0 {
            return Err(ConfigError::Invalid("bucket sizes must be non-zero".to_string()));
        }
        if let Some(pair) = sizes.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::Invalid(format!(
                "bucket sizes must be strictly increasing ({} is followed by {})",
                pair[0], pair[1]
            )));
        }
        if !(self.memory.overflow_reuse_ratio > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "overflow_reuse_ratio must be greater than 1.0, got {}",
                self.memory.overflow_reuse_ratio
            )));
        }

        let groups = &self.resource_groups;
        if groups.max_sets_per_signature == 0 || groups.growth_chunk == 0 {
            return Err(ConfigError::Invalid(
                "max_sets_per_signature and growth_chunk must be non-zero".to_string(),
            ));
        }

        if self.upload.stream_count == 0 {
            return Err(ConfigError::Invalid("upload stream_count must be non-zero".to_string()));
        }

        if self.timing.fence_timeout_ns == 0 || self.timing.acquire_timeout_ns == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }

        Ok(())
    }
}

impl Config for RenderCoreConfig {}
