//! Error types shared by every render subsystem

use ash::vk;

use crate::config::ConfigError;

/// Vulkan-specific error types
#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A GPU object required at startup could not be created
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The swapchain no longer matches the surface and has to be rebuilt
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// A statically sized pool ran out of capacity
    #[error("{resource} exhausted (limit {limit})")]
    ResourceExhausted {
        /// Name of the exhausted resource
        resource: &'static str,
        /// Configured capacity that was exceeded
        limit: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A bounded fence wait expired
    #[error("Fence wait timed out after {timeout_ns} ns")]
    FenceTimeout {
        /// Timeout that elapsed
        timeout_ns: u64,
    },

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl VulkanError {
    /// Build an [`InvalidOperation`](Self::InvalidOperation) error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Errors the frame loop recovers from by rebuilding and retrying
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SwapchainOutOfDate | Self::Api(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
        )
    }

    /// Errors that leave the renderer unusable
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidOperation { .. } | Self::FenceTimeout { .. } => false,
            _ => !self.is_retryable(),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
