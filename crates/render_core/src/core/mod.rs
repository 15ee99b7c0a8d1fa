//! # Core Module
//!
//! Configuration and device-capability types shared by every subsystem.
//!
//! ## Organization
//!
//! - **Config**: frame ring, memory pool, descriptor cache and timing settings
//! - **Capabilities**: immutable extension / feature set chosen at device selection

pub mod capabilities;
pub mod config;

pub use capabilities::DeviceCapabilities;
pub use config::{
    MemoryPoolConfig, RenderCoreConfig, ResourceGroupConfig, TimingConfig, UploadConfig,
};
