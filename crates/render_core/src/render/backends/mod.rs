//! Device implementations

pub mod vulkan;
