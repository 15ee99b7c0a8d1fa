//! Rendering core
//!
//! - [`api`]: errors, handles and the device traits everything else uses
//! - [`resources`]: memory pools, descriptor cache, transient tracking
//! - [`rendering`]: upload batching and offscreen passes
//! - [`state`]: frame slots and the frame controller
//! - [`backends`]: the Vulkan implementation of the device traits

pub mod api;
pub mod backends;
pub mod rendering;
pub mod resources;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;
