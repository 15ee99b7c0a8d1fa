//! Frame state: the slot ring and the controller that drives it

pub mod frame_controller;
pub mod frame_slot;

pub use frame_controller::{ActiveFrame, FrameController, FrameEnd, FrameStatus, SkipReason, TEXTURE_FORMAT};
pub use frame_slot::{FrameSlot, SlotState};
