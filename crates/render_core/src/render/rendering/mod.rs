//! Command streams outside the main frame: transfer batching and offscreen
//! passes

pub mod offscreen;
pub mod upload;

pub use offscreen::OffscreenPass;
pub use upload::UploadBatcher;
