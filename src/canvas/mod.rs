pub mod client;
pub mod push;
pub mod sync;
pub mod types;

pub use client::{CanvasClient, CanvasError, CanvasResult};
pub use push::{CanvasPush, ColumnMode};
pub use sync::CanvasSync;
