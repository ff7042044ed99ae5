//! Mark phase: bitmaps and the tracer that fills them.

pub mod bitmap;
pub mod tracer;

pub use bitmap::{LiveSet, MarkBitmap, MarkBitmaps};
pub use tracer::Tracer;
