//! Dataset-building pipelines
//!
//! Text documents become instruction records; images become
//! image/description records. Both reach the model through
//! [`CompletionService`](crate::ai::CompletionService).

pub mod image;
pub mod text;

pub use image::{BatchOutcome, ImageDescriber, ImageFailure};
pub use text::{FormatOutcome, SegmentBoundary, TextProcessor, TextPrompts};
