//! faceprint-capture — frame sources feeding the recognition pipeline.
//!
//! A source yields colour frames in order until it runs dry. Pacing and
//! hand-off to the analysis thread belong to the caller.

pub mod source;

pub use source::{CaptureError, DirectorySource, FrameSource};
