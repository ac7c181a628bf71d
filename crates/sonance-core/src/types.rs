//! Core domain types for Sonance.

pub mod clip;
pub mod format;

pub use clip::{ClipRegion, LoopCount};
pub use format::{ByteOrder, Encoding, FormatDescriptor, NOT_SPECIFIED, NOT_SPECIFIED_RATE};
