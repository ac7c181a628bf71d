//! Buffers shared with device callbacks.

pub mod ring;

pub use ring::{shared_ring, RingBuffer, SharedRing};
