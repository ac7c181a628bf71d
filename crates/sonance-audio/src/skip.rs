//! Approximate byte and ratio repositioning.
//!
//! Native skip primitives may move fewer bytes than asked for. Skipping keeps
//! calling them until the request is met, accepting a small deficit and falling
//! back to reading when the primitive stops making progress.

use sonance_core::config::DEFAULT_SKIP_TOLERANCE_BYTES;
use sonance_core::{EngineConfig, Error, Result};
use tracing::{debug, warn};

use crate::source::StreamHandle;

const DISCARD_CHUNK: usize = 8192;

/// Skip about `byte_count` bytes of `stream`.
///
/// Never fails because of an under-skip: a stalled skip within `tolerance` bytes of
/// the target is accepted, a larger deficit is made up by reading, and end of
/// stream ends the skip early.
pub fn skip(stream: &mut StreamHandle, byte_count: u64, tolerance: u64) -> Result<&mut StreamHandle> {
    let mut remaining = byte_count;
    let mut calls = 0u32;

    while remaining > 0 {
        let skipped = stream.skip_native(remaining)?;
        calls += 1;
        if skipped > 0 {
            remaining = remaining.saturating_sub(skipped);
            continue;
        }
        if remaining <= tolerance {
            debug!("Skip stalled {remaining} bytes short; within tolerance");
            break;
        }
        warn!(
            "Native skip stalled {remaining} bytes short of {byte_count}; reading instead"
        );
        remaining -= discard(stream, remaining)?;
        break;
    }

    debug!(
        "Skipped {} of {byte_count} bytes in {calls} native calls",
        byte_count - remaining
    );
    Ok(stream)
}

/// Read and drop up to `n` bytes. Returns how many were dropped.
fn discard(stream: &mut StreamHandle, n: u64) -> Result<u64> {
    let mut scratch = vec![0u8; DISCARD_CHUNK];
    let mut dropped = 0u64;
    while dropped < n {
        let want = usize::try_from(n - dropped).map_or(DISCARD_CHUNK, |w| w.min(DISCARD_CHUNK));
        match stream.read(&mut scratch[..want])? {
            Some(read) => dropped += read as u64,
            None => break,
        }
    }
    Ok(dropped)
}

/// Ratio-based seeking over a length captured when the skipper is created.
pub struct Skipper<'a> {
    stream: &'a mut StreamHandle,
    captured: u64,
    tolerance: u64,
}

impl<'a> Skipper<'a> {
    /// Capture the stream's remaining length. Unknown lengths count as zero.
    pub fn new(stream: &'a mut StreamHandle) -> Self {
        let captured = stream.available_length().unwrap_or_else(|| {
            warn!("Seeking in {} with unknown length", stream.name());
            0
        });
        Self {
            stream,
            captured,
            tolerance: DEFAULT_SKIP_TOLERANCE_BYTES,
        }
    }

    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: u64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Take the skip tolerance from `config`.
    #[must_use]
    pub const fn with_config(self, config: &EngineConfig) -> Self {
        self.with_tolerance(config.skip_tolerance_bytes)
    }

    pub const fn captured_length(&self) -> u64 {
        self.captured
    }

    /// Skip `ratio * captured_length` bytes from the current position.
    pub fn seek_ratio(&mut self, ratio: f64) -> Result<&mut StreamHandle> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::InvalidArgument(format!(
                "seek ratio {ratio} outside [0, 1]"
            )));
        }
        let bytes = (ratio * self.captured as f64) as u64;
        skip(self.stream, bytes, self.tolerance)
    }

    pub fn into_inner(self) -> &'a mut StreamHandle {
        self.stream
    }
}
