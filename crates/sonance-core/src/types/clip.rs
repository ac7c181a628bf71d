//! Clip loop regions.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How many extra passes a clip makes over its loop region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoopCount {
    /// Play the region this many additional times after the first pass.
    Times(u32),
    /// Loop until stopped.
    Continuous,
}

impl LoopCount {
    /// Loop count for a total number of plays. `None` and `Some(0)` mean a single pass.
    pub const fn from_repeat(repeat_count: Option<u32>) -> Self {
        match repeat_count {
            Some(n) => Self::Times(n.saturating_sub(1)),
            None => Self::Times(0),
        }
    }

    /// Extra iterations still requested, or `None` when continuous.
    pub const fn extra_iterations(&self) -> Option<u32> {
        match self {
            Self::Times(n) => Some(*n),
            Self::Continuous => None,
        }
    }

    pub const fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous)
    }
}

impl Default for LoopCount {
    fn default() -> Self {
        Self::Times(0)
    }
}

/// A validated frame region inside a clip, with its loop request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipRegion {
    start_frame: u64,
    end_frame: u64,
    loop_count: LoopCount,
}

impl ClipRegion {
    /// Build a region, checking `start <= end < total_frames`.
    pub fn new(
        start_frame: u64,
        end_frame: u64,
        loop_count: LoopCount,
        total_frames: u64,
    ) -> Result<Self> {
        if total_frames == 0 {
            return Err(Error::InvalidArgument("clip holds no frames".to_string()));
        }
        if start_frame > end_frame {
            return Err(Error::InvalidArgument(format!(
                "loop start {start_frame} is after loop end {end_frame}"
            )));
        }
        if end_frame >= total_frames {
            return Err(Error::InvalidArgument(format!(
                "loop end {end_frame} is outside clip of {total_frames} frames"
            )));
        }
        Ok(Self {
            start_frame,
            end_frame,
            loop_count,
        })
    }

    /// The whole clip, played once.
    pub fn whole(total_frames: u64) -> Result<Self> {
        Self::new(
            0,
            total_frames.saturating_sub(1),
            LoopCount::default(),
            total_frames,
        )
    }

    pub const fn start_frame(&self) -> u64 {
        self.start_frame
    }

    /// Inclusive end frame.
    pub const fn end_frame(&self) -> u64 {
        self.end_frame
    }

    pub const fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    /// Number of frames in one pass over the region.
    pub const fn len_frames(&self) -> u64 {
        self.end_frame - self.start_frame + 1
    }
}
