//! Frame-indexed loop playback on fully buffered clips.

use sonance_core::{ClipRegion, Error, LoopCount, Result};
use tracing::{debug, info};

use crate::device::{ClipLine, DeviceManager, LineGuard, LineKind, MixerSelection};
use crate::negotiate::Negotiator;
use crate::source::StreamHandle;

/// Playback position inside a clip, with loop bookkeeping.
///
/// The cursor walks forward one frame at a time. On reaching the loop end it jumps
/// back to the loop start while iterations remain; after the last iteration it
/// runs on to the end of the clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopCursor {
    total_frames: u64,
    position: u64,
    loop_start: u64,
    loop_end: u64,
    loop_count: LoopCount,
}

impl LoopCursor {
    /// A cursor at frame 0 looping over the whole clip zero extra times.
    pub const fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            position: 0,
            loop_start: 0,
            loop_end: total_frames.saturating_sub(1),
            loop_count: LoopCount::Times(0),
        }
    }

    pub const fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub const fn position(&self) -> u64 {
        self.position
    }

    pub const fn loop_points(&self) -> (u64, u64) {
        (self.loop_start, self.loop_end)
    }

    /// Remaining loop request.
    pub const fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    /// Move to `frame`. The end of the clip is a valid position.
    pub fn set_position(&mut self, frame: u64) -> Result<()> {
        if frame > self.total_frames {
            return Err(Error::InvalidArgument(format!(
                "frame {frame} beyond clip of {} frames",
                self.total_frames
            )));
        }
        self.position = frame;
        Ok(())
    }

    pub fn set_loop_points(&mut self, start: u64, end: u64) -> Result<()> {
        let region = ClipRegion::new(start, end, self.loop_count, self.total_frames)?;
        self.loop_start = region.start_frame();
        self.loop_end = region.end_frame();
        Ok(())
    }

    pub fn set_loop_count(&mut self, count: LoopCount) {
        self.loop_count = count;
    }

    /// The frame to render next, advancing the cursor. `None` once the clip is done.
    pub fn next_frame(&mut self) -> Option<u64> {
        if self.position >= self.total_frames {
            return None;
        }
        let frame = self.position;
        self.position += 1;
        if frame == self.loop_end {
            match self.loop_count {
                LoopCount::Continuous => self.position = self.loop_start,
                LoopCount::Times(n) if n > 0 => {
                    self.loop_count = LoopCount::Times(n - 1);
                    self.position = self.loop_start;
                }
                LoopCount::Times(_) => {}
            }
        }
        Some(frame)
    }

    /// Frames left to render, or `None` for a continuous loop.
    pub fn remaining_frames(&self) -> Option<u64> {
        let extra = u64::from(self.loop_count.extra_iterations()?);
        let rest = self.total_frames.saturating_sub(self.position);
        if self.position <= self.loop_end {
            Some(rest + extra * (self.loop_end - self.loop_start + 1))
        } else {
            Some(rest)
        }
    }
}

/// Acquire a clip line and load `stream` into it in the negotiated playback format.
///
/// The clip is returned open and stopped, ready for [`play_region`].
pub fn open_clip(
    manager: &DeviceManager,
    selection: &MixerSelection,
    stream: StreamHandle,
) -> Result<Box<dyn ClipLine>> {
    let negotiator = Negotiator::new(manager.config().default_bit_depth);
    let mut stream = negotiator.negotiate(stream)?;
    let format = *stream.format();

    let mut clip = manager
        .open(LineKind::Clip, None, None, selection)?
        .into_clip()?;
    clip.load(&mut stream)?;
    if let Err(e) = clip.open(Some(&format)) {
        clip.close();
        return Err(e);
    }
    info!(
        "Clip {} ready: {} frames of {format}",
        clip.info().id,
        clip.frame_length()
    );
    Ok(clip)
}

/// Play frames `start..=end` of `clip` a total of `repeat_count` times, then run
/// on to the end of the clip.
///
/// `start` defaults to 0, `end` to the last frame, `repeat_count` to one pass.
/// Returns once the clip has started.
pub fn play_region(
    clip: &mut dyn ClipLine,
    repeat_count: Option<u32>,
    start_frame: Option<u64>,
    end_frame: Option<u64>,
) -> Result<ClipRegion> {
    start_region(clip, LoopCount::from_repeat(repeat_count), start_frame, end_frame)
}

/// Loop frames `start..=end` of `clip` until it is stopped.
pub fn loop_continuous(
    clip: &mut dyn ClipLine,
    start_frame: Option<u64>,
    end_frame: Option<u64>,
) -> Result<ClipRegion> {
    start_region(clip, LoopCount::Continuous, start_frame, end_frame)
}

fn start_region(
    clip: &mut dyn ClipLine,
    loop_count: LoopCount,
    start_frame: Option<u64>,
    end_frame: Option<u64>,
) -> Result<ClipRegion> {
    let total = clip.frame_length();
    let start = start_frame.unwrap_or(0);
    let end = end_frame.unwrap_or_else(|| total.saturating_sub(1));
    let region = ClipRegion::new(start, end, loop_count, total)?;

    if clip.is_running() {
        clip.stop()?;
    }
    clip.set_frame_position(region.start_frame())?;
    clip.set_loop_points(region.start_frame(), region.end_frame())?;
    clip.set_loop_count(region.loop_count());
    clip.start()?;

    debug!(
        "Clip {} playing frames {}..={} with {:?}",
        clip.info().id,
        region.start_frame(),
        region.end_frame(),
        region.loop_count()
    );
    Ok(region)
}

/// Load `stream` into a clip, play the region to completion, and release the clip.
pub fn play_clip(
    manager: &DeviceManager,
    selection: &MixerSelection,
    stream: StreamHandle,
    repeat_count: Option<u32>,
    start_frame: Option<u64>,
    end_frame: Option<u64>,
) -> Result<ClipRegion> {
    let mut clip = open_clip(manager, selection, stream)?;
    let mut guard = LineGuard::open(clip.as_mut(), None)?;
    let region = play_region(&mut *guard, repeat_count, start_frame, end_frame)?;
    guard.drain()?;
    Ok(region)
}
