//! Device lines, mixers, and scoped acquisition.
//!
//! A line moves through `Closed -> Open -> Started -> Stopped -> Closed`. Every
//! transition is reported through the line's [`EventRelay`]. Lines are owned by a
//! single operation at a time and are not `Sync`.

/// Implements the `Line` accessors that read straight from a `core: LineCore` field.
macro_rules! core_accessors {
    () => {
        fn info(&self) -> &$crate::device::LineInfo {
            self.core.info()
        }

        fn state(&self) -> $crate::device::LineState {
            self.core.state()
        }

        fn format(&self) -> Option<sonance_core::FormatDescriptor> {
            self.core.format()
        }

        fn buffer_size(&self) -> usize {
            self.core.buffer_size()
        }

        fn events(&self) -> std::sync::Arc<$crate::device::EventRelay> {
            self.core.events()
        }
    };
}

pub mod cpal;
pub mod events;
pub mod manager;
pub mod scoped;
pub mod virtual_mixer;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sonance_core::{Error, FormatDescriptor, LoopCount, Result};
use tracing::debug;

use crate::source::StreamHandle;

pub use events::{
    attach_listener, detach_listener, EventRelay, LineEvent, LineEventKind, LineListener,
    ListenerGuard, ListenerId,
};
pub use manager::{DeviceManager, Mixer, MixerInfo, MixerSelection};
pub use scoped::{scoped_open, LineGuard};
pub use virtual_mixer::{Recording, VirtualMixer, VirtualStats};

/// What a line is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    /// Plays bytes written to it.
    Output,
    /// Captures bytes read from it.
    Input,
    /// Fully buffered playback with loop control.
    Clip,
    /// Physical port (speaker, line-in); lifecycle only.
    Port,
    /// A mixer exposed as a line; lifecycle only.
    MixerLine,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Output => "output",
            Self::Input => "input",
            Self::Clip => "clip",
            Self::Port => "port",
            Self::MixerLine => "mixer-line",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineState {
    #[default]
    Closed,
    Open,
    Started,
    Stopped,
}

/// Identity of a line, carried in every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineInfo {
    /// Process-unique id.
    pub id: u64,
    pub kind: LineKind,
    /// Name of the mixer that produced the line.
    pub mixer: String,
}

impl LineInfo {
    pub fn new(kind: LineKind, mixer: impl Into<String>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            mixer: mixer.into(),
        }
    }
}

/// Lifecycle contract shared by every device resource.
pub trait Line {
    fn info(&self) -> &LineInfo;

    fn state(&self) -> LineState;

    /// Bound format, if any. Clips bind theirs when opened.
    fn format(&self) -> Option<FormatDescriptor>;

    /// Buffer size in bytes, a whole number of frames.
    fn buffer_size(&self) -> usize;

    /// Frames rendered or captured since the line was opened; the playback cursor
    /// for clips.
    fn frame_position(&self) -> u64;

    fn events(&self) -> Arc<EventRelay>;

    /// Whether `open` accepts a format instead of using the one given at acquisition.
    fn supports_deferred_format(&self) -> bool {
        false
    }

    fn open(&mut self, format: Option<&FormatDescriptor>) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Block until queued data has been rendered.
    fn drain(&mut self) -> Result<()>;

    /// Release the line. Idempotent; a started line is stopped first.
    fn close(&mut self);

    fn is_open(&self) -> bool {
        self.state() != LineState::Closed
    }

    fn is_running(&self) -> bool {
        self.state() == LineState::Started
    }
}

/// A line that plays written bytes.
pub trait OutputLine: Line {
    /// Queue bytes for playback. Returns the number accepted; may block while the
    /// device buffer is full.
    fn write(&mut self, data: &[u8]) -> Result<usize>;
}

/// A line that delivers captured bytes.
pub trait InputLine: Line {
    /// Read captured bytes. Blocks until some are available; returns 0 once closed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// A fully buffered line with frame-accurate positioning and looping.
pub trait ClipLine: Line {
    /// Buffer the remaining contents of `stream`. The clip must be closed.
    fn load(&mut self, stream: &mut StreamHandle) -> Result<()>;

    /// Total frames held by the clip.
    fn frame_length(&self) -> u64;

    fn set_frame_position(&mut self, frame: u64) -> Result<()>;

    /// Set the inclusive loop region.
    fn set_loop_points(&mut self, start: u64, end: u64) -> Result<()>;

    fn loop_points(&self) -> (u64, u64);

    fn set_loop_count(&mut self, count: LoopCount);

    /// Remaining loop request.
    fn loop_count(&self) -> LoopCount;
}

/// A line produced by [`DeviceManager::open`], tagged by kind.
pub enum DeviceResource {
    Output(Box<dyn OutputLine>),
    Input(Box<dyn InputLine>),
    Clip(Box<dyn ClipLine>),
    Port(Box<dyn Line>),
    MixerLine(Box<dyn Line>),
}

impl DeviceResource {
    pub fn kind(&self) -> LineKind {
        self.info().kind
    }

    pub fn info(&self) -> &LineInfo {
        match self {
            Self::Output(line) => line.info(),
            Self::Input(line) => line.info(),
            Self::Clip(line) => line.info(),
            Self::Port(line) | Self::MixerLine(line) => line.info(),
        }
    }

    pub fn state(&self) -> LineState {
        match self {
            Self::Output(line) => line.state(),
            Self::Input(line) => line.state(),
            Self::Clip(line) => line.state(),
            Self::Port(line) | Self::MixerLine(line) => line.state(),
        }
    }

    pub fn into_output(self) -> Result<Box<dyn OutputLine>> {
        match self {
            Self::Output(line) => Ok(line),
            other => Err(other.mismatch(LineKind::Output)),
        }
    }

    pub fn into_input(self) -> Result<Box<dyn InputLine>> {
        match self {
            Self::Input(line) => Ok(line),
            other => Err(other.mismatch(LineKind::Input)),
        }
    }

    pub fn into_clip(self) -> Result<Box<dyn ClipLine>> {
        match self {
            Self::Clip(line) => Ok(line),
            other => Err(other.mismatch(LineKind::Clip)),
        }
    }

    /// Lifecycle-only view for port and mixer lines.
    pub fn into_line(self) -> Result<Box<dyn Line>> {
        match self {
            Self::Port(line) | Self::MixerLine(line) => Ok(line),
            other => Err(other.mismatch(LineKind::Port)),
        }
    }

    fn mismatch(&self, wanted: LineKind) -> Error {
        Error::LineUnavailable(format!("expected {wanted} line, got {}", self.kind()))
    }
}

/// State bookkeeping shared by line implementations.
pub struct LineCore {
    info: LineInfo,
    state: LineState,
    format: Option<FormatDescriptor>,
    buffer_size: usize,
    frames: u64,
    relay: Arc<EventRelay>,
}

impl LineCore {
    pub fn new(
        kind: LineKind,
        mixer: &str,
        format: Option<FormatDescriptor>,
        buffer_size: usize,
    ) -> Self {
        let mut core = Self {
            info: LineInfo::new(kind, mixer),
            state: LineState::Closed,
            format: None,
            buffer_size,
            frames: 0,
            relay: Arc::new(EventRelay::new()),
        };
        if let Some(format) = format {
            core.bind(format);
        }
        core
    }

    pub const fn info(&self) -> &LineInfo {
        &self.info
    }

    pub const fn state(&self) -> LineState {
        self.state
    }

    pub const fn format(&self) -> Option<FormatDescriptor> {
        self.format
    }

    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub const fn frames(&self) -> u64 {
        self.frames
    }

    pub fn events(&self) -> Arc<EventRelay> {
        self.relay.clone()
    }

    /// Bind a format and round the buffer down to whole frames.
    pub fn bind(&mut self, format: FormatDescriptor) {
        if let Some(frame) = format.frame_bytes() {
            self.buffer_size = align_to_frames(self.buffer_size, frame);
        }
        self.format = Some(format);
    }

    pub fn advance(&mut self, frames: u64) {
        self.frames += frames;
    }

    pub fn set_frames(&mut self, frames: u64) {
        self.frames = frames;
    }

    /// Closed -> Open. Returns false when the line was already open.
    pub fn mark_open(&mut self) -> bool {
        if self.state != LineState::Closed {
            return false;
        }
        self.frames = 0;
        self.transition(LineState::Open, LineEventKind::Opened);
        true
    }

    /// Open/Stopped -> Started.
    pub fn mark_started(&mut self) -> Result<()> {
        match self.state {
            LineState::Open | LineState::Stopped => {
                self.transition(LineState::Started, LineEventKind::Started);
                Ok(())
            }
            LineState::Started => Ok(()),
            LineState::Closed => Err(Error::LineState(format!(
                "cannot start closed {} line {}",
                self.info.kind, self.info.id
            ))),
        }
    }

    /// Started -> Stopped; a no-op otherwise.
    pub fn mark_stopped(&mut self) {
        if self.state == LineState::Started {
            self.transition(LineState::Stopped, LineEventKind::Stopped);
        }
    }

    /// Any -> Closed, stopping first. Returns false when already closed.
    pub fn mark_closed(&mut self) -> bool {
        if self.state == LineState::Closed {
            return false;
        }
        self.mark_stopped();
        self.transition(LineState::Closed, LineEventKind::Closed);
        true
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.state == LineState::Closed {
            return Err(Error::LineState(format!(
                "{} line {} is closed",
                self.info.kind, self.info.id
            )));
        }
        Ok(())
    }

    fn transition(&mut self, state: LineState, kind: LineEventKind) {
        debug!(
            "{} line {} ({}): {:?} -> {:?}",
            self.info.kind, self.info.id, self.info.mixer, self.state, state
        );
        self.state = state;
        self.relay.dispatch(&LineEvent {
            kind,
            line: self.info.clone(),
            frame_position: self.frames,
        });
    }
}

/// Round `bytes` down to whole frames, keeping at least one frame.
pub const fn align_to_frames(bytes: usize, frame: usize) -> usize {
    if frame == 0 {
        return bytes;
    }
    let aligned = bytes / frame * frame;
    if aligned == 0 {
        frame
    } else {
        aligned
    }
}
