//! # sonance-audio
//!
//! Pull-based PCM streaming and playback for Sonance.
//!
//! Features:
//! - One stream abstraction over files, URLs, memory, capture lines, and generators
//! - Format negotiation with lazy PCM conversion and resampling
//! - Per-session cancellable playback pump
//! - Frame-indexed clip looping
//! - cpal devices plus an in-process virtual mixer

pub mod buffer;
pub mod clip;
pub mod convert;
pub mod decode;
pub mod device;
pub mod negotiate;
pub mod pcm;
pub mod pump;
pub mod resample;
pub mod skip;
pub mod source;

pub use clip::{loop_continuous, open_clip, play_clip, play_region, LoopCursor};
pub use device::{
    scoped_open, ClipLine, DeviceManager, DeviceResource, InputLine, Line, LineEvent,
    LineEventKind, LineGuard, LineKind, LineListener, LineState, MixerSelection, OutputLine,
};
pub use negotiate::{conversion_supported, convert, derive_canonical, negotiate, Negotiator};
pub use pump::{stop_all, PlaybackSession, PumpState, StopHandle};
pub use skip::{skip, Skipper};
pub use source::{to_stream, PcmSource, Source, SourceOptions, StreamHandle};
