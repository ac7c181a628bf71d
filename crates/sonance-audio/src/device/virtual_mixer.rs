//! In-process mixer with no hardware behind it.
//!
//! Output lines accept bytes at whatever pace they are written (optionally
//! throttled), input lines replay a fixed capture buffer, and clips render
//! instantly on drain. Useful for headless hosts and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use sonance_core::{Error, FormatDescriptor, LoopCount, Result};
use tracing::{debug, trace};

use super::manager::{Mixer, MixerInfo};
use super::{
    ClipLine, DeviceResource, InputLine, Line, LineCore, LineKind, LineState,
    OutputLine,
};
use crate::clip::LoopCursor;
use crate::source::StreamHandle;

pub const VIRTUAL_MIXER_NAME: &str = "virtual";

/// Counters shared by every line of one virtual mixer.
#[derive(Debug, Default)]
pub struct VirtualStats {
    opened: AtomicU64,
    closed: AtomicU64,
    bytes_written: AtomicU64,
}

impl VirtualStats {
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Acquire)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Acquire)
    }

    /// Lines currently open.
    pub fn open_lines(&self) -> u64 {
        self.opened().saturating_sub(self.closed())
    }

    /// Bytes accepted by output lines, plus bytes rendered by clips.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    fn on_open(&self) {
        self.opened.fetch_add(1, Ordering::AcqRel);
    }

    fn on_close(&self) {
        self.closed.fetch_add(1, Ordering::AcqRel);
    }

    fn on_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::AcqRel);
    }
}

/// Shared sink capturing every byte rendered by a virtual mixer.
#[derive(Debug, Clone, Default)]
pub struct Recording(Arc<Mutex<Vec<u8>>>);

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything recorded so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    fn append(&self, data: &[u8]) {
        self.0.lock().extend_from_slice(data);
    }
}

/// Software mixer providing every line kind.
pub struct VirtualMixer {
    info: MixerInfo,
    stats: Arc<VirtualStats>,
    recording: Option<Recording>,
    write_delay: Option<Duration>,
    capture: Option<Bytes>,
}

impl VirtualMixer {
    pub fn new() -> Self {
        Self::named(VIRTUAL_MIXER_NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            info: MixerInfo::new(name, "Software mixer"),
            stats: Arc::new(VirtualStats::default()),
            recording: None,
            write_delay: None,
            capture: None,
        }
    }

    /// Record everything rendered by this mixer's output lines and clips.
    #[must_use]
    pub fn with_recording(mut self, recording: Recording) -> Self {
        self.recording = Some(recording);
        self
    }

    /// Sleep this long on every output write.
    #[must_use]
    pub const fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Bytes replayed (cyclically) by input lines; silence otherwise.
    #[must_use]
    pub fn with_capture(mut self, capture: Bytes) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn stats(&self) -> Arc<VirtualStats> {
        self.stats.clone()
    }
}

impl Default for VirtualMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer for VirtualMixer {
    fn info(&self) -> &MixerInfo {
        &self.info
    }

    fn supports(&self, _kind: LineKind) -> bool {
        true
    }

    fn line(
        &self,
        kind: LineKind,
        format: Option<FormatDescriptor>,
        buffer_size: usize,
    ) -> Result<DeviceResource> {
        let name = &self.info.name;
        let stream_format = format.unwrap_or_else(FormatDescriptor::canonical);
        if matches!(kind, LineKind::Output | LineKind::Input) && !stream_format.is_frame_consistent()
        {
            return Err(Error::LineUnavailable(format!(
                "virtual {kind} line cannot use {stream_format}"
            )));
        }

        let resource = match kind {
            LineKind::Output => DeviceResource::Output(Box::new(VirtualOutputLine {
                core: LineCore::new(kind, name, Some(stream_format), buffer_size),
                stats: self.stats.clone(),
                recording: self.recording.clone(),
                delay: self.write_delay,
                partial: 0,
            })),
            LineKind::Input => DeviceResource::Input(Box::new(VirtualInputLine {
                core: LineCore::new(kind, name, Some(stream_format), buffer_size),
                stats: self.stats.clone(),
                capture: self.capture.clone().filter(|c| !c.is_empty()),
                cursor: 0,
            })),
            LineKind::Clip => DeviceResource::Clip(Box::new(VirtualClip {
                core: LineCore::new(kind, name, format, buffer_size),
                stats: self.stats.clone(),
                recording: self.recording.clone(),
                data: Vec::new(),
                cursor: LoopCursor::new(0),
            })),
            LineKind::Port => DeviceResource::Port(Box::new(VirtualPort {
                core: LineCore::new(kind, name, format, buffer_size),
                stats: self.stats.clone(),
            })),
            LineKind::MixerLine => DeviceResource::MixerLine(Box::new(VirtualPort {
                core: LineCore::new(kind, name, format, buffer_size),
                stats: self.stats.clone(),
            })),
        };
        Ok(resource)
    }
}

struct VirtualOutputLine {
    core: LineCore,
    stats: Arc<VirtualStats>,
    recording: Option<Recording>,
    delay: Option<Duration>,
    /// Bytes of an incomplete trailing frame.
    partial: usize,
}

impl Line for VirtualOutputLine {
    core_accessors!();

    fn frame_position(&self) -> u64 {
        self.core.frames()
    }

    fn open(&mut self, _format: Option<&FormatDescriptor>) -> Result<()> {
        if self.core.mark_open() {
            self.partial = 0;
            self.stats.on_open();
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.core.mark_started()
    }

    fn stop(&mut self) -> Result<()> {
        self.core.mark_stopped();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        if self.core.mark_closed() {
            self.stats.on_close();
        }
    }
}

impl OutputLine for VirtualOutputLine {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.core.ensure_open()?;
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if let Some(recording) = &self.recording {
            recording.append(data);
        }
        self.stats.on_write(data.len());

        let frame = self.core.format().and_then(|f| f.frame_bytes()).unwrap_or(1);
        let total = self.partial + data.len();
        self.core.advance((total / frame) as u64);
        self.partial = total % frame;
        trace!("Virtual line {} accepted {} bytes", self.core.info().id, data.len());
        Ok(data.len())
    }
}

struct VirtualInputLine {
    core: LineCore,
    stats: Arc<VirtualStats>,
    capture: Option<Bytes>,
    cursor: usize,
}

impl Line for VirtualInputLine {
    core_accessors!();

    fn frame_position(&self) -> u64 {
        self.core.frames()
    }

    fn open(&mut self, _format: Option<&FormatDescriptor>) -> Result<()> {
        if self.core.mark_open() {
            self.cursor = 0;
            self.stats.on_open();
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.core.mark_started()
    }

    fn stop(&mut self) -> Result<()> {
        self.core.mark_stopped();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        if self.core.mark_closed() {
            self.stats.on_close();
        }
    }
}

impl InputLine for VirtualInputLine {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.core.state() == LineState::Closed {
            return Ok(0);
        }
        let frame = self.core.format().and_then(|f| f.frame_bytes()).unwrap_or(1);
        let len = buf.len() / frame * frame;

        match &self.capture {
            Some(capture) => {
                for byte in &mut buf[..len] {
                    *byte = capture[self.cursor];
                    self.cursor = (self.cursor + 1) % capture.len();
                }
            }
            None => buf[..len].fill(0),
        }
        self.core.advance((len / frame) as u64);
        Ok(len)
    }
}

struct VirtualClip {
    core: LineCore,
    stats: Arc<VirtualStats>,
    recording: Option<Recording>,
    data: Vec<u8>,
    cursor: LoopCursor,
}

impl VirtualClip {
    fn frame_bytes(&self) -> usize {
        self.core.format().and_then(|f| f.frame_bytes()).unwrap_or(1)
    }

    fn sync_position(&mut self) {
        self.core.set_frames(self.cursor.position());
    }
}

impl Line for VirtualClip {
    core_accessors!();

    fn frame_position(&self) -> u64 {
        self.cursor.position()
    }

    fn supports_deferred_format(&self) -> bool {
        true
    }

    fn open(&mut self, format: Option<&FormatDescriptor>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        match (self.core.format(), format) {
            (Some(bound), Some(requested)) if !requested.matches(&bound) => {
                return Err(Error::UnsupportedFormat(format!(
                    "clip holds {bound}, cannot open as {requested}"
                )));
            }
            (None, Some(requested)) => self.core.bind(*requested),
            (None, None) => {
                return Err(Error::LineState(
                    "clip has no format; load data or pass one to open".into(),
                ));
            }
            _ => {}
        }
        self.core.mark_open();
        self.stats.on_open();
        self.sync_position();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.core.mark_started()
    }

    fn stop(&mut self) -> Result<()> {
        self.core.mark_stopped();
        Ok(())
    }

    /// Render the rest of a finite loop. A continuous loop never finishes, so
    /// draining one returns immediately.
    fn drain(&mut self) -> Result<()> {
        if self.core.state() != LineState::Started || self.cursor.loop_count().is_continuous() {
            return Ok(());
        }
        let frame = self.frame_bytes();
        let mut rendered = 0u64;
        while let Some(index) = self.cursor.next_frame() {
            let offset = index as usize * frame;
            if let Some(recording) = &self.recording {
                recording.append(&self.data[offset..offset + frame]);
            }
            self.stats.on_write(frame);
            rendered += 1;
        }
        debug!(
            "Virtual clip {} rendered {rendered} frames",
            self.core.info().id
        );
        self.sync_position();
        self.core.mark_stopped();
        Ok(())
    }

    fn close(&mut self) {
        if self.core.mark_closed() {
            self.stats.on_close();
        }
    }
}

impl ClipLine for VirtualClip {
    fn load(&mut self, stream: &mut StreamHandle) -> Result<()> {
        if self.is_open() {
            return Err(Error::LineState("cannot load an open clip".into()));
        }
        let format = *stream.format();
        let frame = format.frame_bytes().ok_or_else(|| {
            Error::UnsupportedFormat(format!("clip needs a known frame size: {format}"))
        })?;

        let mut data = Vec::new();
        let mut chunk = vec![0u8; self.core.buffer_size().max(frame)];
        while let Some(n) = stream.read(&mut chunk)? {
            data.extend_from_slice(&chunk[..n]);
        }
        data.truncate(data.len() / frame * frame);

        self.core.bind(format);
        self.cursor = LoopCursor::new((data.len() / frame) as u64);
        debug!(
            "Virtual clip {} loaded {} frames",
            self.core.info().id,
            self.cursor.total_frames()
        );
        self.data = data;
        Ok(())
    }

    fn frame_length(&self) -> u64 {
        self.cursor.total_frames()
    }

    fn set_frame_position(&mut self, frame: u64) -> Result<()> {
        self.cursor.set_position(frame)?;
        self.sync_position();
        Ok(())
    }

    fn set_loop_points(&mut self, start: u64, end: u64) -> Result<()> {
        self.cursor.set_loop_points(start, end)
    }

    fn loop_points(&self) -> (u64, u64) {
        self.cursor.loop_points()
    }

    fn set_loop_count(&mut self, count: LoopCount) {
        self.cursor.set_loop_count(count);
    }

    fn loop_count(&self) -> LoopCount {
        self.cursor.loop_count()
    }
}

/// Port or mixer line: lifecycle only.
struct VirtualPort {
    core: LineCore,
    stats: Arc<VirtualStats>,
}

impl Line for VirtualPort {
    core_accessors!();

    fn frame_position(&self) -> u64 {
        0
    }

    fn open(&mut self, _format: Option<&FormatDescriptor>) -> Result<()> {
        if self.core.mark_open() {
            self.stats.on_open();
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.core.mark_started()
    }

    fn stop(&mut self) -> Result<()> {
        self.core.mark_stopped();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        if self.core.mark_closed() {
            self.stats.on_close();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::source::{to_stream, Source, SourceOptions};

    fn mixer_line(mixer: &VirtualMixer, kind: LineKind) -> DeviceResource {
        mixer
            .line(kind, Some(FormatDescriptor::canonical()), 4096)
            .unwrap()
    }

    #[test]
    fn test_output_counts_frames_across_partial_writes() {
        let recording = Recording::new();
        let mixer = VirtualMixer::new().with_recording(recording.clone());
        let mut line = mixer_line(&mixer, LineKind::Output).into_output().unwrap();

        assert!(line.write(&[0; 4]).is_err());
        line.open(None).unwrap();
        line.write(&[1, 2, 3]).unwrap();
        line.write(&[4, 5]).unwrap();
        assert_eq!(line.frame_position(), 1);
        assert_eq!(recording.bytes(), vec![1, 2, 3, 4, 5]);

        line.close();
        line.close();
        let stats = mixer.stats();
        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.closed(), 1);
        assert_eq!(stats.open_lines(), 0);
    }

    #[test]
    fn test_input_replays_capture() {
        let mixer = VirtualMixer::new().with_capture(Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]));
        let mut line = mixer_line(&mixer, LineKind::Input).into_input().unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(line.read(&mut buf).unwrap(), 0);

        line.open(None).unwrap();
        assert_eq!(line.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        line.read(&mut buf).unwrap();
        line.read(&mut buf).unwrap();
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_clip_renders_loop_on_drain() {
        let recording = Recording::new();
        let mixer = VirtualMixer::new().with_recording(recording.clone());
        let mut clip = mixer
            .line(LineKind::Clip, None, 4096)
            .unwrap()
            .into_clip()
            .unwrap();

        let format = FormatDescriptor::pcm(8000.0, 8, 1, true, false);
        let options = SourceOptions::default().with_format(format);
        let mut stream = to_stream(Source::bytes(vec![0u8, 1, 2, 3, 4]), &options).unwrap();
        clip.load(&mut stream).unwrap();
        assert_eq!(clip.frame_length(), 5);

        clip.open(Some(&format)).unwrap();
        clip.set_loop_points(1, 2).unwrap();
        clip.set_loop_count(LoopCount::Times(1));
        clip.start().unwrap();
        clip.drain().unwrap();

        assert_eq!(recording.bytes(), vec![0, 1, 2, 1, 2, 3, 4]);
        assert_eq!(clip.state(), LineState::Stopped);
    }

    #[test]
    fn test_clip_rejects_bad_loop_points() {
        let mixer = VirtualMixer::new();
        let mut clip = mixer
            .line(LineKind::Clip, None, 4096)
            .unwrap()
            .into_clip()
            .unwrap();
        let mut stream = to_stream(Source::bytes(vec![0u8; 40]), &SourceOptions::default()).unwrap();
        clip.load(&mut stream).unwrap();
        assert_eq!(clip.frame_length(), 10);
        assert!(clip.set_loop_points(5, 3).is_err());
        assert!(clip.set_loop_points(0, 10).is_err());
        assert!(clip.open(None).is_ok());
    }
}
