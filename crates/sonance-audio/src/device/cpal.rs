//! Hardware lines on cpal devices.
//!
//! Every output or input device of the default host becomes one mixer. Streams are
//! built when a line opens and dropped when it closes; they stay on the thread that
//! opened the line.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use sonance_core::{Error, FormatDescriptor, LoopCount, Result};
use tracing::{debug, error, info, warn};

use super::manager::{Mixer, MixerInfo};
use super::{
    ClipLine, DeviceResource, InputLine, Line, LineCore, LineKind, LineState,
    OutputLine,
};
use crate::buffer::{shared_ring, SharedRing};
use crate::clip::LoopCursor;
use crate::pcm;
use crate::source::StreamHandle;

/// Poll interval while waiting on the device callback.
const POLL: Duration = Duration::from_millis(2);

/// Captured chunks buffered between the input callback and `read`.
const CAPTURE_QUEUE: usize = 64;

/// One cpal device.
pub struct CpalMixer {
    info: MixerInfo,
    output: bool,
    input: bool,
}

impl CpalMixer {
    /// Enumerate the devices of the default host.
    pub fn discover() -> Result<Vec<Self>> {
        let host = cpal::default_host();
        let mut mixers: Vec<Self> = Vec::new();

        let outputs = host
            .output_devices()
            .map_err(|e| Error::LineUnavailable(format!("Failed to list output devices: {e}")))?;
        for device in outputs {
            if let Ok(name) = device.name() {
                mixers.push(Self::new(name, true, false));
            }
        }

        let inputs = host
            .input_devices()
            .map_err(|e| Error::LineUnavailable(format!("Failed to list input devices: {e}")))?;
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            match mixers.iter_mut().find(|m| m.info.name == name) {
                Some(existing) => existing.input = true,
                None => mixers.push(Self::new(name, false, true)),
            }
        }

        // The host's default output goes first so it wins default selection.
        if let Some(default) = host.default_output_device().and_then(|d| d.name().ok()) {
            if let Some(pos) = mixers.iter().position(|m| m.info.name == default) {
                mixers.swap(0, pos);
            }
        }

        info!("Found {} audio devices", mixers.len());
        Ok(mixers)
    }

    fn new(name: String, output: bool, input: bool) -> Self {
        let description = match (output, input) {
            (true, true) => "Audio device (output, input)",
            (true, false) => "Audio device (output)",
            _ => "Audio device (input)",
        };
        Self {
            info: MixerInfo::new(name, description),
            output,
            input,
        }
    }
}

impl Mixer for CpalMixer {
    fn info(&self) -> &MixerInfo {
        &self.info
    }

    fn supports(&self, kind: LineKind) -> bool {
        match kind {
            LineKind::Output | LineKind::Clip => self.output,
            LineKind::Input => self.input,
            LineKind::Port | LineKind::MixerLine => false,
        }
    }

    fn line(
        &self,
        kind: LineKind,
        format: Option<FormatDescriptor>,
        buffer_size: usize,
    ) -> Result<DeviceResource> {
        if !self.supports(kind) {
            return Err(Error::LineUnavailable(format!(
                "{} has no {kind} line",
                self.info.name
            )));
        }
        let name = self.info.name.clone();
        let stream_format = format.unwrap_or_else(FormatDescriptor::canonical);
        if kind != LineKind::Clip && !pcm::can_decode(&stream_format) {
            return Err(Error::LineUnavailable(format!(
                "{name} cannot play {stream_format}"
            )));
        }

        Ok(match kind {
            LineKind::Output => DeviceResource::Output(Box::new(CpalOutputLine {
                core: LineCore::new(kind, &name, Some(stream_format), buffer_size),
                device: name,
                stream: None,
                ring: shared_ring(0),
                running: Arc::new(AtomicBool::new(false)),
                consumed: Arc::new(AtomicU64::new(0)),
                pending: Vec::new(),
                scratch: Vec::new(),
            })),
            LineKind::Input => DeviceResource::Input(Box::new(CpalInputLine {
                core: LineCore::new(kind, &name, Some(stream_format), buffer_size),
                device: name,
                stream: None,
                receiver: None,
                pending: Vec::new(),
            })),
            _ => DeviceResource::Clip(Box::new(CpalClip {
                core: LineCore::new(kind, &name, format, buffer_size),
                device: name,
                stream: None,
                samples: Arc::new(Vec::new()),
                cursor: Arc::new(Mutex::new(LoopCursor::new(0))),
                finished: Arc::new(AtomicBool::new(false)),
                running: Arc::new(AtomicBool::new(false)),
            })),
        })
    }
}

fn find_device(name: &str, output: bool) -> Result<Device> {
    let host = cpal::default_host();
    let devices: Vec<Device> = if output {
        host.output_devices().map(Iterator::collect)
    } else {
        host.input_devices().map(Iterator::collect)
    }
    .map_err(|e| Error::LineUnavailable(format!("Failed to list devices: {e}")))?;

    devices
        .into_iter()
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| Error::LineUnavailable(format!("Audio device {name:?} disappeared")))
}

/// Pick a device configuration with the channel count and rate of `format`.
fn stream_config(
    device: &Device,
    format: &FormatDescriptor,
    output: bool,
) -> Result<(StreamConfig, SampleFormat)> {
    let channels = u16::try_from(format.channels())
        .map_err(|_| Error::UnsupportedFormat(format.to_string()))?;
    let rate = SampleRate(format.sample_rate() as u32);

    let ranges: Vec<_> = if output {
        device
            .supported_output_configs()
            .map_err(|e| Error::LineUnavailable(format!("Failed to get output configs: {e}")))?
            .collect()
    } else {
        device
            .supported_input_configs()
            .map_err(|e| Error::LineUnavailable(format!("Failed to get input configs: {e}")))?
            .collect()
    };

    let mut candidates: Vec<_> = ranges
        .into_iter()
        .filter(|r| {
            r.channels() == channels && r.min_sample_rate() <= rate && rate <= r.max_sample_rate()
        })
        .collect();
    // Prefer float so no precision is lost before the device.
    candidates.sort_by_key(|r| r.sample_format() != SampleFormat::F32);

    let range = candidates.into_iter().next().ok_or_else(|| {
        Error::LineUnavailable(format!("No device configuration for {format}"))
    })?;
    let supported = range.with_sample_rate(rate);
    let sample_format = supported.sample_format();
    debug!("Selected device config: {:?}", supported);
    Ok((supported.config(), sample_format))
}

fn log_stream_error(err: cpal::StreamError) {
    error!("Audio stream error: {err}");
}

/// Fills the device buffer from a sample source, silence when nothing is available.
fn build_output<T, F>(device: &Device, config: &StreamConfig, mut fill: F) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
    F: FnMut(&mut [f32]) + Send + 'static,
{
    let mut scratch = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.clear();
                scratch.resize(data.len(), 0.0f32);
                fill(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample(sample);
                }
            },
            log_stream_error,
            None,
        )
        .map_err(|e| Error::LineUnavailable(format!("Failed to build stream: {e}")))
}

fn output_stream<F>(device: &Device, format: &FormatDescriptor, fill: F) -> Result<Stream>
where
    F: FnMut(&mut [f32]) + Send + 'static,
{
    let (config, sample_format) = stream_config(device, format, true)?;
    match sample_format {
        SampleFormat::F32 => build_output::<f32, _>(device, &config, fill),
        SampleFormat::I16 => build_output::<i16, _>(device, &config, fill),
        SampleFormat::U16 => build_output::<u16, _>(device, &config, fill),
        other => Err(Error::LineUnavailable(format!(
            "Unsupported sample format: {other:?}"
        ))),
    }
}

struct CpalOutputLine {
    core: LineCore,
    device: String,
    stream: Option<Stream>,
    ring: SharedRing,
    running: Arc<AtomicBool>,
    /// Samples taken by the device callback since open.
    consumed: Arc<AtomicU64>,
    /// Bytes of an incomplete trailing frame.
    pending: Vec<u8>,
    scratch: Vec<f32>,
}

impl CpalOutputLine {
    fn channels(&self) -> u64 {
        self.core.format().map_or(1, |f| f.channels().max(1) as u64)
    }
}

impl Line for CpalOutputLine {
    core_accessors!();

    fn frame_position(&self) -> u64 {
        self.consumed.load(Ordering::Acquire) / self.channels()
    }

    fn open(&mut self, _format: Option<&FormatDescriptor>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let format = self.core.format().unwrap_or_else(FormatDescriptor::canonical);
        let device = find_device(&self.device, true)?;

        let frame = format.frame_bytes().unwrap_or(1);
        let samples = self.core.buffer_size() / frame * format.channels().max(1) as usize;
        self.ring = shared_ring(samples);
        self.consumed.store(0, Ordering::Release);
        self.pending.clear();

        let ring = self.ring.clone();
        let running = self.running.clone();
        let consumed = self.consumed.clone();
        let stream = output_stream(&device, &format, move |out| {
            if !running.load(Ordering::Acquire) {
                return;
            }
            let n = ring.pop_slice(out);
            consumed.fetch_add(n as u64, Ordering::AcqRel);
        })?;

        self.stream = Some(stream);
        self.core.mark_open();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.core.mark_started()?;
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| Error::LineUnavailable(format!("Failed to start stream: {e}")))?;
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause stream: {e}");
            }
        }
        self.core.mark_stopped();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        while self.running.load(Ordering::Acquire) && !self.ring.is_empty() {
            thread::sleep(POLL);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        self.stream = None;
        self.ring.clear();
        self.core.mark_closed();
    }
}

impl OutputLine for CpalOutputLine {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.core.ensure_open()?;
        let format = self.core.format().unwrap_or_else(FormatDescriptor::canonical);

        self.pending.extend_from_slice(data);
        self.scratch.clear();
        let used = pcm::decode(&self.pending, &format, &mut self.scratch)?;
        self.pending.drain(..used);

        let mut offset = 0;
        while offset < self.scratch.len() {
            let pushed = self.ring.push_slice(&self.scratch[offset..]);
            offset += pushed;
            if pushed == 0 {
                if !self.running.load(Ordering::Acquire) {
                    return Err(Error::LineState(
                        "output buffer is full and the line is not started".into(),
                    ));
                }
                thread::sleep(POLL);
            }
        }
        Ok(data.len())
    }
}

struct CpalInputLine {
    core: LineCore,
    device: String,
    stream: Option<Stream>,
    receiver: Option<Receiver<Vec<u8>>>,
    pending: Vec<u8>,
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    format: FormatDescriptor,
    sender: Sender<Vec<u8>>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();
                let mut bytes = Vec::with_capacity(samples.len() * 4);
                if let Err(e) = pcm::encode(&samples, &format, &mut bytes) {
                    error!("Capture encode failed: {e}");
                    return;
                }
                if let Err(TrySendError::Full(_)) = sender.try_send(bytes) {
                    warn!("Capture queue full, dropping {} samples", samples.len());
                }
            },
            log_stream_error,
            None,
        )
        .map_err(|e| Error::LineUnavailable(format!("Failed to build input stream: {e}")))
}

impl Line for CpalInputLine {
    core_accessors!();

    fn frame_position(&self) -> u64 {
        self.core.frames()
    }

    fn open(&mut self, _format: Option<&FormatDescriptor>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let format = self.core.format().unwrap_or_else(FormatDescriptor::canonical);
        if !pcm::can_encode(&format) {
            return Err(Error::UnsupportedFormat(format!("cannot capture as {format}")));
        }
        let device = find_device(&self.device, false)?;
        let (config, sample_format) = stream_config(&device, &format, false)?;
        let (sender, receiver) = bounded(CAPTURE_QUEUE);

        let stream = match sample_format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, format, sender)?,
            SampleFormat::I16 => build_input::<i16>(&device, &config, format, sender)?,
            SampleFormat::U16 => build_input::<u16>(&device, &config, format, sender)?,
            other => {
                return Err(Error::LineUnavailable(format!(
                    "Unsupported sample format: {other:?}"
                )));
            }
        };

        self.stream = Some(stream);
        self.receiver = Some(receiver);
        self.pending.clear();
        self.core.mark_open();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.core.mark_started()?;
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| Error::LineUnavailable(format!("Failed to start capture: {e}")))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause capture: {e}");
            }
        }
        self.core.mark_stopped();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        self.receiver = None;
        self.pending.clear();
        self.core.mark_closed();
    }
}

impl InputLine for CpalInputLine {
    /// Returns 0 once the line is no longer capturing.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame = self.core.format().and_then(|f| f.frame_bytes()).unwrap_or(1);
        let want = buf.len() / frame * frame;

        while self.pending.len() < frame.max(1) {
            let Some(receiver) = &self.receiver else {
                return Ok(0);
            };
            match receiver.recv_timeout(Duration::from_millis(50)) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) if self.core.state() == LineState::Started => {}
                Err(_) => return Ok(0),
            }
        }

        let n = want.min(self.pending.len() / frame * frame);
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        self.core.advance((n / frame) as u64);
        Ok(n)
    }
}

struct CpalClip {
    core: LineCore,
    device: String,
    stream: Option<Stream>,
    /// Whole clip as interleaved samples.
    samples: Arc<Vec<f32>>,
    cursor: Arc<Mutex<LoopCursor>>,
    finished: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl Line for CpalClip {
    core_accessors!();

    fn frame_position(&self) -> u64 {
        self.cursor.lock().position()
    }

    fn supports_deferred_format(&self) -> bool {
        true
    }

    fn open(&mut self, format: Option<&FormatDescriptor>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let bound = match (self.core.format(), format) {
            (Some(bound), Some(requested)) if !requested.matches(&bound) => {
                return Err(Error::UnsupportedFormat(format!(
                    "clip holds {bound}, cannot open as {requested}"
                )));
            }
            (Some(bound), _) => bound,
            (None, Some(requested)) => {
                self.core.bind(*requested);
                *requested
            }
            (None, None) => {
                return Err(Error::LineState(
                    "clip has no format; load data or pass one to open".into(),
                ));
            }
        };

        let device = find_device(&self.device, true)?;
        let channels = bound.channels().max(1) as usize;
        let samples = self.samples.clone();
        let cursor = self.cursor.clone();
        let finished = self.finished.clone();
        let running = self.running.clone();
        finished.store(false, Ordering::Release);

        let stream = output_stream(&device, &bound, move |out| {
            if !running.load(Ordering::Acquire) {
                return;
            }
            let mut cursor = cursor.lock();
            for frame_out in out.chunks_exact_mut(channels) {
                match cursor.next_frame() {
                    Some(frame) => {
                        let start = frame as usize * channels;
                        frame_out.copy_from_slice(&samples[start..start + channels]);
                    }
                    None => {
                        finished.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        })?;

        self.stream = Some(stream);
        self.core.mark_open();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.core.mark_started()?;
        self.finished.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| Error::LineUnavailable(format!("Failed to start clip: {e}")))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause clip: {e}");
            }
        }
        self.core.mark_stopped();
        Ok(())
    }

    /// Blocks until a finite loop has played out; returns at once for continuous loops.
    fn drain(&mut self) -> Result<()> {
        if self.cursor.lock().loop_count().is_continuous() {
            return Ok(());
        }
        while self.running.load(Ordering::Acquire) && !self.finished.load(Ordering::Acquire) {
            thread::sleep(POLL);
        }
        if self.finished.load(Ordering::Acquire) {
            self.stop()?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        self.stream = None;
        self.core.mark_closed();
    }
}

impl ClipLine for CpalClip {
    fn load(&mut self, stream: &mut StreamHandle) -> Result<()> {
        if self.is_open() {
            return Err(Error::LineState("cannot load an open clip".into()));
        }
        let format = *stream.format();
        let channels = format.channels().max(1) as u64;

        let mut bytes = Vec::new();
        let mut chunk = vec![0u8; self.core.buffer_size().max(1)];
        while let Some(n) = stream.read(&mut chunk)? {
            bytes.extend_from_slice(&chunk[..n]);
        }
        let mut samples = Vec::new();
        pcm::decode(&bytes, &format, &mut samples)?;

        let frames = samples.len() as u64 / channels;
        self.core.bind(format);
        self.samples = Arc::new(samples);
        *self.cursor.lock() = LoopCursor::new(frames);
        debug!("Clip {} loaded {frames} frames", self.core.info().id);
        Ok(())
    }

    fn frame_length(&self) -> u64 {
        self.cursor.lock().total_frames()
    }

    fn set_frame_position(&mut self, frame: u64) -> Result<()> {
        let mut cursor = self.cursor.lock();
        cursor.set_position(frame)?;
        self.core.set_frames(cursor.position());
        Ok(())
    }

    fn set_loop_points(&mut self, start: u64, end: u64) -> Result<()> {
        self.cursor.lock().set_loop_points(start, end)
    }

    fn loop_points(&self) -> (u64, u64) {
        self.cursor.lock().loop_points()
    }

    fn set_loop_count(&mut self, count: LoopCount) {
        self.cursor.lock().set_loop_count(count);
    }

    fn loop_count(&self) -> LoopCount {
        self.cursor.lock().loop_count()
    }
}
