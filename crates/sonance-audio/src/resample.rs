//! Sample-rate conversion using rubato.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use rubato::{FftFixedIn, Resampler as RubatoResampler};
use sonance_core::{Error, Result};
use tracing::debug;

/// Frames handed to rubato per call.
const CHUNK_FRAMES: usize = 1024;

/// Streaming resampler over interleaved `f32` samples.
///
/// Input is accumulated per channel until a full chunk is available; `finish`
/// pads and flushes the tail.
pub struct Resampler {
    inner: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk.
    pending: Vec<Vec<f32>>,
    /// Input frames accepted so far.
    frames_in: u64,
    /// Output frames emitted so far.
    frames_out: u64,
}

impl Resampler {
    /// Create a resampler between two rates.
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot resample {input_rate}Hz -> {output_rate}Hz with {channels} channels"
            )));
        }

        let inner = FftFixedIn::new(
            input_rate as usize,
            output_rate as usize,
            CHUNK_FRAMES,
            2,
            channels,
        )
        .map_err(|e| Error::Internal(format!("Failed to create resampler: {e}")))?;

        debug!(
            "Resampler created: {}Hz -> {}Hz, {} channels",
            input_rate, output_rate, channels
        );

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Feed interleaved samples; returns whatever full chunks produced.
    pub fn push(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        for frame in input.chunks_exact(self.channels) {
            for (plane, &sample) in self.pending.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }
        self.frames_in += (input.len() / self.channels) as u64;

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|plane| plane.drain(..CHUNK_FRAMES).collect())
                .collect();
            let resampled = self.process(&chunk)?;
            self.emit(&resampled, usize::MAX, &mut output);
        }
        Ok(output)
    }

    /// Flush buffered input, trimming the zero padding from the result.
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let mut output = Vec::new();
        if !self.pending[0].is_empty() {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|plane| {
                    let mut data = std::mem::take(plane);
                    data.resize(CHUNK_FRAMES, 0.0);
                    data
                })
                .collect();
            let resampled = self.process(&chunk)?;

            let expected = self.expected_output_frames();
            let remaining = expected.saturating_sub(self.frames_out) as usize;
            self.emit(&resampled, remaining, &mut output);
        }
        Ok(output)
    }

    /// Reset to an empty state, keeping the configuration.
    pub fn reset(&mut self) {
        self.inner.reset();
        self.pending.iter_mut().for_each(Vec::clear);
        self.frames_in = 0;
        self.frames_out = 0;
    }

    fn process(&mut self, chunk: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        self.inner
            .process(chunk, None)
            .map_err(|e| Error::Internal(format!("Resample failed: {e}")))
    }

    fn expected_output_frames(&self) -> u64 {
        (self.frames_in as f64 * f64::from(self.output_rate) / f64::from(self.input_rate)).round()
            as u64
    }

    fn emit(&mut self, planes: &[Vec<f32>], limit: usize, output: &mut Vec<f32>) {
        let frames = planes.first().map_or(0, Vec::len).min(limit);
        output.reserve(frames * self.channels);
        for frame in 0..frames {
            for plane in planes {
                output.push(plane[frame]);
            }
        }
        self.frames_out += frames as u64;
    }
}
