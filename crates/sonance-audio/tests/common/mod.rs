#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sonance_audio::device::{Recording, VirtualMixer, VirtualStats};
use sonance_audio::{DeviceManager, LineEvent, LineListener};
use sonance_core::EngineConfig;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sonance_audio=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A manager with one recording virtual mixer.
pub fn recording_manager(delay: Option<Duration>) -> (DeviceManager, Recording, Arc<VirtualStats>) {
    let recording = Recording::new();
    let mut mixer = VirtualMixer::new().with_recording(recording.clone());
    if let Some(delay) = delay {
        mixer = mixer.with_write_delay(delay);
    }
    let stats = mixer.stats();
    let mut manager = DeviceManager::new(EngineConfig::default());
    manager.register(Arc::new(mixer));
    (manager, recording, stats)
}

/// A listener that keeps every event it sees.
pub fn collecting_listener() -> (LineListener, Arc<Mutex<Vec<LineEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener: LineListener = Arc::new(move |event: &LineEvent| sink.lock().push(event.clone()));
    (listener, events)
}

/// A minimal 16-bit PCM RIFF/WAVE file.
pub fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
