#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sonance_audio::{
    to_stream, LineEvent, LineEventKind, LineListener, PlaybackSession, PumpState, Source,
    SourceOptions,
};
use sonance_core::Error;

#[test]
fn test_generator_plays_every_byte() {
    common::init_tracing();
    let (manager, recording, stats) = common::recording_manager(None);
    let stream = to_stream(Source::generator(100_000, |i| i as i64), &SourceOptions::default()).unwrap();

    let session = PlaybackSession::new();
    let written = session.play(&manager, stream, Some(65_536), None).unwrap();

    assert_eq!(written, 100_000);
    assert_eq!(recording.len(), 100_000);
    let bytes = recording.bytes();
    assert_eq!(bytes[0], 0);
    assert_eq!(bytes[255], 255);
    assert_eq!(bytes[256], 0);
    assert_eq!(stats.open_lines(), 0);
    assert_eq!(session.last_outcome(), Some(PumpState::Completed));
}

#[test]
fn test_stop_during_line_setup_cancels() {
    common::init_tracing();
    let (manager, recording, stats) = common::recording_manager(None);
    let stream = to_stream(Source::generator(100_000, |i| i as i64), &SourceOptions::default()).unwrap();

    let session = PlaybackSession::new();
    let handle = session.stop_handle();
    let listener: LineListener = Arc::new(move |event: &LineEvent| {
        if event.kind == LineEventKind::Started {
            handle.stop();
        }
    });
    let written = session.play(&manager, stream, Some(4096), Some(listener)).unwrap();

    assert!(written < 100_000);
    assert_eq!(recording.len() as u64, written);
    assert_eq!(session.last_outcome(), Some(PumpState::Cancelled));
    assert_eq!(stats.open_lines(), 0);
}

#[test]
fn test_empty_stream_still_cycles_line() {
    common::init_tracing();
    let (manager, recording, stats) = common::recording_manager(None);
    let (listener, events) = common::collecting_listener();
    let stream = to_stream(Source::bytes(Vec::new()), &SourceOptions::default()).unwrap();

    let written = PlaybackSession::new()
        .play(&manager, stream, None, Some(listener))
        .unwrap();

    assert_eq!(written, 0);
    assert!(recording.is_empty());
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);
    let kinds: Vec<LineEventKind> = events.lock().iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&LineEventKind::Opened));
    assert_eq!(kinds.last(), Some(&LineEventKind::Closed));
}

#[test]
fn test_decoded_wav_reaches_line() -> anyhow::Result<()> {
    common::init_tracing();
    let (manager, recording, _) = common::recording_manager(None);
    let samples: Vec<i16> = (0..4000).map(|i| (i % 300) as i16).collect();
    let options = SourceOptions::default().with_mime_hint("audio/wav");
    let stream = to_stream(
        Source::encoded(common::wav_bytes(22_050, 2, &samples)),
        &options,
    )?;

    let written = PlaybackSession::new().play(&manager, stream, None, None)?;
    assert_eq!(written, 8000);
    let rendered: Vec<i16> = recording
        .bytes()
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    assert_eq!(rendered, samples);
    Ok(())
}

#[test]
fn test_missing_file_is_source_not_found() {
    let err = to_stream(
        Source::path("/definitely/not/here.wav"),
        &SourceOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SourceNotFound(_)));
    assert!(err.is_acquisition_failure());
}

#[test]
fn test_stop_while_idle_leaves_session_reusable() {
    common::init_tracing();
    let (manager, _, _) = common::recording_manager(None);
    let session = PlaybackSession::new();
    session.stop();
    session.stop();

    let stream = to_stream(Source::bytes(vec![7u8; 400]), &SourceOptions::default()).unwrap();
    assert_eq!(session.play(&manager, stream, Some(100), None).unwrap(), 400);
    assert_eq!(session.state(), PumpState::Idle);
}

#[test]
fn test_stopping_one_session_leaves_other_running() {
    common::init_tracing();
    let (manager_a, _, _) = common::recording_manager(Some(Duration::from_millis(2)));
    let (manager_b, _, _) = common::recording_manager(Some(Duration::from_millis(2)));
    let a = PlaybackSession::new();
    let b = PlaybackSession::new();
    let stop_a = a.stop_handle();
    let stop_b = b.stop_handle();

    // 4096 iterations of 4 bytes each, at least 8 seconds per stream.
    let total = 16_384u64;
    let (result_a, result_b) = thread::scope(|scope| {
        let ta = scope.spawn(|| {
            let stream = to_stream(Source::generator(total, |_| 1), &SourceOptions::default()).unwrap();
            a.play(&manager_a, stream, Some(4), None)
        });
        let tb = scope.spawn(|| {
            let stream = to_stream(Source::generator(total, |_| 2), &SourceOptions::default()).unwrap();
            b.play(&manager_b, stream, Some(4), None)
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while !(stop_a.is_active() && stop_b.is_active()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        stop_b.stop();
        thread::sleep(Duration::from_millis(50));
        assert!(stop_a.is_active());
        stop_a.stop();
        (ta.join().unwrap(), tb.join().unwrap())
    });

    assert!(result_a.unwrap() < total);
    assert!(result_b.unwrap() < total);
    assert_eq!(a.last_outcome(), Some(PumpState::Cancelled));
    assert_eq!(b.last_outcome(), Some(PumpState::Cancelled));
}
