#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

mod common;

use std::thread;
use std::time::{Duration, Instant};

use sonance_audio::{stop_all, to_stream, PlaybackSession, PumpState, Source, SourceOptions};

#[test]
fn test_stop_all_cancels_every_running_session() {
    common::init_tracing();
    let sessions: Vec<PlaybackSession> = (0..3).map(|_| PlaybackSession::new()).collect();
    let handles: Vec<_> = sessions.iter().map(PlaybackSession::stop_handle).collect();
    let total = 16_384u64;

    let results = thread::scope(|scope| {
        let workers: Vec<_> = sessions
            .iter()
            .map(|session| {
                scope.spawn(move || {
                    let (manager, _, _) = common::recording_manager(Some(Duration::from_millis(2)));
                    let stream =
                        to_stream(Source::generator(total, |_| 0), &SourceOptions::default()).unwrap();
                    session.play(&manager, stream, Some(4), None)
                })
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handles.iter().all(|h| h.is_active()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(stop_all() >= 3);
        workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .collect::<Vec<_>>()
    });

    for (session, result) in sessions.iter().zip(results) {
        assert!(result.unwrap() < total);
        assert_eq!(session.last_outcome(), Some(PumpState::Cancelled));
    }
}
