//! The playback pump: copies a stream into an output line until it ends or is stopped.
//!
//! Each session owns its cancellation flag. Stopping one session never affects
//! another; [`stop_all`] signals every live session explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sonance_core::{EngineConfig, Error, Result};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::device::{
    scoped_open, DeviceManager, LineKind, LineListener, ListenerGuard, MixerSelection, OutputLine,
};
use crate::negotiate::Negotiator;
use crate::source::StreamHandle;

/// Flags of every session that still exists.
static SESSIONS: Lazy<Mutex<Vec<Weak<AtomicBool>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Where a session is in its play cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Running,
    /// The stream reached its end.
    Completed,
    /// The flag was cleared before the stream ended.
    Cancelled,
    /// Acquisition, I/O, or format failure.
    Failed,
}

/// Cloneable, thread-safe handle that stops one session.
#[derive(Debug, Clone)]
pub struct StopHandle {
    session: Uuid,
    active: Arc<AtomicBool>,
}

impl StopHandle {
    /// Ask the session to stop at its next loop check.
    pub fn stop(&self) {
        debug!("Stop requested for session {}", self.session);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub const fn session(&self) -> Uuid {
        self.session
    }
}

/// One playback pipeline with its own cooperative cancellation flag.
pub struct PlaybackSession {
    id: Uuid,
    active: Arc<AtomicBool>,
    state: Mutex<PumpState>,
    last_outcome: Mutex<Option<PumpState>>,
    selection: MixerSelection,
    config: Option<EngineConfig>,
}

impl PlaybackSession {
    pub fn new() -> Self {
        let active = Arc::new(AtomicBool::new(false));
        {
            let mut sessions = SESSIONS.lock();
            sessions.retain(|flag| flag.strong_count() > 0);
            sessions.push(Arc::downgrade(&active));
        }
        Self {
            id: Uuid::new_v4(),
            active,
            state: Mutex::new(PumpState::Idle),
            last_outcome: Mutex::new(None),
            selection: MixerSelection::Default,
            config: None,
        }
    }

    /// Play through a specific mixer instead of the default one.
    #[must_use]
    pub fn with_selection(mut self, selection: MixerSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Use `config` instead of the device manager's.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PumpState {
        *self.state.lock()
    }

    /// How the most recent `play` ended.
    pub fn last_outcome(&self) -> Option<PumpState> {
        *self.last_outcome.lock()
    }

    /// Whether the cancellation flag is currently raised.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            session: self.id,
            active: self.active.clone(),
        }
    }

    /// Clear this session's flag. A no-op while idle.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Play `stream` on an output line until it ends or the session is stopped.
    ///
    /// The stream is negotiated to its canonical playback format first, so format
    /// errors surface before any line is acquired. `buffer_size` bytes are moved per
    /// iteration (the configured pump buffer when `None`). A listener, if given, sees
    /// every lifecycle event of the line and is detached afterwards.
    ///
    /// The session counts as active from entry, so a stop that arrives while the line
    /// is still being set up cancels before the first write.
    ///
    /// Returns the number of bytes written. The line is closed on every exit path.
    pub fn play(
        &self,
        manager: &DeviceManager,
        stream: StreamHandle,
        buffer_size: Option<usize>,
        listener: Option<LineListener>,
    ) -> Result<u64> {
        {
            let mut state = self.state.lock();
            if *state == PumpState::Running {
                return Err(Error::LineState(format!(
                    "session {} is already playing",
                    self.id
                )));
            }
            *state = PumpState::Running;
            self.active.store(true, Ordering::SeqCst);
        }

        let result = self.run(manager, stream, buffer_size, listener);
        self.active.store(false, Ordering::SeqCst);

        let outcome = match &result {
            Ok((_, true)) => PumpState::Cancelled,
            Ok((_, false)) => PumpState::Completed,
            Err(_) => PumpState::Failed,
        };
        *self.last_outcome.lock() = Some(outcome);
        *self.state.lock() = PumpState::Idle;

        match result {
            Ok((written, _)) => {
                info!("Session {} {:?} after {written} bytes", self.id, outcome);
                Ok(written)
            }
            Err(e) => {
                warn!("Session {} failed: {e}", self.id);
                Err(e)
            }
        }
    }

    /// Returns bytes written and whether the session was cancelled.
    fn run(
        &self,
        manager: &DeviceManager,
        stream: StreamHandle,
        buffer_size: Option<usize>,
        listener: Option<LineListener>,
    ) -> Result<(u64, bool)> {
        let config = self.config.as_ref().unwrap_or_else(|| manager.config());
        let buffer_size = buffer_size.unwrap_or(config.pump_buffer_bytes);
        if buffer_size == 0 {
            return Err(Error::InvalidArgument("pump buffer size must be positive".into()));
        }

        let mut stream = Negotiator::new(config.default_bit_depth).negotiate(stream)?;
        let format = *stream.format();

        let mut line = manager
            .open(
                LineKind::Output,
                Some(format),
                Some(config.line_buffer_bytes),
                &self.selection,
            )?
            .into_output()?;
        let _listener = listener.map(|l| ListenerGuard::attach(line.as_ref(), l));

        info!(
            "Session {} playing {} as {format}",
            self.id,
            stream.name()
        );
        let pumped = scoped_open(line.as_mut(), None, |line| {
            self.pump(&mut stream, line, buffer_size)
        })?;
        stream.close()?;
        Ok(pumped)
    }

    fn pump(
        &self,
        stream: &mut StreamHandle,
        line: &mut dyn OutputLine,
        buffer_size: usize,
    ) -> Result<(u64, bool)> {
        let mut buf = vec![0u8; buffer_size];
        let mut total = 0u64;

        let mut count = stream.read(&mut buf)?;
        while let Some(n) = count {
            if !self.active.load(Ordering::SeqCst) {
                debug!("Session {} stopped after {total} bytes", self.id);
                return Ok((total, true));
            }
            if n > 0 {
                write_all(line, &buf[..n])?;
                total += n as u64;
                trace!("Session {} wrote {n} bytes ({total} total)", self.id);
            }
            count = stream.read(&mut buf)?;
        }
        Ok((total, false))
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new()
    }
}

fn write_all(line: &mut dyn OutputLine, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let n = line.write(data)?;
        if n == 0 {
            return Err(Error::StreamIo(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "output line accepted no bytes",
            )));
        }
        data = &data[n..];
    }
    Ok(())
}

/// Clear the flag of every live session. Returns how many were signalled.
pub fn stop_all() -> usize {
    let mut sessions = SESSIONS.lock();
    sessions.retain(|flag| flag.strong_count() > 0);
    let mut signalled = 0;
    for flag in sessions.iter().filter_map(Weak::upgrade) {
        flag.store(false, Ordering::SeqCst);
        signalled += 1;
    }
    info!("Stop requested for {signalled} sessions");
    signalled
}
