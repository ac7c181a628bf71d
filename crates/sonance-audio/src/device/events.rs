//! Line lifecycle events and listener registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{Line, LineInfo};

/// Lifecycle transition reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineEventKind {
    Opened,
    Started,
    Stopped,
    Closed,
}

/// A transition on one line, with the frame position at which it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvent {
    pub kind: LineEventKind,
    pub line: LineInfo,
    pub frame_position: u64,
}

/// Callback invoked for every line event.
pub type LineListener = Arc<dyn Fn(&LineEvent) + Send + Sync>;

/// Handle returned by [`attach_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-line listener table.
#[derive(Default)]
pub struct EventRelay {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, LineListener)>>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, listener: LineListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not attached.
    pub fn detach(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every attached listener.
    ///
    /// Listeners run outside the table lock, so they may attach or detach.
    pub fn dispatch(&self, event: &LineEvent) {
        let snapshot: Vec<LineListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        trace!(
            "Line {} {:?} at frame {} -> {} listeners",
            event.line.id,
            event.kind,
            event.frame_position,
            snapshot.len()
        );
        for listener in snapshot {
            listener(event);
        }
    }
}

/// Register `listener` for all lifecycle events of `line`.
pub fn attach_listener<L: Line + ?Sized>(line: &L, listener: LineListener) -> ListenerId {
    line.events().attach(listener)
}

/// Unregister a listener previously attached to `line`.
pub fn detach_listener<L: Line + ?Sized>(line: &L, id: ListenerId) -> bool {
    line.events().detach(id)
}

/// Keeps a listener attached until dropped.
pub struct ListenerGuard {
    relay: Arc<EventRelay>,
    id: ListenerId,
}

impl ListenerGuard {
    pub fn attach<L: Line + ?Sized>(line: &L, listener: LineListener) -> Self {
        let relay = line.events();
        let id = relay.attach(listener);
        Self { relay, id }
    }

    pub const fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.relay.detach(self.id);
    }
}
