//! Publish/subscribe substrate with a thread-safe deferred-delivery queue.
//!
//! Producers on any thread `enqueue`; the main loop alone calls
//! `drain_queued`, which dispatches the snapshot taken at call time. Events
//! enqueued while a drain is in progress wait for the next drain, bounding
//! staleness to one tick.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::types::{Event, EventKind};

type Handler = Box<dyn FnMut(&Event) -> anyhow::Result<()> + Send>;

/// Returned by `subscribe`; identifies one registration for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken(u64);

struct QueuedEvent {
    event: Event,
    enqueued_at: Instant,
}

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerToken, Handler)>>>,
    queue: Mutex<VecDeque<QueuedEvent>>,
    next_token: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for one event kind. Registration order is dispatch
    /// order; the same closure may be registered more than once.
    ///
    /// Handlers may `enqueue` further events but must not subscribe,
    /// unsubscribe, or dispatch from inside a dispatch pass — the registry is
    /// an init/shutdown-phase structure.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> ListenerToken
    where
        F: FnMut(&Event) -> anyhow::Result<()> + Send + 'static,
    {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((token, Box::new(handler)));
        token
    }

    /// Removes exactly one handler. Unknown tokens are reported and ignored;
    /// shutdown ordering between subsystems is not guaranteed, so this must
    /// never be fatal.
    pub fn unsubscribe(&self, kind: EventKind, token: ListenerToken) {
        let mut listeners = self.listeners.lock();
        let removed = match listeners.get_mut(&kind) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(t, _)| *t != token);
                handlers.len() < before
            }
            None => false,
        };
        if !removed {
            tracing::debug!(?kind, ?token, "unsubscribe: listener not found");
        }
    }

    /// Thread-safe append to the unbounded queue. Never blocks and never
    /// re-enters consumer logic on the calling thread.
    pub fn enqueue(&self, event: Event) {
        self.queue.lock().push_back(QueuedEvent {
            event,
            enqueued_at: Instant::now(),
        });
    }

    /// Synchronously invokes every current handler for the event's kind, in
    /// registration order, on the calling thread. A failing handler is logged
    /// and does not stop the pass.
    pub fn dispatch_immediate(&self, event: &Event) {
        let kind = event.kind();
        let mut listeners = self.listeners.lock();
        if let Some(handlers) = listeners.get_mut(&kind) {
            for (token, handler) in handlers.iter_mut() {
                if let Err(err) = handler(event) {
                    tracing::error!(?kind, ?token, "event handler failed: {err:#}");
                }
            }
        }
    }

    /// Pops every event queued before this call and dispatches each in FIFO
    /// order. Call from the main thread only.
    pub fn drain_queued(&self) {
        let snapshot: Vec<QueuedEvent> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        for queued in snapshot {
            tracing::trace!(
                kind = ?queued.event.kind(),
                queued_for = ?queued.enqueued_at.elapsed(),
                "dispatching queued event"
            );
            self.dispatch_immediate(&queued.event);
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }
}
