use crossbeam::channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::trace;
use std::sync::{Mutex, PoisonError};

/// Observable state changes, published after the state lock is released
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncEvent {
    RunningChanged(bool),
    TempoChanged(f64),
    PulseTick,
    /// Quarter-note index of the boundary whose marker was sent
    BoundaryFired(i64),
    MarkerReleased,
    PositionChanged { beats: i64, quarter_notes: f64 },
}

/// Fan-out to any number of subscribers. Publishing never blocks: a full
/// bounded subscriber misses events, a dropped receiver is forgotten.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = unbounded();
        self.add(tx);
        rx
    }

    /// Subscriber that drops events instead of growing past `capacity`
    pub fn subscribe_bounded(&self, capacity: usize) -> Receiver<SyncEvent> {
        let (tx, rx) = bounded(capacity);
        self.add(tx);
        rx
    }

    fn add(&self, tx: Sender<SyncEvent>) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
    }

    pub fn publish(&self, event: SyncEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Subscriber queue full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
