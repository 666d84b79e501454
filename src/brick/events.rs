// Notifications sent from the brick to registered listeners

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

/// Decoded GETOUTPUTSTATE reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotorState {
    pub port: u8,
    pub power: i8,
    pub mode: u8,
    pub regulation: u8,
    pub turn_ratio: i8,
    pub run_state: u8,
    pub tacho_limit: u32,
    pub tacho_count: i32,
    pub block_tacho_count: i32,
    pub rotation_count: i32,
}

/// Event delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrickEvent {
    Connected,
    ConnectError { reason: String },
    ReceiveError { reason: String },
    SendError { reason: String },
    MotorState(MotorState),
    InputState { port: u8, sensor_type: u8, value: i16 },
    LsStatus { status: u8, bytes_ready: u8 },
    LsWrite { status: u8 },
    LsRead { status: u8, bytes_read: u8, data: u8 },
    Toast { text: String },
}

pub type Listener = Arc<dyn Fn(&BrickEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Explicit subscription list shared by the link, the queue and the sensors
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<(ListenerId, Listener)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&BrickEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the id was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: &BrickEvent) {
        // Snapshot so listeners may (un)subscribe from inside a callback
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}
