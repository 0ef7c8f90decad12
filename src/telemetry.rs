//! Telemetry Event Bus
//!
//! Draw units, compute units and the globals controller publish structured
//! events here. A profiler subscribes and aggregates; nothing on the bus ever
//! calls back into the binding or pipeline code.
//!
//! The bus is process-wide: a bounded ring buffer keeps the most recent
//! events for polling consumers, and subscribers receive every event as it
//! is published.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Default ring capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Draw,
    Dispatch,
    Globals,
    PipelineCompile,
    BindGroupRebuild,
    Resize,
    Readback,
}

/// Start/end markers bracket timed work; `Instant` events are one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Start,
    End,
    Instant,
}

/// Kind-specific numeric payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventField {
    VertexCount(u32),
    InstanceCount(u32),
    Indexed(bool),
    Workgroups([u32; 3]),
    Frame(u64),
    Time(f32),
    Size(u32, u32),
    Bytes(u64),
}

/// One structured event on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: EventKind,
    pub phase: EventPhase,
    /// Microseconds since the bus was first touched.
    pub timestamp_us: u64,
    pub label: Option<String>,
    pub fields: SmallVec<[EventField; 4]>,
}

impl TelemetryEvent {
    #[must_use]
    pub fn new(kind: EventKind, phase: EventPhase) -> Self {
        Self {
            kind,
            phase,
            timestamp_us: now_us(),
            label: None,
            fields: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: Option<&str>) -> Self {
        self.label = label.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: EventField) -> Self {
        self.fields.push(field);
        self
    }
}

/// Identifies a subscriber for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// Bounded ring of recent events plus a subscriber list.
pub struct EventBus {
    ring: VecDeque<TelemetryEvent>,
    capacity: usize,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    dropped: u64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY)),
            capacity: capacity.max(1),
            subscribers: Vec::new(),
            next_subscription: 0,
            dropped: 0,
        }
    }

    /// Changes the ring capacity, discarding the oldest events if it shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.ring.len() > self.capacity {
            self.ring.pop_front();
            self.dropped += 1;
        }
    }

    /// Grows the ring to at least `capacity`; never shrinks it.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.capacity = capacity;
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events evicted from the ring since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Stores the event and returns the subscribers that must observe it.
    fn push(&mut self, event: TelemetryEvent) -> SmallVec<[Subscriber; 4]> {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
            self.dropped += 1;
        }
        self.ring.push_back(event);
        self.subscribers.iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn subscribe(&mut self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, subscriber));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    #[must_use]
    pub fn recent(&self) -> Vec<TelemetryEvent> {
        self.ring.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<TelemetryEvent> {
        self.ring.drain(..).collect()
    }
}

static BUS: OnceLock<Mutex<EventBus>> = OnceLock::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();
static ENABLED: AtomicBool = AtomicBool::new(true);

fn now_us() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as u64
}

/// Returns the process-wide bus.
pub fn bus() -> &'static Mutex<EventBus> {
    BUS.get_or_init(|| Mutex::new(EventBus::default()))
}

/// Globally enables or disables publishing.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

#[must_use]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Publishes an event. Subscribers run after the bus lock is released.
pub fn emit(event: TelemetryEvent) {
    if !is_enabled() {
        return;
    }
    let subscribers = bus().lock().push(event.clone());
    for subscriber in subscribers {
        subscriber(&event);
    }
}

/// Registers a subscriber on the process-wide bus.
pub fn subscribe<F>(f: F) -> SubscriptionId
where
    F: Fn(&TelemetryEvent) + Send + Sync + 'static,
{
    bus().lock().subscribe(Arc::new(f))
}

pub fn unsubscribe(id: SubscriptionId) -> bool {
    bus().lock().unsubscribe(id)
}
