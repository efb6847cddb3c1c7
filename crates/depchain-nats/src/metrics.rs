//! Event-bus counters, split by scheduling event kind.

use depchain_core::events::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Scheduling event kinds counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SourceStampCreated,
    PendingRequestAdded,
    PendingRequestsCancelled,
    BuildsetAdmitted,
    BuildsetCompleted,
    DependencyFailed,
}

const KINDS: usize = 6;

impl EventKind {
    pub const ALL: [EventKind; KINDS] = [
        EventKind::SourceStampCreated,
        EventKind::PendingRequestAdded,
        EventKind::PendingRequestsCancelled,
        EventKind::BuildsetAdmitted,
        EventKind::BuildsetCompleted,
        EventKind::DependencyFailed,
    ];

    pub fn of(event: &Event) -> Self {
        match event {
            Event::SourceStampCreated(_) => EventKind::SourceStampCreated,
            Event::PendingRequestAdded(_) => EventKind::PendingRequestAdded,
            Event::PendingRequestsCancelled(_) => EventKind::PendingRequestsCancelled,
            Event::BuildsetAdmitted(_) => EventKind::BuildsetAdmitted,
            Event::BuildsetCompleted(_) => EventKind::BuildsetCompleted,
            Event::DependencyFailed(_) => EventKind::DependencyFailed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SourceStampCreated => "sourcestamp_created",
            EventKind::PendingRequestAdded => "pending_added",
            EventKind::PendingRequestsCancelled => "pending_cancelled",
            EventKind::BuildsetAdmitted => "buildset_admitted",
            EventKind::BuildsetCompleted => "buildset_completed",
            EventKind::DependencyFailed => "dependency_failed",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Counters for the NATS event bus.
#[derive(Debug, Default)]
pub struct NatsMetrics {
    published: [AtomicU64; KINDS],
    received: [AtomicU64; KINDS],
    publish_failures: AtomicU64,
    /// Deliveries whose payload was not a known event.
    decode_failures: AtomicU64,
    dead_lettered: AtomicU64,
    disconnects: AtomicU64,
    connected: AtomicBool,
}

impl NatsMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_publish(&self, kind: EventKind) {
        self.published[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self, kind: EventKind) {
        self.received[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dlq(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counters: &[AtomicU64; KINDS]| {
            let mut values = [0; KINDS];
            for (value, counter) in values.iter_mut().zip(counters) {
                *value = counter.load(Ordering::Relaxed);
            }
            values
        };

        MetricsSnapshot {
            published: load(&self.published),
            received: load(&self.received),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    published: [u64; KINDS],
    received: [u64; KINDS],
    pub publish_failures: u64,
    pub decode_failures: u64,
    pub dead_lettered: u64,
    pub disconnects: u64,
    pub connected: bool,
}

impl MetricsSnapshot {
    pub fn published(&self, kind: EventKind) -> u64 {
        self.published[kind.index()]
    }

    pub fn received(&self, kind: EventKind) -> u64 {
        self.received[kind.index()]
    }

    pub fn total_published(&self) -> u64 {
        self.published.iter().sum()
    }

    pub fn total_received(&self) -> u64 {
        self.received.iter().sum()
    }

    /// Admissions announced minus completions seen: buildsets this process
    /// believes are still running.
    pub fn admitted_not_completed(&self) -> u64 {
        self.published(EventKind::BuildsetAdmitted)
            .saturating_sub(self.received(EventKind::BuildsetCompleted))
    }
}
