//! In-memory log of recent scheduler events

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use warden_shared::utils::time::system_time_nanos;
use warden_shared::{KernelId, SchedulerEvent};

/// A single event as stored in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Position in the stream of every event recorded, dropped ones included
    pub seq: u64,
    pub recorded_at_ns: u64,
    #[serde(flatten)]
    pub event: SchedulerEvent,
}

#[derive(Debug, Default)]
struct Ring {
    events: VecDeque<StoredEvent>,
    next_seq: u64,
    dropped: u64,
}

/// Ring buffer of scheduler events. Thread-safe.
#[derive(Debug)]
pub struct EventLog {
    max_events: usize,
    ring: RwLock<Ring>,
}

impl EventLog {
    /// Create a log that keeps at most `max_events` events
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            ring: RwLock::new(Ring {
                events: VecDeque::with_capacity(max_events.min(4096)),
                ..Default::default()
            }),
        }
    }

    /// Append an event. Drops the oldest if at capacity.
    pub fn push(&self, event: SchedulerEvent) {
        let mut ring = self.write();
        let seq = ring.next_seq;
        ring.next_seq += 1;
        ring.events.push_back(StoredEvent {
            seq,
            recorded_at_ns: system_time_nanos(),
            event,
        });

        let mut drops = 0u64;
        while ring.events.len() > self.max_events {
            ring.events.pop_front();
            drops += 1;
        }
        ring.dropped += drops;

        crate::metrics::EVENT_LOG_SIZE.set(ring.events.len() as f64);
        if drops > 0 {
            crate::metrics::EVENT_LOG_DROPS.inc_by(drops as f64);
        }
    }

    /// The newest `limit` events, optionally only those attributed to
    /// `kernel`, oldest first
    pub fn query(&self, kernel: Option<KernelId>, limit: usize) -> Vec<StoredEvent> {
        let ring = self.read();
        let mut out: Vec<StoredEvent> = ring
            .events
            .iter()
            .rev()
            .filter(|stored| kernel.is_none() || stored.event.kernel() == kernel)
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Every retained event, oldest first
    pub fn snapshot(&self) -> Vec<StoredEvent> {
        self.read().events.iter().cloned().collect()
    }

    /// Retained failures only
    pub fn faults(&self) -> Vec<StoredEvent> {
        self.read()
            .events
            .iter()
            .filter(|stored| stored.event.is_fault())
            .cloned()
            .collect()
    }

    /// Retained events per kind
    pub fn counts(&self) -> BTreeMap<&'static str, u64> {
        let mut counts = BTreeMap::new();
        for stored in &self.read().events {
            *counts.entry(stored.event.name()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events pushed out of the ring so far
    pub fn dropped(&self) -> u64 {
        self.read().dropped
    }

    /// Log utilization as a fraction (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_events == 0 {
            return 0.0;
        }
        self.len() as f64 / self.max_events as f64
    }

    fn read(&self) -> RwLockReadGuard<'_, Ring> {
        self.ring.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ring> {
        self.ring.write().unwrap_or_else(PoisonError::into_inner)
    }
}
