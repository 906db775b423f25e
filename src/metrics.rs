//! Ingestion counters and the periodic throughput line.
//!
//! Counters are plain relaxed atomics shared through an `Arc`; they are only
//! ever read for logging and `status` output.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    received: AtomicU64,
    decoded: AtomicU64,
    malformed: AtomicU64,
    undecodable: AtomicU64,
    skipped_nodes: AtomicU64,
    reconnects: AtomicU64,
    packets_inserted: AtomicU64,
    packets_duplicate: AtomicU64,
    sightings_inserted: AtomicU64,
    sightings_duplicate: AtomicU64,
    nodes_created: AtomicU64,
    nodes_updated: AtomicU64,
    traceroutes_inserted: AtomicU64,
    rules_skipped: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(inc_received, received);
    counter!(inc_decoded, decoded);
    counter!(inc_malformed, malformed);
    counter!(inc_undecodable, undecodable);
    counter!(inc_skipped_node, skipped_nodes);
    counter!(inc_reconnect, reconnects);
    counter!(inc_packet_inserted, packets_inserted);
    counter!(inc_packet_duplicate, packets_duplicate);
    counter!(inc_sighting_inserted, sightings_inserted);
    counter!(inc_sighting_duplicate, sightings_duplicate);
    counter!(inc_node_created, nodes_created);
    counter!(inc_node_updated, nodes_updated);
    counter!(inc_traceroute_inserted, traceroutes_inserted);
    counter!(inc_rule_skipped, rules_skipped);

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            received: load(&self.received),
            decoded: load(&self.decoded),
            malformed: load(&self.malformed),
            undecodable: load(&self.undecodable),
            skipped_nodes: load(&self.skipped_nodes),
            reconnects: load(&self.reconnects),
            packets_inserted: load(&self.packets_inserted),
            packets_duplicate: load(&self.packets_duplicate),
            sightings_inserted: load(&self.sightings_inserted),
            sightings_duplicate: load(&self.sightings_duplicate),
            nodes_created: load(&self.nodes_created),
            nodes_updated: load(&self.nodes_updated),
            traceroutes_inserted: load(&self.traceroutes_inserted),
            rules_skipped: load(&self.rules_skipped),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub decoded: u64,
    pub malformed: u64,
    pub undecodable: u64,
    pub skipped_nodes: u64,
    pub reconnects: u64,
    pub packets_inserted: u64,
    pub packets_duplicate: u64,
    pub sightings_inserted: u64,
    pub sightings_duplicate: u64,
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub traceroutes_inserted: u64,
    pub rules_skipped: u64,
}

/// Counts delivered envelopes and reports the running rate every `interval`.
///
/// The rate is measured from [`start`](Self::start), which the subscriber
/// calls on its first successful connect.
#[derive(Debug)]
pub struct Throughput {
    interval: u64,
    count: u64,
    started: Option<Instant>,
}

impl Throughput {
    /// `interval == 0` disables reporting.
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            count: 0,
            started: None,
        }
    }

    /// Start the rate clock. Later calls keep the first start time.
    pub fn start(&mut self) {
        self.started.get_or_insert_with(Instant::now);
    }

    /// Time since [`start`](Self::start), if it has been called.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|t| t.elapsed())
    }

    /// Count one envelope. Returns `(total, envelopes_per_second)` when the
    /// total reaches a multiple of the interval.
    pub fn tick(&mut self) -> Option<(u64, f64)> {
        self.count += 1;
        if self.interval == 0 || self.count % self.interval != 0 {
            return None;
        }
        let secs = self.elapsed().map_or(0.0, |d| d.as_secs_f64());
        let rate = if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        };
        Some((self.count, rate))
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
