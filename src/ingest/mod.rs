//! # Ingest Module - Envelope Processing
//!
//! Turns decoded envelopes into idempotent writes across the four tables.
//!
//! ## Rules
//!
//! | Trigger | Table | Behaviour |
//! |---|---|---|
//! | `MAP_REPORT_APP` | node | find by numeric id (or canonical text id), overwrite profile, firmware and position, create if missing |
//! | `NODEINFO_APP` | node | find by text id, overwrite profile, create if missing |
//! | `POSITION_APP` | node | update position of an existing node when both coordinates are non-zero |
//! | packet id ≠ 0 | packet | insert if absent |
//! | packet id ≠ 0 with gateway | packet_seen | insert if (packet, gateway, rx_time) is absent |
//! | `TRACEROUTE_APP`, packet id ≠ 0 | traceroute | always insert |
//!
//! Node writes advance `last_seen_us` (never backwards) and set
//! `first_seen_us` only when it is unset.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshingest::gate::CoordinationGate;
//! use meshingest::ingest::EnvelopeProcessor;
//! use meshingest::metrics::IngestMetrics;
//! use meshingest::storage::Store;
//!
//! # async fn demo(envelope: meshingest::meshtastic::envelope::Envelope) -> anyhow::Result<()> {
//! let store = Store::in_memory().await?;
//! store.create_tables().await?;
//! let processor = EnvelopeProcessor::new(store, CoordinationGate::new(), Arc::new(IngestMetrics::new()));
//! let report = processor.process("msh/US/2/e/LongFast/!0000002a", &envelope).await?;
//! println!("{:?}", report.outcomes);
//! # Ok(())
//! # }
//! ```

mod clock;
mod processor;
mod report;

pub use clock::{Clock, ManualClock, SystemClock};
pub use processor::EnvelopeProcessor;
pub use report::{EnvelopeReport, Rule, RuleOutcome, SkipReason};

use crate::error::StoreError;
use crate::mqtt::{EnvelopeSubscriber, Transport};

/// Pull envelopes from `subscriber` and process each one to completion
/// before taking the next. Returns only when the store fails.
pub async fn run_pipeline<T, C>(
    subscriber: &mut EnvelopeSubscriber<T>,
    processor: &EnvelopeProcessor<C>,
) -> Result<(), StoreError>
where
    T: Transport,
    C: Clock,
{
    loop {
        let (topic, envelope) = subscriber.next().await;
        processor.process(&topic, &envelope).await?;
    }
}
