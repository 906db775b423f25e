//! # Meshingest - Meshtastic MQTT Ingestion
//!
//! Meshingest subscribes to the MQTT topics that Meshtastic gateways publish
//! to, recovers the plaintext of each radio packet and keeps a deduplicated
//! relational history of nodes, packets, packet sightings and traceroutes.
//!
//! ## Features
//!
//! - **Reconnecting subscriber**: fixed-delay retry of the full connect-and-subscribe cycle, same client id every time.
//! - **Multi-key decryption**: AES-CTR with the default channel key first, then operator-supplied keys in order.
//! - **Idempotent writes**: duplicate packets and sightings are no-ops enforced by the database.
//! - **Per-rule outcomes**: one bad payload skips only its own rule; the rest of the envelope still commits.
//! - **Coordination gate**: maintenance jobs can pause ingestion without racing its writes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshingest::config::Config;
//! use meshingest::gate::CoordinationGate;
//! use meshingest::ingest::{run_pipeline, EnvelopeProcessor};
//! use meshingest::meshtastic::envelope::EnvelopeDecoder;
//! use meshingest::metrics::IngestMetrics;
//! use meshingest::mqtt::{EnvelopeSubscriber, RumqttTransport};
//! use meshingest::storage::Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = Store::connect(&config.database).await?;
//!     store.create_tables().await?;
//!
//!     let metrics = Arc::new(IngestMetrics::new());
//!     let mut subscriber = EnvelopeSubscriber::new(
//!         RumqttTransport::from_config(&config.mqtt),
//!         EnvelopeDecoder::from_config(&config.mqtt),
//!         config.mqtt.topics.clone(),
//!         config.mqtt.reconnect_delay(),
//!         metrics.clone(),
//!     );
//!     let processor = EnvelopeProcessor::new(store, CoordinationGate::new(), metrics);
//!     run_pipeline(&mut subscriber, &processor).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML configuration and permissive list parsing
//! - [`meshtastic`] - node ids, keyring decryption, envelope and payload decoding
//! - [`mqtt`] - transport seam and the reconnecting subscriber
//! - [`ingest`] - per-envelope write rules and the pipeline driver
//! - [`storage`] - SQLite schema, write primitives and read helpers
//! - [`gate`] - mutual exclusion between ingestion and maintenance
//! - [`metrics`] - counters and throughput reporting
//! - [`protobuf`] - generated Meshtastic protobuf types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  MQTT broker    │
//! └─────────────────┘
//!          │ (topic, bytes)
//! ┌─────────────────┐
//! │   Subscriber    │ ← reconnect, decode, decrypt, skip-list
//! └─────────────────┘
//!          │ (topic, Envelope)
//! ┌─────────────────┐
//! │   Processor     │ ← one transaction per envelope, under the gate
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   SQLite        │
//! └─────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod ingest;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod mqtt;
pub mod protobuf;
pub mod storage;
