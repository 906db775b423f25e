//! # MQTT Subscription
//!
//! Gateways publish `ServiceEnvelope` protobufs to topics such as
//! `msh/US/2/e/LongFast/!0000002a`. This module turns that stream into an
//! endless sequence of decoded envelopes:
//!
//! - [`Transport`] - the seam between the loop and the broker client
//! - [`RumqttTransport`] - the production implementation on `rumqttc`
//! - [`EnvelopeSubscriber`] - connect, subscribe, read, decode, and on any
//!   transport error wait a fixed delay and start over
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshingest::config::Config;
//! use meshingest::meshtastic::envelope::EnvelopeDecoder;
//! use meshingest::metrics::IngestMetrics;
//! use meshingest::mqtt::{EnvelopeSubscriber, RumqttTransport};
//!
//! # async fn demo(config: Config) {
//! let transport = RumqttTransport::from_config(&config.mqtt);
//! let mut subscriber = EnvelopeSubscriber::new(
//!     transport,
//!     EnvelopeDecoder::from_config(&config.mqtt),
//!     config.mqtt.topics.clone(),
//!     config.mqtt.reconnect_delay(),
//!     Arc::new(IngestMetrics::new()),
//! );
//! let (topic, envelope) = subscriber.next().await;
//! println!("{} on {}", envelope.port_name(), topic);
//! # }
//! ```

mod subscriber;
mod transport;

pub use subscriber::EnvelopeSubscriber;
pub use transport::{RumqttTransport, Transport};
