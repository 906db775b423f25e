use log::{error, info, trace};
use std::sync::Arc;
use std::time::Duration;

use super::transport::Transport;
use crate::logutil::{escape_log, hex_preview};
use crate::meshtastic::envelope::{Envelope, EnvelopeDecoder, Rejection};
use crate::metrics::{IngestMetrics, Throughput};

/// Reconnecting stream of decoded envelopes.
///
/// [`next`](Self::next) never fails: transport errors are logged, followed
/// by a fixed delay and a full connect-and-subscribe cycle.
pub struct EnvelopeSubscriber<T: Transport> {
    transport: T,
    decoder: EnvelopeDecoder,
    topics: Vec<String>,
    reconnect_delay: Duration,
    connected: bool,
    metrics: Arc<IngestMetrics>,
    throughput: Throughput,
}

impl<T: Transport> EnvelopeSubscriber<T> {
    pub fn new(
        transport: T,
        decoder: EnvelopeDecoder,
        topics: Vec<String>,
        reconnect_delay: Duration,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            transport,
            decoder,
            topics,
            reconnect_delay,
            connected: false,
            metrics,
            throughput: Throughput::new(0),
        }
    }

    /// Log an info line with the envelope rate every `interval` envelopes.
    pub fn with_throughput_interval(mut self, interval: u64) -> Self {
        self.throughput = Throughput::new(interval);
        self
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    pub fn throughput(&self) -> &Throughput {
        &self.throughput
    }

    /// Wait for the next envelope that decodes.
    pub async fn next(&mut self) -> (String, Envelope) {
        loop {
            if !self.connected {
                if let Err(e) = self.transport.connect(&self.topics).await {
                    error!("MQTT connect failed: {}", e);
                    self.back_off().await;
                    continue;
                }
                self.connected = true;
                self.throughput.start();
                info!("Subscribed to {} topic(s)", self.topics.len());
            }

            let (topic, payload) = match self.transport.recv().await {
                Ok(message) => message,
                Err(e) => {
                    error!("MQTT connection lost: {}", e);
                    self.connected = false;
                    self.back_off().await;
                    continue;
                }
            };

            self.metrics.inc_received();

            match self.decoder.decode(&payload) {
                Ok(envelope) => {
                    self.metrics.inc_decoded();
                    if let Some((total, rate)) = self.throughput.tick() {
                        info!("Processed {} envelopes ({:.2} msg/s)", total, rate);
                    }
                    return (topic, envelope);
                }
                Err(rejection) => self.note_rejection(&topic, &payload, &rejection),
            }
        }
    }

    async fn back_off(&mut self) {
        self.metrics.inc_reconnect();
        info!("Reconnecting in {:?}", self.reconnect_delay);
        tokio::time::sleep(self.reconnect_delay).await;
    }

    fn note_rejection(&self, topic: &str, payload: &[u8], rejection: &Rejection) {
        match rejection {
            Rejection::Malformed(_) | Rejection::MissingPacket => {
                self.metrics.inc_malformed();
                trace!(
                    "dropped message on {}: {} [{}]",
                    escape_log(topic),
                    rejection,
                    hex_preview(payload, 16)
                );
                return;
            }
            Rejection::SkippedNode(_) => self.metrics.inc_skipped_node(),
            Rejection::Undecodable { .. } => self.metrics.inc_undecodable(),
        }
        trace!("dropped message on {}: {}", escape_log(topic), rejection);
    }
}
