mod common;

use async_trait::async_trait;
use bytes::Bytes;
use meshingest::error::TransportError;
use meshingest::ingest::{Rule, RuleOutcome};
use meshingest::metrics::IngestMetrics;
use meshingest::mqtt::{EnvelopeSubscriber, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Step {
    Message(&'static str, Vec<u8>),
    Drop,
}

#[derive(Default)]
struct Script {
    connect_failures: usize,
    steps: VecDeque<Step>,
    connects: Vec<Vec<String>>,
}

/// Transport that plays back a script and then waits forever.
#[derive(Clone)]
struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    fn new(connect_failures: usize, steps: Vec<Step>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                connect_failures,
                steps: steps.into(),
                connects: Vec::new(),
            })),
        }
    }

    fn connects(&self) -> usize {
        self.script.lock().expect("script").connects.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self, topics: &[String]) -> Result<(), TransportError> {
        let mut script = self.script.lock().expect("script");
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(TransportError::Other("connection refused".into()));
        }
        script.connects.push(topics.to_vec());
        Ok(())
    }

    async fn recv(&mut self) -> Result<(String, Bytes), TransportError> {
        let step = self.script.lock().expect("script").steps.pop_front();
        match step {
            Some(Step::Message(topic, payload)) => Ok((topic.to_string(), Bytes::from(payload))),
            Some(Step::Drop) => Err(TransportError::Other("connection reset".into())),
            None => std::future::pending().await,
        }
    }
}

fn text_envelope(id: u32) -> Vec<u8> {
    common::envelope_bytes(
        common::packet(id, 7, common::text("ping")),
        Some("!0000000a"),
    )
}

fn subscriber(
    transport: ScriptedTransport,
    delay: Duration,
) -> EnvelopeSubscriber<ScriptedTransport> {
    EnvelopeSubscriber::new(
        transport,
        common::default_decoder(),
        vec!["msh/US/#".to_string(), "msh/EU/#".to_string()],
        delay,
        Arc::new(IngestMetrics::new()),
    )
}

#[tokio::test(start_paused = true)]
async fn drop_is_followed_by_fixed_delay_and_resubscribe() {
    let transport = ScriptedTransport::new(
        0,
        vec![
            Step::Message("msh/US/a", text_envelope(1)),
            Step::Drop,
            Step::Message("msh/US/b", text_envelope(2)),
        ],
    );
    let mut sub = subscriber(transport.clone(), Duration::from_secs(1));

    let (topic, env) = sub.next().await;
    assert_eq!(topic, "msh/US/a");
    assert_eq!(env.packet_id(), 1);
    assert_eq!(transport.connects(), 1);

    let before = tokio::time::Instant::now();
    let (topic, env) = sub.next().await;
    assert!(before.elapsed() >= Duration::from_secs(1));
    assert_eq!(topic, "msh/US/b");
    assert_eq!(env.packet_id(), 2);
    assert_eq!(transport.connects(), 2);

    let script = transport.script.lock().expect("script");
    assert!(script.connects.iter().all(|t| t.len() == 2));
    drop(script);
    assert_eq!(sub.metrics().snapshot().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connects_are_retried_indefinitely() {
    let transport =
        ScriptedTransport::new(3, vec![Step::Message("msh/US/a", text_envelope(9))]);
    let mut sub = subscriber(transport.clone(), Duration::from_secs(1));

    let before = tokio::time::Instant::now();
    let (_, env) = sub.next().await;
    assert_eq!(env.packet_id(), 9);
    assert!(before.elapsed() >= Duration::from_secs(3));
    assert_eq!(transport.connects(), 1);
    assert_eq!(sub.metrics().snapshot().reconnects, 3);
}

#[tokio::test(start_paused = true)]
async fn undecodable_messages_do_not_end_the_stream() {
    let transport = ScriptedTransport::new(
        0,
        vec![
            Step::Message("msh/US/noise", vec![0xff, 0xff, 0xff]),
            Step::Message("msh/US/a", text_envelope(4)),
        ],
    );
    let mut sub = subscriber(transport.clone(), Duration::from_secs(1));

    let before = tokio::time::Instant::now();
    let (_, env) = sub.next().await;
    assert_eq!(env.packet_id(), 4);
    // No reconnect for bad payloads.
    assert_eq!(before.elapsed(), Duration::ZERO);
    assert_eq!(transport.connects(), 1);
    let snap = sub.metrics().snapshot();
    assert_eq!(snap.received, 2);
    assert_eq!(snap.malformed, 1);
    assert_eq!(snap.decoded, 1);
}

#[tokio::test(start_paused = true)]
async fn throughput_counts_envelopes_since_first_connect() {
    let transport = ScriptedTransport::new(
        2,
        vec![
            Step::Message("msh/US/noise", vec![0xff, 0xff, 0xff]),
            Step::Message("msh/US/a", text_envelope(5)),
        ],
    );
    let mut sub = subscriber(transport, Duration::from_secs(1)).with_throughput_interval(1);
    assert_eq!(sub.throughput().elapsed(), None);

    let (_, env) = sub.next().await;
    assert_eq!(env.packet_id(), 5);
    assert_eq!(sub.throughput().count(), 1);
    // The two failed connects happened before the clock started.
    assert_eq!(sub.throughput().elapsed(), Some(Duration::ZERO));
    assert_eq!(sub.metrics().snapshot().received, 2);
}

#[tokio::test(start_paused = true)]
async fn stream_stays_pending_when_transport_is_quiet() {
    let transport = ScriptedTransport::new(0, Vec::new());
    let mut sub = subscriber(transport, Duration::from_secs(1));
    let waited = tokio::time::timeout(Duration::from_secs(60), sub.next()).await;
    assert!(waited.is_err());
}

// Real time here: the store runs on its own thread and must not race a
// paused clock.
#[tokio::test]
async fn redelivery_after_reconnect_does_not_duplicate_packets() {
    let h = common::harness().await;
    let transport = ScriptedTransport::new(
        0,
        vec![
            Step::Message("msh/US/a", text_envelope(1001)),
            Step::Drop,
            // Broker redelivers the same packet after the reconnect.
            Step::Message("msh/US/a", text_envelope(1001)),
            Step::Message("msh/US/a", text_envelope(1002)),
        ],
    );
    let delay = Duration::from_millis(50);
    let mut sub = subscriber(transport.clone(), delay);

    let started = std::time::Instant::now();
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let (topic, env) = sub.next().await;
        let report = h.processor.process(&topic, &env).await.expect("process");
        outcomes.push(report.outcome(Rule::Packet).cloned());
    }
    assert!(started.elapsed() >= delay);
    assert_eq!(
        outcomes,
        vec![
            Some(RuleOutcome::Applied),
            Some(RuleOutcome::Duplicate),
            Some(RuleOutcome::Applied),
        ]
    );

    let counts = h.store.table_counts().await.expect("counts");
    assert_eq!(counts.packets, 2);
    assert_eq!(counts.packet_seen, 2);
    assert_eq!(transport.connects(), 2);
}
