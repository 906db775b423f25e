mod common;

use meshingest::ingest::{Rule, RuleOutcome};
use prost::Message;

const TOPIC: &str = "msh/US/2/e/LongFast/!0000002a";

#[tokio::test]
async fn every_traceroute_report_is_inserted() {
    let h = common::harness().await;
    let request = common::traceroute(&[0x11, 0x22], true);
    let reply = common::traceroute(&[0x11, 0x22, 0x33], false);

    let first = common::envelope(common::packet(500, 1, request.clone()), Some("!0000002a"));
    let second = common::envelope(common::packet(500, 1, reply.clone()), Some("!0000002b"));

    let report = h.processor.process(TOPIC, &first).await.expect("first");
    assert_eq!(report.outcome(Rule::Traceroute), Some(&RuleOutcome::Applied));
    h.clock.advance(250);
    h.processor.process(TOPIC, &second).await.expect("second");
    // Same sighting again still yields another traceroute row.
    h.processor.process(TOPIC, &second).await.expect("third");

    let rows = h.store.traceroutes_for(500).await.expect("rows");
    assert_eq!(rows.len(), 3);

    assert!(!rows[0].done, "request wants a response");
    assert_eq!(rows[0].gateway_node_id, Some(42));
    assert_eq!(rows[0].route, request.payload.to_vec());
    assert_eq!(rows[0].import_time_us, common::T0);

    assert!(rows[1].done);
    assert_eq!(rows[1].gateway_node_id, Some(43));
    assert_eq!(rows[1].route, reply.payload.to_vec());
    assert_eq!(rows[1].import_time_us, common::T0 + 250);

    // Only one packet row for the shared id.
    let counts = h.store.table_counts().await.expect("counts");
    assert_eq!(counts.packets, 1);
    assert_eq!(counts.traceroutes, 3);
    assert_eq!(h.metrics.snapshot().traceroutes_inserted, 3);
}

#[tokio::test]
async fn traceroute_without_gateway_has_no_gateway_id() {
    let h = common::harness().await;
    let env = common::envelope(
        common::packet(600, 1, common::traceroute(&[0x44], false)),
        None,
    );
    h.processor.process(TOPIC, &env).await.expect("process");

    let rows = h.store.traceroutes_for(600).await.expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].gateway_node_id, None);
    assert!(rows[0].done);
}

#[tokio::test]
async fn stored_route_decodes_back_to_hops() {
    let h = common::harness().await;
    let env = common::envelope(
        common::packet(700, 1, common::traceroute(&[0xa, 0xb, 0xc], false)),
        Some("!0000002a"),
    );
    h.processor.process(TOPIC, &env).await.expect("process");

    let rows = h.store.traceroutes_for(700).await.expect("rows");
    let route = meshingest::protobuf::meshtastic_generated::RouteDiscovery::decode(
        rows[0].route.as_slice(),
    )
    .expect("route parses");
    assert_eq!(route.route, vec![0xa, 0xb, 0xc]);
}

#[tokio::test]
async fn non_traceroute_ports_write_no_traceroute() {
    let h = common::harness().await;
    let env = common::envelope(common::packet(800, 1, common::text("hi")), Some("!0000002a"));
    let report = h.processor.process(TOPIC, &env).await.expect("process");
    assert_eq!(report.outcome(Rule::Traceroute), None);
    assert_eq!(h.store.table_counts().await.expect("counts").traceroutes, 0);
}
