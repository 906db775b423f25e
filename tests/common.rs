//! Test utilities & fixtures.
//! Builders for wire-format envelopes and an in-memory processor.
#![allow(dead_code)]

use bytes::Bytes;
use prost::Message;
use std::collections::HashSet;
use std::sync::Arc;

use meshingest::gate::CoordinationGate;
use meshingest::ingest::{EnvelopeProcessor, ManualClock};
use meshingest::meshtastic::crypto::{ChannelKey, Keyring};
use meshingest::meshtastic::envelope::{Envelope, EnvelopeDecoder};
use meshingest::metrics::IngestMetrics;
use meshingest::protobuf::meshtastic_generated as proto;
use meshingest::storage::Store;

pub use proto::mesh_packet::PayloadVariant;

pub const BROADCAST: u32 = 0xffff_ffff;
pub const T0: i64 = 1_700_000_000_000_000;

pub fn data(port: proto::PortNum, payload: Vec<u8>) -> proto::Data {
    proto::Data {
        portnum: port as i32,
        payload: Bytes::from(payload),
        ..Default::default()
    }
}

pub fn text(body: &str) -> proto::Data {
    data(proto::PortNum::TextMessageApp, body.as_bytes().to_vec())
}

/// A plaintext packet with typical radio metadata.
pub fn packet(id: u32, from: u32, data: proto::Data) -> proto::MeshPacket {
    proto::MeshPacket {
        id,
        from,
        to: BROADCAST,
        rx_time: 1_700_000_000,
        rx_snr: 5.5,
        rx_rssi: -92,
        hop_limit: 3,
        hop_start: 3,
        payload_variant: Some(PayloadVariant::Decoded(data)),
        ..Default::default()
    }
}

/// The same packet with its payload encrypted under `key`.
pub fn encrypted(packet: proto::MeshPacket, key: &ChannelKey) -> proto::MeshPacket {
    let plain = match &packet.payload_variant {
        Some(PayloadVariant::Decoded(data)) => data.encode_to_vec(),
        _ => Vec::new(),
    };
    let ciphertext = key.encrypt(packet.id, packet.from, &plain);
    proto::MeshPacket {
        payload_variant: Some(PayloadVariant::Encrypted(Bytes::from(ciphertext))),
        ..packet
    }
}

pub fn envelope_bytes(packet: proto::MeshPacket, gateway: Option<&str>) -> Vec<u8> {
    proto::ServiceEnvelope {
        packet: Some(packet),
        channel_id: "LongFast".to_string(),
        gateway_id: gateway.unwrap_or_default().to_string(),
    }
    .encode_to_vec()
}

pub fn default_decoder() -> EnvelopeDecoder {
    EnvelopeDecoder::new(Keyring::with_default(Vec::new()), HashSet::new())
}

/// Decode a plaintext packet into an [`Envelope`] the way the subscriber would.
pub fn envelope(packet: proto::MeshPacket, gateway: Option<&str>) -> Envelope {
    default_decoder()
        .decode(&envelope_bytes(packet, gateway))
        .expect("fixture envelope decodes")
}

pub fn map_report(long_name: &str, firmware: &str, lat: i32, long: i32) -> proto::Data {
    let report = proto::MapReport {
        long_name: long_name.to_string(),
        short_name: long_name.chars().take(4).collect(),
        role: proto::config::device_config::Role::Router as i32,
        hw_model: proto::HardwareModel::Tbeam as i32,
        firmware_version: firmware.to_string(),
        latitude_i: lat,
        longitude_i: long,
        ..Default::default()
    };
    data(proto::PortNum::MapReportApp, report.encode_to_vec())
}

pub fn node_info(id: &str, long_name: &str) -> proto::Data {
    let user = proto::User {
        id: id.to_string(),
        long_name: long_name.to_string(),
        short_name: long_name.chars().take(4).collect(),
        hw_model: proto::HardwareModel::HeltecV20 as i32,
        role: proto::config::device_config::Role::Client as i32,
        ..Default::default()
    };
    data(proto::PortNum::NodeinfoApp, user.encode_to_vec())
}

pub fn position(lat: Option<i32>, long: Option<i32>) -> proto::Data {
    let fix = proto::Position {
        latitude_i: lat,
        longitude_i: long,
        ..Default::default()
    };
    data(proto::PortNum::PositionApp, fix.encode_to_vec())
}

pub fn traceroute(route: &[u32], want_response: bool) -> proto::Data {
    let discovery = proto::RouteDiscovery {
        route: route.to_vec(),
        ..Default::default()
    };
    proto::Data {
        want_response,
        ..data(proto::PortNum::TracerouteApp, discovery.encode_to_vec())
    }
}

pub struct Harness {
    pub processor: EnvelopeProcessor<ManualClock>,
    pub clock: ManualClock,
    pub store: Store,
    pub metrics: Arc<IngestMetrics>,
}

/// Fresh in-memory store with the schema applied and a manual clock at [`T0`].
pub async fn harness() -> Harness {
    let store = Store::in_memory().await.expect("in-memory store");
    store.create_tables().await.expect("schema");
    let clock = ManualClock::starting_at(T0);
    let metrics = Arc::new(IngestMetrics::new());
    let processor = EnvelopeProcessor::with_clock(
        store.clone(),
        CoordinationGate::new(),
        clock.clone(),
        metrics.clone(),
    );
    Harness {
        processor,
        clock,
        store,
        metrics,
    }
}
