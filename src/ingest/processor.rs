use log::{debug, warn};
use sqlx::SqliteConnection;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::report::{EnvelopeReport, Rule, RuleOutcome, SkipReason};
use crate::error::StoreError;
use crate::gate::CoordinationGate;
use crate::logutil::escape_log;
use crate::meshtastic::envelope::Envelope;
use crate::meshtastic::payload::AppPayload;
use crate::meshtastic::{
    format_node_id, hardware_model_name, parse_gateway_id, parse_node_id, role_name,
};
use crate::metrics::IngestMetrics;
use crate::protobuf::meshtastic_generated as proto;
use crate::storage::models::{NewPacket, NewSighting, NewTraceroute, NodeProfile};
use crate::storage::{self, Store};

/// Applies the write rules for one envelope at a time.
///
/// Every call to [`process`](Self::process) runs inside one store transaction
/// while holding the coordination gate. Rule-level problems become
/// [`RuleOutcome::Skipped`] entries; only store failures are returned as
/// errors, and those roll the whole envelope back.
pub struct EnvelopeProcessor<C: Clock = SystemClock> {
    store: Store,
    gate: CoordinationGate,
    clock: C,
    metrics: Arc<IngestMetrics>,
}

impl EnvelopeProcessor<SystemClock> {
    pub fn new(store: Store, gate: CoordinationGate, metrics: Arc<IngestMetrics>) -> Self {
        Self::with_clock(store, gate, SystemClock, metrics)
    }
}

impl<C: Clock> EnvelopeProcessor<C> {
    pub fn with_clock(
        store: Store,
        gate: CoordinationGate,
        clock: C,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            store,
            gate,
            clock,
            metrics,
        }
    }

    pub fn gate(&self) -> &CoordinationGate {
        &self.gate
    }

    pub async fn process(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Result<EnvelopeReport, StoreError> {
        let _gate = self.gate.acquire().await;
        let now_us = self.clock.now_us();
        let mut report = EnvelopeReport::new(envelope.packet_id(), envelope.port_name());

        let payload = AppPayload::decode(&envelope.data);
        let mut tx = self.store.begin().await?;

        match &payload {
            Ok(AppPayload::MapReport(map)) => {
                let outcome = self.apply_map_report(&mut tx, envelope, map, now_us).await?;
                report.push(Rule::MapReport, outcome);
            }
            Ok(AppPayload::NodeInfo(user)) => {
                let outcome = self.apply_identity(&mut tx, envelope, user, now_us).await?;
                report.push(Rule::NodeIdentity, outcome);
            }
            Ok(AppPayload::Position(position)) => {
                let outcome = self
                    .apply_position(&mut tx, envelope, position, now_us)
                    .await?;
                report.push(Rule::Position, outcome);
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(rule) = node_rule_for_port(envelope.portnum()) {
                    report.push(rule, RuleOutcome::Skipped(SkipReason::Decode(e.to_string())));
                }
            }
        }

        if envelope.packet_id() != 0 {
            let outcome = self.apply_packet(&mut tx, envelope, now_us).await?;
            report.push(Rule::Packet, outcome);

            let outcome = self.apply_sighting(&mut tx, topic, envelope, now_us).await?;
            report.push(Rule::Sighting, outcome);

            if envelope.portnum() == proto::PortNum::TracerouteApp as i32 {
                if let Ok(AppPayload::Traceroute(route)) = &payload {
                    debug!(
                        "traceroute {:#010x}: {} hop(s) out, {} back",
                        envelope.packet_id(),
                        route.route.len(),
                        route.route_back.len()
                    );
                }
                let outcome = self.apply_traceroute(&mut tx, envelope, now_us).await?;
                report.push(Rule::Traceroute, outcome);
            }
        }

        tx.commit().await?;
        self.record(&report);
        Ok(report)
    }

    async fn apply_map_report(
        &self,
        conn: &mut SqliteConnection,
        envelope: &Envelope,
        map: &proto::MapReport,
        now_us: i64,
    ) -> Result<RuleOutcome, StoreError> {
        let node_id = envelope.sender();
        let profile = NodeProfile {
            node_id: Some(node_id),
            long_name: map.long_name.clone(),
            short_name: map.short_name.clone(),
            hw_model: hardware_model_name(map.hw_model),
            role: role_name(map.role),
            channel: envelope.channel_id.clone(),
            firmware: Some(map.firmware_version.clone()),
            position: Some((map.latitude_i, map.longitude_i)),
        };

        let existing = match storage::find_node_by_node_id(conn, node_id).await? {
            Some(id) => Some(id),
            None => {
                // A node info message may have created the row without a numeric id.
                let id = format_node_id(node_id);
                storage::node_exists(conn, &id).await?.then_some(id)
            }
        };
        self.upsert_node(conn, existing, &format_node_id(node_id), &profile, now_us)
            .await
    }

    async fn apply_identity(
        &self,
        conn: &mut SqliteConnection,
        envelope: &Envelope,
        user: &proto::User,
        now_us: i64,
    ) -> Result<RuleOutcome, StoreError> {
        if user.id.is_empty() {
            return Ok(RuleOutcome::Skipped(SkipReason::EmptyUserId));
        }
        let profile = NodeProfile {
            node_id: parse_node_id(&user.id),
            long_name: user.long_name.clone(),
            short_name: user.short_name.clone(),
            hw_model: hardware_model_name(user.hw_model),
            role: role_name(user.role),
            channel: envelope.channel_id.clone(),
            firmware: None,
            position: None,
        };
        if profile.node_id.is_none() {
            debug!(
                "node info {} has no numeric id; storing by text id only",
                escape_log(&user.id)
            );
        }
        // Hex case is not significant in node ids; key rows by the canonical form.
        let row_id = profile.node_id.map(format_node_id).unwrap_or_else(|| user.id.clone());
        let existing = match profile.node_id {
            Some(node_id) => storage::find_node_by_node_id(conn, node_id).await?,
            None => None,
        };
        let existing = match existing {
            Some(id) => Some(id),
            None => storage::node_exists(conn, &row_id).await?.then(|| row_id.clone()),
        };
        self.upsert_node(conn, existing, &row_id, &profile, now_us)
            .await
    }

    async fn upsert_node(
        &self,
        conn: &mut SqliteConnection,
        existing: Option<String>,
        new_id: &str,
        profile: &NodeProfile,
        now_us: i64,
    ) -> Result<RuleOutcome, StoreError> {
        match existing {
            Some(id) => {
                storage::update_node_profile(conn, &id, profile, now_us).await?;
                self.metrics.inc_node_updated();
            }
            None => {
                storage::insert_node(conn, new_id, profile, now_us).await?;
                self.metrics.inc_node_created();
                debug!(
                    "new node {} ({})",
                    new_id,
                    escape_log(&profile.long_name)
                );
            }
        }
        Ok(RuleOutcome::Applied)
    }

    async fn apply_position(
        &self,
        conn: &mut SqliteConnection,
        envelope: &Envelope,
        position: &proto::Position,
        now_us: i64,
    ) -> Result<RuleOutcome, StoreError> {
        let (lat, long) = match (position.latitude_i, position.longitude_i) {
            (Some(lat), Some(long)) if lat != 0 && long != 0 => (lat, long),
            _ => return Ok(RuleOutcome::Skipped(SkipReason::NoFix)),
        };
        let sender = envelope.sender();
        let Some(id) = storage::find_node_by_node_id(conn, sender).await? else {
            return Ok(RuleOutcome::Skipped(SkipReason::UnknownNode(sender)));
        };
        storage::update_node_position(conn, &id, lat, long, now_us).await?;
        self.metrics.inc_node_updated();
        Ok(RuleOutcome::Applied)
    }

    async fn apply_packet(
        &self,
        conn: &mut SqliteConnection,
        envelope: &Envelope,
        now_us: i64,
    ) -> Result<RuleOutcome, StoreError> {
        let packet = NewPacket {
            id: envelope.packet_id(),
            portnum: envelope.portnum(),
            from_node_id: envelope.sender(),
            to_node_id: envelope.packet.to,
            payload: envelope.serialized_packet(),
            channel: envelope.channel_id.clone(),
            import_time_us: now_us,
        };
        if storage::insert_packet(conn, &packet).await? {
            self.metrics.inc_packet_inserted();
            Ok(RuleOutcome::Applied)
        } else {
            self.metrics.inc_packet_duplicate();
            Ok(RuleOutcome::Duplicate)
        }
    }

    async fn apply_sighting(
        &self,
        conn: &mut SqliteConnection,
        topic: &str,
        envelope: &Envelope,
        now_us: i64,
    ) -> Result<RuleOutcome, StoreError> {
        let Some(gateway_id) = envelope.gateway_id.as_deref() else {
            return Ok(RuleOutcome::Skipped(SkipReason::MissingGateway));
        };
        let Some(gateway) = parse_gateway_id(gateway_id) else {
            return Ok(RuleOutcome::Skipped(SkipReason::InvalidGateway(
                escape_log(gateway_id),
            )));
        };
        let packet = &envelope.packet;
        let seen = NewSighting {
            packet_id: packet.id,
            node_id: gateway,
            rx_time: packet.rx_time,
            hop_limit: packet.hop_limit,
            hop_start: packet.hop_start,
            channel: envelope.channel_id.clone(),
            rx_snr: packet.rx_snr,
            rx_rssi: packet.rx_rssi,
            topic: topic.to_string(),
            relay_node: (packet.relay_node != 0).then_some(packet.relay_node),
            import_time_us: now_us,
        };
        if storage::insert_sighting(conn, &seen).await? {
            self.metrics.inc_sighting_inserted();
            Ok(RuleOutcome::Applied)
        } else {
            self.metrics.inc_sighting_duplicate();
            Ok(RuleOutcome::Duplicate)
        }
    }

    async fn apply_traceroute(
        &self,
        conn: &mut SqliteConnection,
        envelope: &Envelope,
        now_us: i64,
    ) -> Result<RuleOutcome, StoreError> {
        let route = NewTraceroute {
            packet_id: envelope.packet_id(),
            gateway_node_id: envelope.gateway_node_id(),
            done: !envelope.data.want_response,
            route: envelope.data.payload.to_vec(),
            import_time_us: now_us,
        };
        storage::insert_traceroute(conn, &route).await?;
        self.metrics.inc_traceroute_inserted();
        Ok(RuleOutcome::Applied)
    }

    fn record(&self, report: &EnvelopeReport) {
        for (rule, reason) in report.skipped() {
            self.metrics.inc_rule_skipped();
            if reason.is_anomaly() {
                warn!(
                    "{} packet {:#010x}: {} rule skipped: {}",
                    report.port, report.packet_id, rule, reason
                );
            } else {
                debug!(
                    "{} packet {:#010x}: {} rule skipped: {}",
                    report.port, report.packet_id, rule, reason
                );
            }
        }
    }
}

/// Node rule owning the payload of `portnum`, if any.
fn node_rule_for_port(portnum: i32) -> Option<Rule> {
    match proto::PortNum::try_from(portnum) {
        Ok(proto::PortNum::MapReportApp) => Some(Rule::MapReport),
        Ok(proto::PortNum::NodeinfoApp) => Some(Rule::NodeIdentity),
        Ok(proto::PortNum::PositionApp) => Some(Rule::Position),
        _ => None,
    }
}
