//! Row types for the four ingestion tables.
//!
//! Numeric radio ids are `u32` on the wire and stored as SQLite INTEGER
//! (`i64`). Timestamps ending in `_us` are microseconds since the Unix epoch
//! taken from the ingestion clock; `rx_time` is the relay's own receive time
//! in seconds.

use serde::Serialize;

/// One mesh device.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct NodeRow {
    /// Textual id, `!hhhhhhhh`.
    pub id: String,
    pub node_id: Option<i64>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub hw_model: Option<String>,
    pub firmware: Option<String>,
    pub role: Option<String>,
    /// Latitude in 1e-7 degrees.
    pub last_lat: Option<i64>,
    /// Longitude in 1e-7 degrees.
    pub last_long: Option<i64>,
    pub channel: Option<String>,
    pub first_seen_us: Option<i64>,
    pub last_seen_us: Option<i64>,
}

/// One application-layer packet. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PacketRow {
    pub id: i64,
    pub portnum: i64,
    pub from_node_id: i64,
    pub to_node_id: i64,
    /// Serialized MeshPacket with its decoded payload.
    pub payload: Vec<u8>,
    pub import_time_us: i64,
    pub channel: String,
}

/// One sighting of a packet by one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PacketSeenRow {
    pub packet_id: i64,
    /// Gateway that reported the packet.
    pub node_id: i64,
    pub rx_time: i64,
    pub hop_limit: i64,
    pub hop_start: i64,
    pub channel: String,
    pub rx_snr: f64,
    pub rx_rssi: i64,
    pub topic: String,
    pub import_time_us: i64,
    /// Last byte of the relaying node id, when the firmware reports it.
    pub relay_node: Option<i64>,
}

/// One route-discovery report.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TracerouteRow {
    pub id: i64,
    pub packet_id: i64,
    pub gateway_node_id: Option<i64>,
    pub done: bool,
    pub route: Vec<u8>,
    pub import_time_us: i64,
}

/// Identity/profile fields written by map reports and node info messages.
/// `None` leaves the stored value untouched on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeProfile {
    pub node_id: Option<u32>,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: String,
    pub role: String,
    pub channel: String,
    pub firmware: Option<String>,
    /// (latitude_i, longitude_i)
    pub position: Option<(i32, i32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPacket {
    pub id: u32,
    pub portnum: i32,
    pub from_node_id: u32,
    pub to_node_id: u32,
    pub payload: Vec<u8>,
    pub channel: String,
    pub import_time_us: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSighting {
    pub packet_id: u32,
    pub node_id: u32,
    pub rx_time: u32,
    pub hop_limit: u32,
    pub hop_start: u32,
    pub channel: String,
    pub rx_snr: f32,
    pub rx_rssi: i32,
    pub topic: String,
    pub relay_node: Option<u32>,
    pub import_time_us: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTraceroute {
    pub packet_id: u32,
    pub gateway_node_id: Option<u32>,
    pub done: bool,
    pub route: Vec<u8>,
    pub import_time_us: i64,
}

/// Row counts per table, as printed by `meshingest status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub nodes: i64,
    pub packets: i64,
    pub packet_seen: i64,
    pub traceroutes: i64,
}
