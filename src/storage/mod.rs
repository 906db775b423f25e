//! # Storage Module - Relational Persistence
//!
//! SQLite-backed store for the four ingestion tables, accessed through `sqlx`.
//!
//! ## Tables
//!
//! ```text
//! node         ← one row per device, keyed by textual id "!hhhhhhhh"
//! packet       ← one row per application packet, keyed by the radio packet id
//! packet_seen  ← one row per (packet, gateway, rx_time) sighting
//! traceroute   ← one row per route-discovery report
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshingest::config::DatabaseConfig;
//! use meshingest::storage::Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Store::connect(&DatabaseConfig::default()).await?;
//!     store.create_tables().await?;
//!     let counts = store.table_counts().await?;
//!     println!("{} packets", counts.packets);
//!     Ok(())
//! }
//! ```
//!
//! ## Write primitives
//!
//! The functions at the bottom of this module take a bare connection so the
//! envelope processor can run all of one envelope's writes inside a single
//! transaction (`&mut *tx`). Deduplication is done by the database itself:
//! `packet.id` is the primary key and `packet_seen` has a composite primary
//! key, both written with `ON CONFLICT DO NOTHING`.
//!
//! ## Configuration
//!
//! ```toml
//! [database]
//! connection_string = "sqlite://packets.db"
//! busy_timeout_secs = 900
//! max_connections = 4
//! ```
//!
//! The legacy `sqlite+aiosqlite:///path` form is accepted and rewritten.

pub mod models;

use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use models::{
    NewPacket, NewSighting, NewTraceroute, NodeProfile, NodeRow, PacketRow, PacketSeenRow,
    TableCounts, TracerouteRow,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS node (
        id TEXT PRIMARY KEY NOT NULL,
        node_id INTEGER,
        long_name TEXT,
        short_name TEXT,
        hw_model TEXT,
        firmware TEXT,
        role TEXT,
        last_lat INTEGER,
        last_long INTEGER,
        channel TEXT,
        first_seen_us INTEGER,
        last_seen_us INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_node_node_id ON node(node_id)",
    r#"
    CREATE TABLE IF NOT EXISTS packet (
        id INTEGER PRIMARY KEY NOT NULL,
        portnum INTEGER NOT NULL,
        from_node_id INTEGER NOT NULL,
        to_node_id INTEGER NOT NULL,
        payload BLOB NOT NULL,
        import_time_us INTEGER NOT NULL,
        channel TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_packet_import_time ON packet(import_time_us)",
    "CREATE INDEX IF NOT EXISTS idx_packet_from_node_time ON packet(from_node_id, import_time_us)",
    r#"
    CREATE TABLE IF NOT EXISTS packet_seen (
        packet_id INTEGER NOT NULL,
        node_id INTEGER NOT NULL,
        rx_time INTEGER NOT NULL,
        hop_limit INTEGER NOT NULL,
        hop_start INTEGER NOT NULL,
        channel TEXT NOT NULL,
        rx_snr REAL NOT NULL,
        rx_rssi INTEGER NOT NULL,
        topic TEXT NOT NULL,
        import_time_us INTEGER NOT NULL,
        relay_node INTEGER,
        PRIMARY KEY (packet_id, node_id, rx_time)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_packet_seen_node_id ON packet_seen(node_id)",
    r#"
    CREATE TABLE IF NOT EXISTS traceroute (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        packet_id INTEGER NOT NULL,
        gateway_node_id INTEGER,
        done INTEGER NOT NULL,
        route BLOB NOT NULL,
        import_time_us INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_traceroute_packet_id ON traceroute(packet_id)",
];

const NODE_COLUMNS: &str = "id, node_id, long_name, short_name, hw_model, firmware, role, \
     last_lat, last_long, channel, first_seen_us, last_seen_us";

/// Accept `sqlite:` URLs as-is and rewrite `sqlite+aiosqlite:///path` to
/// `sqlite://path`. Anything else is unsupported.
pub fn normalize_connection_string(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(path) = raw.strip_prefix("sqlite+aiosqlite:///") {
        if path.is_empty() {
            return None;
        }
        return Some(format!("sqlite://{}", path));
    }
    if raw.starts_with("sqlite:") && raw.len() > "sqlite:".len() {
        return Some(raw.to_string());
    }
    None
}

/// Handle to the database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database named by the configuration.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = normalize_connection_string(&cfg.connection_string)
            .ok_or_else(|| StoreError::UnsupportedUrl(cfg.connection_string.clone()))?;
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(cfg.busy_timeout_secs));
        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .connect_with(options)
            .await?;
        debug!("Connected to {}", url);
        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests and dry runs. A single
    /// connection that is never recycled keeps the data alive.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Create all tables and indexes. Safe to call on every start.
    pub async fn create_tables(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn table_counts(&self) -> Result<TableCounts, StoreError> {
        Ok(TableCounts {
            nodes: self.count_rows("node").await?,
            packets: self.count_rows("packet").await?,
            packet_seen: self.count_rows("packet_seen").await?,
            traceroutes: self.count_rows("traceroute").await?,
        })
    }

    async fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn node_by_id(&self, id: &str) -> Result<Option<NodeRow>, StoreError> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {} FROM node WHERE id = ?",
            NODE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn node_by_node_id(&self, node_id: u32) -> Result<Option<NodeRow>, StoreError> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {} FROM node WHERE node_id = ? ORDER BY id LIMIT 1",
            NODE_COLUMNS
        ))
        .bind(i64::from(node_id))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn packet(&self, id: u32) -> Result<Option<PacketRow>, StoreError> {
        let row = sqlx::query_as::<_, PacketRow>(
            "SELECT id, portnum, from_node_id, to_node_id, payload, import_time_us, channel \
             FROM packet WHERE id = ?",
        )
        .bind(i64::from(id))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All sightings of a packet, oldest receive time first.
    pub async fn sightings_for(&self, packet_id: u32) -> Result<Vec<PacketSeenRow>, StoreError> {
        let rows = sqlx::query_as::<_, PacketSeenRow>(
            "SELECT packet_id, node_id, rx_time, hop_limit, hop_start, channel, rx_snr, rx_rssi, \
             topic, import_time_us, relay_node \
             FROM packet_seen WHERE packet_id = ? ORDER BY rx_time, node_id",
        )
        .bind(i64::from(packet_id))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn traceroutes_for(&self, packet_id: u32) -> Result<Vec<TracerouteRow>, StoreError> {
        let rows = sqlx::query_as::<_, TracerouteRow>(
            "SELECT id, packet_id, gateway_node_id, done, route, import_time_us \
             FROM traceroute WHERE packet_id = ? ORDER BY id",
        )
        .bind(i64::from(packet_id))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Textual key of the node whose numeric id is `node_id`, if any.
pub async fn find_node_by_node_id(
    conn: &mut SqliteConnection,
    node_id: u32,
) -> Result<Option<String>, StoreError> {
    let id = sqlx::query_scalar::<_, String>(
        "SELECT id FROM node WHERE node_id = ? ORDER BY id LIMIT 1",
    )
    .bind(i64::from(node_id))
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// Whether a node row with textual key `id` exists.
pub async fn node_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool, StoreError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM node WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(found.is_some())
}

/// Insert a new node row with both seen timestamps set to `now_us`.
pub async fn insert_node(
    conn: &mut SqliteConnection,
    id: &str,
    profile: &NodeProfile,
    now_us: i64,
) -> Result<(), StoreError> {
    let (lat, long) = split_position(profile.position);
    sqlx::query(
        "INSERT INTO node (id, node_id, long_name, short_name, hw_model, firmware, role, \
         last_lat, last_long, channel, first_seen_us, last_seen_us) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(profile.node_id.map(i64::from))
    .bind(&profile.long_name)
    .bind(&profile.short_name)
    .bind(&profile.hw_model)
    .bind(profile.firmware.as_deref())
    .bind(&profile.role)
    .bind(lat)
    .bind(long)
    .bind(&profile.channel)
    .bind(now_us)
    .bind(now_us)
    .execute(conn)
    .await?;
    Ok(())
}

/// Overwrite the profile fields of node `id`. Optional fields that are
/// `None` keep their stored value. `last_seen_us` never moves backwards.
pub async fn update_node_profile(
    conn: &mut SqliteConnection,
    id: &str,
    profile: &NodeProfile,
    now_us: i64,
) -> Result<(), StoreError> {
    let (lat, long) = split_position(profile.position);
    sqlx::query(
        "UPDATE node SET \
         node_id = COALESCE(?, node_id), \
         long_name = ?, short_name = ?, hw_model = ?, role = ?, channel = ?, \
         firmware = COALESCE(?, firmware), \
         last_lat = COALESCE(?, last_lat), \
         last_long = COALESCE(?, last_long), \
         first_seen_us = COALESCE(first_seen_us, ?), \
         last_seen_us = MAX(COALESCE(last_seen_us, 0), ?) \
         WHERE id = ?",
    )
    .bind(profile.node_id.map(i64::from))
    .bind(&profile.long_name)
    .bind(&profile.short_name)
    .bind(&profile.hw_model)
    .bind(&profile.role)
    .bind(&profile.channel)
    .bind(profile.firmware.as_deref())
    .bind(lat)
    .bind(long)
    .bind(now_us)
    .bind(now_us)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Record a position fix on node `id`.
pub async fn update_node_position(
    conn: &mut SqliteConnection,
    id: &str,
    latitude_i: i32,
    longitude_i: i32,
    now_us: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE node SET last_lat = ?, last_long = ?, \
         first_seen_us = COALESCE(first_seen_us, ?), \
         last_seen_us = MAX(COALESCE(last_seen_us, 0), ?) \
         WHERE id = ?",
    )
    .bind(i64::from(latitude_i))
    .bind(i64::from(longitude_i))
    .bind(now_us)
    .bind(now_us)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Insert a packet unless one with the same id exists. Returns whether a row
/// was written.
pub async fn insert_packet(
    conn: &mut SqliteConnection,
    packet: &NewPacket,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "INSERT INTO packet (id, portnum, from_node_id, to_node_id, payload, import_time_us, channel) \
         VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
    )
    .bind(i64::from(packet.id))
    .bind(i64::from(packet.portnum))
    .bind(i64::from(packet.from_node_id))
    .bind(i64::from(packet.to_node_id))
    .bind(packet.payload.as_slice())
    .bind(packet.import_time_us)
    .bind(&packet.channel)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Insert a sighting unless (packet_id, node_id, rx_time) is already present.
pub async fn insert_sighting(
    conn: &mut SqliteConnection,
    seen: &NewSighting,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "INSERT INTO packet_seen (packet_id, node_id, rx_time, hop_limit, hop_start, channel, \
         rx_snr, rx_rssi, topic, import_time_us, relay_node) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(packet_id, node_id, rx_time) DO NOTHING",
    )
    .bind(i64::from(seen.packet_id))
    .bind(i64::from(seen.node_id))
    .bind(i64::from(seen.rx_time))
    .bind(i64::from(seen.hop_limit))
    .bind(i64::from(seen.hop_start))
    .bind(&seen.channel)
    .bind(f64::from(seen.rx_snr))
    .bind(i64::from(seen.rx_rssi))
    .bind(&seen.topic)
    .bind(seen.import_time_us)
    .bind(seen.relay_node.map(i64::from))
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Append a traceroute row and return its id.
pub async fn insert_traceroute(
    conn: &mut SqliteConnection,
    route: &NewTraceroute,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO traceroute (packet_id, gateway_node_id, done, route, import_time_us) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(i64::from(route.packet_id))
    .bind(route.gateway_node_id.map(i64::from))
    .bind(route.done)
    .bind(route.route.as_slice())
    .bind(route.import_time_us)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

fn split_position(position: Option<(i32, i32)>) -> (Option<i64>, Option<i64>) {
    match position {
        Some((lat, long)) => (Some(i64::from(lat)), Some(i64::from(long))),
        None => (None, None),
    }
}
