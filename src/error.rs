use thiserror::Error;

/// Errors raised while turning a configured channel key into cipher material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The configured value is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// AES-CTR channels use 128 or 256 bit keys only.
    #[error("unsupported key length {0} bytes (expected 16 or 32)")]
    Length(usize),
}

/// Failures reported by the pub/sub transport. All of them are recovered by
/// the subscriber loop with a fixed reconnect delay.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection dropped, refused or violated the protocol.
    #[error("connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// The request queue towards the event loop rejected a subscribe.
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The transport was used before `connect` succeeded, or it has been torn down.
    #[error("transport not connected")]
    NotConnected,

    /// Catch-all for transport implementations that are not MQTT backed.
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the relational store. These are the only failures
/// that stop the ingestion pipeline.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sqlx errors (connection, statement, decode).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The configured connection string does not name a supported engine.
    #[error("unsupported connection string '{0}' (only sqlite:// is supported)")]
    UnsupportedUrl(String),
}
