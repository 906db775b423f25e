//! `ServiceEnvelope` decoding.
//!
//! Gateways publish each radio packet wrapped in a `ServiceEnvelope` together
//! with the channel name and the gateway's own node id. Decoding is a filter:
//! malformed bytes, skip-listed senders and packets no configured key can
//! open are all rejected here and never reach the store.

use log::trace;
use prost::Message;
use std::collections::HashSet;
use thiserror::Error;

use super::crypto::{Decryption, Keyring};
use super::{parse_gateway_id, port_name};
use crate::config::MqttConfig;
use crate::protobuf::meshtastic_generated as proto;

/// A structurally valid envelope whose packet carries a plaintext payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The mesh packet, with the decoded payload in place of any ciphertext.
    pub packet: proto::MeshPacket,
    /// The decoded application payload (same value the packet carries).
    pub data: proto::Data,
    pub channel_id: String,
    /// Reporting gateway (`!hhhhhhhh`), if the publisher filled it in.
    pub gateway_id: Option<String>,
    pub decryption: Decryption,
}

impl Envelope {
    pub fn packet_id(&self) -> u32 {
        self.packet.id
    }

    pub fn sender(&self) -> u32 {
        self.packet.from
    }

    pub fn portnum(&self) -> i32 {
        self.data.portnum
    }

    pub fn port_name(&self) -> String {
        port_name(self.data.portnum)
    }

    /// Numeric id of the reporting gateway, when present and well formed.
    pub fn gateway_node_id(&self) -> Option<u32> {
        self.gateway_id.as_deref().and_then(parse_gateway_id)
    }

    /// Wire form of the packet as persisted (decoded payload, no ciphertext).
    pub fn serialized_packet(&self) -> Vec<u8> {
        self.packet.encode_to_vec()
    }
}

/// Why an incoming message did not become an [`Envelope`]. None of these are
/// errors in the operational sense.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("malformed service envelope: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("service envelope carries no packet")]
    MissingPacket,

    #[error("sender !{0:08x} is on the skip list")]
    SkippedNode(u32),

    #[error("packet {packet_id:#010x} from !{from:08x} could not be decrypted")]
    Undecodable { packet_id: u32, from: u32 },
}

/// Decoder configured once at startup with the keyring and skip-list.
#[derive(Debug, Clone)]
pub struct EnvelopeDecoder {
    keyring: Keyring,
    skip_nodes: HashSet<u32>,
}

impl EnvelopeDecoder {
    pub fn new(keyring: Keyring, skip_nodes: HashSet<u32>) -> Self {
        Self {
            keyring,
            skip_nodes,
        }
    }

    pub fn from_config(cfg: &MqttConfig) -> Self {
        Self::new(Keyring::from_config(cfg), cfg.skip_node_ids())
    }

    pub fn skip_nodes(&self) -> &HashSet<u32> {
        &self.skip_nodes
    }

    /// Parse, filter and decrypt one transport message.
    pub fn decode(&self, raw: &[u8]) -> Result<Envelope, Rejection> {
        use proto::mesh_packet::PayloadVariant;

        let envelope = proto::ServiceEnvelope::decode(raw)?;
        let mut packet = envelope.packet.ok_or(Rejection::MissingPacket)?;

        if self.skip_nodes.contains(&packet.from) {
            return Err(Rejection::SkippedNode(packet.from));
        }

        let decryption = self.keyring.decrypt_packet(&mut packet);
        let data = match (&decryption, &packet.payload_variant) {
            (Decryption::Undecodable, _) => None,
            (_, Some(PayloadVariant::Decoded(data))) => Some(data.clone()),
            _ => None,
        };
        let Some(data) = data else {
            return Err(Rejection::Undecodable {
                packet_id: packet.id,
                from: packet.from,
            });
        };
        if let Decryption::Decrypted { key_index } = decryption {
            trace!(
                "packet {:#010x} opened with key #{} ({})",
                packet.id,
                key_index,
                port_name(data.portnum)
            );
        }

        let gateway_id = if envelope.gateway_id.is_empty() {
            None
        } else {
            Some(envelope.gateway_id)
        };

        Ok(Envelope {
            packet,
            data,
            channel_id: envelope.channel_id,
            gateway_id,
            decryption,
        })
    }
}
