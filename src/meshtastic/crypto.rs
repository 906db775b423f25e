//! Channel keyring and packet decryption.
//!
//! Meshtastic channel traffic is AES-CTR encrypted with a per-channel
//! symmetric key. The counter block is the packet id followed by the sender
//! id, each as 8 little-endian bytes. Gateways forward the ciphertext
//! untouched, so recovering the payload means trying each configured key in
//! order until one produces a `Data` message that parses.

use aes::{Aes128, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ctr::cipher::{KeyIvInit, StreamCipher};
use log::{info, trace, warn};
use prost::Message;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::MqttConfig;
use crate::error::KeyError;
use crate::protobuf::meshtastic_generated as proto;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// The publicly known key of the default `LongFast` channel, as configured.
pub const DEFAULT_CHANNEL_KEY: &str = "1PG7OiApB1nwvP+rz05pAQ==";

const DEFAULT_CHANNEL_KEY_BYTES: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69, 0x01,
];

/// One symmetric channel key.
#[derive(Clone, PartialEq, Eq)]
pub enum ChannelKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

// Keys never show up in logs or debug output, only their fingerprint.
impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelKey({})", self.fingerprint())
    }
}

/// Counter block for a packet: packet id then sender id, 8 bytes LE each.
pub fn packet_nonce(packet_id: u32, sender: u32) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
    nonce[8..].copy_from_slice(&u64::from(sender).to_le_bytes());
    nonce
}

impl ChannelKey {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, KeyError> {
        match raw.len() {
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(raw);
                Ok(ChannelKey::Aes128(key))
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(raw);
                Ok(ChannelKey::Aes256(key))
            }
            other => Err(KeyError::Length(other)),
        }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let raw = STANDARD.decode(encoded.trim())?;
        Self::from_bytes(&raw)
    }

    /// The default channel key.
    pub fn default_channel() -> Self {
        ChannelKey::Aes128(DEFAULT_CHANNEL_KEY_BYTES)
    }

    fn bytes(&self) -> &[u8] {
        match self {
            ChannelKey::Aes128(k) => k,
            ChannelKey::Aes256(k) => k,
        }
    }

    /// Short, non-reversible identifier for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes());
        digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
    }

    /// XOR the CTR keystream for (packet_id, sender) into `buf`. Encryption
    /// and decryption are the same operation.
    pub fn apply_keystream(&self, packet_id: u32, sender: u32, buf: &mut [u8]) {
        let nonce = packet_nonce(packet_id, sender);
        match self {
            ChannelKey::Aes128(key) => {
                let mut cipher = Aes128Ctr::new(&(*key).into(), &nonce.into());
                cipher.apply_keystream(buf);
            }
            ChannelKey::Aes256(key) => {
                let mut cipher = Aes256Ctr::new(&(*key).into(), &nonce.into());
                cipher.apply_keystream(buf);
            }
        }
    }

    pub fn encrypt(&self, packet_id: u32, sender: u32, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        self.apply_keystream(packet_id, sender, &mut buf);
        buf
    }
}

/// Result of running a packet through the keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decryption {
    /// The packet already carried a decoded payload.
    Plaintext,
    /// Key at `key_index` produced a parseable payload.
    Decrypted { key_index: usize },
    /// No key produced a parseable payload.
    Undecodable,
}

/// Ordered list of candidate channel keys. The first key whose output parses wins.
#[derive(Debug, Clone)]
pub struct Keyring {
    keys: Vec<ChannelKey>,
}

impl Keyring {
    /// A keyring that tries exactly `keys`, in order.
    pub fn new(keys: Vec<ChannelKey>) -> Self {
        Self { keys }
    }

    /// The default channel key followed by `secondary`.
    pub fn with_default(secondary: Vec<ChannelKey>) -> Self {
        let mut keys = Vec::with_capacity(secondary.len() + 1);
        keys.push(ChannelKey::default_channel());
        keys.extend(secondary);
        Self { keys }
    }

    /// Build the keyring from `mqtt.secondary_keys`. Entries that are not
    /// valid base64 AES keys are logged and skipped.
    pub fn from_config(cfg: &MqttConfig) -> Self {
        let mut secondary = Vec::new();
        for (idx, entry) in cfg.secondary_key_entries().iter().enumerate() {
            match ChannelKey::from_base64(entry) {
                Ok(key) => secondary.push(key),
                Err(e) => warn!("Ignoring mqtt.secondary_keys entry #{}: {}", idx + 1, e),
            }
        }
        let ring = Self::with_default(secondary);
        let prints: Vec<String> = ring.keys.iter().map(ChannelKey::fingerprint).collect();
        info!(
            "Keyring loaded: {} key(s) [{}]",
            ring.keys.len(),
            prints.join(", ")
        );
        ring
    }

    pub fn keys(&self) -> &[ChannelKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Try each key in order; return the winning key index and decoded payload.
    pub fn try_decrypt(
        &self,
        packet_id: u32,
        sender: u32,
        ciphertext: &[u8],
    ) -> Option<(usize, proto::Data)> {
        for (idx, key) in self.keys.iter().enumerate() {
            let plain = key.encrypt(packet_id, sender, ciphertext);
            match proto::Data::decode(plain.as_slice()) {
                Ok(data) => return Some((idx, data)),
                Err(e) => trace!(
                    "packet {:08x}: key {} rejected ({})",
                    packet_id,
                    key.fingerprint(),
                    e
                ),
            }
        }
        None
    }

    /// Replace an encrypted payload with its decoded form, in place.
    pub fn decrypt_packet(&self, packet: &mut proto::MeshPacket) -> Decryption {
        use proto::mesh_packet::PayloadVariant;

        let ciphertext = match &packet.payload_variant {
            Some(PayloadVariant::Decoded(_)) => return Decryption::Plaintext,
            Some(PayloadVariant::Encrypted(bytes)) => bytes.clone(),
            // An absent payload parses as an empty `Data`, like empty ciphertext.
            None => bytes::Bytes::new(),
        };
        match self.try_decrypt(packet.id, packet.from, &ciphertext) {
            Some((key_index, data)) => {
                packet.payload_variant = Some(PayloadVariant::Decoded(data));
                Decryption::Decrypted { key_index }
            }
            None => Decryption::Undecodable,
        }
    }
}
