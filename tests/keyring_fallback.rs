mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use meshingest::config::{ListSetting, MqttConfig};
use meshingest::meshtastic::crypto::{ChannelKey, Decryption, Keyring};
use meshingest::meshtastic::envelope::{EnvelopeDecoder, Rejection};
use prost::Message;
use std::collections::HashSet;

const SENDER: u32 = 0x1234_5678;

fn secondary_key() -> ChannelKey {
    ChannelKey::Aes256([0x5a; 32])
}

/// A packet id whose ciphertext under the secondary key does not happen to
/// parse under the default key. Almost every id qualifies.
fn packet_id_rejected_by_default_key(plain: &[u8]) -> u32 {
    let default_only = Keyring::new(vec![ChannelKey::default_channel()]);
    (1..500u32)
        .find(|id| {
            let ct = secondary_key().encrypt(*id, SENDER, plain);
            default_only.try_decrypt(*id, SENDER, &ct).is_none()
        })
        .expect("some packet id is rejected by the default key")
}

#[test]
fn second_key_decrypts_when_first_fails() {
    let data = common::text("meet at the ridge at noon");
    let plain = data.encode_to_vec();
    let id = packet_id_rejected_by_default_key(&plain);
    let ciphertext = secondary_key().encrypt(id, SENDER, &plain);

    let ring = Keyring::with_default(vec![secondary_key()]);
    let (index, decoded) = ring
        .try_decrypt(id, SENDER, &ciphertext)
        .expect("second key opens the packet");
    assert_eq!(index, 1);
    assert_eq!(decoded, data);
    assert_eq!(decoded.payload, data.payload);
}

#[test]
fn decoder_reports_key_index_and_identical_payload() {
    let data = common::text("hello from the secondary channel");
    let id = packet_id_rejected_by_default_key(&data.encode_to_vec());
    let packet = common::encrypted(common::packet(id, SENDER, data.clone()), &secondary_key());
    let raw = common::envelope_bytes(packet, Some("!0000002a"));

    let decoder = EnvelopeDecoder::new(
        Keyring::with_default(vec![secondary_key()]),
        HashSet::new(),
    );
    let envelope = decoder.decode(&raw).expect("decodes with second key");
    assert_eq!(envelope.decryption, Decryption::Decrypted { key_index: 1 });
    assert_eq!(envelope.data, data);
    assert!(matches!(
        envelope.packet.payload_variant,
        Some(common::PayloadVariant::Decoded(_))
    ));

    let default_only = common::default_decoder();
    assert!(matches!(
        default_only.decode(&raw),
        Err(Rejection::Undecodable { packet_id, from }) if packet_id == id && from == SENDER
    ));
}

#[test]
fn default_key_opens_default_channel_traffic() {
    let data = common::text("LongFast traffic");
    let packet = common::encrypted(
        common::packet(77, SENDER, data.clone()),
        &ChannelKey::default_channel(),
    );
    let envelope = common::default_decoder()
        .decode(&common::envelope_bytes(packet, None))
        .expect("default key");
    assert_eq!(envelope.decryption, Decryption::Decrypted { key_index: 0 });
    assert_eq!(envelope.data, data);
}

#[test]
fn keyring_from_config_skips_invalid_entries() {
    let good = STANDARD.encode([0x42u8; 16]);
    let mut cfg = MqttConfig {
        server: "localhost".into(),
        port: 1883,
        username: String::new(),
        password: String::new(),
        topics: vec!["msh/#".into()],
        secondary_keys: ListSetting::Text(format!(
            "'{}', not-base64!, {}",
            good,
            STANDARD.encode([1u8; 5])
        )),
        skip_node_ids: ListSetting::default(),
        client_id: None,
        reconnect_delay_ms: 1000,
        keep_alive_secs: 30,
    };
    let ring = Keyring::from_config(&cfg);
    assert_eq!(ring.len(), 2);
    assert_eq!(ring.keys()[0], ChannelKey::default_channel());
    assert_eq!(ring.keys()[1], ChannelKey::Aes128([0x42; 16]));

    cfg.secondary_keys = ListSetting::default();
    assert_eq!(Keyring::from_config(&cfg).len(), 1);
}
