//! # Meshtastic Wire Handling
//!
//! Everything between raw MQTT payload bytes and a decoded, plaintext
//! application message:
//!
//! - [`crypto`] - the channel keyring and AES-CTR packet decryption
//! - [`envelope`] - `ServiceEnvelope` parsing, decryption and skip-list filtering
//! - [`payload`] - one tagged variant per application port
//!
//! This module also holds the node id helpers shared by the decoder, the
//! store and configuration parsing. Meshtastic renders a node's numeric radio
//! id as `!` followed by eight lowercase hex digits (`42` is `!0000002a`).

pub mod crypto;
pub mod envelope;
pub mod payload;

use crate::protobuf::meshtastic_generated as proto;

/// Render a numeric node id in the canonical `!hhhhhhhh` form.
pub fn format_node_id(node_id: u32) -> String {
    format!("!{:08x}", node_id)
}

/// Parse a `!`-prefixed node identifier. Returns `None` unless everything
/// after the marker is hex digits that fit in 32 bits.
pub fn parse_node_id(id: &str) -> Option<u32> {
    id.strip_prefix('!').and_then(parse_hex_u32)
}

/// Parse a gateway identifier: one leading marker character, then hex digits.
///
/// Gateways publish their id as `!hhhhhhhh`; the marker itself is not checked.
pub fn parse_gateway_id(gateway_id: &str) -> Option<u32> {
    let mut chars = gateway_id.chars();
    chars.next()?;
    parse_hex_u32(chars.as_str())
}

fn parse_hex_u32(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Stored name for a hardware model value; unknown values keep their number.
pub fn hardware_model_name(value: i32) -> String {
    match proto::HardwareModel::try_from(value) {
        Ok(model) => model.as_str_name().to_string(),
        Err(_) => format!("unknown({})", value),
    }
}

/// Stored name for a device role value.
pub fn role_name(value: i32) -> String {
    match proto::config::device_config::Role::try_from(value) {
        Ok(role) => role.as_str_name().to_string(),
        Err(_) => "unknown".to_string(),
    }
}

/// Display name for a port number, e.g. `NODEINFO_APP` or `port(300)`.
pub fn port_name(value: i32) -> String {
    match proto::PortNum::try_from(value) {
        Ok(port) => port.as_str_name().to_string(),
        Err(_) => format!("port({})", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_format_as_eight_hex_digits() {
        assert_eq!(format_node_id(42), "!0000002a");
        assert_eq!(format_node_id(0xdeadbeef), "!deadbeef");
    }

    #[test]
    fn gateway_id_parses_hex_after_marker() {
        assert_eq!(parse_gateway_id("!0000002a"), Some(42));
        assert_eq!(parse_gateway_id("!DEADBEEF"), Some(0xdeadbeef));
        assert_eq!(parse_gateway_id(""), None);
        assert_eq!(parse_gateway_id("!"), None);
        assert_eq!(parse_gateway_id("!xyz"), None);
        assert_eq!(parse_gateway_id("!+2a"), None);
        assert_eq!(parse_gateway_id("!1ffffffff"), None);
    }

    #[test]
    fn node_id_requires_bang_marker() {
        assert_eq!(parse_node_id("!0000002a"), Some(42));
        assert_eq!(parse_node_id("0000002a"), None);
        assert_eq!(parse_node_id("!not-hex"), None);
    }

    #[test]
    fn enum_names_fall_back_for_unknown_values() {
        assert_eq!(hardware_model_name(4), "TBEAM");
        assert_eq!(hardware_model_name(9999), "unknown(9999)");
        assert_eq!(role_name(2), "ROUTER");
        assert_eq!(role_name(-3), "unknown");
        assert_eq!(port_name(73), "MAP_REPORT_APP");
        assert_eq!(port_name(300), "port(300)");
    }
}
