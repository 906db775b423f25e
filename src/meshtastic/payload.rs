//! Application payload decoding, one variant per port.
//!
//! `Data.payload` is an opaque byte string whose schema depends on
//! `Data.portnum`. [`AppPayload::decode`] picks the schema; ports without a
//! dedicated decoder are kept as [`AppPayload::Opaque`], and port numbers that
//! are not in the known enum at all become [`AppPayload::Unrecognized`].

use bytes::Bytes;
use prost::Message;
use thiserror::Error;

use crate::protobuf::meshtastic_generated as proto;

#[derive(Debug, Clone, PartialEq)]
pub enum AppPayload {
    MapReport(proto::MapReport),
    NodeInfo(proto::User),
    Position(proto::Position),
    Traceroute(proto::RouteDiscovery),
    Text(String),
    /// Known port without a dedicated decoder (telemetry, routing, ...).
    Opaque { port: proto::PortNum, payload: Bytes },
    /// Port number outside the known enum.
    Unrecognized { portnum: i32, payload: Bytes },
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("{port} payload failed to decode: {source}")]
    Decode {
        port: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("text payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn decode_as<M: Message + Default>(
    port: proto::PortNum,
    payload: &Bytes,
) -> Result<M, PayloadError> {
    M::decode(payload.clone()).map_err(|source| PayloadError::Decode {
        port: port.as_str_name(),
        source,
    })
}

impl AppPayload {
    /// Decode `data.payload` according to `data.portnum`.
    pub fn decode(data: &proto::Data) -> Result<Self, PayloadError> {
        use proto::PortNum;

        let Ok(port) = PortNum::try_from(data.portnum) else {
            return Ok(AppPayload::Unrecognized {
                portnum: data.portnum,
                payload: data.payload.clone(),
            });
        };
        let payload = &data.payload;
        Ok(match port {
            PortNum::MapReportApp => AppPayload::MapReport(decode_as(port, payload)?),
            PortNum::NodeinfoApp => AppPayload::NodeInfo(decode_as(port, payload)?),
            PortNum::PositionApp => AppPayload::Position(decode_as(port, payload)?),
            PortNum::TracerouteApp => AppPayload::Traceroute(decode_as(port, payload)?),
            PortNum::TextMessageApp => AppPayload::Text(String::from_utf8(payload.to_vec())?),
            other => AppPayload::Opaque {
                port: other,
                payload: payload.clone(),
            },
        })
    }
}
