//! Live event decoding and transport adapters.
//!
//! The push channel delivers `ssh_event` messages shaped
//! `{ip, status, geo?, timestamp?}`, sometimes JSON-encoded a second time as
//! a text frame. Decoding never panics; anything unusable becomes a
//! [`MalformedEvent`] that the caller counts and drops.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::incident::timestamp::parse_timestamp;
use crate::incident::{EventType, GeoLocation};

/// Longest accepted line on a line-delimited feed.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum MalformedEvent {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is not an object")]
    NotAnObject,
    #[error("event has no source ip")]
    MissingIp,
}

/// A decoded live event.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub ip: String,
    pub status: EventType,
    pub geo: Option<GeoLocation>,
    pub timestamp: DateTime<Utc>,
}

impl LiveEvent {
    /// Decode a payload as delivered by the transport.
    pub fn decode(payload: &serde_json::Value) -> Result<Self, MalformedEvent> {
        Self::decode_at(payload, Utc::now())
    }

    /// Decode a text frame.
    pub fn decode_text(text: &str) -> Result<Self, MalformedEvent> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| MalformedEvent::InvalidJson(e.to_string()))?;
        Self::decode(&value)
    }

    /// Decode with an explicit receipt time, used when the event carries no
    /// usable timestamp.
    pub fn decode_at(
        payload: &serde_json::Value,
        received: DateTime<Utc>,
    ) -> Result<Self, MalformedEvent> {
        let nested;
        let payload = match payload {
            serde_json::Value::String(text) => {
                nested = serde_json::from_str::<serde_json::Value>(text)
                    .map_err(|e| MalformedEvent::InvalidJson(e.to_string()))?;
                &nested
            }
            other => other,
        };
        let fields = payload.as_object().ok_or(MalformedEvent::NotAnObject)?;

        let ip = fields
            .get("ip")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .ok_or(MalformedEvent::MissingIp)?
            .to_string();

        // Only the ip is required. Badly typed optional fields are dropped
        // one by one and the event is still folded.
        let status = match fields.get("status").or_else(|| fields.get("type")) {
            Some(serde_json::Value::String(tag)) => EventType::from(tag.as_str()),
            Some(serde_json::Value::Null) | None => EventType::Other("unknown".to_string()),
            Some(other) => EventType::from(other.to_string().as_str()),
        };

        let geo = match fields.get("geo") {
            Some(serde_json::Value::Null) | None => None,
            Some(value) => GeoLocation::deserialize(value)
                .map_err(|e| debug!(%ip, error = %e, "ignoring undecodable event geo"))
                .ok(),
        };

        let timestamp = match fields.get("timestamp").and_then(serde_json::Value::as_str) {
            Some(text) => parse_timestamp(text).unwrap_or_else(|| {
                debug!(%ip, raw = %text, "unreadable event timestamp, using receipt time");
                received
            }),
            None => received,
        };

        Ok(Self {
            ip,
            status,
            geo,
            timestamp,
        })
    }
}

/// Loopback and RFC 1918 sources are never placed on the map.
pub fn is_private_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

/// Read newline-delimited payloads from `reader` into a channel.
///
/// Blank lines are skipped. The channel closes when the reader reaches EOF
/// or fails.
pub fn spawn_line_feed<R>(reader: R, capacity: usize) -> mpsc::Receiver<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_BYTES, "live feed line too long, skipped");
                }
                Err(LinesCodecError::Io(e)) => {
                    warn!(error = %e, "live feed read failed");
                    break;
                }
            }
        }
        info!("live feed closed");
    });
    rx
}
