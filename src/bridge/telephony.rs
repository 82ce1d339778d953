//! # Telephony Media Stream Protocol
//!
//! JSON messages exchanged with the carrier over the media websocket.
//!
//! ## Inbound (carrier → bridge):
//! - `{"event": "start", "streamId": "...", "callId": "..."}`
//! - `{"event": "media", "payload": "<base64 µ-law>"}`
//! - `{"event": "stop"}`
//!
//! Twilio-style variants are accepted too: `streamSid`/`callSid`, the ids
//! nested under `"start"`, and the payload nested under `"media"`. Any other
//! event (`connected`, `mark`, `dtmf`, ...) parses as [`TelephonyEvent::Other`].
//!
//! ## Outbound (bridge → carrier):
//! - `{"event": "media", "streamId": "...", "media": {"payload": "<base64>"}}`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Stream identifiers, either at the top level or nested under `start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartInfo {
    #[serde(rename = "streamId", alias = "streamSid")]
    pub stream_id: Option<String>,
    #[serde(rename = "callId", alias = "callSid")]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub payload: String,
}

/// Raw inbound message as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum WireEvent {
    Start {
        #[serde(flatten)]
        top: StartInfo,
        #[serde(default)]
        start: Option<StartInfo>,
    },
    Media {
        #[serde(default)]
        payload: Option<String>,
        #[serde(default)]
        media: Option<MediaInfo>,
    },
    Stop,
    #[serde(other)]
    Other,
}

/// A parsed telephony event.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyEvent {
    /// The stream is live and addressable
    Start {
        stream_id: String,
        call_id: Option<String>,
    },
    /// One frame of base64 µ-law audio (still encoded)
    Media { payload: String },
    /// The carrier ended the stream
    Stop,
    /// Anything the bridge does not act on
    Other,
}

impl TelephonyEvent {
    /// Parse one text frame from the carrier.
    ///
    /// ## Errors:
    /// `BridgeError::Protocol` for invalid JSON, a `start` without a stream id,
    /// or a `media` without a payload.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let wire: WireEvent = serde_json::from_str(text)?;

        Ok(match wire {
            WireEvent::Start { top, start } => {
                let nested = start.unwrap_or_default();
                let stream_id = top
                    .stream_id
                    .or(nested.stream_id)
                    .ok_or_else(|| BridgeError::Protocol("start event without stream id".to_string()))?;
                TelephonyEvent::Start {
                    stream_id,
                    call_id: top.call_id.or(nested.call_id),
                }
            }
            WireEvent::Media { payload, media } => {
                let payload = payload
                    .or(media.map(|m| m.payload))
                    .ok_or_else(|| BridgeError::Protocol("media event without payload".to_string()))?;
                TelephonyEvent::Media { payload }
            }
            WireEvent::Stop => TelephonyEvent::Stop,
            WireEvent::Other => TelephonyEvent::Other,
        })
    }
}

/// Decode a base64 media payload into µ-law bytes.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, BridgeError> {
    Ok(STANDARD.decode(payload)?)
}

#[derive(Debug, Serialize)]
struct OutboundMedia {
    payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundMessage<'a> {
    event: &'static str,
    stream_id: &'a str,
    media: OutboundMedia,
}

/// Serialize one µ-law frame as an outbound media message.
pub fn media_message(stream_id: &str, frame: &[u8]) -> String {
    let message = OutboundMessage {
        event: "media",
        stream_id,
        media: OutboundMedia {
            payload: STANDARD.encode(frame),
        },
    };

    // A struct of strings always serializes.
    serde_json::to_string(&message).unwrap_or_default()
}
