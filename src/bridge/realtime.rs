//! # Realtime Speech Service Client
//!
//! Wire types and the websocket connection for the conversational speech
//! service.
//!
//! ## Outbound (bridge → service):
//! - `session.update`: audio formats, voice, instructions, turn detection
//! - `input_audio_buffer.append`: base64 PCM16LE caller audio
//! - `input_audio_buffer.commit`: no more audio for this turn
//! - `response.create`: ask for a response (optionally with instructions)
//!
//! ## Inbound (service → bridge):
//! - `response.created` / `response.done` (alias `response.completed`)
//! - `error` (alias `response.error`)
//! - `response.audio.delta` with the audio in `delta` (alias `audio`)
//! - `input_audio_buffer.speech_started` (server VAD barge-in)
//!
//! ## Task Layout:
//! A connection owns two tasks. The reader parses frames and forwards them
//! into the session's event queue; the writer drains the session's outbound
//! channel. Dropping the [`RealtimeConnection`] aborts both.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::bridge::session::{SessionEvent, SocketFrame, SocketSink};
use crate::config::{RealtimeConfig, TurnDetection};
use crate::error::BridgeError;

const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

/// Messages the bridge sends to the speech service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
}

impl ClientEvent {
    /// Build the session configuration message.
    pub fn session_update(config: &RealtimeConfig) -> Self {
        let turn_detection = match config.turn_detection {
            TurnDetection::Manual => Value::Null,
            TurnDetection::ServerVad => json!({ "type": "server_vad" }),
        };

        ClientEvent::SessionUpdate {
            session: json!({
                "modalities": ["audio", "text"],
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "voice": config.voice,
                "instructions": config.instructions,
                "turn_detection": turn_detection,
            }),
        }
    }

    /// Encode linear samples as an append message.
    pub fn append(samples: &[i16]) -> Self {
        ClientEvent::InputAudioAppend {
            audio: STANDARD.encode(samples_to_pcm(samples)),
        }
    }

    /// Request a response, with optional per-response instructions.
    pub fn response_create(instructions: Option<&str>) -> Self {
        ClientEvent::ResponseCreate {
            response: instructions.map(|text| {
                json!({
                    "modalities": ["audio", "text"],
                    "instructions": text,
                })
            }),
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is built from strings and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Error detail attached to `error` events.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Messages the speech service sends to the bridge.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.done", alias = "response.completed")]
    ResponseDone,

    #[serde(rename = "error", alias = "response.error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        #[serde(alias = "audio")]
        delta: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(other)]
    Other,
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Serialize samples as 16-bit little-endian PCM.
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

/// Parse 16-bit little-endian PCM. A trailing odd byte is ignored.
pub fn pcm_to_samples(bytes: &[u8]) -> Vec<i16> {
    let even = bytes.len() & !1;
    let mut samples = vec![0i16; even / 2];
    LittleEndian::read_i16_into(&bytes[..even], &mut samples);
    samples
}

/// Decode the base64 audio of a delta event into samples.
pub fn decode_audio(audio: &str) -> Result<Vec<i16>, BridgeError> {
    let bytes = STANDARD.decode(audio)?;
    if bytes.len() % 2 != 0 {
        warn!("Audio delta has odd byte length {}, dropping last byte", bytes.len());
    }
    Ok(pcm_to_samples(&bytes))
}

/// A live connection to the speech service.
pub struct RealtimeConnection {
    sink: SocketSink,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RealtimeConnection {
    /// Connect and start the reader/writer tasks.
    ///
    /// ## Parameters:
    /// - **config**: URL, credentials
    /// - **events**: The session's event queue; parsed server events and the
    ///   final `RealtimeClosed` are delivered here
    pub async fn connect(
        config: &RealtimeConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, BridgeError> {
        let mut request = config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| BridgeError::Config(format!("invalid api key header: {}", e)))?;
        headers.insert("Authorization", auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        info!("Connected to speech service at {}", config.url);

        let (mut write, mut read) = stream.split();
        let (sink, mut outbound) = mpsc::unbounded_channel::<SocketFrame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let result = match frame {
                    SocketFrame::Text(text) => write.send(Message::Text(text)).await,
                    SocketFrame::Ping => write.send(Message::Ping(Vec::new())).await,
                    SocketFrame::Close => {
                        let _ = write.close().await;
                        break;
                    }
                };
                if let Err(e) = result {
                    warn!("Speech service send failed: {}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match ServerEvent::parse(&text) {
                        Ok(event) => {
                            if events.send(SessionEvent::Realtime(event)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Discarding speech service message: {}", e);
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        info!("Speech service closed connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Speech service websocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Speech service reader finished");
            let _ = events.send(SessionEvent::RealtimeClosed);
        });

        Ok(Self { sink, reader, writer })
    }

    /// Sender half used by the session to write to the service.
    pub fn sink(&self) -> SocketSink {
        self.sink.clone()
    }

    /// Give the writer a moment to flush a pending close frame, then drop
    /// both tasks.
    pub async fn close(mut self) {
        let _ = self.sink.send(SocketFrame::Close);
        if tokio::time::timeout(CLOSE_GRACE, &mut self.writer).await.is_err() {
            debug!("Speech service writer did not finish within {:?}", CLOSE_GRACE);
        }
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_client_event_shapes() {
        let commit: Value = serde_json::from_str(&ClientEvent::InputAudioCommit.to_json()).unwrap();
        assert_eq!(commit, json!({ "type": "input_audio_buffer.commit" }));

        let plain: Value = serde_json::from_str(&ClientEvent::response_create(None).to_json()).unwrap();
        assert_eq!(plain, json!({ "type": "response.create" }));

        let greet: Value =
            serde_json::from_str(&ClientEvent::response_create(Some("Say hi")).to_json()).unwrap();
        assert_eq!(greet["response"]["instructions"], "Say hi");

        let append: Value = serde_json::from_str(&ClientEvent::append(&[1, -2]).to_json()).unwrap();
        assert_eq!(append["type"], "input_audio_buffer.append");
        assert_eq!(decode_audio(append["audio"].as_str().unwrap()).unwrap(), vec![1, -2]);
    }

    #[test]
    fn test_session_update_turn_detection() {
        let mut config = AppConfig::default().realtime;
        let manual: Value = serde_json::from_str(&ClientEvent::session_update(&config).to_json()).unwrap();
        assert_eq!(manual["type"], "session.update");
        assert!(manual["session"]["turn_detection"].is_null());
        assert_eq!(manual["session"]["input_audio_format"], "pcm16");

        config.turn_detection = TurnDetection::ServerVad;
        let vad: Value = serde_json::from_str(&ClientEvent::session_update(&config).to_json()).unwrap();
        assert_eq!(vad["session"]["turn_detection"]["type"], "server_vad");
    }

    #[test]
    fn test_server_event_parsing() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"response.completed"}"#).unwrap(),
            ServerEvent::ResponseDone
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"response.done","response":{"id":"r1"}}"#).unwrap(),
            ServerEvent::ResponseDone
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"response.audio.delta","audio":"AQA="}"#).unwrap(),
            ServerEvent::AudioDelta { delta: "AQA=".to_string() }
        );
        match ServerEvent::parse(r#"{"type":"error","error":{"message":"boom"}}"#).unwrap() {
            ServerEvent::Error { error } => assert_eq!(error.message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            ServerEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap(),
            ServerEvent::Other
        );
        assert!(ServerEvent::parse(r#"{"type":"response.audio.delta"}"#).is_err());
    }

    #[test]
    fn test_pcm_conversion() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = samples_to_pcm(&samples);
        assert_eq!(&bytes[..6], &[0, 0, 1, 0, 0xFF, 0xFF]);
        assert_eq!(pcm_to_samples(&bytes), samples);

        let mut odd = bytes.clone();
        odd.push(7);
        assert_eq!(pcm_to_samples(&odd), samples);
    }
}
