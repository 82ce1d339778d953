//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between section and field)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, OPENAI_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_BRIDGE__MIN_SUBMISSION_MS, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Units:
//! Every tunable carries its unit in the field name (`_ms`, `_secs`, `_hz`).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub performance: PerformanceConfig,
    pub bridge: BridgeConfig,
    pub realtime: RealtimeConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to ("0.0.0.0" when the carrier must reach us)
/// - `port`: TCP port number to listen on
/// - `public_url`: Externally reachable base URL; the call webhook tells the
///   carrier to open `wss://<public_url host>/media-stream`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_url: String,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of simultaneous calls
    pub max_concurrent_sessions: usize,
}

/// Which side speaks first once a call is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreetingPolicy {
    /// Request a greeting response as soon as both legs are ready
    GreetFirst,
    /// Wait for the caller; the first submission carries the greeting
    ListenFirst,
}

/// How turns are detected on the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetection {
    /// The bridge commits input and requests each response itself
    Manual,
    /// The speech service detects end of speech and responds on its own
    ServerVad,
}

/// Media bridge tunables (per call).
///
/// ## Fields:
/// - `frame_ms`: Telephony frame duration (20 ms = 160 samples at 8 kHz)
/// - `min_submission_ms`: Minimum audio per submission (200-400 ms works well)
/// - `max_buffered_ms`: Cap for caller audio held while a response plays
/// - `ingest_delay_ms`: Wait between append and commit
/// - `keepalive_interval_secs`: Ping interval on both sockets
/// - `response_timeout_secs`: Force the turn back to idle after this long (0 = never)
/// - `play_test_tone`: Play a tone on stream start to verify the outbound path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub frame_ms: u32,
    pub min_submission_ms: u32,
    pub max_buffered_ms: u32,
    pub ingest_delay_ms: u64,
    pub keepalive_interval_secs: u64,
    pub response_timeout_secs: u64,
    pub greeting_policy: GreetingPolicy,
    pub play_test_tone: bool,
    pub test_tone_hz: f32,
    pub test_tone_ms: u32,
}

/// Speech service connection settings.
///
/// `api_key` is never serialized back out through the config endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    pub voice: String,
    pub instructions: String,
    pub greeting_instructions: String,
    /// Linear PCM rate used on the speech leg: 16000 or 8000
    pub sample_rate: u32,
    pub turn_detection: TurnDetection,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("voice", &self.voice)
            .field("sample_rate", &self.sample_rate)
            .field("turn_detection", &self.turn_detection)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                public_url: "http://localhost:8080".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
            bridge: BridgeConfig {
                frame_ms: 20,
                min_submission_ms: 200,      // 3200 samples at 16kHz
                max_buffered_ms: 5000,
                ingest_delay_ms: 50,
                keepalive_interval_secs: 20,
                response_timeout_secs: 0,    // watchdog disabled
                greeting_policy: GreetingPolicy::GreetFirst,
                play_test_tone: false,
                test_tone_hz: 440.0,
                test_tone_ms: 2000,
            },
            realtime: RealtimeConfig {
                url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string(),
                api_key: String::new(),
                voice: "alloy".to_string(),
                instructions: "You are a helpful voice assistant on a phone call. Keep answers short."
                    .to_string(),
                greeting_instructions: "Greet the caller briefly and ask how you can help."
                    .to_string(),
                sample_rate: 16000,
                turn_detection: TurnDetection::Manual,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_BRIDGE__GREETING_POLICY=listen_first`: Wait for the caller
    /// - `APP_REALTIME__VOICE=verse`: Change the response voice
    /// - `OPENAI_API_KEY=sk-...`: Speech service credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").prefix_separator("_").separator("__"));

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("realtime.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Per-call values are validated again when a session is built, see
    /// `SessionConfig::from_app_config`.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.bridge.frame_ms == 0 || 8000 * self.bridge.frame_ms % 1000 != 0 {
            return Err(anyhow::anyhow!(
                "frame_ms must be a positive whole number of 8kHz samples, got {}",
                self.bridge.frame_ms
            ));
        }

        if self.bridge.min_submission_ms < self.bridge.frame_ms {
            return Err(anyhow::anyhow!(
                "min_submission_ms ({}) must be at least one frame ({} ms)",
                self.bridge.min_submission_ms,
                self.bridge.frame_ms
            ));
        }

        if self.bridge.max_buffered_ms != 0 && self.bridge.max_buffered_ms < self.bridge.min_submission_ms {
            return Err(anyhow::anyhow!(
                "max_buffered_ms ({}) must be 0 (unbounded) or at least min_submission_ms ({})",
                self.bridge.max_buffered_ms,
                self.bridge.min_submission_ms
            ));
        }

        if self.bridge.keepalive_interval_secs == 0 {
            return Err(anyhow::anyhow!("keepalive_interval_secs must be greater than 0"));
        }

        if self.bridge.play_test_tone && !(self.bridge.test_tone_hz > 0.0 && self.bridge.test_tone_hz < 4000.0) {
            return Err(anyhow::anyhow!(
                "test_tone_hz must be between 0 and 4000 Hz, got {}",
                self.bridge.test_tone_hz
            ));
        }

        if self.realtime.sample_rate != 8000 && self.realtime.sample_rate != 16000 {
            return Err(anyhow::anyhow!(
                "realtime.sample_rate must be 8000 or 16000, got {}",
                self.realtime.sample_rate
            ));
        }

        let realtime_url = url::Url::parse(&self.realtime.url)
            .map_err(|e| anyhow::anyhow!("realtime.url '{}' is not a valid URL: {}", self.realtime.url, e))?;
        if !matches!(realtime_url.scheme(), "ws" | "wss") {
            return Err(anyhow::anyhow!("realtime.url must be a ws:// or wss:// URL"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Only the fields present in the JSON are changed, so
    /// `{"bridge": {"min_submission_ms": 300}}` changes just the threshold.
    /// Changes apply to calls that start afterwards.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(perf) = partial.get("performance") {
            if let Some(max) = perf.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = max as usize;
            }
        }

        if let Some(bridge) = partial.get("bridge") {
            let b = &mut self.bridge;
            if let Some(v) = bridge.get("min_submission_ms").and_then(|v| v.as_u64()) {
                b.min_submission_ms = v as u32;
            }
            if let Some(v) = bridge.get("max_buffered_ms").and_then(|v| v.as_u64()) {
                b.max_buffered_ms = v as u32;
            }
            if let Some(v) = bridge.get("ingest_delay_ms").and_then(|v| v.as_u64()) {
                b.ingest_delay_ms = v;
            }
            if let Some(v) = bridge.get("keepalive_interval_secs").and_then(|v| v.as_u64()) {
                b.keepalive_interval_secs = v;
            }
            if let Some(v) = bridge.get("response_timeout_secs").and_then(|v| v.as_u64()) {
                b.response_timeout_secs = v;
            }
            if let Some(v) = bridge.get("play_test_tone").and_then(|v| v.as_bool()) {
                b.play_test_tone = v;
            }
            if let Some(v) = bridge.get("greeting_policy") {
                b.greeting_policy = serde_json::from_value(v.clone())?;
            }
        }

        if let Some(realtime) = partial.get("realtime") {
            let r = &mut self.realtime;
            if let Some(v) = realtime.get("voice").and_then(|v| v.as_str()) {
                r.voice = v.to_string();
            }
            if let Some(v) = realtime.get("instructions").and_then(|v| v.as_str()) {
                r.instructions = v.to_string();
            }
            if let Some(v) = realtime.get("greeting_instructions").and_then(|v| v.as_str()) {
                r.greeting_instructions = v.to_string();
            }
            if let Some(v) = realtime.get("turn_detection") {
                r.turn_detection = serde_json::from_value(v.clone())?;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.bridge.frame_ms, 20);
        assert_eq!(config.realtime.sample_rate, 16000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.realtime.sample_rate = 24000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.bridge.min_submission_ms = 10;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.bridge.frame_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_realtime_url_validation() {
        let mut config = AppConfig::default();
        config.realtime.url = "WSS://api.example.com/v1/realtime?model=gpt-realtime".to_string();
        assert!(config.validate().is_ok());

        config.realtime.url = "https://api.example.com/v1/realtime".to_string();
        assert!(config.validate().is_err());

        config.realtime.url = "wss//api.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"bridge": {"min_submission_ms": 300, "greeting_policy": "listen_first"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.bridge.min_submission_ms, 300);
        assert_eq!(config.bridge.greeting_policy, GreetingPolicy::ListenFirst);
        assert_eq!(config.bridge.frame_ms, 20);
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"realtime": {"turn_detection": "psychic"}}"#).is_err());
        assert!(config.update_from_json(r#"{"bridge": {"min_submission_ms": 0}}"#).is_err());
    }

    #[test]
    fn test_api_key_is_redacted() {
        let mut config = AppConfig::default();
        config.realtime.api_key = "sk-secret".to_string();
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
