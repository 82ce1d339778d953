//! # Bridge Session
//!
//! One live call. The session owns both socket sinks and every piece of
//! per-call state, and is driven by a single ordered event queue.
//!
//! ## Event Sources (all feed the same queue):
//! - **Telephony actor**: `start`, `media`, `stop`, socket closed
//! - **Speech service reader task**: lifecycle events, audio deltas, closed
//! - **Outbound pacer**: transmit failures
//!
//! Because one task consumes the queue, inbound media is processed strictly in
//! arrival order and no state is ever mutated concurrently.
//!
//! ## Media Path:
//! ```text
//! telephony media -> base64 -> µ-law decode -> 2x up -> accumulator
//!     -> append / commit / response.create  (gated by the turn coordinator)
//!
//! speech audio delta -> base64 -> PCM16LE -> 2x down -> pacer -> telephony
//! ```
//!
//! ## Teardown:
//! Any socket closing, a telephony `stop`, or a failed send ends the loop.
//! Teardown aborts the pacer, asks both sockets to close, and returns a
//! [`SessionSummary`]. The keepalive and watchdog timers live inside the loop
//! and end with it.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::buffer::{AccumulatorConfig, InboundAccumulator};
use crate::audio::codec;
use crate::audio::pacer::{OutboundPacer, PacerConfig};
use crate::audio::resample::{upsample_2x, Downsampler};
use crate::audio::tone;
use crate::bridge::realtime::{self, ClientEvent, ServerEvent};
use crate::bridge::telephony::{self, TelephonyEvent};
use crate::bridge::turn::{SubmitDecision, TurnCoordinator, TurnState};
use crate::config::{AppConfig, GreetingPolicy, RealtimeConfig, TurnDetection};
use crate::error::BridgeError;

/// Native rate of the telephony leg.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Frame written to either socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    Text(String),
    Ping,
    Close,
}

/// Sending half of a socket. Sending fails once the socket task is gone.
pub type SocketSink = mpsc::UnboundedSender<SocketFrame>;

/// Everything that can happen to a session, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Telephony(TelephonyEvent),
    Realtime(ServerEvent),
    TelephonyClosed,
    RealtimeClosed,
    PacerFailed(BridgeError),
}

/// Per-call tunables, validated once when the session is built.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Linear PCM rate of the speech leg (8000 or 16000 Hz)
    pub speech_sample_rate: u32,
    /// Telephony frame duration in milliseconds
    pub frame_ms: u32,
    /// Samples (at the speech rate) per submission
    pub submission_samples: usize,
    /// Cap on buffered caller audio in milliseconds (None = unbounded)
    pub max_buffered_ms: Option<u32>,
    /// Wait between append and commit
    pub ingest_delay: Duration,
    /// Ping interval on both sockets
    pub keepalive_interval: Duration,
    /// Watchdog for responses that never complete (None = disabled)
    pub response_timeout: Option<Duration>,
    pub greeting_policy: GreetingPolicy,
    /// Frequency (Hz) and duration (ms) of the start-of-stream test tone
    pub test_tone: Option<(f32, u32)>,
    /// Speech service settings, sent in `session.update`
    pub realtime: RealtimeConfig,
}

impl SessionConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, BridgeError> {
        let bridge = &config.bridge;
        let speech_sample_rate = config.realtime.sample_rate;

        if speech_sample_rate != TELEPHONY_SAMPLE_RATE && speech_sample_rate != 2 * TELEPHONY_SAMPLE_RATE {
            return Err(BridgeError::Config(format!(
                "unsupported speech sample rate {}",
                speech_sample_rate
            )));
        }

        if bridge.frame_ms == 0 || TELEPHONY_SAMPLE_RATE * bridge.frame_ms % 1000 != 0 {
            return Err(BridgeError::Config(format!("invalid frame_ms {}", bridge.frame_ms)));
        }

        let submission_samples = (speech_sample_rate as usize * bridge.min_submission_ms as usize) / 1000;
        if submission_samples == 0 {
            return Err(BridgeError::Config("min_submission_ms must be greater than 0".to_string()));
        }

        if bridge.keepalive_interval_secs == 0 {
            return Err(BridgeError::Config("keepalive_interval_secs must be greater than 0".to_string()));
        }

        Ok(Self {
            speech_sample_rate,
            frame_ms: bridge.frame_ms,
            submission_samples,
            max_buffered_ms: (bridge.max_buffered_ms > 0).then_some(bridge.max_buffered_ms),
            ingest_delay: Duration::from_millis(bridge.ingest_delay_ms),
            keepalive_interval: Duration::from_secs(bridge.keepalive_interval_secs),
            response_timeout: (bridge.response_timeout_secs > 0)
                .then(|| Duration::from_secs(bridge.response_timeout_secs)),
            greeting_policy: bridge.greeting_policy,
            test_tone: bridge
                .play_test_tone
                .then_some((bridge.test_tone_hz, bridge.test_tone_ms)),
            realtime: config.realtime.clone(),
        })
    }

    fn resampling(&self) -> bool {
        self.speech_sample_rate != TELEPHONY_SAMPLE_RATE
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub session_id: String,
    pub stream_id: Option<String>,
    pub call_id: Option<String>,
    pub close_reason: String,
    pub duration_ms: u64,
    pub media_frames_in: u64,
    pub frames_out: u64,
    pub submissions: u64,
    /// Responses during which ready caller audio had to wait
    pub suppressed_submissions: u64,
    pub audio_deltas_dropped: u64,
    pub dropped_samples: u64,
    pub first_response_sent: bool,
}

/// Whether the event loop keeps going.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    Close(String),
}

enum Wake {
    Event(Option<SessionEvent>),
    Keepalive,
    Watchdog,
}

/// The owning object of one bridged call.
pub struct BridgeSession {
    id: String,
    config: SessionConfig,
    telephony: SocketSink,
    realtime: SocketSink,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    reports: mpsc::UnboundedSender<SessionEvent>,
    stream_id: Option<String>,
    holding_back: bool,
    accumulator: InboundAccumulator,
    downsampler: Downsampler,
    turn: TurnCoordinator,
    pacer: Option<OutboundPacer>,
    summary: SessionSummary,
    started_at: Instant,
}

impl BridgeSession {
    /// Create a session.
    ///
    /// ## Parameters:
    /// - **telephony / realtime**: Socket sinks for both legs
    /// - **reports / events**: Both halves of the session's event queue; the
    ///   sender is handed to the pacer so it can report failures
    pub fn new(
        config: SessionConfig,
        telephony: SocketSink,
        realtime: SocketSink,
        reports: mpsc::UnboundedSender<SessionEvent>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        let accumulator = InboundAccumulator::new(AccumulatorConfig {
            sample_rate: config.speech_sample_rate,
            max_buffered_ms: config.max_buffered_ms,
        });
        let id = Uuid::new_v4().to_string();

        Self {
            summary: SessionSummary {
                session_id: id.clone(),
                ..SessionSummary::default()
            },
            id,
            turn: TurnCoordinator::new(config.greeting_policy),
            config,
            telephony,
            realtime,
            events,
            reports,
            stream_id: None,
            holding_back: false,
            accumulator,
            downsampler: Downsampler::new(),
            pacer: None,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn.state()
    }

    /// Drive the session until either leg goes away.
    pub async fn run(mut self) -> SessionSummary {
        if let Err(e) = self.open() {
            return self.teardown(format!("failed to configure speech session: {}", e));
        }

        let period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            let watchdog = self.turn.watchdog_deadline(self.config.response_timeout);
            let far_future = Instant::now() + Duration::from_secs(86_400);

            let wake = tokio::select! {
                biased;
                event = self.events.recv() => Wake::Event(event),
                _ = keepalive.tick() => Wake::Keepalive,
                _ = sleep_until(watchdog.unwrap_or(far_future)), if watchdog.is_some() => Wake::Watchdog,
            };

            let flow = match wake {
                Wake::Event(Some(event)) => self.handle_event(event).await,
                Wake::Event(None) => Flow::Close("event queue closed".to_string()),
                Wake::Keepalive => self.send_keepalive(),
                Wake::Watchdog => {
                    if self.turn.on_watchdog_expired() {
                        warn!(session_id = %self.id, "Response did not complete in time, returning to idle");
                    }
                    Flow::Continue
                }
            };

            if let Flow::Close(reason) = flow {
                break reason;
            }
        };

        self.teardown(reason)
    }

    /// Send the speech session configuration.
    pub fn open(&mut self) -> Result<(), BridgeError> {
        info!(session_id = %self.id, voice = %self.config.realtime.voice, "Configuring speech session");
        self.send_realtime(&ClientEvent::session_update(&self.config.realtime))
    }

    /// Process one event. Exposed so tests can step the session directly.
    pub async fn handle_event(&mut self, event: SessionEvent) -> Flow {
        let result = match event {
            SessionEvent::Telephony(TelephonyEvent::Start { stream_id, call_id }) => {
                self.on_stream_start(stream_id, call_id)
            }
            SessionEvent::Telephony(TelephonyEvent::Media { payload }) => self.on_media(&payload).await,
            SessionEvent::Telephony(TelephonyEvent::Stop) => {
                return Flow::Close("telephony stream stopped".to_string());
            }
            SessionEvent::Telephony(TelephonyEvent::Other) => Ok(()),
            SessionEvent::Realtime(event) => self.on_realtime_event(event),
            SessionEvent::TelephonyClosed => return Flow::Close("telephony socket closed".to_string()),
            SessionEvent::RealtimeClosed => return Flow::Close("speech service socket closed".to_string()),
            SessionEvent::PacerFailed(e) => {
                warn!(session_id = %self.id, "Outbound playback failed: {}", e);
                Err(BridgeError::ConnectionClosed("telephony"))
            }
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) if e.is_fatal() => Flow::Close(e.to_string()),
            Err(BridgeError::Protocol(msg)) => {
                warn!(session_id = %self.id, "Discarding message: {}", msg);
                Flow::Continue
            }
            Err(e) => {
                warn!(session_id = %self.id, "Aborted operation: {}", e);
                Flow::Continue
            }
        }
    }

    fn on_stream_start(&mut self, stream_id: String, call_id: Option<String>) -> Result<(), BridgeError> {
        if let Some(existing) = &self.stream_id {
            warn!(session_id = %self.id, existing = %existing, "Ignoring duplicate start for {}", stream_id);
            return Ok(());
        }

        info!(
            session_id = %self.id,
            stream_id = %stream_id,
            call_id = call_id.as_deref().unwrap_or("unknown"),
            "Telephony stream started"
        );

        let pacer = OutboundPacer::start(
            stream_id.clone(),
            PacerConfig::new(TELEPHONY_SAMPLE_RATE, self.config.frame_ms),
            self.telephony.clone(),
            self.reports.clone(),
        );

        if let Some((frequency_hz, duration_ms)) = self.config.test_tone {
            debug!(session_id = %self.id, "Playing {} Hz test tone for {} ms", frequency_hz, duration_ms);
            pacer.emit(tone::sine_tone(frequency_hz, duration_ms, TELEPHONY_SAMPLE_RATE))?;
        }

        self.pacer = Some(pacer);
        self.summary.stream_id = Some(stream_id.clone());
        self.summary.call_id = call_id;
        self.stream_id = Some(stream_id);

        if self.turn.on_ready() {
            info!(session_id = %self.id, "Requesting greeting");
            let greeting = ClientEvent::response_create(Some(self.config.realtime.greeting_instructions.as_str()));
            self.send_realtime(&greeting)?;
        }

        Ok(())
    }

    async fn on_media(&mut self, payload: &str) -> Result<(), BridgeError> {
        let bytes = telephony::decode_payload(payload)?;
        self.summary.media_frames_in += 1;

        let narrowband = codec::decode_block(&bytes);
        let samples = if self.config.resampling() {
            upsample_2x(&narrowband)
        } else {
            narrowband
        };

        let dropped = self.accumulator.append(&samples);
        if dropped > 0 {
            debug!(session_id = %self.id, dropped, "Inbound buffer full, dropped oldest samples");
        }

        match self.config.realtime.turn_detection {
            TurnDetection::Manual => self.submit_ready_blocks().await,
            TurnDetection::ServerVad => self.stream_ready_blocks(),
        }
    }

    /// Submit buffered audio as a turn, if the coordinator allows it.
    async fn submit_ready_blocks(&mut self) -> Result<(), BridgeError> {
        let threshold = self.config.submission_samples;

        while self.accumulator.len() >= threshold {
            let first_response = match self.turn.on_input_ready() {
                SubmitDecision::Suppress => {
                    if !self.holding_back {
                        self.holding_back = true;
                        self.summary.suppressed_submissions += 1;
                    }
                    break;
                }
                SubmitDecision::Submit { first_response } => first_response,
            };

            let Some(block) = self.accumulator.try_drain(threshold) else {
                break;
            };

            self.holding_back = false;
            debug!(session_id = %self.id, samples = block.len(), "Submitting caller audio");
            self.send_realtime(&ClientEvent::append(&block))?;

            // Let the service register the audio before closing the turn.
            sleep(self.config.ingest_delay).await;

            self.send_realtime(&ClientEvent::InputAudioCommit)?;
            let instructions = first_response.then_some(self.config.realtime.greeting_instructions.as_str());
            self.send_realtime(&ClientEvent::response_create(instructions))?;
            self.summary.submissions += 1;
        }

        Ok(())
    }

    /// Server-side turn detection: forward audio continuously, no commits.
    fn stream_ready_blocks(&mut self) -> Result<(), BridgeError> {
        while let Some(block) = self.accumulator.try_drain(self.config.submission_samples) {
            self.send_realtime(&ClientEvent::append(&block))?;
            self.summary.submissions += 1;
        }
        Ok(())
    }

    fn on_realtime_event(&mut self, event: ServerEvent) -> Result<(), BridgeError> {
        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                debug!(session_id = %self.id, "Speech session acknowledged");
            }
            ServerEvent::ResponseCreated => {
                self.turn.on_response_created();
                debug!(session_id = %self.id, state = self.turn.state().as_str(), "Response started");
            }
            ServerEvent::ResponseDone => {
                self.turn.on_response_done();
                if self.downsampler.has_carry() {
                    debug!(session_id = %self.id, "Dropping odd trailing sample of response");
                }
                self.downsampler.reset();
                debug!(session_id = %self.id, buffered_ms = self.accumulator.duration_ms(), "Response complete");
            }
            ServerEvent::Error { error } => {
                let code = error.code.unwrap_or_else(|| "none".to_string());
                let err = BridgeError::Remote(error.message);
                warn!(session_id = %self.id, code = %code, "{}", err);
                self.turn.on_response_error();
                self.downsampler.reset();
            }
            ServerEvent::AudioDelta { delta } => {
                self.on_audio_delta(&delta)?;
            }
            ServerEvent::SpeechStarted => {
                if let Some(pacer) = &self.pacer {
                    debug!(session_id = %self.id, "Caller started speaking, clearing playback");
                    pacer.clear();
                }
                self.downsampler.reset();
            }
            ServerEvent::Other => {}
        }
        Ok(())
    }

    fn on_audio_delta(&mut self, delta: &str) -> Result<(), BridgeError> {
        let Some(pacer) = &self.pacer else {
            // No stream id yet, so there is nowhere to send it.
            self.summary.audio_deltas_dropped += 1;
            debug!(session_id = %self.id, "Dropping response audio received before stream start");
            return Ok(());
        };

        let samples = realtime::decode_audio(delta)?;
        let narrowband = if self.config.resampling() {
            self.downsampler.process(&samples)
        } else {
            samples
        };

        pacer.emit(narrowband)
    }

    fn send_keepalive(&mut self) -> Flow {
        if self.telephony.send(SocketFrame::Ping).is_err() {
            return Flow::Close("telephony socket closed".to_string());
        }
        if self.realtime.send(SocketFrame::Ping).is_err() {
            return Flow::Close("speech service socket closed".to_string());
        }
        Flow::Continue
    }

    fn send_realtime(&self, event: &ClientEvent) -> Result<(), BridgeError> {
        self.realtime
            .send(SocketFrame::Text(event.to_json()))
            .map_err(|_| BridgeError::ConnectionClosed("realtime"))
    }

    /// Release everything the session owns.
    fn teardown(mut self, reason: String) -> SessionSummary {
        if let Some(pacer) = self.pacer.take() {
            pacer.shutdown();
            self.summary.frames_out = pacer.frames_sent();
        }

        if !self.accumulator.is_empty() {
            debug!(
                session_id = %self.id,
                "Discarding {} ms of unsent caller audio",
                self.accumulator.duration_ms()
            );
            self.accumulator.clear();
        }

        let _ = self.telephony.send(SocketFrame::Close);
        let _ = self.realtime.send(SocketFrame::Close);

        self.summary.close_reason = reason;
        self.summary.duration_ms = self.started_at.elapsed().as_millis() as u64;
        self.summary.dropped_samples = self.accumulator.dropped_samples();
        self.summary.first_response_sent = self.turn.first_response_sent();

        info!(
            session_id = %self.id,
            stream_id = self.stream_id.as_deref().unwrap_or("none"),
            reason = %self.summary.close_reason,
            duration_ms = self.summary.duration_ms,
            frames_in = self.summary.media_frames_in,
            frames_out = self.summary.frames_out,
            submissions = self.summary.submissions,
            "Session closed"
        );

        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::Value;

    struct Harness {
        session: BridgeSession,
        events: mpsc::UnboundedSender<SessionEvent>,
        telephony: mpsc::UnboundedReceiver<SocketFrame>,
        realtime: mpsc::UnboundedReceiver<SocketFrame>,
    }

    fn harness(config: AppConfig) -> Harness {
        let (tel_tx, telephony) = mpsc::unbounded_channel();
        let (rt_tx, realtime) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let session_config = SessionConfig::from_app_config(&config).unwrap();
        let session = BridgeSession::new(session_config, tel_tx, rt_tx, events.clone(), events_rx);
        Harness {
            session,
            events,
            telephony,
            realtime,
        }
    }

    fn start(stream_id: &str) -> SessionEvent {
        SessionEvent::Telephony(TelephonyEvent::Start {
            stream_id: stream_id.to_string(),
            call_id: Some("CA1".to_string()),
        })
    }

    fn media(bytes: &[u8]) -> SessionEvent {
        SessionEvent::Telephony(TelephonyEvent::Media {
            payload: STANDARD.encode(bytes),
        })
    }

    fn drain_types(rx: &mut mpsc::UnboundedReceiver<SocketFrame>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let SocketFrame::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn types(messages: &[Value]) -> Vec<String> {
        messages.iter().map(|m| m["type"].as_str().unwrap().to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_frames_make_one_submission() {
        let mut h = harness(AppConfig::default());

        for _ in 0..10 {
            let flow = h.session.handle_event(media(&[0xEF; 160])).await;
            assert_eq!(flow, Flow::Continue);
        }

        let sent = drain_types(&mut h.realtime);
        assert_eq!(
            types(&sent),
            vec!["input_audio_buffer.append", "input_audio_buffer.commit", "response.create"]
        );
        let audio = realtime::decode_audio(sent[0]["audio"].as_str().unwrap()).unwrap();
        assert_eq!(audio.len(), 3200);
        assert!(audio.iter().all(|&s| s == 132));
        assert_eq!(h.session.turn_state(), TurnState::ResponseInFlight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_suppressed_until_response_done() {
        let mut h = harness(AppConfig::default());

        for _ in 0..10 {
            h.session.handle_event(media(&[0xFF; 160])).await;
        }
        assert_eq!(drain_types(&mut h.realtime).len(), 3);

        for _ in 0..10 {
            h.session.handle_event(media(&[0xFF; 160])).await;
        }
        assert!(drain_types(&mut h.realtime).is_empty());
        assert_eq!(h.session.turn_state(), TurnState::ResponseInFlight);

        // Every frame past the threshold is held back, but it is one wait.
        for _ in 0..5 {
            h.session.handle_event(media(&[0xFF; 160])).await;
        }
        assert!(drain_types(&mut h.realtime).is_empty());
        assert_eq!(h.session.summary.suppressed_submissions, 1);

        h.session
            .handle_event(SessionEvent::Realtime(ServerEvent::ResponseDone))
            .await;
        assert_eq!(h.session.turn_state(), TurnState::Idle);

        // The audio buffered while suppressed goes out with the next frame.
        h.session.handle_event(media(&[0xFF; 160])).await;
        assert_eq!(
            types(&drain_types(&mut h.realtime)),
            vec!["input_audio_buffer.append", "input_audio_buffer.commit", "response.create"]
        );
        assert_eq!(h.session.summary.submissions, 2);

        // A new response in flight starts a new wait.
        for _ in 0..9 {
            h.session.handle_event(media(&[0xFF; 160])).await;
        }
        assert!(drain_types(&mut h.realtime).is_empty());
        assert_eq!(h.session.summary.suppressed_submissions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_resets_turn() {
        let mut h = harness(AppConfig::default());
        for _ in 0..10 {
            h.session.handle_event(media(&[0xFF; 160])).await;
        }
        assert_eq!(h.session.turn_state(), TurnState::ResponseInFlight);

        let error = ServerEvent::parse(r#"{"type":"error","error":{"message":"rate limited"}}"#).unwrap();
        let flow = h.session.handle_event(SessionEvent::Realtime(error)).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(h.session.turn_state(), TurnState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_plays_test_tone() {
        let mut config = AppConfig::default();
        config.bridge.play_test_tone = true;
        let mut h = harness(config);

        let started = Instant::now();
        assert_eq!(h.session.handle_event(start("SID1")).await, Flow::Continue);
        assert_eq!(h.session.stream_id.as_deref(), Some("SID1"));

        let mut stamps = Vec::new();
        for _ in 0..100 {
            match h.telephony.recv().await.unwrap() {
                SocketFrame::Text(text) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(value["event"], "media");
                    assert_eq!(value["streamId"], "SID1");
                    let payload = telephony::decode_payload(value["media"]["payload"].as_str().unwrap()).unwrap();
                    assert_eq!(payload.len(), 160);
                }
                other => panic!("unexpected frame {:?}", other),
            }
            stamps.push(Instant::now());
        }

        for pair in stamps.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(20) && gap < Duration::from_millis(21));
        }
        let total = stamps[99] - started + Duration::from_millis(20);
        assert!(total >= Duration::from_millis(1900) && total <= Duration::from_millis(2100));

        sleep(Duration::from_millis(100)).await;
        assert!(h.telephony.try_recv().is_err());

        // Greet-first fires once the stream is addressable.
        assert_eq!(types(&drain_types(&mut h.realtime)), vec!["response.create"]);
        assert_eq!(h.session.turn_state(), TurnState::ResponseInFlight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_first_greets_on_first_submission() {
        let mut config = AppConfig::default();
        config.bridge.greeting_policy = GreetingPolicy::ListenFirst;
        let mut h = harness(config);

        h.session.handle_event(start("SID1")).await;
        assert!(drain_types(&mut h.realtime).is_empty());
        assert_eq!(h.session.turn_state(), TurnState::Idle);

        for _ in 0..10 {
            h.session.handle_event(media(&[0xFF; 160])).await;
        }
        let sent = drain_types(&mut h.realtime);
        assert_eq!(sent[2]["type"], "response.create");
        assert!(sent[2]["response"]["instructions"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_before_start_is_dropped() {
        let mut h = harness(AppConfig::default());
        let delta = STANDARD.encode(realtime::samples_to_pcm(&[1000; 640]));

        let flow = h
            .session
            .handle_event(SessionEvent::Realtime(ServerEvent::AudioDelta { delta: delta.clone() }))
            .await;
        assert_eq!(flow, Flow::Continue);
        assert!(h.telephony.try_recv().is_err());

        h.session.handle_event(start("SID1")).await;
        h.session
            .handle_event(SessionEvent::Realtime(ServerEvent::AudioDelta { delta }))
            .await;

        // 640 samples at 16 kHz -> 320 at 8 kHz -> two frames
        for _ in 0..2 {
            assert!(matches!(h.telephony.recv().await, Some(SocketFrame::Text(_))));
        }
        sleep(Duration::from_millis(100)).await;
        assert!(h.telephony.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_media_is_discarded() {
        let mut h = harness(AppConfig::default());
        let bad = SessionEvent::Telephony(TelephonyEvent::Media {
            payload: "***".to_string(),
        });
        assert_eq!(h.session.handle_event(bad).await, Flow::Continue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_down_both_legs() {
        let h = harness(AppConfig::default());
        let Harness {
            session,
            events,
            mut telephony,
            mut realtime,
        } = h;

        events.send(start("SID1")).unwrap();
        events.send(SessionEvent::Telephony(TelephonyEvent::Stop)).unwrap();

        let summary = session.run().await;
        assert_eq!(summary.close_reason, "telephony stream stopped");
        assert_eq!(summary.stream_id.as_deref(), Some("SID1"));

        let mut rt_frames = Vec::new();
        while let Ok(frame) = realtime.try_recv() {
            rt_frames.push(frame);
        }
        assert!(matches!(rt_frames.first(), Some(SocketFrame::Text(t)) if t.contains("session.update")));
        assert_eq!(rt_frames.last(), Some(&SocketFrame::Close));

        let mut last_tel = None;
        while let Ok(frame) = telephony.try_recv() {
            last_tel = Some(frame);
        }
        assert_eq!(last_tel, Some(SocketFrame::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_tone_playback() {
        let mut config = AppConfig::default();
        config.bridge.play_test_tone = true;
        let Harness {
            session,
            events,
            mut telephony,
            realtime: _realtime,
        } = harness(config);

        let task = tokio::spawn(session.run());
        events.send(start("SID1")).unwrap();
        for _ in 0..10 {
            assert!(matches!(telephony.recv().await, Some(SocketFrame::Text(_))));
        }

        events.send(SessionEvent::Telephony(TelephonyEvent::Stop)).unwrap();
        let summary = task.await.unwrap();
        assert_eq!(summary.close_reason, "telephony stream stopped");

        loop {
            match telephony.try_recv() {
                Ok(SocketFrame::Close) => break,
                Ok(SocketFrame::Text(_)) => {}
                other => panic!("expected media or close, got {:?}", other),
            }
        }

        // Nothing of the remaining tone reaches the socket after close.
        sleep(Duration::from_secs(3)).await;
        assert!(telephony.try_recv().is_err());
        assert!(summary.frames_out >= 10 && summary.frames_out < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_and_close_on_socket_loss() {
        let Harness {
            session,
            events,
            mut telephony,
            mut realtime,
        } = harness(AppConfig::default());

        let task = tokio::spawn(session.run());
        sleep(Duration::from_secs(21)).await;

        assert_eq!(telephony.try_recv().ok(), Some(SocketFrame::Ping));
        let mut saw_ping = false;
        while let Ok(frame) = realtime.try_recv() {
            saw_ping |= frame == SocketFrame::Ping;
        }
        assert!(saw_ping);

        events.send(SessionEvent::RealtimeClosed).unwrap();
        let summary = task.await.unwrap();
        assert_eq!(summary.close_reason, "speech service socket closed");
        assert_eq!(telephony.try_recv().ok(), Some(SocketFrame::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_returns_to_idle() {
        let mut config = AppConfig::default();
        config.bridge.response_timeout_secs = 5;
        let Harness {
            session,
            events,
            telephony: _telephony,
            realtime: _realtime,
        } = harness(config);

        let task = tokio::spawn(session.run());
        for _ in 0..10 {
            events.send(media(&[0xFF; 160])).unwrap();
        }
        sleep(Duration::from_secs(6)).await;

        // A fresh block is submitted again once the watchdog fired.
        for _ in 0..10 {
            events.send(media(&[0xFF; 160])).unwrap();
        }
        events.send(SessionEvent::TelephonyClosed).unwrap();
        let summary = task.await.unwrap();
        assert_eq!(summary.submissions, 2);
    }

    #[test]
    fn test_session_config_validation() {
        let config = SessionConfig::from_app_config(&AppConfig::default()).unwrap();
        assert_eq!(config.submission_samples, 3200);
        assert!(config.resampling());
        assert!(config.response_timeout.is_none());

        let mut narrow = AppConfig::default();
        narrow.realtime.sample_rate = 8000;
        let config = SessionConfig::from_app_config(&narrow).unwrap();
        assert_eq!(config.submission_samples, 1600);
        assert!(!config.resampling());

        let mut bad = AppConfig::default();
        bad.bridge.min_submission_ms = 0;
        assert!(matches!(
            SessionConfig::from_app_config(&bad),
            Err(BridgeError::Config(_))
        ));
    }
}
