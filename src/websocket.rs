//! # Telephony Media Stream Handler
//!
//! The carrier connects to `/media-stream` once a call is answered and streams
//! the caller's audio as JSON text frames. Each connection becomes one bridge
//! session.
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: capacity is checked and the websocket actor starts
//! 2. **Connect**: a background task opens the speech service socket
//! 3. **Bridge**: the session runs until either side goes away
//! 4. **Cleanup**: the session summary is folded into the server metrics
//!
//! ## Actor Role:
//! The actor does no audio work. It parses inbound frames into
//! [`TelephonyEvent`]s for the session's queue and writes whatever
//! [`SocketFrame`]s the session sends back. Frames that arrive while the speech
//! service is still connecting wait in the queue, in order.

use crate::bridge::realtime::RealtimeConnection;
use crate::bridge::session::{BridgeSession, SessionConfig, SessionEvent, SocketFrame, SocketSink};
use crate::bridge::telephony::TelephonyEvent;
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// How often the idle check runs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// The carrier streams media continuously; this much silence means it is gone.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Websocket actor for one telephony media stream.
pub struct TelephonyWebSocket {
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: Option<mpsc::UnboundedReceiver<SocketFrame>>,
    last_heartbeat: Instant,
}

impl TelephonyWebSocket {
    pub fn new(
        events: mpsc::UnboundedSender<SessionEvent>,
        outbound: mpsc::UnboundedReceiver<SocketFrame>,
    ) -> Self {
        Self {
            events,
            outbound: Some(outbound),
            last_heartbeat: Instant::now(),
        }
    }

    fn forward(&self, event: TelephonyEvent, ctx: &mut ws::WebsocketContext<Self>) {
        if self.events.send(SessionEvent::Telephony(event)).is_err() {
            debug!("Session has ended, closing telephony socket");
            ctx.stop();
        }
    }
}

impl Actor for TelephonyWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Telephony media stream connected");

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Telephony stream idle for {:?}, closing connection", CLIENT_TIMEOUT);
                ctx.stop();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Telephony media stream disconnected");
        let _ = self.events.send(SessionEvent::TelephonyClosed);
    }
}

/// Inbound frames from the carrier.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TelephonyWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match TelephonyEvent::parse(&text) {
                    Ok(event) => self.forward(event, ctx),
                    Err(e) => warn!("Discarding telephony message: {}", e),
                }
            }
            Ok(ws::Message::Binary(data)) => {
                warn!("Ignoring {} byte binary frame on media stream", data.len());
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Telephony socket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Telephony websocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Outbound frames from the session.
impl StreamHandler<SocketFrame> for TelephonyWebSocket {
    fn handle(&mut self, frame: SocketFrame, ctx: &mut Self::Context) {
        match frame {
            SocketFrame::Text(text) => ctx.text(text),
            SocketFrame::Ping => ctx.ping(b""),
            SocketFrame::Close => {
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // Every sink is gone, so the session is over.
        ctx.stop();
    }
}

/// Media stream endpoint.
///
/// ## HTTP to WebSocket Upgrade:
/// Refuses the upgrade with 503 when the server is already bridging
/// `max_concurrent_sessions` calls. Otherwise the actor starts immediately
/// and the speech service connection is opened in the background.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    info!("Media stream request from: {:?}", req.connection_info().peer_addr());

    let config = app_state.get_config();
    let session_config =
        SessionConfig::from_app_config(&config).map_err(|e| AppError::ConfigError(e.to_string()))?;

    if !app_state.try_start_session() {
        warn!(
            "Refusing media stream, {} sessions already active",
            config.performance.max_concurrent_sessions
        );
        return Err(AppError::Overloaded("maximum concurrent calls reached".to_string()).into());
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (telephony_tx, telephony_rx) = mpsc::unbounded_channel();

    let actor = TelephonyWebSocket::new(events_tx.clone(), telephony_rx);
    let response = match ws::start(actor, &req, stream) {
        Ok(response) => response,
        Err(e) => {
            app_state.record_failed_connect();
            return Err(e);
        }
    };

    let state = app_state.get_ref().clone();
    tokio::spawn(run_bridge(state, session_config, events_tx, events_rx, telephony_tx));

    Ok(response)
}

/// Connect the speech leg and run the session to completion.
async fn run_bridge(
    state: AppState,
    session_config: SessionConfig,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    telephony: SocketSink,
) {
    let connection = match RealtimeConnection::connect(&session_config.realtime, events_tx.clone()).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("Failed to connect to speech service: {}", e);
            let _ = telephony.send(SocketFrame::Close);
            state.record_failed_connect();
            return;
        }
    };

    let session = BridgeSession::new(session_config, telephony, connection.sink(), events_tx, events_rx);
    let session_id = session.id().to_string();
    debug!(session_id = %session_id, "Bridge session running");

    let summary = session.run().await;
    connection.close().await;
    state.record_session_end(summary);
}
