//! # Outbound Frame Pacing
//!
//! Turns arbitrarily sized blocks of response audio into fixed 20 ms µ-law
//! frames and releases them to the telephony leg at real-time cadence. The
//! carrier does not signal backpressure, so sending faster than real time
//! overruns its buffers and sending slower leaves audible gaps.
//!
//! ## Ordering:
//! One worker task per session drains a FIFO queue, so frames from one
//! `emit` go out in order and blocks from separate `emit` calls are never
//! interleaved.
//!
//! ## Timing:
//! Each frame has a deadline one frame duration after the previous one. The
//! worker sleeps until the deadline, sends, and schedules the next. Deadlines
//! are absolute, so per-frame scheduling jitter does not accumulate. When the
//! queue runs dry the cadence restarts with the next block.
//!
//! ## Failure Policy:
//! A failed send means the telephony socket is gone. The rest of the block
//! and everything queued behind it is discarded and the failure is reported
//! to the session. Late audio is worse than silence, so nothing is retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::audio::codec;
use crate::bridge::session::{SessionEvent, SocketFrame, SocketSink};
use crate::bridge::telephony;
use crate::error::BridgeError;

/// Pacing parameters for one telephony stream.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Samples per frame at the telephony rate (160 for 20 ms at 8 kHz)
    pub frame_samples: usize,
    /// Wall-clock duration of one frame
    pub frame_duration: Duration,
}

impl PacerConfig {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        Self {
            frame_samples: (sample_rate as usize * frame_ms as usize) / 1000,
            frame_duration: Duration::from_millis(frame_ms as u64),
        }
    }
}

/// A block waiting to be played, tagged with the generation it belongs to.
struct PacerJob {
    samples: Vec<i16>,
    generation: u64,
}

/// Serialized, real-time frame emitter for one telephony stream.
pub struct OutboundPacer {
    queue: mpsc::UnboundedSender<PacerJob>,
    worker: JoinHandle<()>,
    frames_sent: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
}

impl OutboundPacer {
    /// Start the pacing worker for `stream_id`.
    ///
    /// ## Parameters:
    /// - **stream_id**: Address written into every outbound media message
    /// - **sink**: Telephony socket
    /// - **reports**: Session event queue; transmit failures go here
    pub fn start(
        stream_id: String,
        config: PacerConfig,
        sink: SocketSink,
        reports: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let frames_sent = Arc::new(AtomicU64::new(0));
        let generation = Arc::new(AtomicU64::new(0));

        let worker = tokio::spawn(run_worker(
            stream_id,
            config,
            sink,
            reports,
            jobs,
            frames_sent.clone(),
            generation.clone(),
        ));

        Self {
            queue,
            worker,
            frames_sent,
            generation,
        }
    }

    /// Queue a block of 8 kHz linear audio for playback.
    ///
    /// Returns immediately; playback happens on the worker. Empty blocks are
    /// ignored.
    pub fn emit(&self, samples: Vec<i16>) -> Result<(), BridgeError> {
        if samples.is_empty() {
            return Ok(());
        }

        let job = PacerJob {
            samples,
            generation: self.generation.load(Ordering::SeqCst),
        };

        self.queue
            .send(job)
            .map_err(|_| BridgeError::Transport("outbound pacer has stopped".to_string()))
    }

    /// Discard everything queued and stop the block currently playing.
    ///
    /// Used when the caller barges in on a response.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of frames successfully handed to the telephony socket.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    /// Stop the worker immediately; unsent frames are dropped.
    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl Drop for OutboundPacer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    stream_id: String,
    config: PacerConfig,
    sink: SocketSink,
    reports: mpsc::UnboundedSender<SessionEvent>,
    mut jobs: mpsc::UnboundedReceiver<PacerJob>,
    frames_sent: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
) {
    let mut next_deadline: Option<Instant> = None;

    while let Some(job) = jobs.recv().await {
        for frame in job.samples.chunks(config.frame_samples) {
            let now = Instant::now();
            let deadline = match next_deadline {
                Some(deadline) if deadline > now => deadline,
                _ => now,
            };
            if deadline > now {
                sleep_until(deadline).await;
            }

            // Checked after the wait so a clear during the sleep takes effect.
            if job.generation != generation.load(Ordering::SeqCst) {
                debug!("Dropping cleared audio for stream {}", stream_id);
                break;
            }

            let mut bytes = codec::encode_block(frame);
            bytes.resize(config.frame_samples, codec::SILENCE);

            let message = telephony::media_message(&stream_id, &bytes);
            if sink.send(SocketFrame::Text(message)).is_err() {
                warn!(stream_id = %stream_id, "Telephony send failed, dropping remaining audio");
                let _ = reports.send(SessionEvent::PacerFailed(BridgeError::Transport(
                    "telephony socket closed during playback".to_string(),
                )));
                return;
            }

            frames_sent.fetch_add(1, Ordering::SeqCst);
            next_deadline = Some(deadline + config.frame_duration);
        }
    }
}
