//! # Call Bridge
//!
//! Per-call plumbing between the telephony media stream and the realtime
//! speech service.
//!
//! - **telephony**: carrier media stream messages
//! - **realtime**: speech service events and websocket client
//! - **turn**: response-in-flight gating and the first-response trigger
//! - **session**: the per-call event loop that ties everything together

pub mod realtime;
pub mod session;
pub mod telephony;
pub mod turn;
