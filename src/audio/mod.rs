//! # Audio Processing Module
//!
//! Sample-level building blocks for the media bridge. Nothing here knows about
//! sockets except the pacer, which owns the outbound frame schedule.
//!
//! ## Formats:
//! - **Telephony leg**: G.711 µ-law, 8 kHz, mono, 20 ms frames (160 bytes)
//! - **Speech leg**: PCM16 little-endian, 16 kHz (or 8 kHz), mono
//!
//! ## Components:
//! - **codec**: µ-law ⇄ linear conversion
//! - **resample**: 2x up/down conversion between 8 and 16 kHz
//! - **buffer**: inbound FIFO that releases fixed-size submission blocks
//! - **pacer**: real-time outbound frame emitter
//! - **tone**: sine test signal

pub mod buffer;
pub mod codec;
pub mod pacer;
pub mod resample;
pub mod tone;
