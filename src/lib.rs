//! # Yoke Client
//!
//! Client runtime for a shared karaoke session: a resilient session link to
//! the server and a real-time pitch shifter for the local audio.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── NETWORK CONTEXT (tokio) ─────────────────────────────────┐
//! │                                                                                           │
//! │   UI / CLI ──send()──▶ ┌──────────────────────────────┐   text frames   ┌──────────────┐  │
//! │                        │  ConnectionManager (actor)   │ ──────────────▶ │  WsConnector │◀─┼──▶ server
//! │                        │  state machine + FIFO queue  │ ◀────────────── │  (tungstenite)│ │
//! │   SessionStore ◀─on_message()── subscribers ◀─ codec ─┘   events        └──────────────┘  │
//! │        │                                                                                  │
//! │        │ pitch_shift                                                                      │
//! └────────┼──────────────────────────────────────────────────────────────────────────────────┘
//!          ▼
//!   PitchControl (atomic f32)
//!          │
//! ┌────────┼────────────────────── REAL-TIME AUDIO CONTEXT (cpal) ───────────────────────────┐
//! │        ▼                                                                                  │
//! │  ┌─────────────┐   blocks   ┌─────────────────────────────────────────┐   ┌────────────┐  │
//! │  │ AudioSource │ ─────────▶ │ PitchEngine                             │ ─▶│ Output dev │  │
//! │  │ (capture /  │            │  s == 0: copy                           │   └────────────┘  │
//! │  │  clip)      │            │  s != 0: interleave ▶ WSOLA ▶ resample  │                   │
//! │  └─────────────┘            └─────────────────────────────────────────┘                   │
//! └───────────────────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Engine channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default engine block size in frames
    pub const DEFAULT_BLOCK_SIZE: usize = 1024;

    /// Largest engine block size accepted
    pub const MAX_BLOCK_SIZE: usize = 8192;

    /// Largest default pitch shift in either direction, in semitones
    pub const DEFAULT_MAX_SEMITONES: f32 = 12.0;

    /// Default session endpoint
    pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws";

    /// Delay between reconnect attempts
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

    /// Capture ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 16384;
}
