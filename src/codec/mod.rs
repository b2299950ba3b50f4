//! Protocol codec
//!
//! Turns protocol messages into text frames and back. Both halves are pure
//! with respect to their input; they only keep counters for diagnostics.

pub mod encoder;
pub mod decoder;

pub use encoder::MessageEncoder;
pub use decoder::MessageDecoder;
