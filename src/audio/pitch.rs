//! Published pitch parameter
//!
//! Written from the network/UI side, read once per block on the audio
//! thread. The value is an `f32` stored as its bit pattern in an atomic so a
//! read can never observe a torn write.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::constants::DEFAULT_MAX_SEMITONES;

/// Frequency ratio for a shift of `semitones`
pub fn semitone_ratio(semitones: f32) -> f64 {
    2f64.powf(semitones as f64 / 12.0)
}

/// Shared handle to the current pitch shift, in semitones
#[derive(Debug, Clone)]
pub struct PitchControl {
    bits: Arc<AtomicU32>,
    max_semitones: f32,
}

impl PitchControl {
    /// A limit that is not a positive finite number falls back to
    /// [`DEFAULT_MAX_SEMITONES`].
    pub fn new(max_semitones: f32) -> Self {
        let max_semitones = if max_semitones.is_finite() && max_semitones > 0.0 {
            max_semitones
        } else {
            warn!(
                "Invalid pitch limit {}, using {}",
                max_semitones, DEFAULT_MAX_SEMITONES
            );
            DEFAULT_MAX_SEMITONES
        };
        Self {
            bits: Arc::new(AtomicU32::new(0f32.to_bits())),
            max_semitones,
        }
    }

    /// Publish a new shift. Out-of-range values are clamped and non-finite
    /// values are ignored. Returns the value now in effect.
    pub fn set_semitones(&self, semitones: f32) -> f32 {
        if !semitones.is_finite() {
            warn!("Ignoring non-finite pitch shift {}", semitones);
            return self.semitones();
        }
        let clamped = semitones.clamp(-self.max_semitones, self.max_semitones);
        // Normalise -0.0 so the engine's zero check is a plain comparison
        let clamped = if clamped == 0.0 { 0.0 } else { clamped };
        self.bits.store(clamped.to_bits(), Ordering::Release);
        clamped
    }

    pub fn semitones(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn max_semitones(&self) -> f32 {
        self.max_semitones
    }
}

impl Default for PitchControl {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SEMITONES)
    }
}
