//! Per-block pitch engine
//!
//! Called from the audio callback with one stereo block at a time. Output
//! blocks always have the input's length. The zero-shift path is a plain
//! copy; otherwise the block goes through the [`PitchShifter`] and is
//! replaced by silence while the shifter cannot yet supply a full block.
//! Nothing here allocates, locks or logs after construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::pitch::{semitone_ratio, PitchControl};
use crate::audio::shifter::PitchShifter;
use crate::constants::DEFAULT_CHANNELS;

/// Counters shared with the control side
#[derive(Debug, Default)]
pub struct EngineCounters {
    blocks: AtomicU64,
    underruns: AtomicU64,
    rejected: AtomicU64,
}

impl EngineCounters {
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            blocks_processed: self.blocks.load(Ordering::Relaxed),
            underrun_blocks: self.underruns.load(Ordering::Relaxed),
            rejected_blocks: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub blocks_processed: u64,
    /// Blocks replaced by silence because output was not ready
    pub underrun_blocks: u64,
    /// Blocks with mismatched or oversized buffers, answered with silence
    pub rejected_blocks: u64,
}

pub struct PitchEngine {
    control: PitchControl,
    shifter: PitchShifter,
    block_size: usize,
    /// Shift the shifter is currently configured for
    applied: f32,
    staging_in: Vec<f32>,
    staging_out: Vec<f32>,
    counters: Arc<EngineCounters>,
}

impl PitchEngine {
    /// `block_size` is the largest block `process` accepts
    pub fn new(control: PitchControl, sample_rate: u32, block_size: usize) -> Self {
        Self {
            control,
            shifter: PitchShifter::new(DEFAULT_CHANNELS as usize, sample_rate, block_size),
            block_size,
            applied: 0.0,
            staging_in: vec![0.0; block_size * 2],
            staging_out: vec![0.0; block_size * 2],
            counters: Arc::new(EngineCounters::default()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn control(&self) -> &PitchControl {
        &self.control
    }

    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Transform one stereo block. All four slices must have the same
    /// length, at most `block_size`.
    pub fn process(
        &mut self,
        left_in: &[f32],
        right_in: &[f32],
        left_out: &mut [f32],
        right_out: &mut [f32],
    ) {
        let n = left_in.len();
        if right_in.len() != n || left_out.len() != n || right_out.len() != n || n > self.block_size
        {
            left_out.fill(0.0);
            right_out.fill(0.0);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters.blocks.fetch_add(1, Ordering::Relaxed);

        let semitones = self.control.semitones();
        if semitones != self.applied {
            if semitones != 0.0 {
                self.shifter.set_ratio(semitone_ratio(semitones));
                self.shifter.clear();
            }
            self.applied = semitones;
        }

        if semitones == 0.0 {
            left_out.copy_from_slice(left_in);
            right_out.copy_from_slice(right_in);
            return;
        }

        let staging = &mut self.staging_in[..n * 2];
        for (i, frame) in staging.chunks_exact_mut(2).enumerate() {
            frame[0] = left_in[i];
            frame[1] = right_in[i];
        }
        self.shifter.put_samples(staging);

        if self.shifter.available_frames() < n {
            left_out.fill(0.0);
            right_out.fill(0.0);
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let drained = &mut self.staging_out[..n * 2];
        self.shifter.receive(drained);
        for (i, frame) in drained.chunks_exact(2).enumerate() {
            left_out[i] = frame[0];
            right_out[i] = frame[1];
        }
    }
}
