//! Time-domain tempo transform (WSOLA)
//!
//! Input is cut into overlapping sequences. Each new sequence is taken from
//! near its nominal position, shifted within a small seek window to the
//! offset whose start best matches the tail of the previous sequence, and
//! joined to it with a linear crossfade. Advancing the nominal position by
//! `tempo * (sequence - overlap)` frames per sequence while emitting
//! `sequence - overlap` frames changes duration by `1 / tempo` and leaves
//! the local waveform, and with it the pitch, untouched.

use crate::audio::buffer::SampleFifo;

/// Sequence length in milliseconds
const SEQUENCE_MS: f64 = 40.0;
/// Seek window in milliseconds
const SEEK_WINDOW_MS: f64 = 15.0;
/// Crossfade length in milliseconds
const OVERLAP_MS: f64 = 8.0;

/// Slowest and fastest supported tempo
pub const MIN_TEMPO: f64 = 0.25;
pub const MAX_TEMPO: f64 = 4.0;

pub struct TimeStretch {
    channels: usize,
    sequence: usize,
    seek: usize,
    overlap: usize,
    tempo: f64,
    nominal_skip: f64,
    skip_fract: f64,
    input: SampleFifo,
    /// Tail of the previous sequence, crossfaded into the next one
    mid: Vec<f32>,
    has_mid: bool,
    crossfade: Vec<f32>,
}

impl TimeStretch {
    /// `max_put_frames` bounds how many frames a single `put` may add
    pub fn new(channels: usize, sample_rate: u32, max_put_frames: usize) -> Self {
        let frames = |ms: f64| ((sample_rate as f64 * ms / 1000.0).round() as usize).max(8);
        let sequence = frames(SEQUENCE_MS);
        let seek = frames(SEEK_WINDOW_MS);
        let overlap = frames(OVERLAP_MS).min(sequence / 2);

        let max_skip = (MAX_TEMPO * (sequence - overlap) as f64).ceil() as usize + 1;
        let input_capacity = (seek + sequence).max(max_skip) + max_put_frames;

        let mut stretch = Self {
            channels,
            sequence,
            seek,
            overlap,
            tempo: 1.0,
            nominal_skip: 0.0,
            skip_fract: 0.0,
            input: SampleFifo::new(channels, input_capacity),
            mid: vec![0.0; overlap * channels],
            has_mid: false,
            crossfade: vec![0.0; overlap * channels],
        };
        stretch.set_tempo(1.0);
        stretch
    }

    /// Set the tempo. Values below 1 lengthen the signal.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.nominal_skip = self.tempo * (self.sequence - self.overlap) as f64;
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Frames emitted by one step
    pub fn output_per_step(&self) -> usize {
        self.sequence - self.overlap
    }

    /// Input frames that must be buffered before a step can run
    pub fn required_input(&self) -> usize {
        let skip = (self.nominal_skip + self.skip_fract).floor() as usize;
        (self.seek + self.sequence).max(skip)
    }

    pub fn put(&mut self, samples: &[f32]) {
        self.input.push(samples);
    }

    pub fn buffered_input(&self) -> usize {
        self.input.frames()
    }

    /// Drop all buffered input and the crossfade history
    pub fn clear(&mut self) {
        self.input.clear();
        self.has_mid = false;
        self.skip_fract = 0.0;
    }

    /// Run one sequence into `out`. Returns false when more input is needed.
    pub fn step(&mut self, out: &mut SampleFifo) -> bool {
        if self.input.frames() < self.required_input() {
            return false;
        }

        let ch = self.channels;
        let overlap = self.overlap;
        let sequence = self.sequence;

        let offset = if self.has_mid {
            let offset = self.best_overlap_offset();
            let input = self.input.as_slice();
            let candidate = &input[offset * ch..(offset + overlap) * ch];
            for k in 0..overlap {
                let fade_in = k as f32 / overlap as f32;
                let fade_out = 1.0 - fade_in;
                for c in 0..ch {
                    let i = k * ch + c;
                    self.crossfade[i] = self.mid[i] * fade_out + candidate[i] * fade_in;
                }
            }
            out.push(&self.crossfade);
            out.push(&input[(offset + overlap) * ch..(offset + sequence - overlap) * ch]);
            offset
        } else {
            let input = self.input.as_slice();
            out.push(&input[..(sequence - overlap) * ch]);
            0
        };

        let input = self.input.as_slice();
        self.mid
            .copy_from_slice(&input[(offset + sequence - overlap) * ch..(offset + sequence) * ch]);
        self.has_mid = true;

        let skip = self.nominal_skip + self.skip_fract;
        let whole = skip.floor();
        self.skip_fract = skip - whole;
        self.input.consume(whole as usize);

        true
    }

    /// Offset within the seek window whose start best continues `mid`,
    /// by normalised cross-correlation
    fn best_overlap_offset(&self) -> usize {
        let ch = self.channels;
        let n = self.overlap * ch;
        let input = self.input.as_slice();

        let mut energy: f64 = input[..n].iter().map(|&x| (x as f64) * (x as f64)).sum();
        let mut best_offset = 0;
        let mut best_score = f64::MIN;

        for offset in 0..self.seek {
            let window = &input[offset * ch..offset * ch + n];
            let corr: f64 = window
                .iter()
                .zip(&self.mid)
                .map(|(&x, &m)| x as f64 * m as f64)
                .sum();

            let score = corr / (energy + 1e-9).sqrt();
            if score > best_score {
                best_score = score;
                best_offset = offset;
            }

            // Slide the energy window one frame forward
            for c in 0..ch {
                let leaving = input[offset * ch + c] as f64;
                let entering = input[offset * ch + n + c] as f64;
                energy += entering * entering - leaving * leaving;
            }
            energy = energy.max(0.0);
        }

        best_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, frames: usize, start: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * 2);
        for i in start..start + frames {
            let v = (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin() as f32;
            out.push(v);
            out.push(v);
        }
        out
    }

    fn run(tempo: f64, input_frames: usize) -> (usize, usize) {
        let mut stretch = TimeStretch::new(2, 48_000, 1024);
        stretch.set_tempo(tempo);
        let mut out = SampleFifo::new(2, 1 << 20);

        let mut fed = 0;
        while fed < input_frames {
            stretch.put(&sine(300.0, 48_000, 1024, fed));
            fed += 1024;
            while stretch.step(&mut out) {}
        }
        (fed - stretch.buffered_input(), out.frames())
    }

    #[test]
    fn test_unity_tempo_reconstructs_input() {
        let mut stretch = TimeStretch::new(1, 48_000, 4096);
        let input: Vec<f32> = (0..20_000).map(|i| ((i as f32) * 0.01).sin()).collect();
        let mut out = SampleFifo::new(1, 40_000);

        stretch.put(&input[..4096]);
        let mut fed = 4096;
        loop {
            while stretch.step(&mut out) {}
            if fed >= input.len() {
                break;
            }
            let end = (fed + 4096).min(input.len());
            stretch.put(&input[fed..end]);
            fed = end;
        }

        let produced = out.as_slice();
        assert!(produced.len() > 10_000);
        for (i, (&a, &b)) in produced.iter().zip(&input).enumerate() {
            assert!((a - b).abs() < 1e-4, "sample {} differs: {} vs {}", i, a, b);
        }
    }

    #[test]
    fn test_output_length_follows_tempo() {
        for tempo in [0.5, 0.75, 1.5, 2.0] {
            let (consumed, produced) = run(tempo, 96_000);
            let expected = consumed as f64 / tempo;
            let error = (produced as f64 - expected).abs();
            // Within one sequence of the ideal length
            assert!(
                error < 2_000.0,
                "tempo {}: consumed {} produced {}",
                tempo,
                consumed,
                produced
            );
        }
    }

    #[test]
    fn test_clear_forgets_history() {
        let mut stretch = TimeStretch::new(2, 48_000, 4096);
        stretch.put(&sine(440.0, 48_000, 4096, 0));
        stretch.clear();
        assert_eq!(stretch.buffered_input(), 0);

        let mut out = SampleFifo::new(2, 8192);
        assert!(!stretch.step(&mut out));
        assert!(out.is_empty());
    }
}
