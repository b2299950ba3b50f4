//! Duration-preserving pitch shifter
//!
//! Shifting by `ratio` first stretches the signal by `ratio` in time, then
//! reads it back `ratio` times faster. The two length changes cancel, the
//! frequency change does not.

use crate::audio::buffer::SampleFifo;
use crate::audio::resample::RateTransposer;
use crate::audio::stretch::TimeStretch;

pub struct PitchShifter {
    channels: usize,
    ratio: f64,
    stretch: TimeStretch,
    stretched: SampleFifo,
    transposer: RateTransposer,
    output: SampleFifo,
}

impl PitchShifter {
    /// `max_block` is the largest number of frames passed to one
    /// `put_samples` call
    pub fn new(channels: usize, sample_rate: u32, max_block: usize) -> Self {
        let stretch = TimeStretch::new(channels, sample_rate, max_block);
        let step = stretch.output_per_step();

        Self {
            channels,
            ratio: 1.0,
            stretched: SampleFifo::new(channels, 2 * step + 4),
            output: SampleFifo::new(channels, 8 * (max_block + step)),
            stretch,
            transposer: RateTransposer::new(channels),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Frequency ratio to apply, `2^(semitones / 12)`
    pub fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio;
        self.stretch.set_tempo(1.0 / ratio);
        self.transposer.set_rate(ratio);
    }

    /// Feed interleaved samples and process as far as they allow
    pub fn put_samples(&mut self, samples: &[f32]) {
        self.stretch.put(samples);
        while self.stretch.step(&mut self.stretched) {
            self.transposer
                .process(&mut self.stretched, &mut self.output);
        }
    }

    /// Processed frames ready to be received
    pub fn available_frames(&self) -> usize {
        self.output.frames()
    }

    /// Move processed interleaved samples into `out`, returning frames moved
    pub fn receive(&mut self, out: &mut [f32]) -> usize {
        self.output.pop_into(out)
    }

    /// Forget all buffered audio and transform history
    pub fn clear(&mut self) {
        self.stretch.clear();
        self.stretched.clear();
        self.transposer.clear();
        self.output.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;
    const BLOCK: usize = 1024;

    fn sine_block(freq: f64, start: usize) -> Vec<f32> {
        let mut block = Vec::with_capacity(BLOCK * 2);
        for i in start..start + BLOCK {
            let v = (0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / RATE as f64).sin()) as f32;
            block.push(v);
            block.push(v);
        }
        block
    }

    /// Shift a sine for `seconds` and return the left channel of the output
    fn shift_sine(freq: f64, semitones: f64, seconds: f64) -> (usize, Vec<f32>) {
        let mut shifter = PitchShifter::new(2, RATE, BLOCK);
        shifter.set_ratio(2f64.powf(semitones / 12.0));

        let total = (seconds * RATE as f64) as usize;
        let mut fed = 0;
        let mut left = Vec::new();
        let mut out = vec![0.0; BLOCK * 2];
        while fed < total {
            shifter.put_samples(&sine_block(freq, fed));
            fed += BLOCK;
            loop {
                let frames = shifter.receive(&mut out);
                if frames == 0 {
                    break;
                }
                left.extend(out[..frames * 2].iter().step_by(2));
            }
        }
        (fed, left)
    }

    /// Estimate frequency from upward zero crossings
    fn measure_frequency(samples: &[f32]) -> f64 {
        let mut crossings = Vec::new();
        for i in 1..samples.len() {
            let (a, b) = (samples[i - 1], samples[i]);
            if a < 0.0 && b >= 0.0 {
                crossings.push((i - 1) as f64 + (-a / (b - a)) as f64);
            }
        }
        assert!(crossings.len() > 10, "signal has no cycles");
        let span = crossings[crossings.len() - 1] - crossings[0];
        (crossings.len() - 1) as f64 * RATE as f64 / span
    }

    #[test]
    fn test_octave_up_doubles_frequency() {
        let (_, left) = shift_sine(440.0, 12.0, 2.0);
        let freq = measure_frequency(&left[RATE as usize / 2..]);
        assert!((freq - 880.0).abs() < 880.0 * 0.02, "measured {} Hz", freq);
    }

    #[test]
    fn test_fifth_up() {
        let (_, left) = shift_sine(440.0, 7.0, 2.0);
        let expected = 440.0 * 2f64.powf(7.0 / 12.0);
        let freq = measure_frequency(&left[RATE as usize / 2..]);
        assert!((freq - expected).abs() < expected * 0.02, "measured {} Hz", freq);
    }

    #[test]
    fn test_octave_down_halves_frequency() {
        let (_, left) = shift_sine(440.0, -12.0, 2.0);
        let freq = measure_frequency(&left[RATE as usize / 2..]);
        assert!((freq - 220.0).abs() < 220.0 * 0.02, "measured {} Hz", freq);
    }

    #[test]
    fn test_duration_is_preserved() {
        for semitones in [-12.0, -5.0, 3.0, 12.0] {
            let (fed, left) = shift_sine(330.0, semitones, 2.0);
            let produced = left.len();
            // Only the transform's start-up latency is missing
            assert!(
                produced + 3_500 >= fed && produced <= fed + 100,
                "{} semitones: fed {} produced {}",
                semitones,
                fed,
                produced
            );
        }
    }

    #[test]
    fn test_clear_drops_pending_output() {
        let mut shifter = PitchShifter::new(2, RATE, BLOCK);
        shifter.set_ratio(1.5);
        for n in 0..8 {
            shifter.put_samples(&sine_block(440.0, n * BLOCK));
        }
        assert!(shifter.available_frames() > 0);

        shifter.clear();
        assert_eq!(shifter.available_frames(), 0);
        shifter.put_samples(&sine_block(440.0, 0));
        assert_eq!(shifter.available_frames(), 0);
    }
}
