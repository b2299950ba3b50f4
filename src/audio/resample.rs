//! Streaming rate transposer
//!
//! Reads its input at `rate` frames per output frame with linear
//! interpolation, so a rate above 1 raises pitch and shortens the signal.

use crate::audio::buffer::SampleFifo;

pub struct RateTransposer {
    channels: usize,
    rate: f64,
    /// Read position relative to the first buffered input frame
    pos: f64,
    frame: Vec<f32>,
}

impl RateTransposer {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            rate: 1.0,
            pos: 0.0,
            frame: vec![0.0; channels],
        }
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn clear(&mut self) {
        self.pos = 0.0;
    }

    /// Resample everything `input` allows into `output`, consuming the
    /// input frames that are no longer needed
    pub fn process(&mut self, input: &mut SampleFifo, output: &mut SampleFifo) {
        let ch = self.channels;
        let frames = input.frames();
        if frames < 2 {
            return;
        }

        let data = input.as_slice();
        while self.pos + 1.0 < frames as f64 {
            let i = self.pos as usize;
            let t = (self.pos - i as f64) as f32;
            let a = &data[i * ch..(i + 1) * ch];
            let b = &data[(i + 1) * ch..(i + 2) * ch];
            for c in 0..ch {
                self.frame[c] = a[c] + (b[c] - a[c]) * t;
            }
            output.push(&self.frame);
            self.pos += self.rate;
        }

        let consumed = (self.pos.floor() as usize).min(frames);
        input.consume(consumed);
        self.pos -= consumed as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_rate_is_transparent() {
        let mut transposer = RateTransposer::new(1);
        let mut input = SampleFifo::new(1, 64);
        let mut output = SampleFifo::new(1, 64);

        input.push(&[0.0, 0.5, 1.0, 0.5]);
        transposer.process(&mut input, &mut output);
        // The last frame waits for its successor
        assert_eq!(output.as_slice(), &[0.0, 0.5, 1.0]);

        input.push(&[0.0]);
        transposer.process(&mut input, &mut output);
        assert_eq!(output.as_slice(), &[0.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_rate_scales_length() {
        for rate in [0.5, 1.5, 2.0] {
            let mut transposer = RateTransposer::new(2);
            transposer.set_rate(rate);
            let mut input = SampleFifo::new(2, 2048);
            let mut output = SampleFifo::new(2, 1 << 16);

            let mut fed = 0;
            for _ in 0..20 {
                let block: Vec<f32> = (0..1000).map(|i| (i % 7) as f32).collect();
                input.push(&block);
                fed += 500;
                transposer.process(&mut input, &mut output);
            }

            let expected = fed as f64 / rate;
            assert!(
                (output.frames() as f64 - expected).abs() <= 2.0 / rate + 1.0,
                "rate {}: {} frames from {}",
                rate,
                output.frames(),
                fed
            );
        }
    }

    #[test]
    fn test_interpolates_between_frames() {
        let mut transposer = RateTransposer::new(2);
        transposer.set_rate(0.5);
        let mut input = SampleFifo::new(2, 16);
        let mut output = SampleFifo::new(2, 16);

        input.push(&[0.0, 1.0, 1.0, 0.0, 2.0, -1.0]);
        transposer.process(&mut input, &mut output);
        assert_eq!(
            output.as_slice(),
            &[0.0, 1.0, 0.5, 0.5, 1.0, 0.0, 1.5, -0.5]
        );
    }
}
