//! Audio capture bridge
//!
//! Captures an input device on a dedicated thread into a lock-free ring
//! buffer of stereo frames. [`CaptureSource`] is the other end: an
//! [`AudioSource`] that the pitch player drains.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

use crate::audio::buffer::{SharedRingBuffer, StereoFrame};
use crate::audio::device::resolve_input;
use crate::audio::output::AudioSource;
use crate::error::AudioError;

/// Audio capture from a single input device
pub struct AudioCapture {
    device_id: Option<String>,
    sample_rate: u32,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Destination for captured frames
    output_buffer: SharedRingBuffer,

    thread_handle: Option<JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    frames_captured: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Capture from `device_id` (an `input:` id), or the default input
    pub fn new(device_id: Option<&str>, sample_rate: u32, output_buffer: SharedRingBuffer) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            sample_rate,
            running: Arc::new(AtomicBool::new(false)),
            output_buffer,
            thread_handle: None,
            stop_tx: None,
            error_rx: None,
            frames_captured: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start capturing audio. Returns once the stream is running.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.error_rx = Some(error_rx);

        let device_id = self.device_id.clone();
        let sample_rate = self.sample_rate;
        let running = self.running.clone();
        let output_buffer = self.output_buffer.clone();
        let frames_captured = self.frames_captured.clone();
        self.frames_captured.store(0, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(
                    device_id.as_deref(),
                    sample_rate,
                    output_buffer,
                    frames_captured,
                    error_tx,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                running.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                // Park until stopped; the stream is dropped on return
                let _ = stop_rx.recv();
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".into())));
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        self.stop_tx = Some(stop_tx);
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            info!("Audio capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    /// A playback source reading from this capture's buffer
    pub fn source(&self) -> CaptureSource {
        CaptureSource::new(self.output_buffer.clone())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    device_id: Option<&str>,
    sample_rate: u32,
    output_buffer: SharedRingBuffer,
    frames_captured: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let device = resolve_input(device_id)?;
    let channels = device.default_input_config()?.channels();
    info!(
        "Capturing from '{}' ({} ch @ {} Hz)",
        device.name, channels, sample_rate
    );

    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = channels as usize;

    device
        .into_inner()
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for chunk in data.chunks_exact(channels) {
                    // Overflow is counted by the ring buffer
                    let _ = output_buffer.push(to_stereo(chunk));
                }
                frames_captured.fetch_add((data.len() / channels) as u64, Ordering::Relaxed);
            },
            move |err| {
                error!("Capture stream error: {}", err);
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Map one device frame to stereo: mono is duplicated, extra channels dropped
fn to_stereo(frame: &[f32]) -> StereoFrame {
    match frame {
        [mono] => [*mono, *mono],
        [left, right, ..] => [*left, *right],
        [] => [0.0, 0.0],
    }
}

/// [`AudioSource`] draining a capture ring buffer
pub struct CaptureSource {
    buffer: SharedRingBuffer,
}

impl CaptureSource {
    pub fn new(buffer: SharedRingBuffer) -> Self {
        Self { buffer }
    }
}

impl AudioSource for CaptureSource {
    fn fill(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            // Silence while the capture side is behind
            let [a, b] = self.buffer.pop().unwrap_or([0.0, 0.0]);
            *l = a;
            *r = b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;

    #[test]
    fn test_to_stereo() {
        assert_eq!(to_stereo(&[0.5]), [0.5, 0.5]);
        assert_eq!(to_stereo(&[0.1, 0.2]), [0.1, 0.2]);
        assert_eq!(to_stereo(&[0.1, 0.2, 0.3, 0.4]), [0.1, 0.2]);
    }

    #[test]
    fn test_capture_source_drains_and_pads() {
        let buffer = create_shared_buffer(16);
        buffer.push([0.1, -0.1]);
        buffer.push([0.2, -0.2]);

        let mut source = CaptureSource::new(buffer.clone());
        let mut left = [9.0; 4];
        let mut right = [9.0; 4];
        source.fill(&mut left, &mut right);

        assert_eq!(left, [0.1, 0.2, 0.0, 0.0]);
        assert_eq!(right, [-0.1, -0.2, 0.0, 0.0]);
        assert_eq!(buffer.underrun_count(), 2);
    }

    #[test]
    fn test_stop_without_start() {
        let mut capture = AudioCapture::new(None, 48_000, create_shared_buffer(64));
        assert!(!capture.is_running());
        capture.stop();
        assert!(capture.check_errors().is_none());
    }
}
