//! Pitch-shifted playback on an output device
//!
//! [`PitchPlayer`] owns one cpal output stream at a time. cpal streams are not
//! `Send`, so each stream lives on its own thread and is driven through a
//! command channel. The stream callback pulls fixed-size blocks from the
//! attached [`AudioSource`] and runs them through the [`PitchEngine`], or,
//! in [`PitchMode::PlaybackRate`], retunes the source's playback rate instead.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::audio::device::resolve_output;
use crate::audio::engine::{EngineCounters, EngineStats, PitchEngine};
use crate::audio::pitch::{semitone_ratio, PitchControl};
use crate::config::{AudioConfig, PitchMode};
use crate::constants::MAX_BLOCK_SIZE;
use crate::error::AudioError;

/// Something that produces stereo audio on demand
///
/// `fill` runs on the real-time thread and must not block or allocate.
pub trait AudioSource: Send {
    /// Write the next `left.len()` frames
    fn fill(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Change playback speed, where 1.0 is normal speed
    fn set_playback_rate(&mut self, _rate: f64) {}

    fn supports_playback_rate(&self) -> bool {
        false
    }
}

/// In-memory stereo clip
pub struct BufferSource {
    left: Vec<f32>,
    right: Vec<f32>,
    position: f64,
    rate: f64,
    looping: bool,
}

impl BufferSource {
    pub fn new(mut left: Vec<f32>, mut right: Vec<f32>) -> Self {
        let len = left.len().min(right.len());
        left.truncate(len);
        right.truncate(len);
        Self {
            left,
            right,
            position: 0.0,
            rate: 1.0,
            looping: false,
        }
    }

    pub fn from_interleaved(samples: &[f32]) -> Self {
        let left = samples.iter().step_by(2).copied().collect();
        let right = samples.iter().skip(1).step_by(2).copied().collect();
        Self::new(left, right)
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn is_finished(&self) -> bool {
        !self.looping && self.position >= self.left.len() as f64
    }

    fn sample(data: &[f32], index: usize) -> f32 {
        data.get(index).copied().unwrap_or(0.0)
    }
}

impl AudioSource for BufferSource {
    fn fill(&mut self, left: &mut [f32], right: &mut [f32]) {
        let len = self.left.len();
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            if self.looping && len > 0 && self.position >= len as f64 {
                self.position %= len as f64;
            }
            if self.position >= len as f64 {
                *l = 0.0;
                *r = 0.0;
                continue;
            }

            let i = self.position as usize;
            let t = (self.position - i as f64) as f32;
            let next = if self.looping && i + 1 == len { 0 } else { i + 1 };
            let (l0, l1) = (self.left[i], Self::sample(&self.left, next));
            let (r0, r1) = (self.right[i], Self::sample(&self.right, next));
            *l = l0 + (l1 - l0) * t;
            *r = r0 + (r1 - r0) * t;
            self.position += self.rate;
        }
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    fn supports_playback_rate(&self) -> bool {
        true
    }
}

/// Adapts device callbacks of any size and channel count to fixed
/// stereo engine blocks
pub struct Renderer {
    source: Box<dyn AudioSource>,
    engine: Option<PitchEngine>,
    control: PitchControl,
    device_channels: usize,
    block: usize,
    in_left: Vec<f32>,
    in_right: Vec<f32>,
    out_left: Vec<f32>,
    out_right: Vec<f32>,
    /// Next unread frame of the output block
    cursor: usize,
    /// Shift currently expressed as the source's playback rate
    rate_semitones: f32,
}

impl Renderer {
    pub fn new(
        source: Box<dyn AudioSource>,
        control: PitchControl,
        config: &AudioConfig,
        device_channels: usize,
    ) -> Self {
        let block = config.block_size;
        let engine = match config.pitch_mode {
            PitchMode::PreserveDuration => {
                Some(PitchEngine::new(control.clone(), config.sample_rate, block))
            }
            PitchMode::PlaybackRate => None,
        };

        Self {
            source,
            engine,
            control,
            device_channels: device_channels.max(1),
            block,
            in_left: vec![0.0; block],
            in_right: vec![0.0; block],
            out_left: vec![0.0; block],
            out_right: vec![0.0; block],
            cursor: block,
            rate_semitones: 0.0,
        }
    }

    pub fn counters(&self) -> Option<Arc<EngineCounters>> {
        self.engine.as_ref().map(|e| e.counters())
    }

    /// Fill an interleaved device buffer
    pub fn render(&mut self, data: &mut [f32]) {
        for frame in data.chunks_exact_mut(self.device_channels) {
            if self.cursor == self.block {
                self.next_block();
                self.cursor = 0;
            }

            let left = self.out_left[self.cursor];
            let right = self.out_right[self.cursor];
            if frame.len() == 1 {
                frame[0] = (left + right) * 0.5;
            } else {
                frame[0] = left;
                frame[1] = right;
                frame[2..].fill(0.0);
            }
            self.cursor += 1;
        }
    }

    fn next_block(&mut self) {
        match self.engine.as_mut() {
            Some(engine) => {
                self.source.fill(&mut self.in_left, &mut self.in_right);
                engine.process(
                    &self.in_left,
                    &self.in_right,
                    &mut self.out_left,
                    &mut self.out_right,
                );
            }
            None => {
                let semitones = self.control.semitones();
                if semitones != self.rate_semitones {
                    self.source.set_playback_rate(semitone_ratio(semitones));
                    self.rate_semitones = semitones;
                }
                self.source.fill(&mut self.out_left, &mut self.out_right);
            }
        }
    }
}

enum StreamCommand {
    Resume(oneshot::Sender<Result<(), AudioError>>),
    Suspend,
    Stop,
}

struct Attached {
    commands: Sender<StreamCommand>,
    thread: JoinHandle<()>,
    counters: Option<Arc<EngineCounters>>,
}

/// Plays one attached source through the pitch engine
pub struct PitchPlayer {
    config: AudioConfig,
    control: PitchControl,
    suspended: Arc<AtomicBool>,
    attached: Option<Attached>,
}

impl PitchPlayer {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            control: PitchControl::new(config.max_semitones),
            suspended: Arc::new(AtomicBool::new(false)),
            attached: None,
        }
    }

    /// Start playing `source` on the configured output device. Does nothing
    /// if a source is already attached.
    pub async fn attach(&mut self, source: Box<dyn AudioSource>) -> Result<(), AudioError> {
        if self.attached.is_some() {
            debug!("Player already attached, ignoring attach");
            return Ok(());
        }
        let block = self.config.block_size;
        if block == 0 || block > MAX_BLOCK_SIZE {
            return Err(AudioError::InvalidBlockSize(block));
        }
        if self.config.pitch_mode == PitchMode::PlaybackRate && !source.supports_playback_rate() {
            warn!("Source cannot change playback rate; pitch changes will have no effect");
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (command_tx, command_rx) = unbounded();
        let config = self.config.clone();
        let control = self.control.clone();
        let suspended = self.suspended.clone();

        let thread = thread::Builder::new()
            .name("pitch-output".into())
            .spawn(move || run_stream(config, control, source, suspended, command_rx, ready_tx))
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .await
            .unwrap_or_else(|_| Err(AudioError::StreamError("output thread exited".into())));
        match ready {
            Ok(counters) => {
                info!(
                    "Pitch player attached ({:?}, block {} frames)",
                    self.config.pitch_mode, block
                );
                self.attached = Some(Attached {
                    commands: command_tx,
                    thread,
                    counters,
                });
                Ok(())
            }
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    /// Publish a new shift, returning the value applied after clamping
    pub fn set_pitch(&self, semitones: f32) -> f32 {
        self.control.set_semitones(semitones)
    }

    pub fn pitch(&self) -> f32 {
        self.control.semitones()
    }

    /// Restart the stream if the host refused to start it or it was
    /// suspended
    pub async fn resume_if_suspended(&self) -> Result<(), AudioError> {
        let Some(attached) = &self.attached else {
            return Ok(());
        };
        if !self.suspended.load(Ordering::Acquire) {
            return Ok(());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        attached
            .commands
            .send(StreamCommand::Resume(reply_tx))
            .map_err(|_| AudioError::NotAttached)?;
        reply_rx.await.map_err(|_| AudioError::NotAttached)?
    }

    /// Pause the stream without releasing it
    pub fn suspend(&self) {
        if let Some(attached) = &self.attached {
            let _ = attached.commands.send(StreamCommand::Suspend);
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.attached.is_some() && self.suspended.load(Ordering::Acquire)
    }

    /// Stop and release the stream. Safe to call when not attached.
    pub fn detach(&mut self) {
        if let Some(attached) = self.attached.take() {
            let _ = attached.commands.send(StreamCommand::Stop);
            if attached.thread.join().is_err() {
                error!("Output thread panicked");
            }
            self.suspended.store(false, Ordering::Release);
            info!("Pitch player detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub fn mode(&self) -> PitchMode {
        self.config.pitch_mode
    }

    pub fn control(&self) -> PitchControl {
        self.control.clone()
    }

    /// Engine statistics of the attached stream
    pub fn stats(&self) -> EngineStats {
        self.attached
            .as_ref()
            .and_then(|a| a.counters.as_ref())
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }
}

impl Drop for PitchPlayer {
    fn drop(&mut self) {
        self.detach();
    }
}

type Ready = Result<Option<Arc<EngineCounters>>, AudioError>;

fn run_stream(
    config: AudioConfig,
    control: PitchControl,
    source: Box<dyn AudioSource>,
    suspended: Arc<AtomicBool>,
    commands: Receiver<StreamCommand>,
    ready: oneshot::Sender<Ready>,
) {
    let (stream, counters) = match build_stream(&config, control, source) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        // Left suspended until resume_if_suspended
        warn!("Output stream did not start: {}", e);
        suspended.store(true, Ordering::Release);
    } else {
        suspended.store(false, Ordering::Release);
    }
    if ready.send(Ok(counters)).is_err() {
        return;
    }

    for command in commands.iter() {
        match command {
            StreamCommand::Resume(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| AudioError::StreamError(e.to_string()));
                if result.is_ok() {
                    suspended.store(false, Ordering::Release);
                }
                let _ = reply.send(result);
            }
            StreamCommand::Suspend => {
                if let Err(e) = stream.pause() {
                    warn!("Failed to pause output stream: {}", e);
                } else {
                    suspended.store(true, Ordering::Release);
                }
            }
            StreamCommand::Stop => break,
        }
    }
    debug!("Output stream released");
}

fn build_stream(
    config: &AudioConfig,
    control: PitchControl,
    source: Box<dyn AudioSource>,
) -> Result<(cpal::Stream, Option<Arc<EngineCounters>>), AudioError> {
    let device = resolve_output(config.output_device.as_deref())?;
    let default_config = device.default_output_config()?;
    let channels = default_config.channels();
    info!(
        "Opening output device '{}' ({} ch @ {} Hz)",
        device.name, channels, config.sample_rate
    );

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut renderer = Renderer::new(source, control, config, channels as usize);
    let counters = renderer.counters();

    let stream = device
        .into_inner()
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data),
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, counters))
}
