//! Audio subsystem: pitch engine, playback and capture

pub mod buffer;
pub mod capture;
pub mod device;
pub mod engine;
pub mod output;
pub mod pitch;
pub mod resample;
pub mod shifter;
pub mod stretch;

pub use buffer::{RingBuffer, SampleFifo};
pub use capture::{AudioCapture, CaptureSource};
pub use device::{get_device_by_id, list_devices, AudioDevice, AudioDeviceInfo};
pub use engine::{EngineStats, PitchEngine};
pub use output::{AudioSource, BufferSource, PitchPlayer};
pub use pitch::{semitone_ratio, PitchControl};
pub use shifter::PitchShifter;
