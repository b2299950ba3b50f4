//! Audio sample buffers
//!
//! [`RingBuffer`] is a lock-free single-producer single-consumer queue of
//! stereo frames used to hand captured audio to the playback thread.
//! [`SampleFifo`] is a fixed-capacity interleaved FIFO used inside the pitch
//! pipeline; it never reallocates after construction.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One left/right sample pair
pub type StereoFrame = [f32; 2];

/// Lock-free ring buffer of stereo frames
pub struct RingBuffer {
    queue: ArrayQueue<StereoFrame>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity (in frames)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame into the buffer
    /// Returns false if buffer is full (overflow)
    pub fn push(&self, frame: StereoFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a frame from the buffer
    /// Returns None if buffer is empty (underrun)
    pub fn pop(&self) -> Option<StereoFrame> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as percentage
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

/// Fixed-capacity FIFO of interleaved samples
///
/// Storage is contiguous so readers can borrow the buffered frames as one
/// slice. Consumed space is reclaimed by compacting on the next push. When a
/// push would exceed capacity the oldest frames are discarded and counted.
pub struct SampleFifo {
    buf: Vec<f32>,
    channels: usize,
    start: usize,
    end: usize,
    dropped_frames: usize,
}

impl SampleFifo {
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        assert!(channels > 0, "channel count must be non-zero");
        Self {
            buf: vec![0.0; channels * capacity_frames],
            channels,
            start: 0,
            end: 0,
            dropped_frames: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Buffered frames
    pub fn frames(&self) -> usize {
        (self.end - self.start) / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Frames discarded because the FIFO was full
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Buffered samples, oldest first
    pub fn as_slice(&self) -> &[f32] {
        &self.buf[self.start..self.end]
    }

    /// Append interleaved samples. `samples.len()` must be a multiple of the
    /// channel count.
    pub fn push(&mut self, samples: &[f32]) {
        debug_assert_eq!(samples.len() % self.channels, 0);

        let cap = self.buf.len();
        let samples = if samples.len() > cap {
            let excess = samples.len() - cap;
            self.dropped_frames += excess / self.channels + self.frames();
            self.start = 0;
            self.end = 0;
            &samples[excess..]
        } else {
            samples
        };

        if self.end + samples.len() > cap {
            self.compact();
        }
        if self.end + samples.len() > cap {
            let excess = self.end + samples.len() - cap;
            self.dropped_frames += excess / self.channels;
            self.start += excess;
            self.compact();
        }

        self.buf[self.end..self.end + samples.len()].copy_from_slice(samples);
        self.end += samples.len();
    }

    /// Discard up to `frames` of the oldest frames
    pub fn consume(&mut self, frames: usize) {
        let samples = (frames * self.channels).min(self.end - self.start);
        self.start += samples;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move up to `out.len() / channels` frames into `out`, returning the
    /// number of frames moved
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels).min(self.frames());
        let n = frames * self.channels;
        out[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.consume(frames);
        frames
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }
}
