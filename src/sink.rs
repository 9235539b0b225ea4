//! Frame sinks: where completed frames go after capture
//!
//! A capture worker hands every new frame to a [`FrameSink`] on its own
//! thread. Sinks must not block for long; the stock sinks below copy or
//! encode the frame and return.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::error::{CaptureError, CaptureResult};
use crate::types::PixelSurface;

/// Receives completed RGBA frames from a capture loop.
///
/// Returning [`CaptureError::SinkClosed`] stops the loop cleanly; any other
/// error is logged and capture continues.
pub trait FrameSink {
    fn deliver(&mut self, frame: &PixelSurface) -> CaptureResult<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(&PixelSurface) -> CaptureResult<()>,
{
    fn deliver(&mut self, frame: &PixelSurface) -> CaptureResult<()> {
        self(frame)
    }
}

/// A frame copied out of a capture loop
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub display_index: usize,
    /// Per-sink sequence number, starting at 1
    pub sequence: u64,
    pub captured_at: Instant,
    pub surface: PixelSurface,
}

/// Sends frame copies over a bounded channel.
///
/// When the consumer falls behind, frames are dropped and counted instead of
/// blocking the capture thread.
pub struct ChannelSink {
    display_index: usize,
    tx: Sender<CapturedFrame>,
    sequence: u64,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(display_index: usize, capacity: usize) -> (Self, Receiver<CapturedFrame>) {
        let (tx, rx) = bounded(capacity.max(1));
        let sink = Self {
            display_index,
            tx,
            sequence: 0,
            dropped: 0,
        };
        (sink, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, frame: &PixelSurface) -> CaptureResult<()> {
        self.sequence += 1;
        let captured = CapturedFrame {
            display_index: self.display_index,
            sequence: self.sequence,
            captured_at: Instant::now(),
            surface: frame.clone(),
        };
        match self.tx.try_send(captured) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!("display {}: consumer behind, frame dropped", self.display_index);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(CaptureError::SinkClosed),
        }
    }
}

struct SlotState<T> {
    latest: Option<Arc<T>>,
    sequence: u64,
    closed: bool,
}

struct SlotInner<T> {
    state: Mutex<SlotState<T>>,
    updated: Condvar,
}

/// Single-slot, multi-subscriber fan-out.
///
/// The publisher overwrites the slot; each subscriber remembers the last
/// sequence it saw and waits for a newer one. Slow subscribers skip frames.
pub struct LatestFrameSlot<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T> Clone for LatestFrameSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LatestFrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrameSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                state: Mutex::new(SlotState {
                    latest: None,
                    sequence: 0,
                    closed: false,
                }),
                updated: Condvar::new(),
            }),
        }
    }

    /// Replace the slot contents and wake all subscribers. Returns the new sequence.
    pub fn publish(&self, value: T) -> CaptureResult<u64> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(CaptureError::SinkClosed);
        }
        state.sequence += 1;
        state.latest = Some(Arc::new(value));
        let sequence = state.sequence;
        drop(state);
        self.inner.updated.notify_all();
        Ok(sequence)
    }

    /// The current value and its sequence, if anything was published
    pub fn latest(&self) -> Option<(u64, Arc<T>)> {
        let state = self.inner.state.lock();
        state
            .latest
            .as_ref()
            .map(|value| (state.sequence, Arc::clone(value)))
    }

    /// Wait until a value newer than `seen` is published.
    ///
    /// Returns `None` on timeout or once the slot is closed.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, Arc<T>)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if state.sequence > seen {
                if let Some(value) = &state.latest {
                    return Some((state.sequence, Arc::clone(value)));
                }
            }
            if state.closed {
                return None;
            }
            if self
                .inner
                .updated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return None;
            }
        }
    }

    /// Stop accepting values and release every waiting subscriber
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.updated.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

/// Publishes a copy of every frame into a [`LatestFrameSlot`]
pub struct SlotSink {
    slot: LatestFrameSlot<PixelSurface>,
}

impl SlotSink {
    pub fn new(slot: LatestFrameSlot<PixelSurface>) -> Self {
        Self { slot }
    }
}

impl FrameSink for SlotSink {
    fn deliver(&mut self, frame: &PixelSurface) -> CaptureResult<()> {
        self.slot.publish(frame.clone()).map(|_| ())
    }
}

/// Fan-out slot for encoded frames, e.g. for an MJPEG server
pub type LatestEncodedSlot = LatestFrameSlot<Bytes>;

/// Receives encoded frames
pub trait EncodedSink {
    fn deliver_encoded(&mut self, data: Bytes) -> CaptureResult<()>;
}

impl EncodedSink for LatestEncodedSlot {
    fn deliver_encoded(&mut self, data: Bytes) -> CaptureResult<()> {
        self.publish(data).map(|_| ())
    }
}

impl EncodedSink for Sender<Bytes> {
    fn deliver_encoded(&mut self, data: Bytes) -> CaptureResult<()> {
        self.send(data).map_err(|_| CaptureError::SinkClosed)
    }
}

#[cfg(feature = "jpeg")]
pub use jpeg::JpegSink;

#[cfg(feature = "jpeg")]
mod jpeg {
    use bytes::Bytes;
    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    use super::{EncodedSink, FrameSink};
    use crate::convert::global_converter;
    use crate::error::{CaptureError, CaptureResult};
    use crate::types::PixelSurface;

    /// Encodes frames as baseline JPEG and forwards the bytes.
    pub struct JpegSink<S> {
        inner: S,
        quality: u8,
        rgb: Vec<u8>,
        last_encoded_len: usize,
    }

    impl<S: EncodedSink> JpegSink<S> {
        pub const DEFAULT_QUALITY: u8 = 75;

        pub fn new(inner: S) -> Self {
            Self::with_quality(inner, Self::DEFAULT_QUALITY)
        }

        /// `quality` is clamped to 1-100
        pub fn with_quality(inner: S, quality: u8) -> Self {
            Self {
                inner,
                quality: quality.clamp(1, 100),
                rgb: Vec::new(),
                last_encoded_len: 0,
            }
        }

        pub fn quality(&self) -> u8 {
            self.quality
        }

        pub fn inner(&self) -> &S {
            &self.inner
        }

        pub fn encode(&mut self, frame: &PixelSurface) -> CaptureResult<Bytes> {
            let (width, height) = frame.size();
            self.rgb.resize(width as usize * height as usize * 3, 0);
            global_converter().rgba_to_rgb(frame.data(), &mut self.rgb);

            let mut out = Vec::with_capacity(self.last_encoded_len);
            JpegEncoder::new_with_quality(&mut out, self.quality)
                .encode(&self.rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| CaptureError::Sink(format!("JPEG encode failed: {}", e)))?;
            self.last_encoded_len = out.len();
            Ok(Bytes::from(out))
        }
    }

    impl<S: EncodedSink> FrameSink for JpegSink<S> {
        fn deliver(&mut self, frame: &PixelSurface) -> CaptureResult<()> {
            let encoded = self.encode(frame)?;
            self.inner.deliver_encoded(encoded)
        }
    }
}
