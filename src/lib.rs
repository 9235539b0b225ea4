//! Desktop Duplication screen streaming
//!
//! Captures one or more displays through DXGI output duplication at a target
//! frame rate, copying only dirty regions when the duplication reports them,
//! compositing the pointer in software and handing RGBA frames to a
//! [`FrameSink`]. Each display runs on its own OS thread with its own device.
//!
//! # Example
//!
//! ```no_run
//! use dxgi_screen_stream::{ChannelSink, StreamingPipelineBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = StreamingPipelineBuilder::new()
//!     .displays([0])
//!     .target_fps(30)
//!     .build()?;
//!
//! let (sink, frames) = ChannelSink::new(0, 4);
//! let mut sink = Some(sink);
//! pipeline.start(move |_display| sink.take().expect("one display"))?;
//!
//! for frame in frames.iter().take(60) {
//!     println!("frame {} ({}x{})", frame.sequence, frame.surface.width(), frame.surface.height());
//! }
//! pipeline.stop();
//! for outcome in pipeline.join() {
//!     println!("display {}: {:?}", outcome.display_index, outcome.stats);
//! }
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod capture;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod types;

pub use capture::{CaptureSession, CursorCompositor, GpuDevice, OutputDuplication};
pub use error::{CaptureError, CaptureResult, ErrorClass, PlatformError, PlatformResult};
pub use pipeline::{
    CancellationToken, CaptureLoop, FrameLimiter, LoopOutcome, LoopState, LoopStats,
    StreamingConfig, StreamingPipeline, StreamingPipelineBuilder,
};
#[cfg(feature = "jpeg")]
pub use sink::JpegSink;
pub use sink::{
    CapturedFrame, ChannelSink, EncodedSink, FrameSink, LatestEncodedSlot, LatestFrameSlot,
    SlotSink,
};
pub use types::{
    CaptureConfig, CopyPath, DisplayInfo, FrameStatus, PixelFormat, PixelSurface, Rectangle,
};

/// Desktop-attached displays of the default adapter
#[cfg(windows)]
pub fn get_displays() -> CaptureResult<Vec<DisplayInfo>> {
    capture::windows::enumerate_displays()
}

/// One-shot GDI capture of a display, for when duplication is refused
#[cfg(windows)]
pub fn capture_display_gdi(display_index: usize) -> CaptureResult<PixelSurface> {
    let displays = get_displays()?;
    let display = displays
        .iter()
        .find(|d| d.index == display_index)
        .ok_or(CaptureError::DisplayNotFound(display_index))?;
    capture::windows::GdiCapturer::new().capture_display(display)
}

/// Library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Get library capabilities
pub fn capabilities() -> String {
    let mut caps = Vec::new();

    #[cfg(windows)]
    caps.push("Desktop Duplication".to_string());
    #[cfg(windows)]
    caps.push("GDI".to_string());

    let simd_caps = convert::global_converter().capabilities();
    if simd_caps != "None (scalar)" {
        caps.push(simd_caps);
    }

    #[cfg(feature = "parallel")]
    caps.push("Parallel".to_string());

    #[cfg(feature = "jpeg")]
    caps.push("JPEG".to_string());

    if caps.is_empty() {
        caps.push("Scalar".to_string());
    }
    caps.join(", ")
}
