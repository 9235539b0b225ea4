//! Per-display capture loop: pacing, resize handling and failure recovery

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::capture::session::CaptureSession;
use crate::capture::traits::GpuDevice;
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::limiter::FrameLimiter;
use crate::sink::FrameSink;
use crate::types::{CaptureConfig, FrameStatus, PixelSurface};

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No tick has run yet; the surface is not sized
    Starting,
    Capturing,
    /// The duplication was dropped and is recreated on the next tick
    RecreatingDuplication,
    /// The staging surface was dropped and is recreated on the next frame
    RecreatingStaging,
    Stopped,
}

/// Counters for one display worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_delivered: u64,
    pub no_new_frame: u64,
    pub recoveries: u64,
    pub resizes: u64,
    pub sink_errors: u64,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Delivered,
    /// No new frame; nothing was handed to the sink
    Skipped,
    /// A resize or recoverable failure was handled; capture resumes next tick
    Recovering,
    /// The sink went away
    SinkClosed,
}

/// Final report of a finished worker
#[derive(Debug)]
pub struct LoopOutcome {
    pub display_index: usize,
    pub stats: LoopStats,
    /// The fatal error that stopped the worker, if any
    pub error: Option<CaptureError>,
}

impl LoopOutcome {
    pub fn failed(display_index: usize, error: CaptureError) -> Self {
        Self {
            display_index,
            stats: LoopStats::default(),
            error: Some(error),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives one [`CaptureSession`] and forwards new frames to a sink.
pub struct CaptureLoop<D: GpuDevice, S: FrameSink> {
    session: CaptureSession<D>,
    limiter: FrameLimiter,
    sink: S,
    surface: PixelSurface,
    config: CaptureConfig,
    state: LoopState,
    /// Mode size seen on the previous tick
    mode_size: Option<(u32, u32)>,
    stats: LoopStats,
    shared_stats: Option<Arc<Mutex<LoopStats>>>,
    window_start: Instant,
    window_frames: u64,
}

impl<D: GpuDevice, S: FrameSink> CaptureLoop<D, S> {
    pub fn new(device: D, sink: S, config: CaptureConfig) -> CaptureResult<Self> {
        config.validate()?;
        Ok(Self {
            session: CaptureSession::with_config(device, &config),
            limiter: FrameLimiter::new(config.target_fps),
            sink,
            surface: PixelSurface::new(0, 0),
            config,
            state: LoopState::Starting,
            mode_size: None,
            stats: LoopStats::default(),
            shared_stats: None,
            window_start: Instant::now(),
            window_frames: 0,
        })
    }

    /// Mirror the counters into `shared` once per second and on exit
    pub fn with_shared_stats(mut self, shared: Arc<Mutex<LoopStats>>) -> Self {
        self.shared_stats = Some(shared);
        self
    }

    pub fn display_index(&self) -> usize {
        self.config.display_index
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn session(&self) -> &CaptureSession<D> {
        &self.session
    }

    pub fn surface(&self) -> &PixelSurface {
        &self.surface
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run one iteration without pacing.
    ///
    /// `Err` is returned only for fatal failures, after which the loop is
    /// [`LoopState::Stopped`].
    pub fn tick(&mut self) -> CaptureResult<TickOutcome> {
        if self.state == LoopState::Stopped {
            return Err(CaptureError::PlatformError(format!(
                "display {}: capture loop already stopped",
                self.display_index()
            )));
        }

        // A mode change resizes once. Between mode changes the frame texture
        // decides the surface size, so the two never fight over it.
        let mode = match self.session.mode_size() {
            Ok(mode) => mode,
            Err(e) => return self.recover(e),
        };
        match self.mode_size.replace(mode) {
            None => {
                info!(
                    "display {}: capturing {}x{}",
                    self.display_index(),
                    mode.0,
                    mode.1
                );
                self.surface.resize(mode.0, mode.1);
                if self.state == LoopState::Starting {
                    self.state = LoopState::Capturing;
                }
            }
            Some(previous) if previous != mode => self.begin_resize(mode),
            Some(_) => {}
        }

        let status = match self
            .session
            .capture_into(&mut self.surface, self.config.acquire_timeout_ms)
        {
            Ok(status) => status,
            Err(e) => return self.recover(e),
        };

        match status {
            FrameStatus::NewFrame(_) => {
                self.state = LoopState::Capturing;
                self.deliver()
            }
            FrameStatus::NoNewFrame => {
                self.stats.no_new_frame += 1;
                if self.session.has_duplication() && self.state == LoopState::RecreatingDuplication {
                    self.state = LoopState::Capturing;
                }
                Ok(TickOutcome::Skipped)
            }
            FrameStatus::ResizeRequired { width, height } => {
                debug!(
                    "display {}: frame is {}x{}, mode is {}x{}",
                    self.display_index(),
                    width,
                    height,
                    mode.0,
                    mode.1
                );
                self.begin_resize((width, height));
                Ok(TickOutcome::Recovering)
            }
        }
    }

    /// Pace and tick until cancelled, the sink closes, or a fatal error.
    ///
    /// Every GPU resource held by the session is released before returning.
    pub fn run(&mut self, cancel: &AtomicBool) -> LoopOutcome {
        info!("display {}: capture loop started", self.display_index());
        self.limiter.reset();
        self.window_start = Instant::now();
        self.window_frames = 0;

        let mut failure = None;
        while !cancel.load(Ordering::Relaxed) {
            if !self.limiter.wait_cancellable(cancel) {
                break;
            }
            match self.tick() {
                Ok(TickOutcome::SinkClosed) => {
                    info!("display {}: sink closed", self.display_index());
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            self.report_throughput();
        }

        self.session.reset_for_resize();
        self.state = LoopState::Stopped;
        self.publish_stats();
        info!(
            "display {}: capture loop stopped after {} frames",
            self.display_index(),
            self.stats.frames_delivered
        );

        LoopOutcome {
            display_index: self.display_index(),
            stats: self.stats.clone(),
            error: failure,
        }
    }

    fn deliver(&mut self) -> CaptureResult<TickOutcome> {
        match self.sink.deliver(&self.surface) {
            Ok(()) => {
                self.stats.frames_delivered += 1;
                self.window_frames += 1;
                Ok(TickOutcome::Delivered)
            }
            Err(CaptureError::SinkClosed) => Ok(TickOutcome::SinkClosed),
            Err(e) => {
                self.stats.sink_errors += 1;
                warn!("display {}: sink rejected frame: {}", self.display_index(), e);
                Ok(TickOutcome::Skipped)
            }
        }
    }

    fn begin_resize(&mut self, (width, height): (u32, u32)) {
        info!(
            "display {}: output resized {}x{} -> {}x{}",
            self.display_index(),
            self.surface.width(),
            self.surface.height(),
            width,
            height
        );
        self.session.reset_for_resize();
        self.surface.resize(width, height);
        self.stats.resizes += 1;
        self.state = LoopState::RecreatingDuplication;
    }

    /// Apply the recovery policy for a failed tick.
    fn recover(&mut self, err: CaptureError) -> CaptureResult<TickOutcome> {
        match err {
            CaptureError::RecoverableDevice(_) => {
                warn!(
                    "display {}: {}; recreating duplication",
                    self.display_index(),
                    err
                );
                self.session.discard_duplication();
                self.state = LoopState::RecreatingDuplication;
            }
            CaptureError::ResourceCreation(_) | CaptureError::BufferTooSmall { .. } => {
                warn!(
                    "display {}: {}; recreating staging surface",
                    self.display_index(),
                    err
                );
                self.session.discard_staging();
                self.state = LoopState::RecreatingStaging;
            }
            err if err.is_recoverable() => {
                warn!("display {}: {}; retrying", self.display_index(), err);
            }
            err => {
                error!(
                    "display {}: stopping capture: {}",
                    self.display_index(),
                    err
                );
                self.state = LoopState::Stopped;
                return Err(err);
            }
        }
        self.stats.recoveries += 1;
        Ok(TickOutcome::Recovering)
    }

    fn report_throughput(&mut self) {
        if self.window_start.elapsed() < THROUGHPUT_WINDOW {
            return;
        }
        info!(
            "display {}: {} frames in 1s",
            self.display_index(),
            self.window_frames
        );
        debug!("display {}: {:?}", self.display_index(), self.stats);
        self.window_start = Instant::now();
        self.window_frames = 0;
        self.publish_stats();
    }

    fn publish_stats(&self) {
        if let Some(shared) = &self.shared_stats {
            *shared.lock() = self.stats.clone();
        }
    }
}
