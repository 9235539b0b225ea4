//! Multi-display streaming: one dedicated capture thread per display
//!
//! Each worker owns its device, duplication and staging surface for its whole
//! life. Nothing GPU-related crosses threads; the only shared state is the
//! cancellation flag and the per-display statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};
use parking_lot::Mutex;

use crate::capture::traits::GpuDevice;
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::capture_loop::{CaptureLoop, LoopOutcome, LoopStats};
use crate::sink::FrameSink;
use crate::types::CaptureConfig;

/// Shared stop flag for a set of capture workers
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn as_flag(&self) -> &AtomicBool {
        &self.0
    }
}

/// Streaming pipeline configuration
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Output indices to capture, one worker each
    pub displays: Vec<usize>,
    /// Template applied to every worker; `display_index` is overwritten
    pub capture: CaptureConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            displays: vec![0],
            capture: CaptureConfig::default(),
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> CaptureResult<()> {
        if self.displays.is_empty() {
            return Err(CaptureError::InvalidConfiguration(
                "at least one display is required".to_string(),
            ));
        }
        let mut seen = self.displays.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.displays.len() {
            return Err(CaptureError::InvalidConfiguration(
                "each display may only be captured once".to_string(),
            ));
        }
        self.capture.validate()
    }

    fn worker_config(&self, display_index: usize) -> CaptureConfig {
        CaptureConfig {
            display_index,
            ..self.capture.clone()
        }
    }
}

struct Worker {
    display_index: usize,
    handle: JoinHandle<LoopOutcome>,
}

#[derive(Default)]
struct RunState {
    cancel: CancellationToken,
    workers: Vec<Worker>,
}

/// Runs one [`CaptureLoop`] per configured display on its own OS thread.
pub struct StreamingPipeline {
    config: StreamingConfig,
    run: Mutex<RunState>,
    stats: Arc<Mutex<BTreeMap<usize, Arc<Mutex<LoopStats>>>>>,
}

impl StreamingPipeline {
    pub fn new(config: StreamingConfig) -> CaptureResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            run: Mutex::new(RunState::default()),
            stats: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Start capturing with the platform's duplication backend.
    ///
    /// `make_sink` is called once per display on the calling thread.
    #[cfg(windows)]
    pub fn start<MS, S>(&self, make_sink: MS) -> CaptureResult<()>
    where
        MS: FnMut(usize) -> S,
        S: FrameSink + Send + 'static,
    {
        use crate::capture::windows::enable_thread_dpi_awareness;
        use crate::capture::PlatformDevice;

        let dpi_aware = self.config.capture.dpi_aware;
        self.start_with_device(
            move |_display_index| {
                if dpi_aware {
                    enable_thread_dpi_awareness();
                }
                PlatformDevice::new()
            },
            make_sink,
        )
    }

    /// Desktop Duplication only exists on Windows.
    #[cfg(not(windows))]
    pub fn start<MS, S>(&self, _make_sink: MS) -> CaptureResult<()>
    where
        MS: FnMut(usize) -> S,
        S: FrameSink + Send + 'static,
    {
        Err(CaptureError::PlatformError(
            "Desktop Duplication requires Windows".to_string(),
        ))
    }

    /// Start capturing with a caller-supplied device.
    ///
    /// `open_device` runs on each worker thread, so the device is created on
    /// the thread that will use it.
    pub fn start_with_device<F, D, MS, S>(&self, open_device: F, mut make_sink: MS) -> CaptureResult<()>
    where
        F: Fn(usize) -> CaptureResult<D> + Send + Sync + 'static,
        D: GpuDevice + 'static,
        MS: FnMut(usize) -> S,
        S: FrameSink + Send + 'static,
    {
        let mut run = self.run.lock();
        if !run.workers.is_empty() {
            return Err(CaptureError::InvalidConfiguration(
                "Pipeline already running".to_string(),
            ));
        }
        run.cancel = CancellationToken::new();

        let open_device = Arc::new(open_device);
        for &display_index in &self.config.displays {
            let config = self.config.worker_config(display_index);
            let sink = make_sink(display_index);
            let open_device = Arc::clone(&open_device);
            let cancel = run.cancel.clone();
            let shared = Arc::new(Mutex::new(LoopStats::default()));
            self.stats.lock().insert(display_index, Arc::clone(&shared));

            let spawned = thread::Builder::new()
                .name(format!("capture-display-{}", display_index))
                .spawn(move || {
                    let device = match open_device(display_index) {
                        Ok(device) => device,
                        Err(e) => {
                            error!("display {}: could not open device: {}", display_index, e);
                            return LoopOutcome::failed(display_index, e);
                        }
                    };
                    match CaptureLoop::new(device, sink, config) {
                        Ok(capture_loop) => capture_loop
                            .with_shared_stats(shared)
                            .run(cancel.as_flag()),
                        Err(e) => LoopOutcome::failed(display_index, e),
                    }
                });

            match spawned {
                Ok(handle) => run.workers.push(Worker {
                    display_index,
                    handle,
                }),
                Err(e) => {
                    // already-started workers must not outlive a failed start
                    run.cancel.cancel();
                    return Err(CaptureError::IoError(e));
                }
            }
        }

        info!(
            "streaming started for displays {:?}",
            self.config.displays
        );
        Ok(())
    }

    /// Signal every worker to stop at its next check point
    pub fn stop(&self) {
        self.run.lock().cancel.cancel();
    }

    /// Whether any worker is still running
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .workers
            .iter()
            .any(|w| !w.handle.is_finished())
    }

    /// Wait for every worker to finish and collect their outcomes.
    ///
    /// Does not stop the workers; call [`StreamingPipeline::stop`] first
    /// unless they are expected to end on their own.
    pub fn join(&self) -> Vec<LoopOutcome> {
        let workers = std::mem::take(&mut self.run.lock().workers);
        workers
            .into_iter()
            .map(|worker| {
                worker.handle.join().unwrap_or_else(|_| {
                    LoopOutcome::failed(
                        worker.display_index,
                        CaptureError::Other(anyhow::anyhow!("capture worker panicked")),
                    )
                })
            })
            .collect()
    }

    /// Latest published statistics per display
    pub fn stats(&self) -> BTreeMap<usize, LoopStats> {
        self.stats
            .lock()
            .iter()
            .map(|(&display, stats)| (display, stats.lock().clone()))
            .collect()
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// Builder for streaming pipeline
pub struct StreamingPipelineBuilder {
    config: StreamingConfig,
}

impl StreamingPipelineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: StreamingConfig::default(),
        }
    }

    /// Capture exactly these displays
    pub fn displays(mut self, displays: impl IntoIterator<Item = usize>) -> Self {
        self.config.displays = displays.into_iter().collect();
        self
    }

    /// Set target FPS
    pub fn target_fps(mut self, fps: u32) -> Self {
        self.config.capture.target_fps = fps;
        self
    }

    /// Set the frame acquisition timeout
    pub fn acquire_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.config.capture.acquire_timeout_ms = timeout_ms;
        self
    }

    pub fn draw_cursor(mut self, enabled: bool) -> Self {
        self.config.capture.draw_cursor = enabled;
        self
    }

    pub fn use_dirty_rects(mut self, enabled: bool) -> Self {
        self.config.capture.use_dirty_rects = enabled;
        self
    }

    pub fn dpi_aware(mut self, enabled: bool) -> Self {
        self.config.capture.dpi_aware = enabled;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> CaptureResult<StreamingPipeline> {
        StreamingPipeline::new(self.config)
    }
}

impl Default for StreamingPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
