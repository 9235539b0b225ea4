//! Duplication driver: frame acquisition, staging and copy-out

use std::ops::{Deref, DerefMut};

use log::{debug, info, warn};

use crate::capture::cursor::PointerState;
use crate::capture::regions::FrameRegions;
use crate::capture::traits::{GpuDevice, OutputDuplication, TextureDesc};
use crate::convert::global_converter;
use crate::error::{hresult, CaptureError, CaptureResult, ErrorClass, PlatformError};
use crate::types::{CaptureConfig, CopyPath, FrameInfo, FrameStatus, PixelSurface, Rectangle};

/// CPU-readable copy target sized to the current output mode.
struct StagingSurface<S> {
    handle: S,
    desc: TextureDesc,
    /// Holds a complete image, so dirty-region updates on top of it are valid
    primed: bool,
}

/// Owns one output's duplication, staging surface and per-frame scratch state.
///
/// A session is thread-affine and is driven by exactly one capture loop.
pub struct CaptureSession<D: GpuDevice> {
    device: D,
    output_index: usize,
    duplication: Option<D::Duplication>,
    staging: Option<StagingSurface<D::Staging>>,
    regions: FrameRegions,
    pointer: PointerState,
    frame_held: bool,
    draw_cursor: bool,
    use_dirty_rects: bool,
}

impl<D: GpuDevice> CaptureSession<D> {
    pub fn new(device: D, output_index: usize) -> Self {
        Self {
            device,
            output_index,
            duplication: None,
            staging: None,
            regions: FrameRegions::new(),
            pointer: PointerState::new(),
            frame_held: false,
            draw_cursor: true,
            use_dirty_rects: true,
        }
    }

    pub fn with_config(device: D, config: &CaptureConfig) -> Self {
        let mut session = Self::new(device, config.display_index);
        session.draw_cursor = config.draw_cursor;
        session.use_dirty_rects = config.use_dirty_rects;
        session
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    /// Mode size reported by the duplication, creating it if needed
    pub fn mode_size(&mut self) -> CaptureResult<(u32, u32)> {
        let desc = self
            .ensure_duplication()?
            .desc()
            .map_err(CaptureError::from_platform)?;
        Ok((desc.width, desc.height))
    }

    /// Size of the live staging surface, if any
    pub fn current_size(&self) -> Option<(u32, u32)> {
        self.staging
            .as_ref()
            .map(|s| (s.desc.width, s.desc.height))
    }

    pub fn has_duplication(&self) -> bool {
        self.duplication.is_some()
    }

    pub fn has_staging(&self) -> bool {
        self.staging.is_some()
    }

    pub fn is_frame_held(&self) -> bool {
        self.frame_held
    }

    pub fn pointer(&self) -> &PointerState {
        &self.pointer
    }

    pub fn regions(&self) -> &FrameRegions {
        &self.regions
    }

    /// Drop the duplication; the next capture recreates it.
    pub fn discard_duplication(&mut self) {
        if self.duplication.take().is_some() {
            debug!("display {}: duplication discarded", self.output_index);
        }
        // dropping the duplication implicitly ends any held frame
        self.frame_held = false;
        // frames consumed by the old duplication never reached staging
        if let Some(staging) = self.staging.as_mut() {
            staging.primed = false;
        }
    }

    /// Drop the staging surface; the next frame recreates it at the frame's size.
    pub fn discard_staging(&mut self) {
        if self.staging.take().is_some() {
            debug!("display {}: staging surface discarded", self.output_index);
        }
    }

    /// Drop both resolution-bound resources.
    pub fn reset_for_resize(&mut self) {
        self.discard_staging();
        self.discard_duplication();
    }

    fn ensure_duplication(&mut self) -> CaptureResult<&mut D::Duplication> {
        let duplication = match self.duplication.take() {
            Some(duplication) => duplication,
            None => {
                let duplication = self
                    .device
                    .duplicate_output(self.output_index)
                    .map_err(|e| output_error(self.output_index, e))?;
                info!("display {}: duplication created", self.output_index);
                duplication
            }
        };
        Ok(self.duplication.insert(duplication))
    }

    /// Produce the next frame into `surface`.
    ///
    /// On return no frame is held by the duplication, whatever the outcome.
    pub fn capture_into(
        &mut self,
        surface: &mut PixelSurface,
        timeout_ms: u32,
    ) -> CaptureResult<FrameStatus> {
        let result = self.capture_frame(surface, timeout_ms);
        if result.is_err() {
            if self.frame_held {
                // ReleaseFrame failed; the duplication's frame state is unknown
                warn!(
                    "display {}: frame could not be released, dropping duplication",
                    self.output_index
                );
                self.discard_duplication();
            }
            // a failed frame may have left staging partially updated
            if let Some(staging) = self.staging.as_mut() {
                staging.primed = false;
            }
        }
        result
    }

    fn capture_frame(
        &mut self,
        surface: &mut PixelSurface,
        timeout_ms: u32,
    ) -> CaptureResult<FrameStatus> {
        self.ensure_duplication()?;
        let Some(duplication) = self.duplication.as_mut() else {
            return Err(CaptureError::PlatformError(
                "duplication unavailable".to_string(),
            ));
        };

        let desc = duplication.desc().map_err(CaptureError::from_platform)?;

        if self.frame_held {
            duplication
                .release_frame()
                .map_err(CaptureError::from_platform)?;
            self.frame_held = false;
        }

        let (info, acquired) = match duplication.acquire_next_frame(timeout_ms) {
            Ok(acquired) => acquired,
            Err(e) if e.class() == ErrorClass::Timeout => return Ok(FrameStatus::NoNewFrame),
            Err(e) => return Err(CaptureError::from_platform(e)),
        };
        let mut frame = HeldFrame::new(duplication, &mut self.frame_held);
        // declared after the guard so it is dropped before the frame is released
        let texture = acquired;

        // pointer metadata is only valid for the frame that reported it
        if self.draw_cursor && info.last_mouse_update_time != 0 {
            self.pointer.update(&mut *frame, &info);
        }

        if info.accumulated_frames == 0 {
            drop(texture);
            frame.release().map_err(CaptureError::from_platform)?;
            return Ok(FrameStatus::NoNewFrame);
        }

        if desc.desktop_image_in_system_memory {
            if (desc.width, desc.height) != surface.size() {
                return Ok(FrameStatus::ResizeRequired {
                    width: desc.width,
                    height: desc.height,
                });
            }
            let copied = frame
                .with_desktop_surface(|view| surface.copy_from_pitched(view.data, view.pitch))
                .map_err(CaptureError::from_platform)?;
            drop(texture);
            frame.release().map_err(CaptureError::from_platform)?;
            copied?;

            if desc.format.needs_swizzle() {
                global_converter().swizzle_frame(surface.data_mut());
            }
            if self.draw_cursor {
                self.pointer.composite_onto(surface);
            }
            return Ok(FrameStatus::NewFrame(CopyPath::SystemMemory));
        }

        let texture_desc = self
            .device
            .texture_desc(&texture)
            .map_err(CaptureError::from_platform)?;
        if (texture_desc.width, texture_desc.height) != surface.size() {
            return Ok(FrameStatus::ResizeRequired {
                width: texture_desc.width,
                height: texture_desc.height,
            });
        }

        if self.staging.as_ref().is_some_and(|s| s.desc != texture_desc) {
            info!(
                "display {}: staging no longer matches frame, recreating",
                self.output_index
            );
            self.staging = None;
        }
        let staging = match self.staging.take() {
            Some(staging) => staging,
            None => {
                let handle = self
                    .device
                    .create_staging(&texture_desc)
                    .map_err(CaptureError::from_resource)?;
                info!(
                    "display {}: staging surface created {}x{} {}",
                    self.output_index, texture_desc.width, texture_desc.height, texture_desc.format
                );
                StagingSurface {
                    handle,
                    desc: texture_desc,
                    primed: false,
                }
            }
        };
        let staging = self.staging.insert(staging);

        let path = copy_to_staging(
            &self.device,
            &mut self.regions,
            &mut frame,
            &texture,
            staging,
            &info,
            self.use_dirty_rects,
        )
        .map_err(CaptureError::from_platform)?;
        drop(texture);
        frame.release().map_err(CaptureError::from_platform)?;

        let copied = self
            .device
            .read_staging(&staging.handle, |view| {
                surface.copy_from_pitched(view.data, view.pitch)
            })
            .map_err(CaptureError::from_resource)?;
        copied?;

        if staging.desc.format.needs_swizzle() {
            global_converter().swizzle_frame(surface.data_mut());
        }
        if self.draw_cursor {
            self.pointer.composite_onto(surface);
        }

        debug!("display {}: new frame via {:?}", self.output_index, path);
        Ok(FrameStatus::NewFrame(path))
    }
}

/// A missing output is permanent for this worker; everything else goes
/// through the usual classification.
fn output_error(output_index: usize, err: PlatformError) -> CaptureError {
    if err.hresult == hresult::DXGI_ERROR_NOT_FOUND {
        CaptureError::DisplayNotFound(output_index)
    } else {
        CaptureError::from_platform(err)
    }
}

/// Issue the GPU copies for the held frame: dirty regions when the metadata and
/// the staging contents allow it, otherwise the whole frame.
fn copy_to_staging<D: GpuDevice>(
    device: &D,
    regions: &mut FrameRegions,
    frame: &mut HeldFrame<'_, D::Duplication>,
    texture: &D::Texture,
    staging: &mut StagingSurface<D::Staging>,
    info: &FrameInfo,
    use_dirty_rects: bool,
) -> Result<CopyPath, PlatformError> {
    regions.clear();
    if use_dirty_rects && info.total_metadata_buffer_size > 0 {
        regions.fetch(&mut **frame)?;

        if staging.primed && regions.moved().is_empty() {
            let bounds = Rectangle::new(0, 0, staging.desc.width, staging.desc.height);
            let mut copied = 0;
            for rect in regions.dirty() {
                if let Some(clipped) = rect.intersect(&bounds) {
                    device.copy_region(&staging.handle, texture, clipped);
                    copied += 1;
                }
            }
            return Ok(CopyPath::DirtyRegions(copied));
        }
        if !regions.moved().is_empty() {
            debug!(
                "{} moved rects, falling back to a full copy",
                regions.moved().len()
            );
        }
    }

    device.copy_full(&staging.handle, texture);
    staging.primed = true;
    Ok(CopyPath::FullFrame)
}

/// An acquired frame. Dropping it releases the frame back to the duplication.
struct HeldFrame<'a, T: OutputDuplication> {
    duplication: &'a mut T,
    held: &'a mut bool,
    finished: bool,
}

impl<'a, T: OutputDuplication> HeldFrame<'a, T> {
    fn new(duplication: &'a mut T, held: &'a mut bool) -> Self {
        *held = true;
        Self {
            duplication,
            held,
            finished: false,
        }
    }

    /// Release explicitly so the caller sees the failure. A failed release
    /// leaves the frame marked held.
    fn release(mut self) -> Result<(), PlatformError> {
        self.finished = true;
        self.duplication.release_frame()?;
        *self.held = false;
        Ok(())
    }
}

impl<T: OutputDuplication> Deref for HeldFrame<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.duplication
    }
}

impl<T: OutputDuplication> DerefMut for HeldFrame<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.duplication
    }
}

impl<T: OutputDuplication> Drop for HeldFrame<'_, T> {
    fn drop(&mut self) {
        if self.finished || !*self.held {
            return;
        }
        match self.duplication.release_frame() {
            Ok(()) => *self.held = false,
            Err(e) => warn!("ReleaseFrame on early exit: {}", e),
        }
    }
}
