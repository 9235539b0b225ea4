//! In-memory duplication backend for driving sessions and loops on any OS.
//!
//! A `FakeDisplay` owns a desktop image and a script of frames. Each acquired
//! frame paints its rectangles onto the desktop and hands out a snapshot as
//! the frame texture, so copy-out can be checked pixel by pixel.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use dxgi_screen_stream::capture::{
    BufferQuery, GpuDevice, MappedView, OutputDuplication, TextureDesc,
};
use dxgi_screen_stream::error::{hresult, PlatformError, PlatformResult};
use dxgi_screen_stream::types::{
    FrameInfo, MoveRect, OutputDesc, PixelFormat, Point, PointerPosition, PointerShapeInfo,
    Rectangle,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One scripted frame
#[derive(Debug, Clone, Default)]
pub struct ScriptedFrame {
    pub accumulated_frames: u32,
    /// Rectangles painted onto the desktop before the snapshot, in native byte order
    pub paint: Vec<(Rectangle, [u8; 4])>,
    pub dirty: Vec<Rectangle>,
    pub moved: Vec<MoveRect>,
    pub pointer: Option<PointerPosition>,
    pub shape: Option<(PointerShapeInfo, Vec<u8>)>,
    /// Deliver a texture of this size instead of the desktop's
    pub texture_size: Option<(u32, u32)>,
}

impl ScriptedFrame {
    pub fn new() -> Self {
        Self {
            accumulated_frames: 1,
            ..Default::default()
        }
    }

    pub fn paint(mut self, rect: Rectangle, pixel: [u8; 4]) -> Self {
        self.paint.push((rect, pixel));
        self
    }

    /// Paint and report the same rectangle as dirty
    pub fn dirty(mut self, rect: Rectangle, pixel: [u8; 4]) -> Self {
        self.paint.push((rect, pixel));
        self.dirty.push(rect);
        self
    }

    pub fn moved(mut self, source: Point, destination: Rectangle) -> Self {
        self.moved.push(MoveRect {
            source,
            destination,
        });
        self
    }

    pub fn pointer(mut self, x: i32, y: i32, shape: Option<(PointerShapeInfo, Vec<u8>)>) -> Self {
        self.pointer = Some(PointerPosition {
            position: Point::new(x, y),
            visible: true,
        });
        self.shape = shape;
        self
    }

    pub fn texture_size(mut self, width: u32, height: u32) -> Self {
        self.texture_size = Some((width, height));
        self
    }

    pub fn accumulated(mut self, frames: u32) -> Self {
        self.accumulated_frames = frames;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Frame(ScriptedFrame),
    Timeout,
    /// AcquireNextFrame fails with this HRESULT
    Error(i32),
}

/// Everything the fake backend did
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub acquires: usize,
    pub releases: usize,
    pub duplications: usize,
    pub staging_created: usize,
    pub full_copies: usize,
    pub region_copies: Vec<Rectangle>,
    pub dirty_queries: usize,
    pub pointer_queries: usize,
    pub desktop_maps: usize,
}

#[derive(Debug)]
pub struct DisplayState {
    pub size: (u32, u32),
    pub format: PixelFormat,
    pub system_memory: bool,
    /// Extra bytes at the end of every staging and desktop row
    pub pitch_padding: usize,
    pub desktop: Vec<u8>,
    pub script: VecDeque<Scripted>,
    /// HRESULTs returned by successive `duplicate_output` calls
    pub duplicate_errors: VecDeque<i32>,
    /// HRESULTs returned by successive `create_staging` calls
    pub staging_errors: VecDeque<i32>,
    /// HRESULTs returned by successive `release_frame` calls; the frame stays held
    pub release_errors: VecDeque<i32>,
    pub counters: Counters,
}

/// Shared handle to one fake output; clones observe the same state.
#[derive(Debug, Clone)]
pub struct FakeDisplay {
    pub state: Arc<Mutex<DisplayState>>,
}

impl FakeDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(DisplayState {
                size: (width, height),
                format: PixelFormat::BGRA8,
                system_memory: false,
                pitch_padding: 0,
                desktop: vec![0; width as usize * height as usize * 4],
                script: VecDeque::new(),
                duplicate_errors: VecDeque::new(),
                staging_errors: VecDeque::new(),
                release_errors: VecDeque::new(),
                counters: Counters::default(),
            })),
        }
    }

    pub fn with_format(self, format: PixelFormat) -> Self {
        self.state.lock().format = format;
        self
    }

    pub fn with_pitch_padding(self, padding: usize) -> Self {
        self.state.lock().pitch_padding = padding;
        self
    }

    pub fn in_system_memory(self) -> Self {
        self.state.lock().system_memory = true;
        self
    }

    pub fn push(&self, step: Scripted) {
        self.state.lock().script.push_back(step);
    }

    pub fn push_frame(&self, frame: ScriptedFrame) {
        self.push(Scripted::Frame(frame));
    }

    /// Change the mode; the desktop is cleared
    pub fn set_size(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.size = (width, height);
        state.desktop = vec![0; width as usize * height as usize * 4];
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().counters.clone()
    }

    pub fn script_len(&self) -> usize {
        self.state.lock().script.len()
    }

    pub fn device(&self) -> FakeDevice {
        FakeDevice {
            display: self.clone(),
        }
    }
}

#[derive(Debug)]
pub struct FakeTexture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Tightly packed rows
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct FakeStaging {
    pub desc: TextureDesc,
    pub pitch: usize,
    pub data: RefCell<Vec<u8>>,
}

pub struct FakeDevice {
    pub display: FakeDisplay,
}

impl GpuDevice for FakeDevice {
    type Texture = FakeTexture;
    type Staging = FakeStaging;
    type Duplication = FakeDuplication;

    fn duplicate_output(&self, _output_index: usize) -> PlatformResult<FakeDuplication> {
        let mut state = self.display.state.lock();
        if let Some(hr) = state.duplicate_errors.pop_front() {
            return Err(PlatformError::new(hr, "DuplicateOutput"));
        }
        state.counters.duplications += 1;
        Ok(FakeDuplication {
            display: self.display.clone(),
            held: None,
        })
    }

    fn texture_desc(&self, texture: &FakeTexture) -> PlatformResult<TextureDesc> {
        Ok(TextureDesc {
            width: texture.width,
            height: texture.height,
            format: texture.format,
        })
    }

    fn create_staging(&self, desc: &TextureDesc) -> PlatformResult<FakeStaging> {
        let mut state = self.display.state.lock();
        if let Some(hr) = state.staging_errors.pop_front() {
            return Err(PlatformError::new(hr, "CreateTexture2D"));
        }
        state.counters.staging_created += 1;
        let pitch = desc.width as usize * 4 + state.pitch_padding;
        Ok(FakeStaging {
            desc: *desc,
            pitch,
            // padding bytes are poisoned so a pitch bug shows up in the output
            data: RefCell::new(vec![0xEE; pitch * desc.height as usize]),
        })
    }

    fn copy_region(&self, dst: &FakeStaging, src: &FakeTexture, region: Rectangle) {
        self.display.state.lock().counters.region_copies.push(region);
        copy_rect(dst, src, region);
    }

    fn copy_full(&self, dst: &FakeStaging, src: &FakeTexture) {
        self.display.state.lock().counters.full_copies += 1;
        copy_rect(dst, src, Rectangle::new(0, 0, src.width, src.height));
    }

    fn read_staging<R>(
        &self,
        staging: &FakeStaging,
        read: impl FnOnce(MappedView<'_>) -> R,
    ) -> PlatformResult<R> {
        let data = staging.data.borrow();
        Ok(read(MappedView {
            data: &data,
            pitch: staging.pitch,
        }))
    }
}

fn copy_rect(dst: &FakeStaging, src: &FakeTexture, region: Rectangle) {
    let mut data = dst.data.borrow_mut();
    let src_stride = src.width as usize * 4;
    for y in region.y as usize..region.bottom() as usize {
        let s = y * src_stride + region.x as usize * 4;
        let d = y * dst.pitch + region.x as usize * 4;
        let len = region.width as usize * 4;
        data[d..d + len].copy_from_slice(&src.data[s..s + len]);
    }
}

pub struct FakeDuplication {
    display: FakeDisplay,
    held: Option<ScriptedFrame>,
}

impl OutputDuplication for FakeDuplication {
    type Texture = FakeTexture;

    fn desc(&self) -> PlatformResult<OutputDesc> {
        let state = self.display.state.lock();
        Ok(OutputDesc {
            width: state.size.0,
            height: state.size.1,
            format: state.format,
            desktop_image_in_system_memory: state.system_memory,
        })
    }

    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> PlatformResult<(FrameInfo, FakeTexture)> {
        if self.held.is_some() {
            return Err(PlatformError::new(
                hresult::DXGI_ERROR_INVALID_CALL,
                "AcquireNextFrame while a frame is held",
            ));
        }

        let mut state = self.display.state.lock();
        let frame = match state.script.pop_front() {
            Some(Scripted::Frame(frame)) => frame,
            Some(Scripted::Error(hr)) => return Err(PlatformError::new(hr, "AcquireNextFrame")),
            Some(Scripted::Timeout) | None => {
                return Err(PlatformError::new(
                    hresult::DXGI_ERROR_WAIT_TIMEOUT,
                    "AcquireNextFrame",
                ))
            }
        };
        state.counters.acquires += 1;

        let (width, height) = state.size;
        for (rect, pixel) in &frame.paint {
            for y in rect.y.max(0) as u32..(rect.bottom().max(0) as u32).min(height) {
                for x in rect.x.max(0) as u32..(rect.right().max(0) as u32).min(width) {
                    let i = (y as usize * width as usize + x as usize) * 4;
                    state.desktop[i..i + 4].copy_from_slice(pixel);
                }
            }
        }

        let texture = match frame.texture_size {
            Some((w, h)) if (w, h) != (width, height) => FakeTexture {
                width: w,
                height: h,
                format: state.format,
                data: vec![0; w as usize * h as usize * 4],
            },
            _ => FakeTexture {
                width,
                height,
                format: state.format,
                data: state.desktop.clone(),
            },
        };

        let metadata = frame.dirty.len() * std::mem::size_of::<Rectangle>()
            + frame.moved.len() * std::mem::size_of::<MoveRect>();
        let info = FrameInfo {
            last_present_time: if frame.accumulated_frames > 0 { 1 } else { 0 },
            last_mouse_update_time: if frame.pointer.is_some() { 1 } else { 0 },
            accumulated_frames: frame.accumulated_frames,
            total_metadata_buffer_size: metadata as u32,
            pointer_position: frame.pointer.unwrap_or_default(),
            pointer_shape_buffer_size: frame.shape.as_ref().map_or(0, |(_, raw)| raw.len() as u32),
        };

        drop(state);
        self.held = Some(frame);
        Ok((info, texture))
    }

    fn release_frame(&mut self) -> PlatformResult<()> {
        if self.held.is_none() {
            return Err(PlatformError::new(
                hresult::DXGI_ERROR_INVALID_CALL,
                "ReleaseFrame without a held frame",
            ));
        }
        let mut state = self.display.state.lock();
        if let Some(hr) = state.release_errors.pop_front() {
            return Err(PlatformError::new(hr, "ReleaseFrame"));
        }
        self.held = None;
        state.counters.releases += 1;
        Ok(())
    }

    fn frame_move_rects(&mut self, buffer: &mut [MoveRect]) -> PlatformResult<BufferQuery<usize>> {
        let moved = self.held_frame("GetFrameMoveRects")?.moved.clone();
        if buffer.len() < moved.len() {
            return Ok(BufferQuery::TooSmall {
                required: moved.len(),
            });
        }
        buffer[..moved.len()].copy_from_slice(&moved);
        Ok(BufferQuery::Filled(moved.len()))
    }

    fn frame_dirty_rects(&mut self, buffer: &mut [Rectangle]) -> PlatformResult<BufferQuery<usize>> {
        let dirty = self.held_frame("GetFrameDirtyRects")?.dirty.clone();
        self.display.state.lock().counters.dirty_queries += 1;
        if buffer.len() < dirty.len() {
            return Ok(BufferQuery::TooSmall {
                required: dirty.len(),
            });
        }
        buffer[..dirty.len()].copy_from_slice(&dirty);
        Ok(BufferQuery::Filled(dirty.len()))
    }

    fn frame_pointer_shape(
        &mut self,
        buffer: &mut [u8],
    ) -> PlatformResult<BufferQuery<PointerShapeInfo>> {
        let shape = self.held_frame("GetFramePointerShape")?.shape.clone();
        self.display.state.lock().counters.pointer_queries += 1;
        let Some((info, raw)) = shape else {
            return Err(PlatformError::new(
                hresult::DXGI_ERROR_INVALID_CALL,
                "GetFramePointerShape",
            ));
        };
        if buffer.len() < raw.len() {
            return Ok(BufferQuery::TooSmall {
                required: raw.len(),
            });
        }
        buffer[..raw.len()].copy_from_slice(&raw);
        Ok(BufferQuery::Filled(info))
    }

    fn with_desktop_surface<R>(
        &mut self,
        read: impl FnOnce(MappedView<'_>) -> R,
    ) -> PlatformResult<R> {
        self.held_frame("MapDesktopSurface")?;
        let mut state = self.display.state.lock();
        state.counters.desktop_maps += 1;

        let stride = state.size.0 as usize * 4;
        let pitch = stride + state.pitch_padding;
        let mut mapped = vec![0xEE; pitch * state.size.1 as usize];
        for (dst, src) in mapped.chunks_exact_mut(pitch).zip(state.desktop.chunks_exact(stride)) {
            dst[..stride].copy_from_slice(src);
        }
        drop(state);

        Ok(read(MappedView {
            data: &mapped,
            pitch,
        }))
    }
}

impl FakeDuplication {
    fn held_frame(&self, context: &str) -> PlatformResult<&ScriptedFrame> {
        self.held
            .as_ref()
            .ok_or_else(|| PlatformError::new(hresult::DXGI_ERROR_INVALID_CALL, context))
    }
}
