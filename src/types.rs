//! Core types shared by the capture session, cursor compositor and pipeline

use std::fmt;
use std::time::Duration;

use crate::error::{CaptureError, CaptureResult};

/// Information about a display/monitor
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayInfo {
    /// Display index (0-based, output order on the adapter)
    pub index: usize,
    /// Device name, e.g. `\\.\DISPLAY1`
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// X offset on the virtual desktop
    pub x: i32,
    /// Y offset on the virtual desktop
    pub y: i32,
    /// Whether this is the primary display
    pub is_primary: bool,
}

impl DisplayInfo {
    /// Get the display bounds as a rectangle
    pub fn bounds(&self) -> Rectangle {
        Rectangle {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Byte order of a 32-bit texture or surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Red, Green, Blue, Alpha (8 bits per channel)
    RGBA8,
    /// Blue, Green, Red, Alpha (8 bits per channel)
    BGRA8,
}

impl PixelFormat {
    /// Whether bytes in this format must be swapped to become RGBA
    pub fn needs_swizzle(&self) -> bool {
        matches!(self, PixelFormat::BGRA8)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::RGBA8 => write!(f, "RGBA8"),
            PixelFormat::BGRA8 => write!(f, "BGRA8"),
        }
    }
}

/// Row pitch of a 32bpp staging row, DWORD aligned.
pub fn staging_row_pitch(width: u32) -> usize {
    ((width as usize * 32 + 31) / 32) * 4
}

/// A tightly packed RGBA frame buffer.
///
/// Rows are `width * 4` bytes with no padding. The shape only changes through
/// [`PixelSurface::resize`], which the capture loop calls on a mode change.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for PixelSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelSurface {
    /// Create a zeroed (fully transparent) surface
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes per row (always `width * 4`)
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a row of pixels
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride();
        self.data.get(start..start + self.stride())
    }

    /// Get a pixel at the given coordinates
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * 4;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Write a pixel; out-of-bounds writes are ignored
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = y as usize * self.stride() + x as usize * 4;
        self.data[offset..offset + 4].copy_from_slice(&rgba);
    }

    /// Fill every pixel with one color
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Reshape the surface, reusing the allocation. Contents are zeroed.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width as usize * height as usize * 4, 0);
    }

    /// Copy rows from a pitched source buffer into this surface.
    ///
    /// `src_pitch` is the byte distance between source rows and must be at
    /// least `width * 4`; padding at the end of each source row is skipped.
    pub fn copy_from_pitched(&mut self, src: &[u8], src_pitch: usize) -> CaptureResult<()> {
        let row_bytes = self.stride();
        if self.height == 0 || row_bytes == 0 {
            return Ok(());
        }
        if src_pitch < row_bytes {
            return Err(CaptureError::BufferTooSmall {
                required: row_bytes,
                provided: src_pitch,
            });
        }

        let required = src_pitch * (self.height as usize - 1) + row_bytes;
        if src.len() < required {
            return Err(CaptureError::BufferTooSmall {
                required,
                provided: src.len(),
            });
        }

        if src_pitch == row_bytes {
            let len = self.data.len();
            self.data.copy_from_slice(&src[..len]);
        } else {
            for (dst_row, src_row) in self
                .data
                .chunks_exact_mut(row_bytes)
                .zip(src.chunks(src_pitch))
            {
                dst_row.copy_from_slice(&src_row[..row_bytes]);
            }
        }
        Ok(())
    }
}

/// Rectangle structure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from edge coordinates; inverted edges give an empty rectangle
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            x: left,
            y: top,
            width: (right - left).max(0) as u32,
            height: (bottom - top).max(0) as u32,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Overlap of two rectangles, if any
    pub fn intersect(&self, other: &Rectangle) -> Option<Rectangle> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Rectangle::from_edges(left, top, right, bottom))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A region that moved since the previous frame: the pixels now at
/// `destination` came from `source` (the destination's top-left before the move).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveRect {
    pub source: Point,
    pub destination: Rectangle,
}

/// Current mode of a duplicated output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// The desktop image can be mapped directly, bypassing GPU staging
    pub desktop_image_in_system_memory: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerPosition {
    pub position: Point,
    pub visible: bool,
}

/// Metadata returned with each acquired frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub last_present_time: i64,
    /// Non-zero when the pointer moved or changed shape with this frame
    pub last_mouse_update_time: i64,
    /// Desktop updates folded into this frame; zero means only the pointer changed
    pub accumulated_frames: u32,
    /// Bytes of dirty/move rect metadata available; zero means none
    pub total_metadata_buffer_size: u32,
    pub pointer_position: PointerPosition,
    /// Non-zero when a new pointer shape is available
    pub pointer_shape_buffer_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerShapeType {
    Monochrome,
    Color,
    MaskedColor,
    Unknown(u32),
}

impl PointerShapeType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => PointerShapeType::Monochrome,
            2 => PointerShapeType::Color,
            4 => PointerShapeType::MaskedColor,
            other => PointerShapeType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerShapeInfo {
    pub shape_type: PointerShapeType,
    /// Width in pixels
    pub width: u32,
    /// Height of the raw buffer in rows; monochrome shapes stack two masks
    pub height: u32,
    /// Bytes per raw row
    pub pitch: u32,
    pub hot_spot: Point,
}

/// How the bytes of a new frame reached the caller's surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPath {
    /// The desktop image was mapped directly from system memory
    SystemMemory,
    /// Only the listed number of dirty regions were copied to staging
    DirtyRegions(usize),
    /// The whole frame was copied to staging
    FullFrame,
}

/// Outcome of one `capture_into` call that is not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The surface holds a complete new frame
    NewFrame(CopyPath),
    /// Nothing changed since the last call; the surface is untouched
    NoNewFrame,
    /// The output mode no longer matches the surface
    ResizeRequired { width: u32, height: u32 },
}

impl FrameStatus {
    pub fn is_new_frame(&self) -> bool {
        matches!(self, FrameStatus::NewFrame(_))
    }
}

/// Per-display capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Output index on the adapter
    pub display_index: usize,
    /// Frames per second the loop is paced to
    pub target_fps: u32,
    /// Timeout handed to each frame acquisition; 0 polls
    pub acquire_timeout_ms: u32,
    /// Composite the pointer onto delivered frames
    pub draw_cursor: bool,
    /// Copy only dirty regions to staging when metadata allows
    pub use_dirty_rects: bool,
    /// Opt the worker thread into per-monitor DPI awareness
    pub dpi_aware: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display_index: 0,
            target_fps: 30,
            acquire_timeout_ms: 0,
            draw_cursor: true,
            use_dirty_rects: true,
            dpi_aware: true,
        }
    }
}

impl CaptureConfig {
    pub const MAX_FPS: u32 = 1000;

    /// Interval between frame boundaries
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.target_fps.max(1)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> CaptureResult<()> {
        if self.target_fps == 0 || self.target_fps > Self::MAX_FPS {
            return Err(CaptureError::InvalidConfiguration(format!(
                "target_fps must be 1-{}, got {}",
                Self::MAX_FPS,
                self.target_fps
            )));
        }
        Ok(())
    }
}
