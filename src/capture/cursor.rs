//! Pointer shape decoding and compositing

use log::{debug, warn};

use crate::capture::regions::fill_with_retry;
use crate::capture::traits::OutputDuplication;
use crate::error::{CaptureError, CaptureResult};
use crate::types::{FrameInfo, PixelSurface, Point, PointerShapeInfo, PointerShapeType, Rectangle};

const OPAQUE_WHITE: [u8; 4] = [255, 255, 255, 255];
const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];
const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Last known pointer placement and decoded sprite for one output.
#[derive(Debug, Default)]
pub struct PointerState {
    position: Point,
    visible: bool,
    shape_buffer: Vec<u8>,
    sprite: Option<PixelSurface>,
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The decoded RGBA sprite, if a supported shape has been delivered
    pub fn sprite(&self) -> Option<&PixelSurface> {
        self.sprite.as_ref()
    }

    /// Apply pointer metadata from the frame that reported it.
    ///
    /// Shape failures clear the sprite and are logged; they never fail the frame.
    pub fn update<T: OutputDuplication>(&mut self, duplication: &mut T, info: &FrameInfo) {
        self.position = info.pointer_position.position;
        self.visible = info.pointer_position.visible;

        let shape_size = info.pointer_shape_buffer_size as usize;
        if shape_size == 0 {
            return;
        }
        if self.shape_buffer.len() < shape_size {
            self.shape_buffer.resize(shape_size, 0);
        }

        let decoded = fill_with_retry(&mut self.shape_buffer, "GetFramePointerShape", |buf| {
            duplication.frame_pointer_shape(buf)
        })
        .map_err(CaptureError::from_platform)
        .and_then(|shape| CursorCompositor::decode(&self.shape_buffer, &shape));

        match decoded {
            Ok(sprite) => {
                debug!("pointer shape {}x{}", sprite.width(), sprite.height());
                self.sprite = Some(sprite);
            }
            Err(e) => {
                warn!("Skipping pointer: {}", e);
                self.sprite = None;
            }
        }
    }

    /// Draw the pointer onto `surface` if it is visible and decoded
    pub fn composite_onto(&self, surface: &mut PixelSurface) {
        if !self.visible {
            return;
        }
        if let Some(sprite) = &self.sprite {
            CursorCompositor::composite(sprite, self.position, surface);
        }
    }
}

/// Decodes platform pointer shapes into RGBA sprites and blits them.
pub struct CursorCompositor;

impl CursorCompositor {
    /// Decode a raw shape buffer according to its reported type.
    pub fn decode(raw: &[u8], shape: &PointerShapeInfo) -> CaptureResult<PixelSurface> {
        match shape.shape_type {
            PointerShapeType::Monochrome => {
                Self::decode_monochrome(raw, shape.width, shape.height, shape.pitch as usize)
            }
            // The mask plane of masked-color shapes is not applied; the
            // bytes are taken as a plain color shape.
            PointerShapeType::Color | PointerShapeType::MaskedColor => {
                Self::decode_color(raw, shape.width, shape.height, shape.pitch as usize)
            }
            PointerShapeType::Unknown(raw_type) => Err(CaptureError::Decode(format!(
                "unsupported pointer shape type {}",
                raw_type
            ))),
        }
    }

    /// Decode an AND/XOR mask pair.
    ///
    /// `raw_height` counts both masks; the sprite is half as tall. Bits are
    /// MSB first within each byte.
    pub fn decode_monochrome(
        raw: &[u8],
        width: u32,
        raw_height: u32,
        pitch: usize,
    ) -> CaptureResult<PixelSurface> {
        if width == 0 || raw_height < 2 {
            return Err(CaptureError::Decode(format!(
                "empty monochrome shape {}x{}",
                width, raw_height
            )));
        }
        let height = raw_height / 2;
        let min_pitch = (width as usize).div_ceil(8);
        if pitch < min_pitch {
            return Err(CaptureError::Decode(format!(
                "monochrome pitch {} too small for width {}",
                pitch, width
            )));
        }
        let required = pitch * raw_height as usize;
        if raw.len() < required {
            return Err(CaptureError::Decode(format!(
                "monochrome shape needs {} bytes, got {}",
                required,
                raw.len()
            )));
        }

        let xor_offset = height as usize * pitch;
        let mut sprite = PixelSurface::new(width, height);
        for (y, dst_row) in sprite
            .data_mut()
            .chunks_exact_mut(width as usize * 4)
            .enumerate()
        {
            let and_row = &raw[y * pitch..y * pitch + min_pitch];
            let xor_row = &raw[xor_offset + y * pitch..xor_offset + y * pitch + min_pitch];
            for (x, dst) in dst_row.chunks_exact_mut(4).enumerate() {
                let bit = 0x80u8 >> (x % 8);
                let and = and_row[x / 8] & bit != 0;
                let xor = xor_row[x / 8] & bit != 0;
                let px = match (and, xor) {
                    (false, true) => OPAQUE_WHITE,
                    (true, true) => OPAQUE_BLACK,
                    (_, false) => TRANSPARENT,
                };
                dst.copy_from_slice(&px);
            }
        }
        Ok(sprite)
    }

    /// Copy a 32bpp BGRA shape row by row into an RGBA sprite.
    pub fn decode_color(
        raw: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> CaptureResult<PixelSurface> {
        if width == 0 || height == 0 {
            return Err(CaptureError::Decode(format!(
                "empty color shape {}x{}",
                width, height
            )));
        }
        let mut sprite = PixelSurface::new(width, height);
        sprite
            .copy_from_pitched(raw, pitch)
            .map_err(|e| CaptureError::Decode(format!("color shape: {}", e)))?;
        for px in sprite.data_mut().chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        Ok(sprite)
    }

    /// Write every sprite pixel with non-zero alpha onto `dest`, top-left at
    /// `position`. Parts falling outside `dest` are clipped.
    pub fn composite(sprite: &PixelSurface, position: Point, dest: &mut PixelSurface) {
        let placed = Rectangle::new(position.x, position.y, sprite.width(), sprite.height());
        let bounds = Rectangle::new(0, 0, dest.width(), dest.height());
        let Some(visible) = placed.intersect(&bounds) else {
            return;
        };

        let src_x = (visible.x - position.x) as usize;
        let src_y = (visible.y - position.y) as usize;
        let span = visible.width as usize * 4;
        let dest_stride = dest.stride();
        let sprite_stride = sprite.stride();

        for row in 0..visible.height as usize {
            let src_start = (src_y + row) * sprite_stride + src_x * 4;
            let dst_start = (visible.y as usize + row) * dest_stride + visible.x as usize * 4;
            let src = &sprite.data()[src_start..src_start + span];
            let dst = &mut dest.data_mut()[dst_start..dst_start + span];
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                if s[3] != 0 {
                    d.copy_from_slice(s);
                }
            }
        }
    }
}
