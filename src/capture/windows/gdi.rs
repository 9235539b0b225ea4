//! GDI BitBlt capture, used when desktop duplication is unavailable

use log::{debug, warn};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBITMAP, HDC,
    HGDIOBJ, SRCCOPY,
};

use crate::convert::global_converter;
use crate::error::{CaptureError, CaptureResult};
use crate::types::{DisplayInfo, PixelSurface, Rectangle};

/// Copies screen areas through the desktop DC.
///
/// Much slower than duplication and blind to some hardware overlays, but it
/// works in sessions where duplication is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdiCapturer;

impl GdiCapturer {
    pub fn new() -> Self {
        Self
    }

    pub fn capture_display(&self, display: &DisplayInfo) -> CaptureResult<PixelSurface> {
        self.capture_rect(display.bounds())
    }

    /// Capture `rect` in virtual-desktop coordinates (may be negative).
    pub fn capture_rect(&self, rect: Rectangle) -> CaptureResult<PixelSurface> {
        let mut surface = PixelSurface::new(rect.width, rect.height);
        self.capture_into(rect.x, rect.y, &mut surface)?;
        Ok(surface)
    }

    /// Fill `surface` from the desktop starting at (`x`, `y`).
    pub fn capture_into(&self, x: i32, y: i32, surface: &mut PixelSurface) -> CaptureResult<()> {
        let (width, height) = surface.size();
        if surface.is_empty() {
            return Err(CaptureError::InvalidConfiguration(
                "cannot capture an empty area".to_string(),
            ));
        }

        let screen = ScreenDc::acquire()?;
        let memory = MemoryDc::compatible_with(screen.0)?;
        let bitmap = Bitmap::compatible_with(screen.0, width, height)?;
        let _selection = Selection::select(memory.0, bitmap.0);

        unsafe {
            BitBlt(
                memory.0,
                0,
                0,
                width as i32,
                height as i32,
                screen.0,
                x,
                y,
                SRCCOPY,
            )
        }
        .map_err(|e| CaptureError::PlatformError(format!("BitBlt failed: {}", e)))?;

        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width as i32,
                // negative height gives top-down rows
                biHeight: -(height as i32),
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        // 32bpp rows are already DWORD aligned, so the DIB lands with stride width * 4
        let lines = unsafe {
            GetDIBits(
                memory.0,
                bitmap.0,
                0,
                height,
                Some(surface.data_mut().as_mut_ptr().cast()),
                &mut info,
                DIB_RGB_COLORS,
            )
        };
        if lines <= 0 {
            return Err(CaptureError::PlatformError(
                "GetDIBits returned no scan lines".to_string(),
            ));
        }

        let data = surface.data_mut();
        global_converter().swizzle_frame(data);
        // GDI leaves the fourth byte undefined
        for pixel in data.chunks_exact_mut(4) {
            pixel[3] = 255;
        }

        debug!("GDI captured {}x{} at ({}, {})", width, height, x, y);
        Ok(())
    }
}

struct ScreenDc(HDC);

impl ScreenDc {
    fn acquire() -> CaptureResult<Self> {
        let dc = unsafe { GetDC(HWND(std::ptr::null_mut())) };
        if dc.is_invalid() {
            return Err(CaptureError::PlatformError(
                "GetDC for the virtual desktop failed".to_string(),
            ));
        }
        Ok(Self(dc))
    }
}

impl Drop for ScreenDc {
    fn drop(&mut self) {
        unsafe { ReleaseDC(HWND(std::ptr::null_mut()), self.0) };
    }
}

struct MemoryDc(HDC);

impl MemoryDc {
    fn compatible_with(dc: HDC) -> CaptureResult<Self> {
        let memory = unsafe { CreateCompatibleDC(dc) };
        if memory.is_invalid() {
            return Err(CaptureError::PlatformError(
                "CreateCompatibleDC failed".to_string(),
            ));
        }
        Ok(Self(memory))
    }
}

impl Drop for MemoryDc {
    fn drop(&mut self) {
        if !unsafe { DeleteDC(self.0) }.as_bool() {
            warn!("DeleteDC failed");
        }
    }
}

struct Bitmap(HBITMAP);

impl Bitmap {
    fn compatible_with(dc: HDC, width: u32, height: u32) -> CaptureResult<Self> {
        let bitmap = unsafe { CreateCompatibleBitmap(dc, width as i32, height as i32) };
        if bitmap.is_invalid() {
            return Err(CaptureError::PlatformError(format!(
                "CreateCompatibleBitmap {}x{} failed",
                width, height
            )));
        }
        Ok(Self(bitmap))
    }
}

impl Drop for Bitmap {
    fn drop(&mut self) {
        if !unsafe { DeleteObject(self.0) }.as_bool() {
            warn!("DeleteObject on capture bitmap failed");
        }
    }
}

/// Restores the DC's previous object on drop
struct Selection {
    dc: HDC,
    previous: HGDIOBJ,
}

impl Selection {
    fn select(dc: HDC, bitmap: HBITMAP) -> Self {
        let previous = unsafe { SelectObject(dc, bitmap) };
        Self { dc, previous }
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        unsafe { SelectObject(self.dc, self.previous) };
    }
}
