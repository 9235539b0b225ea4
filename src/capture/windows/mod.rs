//! Windows backend: D3D11 + DXGI desktop duplication, GDI fallback

mod device;
mod gdi;

pub use device::{D3D11Device, DxgiDuplication};
pub use gdi::GdiCapturer;

use log::{debug, warn};
use windows::Win32::Graphics::Dxgi::DXGI_ERROR_NOT_FOUND;
use windows::Win32::Graphics::Gdi::{GetMonitorInfoW, MONITORINFO, MONITORINFOEXW};
use windows::Win32::UI::HiDpi::{
    SetThreadDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};
use windows::Win32::UI::WindowsAndMessaging::MONITORINFOF_PRIMARY;

use crate::error::{CaptureError, CaptureResult, PlatformError};
use crate::types::DisplayInfo;

/// Make the calling thread per-monitor DPI aware (v2), so output coordinates
/// are physical pixels. Returns whether the switch succeeded.
pub fn enable_thread_dpi_awareness() -> bool {
    let previous = unsafe { SetThreadDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) };
    if previous.0.is_null() {
        warn!("SetThreadDpiAwarenessContext(PER_MONITOR_AWARE_V2) failed");
        false
    } else {
        debug!("thread switched to per-monitor DPI awareness");
        true
    }
}

/// List the desktop-attached outputs of the default adapter.
///
/// `index` is the output's position on the adapter, which is what
/// [`crate::types::CaptureConfig::display_index`] refers to.
pub fn enumerate_displays() -> CaptureResult<Vec<DisplayInfo>> {
    let device = D3D11Device::new()?;
    let mut displays = Vec::new();

    for index in 0.. {
        let output = match unsafe { device.adapter().EnumOutputs(index as u32) } {
            Ok(output) => output,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(CaptureError::from_platform(PlatformError::from_win(
                    e,
                    "EnumOutputs",
                )))
            }
        };
        let desc = unsafe { output.GetDesc() }.map_err(|e| {
            CaptureError::from_platform(PlatformError::from_win(e, "IDXGIOutput::GetDesc"))
        })?;
        if !desc.AttachedToDesktop.as_bool() {
            continue;
        }

        let rect = desc.DesktopCoordinates;
        let name_len = desc
            .DeviceName
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(desc.DeviceName.len());

        let mut monitor = MONITORINFOEXW {
            monitorInfo: MONITORINFO {
                cbSize: std::mem::size_of::<MONITORINFOEXW>() as u32,
                ..Default::default()
            },
            ..Default::default()
        };
        let is_primary = if unsafe {
            GetMonitorInfoW(desc.Monitor, &mut monitor.monitorInfo as *mut MONITORINFO)
        }
        .as_bool()
        {
            monitor.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0
        } else {
            rect.left == 0 && rect.top == 0
        };

        displays.push(DisplayInfo {
            index,
            name: String::from_utf16_lossy(&desc.DeviceName[..name_len]),
            width: (rect.right - rect.left).max(0) as u32,
            height: (rect.bottom - rect.top).max(0) as u32,
            x: rect.left,
            y: rect.top,
            is_primary,
        });
    }

    if displays.is_empty() {
        return Err(CaptureError::PlatformError(
            "no desktop-attached outputs found".to_string(),
        ));
    }
    Ok(displays)
}
