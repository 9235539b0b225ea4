//! Duplication-based capture: platform boundary, session and cursor handling

pub mod cursor;
pub mod regions;
pub mod session;
pub mod traits;

#[cfg(windows)]
pub mod windows;

pub use cursor::{CursorCompositor, PointerState};
pub use regions::FrameRegions;
pub use session::CaptureSession;
pub use traits::{BufferQuery, GpuDevice, MappedView, OutputDuplication, TextureDesc};

/// The device type the streaming pipeline opens on this platform
#[cfg(windows)]
pub type PlatformDevice = windows::D3D11Device;
