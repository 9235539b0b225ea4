//! Error types for the capture engine

use std::fmt;

use thiserror::Error;

/// Main error type for capture operations.
///
/// "No new frame" and "resize required" are not represented here: they are
/// ordinary outcomes reported through [`crate::types::FrameStatus`].
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The duplication interface failed; recreating it is expected to recover
    #[error("Duplication failed, will recreate: {0}")]
    RecoverableDevice(PlatformError),

    /// The device itself is unusable; the display worker must stop
    #[error("Device unusable: {0}")]
    FatalDevice(PlatformError),

    /// Pointer shape could not be decoded
    #[error("Pointer shape decode failed: {0}")]
    Decode(String),

    /// Staging surface or texture creation failed
    #[error("Resource creation failed: {0}")]
    ResourceCreation(PlatformError),

    /// Source buffer does not hold the rows the destination expects
    #[error("Buffer too small: need {required} bytes, got {provided}")]
    BufferTooSmall { required: usize, provided: usize },

    /// Display not found or invalid index
    #[error("Display not found: index {0}")]
    DisplayNotFound(usize),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The downstream consumer went away
    #[error("Frame sink closed")]
    SinkClosed,

    /// The downstream consumer rejected a frame
    #[error("Frame sink error: {0}")]
    Sink(String),

    /// Platform-specific error outside the duplication taxonomy
    #[error("Platform error: {0}")]
    PlatformError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Combined result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Result type at the platform boundary, before classification
pub type PlatformResult<T> = Result<T, PlatformError>;

/// A failed call across the platform boundary: the raw HRESULT plus the call
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    pub hresult: i32,
    pub context: String,
}

impl PlatformError {
    pub fn new(hresult: i32, context: impl Into<String>) -> Self {
        Self {
            hresult,
            context: context.into(),
        }
    }

    /// Classify the HRESULT into the capture taxonomy.
    pub fn class(&self) -> ErrorClass {
        use hresult::*;

        match self.hresult {
            DXGI_ERROR_WAIT_TIMEOUT => ErrorClass::Timeout,
            DXGI_ERROR_MORE_DATA => ErrorClass::MoreData,
            DXGI_ERROR_DEVICE_REMOVED
            | DXGI_ERROR_DEVICE_RESET
            | DXGI_ERROR_DEVICE_HUNG
            | DXGI_ERROR_DRIVER_INTERNAL_ERROR
            | DXGI_ERROR_UNSUPPORTED
            | E_OUTOFMEMORY => ErrorClass::Fatal,
            _ => ErrorClass::Recoverable,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.class() == ErrorClass::Timeout
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match hresult::name(self.hresult) {
            Some(name) => write!(f, "{} failed: {}", self.context, name),
            None => write!(
                f,
                "{} failed: HRESULT {:#010X}",
                self.context, self.hresult as u32
            ),
        }
    }
}

impl std::error::Error for PlatformError {}

#[cfg(windows)]
impl PlatformError {
    /// Wrap a `windows` crate error with the name of the failing call
    pub fn from_win(err: windows::core::Error, context: impl Into<String>) -> Self {
        Self::new(err.code().0, context)
    }
}

/// How a platform failure should be treated by the capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No frame arrived within the timeout
    Timeout,
    /// A size-query buffer was too small
    MoreData,
    /// Recreate the duplication and retry on the next tick
    Recoverable,
    /// The device is gone
    Fatal,
}

/// HRESULT values the capture engine distinguishes.
pub mod hresult {
    pub const DXGI_ERROR_INVALID_CALL: i32 = 0x887A_0001_u32 as i32;
    pub const DXGI_ERROR_NOT_FOUND: i32 = 0x887A_0002_u32 as i32;
    pub const DXGI_ERROR_MORE_DATA: i32 = 0x887A_0003_u32 as i32;
    pub const DXGI_ERROR_UNSUPPORTED: i32 = 0x887A_0004_u32 as i32;
    pub const DXGI_ERROR_DEVICE_REMOVED: i32 = 0x887A_0005_u32 as i32;
    pub const DXGI_ERROR_DEVICE_HUNG: i32 = 0x887A_0006_u32 as i32;
    pub const DXGI_ERROR_DEVICE_RESET: i32 = 0x887A_0007_u32 as i32;
    pub const DXGI_ERROR_WAS_STILL_DRAWING: i32 = 0x887A_000A_u32 as i32;
    pub const DXGI_ERROR_DRIVER_INTERNAL_ERROR: i32 = 0x887A_0020_u32 as i32;
    pub const DXGI_ERROR_NOT_CURRENTLY_AVAILABLE: i32 = 0x887A_0022_u32 as i32;
    pub const DXGI_ERROR_MODE_CHANGE_IN_PROGRESS: i32 = 0x887A_0025_u32 as i32;
    pub const DXGI_ERROR_ACCESS_LOST: i32 = 0x887A_0026_u32 as i32;
    pub const DXGI_ERROR_WAIT_TIMEOUT: i32 = 0x887A_0027_u32 as i32;
    pub const DXGI_ERROR_SESSION_DISCONNECTED: i32 = 0x887A_0028_u32 as i32;
    pub const DXGI_ERROR_ACCESS_DENIED: i32 = 0x887A_002B_u32 as i32;
    pub const E_ACCESSDENIED: i32 = 0x8007_0005_u32 as i32;
    pub const E_OUTOFMEMORY: i32 = 0x8007_000E_u32 as i32;
    pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;

    /// Symbolic name for the HRESULTs above
    pub fn name(hr: i32) -> Option<&'static str> {
        Some(match hr {
            DXGI_ERROR_INVALID_CALL => "DXGI_ERROR_INVALID_CALL",
            DXGI_ERROR_NOT_FOUND => "DXGI_ERROR_NOT_FOUND",
            DXGI_ERROR_MORE_DATA => "DXGI_ERROR_MORE_DATA",
            DXGI_ERROR_UNSUPPORTED => "DXGI_ERROR_UNSUPPORTED",
            DXGI_ERROR_DEVICE_REMOVED => "DXGI_ERROR_DEVICE_REMOVED",
            DXGI_ERROR_DEVICE_HUNG => "DXGI_ERROR_DEVICE_HUNG",
            DXGI_ERROR_DEVICE_RESET => "DXGI_ERROR_DEVICE_RESET",
            DXGI_ERROR_WAS_STILL_DRAWING => "DXGI_ERROR_WAS_STILL_DRAWING",
            DXGI_ERROR_DRIVER_INTERNAL_ERROR => "DXGI_ERROR_DRIVER_INTERNAL_ERROR",
            DXGI_ERROR_NOT_CURRENTLY_AVAILABLE => "DXGI_ERROR_NOT_CURRENTLY_AVAILABLE",
            DXGI_ERROR_MODE_CHANGE_IN_PROGRESS => "DXGI_ERROR_MODE_CHANGE_IN_PROGRESS",
            DXGI_ERROR_ACCESS_LOST => "DXGI_ERROR_ACCESS_LOST",
            DXGI_ERROR_WAIT_TIMEOUT => "DXGI_ERROR_WAIT_TIMEOUT",
            DXGI_ERROR_SESSION_DISCONNECTED => "DXGI_ERROR_SESSION_DISCONNECTED",
            DXGI_ERROR_ACCESS_DENIED => "DXGI_ERROR_ACCESS_DENIED",
            E_ACCESSDENIED => "E_ACCESSDENIED",
            E_OUTOFMEMORY => "E_OUTOFMEMORY",
            E_INVALIDARG => "E_INVALIDARG",
            _ => return None,
        })
    }
}

impl CaptureError {
    /// Translate a platform failure into the capture taxonomy.
    pub fn from_platform(err: PlatformError) -> Self {
        match err.class() {
            ErrorClass::Fatal => CaptureError::FatalDevice(err),
            ErrorClass::Timeout | ErrorClass::MoreData | ErrorClass::Recoverable => {
                CaptureError::RecoverableDevice(err)
            }
        }
    }

    /// Like [`CaptureError::from_platform`], but non-fatal failures are
    /// resource-creation errors rather than duplication errors.
    pub fn from_resource(err: PlatformError) -> Self {
        match err.class() {
            ErrorClass::Fatal => CaptureError::FatalDevice(err),
            _ => CaptureError::ResourceCreation(err),
        }
    }

    /// Check if the error is recoverable (worth retrying on the next tick)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CaptureError::RecoverableDevice(_)
                | CaptureError::ResourceCreation(_)
                | CaptureError::Decode(_)
                | CaptureError::BufferTooSmall { .. }
                | CaptureError::Sink(_)
        )
    }

    /// Check if the error must terminate the display worker
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable() && !matches!(self, CaptureError::SinkClosed)
    }
}
