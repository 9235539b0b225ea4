//! Platform boundary for duplication-based capture
//!
//! [`GpuDevice`] covers the device and staging side, [`OutputDuplication`]
//! the live duplication of one output. The session is written against these
//! traits only; the Windows backend implements them over D3D11/DXGI and the
//! integration tests implement them with in-memory fakes.

use crate::error::PlatformResult;
use crate::types::{FrameInfo, MoveRect, OutputDesc, PixelFormat, PointerShapeInfo, Rectangle};

/// A CPU-readable view of mapped GPU memory.
///
/// `pitch` is the byte distance between rows and may exceed `width * 4`.
#[derive(Debug, Clone, Copy)]
pub struct MappedView<'a> {
    pub data: &'a [u8],
    pub pitch: usize,
}

/// Dimensions and byte order of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Result of a variable-length metadata query.
///
/// `TooSmall` is the size-negotiation signal, not a failure: the caller grows
/// its buffer to `required` and asks again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferQuery<T> {
    Filled(T),
    /// `required` is in buffer elements (rects, or bytes for pointer shapes)
    TooSmall { required: usize },
}

/// Device and staging boundary.
///
/// All handles are thread-affine; one device serves exactly one display worker.
pub trait GpuDevice {
    /// A frame texture handed out by the duplication
    type Texture;
    /// A CPU-mappable copy target
    type Staging;
    type Duplication: OutputDuplication<Texture = Self::Texture>;

    /// Start duplicating the given output of this device's adapter
    fn duplicate_output(&self, output_index: usize) -> PlatformResult<Self::Duplication>;

    fn texture_desc(&self, texture: &Self::Texture) -> PlatformResult<TextureDesc>;

    /// Create a staging texture matching `desc`
    fn create_staging(&self, desc: &TextureDesc) -> PlatformResult<Self::Staging>;

    /// Copy one region of `src` into the same position of `dst`
    fn copy_region(&self, dst: &Self::Staging, src: &Self::Texture, region: Rectangle);

    /// Copy the whole of `src` into `dst`
    fn copy_full(&self, dst: &Self::Staging, src: &Self::Texture);

    /// Map `staging` for reading, run `read`, then unmap.
    fn read_staging<R>(
        &self,
        staging: &Self::Staging,
        read: impl FnOnce(MappedView<'_>) -> R,
    ) -> PlatformResult<R>;
}

/// Duplication boundary for a single output.
pub trait OutputDuplication {
    type Texture;

    fn desc(&self) -> PlatformResult<OutputDesc>;

    /// Wait up to `timeout_ms` for the next frame.
    ///
    /// A timeout is reported as an error whose HRESULT classifies as
    /// [`crate::error::ErrorClass::Timeout`].
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> PlatformResult<(FrameInfo, Self::Texture)>;

    fn release_frame(&mut self) -> PlatformResult<()>;

    fn frame_move_rects(&mut self, buffer: &mut [MoveRect]) -> PlatformResult<BufferQuery<usize>>;

    fn frame_dirty_rects(&mut self, buffer: &mut [Rectangle])
        -> PlatformResult<BufferQuery<usize>>;

    /// Fetch the raw pointer shape into `buffer`
    fn frame_pointer_shape(
        &mut self,
        buffer: &mut [u8],
    ) -> PlatformResult<BufferQuery<PointerShapeInfo>>;

    /// Map the desktop image directly, run `read`, then unmap.
    ///
    /// Only valid while a frame is held and the output reports its desktop
    /// image in system memory.
    fn with_desktop_surface<R>(
        &mut self,
        read: impl FnOnce(MappedView<'_>) -> R,
    ) -> PlatformResult<R>;
}
