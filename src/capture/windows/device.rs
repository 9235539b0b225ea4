//! D3D11 device and DXGI output duplication behind the capture traits

use std::mem;
use std::slice;

use log::{debug, info};
use windows::core::Interface;
use windows::Win32::Foundation::{HMODULE, RECT};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1,
    D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_BOX,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGIAdapter, IDXGIDevice, IDXGIOutput, IDXGIOutput1, IDXGIOutput5, IDXGIOutputDuplication,
    DXGI_ERROR_MORE_DATA, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT,
    DXGI_OUTDUPL_POINTER_SHAPE_INFO,
};

use crate::capture::traits::{
    BufferQuery, GpuDevice, MappedView, OutputDuplication, TextureDesc,
};
use crate::error::{hresult, CaptureError, CaptureResult, PlatformError, PlatformResult};
use crate::types::{
    FrameInfo, MoveRect, OutputDesc, PixelFormat, Point, PointerPosition, PointerShapeInfo,
    PointerShapeType, Rectangle,
};

/// A hardware D3D11 device on the default adapter, plus its immediate context.
///
/// Created and used on a single capture thread.
pub struct D3D11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    adapter: IDXGIAdapter,
}

impl D3D11Device {
    pub fn new() -> CaptureResult<Self> {
        let feature_levels = [
            D3D_FEATURE_LEVEL_11_0,
            D3D_FEATURE_LEVEL_10_1,
            D3D_FEATURE_LEVEL_10_0,
        ];
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;

        unsafe {
            D3D11CreateDevice(
                None::<&IDXGIAdapter>,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .map_err(|e| CaptureError::FatalDevice(PlatformError::from_win(e, "D3D11CreateDevice")))?;

        let (Some(device), Some(context)) = (device, context) else {
            return Err(CaptureError::PlatformError(
                "D3D11CreateDevice returned no device".to_string(),
            ));
        };

        let adapter = device
            .cast::<IDXGIDevice>()
            .and_then(|dxgi| unsafe { dxgi.GetAdapter() })
            .map_err(|e| CaptureError::FatalDevice(PlatformError::from_win(e, "GetAdapter")))?;

        info!("D3D11 device created");
        Ok(Self {
            device,
            context,
            adapter,
        })
    }

    pub fn adapter(&self) -> &IDXGIAdapter {
        &self.adapter
    }

    fn output(&self, output_index: usize) -> PlatformResult<IDXGIOutput> {
        unsafe { self.adapter.EnumOutputs(output_index as u32) }
            .map_err(|e| PlatformError::from_win(e, "EnumOutputs"))
    }
}

impl GpuDevice for D3D11Device {
    type Texture = ID3D11Texture2D;
    type Staging = ID3D11Texture2D;
    type Duplication = DxgiDuplication;

    fn duplicate_output(&self, output_index: usize) -> PlatformResult<DxgiDuplication> {
        let output = self.output(output_index)?;

        // BGRA is the only format the duplication is asked for
        if let Ok(output5) = output.cast::<IDXGIOutput5>() {
            let formats = [DXGI_FORMAT_B8G8R8A8_UNORM];
            match unsafe { output5.DuplicateOutput1(&self.device, 0, &formats) } {
                Ok(dup) => return Ok(DxgiDuplication::new(dup)),
                Err(e) => debug!("DuplicateOutput1 unavailable, falling back: {}", e),
            }
        }

        let output1 = output
            .cast::<IDXGIOutput1>()
            .map_err(|e| PlatformError::from_win(e, "QueryInterface(IDXGIOutput1)"))?;
        let dup = unsafe { output1.DuplicateOutput(&self.device) }
            .map_err(|e| PlatformError::from_win(e, "DuplicateOutput"))?;
        Ok(DxgiDuplication::new(dup))
    }

    fn texture_desc(&self, texture: &ID3D11Texture2D) -> PlatformResult<TextureDesc> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };
        Ok(TextureDesc {
            width: desc.Width,
            height: desc.Height,
            format: pixel_format(desc.Format)?,
        })
    }

    fn create_staging(&self, desc: &TextureDesc) -> PlatformResult<ID3D11Texture2D> {
        let staging_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&staging_desc, None, Some(&mut texture))
        }
        .map_err(|e| PlatformError::from_win(e, "CreateTexture2D"))?;
        texture.ok_or_else(|| PlatformError::new(hresult::DXGI_ERROR_INVALID_CALL, "CreateTexture2D"))
    }

    fn copy_region(&self, dst: &ID3D11Texture2D, src: &ID3D11Texture2D, region: Rectangle) {
        let src_box = D3D11_BOX {
            left: region.x.max(0) as u32,
            top: region.y.max(0) as u32,
            front: 0,
            right: region.right().max(0) as u32,
            bottom: region.bottom().max(0) as u32,
            back: 1,
        };
        unsafe {
            self.context.CopySubresourceRegion(
                dst,
                0,
                src_box.left,
                src_box.top,
                0,
                src,
                0,
                Some(&src_box),
            );
        }
    }

    fn copy_full(&self, dst: &ID3D11Texture2D, src: &ID3D11Texture2D) {
        unsafe { self.context.CopyResource(dst, src) };
    }

    fn read_staging<R>(
        &self,
        staging: &ID3D11Texture2D,
        read: impl FnOnce(MappedView<'_>) -> R,
    ) -> PlatformResult<R> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { staging.GetDesc(&mut desc) };

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
        }
        .map_err(|e| PlatformError::from_win(e, "ID3D11DeviceContext::Map"))?;

        let pitch = mapped.RowPitch as usize;
        // SAFETY: a mapped staging texture exposes RowPitch bytes for each of its rows
        // until Unmap, which happens after `read` returns.
        let data = unsafe {
            slice::from_raw_parts(mapped.pData as *const u8, pitch * desc.Height as usize)
        };
        let result = read(MappedView { data, pitch });
        unsafe { self.context.Unmap(staging, 0) };
        Ok(result)
    }
}

/// A live `IDXGIOutputDuplication` with scratch space for the raw metadata records.
pub struct DxgiDuplication {
    dup: IDXGIOutputDuplication,
    rect_scratch: Vec<RECT>,
    move_scratch: Vec<DXGI_OUTDUPL_MOVE_RECT>,
}

impl DxgiDuplication {
    fn new(dup: IDXGIOutputDuplication) -> Self {
        Self {
            dup,
            rect_scratch: Vec::new(),
            move_scratch: Vec::new(),
        }
    }
}

impl OutputDuplication for DxgiDuplication {
    type Texture = ID3D11Texture2D;

    fn desc(&self) -> PlatformResult<OutputDesc> {
        let desc = unsafe { self.dup.GetDesc() };
        Ok(OutputDesc {
            width: desc.ModeDesc.Width,
            height: desc.ModeDesc.Height,
            format: pixel_format(desc.ModeDesc.Format).unwrap_or(PixelFormat::BGRA8),
            desktop_image_in_system_memory: desc.DesktopImageInSystemMemory.as_bool(),
        })
    }

    fn acquire_next_frame(&mut self, timeout_ms: u32) -> PlatformResult<(FrameInfo, ID3D11Texture2D)> {
        let mut raw = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource = None;
        unsafe { self.dup.AcquireNextFrame(timeout_ms, &mut raw, &mut resource) }
            .map_err(|e| PlatformError::from_win(e, "AcquireNextFrame"))?;

        let texture = resource
            .ok_or_else(|| PlatformError::new(hresult::DXGI_ERROR_INVALID_CALL, "AcquireNextFrame"))
            .and_then(|resource| {
                resource
                    .cast::<ID3D11Texture2D>()
                    .map_err(|e| PlatformError::from_win(e, "QueryInterface(ID3D11Texture2D)"))
            });
        let texture = match texture {
            Ok(texture) => texture,
            Err(e) => {
                // the frame is held even though it is unusable
                let _ = unsafe { self.dup.ReleaseFrame() };
                return Err(e);
            }
        };

        let info = FrameInfo {
            last_present_time: raw.LastPresentTime,
            last_mouse_update_time: raw.LastMouseUpdateTime,
            accumulated_frames: raw.AccumulatedFrames,
            total_metadata_buffer_size: raw.TotalMetadataBufferSize,
            pointer_position: PointerPosition {
                position: Point::new(raw.PointerPosition.Position.x, raw.PointerPosition.Position.y),
                visible: raw.PointerPosition.Visible.as_bool(),
            },
            pointer_shape_buffer_size: raw.PointerShapeBufferSize,
        };
        Ok((info, texture))
    }

    fn release_frame(&mut self) -> PlatformResult<()> {
        unsafe { self.dup.ReleaseFrame() }.map_err(|e| PlatformError::from_win(e, "ReleaseFrame"))
    }

    fn frame_move_rects(&mut self, buffer: &mut [MoveRect]) -> PlatformResult<BufferQuery<usize>> {
        self.move_scratch
            .resize(buffer.len(), DXGI_OUTDUPL_MOVE_RECT::default());
        let record = mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>();
        let mut required = 0u32;

        let result = unsafe {
            self.dup.GetFrameMoveRects(
                (self.move_scratch.len() * record) as u32,
                self.move_scratch.as_mut_ptr(),
                &mut required,
            )
        };
        match result {
            Ok(()) => {
                let count = (required as usize / record).min(buffer.len());
                for (dst, src) in buffer.iter_mut().zip(&self.move_scratch[..count]) {
                    *dst = MoveRect {
                        source: Point::new(src.SourcePoint.x, src.SourcePoint.y),
                        destination: rectangle(&src.DestinationRect),
                    };
                }
                Ok(BufferQuery::Filled(count))
            }
            Err(e) if e.code() == DXGI_ERROR_MORE_DATA => Ok(BufferQuery::TooSmall {
                required: (required as usize).div_ceil(record),
            }),
            Err(e) => Err(PlatformError::from_win(e, "GetFrameMoveRects")),
        }
    }

    fn frame_dirty_rects(&mut self, buffer: &mut [Rectangle]) -> PlatformResult<BufferQuery<usize>> {
        self.rect_scratch.resize(buffer.len(), RECT::default());
        let record = mem::size_of::<RECT>();
        let mut required = 0u32;

        let result = unsafe {
            self.dup.GetFrameDirtyRects(
                (self.rect_scratch.len() * record) as u32,
                self.rect_scratch.as_mut_ptr(),
                &mut required,
            )
        };
        match result {
            Ok(()) => {
                let count = (required as usize / record).min(buffer.len());
                for (dst, src) in buffer.iter_mut().zip(&self.rect_scratch[..count]) {
                    *dst = rectangle(src);
                }
                Ok(BufferQuery::Filled(count))
            }
            Err(e) if e.code() == DXGI_ERROR_MORE_DATA => Ok(BufferQuery::TooSmall {
                required: (required as usize).div_ceil(record),
            }),
            Err(e) => Err(PlatformError::from_win(e, "GetFrameDirtyRects")),
        }
    }

    fn frame_pointer_shape(&mut self, buffer: &mut [u8]) -> PlatformResult<BufferQuery<PointerShapeInfo>> {
        let mut required = 0u32;
        let mut raw = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();

        let result = unsafe {
            self.dup.GetFramePointerShape(
                buffer.len() as u32,
                buffer.as_mut_ptr().cast(),
                &mut required,
                &mut raw,
            )
        };
        match result {
            Ok(()) => Ok(BufferQuery::Filled(PointerShapeInfo {
                shape_type: PointerShapeType::from_raw(raw.Type),
                width: raw.Width,
                height: raw.Height,
                pitch: raw.Pitch,
                hot_spot: Point::new(raw.HotSpot.x, raw.HotSpot.y),
            })),
            Err(e) if e.code() == DXGI_ERROR_MORE_DATA => Ok(BufferQuery::TooSmall {
                required: required as usize,
            }),
            Err(e) => Err(PlatformError::from_win(e, "GetFramePointerShape")),
        }
    }

    fn with_desktop_surface<R>(&mut self, read: impl FnOnce(MappedView<'_>) -> R) -> PlatformResult<R> {
        let height = unsafe { self.dup.GetDesc() }.ModeDesc.Height as usize;
        let mapped = unsafe { self.dup.MapDesktopSurface() }
            .map_err(|e| PlatformError::from_win(e, "MapDesktopSurface"))?;

        let pitch = mapped.Pitch.max(0) as usize;
        // SAFETY: the desktop surface stays mapped until UnMapDesktopSurface below.
        let data = unsafe { slice::from_raw_parts(mapped.pBits as *const u8, pitch * height) };
        let result = read(MappedView { data, pitch });
        unsafe { self.dup.UnMapDesktopSurface() }
            .map_err(|e| PlatformError::from_win(e, "UnMapDesktopSurface"))?;
        Ok(result)
    }
}

fn rectangle(rect: &RECT) -> Rectangle {
    Rectangle::from_edges(rect.left, rect.top, rect.right, rect.bottom)
}

fn pixel_format(format: DXGI_FORMAT) -> PlatformResult<PixelFormat> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM => Ok(PixelFormat::BGRA8),
        DXGI_FORMAT_R8G8B8A8_UNORM => Ok(PixelFormat::RGBA8),
        _ => Err(PlatformError::new(
            hresult::DXGI_ERROR_UNSUPPORTED,
            format!("frame format {}", format.0),
        )),
    }
}

fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::BGRA8 => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::RGBA8 => DXGI_FORMAT_R8G8B8A8_UNORM,
    }
}
