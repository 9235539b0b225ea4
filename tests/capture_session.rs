//! CaptureSession integration tests against the in-memory backend

mod common;

use common::{init_logging, FakeDisplay, Scripted, ScriptedFrame};
use dxgi_screen_stream::error::hresult;
use dxgi_screen_stream::types::{
    CaptureConfig, CopyPath, FrameStatus, PixelFormat, PixelSurface, Point, PointerShapeInfo,
    PointerShapeType, Rectangle,
};
use dxgi_screen_stream::{CaptureError, CaptureSession};

fn bgra(r: u8, g: u8, b: u8) -> [u8; 4] {
    [b, g, r, 255]
}

fn session(display: &FakeDisplay) -> CaptureSession<common::FakeDevice> {
    CaptureSession::new(display.device(), 0)
}

fn assert_balanced(display: &FakeDisplay, session: &CaptureSession<common::FakeDevice>) {
    let counters = display.counters();
    assert_eq!(
        counters.acquires, counters.releases,
        "every acquired frame must be released"
    );
    assert!(!session.is_frame_held());
}

fn monochrome_two_by_two() -> (PointerShapeInfo, Vec<u8>) {
    (
        PointerShapeInfo {
            shape_type: PointerShapeType::Monochrome,
            width: 2,
            height: 4,
            pitch: 1,
            hot_spot: Point::default(),
        },
        vec![0x00, 0x00, 0xC0, 0x00],
    )
}

#[test]
fn test_first_frame_is_full_copy_and_swizzled() {
    init_logging();
    let display = FakeDisplay::new(8, 4).with_pitch_padding(12);
    display.push_frame(ScriptedFrame::new().paint(Rectangle::new(0, 0, 8, 4), bgra(30, 20, 10)));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(status, FrameStatus::NewFrame(CopyPath::FullFrame));
    assert_eq!(surface.pixel(0, 0), Some([30, 20, 10, 255]));
    assert_eq!(surface.pixel(7, 3), Some([30, 20, 10, 255]));

    let counters = display.counters();
    assert_eq!(counters.staging_created, 1);
    assert_eq!(counters.full_copies, 1);
    assert!(counters.region_copies.is_empty());
    assert_balanced(&display, &session);
}

#[test]
fn test_dirty_rects_are_copied_exactly() {
    init_logging();
    let display = FakeDisplay::new(8, 4).with_pitch_padding(4);
    display.push_frame(ScriptedFrame::new().paint(Rectangle::new(0, 0, 8, 4), bgra(0, 0, 255)));

    let first = Rectangle::new(0, 0, 2, 2);
    let second = Rectangle::new(5, 1, 3, 3);
    display.push_frame(
        ScriptedFrame::new()
            .dirty(first, bgra(255, 0, 0))
            .dirty(second, bgra(0, 255, 0)),
    );

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    assert_eq!(
        session.capture_into(&mut surface, 0).unwrap(),
        FrameStatus::NewFrame(CopyPath::FullFrame)
    );
    assert_eq!(
        session.capture_into(&mut surface, 0).unwrap(),
        FrameStatus::NewFrame(CopyPath::DirtyRegions(2))
    );

    let counters = display.counters();
    assert_eq!(counters.region_copies, vec![first, second]);
    assert_eq!(counters.full_copies, 1);
    assert_eq!(counters.staging_created, 1);

    assert_eq!(surface.pixel(1, 1), Some([255, 0, 0, 255]));
    assert_eq!(surface.pixel(6, 2), Some([0, 255, 0, 255]));
    // untouched by either region
    assert_eq!(surface.pixel(3, 3), Some([0, 0, 255, 255]));
    assert_balanced(&display, &session);
}

#[test]
fn test_dirty_rect_is_clipped_to_the_surface() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(ScriptedFrame::new());
    display.push_frame(ScriptedFrame::new().dirty(Rectangle::new(6, 2, 10, 10), bgra(1, 2, 3)));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    session.capture_into(&mut surface, 0).unwrap();
    session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(
        display.counters().region_copies,
        vec![Rectangle::new(6, 2, 2, 2)]
    );
    assert_eq!(surface.pixel(7, 3), Some([1, 2, 3, 255]));
}

#[test]
fn test_moved_rect_falls_back_to_full_copy() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(ScriptedFrame::new());
    display.push_frame(
        ScriptedFrame::new()
            .moved(Point::new(0, 0), Rectangle::new(2, 0, 2, 2))
            .dirty(Rectangle::new(0, 0, 2, 2), bgra(9, 9, 9)),
    );

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    session.capture_into(&mut surface, 0).unwrap();
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(status, FrameStatus::NewFrame(CopyPath::FullFrame));
    let counters = display.counters();
    assert_eq!(counters.full_copies, 2);
    assert!(counters.region_copies.is_empty());
    assert_eq!(session.regions().moved().len(), 1);
    assert_balanced(&display, &session);
}

#[test]
fn test_unprimed_staging_ignores_dirty_rects() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(ScriptedFrame::new().dirty(Rectangle::new(0, 0, 1, 1), bgra(5, 5, 5)));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(status, FrameStatus::NewFrame(CopyPath::FullFrame));
    assert!(display.counters().region_copies.is_empty());
}

#[test]
fn test_dirty_rects_disabled() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(ScriptedFrame::new());
    display.push_frame(ScriptedFrame::new().dirty(Rectangle::new(0, 0, 1, 1), bgra(5, 5, 5)));

    let config = CaptureConfig {
        use_dirty_rects: false,
        ..CaptureConfig::default()
    };
    let mut session = CaptureSession::with_config(display.device(), &config);
    let mut surface = PixelSurface::new(8, 4);
    session.capture_into(&mut surface, 0).unwrap();
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(status, FrameStatus::NewFrame(CopyPath::FullFrame));
    let counters = display.counters();
    assert_eq!(counters.full_copies, 2);
    assert_eq!(counters.dirty_queries, 0);
}

#[test]
fn test_dirty_buffer_grows_and_retries() {
    let display = FakeDisplay::new(8, 8);
    display.push_frame(ScriptedFrame::new());

    let mut frame = ScriptedFrame::new();
    for i in 0..40 {
        frame = frame.dirty(Rectangle::new(i % 8, i / 8, 1, 1), bgra(200, 100, 50));
    }
    display.push_frame(frame);

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 8);
    session.capture_into(&mut surface, 0).unwrap();
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(status, FrameStatus::NewFrame(CopyPath::DirtyRegions(40)));
    assert!(session.regions().capacity().0 >= 40);

    let counters = display.counters();
    assert_eq!(counters.dirty_queries, 2);
    assert_eq!(counters.region_copies.len(), 40);
    assert_eq!(surface.pixel(7, 4), Some([200, 100, 50, 255]));
    assert_eq!(surface.pixel(0, 5), Some([0, 0, 0, 0]));
    assert_balanced(&display, &session);
}

#[test]
fn test_timeout_is_no_new_frame() {
    let display = FakeDisplay::new(4, 4);
    display.push(Scripted::Timeout);

    let mut session = session(&display);
    let mut surface = PixelSurface::new(4, 4);
    assert_eq!(
        session.capture_into(&mut surface, 5).unwrap(),
        FrameStatus::NoNewFrame
    );
    assert_eq!(display.counters().acquires, 0);
    assert!(session.has_duplication());
}

#[test]
fn test_pointer_only_update_is_no_new_frame() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(ScriptedFrame::new().accumulated(0).pointer(3, 1, None));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(status, FrameStatus::NoNewFrame);
    assert_eq!(session.pointer().position(), Point::new(3, 1));
    assert!(session.pointer().is_visible());
    let counters = display.counters();
    assert_eq!(counters.full_copies, 0);
    assert_balanced(&display, &session);
}

#[test]
fn test_system_memory_path() {
    let display = FakeDisplay::new(4, 2).with_pitch_padding(8).in_system_memory();
    display.push_frame(ScriptedFrame::new().paint(Rectangle::new(1, 1, 1, 1), bgra(7, 8, 9)));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(4, 2);
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(status, FrameStatus::NewFrame(CopyPath::SystemMemory));
    assert_eq!(surface.pixel(1, 1), Some([7, 8, 9, 255]));
    assert_eq!(surface.pixel(0, 0), Some([0, 0, 0, 0]));

    let counters = display.counters();
    assert_eq!(counters.desktop_maps, 1);
    assert_eq!(counters.staging_created, 0);
    assert!(!session.has_staging());
    assert_balanced(&display, &session);
}

#[test]
fn test_rgba_output_is_not_swizzled() {
    let display = FakeDisplay::new(2, 2).with_format(PixelFormat::RGBA8);
    display.push_frame(ScriptedFrame::new().paint(Rectangle::new(0, 0, 2, 2), [1, 2, 3, 4]));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(2, 2);
    session.capture_into(&mut surface, 0).unwrap();
    assert_eq!(surface.pixel(1, 1), Some([1, 2, 3, 4]));
}

#[test]
fn test_cursor_is_composited_and_persists() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(
        ScriptedFrame::new()
            .paint(Rectangle::new(0, 0, 8, 4), bgra(16, 16, 16))
            .pointer(2, 1, Some(monochrome_two_by_two())),
    );
    // no pointer update, but the region under the pointer changes
    display.push_frame(ScriptedFrame::new().dirty(Rectangle::new(2, 1, 1, 1), bgra(0, 0, 0)));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(surface.pixel(2, 1), Some([255, 255, 255, 255]));
    assert_eq!(surface.pixel(3, 1), Some([255, 255, 255, 255]));
    // transparent second sprite row leaves the desktop visible
    assert_eq!(surface.pixel(2, 2), Some([16, 16, 16, 255]));
    assert_eq!(session.pointer().sprite().map(|s| s.size()), Some((2, 2)));

    session.capture_into(&mut surface, 0).unwrap();
    assert_eq!(surface.pixel(2, 1), Some([255, 255, 255, 255]));
    assert_eq!(display.counters().pointer_queries, 1);
    assert_balanced(&display, &session);
}

#[test]
fn test_cursor_not_drawn_when_disabled() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(ScriptedFrame::new().pointer(2, 1, Some(monochrome_two_by_two())));

    let config = CaptureConfig {
        draw_cursor: false,
        ..CaptureConfig::default()
    };
    let mut session = CaptureSession::with_config(display.device(), &config);
    let mut surface = PixelSurface::new(8, 4);
    session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(surface.pixel(2, 1), Some([0, 0, 0, 0]));
    assert_eq!(display.counters().pointer_queries, 0);
}

#[test]
fn test_unsupported_shape_does_not_fail_frame() {
    let display = FakeDisplay::new(4, 4);
    let shape = PointerShapeInfo {
        shape_type: PointerShapeType::Unknown(8),
        width: 1,
        height: 1,
        pitch: 4,
        hot_spot: Point::default(),
    };
    display.push_frame(ScriptedFrame::new().pointer(0, 0, Some((shape, vec![0xFF; 4]))));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(4, 4);
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert!(status.is_new_frame());
    assert!(session.pointer().sprite().is_none());
    assert_eq!(surface.pixel(0, 0), Some([0, 0, 0, 0]));
    assert_balanced(&display, &session);
}

#[test]
fn test_mismatched_texture_requests_resize() {
    let display = FakeDisplay::new(8, 4);
    display.push_frame(ScriptedFrame::new().texture_size(16, 8));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(8, 4);
    let status = session.capture_into(&mut surface, 0).unwrap();

    assert_eq!(
        status,
        FrameStatus::ResizeRequired {
            width: 16,
            height: 8
        }
    );
    assert_eq!(display.counters().staging_created, 0);
    assert_balanced(&display, &session);
}

#[test]
fn test_access_lost_is_recoverable() {
    let display = FakeDisplay::new(4, 4);
    display.push(Scripted::Error(hresult::DXGI_ERROR_ACCESS_LOST));
    display.push_frame(ScriptedFrame::new());

    let mut session = session(&display);
    let mut surface = PixelSurface::new(4, 4);
    let err = session.capture_into(&mut surface, 0).unwrap_err();
    assert!(matches!(err, CaptureError::RecoverableDevice(_)));
    assert!(err.is_recoverable());
    assert_balanced(&display, &session);

    session.discard_duplication();
    assert!(session.capture_into(&mut surface, 0).unwrap().is_new_frame());
    assert_eq!(display.counters().duplications, 2);
    assert_balanced(&display, &session);
}

#[test]
fn test_device_removed_is_fatal() {
    let display = FakeDisplay::new(4, 4);
    display.push(Scripted::Error(hresult::DXGI_ERROR_DEVICE_REMOVED));

    let mut session = session(&display);
    let mut surface = PixelSurface::new(4, 4);
    let err = session.capture_into(&mut surface, 0).unwrap_err();
    assert!(matches!(err, CaptureError::FatalDevice(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_staging_failure_is_resource_error() {
    let display = FakeDisplay::new(4, 4);
    display
        .state
        .lock()
        .staging_errors
        .push_back(hresult::E_INVALIDARG);
    display.push_frame(ScriptedFrame::new());
    display.push_frame(ScriptedFrame::new());

    let mut session = session(&display);
    let mut surface = PixelSurface::new(4, 4);
    let err = session.capture_into(&mut surface, 0).unwrap_err();
    assert!(matches!(err, CaptureError::ResourceCreation(_)));
    assert_balanced(&display, &session);

    assert!(session.capture_into(&mut surface, 0).unwrap().is_new_frame());
    assert_eq!(display.counters().staging_created, 1);
}

#[test]
fn test_missing_output_is_display_not_found() {
    let display = FakeDisplay::new(4, 4);
    {
        let mut state = display.state.lock();
        state.duplicate_errors.push_back(hresult::DXGI_ERROR_NOT_FOUND);
        state.duplicate_errors.push_back(hresult::DXGI_ERROR_NOT_FOUND);
    }

    let mut session = session(&display);
    assert!(matches!(
        session.mode_size(),
        Err(CaptureError::DisplayNotFound(0))
    ));

    let mut surface = PixelSurface::new(4, 4);
    let err = session.capture_into(&mut surface, 0).unwrap_err();
    assert!(matches!(err, CaptureError::DisplayNotFound(0)));
    assert!(err.is_fatal());
}

#[test]
fn test_failed_release_drops_duplication() {
    let display = FakeDisplay::new(4, 4);
    display.push_frame(ScriptedFrame::new());
    display.push_frame(ScriptedFrame::new());
    display
        .state
        .lock()
        .release_errors
        .push_back(hresult::DXGI_ERROR_ACCESS_LOST);

    let mut session = session(&display);
    let mut surface = PixelSurface::new(4, 4);
    let err = session.capture_into(&mut surface, 0).unwrap_err();

    assert!(matches!(err, CaptureError::RecoverableDevice(_)));
    assert!(!session.is_frame_held());
    assert!(!session.has_duplication());

    // a fresh duplication picks up where the lost one left off
    assert!(session.capture_into(&mut surface, 0).unwrap().is_new_frame());
    assert!(!session.is_frame_held());
    assert_eq!(display.counters().duplications, 2);
}

#[test]
fn test_mode_size_comes_from_duplication() {
    let display = FakeDisplay::new(6, 3);
    let mut session = session(&display);

    assert_eq!(session.mode_size().unwrap(), (6, 3));
    assert!(session.has_duplication());

    display.set_size(10, 5);
    assert_eq!(session.mode_size().unwrap(), (10, 5));
    assert_eq!(display.counters().duplications, 1);
}
