//! Row-origin handling from EFB to display and capture

use efbridge_shared::{EfbAccessKind, EfbRegion, HostOrigin, StereoMode, TargetRectangle};

use super::test_utils::*;
use crate::config::VideoConfig;
use crate::host::HostCall;

const RED: u32 = 0xFFFF_0000;
const BLUE: u32 = 0xFF00_00FF;

/// Host rows holding the first `rows` display rows of a native EFB.
fn top_rows(origin: HostOrigin, rows: i32) -> TargetRectangle {
    match origin {
        HostOrigin::TopLeft => TargetRectangle::new(0, 0, 640, rows),
        HostOrigin::BottomLeft => TargetRectangle::new(0, 528 - rows, 640, 528),
    }
}

fn dumping_renderer(
    origin: HostOrigin,
    config: VideoConfig,
) -> (crate::Renderer<crate::SoftwareHost>, MemorySink) {
    let mut renderer = new_renderer(origin, config);
    let sink = MemorySink::new();
    renderer.set_frame_sink(Box::new(sink.clone()));
    renderer.set_dump_frames(true);
    (renderer, sink)
}

#[test]
fn test_captured_row_zero_is_top_of_source() {
    for origin in [HostOrigin::TopLeft, HostOrigin::BottomLeft] {
        let (mut renderer, sink) = dumping_renderer(origin, native_config());
        renderer
            .host_mut()
            .fill_efb(EfbAccessKind::Color, top_rows(origin, 1), RED);

        present_full(&mut renderer);

        let frame = sink.last_frame().unwrap();
        assert_eq!((frame.width, frame.height), (640, 528));
        assert_eq!(frame.pixel(0, 0), Some([0xFF, 0, 0]), "{origin:?}");
        assert_eq!(frame.pixel(0, 1), Some([0, 0, 0]), "{origin:?}");
        assert_eq!(frame.pixel(639, 527), Some([0, 0, 0]), "{origin:?}");
    }
}

#[test]
fn test_cleared_region_appears_at_top_of_display() {
    for origin in [HostOrigin::TopLeft, HostOrigin::BottomLeft] {
        let (mut renderer, sink) = dumping_renderer(origin, scaled_config(2));
        renderer.clear_screen(EfbRegion::new(0, 0, 640, 10), true, true, false, BLUE, 0);

        present_full(&mut renderer);

        // The backbuffer is native size; the 2x EFB is scaled down.
        let frame = sink.last_frame().unwrap();
        assert_eq!(frame.pixel(320, 0), Some([0, 0, 0xFF]), "{origin:?}");
        assert_eq!(frame.pixel(320, 9), Some([0, 0, 0xFF]), "{origin:?}");
        assert_eq!(frame.pixel(320, 10), Some([0, 0, 0]), "{origin:?}");
        assert_eq!(frame.pixel(320, 527), Some([0, 0, 0]), "{origin:?}");
    }
}

#[test]
fn test_scissor_matches_display_rows() {
    let regs = crate::RegisterSnapshot {
        scissor: crate::registers::ScissorRegisters::from_bits(
            (342 << 12) | 342,
            ((342 + 639) << 12) | (342 + 99),
            171 | (171 << 10),
        ),
        ..opaque_registers()
    };
    for (origin, expected) in [
        (HostOrigin::TopLeft, TargetRectangle::new(0, 0, 640, 100)),
        (HostOrigin::BottomLeft, TargetRectangle::new(0, 428, 640, 528)),
    ] {
        let mut renderer = new_renderer(origin, native_config());
        renderer.update_registers(regs);
        renderer.host_mut().clear_calls();
        renderer.set_scissor_rect();
        assert_eq!(renderer.host().calls(), &[HostCall::SetScissor(expected)], "{origin:?}");
    }
}

#[test]
fn test_top_and_bottom_puts_left_eye_on_top() {
    let config = VideoConfig {
        stereo_mode: StereoMode::TopAndBottom,
        ..native_config()
    };
    for origin in [HostOrigin::TopLeft, HostOrigin::BottomLeft] {
        let (mut renderer, sink) = dumping_renderer(origin, config.clone());
        let all = TargetRectangle::sized(640, 528);
        renderer.host_mut().fill_efb_layer(0, all, RED);
        renderer.host_mut().fill_efb_layer(1, all, BLUE);

        present_full(&mut renderer);

        let frame = sink.last_frame().unwrap();
        assert_eq!(frame.pixel(100, 0), Some([0xFF, 0, 0]), "{origin:?}");
        assert_eq!(frame.pixel(100, 263), Some([0xFF, 0, 0]), "{origin:?}");
        assert_eq!(frame.pixel(100, 264), Some([0, 0, 0xFF]), "{origin:?}");
        assert_eq!(frame.pixel(100, 527), Some([0, 0, 0xFF]), "{origin:?}");
    }
}

#[test]
fn test_side_by_side_puts_left_eye_on_left() {
    let config = VideoConfig {
        stereo_mode: StereoMode::SideBySide,
        ..native_config()
    };
    let (mut renderer, sink) = dumping_renderer(HostOrigin::BottomLeft, config);
    let all = TargetRectangle::sized(640, 528);
    renderer.host_mut().fill_efb_layer(0, all, RED);
    renderer.host_mut().fill_efb_layer(1, all, BLUE);

    present_full(&mut renderer);

    let frame = sink.last_frame().unwrap();
    assert_eq!(frame.pixel(0, 0), Some([0xFF, 0, 0]));
    assert_eq!(frame.pixel(319, 527), Some([0xFF, 0, 0]));
    assert_eq!(frame.pixel(320, 0), Some([0, 0, 0xFF]));
}
