//! CPU access to the EFB through the renderer (peek, poke, clear)

use efbridge_shared::{
    AlphaReadMode, EFB_CACHE_TILE_COUNT, EfbAccessKind, EfbRegion, HostOrigin, PixelFormat,
    TargetRectangle, quantize_rgba6,
};

use super::test_utils::*;
use crate::config::{MsaaMode, VideoConfig};
use crate::efb_cache::EfbCache;
use crate::host::{HostCall, HostGpu};

fn reads(renderer: &crate::Renderer<crate::SoftwareHost>) -> usize {
    renderer
        .host()
        .count_calls(|c| matches!(c, HostCall::Read(..)))
}

fn paint(renderer: &mut crate::Renderer<crate::SoftwareHost>, kind: EfbAccessKind, rect: TargetRectangle, value: u32) {
    renderer.host_mut().fill_efb(kind, rect, value);
}

// ============================================================================
// Peeks
// ============================================================================

#[test]
fn test_peek_color_reads_drawn_pixel() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    paint(&mut renderer, EfbAccessKind::Color, TargetRectangle::new(100, 200, 101, 201), 0x0012_3456);

    // RGB8 reads back opaque.
    assert_eq!(renderer.peek_color(100, 200), 0xFF12_3456);
    assert_eq!(renderer.peek_color(101, 200), 0xFF00_0000);
}

#[test]
fn test_peeks_within_a_tile_share_one_readback() {
    let mut renderer = new_renderer(HostOrigin::BottomLeft, native_config());
    for y in 192..256 {
        for x in 64..128 {
            renderer.peek_color(x, y);
        }
    }
    assert_eq!(reads(&renderer), 1);
    assert!(renderer.context().cache.is_valid(EfbAccessKind::Color, EfbCache::tile_index(100, 200)));
    assert!(!renderer.context().cache.is_valid(EfbAccessKind::Depth, EfbCache::tile_index(100, 200)));
}

#[test]
fn test_draw_completion_invalidates_cached_tiles() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    let pixel = TargetRectangle::new(10, 10, 11, 11);
    paint(&mut renderer, EfbAccessKind::Color, pixel, 0xFF11_1111);
    assert_eq!(renderer.peek_color(10, 10), 0xFF11_1111);

    paint(&mut renderer, EfbAccessKind::Color, pixel, 0xFF22_2222);
    assert_eq!(renderer.peek_color(10, 10), 0xFF11_1111, "served from cache");

    renderer.on_draw_complete();
    assert_eq!(renderer.peek_color(10, 10), 0xFF22_2222);
    assert_eq!(reads(&renderer), 2);
}

#[test]
fn test_upscaled_bottom_left_peek_samples_midpoint() {
    let mut renderer = new_renderer(HostOrigin::BottomLeft, scaled_config(3));
    // Source (5, 7) covers host columns [15, 18) and rows [1560, 1563).
    paint(&mut renderer, EfbAccessKind::Color, TargetRectangle::new(16, 1561, 17, 1562), 0xFFAB_CDEF);

    assert_eq!(renderer.peek_color(5, 7), 0xFFAB_CDEF);
    assert_eq!(renderer.peek_color(5, 8), 0xFF00_0000);
}

#[test]
fn test_peek_depth_by_format() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    // A D24 buffer reads back as the 24 bits replicated into 32.
    paint(&mut renderer, EfbAccessKind::Depth, TargetRectangle::new(0, 0, 1, 1), 0x1234_5612);

    assert_eq!(renderer.peek_depth(0, 0), 0x12_3456);

    let regs = crate::RegisterSnapshot {
        pixel_format: PixelFormat::Rgb565Z16,
        ..Default::default()
    };
    renderer.update_registers(regs);
    assert_eq!(renderer.peek_depth(0, 0), 0x1234);
}

#[test]
fn test_peek_color_quantizes_and_applies_alpha_read() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    paint(&mut renderer, EfbAccessKind::Color, TargetRectangle::new(0, 0, 1, 1), 0x80FF_4321);

    renderer.update_registers(crate::RegisterSnapshot {
        pixel_format: PixelFormat::Rgba6Z24,
        ..Default::default()
    });
    assert_eq!(renderer.peek_color(0, 0), quantize_rgba6(0x80FF_4321));

    renderer.update_registers(crate::RegisterSnapshot {
        pixel_format: PixelFormat::Rgba6Z24,
        alpha_read: AlphaReadMode::ReadZero,
        ..Default::default()
    });
    assert_eq!(renderer.peek_color(0, 0), quantize_rgba6(0x80FF_4321) & 0x00FF_FFFF);
}

#[test]
fn test_out_of_range_peek_reads_zero_without_readback() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    assert_eq!(renderer.peek_color(640, 0), 0);
    assert_eq!(renderer.peek_depth(0, 528), 0);
    assert_eq!(reads(&renderer), 0);
}

#[test]
fn test_multisampled_peek_resolves_inside_reset_state() {
    let config = VideoConfig {
        msaa: MsaaMode::X4,
        ..native_config()
    };
    let mut renderer = new_renderer(HostOrigin::TopLeft, config);
    renderer.update_registers(alpha_blend_registers());
    renderer.host_mut().clear_calls();

    renderer.peek_color(0, 0);

    let calls = renderer.host().calls();
    let reset = calls.iter().position(|c| *c == HostCall::ResetDrawState).unwrap();
    let resolve = calls
        .iter()
        .position(|c| {
            *c == HostCall::Resolve(EfbAccessKind::Color, TargetRectangle::new(0, 0, 64, 64))
        })
        .unwrap();
    let read = calls.iter().position(|c| matches!(c, HostCall::Read(..))).unwrap();
    let restored = calls
        .iter()
        .rposition(|c| matches!(c, HostCall::SetBlendEnabled(true)))
        .unwrap();
    assert!(reset < resolve && resolve < read && read < restored);
}

#[test]
fn test_single_sample_peek_leaves_draw_state_alone() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    renderer.host_mut().clear_calls();
    renderer.peek_color(0, 0);
    assert_eq!(
        renderer.host().calls(),
        &[HostCall::Read(EfbAccessKind::Color, TargetRectangle::new(0, 0, 64, 64))]
    );
}

#[test]
fn test_readback_failure_reads_zero_and_reports_once() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    renderer.drain_notices();
    paint(&mut renderer, EfbAccessKind::Color, TargetRectangle::new(0, 0, 1, 1), 0xFFFF_FFFF);
    renderer.host_mut().set_fail_readbacks(true);

    assert_eq!(renderer.peek_color(0, 0), 0);
    assert_eq!(renderer.peek_color(0, 0), 0);
    let notices = renderer.drain_notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.starts_with("EFB peek failed"));

    renderer.host_mut().set_fail_readbacks(false);
    assert_eq!(renderer.peek_color(0, 0), 0xFFFF_FFFF);
}

// ============================================================================
// Pokes
// ============================================================================

#[test]
fn test_poke_drops_every_cached_tile() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    for tile in 0..EFB_CACHE_TILE_COUNT {
        let region = EfbCache::tile_region(tile);
        renderer.peek_color(region.left(), region.top());
        renderer.peek_depth(region.left(), region.top());
    }
    assert_eq!(renderer.context().cache.validity().valid_count(), 2 * EFB_CACHE_TILE_COUNT);

    renderer.poke_color(100, 200, 0xFF00_FF00);

    assert_eq!(renderer.context().cache.validity().valid_count(), 0);
    assert_eq!(renderer.peek_color(100, 200), 0xFF00_FF00);
}

#[test]
fn test_poke_color_then_peek() {
    for origin in [HostOrigin::TopLeft, HostOrigin::BottomLeft] {
        let mut renderer = new_renderer(origin, scaled_config(2));
        renderer.poke_color(20, 30, 0xFF12_3456);

        assert_eq!(renderer.peek_color(20, 30), 0xFF12_3456, "{origin:?}");
        assert_eq!(renderer.peek_color(21, 30), 0xFF00_0000, "{origin:?}");
        assert_eq!(renderer.peek_color(20, 31), 0xFF00_0000, "{origin:?}");
    }
}

#[test]
fn test_poke_depth_then_peek() {
    let mut renderer = new_renderer(HostOrigin::BottomLeft, native_config());
    renderer.poke_depth(7, 9, 0x12_3456);
    assert_eq!(renderer.peek_depth(7, 9), 0x12_3456);
    // Colour is untouched by a depth poke.
    assert_eq!(renderer.peek_color(7, 9), 0xFF00_0000);
}

#[test]
fn test_poke_clears_only_the_source_footprint() {
    let mut renderer = new_renderer(HostOrigin::BottomLeft, scaled_config(2));
    renderer.host_mut().clear_calls();
    renderer.poke_color(10, 1, 0xFFFF_FFFF);

    let clear = renderer
        .host()
        .calls()
        .iter()
        .find_map(|c| match c {
            HostCall::Clear(request) => Some(*request),
            _ => None,
        })
        .unwrap();
    // Source row 1 is host rows [1052, 1054) of 1056.
    assert_eq!(clear.rect, TargetRectangle::new(20, 1052, 22, 1054));
}

#[test]
fn test_poke_restores_draw_state() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    renderer.update_registers(alpha_blend_registers());
    renderer.host_mut().clear_calls();

    renderer.poke_color(0, 0, 0);

    let calls = renderer.host().calls();
    assert_eq!(calls[0], HostCall::ResetDrawState);
    assert!(matches!(calls[1], HostCall::Clear(_)));
    assert!(calls[2..].iter().any(|c| matches!(c, HostCall::SetBlendEnabled(true))));
}

// ============================================================================
// Screen clears
// ============================================================================

#[test]
fn test_clear_screen_respects_channel_masks() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    paint(&mut renderer, EfbAccessKind::Color, TargetRectangle::sized(640, 528), 0x11_22_33_44);

    renderer.update_registers(crate::RegisterSnapshot {
        pixel_format: PixelFormat::Rgba6Z24,
        ..Default::default()
    });
    renderer.clear_screen(EfbRegion::new(0, 0, 32, 32), true, false, true, 0xFFFF_FFFF, 0x80_0000);

    let cleared = renderer.host().efb_pixel(EfbAccessKind::Color, 5, 5).unwrap();
    assert_eq!(cleared, 0x11FF_FFFF);
    let outside = renderer.host().efb_pixel(EfbAccessKind::Color, 40, 40).unwrap();
    assert_eq!(outside, 0x1122_3344);
    assert_eq!(renderer.peek_depth(5, 5), 0x80_0000);
}

#[test]
fn test_clear_screen_invalidates_cache() {
    let mut renderer = new_renderer(HostOrigin::BottomLeft, native_config());
    assert_eq!(renderer.peek_color(0, 0), 0xFF00_0000);

    renderer.clear_screen(EfbRegion::full(), true, true, false, 0xFF40_5060, 0);

    assert!(renderer.context().cache.validity().is_cleared());
    assert_eq!(renderer.peek_color(0, 0), 0xFF40_5060);
}

#[test]
fn test_clear_screen_with_nothing_enabled_is_a_no_op() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    renderer.host_mut().clear_calls();
    renderer.clear_screen(EfbRegion::full(), false, false, false, 0, 0);
    assert!(renderer.host().calls().is_empty());
}

#[test]
fn test_bounding_box_through_renderer() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, scaled_config(2));
    renderer.bbox_write(0, 12);
    renderer.bbox_write(1, 300);
    assert_eq!(renderer.host_mut().bbox_value(0), 24);
    assert_eq!(renderer.bbox_read(0), 12);
    assert_eq!(renderer.bbox_read(1), 300);
}
