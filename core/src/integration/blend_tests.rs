//! Draw-state translation through the renderer

use efbridge_shared::{HostOrigin, PixelFormat};

use super::test_utils::*;
use crate::capabilities::HostCapabilities;
use crate::diagnostics::Degradation;
use crate::host::{BlendEquation, BlendFactor, BlendFactors, HostCall};
use crate::registers::{DstAlphaRegister, blend_factor};

fn factor_calls(renderer: &crate::Renderer<crate::SoftwareHost>) -> usize {
    renderer
        .host()
        .count_calls(|c| matches!(c, HostCall::SetBlendFactors(..)))
}

#[test]
fn test_thousand_identical_draws_configure_blending_once() {
    let mut renderer = new_renderer(HostOrigin::BottomLeft, native_config());
    renderer.update_registers(alpha_blend_registers());
    renderer.host_mut().clear_calls();

    for _ in 0..1000 {
        renderer.prepare_draw();
        renderer.on_draw_complete();
    }

    assert_eq!(factor_calls(&renderer), 1);
    assert!(renderer.host().calls().contains(&HostCall::SetBlendFactors(
        BlendFactors {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
        },
        BlendFactors {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
        },
    )));
}

#[test]
fn test_register_change_reissues_only_changed_groups() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    renderer.update_registers(alpha_blend_registers());
    renderer.prepare_draw();
    renderer.host_mut().clear_calls();

    let mut regs = alpha_blend_registers();
    regs.blend_mode.dst_factor = blend_factor::ONE;
    renderer.update_registers(regs);
    renderer.prepare_draw();

    assert_eq!(
        renderer.host().calls(),
        &[HostCall::SetBlendFactors(
            BlendFactors {
                src: BlendFactor::SrcAlpha,
                dst: BlendFactor::One,
            },
            BlendFactors {
                src: BlendFactor::SrcAlpha,
                dst: BlendFactor::One,
            },
        )]
    );
}

#[test]
fn test_subtract_blend_uses_reverse_subtract() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    let mut regs = alpha_blend_registers();
    regs.blend_mode.subtract = true;
    renderer.update_registers(regs);
    renderer.host_mut().clear_calls();
    renderer.prepare_draw();

    assert!(renderer.host().calls().contains(&HostCall::SetBlendEquation(
        BlendEquation::ReverseSubtract,
        BlendEquation::ReverseSubtract
    )));
    assert!(renderer.host().calls().contains(&HostCall::SetBlendFactors(
        BlendFactors {
            src: BlendFactor::One,
            dst: BlendFactor::One,
        },
        BlendFactors {
            src: BlendFactor::One,
            dst: BlendFactor::One,
        },
    )));
}

#[test]
fn test_present_forces_full_blend_reapply() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    renderer.update_registers(alpha_blend_registers());
    renderer.prepare_draw();
    let before = factor_calls(&renderer);

    present_full(&mut renderer);
    assert_eq!(factor_calls(&renderer), before + 1);

    // Already reapplied; the next draw issues nothing new.
    renderer.prepare_draw();
    assert_eq!(factor_calls(&renderer), before + 1);
}

#[test]
fn test_destination_alpha_without_dual_source_degrades_once() {
    let caps = HostCapabilities {
        dual_source_blend: false,
        ..test_caps(HostOrigin::TopLeft)
    };
    let mut renderer = new_renderer_with(caps, native_config(), 640, 528);
    let mut regs = alpha_blend_registers();
    regs.pixel_format = PixelFormat::Rgba6Z24;
    regs.dst_alpha = DstAlphaRegister {
        enable: true,
        alpha: 0x80,
    };
    renderer.update_registers(regs);

    for _ in 0..10 {
        renderer.prepare_draw();
    }

    let notices = renderer.drain_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, Degradation::DualSourceUnavailable.message());
}

#[test]
fn test_individual_state_setters() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    renderer.update_registers(opaque_registers());
    renderer.host_mut().clear_calls();

    renderer.set_depth_mode();
    renderer.set_generation_mode();
    renderer.set_scissor_rect();
    renderer.set_logic_op_mode();
    renderer.set_dither_mode();
    renderer.set_color_mask();
    renderer.set_viewport();

    let calls = renderer.host().calls();
    assert_eq!(calls.len(), 7);
    assert!(matches!(calls[0], HostCall::SetDepthState(_)));
    assert!(matches!(calls[1], HostCall::SetCullState(None)));
    assert!(matches!(calls[2], HostCall::SetScissor(_)));
    assert!(matches!(calls[3], HostCall::SetLogicOp(None)));
    assert!(matches!(calls[4], HostCall::SetDither(false)));
    assert!(matches!(calls[5], HostCall::SetColorMask(_)));
    assert!(matches!(calls[6], HostCall::SetViewport(_)));
}

#[test]
fn test_colour_factors_map_to_opaque_alpha_on_rgb8() {
    let mut renderer = new_renderer(HostOrigin::TopLeft, native_config());
    let mut regs = alpha_blend_registers();
    regs.pixel_format = PixelFormat::Rgb8Z24;
    regs.blend_mode.src_factor = blend_factor::DST_CLR;
    regs.blend_mode.dst_factor = blend_factor::ZERO;
    renderer.update_registers(regs);
    renderer.host_mut().clear_calls();
    renderer.prepare_draw();

    assert!(renderer.host().calls().contains(&HostCall::SetBlendFactors(
        BlendFactors {
            src: BlendFactor::DstColor,
            dst: BlendFactor::Zero,
        },
        BlendFactors {
            src: BlendFactor::One,
            dst: BlendFactor::Zero,
        },
    )));
}
