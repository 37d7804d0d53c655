//! Fixed-function register state to host draw state.
//!
//! Blend state is change-detected against the last applied value so that
//! redundant draws issue no host calls. Everything else is a direct mapping
//! that the upstream calls when the corresponding register changes, or in
//! bulk through [`RenderStateTranslator::restore`] after a utility pass
//! reset the host's draw state.

mod blend;


pub use blend::{BlendChanges, BlendState};

use efbridge_shared::{EFB_HEIGHT, EfbScale, HostOrigin};

use crate::capabilities::HostCapabilities;
use crate::diagnostics::{Degradation, Diagnostics};
use crate::host::{ColorMask, CompareFunction, CullState, DepthState, FrontFace, HostGpu, LogicOp, Viewport};
use crate::registers::{AlphaTestResult, RegisterSnapshot};

/// Host depth range is normalized against 2^24.
const DEPTH_RANGE_DIVISOR: f32 = 16_777_216.0;

const COMPARE_FUNCTIONS: [CompareFunction; 8] = [
    CompareFunction::Never,
    CompareFunction::Less,
    CompareFunction::Equal,
    CompareFunction::LessEqual,
    CompareFunction::Greater,
    CompareFunction::NotEqual,
    CompareFunction::GreaterEqual,
    CompareFunction::Always,
];

const LOGIC_OPS: [LogicOp; 16] = [
    LogicOp::Clear,
    LogicOp::And,
    LogicOp::AndReverse,
    LogicOp::Copy,
    LogicOp::AndInverted,
    LogicOp::Noop,
    LogicOp::Xor,
    LogicOp::Or,
    LogicOp::Nor,
    LogicOp::Equiv,
    LogicOp::Invert,
    LogicOp::OrReverse,
    LogicOp::CopyInverted,
    LogicOp::OrInverted,
    LogicOp::Nand,
    LogicOp::Set,
];

/// Translates register snapshots into host draw state.
#[derive(Debug)]
pub struct RenderStateTranslator {
    caps: HostCapabilities,
    dst_alpha_pass: bool,
    /// Last blend state handed to the host, `None` after invalidation.
    applied_blend: Option<BlendState>,
}

impl RenderStateTranslator {
    pub fn new(caps: HostCapabilities, dst_alpha_pass: bool) -> Self {
        Self {
            caps,
            dst_alpha_pass,
            applied_blend: None,
        }
    }

    pub fn applied_blend(&self) -> Option<BlendState> {
        self.applied_blend
    }

    pub fn set_dst_alpha_pass(&mut self, enabled: bool) {
        if self.dst_alpha_pass != enabled {
            self.dst_alpha_pass = enabled;
            self.applied_blend = None;
        }
    }

    /// Forgets the applied blend state; the next [`apply_blend`] reissues
    /// everything.
    ///
    /// [`apply_blend`]: Self::apply_blend
    pub fn invalidate(&mut self) {
        self.applied_blend = None;
    }

    /// Resolves the blend state for `regs` without touching the host.
    pub fn resolve_blend(&self, regs: &RegisterSnapshot, diag: &mut Diagnostics) -> BlendState {
        let target_has_alpha = regs.pixel_format.has_alpha();
        let use_dst_alpha = !self.dst_alpha_pass
            && regs.dst_alpha.enable
            && regs.blend_mode.alpha_update
            && target_has_alpha;
        if use_dst_alpha && !self.caps.dual_source_blend {
            diag.degrade(Degradation::DualSourceUnavailable);
        }
        let use_dual_source = use_dst_alpha && self.caps.dual_source_blend;
        BlendState::resolve(&regs.blend_mode, use_dual_source, target_has_alpha)
    }

    /// Applies the blend state for `regs`, issuing only the host calls for
    /// state groups that changed. `force` reissues all of them.
    pub fn apply_blend(
        &mut self,
        host: &mut dyn HostGpu,
        regs: &RegisterSnapshot,
        force: bool,
        diag: &mut Diagnostics,
    ) {
        let state = self.resolve_blend(regs, diag);
        let changes = if force {
            BlendChanges::ALL
        } else {
            state.changes_from(self.applied_blend)
        };

        if changes.enable {
            host.set_blend_enabled(state.enabled());
        }
        if changes.equation {
            let (color, alpha) = state.equations();
            host.set_blend_equation(color, alpha);
        }
        if changes.factors {
            host.set_blend_factors(state.color_factors(), state.alpha_factors());
        }
        self.applied_blend = Some(state);
    }

    pub fn depth_state(regs: &RegisterSnapshot) -> DepthState {
        let z = regs.z_mode;
        if !z.test_enable {
            return DepthState::DISABLED;
        }
        DepthState {
            test_enable: true,
            write_enable: z.update_enable,
            compare: COMPARE_FUNCTIONS[(z.func & 7) as usize],
        }
    }

    pub fn set_depth(&self, host: &mut dyn HostGpu, regs: &RegisterSnapshot) {
        host.set_depth_state(Self::depth_state(regs));
    }

    pub fn cull_state(regs: &RegisterSnapshot, diag: &mut Diagnostics) -> CullState {
        match regs.gen_mode.cull_mode & 3 {
            0 => None,
            1 => Some(FrontFace::Cw),
            2 => Some(FrontFace::Ccw),
            _ => {
                diag.degrade(Degradation::CullAllUnsupported);
                Some(FrontFace::Cw)
            }
        }
    }

    pub fn set_cull(&self, host: &mut dyn HostGpu, regs: &RegisterSnapshot, diag: &mut Diagnostics) {
        host.set_cull_state(Self::cull_state(regs, diag));
    }

    pub fn set_scissor(&self, host: &mut dyn HostGpu, regs: &RegisterSnapshot, scale: EfbScale) {
        host.set_scissor(scale.to_target(regs.scissor.region(), self.caps.origin));
    }

    /// Logic ops apply only while blending is off.
    pub fn set_logic_op(&self, host: &mut dyn HostGpu, regs: &RegisterSnapshot, diag: &mut Diagnostics) {
        let blend = regs.blend_mode;
        let op = (blend.logic_op_enable && !blend.blend_enable)
            .then(|| LOGIC_OPS[(blend.logic_mode & 0xF) as usize]);
        if !self.caps.logic_op {
            if op.is_some_and(|op| op != LogicOp::Copy) {
                diag.degrade(Degradation::LogicOpUnavailable);
            }
            return;
        }
        host.set_logic_op(op);
    }

    pub fn set_dither(&self, host: &mut dyn HostGpu, regs: &RegisterSnapshot) {
        host.set_dither(regs.blend_mode.dither);
    }

    pub fn color_mask(regs: &RegisterSnapshot) -> ColorMask {
        if regs.alpha_test.test_result() == AlphaTestResult::Fail {
            return ColorMask::NONE;
        }
        ColorMask {
            color: regs.blend_mode.color_update,
            alpha: regs.blend_mode.alpha_update && regs.pixel_format.has_alpha(),
        }
    }

    pub fn set_color_mask(&self, host: &mut dyn HostGpu, regs: &RegisterSnapshot) {
        host.set_color_mask(Self::color_mask(regs));
    }

    /// Host viewport for the XF viewport registers, in target pixels.
    pub fn viewport(
        &self,
        regs: &RegisterSnapshot,
        scale: EfbScale,
        diag: &mut Diagnostics,
    ) -> Viewport {
        let vp = regs.viewport;
        let (xoff, yoff) = regs.scissor.offset_pixels();

        let mut x = vp.x_orig - vp.wd - xoff as f32;
        let mut y = vp.y_orig + vp.ht - yoff as f32;
        let mut width = 2.0 * vp.wd;
        let mut height = -2.0 * vp.ht;
        if width < 0.0 {
            x += width;
            width = -width;
        }
        if height < 0.0 {
            y += height;
            height = -height;
        }
        if self.caps.origin == HostOrigin::BottomLeft {
            y = EFB_HEIGHT as f32 - (y + height);
        }

        let mut viewport = Viewport {
            x: scale.scale_xf(x),
            y: scale.scale_yf(y),
            width: scale.scale_xf(width),
            height: scale.scale_yf(height),
            min_depth: (vp.far_z - vp.z_range) / DEPTH_RANGE_DIVISOR,
            max_depth: vp.far_z / DEPTH_RANGE_DIVISOR,
        };
        if !self.caps.float_viewport {
            let fractional = [viewport.x, viewport.y, viewport.width, viewport.height]
                .iter()
                .any(|v| v.fract() != 0.0);
            if fractional {
                diag.degrade(Degradation::FloatViewportUnavailable);
            }
            viewport.x = viewport.x.ceil();
            viewport.y = viewport.y.ceil();
            viewport.width = viewport.width.ceil();
            viewport.height = viewport.height.ceil();
        }
        viewport
    }

    pub fn set_viewport(
        &self,
        host: &mut dyn HostGpu,
        regs: &RegisterSnapshot,
        scale: EfbScale,
        diag: &mut Diagnostics,
    ) {
        host.set_viewport(self.viewport(regs, scale, diag));
    }

    /// Reapplies every piece of draw state, blend included, after the host's
    /// draw state was reset.
    pub fn restore(
        &mut self,
        host: &mut dyn HostGpu,
        regs: &RegisterSnapshot,
        scale: EfbScale,
        diag: &mut Diagnostics,
    ) {
        self.set_cull(host, regs, diag);
        self.set_scissor(host, regs, scale);
        self.set_color_mask(host, regs);
        self.set_depth(host, regs);
        self.apply_blend(host, regs, true, diag);
        self.set_logic_op(host, regs, diag);
        self.set_dither(host, regs);
        self.set_viewport(host, regs, scale, diag);
    }
}
