//! Packed blend key and the legacy factor tables.

use crate::host::{BlendEquation, BlendFactor, BlendFactors};
use crate::registers::{BlendModeRegister, blend_factor};

const ENABLE: u32 = 1;
const DUAL_SOURCE: u32 = 1 << 1;
const SUBTRACT: u32 = 1 << 2;
const SRC_SHIFT: u32 = 3;
const DST_SHIFT: u32 = 6;
const TARGET_ALPHA: u32 = 1 << 9;

/// Subtract blends always run `src * 1 - dst * 1`.
const SUBTRACT_FORCED: u32 = ENABLE | (1 << SRC_SHIFT) | (1 << DST_SHIFT);

const ENABLE_MASK: u32 = ENABLE;
const EQUATION_MASK: u32 = DUAL_SOURCE | SUBTRACT;
const FACTOR_MASK: u32 = DUAL_SOURCE | (0x3F << SRC_SHIFT) | TARGET_ALPHA;

/// Resolved blend configuration packed into a `u32` so that change
/// detection is a single xor.
///
/// | bits | meaning |
/// |------|---------|
/// | 0 | blending enabled |
/// | 1 | dual-source blending |
/// | 2 | reverse subtract |
/// | 3-5 | source factor index |
/// | 6-8 | destination factor index |
/// | 9 | render target has an alpha channel |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlendState(u32);

/// Host state groups that differ between two blend states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendChanges {
    pub enable: bool,
    pub equation: bool,
    pub factors: bool,
}

impl BlendChanges {
    pub const ALL: BlendChanges = BlendChanges {
        enable: true,
        equation: true,
        factors: true,
    };

    pub fn any(&self) -> bool {
        self.enable || self.equation || self.factors
    }
}

impl BlendState {
    pub fn resolve(blend: &BlendModeRegister, use_dual_source: bool, target_has_alpha: bool) -> Self {
        let mut bits = (use_dual_source as u32) << 1 | (target_has_alpha as u32) << 9;
        if blend.subtract {
            bits |= SUBTRACT | SUBTRACT_FORCED;
        } else if blend.blend_enable {
            bits |= ENABLE | (blend.src_factor & 7) << SRC_SHIFT | (blend.dst_factor & 7) << DST_SHIFT;
        }
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn enabled(self) -> bool {
        self.0 & ENABLE != 0
    }

    pub const fn dual_source(self) -> bool {
        self.0 & DUAL_SOURCE != 0
    }

    pub const fn subtract(self) -> bool {
        self.0 & SUBTRACT != 0
    }

    pub const fn target_has_alpha(self) -> bool {
        self.0 & TARGET_ALPHA != 0
    }

    pub const fn src_index(self) -> usize {
        ((self.0 >> SRC_SHIFT) & 7) as usize
    }

    pub const fn dst_index(self) -> usize {
        ((self.0 >> DST_SHIFT) & 7) as usize
    }

    /// Host state groups to reissue when moving from `previous` to `self`.
    /// `None` means nothing has been applied yet.
    pub fn changes_from(self, previous: Option<BlendState>) -> BlendChanges {
        let Some(previous) = previous else {
            return BlendChanges::ALL;
        };
        let diff = self.0 ^ previous.0;
        BlendChanges {
            enable: diff & ENABLE_MASK != 0,
            equation: diff & EQUATION_MASK != 0,
            factors: diff & FACTOR_MASK != 0,
        }
    }

    /// Colour and alpha equations.
    pub fn equations(self) -> (BlendEquation, BlendEquation) {
        let color = if self.subtract() {
            BlendEquation::ReverseSubtract
        } else {
            BlendEquation::Add
        };
        let alpha = if self.dual_source() {
            BlendEquation::Add
        } else {
            color
        };
        (color, alpha)
    }

    pub fn color_factors(self) -> BlendFactors {
        BlendFactors {
            src: self.src_table()[self.src_index()],
            dst: self.dst_table()[self.dst_index()],
        }
    }

    /// Colour-only factors move to their alpha counterparts in the same
    /// table, so a target without alpha reads destination alpha as 1.
    pub fn alpha_factors(self) -> BlendFactors {
        let (src, dst) = if self.dual_source() {
            (blend_factor::ONE as usize, blend_factor::ZERO as usize)
        } else {
            let src = match self.src_index() as u32 {
                blend_factor::DST_CLR => blend_factor::DST_ALPHA,
                blend_factor::INV_DST_CLR => blend_factor::INV_DST_ALPHA,
                other => other,
            };
            let dst = match self.dst_index() as u32 {
                blend_factor::SRC_CLR => blend_factor::SRC_ALPHA,
                blend_factor::INV_SRC_CLR => blend_factor::INV_SRC_ALPHA,
                other => other,
            };
            (src as usize, dst as usize)
        };
        BlendFactors {
            src: self.src_table()[src],
            dst: self.dst_table()[dst],
        }
    }

    fn src_table(self) -> [BlendFactor; 8] {
        let (src_alpha, inv_src_alpha) = self.src_alpha_pair();
        let (dst_alpha, inv_dst_alpha) = self.dst_alpha_pair();
        [
            BlendFactor::Zero,
            BlendFactor::One,
            BlendFactor::DstColor,
            BlendFactor::OneMinusDstColor,
            src_alpha,
            inv_src_alpha,
            dst_alpha,
            inv_dst_alpha,
        ]
    }

    fn dst_table(self) -> [BlendFactor; 8] {
        let (src_alpha, inv_src_alpha) = self.src_alpha_pair();
        let (dst_alpha, inv_dst_alpha) = self.dst_alpha_pair();
        [
            BlendFactor::Zero,
            BlendFactor::One,
            BlendFactor::SrcColor,
            BlendFactor::OneMinusSrcColor,
            src_alpha,
            inv_src_alpha,
            dst_alpha,
            inv_dst_alpha,
        ]
    }

    fn src_alpha_pair(self) -> (BlendFactor, BlendFactor) {
        if self.dual_source() {
            (BlendFactor::Src1Alpha, BlendFactor::OneMinusSrc1Alpha)
        } else {
            (BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha)
        }
    }

    fn dst_alpha_pair(self) -> (BlendFactor, BlendFactor) {
        if self.target_has_alpha() {
            (BlendFactor::DstAlpha, BlendFactor::OneMinusDstAlpha)
        } else {
            (BlendFactor::One, BlendFactor::Zero)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(src: u32, dst: u32) -> BlendModeRegister {
        BlendModeRegister {
            blend_enable: true,
            src_factor: src,
            dst_factor: dst,
            color_update: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_subtract_forces_one_one() {
        let reg = BlendModeRegister {
            subtract: true,
            src_factor: blend_factor::SRC_ALPHA,
            dst_factor: blend_factor::INV_SRC_ALPHA,
            ..Default::default()
        };
        let state = BlendState::resolve(&reg, false, false);
        assert_eq!(state.bits(), 0x49 | SUBTRACT);
        assert_eq!(
            state.color_factors(),
            BlendFactors {
                src: BlendFactor::One,
                dst: BlendFactor::One
            }
        );
        assert_eq!(
            state.equations(),
            (BlendEquation::ReverseSubtract, BlendEquation::ReverseSubtract)
        );
    }

    #[test]
    fn test_disabled_blend_has_no_factor_bits() {
        let reg = BlendModeRegister {
            blend_enable: false,
            src_factor: blend_factor::SRC_ALPHA,
            dst_factor: blend_factor::INV_SRC_ALPHA,
            ..Default::default()
        };
        let state = BlendState::resolve(&reg, false, false);
        assert!(!state.enabled());
        assert_eq!(state.src_index(), 0);
        assert_eq!(state.dst_index(), 0);
    }

    #[test]
    fn test_dual_source_factors() {
        let reg = register(blend_factor::SRC_ALPHA, blend_factor::INV_SRC_ALPHA);
        let state = BlendState::resolve(&reg, true, true);
        assert_eq!(
            state.color_factors(),
            BlendFactors {
                src: BlendFactor::Src1Alpha,
                dst: BlendFactor::OneMinusSrc1Alpha
            }
        );
        assert_eq!(
            state.alpha_factors(),
            BlendFactors {
                src: BlendFactor::One,
                dst: BlendFactor::Zero
            }
        );
        assert_eq!(state.equations().1, BlendEquation::Add);
    }

    #[test]
    fn test_dst_alpha_without_alpha_channel() {
        let reg = register(blend_factor::DST_ALPHA, blend_factor::INV_DST_ALPHA);
        let opaque = BlendState::resolve(&reg, false, false);
        assert_eq!(
            opaque.color_factors(),
            BlendFactors {
                src: BlendFactor::One,
                dst: BlendFactor::Zero
            }
        );
        let with_alpha = BlendState::resolve(&reg, false, true);
        assert_eq!(
            with_alpha.color_factors(),
            BlendFactors {
                src: BlendFactor::DstAlpha,
                dst: BlendFactor::OneMinusDstAlpha
            }
        );
    }

    #[test]
    fn test_color_factors_substituted_for_alpha() {
        let reg = register(blend_factor::DST_CLR, blend_factor::INV_SRC_CLR);
        let state = BlendState::resolve(&reg, false, true);
        assert_eq!(
            state.color_factors(),
            BlendFactors {
                src: BlendFactor::DstColor,
                dst: BlendFactor::OneMinusSrcColor
            }
        );
        assert_eq!(
            state.alpha_factors(),
            BlendFactors {
                src: BlendFactor::DstAlpha,
                dst: BlendFactor::OneMinusSrcAlpha
            }
        );
    }

    #[test]
    fn test_substituted_alpha_factors_without_alpha_channel() {
        let reg = register(blend_factor::DST_CLR, blend_factor::INV_SRC_CLR);
        let state = BlendState::resolve(&reg, false, false);
        assert_eq!(
            state.alpha_factors(),
            BlendFactors {
                src: BlendFactor::One,
                dst: BlendFactor::OneMinusSrcAlpha
            }
        );

        let reg = register(blend_factor::INV_DST_CLR, blend_factor::SRC_CLR);
        let state = BlendState::resolve(&reg, false, false);
        assert_eq!(
            state.alpha_factors(),
            BlendFactors {
                src: BlendFactor::Zero,
                dst: BlendFactor::SrcAlpha
            }
        );
    }

    #[test]
    fn test_dual_source_alpha_factors_are_one_zero() {
        let reg = register(blend_factor::DST_CLR, blend_factor::SRC_CLR);
        let state = BlendState::resolve(&reg, true, true);
        assert_eq!(
            state.alpha_factors(),
            BlendFactors {
                src: BlendFactor::One,
                dst: BlendFactor::Zero
            }
        );
    }

    #[test]
    fn test_change_masks() {
        let a = BlendState::resolve(&register(4, 5), false, true);
        assert_eq!(a.changes_from(None), BlendChanges::ALL);
        assert!(!a.changes_from(Some(a)).any());

        let other_factors = BlendState::resolve(&register(1, 0), false, true);
        let changes = other_factors.changes_from(Some(a));
        assert!(changes.factors);
        assert!(!changes.enable);
        assert!(!changes.equation);

        let dual = BlendState::resolve(&register(4, 5), true, true);
        let changes = dual.changes_from(Some(a));
        assert!(changes.equation);
        assert!(changes.factors);
        assert!(!changes.enable);

        let format_change = BlendState::resolve(&register(4, 5), false, false);
        assert_eq!(
            format_change.changes_from(Some(a)),
            BlendChanges {
                enable: false,
                equation: false,
                factors: true
            }
        );
    }
}
