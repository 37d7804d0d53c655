//! Emulated GPU register snapshot.
//!
//! The command-stream decoder upstream keeps these up to date; the
//! translator and the EFB cache only ever read them. Each register decodes
//! from its raw bit layout with `from_bits`.

use efbridge_shared::{AlphaReadMode, EfbRegion, PixelFormat};

/// Legacy blend factor indices, as stored in the blend-mode register.
pub mod blend_factor {
    pub const ZERO: u32 = 0;
    pub const ONE: u32 = 1;
    /// Source colour for the destination factor, destination colour for the source factor.
    pub const SRC_CLR: u32 = 2;
    pub const INV_SRC_CLR: u32 = 3;
    /// Same indices as the source factor sees them.
    pub const DST_CLR: u32 = 2;
    pub const INV_DST_CLR: u32 = 3;
    pub const SRC_ALPHA: u32 = 4;
    pub const INV_SRC_ALPHA: u32 = 5;
    pub const DST_ALPHA: u32 = 6;
    pub const INV_DST_ALPHA: u32 = 7;
}

/// Pixel-engine blend mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendModeRegister {
    pub blend_enable: bool,
    pub logic_op_enable: bool,
    pub dither: bool,
    pub color_update: bool,
    pub alpha_update: bool,
    pub dst_factor: u32,
    pub src_factor: u32,
    pub subtract: bool,
    pub logic_mode: u32,
}

impl BlendModeRegister {
    pub fn from_bits(bits: u32) -> Self {
        Self {
            blend_enable: bits & 1 != 0,
            logic_op_enable: bits & (1 << 1) != 0,
            dither: bits & (1 << 2) != 0,
            color_update: bits & (1 << 3) != 0,
            alpha_update: bits & (1 << 4) != 0,
            dst_factor: (bits >> 5) & 7,
            src_factor: (bits >> 8) & 7,
            subtract: bits & (1 << 11) != 0,
            logic_mode: (bits >> 12) & 0xF,
        }
    }

    pub fn to_bits(&self) -> u32 {
        (self.blend_enable as u32)
            | (self.logic_op_enable as u32) << 1
            | (self.dither as u32) << 2
            | (self.color_update as u32) << 3
            | (self.alpha_update as u32) << 4
            | (self.dst_factor & 7) << 5
            | (self.src_factor & 7) << 8
            | (self.subtract as u32) << 11
            | (self.logic_mode & 0xF) << 12
    }
}

/// Constant destination-alpha register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DstAlphaRegister {
    pub alpha: u8,
    pub enable: bool,
}

impl DstAlphaRegister {
    pub fn from_bits(bits: u32) -> Self {
        Self {
            alpha: (bits & 0xFF) as u8,
            enable: bits & (1 << 8) != 0,
        }
    }
}

/// Depth test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZModeRegister {
    pub test_enable: bool,
    /// Index into the compare function table.
    pub func: u32,
    pub update_enable: bool,
}

impl ZModeRegister {
    pub fn from_bits(bits: u32) -> Self {
        Self {
            test_enable: bits & 1 != 0,
            func: (bits >> 1) & 7,
            update_enable: bits & (1 << 4) != 0,
        }
    }
}

/// Raw cull mode: 0 none, 1 back, 2 front, 3 all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenModeRegister {
    pub cull_mode: u32,
}

impl GenModeRegister {
    pub fn from_bits(bits: u32) -> Self {
        Self {
            cull_mode: (bits >> 14) & 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaTestResult {
    Undetermined,
    Fail,
    Pass,
}

/// Alpha test register; only the comparison/logic shape matters here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaTestRegister {
    pub ref0: u8,
    pub ref1: u8,
    pub comp0: u32,
    pub comp1: u32,
    pub logic: u32,
}

impl Default for AlphaTestRegister {
    fn default() -> Self {
        // ALWAYS && ALWAYS
        Self {
            ref0: 0,
            ref1: 0,
            comp0: 7,
            comp1: 7,
            logic: 0,
        }
    }
}

impl AlphaTestRegister {
    pub fn from_bits(bits: u32) -> Self {
        Self {
            ref0: (bits & 0xFF) as u8,
            ref1: ((bits >> 8) & 0xFF) as u8,
            comp0: (bits >> 16) & 7,
            comp1: (bits >> 19) & 7,
            logic: (bits >> 22) & 3,
        }
    }

    /// Whether the test is decided independently of the fragment's alpha.
    pub fn test_result(&self) -> AlphaTestResult {
        let single = |comp: u32| match comp {
            0 => AlphaTestResult::Fail,
            7 => AlphaTestResult::Pass,
            _ => AlphaTestResult::Undetermined,
        };
        use AlphaTestResult::*;
        let (a, b) = (single(self.comp0), single(self.comp1));
        match self.logic {
            // AND
            0 => match (a, b) {
                (Fail, _) | (_, Fail) => Fail,
                (Pass, Pass) => Pass,
                _ => Undetermined,
            },
            // OR
            1 => match (a, b) {
                (Pass, _) | (_, Pass) => Pass,
                (Fail, Fail) => Fail,
                _ => Undetermined,
            },
            // XOR
            2 => match (a, b) {
                (Undetermined, _) | (_, Undetermined) => Undetermined,
                _ if a != b => Pass,
                _ => Fail,
            },
            // XNOR
            _ => match (a, b) {
                (Undetermined, _) | (_, Undetermined) => Undetermined,
                _ if a == b => Pass,
                _ => Fail,
            },
        }
    }
}

/// Scissor corners and offset, in GX coordinates (biased by 342).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRegisters {
    pub top_left: (u32, u32),
    /// Inclusive bottom-right corner.
    pub bottom_right: (u32, u32),
    /// Raw offset register, in units of two pixels.
    pub offset: (u32, u32),
}

impl Default for ScissorRegisters {
    fn default() -> Self {
        Self {
            top_left: (342, 342),
            bottom_right: (342 + 639, 342 + 527),
            offset: (171, 171),
        }
    }
}

impl ScissorRegisters {
    /// Decodes the top-left, bottom-right and offset registers.
    pub fn from_bits(tl: u32, br: u32, offset: u32) -> Self {
        let corner = |bits: u32| ((bits >> 12) & 0x7FF, bits & 0x7FF);
        Self {
            top_left: corner(tl),
            bottom_right: corner(br),
            offset: (offset & 0x3FF, (offset >> 10) & 0x3FF),
        }
    }

    /// Offset in EFB pixels, bias included.
    pub fn offset_pixels(&self) -> (i32, i32) {
        (self.offset.0 as i32 * 2, self.offset.1 as i32 * 2)
    }

    /// Scissor box as an EFB region.
    pub fn region(&self) -> EfbRegion {
        let (xoff, yoff) = self.offset_pixels();
        EfbRegion::new(
            self.top_left.0 as i32 - xoff,
            self.top_left.1 as i32 - yoff,
            self.bottom_right.0 as i32 - xoff + 1,
            self.bottom_right.1 as i32 - yoff + 1,
        )
    }
}

/// Transform-unit viewport, raw floating point registers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XfViewport {
    /// Half width.
    pub wd: f32,
    /// Half height, negative for the usual top-down layout.
    pub ht: f32,
    pub z_range: f32,
    pub x_orig: f32,
    pub y_orig: f32,
    pub far_z: f32,
}

impl Default for XfViewport {
    fn default() -> Self {
        Self {
            wd: 320.0,
            ht: -264.0,
            z_range: 16_777_215.0,
            x_orig: 342.0 + 320.0,
            y_orig: 342.0 + 264.0,
            far_z: 16_777_215.0,
        }
    }
}

/// Everything the translator and the cache read from the emulated GPU.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegisterSnapshot {
    pub blend_mode: BlendModeRegister,
    pub dst_alpha: DstAlphaRegister,
    pub z_mode: ZModeRegister,
    pub gen_mode: GenModeRegister,
    pub alpha_test: AlphaTestRegister,
    pub pixel_format: PixelFormat,
    pub scissor: ScissorRegisters,
    pub viewport: XfViewport,
    pub alpha_read: AlphaReadMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_mode_bits_round_trip() {
        let reg = BlendModeRegister {
            blend_enable: true,
            logic_op_enable: false,
            dither: true,
            color_update: true,
            alpha_update: false,
            dst_factor: blend_factor::INV_SRC_ALPHA,
            src_factor: blend_factor::SRC_ALPHA,
            subtract: false,
            logic_mode: 3,
        };
        assert_eq!(BlendModeRegister::from_bits(reg.to_bits()), reg);
        assert_eq!(reg.to_bits() & 0xE0, 5 << 5);
    }

    #[test]
    fn test_z_mode_decode() {
        let z = ZModeRegister::from_bits(0b1_011_1);
        assert!(z.test_enable);
        assert_eq!(z.func, 3);
        assert!(z.update_enable);
    }

    #[test]
    fn test_default_scissor_covers_efb() {
        assert_eq!(ScissorRegisters::default().region(), EfbRegion::full());
    }

    #[test]
    fn test_scissor_decode_with_offset() {
        // x = 352, y = 362; offset (176, 171) -> 352, 342
        let tl = (352 << 12) | 362;
        let br = (451 << 12) | 461;
        let offset = 176 | (171 << 10);
        let scissor = ScissorRegisters::from_bits(tl, br, offset);
        let region = scissor.region();
        assert_eq!(region, EfbRegion::new(0, 20, 100, 120));
    }

    #[test]
    fn test_alpha_test_results() {
        let always = AlphaTestRegister::default();
        assert_eq!(always.test_result(), AlphaTestResult::Pass);

        let never_and = AlphaTestRegister {
            comp0: 0,
            ..always
        };
        assert_eq!(never_and.test_result(), AlphaTestResult::Fail);

        let greater_or_never = AlphaTestRegister {
            comp0: 4,
            comp1: 0,
            logic: 1,
            ..always
        };
        assert_eq!(greater_or_never.test_result(), AlphaTestResult::Undetermined);

        let xnor_never_never = AlphaTestRegister {
            comp0: 0,
            comp1: 0,
            logic: 3,
            ..always
        };
        assert_eq!(xnor_never_never.test_result(), AlphaTestResult::Pass);
    }

    #[test]
    fn test_dst_alpha_decode() {
        let reg = DstAlphaRegister::from_bits(0x1_80);
        assert!(reg.enable);
        assert_eq!(reg.alpha, 0x80);
    }
}
