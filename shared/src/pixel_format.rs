//! EFB pixel formats and the reduced-precision colour model.
//!
//! Colours are `0xAARRGGBB`. The quantizers truncate each channel to the
//! format's bit depth and immediately re-expand by bit replication, so a
//! quantized colour is a fixed point of its quantizer.

use crate::constants::DEPTH_24_MAX;

/// EFB pixel format, as selected by the pixel engine's z-control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PixelFormat {
    #[default]
    Rgb8Z24 = 0,
    Rgba6Z24 = 1,
    Rgb565Z16 = 2,
    Z24 = 3,
    Y8 = 4,
    U8 = 5,
    V8 = 6,
    Yuv420 = 7,
}

impl PixelFormat {
    /// Decodes the 3-bit register field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 7 {
            0 => Self::Rgb8Z24,
            1 => Self::Rgba6Z24,
            2 => Self::Rgb565Z16,
            3 => Self::Z24,
            4 => Self::Y8,
            5 => Self::U8,
            6 => Self::V8,
            _ => Self::Yuv420,
        }
    }

    /// Only RGBA6_Z24 stores destination alpha.
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba6Z24)
    }

    /// Right shift from a full-range host depth value to the emulated domain.
    pub const fn depth_shift(self) -> u32 {
        match self {
            Self::Rgb565Z16 => 16,
            _ => 8,
        }
    }

    /// Host depth (full `u32` range) to the emulated 16- or 24-bit depth.
    pub const fn normalize_depth(self, host_depth: u32) -> u32 {
        host_depth >> self.depth_shift()
    }

    /// Round-trips a host colour through this format's storage precision.
    ///
    /// Formats without destination alpha read back with alpha forced to 0xFF.
    pub fn quantize_color(self, argb: u32) -> u32 {
        match self {
            Self::Rgba6Z24 => quantize_rgba6(argb),
            Self::Rgb565Z16 => quantize_rgb565(argb) | 0xFF00_0000,
            _ => argb | 0xFF00_0000,
        }
    }
}

/// 8 → 6 → 8 bits per channel, alpha included.
pub const fn quantize_rgba6(argb: u32) -> u32 {
    (argb & 0xFCFC_FCFC) | ((argb >> 6) & 0x0303_0303)
}

/// 8 → 5/6/5 → 8 bits, alpha dropped to zero.
pub const fn quantize_rgb565(argb: u32) -> u32 {
    let r5 = (argb & 0x00FF_0000) >> 19;
    let g6 = (argb & 0x0000_FF00) >> 10;
    let b5 = (argb & 0x0000_00FF) >> 3;
    let r8 = (r5 << 3) | (r5 >> 2);
    let g8 = (g6 << 2) | (g6 >> 4);
    let b8 = (b5 << 3) | (b5 >> 2);
    (r8 << 16) | (g8 << 8) | b8
}

/// How the pixel engine fills alpha on CPU colour reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaReadMode {
    ReadZero,
    ReadFf,
    /// Return whatever the EFB holds.
    #[default]
    ReadNone,
}

impl AlphaReadMode {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::ReadZero,
            1 => Self::ReadFf,
            _ => Self::ReadNone,
        }
    }

    pub const fn apply(self, argb: u32) -> u32 {
        match self {
            Self::ReadZero => argb & 0x00FF_FFFF,
            Self::ReadFf => argb | 0xFF00_0000,
            Self::ReadNone => argb,
        }
    }
}

/// Splits an `0xAARRGGBB` colour into normalized `[r, g, b, a]`.
pub fn argb_to_rgba_f32(argb: u32) -> [f32; 4] {
    let channel = |shift: u32| ((argb >> shift) & 0xFF) as f32 / 255.0;
    [channel(16), channel(8), channel(0), channel(24)]
}

/// Emulated 24-bit depth to a normalized `[0, 1]` clear value.
pub fn depth24_to_f32(z: u32) -> f32 {
    (z & DEPTH_24_MAX) as f32 / DEPTH_24_MAX as f32
}
