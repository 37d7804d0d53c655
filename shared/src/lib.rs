//! Shared types for the efbridge embedded frame buffer layer.
//!
//! Everything here is plain data: EFB geometry, pixel formats and their
//! reduced-precision colour model, and the stereo layout of a presented
//! frame. Nothing in this crate talks to a GPU.

pub mod constants;
pub mod geometry;
pub mod pixel_format;
pub mod stereo;

pub use constants::*;
pub use geometry::{EfbRegion, EfbScale, HostOrigin, TargetRectangle};
pub use pixel_format::{
    AlphaReadMode, PixelFormat, argb_to_rgba_f32, depth24_to_f32, quantize_rgb565, quantize_rgba6,
};
pub use stereo::StereoMode;

/// Which EFB plane a peek or poke addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EfbAccessKind {
    Depth = 0,
    Color = 1,
}

impl EfbAccessKind {
    pub const ALL: [EfbAccessKind; 2] = [EfbAccessKind::Depth, EfbAccessKind::Color];

    /// Index into per-kind tables.
    pub const fn index(self) -> usize {
        self as usize
    }
}
