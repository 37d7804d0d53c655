//! Centralized constants for the embedded frame buffer.
//!
//! Single source of truth for the native EFB geometry and the readback
//! cache tiling derived from it.

/// Native EFB width in pixels.
pub const EFB_WIDTH: u32 = 640;

/// Native EFB height in pixels.
pub const EFB_HEIGHT: u32 = 528;

/// Edge length of one readback cache tile, in source pixels.
pub const EFB_CACHE_TILE_SIZE: u32 = 64;

/// Tiles per cache row.
pub const EFB_CACHE_TILES_X: u32 = EFB_WIDTH.div_ceil(EFB_CACHE_TILE_SIZE);

/// Tiles per cache column.
pub const EFB_CACHE_TILES_Y: u32 = EFB_HEIGHT.div_ceil(EFB_CACHE_TILE_SIZE);

/// Tiles per access kind.
pub const EFB_CACHE_TILE_COUNT: usize = (EFB_CACHE_TILES_X * EFB_CACHE_TILES_Y) as usize;

/// Pixels held by one cache tile.
pub const EFB_CACHE_TILE_PIXELS: usize = (EFB_CACHE_TILE_SIZE * EFB_CACHE_TILE_SIZE) as usize;

/// Largest integer EFB upscale factor.
pub const MAX_EFB_SCALE: u32 = 8;

/// Full range of the emulated 24-bit depth buffer.
pub const DEPTH_24_MAX: u32 = 0x00FF_FFFF;
