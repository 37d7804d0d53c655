//! CPU-side tile cache over EFB readbacks.
//!
//! The EFB is split into 64×64 tiles per access kind. A miss resolves (when
//! multisampled) and reads back the whole host footprint of one tile, then
//! samples one host pixel per source pixel. Pokes are scoped clears of a
//! single source pixel's footprint and drop the whole cache.


use efbridge_shared::{
    AlphaReadMode, EFB_CACHE_TILE_COUNT, EFB_CACHE_TILE_PIXELS, EFB_CACHE_TILE_SIZE,
    EFB_CACHE_TILES_X, EFB_HEIGHT, EFB_WIDTH, EfbAccessKind, EfbRegion, EfbScale, HostOrigin,
    PixelFormat, TargetRectangle, argb_to_rgba_f32, depth24_to_f32,
};

use crate::diagnostics::Diagnostics;
use crate::error::HostError;
use crate::host::{ClearRequest, ColorMask};

/// Render target the cache reads from and pokes into.
///
/// Implementations bracket resolves and clears with a reset and restore of
/// host draw state.
pub trait EfbTarget {
    fn scale(&self) -> EfbScale;
    fn origin(&self) -> HostOrigin;
    fn is_multisampled(&self) -> bool;
    fn resolve(&mut self, kind: EfbAccessKind, rect: TargetRectangle) -> Result<(), HostError>;
    /// Row-major pixels of `rect`, row 0 at `rect.top`.
    fn read(&mut self, kind: EfbAccessKind, rect: TargetRectangle) -> Result<Vec<u32>, HostError>;
    fn clear(&mut self, request: &ClearRequest) -> Result<(), HostError>;
}

/// How peeked values are converted for the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeekFormat {
    pub format: PixelFormat,
    pub alpha_read: AlphaReadMode,
}

impl PeekFormat {
    pub fn convert(&self, kind: EfbAccessKind, raw: u32) -> u32 {
        match kind {
            EfbAccessKind::Depth => self.format.normalize_depth(raw),
            EfbAccessKind::Color => self.alpha_read.apply(self.format.quantize_color(raw)),
        }
    }
}

/// One bool per (kind, tile), with an O(1) path for invalidating an
/// already-empty map.
#[derive(Debug, Clone)]
pub struct ValidityMap {
    entries: [[bool; EFB_CACHE_TILE_COUNT]; 2],
    is_cleared: bool,
}

impl Default for ValidityMap {
    fn default() -> Self {
        Self {
            entries: [[false; EFB_CACHE_TILE_COUNT]; 2],
            is_cleared: true,
        }
    }
}

impl ValidityMap {
    pub fn get(&self, kind: EfbAccessKind, tile: usize) -> bool {
        self.entries[kind.index()][tile]
    }

    pub fn set(&mut self, kind: EfbAccessKind, tile: usize) {
        self.entries[kind.index()][tile] = true;
        self.is_cleared = false;
    }

    pub fn clear(&mut self) {
        if self.is_cleared {
            return;
        }
        for kind in &mut self.entries {
            kind.fill(false);
        }
        self.is_cleared = true;
    }

    pub fn is_cleared(&self) -> bool {
        self.is_cleared
    }

    pub fn valid_count(&self) -> usize {
        self.entries.iter().flatten().filter(|v| **v).count()
    }
}

/// Raw host values of one tile, allocated on first fill.
#[derive(Debug, Default)]
struct CacheTile {
    values: Vec<u32>,
}

impl CacheTile {
    fn values_mut(&mut self) -> &mut [u32] {
        if self.values.is_empty() {
            self.values = vec![0; EFB_CACHE_TILE_PIXELS];
        }
        &mut self.values
    }

    fn get(&self, x: u32, y: u32) -> u32 {
        let local = (y % EFB_CACHE_TILE_SIZE) * EFB_CACHE_TILE_SIZE + x % EFB_CACHE_TILE_SIZE;
        self.values.get(local as usize).copied().unwrap_or(0)
    }
}

/// Tiled peek/poke cache.
#[derive(Debug)]
pub struct EfbCache {
    tiles: [Vec<CacheTile>; 2],
    validity: ValidityMap,
    readbacks: u64,
}

impl Default for EfbCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EfbCache {
    pub fn new() -> Self {
        let tiles = || (0..EFB_CACHE_TILE_COUNT).map(|_| CacheTile::default()).collect();
        Self {
            tiles: [tiles(), tiles()],
            validity: ValidityMap::default(),
            readbacks: 0,
        }
    }

    /// Tile containing EFB pixel `(x, y)`.
    pub const fn tile_index(x: u32, y: u32) -> usize {
        ((y / EFB_CACHE_TILE_SIZE) * EFB_CACHE_TILES_X + x / EFB_CACHE_TILE_SIZE) as usize
    }

    /// EFB region covered by `tile`, clamped to the EFB.
    pub fn tile_region(tile: usize) -> EfbRegion {
        let tile = tile as u32;
        let left = (tile % EFB_CACHE_TILES_X) * EFB_CACHE_TILE_SIZE;
        let top = (tile / EFB_CACHE_TILES_X) * EFB_CACHE_TILE_SIZE;
        EfbRegion::new(
            left as i32,
            top as i32,
            (left + EFB_CACHE_TILE_SIZE) as i32,
            (top + EFB_CACHE_TILE_SIZE) as i32,
        )
    }

    pub fn is_valid(&self, kind: EfbAccessKind, tile: usize) -> bool {
        self.validity.get(kind, tile)
    }

    pub fn validity(&self) -> &ValidityMap {
        &self.validity
    }

    /// Number of tile readbacks performed so far.
    pub fn readback_count(&self) -> u64 {
        self.readbacks
    }

    /// Drops every cached tile.
    pub fn invalidate(&mut self) {
        self.validity.clear();
    }

    /// Peeks one EFB pixel, reading its tile back on a miss.
    pub fn try_query(
        &mut self,
        target: &mut dyn EfbTarget,
        kind: EfbAccessKind,
        x: u32,
        y: u32,
        format: PeekFormat,
    ) -> Result<u32, HostError> {
        if x >= EFB_WIDTH || y >= EFB_HEIGHT {
            tracing::trace!("EFB peek outside the frame buffer at ({}, {})", x, y);
            return Ok(0);
        }
        let tile = Self::tile_index(x, y);
        if !self.validity.get(kind, tile) {
            self.fill_tile(target, kind, tile)?;
        }
        let raw = self.tiles[kind.index()][tile].get(x, y);
        Ok(format.convert(kind, raw))
    }

    /// Like [`Self::try_query`], but failures yield `0` and are reported
    /// once through `diag`.
    pub fn query(
        &mut self,
        target: &mut dyn EfbTarget,
        kind: EfbAccessKind,
        x: u32,
        y: u32,
        format: PeekFormat,
        diag: &mut Diagnostics,
    ) -> u32 {
        match self.try_query(target, kind, x, y, format) {
            Ok(value) => value,
            Err(e) => {
                diag.resource_failure("EFB peek", &e);
                0
            }
        }
    }

    /// Overwrites one EFB pixel with a scoped clear, then drops the cache.
    ///
    /// Colour values are `0xAARRGGBB`; depth values use the low 24 bits.
    pub fn poke(
        &mut self,
        target: &mut dyn EfbTarget,
        kind: EfbAccessKind,
        x: u32,
        y: u32,
        value: u32,
        diag: &mut Diagnostics,
    ) {
        if x >= EFB_WIDTH || y >= EFB_HEIGHT {
            tracing::trace!("EFB poke outside the frame buffer at ({}, {})", x, y);
            return;
        }
        let rect = target
            .scale()
            .to_target(EfbRegion::pixel(x, y), target.origin());
        let request = match kind {
            EfbAccessKind::Color => ClearRequest {
                rect,
                mask: ColorMask::ALL,
                color: argb_to_rgba_f32(value),
                depth: None,
            },
            EfbAccessKind::Depth => ClearRequest {
                rect,
                mask: ColorMask::NONE,
                color: [0.0; 4],
                depth: Some(depth24_to_f32(value)),
            },
        };
        if let Err(e) = target.clear(&request) {
            diag.resource_failure("EFB poke", &e);
        }
        self.invalidate();
    }

    fn fill_tile(
        &mut self,
        target: &mut dyn EfbTarget,
        kind: EfbAccessKind,
        tile: usize,
    ) -> Result<(), HostError> {
        let scale = target.scale();
        let origin = target.origin();
        let region = Self::tile_region(tile);
        let rect = scale.to_target(region, origin);
        if rect.is_empty() {
            return Err(HostError::Readback {
                rect,
                reason: "tile has no host pixels".into(),
            });
        }

        if target.is_multisampled() {
            target.resolve(kind, rect)?;
        }
        let pixels = target.read(kind, rect)?;
        let (width, height) = (rect.width(), rect.height());
        if pixels.len() != (width as usize) * (height as usize) {
            return Err(HostError::Readback {
                rect,
                reason: format!("expected {} pixels, got {}", width * height, pixels.len()),
            });
        }
        self.readbacks += 1;
        tracing::trace!("EFB cache miss: {:?} tile {} from {:?}", kind, tile, rect);

        let values = self.tiles[kind.index()][tile].values_mut();
        for y in region.top()..region.bottom() {
            let row = (scale.midpoint_y(y, origin) - rect.top).clamp(0, height - 1);
            for x in region.left()..region.right() {
                let col = (scale.midpoint_x(x) - rect.left).clamp(0, width - 1);
                let local = (y % EFB_CACHE_TILE_SIZE) * EFB_CACHE_TILE_SIZE + x % EFB_CACHE_TILE_SIZE;
                values[local as usize] = pixels[(row * width + col) as usize];
            }
        }
        self.validity.set(kind, tile);
        Ok(())
    }
}
