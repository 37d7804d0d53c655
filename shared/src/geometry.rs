//! EFB and host render-target rectangles.
//!
//! [`EfbRegion`] lives in native, top-left-origin EFB pixels. [`TargetRectangle`]
//! lives in host render-target pixels and counts rows from the host's own
//! origin, so `top` is always the row nearest that origin. [`EfbScale`] is the
//! only way to get from one to the other.

use crate::constants::{EFB_HEIGHT, EFB_WIDTH};

/// Axis-aligned rectangle in native EFB pixels.
///
/// Right and bottom edges are exclusive. Construction clamps to the EFB and
/// orders the edges, so a region never leaves the physical buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EfbRegion {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl EfbRegion {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        let clamp_x = |v: i32| v.clamp(0, EFB_WIDTH as i32) as u32;
        let clamp_y = |v: i32| v.clamp(0, EFB_HEIGHT as i32) as u32;
        let (l, r) = (clamp_x(left), clamp_x(right));
        let (t, b) = (clamp_y(top), clamp_y(bottom));
        Self {
            left: l.min(r),
            top: t.min(b),
            right: l.max(r),
            bottom: t.max(b),
        }
    }

    /// The whole EFB.
    pub const fn full() -> Self {
        Self {
            left: 0,
            top: 0,
            right: EFB_WIDTH,
            bottom: EFB_HEIGHT,
        }
    }

    /// The 1×1 region covering source pixel `(x, y)`.
    pub fn pixel(x: u32, y: u32) -> Self {
        Self::new(x as i32, y as i32, x as i32 + 1, y as i32 + 1)
    }

    pub const fn left(&self) -> u32 {
        self.left
    }

    pub const fn top(&self) -> u32 {
        self.top
    }

    pub const fn right(&self) -> u32 {
        self.right
    }

    pub const fn bottom(&self) -> u32 {
        self.bottom
    }

    pub const fn width(&self) -> u32 {
        self.right - self.left
    }

    pub const fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub const fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Rectangle in host pixels, rows counted from the host origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetRectangle {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl TargetRectangle {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin with the given size.
    pub const fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Corrects negative extents by swapping the offending edges.
    pub fn normalized(self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    pub fn contains_rect(&self, other: &TargetRectangle) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// Overlapping part of two rectangles, empty if they do not touch.
    pub fn intersect(&self, other: &TargetRectangle) -> TargetRectangle {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right).max(left);
        let bottom = self.bottom.min(other.bottom).max(top);
        TargetRectangle::new(left, top, right, bottom)
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width() as i64 * self.height() as i64
        }
    }
}

/// Row origin of a host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostOrigin {
    /// Row 0 is the top of the image.
    #[default]
    TopLeft,
    /// Row 0 is the bottom of the image.
    BottomLeft,
}

impl HostOrigin {
    pub const fn flips_rows(self) -> bool {
        matches!(self, HostOrigin::BottomLeft)
    }

    /// Maps a display-space (top-left origin) rectangle onto a host surface
    /// that is `surface_height` rows tall.
    pub fn to_host(self, rect: TargetRectangle, surface_height: u32) -> TargetRectangle {
        match self {
            HostOrigin::TopLeft => rect,
            HostOrigin::BottomLeft => {
                let h = surface_height as i32;
                TargetRectangle::new(rect.left, h - rect.bottom, rect.right, h - rect.top)
            }
        }
    }
}

/// Mapping from native EFB pixels to host render-target pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EfbScale {
    target_width: u32,
    target_height: u32,
}

impl Default for EfbScale {
    fn default() -> Self {
        Self::native()
    }
}

impl EfbScale {
    pub const fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub const fn native() -> Self {
        Self::new(EFB_WIDTH, EFB_HEIGHT)
    }

    /// `factor`× upscaling of the native EFB.
    pub const fn integer(factor: u32) -> Self {
        Self::new(EFB_WIDTH * factor, EFB_HEIGHT * factor)
    }

    pub const fn target_width(&self) -> u32 {
        self.target_width
    }

    pub const fn target_height(&self) -> u32 {
        self.target_height
    }

    pub fn scale_x(&self, x: i32) -> i32 {
        (x as i64 * self.target_width as i64 / EFB_WIDTH as i64) as i32
    }

    pub fn scale_y(&self, y: i32) -> i32 {
        (y as i64 * self.target_height as i64 / EFB_HEIGHT as i64) as i32
    }

    pub fn scale_xf(&self, x: f32) -> f32 {
        x * self.target_width as f32 / EFB_WIDTH as f32
    }

    pub fn scale_yf(&self, y: f32) -> f32 {
        y * self.target_height as f32 / EFB_HEIGHT as f32
    }

    /// Converts an EFB region into a normalized host rectangle.
    pub fn to_target(&self, region: EfbRegion, origin: HostOrigin) -> TargetRectangle {
        let left = self.scale_x(region.left() as i32);
        let right = self.scale_x(region.right() as i32);
        let rect = match origin {
            HostOrigin::TopLeft => TargetRectangle::new(
                left,
                self.scale_y(region.top() as i32),
                right,
                self.scale_y(region.bottom() as i32),
            ),
            HostOrigin::BottomLeft => TargetRectangle::new(
                left,
                self.scale_y((EFB_HEIGHT - region.bottom()) as i32),
                right,
                self.scale_y((EFB_HEIGHT - region.top()) as i32),
            ),
        };
        rect.normalized()
    }

    /// Host column sampled for source column `x`: the midpoint of its two
    /// scaled boundaries.
    pub fn midpoint_x(&self, x: u32) -> i32 {
        (self.scale_x(x as i32) + self.scale_x(x as i32 + 1)) / 2
    }

    /// Host row sampled for source row `y`, counted from the host origin.
    pub fn midpoint_y(&self, y: u32, origin: HostOrigin) -> i32 {
        let y = y as i32;
        match origin {
            HostOrigin::TopLeft => (self.scale_y(y) + self.scale_y(y + 1)) / 2,
            HostOrigin::BottomLeft => {
                let h = EFB_HEIGHT as i32;
                (self.scale_y(h - y) + self.scale_y(h - y - 1)) / 2
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_clamps_and_orders() {
        let r = EfbRegion::new(700, -5, 10, 600);
        assert_eq!(r.left(), 10);
        assert_eq!(r.right(), EFB_WIDTH);
        assert_eq!(r.top(), 0);
        assert_eq!(r.bottom(), EFB_HEIGHT);
    }

    #[test]
    fn test_region_pixel_at_edge_stays_inside() {
        let r = EfbRegion::pixel(EFB_WIDTH - 1, EFB_HEIGHT - 1);
        assert_eq!(r.width(), 1);
        assert_eq!(r.height(), 1);
        assert!(r.contains(EFB_WIDTH - 1, EFB_HEIGHT - 1));
    }

    #[test]
    fn test_target_rectangle_normalized() {
        let r = TargetRectangle::new(10, 40, 2, 20).normalized();
        assert_eq!(r, TargetRectangle::new(2, 20, 10, 40));
        assert_eq!(r.width(), 8);
        assert_eq!(r.height(), 20);
    }

    #[test]
    fn test_to_target_top_left() {
        let scale = EfbScale::integer(2);
        let rect = scale.to_target(EfbRegion::new(64, 128, 128, 192), HostOrigin::TopLeft);
        assert_eq!(rect, TargetRectangle::new(128, 256, 256, 384));
    }

    #[test]
    fn test_to_target_bottom_left_flips_rows() {
        let scale = EfbScale::native();
        let rect = scale.to_target(EfbRegion::new(0, 0, 64, 64), HostOrigin::BottomLeft);
        assert_eq!(rect, TargetRectangle::new(0, 464, 64, 528));
    }

    #[test]
    fn test_to_host_is_an_involution() {
        let display = TargetRectangle::new(10, 20, 110, 70);
        let host = HostOrigin::BottomLeft.to_host(display, 480);
        assert_eq!(host, TargetRectangle::new(10, 410, 110, 460));
        assert_eq!(HostOrigin::BottomLeft.to_host(host, 480), display);
        assert_eq!(HostOrigin::TopLeft.to_host(display, 480), display);
    }

    #[test]
    fn test_midpoint_native_is_identity() {
        let scale = EfbScale::native();
        assert_eq!(scale.midpoint_x(100), 100);
        assert_eq!(scale.midpoint_y(200, HostOrigin::TopLeft), 200);
        // Row 200 from the top is row 527 - 200 from the bottom.
        assert_eq!(scale.midpoint_y(200, HostOrigin::BottomLeft), 327);
    }

    #[test]
    fn test_midpoint_upscaled_picks_centre() {
        let scale = EfbScale::integer(3);
        // Boundaries 300 and 303 -> 301.
        assert_eq!(scale.midpoint_x(100), 301);
        assert_eq!(scale.midpoint_y(10, HostOrigin::TopLeft), 31);
    }

    #[test]
    fn test_midpoint_non_integer_scale() {
        let scale = EfbScale::new(960, 792);
        // x=1: (1 + 3) / 2
        assert_eq!(scale.midpoint_x(1), 2);
        assert_eq!(scale.scale_x(1), 1);
        assert_eq!(scale.scale_x(2), 3);
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = TargetRectangle::new(0, 0, 10, 10);
        let b = TargetRectangle::new(20, 20, 30, 30);
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.intersect(&a), a);
    }
}
