//! Stereoscopic layout of a presented frame.

use serde::{Deserialize, Serialize};

use crate::geometry::TargetRectangle;

/// How one logical frame maps onto one or two presentation rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StereoMode {
    #[default]
    Off,
    /// Left eye on the left half, right eye on the right half.
    SideBySide,
    /// Left eye on the top half, right eye on the bottom half.
    TopAndBottom,
    /// Each eye presents to its own surface.
    DedicatedPerEye,
}

impl StereoMode {
    pub const fn eye_count(self) -> u32 {
        match self {
            StereoMode::Off => 1,
            _ => 2,
        }
    }

    /// Whether this mode splits a single destination rectangle.
    pub const fn splits_rectangle(self) -> bool {
        matches!(self, StereoMode::SideBySide | StereoMode::TopAndBottom)
    }

    /// Splits `rect` into left/right or top/bottom halves.
    ///
    /// The halves share one edge, their union is exactly `rect`, and an odd
    /// extent puts the extra pixel in the second half. Modes that do not
    /// split return `None`. Expects a normalized rectangle.
    pub fn split(self, rect: TargetRectangle) -> Option<[TargetRectangle; 2]> {
        match self {
            StereoMode::SideBySide => {
                let mid = rect.left + rect.width() / 2;
                Some([
                    TargetRectangle::new(rect.left, rect.top, mid, rect.bottom),
                    TargetRectangle::new(mid, rect.top, rect.right, rect.bottom),
                ])
            }
            StereoMode::TopAndBottom => {
                let mid = rect.top + rect.height() / 2;
                Some([
                    TargetRectangle::new(rect.left, rect.top, rect.right, mid),
                    TargetRectangle::new(rect.left, mid, rect.right, rect.bottom),
                ])
            }
            StereoMode::Off | StereoMode::DedicatedPerEye => None,
        }
    }
}
