//! Pixel-engine bounding box registers.
//!
//! The host tracks the box in target pixels, rows counted from its own
//! origin. Indices are left, right, top, bottom; the emulated registers hold
//! inclusive maxima while the host stores exclusive ones.

use efbridge_shared::{EFB_HEIGHT, EFB_WIDTH, EfbScale, HostOrigin};

use crate::capabilities::HostCapabilities;
use crate::host::HostGpu;

/// Number of bounding-box registers.
pub const BBOX_REGISTERS: usize = 4;

/// Host slot holding register `index`. Bottom-left hosts store top and
/// bottom swapped.
const fn host_index(index: usize, origin: HostOrigin) -> usize {
    match (origin, index) {
        (HostOrigin::BottomLeft, 2) => 3,
        (HostOrigin::BottomLeft, 3) => 2,
        _ => index,
    }
}

/// Reads bounding-box register `index` in native EFB coordinates.
///
/// Hosts without bounding-box support read 0.
pub fn read(
    host: &mut dyn HostGpu,
    caps: &HostCapabilities,
    scale: EfbScale,
    index: usize,
) -> u16 {
    if !caps.bounding_box || index >= BBOX_REGISTERS {
        return 0;
    }
    let raw = host.bbox_value(host_index(index, caps.origin)) as i64;
    let mut value = if index < 2 {
        raw * EFB_WIDTH as i64 / scale.target_width() as i64
    } else {
        raw * EFB_HEIGHT as i64 / scale.target_height() as i64
    };
    if index >= 2 && caps.origin.flips_rows() {
        value = EFB_HEIGHT as i64 - value - 1;
    }
    if index & 1 != 0 {
        value += 1;
    }
    value.clamp(0, u16::MAX as i64) as u16
}

/// Writes bounding-box register `index` from native EFB coordinates.
///
/// Ignored on hosts without bounding-box support.
pub fn write(
    host: &mut dyn HostGpu,
    caps: &HostCapabilities,
    scale: EfbScale,
    index: usize,
    value: u16,
) {
    if !caps.bounding_box || index >= BBOX_REGISTERS {
        return;
    }
    let mut value = value as i64;
    if index & 1 != 0 {
        value -= 1;
    }
    let scaled = if index < 2 {
        value * scale.target_width() as i64 / EFB_WIDTH as i64
    } else {
        if caps.origin.flips_rows() {
            value = EFB_HEIGHT as i64 - value - 1;
        }
        value * scale.target_height() as i64 / EFB_HEIGHT as i64
    };
    host.set_bbox_value(host_index(index, caps.origin), scaled as i32);
}
