//! Host capability snapshot and driver quirk resolution.
//!
//! Capability negotiation happens once, before the renderer starts. The
//! result is an immutable [`HostCapabilities`] value; driver identification
//! strings are matched here and nowhere else, producing a typed
//! [`DriverQuirks`] record that the rest of the crate branches on.

use efbridge_shared::HostOrigin;

/// Feature flags reported by the host graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    pub dual_source_blend: bool,
    pub multisample: bool,
    pub max_samples: u32,
    pub sample_shading: bool,
    pub logic_op: bool,
    pub float_viewport: bool,
    pub stereoscopy: bool,
    pub bounding_box: bool,
    /// Row origin of render targets and surfaces.
    pub origin: HostOrigin,
    /// Sample count of the window-system framebuffer.
    pub default_framebuffer_samples: u32,
    pub quirks: DriverQuirks,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            dual_source_blend: true,
            multisample: true,
            max_samples: 8,
            sample_shading: true,
            logic_op: true,
            float_viewport: true,
            stereoscopy: true,
            bounding_box: true,
            origin: HostOrigin::BottomLeft,
            default_framebuffer_samples: 1,
            quirks: DriverQuirks::default(),
        }
    }
}

impl HostCapabilities {
    /// Derives a snapshot for a wgpu adapter.
    ///
    /// `sample_counts` are the counts supported by the EFB colour format.
    pub fn from_wgpu(
        info: &wgpu::AdapterInfo,
        features: wgpu::Features,
        downlevel: &wgpu::DownlevelCapabilities,
        sample_counts: &[u32],
    ) -> Self {
        let max_samples = sample_counts.iter().copied().max().unwrap_or(1);
        let driver = DriverInfo::detect(&info.driver, &info.name, &info.driver_info);
        Self {
            dual_source_blend: features.contains(wgpu::Features::DUAL_SOURCE_BLENDING),
            multisample: max_samples > 1,
            max_samples,
            sample_shading: downlevel
                .flags
                .contains(wgpu::DownlevelFlags::MULTISAMPLED_SHADING),
            logic_op: false,
            float_viewport: true,
            stereoscopy: true,
            bounding_box: false,
            origin: HostOrigin::TopLeft,
            default_framebuffer_samples: 1,
            quirks: driver.quirks(),
        }
    }
}

/// Known driver workarounds. Behaviour branches only, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverQuirks {
    /// Nothing may be drawn to the backbuffer between swap and the next frame.
    pub broken_swap: bool,
    /// Uniform buffers are unusable; the renderer refuses to start.
    pub broken_uniform_buffers: bool,
    pub broken_primitive_restart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuVendor {
    Nvidia,
    Ati,
    Mesa,
    Intel,
    Arm,
    Qualcomm,
    Imagination,
    Tegra,
    Vivante,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverFamily {
    ArmMidgard,
    ArmUtgard,
    Lima,
    Qualcomm2xx,
    Qualcomm3xx,
    Nouveau,
    I965,
    R600,
    #[default]
    Unknown,
}

/// Driver identity resolved from the host's identification strings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriverInfo {
    pub vendor: GpuVendor,
    pub family: DriverFamily,
    /// Vendor-specific version number, 0 when unknown.
    pub version: f64,
    /// Device model number where the renderer string carries one.
    pub model: u32,
}

impl DriverInfo {
    /// Identifies the driver from vendor, renderer and version strings.
    pub fn detect(vendor: &str, renderer: &str, version: &str) -> Self {
        let vendor_lc = vendor.to_ascii_lowercase();
        let renderer_lc = renderer.to_ascii_lowercase();
        let is_tegra = renderer_lc.contains("tegra");

        let mut family = DriverFamily::Unknown;
        let gpu_vendor = if vendor_lc.contains("nvidia") && !is_tegra {
            GpuVendor::Nvidia
        } else if vendor_lc.contains("ati technologies")
            || vendor_lc.contains("advanced micro devices")
        {
            GpuVendor::Ati
        } else if version.contains("Mesa") {
            GpuVendor::Mesa
        } else if vendor_lc.contains("intel") {
            GpuVendor::Intel
        } else if vendor_lc == "arm" {
            GpuVendor::Arm
        } else if vendor_lc.contains("limadriver") {
            family = DriverFamily::Lima;
            GpuVendor::Arm
        } else if vendor_lc.contains("qualcomm") {
            GpuVendor::Qualcomm
        } else if vendor_lc.contains("imagination") {
            GpuVendor::Imagination
        } else if vendor_lc.contains("nvidia") && is_tegra {
            GpuVendor::Tegra
        } else if vendor_lc.contains("vivante") {
            GpuVendor::Vivante
        } else {
            GpuVendor::Unknown
        };

        let mut info = DriverInfo {
            vendor: gpu_vendor,
            family,
            version: 0.0,
            model: 0,
        };

        match gpu_vendor {
            GpuVendor::Qualcomm => {
                info.family = if renderer.contains("Adreno (TM) 3") {
                    DriverFamily::Qualcomm3xx
                } else {
                    DriverFamily::Qualcomm2xx
                };
                info.version = version
                    .split_once("V@")
                    .and_then(|(_, v)| leading_number(v))
                    .unwrap_or(0.0);
            }
            GpuVendor::Arm if info.family == DriverFamily::Unknown => {
                if renderer.contains("Mali-T") {
                    info.family = DriverFamily::ArmMidgard;
                } else if ["Mali-4", "Mali-3", "Mali-2"]
                    .iter()
                    .any(|m| renderer.contains(m))
                {
                    info.family = DriverFamily::ArmUtgard;
                }
            }
            GpuVendor::Mesa => {
                if vendor_lc == "nouveau" {
                    info.family = DriverFamily::Nouveau;
                } else if vendor == "Intel Open Source Technology Center" {
                    info.family = DriverFamily::I965;
                } else if renderer.contains("AMD") || renderer.contains("ATI") {
                    info.family = DriverFamily::R600;
                }
                let [major, minor, release] = version
                    .split_once("Mesa ")
                    .map(|(_, v)| dotted_triple(v))
                    .unwrap_or_default();
                info.version = (100 * major + 10 * minor + release) as f64;
            }
            GpuVendor::Intel => {
                info.model = renderer
                    .split_once("Intel HD Graphics ")
                    .and_then(|(_, m)| leading_number(m))
                    .map(|m| m as u32)
                    .unwrap_or(0);
            }
            GpuVendor::Nvidia => {
                let [major, minor, _] = version
                    .split_once("NVIDIA ")
                    .map(|(_, v)| dotted_triple(v))
                    .unwrap_or_default();
                info.version = (100 * major + minor) as f64;
            }
            _ => {}
        }

        info
    }

    /// Resolves the quirk record for this driver.
    pub fn quirks(&self) -> DriverQuirks {
        let mut quirks = DriverQuirks::default();
        for rule in QUIRK_RULES {
            if rule.matches(self) {
                match rule.quirk {
                    Quirk::BrokenSwap => quirks.broken_swap = true,
                    Quirk::BrokenUniformBuffers => quirks.broken_uniform_buffers = true,
                    Quirk::BrokenPrimitiveRestart => quirks.broken_primitive_restart = true,
                }
            }
        }
        quirks
    }
}

#[derive(Debug, Clone, Copy)]
enum Quirk {
    BrokenSwap,
    BrokenUniformBuffers,
    BrokenPrimitiveRestart,
}

struct QuirkRule {
    vendor: GpuVendor,
    family: Option<DriverFamily>,
    model: Option<u32>,
    /// Inclusive version range; `None` matches every version.
    versions: Option<(f64, f64)>,
    quirk: Quirk,
}

impl QuirkRule {
    fn matches(&self, info: &DriverInfo) -> bool {
        self.vendor == info.vendor
            && self.family.is_none_or(|f| f == info.family)
            && self.model.is_none_or(|m| m == info.model)
            && self
                .versions
                .is_none_or(|(lo, hi)| info.version >= lo && info.version <= hi)
    }
}

const QUIRK_RULES: &[QuirkRule] = &[
    QuirkRule {
        vendor: GpuVendor::Mesa,
        family: Some(DriverFamily::Nouveau),
        model: None,
        versions: Some((900.0, 916.0)),
        quirk: Quirk::BrokenUniformBuffers,
    },
    QuirkRule {
        vendor: GpuVendor::Mesa,
        family: Some(DriverFamily::R600),
        model: None,
        versions: Some((900.0, 913.0)),
        quirk: Quirk::BrokenUniformBuffers,
    },
    QuirkRule {
        vendor: GpuVendor::Mesa,
        family: Some(DriverFamily::I965),
        model: None,
        versions: Some((900.0, 920.0)),
        quirk: Quirk::BrokenUniformBuffers,
    },
    QuirkRule {
        vendor: GpuVendor::Qualcomm,
        family: Some(DriverFamily::Qualcomm3xx),
        model: None,
        versions: None,
        quirk: Quirk::BrokenSwap,
    },
    QuirkRule {
        vendor: GpuVendor::Arm,
        family: Some(DriverFamily::ArmUtgard),
        model: None,
        versions: None,
        quirk: Quirk::BrokenSwap,
    },
    QuirkRule {
        vendor: GpuVendor::Arm,
        family: Some(DriverFamily::Lima),
        model: None,
        versions: None,
        quirk: Quirk::BrokenSwap,
    },
    QuirkRule {
        vendor: GpuVendor::Intel,
        family: None,
        model: Some(3000),
        versions: None,
        quirk: Quirk::BrokenPrimitiveRestart,
    },
];

/// Parses the number at the start of `s`, e.g. `"53.0 (build)"` → 53.0.
fn leading_number(s: &str) -> Option<f64> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    s[..end].trim_end_matches('.').parse().ok()
}

/// Parses `"a.b.c..."` into its first three integers, missing parts as 0.
fn dotted_triple(s: &str) -> [i64; 3] {
    let token = s.split_whitespace().next().unwrap_or("");
    let mut parts = token
        .split(['.', '-'])
        .map(|p| p.parse::<i64>().ok());
    let mut out = [0; 3];
    for slot in &mut out {
        match parts.next().flatten() {
            Some(v) => *slot = v,
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_nvidia_version() {
        let info = DriverInfo::detect("NVIDIA Corporation", "GeForce GTX 680", "4.4.0 NVIDIA 331.38");
        assert_eq!(info.vendor, GpuVendor::Nvidia);
        assert_eq!(info.version, 33138.0);
        assert_eq!(info.quirks(), DriverQuirks::default());
    }

    #[test]
    fn test_detect_tegra_is_not_nvidia() {
        let info = DriverInfo::detect("NVIDIA Corporation", "NVIDIA Tegra", "OpenGL ES 3.0");
        assert_eq!(info.vendor, GpuVendor::Tegra);
    }

    #[test]
    fn test_detect_mesa_nouveau_broken_ubo() {
        let info = DriverInfo::detect("nouveau", "Gallium 0.4 on NVE4", "3.0 Mesa 9.1.3");
        assert_eq!(info.vendor, GpuVendor::Mesa);
        assert_eq!(info.family, DriverFamily::Nouveau);
        assert_eq!(info.version, 913.0);
        assert!(info.quirks().broken_uniform_buffers);
    }

    #[test]
    fn test_detect_newer_mesa_is_fine() {
        let info = DriverInfo::detect("X.Org", "Gallium 0.4 on AMD CAYMAN", "3.3 (Core Profile) Mesa 10.1.0");
        assert_eq!(info.family, DriverFamily::R600);
        assert_eq!(info.version, 1010.0);
        assert!(!info.quirks().broken_uniform_buffers);
    }

    #[test]
    fn test_detect_mali_families() {
        let midgard = DriverInfo::detect("ARM", "Mali-T628", "OpenGL ES 3.0");
        assert_eq!(midgard.family, DriverFamily::ArmMidgard);
        assert!(!midgard.quirks().broken_swap);

        let utgard = DriverInfo::detect("ARM", "Mali-400 MP", "OpenGL ES 2.0");
        assert_eq!(utgard.family, DriverFamily::ArmUtgard);
        assert!(utgard.quirks().broken_swap);

        let lima = DriverInfo::detect("http://limadriver.org/", "Mali-400", "OpenGL ES 2.0");
        assert_eq!(lima.vendor, GpuVendor::Arm);
        assert_eq!(lima.family, DriverFamily::Lima);
    }

    #[test]
    fn test_detect_adreno() {
        let info = DriverInfo::detect("Qualcomm", "Adreno (TM) 320", "OpenGL ES 3.0 V@53.0 AU@ (CL@)");
        assert_eq!(info.family, DriverFamily::Qualcomm3xx);
        assert_eq!(info.version, 53.0);
        assert!(info.quirks().broken_swap);
    }

    #[test]
    fn test_detect_intel_model() {
        let info = DriverInfo::detect("Intel Inc.", "Intel HD Graphics 3000 OpenGL Engine", "3.3 INTEL-8.24.11");
        assert_eq!(info.vendor, GpuVendor::Intel);
        assert_eq!(info.model, 3000);
        assert!(info.quirks().broken_primitive_restart);
    }

    #[test]
    fn test_detect_unknown() {
        let info = DriverInfo::detect("Someone", "Something", "1.0");
        assert_eq!(info.vendor, GpuVendor::Unknown);
        assert_eq!(info.quirks(), DriverQuirks::default());
    }
}
