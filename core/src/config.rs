//! Video configuration (`video.toml`)
//!
//! Handles loading, saving, and providing defaults for the renderer's
//! settings. Settings are stored in TOML format in the platform-specific
//! config directory, or any path the embedding application chooses.

use std::path::{Path, PathBuf};

use efbridge_shared::{MAX_EFB_SCALE, StereoMode};
use serde::{Deserialize, Serialize};

/// Aspect ratio the presented image is fitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectMode {
    /// Stretch to fill the backbuffer
    Stretch,
    /// 4:3, letterboxed or pillarboxed
    #[default]
    Analog,
    /// 16:9, letterboxed or pillarboxed
    Widescreen,
}

impl AspectMode {
    /// Width over height, `None` for stretch.
    pub fn ratio(self) -> Option<f32> {
        match self {
            AspectMode::Stretch => None,
            AspectMode::Analog => Some(4.0 / 3.0),
            AspectMode::Widescreen => Some(16.0 / 9.0),
        }
    }
}

/// Antialiasing mode for the EFB render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MsaaMode {
    #[default]
    Off,
    X2,
    X4,
    X8,
    /// 4 samples with per-sample shading
    Ssaa4,
}

impl MsaaMode {
    pub fn samples(self) -> u32 {
        match self {
            MsaaMode::Off => 1,
            MsaaMode::X2 => 2,
            MsaaMode::X4 | MsaaMode::Ssaa4 => 4,
            MsaaMode::X8 => 8,
        }
    }

    pub fn wants_sample_shading(self) -> bool {
        matches!(self, MsaaMode::Ssaa4)
    }
}

/// Internal resolution of the EFB render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfbScaleSetting {
    /// Smallest integer multiple that covers the draw rectangle.
    AutoIntegral,
    Native,
    Integer(u32),
}

/// Renderer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Internal resolution multiplier; 0 picks one from the window size (default: 0)
    #[serde(default)]
    pub efb_scale: u32,
    /// Antialiasing (default: Off)
    #[serde(default)]
    pub msaa: MsaaMode,
    /// Stereoscopic presentation (default: Off)
    #[serde(default)]
    pub stereo_mode: StereoMode,
    /// Hand eye textures to an asynchronous compositor instead of presenting
    #[serde(default)]
    pub async_timewarp: bool,
    /// Compositor wake-up interval in milliseconds (default: 11)
    #[serde(default = "default_compositor_interval")]
    pub compositor_interval_ms: u64,
    /// Aspect ratio of the presented image (default: Analog)
    #[serde(default)]
    pub aspect_mode: AspectMode,
    /// Destination alpha is rendered in a separate pass instead of blended
    #[serde(default)]
    pub dst_alpha_pass: bool,
    /// Whether to enable vertical sync (default: true)
    #[serde(default = "default_true")]
    pub vsync: bool,
    /// Dump every presented frame to the frame sink
    #[serde(default)]
    pub dump_frames: bool,
    /// Output file for raw frame dumps (default: `<data dir>/frames.rgb`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_path: Option<PathBuf>,
    /// Screenshot directory (default: `<data dir>/screenshots`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_compositor_interval() -> u64 {
    11
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            efb_scale: 0,
            msaa: MsaaMode::default(),
            stereo_mode: StereoMode::default(),
            async_timewarp: false,
            compositor_interval_ms: default_compositor_interval(),
            aspect_mode: AspectMode::default(),
            dst_alpha_pass: false,
            vsync: default_true(),
            dump_frames: false,
            dump_path: None,
            screenshot_dir: None,
        }
    }
}

impl VideoConfig {
    pub fn efb_scale_setting(&self) -> EfbScaleSetting {
        match self.efb_scale {
            0 => EfbScaleSetting::AutoIntegral,
            1 => EfbScaleSetting::Native,
            n => EfbScaleSetting::Integer(n.min(MAX_EFB_SCALE)),
        }
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Reads `path`, falling back to defaults if it is missing or invalid.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.efbridge", "", "efbridge")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory for screenshots and dumps.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.efbridge", "", "efbridge")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads `video.toml` from the configuration directory.
pub fn load() -> VideoConfig {
    config_dir()
        .map(|dir| VideoConfig::load_from(&dir.join("video.toml")))
        .unwrap_or_default()
}

/// Saves `video.toml` to the configuration directory.
pub fn save(config: &VideoConfig) -> anyhow::Result<()> {
    match config_dir() {
        Some(dir) => config.save_to(&dir.join("video.toml")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =============================================================
    // Default value tests
    // =============================================================

    #[test]
    fn test_video_config_default() {
        let config = VideoConfig::default();
        assert_eq!(config.efb_scale_setting(), EfbScaleSetting::AutoIntegral);
        assert_eq!(config.msaa, MsaaMode::Off);
        assert_eq!(config.stereo_mode, StereoMode::Off);
        assert!(config.vsync);
        assert!(!config.dump_frames);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(VideoConfig::from_toml_str("").unwrap(), VideoConfig::default());
    }

    // =============================================================
    // Parsing tests
    // =============================================================

    #[test]
    fn test_partial_toml() {
        let config = VideoConfig::from_toml_str(
            r#"
            efb_scale = 3
            msaa = "X4"
            stereo_mode = "TopAndBottom"
            "#,
        )
        .unwrap();
        assert_eq!(config.efb_scale_setting(), EfbScaleSetting::Integer(3));
        assert_eq!(config.msaa.samples(), 4);
        assert_eq!(config.stereo_mode, StereoMode::TopAndBottom);
        assert_eq!(config.compositor_interval_ms, 11);
    }

    #[test]
    fn test_scale_is_clamped() {
        let config = VideoConfig {
            efb_scale: 40,
            ..Default::default()
        };
        assert_eq!(config.efb_scale_setting(), EfbScaleSetting::Integer(MAX_EFB_SCALE));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(VideoConfig::from_toml_str("msaa = 17").is_err());
    }

    // =============================================================
    // Persistence tests
    // =============================================================

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("video.toml");
        let config = VideoConfig {
            efb_scale: 2,
            msaa: MsaaMode::Ssaa4,
            aspect_mode: AspectMode::Widescreen,
            dump_frames: true,
            dump_path: Some(dir.path().join("out.rgb")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(VideoConfig::load_from(&path), config);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            VideoConfig::load_from(&dir.path().join("absent.toml")),
            VideoConfig::default()
        );
    }

    #[test]
    fn test_msaa_samples() {
        assert_eq!(MsaaMode::Off.samples(), 1);
        assert_eq!(MsaaMode::X2.samples(), 2);
        assert_eq!(MsaaMode::Ssaa4.samples(), 4);
        assert!(MsaaMode::Ssaa4.wants_sample_shading());
        assert_eq!(MsaaMode::X8.samples(), 8);
    }
}
