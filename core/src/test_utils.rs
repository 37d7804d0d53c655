//! Shared test utilities for integration and unit tests

use std::sync::{Arc, Mutex};

use efbridge_shared::HostOrigin;

use crate::capabilities::HostCapabilities;
use crate::capture::{CapturedFrame, FrameSink};
use crate::config::{AspectMode, VideoConfig};
use crate::registers::{BlendModeRegister, RegisterSnapshot, blend_factor};

// ============================================================================
// Host setup
// ============================================================================

/// Fully featured capabilities with the given row origin.
pub fn test_caps(origin: HostOrigin) -> HostCapabilities {
    HostCapabilities {
        origin,
        ..Default::default()
    }
}

/// Native resolution, stretched to the backbuffer, no antialiasing.
pub fn native_config() -> VideoConfig {
    VideoConfig {
        efb_scale: 1,
        aspect_mode: AspectMode::Stretch,
        ..Default::default()
    }
}

/// Native configuration at an integer scale.
pub fn scaled_config(factor: u32) -> VideoConfig {
    VideoConfig {
        efb_scale: factor,
        ..native_config()
    }
}

// ============================================================================
// Registers
// ============================================================================

/// Classic alpha blending with colour and alpha updates on.
pub fn alpha_blend_registers() -> RegisterSnapshot {
    RegisterSnapshot {
        blend_mode: BlendModeRegister {
            blend_enable: true,
            color_update: true,
            alpha_update: true,
            src_factor: blend_factor::SRC_ALPHA,
            dst_factor: blend_factor::INV_SRC_ALPHA,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Blending off, all channels written.
pub fn opaque_registers() -> RegisterSnapshot {
    RegisterSnapshot {
        blend_mode: BlendModeRegister {
            color_update: true,
            alpha_update: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

// ============================================================================
// Frame sink
// ============================================================================

/// What a [`MemorySink`] has seen.
#[derive(Debug, Default)]
pub struct SinkLog {
    pub starts: Vec<(u32, u32)>,
    pub frames: Vec<CapturedFrame>,
    pub stops: u32,
}

/// Frame sink that keeps every frame in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log<R>(&self, f: impl FnOnce(&SinkLog) -> R) -> R {
        f(&self.log.lock().unwrap())
    }

    pub fn frame_count(&self) -> usize {
        self.with_log(|log| log.frames.len())
    }

    pub fn last_frame(&self) -> Option<CapturedFrame> {
        self.with_log(|log| log.frames.last().cloned())
    }
}

impl FrameSink for MemorySink {
    fn start(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.log.lock().unwrap().starts.push((width, height));
        Ok(())
    }

    fn add_frame(&mut self, frame: &CapturedFrame) -> anyhow::Result<()> {
        self.log.lock().unwrap().frames.push(frame.clone());
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }
}
