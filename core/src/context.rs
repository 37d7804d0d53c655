//! Render-thread state shared by the renderer's components.

use crate::capture::FrameCapture;
use crate::diagnostics::Diagnostics;
use crate::efb_cache::{EfbCache, PeekFormat};
use crate::presenter::EyePose;
use crate::registers::RegisterSnapshot;
use crate::translator::RenderStateTranslator;

/// Everything the translation layer mutates between draws, owned by the
/// [`Renderer`](crate::Renderer) and lent to the presenter.
pub struct RenderContext {
    pub regs: RegisterSnapshot,
    pub translator: RenderStateTranslator,
    pub cache: EfbCache,
    pub capture: FrameCapture,
    pub diag: Diagnostics,
    /// Poses the current frame's eyes were rendered with.
    pub eye_poses: [EyePose; 2],
}

impl RenderContext {
    pub fn new(translator: RenderStateTranslator, capture: FrameCapture) -> Self {
        Self {
            regs: RegisterSnapshot::default(),
            translator,
            cache: EfbCache::new(),
            capture,
            diag: Diagnostics::new(),
            eye_poses: [EyePose::default(); 2],
        }
    }

    pub fn peek_format(&self) -> PeekFormat {
        PeekFormat {
            format: self.regs.pixel_format,
            alpha_read: self.regs.alpha_read,
        }
    }
}
