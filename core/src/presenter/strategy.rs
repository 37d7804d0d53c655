//! Presentation strategies: how the EFB reaches the display.
//!
//! Destination rectangles arrive in display space (top-left origin) and are
//! flipped onto the host surface with [`HostOrigin::to_host`] exactly once,
//! right before the blit.

use efbridge_shared::{HostOrigin, StereoMode, TargetRectangle};

use super::async_compositor::{EyeExchange, EyePair, EyePose, EyeSwapchain};
use crate::error::HostError;
use crate::host::{HostGpu, PresentTarget};

/// Everything a strategy needs to present one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentFrame {
    /// Source rectangle in EFB target pixels, host rows.
    pub source: TargetRectangle,
    /// Destination in display space.
    pub draw: TargetRectangle,
    /// Backbuffer size.
    pub surface: (u32, u32),
    pub origin: HostOrigin,
    pub poses: [EyePose; 2],
}

impl PresentFrame {
    fn to_host(&self, rect: TargetRectangle) -> TargetRectangle {
        self.origin.to_host(rect, self.surface.1)
    }
}

/// One way of handing a finished EFB to the display.
pub trait PresentStrategy: Send {
    fn name(&self) -> &'static str;

    /// EFB layers the strategy reads.
    fn eye_count(&self) -> u32;

    /// Whether the frame ends with a buffer swap.
    fn swaps(&self) -> bool;

    /// Called after the EFB was (re)created with `width` × `height` targets.
    fn resize(&mut self, _host: &mut dyn HostGpu, _width: u32, _height: u32) -> Result<(), HostError> {
        Ok(())
    }

    fn present(&mut self, host: &mut dyn HostGpu, frame: &PresentFrame) -> Result<(), HostError>;

    /// Surface and host rectangle holding the presented image, for capture.
    fn capture_source(&self, frame: &PresentFrame) -> Option<(PresentTarget, TargetRectangle)>;

    /// Releases host resources owned by the strategy.
    fn release(&mut self, _host: &mut dyn HostGpu) {}
}

/// Single blit into the backbuffer.
#[derive(Debug, Default)]
pub struct MonoPresenter;

impl PresentStrategy for MonoPresenter {
    fn name(&self) -> &'static str {
        "mono"
    }

    fn eye_count(&self) -> u32 {
        1
    }

    fn swaps(&self) -> bool {
        true
    }

    fn present(&mut self, host: &mut dyn HostGpu, frame: &PresentFrame) -> Result<(), HostError> {
        host.bind_present_target(PresentTarget::Backbuffer)?;
        host.blit(frame.source, frame.to_host(frame.draw), 0)
    }

    fn capture_source(&self, frame: &PresentFrame) -> Option<(PresentTarget, TargetRectangle)> {
        Some((PresentTarget::Backbuffer, frame.to_host(frame.draw)))
    }
}

/// Both eyes in one backbuffer, side by side or stacked.
#[derive(Debug)]
pub struct SplitPresenter {
    mode: StereoMode,
}

impl SplitPresenter {
    pub fn new(mode: StereoMode) -> Self {
        debug_assert!(mode.splits_rectangle());
        Self { mode }
    }
}

impl PresentStrategy for SplitPresenter {
    fn name(&self) -> &'static str {
        match self.mode {
            StereoMode::TopAndBottom => "top-and-bottom",
            _ => "side-by-side",
        }
    }

    fn eye_count(&self) -> u32 {
        2
    }

    fn swaps(&self) -> bool {
        true
    }

    fn present(&mut self, host: &mut dyn HostGpu, frame: &PresentFrame) -> Result<(), HostError> {
        host.bind_present_target(PresentTarget::Backbuffer)?;
        let halves = self.mode.split(frame.draw).unwrap_or([frame.draw, frame.draw]);
        for (eye, half) in halves.into_iter().enumerate() {
            host.blit(frame.source, frame.to_host(half), eye as u32)?;
        }
        Ok(())
    }

    fn capture_source(&self, frame: &PresentFrame) -> Option<(PresentTarget, TargetRectangle)> {
        Some((PresentTarget::Backbuffer, frame.to_host(frame.draw)))
    }
}

/// One dedicated surface per eye, consumed outside the swap chain.
#[derive(Debug, Default)]
pub struct PerEyePresenter;

impl PresentStrategy for PerEyePresenter {
    fn name(&self) -> &'static str {
        "dedicated per eye"
    }

    fn eye_count(&self) -> u32 {
        2
    }

    fn swaps(&self) -> bool {
        false
    }

    fn present(&mut self, host: &mut dyn HostGpu, frame: &PresentFrame) -> Result<(), HostError> {
        let dst = frame.to_host(frame.draw);
        for eye in 0..2 {
            host.bind_present_target(PresentTarget::EyeSurface(eye))?;
            host.blit(frame.source, dst, eye)?;
        }
        Ok(())
    }

    fn capture_source(&self, frame: &PresentFrame) -> Option<(PresentTarget, TargetRectangle)> {
        Some((PresentTarget::EyeSurface(0), frame.to_host(frame.draw)))
    }
}

fn create_eye_pair(host: &mut dyn HostGpu, width: u32, height: u32) -> Result<EyePair, HostError> {
    Ok([
        host.create_texture(width, height)?,
        host.create_texture(width, height)?,
    ])
}

/// Renders both eyes into textures and publishes them to the compositor
/// thread through an [`EyeExchange`].
pub struct AsyncCompositorPresenter {
    swapchain: EyeSwapchain,
    texture_size: (u32, u32),
}

impl AsyncCompositorPresenter {
    pub fn new(exchange: EyeExchange) -> Self {
        Self {
            swapchain: EyeSwapchain::new(exchange),
            texture_size: (0, 0),
        }
    }

    pub fn swapchain(&self) -> &EyeSwapchain {
        &self.swapchain
    }

    fn eye_rect(&self) -> TargetRectangle {
        TargetRectangle::sized(self.texture_size.0, self.texture_size.1)
    }
}

impl PresentStrategy for AsyncCompositorPresenter {
    fn name(&self) -> &'static str {
        "async compositor"
    }

    fn eye_count(&self) -> u32 {
        2
    }

    fn swaps(&self) -> bool {
        false
    }

    fn resize(&mut self, host: &mut dyn HostGpu, width: u32, height: u32) -> Result<(), HostError> {
        if self.texture_size == (width, height) && self.swapchain.back().is_some() {
            return Ok(());
        }
        self.release(host);
        let back = create_eye_pair(host, width, height)?;
        let spare = create_eye_pair(host, width, height)?;
        self.swapchain.install(back, spare);
        self.texture_size = (width, height);
        tracing::debug!("Eye textures: 2 pairs of {}x{}", width, height);
        Ok(())
    }

    fn present(&mut self, host: &mut dyn HostGpu, frame: &PresentFrame) -> Result<(), HostError> {
        self.swapchain.poll();
        let Some(back) = self.swapchain.back() else {
            return Err(HostError::Present("eye textures not allocated".into()));
        };
        let dst = frame.origin.to_host(self.eye_rect(), self.texture_size.1);
        for (eye, texture) in back.into_iter().enumerate() {
            host.bind_present_target(PresentTarget::Texture(texture))?;
            host.clear_present_target();
            host.blit(frame.source, dst, eye as u32)?;
        }
        let fence = host.insert_fence();
        self.swapchain.submit(fence, frame.poses);
        Ok(())
    }

    fn capture_source(&self, frame: &PresentFrame) -> Option<(PresentTarget, TargetRectangle)> {
        let back = self.swapchain.back()?;
        Some((
            PresentTarget::Texture(back[0]),
            frame.origin.to_host(self.eye_rect(), self.texture_size.1),
        ))
    }

    fn release(&mut self, host: &mut dyn HostGpu) {
        for texture in self.swapchain.take_all() {
            host.destroy_texture(texture);
        }
        self.texture_size = (0, 0);
    }
}
