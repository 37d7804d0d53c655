//! End-of-frame presentation.
//!
//! [`FramePresenter`] owns the EFB framebuffer configuration. Each present
//! checks whether the backbuffer, scale, multisampling, stereo mode or XFB
//! size changed, recreates the EFB when the resulting configuration differs,
//! then resolves and hands the frame to the configured [`PresentStrategy`].

mod async_compositor;
mod strategy;


pub use async_compositor::{
    CompositorSink, CompositorThread, EyeExchange, EyeFrame, EyePair, EyePose, EyeSwapchain,
};
pub use strategy::{
    AsyncCompositorPresenter, MonoPresenter, PerEyePresenter, PresentFrame, PresentStrategy,
    SplitPresenter,
};

use std::time::Duration;

use efbridge_shared::{
    EFB_HEIGHT, EFB_WIDTH, EfbAccessKind, EfbRegion, EfbScale, MAX_EFB_SCALE, StereoMode,
    TargetRectangle,
};

use crate::capabilities::HostCapabilities;
use crate::config::{AspectMode, EfbScaleSetting, MsaaMode, VideoConfig};
use crate::context::RenderContext;
use crate::diagnostics::{Degradation, Diagnostics};
use crate::error::HostError;
use crate::host::{FramebufferConfig, HostGpu, PresentTarget};

/// XFB layout of the frame being presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameGeometry {
    pub xfb_addr: u32,
    pub fb_width: u32,
    pub fb_stride: u32,
    pub fb_height: u32,
}

/// One end-of-frame hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRequest {
    /// EFB area to present.
    pub source: EfbRegion,
    pub geometry: FrameGeometry,
    /// Upstream asked for the frame to be dropped.
    pub skip: bool,
}

impl PresentRequest {
    pub fn new(source: EfbRegion, geometry: FrameGeometry) -> Self {
        Self {
            source,
            geometry,
            skip: false,
        }
    }

    /// The whole EFB as a `fb_width` × `fb_height` frame.
    pub fn full_frame(fb_width: u32, fb_height: u32) -> Self {
        Self::new(
            EfbRegion::full(),
            FrameGeometry {
                xfb_addr: 0,
                fb_width,
                fb_stride: fb_width,
                fb_height,
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Zero-sized XFB.
    EmptyFrame,
    Requested,
    /// The EFB could not be (re)created.
    NoFramebuffers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Skipped(SkipReason),
}

/// Inputs that decide the framebuffer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResizeInputs {
    backbuffer: (u32, u32),
    efb_scale: EfbScaleSetting,
    msaa: MsaaMode,
    stereo: StereoMode,
    async_timewarp: bool,
    xfb: (u32, u32),
}

/// Presentation settings after capability checks.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PresenterSettings {
    efb_scale: EfbScaleSetting,
    msaa: MsaaMode,
    stereo: StereoMode,
    async_timewarp: bool,
    aspect: AspectMode,
    compositor_interval: Duration,
}

impl PresenterSettings {
    fn from_config(config: &VideoConfig, caps: &HostCapabilities, diag: &mut Diagnostics) -> Self {
        let wants_stereo = config.stereo_mode != StereoMode::Off || config.async_timewarp;
        let stereo_ok = !wants_stereo || caps.stereoscopy;
        if !stereo_ok {
            diag.degrade(Degradation::StereoUnavailable);
        }
        Self {
            efb_scale: config.efb_scale_setting(),
            msaa: config.msaa,
            stereo: if stereo_ok {
                config.stereo_mode
            } else {
                StereoMode::Off
            },
            async_timewarp: config.async_timewarp && stereo_ok,
            aspect: config.aspect_mode,
            compositor_interval: Duration::from_millis(config.compositor_interval_ms.max(1)),
        }
    }
}

/// Display-space draw rectangle for `aspect` inside a `width` × `height`
/// backbuffer, centred with bars on the long axis.
pub fn draw_rect(aspect: AspectMode, width: u32, height: u32) -> TargetRectangle {
    let full = TargetRectangle::sized(width, height);
    let Some(ratio) = aspect.ratio() else {
        return full;
    };
    if width == 0 || height == 0 {
        return full;
    }
    let (w, h) = (width as f32, height as f32);
    if w / h > ratio {
        let draw_w = (h * ratio).round() as i32;
        let left = (width as i32 - draw_w) / 2;
        TargetRectangle::new(left, 0, left + draw_w, height as i32)
    } else {
        let draw_h = (w / ratio).round() as i32;
        let top = (height as i32 - draw_h) / 2;
        TargetRectangle::new(0, top, width as i32, top + draw_h)
    }
}

/// Integer EFB scale factor for `setting`.
pub fn scale_factor(setting: EfbScaleSetting, draw_height: u32) -> u32 {
    match setting {
        EfbScaleSetting::Native => 1,
        EfbScaleSetting::Integer(n) => n.clamp(1, MAX_EFB_SCALE),
        EfbScaleSetting::AutoIntegral => draw_height.div_ceil(EFB_HEIGHT).clamp(1, MAX_EFB_SCALE),
    }
}

/// Sample count for `msaa` on a host with `caps`.
pub fn sample_count(msaa: MsaaMode, caps: &HostCapabilities, diag: &mut Diagnostics) -> u32 {
    let requested = msaa.samples();
    let max = if caps.multisample {
        caps.max_samples.max(1)
    } else {
        1
    };
    if msaa.wants_sample_shading() && !caps.sample_shading {
        diag.degrade(Degradation::SampleShadingUnavailable);
    }
    if requested > max {
        diag.degrade(Degradation::MsaaClamped { requested, max });
        return max;
    }
    requested
}

/// Owner of the EFB framebuffers and the presentation strategy.
pub struct FramePresenter {
    caps: HostCapabilities,
    settings: PresenterSettings,
    strategy: Box<dyn PresentStrategy>,
    exchange: Option<EyeExchange>,
    compositor: Option<CompositorThread>,
    framebuffer: Option<FramebufferConfig>,
    scale: EfbScale,
    last_inputs: Option<ResizeInputs>,
    device_lost: bool,
    frames_presented: u64,
}

impl FramePresenter {
    pub fn new(caps: HostCapabilities, config: &VideoConfig, diag: &mut Diagnostics) -> Self {
        let settings = PresenterSettings::from_config(config, &caps, diag);
        let (strategy, exchange) = Self::build_strategy(&settings);
        tracing::info!("Presenting with the {} strategy", strategy.name());
        Self {
            caps,
            settings,
            strategy,
            exchange,
            compositor: None,
            framebuffer: None,
            scale: EfbScale::native(),
            last_inputs: None,
            device_lost: false,
            frames_presented: 0,
        }
    }

    fn build_strategy(settings: &PresenterSettings) -> (Box<dyn PresentStrategy>, Option<EyeExchange>) {
        if settings.async_timewarp {
            let exchange = EyeExchange::new();
            return (
                Box::new(AsyncCompositorPresenter::new(exchange.clone())),
                Some(exchange),
            );
        }
        let strategy: Box<dyn PresentStrategy> = match settings.stereo {
            StereoMode::Off => Box::new(MonoPresenter),
            StereoMode::SideBySide | StereoMode::TopAndBottom => {
                Box::new(SplitPresenter::new(settings.stereo))
            }
            StereoMode::DedicatedPerEye => Box::new(PerEyePresenter),
        };
        (strategy, None)
    }

    /// Applies changed settings. Strategy changes take effect immediately;
    /// framebuffer changes on the next present.
    pub fn apply_config(
        &mut self,
        host: &mut dyn HostGpu,
        config: &VideoConfig,
        diag: &mut Diagnostics,
    ) {
        let settings = PresenterSettings::from_config(config, &self.caps, diag);
        if settings.stereo != self.settings.stereo
            || settings.async_timewarp != self.settings.async_timewarp
        {
            self.stop_compositor();
            self.strategy.release(host);
            let (strategy, exchange) = Self::build_strategy(&settings);
            tracing::info!("Switching to the {} strategy", strategy.name());
            self.strategy = strategy;
            self.exchange = exchange;
            self.last_inputs = None;
        }
        self.settings = settings;
    }

    pub fn scale(&self) -> EfbScale {
        self.scale
    }

    pub fn framebuffer(&self) -> Option<FramebufferConfig> {
        self.framebuffer
    }

    pub fn is_multisampled(&self) -> bool {
        self.framebuffer.is_some_and(|fb| fb.samples > 1)
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Front-pair exchange when presenting through the async compositor.
    pub fn eye_exchange(&self) -> Option<EyeExchange> {
        self.exchange.clone()
    }

    /// Starts the compositor thread. Returns `Ok(false)` when the async
    /// compositor is not the active strategy.
    pub fn start_compositor(&mut self, sink: CompositorSink) -> std::io::Result<bool> {
        let Some(exchange) = self.exchange.clone() else {
            return Ok(false);
        };
        self.stop_compositor();
        self.compositor = Some(CompositorThread::spawn(
            exchange,
            self.settings.compositor_interval,
            sink,
        )?);
        Ok(true)
    }

    pub fn stop_compositor(&mut self) {
        if let Some(mut compositor) = self.compositor.take() {
            compositor.stop();
        }
    }

    /// The next present recreates every host resource.
    pub fn notify_device_lost(&mut self) {
        tracing::warn!("Graphics device lost; recreating framebuffers on next present");
        self.device_lost = true;
    }

    /// Creates the initial framebuffers for the current backbuffer.
    pub fn initialize(&mut self, host: &mut dyn HostGpu, ctx: &mut RenderContext) -> Result<(), HostError> {
        let (width, height) = host.backbuffer_size();
        let draw = draw_rect(self.settings.aspect, width, height);
        self.ensure_framebuffers(host, ctx, (width, height), draw, (0, 0))
    }

    /// Presents one frame.
    pub fn present(
        &mut self,
        host: &mut dyn HostGpu,
        ctx: &mut RenderContext,
        request: &PresentRequest,
    ) -> PresentOutcome {
        let geometry = request.geometry;
        if request.skip || geometry.fb_width == 0 || geometry.fb_height == 0 {
            let reason = if request.skip {
                SkipReason::Requested
            } else {
                SkipReason::EmptyFrame
            };
            tracing::trace!("Skipping frame: {:?}", reason);
            ctx.capture.on_skipped();
            return PresentOutcome::Skipped(reason);
        }

        host.reset_draw_state();

        let backbuffer = host.backbuffer_size();
        let draw = draw_rect(self.settings.aspect, backbuffer.0, backbuffer.1);
        let xfb = (geometry.fb_width, geometry.fb_height);
        if self
            .ensure_framebuffers(host, ctx, backbuffer, draw, xfb)
            .is_err()
        {
            ctx.capture.on_skipped();
            self.finish_frame(host, ctx);
            return PresentOutcome::Skipped(SkipReason::NoFramebuffers);
        }

        let source = self.scale.to_target(request.source, self.caps.origin);
        if self.is_multisampled() {
            if let Err(e) = host.resolve_region(EfbAccessKind::Color, source) {
                ctx.diag.resource_failure("Frame resolve", &e);
            }
        }

        let frame = PresentFrame {
            source,
            draw,
            surface: backbuffer,
            origin: self.caps.origin,
            poses: ctx.eye_poses,
        };
        if let Err(e) = self.strategy.present(host, &frame) {
            ctx.diag.resource_failure("Present", &e);
        }

        if let Some((target, rect)) = self.strategy.capture_source(&frame) {
            ctx.capture
                .on_presented(host, target, rect, self.caps.origin, &mut ctx.diag);
        }

        if self.strategy.swaps() {
            let swapped = host
                .bind_present_target(PresentTarget::Backbuffer)
                .and_then(|()| host.swap_buffers());
            if let Err(e) = swapped {
                ctx.diag.resource_failure("Buffer swap", &e);
            }
            if !self.caps.quirks.broken_swap {
                host.clear_present_target();
            }
        }

        self.frames_presented += 1;
        self.finish_frame(host, ctx);
        PresentOutcome::Presented
    }

    /// Frame boundary: cached EFB contents are stale and the upstream's draw
    /// state comes back.
    fn finish_frame(&mut self, host: &mut dyn HostGpu, ctx: &mut RenderContext) {
        ctx.cache.invalidate();
        ctx.translator
            .restore(host, &ctx.regs, self.scale, &mut ctx.diag);
    }

    fn ensure_framebuffers(
        &mut self,
        host: &mut dyn HostGpu,
        ctx: &mut RenderContext,
        backbuffer: (u32, u32),
        draw: TargetRectangle,
        xfb: (u32, u32),
    ) -> Result<(), HostError> {
        let inputs = ResizeInputs {
            backbuffer,
            efb_scale: self.settings.efb_scale,
            msaa: self.settings.msaa,
            stereo: self.settings.stereo,
            async_timewarp: self.settings.async_timewarp,
            xfb,
        };
        let device_lost = std::mem::take(&mut self.device_lost);
        if !device_lost && self.framebuffer.is_some() && self.last_inputs == Some(inputs) {
            return Ok(());
        }

        let factor = scale_factor(self.settings.efb_scale, draw.height().max(0) as u32);
        let config = FramebufferConfig {
            width: EFB_WIDTH * factor,
            height: EFB_HEIGHT * factor,
            samples: sample_count(self.settings.msaa, &self.caps, &mut ctx.diag),
            layers: self.strategy.eye_count(),
        };
        if !device_lost && self.framebuffer == Some(config) {
            self.last_inputs = Some(inputs);
            return Ok(());
        }

        if self.framebuffer.is_some() {
            let fence = host.insert_fence();
            host.wait_fence(&fence);
            host.destroy_framebuffers();
            self.framebuffer = None;
        }
        if device_lost {
            self.strategy.release(host);
        }

        let created = host
            .create_framebuffers(&config)
            .and_then(|()| self.strategy.resize(host, config.width, config.height));
        if let Err(e) = created {
            ctx.diag.resource_failure("Framebuffer creation", &e);
            return Err(e);
        }

        tracing::info!(
            "EFB framebuffers {}x{} ({}x scale, {} samples, {} layers)",
            config.width,
            config.height,
            factor,
            config.samples,
            config.layers
        );
        self.framebuffer = Some(config);
        self.scale = EfbScale::integer(factor);
        self.last_inputs = Some(inputs);
        ctx.cache.invalidate();
        ctx.translator.invalidate();
        Ok(())
    }

    /// Releases strategy resources, framebuffers and the compositor thread.
    pub fn shutdown(&mut self, host: &mut dyn HostGpu) {
        self.stop_compositor();
        self.strategy.release(host);
        if self.framebuffer.take().is_some() {
            host.destroy_framebuffers();
        }
    }
}
