//! Renderer façade.
//!
//! [`Renderer`] owns the host, the [`RenderContext`] and the
//! [`FramePresenter`], and exposes the operations the emulated GPU and CPU
//! core call: draw-state updates, EFB peeks and pokes, screen clears,
//! bounding-box access and end-of-frame presentation.

use std::path::PathBuf;

use efbridge_shared::{
    EfbAccessKind, EfbRegion, EfbScale, HostOrigin, TargetRectangle, argb_to_rgba_f32,
    depth24_to_f32,
};

use crate::bounding_box;
use crate::capabilities::HostCapabilities;
use crate::capture::{FrameCapture, FrameSink, RawFrameSink, screenshot_path};
use crate::config::{self, VideoConfig};
use crate::context::RenderContext;
use crate::diagnostics::Notice;
use crate::efb_cache::EfbTarget;
use crate::error::{HostError, InitError};
use crate::host::{ClearRequest, ColorMask, HostGpu};
use crate::presenter::{
    CompositorSink, EyeExchange, EyePose, FramePresenter, PresentOutcome, PresentRequest,
};
use crate::registers::RegisterSnapshot;
use crate::translator::RenderStateTranslator;

/// EFB access for the cache. Resolves and clears reset host draw state;
/// the caller restores it afterwards if [`ScopedEfb::state_was_reset`].
struct ScopedEfb<'a> {
    host: &'a mut dyn HostGpu,
    scale: EfbScale,
    origin: HostOrigin,
    multisampled: bool,
    state_reset: bool,
}

impl<'a> ScopedEfb<'a> {
    fn new(host: &'a mut dyn HostGpu, scale: EfbScale, origin: HostOrigin, multisampled: bool) -> Self {
        Self {
            host,
            scale,
            origin,
            multisampled,
            state_reset: false,
        }
    }

    fn reset_state(&mut self) {
        if !self.state_reset {
            self.host.reset_draw_state();
            self.state_reset = true;
        }
    }

    fn state_was_reset(&self) -> bool {
        self.state_reset
    }
}

impl EfbTarget for ScopedEfb<'_> {
    fn scale(&self) -> EfbScale {
        self.scale
    }

    fn origin(&self) -> HostOrigin {
        self.origin
    }

    fn is_multisampled(&self) -> bool {
        self.multisampled
    }

    fn resolve(&mut self, kind: EfbAccessKind, rect: TargetRectangle) -> Result<(), HostError> {
        self.reset_state();
        self.host.resolve_region(kind, rect)
    }

    fn read(&mut self, kind: EfbAccessKind, rect: TargetRectangle) -> Result<Vec<u32>, HostError> {
        self.host.read_region(kind, rect)
    }

    fn clear(&mut self, request: &ClearRequest) -> Result<(), HostError> {
        self.reset_state();
        self.host.clear_region(request)
    }
}

/// The EFB translation layer over one host GPU.
pub struct Renderer<H: HostGpu> {
    host: H,
    caps: HostCapabilities,
    config: VideoConfig,
    ctx: RenderContext,
    presenter: FramePresenter,
}

impl<H: HostGpu> Renderer<H> {
    /// Starts the renderer on `host`.
    ///
    /// Fails when the host can never work: a multisampled default
    /// framebuffer, a driver with unusable uniform buffers, or initial
    /// framebuffer creation failing.
    pub fn new(mut host: H, caps: HostCapabilities, config: VideoConfig) -> Result<Self, InitError> {
        if caps.default_framebuffer_samples > 1 {
            return Err(InitError::MultisampledDefaultFramebuffer {
                samples: caps.default_framebuffer_samples,
            });
        }
        if caps.quirks.broken_uniform_buffers {
            return Err(InitError::BrokenUniformBuffers);
        }

        let mut ctx = RenderContext::new(
            RenderStateTranslator::new(caps, config.dst_alpha_pass),
            FrameCapture::new(),
        );
        let mut presenter = FramePresenter::new(caps, &config, &mut ctx.diag);
        presenter.initialize(&mut host, &mut ctx)?;
        ctx.translator
            .restore(&mut host, &ctx.regs, presenter.scale(), &mut ctx.diag);

        let mut renderer = Self {
            host,
            caps,
            config: config.clone(),
            ctx,
            presenter,
        };
        renderer.configure_dump(&config);

        tracing::info!(
            "EFB renderer ready: {}x{} target, {} samples, {} presentation, {:?} origin",
            renderer.presenter.scale().target_width(),
            renderer.presenter.scale().target_height(),
            renderer.presenter.framebuffer().map_or(1, |fb| fb.samples),
            renderer.presenter.strategy_name(),
            caps.origin
        );
        Ok(renderer)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn capabilities(&self) -> &HostCapabilities {
        &self.caps
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn presenter(&self) -> &FramePresenter {
        &self.presenter
    }

    /// Current EFB-to-target scale.
    pub fn scale(&self) -> EfbScale {
        self.presenter.scale()
    }

    /// Notices queued since the last call.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.ctx.diag.drain()
    }

    /// Applies a changed configuration.
    pub fn apply_config(&mut self, config: VideoConfig) {
        self.ctx.translator.set_dst_alpha_pass(config.dst_alpha_pass);
        self.presenter
            .apply_config(&mut self.host, &config, &mut self.ctx.diag);
        self.configure_dump(&config);
        self.config = config;
    }

    fn configure_dump(&mut self, config: &VideoConfig) {
        if config.dump_frames && !self.ctx.capture.is_dump_enabled() {
            let path = config
                .dump_path
                .clone()
                .or_else(|| config::data_dir().map(|dir| dir.join("frames.rgb")));
            match path {
                Some(path) => self.ctx.capture.set_frame_sink(Box::new(RawFrameSink::new(path))),
                None => {
                    self.ctx
                        .diag
                        .notify("Frame dumping needs a data directory; dumping disabled");
                    return;
                }
            }
        }
        self.ctx.capture.set_dump_enabled(config.dump_frames);
    }

    // ------------------------------------------------------------------
    // Draw state
    // ------------------------------------------------------------------

    /// Replaces the register snapshot. Host state changes only through the
    /// `set_*` calls and [`Self::prepare_draw`].
    pub fn update_registers(&mut self, regs: RegisterSnapshot) {
        self.ctx.regs = regs;
    }

    pub fn registers(&self) -> &RegisterSnapshot {
        &self.ctx.regs
    }

    pub fn set_blend_mode(&mut self, force: bool) {
        self.ctx
            .translator
            .apply_blend(&mut self.host, &self.ctx.regs, force, &mut self.ctx.diag);
    }

    pub fn set_depth_mode(&mut self) {
        self.ctx.translator.set_depth(&mut self.host, &self.ctx.regs);
    }

    pub fn set_generation_mode(&mut self) {
        self.ctx
            .translator
            .set_cull(&mut self.host, &self.ctx.regs, &mut self.ctx.diag);
    }

    pub fn set_scissor_rect(&mut self) {
        self.ctx
            .translator
            .set_scissor(&mut self.host, &self.ctx.regs, self.presenter.scale());
    }

    pub fn set_logic_op_mode(&mut self) {
        self.ctx
            .translator
            .set_logic_op(&mut self.host, &self.ctx.regs, &mut self.ctx.diag);
    }

    pub fn set_dither_mode(&mut self) {
        self.ctx.translator.set_dither(&mut self.host, &self.ctx.regs);
    }

    pub fn set_color_mask(&mut self) {
        self.ctx.translator.set_color_mask(&mut self.host, &self.ctx.regs);
    }

    pub fn set_viewport(&mut self) {
        self.ctx.translator.set_viewport(
            &mut self.host,
            &self.ctx.regs,
            self.presenter.scale(),
            &mut self.ctx.diag,
        );
    }

    /// Brings blend state up to date before a draw.
    pub fn prepare_draw(&mut self) {
        self.set_blend_mode(false);
    }

    /// A draw changed EFB contents.
    pub fn on_draw_complete(&mut self) {
        self.ctx.cache.invalidate();
    }

    // ------------------------------------------------------------------
    // EFB access
    // ------------------------------------------------------------------

    fn scoped_efb(&mut self) -> ScopedEfb<'_> {
        ScopedEfb::new(
            &mut self.host,
            self.presenter.scale(),
            self.caps.origin,
            self.presenter.is_multisampled(),
        )
    }

    fn peek(&mut self, kind: EfbAccessKind, x: u32, y: u32) -> u32 {
        let format = self.ctx.peek_format();
        let scale = self.presenter.scale();
        let mut target = ScopedEfb::new(
            &mut self.host,
            scale,
            self.caps.origin,
            self.presenter.is_multisampled(),
        );
        let value = self
            .ctx
            .cache
            .query(&mut target, kind, x, y, format, &mut self.ctx.diag);
        if target.state_was_reset() {
            self.ctx
                .translator
                .restore(&mut self.host, &self.ctx.regs, scale, &mut self.ctx.diag);
        }
        value
    }

    fn poke(&mut self, kind: EfbAccessKind, x: u32, y: u32, value: u32) {
        let scale = self.presenter.scale();
        let mut target = ScopedEfb::new(
            &mut self.host,
            scale,
            self.caps.origin,
            self.presenter.is_multisampled(),
        );
        self.ctx
            .cache
            .poke(&mut target, kind, x, y, value, &mut self.ctx.diag);
        if target.state_was_reset() {
            self.ctx
                .translator
                .restore(&mut self.host, &self.ctx.regs, scale, &mut self.ctx.diag);
        }
    }

    /// Colour of EFB pixel `(x, y)` as `0xAARRGGBB`, converted for the
    /// current pixel format. Never fails; errors read as 0.
    pub fn peek_color(&mut self, x: u32, y: u32) -> u32 {
        self.peek(EfbAccessKind::Color, x, y)
    }

    /// 24-bit depth of EFB pixel `(x, y)`. Never fails; errors read as 0.
    pub fn peek_depth(&mut self, x: u32, y: u32) -> u32 {
        self.peek(EfbAccessKind::Depth, x, y)
    }

    pub fn poke_color(&mut self, x: u32, y: u32, argb: u32) {
        self.poke(EfbAccessKind::Color, x, y, argb);
    }

    pub fn poke_depth(&mut self, x: u32, y: u32, z: u32) {
        self.poke(EfbAccessKind::Depth, x, y, z);
    }

    /// Clears `region` of the EFB with the enabled channels.
    pub fn clear_screen(
        &mut self,
        region: EfbRegion,
        color_enable: bool,
        alpha_enable: bool,
        z_enable: bool,
        argb: u32,
        z: u32,
    ) {
        if !(color_enable || alpha_enable || z_enable) {
            return;
        }
        let request = ClearRequest {
            rect: self.presenter.scale().to_target(region, self.caps.origin),
            mask: ColorMask {
                color: color_enable,
                alpha: alpha_enable,
            },
            color: argb_to_rgba_f32(argb),
            depth: z_enable.then(|| depth24_to_f32(z)),
        };
        let mut target = self.scoped_efb();
        let result = target.clear(&request);
        if let Err(e) = result {
            self.ctx.diag.resource_failure("Screen clear", &e);
        }
        self.ctx.translator.restore(
            &mut self.host,
            &self.ctx.regs,
            self.presenter.scale(),
            &mut self.ctx.diag,
        );
        self.ctx.cache.invalidate();
    }

    // ------------------------------------------------------------------
    // Bounding box
    // ------------------------------------------------------------------

    pub fn bbox_read(&mut self, index: usize) -> u16 {
        bounding_box::read(&mut self.host, &self.caps, self.presenter.scale(), index)
    }

    pub fn bbox_write(&mut self, index: usize, value: u16) {
        bounding_box::write(
            &mut self.host,
            &self.caps,
            self.presenter.scale(),
            index,
            value,
        );
    }

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    /// Ends the frame.
    pub fn present(&mut self, request: &PresentRequest) -> PresentOutcome {
        self.presenter
            .present(&mut self.host, &mut self.ctx, request)
    }

    /// The next present recreates every host resource.
    pub fn notify_device_lost(&mut self) {
        self.presenter.notify_device_lost();
    }

    /// Poses the next presented eyes were rendered with.
    pub fn set_eye_poses(&mut self, poses: [EyePose; 2]) {
        self.ctx.eye_poses = poses;
    }

    pub fn eye_exchange(&self) -> Option<EyeExchange> {
        self.presenter.eye_exchange()
    }

    pub fn start_compositor(&mut self, sink: CompositorSink) -> std::io::Result<bool> {
        self.presenter.start_compositor(sink)
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    /// Screenshots the next presented frame into the configured screenshot
    /// directory. Returns the path it will be written to.
    pub fn request_screenshot(&mut self) -> Option<PathBuf> {
        let dir = self
            .config
            .screenshot_dir
            .clone()
            .or_else(|| config::data_dir().map(|dir| dir.join("screenshots")))?;
        let path = screenshot_path(&dir);
        self.ctx.capture.request_screenshot(path.clone());
        Some(path)
    }

    /// Screenshots the next presented frame into `path`.
    pub fn request_screenshot_to(&mut self, path: PathBuf) {
        self.ctx.capture.request_screenshot(path);
    }

    pub fn poll_screenshot(&mut self) -> Option<anyhow::Result<PathBuf>> {
        self.ctx.capture.poll_save_result()
    }

    /// Replaces the frame dump sink.
    pub fn set_frame_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.ctx.capture.set_frame_sink(sink);
    }

    pub fn set_dump_frames(&mut self, enabled: bool) {
        self.config.dump_frames = enabled;
        self.ctx.capture.set_dump_enabled(enabled);
    }
}

impl<H: HostGpu> Drop for Renderer<H> {
    fn drop(&mut self) {
        self.ctx.capture.end_dump();
        self.presenter.shutdown(&mut self.host);
    }
}
