//! In-memory reference host.
//!
//! Keeps the EFB planes and presentation surfaces as plain pixel arrays in
//! the host's own row order. Used for headless runs and as the backend of
//! the crate's tests, which turn on the call log with
//! [`SoftwareHost::recording`].

use hashbrown::HashMap;

use efbridge_shared::{DEPTH_24_MAX, EfbAccessKind, HostOrigin, TargetRectangle};

use super::{
    BlendEquation, BlendFactors, ClearRequest, ColorMask, CullState, DepthState,
    FramebufferConfig, GpuFence, HostGpu, LogicOp, PresentTarget, TextureHandle, Viewport,
};
use crate::error::HostError;

/// One logged host call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SetBlendEnabled(bool),
    SetBlendEquation(BlendEquation, BlendEquation),
    SetBlendFactors(BlendFactors, BlendFactors),
    SetColorMask(ColorMask),
    SetDepthState(DepthState),
    SetCullState(CullState),
    SetScissor(TargetRectangle),
    SetLogicOp(Option<LogicOp>),
    SetDither(bool),
    SetViewport(Viewport),
    ResetDrawState,
    Resolve(EfbAccessKind, TargetRectangle),
    Read(EfbAccessKind, TargetRectangle),
    Clear(ClearRequest),
    InsertFence,
    WaitFence,
    CreateFramebuffers(FramebufferConfig),
    DestroyFramebuffers,
    CreateTexture(TextureHandle),
    DestroyTexture(TextureHandle),
    BindPresentTarget(PresentTarget),
    Blit {
        src: TargetRectangle,
        dst: TargetRectangle,
        layer: u32,
    },
    ClearPresentTarget,
    Swap,
    ReadSurface(TargetRectangle),
}

/// A 2D pixel array, row 0 nearest the host origin.
#[derive(Debug, Clone, PartialEq)]
struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Surface {
    fn new(width: u32, height: u32, fill: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; (width * height) as usize],
        }
    }

    fn bounds(&self) -> TargetRectangle {
        TargetRectangle::sized(self.width, self.height)
    }

    fn get(&self, x: i32, y: i32) -> u32 {
        self.pixels[(y as u32 * self.width + x as u32) as usize]
    }

    fn set(&mut self, x: i32, y: i32, value: u32) {
        self.pixels[(y as u32 * self.width + x as u32) as usize] = value;
    }

    fn read(&self, rect: TargetRectangle) -> Option<Vec<u32>> {
        if !self.bounds().contains_rect(&rect) || rect.is_empty() {
            return None;
        }
        let mut out = Vec::with_capacity(rect.area() as usize);
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                out.push(self.get(x, y));
            }
        }
        Some(out)
    }
}

struct EfbPlanes {
    config: FramebufferConfig,
    color: Vec<Surface>,
    depth: Vec<Surface>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct DrawState {
    blend_enabled: bool,
    color_mask: Option<ColorMask>,
    depth: Option<DepthState>,
    scissor: Option<TargetRectangle>,
}

/// Software implementation of [`HostGpu`].
pub struct SoftwareHost {
    origin: HostOrigin,
    efb: Option<EfbPlanes>,
    backbuffer: Surface,
    displayed: Option<Surface>,
    eye_surfaces: [Surface; 2],
    textures: HashMap<TextureHandle, Surface>,
    next_texture: u32,
    bound: PresentTarget,
    draw: DrawState,
    calls: Vec<HostCall>,
    record_calls: bool,
    pending_fences: Vec<GpuFence>,
    auto_signal_fences: bool,
    fail_readbacks: bool,
    fail_framebuffers: bool,
    bbox: [i32; 4],
    swaps: u32,
}

impl SoftwareHost {
    pub fn new(origin: HostOrigin, backbuffer_width: u32, backbuffer_height: u32) -> Self {
        Self {
            origin,
            efb: None,
            backbuffer: Surface::new(backbuffer_width, backbuffer_height, 0xFF00_0000),
            displayed: None,
            eye_surfaces: [
                Surface::new(backbuffer_width, backbuffer_height, 0xFF00_0000),
                Surface::new(backbuffer_width, backbuffer_height, 0xFF00_0000),
            ],
            textures: HashMap::new(),
            next_texture: 1,
            bound: PresentTarget::Backbuffer,
            draw: DrawState::default(),
            calls: Vec::new(),
            record_calls: false,
            pending_fences: Vec::new(),
            auto_signal_fences: true,
            fail_readbacks: false,
            fail_framebuffers: false,
            bbox: [0; 4],
            swaps: 0,
        }
    }

    pub fn origin(&self) -> HostOrigin {
        self.origin
    }

    // ------------------------------------------------------------------
    // Call log
    // ------------------------------------------------------------------

    /// Turns on the call log.
    pub fn recording(mut self) -> Self {
        self.record_calls = true;
        self
    }

    /// Enables or disables the call log. Disabling drops recorded calls.
    pub fn set_record_calls(&mut self, enabled: bool) {
        self.record_calls = enabled;
        if !enabled {
            self.calls = Vec::new();
        }
    }

    fn record(&mut self, call: HostCall) {
        if self.record_calls {
            self.calls.push(call);
        }
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn count_calls(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    /// When disabled, fences stay pending until [`Self::complete_pending_work`]
    /// or a blocking wait.
    pub fn set_auto_signal_fences(&mut self, enabled: bool) {
        self.auto_signal_fences = enabled;
    }

    pub fn complete_pending_work(&mut self) {
        for fence in self.pending_fences.drain(..) {
            fence.signal();
        }
    }

    pub fn set_fail_readbacks(&mut self, fail: bool) {
        self.fail_readbacks = fail;
    }

    pub fn set_fail_framebuffers(&mut self, fail: bool) {
        self.fail_framebuffers = fail;
    }

    pub fn resize_backbuffer(&mut self, width: u32, height: u32) {
        self.backbuffer = Surface::new(width, height, 0xFF00_0000);
        self.eye_surfaces = [
            Surface::new(width, height, 0xFF00_0000),
            Surface::new(width, height, 0xFF00_0000),
        ];
    }

    pub fn framebuffer_config(&self) -> Option<FramebufferConfig> {
        self.efb.as_ref().map(|efb| efb.config)
    }

    pub fn swap_count(&self) -> u32 {
        self.swaps
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Writes `value` into `rect` of every layer of an EFB plane, as a draw would.
    pub fn fill_efb(&mut self, kind: EfbAccessKind, rect: TargetRectangle, value: u32) {
        let Some(efb) = self.efb.as_mut() else {
            return;
        };
        let planes = match kind {
            EfbAccessKind::Color => &mut efb.color,
            EfbAccessKind::Depth => &mut efb.depth,
        };
        for plane in planes {
            let clipped = plane.bounds().intersect(&rect);
            for y in clipped.top..clipped.bottom {
                for x in clipped.left..clipped.right {
                    plane.set(x, y, value);
                }
            }
        }
    }

    /// Writes one EFB layer's colour plane.
    pub fn fill_efb_layer(&mut self, layer: u32, rect: TargetRectangle, value: u32) {
        let Some(plane) = self
            .efb
            .as_mut()
            .and_then(|efb| efb.color.get_mut(layer as usize))
        else {
            return;
        };
        let clipped = plane.bounds().intersect(&rect);
        for y in clipped.top..clipped.bottom {
            for x in clipped.left..clipped.right {
                plane.set(x, y, value);
            }
        }
    }

    /// Host-row pixel of an EFB plane (layer 0).
    pub fn efb_pixel(&self, kind: EfbAccessKind, x: i32, y: i32) -> Option<u32> {
        let efb = self.efb.as_ref()?;
        let plane = match kind {
            EfbAccessKind::Color => efb.color.first()?,
            EfbAccessKind::Depth => efb.depth.first()?,
        };
        plane.bounds().contains_rect(&TargetRectangle::new(x, y, x + 1, y + 1)).then(|| plane.get(x, y))
    }

    /// Host-row pixel of a presentation surface.
    pub fn surface_pixel(&self, target: PresentTarget, x: i32, y: i32) -> Option<u32> {
        let surface = self.surface(target)?;
        surface
            .bounds()
            .contains_rect(&TargetRectangle::new(x, y, x + 1, y + 1))
            .then(|| surface.get(x, y))
    }

    /// Backbuffer contents at the most recent swap.
    pub fn displayed_pixel(&self, x: i32, y: i32) -> Option<u32> {
        let surface = self.displayed.as_ref()?;
        surface
            .bounds()
            .contains_rect(&TargetRectangle::new(x, y, x + 1, y + 1))
            .then(|| surface.get(x, y))
    }

    fn surface(&self, target: PresentTarget) -> Option<&Surface> {
        match target {
            PresentTarget::Backbuffer => Some(&self.backbuffer),
            PresentTarget::EyeSurface(eye) => self.eye_surfaces.get(eye as usize),
            PresentTarget::Texture(handle) => self.textures.get(&handle),
        }
    }

    fn surface_mut(&mut self, target: PresentTarget) -> Option<&mut Surface> {
        match target {
            PresentTarget::Backbuffer => Some(&mut self.backbuffer),
            PresentTarget::EyeSurface(eye) => self.eye_surfaces.get_mut(eye as usize),
            PresentTarget::Texture(handle) => self.textures.get_mut(&handle),
        }
    }
}

/// Stores a 24-bit depth the way a D24 buffer reads back as a 32-bit integer.
fn encode_depth(depth: f32) -> u32 {
    let d24 = (depth.clamp(0.0, 1.0) as f64 * DEPTH_24_MAX as f64).round() as u32;
    (d24 << 8) | (d24 >> 16)
}

fn encode_color(color: [f32; 4]) -> u32 {
    let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
    (c(color[3]) << 24) | (c(color[0]) << 16) | (c(color[1]) << 8) | c(color[2])
}

impl HostGpu for SoftwareHost {
    fn set_blend_enabled(&mut self, enabled: bool) {
        self.draw.blend_enabled = enabled;
        self.record(HostCall::SetBlendEnabled(enabled));
    }

    fn set_blend_equation(&mut self, color: BlendEquation, alpha: BlendEquation) {
        self.record(HostCall::SetBlendEquation(color, alpha));
    }

    fn set_blend_factors(&mut self, color: BlendFactors, alpha: BlendFactors) {
        self.record(HostCall::SetBlendFactors(color, alpha));
    }

    fn set_color_mask(&mut self, mask: ColorMask) {
        self.draw.color_mask = Some(mask);
        self.record(HostCall::SetColorMask(mask));
    }

    fn set_depth_state(&mut self, depth: DepthState) {
        self.draw.depth = Some(depth);
        self.record(HostCall::SetDepthState(depth));
    }

    fn set_cull_state(&mut self, cull: CullState) {
        self.record(HostCall::SetCullState(cull));
    }

    fn set_scissor(&mut self, rect: TargetRectangle) {
        self.draw.scissor = Some(rect);
        self.record(HostCall::SetScissor(rect));
    }

    fn set_logic_op(&mut self, op: Option<LogicOp>) {
        self.record(HostCall::SetLogicOp(op));
    }

    fn set_dither(&mut self, enabled: bool) {
        self.record(HostCall::SetDither(enabled));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record(HostCall::SetViewport(viewport));
    }

    fn reset_draw_state(&mut self) {
        self.draw = DrawState {
            blend_enabled: false,
            color_mask: Some(ColorMask::ALL),
            depth: Some(DepthState::DISABLED),
            scissor: None,
        };
        self.record(HostCall::ResetDrawState);
    }

    fn resolve_region(
        &mut self,
        kind: EfbAccessKind,
        rect: TargetRectangle,
    ) -> Result<(), HostError> {
        self.record(HostCall::Resolve(kind, rect));
        if self.efb.is_none() {
            return Err(HostError::NoFramebuffers);
        }
        if self.fail_readbacks {
            return Err(HostError::Resolve {
                rect,
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn read_region(
        &mut self,
        kind: EfbAccessKind,
        rect: TargetRectangle,
    ) -> Result<Vec<u32>, HostError> {
        self.record(HostCall::Read(kind, rect));
        let efb = self.efb.as_ref().ok_or(HostError::NoFramebuffers)?;
        if self.fail_readbacks {
            return Err(HostError::Readback {
                rect,
                reason: "injected failure".into(),
            });
        }
        let plane = match kind {
            EfbAccessKind::Color => &efb.color[0],
            EfbAccessKind::Depth => &efb.depth[0],
        };
        plane.read(rect).ok_or_else(|| HostError::Readback {
            rect,
            reason: "rectangle outside the render target".into(),
        })
    }

    fn clear_region(&mut self, request: &ClearRequest) -> Result<(), HostError> {
        self.record(HostCall::Clear(*request));
        let efb = self.efb.as_mut().ok_or(HostError::NoFramebuffers)?;

        let color = encode_color(request.color);
        let mut keep = 0u32;
        if !request.mask.color {
            keep |= 0x00FF_FFFF;
        }
        if !request.mask.alpha {
            keep |= 0xFF00_0000;
        }
        if keep != u32::MAX {
            for plane in &mut efb.color {
                let rect = plane.bounds().intersect(&request.rect);
                for y in rect.top..rect.bottom {
                    for x in rect.left..rect.right {
                        let old = plane.get(x, y);
                        plane.set(x, y, (old & keep) | (color & !keep));
                    }
                }
            }
        }
        if let Some(depth) = request.depth {
            let z = encode_depth(depth);
            for plane in &mut efb.depth {
                let rect = plane.bounds().intersect(&request.rect);
                for y in rect.top..rect.bottom {
                    for x in rect.left..rect.right {
                        plane.set(x, y, z);
                    }
                }
            }
        }
        Ok(())
    }

    fn insert_fence(&mut self) -> GpuFence {
        self.record(HostCall::InsertFence);
        if self.auto_signal_fences {
            GpuFence::signaled()
        } else {
            let fence = GpuFence::new();
            self.pending_fences.push(fence.clone());
            fence
        }
    }

    fn wait_fence(&mut self, fence: &GpuFence) {
        self.record(HostCall::WaitFence);
        if !fence.is_signaled() {
            self.complete_pending_work();
            fence.signal();
        }
    }

    fn create_framebuffers(&mut self, config: &FramebufferConfig) -> Result<(), HostError> {
        self.record(HostCall::CreateFramebuffers(*config));
        if self.fail_framebuffers {
            return Err(HostError::FramebufferCreation {
                width: config.width,
                height: config.height,
                samples: config.samples,
                reason: "injected failure".into(),
            });
        }
        let layers = config.layers.max(1) as usize;
        self.efb = Some(EfbPlanes {
            config: *config,
            color: vec![Surface::new(config.width, config.height, 0); layers],
            depth: vec![Surface::new(config.width, config.height, 0); layers],
        });
        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        self.record(HostCall::DestroyFramebuffers);
        self.efb = None;
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, HostError> {
        let handle = TextureHandle(self.next_texture);
        self.next_texture += 1;
        self.textures
            .insert(handle, Surface::new(width, height, 0xFF00_0000));
        self.record(HostCall::CreateTexture(handle));
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        self.textures.remove(&handle);
        self.record(HostCall::DestroyTexture(handle));
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        (self.backbuffer.width, self.backbuffer.height)
    }

    fn bind_present_target(&mut self, target: PresentTarget) -> Result<(), HostError> {
        self.record(HostCall::BindPresentTarget(target));
        match target {
            PresentTarget::Texture(handle) if !self.textures.contains_key(&handle) => {
                Err(HostError::UnknownTexture(handle.0))
            }
            _ => {
                self.bound = target;
                Ok(())
            }
        }
    }

    fn blit(
        &mut self,
        src: TargetRectangle,
        dst: TargetRectangle,
        layer: u32,
    ) -> Result<(), HostError> {
        self.record(HostCall::Blit { src, dst, layer });
        if src.is_empty() || dst.is_empty() {
            return Ok(());
        }
        let efb = self.efb.as_ref().ok_or(HostError::NoFramebuffers)?;
        let source = efb
            .color
            .get(layer as usize)
            .or_else(|| efb.color.first())
            .ok_or(HostError::NoFramebuffers)?
            .clone();
        let src = source.bounds().intersect(&src);
        if src.is_empty() {
            return Ok(());
        }
        let bound = self.bound;
        let target = self
            .surface_mut(bound)
            .ok_or(HostError::NoFramebuffers)?;
        let clipped = target.bounds().intersect(&dst);
        for y in clipped.top..clipped.bottom {
            let sy = src.top + ((y - dst.top) as i64 * src.height() as i64 / dst.height() as i64) as i32;
            for x in clipped.left..clipped.right {
                let sx = src.left
                    + ((x - dst.left) as i64 * src.width() as i64 / dst.width() as i64) as i32;
                target.set(x, y, source.get(sx, sy));
            }
        }
        Ok(())
    }

    fn clear_present_target(&mut self) {
        self.record(HostCall::ClearPresentTarget);
        let bound = self.bound;
        if let Some(surface) = self.surface_mut(bound) {
            surface.pixels.fill(0xFF00_0000);
        }
    }

    fn swap_buffers(&mut self) -> Result<(), HostError> {
        self.record(HostCall::Swap);
        self.swaps += 1;
        self.displayed = Some(self.backbuffer.clone());
        Ok(())
    }

    fn read_surface(&mut self, rect: TargetRectangle) -> Result<Vec<u32>, HostError> {
        self.record(HostCall::ReadSurface(rect));
        if self.fail_readbacks {
            return Err(HostError::Readback {
                rect,
                reason: "injected failure".into(),
            });
        }
        self.surface(self.bound)
            .and_then(|s| s.read(rect))
            .ok_or_else(|| HostError::Readback {
                rect,
                reason: "rectangle outside the surface".into(),
            })
    }

    fn bbox_value(&mut self, index: usize) -> i32 {
        self.bbox.get(index).copied().unwrap_or(0)
    }

    fn set_bbox_value(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.bbox.get_mut(index) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with_efb() -> SoftwareHost {
        let mut host = SoftwareHost::new(HostOrigin::TopLeft, 64, 32).recording();
        host.create_framebuffers(&FramebufferConfig {
            width: 16,
            height: 8,
            samples: 1,
            layers: 1,
        })
        .unwrap();
        host
    }

    #[test]
    fn test_call_log_off_by_default() {
        let mut host = SoftwareHost::new(HostOrigin::TopLeft, 64, 32);
        for _ in 0..1000 {
            host.set_dither(true);
        }
        assert!(host.calls().is_empty());

        host.set_record_calls(true);
        host.set_dither(false);
        assert_eq!(host.calls(), &[HostCall::SetDither(false)]);

        host.set_record_calls(false);
        host.set_dither(true);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_depth_encoding_round_trips_24_bits() {
        for z in [0u32, 1, 0x12_3456, DEPTH_24_MAX] {
            let stored = encode_depth(z as f32 / DEPTH_24_MAX as f32);
            assert_eq!(stored >> 8, z);
        }
    }

    #[test]
    fn test_masked_clear_keeps_alpha() {
        let mut host = host_with_efb();
        host.fill_efb(EfbAccessKind::Color, TargetRectangle::sized(16, 8), 0x80FF_FFFF);
        host.clear_region(&ClearRequest {
            rect: TargetRectangle::new(0, 0, 2, 2),
            mask: ColorMask {
                color: true,
                alpha: false,
            },
            color: [0.0, 0.0, 1.0, 1.0],
            depth: None,
        })
        .unwrap();
        assert_eq!(host.efb_pixel(EfbAccessKind::Color, 1, 1), Some(0x8000_00FF));
        assert_eq!(host.efb_pixel(EfbAccessKind::Color, 2, 2), Some(0x80FF_FFFF));
    }

    #[test]
    fn test_read_outside_target_fails() {
        let mut host = host_with_efb();
        assert!(host
            .read_region(EfbAccessKind::Color, TargetRectangle::new(10, 0, 20, 4))
            .is_err());
    }

    #[test]
    fn test_blit_scales_nearest() {
        let mut host = host_with_efb();
        host.fill_efb(EfbAccessKind::Color, TargetRectangle::new(0, 0, 8, 8), 0xFFFF_0000);
        host.fill_efb(EfbAccessKind::Color, TargetRectangle::new(8, 0, 16, 8), 0xFF00_FF00);
        host.blit(TargetRectangle::sized(16, 8), TargetRectangle::sized(64, 32), 0)
            .unwrap();
        assert_eq!(host.surface_pixel(PresentTarget::Backbuffer, 31, 5), Some(0xFFFF_0000));
        assert_eq!(host.surface_pixel(PresentTarget::Backbuffer, 32, 5), Some(0xFF00_FF00));
    }

    #[test]
    fn test_pending_fence_signals_on_wait() {
        let mut host = host_with_efb();
        host.set_auto_signal_fences(false);
        let fence = host.insert_fence();
        assert!(!fence.is_signaled());
        host.wait_fence(&fence);
        assert!(fence.is_signaled());
    }
}
