//! Host GPU abstraction.
//!
//! [`HostGpu`] is the seam between the EFB translation layer and a concrete
//! graphics API. Draw-state setters mirror the fixed-function state the
//! translator produces; the remaining methods cover EFB readback, scoped
//! clears, framebuffer lifetime and presentation.
//!
//! Pixel buffers exchanged through this trait are `0xAARRGGBB` colours or
//! full-range `u32` depth values, row-major, with row 0 at the rectangle's
//! `top` (the row nearest the host origin).

mod software;
mod wgpu_host;

pub use software::{HostCall, SoftwareHost};
pub use wgpu_host::WgpuHost;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use efbridge_shared::{EfbAccessKind, TargetRectangle};

use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    ReverseSubtract,
}

/// Source and destination factors for one channel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFactors {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare: CompareFunction,
}

impl DepthState {
    pub const DISABLED: DepthState = DepthState {
        test_enable: false,
        write_enable: false,
        compare: CompareFunction::Always,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Cw,
    Ccw,
}

/// `None` disables culling; otherwise back faces of the given winding are culled.
pub type CullState = Option<FrontFace>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    Clear,
    And,
    AndReverse,
    Copy,
    AndInverted,
    Noop,
    Xor,
    Or,
    Nor,
    Equiv,
    Invert,
    OrReverse,
    CopyInverted,
    OrInverted,
    Nand,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorMask {
    pub color: bool,
    pub alpha: bool,
}

impl ColorMask {
    pub const ALL: ColorMask = ColorMask {
        color: true,
        alpha: true,
    };
    pub const NONE: ColorMask = ColorMask {
        color: false,
        alpha: false,
    };
}

/// Viewport in host target pixels, origin per the host convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// A scissored clear of the EFB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearRequest {
    pub rect: TargetRectangle,
    pub mask: ColorMask,
    /// Normalized `[r, g, b, a]`.
    pub color: [f32; 4],
    /// Normalized depth, `None` leaves depth untouched.
    pub depth: Option<f32>,
}

/// Allocation parameters of the EFB render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferConfig {
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    /// One layer per eye.
    pub layers: u32,
}

/// Opaque handle to a host texture owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Where presentation blits land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentTarget {
    Backbuffer,
    /// Dedicated surface of one eye.
    EyeSurface(u32),
    Texture(TextureHandle),
}

/// GPU completion fence that can be polled from any thread.
#[derive(Debug, Clone, Default)]
pub struct GpuFence(Arc<AtomicBool>);

impl GpuFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fence whose work is already complete.
    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    /// Non-blocking.
    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Operations the translation layer needs from a host graphics API.
pub trait HostGpu {
    // Draw state

    fn set_blend_enabled(&mut self, enabled: bool);
    fn set_blend_equation(&mut self, color: BlendEquation, alpha: BlendEquation);
    fn set_blend_factors(&mut self, color: BlendFactors, alpha: BlendFactors);
    fn set_color_mask(&mut self, mask: ColorMask);
    fn set_depth_state(&mut self, depth: DepthState);
    fn set_cull_state(&mut self, cull: CullState);
    fn set_scissor(&mut self, rect: TargetRectangle);
    /// `None` disables the logic op.
    fn set_logic_op(&mut self, op: Option<LogicOp>);
    fn set_dither(&mut self, enabled: bool);
    fn set_viewport(&mut self, viewport: Viewport);

    /// Puts draw state into a neutral configuration for utility passes:
    /// no scissor, depth, culling, blending or logic op, all colour channels
    /// writable, depth writes off.
    fn reset_draw_state(&mut self);

    // EFB access

    /// Resolves the multisampled EFB plane into its single-sample copy,
    /// touching only `rect`.
    fn resolve_region(
        &mut self,
        kind: EfbAccessKind,
        rect: TargetRectangle,
    ) -> Result<(), HostError>;

    /// Reads `rect` of the (resolved) EFB plane. Blocks until the data is on
    /// the CPU.
    fn read_region(
        &mut self,
        kind: EfbAccessKind,
        rect: TargetRectangle,
    ) -> Result<Vec<u32>, HostError>;

    fn clear_region(&mut self, request: &ClearRequest) -> Result<(), HostError>;

    // Synchronisation

    /// Fence signaled once all work submitted so far completes.
    fn insert_fence(&mut self) -> GpuFence;
    fn wait_fence(&mut self, fence: &GpuFence);

    // Framebuffers

    fn create_framebuffers(&mut self, config: &FramebufferConfig) -> Result<(), HostError>;
    fn destroy_framebuffers(&mut self);
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, HostError>;
    fn destroy_texture(&mut self, handle: TextureHandle);

    // Presentation

    fn backbuffer_size(&self) -> (u32, u32);
    fn bind_present_target(&mut self, target: PresentTarget) -> Result<(), HostError>;
    /// Copies `src` of EFB colour layer `layer` into `dst` of the bound
    /// present target, scaling as needed. Both rectangles are in host rows.
    fn blit(
        &mut self,
        src: TargetRectangle,
        dst: TargetRectangle,
        layer: u32,
    ) -> Result<(), HostError>;
    fn clear_present_target(&mut self);
    fn swap_buffers(&mut self) -> Result<(), HostError>;
    /// Reads back `rect` of the bound present target as `0xAARRGGBB`.
    fn read_surface(&mut self, rect: TargetRectangle) -> Result<Vec<u32>, HostError>;

    // Bounding box

    fn bbox_value(&mut self, index: usize) -> i32;
    fn set_bbox_value(&mut self, index: usize, value: i32);
}
