//! wgpu implementation of [`HostGpu`].
//!
//! wgpu bakes blend, depth and raster state into pipelines, so the draw-state
//! setters record into a [`WgpuDrawState`] that the vertex pipeline builder
//! reads when it keys its pipelines. Everything the translation layer does
//! itself (resolve, readback, scissored clear, blit) runs through small
//! utility pipelines created on demand.
//!
//! Render targets are top-left origin.

use std::sync::mpsc;

use bytemuck::{Pod, Zeroable};
use hashbrown::HashMap;

use efbridge_shared::{DEPTH_24_MAX, EfbAccessKind, TargetRectangle};

use super::{
    BlendEquation, BlendFactor, BlendFactors, ClearRequest, ColorMask, CompareFunction,
    CullState, DepthState, FramebufferConfig, FrontFace, GpuFence, HostGpu, LogicOp,
    PresentTarget, TextureHandle, Viewport,
};
use crate::capabilities::HostCapabilities;
use crate::error::HostError;

const EFB_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const EFB_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const DEPTH_READBACK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
const PRESENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const FULLSCREEN_WGSL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/shaders/fullscreen.wgsl"
));
const CLEAR_WGSL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/shaders/efb_clear.wgsl"
));
const RESOLVE_COLOR_MS_WGSL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/shaders/resolve_color_ms.wgsl"
));
const RESOLVE_DEPTH_WGSL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/shaders/resolve_depth.wgsl"
));
const RESOLVE_DEPTH_MS_WGSL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/shaders/resolve_depth_ms.wgsl"
));
const BLIT_WGSL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/shaders/blit.wgsl"
));

/// Draw state recorded for the vertex pipeline builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WgpuDrawState {
    pub blend_enabled: bool,
    pub equations: (BlendEquation, BlendEquation),
    pub color_factors: BlendFactors,
    pub alpha_factors: BlendFactors,
    pub color_mask: ColorMask,
    pub depth: DepthState,
    pub cull: CullState,
    pub scissor: Option<TargetRectangle>,
    pub dither: bool,
    pub viewport: Option<Viewport>,
}

impl Default for WgpuDrawState {
    fn default() -> Self {
        let one_zero = BlendFactors {
            src: BlendFactor::One,
            dst: BlendFactor::Zero,
        };
        Self {
            blend_enabled: false,
            equations: (BlendEquation::Add, BlendEquation::Add),
            color_factors: one_zero,
            alpha_factors: one_zero,
            color_mask: ColorMask::ALL,
            depth: DepthState::DISABLED,
            cull: None,
            scissor: None,
            dither: false,
            viewport: None,
        }
    }
}

impl WgpuDrawState {
    pub fn blend_state(&self) -> Option<wgpu::BlendState> {
        if !self.blend_enabled {
            return None;
        }
        let component = |factors: BlendFactors, equation: BlendEquation| wgpu::BlendComponent {
            src_factor: factors.src.to_wgpu(),
            dst_factor: factors.dst.to_wgpu(),
            operation: equation.to_wgpu(),
        };
        Some(wgpu::BlendState {
            color: component(self.color_factors, self.equations.0),
            alpha: component(self.alpha_factors, self.equations.1),
        })
    }

    pub fn color_writes(&self) -> wgpu::ColorWrites {
        self.color_mask.to_wgpu()
    }

    pub fn depth_stencil_state(&self) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format: EFB_DEPTH_FORMAT,
            depth_write_enabled: self.depth.test_enable && self.depth.write_enable,
            depth_compare: if self.depth.test_enable {
                self.depth.compare.to_wgpu()
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }

    pub fn primitive_state(&self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: match self.cull {
                Some(FrontFace::Ccw) => wgpu::FrontFace::Ccw,
                _ => wgpu::FrontFace::Cw,
            },
            cull_mode: self.cull.map(|_| wgpu::Face::Back),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        }
    }
}

impl BlendFactor {
    pub fn to_wgpu(self) -> wgpu::BlendFactor {
        match self {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcColor => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::DstColor => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
            BlendFactor::Src1Alpha => wgpu::BlendFactor::Src1Alpha,
            BlendFactor::OneMinusSrc1Alpha => wgpu::BlendFactor::OneMinusSrc1Alpha,
        }
    }
}

impl BlendEquation {
    pub fn to_wgpu(self) -> wgpu::BlendOperation {
        match self {
            BlendEquation::Add => wgpu::BlendOperation::Add,
            BlendEquation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        }
    }
}

impl CompareFunction {
    pub fn to_wgpu(self) -> wgpu::CompareFunction {
        match self {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }
}

impl ColorMask {
    pub fn to_wgpu(self) -> wgpu::ColorWrites {
        let mut writes = wgpu::ColorWrites::empty();
        if self.color {
            writes |= wgpu::ColorWrites::COLOR;
        }
        if self.alpha {
            writes |= wgpu::ColorWrites::ALPHA;
        }
        writes
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ClearUniforms {
    color: [f32; 4],
    depth: f32,
    _pad: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlitUniforms {
    src_offset: [f32; 2],
    src_scale: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClearPipelineKey {
    write_mask: u32,
    with_depth: bool,
    samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ResolveKind {
    ColorMultisampled,
    Depth,
    DepthMultisampled,
}

/// One layer of the EFB.
struct EfbLayer {
    color: wgpu::Texture,
    depth: wgpu::Texture,
    /// Single-sample colour, present only when multisampled.
    resolved_color: Option<wgpu::Texture>,
    /// Readable copy of depth.
    depth_readback: wgpu::Texture,
}

struct EfbTargets {
    config: FramebufferConfig,
    layers: Vec<EfbLayer>,
}

struct OffscreenSurface {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

struct UtilityPass {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

/// Host backend over a wgpu device.
pub struct WgpuHost {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: HostCapabilities,
    draw: WgpuDrawState,
    efb: Option<EfbTargets>,
    backbuffer: OffscreenSurface,
    eye_surfaces: [Option<OffscreenSurface>; 2],
    textures: HashMap<TextureHandle, OffscreenSurface>,
    next_texture: u32,
    bound: PresentTarget,
    clear_pipelines: HashMap<ClearPipelineKey, UtilityPass>,
    resolve_pipelines: HashMap<ResolveKind, UtilityPass>,
    blit: Option<UtilityPass>,
    sampler: wgpu::Sampler,
    surface: Option<(wgpu::Surface<'static>, wgpu::SurfaceConfiguration)>,
    bbox: [i32; 4],
}

impl WgpuHost {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        capabilities: HostCapabilities,
        backbuffer_width: u32,
        backbuffer_height: u32,
    ) -> Self {
        let backbuffer = create_present_texture(
            &device,
            "Backbuffer",
            backbuffer_width.max(1),
            backbuffer_height.max(1),
        );
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("EFB Blit Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            device,
            queue,
            capabilities,
            draw: WgpuDrawState::default(),
            efb: None,
            backbuffer,
            eye_surfaces: [None, None],
            textures: HashMap::new(),
            next_texture: 1,
            bound: PresentTarget::Backbuffer,
            clear_pipelines: HashMap::new(),
            resolve_pipelines: HashMap::new(),
            blit: None,
            sampler,
            surface: None,
            bbox: [0; 4],
        }
    }

    /// Creates a device on the default adapter without a window.
    pub fn new_headless(width: u32, height: u32) -> anyhow::Result<Self> {
        use anyhow::Context;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("Failed to find suitable GPU adapter")?;

        let features = adapter.features() & wgpu::Features::DUAL_SOURCE_BLENDING;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("EFB Device"),
            required_features: features,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: wgpu::Trace::Off,
        }))
        .context("Failed to create GPU device")?;

        let sample_counts = adapter
            .get_texture_format_features(EFB_COLOR_FORMAT)
            .flags
            .supported_sample_counts();
        let capabilities = HostCapabilities::from_wgpu(
            &adapter.get_info(),
            features,
            &adapter.get_downlevel_capabilities(),
            &sample_counts,
        );
        tracing::info!(
            "wgpu host on {} ({:?}), max {}x MSAA, dual source: {}",
            adapter.get_info().name,
            adapter.get_info().backend,
            capabilities.max_samples,
            capabilities.dual_source_blend
        );
        Ok(Self::new(device, queue, capabilities, width, height))
    }

    pub fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Draw state for pipelines built outside this backend.
    pub fn draw_state(&self) -> &WgpuDrawState {
        &self.draw
    }

    /// View of EFB colour layer `layer`, for the vertex pipeline's render pass.
    pub fn efb_color_view(&self, layer: u32) -> Option<wgpu::TextureView> {
        let efb = self.efb.as_ref()?;
        let layer = efb.layers.get(layer as usize)?;
        Some(layer.color.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    pub fn efb_depth_view(&self, layer: u32) -> Option<wgpu::TextureView> {
        let efb = self.efb.as_ref()?;
        let layer = efb.layers.get(layer as usize)?;
        Some(layer.depth.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    /// Attaches a window surface. Swaps copy the backbuffer into it, so the
    /// configuration must include `COPY_DST` usage and match the backbuffer
    /// format.
    pub fn attach_surface(
        &mut self,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    ) {
        surface.configure(&self.device, &config);
        self.backbuffer =
            create_present_texture(&self.device, "Backbuffer", config.width, config.height);
        self.eye_surfaces = [None, None];
        self.surface = Some((surface, config));
    }

    /// Resizes the backbuffer (and the attached surface, if any).
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        self.backbuffer = create_present_texture(&self.device, "Backbuffer", width, height);
        self.eye_surfaces = [None, None];
        if let Some((surface, config)) = self.surface.as_mut() {
            config.width = width;
            config.height = height;
            surface.configure(&self.device, config);
        }
    }

    fn present_texture(&mut self, target: PresentTarget) -> Result<&OffscreenSurface, HostError> {
        match target {
            PresentTarget::Backbuffer => Ok(&self.backbuffer),
            PresentTarget::EyeSurface(eye) => {
                let index = (eye as usize).min(1);
                let (w, h) = (self.backbuffer.width, self.backbuffer.height);
                let device = &self.device;
                Ok(self.eye_surfaces[index]
                    .get_or_insert_with(|| create_present_texture(device, "Eye Surface", w, h)))
            }
            PresentTarget::Texture(handle) => self
                .textures
                .get(&handle)
                .ok_or(HostError::UnknownTexture(handle.0)),
        }
    }

    fn utility_module(&self, label: &str, body: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(format!("{FULLSCREEN_WGSL}\n{body}").into()),
        })
    }

    fn utility_pipeline(
        &self,
        label: &str,
        module: &wgpu::ShaderModule,
        fragment_entry: &str,
        layout_entries: &[wgpu::BindGroupLayoutEntry],
        target: wgpu::ColorTargetState,
        depth_stencil: Option<wgpu::DepthStencilState>,
        samples: u32,
    ) -> UtilityPass {
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: layout_entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_fullscreen"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(fragment_entry),
                    targets: &[Some(target)],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: samples,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            });
        UtilityPass { pipeline, layout }
    }

    fn ensure_clear_pipeline(&mut self, key: ClearPipelineKey) {
        if self.clear_pipelines.contains_key(&key) {
            return;
        }
        tracing::debug!("Creating EFB clear pipeline: {:?}", key);
        let module = self.utility_module("EFB Clear Shader", CLEAR_WGSL);
        let pass = self.utility_pipeline(
            "EFB Clear",
            &module,
            if key.with_depth {
                "fs_clear_color_depth"
            } else {
                "fs_clear_color"
            },
            &[uniform_entry(0)],
            wgpu::ColorTargetState {
                format: EFB_COLOR_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::from_bits_truncate(key.write_mask),
            },
            key.with_depth.then(|| wgpu::DepthStencilState {
                format: EFB_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            key.samples,
        );
        self.clear_pipelines.insert(key, pass);
    }

    fn ensure_resolve_pipeline(&mut self, kind: ResolveKind) {
        if self.resolve_pipelines.contains_key(&kind) {
            return;
        }
        let (source, sample_type, multisampled, format) = match kind {
            ResolveKind::ColorMultisampled => (
                RESOLVE_COLOR_MS_WGSL,
                wgpu::TextureSampleType::Float { filterable: false },
                true,
                EFB_COLOR_FORMAT,
            ),
            ResolveKind::Depth => (
                RESOLVE_DEPTH_WGSL,
                wgpu::TextureSampleType::Depth,
                false,
                DEPTH_READBACK_FORMAT,
            ),
            ResolveKind::DepthMultisampled => (
                RESOLVE_DEPTH_MS_WGSL,
                wgpu::TextureSampleType::Depth,
                true,
                DEPTH_READBACK_FORMAT,
            ),
        };
        let module = self.utility_module("EFB Resolve Shader", source);
        let pass = self.utility_pipeline(
            "EFB Resolve",
            &module,
            "fs_resolve",
            &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled,
                },
                count: None,
            }],
            wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            },
            None,
            1,
        );
        self.resolve_pipelines.insert(kind, pass);
    }

    fn ensure_blit_pipeline(&mut self) {
        if self.blit.is_some() {
            return;
        }
        let module = self.utility_module("EFB Blit Shader", BLIT_WGSL);
        let pass = self.utility_pipeline(
            "EFB Blit",
            &module,
            "fs_blit",
            &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                uniform_entry(2),
            ],
            wgpu::ColorTargetState {
                format: PRESENT_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            },
            None,
            1,
        );
        self.blit = Some(pass);
    }

    fn uniform_buffer(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: contents.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, contents);
        buffer
    }

    /// Copies `rect` of `texture` to the CPU, 4 bytes per texel.
    fn read_texture(
        &self,
        texture: &wgpu::Texture,
        rect: TargetRectangle,
    ) -> Result<Vec<[u8; 4]>, HostError> {
        let width = rect.width() as u32;
        let height = rect.height() as u32;
        let bytes_per_pixel = 4u32;
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("EFB Readback Staging Buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("EFB Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.left as u32,
                    y: rect.top as u32,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| HostError::BufferMap(e.to_string()))?;
        rx.recv()
            .map_err(|e| HostError::BufferMap(e.to_string()))?
            .map_err(|e| HostError::BufferMap(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let mut texels = Vec::with_capacity((width * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            let end = start + unpadded_bytes_per_row as usize;
            texels.extend(
                mapped[start..end]
                    .chunks_exact(4)
                    .map(|c| [c[0], c[1], c[2], c[3]]),
            );
        }
        drop(mapped);
        staging.unmap();
        Ok(texels)
    }

    fn checked_rect(&self, rect: TargetRectangle) -> Result<(TargetRectangle, u32), HostError> {
        let efb = self.efb.as_ref().ok_or(HostError::NoFramebuffers)?;
        let bounds = TargetRectangle::sized(efb.config.width, efb.config.height);
        let clipped = bounds.intersect(&rect);
        if clipped != rect || rect.is_empty() {
            return Err(HostError::Readback {
                rect,
                reason: "rectangle outside the render target".into(),
            });
        }
        Ok((rect, efb.config.samples))
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_present_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
) -> OffscreenSurface {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: PRESENT_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    OffscreenSurface {
        texture,
        width,
        height,
    }
}

fn efb_texture(
    device: &wgpu::Device,
    label: &str,
    config: &FramebufferConfig,
    format: wgpu::TextureFormat,
    samples: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: samples,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

fn scissor(pass: &mut wgpu::RenderPass<'_>, rect: TargetRectangle) {
    pass.set_scissor_rect(
        rect.left as u32,
        rect.top as u32,
        rect.width() as u32,
        rect.height() as u32,
    );
}

fn color_attachment(view: &wgpu::TextureView) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        },
        depth_slice: None,
    }
}

impl HostGpu for WgpuHost {
    fn set_blend_enabled(&mut self, enabled: bool) {
        self.draw.blend_enabled = enabled;
    }

    fn set_blend_equation(&mut self, color: BlendEquation, alpha: BlendEquation) {
        self.draw.equations = (color, alpha);
    }

    fn set_blend_factors(&mut self, color: BlendFactors, alpha: BlendFactors) {
        self.draw.color_factors = color;
        self.draw.alpha_factors = alpha;
    }

    fn set_color_mask(&mut self, mask: ColorMask) {
        self.draw.color_mask = mask;
    }

    fn set_depth_state(&mut self, depth: DepthState) {
        self.draw.depth = depth;
    }

    fn set_cull_state(&mut self, cull: CullState) {
        self.draw.cull = cull;
    }

    fn set_scissor(&mut self, rect: TargetRectangle) {
        self.draw.scissor = Some(rect);
    }

    fn set_logic_op(&mut self, op: Option<LogicOp>) {
        if op.is_some() {
            tracing::trace!("wgpu has no logic ops; ignoring {:?}", op);
        }
    }

    fn set_dither(&mut self, enabled: bool) {
        self.draw.dither = enabled;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.draw.viewport = Some(viewport);
    }

    fn reset_draw_state(&mut self) {
        self.draw = WgpuDrawState {
            viewport: self.draw.viewport,
            ..WgpuDrawState::default()
        };
    }

    fn resolve_region(
        &mut self,
        kind: EfbAccessKind,
        rect: TargetRectangle,
    ) -> Result<(), HostError> {
        let (rect, samples) = self.checked_rect(rect).map_err(|e| match e {
            HostError::Readback { rect, reason } => HostError::Resolve { rect, reason },
            other => other,
        })?;
        let resolve_kind = match (kind, samples > 1) {
            (EfbAccessKind::Color, false) => return Ok(()),
            (EfbAccessKind::Color, true) => ResolveKind::ColorMultisampled,
            (EfbAccessKind::Depth, false) => ResolveKind::Depth,
            (EfbAccessKind::Depth, true) => ResolveKind::DepthMultisampled,
        };
        self.ensure_resolve_pipeline(resolve_kind);

        let Some(efb) = self.efb.as_ref() else {
            return Err(HostError::NoFramebuffers);
        };
        let Some(pass_info) = self.resolve_pipelines.get(&resolve_kind) else {
            return Err(HostError::Resolve {
                rect,
                reason: "resolve pipeline missing".into(),
            });
        };
        // Colour resolves every layer for presentation; depth is only peeked
        // from the first.
        let layers = match kind {
            EfbAccessKind::Color => &efb.layers[..],
            EfbAccessKind::Depth => &efb.layers[..1],
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("EFB Resolve Encoder"),
            });
        for layer in layers {
            let (source, target) = match kind {
                EfbAccessKind::Color => (
                    &layer.color,
                    layer.resolved_color.as_ref().ok_or(HostError::NoFramebuffers)?,
                ),
                EfbAccessKind::Depth => (&layer.depth, &layer.depth_readback),
            };
            let source_view = source.create_view(&wgpu::TextureViewDescriptor {
                aspect: match kind {
                    EfbAccessKind::Color => wgpu::TextureAspect::All,
                    EfbAccessKind::Depth => wgpu::TextureAspect::DepthOnly,
                },
                ..Default::default()
            });
            let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("EFB Resolve Bind Group"),
                layout: &pass_info.layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                }],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("EFB Resolve Pass"),
                color_attachments: &[Some(color_attachment(&target_view))],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pass_info.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            scissor(&mut pass, rect);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_region(
        &mut self,
        kind: EfbAccessKind,
        rect: TargetRectangle,
    ) -> Result<Vec<u32>, HostError> {
        let (rect, samples) = self.checked_rect(rect)?;
        let efb = self.efb.as_ref().ok_or(HostError::NoFramebuffers)?;
        let layer = &efb.layers[0];
        match kind {
            EfbAccessKind::Color => {
                let source = if samples > 1 {
                    layer.resolved_color.as_ref().ok_or(HostError::NoFramebuffers)?
                } else {
                    &layer.color
                };
                let texels = self.read_texture(source, rect)?;
                Ok(texels
                    .into_iter()
                    .map(|[r, g, b, a]| u32::from_be_bytes([a, r, g, b]))
                    .collect())
            }
            EfbAccessKind::Depth => {
                let texels = self.read_texture(&layer.depth_readback, rect)?;
                Ok(texels
                    .into_iter()
                    .map(|bytes| {
                        let depth = f32::from_le_bytes(bytes).clamp(0.0, 1.0);
                        let d24 = (depth as f64 * DEPTH_24_MAX as f64).round() as u32;
                        (d24 << 8) | (d24 >> 16)
                    })
                    .collect())
            }
        }
    }

    fn clear_region(&mut self, request: &ClearRequest) -> Result<(), HostError> {
        let efb = self.efb.as_ref().ok_or(HostError::NoFramebuffers)?;
        let bounds = TargetRectangle::sized(efb.config.width, efb.config.height);
        let rect = bounds.intersect(&request.rect);
        if rect.is_empty() {
            return Ok(());
        }
        let key = ClearPipelineKey {
            write_mask: request.mask.to_wgpu().bits(),
            with_depth: request.depth.is_some(),
            samples: efb.config.samples,
        };
        self.ensure_clear_pipeline(key);

        let uniforms = ClearUniforms {
            color: request.color,
            depth: request.depth.unwrap_or(0.0),
            _pad: [0.0; 3],
        };
        let buffer = self.uniform_buffer("EFB Clear Uniforms", bytemuck::bytes_of(&uniforms));
        let (Some(efb), Some(pass_info)) = (self.efb.as_ref(), self.clear_pipelines.get(&key))
        else {
            return Err(HostError::NoFramebuffers);
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("EFB Clear Bind Group"),
            layout: &pass_info.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("EFB Clear Encoder"),
            });
        for layer in &efb.layers {
            let color_view = layer.color.create_view(&wgpu::TextureViewDescriptor::default());
            let depth_view = layer.depth.create_view(&wgpu::TextureViewDescriptor::default());
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("EFB Clear Pass"),
                color_attachments: &[Some(color_attachment(&color_view))],
                depth_stencil_attachment: key.with_depth.then(|| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view: &depth_view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pass_info.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            scissor(&mut pass, rect);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn insert_fence(&mut self) -> GpuFence {
        let fence = GpuFence::new();
        let signal = fence.clone();
        self.queue.on_submitted_work_done(move || signal.signal());
        fence
    }

    fn wait_fence(&mut self, fence: &GpuFence) {
        if fence.is_signaled() {
            return;
        }
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            tracing::warn!("Fence wait failed: {}", e);
        }
    }

    fn create_framebuffers(&mut self, config: &FramebufferConfig) -> Result<(), HostError> {
        if config.width == 0 || config.height == 0 {
            return Err(HostError::FramebufferCreation {
                width: config.width,
                height: config.height,
                samples: config.samples,
                reason: "zero-sized target".into(),
            });
        }
        let max_dim = self.device.limits().max_texture_dimension_2d;
        if config.width > max_dim || config.height > max_dim {
            return Err(HostError::FramebufferCreation {
                width: config.width,
                height: config.height,
                samples: config.samples,
                reason: format!("exceeds the {max_dim} texel limit"),
            });
        }

        let samples = config.samples.max(1);
        let multisampled = samples > 1;
        let color_usage = if multisampled {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
        };
        let layers = (0..config.layers.max(1))
            .map(|_| EfbLayer {
                color: efb_texture(
                    &self.device,
                    "EFB Color",
                    config,
                    EFB_COLOR_FORMAT,
                    samples,
                    color_usage,
                ),
                depth: efb_texture(
                    &self.device,
                    "EFB Depth",
                    config,
                    EFB_DEPTH_FORMAT,
                    samples,
                    wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                ),
                resolved_color: multisampled.then(|| {
                    efb_texture(
                        &self.device,
                        "EFB Resolved Color",
                        config,
                        EFB_COLOR_FORMAT,
                        1,
                        wgpu::TextureUsages::RENDER_ATTACHMENT
                            | wgpu::TextureUsages::TEXTURE_BINDING
                            | wgpu::TextureUsages::COPY_SRC,
                    )
                }),
                depth_readback: efb_texture(
                    &self.device,
                    "EFB Depth Readback",
                    config,
                    DEPTH_READBACK_FORMAT,
                    1,
                    wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                ),
            })
            .collect();
        tracing::debug!(
            "EFB framebuffers: {}x{}, {} samples, {} layers",
            config.width,
            config.height,
            samples,
            config.layers
        );
        self.efb = Some(EfbTargets {
            config: *config,
            layers,
        });
        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        if let Some(efb) = self.efb.take() {
            for layer in efb.layers {
                layer.color.destroy();
                layer.depth.destroy();
                if let Some(resolved) = layer.resolved_color {
                    resolved.destroy();
                }
                layer.depth_readback.destroy();
            }
        }
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, HostError> {
        let handle = TextureHandle(self.next_texture);
        self.next_texture += 1;
        let surface = create_present_texture(&self.device, "Eye Texture", width.max(1), height.max(1));
        self.textures.insert(handle, surface);
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(surface) = self.textures.remove(&handle) {
            surface.texture.destroy();
        }
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        (self.backbuffer.width, self.backbuffer.height)
    }

    fn bind_present_target(&mut self, target: PresentTarget) -> Result<(), HostError> {
        self.present_texture(target)?;
        self.bound = target;
        Ok(())
    }

    fn blit(
        &mut self,
        src: TargetRectangle,
        dst: TargetRectangle,
        layer: u32,
    ) -> Result<(), HostError> {
        if src.is_empty() || dst.is_empty() {
            return Ok(());
        }
        self.ensure_blit_pipeline();
        let bound = self.bound;
        // Materialize lazily created eye surfaces before borrowing immutably.
        self.present_texture(bound)?;

        let efb = self.efb.as_ref().ok_or(HostError::NoFramebuffers)?;
        let efb_layer = efb
            .layers
            .get(layer as usize)
            .or_else(|| efb.layers.first())
            .ok_or(HostError::NoFramebuffers)?;
        let source = efb_layer.resolved_color.as_ref().unwrap_or(&efb_layer.color);
        let (efb_w, efb_h) = (efb.config.width as f32, efb.config.height as f32);

        let uniforms = BlitUniforms {
            src_offset: [src.left as f32 / efb_w, src.top as f32 / efb_h],
            src_scale: [src.width() as f32 / efb_w, src.height() as f32 / efb_h],
        };
        let buffer = self.uniform_buffer("EFB Blit Uniforms", bytemuck::bytes_of(&uniforms));
        let target = match bound {
            PresentTarget::Backbuffer => &self.backbuffer,
            PresentTarget::EyeSurface(eye) => self.eye_surfaces[(eye as usize).min(1)]
                .as_ref()
                .ok_or(HostError::NoFramebuffers)?,
            PresentTarget::Texture(handle) => self
                .textures
                .get(&handle)
                .ok_or(HostError::UnknownTexture(handle.0))?,
        };
        let Some(blit) = self.blit.as_ref() else {
            return Err(HostError::NoFramebuffers);
        };

        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = target.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("EFB Blit Bind Group"),
            layout: &blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer.as_entire_binding(),
                },
            ],
        });

        let clipped = TargetRectangle::sized(target.width, target.height).intersect(&dst);
        if clipped.is_empty() {
            return Ok(());
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("EFB Blit Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("EFB Blit Pass"),
                color_attachments: &[Some(color_attachment(&target_view))],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&blit.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_viewport(
                dst.left as f32,
                dst.top as f32,
                dst.width() as f32,
                dst.height() as f32,
                0.0,
                1.0,
            );
            scissor(&mut pass, clipped);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn clear_present_target(&mut self) {
        let bound = self.bound;
        let Ok(target) = self.present_texture(bound) else {
            return;
        };
        let view = target.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present Target Clear Encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Target Clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn swap_buffers(&mut self) -> Result<(), HostError> {
        let Some((surface, config)) = self.surface.as_ref() else {
            return Ok(());
        };
        let frame = surface
            .get_current_texture()
            .map_err(|e| HostError::Present(e.to_string()))?;
        if config.width == self.backbuffer.width && config.height == self.backbuffer.height {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Swap Copy Encoder"),
                });
            encoder.copy_texture_to_texture(
                self.backbuffer.texture.as_image_copy(),
                frame.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: config.width,
                    height: config.height,
                    depth_or_array_layers: 1,
                },
            );
            self.queue.submit(std::iter::once(encoder.finish()));
        } else {
            tracing::warn!(
                "Backbuffer {}x{} does not match surface {}x{}; skipping copy",
                self.backbuffer.width,
                self.backbuffer.height,
                config.width,
                config.height
            );
        }
        frame.present();
        Ok(())
    }

    fn read_surface(&mut self, rect: TargetRectangle) -> Result<Vec<u32>, HostError> {
        let bound = self.bound;
        let target = self.present_texture(bound)?;
        let bounds = TargetRectangle::sized(target.width, target.height);
        if bounds.intersect(&rect) != rect || rect.is_empty() {
            return Err(HostError::Readback {
                rect,
                reason: "rectangle outside the surface".into(),
            });
        }
        let texture = target.texture.clone();
        let texels = self.read_texture(&texture, rect)?;
        Ok(texels
            .into_iter()
            .map(|[r, g, b, a]| u32::from_be_bytes([a, r, g, b]))
            .collect())
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
