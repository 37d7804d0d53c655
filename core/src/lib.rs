//! efbridge core - embedded frame buffer translation layer
//!
//! This crate translates an emulated GPU's embedded frame buffer (EFB) onto
//! a host graphics API: draw state, CPU readback, presentation and capture.
//!
//! # Architecture
//!
//! - [`HostGpu`] - Seam to the host graphics API ([`SoftwareHost`], [`WgpuHost`])
//! - [`RenderStateTranslator`] - Register snapshot to host draw state, with change detection
//! - [`EfbCache`] - Tiled CPU cache over EFB readbacks for peeks and pokes
//! - [`FramePresenter`] - Framebuffer lifetime, resize and stereo/async presentation
//! - [`FrameCapture`] - Screenshots and frame dumps of the presented image
//! - [`Renderer`] - Façade tying the above together

pub mod bounding_box;
pub mod capabilities;
pub mod capture;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod efb_cache;
pub mod error;
pub mod host;
#[cfg(test)]
mod integration;
pub mod presenter;
pub mod registers;
pub mod renderer;
#[cfg(test)]
pub mod test_utils;
pub mod translator;

// Re-export the data model
pub use efbridge_shared::{
    EfbAccessKind, EfbRegion, EfbScale, HostOrigin, PixelFormat, StereoMode, TargetRectangle,
};

pub use capabilities::{DriverInfo, DriverQuirks, HostCapabilities};
pub use capture::{CapturedFrame, FrameCapture, FrameSink, RawFrameSink, capture_frame};
pub use config::{AspectMode, EfbScaleSetting, MsaaMode, VideoConfig};
pub use context::RenderContext;
pub use diagnostics::{Degradation, Diagnostics, Notice};
pub use efb_cache::{EfbCache, EfbTarget, PeekFormat};
pub use error::{HostError, InitError};
pub use host::{HostGpu, SoftwareHost, WgpuHost};
pub use presenter::{
    CompositorThread, EyeExchange, EyeFrame, EyePose, FrameGeometry, FramePresenter,
    PresentOutcome, PresentRequest, PresentStrategy, SkipReason,
};
pub use registers::RegisterSnapshot;
pub use renderer::Renderer;
pub use translator::{BlendState, RenderStateTranslator};
