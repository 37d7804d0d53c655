//! Error types for host GPU operations and renderer start-up.

use efbridge_shared::TargetRectangle;

/// Failure reported by a host GPU backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("readback of {rect:?} failed: {reason}")]
    Readback {
        rect: TargetRectangle,
        reason: String,
    },
    #[error("resolve of {rect:?} failed: {reason}")]
    Resolve {
        rect: TargetRectangle,
        reason: String,
    },
    #[error("failed to map staging buffer: {0}")]
    BufferMap(String),
    #[error("framebuffer creation failed ({width}x{height}, {samples} samples): {reason}")]
    FramebufferCreation {
        width: u32,
        height: u32,
        samples: u32,
        reason: String,
    },
    #[error("no framebuffers are allocated")]
    NoFramebuffers,
    #[error("unknown texture handle {0}")]
    UnknownTexture(u32),
    #[error("surface presentation failed: {0}")]
    Present(String),
    #[error("host device lost")]
    DeviceLost,
}

impl HostError {
    /// Stable name of the failure class, used to report each class once.
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::Readback { .. } => "readback",
            HostError::Resolve { .. } => "resolve",
            HostError::BufferMap(_) => "buffer-map",
            HostError::FramebufferCreation { .. } => "framebuffer-creation",
            HostError::NoFramebuffers => "no-framebuffers",
            HostError::UnknownTexture(_) => "unknown-texture",
            HostError::Present(_) => "present",
            HostError::DeviceLost => "device-lost",
        }
    }
}

/// Fatal start-up failures. The renderer does not start.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InitError {
    #[error(
        "the default framebuffer is multisampled ({samples} samples); disable forced antialiasing in the driver settings"
    )]
    MultisampledDefaultFramebuffer { samples: u32 },
    #[error("buggy GPU driver detected; install the vendor driver or update Mesa")]
    BrokenUniformBuffers,
    #[error("initial framebuffer creation failed: {0}")]
    Framebuffer(#[from] HostError),
}
