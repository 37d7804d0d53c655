//! User-facing diagnostics.
//!
//! Capability downgrades and resource failures are surfaced as on-screen
//! notices, each at most once per renderer lifetime, and mirrored to the
//! `tracing` log.

use std::time::Duration;

use hashbrown::HashSet;

use crate::error::HostError;

/// How long a notice stays on screen.
pub const NOTICE_DURATION: Duration = Duration::from_secs(10);

/// A capability the host lacks, handled by a silent downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Degradation {
    /// Destination alpha falls back to single-source blending.
    DualSourceUnavailable,
    LogicOpUnavailable,
    /// Cull mode 3 culls nothing instead of everything.
    CullAllUnsupported,
    FloatViewportUnavailable,
    MsaaClamped { requested: u32, max: u32 },
    SampleShadingUnavailable,
    StereoUnavailable,
}

impl Degradation {
    fn key(&self) -> &'static str {
        match self {
            Degradation::DualSourceUnavailable => "dual-source",
            Degradation::LogicOpUnavailable => "logic-op",
            Degradation::CullAllUnsupported => "cull-all",
            Degradation::FloatViewportUnavailable => "float-viewport",
            Degradation::MsaaClamped { .. } => "msaa-clamped",
            Degradation::SampleShadingUnavailable => "sample-shading",
            Degradation::StereoUnavailable => "stereo",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Degradation::DualSourceUnavailable => {
                "Dual-source blending is not supported; destination alpha is approximated".into()
            }
            Degradation::LogicOpUnavailable => {
                "Logic operations are not supported by this GPU".into()
            }
            Degradation::CullAllUnsupported => "Cull-all mode is not supported".into(),
            Degradation::FloatViewportUnavailable => {
                "Sub-pixel viewports are not supported; viewports are rounded".into()
            }
            Degradation::MsaaClamped { requested, max } => format!(
                "{requested}x multisampling is not supported, using {max}x instead"
            ),
            Degradation::SampleShadingUnavailable => {
                "Supersampling needs sample shading; falling back to multisampling".into()
            }
            Degradation::StereoUnavailable => {
                "Stereoscopic 3D is not supported by this GPU; stereo disabled".into()
            }
        }
    }
}

/// One message queued for the on-screen display.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub message: String,
    pub duration: Duration,
}

/// Deduplicating collector of notices.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reported: HashSet<String>,
    pending: Vec<Notice>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a capability downgrade. Returns `true` the first time.
    pub fn degrade(&mut self, degradation: Degradation) -> bool {
        if !self.reported.insert(degradation.key().to_string()) {
            return false;
        }
        let message = degradation.message();
        tracing::warn!("{}", message);
        self.push(message);
        true
    }

    /// Records a resource failure in `context`. Returns `true` the first
    /// time this context fails with this kind of error.
    pub fn resource_failure(&mut self, context: &str, error: &HostError) -> bool {
        let key = format!("{}:{}", context, error.kind());
        if !self.reported.insert(key) {
            tracing::trace!("{} failed again: {}", context, error);
            return false;
        }
        tracing::error!("{} failed: {}", context, error);
        self.push(format!("{} failed: {}", context, error));
        true
    }

    /// Queues a message unconditionally.
    pub fn notify(&mut self, message: impl Into<String>) {
        self.push(message.into());
    }

    pub fn has_degraded(&self, degradation: Degradation) -> bool {
        self.reported.contains(degradation.key())
    }

    /// Takes every notice queued since the last call.
    pub fn drain(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.pending)
    }

    fn push(&mut self, message: String) {
        self.pending.push(Notice {
            message,
            duration: NOTICE_DURATION,
        });
    }
}
