//! Integration tests for the EFB translation layer
//!
//! Drives a [`Renderer`](crate::Renderer) over the software host through
//! peek/poke, blending, orientation, stereo, capture and resize scenarios.

#[cfg(test)]
mod blend_tests;
#[cfg(test)]
mod orientation_tests;
#[cfg(test)]
mod peek_poke_tests;

#[cfg(test)]
pub(crate) mod test_utils {
    use efbridge_shared::HostOrigin;

    use crate::capabilities::HostCapabilities;
    use crate::config::VideoConfig;
    use crate::host::SoftwareHost;
    use crate::presenter::{PresentOutcome, PresentRequest};
    use crate::renderer::Renderer;

    pub use crate::test_utils::*;

    /// Renderer over a 640x528 software host.
    pub fn new_renderer(origin: HostOrigin, config: VideoConfig) -> Renderer<SoftwareHost> {
        new_renderer_with(test_caps(origin), config, 640, 528)
    }

    pub fn new_renderer_with(
        caps: HostCapabilities,
        config: VideoConfig,
        width: u32,
        height: u32,
    ) -> Renderer<SoftwareHost> {
        let host = SoftwareHost::new(caps.origin, width, height).recording();
        Renderer::new(host, caps, config).unwrap()
    }

    /// Presents the whole EFB as a 640x528 frame.
    pub fn present_full(renderer: &mut Renderer<SoftwareHost>) -> PresentOutcome {
        renderer.present(&PresentRequest::full_frame(640, 528))
    }
}
