//! Backend abstraction: a ranked list of providers, each able to open a
//! [`FrameSource`] for a camera selector.

use std::time::Duration;

use super::helper::HelperProvider;
use super::native::NativeProvider;
use super::rpicam::RpicamProvider;
use super::types::{BackendKind, CameraError, CameraSelector, CameraSettings, Frame};

/// An opened camera device.
///
/// The lifecycle manager is the only owner of a source. Sources are polled
/// from the UI loop; any background work (reader threads, helper processes)
/// is the source's own business and must end in [`FrameSource::release`].
pub trait FrameSource: Send {
    fn kind(&self) -> BackendKind;

    /// How often the preview timer should poll this source.
    fn preview_interval(&self) -> Duration {
        self.kind().preview_interval()
    }

    /// Newest frame since the last call, or `None` if nothing new arrived.
    fn poll_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Dedicated still capture. `Ok(None)` means the backend has no still
    /// path and the caller should fall back to the latest preview frame.
    fn capture_still(&mut self) -> Result<Option<Frame>, CameraError> {
        Ok(None)
    }

    /// Stop producing preview frames. The device stays held until `release`.
    fn stop_preview(&mut self) {}

    /// Undo [`FrameSource::stop_preview`] after a failed still capture.
    fn resume_preview(&mut self) {}

    /// Release the device. Called exactly once by the manager.
    fn release(&mut self) -> Result<(), CameraError>;
}

/// A camera-access strategy that can try to open a device.
pub trait BackendProvider: Send {
    fn kind(&self) -> BackendKind;

    fn open(&self, selector: CameraSelector) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Build one provider per backend kind, preserving the configured order.
pub fn providers_for(settings: &CameraSettings) -> Vec<Box<dyn BackendProvider>> {
    let mut providers: Vec<Box<dyn BackendProvider>> = Vec::with_capacity(settings.backends.len());
    for kind in &settings.backends {
        if providers.iter().any(|p| p.kind() == *kind) {
            log::warn!("Camera backend {} listed twice, ignoring duplicate", kind);
            continue;
        }
        providers.push(provider_for(*kind, settings));
    }
    providers
}

fn provider_for(kind: BackendKind, settings: &CameraSettings) -> Box<dyn BackendProvider> {
    match kind {
        BackendKind::DedicatedModule => Box::new(RpicamProvider::new(settings)),
        BackendKind::OsSubsystem => Box::new(NativeProvider::os_subsystem(settings)),
        BackendKind::GenericCapture => Box::new(NativeProvider::generic(settings)),
        BackendKind::ExternalProcess => Box::new(HelperProvider::new(settings)),
    }
}
