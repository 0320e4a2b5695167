//! Capture lifecycle manager.
//!
//! Owns the single active [`FrameSource`], picks it from a ranked list of
//! backend providers, and sequences preview, still capture and release.

use std::time::Duration;

use super::backend::{providers_for, BackendProvider, FrameSource};
use super::types::{
    BackendFailure, CameraError, CameraHandle, CameraSelector, CameraSettings, CaptureState,
    Fidelity, Frame,
};

/// Sole owner of the active camera device.
///
/// State flows `Idle -> Opening -> Previewing -> (Capturing -> Previewing | Closed)`,
/// with `Opening -> Closed` when no backend opens. Every transition into
/// `Closed` releases the device.
pub struct CaptureManager {
    providers: Vec<Box<dyn BackendProvider>>,
    source: Option<Box<dyn FrameSource>>,
    selector: Option<CameraSelector>,
    state: CaptureState,
    preview_active: bool,
    latest: Option<Frame>,
}

impl std::fmt::Debug for CaptureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureManager")
            .field("state", &self.state)
            .field("handle", &self.handle())
            .finish_non_exhaustive()
    }
}

impl CaptureManager {
    /// Create a manager over providers in priority order.
    pub fn new(providers: Vec<Box<dyn BackendProvider>>) -> Self {
        Self {
            providers,
            source: None,
            selector: None,
            state: CaptureState::Idle,
            preview_active: false,
            latest: None,
        }
    }

    /// Create a manager over the backends named in `settings`.
    pub fn from_settings(settings: &CameraSettings) -> Self {
        Self::new(providers_for(settings))
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Handle of the active device, if one is open.
    pub fn handle(&self) -> Option<CameraHandle> {
        let source = self.source.as_ref()?;
        let selector = self.selector?;
        Some(CameraHandle {
            backend_kind: source.kind(),
            selector,
            is_running: self.preview_active,
        })
    }

    /// Open `selector` with the first backend that initializes.
    ///
    /// Any active device is released first. Backend failures are logged and
    /// the next backend is tried. Each backend may block up to its init
    /// timeout while waiting for a first frame.
    ///
    /// # Errors
    /// * `CameraError::NoCameraAvailable` - If every backend failed; carries each backend's reason
    pub fn open(&mut self, selector: CameraSelector) -> Result<CameraHandle, CameraError> {
        self.close();
        self.state = CaptureState::Opening;

        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.open(selector) {
                Ok(source) => {
                    log::info!("Opened {} with {} backend", selector, provider.kind());
                    self.source = Some(source);
                    self.selector = Some(selector);
                    self.state = CaptureState::Previewing;
                    self.preview_active = true;
                    return Ok(CameraHandle {
                        backend_kind: provider.kind(),
                        selector,
                        is_running: true,
                    });
                }
                Err(e) => {
                    log::warn!("Backend {} could not open {}: {}", provider.kind(), selector, e);
                    failures.push(BackendFailure {
                        kind: provider.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.state = CaptureState::Closed;
        Err(CameraError::NoCameraAvailable { failures })
    }

    /// Interval the preview timer should tick at, while previewing.
    pub fn preview_interval(&self) -> Option<Duration> {
        if !self.preview_active {
            return None;
        }
        self.source.as_ref().map(|s| s.preview_interval())
    }

    /// One preview timer tick.
    ///
    /// Returns the newest frame if one arrived since the last tick. Read
    /// errors are logged and leave the previous frame in place.
    pub fn poll_preview(&mut self) -> Option<&Frame> {
        if !self.preview_active {
            return None;
        }
        let source = self.source.as_mut()?;
        match source.poll_frame() {
            Ok(Some(frame)) => {
                self.latest = Some(frame);
                self.latest.as_ref()
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Preview frame from {} failed: {}", source.kind(), e);
                None
            }
        }
    }

    /// Most recent preview frame.
    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest.as_ref()
    }

    /// Take a still image.
    ///
    /// Preview polling stops before the device is queried. On success the
    /// device is released and the manager is `Closed`; on failure preview
    /// resumes and the camera stays open for another attempt. A dedicated
    /// still can block up to the backend's init timeout.
    ///
    /// # Errors
    /// * `CameraError::NotOpen` - If no camera is open
    /// * `CameraError::CaptureFailed` - If no frame could be obtained
    pub fn capture_still(&mut self, fidelity: Fidelity) -> Result<Frame, CameraError> {
        let Some(source) = self.source.as_mut() else {
            return Err(CameraError::NotOpen);
        };

        self.state = CaptureState::Capturing;
        self.preview_active = false;
        source.stop_preview();

        let outcome = match fidelity {
            Fidelity::Preview => self.latest.clone().ok_or_else(|| {
                CameraError::CaptureFailed("no preview frame available yet".to_string())
            }),
            Fidelity::Full => match source.capture_still() {
                Ok(Some(frame)) => Ok(frame),
                Ok(None) => self.latest.clone().ok_or_else(|| {
                    CameraError::CaptureFailed(
                        "backend has no still capture and no preview frame yet".to_string(),
                    )
                }),
                Err(CameraError::CaptureFailed(reason)) => Err(CameraError::CaptureFailed(reason)),
                Err(e) => Err(CameraError::CaptureFailed(e.to_string())),
            },
        };

        match outcome {
            Ok(frame) => {
                log::info!(
                    "Captured {}x{} still ({:?} fidelity)",
                    frame.width,
                    frame.height,
                    fidelity
                );
                self.close();
                Ok(frame)
            }
            Err(e) => {
                log::warn!("{}; resuming preview", e);
                source.resume_preview();
                self.preview_active = true;
                self.state = CaptureState::Previewing;
                Err(e)
            }
        }
    }

    /// Stop preview and release the device. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.preview_active = false;
        self.latest = None;
        self.selector = None;
        if let Some(mut source) = self.source.take() {
            source.stop_preview();
            if let Err(e) = source.release() {
                log::warn!("Error releasing {} camera: {}", source.kind(), e);
            } else {
                log::debug!("Released {} camera", source.kind());
            }
        }
        if self.state != CaptureState::Idle {
            self.state = CaptureState::Closed;
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::{new_log, MockBehavior, MockProvider};
    use crate::camera::types::BackendKind;

    fn manager(providers: Vec<MockProvider>) -> CaptureManager {
        CaptureManager::new(
            providers
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn BackendProvider>)
                .collect(),
        )
    }

    #[test]
    fn test_new_manager_is_idle() {
        let log = new_log();
        let m = manager(vec![MockProvider::working(BackendKind::DedicatedModule, log)]);
        assert_eq!(m.state(), CaptureState::Idle);
        assert!(m.handle().is_none());
        assert!(m.preview_interval().is_none());
    }

    #[test]
    fn test_open_uses_first_working_backend() {
        let log = new_log();
        let mut m = manager(vec![
            MockProvider::failing(BackendKind::DedicatedModule, "no module", log.clone()),
            MockProvider::working(BackendKind::OsSubsystem, log.clone()),
            MockProvider::working(BackendKind::GenericCapture, log.clone()),
        ]);

        let handle = m.open(CameraSelector::new(0)).unwrap();
        assert_eq!(handle.backend_kind, BackendKind::OsSubsystem);
        assert!(handle.is_running);
        assert_eq!(m.state(), CaptureState::Previewing);
        assert_eq!(
            log.lock().unwrap().attempts,
            vec![BackendKind::DedicatedModule, BackendKind::OsSubsystem]
        );
    }

    #[test]
    fn test_open_all_failing() {
        let log = new_log();
        let mut m = manager(vec![
            MockProvider::failing(BackendKind::DedicatedModule, "a", log.clone()),
            MockProvider::failing(BackendKind::ExternalProcess, "b", log.clone()),
        ]);

        match m.open(CameraSelector::new(1)) {
            Err(CameraError::NoCameraAvailable { failures }) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[1].kind, BackendKind::ExternalProcess);
            }
            other => panic!("Expected NoCameraAvailable, got {:?}", other),
        }
        assert_eq!(m.state(), CaptureState::Closed);
        assert!(m.handle().is_none());
    }

    #[test]
    fn test_preview_interval_follows_backend() {
        let log = new_log();
        let mut m = manager(vec![MockProvider::working(BackendKind::ExternalProcess, log)]);
        m.open(CameraSelector::new(0)).unwrap();
        assert_eq!(m.preview_interval(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_poll_preview_yields_new_frames_only() {
        let log = new_log();
        let behavior = MockBehavior {
            frames: 1,
            ..MockBehavior::default()
        };
        let mut m = manager(vec![MockProvider::new(
            BackendKind::DedicatedModule,
            behavior,
            log,
        )]);
        m.open(CameraSelector::new(0)).unwrap();

        assert!(m.poll_preview().is_some());
        assert!(m.poll_preview().is_none());
        assert!(m.latest_frame().is_some());
    }

    #[test]
    fn test_reopen_releases_previous_device() {
        let log = new_log();
        let mut m = manager(vec![MockProvider::working(BackendKind::DedicatedModule, log.clone())]);
        m.open(CameraSelector::new(0)).unwrap();
        m.open(CameraSelector::new(1)).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.opened, 2);
        assert_eq!(log.released, 1);
        assert_eq!(log.active, 1);
    }

    #[test]
    fn test_capture_preview_fidelity_uses_latest_frame() {
        let log = new_log();
        let mut m = manager(vec![MockProvider::working(BackendKind::GenericCapture, log.clone())]);
        m.open(CameraSelector::new(0)).unwrap();
        let expected = m.poll_preview().cloned().unwrap();

        let frame = m.capture_still(Fidelity::Preview).unwrap();
        assert_eq!(frame.data, expected.data);
        assert_eq!(m.state(), CaptureState::Closed);
        assert_eq!(log.lock().unwrap().active, 0);
    }

    #[test]
    fn test_capture_full_prefers_dedicated_still() {
        let log = new_log();
        let behavior = MockBehavior {
            supports_still: true,
            ..MockBehavior::default()
        };
        let mut m = manager(vec![MockProvider::new(
            BackendKind::DedicatedModule,
            behavior,
            log.clone(),
        )]);
        m.open(CameraSelector::new(0)).unwrap();
        m.poll_preview();

        let frame = m.capture_still(Fidelity::Full).unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        let log = log.lock().unwrap();
        assert_eq!(log.stills, 1);
        assert_eq!(log.preview_stops, 2);
    }

    #[test]
    fn test_capture_full_falls_back_to_preview_frame() {
        let log = new_log();
        let mut m = manager(vec![MockProvider::working(BackendKind::OsSubsystem, log)]);
        m.open(CameraSelector::new(0)).unwrap();
        m.poll_preview();

        let frame = m.capture_still(Fidelity::Full).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
    }

    #[test]
    fn test_failed_capture_resumes_preview() {
        let log = new_log();
        let behavior = MockBehavior {
            still_error: Some("sensor timeout".to_string()),
            ..MockBehavior::default()
        };
        let mut m = manager(vec![MockProvider::new(
            BackendKind::DedicatedModule,
            behavior,
            log.clone(),
        )]);
        m.open(CameraSelector::new(0)).unwrap();

        match m.capture_still(Fidelity::Full) {
            Err(CameraError::CaptureFailed(reason)) => assert_eq!(reason, "sensor timeout"),
            other => panic!("Expected CaptureFailed, got {:?}", other),
        }
        assert_eq!(m.state(), CaptureState::Previewing);
        assert!(m.handle().unwrap().is_running);
        assert!(m.poll_preview().is_some());
        assert_eq!(log.lock().unwrap().active, 1);
    }

    #[test]
    fn test_capture_without_preview_frame_fails() {
        let log = new_log();
        let mut m = manager(vec![MockProvider::working(BackendKind::OsSubsystem, log)]);
        m.open(CameraSelector::new(0)).unwrap();
        assert!(matches!(
            m.capture_still(Fidelity::Preview),
            Err(CameraError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_capture_when_closed() {
        let log = new_log();
        let mut m = manager(vec![MockProvider::working(BackendKind::OsSubsystem, log)]);
        assert!(matches!(
            m.capture_still(Fidelity::Preview),
            Err(CameraError::NotOpen)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let log = new_log();
        let behavior = MockBehavior {
            release_error: Some("device busy".to_string()),
            ..MockBehavior::default()
        };
        let mut m = manager(vec![MockProvider::new(
            BackendKind::DedicatedModule,
            behavior,
            log.clone(),
        )]);
        m.open(CameraSelector::new(0)).unwrap();

        m.close();
        m.close();
        m.close();
        assert_eq!(m.state(), CaptureState::Closed);
        assert!(m.poll_preview().is_none());
        let log = log.lock().unwrap();
        assert_eq!(log.released, 1);
        assert_eq!(log.active, 0);
    }

    #[test]
    fn test_drop_releases_device() {
        let log = new_log();
        {
            let mut m = manager(vec![MockProvider::working(BackendKind::DedicatedModule, log.clone())]);
            m.open(CameraSelector::new(0)).unwrap();
        }
        assert_eq!(log.lock().unwrap().active, 0);
    }
}
