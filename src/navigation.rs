//! Navigation controller.
//!
//! Drives the five-screen screening wizard and owns everything that lives
//! across screens: the screening session, the camera lifecycle manager, the
//! analysis worker and the event bus. The forward flow is strictly linear;
//! each backward step resets only what the screen being left owns.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::analysis::{AnalysisRequest, AnalysisWorker, RequestId, ScreeningResult, WorkerEvent};
use crate::camera::{CameraError, CameraHandle, CaptureManager, Fidelity};
use crate::events::{AppEvent, EventBus};
use crate::imaging::{Frame, ImageError};
use crate::session::{
    CameraSelectors, Gender, Patient, PatientError, ScreeningSession, ScreeningType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    Home,
    Menu,
    PatientData,
    Capture,
    Result,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Home => "home",
            Screen::Menu => "menu",
            Screen::PatientData => "patient-data",
            Screen::Capture => "capture",
            Screen::Result => "result",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    /// The operation is not allowed on the current screen; nothing changed
    #[error("Cannot {action} from the {from} screen")]
    InvalidTransition { from: Screen, action: &'static str },

    #[error(transparent)]
    InvalidPatient(#[from] PatientError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Capture or upload an image first")]
    NoImage,
}

/// Progress of the analysis shown on the result screen.
#[derive(Debug, Clone)]
pub enum AnalysisState {
    Idle,
    Pending(RequestId),
    Completed(ScreeningResult),
    /// User-visible failure message
    Failed(String),
}

pub struct NavigationController {
    screen: Screen,
    session: Option<ScreeningSession>,
    camera: CaptureManager,
    worker: AnalysisWorker,
    selectors: CameraSelectors,
    analysis: AnalysisState,
    annotated_image: Option<Frame>,
    events: EventBus,
}

impl NavigationController {
    pub fn new(camera: CaptureManager, worker: AnalysisWorker, selectors: CameraSelectors) -> Self {
        Self {
            screen: Screen::Home,
            session: None,
            camera,
            worker,
            selectors,
            analysis: AnalysisState::Idle,
            annotated_image: None,
            events: EventBus::new(),
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn session(&self) -> Option<&ScreeningSession> {
        self.session.as_ref()
    }

    pub fn camera_handle(&self) -> Option<CameraHandle> {
        self.camera.handle()
    }

    pub fn analysis(&self) -> &AnalysisState {
        &self.analysis
    }

    pub fn annotated_image(&self) -> Option<&Frame> {
        self.annotated_image.as_ref()
    }

    /// Event bus for registering handlers.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Preview timer interval while the capture screen shows a live camera.
    pub fn preview_interval(&self) -> Option<Duration> {
        if self.screen != Screen::Capture {
            return None;
        }
        self.camera.preview_interval()
    }

    /// One preview timer tick on the capture screen.
    pub fn poll_preview(&mut self) -> Option<&Frame> {
        if self.screen != Screen::Capture {
            return None;
        }
        self.camera.poll_preview()
    }

    /// Home -> Menu
    pub fn start(&mut self) -> Result<(), NavigationError> {
        self.require(Screen::Home, "start")?;
        self.go(Screen::Menu);
        Ok(())
    }

    /// Menu -> Home. Discards the session.
    pub fn back_to_home(&mut self) -> Result<(), NavigationError> {
        self.require(Screen::Menu, "go back home")?;
        self.session = None;
        self.go(Screen::Home);
        Ok(())
    }

    /// Menu -> PatientData with a fresh session.
    pub fn select_screening(&mut self, screening_type: ScreeningType) -> Result<(), NavigationError> {
        self.require(Screen::Menu, "select a screening")?;
        log::info!("Starting {} screening", screening_type);
        self.session = Some(ScreeningSession::new(screening_type));
        self.go(Screen::PatientData);
        Ok(())
    }

    /// PatientData -> Menu. Clears the patient.
    pub fn back_to_menu(&mut self) -> Result<(), NavigationError> {
        self.require(Screen::PatientData, "go back to the menu")?;
        self.close_camera();
        if let Some(session) = self.session.as_mut() {
            session.patient = None;
        }
        self.go(Screen::Menu);
        Ok(())
    }

    /// PatientData -> Capture.
    ///
    /// Validates the patient details, then opens the camera for the screening
    /// type. A camera failure still enters the capture screen (upload remains
    /// possible) and returns `Ok(None)`.
    pub fn submit_patient(
        &mut self,
        name: &str,
        age: u32,
        gender: Gender,
    ) -> Result<Option<CameraHandle>, NavigationError> {
        self.require(Screen::PatientData, "submit patient data")?;
        let patient = Patient::new(name, age, gender)?;
        let Some(session) = self.session.as_mut() else {
            return Err(NavigationError::InvalidTransition {
                from: self.screen,
                action: "submit patient data without a session",
            });
        };
        session.patient = Some(patient);
        session.captured_image = None;
        self.go(Screen::Capture);
        Ok(self.open_camera())
    }

    /// Take a still on the capture screen. A failed capture keeps the preview running.
    pub fn capture(&mut self, fidelity: Fidelity) -> Result<(), NavigationError> {
        self.require(Screen::Capture, "capture")?;
        match self.camera.capture_still(fidelity) {
            Ok(frame) => {
                self.store_image(frame);
                self.events.emit(&AppEvent::CameraClosed);
                Ok(())
            }
            Err(e) => {
                self.events.emit(&AppEvent::CaptureFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Discard the captured image and reopen the camera.
    pub fn retake(&mut self) -> Result<Option<CameraHandle>, NavigationError> {
        self.require(Screen::Capture, "retake")?;
        if let Some(session) = self.session.as_mut() {
            session.captured_image = None;
        }
        Ok(self.open_camera())
    }

    /// Use an image file instead of the camera. The camera is closed first.
    pub fn upload(&mut self, path: &Path) -> Result<(), NavigationError> {
        self.require(Screen::Capture, "upload an image")?;
        self.close_camera();
        match Frame::load(path) {
            Ok(frame) => {
                log::info!("Loaded {} ({}x{})", path.display(), frame.width, frame.height);
                self.store_image(frame);
                Ok(())
            }
            Err(e) => {
                log::warn!("Upload of {} failed: {}", path.display(), e);
                self.events.emit(&AppEvent::UploadFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Capture -> PatientData. Closes the camera and drops the image.
    pub fn back_to_patient(&mut self) -> Result<(), NavigationError> {
        self.require(Screen::Capture, "go back to patient data")?;
        self.close_camera();
        if let Some(session) = self.session.as_mut() {
            session.captured_image = None;
        }
        self.go(Screen::PatientData);
        Ok(())
    }

    /// Capture -> Result. Submits the analysis request.
    pub fn proceed(&mut self) -> Result<RequestId, NavigationError> {
        self.require(Screen::Capture, "proceed to the result")?;
        let request = match self.session.as_ref() {
            Some(ScreeningSession {
                screening_type,
                patient: Some(patient),
                captured_image: Some(image),
            }) => AnalysisRequest {
                screening_type: *screening_type,
                patient: patient.clone(),
                image: image.clone(),
            },
            _ => return Err(NavigationError::NoImage),
        };

        self.close_camera();
        let id = self.worker.submit(request);
        self.analysis = AnalysisState::Pending(id);
        self.annotated_image = None;
        self.go(Screen::Result);
        self.events.emit(&AppEvent::AnalysisStarted { id });
        Ok(id)
    }

    /// Apply a worker event if it belongs to the current request.
    ///
    /// Returns `false` for stale events, which are dropped.
    pub fn handle_worker_event(&mut self, event: WorkerEvent) -> bool {
        let id = event.id();
        if self.screen != Screen::Result || !self.worker.is_current(id) {
            log::debug!("Dropping stale analysis event for request {}", id);
            return false;
        }

        match event {
            WorkerEvent::Completed { id, result } => {
                self.analysis = AnalysisState::Completed(result.clone());
                self.events.emit(&AppEvent::AnalysisCompleted { id, result });
            }
            WorkerEvent::Failed { id, error } => {
                let message = error.to_string();
                self.analysis = AnalysisState::Failed(message.clone());
                self.events.emit(&AppEvent::AnalysisFailed { id, message });
            }
            WorkerEvent::AnnotatedImage { id, image } => {
                let (width, height) = (image.width, image.height);
                self.annotated_image = Some(image);
                self.events
                    .emit(&AppEvent::AnnotatedImageReady { id, width, height });
            }
        }
        true
    }

    /// Result -> Home. The outstanding request keeps running but its response is ignored.
    pub fn go_home(&mut self) -> Result<(), NavigationError> {
        self.require(Screen::Result, "go home")?;
        self.worker.invalidate();
        self.session = None;
        self.analysis = AnalysisState::Idle;
        self.annotated_image = None;
        self.go(Screen::Home);
        Ok(())
    }

    /// Release the camera and stop the worker. Valid from any screen.
    pub async fn shutdown(&mut self) {
        log::info!("Shutting down from the {} screen", self.screen);
        self.close_camera();
        self.worker.shutdown().await;
    }

    fn require(&self, expected: Screen, action: &'static str) -> Result<(), NavigationError> {
        if self.screen == expected {
            Ok(())
        } else {
            Err(NavigationError::InvalidTransition {
                from: self.screen,
                action,
            })
        }
    }

    fn go(&mut self, to: Screen) {
        let from = self.screen;
        self.screen = to;
        log::debug!("Screen {} -> {}", from, to);
        self.events.emit(&AppEvent::ScreenChanged { from, to });
    }

    fn open_camera(&mut self) -> Option<CameraHandle> {
        let screening_type = self.session.as_ref()?.screening_type;
        let selector = self.selectors.for_type(screening_type);
        match self.camera.open(selector) {
            Ok(handle) => {
                self.events.emit(&AppEvent::CameraOpened {
                    backend: handle.backend_kind,
                    selector,
                });
                Some(handle)
            }
            Err(e) => {
                log::error!("{}", e);
                self.events.emit(&AppEvent::CameraUnavailable {
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn close_camera(&mut self) {
        if self.camera.handle().is_some() {
            self.camera.close();
            self.events.emit(&AppEvent::CameraClosed);
        }
    }

    fn store_image(&mut self, frame: Frame) {
        let (width, height) = (frame.width, frame.height);
        if let Some(session) = self.session.as_mut() {
            session.captured_image = Some(frame);
        }
        self.events
            .emit(&AppEvent::ImageCaptured { width, height });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisClient;
    use crate::camera::mock::{new_log, MockProvider, SharedMockLog};
    use crate::camera::{BackendKind, BackendProvider};
    use crate::events::EventKind;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    fn controller(providers: Vec<MockProvider>) -> NavigationController {
        let camera = CaptureManager::new(
            providers
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn BackendProvider>)
                .collect(),
        );
        let client = AnalysisClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = AnalysisWorker::spawn(client, tx);
        NavigationController::new(camera, worker, CameraSelectors::default())
    }

    fn working(log: &SharedMockLog) -> NavigationController {
        controller(vec![MockProvider::working(
            BackendKind::DedicatedModule,
            log.clone(),
        )])
    }

    async fn at_capture(nav: &mut NavigationController) {
        nav.start().unwrap();
        nav.select_screening(ScreeningType::Anemia).unwrap();
        nav.submit_patient("Budi Santoso", 34, Gender::Male).unwrap();
    }

    #[tokio::test]
    async fn test_forward_flow_screens() {
        let log = new_log();
        let mut nav = working(&log);
        assert_eq!(nav.screen(), Screen::Home);

        nav.start().unwrap();
        assert_eq!(nav.screen(), Screen::Menu);
        nav.select_screening(ScreeningType::DiabeticRetinopathy).unwrap();
        assert_eq!(nav.screen(), Screen::PatientData);

        let handle = nav
            .submit_patient("Siti Aminah", 51, Gender::Female)
            .unwrap()
            .unwrap();
        assert_eq!(nav.screen(), Screen::Capture);
        assert_eq!(handle.selector.index, 1);

        nav.poll_preview();
        nav.capture(Fidelity::Preview).unwrap();
        assert!(nav.session().unwrap().captured_image.is_some());
        assert!(nav.camera_handle().is_none());

        nav.proceed().unwrap();
        assert_eq!(nav.screen(), Screen::Result);
        assert!(matches!(nav.analysis(), AnalysisState::Pending(_)));
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_transition_changes_nothing() {
        let log = new_log();
        let mut nav = working(&log);

        let err = nav.proceed().unwrap_err();
        assert!(matches!(
            err,
            NavigationError::InvalidTransition {
                from: Screen::Home,
                ..
            }
        ));
        assert!(nav.select_screening(ScreeningType::Anemia).is_err());
        assert!(nav.go_home().is_err());
        assert_eq!(nav.screen(), Screen::Home);
        assert!(nav.session().is_none());
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_patient_stays_on_form() {
        let log = new_log();
        let mut nav = working(&log);
        nav.start().unwrap();
        nav.select_screening(ScreeningType::Anemia).unwrap();

        let err = nav.submit_patient("Al", 30, Gender::Male).unwrap_err();
        assert!(matches!(
            err,
            NavigationError::InvalidPatient(PatientError::NameTooShort)
        ));
        assert_eq!(nav.screen(), Screen::PatientData);
        assert_eq!(log.lock().unwrap().opened, 0);
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_camera_failure_still_enters_capture() {
        let log = new_log();
        let mut nav = controller(vec![MockProvider::failing(
            BackendKind::DedicatedModule,
            "no module",
            log.clone(),
        )]);
        let unavailable = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&unavailable);
        nav.events_mut()
            .subscribe(EventKind::CameraUnavailable, move |_| *sink.lock().unwrap() += 1);

        nav.start().unwrap();
        nav.select_screening(ScreeningType::Malnutrition).unwrap();
        let handle = nav.submit_patient("Budi Santoso", 34, Gender::Male).unwrap();
        assert!(handle.is_none());
        assert_eq!(nav.screen(), Screen::Capture);
        assert_eq!(*unavailable.lock().unwrap(), 1);
        assert!(matches!(
            nav.capture(Fidelity::Preview),
            Err(NavigationError::Camera(CameraError::NotOpen))
        ));
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_back_to_patient_releases_camera() {
        let log = new_log();
        let mut nav = working(&log);
        at_capture(&mut nav).await;
        assert_eq!(log.lock().unwrap().active, 1);

        nav.back_to_patient().unwrap();
        assert_eq!(nav.screen(), Screen::PatientData);
        assert_eq!(log.lock().unwrap().active, 0);
        assert!(nav.session().unwrap().patient.is_some());

        nav.back_to_menu().unwrap();
        assert!(nav.session().unwrap().patient.is_none());
        nav.back_to_home().unwrap();
        assert!(nav.session().is_none());
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_retake_reopens_camera() {
        let log = new_log();
        let mut nav = working(&log);
        at_capture(&mut nav).await;
        nav.poll_preview();
        nav.capture(Fidelity::Preview).unwrap();

        let handle = nav.retake().unwrap();
        assert!(handle.is_some());
        assert!(nav.session().unwrap().captured_image.is_none());
        let log_state = log.lock().unwrap();
        assert_eq!(log_state.opened, 2);
        assert_eq!(log_state.active, 1);
        drop(log_state);
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_proceed_requires_image() {
        let log = new_log();
        let mut nav = working(&log);
        at_capture(&mut nav).await;

        assert!(matches!(nav.proceed(), Err(NavigationError::NoImage)));
        assert_eq!(nav.screen(), Screen::Capture);
        assert!(nav.camera_handle().is_some());
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_upload_bad_file_is_recoverable() {
        let log = new_log();
        let mut nav = working(&log);
        at_capture(&mut nav).await;

        let err = nav.upload(Path::new("/nonexistent/eye.png")).unwrap_err();
        assert!(matches!(err, NavigationError::Image(_)));
        assert_eq!(nav.screen(), Screen::Capture);
        assert!(nav.camera_handle().is_none());
        assert!(nav.retake().unwrap().is_some());
        nav.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_camera() {
        let log = new_log();
        let mut nav = working(&log);
        at_capture(&mut nav).await;

        nav.shutdown().await;
        nav.shutdown().await;
        assert_eq!(log.lock().unwrap().active, 0);
    }
}
