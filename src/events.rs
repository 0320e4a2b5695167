//! Typed application events with per-kind subscribers.
//!
//! The navigation controller emits an [`AppEvent`] for every observable state
//! change. Front-ends register handlers for the kinds they care about;
//! handlers run synchronously on the UI loop, in registration order.

use std::collections::HashMap;

use crate::analysis::{RequestId, ScreeningResult};
use crate::camera::{BackendKind, CameraSelector};
use crate::navigation::Screen;

/// Events that can occur in the kiosk
#[derive(Debug, Clone)]
pub enum AppEvent {
    ScreenChanged { from: Screen, to: Screen },
    CameraOpened {
        backend: BackendKind,
        selector: CameraSelector,
    },
    /// No backend could open the camera; upload is still possible
    CameraUnavailable { reason: String },
    CameraClosed,
    ImageCaptured { width: u32, height: u32 },
    CaptureFailed { reason: String },
    /// An uploaded file could not be decoded
    UploadFailed { reason: String },
    AnalysisStarted { id: RequestId },
    AnalysisCompleted { id: RequestId, result: ScreeningResult },
    AnalysisFailed { id: RequestId, message: String },
    AnnotatedImageReady { id: RequestId, width: u32, height: u32 },
}

/// Discriminant of [`AppEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ScreenChanged,
    CameraOpened,
    CameraUnavailable,
    CameraClosed,
    ImageCaptured,
    CaptureFailed,
    UploadFailed,
    AnalysisStarted,
    AnalysisCompleted,
    AnalysisFailed,
    AnnotatedImageReady,
}

impl AppEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AppEvent::ScreenChanged { .. } => EventKind::ScreenChanged,
            AppEvent::CameraOpened { .. } => EventKind::CameraOpened,
            AppEvent::CameraUnavailable { .. } => EventKind::CameraUnavailable,
            AppEvent::CameraClosed => EventKind::CameraClosed,
            AppEvent::ImageCaptured { .. } => EventKind::ImageCaptured,
            AppEvent::CaptureFailed { .. } => EventKind::CaptureFailed,
            AppEvent::UploadFailed { .. } => EventKind::UploadFailed,
            AppEvent::AnalysisStarted { .. } => EventKind::AnalysisStarted,
            AppEvent::AnalysisCompleted { .. } => EventKind::AnalysisCompleted,
            AppEvent::AnalysisFailed { .. } => EventKind::AnalysisFailed,
            AppEvent::AnnotatedImageReady { .. } => EventKind::AnnotatedImageReady,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            AppEvent::ScreenChanged { from, to } => format!("Screen {} -> {}", from, to),
            AppEvent::CameraOpened { backend, selector } => {
                format!("Opened {} via {}", selector, backend)
            }
            AppEvent::CameraUnavailable { reason } => format!("Camera unavailable: {}", reason),
            AppEvent::CameraClosed => "Camera closed".to_string(),
            AppEvent::ImageCaptured { width, height } => {
                format!("Captured {}x{} image", width, height)
            }
            AppEvent::CaptureFailed { reason } => format!("Capture failed: {}", reason),
            AppEvent::UploadFailed { reason } => format!("Upload failed: {}", reason),
            AppEvent::AnalysisStarted { id } => format!("Analysis {} started", id),
            AppEvent::AnalysisCompleted { id, result } => {
                format!("Analysis {} completed: {}", id, result.label())
            }
            AppEvent::AnalysisFailed { id, message } => {
                format!("Analysis {} failed: {}", id, message)
            }
            AppEvent::AnnotatedImageReady { id, width, height } => {
                format!("Annotated image for {} ready ({}x{})", id, width, height)
            }
        }
    }
}

type Handler = Box<dyn FnMut(&AppEvent) + Send>;

/// Synchronous event bus keyed by [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<Handler>>,
    catch_all: Vec<Handler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one kind of event.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&AppEvent) + Send + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Register a handler for every event.
    pub fn subscribe_all<F>(&mut self, handler: F)
    where
        F: FnMut(&AppEvent) + Send + 'static,
    {
        self.catch_all.push(Box::new(handler));
    }

    /// Deliver `event` to its kind's handlers, then to catch-all handlers.
    /// Returns how many handlers saw it.
    pub fn emit(&mut self, event: &AppEvent) -> usize {
        log::debug!("Event: {}", event.description());

        let mut delivered = 0;
        if let Some(handlers) = self.handlers.get_mut(&event.kind()) {
            for handler in handlers.iter_mut() {
                handler(event);
                delivered += 1;
            }
        }
        for handler in self.catch_all.iter_mut() {
            handler(event);
            delivered += 1;
        }
        delivered
    }

    pub fn has_subscribers(&self) -> bool {
        !self.catch_all.is_empty() || self.handlers.values().any(|h| !h.is_empty())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.handlers.len())
            .field("catch_all", &self.catch_all.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_handlers_receive_only_their_kind() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.subscribe(EventKind::CameraClosed, move |e| {
            sink.lock().unwrap().push(e.kind());
        });

        assert_eq!(bus.emit(&AppEvent::CameraClosed), 1);
        assert_eq!(
            bus.emit(&AppEvent::CaptureFailed {
                reason: "blur".to_string()
            }),
            0
        );
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::CameraClosed]);
    }

    #[test]
    fn test_subscribe_all_sees_everything() {
        let mut bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&count);
        bus.subscribe_all(move |_| *sink.lock().unwrap() += 1);
        bus.subscribe(EventKind::CameraClosed, |_| {});

        assert_eq!(bus.emit(&AppEvent::CameraClosed), 2);
        bus.emit(&AppEvent::ScreenChanged {
            from: Screen::Home,
            to: Screen::Menu,
        });
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_empty_bus() {
        let mut bus = EventBus::new();
        assert!(!bus.has_subscribers());
        assert_eq!(bus.emit(&AppEvent::CameraClosed), 0);
    }

    #[test]
    fn test_description() {
        let event = AppEvent::ScreenChanged {
            from: Screen::Capture,
            to: Screen::Result,
        };
        assert_eq!(event.description(), "Screen capture -> result");
    }
}
