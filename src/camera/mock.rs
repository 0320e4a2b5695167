//! Scripted camera backend for tests and demos.
//!
//! A [`MockProvider`] opens or fails according to its [`MockBehavior`], and
//! records every open and release in a shared [`MockDeviceLog`] so callers
//! can check that no device handle is leaked.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::backend::{BackendProvider, FrameSource};
use super::types::{BackendKind, CameraError, CameraSelector, Frame};
use crate::imaging::FrameFormat;

/// What a mock backend does when asked.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// `Some(reason)` makes `open` fail
    pub open_error: Option<String>,
    /// Number of preview frames delivered before the source runs dry
    pub frames: usize,
    /// Whether the backend offers a dedicated still path
    pub supports_still: bool,
    /// `Some(reason)` makes the dedicated still capture fail
    pub still_error: Option<String>,
    /// `Some(reason)` makes `release` report an error (the device is still freed)
    pub release_error: Option<String>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            open_error: None,
            frames: usize::MAX,
            supports_still: false,
            still_error: None,
            release_error: None,
        }
    }
}

impl MockBehavior {
    pub fn failing(reason: &str) -> Self {
        Self {
            open_error: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

/// Shared record of mock device activity.
#[derive(Debug, Default)]
pub struct MockDeviceLog {
    /// Backend kinds in the order `open` was attempted
    pub attempts: Vec<BackendKind>,
    pub opened: usize,
    pub released: usize,
    /// Sources currently holding a device
    pub active: usize,
    pub preview_stops: usize,
    pub stills: usize,
}

pub type SharedMockLog = Arc<Mutex<MockDeviceLog>>;

pub fn new_log() -> SharedMockLog {
    Arc::new(Mutex::new(MockDeviceLog::default()))
}

fn record(log: &SharedMockLog, f: impl FnOnce(&mut MockDeviceLog)) {
    if let Ok(mut log) = log.lock() {
        f(&mut log);
    }
}

/// Build a solid test frame whose first pixel encodes `marker`.
pub fn test_frame(width: u32, height: u32, marker: u8) -> Frame {
    let mut data = vec![0u8; (width * height * 3) as usize];
    if let Some(first) = data.first_mut() {
        *first = marker;
    }
    Frame {
        data,
        width,
        height,
        format: FrameFormat::Rgb,
        timestamp: Instant::now(),
    }
}

pub struct MockProvider {
    kind: BackendKind,
    behavior: MockBehavior,
    log: SharedMockLog,
}

impl MockProvider {
    pub fn new(kind: BackendKind, behavior: MockBehavior, log: SharedMockLog) -> Self {
        Self {
            kind,
            behavior,
            log,
        }
    }

    pub fn working(kind: BackendKind, log: SharedMockLog) -> Self {
        Self::new(kind, MockBehavior::default(), log)
    }

    pub fn failing(kind: BackendKind, reason: &str, log: SharedMockLog) -> Self {
        Self::new(kind, MockBehavior::failing(reason), log)
    }
}

impl BackendProvider for MockProvider {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(&self, selector: CameraSelector) -> Result<Box<dyn FrameSource>, CameraError> {
        record(&self.log, |l| l.attempts.push(self.kind));
        if let Some(reason) = &self.behavior.open_error {
            return Err(CameraError::OpenFailed {
                kind: self.kind,
                selector,
                reason: reason.clone(),
            });
        }
        record(&self.log, |l| {
            l.opened += 1;
            l.active += 1;
        });
        Ok(Box::new(MockSource {
            kind: self.kind,
            behavior: self.behavior.clone(),
            log: Arc::clone(&self.log),
            delivered: 0,
            previewing: true,
            released: false,
        }))
    }
}

struct MockSource {
    kind: BackendKind,
    behavior: MockBehavior,
    log: SharedMockLog,
    delivered: usize,
    previewing: bool,
    released: bool,
}

impl FrameSource for MockSource {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.released {
            return Err(CameraError::NotOpen);
        }
        if !self.previewing || self.delivered >= self.behavior.frames {
            return Ok(None);
        }
        self.delivered += 1;
        Ok(Some(test_frame(4, 3, (self.delivered % 256) as u8)))
    }

    fn capture_still(&mut self) -> Result<Option<Frame>, CameraError> {
        record(&self.log, |l| l.stills += 1);
        if self.previewing {
            // The manager must stop preview before asking for a still.
            return Err(CameraError::CaptureFailed(
                "still requested while preview running".to_string(),
            ));
        }
        if let Some(reason) = &self.behavior.still_error {
            return Err(CameraError::CaptureFailed(reason.clone()));
        }
        if !self.behavior.supports_still {
            return Ok(None);
        }
        Ok(Some(test_frame(8, 6, 255)))
    }

    fn stop_preview(&mut self) {
        self.previewing = false;
        record(&self.log, |l| l.preview_stops += 1);
    }

    fn resume_preview(&mut self) {
        self.previewing = true;
    }

    fn release(&mut self) -> Result<(), CameraError> {
        if self.released {
            return Err(CameraError::NotOpen);
        }
        self.released = true;
        record(&self.log, |l| {
            l.released += 1;
            l.active -= 1;
        });
        match &self.behavior.release_error {
            Some(reason) => Err(CameraError::FrameFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.release();
        }
    }
}
