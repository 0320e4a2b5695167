//! OS camera subsystem and generic capture backends (nokhwa).
//!
//! Both backends run the device on a background thread that keeps the latest
//! frame in a shared buffer; the camera object never leaves that thread.
//! Built only with the `native-camera` feature. Without it the providers
//! report themselves unavailable so the selector moves on.

use super::backend::{BackendProvider, FrameSource};
use super::types::{BackendKind, CameraError, CameraSelector, CameraSettings, Resolution};

#[cfg_attr(not(feature = "native-camera"), allow(dead_code))]
pub struct NativeProvider {
    kind: BackendKind,
    resolution: Resolution,
    fps: u32,
}

impl NativeProvider {
    /// Platform-native API (V4L2, AVFoundation, MediaFoundation).
    pub fn os_subsystem(settings: &CameraSettings) -> Self {
        Self {
            kind: BackendKind::OsSubsystem,
            resolution: settings.resolution,
            fps: settings.fps,
        }
    }

    /// Whatever API nokhwa picks, with format negotiation fallbacks.
    pub fn generic(settings: &CameraSettings) -> Self {
        Self {
            kind: BackendKind::GenericCapture,
            resolution: settings.resolution,
            fps: settings.fps,
        }
    }
}

#[cfg(not(feature = "native-camera"))]
impl BackendProvider for NativeProvider {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(&self, _selector: CameraSelector) -> Result<Box<dyn FrameSource>, CameraError> {
        Err(CameraError::BackendUnavailable {
            kind: self.kind,
            reason: "built without the native-camera feature".to_string(),
        })
    }
}

#[cfg(feature = "native-camera")]
pub use enabled::list_devices;

#[cfg(feature = "native-camera")]
mod enabled {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat as NokhwaFrameFormat, RequestedFormat,
        RequestedFormatType,
    };
    use nokhwa::Camera;

    use super::super::backend::{BackendProvider, FrameSource};
    use super::super::types::{
        BackendKind, CameraError, CameraInfo, CameraSelector, Frame, Resolution,
    };
    use super::NativeProvider;
    use crate::imaging::FrameFormat;

    /// Shared slot the capture thread writes into.
    type FrameSlot = Arc<Mutex<Option<(u64, Frame)>>>;

    /// List all available camera devices on the system.
    pub fn list_devices() -> Result<Vec<CameraInfo>, CameraError> {
        let devices = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| CameraError::QueryFailed(e.to_string()))?;

        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name(),
                description: d.description().to_string(),
            })
            .collect())
    }

    fn platform_api() -> ApiBackend {
        if cfg!(target_os = "linux") {
            ApiBackend::Video4Linux
        } else if cfg!(target_os = "macos") {
            ApiBackend::AVFoundation
        } else if cfg!(target_os = "windows") {
            ApiBackend::MediaFoundation
        } else {
            ApiBackend::Auto
        }
    }

    impl BackendProvider for NativeProvider {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn open(&self, selector: CameraSelector) -> Result<Box<dyn FrameSource>, CameraError> {
            let api = match self.kind {
                BackendKind::OsSubsystem => platform_api(),
                _ => ApiBackend::Auto,
            };
            NativeSource::start(self.kind, api, selector, self.resolution, self.fps)
                .map(|s| Box::new(s) as Box<dyn FrameSource>)
        }
    }

    struct NativeSource {
        kind: BackendKind,
        buffer: FrameSlot,
        last_seq: u64,
        capture_thread: Option<JoinHandle<()>>,
        stop_signal: Arc<AtomicBool>,
    }

    impl NativeSource {
        fn start(
            kind: BackendKind,
            api: ApiBackend,
            selector: CameraSelector,
            resolution: Resolution,
            fps: u32,
        ) -> Result<Self, CameraError> {
            let buffer: FrameSlot = Arc::new(Mutex::new(None));
            let stop_signal = Arc::new(AtomicBool::new(false));
            let (info_tx, info_rx) = mpsc::channel::<Result<(), CameraError>>();

            let handle = {
                let buffer = Arc::clone(&buffer);
                let stop = Arc::clone(&stop_signal);
                thread::spawn(move || {
                    run_capture_loop(kind, api, selector, resolution, fps, buffer, stop, info_tx)
                })
            };

            // Wait for the thread to report success or failure
            let outcome = match info_rx.recv() {
                Ok(result) => result,
                Err(_) => Err(CameraError::OpenFailed {
                    kind,
                    selector,
                    reason: "capture thread terminated unexpectedly".to_string(),
                }),
            };

            match outcome {
                Ok(()) => Ok(Self {
                    kind,
                    buffer,
                    last_seq: 0,
                    capture_thread: Some(handle),
                    stop_signal,
                }),
                Err(e) => {
                    stop_signal.store(true, Ordering::SeqCst);
                    let _ = handle.join();
                    Err(e)
                }
            }
        }
    }

    impl FrameSource for NativeSource {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn poll_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            let slot = self
                .buffer
                .lock()
                .map_err(|_| CameraError::FrameFailed("frame buffer poisoned".to_string()))?;
            match slot.as_ref() {
                Some((seq, frame)) if *seq > self.last_seq => {
                    self.last_seq = *seq;
                    Ok(Some(frame.clone()))
                }
                _ => Ok(None),
            }
        }

        fn release(&mut self) -> Result<(), CameraError> {
            self.stop_signal.store(true, Ordering::SeqCst);
            if let Some(handle) = self.capture_thread.take() {
                handle
                    .join()
                    .map_err(|_| CameraError::FrameFailed("capture thread panicked".to_string()))?;
            }
            Ok(())
        }
    }

    impl Drop for NativeSource {
        fn drop(&mut self) {
            let _ = self.release();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_capture_loop(
        kind: BackendKind,
        api: ApiBackend,
        selector: CameraSelector,
        resolution: Resolution,
        fps: u32,
        buffer: FrameSlot,
        stop: Arc<AtomicBool>,
        info_tx: Sender<Result<(), CameraError>>,
    ) {
        let index = CameraIndex::Index(selector.index);

        let mut camera = match open_camera_with_fallback(kind, api, &index, selector, resolution, fps) {
            Ok(cam) => cam,
            Err(e) => {
                let _ = info_tx.send(Err(e));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            let _ = info_tx.send(Err(CameraError::OpenFailed {
                kind,
                selector,
                reason: e.to_string(),
            }));
            return;
        }

        log::info!(
            "{} opened {} at {}x{} @ {}fps",
            kind,
            selector,
            camera.resolution().width(),
            camera.resolution().height(),
            camera.frame_rate()
        );
        let _ = info_tx.send(Ok(()));

        let mut seq = 0u64;
        while !stop.load(Ordering::Relaxed) {
            if let Ok(raw_frame) = camera.frame() {
                // Frames that fail to convert are skipped.
                if let Some(frame) = convert_to_rgb(&raw_frame) {
                    seq += 1;
                    if let Ok(mut slot) = buffer.lock() {
                        *slot = Some((seq, frame));
                    }
                }
            }
            thread::sleep(Duration::from_millis(1));
        }

        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop {} stream: {}", kind, e);
        }
    }

    /// Try to open a camera with multiple format fallback strategies.
    fn open_camera_with_fallback(
        kind: BackendKind,
        api: ApiBackend,
        index: &CameraIndex,
        selector: CameraSelector,
        resolution: Resolution,
        fps: u32,
    ) -> Result<Camera, CameraError> {
        let wanted = nokhwa::utils::Resolution::new(resolution.width, resolution.height);
        // NV12 (native on macOS), then MJPEG, then whatever the camera prefers.
        let format_attempts = [
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
                wanted,
                NokhwaFrameFormat::NV12,
                fps,
            ))),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
                wanted,
                NokhwaFrameFormat::MJPEG,
                fps,
            ))),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution),
        ];

        let mut last_error = None;
        for requested in format_attempts {
            match Camera::with_backend(index.clone(), requested, api) {
                Ok(cam) => return Ok(cam),
                Err(e) => last_error = Some(e),
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no format accepted".to_string());
        let lower = reason.to_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("authorization") {
            Err(CameraError::PermissionDenied)
        } else {
            Err(CameraError::OpenFailed {
                kind,
                selector,
                reason,
            })
        }
    }

    /// Convert a nokhwa buffer to our RGB Frame format.
    fn convert_to_rgb(buffer: &nokhwa::Buffer) -> Option<Frame> {
        let decoded = buffer.decode_image::<RgbFormat>().ok()?;
        let resolution = buffer.resolution();

        Some(Frame {
            data: decoded.into_raw(),
            width: resolution.width(),
            height: resolution.height(),
            format: FrameFormat::Rgb,
            timestamp: Instant::now(),
        })
    }
}
