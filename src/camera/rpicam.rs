//! Dedicated camera module backend.
//!
//! Streams MJPEG from `rpicam-vid` on stdout. A reader thread splits the
//! byte stream into complete JPEG images and keeps only the newest one; the
//! UI loop decodes it on the next preview tick.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::backend::{BackendProvider, FrameSource};
use super::types::{BackendKind, CameraError, CameraSelector, CameraSettings, Frame, Resolution};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered stream bytes before we drop the backlog.
const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

/// Latest complete JPEG and its sequence number.
#[derive(Default)]
struct LatestJpeg {
    seq: u64,
    bytes: Option<Vec<u8>>,
}

pub struct RpicamProvider {
    command: String,
    resolution: Resolution,
    fps: u32,
    init_timeout: Duration,
}

impl RpicamProvider {
    pub fn new(settings: &CameraSettings) -> Self {
        Self {
            command: settings.rpicam_command.clone(),
            resolution: settings.resolution,
            fps: settings.fps,
            init_timeout: settings.init_timeout,
        }
    }

    fn args(&self, selector: CameraSelector) -> Vec<String> {
        vec![
            "--camera".to_string(),
            selector.index.to_string(),
            "--width".to_string(),
            self.resolution.width.to_string(),
            "--height".to_string(),
            self.resolution.height.to_string(),
            "--framerate".to_string(),
            self.fps.to_string(),
            "--codec".to_string(),
            "mjpeg".to_string(),
            "--nopreview".to_string(),
            "-t".to_string(),
            "0".to_string(),
            "-o".to_string(),
            "-".to_string(),
        ]
    }
}

impl BackendProvider for RpicamProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::DedicatedModule
    }

    fn open(&self, selector: CameraSelector) -> Result<Box<dyn FrameSource>, CameraError> {
        let mut child = Command::new(&self.command)
            .args(self.args(selector))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    CameraError::BackendUnavailable {
                        kind: BackendKind::DedicatedModule,
                        reason: format!("'{}' not found", self.command),
                    }
                } else {
                    CameraError::OpenFailed {
                        kind: BackendKind::DedicatedModule,
                        selector,
                        reason: e.to_string(),
                    }
                }
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CameraError::OpenFailed {
                kind: BackendKind::DedicatedModule,
                selector,
                reason: "no stdout from camera process".to_string(),
            });
        };

        let latest = Arc::new(Mutex::new(LatestJpeg::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let latest = Arc::clone(&latest);
            let stop = Arc::clone(&stop);
            thread::spawn(move || read_mjpeg_stream(stdout, latest, stop))
        };

        let mut source = RpicamSource {
            child: Some(child),
            reader: Some(reader),
            latest,
            stop,
            last_seq: 0,
            init_timeout: self.init_timeout,
        };

        // The module only counts as open once it actually delivers a frame.
        if let Err(reason) = source.wait_for_frame_after(0, self.init_timeout) {
            let _ = source.release();
            return Err(CameraError::OpenFailed {
                kind: BackendKind::DedicatedModule,
                selector,
                reason,
            });
        }

        log::info!("Camera module {} streaming via {}", selector.index, self.command);
        Ok(Box::new(source))
    }
}

struct RpicamSource {
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    latest: Arc<Mutex<LatestJpeg>>,
    stop: Arc<AtomicBool>,
    last_seq: u64,
    init_timeout: Duration,
}

impl RpicamSource {
    fn current_seq(&self) -> u64 {
        self.latest.lock().map(|l| l.seq).unwrap_or(0)
    }

    /// Block until a frame newer than `seq` exists, the process dies, or the timeout hits.
    fn wait_for_frame_after(&mut self, seq: u64, timeout: Duration) -> Result<(), String> {
        let start = Instant::now();
        loop {
            if self.current_seq() > seq {
                return Ok(());
            }
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(format!("camera process exited with {}", status));
                }
            }
            if start.elapsed() >= timeout {
                return Err(format!("no frame within {:?}", timeout));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn take_newer_jpeg(&mut self) -> Option<Vec<u8>> {
        let latest = self.latest.lock().ok()?;
        if latest.seq <= self.last_seq {
            return None;
        }
        self.last_seq = latest.seq;
        latest.bytes.clone()
    }
}

impl FrameSource for RpicamSource {
    fn kind(&self) -> BackendKind {
        BackendKind::DedicatedModule
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.take_newer_jpeg() {
            Some(jpeg) => Frame::decode(&jpeg)
                .map(Some)
                .map_err(|e| CameraError::FrameFailed(e.to_string())),
            None => Ok(None),
        }
    }

    fn capture_still(&mut self) -> Result<Option<Frame>, CameraError> {
        // Wait for a frame exposed after the capture request, not a stale one.
        let seq = self.current_seq();
        self.wait_for_frame_after(seq, self.init_timeout)
            .map_err(CameraError::CaptureFailed)?;
        self.poll_frame()
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn release(&mut self) -> Result<(), CameraError> {
        self.stop.store(true, Ordering::SeqCst);

        let mut result = Ok(());
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited is fine; anything else is worth reporting.
                if e.kind() != ErrorKind::InvalidInput {
                    result = Err(CameraError::FrameFailed(format!(
                        "failed to stop camera process: {}",
                        e
                    )));
                }
            }
            let _ = child.wait();
        }

        // Killing the child closes the pipe, which ends the reader.
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        result
    }
}

impl Drop for RpicamSource {
    fn drop(&mut self) {
        if self.child.is_some() || self.reader.is_some() {
            let _ = self.release();
        }
    }
}

fn read_mjpeg_stream<R: Read>(mut stream: R, latest: Arc<Mutex<LatestJpeg>>, stop: Arc<AtomicBool>) {
    let mut pending = Vec::with_capacity(256 * 1024);
    let mut chunk = [0u8; 64 * 1024];

    while !stop.load(Ordering::Relaxed) {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("Camera stream read ended: {}", e);
                break;
            }
        };
        pending.extend_from_slice(&chunk[..n]);

        if let Some(jpeg) = extract_latest_jpeg(&mut pending) {
            if let Ok(mut slot) = latest.lock() {
                slot.seq += 1;
                slot.bytes = Some(jpeg);
            }
        }

        if pending.len() > MAX_PENDING_BYTES {
            log::warn!("Dropping {} bytes of unparseable camera stream", pending.len());
            pending.clear();
        }
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker.as_slice())
}

/// Pull every complete JPEG out of `pending` and return the newest one.
///
/// Bytes before the first SOI are discarded; a trailing partial image stays
/// in `pending` for the next read.
pub(crate) fn extract_latest_jpeg(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut newest = None;
    loop {
        let Some(start) = find_marker(pending, SOI) else {
            // Keep a lone trailing 0xFF; it may be the first half of an SOI.
            let keep_from = if pending.last() == Some(&0xFF) {
                pending.len() - 1
            } else {
                pending.len()
            };
            pending.drain(..keep_from);
            break;
        };
        let Some(end) = find_marker(&pending[start + 2..], EOI) else {
            pending.drain(..start);
            break;
        };
        let end = start + 2 + end + 2;
        newest = Some(pending[start..end].to_vec());
        pending.drain(..end);
    }
    newest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fake_jpeg(payload: u8) -> Vec<u8> {
        vec![0xFF, 0xD8, payload, payload, 0xFF, 0xD9]
    }

    #[test]
    fn test_extract_single_frame() {
        let mut pending = fake_jpeg(1);
        let jpeg = extract_latest_jpeg(&mut pending).unwrap();
        assert_eq!(jpeg, fake_jpeg(1));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_extract_keeps_newest_of_several() {
        let mut pending = [fake_jpeg(1), fake_jpeg(2), fake_jpeg(3)].concat();
        assert_eq!(extract_latest_jpeg(&mut pending).unwrap(), fake_jpeg(3));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_extract_leaves_partial_frame() {
        let mut pending = fake_jpeg(1);
        pending.extend_from_slice(&[0xFF, 0xD8, 7, 7]);
        assert_eq!(extract_latest_jpeg(&mut pending).unwrap(), fake_jpeg(1));
        assert_eq!(pending, vec![0xFF, 0xD8, 7, 7]);

        pending.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(
            extract_latest_jpeg(&mut pending).unwrap(),
            vec![0xFF, 0xD8, 7, 7, 0xFF, 0xD9]
        );
    }

    #[test]
    fn test_extract_discards_leading_garbage() {
        let mut pending = vec![1, 2, 3];
        pending.extend(fake_jpeg(9));
        assert_eq!(extract_latest_jpeg(&mut pending).unwrap(), fake_jpeg(9));
    }

    #[test]
    fn test_extract_keeps_split_marker() {
        let mut pending = vec![5, 5, 0xFF];
        assert!(extract_latest_jpeg(&mut pending).is_none());
        assert_eq!(pending, vec![0xFF]);
    }

    #[test]
    fn test_reader_publishes_frames() {
        let stream = Cursor::new([fake_jpeg(1), fake_jpeg(2)].concat());
        let latest = Arc::new(Mutex::new(LatestJpeg::default()));
        read_mjpeg_stream(stream, Arc::clone(&latest), Arc::new(AtomicBool::new(false)));

        let slot = latest.lock().unwrap();
        assert!(slot.seq >= 1);
        assert_eq!(slot.bytes.as_deref(), Some(fake_jpeg(2).as_slice()));
    }

    #[test]
    fn test_missing_command_is_unavailable() {
        let settings = CameraSettings {
            rpicam_command: "medscan-no-such-camera-binary".to_string(),
            ..CameraSettings::default()
        };
        let provider = RpicamProvider::new(&settings);
        match provider.open(CameraSelector::new(0)) {
            Err(CameraError::BackendUnavailable { kind, .. }) => {
                assert_eq!(kind, BackendKind::DedicatedModule)
            }
            Err(other) => panic!("Expected BackendUnavailable, got {:?}", other),
            Ok(_) => panic!("Expected BackendUnavailable, got an open source"),
        }
    }
}
