//! External helper backend.
//!
//! Runs a still-capture command that writes an image to a known path, then
//! reads the file back. Preview is cooperative: each tick either launches the
//! helper or collects the file it finished writing, so the UI loop never
//! blocks on the process.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::backend::{BackendProvider, FrameSource};
use super::types::{
    BackendKind, CameraError, CameraSelector, CameraSettings, Frame, HelperCommand, Resolution,
};

pub struct HelperProvider {
    command: HelperCommand,
    resolution: Resolution,
    init_timeout: Duration,
}

impl HelperProvider {
    pub fn new(settings: &CameraSettings) -> Self {
        Self {
            command: settings.helper.clone(),
            resolution: settings.resolution,
            init_timeout: settings.init_timeout,
        }
    }
}

/// Substitute `{index}`, `{output}`, `{width}` and `{height}` placeholders.
pub(crate) fn expand_args(
    args: &[String],
    selector: CameraSelector,
    output: &Path,
    resolution: Resolution,
) -> Vec<String> {
    let output = output.display().to_string();
    args.iter()
        .map(|arg| {
            arg.replace("{index}", &selector.index.to_string())
                .replace("{output}", &output)
                .replace("{width}", &resolution.width.to_string())
                .replace("{height}", &resolution.height.to_string())
        })
        .collect()
}

impl BackendProvider for HelperProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::ExternalProcess
    }

    fn open(&self, selector: CameraSelector) -> Result<Box<dyn FrameSource>, CameraError> {
        let mut source = HelperSource {
            program: self.command.program.clone(),
            args: expand_args(&self.command.args, selector, &self.command.output, self.resolution),
            output: self.command.output.clone(),
            timeout: self.init_timeout,
            running: None,
            preview_stopped: false,
        };

        // Check with one synchronous capture; the result becomes the first preview frame.
        let first = source.run_to_completion().map_err(|e| match e {
            HelperFailure::Missing => CameraError::BackendUnavailable {
                kind: BackendKind::ExternalProcess,
                reason: format!("'{}' not found", self.command.program),
            },
            HelperFailure::Failed(reason) => CameraError::OpenFailed {
                kind: BackendKind::ExternalProcess,
                selector,
                reason,
            },
        })?;
        log::info!(
            "External helper '{}' produced {}x{} still for {}",
            self.command.program,
            first.width,
            first.height,
            selector
        );

        Ok(Box::new(PrimedSource {
            first: Some(first),
            inner: source,
        }))
    }
}

enum HelperFailure {
    Missing,
    Failed(String),
}

struct HelperSource {
    program: String,
    args: Vec<String>,
    output: PathBuf,
    timeout: Duration,
    running: Option<(Child, Instant)>,
    preview_stopped: bool,
}

impl HelperSource {
    fn spawn(&self) -> Result<Child, HelperFailure> {
        // A leftover file from a previous run must not pass for a fresh capture.
        let _ = std::fs::remove_file(&self.output);
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    HelperFailure::Missing
                } else {
                    HelperFailure::Failed(e.to_string())
                }
            })
    }

    fn read_output(&self) -> Result<Frame, HelperFailure> {
        Frame::load(&self.output).map_err(|e| HelperFailure::Failed(e.to_string()))
    }

    /// Run the helper once and wait for it, up to the init timeout.
    ///
    /// Blocks the calling thread; async callers go through `block_in_place`.
    fn run_to_completion(&mut self) -> Result<Frame, HelperFailure> {
        self.kill_running();
        let mut child = self.spawn()?;
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return self.read_output(),
                Ok(Some(status)) => {
                    return Err(HelperFailure::Failed(format!("helper exited with {}", status)))
                }
                Ok(None) if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HelperFailure::Failed(format!(
                        "helper did not finish within {:?}",
                        self.timeout
                    )));
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(e) => return Err(HelperFailure::Failed(e.to_string())),
            }
        }
    }

    fn kill_running(&mut self) {
        if let Some((mut child, _)) = self.running.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for HelperSource {
    fn kind(&self) -> BackendKind {
        BackendKind::ExternalProcess
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.preview_stopped {
            return Ok(None);
        }

        let Some((child, started)) = self.running.as_mut() else {
            let child = self.spawn().map_err(|e| match e {
                HelperFailure::Missing => CameraError::FrameFailed("helper disappeared".to_string()),
                HelperFailure::Failed(reason) => CameraError::FrameFailed(reason),
            })?;
            self.running = Some((child, Instant::now()));
            return Ok(None);
        };

        match child.try_wait() {
            Ok(None) if started.elapsed() >= self.timeout => {
                self.kill_running();
                Err(CameraError::FrameFailed(format!(
                    "helper did not finish within {:?}",
                    self.timeout
                )))
            }
            Ok(None) => Ok(None),
            Ok(Some(status)) => {
                self.running = None;
                if !status.success() {
                    return Err(CameraError::FrameFailed(format!(
                        "helper exited with {}",
                        status
                    )));
                }
                self.read_output().map(Some).map_err(|e| match e {
                    HelperFailure::Missing => CameraError::FrameFailed("no output".to_string()),
                    HelperFailure::Failed(reason) => CameraError::FrameFailed(reason),
                })
            }
            Err(e) => {
                self.running = None;
                Err(CameraError::FrameFailed(e.to_string()))
            }
        }
    }

    fn capture_still(&mut self) -> Result<Option<Frame>, CameraError> {
        self.run_to_completion().map(Some).map_err(|e| match e {
            HelperFailure::Missing => CameraError::CaptureFailed("helper not found".to_string()),
            HelperFailure::Failed(reason) => CameraError::CaptureFailed(reason),
        })
    }

    fn stop_preview(&mut self) {
        self.preview_stopped = true;
        self.kill_running();
    }

    fn resume_preview(&mut self) {
        self.preview_stopped = false;
    }

    fn release(&mut self) -> Result<(), CameraError> {
        self.kill_running();
        match std::fs::remove_file(&self.output) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CameraError::FrameFailed(format!(
                "failed to remove {}: {}",
                self.output.display(),
                e
            ))),
        }
    }
}

/// Hands out the capture taken at open as the first preview frame.
struct PrimedSource {
    first: Option<Frame>,
    inner: HelperSource,
}

impl FrameSource for PrimedSource {
    fn kind(&self) -> BackendKind {
        BackendKind::ExternalProcess
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if let Some(frame) = self.first.take() {
            return Ok(Some(frame));
        }
        self.inner.poll_frame()
    }

    fn capture_still(&mut self) -> Result<Option<Frame>, CameraError> {
        self.first = None;
        self.inner.capture_still()
    }

    fn stop_preview(&mut self) {
        self.inner.stop_preview();
    }

    fn resume_preview(&mut self) {
        self.inner.resume_preview();
    }

    fn release(&mut self) -> Result<(), CameraError> {
        self.first = None;
        self.inner.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_args_substitutes_placeholders() {
        let args: Vec<String> = ["--camera", "{index}", "-o", "{output}", "{width}x{height}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let expanded = expand_args(
            &args,
            CameraSelector::new(1),
            Path::new("/tmp/still.jpg"),
            Resolution::PREVIEW,
        );
        assert_eq!(expanded, vec!["--camera", "1", "-o", "/tmp/still.jpg", "640x480"]);
    }

    #[test]
    fn test_missing_helper_is_unavailable() {
        let settings = CameraSettings {
            helper: HelperCommand {
                program: "medscan-no-such-helper".to_string(),
                args: vec![],
                output: std::env::temp_dir().join("medscan-helper-missing.jpg"),
            },
            ..CameraSettings::default()
        };
        let provider = HelperProvider::new(&settings);
        assert!(matches!(
            provider.open(CameraSelector::new(0)),
            Err(CameraError::BackendUnavailable {
                kind: BackendKind::ExternalProcess,
                ..
            })
        ));
    }
}
