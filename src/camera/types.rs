//! Camera types and data structures.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

pub use crate::imaging::Frame;

/// Preview polling interval for backends that deliver frames in-process.
pub const IN_PROCESS_PREVIEW_INTERVAL: Duration = Duration::from_millis(30);

/// Preview polling interval for the external helper backend (round-trips through a file).
pub const EXTERNAL_PREVIEW_INTERVAL: Duration = Duration::from_millis(100);

/// Identifies which physical camera to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSelector {
    /// Device index (rpicam `--camera`, V4L2 `/dev/videoN`, ...)
    pub index: u32,
}

impl CameraSelector {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

impl fmt::Display for CameraSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {}", self.index)
    }
}

/// Camera access strategy, in default priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Dedicated camera module (Raspberry Pi camera via rpicam)
    DedicatedModule,
    /// Platform camera API (V4L2, AVFoundation, MediaFoundation)
    OsSubsystem,
    /// Generic capture library with automatic format negotiation
    GenericCapture,
    /// External helper process writing stills to a file
    ExternalProcess,
}

impl BackendKind {
    /// Default probing order, best quality first.
    pub const DEFAULT_ORDER: [BackendKind; 4] = [
        BackendKind::DedicatedModule,
        BackendKind::OsSubsystem,
        BackendKind::GenericCapture,
        BackendKind::ExternalProcess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DedicatedModule => "dedicated-module",
            BackendKind::OsSubsystem => "os-subsystem",
            BackendKind::GenericCapture => "generic-capture",
            BackendKind::ExternalProcess => "external-process",
        }
    }

    /// Polling interval the preview timer should use for this backend.
    pub fn preview_interval(&self) -> Duration {
        match self {
            BackendKind::ExternalProcess => EXTERNAL_PREVIEW_INTERVAL,
            _ => IN_PROCESS_PREVIEW_INTERVAL,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "dedicated-module" | "dedicated" | "rpicam" => Ok(BackendKind::DedicatedModule),
            "os-subsystem" | "os" | "native" => Ok(BackendKind::OsSubsystem),
            "generic-capture" | "generic" => Ok(BackendKind::GenericCapture),
            "external-process" | "external" | "helper" => Ok(BackendKind::ExternalProcess),
            other => Err(format!(
                "Unknown camera backend '{}'. Expected one of: dedicated-module, os-subsystem, generic-capture, external-process",
                other
            )),
        }
    }
}

/// Camera resolution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Preview resolution used by the capture screen (640x480)
    pub const PREVIEW: Resolution = Resolution {
        width: 640,
        height: 480,
    };
}

impl Default for Resolution {
    fn default() -> Self {
        Self::PREVIEW
    }
}

/// Command line for the external still-capture helper.
///
/// `{index}`, `{output}`, `{width}` and `{height}` in `args` are substituted
/// before each run.
#[derive(Debug, Clone)]
pub struct HelperCommand {
    pub program: String,
    pub args: Vec<String>,
    pub output: PathBuf,
}

impl Default for HelperCommand {
    fn default() -> Self {
        Self {
            program: "rpicam-still".to_string(),
            args: [
                "-n", "-t", "1", "--camera", "{index}", "--width", "{width}", "--height",
                "{height}", "-o", "{output}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            output: std::env::temp_dir().join("medscan-capture.jpg"),
        }
    }
}

/// Settings shared by all camera backends.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Requested preview resolution
    pub resolution: Resolution,
    /// Target FPS for streaming backends
    pub fps: u32,
    /// Backends to try, in priority order
    pub backends: Vec<BackendKind>,
    /// How long a backend may take to deliver its first frame
    pub init_timeout: Duration,
    /// Streaming command for the dedicated camera module
    pub rpicam_command: String,
    /// External still-capture helper
    pub helper: HelperCommand,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            fps: 30,
            backends: BackendKind::DEFAULT_ORDER.to_vec(),
            init_timeout: Duration::from_secs(3),
            rpicam_command: "rpicam-vid".to_string(),
            helper: HelperCommand::default(),
        }
    }
}

/// Outward-facing handle for the active camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraHandle {
    pub backend_kind: BackendKind,
    pub selector: CameraSelector,
    pub is_running: bool,
}

/// How much effort a still capture should spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fidelity {
    /// Reuse the latest preview frame
    #[default]
    Preview,
    /// Ask the device for a dedicated still where supported
    Full,
}

/// Lifecycle state of the capture manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Opening,
    Previewing,
    Capturing,
    Closed,
}

/// Information about an available camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index for selection
    pub index: u32,
    /// Human-readable device name
    pub name: String,
    /// Device description
    pub description: String,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.index, self.name, self.description)
    }
}

/// One backend's reason for not opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub kind: BackendKind,
    pub reason: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

fn format_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backends configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur during camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Every configured backend failed to open
    #[error("No camera available ({})", format_failures(.failures))]
    NoCameraAvailable { failures: Vec<BackendFailure> },

    /// Backend is not compiled in or its tooling is missing
    #[error("Backend {kind} unavailable: {reason}")]
    BackendUnavailable { kind: BackendKind, reason: String },

    #[error("Failed to open {selector} with {kind}: {reason}")]
    OpenFailed {
        kind: BackendKind,
        selector: CameraSelector,
        reason: String,
    },

    /// Camera permission denied (macOS/iOS)
    #[error(
        "Camera permission denied. On macOS, grant access in System Settings > Privacy & Security > Camera"
    )]
    PermissionDenied,

    #[error("Failed to read frame: {0}")]
    FrameFailed(String),

    /// Still capture failed; the preview keeps running
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Camera is not open")]
    NotOpen,

    #[error("Failed to query cameras: {0}")]
    QueryFailed(String),
}
