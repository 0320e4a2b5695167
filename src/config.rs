//! Configuration file handling for medscan.
//!
//! Loads configuration from `~/.config/medscan/config.toml` or a custom path,
//! then applies `MEDSCAN_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use crate::camera::{BackendKind, CameraSelector, CameraSettings, HelperCommand, Resolution};
use crate::session::CameraSelectors;

/// Overrides `api.base_url`.
pub const API_URL_ENV: &str = "MEDSCAN_API_URL";

/// Overrides `api.timeout_secs`.
pub const API_TIMEOUT_ENV: &str = "MEDSCAN_API_TIMEOUT";

/// Configuration file structure for medscan.
/// Loaded from ~/.config/medscan/config.toml (or custom path via --config).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Camera used for nail and face screenings
    #[serde(default)]
    pub default_index: u32,
    /// Camera used for retina screenings
    #[serde(default = "default_retina_index")]
    pub retina_index: u32,
    /// Backends to try, best first
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendKind>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    #[serde(default = "default_rpicam_command")]
    pub rpicam_command: String,
    #[serde(default)]
    pub helper: HelperConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_index: 0,
            retina_index: default_retina_index(),
            backends: default_backends(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            init_timeout_ms: default_init_timeout_ms(),
            rpicam_command: default_rpicam_command(),
            helper: HelperConfig::default(),
        }
    }
}

/// External still-capture helper. Unset fields keep the built-in command.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HelperConfig {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_retina_index() -> u32 {
    1
}

fn default_backends() -> Vec<BackendKind> {
    BackendKind::DEFAULT_ORDER.to_vec()
}

fn default_width() -> u32 {
    Resolution::PREVIEW.width
}

fn default_height() -> u32 {
    Resolution::PREVIEW.height
}

fn default_fps() -> u32 {
    30
}

fn default_init_timeout_ms() -> u64 {
    3000
}

fn default_rpicam_command() -> String {
    "rpicam-vid".to_string()
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            if config.api.timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    path,
                    field: "api.timeout_secs",
                    value: "0".to_string(),
                });
            }
            log::debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Apply `MEDSCAN_API_URL` / `MEDSCAN_API_TIMEOUT` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(API_TIMEOUT_ENV).filter(|v| !v.trim().is_empty()) {
            // A zero timeout would fail every request.
            self.api.timeout_secs = raw
                .trim()
                .parse()
                .ok()
                .filter(|secs: &u64| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    name: API_TIMEOUT_ENV,
                    value: raw.clone(),
                })?;
        }
        Ok(())
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Camera indices per screening role.
    pub fn camera_selectors(&self) -> CameraSelectors {
        CameraSelectors {
            default: CameraSelector::new(self.camera.default_index),
            retina: CameraSelector::new(self.camera.retina_index),
        }
    }

    /// Backend settings derived from the `[camera]` table.
    pub fn camera_settings(&self) -> CameraSettings {
        let cam = &self.camera;
        let builtin = HelperCommand::default();
        CameraSettings {
            resolution: Resolution {
                width: cam.width,
                height: cam.height,
            },
            fps: cam.fps,
            backends: cam.backends.clone(),
            init_timeout: Duration::from_millis(cam.init_timeout_ms),
            rpicam_command: cam.rpicam_command.clone(),
            helper: HelperCommand {
                program: cam.helper.program.clone().unwrap_or(builtin.program),
                args: cam.helper.args.clone().unwrap_or(builtin.args),
                output: cam.helper.output.clone().unwrap_or(builtin.output),
            },
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidEnv {
        name: &'static str,
        value: String,
    },
    InvalidValue {
        path: PathBuf,
        field: &'static str,
        value: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidEnv { name, value } => {
                write!(f, "Invalid value '{}' for {}", value, name)
            }
            ConfigError::InvalidValue { path, field, value } => {
                write!(
                    f,
                    "Invalid value '{}' for {} in '{}'",
                    value,
                    field,
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::InvalidEnv { .. } | ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("medscan").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/medscan/config.toml")
        })
}

/// Contents written by `medscan config init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# medscan configuration

[api]
# Base URL of the screening inference service
base_url = "http://localhost:8000"
# Request timeout in seconds
timeout_secs = 30

[camera]
# Camera index for anemia and malnutrition screenings
default_index = 0
# Camera index for diabetic retinopathy screenings
retina_index = 1
# Backends to try, best first:
# dedicated-module, os-subsystem, generic-capture, external-process
backends = ["dedicated-module", "os-subsystem", "generic-capture", "external-process"]
# Preview resolution
width = 640
height = 480
fps = 30
# How long a backend may take to deliver its first frame
init_timeout_ms = 3000
# Streaming command for the camera module
rpicam_command = "rpicam-vid"

[camera.helper]
# External still-capture helper; {index}, {width}, {height}, {output} are substituted
# program = "rpicam-still"
# args = ["-n", "-t", "1", "--camera", "{index}", "--width", "{width}", "--height", "{height}", "-o", "{output}"]
# output = "/tmp/medscan-capture.jpg"
"#;
