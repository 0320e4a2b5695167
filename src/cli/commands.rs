//! Subcommand handlers for list-cameras, analyze and config actions.

use std::path::{Path, PathBuf};

use super::args::ConfigAction;
use crate::analysis::{AnalysisClient, AnalysisRequest, ScreeningResult};
use crate::camera::{self, CameraSettings};
use crate::config::{Config, DEFAULT_CONFIG_TEMPLATE};
use crate::imaging::Frame;
use crate::session::{Gender, Patient, ScreeningType};

/// List available cameras and print them to stdout.
pub fn list_cameras(settings: &CameraSettings) {
    match camera::list_devices(settings) {
        Ok(devices) => {
            if devices.is_empty() {
                println!("No cameras found.");
                println!();
                println!("Make sure the camera is connected and enabled.");
                println!("Images can still be analyzed with 'medscan analyze'.");
            } else {
                println!("Available cameras:");
                for device in devices {
                    println!("  {}", device);
                }
                println!();
                println!("Set camera.default_index / camera.retina_index in the config file.");
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, config_path: &Path, config: &Config) {
    match action {
        ConfigAction::Show => {
            let backends: Vec<&str> = config.camera.backends.iter().map(|b| b.as_str()).collect();
            println!("Current configuration:");
            println!("  API URL: {}", config.api.base_url);
            println!("  API timeout: {}s", config.api.timeout_secs);
            println!("  Default camera: {}", config.camera.default_index);
            println!("  Retina camera: {}", config.camera.retina_index);
            println!("  Backends: {}", backends.join(", "));
            println!(
                "  Preview: {}x{} @ {} fps",
                config.camera.width, config.camera.height, config.camera.fps
            );
            println!("  Init timeout: {}ms", config.camera.init_timeout_ms);
            println!();

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            if config_path.exists() {
                eprintln!("Config file already exists: {}", config_path.display());
                eprintln!("Use 'medscan config show' to view current settings.");
                std::process::exit(1);
            }

            if let Some(parent) = config_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("Error creating config directory: {}", e);
                    std::process::exit(1);
                }
            }

            if let Err(e) = std::fs::write(config_path, DEFAULT_CONFIG_TEMPLATE) {
                eprintln!("Error writing config file: {}", e);
                std::process::exit(1);
            }

            println!("Created config file: {}", config_path.display());
        }
    }
}

/// Options for a one-shot analysis.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub screening_type: ScreeningType,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub image: PathBuf,
    pub save_annotated: Option<PathBuf>,
}

/// Submit one image file and print the interpreted result.
pub async fn run_analyze(
    config: &Config,
    options: AnalyzeOptions,
) -> Result<ScreeningResult, Box<dyn std::error::Error + Send + Sync>> {
    let patient = Patient::new(&options.name, options.age, options.gender)?;
    let image = Frame::load(&options.image)?;
    let client = AnalysisClient::new(config.api.base_url.clone(), config.api_timeout())?;

    log::info!(
        "Submitting {} ({}x{}) for {} screening",
        options.image.display(),
        image.width,
        image.height,
        options.screening_type
    );

    let request = AnalysisRequest {
        screening_type: options.screening_type,
        patient,
        image,
    };
    let response = client.submit(&request).await?;
    let result = ScreeningResult::from_response(&response);

    println!("{}", result.label());
    println!("{}", result.summary);
    println!("{}", result.confidence_text());
    println!("{}", result.patient_line);
    println!("{}", result.generated_text());

    if let Some(target) = &options.save_annotated {
        match &result.image_path {
            Some(path) => {
                let bytes = client.download_asset(path).await?;
                std::fs::write(target, bytes)?;
                println!("Annotated image saved to {}", target.display());
            }
            None => log::warn!("Server returned no annotated image"),
        }
    }

    Ok(result)
}
