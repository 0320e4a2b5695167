use clap::Parser;

use medscan::cli::{self, AnalyzeOptions, Args, Command};
use medscan::config::{self, Config};
use medscan::kiosk;

/// Load .env file
///
/// Does not override existing environment variables, so a real
/// `MEDSCAN_API_URL` always wins over the file.
fn load_env() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = args.log_level() {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis().init();
}

/// Config file, then environment, then command-line flags.
fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    let mut cfg = Config::load(args.config.as_deref())?;
    cfg.apply_env()?;
    if let Some(url) = &args.api_url {
        cfg.api.base_url = url.clone();
    }
    Ok(cfg)
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create async runtime: {}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    // Load .env file before anything else
    load_env();

    let args = Args::parse();
    init_logging(&args);

    let cfg = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Some(Command::ListCameras) => cli::list_cameras(&cfg.camera_settings()),
        Some(Command::Config { action }) => {
            let path = args.config.clone().unwrap_or_else(config::default_path);
            cli::handle_config_action(action, &path, &cfg);
        }
        Some(Command::Analyze {
            screening_type,
            name,
            age,
            gender,
            save_annotated,
            image,
        }) => {
            let options = AnalyzeOptions {
                screening_type,
                name,
                age,
                gender,
                image,
                save_annotated,
            };
            if let Err(e) = runtime().block_on(cli::run_analyze(&cfg, options)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Some(Command::Run) | None => {
            if let Err(e) = kiosk::setup_ctrlc_handler() {
                log::warn!("Failed to install Ctrl+C handler: {}", e);
            }
            if let Err(e) = runtime().block_on(kiosk::run(&cfg)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
