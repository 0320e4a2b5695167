//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::session::{Gender, ScreeningType};

/// Medical screening kiosk with camera capture and remote analysis
#[derive(Parser, Debug)]
#[command(name = "medscan")]
#[command(version, about = "Medical screening kiosk", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Analysis server base URL (overrides config and MEDSCAN_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Log filter implied by -v/-q, if any.
    pub fn log_level(&self) -> Option<log::LevelFilter> {
        if self.quiet {
            return Some(log::LevelFilter::Error);
        }
        match self.verbose {
            0 => None,
            1 => Some(log::LevelFilter::Debug),
            _ => Some(log::LevelFilter::Trace),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the interactive kiosk (default)
    Run,
    /// List available cameras
    ListCameras,
    /// Analyze an image file without the kiosk flow
    Analyze {
        /// Screening type: diabetic-retinopathy, anemia, malnutrition
        #[arg(long = "type", short = 't', value_parser = parse_screening_type)]
        screening_type: ScreeningType,

        /// Patient name
        #[arg(long)]
        name: String,

        /// Patient age in years
        #[arg(long)]
        age: u32,

        /// Patient gender: male or female
        #[arg(long, value_parser = parse_gender)]
        gender: Gender,

        /// Save the annotated image returned by the server here
        #[arg(long)]
        save_annotated: Option<PathBuf>,

        /// Image to analyze
        image: PathBuf,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}

fn parse_screening_type(s: &str) -> Result<ScreeningType, String> {
    s.parse()
}

fn parse_gender(s: &str) -> Result<Gender, String> {
    s.parse().map_err(|e: crate::session::PatientError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["medscan"]);
        assert!(args.command.is_none());
        assert!(args.config.is_none());
        assert!(args.api_url.is_none());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.log_level(), None);
    }

    #[test]
    fn test_args_config_option() {
        let args = Args::parse_from(["medscan", "--config", "/tmp/config.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/config.toml")));

        let args = Args::parse_from(["medscan", "run", "-c", "/tmp/test.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/test.toml")));
    }

    #[test]
    fn test_args_verbosity() {
        let args = Args::parse_from(["medscan", "-v"]);
        assert_eq!(args.log_level(), Some(log::LevelFilter::Debug));

        let args = Args::parse_from(["medscan", "-vv"]);
        assert_eq!(args.log_level(), Some(log::LevelFilter::Trace));

        let args = Args::parse_from(["medscan", "--quiet"]);
        assert_eq!(args.log_level(), Some(log::LevelFilter::Error));
    }

    #[test]
    fn test_args_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["medscan", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_args_list_cameras_subcommand() {
        let args = Args::parse_from(["medscan", "list-cameras"]);
        assert!(matches!(args.command, Some(Command::ListCameras)));
    }

    #[test]
    fn test_args_analyze_subcommand() {
        let args = Args::parse_from([
            "medscan",
            "--api-url",
            "http://10.0.0.5:8000",
            "analyze",
            "--type",
            "anemia",
            "--name",
            "Budi Santoso",
            "--age",
            "34",
            "--gender",
            "male",
            "/tmp/nail.png",
        ]);
        assert_eq!(args.api_url.as_deref(), Some("http://10.0.0.5:8000"));
        match args.command {
            Some(Command::Analyze {
                screening_type,
                name,
                age,
                gender,
                save_annotated,
                image,
            }) => {
                assert_eq!(screening_type, ScreeningType::Anemia);
                assert_eq!(name, "Budi Santoso");
                assert_eq!(age, 34);
                assert_eq!(gender, Gender::Male);
                assert!(save_annotated.is_none());
                assert_eq!(image, PathBuf::from("/tmp/nail.png"));
            }
            _ => panic!("Expected Analyze subcommand"),
        }
    }

    #[test]
    fn test_args_analyze_rejects_unknown_type() {
        let result = Args::try_parse_from([
            "medscan", "analyze", "-t", "flu", "--name", "Budi", "--age", "3", "--gender", "male",
            "x.png",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_args_config_show_subcommand() {
        let args = Args::parse_from(["medscan", "config", "show"]);
        match args.command {
            Some(Command::Config {
                action: ConfigAction::Show,
            }) => (),
            _ => panic!("Expected Config Show subcommand"),
        }
    }

    #[test]
    fn test_args_config_init_subcommand() {
        let args = Args::parse_from(["medscan", "config", "init"]);
        match args.command {
            Some(Command::Config {
                action: ConfigAction::Init,
            }) => (),
            _ => panic!("Expected Config Init subcommand"),
        }
    }
}
