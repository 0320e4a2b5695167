//! Terminal kiosk driver.
//!
//! A line-oriented front-end over [`NavigationController`]: one async loop
//! multiplexes stdin commands, the camera preview timer and analysis worker
//! events with `tokio::select!`.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::analysis::{AnalysisClient, AnalysisWorker, ScreeningResult};
use crate::camera::{CaptureManager, Fidelity};
use crate::config::Config;
use crate::events::{AppEvent, EventKind};
use crate::navigation::{AnalysisState, NavigationController, NavigationError, Screen};
use crate::session::{Gender, ScreeningType};

/// How often the loop checks for Ctrl+C while otherwise idle.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Check if Ctrl+C has been received.
pub fn ctrlc_received() -> bool {
    CTRLC_RECEIVED.load(Ordering::SeqCst)
}

/// Set up the Ctrl+C handler.
///
/// This should be called once at program startup.
pub fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, shutting down...");
    })
}

/// One line of kiosk input.
#[derive(Debug, Clone, PartialEq)]
pub enum KioskCommand {
    Start,
    Select(ScreeningType),
    Patient {
        name: String,
        age: u32,
        gender: Gender,
    },
    Capture(Fidelity),
    Retake,
    Upload(PathBuf),
    Proceed,
    /// Context-dependent backward step
    Back,
    Status,
    Help,
    Quit,
}

/// Parse one input line.
///
/// `patient <age> <gender> <name...>` keeps the name last so it may contain spaces.
pub fn parse_command(line: &str) -> Result<KioskCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_lowercase().as_str() {
        "start" => Ok(KioskCommand::Start),
        "select" | "screen" => match rest {
            "1" => Ok(KioskCommand::Select(ScreeningType::DiabeticRetinopathy)),
            "2" => Ok(KioskCommand::Select(ScreeningType::Anemia)),
            "3" => Ok(KioskCommand::Select(ScreeningType::Malnutrition)),
            other => other.parse().map(KioskCommand::Select),
        },
        "patient" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let age = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or("usage: patient <age> <male|female> <name>")?;
            let age: u32 = age
                .parse()
                .map_err(|_| format!("'{}' is not a valid age", age))?;
            let gender: Gender = parts
                .next()
                .unwrap_or("")
                .parse()
                .map_err(|e: crate::session::PatientError| e.to_string())?;
            let name = parts.next().unwrap_or("").to_string();
            Ok(KioskCommand::Patient { name, age, gender })
        }
        "capture" | "snap" => match rest {
            "" | "preview" => Ok(KioskCommand::Capture(Fidelity::Preview)),
            "full" => Ok(KioskCommand::Capture(Fidelity::Full)),
            other => Err(format!("Unknown capture mode '{}', expected preview or full", other)),
        },
        "retake" => Ok(KioskCommand::Retake),
        "upload" if !rest.is_empty() => Ok(KioskCommand::Upload(PathBuf::from(rest))),
        "upload" => Err("usage: upload <path>".to_string()),
        "analyze" | "proceed" | "next" => Ok(KioskCommand::Proceed),
        "back" | "home" => Ok(KioskCommand::Back),
        "status" => Ok(KioskCommand::Status),
        "help" | "?" => Ok(KioskCommand::Help),
        "quit" | "exit" => Ok(KioskCommand::Quit),
        "" => Err("empty command".to_string()),
        other => Err(format!("Unknown command '{}'. Type 'help' for a list.", other)),
    }
}

/// Apply a command to the controller. Returns `true` when the kiosk should exit.
pub fn apply_command(
    nav: &mut NavigationController,
    command: KioskCommand,
) -> Result<bool, NavigationError> {
    match command {
        KioskCommand::Start => nav.start()?,
        KioskCommand::Select(screening_type) => nav.select_screening(screening_type)?,
        KioskCommand::Patient { name, age, gender } => {
            nav.submit_patient(&name, age, gender)?;
        }
        KioskCommand::Capture(fidelity) => nav.capture(fidelity)?,
        KioskCommand::Retake => {
            nav.retake()?;
        }
        KioskCommand::Upload(path) => nav.upload(&path)?,
        KioskCommand::Proceed => {
            nav.proceed()?;
        }
        KioskCommand::Back => match nav.screen() {
            Screen::Home => {}
            Screen::Menu => nav.back_to_home()?,
            Screen::PatientData => nav.back_to_menu()?,
            Screen::Capture => nav.back_to_patient()?,
            Screen::Result => nav.go_home()?,
        },
        KioskCommand::Status => print_status(nav),
        KioskCommand::Help => print_help(nav.screen()),
        KioskCommand::Quit => return Ok(true),
    }
    Ok(false)
}

/// [`apply_command`] from inside the async loop.
///
/// Opening or capturing may wait on the device for up to the init timeout.
/// The wait runs in place so the worker and timers keep being driven on the
/// other runtime threads. Needs the multi-threaded runtime.
fn apply_in_loop(
    nav: &mut NavigationController,
    command: KioskCommand,
) -> Result<bool, NavigationError> {
    tokio::task::block_in_place(|| apply_command(nav, command))
}

fn print_help(screen: Screen) {
    let hint = match screen {
        Screen::Home => "start",
        Screen::Menu => "select <1|2|3 or type>, back",
        Screen::PatientData => "patient <age> <male|female> <name>, back",
        Screen::Capture => "capture [full], retake, upload <path>, analyze, back",
        Screen::Result => "home",
    };
    println!("[{}] {}  (also: status, help, quit)", screen, hint);
}

fn print_status(nav: &NavigationController) {
    println!("Screen: {}", nav.screen());
    if let Some(session) = nav.session() {
        println!("Screening: {}", session.screening_type);
        if let Some(patient) = &session.patient {
            println!("Patient: {}, {} ({})", patient.name, patient.age, patient.gender);
        }
        if let Some(image) = &session.captured_image {
            println!("Image: {}x{}", image.width, image.height);
        }
    }
    match nav.camera_handle() {
        Some(handle) => println!(
            "Camera: {} via {} ({})",
            handle.selector,
            handle.backend_kind,
            if handle.is_running { "previewing" } else { "paused" }
        ),
        None => println!("Camera: closed"),
    }
    match nav.analysis() {
        AnalysisState::Idle => {}
        AnalysisState::Pending(id) => println!("Analysis {}: waiting for the server...", id),
        AnalysisState::Completed(result) => print_result(result),
        AnalysisState::Failed(message) => println!("Analysis failed: {}", message),
    }
}

fn print_result(result: &ScreeningResult) {
    println!();
    println!("  {}", result.label());
    println!("  {}", result.summary);
    println!("  {}", result.confidence_text());
    println!("  {}", result.patient_line);
    println!("  {}", result.generated_text());
    println!();
}

fn print_screen(screen: Screen, nav_guide: Option<&str>) {
    match screen {
        Screen::Home => println!("== Medical screening kiosk == (type 'start')"),
        Screen::Menu => {
            println!("Choose a screening:");
            for (i, t) in ScreeningType::ALL.iter().enumerate() {
                println!("  {}. {}", i + 1, t);
            }
        }
        Screen::PatientData => println!("Enter patient data: patient <age> <male|female> <name>"),
        Screen::Capture => {
            if let Some(guide) = nav_guide {
                println!("Capture guide: {}", guide);
            }
            println!("Commands: capture [full], retake, upload <path>, analyze, back");
        }
        Screen::Result => println!("Analyzing... (type 'home' when done)"),
    }
}

fn register_printers(nav: &mut NavigationController) {
    let bus = nav.events_mut();
    bus.subscribe(EventKind::AnalysisCompleted, |event| {
        if let AppEvent::AnalysisCompleted { result, .. } = event {
            print_result(result);
        }
    });
    bus.subscribe(EventKind::AnalysisFailed, |event| {
        if let AppEvent::AnalysisFailed { message, .. } = event {
            println!("Analysis failed: {}", message);
        }
    });
    for kind in [
        EventKind::CameraOpened,
        EventKind::CameraUnavailable,
        EventKind::ImageCaptured,
        EventKind::CaptureFailed,
        EventKind::UploadFailed,
        EventKind::AnnotatedImageReady,
    ] {
        bus.subscribe(kind, |event| println!("{}", event.description()));
    }
}

/// Read lines from `reader` on a dedicated thread and forward them.
///
/// The thread is detached. A read blocked on an idle terminal does not hold
/// up runtime shutdown; the thread dies with the process. The channel closes
/// at end of input or on a read error.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break; // Kiosk loop gone
                    }
                }
                Err(e) => {
                    log::error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Run the interactive kiosk until `quit`, end of input, or Ctrl+C.
pub async fn run(config: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = AnalysisClient::new(config.api.base_url.clone(), config.api_timeout())?;
    let (worker_tx, mut worker_rx) = mpsc::unbounded_channel();
    let worker = AnalysisWorker::spawn(client, worker_tx);
    let camera = CaptureManager::from_settings(&config.camera_settings());
    let mut nav = NavigationController::new(camera, worker, config.camera_selectors());
    register_printers(&mut nav);

    log::info!("Kiosk started, analysis server at {}", config.api.base_url);
    print_screen(nav.screen(), None);

    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let mut shutdown_check = tokio::time::interval(SHUTDOWN_POLL_INTERVAL);
    let mut preview_period: Option<Duration> = None;
    let mut preview = tokio::time::interval(SHUTDOWN_POLL_INTERVAL);
    let mut preview_frames: u64 = 0;

    loop {
        if ctrlc_received() {
            break;
        }

        // The preview timer follows the active backend and stops off the capture screen.
        let period = nav.preview_interval();
        if period != preview_period {
            if let Some(p) = period {
                preview = tokio::time::interval(p);
                preview.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }
            preview_period = period;
        }

        tokio::select! {
            maybe_line = lines.recv() => {
                // End of input
                let Some(line) = maybe_line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let before = nav.screen();
                match parse_command(&line) {
                    Ok(command) => match apply_in_loop(&mut nav, command) {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => println!("{}", e),
                    },
                    Err(message) => println!("{}", message),
                }
                if nav.screen() != before {
                    let guide = nav.session().map(|s| s.screening_type.guide());
                    print_screen(nav.screen(), guide);
                }
            }

            Some(event) = worker_rx.recv() => {
                nav.handle_worker_event(event);
            }

            _ = preview.tick(), if preview_period.is_some() => {
                if nav.poll_preview().is_some() {
                    preview_frames += 1;
                    log::trace!("Preview frame {}", preview_frames);
                }
            }

            _ = shutdown_check.tick() => {}
        }
    }

    nav.shutdown().await;
    log::info!("Kiosk stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("start"), Ok(KioskCommand::Start));
        assert_eq!(parse_command("  BACK "), Ok(KioskCommand::Back));
        assert_eq!(parse_command("analyze"), Ok(KioskCommand::Proceed));
        assert_eq!(parse_command("quit"), Ok(KioskCommand::Quit));
    }

    #[test]
    fn test_parse_select() {
        assert_eq!(
            parse_command("select 1"),
            Ok(KioskCommand::Select(ScreeningType::DiabeticRetinopathy))
        );
        assert_eq!(
            parse_command("select malnutrition"),
            Ok(KioskCommand::Select(ScreeningType::Malnutrition))
        );
        assert!(parse_command("select 9").is_err());
    }

    #[test]
    fn test_parse_patient_keeps_full_name() {
        assert_eq!(
            parse_command("patient 42 female Siti Nur Aminah"),
            Ok(KioskCommand::Patient {
                name: "Siti Nur Aminah".to_string(),
                age: 42,
                gender: Gender::Female,
            })
        );
        assert!(parse_command("patient forty male Budi").is_err());
        assert!(parse_command("patient 40 other Budi").is_err());
        assert!(parse_command("patient").is_err());
    }

    #[test]
    fn test_parse_capture_modes() {
        assert_eq!(
            parse_command("capture"),
            Ok(KioskCommand::Capture(Fidelity::Preview))
        );
        assert_eq!(
            parse_command("capture full"),
            Ok(KioskCommand::Capture(Fidelity::Full))
        );
        assert!(parse_command("capture raw").is_err());
    }

    #[test]
    fn test_parse_upload() {
        assert_eq!(
            parse_command("upload /tmp/eye scan.png"),
            Ok(KioskCommand::Upload(PathBuf::from("/tmp/eye scan.png")))
        );
        assert!(parse_command("upload").is_err());
    }

    #[test]
    fn test_parse_unknown() {
        assert!(parse_command("dance").is_err());
    }

    #[tokio::test]
    async fn test_line_reader_forwards_until_eof() {
        let mut lines = spawn_line_reader(std::io::Cursor::new("start\nselect 2\n"));
        assert_eq!(lines.recv().await.as_deref(), Some("start"));
        assert_eq!(lines.recv().await.as_deref(), Some("select 2"));
        assert_eq!(lines.recv().await, None);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_camera_open_keeps_runtime_responsive() {
        use crate::camera::{BackendKind, CameraSettings, HelperCommand};
        use crate::session::CameraSelectors;
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let settings = CameraSettings {
            backends: vec![BackendKind::ExternalProcess],
            init_timeout: Duration::from_secs(5),
            helper: HelperCommand {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "sleep 0.4; exit 1".to_string()],
                output: std::env::temp_dir().join("medscan-kiosk-slow-helper.png"),
            },
            ..CameraSettings::default()
        };
        let client = AnalysisClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = AnalysisWorker::spawn(client, tx);
        let mut nav = NavigationController::new(
            CaptureManager::from_settings(&settings),
            worker,
            CameraSelectors::default(),
        );
        nav.start().unwrap();
        nav.select_screening(ScreeningType::Anemia).unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(20));
            loop {
                interval.tick().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let command = parse_command("patient 30 male Budi Santoso").unwrap();
        assert!(!apply_in_loop(&mut nav, command).unwrap());
        let seen = ticks.load(Ordering::SeqCst);
        ticker.abort();

        assert_eq!(nav.screen(), Screen::Capture);
        assert!(nav.camera_handle().is_none());
        assert!(seen >= 5, "only {} ticks while the camera was opening", seen);
        nav.shutdown().await;
    }

    /// Input that never delivers a byte until its sender is dropped.
    struct IdleTerminal(std::sync::mpsc::Receiver<()>);

    impl std::io::Read for IdleTerminal {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_idle_input_does_not_block_runtime_shutdown() {
        let (_keep_open, idle) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let mut lines = spawn_line_reader(std::io::BufReader::new(IdleTerminal(idle)));
                // Ctrl+C arrives while a read is pending.
                let waited = tokio::time::timeout(Duration::from_millis(50), lines.recv()).await;
                assert!(waited.is_err());
            });
            drop(rt);
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "runtime shutdown waited on a pending stdin read"
        );
    }
}
