//! pyro_client - stream camera frames to a PyroVision server
//!
//! Reads frames from a source (camera, MJPEG URL, image file or directory,
//! synthetic scene), sends them one at a time to the inference server and
//! shows the returned status live. Operator commands are read from stdin.

use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pyrovision::client::InferenceClient;
use pyrovision::config::ClientConfig;
use pyrovision::ingest::open_source;
use pyrovision::service::Endpoint;
use pyrovision::stream::{run_session, Command, SessionControl, SessionOptions, StreamSession, StreamSettings};

#[path = "../ui.rs"]
mod ui;

const IDLE_POLL: Duration = Duration::from_millis(50);
const HELP: &str = "commands: start | stop | fps <1-30> | conf <0-1> | status | help | quit";

#[derive(Parser, Debug)]
#[command(
    name = "pyro_client",
    version,
    about = "Stream frames to a PyroVision inference server"
)]
struct Args {
    /// Server base URL (overrides config)
    #[arg(long, value_name = "URL")]
    server_url: Option<String>,

    /// Endpoint to call: detect or detect_stream
    #[arg(long, value_name = "NAME")]
    endpoint: Option<Endpoint>,

    /// Frame source: /dev/videoN, http(s) MJPEG/snapshot URL, image file or
    /// directory, or stub://name?scene=cycle
    #[arg(long, value_name = "URI")]
    source: Option<String>,

    /// Target frames per second (clamped to 1..=30)
    #[arg(long)]
    fps: Option<u32>,

    /// Confidence threshold in [0, 1]
    #[arg(long)]
    confidence: Option<f32>,

    /// Per-request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Send the confidence threshold with every frame
    #[arg(long)]
    forward_threshold: bool,

    /// Start streaming immediately instead of waiting for 'start'
    #[arg(long)]
    autostart: bool,

    /// UI mode for stderr status (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    /// Keep latest_raw.jpg and latest_annotated.jpg in this directory
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut cfg = ClientConfig::load()?;
    if let Some(url) = args.server_url {
        cfg.server_url = url;
    }
    if let Some(endpoint) = args.endpoint {
        cfg.endpoint = endpoint;
    }
    if let Some(source) = args.source {
        cfg.source = source;
    }
    if let Some(fps) = args.fps {
        cfg.target_fps = fps;
    }
    if let Some(confidence) = args.confidence {
        cfg.confidence_threshold = confidence;
    }
    if let Some(ms) = args.timeout_ms {
        cfg.timeout = Duration::from_millis(ms);
    }
    cfg.forward_threshold |= args.forward_threshold;
    cfg.validate()?;

    if let Some(dir) = &args.snapshot_dir {
        std::fs::create_dir_all(dir)?;
    }
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let mut dashboard = ui::TerminalDashboard::from_args(&args.ui, is_tty, !stdout_is_tty)
        .with_snapshot_dir(args.snapshot_dir);

    let client = InferenceClient::new(&cfg.server_url, cfg.endpoint, cfg.timeout)?;
    match client.health() {
        Ok(status) => log::info!("server at {} reports '{}'", cfg.server_url, status),
        Err(err) => log::warn!("server health check failed: {}", err),
    }
    dashboard.print(&format!("PyroVision client → {}", client.endpoint_url()));
    dashboard.print(HELP);

    let control = SessionControl::new(StreamSettings::new(
        cfg.confidence_threshold,
        cfg.target_fps,
    ));
    let quit = Arc::new(AtomicBool::new(false));

    {
        let control = control.clone();
        let quit = quit.clone();
        ctrlc::set_handler(move || {
            quit.store(true, Ordering::SeqCst);
            control.stop();
        })
        .expect("error setting Ctrl-C handler");
    }
    spawn_command_reader(control.clone(), quit.clone());

    if args.autostart {
        control.start();
    }

    let options = SessionOptions {
        jpeg_quality: cfg.jpeg_quality,
        forward_threshold: cfg.forward_threshold,
        ..SessionOptions::default()
    };
    let mut session = StreamSession::new();
    let mut idle_shown = false;
    while !quit.load(Ordering::SeqCst) {
        if !control.is_running() {
            if !idle_shown {
                dashboard.idle("type 'start' to begin streaming");
                idle_shown = true;
            }
            std::thread::sleep(IDLE_POLL);
            continue;
        }
        idle_shown = false;

        let source = match open_source(&cfg.source) {
            Ok(source) => source,
            Err(err) => {
                control.stop();
                dashboard.print(&format!("⚠ cannot open source {}: {:#}", cfg.source, err));
                continue;
            }
        };
        if let Err(err) = run_session(
            &control,
            &mut session,
            source,
            &client,
            &mut dashboard,
            &options,
        ) {
            dashboard.print(&format!("⚠ failed to open camera: {:#}", err));
        }
    }

    log::info!("pyro_client exiting");
    Ok(())
}

/// Apply stdin commands to the shared control. Runs until EOF or `quit`.
fn spawn_command_reader(control: SessionControl, quit: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(Command::Start) => {
                    if !control.start() {
                        eprintln!("already streaming");
                    }
                }
                Ok(Command::Stop) => {
                    if !control.stop() {
                        eprintln!("not streaming");
                    }
                }
                Ok(Command::Fps(fps)) => {
                    let applied = control.set_target_fps(fps);
                    eprintln!("target fps set to {}", applied);
                }
                Ok(Command::Confidence(value)) => match control.set_confidence(value) {
                    Ok(applied) => eprintln!("confidence set to {:.2}", applied),
                    Err(err) => eprintln!("{}", err),
                },
                Ok(Command::Status) => {
                    let settings = control.settings();
                    eprintln!(
                        "{} | target {} fps | confidence {:.2}",
                        if control.is_running() { "streaming" } else { "idle" },
                        settings.target_fps,
                        settings.confidence_threshold
                    );
                }
                Ok(Command::Help) => eprintln!("{}", HELP),
                Ok(Command::Quit) => {
                    quit.store(true, Ordering::SeqCst);
                    control.stop();
                    break;
                }
                Err(err) => eprintln!("{}", err),
            }
        }
    });
}
