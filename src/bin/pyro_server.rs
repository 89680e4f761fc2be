//! pyro_server - PyroVision fire and smoke inference server
//!
//! This daemon:
//! 1. Loads the configured detector and warms it up
//! 2. Serves POST /detect and POST /detect_stream
//! 3. Answers GET / with a readiness message

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use pyrovision::{
    api::{ApiConfig, ApiServer},
    config::{DetectorKind, ServerConfig},
    detect::build_detector,
    service::InferenceService,
    status::StatusPolicy,
};

#[derive(Parser, Debug)]
#[command(
    name = "pyro_server",
    version,
    about = "Fire and smoke detection server for PyroVision clients"
)]
struct Args {
    /// Listen address (overrides config)
    #[arg(long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Detector backend: color, stub or tract
    #[arg(long, value_name = "KIND")]
    detector: Option<DetectorKind>,

    /// ONNX model path for the tract backend
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Default confidence threshold in [0, 1]
    #[arg(long)]
    confidence: Option<f32>,

    /// Status derivation: source_order or highest_confidence
    #[arg(long, value_name = "POLICY")]
    status_policy: Option<StatusPolicy>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServerConfig::load()?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(kind) = args.detector {
        config.detector.kind = kind;
    }
    if let Some(model) = args.model {
        config.detector.model_path = Some(model);
    }
    if let Some(confidence) = args.confidence {
        config.confidence_threshold = confidence;
    }
    if let Some(policy) = args.status_policy {
        config.status_policy = policy;
    }
    config.validate()?;

    let detector = build_detector(&config.detector)?;
    detector.warm_up()?;
    log::info!(
        "detector '{}' ready (threshold {:.2}, policy {:?})",
        detector.name(),
        config.confidence_threshold,
        config.status_policy
    );

    let service = InferenceService::new(detector)
        .with_threshold(config.confidence_threshold)
        .with_policy(config.status_policy);
    let api_config = ApiConfig {
        addr: config.addr.clone(),
        max_body_bytes: config.max_body_bytes,
        max_workers: config.max_workers,
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, service).spawn()?;
    log::info!("inference api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("pyro_server waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
