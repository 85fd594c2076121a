//! barscan: barcode and QR scanning from a V4L2 camera or still images

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use barscan::camera::{CameraSession, ScreenGeometry};
use barscan::capture::V4l2Camera;
use barscan::decode::{DecodeDispatcher, DecodeResult, FrameOutcome, ScanHints, StaticImageDecoder};
use barscan::{utils, Config};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "barscan", version, about)]
struct Cli {
    /// Configuration file; defaults to ./barscan.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan live camera frames
    Scan {
        /// Keep scanning after the first result
        #[arg(long)]
        bulk: bool,
    },
    /// Decode a still image
    Decode { image: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("barscan=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    info!("barscan launching...");

    match cli.command {
        Command::Decode { image } => {
            barscan::CONFIG.store(Arc::new(config.clone()));
            decode_image(&config, &image)
        }
        Command::Scan { bulk } => {
            config.decode.bulk_mode |= bulk;
            barscan::CONFIG.store(Arc::new(config.clone()));
            scan(config).await
        }
    }
}

fn decode_image(config: &Config, path: &Path) -> Result<()> {
    let mut decoder = StaticImageDecoder::new(&ScanHints::from_config(&config.decode));
    match decoder.decode_file(path)? {
        Some(result) => {
            print_result(&result);
            Ok(())
        }
        None => Err(eyre!("No code found in {}", path.display())),
    }
}

async fn scan(config: Config) -> Result<()> {
    // Auto-detect capture device if needed
    let found = if config.camera.device.is_empty() {
        utils::auto_detect_device()?
    } else {
        utils::probe_device(&config.camera.device)?
    };
    info!("Using capture device: {:?}", found);

    let camera = V4l2Camera::open(&found, &config.camera)?;
    let screen = ScreenGeometry::new(config.display.resolution(), config.display.rotation);

    let mut session = CameraSession::new(&config);
    session.open(camera, screen)?;
    session.configure()?;
    session.start_preview()?;
    let outcomes = session.start_decoding(DecodeDispatcher::new(&config.decode))?;

    // Pump frames on a blocking thread; the async side only consumes outcomes
    let running = Arc::new(AtomicBool::new(true));
    let pump_running = running.clone();
    let pump_timeout = Duration::from_millis(config.pipeline.pump_timeout_ms);
    let pump = tokio::task::spawn_blocking(move || {
        while pump_running.load(Ordering::Acquire) {
            if let Err(e) = session.pump_frame(pump_timeout) {
                error!("Frame pump stopped: {e}");
                break;
            }
        }
        if let Some(stats) = session.stats() {
            info!(?stats, "Pipeline statistics");
        }
        session.close();
    });

    let bulk = config.decode.bulk_mode;
    let mut found_any = false;
    loop {
        tokio::select! {
            outcome = outcomes.recv_async() => match outcome {
                Ok(FrameOutcome::Decoded(result)) => {
                    print_result(&result);
                    found_any = true;
                    if !bulk {
                        break;
                    }
                }
                Ok(FrameOutcome::NoCodeFound) => {}
                Ok(FrameOutcome::Skipped(reason)) => debug!(?reason, "Frame skipped"),
                Err(_) => {
                    warn!("Decode thread ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    running.store(false, Ordering::Release);
    pump.await?;
    info!("barscan shutting down");

    if found_any || bulk {
        Ok(())
    } else {
        Err(eyre!("Scanning stopped before a code was found"))
    }
}

fn print_result(result: &DecodeResult) {
    info!(
        engine = %result.engine,
        symbology = ?result.payload.symbology,
        region = ?result.source_region,
        "Decoded"
    );
    println!("{}", result.payload.text);
}
