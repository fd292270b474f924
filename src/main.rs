// qr-scan: scan a QR code from the camera or from an image file.
// • `qr-scan live`          opens the camera and samples it until a code is read.
// • `qr-scan image <path>`  decodes one image once.
// • `qr-scan devices`       lists cameras.
// The result is printed as the navigable URL (or, with --json, as the
// `{ url, qrCodeData }` body the analysis service expects). Ctrl-C stops a scan.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qr_scan::camera::DeviceBackend;
use qr_scan::{EngineKind, Facing, NormalizedResult, ScanConfig, ScanController, ScanError, ScanObserver, SessionState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qr-scan", version, about = "Scan QR codes from a camera or an image")]
struct Cli {
    /// Config file (default: <config dir>/qr-scan/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Decoder implementation
    #[arg(long, global = true, value_enum)]
    engine: Option<EngineKind>,

    /// Print the analysis request body as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan from a live camera
    Live {
        /// Camera index (see `devices`)
        #[arg(long)]
        device: Option<u32>,
        /// Preferred camera direction when no index is given
        #[arg(long, value_enum)]
        facing: Option<Facing>,
        /// Sampling cadence in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Decode a single image file
    Image { path: PathBuf },
    /// List available cameras
    Devices,
}

/// Session outcomes forwarded from the observer to the main task.
enum ScanEvent {
    Detected(NormalizedResult),
    Failed(ScanError),
    Cancelled,
}

struct ChannelObserver(mpsc::UnboundedSender<ScanEvent>);

impl ScanObserver for ChannelObserver {
    fn on_detected(&self, canonical_url: &str, raw_text: &str) {
        let _ = self.0.send(ScanEvent::Detected(NormalizedResult {
            canonical_url: canonical_url.to_owned(),
            raw_text: raw_text.to_owned(),
        }));
    }

    fn on_error(&self, error: &ScanError) {
        let _ = self.0.send(ScanEvent::Failed(error.clone()));
    }

    fn on_cancelled(&self) {
        let _ = self.0.send(ScanEvent::Cancelled);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ScanConfig::load(cli.config.as_deref())?;
    if let Some(engine) = cli.engine {
        config.engine = engine;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = Arc::new(ChannelObserver(tx));

    let event = match cli.command {
        Command::Devices => {
            let devices = DeviceBackend.list_devices().map_err(ScanError::from)?;
            if devices.is_empty() {
                println!("no cameras found");
            }
            for d in devices {
                println!("{:<5} {}", d.index, d.name);
            }
            return Ok(ExitCode::SUCCESS);
        }

        Command::Image { path } => {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let ctrl = ScanController::from_config(DeviceBackend, &config, observer);
            ctrl.start_static(&bytes)?;
            if ctrl.state() == SessionState::Active {
                ctrl.trigger().await?;
            }
            rx.recv().await
        }

        Command::Live { device, facing, interval_ms, timeout_secs } => {
            if device.is_some() {
                config.live.device = device;
            }
            if facing.is_some() {
                config.live.facing = facing;
            }
            if let Some(ms) = interval_ms {
                config.sample_interval_ms = ms;
            }

            let ctrl = ScanController::from_config(DeviceBackend, &config, observer);
            info!(engine = ?config.engine, interval_ms = config.sample_interval_ms, "starting live scan");
            ctrl.start_live(&config.live).await?;

            let deadline = async {
                match timeout_secs {
                    Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                ev = rx.recv() => ev,
                _ = tokio::signal::ctrl_c() => {
                    ctrl.stop();
                    rx.recv().await
                }
                _ = deadline => {
                    info!("timed out");
                    ctrl.stop();
                    rx.recv().await
                }
            }
        }
    };

    report(event, cli.json)
}

fn report(event: Option<ScanEvent>, json: bool) -> Result<ExitCode> {
    match event {
        Some(ScanEvent::Detected(result)) => {
            if json {
                println!("{}", serde_json::to_string(&result.analysis_request())?);
            } else {
                println!("{}", result.canonical_url);
                if result.raw_text != result.canonical_url {
                    println!("raw: {}", result.raw_text);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(ScanEvent::Failed(error)) => {
            eprintln!("{error}");
            Ok(ExitCode::from(1))
        }
        Some(ScanEvent::Cancelled) | None => {
            eprintln!("scan cancelled");
            Ok(ExitCode::from(130))
        }
    }
}
