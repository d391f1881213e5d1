//! eDrum GW - real-time MIDI remapping gateway for e-drum controllers.
//!
//! Remaps pad hits on the fly (snare/hi-hat swap with pedal-aware
//! openness), and either loops the result back to the module or drives
//! a supervised software synth.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod engine;
mod midi;
mod mixer;
mod mute;
mod pedal;
mod ports;
mod remap;
mod synth;

use crate::config::{AppConfig, BackendMode};
use crate::engine::{EngineLoop, OutputSink};
use crate::mute::{LocalMute, RawMidiOut};
use crate::pedal::PedalTracker;
use crate::ports::PortBinder;
use crate::remap::Remapper;
use crate::synth::SynthSupervisor;

/// eDrum Gateway - remap pads in real time, drive a software synth
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Skip the synth backend and loop remapped events back to the device
    #[arg(long)]
    no_backend: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_ports {
        ports::list_ports()?;
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!("Loading configuration from {}", args.config.display());
        AppConfig::load(&args.config).await?
    } else {
        info!(
            "No config at {}, using built-in defaults",
            args.config.display()
        );
        AppConfig::default()
    };

    if args.no_backend {
        config.backend.mode = BackendMode::Loopback;
    }

    run_app(config, shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

async fn run_app(config: AppConfig, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
    // Build the pure pipeline first so a bad mapping fails before
    // anything external is touched.
    let remapper = Remapper::new(&config.remap, config.dynamic.as_ref())
        .context("Invalid remap configuration")?;
    let tracker = PedalTracker::new(config.pedal.clone());

    if let Some(mixer_cfg) = &config.mixer {
        mixer::set_levels(mixer_cfg).await;
    }

    let binder = PortBinder::new(
        config.midi.input_match.clone(),
        config.midi.exclude_match.clone(),
    );

    // Start the backend and resolve the output sink.
    let (mut supervisor, sink) = match config.backend.mode {
        BackendMode::Loopback => {
            let (conn, name) = binder
                .connect_output(&config.midi.input_match)
                .context("Failed to open device loopback output")?;
            info!("Loopback output: '{}'", name);
            (None, OutputSink::Device(conn))
        }
        BackendMode::Daemon => {
            let mut supervisor = SynthSupervisor::new(config.backend.clone(), config.channel);
            supervisor
                .start()
                .await
                .context("Failed to start synth backend")?;

            // The daemon registers its port asynchronously; poll for it
            // instead of trusting a fixed delay.
            let bound = binder
                .wait_for_output(
                    &config.backend.port_match,
                    config.backend.readiness_attempts,
                    config.backend.readiness_backoff_ms,
                )
                .await;
            match bound {
                Ok((conn, name)) => {
                    info!("Backend output port: '{}'", name);
                    (Some(supervisor), OutputSink::Device(conn))
                }
                Err(e) => {
                    supervisor.stop().await;
                    return Err(e.context("Backend port never appeared"));
                }
            }
        }
        BackendMode::Shell => {
            let mut supervisor = SynthSupervisor::new(config.backend.clone(), config.channel);
            supervisor
                .start()
                .await
                .context("Failed to start synth backend")?;
            info!("Backend command channel ready");
            (Some(supervisor), OutputSink::Backend)
        }
    };

    // Optional: silence the module's own voices while the backend plays.
    let mut mute = if config.local_mute.enabled
        && !config.local_mute.notes.is_empty()
        && config.backend.mode != BackendMode::Loopback
    {
        match binder.connect_output(&config.midi.input_match) {
            Ok((conn, name)) => {
                info!("Local mute on device '{}'", name);
                let mut mute = LocalMute::new(conn, config.channel, config.local_mute.notes.clone());
                mute.apply();
                Some(mute)
            }
            Err(e) => {
                warn!("Local mute unavailable (device output not found): {}", e);
                None
            }
        }
    } else {
        None
    };

    // Bind the controller input last; from here on events flow.
    let (tx, rx) = mpsc::channel(1000);
    let input = binder.connect_input(tx);
    let (input_conn, input_name) = match input {
        Ok(bound) => bound,
        Err(e) => {
            abort_startup(supervisor.as_mut(), mute.as_mut()).await;
            return Err(e.context("Failed to open drum controller input"));
        }
    };
    info!("Input: '{}'", input_name);

    let engine = EngineLoop::new(
        config.channel,
        tracker,
        remapper,
        rx,
        input_conn,
        sink,
        supervisor,
        mute,
    );
    engine.run(shutdown).await
}

/// Release path for a startup that got partway: voices muted or a
/// backend started before a later bind failed. Mirrors the engine's
/// drain so no exit leaves the device muted or the backend running.
async fn abort_startup<O: RawMidiOut>(
    supervisor: Option<&mut SynthSupervisor>,
    mute: Option<&mut LocalMute<O>>,
) {
    if let Some(mute) = mute {
        mute.restore();
    }
    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
