//! Troubadour CLI application
//!
//! Boots the engine from the persisted configuration, wires the control
//! surface and runs until interrupted. Exit code is non-zero on any fatal
//! initialization failure (no audio subsystem, unusable config directory).

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use troubadour_core::domain::audio::AudioEnumerator;
use troubadour_core::domain::config::{ConfigManager, PresetManager};
use troubadour_core::domain::control::EngineEvent;
use troubadour_infra::audio::{
    AudioEngine, CpalEnumerator, EngineRuntime, EngineShared, MixerController,
};

#[derive(Parser)]
#[command(name = "troubadour")]
#[command(about = "A modern virtual audio mixer", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "troubadour=debug,info"
    } else {
        "troubadour=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    info!("🎼 Troubadour starting...");

    let enumerator = Arc::new(CpalEnumerator::new());

    if cli.list_devices {
        let devices = enumerator
            .devices()
            .context("failed to enumerate audio devices")?;
        for device in devices {
            println!(
                "{:7} {}  (rates: {:?}, channels: {:?})",
                format!("{:?}", device.device_type),
                device.name,
                device.sample_rates,
                device.channel_counts
            );
        }
        return Ok(());
    }

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir().context("no usable config directory")?,
    };
    // An unusable config file is quarantined and replaced by the factory
    // default, so the parameters below are always runnable
    let config = ConfigManager::new(config_dir.clone()).load().await;

    let runtime = EngineRuntime::from(&config.app);
    let shared = EngineShared::new(runtime);
    let engine = AudioEngine::start(Arc::clone(&enumerator), Arc::clone(&shared))
        .context("failed to start audio engine")?;

    let preset_dir = if config.app.preset_directory.is_absolute() {
        config.app.preset_directory.clone()
    } else {
        config_dir.join(&config.app.preset_directory)
    };

    let controller = Arc::new(MixerController::new(
        shared,
        enumerator,
        engine.directive_sender(),
        PresetManager::new(preset_dir),
        ConfigManager::new(config_dir),
    ));

    let version = controller
        .load_snapshot(&config.mixer.to_snapshot())
        .context("persisted mixer configuration is invalid")?;
    info!(version, "Mixer configuration applied");

    let _watcher = controller
        .spawn_preset_watcher()
        .await
        .context("failed to watch preset directory")?;

    // Surface asynchronous engine trouble in the log
    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::DeviceError {
                    entity,
                    device,
                    message,
                } => warn!(entity, device, "Device error: {}", message),
                EngineEvent::PresetsInvalidated => info!("Preset directory changed"),
            }
        }
    });

    if config.app.auto_save_interval_seconds > 0 {
        let saver = Arc::clone(&controller);
        let interval = std::time::Duration::from_secs(config.app.auto_save_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = saver.save_config().await {
                    warn!("Auto-save failed: {}", e);
                }
            }
        });
    }

    info!("Troubadour running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    if let Err(e) = controller.save_config().await {
        warn!("Failed to persist mixer state: {}", e);
    }
    engine.shutdown();

    Ok(())
}
