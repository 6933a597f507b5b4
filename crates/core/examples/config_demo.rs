//! Example demonstrating the configuration and preset management system
//!
//! Run with: cargo run --package troubadour-core --example config_demo

use std::path::PathBuf;
use troubadour_core::domain::config::{ConfigManager, PresetManager, TroubadourConfig};
use troubadour_core::domain::control::Command;
use troubadour_core::domain::mixer::MixerGraph;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("troubadour_core=debug,info")
        .init();

    println!("=== Troubadour Configuration Demo ===\n");

    let demo_dir = PathBuf::from("demo_config");

    // 1. Create factory default configuration
    println!("1. Creating factory default configuration...");
    let config = TroubadourConfig::factory_default();
    println!(
        "   ✓ Created configuration with {} channels",
        config.mixer.channels.len()
    );

    // 2. Save it through the config manager (atomic temp-file save)
    println!("\n2. Saving configuration...");
    let config_manager = ConfigManager::new(demo_dir.clone());
    config_manager.save(&config).await?;
    println!("   ✓ Configuration saved to {}", config_manager.config_path().display());

    // 3. Strict load: parse + engine-parameter validation
    println!("\n3. Loading configuration back (validated)...");
    let loaded_config = config_manager.try_load().await?;
    println!(
        "   ✓ Loaded configuration with {} channels",
        loaded_config.mixer.channels.len()
    );

    // 4. Display channel information
    println!("\n4. Channel configuration:");
    for (i, channel) in loaded_config.mixer.channels.iter().enumerate() {
        println!(
            "   {}. {} - Volume: {} dB, Muted: {}, Buses: {:?}",
            i + 1,
            channel.name,
            channel.volume_db,
            channel.muted,
            channel.bus_ids
        );
    }

    // 5. Build a mixer graph from the configuration
    println!("\n5. Building mixer graph from configuration...");
    let mut graph = MixerGraph::new();
    let version = graph.apply_snapshot(&loaded_config.mixer.to_snapshot())?;
    println!(
        "   ✓ Graph at version {} with {} channels",
        version,
        graph.channels().count()
    );

    // 6. Preset management: presets carry only the mixer layout
    println!("\n6. Preset management:");
    let preset_manager = PresetManager::new(demo_dir.join("presets"));

    println!("   Saving the live layout as preset 'my_preset'...");
    preset_manager
        .save_preset("my_preset", &graph.snapshot())
        .await?;

    println!("   Listing available presets...");
    for preset in preset_manager.list_presets().await? {
        println!("   - {}", preset);
    }

    println!("   Loading preset 'my_preset'...");
    let mixer = preset_manager.load_preset("my_preset").await?;
    println!(
        "   ✓ Loaded preset with {} channels and {} buses",
        mixer.channels.len(),
        mixer.buses.len()
    );

    // 7. The command wire format
    println!("\n7. Command wire format:");
    let commands = vec![
        Command::SetVolume {
            channel_id: "mic".to_string(),
            volume_db: -6.0,
        },
        Command::ToggleMute {
            channel_id: "music".to_string(),
        },
        Command::SetChannelBuses {
            channel_id: "mic".to_string(),
            bus_ids: vec!["main".to_string()],
        },
    ];
    for cmd in commands {
        println!("   {}", serde_json::to_string(&cmd)?);
    }

    println!("\n=== Demo Complete ===");

    // Cleanup
    std::fs::remove_dir_all(demo_dir)?;

    Ok(())
}
