//! Integration tests for the control surface
//!
//! Drives `MixerController` over a mock device backend: command sequences,
//! typed failures, snapshot versioning, preset and config round-trips. No
//! real audio devices are touched; stream reconciliation directives go to a
//! channel nobody drains, exactly as if the engine thread were busy.

use crossbeam::channel::{unbounded, Receiver};
use std::sync::Arc;
use tempfile::TempDir;
use troubadour_core::domain::audio::{
    AudioEnumerator, AudioError, DeviceId, DeviceInfo, DeviceType,
};
use troubadour_core::domain::config::{ConfigManager, PresetManager};
use troubadour_core::domain::control::{Command, ControlError, Reply};
use troubadour_infra::audio::{EngineRuntime, EngineShared, MixerController, StreamDirective};

/// Enumerator backed by two fixed fake devices
struct MockEnumerator;

impl MockEnumerator {
    fn mic() -> DeviceInfo {
        DeviceInfo {
            id: DeviceId::new("Mock Microphone"),
            name: "Mock Microphone".to_string(),
            device_type: DeviceType::Input,
            sample_rates: vec![44_100, 48_000],
            channel_counts: vec![1, 2],
            default_sample_rate: Some(48_000),
        }
    }

    fn speakers() -> DeviceInfo {
        DeviceInfo {
            id: DeviceId::new("Mock Speakers"),
            name: "Mock Speakers".to_string(),
            device_type: DeviceType::Output,
            sample_rates: vec![48_000, 96_000],
            channel_counts: vec![2],
            default_sample_rate: Some(48_000),
        }
    }
}

impl AudioEnumerator for MockEnumerator {
    fn devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(vec![Self::mic(), Self::speakers()])
    }

    fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(vec![Self::mic()])
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(vec![Self::speakers()])
    }

    fn default_input_device(&self) -> Result<DeviceInfo, AudioError> {
        Ok(Self::mic())
    }

    fn default_output_device(&self) -> Result<DeviceInfo, AudioError> {
        Ok(Self::speakers())
    }

    fn device_by_id(&self, id: &DeviceId) -> Result<DeviceInfo, AudioError> {
        self.devices()?
            .into_iter()
            .find(|d| d.id == *id)
            .ok_or_else(|| AudioError::DeviceNotFound(id.as_str().to_string()))
    }
}

struct Fixture {
    controller: MixerController,
    /// Directives the engine thread would drain; kept alive, never read
    _directives: Receiver<StreamDirective>,
    _dirs: TempDir,
}

fn fixture() -> Fixture {
    let dirs = TempDir::new().unwrap();
    let runtime = EngineRuntime {
        sample_rate: 48_000,
        frames_per_block: 512,
        meter_decay: 12.0,
    };
    let shared = EngineShared::new(runtime);
    let (directives, directives_rx) = unbounded();

    let controller = MixerController::new(
        shared,
        Arc::new(MockEnumerator),
        directives,
        PresetManager::new(dirs.path().join("presets")),
        ConfigManager::new(dirs.path().join("config")),
    );
    Fixture {
        controller,
        _directives: directives_rx,
        _dirs: dirs,
    }
}

// ============================================================================
// COMMAND SEQUENCES AND TYPED FAILURES
// ============================================================================

#[test]
fn add_route_and_inspect_channels() {
    let f = fixture();
    let c = &f.controller;

    c.add_bus("main", "Main").unwrap();
    c.add_channel("mic", "Microphone").unwrap();
    c.set_channel_buses("mic", &["main".to_string()]).unwrap();
    c.set_volume("mic", -6.0).unwrap();

    let snapshot = c.snapshot().unwrap();
    let mic = snapshot.channel("mic").unwrap();
    assert_eq!(mic.volume_db, -6.0);
    assert_eq!(mic.bus_ids, vec!["main".to_string()]);
    assert!(snapshot.master().is_some());
    assert_eq!(snapshot.buses.len(), 1);
}

#[test]
fn typed_failures_map_to_error_kinds() {
    let f = fixture();
    let c = &f.controller;

    // Validation: bad id characters
    assert!(matches!(
        c.add_channel("has space", "X"),
        Err(ControlError::Validation(_))
    ));

    // NotFound: unknown channel
    assert!(matches!(
        c.set_volume("ghost", 0.0),
        Err(ControlError::NotFound(_))
    ));

    // Conflict: duplicate id
    c.add_channel("mic", "Mic").unwrap();
    assert!(matches!(
        c.add_channel("mic", "Mic Again"),
        Err(ControlError::Conflict(_))
    ));

    // Conflict: master is not removable
    assert!(matches!(
        c.remove_channel("master"),
        Err(ControlError::Conflict(_))
    ));

    // Validation: non-finite volume
    assert!(matches!(
        c.set_volume("mic", f32::NAN),
        Err(ControlError::Validation(_))
    ));

    // NotFound: unknown device on assignment
    assert!(matches!(
        c.set_channel_input_device("mic", Some("No Such Device")),
        Err(ControlError::NotFound(_))
    ));

    // A failed command must not have mutated anything
    let snapshot = c.snapshot().unwrap();
    let mic = snapshot.channel("mic").unwrap();
    assert_eq!(mic.volume_db, 0.0);
    assert!(mic.input_device.is_none());
}

#[test]
fn device_assignment_against_mock_backend() {
    let f = fixture();
    let c = &f.controller;

    c.add_channel("mic", "Mic").unwrap();
    c.set_channel_input_device("mic", Some("Mock Microphone"))
        .unwrap();
    assert_eq!(
        c.get_channel_input_device("mic").unwrap(),
        Some("Mock Microphone".to_string())
    );

    c.add_bus("main", "Main").unwrap();
    c.set_bus_output_device("main", Some("Mock Speakers"))
        .unwrap();

    // Output devices are not valid capture sources
    assert!(matches!(
        c.set_channel_input_device("mic", Some("Mock Speakers")),
        Err(ControlError::NotFound(_))
    ));

    // Clearing an assignment is always valid
    c.set_channel_input_device("mic", None).unwrap();
    assert_eq!(c.get_channel_input_device("mic").unwrap(), None);
}

#[test]
fn master_accepts_output_device_and_volume() {
    let f = fixture();
    let c = &f.controller;

    c.set_bus_output_device("master", Some("Mock Speakers"))
        .unwrap();
    c.set_volume("master", -3.0).unwrap();
    let (_, muted) = c.toggle_mute("master").unwrap();
    assert!(muted);

    // Solo has no meaning on the sink
    assert!(matches!(
        c.toggle_solo("master"),
        Err(ControlError::Conflict(_))
    ));

    let master = c.snapshot().unwrap().master().cloned().unwrap();
    assert_eq!(master.volume_db, -3.0);
    assert!(master.muted);
    assert_eq!(master.output_device, Some("Mock Speakers".to_string()));
}

#[test]
fn every_mutation_advances_the_version() {
    let f = fixture();
    let c = &f.controller;

    let mut last = c.snapshot().unwrap().version;
    for version in [
        c.add_bus("main", "Main").unwrap(),
        c.add_channel("mic", "Mic").unwrap(),
        c.set_volume("mic", -1.0).unwrap(),
        c.toggle_mute("mic").unwrap().0,
        c.toggle_solo("mic").unwrap().0,
        c.set_channel_buses("mic", &["main".to_string()]).unwrap(),
        c.set_bus_volume("main", -2.0).unwrap(),
        c.toggle_bus_mute("main").unwrap().0,
        c.remove_channel("mic").unwrap(),
        c.remove_bus("main").unwrap(),
    ] {
        assert!(version > last, "version {} did not advance {}", version, last);
        last = version;
    }

    assert_eq!(c.snapshot().unwrap().version, last);
}

#[test]
fn remove_bus_prunes_and_remove_channel_forgets() {
    let f = fixture();
    let c = &f.controller;

    c.add_bus("main", "Main").unwrap();
    c.add_channel("mic", "Mic").unwrap();
    c.set_channel_buses("mic", &["main".to_string()]).unwrap();

    c.remove_bus("main").unwrap();
    assert!(c.get_channel_buses("mic").unwrap().is_empty());

    c.remove_channel("mic").unwrap();
    assert!(matches!(
        c.get_channel_buses("mic"),
        Err(ControlError::NotFound(_))
    ));
}

// ============================================================================
// TAGGED DISPATCH
// ============================================================================

#[tokio::test]
async fn dispatch_covers_queries_and_mutations() {
    let f = fixture();
    let c = &f.controller;

    match c.dispatch(Command::ListInputDevices).await.unwrap() {
        Reply::Devices { devices } => {
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].name, "Mock Microphone");
        }
        other => panic!("unexpected reply {:?}", other),
    }

    let reply = c
        .dispatch(Command::AddChannel {
            id: "mic".into(),
            name: "Microphone".into(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Version { .. }));

    match c.dispatch(Command::GetChannels).await.unwrap() {
        Reply::Channels { channels } => {
            // The added strip plus the master
            assert_eq!(channels.len(), 2);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    match c
        .dispatch(Command::ToggleMute {
            channel_id: "mic".into(),
        })
        .await
        .unwrap()
    {
        Reply::Toggled { on, .. } => assert!(on),
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn dispatch_json_rejects_unknown_kind() {
    let f = fixture();
    let result = f
        .controller
        .dispatch_json(r#"{"kind":"defragment-mixer"}"#)
        .await;
    assert!(matches!(result, Err(ControlError::Validation(_))));

    // A known kind passes through the same path
    let reply = f
        .controller
        .dispatch_json(r#"{"kind":"add-channel","id":"mic","name":"Mic"}"#)
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Version { .. }));
}

// ============================================================================
// PRESETS AND CONFIG
// ============================================================================

#[tokio::test]
async fn preset_lifecycle_through_dispatch() {
    let f = fixture();
    let c = &f.controller;

    c.add_bus("main", "Main").unwrap();
    c.add_channel("mic", "Mic").unwrap();
    c.set_channel_buses("mic", &["main".to_string()]).unwrap();
    c.set_volume("mic", -9.0).unwrap();

    match c
        .dispatch(Command::SavePreset {
            name: "streaming".into(),
        })
        .await
        .unwrap()
    {
        Reply::Version { .. } => {}
        other => panic!("unexpected reply {:?}", other),
    }

    match c.dispatch(Command::ListPresets).await.unwrap() {
        Reply::Presets { names } => assert_eq!(names, vec!["streaming".to_string()]),
        other => panic!("unexpected reply {:?}", other),
    }

    // Wreck the live state, then restore from the preset
    c.set_volume("mic", 6.0).unwrap();
    c.remove_bus("main").unwrap();

    c.dispatch(Command::LoadPreset {
        name: "streaming".into(),
    })
    .await
    .unwrap();

    let snapshot = c.snapshot().unwrap();
    assert_eq!(snapshot.channel("mic").unwrap().volume_db, -9.0);
    assert_eq!(
        snapshot.channel("mic").unwrap().bus_ids,
        vec!["main".to_string()]
    );

    assert!(matches!(
        c.load_preset("nonexistent").await,
        Err(ControlError::NotFound(_))
    ));

    c.delete_preset("streaming").await.unwrap();
    assert!(c.list_presets().await.unwrap().is_empty());
}

#[tokio::test]
async fn config_save_and_load_roundtrip() {
    let f = fixture();
    let c = &f.controller;

    c.add_bus("main", "Main").unwrap();
    c.add_channel("mic", "Mic").unwrap();
    c.set_channel_buses("mic", &["main".to_string()]).unwrap();
    c.toggle_mute("mic").unwrap();

    c.save_config().await.unwrap();

    // Blow the state away, then load the saved config back
    c.remove_channel("mic").unwrap();
    c.remove_bus("main").unwrap();
    assert!(c.snapshot().unwrap().channel("mic").is_none());

    c.load_config().await.unwrap();
    let snapshot = c.snapshot().unwrap();
    assert!(snapshot.channel("mic").unwrap().muted);
    assert_eq!(snapshot.buses.len(), 1);
}

#[test]
fn legacy_narrow_volume_range_loads_by_clamping() {
    // Presets written by builds with the -60..+6 range (or hand-edited
    // beyond the current range) load with volumes clamped, not rejected.
    let f = fixture();
    let c = &f.controller;

    let mut snapshot = c.snapshot().unwrap();
    snapshot.channels.insert(
        0,
        troubadour_core::domain::control::ChannelState {
            id: "legacy".into(),
            name: "Legacy".into(),
            volume_db: 42.0,
            muted: false,
            solo: false,
            input_device: None,
            output_device: None,
            bus_ids: vec![],
            effects: Default::default(),
            is_master: false,
            level_db: -60.0,
            peak_db: -60.0,
            device_error: None,
            overruns: 0,
        },
    );

    c.load_snapshot(&snapshot).unwrap();
    assert_eq!(c.snapshot().unwrap().channel("legacy").unwrap().volume_db, 18.0);
}
