//! Integration tests for the mixer graph
//!
//! These tests verify the complete processing pass from channel inputs to
//! bus outputs: gain, mute, solo, membership routing, metering and snapshot
//! round-trips.

use std::collections::HashMap;
use troubadour_core::domain::config::MixerConfig;
use troubadour_core::domain::control::ControlError;
use troubadour_core::domain::dsp::{EffectConfig, EffectsChainProcessor};
use troubadour_core::domain::mixer::{
    db_to_gain, BusId, ChannelId, Decibels, LevelMeter, MixerGraph,
};

fn cid(s: &str) -> ChannelId {
    ChannelId::new(s).unwrap()
}

fn bid(s: &str) -> BusId {
    BusId::new(s).unwrap()
}

fn run_block(graph: &mut MixerGraph, feeds: &[(&str, &[f32])], block_len: usize) -> HashMap<BusId, Vec<f32>> {
    let mut inputs: HashMap<ChannelId, &[f32]> = HashMap::new();
    for (id, buf) in feeds {
        inputs.insert(cid(id), buf);
    }
    let mut effects = HashMap::new();
    graph.process(&inputs, &mut effects, block_len).clone()
}

// ============================================================================
// END-TO-END MIXING SCENARIOS
// ============================================================================

#[test]
fn scenario_silent_by_default() {
    // A channel with no bus membership reaches no bus but is still metered
    let mut graph = MixerGraph::new();
    graph.add_channel("mic", "Mic").unwrap();
    graph.add_bus("main", "Main").unwrap();

    let ones = vec![1.0f32; 64];
    let outputs = run_block(&mut graph, &[("mic", &ones)], 64);

    for (_, buffer) in outputs.iter() {
        assert!(buffer.iter().all(|&s| s == 0.0));
    }
    // Unity input through unity gain: RMS near 0 dB
    assert!(graph.channel(&cid("mic")).unwrap().level.level_db.abs() < 0.1);
}

#[test]
fn scenario_unity_passthrough() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_channel("mic", "Mic").unwrap();
    graph.set_channel_buses(&cid("mic"), vec![bid("main")]).unwrap();

    let signal = vec![0.5f32, -0.5, 0.5, -0.5];
    let outputs = run_block(&mut graph, &[("mic", &signal)], 4);

    let main = &outputs[&bid("main")];
    for (out, expected) in main.iter().zip(signal.iter()) {
        assert!((out - expected).abs() < 1e-6);
    }

    let bus = graph.bus(&bid("main")).unwrap();
    assert!((bus.level.peak_db - (-6.02)).abs() < 0.1);
}

#[test]
fn scenario_gain_attenuation() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_channel("mic", "Mic").unwrap();
    graph.set_channel_buses(&cid("mic"), vec![bid("main")]).unwrap();
    graph.set_channel_volume(&cid("mic"), -6.0).unwrap();

    let ones = vec![1.0f32; 4];
    let outputs = run_block(&mut graph, &[("mic", &ones)], 4);

    for &s in outputs[&bid("main")].iter() {
        assert!((s - 0.5012).abs() < 0.01);
    }
}

#[test]
fn scenario_solo_isolates() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_channel("a", "A").unwrap();
    graph.add_channel("b", "B").unwrap();
    graph.set_channel_buses(&cid("a"), vec![bid("main")]).unwrap();
    graph.set_channel_buses(&cid("b"), vec![bid("main")]).unwrap();
    graph.toggle_channel_solo(&cid("a")).unwrap();

    let ones = vec![1.0f32; 32];
    let outputs = run_block(&mut graph, &[("a", &ones), ("b", &ones)], 32);

    for &s in outputs[&bid("main")].iter() {
        assert!((s - 1.0).abs() < 1e-6);
    }
    assert_eq!(
        graph.channel(&cid("b")).unwrap().level.level_db,
        LevelMeter::FLOOR_DB
    );
}

#[test]
fn scenario_mute_is_hard() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_channel("a", "A").unwrap();
    graph.set_channel_buses(&cid("a"), vec![bid("main")]).unwrap();
    graph.set_channel_volume(&cid("a"), 18.0).unwrap();
    graph.toggle_channel_mute(&cid("a")).unwrap();

    let ones = vec![1.0f32; 16];
    let outputs = run_block(&mut graph, &[("a", &ones)], 16);

    assert!(outputs[&bid("main")].iter().all(|&s| s == 0.0));
}

#[test]
fn scenario_snapshot_roundtrip_through_toml() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_bus("cue", "Cue").unwrap();
    graph.add_channel("mic", "Microphone").unwrap();
    graph.add_channel("music", "Music").unwrap();
    graph.add_channel("game", "Game").unwrap();
    graph.set_channel_volume(&cid("mic"), -3.0).unwrap();
    graph.set_channel_volume(&cid("music"), -12.5).unwrap();
    graph.toggle_channel_mute(&cid("game")).unwrap();
    graph.toggle_channel_solo(&cid("music")).unwrap();
    graph
        .set_channel_buses(&cid("mic"), vec![bid("main"), bid("cue")])
        .unwrap();
    graph.set_channel_buses(&cid("music"), vec![bid("main")]).unwrap();
    graph.set_bus_volume(&bid("cue"), -6.0).unwrap();
    graph.set_channel_volume(&cid("master"), 2.0).unwrap();

    // Serialize the snapshot as a TOML mixer section and read it back
    let snapshot = graph.snapshot();
    let config = MixerConfig::from_snapshot(&snapshot);
    let text = toml::to_string_pretty(&config).unwrap();
    let parsed: MixerConfig = toml::from_str(&text).unwrap();

    let mut restored = MixerGraph::new();
    restored.apply_snapshot(&parsed.to_snapshot()).unwrap();
    let restored_snapshot = restored.snapshot();

    // Equal modulo version and observables
    assert_eq!(snapshot.channels.len(), restored_snapshot.channels.len());
    assert_eq!(snapshot.buses.len(), restored_snapshot.buses.len());
    for (a, b) in snapshot
        .channels
        .iter()
        .zip(restored_snapshot.channels.iter())
    {
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, b.name);
        assert_eq!(a.volume_db, b.volume_db);
        assert_eq!(a.muted, b.muted);
        assert_eq!(a.solo, b.solo);
        assert_eq!(a.bus_ids, b.bus_ids);
        assert_eq!(a.is_master, b.is_master);
    }
    for (a, b) in snapshot.buses.iter().zip(restored_snapshot.buses.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.volume_db, b.volume_db);
        assert_eq!(a.muted, b.muted);
    }
}

// ============================================================================
// QUANTIFIED PROPERTIES
// ============================================================================

#[test]
fn property_decibel_construction_clamps_finite() {
    let mut db = -120.0f32;
    while db <= 80.0 {
        let value = Decibels::new(db).unwrap();
        assert_eq!(value.db(), db.clamp(-60.0, 18.0));
        db += 0.37;
    }

    for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        assert!(matches!(
            Decibels::new(bad),
            Err(ControlError::Validation(_))
        ));
    }
}

#[test]
fn property_muted_channel_contributes_exact_zero() {
    for gain in [-60.0f32, -6.0, 0.0, 18.0] {
        let mut graph = MixerGraph::new();
        graph.add_bus("main", "Main").unwrap();
        graph.add_channel("a", "A").unwrap();
        graph.add_channel("ref", "Ref").unwrap();
        graph.set_channel_buses(&cid("a"), vec![bid("main")]).unwrap();
        graph.set_channel_buses(&cid("ref"), vec![bid("main")]).unwrap();
        graph.set_channel_volume(&cid("a"), gain).unwrap();
        graph.toggle_channel_mute(&cid("a")).unwrap();

        let loud = vec![1.0f32; 8];
        let quiet = vec![0.25f32; 8];
        let outputs = run_block(&mut graph, &[("a", &loud), ("ref", &quiet)], 8);

        // Sample for sample, only the reference channel remains
        for &s in outputs[&bid("main")].iter() {
            assert_eq!(s, 0.25);
        }
    }
}

#[test]
fn property_solo_zeroes_all_non_solo() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    for id in ["a", "b", "c", "d"] {
        graph.add_channel(id, id).unwrap();
        graph.set_channel_buses(&cid(id), vec![bid("main")]).unwrap();
    }
    graph.toggle_channel_solo(&cid("b")).unwrap();

    let ones = vec![1.0f32; 8];
    let outputs = run_block(
        &mut graph,
        &[("a", &ones), ("b", &ones), ("c", &ones), ("d", &ones)],
        8,
    );

    // Only the soloed channel contributes
    for &s in outputs[&bid("main")].iter() {
        assert!((s - 1.0).abs() < 1e-6);
    }
    for id in ["a", "c", "d"] {
        assert_eq!(
            graph.channel(&cid(id)).unwrap().level.level_db,
            LevelMeter::FLOOR_DB
        );
    }
}

#[test]
fn property_attenuating_gain_bounds_output() {
    for gain_db in [-60.0f32, -24.0, -12.0, -6.0, -1.0, 0.0] {
        let mut graph = MixerGraph::new();
        graph.add_bus("main", "Main").unwrap();
        graph.add_channel("a", "A").unwrap();
        graph.set_channel_buses(&cid("a"), vec![bid("main")]).unwrap();
        graph.set_channel_volume(&cid("a"), gain_db).unwrap();

        // Signal bounded by |x| <= 1
        let signal: Vec<f32> = (0..64)
            .map(|i| ((i as f32 * 0.7).sin()).clamp(-1.0, 1.0))
            .collect();
        let outputs = run_block(&mut graph, &[("a", &signal)], 64);

        let bound = db_to_gain(gain_db) + 1e-6;
        for &s in outputs[&bid("main")].iter() {
            assert!(s.abs() <= bound, "|{}| > {} at {} dB", s, bound, gain_db);
        }
    }
}

#[test]
fn property_membership_always_resolves() {
    // A deterministic pseudo-random command soak: at every step, every bus
    // id referenced by any channel's membership exists in the bus table.
    let mut graph = MixerGraph::new();
    let mut rng = 0x2545F491u64;
    let mut next = move || {
        rng ^= rng << 13;
        rng ^= rng >> 7;
        rng ^= rng << 17;
        rng
    };

    let channel_names = ["a", "b", "c", "d", "e"];
    let bus_names = ["m1", "m2", "m3"];

    for _ in 0..500 {
        match next() % 6 {
            0 => {
                let id = channel_names[(next() % 5) as usize];
                let _ = graph.add_channel(id, id);
            }
            1 => {
                let id = channel_names[(next() % 5) as usize];
                let _ = graph.remove_channel(&cid(id));
            }
            2 => {
                let id = bus_names[(next() % 3) as usize];
                let _ = graph.add_bus(id, id);
            }
            3 => {
                let id = bus_names[(next() % 3) as usize];
                let _ = graph.remove_bus(&bid(id));
            }
            4 => {
                let ch = channel_names[(next() % 5) as usize];
                let wanted: Vec<BusId> = bus_names
                    .iter()
                    .filter(|_| next() % 2 == 0)
                    .map(|b| bid(b))
                    .collect();
                let _ = graph.set_channel_buses(&cid(ch), wanted);
            }
            _ => {
                let ch = channel_names[(next() % 5) as usize];
                let _ = graph.set_channel_volume(&cid(ch), (next() % 80) as f32 - 70.0);
            }
        }

        for channel in graph.channels() {
            for bus_id in &channel.bus_ids {
                assert!(
                    graph.bus(bus_id).is_some(),
                    "dangling membership {} -> {}",
                    channel.id,
                    bus_id
                );
            }
        }
    }
}

#[test]
fn property_snapshot_version_monotonic() {
    let mut graph = MixerGraph::new();
    let v0 = graph.snapshot().version;
    let v0_again = graph.snapshot().version;
    assert_eq!(v0, v0_again);

    graph.add_channel("a", "A").unwrap();
    let v1 = graph.snapshot().version;
    assert!(v1 > v0);

    graph.set_channel_volume(&cid("a"), -3.0).unwrap();
    let v2 = graph.snapshot().version;
    assert!(v2 > v1);

    // No mutation, same version and same contents
    let s1 = graph.snapshot();
    let s2 = graph.snapshot();
    assert_eq!(s1, s2);
}

// ============================================================================
// EFFECTS IN THE PROCESSING PATH
// ============================================================================

#[test]
fn effects_run_before_gain_and_sum() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_channel("a", "A").unwrap();
    graph.set_channel_buses(&cid("a"), vec![bid("main")]).unwrap();
    graph.set_channel_volume(&cid("a"), -6.0).unwrap();

    // A -6 dB trim in the chain stacks with the -6 dB fader
    let mut channel_effects = troubadour_core::domain::dsp::EffectsChain::new();
    channel_effects.push(EffectConfig::Trim { db: -6.0 });
    let mut effects = HashMap::new();
    effects.insert(
        cid("a"),
        EffectsChainProcessor::build(&channel_effects, 48_000),
    );

    let ones = vec![1.0f32; 8];
    let mut inputs: HashMap<ChannelId, &[f32]> = HashMap::new();
    inputs.insert(cid("a"), &ones);
    let outputs = graph.process(&inputs, &mut effects, 8);

    let expected = db_to_gain(-6.0) * db_to_gain(-6.0);
    for &s in outputs[&bid("main")].iter() {
        assert!((s - expected).abs() < 0.01);
    }
}

#[test]
fn channel_on_multiple_buses_feeds_all() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_bus("cue", "Cue").unwrap();
    graph.add_channel("a", "A").unwrap();
    graph
        .set_channel_buses(&cid("a"), vec![bid("main"), bid("cue"), graph.master_id()])
        .unwrap();

    let signal = vec![0.25f32; 8];
    let outputs = run_block(&mut graph, &[("a", &signal)], 8);

    assert_eq!(outputs[&bid("main")], outputs[&bid("cue")]);
    assert_eq!(outputs[&bid("main")], outputs[&graph.master_id()]);
}

#[test]
fn missing_input_decays_meter() {
    let mut graph = MixerGraph::new();
    graph.add_bus("main", "Main").unwrap();
    graph.add_channel("a", "A").unwrap();
    graph.set_channel_buses(&cid("a"), vec![bid("main")]).unwrap();

    let ones = vec![1.0f32; 512];
    run_block(&mut graph, &[("a", &ones)], 512);
    let peak_after_signal = graph.channel(&cid("a")).unwrap().level.peak_db;
    assert!(peak_after_signal.abs() < 0.1);

    // Channel present in the graph, absent from inputs: silence, decay
    for _ in 0..10 {
        run_block(&mut graph, &[], 512);
    }
    let channel = graph.channel(&cid("a")).unwrap();
    assert_eq!(channel.level.level_db, LevelMeter::FLOOR_DB);
    assert!(channel.level.peak_db < peak_after_signal);
}
