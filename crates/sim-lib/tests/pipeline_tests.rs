//! Full-run properties of the simulation pipeline over synthetic traffic

use sim_lib::config::{SimulationConfig, UnavailablePolicy};
use sim_lib::drift::AlertKind;
use sim_lib::models::{DriftStatus, MetricRecord};
use sim_lib::orchestrator::{simulate, TickEvent};
use sim_lib::source::{MetricSource, ReplaySource, SyntheticSource};
use tempfile::tempdir;

fn config(cells: usize, phase_length: u64) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.source.cells = cells;
    config.source.phase_length = phase_length;
    config
}

fn records(config: &SimulationConfig, ticks: u64) -> Vec<MetricRecord> {
    let mut source = SyntheticSource::new(config.source.clone()).with_limit(ticks);
    std::iter::from_fn(|| source.next_record()).collect()
}

fn run(config: &SimulationConfig, ticks: u64) -> Vec<TickEvent> {
    simulate(config.clone(), records(config, ticks)).unwrap()
}

#[test]
fn test_identical_runs_produce_identical_events() {
    let config = config(4, 100);
    let first = run(&config, 400);
    let second = run(&config, 400);

    assert_eq!(first.len(), 400);
    assert_eq!(first, second);
}

#[test]
fn test_different_seeds_diverge() {
    let config_a = config(4, 100);
    let mut config_b = config_a.clone();
    config_b.source.seed = 7;

    assert_ne!(run(&config_a, 50), run(&config_b, 50));
}

#[test]
fn test_plans_respect_capacity_and_floor_for_whole_run() {
    let config = config(10, 500);
    let events = run(&config, 2000);
    let allocator = &config.allocator;

    for event in &events {
        assert_eq!(event.plan.cells.len(), 10, "tick {}", event.tick);
        for (resource, capacity) in &allocator.capacity {
            let total = event.plan.total_share(resource);
            assert!(
                total <= capacity + 1e-6,
                "tick {}: {} total {} exceeds {}",
                event.tick,
                resource,
                total,
                capacity
            );
            for share in event.plan.shares_of(resource) {
                assert!(share >= allocator.min_share - 1e-9, "tick {}", event.tick);
            }
        }
    }
}

#[test]
fn test_events_are_ordered_and_alerts_follow_transitions() {
    let config = config(6, 300);
    let events = run(&config, 1200);

    let mut previous_status = DriftStatus::Stable;
    let mut previous_tick = 0;
    for event in &events {
        assert!(event.tick > previous_tick);
        previous_tick = event.tick;

        if let Some(alert) = &event.alert {
            assert_ne!(alert.cause.status, previous_status, "tick {}", event.tick);
            let expected = match alert.kind {
                AlertKind::DriftSuspected => DriftStatus::Warning,
                AlertKind::DriftConfirmed => DriftStatus::Drifting,
                AlertKind::DriftResolved => DriftStatus::Stable,
                AlertKind::DataDrift => panic!("input drift alert on the residual path"),
            };
            assert_eq!(event.drift.status, expected);
        } else {
            // unannounced transitions are only DRIFTING -> WARNING
            if event.drift.status != previous_status {
                assert_eq!(previous_status, DriftStatus::Drifting);
                assert_eq!(event.drift.status, DriftStatus::Warning);
            }
        }
        previous_status = event.drift.status;
    }
}

#[test]
fn test_data_drift_phase_flags_latency() {
    let config = config(6, 300);
    let events = run(&config, 600);

    let data_alerts: Vec<_> = events.iter().flat_map(|e| e.data_alerts.iter()).collect();
    assert!(data_alerts.iter().all(|a| a.kind == AlertKind::DataDrift));

    let latency = data_alerts
        .iter()
        .find(|a| a.feature.as_ref().is_some_and(|f| f.feature == "latency_ms"))
        .expect("latency shift in the data drift phase");
    assert!(latency.tick > 300, "tick {}", latency.tick);
    assert!(latency.feature.as_ref().unwrap().psi > config.data_drift.psi_threshold);
}

#[test]
fn test_model_replaces_fallback_after_first_refit() {
    let mut config = config(3, 500);
    config.predictor.retrain_every = 25;
    let events = run(&config, 60);

    assert!(events[..24].iter().all(|e| e.prediction.fallback));
    assert!(events[24..].iter().all(|e| !e.prediction.fallback));
    assert_eq!(events[59].prediction.model_version, "linear-v2");
}

#[test]
fn test_skip_policy_emits_no_events_until_trained() {
    let mut config = config(3, 500);
    config.predictor.retrain_every = 25;
    config.predictor.unavailable_policy = UnavailablePolicy::Skip;
    let events = run(&config, 60);

    assert_eq!(events.len(), 60 - 24);
    assert_eq!(events[0].tick, 25);
    assert!(events.iter().all(|e| !e.prediction.fallback));
}

#[test]
fn test_replayed_corpus_reproduces_synthetic_run() {
    let config = config(3, 50);
    let corpus = records(&config, 150);

    let dir = tempdir().unwrap();
    let path = dir.path().join("corpus.jsonl");
    ReplaySource::save_jsonl(&path, &corpus).unwrap();

    let mut replay = ReplaySource::from_jsonl(&path).unwrap();
    let replayed: Vec<MetricRecord> = std::iter::from_fn(|| replay.next_record()).collect();

    assert_eq!(
        simulate(config.clone(), replayed).unwrap(),
        simulate(config, corpus).unwrap()
    );
}
