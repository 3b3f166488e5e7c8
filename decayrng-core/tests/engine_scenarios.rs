//! End-to-end behaviour of the engine over realistic interval streams

use decayrng_core::protocol::Phase;
use decayrng_core::{DriftPolicy, Engine, EngineConfig, Observation, Symbol};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn exponential(rng: &mut StdRng, mean: f64) -> f64 {
    let u: f64 = rng.gen();
    -(1.0 - u).ln() * mean
}

fn feed(engine: &mut Engine, values: &[f64]) -> Vec<Observation> {
    values.iter().map(|&x| engine.observe(x).unwrap()).collect()
}

#[test]
fn first_symbol_arrives_after_baseline() {
    let capacity = 25;
    let mut engine = Engine::new(EngineConfig::new(capacity, 100)).unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    for _ in 0..capacity {
        let x = exponential(&mut rng, 40.0);
        assert_eq!(engine.observe(x).unwrap(), Observation::Pending);
    }
    assert_eq!(engine.baseline_len(), capacity);

    let symbol = engine.observe(exponential(&mut rng, 40.0)).unwrap().symbol().unwrap();
    assert!(symbol.index() < 5);
}

#[test]
fn small_stream_walkthrough() {
    let mut engine = Engine::new(EngineConfig::new(4, 2)).unwrap();
    assert_eq!(engine.bucket_count(), 2);

    let pending = feed(&mut engine, &[1.0, 2.0, 3.0, 4.0]);
    assert!(pending.iter().all(|o| o.is_pending()));

    // rate 0.4, single boundary at 2.5 * ln 2 ~= 1.733
    assert_eq!(engine.observe(5.0).unwrap(), Observation::Symbol(Symbol::new(1)));
    let boundary = engine.boundaries().unwrap().boundaries()[0];
    assert!((boundary - 2.5 * std::f64::consts::LN_2).abs() < 1e-9);

    // |t| ~= 3.67 > 2.58 on the first check: drift, back to collecting
    assert_eq!(engine.observe(6.0).unwrap(), Observation::Symbol(Symbol::new(1)));
    assert_eq!(engine.phase(), Phase::Collecting);
    let report = engine.last_report().unwrap();
    assert!(report.is_drifted());
    assert!((report.t_statistic - 3.674).abs() < 1e-3);

    assert_eq!(engine.drain(2).unwrap(), vec![Symbol::new(1), Symbol::new(1)]);
    assert!(engine.drain(1).is_none());
}

#[test]
fn higher_critical_value_keeps_classifying() {
    let config = EngineConfig {
        critical_value: 4.0,
        ..EngineConfig::new(4, 2)
    };
    let mut engine = Engine::new(config).unwrap();
    feed(&mut engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    assert_eq!(engine.phase(), Phase::Classifying);
    assert!(!engine.last_report().unwrap().is_drifted());
    assert_eq!(engine.post_baseline_count(), 2);

    assert_eq!(engine.drain(2).unwrap(), vec![Symbol::new(1), Symbol::new(1)]);
    assert!(engine.drain(1).is_none());
    assert_eq!(engine.phase(), Phase::Classifying);
}

#[test]
fn nan_interval_forces_recalibration() {
    let mut engine = Engine::new(EngineConfig::new(4, 2)).unwrap();
    feed(&mut engine, &[1.0, 2.0, 3.0, 4.0]);

    assert!(engine.observe(f64::NAN).unwrap().symbol().is_some());
    assert!(engine.observe(1e6).unwrap().symbol().is_some());

    assert!(engine.is_collecting());
    assert_eq!(engine.stats().drift_checks, 1);
    assert_eq!(engine.stats().drifts_detected, 1);
    let report = engine.last_report().unwrap();
    assert!(report.is_drifted());
    assert!(report.t_statistic.is_nan());
}

#[test]
fn recalibrates_from_fresh_baseline_after_drift() {
    let mut engine = Engine::new(EngineConfig::new(4, 2)).unwrap();
    feed(&mut engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert!(engine.is_collecting());
    assert_eq!(engine.baseline_len(), 0);
    assert_eq!(engine.epoch(), 1);

    let pending = feed(&mut engine, &[10.0, 20.0, 30.0, 40.0]);
    assert!(pending.iter().all(|o| o.is_pending()));

    // old boundary (~1.73) would put 15 in bucket 1; new one is 25 * ln 2 ~= 17.3
    assert_eq!(engine.observe(15.0).unwrap(), Observation::Symbol(Symbol::new(0)));
    assert!((engine.boundaries().unwrap().rate() - 0.04).abs() < 1e-12);
    assert_eq!(engine.stats().calibrations, 2);
}

#[test]
fn degenerate_baseline_reports_error_then_recovers() {
    let mut engine = Engine::new(EngineConfig::new(4, 2)).unwrap();
    feed(&mut engine, &[0.0, 0.0, 0.0, 0.0]);

    let err = engine.observe(3.0).unwrap_err();
    assert!(err.is_degenerate_calibration());
    assert!(engine.is_collecting());

    assert_eq!(engine.observe(3.0).unwrap(), Observation::Pending);
    assert_eq!(engine.baseline_len(), 1);
}

#[test]
fn retract_policy_withdraws_drifted_epoch() {
    let config = EngineConfig {
        drift_policy: DriftPolicy::Retract,
        ..EngineConfig::new(4, 2)
    };
    let mut engine = Engine::new(config).unwrap();
    feed(&mut engine, &[1.0, 2.0, 3.0, 4.0]);

    assert!(engine.observe(5.0).unwrap().symbol().is_some());
    assert_eq!(engine.observe(6.0).unwrap(), Observation::Pending);
    assert!(engine.drain(1).is_none());
    assert_eq!(engine.status().queue.symbols_retracted, 2);
}

#[test]
fn stationary_source_yields_uniform_symbols() {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(0xDECA);
    let buckets = engine.bucket_count();

    for _ in 0..110_000 {
        let _ = engine.observe(exponential(&mut rng, 1_000.0)).unwrap();
    }

    let queued = engine.queue().len();
    assert!(queued >= 80_000, "only {} symbols queued", queued);

    let mut counts = vec![0usize; buckets];
    for s in engine.drain(queued).unwrap() {
        counts[s.index()] += 1;
    }

    let expected = queued as f64 / buckets as f64;
    for (bucket, &count) in counts.iter().enumerate() {
        let deviation = (count as f64 - expected).abs() / expected;
        assert!(deviation < 0.2, "bucket {} holds {} (expected ~{:.0})", bucket, count, expected);
    }
}

#[test]
fn rate_change_forces_recalibration() {
    let mut engine = Engine::new(EngineConfig::new(400, 200)).unwrap();
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..400 {
        engine.observe(exponential(&mut rng, 100.0)).unwrap();
    }
    for _ in 0..200 {
        engine.observe(exponential(&mut rng, 50.0)).unwrap();
    }

    assert!(engine.is_collecting());
    assert_eq!(engine.stats().drifts_detected, 1);
    assert_eq!(engine.queue().len(), 200);
}

#[test]
fn packed_bytes_follow_symbol_order() {
    // 16 samples -> 4 buckets -> 2 bits per symbol
    let mut engine = Engine::new(EngineConfig::new(16, 1_000)).unwrap();
    feed(&mut engine, &[10.0; 16]);
    assert_eq!(engine.symbol_width(), 2);

    // boundaries at 10 * -ln(1 - k/4): ~2.88, ~6.93, ~13.86
    feed(&mut engine, &[20.0, 1.0, 8.0, 4.0]);
    assert!(engine.drain_bytes(2).is_none());
    assert_eq!(engine.drain_bytes(1).unwrap().as_ref(), &[0b11_00_10_01]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn symbols_stay_in_range_and_are_conserved(
        intervals in prop::collection::vec(0.01f64..1e4, 0..600),
        retract in any::<bool>(),
    ) {
        let config = EngineConfig {
            drift_policy: if retract { DriftPolicy::Retract } else { DriftPolicy::Retain },
            ..EngineConfig::new(36, 10)
        };
        let mut engine = Engine::new(config).unwrap();
        let buckets = engine.bucket_count();

        let mut emitted = 0u64;
        for x in intervals {
            if let Some(s) = engine.observe(x).unwrap().symbol() {
                prop_assert!(s.index() < buckets);
                emitted += 1;
            }
            prop_assert!(engine.is_collecting() != engine.is_classifying());
        }

        let status = engine.status();
        prop_assert_eq!(
            status.queued_symbols as u64 + status.queue.symbols_retracted,
            status.engine.symbols_emitted
        );
        prop_assert!(emitted <= status.engine.symbols_emitted);
    }
}
