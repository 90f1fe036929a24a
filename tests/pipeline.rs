use chrono::{Duration, TimeZone, Utc};
use hostwatch::model::MemoryModelStore;
use hostwatch::notify::{AnomalyRecord, JsonLinesNotifier, Notifier};
use hostwatch::{
    FileModelStore, ModelStore, Pipeline, PipelineConfig, PipelineError, TelemetryRow,
    ThresholdScope, telemetry,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Rows where a level step of +40 on `sys` happens at each index in `steps`.
fn synthetic_rows(n: usize, steps: &[usize], seed: u64) -> Vec<TelemetryRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let usr = Normal::new(20.0, 1.0).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let mut level = 50.0;
    (0..n)
        .map(|i| {
            if steps.contains(&i) {
                level += 40.0;
            }
            TelemetryRow::new(start + Duration::seconds(30 * i as i64))
                .with("sys", level + noise.sample(&mut rng))
                .with("usr", usr.sample(&mut rng))
                .with("idle", 70.0)
        })
        .collect()
}

fn config() -> PipelineConfig {
    PipelineConfig {
        features: vec![
            "sys_diff".into(),
            "sys_diff_threshold_ratio".into(),
            "usr".into(),
        ],
        ..PipelineConfig::default()
    }
}

const STEPS: [usize; 5] = [40, 90, 150, 230, 270];

#[test]
fn test_steps_reach_anomaly_stream() {
    let rows = synthetic_rows(300, &STEPS, 17);
    let pipeline = Pipeline::new(config()).unwrap();

    let outcome = pipeline.train(&rows).unwrap();
    assert_eq!(outcome.training_rows, 201);
    // Only the upward steps cross mean + 2 sigma
    for idx in STEPS {
        assert!(outcome.labels.as_slice()[idx].is_anomalous(), "row {}", idx);
    }
    assert_eq!(outcome.labels.anomaly_count(), STEPS.len());
    assert!((outcome.model.contamination() - 3.0 / 201.0).abs() < 1e-12);

    let stream = pipeline.score(&outcome.model, &rows).unwrap();
    let flagged: Vec<usize> = stream.records.iter().map(|r| r.index).collect();

    // Held-out steps are caught by the model, not just the threshold
    assert!(flagged.contains(&230), "flagged {:?}", flagged);
    assert!(flagged.contains(&270), "flagged {:?}", flagged);
    assert!(flagged.len() <= 30, "too many anomalies: {}", flagged.len());
    assert!(flagged.windows(2).all(|w| w[0] < w[1]), "stream out of order");

    for record in &stream.records {
        assert_eq!(record.timestamp, rows[record.index].timestamp);
        assert!(record.values.contains_key("sys_diff_mean_ratio"));
        assert!(record.label.is_anomalous());
    }
}

#[test]
fn test_scoring_is_repeatable() {
    let rows = synthetic_rows(150, &[30, 120], 3);
    let pipeline = Pipeline::new(config()).unwrap();
    let model = pipeline.train(&rows).unwrap().model;

    let a = pipeline.score(&model, &rows).unwrap();
    let b = pipeline.score(&model, &rows).unwrap();
    assert_eq!(a.records, b.records);

    let retrained = pipeline.train(&rows).unwrap().model;
    let c = pipeline.score(&retrained, &rows).unwrap();
    assert_eq!(a.records, c.records);
}

#[test]
fn test_persisted_model_scores_identically() {
    let rows = synthetic_rows(200, &[50, 160], 9);
    let pipeline = Pipeline::new(config()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = FileModelStore::new(dir.path().join("model.bin"));
    let outcome = pipeline.train_and_persist(&rows, &store).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(
        pipeline.score(&outcome.model, &rows).unwrap().records,
        pipeline.score(&loaded, &rows).unwrap().records
    );
}

#[test]
fn test_cap_keeps_first_anomalies() {
    let rows = synthetic_rows(300, &STEPS, 17);
    let uncapped = Pipeline::new(config()).unwrap();
    let model = uncapped.train(&rows).unwrap().model;
    let full = uncapped.score(&model, &rows).unwrap();
    assert!(full.records.len() > 2);

    let capped = Pipeline::new(PipelineConfig {
        max_notifications: 2,
        ..config()
    })
    .unwrap();
    let stream = capped.score(&model, &rows).unwrap();
    assert_eq!(stream.records, full.records[..2].to_vec());
    assert_eq!(stream.total_anomalies, full.total_anomalies);
    assert!(stream.truncated());
}

#[test]
fn test_threshold_scope_controls_statistics() {
    let rows = synthetic_rows(120, &[60], 5);
    let batch = synthetic_rows(40, &[10, 30], 6);

    let batch_pipeline = Pipeline::new(config()).unwrap();
    let model = batch_pipeline.train(&rows).unwrap().model;
    let training_stats = model.schema().training_stats;

    let recomputed = batch_pipeline.score(&model, &batch).unwrap();
    assert_ne!(recomputed.stats, Some(training_stats));

    let pinned_pipeline = Pipeline::new(PipelineConfig {
        threshold_scope: ThresholdScope::Training,
        ..config()
    })
    .unwrap();
    let pinned = pinned_pipeline.score(&model, &batch).unwrap();
    assert_eq!(pinned.stats, Some(training_stats));

    // A single row has no standard deviation of its own
    let single = &batch[..1];
    assert!(matches!(
        batch_pipeline.score(&model, single),
        Err(PipelineError::InsufficientData { .. })
    ));
    assert!(pinned_pipeline.score(&model, single).is_ok());
}

#[test]
fn test_zero_contamination_training() {
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    // Constant step after the zeroed first diff; no diff exceeds mean + 2 sigma
    let rows: Vec<TelemetryRow> = (0..60)
        .map(|i| {
            TelemetryRow::new(start + Duration::minutes(i))
                .with("sys", 10.0 + 2.0 * i as f64)
                .with("usr", 5.0 + (i % 4) as f64)
        })
        .collect();

    let pipeline = Pipeline::new(config()).unwrap();
    let outcome = pipeline.train(&rows).unwrap();
    assert_eq!(outcome.labels.anomaly_count(), 0);
    assert_eq!(outcome.model.contamination(), 0.0);

    let store = MemoryModelStore::new();
    store.save(&outcome.model).unwrap();
    let stream = pipeline.score(&store.load().unwrap(), &rows[1..40]).unwrap();
    assert_eq!(stream.scored_rows, 39);
}

struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&mut self, _: &[AnomalyRecord]) -> hostwatch::Result<()> {
        panic!("notifier must not run");
    }
}

#[test]
fn test_empty_batch_skips_notifier() {
    let rows = synthetic_rows(100, &[70], 4);
    let pipeline = Pipeline::new(config()).unwrap();
    let model = pipeline.train(&rows).unwrap().model;

    let stream = pipeline
        .score_and_notify(&model, &[], &mut FailingNotifier)
        .unwrap();
    assert!(stream.is_empty());
    assert_eq!(stream.total_anomalies, 0);
}

#[test]
fn test_json_lines_round_trip_through_pipeline() {
    let rows = synthetic_rows(300, &STEPS, 17);
    let mut input = String::new();
    for row in &rows {
        input.push_str(&serde_json::to_string(row).unwrap());
        input.push('\n');
    }

    let mut loaded = telemetry::read_json_lines(input.as_bytes()).unwrap();
    telemetry::sort_chronologically(&mut loaded);
    let loaded = telemetry::drop_negative(loaded, "idle");
    assert_eq!(loaded, rows);

    let pipeline = Pipeline::new(config()).unwrap();
    let model = pipeline.train(&loaded).unwrap().model;

    let mut sink = JsonLinesNotifier::new(Vec::new());
    let stream = pipeline.score_and_notify(&model, &loaded, &mut sink).unwrap();
    let out = String::from_utf8(sink.into_inner()).unwrap();

    let emitted: Vec<AnomalyRecord> = out
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(emitted, stream.records);
}
