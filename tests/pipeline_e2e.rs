//! Full pipeline: capture through sealed publication and shutdown.

use std::sync::Arc;
use std::time::Duration;

use sift_core::{action, CaptureResult, Event, PipelineConfig};
use sift_pipeline::{CaptureError, MemorySink, Pipeline};

fn test_config(dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::from_base_dir(dir).with_total_epsilon(10.0);
    config.batch.flush_interval_ms = 50;
    config
}

fn event(user: u64, seq: u32) -> Event {
    Event::new(
        1_700_000_000 + seq % 60,
        user,
        action::DOCUMENT_VIEWED,
        user * 10,
    )
}

#[tokio::test]
async fn test_capture_to_sealed_batch() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let handle = Pipeline::open(test_config(dir.path()), sink.clone()).unwrap();
    let capture = handle.capture();

    // 8 users x 75 events, all k-anonymous at the default k = 5.
    let mut accepted = 0u32;
    for seq in 0..600u32 {
        match capture.capture(event(1 + (seq as u64 % 8), seq)).unwrap() {
            CaptureResult::Accepted => accepted += 1,
            other => panic!("unexpected capture outcome: {other:?}"),
        }
    }
    assert_eq!(accepted, 600);

    // Let the interval flush fire at least once before shutdown.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = handle.shutdown().await;

    assert_eq!(snapshot.events_buffered, 600);
    assert_eq!(snapshot.events_sealed, 600);
    assert_eq!(snapshot.buffer_rejects, 0);
    assert_eq!(snapshot.privacy_failures, 0);

    let batches = sink.received().await;
    assert_eq!(
        snapshot.batches_sealed,
        batches.len() as u64
    );
    let sealed_total: usize = batches.iter().map(|b| b.record_count).sum();
    assert_eq!(sealed_total, 600);
    for batch in &batches {
        assert!(batch.epsilon_spent > 0.0);
        assert!(!batch.classes.is_empty());
    }
}

#[tokio::test]
async fn test_aggregates_survive_without_raw_events() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let handle = Pipeline::open(test_config(dir.path()), sink.clone()).unwrap();
    let engine = handle.engine().clone();
    let capture = handle.capture();

    for seq in 0..400u32 {
        capture.capture(event(1 + (seq as u64 % 8), seq)).unwrap();
    }
    handle.shutdown().await;

    // Encrypted per-action totals across all published batches decrypt to
    // the true count, scaled.
    let batches = sink.received().await;
    assert!(!batches.is_empty());
    let mut total = 0.0;
    for batch in &batches {
        let decrypted = engine.decrypt(&batch.encrypted_totals).unwrap();
        total += decrypted[action::DOCUMENT_VIEWED as usize] as f64 / engine.quant_scale();
    }
    let suppressed: usize = batches.iter().map(|b| b.suppressed).sum();
    assert!((total - (400 - suppressed) as f64).abs() < 0.1);
}

#[tokio::test]
async fn test_shutdown_rejects_further_capture() {
    let dir = tempfile::tempdir().unwrap();
    let handle = Pipeline::open(test_config(dir.path()), Arc::new(MemorySink::new())).unwrap();
    let capture = handle.capture();

    capture.capture(event(1, 0)).unwrap();
    handle.shutdown().await;

    assert!(matches!(
        capture.capture(event(1, 1)),
        Err(CaptureError::Inactive)
    ));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let consumed_first;
    {
        let handle = Pipeline::open(config.clone(), Arc::new(MemorySink::new())).unwrap();
        let capture = handle.capture();
        for seq in 0..300u32 {
            capture.capture(event(1 + (seq as u64 % 8), seq)).unwrap();
        }
        let engine = handle.engine().clone();
        handle.shutdown().await;
        consumed_first = engine.budget().consumed();
        assert!(consumed_first > 0.0);
    }

    // A second pipeline over the same storage resumes the spent budget
    // instead of starting fresh.
    let handle = Pipeline::open(config, Arc::new(MemorySink::new())).unwrap();
    assert!((handle.engine().budget().consumed() - consumed_first).abs() < 1e-9);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_patterns_published_after_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let handle = Pipeline::open(test_config(dir.path()), Arc::new(MemorySink::new())).unwrap();
    let capture = handle.capture();

    // A strong scan -> view habit: consecutive pairs on one document.
    for seq in 0..400u32 {
        let doc = 1 + (seq as u64 / 2) % 4;
        let act = if seq % 2 == 0 {
            action::DOCUMENT_SCANNED
        } else {
            action::DOCUMENT_VIEWED
        };
        let mut e = Event::new(1_700_000_000 + seq % 60, 1 + (seq as u64 % 8), act, doc);
        e.template_id = 1;
        capture.capture(e).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = handle.patterns();
    assert!(snapshot.generation > 0);
    assert!(snapshot
        .sequences
        .iter()
        .any(|s| s.from == action::DOCUMENT_SCANNED && s.to == action::DOCUMENT_VIEWED));

    handle.shutdown().await;
}
