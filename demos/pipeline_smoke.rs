//! End-to-end smoke run of the analytics pipeline
//!
//! Captures a few thousand synthetic events, lets the processor seal them,
//! and prints what actually left the pipeline: k-anonymous classes, noisy
//! counts, and decrypted encrypted totals.
//! Run: cargo run --example pipeline_smoke

use std::sync::Arc;
use std::time::Duration;

use sift_analytics::core::{action, Event, PipelineConfig};
use sift_analytics::pipeline::MemorySink;
use sift_analytics::{CaptureResult, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = PipelineConfig::from_base_dir(dir.path()).with_total_epsilon(5.0);
    config.batch.flush_interval_ms = 100;

    let sink = Arc::new(MemorySink::new());
    let handle = Pipeline::open(config, sink.clone())?;
    let capture = handle.capture();

    println!("Capturing 4000 events from 16 simulated users...");
    let mut accepted = 0u32;
    for seq in 0..4000u32 {
        let user = 1 + (seq as u64 % 16);
        let actions = [
            action::DOCUMENT_SCANNED,
            action::DOCUMENT_VIEWED,
            action::DOCUMENT_EDITED,
            action::SEARCH_PERFORMED,
        ];
        let event = Event::new(
            1_700_000_000 + seq % 300,
            user,
            actions[(seq % 4) as usize],
            user * 10 + (seq as u64 / 1000),
        );
        if capture.capture(event)? == CaptureResult::Accepted {
            accepted += 1;
        }
    }
    println!("  accepted: {accepted}");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let engine = handle.engine().clone();
    let snapshot = handle.shutdown().await;

    println!("\nProcessor:");
    println!("  batches sealed:  {}", snapshot.batches_sealed);
    println!("  events sealed:   {}", snapshot.events_sealed);
    println!("  suppressed:      {}", snapshot.suppressed_records);
    println!("  budget denials:  {}", snapshot.budget_denials);

    let batches = sink.received().await;
    if let Some(batch) = batches.first() {
        println!("\nFirst sealed batch ({}):", batch.batch_id);
        println!("  records:        {}", batch.record_count);
        println!("  classes:        {}", batch.classes.len());
        println!("  info loss:      {:.3}", batch.info_loss);
        println!("  epsilon spent:  {:.3}", batch.epsilon_spent);
        for (code, noisy) in batch.noisy_action_counts.iter().take(4) {
            println!("  action {code}: noisy count {noisy:.1}");
        }
    }

    // The trusted side can still read exact aggregates from ciphertext.
    let mut scanned = 0.0;
    for batch in &batches {
        let decrypted = engine.decrypt(&batch.encrypted_totals)?;
        scanned += decrypted[action::DOCUMENT_SCANNED as usize] as f64 / engine.quant_scale();
    }
    println!("\nDecrypted total of '{}' events: {:.0}", "document_scanned", scanned);
    println!(
        "Privacy loss bound so far (delta = 1e-6): {:.3}",
        engine.privacy_loss_bound(1e-6)
    );

    Ok(())
}
