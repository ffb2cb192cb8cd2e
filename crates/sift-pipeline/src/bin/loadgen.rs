//! Load generator for the analytics pipeline
//!
//! Drives the capture boundary from many concurrent producers and reports
//! capture latency, outcome counts, and the processor's sealing metrics.
//!
//! Usage:
//!   sift-loadgen                          # 8 producers, 10k events each
//!   sift-loadgen -p 32 -n 50000          # heavier
//!   sift-loadgen --rate 2000             # throttle each producer
//!   sift-loadgen --epsilon 100           # budget for a long run
//!   sift-loadgen --prometheus            # dump the scrape text at exit

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;

use sift_core::{action, CaptureResult, DropReason, Event, PipelineConfig};
use sift_pipeline::{NullSink, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "sift-loadgen")]
#[command(about = "Load test the interaction analytics pipeline")]
struct Args {
    /// Number of concurrent producers
    #[arg(short = 'p', long, default_value = "8")]
    producers: usize,

    /// Events per producer
    #[arg(short = 'n', long, default_value = "10000")]
    events: usize,

    /// Per-producer event rate (events/sec), 0 = unthrottled
    #[arg(short = 'r', long, default_value = "0")]
    rate: u64,

    /// Distinct simulated users
    #[arg(short = 'u', long, default_value = "64")]
    users: u64,

    /// Total epsilon budget for the run
    #[arg(long, default_value = "100.0")]
    epsilon: f64,

    /// Event buffer capacity
    #[arg(long, default_value = "4096")]
    buffer: usize,

    /// State directory (defaults to a per-run temp path)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Emit the processor metrics snapshot as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Install a Prometheus recorder and print the scrape text at exit
    #[arg(long)]
    prometheus: bool,
}

struct Stats {
    accepted: AtomicU64,
    deferred: AtomicU64,
    dropped_backpressure: AtomicU64,
    dropped_pressure: AtomicU64,
    dropped_malformed: AtomicU64,
    latencies_us: Mutex<Vec<u64>>,
}

impl Stats {
    fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            dropped_backpressure: AtomicU64::new(0),
            dropped_pressure: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            latencies_us: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, result: CaptureResult) {
        let counter = match result {
            CaptureResult::Accepted => &self.accepted,
            CaptureResult::Deferred => &self.deferred,
            CaptureResult::Dropped(DropReason::Backpressure) => &self.dropped_backpressure,
            CaptureResult::Dropped(DropReason::MemoryPressure) => &self.dropped_pressure,
            CaptureResult::Dropped(DropReason::Malformed) => &self.dropped_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    async fn report(&self, duration: Duration) {
        let accepted = self.accepted.load(Ordering::Relaxed);
        let deferred = self.deferred.load(Ordering::Relaxed);
        let backpressure = self.dropped_backpressure.load(Ordering::Relaxed);
        let pressure = self.dropped_pressure.load(Ordering::Relaxed);
        let malformed = self.dropped_malformed.load(Ordering::Relaxed);
        let total = accepted + deferred + backpressure + pressure + malformed;

        let mut latencies = self.latencies_us.lock().await;
        latencies.sort_unstable();
        let percentile = |p: f64| -> f64 {
            if latencies.is_empty() {
                return 0.0;
            }
            let idx = ((latencies.len() as f64 * p).ceil() as usize)
                .saturating_sub(1)
                .min(latencies.len() - 1);
            latencies[idx] as f64 / 1000.0
        };

        println!("\n=== Capture Results ===");
        println!("Duration:       {:?}", duration);
        println!("Total:          {} events", total);
        println!(
            "Accepted:       {} ({:.1}%)",
            accepted,
            accepted as f64 / total.max(1) as f64 * 100.0
        );
        println!("Deferred:       {}", deferred);
        println!("Backpressure:   {}", backpressure);
        println!("Mem pressure:   {}", pressure);
        println!("Malformed:      {}", malformed);
        println!(
            "Throughput:     {:.0} events/sec",
            total as f64 / duration.as_secs_f64().max(1e-9)
        );
        println!("\nCapture latency:");
        println!("  P50:          {:.3} ms", percentile(0.50));
        println!("  P95:          {:.3} ms", percentile(0.95));
        println!("  P99:          {:.3} ms", percentile(0.99));
    }
}

fn synthetic_event(producer: usize, seq: usize, users: u64) -> Event {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    let user = 1 + ((producer * 31 + seq * 7) as u64 % users);
    let actions = [
        action::DOCUMENT_SCANNED,
        action::DOCUMENT_VIEWED,
        action::DOCUMENT_VIEWED,
        action::DOCUMENT_EDITED,
        action::TAG_EDITED,
        action::SEARCH_PERFORMED,
    ];
    let mut event = Event::new(
        now,
        user,
        actions[seq % actions.len()],
        user * 100 + (seq as u64 % 4),
    );
    event.template_id = (seq % 3) as u32;
    event
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    // Must happen before the pipeline records anything.
    let recorder = args
        .prometheus
        .then(sift_pipeline::metrics::init_prometheus_recorder);
    let data_dir = args.data_dir.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!("sift-loadgen-{}", std::process::id()))
    });

    let mut config = PipelineConfig::from_base_dir(&data_dir)
        .with_buffer_capacity(args.buffer)
        .with_total_epsilon(args.epsilon);
    config.privacy.adaptive_allocation = true;

    let handle = Pipeline::open(config, Arc::new(NullSink))?;

    let total_events = args.producers * args.events;
    println!(
        "Generating {} events from {} producers ({} users) into {}",
        total_events,
        args.producers,
        args.users,
        data_dir.display()
    );

    let progress = ProgressBar::new(total_events as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}]")
            .expect("progress template"),
    );

    let stats = Arc::new(Stats::new());
    let start = Instant::now();

    let mut tasks = Vec::with_capacity(args.producers);
    for producer in 0..args.producers {
        let capture = handle.capture();
        let stats = stats.clone();
        let progress = progress.clone();
        let (events, rate, users) = (args.events, args.rate, args.users);

        tasks.push(tokio::spawn(async move {
            let pace = (rate > 0).then(|| Duration::from_secs_f64(1.0 / rate as f64));
            let mut latencies = Vec::with_capacity(events);

            for seq in 0..events {
                let event = synthetic_event(producer, seq, users);
                let sent = Instant::now();
                match capture.capture(event) {
                    Ok(result) => stats.record(result),
                    Err(err) => {
                        eprintln!("producer {producer}: capture failed: {err}");
                        break;
                    }
                }
                latencies.push(sent.elapsed().as_micros() as u64);
                progress.inc(1);

                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                } else if seq % 256 == 255 {
                    // Give the processor room on a small runtime
                    tokio::task::yield_now().await;
                }
            }

            stats.latencies_us.lock().await.extend(latencies);
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
    let duration = start.elapsed();
    progress.finish();

    let snapshot = handle.shutdown().await;
    stats.report(duration).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("\n=== Processor Results ===");
        println!("Buffered:       {}", snapshot.events_buffered);
        println!("Buffer rejects: {}", snapshot.buffer_rejects);
        println!("Batches sealed: {}", snapshot.batches_sealed);
        println!("Events sealed:  {}", snapshot.events_sealed);
        println!("Suppressed:     {}", snapshot.suppressed_records);
        println!("Budget denials: {}", snapshot.budget_denials);
        println!("Permit timeouts:{}", snapshot.permit_timeouts);
        println!("Patterns:       {}", snapshot.patterns_reported);
    }

    if let Some(recorder) = recorder {
        println!("\n=== Prometheus Exposition ===");
        print!("{}", recorder.render());
    }

    if args.data_dir.is_none() {
        let _ = std::fs::remove_dir_all(&data_dir);
    }
    Ok(())
}
