// followguard/src/main.rs
//
// Followguard daemon.
//
// Two operational modes:
//   serve  : tail a follower-event JSONL feed, recompute touched users live,
//            answer the query API, reap stalled batch jobs
//   batch  : load a JSONL event file, run one batch analysis job, print it
//
// Usage:
//   followguard --mode serve --path /var/log/follows.jsonl --listen 127.0.0.1:50051
//   followguard --mode batch --path follows.jsonl --from 2026-04-01T00:00:00Z

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use followguard::clock::{Clock, SystemClock};
use followguard::config::FraudConfig;
use followguard::engine::dispatcher::NotificationWriter;
use followguard::engine::recompute::{run_consumer, RecomputeQueue};
use followguard::events::{BotFollowerNotification, FollowerEvent};
use followguard::ingest::{read_jsonl, tail_jsonl};
use followguard::profiles::ProfileDirectory;
use followguard::query_api::QueryServer;
use followguard::state::MemoryStore;
use followguard::{FraudService, ServiceOptions};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "followguard",
    about   = "Bot-follower detection, risk scoring and badge lifecycle",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "serve")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/followguard_events.jsonl",
          help = "Follower event JSONL path")]
    path: PathBuf,

    #[arg(long, help = "JSON config file (defaults apply when omitted)")]
    config: Option<PathBuf>,

    #[arg(long, help = "Account profile JSONL path")]
    profiles: Option<PathBuf>,

    #[arg(long, default_value = "/tmp/followguard_output",
          help = "Notification output directory")]
    output: PathBuf,

    #[arg(long, default_value = "127.0.0.1:50051", help = "Query API bind address")]
    listen: SocketAddr,

    #[arg(long, help = "Override batch worker pool size")]
    pool_size: Option<usize>,

    #[arg(long, help = "Skip events already in the feed (serve mode)")]
    seek_end: bool,

    #[arg(long, help = "Batch range start, RFC 3339")]
    from: Option<DateTime<Utc>>,

    #[arg(long, help = "Batch range end, RFC 3339")]
    to: Option<DateTime<Utc>>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Serve,  // live ingestion + query API
    Batch,  // one-shot batch analysis over a file
}

// ── Background loops ──────────────────────────────────────────────────────────

async fn stats_loop(store: Arc<MemoryStore>, queue: Arc<RecomputeQueue>, start: Instant, token: CancellationToken) {
    let mut tick = tokio::time::interval(Duration::from_secs(30));
    tick.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => info!(
                uptime_s = start.elapsed().as_secs(),
                events   = store.n_events(),
                signals  = store.n_signals(),
                pending  = queue.pending(),
                "stats"
            ),
        }
    }
}

async fn housekeeping_loop(service: Arc<FraudService>, token: CancellationToken) {
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => service.locks().prune(),
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("followguard=info".parse()?))
        .compact().init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(p) => FraudConfig::load(p)?,
        None    => FraudConfig::default(),
    };
    if let Some(n) = cli.pool_size {
        config.batch.worker_pool_size = n;
    }

    let profiles = Arc::new(ProfileDirectory::new());
    if let Some(p) = &cli.profiles {
        profiles.load_jsonl(p)?;
    }

    let store = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let token = CancellationToken::new();

    let (note_tx, note_rx) = mpsc::channel::<BotFollowerNotification>(16384);
    let writer = tokio::spawn(NotificationWriter::new(cli.output.clone())?.run(note_rx));

    match cli.mode {
        Mode::Serve => {
            let (queue, queue_rx) = RecomputeQueue::new(16384);
            let service = FraudService::new(
                config,
                store.clone(),
                profiles,
                clock.clone(),
                ServiceOptions { notification_outbox: Some(note_tx), recompute_queue: Some(queue.clone()) },
            )?;

            println!("  Mode: \x1b[96mSERVE\x1b[0m  |  {}", cli.path.display());
            println!("  Query API: \x1b[90m{}\x1b[0m  Output: \x1b[90m{}\x1b[0m\n", cli.listen, cli.output.display());

            tokio::spawn(run_consumer(
                queue.clone(),
                queue_rx,
                service.analyzer().clone(),
                clock.clone(),
                token.clone(),
            ));
            tokio::spawn(service.batch().clone().reaper_loop(Duration::from_secs(60), token.clone()));
            tokio::spawn(housekeeping_loop(service.clone(), token.clone()));
            tokio::spawn(stats_loop(store.clone(), queue, Instant::now(), token.clone()));

            let (ev_tx, ev_rx) = mpsc::channel::<FollowerEvent>(16384);
            tokio::spawn(service.ingestor().clone().run(ev_rx));
            let path = cli.path.clone();
            let seek_end = cli.seek_end;
            tokio::spawn(async move {
                if let Err(e) = tail_jsonl(path, ev_tx, seek_end).await {
                    warn!(error = %e, "Event feed stopped");
                }
            });

            let server = Arc::new(QueryServer::new(service, cli.listen));
            tokio::select! {
                res = server.serve() => res?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down"),
            }
            token.cancel();
        }

        Mode::Batch => {
            let service = FraudService::new(
                config,
                store.clone(),
                profiles,
                clock,
                ServiceOptions { notification_outbox: Some(note_tx), recompute_queue: None },
            )?;

            let events = read_jsonl(cli.path.clone()).await?;
            let total = events.len();
            let mut rejected = 0usize;
            for ev in events {
                if let Err(e) = service.ingest_event(ev) {
                    rejected += 1;
                    warn!(stage = "ingest", error = %e, "Event rejected");
                }
            }
            info!(total, rejected, stored = store.n_events(), "Events loaded");

            let handle = service.trigger_batch_analysis(cli.from, cli.to)?;
            let job_id = handle.job_id.clone();
            handle.wait().await;
            let job = service.get_batch_job(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            drop(service);
        }
    }

    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
    Ok(())
}
