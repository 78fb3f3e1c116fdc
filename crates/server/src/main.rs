// crates/server/src/main.rs
//! benchstream binary.
//!
//! `serve` (the default) runs the reconciler, the fan-out listener and the
//! HTTP server until Ctrl-C. `demo` pushes a few synthetic jobs through the
//! whole pipeline and prints what landed in the durable store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use benchstream_core::{Config, DurableStore, EphemeralStore, JobQueue, MemoryStore};
use benchstream_db::Database;
use benchstream_observability::{init_tracing, LogFormat};
use benchstream_server::simulate::{SimulatedWorker, SimulatorConfig};
use benchstream_server::{create_app, init_metrics, Pipeline};
use benchstream_types::JobStatus;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "benchstream", version, about = "Benchmark job log pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync pipeline and HTTP server.
    Serve {
        /// Also run an in-process synthetic worker.
        #[arg(long)]
        simulate: bool,
    },
    /// Enqueue synthetic jobs, sync them and report durable row counts.
    Demo {
        #[arg(long, default_value_t = 3)]
        jobs: u32,
        #[arg(long, default_value_t = 50)]
        lines: u32,
    },
}

async fn open_database(config: &Config) -> Result<Database> {
    let db = match &config.db_path {
        Some(path) => Database::new(path).await,
        None => Database::open_default().await,
    }
    .context("failed to open durable store")?;
    tracing::info!(path = %db.db_path().display(), "Durable store ready");
    Ok(db)
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    tracing::info!("Shutdown requested");
    cancel.cancel();
}

async fn serve(config: Config, simulate: bool) -> Result<()> {
    init_metrics();
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new());
    let durable: Arc<dyn DurableStore> = Arc::new(open_database(&config).await?);

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(&config, ephemeral.clone(), durable, &cancel);

    let worker = simulate.then(|| {
        let queue = JobQueue::new(ephemeral.clone(), config.log_retain);
        tokio::spawn(SimulatedWorker::new(queue, SimulatorConfig::default()).run(cancel.child_token()))
    });

    let app = create_app(pipeline.state.clone());
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, simulate, "benchstream listening");
    eprintln!("benchstream v{} on http://{addr}", env!("CARGO_PKG_VERSION"));

    tokio::spawn(shutdown_signal(cancel.clone()));
    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await
        .context("HTTP server error")?;

    if let Some(worker) = worker {
        let _ = worker.await;
    }
    pipeline.join().await;
    tracing::info!("benchstream stopped");
    Ok(())
}

async fn demo(mut config: Config, jobs: u32, lines: u32) -> Result<()> {
    config.sync_interval = Duration::from_millis(200);
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new());
    let db = open_database(&config).await?;
    let durable: Arc<dyn DurableStore> = Arc::new(db.clone());

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(&config, ephemeral.clone(), durable.clone(), &cancel);
    let queue = pipeline.state.queue.clone();

    let mut ids = Vec::with_capacity(jobs as usize);
    for i in 0..jobs {
        let params = serde_json::json!({
            "mode": "http",
            "url": format!("http://demo.local/{i}"),
            "concurrency": 5 + i,
            "duration": 10,
        });
        ids.push(queue.start_job(params).await?);
    }

    let worker_config = SimulatorConfig {
        lines_per_job: lines,
        line_interval: Duration::from_millis(5),
        poll_interval: Duration::from_millis(20),
    };
    let worker = tokio::spawn(SimulatedWorker::new(queue.clone(), worker_config).run(cancel.child_token()));

    // wait for every job to be terminal, then for the reconciler to catch up
    let started = Instant::now();
    loop {
        let mut done = 0;
        for id in &ids {
            let status = queue.get_job(id).await?.and_then(|s| s.record.status);
            if status.is_some_and(|s| s.is_terminal()) {
                done += 1;
            }
        }
        if done == ids.len() {
            break;
        }
        if started.elapsed() > Duration::from_secs(300) {
            anyhow::bail!("demo jobs did not finish in time");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let cycles = lines as u64 / config.log_batch_limit.max(1) + 3;
    tokio::time::sleep(config.sync_interval * cycles as u32).await;
    pipeline.writer.flush().await?;

    cancel.cancel();
    let _ = worker.await;
    pipeline.join().await;

    for id in &ids {
        let record = durable.get_job(id).await?;
        let status = record
            .and_then(|r| r.status)
            .map_or("missing", |s: JobStatus| s.as_str());
        let rows = durable.query_logs(id, 0, u32::MAX).await?.len();
        let last_seq = db.max_log_seq(id).await?;
        println!("{id}  status={status}  log_rows={rows}  last_seq={last_seq:?}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(LogFormat::from_env())?;
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve { simulate: false }) {
        Command::Serve { simulate } => serve(config, simulate).await,
        Command::Demo { jobs, lines } => demo(config, jobs, lines).await,
    }
}
