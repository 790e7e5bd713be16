//! tally - 投票集計ワーカー
//!
//! - `tally` / `tally run`: votes キューを消費して jobs と votes を更新する
//! - `tally publish --choice <c>`: queued ジョブを作成してメッセージを送る（ローカル検証用）
//! - `tally results`: 集計結果と直近のジョブを JSON で出力する

mod config;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser as _;
use thiserror::Error;
use tracing::{error, info};

use tally_amqp::AmqpDeliveryQueue;
use tally_core::app::{ShutdownHandle, VoteProcessor, WorkerGroup, WorkerLoop};
use tally_core::domain::{
    BrokerError, Choice, ConnectivityError, DecodeError, JobId, StoreError, VoteMessage,
};
use tally_core::ports::{DeliveryQueue, FixedDelay, JobStore, NoDelay, TallyStore, WorkSimulator};
use tally_pg::PostgresStore;

use crate::config::{Cli, Command};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("invalid choice: {0}")]
    InvalidChoice(#[from] DecodeError),

    #[error("failed to encode vote message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let result = match cli.command() {
        Command::Run => run(&cli).await,
        Command::Publish { choice } => publish(&cli, choice).await,
        Command::Results { limit, job } => results(&cli, limit, job).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}

/// Acquire the pool and the broker connection, run `f`, then release both.
///
/// If the broker cannot be reached the pool is closed before returning.
async fn with_resources<F, Fut>(cli: &Cli, f: F) -> Result<(), AppError>
where
    F: FnOnce(Arc<PostgresStore>, Arc<AmqpDeliveryQueue>) -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    let store = Arc::new(PostgresStore::connect(&cli.db_config()).await?);

    let queue = match AmqpDeliveryQueue::connect(&cli.amqp_config()).await {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            store.close().await;
            return Err(e.into());
        }
    };

    let result = match init_schema(cli, &store).await {
        Ok(()) => f(store.clone(), queue.clone()).await,
        Err(e) => Err(e),
    };

    queue.close().await;
    store.close().await;
    result
}

async fn init_schema(cli: &Cli, store: &PostgresStore) -> Result<(), AppError> {
    if cli.init_schema {
        store.ensure_schema().await?;
        info!("Schema initialized");
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<(), AppError> {
    let work: Arc<dyn WorkSimulator> = match cli.work_delay() {
        Some(delay) => Arc::new(FixedDelay(delay)),
        None => Arc::new(NoDelay),
    };

    with_resources(cli, |store, queue| async move {
        let mut loops = Vec::with_capacity(cli.instances as usize);
        for instance in 0..cli.instances as usize {
            let processor = Arc::new(VoteProcessor::new(store.clone(), store.clone(), work.clone()));
            let subscription = queue.subscribe(&format!("tally-worker-{instance}")).await?;
            loops.push(WorkerLoop::new(instance, subscription, processor));
        }

        let group = WorkerGroup::spawn(loops);
        info!(
            instances = cli.instances,
            queue = queue.queue_name(),
            "Workers spawned"
        );
        tokio::spawn(stop_on_signal(group.shutdown_handle()));

        let stats = group.join().await;
        info!(
            received = stats.received,
            acked = stats.acked,
            dropped = stats.dropped,
            requeued = stats.requeued,
            settle_failures = stats.settle_failures,
            "Worker stopped"
        );
        Ok::<_, AppError>(())
    })
    .await
}

async fn publish(cli: &Cli, choice: String) -> Result<(), AppError> {
    let choice = Choice::parse(choice)?;

    with_resources(cli, |store, queue| async move {
        let vote = VoteMessage::new(JobId::generate(), choice);
        store.insert_queued_job(&vote.job_id, &vote.choice).await?;
        queue.publish(&vote.encode()?).await?;

        info!(job_id = %vote.job_id, choice = %vote.choice, "Vote queued");
        println!("{}", vote.job_id);
        Ok::<_, AppError>(())
    })
    .await
}

/// Read-only view over the store; the broker is never contacted.
async fn results(cli: &Cli, limit: i64, job: Option<String>) -> Result<(), AppError> {
    let store = PostgresStore::connect(&cli.db_config()).await?;
    let result = match init_schema(cli, &store).await {
        Ok(()) => render_results(&store, limit, job).await,
        Err(e) => Err(e),
    };
    store.close().await;

    println!("{}", result?);
    Ok(())
}

async fn render_results(
    store: &PostgresStore,
    limit: i64,
    job: Option<String>,
) -> Result<String, AppError> {
    let votes: serde_json::Map<String, serde_json::Value> = store
        .tallies()
        .await?
        .into_iter()
        .map(|tally| (tally.choice.into_inner(), tally.count.into()))
        .collect();
    let recent_jobs = store.recent_jobs(limit).await?;

    let mut body = serde_json::json!({
        "votes": votes,
        "recent_jobs": recent_jobs,
    });
    if let Some(job) = job {
        let job_id = JobId::new(job);
        let status = store.job_status(&job_id).await?;
        body["job"] = serde_json::json!({ "id": job_id, "status": status });
    }
    Ok(serde_json::to_string_pretty(&body)?)
}

async fn stop_on_signal(handle: ShutdownHandle) {
    shutdown_signal().await;
    info!("Shutdown requested; finishing in-flight votes");
    handle.request_shutdown();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
