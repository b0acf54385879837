#![allow(clippy::cognitive_complexity)]
use anyhow::{Context, Result, anyhow};

use pvreg_core::{
    Session,
    config::{
        cli::{self, Parser},
        trace,
    },
    instrument_store::{Storage, sqlite::SqliteStore},
    metrics,
    pv_client::sim::{SimClient, SimConfig},
    session::{ConnectOutcome, Event, Token},
    tokio::{self, runtime::Builder, signal},
    tracing::*,
};

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;
use tokio_util::sync::CancellationToken;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.pvreg_log)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => error!(?err, "failed to start session"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: cli::Config) -> Result<()> {
    let started = *metrics::START_TIME;
    debug!(path = ?config.config_path, "parsing simulated records");
    let records = SimConfig::parse(&config.config_path)?;
    info!(count = records.records.len(), "loaded simulated records");

    info!(database_url = ?config.database_url, "using database at path");
    let store = SqliteStore::new(&config.database_url)
        .await
        .context("failed to open instrument database")?;

    let (session, mut events) = Session::open(
        SimClient::from_config(records),
        store.clone(),
        &config.instrument,
        config.session(),
    )
    .await
    .context("failed to open instrument")?;
    let instrument = session.target_instrument().clone();

    let cancel = CancellationToken::new();
    let (handle, task) = session.spawn(cancel.clone());
    tokio::spawn(shutdown_signal(cancel.clone()));

    let mut expected = 0;
    for (i, raw) in config.pvs.iter().enumerate() {
        match handle.connect(raw.as_str(), Token(i as u64)).await? {
            ConnectOutcome::Opened => expected += 1,
            ConnectOutcome::Coalesced => info!(?raw, "pv already requested"),
            ConnectOutcome::Rejected(err) => warn!(?raw, ?err, "skipping pv"),
        }
    }

    let (mut registered, mut failed) = (0, 0);
    while registered + failed < expected {
        tokio::select! {
            ev = events.recv() => match ev {
                Some(Event::Connected { token, pv }) => {
                    info!(%token, name = %pv.name, display_type = %pv.display_type, record_type = ?pv.record_type, description = ?pv.description, "connected");
                    registered += 1;
                }
                Some(Event::Failed { token, name, error }) => {
                    error!(%token, %name, ?error, "failed to attach pv");
                    failed += 1;
                }
                None => break,
            },
            _ = cancel.cancelled() => {
                info!("interrupted, abandoning pending pvs");
                break;
            }
        }
    }

    cancel.cancel();
    let abandoned = task.await.context("session task failed")?;

    let pvs = store
        .instrument_pvs(instrument.id)
        .await
        .context("failed to list instrument pvs")?;
    for pv in &pvs {
        info!(instrument = %instrument.name, id = %pv.id, name = ?pv.name, display_type = %pv.display_type, "instrument pv");
    }
    info!(
        registered,
        failed,
        abandoned,
        total = pvs.len(),
        elapsed = ?started.elapsed(),
        polls = metrics::POLL_TICKS.get(),
        "finished"
    );
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    token.cancel();
    ret
}
