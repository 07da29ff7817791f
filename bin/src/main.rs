#![allow(clippy::cognitive_complexity)]
use anyhow::{Context, Result, anyhow};

mod startup_health;

use external_api::{ExternalApi, Health};
use startup_health::verify_background_task_running;
use volley_core::{
    Engine, ReqwestCaller,
    config::{
        cli::{self, Parser},
        trace,
    },
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
    let trace_config = trace::Config::parse(&config.volley_log)?;
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
            Err(err) => error!(?err, "failed to start server"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: cli::Config) -> Result<()> {
    // one client for every run, it pools connections per target
    let engine = Engine::new(ReqwestCaller::default());
    let api = ExternalApi::new(config.external_api, engine);
    info!(addr = %config.external_api, "starting external api");

    let token = CancellationToken::new();
    let api_sender = api.sender();
    let mut api_task = api.start(token.clone());
    let mut shutdown = tokio::spawn(shutdown_signal(token.clone()));

    // Keep health BAD until the api is confirmed running.
    if let Err(err) = verify_background_task_running("external API", &mut api_task).await {
        token.cancel();
        return Err(err);
    }

    debug!("changing health to good after startup checks passed");
    api_sender
        .send(Health::Good)
        .await
        .context("error occurred in changing health status to Good")?;

    tokio::select! {
        res = &mut shutdown => {
            if let Ok(Err(err)) = res {
                error!(?err, "error waiting for shutdown signal");
            }
        }
        res = &mut api_task => {
            // api exited without being asked to
            token.cancel();
            return match res {
                Ok(()) => Err(anyhow!("external API exited unexpectedly")),
                Err(err) => Err(anyhow!("external API panicked: {err}")),
            };
        }
    }

    let _ = api_sender.send(Health::Bad).await;
    if let Err(err) = api_task.await {
        error!(?err, "error waiting for web server API");
    }
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    info!("shutdown signal received");
    token.cancel();
    ret
}
