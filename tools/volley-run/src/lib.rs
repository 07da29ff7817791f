pub mod config;

use std::sync::Arc;

use volley_core::{Engine, ReqwestCaller, RunSummary};

pub use config::{Cli, RunConfig};

/// Run the configured job to completion. A dry run validates only and sends
/// nothing.
pub async fn run_once(config: RunConfig) -> RunSummary {
    if config.dry_run {
        return RunSummary {
            planned: config.job.volume(),
            ..RunSummary::default()
        };
    }
    Engine::new(ReqwestCaller::default())
        .run(Arc::new(config.job))
        .await
}
