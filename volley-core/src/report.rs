//! Per-call records and the collector that owns them.
use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::http::{CallError, CallResponse};

/// Outcome of one unit of work, produced by the worker that served it
#[derive(Debug)]
pub struct CallRecord {
    /// ordinal of the worker that made the call, diagnostic only
    pub worker: usize,
    /// response or the reason there was none
    pub outcome: Result<CallResponse, CallError>,
    /// wall time of the call
    pub elapsed: Duration,
}

/// Counts of what happened during a run. Only the engine's internal handle
/// sees this; the caller that submitted the run never does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// id assigned by the engine
    pub run_id: u64,
    /// `volume` of the descriptor
    pub planned: usize,
    /// calls attempted, one per received unit
    pub attempted: usize,
    /// calls that got a response, whatever its status
    pub responded: usize,
    /// calls that failed before a response was read
    pub failed: usize,
    /// units received, keyed by worker ordinal
    pub units_per_worker: BTreeMap<usize, usize>,
}

impl RunSummary {
    /// one line per field, for terminals
    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("volley run {}\n", self.run_id));
        output.push_str(&format!(
            "calls: planned={}, attempted={}\n",
            self.planned, self.attempted
        ));
        output.push_str(&format!(
            "outcomes: responded={}, failed={}\n",
            self.responded, self.failed
        ));
        output.push_str(&format!("workers: {}\n", self.units_per_worker.len()));
        for (worker, units) in &self.units_per_worker {
            output.push_str(&format!("worker [{worker}] units={units}\n"));
        }
        output
    }
}

/// Drain `rx` until every sender is gone, logging each record and folding
/// it into the run's summary
pub(crate) async fn collect(
    run_id: u64,
    planned: usize,
    mut rx: mpsc::Receiver<CallRecord>,
) -> RunSummary {
    let mut summary = RunSummary {
        run_id,
        planned,
        ..RunSummary::default()
    };
    while let Some(record) = rx.recv().await {
        summary.attempted += 1;
        *summary.units_per_worker.entry(record.worker).or_default() += 1;
        match record.outcome {
            Ok(response) => {
                summary.responded += 1;
                info!(
                    worker = record.worker,
                    status = response.status,
                    elapsed_ms = record.elapsed.as_millis() as u64,
                    body = %response.body_text(),
                    "response from target"
                );
            }
            Err(err) => {
                summary.failed += 1;
                warn!(
                    worker = record.worker,
                    elapsed_ms = record.elapsed.as_millis() as u64,
                    %err,
                    "call failed"
                );
            }
        }
    }
    summary
}
