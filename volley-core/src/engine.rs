//! # Dispatch engine
//!
//! A run spins up `parallelism` workers over a zero-capacity work queue,
//! hands `volume` references to one descriptor to whichever workers are idle,
//! closes the queue and joins every worker. Each worker reports its calls on a results channel owned by a
//! single collector, see [`report`](crate::report).
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle, JoinSet},
};
use tracing::{debug, debug_span, error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::{
    http::{self, HttpCaller},
    job::JobDescriptor,
    queue::{self, Taker},
    report::{self, CallRecord, RunSummary},
};

/// Runs load tests against one shared [`HttpCaller`]
#[derive(Debug)]
pub struct Engine<C> {
    caller: Arc<C>,
    next_run: Arc<AtomicU64>,
}

impl<C> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            caller: Arc::clone(&self.caller),
            next_run: Arc::clone(&self.next_run),
        }
    }
}

/// Handle to a submitted run. Dropping it detaches the run, it never
/// cancels it.
#[derive(Debug)]
pub struct RunHandle {
    run_id: u64,
    task: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// id the engine assigned to this run
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// has every worker exited and the collector finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for every call of the run to finish
    pub async fn join(self) -> Result<RunSummary, JoinError> {
        self.task.await
    }
}

impl<C: HttpCaller> Engine<C> {
    /// Create an engine that owns `caller`
    pub fn new(caller: C) -> Self {
        Self::from_shared(Arc::new(caller))
    }

    /// Create an engine over a caller that is shared elsewhere too
    pub fn from_shared(caller: Arc<C>) -> Self {
        Self {
            caller,
            next_run: Arc::new(AtomicU64::new(1)),
        }
    }

    /// the caller every worker dispatches through
    pub fn caller(&self) -> &Arc<C> {
        &self.caller
    }

    /// Start a run in the background and return immediately. Must be called
    /// from within a tokio runtime.
    pub fn submit(&self, job: JobDescriptor) -> RunHandle {
        let run_id = self.next_run_id();
        let engine = self.clone();
        let job = Arc::new(job);
        let task = tokio::spawn(async move { engine.run_with_id(run_id, job).await });
        RunHandle { run_id, task }
    }

    /// Run `job` to completion on the current task
    pub async fn run(&self, job: Arc<JobDescriptor>) -> RunSummary {
        let run_id = self.next_run_id();
        self.run_with_id(run_id, job).await
    }

    fn next_run_id(&self) -> u64 {
        self.next_run.fetch_add(1, Ordering::Relaxed)
    }

    async fn run_with_id(&self, run_id: u64, job: Arc<JobDescriptor>) -> RunSummary {
        let span = info_span!(
            "run",
            run_id,
            target = %job.target(),
            method = %job.method()
        );
        self.drive(run_id, job).instrument(span).await
    }

    async fn drive(&self, run_id: u64, job: Arc<JobDescriptor>) -> RunSummary {
        let parallelism = job.parallelism();
        let volume = job.volume();
        let started = Instant::now();
        info!(parallelism, volume, "starting run");

        let (work_tx, work_rx) = queue::handoff();
        let (record_tx, record_rx) = mpsc::channel(parallelism);
        let collector = tokio::spawn(report::collect(run_id, volume, record_rx).in_current_span());

        let mut workers = JoinSet::new();
        for ordinal in 1..=parallelism {
            let span = debug_span!("worker", ordinal);
            workers.spawn(
                worker(
                    ordinal,
                    Arc::clone(&self.caller),
                    work_rx.clone(),
                    record_tx.clone(),
                )
                .instrument(span),
            );
        }
        // workers hold the only takers and record senders from here on
        drop(work_rx);
        drop(record_tx);

        let mut sent = 0;
        while sent < volume {
            // a unit only exists once a worker is free to take it
            let Some(slot) = work_tx.idle().await else {
                // only reachable if every worker is gone
                error!(sent, "work queue closed before all units were sent");
                break;
            };
            if slot.fill(Arc::clone(&job)).is_ok() {
                sent += 1;
            }
        }
        work_tx.close();

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(?err, "worker task failed");
            }
        }

        let summary = match collector.await {
            Ok(summary) => summary,
            Err(err) => {
                error!(?err, "collector task failed");
                RunSummary {
                    run_id,
                    planned: volume,
                    ..RunSummary::default()
                }
            }
        };
        info!(
            attempted = summary.attempted,
            responded = summary.responded,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        summary
    }
}

/// Take units until the queue is closed, one call per unit
async fn worker<C: HttpCaller>(
    ordinal: usize,
    caller: Arc<C>,
    work: Taker<Arc<JobDescriptor>>,
    records: mpsc::Sender<CallRecord>,
) {
    while let Some(job) = work.take().await {
        let started = Instant::now();
        let outcome = http::dispatch(caller.as_ref(), &job).await;
        let record = CallRecord {
            worker: ordinal,
            outcome,
            elapsed: started.elapsed(),
        };
        if records.send(record).await.is_err() {
            warn!("collector gone, dropping call record");
        }
    }
    debug!("work queue closed");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        http::{CallError, CallResponse, encode_body},
        job::{Headers, JsonBody, Method, RunRequest},
    };

    #[derive(Debug, Clone, PartialEq)]
    struct SeenCall {
        method: Method,
        url: String,
        headers: Headers,
        body: Option<Vec<u8>>,
    }

    /// Records every call; optionally slow, optionally failing every other call
    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<SeenCall>>,
        count: AtomicUsize,
        delay: Duration,
        fail_odd: bool,
    }

    impl Recorder {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        async fn record(&self, call: SeenCall) -> Result<CallResponse, CallError> {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(call);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_odd && n % 2 == 1 {
                return Err(CallError::Other("unreachable host".to_owned()));
            }
            Ok(CallResponse {
                status: 200,
                body: b"ok".to_vec(),
            })
        }

        fn seen(&self) -> Vec<SeenCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpCaller for Recorder {
        async fn get(&self, url: &str, headers: &Headers) -> Result<CallResponse, CallError> {
            self.record(SeenCall {
                method: Method::Get,
                url: url.to_owned(),
                headers: headers.clone(),
                body: None,
            })
            .await
        }

        async fn post(
            &self,
            url: &str,
            body: Option<&JsonBody>,
            headers: &Headers,
        ) -> Result<CallResponse, CallError> {
            let body = encode_body(body)?;
            self.record(SeenCall {
                method: Method::Post,
                url: url.to_owned(),
                headers: headers.clone(),
                body: Some(body),
            })
            .await
        }
    }

    /// Every call parks until the test hands out a permit
    #[derive(Debug)]
    struct Gate {
        entered: AtomicUsize,
        permits: tokio::sync::Semaphore,
    }

    impl Gate {
        fn closed() -> Self {
            Self {
                entered: AtomicUsize::new(0),
                permits: tokio::sync::Semaphore::new(0),
            }
        }

        async fn pass(&self) -> Result<CallResponse, CallError> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.permits
                .acquire()
                .await
                .map_err(|err| CallError::Other(err.to_string()))?
                .forget();
            Ok(CallResponse {
                status: 200,
                body: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl HttpCaller for Gate {
        async fn get(&self, _url: &str, _headers: &Headers) -> Result<CallResponse, CallError> {
            self.pass().await
        }

        async fn post(
            &self,
            _url: &str,
            _body: Option<&JsonBody>,
            _headers: &Headers,
        ) -> Result<CallResponse, CallError> {
            self.pass().await
        }
    }

    fn job(method: &str, parallelism: i64, volume: i64, body: Option<JsonBody>) -> JobDescriptor {
        JobDescriptor::try_from(RunRequest {
            url: Some("http://test/echo".to_owned()),
            method: Some(method.to_owned()),
            parallelism: Some(parallelism),
            load_volume: Some(volume),
            headers: Some(Headers::from([("X-Test".to_owned(), vec!["1".to_owned()])])),
            body,
        })
        .expect("valid job")
    }

    #[tokio::test]
    async fn every_unit_is_dispatched_with_identical_call() {
        let engine = Engine::new(Recorder::default());
        let body = JsonBody::from_iter([("k".to_owned(), json!("v"))]);
        let summary = engine
            .run(Arc::new(job("post", 3, 20, Some(body))))
            .await;

        assert_eq!(summary.planned, 20);
        assert_eq!(summary.attempted, 20);
        assert_eq!(summary.responded, 20);
        assert_eq!(summary.units_per_worker.values().sum::<usize>(), 20);

        let seen = engine.caller().seen();
        assert_eq!(seen.len(), 20);
        let first = &seen[0];
        assert_eq!(first.method, Method::Post);
        assert_eq!(first.body.as_deref(), Some(&br#"{"k":"v"}"#[..]));
        assert!(seen.iter().all(|call| call == first));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_worker_starves() {
        let engine = Engine::new(Recorder::slow(Duration::from_millis(2)));
        let summary = engine.run(Arc::new(job("get", 4, 100, None))).await;

        assert_eq!(summary.attempted, 100);
        assert_eq!(summary.units_per_worker.len(), 4);
        assert!(
            summary.units_per_worker.values().all(|units| *units >= 1),
            "{:?}",
            summary.units_per_worker
        );
        assert_eq!(engine.caller().count.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn producer_never_gets_ahead_of_a_busy_worker() {
        let engine = Engine::new(Gate::closed());
        let job = Arc::new(job("get", 1, 3, None));
        let run = tokio::spawn({
            let engine = engine.clone();
            let job = Arc::clone(&job);
            async move { engine.run(job).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.caller().entered.load(Ordering::SeqCst), 1);
        // ours, the producer's, and the one unit the worker is serving
        assert_eq!(
            Arc::strong_count(&job),
            3,
            "a unit was handed out while every worker was busy"
        );

        engine.caller().permits.add_permits(3);
        let summary = run.await.expect("run task");
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.responded, 3);
        assert_eq!(Arc::strong_count(&job), 1);
    }

    #[tokio::test]
    async fn failed_calls_do_not_stop_the_run() {
        let engine = Engine::new(Recorder {
            fail_odd: true,
            ..Recorder::default()
        });
        let summary = engine.run(Arc::new(job("get", 2, 10, None))).await;

        assert_eq!(summary.attempted, 10);
        assert_eq!(summary.failed, 5);
        assert_eq!(summary.responded, 5);
        assert_eq!(engine.caller().seen().len(), 10);
    }

    #[tokio::test]
    async fn get_never_carries_a_body() {
        let body = JsonBody::from_iter([("ignored".to_owned(), json!(true))]);
        let engine = Engine::new(Recorder::default());
        engine.run(Arc::new(job("GET", 2, 4, Some(body)))).await;

        let seen = engine.caller().seen();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|call| call.method == Method::Get && call.body.is_none()));
    }

    #[tokio::test]
    async fn post_without_body_sends_null() {
        let engine = Engine::new(Recorder::default());
        engine.run(Arc::new(job("post", 1, 2, None))).await;

        let seen = engine.caller().seen();
        assert!(seen.iter().all(|call| call.body.as_deref() == Some(&b"null"[..])));
    }

    #[tokio::test]
    async fn more_workers_than_units_all_exit() {
        let engine = Engine::new(Recorder::default());
        let summary = engine.run(Arc::new(job("get", 10, 3, None))).await;

        // run only returns once every worker has observed the closed queue
        assert_eq!(summary.attempted, 3);
        assert!(summary.units_per_worker.len() <= 3);
    }

    #[tokio::test]
    async fn submit_returns_before_the_run_completes() {
        let engine = Engine::new(Recorder::slow(Duration::from_millis(20)));
        let handle = engine.submit(job("get", 1, 3, None));

        // the current-thread runtime has not polled the run yet
        assert_eq!(engine.caller().count.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());

        let summary = handle.join().await.expect("run task");
        assert_eq!(summary.attempted, 3);
        assert_eq!(engine.caller().count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_ids_are_unique() {
        let engine = Engine::new(Recorder::default());
        let a = engine.submit(job("get", 1, 1, None));
        let b = engine.submit(job("get", 1, 1, None));
        assert_ne!(a.run_id(), b.run_id());

        let (a, b) = (a.join().await.unwrap(), b.join().await.unwrap());
        assert_eq!(a.attempted + b.attempted, 2);
    }
}
