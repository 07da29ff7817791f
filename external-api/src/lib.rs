//! # Run submission & Healthcheck API
//!
//! This crate is the HTTP boundary in front of the volley engine. It validates
//! inbound runs, hands them to the engine without waiting on them, and
//! exposes liveness endpoints:
//!
//! /simulate/load_testing
//! /hello
//! /health
//! /ping
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity, clippy::too_many_arguments)]

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, extract::Extension, routing};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, trace};

use volley_core::{Engine, HttpCaller};

pub use crate::models::{Health, State};

/// Accepts run submissions over HTTP and reports the health of the process
#[derive(Debug)]
pub struct ExternalApi<C> {
    tx: mpsc::Sender<Health>,
    rx: mpsc::Receiver<Health>,
    addr: SocketAddr,
    state: State,
    engine: Engine<C>,
}

impl<C: HttpCaller> ExternalApi<C> {
    /// Create a new ExternalApi instance
    pub fn new(addr: SocketAddr, engine: Engine<C>) -> Self {
        trace!("starting external api");
        let (tx, rx) = mpsc::channel(10);
        let state = models::blank_health();
        Self {
            tx,
            rx,
            addr,
            state,
            engine,
        }
    }

    /// clone the health sender channel
    pub fn sender(&self) -> mpsc::Sender<Health> {
        self.tx.clone()
    }

    /// Set the health
    pub fn set_health(&self, health: Health) {
        *self.state.lock() = health;
    }

    /// Routes served by this api, sharing this instance's health and engine
    pub fn router(&self) -> Router {
        Self::routes(self.state.clone(), self.engine.clone())
    }

    fn routes(state: State, engine: Engine<C>) -> Router {
        Router::new()
            .route(
                "/simulate/load_testing",
                routing::post(handlers::simulate::<C>),
            )
            .route("/hello", routing::get(handlers::hello))
            .route("/health", routing::get(handlers::ok))
            .route("/ping", routing::get(handlers::ping))
            .layer(Extension(state))
            .layer(Extension(engine))
            .layer(TraceLayer::new_for_http())
    }

    /// Listen to Health changes over the channel
    async fn listen_status(&mut self) -> Result<()> {
        while let Some(health) = self.rx.recv().await {
            let mut guard = self.state.lock();
            if *guard != health {
                info!(%health, "health changed");
                *guard = health;
            }
        }
        info!("listen health exited-- nothing listening");
        Ok(())
    }

    /// serve the HTTP external api until `token` is cancelled
    async fn run(
        addr: SocketAddr,
        state: State,
        engine: Engine<C>,
        token: CancellationToken,
    ) -> Result<()> {
        let tcp = TcpListener::bind(&addr).await?;
        let app = Self::routes(state, engine);

        tracing::debug!("external API listening on {}", addr);

        axum::serve(tcp, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        info!("external API shut down");
        Ok(())
    }

    /// Kick off the HTTP service and start listening on all channels for
    /// changes. The task ends once `token` is cancelled
    pub fn start(mut self, token: CancellationToken) -> JoinHandle<()> {
        let state = self.state.clone();
        let addr = self.addr;
        let engine = self.engine.clone();
        // if tx is not cloned, health listen will never update since ExternalApi is owner

        tokio::spawn(async move {
            tokio::select! {
                res = Self::run(addr, state, engine, token) => {
                    if let Err(err) = res {
                        error!(?err, "external API returned with error");
                    }
                }
                res = self.listen_status() => {
                    if let Err(err) = res {
                        error!(?err, "health task returning, this should not happen");
                    }
                }
            }
        })
    }
}

mod handlers {
    use axum::{
        Json,
        extract::{Extension, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use serde_json::json;
    use tracing::{info, warn};
    use volley_core::{Engine, HttpCaller, JobDescriptor, RunRequest};

    use crate::models::{Health, ServerResult, State};

    pub(crate) async fn ok(Extension(state): Extension<State>) -> ServerResult<impl IntoResponse> {
        Ok(match *state.lock() {
            Health::Good => StatusCode::OK,
            Health::Bad => StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    /// Validate and schedule a run. Only acceptance is reported, never the
    /// run's outcome
    pub(crate) async fn simulate<C: HttpCaller>(
        Extension(engine): Extension<Engine<C>>,
        payload: Result<Json<RunRequest>, JsonRejection>,
    ) -> ServerResult<Response> {
        let Json(req) = match payload {
            Ok(payload) => payload,
            Err(rejection) => {
                warn!(%rejection, "unreadable run request");
                return Ok(bad_request(rejection.body_text()));
            }
        };
        let job = match JobDescriptor::try_from(req) {
            Ok(job) => job,
            Err(err) => {
                warn!(%err, field = err.field(), "run request rejected");
                return Ok(bad_request(err.to_string()));
            }
        };

        let data = serde_json::to_value(&job)?;
        // the handle is dropped, the run continues in the background
        let handle = engine.submit(job);
        info!(run_id = handle.run_id(), "run scheduled");

        Ok((StatusCode::OK, Json(json!({ "data": data }))).into_response())
    }

    pub(crate) async fn hello() -> impl IntoResponse {
        Json(json!({ "message": "Hello, volley!" }))
    }

    pub(crate) async fn ping() -> impl IntoResponse {
        StatusCode::OK
    }

    fn bad_request(error: String) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
    }
}

/// Various models for API responses
pub mod models {
    use axum::response::IntoResponse;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::{fmt, sync::Arc};

    /// The overall health of the system
    pub type State = Arc<Mutex<Health>>;
    /// Health is binary Good/Bad at the moment
    #[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Health {
        /// Report good health
        Good,
        /// Report bad health
        Bad,
    }

    impl fmt::Display for Health {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}",
                match *self {
                    Health::Good => "GOOD",
                    Health::Bad => "BAD",
                }
            )
        }
    }

    pub(crate) fn blank_health() -> State {
        Arc::new(Mutex::new(Health::Bad))
    }

    // error type
    /// Make our own error that wraps `anyhow::Error`.
    #[derive(Debug)]
    pub struct ServerError(anyhow::Error);
    /// return error result
    pub type ServerResult<T> = Result<T, ServerError>;

    impl IntoResponse for ServerError {
        fn into_response(self) -> axum::response::Response {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}", self.0),
            )
                .into_response()
        }
    }

    impl<E> From<E> for ServerError
    where
        E: Into<anyhow::Error>,
    {
        fn from(err: E) -> Self {
            Self(err.into())
        }
    }
}
