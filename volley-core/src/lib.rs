//! # volley
//!
//! A minimal HTTP load generation engine. A validated [`JobDescriptor`] is
//! handed to an [`Engine`], which fans `volume` identical calls out over
//! `parallelism` workers and reports every outcome through a single collector.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
pub use anyhow;
pub use async_trait::async_trait;
pub use reqwest;
pub use serde_json;
pub use tokio;
pub use tracing;

pub use crate::{
    engine::{Engine, RunHandle},
    http::{CallError, CallResponse, HttpCaller, ReqwestCaller},
    job::{JobDescriptor, Method, RunRequest, ValidationError},
    report::{CallRecord, RunSummary},
};

pub mod config;
pub mod engine;
pub mod env;
pub mod http;
pub mod job;
mod queue;
pub mod report;
