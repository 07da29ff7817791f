//! # Job descriptors
//!
//! A [`RunRequest`] is the unvalidated wire form of a run. Converting it into
//! a [`JobDescriptor`] is the only validation the system performs; the
//! [`Engine`] assumes every descriptor it receives is well formed.
//!
//! [`Engine`]: crate::engine::Engine
use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the number of workers for a single run
pub const MAX_PARALLELISM: i64 = 1000;

/// Header name to ordered header values
pub type Headers = HashMap<String, Vec<String>>;
/// JSON object sent as the body of POST calls
pub type JsonBody = serde_json::Map<String, serde_json::Value>;

/// HTTP method used for every call in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// no request body
    Get,
    /// JSON request body
    Post,
}

impl FromStr for Method {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("get") {
            Ok(Method::Get)
        } else if s.eq_ignore_ascii_case("post") {
            Ok(Method::Post)
        } else {
            Err(ValidationError::UnsupportedMethod(s.to_owned()))
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// Inbound run configuration, as submitted by a caller. Every field is
/// optional so a missing one can be reported by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// target url
    pub url: Option<String>,
    /// `get` or `post`, any case
    pub method: Option<String>,
    /// number of workers
    pub parallelism: Option<i64>,
    /// total number of calls
    pub load_volume: Option<i64>,
    /// headers attached to every call, may be empty but must be present
    pub headers: Option<Headers>,
    /// body of POST calls
    pub body: Option<JsonBody>,
}

/// A rejected [`RunRequest`]. Every variant names the field at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// a required field was absent
    #[error("`{0}` is required")]
    Missing(&'static str),
    /// `url` was present but blank
    #[error("`url` must not be empty")]
    EmptyUrl,
    /// `method` was not `get` or `post`
    #[error("`method` must be one of get, post; got `{0}`")]
    UnsupportedMethod(String),
    /// `parallelism` outside of `[1, MAX_PARALLELISM]`
    #[error("`parallelism` must be between 1 and 1000; got {0}")]
    ParallelismOutOfRange(i64),
    /// `loadVolume` was zero or negative
    #[error("`loadVolume` must be greater than 0; got {0}")]
    VolumeNotPositive(i64),
}

impl ValidationError {
    /// wire name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Missing(field) => field,
            ValidationError::EmptyUrl => "url",
            ValidationError::UnsupportedMethod(_) => "method",
            ValidationError::ParallelismOutOfRange(_) => "parallelism",
            ValidationError::VolumeNotPositive(_) => "loadVolume",
        }
    }
}

/// One validated load test run. Immutable once built; workers share it
/// behind an `Arc` so every call in a run carries identical target, method,
/// headers and body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    #[serde(rename = "url")]
    target: String,
    method: Method,
    parallelism: usize,
    #[serde(rename = "loadVolume")]
    volume: usize,
    headers: Headers,
    body: Option<JsonBody>,
}

impl JobDescriptor {
    /// target url
    pub fn target(&self) -> &str {
        &self.target
    }

    /// method of every call
    pub fn method(&self) -> Method {
        self.method
    }

    /// number of workers, in `[1, MAX_PARALLELISM]`
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// total calls, always > 0
    pub fn volume(&self) -> usize {
        self.volume
    }

    /// headers sent verbatim with every call
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// body of POST calls. Present for GET runs too, but never sent
    pub fn body(&self) -> Option<&JsonBody> {
        self.body.as_ref()
    }
}

impl TryFrom<RunRequest> for JobDescriptor {
    type Error = ValidationError;

    fn try_from(req: RunRequest) -> Result<Self, Self::Error> {
        let target = req.url.ok_or(ValidationError::Missing("url"))?;
        if target.trim().is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        let method = req
            .method
            .ok_or(ValidationError::Missing("method"))?
            .parse::<Method>()?;

        let parallelism = req
            .parallelism
            .ok_or(ValidationError::Missing("parallelism"))?;
        if !(1..=MAX_PARALLELISM).contains(&parallelism) {
            return Err(ValidationError::ParallelismOutOfRange(parallelism));
        }

        let volume = req
            .load_volume
            .ok_or(ValidationError::Missing("loadVolume"))?;
        let volume =
            usize::try_from(volume).map_err(|_| ValidationError::VolumeNotPositive(volume))?;
        if volume == 0 {
            return Err(ValidationError::VolumeNotPositive(0));
        }

        let headers = req.headers.ok_or(ValidationError::Missing("headers"))?;

        Ok(Self {
            target,
            method,
            // range checked above
            parallelism: parallelism as usize,
            volume,
            headers,
            body: req.body,
        })
    }
}
