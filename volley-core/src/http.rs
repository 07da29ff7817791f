//! # HTTP calls
//!
//! [`HttpCaller`] is the seam between the engine and the network. A single
//! caller instance is shared by every worker of every run, so implementations
//! must be safe for concurrent use by independent callers.
use std::{fmt, str::FromStr};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::job::{Headers, JobDescriptor, JsonBody, Method};

/// Response of a completed call. Any status, including 4xx and 5xx, counts
/// as a completed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    /// status code returned by the target
    pub status: u16,
    /// full response body
    pub body: Vec<u8>,
}

impl CallResponse {
    /// body decoded as UTF-8, lossily
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A call that did not produce a response
#[derive(Debug, Error)]
pub enum CallError {
    /// header name or value could not be put on the wire
    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader {
        /// header name as given in the descriptor
        name: String,
        /// why it was rejected
        reason: String,
    },
    /// POST body could not be encoded
    #[error("error encoding request body: {0}")]
    Serialize(#[from] serde_json::Error),
    /// request construction or network failure
    #[error("error making the request: {0}")]
    Request(#[source] reqwest::Error),
    /// response body could not be read
    #[error("error reading the response: {0}")]
    Body(#[source] reqwest::Error),
    /// extension point for [`HttpCaller`] implementations that are not
    /// backed by reqwest
    #[error("{0}")]
    Other(String),
}

/// Capability to issue the two call shapes a run can make. Must be usable
/// from many tasks at once.
#[async_trait]
pub trait HttpCaller: Send + Sync + fmt::Debug + 'static {
    /// GET `url` with exactly `headers`, no body
    async fn get(&self, url: &str, headers: &Headers) -> Result<CallResponse, CallError>;

    /// POST `url` with exactly `headers`. `body` is JSON encoded, an absent
    /// body is sent as `null`
    async fn post(
        &self,
        url: &str,
        body: Option<&JsonBody>,
        headers: &Headers,
    ) -> Result<CallResponse, CallError>;
}

/// Issue the call described by `job`
pub async fn dispatch<C>(caller: &C, job: &JobDescriptor) -> Result<CallResponse, CallError>
where
    C: HttpCaller + ?Sized,
{
    match job.method() {
        Method::Get => caller.get(job.target(), job.headers()).await,
        Method::Post => caller.post(job.target(), job.body(), job.headers()).await,
    }
}

/// Encode a POST body. `None` encodes as the JSON literal `null`
pub fn encode_body(body: Option<&JsonBody>) -> Result<Vec<u8>, CallError> {
    Ok(serde_json::to_vec(&body)?)
}

/// Build the complete header map for a call. Values for one name keep their
/// order.
pub fn header_map(headers: &Headers) -> Result<HeaderMap, CallError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, values) in headers {
        let header = HeaderName::from_str(name).map_err(|err| CallError::InvalidHeader {
            name: name.clone(),
            reason: err.to_string(),
        })?;
        for value in values {
            let value = HeaderValue::from_str(value).map_err(|err| CallError::InvalidHeader {
                name: name.clone(),
                reason: err.to_string(),
            })?;
            map.append(header.clone(), value);
        }
    }
    Ok(map)
}

/// [`HttpCaller`] backed by one [`reqwest::Client`]. The client pools
/// connections internally and is cheap to clone; clones share the pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestCaller {
    client: reqwest::Client,
}

impl ReqwestCaller {
    /// Use an existing client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &Headers,
    ) -> Result<CallResponse, CallError> {
        let headers = header_map(headers)?;
        let mut request = self
            .client
            .request(method, url)
            .build()
            .map_err(CallError::Request)?;
        // caller supplied headers replace, never merge. `execute` still adds
        // the client's `accept: */*` when no accept header was given, along
        // with the transport's own `host` and `content-length`
        *request.headers_mut() = headers;
        if let Some(body) = body {
            *request.body_mut() = Some(body.into());
        }

        let response = self
            .client
            .execute(request)
            .await
            .map_err(CallError::Request)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(CallError::Body)?;
        Ok(CallResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl HttpCaller for ReqwestCaller {
    async fn get(&self, url: &str, headers: &Headers) -> Result<CallResponse, CallError> {
        self.execute(reqwest::Method::GET, url, None, headers).await
    }

    async fn post(
        &self,
        url: &str,
        body: Option<&JsonBody>,
        headers: &Headers,
    ) -> Result<CallResponse, CallError> {
        let body = encode_body(body)?;
        self.execute(reqwest::Method::POST, url, Some(body), headers)
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn absent_body_encodes_as_null() {
        assert_eq!(encode_body(None).unwrap(), b"null");
        let body = JsonBody::from_iter([("k".to_owned(), json!("v"))]);
        assert_eq!(encode_body(Some(&body)).unwrap(), br#"{"k":"v"}"#);
    }

    #[test]
    fn header_map_keeps_every_value_in_order() {
        let headers = Headers::from([(
            "X-Multi".to_owned(),
            vec!["a".to_owned(), "b".to_owned()],
        )]);
        let map = header_map(&headers).unwrap();
        let values = map
            .get_all("x-multi")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(values, ["a", "b"]);
    }

    #[test]
    fn invalid_header_name_is_a_call_error() {
        let headers = Headers::from([("bad header".to_owned(), vec!["1".to_owned()])]);
        let err = header_map(&headers).unwrap_err();
        assert!(matches!(err, CallError::InvalidHeader { ref name, .. } if name == "bad header"));
    }

    #[tokio::test]
    async fn malformed_url_fails_without_panicking() {
        let caller = ReqwestCaller::default();
        let err = caller.get("not a url", &Headers::new()).await.unwrap_err();
        assert!(matches!(err, CallError::Request(_)));
    }
}
