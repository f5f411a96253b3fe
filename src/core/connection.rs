//! Control-plane client plumbing.
//!
//! The control plane is consumed through the narrow [`ControlPlane`] trait:
//! one named operation, JSON parameters in, JSON response or a classified
//! [`RemoteError`] out. [`ConnectionManager`] is the only path stack code uses
//! to reach it, so every call carries the retry policy.

use std::fmt;
use std::sync::Arc;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::retry::{RetryError, RetryPolicy, Throttle};

/// Classification code the control plane attaches to rate-limited requests.
pub const THROTTLING_CODE: &str = "Throttling";

const REGION_HEADER: &str = "X-Strata-Region";

/// Provider classification: either a named code or a numeric status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteErrorCode {
    Status(u16),
    Named(String),
}

impl RemoteErrorCode {
    pub fn named(code: impl Into<String>) -> Self {
        RemoteErrorCode::Named(code.into())
    }
}

impl fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorCode::Status(status) => write!(f, "{}", status),
            RemoteErrorCode::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl Throttle for RemoteError {
    fn is_throttling(&self) -> bool {
        matches!(&self.code, RemoteErrorCode::Named(code) if code == THROTTLING_CODE)
    }
}

/// Remote control-plane API.
pub trait ControlPlane: Send + Sync {
    fn call(&self, operation: &str, params: &Value) -> std::result::Result<Value, RemoteError>;
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "Error")]
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "Code")]
    code: RemoteErrorCode,
    #[serde(rename = "Message", default)]
    message: String,
}

/// JSON-over-HTTP control plane: `POST {endpoint}/{operation}`.
pub struct HttpControlPlane {
    client: Client,
    endpoint: String,
    region: Option<String>,
}

impl HttpControlPlane {
    pub fn new(endpoint: &str, region: Option<String>) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(Error::config_missing_key("endpoint", None)
                .with_hint("Set \"endpoint\" in strata.json or export STRATA_ENDPOINT"));
        }

        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region,
        })
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::new(
        RemoteErrorCode::named("TransportError"),
        format!("HTTP request failed: {}", e),
    )
}

fn parse_error_body(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => RemoteError::new(envelope.error.code, envelope.error.message),
        Err(_) => RemoteError::new(RemoteErrorCode::Status(status), body.trim().to_string()),
    }
}

impl ControlPlane for HttpControlPlane {
    fn call(&self, operation: &str, params: &Value) -> std::result::Result<Value, RemoteError> {
        let url = format!("{}/{}", self.endpoint, operation);
        let mut request = self.client.post(&url).json(params);

        if let Some(region) = &self.region {
            request = request.header(REGION_HEADER, region);
        }

        let response = request.send().map_err(transport_error)?;
        let status = response.status();
        let body = response.text().map_err(transport_error)?;

        if !status.is_success() {
            return Err(parse_error_body(status.as_u16(), &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            RemoteError::new(
                RemoteErrorCode::named("InvalidResponse"),
                format!("Response was not JSON: {}", e),
            )
        })
    }
}

/// Convert a retry outcome into the crate error, keeping "gave up" apart from
/// "the call failed".
pub fn retry_error_to_error(operation: &str, err: RetryError<RemoteError>) -> Error {
    match err {
        RetryError::Call(remote) => Error::remote_call_failed(operation, &remote),
        RetryError::LimitExceeded { attempts, last } => {
            Error::retry_limit_exceeded(operation, attempts, last.message)
        }
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    plane: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(plane: Arc<dyn ControlPlane>, retry: RetryPolicy) -> Self {
        Self { plane, retry }
    }

    /// Call with backoff, keeping the provider error for callers that branch
    /// on its code or message.
    pub fn call_raw(
        &self,
        operation: &str,
        params: &Value,
    ) -> std::result::Result<Value, RetryError<RemoteError>> {
        self.retry
            .call(operation, || self.plane.call(operation, params))
    }

    pub fn call(&self, operation: &str, params: &Value) -> Result<Value> {
        self.call_raw(operation, params)
            .map_err(|e| retry_error_to_error(operation, e))
    }
}
