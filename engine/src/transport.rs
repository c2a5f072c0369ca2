//! Transport capability.
//!
//! The engine never talks to the network itself. Every sync attempt is
//! described as a [`Request`] and handed to a [`Transport`] exactly once;
//! whatever the transport returns (a parsed JSON body or a
//! [`TransportError`]) is surfaced to the caller verbatim.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// HTTP method of a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// A single request handed to the transport.
///
/// For [`Method::Get`] the transport serializes `data` into the query string,
/// for every other method it is sent as a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub data: Option<serde_json::Value>,
}

impl Request {
    /// Create a request without headers or data.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            data: None,
        }
    }

    /// Attach a payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a header, replacing any previous value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach `Authorization: Bearer <token>` when a token is present.
    pub fn with_bearer(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.with_header("Authorization", format!("Bearer {token}")),
            None => self,
        }
    }
}

/// An error reported by the transport.
///
/// Status, status text and response body are kept when the transport had
/// them so callers can inspect what the remote API said.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub text: Option<String>,
    pub body: Option<serde_json::Value>,
    pub message: String,
}

impl TransportError {
    /// An error that never reached the remote API (connection, encoding...).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            text: None,
            body: None,
            message: message.into(),
        }
    }

    /// An error response from the remote API.
    pub fn with_status(status: u16, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            status: Some(status),
            message: format!("{status} {text}"),
            text: Some(text),
            body: None,
        }
    }

    /// Attach the parsed response body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Performs sync requests on behalf of models and collections.
///
/// Implementations resolve to the parsed JSON body of the response
/// (`Value::Null` when the body is empty).
pub trait Transport: Send + Sync {
    fn perform(&self, request: Request) -> BoxFuture<'_, Result<serde_json::Value, TransportError>>;
}
