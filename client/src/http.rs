//! `reqwest`-backed transport.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use supportive_engine::{Method, Request, Transport, TransportError};

/// Performs engine requests over HTTP with JSON bodies.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing client (connection pool, proxies, timeouts).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(header_map(&request)?);

        if let Some(data) = &request.data {
            builder = match request.method {
                Method::Get => builder.query(&query_pairs(data)),
                _ => builder.body(data.to_string()),
            };
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::new(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::new(err.to_string()))?;
        let body = parse_body(&text);

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown Status");
            let err = TransportError::with_status(status.as_u16(), reason);
            return Err(match body {
                Value::Null => err,
                body => err.with_body(body),
            });
        }

        Ok(body)
    }
}

impl Transport for HttpTransport {
    fn perform(&self, request: Request) -> BoxFuture<'_, Result<Value, TransportError>> {
        self.send(request).boxed()
    }
}

fn header_map(request: &Request) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| TransportError::new(format!("invalid header name {name}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| TransportError::new(format!("invalid header value: {err}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Query parameters for a GET payload: strings are sent raw, every other
/// value as its JSON text. Non-object payloads produce no parameters.
pub(crate) fn query_pairs(data: &Value) -> Vec<(String, String)> {
    let Some(object) = data.as_object() else {
        return Vec::new();
    };

    object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Parse a response body. Empty bodies become `null`, non-JSON bodies are
/// kept as a string.
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs(&json!({"since": "2024-03-01", "limit": 20, "unread": true}));
        assert_eq!(
            pairs,
            vec![
                ("limit".to_string(), "20".to_string()),
                ("since".to_string(), "2024-03-01".to_string()),
                ("unread".to_string(), "true".to_string()),
            ]
        );
        assert!(query_pairs(&json!([1, 2])).is_empty());
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("  \n"), Value::Null);
        assert_eq!(parse_body(r#"{"id": 1}"#), json!({"id": 1}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn test_header_map() {
        let request = Request::new(Method::Post, "https://api.test/")
            .with_bearer(Some("abc"))
            .with_header("X-Client", "supportive-rs");

        let headers = header_map(&request).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["authorization"], "Bearer abc");
        assert_eq!(headers["x-client"], "supportive-rs");
    }

    #[test]
    fn test_invalid_header_is_transport_error() {
        let request = Request::new(Method::Get, "https://api.test/").with_header("bad name", "x");
        assert!(header_map(&request).is_err());
    }
}
