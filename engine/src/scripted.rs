//! In-memory transport that replays queued responses.
//!
//! Used by tests and demos in place of a real HTTP client. Every request is
//! recorded so callers can assert on method, url, headers and payload.

use crate::transport::{Request, Transport, TransportError};
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// A [`Transport`] answering from a FIFO queue of scripted results.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport wrapped in `Arc` for sharing with configs.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Queue a successful response body.
    pub fn respond(&self, body: Value) -> &Self {
        self.responses.lock().push_back(Ok(body));
        self
    }

    /// Queue a failure.
    pub fn fail(&self, error: TransportError) -> &Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    /// All requests performed so far, oldest first.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.requests.lock().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of queued responses not consumed yet.
    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }
}

impl Transport for ScriptedTransport {
    fn perform(&self, request: Request) -> BoxFuture<'_, Result<Value, TransportError>> {
        tracing::trace!(method = %request.method, url = %request.url, "Scripted request");
        self.requests.lock().push(request);
        let result = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("no scripted response left")));
        Box::pin(future::ready(result))
    }
}
