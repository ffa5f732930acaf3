//! Mock transport for testing.
//!
//! Routes requests by endpoint to canned replies and records every request
//! for verification. Endpoints with no configured reply answer with a plain
//! success envelope.

use super::{RawResponse, Request, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Body returned for endpoints with no configured reply.
const DEFAULT_BODY: &str = r#"{"response":{"statusCode":0,"statusMsg":"Success"}}"#;

/// One canned reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// 200 with this body.
    Body(String),
    /// Any status with this body.
    Status(u16, String),
    /// The server sends this non-HTTP status line.
    Malformed(String),
    /// The connection is refused.
    Unreachable,
}

impl MockReply {
    /// 200 with a JSON body.
    pub fn json(value: serde_json::Value) -> Self {
        MockReply::Body(value.to_string())
    }
}

type Responder = Arc<dyn Fn(&Request) -> MockReply + Send + Sync>;

#[derive(Default)]
struct MockTransportInner {
    requests: Vec<Request>,
    queued: HashMap<String, VecDeque<MockReply>>,
    routes: HashMap<String, Responder>,
    unreachable: bool,
}

/// Mock transport for testing.
///
/// Clones share state, so one mock can back several clients.
#[derive(Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("MockTransport")
            .field("requests", &inner.requests.len())
            .field("routes", &inner.routes.keys().collect::<Vec<_>>())
            .field("unreachable", &inner.unreachable)
            .finish()
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `endpoint` with `reply`.
    pub fn on(&self, endpoint: &str, reply: MockReply) {
        self.route(endpoint, move |_| reply.clone());
    }

    /// Answer `endpoint` by computing a reply from the request.
    pub fn route<F>(&self, endpoint: &str, responder: F)
    where
        F: Fn(&Request) -> MockReply + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        inner.routes.insert(endpoint.to_string(), Arc::new(responder));
    }

    /// Answer the next request to `endpoint` with `reply`, before any route.
    pub fn queue(&self, endpoint: &str, reply: MockReply) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queued
            .entry(endpoint.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Refuse every connection while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.unreachable = unreachable;
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<Request> {
        let inner = self.inner.lock().unwrap();
        inner.requests.clone()
    }

    /// Requests received for one endpoint.
    pub fn requests_to(&self, endpoint: &str) -> Vec<Request> {
        let inner = self.inner.lock().unwrap();
        inner
            .requests
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let (reply, responder) = {
            let mut inner = self.inner.lock().unwrap();
            inner.requests.push(request.clone());

            if inner.unreachable {
                (Some(MockReply::Unreachable), None)
            } else if let Some(reply) = inner
                .queued
                .get_mut(&request.endpoint)
                .and_then(VecDeque::pop_front)
            {
                (Some(reply), None)
            } else {
                (None, inner.routes.get(&request.endpoint).cloned())
            }
        };

        // Responders run outside the lock so they may inspect the mock.
        let reply = match (reply, responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(request),
            (None, None) => MockReply::Body(DEFAULT_BODY.to_string()),
        };

        match reply {
            MockReply::Body(body) => Ok(RawResponse { status: 200, body }),
            MockReply::Status(status, body) => Ok(RawResponse { status, body }),
            MockReply::Malformed(line) => Err(TransportError::MalformedStatusLine { line }),
            MockReply::Unreachable => Err(TransportError::ConnectionFailed("connection refused".into())),
        }
    }

    fn address(&self) -> String {
        "mock://".to_string()
    }
}
