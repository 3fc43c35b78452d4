//! Scripted transport for tests

use super::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    Status(u16, Value),
    NoResponse,
    /// Never answers; the caller's deadline decides
    Hang,
}

impl MockReply {
    pub(crate) fn ok(body: Value) -> Self {
        MockReply::Status(200, body)
    }

    pub(crate) fn status(status: u16, body: Value) -> Self {
        MockReply::Status(status, body)
    }
}

type CallHook = Box<dyn Fn(usize) + Send + Sync>;

/// Replies from a script, then from a fallback. Records every request.
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    requests: Mutex<Vec<TransportRequest>>,
    hook: Mutex<Option<CallHook>>,
}

impl MockTransport {
    /// Answers every request with 200 `{"ok": true}`
    pub(crate) fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub(crate) fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: MockReply::ok(json!({"ok": true})),
            requests: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub(crate) fn with_fallback(mut self, fallback: MockReply) -> Self {
        self.fallback = fallback;
        self
    }

    /// Run `hook(n)` as the n-th call (1-based) is answered
    pub(crate) fn on_call(self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(call);
        }

        match reply {
            MockReply::Status(status, body) => Ok(TransportResponse { status, body }),
            MockReply::NoResponse => Err(TransportError::NoResponse("connection refused".into())),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::TimedOut)
            }
        }
    }
}
