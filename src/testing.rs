//! Transports for driving stores in unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::gateway::{ApiRequest, ApiResponse, Transport};

/// Answers requests in order from a queue of canned responses.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.responses.lock().push_back(Ok(ApiResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn fail(&self, err: ApiError) {
        self.responses.lock().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let path = request.path.clone();
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network(format!("no scripted response for {}", path))))
    }
}

/// Parks every request until the test resolves it, so completion order is up to the test.
#[derive(Default)]
pub struct DeferredTransport {
    requests: Mutex<Vec<ApiRequest>>,
    waiting: Mutex<Vec<Option<oneshot::Sender<ApiResponse>>>>,
}

impl DeferredTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Yield until at least `count` requests have been issued.
    pub async fn wait_for_requests(&self, count: usize) {
        while self.requests.lock().len() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Complete request number `index` (in issue order).
    pub fn resolve(&self, index: usize, status: u16, body: &str) {
        let sender = self
            .waiting
            .lock()
            .get_mut(index)
            .and_then(Option::take)
            .expect("request not issued or already resolved");
        let _ = sender.send(ApiResponse {
            status,
            body: body.to_string(),
        });
    }
}

#[async_trait]
impl Transport for DeferredTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiting = self.waiting.lock();
            let mut requests = self.requests.lock();
            waiting.push(Some(tx));
            requests.push(request);
        }
        rx.await
            .map_err(|_| ApiError::Network("deferred request dropped".to_string()))
    }
}
