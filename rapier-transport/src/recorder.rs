use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Responder = dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

/// In-memory transport that records every request it is given.
///
/// Queued responses are returned first, in order; once the queue is empty the
/// responder is consulted. The default responder answers `200` with the
/// request description as the body.
#[derive(Clone)]
pub struct RecordingTransport {
    inner: Arc<Mutex<RecorderInner>>,
    responder: Arc<Responder>,
}

struct RecorderInner {
    requests: Vec<RecordedRequest>,
    queued: VecDeque<Result<TransportResponse, TransportError>>,
}

/// A request as seen by the recording transport
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub sequence: usize,
    pub request: TransportRequest,
}

impl RecordingTransport {
    /// Create a recorder that echoes requests back with status 200
    pub fn new() -> Self {
        Self::with_responder(|request| Ok(TransportResponse::ok(request.describe())))
    }

    /// Create a recorder that computes each response from the request
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(RecorderInner {
                requests: Vec::new(),
                queued: VecDeque::new(),
            })),
            responder: Arc::new(responder),
        }
    }

    /// Queue a response to be returned for the next unanswered request
    pub fn push_response(&self, response: TransportResponse) {
        self.lock().queued.push_back(Ok(response));
    }

    /// Queue a transport failure for the next unanswered request
    pub fn push_failure(&self, error: TransportError) {
        self.lock().queued.push_back(Err(error));
    }

    /// All requests recorded so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn last_request(&self) -> Option<TransportRequest> {
        self.lock().requests.last().map(|r| r.request.clone())
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.requests.clear();
        inner.queued.clear();
    }

    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("RecordingTransport")
            .field("requests", &inner.requests.len())
            .field("queued", &inner.queued.len())
            .finish()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let queued = {
            let mut inner = self.lock();
            let sequence = inner.requests.len();
            inner.requests.push(RecordedRequest {
                sequence,
                request: request.clone(),
            });
            inner.queued.pop_front()
        };

        match queued {
            Some(outcome) => outcome,
            None => (self.responder)(&request),
        }
    }
}
