//! Scripted cloud transport
//!
//! Responses are queued per path (query string ignored). The last queued
//! response for a path keeps being served once the others are used up; a
//! path with nothing queued answers 404. Hooks run after a request is
//! recorded, which is how tests make the "device" answer a command on the
//! event bus.

use arlo_core::{
    ApiRequest, ApiResponse, ByteStream, Transport, TransportError, TransportResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

type Hook = Arc<dyn Fn(&ApiRequest) + Send + Sync>;

#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<ApiResponse>>>,
    streams: Mutex<HashMap<String, VecDeque<Vec<Bytes>>>>,
    hooks: Mutex<HashMap<String, Hook>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a raw response for `path`
    pub fn respond(&self, path: &str, response: ApiResponse) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a JSON response for `path`
    pub fn respond_json(&self, path: &str, status: u16, body: Value) {
        self.respond(path, ApiResponse::json(status, &body));
    }

    /// Drop anything queued for `path` and serve this JSON response instead
    pub fn replace_json(&self, path: &str, status: u16, body: Value) {
        self.responses.lock().remove(path);
        self.respond_json(path, status, body);
    }

    /// Queue a streamed body for `path`
    pub fn respond_stream(&self, path: &str, chunks: Vec<Bytes>) {
        self.streams
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(chunks);
    }

    /// Run `hook` after every request to `path`
    pub fn on_request(&self, path: &str, hook: impl Fn(&ApiRequest) + Send + Sync + 'static) {
        self.hooks.lock().insert(path.to_string(), Arc::new(hook));
    }

    /// Every request seen, in order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose path (query ignored) is `path`
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| strip_query(&r.path) == path)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn record(&self, request: &ApiRequest) {
        self.requests.lock().push(request.clone());
        let hook = self.hooks.lock().get(strip_query(&request.path)).cloned();
        if let Some(hook) = hook {
            hook(request);
        }
    }

    fn next_response(&self, path: &str) -> ApiResponse {
        let mut responses = self.responses.lock();
        match responses.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => ApiResponse::json(404, &serde_json::json!({"error": "not scripted"})),
        }
    }
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(p, _)| p)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> TransportResult<ApiResponse> {
        self.record(&request);
        Ok(self.next_response(strip_query(&request.path)))
    }

    async fn open_stream(&self, request: ApiRequest) -> TransportResult<ByteStream> {
        self.record(&request);
        let path = strip_query(&request.path).to_string();
        let chunks = self
            .streams
            .lock()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);
        match chunks {
            Some(chunks) => Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed()),
            None => Err(TransportError::Status {
                method: request.method.as_str(),
                path,
                status: 404,
                body: String::new(),
            }),
        }
    }
}
