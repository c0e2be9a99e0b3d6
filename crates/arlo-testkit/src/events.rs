//! Scripted push stream
//!
//! Each `open` consumes the next scripted step. Once the script is used up
//! every open yields a stream that stays silent forever, which is what a
//! healthy idle subscription looks like.

use arlo_core::{ByteStream, TransportError, TransportResult};
use arlo_events::{EventSource, SUBSCRIBE_PATH};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

enum Step {
    Fail,
    Frames { chunks: Vec<Bytes>, hold: bool },
}

#[derive(Default)]
pub struct ScriptedEventSource {
    steps: Mutex<VecDeque<Step>>,
    opens: AtomicUsize,
    resume_ids: Mutex<Vec<Option<String>>>,
}

impl ScriptedEventSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` opens
    pub fn fail(self: &Arc<Self>, count: usize) -> Arc<Self> {
        let mut steps = self.steps.lock();
        for _ in 0..count {
            steps.push_back(Step::Fail);
        }
        drop(steps);
        self.clone()
    }

    /// Deliver `chunks`, then end the stream
    pub fn frames(self: &Arc<Self>, chunks: Vec<Bytes>) -> Arc<Self> {
        self.steps.lock().push_back(Step::Frames {
            chunks,
            hold: false,
        });
        self.clone()
    }

    /// Deliver `chunks`, then keep the stream open
    pub fn frames_then_hold(self: &Arc<Self>, chunks: Vec<Bytes>) -> Arc<Self> {
        self.steps
            .lock()
            .push_back(Step::Frames { chunks, hold: true });
        self.clone()
    }

    /// Number of times the stream was opened
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// `last_event_id` passed to each open, in order
    pub fn resume_ids(&self) -> Vec<Option<String>> {
        self.resume_ids.lock().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn open(&self, last_event_id: Option<String>) -> TransportResult<ByteStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.resume_ids.lock().push(last_event_id);

        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Fail) => Err(TransportError::Status {
                method: "GET",
                path: SUBSCRIBE_PATH.to_string(),
                status: 503,
                body: String::new(),
            }),
            Some(Step::Frames { chunks, hold }) => {
                let frames = futures::stream::iter(chunks.into_iter().map(Ok));
                if hold {
                    Ok(frames.chain(futures::stream::pending()).boxed())
                } else {
                    Ok(frames.boxed())
                }
            }
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// One push-stream frame carrying `data`
pub fn message_frame(id: &str, data: &Value) -> Bytes {
    Bytes::from(format!("id: {id}\nevent: message\ndata: {data}\n\n"))
}
