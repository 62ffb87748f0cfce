//! Test doubles shared by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::request::RequestDescriptor;
use crate::settings::HeaderTable;
use crate::transport::{OutgoingCall, RawOutcome, RawResponse, Transport};

/// What the transport saw for one dispatch.
#[derive(Debug, Clone)]
pub(crate) struct SeenCall {
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// Transport that replays a script of outcomes, then answers `200`.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<RawOutcome>>,
    seen: Mutex<Vec<SeenCall>>,
    hang: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<RawOutcome>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    /// A transport whose calls never complete.
    pub fn hanging() -> Arc<Self> {
        let transport = Self::default();
        transport.hang.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenCall> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, call: &OutgoingCall) -> RawOutcome {
        self.seen.lock().unwrap().push(SeenCall {
            url: call.url.clone(),
            headers: (*call.current_headers()).clone(),
        });
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(RawResponse::new(200, "")))
    }
}

/// A GET call with an empty header table.
pub(crate) fn call(url: &str) -> OutgoingCall {
    let descriptor = Arc::new(RequestDescriptor::get(url).unwrap());
    OutgoingCall::new(descriptor, url, HeaderTable::with_defaults(HashMap::new()))
}
