//! Stand-ins for orchestrators and storage that tests need to control.

use crate::{
    selector::{self, BroadcastSession, OrchestratorInfo},
    storage::{self, OsSession},
    transport::{SubmitError, TranscodeResult},
    Segment,
};
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    sync::{Mutex, PoisonError},
};
use vidpay_pm::Payment;

/// A [selector::Discovery] that returns a fixed list of orchestrators.
pub struct Pool {
    orchestrators: Vec<OrchestratorInfo>,
    error: Mutex<Option<String>>,
}

impl Pool {
    pub fn new(orchestrators: Vec<OrchestratorInfo>) -> Self {
        Self {
            orchestrators,
            error: Mutex::new(None),
        }
    }

    /// Fail every later request with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }
}

impl selector::Discovery for Pool {
    fn get_orchestrators(
        &self,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<OrchestratorInfo>, selector::Error>> {
        let result = match self
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(message) => Err(selector::Error::Discovery(message)),
            None => Ok(self.orchestrators.iter().take(count).cloned().collect()),
        };
        future::ready(result).boxed()
    }
}

/// A segment as seen by [Transport].
#[derive(Clone, Debug)]
pub struct Submission {
    pub seq_no: u64,
    pub name: String,
    pub nonce: u64,
    pub payment: Option<Payment>,
}

/// A [crate::Transport] with scripted responses.
#[derive(Default)]
pub struct Transport {
    responses: Mutex<VecDeque<Result<TranscodeResult, SubmitError>>>,
    renditions: Mutex<HashMap<String, Bytes>>,
    stalled: Mutex<HashSet<String>>,
    submissions: Mutex<Vec<Submission>>,
}

impl Transport {
    /// Queue the response to the next unanswered submission.
    pub fn respond(&self, result: Result<TranscodeResult, SubmitError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    /// Make `data` downloadable from `url`.
    pub fn serve(&self, url: &str, data: Bytes) {
        self.renditions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), data);
    }

    /// Make downloads of `url` never complete.
    pub fn stall(&self, url: &str) {
        self.stalled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string());
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl crate::Transport for Transport {
    fn submit_segment<'a>(
        &'a self,
        _session: &'a BroadcastSession,
        segment: &'a Segment,
        nonce: u64,
        payment: Option<Payment>,
    ) -> BoxFuture<'a, Result<TranscodeResult, SubmitError>> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Submission {
                seq_no: segment.seq_no,
                name: segment.name.clone(),
                nonce,
                payment,
            });
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(SubmitError::Other("no response scripted".into())));
        future::ready(response).boxed()
    }

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, storage::Error>> {
        if self
            .stalled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
        {
            return future::pending().boxed();
        }
        let result = self
            .renditions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| storage::Error::NotFound(url.to_string()));
        future::ready(result).boxed()
    }
}

/// An [OsSession] that cannot save anything.
pub struct FailingSession;

impl OsSession for FailingSession {
    fn save_data<'a>(
        &'a self,
        _name: &'a str,
        _data: Bytes,
    ) -> BoxFuture<'a, Result<String, storage::Error>> {
        future::ready(Err(storage::Error::Io(io::Error::other("disk full")))).boxed()
    }

    fn get_data<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, storage::Error>> {
        future::ready(Err(storage::Error::NotFound(uri.to_string()))).boxed()
    }

    fn is_external(&self) -> bool {
        false
    }

    fn owns(&self, _uri: &str) -> bool {
        false
    }
}
