//! Segment submission to an orchestrator.

use crate::{selector::BroadcastSession, storage, Segment};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::io;
use thiserror::Error;
use vidpay_pm::Payment;

/// Reasons a submission fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The orchestrator refused the segment because it is at capacity.
    #[error("orchestrator busy")]
    OrchestratorBusy,
    /// The orchestrator could not be reached.
    #[error("connect failed: {0}")]
    Connect(io::ErrorKind),
    /// The orchestrator was reached but its response could not be read.
    #[error("unable to read response body: {0}")]
    ReadBody(io::ErrorKind),
    /// The orchestrator answered with a non-success status.
    #[error("unexpected status: {0}")]
    Status(u16),
    /// No response arrived in time.
    #[error("submission timed out")]
    Timeout,
    /// Failure reported only as a message.
    #[error("{0}")]
    Other(String),
}

/// Location of one rendition produced by the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscodedSegment {
    pub url: String,
}

/// What an orchestrator returns for a submitted segment.
///
/// `segments` is ordered like the profiles of the session the segment was submitted in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranscodeResult {
    pub segments: Vec<TranscodedSegment>,
    /// Orchestrator signature over the hashes of `segments`.
    pub sig: Bytes,
}

/// Connection to orchestrators.
pub trait Transport: Send + Sync + 'static {
    /// Submit `segment` for transcoding within `session`.
    ///
    /// `segment.name` is set when the segment was uploaded to the orchestrator's storage, in
    /// which case `segment.data` need not be sent.
    fn submit_segment<'a>(
        &'a self,
        session: &'a BroadcastSession,
        segment: &'a Segment,
        nonce: u64,
        payment: Option<Payment>,
    ) -> BoxFuture<'a, Result<TranscodeResult, SubmitError>>;

    /// Download a rendition.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, storage::Error>>;
}
