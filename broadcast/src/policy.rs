//! Which submission failures end the current orchestrator session.
//!
//! An orchestrator that is unreachable or busy will keep failing, so the session is torn down and
//! the stream closed. Anything else (a truncated response, a bad status, a slow orchestrator) is
//! treated as transient: the segment is lost but the session is kept for the next one.

use crate::transport::SubmitError;

/// Messages that identify a fatal failure when only a message is available.
const FATAL_MESSAGES: &[&str] = &["OrchestratorBusy", "orchestrator busy", "connection refused"];

/// Whether `err` should stop the current session.
pub fn should_stop_session(err: &SubmitError) -> bool {
    match err {
        SubmitError::OrchestratorBusy | SubmitError::Connect(_) => true,
        SubmitError::ReadBody(_) | SubmitError::Status(_) | SubmitError::Timeout => false,
        SubmitError::Other(message) => FATAL_MESSAGES.iter().any(|m| message.contains(m)),
    }
}
