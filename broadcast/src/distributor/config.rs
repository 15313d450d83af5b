use std::time::Duration;

/// Configuration for the [Distributor](super::Distributor).
#[derive(Clone, Debug)]
pub struct Config {
    /// How long to wait for an orchestrator to answer a submission.
    pub submit_timeout: Duration,

    /// How long each rendition download (including re-saving it) may take.
    pub download_timeout: Duration,
}
