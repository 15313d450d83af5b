//! Choose an orchestrator and open a session with it.

use crate::{
    playlist::PlaylistManager,
    storage::{self, OsInfo, OsSession},
    ManifestId, VideoProfile,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use vidpay_pm::{Sender, TicketParams};

/// Errors that can occur when selecting an orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no orchestrators configured")]
    NoOrchestratorsConfigured,
    #[error("no orchestrators available")]
    DiscoveryExhausted,
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("unable to open orchestrator storage: {0}")]
    Storage(#[from] storage::Error),
}

/// What an orchestrator advertises about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorInfo {
    /// Endpoint segments are submitted to.
    pub transcoder: String,
    /// Storage the orchestrator prefers segments be uploaded to, most preferred first.
    pub storage: Vec<OsInfo>,
    /// Terms of payment, absent when the orchestrator transcodes for free.
    pub ticket_params: Option<TicketParams>,
}

/// Source of orchestrators.
pub trait Discovery: Send + Sync + 'static {
    /// Return up to `count` orchestrators.
    fn get_orchestrators(&self, count: usize) -> BoxFuture<'_, Result<Vec<OrchestratorInfo>, Error>>;
}

/// Broadcaster-side configuration shared by all streams.
#[derive(Clone, Default)]
pub struct Node {
    /// Where orchestrators are discovered. When absent, streams are only stored locally.
    pub orchestrator_pool: Option<Arc<dyn Discovery>>,
    /// Renditions requested for every stream.
    pub profiles: Vec<VideoProfile>,
    /// Issues tickets to paid orchestrators. When absent, segments are submitted unpaid.
    pub sender: Option<Arc<Sender>>,
}

/// Everything needed to submit the segments of one stream to one orchestrator.
#[derive(Clone)]
pub struct BroadcastSession {
    pub broadcaster: Option<Arc<Sender>>,
    pub manifest_id: ManifestId,
    pub profiles: Vec<VideoProfile>,
    pub orchestrator_info: OrchestratorInfo,
    /// Storage advertised by the orchestrator.
    pub orchestrator_os: Option<Arc<dyn OsSession>>,
    /// Storage the playlist points into.
    pub broadcaster_os: Option<Arc<dyn OsSession>>,
}

/// Open a session with an orchestrator drawn from `node`'s pool.
///
/// A discovery error is returned as-is even if the pool also produced candidates.
pub async fn select_orchestrator(
    node: &Node,
    playlist: &dyn PlaylistManager,
) -> Result<BroadcastSession, Error> {
    let Some(pool) = &node.orchestrator_pool else {
        info!("no orchestrators specified; not transcoding");
        return Err(Error::NoOrchestratorsConfigured);
    };

    let orchestrators = pool.get_orchestrators(1).await?;
    let Some(orchestrator_info) = orchestrators.into_iter().next() else {
        return Err(Error::DiscoveryExhausted);
    };

    let orchestrator_os = match orchestrator_info.storage.first() {
        Some(info) => Some(storage::new_session(info)?),
        None => None,
    };
    let manifest_id = playlist.manifest_id();
    debug!(
        %manifest_id,
        transcoder = %orchestrator_info.transcoder,
        paid = orchestrator_info.ticket_params.is_some(),
        "selected orchestrator"
    );

    Ok(BroadcastSession {
        broadcaster: node.sender.clone(),
        manifest_id,
        profiles: node.profiles.clone(),
        orchestrator_info,
        orchestrator_os,
        broadcaster_os: Some(playlist.os_session()),
    })
}
