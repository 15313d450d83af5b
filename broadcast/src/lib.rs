//! Distribute live video segments to remote orchestrators and collect their renditions.
//!
//! Each captured [Segment] is persisted to the broadcaster's storage and appended to the source
//! rendition of the playlist before anything leaves the machine. When an orchestrator session is
//! available, the segment is then submitted (paid for with a probabilistic micropayment ticket
//! from [vidpay_pm]) and every rendition the orchestrator reports is downloaded concurrently,
//! re-saved, hashed, and appended to the playlist.
//!
//! # Status
//!
//! `vidpay-broadcast` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod distributor;
pub mod playlist;
pub mod policy;
pub mod selector;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub mod mocks;

pub use distributor::{Connection, Distributor, Settlement, State};
pub use playlist::PlaylistManager;
pub use selector::{select_orchestrator, BroadcastSession, Discovery, Node, OrchestratorInfo};
pub use storage::OsSession;
pub use transport::{SubmitError, Transport};

use bytes::Bytes;
use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// Encoding parameters of one rendition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VideoProfile {
    /// Name of the rendition, unique within a stream.
    pub name: String,
    /// Target bitrate (e.g. `"600k"`).
    pub bitrate: String,
    /// Frame size (e.g. `"640x360"`).
    pub resolution: String,
    /// Frames per second.
    pub framerate: u32,
}

impl VideoProfile {
    pub fn new(name: &str, bitrate: &str, resolution: &str, framerate: u32) -> Self {
        Self {
            name: name.to_string(),
            bitrate: bitrate.to_string(),
            resolution: resolution.to_string(),
            framerate,
        }
    }
}

/// A captured unit of media.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Position of the segment within its stream.
    pub seq_no: u64,
    /// Encoded media.
    pub data: Bytes,
    /// Playback duration.
    pub duration: Duration,
    /// Location of `data` in external storage, if it was uploaded there.
    ///
    /// Empty when the orchestrator should receive `data` inline.
    pub name: String,
}

impl Segment {
    pub fn new(seq_no: u64, data: Bytes, duration: Duration) -> Self {
        Self {
            seq_no,
            data,
            duration,
            name: String::new(),
        }
    }
}

/// Identifies the playlist of a stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ManifestId(String);

impl ManifestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to an inbound stream.
pub trait InputStream: Send + Sync + 'static {
    /// Identifier of the stream.
    fn id(&self) -> &str;

    /// Stop accepting media from the stream.
    ///
    /// Closing an already closed stream has no effect.
    fn close(&self);

    /// Whether [InputStream::close] has been called.
    fn is_closed(&self) -> bool;
}

/// An [InputStream] that only tracks whether it was closed.
pub struct Stream {
    id: String,
    closed: AtomicBool,
}

impl Stream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            closed: AtomicBool::new(false),
        }
    }
}

impl InputStream for Stream {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
