//! Per-rendition media playlists.

use crate::{storage::OsSession, ManifestId, VideoProfile};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use thiserror::Error;

/// Errors that can occur when updating a playlist.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("segment {seq_no} already present for {profile}")]
    Duplicate { profile: String, seq_no: u64 },
}

/// Tracks the segments of every rendition of a stream.
pub trait PlaylistManager: Send + Sync + 'static {
    /// Identifier of the stream's master playlist.
    fn manifest_id(&self) -> ManifestId;

    /// Storage that segments referenced by this playlist are saved to.
    fn os_session(&self) -> Arc<dyn OsSession>;

    /// Append a segment to the rendition of `profile`.
    ///
    /// Inserting into a closed playlist is a no-op.
    fn insert_hls_segment(
        &self,
        profile: &VideoProfile,
        seq_no: u64,
        uri: &str,
        duration: Duration,
    ) -> Result<(), Error>;
}

/// A segment as listed in a rendition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub uri: String,
    pub duration: Duration,
}

#[derive(Default)]
struct Inner {
    closed: bool,
    renditions: HashMap<String, BTreeMap<u64, Entry>>,
}

/// [PlaylistManager] that keeps every rendition in memory.
pub struct Memory {
    manifest_id: ManifestId,
    os: Arc<dyn OsSession>,
    inner: Mutex<Inner>,
}

impl Memory {
    pub fn new(manifest_id: ManifestId, os: Arc<dyn OsSession>) -> Self {
        Self {
            manifest_id,
            os,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Segments of the rendition named `profile`, ordered by sequence number.
    pub fn segments(&self, profile: &str) -> Vec<(u64, Entry)> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .renditions
            .get(profile)
            .map(|segments| {
                segments
                    .iter()
                    .map(|(seq_no, entry)| (*seq_no, entry.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stop accepting segments.
    pub fn close(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

impl PlaylistManager for Memory {
    fn manifest_id(&self) -> ManifestId {
        self.manifest_id.clone()
    }

    fn os_session(&self) -> Arc<dyn OsSession> {
        self.os.clone()
    }

    fn insert_hls_segment(
        &self,
        profile: &VideoProfile,
        seq_no: u64,
        uri: &str,
        duration: Duration,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return Ok(());
        }
        let segments = inner.renditions.entry(profile.name.clone()).or_default();
        if segments.contains_key(&seq_no) {
            return Err(Error::Duplicate {
                profile: profile.name.clone(),
                seq_no,
            });
        }
        segments.insert(
            seq_no,
            Entry {
                uri: uri.to_string(),
                duration,
            },
        );
        Ok(())
    }
}
