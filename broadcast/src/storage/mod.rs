//! Object storage for segments and renditions.
//!
//! An [OsSession] saves named objects and returns the URI they can later be fetched from. The
//! broadcaster always has one (where its playlist points), and an orchestrator may advertise one
//! of its own through [OsInfo] that segments are uploaded to before submission.

use bytes::Bytes;
use futures::future::BoxFuture;
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;

pub mod fs;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;

/// Errors that can occur when interacting with storage.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object name: {0}")]
    InvalidName(String),
    #[error("uri not owned by session: {0}")]
    ForeignUri(String),
    #[error("unsupported storage: {0}")]
    Unsupported(&'static str),
    #[error("http error: {0}")]
    Http(String),
}

/// A namespace of objects in some storage backend.
pub trait OsSession: Send + Sync + 'static {
    /// Save `data` under `name`, returning the URI it can be retrieved from.
    ///
    /// Saving to an existing name replaces the object.
    fn save_data<'a>(&'a self, name: &'a str, data: Bytes) -> BoxFuture<'a, Result<String, Error>>;

    /// Retrieve an object previously saved by this session.
    fn get_data<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, Error>>;

    /// Whether URIs returned by this session are reachable by other parties.
    fn is_external(&self) -> bool;

    /// Whether `uri` refers to an object in this session.
    fn owns(&self, uri: &str) -> bool;
}

/// Description of a storage session, as advertised by an orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OsInfo {
    /// Process-local storage keyed by `prefix`.
    Memory { prefix: String },
    /// Files under `directory`.
    Local { directory: PathBuf },
    /// An HTTP server accepting `PUT` and `GET` under `base_url`.
    Http { base_url: String },
}

/// Open the session described by `info`.
pub fn new_session(info: &OsInfo) -> Result<Arc<dyn OsSession>, Error> {
    match info {
        OsInfo::Memory { prefix } => Ok(Arc::new(memory::Session::new(prefix, false))),
        OsInfo::Local { directory } => Ok(Arc::new(fs::Session::new(directory.clone()))),
        #[cfg(feature = "http")]
        OsInfo::Http { base_url } => Ok(Arc::new(http::Session::new(base_url)?)),
        #[cfg(not(feature = "http"))]
        OsInfo::Http { .. } => Err(Error::Unsupported("http")),
    }
}

/// Reject object names that are empty, absolute, or that escape their namespace.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name.starts_with('/')
        || name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        || name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || ['_', '-', '.', '/'].contains(&c)))
    {
        return Err(Error::InvalidName(name.into()));
    }
    Ok(())
}
