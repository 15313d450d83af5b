use super::{validate_name, Error, OsSession};
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

const SCHEME: &str = "memory://";

/// Process-local [OsSession].
pub struct Session {
    root: String,
    external: bool,
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl Session {
    /// Create an empty session whose URIs start with `memory://{prefix}/`.
    ///
    /// `external` controls what [OsSession::is_external] reports, which lets a memory session
    /// stand in for remote storage.
    pub fn new(prefix: &str, external: bool) -> Self {
        Self {
            root: format!("{SCHEME}{prefix}/"),
            external,
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self, name: &str, data: Bytes) -> Result<String, Error> {
        validate_name(name)?;
        let uri = format!("{}{}", self.root, name);
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.clone(), data);
        Ok(uri)
    }

    fn get(&self, uri: &str) -> Result<Bytes, Error> {
        if !self.owns(uri) {
            return Err(Error::ForeignUri(uri.into()));
        }
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::NotFound(uri.into()))
    }
}

impl OsSession for Session {
    fn save_data<'a>(&'a self, name: &'a str, data: Bytes) -> BoxFuture<'a, Result<String, Error>> {
        future::ready(self.save(name, data)).boxed()
    }

    fn get_data<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, Error>> {
        future::ready(self.get(uri)).boxed()
    }

    fn is_external(&self) -> bool {
        self.external
    }

    fn owns(&self, uri: &str) -> bool {
        uri.starts_with(&self.root)
    }
}
