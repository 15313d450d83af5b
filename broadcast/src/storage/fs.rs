use super::{validate_name, Error, OsSession};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use std::{io::ErrorKind, path::PathBuf};
use tokio::fs;

const SCHEME: &str = "file://";

/// [OsSession] backed by files under a directory.
///
/// Object names map onto relative paths, so `P240p/7.ts` is written to `{directory}/P240p/7.ts`.
pub struct Session {
    directory: PathBuf,
    root: String,
}

impl Session {
    pub fn new(directory: PathBuf) -> Self {
        let root = format!("{SCHEME}{}/", directory.display());
        Self { directory, root }
    }

    async fn save(&self, name: &str, data: Bytes) -> Result<String, Error> {
        validate_name(name)?;
        let path = self.directory.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        Ok(format!("{}{}", self.root, name))
    }

    async fn get(&self, uri: &str) -> Result<Bytes, Error> {
        let name = uri
            .strip_prefix(&self.root)
            .ok_or_else(|| Error::ForeignUri(uri.into()))?;
        validate_name(name)?;
        match fs::read(self.directory.join(name)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::NotFound(uri.into())),
            Err(err) => Err(err.into()),
        }
    }
}

impl OsSession for Session {
    fn save_data<'a>(&'a self, name: &'a str, data: Bytes) -> BoxFuture<'a, Result<String, Error>> {
        self.save(name, data).boxed()
    }

    fn get_data<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, Error>> {
        self.get(uri).boxed()
    }

    fn is_external(&self) -> bool {
        false
    }

    fn owns(&self, uri: &str) -> bool {
        uri.starts_with(&self.root)
    }
}
