use super::{validate_name, Error, OsSession};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, StatusCode};

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

/// [OsSession] that stores objects on an HTTP server.
///
/// Objects are uploaded with `PUT {base_url}/{name}` and fetched with `GET`.
pub struct Session {
    client: Client,
    root: String,
}

impl Session {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        Ok(Self {
            client: Client::builder().build()?,
            root: format!("{}/", base_url.trim_end_matches('/')),
        })
    }

    async fn save(&self, name: &str, data: Bytes) -> Result<String, Error> {
        validate_name(name)?;
        let uri = format!("{}{}", self.root, name);
        self.client
            .put(&uri)
            .body(data)
            .send()
            .await?
            .error_for_status()?;
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Bytes, Error> {
        if !self.owns(uri) {
            return Err(Error::ForeignUri(uri.into()));
        }
        let response = self.client.get(uri).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(uri.into()));
        }
        Ok(response.error_for_status()?.bytes().await?)
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
        true
    }

    fn owns(&self, uri: &str) -> bool {
        uri.starts_with(&self.root)
    }
}
