//! Client side of the content store API.
//!
//! Every call carries the bearer token and is bounded by the client timeout.
//! Any failure is reported per call; callers decide whether it matters.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::fs::atomic::write_atomic;
use crate::fs::types::{FileRecord, Tombstone};

/// A remote content store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// All files in the remote store.
    async fn list_files(&self) -> Result<Vec<FileRecord>>;

    /// Active tombstones of the remote store.
    async fn list_tombstones(&self) -> Result<Vec<Tombstone>>;

    /// Send the local file at `local_path` to `rel_path`. Returns bytes sent.
    async fn upload(&self, rel_path: &str, local_path: &Path) -> Result<u64>;

    /// Fetch `rel_path` into `local_path`, replacing it atomically. Returns
    /// bytes received.
    async fn download(&self, rel_path: &str, local_path: &Path) -> Result<u64>;

    /// Delete `rel_path` remotely.
    async fn delete(&self, rel_path: &str) -> Result<()>;
}

/// HTTP implementation of [`RemoteStore`].
#[derive(Clone)]
pub struct HttpTransport {
    base: Url,
    name: String,
    token: Option<String>,
    client: Client,
}

impl HttpTransport {
    pub fn new(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        let base = Url::parse(endpoint.url.trim_end_matches('/'))
            .map_err(|e| Error::transport(format!("invalid server URL {}: {}", endpoint.url, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::transport(format!("invalid server URL {}", endpoint.url)));
        }
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            name: base.as_str().trim_end_matches('/').to_string(),
            base,
            token: endpoint.token.clone(),
            client,
        })
    }

    /// `<base>/api/<segments...>/<rel path segments...>`, percent-encoded.
    fn url(&self, segments: &[&str], rel_path: Option<&str>) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::transport(format!("invalid server URL {}", self.base)))?;
            path.pop_if_empty().push("api");
            path.extend(segments);
            if let Some(rel) = rel_path {
                path.extend(rel.split('/').filter(|p| !p.is_empty()));
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(what));
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::transport(format!("{} {}: {}", what, status, body.trim())))
    }

    async fn get_json<T: DeserializeOwned>(&self, segment: &str) -> Result<T> {
        let url = self.url(&[segment], None)?;
        let response = self.send(self.client.get(url), segment).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::Decode {
            what: format!("{} from {}", segment, self.name),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl RemoteStore for HttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.get_json("files").await
    }

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        self.get_json("tombstones").await
    }

    async fn upload(&self, rel_path: &str, local_path: &Path) -> Result<u64> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| Error::from_io(local_path, rel_path, e))?;
        let size = data.len() as u64;
        let url = self.url(&["files"], Some(rel_path))?;
        self.send(self.client.put(url).body(data), rel_path).await?;
        Ok(size)
    }

    async fn download(&self, rel_path: &str, local_path: &Path) -> Result<u64> {
        let url = self.url(&["files"], Some(rel_path))?;
        let response = self.send(self.client.get(url), rel_path).await?;
        let data = response.bytes().await?;

        let target = local_path.to_path_buf();
        let written = tokio::task::spawn_blocking(move || write_atomic(&target, &mut data.as_ref()))
            .await
            .map_err(|e| Error::io(local_path, std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .map_err(|e| Error::io(local_path, e))?;
        Ok(written)
    }

    async fn delete(&self, rel_path: &str) -> Result<()> {
        let url = self.url(&["files"], Some(rel_path))?;
        self.send(self.client.delete(url), rel_path).await?;
        Ok(())
    }
}
