use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use squall_schema::{RELEASES_FILENAME, ReleaseManifest, Sha1Hash};

use super::{RemoteObject, RemoteStore, TransportError};

/// A read-only feed served over plain HTTP.
///
/// There is no directory listing: the objects are whatever the remote
/// `RELEASES` names, with its SHA1 as the content hash.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|e| TransportError::fatal("failed to build HTTP client").with_source(e))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { client, base_url }
    }

    /// Absolute locations pass through; names resolve against the base URL.
    fn resolve(&self, name: &str) -> String {
        if name.starts_with("http://") || name.starts_with("https://") {
            name.to_string()
        } else {
            format!("{}{name}", self.base_url)
        }
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn list(&self) -> Result<Vec<RemoteObject>, TransportError> {
        let ledger = match self.download(RELEASES_FILENAME).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let manifest = ReleaseManifest::parse(&String::from_utf8_lossy(&ledger))
            .map_err(|e| TransportError::fatal("remote RELEASES is corrupt").with_source(e))?;

        let mut objects: Vec<RemoteObject> = manifest
            .iter()
            .map(|e| RemoteObject {
                name: e.filename.clone(),
                content_hash: Some(e.sha1.to_string()),
                size: Some(e.filesize),
                version: None,
            })
            .collect();
        objects.push(RemoteObject {
            name: RELEASES_FILENAME.to_string(),
            content_hash: Some(self.content_hash(&ledger)),
            size: Some(ledger.len() as u64),
            version: None,
        });
        Ok(objects)
    }

    async fn download(&self, name: &str) -> Result<Bytes, TransportError> {
        let url = self.resolve(name);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::from_status(name, status.as_u16()));
        }

        let mut body = Vec::with_capacity(
            usize::try_from(response.content_length().unwrap_or(0)).unwrap_or(0),
        );
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(body))
    }

    async fn upload(&self, _name: &str, _data: Bytes) -> Result<(), TransportError> {
        Err(TransportError::unsupported("HTTP feed", "upload"))
    }

    async fn copy(&self, _from: &str, _to: &str) -> Result<(), TransportError> {
        Err(TransportError::unsupported("HTTP feed", "copy"))
    }

    async fn delete(&self, _name: &str) -> Result<(), TransportError> {
        Err(TransportError::unsupported("HTTP feed", "delete"))
    }

    fn content_hash(&self, data: &[u8]) -> String {
        Sha1Hash::compute(data).to_string()
    }

    fn supports_copy(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn lists_from_releases_and_downloads() {
        let mut server = Server::new_async().await;
        let entry = squall_schema::ReleaseEntry::from_bytes("App-1.0.0-full.nupkg", b"pkg").unwrap();
        let ledger = format!("{}\n", entry.to_line());

        let _releases = server
            .mock("GET", "/feed/RELEASES")
            .with_status(200)
            .with_body(&ledger)
            .create_async()
            .await;
        let _package = server
            .mock("GET", "/feed/App-1.0.0-full.nupkg")
            .with_status(200)
            .with_body("pkg")
            .create_async()
            .await;

        let store = HttpStore::new(&format!("{}/feed", server.url())).unwrap();
        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].content_hash.as_deref(), Some(entry.sha1.as_str()));

        let data = store.download("App-1.0.0-full.nupkg").await.unwrap();
        assert_eq!(&data[..], b"pkg");
    }

    #[tokio::test]
    async fn status_codes_map_to_error_kinds() {
        let mut server = Server::new_async().await;
        let _missing = server
            .mock("GET", "/RELEASES")
            .with_status(404)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/App-1.0.0-full.nupkg")
            .with_status(503)
            .create_async()
            .await;

        let store = HttpStore::new(&server.url()).unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.download("App-1.0.0-full.nupkg").await.unwrap_err().is_retryable());
        assert!(store.upload("x", Bytes::new()).await.is_err());
    }
}
