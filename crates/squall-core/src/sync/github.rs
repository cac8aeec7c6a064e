//! GitHub release assets as a feed.
//!
//! Assets cannot be renamed over or copied server-side, so a replacement
//! goes up under a temporary name first; the old asset is deleted and the
//! new one renamed only after the upload succeeded.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, header};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{RemoteObject, RemoteStore, TransportError};
use crate::paths::filename_from_url;

const API_URL: &str = "https://api.github.com";
const UPLOADS_URL: &str = "https://uploads.github.com";
const TEMP_SUFFIX: &str = ".uploading";

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub tag: String,
    pub token: Option<String>,
    pub api_url: String,
    pub uploads_url: String,
}

impl GitHubConfig {
    /// Parse `owner/repo/tag`; the token comes from `SQUALL_GITHUB_TOKEN`
    /// or `GITHUB_TOKEN`.
    pub fn parse(location: &str) -> Result<Self, TransportError> {
        let mut parts = location.trim_matches('/').splitn(3, '/');
        let (Some(owner), Some(repo), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TransportError::fatal(format!(
                "expected github://owner/repo/tag, got github://{location}"
            )));
        };
        if owner.is_empty() || repo.is_empty() || tag.is_empty() {
            return Err(TransportError::fatal(format!(
                "expected github://owner/repo/tag, got github://{location}"
            )));
        }
        let token = std::env::var("SQUALL_GITHUB_TOKEN")
            .or_else(|_| std::env::var("GITHUB_TOKEN"))
            .ok()
            .filter(|t| !t.is_empty());
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            token,
            api_url: API_URL.to_string(),
            uploads_url: UPLOADS_URL.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
struct Asset {
    id: u64,
    name: String,
    size: u64,
    #[serde(default)]
    digest: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitHubStore {
    client: Client,
    config: GitHubConfig,
}

impl GitHubStore {
    pub fn new(config: GitHubConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|e| TransportError::fatal("failed to build HTTP client").with_source(e))?;
        Ok(Self { client, config })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        self.authed_accepting(request, "application/vnd.github+json")
    }

    fn authed_accepting(&self, request: RequestBuilder, accept: &str) -> RequestBuilder {
        let request = request.header(header::ACCEPT, accept);
        match &self.config.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        )
    }

    async fn release(&self) -> Result<Release, TransportError> {
        let url = format!("{}/releases/tags/{}", self.repo_url(), self.config.tag);
        let response = self.authed(self.client.get(&url)).send().await?;
        check(&self.config.tag, &response)?;
        Ok(response.json::<Release>().await?)
    }

    async fn asset(&self, name: &str) -> Result<Option<Asset>, TransportError> {
        Ok(self
            .release()
            .await?
            .assets
            .into_iter()
            .find(|a| a.name.eq_ignore_ascii_case(name)))
    }

    async fn delete_asset(&self, asset: &Asset) -> Result<(), TransportError> {
        let url = format!("{}/releases/assets/{}", self.repo_url(), asset.id);
        let response = self.authed(self.client.delete(&url)).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        check(&asset.name, &response)
    }

    async fn upload_asset(&self, release_id: u64, name: &str, data: Bytes) -> Result<Asset, TransportError> {
        let url = format!(
            "{}/repos/{}/{}/releases/{release_id}/assets",
            self.config.uploads_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        );
        let response = self
            .authed(self.client.post(&url))
            .query(&[("name", name)])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        check(name, &response)?;
        Ok(response.json::<Asset>().await?)
    }

    async fn rename_asset(&self, asset: &Asset, name: &str) -> Result<(), TransportError> {
        let url = format!("{}/releases/assets/{}", self.repo_url(), asset.id);
        let response = self
            .authed(self.client.patch(&url))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        check(name, &response)
    }
}

fn check(name: &str, response: &reqwest::Response) -> Result<(), TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::from_status(name, status.as_u16()))
    }
}

#[async_trait]
impl RemoteStore for GitHubStore {
    fn describe(&self) -> String {
        format!(
            "github://{}/{}/{}",
            self.config.owner, self.config.repo, self.config.tag
        )
    }

    async fn list(&self) -> Result<Vec<RemoteObject>, TransportError> {
        Ok(self
            .release()
            .await?
            .assets
            .into_iter()
            .filter(|a| !a.name.ends_with(TEMP_SUFFIX))
            .map(|a| RemoteObject {
                name: a.name,
                content_hash: a.digest,
                size: Some(a.size),
                version: Some(a.id.to_string()),
            })
            .collect())
    }

    async fn download(&self, name: &str) -> Result<Bytes, TransportError> {
        let name = filename_from_url(name);
        let asset = self
            .asset(name)
            .await?
            .ok_or_else(|| TransportError::not_found(name))?;
        let url = format!("{}/releases/assets/{}", self.repo_url(), asset.id);
        let response = self
            .authed_accepting(self.client.get(&url), "application/octet-stream")
            .send()
            .await?;
        check(name, &response)?;
        Ok(response.bytes().await?)
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), TransportError> {
        let release = self.release().await?;
        let existing = release
            .assets
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned();

        let Some(existing) = existing else {
            self.upload_asset(release.id, name, data).await?;
            return Ok(());
        };

        let temp_name = format!("{name}{TEMP_SUFFIX}");
        if let Some(stale) = release.assets.iter().find(|a| a.name == temp_name) {
            self.delete_asset(stale).await?;
        }
        let fresh = self.upload_asset(release.id, &temp_name, data).await?;
        debug!(name, "replacing release asset");
        self.delete_asset(&existing).await?;
        self.rename_asset(&fresh, name).await
    }

    async fn copy(&self, _from: &str, _to: &str) -> Result<(), TransportError> {
        Err(TransportError::unsupported("GitHub releases", "copy"))
    }

    async fn delete(&self, name: &str) -> Result<(), TransportError> {
        match self.asset(name).await? {
            Some(asset) => self.delete_asset(&asset).await,
            None => Ok(()),
        }
    }

    fn content_hash(&self, data: &[u8]) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(data)))
    }

    fn supports_copy(&self) -> bool {
        false
    }
}
