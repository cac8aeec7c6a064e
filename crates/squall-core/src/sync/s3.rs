//! S3-compatible object storage (AWS, R2, MinIO).
//!
//! Listing uses object versions so that an overwritten object's previous
//! version can be removed once the new one is confirmed. On unversioned
//! buckets every object reports the version `null` and overwrites replace in
//! place.

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;
use tracing::debug;

use super::{RemoteObject, RemoteStore, TransportError, TransportErrorKind};
use crate::paths::filename_from_url;

const UNVERSIONED: &str = "null";

/// Configuration for an S3 release feed.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (e.g., `https://<account>.r2.cloudflarestorage.com`)
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Key prefix of the feed inside the bucket, without trailing slash.
    pub prefix: String,
}

impl S3Config {
    /// Credentials and endpoint from `SQUALL_S3_*` environment variables.
    pub fn from_env(bucket: &str, prefix: &str) -> Option<Self> {
        Some(Self {
            endpoint: std::env::var("SQUALL_S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            region: std::env::var("SQUALL_S3_REGION").unwrap_or_else(|_| "auto".to_string()),
            access_key: std::env::var("SQUALL_S3_ACCESS_KEY").ok()?,
            secret_key: std::env::var("SQUALL_S3_SECRET_KEY").ok()?,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(config: S3Config) -> Self {
        let credentials = s3::config::Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "squall-sync",
        );

        let mut builder = s3::Config::builder()
            .behavior_version_latest()
            .region(s3::config::Region::new(config.region))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            // Custom endpoints (R2, MinIO) need path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: s3::Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    fn key(&self, name: &str) -> String {
        let name = filename_from_url(name);
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.prefix)
        }
    }

    fn list_prefix(&self) -> Option<String> {
        (!self.prefix.is_empty()).then(|| format!("{}/", self.prefix))
    }
}

/// Classify an SDK failure by transport and HTTP status.
fn classify<E>(name: &str, err: SdkError<E, HttpResponse>) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            TransportErrorKind::Retryable
        }
        _ => match err.raw_response().map(|r| r.status().as_u16()) {
            Some(status) => TransportError::from_status(name, status).kind(),
            None => TransportErrorKind::Fatal,
        },
    };
    TransportError::new(kind, format!("{name}: {err}")).with_source(err)
}

/// Percent-encode a key for `x-amz-copy-source`.
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let mut out = format!("{bucket}/");
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~' | b'/') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[async_trait]
impl RemoteStore for S3Store {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    async fn list(&self) -> Result<Vec<RemoteObject>, TransportError> {
        let prefix = self.list_prefix();
        let mut objects = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let page = self
                .client
                .list_object_versions()
                .bucket(&self.bucket)
                .set_prefix(prefix.clone())
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|e| classify(&self.describe(), e))?;

            for version in page.versions() {
                if !version.is_latest().unwrap_or(false) {
                    continue;
                }
                let Some(key) = version.key() else { continue };
                let name = prefix
                    .as_deref()
                    .and_then(|p| key.strip_prefix(p))
                    .unwrap_or(key);
                if name.is_empty() || name.contains('/') {
                    continue;
                }
                objects.push(RemoteObject {
                    name: name.to_string(),
                    content_hash: version
                        .e_tag()
                        .map(|t| t.trim_matches('"').to_ascii_lowercase()),
                    size: version.size().and_then(|s| u64::try_from(s).ok()),
                    version: version.version_id().map(str::to_string),
                });
            }

            if page.is_truncated().unwrap_or(false) {
                key_marker = page.next_key_marker().map(str::to_string);
                version_marker = page.next_version_id_marker().map(str::to_string);
                if key_marker.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn download(&self, name: &str) -> Result<Bytes, TransportError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
            .map_err(|e| classify(name, e))?;

        let body = resp.body.collect().await.map_err(|e| {
            TransportError::retryable(format!("{name}: failed to read body")).with_source(e)
        })?;
        Ok(body.into_bytes())
    }

    async fn upload(&self, name: &str, data: Bytes) -> Result<(), TransportError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .body(s3::primitives::ByteStream::from(data))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| classify(name, e))?;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), TransportError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(encode_copy_source(&self.bucket, &self.key(from)))
            .key(self.key(to))
            .send()
            .await
            .map_err(|e| classify(to, e))?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), TransportError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
            .map_err(|e| classify(name, e))?;
        Ok(())
    }

    /// MD5 hex, matching the ETag of single-part uploads.
    fn content_hash(&self, data: &[u8]) -> String {
        hex::encode(md5::compute(data).0)
    }

    async fn delete_superseded(&self, previous: &RemoteObject) -> Result<(), TransportError> {
        let Some(version) = previous.version.as_deref().filter(|v| *v != UNVERSIONED) else {
            return Ok(());
        };
        debug!(name = %previous.name, version, "deleting superseded version");
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(&previous.name))
            .version_id(version)
            .send()
            .await
            .map_err(|e| classify(&previous.name, e))?;
        Ok(())
    }
}
