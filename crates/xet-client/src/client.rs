//! The CAS HTTP client: five endpoints, all addressed by XET strings.

use crate::{ByteRange, ClientError, Config, ReconstructionResponse, Result};
use bytes::Bytes;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use xet_format::{deserialize_shard, Shard};
use xet_hash::XetHash;

/// Outcome of registering a shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardRegistration {
    /// The server already held an identical shard
    AlreadyExists,
    /// The shard was newly registered
    Registered,
}

#[derive(Deserialize)]
struct UploadXorbResponse {
    was_inserted: bool,
}

#[derive(Deserialize)]
struct UploadShardResponse {
    result: u32,
}

/// Client for the XET CAS API.
///
/// Holds two connection pools: an authenticated one for the API
/// endpoints and a bare one for presigned URL fetches, which must not
/// carry the bearer token.
pub struct CasClient {
    config: Config,
    api: reqwest::Client,
    presigned: reqwest::Client,
}

impl CasClient {
    /// Create a client from a configuration.
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| ClientError::Config(format!("invalid user agent {:?}", config.user_agent)))?,
        );
        if let Some(token) = &config.token {
            let mut auth: header::HeaderValue = format!("Bearer {token}")
                .parse()
                .map_err(|_| ClientError::Config("token is not a valid header value".to_string()))?;
            auth.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth);
        }

        let api = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        let presigned = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            config,
            api,
            presigned,
        })
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn check_status(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ClientError::Remote {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }

    /// Resolve a file hash into reconstruction terms and fetch info.
    ///
    /// `byte_range` restricts the reconstruction to an inclusive byte
    /// window of the file.
    #[instrument(skip(self))]
    pub async fn get_reconstruction(
        &self,
        file_hash: &XetHash,
        byte_range: Option<ByteRange>,
    ) -> Result<ReconstructionResponse> {
        let url = format!("{}/v1/reconstructions/{file_hash}", self.config.base_url());
        let mut request = self.api.get(&url);
        if let Some(range) = byte_range {
            request = request.header(header::RANGE, range.to_header_value());
        }
        let response = Self::check_status(request.send().await?, &url)?;
        Ok(response.json().await?)
    }

    /// Query the global dedup index for a chunk.
    ///
    /// Returns the stored shard that knows the chunk, or `None` on 404.
    #[instrument(skip(self))]
    pub async fn query_chunk_dedup(&self, chunk_hash: &XetHash) -> Result<Option<Shard>> {
        let url = format!(
            "{}/v1/chunks/default-merkledb/{chunk_hash}",
            self.config.base_url()
        );
        let response = self.api.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response, &url)?;
        let body = response.bytes().await?;
        Ok(Some(deserialize_shard(&body)?))
    }

    /// Insert a serialized xorb. Idempotent on the server side.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn upload_xorb(&self, xorb_hash: &XetHash, data: Bytes) -> Result<bool> {
        let url = format!("{}/v1/xorbs/default/{xorb_hash}", self.config.base_url());
        let response = self
            .api
            .post(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let response = Self::check_status(response, &url)?;
        let parsed: UploadXorbResponse = response.json().await?;
        debug!(inserted = parsed.was_inserted, "xorb upload complete");
        Ok(parsed.was_inserted)
    }

    /// Register an upload-form shard.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn upload_shard(&self, data: Bytes) -> Result<ShardRegistration> {
        let url = format!("{}/v1/shards", self.config.base_url());
        let response = self
            .api
            .post(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let response = Self::check_status(response, &url)?;
        let parsed: UploadShardResponse = response.json().await?;
        match parsed.result {
            0 => Ok(ShardRegistration::AlreadyExists),
            1 => Ok(ShardRegistration::Registered),
            other => Err(ClientError::InvalidResponse(format!(
                "unknown shard registration result {other}"
            ))),
        }
    }

    /// Fetch xorb bytes from a presigned URL, optionally range-limited.
    ///
    /// Presigned URLs embed their own authorization; the bearer token is
    /// deliberately not sent.
    #[instrument(skip(self, url))]
    pub async fn fetch_presigned(&self, url: &str, byte_range: Option<ByteRange>) -> Result<Bytes> {
        let mut request = self.presigned.get(url);
        if let Some(range) = byte_range {
            request = request.header(header::RANGE, range.to_header_value());
        }
        let response = Self::check_status(request.send().await?, url)?;
        Ok(response.bytes().await?)
    }
}
