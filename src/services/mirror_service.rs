//! Replays mutating operations against the secondary (mirror) endpoint.
//!
//! The mirror writer is stateless: given the captured request it rewrites
//! the bucket (optional prefix), rebuilds the URL in the original
//! addressing style, re-signs with mirror credentials and sends through the
//! shared client. It never touches the inventory; the caller sequences the
//! backed-up flag after a success.

use crate::services::addressing::AddressingStyle;
use crate::services::signer::{self, Credentials, SignError};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use url::Url;

/// How much of an upstream error body is kept in the error message.
const ERROR_EXCERPT_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid mirror URL: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("mirror request failed with status {status}: {excerpt}")]
    UpstreamStatus { status: StatusCode, excerpt: String },
}

#[derive(Clone)]
pub struct MirrorService {
    endpoint: Url,
    credentials: Credentials,
    bucket_prefix: String,
    client: Client,
}

impl MirrorService {
    pub fn new(
        endpoint: Url,
        credentials: Credentials,
        bucket_prefix: String,
        client: Client,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            bucket_prefix,
            client,
        }
    }

    /// Replay one mutating operation. `headers` must already be the filtered
    /// forward set (`Content-*` / `X-Amz-*` only); any stale signature
    /// headers in it are overwritten by the new signing pass.
    ///
    /// A status of 300 or above is an error; there is no retry.
    pub async fn replicate(
        &self,
        bucket: &str,
        key: &str,
        method: &Method,
        body: &Bytes,
        headers: &HeaderMap,
        style: AddressingStyle,
    ) -> Result<(), MirrorError> {
        let mirror_bucket = format!("{}{}", self.bucket_prefix, bucket);
        let url = mirror_url(&self.endpoint, &mirror_bucket, key, style)?;

        let mut outbound = headers.clone();
        signer::sign_request(&mut outbound, method, &url, body, &self.credentials)?;

        let response = self
            .client
            .request(method.clone(), url)
            .headers(outbound)
            .body(body.clone())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let text = response.text().await.unwrap_or_default();
            let excerpt = text.chars().take(ERROR_EXCERPT_LEN).collect();
            return Err(MirrorError::UpstreamStatus { status, excerpt });
        }

        Ok(())
    }
}

/// Build the mirror URL, preserving the original addressing style.
fn mirror_url(
    endpoint: &Url,
    mirror_bucket: &str,
    key: &str,
    style: AddressingStyle,
) -> Result<Url, url::ParseError> {
    let scheme = endpoint.scheme();
    let authority = endpoint_authority(endpoint);
    match style {
        AddressingStyle::VirtualHosted => {
            let path = if key.is_empty() {
                "/".to_string()
            } else {
                format!("/{key}")
            };
            Url::parse(&format!("{scheme}://{mirror_bucket}.{authority}{path}"))
        }
        AddressingStyle::Path => {
            Url::parse(&format!("{scheme}://{authority}/{mirror_bucket}/{key}"))
        }
    }
}

/// Host plus explicit port, as it appears in the endpoint URL.
pub(crate) fn endpoint_authority(endpoint: &Url) -> String {
    let host = endpoint.host_str().unwrap_or_default();
    match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
