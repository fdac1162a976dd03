//! Forwarding to the primary endpoint and the asynchronous inventory +
//! mirror continuation spawned after successful mutating operations.

use crate::services::addressing::{AddressingStyle, S3Address};
use crate::services::inventory_service::InventoryService;
use crate::services::mirror_service::{MirrorService, endpoint_authority};
use crate::services::signer::{self, Credentials, SignError};
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method};
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};
use url::Url;

/// Content type recorded when neither the response nor the request says.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid forward URL: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("failed to forward request: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Everything the asynchronous continuation needs, captured before the
/// response is handed back to the client. The body is the payload to
/// replay against the mirror (empty for DELETE).
pub struct ReplicationJob {
    pub bucket: String,
    pub key: String,
    pub style: AddressingStyle,
    pub method: Method,
    pub body: Bytes,
    pub forward_headers: HeaderMap,
    pub size: i64,
    pub content_type: String,
}

/// Shared state behind every handler: forwarding, signing, and the two
/// async collaborators. Cloning shares all underlying resources.
#[derive(Clone)]
pub struct ProxyService {
    primary_endpoint: Url,
    credentials: Credentials,
    proxy_domain: Option<String>,
    client: Client,
    inventory: InventoryService,
    mirror: MirrorService,
    jobs: TaskTracker,
}

impl ProxyService {
    pub fn new(
        primary_endpoint: Url,
        credentials: Credentials,
        proxy_domain: Option<String>,
        client: Client,
        inventory: InventoryService,
        mirror: MirrorService,
    ) -> Self {
        Self {
            primary_endpoint,
            credentials,
            proxy_domain,
            client,
            inventory,
            mirror,
            jobs: TaskTracker::new(),
        }
    }

    pub fn proxy_domain(&self) -> Option<&str> {
        self.proxy_domain.as_deref()
    }

    /// Forward URL against the primary, preserving the inbound style: the
    /// path (and query) go through verbatim; virtual-hosted requests get
    /// the bucket grafted onto the primary's hostname.
    pub fn forward_url(
        &self,
        address: &S3Address,
        path_and_query: &str,
    ) -> Result<Url, url::ParseError> {
        let scheme = self.primary_endpoint.scheme();
        let authority = endpoint_authority(&self.primary_endpoint);
        let host = match address.style {
            AddressingStyle::VirtualHosted => format!("{}.{}", address.bucket, authority),
            AddressingStyle::Path => authority,
        };
        Url::parse(&format!("{scheme}://{host}{path_and_query}"))
    }

    /// Sign and send one request to the primary. The response is returned
    /// untouched; the caller decides what to relay and what to spawn.
    pub async fn forward(
        &self,
        method: Method,
        address: &S3Address,
        path_and_query: &str,
        inbound_headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = self.forward_url(address, path_and_query)?;
        debug!(
            "{:?}: forwarding to {}",
            address.style,
            url.as_str()
        );

        let mut headers = forwardable_headers(inbound_headers);
        signer::sign_request(&mut headers, &method, &url, &body, &self.credentials)?;

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    /// Detach the inventory + mirror continuation for one mutating request.
    /// Failures inside the task are logged, never surfaced to the client.
    pub fn spawn_replication(&self, job: ReplicationJob) {
        let inventory = self.inventory.clone();
        let mirror = self.mirror.clone();
        self.jobs.spawn(run_replication(inventory, mirror, job));
    }

    /// Wait for in-flight continuations; used on shutdown.
    pub async fn drain_jobs(&self) {
        self.jobs.close();
        self.jobs.wait().await;
    }
}

/// Copy the forwardable subset of inbound headers: `Content-*` and
/// `X-Amz-*`. Everything else is dropped, the inbound `Authorization` and
/// `Host` included. `Content-Length` is also skipped; the HTTP layer
/// regenerates it from the buffered body with the same value.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in headers.iter() {
        if name == &CONTENT_LENGTH {
            continue;
        }
        let name_str = name.as_str();
        if name_str.starts_with("content-") || name_str.starts_with("x-amz-") {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Object size to record: the response's `Content-Length` when it parses,
/// otherwise the buffered request body length.
pub fn object_size(response_headers: &HeaderMap, body: &Bytes) -> i64 {
    response_headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(body.len() as i64)
}

/// Content type to record: the response's `Content-Type`, defaulted.
pub fn object_content_type(response_headers: &HeaderMap) -> String {
    response_headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// The continuation itself: record the write, replay it against the mirror,
/// then flip the backed-up flag. An inventory failure does not stop the
/// mirror attempt; a mirror failure leaves `is_backed_up` false so external
/// reconciliation can find the row.
async fn run_replication(inventory: InventoryService, mirror: MirrorService, job: ReplicationJob) {
    if job.method == Method::PUT || job.method == Method::POST {
        match inventory
            .record_put(&job.bucket, &job.key, job.size, &job.content_type, Utc::now())
            .await
        {
            Ok(Some(record)) => debug!(
                "recorded {}/{} in inventory (id {}, {} bytes)",
                job.bucket, job.key, record.id, record.size
            ),
            Ok(None) => {}
            Err(err) => error!(
                "failed to insert object record for {}/{}: {err}",
                job.bucket, job.key
            ),
        }

        match mirror
            .replicate(
                &job.bucket,
                &job.key,
                &job.method,
                &job.body,
                &job.forward_headers,
                job.style,
            )
            .await
        {
            Ok(()) => {
                if let Err(err) = inventory.mark_backed_up(&job.bucket, &job.key).await {
                    error!(
                        "failed to update backup status for {}/{}: {err}",
                        job.bucket, job.key
                    );
                }
            }
            Err(err) => error!("failed to mirror {}/{}: {err}", job.bucket, job.key),
        }
    } else if job.method == Method::DELETE {
        if let Err(err) = inventory
            .record_delete(&job.bucket, &job.key, Utc::now())
            .await
        {
            error!(
                "failed to mark {}/{} as deleted: {err}",
                job.bucket, job.key
            );
        }

        // DELETE replays carry no payload.
        if let Err(err) = mirror
            .replicate(
                &job.bucket,
                &job.key,
                &Method::DELETE,
                &Bytes::new(),
                &job.forward_headers,
                job.style,
            )
            .await
        {
            error!(
                "failed to mirror delete of {}/{}: {err}",
                job.bucket, job.key
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{AUTHORIZATION, HOST, HeaderValue};

    fn service_for(endpoint: &str) -> ProxyService {
        let client = reqwest::Client::new();
        let endpoint = Url::parse(endpoint).unwrap();
        let credentials = Credentials {
            access_key: "access".into(),
            secret_key: "secret".into(),
        };
        let mirror = MirrorService::new(
            Url::parse("https://mirror.example.com").unwrap(),
            credentials.clone(),
            String::new(),
            client.clone(),
        );
        ProxyService::new(
            endpoint,
            credentials,
            None,
            client,
            InventoryService::disabled(),
            mirror,
        )
    }

    #[test]
    fn path_style_forward_keeps_primary_host() {
        let proxy = service_for("https://s3.amazonaws.com");
        let address = S3Address {
            bucket: "my-data".into(),
            key: "a/b.txt".into(),
            style: AddressingStyle::Path,
        };
        let url = proxy.forward_url(&address, "/my-data/a/b.txt").unwrap();
        assert_eq!(url.as_str(), "https://s3.amazonaws.com/my-data/a/b.txt");
    }

    #[test]
    fn virtual_hosted_forward_grafts_bucket_onto_host() {
        let proxy = service_for("https://s3.amazonaws.com");
        let address = S3Address {
            bucket: "my-data".into(),
            key: "a/b.txt".into(),
            style: AddressingStyle::VirtualHosted,
        };
        let url = proxy.forward_url(&address, "/a/b.txt").unwrap();
        assert_eq!(url.host_str(), Some("my-data.s3.amazonaws.com"));
        assert_eq!(url.path(), "/a/b.txt");
    }

    #[test]
    fn forward_preserves_query_and_endpoint_port() {
        let proxy = service_for("http://localhost:9000");
        let address = S3Address {
            bucket: "b".into(),
            key: "".into(),
            style: AddressingStyle::Path,
        };
        let url = proxy.forward_url(&address, "/b?list-type=2&prefix=x").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/b?list-type=2&prefix=x");
    }

    #[test]
    fn only_content_and_amz_headers_are_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2"));
        headers.insert("x-amz-meta-owner", HeaderValue::from_static("me"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("AWS4 dummy"));
        headers.insert(HOST, HeaderValue::from_static("proxy.local"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        let forwarded = forwardable_headers(&headers);
        assert_eq!(forwarded.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(forwarded.get("x-amz-meta-owner").unwrap(), "me");
        assert!(forwarded.get(CONTENT_LENGTH).is_none());
        assert!(forwarded.get(AUTHORIZATION).is_none());
        assert!(forwarded.get(HOST).is_none());
        assert!(forwarded.get("accept").is_none());
        assert_eq!(forwarded.len(), 2);
    }

    #[test]
    fn object_size_prefers_response_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(object_size(&headers, &Bytes::from_static(b"hi")), 42);

        let headers = HeaderMap::new();
        assert_eq!(object_size(&headers, &Bytes::from_static(b"hi")), 2);
    }

    #[test]
    fn object_content_type_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert_eq!(object_content_type(&headers), "text/plain");

        let headers = HeaderMap::new();
        assert_eq!(object_content_type(&headers), DEFAULT_CONTENT_TYPE);
    }
}
