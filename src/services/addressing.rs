//! Inbound request addressing.
//!
//! Decides whether a request is path-style (`host/bucket/key`) or
//! virtual-hosted (`bucket.host/key`) and extracts `(bucket, key)`.
//! Either component may come back empty: a service- or bucket-level
//! operation is still forwarded, it just never spawns async work.

/// How the bucket is addressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingStyle {
    /// Bucket is the first path segment.
    Path,
    /// Bucket is the leftmost hostname label.
    VirtualHosted,
}

/// The parsed addressing of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Address {
    pub bucket: String,
    pub key: String,
    pub style: AddressingStyle,
}

impl S3Address {
    /// True when the request names a concrete object, i.e. both bucket and
    /// key are present. Only object requests get inventory + mirror work.
    pub fn is_object_request(&self) -> bool {
        !self.bucket.is_empty() && !self.key.is_empty()
    }

    fn path_style(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            style: AddressingStyle::Path,
        }
    }

    fn virtual_hosted(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            style: AddressingStyle::VirtualHosted,
        }
    }
}

/// Classify an inbound request from its host header and path.
///
/// With a configured `proxy_domain`, an exact host match is path-style and a
/// `*.proxy_domain` host is virtual-hosted. Without one, any host with at
/// least two dot-separated labels is assumed virtual-hosted with the first
/// label as the bucket; everything else falls back to path-style.
pub fn parse_address(host: &str, path: &str, proxy_domain: Option<&str>) -> S3Address {
    // Strip an optional :port suffix.
    let host = host.split(':').next().unwrap_or(host);

    if let Some(domain) = proxy_domain.filter(|d| !d.is_empty()) {
        if host == domain {
            return split_path_style(path);
        }
        if let Some(bucket) = host.strip_suffix(&format!(".{domain}")) {
            if !bucket.is_empty() {
                return S3Address::virtual_hosted(bucket, strip_leading_slash(path));
            }
        }
    }

    // No proxy domain matched; a multi-label host reads as virtual-hosted.
    if let Some((bucket, _)) = host.split_once('.') {
        if !bucket.is_empty() {
            return S3Address::virtual_hosted(bucket, strip_leading_slash(path));
        }
    }

    split_path_style(path)
}

fn split_path_style(path: &str) -> S3Address {
    let path = strip_leading_slash(path);
    match path.split_once('/') {
        Some((bucket, key)) => S3Address::path_style(bucket, key),
        None => S3Address::path_style(path, ""),
    }
}

fn strip_leading_slash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}
