//! AWS Signature V4 request signing.
//!
//! Signing side only: the proxy never verifies inbound signatures, it
//! replaces them. Based on:
//! <https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html>
//!
//! The canonical request deliberately signs only `host`, `content-type`,
//! and `x-amz-*` headers: signing more is safe, signing fewer is not, and
//! this is the minimal set S3-compatible endpoints agree on for forwarded
//! requests in either addressing style.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue, ToStrError};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// All outbound requests are signed for this region and service.
pub const SIGNING_REGION: &str = "us-east-1";
pub const SIGNING_SERVICE: &str = "s3";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// An access key / secret key pair for one endpoint.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("header value is not visible ASCII: {0}")]
    HeaderNotAscii(#[from] ToStrError),
    #[error("constructed header value is invalid: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// Sign an outbound request in place.
///
/// Sets `X-Amz-Date`, `X-Amz-Content-Sha256` and `Authorization` on
/// `headers`. The URL must be the final outbound URL (host and path exactly
/// as the server will see them); the caller is responsible for presenting
/// the path in the form it wants signed.
pub fn sign_request(
    headers: &mut HeaderMap,
    method: &Method,
    url: &Url,
    payload: &[u8],
    credentials: &Credentials,
) -> Result<(), SignError> {
    sign_request_at(headers, method, url, payload, credentials, Utc::now())
}

/// [`sign_request`] with an explicit timestamp, for deterministic output.
pub fn sign_request_at(
    headers: &mut HeaderMap,
    method: &Method,
    url: &Url,
    payload: &[u8],
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> Result<(), SignError> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let payload_hash = hex::encode(Sha256::digest(payload));
    headers.insert("x-amz-date", HeaderValue::from_str(&amz_date)?);
    headers.insert("x-amz-content-sha256", HeaderValue::from_str(&payload_hash)?);

    let (canonical_headers, signed_headers) = collect_canonical_headers(headers, url)?;
    let canonical_uri = match url.path() {
        "" => "/",
        path => path,
    };
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        canonical_uri,
        canonical_query_string(url),
        canonical_headers,
        signed_headers,
        payload_hash,
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, SIGNING_REGION, SIGNING_SERVICE
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes())),
    );

    let signing_key = derive_signing_key(
        &credentials.secret_key,
        &date_stamp,
        SIGNING_REGION,
        SIGNING_SERVICE,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key, credential_scope, signed_headers, signature,
    );
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);

    Ok(())
}

/// Build the canonical headers block (trailing newline included) and the
/// semicolon-joined signed-headers list.
///
/// Only `host`, `content-type` and `x-amz-*` participate; `host` is always
/// present and always derived from the outbound URL, matching what the HTTP
/// layer will put on the wire.
fn collect_canonical_headers(
    headers: &HeaderMap,
    url: &Url,
) -> Result<(String, String), SignError> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers.iter() {
        let name = name.as_str();
        if name == "content-type" || name.starts_with("x-amz-") {
            let value = value.to_str()?.trim().to_string();
            map.entry(name.to_string()).or_insert(value);
        }
    }
    map.insert("host".to_string(), canonical_host(url));

    let block: String = map.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let signed = map.keys().cloned().collect::<Vec<_>>().join(";");
    Ok((block, signed))
}

/// Host component as it appears on the wire: `host` or `host:port` when a
/// non-default port is explicit in the URL.
fn canonical_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Query parameters decoded, sorted by name then value, and re-encoded with
/// the RFC 3986 unreserved set. Empty values render as `name=`.
fn canonical_query_string(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        return String::new();
    }
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes a string (RFC 3986): only `A-Z a-z 0-9 - _ . ~` pass
/// through, everything else (including `/`) is encoded.
fn percent_encode(s: &str) -> String {
    let mut encoded = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

/// Derives the signing key using the HMAC-SHA256 chain:
///
/// kDate = HMAC("AWS4" + secret, date)
/// kRegion = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = format!("AWS4{}", secret_key);
    let k_date = hmac_sha256(k_secret.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::CONTENT_TYPE;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn test_credentials() -> Credentials {
        Credentials {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn path_style_put_matches_oracle() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let url = Url::parse("https://s3.amazonaws.com/my-data/a/b.txt").unwrap();

        sign_request_at(
            &mut headers,
            &Method::PUT,
            &url,
            b"hi",
            &test_credentials(),
            fixed_now(),
        )
        .unwrap();

        assert_eq!(headers["x-amz-date"], "20260802T000000Z");
        assert_eq!(
            headers["x-amz-content-sha256"],
            "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4"
        );
        assert_eq!(
            headers[AUTHORIZATION],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260802/us-east-1/s3/aws4_request, \
             SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date, \
             Signature=59c27762fdc08fb332fdaeb5cf1c5e8bcf6ed2278ab63b58199c62f674302435"
        );
    }

    #[test]
    fn virtual_hosted_get_with_query_matches_oracle() {
        let mut headers = HeaderMap::new();
        let url =
            Url::parse("https://my-data.s3.amazonaws.com/?list-type=2&prefix=a%20b").unwrap();

        sign_request_at(
            &mut headers,
            &Method::GET,
            &url,
            b"",
            &test_credentials(),
            fixed_now(),
        )
        .unwrap();

        assert_eq!(headers["x-amz-content-sha256"], EMPTY_SHA256);
        assert_eq!(
            headers[AUTHORIZATION],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260802/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, \
             Signature=1ce30e2c24350477bbc092a5ca63637c00c366d75c0868c72d2e716dabe46265"
        );
    }

    #[test]
    fn signed_headers_always_include_host() {
        let mut headers = HeaderMap::new();
        let url = Url::parse("https://s3.amazonaws.com/").unwrap();
        sign_request_at(
            &mut headers,
            &Method::GET,
            &url,
            b"",
            &test_credentials(),
            fixed_now(),
        )
        .unwrap();

        let auth = headers[AUTHORIZATION].to_str().unwrap();
        let signed = auth
            .split("SignedHeaders=")
            .nth(1)
            .and_then(|rest| rest.split(',').next())
            .unwrap();
        assert!(signed.split(';').any(|name| name == "host"));
    }

    #[test]
    fn canonical_host_keeps_explicit_port() {
        let url = Url::parse("http://localhost:9000/bucket/key").unwrap();
        assert_eq!(canonical_host(&url), "localhost:9000");

        let url = Url::parse("https://s3.amazonaws.com/bucket").unwrap();
        assert_eq!(canonical_host(&url), "s3.amazonaws.com");
    }

    #[test]
    fn canonical_query_sorts_and_reencodes() {
        let url = Url::parse("https://h/?b=2&a=1&a=").unwrap();
        assert_eq!(canonical_query_string(&url), "a=&a=1&b=2");

        let url = Url::parse("https://h/?prefix=test%20file&list-type=2").unwrap();
        assert_eq!(
            canonical_query_string(&url),
            "list-type=2&prefix=test%20file"
        );

        let url = Url::parse("https://h/").unwrap();
        assert_eq!(canonical_query_string(&url), "");
    }

    #[test]
    fn percent_encode_unreserved_set() {
        assert_eq!(percent_encode("hello"), "hello");
        assert_eq!(percent_encode("hello world"), "hello%20world");
        assert_eq!(percent_encode("test/file.txt"), "test%2Ffile.txt");
        assert_eq!(percent_encode("test%file"), "test%25file");
        assert_eq!(percent_encode("test+file"), "test%2Bfile");
    }

    #[test]
    fn signing_key_derivation() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "s3",
        );
        assert_eq!(key.len(), 32);

        let same = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "s3",
        );
        assert_eq!(key, same);

        let other = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            "20150831",
            "us-east-1",
            "s3",
        );
        assert_ne!(key, other);
    }
}
