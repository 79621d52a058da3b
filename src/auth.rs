//! Shared Key request signing.
//!
//! Builds the canonical string-to-sign for a request and signs it with the
//! account key:
//! 1. Twelve standard header values, in fixed order, one per line
//! 2. Canonicalized `x-ms-*` headers
//! 3. Canonicalized resource (account, path, sorted query)
//! 4. HMAC-SHA256 over the result, base64-encoded

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::constants::HEADER_PREFIX;
use crate::errors::{Result, StorageError};
use crate::transport::HttpRequest;

type HmacSha256 = Hmac<Sha256>;

/// Standard headers that take part in the signature, in signing order.
const SIGNED_STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

// ── String-to-sign ──────────────────────────────────────────────────

/// Build the Shared Key string-to-sign for `request`.
///
/// ```text
/// VERB + '\n' + Content-Encoding + '\n' + ... + Range + '\n' +
/// CanonicalizedHeaders +
/// CanonicalizedResource
/// ```
pub fn string_to_sign(request: &HttpRequest, account: &str) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(request.method.as_str());
    out.push('\n');

    for name in SIGNED_STANDARD_HEADERS {
        if name == "content-length" {
            // Zero-length bodies sign as an empty value.
            let len = request
                .header(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(request.body.len() as u64);
            if len > 0 {
                out.push_str(&len.to_string());
            }
        } else if let Some(v) = request.header(name) {
            out.push_str(v);
        }
        out.push('\n');
    }

    out.push_str(&canonicalized_headers(request));
    out.push_str(&canonicalized_resource(request, account));
    out
}

/// `x-ms-*` headers, lower-cased, sorted by name, values trimmed, each
/// terminated by a newline.
pub fn canonicalized_headers(request: &HttpRequest) -> String {
    let mut ms: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in request.headers.iter() {
        let name = name.as_str().to_ascii_lowercase();
        if !name.starts_with(HEADER_PREFIX) {
            continue;
        }
        let value = value.to_str().unwrap_or_default().trim().to_string();
        ms.entry(name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    ms.iter().map(|(k, v)| format!("{k}:{v}\n")).collect()
}

/// `/account/path` followed by one `name:v1,v2` line per query parameter,
/// names lower-cased and sorted, values decoded and sorted.
pub fn canonicalized_resource(request: &HttpRequest, account: &str) -> String {
    let mut resource = format!("/{}{}", account, request.url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in request.url.query_pairs() {
        params
            .entry(k.to_lowercase())
            .or_default()
            .push(v.into_owned());
    }
    for (k, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&k);
        resource.push(':');
        resource.push_str(&values.join(","));
    }
    resource
}

// ── Signing ─────────────────────────────────────────────────────────

/// HMAC-SHA256 of `data` under `key`, base64-encoded.
pub fn compute_signature(key: &[u8], data: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StorageError::invalid_argument(format!("HMAC key error: {e}")))?;
    mac.update(data.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// The `Authorization` header value for `request`.
pub fn shared_key_authorization(request: &HttpRequest, account: &str, key: &[u8]) -> Result<String> {
    let sts = string_to_sign(request, account);
    let signature = compute_signature(key, &sts)?;
    Ok(format!("SharedKey {account}:{signature}"))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use reqwest::Url;

    const TEST_KEY: &str = "YmxvYmtpdC10ZXN0LWFjY291bnQta2V5LTAxMjM0NTY3ODk=";

    fn put_block_request() -> HttpRequest {
        let url = Url::parse(
            "https://myaccount.blob.example.net/mycontainer/my%20blob?comp=block&blockid=AAAA",
        )
        .unwrap();
        let mut req = HttpRequest::new(Method::PUT, url);
        req.body = Bytes::from_static(b"hello world");
        req.set_header("content-type", "text/plain").unwrap();
        req.set_header("x-ms-version", "2023-11-03").unwrap();
        req.set_header("x-ms-date", "Sun, 11 Oct 2009 21:49:13 GMT")
            .unwrap();
        req.set_header("x-ms-meta-tag", "  hello world ").unwrap();
        req.set_header("x-ms-client-request-id", "abc").unwrap();
        req
    }

    #[test]
    fn test_string_to_sign_layout() {
        let sts = string_to_sign(&put_block_request(), "myaccount");
        let expected = "PUT\n\n\n11\n\ntext/plain\n\n\n\n\n\n\n\
            x-ms-client-request-id:abc\n\
            x-ms-date:Sun, 11 Oct 2009 21:49:13 GMT\n\
            x-ms-meta-tag:hello world\n\
            x-ms-version:2023-11-03\n\
            /myaccount/mycontainer/my%20blob\nblockid:AAAA\ncomp:block";
        assert_eq!(sts, expected);
    }

    #[test]
    fn test_empty_body_signs_empty_content_length() {
        let url = Url::parse("https://a.blob.example.net/c?restype=container").unwrap();
        let req = HttpRequest::new(Method::DELETE, url);
        let sts = string_to_sign(&req, "a");
        assert!(sts.starts_with("DELETE\n\n\n\n"));
        assert!(sts.ends_with("/a/c\nrestype:container"));
    }

    #[test]
    fn test_repeated_query_values_sorted_and_joined() {
        let url =
            Url::parse("https://a.blob.example.net/c?restype=container&comp=list&include=snapshots&include=metadata")
                .unwrap();
        let req = HttpRequest::new(Method::GET, url);
        assert_eq!(
            canonicalized_resource(&req, "a"),
            "/a/c\ncomp:list\ninclude:metadata,snapshots\nrestype:container"
        );
    }

    #[test]
    fn test_known_signature() {
        let key = BASE64_STANDARD.decode(TEST_KEY).unwrap();
        let auth = shared_key_authorization(&put_block_request(), "myaccount", &key).unwrap();
        assert_eq!(
            auth,
            "SharedKey myaccount:rySRatmTlkUnpHLBaRPk/G504HuXd0/q9Iv0j7zE8BQ="
        );
    }

    #[test]
    fn test_non_ms_headers_not_canonicalized() {
        let mut req = put_block_request();
        req.set_header("user-agent", "blobkit").unwrap();
        assert!(!canonicalized_headers(&req).contains("user-agent"));
    }
}
