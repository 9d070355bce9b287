//! HMAC-SHA256 request signing for Volcengine OpenAPI calls.
//!
//! The scheme mirrors AWS SigV4 with Volcengine names:
//!
//! ```text
//! canonical  = METHOD \n PATH \n QUERY \n HEADER_LINES \n SIGNED_HEADERS \n SHA256(body)
//! string     = "HMAC-SHA256" \n X-Date \n scope \n SHA256(canonical)
//! key        = HMAC(HMAC(HMAC(HMAC(secret, date), region), service), "request")
//! signature  = hex(HMAC(key, string))
//! ```
//!
//! Only `Content-Type`, `Content-Md5`, `Host` and `X-*` headers are signed.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Who is signing, and for which region/service.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
    pub service: &'a str,
}

/// Sort and RFC 3986-encode query parameters.
pub fn canonical_query(query: &[(&str, &str)]) -> String {
    let mut items: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    items.sort();
    items
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], msg: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the per-day signing key.
pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(secret_key.as_bytes(), date);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, service);
    hmac_sha256(&k_service, "request")
}

fn is_signed_header(name: &str) -> bool {
    matches!(name, "Content-Type" | "Content-Md5" | "Host") || name.starts_with("X-")
}

/// Add `X-Date`, `X-Content-Sha256`, optional `X-Security-Token` and
/// `Authorization` to `headers`.
pub fn sign_request(
    method: &str,
    path: &str,
    headers: &mut BTreeMap<String, String>,
    body: &str,
    query: &[(&str, &str)],
    creds: &Credentials<'_>,
    now: DateTime<Utc>,
) {
    let path = if path.is_empty() { "/" } else { path };
    let x_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let short_date = &x_date[..8];

    let body_hash = sha256_hex(body.as_bytes());
    headers.insert("X-Date".into(), x_date.clone());
    headers.insert("X-Content-Sha256".into(), body_hash.clone());
    if let Some(token) = creds.session_token {
        headers.insert("X-Security-Token".into(), token.to_string());
    }

    let mut signed: BTreeMap<String, String> = headers
        .iter()
        .filter(|(k, _)| is_signed_header(k))
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect();

    if let Some(host) = signed.get_mut("host") {
        if let Some((name, port)) = host.split_once(':') {
            if port == "80" || port == "443" {
                *host = name.to_string();
            }
        }
    }

    let header_lines: String = signed.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let signed_names = signed.keys().cloned().collect::<Vec<_>>().join(";");

    let query_string = canonical_query(query);
    let canonical_request = [
        method,
        path,
        query_string.as_str(),
        header_lines.as_str(),
        signed_names.as_str(),
        body_hash.as_str(),
    ]
    .join("\n");

    let scope = format!("{}/{}/{}/request", short_date, creds.region, creds.service);
    let request_hash = sha256_hex(canonical_request.as_bytes());
    let string_to_sign = [
        "HMAC-SHA256",
        x_date.as_str(),
        scope.as_str(),
        request_hash.as_str(),
    ]
    .join("\n");

    let key = signing_key(creds.secret_key, short_date, creds.region, creds.service);
    let signature = hex::encode(hmac_sha256(&key, &string_to_sign));

    headers.insert(
        "Authorization".into(),
        format!(
            "HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key, scope, signed_names, signature
        ),
    );
}
