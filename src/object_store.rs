//! Object store gateway for paper PDFs.
//!
//! Talks to S3-compatible storage (AWS S3, MinIO, LocalStack) through the
//! REST API with AWS Signature V4 authentication: pure-Rust signing via
//! `hmac` + `sha2`, no SDK. When `storage.endpoint_url` is set, requests use
//! path-style addressing (`endpoint/bucket/key`) as MinIO expects; otherwise
//! virtual-host addressing against AWS.
//!
//! Credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
//! (+ optional `AWS_SESSION_TOKEN`).

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const PDF_MAGIC: &[u8] = b"%PDF";

pub struct ObjectStore {
    config: StorageConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl ObjectStore {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        Ok(Self {
            config,
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Key under which a paper's PDF is stored.
    pub fn pdf_key(paper_id: &str) -> String {
        format!("papers/{}.pdf", paper_id)
    }

    /// Upload PDF bytes under `key`. Returns `Ok(false)` without writing
    /// when the payload is not a PDF (missing `%PDF` magic).
    pub async fn upload(&self, key: &str, bytes: &[u8]) -> Result<bool> {
        if !bytes.starts_with(PDF_MAGIC) {
            tracing::warn!(key, "payload is not a PDF; skipping upload");
            return Ok(false);
        }

        let (url, host, canonical_uri) = self.object_url(key);
        let payload_hash = hex_sha256(bytes);

        let (authorization, amz_date) =
            self.sign("PUT", &host, &canonical_uri, "", &payload_hash);

        let mut req = self
            .client
            .put(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .header("Content-Type", "application/pdf")
            .body(bytes.to_vec());

        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::storage(key, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::storage(
                key,
                format!(
                    "PutObject failed (HTTP {}): {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        Ok(true)
    }

    /// Download an object's bytes with a signed GET.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let (url, host, canonical_uri) = self.object_url(key);
        let payload_hash = hex_sha256(b"");

        let (authorization, amz_date) =
            self.sign("GET", &host, &canonical_uri, "", &payload_hash);

        let mut req = self
            .client
            .get(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::storage(key, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::storage(
                key,
                format!("GetObject failed (HTTP {})", resp.status()),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::storage(key, e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Full request URL, Host header value, and canonical URI for a key.
    fn object_url(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");

        match self.config.endpoint_url {
            Some(ref endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string();
                let canonical_uri = format!("/{}/{}", self.config.bucket, encoded_key);
                (
                    format!("{}://{}{}", scheme, host, canonical_uri),
                    host,
                    canonical_uri,
                )
            }
            None => {
                let host = format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                );
                let canonical_uri = format!("/{}", encoded_key);
                (
                    format!("https://{}{}", host, canonical_uri),
                    host,
                    canonical_uri,
                )
            }
        }
    }

    /// Produce the SigV4 Authorization header and the x-amz-date it signs.
    fn sign(
        &self,
        method: &str,
        host: &str,
        canonical_uri: &str,
        canonical_querystring: &str,
        payload_hash: &str,
    ) -> (String, String) {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_querystring, canonical_headers, signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        (authorization, amz_date)
    }
}

// ============ AWS Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            Error::Configuration("AWS_ACCESS_KEY_ID environment variable not set".to_string())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            Error::Configuration("AWS_SECRET_ACCESS_KEY environment variable not set".to_string())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ SigV4 helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region), service), "aws4_request")
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving unreserved characters intact.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_key_layout() {
        assert_eq!(ObjectStore::pdf_key("abc-123"), "papers/abc-123.pdf");
    }

    #[test]
    fn uri_encode_preserves_unreserved() {
        assert_eq!(uri_encode("papers/a.pdf"), "papers%2Fa.pdf");
        assert_eq!(uri_encode("abc-123_x.~"), "abc-123_x.~");
        assert_eq!(uri_encode("a b"), "a%20b");
    }

    #[test]
    fn signing_key_is_deterministic() {
        let a = derive_signing_key("secret", "20260807", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20260807", "us-east-1", "s3");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
