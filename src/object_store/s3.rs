use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::OnceCell;

use super::{ObjectStore, StoreError, StoreKind, UrlMethod, UrlOptions};
use crate::config::S3Config;
use crate::key::hex_encode;
use crate::upload::ByteSource;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// S3-compatible object store. Requests are signed with AWS Signature V4;
/// no SDK involved, just signed REST calls.
pub struct S3Store {
    bucket: String,
    region: String,
    prefix: String,
    access_key: String,
    secret_key: String,
    /// Custom endpoint (e.g. MinIO). Forces path-style addressing.
    endpoint: Option<String>,
    client: Client,
    bucket_checked: OnceCell<()>,
}

impl S3Store {
    pub fn new(config: &S3Config, environment: &str) -> Result<Self, StoreError> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                StoreError::Configuration("S3 store requires a bucket name".to_string())
            })?;

        Ok(Self {
            bucket,
            region: config.region.clone(),
            prefix: format!("{}/{}", config.prefix.trim_matches('/'), environment),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            endpoint: config.endpoint.clone(),
            client: Client::new(),
            bucket_checked: OnceCell::new(),
        })
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }

    /// Host and canonical path for a request against `path` ("" for the
    /// bucket itself).
    fn host_and_path(&self, path: &str) -> (String, String) {
        match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint
                    .trim_start_matches("http://")
                    .trim_start_matches("https://")
                    .trim_end_matches('/')
                    .to_string();
                (host, format!("/{}/{}", self.bucket, path))
            }
            None => (
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{path}"),
            ),
        }
    }

    fn scheme(&self) -> &str {
        match &self.endpoint {
            Some(e) if e.starts_with("http://") => "http",
            _ => "https",
        }
    }

    /// Validate that the configured bucket is reachable. Runs once, on the
    /// first operation.
    async fn ensure_bucket(&self) -> Result<(), StoreError> {
        self.bucket_checked
            .get_or_try_init(|| async {
                let (host, path) = self.host_and_path("");
                let url = format!("{}://{}{}", self.scheme(), host, path);
                let headers = self.sign("HEAD", &host, &path, "", UNSIGNED_PAYLOAD);

                let mut req = self.client.head(&url);
                for (name, value) in headers {
                    req = req.header(name, value);
                }
                let resp = req.send().await.map_err(|e| {
                    StoreError::Unavailable(format!("cannot reach S3 bucket: {e}"))
                })?;

                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(StoreError::Unavailable(format!(
                        "S3 bucket does not exist: {}",
                        self.bucket
                    )));
                }
                if !resp.status().is_success() {
                    return Err(StoreError::Unavailable(format!(
                        "S3 bucket check failed ({}): {}",
                        resp.status(),
                        self.bucket
                    )));
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Produce the SigV4 headers for a request with no extra headers beyond
    /// host, x-amz-date and x-amz-content-sha256.
    fn sign(
        &self,
        method: &str,
        host: &str,
        canonical_path: &str,
        canonical_query: &str,
        payload_hash: &str,
    ) -> Vec<(String, String)> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let canonical_headers = format!(
            "host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n"
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_request = format!(
            "{method}\n{path}\n{query}\n{headers}\n{signed}\n{payload}",
            path = uri_encode(canonical_path, false),
            query = canonical_query,
            headers = canonical_headers,
            signed = signed_headers,
            payload = payload_hash,
        );

        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = self.signature(&date, &string_to_sign);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );

        vec![
            ("authorization".to_string(), authorization),
            ("x-amz-date".to_string(), amz_date),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ]
    }

    fn signature(&self, date: &str, string_to_sign: &str) -> String {
        let k_date = hmac(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        let k_region = hmac(&k_date, self.region.as_bytes());
        let k_service = hmac(&k_region, b"s3");
        let k_signing = hmac(&k_service, b"aws4_request");
        hex_encode(&hmac(&k_signing, string_to_sign.as_bytes()))
    }

    async fn request(
        &self,
        method: reqwest::Method,
        key: &str,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, StoreError> {
        self.ensure_bucket().await?;

        let object_key = self.object_key(key);
        let (host, path) = self.host_and_path(&object_key);
        let url = format!("{}://{}{}", self.scheme(), host, path);

        let payload_hash = match &body {
            Some(data) => sha256_hex(data),
            None => sha256_hex(b""),
        };
        let headers = self.sign(method.as_str(), &host, &path, "", &payload_hash);

        let mut req = self.client.request(method, &url);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(data) = body {
            req = req.body(data);
        }

        req.send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn kind(&self) -> StoreKind {
        StoreKind::S3
    }

    async fn write(&self, key: &str, source: &mut dyn ByteSource) -> Result<(), StoreError> {
        // Content-keyed blobs make overwrite bit-identical, so no existence
        // check is needed before the PUT.
        source.rewind().await?;
        let mut data = Vec::with_capacity(source.len() as usize);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = source.chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }

        let resp = self
            .request(reqwest::Method::PUT, key, Some(Bytes::from(data)))
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "S3 upload failed ({status}): {body}"
            )));
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Bytes, StoreError> {
        let resp = self.request(reqwest::Method::GET, key, None).await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "S3 download failed ({status}): {body}"
            )));
        }

        resp.bytes()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let resp = self.request(reqwest::Method::DELETE, key, None).await?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "S3 delete failed ({status}): {body}"
            )));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let resp = self.request(reqwest::Method::HEAD, key, None).await?;
        Ok(resp.status().is_success())
    }

    async fn url(&self, key: &str, options: UrlOptions) -> Result<String, StoreError> {
        self.ensure_bucket().await?;

        let object_key = self.object_key(key);
        let (host, path) = self.host_and_path(&object_key);
        let method = match options.method {
            UrlMethod::Get => "GET",
            UrlMethod::Head => "HEAD",
        };

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let credential = uri_encode(&format!("{}/{scope}", self.access_key), true);

        // Query parameters must be listed in canonical (sorted) order.
        let query = format!(
            "X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential={credential}\
             &X-Amz-Date={amz_date}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
            options.expires_in
        );

        let canonical_request = format!(
            "{method}\n{path}\n{query}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}",
            path = uri_encode(&path, false),
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = self.signature(&date, &string_to_sign);

        Ok(format!(
            "{}://{host}{path}?{query}&X-Amz-Signature={signature}",
            self.scheme()
        ))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key);
    ring::hmac::sign(&key, data).as_ref().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex_encode(ring::digest::digest(&ring::digest::SHA256, data).as_ref())
}

/// Percent-encode per the SigV4 rules. Slashes are kept in paths and encoded
/// in query values.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
