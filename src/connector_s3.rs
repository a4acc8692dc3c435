//! Amazon S3 feedback fetcher.
//!
//! Lists every object under the profile's feedback prefix and downloads each
//! body as UTF-8 text, using the S3 REST API with AWS Signature V4
//! authentication.
//!
//! # Addressing
//!
//! Against AWS the bucket is addressed virtual-hosted style
//! (`<bucket>.s3.<region>.amazonaws.com`). When `endpoint_url` is set
//! (MinIO, LocalStack) requests go path-style to `<endpoint>/<bucket>/<key>`,
//! keeping the endpoint's scheme.
//!
//! # Credentials
//!
//! Read once at startup from:
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! # Pagination
//!
//! `ListObjectsV2` is followed through `NextContinuationToken` until the
//! listing is no longer truncated. Objects are fetched page by page in the
//! order the provider lists them.
//!
//! # Failures
//!
//! The first failure ends the whole fetch. Objects already downloaded are
//! returned with the [`FetchError`], which distinguishes missing credentials,
//! errors reported by S3, and everything else (transport, malformed listing,
//! bodies that are not UTF-8). There is no retry.

use std::fmt;

use anyhow::{anyhow, Context};
use chrono::Utc;
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::BucketConfig;
use crate::models::FeedbackObject;
use crate::report::Collected;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("AWS credentials not available: {0}")]
    MissingCredentials(String),

    #[error("S3 {operation} failed (HTTP {status}, {code}): {message}")]
    Client {
        operation: &'static str,
        status: u16,
        code: String,
        message: String,
    },

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// AWS credentials loaded from the environment.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Returns `None` unless both the key id and the secret are set.
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Some(Self::new(access_key_id, secret_access_key, session_token))
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Fetch every feedback object under `prefix`.
///
/// Never returns early with an error: a failure is logged by class and
/// carried in the returned [`Collected`] along with the objects fetched
/// before it.
pub async fn fetch_feedback(
    bucket: &BucketConfig,
    prefix: &str,
    credentials: Option<&AwsCredentials>,
) -> Collected<FeedbackObject, FetchError> {
    let mut objects = Vec::new();
    match fetch_into(bucket, prefix, credentials, &mut objects).await {
        Ok(()) => {
            info!("Retrieved {} feedback files from S3.", objects.len());
            Collected::complete(objects)
        }
        Err(e) => {
            match &e {
                FetchError::MissingCredentials(_) => error!("{}", e),
                FetchError::Client { .. } => error!("AWS client error: {}", e),
                FetchError::Other(_) => error!("Error reading from S3: {}", e),
            }
            if !objects.is_empty() {
                info!("Keeping {} feedback files fetched before the error", objects.len());
            }
            Collected::truncated(objects, e)
        }
    }
}

async fn fetch_into(
    bucket: &BucketConfig,
    prefix: &str,
    credentials: Option<&AwsCredentials>,
    objects: &mut Vec<FeedbackObject>,
) -> Result<(), FetchError> {
    let credentials = credentials.ok_or_else(|| {
        FetchError::MissingCredentials(
            "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set".to_string(),
        )
    })?;

    if let Some(ref role) = bucket.role_arn {
        debug!("Profile access role: {}", role);
    }

    let client = S3Client::new(bucket, credentials);
    let mut continuation_token: Option<String> = None;

    loop {
        let page = client.list_page(prefix, continuation_token.as_deref()).await?;
        debug!(
            "Listed {} keys under s3://{}/{} (truncated: {})",
            page.keys.len(),
            bucket.name,
            prefix,
            page.is_truncated
        );

        for key in page.keys {
            let content = client.get_object_text(&key).await?;
            objects.push(FeedbackObject { key, content });
        }

        if !page.is_truncated {
            break;
        }
        match page.next_token {
            Some(token) => continuation_token = Some(token),
            None => {
                return Err(anyhow!("Truncated listing without a continuation token").into());
            }
        }
    }

    Ok(())
}

// ============ S3 Client ============

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Default, PartialEq, Eq)]
struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

struct S3Client<'a> {
    bucket: &'a BucketConfig,
    creds: &'a AwsCredentials,
    http: reqwest::Client,
    scheme: String,
    host: String,
    /// `""` for virtual-hosted addressing, `"/<bucket>"` for path-style.
    base_path: String,
}

impl<'a> S3Client<'a> {
    fn new(bucket: &'a BucketConfig, creds: &'a AwsCredentials) -> Self {
        let (scheme, host, base_path) = match bucket.endpoint_url {
            Some(ref endpoint) => {
                let (scheme, rest) = match endpoint.split_once("://") {
                    Some((scheme, rest)) => (scheme.to_string(), rest),
                    None => ("https".to_string(), endpoint.as_str()),
                };
                (
                    scheme,
                    rest.trim_end_matches('/').to_string(),
                    format!("/{}", uri_encode(&bucket.name)),
                )
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", bucket.name, bucket.region),
                String::new(),
            ),
        };

        Self {
            bucket,
            creds,
            http: reqwest::Client::new(),
            scheme,
            host,
            base_path,
        }
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage, FetchError> {
        let mut params = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), self.bucket.page_size.to_string()),
        ];
        if !prefix.is_empty() {
            params.push(("prefix".to_string(), prefix.to_string()));
        }
        if let Some(token) = token {
            params.push(("continuation-token".to_string(), token.to_string()));
        }

        let canonical_uri = if self.base_path.is_empty() {
            "/".to_string()
        } else {
            self.base_path.clone()
        };

        let resp = self
            .signed_get("ListObjectsV2", &canonical_uri, params)
            .await?;
        let xml = resp
            .text()
            .await
            .context("Failed to read ListObjectsV2 response")?;
        Ok(parse_list_page(&xml)?)
    }

    async fn get_object_text(&self, key: &str) -> Result<String, FetchError> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = format!("{}/{}", self.base_path, encoded_key);

        let resp = self.signed_get("GetObject", &canonical_uri, Vec::new()).await?;
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket.name, key))?;

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            anyhow!(
                "Object s3://{}/{} is not valid UTF-8: {}",
                self.bucket.name,
                key,
                e
            )
            .into()
        })
    }

    /// Send a SigV4-signed GET and turn non-success statuses into
    /// [`FetchError::Client`].
    async fn signed_get(
        &self,
        operation: &'static str,
        canonical_uri: &str,
        mut query_params: Vec<(String, String)>,
    ) -> Result<reqwest::Response, FetchError> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        // Build canonical query string (must be sorted)
        query_params.sort();
        let canonical_querystring: String = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
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
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.bucket.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.bucket.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", self.scheme, self.host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req_builder = self
            .http
            .get(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        let resp = req_builder
            .send()
            .await
            .with_context(|| format!("S3 {} request to {} failed", operation, url))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let (code, message) = parse_error_body(&body);
            return Err(FetchError::Client {
                operation,
                status,
                code: code.unwrap_or_else(|| "Unknown".to_string()),
                message: message
                    .unwrap_or_else(|| body.chars().take(500).collect::<String>()),
            });
        }

        Ok(resp)
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~`.
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

// ============ XML Parsing ============

/// Walk an XML document, calling `on_text` with the element path and the
/// untrimmed text of every element when it closes. Returns the root element
/// name.
fn walk_xml(xml: &str, mut on_text: impl FnMut(&[&str], String)) -> anyhow::Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    // (element name, text collected so far)
    let mut open: Vec<(String, String)> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if root.is_none() {
                    root = Some(name.clone());
                }
                open.push((name, String::new()));
            }
            Event::Empty(e) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = open.last_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some((_, text)) = open.last_mut() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                let names: Vec<&str> = open.iter().map(|(name, _)| name.as_str()).collect();
                if let Some((_, text)) = open.last() {
                    on_text(&names, text.clone());
                }
                open.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(root)
}

fn parse_list_page(xml: &str) -> anyhow::Result<ListPage> {
    let mut page = ListPage::default();

    let root = walk_xml(xml, |path, text| match path {
        ["ListBucketResult", "Contents", "Key"] => page.keys.push(text),
        ["ListBucketResult", "IsTruncated"] => page.is_truncated = text.trim() == "true",
        ["ListBucketResult", "NextContinuationToken"] => page.next_token = Some(text),
        _ => {}
    })
    .context("Malformed ListObjectsV2 response")?;

    if root.as_deref() != Some("ListBucketResult") {
        anyhow::bail!(
            "Unexpected ListObjectsV2 response root: {}",
            root.as_deref().unwrap_or("<none>")
        );
    }
    Ok(page)
}

/// Extract `Code` and `Message` from an S3 `<Error>` body, if present.
fn parse_error_body(xml: &str) -> (Option<String>, Option<String>) {
    let mut code = None;
    let mut message = None;
    let _ = walk_xml(xml, |path, text| match path {
        ["Error", "Code"] => code = Some(text.trim().to_string()),
        ["Error", "Message"] => message = Some(text.trim().to_string()),
        _ => {}
    });
    (code, message)
}
