//! Shared helpers: a local S3-compatible endpoint and config builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;

use iris_sync::config::{
    BucketConfig, Config, DatabaseConfig, Profile, SqliteConfig, SyncConfig,
};

pub const BUCKET: &str = "iris-feedback";
pub const PREFIX: &str = "dev/feedback/";

/// In-process stand-in for an S3 bucket, addressed path-style.
#[derive(Default)]
pub struct MockBucket {
    pub objects: Vec<(String, Vec<u8>)>,
    pub deny_listing: bool,
    pub list_requests: AtomicUsize,
    pub get_requests: AtomicUsize,
}

impl MockBucket {
    pub fn with_objects(objects: &[(&str, &[u8])]) -> Self {
        Self {
            objects: objects
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn list_requests(&self) -> usize {
        self.list_requests.load(Ordering::SeqCst)
    }

    pub fn get_requests(&self) -> usize {
        self.get_requests.load(Ordering::SeqCst)
    }
}

/// Serve `bucket` on an ephemeral local port; returns the endpoint URL.
pub async fn spawn_s3(bucket: MockBucket) -> (String, Arc<MockBucket>) {
    let state = Arc::new(bucket);
    let app = Router::new().fallback(handle).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

async fn handle(
    State(bucket): State<Arc<MockBucket>>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let signed = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("AWS4-HMAC-SHA256 Credential="));
    if !signed || !headers.contains_key("x-amz-date") {
        return s3_error(StatusCode::FORBIDDEN, "AccessDenied", "Request is not signed");
    }

    let bucket_path = format!("/{}", BUCKET);
    let path = uri.path();
    if path == bucket_path {
        bucket.list_requests.fetch_add(1, Ordering::SeqCst);
        if bucket.deny_listing {
            return s3_error(StatusCode::FORBIDDEN, "AccessDenied", "Access Denied");
        }
        return list_objects(&bucket, &params);
    }

    if let Some(key) = path.strip_prefix(&format!("{}/", bucket_path)) {
        bucket.get_requests.fetch_add(1, Ordering::SeqCst);
        return match bucket.objects.iter().find(|(k, _)| k == key) {
            Some((_, body)) => (StatusCode::OK, body.clone()).into_response(),
            None => s3_error(
                StatusCode::NOT_FOUND,
                "NoSuchKey",
                "The specified key does not exist.",
            ),
        };
    }

    s3_error(
        StatusCode::NOT_FOUND,
        "NoSuchBucket",
        "The specified bucket does not exist",
    )
}

fn list_objects(bucket: &MockBucket, params: &HashMap<String, String>) -> Response {
    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let max_keys: usize = params
        .get("max-keys")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);
    let start: usize = params
        .get("continuation-token")
        .and_then(|t| t.strip_prefix("after-"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut keys: Vec<&str> = bucket
        .objects
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| k.starts_with(&prefix))
        .collect();
    keys.sort();

    let end = (start + max_keys).min(keys.len());
    let page = &keys[start.min(end)..end];
    let truncated = end < keys.len();

    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
    );
    xml.push_str(&format!("<Name>{}</Name><Prefix>{}</Prefix>", BUCKET, prefix));
    xml.push_str(&format!("<KeyCount>{}</KeyCount><MaxKeys>{}</MaxKeys>", page.len(), max_keys));
    xml.push_str(&format!("<IsTruncated>{}</IsTruncated>", truncated));
    if truncated {
        xml.push_str(&format!(
            "<NextContinuationToken>after-{}</NextContinuationToken>",
            end
        ));
    }
    for key in page {
        xml.push_str(&format!(
            "<Contents><Key>{}</Key><Size>1</Size><StorageClass>STANDARD</StorageClass></Contents>",
            key
        ));
    }
    xml.push_str("</ListBucketResult>");

    (StatusCode::OK, [("content-type", "application/xml")], xml).into_response()
}

fn s3_error(status: StatusCode, code: &str, message: &str) -> Response {
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>{}</Code><Message>{}</Message><RequestId>test</RequestId></Error>"#,
        code, message
    );
    (status, [("content-type", "application/xml")], xml).into_response()
}

pub fn bucket_config(endpoint: &str, page_size: u32) -> BucketConfig {
    BucketConfig {
        name: BUCKET.to_string(),
        region: "us-east-1".to_string(),
        role_arn: Some("arn:aws:iam::000000000000:role/iris-sync".to_string()),
        endpoint_url: Some(endpoint.to_string()),
        page_size,
    }
}

pub fn sqlite_config(root: &Path, files_dir: &Path, endpoint: &str) -> Config {
    Config {
        profile: Profile::Dev,
        sync: SyncConfig::default(),
        local_files_dir: files_dir.to_path_buf(),
        feedback_prefix: PREFIX.to_string(),
        database: DatabaseConfig::Sqlite(SqliteConfig {
            path: root.join("data/iris.sqlite"),
        }),
        bucket: bucket_config(endpoint, 1000),
    }
}
