//! S3-compatible multipart upload endpoint.
//!
//! ```text
//! exists          HEAD /<bucket>/<key>
//! create upload   POST /<bucket>/<key>?uploads
//! find upload     GET  /<bucket>?uploads&prefix=<key>
//! upload part     PUT  /<bucket>/<key>?partNumber=N&uploadId=ID   (Content-MD5)
//! list parts      GET  /<bucket>/<key>?uploadId=ID
//! complete        POST /<bucket>/<key>?uploadId=ID                (XML body)
//! ```
//!
//! Part numbers are 1-based on the wire. Requests are not signed; an opaque
//! `Authorization` value may be supplied instead.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chunkferry_protocol::{ErrorKind, FinalizedObject, Part, PartReceipt};
use chunkferry_transfer::checksum_bytes;
use md5::{Digest, Md5};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{EndpointError, EndpointFuture, RemoteEndpoint};

/// Characters left unescaped in object keys (RFC 3986 unreserved plus `/`).
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Characters left unescaped in query values.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Endpoint speaking the S3 multipart upload API.
pub struct ObjectStoreEndpoint {
    name: String,
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    /// Open multipart upload ids by key.
    uploads: Mutex<HashMap<String, String>>,
}

impl ObjectStoreEndpoint {
    pub fn new(
        base_url: &str,
        bucket: &str,
        authorization: Option<&str>,
    ) -> Result<Self, EndpointError> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = authorization {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(auth)
                    .map_err(|_| EndpointError::auth("authorization is not a valid header value"))?,
            );
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            name: format!("s3:{base_url}/{bucket}"),
            http,
            base_url,
            bucket: bucket.to_string(),
            uploads: Mutex::new(HashMap::new()),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.bucket,
            utf8_percent_encode(key, KEY_ENCODE_SET)
        )
    }

    fn cached_upload(&self, key: &str) -> Option<String> {
        self.uploads.lock().unwrap().get(key).cloned()
    }

    /// Finds an open upload for `key` left by an earlier run.
    async fn find_upload(&self, key: &str) -> Result<Option<String>, EndpointError> {
        if let Some(id) = self.cached_upload(key) {
            return Ok(Some(id));
        }
        let url = format!(
            "{}/{}?uploads&prefix={}",
            self.base_url,
            self.bucket,
            utf8_percent_encode(key, QUERY_ENCODE_SET)
        );
        let resp = self.http.get(&url).send().await?;
        let body = expect_success(resp, false).await?;
        let listing: ListMultipartUploadsResult = parse_xml(&body)?;

        let found = listing
            .uploads
            .into_iter()
            .filter(|u| u.key == key)
            .max_by(|a, b| a.initiated.cmp(&b.initiated))
            .map(|u| u.upload_id);
        if let Some(id) = &found {
            debug!(key, upload_id = %id, "resuming multipart upload");
            self.uploads
                .lock()
                .unwrap()
                .insert(key.to_string(), id.clone());
        }
        Ok(found)
    }

    /// Returns the open upload for `key`, creating one if needed.
    async fn ensure_upload(&self, key: &str) -> Result<String, EndpointError> {
        if let Some(id) = self.find_upload(key).await? {
            return Ok(id);
        }
        let url = format!("{}?uploads", self.object_url(key));
        let resp = self.http.post(&url).send().await?;
        let body = expect_success(resp, false).await?;
        let created: InitiateMultipartUploadResult = parse_xml(&body)?;

        info!(key, upload_id = %created.upload_id, "multipart upload created");
        let mut uploads = self.uploads.lock().unwrap();
        let id = uploads
            .entry(key.to_string())
            .or_insert(created.upload_id)
            .clone();
        Ok(id)
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<ListedPart>, EndpointError> {
        let mut parts = Vec::new();
        let mut marker: Option<u32> = None;
        loop {
            let mut url = format!(
                "{}?uploadId={}",
                self.object_url(key),
                utf8_percent_encode(upload_id, QUERY_ENCODE_SET)
            );
            if let Some(m) = marker {
                url.push_str(&format!("&part-number-marker={m}"));
            }
            let resp = self.http.get(&url).send().await?;
            let body = expect_success(resp, false).await?;
            let page: ListPartsResult = parse_xml(&body)?;
            parts.extend(page.parts);
            match (page.is_truncated, page.next_part_number_marker) {
                (true, Some(next)) if Some(next) != marker => marker = Some(next),
                _ => break,
            }
        }
        Ok(parts)
    }
}

impl RemoteEndpoint for ObjectStoreEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists<'a>(&'a self, key: &'a str) -> EndpointFuture<'a, bool> {
        Box::pin(async move {
            let resp = self.http.head(self.object_url(key)).send().await?;
            match resp.status() {
                s if s.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                s => Err(classify(s, "", false)),
            }
        })
    }

    fn upload_part<'a>(
        &'a self,
        key: &'a str,
        part: &'a Part,
        data: &'a [u8],
    ) -> EndpointFuture<'a, PartReceipt> {
        Box::pin(async move {
            if data.len() as u64 != part.length {
                return Err(EndpointError::invalid_request(format!(
                    "part {} is {} bytes, got {}",
                    part.sequence_index,
                    part.length,
                    data.len()
                )));
            }
            let upload_id = self.ensure_upload(key).await?;
            let url = format!(
                "{}?partNumber={}&uploadId={}",
                self.object_url(key),
                part.sequence_index + 1,
                utf8_percent_encode(&upload_id, QUERY_ENCODE_SET)
            );
            let content_md5 = BASE64.encode(Md5::digest(data));

            let resp = self
                .http
                .put(&url)
                .header("Content-MD5", content_md5)
                .body(data.to_vec())
                .send()
                .await?;
            let etag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            expect_success(resp, false).await?;

            let etag = etag.ok_or_else(|| {
                EndpointError::transient(format!("no ETag for part {}", part.sequence_index))
            })?;
            debug!(key, index = part.sequence_index, etag = %etag, "part uploaded");
            Ok(PartReceipt {
                sequence_index: part.sequence_index,
                offset: part.offset,
                length: part.length,
                checksum: checksum_bytes(data),
                etag: Some(etag),
            })
        })
    }

    fn finalize<'a>(
        &'a self,
        key: &'a str,
        receipts: &'a [PartReceipt],
    ) -> EndpointFuture<'a, FinalizedObject> {
        Box::pin(async move {
            let mut ordered: Vec<&PartReceipt> = receipts.iter().collect();
            ordered.sort_by_key(|r| r.sequence_index);
            if ordered.is_empty() {
                return Err(EndpointError::incomplete("no parts to finalize"));
            }
            let mut parts = Vec::with_capacity(ordered.len());
            for (i, receipt) in ordered.iter().enumerate() {
                if receipt.sequence_index as usize != i {
                    return Err(EndpointError::incomplete(format!("missing part {i}")));
                }
                let etag = receipt.etag.clone().ok_or_else(|| {
                    EndpointError::incomplete(format!("part {i} has no ETag"))
                })?;
                parts.push(CompletedPart {
                    part_number: receipt.sequence_index + 1,
                    e_tag: etag,
                });
            }

            let upload_id = self
                .find_upload(key)
                .await?
                .ok_or_else(|| EndpointError::incomplete(format!("no open upload for {key}")))?;
            let xml = quick_xml::se::to_string(&CompleteMultipartUpload { parts })
                .map_err(|e| EndpointError::invalid_request(format!("encode XML: {e}")))?;
            let url = format!(
                "{}?uploadId={}",
                self.object_url(key),
                utf8_percent_encode(&upload_id, QUERY_ENCODE_SET)
            );
            let resp = self
                .http
                .post(&url)
                .header(CONTENT_TYPE, "application/xml")
                .body(xml)
                .send()
                .await?;
            let body = expect_success(resp, true).await?;
            // Completion can fail after a 200 status; the body tells.
            if let Ok(err) = quick_xml::de::from_str::<S3Error>(&body)
                && !err.code.is_empty()
            {
                return Err(classify_code(&err.code, &err.message, true)
                    .unwrap_or_else(|| EndpointError::transient(err.message)));
            }
            let completed: CompleteMultipartUploadResult = parse_xml(&body)?;

            self.uploads.lock().unwrap().remove(key);
            let size = ordered.iter().map(|r| r.length).sum();
            info!(key, size, parts = ordered.len(), "multipart upload completed");
            Ok(FinalizedObject {
                key: key.to_string(),
                size,
                part_count: ordered.len() as u32,
                checksum: None,
                etag: completed.e_tag,
            })
        })
    }

    fn committed_part<'a>(
        &'a self,
        key: &'a str,
        part: &'a Part,
    ) -> EndpointFuture<'a, Option<PartReceipt>> {
        Box::pin(async move {
            let Some(upload_id) = self.find_upload(key).await? else {
                return Ok(None);
            };
            let number = part.sequence_index + 1;
            let listed = self.list_parts(key, &upload_id).await?;
            Ok(listed
                .into_iter()
                .find(|p| p.part_number == number && p.size == part.length)
                .map(|p| PartReceipt {
                    sequence_index: part.sequence_index,
                    offset: part.offset,
                    length: part.length,
                    // The store only knows its ETag; the caller fills in the digest.
                    checksum: String::new(),
                    etag: Some(p.e_tag),
                }))
        })
    }
}

/// Reads the body, turning a non-success status into a classified error.
async fn expect_success(resp: reqwest::Response, completing: bool) -> Result<String, EndpointError> {
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(classify(status, &body, completing))
    }
}

fn parse_xml<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, EndpointError> {
    quick_xml::de::from_str(body)
        .map_err(|e| EndpointError::transient(format!("malformed XML response: {e}")))
}

/// Maps an HTTP status plus S3 error body to an [`EndpointError`].
fn classify(status: StatusCode, body: &str, completing: bool) -> EndpointError {
    let (code, message) = match quick_xml::de::from_str::<S3Error>(body) {
        Ok(e) => (e.code, e.message),
        Err(_) => (String::new(), body.trim().to_string()),
    };
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };
    if let Some(e) = classify_code(&code, &message, completing) {
        return e;
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EndpointError::auth(message),
        StatusCode::INSUFFICIENT_STORAGE | StatusCode::PAYLOAD_TOO_LARGE => {
            EndpointError::quota_exceeded(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            EndpointError::transient(message)
        }
        s if s.is_server_error() => EndpointError::transient(message),
        _ => EndpointError::invalid_request(message),
    }
}

fn classify_code(code: &str, message: &str, completing: bool) -> Option<EndpointError> {
    let kind = match code {
        "QuotaExceeded" | "EntityTooLarge" => ErrorKind::QuotaExceeded,
        "BadDigest" | "InvalidDigest" => ErrorKind::ChecksumMismatch,
        "InvalidPart" | "InvalidPartOrder" | "NoSuchUpload" if completing => {
            ErrorKind::IncompleteUpload
        }
        "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => ErrorKind::Auth,
        "SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout" => {
            ErrorKind::TransientNetwork
        }
        _ => return None,
    };
    Some(EndpointError::new(kind, format!("{code}: {message}")))
}

// ---------------------------------------------------------------------------
// XML documents
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3Error {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct ListMultipartUploadsResult {
    #[serde(rename = "Upload", default)]
    uploads: Vec<ListedUpload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedUpload {
    key: String,
    upload_id: String,
    #[serde(default)]
    initiated: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPartsResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_part_number_marker: Option<u32>,
    #[serde(rename = "Part", default)]
    parts: Vec<ListedPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedPart {
    part_number: u32,
    #[serde(rename = "ETag")]
    e_tag: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    parts: Vec<CompletedPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CompletedPart {
    part_number: u32,
    #[serde(rename = "ETag")]
    e_tag: String,
}

#[derive(Debug, Deserialize)]
struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag", default)]
    e_tag: Option<String>,
}
