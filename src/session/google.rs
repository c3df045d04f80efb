//! Gmail v1 + Drive v3 backend over plain REST.
//!
//! The bearer token is obtained by an external collaborator; this backend
//! only attaches it to requests. An expired token surfaces as a
//! `TransportError::Status` with `is_auth() == true`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::TransportError;
use crate::pipeline::types::{AttachmentRef, CandidateMessage, MessageSummary, RemoteObject};
use crate::session::traits::{MailService, ObjectStore};

pub const DEFAULT_GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const DEFAULT_DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const GMAIL: &str = "gmail";
const DRIVE: &str = "drive";

/// Drive's maximum page size for `files.list`.
const DRIVE_LIST_PAGE_SIZE: u32 = 1000;

/// API roots. Overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub gmail: String,
    pub drive: String,
    pub drive_upload: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            gmail: DEFAULT_GMAIL_BASE.to_string(),
            drive: DEFAULT_DRIVE_BASE.to_string(),
            drive_upload: DEFAULT_DRIVE_UPLOAD_BASE.to_string(),
        }
    }
}

impl GoogleEndpoints {
    /// All three roots under one base URL (`{base}/gmail/v1`, ...).
    pub fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            gmail: format!("{base}/gmail/v1"),
            drive: format!("{base}/drive/v3"),
            drive_upload: format!("{base}/upload/drive/v3"),
        }
    }
}

/// Authenticated Gmail + Drive session.
pub struct GoogleSession {
    client: reqwest::Client,
    token: SecretString,
    endpoints: GoogleEndpoints,
}

impl GoogleSession {
    pub fn new(
        token: SecretString,
        endpoints: GoogleEndpoints,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                service: "http",
                operation: "client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            token,
            endpoints,
        })
    }

    fn gmail_url(&self, path: &str) -> String {
        format!("{}/users/me/{path}", self.endpoints.gmail.trim_end_matches('/'))
    }

    fn drive_url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoints.drive.trim_end_matches('/'))
    }

    fn upload_url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoints.drive_upload.trim_end_matches('/'))
    }

    /// Authenticate, send, and reject non-success statuses.
    async fn send(
        &self,
        service: &'static str,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, TransportError> {
        let resp = request
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| TransportError::Request {
                service,
                operation,
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(service, operation, status = %status, "Provider request rejected");
        Err(TransportError::Status {
            service,
            operation,
            status,
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, TransportError> {
        self.send(service, operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| TransportError::InvalidResponse {
                service,
                operation,
                reason: e.to_string(),
            })
    }
}

// ── Gmail ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageSummary>,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePart {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

/// Named parts in depth-first listed order.
fn collect_attachments(part: &MessagePart, out: &mut Vec<AttachmentRef>) {
    if !part.filename.is_empty() {
        out.push(AttachmentRef {
            filename: part.filename.clone(),
            attachment_id: part.body.as_ref().and_then(|b| b.attachment_id.clone()),
            size_hint: part.body.as_ref().and_then(|b| b.size),
        });
    }
    for child in &part.parts {
        collect_attachments(child, out);
    }
}

#[async_trait]
impl MailService for GoogleSession {
    async fn search_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageSummary>, TransportError> {
        let max_results = max_results.to_string();
        let request = self
            .client
            .get(self.gmail_url("messages"))
            .query(&[("q", query), ("maxResults", max_results.as_str())]);

        let list: MessageList = self.send_json(GMAIL, "messages.list", request).await?;
        Ok(list.messages)
    }

    async fn get_message(&self, message_id: &str) -> Result<CandidateMessage, TransportError> {
        let request = self
            .client
            .get(self.gmail_url(&format!("messages/{message_id}")))
            .query(&[("format", "full")]);

        let message: GmailMessage = self.send_json(GMAIL, "messages.get", request).await?;

        let mut attachments = Vec::new();
        if let Some(payload) = &message.payload {
            collect_attachments(payload, &mut attachments);
        }

        Ok(CandidateMessage {
            id: message.id,
            attachments,
        })
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<String, TransportError> {
        let request = self.client.get(self.gmail_url(&format!(
            "messages/{message_id}/attachments/{attachment_id}"
        )));

        let body: AttachmentBody = self
            .send_json(GMAIL, "messages.attachments.get", request)
            .await?;
        Ok(body.data)
    }
}

// ── Drive ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    parents: Vec<String>,
}

impl DriveFile {
    fn into_remote(self, container_id: &str) -> RemoteObject {
        let parent_container_id = self
            .parents
            .into_iter()
            .next()
            .unwrap_or_else(|| container_id.to_string());
        RemoteObject {
            id: self.id,
            name: self.name,
            parent_container_id,
        }
    }
}

/// Quote a value for a Drive `q` string literal.
pub fn drive_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Drive search for live objects named `name` directly under `container_id`.
pub fn drive_name_query(container_id: &str, name: &str) -> String {
    format!(
        "name = '{}' and '{}' in parents and trashed = false",
        drive_literal(name),
        drive_literal(container_id)
    )
}

#[async_trait]
impl ObjectStore for GoogleSession {
    async fn list_objects(
        &self,
        container_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteObject>, TransportError> {
        let q = drive_name_query(container_id, name);
        let page_size = DRIVE_LIST_PAGE_SIZE.to_string();
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(self.drive_url("files")).query(&[
                ("q", q.as_str()),
                ("spaces", "drive"),
                ("pageSize", page_size.as_str()),
                ("fields", "nextPageToken, files(id, name, parents)"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: FileList = self.send_json(DRIVE, "files.list", request).await?;
            objects.extend(page.files.into_iter().map(|f| f.into_remote(container_id)));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, object_id: &str) -> Result<(), TransportError> {
        let request = self
            .client
            .delete(self.drive_url(&format!("files/{object_id}")));
        self.send(DRIVE, "files.delete", request).await?;
        Ok(())
    }

    async fn create_object(
        &self,
        container_id: &str,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<RemoteObject, TransportError> {
        // Resumable upload: open a session with the metadata, then send the bytes.
        let metadata = serde_json::json!({
            "name": name,
            "parents": [container_id],
        });
        let init = self
            .client
            .post(self.upload_url("files"))
            .query(&[
                ("uploadType", "resumable"),
                ("fields", "id, name, parents"),
            ])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", content.len())
            .json(&metadata);

        let resp = self.send(DRIVE, "files.create", init).await?;
        let session_uri = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| TransportError::InvalidResponse {
                service: DRIVE,
                operation: "files.create",
                reason: "resumable session has no Location header".into(),
            })?;

        let upload = self
            .client
            .put(session_uri)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(content);

        let file: DriveFile = self.send_json(DRIVE, "files.upload", upload).await?;
        Ok(file.into_remote(container_id))
    }
}
