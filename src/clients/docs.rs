//! Docs capability client -- Google Docs/Drive-backed.
//!
//! Documents live entirely in the provider; the system only holds
//! `{provider_id, title, url, modified_at}` handles. `get` flattens the
//! structured document into plain text: paragraphs in order, table cells
//! joined by tab within a row and rows by newline, then headers and
//! footers. `delete` is soft (move to trash). `share_link_reader` is the
//! best-effort link-sharing call made after create; its failure never
//! fails the create.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{map_error_status, parse_retry_after, ProviderError};

/// Search-result handle for a provider document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHandle {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// A fetched document with flattened text.
#[derive(Debug, Clone)]
pub struct DocumentContent {
    pub handle: DocumentHandle,
    pub plain_text: String,
}

/// Fields for a new document.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    pub folder: Option<String>,
}

/// Partial document update.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Append `content` instead of replacing the body.
    pub append: bool,
}

/// Docs capability interface.
#[async_trait]
pub trait DocsClient: Send + Sync {
    async fn create(
        &self,
        token: &str,
        doc: &NewDocument,
        cancel: &CancellationToken,
    ) -> Result<DocumentHandle, ProviderError>;

    async fn get(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DocumentContent, ProviderError>;

    async fn update(
        &self,
        token: &str,
        id: &str,
        update: &DocumentUpdate,
        cancel: &CancellationToken,
    ) -> Result<DocumentHandle, ProviderError>;

    async fn list(
        &self,
        token: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentHandle>, ProviderError>;

    async fn search(
        &self,
        token: &str,
        query: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentHandle>, ProviderError>;

    /// Soft delete: move to trash.
    async fn delete(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError>;

    /// Best-effort: make the document readable by anyone with the link.
    async fn share_link_reader(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError>;
}

/// Flatten a Google Docs document body into plain text.
///
/// Paragraph text runs concatenate in order. Table rows emit cells joined
/// by tab, one row per line. Headers and footers follow the body.
pub fn extract_plain_text(doc: &serde_json::Value) -> String {
    let mut out = String::new();

    if let Some(content) = doc
        .get("body")
        .and_then(|b| b.get("content"))
        .and_then(|c| c.as_array())
    {
        flatten_structural_elements(content, &mut out);
    }

    for section in ["headers", "footers"] {
        if let Some(map) = doc.get(section).and_then(|h| h.as_object()) {
            for value in map.values() {
                if let Some(content) = value.get("content").and_then(|c| c.as_array()) {
                    flatten_structural_elements(content, &mut out);
                }
            }
        }
    }

    out.trim().to_owned()
}

fn flatten_structural_elements(elements: &[serde_json::Value], out: &mut String) {
    for element in elements {
        if let Some(paragraph) = element.get("paragraph") {
            flatten_paragraph(paragraph, out);
        } else if let Some(table) = element.get("table") {
            flatten_table(table, out);
        }
    }
}

fn flatten_paragraph(paragraph: &serde_json::Value, out: &mut String) {
    if let Some(elements) = paragraph.get("elements").and_then(|e| e.as_array()) {
        for element in elements {
            if let Some(text) = element
                .get("textRun")
                .and_then(|r| r.get("content"))
                .and_then(|c| c.as_str())
            {
                out.push_str(text);
            }
        }
    }
}

fn flatten_table(table: &serde_json::Value, out: &mut String) {
    if let Some(rows) = table.get("tableRows").and_then(|r| r.as_array()) {
        for row in rows {
            let mut cells: Vec<String> = Vec::new();
            if let Some(row_cells) = row.get("tableCells").and_then(|c| c.as_array()) {
                for cell in row_cells {
                    let mut cell_text = String::new();
                    if let Some(content) = cell.get("content").and_then(|c| c.as_array()) {
                        flatten_structural_elements(content, &mut cell_text);
                    }
                    cells.push(cell_text.trim().to_owned());
                }
            }
            if !cells.is_empty() {
                out.push_str(&cells.join("\t"));
                out.push('\n');
            }
        }
    }
}

/// Google Docs + Drive REST implementation.
pub struct GoogleDocsClient {
    docs_base_url: String,
    drive_base_url: String,
    client: reqwest::Client,
}

impl GoogleDocsClient {
    pub fn new() -> Self {
        Self::with_base_urls("https://docs.googleapis.com", "https://www.googleapis.com")
    }

    pub fn with_base_urls(docs_base_url: &str, drive_base_url: &str) -> Self {
        Self {
            docs_base_url: docs_base_url.trim_end_matches('/').to_owned(),
            drive_base_url: drive_base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    async fn request_json(
        &self,
        token: &str,
        builder: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        if token.is_empty() {
            return Err(ProviderError::AuthMissing);
        }
        let fut = builder.bearer_auth(token).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            resp = fut => resp.map_err(|e| ProviderError::Permanent(e.to_string()))?,
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = parse_retry_after(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_error_status(status, &body, true, retry_after));
        }
        if resp.status() == reqwest::StatusCode::NO_CONTENT || resp.content_length() == Some(0) {
            return Ok(serde_json::Value::Null);
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("malformed provider response: {e}")))
    }

    fn doc_url(id: &str) -> String {
        format!("https://docs.google.com/document/d/{id}/edit")
    }

    fn handle_from_drive_file(file: &serde_json::Value) -> DocumentHandle {
        let id = file
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        DocumentHandle {
            url: Self::doc_url(&id),
            id,
            title: file
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
            modified_at: file
                .get("modifiedTime")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned),
        }
    }

    async fn drive_query(
        &self,
        token: &str,
        q: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentHandle>, ProviderError> {
        let max = max_results.clamp(1, 100);
        let url = format!(
            "{}/drive/v3/files?pageSize={max}&orderBy=modifiedTime desc&fields=files(id,name,modifiedTime)&q={}",
            self.drive_base_url,
            super::urlencode(q)
        );
        let value = self
            .request_json(token, self.client.get(&url), cancel)
            .await?;
        Ok(value
            .get("files")
            .and_then(|f| f.as_array())
            .map(|files| files.iter().map(Self::handle_from_drive_file).collect())
            .unwrap_or_default())
    }
}

impl Default for GoogleDocsClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive query selecting non-trashed Google Docs.
const DOCS_MIME_FILTER: &str =
    "mimeType='application/vnd.google-apps.document' and trashed=false";

#[async_trait]
impl DocsClient for GoogleDocsClient {
    async fn create(
        &self,
        token: &str,
        doc: &NewDocument,
        cancel: &CancellationToken,
    ) -> Result<DocumentHandle, ProviderError> {
        let url = format!("{}/v1/documents", self.docs_base_url);
        let created = self
            .request_json(
                token,
                self.client
                    .post(&url)
                    .json(&serde_json::json!({"title": doc.title})),
                cancel,
            )
            .await?;

        let id = created
            .get("documentId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();

        if !doc.content.is_empty() {
            let update_url = format!("{}/v1/documents/{id}:batchUpdate", self.docs_base_url);
            let body = serde_json::json!({
                "requests": [{
                    "insertText": {
                        "location": {"index": 1},
                        "text": doc.content,
                    }
                }]
            });
            self.request_json(token, self.client.post(&update_url).json(&body), cancel)
                .await?;
        }

        if let Some(folder) = &doc.folder {
            // Best-effort move into the requested folder.
            let move_url = format!(
                "{}/drive/v3/files/{id}?addParents={}",
                self.drive_base_url,
                super::urlencode(folder)
            );
            let _moved = self
                .request_json(token, self.client.patch(&move_url), cancel)
                .await;
        }

        Ok(DocumentHandle {
            url: Self::doc_url(&id),
            id,
            title: doc.title.clone(),
            modified_at: None,
        })
    }

    async fn get(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<DocumentContent, ProviderError> {
        let url = format!("{}/v1/documents/{id}", self.docs_base_url);
        let value = self
            .request_json(token, self.client.get(&url), cancel)
            .await?;
        let plain_text = extract_plain_text(&value);
        Ok(DocumentContent {
            handle: DocumentHandle {
                id: id.to_owned(),
                title: value
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned(),
                url: Self::doc_url(id),
                modified_at: None,
            },
            plain_text,
        })
    }

    async fn update(
        &self,
        token: &str,
        id: &str,
        update: &DocumentUpdate,
        cancel: &CancellationToken,
    ) -> Result<DocumentHandle, ProviderError> {
        if let Some(title) = &update.title {
            let url = format!("{}/drive/v3/files/{id}", self.drive_base_url);
            self.request_json(
                token,
                self.client
                    .patch(&url)
                    .json(&serde_json::json!({"name": title})),
                cancel,
            )
            .await?;
        }

        if let Some(content) = &update.content {
            let mut requests = Vec::new();
            if !update.append {
                // Replace: clear the existing body first.
                let current = self.get(token, id, cancel).await?;
                let body_len = current.plain_text.chars().count();
                if body_len > 0 {
                    let end = body_len.saturating_add(1);
                    requests.push(serde_json::json!({
                        "deleteContentRange": {
                            "range": {"startIndex": 1, "endIndex": end}
                        }
                    }));
                }
            }
            let text = if update.append {
                format!("\n{content}")
            } else {
                content.clone()
            };
            requests.push(serde_json::json!({
                "insertText": {
                    "endOfSegmentLocation": {},
                    "text": text,
                }
            }));

            let url = format!("{}/v1/documents/{id}:batchUpdate", self.docs_base_url);
            self.request_json(
                token,
                self.client
                    .post(&url)
                    .json(&serde_json::json!({"requests": requests})),
                cancel,
            )
            .await?;
        }

        let fetched = self.get(token, id, cancel).await?;
        Ok(fetched.handle)
    }

    async fn list(
        &self,
        token: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentHandle>, ProviderError> {
        self.drive_query(token, DOCS_MIME_FILTER, max_results, cancel)
            .await
    }

    async fn search(
        &self,
        token: &str,
        query: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentHandle>, ProviderError> {
        let escaped = query.replace('\'', "\\'");
        let q = format!("{DOCS_MIME_FILTER} and name contains '{escaped}'");
        self.drive_query(token, &q, max_results, cancel).await
    }

    async fn delete(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        // Soft delete: flag trashed rather than hard-deleting.
        let url = format!("{}/drive/v3/files/{id}", self.drive_base_url);
        self.request_json(
            token,
            self.client
                .patch(&url)
                .json(&serde_json::json!({"trashed": true})),
            cancel,
        )
        .await?;
        Ok(())
    }

    async fn share_link_reader(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/drive/v3/files/{id}/permissions", self.drive_base_url);
        self.request_json(
            token,
            self.client
                .post(&url)
                .json(&serde_json::json!({"role": "reader", "type": "anyone"})),
            cancel,
        )
        .await?;
        Ok(())
    }
}
