//! Google Drive and Sheets client.
//!
//! Documents are copied from templates with the Drive v3 API, read and
//! written as HTML through export/upload, and shared with a whole domain.
//! History rows are appended through the Sheets v4 API.

use async_trait::async_trait;
use flarebot_core::{CoreError, Doc, DocumentService};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::http::{checked_text, send_error};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// The `google` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// OAuth bearer token with Drive and Sheets scopes.
    pub access_token: String,
    /// Flare document template.
    pub template_doc_id: String,
    /// Channel history spreadsheet template.
    pub history_template_id: String,
    /// Domain every new document is shared with.
    pub domain: String,
}

#[derive(Clone)]
pub struct GoogleDocsClient {
    http: reqwest::Client,
    access_token: String,
}

impl std::fmt::Debug for GoogleDocsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDocsClient").finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CopiedFile {
    id: String,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

impl GoogleDocsClient {
    pub fn new(access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
        }
    }

    async fn send(&self, what: &str, req: reqwest::RequestBuilder) -> Result<String, CoreError> {
        let resp = req
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| send_error(what, &e))?;
        checked_text(what, resp).await
    }
}

/// Browser URL for a copied file when Drive did not return one.
fn fallback_url(file: &CopiedFile) -> String {
    match file.mime_type.as_deref() {
        Some("application/vnd.google-apps.spreadsheet") => {
            format!("https://docs.google.com/spreadsheets/d/{}/edit", file.id)
        }
        _ => format!("https://docs.google.com/document/d/{}/edit", file.id),
    }
}

#[async_trait]
impl DocumentService for GoogleDocsClient {
    async fn create_from_template(&self, title: &str, template_id: &str) -> Result<Doc, CoreError> {
        debug!(title, template_id, "Copying template");
        let req = self
            .http
            .post(format!("{DRIVE_API_BASE}/files/{template_id}/copy"))
            .query(&[("fields", "id,webViewLink,mimeType")])
            .json(&json!({ "name": title }));
        let text = self.send("drive copy", req).await?;
        let file: CopiedFile = serde_json::from_str(&text)?;
        let url = file
            .web_view_link
            .clone()
            .unwrap_or_else(|| fallback_url(&file));
        Ok(Doc { id: file.id, url })
    }

    async fn get_doc_content(&self, doc_id: &str) -> Result<String, CoreError> {
        let req = self
            .http
            .get(format!("{DRIVE_API_BASE}/files/{doc_id}/export"))
            .query(&[("mimeType", "text/html")]);
        self.send("drive export", req).await
    }

    async fn update_doc_content(&self, doc_id: &str, html: &str) -> Result<(), CoreError> {
        let req = self
            .http
            .patch(format!("{DRIVE_UPLOAD_BASE}/files/{doc_id}"))
            .query(&[("uploadType", "media")])
            .header("Content-Type", "text/html")
            .body(html.to_string());
        self.send("drive upload", req).await?;
        Ok(())
    }

    async fn share_with_domain(&self, doc_id: &str, domain: &str, role: &str) -> Result<(), CoreError> {
        let req = self
            .http
            .post(format!("{DRIVE_API_BASE}/files/{doc_id}/permissions"))
            .json(&json!({ "type": "domain", "role": role, "domain": domain }));
        self.send("drive share", req).await?;
        Ok(())
    }

    async fn append_sheet_row(&self, doc_id: &str, values: &[String]) -> Result<(), CoreError> {
        let req = self
            .http
            .post(format!("{SHEETS_API_BASE}/spreadsheets/{doc_id}/values/A1:append"))
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": [values] }));
        self.send("sheets append", req).await?;
        Ok(())
    }
}
