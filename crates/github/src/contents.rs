//! Wire types and encoding for the REST Contents API.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use portal::{parse_records, render_records, Record, StoreError};
use serde::{Deserialize, Serialize};

/// `GET /repos/{owner}/{repo}/contents/{path}` for a file.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentsFile {
    pub sha: String,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Body of `PUT /repos/{owner}/{repo}/contents/{path}`.
#[derive(Debug, Serialize)]
pub(crate) struct PutFile<'a> {
    pub message: &'a str,
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

/// Response to a successful PUT.
#[derive(Debug, Deserialize)]
pub(crate) struct PutResponse {
    pub content: PutContent,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PutContent {
    pub sha: String,
}

/// Error body returned by the REST API.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

/// `GET /user`.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthenticatedUser {
    pub login: String,
}

/// What a Contents API file response carries.
#[derive(Debug, PartialEq)]
pub(crate) enum FileBody {
    /// Inline content, already decoded.
    Inline(Vec<u8>),
    /// The file is too large for inline content; fetch the raw media type.
    Omitted,
}

impl ContentsFile {
    /// Decodes the inline content, or reports that it was omitted.
    pub fn body(&self, path: &str) -> Result<FileBody, StoreError> {
        match (self.encoding.as_deref(), self.content.as_deref()) {
            (Some("base64"), Some(content)) => decode_base64(content)
                .map(FileBody::Inline)
                .map_err(|message| StoreError::InvalidContent {
                    path: path.to_string(),
                    message,
                }),
            (Some("none") | None, _) | (_, None) => Ok(FileBody::Omitted),
            (Some(other), _) => Err(StoreError::InvalidContent {
                path: path.to_string(),
                message: format!("unsupported content encoding '{other}'"),
            }),
        }
    }
}

/// Decodes GitHub's base64, which wraps lines at 60 characters.
pub(crate) fn decode_base64(content: &str) -> Result<Vec<u8>, String> {
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact).map_err(|e| e.to_string())
}

/// Renders records into the base64 payload of a PUT.
pub(crate) fn encode_records(records: &[Record]) -> String {
    STANDARD.encode(render_records(records))
}

/// Parses a decoded file body into records.
pub(crate) fn decode_records(body: &[u8], path: &str) -> Result<Vec<Record>, StoreError> {
    parse_records(body).map_err(|message| StoreError::InvalidContent {
        path: path.to_string(),
        message,
    })
}
