//! Layout parsing of PDF uploads into typed, paged blocks.
//!
//! The parser service answers with a nested block tree. [`flatten_blocks`] walks it once in
//! pre-order so the chunker only ever sees a flat `(kind, text, page)` sequence. Children
//! without a page span inherit their parent's page.

use crate::resilience::{CallPolicy, Transient, guarded};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Structural role of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// `heading-1` .. `heading-6`.
    Heading(u8),
    /// Body text.
    Paragraph,
    /// Entry of a list.
    ListItem,
    /// Running footer; never indexed.
    Footer,
    /// Table; never indexed.
    Table,
    /// Any other type reported by the parser.
    Other(String),
}

impl BlockKind {
    /// Map a parser type label onto a kind.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        if let Some(level) = label
            .strip_prefix("heading-")
            .and_then(|level| level.parse::<u8>().ok())
            .filter(|level| (1..=6).contains(level))
        {
            return Self::Heading(level);
        }
        match label.as_str() {
            "paragraph" => Self::Paragraph,
            "list_item" => Self::ListItem,
            "footer" => Self::Footer,
            "table" => Self::Table,
            _ => Self::Other(label),
        }
    }

    /// Whether the block starts a new section.
    pub fn is_heading(&self) -> bool {
        matches!(self, Self::Heading(_))
    }

    /// Whether the block is dropped before chunking.
    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Footer | Self::Table)
    }
}

/// Flat, typed unit of document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBlock {
    /// Structural role.
    pub kind: BlockKind,
    /// Trimmed text.
    pub text: String,
    /// 1-based page number.
    pub page: u32,
}

impl LayoutBlock {
    /// Convenience constructor.
    pub fn new(kind: BlockKind, text: impl Into<String>, page: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            page,
        }
    }
}

/// Errors raised while parsing document layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Parser could not be reached.
    #[error("Layout parser unavailable: {0}")]
    Unavailable(String),
    /// Parser rejected the document.
    #[error("Layout parser returned {status}: {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Response body did not match the expected shape.
    #[error("Malformed layout response: {0}")]
    InvalidResponse(String),
    /// An attempt exceeded the call timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Guarded operation name.
        operation: &'static str,
        /// Timeout that elapsed.
        seconds: u64,
    },
}

impl Transient for LayoutError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }

    fn timed_out(operation: &'static str, after: Duration) -> Self {
        Self::Timeout {
            operation,
            seconds: after.as_secs(),
        }
    }
}

/// Turns a PDF into ordered layout blocks.
#[async_trait]
pub trait LayoutParser: Send + Sync {
    /// Parse `bytes` of the PDF named `filename`.
    async fn parse(&self, filename: &str, bytes: &[u8]) -> Result<Vec<LayoutBlock>, LayoutError>;
}

/// Layout parser reached over HTTP.
///
/// The PDF is posted as the raw request body; the service answers with a
/// `document.documentLayout.blocks` tree.
pub struct HttpLayoutParser {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    policy: CallPolicy,
}

impl HttpLayoutParser {
    /// Construct a parser client for `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        policy: CallPolicy,
    ) -> Result<Self, LayoutError> {
        let http = Client::builder()
            .user_agent("docent/layout")
            .build()
            .map_err(|error| LayoutError::Unavailable(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            policy,
        })
    }

    async fn parse_once(&self, filename: &str, bytes: &[u8]) -> Result<Vec<LayoutBlock>, LayoutError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .header("x-document-name", filename)
            .body(bytes.to_vec());
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| {
            LayoutError::Unavailable(format!(
                "failed to reach layout parser at {}: {error}",
                self.endpoint
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LayoutError::Rejected { status, body });
        }

        let body: ProcessResponse = response
            .json()
            .await
            .map_err(|error| LayoutError::InvalidResponse(error.to_string()))?;
        Ok(flatten_blocks(&body.document.document_layout.blocks))
    }
}

#[async_trait]
impl LayoutParser for HttpLayoutParser {
    async fn parse(&self, filename: &str, bytes: &[u8]) -> Result<Vec<LayoutBlock>, LayoutError> {
        let blocks = guarded("layout.parse", &self.policy, || {
            self.parse_once(filename, bytes)
        })
        .await?;
        tracing::debug!(filename, blocks = blocks.len(), "Layout parsed");
        Ok(blocks)
    }
}

#[derive(Deserialize)]
struct ProcessResponse {
    document: RawDocument,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    #[serde(default)]
    document_layout: RawLayout,
}

#[derive(Deserialize, Default)]
struct RawLayout {
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

/// Block node as reported by the parser.
#[derive(Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    #[serde(default)]
    text_block: Option<RawTextBlock>,
    #[serde(default)]
    table_block: Option<Value>,
    #[serde(default)]
    list_block: Option<RawListBlock>,
    #[serde(default)]
    page_span: Option<RawPageSpan>,
}

#[derive(Deserialize, Default, Debug, Clone)]
struct RawTextBlock {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct RawListBlock {
    #[serde(default)]
    list_entries: Vec<RawListEntry>,
}

#[derive(Deserialize, Default, Debug, Clone)]
struct RawListEntry {
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Deserialize, Default, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct RawPageSpan {
    #[serde(default)]
    page_start: Option<u32>,
}

/// Flatten a block tree into document order.
pub fn flatten_blocks(blocks: &[RawBlock]) -> Vec<LayoutBlock> {
    let mut flat = Vec::new();
    for block in blocks {
        visit(block, 1, false, &mut flat);
    }
    flat
}

fn visit(block: &RawBlock, inherited_page: u32, in_list: bool, out: &mut Vec<LayoutBlock>) {
    let page = block
        .page_span
        .and_then(|span| span.page_start)
        .filter(|page| *page > 0)
        .unwrap_or(inherited_page);

    if let Some(text_block) = &block.text_block {
        let mut kind = BlockKind::from_label(&text_block.kind);
        if in_list && kind == BlockKind::Paragraph {
            kind = BlockKind::ListItem;
        }
        let text = text_block.text.trim();
        if !text.is_empty() {
            out.push(LayoutBlock::new(kind, text, page));
        }
        for child in &text_block.blocks {
            visit(child, page, in_list, out);
        }
    }

    if let Some(table) = &block.table_block {
        let mut parts = Vec::new();
        collect_strings(table, &mut parts);
        let text = parts.join(" ");
        if !text.trim().is_empty() {
            out.push(LayoutBlock::new(BlockKind::Table, text.trim(), page));
        }
    }

    if let Some(list) = &block.list_block {
        for entry in &list.list_entries {
            for child in &entry.blocks {
                visit(child, page, true, out);
            }
        }
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                match nested {
                    Value::String(text) if key == "text" => out.push(text.trim().to_string()),
                    _ => collect_strings(nested, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}
