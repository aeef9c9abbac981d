//! Website documents and the store that serves them.

mod client;
pub mod document;

pub use client::{DocumentSummary, WebsiteClient};
pub use document::{Column, ContentItem, ContentKind, ContentVisitor, ContentVisitorMut, Page, Row, Section};

use crate::{Error, Result};
use bytes::Bytes;
use hlsforge_common::PageId;

/// Where page documents live.
///
/// Bodies are exchanged as raw bytes so a backup can hold exactly what the
/// store returned.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;
    async fn get_document(&self, id: &PageId) -> Result<Bytes>;
    async fn put_document(&self, id: &PageId, body: Bytes) -> Result<()>;
}

/// Parse a raw document body.
pub fn parse_page(id: &PageId, body: &[u8]) -> Result<Page> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidDocument {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// Whether a URL already points at an HLS playlist: its path ends in
/// `.m3u8`, ignoring case, query and fragment.
pub fn is_hls_url(url: &str) -> bool {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(|c| c == '?' || c == '#').next().unwrap_or(url).to_string(),
    };
    path.to_ascii_lowercase().ends_with(".m3u8")
}
