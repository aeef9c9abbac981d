//! Document store HTTP client.

use super::DocumentStore;
use crate::{Error, Result};
use bytes::Bytes;
use hlsforge_common::{PageId, SiteId};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;

/// A page as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: PageId,
    pub title: String,
}

#[derive(Deserialize)]
struct PageMicro {
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Client for one site on the website API.
pub struct WebsiteClient {
    client: Client,
    base_url: String,
    site: SiteId,
    master_key: String,
    key_header: String,
}

impl WebsiteClient {
    pub fn new(
        client: Client,
        base_url: &str,
        site: SiteId,
        master_key: impl Into<String>,
        key_header: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            site,
            master_key: master_key.into(),
            key_header: key_header.into(),
        }
    }

    pub fn site(&self) -> &SiteId {
        &self.site
    }

    fn page_url(&self, id: &PageId) -> String {
        format!(
            "{}/v2/mainframe/web/page/{}/{}",
            self.base_url, self.site, id
        )
    }

    async fn get(&self, url: &str, id: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header(self.key_header.as_str(), &self.master_key)
            .send()
            .await
            .map_err(|e| Error::fetch_failed(id, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::fetch_failed(
                id,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }
        response.bytes().await.map_err(|e| Error::fetch_failed(id, e))
    }
}

#[async_trait::async_trait]
impl DocumentStore for WebsiteClient {
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let listing = format!("pages of site {}", self.site);
        let url = format!("{}/v2/mainframe/web/pages/{}", self.base_url, self.site);
        let body = self.get(&url, &listing).await?;

        let pages: Vec<PageMicro> =
            serde_json::from_slice(&body).map_err(|e| Error::fetch_failed(&listing, e))?;

        let mut summaries = Vec::with_capacity(pages.len());
        for page in pages {
            let Some(id) = page.id else {
                tracing::debug!(title = ?page.title, "Skipping page without id");
                continue;
            };
            match PageId::parse(id) {
                Ok(id) => summaries.push(DocumentSummary {
                    id,
                    title: page.title.unwrap_or_else(|| "Unknown".to_string()),
                }),
                Err(e) => tracing::warn!(error = %e, "Skipping page with unusable id"),
            }
        }
        Ok(summaries)
    }

    async fn get_document(&self, id: &PageId) -> Result<Bytes> {
        self.get(&self.page_url(id), id.as_str()).await
    }

    async fn put_document(&self, id: &PageId, body: Bytes) -> Result<()> {
        let response = self
            .client
            .put(self.page_url(id))
            .header(CONTENT_TYPE, "application/json")
            .header(self.key_header.as_str(), &self.master_key)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::update_failed(id.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::update_failed(
                id.as_str(),
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }
        Ok(())
    }
}
