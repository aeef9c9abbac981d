//! Backup-guarded bulk migration of a site's video references.
//!
//! A run finds every page that references one of the sources, snapshots
//! those pages, converts the sources, and only then rewrites the pages.
//! Pages are never written unless the snapshot was persisted first.

use crate::backup::{BackupManifest, BackupStore, PageBackup};
use crate::site::{is_hls_url, parse_page, DocumentStore, DocumentSummary};
use crate::Result;
use bytes::Bytes;
use hlsforge_common::{PageId, SiteId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Turns one source URL into a published HLS manifest URL.
#[async_trait::async_trait]
pub trait SourceConverter: Send + Sync {
    async fn convert_and_upload(&self, source: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Discovering,
    BackingUp,
    Converting,
    Rewriting,
    Summarizing,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovering => "discovering",
            Self::BackingUp => "backing up",
            Self::Converting => "converting",
            Self::Rewriting => "rewriting",
            Self::Summarizing => "summarizing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub id: PageId,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Source URL to HLS manifest URL, for every successful conversion.
    pub converted: BTreeMap<String, String>,
    pub failed_sources: Vec<SourceFailure>,
    /// Pages written (or, in dry-run mode, that would have been).
    pub pages_rewritten: Vec<DocumentSummary>,
    pub page_failures: Vec<PageFailure>,
    /// Pages whose body did not parse; they were neither backed up nor
    /// rewritten.
    pub unreadable_pages: Vec<PageFailure>,
    pub backup: Option<PathBuf>,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_sources.is_empty()
            && self.page_failures.is_empty()
            && self.unreadable_pages.is_empty()
    }

    /// Command that undoes this run, when a backup was taken.
    pub fn revert_hint(&self) -> Option<String> {
        let name = self.backup.as_ref()?.file_name()?.to_string_lossy().into_owned();
        Some(format!("hlsforge revert {}", name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RevertSummary {
    pub restored: Vec<PageId>,
    pub failures: Vec<PageFailure>,
}

/// Video usage across a site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteScan {
    pub pending: BTreeSet<String>,
    pub hls: BTreeSet<String>,
    pub pages: usize,
    pub unreadable: Vec<PageFailure>,
}

struct DiscoveredPage {
    summary: DocumentSummary,
    raw: Bytes,
    urls: Vec<String>,
}

#[derive(Default)]
struct Discovery {
    pages: Vec<DiscoveredPage>,
    unreadable: Vec<PageFailure>,
}

/// Fetch and parse every page. Listing and fetch failures are fatal;
/// pages that do not parse are returned separately.
async fn discover(store: &dyn DocumentStore) -> Result<Discovery> {
    let summaries = store.list_documents().await?;
    tracing::debug!(pages = summaries.len(), "Listed pages");

    let mut found = Discovery::default();
    for summary in summaries {
        let raw = store.get_document(&summary.id).await?;
        match parse_page(&summary.id, &raw) {
            Ok(page) => found.pages.push(DiscoveredPage {
                urls: page.video_urls(),
                summary,
                raw,
            }),
            Err(e) => {
                tracing::warn!(page = %summary.id, title = %summary.title, error = %e, "Unreadable page");
                found.unreadable.push(PageFailure {
                    id: summary.id,
                    title: summary.title,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(found)
}

/// Collect every video URL on a site, split by whether it is already HLS.
pub async fn scan_site(store: &dyn DocumentStore) -> Result<SiteScan> {
    let found = discover(store).await?;
    let mut scan = SiteScan {
        pages: found.pages.len() + found.unreadable.len(),
        unreadable: found.unreadable,
        ..Default::default()
    };
    for url in found.pages.into_iter().flat_map(|p| p.urls) {
        if is_hls_url(&url) {
            scan.hls.insert(url);
        } else {
            scan.pending.insert(url);
        }
    }
    Ok(scan)
}

/// One migration of one site.
pub struct BulkRun<'a> {
    host: String,
    site: SiteId,
    documents: &'a dyn DocumentStore,
    converter: &'a dyn SourceConverter,
    backups: &'a BackupStore,
    dry_run: bool,
}

impl<'a> BulkRun<'a> {
    pub fn new(
        host: impl Into<String>,
        site: SiteId,
        documents: &'a dyn DocumentStore,
        converter: &'a dyn SourceConverter,
        backups: &'a BackupStore,
    ) -> Self {
        Self {
            host: host.into(),
            site,
            documents,
            converter,
            backups,
            dry_run: false,
        }
    }

    /// Count page writes instead of performing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn enter(&self, phase: RunPhase) {
        tracing::info!(site = %self.host, phase = %phase, "Phase: {}", phase);
    }

    pub async fn run(&self, sources: &[String]) -> Result<RunSummary> {
        let mut summary = RunSummary {
            dry_run: self.dry_run,
            ..Default::default()
        };

        let mut in_scope = Vec::new();
        for source in sources {
            if is_hls_url(source) {
                tracing::info!(source = %source, "Already HLS, skipping");
            } else if !in_scope.contains(source) {
                in_scope.push(source.clone());
            }
        }

        self.enter(RunPhase::Discovering);
        let wanted: BTreeSet<&str> = in_scope.iter().map(String::as_str).collect();
        let found = discover(self.documents).await?;
        summary.unreadable_pages = found.unreadable;
        let matched: Vec<DiscoveredPage> = found
            .pages
            .into_iter()
            .filter(|page| page.urls.iter().any(|url| wanted.contains(url.as_str())))
            .collect();
        tracing::info!(
            site = %self.host,
            pages = matched.len(),
            "{} pages reference the sources",
            matched.len()
        );

        self.enter(RunPhase::BackingUp);
        if matched.is_empty() {
            tracing::info!(site = %self.host, "No pages to back up");
        } else {
            let snapshots = matched
                .iter()
                .map(|p| PageBackup::new(p.summary.id.clone(), p.summary.title.clone(), p.raw.clone()))
                .collect();
            let manifest = BackupManifest::new(&self.host, self.site.as_str(), snapshots);
            summary.backup = Some(self.backups.create_async(manifest).await?);
        }

        self.enter(RunPhase::Converting);
        for (i, source) in in_scope.iter().enumerate() {
            tracing::info!(source = %source, "[{}/{}] Converting", i + 1, in_scope.len());
            match self.converter.convert_and_upload(source).await {
                Ok(url) => {
                    tracing::info!(source = %source, hls = %url, "Converted");
                    summary.converted.insert(source.clone(), url);
                }
                Err(e) => {
                    tracing::error!(source = %source, error = %e, "Conversion failed");
                    summary.failed_sources.push(SourceFailure {
                        source: source.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.enter(RunPhase::Rewriting);
        if summary.converted.is_empty() {
            tracing::info!(site = %self.host, "Nothing converted, no pages to rewrite");
        } else {
            for page in &matched {
                match self.rewrite_page(&page.summary, &summary.converted).await {
                    Ok(true) => summary.pages_rewritten.push(page.summary.clone()),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(page = %page.summary.id, title = %page.summary.title, error = %e, "Page rewrite failed");
                        summary.page_failures.push(PageFailure {
                            id: page.summary.id.clone(),
                            title: page.summary.title.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        self.enter(RunPhase::Summarizing);
        tracing::info!(
            site = %self.host,
            converted = summary.converted.len(),
            failed = summary.failed_sources.len(),
            pages = summary.pages_rewritten.len(),
            page_failures = summary.page_failures.len(),
            unreadable = summary.unreadable_pages.len(),
            dry_run = self.dry_run,
            "Run complete"
        );
        Ok(summary)
    }

    /// Re-fetch one backed-up page and apply every replacement. Returns
    /// whether the page changed.
    async fn rewrite_page(
        &self,
        page: &DocumentSummary,
        mapping: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let raw = self.documents.get_document(&page.id).await?;
        let mut live = parse_page(&page.id, &raw)?;

        let changed: usize = mapping
            .iter()
            .map(|(old, new)| live.replace_video_url(old, new))
            .sum();
        if changed == 0 {
            tracing::debug!(page = %page.id, "No references left, skipping");
            return Ok(false);
        }

        if self.dry_run {
            tracing::info!(page = %page.id, title = %page.title, items = changed, "[DRY-RUN] Would update page");
            return Ok(true);
        }

        let body = serde_json::to_vec(&live)?;
        self.documents.put_document(&page.id, Bytes::from(body)).await?;
        tracing::info!(page = %page.id, title = %page.title, items = changed, "Updated page");
        Ok(true)
    }
}

/// Write every snapshot in `manifest` back verbatim.
pub async fn revert(store: &dyn DocumentStore, manifest: &BackupManifest) -> RevertSummary {
    let mut summary = RevertSummary::default();
    for page in &manifest.pages {
        match store.put_document(&page.page_id, page.original_data.clone()).await {
            Ok(()) => {
                tracing::info!(page = %page.page_id, title = %page.page_title, "Restored page");
                summary.restored.push(page.page_id.clone());
            }
            Err(e) => {
                tracing::error!(page = %page.page_id, title = %page.page_title, error = %e, "Restore failed");
                summary.failures.push(PageFailure {
                    id: page.page_id.clone(),
                    title: page.page_title.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_hint_names_backup_file() {
        let summary = RunSummary {
            backup: Some(PathBuf::from("/home/u/.hlsforge/backups/backup-means.ai-2024-01-22T10-30-00Z.json")),
            ..Default::default()
        };
        assert_eq!(
            summary.revert_hint().as_deref(),
            Some("hlsforge revert backup-means.ai-2024-01-22T10-30-00Z.json")
        );
        assert!(RunSummary::default().revert_hint().is_none());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(RunPhase::BackingUp.to_string(), "backing up");
    }
}
