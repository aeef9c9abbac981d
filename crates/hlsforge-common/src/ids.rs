//! Typed identifiers.
//!
//! Site and page ids are opaque strings issued by the document store; they
//! are interpolated into request paths, so they are validated once on the
//! way in. Batch ids prefix uploaded file names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn validate_path_segment(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_input(format!("{kind} id is empty")));
    }
    if value.contains(&['/', '?', '#'][..]) || value.chars().any(char::is_whitespace) {
        return Err(Error::invalid_input(format!(
            "{kind} id '{value}' is not a valid path segment"
        )));
    }
    Ok(())
}

/// Identifier of a website in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        validate_path_segment("site", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one page document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        validate_path_segment("page", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix shared by every file uploaded for one conversion.
///
/// Real runs use a fresh UUID so repeated conversions never collide;
/// dry runs use the fixed `dry-run` prefix so their URLs are predictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchId {
    Uuid(Uuid),
    DryRun,
}

impl BatchId {
    /// Generate a new random batch id.
    #[must_use]
    pub fn new() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    #[must_use]
    pub fn dry_run() -> Self {
        Self::DryRun
    }

    /// `{batch}-{local name}`.
    pub fn remote_name(&self, local_name: &str) -> String {
        format!("{self}-{local_name}")
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(uuid) => write!(f, "{}", uuid),
            Self::DryRun => f.write_str("dry-run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_id_validation() {
        assert!(SiteId::parse("5f1a9c").is_ok());
        assert!(SiteId::parse("").is_err());
        assert!(SiteId::parse("a/b").is_err());
        assert!(SiteId::parse("a b").is_err());
        assert!(PageId::parse("page?x=1").is_err());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let page = PageId::parse("home").unwrap();
        assert_eq!(serde_json::to_string(&page).unwrap(), "\"home\"");

        let parsed: SiteId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed.as_str(), "abc");
    }

    #[test]
    fn test_batch_ids_are_unique() {
        assert_ne!(BatchId::new(), BatchId::new());
        assert_eq!(BatchId::dry_run().to_string(), "dry-run");
    }

    #[test]
    fn test_remote_name() {
        let uuid = Uuid::nil();
        assert_eq!(
            BatchId::Uuid(uuid).remote_name("master.m3u8"),
            "00000000-0000-0000-0000-000000000000-master.m3u8"
        );
    }
}
