//! Hlsforge-Common: Shared ids and utilities.
//!
//! - **Typed IDs**: site and page identifiers from the document store, and
//!   the per-conversion upload batch id
//! - **Path Utilities**: classify generated HLS files and video sources by
//!   extension
//! - **Error Handling**: validation errors for the types above
//!
//! # Examples
//!
//! ```
//! use hlsforge_common::{BatchId, OutputFileKind, SiteId};
//! use std::path::Path;
//!
//! let site = SiteId::parse("a1b2c3").unwrap();
//! assert_eq!(site.as_str(), "a1b2c3");
//!
//! let batch = BatchId::dry_run();
//! assert_eq!(batch.remote_name("fileSequence0.mp4"), "dry-run-fileSequence0.mp4");
//!
//! let kind = OutputFileKind::from_path(Path::new("fileSequence3.m4s")).unwrap();
//! assert_eq!(kind.content_type(), "video/iso.segment");
//! ```

pub mod error;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use ids::*;
pub use paths::OutputFileKind;
