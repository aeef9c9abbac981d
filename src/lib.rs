//! Hlsforge - MP4 to HLS conversion and website video migration
//!
//! This library crate exposes the core functionality for integration testing.

pub mod backup;
pub mod config;
pub mod convert;
pub mod download;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod site;
pub mod upload;

pub use error::{Error, Result};
