//! Trawler Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the trawler workspace.
//!
//! # Overview
//!
//! This crate provides the pieces every workspace member needs:
//!
//! - **Error Handling**: the [`TrawlError`] taxonomy with bucket/file context
//! - **Logging**: tracing subscriber setup with env-based configuration
//!
//! # Example
//!
//! ```no_run
//! use trawler_common::{Result, TrawlError};
//!
//! fn quarantine(bucket: &str) -> Result<()> {
//!     Err(TrawlError::BucketPermission {
//!         bucket: bucket.to_string(),
//!     })
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TrawlError};
