//! Metadata extraction seam
//!
//! Parsing the binary RDB pair is an external concern; the engine only
//! consumes the extracted product type and metadata fields through the
//! [`MetExtractor`] trait. The production implementation shells out to a
//! configured extractor binary.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use trawler_common::{Result, TrawlError};

/// Product type and metadata fields pulled out of an RDB pair.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedMet {
    pub product_type: String,
    pub metadata: Map<String, Value>,
}

/// Narrow interface to the external metadata extractor.
#[async_trait]
pub trait MetExtractor: Send + Sync {
    /// Extract metadata from the lite/full RDB pair of one capture block.
    async fn extract(&self, rdb_lite: &Path, rdb_full: &Path) -> Result<ExtractedMet>;
}

/// Runs a configured extractor executable with the RDB pair as arguments and
/// parses the JSON document it prints on stdout:
///
/// ```json
/// {"product_type": "MeerKATTelescopeProduct", "metadata": {...}}
/// ```
pub struct CommandMetExtractor {
    command: PathBuf,
}

impl CommandMetExtractor {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl MetExtractor for CommandMetExtractor {
    async fn extract(&self, rdb_lite: &Path, rdb_full: &Path) -> Result<ExtractedMet> {
        debug!(
            "Extracting metadata from {} with {}",
            rdb_lite.display(),
            self.command.display()
        );

        let output = Command::new(&self.command)
            .arg(rdb_lite)
            .arg(rdb_full)
            .output()
            .await
            .map_err(|e| extraction_error(rdb_lite, format!("failed to run extractor: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(extraction_error(
                rdb_lite,
                format!("extractor exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| extraction_error(rdb_lite, format!("bad extractor output: {}", e)))
    }
}

fn extraction_error(file: &Path, message: String) -> TrawlError {
    TrawlError::MetadataExtraction {
        bucket: None,
        file: file.to_path_buf(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_extractor_is_an_extraction_error() {
        let extractor = CommandMetExtractor::new("/nonexistent/met-extract");
        let err = extractor
            .extract(
                Path::new("/data/1000000001/1000000001_sdp_l0.rdb"),
                Path::new("/data/1000000001/1000000001_sdp_l0.full.rdb"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TrawlError::MetadataExtraction { .. }));
        // Untagged until the ingest path attaches the owning bucket.
        assert_eq!(err.bucket(), None);
    }
}
