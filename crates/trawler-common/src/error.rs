//! Error types for the trawler

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for trawler operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Main error type for the trawler
///
/// Variants that quarantine a single product carry the owning bucket
/// identity so the caller can route a failure token to the right product
/// directory instead of failing the whole trawl.
#[derive(Error, Debug)]
pub enum TrawlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connectivity error: {message}")]
    Connectivity { message: String },

    #[error("Catalog error: {message}")]
    Catalog { message: String },

    #[error("Supplied access key has no permissions on bucket {bucket}")]
    BucketPermission { bucket: String },

    #[error("{product_id} marked as RECEIVED, while trying to create new product")]
    AlreadyReceived { product_id: String, bucket: String },

    #[error("Metadata extraction failed for {}: {message}", file.display())]
    MetadataExtraction {
        bucket: Option<String>,
        file: PathBuf,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TrawlError {
    /// Shorthand for a connectivity-class failure.
    pub fn connectivity(message: impl Into<String>) -> Self {
        TrawlError::Connectivity {
            message: message.into(),
        }
    }

    /// Shorthand for a catalog service failure.
    pub fn catalog(message: impl Into<String>) -> Self {
        TrawlError::Catalog {
            message: message.into(),
        }
    }

    /// True for network/service reachability failures, which are resolved by
    /// the reconnect probe loop rather than by quarantining a product.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TrawlError::Connectivity { .. })
    }

    /// The bucket identity attached to this error, if one is known.
    pub fn bucket(&self) -> Option<&str> {
        match self {
            TrawlError::BucketPermission { bucket } => Some(bucket),
            TrawlError::AlreadyReceived { bucket, .. } => Some(bucket),
            TrawlError::MetadataExtraction {
                bucket: Some(bucket),
                ..
            } => Some(bucket),
            _ => None,
        }
    }

    /// Attach a bucket identity to a taggable error, leaving other variants
    /// untouched.
    pub fn with_bucket(self, bucket: impl Into<String>) -> Self {
        match self {
            TrawlError::MetadataExtraction { file, message, .. } => {
                TrawlError::MetadataExtraction {
                    bucket: Some(bucket.into()),
                    file,
                    message,
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_accessor() {
        let err = TrawlError::BucketPermission {
            bucket: "1000000001".to_string(),
        };
        assert_eq!(err.bucket(), Some("1000000001"));

        let err = TrawlError::connectivity("timed out");
        assert_eq!(err.bucket(), None);
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_with_bucket_tags_extraction_errors() {
        let err = TrawlError::MetadataExtraction {
            bucket: None,
            file: PathBuf::from("/data/1000000001/1000000001_sdp_l0.rdb"),
            message: "truncated header".to_string(),
        };
        let tagged = err.with_bucket("1000000001");
        assert_eq!(tagged.bucket(), Some("1000000001"));

        // Non-taggable variants pass through unchanged.
        let err = TrawlError::catalog("500").with_bucket("1000000001");
        assert_eq!(err.bucket(), None);
    }
}
