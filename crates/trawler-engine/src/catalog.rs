//! Metadata catalog client
//!
//! The catalog is an external service holding one record per product
//! identity. The engine only triggers state transitions and reference
//! attachment through the [`MetadataCatalog`] seam; record storage and the
//! full state machine live on the service side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use trawler_common::{Result, TrawlError};

/// Default timeout for catalog requests in seconds.
/// Can be overridden via CATALOG_TIMEOUT_SECS environment variable.
pub const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 30;

/// Product lifecycle state as tracked by the catalog.
///
/// The trawl engine only drives `Created -> Transferring -> Received`; the
/// remaining states belong to the downstream staging and archival systems
/// and are carried for catalog compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductState {
    Created,
    Transferring,
    Received,
    Restaging,
    Restaged,
    Archived,
    Recreated,
    Failed,
}

impl std::fmt::Display for ProductState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProductState::Created => "CREATED",
            ProductState::Transferring => "TRANSFERRING",
            ProductState::Received => "RECEIVED",
            ProductState::Restaging => "RESTAGING",
            ProductState::Restaged => "RESTAGED",
            ProductState::Archived => "ARCHIVED",
            ProductState::Recreated => "RECREATED",
            ProductState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Which reference list to attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// Paths of the files as captured on disk
    Original,
    /// Object storage URLs after transfer
    Datastore,
}

/// One catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    pub product_type: String,
    #[serde(default)]
    pub state: Option<ProductState>,
    #[serde(default)]
    pub original_refs: Vec<String>,
    #[serde(default)]
    pub datastore_refs: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Narrow interface to the external metadata catalog.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    async fn get_record(&self, id: &str) -> Result<Option<CatalogRecord>>;

    async fn create_record(&self, id: &str, product_type: &str) -> Result<CatalogRecord>;

    async fn set_state(&self, id: &str, state: ProductState) -> Result<()>;

    async fn attach_refs(&self, id: &str, kind: RefKind, refs: &[String]) -> Result<()>;

    async fn add_metadata(&self, id: &str, fields: &Map<String, Value>) -> Result<()>;

    /// Cheap reachability check of the endpoint, used by the reconnect loop.
    async fn probe(&self) -> Result<()>;
}

/// HTTP implementation of [`MetadataCatalog`].
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let timeout_secs = std::env::var("CATALOG_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CATALOG_TIMEOUT_SECS);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TrawlError::catalog(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn product_url(&self, id: &str) -> String {
        format!("{}/products/{}", self.base_url, id)
    }
}

#[async_trait]
impl MetadataCatalog for HttpCatalog {
    async fn get_record(&self, id: &str) -> Result<Option<CatalogRecord>> {
        let response = self
            .client
            .get(self.product_url(id))
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(request_error)?;
        let record = response.json().await.map_err(request_error)?;
        Ok(Some(record))
    }

    async fn create_record(&self, id: &str, product_type: &str) -> Result<CatalogRecord> {
        debug!("Creating catalog record for {}", id);
        let response = self
            .client
            .post(format!("{}/products", self.base_url))
            .json(&serde_json::json!({ "id": id, "product_type": product_type }))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;

        let record = response.json().await.map_err(request_error)?;
        Ok(record)
    }

    async fn set_state(&self, id: &str, state: ProductState) -> Result<()> {
        debug!("Setting {} to {}", id, state);
        self.client
            .post(format!("{}/state", self.product_url(id)))
            .json(&serde_json::json!({ "state": state }))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }

    async fn attach_refs(&self, id: &str, kind: RefKind, refs: &[String]) -> Result<()> {
        self.client
            .post(format!("{}/refs", self.product_url(id)))
            .json(&serde_json::json!({ "kind": kind, "refs": refs }))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }

    async fn add_metadata(&self, id: &str, fields: &Map<String, Value>) -> Result<()> {
        self.client
            .post(format!("{}/metadata", self.product_url(id)))
            .json(fields)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }
}

/// Transport failures are connectivity-class; anything the service itself
/// rejected is a catalog error.
fn request_error(err: reqwest::Error) -> TrawlError {
    if err.is_connect() || err.is_timeout() {
        TrawlError::connectivity(err.to_string())
    } else {
        TrawlError::catalog(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_screaming_snake() {
        let s = serde_json::to_string(&ProductState::Transferring).unwrap();
        assert_eq!(s, "\"TRANSFERRING\"");
        let s: ProductState = serde_json::from_str("\"RECEIVED\"").unwrap();
        assert_eq!(s, ProductState::Received);
    }

    #[test]
    fn test_record_defaults_tolerate_sparse_documents() {
        let record: CatalogRecord =
            serde_json::from_str(r#"{"id": "1000000001", "product_type": "visibility"}"#).unwrap();
        assert_eq!(record.state, None);
        assert!(record.original_refs.is_empty());
        assert!(record.metadata.is_empty());
    }
}
