//! In-memory doubles for the engine's external collaborators
//!
//! Unit tests drive the pool, ingest, and cycle logic against these instead
//! of a network. The store double can be configured to under-report written
//! bytes, deny a bucket, or fail its reachability probe.

#![allow(clippy::unwrap_used)]

use crate::catalog::{CatalogRecord, MetadataCatalog, ProductState, RefKind};
use crate::extract::{ExtractedMet, MetExtractor};
use crate::store::{ObjectStore, StoreConnection};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use trawler_common::{Result, TrawlError};

/// In-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), u64>>>,
    buckets: Arc<Mutex<Vec<String>>>,
    denied_bucket: Option<String>,
    short_write: Option<u64>,
    unreachable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this byte count from every put, regardless of file size.
    pub fn with_short_writes(mut self, reported: u64) -> Self {
        self.short_write = Some(reported);
        self
    }

    /// Fail bucket creation for this bucket with a permission conflict.
    pub fn with_denied_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.denied_bucket = Some(bucket.into());
        self
    }

    /// Fail the endpoint probe (and connects) with a connectivity error.
    pub fn with_unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn object_size(&self, bucket: &str, key: &str) -> Option<u64> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .copied()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        if self.unreachable {
            return Err(TrawlError::connectivity("store endpoint unreachable"));
        }
        Ok(Box::new(MemoryConnection {
            objects: Arc::clone(&self.objects),
            buckets: Arc::clone(&self.buckets),
            denied_bucket: self.denied_bucket.clone(),
            short_write: self.short_write,
        }))
    }

    async fn probe(&self) -> Result<()> {
        if self.unreachable {
            return Err(TrawlError::connectivity("store endpoint unreachable"));
        }
        Ok(())
    }
}

struct MemoryConnection {
    objects: Arc<Mutex<HashMap<(String, String), u64>>>,
    buckets: Arc<Mutex<Vec<String>>>,
    denied_bucket: Option<String>,
    short_write: Option<u64>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn ensure_bucket(&mut self, bucket: &str) -> Result<()> {
        if self.denied_bucket.as_deref() == Some(bucket) {
            return Err(TrawlError::BucketPermission {
                bucket: bucket.to_string(),
            });
        }
        let mut buckets = self.buckets.lock().unwrap();
        if !buckets.iter().any(|b| b == bucket) {
            buckets.push(bucket.to_string());
        }
        Ok(())
    }

    async fn put_file(&mut self, bucket: &str, key: &str, file: &Path) -> Result<u64> {
        let size = fs::metadata(file)?.len();
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), size);
        Ok(self.short_write.unwrap_or(size))
    }
}

/// In-memory metadata catalog recording every state transition.
#[derive(Default)]
pub struct MemoryCatalog {
    records: Mutex<HashMap<String, CatalogRecord>>,
    state_log: Mutex<Vec<(String, ProductState)>>,
    unreachable: bool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Seed a record in a given state, as if a previous run created it.
    pub fn seed(&self, id: &str, product_type: &str, state: ProductState) {
        let record = CatalogRecord {
            id: id.to_string(),
            product_type: product_type.to_string(),
            state: Some(state),
            original_refs: Vec::new(),
            datastore_refs: Vec::new(),
            metadata: Map::new(),
            created_at: None,
        };
        self.records.lock().unwrap().insert(id.to_string(), record);
    }

    pub fn record(&self, id: &str) -> Option<CatalogRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    /// All state transitions applied to `id`, in order.
    pub fn states(&self, id: &str) -> Vec<ProductState> {
        self.state_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(rid, _)| rid == id)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl MetadataCatalog for MemoryCatalog {
    async fn get_record(&self, id: &str) -> Result<Option<CatalogRecord>> {
        if self.unreachable {
            return Err(TrawlError::connectivity("catalog endpoint unreachable"));
        }
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn create_record(&self, id: &str, product_type: &str) -> Result<CatalogRecord> {
        let record = CatalogRecord {
            id: id.to_string(),
            product_type: product_type.to_string(),
            state: Some(ProductState::Created),
            original_refs: Vec::new(),
            datastore_refs: Vec::new(),
            metadata: Map::new(),
            created_at: Some(chrono::Utc::now()),
        };
        self.records
            .lock()
            .unwrap()
            .insert(id.to_string(), record.clone());
        self.state_log
            .lock()
            .unwrap()
            .push((id.to_string(), ProductState::Created));
        Ok(record)
    }

    async fn set_state(&self, id: &str, state: ProductState) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| TrawlError::catalog(format!("no record for {}", id)))?;
        record.state = Some(state);
        self.state_log
            .lock()
            .unwrap()
            .push((id.to_string(), state));
        Ok(())
    }

    async fn attach_refs(&self, id: &str, kind: RefKind, refs: &[String]) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| TrawlError::catalog(format!("no record for {}", id)))?;
        match kind {
            RefKind::Original => record.original_refs.extend_from_slice(refs),
            RefKind::Datastore => record.datastore_refs.extend_from_slice(refs),
        }
        Ok(())
    }

    async fn add_metadata(&self, id: &str, fields: &Map<String, Value>) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| TrawlError::catalog(format!("no record for {}", id)))?;
        record.metadata.extend(fields.clone());
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        if self.unreachable {
            return Err(TrawlError::connectivity("catalog endpoint unreachable"));
        }
        Ok(())
    }
}

/// Extractor double returning a fixed result.
pub struct StaticExtractor {
    product_type: Option<String>,
}

impl StaticExtractor {
    /// Succeeds with the given product type and a minimal metadata map.
    pub fn ok(product_type: impl Into<String>) -> Self {
        Self {
            product_type: Some(product_type.into()),
        }
    }

    /// Fails every extraction, untagged (the ingest path adds the bucket).
    pub fn failing() -> Self {
        Self { product_type: None }
    }
}

#[async_trait]
impl MetExtractor for StaticExtractor {
    async fn extract(&self, rdb_lite: &Path, _rdb_full: &Path) -> Result<ExtractedMet> {
        match &self.product_type {
            Some(product_type) => {
                let mut metadata = Map::new();
                metadata.insert(
                    "Description".to_string(),
                    Value::String("test capture".to_string()),
                );
                Ok(ExtractedMet {
                    product_type: product_type.clone(),
                    metadata,
                })
            }
            None => Err(TrawlError::MetadataExtraction {
                bucket: None,
                file: rdb_lite.to_path_buf(),
                message: "synthetic extraction failure".to_string(),
            }),
        }
    }
}
