//! In-process collaborators for headless use and tests
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{DocumentId, MarkerSet, MetadataStore, RegionId, RegionMarkers};

/// Metadata held in a map, with switches to simulate store outages.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    entries: RwLock<HashMap<(DocumentId, String), String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: &DocumentId, key: &str, value: impl Into<String>) {
        self.entries
            .write()
            .insert((document.clone(), key.to_string()), value.into());
    }

    pub fn get(&self, document: &DocumentId, key: &str) -> Option<String> {
        self.entries
            .read()
            .get(&(document.clone(), key.to_string()))
            .cloned()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_metadata(&self, document: &DocumentId, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("metadata store unavailable");
        }
        Ok(self.get(document, key))
    }

    async fn set_metadata(&self, document: &DocumentId, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("metadata store rejected write for {document}");
        }
        self.insert(document, key, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mounted regions and their class names.
#[derive(Debug, Default)]
pub struct MemoryRegions {
    regions: RwLock<HashMap<RegionId, MarkerSet>>,
    fail_writes: AtomicBool,
}

impl MemoryRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&self, region: &RegionId, class_name: &str) {
        self.regions
            .write()
            .insert(region.clone(), MarkerSet::from_class_name(class_name));
    }

    pub fn unmount(&self, region: &RegionId) {
        self.regions.write().remove(region);
    }

    pub fn class_name(&self, region: &RegionId) -> Option<String> {
        self.regions.read().get(region).map(MarkerSet::to_class_name)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegionMarkers for MemoryRegions {
    async fn markers(&self, region: &RegionId) -> Result<Option<MarkerSet>> {
        Ok(self.regions.read().get(region).cloned())
    }

    async fn set_markers(&self, region: &RegionId, markers: MarkerSet) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("cannot update class names of {region}");
        }
        let mut regions = self.regions.write();
        match regions.get_mut(region) {
            Some(current) => {
                *current = markers;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metadata_store_outage() {
        let store = MemoryMetadataStore::new();
        let doc = DocumentId::new("42");

        store.set_metadata(&doc, "collab", "{}").await.unwrap();
        assert_eq!(store.get_metadata(&doc, "collab").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.get_metadata(&doc, "other").await.unwrap(), None);

        store.set_fail_writes(true);
        assert!(store.set_metadata(&doc, "collab", "[]").await.is_err());
        assert_eq!(store.get(&doc, "collab").as_deref(), Some("{}"));
        assert_eq!(store.write_count(), 1);

        store.set_fail_reads(true);
        assert!(store.get_metadata(&doc, "collab").await.is_err());
    }

    #[tokio::test]
    async fn test_unmounted_region_ignores_writes() {
        let regions = MemoryRegions::new();
        let block = RegionId::new("block-1");
        regions.mount(&block, "wp-block");

        assert!(regions
            .set_markers(&block, MarkerSet::from_class_name("wp-block x"))
            .await
            .unwrap());
        assert_eq!(regions.class_name(&block).as_deref(), Some("wp-block x"));

        regions.unmount(&block);
        assert!(regions.markers(&block).await.unwrap().is_none());
        assert!(!regions.set_markers(&block, MarkerSet::new()).await.unwrap());
    }
}
