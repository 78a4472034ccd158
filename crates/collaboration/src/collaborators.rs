//! Interfaces to the host editor and its storage
use anyhow::Result;
use async_trait::async_trait;

use crate::{DocumentId, MarkerSet, RegionId};

/// Per-document key/value metadata, e.g. post meta.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// `None` when nothing is stored under `key`
    async fn get_metadata(&self, document: &DocumentId, key: &str) -> Result<Option<String>>;

    async fn set_metadata(&self, document: &DocumentId, key: &str, value: &str) -> Result<()>;
}

/// Class-name tokens of content regions.
#[async_trait]
pub trait RegionMarkers: Send + Sync {
    /// `None` when the region is not mounted
    async fn markers(&self, region: &RegionId) -> Result<Option<MarkerSet>>;

    /// Returns false when the region is no longer mounted.
    async fn set_markers(&self, region: &RegionId, markers: MarkerSet) -> Result<bool>;
}

/// Who is commenting.
pub trait IdentityProvider: Send + Sync {
    fn current_user_display_name(&self) -> String;
}

/// Fixed display name, for headless use and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl StaticIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_display_name(&self) -> String {
        self.0.clone()
    }
}
