//! Thread sync controller
//!
//! One call per user intent. Each call runs the full cycle
//!
//! ```text
//! fetch blob ─► load ─► mutate ─► persist ─► update marker ─► commit view
//! ```
//!
//! on a spawned task while holding a per-document lock, so overlapping
//! intents on one document never interleave and a caller that goes away
//! mid-cycle does not lose the comment.
//!
//! A controller is meant to live for one editing session. Per-document
//! locks are dropped once no intent holds or waits on them; committed
//! views stay until [`ThreadSyncController::forget`] is called.
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use threads::{MarkerInstruction, Mutation};

use crate::{
    CommentId, DocumentId, IdGenerator, IdentityProvider, MarkerCodec, MetadataStore, RegionId,
    RegionMarkers, Result, SyncConfig, SyncError, Thread, ThreadError, ThreadId, ThreadMap,
    UuidGenerator,
};

/// A user action on one block's thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    AddComment { text: String },
    DeleteComment { comment_id: CommentId },
    Resolve,
    Unresolve,
}

impl Intent {
    fn name(&self) -> &'static str {
        match self {
            Intent::AddComment { .. } => "add_comment",
            Intent::DeleteComment { .. } => "delete_comment",
            Intent::Resolve => "resolve",
            Intent::Unresolve => "unresolve",
        }
    }
}

/// What happened to the block's class names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerUpdate {
    Unchanged,
    Attached,
    Detached,
    /// The block was unmounted before the marker could be written
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub thread_id: ThreadId,
    /// Snapshot as persisted
    pub threads: ThreadMap,
    pub marker: MarkerUpdate,
    /// False when the intent was a no-op and nothing was written
    pub persisted: bool,
    /// The stored blob was unreadable and was replaced by an empty map
    pub recovered_from_malformed: bool,
}

impl SyncOutcome {
    /// Thread the intent targeted, if it still exists.
    pub fn thread(&self) -> Option<&Thread> {
        self.threads.get(&self.thread_id)
    }
}

/// Host services the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub metadata: Arc<dyn MetadataStore>,
    pub regions: Arc<dyn RegionMarkers>,
    pub identity: Arc<dyn IdentityProvider>,
    pub ids: Arc<dyn IdGenerator>,
}

impl Collaborators {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        regions: Arc<dyn RegionMarkers>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            metadata,
            regions,
            identity,
            ids: Arc::new(UuidGenerator),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

#[derive(Clone)]
pub struct ThreadSyncController {
    inner: Arc<Inner>,
}

struct Inner {
    config: SyncConfig,
    codec: MarkerCodec,
    services: Collaborators,
    locks: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
    views: RwLock<HashMap<DocumentId, ThreadMap>>,
}

impl ThreadSyncController {
    pub fn new(config: SyncConfig, services: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                codec: config.codec(),
                config,
                services,
                locks: Mutex::new(HashMap::new()),
                views: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub async fn add_comment(
        &self,
        document: &DocumentId,
        region: &RegionId,
        text: impl Into<String>,
    ) -> Result<SyncOutcome> {
        let text = text.into();
        self.apply(document, region, Intent::AddComment { text }).await
    }

    pub async fn delete_comment(
        &self,
        document: &DocumentId,
        region: &RegionId,
        comment_id: CommentId,
    ) -> Result<SyncOutcome> {
        self.apply(document, region, Intent::DeleteComment { comment_id })
            .await
    }

    pub async fn resolve(&self, document: &DocumentId, region: &RegionId) -> Result<SyncOutcome> {
        self.apply(document, region, Intent::Resolve).await
    }

    pub async fn unresolve(&self, document: &DocumentId, region: &RegionId) -> Result<SyncOutcome> {
        self.apply(document, region, Intent::Unresolve).await
    }

    /// Run one intent to completion.
    ///
    /// The cycle runs on its own task: dropping the returned future does
    /// not stop a write that has already been scheduled.
    pub async fn apply(
        &self,
        document: &DocumentId,
        region: &RegionId,
        intent: Intent,
    ) -> Result<SyncOutcome> {
        if let Intent::AddComment { text } = &intent {
            if text.is_empty() {
                return Err(ThreadError::EmptyComment.into());
            }
        }

        let inner = self.inner.clone();
        let document = document.clone();
        let region = region.clone();
        tokio::spawn(async move { inner.run_cycle(&document, &region, intent).await })
            .await
            .map_err(|e| SyncError::Aborted(e.to_string()))?
    }

    /// Fresh load of every thread in the document. Also refreshes the view.
    pub async fn threads(&self, document: &DocumentId) -> Result<ThreadMap> {
        let lock = self.inner.document_lock(document);
        let result = {
            let _guard = lock.lock().await;
            self.inner.load_fresh(document).await
        };
        self.inner.release_lock(document, lock);
        result
    }

    /// The thread bound to a block, if any.
    pub async fn thread_for_region(
        &self,
        document: &DocumentId,
        region: &RegionId,
    ) -> Result<Option<(ThreadId, Thread)>> {
        let lock = self.inner.document_lock(document);
        let result = {
            let _guard = lock.lock().await;
            self.inner.region_thread(document, region).await
        };
        self.inner.release_lock(document, lock);
        result
    }

    /// Last committed snapshot for a document, without touching storage.
    pub fn view(&self, document: &DocumentId) -> Option<ThreadMap> {
        self.inner.views.read().get(document).cloned()
    }

    /// Drop the committed view of a document the session no longer shows.
    pub fn forget(&self, document: &DocumentId) -> Option<ThreadMap> {
        self.inner.views.write().remove(document)
    }
}

impl Inner {
    fn document_lock(&self, document: &DocumentId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(document.clone())
            .or_default()
            .clone()
    }

    /// Remove the document's lock entry once nobody else holds or waits on it.
    fn release_lock(&self, document: &DocumentId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        let registered = locks
            .get(document)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock));
        // One reference in the map, one here
        if registered && Arc::strong_count(&lock) == 2 {
            locks.remove(document);
        }
    }

    fn commit_view(&self, document: &DocumentId, threads: &ThreadMap) {
        self.views.write().insert(document.clone(), threads.clone());
    }

    async fn fetch(&self, document: &DocumentId) -> Result<Option<String>> {
        self.services
            .metadata
            .get_metadata(document, &self.config.metadata_key)
            .await
            .map_err(SyncError::persistence)
    }

    async fn persist(&self, document: &DocumentId, blob: &str) -> Result<()> {
        self.services
            .metadata
            .set_metadata(document, &self.config.metadata_key, blob)
            .await
            .map_err(SyncError::persistence)
    }

    async fn load_fresh(&self, document: &DocumentId) -> Result<ThreadMap> {
        let blob = self.fetch(document).await?;
        let threads = threads::load(blob.as_deref())?;
        self.commit_view(document, &threads);
        Ok(threads)
    }

    async fn region_thread(
        &self,
        document: &DocumentId,
        region: &RegionId,
    ) -> Result<Option<(ThreadId, Thread)>> {
        let Some(thread_id) = self.bound_thread(region).await? else {
            return Ok(None);
        };
        let threads = self.load_fresh(document).await?;
        match threads.get(&thread_id) {
            Some(thread) => Ok(Some((thread_id, thread.clone()))),
            None => {
                warn!(%region, thread = %thread_id, "block marker has no stored thread");
                Ok(None)
            }
        }
    }

    async fn bound_thread(&self, region: &RegionId) -> Result<Option<ThreadId>> {
        let markers = self
            .services
            .regions
            .markers(region)
            .await
            .map_err(SyncError::marker)?
            .ok_or_else(|| SyncError::RegionNotFound(region.clone()))?;
        Ok(self.codec.decode(&markers)?)
    }

    async fn run_cycle(
        &self,
        document: &DocumentId,
        region: &RegionId,
        intent: Intent,
    ) -> Result<SyncOutcome> {
        let lock = self.document_lock(document);
        let result = {
            let _guard = lock.lock().await;
            self.cycle(document, region, intent).await
        };
        self.release_lock(document, lock);
        result
    }

    async fn cycle(
        &self,
        document: &DocumentId,
        region: &RegionId,
        intent: Intent,
    ) -> Result<SyncOutcome> {
        debug!(%document, %region, intent = intent.name(), "sync cycle start");

        let bound = self.bound_thread(region).await?;

        let stored = self.fetch(document).await?;
        let mut recovered = false;
        let current = match threads::load(stored.as_deref()) {
            Ok(threads) => threads,
            Err(ThreadError::MalformedStore(reason)) if self.config.recover_malformed => {
                warn!(
                    %document,
                    %reason,
                    "stored threads are unreadable; starting from an empty map"
                );
                recovered = true;
                ThreadMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mutation = self.mutate(&current, bound, region, intent)?;

        let persisted = mutation.changed || recovered;
        if persisted {
            let blob = threads::serialize(&mutation.threads)?;
            self.persist(document, &blob).await?;
            debug!(%document, bytes = blob.len(), "threads persisted");
        } else {
            debug!(%document, "intent changed nothing; skipping write");
        }

        let marker = match self.update_marker(region, &mutation.marker).await {
            Ok(marker) => marker,
            Err(e) => {
                if persisted {
                    self.roll_back(document, stored, &current).await;
                }
                return Err(e);
            }
        };

        match &mutation.marker {
            MarkerInstruction::Attach(id) => {
                info!(%document, %region, thread = %id, "thread bound")
            }
            MarkerInstruction::Detach(id) => {
                info!(%document, %region, thread = %id, "thread removed")
            }
            MarkerInstruction::Unchanged => {}
        }

        self.commit_view(document, &mutation.threads);
        Ok(SyncOutcome {
            thread_id: mutation.thread_id,
            threads: mutation.threads,
            marker,
            persisted,
            recovered_from_malformed: recovered,
        })
    }

    fn mutate(
        &self,
        current: &ThreadMap,
        bound: Option<ThreadId>,
        region: &RegionId,
        intent: Intent,
    ) -> Result<Mutation> {
        let require =
            |bound: Option<ThreadId>| bound.ok_or_else(|| SyncError::Unbound(region.clone()));

        let mutation = match intent {
            Intent::AddComment { text } => {
                let author = self.services.identity.current_user_display_name();
                threads::append_comment(
                    current,
                    bound.as_ref(),
                    &author,
                    &text,
                    self.services.ids.as_ref(),
                )?
            }
            Intent::DeleteComment { comment_id } => threads::delete_comment(
                current,
                &require(bound)?,
                &comment_id,
                self.config.missing_comment,
            )?,
            Intent::Resolve => threads::resolve(current, &require(bound)?, self.config.resolution)?,
            Intent::Unresolve => threads::unresolve(current, &require(bound)?)?,
        };
        Ok(mutation)
    }

    async fn update_marker(
        &self,
        region: &RegionId,
        instruction: &MarkerInstruction,
    ) -> Result<MarkerUpdate> {
        let (thread_id, attach) = match instruction {
            MarkerInstruction::Unchanged => return Ok(MarkerUpdate::Unchanged),
            MarkerInstruction::Attach(id) => (id, true),
            MarkerInstruction::Detach(id) => (id, false),
        };
        let regions = &self.services.regions;

        let Some(current) = regions.markers(region).await.map_err(SyncError::marker)? else {
            warn!(%region, thread = %thread_id, "block is gone; marker update skipped");
            return Ok(MarkerUpdate::Skipped);
        };
        let next = if attach {
            self.codec.attach(&current, thread_id)
        } else {
            self.codec.detach(&current, thread_id)
        };

        if next != current {
            let mounted = regions
                .set_markers(region, next)
                .await
                .map_err(SyncError::marker)?;
            if !mounted {
                warn!(%region, thread = %thread_id, "block is gone; marker update skipped");
                return Ok(MarkerUpdate::Skipped);
            }
        }
        Ok(if attach {
            MarkerUpdate::Attached
        } else {
            MarkerUpdate::Detached
        })
    }

    /// Put the previous blob back after a failed marker update.
    ///
    /// The metadata store has no delete, so a key that was absent before
    /// is rewritten as the encoded empty map (`{}`), which loads the same.
    async fn roll_back(&self, document: &DocumentId, stored: Option<String>, previous: &ThreadMap) {
        let blob = match stored {
            Some(blob) => blob,
            None => match threads::serialize(previous) {
                Ok(blob) => blob,
                Err(e) => {
                    error!(%document, error = %e, "cannot encode previous threads for rollback");
                    return;
                }
            },
        };
        if let Err(e) = self.persist(document, &blob).await {
            error!(%document, error = %e, "rollback after failed marker update did not persist");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryMetadataStore, MemoryRegions, StaticIdentity};

    fn setup() -> (ThreadSyncController, Arc<MemoryMetadataStore>, Arc<MemoryRegions>) {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let regions = Arc::new(MemoryRegions::new());
        let controller = ThreadSyncController::new(
            SyncConfig::default(),
            Collaborators::new(
                metadata.clone(),
                regions.clone(),
                Arc::new(StaticIdentity::new("Alice")),
            ),
        )
        .unwrap();
        (controller, metadata, regions)
    }

    #[tokio::test]
    async fn test_first_comment_binds_block() {
        let (controller, metadata, regions) = setup();
        let doc = DocumentId::new("post-1");
        let block = RegionId::new("block-a");
        regions.mount(&block, "wp-block-paragraph");

        let outcome = controller.add_comment(&doc, &block, "Hi").await.unwrap();

        assert_eq!(outcome.marker, MarkerUpdate::Attached);
        assert!(outcome.persisted);
        let thread = outcome.thread().unwrap();
        assert_eq!(thread.comments[0].author, "Alice");
        assert_eq!(
            regions.class_name(&block).unwrap(),
            format!("wp-block-paragraph block-editor-collab__{}", outcome.thread_id)
        );
        let stored = metadata.get(&doc, "collab").unwrap();
        assert_eq!(threads::load(Some(stored.as_str())).unwrap(), outcome.threads);
        assert_eq!(controller.view(&doc), Some(outcome.threads));
    }

    #[tokio::test]
    async fn test_empty_comment_never_reaches_store() {
        let (controller, metadata, regions) = setup();
        let doc = DocumentId::new("post-1");
        let block = RegionId::new("block-a");
        regions.mount(&block, "");

        let result = controller.add_comment(&doc, &block, "").await;
        assert!(matches!(result, Err(SyncError::Thread(ThreadError::EmptyComment))));
        assert_eq!(metadata.write_count(), 0);
        assert!(controller.view(&doc).is_none());
    }

    #[tokio::test]
    async fn test_unbound_block_cannot_resolve() {
        let (controller, _, regions) = setup();
        let block = RegionId::new("block-a");
        regions.mount(&block, "");
        let result = controller.resolve(&DocumentId::new("d"), &block).await;
        assert!(matches!(result, Err(SyncError::Unbound(_))));
    }

    #[tokio::test]
    async fn test_unknown_region() {
        let (controller, _, _) = setup();
        let result = controller
            .add_comment(&DocumentId::new("d"), &RegionId::new("nowhere"), "Hi")
            .await;
        assert!(matches!(result, Err(SyncError::RegionNotFound(_))));
    }

    #[tokio::test]
    async fn test_document_locks_are_released() {
        let (controller, _, regions) = setup();
        let block = RegionId::new("block-a");
        regions.mount(&block, "");

        for n in 0..5 {
            let doc = DocumentId::new(format!("post-{n}"));
            controller.add_comment(&doc, &block, "Hi").await.unwrap();
            controller.threads(&doc).await.unwrap();
            controller.thread_for_region(&doc, &block).await.unwrap();
        }
        assert!(controller.inner.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_held_lock_survives_release() {
        let (controller, _, _) = setup();
        let doc = DocumentId::new("post-1");

        let held = controller.inner.document_lock(&doc);
        let other = controller.inner.document_lock(&doc);
        controller.inner.release_lock(&doc, other);
        assert!(controller.inner.locks.lock().contains_key(&doc));

        controller.inner.release_lock(&doc, held);
        assert!(controller.inner.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_forget_drops_view() {
        let (controller, _, regions) = setup();
        let doc = DocumentId::new("post-1");
        let block = RegionId::new("block-a");
        regions.mount(&block, "");
        controller.add_comment(&doc, &block, "Hi").await.unwrap();

        assert_eq!(controller.forget(&doc).map(|v| v.len()), Some(1));
        assert!(controller.view(&doc).is_none());
    }

    #[test]
    fn test_intent_wire_format() {
        let intent = Intent::AddComment { text: "Hi".into() };
        let json = serde_json::to_string(&intent).unwrap();
        assert_eq!(json, r#"{"type":"add_comment","text":"Hi"}"#);
        let parsed: Intent = serde_json::from_str(r#"{"type":"resolve"}"#).unwrap();
        assert_eq!(parsed, Intent::Resolve);
    }
}
