//! Block discussion threads kept in sync with document metadata.
//!
//! The controller reads the persisted thread map, applies one intent,
//! writes the map back and updates the block's marker.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use threads::{
    Comment, CommentId, IdGenerator, MarkerCodec, MarkerSet, MissingCommentPolicy,
    ResolutionPolicy, Thread, ThreadError, ThreadId, ThreadMap, ThreadState, Timestamp,
    UuidGenerator, DEFAULT_MARKER_PREFIX,
};

mod collaborators;
pub use collaborators::*;

mod config;
pub use config::*;

mod controller;
pub use controller::*;

mod memory;
pub use memory::*;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Thread(#[from] ThreadError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("marker update failed: {0}")]
    Marker(String),

    #[error("region not found: {0}")]
    RegionNotFound(RegionId),

    #[error("region {0} has no discussion thread")]
    Unbound(RegionId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sync task aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    pub(crate) fn persistence(e: anyhow::Error) -> Self {
        Self::Persistence(format!("{e:#}"))
    }

    pub(crate) fn marker(e: anyhow::Error) -> Self {
        Self::Marker(format!("{e:#}"))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Document whose metadata holds the thread map
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content region (block) that threads attach to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
