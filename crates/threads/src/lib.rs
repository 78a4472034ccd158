use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

mod marker;
pub use marker::*;
mod store;
pub use store::*;
mod ledger;
pub use ledger::*;
mod resolution;
pub use resolution::*;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("malformed thread store: {0}")]
    MalformedStore(String),
    #[error("comment text must not be empty")]
    EmptyComment,
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),
    #[error("comment {comment} not found in thread {thread}")]
    CommentNotFound { thread: ThreadId, comment: CommentId },
    #[error("region carries more than one thread marker: {0:?}")]
    AmbiguousMarker(Vec<ThreadId>),
    #[error("could not generate a fresh thread id (last candidate {0})")]
    IdCollision(ThreadId),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ThreadError>;

/// Source of opaque unique identifiers for threads and comments.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs, the format existing documents already use.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Identifier of a discussion thread, unique within a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate(ids: &dyn IdGenerator) -> Self {
        Self(ids.next_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(String);

impl CommentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate(ids: &dyn IdGenerator) -> Self {
        Self(ids.next_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// UTC instant with millisecond precision.
///
/// Persisted as an RFC 3339 string such as `2024-05-01T10:20:30.123Z`.
/// Sub-millisecond digits are dropped on construction so a value always
/// survives a store round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(3))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|at| Self::from_datetime(at.with_timezone(&Utc)))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid comment date: {raw}")))
    }
}

/// A single remark in a thread. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "commentId")]
    pub id: CommentId,
    /// Display name of the author. Empty when the comment was saved
    /// before the user record had loaded, which leaves `userName` out.
    #[serde(rename = "userName", default)]
    pub author: String,
    #[serde(rename = "comment")]
    pub text: String,
    #[serde(rename = "date")]
    pub created_at: Timestamp,
}

impl Comment {
    pub fn new(
        id: CommentId,
        author: impl Into<String>,
        text: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            author: author.into(),
            text: text.into(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Open,
    Resolved,
}

/// Ordered discussion bound to one content region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    #[serde(rename = "isResolved", default)]
    pub resolved: bool,
    /// Insertion order is chronological order
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Thread {
    pub fn new(first: Comment) -> Self {
        Self {
            resolved: false,
            comments: vec![first],
        }
    }

    pub fn state(&self) -> ThreadState {
        if self.resolved {
            ThreadState::Resolved
        } else {
            ThreadState::Open
        }
    }

    pub fn comment(&self, id: &CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| &c.id == id)
    }

    pub fn last_activity(&self) -> Option<Timestamp> {
        self.comments.last().map(|c| c.created_at)
    }
}

/// All discussion state of one document: the unit of persistence.
///
/// Keys are kept ordered so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadMap {
    threads: BTreeMap<ThreadId, Thread>,
}

impl ThreadMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn get(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.get(id)
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.threads.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ThreadId, &Thread)> {
        self.threads.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ThreadId> {
        self.threads.keys()
    }

    /// Threads not marked resolved.
    pub fn open_threads(&self) -> impl Iterator<Item = (&ThreadId, &Thread)> {
        self.threads.iter().filter(|(_, t)| !t.resolved)
    }

    pub fn comment_count(&self) -> usize {
        self.threads.values().map(|t| t.comments.len()).sum()
    }

    pub(crate) fn get_mut(&mut self, id: &ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(id)
    }

    pub(crate) fn insert(&mut self, id: ThreadId, thread: Thread) -> Option<Thread> {
        self.threads.insert(id, thread)
    }

    pub(crate) fn remove(&mut self, id: &ThreadId) -> Option<Thread> {
        self.threads.remove(id)
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&ThreadId, &mut Thread) -> bool) {
        self.threads.retain(keep)
    }
}

/// What the caller must do to the region's marker set after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerInstruction {
    Unchanged,
    Attach(ThreadId),
    Detach(ThreadId),
}

/// Result of applying one ledger or resolution operation to a snapshot.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub threads: ThreadMap,
    /// Thread the operation targeted (freshly generated for a first comment)
    pub thread_id: ThreadId,
    pub marker: MarkerInstruction,
    /// False when the operation left the snapshot as it was
    pub changed: bool,
}

impl Mutation {
    pub(crate) fn unchanged(threads: &ThreadMap, thread_id: &ThreadId) -> Self {
        Self {
            threads: threads.clone(),
            thread_id: thread_id.clone(),
            marker: MarkerInstruction::Unchanged,
            changed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_truncates_to_millis() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:20:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let ts = Timestamp::from_datetime(at);
        assert_eq!(ts.to_rfc3339(), "2024-05-01T10:20:30.123Z");
    }

    #[test]
    fn test_timestamp_accepts_offsets() {
        let ts = Timestamp::parse("2024-05-01T12:20:30.500+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T10:20:30.500Z");
        assert!(Timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_comment_field_names() {
        let comment = Comment::new(
            CommentId::new("c1"),
            "Alice",
            "Hi",
            Timestamp::parse("2024-05-01T10:20:30.000Z").unwrap(),
        );
        let json = serde_json::to_string(&comment).unwrap();
        assert_eq!(
            json,
            r#"{"commentId":"c1","userName":"Alice","comment":"Hi","date":"2024-05-01T10:20:30.000Z"}"#
        );
    }

    #[test]
    fn test_thread_state() {
        let mut thread = Thread::new(Comment::new(
            CommentId::new("c1"),
            "Alice",
            "Hi",
            Timestamp::now(),
        ));
        assert_eq!(thread.state(), ThreadState::Open);
        thread.resolved = true;
        assert_eq!(thread.state(), ThreadState::Resolved);
    }

    #[test]
    fn test_uuid_generator_is_unique() {
        let ids = UuidGenerator;
        assert_ne!(ThreadId::generate(&ids), ThreadId::generate(&ids));
    }
}
