//! Binding between a content region and its thread.
//!
//! A region carries a list of class-name tokens. The one of the form
//! `<prefix><thread id>` names the thread discussing that region.

use serde::{Deserialize, Serialize};

use crate::{Result, ThreadError, ThreadId};

pub const DEFAULT_MARKER_PREFIX: &str = "block-editor-collab__";

/// Ordered, duplicate-free list of region tokens (a block's class names).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerSet(Vec<String>);

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whitespace separated class attribute.
    pub fn from_class_name(class_name: &str) -> Self {
        class_name.split_whitespace().collect()
    }

    pub fn to_class_name(&self) -> String {
        self.0.join(" ")
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// Returns false if the token was already present.
    pub fn insert(&mut self, token: impl Into<String>) -> bool {
        let token = token.into();
        if token.is_empty() || self.contains(&token) {
            return false;
        }
        self.0.push(token);
        true
    }

    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| t != token);
        self.0.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for MarkerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = MarkerSet::new();
        for token in iter {
            set.insert(token);
        }
        set
    }
}

/// Encodes thread ids into region tokens and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerCodec {
    prefix: String,
}

impl Default for MarkerCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_PREFIX)
    }
}

impl MarkerCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, id: &ThreadId) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Find the thread bound to a region.
    ///
    /// A bare prefix with no id is not a marker. Two or more distinct
    /// markers are reported as [`ThreadError::AmbiguousMarker`] instead of
    /// picking one.
    pub fn decode(&self, markers: &MarkerSet) -> Result<Option<ThreadId>> {
        let mut found: Vec<ThreadId> = markers
            .iter()
            .filter_map(|token| token.strip_prefix(self.prefix.as_str()))
            .filter(|suffix| !suffix.is_empty())
            .map(ThreadId::new)
            .collect();

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(ThreadError::AmbiguousMarker(found)),
        }
    }

    /// Bind the region to `id`, dropping any other marker it carried.
    /// Other tokens keep their order.
    pub fn attach(&self, markers: &MarkerSet, id: &ThreadId) -> MarkerSet {
        let token = self.encode(id);
        let mut next: MarkerSet = markers
            .iter()
            .filter(|t| *t == token || !t.starts_with(self.prefix.as_str()))
            .collect();
        next.insert(token);
        next
    }

    /// Remove the marker for `id` and nothing else.
    pub fn detach(&self, markers: &MarkerSet, id: &ThreadId) -> MarkerSet {
        let mut next = markers.clone();
        next.remove(&self.encode(id));
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let codec = MarkerCodec::default();
        let id = ThreadId::new("5f0c");
        let marker = codec.encode(&id);
        assert_eq!(marker, "block-editor-collab__5f0c");

        let set = MarkerSet::from_class_name(&format!("wp-block has-text {marker}"));
        assert_eq!(codec.decode(&set).unwrap(), Some(id));
    }

    #[test]
    fn test_decode_absent() {
        let codec = MarkerCodec::default();
        let set = MarkerSet::from_class_name("wp-block block-editor-collab__");
        assert_eq!(codec.decode(&set).unwrap(), None);
        assert_eq!(codec.decode(&MarkerSet::new()).unwrap(), None);
    }

    #[test]
    fn test_decode_ambiguous() {
        let codec = MarkerCodec::default();
        let set = MarkerSet::from_class_name("block-editor-collab__a block-editor-collab__b");
        match codec.decode(&set) {
            Err(ThreadError::AmbiguousMarker(ids)) => {
                assert_eq!(ids, vec![ThreadId::new("a"), ThreadId::new("b")]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_attach_preserves_other_classes() {
        let codec = MarkerCodec::default();
        let set = MarkerSet::from_class_name("alignwide is-style-fancy");
        let attached = codec.attach(&set, &ThreadId::new("t1"));
        assert_eq!(
            attached.to_class_name(),
            "alignwide is-style-fancy block-editor-collab__t1"
        );

        // idempotent
        let again = codec.attach(&attached, &ThreadId::new("t1"));
        assert_eq!(again, attached);
    }

    #[test]
    fn test_attach_rebinds() {
        let codec = MarkerCodec::default();
        let set = MarkerSet::from_class_name("block-editor-collab__old alignwide");
        let attached = codec.attach(&set, &ThreadId::new("new"));
        assert_eq!(attached.to_class_name(), "alignwide block-editor-collab__new");
    }

    #[test]
    fn test_detach_only_removes_own_marker() {
        let codec = MarkerCodec::default();
        let set = MarkerSet::from_class_name("alignwide block-editor-collab__t1 has-bg");
        let detached = codec.detach(&set, &ThreadId::new("t1"));
        assert_eq!(detached.to_class_name(), "alignwide has-bg");

        let untouched = codec.detach(&set, &ThreadId::new("t2"));
        assert_eq!(untouched, set);
    }

    #[test]
    fn test_marker_set_dedupes() {
        let set = MarkerSet::from_class_name("  a b   a c ");
        assert_eq!(set.to_class_name(), "a b c");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_custom_prefix() {
        let codec = MarkerCodec::new("thread-");
        let set = MarkerSet::from_class_name("thread-42 block-editor-collab__x");
        assert_eq!(codec.decode(&set).unwrap(), Some(ThreadId::new("42")));
    }
}
