//! Resolving and reopening threads.
//!
//! ```text
//!   Open ──resolve──► Resolved ──(Delete policy)──► entry removed
//!     ▲                  │
//!     └────unresolve─────┘   (Retain policy only)
//! ```

use serde::{Deserialize, Serialize};

use crate::{MarkerInstruction, Mutation, Result, ThreadError, ThreadId, ThreadMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Resolving discards the thread and its marker
    #[default]
    Delete,
    /// Resolving sets `isResolved`; the thread and marker stay
    Retain,
}

pub fn resolve(
    threads: &ThreadMap,
    thread_id: &ThreadId,
    policy: ResolutionPolicy,
) -> Result<Mutation> {
    let thread = threads
        .get(thread_id)
        .ok_or_else(|| ThreadError::ThreadNotFound(thread_id.clone()))?;

    match policy {
        ResolutionPolicy::Delete => {
            let mut next = threads.clone();
            next.remove(thread_id);
            Ok(Mutation {
                threads: next,
                thread_id: thread_id.clone(),
                marker: MarkerInstruction::Detach(thread_id.clone()),
                changed: true,
            })
        }
        ResolutionPolicy::Retain => set_resolved(threads, thread_id, thread.resolved, true),
    }
}

/// Reopen a thread. Only a retained thread can be reopened; a deleted one
/// is reported as not found.
pub fn unresolve(threads: &ThreadMap, thread_id: &ThreadId) -> Result<Mutation> {
    let thread = threads
        .get(thread_id)
        .ok_or_else(|| ThreadError::ThreadNotFound(thread_id.clone()))?;
    set_resolved(threads, thread_id, thread.resolved, false)
}

fn set_resolved(
    threads: &ThreadMap,
    thread_id: &ThreadId,
    current: bool,
    resolved: bool,
) -> Result<Mutation> {
    if current == resolved {
        return Ok(Mutation::unchanged(threads, thread_id));
    }
    let mut next = threads.clone();
    if let Some(thread) = next.get_mut(thread_id) {
        thread.resolved = resolved;
    }
    Ok(Mutation {
        threads: next,
        thread_id: thread_id.clone(),
        marker: MarkerInstruction::Unchanged,
        changed: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{append_comment, serialize, ThreadState, UuidGenerator};

    fn two_threads() -> (ThreadMap, ThreadId, ThreadId) {
        let ids = UuidGenerator;
        let a = append_comment(&ThreadMap::new(), None, "Alice", "first", &ids).unwrap();
        let b = append_comment(&a.threads, None, "Bob", "second", &ids).unwrap();
        (b.threads, a.thread_id, b.thread_id)
    }

    #[test]
    fn test_resolve_deletes_entry_and_detaches() {
        let (threads, a, b) = two_threads();
        let m = resolve(&threads, &a, ResolutionPolicy::Delete).unwrap();

        assert!(!m.threads.contains(&a));
        assert_eq!(m.marker, MarkerInstruction::Detach(a.clone()));
        assert_eq!(m.threads.len(), 1);

        // the other entry is untouched
        assert_eq!(m.threads.get(&b), threads.get(&b));
        let other_before = serde_json::to_string(threads.get(&b).unwrap()).unwrap();
        let other_after = serde_json::to_string(m.threads.get(&b).unwrap()).unwrap();
        assert_eq!(other_before, other_after);
    }

    #[test]
    fn test_resolve_single_comment_thread() {
        let ids = UuidGenerator;
        let m = append_comment(&ThreadMap::new(), None, "Alice", "Hi", &ids).unwrap();
        let r = resolve(&m.threads, &m.thread_id, ResolutionPolicy::Delete).unwrap();
        assert!(r.threads.is_empty());
        assert_eq!(serialize(&r.threads).unwrap(), "{}");
    }

    #[test]
    fn test_unresolve_after_delete_is_not_found() {
        let (threads, a, _) = two_threads();
        let m = resolve(&threads, &a, ResolutionPolicy::Delete).unwrap();
        assert!(matches!(
            unresolve(&m.threads, &a),
            Err(ThreadError::ThreadNotFound(_))
        ));
    }

    #[test]
    fn test_retain_round_trip() {
        let (threads, a, _) = two_threads();
        let resolved = resolve(&threads, &a, ResolutionPolicy::Retain).unwrap();
        assert_eq!(resolved.marker, MarkerInstruction::Unchanged);
        assert_eq!(resolved.threads.get(&a).unwrap().state(), ThreadState::Resolved);
        assert_eq!(resolved.threads.open_threads().count(), 1);

        let again = resolve(&resolved.threads, &a, ResolutionPolicy::Retain).unwrap();
        assert!(!again.changed);

        let reopened = unresolve(&resolved.threads, &a).unwrap();
        assert_eq!(reopened.threads.get(&a).unwrap().state(), ThreadState::Open);
        assert_eq!(reopened.threads, threads);
    }

    #[test]
    fn test_unresolve_open_thread_is_noop() {
        let (threads, a, _) = two_threads();
        let m = unresolve(&threads, &a).unwrap();
        assert!(!m.changed);
        assert_eq!(m.threads, threads);
    }

    #[test]
    fn test_resolve_unknown_thread() {
        let (threads, _, _) = two_threads();
        let result = resolve(&threads, &ThreadId::new("missing"), ResolutionPolicy::Delete);
        assert!(matches!(result, Err(ThreadError::ThreadNotFound(_))));
    }
}
