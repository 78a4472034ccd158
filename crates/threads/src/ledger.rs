//! Appending and removing comments on a thread.
//!
//! Every operation takes a snapshot by reference and returns a new one;
//! the input is never modified.

use serde::{Deserialize, Serialize};

use crate::{
    Comment, CommentId, IdGenerator, MarkerInstruction, Mutation, Result, Thread, ThreadError,
    ThreadId, ThreadMap, Timestamp,
};

const MAX_ID_ATTEMPTS: usize = 8;

/// What deleting a comment id that is not in the thread does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCommentPolicy {
    /// Succeed without changing anything
    #[default]
    Ignore,
    /// Fail with [`ThreadError::CommentNotFound`]
    Reject,
}

/// Add a comment by `author`, stamped now.
///
/// With no `thread_id` a new thread is started under a freshly generated
/// id and the result asks for that id's marker to be attached.
pub fn append_comment(
    threads: &ThreadMap,
    thread_id: Option<&ThreadId>,
    author: &str,
    text: &str,
    ids: &dyn IdGenerator,
) -> Result<Mutation> {
    let comment = Comment::new(CommentId::generate(ids), author, text, Timestamp::now());
    append(threads, thread_id, comment, ids)
}

/// Add an already built comment to the end of a thread.
///
/// A `thread_id` that is not in the map (the region kept its marker but
/// the thread was lost) starts a new thread under that same id.
pub fn append(
    threads: &ThreadMap,
    thread_id: Option<&ThreadId>,
    comment: Comment,
    ids: &dyn IdGenerator,
) -> Result<Mutation> {
    if comment.text.is_empty() {
        return Err(ThreadError::EmptyComment);
    }

    let mut next = threads.clone();
    let (thread_id, marker) = match thread_id {
        Some(id) => match next.get_mut(id) {
            Some(thread) => {
                thread.comments.push(comment);
                (id.clone(), MarkerInstruction::Unchanged)
            }
            None => {
                tracing::warn!(thread = %id, "region marker has no stored thread; recreating it");
                next.insert(id.clone(), Thread::new(comment));
                (id.clone(), MarkerInstruction::Attach(id.clone()))
            }
        },
        None => {
            let id = fresh_thread_id(threads, ids)?;
            tracing::debug!(thread = %id, "starting thread");
            next.insert(id.clone(), Thread::new(comment));
            (id.clone(), MarkerInstruction::Attach(id))
        }
    };

    Ok(Mutation {
        threads: next,
        thread_id,
        marker,
        changed: true,
    })
}

/// Remove one comment. Emptying a thread removes it and asks for its
/// marker to be detached.
pub fn delete_comment(
    threads: &ThreadMap,
    thread_id: &ThreadId,
    comment_id: &CommentId,
    policy: MissingCommentPolicy,
) -> Result<Mutation> {
    let thread = threads
        .get(thread_id)
        .ok_or_else(|| ThreadError::ThreadNotFound(thread_id.clone()))?;

    let Some(position) = thread.comments.iter().position(|c| &c.id == comment_id) else {
        return match policy {
            MissingCommentPolicy::Ignore => Ok(Mutation::unchanged(threads, thread_id)),
            MissingCommentPolicy::Reject => Err(ThreadError::CommentNotFound {
                thread: thread_id.clone(),
                comment: comment_id.clone(),
            }),
        };
    };

    let mut next = threads.clone();
    let mut marker = MarkerInstruction::Unchanged;
    if let Some(thread) = next.get_mut(thread_id) {
        thread.comments.remove(position);
        if thread.comments.is_empty() {
            next.remove(thread_id);
            marker = MarkerInstruction::Detach(thread_id.clone());
        }
    }

    Ok(Mutation {
        threads: next,
        thread_id: thread_id.clone(),
        marker,
        changed: true,
    })
}

fn fresh_thread_id(threads: &ThreadMap, ids: &dyn IdGenerator) -> Result<ThreadId> {
    let mut candidate = ThreadId::generate(ids);
    for _ in 1..MAX_ID_ATTEMPTS {
        if !threads.contains(&candidate) {
            return Ok(candidate);
        }
        candidate = ThreadId::generate(ids);
    }
    if threads.contains(&candidate) {
        Err(ThreadError::IdCollision(candidate))
    } else {
        Ok(candidate)
    }
}
