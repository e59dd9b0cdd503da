//! Idempotent command log.
//!
//! A worker records every command it answered, keyed by sender and
//! [`CommandId`], together with the reply it sent. A re-delivered command
//! (a round re-send or a network duplicate) is answered from the log
//! instead of being executed again.
//!
//! The log only spans the active version batch: ids are unique within a
//! batch, and a new batch starts with an empty log.

use std::collections::HashMap;

use fastrestore_types::{CommandId, NodeId};

use crate::message::Reply;

#[derive(Debug, Default)]
pub struct CommandLog {
    replies: HashMap<(NodeId, CommandId), Reply>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached reply if `id` from `sender` was already answered.
    pub fn get(&self, sender: NodeId, id: CommandId) -> Option<&Reply> {
        self.replies.get(&(sender, id))
    }

    pub fn contains(&self, sender: NodeId, id: CommandId) -> bool {
        self.replies.contains_key(&(sender, id))
    }

    /// Records the reply sent for `id` from `sender`.
    pub fn record(&mut self, sender: NodeId, id: CommandId, reply: Reply) {
        self.replies.insert((sender, id), reply);
    }

    /// Forgets everything; called when a new batch starts.
    pub fn clear(&mut self) {
        self.replies.clear();
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastrestore_types::Phase;

    #[test]
    fn test_same_id_from_different_senders_is_distinct() {
        let mut log = CommandLog::new();
        let id = CommandId::new(1, Phase::SendMutations).next();
        let me = NodeId::new(9);

        log.record(NodeId::new(1), id, Reply::ack(me, id));
        assert!(log.contains(NodeId::new(1), id));
        assert!(!log.contains(NodeId::new(2), id));
        assert_eq!(log.get(NodeId::new(1), id), Some(&Reply::ack(me, id)));
    }

    #[test]
    fn test_clear_forgets_batch() {
        let mut log = CommandLog::new();
        let id = CommandId::new(1, Phase::ResetBatch).next();
        log.record(NodeId::MASTER, id, Reply::ack(NodeId::new(1), id));
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
    }
}
