use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::info;

/// Video ids denied service.
#[derive(Debug, Default)]
pub struct BlockList {
    ids: RwLock<HashSet<String>>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, resource_id: &str) -> bool {
        self.ids.read().contains(resource_id)
    }

    /// Returns `true` when the id was not blocked before. Blocking twice is a no-op.
    pub fn block(&self, resource_id: &str) -> bool {
        if self.is_blocked(resource_id) {
            return false;
        }

        let inserted = self.ids.write().insert(resource_id.to_string());
        if inserted {
            info!("Blocked video {resource_id:?}");
        }
        inserted
    }

    pub fn unblock(&self, resource_id: &str) -> bool {
        let removed = self.ids.write().remove(resource_id);
        if removed {
            info!("Unblocked video {resource_id:?}");
        }
        removed
    }

    pub fn blocked(&self) -> Vec<String> {
        let mut ids = self.ids.read().iter().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_idempotent() {
        let list = BlockList::new();
        assert!(list.block("dQw4w9WgXcQ"));
        assert!(!list.block("dQw4w9WgXcQ"));

        assert!(list.is_blocked("dQw4w9WgXcQ"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn never_blocked_ids_pass() {
        let list = BlockList::new();
        assert!(!list.is_blocked("dQw4w9WgXcQ"));
        list.block("aaaaaaaaaaa");
        assert!(!list.is_blocked("dQw4w9WgXcQ"));
        assert!(!list.is_blocked(""));
    }

    #[test]
    fn unblock_removes_entry() {
        let list = BlockList::new();
        list.block("dQw4w9WgXcQ");

        assert!(list.unblock("dQw4w9WgXcQ"));
        assert!(!list.unblock("dQw4w9WgXcQ"));
        assert!(!list.is_blocked("dQw4w9WgXcQ"));
        assert!(list.is_empty());
    }

    #[test]
    fn listing_is_sorted() {
        let list = BlockList::new();
        list.block("ccccccccccc");
        list.block("aaaaaaaaaaa");
        list.block("bbbbbbbbbbb");

        assert_eq!(
            list.blocked(),
            vec!["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"]
        );
    }
}
