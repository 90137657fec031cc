//! Fork database: every block received but not yet irreversible, held as
//! an in-memory tree so the controller can pick the best head and compute
//! reorg branches (§4.6).
//!
//! An arena-of-nodes design: a flat `DashMap<Hash, ForkNode>` rather than a
//! pointer tree, since an owned-pointer tree with backward parent links is
//! awkward to express under the borrow checker. Read accessors return `Vec`
//! snapshots rather than exposing iterators tied to a lock guard, so a
//! caller can hold the result across a later mutation without deadlocking
//! on the map.

use dashmap::DashMap;

use crate::block::SignedBlock;
use crate::crypto::Hash;

/// One block's bookkeeping inside the fork database.
#[derive(Clone)]
pub struct ForkNode {
    pub block: SignedBlock,
    /// Set once the block has passed the validation pipeline; unvalidated
    /// nodes can still be linked into the tree (to let later blocks resolve
    /// their parent) but never contribute to `head()`.
    pub validated: bool,
    /// Set while this node's chain is the current best chain, maintained by
    /// the block applier as it walks from the old head to the new one
    /// during a reorg (§4.6 invariant I3, I4).
    pub in_current_branch: bool,
}

/// The fork database proper: every known, not-yet-irreversible block keyed
/// by id, plus a reverse index from parent to children for descent.
#[derive(Default)]
pub struct ForkDatabase {
    nodes: DashMap<Hash, ForkNode>,
    children: DashMap<Hash, Vec<Hash>>,
}

impl ForkDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, block: SignedBlock, validated: bool) {
        let id = block.id();
        let parent = block.header.parent_id;
        self.children.entry(parent).or_default().push(id);
        self.nodes.insert(
            id,
            ForkNode {
                block,
                validated,
                in_current_branch: false,
            },
        );
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &Hash) -> Option<ForkNode> {
        self.nodes.get(id).map(|entry| entry.clone())
    }

    pub fn mark_validated(&self, id: &Hash) {
        if let Some(mut entry) = self.nodes.get_mut(id) {
            entry.validated = true;
        }
    }

    pub fn set_in_current_branch(&self, id: &Hash, value: bool) {
        if let Some(mut entry) = self.nodes.get_mut(id) {
            entry.in_current_branch = value;
        }
    }

    pub fn children_of(&self, id: &Hash) -> Vec<Hash> {
        self.children.get(id).map(|e| e.clone()).unwrap_or_default()
    }

    /// Removes a node and its edge from its parent's child list. Does not
    /// recurse into descendants — callers that need to prune a whole
    /// subtree (e.g. after `pop_block` discards a branch) walk
    /// `children_of` themselves.
    pub fn remove(&self, id: &Hash) {
        if let Some((_, node)) = self.nodes.remove(id) {
            if let Some(mut siblings) = self.children.get_mut(&node.block.header.parent_id) {
                siblings.retain(|child| child != id);
            }
        }
        self.children.remove(id);
    }

    /// The best head: the validated block with the greatest number, ties
    /// broken by the smallest id (invariant I3 — a deterministic total
    /// order so every honest node picks the same head from the same set of
    /// blocks).
    pub fn head(&self) -> Option<Hash> {
        self.nodes
            .iter()
            .filter(|entry| entry.validated)
            .map(|entry| (entry.block.number(), *entry.key()))
            .max_by(|(num_a, id_a), (num_b, id_b)| num_a.cmp(num_b).then(id_b.cmp(id_a)))
            .map(|(_, id)| id)
    }

    /// The best candidate ignoring the validated flag — used by the block
    /// applier to decide, right after inserting a not-yet-validated block,
    /// whether it is even worth attempting to validate (§4.7 step 2-3).
    /// [`Self::head`] stays restricted to validated blocks so it always
    /// reflects the authoritative chain (invariant I3).
    pub fn best_candidate(&self) -> Option<Hash> {
        self.nodes
            .iter()
            .map(|entry| (entry.block.number(), *entry.key()))
            .max_by(|(num_a, id_a), (num_b, id_b)| num_a.cmp(num_b).then(id_b.cmp(id_a)))
            .map(|(_, id)| id)
    }

    /// Walks up from `from` to the root (a block with no known parent in
    /// this database, i.e. the current irreversible head), returning ids
    /// oldest-first. Used to materialize a candidate branch end-to-end.
    pub fn path_to_root(&self, from: Hash) -> Vec<Hash> {
        let mut path = Vec::new();
        let mut current = from;
        loop {
            path.push(current);
            match self.nodes.get(&current) {
                Some(entry) => {
                    let parent = entry.block.header.parent_id;
                    if !self.nodes.contains_key(&parent) {
                        break;
                    }
                    current = parent;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Finds the lowest common ancestor of `a` and `b` by walking both
    /// root-ward paths and taking the last id they share. Returns `None` if
    /// the branches share no ancestor known to this database (they were
    /// built on different, already-pruned irreversible history).
    pub fn lowest_common_ancestor(&self, a: Hash, b: Hash) -> Option<Hash> {
        let path_a = self.path_to_root(a);
        let path_b = self.path_to_root(b);
        let set_b: std::collections::HashSet<Hash> = path_b.into_iter().collect();
        path_a.into_iter().rev().find(|id| set_b.contains(id))
    }

    /// The full branch from (but not including) `ancestor` up to and
    /// including `tip`, oldest first — exactly the sequence of blocks a
    /// reorg needs to re-apply.
    pub fn branch_from(&self, ancestor: Hash, tip: Hash) -> Vec<SignedBlock> {
        let mut blocks = Vec::new();
        let mut current = tip;
        while current != ancestor {
            let Some(entry) = self.nodes.get(&current) else {
                break;
            };
            let parent = entry.block.header.parent_id;
            blocks.push(entry.block.clone());
            current = parent;
        }
        blocks.reverse();
        blocks
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockBuilder;
    use crate::crypto::Signature;

    fn signed(parent: Hash, producer: &str) -> SignedBlock {
        BlockBuilder::new(parent, 3, producer.to_string(), None).sign(|_| Signature([0u8; 64]))
    }

    #[test]
    fn head_prefers_greater_block_number() {
        let db = ForkDatabase::new();
        let genesis = signed(Hash::ZERO, "p1");
        let genesis_id = genesis.id();
        db.add(genesis, true);
        let child = signed(genesis_id, "p2");
        let child_id = child.id();
        db.add(child, true);
        assert_eq!(db.head(), Some(child_id));
    }

    #[test]
    fn unvalidated_blocks_never_become_head() {
        let db = ForkDatabase::new();
        let genesis = signed(Hash::ZERO, "p1");
        let genesis_id = genesis.id();
        db.add(genesis, true);
        let child = signed(genesis_id, "p2");
        db.add(child, false);
        assert_eq!(db.head(), Some(genesis_id));
    }

    #[test]
    fn lca_finds_shared_ancestor_across_forks() {
        let db = ForkDatabase::new();
        let genesis = signed(Hash::ZERO, "p1");
        let genesis_id = genesis.id();
        db.add(genesis, true);

        let branch_a = signed(genesis_id, "a");
        let branch_a_id = branch_a.id();
        db.add(branch_a, true);

        let branch_b = signed(genesis_id, "b");
        let branch_b_id = branch_b.id();
        db.add(branch_b, true);

        assert_eq!(db.lowest_common_ancestor(branch_a_id, branch_b_id), Some(genesis_id));
    }

    #[test]
    fn branch_from_returns_oldest_first() {
        let db = ForkDatabase::new();
        let genesis = signed(Hash::ZERO, "p1");
        let genesis_id = genesis.id();
        db.add(genesis, true);

        let mid = signed(genesis_id, "p2");
        let mid_id = mid.id();
        db.add(mid, true);

        let tip = signed(mid_id, "p3");
        let tip_id = tip.id();
        db.add(tip, true);

        let branch = db.branch_from(genesis_id, tip_id);
        assert_eq!(branch.len(), 2);
        assert_eq!(branch[0].id(), mid_id);
        assert_eq!(branch[1].id(), tip_id);
    }

    #[test]
    fn remove_detaches_from_parent_child_list() {
        let db = ForkDatabase::new();
        let genesis = signed(Hash::ZERO, "p1");
        let genesis_id = genesis.id();
        db.add(genesis, true);
        let child = signed(genesis_id, "p2");
        let child_id = child.id();
        db.add(child, true);

        db.remove(&child_id);
        assert!(!db.contains(&child_id));
        assert!(db.children_of(&genesis_id).is_empty());
    }
}
