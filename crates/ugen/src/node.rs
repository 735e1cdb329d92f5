//! The node contract.
//!
//! A node produces one channel per block.  `process` is memoized by block id: the first call in a block resolves the
//! node's inputs and runs it, and every later call in the same block returns the same samples.  Nodes are shared as
//! [NodeRef], so a subgraph feeding several consumers runs once.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use atomic_refcell::{AtomicRef, AtomicRefCell};

use crate::context::{Block, BlockId, PrepareSpec};
use crate::rate::Rate;
use crate::unique_id::UniqueId;

pub trait Node: Send + Sync + 'static {
    /// Produce this node's samples for `block`, or return the ones already produced for it.
    ///
    /// Sets `done` if this node (or anything it depends on) wants to be removed from the graph.  Never sets it back to
    /// false.  Must not panic or block.
    fn process(&self, block: &Block, done: &mut bool) -> AtomicRef<'_, [f32]>;

    fn id(&self) -> UniqueId;

    fn rate(&self) -> Rate {
        Rate::Audio
    }

    /// If this node always outputs the same value, that value.
    fn constant_value(&self) -> Option<f32> {
        None
    }

    fn is_constant(&self) -> bool {
        self.constant_value().is_some()
    }

    /// The last block this node ran for.
    fn last_block(&self) -> Option<BlockId>;

    /// Size internal state ahead of time.  Called off the audio thread; recurses into inputs.
    fn prepare(&self, _spec: &PrepareSpec) {}

    /// The block in which this node decided it was done.  Owners drop it from the graph after that block.
    fn scheduled_for_deletion(&self) -> Option<BlockId> {
        None
    }

    /// Swap inputs which finished before `block` for silence and recurse into the rest.  Returns true if anything
    /// was pruned.
    ///
    /// Called at the start of a block, before any processing.  Pruned inputs go through the deferred drop queue.
    fn prepare_for_block(&self, _block: &Block) -> bool {
        false
    }
}

pub type NodeRef = Arc<dyn Node>;

const NEVER: u64 = u64::MAX;

/// Tracks which block a node last ran for, and the block it became done in.
#[derive(Debug)]
pub(crate) struct Memo {
    last: AtomicU64,
    done_at: AtomicU64,

    /// Last block whose pruning pass reached this node.
    pruned: AtomicU64,
}

impl Memo {
    pub(crate) fn new() -> Memo {
        Memo {
            last: AtomicU64::new(NEVER),
            done_at: AtomicU64::new(NEVER),
            pruned: AtomicU64::new(NEVER),
        }
    }

    pub(crate) fn is_current(&self, block: BlockId) -> bool {
        self.last.load(Ordering::Acquire) == block.get()
    }

    pub(crate) fn set_current(&self, block: BlockId) {
        self.last.store(block.get(), Ordering::Release);
    }

    pub(crate) fn last_block(&self) -> Option<BlockId> {
        match self.last.load(Ordering::Acquire) {
            NEVER => None,
            x => Some(BlockId::from_raw(x)),
        }
    }

    /// Latch done.  The first block to call this wins.
    pub(crate) fn mark_done(&self, block: BlockId) {
        let _ = self.done_at.compare_exchange(
            NEVER,
            block.get(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn done_at(&self) -> Option<BlockId> {
        match self.done_at.load(Ordering::Acquire) {
            NEVER => None,
            x => Some(BlockId::from_raw(x)),
        }
    }

    /// True only for the first pruning visit in `block`, so shared subgraphs are walked once.
    pub(crate) fn begin_pruning(&self, block: BlockId) -> bool {
        self.pruned.swap(block.get(), Ordering::AcqRel) != block.get()
    }
}

/// Did `node` finish in a block before `block`?
pub(crate) fn finished_before(node: &NodeRef, block: &Block) -> bool {
    matches!(node.scheduled_for_deletion(), Some(at) if at < block.id())
}

/// A node which always outputs one value.  Its output is a single frame regardless of block size.
pub(crate) struct ConstantNode {
    id: UniqueId,
    value: AtomicRefCell<[f32; 1]>,
}

impl ConstantNode {
    pub(crate) fn new(value: f32) -> ConstantNode {
        ConstantNode {
            id: UniqueId::new(),
            value: AtomicRefCell::new([value]),
        }
    }
}

impl Node for ConstantNode {
    fn process(&self, _block: &Block, _done: &mut bool) -> AtomicRef<'_, [f32]> {
        AtomicRef::map(self.value.borrow(), |v| &v[..])
    }

    fn id(&self) -> UniqueId {
        self.id
    }

    fn constant_value(&self) -> Option<f32> {
        Some(self.value.borrow()[0])
    }

    fn last_block(&self) -> Option<BlockId> {
        None
    }
}

lazy_static::lazy_static! {
    /// Silence.  Handles point at this once everything they held has been pruned.
    pub(crate) static ref NULL: NodeRef = Arc::new(ConstantNode::new(0.0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo() {
        let memo = Memo::new();
        assert_eq!(memo.last_block(), None);
        assert!(!memo.is_current(BlockId::from_raw(0)));

        memo.set_current(BlockId::from_raw(3));
        assert!(memo.is_current(BlockId::from_raw(3)));
        assert_eq!(memo.last_block(), Some(BlockId::from_raw(3)));

        memo.mark_done(BlockId::from_raw(3));
        memo.mark_done(BlockId::from_raw(4));
        assert_eq!(memo.done_at(), Some(BlockId::from_raw(3)));

        assert!(memo.begin_pruning(BlockId::from_raw(4)));
        assert!(!memo.begin_pruning(BlockId::from_raw(4)));
        assert!(memo.begin_pruning(BlockId::from_raw(5)));
    }

    #[test]
    fn test_constant() {
        let c = ConstantNode::new(2.5);
        assert_eq!(c.constant_value(), Some(2.5));
        assert!(c.is_constant());
        assert!(NULL.is_constant());
    }
}
