//! Dominator tree computation using the Cooper-Harvey-Kennedy iterative algorithm.
//!
//! A block `d` **dominates** a block `n` if every path from the entry to `n` passes
//! through `d`. The analyses that place pi operators and prove constraints only reason
//! about facts established in a dominating block, so the tree is recomputed whenever a
//! pass needs it; graphs here are small enough that the iterative algorithm over a
//! reverse post-order converges in two or three rounds.

use crate::ir::{cfg::ControlFlowGraph, BlockId};

/// Immediate dominators of the blocks reachable from the entry.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: BlockId,
    /// Immediate dominator per block index; `None` for the entry and unreachable blocks
    idom: Vec<Option<BlockId>>,
    /// Reverse post-order number per block index; `None` if unreachable
    order: Vec<Option<usize>>,
}

impl DominatorTree {
    /// Computes the tree for `cfg`.
    #[must_use]
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let capacity = cfg.block_capacity();
        let rpo = cfg.reverse_postorder();
        let entry = cfg.entry();

        let mut order = vec![None; capacity];
        for (i, block) in rpo.iter().enumerate() {
            order[block.index()] = Some(i);
        }

        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); capacity];
        for block in &rpo {
            for succ in cfg.successors(*block) {
                if !preds[succ.index()].contains(block) {
                    preds[succ.index()].push(*block);
                }
            }
        }

        // The entry points at itself while iterating so intersect() terminates there
        let mut idom: Vec<Option<BlockId>> = vec![None; capacity];
        idom[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in &preds[block.index()] {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(current) => intersect(&idom, &order, *pred, current),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        idom[entry.index()] = None;
        Self { entry, idom, order }
    }

    /// The entry (root) block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Returns `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.order.get(block.index()).is_some_and(Option::is_some)
    }

    /// The immediate dominator of `block`, `None` for the entry and unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// Checks if `a` dominates `b`. A block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        self.dominators(b).any(|d| d == a)
    }

    /// Checks if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Iterates the dominators of `block`, from the block itself up to the entry.
    pub fn dominators(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(Some(block), |b| self.immediate_dominator(*b))
    }

    /// Blocks whose immediate dominator is `block`.
    #[must_use]
    pub fn children(&self, block: BlockId) -> Vec<BlockId> {
        self.idom
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == Some(block))
            .map(|(i, _)| BlockId::new(i))
            .collect()
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    order: &[Option<usize>],
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    let rank = |x: BlockId| order[x.index()].unwrap_or(usize::MAX);
    while a != b {
        while rank(a) > rank(b) {
            match idom[a.index()] {
                Some(next) if next != a => a = next,
                _ => return b,
            }
        }
        while rank(b) > rank(a) {
            match idom[b.index()] {
                Some(next) if next != b => b = next,
                _ => return a,
            }
        }
    }
    a
}
