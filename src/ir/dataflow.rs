//! Definition/use chains and block adjacency derived from a [`ControlFlowGraph`].
//!
//! Chains are a snapshot: any structural edit of the graph drops the cached copy and the
//! next [`ControlFlowGraph::dataflow`] call rebuilds it.

use crate::ir::{cfg::ControlFlowGraph, BlockId, OpId, VarId};

/// Per-variable definitions and uses, per-block predecessors and successors.
#[derive(Debug, Clone, Default)]
pub struct DataflowChains {
    definitions: Vec<Vec<OpId>>,
    uses: Vec<Vec<OpId>>,
    predecessors: Vec<Vec<BlockId>>,
    successors: Vec<Vec<BlockId>>,
}

impl DataflowChains {
    /// Scans every live operator of `cfg`.
    #[must_use]
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let mut chains = Self {
            definitions: vec![Vec::new(); cfg.var_count()],
            uses: vec![Vec::new(); cfg.var_count()],
            predecessors: vec![Vec::new(); cfg.block_capacity()],
            successors: vec![Vec::new(); cfg.block_capacity()],
        };

        for block_id in cfg.block_ids() {
            let Ok(block) = cfg.block(block_id) else {
                continue;
            };
            for op_id in &block.ops {
                let Ok(op) = cfg.op(*op_id) else {
                    continue;
                };
                for result in &op.results {
                    chains.definitions[result.index()].push(*op_id);
                }
                for arg in &op.args {
                    if let Some(var) = arg.as_var() {
                        let uses = &mut chains.uses[var.index()];
                        if uses.last() != Some(op_id) {
                            uses.push(*op_id);
                        }
                    }
                }
            }
            if let Some(term) = block.terminator().and_then(|t| cfg.op(t).ok()) {
                for succ in term.successors() {
                    if !chains.successors[block_id.index()].contains(&succ) {
                        chains.successors[block_id.index()].push(succ);
                        chains.predecessors[succ.index()].push(block_id);
                    }
                }
            }
        }

        chains
    }

    /// Operators writing `var`.
    #[must_use]
    pub fn definitions(&self, var: VarId) -> &[OpId] {
        self.definitions.get(var.index()).map_or(&[], Vec::as_slice)
    }

    /// Operators reading `var`, each listed once.
    #[must_use]
    pub fn uses(&self, var: VarId) -> &[OpId] {
        self.uses.get(var.index()).map_or(&[], Vec::as_slice)
    }

    /// The only operator writing `var`, if there is exactly one.
    #[must_use]
    pub fn single_definition(&self, var: VarId) -> Option<OpId> {
        match self.definitions(var) {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// The only operator reading `var`, if there is exactly one.
    #[must_use]
    pub fn single_use(&self, var: VarId) -> Option<OpId> {
        match self.uses(var) {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Distinct predecessors of `block`.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.predecessors.get(block.index()).map_or(&[], Vec::as_slice)
    }

    /// Distinct successors of `block`.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.successors.get(block.index()).map_or(&[], Vec::as_slice)
    }
}
