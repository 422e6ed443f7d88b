use crate::ir::OpId;

/// Role of a block in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockQualifier {
    /// The unique entry block, which holds the method prologue
    Entry,
    /// The unique exit block, which holds the method epilogue and the `Return`
    Exit,
    /// An ordinary block
    Normal,
    /// A block that only raises an exception and never falls through
    Fault,
}

/// A straight-line sequence of operators ending in exactly one control operator.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Operators in execution order; the last one is the terminator
    pub ops: Vec<OpId>,
    /// Role of the block
    pub qualifier: BlockQualifier,
    /// Optional label for diagnostics
    pub label: Option<String>,
}

impl BasicBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new(qualifier: BlockQualifier) -> Self {
        Self {
            ops: Vec::new(),
            qualifier,
            label: None,
        }
    }

    /// Returns the terminator, if the block has been closed.
    #[must_use]
    pub fn terminator(&self) -> Option<OpId> {
        self.ops.last().copied()
    }

    /// Position of `op` inside the block.
    #[must_use]
    pub fn position(&self, op: OpId) -> Option<usize> {
        self.ops.iter().position(|o| *o == op)
    }
}
