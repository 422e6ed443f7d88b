//! Graph substrate for the lowering pipeline.
//!
//! Every method is represented by a [`ControlFlowGraph`]: an arena of basic blocks
//! and operators addressed by stable integer handles. Passes edit the graph in place
//! through a small set of primitives (substitute, insert before/after, delete, split),
//! and every structural edit marks the derived [`DataflowChains`] dirty so they are
//! recomputed lazily on the next query.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Graph Substrate                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  TypeSystem            types, fields, methods, well-known helpers│
//! │  ControlFlowGraph      block arena, operator arena, variables    │
//! │    ├─ BasicBlock       ordered operators + one terminator        │
//! │    ├─ Operator         OpKind + results + args + annotations     │
//! │    ├─ Expression       variable or constant                      │
//! │    └─ DataflowChains   definitions / uses / predecessors (lazy)  │
//! │  DominatorTree         immediate dominators over live blocks     │
//! │  OperatorLevel         how far an operator still is from target  │
//! │  CfgBuilder            closure-based construction                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

mod annotation;
mod block;
mod builder;
mod cfg;
mod dataflow;
mod dominance;
mod expression;
mod level;
mod operator;
mod registry;
mod types;

pub use annotation::{AnnotationFlags, Annotations};
pub use block::{BasicBlock, BlockQualifier};
pub use builder::{BlockContext, CfgBuilder, CfgContext};
pub use cfg::{CfgProperties, ControlFlowGraph, SubstitutionFlags};
pub use dataflow::DataflowChains;
pub use dominance::DominatorTree;
pub use expression::{ConstValue, Constant, Expression, VarKind, Variable};
pub use level::OperatorLevel;
pub(crate) use level::{has_wide_operand, is_wide, needs_helper};
pub use operator::{
    Alu, CallKind, Carry, CompareCondition, Comparison, ConditionCode, DebugInfo, OpKind, OpTag,
    Operator, UnaryAlu,
};
pub use registry::{
    TypeSystem, TypeSystemBuilder, WellKnownField, WellKnownMethod, ARRAY_DATA_OFFSET,
};
pub use types::{
    BuiltinType, FieldDesc, MethodDesc, MethodFlags, TypeDesc, TypeFlags, TypeKind, WORD_SIZE,
};

/// Declares a copyable arena handle with `new`/`index` accessors.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Creates a handle from a raw arena index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                // Arena sizes are bounded by method size, far below u32::MAX
                #[allow(clippy::cast_possible_truncation)]
                Self(index as u32)
            }

            /// Returns the raw arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

entity_id!(
    /// Handle of a basic block inside its [`ControlFlowGraph`].
    BlockId,
    "B"
);
entity_id!(
    /// Handle of an operator inside its [`ControlFlowGraph`].
    OpId,
    "op"
);
entity_id!(
    /// Handle of a variable inside its [`ControlFlowGraph`].
    VarId,
    "v"
);
entity_id!(
    /// Handle of a type in the [`TypeSystem`].
    TypeId,
    "T"
);
entity_id!(
    /// Handle of a field in the [`TypeSystem`].
    FieldId,
    "F"
);
entity_id!(
    /// Handle of a method in the [`TypeSystem`].
    MethodId,
    "M"
);
