//! Rewrite rules dispatched by the [`PhaseEngine`](crate::compiler::PhaseEngine).
//!
//! Every public function here has the handler signature
//! `fn(&mut NotificationContext<'_>) -> Result<HandlerOutcome>` and is registered in the
//! engine's dispatch table for one phase and one or more operator tags, or as a flow
//! handler of a phase. Handlers only ever lower the level of the operator they visit;
//! none of them recreates a pattern an earlier rule consumed.
//!
//! # Rule families
//!
//! | Module | Phase | Rewrites |
//! |---|---|---|
//! | [`configuration`] | `ApplyConfiguration` | option calls into constants |
//! | [`highlevel`] | `HighLevelToMidLevel` | implicit checks, allocation, casts, dispatch |
//! | [`devirtualize`] | `HighLevelToMidLevel` | dispatched calls with a unique target |
//! | [`calls`] | `HighLevelToMidLevel`, `ExpandAggregateTypes` | table dispatch, convention binding |
//! | [`refcount`] | `ReferenceCounting` | retain/release injection |
//! | [`exceptions`] | `FromImplicitToExplicitExceptions` | checks into fault branches |
//! | [`helpers`] | `ConvertUnsupportedOperatorsToMethodCalls` | integer helper calls |
//! | [`softfloat`] | `ConvertUnsupportedOperatorsToMethodCalls` | soft-float helper calls |
//! | [`wrappers`] | `MidLevelToLowLevel` | runtime prologue/epilogue calls |
//! | [`lowering`] | `MidLevelToLowLevel` | fields and elements into memory accesses |
//! | [`checks`] | `RemoveRedundantChecks` | proven branches collapsed |
//! | [`scalarize`] | `ExpandAggregateTypes` | multi-word operators into words |
//! | [`deadcode`] | every phase | unreachable blocks, unused temporaries, phis |
//! | [`verify`] | `Finalize` | canonical low-level form |

pub mod calls;
pub mod checks;
pub mod configuration;
pub mod deadcode;
pub mod devirtualize;
pub mod exceptions;
pub mod helpers;
pub mod highlevel;
pub mod lowering;
pub mod refcount;
pub mod scalarize;
pub mod softfloat;
pub mod verify;
pub mod wrappers;

use crate::{
    ir::{ControlFlowGraph, MethodId, OpId, Operator, SubstitutionFlags, TypeSystem},
    Result,
};

/// Replaces the operator `id` with `ops`, in order.
///
/// The first replacement keeps the handle of `id`. When `id` is a terminator the last
/// replacement takes its place and the others are inserted in front of it. An empty
/// sequence deletes the operator.
pub(crate) fn replace_with(
    cfg: &mut ControlFlowGraph,
    id: OpId,
    mut ops: Vec<Operator>,
) -> Result<()> {
    if ops.is_empty() {
        return cfg.delete(id);
    }

    if cfg.op(id)?.is_terminator() {
        let Some(last) = ops.pop() else {
            return cfg.delete(id);
        };
        for op in ops {
            cfg.insert_before(id, op)?;
        }
        return cfg.substitute(id, last, SubstitutionFlags::COPY_DEBUG);
    }

    let mut rest = ops.split_off(1);
    let Some(first) = ops.pop() else {
        return cfg.delete(id);
    };
    cfg.substitute(id, first, SubstitutionFlags::COPY_DEBUG)?;
    let mut anchor = id;
    for op in rest.drain(..) {
        anchor = cfg.insert_after(anchor, op)?;
    }
    Ok(())
}

/// Inserts `ops` in order immediately before `anchor`.
pub(crate) fn insert_all_before(
    cfg: &mut ControlFlowGraph,
    anchor: OpId,
    ops: Vec<Operator>,
) -> Result<Vec<OpId>> {
    ops.into_iter()
        .map(|op| cfg.insert_before(anchor, op))
        .collect()
}

/// Inserts `ops` in order immediately after `anchor`, returning the last handle.
pub(crate) fn insert_all_after(
    cfg: &mut ControlFlowGraph,
    anchor: OpId,
    ops: Vec<Operator>,
) -> Result<OpId> {
    let mut last = anchor;
    for op in ops {
        last = cfg.insert_after(last, op)?;
    }
    Ok(last)
}

/// The runtime name of a helper method, for event attribution.
pub(crate) fn helper_name(ts: &TypeSystem, method: MethodId) -> &'static str {
    ts.well_known_identity(method)
        .map_or("<method>", |wkm| wkm.name())
}
