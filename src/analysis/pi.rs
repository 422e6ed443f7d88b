//! Pi insertion: naming the facts a conditional branch establishes.
//!
//! After `if (i < n)`, the taken successor knows `i < n` and the other one knows
//! `i >= n`. When a successor is reached only through that branch, each compared
//! variable gets a fresh name `i' = Pi(<)[i, i, n]` at the start of the successor, and
//! every use dominated by the successor reads `i'` instead. The analyses then attach the
//! relation to `i'` through its single definition. Pis are removed again before the
//! graph leaves the redundant-check phase.

use std::collections::HashSet;

use crate::{
    ir::{
        BlockId, Comparison, ControlFlowGraph, DominatorTree, Expression, OpId, OpKind, Operator,
        VarId, VarKind,
    },
    Result,
};

/// Inserts pis on every single-predecessor successor of a compare-and-branch.
///
/// Returns the number of pis inserted.
///
/// # Errors
///
/// Returns an error if the graph is malformed.
pub fn insert_pis(cfg: &mut ControlFlowGraph) -> Result<usize> {
    let chains = cfg.dataflow();
    let dominators = cfg.dominators();
    let mut inserted = 0;

    for block in cfg.reverse_postorder() {
        let Ok(term) = cfg.terminator(block) else {
            continue;
        };
        let op = cfg.op(term)?;
        let OpKind::CompareBranch {
            cmp,
            not_taken,
            taken,
        } = op.kind
        else {
            continue;
        };
        if taken == not_taken {
            continue;
        }
        let (Some(left), Some(right)) = (op.arg(0).copied(), op.arg(1).copied()) else {
            continue;
        };

        let mut compared: Vec<VarId> = Vec::new();
        for var in [left.as_var(), right.as_var()].into_iter().flatten() {
            // An argument is defined on entry, so any body assignment makes a second def.
            let defs = chains.definitions(var).len();
            let single = match cfg.var(var).kind {
                VarKind::Argument(_) => defs == 0,
                _ => defs == 1,
            };
            if single && !compared.contains(&var) {
                compared.push(var);
            }
        }
        if compared.is_empty() {
            continue;
        }

        for (succ, relation) in [(taken, cmp), (not_taken, cmp.negate())] {
            if chains.predecessors(succ) != [block] {
                continue;
            }
            inserted += place(cfg, &dominators, succ, relation, left, right, &compared)?;
        }
    }

    Ok(inserted)
}

/// Inserts one pi per compared variable at the head of `succ` and renames dominated uses.
fn place(
    cfg: &mut ControlFlowGraph,
    dominators: &DominatorTree,
    succ: BlockId,
    relation: Comparison,
    left: Expression,
    right: Expression,
    compared: &[VarId],
) -> Result<usize> {
    let Some(head) = cfg.block(succ)?.ops.first().copied() else {
        return Ok(0);
    };

    let mut renames = Vec::with_capacity(compared.len());
    let mut pis = HashSet::new();
    for var in compared {
        let fresh = cfg.allocate_temporary(cfg.var_type(*var));
        let pi = Operator::new(
            OpKind::Pi(relation),
            vec![fresh],
            vec![Expression::Var(*var), left, right],
        );
        pis.insert(cfg.insert_before(head, pi)?);
        renames.push((*var, fresh));
    }

    for block in cfg.block_ids() {
        let in_scope = dominators.dominates(succ, block);
        for op_id in cfg.block(block)?.ops.clone() {
            if pis.contains(&op_id) {
                continue;
            }
            let op = cfg.op(op_id)?;
            let edits: Vec<(usize, VarId)> = match &op.kind {
                // A phi argument is read at the end of its origin block
                OpKind::Phi { origins } => op
                    .args
                    .iter()
                    .zip(origins)
                    .enumerate()
                    .filter(|(_, (_, origin))| dominators.dominates(succ, **origin))
                    .filter_map(|(i, (arg, _))| rename_target(arg, &renames).map(|to| (i, to)))
                    .collect(),
                _ if in_scope => op
                    .args
                    .iter()
                    .enumerate()
                    .filter_map(|(i, arg)| rename_target(arg, &renames).map(|to| (i, to)))
                    .collect(),
                _ => Vec::new(),
            };
            if edits.is_empty() {
                continue;
            }
            let op = cfg.op_mut(op_id)?;
            for (index, to) in edits {
                op.args[index] = Expression::Var(to);
            }
        }
    }

    Ok(renames.len())
}

fn rename_target(arg: &Expression, renames: &[(VarId, VarId)]) -> Option<VarId> {
    let var = arg.as_var()?;
    renames
        .iter()
        .find_map(|(from, to)| (*from == var).then_some(*to))
}

/// Removes every pi, renaming its uses back to the pi's source.
///
/// Returns the number of pis removed.
///
/// # Errors
///
/// Returns an error if the graph is malformed.
pub fn remove_pis(cfg: &mut ControlFlowGraph) -> Result<usize> {
    let pis: Vec<(OpId, VarId, Expression)> = cfg
        .operators()
        .filter_map(|(id, op)| match op.kind {
            OpKind::Pi(_) => Some((id, op.result()?, *op.arg(0)?)),
            _ => None,
        })
        .collect();
    if pis.is_empty() {
        return Ok(0);
    }

    // A pi may read another pi; resolve chains to the original source
    let resolve = |mut expr: Expression| {
        while let Some(var) = expr.as_var() {
            match pis.iter().find(|(_, dst, _)| *dst == var) {
                Some((_, _, src)) => expr = *src,
                None => break,
            }
        }
        expr
    };

    let users: Vec<OpId> = cfg.ops_in_order();
    for op_id in users {
        let op = cfg.op(op_id)?;
        if matches!(op.kind, OpKind::Pi(_)) {
            continue;
        }
        let edits: Vec<(usize, Expression)> = op
            .args
            .iter()
            .enumerate()
            .filter(|(_, arg)| {
                arg.as_var()
                    .is_some_and(|v| pis.iter().any(|(_, dst, _)| *dst == v))
            })
            .map(|(i, arg)| (i, resolve(*arg)))
            .collect();
        if edits.is_empty() {
            continue;
        }
        let op = cfg.op_mut(op_id)?;
        for (index, expr) in edits {
            op.args[index] = expr;
        }
    }

    for (id, _, _) in &pis {
        cfg.delete(*id)?;
    }
    Ok(pis.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{CfgBuilder, CompareCondition, MethodId},
        test::fixtures,
    };

    fn guarded_load() -> (ControlFlowGraph, VarId) {
        let fx = fixtures::basic();
        let mut index = None;
        let cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let i = f.argument(fx.int, "i");
                let n = f.argument(fx.int, "n");
                let t = f.temp(fx.int);
                index = Some(i);
                let body = f.new_block();
                let other = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.compare_branch(
                        Comparison::new(CompareCondition::Lt, true),
                        i,
                        n,
                        body,
                        other,
                    );
                });
                f.block(body, |blk| {
                    blk.binary(crate::ir::Alu::Add, t, i, Expression::int(fx.int, 1));
                    blk.ret(t);
                });
                f.block(other, |blk| {
                    blk.ret(i);
                });
            })
            .unwrap();
        (cfg, index.unwrap())
    }

    #[test]
    fn test_insert_renames_dominated_uses() {
        let (mut cfg, i) = guarded_load();
        let inserted = insert_pis(&mut cfg).unwrap();
        // i and n on both edges
        assert_eq!(inserted, 4);

        let chains = cfg.dataflow();
        let users: Vec<_> = chains
            .uses(i)
            .iter()
            .filter_map(|u| cfg.get_op(*u))
            .map(|op| op.tag())
            .collect();
        assert!(users.iter().all(|tag| matches!(
            tag,
            crate::ir::OpTag::Pi | crate::ir::OpTag::CompareBranch
        )));
    }

    #[test]
    fn test_remove_restores_uses() {
        let (mut cfg, i) = guarded_load();
        let before = cfg.op_count();
        insert_pis(&mut cfg).unwrap();
        let removed = remove_pis(&mut cfg).unwrap();
        assert_eq!(removed, 4);
        assert_eq!(cfg.op_count(), before);

        let chains = cfg.dataflow();
        assert_eq!(chains.uses(i).len(), 3);
    }

    #[test]
    fn test_reassigned_argument_is_not_renamed() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let i = f.argument(fx.int, "i");
                let body = f.new_block();
                let other = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.compare_branch(
                        Comparison::new(CompareCondition::Lt, true),
                        i,
                        Expression::int(fx.int, 10),
                        body,
                        other,
                    );
                });
                f.block(body, |blk| {
                    blk.assign(i, Expression::int(fx.int, 100));
                    blk.ret(i);
                });
                f.block(other, |blk| {
                    blk.ret(i);
                });
            })
            .unwrap();

        assert_eq!(insert_pis(&mut cfg).unwrap(), 0);
    }
}
