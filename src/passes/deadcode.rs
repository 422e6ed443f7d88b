//! Dead code removal and SSA destruction.
//!
//! [`remove_dead_code`] is the post-flow handler of almost every phase: rewrites leave
//! behind fault blocks nobody branches to any more, and temporaries whose only reader
//! was folded away. [`leave_ssa`] runs once scalarization is done and replaces every
//! phi by copies at the end of its predecessors.
//!
//! ## Unused definitions
//!
//! Only operators that write compiler temporaries (temporaries, pseudo-registers and
//! condition codes) and have no side effects are removed. Locals, arguments, fragments and
//! physical locations stay, since the code generator may still observe them.
//!
//! ## Phi lowering
//!
//! ```text
//! B1: br c, B3, B2          B1: br c, B4, B2
//! B2: jmp B3          =>    B4: x = 1; jmp B3
//! B3: x = phi(B1: 1,        B2: x = 2; jmp B3
//!            B2: 2)         B3: ...
//! ```
//!
//! Edges from a block with several successors are split first so the copies execute
//! only on the edge they belong to. When a block has several phis the copies go through
//! fresh temporaries, so one phi cannot overwrite a value another still reads.

use std::collections::BTreeSet;

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{BlockId, ControlFlowGraph, DataflowChains, Expression, OpId, OpKind, Operator},
    Result,
};

/// Removes unreachable blocks and unused, side-effect free temporaries.
///
/// # Errors
///
/// Returns an error if the graph is inconsistent.
pub fn remove_dead_code(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let mut changed = remove_unreachable_blocks(ctx)?;
    changed |= remove_unused_definitions(ctx)?;

    Ok(if changed {
        HandlerOutcome::Modified
    } else {
        HandlerOutcome::NoChange
    })
}

fn remove_unreachable_blocks(ctx: &mut NotificationContext<'_>) -> Result<bool> {
    let dominators = ctx.cfg.dominators();
    let (entry, exit) = (ctx.cfg.entry(), ctx.cfg.exit());
    let dead: Vec<BlockId> = ctx
        .cfg
        .block_ids()
        .into_iter()
        .filter(|b| *b != entry && *b != exit && !dominators.is_reachable(*b))
        .collect();

    for block in &dead {
        ctx.cfg.remove_block(*block)?;
        ctx.event(EventKind::BlockRemoved)
            .message(format!("unreachable {block}"));
    }
    Ok(!dead.is_empty())
}

fn remove_unused_definitions(ctx: &mut NotificationContext<'_>) -> Result<bool> {
    let mut changed = false;
    loop {
        let chains = ctx.cfg.dataflow();
        let dead: Vec<OpId> = ctx
            .cfg
            .operators()
            .filter(|(_, op)| is_unused(ctx.cfg, &chains, op))
            .map(|(id, _)| id)
            .collect();
        if dead.is_empty() {
            return Ok(changed);
        }

        for id in dead {
            ctx.cfg.delete(id)?;
            ctx.event(EventKind::OperatorRemoved)
                .message(format!("unused {id}"));
        }
        changed = true;
    }
}

fn is_unused(cfg: &ControlFlowGraph, chains: &DataflowChains, op: &Operator) -> bool {
    !op.results.is_empty()
        && !op.has_side_effects()
        && op
            .results
            .iter()
            .all(|r| cfg.var(*r).is_temporary() && chains.uses(*r).is_empty())
}

/// Replaces every phi by copies in its predecessors.
///
/// # Errors
///
/// Returns an error if a predecessor has no terminator.
pub fn leave_ssa(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let blocks: BTreeSet<BlockId> = ctx
        .cfg
        .operators()
        .filter(|(_, op)| matches!(op.kind, OpKind::Phi { .. }))
        .filter_map(|(_, op)| op.block())
        .collect();
    if blocks.is_empty() {
        return Ok(HandlerOutcome::NoChange);
    }

    for block in blocks {
        lower_phis(ctx.cfg, block)?;
    }
    Ok(HandlerOutcome::Modified)
}

fn phis_of(cfg: &ControlFlowGraph, block: BlockId) -> Result<Vec<OpId>> {
    Ok(cfg
        .block(block)?
        .ops
        .iter()
        .copied()
        .filter(|id| {
            cfg.get_op(*id)
                .is_some_and(|op| matches!(op.kind, OpKind::Phi { .. }))
        })
        .collect())
}

fn lower_phis(cfg: &mut ControlFlowGraph, block: BlockId) -> Result<()> {
    let phi_ids = phis_of(cfg, block)?;

    let mut origins = BTreeSet::new();
    for id in &phi_ids {
        if let OpKind::Phi { origins: o } = &cfg.op(*id)?.kind {
            origins.extend(o.iter().copied());
        }
    }
    for origin in origins {
        if cfg.successors(origin).len() > 1 {
            cfg.split_edge(origin, block)?;
        }
    }

    // Origins were renamed by the edge splits
    let mut incoming: Vec<(BlockId, Vec<(usize, Expression)>)> = Vec::new();
    let mut targets = Vec::with_capacity(phi_ids.len());
    for id in &phi_ids {
        let phi = cfg.op(*id)?;
        let (OpKind::Phi { origins }, Some(dst)) = (&phi.kind, phi.result()) else {
            continue;
        };
        let index = targets.len();
        targets.push(dst);
        for (origin, value) in origins.iter().zip(&phi.args) {
            match incoming.iter_mut().find(|(b, _)| b == origin) {
                Some((_, values)) => values.push((index, *value)),
                None => incoming.push((*origin, vec![(index, *value)])),
            }
        }
    }

    let staged: Vec<_> = if targets.len() > 1 {
        targets
            .iter()
            .map(|dst| Some(cfg.allocate_temporary(cfg.var_type(*dst))))
            .collect()
    } else {
        vec![None; targets.len()]
    };

    for (origin, values) in incoming {
        let term = cfg.terminator(origin)?;
        for (index, value) in &values {
            let dst = staged[*index].unwrap_or(targets[*index]);
            cfg.insert_before(term, Operator::assign(dst, *value))?;
        }
        for (index, _) in &values {
            if let Some(temp) = staged[*index] {
                cfg.insert_before(term, Operator::assign(targets[*index], temp))?;
            }
        }
    }

    for id in phi_ids {
        cfg.delete(id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{EventKind, Phase},
        config::{CompilationConfig, TargetConfig},
        ir::{Alu, CfgBuilder, Expression, MethodId, OpKind, OpTag, Operator},
        test::fixtures,
    };

    #[test]
    fn test_unreachable_block_removed() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let orphan = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.ret_void();
                });
                f.block(orphan, |blk| {
                    blk.op(Operator::dead());
                });
            })
            .unwrap();
        let before = cfg.block_count();

        let events = fixtures::run_phase(
            &fx.ts,
            &mut cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ApplyConfiguration,
        )
        .unwrap();

        assert_eq!(cfg.block_count(), before - 1);
        assert_eq!(events.count_kind(EventKind::BlockRemoved), 1);
    }

    #[test]
    fn test_unused_temporaries_removed_transitively() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let t1 = f.temp(fx.int);
                let t2 = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.binary(Alu::Add, t1, a, Expression::int(fx.int, 1));
                    blk.binary(Alu::Mul, t2, t1, t1);
                    blk.ret(a);
                });
            })
            .unwrap();

        fixtures::run_phase(
            &fx.ts,
            &mut cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ApplyConfiguration,
        )
        .unwrap();

        assert_eq!(fixtures::count(&cfg, OpTag::Binary), 0);
        assert_eq!(fixtures::count(&cfg, OpTag::Assign), 1);
    }

    #[test]
    fn test_calls_are_kept() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let b = f.argument(fx.int, "b");
                let unused = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.call(fx.div, Some(unused), vec![a.into(), b.into()]);
                    blk.ret_void();
                });
            })
            .unwrap();

        fixtures::run_phase(
            &fx.ts,
            &mut cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ApplyConfiguration,
        )
        .unwrap();
        assert_eq!(fixtures::count(&cfg, OpTag::Call), 1);
    }

    #[test]
    fn test_phi_on_critical_edge() {
        let fx = fixtures::basic();
        let mut x = None;
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let v = f.temp(fx.int);
                let other = f.new_block();
                let join = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.branch_if(a, join, other);
                });
                f.block(other, |blk| {
                    blk.jump(join);
                });
                f.block(join, |blk| {
                    blk.phi(
                        v,
                        &[
                            (entry, Expression::int(fx.int, 1)),
                            (other, Expression::int(fx.int, 2)),
                        ],
                    );
                    blk.ret(v);
                });
                x = Some(v);
            })
            .unwrap();
        let x = x.unwrap();
        let before = cfg.block_count();

        fixtures::run_phase(
            &fx.ts,
            &mut cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ExpandAggregateTypes,
        )
        .unwrap();

        assert_eq!(fixtures::count(&cfg, OpTag::Phi), 0);
        assert_eq!(cfg.block_count(), before + 1);
        let copies = cfg
            .operators()
            .filter(|(_, op)| op.kind == OpKind::Assign && op.results == vec![x])
            .count();
        assert_eq!(copies, 2);
    }

    #[test]
    fn test_phi_swap_goes_through_temporaries() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let b = f.argument(fx.int, "b");
                let x = f.temp(fx.int);
                let y = f.temp(fx.int);
                let sum = f.temp(fx.int);
                let left = f.new_block();
                let right = f.new_block();
                let join = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.branch_if(a, left, right);
                });
                f.block(left, |blk| {
                    blk.jump(join);
                });
                f.block(right, |blk| {
                    blk.jump(join);
                });
                f.block(join, |blk| {
                    blk.phi(x, &[(left, a.into()), (right, b.into())]);
                    blk.phi(y, &[(left, b.into()), (right, a.into())]);
                    blk.binary(Alu::Sub, sum, x, y);
                    blk.ret(sum);
                });
            })
            .unwrap();

        fixtures::run_phase(
            &fx.ts,
            &mut cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ExpandAggregateTypes,
        )
        .unwrap();

        assert_eq!(fixtures::count(&cfg, OpTag::Phi), 0);
        // Two staged copies and two final copies per predecessor
        let copies = cfg
            .operators()
            .filter(|(_, op)| op.kind == OpKind::Assign && op.args[0].as_const().is_none())
            .count();
        assert!(copies >= 8);
    }
}
