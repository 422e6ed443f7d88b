//! Redundant check elimination.
//!
//! Runs once per scan of `RemoveRedundantChecks`, after every check has become an
//! explicit branch into a fault block. Branch facts are made visible by inserting pis,
//! then every conditional terminator whose outcome is decided is replaced by a jump to
//! the side that is always taken. The now unreachable fault blocks are left to
//! [`remove_dead_code`](super::deadcode::remove_dead_code).
//!
//! ## Decided branches
//!
//! | Terminator | Decided by |
//! |---|---|
//! | any, both targets equal | trivially |
//! | `cbr` against null | [`NullnessAnalysis`] |
//! | integer `cbr` | [`ConstraintSystem`] |
//! | `br` on a constant or reference | constant value, [`NullnessAnalysis`] |
//! | `ccbr` fed by a single `cmp` | [`ConstraintSystem`] on the compared values |
//!
//! Length loads on arrays of a statically known length are folded to constants on
//! the way.

use crate::{
    analysis::{insert_pis, remove_pis, ConstraintSystem, FixedLengths, NullnessAnalysis},
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{
        AnnotationFlags, BlockId, BlockQualifier, CompareCondition, Comparison, ControlFlowGraph,
        DataflowChains, Expression, OpId, OpKind, Operator, SubstitutionFlags, TypeSystem, VarId,
    },
    Result,
};

/// Collapses every conditional branch whose outcome is known.
///
/// # Errors
///
/// Returns a consistency error if an operator annotated as never null provably yields
/// null, or if the graph is malformed.
pub fn eliminate(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let interesting = ctx.cfg.operators().any(|(_, op)| {
        op.successors().len() > 1 || op.annotations.has(AnnotationFlags::ARRAY_LENGTH)
    });
    if !interesting {
        return Ok(HandlerOutcome::NoChange);
    }

    insert_pis(ctx.cfg)?;
    let (decisions, folds) = match analyze(ctx.cfg, ctx.ts) {
        Ok(found) => found,
        Err(e) => {
            remove_pis(ctx.cfg)?;
            return Err(e);
        }
    };

    for (id, dst, length) in &folds {
        let ty = ctx.cfg.var_type(*dst);
        let constant = Operator::assign(*dst, Expression::int(ty, i64::from(*length)));
        ctx.cfg.substitute(*id, constant, SubstitutionFlags::COPY_DEBUG)?;
        ctx.event(EventKind::OperatorRemoved)
            .message(format!("length load {id} folded to {length}"));
    }

    for (block, target) in &decisions {
        let dropped: Vec<BlockId> = ctx
            .cfg
            .successors(*block)
            .into_iter()
            .filter(|s| s != target)
            .collect();
        ctx.cfg.set_terminator(*block, Operator::jump(*target))?;
        ctx.event(EventKind::BranchCollapsed)
            .message(format!("{block} always continues to {target}"));

        for succ in dropped {
            if ctx
                .cfg
                .block(succ)
                .is_ok_and(|b| b.qualifier == BlockQualifier::Fault)
            {
                ctx.event(EventKind::CheckRemoved)
                    .message(format!("fault {succ} unreachable from {block}"));
            }
        }
    }

    remove_pis(ctx.cfg)?;
    log::debug!(
        "{}: {} branches collapsed, {} lengths folded",
        ctx.cfg.method(),
        decisions.len(),
        folds.len()
    );

    Ok(if decisions.is_empty() && folds.is_empty() {
        HandlerOutcome::NoChange
    } else {
        HandlerOutcome::Modified
    })
}

type Decisions = Vec<(BlockId, BlockId)>;
type Folds = Vec<(OpId, VarId, u32)>;

/// Decided terminators and foldable length loads, found on the graph with pis.
fn analyze(cfg: &mut ControlFlowGraph, ts: &TypeSystem) -> Result<(Decisions, Folds)> {
    let chains = cfg.dataflow();
    let cfg = &*cfg;
    let nullness = NullnessAnalysis::compute(cfg, ts)?;
    let fixed = FixedLengths::compute(cfg);
    let mut system = ConstraintSystem::new(cfg, &chains, &fixed);

    let folds = cfg
        .operators()
        .filter(|(_, op)| op.annotations.has(AnnotationFlags::ARRAY_LENGTH))
        .filter_map(|(id, op)| {
            let dst = op.result()?;
            let array = op.arg(0)?.as_var()?;
            Some((id, dst, fixed.length_of(array)?))
        })
        .collect();

    let mut decisions = Vec::new();
    for block in cfg.block_ids() {
        let Ok(term) = cfg.terminator(block) else {
            continue;
        };
        let op = cfg.op(term)?;
        let taken = match &op.kind {
            OpKind::CompareBranch {
                cmp,
                not_taken,
                taken,
            } => choose(*not_taken, *taken, || {
                compare_outcome(cfg, ts, &nullness, &mut system, *cmp, op)
            }),
            OpKind::BinaryBranch { not_taken, taken } => choose(*not_taken, *taken, || {
                let value = op.arg(0)?;
                if let Some(v) = value.int_value() {
                    return Some(v != 0);
                }
                if nullness.is_not_null(value) {
                    Some(true)
                } else if nullness.is_null(value) {
                    Some(false)
                } else {
                    None
                }
            }),
            OpKind::CcBranch {
                cond,
                not_taken,
                taken,
            } => choose(*not_taken, *taken, || {
                let flags = op.arg(0)?.as_var()?;
                let compare = flag_source(cfg, &chains, flags, term)?;
                let (l, r) = (compare.arg(0)?, compare.arg(1)?);
                system.decide(cond.to_comparison()?, l, r)
            }),
            _ => None,
        };
        if let Some(target) = taken {
            decisions.push((block, target));
        }
    }
    Ok((decisions, folds))
}

/// The target always reached, given the outcome of the branch condition.
fn choose(
    not_taken: BlockId,
    taken: BlockId,
    outcome: impl FnOnce() -> Option<bool>,
) -> Option<BlockId> {
    if not_taken == taken {
        return Some(taken);
    }
    outcome().map(|holds| if holds { taken } else { not_taken })
}

fn compare_outcome(
    cfg: &ControlFlowGraph,
    ts: &TypeSystem,
    nullness: &NullnessAnalysis,
    system: &mut ConstraintSystem,
    cmp: Comparison,
    op: &Operator,
) -> Option<bool> {
    let (l, r) = (op.arg(0)?, op.arg(1)?);
    let reference = [l, r]
        .iter()
        .any(|e| ts.can_point_to_memory(cfg.expression_type(e)));
    if !reference {
        return system.decide(cmp, l, r);
    }
    if !cmp.is_equality() {
        return None;
    }

    let value = if l.is_zero_constant() {
        r
    } else if r.is_zero_constant() {
        l
    } else {
        return None;
    };
    let is_null = if nullness.is_not_null(value) {
        false
    } else if nullness.is_null(value) {
        true
    } else {
        return None;
    };
    Some(is_null == (cmp.cond == CompareCondition::Eq))
}

/// The `cmp` producing `flags`, if it is the only writer and `user` the only reader.
fn flag_source<'a>(
    cfg: &'a ControlFlowGraph,
    chains: &DataflowChains,
    flags: VarId,
    user: OpId,
) -> Option<&'a Operator> {
    if chains.single_use(flags)? != user {
        return None;
    }
    cfg.get_op(chains.single_definition(flags)?)
        .filter(|op| matches!(op.kind, OpKind::Compare))
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{EventKind, EventLog, Phase},
        config::{CompilationConfig, TargetConfig},
        ir::{
            Alu, AnnotationFlags, BlockQualifier, CfgBuilder, CompareCondition, Comparison,
            ControlFlowGraph, Expression, MethodId, OpKind, OpTag, WellKnownField,
            WellKnownMethod,
        },
        test::fixtures::{self, Fixture},
    };

    fn optimize(fx: &Fixture, cfg: &mut ControlFlowGraph) -> EventLog {
        fixtures::run_phases(
            &fx.ts,
            cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ApplyConfiguration,
            Phase::RemoveRedundantChecks,
        )
        .unwrap()
    }

    fn fault_blocks(cfg: &ControlFlowGraph) -> usize {
        cfg.block_ids()
            .into_iter()
            .filter(|b| cfg.block(*b).is_ok_and(|blk| blk.qualifier == BlockQualifier::Fault))
            .count()
    }

    #[test]
    fn test_fresh_object_needs_no_null_check() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let s = f.temp(fx.square);
                let size = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.new_object(s, fx.square);
                    blk.load_field(size, s, fx.shape_size);
                    blk.ret(size);
                });
            })
            .unwrap();

        let events = optimize(&fx, &mut cfg);
        assert_eq!(fault_blocks(&cfg), 0);
        assert!(events.count_kind(EventKind::BranchCollapsed) >= 1);
        assert!(events.count_kind(EventKind::CheckRemoved) >= 1);
        assert_eq!(fixtures::count(&cfg, OpTag::CompareBranch), 0);
    }

    #[test]
    fn test_argument_keeps_null_check() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let s = f.argument(fx.shape, "s");
                let size = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.load_field(size, s, fx.shape_size);
                    blk.ret(size);
                });
            })
            .unwrap();

        let events = optimize(&fx, &mut cfg);
        assert_eq!(fault_blocks(&cfg), 1);
        assert!(!events.has(EventKind::BranchCollapsed));
    }

    #[test]
    fn test_fixed_length_constant_index() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let arr = f.temp(fx.int_array);
                let v = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.new_array(arr, fx.int_array, Expression::int(fx.int, 4));
                    blk.load_element(v, arr, Expression::int(fx.int, 2));
                    blk.ret(v);
                });
            })
            .unwrap();

        let events = optimize(&fx, &mut cfg);
        assert_eq!(fault_blocks(&cfg), 0);
        assert_eq!(events.count_kind(EventKind::BranchCollapsed), 2);
        let length_loads = cfg
            .operators()
            .filter(|(_, op)| op.annotations.has(AnnotationFlags::ARRAY_LENGTH))
            .count();
        assert_eq!(length_loads, 0);
    }

    #[test]
    fn test_fixed_length_index_out_of_range() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let arr = f.temp(fx.int_array);
                let v = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.new_array(arr, fx.int_array, Expression::int(fx.int, 4));
                    blk.load_element(v, arr, Expression::int(fx.int, 7));
                    blk.ret(v);
                });
            })
            .unwrap();

        optimize(&fx, &mut cfg);
        // The fault is the only way out of the bounds test now
        assert_eq!(fault_blocks(&cfg), 1);
        assert_eq!(fixtures::count(&cfg, OpTag::CompareBranch), 0);
    }

    #[test]
    fn test_counted_loop_drops_bounds_check() {
        let fx = fixtures::basic();
        let length = fx.ts.well_known_field(WellKnownField::ArrayLength).unwrap();
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let array = f.argument(fx.int_array, "a");
                let last = f.local(fx.int, "last");
                let len = f.temp(fx.int);
                let i = f.temp(fx.int);
                let next = f.temp(fx.int);
                let header = f.new_block();
                let body = f.new_block();
                let entry = f.entry();
                let exit = f.exit();
                f.block(entry, |blk| {
                    let load = blk.load_field(len, array, length);
                    blk.annotate(load, AnnotationFlags::ARRAY_LENGTH);
                    blk.jump(header);
                });
                f.block(header, |blk| {
                    blk.phi(
                        i,
                        &[
                            (entry, Expression::int(fx.int, 0)),
                            (body, Expression::Var(next)),
                        ],
                    );
                    blk.compare_branch(
                        Comparison::new(CompareCondition::Lt, true),
                        i,
                        len,
                        body,
                        exit,
                    );
                });
                f.block(body, |blk| {
                    blk.load_element(last, array, i);
                    blk.binary(Alu::Add, next, i, Expression::int(fx.int, 1));
                    blk.jump(header);
                });
            })
            .unwrap();

        let events = optimize(&fx, &mut cfg);
        // Only the null check of the argument survives
        assert_eq!(fault_blocks(&cfg), 1);
        assert_eq!(events.count_kind(EventKind::BranchCollapsed), 2);
        assert_eq!(fixtures::count(&cfg, OpTag::Pi), 0);
    }

    #[test]
    fn test_identical_targets_collapse() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let c = f.argument(fx.boolean, "c");
                let join = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.branch_if(c, join, join);
                });
                f.block(join, |blk| {
                    blk.ret(Expression::int(fx.int, 1));
                });
            })
            .unwrap();

        let events = optimize(&fx, &mut cfg);
        assert_eq!(fixtures::count(&cfg, OpTag::BinaryBranch), 0);
        assert_eq!(events.count_kind(EventKind::BranchCollapsed), 1);
    }

    #[test]
    fn test_reassigned_argument_keeps_null_check() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let s = f.argument(fx.shape, "s");
                let size = f.temp(fx.int);
                let present = f.new_block();
                let missing = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.compare_branch(
                        Comparison::ne(),
                        s,
                        Expression::null(fx.shape),
                        present,
                        missing,
                    );
                });
                f.block(present, |blk| {
                    blk.assign(s, Expression::null(fx.shape));
                    blk.load_field(size, s, fx.shape_size);
                    blk.ret(size);
                });
                f.block(missing, |blk| {
                    blk.ret(Expression::int(fx.int, 0));
                });
            })
            .unwrap();

        optimize(&fx, &mut cfg);
        let throw = fx
            .ts
            .well_known_method(WellKnownMethod::ThrowNullException)
            .unwrap();
        let throws = cfg
            .operators()
            .filter(|(_, op)| matches!(op.kind, OpKind::Call { method, .. } if method == throw))
            .count();
        assert_eq!(fault_blocks(&cfg), 1);
        assert_eq!(throws, 1);
    }
}
