//! Calling convention binding.
//!
//! Argument words go to `r0`..`r3` in order and then to consecutive stack slots; result
//! words come back in `r0`, `r1`, ... . A call may clobber `r0`..`r3` and `r12`.
//!
//! ```text
//! r = call Scale(s, n)            out[0] = ...        (stack words first)
//!                          =>     r0 = s
//!                                 r1 = n
//!                                 [r0] = bl Scale(r0, r1)   clobbers r0-r3, r12
//!                                 r = r0
//! ```
//!
//! A register argument produced by the call right before this one is assigned first,
//! straight after that call's result copies, so the value moves from the result
//! register to the argument register without waiting behind the other copies.
//!
//! Methods flagged `IMPORTED` are implemented outside the managed image and do not
//! receive `this`. The method being compiled is bound once, by [`bind_method`]; its
//! result words are moved into the result registers by the scalarization of `Return`.

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    config::TargetConfig,
    ir::{
        is_wide, BuiltinType, CallKind, CfgProperties, ControlFlowGraph, Expression, MethodFlags,
        OpId, OpKind, Operator, SubstitutionFlags, TypeSystem, VarId, VarKind,
    },
    passes::{helper_name, insert_all_after, insert_all_before, scalarize::words},
    Result,
};

/// Argument words passed in registers.
pub const ARGUMENT_REGISTERS: usize = 4;

/// Intra-procedure scratch register, clobbered by every call.
const SCRATCH_REGISTER: u8 = 12;

fn register(cfg: &mut ControlFlowGraph, n: usize) -> VarId {
    let n = u8::try_from(n).unwrap_or(u8::MAX);
    cfg.location(VarKind::Register(n), BuiltinType::UInt32.id())
}

/// The location of argument word `n`, seen by the callee when `incoming`.
fn argument_location(cfg: &mut ControlFlowGraph, n: usize, incoming: bool) -> VarId {
    if n < ARGUMENT_REGISTERS {
        return register(cfg, n);
    }
    let slot = u32::try_from(n - ARGUMENT_REGISTERS).unwrap_or(u32::MAX);
    let kind = if incoming {
        VarKind::StackIn(slot)
    } else {
        VarKind::StackOut(slot)
    };
    cfg.location(kind, BuiltinType::UInt32.id())
}

/// The registers holding `count` result words.
pub(crate) fn result_registers(cfg: &mut ControlFlowGraph, count: usize) -> Vec<VarId> {
    (0..count).map(|n| register(cfg, n)).collect()
}

/// Registers a call may overwrite.
fn clobbered(cfg: &mut ControlFlowGraph) -> Vec<VarId> {
    let mut regs = result_registers(cfg, ARGUMENT_REGISTERS);
    regs.push(cfg.location(
        VarKind::Register(SCRATCH_REGISTER),
        BuiltinType::UInt32.id(),
    ));
    regs
}

/// Number of words `Return` carries for the method compiled in `cfg`.
#[must_use]
pub fn return_words(cfg: &ControlFlowGraph, ts: &TypeSystem, target: &TargetConfig) -> usize {
    let Some(rv) = cfg.return_value() else {
        return 0;
    };
    let ty = cfg.var_type(rv);
    if is_wide(ts, target, ty) {
        ts.size_in_words(ty) as usize
    } else {
        1
    }
}

/// Copies the incoming arguments from their convention locations in the prologue.
///
/// Runs once per method; the graph is marked [`CfgProperties::CONVENTION_BOUND`].
///
/// # Errors
///
/// Returns an error if the entry block is malformed.
pub fn bind_method(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    if ctx.cfg.properties().contains(CfgProperties::CONVENTION_BOUND) {
        return Ok(HandlerOutcome::NoChange);
    }

    let mut slot = 0;
    for arg in ctx.cfg.arguments().to_vec() {
        let parts = words(ctx.cfg, ctx.ts, ctx.target, &arg.into())?;
        for part in parts {
            let Some(dst) = part.as_var() else {
                continue;
            };
            let src = argument_location(ctx.cfg, slot, true);
            ctx.cfg.append_to_prologue(Operator::assign(dst, src))?;
            slot += 1;
        }
    }
    ctx.cfg.set_property(CfgProperties::CONVENTION_BOUND);

    log::debug!("{}: {} argument words bound", ctx.cfg.method(), slot);
    Ok(HandlerOutcome::Modified)
}

/// The result variables of the subroutine call right before `id`, if any.
///
/// Walks back over the result copies `x = rN` that follow a lowered call.
fn preceding_results(cfg: &ControlFlowGraph, id: OpId) -> Vec<VarId> {
    let mut results = Vec::new();
    let mut cursor = cfg.prev_op(id);
    while let Some(prev) = cursor {
        let Some(op) = cfg.get_op(prev) else {
            break;
        };
        match op.kind {
            OpKind::Assign
                if op
                    .arg(0)
                    .and_then(Expression::as_var)
                    .is_some_and(|v| matches!(cfg.var(v).kind, VarKind::Register(_))) =>
            {
                results.extend(op.result());
                cursor = cfg.prev_op(prev);
            }
            OpKind::DirectSubroutine { .. } | OpKind::IndirectSubroutine { .. } => {
                return results;
            }
            _ => break,
        }
    }
    Vec::new()
}

/// Binds a direct or indirect call to the convention.
///
/// # Errors
///
/// Returns a consistency error for a call that is still dispatched or still carries
/// an implicit null check.
pub fn lower_call(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let OpKind::Call {
        kind,
        method,
        may_throw,
    } = op.kind
    else {
        return Ok(HandlerOutcome::NoChange);
    };
    if kind == CallKind::Virtual || may_throw {
        return Err(consistency_error!(
            id,
            "'{}' reached call lowering before dispatch and checks",
            op
        ));
    }

    let md = ctx.ts.method(method);
    let mut args = op.args.iter();
    let code = if kind == CallKind::Indirect {
        Some(
            *args
                .next()
                .ok_or_else(|| consistency_error!(id, "'{}' has no code pointer", op))?,
        )
    } else {
        None
    };
    if md.flags.contains(MethodFlags::IMPORTED) && md.is_instance() {
        args.next();
    }

    let mut arg_words = Vec::new();
    for arg in args {
        arg_words.extend(words(ctx.cfg, ctx.ts, ctx.target, arg)?);
    }
    let locations: Vec<VarId> = (0..arg_words.len())
        .map(|n| argument_location(ctx.cfg, n, false))
        .collect();

    let produced = preceding_results(ctx.cfg, id);
    let (mut hoisted, mut stack, mut regs) = (Vec::new(), Vec::new(), Vec::new());
    for (n, (loc, value)) in locations.iter().zip(&arg_words).enumerate() {
        let copy = Operator::assign(*loc, *value);
        if n >= ARGUMENT_REGISTERS {
            stack.push(copy);
        } else if value.as_var().is_some_and(|v| produced.contains(&v)) {
            hoisted.push(copy);
        } else {
            regs.push(copy);
        }
    }
    hoisted.extend(stack);
    hoisted.extend(regs);
    insert_all_before(ctx.cfg, id, hoisted)?;

    let result_words: Vec<VarId> = match op.result() {
        Some(result) => words(ctx.cfg, ctx.ts, ctx.target, &result.into())?
            .iter()
            .filter_map(Expression::as_var)
            .collect(),
        None => Vec::new(),
    };
    let results = result_registers(ctx.cfg, result_words.len());

    let mut call_args: Vec<Expression> = code.into_iter().collect();
    call_args.extend(locations.iter().copied().map(Expression::Var));
    let sub_kind = if code.is_some() {
        OpKind::IndirectSubroutine { method }
    } else {
        OpKind::DirectSubroutine { method }
    };
    let mut sub = Operator::new(sub_kind, results.clone(), call_args);
    sub.annotations = op.annotations.clone();

    let noreturn = ctx
        .cfg
        .next_op(id)
        .and_then(|next| ctx.cfg.get_op(next))
        .is_some_and(|next| matches!(next.kind, OpKind::Dead));
    if !noreturn {
        let regs = clobbered(ctx.cfg);
        sub.annotations.set_invalidation(regs);
    }
    ctx.cfg.substitute(id, sub, SubstitutionFlags::COPY_DEBUG)?;

    let copies = result_words
        .iter()
        .zip(&results)
        .map(|(dst, reg)| Operator::assign(*dst, *reg))
        .collect();
    insert_all_after(ctx.cfg, id, copies)?;

    ctx.event(EventKind::CallLowered)
        .helper(helper_name(ctx.ts, method))
        .message(format!(
            "{} argument words, {} result words",
            locations.len(),
            results.len()
        ));
    Ok(HandlerOutcome::Modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{EventLog, Phase},
        config::CompilationConfig,
        ir::{AnnotationFlags, CfgBuilder, MethodId, OpTag, TypeFlags, TypeSystemBuilder},
        test::fixtures::{self, Fixture},
    };

    fn expand(ts: &TypeSystem, cfg: &mut ControlFlowGraph) -> EventLog {
        fixtures::run_phases(
            ts,
            cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ApplyConfiguration,
            Phase::ExpandAggregateTypes,
        )
        .unwrap()
    }

    fn subroutine(cfg: &ControlFlowGraph) -> Operator {
        cfg.operators()
            .find(|(_, op)| {
                matches!(
                    op.kind,
                    OpKind::DirectSubroutine { .. } | OpKind::IndirectSubroutine { .. }
                )
            })
            .map(|(_, op)| op.clone())
            .unwrap()
    }

    fn kind_of(cfg: &ControlFlowGraph, e: &Expression) -> VarKind {
        cfg.var(e.as_var().unwrap()).kind
    }

    fn caller(fx: &Fixture, args: usize) -> ControlFlowGraph {
        CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let params: Vec<VarId> = (0..args)
                    .map(|i| f.argument(fx.long, &format!("p{i}")))
                    .collect();
                let r = f.temp(fx.long);
                let out = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.binary(crate::ir::Alu::Mul, r, params[0], params[1 % args]);
                    blk.op(Operator::new(
                        OpKind::Truncate {
                            significant: 4,
                            check_overflow: false,
                        },
                        vec![out],
                        vec![r.into()],
                    ));
                    blk.ret(out);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_helper_call_uses_registers() {
        let fx = fixtures::basic();
        let mut cfg = caller(&fx, 2);

        let events = expand(&fx.ts, &mut cfg);
        assert_eq!(fixtures::count(&cfg, OpTag::Call), 0);
        let sub = subroutine(&cfg);
        assert_eq!(sub.args.len(), 4);
        assert!(sub
            .args
            .iter()
            .all(|a| matches!(kind_of(&cfg, a), VarKind::Register(_))));
        assert_eq!(sub.results.len(), 2);
        assert!(sub.annotations.has(AnnotationFlags::POST_INVALIDATION));
        assert_eq!(sub.annotations.invalidated.len(), ARGUMENT_REGISTERS + 1);
        assert_eq!(
            events.count_by_helper(EventKind::CallLowered).get("LongMul"),
            Some(&1)
        );
    }

    #[test]
    fn test_arguments_bound_in_prologue() {
        let fx = fixtures::basic();
        let mut cfg = caller(&fx, 3);

        expand(&fx.ts, &mut cfg);
        assert!(cfg.properties().contains(CfgProperties::CONVENTION_BOUND));
        let entry = cfg.block(cfg.entry()).unwrap();
        let sources: Vec<VarKind> = entry.ops[..6]
            .iter()
            .map(|id| {
                let op = cfg.op(*id).unwrap();
                assert_eq!(op.tag(), OpTag::Assign);
                kind_of(&cfg, op.arg(0).unwrap())
            })
            .collect();
        assert_eq!(
            sources,
            vec![
                VarKind::Register(0),
                VarKind::Register(1),
                VarKind::Register(2),
                VarKind::Register(3),
                VarKind::StackIn(0),
                VarKind::StackIn(1),
            ]
        );
    }

    #[test]
    fn test_stack_arguments_placed_first() {
        let mut b = TypeSystemBuilder::new().with_runtime_support();
        let int = BuiltinType::Int32.id();
        let program = b.add_class("Program", None, TypeFlags::SEALED);
        let sum = b.add_method(
            program,
            "Sum",
            &[int, int, int, int, int],
            int,
            MethodFlags::STATIC,
        );
        let ts = b.build();

        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(int))
            .build_with(|f| {
                let r = f.temp(int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    let args: Vec<Expression> = (1..=5).map(|n| Expression::int(int, n)).collect();
                    blk.call(sum, Some(r), args);
                    blk.ret(r);
                });
            })
            .unwrap();
        expand(&ts, &mut cfg);

        let call = cfg
            .operators()
            .find(|(_, op)| op.tag() == OpTag::DirectSubroutine)
            .map(|(id, _)| id)
            .unwrap();
        let mut copies = Vec::new();
        let mut cursor = cfg.prev_op(call);
        while let Some(prev) = cursor {
            let op = cfg.op(prev).unwrap();
            let Some(dst) = op.result().filter(|_| op.tag() == OpTag::Assign) else {
                break;
            };
            if !cfg.var(dst).is_physical() {
                break;
            }
            copies.push(cfg.var(dst).kind);
            cursor = cfg.prev_op(prev);
        }
        copies.reverse();
        assert_eq!(copies.first(), Some(&VarKind::StackOut(0)));
        assert_eq!(copies.len(), 5);
    }

    #[test]
    fn test_imported_method_skips_receiver() {
        let mut b = TypeSystemBuilder::new().with_runtime_support();
        let int = BuiltinType::Int32.id();
        let device = b.add_class("Device", None, TypeFlags::SEALED);
        let read = b.add_method(device, "Read", &[int], int, MethodFlags::IMPORTED);
        let ts = b.build();

        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(int))
            .build_with(|f| {
                let dev = f.argument(device, "dev");
                let r = f.temp(int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.call(read, Some(r), vec![dev.into(), Expression::int(int, 7)]);
                    blk.ret(r);
                });
            })
            .unwrap();
        expand(&ts, &mut cfg);

        assert_eq!(subroutine(&cfg).args.len(), 1);
    }

    #[test]
    fn test_throw_helper_not_invalidating() {
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

        expand(&fx.ts, &mut cfg);
        let throw = subroutine(&cfg);
        assert!(!throw.annotations.has(AnnotationFlags::POST_INVALIDATION));
    }

    #[test]
    fn test_return_words() {
        let fx = fixtures::basic();
        let target = TargetConfig::new();
        let void = ControlFlowGraph::new(MethodId::new(0), None);
        assert_eq!(return_words(&void, &fx.ts, &target), 0);

        let int = caller(&fx, 2);
        assert_eq!(return_words(&int, &fx.ts, &target), 1);

        let double = ControlFlowGraph::new(MethodId::new(0), Some(fx.double));
        assert_eq!(return_words(&double, &fx.ts, &target), 2);
        assert_eq!(
            return_words(&double, &fx.ts, &TargetConfig::new().with_fpu(true)),
            1
        );
    }
}
