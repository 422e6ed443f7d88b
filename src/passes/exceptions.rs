//! Check operators into explicit branches to fault blocks.
//!
//! Every check splits its block at the checked point. The head ends in a conditional
//! branch, the tail continues with the original code, and a fresh fault block calls the
//! matching runtime routine and ends in `Dead`:
//!
//! ```text
//! B0: a; NullCheck x; b            B0: a; br.ne x, null -> B2, B3
//!                          =>      B2: b
//!                                  B3: call ThrowNullException(); dead
//! ```
//!
//! | Check | Condition to continue | Fault routine |
//! |---|---|---|
//! | `NullCheck x` | `x != null` | `ThrowNullException` |
//! | `BoundsCheck a, i` | `i <u a.Length` | `ThrowIndexOutOfRangeException` |
//! | `OverflowCheck cc` | flag clear | `ThrowOverflowException` |
//!
//! Null checks on `this`, on managed pointers, or in methods compiled with null checks
//! off are deleted instead; the same holds for bounds checks with bounds checks off.
//!
//! Overflow-checked arithmetic is rewritten here too, so that every check it needs ends
//! up as one of the forms above.

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{
        Alu, BlockId, BlockQualifier, BuiltinType, Carry, CompareCondition, Comparison,
        ConditionCode, ConstValue, Constant, Expression, OpId, OpKind, Operator,
        SubstitutionFlags, WellKnownField, WellKnownMethod, AnnotationFlags, WORD_SIZE,
    },
    passes::replace_with,
    Error, Result,
};

/// Splits the block before `at` and branches to the tail or a new fault block.
///
/// `branch` receives `(tail, fault)` and builds the terminator of the head block.
fn guard(
    ctx: &mut NotificationContext<'_>,
    at: OpId,
    routine: WellKnownMethod,
    branch: impl FnOnce(BlockId, BlockId) -> Operator,
) -> Result<()> {
    let Some(head) = ctx.cfg.op(at)?.block() else {
        return Err(consistency_error!(at, "operator {} is detached", at));
    };
    let throw = ctx.helper_call(routine, None, Vec::new())?;

    let tail = ctx.cfg.split_at(at)?;
    let fault = ctx.cfg.add_block(BlockQualifier::Fault);
    ctx.cfg.append(fault, throw)?;
    ctx.cfg.append(fault, Operator::dead())?;
    ctx.cfg.set_terminator(head, branch(tail, fault))?;

    ctx.event(EventKind::BlockSplit)
        .message(format!("{head} split at {at}, fault block {fault}"));
    ctx.event(EventKind::CheckMaterialized).helper(routine.name());
    Ok(())
}

/// Faults with an overflow unless `value >= 0` as a signed number.
fn guard_non_negative(ctx: &mut NotificationContext<'_>, at: OpId, value: Expression) -> Result<()> {
    let zero = Expression::int(ctx.cfg.expression_type(&value), 0);
    guard(ctx, at, WellKnownMethod::ThrowOverflowException, |tail, fault| {
        Operator::new(
            OpKind::CompareBranch {
                cmp: Comparison::new(CompareCondition::Ge, true),
                not_taken: fault,
                taken: tail,
            },
            Vec::new(),
            vec![value, zero],
        )
    })
}

fn clear_overflow_check(kind: &mut OpKind) {
    match kind {
        OpKind::Binary { check_overflow, .. }
        | OpKind::SignExtend { check_overflow, .. }
        | OpKind::ZeroExtend { check_overflow, .. }
        | OpKind::Truncate { check_overflow, .. }
        | OpKind::Convert { check_overflow, .. } => *check_overflow = false,
        _ => {}
    }
}

fn removed(ctx: &mut NotificationContext<'_>, id: OpId, why: &str) -> Result<HandlerOutcome> {
    ctx.cfg.delete(id)?;
    ctx.event(EventKind::CheckRemoved).message(why.to_string());
    Ok(HandlerOutcome::Modified)
}

/// Turns a null check into a branch, or deletes it when the value cannot be null or
/// checks are disabled.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime has no null fault routine.
pub fn null_check(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let Some(object) = op.args.first().copied() else {
        return Err(consistency_error!(id, "'{}' has no operand", op));
    };

    if ctx.constraints.null_checks_off() {
        return removed(ctx, id, "null checks disabled");
    }
    let is_this = ts
        .get_method(ctx.cfg.method())
        .is_some_and(|md| md.is_instance())
        && ctx.cfg.arguments().first().copied().map(Expression::Var) == Some(object);
    if is_this {
        return removed(ctx, id, "receiver of an instance method");
    }
    let object_ty = ctx.cfg.expression_type(&object);
    if ts.is_managed_pointer(object_ty) {
        return removed(ctx, id, "managed pointer");
    }

    guard(ctx, id, WellKnownMethod::ThrowNullException, |tail, fault| {
        Operator::new(
            OpKind::CompareBranch {
                cmp: Comparison::ne(),
                not_taken: fault,
                taken: tail,
            },
            Vec::new(),
            vec![object, Expression::null(object_ty)],
        )
    })?;
    ctx.cfg.delete(id)?;
    Ok(HandlerOutcome::Modified)
}

/// Turns a bounds check into a load of the array length and an unsigned compare.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime has no index fault routine or
/// no array length field.
pub fn bounds_check(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let (Some(array), Some(index)) = (op.args.first().copied(), op.args.get(1).copied()) else {
        return Err(consistency_error!(id, "'{}' needs an array and an index", op));
    };

    if ctx.constraints.bounds_checks_off() {
        return removed(ctx, id, "bounds checks disabled");
    }

    let field = ts.well_known_field(WellKnownField::ArrayLength)?;
    let length = ctx.cfg.allocate_temporary(ts.field(field).ty);
    let mut load = Operator::new(
        OpKind::LoadField {
            field,
            may_throw: false,
        },
        vec![length],
        vec![array],
    );
    load.annotations.add(AnnotationFlags::ARRAY_LENGTH);
    ctx.cfg.insert_before(id, load)?;

    guard(
        ctx,
        id,
        WellKnownMethod::ThrowIndexOutOfRangeException,
        |tail, fault| {
            Operator::new(
                OpKind::CompareBranch {
                    cmp: Comparison::new(CompareCondition::Lt, false),
                    not_taken: fault,
                    taken: tail,
                },
                Vec::new(),
                vec![index, length.into()],
            )
        },
    )?;
    ctx.cfg.delete(id)?;
    Ok(HandlerOutcome::Modified)
}

/// Turns an overflow check into a flag branch.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime has no overflow fault routine.
pub fn overflow_check(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let (OpKind::OverflowCheck(cond), Some(flags)) = (op.kind.clone(), op.args.first().copied()) else {
        return Err(consistency_error!(id, "malformed overflow check '{}'", op));
    };

    guard(ctx, id, WellKnownMethod::ThrowOverflowException, |tail, fault| {
        Operator::new(
            OpKind::CcBranch {
                cond,
                not_taken: tail,
                taken: fault,
            },
            Vec::new(),
            vec![flags],
        )
    })?;
    ctx.cfg.delete(id)?;
    Ok(HandlerOutcome::Modified)
}

/// Rewrites overflow-checked add, subtract and multiply.
///
/// Add and subtract produce their flags and test them; a 32-bit multiply computes the
/// full 64-bit product and truncates it with a check.
///
/// # Errors
///
/// Returns [`Error::FeatureNotSupported`] for a checked 64-bit multiply.
pub fn checked_binary(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let OpKind::Binary {
        alu,
        signed,
        check_overflow: true,
        carry,
    } = op.kind
    else {
        return Ok(HandlerOutcome::NoChange);
    };
    let (Some(dst), [left, right]) = (op.result(), op.args.as_slice()) else {
        return Err(consistency_error!(id, "malformed checked operator '{}'", op));
    };
    let float = op
        .args
        .iter()
        .any(|a| ts.is_floating_point(ctx.cfg.expression_type(a)));

    match alu {
        Alu::Add | Alu::Sub if !float && carry == Carry::None => {
            let cond = match (alu, signed) {
                (_, true) => ConditionCode::Overflow,
                (Alu::Add, false) => ConditionCode::CarrySet,
                _ => ConditionCode::CarryClear,
            };
            let flags = ctx.cfg.allocate_condition_code();
            let current = ctx.cfg.op_mut(id)?;
            current.kind = OpKind::Binary {
                alu,
                signed,
                check_overflow: false,
                carry: Carry::Out,
            };
            current.results.push(flags);
            ctx.cfg.insert_after(
                id,
                Operator::new(OpKind::OverflowCheck(cond), Vec::new(), vec![flags.into()]),
            )?;
        }
        Alu::Mul if !float => {
            if ts.size_in_words(ctx.cfg.var_type(dst)) > 1 {
                return Err(Error::FeatureNotSupported(format!(
                    "overflow-checked 64-bit multiply '{op}'"
                )));
            }
            let wide = if signed {
                BuiltinType::Int64
            } else {
                BuiltinType::UInt64
            };
            let product = ctx.cfg.allocate_temporary(wide.id());
            replace_with(
                ctx.cfg,
                id,
                vec![
                    Operator::new(
                        OpKind::LongBinary {
                            alu: Alu::Mul,
                            signed,
                        },
                        vec![product],
                        vec![*left, *right],
                    ),
                    Operator::new(
                        OpKind::Truncate {
                            significant: WORD_SIZE,
                            check_overflow: true,
                        },
                        vec![dst],
                        vec![product.into()],
                    ),
                ],
            )?;
        }
        _ => clear_overflow_check(&mut ctx.cfg.op_mut(id)?.kind),
    }
    Ok(HandlerOutcome::Modified)
}

/// Rewrites sign/zero extension and truncation.
///
/// An extension between equal sizes that keeps every byte is a copy. A checked
/// narrowing truncates, widens the result back and faults when the round trip differs;
/// a checked change of signedness also faults on negative sources.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime has no overflow fault routine.
pub fn checked_extension(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let (significant, check) = match op.kind {
        OpKind::SignExtend {
            significant,
            check_overflow,
        }
        | OpKind::ZeroExtend {
            significant,
            check_overflow,
        }
        | OpKind::Truncate {
            significant,
            check_overflow,
        } => (significant, check_overflow),
        _ => return Ok(HandlerOutcome::NoChange),
    };
    let (Some(dst), Some(src)) = (op.result(), op.args.first().copied()) else {
        return Err(consistency_error!(id, "malformed extension '{}'", op));
    };

    let src_ty = ctx.cfg.expression_type(&src);
    let dst_ty = ctx.cfg.var_type(dst);
    let (src_size, dst_size) = (ts.size_in_bytes(src_ty), ts.size_in_bytes(dst_ty));
    let sign_change = ts.is_signed(src_ty) != ts.is_signed(dst_ty);

    if src_size == dst_size && significant >= dst_size {
        if check && sign_change {
            guard_non_negative(ctx, id, src)?;
        }
        ctx.cfg
            .substitute(id, Operator::assign(dst, src), SubstitutionFlags::COPY_DEBUG)?;
        return Ok(HandlerOutcome::Modified);
    }
    if !check {
        return Ok(HandlerOutcome::NoChange);
    }

    if sign_change && (dst_size < src_size || ts.is_signed(src_ty)) {
        guard_non_negative(ctx, id, src)?;
    }
    clear_overflow_check(&mut ctx.cfg.op_mut(id)?.kind);

    if dst_size < src_size {
        let widened = ctx.cfg.allocate_temporary(src_ty);
        let widen = if ts.is_signed(dst_ty) {
            OpKind::SignExtend {
                significant,
                check_overflow: false,
            }
        } else {
            OpKind::ZeroExtend {
                significant,
                check_overflow: false,
            }
        };
        let widen = ctx
            .cfg
            .insert_after(id, Operator::new(widen, vec![widened], vec![dst.into()]))?;
        let Some(next) = ctx.cfg.next_op(widen) else {
            return Err(consistency_error!(widen, "block ends without a terminator"));
        };
        guard(ctx, next, WellKnownMethod::ThrowOverflowException, |tail, fault| {
            Operator::new(
                OpKind::CompareBranch {
                    cmp: Comparison::eq(),
                    not_taken: fault,
                    taken: tail,
                },
                Vec::new(),
                vec![widened.into(), src],
            )
        })?;
    }
    Ok(HandlerOutcome::Modified)
}

/// Integer range `[min, max + 1)` of a conversion target, as floats.
fn integer_range(output: BuiltinType) -> Option<(f64, f64)> {
    use BuiltinType as B;

    if !matches!(
        output,
        B::SByte
            | B::Byte
            | B::Char
            | B::Int16
            | B::UInt16
            | B::Int32
            | B::UInt32
            | B::Int64
            | B::UInt64
            | B::IntPtr
            | B::UIntPtr
    ) {
        return None;
    }
    let span = 2f64.powf(f64::from(output.size() * 8));
    Some(if output.is_signed() {
        (-span / 2.0, span / 2.0)
    } else {
        (0.0, span)
    })
}

fn float_constant(ty: BuiltinType, value: f64) -> Expression {
    #[allow(clippy::cast_possible_truncation)]
    let value = match ty {
        BuiltinType::Single => ConstValue::Float32((value as f32).to_bits()),
        _ => ConstValue::Float64(value.to_bits()),
    };
    Expression::Const(Constant { ty: ty.id(), value })
}

/// Guards a checked float to integer conversion with a range test.
///
/// `min <= src < max + 1` is computed as two float compares; NaN fails both. Other
/// checked conversions cannot overflow and lose the flag.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime has no overflow fault routine.
pub fn checked_conversion(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let OpKind::Convert {
        input,
        output,
        check_overflow: true,
    } = op.kind
    else {
        return Ok(HandlerOutcome::NoChange);
    };
    let Some(src) = op.args.first().copied() else {
        return Err(consistency_error!(id, "conversion '{}' has no operand", op));
    };

    if let (true, Some((min, limit))) = (input.is_floating_point(), integer_range(output)) {
        let boolean = BuiltinType::Boolean.id();
        let above = ctx.cfg.allocate_temporary(boolean);
        let below = ctx.cfg.allocate_temporary(boolean);
        let in_range = ctx.cfg.allocate_temporary(boolean);
        let test = [
            Operator::new(
                OpKind::CompareAndSet(Comparison::new(CompareCondition::Ge, true)),
                vec![above],
                vec![src, float_constant(input, min)],
            ),
            Operator::new(
                OpKind::CompareAndSet(Comparison::new(CompareCondition::Lt, true)),
                vec![below],
                vec![src, float_constant(input, limit)],
            ),
            Operator::binary(Alu::And, false, in_range, above, below),
        ];
        for step in test {
            ctx.cfg.insert_before(id, step)?;
        }
        guard(ctx, id, WellKnownMethod::ThrowOverflowException, |tail, fault| {
            Operator::new(
                OpKind::BinaryBranch {
                    not_taken: fault,
                    taken: tail,
                },
                Vec::new(),
                vec![in_range.into()],
            )
        })?;
    }

    clear_overflow_check(&mut ctx.cfg.op_mut(id)?.kind);
    Ok(HandlerOutcome::Modified)
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{EventKind, EventLog, Phase},
        config::{CompilationConfig, CompilationConstraints, TargetConfig},
        ir::{
            Alu, AnnotationFlags, BlockQualifier, BuiltinType, CfgBuilder, ConditionCode,
            ControlFlowGraph, Expression, MethodId, OpKind, OpTag, Operator,
        },
        test::fixtures::{self, Fixture},
    };

    fn lower(fx: &Fixture, cfg: &mut ControlFlowGraph, config: &CompilationConfig) -> EventLog {
        fixtures::run_phases(
            &fx.ts,
            cfg,
            &TargetConfig::new(),
            config,
            Phase::ApplyConfiguration,
            Phase::FromImplicitToExplicitExceptions,
        )
        .unwrap()
    }

    fn fault_blocks(cfg: &ControlFlowGraph) -> usize {
        cfg.block_ids()
            .into_iter()
            .filter(|b| cfg.block(*b).is_ok_and(|blk| blk.qualifier == BlockQualifier::Fault))
            .count()
    }

    fn field_reader(fx: &Fixture) -> ControlFlowGraph {
        CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let s = f.argument(fx.shape, "s");
                let size = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.load_field(size, s, fx.shape_size);
                    blk.ret(size);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_null_check_becomes_branch() {
        let fx = fixtures::basic();
        let mut cfg = field_reader(&fx);

        let events = lower(&fx, &mut cfg, &CompilationConfig::new());
        assert_eq!(fixtures::count(&cfg, OpTag::NullCheck), 0);
        assert_eq!(fixtures::count(&cfg, OpTag::CompareBranch), 1);
        assert_eq!(fixtures::count(&cfg, OpTag::Dead), 1);
        assert_eq!(fault_blocks(&cfg), 1);
        assert_eq!(
            events
                .count_by_helper(EventKind::CheckMaterialized)
                .get("ThrowNullException"),
            Some(&1)
        );
    }

    #[test]
    fn test_receiver_check_removed() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::for_method(&fx.ts, fx.scale)
            .build_with(|f| {
                let this = f.arg(0);
                let size = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.load_field(size, this, fx.shape_size);
                    blk.ret(size);
                });
            })
            .unwrap();

        let events = lower(&fx, &mut cfg, &CompilationConfig::new());
        assert_eq!(fixtures::count(&cfg, OpTag::CompareBranch), 0);
        assert_eq!(fault_blocks(&cfg), 0);
        assert_eq!(events.count_kind(EventKind::CheckRemoved), 1);
    }

    #[test]
    fn test_null_checks_off() {
        let fx = fixtures::basic();
        let mut cfg = field_reader(&fx);
        let config =
            CompilationConfig::new().with_default(CompilationConstraints::NULL_CHECKS_OFF_DEEP);

        lower(&fx, &mut cfg, &config);
        assert_eq!(fault_blocks(&cfg), 0);
        assert_eq!(fixtures::count(&cfg, OpTag::LoadField), 1);
    }

    fn element_reader(fx: &Fixture) -> ControlFlowGraph {
        CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let arr = f.argument(fx.int_array, "arr");
                let i = f.argument(fx.int, "i");
                let v = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.load_element(v, arr, i);
                    blk.ret(v);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_bounds_check_loads_length() {
        let fx = fixtures::basic();
        let mut cfg = element_reader(&fx);

        lower(&fx, &mut cfg, &CompilationConfig::new());
        assert_eq!(fault_blocks(&cfg), 2);
        assert_eq!(fixtures::count(&cfg, OpTag::CompareBranch), 2);
        let length_loads = cfg
            .operators()
            .filter(|(_, op)| op.annotations.has(AnnotationFlags::ARRAY_LENGTH))
            .count();
        assert_eq!(length_loads, 1);
    }

    #[test]
    fn test_bounds_checks_off_keeps_null_check() {
        let fx = fixtures::basic();
        let mut cfg = element_reader(&fx);
        let config =
            CompilationConfig::new().with_default(CompilationConstraints::BOUNDS_CHECKS_OFF);

        let events = lower(&fx, &mut cfg, &config);
        assert_eq!(fault_blocks(&cfg), 1);
        assert_eq!(events.count_kind(EventKind::CheckRemoved), 1);
    }

    #[test]
    fn test_checked_add_tests_overflow_flag() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let b = f.argument(fx.int, "b");
                let sum = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.checked_binary(Alu::Add, sum, a, b);
                    blk.ret(sum);
                });
            })
            .unwrap();

        lower(&fx, &mut cfg, &CompilationConfig::new());
        let branch = cfg
            .operators()
            .find_map(|(_, op)| match op.kind {
                OpKind::CcBranch { cond, .. } => Some(cond),
                _ => None,
            });
        assert_eq!(branch, Some(ConditionCode::Overflow));
        let add = cfg
            .operators()
            .find(|(_, op)| op.tag() == OpTag::Binary)
            .map(|(_, op)| op.results.len());
        assert_eq!(add, Some(2));
        assert_eq!(fault_blocks(&cfg), 1);
    }

    #[test]
    fn test_checked_multiply_widens_and_compares() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let b = f.argument(fx.int, "b");
                let product = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.checked_binary(Alu::Mul, product, a, b);
                    blk.ret(product);
                });
            })
            .unwrap();

        lower(&fx, &mut cfg, &CompilationConfig::new());
        assert_eq!(fixtures::count(&cfg, OpTag::LongBinary), 1);
        assert_eq!(fixtures::count(&cfg, OpTag::Truncate), 1);
        assert_eq!(fixtures::count(&cfg, OpTag::SignExtend), 1);
        assert_eq!(fixtures::count(&cfg, OpTag::CompareBranch), 1);
        assert!(cfg.operators().all(|(_, op)| !matches!(
            op.kind,
            OpKind::Truncate {
                check_overflow: true,
                ..
            }
        )));
    }

    #[test]
    fn test_checked_narrowing_round_trip() {
        let fx = fixtures::basic();
        let sbyte = BuiltinType::SByte.id();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(sbyte))
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let narrow = f.temp(sbyte);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.op(Operator::new(
                        OpKind::Truncate {
                            significant: 1,
                            check_overflow: true,
                        },
                        vec![narrow],
                        vec![a.into()],
                    ));
                    blk.ret(narrow);
                });
            })
            .unwrap();

        lower(&fx, &mut cfg, &CompilationConfig::new());
        assert_eq!(fault_blocks(&cfg), 1);
        assert_eq!(fixtures::count(&cfg, OpTag::SignExtend), 1);
    }

    #[test]
    fn test_checked_sign_change_is_guarded_copy() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.uint))
            .build_with(|f| {
                let a = f.argument(fx.int, "a");
                let u = f.temp(fx.uint);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.op(Operator::new(
                        OpKind::ZeroExtend {
                            significant: 4,
                            check_overflow: true,
                        },
                        vec![u],
                        vec![a.into()],
                    ));
                    blk.ret(u);
                });
            })
            .unwrap();

        lower(&fx, &mut cfg, &CompilationConfig::new());
        assert_eq!(fixtures::count(&cfg, OpTag::ZeroExtend), 0);
        assert_eq!(fault_blocks(&cfg), 1);
        let guard = cfg.operators().find_map(|(_, op)| match &op.kind {
            OpKind::CompareBranch { cmp, .. } => Some((*cmp, op.args[1])),
            _ => None,
        });
        let (cmp, zero) = guard.unwrap();
        assert!(cmp.signed);
        assert_eq!(zero, Expression::int(fx.int, 0));
    }

    #[test]
    fn test_checked_float_conversion_keeps_range_test() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let d = f.argument(fx.double, "d");
                let i = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.op(Operator::new(
                        OpKind::Convert {
                            input: BuiltinType::Double,
                            output: BuiltinType::Int32,
                            check_overflow: true,
                        },
                        vec![i],
                        vec![d.into()],
                    ));
                    blk.ret(i);
                });
            })
            .unwrap();

        lower(&fx, &mut cfg, &CompilationConfig::new());
        assert_eq!(fixtures::count(&cfg, OpTag::CompareAndSet), 2);
        assert_eq!(fixtures::count(&cfg, OpTag::BinaryBranch), 1);
        assert_eq!(fault_blocks(&cfg), 1);
        let limit = cfg.operators().find_map(|(_, op)| match op.kind {
            OpKind::CompareAndSet(cmp) if cmp.cond == crate::ir::CompareCondition::Lt => {
                op.args[1].as_const().map(|c| c.value)
            }
            _ => None,
        });
        assert_eq!(
            limit,
            Some(crate::ir::ConstValue::Float64(2_147_483_648f64.to_bits()))
        );
    }
}
