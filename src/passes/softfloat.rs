//! Software floating point for targets without an FPU.
//!
//! Arithmetic, negation, finiteness checks, compares and conversions on `float` and
//! `double` become calls to `SoftFP_*` runtime routines selected by width. Compares are
//! normalized to a boolean first and then tested against zero, so they meet the same
//! integer branch lowering as everything else:
//!
//! ```text
//! br.lt a, b -> B1, B2          t = call SoftFP_CompareAndSet_DoubleLess(a, b)
//!                         =>    br.ne t, 0 -> B1, B2
//! ```
//!
//! Unsigned relational compares on floats are the unordered forms, true when either
//! operand is NaN. They call the routine of the complementary relation and invert the
//! boolean.
//!
//! Conversions involving 64-bit integers always use a routine, even with an FPU.

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{
        needs_helper, Alu, BuiltinType, CompareCondition, Comparison, ConditionCode,
        Expression, OpKind, Operator, SubstitutionFlags, UnaryAlu, WellKnownMethod,
    },
    passes::replace_with,
    Result,
};

/// Compare routine for `cmp`, and whether its result must be inverted.
fn compare_helper(cmp: Comparison, double: bool) -> (WellKnownMethod, bool) {
    use CompareCondition as C;
    use WellKnownMethod as W;

    let unordered = !cmp.signed && !cmp.is_equality();
    let cond = if unordered { cmp.negate().cond } else { cmp.cond };
    let helper = match (cond, double) {
        (C::Eq, false) => W::FloatEqual,
        (C::Ne, false) => W::FloatNotEqual,
        (C::Lt, false) => W::FloatLess,
        (C::Le, false) => W::FloatLessOrEqual,
        (C::Gt, false) => W::FloatGreater,
        (C::Ge, false) => W::FloatGreaterOrEqual,
        (C::Eq, true) => W::DoubleEqual,
        (C::Ne, true) => W::DoubleNotEqual,
        (C::Lt, true) => W::DoubleLess,
        (C::Le, true) => W::DoubleLessOrEqual,
        (C::Gt, true) => W::DoubleGreater,
        (C::Ge, true) => W::DoubleGreaterOrEqual,
    };
    (helper, unordered)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Class {
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

fn classify(ty: BuiltinType) -> Class {
    match ty {
        BuiltinType::Int64 => Class::Long,
        BuiltinType::UInt64 => Class::ULong,
        BuiltinType::Single => Class::Float,
        BuiltinType::Double => Class::Double,
        BuiltinType::SByte | BuiltinType::Int16 | BuiltinType::Int32 | BuiltinType::IntPtr => {
            Class::Int
        }
        _ => Class::UInt,
    }
}

fn conversion_helper(input: BuiltinType, output: BuiltinType) -> Option<WellKnownMethod> {
    use Class as K;
    use WellKnownMethod as W;

    Some(match (classify(input), classify(output)) {
        (K::Int, K::Float) => W::IntToFloat,
        (K::UInt, K::Float) => W::UnsignedIntToFloat,
        (K::Long, K::Float) => W::LongToFloat,
        (K::ULong, K::Float) => W::UnsignedLongToFloat,
        (K::Double, K::Float) => W::DoubleToFloat,
        (K::Int, K::Double) => W::IntToDouble,
        (K::UInt, K::Double) => W::UnsignedIntToDouble,
        (K::Long, K::Double) => W::LongToDouble,
        (K::ULong, K::Double) => W::UnsignedLongToDouble,
        (K::Float, K::Double) => W::FloatToDouble,
        (K::Float, K::Int) => W::FloatToInt,
        (K::Float, K::UInt) => W::FloatToUnsignedInt,
        (K::Float, K::Long) => W::FloatToLong,
        (K::Float, K::ULong) => W::FloatToUnsignedLong,
        (K::Double, K::Int) => W::DoubleToInt,
        (K::Double, K::UInt) => W::DoubleToUnsignedInt,
        (K::Double, K::Long) => W::DoubleToLong,
        (K::Double, K::ULong) => W::DoubleToUnsignedLong,
        _ => return None,
    })
}

fn is_double(ctx: &NotificationContext<'_>, expr: &Expression) -> bool {
    ctx.cfg.expression_type(expr) == BuiltinType::Double.id()
}

fn substituted(ctx: &NotificationContext<'_>, helper: WellKnownMethod) {
    ctx.event(EventKind::SoftFloatSubstituted).helper(helper.name());
}

/// Float negation and finiteness check.
///
/// # Errors
///
/// Returns a consistency error for a bitwise complement of a float.
pub fn unary(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    if !needs_helper(op, ctx.cfg, ctx.ts, ctx.target) {
        return Ok(HandlerOutcome::NoChange);
    }
    let op = op.clone();
    let (OpKind::Unary { alu, .. }, Some(src)) = (op.kind.clone(), op.args.first()) else {
        return Err(consistency_error!(id, "malformed unary operator '{}'", op));
    };

    let helper = match (alu, is_double(ctx, src)) {
        (UnaryAlu::Neg, false) => WellKnownMethod::FloatNeg,
        (UnaryAlu::Neg, true) => WellKnownMethod::DoubleNeg,
        (UnaryAlu::Finite, false) => WellKnownMethod::FloatFinite,
        (UnaryAlu::Finite, true) => WellKnownMethod::DoubleFinite,
        (UnaryAlu::Not, _) => {
            return Err(consistency_error!(id, "bitwise complement of a float in '{}'", op))
        }
    };
    let call = ctx.helper_call(helper, op.result(), op.args.clone())?;
    ctx.cfg.substitute(id, call, SubstitutionFlags::COPY_DEBUG)?;
    substituted(ctx, helper);
    Ok(HandlerOutcome::Modified)
}

/// `dst = a cmp b` on floats.
///
/// # Errors
///
/// Returns a consistency error for a compare without a result.
pub fn compare_and_set(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    if !needs_helper(op, ctx.cfg, ctx.ts, ctx.target) {
        return Ok(HandlerOutcome::NoChange);
    }
    let op = op.clone();
    let (OpKind::CompareAndSet(cmp), Some(dst), Some(left)) =
        (op.kind.clone(), op.result(), op.args.first())
    else {
        return Err(consistency_error!(id, "malformed compare '{}'", op));
    };

    let (helper, inverted) = compare_helper(cmp, is_double(ctx, left));
    if inverted {
        let boolean = BuiltinType::Boolean.id();
        let raw = ctx.cfg.allocate_temporary(boolean);
        let call = ctx.helper_call(helper, Some(raw), op.args.clone())?;
        replace_with(
            ctx.cfg,
            id,
            vec![
                call,
                Operator::binary(Alu::Xor, false, dst, raw, Expression::int(boolean, 1)),
            ],
        )?;
    } else {
        let call = ctx.helper_call(helper, Some(dst), op.args.clone())?;
        ctx.cfg.substitute(id, call, SubstitutionFlags::COPY_DEBUG)?;
    }
    substituted(ctx, helper);
    Ok(HandlerOutcome::Modified)
}

/// `br.cmp a, b` on floats, rewritten as a routine call and a test of its result.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`](crate::Error::MissingWellKnown) if the routine
/// is absent.
pub fn compare_branch(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    if !needs_helper(op, ctx.cfg, ctx.ts, ctx.target) {
        return Ok(HandlerOutcome::NoChange);
    }
    let op = op.clone();
    let (
        OpKind::CompareBranch {
            cmp,
            not_taken,
            taken,
        },
        Some(left),
    ) = (op.kind.clone(), op.args.first())
    else {
        return Err(consistency_error!(id, "malformed branch '{}'", op));
    };

    let (helper, inverted) = compare_helper(cmp, is_double(ctx, left));
    let boolean = BuiltinType::Boolean.id();
    let outcome = ctx.cfg.allocate_temporary(boolean);
    let call = ctx.helper_call(helper, Some(outcome), op.args.clone())?;
    ctx.cfg.insert_before(id, call)?;
    ctx.cfg.substitute(
        id,
        Operator::new(
            OpKind::CompareBranch {
                cmp: if inverted {
                    Comparison::eq()
                } else {
                    Comparison::ne()
                },
                not_taken,
                taken,
            },
            Vec::new(),
            vec![outcome.into(), Expression::int(boolean, 0)],
        ),
        SubstitutionFlags::COPY_DEBUG,
    )?;
    substituted(ctx, helper);
    Ok(HandlerOutcome::Modified)
}

/// A flag-setting compare on floats.
///
/// The relation comes from the single flag test that consumes the result; that test is
/// rewritten to check the routine's boolean against zero.
///
/// # Errors
///
/// Returns a consistency error if the flags are not consumed by exactly one flag test
/// that decides a relation.
pub fn compare(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    if !needs_helper(op, ctx.cfg, ctx.ts, ctx.target) {
        return Ok(HandlerOutcome::NoChange);
    }
    let op = op.clone();
    let (Some(flags), Some(left)) = (op.result(), op.args.first()) else {
        return Err(consistency_error!(id, "malformed compare '{}'", op));
    };

    let chains = ctx.cfg.dataflow();
    let Some(consumer) = chains.single_use(flags) else {
        return Err(consistency_error!(
            id,
            "float compare '{}' must feed exactly one flag test",
            op
        ));
    };
    let cond = match ctx.cfg.op(consumer)?.kind {
        OpKind::CcBranch { cond, .. } | OpKind::SetIfConditionCode(cond) => cond,
        _ => {
            return Err(consistency_error!(
                consumer,
                "unexpected consumer of float compare flags"
            ))
        }
    };
    let Some(cmp) = cond.to_comparison() else {
        return Err(consistency_error!(consumer, "flag test {} is not a relation", cond));
    };

    let (helper, inverted) = compare_helper(cmp, is_double(ctx, left));
    let boolean = BuiltinType::Boolean.id();
    let outcome = ctx.cfg.allocate_temporary(boolean);
    let call = ctx.helper_call(helper, Some(outcome), op.args.clone())?;
    replace_with(
        ctx.cfg,
        id,
        vec![
            call,
            Operator::new(
                OpKind::Compare,
                vec![flags],
                vec![outcome.into(), Expression::int(boolean, 0)],
            ),
        ],
    )?;

    let test = if inverted {
        ConditionCode::Equal
    } else {
        ConditionCode::NotEqual
    };
    match &mut ctx.cfg.op_mut(consumer)?.kind {
        OpKind::CcBranch { cond, .. } | OpKind::SetIfConditionCode(cond) => *cond = test,
        _ => {}
    }
    substituted(ctx, helper);
    Ok(HandlerOutcome::Modified)
}

/// Conversions to, from or between floats, and conversions involving 64-bit integers.
///
/// Sub-word integer operands are widened before the call and the result truncated
/// after it. Conversions between integers need no routine and become extensions.
///
/// # Errors
///
/// Returns a consistency error for a conversion no routine covers.
pub fn convert(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    if !needs_helper(op, ctx.cfg, ctx.ts, ctx.target) {
        return Ok(HandlerOutcome::NoChange);
    }
    let op = op.clone();
    let (
        OpKind::Convert {
            input,
            output,
            check_overflow,
        },
        Some(dst),
        Some(src),
    ) = (op.kind.clone(), op.result(), op.args.first().copied())
    else {
        return Err(consistency_error!(id, "malformed conversion '{}'", op));
    };

    if !input.is_floating_point() && !output.is_floating_point() {
        let resized = if input.size() < output.size() {
            let significant = input.size();
            let kind = if input.is_signed() {
                OpKind::SignExtend {
                    significant,
                    check_overflow,
                }
            } else {
                OpKind::ZeroExtend {
                    significant,
                    check_overflow,
                }
            };
            Operator::new(kind, vec![dst], vec![src])
        } else if input.size() > output.size() {
            Operator::new(
                OpKind::Truncate {
                    significant: output.size(),
                    check_overflow,
                },
                vec![dst],
                vec![src],
            )
        } else {
            Operator::assign(dst, src)
        };
        ctx.cfg.substitute(id, resized, SubstitutionFlags::COPY_DEBUG)?;
        return Ok(HandlerOutcome::Modified);
    }
    if input == output {
        ctx.cfg
            .substitute(id, Operator::assign(dst, src), SubstitutionFlags::COPY_DEBUG)?;
        return Ok(HandlerOutcome::Modified);
    }

    let helper = conversion_helper(input, output)
        .ok_or_else(|| consistency_error!(id, "no conversion routine for '{}'", op))?;
    let (params, ret) = helper.signature();
    let mut ops = Vec::with_capacity(3);

    let mut arg = src;
    if let Some(param) = params.first().filter(|p| input.size() < p.size()) {
        let widened = ctx.cfg.allocate_temporary(param.id());
        let significant = input.size();
        let kind = if input.is_signed() {
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
        ops.push(Operator::new(kind, vec![widened], vec![src]));
        arg = widened.into();
    }

    let narrow = output.size() < ret.size();
    let result = if narrow {
        ctx.cfg.allocate_temporary(ret.id())
    } else {
        dst
    };
    let flag = Expression::int(BuiltinType::Boolean.id(), i64::from(check_overflow));
    ops.push(ctx.helper_call(helper, Some(result), vec![arg, flag])?);
    if narrow {
        ops.push(Operator::new(
            OpKind::Truncate {
                significant: output.size(),
                check_overflow: false,
            },
            vec![dst],
            vec![result.into()],
        ));
    }

    replace_with(ctx.cfg, id, ops)?;
    substituted(ctx, helper);
    Ok(HandlerOutcome::Modified)
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{EventKind, EventLog, Phase},
        config::{CompilationConfig, TargetConfig},
        ir::{
            BuiltinType, CfgBuilder, CompareCondition, Comparison, ConditionCode,
            ControlFlowGraph, Expression, MethodId, OpKind, OpTag, Operator, UnaryAlu,
        },
        test::fixtures::{self, Fixture},
    };

    fn lower(fx: &Fixture, cfg: &mut ControlFlowGraph, target: &TargetConfig) -> EventLog {
        fixtures::run_phases(
            &fx.ts,
            cfg,
            target,
            &CompilationConfig::new(),
            Phase::ApplyConfiguration,
            Phase::ConvertUnsupportedOperatorsToMethodCalls,
        )
        .unwrap()
    }

    fn helpers(events: &EventLog) -> Vec<&'static str> {
        let mut names: Vec<_> = events
            .count_by_helper(EventKind::SoftFloatSubstituted)
            .into_keys()
            .collect();
        names.sort_unstable();
        names
    }

    fn branch_method(fx: &Fixture, cmp: Comparison) -> ControlFlowGraph {
        CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let a = f.argument(fx.double, "a");
                let b = f.argument(fx.double, "b");
                let (entry, yes, no) = (f.entry(), f.new_block(), f.new_block());
                f.block(entry, |blk| {
                    blk.compare_branch(cmp, a, b, yes, no);
                });
                f.block(yes, |blk| {
                    blk.ret(Expression::int(fx.int, 1));
                });
                f.block(no, |blk| {
                    blk.ret(Expression::int(fx.int, 0));
                });
            })
            .unwrap()
    }

    fn branch_test(cfg: &ControlFlowGraph) -> Option<(Comparison, Expression)> {
        cfg.operators().find_map(|(_, op)| match op.kind {
            OpKind::CompareBranch { cmp, .. } => Some((cmp, op.args[1])),
            _ => None,
        })
    }

    #[test]
    fn test_branch_tests_boolean() {
        let fx = fixtures::basic();
        let mut cfg = branch_method(&fx, Comparison::new(CompareCondition::Lt, true));

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(helpers(&events), vec!["SoftFP_CompareAndSet_DoubleLess"]);
        assert_eq!(
            branch_test(&cfg),
            Some((Comparison::ne(), Expression::int(fx.boolean, 0)))
        );
    }

    #[test]
    fn test_unordered_branch_inverts() {
        let fx = fixtures::basic();
        let mut cfg = branch_method(&fx, Comparison::new(CompareCondition::Lt, false));

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(
            helpers(&events),
            vec!["SoftFP_CompareAndSet_DoubleGreaterOrEqual"]
        );
        assert_eq!(branch_test(&cfg).map(|(cmp, _)| cmp), Some(Comparison::eq()));
    }

    #[test]
    fn test_fpu_keeps_float_operators() {
        let fx = fixtures::basic();
        let mut cfg = branch_method(&fx, Comparison::new(CompareCondition::Lt, true));

        let events = lower(&fx, &mut cfg, &TargetConfig::new().with_fpu(true));
        assert!(!events.has(EventKind::SoftFloatSubstituted));
        assert_eq!(fixtures::count(&cfg, OpTag::Call), 0);
    }

    #[test]
    fn test_flag_compare_uses_consumer_relation() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let a = f.argument(fx.float, "a");
                let b = f.argument(fx.float, "b");
                let flags = f.cfg().allocate_condition_code();
                let (entry, yes, no) = (f.entry(), f.new_block(), f.new_block());
                f.block(entry, |blk| {
                    blk.op(Operator::new(OpKind::Compare, vec![flags], vec![a.into(), b.into()]));
                    blk.op(Operator::new(
                        OpKind::CcBranch {
                            cond: ConditionCode::SignedGreater,
                            not_taken: no,
                            taken: yes,
                        },
                        Vec::new(),
                        vec![flags.into()],
                    ));
                });
                f.block(yes, |blk| {
                    blk.ret(Expression::int(fx.int, 1));
                });
                f.block(no, |blk| {
                    blk.ret(Expression::int(fx.int, 0));
                });
            })
            .unwrap();

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(helpers(&events), vec!["SoftFP_CompareAndSet_FloatGreater"]);
        let cond = cfg.operators().find_map(|(_, op)| match op.kind {
            OpKind::CcBranch { cond, .. } => Some(cond),
            _ => None,
        });
        assert_eq!(cond, Some(ConditionCode::NotEqual));
    }

    #[test]
    fn test_negation() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.float))
            .build_with(|f| {
                let a = f.argument(fx.float, "a");
                let r = f.temp(fx.float);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.op(Operator::new(
                        OpKind::Unary {
                            alu: UnaryAlu::Neg,
                            signed: true,
                        },
                        vec![r],
                        vec![a.into()],
                    ));
                    blk.ret(r);
                });
            })
            .unwrap();

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(helpers(&events), vec!["SoftFP_UnaryOperations_FloatNeg"]);
        assert_eq!(fixtures::count(&cfg, OpTag::Unary), 0);
    }

    fn convert_method(input: BuiltinType, output: BuiltinType) -> ControlFlowGraph {
        CfgBuilder::new(MethodId::new(0), Some(output.id()))
            .build_with(|f| {
                let a = f.argument(input.id(), "a");
                let r = f.temp(output.id());
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.op(Operator::new(
                        OpKind::Convert {
                            input,
                            output,
                            check_overflow: false,
                        },
                        vec![r],
                        vec![a.into()],
                    ));
                    blk.ret(r);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_conversion_passes_flag() {
        let fx = fixtures::basic();
        let mut cfg = convert_method(BuiltinType::Int32, BuiltinType::Double);

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(helpers(&events), vec!["SoftFP_Convert_IntToDouble"]);
        let args = cfg
            .operators()
            .find(|(_, op)| op.tag() == OpTag::Call)
            .map(|(_, op)| op.args.clone())
            .unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[1], Expression::int(fx.boolean, 0));
    }

    #[test]
    fn test_narrow_conversion_truncates() {
        let fx = fixtures::basic();
        let mut cfg = convert_method(BuiltinType::Single, BuiltinType::Int16);

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(helpers(&events), vec!["SoftFP_Convert_FloatToInt"]);
        assert_eq!(fixtures::count(&cfg, OpTag::Truncate), 1);
    }

    #[test]
    fn test_long_conversion_needs_routine_with_fpu() {
        let fx = fixtures::basic();
        let mut cfg = convert_method(BuiltinType::Int64, BuiltinType::Double);

        let events = lower(&fx, &mut cfg, &TargetConfig::new().with_fpu(true));
        assert_eq!(helpers(&events), vec!["SoftFP_Convert_LongToDouble"]);
    }
}
