//! Arithmetic the target cannot execute inline, replaced by runtime helper calls.
//!
//! | Operator | Condition | Helper |
//! |---|---|---|
//! | 32-bit `div`/`rem` | no hardware divider | `IntDiv`, `IntRem`, `UintDiv`, `UintRem` |
//! | 64-bit `mul`/`div`/`rem` | always | `LongMul`, `UlongDiv`, ... |
//! | 64-bit `shl`/`shr` | amount other than the constant 32 | `LongShl`, `LongShr`, `UlongShr` |
//! | float arithmetic | no FPU | `SoftFP_BinaryOperations_*` |
//!
//! A 64-bit shift by exactly 32 stays inline; scalarization turns it into word moves.

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{needs_helper, Alu, BuiltinType, OpKind, SubstitutionFlags, WellKnownMethod},
    Result,
};

/// Soft-float helper for `alu` at the given width.
fn float_helper(alu: Alu, double: bool) -> Option<WellKnownMethod> {
    use WellKnownMethod as W;

    Some(match (alu, double) {
        (Alu::Add, false) => W::FloatAdd,
        (Alu::Sub, false) => W::FloatSub,
        (Alu::Mul, false) => W::FloatMul,
        (Alu::Div, false) => W::FloatDiv,
        (Alu::Rem, false) => W::FloatRem,
        (Alu::Add, true) => W::DoubleAdd,
        (Alu::Sub, true) => W::DoubleSub,
        (Alu::Mul, true) => W::DoubleMul,
        (Alu::Div, true) => W::DoubleDiv,
        (Alu::Rem, true) => W::DoubleRem,
        _ => return None,
    })
}

/// Integer helper for `alu` at the given width and signedness.
fn integer_helper(alu: Alu, wide: bool, signed: bool) -> Option<WellKnownMethod> {
    use WellKnownMethod as W;

    Some(match (alu, wide, signed) {
        (Alu::Div, false, true) => W::IntDiv,
        (Alu::Div, false, false) => W::UintDiv,
        (Alu::Rem, false, true) => W::IntRem,
        (Alu::Rem, false, false) => W::UintRem,
        (Alu::Mul, true, true) => W::LongMul,
        (Alu::Mul, true, false) => W::UlongMul,
        (Alu::Div, true, true) => W::LongDiv,
        (Alu::Div, true, false) => W::UlongDiv,
        (Alu::Rem, true, true) => W::LongRem,
        (Alu::Rem, true, false) => W::UlongRem,
        (Alu::Shl, true, _) => W::LongShl,
        (Alu::Shr, true, true) => W::LongShr,
        (Alu::Shr, true, false) => W::UlongShr,
        _ => return None,
    })
}

/// Replaces a binary operator the target cannot execute with a helper call.
///
/// # Errors
///
/// Returns a consistency error for a float operator without a soft-float counterpart
/// (bitwise or shift on floats), and [`Error::MissingWellKnown`](crate::Error::MissingWellKnown)
/// if the helper is absent.
pub fn binary(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?;
    if !needs_helper(op, ctx.cfg, ts, ctx.target) {
        return Ok(HandlerOutcome::NoChange);
    }
    let op = op.clone();
    let OpKind::Binary { alu, signed, .. } = op.kind else {
        return Ok(HandlerOutcome::NoChange);
    };
    let Some(first) = op.args.first() else {
        return Err(consistency_error!(id, "'{}' has no operands", op));
    };
    let ty = ctx.cfg.expression_type(first);

    let (helper, event) = if ts.is_floating_point(ty) {
        let double = ty == BuiltinType::Double.id();
        let helper = float_helper(alu, double)
            .ok_or_else(|| consistency_error!(id, "no soft-float form of '{}'", op))?;
        (helper, EventKind::SoftFloatSubstituted)
    } else {
        let wide = ts.size_in_words(ty) == 2;
        let helper = integer_helper(alu, wide, signed)
            .ok_or_else(|| consistency_error!(id, "no helper for '{}'", op))?;
        (helper, EventKind::HelperSubstituted)
    };

    let call = ctx.helper_call(helper, op.result(), op.args.clone())?;
    ctx.cfg.substitute(id, call, SubstitutionFlags::COPY_DEBUG)?;
    ctx.event(event).helper(helper.name());
    Ok(HandlerOutcome::Modified)
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{EventKind, Phase},
        config::{CompilationConfig, TargetConfig},
        ir::{Alu, BuiltinType, CfgBuilder, ControlFlowGraph, Expression, MethodId, OpTag, TypeId},
        test::fixtures::{self, Fixture},
    };

    fn binary_method(fx: &Fixture, alu: Alu, ty: TypeId, amount: Option<i64>) -> ControlFlowGraph {
        CfgBuilder::new(MethodId::new(0), Some(ty))
            .build_with(|f| {
                let a = f.argument(ty, "a");
                let b = f.argument(ty, "b");
                let r = f.temp(ty);
                let entry = f.entry();
                f.block(entry, |blk| {
                    match amount {
                        Some(n) => blk.binary(alu, r, a, Expression::int(fx.int, n)),
                        None => blk.binary(alu, r, a, b),
                    };
                    blk.ret(r);
                });
            })
            .unwrap()
    }

    fn lower(fx: &Fixture, cfg: &mut ControlFlowGraph, target: &TargetConfig) -> crate::compiler::EventLog {
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

    #[test]
    fn test_division_without_divider() {
        let fx = fixtures::basic();
        let mut cfg = binary_method(&fx, Alu::Div, fx.int, None);

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(fixtures::count(&cfg, OpTag::Binary), 0);
        assert_eq!(
            events.count_by_helper(EventKind::HelperSubstituted).get("IntDiv"),
            Some(&1)
        );

        let mut hard = binary_method(&fx, Alu::Div, fx.int, None);
        lower(&fx, &mut hard, &TargetConfig::new().with_hardware_divide(true));
        assert_eq!(fixtures::count(&hard, OpTag::Binary), 1);
    }

    #[test]
    fn test_unsigned_remainder() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.uint))
            .build_with(|f| {
                let a = f.argument(fx.uint, "a");
                let b = f.argument(fx.uint, "b");
                let r = f.temp(fx.uint);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.op(crate::ir::Operator::binary(Alu::Rem, false, r, a, b));
                    blk.ret(r);
                });
            })
            .unwrap();

        let events = lower(&fx, &mut cfg, &TargetConfig::new());
        assert_eq!(
            events.count_by_helper(EventKind::HelperSubstituted).get("UintRem"),
            Some(&1)
        );
    }

    #[test]
    fn test_wide_multiply_always_calls() {
        let fx = fixtures::basic();
        let mut cfg = binary_method(&fx, Alu::Mul, fx.long, None);

        let target = TargetConfig::new().with_hardware_divide(true).with_fpu(true);
        let events = lower(&fx, &mut cfg, &target);
        assert_eq!(
            events.count_by_helper(EventKind::HelperSubstituted).get("LongMul"),
            Some(&1)
        );
    }

    #[test]
    fn test_wide_shift_by_word_stays_inline() {
        let fx = fixtures::basic();
        let mut by_word = binary_method(&fx, Alu::Shl, fx.long, Some(32));
        lower(&fx, &mut by_word, &TargetConfig::new());
        assert_eq!(fixtures::count(&by_word, OpTag::Binary), 1);

        let mut by_three = binary_method(&fx, Alu::Shl, fx.long, Some(3));
        let events = lower(&fx, &mut by_three, &TargetConfig::new());
        assert_eq!(fixtures::count(&by_three, OpTag::Binary), 0);
        assert_eq!(
            events.count_by_helper(EventKind::HelperSubstituted).get("LongShl"),
            Some(&1)
        );
    }

    #[test]
    fn test_float_add_without_fpu() {
        let fx = fixtures::basic();
        let mut soft = binary_method(&fx, Alu::Add, fx.double, None);
        let events = lower(&fx, &mut soft, &TargetConfig::new());
        assert_eq!(
            events
                .count_by_helper(EventKind::SoftFloatSubstituted)
                .get("SoftFP_BinaryOperations_DoubleAdd"),
            Some(&1)
        );

        let mut hard = binary_method(&fx, Alu::Add, fx.double, None);
        lower(&fx, &mut hard, &TargetConfig::new().with_fpu(true));
        assert_eq!(fixtures::count(&hard, OpTag::Binary), 1);
        assert_eq!(BuiltinType::Double.id(), fx.double);
    }
}
