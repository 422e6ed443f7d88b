//! Final verification of the canonical low-level form.
//!
//! The code generator accepts only word-sized, convention-bound operators without
//! implicit faults. Anything else reaching `Finalize` means a rewrite is missing or a
//! handler left its pattern behind, and is reported instead of being emitted.

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{has_wide_operand, needs_helper, OpId, OpKind, Operator},
    passes::calls::convention::return_words,
    Result,
};

/// Why `op` is not in the canonical form, if it is not.
fn violation(ctx: &NotificationContext<'_>, op: &Operator) -> Option<&'static str> {
    if op.kind.may_throw() {
        return Some("still carries an implicit fault");
    }
    match &op.kind {
        OpKind::NullCheck | OpKind::BoundsCheck | OpKind::OverflowCheck(_) => {
            return Some("is an unlowered check")
        }
        OpKind::Binary { check_overflow, .. }
        | OpKind::SignExtend { check_overflow, .. }
        | OpKind::ZeroExtend { check_overflow, .. }
        | OpKind::Truncate { check_overflow, .. }
        | OpKind::Convert { check_overflow, .. }
            if *check_overflow =>
        {
            return Some("still checks for overflow")
        }
        OpKind::Call { .. } => return Some("is a call not bound to the convention"),
        OpKind::NewObject { .. }
        | OpKind::NewArray { .. }
        | OpKind::CastClass { .. }
        | OpKind::IsInstance { .. } => return Some("is an object model operator"),
        OpKind::LoadField { .. }
        | OpKind::StoreField { .. }
        | OpKind::LoadFieldAddress { .. }
        | OpKind::LoadElement { .. }
        | OpKind::StoreElement { .. }
        | OpKind::LoadElementAddress { .. } => return Some("is a field or element operator"),
        OpKind::Phi { .. } | OpKind::Pi(_) => return Some("is an SSA operator"),
        _ => {}
    }
    if needs_helper(op, ctx.cfg, ctx.ts, ctx.target) {
        return Some("needs a runtime helper");
    }
    if has_wide_operand(op, ctx.cfg, ctx.ts, ctx.target) {
        return Some("has a multi-word operand");
    }
    None
}

fn check_return(ctx: &NotificationContext<'_>, id: OpId, op: &Operator) -> Result<()> {
    let expected = return_words(ctx.cfg, ctx.ts, ctx.target);
    if op.args.len() != expected {
        return Err(consistency_error!(
            id,
            "'{}' returns {} words, the method returns {}",
            op,
            op.args.len(),
            expected
        ));
    }
    if let Some(arg) = op
        .args
        .iter()
        .find(|a| !a.as_var().is_some_and(|v| ctx.cfg.var(v).is_physical()))
    {
        return Err(consistency_error!(
            id,
            "'{}' returns {}, which is not a result register",
            op,
            arg
        ));
    }
    Ok(())
}

/// Rejects the graph unless every operator is in the canonical low-level form.
///
/// # Errors
///
/// Returns a consistency error naming the first offending operator.
pub fn verify(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    for (id, op) in ctx.cfg.operators() {
        if let Some(reason) = violation(ctx, op) {
            log::error!("{}: '{}' {}", ctx.ts.method(ctx.method()).name, op, reason);
            ctx.event(EventKind::Error).message(format!("'{op}' {reason}"));
            return Err(consistency_error!(id, "'{}' {} after lowering", op, reason));
        }
        if matches!(op.kind, OpKind::Return) {
            check_return(ctx, id, op)?;
        }
    }
    Ok(HandlerOutcome::NoChange)
}
