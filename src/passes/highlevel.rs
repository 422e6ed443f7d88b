//! Object model lowering: from implicit semantics to mid-level operators.
//!
//! This phase removes everything that only makes sense in terms of the managed object
//! model. Afterwards no operator faults implicitly, nothing is allocated or type-tested
//! except through runtime calls, and every call is either bound or goes through a code
//! pointer.
//!
//! ## Implicit checks
//!
//! A field, element or indirect access that may fault gets an explicit [`NullCheck`]
//! (and for elements a [`BoundsCheck`]) in front of it; the access itself then loses its
//! fault flag. Turning the checks into branches is left to
//! [`exceptions`](crate::passes::exceptions), so that the checks can still be suppressed
//! by policy there.
//!
//! ## Calls
//!
//! A call with a pending receiver check gets a [`NullCheck`] on `this`. A dispatched call
//! is bound statically when [`devirtualize::resolve`] finds a unique target, and lowered
//! to table dispatch otherwise.
//!
//! [`NullCheck`]: crate::ir::OpKind::NullCheck
//! [`BoundsCheck`]: crate::ir::OpKind::BoundsCheck

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{
        AnnotationFlags, CallKind, OpKind, OpTag, Operator, SubstitutionFlags, WellKnownMethod,
    },
    passes::{
        calls::dispatch,
        devirtualize::{self, Resolution},
        insert_all_before,
    },
    Result,
};

/// Makes the pending null and bounds checks of a memory access explicit.
///
/// # Errors
///
/// Returns a consistency error if the access has no object operand.
pub fn make_checks_explicit(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    if !op.kind.may_throw() {
        return Ok(HandlerOutcome::NoChange);
    }

    let Some(object) = op.args.first().copied() else {
        return Err(consistency_error!(id, "'{}' has no object operand", op));
    };
    let object_ty = ctx.cfg.expression_type(&object);

    let mut checks = Vec::with_capacity(2);
    if ts.can_point_to_memory(object_ty) && !ts.is_managed_pointer(object_ty) {
        checks.push(Operator::new(OpKind::NullCheck, Vec::new(), vec![object]));
    }
    if matches!(
        op.tag(),
        OpTag::LoadElement | OpTag::StoreElement | OpTag::LoadElementAddress
    ) {
        let Some(index) = op.args.get(1).copied() else {
            return Err(consistency_error!(id, "'{}' has no index operand", op));
        };
        checks.push(Operator::new(
            OpKind::BoundsCheck,
            Vec::new(),
            vec![object, index],
        ));
    }

    insert_all_before(ctx.cfg, id, checks)?;
    ctx.cfg.op_mut(id)?.kind.clear_may_throw();
    Ok(HandlerOutcome::Modified)
}

/// Checks the receiver of a call and binds or lowers dispatched calls.
///
/// # Errors
///
/// Returns an error if a dispatched call has no receiver or its table dispatch cannot
/// be built.
pub fn lower_call(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let OpKind::Call {
        kind,
        method,
        may_throw,
    } = op.kind
    else {
        return Ok(HandlerOutcome::NoChange);
    };
    if !may_throw && kind != CallKind::Virtual {
        return Ok(HandlerOutcome::NoChange);
    }

    if may_throw {
        let receiver = if kind == CallKind::Indirect { 1 } else { 0 };
        if let Some(this) = op.args.get(receiver).copied() {
            ctx.cfg
                .insert_before(id, Operator::new(OpKind::NullCheck, Vec::new(), vec![this]))?;
        }
        ctx.cfg.op_mut(id)?.kind.clear_may_throw();
    }

    if kind != CallKind::Virtual {
        return Ok(HandlerOutcome::Modified);
    }

    let Some(receiver) = op.args.first() else {
        return Err(consistency_error!(id, "dispatched call '{}' has no receiver", op));
    };
    let receiver_ty = ctx.cfg.expression_type(receiver);
    match devirtualize::resolve(ts, ctx.target, ctx.provider, method, receiver_ty) {
        Some(hit) => {
            let kind = if hit.target == method {
                CallKind::Direct
            } else {
                CallKind::Overridden
            };
            ctx.cfg.op_mut(id)?.kind = OpKind::Call {
                kind,
                method: hit.target,
                may_throw: false,
            };
            if hit.reason == Resolution::SingleImplementation {
                ctx.event(EventKind::Info).message(format!(
                    "closed world: {} is the only implementation of {}",
                    ts.method_name(hit.target),
                    ts.ty(receiver_ty).name
                ));
            }
            ctx.event(EventKind::CallDevirtualized).message(format!(
                "{} -> {} ({})",
                ts.method_name(method),
                ts.method_name(hit.target),
                hit.reason
            ));
        }
        None => dispatch::lower_dispatch(ctx, id)?,
    }
    Ok(HandlerOutcome::Modified)
}

/// Replaces object and array creation with runtime allocator calls.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`](crate::Error::MissingWellKnown) if the runtime
/// has no allocator.
pub fn lower_allocation(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let Some(dst) = op.result() else {
        return Err(consistency_error!(id, "allocation '{}' has no result", op));
    };

    let (wkm, mut call) = match op.kind {
        OpKind::NewObject { ty } => {
            let wkm = WellKnownMethod::AllocateObject;
            (wkm, ctx.helper_call(wkm, Some(dst), vec![ctx.type_handle(ty)])?)
        }
        OpKind::NewArray { ty } => {
            let Some(length) = op.args.first().copied() else {
                return Err(consistency_error!(id, "'{}' has no length", op));
            };
            let wkm = WellKnownMethod::AllocateArray;
            let mut call = ctx.helper_call(wkm, Some(dst), vec![ctx.type_handle(ty), length])?;
            if let Some(n) = length.int_value().and_then(|n| u32::try_from(n).ok()) {
                call.annotations.set_fixed_length(n);
            }
            (wkm, call)
        }
        _ => return Ok(HandlerOutcome::NoChange),
    };
    call.annotations.add(AnnotationFlags::NOT_NULL);

    ctx.cfg.substitute(
        id,
        call,
        SubstitutionFlags::COPY_ANNOTATIONS | SubstitutionFlags::COPY_DEBUG,
    )?;
    ctx.event(EventKind::HelperSubstituted).helper(wkm.name());
    Ok(HandlerOutcome::Modified)
}

/// Replaces casts and instance tests with runtime calls, or with a copy when the static
/// type already satisfies the test.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`](crate::Error::MissingWellKnown) if the runtime
/// has no type test helpers.
pub fn lower_type_test(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let (ty, wkm) = match op.kind {
        OpKind::CastClass { ty } => (ty, WellKnownMethod::CastToType),
        OpKind::IsInstance { ty } => (ty, WellKnownMethod::IsInstanceOfType),
        _ => return Ok(HandlerOutcome::NoChange),
    };
    let (Some(dst), Some(object)) = (op.result(), op.args.first().copied()) else {
        return Err(consistency_error!(id, "malformed type test '{}'", op));
    };

    // Null passes both tests unchanged, so an upcast is a copy
    if ts.is_assignable_to(ctx.cfg.expression_type(&object), ty) {
        ctx.cfg
            .substitute(id, Operator::assign(dst, object), SubstitutionFlags::COPY_DEBUG)?;
        ctx.event(EventKind::CheckRemoved)
            .message(format!("{} statically satisfied", ts.ty(ty).name));
        return Ok(HandlerOutcome::Modified);
    }

    let call = ctx.helper_call(wkm, Some(dst), vec![object, ctx.type_handle(ty)])?;
    ctx.cfg.substitute(id, call, SubstitutionFlags::COPY_DEBUG)?;
    ctx.event(EventKind::HelperSubstituted).helper(wkm.name());
    Ok(HandlerOutcome::Modified)
}
