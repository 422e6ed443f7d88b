//! Table dispatch for calls that stay dynamic.
//!
//! A class method is found through the receiver's vtable, an interface method through
//! the interface table the runtime looks up for the receiver:
//!
//! ```text
//! r = callvirt Shape::Area(s)            r = callvirt IRunnable::Run(o)
//!
//! vt   = call VTableGet(s)               tbl  = call VTableGetInterface(o, typeof(IRunnable))
//! tbl  = vt.MethodPointers               code = tbl[0]
//! code = tbl[slot]                       r    = calli Run(code, o)
//! r    = calli Area(code, s)
//! ```
//!
//! The table loads are trusted and carry no implicit checks; the receiver's null check
//! has already been placed in front of the call.

use crate::{
    compiler::{EventKind, NotificationContext},
    ir::{
        AnnotationFlags, BuiltinType, CallKind, Expression, OpId, OpKind, Operator,
        SubstitutionFlags, WellKnownField, WellKnownMethod,
    },
    passes::insert_all_before,
    Result,
};

/// Rewrites the dispatched call `id` into a table lookup and an indirect call.
///
/// # Errors
///
/// Returns a consistency error if `id` is not a dispatched call or the method has no
/// table slot, and [`Error::MissingWellKnown`](crate::Error::MissingWellKnown) if the
/// runtime lacks the lookup helpers.
pub fn lower_dispatch(ctx: &mut NotificationContext<'_>, id: OpId) -> Result<()> {
    let ts = ctx.ts;
    let op = ctx.cfg.op(id)?.clone();
    let OpKind::Call {
        kind: CallKind::Virtual,
        method,
        ..
    } = op.kind
    else {
        return Err(consistency_error!(id, "'{}' is not a dispatched call", op));
    };
    let Some(receiver) = op.args.first().copied() else {
        return Err(consistency_error!(id, "dispatched call '{}' has no receiver", op));
    };

    let md = ts.method(method);
    let mut lookup = Vec::with_capacity(3);
    let (table, slot) = if ts.is_interface(md.owner) {
        let slot = md.interface_slot.ok_or_else(|| {
            consistency_error!(id, "{} has no interface slot", ts.method_name(method))
        })?;
        let table = ctx
            .cfg
            .allocate_temporary(BuiltinType::CodePointerArray.id());
        let mut get = ctx.helper_call(
            WellKnownMethod::VTableGetInterface,
            Some(table),
            vec![receiver, ctx.type_handle(md.owner)],
        )?;
        get.annotations.add(AnnotationFlags::NOT_NULL);
        lookup.push(get);
        (table, slot)
    } else {
        let slot = md.vtable_slot.ok_or_else(|| {
            consistency_error!(id, "{} has no vtable slot", ts.method_name(method))
        })?;
        let vtable = ctx.cfg.allocate_temporary(BuiltinType::VTable.id());
        let mut get = ctx.helper_call(WellKnownMethod::VTableGet, Some(vtable), vec![receiver])?;
        get.annotations.add(AnnotationFlags::NOT_NULL);
        lookup.push(get);

        let table = ctx
            .cfg
            .allocate_temporary(BuiltinType::CodePointerArray.id());
        let mut pointers = Operator::new(
            OpKind::LoadField {
                field: ts.well_known_field(WellKnownField::VTableMethodPointers)?,
                may_throw: false,
            },
            vec![table],
            vec![vtable.into()],
        );
        pointers.annotations.add(AnnotationFlags::NOT_NULL);
        lookup.push(pointers);
        (table, slot)
    };

    let code = ctx.cfg.allocate_temporary(BuiltinType::CodePointer.id());
    #[allow(clippy::cast_possible_wrap)]
    let index = Expression::int(BuiltinType::Int32.id(), slot as i64);
    lookup.push(Operator::new(
        OpKind::LoadElement { may_throw: false },
        vec![code],
        vec![table.into(), index],
    ));
    insert_all_before(ctx.cfg, id, lookup)?;

    let mut args = Vec::with_capacity(op.args.len() + 1);
    args.push(Expression::Var(code));
    args.extend(op.args.iter().copied());
    ctx.cfg.substitute(
        id,
        Operator::new(
            OpKind::Call {
                kind: CallKind::Indirect,
                method,
                may_throw: false,
            },
            op.results.clone(),
            args,
        ),
        SubstitutionFlags::COPY_ANNOTATIONS | SubstitutionFlags::COPY_DEBUG,
    )?;

    ctx.event(EventKind::DispatchLowered)
        .message(format!("{} through slot {slot}", ts.method_name(method)));
    Ok(())
}
