//! Retain/release injection for the reference counting memory model.
//!
//! Runs only when the target uses [`MemoryModel::ReferenceCounting`](crate::config::MemoryModel)
//! and the method is not excluded by [`REFCOUNT_EXCLUDED`](crate::config::CompilationConstraints::REFCOUNT_EXCLUDED).
//!
//! ## Classification
//!
//! | Type | Class |
//! |---|---|
//! | class, interface, array (not vtables or code pointer tables) | counted |
//! | `IntPtr`, `UIntPtr` | weak handle |
//! | everything else | not counted |
//!
//! ## Rules
//!
//! ```text
//! dst = src             AddReference(src); ReleaseReference(dst); dst = src
//! dst = call f(..)      ReleaseReference(dst); dst = call f(..)
//! dst = obj.f           ReleaseReference(dst); a = &obj.f; dst = LoadAndAddReference(a)
//! obj.f = v             a = &obj.f; ReferenceCountingSwap(a, v)
//! ```
//!
//! Assigning a weak handle into a counted variable retains the destination after the
//! copy. The frame setup nulls every counted local and temporary in the prologue and
//! releases them in the epilogue, and retains arguments the body reassigns.
//!
//! Every operator this module emits or has processed carries
//! [`REFCOUNT_PROCESSED`](crate::ir::AnnotationFlags::REFCOUNT_PROCESSED) so a re-scan
//! never counts it twice.

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    config::CompilationConstraints,
    ir::{
        AnnotationFlags, BuiltinType, CfgProperties, Expression, OpId, OpKind, Operator,
        SubstitutionFlags, TypeId, TypeSystem, VarId, VarKind, WellKnownMethod,
    },
    passes::insert_all_before,
    Error, Result,
};

fn is_counted(ts: &TypeSystem, ty: TypeId) -> bool {
    ts.is_reference(ty)
        && ty != BuiltinType::VTable.id()
        && ty != BuiltinType::CodePointerArray.id()
}

fn is_weak(ts: &TypeSystem, ty: TypeId) -> bool {
    ts.is_pointer_sized(ty)
}

fn applies(ctx: &NotificationContext<'_>) -> bool {
    ctx.target.is_reference_counting()
        && !ctx
            .constraints
            .contains(CompilationConstraints::REFCOUNT_EXCLUDED)
}

fn already_processed(ctx: &NotificationContext<'_>) -> Result<bool> {
    Ok(ctx
        .operator()?
        .annotations
        .has(AnnotationFlags::REFCOUNT_PROCESSED))
}

fn mark_processed(ctx: &mut NotificationContext<'_>, id: OpId) -> Result<()> {
    ctx.cfg
        .op_mut(id)?
        .annotations
        .add(AnnotationFlags::REFCOUNT_PROCESSED);
    Ok(())
}

/// A helper call already marked as processed.
fn counting_call(
    ctx: &NotificationContext<'_>,
    wkm: WellKnownMethod,
    result: Option<VarId>,
    args: Vec<Expression>,
) -> Result<Operator> {
    let mut op = ctx.helper_call(wkm, result, args)?;
    op.annotations.add(AnnotationFlags::REFCOUNT_PROCESSED);
    Ok(op)
}

fn injected(ctx: &NotificationContext<'_>, wkm: WellKnownMethod) {
    ctx.event(EventKind::RefCountInjected).helper(wkm.name());
}

/// Nulls counted variables in the prologue, releases them in the epilogue and retains
/// reassigned arguments for the duration of the call.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime lacks the counting helpers.
pub fn setup_frame(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    if !applies(ctx) || ctx.cfg.properties().contains(CfgProperties::REFCOUNT_FRAME) {
        return Ok(HandlerOutcome::NoChange);
    }
    let ts = ctx.ts;
    let chains = ctx.cfg.dataflow();

    let mut retained_args = Vec::new();
    let mut frame = Vec::new();
    for index in 0..ctx.cfg.var_count() {
        let var = VarId::new(index);
        let variable = ctx.cfg.var(var);
        if !is_counted(ts, variable.ty) {
            continue;
        }
        match variable.kind {
            VarKind::Argument(_) if !chains.definitions(var).is_empty() => {
                retained_args.push(var);
            }
            VarKind::Local(_) => frame.push((var, true)),
            VarKind::Temporary if !chains.definitions(var).is_empty() => frame.push((var, true)),
            VarKind::ReturnValue => frame.push((var, false)),
            _ => {}
        }
    }

    for &arg in &retained_args {
        let retain = counting_call(ctx, WellKnownMethod::AddReference, None, vec![arg.into()])?;
        ctx.cfg.append_to_prologue(retain)?;
        injected(ctx, WellKnownMethod::AddReference);
    }
    for &(var, _) in &frame {
        let null = Expression::null(ctx.cfg.var_type(var));
        let mut init = Operator::assign(var, null);
        init.annotations.add(AnnotationFlags::REFCOUNT_PROCESSED);
        ctx.cfg.append_to_prologue(init)?;
    }

    // The return value is owned by the caller once the method returns
    let released = retained_args
        .iter()
        .copied()
        .chain(frame.iter().filter(|(_, release)| *release).map(|(v, _)| *v));
    for var in released.collect::<Vec<_>>() {
        let release = counting_call(ctx, WellKnownMethod::ReleaseReference, None, vec![var.into()])?;
        ctx.cfg.append_to_epilogue(release)?;
        injected(ctx, WellKnownMethod::ReleaseReference);
    }

    ctx.cfg.set_property(CfgProperties::REFCOUNT_FRAME);
    Ok(HandlerOutcome::Modified)
}

/// Retains the source and releases the overwritten destination of a counted copy.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime lacks the counting helpers.
pub fn assignment(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    if !applies(ctx) || already_processed(ctx)? {
        return Ok(HandlerOutcome::NoChange);
    }
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let (Some(dst), Some(src)) = (op.result(), op.args.first().copied()) else {
        return Err(consistency_error!(id, "malformed assignment '{}'", op));
    };
    if !is_counted(ts, ctx.cfg.var_type(dst)) {
        return Ok(HandlerOutcome::NoChange);
    }

    let src_ty = ctx.cfg.expression_type(&src);
    let mut before = Vec::with_capacity(2);
    if src.as_var().is_some() && is_counted(ts, src_ty) {
        before.push(counting_call(ctx, WellKnownMethod::AddReference, None, vec![src])?);
        injected(ctx, WellKnownMethod::AddReference);
    }
    before.push(counting_call(
        ctx,
        WellKnownMethod::ReleaseReference,
        None,
        vec![dst.into()],
    )?);
    injected(ctx, WellKnownMethod::ReleaseReference);
    insert_all_before(ctx.cfg, id, before)?;

    if src.as_var().is_some() && is_weak(ts, src_ty) {
        let promote = counting_call(ctx, WellKnownMethod::AddReference, None, vec![dst.into()])?;
        ctx.cfg.insert_after(id, promote)?;
        injected(ctx, WellKnownMethod::AddReference);
    }

    mark_processed(ctx, id)?;
    Ok(HandlerOutcome::Modified)
}

/// Drops counting of null constants, swaps in counting-aware runtime variants and
/// releases the stale value of a counted call result.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`] if the runtime lacks the counting helpers.
pub fn call(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    if !applies(ctx) {
        return Ok(HandlerOutcome::NoChange);
    }
    let id = ctx.current()?;
    let ts = ctx.ts;
    let op = ctx.operator()?.clone();
    let OpKind::Call { method, .. } = op.kind else {
        return Ok(HandlerOutcome::NoChange);
    };

    let identity = ts.well_known_identity(method);
    if matches!(
        identity,
        Some(WellKnownMethod::AddReference | WellKnownMethod::ReleaseReference)
    ) && op.args.first().is_some_and(Expression::is_zero_constant)
    {
        ctx.cfg.delete(id)?;
        ctx.event(EventKind::OperatorRemoved)
            .message(format!("{} of null", ts.method_name(method)));
        return Ok(HandlerOutcome::Modified);
    }
    if op.annotations.has(AnnotationFlags::REFCOUNT_PROCESSED) {
        return Ok(HandlerOutcome::NoChange);
    }

    let counted_value = |index: usize| {
        op.args
            .get(index)
            .is_some_and(|a| is_counted(ts, ctx.cfg.expression_type(a)))
    };
    let replacement = match identity {
        Some(WellKnownMethod::FastAllocateString) => {
            Some(WellKnownMethod::FastAllocateReferenceCountingString)
        }
        Some(WellKnownMethod::InterlockedExchange) if counted_value(1) => {
            Some(WellKnownMethod::ReferenceCountingExchange)
        }
        Some(WellKnownMethod::InterlockedCompareExchange) if counted_value(1) => {
            Some(WellKnownMethod::ReferenceCountingCompareExchange)
        }
        _ => None,
    };
    if let Some(wkm) = replacement {
        let variant = ts.well_known_method(wkm)?;
        if let OpKind::Call { method, .. } = &mut ctx.cfg.op_mut(id)?.kind {
            *method = variant;
        }
        injected(ctx, wkm);
    }

    if let Some(dst) = op.result().filter(|r| is_counted(ts, ctx.cfg.var_type(*r))) {
        let release = counting_call(ctx, WellKnownMethod::ReleaseReference, None, vec![dst.into()])?;
        ctx.cfg.insert_before(id, release)?;
        injected(ctx, WellKnownMethod::ReleaseReference);
    }

    mark_processed(ctx, id)?;
    Ok(HandlerOutcome::Modified)
}

/// Type of the slot a field, element or indirect access reads or writes.
fn slot_type(ctx: &NotificationContext<'_>, op: &Operator) -> Option<TypeId> {
    match op.kind {
        OpKind::LoadField { field, .. } | OpKind::StoreField { field, .. } => {
            Some(ctx.ts.field(field).ty)
        }
        OpKind::LoadElement { .. } | OpKind::StoreElement { .. } => {
            let array = ctx.cfg.expression_type(op.args.first()?);
            ctx.ts.element_type(array)
        }
        OpKind::LoadIndirect { ty, .. } | OpKind::StoreIndirect { ty, .. } => Some(ty),
        _ => None,
    }
}

/// Operators computing the address of the accessed slot, and the address operand.
fn slot_address(
    ctx: &mut NotificationContext<'_>,
    id: OpId,
    op: &Operator,
) -> Result<(Vec<Operator>, Expression)> {
    let address_op = match op.kind {
        OpKind::LoadField { field, .. } | OpKind::StoreField { field, .. } => OpKind::LoadFieldAddress {
            field,
            may_throw: false,
        },
        OpKind::LoadElement { .. } | OpKind::StoreElement { .. } => {
            OpKind::LoadElementAddress { may_throw: false }
        }
        OpKind::LoadIndirect { offset, .. } | OpKind::StoreIndirect { offset, .. } => {
            if offset != 0 {
                return Err(Error::FeatureNotSupported(format!(
                    "reference counted access at offset {offset} in '{op}'"
                )));
            }
            let Some(address) = op.args.first().copied() else {
                return Err(consistency_error!(id, "'{}' has no address", op));
            };
            return Ok((Vec::new(), address));
        }
        _ => return Err(consistency_error!(id, "'{}' does not access a slot", op)),
    };

    let operands = match address_op {
        OpKind::LoadFieldAddress { .. } => 1,
        _ => 2,
    };
    if op.args.len() < operands {
        return Err(consistency_error!(id, "'{}' is missing operands", op));
    }
    let address = ctx.cfg.allocate_temporary(BuiltinType::UIntPtr.id());
    let mut compute = Operator::new(address_op, vec![address], op.args[..operands].to_vec());
    compute.annotations.add(AnnotationFlags::REFCOUNT_PROCESSED);
    Ok((vec![compute], address.into()))
}

/// Replaces a load of a counted slot by an atomic load-and-retain.
///
/// # Errors
///
/// Returns [`Error::FeatureNotSupported`] for an indirect load at a non-zero offset.
pub fn load(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    if !applies(ctx) || already_processed(ctx)? {
        return Ok(HandlerOutcome::NoChange);
    }
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let Some(dst) = op.result() else {
        return Err(consistency_error!(id, "load '{}' has no result", op));
    };
    if !is_counted(ctx.ts, ctx.cfg.var_type(dst))
        || !slot_type(ctx, &op).is_some_and(|ty| is_counted(ctx.ts, ty))
    {
        return Ok(HandlerOutcome::NoChange);
    }

    let mut before = vec![counting_call(
        ctx,
        WellKnownMethod::ReleaseReference,
        None,
        vec![dst.into()],
    )?];
    injected(ctx, WellKnownMethod::ReleaseReference);
    let (compute, address) = slot_address(ctx, id, &op)?;
    before.extend(compute);
    insert_all_before(ctx.cfg, id, before)?;

    let fetch = counting_call(ctx, WellKnownMethod::LoadAndAddReference, Some(dst), vec![address])?;
    ctx.cfg.substitute(
        id,
        fetch,
        SubstitutionFlags::COPY_ANNOTATIONS | SubstitutionFlags::COPY_DEBUG,
    )?;
    injected(ctx, WellKnownMethod::LoadAndAddReference);
    Ok(HandlerOutcome::Modified)
}

/// Replaces a store into a counted slot by an atomic swap.
///
/// # Errors
///
/// Returns [`Error::FeatureNotSupported`] for an indirect store at a non-zero offset.
pub fn store(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    if !applies(ctx) || already_processed(ctx)? {
        return Ok(HandlerOutcome::NoChange);
    }
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    if !slot_type(ctx, &op).is_some_and(|ty| is_counted(ctx.ts, ty)) {
        return Ok(HandlerOutcome::NoChange);
    }
    let Some(value) = op.args.last().copied() else {
        return Err(consistency_error!(id, "store '{}' has no value", op));
    };

    let (compute, address) = slot_address(ctx, id, &op)?;
    insert_all_before(ctx.cfg, id, compute)?;
    let swap = counting_call(
        ctx,
        WellKnownMethod::ReferenceCountingSwap,
        None,
        vec![address, value],
    )?;
    ctx.cfg.substitute(
        id,
        swap,
        SubstitutionFlags::COPY_ANNOTATIONS | SubstitutionFlags::COPY_DEBUG,
    )?;
    injected(ctx, WellKnownMethod::ReferenceCountingSwap);
    Ok(HandlerOutcome::Modified)
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{DerivedStats, EventKind, EventLog, Phase},
        config::{CompilationConfig, MemoryModel, TargetConfig},
        ir::{
            CfgBuilder, ControlFlowGraph, Expression, MethodId, OpKind, OpTag, Operator,
            WellKnownMethod,
        },
        test::fixtures::{self, Fixture},
        Error,
    };

    fn counting() -> TargetConfig {
        TargetConfig::new().with_memory_model(MemoryModel::ReferenceCounting)
    }

    fn run(fx: &Fixture, cfg: &mut ControlFlowGraph, config: &CompilationConfig) -> crate::Result<EventLog> {
        fixtures::run_phases(
            &fx.ts,
            cfg,
            &counting(),
            config,
            Phase::ApplyConfiguration,
            Phase::ReferenceCounting,
        )
    }

    fn helper_calls(fx: &Fixture, cfg: &ControlFlowGraph, wkm: WellKnownMethod) -> usize {
        let method = fx.ts.well_known_method(wkm).unwrap();
        cfg.operators()
            .filter(|(_, op)| matches!(op.kind, OpKind::Call { method: m, .. } if m == method))
            .count()
    }

    #[test]
    fn test_copy_retains_then_releases() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let s = f.argument(fx.shape, "s");
                let keep = f.local(fx.shape, "keep");
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.assign(keep, s);
                    blk.ret_void();
                });
            })
            .unwrap();

        run(&fx, &mut cfg, &CompilationConfig::new()).unwrap();

        let entry = cfg.entry();
        let tags: Vec<OpTag> = cfg
            .block(entry)
            .unwrap()
            .ops
            .iter()
            .map(|id| cfg.op(*id).unwrap().tag())
            .collect();
        // keep = null; AddReference(s); ReleaseReference(keep); keep = s; jmp
        assert_eq!(
            tags,
            vec![OpTag::Assign, OpTag::Call, OpTag::Call, OpTag::Assign, OpTag::Jump]
        );
        assert_eq!(helper_calls(&fx, &cfg, WellKnownMethod::AddReference), 1);
        // one before the copy, one in the epilogue for the local
        assert_eq!(helper_calls(&fx, &cfg, WellKnownMethod::ReleaseReference), 2);
    }

    #[test]
    fn test_reassigned_argument_is_retained() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let s = f.argument(fx.shape, "s");
                let other = f.argument(fx.shape, "other");
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.assign(s, other);
                    blk.ret_void();
                });
            })
            .unwrap();

        let events = run(&fx, &mut cfg, &CompilationConfig::new()).unwrap();
        // prologue retain of s, plus the retain of the copied value
        assert_eq!(helper_calls(&fx, &cfg, WellKnownMethod::AddReference), 2);
        let exit = cfg.exit();
        let released_in_epilogue = cfg
            .block(exit)
            .unwrap()
            .ops
            .iter()
            .filter(|id| cfg.op(**id).unwrap().tag() == OpTag::Call)
            .count();
        assert_eq!(released_in_epilogue, 1);
        assert!(DerivedStats::from_log(&events).refcount_injected() >= 4);
    }

    #[test]
    fn test_field_access_uses_atomic_helpers() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.shape))
            .build_with(|f| {
                let s = f.argument(fx.shape, "s");
                let next = f.temp(fx.shape);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.load_field(next, s, fx.shape_next);
                    blk.store_field(s, fx.shape_next, next);
                    blk.ret(next);
                });
            })
            .unwrap();

        run(&fx, &mut cfg, &CompilationConfig::new()).unwrap();
        assert_eq!(helper_calls(&fx, &cfg, WellKnownMethod::LoadAndAddReference), 1);
        assert_eq!(helper_calls(&fx, &cfg, WellKnownMethod::ReferenceCountingSwap), 1);
        assert_eq!(fixtures::count(&cfg, OpTag::LoadFieldAddress), 2);
        assert_eq!(fixtures::count(&cfg, OpTag::LoadField), 0);
        assert_eq!(fixtures::count(&cfg, OpTag::StoreField), 0);
    }

    #[test]
    fn test_integer_field_untouched() {
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

        run(&fx, &mut cfg, &CompilationConfig::new()).unwrap();
        assert_eq!(fixtures::count(&cfg, OpTag::LoadField), 1);
        assert_eq!(helper_calls(&fx, &cfg, WellKnownMethod::LoadAndAddReference), 0);
    }

    #[test]
    fn test_excluded_method_is_skipped() {
        let fx = fixtures::basic();
        let method = MethodId::new(0);
        let mut cfg = CfgBuilder::new(method, None)
            .build_with(|f| {
                let s = f.argument(fx.shape, "s");
                let keep = f.local(fx.shape, "keep");
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.assign(keep, s);
                    blk.ret_void();
                });
            })
            .unwrap();

        let config = CompilationConfig::new().with_refcount_exclusion(method);
        let events = run(&fx, &mut cfg, &config).unwrap();
        assert!(!events.has(EventKind::RefCountInjected));
        assert_eq!(fixtures::count(&cfg, OpTag::Call), 0);
    }

    #[test]
    fn test_string_allocation_variant() {
        let fx = fixtures::basic();
        let alloc = fx.ts.well_known_method(WellKnownMethod::FastAllocateString).unwrap();
        let string = crate::ir::BuiltinType::String.id();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(string))
            .build_with(|f| {
                let s = f.temp(string);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.call(alloc, Some(s), vec![Expression::int(fx.int, 4)]);
                    blk.ret(s);
                });
            })
            .unwrap();

        run(&fx, &mut cfg, &CompilationConfig::new()).unwrap();
        assert_eq!(helper_calls(&fx, &cfg, WellKnownMethod::FastAllocateString), 0);
        assert_eq!(
            helper_calls(&fx, &cfg, WellKnownMethod::FastAllocateReferenceCountingString),
            1
        );
    }

    #[test]
    fn test_release_of_null_removed() {
        let fx = fixtures::basic();
        let release = fx.ts.well_known_method(WellKnownMethod::ReleaseReference).unwrap();
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.call(release, None, vec![Expression::null(fx.object)]);
                    blk.ret_void();
                });
            })
            .unwrap();

        run(&fx, &mut cfg, &CompilationConfig::new()).unwrap();
        assert_eq!(fixtures::count(&cfg, OpTag::Call), 0);
    }

    #[test]
    fn test_offset_indirect_rejected() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let p = f.argument(fx.uintptr, "p");
                let s = f.argument(fx.shape, "s");
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.op(Operator::new(
                        OpKind::StoreIndirect {
                            ty: fx.shape,
                            offset: 8,
                            path: None,
                            may_throw: false,
                        },
                        vec![],
                        vec![p.into(), s.into()],
                    ));
                    blk.ret_void();
                });
            })
            .unwrap();

        let err = run(&fx, &mut cfg, &CompilationConfig::new()).unwrap_err();
        assert!(matches!(err, Error::FeatureNotSupported(_)));
    }
}
