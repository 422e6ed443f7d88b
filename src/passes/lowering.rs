//! Field and element accesses lowered to address arithmetic.
//!
//! After this phase memory is only touched through `LoadIndirect`/`StoreIndirect` at a
//! byte offset from an address:
//!
//! ```text
//! v = s.Next                   v = [s + 4] (Shape.Next)
//! a[i] = v          =>         t = i << 2
//!                              u = a + t
//!                              [u + 4] = v
//! ```
//!
//! Field accesses remember the field as their access path, which reference counting
//! and alias queries downstream use. Fields of a struct held by value in a variable
//! are word copies into or out of that variable instead of memory accesses.

use crate::{
    compiler::{HandlerOutcome, NotificationContext},
    ir::{
        AnnotationFlags, Alu, BuiltinType, Expression, FieldId, OpId, OpKind, Operator,
        SubstitutionFlags, TypeFlags, TypeId, TypeKind, ARRAY_DATA_OFFSET, WORD_SIZE,
    },
    passes::replace_with,
    Error, Result,
};

const KEEP: SubstitutionFlags = SubstitutionFlags::COPY_ANNOTATIONS.union(SubstitutionFlags::COPY_DEBUG);

fn held_by_value(ctx: &NotificationContext<'_>, expr: &Expression) -> bool {
    let ty = ctx.cfg.expression_type(expr);
    ctx.ts.ty(ty).kind == TypeKind::ValueType
}

fn word_offsets(ctx: &NotificationContext<'_>, ty: TypeId) -> impl Iterator<Item = u32> {
    (0..ctx.ts.size_in_words(ty)).map(|w| w * WORD_SIZE)
}

/// Substitutes `id` and tags the result as memory-mapped if the field's owner is.
fn substitute_access(
    ctx: &mut NotificationContext<'_>,
    id: OpId,
    field: FieldId,
    mut access: Operator,
) -> Result<()> {
    let owner = ctx.ts.field(field).owner;
    if ctx.ts.ty(owner).flags.contains(TypeFlags::MEMORY_MAPPED) {
        access.annotations.add(AnnotationFlags::MEMORY_MAPPED);
    }
    ctx.cfg.substitute(id, access, KEEP)
}

/// Lowers field loads, stores and address computations.
///
/// # Errors
///
/// Returns [`Error::FeatureNotSupported`] for the address of a field of a struct held
/// by value, and a consistency error for malformed operators.
pub fn field_access(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let Some(object) = op.args.first().copied() else {
        return Err(consistency_error!(id, "'{}' has no object", op));
    };
    let by_value = held_by_value(ctx, &object);

    match op.kind {
        OpKind::LoadField { field, .. } => {
            let desc = ctx.ts.field(field);
            let Some(dst) = op.result() else {
                return Err(consistency_error!(id, "field load '{}' has no result", op));
            };
            if by_value {
                let copies = word_offsets(ctx, desc.ty)
                    .map(|w| {
                        Operator::new(
                            OpKind::PartialAssign {
                                dst_offset: w,
                                src_offset: desc.offset + w,
                            },
                            vec![dst],
                            vec![object],
                        )
                    })
                    .collect();
                replace_with(ctx.cfg, id, copies)?;
            } else {
                let access = Operator::new(
                    OpKind::LoadIndirect {
                        ty: desc.ty,
                        offset: desc.offset,
                        path: Some(field),
                        may_throw: false,
                    },
                    vec![dst],
                    vec![object],
                );
                substitute_access(ctx, id, field, access)?;
            }
        }
        OpKind::StoreField { field, .. } => {
            let desc = ctx.ts.field(field);
            let Some(value) = op.args.get(1).copied() else {
                return Err(consistency_error!(id, "field store '{}' has no value", op));
            };
            if by_value {
                let Some(target) = object.as_var() else {
                    return Err(consistency_error!(id, "store into a struct constant '{}'", op));
                };
                let copies = word_offsets(ctx, desc.ty)
                    .map(|w| {
                        Operator::new(
                            OpKind::PartialAssign {
                                dst_offset: desc.offset + w,
                                src_offset: w,
                            },
                            vec![target],
                            vec![value],
                        )
                    })
                    .collect();
                replace_with(ctx.cfg, id, copies)?;
            } else {
                let access = Operator::new(
                    OpKind::StoreIndirect {
                        ty: desc.ty,
                        offset: desc.offset,
                        path: Some(field),
                        may_throw: false,
                    },
                    Vec::new(),
                    vec![object, value],
                );
                substitute_access(ctx, id, field, access)?;
            }
        }
        OpKind::LoadFieldAddress { field, .. } => {
            if by_value {
                return Err(Error::FeatureNotSupported(format!(
                    "address of a field of a struct held in a variable: '{op}'"
                )));
            }
            let Some(dst) = op.result() else {
                return Err(consistency_error!(id, "'{}' has no result", op));
            };
            let offset = ctx.ts.field(field).offset;
            let address = if offset == 0 {
                Operator::assign(dst, object)
            } else {
                Operator::binary(
                    Alu::Add,
                    false,
                    dst,
                    object,
                    Expression::int(BuiltinType::UIntPtr.id(), i64::from(offset)),
                )
            };
            ctx.cfg.substitute(id, address, KEEP)?;
        }
        _ => return Ok(HandlerOutcome::NoChange),
    }
    Ok(HandlerOutcome::Modified)
}

/// `array + index * size`, or the array itself with the scaled index as a constant
/// offset when the index is constant.
fn element_base(
    ctx: &mut NotificationContext<'_>,
    array: Expression,
    index: Expression,
    size: u32,
    ops: &mut Vec<Operator>,
) -> Result<(Expression, u32)> {
    let uintptr = BuiltinType::UIntPtr.id();

    if let Some(i) = index.int_value() {
        let scaled = u32::try_from(i)
            .ok()
            .and_then(|i| i.checked_mul(size))
            .and_then(|o| o.checked_add(ARRAY_DATA_OFFSET))
            .ok_or_else(|| consistency_error!(None, "constant index {} out of range", i))?;
        return Ok((array, scaled));
    }

    let mut index = index;
    if ctx.ts.size_in_words(ctx.cfg.expression_type(&index)) > 1 {
        let narrow = ctx.cfg.allocate_temporary(uintptr);
        ops.push(Operator::new(
            OpKind::Truncate {
                significant: WORD_SIZE,
                check_overflow: false,
            },
            vec![narrow],
            vec![index],
        ));
        index = narrow.into();
    }

    let scaled = if size == 1 {
        index
    } else {
        let t = ctx.cfg.allocate_temporary(uintptr);
        ops.push(if size.is_power_of_two() {
            Operator::binary(
                Alu::Shl,
                false,
                t,
                index,
                Expression::int(BuiltinType::Int32.id(), i64::from(size.trailing_zeros())),
            )
        } else {
            Operator::binary(Alu::Mul, false, t, index, Expression::int(uintptr, i64::from(size)))
        });
        t.into()
    };

    let address = ctx.cfg.allocate_temporary(uintptr);
    ops.push(Operator::binary(Alu::Add, false, address, array, scaled));
    Ok((address.into(), ARRAY_DATA_OFFSET))
}

/// Lowers element loads, stores and address computations.
///
/// # Errors
///
/// Returns a consistency error for malformed operators or a constant index that
/// overflows the address space.
pub fn element_access(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let (Some(array), Some(index)) = (op.args.first().copied(), op.args.get(1).copied()) else {
        return Err(consistency_error!(id, "'{}' needs an array and an index", op));
    };
    let array_ty = ctx.cfg.expression_type(&array);
    let size = ctx.ts.element_size(array_ty);
    let element = ctx.ts.element_type(array_ty);

    let mut ops = Vec::with_capacity(4);
    let access = match op.kind {
        OpKind::LoadElement { .. } => {
            let Some(dst) = op.result() else {
                return Err(consistency_error!(id, "element load '{}' has no result", op));
            };
            let ty = element.unwrap_or_else(|| ctx.cfg.var_type(dst));
            let (base, offset) = element_base(ctx, array, index, size, &mut ops)?;
            Operator::new(
                OpKind::LoadIndirect {
                    ty,
                    offset,
                    path: None,
                    may_throw: false,
                },
                vec![dst],
                vec![base],
            )
        }
        OpKind::StoreElement { .. } => {
            let Some(value) = op.args.get(2).copied() else {
                return Err(consistency_error!(id, "element store '{}' has no value", op));
            };
            let ty = element.unwrap_or_else(|| ctx.cfg.expression_type(&value));
            let (base, offset) = element_base(ctx, array, index, size, &mut ops)?;
            Operator::new(
                OpKind::StoreIndirect {
                    ty,
                    offset,
                    path: None,
                    may_throw: false,
                },
                Vec::new(),
                vec![base, value],
            )
        }
        OpKind::LoadElementAddress { .. } => {
            let Some(dst) = op.result() else {
                return Err(consistency_error!(id, "'{}' has no result", op));
            };
            let (base, offset) = element_base(ctx, array, index, size, &mut ops)?;
            Operator::binary(
                Alu::Add,
                false,
                dst,
                base,
                Expression::int(BuiltinType::UIntPtr.id(), i64::from(offset)),
            )
        }
        _ => return Ok(HandlerOutcome::NoChange),
    };

    for step in ops {
        ctx.cfg.insert_before(id, step)?;
    }
    ctx.cfg.substitute(id, access, KEEP)?;
    Ok(HandlerOutcome::Modified)
}
