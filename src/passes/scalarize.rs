//! Aggregate type expansion.
//!
//! Every operator touching a value wider than one machine word is rewritten into
//! operators over the value's word-sized fragments, low word first. Fragments of a
//! variable are allocated once by [`ControlFlowGraph::fragments`], so the definition and
//! every use of a split value agree on them. Constants are split by bit pattern.
//!
//! ## Rewrites
//!
//! | Operator | Word form |
//! |---|---|
//! | `add`/`sub` | carry-out low word, carry-in high word |
//! | `and`/`or`/`xor`, `not` | one operator per word |
//! | `neg` | `0 - x` as a carry chain |
//! | `shl`/`shr` by 32 | word moves plus a sign or zero fill |
//! | `cmp`, `cset`, `cbr` | `LongCompare` feeding the flags |
//! | `br` on a wide value | `or` of the words with carry-out, then `ccbr ne` |
//! | extend, truncate | word copies, a partial extend and a fill |
//! | indirect load/store | one access per word at consecutive offsets |
//! | `phi` | one phi per word |
//! | `ret` | the returned words moved into the result registers |
//!
//! A compare with a constant left operand first has its operands swapped and its
//! relation mirrored, whatever the width, so the constant always ends up on the right.
//! A flag-setting `cmp` is only swapped when every consumer of its flags tests a
//! relation.
//!
//! A wide multiply, divide, remainder, other shift or conversion reaching this phase
//! should have been replaced by a helper call and is reported as a consistency error.
//! A multi-way branch only takes a one-word selector.

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    config::TargetConfig,
    ir::{
        has_wide_operand, is_wide, Alu, BuiltinType, Carry, ConditionCode, Constant,
        ControlFlowGraph, Expression, FieldId, OpId, OpKind, Operator, SubstitutionFlags,
        TypeSystem, UnaryAlu, VarId, WORD_SIZE,
    },
    passes::{calls::convention, insert_all_before, replace_with},
    Result,
};

/// The words of `expr`, low word first.
///
/// A value that stays whole on `target` is its own single word.
///
/// # Errors
///
/// Returns a consistency error for a wide symbolic constant.
pub(crate) fn words(
    cfg: &mut ControlFlowGraph,
    ts: &TypeSystem,
    target: &TargetConfig,
    expr: &Expression,
) -> Result<Vec<Expression>> {
    let ty = cfg.expression_type(expr);
    if !is_wide(ts, target, ty) {
        return Ok(vec![*expr]);
    }
    match expr {
        Expression::Var(v) => Ok(cfg
            .fragments(ts, *v)
            .into_iter()
            .map(Expression::Var)
            .collect()),
        Expression::Const(c) => (0..ts.size_in_words(ty))
            .map(|w| {
                c.value
                    .fragment(w)
                    .map(|value| {
                        Expression::Const(Constant {
                            ty: BuiltinType::UInt32.id(),
                            value,
                        })
                    })
                    .ok_or_else(|| consistency_error!(None, "constant {} has no word {}", expr, w))
            })
            .collect(),
    }
}

/// The fragments of a variable written by an operator.
fn var_words(ctx: &mut NotificationContext<'_>, var: VarId) -> Vec<VarId> {
    if is_wide(ctx.ts, ctx.target, ctx.cfg.var_type(var)) {
        ctx.cfg.fragments(ctx.ts, var)
    } else {
        vec![var]
    }
}

fn expr_words(ctx: &mut NotificationContext<'_>, expr: &Expression) -> Result<Vec<Expression>> {
    words(ctx.cfg, ctx.ts, ctx.target, expr)
}

fn word(value: i64) -> Expression {
    Expression::int(BuiltinType::UInt32.id(), value)
}

/// The current operator, if it still has a wide operand.
fn wide_operator(ctx: &NotificationContext<'_>) -> Result<Option<(OpId, Operator)>> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    if !has_wide_operand(op, ctx.cfg, ctx.ts, ctx.target) {
        return Ok(None);
    }
    Ok(Some((id, op.clone())))
}

fn scalarized(
    ctx: &mut NotificationContext<'_>,
    id: OpId,
    op: &Operator,
    ops: Vec<Operator>,
) -> Result<HandlerOutcome> {
    let count = ops.len();
    replace_with(ctx.cfg, id, ops)?;
    ctx.event(EventKind::OperatorScalarized)
        .message(format!("'{op}' into {count} word operators"));
    Ok(HandlerOutcome::Modified)
}

fn same_width(id: OpId, op: &Operator, parts: &[&[Expression]], width: usize) -> Result<()> {
    if parts.iter().any(|p| p.len() != width) {
        return Err(consistency_error!(
            id,
            "operands of '{}' do not have {} words each",
            op,
            width
        ));
    }
    Ok(())
}

/// `dst = left alu right` word by word, threading the carry through the flags.
fn carry_chain(
    cfg: &mut ControlFlowGraph,
    alu: Alu,
    signed: bool,
    dst: &[VarId],
    left: &[Expression],
    right: &[Expression],
    carry_in: Option<Expression>,
    carry_out: Option<VarId>,
) -> Vec<Operator> {
    let mut incoming = carry_in;
    let mut ops = Vec::with_capacity(dst.len());
    for (w, d) in dst.iter().enumerate() {
        let last = w + 1 == dst.len();
        let out = if last {
            carry_out
        } else {
            Some(cfg.allocate_condition_code())
        };
        let carry = match (incoming.is_some(), out.is_some()) {
            (false, false) => Carry::None,
            (false, true) => Carry::Out,
            (true, false) => Carry::In,
            (true, true) => Carry::InOut,
        };

        let mut results = vec![*d];
        results.extend(out);
        let mut args = vec![left[w], right[w]];
        args.extend(incoming);
        ops.push(Operator::new(
            OpKind::Binary {
                alu,
                signed: signed && last,
                check_overflow: false,
                carry,
            },
            results,
            args,
        ));
        incoming = out.map(Expression::Var);
    }
    ops
}

/// Splits a copy between wide values into word copies.
///
/// A copy between a wide and a one-word value becomes a [`OpKind::PartialAssign`] of the
/// low word, which [`partial_assign`] then resolves.
///
/// # Errors
///
/// Returns a consistency error if both sides are wide but of different widths.
pub fn assign(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let (Some(dst), Some(src)) = (op.result(), op.arg(0).copied()) else {
        return Err(consistency_error!(id, "malformed copy '{}'", op));
    };

    let d = var_words(ctx, dst);
    let s = expr_words(ctx, &src)?;
    if d.len() == 1 || s.len() == 1 {
        let partial = Operator::new(
            OpKind::PartialAssign {
                dst_offset: 0,
                src_offset: 0,
            },
            vec![dst],
            vec![src],
        );
        ctx.cfg.substitute(id, partial, SubstitutionFlags::COPY_DEBUG)?;
        return Ok(HandlerOutcome::Modified);
    }
    same_width(id, &op, &[s.as_slice()], d.len())?;

    let ops = d
        .iter()
        .zip(s)
        .map(|(d, s)| Operator::assign(*d, s))
        .collect();
    scalarized(ctx, id, &op, ops)
}

/// Resolves a one-word copy into or out of a wide value to the fragment it touches.
///
/// # Errors
///
/// Returns a consistency error if an offset lies outside its value.
pub fn partial_assign(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let OpKind::PartialAssign {
        dst_offset,
        src_offset,
    } = op.kind
    else {
        return Ok(HandlerOutcome::NoChange);
    };
    let (Some(dst), Some(src)) = (op.result(), op.arg(0).copied()) else {
        return Err(consistency_error!(id, "malformed partial copy '{}'", op));
    };

    let d = var_words(ctx, dst);
    let s = expr_words(ctx, &src)?;
    let (Some(d), Some(s)) = (
        d.get((dst_offset / WORD_SIZE) as usize),
        s.get((src_offset / WORD_SIZE) as usize),
    ) else {
        return Err(consistency_error!(
            id,
            "'{}' addresses a word outside its operands",
            op
        ));
    };
    let copy = Operator::assign(*d, *s);
    scalarized(ctx, id, &op, vec![copy])
}

/// Splits wide integer arithmetic.
///
/// # Errors
///
/// Returns a consistency error for an operator that needs a helper call, or one that
/// still checks for overflow.
pub fn binary(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let OpKind::Binary {
        alu,
        signed,
        check_overflow,
        carry,
    } = op.kind
    else {
        return Ok(HandlerOutcome::NoChange);
    };
    if check_overflow {
        return Err(consistency_error!(id, "'{}' still checks for overflow", op));
    }
    let (Some(dst), Some(left), Some(right)) = (op.result(), op.arg(0).copied(), op.arg(1).copied())
    else {
        return Err(consistency_error!(id, "'{}' has missing operands", op));
    };

    let d = var_words(ctx, dst);
    let l = expr_words(ctx, &left)?;
    let ops = match alu {
        Alu::Add | Alu::Sub => {
            let r = expr_words(ctx, &right)?;
            same_width(id, &op, &[l.as_slice(), r.as_slice()], d.len())?;
            let carry_in = matches!(carry, Carry::In | Carry::InOut)
                .then(|| op.arg(2).copied())
                .flatten();
            let carry_out = matches!(carry, Carry::Out | Carry::InOut)
                .then(|| op.results.get(1).copied())
                .flatten();
            carry_chain(ctx.cfg, alu, signed, &d, &l, &r, carry_in, carry_out)
        }
        _ if alu.is_bitwise() => {
            let r = expr_words(ctx, &right)?;
            same_width(id, &op, &[l.as_slice(), r.as_slice()], d.len())?;
            d.iter()
                .zip(l.iter().zip(&r))
                .map(|(d, (l, r))| Operator::binary(alu, signed, *d, *l, *r))
                .collect()
        }
        Alu::Shl | Alu::Shr if right.int_value() == Some(32) && d.len() == 2 => {
            same_width(id, &op, &[l.as_slice()], 2)?;
            shift_by_word(alu, signed, &d, &l)
        }
        _ => {
            return Err(consistency_error!(
                id,
                "'{}' should have been replaced by a helper call",
                op
            ))
        }
    };
    scalarized(ctx, id, &op, ops)
}

fn shift_by_word(alu: Alu, signed: bool, d: &[VarId], l: &[Expression]) -> Vec<Operator> {
    let (lo, hi) = (d[0], d[1]);
    match alu {
        Alu::Shl => vec![Operator::assign(hi, l[0]), Operator::assign(lo, word(0))],
        _ if signed => vec![
            Operator::assign(lo, l[1]),
            Operator::binary(Alu::Shr, true, hi, l[1], word(31)),
        ],
        _ => vec![Operator::assign(lo, l[1]), Operator::assign(hi, word(0))],
    }
}

/// Splits the wide result of a word multiply into its low and high words.
///
/// # Errors
///
/// Returns a consistency error if the operands themselves are wide.
pub fn long_binary(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let Some(dst) = op.result() else {
        return Ok(HandlerOutcome::NoChange);
    };
    if op
        .args
        .iter()
        .any(|a| is_wide(ctx.ts, ctx.target, ctx.cfg.expression_type(a)))
    {
        return Err(consistency_error!(id, "'{}' takes word operands only", op));
    }

    let d = var_words(ctx, dst);
    let split = Operator::new(op.kind.clone(), d, op.args.clone());
    scalarized(ctx, id, &op, vec![split])
}

/// Splits wide negation and complement.
///
/// # Errors
///
/// Returns a consistency error for a wide float operator.
pub fn unary(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let OpKind::Unary { alu, signed } = op.kind else {
        return Ok(HandlerOutcome::NoChange);
    };
    let (Some(dst), Some(src)) = (op.result(), op.arg(0).copied()) else {
        return Err(consistency_error!(id, "'{}' has missing operands", op));
    };

    let d = var_words(ctx, dst);
    let s = expr_words(ctx, &src)?;
    same_width(id, &op, &[s.as_slice()], d.len())?;
    let ops = match alu {
        UnaryAlu::Not => d
            .iter()
            .zip(s)
            .map(|(d, s)| Operator::new(op.kind.clone(), vec![*d], vec![s]))
            .collect(),
        UnaryAlu::Neg => {
            let zeros = vec![word(0); d.len()];
            carry_chain(ctx.cfg, Alu::Sub, signed, &d, &zeros, &s, None, None)
        }
        UnaryAlu::Finite => {
            return Err(consistency_error!(
                id,
                "'{}' should have been replaced by a helper call",
                op
            ))
        }
    };
    scalarized(ctx, id, &op, ops)
}

/// The words of both compared operands, left first.
fn compared_words(ctx: &mut NotificationContext<'_>, id: OpId, op: &Operator) -> Result<Vec<Expression>> {
    let (Some(left), Some(right)) = (op.arg(0).copied(), op.arg(1).copied()) else {
        return Err(consistency_error!(id, "'{}' has missing operands", op));
    };
    let mut l = expr_words(ctx, &left)?;
    let r = expr_words(ctx, &right)?;
    same_width(id, op, &[r.as_slice()], l.len())?;
    l.extend(r);
    Ok(l)
}

/// Moves a constant left operand of a compare to the right and mirrors the relation.
///
/// Returns `true` if the current operator was rewritten.
fn constant_to_right(ctx: &mut NotificationContext<'_>) -> Result<bool> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    let (Some(left), Some(right)) = (op.arg(0), op.arg(1)) else {
        return Ok(false);
    };
    if left.as_const().is_none() || right.as_const().is_some() {
        return Ok(false);
    }
    let flags = match op.kind {
        OpKind::Compare => op.result(),
        _ => None,
    };

    let mut consumers = Vec::new();
    if let Some(flags) = flags {
        let chains = ctx.cfg.dataflow();
        for user in chains.uses(flags) {
            let cond = match ctx.cfg.op(*user)?.kind {
                OpKind::CcBranch { cond, .. } | OpKind::SetIfConditionCode(cond) => cond,
                _ => return Ok(false),
            };
            let Some(relation) = cond.to_comparison() else {
                return Ok(false);
            };
            consumers.push((*user, ConditionCode::from_comparison(relation.mirror())));
        }
    }

    let op = ctx.cfg.op_mut(id)?;
    op.args.swap(0, 1);
    match &mut op.kind {
        OpKind::CompareAndSet(cmp) | OpKind::CompareBranch { cmp, .. } => *cmp = cmp.mirror(),
        _ => {}
    }
    for (user, mirrored) in consumers {
        match &mut ctx.cfg.op_mut(user)?.kind {
            OpKind::CcBranch { cond, .. } | OpKind::SetIfConditionCode(cond) => *cond = mirrored,
            _ => {}
        }
    }
    log::trace!("{}: constant moved right in {}", ctx.cfg.method(), id);
    Ok(true)
}

/// Turns a wide flag-setting compare into a `LongCompare`.
///
/// # Errors
///
/// Returns a consistency error if the operands differ in width.
pub fn compare(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let swapped = constant_to_right(ctx)?;
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(if swapped {
            HandlerOutcome::Modified
        } else {
            HandlerOutcome::NoChange
        });
    };
    let operands = compared_words(ctx, id, &op)?;
    let long = Operator::new(OpKind::LongCompare, op.results.clone(), operands);
    scalarized(ctx, id, &op, vec![long])
}

/// Turns a wide compare-and-set into `LongCompare` plus a flag test.
///
/// # Errors
///
/// Returns a consistency error if the operands differ in width.
pub fn compare_and_set(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let swapped = constant_to_right(ctx)?;
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(if swapped {
            HandlerOutcome::Modified
        } else {
            HandlerOutcome::NoChange
        });
    };
    let OpKind::CompareAndSet(cmp) = op.kind else {
        return Ok(HandlerOutcome::NoChange);
    };
    let Some(dst) = op.result() else {
        return Err(consistency_error!(id, "'{}' has no result", op));
    };

    let operands = compared_words(ctx, id, &op)?;
    let flags = ctx.cfg.allocate_condition_code();
    let ops = vec![
        Operator::new(OpKind::LongCompare, vec![flags], operands),
        Operator::new(
            OpKind::SetIfConditionCode(ConditionCode::from_comparison(cmp)),
            vec![dst],
            vec![flags.into()],
        ),
    ];
    scalarized(ctx, id, &op, ops)
}

/// Turns a wide compare-and-branch into `LongCompare` plus a flag branch.
///
/// # Errors
///
/// Returns a consistency error if the operands differ in width.
pub fn compare_branch(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let swapped = constant_to_right(ctx)?;
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(if swapped {
            HandlerOutcome::Modified
        } else {
            HandlerOutcome::NoChange
        });
    };
    let OpKind::CompareBranch {
        cmp,
        not_taken,
        taken,
    } = op.kind
    else {
        return Ok(HandlerOutcome::NoChange);
    };

    let operands = compared_words(ctx, id, &op)?;
    let flags = ctx.cfg.allocate_condition_code();
    let ops = vec![
        Operator::new(OpKind::LongCompare, vec![flags], operands),
        Operator::new(
            OpKind::CcBranch {
                cond: ConditionCode::from_comparison(cmp),
                not_taken,
                taken,
            },
            Vec::new(),
            vec![flags.into()],
        ),
    ];
    scalarized(ctx, id, &op, ops)
}

/// Branches on a wide value by or-ing its words into a pseudo-register.
///
/// # Errors
///
/// Returns a consistency error if the branch has no operand.
pub fn binary_branch(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let OpKind::BinaryBranch { not_taken, taken } = op.kind else {
        return Ok(HandlerOutcome::NoChange);
    };
    let Some(value) = op.arg(0).copied() else {
        return Err(consistency_error!(id, "'{}' has no operand", op));
    };

    let parts = expr_words(ctx, &value)?;
    let flags = ctx.cfg.allocate_condition_code();
    let mut ops = Vec::with_capacity(parts.len());
    let mut acc = parts[0];
    for (i, part) in parts.iter().enumerate().skip(1) {
        let last = i + 1 == parts.len();
        let reg = ctx.cfg.allocate_pseudo_register(BuiltinType::UInt32.id());
        let (carry, results) = if last {
            (Carry::Out, vec![reg, flags])
        } else {
            (Carry::None, vec![reg])
        };
        ops.push(Operator::new(
            OpKind::Binary {
                alu: Alu::Or,
                signed: false,
                check_overflow: false,
                carry,
            },
            results,
            vec![acc, *part],
        ));
        acc = reg.into();
    }
    ops.push(Operator::new(
        OpKind::CcBranch {
            cond: ConditionCode::NotEqual,
            not_taken,
            taken,
        },
        Vec::new(),
        vec![flags.into()],
    ));
    scalarized(ctx, id, &op, ops)
}

/// Splits sign extension, zero extension and truncation involving a wide value.
///
/// Words fully covered by the significant bytes are copied, a partially covered word
/// is extended or truncated in place, and the remaining words are filled with the sign
/// of the last significant word or with zero.
///
/// # Errors
///
/// Returns a consistency error for a checked extension, or if the source has fewer
/// words than the significant bytes need.
pub fn extension(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let (significant, check_overflow, sign_fill) = match op.kind {
        OpKind::SignExtend {
            significant,
            check_overflow,
        } => (significant, check_overflow, true),
        OpKind::ZeroExtend {
            significant,
            check_overflow,
        }
        | OpKind::Truncate {
            significant,
            check_overflow,
        } => (significant, check_overflow, false),
        _ => return Ok(HandlerOutcome::NoChange),
    };
    if check_overflow {
        return Err(consistency_error!(id, "'{}' still checks for overflow", op));
    }
    let (Some(dst), Some(src)) = (op.result(), op.arg(0).copied()) else {
        return Err(consistency_error!(id, "'{}' has missing operands", op));
    };

    let d = var_words(ctx, dst);
    let s = expr_words(ctx, &src)?;
    let mut ops = Vec::with_capacity(d.len());
    let mut top = None;
    for (w, dw) in d.iter().enumerate() {
        let start = WORD_SIZE * w as u32;
        if start >= significant {
            ops.push(match top {
                Some(top) if sign_fill => Operator::binary(Alu::Shr, true, *dw, top, word(31)),
                _ => Operator::assign(*dw, word(0)),
            });
            continue;
        }

        let Some(sw) = s.get(w).copied() else {
            return Err(consistency_error!(
                id,
                "'{}' reads past the end of its source",
                op
            ));
        };
        let remaining = significant - start;
        ops.push(if remaining >= WORD_SIZE {
            Operator::assign(*dw, sw)
        } else {
            let mut kind = op.kind.clone();
            set_significant(&mut kind, remaining);
            Operator::new(kind, vec![*dw], vec![sw])
        });
        top = Some(Expression::Var(*dw));
    }
    scalarized(ctx, id, &op, ops)
}

fn set_significant(kind: &mut OpKind, bytes: u32) {
    if let OpKind::SignExtend { significant, .. }
    | OpKind::ZeroExtend { significant, .. }
    | OpKind::Truncate { significant, .. } = kind
    {
        *significant = bytes;
    }
}

/// Rejects conversions that still involve a wide value.
///
/// # Errors
///
/// Always returns a consistency error when an operand is wide; such conversions
/// become helper calls earlier.
pub fn convert(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    match wide_operator(ctx)? {
        None => Ok(HandlerOutcome::NoChange),
        Some((id, op)) => Err(consistency_error!(
            id,
            "'{}' should have been replaced by a helper call",
            op
        )),
    }
}

/// The field laid out at `offset`, starting from the access path of a wide access.
fn field_at(ts: &TypeSystem, path: Option<FieldId>, offset: u32) -> Option<FieldId> {
    let field = ts.field(path?);
    let inner = offset
        .checked_sub(field.offset)
        .filter(|_| ts.is_value_type(field.ty))
        .and_then(|rel| ts.find_field_at_offset(field.ty, rel));
    inner.or_else(|| ts.find_field_at_offset(field.owner, offset))
}

/// One indirect access per word of the accessed value.
fn word_accesses(
    ctx: &NotificationContext<'_>,
    op: &Operator,
    words: usize,
    access: impl Fn(OpKind, usize) -> Operator,
) -> Vec<Operator> {
    let (OpKind::LoadIndirect {
        offset,
        path,
        may_throw,
        ..
    }
    | OpKind::StoreIndirect {
        offset,
        path,
        may_throw,
        ..
    }) = op.kind
    else {
        return Vec::new();
    };
    let load = matches!(op.kind, OpKind::LoadIndirect { .. });

    (0..words)
        .map(|w| {
            let offset = offset + WORD_SIZE * w as u32;
            let ty = BuiltinType::UInt32.id();
            let path = field_at(ctx.ts, path, offset);
            let kind = if load {
                OpKind::LoadIndirect {
                    ty,
                    offset,
                    path,
                    may_throw,
                }
            } else {
                OpKind::StoreIndirect {
                    ty,
                    offset,
                    path,
                    may_throw,
                }
            };
            let mut word_op = access(kind, w);
            word_op.annotations = op.annotations.clone();
            word_op
        })
        .collect()
}

/// Splits a wide load into one load per word.
///
/// # Errors
///
/// Returns a consistency error if the load has no address.
pub fn load_indirect(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let (Some(dst), Some(address)) = (op.result(), op.arg(0).copied()) else {
        return Err(consistency_error!(id, "'{}' has missing operands", op));
    };

    let d = var_words(ctx, dst);
    let ops = word_accesses(ctx, &op, d.len(), |kind, w| {
        Operator::new(kind, vec![d[w]], vec![address])
    });
    scalarized(ctx, id, &op, ops)
}

/// Splits a wide store into one store per word.
///
/// # Errors
///
/// Returns a consistency error if the store has missing operands.
pub fn store_indirect(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let (Some(address), Some(value)) = (op.arg(0).copied(), op.arg(1).copied()) else {
        return Err(consistency_error!(id, "'{}' has missing operands", op));
    };

    let v = expr_words(ctx, &value)?;
    let ops = word_accesses(ctx, &op, v.len(), |kind, w| {
        Operator::new(kind, Vec::new(), vec![address, v[w]])
    });
    scalarized(ctx, id, &op, ops)
}

/// Splits a wide phi into one phi per word.
///
/// # Errors
///
/// Returns a consistency error if an incoming value has a different width.
pub fn phi(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let Some((id, op)) = wide_operator(ctx)? else {
        return Ok(HandlerOutcome::NoChange);
    };
    let Some(dst) = op.result() else {
        return Err(consistency_error!(id, "'{}' has no result", op));
    };

    let d = var_words(ctx, dst);
    let mut incoming = Vec::with_capacity(op.args.len());
    for arg in &op.args {
        let parts = expr_words(ctx, arg)?;
        same_width(id, &op, &[parts.as_slice()], d.len())?;
        incoming.push(parts);
    }

    let ops = d
        .iter()
        .enumerate()
        .map(|(w, dw)| {
            Operator::new(
                op.kind.clone(),
                vec![*dw],
                incoming.iter().map(|parts| parts[w]).collect(),
            )
        })
        .collect();
    scalarized(ctx, id, &op, ops)
}

/// Rejects a multi-way branch on a wide selector.
///
/// # Errors
///
/// Returns [`Error::FeatureNotSupported`](crate::Error::FeatureNotSupported) for a wide
/// selector.
pub fn switch(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    match wide_operator(ctx)? {
        None => Ok(HandlerOutcome::NoChange),
        Some((id, op)) => Err(crate::Error::FeatureNotSupported(format!(
            "{id}: '{op}' switches on a multi-word selector"
        ))),
    }
}

/// Moves the returned value into the result registers, one word per register.
///
/// # Errors
///
/// Returns an error if the exit block is malformed.
pub fn ret(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?.clone();
    let bound = op
        .args
        .iter()
        .all(|a| a.as_var().is_some_and(|v| ctx.cfg.var(v).is_physical()));
    if bound {
        return Ok(HandlerOutcome::NoChange);
    }

    let mut returned = Vec::new();
    for arg in &op.args {
        returned.extend(expr_words(ctx, arg)?);
    }
    let registers = convention::result_registers(ctx.cfg, returned.len());
    let copies = registers
        .iter()
        .zip(returned)
        .map(|(reg, value)| Operator::assign(*reg, value))
        .collect();
    insert_all_before(ctx.cfg, id, copies)?;

    let mut bound_ret = op.clone();
    bound_ret.args = registers.into_iter().map(Expression::Var).collect();
    ctx.cfg.substitute(id, bound_ret, SubstitutionFlags::COPY_DEBUG)?;
    ctx.event(EventKind::OperatorScalarized)
        .message(format!("'{op}' bound to {} result words", op.args.len()));
    Ok(HandlerOutcome::Modified)
}

/// Returns `true` if no operator of `cfg` still has a wide operand.
#[must_use]
pub fn operators_in_scalar_form(
    cfg: &ControlFlowGraph,
    ts: &TypeSystem,
    target: &TargetConfig,
) -> bool {
    cfg.operators()
        .all(|(_, op)| !has_wide_operand(op, cfg, ts, target))
}
