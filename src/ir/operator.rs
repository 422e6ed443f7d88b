//! The operator tagged union.
//!
//! Every IR instruction is an [`Operator`]: an [`OpKind`] plus result variables, argument
//! expressions and an [`Annotations`] set. The argument layout of each kind is fixed and
//! documented on the variant; passes index `args`/`results` positionally.

use std::fmt;

use strum::{AsRefStr, Display, EnumDiscriminants, EnumIter};

use crate::ir::{
    annotation::Annotations, expression::Expression, types::BuiltinType, BlockId, FieldId,
    MethodId, TypeId, VarId,
};

/// Binary arithmetic and logic operations.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Alu {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl Alu {
    /// Returns `true` for shifts.
    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr)
    }

    /// Returns `true` for bitwise operations, which act on each word independently.
    #[must_use]
    pub fn is_bitwise(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor)
    }

    /// Returns `true` if operands can be swapped.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor)
    }
}

/// Unary operations.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnaryAlu {
    Neg,
    Not,
    /// Checks a float is finite (raises on NaN/infinity)
    Finite,
}

/// Carry participation of a word-sized arithmetic operator.
///
/// With `Out`/`InOut` the operator has a second result holding the condition code;
/// with `In`/`InOut` it has a trailing argument consuming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Carry {
    /// Plain operation
    #[default]
    None,
    /// Produces flags
    Out,
    /// Consumes the carry of a previous operation
    In,
    /// Consumes a carry and produces flags
    InOut,
}

impl Carry {
    /// Returns `true` if a condition code result is produced.
    #[must_use]
    pub fn produces(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }

    /// Returns `true` if a condition code argument is consumed.
    #[must_use]
    pub fn consumes(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }
}

/// Relational operator of a comparison.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CompareCondition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A relational test between two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Comparison {
    /// Relation
    pub cond: CompareCondition,
    /// Signed or unsigned interpretation
    pub signed: bool,
}

impl Comparison {
    /// Creates a comparison.
    #[must_use]
    pub const fn new(cond: CompareCondition, signed: bool) -> Self {
        Self { cond, signed }
    }

    /// Equality test.
    #[must_use]
    pub const fn eq() -> Self {
        Self::new(CompareCondition::Eq, false)
    }

    /// Inequality test.
    #[must_use]
    pub const fn ne() -> Self {
        Self::new(CompareCondition::Ne, false)
    }

    /// The same relation with the operands swapped (`a < b` is `b > a`).
    #[must_use]
    pub fn mirror(self) -> Self {
        let cond = match self.cond {
            CompareCondition::Lt => CompareCondition::Gt,
            CompareCondition::Le => CompareCondition::Ge,
            CompareCondition::Gt => CompareCondition::Lt,
            CompareCondition::Ge => CompareCondition::Le,
            other => other,
        };
        Self { cond, ..self }
    }

    /// The logical complement (`a < b` becomes `a >= b`).
    #[must_use]
    pub fn negate(self) -> Self {
        let cond = match self.cond {
            CompareCondition::Eq => CompareCondition::Ne,
            CompareCondition::Ne => CompareCondition::Eq,
            CompareCondition::Lt => CompareCondition::Ge,
            CompareCondition::Le => CompareCondition::Gt,
            CompareCondition::Gt => CompareCondition::Le,
            CompareCondition::Ge => CompareCondition::Lt,
        };
        Self { cond, ..self }
    }

    /// Returns `true` for `Eq`/`Ne`.
    #[must_use]
    pub fn is_equality(self) -> bool {
        matches!(self.cond, CompareCondition::Eq | CompareCondition::Ne)
    }

    /// Evaluates the relation over two constants.
    #[must_use]
    pub fn evaluate(self, left: i64, right: i64) -> bool {
        let ord = if self.signed {
            left.cmp(&right)
        } else {
            #[allow(clippy::cast_sign_loss)]
            (left as u64).cmp(&(right as u64))
        };
        match self.cond {
            CompareCondition::Eq => ord.is_eq(),
            CompareCondition::Ne => ord.is_ne(),
            CompareCondition::Lt => ord.is_lt(),
            CompareCondition::Le => ord.is_le(),
            CompareCondition::Gt => ord.is_gt(),
            CompareCondition::Ge => ord.is_ge(),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signed || self.is_equality() {
            write!(f, "{}", self.cond)
        } else {
            write!(f, "{}.un", self.cond)
        }
    }
}

/// Processor condition tested by a flags consumer.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ConditionCode {
    Equal,
    NotEqual,
    CarrySet,
    CarryClear,
    Negative,
    PositiveOrZero,
    Overflow,
    NoOverflow,
    UnsignedHigher,
    UnsignedLowerOrSame,
    SignedGreaterOrEqual,
    SignedLess,
    SignedGreater,
    SignedLessOrEqual,
}

impl ConditionCode {
    /// Flag test equivalent to `left cmp right` after a `Compare left, right`.
    #[must_use]
    pub fn from_comparison(cmp: Comparison) -> Self {
        match (cmp.cond, cmp.signed) {
            (CompareCondition::Eq, _) => Self::Equal,
            (CompareCondition::Ne, _) => Self::NotEqual,
            (CompareCondition::Lt, true) => Self::SignedLess,
            (CompareCondition::Lt, false) => Self::CarryClear,
            (CompareCondition::Le, true) => Self::SignedLessOrEqual,
            (CompareCondition::Le, false) => Self::UnsignedLowerOrSame,
            (CompareCondition::Gt, true) => Self::SignedGreater,
            (CompareCondition::Gt, false) => Self::UnsignedHigher,
            (CompareCondition::Ge, true) => Self::SignedGreaterOrEqual,
            (CompareCondition::Ge, false) => Self::CarrySet,
        }
    }

    /// The relation this flag test decides after a compare, if it is one.
    #[must_use]
    pub fn to_comparison(self) -> Option<Comparison> {
        let (cond, signed) = match self {
            Self::Equal => (CompareCondition::Eq, false),
            Self::NotEqual => (CompareCondition::Ne, false),
            Self::SignedLess => (CompareCondition::Lt, true),
            Self::CarryClear => (CompareCondition::Lt, false),
            Self::SignedLessOrEqual => (CompareCondition::Le, true),
            Self::UnsignedLowerOrSame => (CompareCondition::Le, false),
            Self::SignedGreater => (CompareCondition::Gt, true),
            Self::UnsignedHigher => (CompareCondition::Gt, false),
            Self::SignedGreaterOrEqual => (CompareCondition::Ge, true),
            Self::CarrySet => (CompareCondition::Ge, false),
            Self::Negative | Self::PositiveOrZero | Self::Overflow | Self::NoOverflow => {
                return None
            }
        };
        Some(Comparison::new(cond, signed))
    }

    /// The complementary flag test.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::CarrySet => Self::CarryClear,
            Self::CarryClear => Self::CarrySet,
            Self::Negative => Self::PositiveOrZero,
            Self::PositiveOrZero => Self::Negative,
            Self::Overflow => Self::NoOverflow,
            Self::NoOverflow => Self::Overflow,
            Self::UnsignedHigher => Self::UnsignedLowerOrSame,
            Self::UnsignedLowerOrSame => Self::UnsignedHigher,
            Self::SignedGreaterOrEqual => Self::SignedLess,
            Self::SignedLess => Self::SignedGreaterOrEqual,
            Self::SignedGreater => Self::SignedLessOrEqual,
            Self::SignedLessOrEqual => Self::SignedGreater,
        }
    }
}

/// Dispatch form of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CallKind {
    /// Statically bound call to a non-overridable method
    Direct,
    /// Dispatched through the receiver's vtable or interface table
    Virtual,
    /// Statically bound to a resolved override
    Overridden,
    /// Through a code pointer passed as the first argument
    Indirect,
}

/// Source location of an operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugInfo {
    /// Source file
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// The kind of an operator and its kind-specific payload.
///
/// Argument and result layout per variant is given in brackets: `[results] <- [args]`.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(
    name(OpTag),
    derive(Hash, EnumIter, Display, AsRefStr),
    doc = "The payload-free kind of an operator, used to match and count operators."
)]
pub enum OpKind {
    /// `[dst] <- [src]`
    Assign,
    /// Copies one word between a wide and a narrow variable. `[dst] <- [src]`
    PartialAssign {
        /// Byte offset written in the destination
        dst_offset: u32,
        /// Byte offset read from the source
        src_offset: u32,
    },
    /// `[dst, cc?] <- [left, right, cc?]`
    Binary {
        /// Operation
        alu: Alu,
        /// Signed interpretation
        signed: bool,
        /// Raises on overflow
        check_overflow: bool,
        /// Carry participation
        carry: Carry,
    },
    /// One-word operands with a two-word result. `[lo, hi] or [wide] <- [left, right]`
    LongBinary {
        /// Operation
        alu: Alu,
        /// Signed interpretation
        signed: bool,
    },
    /// `[dst] <- [src]`
    Unary {
        /// Operation
        alu: UnaryAlu,
        /// Signed interpretation
        signed: bool,
    },
    /// Sets flags from `left - right`. `[cc] <- [left, right]`
    Compare,
    /// Chained multi-word compare. `[cc] <- [left words.., right words..]`
    LongCompare,
    /// `[bool] <- [left, right]`
    CompareAndSet(Comparison),
    /// `[bool] <- [cc]`
    SetIfConditionCode(ConditionCode),
    /// `[dst] <- [src]`
    SignExtend {
        /// Significant bytes of the source
        significant: u32,
        /// Raises if the value does not fit
        check_overflow: bool,
    },
    /// `[dst] <- [src]`
    ZeroExtend {
        /// Significant bytes of the source
        significant: u32,
        /// Raises if the value does not fit
        check_overflow: bool,
    },
    /// `[dst] <- [src]`
    Truncate {
        /// Significant bytes kept
        significant: u32,
        /// Raises if significant bits are lost
        check_overflow: bool,
    },
    /// Numeric conversion involving a floating point type. `[dst] <- [src]`
    Convert {
        /// Source representation
        input: BuiltinType,
        /// Destination representation
        output: BuiltinType,
        /// Raises if the value does not fit
        check_overflow: bool,
    },
    /// `[dst] <- [object]`
    LoadField {
        /// Accessed field
        field: FieldId,
        /// Implicit null check still pending
        may_throw: bool,
    },
    /// `[] <- [object, value]`
    StoreField {
        /// Accessed field
        field: FieldId,
        /// Implicit null check still pending
        may_throw: bool,
    },
    /// `[address] <- [object]`
    LoadFieldAddress {
        /// Accessed field
        field: FieldId,
        /// Implicit null check still pending
        may_throw: bool,
    },
    /// `[dst] <- [array, index]`
    LoadElement {
        /// Implicit null and bounds checks still pending
        may_throw: bool,
    },
    /// `[] <- [array, index, value]`
    StoreElement {
        /// Implicit null and bounds checks still pending
        may_throw: bool,
    },
    /// `[address] <- [array, index]`
    LoadElementAddress {
        /// Implicit null and bounds checks still pending
        may_throw: bool,
    },
    /// `[dst] <- [address]`
    LoadIndirect {
        /// Type of the value in memory
        ty: TypeId,
        /// Byte offset added to the address
        offset: u32,
        /// Field this access came from
        path: Option<FieldId>,
        /// Implicit null check still pending
        may_throw: bool,
    },
    /// `[] <- [address, value]`
    StoreIndirect {
        /// Type of the value in memory
        ty: TypeId,
        /// Byte offset added to the address
        offset: u32,
        /// Field this access came from
        path: Option<FieldId>,
        /// Implicit null check still pending
        may_throw: bool,
    },
    /// `[object] <- []`
    NewObject {
        /// Allocated type
        ty: TypeId,
    },
    /// `[array] <- [length]`
    NewArray {
        /// Array type
        ty: TypeId,
    },
    /// `[object] <- [object]`
    CastClass {
        /// Target type
        ty: TypeId,
    },
    /// `[object or null] <- [object]`
    IsInstance {
        /// Tested type
        ty: TypeId,
    },
    /// `[result?] <- [code pointer (indirect only), this?, params..]`
    Call {
        /// Dispatch form
        kind: CallKind,
        /// Called or dispatched method
        method: MethodId,
        /// Implicit null check of `this` still pending
        may_throw: bool,
    },
    /// Convention-bound call. `[result registers..] <- [argument locations..]`
    DirectSubroutine {
        /// Called method
        method: MethodId,
    },
    /// Convention-bound call through a pointer. `[result registers..] <- [code pointer, argument locations..]`
    IndirectSubroutine {
        /// Dispatched method
        method: MethodId,
    },
    /// `[] <- [object]`
    NullCheck,
    /// `[] <- [array, index]`
    BoundsCheck,
    /// `[] <- [cc]`
    OverflowCheck(ConditionCode),
    /// `[dst] <- [value per origin]`
    Phi {
        /// Predecessor each argument flows in from
        origins: Vec<BlockId>,
    },
    /// `dst = src`, valid where `left cmp right` holds. `[dst] <- [src, left, right]`
    Pi(Comparison),
    /// `[exception] <- []`
    FetchException,
    /// `[] <- []`
    Jump {
        /// Destination
        target: BlockId,
    },
    /// Taken when the argument is non-zero. `[] <- [value]`
    BinaryBranch {
        /// Zero
        not_taken: BlockId,
        /// Non-zero
        taken: BlockId,
    },
    /// Taken when `left cmp right`. `[] <- [left, right]`
    CompareBranch {
        /// Relation tested
        cmp: Comparison,
        /// Relation false
        not_taken: BlockId,
        /// Relation true
        taken: BlockId,
    },
    /// Taken when the condition holds. `[] <- [cc]`
    CcBranch {
        /// Flag test
        cond: ConditionCode,
        /// Condition false
        not_taken: BlockId,
        /// Condition true
        taken: BlockId,
    },
    /// `[] <- [selector]`
    Switch {
        /// Out of range target
        default: BlockId,
        /// Target per selector value
        targets: Vec<BlockId>,
    },
    /// `[] <- [return words..]`
    Return,
    /// `[] <- [exception]`
    Throw,
    /// `[] <- []`
    Rethrow,
    /// Unreachable. `[] <- []`
    Dead,
}

impl OpKind {
    /// Returns `true` for a still-pending implicit fault.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        match self {
            Self::LoadField { may_throw, .. }
            | Self::StoreField { may_throw, .. }
            | Self::LoadFieldAddress { may_throw, .. }
            | Self::LoadElement { may_throw }
            | Self::StoreElement { may_throw }
            | Self::LoadElementAddress { may_throw }
            | Self::LoadIndirect { may_throw, .. }
            | Self::StoreIndirect { may_throw, .. }
            | Self::Call { may_throw, .. } => *may_throw,
            _ => false,
        }
    }

    /// Clears the implicit fault flag after the check has been made explicit.
    pub fn clear_may_throw(&mut self) {
        match self {
            Self::LoadField { may_throw, .. }
            | Self::StoreField { may_throw, .. }
            | Self::LoadFieldAddress { may_throw, .. }
            | Self::LoadElement { may_throw }
            | Self::StoreElement { may_throw }
            | Self::LoadElementAddress { may_throw }
            | Self::LoadIndirect { may_throw, .. }
            | Self::StoreIndirect { may_throw, .. }
            | Self::Call { may_throw, .. } => *may_throw = false,
            _ => {}
        }
    }
}

impl OpTag {
    /// Returns `true` for control transfer operators.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump
                | Self::BinaryBranch
                | Self::CompareBranch
                | Self::CcBranch
                | Self::Switch
                | Self::Return
                | Self::Throw
                | Self::Rethrow
                | Self::Dead
        )
    }

    /// Returns `true` for conditional branches.
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Self::BinaryBranch | Self::CompareBranch | Self::CcBranch
        )
    }

    /// Returns `true` for any call form.
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Self::Call | Self::DirectSubroutine | Self::IndirectSubroutine
        )
    }
}

/// A single IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    /// Kind and payload
    pub kind: OpKind,
    /// Variables written
    pub results: Vec<VarId>,
    /// Operands read
    pub args: Vec<Expression>,
    /// Attached facts
    pub annotations: Annotations,
    /// Source location
    pub debug: Option<DebugInfo>,
    /// Owning block, maintained by the graph
    pub(crate) block: Option<BlockId>,
}

impl Operator {
    /// Creates an operator.
    #[must_use]
    pub fn new(kind: OpKind, results: Vec<VarId>, args: Vec<Expression>) -> Self {
        Self {
            kind,
            results,
            args,
            annotations: Annotations::default(),
            debug: None,
            block: None,
        }
    }

    /// `dst = src`
    #[must_use]
    pub fn assign(dst: VarId, src: impl Into<Expression>) -> Self {
        Self::new(OpKind::Assign, vec![dst], vec![src.into()])
    }

    /// Plain word operation `dst = left alu right`.
    #[must_use]
    pub fn binary(
        alu: Alu,
        signed: bool,
        dst: VarId,
        left: impl Into<Expression>,
        right: impl Into<Expression>,
    ) -> Self {
        Self::new(
            OpKind::Binary {
                alu,
                signed,
                check_overflow: false,
                carry: Carry::None,
            },
            vec![dst],
            vec![left.into(), right.into()],
        )
    }

    /// A statically bound call.
    #[must_use]
    pub fn call(method: MethodId, result: Option<VarId>, args: Vec<Expression>) -> Self {
        Self::new(
            OpKind::Call {
                kind: CallKind::Direct,
                method,
                may_throw: false,
            },
            result.into_iter().collect(),
            args,
        )
    }

    /// Unconditional jump.
    #[must_use]
    pub fn jump(target: BlockId) -> Self {
        Self::new(OpKind::Jump { target }, Vec::new(), Vec::new())
    }

    /// Unreachable marker.
    #[must_use]
    pub fn dead() -> Self {
        Self::new(OpKind::Dead, Vec::new(), Vec::new())
    }

    /// Attaches annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// Attaches a source location.
    #[must_use]
    pub fn with_debug(mut self, debug: Option<DebugInfo>) -> Self {
        self.debug = debug;
        self
    }

    /// The discriminant of the kind.
    #[must_use]
    pub fn tag(&self) -> OpTag {
        OpTag::from(&self.kind)
    }

    /// The block holding this operator.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Returns `true` for control transfer operators.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.tag().is_terminator()
    }

    /// First result, if any.
    #[must_use]
    pub fn result(&self) -> Option<VarId> {
        self.results.first().copied()
    }

    /// Argument `index`, if present.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Expression> {
        self.args.get(index)
    }

    /// Successor blocks of a terminator, in target order.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.kind {
            OpKind::Jump { target } => vec![*target],
            OpKind::BinaryBranch { not_taken, taken }
            | OpKind::CompareBranch {
                not_taken, taken, ..
            }
            | OpKind::CcBranch {
                not_taken, taken, ..
            } => vec![*not_taken, *taken],
            OpKind::Switch { default, targets } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Rewrites every edge to `from` so it goes to `to`.
    pub fn redirect_target(&mut self, from: BlockId, to: BlockId) {
        let swap = |b: &mut BlockId| {
            if *b == from {
                *b = to;
            }
        };
        match &mut self.kind {
            OpKind::Jump { target } => swap(target),
            OpKind::BinaryBranch { not_taken, taken }
            | OpKind::CompareBranch {
                not_taken, taken, ..
            }
            | OpKind::CcBranch {
                not_taken, taken, ..
            } => {
                swap(not_taken);
                swap(taken);
            }
            OpKind::Switch { default, targets } => {
                swap(default);
                targets.iter_mut().for_each(swap);
            }
            OpKind::Phi { origins } => origins.iter_mut().for_each(swap),
            _ => {}
        }
    }

    /// Returns `true` if removing the operator could change behavior even when its
    /// results are unused.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        use crate::ir::AnnotationFlags;

        if self.kind.may_throw() || self.annotations.has(AnnotationFlags::MEMORY_MAPPED) {
            return true;
        }
        match &self.kind {
            OpKind::Binary { check_overflow, .. }
            | OpKind::SignExtend { check_overflow, .. }
            | OpKind::ZeroExtend { check_overflow, .. }
            | OpKind::Truncate { check_overflow, .. }
            | OpKind::Convert { check_overflow, .. } => *check_overflow,
            OpKind::Unary { alu, .. } => *alu == UnaryAlu::Finite,
            OpKind::StoreField { .. }
            | OpKind::StoreElement { .. }
            | OpKind::StoreIndirect { .. }
            | OpKind::NewObject { .. }
            | OpKind::NewArray { .. }
            | OpKind::CastClass { .. }
            | OpKind::Call { .. }
            | OpKind::DirectSubroutine { .. }
            | OpKind::IndirectSubroutine { .. }
            | OpKind::NullCheck
            | OpKind::BoundsCheck
            | OpKind::OverflowCheck(_)
            | OpKind::FetchException => true,
            kind => OpTag::from(kind).is_terminator(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.results.is_empty() {
            let results: Vec<String> = self.results.iter().map(ToString::to_string).collect();
            write!(f, "{} = ", results.join(", "))?;
        }

        match &self.kind {
            OpKind::Binary {
                alu,
                signed,
                check_overflow,
                carry,
            } => {
                write!(f, "{alu}")?;
                if !signed {
                    write!(f, ".un")?;
                }
                if *check_overflow {
                    write!(f, ".ovf")?;
                }
                if *carry != Carry::None {
                    write!(f, ".carry{carry:?}")?;
                }
            }
            OpKind::LongBinary { alu, .. } => write!(f, "Long{alu}")?,
            OpKind::Unary { alu, .. } => write!(f, "{alu}")?,
            OpKind::CompareAndSet(cmp) => write!(f, "Set{cmp}")?,
            OpKind::SetIfConditionCode(cc) => write!(f, "SetIf{cc}")?,
            OpKind::OverflowCheck(cc) => write!(f, "OverflowCheck.{cc}")?,
            OpKind::Pi(cmp) => write!(f, "Pi.{cmp}")?,
            OpKind::Call { kind, method, .. } => write!(f, "Call.{kind} {method}")?,
            OpKind::DirectSubroutine { method } | OpKind::IndirectSubroutine { method } => {
                write!(f, "{} {method}", self.tag())?;
            }
            OpKind::LoadField { field, .. }
            | OpKind::StoreField { field, .. }
            | OpKind::LoadFieldAddress { field, .. } => write!(f, "{} {field}", self.tag())?,
            OpKind::LoadIndirect { offset, .. } | OpKind::StoreIndirect { offset, .. } => {
                write!(f, "{}+{offset}", self.tag())?;
            }
            OpKind::CompareBranch { cmp, .. } => write!(f, "Branch.{cmp}")?,
            OpKind::CcBranch { cond, .. } => write!(f, "Branch.{cond}")?,
            _ => write!(f, "{}", self.tag())?,
        }

        for (i, arg) in self.args.iter().enumerate() {
            write!(f, "{}{arg}", if i == 0 { " " } else { ", " })?;
        }

        let successors = self.successors();
        if !successors.is_empty() {
            let targets: Vec<String> = successors.iter().map(ToString::to_string).collect();
            write!(f, " -> {}", targets.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_tag_names_each_kind() {
        let jump = Operator::jump(BlockId::new(1));
        assert_eq!(jump.tag(), OpTag::Jump);
        assert_eq!(OpTag::Jump.as_ref(), "Jump");
        let distinct: std::collections::HashSet<OpTag> = OpTag::iter().collect();
        assert_eq!(distinct.len(), OpTag::iter().count());
        assert!(OpTag::iter().any(|tag| tag == OpTag::LongCompare));
    }

    #[test]
    fn test_comparison_mirror_and_negate() {
        let lt = Comparison::new(CompareCondition::Lt, true);
        assert_eq!(lt.mirror().cond, CompareCondition::Gt);
        assert_eq!(lt.negate().cond, CompareCondition::Ge);
        assert_eq!(Comparison::eq().mirror(), Comparison::eq());
        assert!(lt.evaluate(-1, 0));
        assert!(!Comparison::new(CompareCondition::Lt, false).evaluate(-1, 0));
    }

    #[test]
    fn test_condition_code_round_trip() {
        for cc in ConditionCode::iter() {
            assert_eq!(cc.negate().negate(), cc);
            if let Some(cmp) = cc.to_comparison() {
                assert_eq!(ConditionCode::from_comparison(cmp), cc);
                assert_eq!(
                    ConditionCode::from_comparison(cmp.negate()),
                    cc.negate()
                );
            }
        }
    }

    #[test]
    fn test_successors_and_redirect() {
        let b0 = BlockId::new(0);
        let b1 = BlockId::new(1);
        let b2 = BlockId::new(2);
        let mut op = Operator::new(
            OpKind::BinaryBranch {
                not_taken: b1,
                taken: b1,
            },
            vec![],
            vec![Expression::Var(VarId::new(0))],
        );
        assert_eq!(op.successors(), vec![b1, b1]);
        op.redirect_target(b1, b2);
        assert_eq!(op.successors(), vec![b2, b2]);
        op.redirect_target(b0, b1);
        assert_eq!(op.successors(), vec![b2, b2]);
        assert!(op.is_terminator());
    }

    #[test]
    fn test_side_effects() {
        let pure = Operator::binary(
            Alu::Add,
            true,
            VarId::new(0),
            VarId::new(1),
            VarId::new(2),
        );
        assert!(!pure.has_side_effects());

        let mut checked = pure.clone();
        if let OpKind::Binary { check_overflow, .. } = &mut checked.kind {
            *check_overflow = true;
        }
        assert!(checked.has_side_effects());
        assert!(Operator::dead().has_side_effects());
    }

    #[test]
    fn test_display() {
        let op = Operator::binary(
            Alu::Div,
            true,
            VarId::new(2),
            VarId::new(0),
            VarId::new(1),
        );
        assert_eq!(op.to_string(), "v2 = Div v0, v1");
        assert_eq!(Operator::jump(BlockId::new(3)).to_string(), "Jump -> B3");
    }
}
