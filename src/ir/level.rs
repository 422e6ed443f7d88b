//! Classification of how far an operator still is from the target form.
//!
//! Every phase declares the highest [`OperatorLevel`] it may leave in the graph. Levels
//! only go down as rewrites apply; the engine checks the bound after each phase.

use strum::Display;

use crate::{
    config::TargetConfig,
    ir::{
        cfg::ControlFlowGraph,
        expression::Expression,
        operator::{Alu, CallKind, OpKind, Operator},
        registry::TypeSystem,
        types::BuiltinType,
        TypeId,
    },
};

/// Abstraction level of an operator, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum OperatorLevel {
    /// Word-sized, convention-bound, directly encodable
    Lowest,
    /// Explicit but not yet word-sized or convention-bound
    ScalarValues,
    /// No implicit faults, but still typed memory access or helper-bound arithmetic
    ConcreteTypesNoExceptions,
    /// Concrete types with explicit or flagged checks still pending
    ConcreteTypes,
    /// Object model operations: dispatch, allocation, casts, implicit faults
    HighLevel,
}

impl OperatorLevel {
    /// Classifies `op` for `target`.
    #[must_use]
    pub fn of(
        op: &Operator,
        cfg: &ControlFlowGraph,
        ts: &TypeSystem,
        target: &TargetConfig,
    ) -> Self {
        if op.kind.may_throw() {
            return Self::HighLevel;
        }

        match &op.kind {
            OpKind::Call {
                kind: CallKind::Virtual,
                ..
            }
            | OpKind::NewObject { .. }
            | OpKind::NewArray { .. }
            | OpKind::CastClass { .. }
            | OpKind::IsInstance { .. } => return Self::HighLevel,

            OpKind::NullCheck | OpKind::BoundsCheck | OpKind::OverflowCheck(_) => {
                return Self::ConcreteTypes
            }
            OpKind::Binary { check_overflow, .. }
            | OpKind::SignExtend { check_overflow, .. }
            | OpKind::ZeroExtend { check_overflow, .. }
            | OpKind::Truncate { check_overflow, .. }
            | OpKind::Convert { check_overflow, .. }
                if *check_overflow =>
            {
                return Self::ConcreteTypes
            }

            OpKind::LoadField { .. }
            | OpKind::StoreField { .. }
            | OpKind::LoadFieldAddress { .. }
            | OpKind::LoadElement { .. }
            | OpKind::StoreElement { .. }
            | OpKind::LoadElementAddress { .. } => return Self::ConcreteTypesNoExceptions,
            _ => {}
        }

        if needs_helper(op, cfg, ts, target) {
            return Self::ConcreteTypesNoExceptions;
        }

        match op.kind {
            OpKind::Call { .. } | OpKind::Phi { .. } | OpKind::Pi(_) => {
                return Self::ScalarValues
            }
            _ => {}
        }

        if has_wide_operand(op, cfg, ts, target) {
            return Self::ScalarValues;
        }

        Self::Lowest
    }
}

fn words_of(expr: &Expression, cfg: &ControlFlowGraph, ts: &TypeSystem) -> u32 {
    ts.size_in_words(cfg.expression_type(expr))
}

fn is_float(expr: &Expression, cfg: &ControlFlowGraph, ts: &TypeSystem) -> bool {
    ts.is_floating_point(cfg.expression_type(expr))
}

/// Returns `true` if `op` can only be expressed on `target` through a runtime helper.
pub(crate) fn needs_helper(
    op: &Operator,
    cfg: &ControlFlowGraph,
    ts: &TypeSystem,
    target: &TargetConfig,
) -> bool {
    let any_float = || op.args.iter().any(|a| is_float(a, cfg, ts));

    match &op.kind {
        OpKind::Binary { alu, .. } => {
            if !target.has_fpu && any_float() {
                return true;
            }
            let wide = op.args.first().is_some_and(|a| words_of(a, cfg, ts) == 2);
            match alu {
                Alu::Mul | Alu::Div | Alu::Rem if wide => !any_float(),
                Alu::Div | Alu::Rem => !target.has_hardware_divide && !any_float(),
                Alu::Shl | Alu::Shr if wide => op.args.get(1).and_then(Expression::int_value) != Some(32),
                _ => false,
            }
        }
        OpKind::Unary { .. }
        | OpKind::Compare
        | OpKind::CompareAndSet(_)
        | OpKind::CompareBranch { .. } => !target.has_fpu && any_float(),
        OpKind::Convert { input, output, .. } => {
            let long = |t: &BuiltinType| matches!(t, BuiltinType::Int64 | BuiltinType::UInt64);
            (!target.has_fpu && (input.is_floating_point() || output.is_floating_point()))
                || long(input)
                || long(output)
        }
        _ => false,
    }
}

pub(crate) fn has_wide_operand(
    op: &Operator,
    cfg: &ControlFlowGraph,
    ts: &TypeSystem,
    target: &TargetConfig,
) -> bool {
    if matches!(op.kind, OpKind::LongBinary { .. } | OpKind::LongCompare) {
        // Defined over word operands; a wide result is split into [lo, hi]
        return op.results.len() == 1 && op.results.iter().any(|r| {
            ts.size_in_words(cfg.var_type(*r)) > 1
        });
    }

    op.results.iter().any(|r| is_wide(ts, target, cfg.var_type(*r)))
        || op.args.iter().any(|a| is_wide(ts, target, cfg.expression_type(a)))
}

/// Returns `true` if a value of `ty` must be split into word-sized fragments on `target`.
///
/// Doubles stay whole when the target has a floating point unit.
pub(crate) fn is_wide(ts: &TypeSystem, target: &TargetConfig, ty: TypeId) -> bool {
    ts.size_in_words(ty) > 1 && !(target.has_fpu && ty == BuiltinType::Double.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{MethodId, TypeSystemBuilder};

    fn setup() -> (ControlFlowGraph, TypeSystem) {
        let ts = TypeSystemBuilder::new().with_runtime_support().build();
        let cfg = ControlFlowGraph::new(MethodId::new(0), None);
        (cfg, ts)
    }

    #[test]
    fn test_ordering() {
        assert!(OperatorLevel::HighLevel > OperatorLevel::ConcreteTypes);
        assert!(OperatorLevel::ConcreteTypes > OperatorLevel::ConcreteTypesNoExceptions);
        assert!(OperatorLevel::ScalarValues > OperatorLevel::Lowest);
    }

    #[test]
    fn test_div_depends_on_target() {
        let (mut cfg, ts) = setup();
        let int = BuiltinType::Int32.id();
        let (a, b, c) = (
            cfg.allocate_temporary(int),
            cfg.allocate_temporary(int),
            cfg.allocate_temporary(int),
        );
        let div = Operator::binary(Alu::Div, true, c, a, b);

        let soft = TargetConfig::new();
        let hard = TargetConfig::new().with_hardware_divide(true);
        assert_eq!(
            OperatorLevel::of(&div, &cfg, &ts, &soft),
            OperatorLevel::ConcreteTypesNoExceptions
        );
        assert_eq!(OperatorLevel::of(&div, &cfg, &ts, &hard), OperatorLevel::Lowest);
    }

    #[test]
    fn test_wide_add_is_scalar_level() {
        let (mut cfg, ts) = setup();
        let long = BuiltinType::Int64.id();
        let (a, b, c) = (
            cfg.allocate_temporary(long),
            cfg.allocate_temporary(long),
            cfg.allocate_temporary(long),
        );
        let add = Operator::binary(Alu::Add, true, c, a, b);
        assert_eq!(
            OperatorLevel::of(&add, &cfg, &ts, &TargetConfig::new()),
            OperatorLevel::ScalarValues
        );

        let shl = Operator::binary(Alu::Shl, true, c, a, Expression::int(BuiltinType::Int32.id(), 32));
        assert_eq!(
            OperatorLevel::of(&shl, &cfg, &ts, &TargetConfig::new()),
            OperatorLevel::ScalarValues
        );
        let shl_var = Operator::binary(Alu::Shl, true, c, a, b);
        assert_eq!(
            OperatorLevel::of(&shl_var, &cfg, &ts, &TargetConfig::new()),
            OperatorLevel::ConcreteTypesNoExceptions
        );
    }

    #[test]
    fn test_double_is_wide_only_without_fpu() {
        let (mut cfg, ts) = setup();
        let double = BuiltinType::Double.id();
        let (a, b) = (cfg.allocate_temporary(double), cfg.allocate_temporary(double));
        let assign = Operator::assign(b, a);
        assert_eq!(
            OperatorLevel::of(&assign, &cfg, &ts, &TargetConfig::new()),
            OperatorLevel::ScalarValues
        );
        assert_eq!(
            OperatorLevel::of(&assign, &cfg, &ts, &TargetConfig::new().with_fpu(true)),
            OperatorLevel::Lowest
        );
    }
}
