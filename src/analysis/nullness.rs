//! Null provability over definition chains.
//!
//! Each variable starts at top and is lowered by the facts of its definitions until
//! nothing changes. A phi requires all incoming values to agree; a pi placed after a
//! comparison against null narrows its source on that edge.

use crate::{
    analysis::lattice::{Flat, MeetSemiLattice},
    ir::{
        AnnotationFlags, CompareCondition, ConstValue, ControlFlowGraph, Expression, OpId, OpKind,
        Operator, TypeSystem, VarId, VarKind, WellKnownMethod,
    },
    Result,
};

/// What is known about a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullness {
    /// Always null
    Null,
    /// Never null
    NotNull,
}

/// Per-variable null facts of one graph.
#[derive(Debug, Clone)]
pub struct NullnessAnalysis {
    facts: Vec<Flat<Nullness>>,
}

impl NullnessAnalysis {
    /// Solves the null facts of every variable of `cfg`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if an operator annotated as never producing null is
    /// proven to produce null.
    pub fn compute(cfg: &ControlFlowGraph, ts: &TypeSystem) -> Result<Self> {
        let mut analysis = Self {
            facts: vec![Flat::Top; cfg.var_count()],
        };

        let is_instance = ts
            .get_method(cfg.method())
            .is_some_and(|md| md.is_instance());
        for (index, arg) in cfg.arguments().iter().enumerate() {
            let fact = if (index == 0 && is_instance) || ts.is_managed_pointer(cfg.var_type(*arg)) {
                Flat::Value(Nullness::NotNull)
            } else {
                Flat::Bottom
            };
            analysis.facts[arg.index()] = fact;
        }

        loop {
            let mut changed = false;
            for (_, op) in cfg.operators() {
                let Some(result) = op.result() else {
                    continue;
                };
                if matches!(cfg.var(result).kind, VarKind::ConditionCode) {
                    continue;
                }
                let value = analysis.transfer(op, result, cfg, ts);
                let merged = analysis.facts[result.index()].meet(&value);
                if merged != analysis.facts[result.index()] {
                    analysis.facts[result.index()] = merged;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // Variables never defined carry no information
        let mut defined = vec![false; cfg.var_count()];
        for (_, op) in cfg.operators() {
            for result in &op.results {
                defined[result.index()] = true;
            }
        }
        for (fact, defined) in analysis.facts.iter_mut().zip(defined) {
            if *fact == Flat::Top && !defined {
                *fact = Flat::Bottom;
            }
        }

        for (id, op) in cfg.operators() {
            analysis.check_annotation(id, op, ts)?;
        }
        Ok(analysis)
    }

    /// The fact of a variable.
    #[must_use]
    pub fn fact(&self, var: VarId) -> Flat<Nullness> {
        self.facts.get(var.index()).copied().unwrap_or(Flat::Bottom)
    }

    /// The fact of an operand.
    #[must_use]
    pub fn of(&self, expr: &Expression) -> Flat<Nullness> {
        match expr {
            Expression::Var(v) => self.fact(*v),
            Expression::Const(c) => constant_fact(c.value),
        }
    }

    /// Returns `true` if the operand is proven never null.
    #[must_use]
    pub fn is_not_null(&self, expr: &Expression) -> bool {
        self.of(expr) == Flat::Value(Nullness::NotNull)
    }

    /// Returns `true` if the operand is proven always null.
    #[must_use]
    pub fn is_null(&self, expr: &Expression) -> bool {
        self.of(expr) == Flat::Value(Nullness::Null)
    }

    fn transfer(
        &self,
        op: &Operator,
        result: VarId,
        cfg: &ControlFlowGraph,
        ts: &TypeSystem,
    ) -> Flat<Nullness> {
        let computed = self.computed(op, ts);
        if computed == Flat::Bottom
            && (op.annotations.has(AnnotationFlags::NOT_NULL)
                || ts.is_managed_pointer(cfg.var_type(result)))
        {
            return Flat::Value(Nullness::NotNull);
        }
        computed
    }

    /// The fact implied by the operator itself, ignoring annotations.
    fn computed(&self, op: &Operator, ts: &TypeSystem) -> Flat<Nullness> {
        let not_null = Flat::Value(Nullness::NotNull);
        match &op.kind {
            OpKind::Assign => op.arg(0).map_or(Flat::Bottom, |src| self.of(src)),
            OpKind::Phi { .. } => op
                .args
                .iter()
                .fold(Flat::Top, |acc, arg| acc.meet(&self.of(arg))),
            OpKind::Pi(cmp) => {
                let (Some(src), Some(left), Some(right)) = (op.arg(0), op.arg(1), op.arg(2)) else {
                    return Flat::Bottom;
                };
                let against_null = (left == src && right.is_zero_constant())
                    || (right == src && left.is_zero_constant());
                match cmp.cond {
                    CompareCondition::Ne if against_null => not_null,
                    CompareCondition::Eq if against_null => Flat::Value(Nullness::Null),
                    _ => self.of(src),
                }
            }
            OpKind::LoadFieldAddress { .. } | OpKind::LoadElementAddress { .. } => not_null,
            OpKind::Call { method, .. } => {
                let allocates = [
                    WellKnownMethod::AllocateObject,
                    WellKnownMethod::AllocateArray,
                    WellKnownMethod::FastAllocateString,
                    WellKnownMethod::FastAllocateReferenceCountingString,
                    WellKnownMethod::VTableGet,
                    WellKnownMethod::VTableGetInterface,
                ];
                if allocates.iter().any(|wkm| ts.is_well_known(*method, *wkm)) {
                    not_null
                } else {
                    Flat::Bottom
                }
            }
            _ => Flat::Bottom,
        }
    }

    fn check_annotation(&self, id: OpId, op: &Operator, ts: &TypeSystem) -> Result<()> {
        if op.annotations.has(AnnotationFlags::NOT_NULL)
            && self.computed(op, ts) == Flat::Value(Nullness::Null)
        {
            return Err(consistency_error!(
                id,
                "'{}' is annotated as never null but always produces null",
                op
            ));
        }
        Ok(())
    }
}

fn constant_fact(value: ConstValue) -> Flat<Nullness> {
    match value {
        ConstValue::Null | ConstValue::Int(0) => Flat::Value(Nullness::Null),
        _ => Flat::Value(Nullness::NotNull),
    }
}
