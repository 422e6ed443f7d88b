//! Statically known array lengths.
//!
//! An allocation with a constant length is annotated with that length. The fact flows
//! through copies, phis and pis, so a length load on any alias can be folded.

use crate::{
    analysis::lattice::{Flat, MeetSemiLattice},
    ir::{AnnotationFlags, ControlFlowGraph, Expression, OpKind, VarId},
};

/// Per-variable fixed array lengths of one graph.
#[derive(Debug, Clone)]
pub struct FixedLengths {
    facts: Vec<Flat<u32>>,
}

impl FixedLengths {
    /// Solves the fixed lengths of every variable of `cfg`.
    #[must_use]
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let mut lengths = Self {
            facts: vec![Flat::Top; cfg.var_count()],
        };
        let mut defined = vec![false; cfg.var_count()];
        for arg in cfg.arguments() {
            lengths.facts[arg.index()] = Flat::Bottom;
            defined[arg.index()] = true;
        }

        loop {
            let mut changed = false;
            for (_, op) in cfg.operators() {
                let Some(result) = op.result() else {
                    continue;
                };
                defined[result.index()] = true;

                let value = if op.annotations.has(AnnotationFlags::FIXED_LENGTH) {
                    op.annotations.fixed_length.map_or(Flat::Bottom, Flat::Value)
                } else {
                    match &op.kind {
                        OpKind::Assign | OpKind::Pi(_) => {
                            op.arg(0).map_or(Flat::Bottom, |src| lengths.of(src))
                        }
                        OpKind::Phi { .. } => op
                            .args
                            .iter()
                            .fold(Flat::Top, |acc, arg| acc.meet(&lengths.of(arg))),
                        _ => Flat::Bottom,
                    }
                };

                let merged = lengths.facts[result.index()].meet(&value);
                if merged != lengths.facts[result.index()] {
                    lengths.facts[result.index()] = merged;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (fact, defined) in lengths.facts.iter_mut().zip(defined) {
            if !defined {
                *fact = Flat::Bottom;
            }
        }
        lengths
    }

    fn of(&self, expr: &Expression) -> Flat<u32> {
        match expr {
            Expression::Var(v) => self.facts.get(v.index()).copied().unwrap_or(Flat::Bottom),
            Expression::Const(_) => Flat::Bottom,
        }
    }

    /// The fixed length of the array held by `var`, if proven.
    #[must_use]
    pub fn length_of(&self, var: VarId) -> Option<u32> {
        self.facts.get(var.index()).and_then(Flat::value)
    }
}
