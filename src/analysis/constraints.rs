//! Difference constraints over integer variables (ABCD-style bounds proofs).
//!
//! Each definition contributes edges `v <= u + c` to the upper graph and `v >= u + c`
//! to the lower graph. A query `v <= t + c` walks the upper graph from `v`: every
//! definition group of `v` must hold, and within a group any one edge is enough. A pi
//! contributes a single group holding both its source and the relation it was placed
//! for; a phi contributes one group per incoming value.
//!
//! Loops show up as cycles. Revisiting a query that is still being proven with a
//! requirement at most as strong as the original is harmless (the loop only moves the
//! value away from the bound) and succeeds; a stronger requirement means the loop
//! pushes towards the bound and the proof fails.
//!
//! Array lengths are nodes of their own, keyed by the array variable after following
//! copies. A length is at least zero and equal to its statically known value when the
//! allocation fixed it.

use std::collections::HashMap;

use crate::{
    analysis::length::FixedLengths,
    ir::{
        Alu, AnnotationFlags, CompareCondition, Comparison, ConstValue, ControlFlowGraph,
        DataflowChains, Expression, OpKind, Operator, VarId,
    },
};

/// Recursion depth after which a query gives up.
const MAX_DEPTH: usize = 64;

/// A vertex of the constraint graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    /// An integer variable
    Var(VarId),
    /// A constant
    Const(i64),
    /// The length of the array held by a variable
    Length(VarId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bound {
    Upper,
    Lower,
}

impl Bound {
    fn flip(self) -> Self {
        match self {
            Self::Upper => Self::Lower,
            Self::Lower => Self::Upper,
        }
    }

    /// Whether `value` relates to `target + c` in this direction when both are constant.
    fn holds(self, value: i64, target: i64, c: i64) -> bool {
        let bound = i128::from(target) + i128::from(c);
        match self {
            Self::Upper => i128::from(value) <= bound,
            Self::Lower => i128::from(value) >= bound,
        }
    }

    /// Whether a revisited requirement `c_now` is implied by the pending one `c_active`.
    fn is_harmless(self, c_now: i64, c_active: i64) -> bool {
        match self {
            Self::Upper => c_now >= c_active,
            Self::Lower => c_now <= c_active,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    to: Node,
    weight: i64,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    holds: bool,
    /// Depends on a pending query and must not be cached
    cyclic: bool,
}

impl Outcome {
    fn settled(holds: bool) -> Self {
        Self {
            holds,
            cyclic: false,
        }
    }
}

type Groups = HashMap<Node, Vec<Vec<Edge>>>;

/// Upper and lower difference-constraint graphs of one method, with a query cache.
#[derive(Debug, Default)]
pub struct ConstraintSystem {
    upper: Groups,
    lower: Groups,
    /// Variables holding an array length, mapped to the length node
    lengths: HashMap<VarId, Node>,
    memo: HashMap<(Bound, Node, Node, i64), bool>,
    active: HashMap<(Bound, Node, Node), i64>,
}

impl ConstraintSystem {
    /// Builds the graphs from the definitions of `cfg`.
    #[must_use]
    pub fn new(cfg: &ControlFlowGraph, chains: &DataflowChains, fixed: &FixedLengths) -> Self {
        let mut system = Self::default();

        for index in 0..cfg.var_count() {
            let var = VarId::new(index);
            if let Some(array) = length_source(cfg, chains, var) {
                system.lengths.insert(var, Node::Length(array));
            }
        }

        for (_, op) in cfg.operators() {
            let Some(result) = op.result() else {
                continue;
            };
            if system.lengths.contains_key(&result) {
                continue;
            }
            let node = Node::Var(result);

            if let OpKind::Phi { .. } = op.kind {
                for arg in &op.args {
                    let group = system
                        .node(arg)
                        .map(|to| vec![Edge { to, weight: 0 }])
                        .unwrap_or_default();
                    system.upper.entry(node).or_default().push(group.clone());
                    system.lower.entry(node).or_default().push(group);
                }
                continue;
            }

            let (upper, lower) = system.definition_edges(cfg, chains, op);
            system.upper.entry(node).or_default().push(upper);
            system.lower.entry(node).or_default().push(lower);
        }

        // The value an argument enters with is unknown
        for arg in cfg.arguments() {
            let node = Node::Var(*arg);
            if system.upper.contains_key(&node) {
                system.upper.entry(node).or_default().push(Vec::new());
                system.lower.entry(node).or_default().push(Vec::new());
            }
        }

        let arrays: Vec<VarId> = system
            .lengths
            .values()
            .filter_map(|n| match n {
                Node::Length(array) => Some(*array),
                _ => None,
            })
            .collect();
        for array in arrays {
            let node = Node::Length(array);
            if system.lower.contains_key(&node) {
                continue;
            }
            let mut lower = vec![Edge {
                to: Node::Const(0),
                weight: 0,
            }];
            if let Some(n) = fixed.length_of(array) {
                let exact = Edge {
                    to: Node::Const(i64::from(n)),
                    weight: 0,
                };
                lower.push(exact);
                system.upper.insert(node, vec![vec![exact]]);
            }
            system.lower.insert(node, vec![lower]);
        }

        system
    }

    /// The graph node standing for an operand, or `None` for non-integer constants.
    #[must_use]
    pub fn node(&self, expr: &Expression) -> Option<Node> {
        match expr {
            Expression::Var(v) => Some(self.lengths.get(v).copied().unwrap_or(Node::Var(*v))),
            Expression::Const(c) => match c.value {
                ConstValue::Int(i) => Some(Node::Const(i)),
                ConstValue::Null => Some(Node::Const(0)),
                _ => None,
            },
        }
    }

    fn definition_edges(
        &self,
        cfg: &ControlFlowGraph,
        chains: &DataflowChains,
        op: &Operator,
    ) -> (Vec<Edge>, Vec<Edge>) {
        let mut upper = Vec::new();
        let mut lower = Vec::new();
        let both = |to: Node, weight: i64, upper: &mut Vec<Edge>, lower: &mut Vec<Edge>| {
            upper.push(Edge { to, weight });
            lower.push(Edge { to, weight });
        };

        match &op.kind {
            OpKind::Assign => {
                if let Some(to) = op.arg(0).and_then(|a| self.node(a)) {
                    both(to, 0, &mut upper, &mut lower);
                }
            }
            OpKind::Binary {
                alu: alu @ (Alu::Add | Alu::Sub),
                ..
            } => {
                let (Some(left), Some(right)) = (op.arg(0), op.arg(1)) else {
                    return (upper, lower);
                };
                let offset = match (alu, left.int_value(), right.int_value()) {
                    (_, None, Some(k)) => self.node(left).zip(signed_offset(*alu, k)),
                    (Alu::Add, Some(k), None) => self.node(right).map(|n| (n, k)),
                    _ => None,
                };
                if let Some((to, weight)) = offset {
                    both(to, weight, &mut upper, &mut lower);
                }
            }
            OpKind::Pi(relation) => {
                let (Some(src), Some(left), Some(right)) = (op.arg(0), op.arg(1), op.arg(2))
                else {
                    return (upper, lower);
                };
                if let Some(to) = self.node(src) {
                    both(to, 0, &mut upper, &mut lower);
                }
                let (other, relation) = if src == left && src != right {
                    (right, *relation)
                } else if src == right && src != left {
                    (left, relation.mirror())
                } else {
                    return (upper, lower);
                };
                let Some(other_node) = self.node(other) else {
                    return (upper, lower);
                };
                if !relation.signed && !relation.is_equality() {
                    let bounded = match other_node {
                        Node::Length(_) => true,
                        Node::Const(k) => k >= 0,
                        Node::Var(v) => length_source(cfg, chains, v).is_some(),
                    };
                    if !bounded || !matches!(relation.cond, CompareCondition::Lt | CompareCondition::Le)
                    {
                        return (upper, lower);
                    }
                    // Below a non-negative bound as unsigned means non-negative as signed
                    lower.push(Edge {
                        to: Node::Const(0),
                        weight: 0,
                    });
                }
                match relation.cond {
                    CompareCondition::Lt => upper.push(Edge {
                        to: other_node,
                        weight: -1,
                    }),
                    CompareCondition::Le => upper.push(Edge {
                        to: other_node,
                        weight: 0,
                    }),
                    CompareCondition::Gt => lower.push(Edge {
                        to: other_node,
                        weight: 1,
                    }),
                    CompareCondition::Ge => lower.push(Edge {
                        to: other_node,
                        weight: 0,
                    }),
                    CompareCondition::Eq => both(other_node, 0, &mut upper, &mut lower),
                    CompareCondition::Ne => {}
                }
            }
            _ => {}
        }

        (upper, lower)
    }

    /// Tries to prove `v <= u + c`.
    pub fn prove_upper(&mut self, v: Node, u: Node, c: i64) -> bool {
        self.prove(Bound::Upper, v, u, c, 0).holds
    }

    /// Tries to prove `v >= u + c`.
    pub fn prove_lower(&mut self, v: Node, u: Node, c: i64) -> bool {
        self.prove(Bound::Lower, v, u, c, 0).holds
    }

    /// Decides `left cmp right`: `Some(true)` if it always holds, `Some(false)` if it
    /// never does, `None` if unknown.
    pub fn decide(&mut self, cmp: Comparison, left: &Expression, right: &Expression) -> Option<bool> {
        if let (Some(l), Some(r)) = (left.int_value(), right.int_value()) {
            return Some(cmp.evaluate(l, r));
        }
        let l = self.node(left)?;
        let r = self.node(right)?;
        let zero = Node::Const(0);

        match cmp.cond {
            CompareCondition::Eq | CompareCondition::Ne => {
                let equal = if l == r || (self.at_most(l, r, 0) && self.at_least(l, r, 0)) {
                    Some(true)
                } else if self.at_most(l, r, -1) || self.at_least(l, r, 1) {
                    Some(false)
                } else {
                    None
                };
                equal.map(|eq| eq == (cmp.cond == CompareCondition::Eq))
            }
            CompareCondition::Gt | CompareCondition::Ge => self.decide(cmp.mirror(), right, left),
            CompareCondition::Lt | CompareCondition::Le => {
                let slack = i64::from(cmp.cond == CompareCondition::Le);
                // l < r is l <= r - 1; l <= r is l <= r + 0
                let holds =
                    self.at_most(l, r, slack - 1) && (cmp.signed || self.at_least(l, zero, 0));
                if holds {
                    return Some(true);
                }
                let fails = self.at_least(l, r, slack) && (cmp.signed || self.at_least(r, zero, 0));
                fails.then_some(false)
            }
        }
    }

    /// `l <= r + c`, walking from either side.
    fn at_most(&mut self, l: Node, r: Node, c: i64) -> bool {
        self.prove_upper(l, r, c) || c.checked_neg().is_some_and(|n| self.prove_lower(r, l, n))
    }

    /// `l >= r + c`, walking from either side.
    fn at_least(&mut self, l: Node, r: Node, c: i64) -> bool {
        self.prove_lower(l, r, c) || c.checked_neg().is_some_and(|n| self.prove_upper(r, l, n))
    }

    fn prove(&mut self, bound: Bound, v: Node, target: Node, c: i64, depth: usize) -> Outcome {
        if v == target {
            return Outcome::settled(bound.holds(0, 0, c));
        }
        if let (Node::Const(a), Node::Const(b)) = (v, target) {
            return Outcome::settled(bound.holds(a, b, c));
        }
        if let Node::Const(_) = v {
            // k <= t + c is t >= k - c
            let Some(flipped) = c.checked_neg() else {
                return Outcome::settled(false);
            };
            return self.prove(bound.flip(), target, v, flipped, depth + 1);
        }
        if depth > MAX_DEPTH {
            return Outcome {
                holds: false,
                cyclic: true,
            };
        }
        if let Some(&holds) = self.memo.get(&(bound, v, target, c)) {
            return Outcome::settled(holds);
        }
        if let Some(&pending) = self.active.get(&(bound, v, target)) {
            return Outcome {
                holds: bound.is_harmless(c, pending),
                cyclic: true,
            };
        }

        let graph = match bound {
            Bound::Upper => &self.upper,
            Bound::Lower => &self.lower,
        };
        let groups = match graph.get(&v) {
            Some(groups) if !groups.is_empty() => groups.clone(),
            _ => return Outcome::settled(false),
        };

        self.active.insert((bound, v, target), c);
        let mut cyclic = false;
        let mut holds = true;
        for group in groups {
            let mut group_holds = false;
            for edge in group {
                let Some(rest) = c.checked_sub(edge.weight) else {
                    continue;
                };
                let outcome = self.prove(bound, edge.to, target, rest, depth + 1);
                cyclic |= outcome.cyclic;
                if outcome.holds {
                    group_holds = true;
                    break;
                }
            }
            if !group_holds {
                holds = false;
                break;
            }
        }
        self.active.remove(&(bound, v, target));

        if !cyclic {
            self.memo.insert((bound, v, target, c), holds);
        }
        Outcome { holds, cyclic }
    }
}

fn signed_offset(alu: Alu, k: i64) -> Option<i64> {
    match alu {
        Alu::Add => Some(k),
        Alu::Sub => k.checked_neg(),
        _ => None,
    }
}

/// Follows single-definition copies and pis from `var`.
fn canonical(cfg: &ControlFlowGraph, chains: &DataflowChains, mut var: VarId) -> VarId {
    for _ in 0..cfg.var_count() {
        let next = chains
            .single_definition(var)
            .and_then(|def| cfg.get_op(def))
            .filter(|op| matches!(op.kind, OpKind::Assign | OpKind::Pi(_)))
            .and_then(|op| op.arg(0))
            .and_then(Expression::as_var);
        match next {
            Some(src) if src != var => var = src,
            _ => break,
        }
    }
    var
}

/// The array whose length `var` holds, if `var` is (a copy of) a length load.
fn length_source(cfg: &ControlFlowGraph, chains: &DataflowChains, var: VarId) -> Option<VarId> {
    let var = canonical(cfg, chains, var);
    let def = cfg.get_op(chains.single_definition(var)?)?;
    if !def.annotations.has(AnnotationFlags::ARRAY_LENGTH) {
        return None;
    }
    let array = def.arg(0)?.as_var()?;
    Some(canonical(cfg, chains, array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::pi::insert_pis,
        ir::{CfgBuilder, MethodId, OpTag, WellKnownField},
        test::fixtures,
    };

    /// `for (i = 0; i < a.Length; i++) { a[i] }` with the loop body index returned
    /// alongside the body's own length load.
    fn counted_loop(step: i64) -> (ControlFlowGraph, VarId) {
        let fx = fixtures::basic();
        let length = fx.ts.well_known_field(WellKnownField::ArrayLength).unwrap();
        let mut body_len = None;
        let cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let array = f.argument(fx.int_array, "a");
                let len0 = f.temp(fx.int);
                let len1 = f.temp(fx.int);
                let i = f.temp(fx.int);
                let next = f.temp(fx.int);
                body_len = Some(len1);
                let header = f.new_block();
                let body = f.new_block();
                let entry = f.entry();
                let exit = f.exit();
                f.block(entry, |blk| {
                    let load = blk.load_field(len0, array, length);
                    blk.annotate(load, AnnotationFlags::ARRAY_LENGTH);
                    blk.jump(header);
                });
                f.block(header, |blk| {
                    blk.phi(
                        i,
                        &[
                            (entry, Expression::int(fx.int, 0)),
                            (body, Expression::Var(next)),
                        ],
                    );
                    blk.compare_branch(
                        Comparison::new(CompareCondition::Lt, true),
                        i,
                        len0,
                        body,
                        exit,
                    );
                });
                f.block(body, |blk| {
                    let load = blk.load_field(len1, array, length);
                    blk.annotate(load, AnnotationFlags::ARRAY_LENGTH);
                    blk.binary(Alu::Add, next, i, Expression::int(fx.int, step));
                    blk.jump(header);
                });
            })
            .unwrap();
        (cfg, body_len.unwrap())
    }

    fn body_index(cfg: &ControlFlowGraph) -> Expression {
        cfg.operators()
            .find(|(_, op)| op.tag() == OpTag::Binary)
            .and_then(|(_, op)| op.arg(0).copied())
            .unwrap()
    }

    fn solve(cfg: &mut ControlFlowGraph) -> ConstraintSystem {
        let chains = cfg.dataflow();
        let fixed = FixedLengths::compute(cfg);
        ConstraintSystem::new(cfg, &chains, &fixed)
    }

    #[test]
    fn test_counted_loop_index_is_in_bounds() {
        let (mut cfg, len1) = counted_loop(1);
        insert_pis(&mut cfg).unwrap();
        let index = body_index(&cfg);
        let mut system = solve(&mut cfg);

        let in_range = system.decide(
            Comparison::new(CompareCondition::Lt, false),
            &index,
            &Expression::Var(len1),
        );
        assert_eq!(in_range, Some(true));
    }

    #[test]
    fn test_decreasing_index_is_not_proven_non_negative() {
        let (mut cfg, len1) = counted_loop(-1);
        insert_pis(&mut cfg).unwrap();
        let index = body_index(&cfg);
        let mut system = solve(&mut cfg);

        // Still below the length, but nothing bounds it from below
        let upper = system.decide(
            Comparison::new(CompareCondition::Lt, true),
            &index,
            &Expression::Var(len1),
        );
        assert_eq!(upper, Some(true));
        let unsigned = system.decide(
            Comparison::new(CompareCondition::Lt, false),
            &index,
            &Expression::Var(len1),
        );
        assert_eq!(unsigned, None);
    }

    #[test]
    fn test_constants_and_offsets() {
        let fx = fixtures::basic();
        let mut vars = None;
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let x = f.argument(fx.int, "x");
                let y = f.temp(fx.int);
                vars = Some((x, y));
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.binary(Alu::Sub, y, x, Expression::int(fx.int, 2));
                    blk.ret_void();
                });
            })
            .unwrap();
        let (x, y) = vars.unwrap();
        let mut system = solve(&mut cfg);

        let lt = Comparison::new(CompareCondition::Lt, true);
        assert_eq!(system.decide(lt, &y.into(), &x.into()), Some(true));
        assert_eq!(system.decide(lt.mirror(), &y.into(), &x.into()), Some(false));
        assert_eq!(
            system.decide(Comparison::eq(), &y.into(), &x.into()),
            Some(false)
        );
        assert_eq!(
            system.decide(lt, &Expression::int(fx.int, 1), &Expression::int(fx.int, 2)),
            Some(true)
        );
        assert!(system.prove_upper(Node::Var(y), Node::Var(x), -2));
        assert!(system.prove_lower(Node::Var(y), Node::Var(x), -2));
        assert!(!system.prove_lower(Node::Var(y), Node::Var(x), -1));
    }

    #[test]
    fn test_reassigned_argument_keeps_entry_value() {
        let fx = fixtures::basic();
        let mut arg = None;
        let mut cfg = CfgBuilder::new(MethodId::new(0), None)
            .build_with(|f| {
                let x = f.argument(fx.int, "x");
                let c = f.argument(fx.boolean, "c");
                arg = Some(x);
                let reset = f.new_block();
                let join = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.branch_if(c, reset, join);
                });
                f.block(reset, |blk| {
                    blk.assign(x, Expression::int(fx.int, 0));
                    blk.jump(join);
                });
                f.block(join, |blk| {
                    blk.ret_void();
                });
            })
            .unwrap();
        let x = arg.unwrap();
        let mut system = solve(&mut cfg);

        assert_eq!(
            system.decide(Comparison::eq(), &x.into(), &Expression::int(fx.int, 0)),
            None
        );
        assert!(!system.prove_upper(Node::Var(x), Node::Const(0), 0));
    }
}
