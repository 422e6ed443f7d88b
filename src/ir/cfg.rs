//! The per-method control flow graph arena.

use std::{collections::HashMap, fmt, sync::Arc};

use bitflags::bitflags;

use crate::{
    ir::{
        block::{BasicBlock, BlockQualifier},
        dataflow::DataflowChains,
        dominance::DominatorTree,
        expression::{Expression, VarKind, Variable},
        operator::{OpKind, Operator},
        registry::TypeSystem,
        types::BuiltinType,
        BlockId, MethodId, OpId, TypeId, VarId,
    },
    Result,
};

bitflags! {
    /// One-shot transformations already applied to a graph.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CfgProperties: u32 {
        /// Runtime prologue/epilogue wrapper calls were injected.
        const WRAPPERS_ADDED = 0x0001;
        /// Reference counted arguments and locals were initialized and released.
        const REFCOUNT_FRAME = 0x0002;
        /// Arguments and return value were bound to convention locations.
        const CONVENTION_BOUND = 0x0004;
    }
}

bitflags! {
    /// What [`ControlFlowGraph::substitute`] carries over from the replaced operator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubstitutionFlags: u32 {
        /// Merge the old annotations into the new operator.
        const COPY_ANNOTATIONS = 0x0001;
        /// Keep the old source location if the new operator has none.
        const COPY_DEBUG = 0x0002;
    }
}

/// A method body: arenas of blocks, operators and variables.
///
/// Handles stay valid across edits; a deleted operator or block leaves an empty slot.
/// Every structural edit drops the cached [`DataflowChains`].
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    method: MethodId,
    blocks: Vec<Option<BasicBlock>>,
    ops: Vec<Option<Operator>>,
    vars: Vec<Variable>,
    arguments: Vec<VarId>,
    locals: Vec<VarId>,
    return_value: Option<VarId>,
    entry: BlockId,
    exit: BlockId,
    properties: CfgProperties,
    prologue: Vec<OpId>,
    fragments: HashMap<VarId, Vec<VarId>>,
    locations: HashMap<VarKind, VarId>,
    chains: Option<Arc<DataflowChains>>,
    revision: u64,
}

impl ControlFlowGraph {
    /// Creates a graph with an empty entry block and an exit block holding `Return`.
    #[must_use]
    pub fn new(method: MethodId, return_type: Option<TypeId>) -> Self {
        let mut cfg = Self {
            method,
            blocks: Vec::new(),
            ops: Vec::new(),
            vars: Vec::new(),
            arguments: Vec::new(),
            locals: Vec::new(),
            return_value: None,
            entry: BlockId::new(0),
            exit: BlockId::new(1),
            properties: CfgProperties::empty(),
            prologue: Vec::new(),
            fragments: HashMap::new(),
            locations: HashMap::new(),
            chains: None,
            revision: 0,
        };

        cfg.entry = cfg.add_block(BlockQualifier::Entry);
        cfg.exit = cfg.add_block(BlockQualifier::Exit);

        let args = match return_type {
            Some(ty) if ty != BuiltinType::Void.id() => {
                let rv = cfg.new_variable(VarKind::ReturnValue, ty, Some("$ret".into()));
                cfg.return_value = Some(rv);
                vec![Expression::Var(rv)]
            }
            _ => Vec::new(),
        };
        let ret = cfg.push_op(Operator::new(OpKind::Return, Vec::new(), args), cfg.exit);
        if let Some(Some(exit)) = cfg.blocks.get_mut(cfg.exit.index()) {
            exit.ops.push(ret);
        }
        cfg
    }

    /// The method this graph implements.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The exit block, holding the epilogue and `Return`.
    #[must_use]
    pub fn exit(&self) -> BlockId {
        self.exit
    }

    /// One-shot transformations already applied.
    #[must_use]
    pub fn properties(&self) -> CfgProperties {
        self.properties
    }

    /// Records a one-shot transformation.
    pub fn set_property(&mut self, property: CfgProperties) {
        self.properties |= property;
    }

    /// Counter bumped by every edit.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.chains = None;
        self.revision += 1;
    }

    // ── Variables ───────────────────────────────────────────────────────

    /// Adds a variable.
    pub fn new_variable(&mut self, kind: VarKind, ty: TypeId, name: Option<String>) -> VarId {
        self.vars.push(Variable { kind, ty, name });
        self.chains = None;
        VarId::new(self.vars.len() - 1)
    }

    /// Adds the next incoming argument.
    pub fn add_argument(&mut self, ty: TypeId, name: &str) -> VarId {
        let index = u32::try_from(self.arguments.len()).unwrap_or(u32::MAX);
        let var = self.new_variable(VarKind::Argument(index), ty, Some(name.to_string()));
        self.arguments.push(var);
        var
    }

    /// Adds the next declared local.
    pub fn add_local(&mut self, ty: TypeId, name: &str) -> VarId {
        let index = u32::try_from(self.locals.len()).unwrap_or(u32::MAX);
        let var = self.new_variable(VarKind::Local(index), ty, Some(name.to_string()));
        self.locals.push(var);
        var
    }

    /// Adds a compiler temporary.
    pub fn allocate_temporary(&mut self, ty: TypeId) -> VarId {
        self.new_variable(VarKind::Temporary, ty, None)
    }

    /// Adds a word-sized temporary destined for a register.
    pub fn allocate_pseudo_register(&mut self, ty: TypeId) -> VarId {
        self.new_variable(VarKind::PseudoRegister, ty, None)
    }

    /// Adds a condition code variable.
    pub fn allocate_condition_code(&mut self) -> VarId {
        self.new_variable(
            VarKind::ConditionCode,
            BuiltinType::ConditionCode.id(),
            None,
        )
    }

    /// Returns the variable behind `id`.
    #[must_use]
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    /// Returns the type of `id`.
    #[must_use]
    pub fn var_type(&self, id: VarId) -> TypeId {
        self.vars[id.index()].ty
    }

    /// Number of variables ever created.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Incoming arguments, `this` first for instance methods.
    #[must_use]
    pub fn arguments(&self) -> &[VarId] {
        &self.arguments
    }

    /// Declared locals.
    #[must_use]
    pub fn locals(&self) -> &[VarId] {
        &self.locals
    }

    /// The return value variable, absent for `void` methods.
    #[must_use]
    pub fn return_value(&self) -> Option<VarId> {
        self.return_value
    }

    /// Type of an operand.
    #[must_use]
    pub fn expression_type(&self, expr: &Expression) -> TypeId {
        match expr {
            Expression::Var(v) => self.var_type(*v),
            Expression::Const(c) => c.ty,
        }
    }

    /// The word-sized fragments of `var`, low word first.
    ///
    /// A one-word variable is its own single fragment. Fragments are created once and
    /// reused, so every pass splitting the same variable agrees on them.
    pub fn fragments(&mut self, ts: &TypeSystem, var: VarId) -> Vec<VarId> {
        let words = ts.size_in_words(self.var_type(var));
        if words <= 1 || matches!(self.var(var).kind, VarKind::Fragment { .. }) {
            return vec![var];
        }
        if let Some(existing) = self.fragments.get(&var) {
            return existing.clone();
        }

        let base = self
            .var(var)
            .name
            .clone()
            .unwrap_or_else(|| var.to_string());
        let parts: Vec<VarId> = (0..words)
            .map(|index| {
                self.new_variable(
                    VarKind::Fragment { parent: var, index },
                    BuiltinType::UInt32.id(),
                    Some(format!("{base}.{index}")),
                )
            })
            .collect();
        self.fragments.insert(var, parts.clone());
        parts
    }

    /// The cached variable for a physical register or stack slot.
    pub fn location(&mut self, kind: VarKind, ty: TypeId) -> VarId {
        if let Some(existing) = self.locations.get(&kind) {
            return *existing;
        }
        let name = match kind {
            VarKind::Register(n) => format!("r{n}"),
            VarKind::StackIn(n) => format!("in[{n}]"),
            VarKind::StackOut(n) => format!("out[{n}]"),
            _ => format!("{kind:?}"),
        };
        let var = self.new_variable(kind, ty, Some(name));
        self.locations.insert(kind, var);
        var
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Adds an empty block.
    pub fn add_block(&mut self, qualifier: BlockQualifier) -> BlockId {
        self.blocks.push(Some(BasicBlock::new(qualifier)));
        self.touch();
        BlockId::new(self.blocks.len() - 1)
    }

    /// Returns a live block.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the block was removed.
    pub fn block(&self, id: BlockId) -> Result<&BasicBlock> {
        self.blocks
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| consistency_error!(None, "block {} is not part of the graph", id))
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock> {
        self.blocks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| consistency_error!(None, "block {} is not part of the graph", id))
    }

    /// Changes the role of a block.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the block was removed.
    pub fn set_qualifier(&mut self, id: BlockId, qualifier: BlockQualifier) -> Result<()> {
        self.block_mut(id)?.qualifier = qualifier;
        Ok(())
    }

    /// Live blocks in creation order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_some())
            .map(|(i, _)| BlockId::new(i))
            .collect()
    }

    /// Size of the block arena, including removed slots.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    /// Successors of `block` read from its terminator.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block)
            .ok()
            .and_then(BasicBlock::terminator)
            .and_then(|t| self.get_op(t))
            .map(Operator::successors)
            .unwrap_or_default()
    }

    /// Blocks reachable from the entry, in reverse post-order.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry, 0usize)];
        visited[self.entry.index()] = true;

        while let Some((block, next)) = stack.pop() {
            let succs = self.successors(block);
            if let Some(succ) = succs.get(next) {
                stack.push((block, next + 1));
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((*succ, 0));
                }
            } else {
                order.push(block);
            }
        }

        order.reverse();
        order
    }

    /// Removes a block and every operator in it.
    ///
    /// Phi arguments flowing in from the removed block are dropped.
    ///
    /// # Errors
    ///
    /// Returns an assertion error for the entry or exit block.
    pub fn remove_block(&mut self, id: BlockId) -> Result<()> {
        ir_assert!(
            id != self.entry && id != self.exit,
            "cannot remove entry or exit block {}",
            id
        );
        let successors = self.successors(id);
        let Some(block) = self.blocks.get_mut(id.index()).and_then(Option::take) else {
            return Ok(());
        };
        for op in block.ops {
            if let Some(slot) = self.ops.get_mut(op.index()) {
                *slot = None;
            }
        }
        for succ in successors {
            self.drop_phi_origin(succ, id);
        }
        self.touch();
        Ok(())
    }

    fn drop_phi_origin(&mut self, block: BlockId, origin: BlockId) {
        let ops = match self.block(block) {
            Ok(b) => b.ops.clone(),
            Err(_) => return,
        };
        for op_id in ops {
            let Some(Some(op)) = self.ops.get_mut(op_id.index()) else {
                continue;
            };
            if let OpKind::Phi { origins } = &mut op.kind {
                while let Some(pos) = origins.iter().position(|o| *o == origin) {
                    origins.remove(pos);
                    if pos < op.args.len() {
                        op.args.remove(pos);
                    }
                }
            }
        }
    }

    fn rename_phi_origin(&mut self, block: BlockId, from: BlockId, to: BlockId) {
        let ops = match self.block(block) {
            Ok(b) => b.ops.clone(),
            Err(_) => return,
        };
        for op_id in ops {
            if let Some(Some(op)) = self.ops.get_mut(op_id.index()) {
                if matches!(op.kind, OpKind::Phi { .. }) {
                    op.redirect_target(from, to);
                }
            }
        }
    }

    // ── Operators ───────────────────────────────────────────────────────

    fn push_op(&mut self, mut op: Operator, block: BlockId) -> OpId {
        op.block = Some(block);
        self.ops.push(Some(op));
        OpId::new(self.ops.len() - 1)
    }

    /// Returns a live operator.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the operator was deleted.
    pub fn op(&self, id: OpId) -> Result<&Operator> {
        self.get_op(id)
            .ok_or_else(|| consistency_error!(id, "operator {} is not part of the graph", id))
    }

    /// Returns a live operator for in-place editing.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the operator was deleted.
    pub fn op_mut(&mut self, id: OpId) -> Result<&mut Operator> {
        self.touch();
        self.ops
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| consistency_error!(id, "operator {} is not part of the graph", id))
    }

    /// Returns the operator if it is still live.
    #[must_use]
    pub fn get_op(&self, id: OpId) -> Option<&Operator> {
        self.ops.get(id.index()).and_then(Option::as_ref)
    }

    /// Live operators in block order.
    #[must_use]
    pub fn ops_in_order(&self) -> Vec<OpId> {
        self.blocks
            .iter()
            .flatten()
            .flat_map(|b| b.ops.iter().copied())
            .collect()
    }

    /// Iterates live operators with their handles, in block order.
    pub fn operators(&self) -> impl Iterator<Item = (OpId, &Operator)> + '_ {
        self.blocks
            .iter()
            .flatten()
            .flat_map(|b| b.ops.iter().copied())
            .filter_map(|id| self.get_op(id).map(|op| (id, op)))
    }

    /// Number of live operators.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.iter().filter(|o| o.is_some()).count()
    }

    fn locate(&self, id: OpId) -> Result<(BlockId, usize)> {
        let block = self
            .op(id)?
            .block
            .ok_or_else(|| consistency_error!(id, "operator {} is detached", id))?;
        let pos = self
            .block(block)?
            .position(id)
            .ok_or_else(|| consistency_error!(id, "operator {} missing from {}", id, block))?;
        Ok((block, pos))
    }

    /// Appends an operator at the end of a block.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the block was removed.
    pub fn append(&mut self, block: BlockId, op: Operator) -> Result<OpId> {
        self.block(block)?;
        let id = self.push_op(op, block);
        self.block_mut(block)?.ops.push(id);
        self.touch();
        Ok(id)
    }

    /// Inserts an operator immediately before `anchor`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `anchor` is not live.
    pub fn insert_before(&mut self, anchor: OpId, op: Operator) -> Result<OpId> {
        let (block, pos) = self.locate(anchor)?;
        let id = self.push_op(op, block);
        self.block_mut(block)?.ops.insert(pos, id);
        self.touch();
        Ok(id)
    }

    /// Inserts an operator immediately after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `anchor` is not live or is a terminator.
    pub fn insert_after(&mut self, anchor: OpId, op: Operator) -> Result<OpId> {
        if self.op(anchor)?.is_terminator() {
            return Err(consistency_error!(
                anchor,
                "cannot insert after terminator {}",
                anchor
            ));
        }
        let (block, pos) = self.locate(anchor)?;
        let id = self.push_op(op, block);
        self.block_mut(block)?.ops.insert(pos + 1, id);
        self.touch();
        Ok(id)
    }

    /// Replaces the operator behind `id`, keeping its handle and position.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `id` is not live.
    pub fn substitute(
        &mut self,
        id: OpId,
        mut op: Operator,
        flags: SubstitutionFlags,
    ) -> Result<()> {
        let old = self.op(id)?;
        op.block = old.block;
        if flags.contains(SubstitutionFlags::COPY_ANNOTATIONS) {
            op.annotations.flags |= old.annotations.flags;
            if op.annotations.fixed_length.is_none() {
                op.annotations.fixed_length = old.annotations.fixed_length;
            }
            if op.annotations.invalidated.is_empty() {
                op.annotations
                    .invalidated
                    .clone_from(&old.annotations.invalidated);
            }
        }
        if flags.contains(SubstitutionFlags::COPY_DEBUG) && op.debug.is_none() {
            op.debug.clone_from(&old.debug);
        }
        if let Some(slot) = self.ops.get_mut(id.index()) {
            *slot = Some(op);
        }
        self.touch();
        Ok(())
    }

    /// Removes an operator.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `id` is not live.
    pub fn delete(&mut self, id: OpId) -> Result<()> {
        let (block, pos) = self.locate(id)?;
        self.block_mut(block)?.ops.remove(pos);
        if let Some(slot) = self.ops.get_mut(id.index()) {
            *slot = None;
        }
        self.prologue.retain(|p| *p != id);
        self.touch();
        Ok(())
    }

    /// The terminator of `block`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the block is removed or not closed.
    pub fn terminator(&self, block: BlockId) -> Result<OpId> {
        let term = self
            .block(block)?
            .terminator()
            .ok_or_else(|| consistency_error!(None, "block {} has no terminator", block))?;
        if !self.op(term)?.is_terminator() {
            return Err(consistency_error!(
                term,
                "block {} does not end in a control operator",
                block
            ));
        }
        Ok(term)
    }

    /// The operator following `id` in its block.
    #[must_use]
    pub fn next_op(&self, id: OpId) -> Option<OpId> {
        let (block, pos) = self.locate(id).ok()?;
        self.block(block).ok()?.ops.get(pos + 1).copied()
    }

    /// The operator preceding `id` in its block.
    #[must_use]
    pub fn prev_op(&self, id: OpId) -> Option<OpId> {
        let (block, pos) = self.locate(id).ok()?;
        let prev = pos.checked_sub(1)?;
        self.block(block).ok()?.ops.get(prev).copied()
    }

    /// Splits the block holding `at`: `at` and everything after it move to a new block,
    /// and the original block jumps there.
    ///
    /// Returns the new block. If the original block was the exit, the new block takes
    /// over the exit role since it now holds `Return`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `at` is not live.
    pub fn split_at(&mut self, at: OpId) -> Result<BlockId> {
        let (block, pos) = self.locate(at)?;
        let qualifier = self.block(block)?.qualifier;

        let moved: Vec<OpId> = self.block_mut(block)?.ops.split_off(pos);
        let new_qualifier = if block == self.exit {
            BlockQualifier::Exit
        } else {
            BlockQualifier::Normal
        };
        let tail = self.add_block(new_qualifier);
        if block == self.exit {
            self.exit = tail;
            if qualifier == BlockQualifier::Exit {
                self.set_qualifier(block, BlockQualifier::Normal)?;
            }
        }

        for op_id in &moved {
            if let Some(Some(op)) = self.ops.get_mut(op_id.index()) {
                op.block = Some(tail);
            }
        }
        self.block_mut(tail)?.ops = moved;

        let jump = self.push_op(Operator::jump(tail), block);
        self.block_mut(block)?.ops.push(jump);

        for succ in self.successors(tail) {
            self.rename_phi_origin(succ, block, tail);
        }
        self.touch();
        Ok(tail)
    }

    /// Places a new block on the edge `from -> to`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `from` has no terminator.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> Result<BlockId> {
        let term = self.terminator(from)?;
        let middle = self.add_block(BlockQualifier::Normal);
        self.append(middle, Operator::jump(to))?;
        self.op_mut(term)?.redirect_target(to, middle);
        self.rename_phi_origin(to, from, middle);
        Ok(middle)
    }

    /// Replaces the terminator of `block`, or appends one if the block is open.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the block was removed.
    pub fn set_terminator(&mut self, block: BlockId, op: Operator) -> Result<OpId> {
        let current = self
            .block(block)?
            .terminator()
            .filter(|t| self.get_op(*t).is_some_and(Operator::is_terminator));
        match current {
            Some(term) => {
                let old_succs = self.op(term)?.successors();
                self.substitute(term, op, SubstitutionFlags::COPY_DEBUG)?;
                let new_succs = self.op(term)?.successors();
                for lost in old_succs.iter().filter(|s| !new_succs.contains(s)) {
                    self.drop_phi_origin(*lost, block);
                }
                Ok(term)
            }
            None => self.append(block, op),
        }
    }

    // ── Prologue and epilogue ───────────────────────────────────────────

    /// Adds an operator to the method prologue, after earlier prologue operators.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the entry block is malformed.
    pub fn append_to_prologue(&mut self, op: Operator) -> Result<OpId> {
        let entry = self.entry;
        let pos = self
            .prologue
            .iter()
            .rev()
            .find_map(|p| self.block(entry).ok()?.position(*p))
            .map_or(0, |p| p + 1);
        let id = self.push_op(op, entry);
        self.block_mut(entry)?.ops.insert(pos, id);
        self.prologue.push(id);
        self.touch();
        Ok(id)
    }

    /// Adds an operator to the method epilogue, right before `Return`.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the exit block has no terminator.
    pub fn append_to_epilogue(&mut self, op: Operator) -> Result<OpId> {
        let term = self.terminator(self.exit)?;
        self.insert_before(term, op)
    }

    /// The `Return` operator of the exit block.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if the exit block does not end in `Return`.
    pub fn return_op(&self) -> Result<OpId> {
        let term = self.terminator(self.exit)?;
        match self.op(term)?.kind {
            OpKind::Return => Ok(term),
            _ => Err(consistency_error!(term, "exit block does not end in Return")),
        }
    }

    // ── Derived data ────────────────────────────────────────────────────

    /// Definition/use chains, rebuilt if an edit happened since the last call.
    pub fn dataflow(&mut self) -> Arc<DataflowChains> {
        if let Some(chains) = &self.chains {
            return Arc::clone(chains);
        }
        let chains = Arc::new(DataflowChains::compute(self));
        self.chains = Some(Arc::clone(&chains));
        chains
    }

    /// Dominator tree over the blocks reachable from the entry.
    #[must_use]
    pub fn dominators(&self) -> DominatorTree {
        DominatorTree::compute(self)
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block_id in self.block_ids() {
            let Ok(block) = self.block(block_id) else {
                continue;
            };
            match block.qualifier {
                BlockQualifier::Normal => writeln!(f, "{block_id}:")?,
                q => writeln!(f, "{block_id} ({q:?}):")?,
            }
            for op_id in &block.ops {
                if let Some(op) = self.get_op(*op_id) {
                    writeln!(f, "    {op_id}: {op}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Alu, AnnotationFlags};

    fn int() -> TypeId {
        BuiltinType::Int32.id()
    }

    fn straight_line() -> (ControlFlowGraph, OpId, OpId) {
        let mut cfg = ControlFlowGraph::new(MethodId::new(0), Some(int()));
        let a = cfg.add_argument(int(), "a");
        let t = cfg.allocate_temporary(int());
        let rv = cfg.return_value().unwrap();
        let entry = cfg.entry();
        let exit = cfg.exit();
        let add = cfg
            .append(entry, Operator::binary(Alu::Add, true, t, a, a))
            .unwrap();
        let assign = cfg.append(entry, Operator::assign(rv, t)).unwrap();
        cfg.append(entry, Operator::jump(exit)).unwrap();
        (cfg, add, assign)
    }

    #[test]
    fn test_insert_and_delete() {
        let (mut cfg, add, assign) = straight_line();
        let t2 = cfg.allocate_temporary(int());
        let mid = cfg.insert_after(add, Operator::assign(t2, Expression::int(int(), 1))).unwrap();
        assert_eq!(cfg.next_op(add), Some(mid));
        assert_eq!(cfg.prev_op(assign), Some(mid));

        cfg.delete(mid).unwrap();
        assert!(cfg.get_op(mid).is_none());
        assert_eq!(cfg.next_op(add), Some(assign));
        assert!(cfg.delete(mid).is_err());
    }

    #[test]
    fn test_insert_after_terminator_fails() {
        let (mut cfg, _, _) = straight_line();
        let term = cfg.terminator(cfg.entry()).unwrap();
        let err = cfg.insert_after(term, Operator::dead()).unwrap_err();
        assert!(err.is_consistency());
    }

    #[test]
    fn test_substitute_keeps_handle_and_annotations() {
        let (mut cfg, add, _) = straight_line();
        cfg.op_mut(add)
            .unwrap()
            .annotations
            .add(AnnotationFlags::NOT_NULL);
        let t = cfg.op(add).unwrap().results[0];
        cfg.substitute(
            add,
            Operator::assign(t, Expression::int(int(), 4)),
            SubstitutionFlags::COPY_ANNOTATIONS,
        )
        .unwrap();
        let op = cfg.op(add).unwrap();
        assert_eq!(op.kind, OpKind::Assign);
        assert!(op.annotations.has(AnnotationFlags::NOT_NULL));
        assert_eq!(op.block(), Some(cfg.entry()));
    }

    #[test]
    fn test_dataflow_chains_invalidate() {
        let (mut cfg, add, assign) = straight_line();
        let t = cfg.op(add).unwrap().results[0];
        let chains = cfg.dataflow();
        assert_eq!(chains.single_definition(t), Some(add));
        assert_eq!(chains.uses(t), &[assign]);

        cfg.delete(assign).unwrap();
        let chains = cfg.dataflow();
        assert!(chains.uses(t).is_empty());
    }

    #[test]
    fn test_split_at_moves_tail() {
        let (mut cfg, add, assign) = straight_line();
        let entry = cfg.entry();
        let tail = cfg.split_at(assign).unwrap();

        assert_eq!(cfg.op(assign).unwrap().block(), Some(tail));
        assert_eq!(cfg.op(add).unwrap().block(), Some(entry));
        assert_eq!(cfg.successors(entry), vec![tail]);
        assert_eq!(cfg.successors(tail), vec![cfg.exit()]);
        let chains = cfg.dataflow();
        assert_eq!(chains.predecessors(tail), &[entry]);
    }

    #[test]
    fn test_split_exit_moves_qualifier() {
        let (mut cfg, _, _) = straight_line();
        let old_exit = cfg.exit();
        let ret = cfg.return_op().unwrap();
        let rv = cfg.return_value().unwrap();
        let release = cfg.append_to_epilogue(Operator::assign(rv, rv)).unwrap();
        let new_exit = cfg.split_at(ret).unwrap();

        assert_ne!(old_exit, new_exit);
        assert_eq!(cfg.exit(), new_exit);
        assert_eq!(cfg.block(new_exit).unwrap().qualifier, BlockQualifier::Exit);
        assert_eq!(cfg.block(old_exit).unwrap().qualifier, BlockQualifier::Normal);
        assert_eq!(cfg.op(release).unwrap().block(), Some(old_exit));
        assert_eq!(cfg.return_op().unwrap(), ret);
    }

    #[test]
    fn test_prologue_order() {
        let (mut cfg, add, _) = straight_line();
        let l = cfg.add_local(int(), "l");
        let first = cfg
            .append_to_prologue(Operator::assign(l, Expression::int(int(), 0)))
            .unwrap();
        let second = cfg
            .append_to_prologue(Operator::assign(l, Expression::int(int(), 1)))
            .unwrap();
        let ops = &cfg.block(cfg.entry()).unwrap().ops;
        assert_eq!(&ops[..3], &[first, second, add]);
    }

    #[test]
    fn test_fragments_are_cached() {
        let ts = crate::ir::TypeSystemBuilder::new().build();
        let mut cfg = ControlFlowGraph::new(MethodId::new(0), None);
        let wide = cfg.add_local(BuiltinType::Int64.id(), "w");
        let narrow = cfg.add_local(int(), "n");

        let parts = cfg.fragments(&ts, wide);
        assert_eq!(parts.len(), 2);
        assert_eq!(cfg.fragments(&ts, wide), parts);
        assert_eq!(cfg.fragments(&ts, narrow), vec![narrow]);
        assert_eq!(
            cfg.var(parts[1]).kind,
            VarKind::Fragment {
                parent: wide,
                index: 1
            }
        );
    }

    #[test]
    fn test_reverse_postorder_skips_unreachable() {
        let (mut cfg, _, _) = straight_line();
        let orphan = cfg.add_block(BlockQualifier::Normal);
        cfg.append(orphan, Operator::jump(cfg.exit())).unwrap();
        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo, vec![cfg.entry(), cfg.exit()]);
        cfg.remove_block(orphan).unwrap();
        assert!(cfg.block(orphan).is_err());
        assert!(cfg.remove_block(cfg.entry()).is_err());
    }
}
