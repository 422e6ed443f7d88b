//! Closure-based construction of [`ControlFlowGraph`]s.
//!
//! Front ends and tests describe a method body block by block inside a single
//! expression, which keeps the shape of the graph visible in the source:
//!
//! ```rust
//! use downlevel::ir::{Alu, BuiltinType, CfgBuilder, MethodId};
//!
//! let int = BuiltinType::Int32.id();
//! let cfg = CfgBuilder::new(MethodId::new(0), Some(int))
//!     .build_with(|f| {
//!         let a = f.argument(int, "a");
//!         let b = f.argument(int, "b");
//!         let sum = f.temp(int);
//!         let entry = f.entry();
//!         f.block(entry, |blk| {
//!             blk.binary(Alu::Add, sum, a, b);
//!             blk.ret(sum);
//!         });
//!     })
//!     .unwrap();
//! assert_eq!(cfg.arguments().len(), 2);
//! ```

use crate::{
    ir::{
        annotation::AnnotationFlags,
        block::BlockQualifier,
        cfg::ControlFlowGraph,
        expression::Expression,
        operator::{Alu, CallKind, Comparison, OpKind, Operator},
        registry::TypeSystem,
        BlockId, FieldId, MethodId, OpId, TypeId, VarId,
    },
    Error, Result,
};

/// Builder for a method body.
#[derive(Debug)]
pub struct CfgBuilder {
    cfg: ControlFlowGraph,
}

impl CfgBuilder {
    /// Starts an empty body for `method` returning `return_type`.
    #[must_use]
    pub fn new(method: MethodId, return_type: Option<TypeId>) -> Self {
        Self {
            cfg: ControlFlowGraph::new(method, return_type),
        }
    }

    /// Starts a body whose arguments follow the registered signature of `method`,
    /// `this` first for instance methods.
    #[must_use]
    pub fn for_method(ts: &TypeSystem, method: MethodId) -> Self {
        let md = ts.method(method);
        let mut cfg = ControlFlowGraph::new(method, Some(md.ret));
        if md.is_instance() {
            cfg.add_argument(md.owner, "this");
        }
        for (i, param) in md.params.iter().enumerate() {
            cfg.add_argument(*param, &format!("arg{i}"));
        }
        Self { cfg }
    }

    /// Defines the body through `f` and returns the finished graph.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while appending operators.
    pub fn build_with<F>(mut self, f: F) -> Result<ControlFlowGraph>
    where
        F: FnOnce(&mut CfgContext<'_>),
    {
        let mut error = None;
        {
            let mut ctx = CfgContext {
                cfg: &mut self.cfg,
                error: &mut error,
            };
            f(&mut ctx);
        }
        match error {
            Some(err) => Err(err),
            None => Ok(self.cfg),
        }
    }
}

/// Method-level context passed to [`CfgBuilder::build_with`].
pub struct CfgContext<'a> {
    cfg: &'a mut ControlFlowGraph,
    error: &'a mut Option<Error>,
}

impl CfgContext<'_> {
    /// Argument `index`.
    ///
    /// # Panics
    ///
    /// Panics if the argument does not exist.
    #[must_use]
    pub fn arg(&self, index: usize) -> VarId {
        self.cfg.arguments()[index]
    }

    /// Declares the next argument.
    pub fn argument(&mut self, ty: TypeId, name: &str) -> VarId {
        self.cfg.add_argument(ty, name)
    }

    /// Declares a local.
    pub fn local(&mut self, ty: TypeId, name: &str) -> VarId {
        self.cfg.add_local(ty, name)
    }

    /// Allocates a temporary.
    pub fn temp(&mut self, ty: TypeId) -> VarId {
        self.cfg.allocate_temporary(ty)
    }

    /// The return value variable.
    #[must_use]
    pub fn return_value(&self) -> Option<VarId> {
        self.cfg.return_value()
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.cfg.entry()
    }

    /// The exit block.
    #[must_use]
    pub fn exit(&self) -> BlockId {
        self.cfg.exit()
    }

    /// Creates an empty block, to be filled with [`CfgContext::block`].
    pub fn new_block(&mut self) -> BlockId {
        self.cfg.add_block(BlockQualifier::Normal)
    }

    /// Appends operators to `block` through `f`.
    pub fn block<F>(&mut self, block: BlockId, f: F)
    where
        F: FnOnce(&mut BlockContext<'_>),
    {
        let mut ctx = BlockContext {
            cfg: &mut *self.cfg,
            block,
            error: &mut *self.error,
        };
        f(&mut ctx);
    }

    /// Direct access to the graph under construction.
    pub fn cfg(&mut self) -> &mut ControlFlowGraph {
        &mut *self.cfg
    }
}

/// Block-level context: appends operators in order.
pub struct BlockContext<'a> {
    cfg: &'a mut ControlFlowGraph,
    block: BlockId,
    error: &'a mut Option<Error>,
}

impl BlockContext<'_> {
    /// The block being filled.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.block
    }

    /// Allocates a temporary.
    pub fn temp(&mut self, ty: TypeId) -> VarId {
        self.cfg.allocate_temporary(ty)
    }

    /// Appends an arbitrary operator.
    pub fn op(&mut self, op: Operator) -> OpId {
        match self.cfg.append(self.block, op) {
            Ok(id) => id,
            Err(err) => {
                self.error.get_or_insert(err);
                OpId::new(u32::MAX as usize)
            }
        }
    }

    /// Adds annotation flags to an operator appended earlier.
    pub fn annotate(&mut self, op: OpId, flags: AnnotationFlags) {
        if let Ok(op) = self.cfg.op_mut(op) {
            op.annotations.add(flags);
        }
    }

    /// Records a statically known array length on an operator appended earlier.
    pub fn annotate_length(&mut self, op: OpId, length: u32) {
        if let Ok(op) = self.cfg.op_mut(op) {
            op.annotations.set_fixed_length(length);
        }
    }

    /// `dst = src`
    pub fn assign(&mut self, dst: VarId, src: impl Into<Expression>) -> OpId {
        self.op(Operator::assign(dst, src))
    }

    /// Signed `dst = left alu right`.
    pub fn binary(
        &mut self,
        alu: Alu,
        dst: VarId,
        left: impl Into<Expression>,
        right: impl Into<Expression>,
    ) -> OpId {
        self.op(Operator::binary(alu, true, dst, left, right))
    }

    /// Signed `dst = left alu right` that raises on overflow.
    pub fn checked_binary(
        &mut self,
        alu: Alu,
        dst: VarId,
        left: impl Into<Expression>,
        right: impl Into<Expression>,
    ) -> OpId {
        let mut op = Operator::binary(alu, true, dst, left, right);
        if let OpKind::Binary { check_overflow, .. } = &mut op.kind {
            *check_overflow = true;
        }
        self.op(op)
    }

    /// Statically bound call.
    pub fn call(&mut self, method: MethodId, result: Option<VarId>, args: Vec<Expression>) -> OpId {
        self.op(Operator::call(method, result, args))
    }

    /// Dynamically dispatched call with a pending null check on `this`.
    pub fn call_virtual(
        &mut self,
        method: MethodId,
        result: Option<VarId>,
        args: Vec<Expression>,
    ) -> OpId {
        self.op(Operator::new(
            OpKind::Call {
                kind: CallKind::Virtual,
                method,
                may_throw: true,
            },
            result.into_iter().collect(),
            args,
        ))
    }

    /// `dst = object.field`, faulting on null.
    pub fn load_field(&mut self, dst: VarId, object: impl Into<Expression>, field: FieldId) -> OpId {
        self.op(Operator::new(
            OpKind::LoadField {
                field,
                may_throw: true,
            },
            vec![dst],
            vec![object.into()],
        ))
    }

    /// `object.field = value`, faulting on null.
    pub fn store_field(
        &mut self,
        object: impl Into<Expression>,
        field: FieldId,
        value: impl Into<Expression>,
    ) -> OpId {
        self.op(Operator::new(
            OpKind::StoreField {
                field,
                may_throw: true,
            },
            Vec::new(),
            vec![object.into(), value.into()],
        ))
    }

    /// `dst = array[index]`, faulting on null or out of range.
    pub fn load_element(
        &mut self,
        dst: VarId,
        array: impl Into<Expression>,
        index: impl Into<Expression>,
    ) -> OpId {
        self.op(Operator::new(
            OpKind::LoadElement { may_throw: true },
            vec![dst],
            vec![array.into(), index.into()],
        ))
    }

    /// `array[index] = value`, faulting on null or out of range.
    pub fn store_element(
        &mut self,
        array: impl Into<Expression>,
        index: impl Into<Expression>,
        value: impl Into<Expression>,
    ) -> OpId {
        self.op(Operator::new(
            OpKind::StoreElement { may_throw: true },
            Vec::new(),
            vec![array.into(), index.into(), value.into()],
        ))
    }

    /// `dst = new ty()`
    pub fn new_object(&mut self, dst: VarId, ty: TypeId) -> OpId {
        self.op(Operator::new(OpKind::NewObject { ty }, vec![dst], Vec::new()))
    }

    /// `dst = new element[length]`
    pub fn new_array(&mut self, dst: VarId, array_ty: TypeId, length: impl Into<Expression>) -> OpId {
        self.op(Operator::new(
            OpKind::NewArray { ty: array_ty },
            vec![dst],
            vec![length.into()],
        ))
    }

    /// `dst = phi(value from origin, ..)`
    pub fn phi(&mut self, dst: VarId, incoming: &[(BlockId, Expression)]) -> OpId {
        self.op(Operator::new(
            OpKind::Phi {
                origins: incoming.iter().map(|(b, _)| *b).collect(),
            },
            vec![dst],
            incoming.iter().map(|(_, e)| *e).collect(),
        ))
    }

    /// Unconditional jump.
    pub fn jump(&mut self, target: BlockId) -> OpId {
        self.op(Operator::jump(target))
    }

    /// Branches to `taken` when `value` is non-zero.
    pub fn branch_if(
        &mut self,
        value: impl Into<Expression>,
        taken: BlockId,
        not_taken: BlockId,
    ) -> OpId {
        self.op(Operator::new(
            OpKind::BinaryBranch { not_taken, taken },
            Vec::new(),
            vec![value.into()],
        ))
    }

    /// Branches to `taken` when `left cmp right`.
    pub fn compare_branch(
        &mut self,
        cmp: Comparison,
        left: impl Into<Expression>,
        right: impl Into<Expression>,
        taken: BlockId,
        not_taken: BlockId,
    ) -> OpId {
        self.op(Operator::new(
            OpKind::CompareBranch {
                cmp,
                not_taken,
                taken,
            },
            Vec::new(),
            vec![left.into(), right.into()],
        ))
    }

    /// Stores `value` in the return value and jumps to the exit block.
    pub fn ret(&mut self, value: impl Into<Expression>) -> OpId {
        if let Some(rv) = self.cfg.return_value() {
            self.assign(rv, value);
        }
        let exit = self.cfg.exit();
        self.jump(exit)
    }

    /// Jumps to the exit block of a `void` method.
    pub fn ret_void(&mut self) -> OpId {
        let exit = self.cfg.exit();
        self.jump(exit)
    }

    /// Raises `exception`.
    pub fn throw(&mut self, exception: impl Into<Expression>) -> OpId {
        self.op(Operator::new(OpKind::Throw, Vec::new(), vec![exception.into()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BuiltinType, CompareCondition, MethodFlags, TypeFlags, TypeSystemBuilder};

    #[test]
    fn test_build_branchy_method() {
        let int = BuiltinType::Int32.id();
        let cfg = CfgBuilder::new(MethodId::new(0), Some(int))
            .build_with(|f| {
                let a = f.argument(int, "a");
                let then = f.new_block();
                let other = f.new_block();
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.compare_branch(
                        Comparison::new(CompareCondition::Lt, true),
                        a,
                        Expression::int(int, 0),
                        then,
                        other,
                    );
                });
                f.block(then, |blk| {
                    blk.ret(Expression::int(int, -1));
                });
                f.block(other, |blk| {
                    blk.ret(a);
                });
            })
            .unwrap();

        assert_eq!(cfg.block_count(), 4);
        assert_eq!(cfg.successors(cfg.entry()).len(), 2);
        assert!(cfg.terminator(cfg.entry()).is_ok());
    }

    #[test]
    fn test_for_method_declares_this() {
        let mut b = TypeSystemBuilder::new();
        let cls = b.add_class("Counter", None, TypeFlags::empty());
        let m = b.add_method(
            cls,
            "Add",
            &[BuiltinType::Int32.id()],
            BuiltinType::Void.id(),
            MethodFlags::empty(),
        );
        let ts = b.build();

        let cfg = CfgBuilder::for_method(&ts, m)
            .build_with(|f| {
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.ret_void();
                });
            })
            .unwrap();
        assert_eq!(cfg.arguments().len(), 2);
        assert_eq!(cfg.var_type(cfg.arguments()[0]), cls);
        assert!(cfg.return_value().is_none());
    }

    #[test]
    fn test_append_to_removed_block_reports_error() {
        let result = CfgBuilder::new(MethodId::new(0), None).build_with(|f| {
            let orphan = f.new_block();
            f.cfg().remove_block(orphan).unwrap();
            f.block(orphan, |blk| {
                blk.ret_void();
            });
        });
        assert!(result.is_err());
    }
}
