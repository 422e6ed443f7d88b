use bitflags::bitflags;

use crate::ir::VarId;

bitflags! {
    /// Facts attached to an operator about the values it produces or consumes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AnnotationFlags: u32 {
        /// The result is never null.
        const NOT_NULL = 0x0001;
        /// The result is the length of an array.
        const ARRAY_LENGTH = 0x0002;
        /// The accessed memory is a peripheral register block.
        const MEMORY_MAPPED = 0x0004;
        /// The result has a statically known array length, see [`Annotations::fixed_length`].
        const FIXED_LENGTH = 0x0008;
        /// The operator clobbers the registers listed in [`Annotations::invalidated`].
        const POST_INVALIDATION = 0x0010;
        /// The operator was produced by the reference counting rewrite.
        const REFCOUNT_PROCESSED = 0x0020;
    }
}

/// Annotation set of an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    /// Boolean facts
    pub flags: AnnotationFlags,
    /// Statically known array length of the result
    pub fixed_length: Option<u32>,
    /// Registers clobbered by the operator
    pub invalidated: Vec<VarId>,
}

impl Annotations {
    /// Returns `true` if `flag` is set.
    #[must_use]
    pub fn has(&self, flag: AnnotationFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Sets `flag`.
    pub fn add(&mut self, flag: AnnotationFlags) {
        self.flags |= flag;
    }

    /// Records a fixed array length for the result.
    pub fn set_fixed_length(&mut self, length: u32) {
        self.flags |= AnnotationFlags::FIXED_LENGTH;
        self.fixed_length = Some(length);
    }

    /// Records the registers clobbered by the operator.
    pub fn set_invalidation(&mut self, registers: Vec<VarId>) {
        self.flags |= AnnotationFlags::POST_INVALIDATION;
        self.invalidated = registers;
    }

    /// Keeps only the facts that describe a value rather than the operator producing it.
    #[must_use]
    pub fn value_facts(&self) -> Self {
        let flags = self.flags & (AnnotationFlags::NOT_NULL | AnnotationFlags::FIXED_LENGTH);
        Self {
            flags,
            fixed_length: self.fixed_length.filter(|_| flags.contains(AnnotationFlags::FIXED_LENGTH)),
            invalidated: Vec::new(),
        }
    }
}
