//! Operands: variables and constants.

use std::fmt;

use crate::ir::{MethodId, TypeId, VarId};

/// Storage class of a [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Incoming argument `n` (`this` is argument 0 for instance methods).
    Argument(u32),
    /// Declared local `n`.
    Local(u32),
    /// Compiler temporary.
    Temporary,
    /// Word-sized temporary destined for a machine register.
    PseudoRegister,
    /// Processor flags.
    ConditionCode,
    /// Word `index` of the multi-word variable `parent`.
    Fragment {
        /// The aggregate being split
        parent: VarId,
        /// Word index, low word first
        index: u32,
    },
    /// Physical machine register.
    Register(u8),
    /// Incoming stack slot at word offset `n`.
    StackIn(u32),
    /// Outgoing stack slot at word offset `n`.
    StackOut(u32),
    /// The method's return value.
    ReturnValue,
}

/// A storage location of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Storage class
    pub kind: VarKind,
    /// Declared type
    pub ty: TypeId,
    /// Optional debug name
    pub name: Option<String>,
}

impl Variable {
    /// Returns `true` if this is a compiler-introduced temporary.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(
            self.kind,
            VarKind::Temporary | VarKind::PseudoRegister | VarKind::ConditionCode
        )
    }

    /// Returns `true` for physical or stack locations bound by the calling convention.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        matches!(
            self.kind,
            VarKind::Register(_) | VarKind::StackIn(_) | VarKind::StackOut(_)
        )
    }
}

/// Bit pattern of a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    /// The null reference
    Null,
    /// Integer, sign- or zero-extended to 64 bits by its type
    Int(i64),
    /// IEEE single, as raw bits
    Float32(u32),
    /// IEEE double, as raw bits
    Float64(u64),
    /// Address of a data descriptor in the image
    DataDescriptor(u32),
    /// Runtime handle of a type (its vtable)
    TypeHandle(TypeId),
    /// Entry point of a method
    MethodHandle(MethodId),
}

impl ConstValue {
    /// Returns `true` for null and for a zero bit pattern.
    #[must_use]
    pub fn is_zero(self) -> bool {
        match self {
            Self::Null => true,
            Self::Int(v) => v == 0,
            Self::Float32(bits) => bits == 0,
            Self::Float64(bits) => bits == 0,
            _ => false,
        }
    }

    /// Returns the raw 64-bit pattern when the constant is numeric.
    #[must_use]
    pub fn bits(self) -> Option<u64> {
        match self {
            Self::Null => Some(0),
            #[allow(clippy::cast_sign_loss)]
            Self::Int(v) => Some(v as u64),
            Self::Float32(bits) => Some(u64::from(bits)),
            Self::Float64(bits) => Some(bits),
            Self::DataDescriptor(addr) => Some(u64::from(addr)),
            _ => None,
        }
    }

    /// Returns machine word `word` (low word first) of a numeric constant.
    ///
    /// Symbolic handles occupy a single word and are returned unchanged for word 0.
    #[must_use]
    pub fn fragment(self, word: u32) -> Option<Self> {
        match self.bits() {
            Some(bits) => {
                let shifted = bits.checked_shr(word * 32).unwrap_or(0);
                Some(Self::Int(i64::from(shifted as u32)))
            }
            None if word == 0 => Some(self),
            None => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float32(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Self::Float64(bits) => write!(f, "{}d", f64::from_bits(*bits)),
            Self::DataDescriptor(addr) => write!(f, "data@{addr:#x}"),
            Self::TypeHandle(ty) => write!(f, "typeof({ty})"),
            Self::MethodHandle(m) => write!(f, "&{m}"),
        }
    }
}

/// A typed constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant {
    /// Declared type
    pub ty: TypeId,
    /// Value
    pub value: ConstValue,
}

/// An operand of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expression {
    /// A variable of the graph
    Var(VarId),
    /// An immediate value
    Const(Constant),
}

impl Expression {
    /// Builds an integer constant of type `ty`.
    #[must_use]
    pub fn int(ty: TypeId, value: i64) -> Self {
        Self::Const(Constant {
            ty,
            value: ConstValue::Int(value),
        })
    }

    /// Builds the null constant of type `ty`.
    #[must_use]
    pub fn null(ty: TypeId) -> Self {
        Self::Const(Constant {
            ty,
            value: ConstValue::Null,
        })
    }

    /// Returns the variable, if this is one.
    #[must_use]
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Self::Var(v) => Some(*v),
            Self::Const(_) => None,
        }
    }

    /// Returns the constant, if this is one.
    #[must_use]
    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Self::Const(c) => Some(c),
            Self::Var(_) => None,
        }
    }

    /// Returns `true` for a zero or null constant.
    #[must_use]
    pub fn is_zero_constant(&self) -> bool {
        self.as_const().is_some_and(|c| c.value.is_zero())
    }

    /// Returns the integer value of an integer constant.
    #[must_use]
    pub fn int_value(&self) -> Option<i64> {
        match self.as_const()?.value {
            ConstValue::Int(v) => Some(v),
            ConstValue::Null => Some(0),
            _ => None,
        }
    }
}

impl From<VarId> for Expression {
    fn from(var: VarId) -> Self {
        Self::Var(var)
    }
}

impl From<Constant> for Expression {
    fn from(c: Constant) -> Self {
        Self::Const(c)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(v) => write!(f, "{v}"),
            Self::Const(c) => write!(f, "{}", c.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_of_long() {
        let v = ConstValue::Int(0x1_0000_0002);
        assert_eq!(v.fragment(0), Some(ConstValue::Int(2)));
        assert_eq!(v.fragment(1), Some(ConstValue::Int(1)));
    }

    #[test]
    fn test_fragment_of_negative() {
        let v = ConstValue::Int(-1);
        assert_eq!(v.fragment(0), Some(ConstValue::Int(0xFFFF_FFFF)));
        assert_eq!(v.fragment(1), Some(ConstValue::Int(0xFFFF_FFFF)));
    }

    #[test]
    fn test_fragment_of_double() {
        let v = ConstValue::Float64(1.0f64.to_bits());
        assert_eq!(v.fragment(0), Some(ConstValue::Int(0)));
        assert_eq!(v.fragment(1), Some(ConstValue::Int(0x3FF0_0000)));
    }

    #[test]
    fn test_zero() {
        assert!(ConstValue::Null.is_zero());
        assert!(ConstValue::Int(0).is_zero());
        assert!(!ConstValue::Int(4).is_zero());
        assert!(!ConstValue::TypeHandle(TypeId::new(1)).is_zero());
    }
}
