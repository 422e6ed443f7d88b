//! Type, field and method descriptors held by the [`TypeSystem`](super::TypeSystem).

use bitflags::bitflags;
use strum::{EnumIter, IntoStaticStr};

use crate::ir::{FieldId, MethodId, TypeId};

/// Size in bytes of one machine word on every supported target.
pub const WORD_SIZE: u32 = 4;

/// Types every registry starts with, at fixed ids.
///
/// `BuiltinType::Int32.id()` is a `const` handle, so passes can build constants and
/// temporaries without a registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum BuiltinType {
    /// `void`
    Void,
    /// `bool`, one byte
    Boolean,
    /// UTF-16 code unit
    Char,
    /// Signed 8-bit integer
    SByte,
    /// Unsigned 8-bit integer
    Byte,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit IEEE float
    Single,
    /// 64-bit IEEE float
    Double,
    /// Signed pointer-sized integer (a raw, uncounted handle)
    IntPtr,
    /// Unsigned pointer-sized integer (a raw, uncounted handle)
    UIntPtr,
    /// Root of the class hierarchy
    Object,
    /// Immutable string
    String,
    /// Dispatch table of a type
    VTable,
    /// Entry point of compiled code
    CodePointer,
    /// Array of code pointers, as stored in a [`BuiltinType::VTable`]
    CodePointerArray,
    /// Processor flags produced by a compare
    ConditionCode,
}

impl BuiltinType {
    /// Returns the fixed registry handle of this builtin.
    #[must_use]
    pub const fn id(self) -> TypeId {
        TypeId::new(self as usize)
    }

    /// Returns `true` for the 32/64-bit floating point types.
    #[must_use]
    pub fn is_floating_point(self) -> bool {
        matches!(self, Self::Single | Self::Double)
    }

    /// Returns `true` for the signed integer types.
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::SByte | Self::Int16 | Self::Int32 | Self::Int64 | Self::IntPtr
        )
    }

    /// Size in bytes of a value of this type.
    #[must_use]
    pub fn size(self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Boolean | Self::SByte | Self::Byte => 1,
            Self::Char | Self::Int16 | Self::UInt16 => 2,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
            _ => 4,
        }
    }

    pub(crate) fn kind(self) -> TypeKind {
        match self {
            Self::Void => TypeKind::Void,
            Self::Boolean => TypeKind::Boolean,
            Self::Char
            | Self::SByte
            | Self::Byte
            | Self::Int16
            | Self::UInt16
            | Self::Int32
            | Self::UInt32
            | Self::Int64
            | Self::UInt64 => TypeKind::Integer {
                signed: self.is_signed(),
            },
            Self::IntPtr | Self::UIntPtr => TypeKind::PointerSized {
                signed: self.is_signed(),
            },
            Self::Single | Self::Double => TypeKind::Float,
            Self::Object | Self::String | Self::VTable => TypeKind::Class,
            Self::CodePointer => TypeKind::CodePointer,
            Self::CodePointerArray => TypeKind::Array(Self::CodePointer.id()),
            Self::ConditionCode => TypeKind::ConditionCode,
        }
    }
}

/// Structural classification of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// No value
    Void,
    /// Boolean
    Boolean,
    /// Fixed-width integer
    Integer {
        /// Two's complement signed
        signed: bool,
    },
    /// Pointer-sized integer handle, never reference counted
    PointerSized {
        /// Two's complement signed
        signed: bool,
    },
    /// IEEE floating point
    Float,
    /// Reference type with fields and a vtable
    Class,
    /// Interface type
    Interface,
    /// Value type (struct), copied by value
    ValueType,
    /// Single-dimension, zero-based array of the element type
    Array(TypeId),
    /// Managed pointer (`ref T`), always points into a live object or the stack
    ManagedPointer(TypeId),
    /// Unmanaged pointer (`T*`)
    UnmanagedPointer(TypeId),
    /// Code address
    CodePointer,
    /// Processor flags
    ConditionCode,
}

bitflags! {
    /// Attributes of a type that influence lowering decisions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// No subclass can exist.
        const SEALED = 0x0001;
        /// Cannot be instantiated.
        const ABSTRACT = 0x0002;
        /// Instances live in memory-mapped peripheral space.
        const MEMORY_MAPPED = 0x0004;
        /// Registered by the registry itself.
        const BUILTIN = 0x0008;
    }
}

/// A type registered in the [`TypeSystem`](super::TypeSystem).
#[derive(Debug, Clone)]
pub struct TypeDesc {
    /// Fully qualified name
    pub name: String,
    /// Structural classification
    pub kind: TypeKind,
    /// Size in bytes of a value held in a variable (4 for references)
    pub size: u32,
    /// Base class, if any
    pub base: Option<TypeId>,
    /// Attributes
    pub flags: TypeFlags,
    /// Instance fields in layout order
    pub fields: Vec<FieldId>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeId>,
    /// Virtual method table, indexed by [`MethodDesc::vtable_slot`]
    pub vtable: Vec<MethodId>,
    /// Interface tables, one per implemented interface
    pub interface_tables: Vec<(TypeId, Vec<MethodId>)>,
}

impl TypeDesc {
    pub(crate) fn new(name: impl Into<String>, kind: TypeKind, size: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
            base: None,
            flags: TypeFlags::empty(),
            fields: Vec::new(),
            interfaces: Vec::new(),
            vtable: Vec::new(),
            interface_tables: Vec::new(),
        }
    }

    /// Returns the interface table this type carries for `interface`.
    #[must_use]
    pub fn interface_table(&self, interface: TypeId) -> Option<&[MethodId]> {
        self.interface_tables
            .iter()
            .find(|(itf, _)| *itf == interface)
            .map(|(_, table)| table.as_slice())
    }
}

/// An instance field.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    /// Field name
    pub name: String,
    /// Declaring type
    pub owner: TypeId,
    /// Field type
    pub ty: TypeId,
    /// Byte offset from the start of the object payload
    pub offset: u32,
}

bitflags! {
    /// Method attributes used by devirtualization and lowering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// No `this` argument.
        const STATIC = 0x0001;
        /// Dispatched through the vtable.
        const VIRTUAL = 0x0002;
        /// Cannot be overridden further.
        const FINAL = 0x0004;
        /// Has no body.
        const ABSTRACT = 0x0008;
        /// Implemented outside the managed image; `this` is not passed.
        const IMPORTED = 0x0010;
        /// Value supplied by a named configuration option.
        const CONFIGURATION_OPTION = 0x0020;
    }
}

/// A method signature and its dispatch information.
#[derive(Debug, Clone)]
pub struct MethodDesc {
    /// Method name (without owner)
    pub name: String,
    /// Declaring type
    pub owner: TypeId,
    /// Declared parameters, excluding `this`
    pub params: Vec<TypeId>,
    /// Return type
    pub ret: TypeId,
    /// Attributes
    pub flags: MethodFlags,
    /// Slot in the owner's vtable, for virtual methods of classes
    pub vtable_slot: Option<usize>,
    /// Position in the interface table, for interface methods
    pub interface_slot: Option<usize>,
    /// The method this one overrides, if any
    pub overrides: Option<MethodId>,
}

impl MethodDesc {
    /// Returns `true` if the method has an implicit `this` argument.
    #[must_use]
    pub fn is_instance(&self) -> bool {
        !self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns `true` if calls can be dispatched dynamically.
    #[must_use]
    pub fn is_overridable(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL) && !self.flags.contains(MethodFlags::FINAL)
    }
}
