//! The type/method registry consumed by every pass.
//!
//! A [`TypeSystem`] is built once per compilation unit with [`TypeSystemBuilder`] and is
//! then immutable, so it can be shared through an `Arc` by methods compiled in parallel.
//! Besides ordinary type relationships it resolves the *well-known* runtime entities the
//! lowering rules call into (fault routines, allocators, reference counting, integer and
//! soft-float helpers).

use std::collections::HashMap;

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    ir::{
        types::{BuiltinType, FieldDesc, MethodDesc, MethodFlags, TypeDesc, TypeFlags, TypeKind},
        FieldId, MethodId, TypeId, WORD_SIZE,
    },
    Error, Result,
};

/// Byte offset of the first element of an array, past the length word.
pub const ARRAY_DATA_OFFSET: u32 = 4;

/// Runtime methods the lowering rules substitute calls to.
///
/// The string form of each variant is the symbolic name the runtime exports.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum WellKnownMethod {
    // Fault routines
    ThrowNullException,
    ThrowIndexOutOfRangeException,
    ThrowOverflowException,

    // Allocation and type tests
    AllocateObject,
    AllocateArray,
    FastAllocateString,
    FastAllocateReferenceCountingString,
    CastToType,
    IsInstanceOfType,

    // Dispatch
    VTableGet,
    VTableGetInterface,

    // Method wrappers
    MethodWrapperPrologue,
    MethodWrapperEpilogue,

    // Reference counting
    AddReference,
    ReleaseReference,
    LoadAndAddReference,
    ReferenceCountingSwap,
    InterlockedExchange,
    InterlockedCompareExchange,
    ReferenceCountingExchange,
    ReferenceCountingCompareExchange,

    // Integer helpers
    IntDiv,
    IntRem,
    UintDiv,
    UintRem,
    LongMul,
    LongDiv,
    LongRem,
    UlongMul,
    UlongDiv,
    UlongRem,
    LongShl,
    LongShr,
    UlongShr,

    // Soft float: compare and set
    #[strum(serialize = "SoftFP_CompareAndSet_FloatEqual")]
    FloatEqual,
    #[strum(serialize = "SoftFP_CompareAndSet_FloatGreaterOrEqual")]
    FloatGreaterOrEqual,
    #[strum(serialize = "SoftFP_CompareAndSet_FloatGreater")]
    FloatGreater,
    #[strum(serialize = "SoftFP_CompareAndSet_FloatLessOrEqual")]
    FloatLessOrEqual,
    #[strum(serialize = "SoftFP_CompareAndSet_FloatLess")]
    FloatLess,
    #[strum(serialize = "SoftFP_CompareAndSet_FloatNotEqual")]
    FloatNotEqual,
    #[strum(serialize = "SoftFP_CompareAndSet_DoubleEqual")]
    DoubleEqual,
    #[strum(serialize = "SoftFP_CompareAndSet_DoubleGreaterOrEqual")]
    DoubleGreaterOrEqual,
    #[strum(serialize = "SoftFP_CompareAndSet_DoubleGreater")]
    DoubleGreater,
    #[strum(serialize = "SoftFP_CompareAndSet_DoubleLessOrEqual")]
    DoubleLessOrEqual,
    #[strum(serialize = "SoftFP_CompareAndSet_DoubleLess")]
    DoubleLess,
    #[strum(serialize = "SoftFP_CompareAndSet_DoubleNotEqual")]
    DoubleNotEqual,

    // Soft float: binary operations
    #[strum(serialize = "SoftFP_BinaryOperations_FloatAdd")]
    FloatAdd,
    #[strum(serialize = "SoftFP_BinaryOperations_FloatSub")]
    FloatSub,
    #[strum(serialize = "SoftFP_BinaryOperations_FloatMul")]
    FloatMul,
    #[strum(serialize = "SoftFP_BinaryOperations_FloatDiv")]
    FloatDiv,
    #[strum(serialize = "SoftFP_BinaryOperations_FloatRem")]
    FloatRem,
    #[strum(serialize = "SoftFP_BinaryOperations_DoubleAdd")]
    DoubleAdd,
    #[strum(serialize = "SoftFP_BinaryOperations_DoubleSub")]
    DoubleSub,
    #[strum(serialize = "SoftFP_BinaryOperations_DoubleMul")]
    DoubleMul,
    #[strum(serialize = "SoftFP_BinaryOperations_DoubleDiv")]
    DoubleDiv,
    #[strum(serialize = "SoftFP_BinaryOperations_DoubleRem")]
    DoubleRem,

    // Soft float: unary operations
    #[strum(serialize = "SoftFP_UnaryOperations_FloatNeg")]
    FloatNeg,
    #[strum(serialize = "SoftFP_UnaryOperations_FloatFinite")]
    FloatFinite,
    #[strum(serialize = "SoftFP_UnaryOperations_DoubleNeg")]
    DoubleNeg,
    #[strum(serialize = "SoftFP_UnaryOperations_DoubleFinite")]
    DoubleFinite,

    // Soft float: conversions
    #[strum(serialize = "SoftFP_Convert_IntToFloat")]
    IntToFloat,
    #[strum(serialize = "SoftFP_Convert_LongToFloat")]
    LongToFloat,
    #[strum(serialize = "SoftFP_Convert_UnsignedIntToFloat")]
    UnsignedIntToFloat,
    #[strum(serialize = "SoftFP_Convert_UnsignedLongToFloat")]
    UnsignedLongToFloat,
    #[strum(serialize = "SoftFP_Convert_DoubleToFloat")]
    DoubleToFloat,
    #[strum(serialize = "SoftFP_Convert_IntToDouble")]
    IntToDouble,
    #[strum(serialize = "SoftFP_Convert_LongToDouble")]
    LongToDouble,
    #[strum(serialize = "SoftFP_Convert_UnsignedIntToDouble")]
    UnsignedIntToDouble,
    #[strum(serialize = "SoftFP_Convert_UnsignedLongToDouble")]
    UnsignedLongToDouble,
    #[strum(serialize = "SoftFP_Convert_FloatToDouble")]
    FloatToDouble,
    #[strum(serialize = "SoftFP_Convert_FloatToInt")]
    FloatToInt,
    #[strum(serialize = "SoftFP_Convert_FloatToUnsignedInt")]
    FloatToUnsignedInt,
    #[strum(serialize = "SoftFP_Convert_DoubleToInt")]
    DoubleToInt,
    #[strum(serialize = "SoftFP_Convert_DoubleToUnsignedInt")]
    DoubleToUnsignedInt,
    #[strum(serialize = "SoftFP_Convert_FloatToLong")]
    FloatToLong,
    #[strum(serialize = "SoftFP_Convert_FloatToUnsignedLong")]
    FloatToUnsignedLong,
    #[strum(serialize = "SoftFP_Convert_DoubleToLong")]
    DoubleToLong,
    #[strum(serialize = "SoftFP_Convert_DoubleToUnsignedLong")]
    DoubleToUnsignedLong,
}

impl WellKnownMethod {
    /// Returns the symbolic name exported by the runtime.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns `(parameters, return type)` of the helper.
    #[must_use]
    pub fn signature(self) -> (Vec<BuiltinType>, BuiltinType) {
        use BuiltinType as B;

        match self {
            Self::ThrowNullException
            | Self::ThrowIndexOutOfRangeException
            | Self::ThrowOverflowException
            | Self::MethodWrapperPrologue
            | Self::MethodWrapperEpilogue => (vec![], B::Void),

            Self::AllocateObject => (vec![B::VTable], B::Object),
            Self::AllocateArray => (vec![B::VTable, B::UInt32], B::Object),
            Self::FastAllocateString | Self::FastAllocateReferenceCountingString => {
                (vec![B::Int32], B::String)
            }
            Self::CastToType | Self::IsInstanceOfType => (vec![B::Object, B::VTable], B::Object),

            Self::VTableGet => (vec![B::Object], B::VTable),
            Self::VTableGetInterface => (vec![B::Object, B::VTable], B::CodePointerArray),

            Self::AddReference | Self::ReleaseReference => (vec![B::Object], B::Void),
            Self::LoadAndAddReference => (vec![B::UIntPtr], B::Object),
            Self::ReferenceCountingSwap => (vec![B::UIntPtr, B::Object], B::Void),
            Self::InterlockedExchange | Self::ReferenceCountingExchange => {
                (vec![B::UIntPtr, B::Object], B::Object)
            }
            Self::InterlockedCompareExchange | Self::ReferenceCountingCompareExchange => {
                (vec![B::UIntPtr, B::Object, B::Object], B::Object)
            }

            Self::IntDiv | Self::IntRem => (vec![B::Int32, B::Int32], B::Int32),
            Self::UintDiv | Self::UintRem => (vec![B::UInt32, B::UInt32], B::UInt32),
            Self::LongMul | Self::LongDiv | Self::LongRem => (vec![B::Int64, B::Int64], B::Int64),
            Self::UlongMul | Self::UlongDiv | Self::UlongRem => {
                (vec![B::UInt64, B::UInt64], B::UInt64)
            }
            Self::LongShl | Self::LongShr => (vec![B::Int64, B::Int32], B::Int64),
            Self::UlongShr => (vec![B::UInt64, B::Int32], B::UInt64),

            Self::FloatEqual
            | Self::FloatGreaterOrEqual
            | Self::FloatGreater
            | Self::FloatLessOrEqual
            | Self::FloatLess
            | Self::FloatNotEqual => (vec![B::Single, B::Single], B::Boolean),
            Self::DoubleEqual
            | Self::DoubleGreaterOrEqual
            | Self::DoubleGreater
            | Self::DoubleLessOrEqual
            | Self::DoubleLess
            | Self::DoubleNotEqual => (vec![B::Double, B::Double], B::Boolean),

            Self::FloatAdd | Self::FloatSub | Self::FloatMul | Self::FloatDiv | Self::FloatRem => {
                (vec![B::Single, B::Single], B::Single)
            }
            Self::DoubleAdd
            | Self::DoubleSub
            | Self::DoubleMul
            | Self::DoubleDiv
            | Self::DoubleRem => (vec![B::Double, B::Double], B::Double),
            Self::FloatNeg | Self::FloatFinite => (vec![B::Single], B::Single),
            Self::DoubleNeg | Self::DoubleFinite => (vec![B::Double], B::Double),

            Self::IntToFloat => (vec![B::Int32, B::Boolean], B::Single),
            Self::LongToFloat => (vec![B::Int64, B::Boolean], B::Single),
            Self::UnsignedIntToFloat => (vec![B::UInt32, B::Boolean], B::Single),
            Self::UnsignedLongToFloat => (vec![B::UInt64, B::Boolean], B::Single),
            Self::DoubleToFloat => (vec![B::Double, B::Boolean], B::Single),
            Self::IntToDouble => (vec![B::Int32, B::Boolean], B::Double),
            Self::LongToDouble => (vec![B::Int64, B::Boolean], B::Double),
            Self::UnsignedIntToDouble => (vec![B::UInt32, B::Boolean], B::Double),
            Self::UnsignedLongToDouble => (vec![B::UInt64, B::Boolean], B::Double),
            Self::FloatToDouble => (vec![B::Single, B::Boolean], B::Double),
            Self::FloatToInt => (vec![B::Single, B::Boolean], B::Int32),
            Self::FloatToUnsignedInt => (vec![B::Single, B::Boolean], B::UInt32),
            Self::DoubleToInt => (vec![B::Double, B::Boolean], B::Int32),
            Self::DoubleToUnsignedInt => (vec![B::Double, B::Boolean], B::UInt32),
            Self::FloatToLong => (vec![B::Single, B::Boolean], B::Int64),
            Self::FloatToUnsignedLong => (vec![B::Single, B::Boolean], B::UInt64),
            Self::DoubleToLong => (vec![B::Double, B::Boolean], B::Int64),
            Self::DoubleToUnsignedLong => (vec![B::Double, B::Boolean], B::UInt64),
        }
    }
}

/// Runtime fields the lowering rules read directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum WellKnownField {
    /// Element count stored in the array header.
    ArrayLength,
    /// Code pointer table of a vtable.
    VTableMethodPointers,
}

/// Immutable registry of types, fields and methods.
///
/// Safe for concurrent reads: nothing in it changes after [`TypeSystemBuilder::build`].
#[derive(Debug, Clone)]
pub struct TypeSystem {
    types: Vec<TypeDesc>,
    fields: Vec<FieldDesc>,
    methods: Vec<MethodDesc>,
    well_known_methods: HashMap<WellKnownMethod, MethodId>,
    well_known_fields: HashMap<WellKnownField, FieldId>,
    arrays: HashMap<TypeId, TypeId>,
    managed_pointers: HashMap<TypeId, TypeId>,
}

impl TypeSystem {
    /// Returns the descriptor of a type.
    #[must_use]
    pub fn ty(&self, id: TypeId) -> &TypeDesc {
        &self.types[id.index()]
    }

    /// Returns the descriptor of a field.
    #[must_use]
    pub fn field(&self, id: FieldId) -> &FieldDesc {
        &self.fields[id.index()]
    }

    /// Returns the descriptor of a method.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &MethodDesc {
        &self.methods[id.index()]
    }

    /// Returns the descriptor of a method, if `id` is registered.
    #[must_use]
    pub fn get_method(&self, id: MethodId) -> Option<&MethodDesc> {
        self.methods.get(id.index())
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Returns `Owner::Name` for diagnostics.
    #[must_use]
    pub fn method_name(&self, id: MethodId) -> String {
        match self.get_method(id) {
            Some(md) => format!("{}::{}", self.ty(md.owner).name, md.name),
            None => id.to_string(),
        }
    }

    /// Resolves a well-known runtime method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingWellKnown`] if the runtime did not register it.
    pub fn well_known_method(&self, wkm: WellKnownMethod) -> Result<MethodId> {
        self.well_known_methods
            .get(&wkm)
            .copied()
            .ok_or_else(|| Error::MissingWellKnown(wkm.name().to_string()))
    }

    /// Returns the well-known identity of a method, if it has one.
    #[must_use]
    pub fn well_known_identity(&self, method: MethodId) -> Option<WellKnownMethod> {
        self.well_known_methods
            .iter()
            .find(|(_, id)| **id == method)
            .map(|(wkm, _)| *wkm)
    }

    /// Returns `true` if `method` is the given well-known runtime method.
    #[must_use]
    pub fn is_well_known(&self, method: MethodId, wkm: WellKnownMethod) -> bool {
        self.well_known_methods.get(&wkm) == Some(&method)
    }

    /// Resolves a well-known runtime field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingWellKnown`] if the field is not registered.
    pub fn well_known_field(&self, wkf: WellKnownField) -> Result<FieldId> {
        self.well_known_fields.get(&wkf).copied().ok_or_else(|| {
            let name: &'static str = wkf.into();
            Error::MissingWellKnown(name.to_string())
        })
    }

    /// Size in bytes of a value of `ty` held in a variable.
    #[must_use]
    pub fn size_in_bytes(&self, ty: TypeId) -> u32 {
        self.ty(ty).size
    }

    /// Number of machine words a variable of `ty` occupies.
    #[must_use]
    pub fn size_in_words(&self, ty: TypeId) -> u32 {
        self.size_in_bytes(ty).div_ceil(WORD_SIZE)
    }

    /// Returns the builtin identity of `ty`, if it is one.
    #[must_use]
    pub fn builtin(&self, ty: TypeId) -> Option<BuiltinType> {
        BuiltinType::iter().find(|b| b.id() == ty)
    }

    /// Returns `true` for floating point types.
    #[must_use]
    pub fn is_floating_point(&self, ty: TypeId) -> bool {
        self.ty(ty).kind == TypeKind::Float
    }

    /// Returns `true` for signed integer types.
    #[must_use]
    pub fn is_signed(&self, ty: TypeId) -> bool {
        matches!(
            self.ty(ty).kind,
            TypeKind::Integer { signed: true } | TypeKind::PointerSized { signed: true }
        ) || self.is_floating_point(ty)
    }

    /// Returns `true` for value types, including primitive scalars.
    #[must_use]
    pub fn is_value_type(&self, ty: TypeId) -> bool {
        matches!(
            self.ty(ty).kind,
            TypeKind::ValueType
                | TypeKind::Integer { .. }
                | TypeKind::PointerSized { .. }
                | TypeKind::Float
                | TypeKind::Boolean
        )
    }

    /// Returns `true` for object references (classes, interfaces, arrays).
    #[must_use]
    pub fn is_reference(&self, ty: TypeId) -> bool {
        matches!(
            self.ty(ty).kind,
            TypeKind::Class | TypeKind::Interface | TypeKind::Array(_)
        )
    }

    /// Returns `true` for pointer-sized integer handles (`IntPtr`/`UIntPtr`).
    #[must_use]
    pub fn is_pointer_sized(&self, ty: TypeId) -> bool {
        matches!(self.ty(ty).kind, TypeKind::PointerSized { .. })
    }

    /// Returns `true` for managed pointers (`ref T`).
    #[must_use]
    pub fn is_managed_pointer(&self, ty: TypeId) -> bool {
        matches!(self.ty(ty).kind, TypeKind::ManagedPointer(_))
    }

    /// Returns `true` if a value of `ty` can hold a memory address.
    #[must_use]
    pub fn can_point_to_memory(&self, ty: TypeId) -> bool {
        matches!(
            self.ty(ty).kind,
            TypeKind::Class
                | TypeKind::Interface
                | TypeKind::Array(_)
                | TypeKind::ManagedPointer(_)
                | TypeKind::UnmanagedPointer(_)
                | TypeKind::PointerSized { .. }
        )
    }

    /// Returns `true` for interface types.
    #[must_use]
    pub fn is_interface(&self, ty: TypeId) -> bool {
        self.ty(ty).kind == TypeKind::Interface
    }

    /// Returns `true` if no subtype of `ty` can exist.
    #[must_use]
    pub fn is_sealed(&self, ty: TypeId) -> bool {
        let desc = self.ty(ty);
        desc.flags.contains(TypeFlags::SEALED) || matches!(desc.kind, TypeKind::Array(_))
    }

    /// Element type of an array type.
    #[must_use]
    pub fn element_type(&self, ty: TypeId) -> Option<TypeId> {
        match self.ty(ty).kind {
            TypeKind::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Pointee of a managed or unmanaged pointer type.
    #[must_use]
    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match self.ty(ty).kind {
            TypeKind::ManagedPointer(p) | TypeKind::UnmanagedPointer(p) => Some(p),
            _ => None,
        }
    }

    /// The array type registered for `element`, if any.
    #[must_use]
    pub fn array_of(&self, element: TypeId) -> Option<TypeId> {
        self.arrays.get(&element).copied()
    }

    /// The managed pointer type registered for `pointee`, if any.
    #[must_use]
    pub fn managed_pointer_to(&self, pointee: TypeId) -> Option<TypeId> {
        self.managed_pointers.get(&pointee).copied()
    }

    /// Returns `true` if a value of `sub` can be used where `sup` is expected.
    ///
    /// Walks the base-class chain and the implemented interfaces.
    #[must_use]
    pub fn is_assignable_to(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(ty) = current {
            if ty == sup {
                return true;
            }
            let desc = self.ty(ty);
            if desc.interfaces.contains(&sup) {
                return true;
            }
            current = desc.base;
        }
        false
    }

    /// Finds the implementation `concrete` uses for the virtual or interface method `method`.
    #[must_use]
    pub fn find_virtual_target(&self, method: MethodId, concrete: TypeId) -> Option<MethodId> {
        let md = self.method(method);
        let desc = self.ty(concrete);

        if self.is_interface(md.owner) {
            let slot = md.interface_slot?;
            return desc
                .interface_table(md.owner)
                .and_then(|table| table.get(slot).copied());
        }

        if !md.flags.contains(MethodFlags::VIRTUAL) {
            return Some(method);
        }

        md.vtable_slot.and_then(|slot| desc.vtable.get(slot).copied())
    }

    /// Returns the only instantiable type assignable to `ty`, if exactly one exists.
    ///
    /// Meaningful only when the whole program is known (closed-world build).
    #[must_use]
    pub fn single_concrete_implementation(&self, ty: TypeId) -> Option<TypeId> {
        let mut found = None;
        for (index, desc) in self.types.iter().enumerate() {
            if desc.kind != TypeKind::Class || desc.flags.contains(TypeFlags::ABSTRACT) {
                continue;
            }
            let candidate = TypeId::new(index);
            if self.is_assignable_to(candidate, ty) {
                if found.is_some() {
                    return None;
                }
                found = Some(candidate);
            }
        }
        found
    }

    /// Finds the field of `ty` laid out at `offset`, if any.
    #[must_use]
    pub fn find_field_at_offset(&self, ty: TypeId, offset: u32) -> Option<FieldId> {
        let mut current = Some(ty);
        while let Some(t) = current {
            let desc = self.ty(t);
            if let Some(field) = desc
                .fields
                .iter()
                .copied()
                .find(|f| self.field(*f).offset == offset)
            {
                return Some(field);
            }
            current = desc.base;
        }
        None
    }

    /// Size in bytes of one array element, as laid out in memory.
    #[must_use]
    pub fn element_size(&self, array: TypeId) -> u32 {
        self.element_type(array)
            .map_or(WORD_SIZE, |element| self.size_in_bytes(element))
    }
}

/// Incremental construction of a [`TypeSystem`].
///
/// Class hierarchies are built top-down: a class inherits its base's vtable at the
/// moment it is added, so base methods must be registered before subclasses.
///
/// # Examples
///
/// ```rust
/// use downlevel::ir::{BuiltinType, MethodFlags, TypeFlags, TypeSystemBuilder};
///
/// let mut builder = TypeSystemBuilder::new().with_runtime_support();
/// let shape = builder.add_class("Shape", None, TypeFlags::ABSTRACT);
/// let area = builder.add_method(shape, "Area", &[], BuiltinType::Int32.id(), MethodFlags::VIRTUAL);
/// let square = builder.add_class("Square", Some(shape), TypeFlags::SEALED);
/// let square_area = builder.add_override(square, area, MethodFlags::empty());
///
/// let ts = builder.build();
/// assert_eq!(ts.find_virtual_target(area, square), Some(square_area));
/// ```
#[derive(Debug, Clone)]
pub struct TypeSystemBuilder {
    ts: TypeSystem,
}

impl Default for TypeSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeSystemBuilder {
    /// Creates a registry holding the builtin types and runtime fields.
    #[must_use]
    pub fn new() -> Self {
        let mut ts = TypeSystem {
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            well_known_methods: HashMap::new(),
            well_known_fields: HashMap::new(),
            arrays: HashMap::new(),
            managed_pointers: HashMap::new(),
        };

        for builtin in BuiltinType::iter() {
            let name: &'static str = builtin.into();
            let mut desc = TypeDesc::new(format!("System.{name}"), builtin.kind(), builtin.size());
            desc.flags |= TypeFlags::BUILTIN;
            if matches!(builtin, BuiltinType::String | BuiltinType::VTable) {
                desc.flags |= TypeFlags::SEALED;
                desc.base = Some(BuiltinType::Object.id());
            }
            ts.types.push(desc);
        }
        ts.arrays.insert(
            BuiltinType::CodePointer.id(),
            BuiltinType::CodePointerArray.id(),
        );

        let mut builder = Self { ts };

        let array_impl = builder.add_class(
            "System.ArrayImpl",
            Some(BuiltinType::Object.id()),
            TypeFlags::BUILTIN,
        );
        let length = builder.add_field(array_impl, "m_numElements", BuiltinType::UInt32.id());
        builder
            .ts
            .well_known_fields
            .insert(WellKnownField::ArrayLength, length);

        let pointers = builder.add_field(
            BuiltinType::VTable.id(),
            "MethodPointers",
            BuiltinType::CodePointerArray.id(),
        );
        builder
            .ts
            .well_known_fields
            .insert(WellKnownField::VTableMethodPointers, pointers);

        builder
    }

    /// Registers every [`WellKnownMethod`] as a static method of `Runtime`.
    #[must_use]
    pub fn with_runtime_support(mut self) -> Self {
        let runtime = self.add_class("Runtime", None, TypeFlags::SEALED | TypeFlags::ABSTRACT);
        for wkm in WellKnownMethod::iter() {
            let (params, ret) = wkm.signature();
            let params: Vec<TypeId> = params.into_iter().map(BuiltinType::id).collect();
            let id = self.add_method(
                runtime,
                wkm.name(),
                &params,
                ret.id(),
                MethodFlags::STATIC,
            );
            self.ts.well_known_methods.insert(wkm, id);
        }
        self
    }

    /// Removes a well-known method binding, as a runtime lacking that helper would.
    #[must_use]
    pub fn without_well_known(mut self, wkm: WellKnownMethod) -> Self {
        self.ts.well_known_methods.remove(&wkm);
        self
    }

    fn push_type(&mut self, desc: TypeDesc) -> TypeId {
        self.ts.types.push(desc);
        TypeId::new(self.ts.types.len() - 1)
    }

    /// Adds a reference class; it inherits the base class's vtable.
    pub fn add_class(&mut self, name: &str, base: Option<TypeId>, flags: TypeFlags) -> TypeId {
        let mut desc = TypeDesc::new(name, TypeKind::Class, WORD_SIZE);
        desc.base = Some(base.unwrap_or(BuiltinType::Object.id()));
        desc.flags = flags;
        if let Some(base) = base {
            let base_desc = self.ts.ty(base);
            desc.vtable = base_desc.vtable.clone();
            desc.interfaces = base_desc.interfaces.clone();
            desc.interface_tables = base_desc.interface_tables.clone();
        }
        self.push_type(desc)
    }

    /// Adds a sealed value type (struct) of the given size in bytes.
    pub fn add_value_type(&mut self, name: &str, size: u32) -> TypeId {
        let mut desc = TypeDesc::new(name, TypeKind::ValueType, size);
        desc.flags = TypeFlags::SEALED;
        self.push_type(desc)
    }

    /// Adds an interface.
    pub fn add_interface(&mut self, name: &str) -> TypeId {
        let mut desc = TypeDesc::new(name, TypeKind::Interface, WORD_SIZE);
        desc.flags = TypeFlags::ABSTRACT;
        self.push_type(desc)
    }

    /// Returns the array type of `element`, creating it on first use.
    pub fn add_array(&mut self, element: TypeId) -> TypeId {
        if let Some(existing) = self.ts.arrays.get(&element) {
            return *existing;
        }
        let name = format!("{}[]", self.ts.ty(element).name);
        let mut desc = TypeDesc::new(name, TypeKind::Array(element), WORD_SIZE);
        desc.base = Some(BuiltinType::Object.id());
        desc.flags = TypeFlags::SEALED;
        let id = self.push_type(desc);
        self.ts.arrays.insert(element, id);
        id
    }

    /// Returns the managed pointer type to `pointee`, creating it on first use.
    pub fn add_managed_pointer(&mut self, pointee: TypeId) -> TypeId {
        if let Some(existing) = self.ts.managed_pointers.get(&pointee) {
            return *existing;
        }
        let name = format!("{}&", self.ts.ty(pointee).name);
        let id = self.push_type(TypeDesc::new(
            name,
            TypeKind::ManagedPointer(pointee),
            WORD_SIZE,
        ));
        self.ts.managed_pointers.insert(pointee, id);
        id
    }

    /// Marks `ty` as implementing `interface` with the given interface table.
    pub fn implement_interface(&mut self, ty: TypeId, interface: TypeId, table: Vec<MethodId>) {
        let desc = &mut self.ts.types[ty.index()];
        if !desc.interfaces.contains(&interface) {
            desc.interfaces.push(interface);
        }
        desc.interface_tables.retain(|(itf, _)| *itf != interface);
        desc.interface_tables.push((interface, table));
    }

    /// Adds an instance field laid out after every field already present.
    pub fn add_field(&mut self, owner: TypeId, name: &str, ty: TypeId) -> FieldId {
        let size = self.ts.ty(ty).size.max(1);
        let align = size.clamp(1, WORD_SIZE);
        let end = self.payload_size(owner);
        let offset = end.div_ceil(align) * align;

        self.ts.fields.push(FieldDesc {
            name: name.to_string(),
            owner,
            ty,
            offset,
        });
        let id = FieldId::new(self.ts.fields.len() - 1);

        let desc = &mut self.ts.types[owner.index()];
        desc.fields.push(id);
        if desc.kind == TypeKind::ValueType {
            desc.size = desc.size.max(offset + size);
        }
        id
    }

    fn payload_size(&self, ty: TypeId) -> u32 {
        let desc = self.ts.ty(ty);
        let own = desc
            .fields
            .iter()
            .map(|f| {
                let field = self.ts.field(*f);
                field.offset + self.ts.ty(field.ty).size
            })
            .max()
            .unwrap_or(0);
        let inherited = match desc.base {
            Some(base) if base != ty => self.payload_size(base),
            _ => 0,
        };
        own.max(inherited)
    }

    /// Adds a method. Virtual methods of classes get a fresh vtable slot; methods of
    /// interfaces get the next interface slot.
    pub fn add_method(
        &mut self,
        owner: TypeId,
        name: &str,
        params: &[TypeId],
        ret: TypeId,
        flags: MethodFlags,
    ) -> MethodId {
        let id = MethodId::new(self.ts.methods.len());
        let is_interface = self.ts.is_interface(owner);

        let mut md = MethodDesc {
            name: name.to_string(),
            owner,
            params: params.to_vec(),
            ret,
            flags,
            vtable_slot: None,
            interface_slot: None,
            overrides: None,
        };

        if is_interface {
            md.flags |= MethodFlags::VIRTUAL | MethodFlags::ABSTRACT;
            let slot = self
                .ts
                .methods
                .iter()
                .filter(|m| m.owner == owner)
                .count();
            md.interface_slot = Some(slot);
        } else if flags.contains(MethodFlags::VIRTUAL) {
            let desc = &mut self.ts.types[owner.index()];
            md.vtable_slot = Some(desc.vtable.len());
            desc.vtable.push(id);
        }

        self.ts.methods.push(md);
        id
    }

    /// Adds an override of `base_method` in `owner`, reusing its vtable slot.
    pub fn add_override(
        &mut self,
        owner: TypeId,
        base_method: MethodId,
        flags: MethodFlags,
    ) -> MethodId {
        let base = self.ts.method(base_method).clone();
        let id = MethodId::new(self.ts.methods.len());
        let md = MethodDesc {
            name: base.name,
            owner,
            params: base.params,
            ret: base.ret,
            flags: MethodFlags::VIRTUAL | (flags - MethodFlags::ABSTRACT),
            vtable_slot: base.vtable_slot,
            interface_slot: None,
            overrides: Some(base_method),
        };
        if let Some(slot) = md.vtable_slot {
            let desc = &mut self.ts.types[owner.index()];
            if slot < desc.vtable.len() {
                desc.vtable[slot] = id;
            }
        }
        self.ts.methods.push(md);
        id
    }

    /// Finishes construction.
    #[must_use]
    pub fn build(self) -> TypeSystem {
        self.ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_support_registers_helpers() {
        let ts = TypeSystemBuilder::new().with_runtime_support().build();
        let div = ts.well_known_method(WellKnownMethod::IntDiv).unwrap();
        assert_eq!(ts.method(div).name, "IntDiv");
        assert_eq!(ts.method(div).params.len(), 2);
        assert!(ts.is_well_known(div, WellKnownMethod::IntDiv));
        assert_eq!(ts.well_known_identity(div), Some(WellKnownMethod::IntDiv));

        let cmp = ts.well_known_method(WellKnownMethod::DoubleLess).unwrap();
        assert_eq!(ts.method(cmp).name, "SoftFP_CompareAndSet_DoubleLess");
    }

    #[test]
    fn test_missing_well_known() {
        let ts = TypeSystemBuilder::new()
            .with_runtime_support()
            .without_well_known(WellKnownMethod::LongMul)
            .build();
        assert!(matches!(
            ts.well_known_method(WellKnownMethod::LongMul),
            Err(Error::MissingWellKnown(_))
        ));
    }

    #[test]
    fn test_vtable_inheritance_and_override() {
        let mut b = TypeSystemBuilder::new();
        let animal = b.add_class("Animal", None, TypeFlags::ABSTRACT);
        let speak = b.add_method(animal, "Speak", &[], BuiltinType::Void.id(), MethodFlags::VIRTUAL);
        let dog = b.add_class("Dog", Some(animal), TypeFlags::empty());
        let dog_speak = b.add_override(dog, speak, MethodFlags::empty());
        let puppy = b.add_class("Puppy", Some(dog), TypeFlags::SEALED);
        let ts = b.build();

        assert_eq!(ts.find_virtual_target(speak, dog), Some(dog_speak));
        assert_eq!(ts.find_virtual_target(speak, puppy), Some(dog_speak));
        assert_eq!(ts.find_virtual_target(speak, animal), Some(speak));
        assert!(ts.is_assignable_to(puppy, animal));
        assert!(!ts.is_assignable_to(animal, dog));
        assert!(ts.is_sealed(puppy));
    }

    #[test]
    fn test_single_concrete_implementation() {
        let mut b = TypeSystemBuilder::new();
        let base = b.add_class("Base", None, TypeFlags::ABSTRACT);
        let only = b.add_class("Only", Some(base), TypeFlags::empty());
        let ts = b.build();
        assert_eq!(ts.single_concrete_implementation(base), Some(only));

        let mut b = TypeSystemBuilder::new();
        let base = b.add_class("Base", None, TypeFlags::ABSTRACT);
        b.add_class("A", Some(base), TypeFlags::empty());
        b.add_class("B", Some(base), TypeFlags::empty());
        let ts = b.build();
        assert_eq!(ts.single_concrete_implementation(base), None);
    }

    #[test]
    fn test_interface_dispatch() {
        let mut b = TypeSystemBuilder::new();
        let itf = b.add_interface("IRun");
        let run = b.add_method(itf, "Run", &[], BuiltinType::Void.id(), MethodFlags::empty());
        let cls = b.add_class("Runner", None, TypeFlags::empty());
        let imp = b.add_method(cls, "Run", &[], BuiltinType::Void.id(), MethodFlags::VIRTUAL);
        b.implement_interface(cls, itf, vec![imp]);
        let ts = b.build();

        assert_eq!(ts.method(run).interface_slot, Some(0));
        assert_eq!(ts.find_virtual_target(run, cls), Some(imp));
        assert!(ts.is_assignable_to(cls, itf));
    }

    #[test]
    fn test_field_layout() {
        let mut b = TypeSystemBuilder::new();
        let point = b.add_value_type("Point", 0);
        let x = b.add_field(point, "X", BuiltinType::Int32.id());
        let y = b.add_field(point, "Y", BuiltinType::Int64.id());
        let ts = b.build();

        assert_eq!(ts.field(x).offset, 0);
        assert_eq!(ts.field(y).offset, 4);
        assert_eq!(ts.size_in_bytes(point), 12);
        assert_eq!(ts.size_in_words(point), 3);
        assert_eq!(ts.find_field_at_offset(point, 4), Some(y));
        assert_eq!(ts.find_field_at_offset(point, 8), None);
    }

    #[test]
    fn test_array_length_field() {
        let ts = TypeSystemBuilder::new().build();
        let length = ts.well_known_field(WellKnownField::ArrayLength).unwrap();
        assert_eq!(ts.field(length).offset, 0);
        assert_eq!(ts.field(length).ty, BuiltinType::UInt32.id());
    }
}
