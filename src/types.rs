//! Compact type system.
//!
//! Types are 32-bit packed codes (`TypeCode`); composite types (struct,
//! function) are additionally described by an entry owned by a
//! [`TypeRegistry`], identified by slot index rather than by structural
//! hash — two structurally identical but separately declared struct types
//! are deliberately distinguishable, per the registry-identity design
//! note. Vectors and arrays are never registry-backed: both encode their
//! element type and count (capped at 255, 0 meaning unsized) entirely
//! inline, so two structurally identical vector or array types always
//! compare equal as integers.
//!
//! Bit layout, high to low:
//!
//! ```text
//! 31        28 27        20 19        12 11         0
//! [ category ][   width    ][ qualifiers ][ attributes ]
//! ```

use bitflags::bitflags;
use std::fmt;

use crate::diagnostics::codes;

bitflags! {
    /// Qualifier bitset occupying bits 12-19 of a [`TypeCode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Qualifiers: u8 {
        const UNSIGNED = 0x01;
        const CONST    = 0x02;
        const VOLATILE = 0x04;
        const RESTRICT = 0x08;
        const ATOMIC   = 0x10;
    }
}

/// Type category occupying bits 28-31 of a [`TypeCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Category {
    Void = 0,
    Bool = 1,
    Integer = 2,
    Float = 3,
    Pointer = 4,
    Vector = 5,
    Array = 6,
    Struct = 7,
    Function = 8,
}

impl Category {
    fn from_bits(bits: u32) -> Option<Category> {
        Some(match bits {
            0 => Category::Void,
            1 => Category::Bool,
            2 => Category::Integer,
            3 => Category::Float,
            4 => Category::Pointer,
            5 => Category::Vector,
            6 => Category::Array,
            7 => Category::Struct,
            8 => Category::Function,
            _ => return None,
        })
    }

    const fn is_composite(self) -> bool {
        matches!(self, Category::Struct | Category::Function)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Void => "void",
            Category::Bool => "bool",
            Category::Integer => "integer",
            Category::Float => "float",
            Category::Pointer => "pointer",
            Category::Vector => "vector",
            Category::Array => "array",
            Category::Struct => "struct",
            Category::Function => "function",
        };
        f.write_str(s)
    }
}

/// Memory space a pointer refers into; packed in the low 3 bits of a
/// pointer's width field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemorySpace {
    Global = 0,
    Local = 1,
    Shared = 2,
    Constant = 3,
    Private = 4,
}

impl MemorySpace {
    fn from_bits(bits: u8) -> MemorySpace {
        match bits & 0x7 {
            0 => MemorySpace::Global,
            1 => MemorySpace::Local,
            2 => MemorySpace::Shared,
            3 => MemorySpace::Constant,
            _ => MemorySpace::Private,
        }
    }
}

const CATEGORY_SHIFT: u32 = 28;
const WIDTH_SHIFT: u32 = 20;
const QUAL_SHIFT: u32 = 12;
const ATTR_MASK: u32 = 0xFFF;
const WIDTH_MASK: u32 = 0xFF;
const QUAL_MASK: u32 = 0xFF;

const fn pack(category: u32, width: u8, quals: u8, attrs: u16) -> u32 {
    (category << CATEGORY_SHIFT)
        | ((width as u32) << WIDTH_SHIFT)
        | ((quals as u32) << QUAL_SHIFT)
        | (attrs as u32 & ATTR_MASK)
}

/// A 32-bit encoded type. Equal logical types compare equal as integers,
/// except registry-managed composites, whose equality is the identity of
/// the registry slot encoded in their attributes field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeCode(u32);

impl fmt::Debug for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TypeCode({:#010x}, {}, width={}, quals={:?}, attrs={:#x})",
            self.0,
            self.category(),
            self.width(),
            self.qualifiers(),
            self.attributes()
        )
    }
}

impl TypeCode {
    /// Reconstructs a `TypeCode` from its raw 32-bit encoding, e.g. as read
    /// back from a COIL binary. Does not validate that the category bits
    /// name a known [`Category`]; use [`TypeCode::category`] to check.
    pub const fn from_raw(raw: u32) -> TypeCode {
        TypeCode(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn category(self) -> Category {
        Category::from_bits((self.0 >> CATEGORY_SHIFT) & 0xF).unwrap_or(Category::Void)
    }

    pub fn width(self) -> u8 {
        ((self.0 >> WIDTH_SHIFT) & WIDTH_MASK) as u8
    }

    pub fn qualifiers(self) -> Qualifiers {
        Qualifiers::from_bits_truncate(((self.0 >> QUAL_SHIFT) & QUAL_MASK) as u8)
    }

    pub fn attributes(self) -> u16 {
        (self.0 & ATTR_MASK) as u16
    }

    pub const fn is_void(self) -> bool {
        (self.0 >> CATEGORY_SHIFT) & 0xF == 0
    }

    /// Pure bit-packing; never touches a registry. `attrs` is truncated to
    /// 12 bits.
    pub const fn create_basic(category: Category, width: u8, quals: Qualifiers, attrs: u16) -> TypeCode {
        TypeCode(pack(category as u32, width, quals.bits(), attrs))
    }

    /// A compact 12-bit sub-encoding of `self`, used as the `attributes`
    /// payload of a pointer, vector, or array type whose base/element is
    /// itself encoded inline rather than via a registry slot.
    ///
    /// For struct/function bases this folds in only the low 8 bits of the
    /// registry index (256 slots addressable through a nested pointer,
    /// vector, or array element).
    fn compact_encode(self) -> u16 {
        let cat = (self.0 >> CATEGORY_SHIFT) & 0xF;
        let payload = if self.category().is_composite() {
            self.attributes() & 0xFF
        } else {
            self.width() as u16
        };
        ((cat as u16) << 8) | payload
    }

    fn compact_decode(bits: u16) -> (Category, u16) {
        let cat = Category::from_bits(((bits >> 8) & 0xF) as u32).unwrap_or(Category::Void);
        (cat, bits & 0xFF)
    }

    /// Returns the type pointed to by a pointer type, reconstructed from its
    /// compact encoding. Composite bases only recover their registry slot
    /// (low 8 bits); callers needing the full struct/function descriptor
    /// look it up in the registry by that index.
    pub fn pointer_base(self) -> TypeCode {
        debug_assert!(matches!(self.category(), Category::Pointer));
        let (cat, payload) = Self::compact_decode(self.attributes());
        match cat {
            Category::Struct | Category::Function => {
                TypeCode::create_basic(cat, 0, Qualifiers::empty(), payload)
            }
            Category::Integer | Category::Float => {
                TypeCode::create_basic(cat, payload as u8, Qualifiers::empty(), 0)
            }
            _ => TypeCode::create_basic(cat, payload as u8, Qualifiers::empty(), 0),
        }
    }

    pub fn pointer_space(self) -> MemorySpace {
        debug_assert!(matches!(self.category(), Category::Pointer));
        MemorySpace::from_bits(self.width())
    }

    pub fn vector_len(self) -> u8 {
        debug_assert!(matches!(self.category(), Category::Vector));
        self.width()
    }

    /// `0` denotes an unsized array (either declared unsized, or a count
    /// above 255 that could not be packed into the width field).
    pub fn array_len(self) -> u8 {
        debug_assert!(matches!(self.category(), Category::Array));
        self.width()
    }

    /// Creates a pointer type. Deterministic: identical inputs yield
    /// identical codes.
    pub fn create_pointer(base: TypeCode, space: MemorySpace, quals: Qualifiers) -> TypeCode {
        let attrs = base.compact_encode();
        TypeCode(pack(Category::Pointer as u32, space as u8, quals.bits(), attrs))
    }

    /// Creates a vector type. A zero element count is accepted here (the
    /// semantic analyzer is responsible for rejecting it as a semantic
    /// error); a count above 255 cannot be packed into the width field and
    /// is likewise left to the caller to reject.
    pub fn create_vector(elem: TypeCode, count: u8) -> TypeCode {
        let attrs = elem.compact_encode();
        TypeCode(pack(Category::Vector as u32, count, 0, attrs))
    }

    /// Creates an array type. Encoded entirely inline, exactly like
    /// [`create_vector`](Self::create_vector): never registry-backed, so
    /// two structurally identical arrays always compare equal as integers.
    /// `count > 255` is encoded as `0` (unsized) since the width field is
    /// only 8 bits wide; a declared-unsized array (`count == 0`) encodes
    /// the same way.
    pub fn create_array(elem: TypeCode, count: u32) -> TypeCode {
        let width = if count > 255 { 0 } else { count as u8 };
        let attrs = elem.compact_encode();
        TypeCode(pack(Category::Array as u32, width, 0, attrs))
    }
}

/// Predefined basic type codes, built from [`TypeCode::create_basic`] so
/// that equal logical types compare equal as integers mechanically, rather
/// than by hand-typed hex matching a documented layout.
pub mod consts {
    use super::*;

    pub const VOID: TypeCode = TypeCode::create_basic(Category::Void, 0, Qualifiers::empty(), 0);
    pub const BOOL: TypeCode = TypeCode::create_basic(Category::Bool, 1, Qualifiers::empty(), 0);
    pub const I8: TypeCode = TypeCode::create_basic(Category::Integer, 8, Qualifiers::empty(), 0);
    pub const I16: TypeCode = TypeCode::create_basic(Category::Integer, 16, Qualifiers::empty(), 0);
    pub const I32: TypeCode = TypeCode::create_basic(Category::Integer, 32, Qualifiers::empty(), 0);
    pub const I64: TypeCode = TypeCode::create_basic(Category::Integer, 64, Qualifiers::empty(), 0);
    pub const U8: TypeCode = TypeCode::create_basic(Category::Integer, 8, Qualifiers::UNSIGNED, 0);
    pub const U16: TypeCode = TypeCode::create_basic(Category::Integer, 16, Qualifiers::UNSIGNED, 0);
    pub const U32: TypeCode = TypeCode::create_basic(Category::Integer, 32, Qualifiers::UNSIGNED, 0);
    pub const U64: TypeCode = TypeCode::create_basic(Category::Integer, 64, Qualifiers::UNSIGNED, 0);
    pub const F16: TypeCode = TypeCode::create_basic(Category::Float, 16, Qualifiers::empty(), 0);
    pub const F32: TypeCode = TypeCode::create_basic(Category::Float, 32, Qualifiers::empty(), 0);
    pub const F64: TypeCode = TypeCode::create_basic(Category::Float, 64, Qualifiers::empty(), 0);

    /// Generic pointer: `ptr<void>` in global memory space.
    pub const PTR: TypeCode = TypeCode::create_pointer(VOID, MemorySpace::Global, Qualifiers::empty());
}

/// A field of a [`StructType`], with its offset already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub ty: TypeCode,
    pub offset: u32,
}

/// A struct descriptor owned by a [`TypeRegistry`] slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub name: Option<String>,
    pub fields: Vec<StructField>,
    pub size: u32,
    pub alignment: u32,
}

/// A function parameter, optionally named (names are documentation only;
/// they do not participate in type identity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionParam {
    pub name: Option<String>,
    pub ty: TypeCode,
}

/// A function signature descriptor owned by a [`TypeRegistry`] slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub return_type: TypeCode,
    pub params: Vec<FunctionParam>,
    pub is_variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RegistryEntry {
    Struct(StructType),
    Function(FunctionType),
}

/// Borrowed view of a single [`TypeRegistry`] entry, returned by
/// [`TypeRegistry::iter`].
#[derive(Debug, Clone, Copy)]
pub enum RegistryEntryRef<'a> {
    Struct(&'a StructType),
    Function(&'a FunctionType),
}

impl<'a> From<&'a RegistryEntry> for RegistryEntryRef<'a> {
    fn from(entry: &'a RegistryEntry) -> Self {
        match entry {
            RegistryEntry::Struct(s) => RegistryEntryRef::Struct(s),
            RegistryEntry::Function(f) => RegistryEntryRef::Function(f),
        }
    }
}

/// Maximum number of entries a registry can hold: the attributes field that
/// indexes into it is 12 bits wide.
pub const REGISTRY_CAPACITY: usize = 1 << 12;

/// Owns struct and function descriptors referenced by [`TypeCode`]s whose
/// attributes field is a slot index. Entries are appended monotonically
/// and never mutated once inserted; the registry is destroyed with its
/// owning module. Vectors and arrays never live here — see
/// [`TypeCode::create_array`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeRegistry {
    entries: Vec<RegistryEntry>,
}

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry { entries: Vec::new() }
    }

    fn push(&mut self, entry: RegistryEntry) -> Option<u16> {
        if self.entries.len() >= REGISTRY_CAPACITY {
            log::warn!("type registry at capacity ({REGISTRY_CAPACITY} entries)");
            return None;
        }
        let index = self.entries.len() as u16;
        self.entries.push(entry);
        Some(index)
    }

    /// Declares a struct type. Field offsets are computed in declaration
    /// order, each field aligned to its own type's alignment. Returns
    /// [`consts::VOID`] if the registry is at capacity.
    pub fn create_struct(
        &mut self,
        name: Option<String>,
        fields: Vec<(String, TypeCode)>,
    ) -> TypeCode {
        let mut offset = 0u32;
        let mut max_align = 1u32;
        let mut resolved = Vec::with_capacity(fields.len());
        for (name, ty) in fields {
            let align = self.align_of(ty).max(1);
            let size = self.size_of(ty);
            offset = round_up(offset, align);
            resolved.push(StructField { name, ty, offset });
            offset += size;
            max_align = max_align.max(align);
        }
        let size = round_up(offset, max_align);
        let descriptor = StructType {
            name,
            fields: resolved,
            size,
            alignment: max_align,
        };
        match self.push(RegistryEntry::Struct(descriptor)) {
            Some(index) => TypeCode::create_basic(Category::Struct, 0, Qualifiers::empty(), index),
            None => {
                log::error!("code {}: struct registry full", codes::ERROR_TYPE_REGISTRY_FULL);
                consts::VOID
            }
        }
    }

    /// Declares a function signature type. Analogous to [`create_struct`](Self::create_struct).
    pub fn create_function(
        &mut self,
        return_type: TypeCode,
        params: Vec<FunctionParam>,
        is_variadic: bool,
    ) -> TypeCode {
        let descriptor = FunctionType {
            return_type,
            params,
            is_variadic,
        };
        match self.push(RegistryEntry::Function(descriptor)) {
            Some(index) => TypeCode::create_basic(Category::Function, 0, Qualifiers::empty(), index),
            None => {
                log::error!("code {}: function registry full", codes::ERROR_TYPE_REGISTRY_FULL);
                consts::VOID
            }
        }
    }

    fn slot(&self, ty: TypeCode) -> Option<&RegistryEntry> {
        self.entries.get(ty.attributes() as usize)
    }

    pub fn get_struct(&self, ty: TypeCode) -> Option<&StructType> {
        match self.slot(ty)? {
            RegistryEntry::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_function(&self, ty: TypeCode) -> Option<&FunctionType> {
        match self.slot(ty)? {
            RegistryEntry::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walks entries in declaration (registry-slot) order. Used by the
    /// binary codec, which needs to serialize the whole registry rather
    /// than look up one slot at a time.
    pub fn iter(&self) -> impl Iterator<Item = RegistryEntryRef<'_>> {
        self.entries.iter().map(RegistryEntryRef::from)
    }

    /// Total function: size in bytes of `ty`, recursing through
    /// pointer/vector/array/struct. Functions have no storage representation
    /// and report size 0.
    pub fn size_of(&self, ty: TypeCode) -> u32 {
        match ty.category() {
            Category::Void => 0,
            Category::Bool => 1,
            Category::Integer | Category::Float => (ty.width() as u32) / 8,
            Category::Pointer => 8,
            Category::Vector => self.size_of(ty.element_type()) * ty.vector_len() as u32,
            Category::Array => self.size_of(ty.element_type()) * ty.array_len() as u32,
            Category::Struct => self.get_struct(ty).map(|s| s.size).unwrap_or(0),
            Category::Function => 0,
        }
    }

    /// Total function: alignment in bytes of `ty`.
    pub fn align_of(&self, ty: TypeCode) -> u32 {
        match ty.category() {
            Category::Void => 1,
            Category::Bool => 1,
            Category::Integer | Category::Float => ((ty.width() as u32) / 8).max(1),
            Category::Pointer => 8,
            Category::Vector => self.align_of(ty.element_type()),
            Category::Array => self.align_of(ty.element_type()),
            Category::Struct => self.get_struct(ty).map(|s| s.alignment).unwrap_or(1),
            Category::Function => 1,
        }
    }

    /// Reflexive, symmetric compatibility relation between `a` and `b`:
    /// integers with integers, floats with floats, pointers whose
    /// bases are compatible (or either base void), vectors of equal length
    /// with compatible elements; anything else requires equality.
    pub fn types_compatible(&self, a: TypeCode, b: TypeCode) -> bool {
        if a == b {
            return true;
        }
        match (a.category(), b.category()) {
            (Category::Integer, Category::Integer) => true,
            (Category::Float, Category::Float) => true,
            (Category::Pointer, Category::Pointer) => {
                let (ba, bb) = (a.pointer_base(), b.pointer_base());
                ba.is_void() || bb.is_void() || self.types_compatible(ba, bb)
            }
            (Category::Vector, Category::Vector) => {
                a.vector_len() == b.vector_len()
                    && self.types_compatible(a.element_type(), b.element_type())
            }
            _ => false,
        }
    }
}

impl TypeCode {
    /// Decodes the compact element encoding of a vector or array type using
    /// the same sub-encoding `pointer_base` uses for pointers; named
    /// separately so call sites read clearly.
    fn element_type(self) -> TypeCode {
        let (cat, payload) = Self::compact_decode(self.attributes());
        match cat {
            Category::Integer | Category::Float => {
                TypeCode::create_basic(cat, payload as u8, Qualifiers::empty(), 0)
            }
            other => TypeCode::create_basic(other, 0, Qualifiers::empty(), payload),
        }
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_round_trip() {
        for t in [
            consts::VOID,
            consts::BOOL,
            consts::I8,
            consts::I32,
            consts::U32,
            consts::F64,
        ] {
            let raw = t.raw();
            assert_eq!(TypeCode::from_raw(raw), t);
        }
    }

    #[test]
    fn unsigned_distinguishes_qualifiers() {
        assert_ne!(consts::I32, consts::U32);
        assert!(consts::U32.qualifiers().contains(Qualifiers::UNSIGNED));
        assert!(!consts::I32.qualifiers().contains(Qualifiers::UNSIGNED));
    }

    #[test]
    fn pointer_create_is_deterministic() {
        let p1 = TypeCode::create_pointer(consts::I32, MemorySpace::Global, Qualifiers::CONST);
        let p2 = TypeCode::create_pointer(consts::I32, MemorySpace::Global, Qualifiers::CONST);
        assert_eq!(p1, p2);
        assert_eq!(p1.pointer_base().category() as u8, Category::Integer as u8);
    }

    #[test]
    fn struct_layout_matches_rule() {
        let mut reg = TypeRegistry::new();
        let s = reg.create_struct(
            Some("point".into()),
            vec![
                ("x".into(), consts::I8),
                ("y".into(), consts::I32),
                ("z".into(), consts::I8),
            ],
        );
        let info = reg.get_struct(s).unwrap();
        assert_eq!(info.fields[0].offset, 0);
        assert_eq!(info.fields[1].offset, 4); // aligned up to i32's 4-byte alignment
        assert_eq!(info.fields[2].offset, 8);
        assert_eq!(reg.align_of(s), 4);
        assert_eq!(reg.size_of(s) % reg.align_of(s), 0);
        assert_eq!(reg.size_of(s), 12); // padded tail to 4-byte alignment
    }

    #[test]
    fn registry_identity_distinguishes_structurally_equal_structs() {
        let mut reg = TypeRegistry::new();
        let a = reg.create_struct(Some("a".into()), vec![("x".into(), consts::I32)]);
        let b = reg.create_struct(Some("b".into()), vec![("x".into(), consts::I32)]);
        assert_ne!(a, b, "distinct registry slots must stay distinguishable");
    }

    #[test]
    fn pointer_compatibility_with_void_base() {
        let reg = TypeRegistry::new();
        let p_void = consts::PTR;
        let p_i32 = TypeCode::create_pointer(consts::I32, MemorySpace::Global, Qualifiers::empty());
        assert!(reg.types_compatible(p_void, p_i32));
    }

    #[test]
    fn vector_compatibility_requires_equal_length() {
        let reg = TypeRegistry::new();
        let v4 = TypeCode::create_vector(consts::F32, 4);
        let v8 = TypeCode::create_vector(consts::F32, 8);
        assert!(!reg.types_compatible(v4, v8));
        assert!(reg.types_compatible(v4, TypeCode::create_vector(consts::F32, 4)));
    }

    #[test]
    fn array_create_is_deterministic_and_never_registry_backed() {
        let reg = TypeRegistry::new();
        let a1 = TypeCode::create_array(consts::I32, 10);
        let a2 = TypeCode::create_array(consts::I32, 10);
        assert_eq!(a1, a2, "equal logical array types must compare equal as integers");
        assert_eq!(reg.len(), 0, "create_array must never touch the registry");
        assert_eq!(a1.array_len(), 10);
        assert_eq!(reg.size_of(a1), reg.size_of(consts::I32) * 10);
        assert_eq!(reg.align_of(a1), reg.align_of(consts::I32));
    }

    #[test]
    fn array_count_above_255_encodes_as_unsized() {
        let big = TypeCode::create_array(consts::I8, 1000);
        assert_eq!(big.array_len(), 0);
        let unsized_array = TypeCode::create_array(consts::I8, 0);
        assert_eq!(big, unsized_array, "both encode identically as unsized");
    }
}
