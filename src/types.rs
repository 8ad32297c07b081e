//! Structural type system for graph ports.
//!
//! Types partition into **value types** (bitvectors, floats, pointers, aggregates,
//! functions, control values) and **state types** (memory, I/O, loop state). Value types
//! carry runtime data; state types carry ordering edges with no runtime representation.
//!
//! Types are structural and value-compared: two types are equal iff their kind and all
//! fields are equal. Instances are immutable and cheap to clone.

use std::fmt;
use std::sync::Arc;

use strum::{EnumCount, EnumIter};

/// Floating point sizes supported by the type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter)]
pub enum FloatSize {
    /// IEEE-754 binary16
    Half,
    /// IEEE-754 binary32
    Flt,
    /// IEEE-754 binary64
    Dbl,
    /// x87 80-bit extended precision
    X86Fp80,
    /// IEEE-754 binary128
    Fp128,
}

impl FloatSize {
    /// Returns the storage size of this float kind in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            FloatSize::Half => 2,
            FloatSize::Flt => 4,
            FloatSize::Dbl => 8,
            FloatSize::X86Fp80 => 10,
            FloatSize::Fp128 => 16,
        }
    }
}

/// Linkage attributes of imported and defined symbols.
///
/// This is the closed set accepted at intake; target emission reproduces the
/// same attribute on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter)]
pub enum Linkage {
    /// Externally visible definition
    External,
    /// Equivalent to external, but may be discarded after inlining
    AvailableExternally,
    /// Merged with equally named definitions, unreferenced copies discarded
    LinkOnceAny,
    /// Like `LinkOnceAny`, but only equivalent definitions may be merged
    LinkOnceOdr,
    /// Merged with equally named definitions, kept even if unreferenced
    WeakAny,
    /// Like `WeakAny`, but only equivalent definitions may be merged
    WeakOdr,
    /// Appended to equally named arrays at link time
    Appending,
    /// Visible only within the translation unit
    Internal,
    /// Like `Internal`, but not shown in symbol tables
    Private,
    /// Declaration that may remain undefined at link time
    ExternalWeak,
    /// Tentative definition merged by the linker
    Common,
}

impl Linkage {
    /// Returns `true` if a definition with this linkage can be referenced from
    /// outside the translation unit.
    #[must_use]
    pub const fn is_exported(self) -> bool {
        !matches!(self, Linkage::Internal | Linkage::Private)
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Linkage::External => "external",
            Linkage::AvailableExternally => "available_externally",
            Linkage::LinkOnceAny => "link_once_any",
            Linkage::LinkOnceOdr => "link_once_odr",
            Linkage::WeakAny => "weak_any",
            Linkage::WeakOdr => "weak_odr",
            Linkage::Appending => "appending",
            Linkage::Internal => "internal",
            Linkage::Private => "private",
            Linkage::ExternalWeak => "external_weak",
            Linkage::Common => "common",
        };
        write!(f, "{s}")
    }
}

/// Declaration of a record (struct) type.
///
/// Records are compared structurally through their field lists. The declaration is
/// reference counted so that many ports can share one instance cheaply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordDecl {
    fields: Arc<Vec<Type>>,
}

impl RecordDecl {
    /// Creates a record declaration from its field types.
    #[must_use]
    pub fn new(fields: Vec<Type>) -> Self {
        Self {
            fields: Arc::new(fields),
        }
    }

    /// Returns the field types of this record.
    #[must_use]
    pub fn fields(&self) -> &[Type] {
        &self.fields
    }

    /// Returns the field type at `index`, if present.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Type> {
        self.fields.get(index)
    }
}

/// Signature of a function value: parameter types and result types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    parameters: Vec<Type>,
    results: Vec<Type>,
}

impl FunctionType {
    /// Creates a function type from parameter and result types.
    #[must_use]
    pub fn new(parameters: Vec<Type>, results: Vec<Type>) -> Self {
        Self {
            parameters,
            results,
        }
    }

    /// Returns the parameter types.
    #[must_use]
    pub fn parameters(&self) -> &[Type] {
        &self.parameters
    }

    /// Returns the result types.
    #[must_use]
    pub fn results(&self) -> &[Type] {
        &self.results
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, ")")
    }
}

/// A port type.
///
/// The variants split into value types (`Bit` through `Control`) and state types
/// (`MemState`, `IoState`, `LoopState`). Control values select one of `k ≥ 2`
/// alternatives and exist only to drive γ and θ nodes; they have no memory layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Bitvector of the given positive width
    Bit(u32),
    /// Floating point value
    Float(FloatSize),
    /// Untyped data pointer
    Pointer,
    /// Fixed-length array of a value type
    Array(Box<Type>, usize),
    /// Record with structurally compared fields
    Record(RecordDecl),
    /// Function value
    Function(Box<FunctionType>),
    /// Control value selecting one of `k` alternatives (`k ≥ 2`)
    Control(usize),
    /// Memory ordering state
    MemState,
    /// I/O ordering state
    IoState,
    /// Loop iteration state
    LoopState,
}

impl Type {
    /// Returns `true` if this type carries a runtime value.
    #[must_use]
    pub const fn is_value(&self) -> bool {
        !self.is_state()
    }

    /// Returns `true` if this type is a state edge with no runtime representation.
    #[must_use]
    pub const fn is_state(&self) -> bool {
        matches!(self, Type::MemState | Type::IoState | Type::LoopState)
    }

    /// Returns `true` if this is a bitvector of exactly `width` bits.
    #[must_use]
    pub fn is_bit(&self, width: u32) -> bool {
        matches!(self, Type::Bit(w) if *w == width)
    }

    /// Returns `true` if this is the pointer type.
    #[must_use]
    pub const fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer)
    }

    /// Returns the number of alternatives of a control type, if this is one.
    #[must_use]
    pub const fn nalternatives(&self) -> Option<usize> {
        match self {
            Type::Control(k) => Some(*k),
            _ => None,
        }
    }

    /// Returns the storage size in bytes for an 8-byte-pointer target.
    ///
    /// State and control types have no runtime representation and report zero.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Type::Bit(w) => ((*w as usize) + 7) / 8,
            Type::Float(s) => s.size(),
            Type::Pointer | Type::Function(_) => 8,
            Type::Array(elem, len) => elem.size() * len,
            Type::Record(decl) => {
                let mut size = 0;
                for field in decl.fields() {
                    let align = field.alignment().max(1);
                    size = (size + align - 1) / align * align;
                    size += field.size();
                }
                let align = self.alignment().max(1);
                (size + align - 1) / align * align
            }
            Type::Control(_) | Type::MemState | Type::IoState | Type::LoopState => 0,
        }
    }

    /// Returns the alignment in bytes for an 8-byte-pointer target.
    #[must_use]
    pub fn alignment(&self) -> usize {
        match self {
            Type::Bit(_) | Type::Float(_) => self.size().min(8).next_power_of_two(),
            Type::Pointer | Type::Function(_) => 8,
            Type::Array(elem, _) => elem.alignment(),
            Type::Record(decl) => decl
                .fields()
                .iter()
                .map(Type::alignment)
                .max()
                .unwrap_or(1),
            Type::Control(_) | Type::MemState | Type::IoState | Type::LoopState => 1,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bit(w) => write!(f, "bit{w}"),
            Type::Float(FloatSize::Half) => write!(f, "half"),
            Type::Float(FloatSize::Flt) => write!(f, "flt"),
            Type::Float(FloatSize::Dbl) => write!(f, "dbl"),
            Type::Float(FloatSize::X86Fp80) => write!(f, "x86fp80"),
            Type::Float(FloatSize::Fp128) => write!(f, "fp128"),
            Type::Pointer => write!(f, "ptr"),
            Type::Array(elem, len) => write!(f, "[{len} x {elem}]"),
            Type::Record(decl) => {
                write!(f, "{{")?;
                for (i, field) in decl.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
            Type::Function(ty) => write!(f, "{ty}"),
            Type::Control(k) => write!(f, "ctl{k}"),
            Type::MemState => write!(f, "mem"),
            Type::IoState => write!(f, "io"),
            Type::LoopState => write!(f, "loop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_structural_equality() {
        assert_eq!(Type::Bit(32), Type::Bit(32));
        assert_ne!(Type::Bit(32), Type::Bit(64));
        assert_eq!(
            Type::Array(Box::new(Type::Bit(8)), 4),
            Type::Array(Box::new(Type::Bit(8)), 4)
        );
        assert_ne!(
            Type::Array(Box::new(Type::Bit(8)), 4),
            Type::Array(Box::new(Type::Bit(8)), 5)
        );
    }

    #[test]
    fn test_record_structural_equality() {
        let a = RecordDecl::new(vec![Type::Bit(32), Type::Pointer]);
        let b = RecordDecl::new(vec![Type::Bit(32), Type::Pointer]);
        assert_eq!(Type::Record(a), Type::Record(b));
    }

    #[test]
    fn test_value_state_partition() {
        assert!(Type::Bit(1).is_value());
        assert!(Type::Pointer.is_value());
        assert!(Type::Control(2).is_value());
        assert!(Type::MemState.is_state());
        assert!(Type::IoState.is_state());
        assert!(Type::LoopState.is_state());
        assert!(!Type::MemState.is_value());
    }

    #[test]
    fn test_predicates() {
        assert!(Type::Bit(32).is_bit(32));
        assert!(!Type::Bit(32).is_bit(64));
        assert!(Type::Pointer.is_pointer());
        assert_eq!(Type::Control(4).nalternatives(), Some(4));
        assert_eq!(Type::Bit(1).nalternatives(), None);
    }

    #[test]
    fn test_size_and_alignment() {
        assert_eq!(Type::Bit(32).size(), 4);
        assert_eq!(Type::Bit(1).size(), 1);
        assert_eq!(Type::Pointer.size(), 8);
        assert_eq!(Type::Array(Box::new(Type::Bit(32)), 10).size(), 40);
        assert_eq!(Type::MemState.size(), 0);

        let record = RecordDecl::new(vec![Type::Bit(8), Type::Bit(32)]);
        // One byte, three bytes padding, four bytes.
        assert_eq!(Type::Record(record.clone()).size(), 8);
        assert_eq!(Type::Record(record).alignment(), 4);
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::Bit(32).to_string(), "bit32");
        assert_eq!(Type::Pointer.to_string(), "ptr");
        assert_eq!(Type::Control(2).to_string(), "ctl2");
        assert_eq!(Type::MemState.to_string(), "mem");
        let ft = FunctionType::new(vec![Type::Bit(32)], vec![Type::Bit(32)]);
        assert_eq!(Type::Function(Box::new(ft)).to_string(), "(bit32) -> (bit32)");
    }

    #[test]
    fn test_linkage_visibility() {
        assert!(Linkage::External.is_exported());
        assert!(Linkage::WeakOdr.is_exported());
        assert!(!Linkage::Internal.is_exported());
        assert!(!Linkage::Private.is_exported());
    }

    #[test]
    fn test_linkage_is_a_closed_set() {
        use strum::IntoEnumIterator;
        assert_eq!(Linkage::COUNT, 11);
        // Every member has a stable display form.
        let forms: Vec<String> = Linkage::iter().map(|l| l.to_string()).collect();
        assert!(forms.contains(&"available_externally".to_string()));
        assert!(forms.contains(&"link_once_odr".to_string()));
        assert_eq!(FloatSize::COUNT, 5);
    }
}
