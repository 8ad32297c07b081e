//! Operation hierarchy for simple nodes.
//!
//! Operations form a tagged union with one variant per family (bitvector, float,
//! memory, control, cast, call, aggregate, miscellaneous). Every operation can report
//! its argument and result types, a debug string, and its [`OpClass`] used to look up
//! the normal form that governs its rewrites.
//!
//! Binary bitvector operations additionally expose the pairwise reduction interface:
//! [`BitBinaryKind::can_reduce`] classifies an operand pair into one of the eight
//! reduction paths, and [`BitBinaryKind::apply`] evaluates the operation on constants
//! (modulo `2^width`).

use bitflags::bitflags;

use crate::types::{FunctionType, RecordDecl, Type};

bitflags! {
    /// Algebraic properties of a binary operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BinaryFlags: u8 {
        /// Operand grouping does not change the result
        const ASSOCIATIVE = 1;
        /// Operand order does not change the result
        const COMMUTATIVE = 2;
    }
}

/// Classification of a binary operand pair for reduction.
///
/// Returned by `can_reduce_operand_pair`; the corresponding `reduce_operand_pair`
/// applies the rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinopReduction {
    /// No reduction applies
    None,
    /// Both operands are constants
    Constants,
    /// The operand pair merges into a single value (e.g. `x xor x`)
    Merge,
    /// Part of the left operand folds into the right
    LFold,
    /// Part of the right operand folds into the left
    RFold,
    /// The left operand is the neutral element
    LNeutral,
    /// The right operand is the neutral element
    RNeutral,
    /// Both operands share a form that factors over the operation
    Factor,
}

/// Binary bitvector operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitBinaryKind {
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Bitwise conjunction
    And,
    /// Bitwise disjunction
    Or,
    /// Bitwise exclusive or
    Xor,
    /// Logical shift left
    Shl,
    /// Logical shift right
    Shr,
}

impl BitBinaryKind {
    /// Returns the algebraic flags of this operation.
    #[must_use]
    pub fn flags(self) -> BinaryFlags {
        match self {
            BitBinaryKind::Add | BitBinaryKind::Mul => {
                BinaryFlags::ASSOCIATIVE | BinaryFlags::COMMUTATIVE
            }
            BitBinaryKind::And | BitBinaryKind::Or | BitBinaryKind::Xor => {
                BinaryFlags::ASSOCIATIVE | BinaryFlags::COMMUTATIVE
            }
            BitBinaryKind::Sub | BitBinaryKind::Shl | BitBinaryKind::Shr => BinaryFlags::empty(),
        }
    }

    /// Returns `true` if operand grouping is irrelevant.
    #[must_use]
    pub fn is_associative(self) -> bool {
        self.flags().contains(BinaryFlags::ASSOCIATIVE)
    }

    /// Returns `true` if operand order is irrelevant.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        self.flags().contains(BinaryFlags::COMMUTATIVE)
    }

    /// Returns the neutral element of this operation, if it has one.
    ///
    /// For non-commutative operations the neutral element only applies on the
    /// right (`x - 0`, `x << 0`).
    #[must_use]
    pub fn neutral_element(self, width: u32) -> Option<u64> {
        match self {
            BitBinaryKind::Add
            | BitBinaryKind::Sub
            | BitBinaryKind::Or
            | BitBinaryKind::Xor
            | BitBinaryKind::Shl
            | BitBinaryKind::Shr => Some(0),
            BitBinaryKind::Mul => Some(1),
            BitBinaryKind::And => Some(mask(width)),
        }
    }

    /// Evaluates the operation on two constants, wrapping modulo `2^width`.
    ///
    /// Only widths up to 64 bits are evaluated; the caller must not fold wider
    /// bitvectors.
    #[must_use]
    pub fn apply(self, width: u32, lhs: u64, rhs: u64) -> u64 {
        let m = mask(width);
        let value = match self {
            BitBinaryKind::Add => lhs.wrapping_add(rhs),
            BitBinaryKind::Sub => lhs.wrapping_sub(rhs),
            BitBinaryKind::Mul => lhs.wrapping_mul(rhs),
            BitBinaryKind::And => lhs & rhs,
            BitBinaryKind::Or => lhs | rhs,
            BitBinaryKind::Xor => lhs ^ rhs,
            BitBinaryKind::Shl => {
                if rhs >= u64::from(width) {
                    0
                } else {
                    lhs << rhs
                }
            }
            BitBinaryKind::Shr => {
                if rhs >= u64::from(width) {
                    0
                } else {
                    (lhs & m) >> rhs
                }
            }
        };
        value & m
    }

    /// Classifies an operand pair for reduction.
    ///
    /// `lhs`/`rhs` are the operand constants when statically known; `same` is `true`
    /// when both operands are the identical origin.
    #[must_use]
    pub fn can_reduce(self, width: u32, lhs: Option<u64>, rhs: Option<u64>, same: bool) -> BinopReduction {
        if width > 64 {
            return BinopReduction::None;
        }
        if lhs.is_some() && rhs.is_some() {
            return BinopReduction::Constants;
        }
        if same && self.self_pair().is_some() {
            return BinopReduction::Merge;
        }
        if let Some(neutral) = self.neutral_element(width) {
            if rhs == Some(neutral) {
                return BinopReduction::RNeutral;
            }
            if self.is_commutative() && lhs == Some(neutral) {
                return BinopReduction::LNeutral;
            }
        }
        BinopReduction::None
    }

    /// Returns what `op(x, x)` reduces to, if anything.
    ///
    /// `Some(true)` means the pair reduces to the operand itself, `Some(false)`
    /// means it reduces to the zero constant.
    #[must_use]
    pub fn self_pair(self) -> Option<bool> {
        match self {
            BitBinaryKind::And | BitBinaryKind::Or => Some(true),
            BitBinaryKind::Xor | BitBinaryKind::Sub => Some(false),
            _ => None,
        }
    }

    /// Returns the mnemonic used in debug strings.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            BitBinaryKind::Add => "bitadd",
            BitBinaryKind::Sub => "bitsub",
            BitBinaryKind::Mul => "bitmul",
            BitBinaryKind::And => "bitand",
            BitBinaryKind::Or => "bitor",
            BitBinaryKind::Xor => "bitxor",
            BitBinaryKind::Shl => "bitshl",
            BitBinaryKind::Shr => "bitshr",
        }
    }
}

const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Bitvector comparison kinds. All comparisons produce a `bit1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitCompareKind {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Unsigned less than
    Ult,
    /// Unsigned less than or equal
    Ule,
    /// Signed less than
    Slt,
    /// Signed less than or equal
    Sle,
}

impl BitCompareKind {
    /// Evaluates the comparison on two constants of the given width.
    #[must_use]
    pub fn apply(self, width: u32, lhs: u64, rhs: u64) -> bool {
        let m = mask(width);
        let (ul, ur) = (lhs & m, rhs & m);
        let sign = |v: u64| -> i64 {
            if width >= 64 || width == 0 {
                v as i64
            } else if v >> (width - 1) & 1 == 1 {
                (v | !m) as i64
            } else {
                v as i64
            }
        };
        match self {
            BitCompareKind::Eq => ul == ur,
            BitCompareKind::Ne => ul != ur,
            BitCompareKind::Ult => ul < ur,
            BitCompareKind::Ule => ul <= ur,
            BitCompareKind::Slt => sign(ul) < sign(ur),
            BitCompareKind::Sle => sign(ul) <= sign(ur),
        }
    }

    /// Returns the mnemonic used in debug strings.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            BitCompareKind::Eq => "biteq",
            BitCompareKind::Ne => "bitne",
            BitCompareKind::Ult => "bitult",
            BitCompareKind::Ule => "bitule",
            BitCompareKind::Slt => "bitslt",
            BitCompareKind::Sle => "bitsle",
        }
    }
}

/// Binary floating point operation kinds.
///
/// Floating point arithmetic is neither associative nor commutative for
/// normalization purposes; no pairwise reductions apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpBinaryKind {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

impl FpBinaryKind {
    /// Returns the mnemonic used in debug strings.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            FpBinaryKind::Add => "fpadd",
            FpBinaryKind::Sub => "fpsub",
            FpBinaryKind::Mul => "fpmul",
            FpBinaryKind::Div => "fpdiv",
        }
    }
}

/// Bitvector operations.
#[derive(Debug, Clone, PartialEq)]
pub enum BitOp {
    /// A constant of the given width; the value is masked to the width
    Constant {
        /// Bit width of the constant
        width: u32,
        /// Constant value, modulo `2^width`
        value: u64,
    },
    /// A two-operand arithmetic or logic operation
    Binary {
        /// Operation kind
        kind: BitBinaryKind,
        /// Operand width
        width: u32,
    },
    /// A comparison producing `bit1`
    Compare {
        /// Comparison kind
        kind: BitCompareKind,
        /// Operand width
        width: u32,
    },
    /// The n-ary flattened form of an associative binary operation
    Flattened {
        /// The underlying binary operation; must be associative
        kind: BitBinaryKind,
        /// Operand width
        width: u32,
        /// Number of operands (≥ 2)
        arity: usize,
    },
}

/// Floating point operations.
#[derive(Debug, Clone, PartialEq)]
pub enum FloatOp {
    /// A constant; the payload is the raw bit pattern
    Constant {
        /// Float kind
        size: crate::types::FloatSize,
        /// Raw IEEE bit pattern
        bits: u64,
    },
    /// A two-operand arithmetic operation
    Binary {
        /// Operation kind
        kind: FpBinaryKind,
        /// Float kind of both operands
        size: crate::types::FloatSize,
    },
}

/// Memory operations.
///
/// All memory operations thread explicit memory state edges. Before encoding a
/// single state is threaded sequentially; the encoder rewrites these nodes with one
/// state per abstract location partition.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryOp {
    /// Stack allocation: `(bit32 size) -> (ptr, mem)`
    Alloca {
        /// Type of the allocated slot
        value_type: Type,
        /// Allocation alignment in bytes
        alignment: usize,
    },
    /// Heap allocation: `(bit64 size) -> (ptr, mem)`
    Malloc,
    /// Heap release: `(ptr, mem^n) -> (mem^n)`
    Free {
        /// Number of threaded states
        nstates: usize,
    },
    /// Memory read: `(ptr, mem^n) -> (value, mem^n)`
    Load {
        /// Type of the loaded value
        loaded: Type,
        /// Number of threaded states
        nstates: usize,
        /// Access alignment in bytes
        alignment: usize,
    },
    /// Memory write: `(ptr, value, mem^n) -> (mem^n)`
    Store {
        /// Type of the stored value
        stored: Type,
        /// Number of threaded states
        nstates: usize,
        /// Access alignment in bytes
        alignment: usize,
    },
    /// Joins states: `(mem^n) -> (mem)`
    StateMerge {
        /// Number of merged operands (≥ 1)
        noperands: usize,
    },
    /// Splits a state: `(mem) -> (mem^n)`
    StateSplit {
        /// Number of produced states (≥ 1)
        nresults: usize,
    },
}

/// Control operations producing predicate values.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlOp {
    /// Maps bitvector values to alternatives: `(bit n) -> (ctl k)`
    Match {
        /// Width of the matched bitvector
        nbits: u32,
        /// Value-to-alternative mapping, sorted by value
        mapping: Vec<(u64, usize)>,
        /// Alternative chosen when no mapping entry applies
        default_alternative: usize,
        /// Number of alternatives `k ≥ 2`
        nalternatives: usize,
    },
    /// A constant control value: `() -> (ctl k)`
    Constant {
        /// Number of alternatives `k ≥ 2`
        nalternatives: usize,
        /// The selected alternative
        alternative: usize,
    },
}

/// Cast operations between value types.
#[derive(Debug, Clone, PartialEq)]
pub enum CastOp {
    /// Reinterpretation between equally sized value types
    Bitcast {
        /// Source type
        from: Type,
        /// Destination type
        to: Type,
    },
    /// Truncation to a narrower bitvector
    Trunc {
        /// Source width
        from: u32,
        /// Destination width (< from)
        to: u32,
    },
    /// Zero extension to a wider bitvector
    ZExt {
        /// Source width
        from: u32,
        /// Destination width (> from)
        to: u32,
    },
    /// Sign extension to a wider bitvector
    SExt {
        /// Source width
        from: u32,
        /// Destination width (> from)
        to: u32,
    },
}

/// Aggregate (record/array) addressing and access operations.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOp {
    /// Pointer arithmetic into an aggregate: `(ptr, bit64^n) -> (ptr)`
    GetElementPtr {
        /// Type the base pointer addresses
        element: Type,
        /// Number of index operands
        nindices: usize,
    },
    /// Field projection out of a record value: `(record) -> (field)`
    RecordSelect {
        /// The record declaration
        decl: RecordDecl,
        /// Index of the projected field
        index: usize,
    },
}

/// Miscellaneous operations.
#[derive(Debug, Clone, PartialEq)]
pub enum MiscOp {
    /// An undefined value of the given type
    Undef {
        /// Result type
        ty: Type,
    },
    /// A reference to a module-level symbol: `() -> (ty)`.
    ///
    /// Only meaningful in the three-address IR; the bridges resolve it to a
    /// context or recursion variable, so it never appears as a graph node.
    SymbolRef {
        /// Name of the referenced symbol
        name: String,
        /// Type of the symbol's value
        ty: Type,
    },
}

/// Operation classes used to address normal forms.
///
/// Classes form an inheritance chain through [`OpClass::parent`]; a flag that was
/// never set on a class is looked up on its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Root of the chain; every operation inherits from it
    Any,
    /// All simple operations (enables common-subexpression merging)
    Simple,
    /// Two-operand bitvector/float operations
    Binary,
    /// The n-ary flattened form of associative binary operations
    FlattenedBinary,
    /// Memory loads
    Load,
    /// Memory stores
    Store,
}

impl OpClass {
    /// Returns the parent class in the inheritance chain, or `None` for the root.
    #[must_use]
    pub fn parent(self) -> Option<OpClass> {
        match self {
            OpClass::Any => None,
            OpClass::Simple => Some(OpClass::Any),
            OpClass::Binary
            | OpClass::FlattenedBinary
            | OpClass::Load
            | OpClass::Store => Some(OpClass::Simple),
        }
    }
}

/// A simple-node operation.
///
/// One variant per operation family; capabilities (`argument_types`,
/// `result_types`, `debug_string`, `op_class`) dispatch over the families.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Bitvector operations
    Bit(BitOp),
    /// Floating point operations
    Float(FloatOp),
    /// Memory operations
    Memory(MemoryOp),
    /// Control predicate operations
    Control(ControlOp),
    /// Cast operations
    Cast(CastOp),
    /// Function call: `(fn, params...) -> (results...)`
    Call {
        /// Signature of the callee
        ty: FunctionType,
    },
    /// Aggregate operations
    Aggregate(AggregateOp),
    /// Miscellaneous operations
    Misc(MiscOp),
}

impl Operation {
    /// Returns the types this operation consumes, in input order.
    #[must_use]
    pub fn argument_types(&self) -> Vec<Type> {
        match self {
            Operation::Bit(BitOp::Constant { .. }) => Vec::new(),
            Operation::Bit(BitOp::Binary { width, .. })
            | Operation::Bit(BitOp::Compare { width, .. }) => {
                vec![Type::Bit(*width), Type::Bit(*width)]
            }
            Operation::Bit(BitOp::Flattened { width, arity, .. }) => {
                vec![Type::Bit(*width); *arity]
            }
            Operation::Float(FloatOp::Constant { .. }) => Vec::new(),
            Operation::Float(FloatOp::Binary { size, .. }) => {
                vec![Type::Float(*size), Type::Float(*size)]
            }
            Operation::Memory(MemoryOp::Alloca { .. }) => vec![Type::Bit(32)],
            Operation::Memory(MemoryOp::Malloc) => vec![Type::Bit(64)],
            Operation::Memory(MemoryOp::Free { nstates }) => {
                let mut tys = vec![Type::Pointer];
                tys.extend(std::iter::repeat(Type::MemState).take(*nstates));
                tys
            }
            Operation::Memory(MemoryOp::Load { nstates, .. }) => {
                let mut tys = vec![Type::Pointer];
                tys.extend(std::iter::repeat(Type::MemState).take(*nstates));
                tys
            }
            Operation::Memory(MemoryOp::Store {
                stored, nstates, ..
            }) => {
                let mut tys = vec![Type::Pointer, stored.clone()];
                tys.extend(std::iter::repeat(Type::MemState).take(*nstates));
                tys
            }
            Operation::Memory(MemoryOp::StateMerge { noperands }) => {
                vec![Type::MemState; *noperands]
            }
            Operation::Memory(MemoryOp::StateSplit { .. }) => vec![Type::MemState],
            Operation::Control(ControlOp::Match { nbits, .. }) => vec![Type::Bit(*nbits)],
            Operation::Control(ControlOp::Constant { .. }) => Vec::new(),
            Operation::Cast(CastOp::Bitcast { from, .. }) => vec![from.clone()],
            Operation::Cast(CastOp::Trunc { from, .. })
            | Operation::Cast(CastOp::ZExt { from, .. })
            | Operation::Cast(CastOp::SExt { from, .. }) => vec![Type::Bit(*from)],
            Operation::Call { ty } => {
                let mut tys = vec![Type::Function(Box::new(ty.clone()))];
                tys.extend(ty.parameters().iter().cloned());
                tys
            }
            Operation::Aggregate(AggregateOp::GetElementPtr { nindices, .. }) => {
                let mut tys = vec![Type::Pointer];
                tys.extend(std::iter::repeat(Type::Bit(64)).take(*nindices));
                tys
            }
            Operation::Aggregate(AggregateOp::RecordSelect { decl, .. }) => {
                vec![Type::Record(decl.clone())]
            }
            Operation::Misc(MiscOp::Undef { .. } | MiscOp::SymbolRef { .. }) => Vec::new(),
        }
    }

    /// Returns the types this operation produces, in output order.
    #[must_use]
    pub fn result_types(&self) -> Vec<Type> {
        match self {
            Operation::Bit(BitOp::Constant { width, .. }) => vec![Type::Bit(*width)],
            Operation::Bit(BitOp::Binary { width, .. })
            | Operation::Bit(BitOp::Flattened { width, .. }) => vec![Type::Bit(*width)],
            Operation::Bit(BitOp::Compare { .. }) => vec![Type::Bit(1)],
            Operation::Float(FloatOp::Constant { size, .. })
            | Operation::Float(FloatOp::Binary { size, .. }) => vec![Type::Float(*size)],
            Operation::Memory(MemoryOp::Alloca { .. }) | Operation::Memory(MemoryOp::Malloc) => {
                vec![Type::Pointer, Type::MemState]
            }
            Operation::Memory(MemoryOp::Free { nstates }) => vec![Type::MemState; *nstates],
            Operation::Memory(MemoryOp::Load {
                loaded, nstates, ..
            }) => {
                let mut tys = vec![loaded.clone()];
                tys.extend(std::iter::repeat(Type::MemState).take(*nstates));
                tys
            }
            Operation::Memory(MemoryOp::Store { nstates, .. }) => {
                vec![Type::MemState; *nstates]
            }
            Operation::Memory(MemoryOp::StateMerge { .. }) => vec![Type::MemState],
            Operation::Memory(MemoryOp::StateSplit { nresults }) => {
                vec![Type::MemState; *nresults]
            }
            Operation::Control(ControlOp::Match { nalternatives, .. })
            | Operation::Control(ControlOp::Constant { nalternatives, .. }) => {
                vec![Type::Control(*nalternatives)]
            }
            Operation::Cast(CastOp::Bitcast { to, .. }) => vec![to.clone()],
            Operation::Cast(CastOp::Trunc { to, .. })
            | Operation::Cast(CastOp::ZExt { to, .. })
            | Operation::Cast(CastOp::SExt { to, .. }) => vec![Type::Bit(*to)],
            Operation::Call { ty } => ty.results().to_vec(),
            Operation::Aggregate(AggregateOp::GetElementPtr { .. }) => vec![Type::Pointer],
            Operation::Aggregate(AggregateOp::RecordSelect { decl, index }) => {
                vec![decl.field(*index).cloned().unwrap_or(Type::Bit(8))]
            }
            Operation::Misc(MiscOp::Undef { ty } | MiscOp::SymbolRef { ty, .. }) => {
                vec![ty.clone()]
            }
        }
    }

    /// Returns `true` if equal applications of this operation may be merged.
    ///
    /// Allocation sites are distinct memory locations even when their operands
    /// agree, and calls may observe I/O, so neither participates in
    /// common-subexpression merging.
    #[must_use]
    pub fn is_mergeable(&self) -> bool {
        !matches!(
            self,
            Operation::Memory(
                MemoryOp::Alloca { .. } | MemoryOp::Malloc | MemoryOp::Free { .. }
            ) | Operation::Call { .. }
        )
    }

    /// Returns the normal-form class of this operation.
    #[must_use]
    pub fn op_class(&self) -> OpClass {
        match self {
            Operation::Bit(BitOp::Binary { .. }) | Operation::Float(FloatOp::Binary { .. }) => {
                OpClass::Binary
            }
            Operation::Bit(BitOp::Flattened { .. }) => OpClass::FlattenedBinary,
            Operation::Memory(MemoryOp::Load { .. }) => OpClass::Load,
            Operation::Memory(MemoryOp::Store { .. }) => OpClass::Store,
            _ => OpClass::Simple,
        }
    }

    /// Returns the binary bitvector kind of this operation, if it is one.
    #[must_use]
    pub fn bit_binary(&self) -> Option<(BitBinaryKind, u32)> {
        match self {
            Operation::Bit(BitOp::Binary { kind, width }) => Some((*kind, *width)),
            _ => None,
        }
    }

    /// Returns the constant value of a bitvector constant operation.
    #[must_use]
    pub fn bit_constant(&self) -> Option<(u32, u64)> {
        match self {
            Operation::Bit(BitOp::Constant { width, value }) => Some((*width, *value)),
            _ => None,
        }
    }

    /// Returns a short human readable form used by diagnostics and `view`.
    #[must_use]
    pub fn debug_string(&self) -> String {
        match self {
            Operation::Bit(BitOp::Constant { width, value }) => format!("bit{width}({value})"),
            Operation::Bit(BitOp::Binary { kind, width }) => {
                format!("{}{width}", kind.mnemonic())
            }
            Operation::Bit(BitOp::Compare { kind, width }) => {
                format!("{}{width}", kind.mnemonic())
            }
            Operation::Bit(BitOp::Flattened { kind, width, arity }) => {
                format!("{}{width}[{arity}]", kind.mnemonic())
            }
            Operation::Float(FloatOp::Constant { size, bits }) => {
                format!("{}({bits:#x})", Type::Float(*size))
            }
            Operation::Float(FloatOp::Binary { kind, size }) => {
                format!("{}.{}", kind.mnemonic(), Type::Float(*size))
            }
            Operation::Memory(MemoryOp::Alloca { value_type, .. }) => {
                format!("alloca[{value_type}]")
            }
            Operation::Memory(MemoryOp::Malloc) => "malloc".to_string(),
            Operation::Memory(MemoryOp::Free { .. }) => "free".to_string(),
            Operation::Memory(MemoryOp::Load { .. }) => "load".to_string(),
            Operation::Memory(MemoryOp::Store { .. }) => "store".to_string(),
            Operation::Memory(MemoryOp::StateMerge { .. }) => "memmerge".to_string(),
            Operation::Memory(MemoryOp::StateSplit { .. }) => "memsplit".to_string(),
            Operation::Control(ControlOp::Match {
                mapping,
                default_alternative,
                ..
            }) => {
                let mut s = String::from("match[");
                for (value, alt) in mapping {
                    s.push_str(&format!("{value}->{alt};"));
                }
                s.push_str(&format!("default {default_alternative}]"));
                s
            }
            Operation::Control(ControlOp::Constant {
                nalternatives,
                alternative,
            }) => format!("ctl{nalternatives}({alternative})"),
            Operation::Cast(CastOp::Bitcast { from, to }) => format!("bitcast[{from} -> {to}]"),
            Operation::Cast(CastOp::Trunc { from, to }) => format!("trunc[{from} -> {to}]"),
            Operation::Cast(CastOp::ZExt { from, to }) => format!("zext[{from} -> {to}]"),
            Operation::Cast(CastOp::SExt { from, to }) => format!("sext[{from} -> {to}]"),
            Operation::Call { ty } => format!("call{ty}"),
            Operation::Aggregate(AggregateOp::GetElementPtr { element, .. }) => {
                format!("gep[{element}]")
            }
            Operation::Aggregate(AggregateOp::RecordSelect { index, .. }) => {
                format!("select[{index}]")
            }
            Operation::Misc(MiscOp::Undef { ty }) => format!("undef[{ty}]"),
            Operation::Misc(MiscOp::SymbolRef { name, .. }) => format!("symbolref \"{name}\""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_flags() {
        assert!(BitBinaryKind::Add.is_associative());
        assert!(BitBinaryKind::Add.is_commutative());
        assert!(BitBinaryKind::Xor.is_associative());
        assert!(!BitBinaryKind::Sub.is_associative());
        assert!(!BitBinaryKind::Shl.is_commutative());
    }

    #[test]
    fn test_constant_evaluation_wraps() {
        assert_eq!(BitBinaryKind::Add.apply(8, 250, 10), 4);
        assert_eq!(BitBinaryKind::Mul.apply(8, 16, 16), 0);
        assert_eq!(BitBinaryKind::Sub.apply(32, 0, 1), 0xFFFF_FFFF);
        assert_eq!(BitBinaryKind::Shl.apply(32, 1, 33), 0);
    }

    #[test]
    fn test_neutral_elements() {
        assert_eq!(BitBinaryKind::Add.neutral_element(32), Some(0));
        assert_eq!(BitBinaryKind::Mul.neutral_element(32), Some(1));
        assert_eq!(BitBinaryKind::And.neutral_element(8), Some(0xFF));
        assert_eq!(BitBinaryKind::Or.neutral_element(32), Some(0));
    }

    #[test]
    fn test_reduction_classification() {
        let add = BitBinaryKind::Add;
        assert_eq!(
            add.can_reduce(32, Some(1), Some(2), false),
            BinopReduction::Constants
        );
        assert_eq!(
            add.can_reduce(32, None, Some(0), false),
            BinopReduction::RNeutral
        );
        assert_eq!(
            add.can_reduce(32, Some(0), None, false),
            BinopReduction::LNeutral
        );
        assert_eq!(add.can_reduce(32, None, None, false), BinopReduction::None);

        let xor = BitBinaryKind::Xor;
        assert_eq!(xor.can_reduce(32, None, None, true), BinopReduction::Merge);
        let sub = BitBinaryKind::Sub;
        // 0 - x is not neutral; only the right side is.
        assert_eq!(sub.can_reduce(32, Some(0), None, false), BinopReduction::None);
        assert_eq!(
            sub.can_reduce(32, None, Some(0), false),
            BinopReduction::RNeutral
        );
    }

    #[test]
    fn test_signed_comparison() {
        assert!(BitCompareKind::Slt.apply(8, 0xFF, 0)); // -1 < 0
        assert!(!BitCompareKind::Ult.apply(8, 0xFF, 0));
        assert!(BitCompareKind::Ule.apply(8, 3, 3));
    }

    #[test]
    fn test_operation_types() {
        let op = Operation::Bit(BitOp::Binary {
            kind: BitBinaryKind::Add,
            width: 32,
        });
        assert_eq!(op.argument_types(), vec![Type::Bit(32), Type::Bit(32)]);
        assert_eq!(op.result_types(), vec![Type::Bit(32)]);

        let store = Operation::Memory(MemoryOp::Store {
            stored: Type::Bit(32),
            nstates: 2,
            alignment: 4,
        });
        assert_eq!(
            store.argument_types(),
            vec![Type::Pointer, Type::Bit(32), Type::MemState, Type::MemState]
        );
        assert_eq!(store.result_types(), vec![Type::MemState, Type::MemState]);
    }

    #[test]
    fn test_allocation_sites_are_not_mergeable() {
        let alloca = Operation::Memory(MemoryOp::Alloca {
            value_type: Type::Bit(32),
            alignment: 4,
        });
        assert!(!alloca.is_mergeable());
        assert!(!Operation::Memory(MemoryOp::Malloc).is_mergeable());

        let add = Operation::Bit(BitOp::Binary {
            kind: BitBinaryKind::Add,
            width: 32,
        });
        assert!(add.is_mergeable());
        assert!(Operation::Memory(MemoryOp::StateMerge { noperands: 2 }).is_mergeable());
    }

    #[test]
    fn test_op_class_chain() {
        let op = Operation::Bit(BitOp::Binary {
            kind: BitBinaryKind::Add,
            width: 32,
        });
        assert_eq!(op.op_class(), OpClass::Binary);
        assert_eq!(OpClass::Binary.parent(), Some(OpClass::Simple));
        assert_eq!(OpClass::Simple.parent(), Some(OpClass::Any));
        assert_eq!(OpClass::Any.parent(), None);
    }

    #[test]
    fn test_debug_strings() {
        let op = Operation::Bit(BitOp::Binary {
            kind: BitBinaryKind::Add,
            width: 32,
        });
        assert_eq!(op.debug_string(), "bitadd32");
        let m = Operation::Control(ControlOp::Match {
            nbits: 1,
            mapping: vec![(0, 0)],
            default_alternative: 1,
            nalternatives: 2,
        });
        assert_eq!(m.debug_string(), "match[0->0;default 1]");
    }
}
