//! Abstract data values stored in selectors and variables.
use std::fmt;

use crate::utils::{pairing2, pairing3, MyHash};

/// A data value.
///
/// Values are immutable and compared structurally. The null pointer is
/// `Int(0)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Data {
    /// Never written.
    Undef,
    /// Any value (result of a nondeterministic call).
    Unknown,
    /// Engine-internal value, e.g. the instruction pointer.
    Native(usize),
    /// Untyped block of the given size, as returned by an allocation.
    Void(usize),
    Int(i64),
    Bool(bool),
    /// Pointer into the heap node held by `root`, displaced by `displ` bytes.
    Ref { root: usize, displ: i64 },
}

impl Data {
    pub const NULL: Data = Data::Int(0);

    /// Pointer to the beginning of `root`.
    pub fn reference(root: usize) -> Self {
        Data::Ref { root, displ: 0 }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Data::Ref { .. })
    }
    pub fn is_bool(&self) -> bool {
        matches!(self, Data::Bool(_))
    }
    pub fn is_int(&self) -> bool {
        matches!(self, Data::Int(_))
    }
    pub fn is_void(&self) -> bool {
        matches!(self, Data::Void(_))
    }
    pub fn is_null(&self) -> bool {
        *self == Data::NULL
    }
    /// Whether the value says nothing about what is stored.
    pub fn is_unknown_or_undef(&self) -> bool {
        matches!(self, Data::Unknown | Data::Undef)
    }

    /// Returns `(root, displ)` for references.
    pub fn as_ref(&self) -> Option<(usize, i64)> {
        match *self {
            Data::Ref { root, displ } => Some((root, displ)),
            _ => None,
        }
    }

    /// Same value with the referenced root renamed by `f`.
    pub fn map_root(self, f: impl FnOnce(usize) -> usize) -> Self {
        match self {
            Data::Ref { root, displ } => Data::Ref { root: f(root), displ },
            other => other,
        }
    }
}

impl MyHash for Data {
    fn hash(&self) -> u64 {
        match *self {
            Data::Undef => 0,
            Data::Unknown => 1,
            Data::Native(x) => pairing2(2, x as u64),
            Data::Void(size) => pairing2(3, size as u64),
            Data::Int(i) => pairing2(4, i as u64),
            Data::Bool(b) => pairing2(5, b as u64),
            Data::Ref { root, displ } => pairing3(6, root as u64, displ as u64),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Data::Undef => write!(f, "(undef)"),
            Data::Unknown => write!(f, "(unknown)"),
            Data::Native(x) => write!(f, "(native {})", x),
            Data::Void(size) => write!(f, "(void {})", size),
            Data::Int(0) => write!(f, "null"),
            Data::Int(i) => write!(f, "{}", i),
            Data::Bool(b) => write!(f, "{}", b),
            Data::Ref { root, displ: 0 } => write!(f, "r{}", root),
            Data::Ref { root, displ } => write!(f, "r{}{:+}", root, displ),
        }
    }
}
