//! Type-safe handles for canonical objects.
//!
//! Every object interned by the [`Registry`](crate::registry::Registry) is
//! addressed by a newtype wrapper around its 1-based table index. Two handles
//! of the same kind are equal exactly when they denote the same object, so
//! handles can be compared, hashed and ordered without touching the registry.
use std::fmt;

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Creates a handle from a 1-based table index.
            ///
            /// # Panics
            ///
            /// Panics if `index == 0`.
            pub fn new(index: usize) -> Self {
                assert_ne!(index, 0, concat!(stringify!($name), " indices must be >= 1"));
                Self(index as u32)
            }

            /// Returns the raw 1-based index.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<$name> for u64 {
            fn from(handle: $name) -> Self {
                handle.0 as u64
            }
        }
    };
}

handle!(
    /// Handle of an interned data value.
    DataId,
    "d"
);
handle!(
    /// Handle of an interned node label.
    LabelId,
    "n"
);
handle!(
    /// Handle of an interned variable tuple.
    TupleId,
    "v"
);
handle!(
    /// Handle of a box. Stays valid after the box is evicted from the antichain.
    BoxId,
    "b"
);
handle!(
    /// Handle of a registered type descriptor.
    TypeId,
    "t"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_roundtrip() {
        let id = LabelId::new(7);
        assert_eq!(id.index(), 7);
        assert_eq!(u64::from(id), 7);
        assert_eq!(id.to_string(), "n7");
    }

    #[test]
    #[should_panic(expected = "BoxId indices must be >= 1")]
    fn test_zero_panics() {
        BoxId::new(0);
    }

    #[test]
    fn test_ordering() {
        assert!(DataId::new(1) < DataId::new(2));
        assert_eq!(TypeId::new(3), TypeId::new(3));
    }
}
