//! Heap references and the `Trace`/`Visitor` pair used to walk them.
//!
//! Every heap entry is named by an [`Offset`]. A reference carries the kind of
//! the entry it points at, so the collector never has to discover the kind at
//! runtime: [`HeapRef::Object`] entries live in the object container and
//! [`HeapRef::Array`] entries live in the array container.

/// Stable identity of a heap entry, used as the key of every container and
/// mark bitmap.
pub type Offset = usize;

/// A typed reference to a heap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapRef {
    /// Reference to an entry of the object container.
    Object(Offset),
    /// Reference to an entry of the array container.
    Array(Offset),
}

impl HeapRef {
    /// The offset this reference points at.
    #[must_use]
    pub const fn offset(self) -> Offset {
        match self {
            Self::Object(offset) | Self::Array(offset) => offset,
        }
    }

    /// Returns `true` for object references.
    #[must_use]
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Returns `true` for array references.
    #[must_use]
    pub const fn is_array(self) -> bool {
        matches!(self, Self::Array(_))
    }
}

/// A root or field slot. `None` is the null reference.
pub type Slot = Option<HeapRef>;

/// A value whose outgoing references can be enumerated by the collector.
///
/// Implementations must report every reference they hold, including null
/// slots. Skipping a reference lets the sweeper reclaim a live entry.
pub trait Trace {
    /// Visit every slot held by this value.
    fn trace(&self, visitor: &mut impl Visitor);
}

/// Receives the slots reported by [`Trace::trace`].
pub trait Visitor {
    /// Visit one slot. Null slots are passed through and must be tolerated.
    fn visit(&mut self, slot: Slot);
}

impl Trace for Slot {
    fn trace(&self, visitor: &mut impl Visitor) {
        visitor.visit(*self);
    }
}

impl Trace for [Slot] {
    fn trace(&self, visitor: &mut impl Visitor) {
        for slot in self {
            visitor.visit(*slot);
        }
    }
}

impl Trace for Vec<Slot> {
    fn trace(&self, visitor: &mut impl Visitor) {
        self.as_slice().trace(visitor);
    }
}
