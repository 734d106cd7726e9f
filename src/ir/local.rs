//! Named storage locations of a method.
//!
//! Locals are owned by the method's local table and addressed by
//! [`LocalId`], an index into that table. Derived pointers keep a
//! non-owning back-link to their container local through the *reference*
//! pair; because it is an index, it stays valid for the lifetime of the
//! method regardless of how the table grows.

use rustc_hash::FxHashSet;

use crate::ir::block::InstrRef;
use crate::ir::types::DataType;

/// Sentinel reference index meaning the accessed element is indeterminate.
pub const ANY_ELEMENT: i32 = i32::MIN;

/// Index of a local in its method's local table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u32);

impl LocalId {
    /// Creates a local id from a raw table index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named, typed storage location with use tracking.
///
/// The method maintains the reader and writer sets as instructions are
/// inserted, replaced and erased; they are always consistent with the
/// instruction stream.
#[derive(Debug, Clone)]
pub struct Local {
    name: String,
    ty: DataType,
    readers: FxHashSet<InstrRef>,
    writers: FxHashSet<InstrRef>,
    reference: Option<(LocalId, i32)>,
}

impl Local {
    pub(crate) fn new(name: String, ty: DataType) -> Self {
        Self {
            name,
            ty,
            readers: FxHashSet::default(),
            writers: FxHashSet::default(),
            reference: None,
        }
    }

    /// The unique name of the local.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type of the local.
    #[must_use]
    pub fn ty(&self) -> &DataType {
        &self.ty
    }

    pub(crate) fn set_ty(&mut self, ty: DataType) {
        self.ty = ty;
    }

    /// The instructions reading this local.
    #[must_use]
    pub fn readers(&self) -> &FxHashSet<InstrRef> {
        &self.readers
    }

    /// The instructions writing this local.
    #[must_use]
    pub fn writers(&self) -> &FxHashSet<InstrRef> {
        &self.writers
    }

    /// Returns the single writing instruction, if there is exactly one.
    #[must_use]
    pub fn single_writer(&self) -> Option<InstrRef> {
        if self.writers.len() == 1 {
            self.writers.iter().next().copied()
        } else {
            None
        }
    }

    /// The back-link to the container this local was derived from, with
    /// the element index used (or [`ANY_ELEMENT`]).
    #[must_use]
    pub fn reference(&self) -> Option<(LocalId, i32)> {
        self.reference
    }

    /// Associates this local with its container.
    ///
    /// The reference is write-once: a second call leaves the first
    /// association in place.
    pub(crate) fn set_reference(&mut self, base: LocalId, index: i32) {
        if self.reference.is_none() {
            self.reference = Some((base, index));
        }
    }

    pub(crate) fn add_reader(&mut self, at: InstrRef) {
        self.readers.insert(at);
    }

    pub(crate) fn remove_reader(&mut self, at: InstrRef) {
        self.readers.remove(&at);
    }

    pub(crate) fn add_writer(&mut self, at: InstrRef) {
        self.writers.insert(at);
    }

    pub(crate) fn remove_writer(&mut self, at: InstrRef) {
        self.writers.remove(&at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::BlockId;

    fn instr_ref(slot: u32) -> InstrRef {
        InstrRef {
            block: BlockId::new(0),
            slot,
        }
    }

    #[test]
    fn test_single_writer() {
        let mut local = Local::new("%x".to_string(), DataType::INT32);
        assert_eq!(local.single_writer(), None);

        local.add_writer(instr_ref(0));
        assert_eq!(local.single_writer(), Some(instr_ref(0)));

        local.add_writer(instr_ref(1));
        assert_eq!(local.single_writer(), None);

        local.remove_writer(instr_ref(0));
        assert_eq!(local.single_writer(), Some(instr_ref(1)));
    }

    #[test]
    fn test_reference_is_write_once() {
        let mut local = Local::new("%ptr".to_string(), DataType::INT32);
        assert_eq!(local.reference(), None);

        local.set_reference(LocalId::new(4), 2);
        assert_eq!(local.reference(), Some((LocalId::new(4), 2)));

        // second assignment must not overwrite the first
        local.set_reference(LocalId::new(9), ANY_ELEMENT);
        assert_eq!(local.reference(), Some((LocalId::new(4), 2)));
    }
}
