//! Bidirectional instruction cursors.
//!
//! A [`Walker`] is a copyable `(block, slot)` pair. It does not borrow the
//! method; every navigation and access operation takes the method as an
//! argument. Because slots are stable (see [`crate::ir::block`]), a walker
//! survives insertions before it and erasures of other positions.
//!
//! Transformations that consume a walker return a walker positioned at the
//! instruction they logically consumed; the caller decides whether to
//! advance.

use crate::ir::block::{BlockId, InstrRef};
use crate::ir::instruction::Instruction;
use crate::ir::method::Method;

/// A copyable cursor over the instructions of a method.
///
/// A position of `None` addresses the end of the block, one past its last
/// instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walker {
    pub(crate) block: BlockId,
    pub(crate) pos: Option<u32>,
}

impl Walker {
    pub(crate) fn new(block: BlockId, pos: Option<u32>) -> Self {
        Self { block, pos }
    }

    /// Creates a walker addressing an existing instruction.
    #[must_use]
    pub fn at(instr: InstrRef) -> Self {
        Self {
            block: instr.block,
            pos: Some(instr.slot),
        }
    }

    /// The block this walker is in.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// The identity of the addressed instruction, `None` at end of block.
    #[must_use]
    pub fn instr_ref(&self) -> Option<InstrRef> {
        self.pos.map(|slot| InstrRef {
            block: self.block,
            slot,
        })
    }

    /// The addressed instruction, `None` at end of block or on a
    /// tombstoned position.
    #[must_use]
    pub fn get<'m>(&self, method: &'m Method) -> Option<&'m Instruction> {
        let block = method.block(self.block)?;
        block.instruction(self.pos?)
    }

    /// Returns `true` if this walker addresses the end of its block.
    #[must_use]
    pub fn is_end_of_block(&self) -> bool {
        self.pos.is_none()
    }

    /// Returns `true` if this walker addresses the start of its block.
    #[must_use]
    pub fn is_start_of_block(&self, method: &Method) -> bool {
        match method.block(self.block) {
            Some(block) => self.pos == block.head(),
            None => true,
        }
    }

    /// Advances one instruction within the block, saturating at the end.
    #[must_use]
    pub fn next_in_block(self, method: &Method) -> Self {
        let Some(block) = method.block(self.block) else {
            return self;
        };
        match self.pos {
            Some(slot) => Self::new(self.block, block.next_slot(slot)),
            None => self,
        }
    }

    /// Retreats one instruction within the block.
    ///
    /// From the end this addresses the last instruction; at the start it
    /// saturates and returns itself.
    #[must_use]
    pub fn previous_in_block(self, method: &Method) -> Self {
        let Some(block) = method.block(self.block) else {
            return self;
        };
        match self.pos {
            None => Self::new(self.block, block.tail()),
            Some(slot) => match block.prev_slot(slot) {
                Some(prev) => Self::new(self.block, Some(prev)),
                None => self,
            },
        }
    }

    /// Advances one instruction, hopping over block boundaries and empty
    /// blocks. At the end of the method it saturates.
    #[must_use]
    pub fn next_in_method(self, method: &Method) -> Self {
        let mut walker = self.next_in_block(method);
        while walker.pos.is_none() {
            match method.next_block_in_order(walker.block) {
                Some(next) => {
                    let head = method.block(next).and_then(|b| b.head());
                    walker = Self::new(next, head);
                }
                None => return walker,
            }
        }
        walker
    }

    /// Retreats one instruction, hopping over block boundaries and empty
    /// blocks. At the first instruction of the method it saturates and
    /// returns itself.
    #[must_use]
    pub fn previous_in_method(self, method: &Method) -> Self {
        // try within the block first
        if let Some(block) = method.block(self.block) {
            match self.pos {
                None => {
                    if let Some(tail) = block.tail() {
                        return Self::new(self.block, Some(tail));
                    }
                }
                Some(slot) => {
                    if let Some(prev) = block.prev_slot(slot) {
                        return Self::new(self.block, Some(prev));
                    }
                }
            }
        }
        // walk back through preceding blocks
        let mut current = self.block;
        while let Some(prev_block) = method.previous_block_in_order(current) {
            if let Some(tail) = method.block(prev_block).and_then(|b| b.tail()) {
                return Self::new(prev_block, Some(tail));
            }
            current = prev_block;
        }
        self
    }

    /// Returns `true` if no live instruction follows this position.
    #[must_use]
    pub fn is_end_of_method(&self, method: &Method) -> bool {
        if self.pos.is_some() {
            return false;
        }
        let mut current = self.block;
        while let Some(next) = method.next_block_in_order(current) {
            if method.block(next).is_some_and(|b| !b.is_empty()) {
                return false;
            }
            current = next;
        }
        true
    }
}
