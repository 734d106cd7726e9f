//! Direction-parameterized intra-block analysis.
//!
//! A [`LocalAnalysis`] traverses the instructions of a single block in the
//! configured [`Direction`], threading a lattice value through a transfer
//! function and recording one value per instruction. One instance analyzes
//! exactly one block; callers create a new instance per block.
//!
//! For a forward analysis the value recorded at an instruction is the
//! state *after* that instruction; for a backward analysis it is the state
//! *before* it (the state the instruction's transfer produced while
//! walking towards the block start).

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::block::InstrRef;
use crate::ir::instruction::Instruction;
use crate::ir::method::Method;
use crate::ir::BlockId;

/// Direction of an intra-block analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Traverses from the first instruction to the last.
    Forward,
    /// Traverses from the last instruction to the first.
    Backward,
}

/// An intra-block analysis over lattice `V` with transfer function `F`.
pub struct LocalAnalysis<V, F>
where
    F: Fn(&Instruction, &V) -> V,
{
    direction: Direction,
    transfer: F,
    initial: V,
    results: FxHashMap<InstrRef, V>,
    at_start: Option<InstrRef>,
    at_end: Option<InstrRef>,
}

impl<V, F> LocalAnalysis<V, F>
where
    F: Fn(&Instruction, &V) -> V,
{
    /// Creates a forward analysis seeded with `initial`.
    #[must_use]
    pub fn forward(transfer: F, initial: V) -> Self {
        Self::new(Direction::Forward, transfer, initial)
    }

    /// Creates a backward analysis seeded with `initial`.
    #[must_use]
    pub fn backward(transfer: F, initial: V) -> Self {
        Self::new(Direction::Backward, transfer, initial)
    }

    fn new(direction: Direction, transfer: F, initial: V) -> Self {
        Self {
            direction,
            transfer,
            initial,
            results: FxHashMap::default(),
            at_start: None,
            at_end: None,
        }
    }

    /// The direction of this analysis.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The value every traversal is seeded with.
    #[must_use]
    pub fn initial(&self) -> &V {
        &self.initial
    }

    /// Analyzes `block` and fills the internal result store.
    pub fn analyze(&mut self, method: &Method, block: BlockId)
    where
        V: Clone,
    {
        let Some(block_ref) = method.block(block) else {
            return;
        };
        let slots: Vec<(u32, &Instruction)> = block_ref.iter().collect();
        if slots.is_empty() {
            return;
        }
        match self.direction {
            Direction::Forward => {
                let mut prev = self.initial.clone();
                for &(slot, instr) in &slots {
                    let r = InstrRef { block, slot };
                    let value = (self.transfer)(instr, &prev);
                    self.results.insert(r, value.clone());
                    prev = value;
                }
            }
            Direction::Backward => {
                let mut prev = self.initial.clone();
                for &(slot, instr) in slots.iter().rev() {
                    let r = InstrRef { block, slot };
                    let value = (self.transfer)(instr, &prev);
                    self.results.insert(r, value.clone());
                    prev = value;
                }
            }
        }
        let first = InstrRef {
            block,
            slot: slots[0].0,
        };
        let last = InstrRef {
            block,
            slot: slots[slots.len() - 1].0,
        };
        // the entry value is the first instruction's recorded value in a
        // forward analysis and the last instruction's in a backward one
        self.at_start = Some(first);
        self.at_end = Some(last);
    }

    /// The value recorded at `instr`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownKey`] if the instruction was not analyzed.
    pub fn result(&self, instr: InstrRef) -> Result<&V> {
        self.results.get(&instr).ok_or_else(|| Error::UnknownKey {
            detail: format!("instruction B{}:{}", instr.block.index(), instr.slot),
        })
    }

    /// The value at the block entry.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownKey`] if no block was analyzed.
    pub fn result_at_start(&self) -> Result<&V> {
        let r = self.at_start.ok_or_else(|| Error::UnknownKey {
            detail: "block start (no block analyzed)".to_string(),
        })?;
        self.result(r)
    }

    /// The value at the block exit.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownKey`] if no block was analyzed.
    pub fn result_at_end(&self) -> Result<&V> {
        let r = self.at_end.ok_or_else(|| Error::UnknownKey {
            detail: "block end (no block analyzed)".to_string(),
        })?;
        self.result(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{Instruction, OpCode};
    use crate::ir::value::Value;
    use crate::ir::DataType;

    fn build_block(instructions: usize) -> (Method, BlockId) {
        let mut method = Method::new("kernel");
        let block = method.add_block("%entry");
        let out = method.add_new_local(DataType::INT32, "%x");
        for i in 0..instructions {
            method.append(
                block,
                Instruction::new(
                    OpCode::Add,
                    vec![Value::int(i as i32), Value::int(1)],
                    Some(out.clone()),
                ),
            );
        }
        (method, block)
    }

    #[test]
    fn test_forward_counts_instructions() {
        let (method, block) = build_block(3);
        let mut analysis = LocalAnalysis::forward(|_instr: &Instruction, prev: &usize| prev + 1, 0);
        analysis.analyze(&method, block);

        assert_eq!(analysis.result_at_start().unwrap(), &1);
        assert_eq!(analysis.result_at_end().unwrap(), &3);
    }

    #[test]
    fn test_backward_counts_instructions() {
        let (method, block) = build_block(3);
        let mut analysis = LocalAnalysis::backward(|_instr: &Instruction, prev: &usize| prev + 1, 0);
        analysis.analyze(&method, block);

        // in a backward traversal the first instruction is reached last
        assert_eq!(analysis.result_at_start().unwrap(), &3);
        assert_eq!(analysis.result_at_end().unwrap(), &1);
    }

    #[test]
    fn test_per_instruction_results() {
        let (method, block) = build_block(2);
        let mut analysis = LocalAnalysis::forward(|_instr: &Instruction, prev: &usize| prev + 1, 0);
        analysis.analyze(&method, block);

        let first = method.begin_of(block).instr_ref().unwrap();
        assert_eq!(analysis.result(first).unwrap(), &1);
    }

    #[test]
    fn test_unknown_key() {
        let (method, block) = build_block(1);
        let mut analysis = LocalAnalysis::forward(|_instr: &Instruction, prev: &usize| prev + 1, 0);
        analysis.analyze(&method, block);

        let bogus = InstrRef {
            block,
            slot: 999,
        };
        assert!(matches!(
            analysis.result(bogus),
            Err(Error::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_empty_block_has_no_results() {
        let mut method = Method::new("kernel");
        let block = method.add_block("%entry");
        let mut analysis = LocalAnalysis::forward(|_instr: &Instruction, prev: &usize| prev + 1, 0);
        analysis.analyze(&method, block);
        assert!(analysis.result_at_start().is_err());
    }
}
