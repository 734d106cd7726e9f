//! Kernel methods: blocks, the local table and the mutation API.
//!
//! All instruction mutation funnels through the method so the reader and
//! writer sets of the local table stay consistent with the instruction
//! stream. Blocks are kept in *layout order*: the order defines fall-
//! through successors and is what the block-reordering pass permutes.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::ir::block::{BasicBlock, BlockId, InstrRef};
use crate::ir::instruction::{ConditionCode, Instruction, OpCode};
use crate::ir::local::{Local, LocalId};
use crate::ir::types::{AddressSpace, DataType};
use crate::ir::value::{Value, ValueKind};
use crate::ir::walker::Walker;

/// A kernel method: an ordered collection of blocks and a local table.
pub struct Method {
    name: String,
    blocks: Vec<BasicBlock>,
    block_index: FxHashMap<BlockId, usize>,
    next_block_id: u32,
    locals: Vec<Local>,
    local_names: FxHashMap<String, LocalId>,
    next_temp: u32,
}

impl Method {
    /// Creates an empty method.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            block_index: FxHashMap::default(),
            next_block_id: 0,
            locals: Vec::new(),
            local_names: FxHashMap::default(),
            next_temp: 0,
        }
    }

    /// The name of the method.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // -------------------------------------------------------------------
    // blocks
    // -------------------------------------------------------------------

    /// Appends a new block and returns its id.
    pub fn add_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId::new(self.next_block_id);
        self.next_block_id += 1;
        self.block_index.insert(id, self.blocks.len());
        self.blocks.push(BasicBlock::new(id, label.into()));
        id
    }

    /// Inserts a new block at `position` in the layout order.
    pub(crate) fn insert_block_at(&mut self, position: usize, label: impl Into<String>) -> BlockId {
        let id = BlockId::new(self.next_block_id);
        self.next_block_id += 1;
        let position = position.min(self.blocks.len());
        self.blocks.insert(position, BasicBlock::new(id, label.into()));
        self.rebuild_block_index();
        id
    }

    /// Removes a block, clearing the use lists of its instructions first.
    pub(crate) fn remove_block(&mut self, id: BlockId) {
        let Some(&position) = self.block_index.get(&id) else {
            return;
        };
        let refs: Vec<InstrRef> = self.blocks[position]
            .iter()
            .map(|(slot, _)| InstrRef { block: id, slot })
            .collect();
        for r in refs {
            self.erase(Walker::at(r));
        }
        self.blocks.remove(position);
        self.rebuild_block_index();
    }

    /// Applies a new layout order. Every current block id must appear
    /// exactly once in `order`.
    pub(crate) fn set_block_order(&mut self, order: &[BlockId]) {
        debug_assert_eq!(order.len(), self.blocks.len());
        let mut reordered = Vec::with_capacity(self.blocks.len());
        for id in order {
            let position = self.block_index[id];
            reordered.push((position, *id));
        }
        let mut old: Vec<Option<BasicBlock>> = self.blocks.drain(..).map(Some).collect();
        for (position, _) in reordered {
            if let Some(block) = old[position].take() {
                self.blocks.push(block);
            }
        }
        self.rebuild_block_index();
    }

    fn rebuild_block_index(&mut self) {
        self.block_index = self
            .blocks
            .iter()
            .enumerate()
            .map(|(position, block)| (block.id(), position))
            .collect();
    }

    /// The blocks in layout order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Looks up a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.block_index.get(&id).map(|&position| &self.blocks[position])
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        let position = *self.block_index.get(&id)?;
        Some(&mut self.blocks[position])
    }

    /// The entry block of the method.
    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(BasicBlock::id)
    }

    /// The layout position of a block.
    #[must_use]
    pub fn block_position(&self, id: BlockId) -> Option<usize> {
        self.block_index.get(&id).copied()
    }

    pub(crate) fn next_block_in_order(&self, id: BlockId) -> Option<BlockId> {
        let position = *self.block_index.get(&id)?;
        self.blocks.get(position + 1).map(BasicBlock::id)
    }

    pub(crate) fn previous_block_in_order(&self, id: BlockId) -> Option<BlockId> {
        let position = *self.block_index.get(&id)?;
        position.checked_sub(1).map(|p| self.blocks[p].id())
    }

    // -------------------------------------------------------------------
    // locals
    // -------------------------------------------------------------------

    /// Creates a fresh local with a unique name derived from `hint`.
    pub fn add_new_local(&mut self, ty: DataType, hint: &str) -> Value {
        let name = loop {
            let candidate = format!("{hint}.{}", self.next_temp);
            self.next_temp += 1;
            if !self.local_names.contains_key(&candidate) {
                break candidate;
            }
        };
        let id = LocalId::new(self.locals.len() as u32);
        self.local_names.insert(name.clone(), id);
        self.locals.push(Local::new(name, ty.clone()));
        Value::local(id, ty)
    }

    /// Returns the local with the given exact name, creating it if needed.
    pub fn find_or_add_local(&mut self, name: &str, ty: DataType) -> LocalId {
        if let Some(&id) = self.local_names.get(name) {
            return id;
        }
        let id = LocalId::new(self.locals.len() as u32);
        self.local_names.insert(name.to_string(), id);
        self.locals.push(Local::new(name.to_string(), ty));
        id
    }

    /// The local table entry for `id`.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this method's table.
    #[must_use]
    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.index()]
    }

    pub(crate) fn local_mut(&mut self, id: LocalId) -> &mut Local {
        &mut self.locals[id.index()]
    }

    /// All locals of the method.
    #[must_use]
    pub fn locals(&self) -> &[Local] {
        &self.locals
    }

    /// Creates a pointer type to `pointee` in the given address space.
    #[must_use]
    pub fn create_pointer_type(&self, pointee: DataType, space: AddressSpace) -> DataType {
        DataType::pointer_to(pointee, space)
    }

    /// A human-readable rendition of `value`, resolving local names.
    #[must_use]
    pub fn describe(&self, value: &Value) -> String {
        match &value.kind {
            ValueKind::Local(id) => {
                format!("{} ({})", self.local(*id).name(), value.ty)
            }
            _ => value.to_string(),
        }
    }

    // -------------------------------------------------------------------
    // instruction mutation
    // -------------------------------------------------------------------

    /// Appends `instr` at the end of `block`.
    pub fn append(&mut self, block: BlockId, instr: Instruction) -> Walker {
        self.emplace(Walker::new(block, None), instr)
    }

    /// Inserts `instr` before the walker's position and returns a walker
    /// addressing the new instruction.
    pub fn emplace(&mut self, it: Walker, instr: Instruction) -> Walker {
        let Some(block) = self.block_mut(it.block) else {
            return it;
        };
        let slot = block.insert_before(it.pos, instr);
        let r = InstrRef {
            block: it.block,
            slot,
        };
        self.register_uses(r);
        Walker::new(it.block, Some(slot))
    }

    /// Erases the addressed instruction and returns a walker addressing
    /// the following position in the block.
    pub fn erase(&mut self, it: Walker) -> Walker {
        let Some(slot) = it.pos else {
            return it;
        };
        let Some(r) = it.instr_ref() else {
            return it;
        };
        self.unregister_uses(r);
        let Some(block) = self.block_mut(it.block) else {
            return it;
        };
        let next = block.next_slot(slot);
        block.remove(slot);
        Walker::new(it.block, next)
    }

    /// Replaces the addressed instruction in place.
    pub fn replace(&mut self, it: Walker, instr: Instruction) {
        let Some(r) = it.instr_ref() else {
            return;
        };
        if self.instruction_at(r).is_none() {
            return;
        }
        self.unregister_uses(r);
        if let Some(block) = self.block_mut(it.block) {
            block.replace(r.slot, instr);
        }
        self.register_uses(r);
    }

    /// The instruction addressed by `it`, if any.
    #[must_use]
    pub fn instruction(&self, it: Walker) -> Option<&Instruction> {
        it.get(self)
    }

    /// The instruction with the given identity, if it is still live.
    #[must_use]
    pub fn instruction_at(&self, r: InstrRef) -> Option<&Instruction> {
        self.block(r.block)?.instruction(r.slot)
    }

    fn register_uses(&mut self, r: InstrRef) {
        let Some(instr) = self.instruction_at(r) else {
            return;
        };
        let read: Vec<LocalId> = instr.read_locals().collect();
        let written = instr.output_local();
        for id in read {
            self.local_mut(id).add_reader(r);
        }
        if let Some(id) = written {
            self.local_mut(id).add_writer(r);
        }
    }

    fn unregister_uses(&mut self, r: InstrRef) {
        let Some(instr) = self.instruction_at(r) else {
            return;
        };
        let read: Vec<LocalId> = instr.read_locals().collect();
        let written = instr.output_local();
        for id in read {
            self.local_mut(id).remove_reader(r);
        }
        if let Some(id) = written {
            self.local_mut(id).remove_writer(r);
        }
    }

    // -------------------------------------------------------------------
    // walking and counting
    // -------------------------------------------------------------------

    /// A walker addressing the first live instruction of the method.
    #[must_use]
    pub fn walk_all_instructions(&self) -> Walker {
        let Some(first) = self.entry() else {
            return Walker::new(BlockId::new(0), None);
        };
        let head = self.block(first).and_then(BasicBlock::head);
        let walker = Walker::new(first, head);
        if walker.pos.is_some() {
            walker
        } else {
            walker.next_in_method(self)
        }
    }

    /// A walker addressing the first instruction of `block`.
    #[must_use]
    pub fn begin_of(&self, block: BlockId) -> Walker {
        Walker::new(block, self.block(block).and_then(BasicBlock::head))
    }

    /// A walker addressing the end of `block`.
    #[must_use]
    pub fn end_of(&self, block: BlockId) -> Walker {
        Walker::new(block, None)
    }

    /// The total number of live instructions.
    #[must_use]
    pub fn count_instructions(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }

    /// Inserts `instr` before the trailing branch group of `block`.
    ///
    /// If the block ends in one or more branches the instruction lands
    /// before the first of them, otherwise at the end of the block.
    pub(crate) fn insert_before_terminator(&mut self, block: BlockId, instr: Instruction) -> Walker {
        let position = self.first_trailing_branch(block);
        self.emplace(position, instr)
    }

    fn first_trailing_branch(&self, block: BlockId) -> Walker {
        let mut position = self.end_of(block);
        loop {
            let before = position.previous_in_block(self);
            if before == position {
                return position;
            }
            match before.get(self) {
                Some(instr) if instr.op() == OpCode::Branch => position = before,
                _ => return position,
            }
        }
    }

    // -------------------------------------------------------------------
    // control flow graph
    // -------------------------------------------------------------------

    /// The successor blocks: explicit branch targets plus the fall-through
    /// to the next block in layout order unless the block ends with an
    /// unconditional branch.
    #[must_use]
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let Some(block) = self.block(id) else {
            return Vec::new();
        };
        let mut successors = Vec::new();
        for (_, instr) in block.iter() {
            if instr.op() == OpCode::Branch {
                if let Some(target) = instr.branch_target() {
                    if !successors.contains(&target) {
                        successors.push(target);
                    }
                }
            }
        }
        let falls_through = !matches!(
            block.last_instruction(),
            Some(instr)
                if instr.op() == OpCode::Branch && instr.condition() == ConditionCode::Always
        );
        if falls_through {
            if let Some(next) = self.next_block_in_order(id) {
                if !successors.contains(&next) {
                    successors.push(next);
                }
            }
        }
        successors
    }

    /// The predecessor blocks of `id`.
    #[must_use]
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .map(BasicBlock::id)
            .filter(|&candidate| self.successors(candidate).contains(&id))
            .collect()
    }

    /// A sorted fingerprint of the control flow graph, for stability
    /// checks across optimization phases.
    #[must_use]
    pub fn cfg_edges(&self) -> Vec<(BlockId, BlockId)> {
        let mut edges: Vec<(BlockId, BlockId)> = self
            .blocks
            .iter()
            .flat_map(|block| {
                self.successors(block.id())
                    .into_iter()
                    .map(move |successor| (block.id(), successor))
            })
            .collect();
        edges.sort_unstable();
        edges
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {}:", self.name)?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        Ok(())
    }
}
