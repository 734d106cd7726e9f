//! Instruction scheduling within basic blocks.

use rustc_hash::FxHashSet;

use crate::config::Configuration;
use crate::error::Result;
use crate::ir::block::{BlockId, InstrRef};
use crate::ir::instruction::{Instruction, OpCode};
use crate::ir::local::LocalId;
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::walker::Walker;

fn block_ids(method: &Method) -> Vec<BlockId> {
    method.blocks().iter().map(|block| block.id()).collect()
}

fn reads_of(instr: &Instruction) -> FxHashSet<LocalId> {
    instr.read_locals().collect()
}

fn is_memory(instr: &Instruction) -> bool {
    matches!(instr.op(), OpCode::Load | OpCode::Store)
}

// conservative ordering constraint between two instructions at positions
// earlier < later in the original order
fn depends(earlier: &Instruction, later: &Instruction) -> bool {
    let earlier_writes = earlier.output_local();
    let later_writes = later.output_local();
    let earlier_reads = reads_of(earlier);
    let later_reads = reads_of(later);

    // RAW, WAR, WAW on locals
    if let Some(written) = earlier_writes {
        if later_reads.contains(&written) || later_writes == Some(written) {
            return true;
        }
    }
    if let Some(written) = later_writes {
        if earlier_reads.contains(&written) {
            return true;
        }
    }
    // memory accesses stay ordered among themselves
    if is_memory(earlier) && is_memory(later) {
        return true;
    }
    // flag producers and consumers stay ordered
    let earlier_flags = earlier.sets_flags() || earlier.condition().is_conditional();
    let later_flags = later.sets_flags() || later.condition().is_conditional();
    if earlier_flags && later_flags {
        return true;
    }
    // branches schedule after everything
    if later.op() == OpCode::Branch {
        return true;
    }
    if earlier.op() == OpCode::Branch {
        return true;
    }
    false
}

/// `schedule-instructions`: dependency-respecting list scheduling within
/// each block, preferring a candidate that does not immediately consume
/// the value produced by the previously emitted instruction.
pub(crate) fn reorder_instructions(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        let instrs: Vec<(InstrRef, Instruction)> = method
            .block(block)
            .map(|b| {
                b.iter()
                    .map(|(slot, instr)| (InstrRef { block, slot }, instr.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let count = instrs.len();
        if count < 3 {
            continue;
        }

        // dependency edges by original position
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); count];
        for later in 0..count {
            for earlier in 0..later {
                if depends(&instrs[earlier].1, &instrs[later].1) {
                    predecessors[later].push(earlier);
                }
            }
        }

        // greedy list scheduling, deterministic through original-order
        // tie-breaking
        let mut scheduled: Vec<usize> = Vec::with_capacity(count);
        let mut placed = vec![false; count];
        while scheduled.len() < count {
            let mut ready: Vec<usize> = (0..count)
                .filter(|&candidate| {
                    !placed[candidate]
                        && predecessors[candidate]
                            .iter()
                            .all(|&dependency| placed[dependency])
                })
                .collect();
            // prefer candidates independent of the last emitted result
            if let Some(&last) = scheduled.last() {
                if let Some(written) = instrs[last].1.output_local() {
                    if let Some(position) = ready
                        .iter()
                        .position(|&candidate| !reads_of(&instrs[candidate].1).contains(&written))
                    {
                        ready.rotate_left(position);
                    }
                }
            }
            let Some(&chosen) = ready.first() else {
                break;
            };
            placed[chosen] = true;
            scheduled.push(chosen);
        }
        if scheduled.len() != count || scheduled.iter().enumerate().all(|(i, &p)| i == p) {
            continue;
        }

        // rebuild the block in the new order
        for (r, _) in &instrs {
            method.erase(Walker::at(*r));
        }
        for &position in &scheduled {
            method.append(block, instrs[position].1.clone());
        }
        changed = true;
    }
    Ok(changed)
}

/// `reorder`: moves an independent instruction between an adjacent
/// producer/consumer pair to hide the result latency.
pub(crate) fn reorder_within_basic_blocks(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        let refs: Vec<InstrRef> = method
            .block(block)
            .map(|b| b.iter().map(|(slot, _)| InstrRef { block, slot }).collect())
            .unwrap_or_default();

        for window_start in 0..refs.len().saturating_sub(2) {
            let producer = refs[window_start];
            let consumer = refs[window_start + 1];
            let (Some(producer_instr), Some(consumer_instr)) = (
                method.instruction_at(producer),
                method.instruction_at(consumer),
            ) else {
                continue;
            };
            let Some(written) = producer_instr.output_local() else {
                continue;
            };
            if !reads_of(consumer_instr).contains(&written) {
                continue;
            }

            // find a later instruction safe to move in between
            let Some(filler) = find_filler(method, &refs[window_start + 1..], written) else {
                continue;
            };
            let Some(filler_instr) = method.instruction_at(filler) else {
                continue;
            };
            let moved = filler_instr.clone();
            method.erase(Walker::at(filler));
            method.emplace(Walker::at(consumer), moved);
            changed = true;
        }
    }
    Ok(changed)
}

// a filler must not interact with anything it jumps over, must not touch
// flags or memory and must not feed from the producer's result
fn find_filler(method: &Method, window: &[InstrRef], produced: LocalId) -> Option<InstrRef> {
    let mut skipped_reads: FxHashSet<LocalId> = FxHashSet::default();
    let mut skipped_writes: FxHashSet<LocalId> = FxHashSet::default();
    let mut skipped_memory = false;

    for (index, &r) in window.iter().enumerate() {
        let instr = method.instruction_at(r)?;
        if index > 0 {
            let candidate_ok = instr.op().is_alu()
                && !instr.sets_flags()
                && !instr.condition().is_conditional()
                && !is_memory(instr)
                && !skipped_memory;
            if candidate_ok {
                let reads = reads_of(instr);
                let interacts = reads.contains(&produced)
                    || reads.iter().any(|local| skipped_writes.contains(local))
                    || instr.output_local().is_some_and(|written| {
                        skipped_reads.contains(&written)
                            || skipped_writes.contains(&written)
                            || written == produced
                    });
                if !interacts {
                    return Some(r);
                }
            }
        }
        skipped_reads.extend(reads_of(instr));
        skipped_writes.extend(instr.output_local());
        skipped_memory |= is_memory(instr);
        if instr.op() == OpCode::Branch || instr.sets_flags() {
            // never move anything across control flow or flag updates
            return None;
        }
    }
    None
}
