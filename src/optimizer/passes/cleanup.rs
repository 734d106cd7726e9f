//! Cleanup passes: move and flag elimination, propagation, dead code.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::available::{available_expressions, Expression};
use crate::analysis::liveness::{liveness, LiveLocals};
use crate::config::Configuration;
use crate::error::Result;
use crate::ir::block::{BlockId, InstrRef};
use crate::ir::instruction::{Instruction, OpCode};
use crate::ir::local::LocalId;
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::value::{Value, ValueKind};
use crate::ir::walker::Walker;

fn block_refs(method: &Method, block: BlockId) -> Vec<InstrRef> {
    method
        .block(block)
        .map(|b| b.iter().map(|(slot, _)| InstrRef { block, slot }).collect())
        .unwrap_or_default()
}

fn block_ids(method: &Method) -> Vec<BlockId> {
    method.blocks().iter().map(|block| block.id()).collect()
}

/// `eliminate-moves`: rewrites the operation producing a moved-from value
/// to write the move's destination directly, when the move is the sole
/// reader.
pub(crate) fn eliminate_redundant_moves(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        for r in block_refs(method, block) {
            let walker = Walker::at(r);
            let Some(instr) = walker.get(method) else {
                continue;
            };
            if !instr.is_simple_move() {
                continue;
            }
            let (Some(source), Some(output)) = (instr.first_arg(), instr.output()) else {
                continue;
            };
            // move to itself carries no information
            if source == output {
                method.erase(walker);
                changed = true;
                continue;
            }
            let (Some(source_local), Some(output_local)) =
                (source.check_local(), output.check_local())
            else {
                continue;
            };
            if source.ty != output.ty || source_local == output_local {
                continue;
            }
            // the producer must be unique, unconditional, in this block
            // before the move, and the move its only consumer
            if method.local(source_local).readers().len() != 1 {
                continue;
            }
            let Some(writer) = method.local(source_local).single_writer() else {
                continue;
            };
            if writer.block != block {
                continue;
            }
            let Some(block_ref) = method.block(block) else {
                continue;
            };
            if !block_ref.precedes(writer.slot, r.slot) {
                continue;
            }
            let Some(producer) = method.instruction_at(writer) else {
                continue;
            };
            if producer.condition().is_conditional()
                || producer.output().map(|value| &value.kind) != Some(&ValueKind::Local(source_local))
            {
                continue;
            }

            let output = output.clone();
            let mut rewritten = producer.clone();
            rewritten.set_output(Some(output));
            method.replace(Walker::at(writer), rewritten);
            method.erase(walker);
            changed = true;
        }
    }
    Ok(changed)
}

/// `copy-propagation`: replaces operand reads with the moved-from value
/// while it provably still holds.
///
/// Only literal and local sources propagate; hardware registers like the
/// uniform stream are read-once and must not be duplicated.
pub(crate) fn propagate_moves(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        let mut copies: FxHashMap<LocalId, Value> = FxHashMap::default();
        for r in block_refs(method, block) {
            let walker = Walker::at(r);
            let Some(instr) = walker.get(method) else {
                continue;
            };

            // substitute known copies into the operands
            let mut replacement = instr.clone();
            let mut substituted = false;
            for arg in replacement.args_mut() {
                if let Some(local) = arg.check_local() {
                    if let Some(value) = copies.get(&local) {
                        *arg = value.clone();
                        substituted = true;
                    }
                }
            }
            if substituted {
                method.replace(walker, replacement);
                changed = true;
            }

            let Some(instr) = walker.get(method) else {
                continue;
            };

            // invalidate bindings broken by the write
            if let Some(written) = instr.output_local() {
                copies.remove(&written);
                copies.retain(|_, value| !value.has_local(written));
            }

            // record fresh copies
            if instr.is_simple_move() {
                if let (Some(output), Some(source)) = (instr.output_local(), instr.first_arg()) {
                    let propagable = matches!(
                        source.kind,
                        ValueKind::Literal(_) | ValueKind::Local(_) | ValueKind::Vector(_)
                    );
                    if propagable && !source.has_local(output) {
                        copies.insert(output, source.clone());
                    }
                }
            }
        }
    }
    Ok(changed)
}

/// `eliminate-dead-code`: removes side-effect-free instructions whose
/// outputs are never read, and moves of a local onto itself.
///
/// Liveness within the block comes from the backward [`liveness`]
/// analysis; reads in other blocks (and in the block itself, when it sits
/// on a cycle) seed the live-out set.
pub(crate) fn eliminate_dead_code(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        let refs = block_refs(method, block);
        if refs.is_empty() {
            continue;
        }

        let live_out = live_out_of(method, block);
        let mut analysis = liveness(live_out.clone());
        analysis.analyze(method, block);

        let mut dead: Vec<InstrRef> = Vec::new();
        for (position, &r) in refs.iter().enumerate() {
            let Some(instr) = method.instruction_at(r) else {
                continue;
            };
            if instr.has_side_effects() {
                continue;
            }
            // a move of a local onto itself never changes anything
            if instr.is_simple_move()
                && instr.output().is_some()
                && instr.first_arg() == instr.output()
            {
                dead.push(r);
                continue;
            }
            let Some(written) = instr.output_local() else {
                // a pure computation without output does nothing
                dead.push(r);
                continue;
            };
            let live_after = match refs.get(position + 1) {
                Some(&next) => analysis.result(next)?,
                None => &live_out,
            };
            if !live_after.contains(&written) {
                dead.push(r);
            }
        }

        for r in dead {
            method.erase(Walker::at(r));
            changed = true;
        }
    }
    Ok(changed)
}

// locals that must be treated as live when the block exits
fn live_out_of(method: &Method, block: BlockId) -> LiveLocals {
    let mut live: LiveLocals = LiveLocals::default();
    let on_cycle = reaches_itself(method, block);
    for (id, local) in method.locals().iter().enumerate() {
        let id = LocalId::new(id as u32);
        let read_elsewhere = local.readers().iter().any(|reader| reader.block != block);
        let read_here = !local.readers().is_empty();
        if read_elsewhere || (on_cycle && read_here) {
            live.insert(id);
        }
    }
    live
}

fn reaches_itself(method: &Method, block: BlockId) -> bool {
    let mut seen: FxHashSet<BlockId> = FxHashSet::default();
    let mut queue = method.successors(block);
    while let Some(next) = queue.pop() {
        if next == block {
            return true;
        }
        if seen.insert(next) {
            queue.extend(method.successors(next));
        }
    }
    false
}

/// `eliminate-common-subexpressions`: replaces a recomputation of an
/// already-available expression with a move from the local holding it.
pub(crate) fn eliminate_common_subexpressions(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        let refs = block_refs(method, block);
        if refs.len() < 2 {
            continue;
        }
        let mut analysis = available_expressions();
        analysis.analyze(method, block);

        let mut rewrites: Vec<(InstrRef, Instruction)> = Vec::new();
        for (position, &r) in refs.iter().enumerate().skip(1) {
            let Some(instr) = method.instruction_at(r) else {
                continue;
            };
            if instr.sets_flags() {
                continue;
            }
            let Some(expression) = Expression::of(instr) else {
                continue;
            };
            let available = analysis.result(refs[position - 1])?;
            let Some(previous) = available.get(&expression) else {
                continue;
            };
            let Some(output) = instr.output() else {
                continue;
            };
            if previous == output {
                continue;
            }
            rewrites.push((
                r,
                Instruction::mov(output.clone(), previous.clone())
                    .with_decorations(instr.decorations()),
            ));
        }

        for (r, instr) in rewrites {
            method.replace(Walker::at(r), instr);
            changed = true;
        }
    }
    Ok(changed)
}

/// `eliminate-bit-operations`: removes masks already implied by the
/// producing shift or mask operation.
pub(crate) fn eliminate_redundant_bit_op(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        for r in block_refs(method, block) {
            let walker = Walker::at(r);
            let Some(instr) = walker.get(method) else {
                continue;
            };
            if instr.condition().is_conditional() {
                continue;
            }
            let op = instr.op();
            if op != OpCode::And && op != OpCode::Or {
                continue;
            }
            let (Some(a), Some(b)) = (instr.first_arg(), instr.second_arg()) else {
                continue;
            };
            // normalize to (value, literal mask)
            let (value, mask) = if let Some(mask) = b.literal_value() {
                (a, mask.unsigned())
            } else if let Some(mask) = a.literal_value() {
                (b, mask.unsigned())
            } else {
                continue;
            };
            let Some(value_local) = value.check_local() else {
                continue;
            };
            let Some(writer) = method.local(value_local).single_writer() else {
                continue;
            };
            if writer.block != block {
                continue;
            }
            let Some(block_ref) = method.block(block) else {
                continue;
            };
            if !block_ref.precedes(writer.slot, r.slot) {
                continue;
            }
            let Some(producer) = method.instruction_at(writer) else {
                continue;
            };
            if producer.condition().is_conditional() {
                continue;
            }

            let producer_literal = producer
                .second_arg()
                .and_then(Value::literal_value)
                .map(crate::ir::Literal::unsigned);
            let redundant = match (op, producer.op()) {
                // all bits surviving the shift already lie inside the mask
                (OpCode::And, OpCode::Shr) => producer_literal
                    .filter(|&shift| shift < 32)
                    .is_some_and(|shift| {
                        let possible = u32::MAX >> shift;
                        possible & mask == possible
                    }),
                // the narrower mask already applied
                (OpCode::And, OpCode::And) => producer_literal
                    .is_some_and(|inner_mask| inner_mask & mask == inner_mask),
                // the bits to set are already set
                (OpCode::Or, OpCode::Or) => {
                    producer_literal.is_some_and(|inner_mask| mask & inner_mask == mask)
                }
                _ => false,
            };
            if !redundant {
                continue;
            }

            let Some(output) = instr.output().cloned() else {
                continue;
            };
            let mut replacement = Instruction::mov(output, value.clone())
                .with_decorations(instr.decorations());
            if instr.sets_flags() {
                replacement = replacement.with_set_flags();
            }
            method.replace(walker, replacement);
            changed = true;
        }
    }
    Ok(changed)
}

/// `remove-unused-flags`: drops flag updates that no conditional consumer
/// observes before the flags are overwritten.
pub(crate) fn remove_useless_flags(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        let refs = block_refs(method, block);
        for (position, &r) in refs.iter().enumerate() {
            let Some(instr) = method.instruction_at(r) else {
                continue;
            };
            if !instr.sets_flags() {
                continue;
            }

            // scan to the next flag update; if the flags escape the block
            // a successor may still read them
            let mut consumed = false;
            let mut superseded = false;
            for &later in &refs[position + 1..] {
                let Some(later_instr) = method.instruction_at(later) else {
                    continue;
                };
                if later_instr.condition().is_conditional() {
                    consumed = true;
                    break;
                }
                if later_instr.sets_flags() {
                    superseded = true;
                    break;
                }
            }
            if consumed || !superseded {
                continue;
            }

            if instr.output().is_none() && instr.op() == OpCode::Move {
                method.erase(Walker::at(r));
            } else {
                let mut replacement = instr.clone();
                replacement.set_flag_setting(false);
                method.replace(Walker::at(r), replacement);
            }
            changed = true;
        }
    }
    Ok(changed)
}

/// `split-read-write`: when a local is read directly after being written
/// but also has further readers, reroutes the distant readers through a
/// buffer copy so the short-lived value and the long-lived one can be
/// allocated separately.
pub(crate) fn split_read_after_writes(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        let refs = block_refs(method, block);
        for window in refs.windows(2) {
            let [writer, reader] = *window else {
                continue;
            };
            let Some(writer_instr) = method.instruction_at(writer) else {
                continue;
            };
            if writer_instr.condition().is_conditional() {
                continue;
            }
            let Some(written) = writer_instr.output_local() else {
                continue;
            };
            let Some(reader_instr) = method.instruction_at(reader) else {
                continue;
            };
            if !reader_instr.read_locals().any(|local| local == written) {
                continue;
            }
            // rewriting all readers is only sound for a unique producer
            if method.local(written).single_writer() != Some(writer) {
                continue;
            }
            let distant: Vec<InstrRef> = method
                .local(written)
                .readers()
                .iter()
                .copied()
                .filter(|&other| other != reader)
                .collect();
            if distant.is_empty() {
                continue;
            }

            let ty = method.local(written).ty().clone();
            let written_value = Value::local(written, ty.clone());
            let buffer = method.add_new_local(ty, "%split");
            // buffer copy directly after the write, before the adjacent read
            method.emplace(
                Walker::at(reader),
                Instruction::mov(buffer.clone(), written_value.clone()),
            );
            let mut distant = distant;
            distant.sort_unstable();
            for other in distant {
                let Some(other_instr) = method.instruction_at(other) else {
                    continue;
                };
                let mut rewritten = other_instr.clone();
                for arg in rewritten.args_mut() {
                    if arg.has_local(written) {
                        *arg = buffer.clone();
                    }
                }
                method.replace(Walker::at(other), rewritten);
            }
            changed = true;
        }
    }
    Ok(changed)
}
