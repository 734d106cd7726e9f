//! Peephole combining passes: chained ALU operations, rotations and
//! repeated constant loads.

use rustc_hash::FxHashMap;

use crate::config::Configuration;
use crate::error::Result;
use crate::ir::block::{BlockId, InstrRef};
use crate::ir::instruction::{Instruction, OpCode};
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::types::NATIVE_VECTOR_WIDTH;
use crate::ir::value::{Value, ValueKind};
use crate::ir::walker::Walker;
use crate::optimizer::steps;

fn block_ids(method: &Method) -> Vec<BlockId> {
    method.blocks().iter().map(|block| block.id()).collect()
}

fn block_refs(method: &Method, block: BlockId) -> Vec<InstrRef> {
    method
        .block(block)
        .map(|b| b.iter().map(|(slot, _)| InstrRef { block, slot }).collect())
        .unwrap_or_default()
}

/// `combine`: a whole-method sweep of the arithmetic-chain combining also
/// run inside `single-steps`, catching chains formed by the later phases.
pub(crate) fn combine_operations(
    module: &Module,
    method: &mut Method,
    config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    for block in block_ids(method) {
        for r in block_refs(method, block) {
            let (_, step_changed) =
                steps::combine_arithmetics_at(module, method, Walker::at(r), config)?;
            changed |= step_changed;
        }
    }
    Ok(changed)
}

/// `combine-rotations`: fuses chained rotations into a single rotation
/// with the summed distance.
///
/// Scalar `ror` distances wrap at 32 bits, full-vector rotations wrap at
/// the native vector width. A chain summing to zero degenerates into a
/// move.
pub(crate) fn combine_vector_rotations(
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
            let op = instr.op();
            if op != OpCode::Ror && op != OpCode::Rotate {
                continue;
            }
            if instr.condition().is_conditional() {
                continue;
            }
            let (Some(source), Some(distance)) = (instr.first_arg(), instr.second_arg()) else {
                continue;
            };
            let Some(outer_distance) = distance.literal_value() else {
                continue;
            };
            let Some(source_local) = source.check_local() else {
                continue;
            };
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
            let Some(inner) = method.instruction_at(writer) else {
                continue;
            };
            if inner.op() != op || inner.condition().is_conditional() || inner.sets_flags() {
                continue;
            }
            let (Some(base), Some(inner_distance)) = (inner.first_arg(), inner.second_arg())
            else {
                continue;
            };
            let Some(inner_distance) = inner_distance.literal_value() else {
                continue;
            };

            let modulus = if op == OpCode::Ror {
                32
            } else {
                u32::from(NATIVE_VECTOR_WIDTH)
            };
            let total = (outer_distance.unsigned() + inner_distance.unsigned()) % modulus;

            let base = base.clone();
            let Some(output) = instr.output().cloned() else {
                continue;
            };
            let decorations = instr.decorations();
            let sets_flags = instr.sets_flags();
            let mut replacement = if total == 0 {
                Instruction::mov(output, base)
            } else {
                Instruction::new(op, vec![base, Value::int(total as i32)], Some(output))
            }
            .with_decorations(decorations);
            if sets_flags {
                replacement = replacement.with_set_flags();
            }
            method.replace(walker, replacement);
            changed = true;
        }
    }
    Ok(changed)
}

/// `combine-loads`: reuses an earlier load of the same constant within a
/// close window of the same block, replacing the duplicate load with a
/// register move.
pub(crate) fn combine_loading_constants(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    // distance after which reusing the register stretches its liveness
    // more than the reload costs
    const WINDOW: usize = 32;

    let mut changed = false;
    for block in block_ids(method) {
        // constant -> (holding value, position of the load)
        let mut recent: FxHashMap<Value, (Value, usize)> = FxHashMap::default();
        let mut holder_of: FxHashMap<crate::ir::LocalId, Value> = FxHashMap::default();

        for (position, r) in block_refs(method, block).into_iter().enumerate() {
            let walker = Walker::at(r);
            let Some(instr) = walker.get(method) else {
                continue;
            };

            // a write invalidates any constant held in the local
            if let Some(written) = instr.output_local() {
                if let Some(constant) = holder_of.remove(&written) {
                    recent.remove(&constant);
                }
            }

            let is_constant_load = instr.is_simple_move()
                && instr.first_arg().is_some_and(|arg| {
                    matches!(arg.kind, ValueKind::Literal(_) | ValueKind::Vector(_))
                })
                && instr.output_local().is_some();
            if !is_constant_load {
                continue;
            }
            let constant = instr.first_arg().cloned().unwrap_or_else(Value::undefined);
            let output = instr.output().cloned().unwrap_or_else(Value::undefined);

            match recent.get(&constant) {
                Some((holder, load_position)) if position - load_position <= WINDOW => {
                    let replacement = Instruction::mov(output, holder.clone())
                        .with_decorations(instr.decorations());
                    method.replace(walker, replacement);
                    changed = true;
                }
                _ => {
                    if let Some(local) = output.check_local() {
                        recent.insert(constant.clone(), (output, position));
                        holder_of.insert(local, constant);
                    }
                }
            }
        }
    }
    Ok(changed)
}
