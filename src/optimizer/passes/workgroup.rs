//! Work-group level passes: info compression and DMA access caching.

use rustc_hash::FxHashMap;

use crate::config::Configuration;
use crate::error::Result;
use crate::ir::block::InstrRef;
use crate::ir::instruction::{Decorations, Instruction, OpCode};
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::types::DataType;
use crate::ir::value::{Register, Value};
use crate::ir::walker::Walker;
use crate::optimizer::passes::loops::dominators;

/// `compress-work-group-info`: packs narrow work-group parameters loaded
/// at kernel entry into one 32-bit local.
///
/// Work-group dimensions and sizes all fit a byte. Packing up to four of
/// them into a single local frees registers over the whole kernel; each
/// reader extracts its byte with a shift and a mask.
pub(crate) fn compress_work_group_locals(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let Some(entry) = method.entry() else {
        return Ok(false);
    };

    // byte-sized work-group uniforms loaded at kernel entry
    let mut candidates: Vec<(InstrRef, crate::ir::LocalId)> = Vec::new();
    let Some(entry_block) = method.block(entry) else {
        return Ok(false);
    };
    for (slot, instr) in entry_block.iter() {
        if candidates.len() == 4 {
            break;
        }
        let is_info_load = instr.op() == OpCode::Move
            && instr.has_decoration(Decorations::WORK_GROUP_UNIFORM)
            && instr
                .first_arg()
                .is_some_and(|arg| arg.check_register() == Some(Register::Uniform));
        if !is_info_load {
            continue;
        }
        let Some(written) = instr.output_local() else {
            continue;
        };
        if method.local(written).ty() != &DataType::INT8 {
            continue;
        }
        let r = InstrRef {
            block: entry,
            slot,
        };
        if method.local(written).single_writer() != Some(r)
            || method.local(written).readers().is_empty()
        {
            continue;
        }
        candidates.push((r, written));
    }
    if candidates.len() < 2 {
        return Ok(false);
    }

    // snapshot the readers before the packing code adds its own
    let reader_sets: Vec<Vec<InstrRef>> = candidates
        .iter()
        .map(|(_, local)| {
            let mut readers: Vec<InstrRef> =
                method.local(*local).readers().iter().copied().collect();
            readers.sort_unstable();
            readers
        })
        .collect();

    // pack behind the last candidate load
    let last_load = candidates[candidates.len() - 1].0;
    let insert_at = Walker::at(last_load).next_in_block(method);
    let packed = method.add_new_local(DataType::INT32, "%work_group_info");
    let mut accumulator: Option<Value> = None;
    for (index, (_, local)) in candidates.iter().enumerate() {
        let ty = method.local(*local).ty().clone();
        let masked = method.add_new_local(DataType::INT32, "%wg_masked");
        method.emplace(
            insert_at,
            Instruction::new(
                OpCode::And,
                vec![
                    Value::local(*local, ty),
                    Value::literal(0xFFu32, DataType::INT32),
                ],
                Some(masked.clone()),
            ),
        );
        let part = if index == 0 {
            masked
        } else {
            let shifted = method.add_new_local(DataType::INT32, "%wg_shifted");
            method.emplace(
                insert_at,
                Instruction::new(
                    OpCode::Shl,
                    vec![masked, Value::int((index * 8) as i32)],
                    Some(shifted.clone()),
                ),
            );
            shifted
        };
        accumulator = Some(match accumulator {
            None => part,
            Some(previous) => {
                let target = if index == candidates.len() - 1 {
                    packed.clone()
                } else {
                    method.add_new_local(DataType::INT32, "%wg_packed")
                };
                method.emplace(
                    insert_at,
                    Instruction::new(OpCode::Or, vec![previous, part], Some(target.clone())),
                );
                target
            }
        });
    }

    // rewrite every reader to extract its byte from the packed local
    for (index, (_, local)) in candidates.iter().enumerate() {
        for &reader in &reader_sets[index] {
            let Some(reader_instr) = method.instruction_at(reader) else {
                continue;
            };
            let mut rewritten = reader_instr.clone();
            let at = Walker::at(reader);
            let shifted = if index == 0 {
                packed.clone()
            } else {
                let shifted = method.add_new_local(DataType::INT32, "%wg_extract");
                method.emplace(
                    at,
                    Instruction::new(
                        OpCode::Shr,
                        vec![packed.clone(), Value::int((index * 8) as i32)],
                        Some(shifted.clone()),
                    ),
                );
                shifted
            };
            let extracted = method.add_new_local(DataType::INT8, "%wg_value");
            method.emplace(
                at,
                Instruction::new(
                    OpCode::And,
                    vec![shifted, Value::literal(0xFFu32, DataType::INT32)],
                    Some(extracted.clone()),
                ),
            );
            for arg in rewritten.args_mut() {
                if arg.has_local(*local) {
                    *arg = extracted.clone();
                }
            }
            method.replace(at, rewritten);
        }
    }
    Ok(true)
}

/// `work-group-cache`: caches repeated DMA loads from work-group-uniform
/// addresses in a local.
///
/// Applies only to methods without stores; with the memory provably
/// read-only, every load from the same uniform address yields the same
/// row and all but the first collapse into register moves.
pub(crate) fn cache_work_group_dma_access(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let has_stores = method.blocks().iter().any(|block| {
        block.iter().any(|(_, instr)| instr.op() == OpCode::Store)
    });
    if has_stores {
        return Ok(false);
    }

    // group loads by address value, in first-occurrence order
    let mut order: Vec<Value> = Vec::new();
    let mut groups: FxHashMap<Value, Vec<InstrRef>> = FxHashMap::default();
    for block in method.blocks() {
        for (slot, instr) in block.iter() {
            if instr.op() != OpCode::Load || instr.condition().is_conditional() {
                continue;
            }
            let Some(address) = instr.first_arg() else {
                continue;
            };
            if !is_work_group_uniform(method, address) {
                continue;
            }
            let r = InstrRef {
                block: block.id(),
                slot,
            };
            if !groups.contains_key(address) {
                order.push(address.clone());
            }
            groups.entry(address.clone()).or_default().push(r);
        }
    }

    let doms = dominators(method);
    let mut changed = false;
    for address in order {
        let loads = &groups[&address];
        if loads.len() < 2 {
            continue;
        }
        let first = loads[0];
        let Some(first_instr) = method.instruction_at(first) else {
            continue;
        };
        let Some(cached) = first_instr.output().cloned() else {
            continue;
        };
        let Some(cached_local) = cached.check_local() else {
            continue;
        };
        if method.local(cached_local).single_writer() != Some(first) {
            continue;
        }

        for &later in &loads[1..] {
            // the cached row must be available: same block after the first
            // load, or a dominated block
            let available = if later.block == first.block {
                method
                    .block(first.block)
                    .is_some_and(|b| b.precedes(first.slot, later.slot))
            } else {
                doms.get(&later.block)
                    .is_some_and(|dominators| dominators.contains(&first.block))
            };
            if !available {
                continue;
            }
            let Some(later_instr) = method.instruction_at(later) else {
                continue;
            };
            let Some(output) = later_instr.output().cloned() else {
                continue;
            };
            let replacement = Instruction::mov(output, cached.clone())
                .with_decorations(later_instr.decorations());
            method.replace(Walker::at(later), replacement);
            changed = true;
        }
    }
    Ok(changed)
}

fn is_work_group_uniform(method: &Method, address: &Value) -> bool {
    let Some(local) = address.check_local() else {
        return false;
    };
    let Some(writer) = method.local(local).single_writer() else {
        return false;
    };
    method
        .instruction_at(writer)
        .is_some_and(|instr| instr.has_decoration(Decorations::WORK_GROUP_UNIFORM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::BlockId;
    use crate::ir::types::AddressSpace;

    fn setup() -> (Module, Method, BlockId) {
        let module = Module::new("prog");
        let mut method = Method::new("kernel");
        let block = method.add_block("%entry");
        (module, method, block)
    }

    fn config() -> Configuration {
        Configuration::default()
    }

    fn info_load(method: &mut Method, block: BlockId, name: &str) -> Value {
        let local = method.add_new_local(DataType::INT8, name);
        method.append(
            block,
            Instruction::mov(
                local.clone(),
                Value::register(Register::Uniform, DataType::INT8),
            )
            .with_decorations(Decorations::WORK_GROUP_UNIFORM),
        );
        local
    }

    fn sink(method: &mut Method, block: BlockId, value: &Value) {
        let ptr = method.add_new_local(DataType::void_pointer(), "%sink");
        method.append(
            block,
            Instruction::new(OpCode::Store, vec![value.clone()], Some(ptr)),
        );
    }

    #[test]
    fn test_compress_packs_and_rewrites_readers() {
        let (module, mut method, block) = setup();
        let size_x = info_load(&mut method, block, "%local_size_x");
        let size_y = info_load(&mut method, block, "%local_size_y");
        let out = method.add_new_local(DataType::INT32, "%out");
        let user = method.append(
            block,
            Instruction::new(
                OpCode::Mul24,
                vec![size_x.clone(), size_y.clone()],
                Some(out.clone()),
            ),
        );
        sink(&mut method, block, &out);

        let changed = compress_work_group_locals(&module, &mut method, &config()).unwrap();
        assert!(changed);

        // the reader no longer consumes the original byte locals
        let rewritten = user.get(&method).unwrap();
        assert!(!rewritten.args().contains(&size_x));
        assert!(!rewritten.args().contains(&size_y));

        // a packed local exists and both extraction sequences precede the
        // reader
        let ops: Vec<OpCode> = method
            .block(block)
            .unwrap()
            .iter()
            .map(|(_, instr)| instr.op())
            .collect();
        assert!(ops.contains(&OpCode::Or));
        assert!(ops.contains(&OpCode::Shr));
    }

    #[test]
    fn test_compress_needs_two_candidates() {
        let (module, mut method, block) = setup();
        let size_x = info_load(&mut method, block, "%local_size_x");
        sink(&mut method, block, &size_x);

        let changed = compress_work_group_locals(&module, &mut method, &config()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_cache_collapses_repeated_loads() {
        let (module, mut method, block) = setup();
        // a work-group uniform address
        let address = method.add_new_local(
            DataType::pointer_to(DataType::INT32, AddressSpace::Global),
            "%addr",
        );
        method.append(
            block,
            Instruction::mov(
                address.clone(),
                Value::register(Register::Uniform, DataType::INT32),
            )
            .with_decorations(Decorations::WORK_GROUP_UNIFORM),
        );
        let a = method.add_new_local(DataType::INT32, "%a");
        let b = method.add_new_local(DataType::INT32, "%b");
        method.append(
            block,
            Instruction::new(OpCode::Load, vec![address.clone()], Some(a.clone())),
        );
        let second = method.append(
            block,
            Instruction::new(OpCode::Load, vec![address], Some(b)),
        );

        let changed = cache_work_group_dma_access(&module, &mut method, &config()).unwrap();
        assert!(changed);
        let rewritten = second.get(&method).unwrap();
        assert_eq!(rewritten.op(), OpCode::Move);
        assert_eq!(rewritten.first_arg().unwrap(), &a);
    }

    #[test]
    fn test_cache_skips_methods_with_stores() {
        let (module, mut method, block) = setup();
        let address = method.add_new_local(
            DataType::pointer_to(DataType::INT32, AddressSpace::Global),
            "%addr",
        );
        method.append(
            block,
            Instruction::mov(
                address.clone(),
                Value::register(Register::Uniform, DataType::INT32),
            )
            .with_decorations(Decorations::WORK_GROUP_UNIFORM),
        );
        let a = method.add_new_local(DataType::INT32, "%a");
        let b = method.add_new_local(DataType::INT32, "%b");
        method.append(
            block,
            Instruction::new(OpCode::Load, vec![address.clone()], Some(a.clone())),
        );
        sink(&mut method, block, &a);
        let second = method.append(
            block,
            Instruction::new(OpCode::Load, vec![address], Some(b)),
        );

        let changed = cache_work_group_dma_access(&module, &mut method, &config()).unwrap();
        assert!(!changed);
        assert_eq!(second.get(&method).unwrap().op(), OpCode::Load);
    }

    #[test]
    fn test_cache_ignores_plain_addresses() {
        let (module, mut method, block) = setup();
        let address = method.add_new_local(
            DataType::pointer_to(DataType::INT32, AddressSpace::Global),
            "%addr",
        );
        // no work-group-uniform decoration on the writer
        method.append(
            block,
            Instruction::mov(
                address.clone(),
                Value::register(Register::Uniform, DataType::INT32),
            ),
        );
        let a = method.add_new_local(DataType::INT32, "%a");
        let b = method.add_new_local(DataType::INT32, "%b");
        method.append(
            block,
            Instruction::new(OpCode::Load, vec![address.clone()], Some(a)),
        );
        method.append(block, Instruction::new(OpCode::Load, vec![address], Some(b)));

        let changed = cache_work_group_dma_access(&module, &mut method, &config()).unwrap();
        assert!(!changed);
    }
}
