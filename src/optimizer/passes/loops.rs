//! Loop-related passes: the work-group loop, the loop vectorizer and
//! loop-invariant constant extraction.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::global::GlobalAnalysis;
use crate::config::Configuration;
use crate::error::Result;
use crate::ir::block::{BasicBlock, BlockId, InstrRef};
use crate::ir::instruction::{ConditionCode, Decorations, Instruction, OpCode};
use crate::ir::local::LocalId;
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::types::{DataType, NATIVE_VECTOR_WIDTH};
use crate::ir::value::{Register, Value, ValueKind};
use crate::ir::walker::Walker;

/// A natural loop: its header, the back-edge source and the body blocks.
#[derive(Debug)]
pub(crate) struct NaturalLoop {
    pub header: BlockId,
    pub latch: BlockId,
    pub blocks: FxHashSet<BlockId>,
}

/// Computes the dominator sets of every block with the classic iterative
/// data-flow algorithm.
pub(crate) fn dominators(method: &Method) -> FxHashMap<BlockId, FxHashSet<BlockId>> {
    let mut result: FxHashMap<BlockId, FxHashSet<BlockId>> = FxHashMap::default();
    let Some(entry) = method.entry() else {
        return result;
    };
    let all: FxHashSet<BlockId> = method.blocks().iter().map(BasicBlock::id).collect();
    for block in method.blocks() {
        if block.id() == entry {
            result.insert(entry, std::iter::once(entry).collect());
        } else {
            result.insert(block.id(), all.clone());
        }
    }

    let order: Vec<BlockId> = method.blocks().iter().map(BasicBlock::id).collect();
    let mut stable = false;
    while !stable {
        stable = true;
        for &block in &order {
            if block == entry {
                continue;
            }
            let mut intersection: Option<FxHashSet<BlockId>> = None;
            for pred in method.predecessors(block) {
                let pred_doms = &result[&pred];
                intersection = Some(match intersection {
                    None => pred_doms.clone(),
                    Some(acc) => acc.intersection(pred_doms).copied().collect(),
                });
            }
            let mut updated = intersection.unwrap_or_default();
            updated.insert(block);
            if updated != result[&block] {
                result.insert(block, updated);
                stable = false;
            }
        }
    }
    result
}

/// Finds all natural loops via back edges (edges into a dominator).
pub(crate) fn find_natural_loops(method: &Method) -> Vec<NaturalLoop> {
    let doms = dominators(method);
    let mut loops = Vec::new();
    for block in method.blocks() {
        let latch = block.id();
        for header in method.successors(latch) {
            if !doms
                .get(&latch)
                .is_some_and(|dominators| dominators.contains(&header))
            {
                continue;
            }
            // body: header plus everything reaching the latch without
            // passing through the header
            let mut blocks: FxHashSet<BlockId> = std::iter::once(header).collect();
            let mut stack = vec![latch];
            while let Some(current) = stack.pop() {
                if blocks.insert(current) {
                    stack.extend(method.predecessors(current));
                }
            }
            loops.push(NaturalLoop {
                header,
                latch,
                blocks,
            });
        }
    }
    loops
}

/// `loop-work-groups`: wraps the kernel body in a loop over the
/// work-group repetition count, so one kernel launch executes all
/// work-groups instead of being re-launched per group.
///
/// Applied only to single-exit kernels whose exit block ends the layout;
/// anything else keeps the per-group launch.
pub(crate) fn add_work_group_loop(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let Some(old_entry) = method.entry() else {
        return Ok(false);
    };
    let exits: Vec<BlockId> = method
        .blocks()
        .iter()
        .map(BasicBlock::id)
        .filter(|&block| method.successors(block).is_empty())
        .collect();
    let last = method.blocks().last().map(BasicBlock::id);
    if exits.len() != 1 || last != Some(exits[0]) {
        log::debug!(
            "Not adding work-group loop to {}: unsupported exit structure",
            method.name()
        );
        return Ok(false);
    }

    // prologue: read the repetition count, zero the counter
    let prologue = method.insert_block_at(0, "%work_group_loop");
    let count = method.add_new_local(DataType::INT32, "%group_count");
    let counter = method.add_new_local(DataType::INT32, "%group_counter");
    method.append(
        prologue,
        Instruction::mov(
            count.clone(),
            Value::register(Register::Uniform, DataType::INT32),
        )
        .with_decorations(Decorations::WORK_GROUP_UNIFORM),
    );
    method.append(prologue, Instruction::mov(counter.clone(), Value::zero()));

    // epilogue: increment, compare, branch back while below the count
    let epilogue = method.add_block("%work_group_repeat");
    method.append(
        epilogue,
        Instruction::new(
            OpCode::Add,
            vec![counter.clone(), Value::int(1)],
            Some(counter.clone()),
        ),
    );
    method.append(
        epilogue,
        Instruction::new(OpCode::Sub, vec![counter, count], None).with_set_flags(),
    );
    method.append(
        epilogue,
        Instruction::branch(old_entry, ConditionCode::NegativeSet),
    );
    Ok(true)
}

/// `vectorize-loops`: widens a counted single-block self-loop to the
/// native vector width.
///
/// The supported shape is deliberately narrow: a unit-step induction
/// local, a flag-setting comparison against a literal bound divisible by
/// the vector width, a conditional back edge and an otherwise purely
/// scalar ALU body. The induction step is scaled to the vector width and
/// every loop-defined local becomes a 16-lane vector.
pub(crate) fn vectorize_loops(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    let loops = find_natural_loops(method);
    for candidate in loops {
        if candidate.header != candidate.latch || candidate.blocks.len() != 1 {
            continue;
        }
        if vectorize_single_block_loop(method, candidate.header)? {
            changed = true;
        }
    }
    Ok(changed)
}

fn vectorize_single_block_loop(method: &mut Method, block: BlockId) -> Result<bool> {
    let Some(block_ref) = method.block(block) else {
        return Ok(false);
    };
    let instrs: Vec<(u32, Instruction)> = block_ref
        .iter()
        .map(|(slot, instr)| (slot, instr.clone()))
        .collect();
    if instrs.len() < 3 {
        return Ok(false);
    }

    // the back edge must be the block terminator
    let (_, terminator) = &instrs[instrs.len() - 1];
    if terminator.op() != OpCode::Branch
        || !terminator.condition().is_conditional()
        || terminator.branch_target() != Some(block)
    {
        return Ok(false);
    }

    // find the unit-step induction increment and the bound comparison
    let mut induction: Option<(u32, LocalId)> = None;
    let mut comparison: Option<(u32, i64)> = None;
    for (slot, instr) in &instrs[..instrs.len() - 1] {
        if instr.op() == OpCode::Add
            && !instr.sets_flags()
            && instr.condition() == ConditionCode::Always
        {
            if let (Some(out), Some(first), Some(step)) = (
                instr.output_local(),
                instr.first_arg(),
                instr.second_arg().and_then(Value::literal_value),
            ) {
                if first.has_local(out) && step.signed() == 1 && induction.is_none() {
                    induction = Some((*slot, out));
                    continue;
                }
            }
        }
        if instr.op() == OpCode::Sub && instr.sets_flags() {
            if let Some(bound) = instr.second_arg().and_then(Value::literal_value) {
                comparison = Some((*slot, i64::from(bound.signed())));
            }
        }
    }
    let (Some((induction_slot, induction_local)), Some((comparison_slot, bound))) =
        (induction, comparison)
    else {
        return Ok(false);
    };
    let width = i64::from(NATIVE_VECTOR_WIDTH);
    if bound <= 0 || bound % width != 0 {
        return Ok(false);
    }
    // the counter must not escape the loop
    if method
        .local(induction_local)
        .readers()
        .iter()
        .any(|reader| reader.block != block)
    {
        return Ok(false);
    }

    // the rest of the body must be plain unconditional scalar ALU code
    let mut widened: FxHashSet<LocalId> = std::iter::once(induction_local).collect();
    for (slot, instr) in &instrs[..instrs.len() - 1] {
        if *slot == induction_slot || *slot == comparison_slot {
            continue;
        }
        if !instr.op().is_alu()
            || instr.condition() != ConditionCode::Always
            || instr.sets_flags()
        {
            return Ok(false);
        }
        let Some(output) = instr.output_local() else {
            return Ok(false);
        };
        if method.local(output).ty().is_vector() {
            return Ok(false);
        }
        widened.insert(output);
    }

    // widen the loop-defined locals and scale the induction step
    for local in &widened {
        let ty = method.local(*local).ty().to_vector(NATIVE_VECTOR_WIDTH);
        method.local_mut(*local).set_ty(ty);
    }
    for (slot, instr) in &instrs {
        let walker = Walker::at(InstrRef {
            block,
            slot: *slot,
        });
        let mut rewritten = instr.clone();
        if let Some(output) = rewritten.output() {
            if let Some(local) = output.check_local() {
                if widened.contains(&local) {
                    let ty = method.local(local).ty().clone();
                    rewritten.set_output(Some(Value::local(local, ty)));
                }
            }
        }
        for arg in rewritten.args_mut() {
            if let Some(local) = arg.check_local() {
                if widened.contains(&local) {
                    arg.ty = method.local(local).ty().clone();
                }
            }
        }
        if *slot == induction_slot {
            if let Some(step) = rewritten.args_mut().get_mut(1) {
                *step = Value::int(i32::from(NATIVE_VECTOR_WIDTH));
            }
        }
        rewritten.add_decorations(Decorations::AUTO_VECTORIZED);
        method.replace(walker, rewritten);
    }
    Ok(true)
}

/// `extract-loads-from-loops`: hoists loop-invariant constant loads into
/// the unique predecessor outside the loop.
///
/// Runs in the final phase, so it never creates a preheader; loops whose
/// header has no unique outside predecessor are left alone.
pub(crate) fn remove_constant_load_in_loops(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    // per-block sets of read and written locals
    let mut usage = GlobalAnalysis::new(|block: &BasicBlock| {
        let mut reads: FxHashSet<LocalId> = FxHashSet::default();
        let mut writes: FxHashSet<LocalId> = FxHashSet::default();
        for (_, instr) in block.iter() {
            reads.extend(instr.read_locals());
            writes.extend(instr.output_local());
        }
        (reads, writes)
    });
    usage.analyze(method);

    let mut changed = false;
    for candidate in find_natural_loops(method) {
        let outside: Vec<BlockId> = method
            .predecessors(candidate.header)
            .into_iter()
            .filter(|pred| !candidate.blocks.contains(pred))
            .collect();
        let [preheader] = outside.as_slice() else {
            continue;
        };
        let preheader = *preheader;

        // layout order keeps the hoisted loads deterministic
        let mut loop_blocks: Vec<BlockId> = candidate.blocks.iter().copied().collect();
        loop_blocks.sort_by_key(|&block| method.block_position(block));

        let mut hoisted: Vec<(InstrRef, Instruction)> = Vec::new();
        for block in loop_blocks {
            let refs: Vec<(InstrRef, Instruction)> = method
                .block(block)
                .map(|b| {
                    b.iter()
                        .map(|(slot, instr)| (InstrRef { block, slot }, instr.clone()))
                        .collect()
                })
                .unwrap_or_default();
            for (r, instr) in refs {
                let is_constant_load = instr.is_simple_move()
                    && !instr.sets_flags()
                    && instr.first_arg().is_some_and(|arg| {
                        matches!(arg.kind, ValueKind::Literal(_) | ValueKind::Vector(_))
                    });
                if !is_constant_load {
                    continue;
                }
                let Some(written) = instr.output_local() else {
                    continue;
                };
                // the constant must be the only definition in the loop
                let written_elsewhere = candidate.blocks.iter().any(|&other| {
                    if other == block {
                        return false;
                    }
                    usage
                        .final_result(other)
                        .is_ok_and(|writes| writes.contains(&written))
                });
                if written_elsewhere
                    || method.local(written).single_writer() != Some(r)
                {
                    continue;
                }
                hoisted.push((r, instr));
            }
        }

        for (r, instr) in hoisted {
            method.erase(Walker::at(r));
            method.insert_before_terminator(preheader, instr);
            changed = true;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Module, Method) {
        (Module::new("prog"), Method::new("kernel"))
    }

    fn config() -> Configuration {
        Configuration::default()
    }

    /// entry -> loop (self-loop) -> exit
    fn build_self_loop(method: &mut Method) -> (BlockId, BlockId, BlockId) {
        let entry = method.add_block("%entry");
        let body = method.add_block("%loop");
        let exit = method.add_block("%exit");
        method.append(entry, Instruction::new(OpCode::Nop, vec![], None));
        method.append(exit, Instruction::new(OpCode::Nop, vec![], None));
        (entry, body, exit)
    }

    #[test]
    fn test_dominators_linear_chain() {
        let (_, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        let c = method.add_block("%c");
        method.append(a, Instruction::new(OpCode::Nop, vec![], None));
        method.append(b, Instruction::new(OpCode::Nop, vec![], None));
        method.append(c, Instruction::new(OpCode::Nop, vec![], None));

        let doms = dominators(&method);
        assert!(doms[&c].contains(&a));
        assert!(doms[&c].contains(&b));
        assert!(doms[&c].contains(&c));
        assert!(!doms[&a].contains(&b));
    }

    #[test]
    fn test_find_self_loop() {
        let (_, mut method) = setup();
        let (_, body, _) = build_self_loop(&mut method);
        let i = method.add_new_local(DataType::INT32, "%i");
        method.append(
            body,
            Instruction::new(OpCode::Add, vec![i.clone(), Value::int(1)], Some(i.clone())),
        );
        method.append(
            body,
            Instruction::new(OpCode::Sub, vec![i, Value::int(64)], None).with_set_flags(),
        );
        method.append(body, Instruction::branch(body, ConditionCode::NegativeSet));

        let loops = find_natural_loops(&method);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, body);
        assert_eq!(loops[0].latch, body);
        assert_eq!(loops[0].blocks.len(), 1);
    }

    #[test]
    fn test_work_group_loop_wraps_method() {
        let (module, mut method) = setup();
        let body = method.add_block("%body");
        method.append(body, Instruction::new(OpCode::Nop, vec![], None));

        let changed = add_work_group_loop(&module, &mut method, &config()).unwrap();
        assert!(changed);

        // prologue + body + epilogue
        assert_eq!(method.blocks().len(), 3);
        let prologue = method.entry().unwrap();
        assert_ne!(prologue, body);
        // the epilogue branches back to the old entry
        let epilogue = method.blocks().last().unwrap().id();
        assert!(method.successors(epilogue).contains(&body));
        // the loop shows up as a natural loop over the whole body
        let loops = find_natural_loops(&method);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, body);
    }

    #[test]
    fn test_work_group_loop_needs_single_trailing_exit() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        // two exits: a branches nowhere (falls to b), b exits; a also exits
        // via an early conditional branch to b - craft two exit blocks
        method.append(a, Instruction::branch(b, ConditionCode::ZeroSet));
        method.append(a, Instruction::new(OpCode::Nop, vec![], None));
        method.append(b, Instruction::new(OpCode::Nop, vec![], None));
        // make `a` a real exit by placing it last
        method.set_block_order(&[b, a]);

        let changed = add_work_group_loop(&module, &mut method, &config()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_vectorize_counted_loop() {
        let (module, mut method) = setup();
        let (_, body, _) = build_self_loop(&mut method);
        let i = method.add_new_local(DataType::INT32, "%i");
        let acc = method.add_new_local(DataType::INT32, "%acc");
        let step = method.append(
            body,
            Instruction::new(OpCode::Add, vec![i.clone(), Value::int(1)], Some(i.clone())),
        );
        method.append(
            body,
            Instruction::new(
                OpCode::Add,
                vec![acc.clone(), i.clone()],
                Some(acc.clone()),
            ),
        );
        method.append(
            body,
            Instruction::new(OpCode::Sub, vec![i.clone(), Value::int(64)], None)
                .with_set_flags(),
        );
        method.append(body, Instruction::branch(body, ConditionCode::NegativeSet));

        let changed = vectorize_loops(&module, &mut method, &config()).unwrap();
        assert!(changed);

        // the induction step is scaled to the vector width
        let stepped = step.get(&method).unwrap();
        assert_eq!(
            stepped.second_arg().unwrap().literal_value().unwrap().signed(),
            16
        );
        assert!(stepped.has_decoration(Decorations::AUTO_VECTORIZED));
        // the loop locals are now 16-wide vectors
        let i_id = i.check_local().unwrap();
        assert_eq!(
            method.local(i_id).ty(),
            &DataType::Vector { bits: 32, width: 16 }
        );
    }

    #[test]
    fn test_vectorize_rejects_unaligned_bound() {
        let (module, mut method) = setup();
        let (_, body, _) = build_self_loop(&mut method);
        let i = method.add_new_local(DataType::INT32, "%i");
        method.append(
            body,
            Instruction::new(OpCode::Add, vec![i.clone(), Value::int(1)], Some(i.clone())),
        );
        method.append(
            body,
            Instruction::new(OpCode::Sub, vec![i, Value::int(63)], None).with_set_flags(),
        );
        method.append(body, Instruction::branch(body, ConditionCode::NegativeSet));

        let changed = vectorize_loops(&module, &mut method, &config()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_vectorize_rejects_escaping_counter() {
        let (module, mut method) = setup();
        let (_, body, exit) = build_self_loop(&mut method);
        let i = method.add_new_local(DataType::INT32, "%i");
        method.append(
            body,
            Instruction::new(OpCode::Add, vec![i.clone(), Value::int(1)], Some(i.clone())),
        );
        method.append(
            body,
            Instruction::new(OpCode::Sub, vec![i.clone(), Value::int(64)], None)
                .with_set_flags(),
        );
        method.append(body, Instruction::branch(body, ConditionCode::NegativeSet));
        // the counter is observed after the loop
        let out = method.add_new_local(DataType::INT32, "%out");
        method.append(exit, Instruction::mov(out, i));

        let changed = vectorize_loops(&module, &mut method, &config()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_constant_load_hoisted_to_preheader() {
        let (module, mut method) = setup();
        let (entry, body, _) = build_self_loop(&mut method);
        let i = method.add_new_local(DataType::INT32, "%i");
        let c = method.add_new_local(DataType::INT32, "%c");
        let load = method.append(body, Instruction::mov(c.clone(), Value::int(7)));
        method.append(
            body,
            Instruction::new(OpCode::Add, vec![i.clone(), c], Some(i.clone())),
        );
        method.append(
            body,
            Instruction::new(OpCode::Sub, vec![i, Value::int(64)], None).with_set_flags(),
        );
        method.append(body, Instruction::branch(body, ConditionCode::NegativeSet));

        let changed = remove_constant_load_in_loops(&module, &mut method, &config()).unwrap();
        assert!(changed);
        // the load left the loop into the entry block
        assert!(load.get(&method).is_none());
        let entry_ops: Vec<OpCode> = method
            .block(entry)
            .unwrap()
            .iter()
            .map(|(_, instr)| instr.op())
            .collect();
        assert!(entry_ops.contains(&OpCode::Move));
    }
}
