//! Control-flow shaping passes of the initial phase.
//!
//! These are the only passes allowed to add, remove or resplit blocks;
//! after the initial phase the CFG of a method is frozen.

use rustc_hash::FxHashSet;

use crate::config::Configuration;
use crate::error::Result;
use crate::ir::block::BlockId;
use crate::ir::instruction::{ConditionCode, Instruction, OpCode};
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::walker::Walker;

/// `reorder-blocks`: lays blocks out so that unconditional branch targets
/// follow their source wherever possible, turning branches into
/// fall-through candidates.
///
/// A block whose fall-through successor cannot stay adjacent gets an
/// explicit branch appended instead.
pub(crate) fn reorder_basic_blocks(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let original: Vec<BlockId> = method.blocks().iter().map(|block| block.id()).collect();
    if original.len() < 2 {
        return Ok(false);
    }

    let mut placed: FxHashSet<BlockId> = FxHashSet::default();
    let mut order: Vec<BlockId> = Vec::with_capacity(original.len());
    let mut forced_branches: Vec<(BlockId, BlockId)> = Vec::new();

    for &start in &original {
        if placed.contains(&start) {
            continue;
        }
        let mut current = start;
        loop {
            placed.insert(current);
            order.push(current);

            if let Some(target) = unconditional_target(method, current) {
                if !placed.contains(&target) {
                    current = target;
                    continue;
                }
                break;
            }
            // a block without a terminating unconditional branch must keep
            // its fall-through successor adjacent, or get an explicit branch
            match original_fallthrough(method, &original, current) {
                Some(next) if !placed.contains(&next) => {
                    current = next;
                }
                Some(next) => {
                    forced_branches.push((current, next));
                    break;
                }
                None => break,
            }
        }
    }

    let changed = order != original || !forced_branches.is_empty();
    for (block, target) in forced_branches {
        method.append(block, Instruction::branch(target, ConditionCode::Always));
    }
    if order != original {
        method.set_block_order(&order);
    }
    Ok(changed)
}

fn unconditional_target(method: &Method, block: BlockId) -> Option<BlockId> {
    let last = method.block(block)?.last_instruction()?;
    (last.op() == OpCode::Branch && last.condition() == ConditionCode::Always)
        .then(|| last.branch_target())
        .flatten()
}

fn original_fallthrough(
    method: &Method,
    original: &[BlockId],
    block: BlockId,
) -> Option<BlockId> {
    // only blocks that actually continue sequentially have a fall-through
    if method.successors(block).is_empty() {
        return None;
    }
    let position = original.iter().position(|&id| id == block)?;
    original.get(position + 1).copied()
}

/// `simplify-branches`: removes branches to the immediately following
/// block, drops conditional branches shadowed by an unconditional branch
/// to the same label, threads branches through empty forwarding blocks
/// and eliminates blocks that become unreachable.
pub(crate) fn simplify_branches(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    loop {
        let mut round_changed = false;

        round_changed |= remove_branches_to_next(method);
        round_changed |= remove_shadowed_conditional_branches(method);
        round_changed |= thread_empty_blocks(method);
        round_changed |= remove_unreachable_blocks(method);

        changed |= round_changed;
        if !round_changed {
            break;
        }
    }
    Ok(changed)
}

fn remove_branches_to_next(method: &mut Method) -> bool {
    let mut changed = false;
    let blocks: Vec<BlockId> = method.blocks().iter().map(|block| block.id()).collect();
    for block in blocks {
        let Some(next) = method.next_block_in_order(block) else {
            continue;
        };
        let is_redundant = method
            .block(block)
            .and_then(|b| b.last_instruction())
            .is_some_and(|last| {
                last.op() == OpCode::Branch
                    && last.condition() == ConditionCode::Always
                    && last.branch_target() == Some(next)
            });
        if is_redundant {
            let tail = method.end_of(block).previous_in_block(method);
            method.erase(tail);
            changed = true;
        }
    }
    changed
}

fn remove_shadowed_conditional_branches(method: &mut Method) -> bool {
    let mut changed = false;
    let blocks: Vec<BlockId> = method.blocks().iter().map(|block| block.id()).collect();
    for block in blocks {
        // a conditional branch directly followed by an unconditional branch
        // to the same label never changes the target
        let tail = method.end_of(block).previous_in_block(method);
        let before_tail = tail.previous_in_block(method);
        if before_tail == tail {
            continue;
        }
        let shadowed = match (before_tail.get(method), tail.get(method)) {
            (Some(conditional), Some(unconditional)) => {
                conditional.op() == OpCode::Branch
                    && unconditional.op() == OpCode::Branch
                    && unconditional.condition() == ConditionCode::Always
                    && conditional.branch_target() == unconditional.branch_target()
            }
            _ => false,
        };
        if shadowed {
            method.erase(before_tail);
            changed = true;
        }
    }
    changed
}

fn thread_empty_blocks(method: &mut Method) -> bool {
    let blocks: Vec<BlockId> = method.blocks().iter().map(|block| block.id()).collect();
    let Some(entry) = method.entry() else {
        return false;
    };
    for block in blocks {
        if block == entry {
            continue;
        }
        let Some(block_ref) = method.block(block) else {
            continue;
        };
        // a pure forwarder: empty (falls through) or a single unconditional
        // branch
        let target = match block_ref.len() {
            0 => method.next_block_in_order(block),
            1 => block_ref.last_instruction().and_then(|instr| {
                (instr.op() == OpCode::Branch && instr.condition() == ConditionCode::Always)
                    .then(|| instr.branch_target())
                    .flatten()
            }),
            _ => None,
        };
        let Some(target) = target else {
            continue;
        };
        if target == block {
            continue;
        }
        // fall-through predecessors can only be redirected when the
        // forwarder itself falls through (removing it splices the layout)
        let has_fallthrough_pred = method
            .previous_block_in_order(block)
            .is_some_and(|prev| method.successors(prev).contains(&block))
            && method
                .previous_block_in_order(block)
                .and_then(|prev| method.block(prev))
                .and_then(|b| b.last_instruction())
                .map_or(true, |last| {
                    !(last.op() == OpCode::Branch
                        && last.condition() == ConditionCode::Always)
                });
        if has_fallthrough_pred && !block_ref.is_empty() {
            continue;
        }
        if has_fallthrough_pred && method.next_block_in_order(block) != Some(target) {
            continue;
        }

        retarget_branches(method, block, target);
        method.remove_block(block);
        return true;
    }
    false
}

fn retarget_branches(method: &mut Method, from: BlockId, to: BlockId) {
    let rewrites: Vec<(Walker, Instruction)> = method
        .blocks()
        .iter()
        .flat_map(|block| {
            let block_id = block.id();
            block
                .iter()
                .filter(|(_, instr)| {
                    instr.op() == OpCode::Branch && instr.branch_target() == Some(from)
                })
                .map(move |(slot, instr)| {
                    let mut retargeted = instr.clone();
                    retargeted.set_branch_target(to);
                    (
                        Walker::at(crate::ir::InstrRef {
                            block: block_id,
                            slot,
                        }),
                        retargeted,
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect();
    for (walker, instr) in rewrites {
        method.replace(walker, instr);
    }
}

fn remove_unreachable_blocks(method: &mut Method) -> bool {
    let Some(entry) = method.entry() else {
        return false;
    };
    let mut reachable: FxHashSet<BlockId> = FxHashSet::default();
    let mut queue = vec![entry];
    while let Some(block) = queue.pop() {
        if !reachable.insert(block) {
            continue;
        }
        queue.extend(method.successors(block));
    }
    let unreachable: Vec<BlockId> = method
        .blocks()
        .iter()
        .map(|block| block.id())
        .filter(|id| !reachable.contains(id))
        .collect();
    let changed = !unreachable.is_empty();
    for block in unreachable {
        method.remove_block(block);
    }
    changed
}

/// `merge-blocks`: merges a block into its unique predecessor when the
/// predecessor has no other successor and no conditional exit.
pub(crate) fn merge_adjacent_basic_blocks(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    'outer: loop {
        let Some(entry) = method.entry() else {
            break;
        };
        let blocks: Vec<BlockId> = method.blocks().iter().map(|block| block.id()).collect();
        for block in blocks {
            let successors = method.successors(block);
            let [successor] = successors.as_slice() else {
                continue;
            };
            let successor = *successor;
            if successor == entry || successor == block {
                continue;
            }
            if method.predecessors(successor) != vec![block] {
                continue;
            }
            // a conditional terminator reaching a single successor would
            // still predicate the merged instructions, skip that corner
            let conditional_exit = method
                .block(block)
                .and_then(|b| b.last_instruction())
                .is_some_and(|last| {
                    last.op() == OpCode::Branch && last.condition() != ConditionCode::Always
                });
            if conditional_exit {
                continue;
            }

            merge_into(method, block, successor);
            changed = true;
            continue 'outer;
        }
        break;
    }
    Ok(changed)
}

fn merge_into(method: &mut Method, block: BlockId, successor: BlockId) {
    // drop the explicit branch into the successor, if any
    let tail = method.end_of(block).previous_in_block(method);
    let branches_into = tail.get(method).is_some_and(|last| {
        last.op() == OpCode::Branch && last.branch_target() == Some(successor)
    });
    if branches_into {
        method.erase(tail);
    }

    // the successor's fall-through must survive the move
    let successor_falls_to = successor_fallthrough(method, successor);

    let moved: Vec<Instruction> = method
        .block(successor)
        .map(|b| b.iter().map(|(_, instr)| instr.clone()).collect())
        .unwrap_or_default();
    method.remove_block(successor);
    for instr in moved {
        method.append(block, instr);
    }
    if let Some(target) = successor_falls_to {
        if method.next_block_in_order(block) != Some(target) {
            method.append(block, Instruction::branch(target, ConditionCode::Always));
        }
    }
}

fn successor_fallthrough(method: &Method, block: BlockId) -> Option<BlockId> {
    let next = method.next_block_in_order(block)?;
    let ends_unconditionally = method
        .block(block)
        .and_then(|b| b.last_instruction())
        .is_some_and(|last| {
            last.op() == OpCode::Branch && last.condition() == ConditionCode::Always
        });
    (!ends_unconditionally).then_some(next)
}

/// `simplify-conditionals`: converts an if-else diamond of two simple
/// single-predecessor blocks into conditional execution in the head
/// block, removing both arms and the branches between them.
pub(crate) fn simplify_conditional_blocks(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> Result<bool> {
    let mut changed = false;
    'outer: loop {
        let blocks: Vec<BlockId> = method.blocks().iter().map(|block| block.id()).collect();
        for block in blocks {
            if let Some(diamond) = match_diamond(method, block) {
                predicate_diamond(method, block, &diamond);
                changed = true;
                continue 'outer;
            }
        }
        break;
    }
    Ok(changed)
}

struct Diamond {
    condition: ConditionCode,
    taken: BlockId,
    fallthrough: BlockId,
    join: BlockId,
    erase_tail_count: usize,
}

fn match_diamond(method: &Method, head: BlockId) -> Option<Diamond> {
    let block = method.block(head)?;
    let tail = block.last_instruction()?;

    // head ends [br.cond T] with fall-through F, or [br.cond T, br F]
    let (condition, taken, fallthrough, erase_tail_count) = if tail.op() == OpCode::Branch
        && tail.condition() != ConditionCode::Always
    {
        let taken = tail.branch_target()?;
        let fallthrough = method.next_block_in_order(head)?;
        (tail.condition(), taken, fallthrough, 1)
    } else if tail.op() == OpCode::Branch && tail.condition() == ConditionCode::Always {
        let before = method
            .end_of(head)
            .previous_in_block(method)
            .previous_in_block(method);
        let conditional = before.get(method)?;
        if conditional.op() != OpCode::Branch || conditional.condition() == ConditionCode::Always {
            return None;
        }
        (
            conditional.condition(),
            conditional.branch_target()?,
            tail.branch_target()?,
            2,
        )
    } else {
        return None;
    };

    if taken == fallthrough || taken == head || fallthrough == head {
        return None;
    }
    let entry = method.entry()?;
    if taken == entry || fallthrough == entry {
        return None;
    }

    let join_of = |arm: BlockId| -> Option<BlockId> {
        if method.predecessors(arm) != vec![head] {
            return None;
        }
        let arm_block = method.block(arm)?;
        let last = arm_block.last_instruction()?;
        if last.op() != OpCode::Branch || last.condition() != ConditionCode::Always {
            return None;
        }
        // everything before the terminator must be simple predicable ALU
        for (_, instr) in arm_block.iter() {
            if instr.op() == OpCode::Branch {
                continue;
            }
            if !instr.op().is_alu()
                || instr.condition() != ConditionCode::Always
                || instr.sets_flags()
                || instr.output_local().is_none()
            {
                return None;
            }
        }
        let target = last.branch_target()?;
        // the terminator must be the arm's only way out
        (method.successors(arm) == vec![target]).then_some(target)
    };

    let join = join_of(taken)?;
    if join_of(fallthrough)? != join {
        return None;
    }
    if join == taken || join == fallthrough {
        return None;
    }

    Some(Diamond {
        condition,
        taken,
        fallthrough,
        join,
        erase_tail_count,
    })
}

fn predicate_diamond(method: &mut Method, head: BlockId, diamond: &Diamond) {
    // drop the head's terminator branch group
    for _ in 0..diamond.erase_tail_count {
        let tail = method.end_of(head).previous_in_block(method);
        method.erase(tail);
    }

    let body_of = |method: &Method, arm: BlockId| -> Vec<Instruction> {
        method
            .block(arm)
            .map(|block| {
                block
                    .iter()
                    .filter(|(_, instr)| instr.op() != OpCode::Branch)
                    .map(|(_, instr)| instr.clone())
                    .collect()
            })
            .unwrap_or_default()
    };

    let taken_body = body_of(method, diamond.taken);
    let fallthrough_body = body_of(method, diamond.fallthrough);
    for instr in taken_body {
        method.append(head, instr.with_condition(diamond.condition));
    }
    for instr in fallthrough_body {
        method.append(head, instr.with_condition(diamond.condition.invert()));
    }
    method.append(
        head,
        Instruction::branch(diamond.join, ConditionCode::Always),
    );

    method.remove_block(diamond.taken);
    method.remove_block(diamond.fallthrough);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::DataType;
    use crate::ir::value::Value;

    fn setup() -> (Module, Method) {
        (Module::new("prog"), Method::new("kernel"))
    }

    fn config() -> Configuration {
        Configuration::default()
    }

    #[test]
    fn test_reorder_places_branch_target_next() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        let c = method.add_block("%c");
        // a branches to c; b is unreachable filler ending the method
        method.append(a, Instruction::branch(c, ConditionCode::Always));
        method.append(b, Instruction::branch(c, ConditionCode::Always));
        method.append(c, Instruction::new(OpCode::Nop, vec![], None));

        let changed = reorder_basic_blocks(&module, &mut method, &config()).unwrap();
        assert!(changed);
        let order: Vec<BlockId> = method.blocks().iter().map(|blk| blk.id()).collect();
        assert_eq!(order, vec![a, c, b]);
    }

    #[test]
    fn test_reorder_preserves_fallthrough_with_explicit_branch() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        let c = method.add_block("%c");
        // a falls through to b; c unreachable from a/b chain start ordering
        method.append(a, Instruction::new(OpCode::Nop, vec![], None));
        method.append(b, Instruction::new(OpCode::Nop, vec![], None));
        method.append(c, Instruction::new(OpCode::Nop, vec![], None));

        let changed = reorder_basic_blocks(&module, &mut method, &config()).unwrap();
        // the natural chain a -> b -> c is already laid out
        assert!(!changed);
    }

    #[test]
    fn test_simplify_removes_branch_to_next() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        method.append(a, Instruction::branch(b, ConditionCode::Always));
        method.append(b, Instruction::new(OpCode::Nop, vec![], None));

        let changed = simplify_branches(&module, &mut method, &config()).unwrap();
        assert!(changed);
        assert!(method.block(a).unwrap().is_empty());
        // control flow is preserved through fall-through
        assert_eq!(method.successors(a), vec![b]);
    }

    #[test]
    fn test_simplify_removes_shadowed_conditional() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        let c = method.add_block("%c");
        let _ = b;
        method.append(a, Instruction::branch(c, ConditionCode::ZeroSet));
        method.append(a, Instruction::branch(c, ConditionCode::Always));
        method.append(c, Instruction::new(OpCode::Nop, vec![], None));

        let changed = simplify_branches(&module, &mut method, &config()).unwrap();
        assert!(changed);
        // only one branch survives; b became unreachable and is removed
        assert_eq!(method.successors(a), vec![c]);
        assert!(method.block(b).is_none());
    }

    #[test]
    fn test_simplify_threads_forwarding_block() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let forwarder = method.add_block("%fwd");
        let target = method.add_block("%target");
        method.append(a, Instruction::branch(forwarder, ConditionCode::Always));
        method.append(forwarder, Instruction::branch(target, ConditionCode::Always));
        method.append(target, Instruction::new(OpCode::Nop, vec![], None));

        let changed = simplify_branches(&module, &mut method, &config()).unwrap();
        assert!(changed);
        assert!(method.block(forwarder).is_none());
        assert_eq!(method.successors(a), vec![target]);
    }

    #[test]
    fn test_merge_single_chain() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        let x = method.add_new_local(DataType::INT32, "%x");
        method.append(a, Instruction::mov(x.clone(), Value::int(1)));
        method.append(b, Instruction::new(OpCode::Add, vec![x.clone(), Value::int(2)], Some(x)));

        let changed = merge_adjacent_basic_blocks(&module, &mut method, &config()).unwrap();
        assert!(changed);
        assert_eq!(method.blocks().len(), 1);
        assert_eq!(method.block(a).unwrap().len(), 2);
        assert!(method.block(b).is_none());
    }

    #[test]
    fn test_merge_keeps_shared_successor() {
        let (module, mut method) = setup();
        let a = method.add_block("%a");
        let b = method.add_block("%b");
        let c = method.add_block("%c");
        // both a and c branch into b - no merge possible
        method.append(a, Instruction::branch(b, ConditionCode::Always));
        method.append(b, Instruction::new(OpCode::Nop, vec![], None));
        method.append(c, Instruction::branch(b, ConditionCode::Always));

        let changed = merge_adjacent_basic_blocks(&module, &mut method, &config()).unwrap();
        assert!(!changed);
        assert_eq!(method.blocks().len(), 3);
    }

    #[test]
    fn test_conditional_diamond_is_predicated() {
        let (module, mut method) = setup();
        let head = method.add_block("%head");
        let then_arm = method.add_block("%then");
        let else_arm = method.add_block("%else");
        let join = method.add_block("%join");

        let x = method.add_new_local(DataType::INT32, "%x");
        let out = method.add_new_local(DataType::INT32, "%out");

        // head: flags from x, branch to then-arm if zero, else fall through
        method.append(
            head,
            Instruction::new(OpCode::Move, vec![x], None).with_set_flags(),
        );
        method.append(head, Instruction::branch(then_arm, ConditionCode::ZeroSet));
        // the fall-through arm is the next block in layout
        method.set_block_order(&[head, else_arm, then_arm, join]);

        method.append(
            then_arm,
            Instruction::mov(out.clone(), Value::int(1)),
        );
        method.append(then_arm, Instruction::branch(join, ConditionCode::Always));
        method.append(else_arm, Instruction::mov(out.clone(), Value::int(2)));
        method.append(else_arm, Instruction::branch(join, ConditionCode::Always));
        method.append(join, Instruction::new(OpCode::Nop, vec![], None));

        let edges_before_join: Vec<BlockId> = method.predecessors(join);
        assert_eq!(edges_before_join.len(), 2);

        let changed = simplify_conditional_blocks(&module, &mut method, &config()).unwrap();
        assert!(changed);

        // both arms are gone, the head predicates their bodies
        assert!(method.block(then_arm).is_none());
        assert!(method.block(else_arm).is_none());
        let head_block = method.block(head).unwrap();
        let conditions: Vec<ConditionCode> = head_block
            .iter()
            .filter(|(_, instr)| instr.op() == OpCode::Move && instr.output().is_some())
            .map(|(_, instr)| instr.condition())
            .collect();
        assert_eq!(
            conditions,
            vec![ConditionCode::ZeroSet, ConditionCode::ZeroClear]
        );
        assert_eq!(method.successors(head), vec![join]);
    }
}
