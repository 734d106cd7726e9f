//! The single-steps pass: composed per-instruction rewrites.
//!
//! Running every local rewrite in one walk over the method saves repeated
//! traversals. Each step inspects the instruction under the cursor and
//! may leave it unchanged, replace it in place, erase it, or insert new
//! instructions before it.
//!
//! The driver keeps a `prev` cursor one position before the current one.
//! After a step runs, if the cursor moved relative to `prev` or the step
//! returned a different cursor, the driver resets to `prev` and replays
//! the step list, so insertions, replacements and erasures are re-examined
//! by all steps before the walk advances.

use log::{debug, log_enabled, Level};

use crate::config::Configuration;
use crate::error::Result;
use crate::ir::instruction::{Instruction, OpCode};
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::value::{Value, ValueKind};
use crate::ir::walker::Walker;
use crate::optimizer::OptimizationStep;

/// The fixed, ordered list of rewrites applied at every cursor position.
pub static SINGLE_STEPS: &[OptimizationStep] = &[
    // combine consecutive conditional writes of the same local where one
    // writes zero
    OptimizationStep::new("CombineSelectionWithZero", combine_selection_with_zero),
    // combine successive setting of the same flags
    OptimizationStep::new("CombineSettingSameFlags", combine_same_flags),
    // combine a pure flag-set with an adjacent write of the same value
    OptimizationStep::new("CombineSettingFlagsWithOutput", combine_flag_with_output),
    // calculates constant operations
    OptimizationStep::new("FoldConstants", fold_constants),
    // simplifies arithmetic operations into moves or cheaper operations
    OptimizationStep::new("SimplifyArithmetics", simplify_arithmetics),
    // combines operations according to arithmetic rules
    OptimizationStep::new("CombineArithmetics", combine_arithmetics_at),
];

/// The action of the `single-steps` pass: walks the whole method once,
/// applying [`SINGLE_STEPS`] at every cursor position.
///
/// Returns whether any step changed the method, so the fixed-point driver
/// can detect quiescence.
pub fn run_single_steps(
    module: &Module,
    method: &mut Method,
    config: &Configuration,
) -> Result<bool> {
    if log_enabled!(Level::Debug) {
        let names: Vec<&str> = SINGLE_STEPS.iter().map(|step| step.name).collect();
        debug!("Running steps: {}", names.join(", "));
    }

    let mut changed_any = false;
    let mut it = method.walk_all_instructions();
    // the step list can mutate at and around the cursor; the position one
    // before the current instruction survives every allowed mutation and
    // serves as the replay anchor
    let mut prev = it;
    while !it.is_end_of_method(method) {
        let mut index = 0;
        while index < SINGLE_STEPS.len() {
            let (new_it, step_changed) = SINGLE_STEPS[index].run(module, method, it, config)?;
            changed_any |= step_changed;
            if new_it.previous_in_method(method) != prev || new_it != it {
                it = prev;
                index = 0;
            } else {
                index += 1;
            }
        }
        it = it.next_in_method(method);
        prev = it.previous_in_method(method);
    }

    Ok(changed_any)
}

/// Replaces a computation on literal operands with a move of the result.
fn fold_constants(
    _module: &Module,
    method: &mut Method,
    it: Walker,
    _config: &Configuration,
) -> Result<(Walker, bool)> {
    let Some(instr) = it.get(method) else {
        return Ok((it, false));
    };
    if !instr.op().is_alu() || instr.op() == OpCode::Move {
        return Ok((it, false));
    }
    let Some(folded) = instr.precalculate() else {
        return Ok((it, false));
    };
    let Some(output) = instr.output() else {
        return Ok((it, false));
    };
    let mut replacement = Instruction::mov(output.clone(), folded)
        .with_decorations(instr.decorations())
        .with_condition(instr.condition());
    if instr.sets_flags() {
        replacement = replacement.with_set_flags();
    }
    method.replace(it, replacement);
    Ok((it, true))
}

/// Rewrites operations with an identity operand into moves.
fn simplify_arithmetics(
    _module: &Module,
    method: &mut Method,
    it: Walker,
    _config: &Configuration,
) -> Result<(Walker, bool)> {
    let Some(instr) = it.get(method) else {
        return Ok((it, false));
    };
    let Some(output) = instr.output().cloned() else {
        return Ok((it, false));
    };
    if !instr.op().is_alu() {
        return Ok((it, false));
    }
    let (Some(a), Some(b)) = (instr.first_arg().cloned(), instr.second_arg().cloned()) else {
        return Ok((it, false));
    };

    let all_ones = |value: &Value| {
        value
            .literal_value()
            .is_some_and(|literal| literal.unsigned() == u32::MAX)
    };
    let power_of_two = |value: &Value| {
        value
            .literal_value()
            .map(crate::ir::Literal::unsigned)
            .filter(|&raw| raw.is_power_of_two())
            .map(|raw| raw.trailing_zeros() as i32)
    };

    let simplified: Option<Instruction> = match instr.op() {
        OpCode::Add => {
            if b.is_zero_initializer() {
                Some(Instruction::mov(output, a))
            } else if a.is_zero_initializer() {
                Some(Instruction::mov(output, b))
            } else {
                None
            }
        }
        OpCode::Sub => {
            if b.is_zero_initializer() {
                Some(Instruction::mov(output, a))
            } else if a == b {
                Some(Instruction::mov(output, Value::zero()))
            } else {
                None
            }
        }
        OpCode::Mul | OpCode::Mul24 => {
            if a.is_zero_initializer() || b.is_zero_initializer() {
                Some(Instruction::mov(output, Value::zero()))
            } else if b.literal_value().is_some_and(|l| l.unsigned() == 1) {
                Some(Instruction::mov(output, a))
            } else if a.literal_value().is_some_and(|l| l.unsigned() == 1) {
                Some(Instruction::mov(output, b))
            } else if instr.op() == OpCode::Mul {
                // strength-reduce multiplications by powers of two
                if let Some(shift) = power_of_two(&b) {
                    Some(Instruction::new(
                        OpCode::Shl,
                        vec![a, Value::int(shift)],
                        Some(output),
                    ))
                } else {
                    power_of_two(&a).map(|shift| {
                        Instruction::new(OpCode::Shl, vec![b, Value::int(shift)], Some(output))
                    })
                }
            } else {
                None
            }
        }
        OpCode::And => {
            if a.is_zero_initializer() || b.is_zero_initializer() {
                Some(Instruction::mov(output, Value::zero()))
            } else if a == b || all_ones(&b) {
                Some(Instruction::mov(output, a))
            } else if all_ones(&a) {
                Some(Instruction::mov(output, b))
            } else {
                None
            }
        }
        OpCode::Or => {
            if a == b || b.is_zero_initializer() {
                Some(Instruction::mov(output, a))
            } else if a.is_zero_initializer() {
                Some(Instruction::mov(output, b))
            } else if all_ones(&a) || all_ones(&b) {
                Some(Instruction::mov(output, Value::literal(u32::MAX, a.ty.clone())))
            } else {
                None
            }
        }
        OpCode::Xor => {
            if b.is_zero_initializer() {
                Some(Instruction::mov(output, a))
            } else if a.is_zero_initializer() {
                Some(Instruction::mov(output, b))
            } else if a == b {
                Some(Instruction::mov(output, Value::zero()))
            } else {
                None
            }
        }
        OpCode::Shl | OpCode::Shr | OpCode::Asr | OpCode::Ror => {
            if b.is_zero_initializer() {
                Some(Instruction::mov(output, a))
            } else {
                None
            }
        }
        OpCode::Min | OpCode::Max => {
            if a == b {
                Some(Instruction::mov(output, a))
            } else {
                None
            }
        }
        _ => None,
    };

    let Some(simplified) = simplified else {
        return Ok((it, false));
    };
    let mut simplified = simplified
        .with_decorations(instr.decorations())
        .with_condition(instr.condition());
    if instr.sets_flags() {
        simplified = simplified.with_set_flags();
    }
    method.replace(it, simplified);
    Ok((it, true))
}

/// Merges chained operations with literal operands: `(x op c1) op c2`
/// becomes `x op c` with a statically combined constant.
///
/// Also invoked by the final-phase `combine` pass for chains formed after
/// the repeat phase has finished.
pub(crate) fn combine_arithmetics_at(
    _module: &Module,
    method: &mut Method,
    it: Walker,
    _config: &Configuration,
) -> Result<(Walker, bool)> {
    let Some(instr) = it.get(method) else {
        return Ok((it, false));
    };
    if instr.condition().is_conditional() || instr.output().is_none() {
        return Ok((it, false));
    }
    let op = instr.op();
    let combinable = matches!(
        op,
        OpCode::Add
            | OpCode::Mul
            | OpCode::Mul24
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Sub
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::Asr
            | OpCode::Ror
    );
    if !combinable {
        return Ok((it, false));
    }

    // current instruction: x op c2 (c2 on either side only for
    // commutative operations)
    let (Some(a), Some(b)) = (instr.first_arg(), instr.second_arg()) else {
        return Ok((it, false));
    };
    let (inner_value, c2) = if let Some(literal) = b.literal_value() {
        (a.clone(), literal)
    } else if op.is_commutative() {
        match a.literal_value() {
            Some(literal) => (b.clone(), literal),
            None => return Ok((it, false)),
        }
    } else {
        return Ok((it, false));
    };

    // the inner operation must be the single writer of x, in the same
    // block, before the cursor, unconditional
    let Some(inner_local) = inner_value.check_local() else {
        return Ok((it, false));
    };
    let Some(writer) = method.local(inner_local).single_writer() else {
        return Ok((it, false));
    };
    let Some(current) = it.instr_ref() else {
        return Ok((it, false));
    };
    if writer.block != current.block {
        return Ok((it, false));
    }
    let Some(block) = method.block(current.block) else {
        return Ok((it, false));
    };
    if !block.precedes(writer.slot, current.slot) {
        return Ok((it, false));
    }
    let Some(inner) = method.instruction_at(writer) else {
        return Ok((it, false));
    };
    if inner.condition().is_conditional() {
        return Ok((it, false));
    }
    if inner.op() != op {
        return Ok((it, false));
    }
    let (Some(inner_a), Some(inner_b)) = (inner.first_arg(), inner.second_arg()) else {
        return Ok((it, false));
    };
    let (base, c1) = if let Some(literal) = inner_b.literal_value() {
        (inner_a.clone(), literal)
    } else if op.is_commutative() {
        match inner_a.literal_value() {
            Some(literal) => (inner_b.clone(), literal),
            None => return Ok((it, false)),
        }
    } else {
        return Ok((it, false));
    };

    let combined = match op {
        // associative operations combine with themselves
        OpCode::Add | OpCode::Mul | OpCode::Mul24 | OpCode::And | OpCode::Or | OpCode::Xor => {
            op.evaluate(&[c1, c2])
        }
        // (x - c1) - c2 = x - (c1 + c2)
        OpCode::Sub => OpCode::Add.evaluate(&[c1, c2]),
        // shift distances add, but only while the total stays in range
        OpCode::Shl | OpCode::Shr | OpCode::Asr => {
            let total = i64::from(c1.unsigned()) + i64::from(c2.unsigned());
            if c1.unsigned() < 32 && c2.unsigned() < 32 && total < 32 {
                OpCode::Add.evaluate(&[c1, c2])
            } else {
                None
            }
        }
        // rotations wrap
        OpCode::Ror => OpCode::Add
            .evaluate(&[c1, c2])
            .map(|sum| crate::ir::Literal::from(sum.unsigned() & 31)),
        _ => None,
    };
    let Some(combined) = combined else {
        return Ok((it, false));
    };

    let output = instr.output().cloned();
    let decorations = instr.decorations();
    let sets_flags = instr.sets_flags();
    let mut replacement = Instruction::new(
        op,
        vec![base, Value::literal(combined, inner_value.ty.clone())],
        output,
    )
    .with_decorations(decorations);
    if sets_flags {
        replacement = replacement.with_set_flags();
    }
    method.replace(it, replacement);
    Ok((it, true))
}

/// For a conditional select pair where one side writes zero, rewrites the
/// zero write to `xor v, v` of the other side's source, so both sides
/// read the same operand.
fn combine_selection_with_zero(
    _module: &Module,
    method: &mut Method,
    it: Walker,
    _config: &Configuration,
) -> Result<(Walker, bool)> {
    let next = it.next_in_block(method);
    let (Some(first), Some(second)) = (it.get(method), next.get(method)) else {
        return Ok((it, false));
    };

    let same_output = matches!(
        (first.output(), second.output()),
        (Some(a), Some(b)) if a == b
    );
    if !same_output {
        return Ok((it, false));
    }
    if !first.condition().is_conditional()
        || first.condition().invert() != second.condition()
    {
        return Ok((it, false));
    }

    let is_zero_move = |instr: &Instruction| {
        instr.op() == OpCode::Move
            && instr
                .first_arg()
                .is_some_and(Value::is_zero_initializer)
    };
    fn source_of(instr: &Instruction) -> Option<&Value> {
        instr.first_arg().filter(|value| {
            matches!(value.kind, ValueKind::Local(_) | ValueKind::Register(_))
        })
    }

    let (zero_at, source) = if is_zero_move(first) {
        (it, source_of(second))
    } else if is_zero_move(second) {
        (next, source_of(first))
    } else {
        return Ok((it, false));
    };
    let Some(source) = source.cloned() else {
        return Ok((it, false));
    };

    let zero_move = zero_at.get(method).expect("checked above");
    let output = zero_move.output().cloned().expect("checked above");
    let condition = zero_move.condition();
    let sets_flags = zero_move.sets_flags();
    let mut replacement = Instruction::new(
        OpCode::Xor,
        vec![source.clone(), source],
        Some(output),
    )
    .with_condition(condition);
    if sets_flags {
        replacement = replacement.with_set_flags();
    }
    method.replace(zero_at, replacement);
    Ok((it, true))
}

/// Drops the flag update of an instruction whose flags were already set
/// from the same value.
fn combine_same_flags(
    _module: &Module,
    method: &mut Method,
    it: Walker,
    _config: &Configuration,
) -> Result<(Walker, bool)> {
    let Some(first) = it.get(method) else {
        return Ok((it, false));
    };
    if !first.sets_flags() || first.condition().is_conditional() {
        return Ok((it, false));
    }
    let first_op = first.op();
    let first_args = first.args().to_vec();

    // walk to the next flag update; the rewrite is only valid if the flag
    // source operands are not clobbered in between
    let mut cursor = it.next_in_block(method);
    loop {
        let Some(instr) = cursor.get(method) else {
            return Ok((it, false));
        };
        if instr.sets_flags() {
            let same_source = instr.op() == first_op
                && instr.args() == first_args.as_slice()
                && !instr.condition().is_conditional();
            if !same_source {
                return Ok((it, false));
            }
            if instr.output().is_none() {
                // a pure flag set carrying no value, drop it entirely
                method.erase(cursor);
            } else {
                let mut replacement = instr.clone();
                replacement.set_flag_setting(false);
                method.replace(cursor, replacement);
            }
            return Ok((it, true));
        }
        if let Some(written) = instr.output_local() {
            let clobbers = first_args
                .iter()
                .any(|arg| arg.has_local(written));
            if clobbers {
                return Ok((it, false));
            }
        }
        cursor = cursor.next_in_block(method);
    }
}

/// Merges a pure flag-setting move with an adjacent move of the same
/// value into a real output.
fn combine_flag_with_output(
    _module: &Module,
    method: &mut Method,
    it: Walker,
    _config: &Configuration,
) -> Result<(Walker, bool)> {
    let next = it.next_in_block(method);
    let (Some(first), Some(second)) = (it.get(method), next.get(method)) else {
        return Ok((it, false));
    };

    let flag_only = |instr: &Instruction| {
        instr.op() == OpCode::Move && instr.sets_flags() && instr.output().is_none()
    };
    let plain_move = |instr: &Instruction| {
        instr.is_simple_move() && instr.output().is_some()
    };

    if plain_move(first) && flag_only(second) && first.args() == second.args() {
        // value write followed by a redundant flag set of the same value
        let mut replacement = first.clone();
        replacement.set_flag_setting(true);
        method.replace(it, replacement);
        method.erase(next);
        return Ok((it, true));
    }

    if flag_only(first) && plain_move(second) && first.args() == second.args() {
        // flag set followed by the value write: fold the flag update into
        // the write and drop the pure flag set
        let mut replacement = second.clone();
        replacement.set_flag_setting(true);
        replacement.add_decorations(first.decorations());
        method.replace(next, replacement);
        let after = method.erase(it);
        return Ok((after, true));
    }

    Ok((it, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::ConditionCode;
    use crate::ir::types::DataType;
    use crate::ir::BlockId;

    fn setup() -> (Module, Method, BlockId) {
        let module = Module::new("prog");
        let mut method = Method::new("kernel");
        let block = method.add_block("%entry");
        (module, method, block)
    }

    fn config() -> Configuration {
        Configuration::default()
    }

    #[test]
    fn test_fold_constants_replaces_with_move() {
        let (module, mut method, block) = setup();
        let out = method.add_new_local(DataType::INT32, "%x");
        let it = method.append(
            block,
            Instruction::new(OpCode::Add, vec![Value::int(2), Value::int(40)], Some(out)),
        );

        let (_, changed) = fold_constants(&module, &mut method, it, &config()).unwrap();
        assert!(changed);
        let instr = it.get(&method).unwrap();
        assert_eq!(instr.op(), OpCode::Move);
        assert_eq!(instr.first_arg().unwrap().literal_value().unwrap().signed(), 42);
    }

    #[test]
    fn test_fold_preserves_flags_and_condition() {
        let (module, mut method, block) = setup();
        let out = method.add_new_local(DataType::INT32, "%x");
        let it = method.append(
            block,
            Instruction::new(OpCode::Sub, vec![Value::int(1), Value::int(1)], Some(out))
                .with_set_flags(),
        );
        fold_constants(&module, &mut method, it, &config()).unwrap();
        let instr = it.get(&method).unwrap();
        assert!(instr.sets_flags());
    }

    #[test]
    fn test_simplify_add_zero() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let out = method.add_new_local(DataType::INT32, "%y");
        let it = method.append(
            block,
            Instruction::new(OpCode::Add, vec![x.clone(), Value::zero()], Some(out)),
        );

        let (_, changed) = simplify_arithmetics(&module, &mut method, it, &config()).unwrap();
        assert!(changed);
        let instr = it.get(&method).unwrap();
        assert_eq!(instr.op(), OpCode::Move);
        assert_eq!(instr.first_arg().unwrap(), &x);
    }

    #[test]
    fn test_simplify_mul_power_of_two() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let out = method.add_new_local(DataType::INT32, "%y");
        let it = method.append(
            block,
            Instruction::new(OpCode::Mul, vec![x.clone(), Value::int(8)], Some(out)),
        );

        simplify_arithmetics(&module, &mut method, it, &config()).unwrap();
        let instr = it.get(&method).unwrap();
        assert_eq!(instr.op(), OpCode::Shl);
        assert_eq!(instr.second_arg().unwrap().literal_value().unwrap().signed(), 3);
    }

    #[test]
    fn test_simplify_xor_same() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let out = method.add_new_local(DataType::INT32, "%y");
        let it = method.append(
            block,
            Instruction::new(OpCode::Xor, vec![x.clone(), x], Some(out)),
        );

        simplify_arithmetics(&module, &mut method, it, &config()).unwrap();
        let instr = it.get(&method).unwrap();
        assert_eq!(instr.op(), OpCode::Move);
        assert!(instr.first_arg().unwrap().is_zero_initializer());
    }

    #[test]
    fn test_combine_add_chain() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let mid = method.add_new_local(DataType::INT32, "%mid");
        let out = method.add_new_local(DataType::INT32, "%out");
        method.append(
            block,
            Instruction::new(OpCode::Add, vec![x.clone(), Value::int(5)], Some(mid.clone())),
        );
        let it = method.append(
            block,
            Instruction::new(OpCode::Add, vec![mid, Value::int(3)], Some(out)),
        );

        let (_, changed) = combine_arithmetics_at(&module, &mut method, it, &config()).unwrap();
        assert!(changed);
        let instr = it.get(&method).unwrap();
        assert_eq!(instr.op(), OpCode::Add);
        assert_eq!(instr.first_arg().unwrap(), &x);
        assert_eq!(instr.second_arg().unwrap().literal_value().unwrap().signed(), 8);
    }

    #[test]
    fn test_combine_sub_chain_adds_constants() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let mid = method.add_new_local(DataType::INT32, "%mid");
        let out = method.add_new_local(DataType::INT32, "%out");
        method.append(
            block,
            Instruction::new(OpCode::Sub, vec![x.clone(), Value::int(5)], Some(mid.clone())),
        );
        let it = method.append(
            block,
            Instruction::new(OpCode::Sub, vec![mid, Value::int(3)], Some(out)),
        );

        combine_arithmetics_at(&module, &mut method, it, &config()).unwrap();
        let instr = it.get(&method).unwrap();
        assert_eq!(instr.op(), OpCode::Sub);
        assert_eq!(instr.second_arg().unwrap().literal_value().unwrap().signed(), 8);
    }

    #[test]
    fn test_combine_shift_overflow_is_rejected() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let mid = method.add_new_local(DataType::INT32, "%mid");
        let out = method.add_new_local(DataType::INT32, "%out");
        method.append(
            block,
            Instruction::new(OpCode::Shl, vec![x, Value::int(20)], Some(mid.clone())),
        );
        let it = method.append(
            block,
            Instruction::new(OpCode::Shl, vec![mid, Value::int(20)], Some(out)),
        );

        // 40 is out of range, the distances must not be summed modulo 32
        let (_, changed) = combine_arithmetics_at(&module, &mut method, it, &config()).unwrap();
        assert!(!changed);
        assert_eq!(it.get(&method).unwrap().op(), OpCode::Shl);
    }

    #[test]
    fn test_combine_requires_single_writer() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let mid = method.add_new_local(DataType::INT32, "%mid");
        let out = method.add_new_local(DataType::INT32, "%out");
        method.append(
            block,
            Instruction::new(OpCode::Add, vec![x.clone(), Value::int(5)], Some(mid.clone())),
        );
        // second writer spoils the chain
        method.append(block, Instruction::mov(mid.clone(), Value::int(0)));
        let it = method.append(
            block,
            Instruction::new(OpCode::Add, vec![mid, Value::int(3)], Some(out)),
        );

        let (_, changed) = combine_arithmetics_at(&module, &mut method, it, &config()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_selection_with_zero() {
        let (module, mut method, block) = setup();
        let v = method.add_new_local(DataType::INT32, "%v");
        let out = method.add_new_local(DataType::INT32, "%out");
        let it = method.append(
            block,
            Instruction::mov(out.clone(), v.clone()).with_condition(ConditionCode::ZeroSet),
        );
        let zero = method.append(
            block,
            Instruction::mov(out, Value::zero()).with_condition(ConditionCode::ZeroClear),
        );

        let (_, changed) =
            combine_selection_with_zero(&module, &mut method, it, &config()).unwrap();
        assert!(changed);
        let rewritten = zero.get(&method).unwrap();
        assert_eq!(rewritten.op(), OpCode::Xor);
        assert_eq!(rewritten.first_arg().unwrap(), &v);
        assert_eq!(rewritten.second_arg().unwrap(), &v);
        assert_eq!(rewritten.condition(), ConditionCode::ZeroClear);
    }

    #[test]
    fn test_same_flags_dropped() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let out = method.add_new_local(DataType::INT32, "%out");
        let it = method.append(
            block,
            Instruction::mov(out.clone(), x.clone()).with_set_flags(),
        );
        // an unrelated instruction in between, then the same flag source
        let other = method.add_new_local(DataType::INT32, "%other");
        method.append(block, Instruction::mov(other, Value::int(1)));
        let second = method.append(
            block,
            Instruction::new(OpCode::Move, vec![x], None).with_set_flags(),
        );

        let (_, changed) = combine_same_flags(&module, &mut method, it, &config()).unwrap();
        assert!(changed);
        // the pure flag set is erased entirely
        assert!(second.get(&method).is_none());
    }

    #[test]
    fn test_same_flags_blocked_by_clobber() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let it = method.append(
            block,
            Instruction::new(OpCode::Move, vec![x.clone()], None).with_set_flags(),
        );
        // the flag source is rewritten in between
        method.append(block, Instruction::mov(x.clone(), Value::int(9)));
        method.append(
            block,
            Instruction::new(OpCode::Move, vec![x], None).with_set_flags(),
        );

        let (_, changed) = combine_same_flags(&module, &mut method, it, &config()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_flag_with_output_merges_forward() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let out = method.add_new_local(DataType::INT32, "%out");
        let it = method.append(block, Instruction::mov(out.clone(), x.clone()));
        let flag = method.append(
            block,
            Instruction::new(OpCode::Move, vec![x], None).with_set_flags(),
        );

        let (_, changed) =
            combine_flag_with_output(&module, &mut method, it, &config()).unwrap();
        assert!(changed);
        assert!(it.get(&method).unwrap().sets_flags());
        assert!(flag.get(&method).is_none());
        assert_eq!(method.count_instructions(), 1);
    }

    #[test]
    fn test_flag_with_output_merges_backward() {
        let (module, mut method, block) = setup();
        let x = method.add_new_local(DataType::INT32, "%x");
        let out = method.add_new_local(DataType::INT32, "%out");
        let flag = method.append(
            block,
            Instruction::new(OpCode::Move, vec![x.clone()], None).with_set_flags(),
        );
        let value = method.append(block, Instruction::mov(out, x));

        let (after, changed) =
            combine_flag_with_output(&module, &mut method, flag, &config()).unwrap();
        assert!(changed);
        assert!(flag.get(&method).is_none());
        assert!(value.get(&method).unwrap().sets_flags());
        assert_eq!(after, value);
    }

    #[test]
    fn test_single_steps_driver_reaches_fixed_point() {
        let (module, mut method, block) = setup();
        let out = method.add_new_local(DataType::INT32, "%out");
        let mid = method.add_new_local(DataType::INT32, "%mid");
        // (7 + 5) then mid + 0 - folds and simplifies in one walk
        method.append(
            block,
            Instruction::new(
                OpCode::Add,
                vec![Value::int(7), Value::int(5)],
                Some(mid.clone()),
            ),
        );
        method.append(
            block,
            Instruction::new(OpCode::Add, vec![mid, Value::zero()], Some(out)),
        );

        let changed = run_single_steps(&module, &mut method, &config()).unwrap();
        assert!(changed);

        let ops: Vec<OpCode> = method
            .block(block)
            .unwrap()
            .iter()
            .map(|(_, instr)| instr.op())
            .collect();
        assert_eq!(ops, vec![OpCode::Move, OpCode::Move]);

        // a second run makes no further changes
        let changed = run_single_steps(&module, &mut method, &config()).unwrap();
        assert!(!changed);
    }
}
