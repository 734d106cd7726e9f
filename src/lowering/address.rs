//! Address-calculation lowering.
//!
//! Bridges symbolic pointer arithmetic to concrete scratchpad offsets.
//! The entry points successively refine a pointer value into a byte
//! offset relative to a base address, a per-QPU stack-frame offset or an
//! element-granular index, reusing already-computed offsets where the
//! defining instruction makes them visible.

use crate::analysis::range::MemoryAccessRange;
use crate::error::{CompilationStage, Error, Result};
use crate::ir::block::InstrRef;
use crate::ir::instruction::{Decorations, Instruction, OpCode};
use crate::ir::local::LocalId;
use crate::ir::method::Method;
use crate::ir::types::DataType;
use crate::ir::value::{Register, Value};
use crate::ir::walker::Walker;
use crate::lowering::vpm::{vpm_storage_type, MemoryAccessType};

/// Computes `out = ptr_value - base_address` as an integer byte offset.
///
/// Three cases, cheapest first:
///
/// 1. `ptr_value` *is* the base address: the offset is zero.
/// 2. The defining operation of `ptr_value` is an `add` with the base
///    address as one operand: the other operand already is the offset.
///    For stores the store instruction itself appears among the writers
///    of the pointer local and is discounted when identifying the
///    defining operation (`mem`).
/// 3. Otherwise a subtraction is emitted.
pub fn insert_address_to_offset(
    method: &mut Method,
    it: Walker,
    base_address: LocalId,
    mem: Option<InstrRef>,
    ptr_value: &Value,
) -> Result<(Walker, Value)> {
    let index_op = find_defining_operation(method, ptr_value, mem);

    if ptr_value.has_local(base_address) {
        // trivial case, the offset is zero
        return Ok((it, Value::int(0)));
    }

    if let Some(op_ref) = index_op {
        if let Some(offset) = offset_operand_of_add(method, op_ref, base_address) {
            // the index is base address + offset, use the offset directly
            return Ok((it, offset));
        }
    }

    // for more complex versions, calculate the offset by subtracting the
    // base address from the result address
    let base_ty = method.local(base_address).ty().clone();
    let out = method.add_new_local(base_ty.clone(), "%pointer_diff");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Sub,
            vec![ptr_value.clone(), Value::local(base_address, base_ty)],
            Some(out.clone()),
        ),
    );
    Ok((it, out))
}

/// Computes the byte offset of `ptr_value` within a per-QPU or shared
/// scratchpad area.
///
/// For per-QPU areas the per-lane stack-frame offset
/// `stack_byte_size * qpu_number` is added, where the frame size is the
/// in-memory width of one element in its scratchpad layout. Shared areas
/// return the raw offset.
pub fn insert_address_to_stack_offset(
    method: &mut Method,
    it: Walker,
    base_address: LocalId,
    access_type: MemoryAccessType,
    mem: Option<InstrRef>,
    ptr_value: &Value,
) -> Result<(Walker, Value)> {
    let (it, tmp_index) = insert_address_to_offset(method, it, base_address, mem, ptr_value)?;
    if access_type != MemoryAccessType::VpmPerQpu {
        return Ok((it, tmp_index));
    }

    // size of one stack-frame in bytes
    let element_ty = method
        .local(base_address)
        .ty()
        .element_type()
        .ok_or_else(|| Error::InvalidContainerType {
            stage: CompilationStage::Lowering,
            detail: format!(
                "stack base {} has no element type",
                method.local(base_address).name()
            ),
        })?;
    let stack_byte_size = vpm_storage_type(&element_ty)?.in_memory_width();

    // add the offset of this QPU's stack-frame
    let stack_offset = method.add_new_local(DataType::void_pointer(), "%stack_offset");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Mul24,
            vec![
                Value::literal(stack_byte_size, DataType::INT16),
                Value::register(Register::QpuNumber, DataType::INT8),
            ],
            Some(stack_offset.clone()),
        ),
    );
    let out = method.add_new_local(DataType::void_pointer(), "%stack_offset");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Add,
            vec![tmp_index, stack_offset],
            Some(out.clone()),
        ),
    );
    Ok((it, out))
}

/// Computes the element-granular index of `ptr_value` within `container`.
///
/// The byte offset is divided by the element's in-memory width; the
/// caller guarantees divisibility. Division is emitted as a right-shift,
/// the accelerator has no integer divider.
///
/// # Errors
///
/// [`Error::Unimplemented`] if the element width is not a power of two.
pub fn insert_address_to_element_offset(
    method: &mut Method,
    it: Walker,
    base_address: LocalId,
    container: &Value,
    mem: Option<InstrRef>,
    ptr_value: &Value,
) -> Result<(Walker, Value)> {
    let (it, tmp_index) = insert_address_to_offset(method, it, base_address, mem, ptr_value)?;
    let element_ty = container
        .ty
        .element_type()
        .ok_or_else(|| Error::InvalidContainerType {
            stage: CompilationStage::Lowering,
            detail: format!("container {}", method.describe(container)),
        })?;
    let width = element_ty.in_memory_width();
    if width <= 1 {
        return Ok((it, tmp_index));
    }
    if !width.is_power_of_two() {
        return Err(Error::Unimplemented {
            stage: CompilationStage::Lowering,
            detail: format!("element offset for non-power-of-two width {width}"),
        });
    }
    let shift = width.trailing_zeros() as i32;
    if let Some(literal) = tmp_index.literal_value() {
        return Ok((it, Value::int(literal.signed() >> shift)));
    }
    let out = method.add_new_local(DataType::void_pointer(), "%element_offset");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Shr,
            vec![tmp_index, Value::int(shift)],
            Some(out.clone()),
        ),
    );
    Ok((it, out))
}

/// Recombines the work-item dependent parts of a pre-analyzed memory
/// access range into a single offset value.
///
/// The dynamic parts are left-folded with `add`, intersecting the
/// decoration bitsets at every step so only properties holding of both
/// operands survive. A recorded type-size shift is applied last.
///
/// # Errors
///
/// - [`Error::Unimplemented`] if the range carries a non-zero constant
///   offset
/// - [`Error::InvalidOperand`] if the range has no dynamic parts
pub fn insert_address_to_work_item_offset(
    method: &mut Method,
    it: Walker,
    range: &mut MemoryAccessRange,
) -> Result<(Walker, Value)> {
    if let Some(constant) = &range.constant_offset {
        if !constant.is_zero_initializer() {
            return Err(Error::Unimplemented {
                stage: CompilationStage::Normalizer,
                detail: format!(
                    "work-item specific offset with constant part: {range}"
                ),
            });
        }
    }

    let (folded, decorations) =
        combine_additions(method, it, &mut range.dynamic_address_parts).ok_or_else(|| {
            Error::InvalidOperand {
                stage: CompilationStage::Normalizer,
                detail: format!("no dynamic address parts in {range}"),
            }
        })?;

    let Some(shift) = range.type_size_shift.clone() else {
        return Ok((it, folded));
    };
    let out = method.add_new_local(folded.ty.clone(), "%element_offset");
    method.emplace(
        it,
        Instruction::new(OpCode::Shl, vec![folded, shift], Some(out.clone()))
            .with_decorations(decorations),
    );
    Ok((it, out))
}

// left-fold of the dynamic parts, draining the list
fn combine_additions(
    method: &mut Method,
    it: Walker,
    parts: &mut Vec<(Value, Decorations)>,
) -> Option<(Value, Decorations)> {
    let mut result: Option<(Value, Decorations)> = None;
    for (value, decorations) in parts.drain(..) {
        result = Some(match result {
            None => (value, decorations),
            Some((previous, previous_decorations)) => {
                let combined = previous_decorations.intersect(decorations);
                let sum = method.add_new_local(previous.ty.clone(), "%dynamic_offset");
                method.emplace(
                    it,
                    Instruction::new(OpCode::Add, vec![previous, value], Some(sum.clone()))
                        .with_decorations(combined),
                );
                (sum, combined)
            }
        });
    }
    result
}

fn find_defining_operation(
    method: &Method,
    ptr_value: &Value,
    mem: Option<InstrRef>,
) -> Option<InstrRef> {
    let local = ptr_value.check_local()?;
    let writers = method.local(local).writers();
    if let Some(single) = method.local(local).single_writer() {
        return alu_writer(method, single);
    }
    // for stores, the store itself is also a write instruction; discount
    // it and use the remaining single writer
    let mem = mem?;
    if writers.len() == 2 && writers.contains(&mem) {
        let other = writers.iter().copied().find(|&w| w != mem)?;
        return alu_writer(method, other);
    }
    None
}

fn alu_writer(method: &Method, writer: InstrRef) -> Option<InstrRef> {
    let instr = method.instruction_at(writer)?;
    instr.op().is_alu().then_some(writer)
}

// if the instruction is `add` reading the base address, yields the other
// operand
fn offset_operand_of_add(
    method: &Method,
    op_ref: InstrRef,
    base_address: LocalId,
) -> Option<Value> {
    let instr = method.instruction_at(op_ref)?;
    if instr.op() != OpCode::Add {
        return None;
    }
    let first = instr.first_arg()?;
    let second = instr.second_arg()?;
    if first.has_local(base_address) {
        Some(second.clone())
    } else if second.has_local(base_address) {
        Some(first.clone())
    } else {
        None
    }
}
