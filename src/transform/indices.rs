//! Multi-level index calculation.
//!
//! Lowers an aggregate access path (a container value and an ordered list
//! of indices) into plain byte arithmetic: `dest = container + offset`.
//! Literal index chains fold statically, symbolic indices emit multiply
//! and add instructions, and the derived pointer records a back-link to
//! its container local.

use log::error;

use crate::error::{CompilationStage, Error, Result};
use crate::ir::instruction::{Instruction, OpCode};
use crate::ir::local::ANY_ELEMENT;
use crate::ir::method::Method;
use crate::ir::types::{AddressSpace, DataType};
use crate::ir::value::Value;
use crate::ir::walker::Walker;

/// Emits `dest = container + offset` for the access path `indices`.
///
/// The offset is accumulated left-to-right, dispatching on the running
/// container type:
///
/// - pointers and arrays step by `index * element.physical_width()`,
/// - structs require a literal field selector and add the field offset,
/// - vectors step by `index * element.physical_width()`.
///
/// When `first_index_is_element` is set, the first index selects an
/// element of the base itself without changing the pointee type (the
/// convention of SPIR-V access chains with an explicit `Element` index).
///
/// With an empty index list, `dest` is rebound to `container`, nothing is
/// emitted and the back-link records [`ANY_ELEMENT`].
///
/// # Errors
///
/// - [`Error::InvalidOperand`] if `container` is not a local or a struct
///   index is out of range
/// - [`Error::NonLiteralStructIndex`] for symbolic struct selectors
/// - [`Error::InvalidContainerType`] when indexing a non-aggregate type
/// - [`Error::TypeMismatch`] if the computed pointer type disagrees with
///   the declared type of `dest`
pub fn insert_calculate_indices(
    method: &mut Method,
    it: Walker,
    container: &Value,
    dest: &mut Value,
    indices: &[Value],
    first_index_is_element: bool,
) -> Result<Walker> {
    let container_local = container.check_local().ok_or_else(|| Error::InvalidOperand {
        stage: CompilationStage::Normalizer,
        detail: format!(
            "cannot calculate indices into {}",
            method.describe(container)
        ),
    })?;

    if indices.is_empty() {
        *dest = container.clone();
        method
            .local_mut(container_local)
            .set_reference(container_local, ANY_ELEMENT);
        return Ok(it);
    }

    // handle multi-level indices
    let mut offset = Value::int(0);
    let mut sub_container_ty = container.ty.clone();
    for index in indices {
        let sub_offset;
        if sub_container_ty.pointer_type().is_some() || sub_container_ty.array_type().is_some() {
            // index is an index into the pointed-to/array memory, add the
            // offset of the element at the given index to the global offset
            let element = sub_container_ty
                .element_type()
                .expect("pointers and arrays have an element type");
            sub_offset = step_by_element(method, it, index, &element)?;
            sub_container_ty = element;
        } else if let Some(struct_ty) = sub_container_ty.struct_type() {
            // struct fields are selected at compile time, the index MUST
            // be a literal
            let literal = index
                .literal_value()
                .ok_or_else(|| Error::NonLiteralStructIndex {
                    stage: CompilationStage::Normalizer,
                    detail: method.describe(index),
                })?;
            let field = usize::try_from(literal.signed()).ok().and_then(|i| {
                struct_ty
                    .field_offset(i)
                    .map(|offset| (offset, sub_container_ty.field_type(i)))
            });
            let Some((field_offset, Some(field_ty))) = field else {
                return Err(Error::InvalidOperand {
                    stage: CompilationStage::Normalizer,
                    detail: format!(
                        "struct index {} out of range for {}",
                        literal.signed(),
                        sub_container_ty
                    ),
                });
            };
            sub_offset = Value::int(field_offset as i32);
            sub_container_ty = field_ty;
        } else if sub_container_ty.is_vector() {
            // takes the address of an element of the vector
            let element = sub_container_ty
                .element_type()
                .expect("vectors have an element type");
            sub_offset = step_by_element(method, it, index, &element)?;
            sub_container_ty = element;
        } else {
            return Err(Error::InvalidContainerType {
                stage: CompilationStage::Normalizer,
                detail: sub_container_ty.to_string(),
            });
        }

        offset = accumulate(method, it, offset, sub_offset);
    }

    // add the final offset to the container
    method.emplace(
        it,
        Instruction::new(
            OpCode::Add,
            vec![container.clone(), offset],
            Some(dest.clone()),
        ),
    );

    // associate the derived pointer with the local it refers to; the index
    // is only known when there is a single literal index (or the element
    // index is zero and the second index selects the element)
    let mut ref_index_value: Option<&Value> = None;
    if indices.len() == 1 {
        ref_index_value = Some(&indices[0]);
    }
    if first_index_is_element && indices[0].is_zero_initializer() {
        ref_index_value = indices.get(1);
    }
    let ref_index = ref_index_value
        .and_then(Value::literal_value)
        .map_or(ANY_ELEMENT, |literal| literal.signed());
    if let Some(dest_local) = dest.check_local() {
        method
            .local_mut(dest_local)
            .set_reference(container_local, ref_index);
    }

    let final_ty = expected_final_type(
        method,
        container,
        &sub_container_ty,
        indices.len(),
        first_index_is_element,
    )?;
    if dest.ty != final_ty {
        error!(
            "Final index does not match expected type for source {}, destination {}, final index type {}",
            method.describe(container),
            method.describe(dest),
            final_ty
        );
        return Err(Error::TypeMismatch {
            stage: CompilationStage::Normalizer,
            detail: format!("expected {}, destination is {}", final_ty, dest.ty),
        });
    }

    Ok(it)
}

// offset contribution of one pointer/array/vector step; multiplies
// symbolic indices, folds literal ones
fn step_by_element(
    method: &mut Method,
    it: Walker,
    index: &Value,
    element: &DataType,
) -> Result<Value> {
    let width = element.physical_width() as i32;
    if let Some(literal) = index.literal_value() {
        return Ok(Value::int(literal.signed().wrapping_mul(width)));
    }
    if index.is_undefined() {
        return Err(Error::InvalidOperand {
            stage: CompilationStage::Normalizer,
            detail: "undefined index".to_string(),
        });
    }
    let product = method.add_new_local(DataType::INT32, "%index_offset");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Mul,
            vec![index.clone(), Value::int(width)],
            Some(product.clone()),
        ),
    );
    Ok(product)
}

// folds offset + sub_offset statically where possible, elides zero terms
fn accumulate(method: &mut Method, it: Walker, offset: Value, sub_offset: Value) -> Value {
    if let (Some(a), Some(b)) = (offset.literal_value(), sub_offset.literal_value()) {
        return Value::int(a.signed().wrapping_add(b.signed()));
    }
    if offset.is_zero_initializer() {
        return sub_offset;
    }
    if sub_offset.is_zero_initializer() {
        return offset;
    }
    let sum = method.add_new_local(DataType::INT32, "%index_offset");
    method.emplace(
        it,
        Instruction::new(OpCode::Add, vec![offset, sub_offset], Some(sum.clone())),
    );
    sum
}

// the type the destination must have been declared with
fn expected_final_type(
    method: &Method,
    container: &Value,
    sub_container_ty: &DataType,
    index_count: usize,
    first_index_is_element: bool,
) -> Result<DataType> {
    if let Some((element, _)) = sub_container_ty.array_type() {
        // a trailing array decays to a pointer to its element type
        let space = container
            .ty
            .pointer_type()
            .map_or(AddressSpace::Private, |(_, space)| space);
        return Ok(method.create_pointer_type(element.clone(), space));
    }
    if first_index_is_element && index_count == 1 {
        // a lone element selector leaves the type of the base unchanged
        return Ok(container.ty.clone());
    }
    let (_, space) = container
        .ty
        .pointer_type()
        .ok_or_else(|| Error::InvalidContainerType {
            stage: CompilationStage::Normalizer,
            detail: format!(
                "container {} is not a pointer",
                method.describe(container)
            ),
        })?;
    Ok(method.create_pointer_type(sub_container_ty.clone(), space))
}
