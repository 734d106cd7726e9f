//! Byte-order reversal.
//!
//! Reverses the byte order of a 16- or 32-bit value using only shifts,
//! rotations and masks, since the accelerator has no byte-swap unit.
//!
//! The 16-bit variant loses the sign information of the source; the
//! result is treated as unsigned by downstream passes.

use crate::error::{CompilationStage, Error, Result};
use crate::ir::instruction::{Instruction, OpCode};
use crate::ir::method::Method;
use crate::ir::types::DataType;
use crate::ir::value::Value;
use crate::ir::walker::Walker;

/// Emits `dest` = `src` with its byte order reversed.
///
/// For 16-bit values this is a shift-left/shift-right pair with two masks
/// and an or. For 32-bit values two byte-granular rotations put each byte
/// in position twice, four masks select them and three ors recombine.
///
/// # Errors
///
/// - [`Error::InvalidOperand`] if `src` has no scalar bit count
/// - [`Error::UnsupportedWidth`] for widths other than 16 or 32 bits
pub fn insert_byte_swap(
    method: &mut Method,
    it: Walker,
    src: &Value,
    dest: &Value,
) -> Result<Walker> {
    let bits = src
        .ty
        .scalar_bit_count()
        .ok_or_else(|| Error::InvalidOperand {
            stage: CompilationStage::Normalizer,
            detail: format!("{} has no scalar bit count", method.describe(src)),
        })?;

    let emit = |method: &mut Method, op: OpCode, a: Value, b: Value, out: &Value| {
        method.emplace(
            it,
            Instruction::new(op, vec![a, b], Some(out.clone())),
        );
    };
    let temp = |method: &mut Method| method.add_new_local(src.ty.clone(), "%byte_swap");

    match bits / 8 {
        2 => {
            // ? ? A B -> 0 ? ? A
            let tmp_a0 = temp(method);
            emit(method, OpCode::Shr, src.clone(), Value::int(8), &tmp_a0);
            // ? ? A B -> ? A B 0
            let tmp_b0 = temp(method);
            emit(method, OpCode::Shl, src.clone(), Value::int(8), &tmp_b0);
            // 0 ? ? A -> 0 0 0 A
            let tmp_a1 = temp(method);
            emit(method, OpCode::And, tmp_a0, Value::literal(0x0000_00FFu32, DataType::INT32), &tmp_a1);
            // ? A B 0 -> 0 0 B 0
            let tmp_b1 = temp(method);
            emit(method, OpCode::And, tmp_b0, Value::literal(0x0000_FF00u32, DataType::INT32), &tmp_b1);
            // 0 0 0 A | 0 0 B 0 -> 0 0 A B
            emit(method, OpCode::Or, tmp_a1, tmp_b1, dest);
        }
        4 => {
            // A B C D -> B C D A
            let tmp_ac0 = temp(method);
            emit(method, OpCode::Ror, src.clone(), Value::literal(24u32, DataType::INT8), &tmp_ac0);
            // A B C D -> D A B C
            let tmp_bd0 = temp(method);
            emit(method, OpCode::Ror, src.clone(), Value::literal(16u32, DataType::INT8), &tmp_bd0);
            // B C D A -> 0 0 0 A
            let tmp_a1 = temp(method);
            emit(method, OpCode::And, tmp_ac0.clone(), Value::literal(0x0000_00FFu32, DataType::INT32), &tmp_a1);
            // D A B C -> 0 0 B 0
            let tmp_b1 = temp(method);
            emit(method, OpCode::And, tmp_bd0.clone(), Value::literal(0x0000_FF00u32, DataType::INT32), &tmp_b1);
            // B C D A -> 0 C 0 0
            let tmp_c1 = temp(method);
            emit(method, OpCode::And, tmp_ac0, Value::literal(0x00FF_0000u32, DataType::INT32), &tmp_c1);
            // D A B C -> D 0 0 0
            let tmp_d1 = temp(method);
            emit(method, OpCode::And, tmp_bd0, Value::literal(0xFF00_0000u32, DataType::INT32), &tmp_d1);
            // 0 0 0 A | 0 0 B 0 -> 0 0 B A
            let tmp_ab2 = temp(method);
            emit(method, OpCode::Or, tmp_a1, tmp_b1, &tmp_ab2);
            // 0 C 0 0 | D 0 0 0 -> D C 0 0
            let tmp_cd2 = temp(method);
            emit(method, OpCode::Or, tmp_c1, tmp_d1, &tmp_cd2);
            // 0 0 B A | D C 0 0 -> D C B A
            emit(method, OpCode::Or, tmp_ab2, tmp_cd2, dest);
        }
        _ => {
            return Err(Error::UnsupportedWidth {
                stage: CompilationStage::Normalizer,
                width: bits,
            })
        }
    }
    Ok(it)
}
