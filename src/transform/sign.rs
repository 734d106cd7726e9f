//! Sign normalization and restoration.
//!
//! Division-like lowerings work on magnitudes: [`insert_make_positive`]
//! splits a signed value into its absolute value and a per-lane sign mask,
//! and [`insert_restore_sign`] applies such a mask back onto a result.
//!
//! The branchless sequence used for symbolic operands is the classic
//! two's complement identity
//!
//! ```text
//! %sign     = asr %src, 31        ; -1 for negative, 0 for positive
//! %tmp      = xor %src, %sign
//! %unsigned = sub %tmp, %sign
//! ```
//!
//! which restores with the same xor/sub pair.

use crate::error::{CompilationStage, Error, Result};
use crate::ir::instruction::{Decorations, Instruction, OpCode};
use crate::ir::method::Method;
use crate::ir::types::DataType;
use crate::ir::value::{Literal, SimdVector, Value};
use crate::ir::walker::Walker;

/// The outcome of a sign normalization.
#[derive(Debug, Clone)]
pub struct SignSplit {
    /// The non-negative magnitude, `|src|` per lane.
    pub dest: Value,
    /// The per-lane sign mask: `-1` where `src` was negative, else `0`.
    pub is_negative: Value,
}

/// Emits a sign extension of `src` into the 32-bit wide `dest`.
///
/// The value is extended by shifting the significant bits to the top and
/// arithmetically shifting them back down.
///
/// # Errors
///
/// [`Error::InvalidOperand`] if `src` has no scalar bit count.
pub fn insert_sign_extension(
    method: &mut Method,
    it: Walker,
    src: &Value,
    dest: &Value,
) -> Result<Walker> {
    let bits = scalar_bits(method, src)?;
    let shift = Value::literal(i32::from(32 - bits), DataType::INT8);
    let shifted = method.add_new_local(dest.ty.clone(), "%sext");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Shl,
            vec![src.clone(), shift.clone()],
            Some(shifted.clone()),
        ),
    );
    method.emplace(
        it,
        Instruction::new(OpCode::Asr, vec![shifted, shift], Some(dest.clone())),
    );
    Ok(it)
}

/// Emits `dest = |src|` together with a per-lane sign mask.
///
/// - Literal and vector sources fold statically; `i32::MIN` wraps to
///   itself by the two's complement convention.
/// - A source whose single writer is decorated `UNSIGNED_RESULT` is
///   passed through unchanged with a zero mask.
/// - Any other source gets the branchless asr/xor/sub sequence; the
///   defining instruction of the magnitude is decorated
///   `UNSIGNED_RESULT`.
///
/// # Errors
///
/// [`Error::InvalidOperand`] if `src` is undefined or has no scalar bit
/// count.
pub fn insert_make_positive(
    method: &mut Method,
    it: Walker,
    src: &Value,
) -> Result<(Walker, SignSplit)> {
    let bits = scalar_bits(method, src)?;

    if let Some(literal) = src.literal_value() {
        let negative = literal.signed() < 0;
        let dest = if negative {
            Value::literal(literal.signed().wrapping_neg(), src.ty.clone())
        } else {
            src.clone()
        };
        let is_negative = if negative { Value::int(-1) } else { Value::int(0) };
        return Ok((it, SignSplit { dest, is_negative }));
    }

    if let Some(vector) = src.check_vector() {
        let mut magnitudes = Vec::with_capacity(vector.width());
        let mut masks = Vec::with_capacity(vector.width());
        for lane in vector.lanes() {
            let negative = lane.signed() < 0;
            magnitudes.push(if negative {
                Literal::from(lane.signed().wrapping_neg())
            } else {
                *lane
            });
            masks.push(if negative {
                Literal::from(-1i32)
            } else {
                Literal::from(0u32)
            });
        }
        let dest = Value::vector(SimdVector::new(magnitudes), src.ty.clone());
        let is_negative = Value::vector(SimdVector::new(masks), src.ty.clone());
        return Ok((it, SignSplit { dest, is_negative }));
    }

    if single_writer_is_unsigned(method, src) {
        // the value is already unsigned
        return Ok((
            it,
            SignSplit {
                dest: src.clone(),
                is_negative: Value::int(0),
            },
        ));
    }

    let width = src.ty.vector_width();
    let int_ty = DataType::INT32.to_vector(width);
    let mut src_int = src.clone();
    if bits < 32 {
        // make sure the leading bits are set
        let extended = method.add_new_local(int_ty.clone(), "%sext");
        insert_sign_extension(method, it, src, &extended)?;
        src_int = extended;
    }

    let is_negative = method.add_new_local(int_ty, "%sign");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Asr,
            vec![src_int.clone(), Value::literal(31i32, DataType::INT8)],
            Some(is_negative.clone()),
        ),
    );
    let tmp = method.add_new_local(src.ty.clone(), "%twos_complement");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Xor,
            vec![src_int, is_negative.clone()],
            Some(tmp.clone()),
        ),
    );
    let dest = method.add_new_local(src.ty.clone(), "%unsigned");
    method.emplace(
        it,
        Instruction::new(OpCode::Sub, vec![tmp, is_negative.clone()], Some(dest.clone()))
            .with_decorations(Decorations::UNSIGNED_RESULT),
    );
    Ok((it, SignSplit { dest, is_negative }))
}

/// Emits `dest = (src ^ sign) - sign`, undoing a sign normalization.
///
/// If both inputs are literal the result folds statically.
///
/// # Errors
///
/// [`Error::InvalidOperand`] if `src` is undefined.
pub fn insert_restore_sign(
    method: &mut Method,
    it: Walker,
    src: &Value,
    sign: &Value,
) -> Result<(Walker, Value)> {
    if src.is_undefined() {
        return Err(Error::InvalidOperand {
            stage: CompilationStage::Normalizer,
            detail: format!("cannot restore sign of {}", method.describe(src)),
        });
    }
    if let (Some(literal), Some(_)) = (src.literal_value(), sign.literal_value()) {
        let dest = if sign.is_zero_initializer() {
            src.clone()
        } else {
            Value::literal(literal.signed().wrapping_neg(), src.ty.clone())
        };
        return Ok((it, dest));
    }

    let tmp = method.add_new_local(src.ty.clone(), "%twos_complement");
    method.emplace(
        it,
        Instruction::new(
            OpCode::Xor,
            vec![src.clone(), sign.clone()],
            Some(tmp.clone()),
        ),
    );
    let dest = method.add_new_local(src.ty.clone(), "%twos_complement");
    method.emplace(
        it,
        Instruction::new(OpCode::Sub, vec![tmp, sign.clone()], Some(dest.clone())),
    );
    Ok((it, dest))
}

fn scalar_bits(method: &Method, src: &Value) -> Result<u8> {
    if src.is_undefined() {
        return Err(Error::InvalidOperand {
            stage: CompilationStage::Normalizer,
            detail: "undefined value has no sign".to_string(),
        });
    }
    src.ty.scalar_bit_count().ok_or_else(|| Error::InvalidOperand {
        stage: CompilationStage::Normalizer,
        detail: format!("{} has no scalar bit count", method.describe(src)),
    })
}

fn single_writer_is_unsigned(method: &Method, src: &Value) -> bool {
    let Some(id) = src.check_local() else {
        return false;
    };
    let Some(writer) = method.local(id).single_writer() else {
        return false;
    };
    method
        .instruction_at(writer)
        .is_some_and(|instr| instr.has_decoration(Decorations::UNSIGNED_RESULT))
}
