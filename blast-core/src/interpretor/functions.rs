//! Funções builtin e operações de bit
//!
//! Semântica compartilhada pelos interpretadores escalar e SSMD.

use crate::error::{BlastError, BlastResult};
use crate::opcode::BlastOpcode;
use crate::package::BlastDataType;
use crate::validation::Validation;
use crate::value::{BinaryOp, BlastValue};

// ═══════════════════════════════════════════════════════════════════════════════
// BUILTINS
// ═══════════════════════════════════════════════════════════════════════════════

#[inline]
fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        v
    }
}

fn ternary<V: Validation>(
    params: &[BlastValue],
    at: usize,
    f: impl Fn(f32, f32, f32) -> f32,
) -> BlastResult<BlastValue> {
    let width = BlastValue::combined_width::<V>(params[0].width(), params[1].width(), at)?;
    let width = BlastValue::combined_width::<V>(width, params[2].width(), at)? as usize;
    let mut lanes = [0.0f32; 4];
    for (i, lane) in lanes.iter_mut().enumerate().take(width) {
        *lane = f(params[0].lane(i), params[1].lane(i), params[2].lane(i));
    }
    Ok(BlastValue::vector(&lanes[..width]))
}

/// Avalia função builtin sobre parâmetros já lidos
pub fn builtin<V: Validation>(
    op: BlastOpcode,
    params: &[BlastValue],
    at: usize,
) -> BlastResult<BlastValue> {
    let expected = op.builtin_parameter_count().ok_or(BlastError::UnsupportedOpcode {
        opcode: op.mnemonic(),
        at,
    })?;
    if params.len() != expected {
        return Err(BlastError::TooManyParameters {
            count: params.len(),
            max: expected,
            at,
        });
    }

    let x = params[0];
    Ok(match op {
        BlastOpcode::Abs => x.map(f32::abs),
        BlastOpcode::Sqrt => x.map(f32::sqrt),
        BlastOpcode::Sin => x.map(f32::sin),
        BlastOpcode::Cos => x.map(f32::cos),
        BlastOpcode::Floor => x.map(f32::floor),
        BlastOpcode::Ceil => x.map(f32::ceil),
        BlastOpcode::Sign => x.map(sign),
        BlastOpcode::Frac => x.map(|v| v - v.floor()),
        BlastOpcode::Length => {
            BlastValue::scalar(x.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt())
        }
        BlastOpcode::Min => x.binary::<V>(BinaryOp::Min, params[1], at)?,
        BlastOpcode::Max => x.binary::<V>(BinaryOp::Max, params[1], at)?,
        BlastOpcode::Fma => ternary::<V>(params, at, |a, b, c| a.mul_add(b, c))?,
        BlastOpcode::Lerp => ternary::<V>(params, at, |a, b, t| a + (b - a) * t)?,
        BlastOpcode::Clamp => ternary::<V>(params, at, |v, lo, hi| v.max(lo).min(hi))?,
        BlastOpcode::Select => {
            ternary::<V>(params, at, |a, b, c| if c != 0.0 { b } else { a })?
        }
        _ => {
            return Err(BlastError::UnsupportedOpcode {
                opcode: op.mnemonic(),
                at,
            });
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// BITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Bits de um slot: crus para Bool32, inteiro truncado caso contrário
#[inline(always)]
pub fn slot_bits(value: f32, datatype: BlastDataType) -> u32 {
    match datatype {
        BlastDataType::Bool32 => value.to_bits(),
        _ => value as u32,
    }
}

/// Inverso de [`slot_bits`]
#[inline(always)]
pub fn bits_to_slot(bits: u32, datatype: BlastDataType) -> f32 {
    match datatype {
        BlastDataType::Bool32 => f32::from_bits(bits),
        _ => bits as f32,
    }
}

/// Quantidade de shift/rotate: truncada, não arredondada
#[inline(always)]
pub fn bit_amount(value: f32) -> i32 {
    value as i32
}

#[inline(always)]
fn truth(condition: bool) -> f32 {
    if condition { 1.0 } else { 0.0 }
}

#[inline(always)]
pub fn get_bit(bits: u32, index: f32) -> f32 {
    let index = bit_amount(index);
    truth((0..32).contains(&index) && (bits >> index) & 1 == 1)
}

#[inline(always)]
pub fn get_bits(bits: u32, mask: u32) -> f32 {
    truth(bits & mask == mask)
}

#[inline(always)]
pub fn set_bit(bits: u32, index: f32, value: bool) -> u32 {
    let index = bit_amount(index);
    if !(0..32).contains(&index) {
        return bits;
    }
    if value { bits | (1 << index) } else { bits & !(1 << index) }
}

#[inline(always)]
pub fn set_bits(bits: u32, mask: u32, value: bool) -> u32 {
    if value { bits | mask } else { bits & !mask }
}

#[inline(always)]
pub fn rol(bits: u32, amount: f32) -> u32 {
    bits.rotate_left(bit_amount(amount).rem_euclid(32) as u32)
}

#[inline(always)]
pub fn ror(bits: u32, amount: f32) -> u32 {
    bits.rotate_right(bit_amount(amount).rem_euclid(32) as u32)
}

#[inline(always)]
pub fn shl(bits: u32, amount: f32) -> u32 {
    let amount = bit_amount(amount);
    if (0..32).contains(&amount) { bits << amount } else { 0 }
}

#[inline(always)]
pub fn shr(bits: u32, amount: f32) -> u32 {
    let amount = bit_amount(amount);
    if (0..32).contains(&amount) { bits >> amount } else { 0 }
}

/// Contagens de bits (`tzcnt` de zero = 32)
#[inline(always)]
pub fn count(op: BlastOpcode, bits: u32) -> f32 {
    match op {
        BlastOpcode::Tzcnt => bits.trailing_zeros() as f32,
        BlastOpcode::Lzcnt => bits.leading_zeros() as f32,
        _ => bits.count_ones() as f32,
    }
}

/// Aplica uma operação de bit in-place de um parâmetro (rol/ror/shr/shl)
#[inline(always)]
pub fn shift(op: BlastOpcode, bits: u32, amount: f32) -> u32 {
    match op {
        BlastOpcode::Rol => rol(bits, amount),
        BlastOpcode::Ror => ror(bits, amount),
        BlastOpcode::Shl => shl(bits, amount),
        _ => shr(bits, amount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Checked;

    fn call(op: BlastOpcode, params: &[BlastValue]) -> BlastValue {
        builtin::<Checked>(op, params, 0).unwrap()
    }

    #[test]
    fn test_unary_builtins() {
        let v = BlastValue::vector(&[-1.5, 2.25]);
        assert_eq!(call(BlastOpcode::Abs, &[v]).as_slice(), &[1.5, 2.25]);
        assert_eq!(call(BlastOpcode::Floor, &[v]).as_slice(), &[-2.0, 2.0]);
        assert_eq!(call(BlastOpcode::Frac, &[v]).as_slice(), &[0.5, 0.25]);
        assert_eq!(call(BlastOpcode::Sign, &[BlastValue::scalar(0.0)]).x(), 0.0);
        let len = call(BlastOpcode::Length, &[BlastValue::vector(&[3.0, 4.0])]);
        assert_eq!((len.width(), len.x()), (1, 5.0));
    }

    #[test]
    fn test_ternary_builtins() {
        let s = BlastValue::scalar;
        assert_eq!(call(BlastOpcode::Fma, &[s(2.0), s(3.0), s(1.0)]).x(), 7.0);
        assert_eq!(call(BlastOpcode::Lerp, &[s(0.0), s(10.0), s(0.25)]).x(), 2.5);
        assert_eq!(call(BlastOpcode::Clamp, &[s(12.0), s(0.0), s(10.0)]).x(), 10.0);
        assert_eq!(call(BlastOpcode::Select, &[s(1.0), s(2.0), s(0.0)]).x(), 1.0);
        let v = BlastValue::vector(&[1.0, 5.0]);
        assert_eq!(call(BlastOpcode::Max, &[v, s(3.0)]).as_slice(), &[3.0, 5.0]);
    }

    #[test]
    fn test_wrong_parameter_count() {
        let result = builtin::<Checked>(BlastOpcode::Abs, &[BlastValue::scalar(1.0); 2], 4);
        assert!(matches!(result, Err(BlastError::TooManyParameters { count: 2, max: 1, at: 4 })));
    }

    #[test]
    fn test_bit_operations() {
        assert_eq!(get_bit(0b100, 2.0), 1.0);
        assert_eq!(get_bits(0b1110, 0b0110), 1.0);
        assert_eq!(get_bits(0b1010, 0b0110), 0.0);
        assert_eq!(set_bit(0, 31.0, true), 0x8000_0000);
        assert_eq!(set_bits(0xFF, 0x0F, false), 0xF0);
        assert_eq!(rol(0x8000_0001, 1.9), 0x0000_0003);
        assert_eq!(ror(0x0000_0003, 1.0), 0x8000_0001);
        assert_eq!(shl(1, 40.0), 0);
        assert_eq!(shr(0x10, 4.0), 1);
        assert_eq!(count(BlastOpcode::Tzcnt, 0), 32.0);
        assert_eq!(count(BlastOpcode::Lzcnt, 1), 31.0);
        assert_eq!(count(BlastOpcode::CountBits, 0xF0F0), 8.0);
    }

    #[test]
    fn test_slot_bits() {
        assert_eq!(slot_bits(5.0, BlastDataType::Numeric), 5);
        assert_eq!(slot_bits(f32::from_bits(7), BlastDataType::Bool32), 7);
        assert_eq!(bits_to_slot(6, BlastDataType::Numeric), 6.0);
    }
}
