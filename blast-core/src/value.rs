//! Valores do interpretador
//!
//! Vetor curto (1-4 componentes) com o tipo de dado que acompanha o slot.

use crate::error::{BlastError, BlastResult};
use crate::opcode::BlastOpcode;
use crate::package::BlastDataType;
use crate::simd;
use crate::validation::Validation;

/// Operadores binários
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Greater,
    GreaterEquals,
    Smaller,
    SmallerEquals,
    Equals,
    NotEquals,
    Min,
    Max,
}

impl BinaryOp {
    /// Operador de expressão (`add` … `not_equals`)
    pub fn from_opcode(opcode: BlastOpcode) -> Option<Self> {
        Some(match opcode {
            BlastOpcode::Add => Self::Add,
            BlastOpcode::Substract => Self::Sub,
            BlastOpcode::Multiply => Self::Mul,
            BlastOpcode::Divide => Self::Div,
            BlastOpcode::And => Self::And,
            BlastOpcode::Or => Self::Or,
            BlastOpcode::Xor => Self::Xor,
            BlastOpcode::Greater => Self::Greater,
            BlastOpcode::GreaterEquals => Self::GreaterEquals,
            BlastOpcode::Smaller => Self::Smaller,
            BlastOpcode::SmallerEquals => Self::SmallerEquals,
            BlastOpcode::Equals => Self::Equals,
            BlastOpcode::NotEquals => Self::NotEquals,
            _ => return None,
        })
    }

    /// Operador das atribuições compostas (`assign_add` … `assign_div`)
    pub fn from_fastlane(opcode: BlastOpcode) -> Option<Self> {
        Some(match opcode {
            BlastOpcode::AssignAdd | BlastOpcode::Increment => Self::Add,
            BlastOpcode::AssignSub | BlastOpcode::Decrement => Self::Sub,
            BlastOpcode::AssignMul => Self::Mul,
            BlastOpcode::AssignDiv => Self::Div,
            _ => return None,
        })
    }

    #[inline]
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        simd::dispatch_op!(*self, O => O::apply(a, b))
    }
}

/// Valor de 1-4 componentes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlastValue {
    lanes: [f32; 4],
    width: u8,
    datatype: BlastDataType,
}

impl Default for BlastValue {
    fn default() -> Self {
        Self::scalar(0.0)
    }
}

impl BlastValue {
    pub fn scalar(value: f32) -> Self {
        Self {
            lanes: [value, 0.0, 0.0, 0.0],
            width: 1,
            datatype: BlastDataType::Numeric,
        }
    }

    /// Vetor a partir de 1-4 valores (excedentes são ignorados)
    pub fn vector(values: &[f32]) -> Self {
        let width = values.len().clamp(1, 4);
        let mut lanes = [0.0; 4];
        lanes[..values.len().min(4)].copy_from_slice(&values[..values.len().min(4)]);
        Self {
            lanes,
            width: width as u8,
            datatype: BlastDataType::Numeric,
        }
    }

    /// Escalar Bool32 com bits crus
    pub fn from_bits(bits: u32) -> Self {
        Self::scalar(f32::from_bits(bits)).with_datatype(BlastDataType::Bool32)
    }

    pub fn with_datatype(mut self, datatype: BlastDataType) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn datatype(&self) -> BlastDataType {
        self.datatype
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.lanes[..self.width as usize]
    }

    /// Primeira componente
    pub fn x(&self) -> f32 {
        self.lanes[0]
    }

    /// Componente `i` (escalares são replicados)
    #[inline(always)]
    pub fn lane(&self, i: usize) -> f32 {
        if self.width == 1 { self.lanes[0] } else { self.lanes[i & 3] }
    }

    /// Componentes replicadas até `W`
    pub fn lanes<const W: usize>(&self) -> [f32; W] {
        std::array::from_fn(|i| self.lane(i))
    }

    /// Bits de máscara: crus para Bool32, inteiro truncado caso contrário
    pub fn mask_bits(&self) -> u32 {
        match self.datatype {
            BlastDataType::Bool32 => self.lanes[0].to_bits(),
            _ => self.lanes[0] as u32,
        }
    }

    /// Valor verdadeiro (qualquer componente não-zero)
    pub fn is_truthy(&self) -> bool {
        self.as_slice().iter().any(|v| *v != 0.0)
    }

    pub fn map(mut self, f: impl Fn(f32) -> f32) -> Self {
        for lane in self.lanes[..self.width as usize].iter_mut() {
            *lane = f(*lane);
        }
        self.datatype = BlastDataType::Numeric;
        self
    }

    pub fn negate(self) -> Self {
        self.map(|v| -v)
    }

    pub fn logical_not(self) -> Self {
        self.map(|v| if v == 0.0 { 1.0 } else { 0.0 })
    }

    /// Largura resultante de dois operandos (1 é replicado)
    ///
    /// Larguras distintas e maiores que 1 são erro no modo checked; no modo
    /// fast prevalece a maior.
    pub fn combined_width<V: Validation>(left: u8, right: u8, at: usize) -> BlastResult<u8> {
        if left == right || right == 1 {
            Ok(left)
        } else if left == 1 {
            Ok(right)
        } else if V::CHECKED {
            Err(BlastError::VectorSizeMismatch { left, right, at })
        } else {
            Ok(left.max(right))
        }
    }

    /// Aplica operador componente a componente
    pub fn binary<V: Validation>(self, op: BinaryOp, rhs: Self, at: usize) -> BlastResult<Self> {
        let width = Self::combined_width::<V>(self.width, rhs.width, at)?;
        let mut lanes = [0.0; 4];
        for (i, lane) in lanes.iter_mut().enumerate().take(width as usize) {
            *lane = op.apply(self.lane(i), rhs.lane(i));
        }
        Ok(Self {
            lanes,
            width,
            datatype: BlastDataType::Numeric,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{Checked, Fast};

    #[test]
    fn test_opcode_mapping() {
        assert_eq!(BinaryOp::from_opcode(BlastOpcode::Substract), Some(BinaryOp::Sub));
        assert_eq!(BinaryOp::from_opcode(BlastOpcode::Not), None);
        assert_eq!(BinaryOp::from_fastlane(BlastOpcode::Increment), Some(BinaryOp::Add));
    }

    #[test]
    fn test_scalar_arithmetic() {
        let a = BlastValue::scalar(1.0);
        let b = BlastValue::scalar(2.0);
        assert_eq!(a.binary::<Checked>(BinaryOp::Add, b, 0).unwrap().x(), 3.0);
        assert_eq!(a.binary::<Checked>(BinaryOp::Div, b, 0).unwrap().x(), 0.5);
    }

    #[test]
    fn test_broadcast() {
        let v = BlastValue::vector(&[1.0, 2.0, 3.0]);
        let s = BlastValue::scalar(2.0);
        let r = s.binary::<Checked>(BinaryOp::Mul, v, 0).unwrap();
        assert_eq!(r.as_slice(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_width_mismatch() {
        let a = BlastValue::vector(&[1.0, 2.0]);
        let b = BlastValue::vector(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            a.binary::<Checked>(BinaryOp::Add, b, 7),
            Err(BlastError::VectorSizeMismatch { left: 2, right: 3, at: 7 })
        ));
        assert_eq!(a.binary::<Fast>(BinaryOp::Add, b, 7).unwrap().width(), 3);
    }

    #[test]
    fn test_mask_bits() {
        assert_eq!(BlastValue::from_bits(0x8000_0001).mask_bits(), 0x8000_0001);
        assert_eq!(BlastValue::scalar(5.9).mask_bits(), 5);
    }

    #[test]
    fn test_logical_not() {
        assert_eq!(BlastValue::scalar(0.0).logical_not().x(), 1.0);
        assert_eq!(BlastValue::scalar(3.0).logical_not().x(), 0.0);
    }
}
