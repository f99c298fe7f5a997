//! Assembler e disassembler de BlastScript
//!
//! [`BytecodeWriter`] emite bytecode token a token (o produtor decide a
//! precedência com `begin`/`end`); saltos são emitidos com placeholder e
//! corrigidos por [`BytecodeWriter::patch`]. [`disassemble`] faz o caminho
//! inverso, uma linha por token.

use std::fmt::Write as _;

use crate::cdata::{self, CDataEncoding};
use crate::cursor::CodeCursor;
use crate::error::{BlastError, BlastResult};
use crate::opcode::{BlastOpcode, ID_BASE, is_id};

/// Salto emitido com offset pendente
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "jump offsets must be patched"]
pub struct JumpPatch {
    /// Posição do opcode do salto
    pub at: usize,
    long: bool,
}

/// Emissor de bytecode
#[derive(Debug, Clone, Default)]
pub struct BytecodeWriter {
    code: Vec<u8>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posição do próximo byte
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.code
    }

    /// Bytecode emitido até aqui
    pub fn finish(&self) -> Vec<u8> {
        self.code.clone()
    }

    /// Bytes crus
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn op(&mut self, op: BlastOpcode) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    /// Referência ao slot de dados `slot`
    pub fn id(&mut self, slot: u8) -> &mut Self {
        self.code.push(ID_BASE | slot);
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.op(BlastOpcode::Nop)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op(BlastOpcode::Ret)
    }

    // ═══════════════════════════════════════════════════════════════
    // CONSTANTES
    // ═══════════════════════════════════════════════════════════════

    /// Menor codificação exata: opcode de valor, `constant_f1_h` ou `constant_f1`
    pub fn constant(&mut self, value: f32) -> &mut Self {
        if let Some(op) = value_opcode(value) {
            return self.op(op);
        }
        let half = cdata::encode_fp16(value);
        if cdata::map_cdata_fp16(half) == value {
            self.op(BlastOpcode::ConstantF1H);
            return self.raw(&half);
        }
        self.constant_f1(value)
    }

    /// Constante f32 completa (alvo de `constant_short_ref`/`constant_long_ref`)
    pub fn constant_f1(&mut self, value: f32) -> &mut Self {
        self.op(BlastOpcode::ConstantF1);
        self.raw(&value.to_le_bytes())
    }

    /// Referência a uma constante já emitida em `target`
    pub fn constant_ref(&mut self, target: usize) -> BlastResult<&mut Self> {
        let at = self.position();
        let delta = at
            .checked_sub(target)
            .ok_or(BlastError::InvalidPackage(format!("constant at {} is ahead of {}", target, at)))?;
        match u8::try_from(delta) {
            Ok(short) => {
                self.op(BlastOpcode::ConstantShortRef);
                self.code.push(short);
            }
            Err(_) => {
                let long = u16::try_from(delta).map_err(|_| {
                    BlastError::InvalidPackage(format!("constant reference distance {} exceeds 16 bits", delta))
                })?;
                self.op(BlastOpcode::ConstantLongRef);
                self.raw(&long.to_be_bytes());
            }
        }
        Ok(self)
    }

    // ═══════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════

    /// `assign id` (seguido de expressão terminada em `nop`)
    pub fn assign(&mut self, slot: u8) -> &mut Self {
        self.op(BlastOpcode::Assign).id(slot)
    }

    /// `assigns id constant`
    pub fn assigns(&mut self, slot: u8, value: f32) -> &mut Self {
        self.op(BlastOpcode::Assigns).id(slot).constant(value)
    }

    /// `assignv id` (seguido de um operando por componente)
    pub fn assignv(&mut self, slot: u8) -> &mut Self {
        self.op(BlastOpcode::Assignv).id(slot)
    }

    /// `assigncd cdataref` (seguido de índice e expressão terminada em `nop`)
    pub fn assigncd(&mut self, block: usize) -> BlastResult<&mut Self> {
        self.op(BlastOpcode::AssignCData);
        self.cdataref(block)
    }

    /// `push` (seguido de expressão terminada em `nop`)
    pub fn push(&mut self) -> &mut Self {
        self.op(BlastOpcode::Push)
    }

    /// `pushv n c0..cn`
    pub fn pushv(&mut self, values: &[f32]) -> &mut Self {
        self.op(BlastOpcode::Pushv);
        self.code.push(values.len() as u8);
        for value in values {
            self.constant(*value);
        }
        self
    }

    /// `call id` (seguido dos parâmetros)
    pub fn call(&mut self, function: u8) -> &mut Self {
        self.op(BlastOpcode::Call);
        self.code.push(function);
        self
    }

    /// Atribuição composta `assign_add`..`assign_div` (seguida do operando)
    pub fn fastlane(&mut self, op: BlastOpcode, slot: u8) -> &mut Self {
        self.op(op).id(slot)
    }

    pub fn increment(&mut self, slot: u8) -> &mut Self {
        self.fastlane(BlastOpcode::Increment, slot)
    }

    pub fn decrement(&mut self, slot: u8) -> &mut Self {
        self.fastlane(BlastOpcode::Decrement, slot)
    }

    // ═══════════════════════════════════════════════════════════════
    // SALTOS
    // ═══════════════════════════════════════════════════════════════

    fn short_jump(&mut self, op: BlastOpcode) -> JumpPatch {
        let at = self.position();
        self.op(op);
        self.code.push(0);
        JumpPatch { at, long: false }
    }

    /// `jump` para frente; destino definido por [`patch`](Self::patch)
    pub fn jump(&mut self) -> JumpPatch {
        self.short_jump(BlastOpcode::Jump)
    }

    /// `jz` (seguido da condição terminada em `nop`)
    pub fn jz(&mut self) -> JumpPatch {
        self.short_jump(BlastOpcode::Jz)
    }

    /// `jnz` (seguido da condição terminada em `nop`)
    pub fn jnz(&mut self) -> JumpPatch {
        self.short_jump(BlastOpcode::Jnz)
    }

    /// `jump_long` com offset pendente
    pub fn jump_long(&mut self) -> JumpPatch {
        let at = self.position();
        self.op(BlastOpcode::JumpLong);
        self.raw(&[0, 0]);
        JumpPatch { at, long: true }
    }

    /// Aponta o salto para a posição atual
    pub fn patch(&mut self, jump: JumpPatch) -> BlastResult<()> {
        let offset = self.position() - jump.at;
        if jump.long {
            let offset = i16::try_from(offset).map_err(|_| jump_range(jump.at, offset))?;
            self.code[jump.at + 1..jump.at + 3].copy_from_slice(&offset.to_be_bytes());
        } else {
            self.code[jump.at + 1] = u8::try_from(offset).map_err(|_| jump_range(jump.at, offset))?;
        }
        Ok(())
    }

    /// `jump_back` até `target`
    pub fn jump_back_to(&mut self, target: usize) -> BlastResult<&mut Self> {
        let at = self.position();
        let offset = at
            .checked_sub(target)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| jump_range(at, at.abs_diff(target)))?;
        self.op(BlastOpcode::JumpBack);
        self.code.push(offset);
        Ok(self)
    }

    /// `jump_long` até uma posição já conhecida (para trás ou para frente)
    pub fn jump_long_to(&mut self, target: usize) -> BlastResult<&mut Self> {
        let at = self.position();
        let offset = i16::try_from(target as isize - at as isize)
            .map_err(|_| jump_range(at, at.abs_diff(target)))?;
        self.op(BlastOpcode::JumpLong);
        self.raw(&offset.to_be_bytes());
        Ok(self)
    }

    // ═══════════════════════════════════════════════════════════════
    // CDATA
    // ═══════════════════════════════════════════════════════════════

    /// Emite um bloco CDATA e retorna sua posição
    pub fn cdata_block(&mut self, encoding: CDataEncoding, values: &[f32]) -> BlastResult<usize> {
        let at = self.position();
        let block = cdata::encode_cdata_block(encoding, values)?;
        self.code.extend_from_slice(&block);
        Ok(at)
    }

    /// `cdataref` para o bloco em `block` (seguido do índice)
    pub fn cdataref(&mut self, block: usize) -> BlastResult<&mut Self> {
        let reference = cdata::encode_cdataref(self.position(), block)?;
        Ok(self.raw(&reference))
    }
}

fn jump_range(at: usize, distance: usize) -> BlastError {
    BlastError::InvalidPackage(format!("jump at {} cannot reach distance {}", at, distance))
}

/// Opcode de valor que representa `value` exatamente
fn value_opcode(value: f32) -> Option<BlastOpcode> {
    use BlastOpcode::*;
    if value.is_nan() {
        return Some(Nan);
    }
    [
        Value0, Value1, Value2, Value4, Value10, ValueHalf, Pi, InvPi, Epsilon, Infinity,
        NegativeInfinity, MinValue, MaxValue,
    ]
    .into_iter()
    .find(|op| op.constant_value().is_some_and(|c| c.to_bits() == value.to_bits()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISASSEMBLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Disassembla bytecode, uma linha por token
pub fn disassemble(code: &[u8]) -> BlastResult<String> {
    let mut output = String::new();
    let mut cursor = CodeCursor::new(code, 0);

    while !cursor.at_end() {
        let at = cursor.position();
        let byte = cursor.read_u8()?;

        let (mnemonic, operand) = if is_id(byte) {
            ("id", format!("{}", byte - ID_BASE))
        } else {
            let op = BlastOpcode::from_byte(byte).ok_or(BlastError::UnknownOpcode { opcode: byte, at })?;
            (op.mnemonic(), operand_text(op, at, &mut cursor)?)
        };

        let bytes = &code[at..cursor.position()];
        let mut dump = hex::encode(&bytes[..bytes.len().min(8)]);
        if bytes.len() > 8 {
            dump.push_str("..");
        }
        let _ = writeln!(output, "{:04X}:  {:<18} {:<20} {}", at, dump, mnemonic, operand);
    }

    Ok(output)
}

/// Lê os operandos inline de `op` e os descreve
fn operand_text(op: BlastOpcode, at: usize, cursor: &mut CodeCursor<&[u8]>) -> BlastResult<String> {
    Ok(match op {
        BlastOpcode::Jump | BlastOpcode::Jz | BlastOpcode::Jnz => {
            let offset = cursor.read_u8()? as usize;
            format!("-> {:04X}", at + offset)
        }
        BlastOpcode::JumpBack => {
            let offset = cursor.read_u8()? as usize;
            format!("-> {:04X}", at.saturating_sub(offset))
        }
        BlastOpcode::JumpLong => {
            let offset = cursor.read_i16_be()? as isize;
            format!("-> {:04X}", at.saturating_add_signed(offset))
        }
        BlastOpcode::ConstantF1 => format!("{}", cursor.read_f32()?),
        BlastOpcode::ConstantF1H => format!("{}", cursor.read_f16()?),
        BlastOpcode::ConstantShortRef => {
            let delta = cursor.read_u8()? as usize;
            format!("@{:04X}", at.saturating_sub(delta))
        }
        BlastOpcode::ConstantLongRef => {
            let delta = cursor.read_u16_be()? as usize;
            format!("@{:04X}", at.saturating_sub(delta))
        }
        BlastOpcode::Pushv => format!("{}", cursor.read_u8()?),
        BlastOpcode::Call => format!("fn {}", cursor.read_u8()?),
        BlastOpcode::CDataRef => {
            let delta = cursor.read_u16_be()? as usize;
            format!("@{:04X}", (at + 1).saturating_sub(delta))
        }
        _ if op.is_cdata_header() => {
            let length = cursor.read_u16_be()? as usize;
            let encoding = CDataEncoding::from_tag(op as u8).unwrap_or(CDataEncoding::None);
            let payload = cursor.position();
            cursor.skip(length);
            if cursor.position() > cursor.len() {
                return Err(BlastError::UnexpectedEndOfCode(payload));
            }
            format!("{} bytes, {} elements", length, cdata::cdata_element_count(encoding, length))
        }
        _ => op.constant_value().map(|v| format!("{}", v)).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_picks_shortest_encoding() {
        let mut w = BytecodeWriter::new();
        w.constant(1.0).constant(0.5).constant(2.5).constant(0.1);
        let code = w.finish();
        assert_eq!(code[0], BlastOpcode::Value1 as u8);
        assert_eq!(code[1], BlastOpcode::ValueHalf as u8);
        assert_eq!(code[2], BlastOpcode::ConstantF1H as u8);
        assert_eq!(code[5], BlastOpcode::ConstantF1 as u8);
        assert_eq!(&code[6..10], &0.1f32.to_le_bytes());
    }

    #[test]
    fn test_patch_forward_jump() {
        let mut w = BytecodeWriter::new();
        w.nop();
        let jump = w.jz();
        w.id(0).nop().ret();
        w.patch(jump).unwrap();
        assert_eq!(w.as_bytes()[2], 5);
    }

    #[test]
    fn test_jump_back_range() {
        let mut w = BytecodeWriter::new();
        w.raw(&[0; 300]);
        assert!(w.jump_back_to(0).is_err());
        assert!(w.jump_back_to(100).is_ok());
        let at = w.position();
        w.jump_long_to(0).unwrap();
        assert_eq!(&w.as_bytes()[at + 1..at + 3], &(-(at as i16)).to_be_bytes());
    }

    #[test]
    fn test_constant_ref() {
        let mut w = BytecodeWriter::new();
        w.constant_f1(3.25);
        w.raw(&[0; 10]);
        w.constant_ref(0).unwrap();
        assert_eq!(&w.as_bytes()[15..], &[BlastOpcode::ConstantShortRef as u8, 15]);
        w.raw(&[0; 300]);
        w.constant_ref(0).unwrap();
        assert_eq!(w.as_bytes()[317], BlastOpcode::ConstantLongRef as u8);
    }

    #[test]
    fn test_disassemble_lines() {
        let mut w = BytecodeWriter::new();
        let skip = w.jump();
        let block = w.cdata_block(CDataEncoding::U8Fp32, &[200.0, 1.0]).unwrap();
        w.patch(skip).unwrap();
        w.assign(3).cdataref(block).unwrap();
        w.constant(0.0).op(BlastOpcode::Add).constant(7.5).nop().ret();

        let text = disassemble(&w.finish()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("jump") && lines[0].contains("-> 0007"));
        assert!(lines[1].contains("cdata_u8_fp32") && lines[1].contains("2 elements"));
        assert!(lines[3].contains("id") && lines[3].trim_end().ends_with('3'));
        assert!(lines[4].contains("cdataref") && lines[4].contains("@0002"));
        assert!(text.contains("constant_f1_h"));
        assert!(lines.last().unwrap().contains("ret"));
    }

    #[test]
    fn test_disassemble_rejects_unknown() {
        assert!(matches!(
            disassemble(&[0x00, 0x6F]),
            Err(BlastError::UnknownOpcode { opcode: 0x6F, at: 1 })
        ));
    }
}
