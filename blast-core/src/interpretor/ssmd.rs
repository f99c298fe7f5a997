//! Interpretador SSMD (single script, multiple data)
//!
//! Executa o mesmo package sobre N registros em lockstep. Cada registro contém
//! dados seguidos da stack; o stack pointer é compartilhado porque todos os
//! registros seguem o mesmo fluxo de controle.
//!
//! Operandos são classificados uma vez por operação:
//!
//! - constante: literal, ref de constante ou slot com tipo `Id` (uniforme);
//! - indexado: slot de dados/stack em offset fixo dentro de cada registro;
//! - registrador: resultado intermediário, um array `N × largura` no scratch.
//!
//! A combinação dos dois lados escolhe o kernel SIMD certo fora do loop de
//! registros. Um `jz`/`jnz` cuja condição diverge entre registros entrega cada
//! registro ao [`BlastInterpretor`] no destino que a sua condição escolheu.

use std::marker::PhantomData;

use tracing::{debug, trace};

use crate::cdata::{CDataEncoding, follow_cdataref};
use crate::cursor::CodeCursor;
use crate::engine::BlastEngine;
use crate::error::{BlastError, BlastResult};
use crate::opcode::{BlastOpcode, ID_BASE, is_id};
use crate::package::{
    BlastDataBlock, BlastDataType, BlastPackage, Segments, datatype_of, pack_metadata,
    retag_metadata, vector_size_of,
};
use crate::simd::{self, dispatch_op, dispatch_width};
use crate::validation::{DefaultValidation, Validation};
use crate::value::{BinaryOp, BlastValue};

use super::functions::{self, bits_to_slot, slot_bits};
use super::scalar::BlastInterpretor;
use super::{
    Exit, ResumePoint, cdata_element, exit_code, resolve_constant_ref, write_cdata_element,
};

// ═══════════════════════════════════════════════════════════════════════════════
// SCRATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Arena de registradores do SSMD
///
/// Registradores são reciclados a cada statement; a memória fica com o
/// interpretador entre execuções.
#[derive(Debug, Default)]
pub struct SsmdScratch {
    registers: Vec<Vec<f32>>,
    used: usize,
}

impl SsmdScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registradores já alocados
    pub fn capacity(&self) -> usize {
        self.registers.len()
    }

    fn reset(&mut self) {
        self.used = 0;
    }

    /// Registrador zerado com `len` floats
    fn alloc(&mut self, len: usize) -> usize {
        if self.used == self.registers.len() {
            self.registers.push(Vec::with_capacity(len));
        }
        let reg = self.used;
        self.registers[reg].clear();
        self.registers[reg].resize(len, 0.0);
        self.used += 1;
        reg
    }

    #[inline]
    fn get(&self, reg: usize) -> &[f32] {
        &self.registers[reg]
    }

    #[inline]
    fn get_mut(&mut self, reg: usize) -> &mut [f32] {
        &mut self.registers[reg]
    }

    /// Destino mutável e origem imutável distintos
    fn pair_mut(&mut self, dst: usize, src: usize) -> (&mut [f32], &[f32]) {
        debug_assert_ne!(dst, src);
        if dst < src {
            let (lo, hi) = self.registers.split_at_mut(src);
            (&mut lo[dst], &hi[0])
        } else {
            let (lo, hi) = self.registers.split_at_mut(dst);
            (&mut hi[0], &lo[src])
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERANDOS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum SsmdOperand {
    /// Mesmo valor em todos os registros
    Constant(BlastValue),
    /// Offset em bytes dentro de cada registro
    Indexed {
        offset: usize,
        width: u8,
        datatype: BlastDataType,
    },
    /// Registrador do scratch (`N × width`)
    Register {
        reg: usize,
        width: u8,
        datatype: BlastDataType,
    },
}

impl SsmdOperand {
    fn width(&self) -> u8 {
        match self {
            Self::Constant(v) => v.width(),
            Self::Indexed { width, .. } | Self::Register { width, .. } => *width,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPRETADOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Interpretador SSMD
#[derive(Debug, Default)]
pub struct BlastSSMDInterpretor<V: Validation = DefaultValidation> {
    scratch: SsmdScratch,
    _validation: PhantomData<V>,
}

impl<V: Validation> BlastSSMDInterpretor<V> {
    pub fn new() -> Self {
        Self {
            scratch: SsmdScratch::new(),
            _validation: PhantomData,
        }
    }

    /// Scratch reutilizado entre execuções
    pub fn scratch(&self) -> &SsmdScratch {
        &self.scratch
    }

    /// Executa o package sobre todos os registros
    ///
    /// Cada registro deve ter ao menos `data_size + stack_size` bytes do package.
    pub fn execute<R>(
        &mut self,
        engine: &BlastEngine,
        package: &mut BlastPackage,
        records: &mut [R],
    ) -> BlastResult<Exit>
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.resume(engine, package, records, ResumePoint::default())
    }

    /// Continua um lote que executou `yield`
    pub fn resume<R>(
        &mut self,
        engine: &BlastEngine,
        package: &mut BlastPackage,
        records: &mut [R],
        point: ResumePoint,
    ) -> BlastResult<Exit>
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let data_size = package.data_size();
        let stack_size = package.stack_size();
        let required = data_size + stack_size;
        if let Some((index, record)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.as_ref().len() < required)
        {
            return Err(BlastError::RecordTooSmall {
                index,
                expected: required,
                found: record.as_ref().len(),
            });
        }
        if records.is_empty() {
            debug!("ssmd execution with no records");
            return Ok(Exit::Completed);
        }

        let segments = package.segments_mut()?;
        trace!(
            records = records.len(),
            code_pointer = point.code_pointer,
            stack_pointer = point.stack_pointer,
            "ssmd execution start"
        );

        let mut frame = SsmdFrame::<V, R> {
            cursor: CodeCursor::new(segments.code, point.code_pointer),
            metadata: segments.metadata,
            records,
            scratch: &mut self.scratch,
            data_slots: data_size / 4,
            data_size,
            stack_size,
            stack_capacity: stack_size / 4,
            sp: point.stack_pointer,
            engine,
            _validation: PhantomData,
        };

        let result = frame.run();
        match &result {
            Ok(exit) => trace!(?exit, "ssmd execution finished"),
            Err(err) => debug!(error = %err, code = err.code(), "ssmd execution failed"),
        }
        result
    }

    /// Executa sobre os registros de um [`BlastDataBlock`]
    pub fn execute_block(
        &mut self,
        engine: &BlastEngine,
        package: &mut BlastPackage,
        block: &mut BlastDataBlock,
    ) -> BlastResult<Exit> {
        let mut records = block.records_mut();
        self.execute(engine, package, &mut records)
    }

    /// Contrato inteiro: 0 concluído, 1 yield, negativo erro
    pub fn execute_code<R>(
        &mut self,
        engine: &BlastEngine,
        package: &mut BlastPackage,
        records: &mut [R],
    ) -> i32
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        exit_code(&self.execute(engine, package, records))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAME
// ═══════════════════════════════════════════════════════════════════════════════

struct SsmdFrame<'a, V: Validation, R> {
    cursor: CodeCursor<&'a mut [u8]>,
    metadata: &'a mut [u8],
    records: &'a mut [R],
    scratch: &'a mut SsmdScratch,
    data_slots: usize,
    data_size: usize,
    stack_size: usize,
    stack_capacity: usize,
    sp: usize,
    engine: &'a BlastEngine,
    _validation: PhantomData<V>,
}

impl<V: Validation, R: AsRef<[u8]> + AsMut<[u8]>> SsmdFrame<'_, V, R> {
    fn run(&mut self) -> BlastResult<Exit> {
        loop {
            if self.cursor.at_end() {
                return Ok(Exit::Completed);
            }
            self.scratch.reset();

            let at = self.cursor.position();
            let op = self.cursor.read_opcode()?;

            match op {
                BlastOpcode::Nop => {}
                BlastOpcode::Ret => return Ok(Exit::Completed),
                BlastOpcode::Yield => {
                    return Ok(Exit::Yielded(ResumePoint {
                        code_pointer: self.cursor.position(),
                        stack_pointer: self.sp,
                    }));
                }

                BlastOpcode::Assign => {
                    let (offset, width) = self.read_target(at)?;
                    let value = self.eval_sequence(BlastOpcode::Nop)?;
                    self.store(offset, width, value, at)?;
                }
                BlastOpcode::Assigns => self.assign_single(at)?,
                BlastOpcode::Assignv => {
                    let (offset, width) = self.read_target(at)?;
                    let value = self.read_components(width as usize)?;
                    self.store(offset, width, value, at)?;
                }
                BlastOpcode::AssignCData => self.assign_cdata(at)?,

                BlastOpcode::Push => {
                    let value = self.eval_sequence(BlastOpcode::Nop)?;
                    self.push(value, at)?;
                }
                BlastOpcode::Pushv => {
                    let count = self.cursor.read_u8()? as usize;
                    if count == 0 || count > 4 {
                        return Err(BlastError::TooManyParameters { count, max: 4, at });
                    }
                    let value = self.read_components(count)?;
                    self.push(value, at)?;
                }
                BlastOpcode::Pop => {
                    self.pop()?;
                }

                BlastOpcode::Jump => {
                    let offset = self.cursor.read_u8()? as usize;
                    self.cursor.jump_to(at + offset);
                }
                BlastOpcode::JumpBack => {
                    let offset = self.cursor.read_u8()? as usize;
                    let target = at.checked_sub(offset).ok_or(BlastError::UnexpectedEndOfCode(at))?;
                    self.cursor.jump_to(target);
                }
                BlastOpcode::JumpLong => {
                    let offset = self.cursor.read_i16_be()? as isize;
                    let target = at
                        .checked_add_signed(offset)
                        .ok_or(BlastError::UnexpectedEndOfCode(at))?;
                    self.cursor.jump_to(target);
                }
                BlastOpcode::Jz | BlastOpcode::Jnz => {
                    let offset = self.cursor.read_u8()? as usize;
                    let condition = self.eval_sequence(BlastOpcode::Nop)?;
                    let jump_when = op == BlastOpcode::Jnz;
                    match self.uniform_truth(&condition) {
                        Some(truth) => {
                            if truth == jump_when {
                                self.cursor.jump_to(at + offset);
                            }
                        }
                        None => {
                            let taken = at + offset;
                            let fallthrough = self.cursor.position();
                            let starts: Vec<usize> = (0..self.records.len())
                                .map(|r| {
                                    if self.operand_value(&condition, r).is_truthy() == jump_when {
                                        taken
                                    } else {
                                        fallthrough
                                    }
                                })
                                .collect();
                            return self.diverge(at, &starts);
                        }
                    }
                }

                BlastOpcode::Increment | BlastOpcode::Decrement => {
                    let (offset, width) = self.read_target(at)?;
                    let one = SsmdOperand::Constant(BlastValue::scalar(1.0));
                    self.compound_assign(op, offset, width, one, at)?;
                }
                BlastOpcode::AssignAdd
                | BlastOpcode::AssignSub
                | BlastOpcode::AssignMul
                | BlastOpcode::AssignDiv => {
                    let (offset, width) = self.read_target(at)?;
                    let operand = self.read_leading_operand()?;
                    self.compound_assign(op, offset, width, operand, at)?;
                }

                BlastOpcode::SetBit
                | BlastOpcode::SetBits
                | BlastOpcode::Rol
                | BlastOpcode::Ror
                | BlastOpcode::Shr
                | BlastOpcode::Shl => self.bit_statement(op, at)?,

                BlastOpcode::Call => {
                    self.call_external(at)?;
                }

                _ => {
                    return Err(BlastError::UnsupportedOpcode {
                        opcode: op.mnemonic(),
                        at,
                    });
                }
            }
        }
    }

    /// Condição idêntica em todos os registros, ou None se divergente
    fn uniform_truth(&self, condition: &SsmdOperand) -> Option<bool> {
        if let SsmdOperand::Constant(v) = condition {
            return Some(v.is_truthy());
        }
        let first = self.operand_value(condition, 0).is_truthy();
        (1..self.records.len())
            .all(|r| self.operand_value(condition, r).is_truthy() == first)
            .then_some(first)
    }

    /// Executa o restante do script registro a registro no interpretador escalar
    ///
    /// A condição já foi avaliada uma vez por registro; cada registro continua
    /// no alvo do salto ou logo após a condição (`starts[r]`).
    fn diverge(&mut self, at: usize, starts: &[usize]) -> BlastResult<Exit> {
        debug!(at, records = self.records.len(), "divergent branch, continuing per record");

        let snapshot = self.metadata.to_vec();
        let scalar = BlastInterpretor::<V>::new();
        let sp = self.sp;
        let span = self.data_size + self.stack_size;

        for (record, &code_pointer) in self.records.iter_mut().zip(starts) {
            self.metadata.copy_from_slice(&snapshot);
            let start = ResumePoint {
                code_pointer,
                stack_pointer: sp,
            };
            let (data, stack) = record.as_mut()[..span].split_at_mut(self.data_size);
            let segments = Segments {
                code: self.cursor.code_mut(),
                metadata: &mut *self.metadata,
                data,
                stack,
            };
            if let Exit::Yielded(_) = scalar.execute_segments(self.engine, segments, start)? {
                return Err(BlastError::DivergentYield { at });
            }
        }
        Ok(Exit::Completed)
    }

    // ═══════════════════════════════════════════════════════════════
    // SLOTS
    // ═══════════════════════════════════════════════════════════════

    #[inline(always)]
    fn meta(&self, slot: usize) -> u8 {
        self.metadata
            .get(slot)
            .copied()
            .unwrap_or(pack_metadata(BlastDataType::Numeric, 1))
    }

    fn check_slot(&self, slot: usize, width: usize) -> BlastResult<()> {
        if V::CHECKED && slot + width > self.data_slots {
            return Err(BlastError::DataIndexOutOfBounds {
                index: slot,
                count: self.data_slots,
            });
        }
        Ok(())
    }

    /// Alvo de atribuição: (offset em bytes, largura)
    fn read_target(&mut self, at: usize) -> BlastResult<(usize, u8)> {
        let byte = self.cursor.read_u8()?;
        if !is_id(byte) {
            return Err(BlastError::UnsupportedOpcode {
                opcode: BlastOpcode::from_byte(byte).map_or("unknown", |op| op.mnemonic()),
                at,
            });
        }
        let slot = (byte - ID_BASE) as usize;
        let width = vector_size_of(self.meta(slot));
        self.check_slot(slot, width as usize)?;
        Ok((slot * 4, width))
    }

    fn read_bit_target(&mut self, at: usize) -> BlastResult<usize> {
        let byte = self.cursor.read_u8()?;
        let slot = if is_id(byte) {
            (byte - ID_BASE) as usize
        } else if V::CHECKED {
            return Err(BlastError::InvalidBitOperationTarget { at });
        } else {
            (byte & 0x7F) as usize
        };
        self.check_slot(slot, 1)?;
        Ok(slot)
    }

    /// Lê um slot de dados como operando
    fn read_slot(&self, slot: usize, at: usize) -> BlastResult<SsmdOperand> {
        let meta = self.meta(slot);
        let width = vector_size_of(meta);
        self.check_slot(slot, width as usize)?;

        let datatype = datatype_of(meta);
        let operand = SsmdOperand::Indexed {
            offset: slot * 4,
            width,
            datatype,
        };
        if datatype != BlastDataType::Id {
            return Ok(operand);
        }

        // Slots Id são uniformes: lidos uma vez do primeiro registro
        let value = self.operand_value(&operand, 0);
        if V::CHECKED
            && (1..self.records.len()).any(|r| self.operand_value(&operand, r) != value)
        {
            return Err(BlastError::ConstantNotConstant { at });
        }
        Ok(SsmdOperand::Constant(value))
    }

    /// Valor de um operando em um registro
    fn operand_value(&self, operand: &SsmdOperand, r: usize) -> BlastValue {
        match *operand {
            SsmdOperand::Constant(v) => v,
            SsmdOperand::Indexed {
                offset,
                width,
                datatype,
            } => {
                let record = self.records[r].as_ref();
                let value = dispatch_width!(width, W => BlastValue::vector(&simd::read_lanes::<W>(record, offset)));
                value.with_datatype(datatype)
            }
            SsmdOperand::Register {
                reg,
                width,
                datatype,
            } => {
                let w = width as usize;
                BlastValue::vector(&self.scratch.get(reg)[r * w..r * w + w]).with_datatype(datatype)
            }
        }
    }

    /// Registrador com um valor por registro
    fn register_from(&mut self, values: &[BlastValue]) -> SsmdOperand {
        let width = values.first().map_or(1, BlastValue::width);
        let w = width as usize;
        let reg = self.scratch.alloc(values.len() * w);
        let dst = self.scratch.get_mut(reg);
        for (chunk, value) in dst.chunks_exact_mut(w).zip(values) {
            for (k, lane) in chunk.iter_mut().enumerate() {
                *lane = value.lane(k);
            }
        }
        SsmdOperand::Register {
            reg,
            width,
            datatype: values.first().map_or(BlastDataType::Numeric, BlastValue::datatype),
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // REGISTRADORES
    // ═══════════════════════════════════════════════════════════════

    /// Registrador de largura `width` com o conteúdo do operando
    fn materialize(&mut self, operand: SsmdOperand, width: u8) -> usize {
        if let SsmdOperand::Register { reg, width: w, .. } = operand
            && w == width
        {
            return reg;
        }

        let n = self.records.len();
        let dst = self.scratch.alloc(n * width as usize);
        dispatch_width!(width, W => match operand {
            SsmdOperand::Constant(v) => simd::fill_array::<W>(self.scratch.get_mut(dst), v.lanes::<W>()),
            SsmdOperand::Indexed { offset, width: w, .. } if w as usize == W => simd::load_indexed::<W, R>(
                self.scratch.get_mut(dst),
                self.records,
                offset,
                simd::offset_is_aligned(offset),
            ),
            SsmdOperand::Indexed { offset, width: 1, .. } => {
                simd::load_indexed_broadcast::<W, R>(self.scratch.get_mut(dst), self.records, offset)
            }
            SsmdOperand::Register { reg, width: 1, .. } => {
                let (d, s) = self.scratch.pair_mut(dst, reg);
                simd::expand_array::<W>(d, s);
            }
            _ => self.materialize_lanes::<W>(dst, &operand),
        });
        dst
    }

    /// Caminho lento para larguras incompatíveis (modo fast)
    fn materialize_lanes<const W: usize>(&mut self, dst: usize, operand: &SsmdOperand) {
        let values: Vec<BlastValue> = (0..self.records.len())
            .map(|r| self.operand_value(operand, r))
            .collect();
        for (chunk, value) in self.scratch.get_mut(dst).chunks_exact_mut(W).zip(&values) {
            for (k, lane) in chunk.iter_mut().enumerate() {
                *lane = value.lane(k);
            }
        }
    }

    /// `lhs op rhs` para todos os registros
    fn binary(
        &mut self,
        lhs: SsmdOperand,
        op: BinaryOp,
        rhs: SsmdOperand,
        at: usize,
    ) -> BlastResult<SsmdOperand> {
        if let (SsmdOperand::Constant(a), SsmdOperand::Constant(b)) = (lhs, rhs) {
            return Ok(SsmdOperand::Constant(a.binary::<V>(op, b, at)?));
        }

        let width = BlastValue::combined_width::<V>(lhs.width(), rhs.width(), at)?;

        if let SsmdOperand::Constant(a) = lhs {
            let acc = self.materialize(rhs, width);
            dispatch_op!(op, O => dispatch_width!(width, W => {
                simd::constant_op_array::<W, O>(a.lanes::<W>(), self.scratch.get_mut(acc))
            }));
            return Ok(SsmdOperand::Register {
                reg: acc,
                width,
                datatype: BlastDataType::Numeric,
            });
        }

        let acc = self.materialize(lhs, width);

        dispatch_op!(op, O => dispatch_width!(width, W => match rhs {
            SsmdOperand::Constant(b) => {
                simd::op_array_constant::<W, O>(self.scratch.get_mut(acc), b.lanes::<W>())
            }
            SsmdOperand::Indexed { offset, width: w, .. } if w as usize == W || w == 1 => {
                simd::op_array_indexed::<W, O, R>(
                    self.scratch.get_mut(acc),
                    self.records,
                    offset,
                    w as usize != W,
                    simd::offset_is_aligned(offset),
                )
            }
            SsmdOperand::Register { reg, width: w, .. } if w as usize == W => {
                let (a, b) = self.scratch.pair_mut(acc, reg);
                simd::op_array::<O>(a, b);
            }
            SsmdOperand::Register { reg, width: 1, .. } => {
                let (a, b) = self.scratch.pair_mut(acc, reg);
                simd::op_array_broadcast::<W, O>(a, b);
            }
            _ => {
                let rhs = self.materialize(rhs, width);
                let (a, b) = self.scratch.pair_mut(acc, rhs);
                simd::op_array::<O>(a, b);
            }
        }));

        Ok(SsmdOperand::Register {
            reg: acc,
            width,
            datatype: BlastDataType::Numeric,
        })
    }

    fn unary(&mut self, operand: SsmdOperand, negate: bool) -> SsmdOperand {
        if let SsmdOperand::Constant(v) = operand {
            return SsmdOperand::Constant(if negate { v.negate() } else { v.logical_not() });
        }
        let width = operand.width();
        let reg = self.materialize(operand, width);
        if negate {
            simd::negate_array(self.scratch.get_mut(reg));
        } else {
            simd::not_array(self.scratch.get_mut(reg));
        }
        SsmdOperand::Register {
            reg,
            width,
            datatype: BlastDataType::Numeric,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // ESCRITA
    // ═══════════════════════════════════════════════════════════════

    /// Escreve `value` em `width` lanes a partir de `offset` em todos os registros
    fn store(&mut self, offset: usize, width: u8, value: SsmdOperand, at: usize) -> BlastResult<()> {
        if V::CHECKED && value.width() != width && value.width() != 1 {
            return Err(BlastError::VectorSizeMismatch {
                left: width,
                right: value.width(),
                at,
            });
        }

        dispatch_width!(width, W => match value {
            SsmdOperand::Constant(v) if v.width() == 1 => {
                simd::move_f1_constant_to_indexed_data_as_fn::<W, R>(self.records, offset, v.x())
            }
            SsmdOperand::Constant(v) => simd::fill_indexed::<W, R>(self.records, offset, v.lanes::<W>()),
            SsmdOperand::Indexed { offset: src, width: w, .. } if w as usize == W => {
                if src != offset {
                    simd::move_indexed_data::<W, false, R>(self.records, offset, src);
                }
            }
            SsmdOperand::Indexed { offset: src, width: 1, .. } => {
                simd::move_indexed_data_broadcast::<W, false, R>(self.records, offset, src)
            }
            SsmdOperand::Register { reg, width: w, .. } if w as usize == W => {
                simd::store_indexed::<W, R>(self.records, offset, self.scratch.get(reg))
            }
            SsmdOperand::Register { reg, width: 1, .. } => {
                simd::store_indexed_broadcast::<W, R>(self.records, offset, self.scratch.get(reg))
            }
            _ => {
                let reg = self.materialize(value, width);
                simd::store_indexed::<W, R>(self.records, offset, self.scratch.get(reg));
            }
        });
        Ok(())
    }

    /// `assigns id [substract] operand`
    fn assign_single(&mut self, at: usize) -> BlastResult<()> {
        let (offset, width) = self.read_target(at)?;
        if self.cursor.peek()? != BlastOpcode::Substract as u8 {
            let value = self.read_leading_operand()?;
            return self.store(offset, width, value, at);
        }

        self.cursor.skip(1);
        let value = self.read_operand()?;
        match value {
            SsmdOperand::Indexed { offset: src, width: w, .. } if w == width => {
                dispatch_width!(width, W => simd::move_indexed_data::<W, true, R>(self.records, offset, src));
                Ok(())
            }
            SsmdOperand::Indexed { offset: src, width: 1, .. } => {
                dispatch_width!(width, W => simd::move_indexed_data_broadcast::<W, true, R>(self.records, offset, src));
                Ok(())
            }
            _ => {
                let negated = self.unary(value, true);
                self.store(offset, width, negated, at)
            }
        }
    }

    /// Componentes de `assignv`/`pushv`, um operando por lane
    fn read_components(&mut self, count: usize) -> BlastResult<SsmdOperand> {
        let mut components = [SsmdOperand::Constant(BlastValue::default()); 4];
        for component in components.iter_mut().take(count) {
            *component = self.read_leading_operand()?;
        }
        let components = &components[..count];

        if components.iter().all(|c| matches!(c, SsmdOperand::Constant(_))) {
            let mut lanes = [0.0f32; 4];
            for (lane, component) in lanes.iter_mut().zip(components) {
                *lane = self.operand_value(component, 0).x();
            }
            return Ok(SsmdOperand::Constant(BlastValue::vector(&lanes[..count])));
        }

        let values: Vec<BlastValue> = (0..self.records.len())
            .map(|r| {
                let mut lanes = [0.0f32; 4];
                for (lane, component) in lanes.iter_mut().zip(components) {
                    *lane = self.operand_value(component, r).x();
                }
                BlastValue::vector(&lanes[..count])
            })
            .collect();
        Ok(self.register_from(&values))
    }

    fn push(&mut self, value: SsmdOperand, at: usize) -> BlastResult<()> {
        let width = value.width();
        if self.sp + width as usize > self.stack_capacity {
            return Err(BlastError::StackOverflow);
        }

        let offset = self.data_size + self.sp * 4;
        let datatype = match value {
            SsmdOperand::Constant(v) => v.datatype(),
            SsmdOperand::Indexed { datatype, .. } | SsmdOperand::Register { datatype, .. } => datatype,
        };
        self.store(offset, width, value, at)?;

        let meta = pack_metadata(datatype, width);
        for k in 0..width as usize {
            if let Some(m) = self.metadata.get_mut(self.data_slots + self.sp + k) {
                *m = meta;
            }
        }
        self.sp += width as usize;
        Ok(())
    }

    /// Topo da stack como operando indexado
    fn top(&self) -> BlastResult<(usize, SsmdOperand)> {
        if self.sp == 0 {
            return Err(BlastError::StackUnderflow);
        }
        let meta = self.meta(self.data_slots + self.sp - 1);
        let width = vector_size_of(meta);
        let base = self
            .sp
            .checked_sub(width as usize)
            .ok_or(BlastError::StackUnderflow)?;
        Ok((
            base,
            SsmdOperand::Indexed {
                offset: self.data_size + base * 4,
                width,
                datatype: datatype_of(meta),
            },
        ))
    }

    fn pop(&mut self) -> BlastResult<SsmdOperand> {
        let (base, operand) = self.top()?;
        self.sp = base;
        Ok(operand)
    }

    // ═══════════════════════════════════════════════════════════════
    // EXPRESSÕES
    // ═══════════════════════════════════════════════════════════════

    fn eval_sequence(&mut self, terminator: BlastOpcode) -> BlastResult<SsmdOperand> {
        let mut acc = self.read_leading_operand()?;

        loop {
            let at = self.cursor.position();
            let op = self.cursor.read_opcode()?;
            if op == terminator {
                return Ok(acc);
            }
            let binary = BinaryOp::from_opcode(op).ok_or(BlastError::UnsupportedOpcode {
                opcode: op.mnemonic(),
                at,
            })?;
            let rhs = self.read_operand()?;
            acc = self.binary(acc, binary, rhs, at)?;
        }
    }

    fn read_leading_operand(&mut self) -> BlastResult<SsmdOperand> {
        let byte = self.cursor.peek()?;
        if byte == BlastOpcode::Substract as u8 {
            self.cursor.skip(1);
            let operand = self.read_operand()?;
            Ok(self.unary(operand, true))
        } else if byte == BlastOpcode::Not as u8 {
            self.cursor.skip(1);
            let operand = self.read_operand()?;
            Ok(self.unary(operand, false))
        } else {
            self.read_operand()
        }
    }

    fn read_operand(&mut self) -> BlastResult<SsmdOperand> {
        let at = self.cursor.position();
        let byte = self.cursor.read_u8()?;
        if is_id(byte) {
            return self.read_slot((byte - ID_BASE) as usize, at);
        }

        let op = BlastOpcode::from_byte(byte).ok_or(BlastError::UnknownOpcode { opcode: byte, at })?;
        if let Some(value) = op.constant_value() {
            return Ok(SsmdOperand::Constant(BlastValue::scalar(value)));
        }

        let constant = |value: f32| SsmdOperand::Constant(BlastValue::scalar(value));
        match op {
            BlastOpcode::ConstantF1 => Ok(constant(self.cursor.read_f32()?)),
            BlastOpcode::ConstantF1H => Ok(constant(self.cursor.read_f16()?)),
            BlastOpcode::ConstantShortRef => {
                let delta = self.cursor.read_u8()? as usize;
                Ok(constant(resolve_constant_ref::<V>(self.cursor.code(), at, delta)?))
            }
            BlastOpcode::ConstantLongRef => {
                let delta = self.cursor.read_u16_be()? as usize;
                Ok(constant(resolve_constant_ref::<V>(self.cursor.code(), at, delta)?))
            }
            BlastOpcode::Pop => self.pop(),
            BlastOpcode::Peek => Ok(self.top()?.1),
            BlastOpcode::Begin => self.eval_sequence(BlastOpcode::End),
            BlastOpcode::CDataRef => self.read_cdata(at),
            _ if op.is_function() => self.call_function(op, at),
            _ => Err(BlastError::UnsupportedOpcode {
                opcode: op.mnemonic(),
                at,
            }),
        }
    }

    fn read_parameter(&mut self) -> BlastResult<SsmdOperand> {
        let at = self.cursor.position();
        let byte = self.cursor.peek()?;
        if byte == BlastOpcode::Begin as u8 {
            return Err(BlastError::NonFlatParameterList { at });
        }
        if BlastOpcode::from_byte(byte).is_some_and(|op| op.is_function()) {
            return Err(BlastError::FunctionAsParameter { at });
        }
        if byte == BlastOpcode::Substract as u8 {
            self.cursor.skip(1);
            let operand = self.read_parameter()?;
            return Ok(self.unary(operand, true));
        }
        self.read_operand()
    }

    fn read_cdata(&mut self, at: usize) -> BlastResult<SsmdOperand> {
        let target = follow_cdataref::<V>(self.cursor.code(), at)?;
        self.cursor.skip(2);
        let index = self.read_operand()?;
        let trace = self.engine.config().trace;
        let datatype = match target.encoding {
            CDataEncoding::Bool32 => BlastDataType::Bool32,
            _ => BlastDataType::Numeric,
        };

        if let SsmdOperand::Constant(i) = index {
            let value = cdata_element(self.cursor.code(), &target, i.x(), trace);
            return Ok(SsmdOperand::Constant(BlastValue::scalar(value).with_datatype(datatype)));
        }

        let values: Vec<BlastValue> = (0..self.records.len())
            .map(|r| {
                let i = self.operand_value(&index, r).x();
                BlastValue::scalar(cdata_element(self.cursor.code(), &target, i, trace))
                    .with_datatype(datatype)
            })
            .collect();
        Ok(self.register_from(&values))
    }

    // ═══════════════════════════════════════════════════════════════
    // FUNÇÕES
    // ═══════════════════════════════════════════════════════════════

    fn call_function(&mut self, op: BlastOpcode, at: usize) -> BlastResult<SsmdOperand> {
        match op {
            BlastOpcode::Call => self.call_external(at),
            BlastOpcode::GetBit
            | BlastOpcode::GetBits
            | BlastOpcode::Tzcnt
            | BlastOpcode::Lzcnt
            | BlastOpcode::CountBits => self.bit_function(op, at),
            BlastOpcode::Min | BlastOpcode::Max => {
                let a = self.read_parameter()?;
                let b = self.read_parameter()?;
                let binary = if op == BlastOpcode::Min { BinaryOp::Min } else { BinaryOp::Max };
                self.binary(a, binary, b, at)
            }
            _ => {
                let count = op.builtin_parameter_count().unwrap_or(0);
                let mut params = [SsmdOperand::Constant(BlastValue::default()); 3];
                for param in params.iter_mut().take(count) {
                    *param = self.read_parameter()?;
                }
                let params = &params[..count];

                if params.iter().all(|p| matches!(p, SsmdOperand::Constant(_))) {
                    let values: Vec<BlastValue> = params.iter().map(|p| self.operand_value(p, 0)).collect();
                    return Ok(SsmdOperand::Constant(functions::builtin::<V>(op, &values, at)?));
                }

                let values = (0..self.records.len())
                    .map(|r| {
                        let mut args = [BlastValue::default(); 3];
                        for (arg, param) in args.iter_mut().zip(params) {
                            *arg = self.operand_value(param, r);
                        }
                        functions::builtin::<V>(op, &args[..count], at)
                    })
                    .collect::<BlastResult<Vec<_>>>()?;
                Ok(self.register_from(&values))
            }
        }
    }

    /// Funções externas são sempre chamadas uma vez por registro
    fn call_external(&mut self, at: usize) -> BlastResult<SsmdOperand> {
        let id = self.cursor.read_u8()?;
        let engine = self.engine;
        let function = engine.function(id)?;

        let mut params = [SsmdOperand::Constant(BlastValue::default()); crate::config::MAX_EXTERNAL_PARAMETERS];
        if function.parameter_count > params.len() {
            return Err(BlastError::TooManyParameters {
                count: function.parameter_count,
                max: params.len(),
                at,
            });
        }
        for param in params.iter_mut().take(function.parameter_count) {
            *param = self.read_parameter()?;
        }
        let params = &params[..function.parameter_count];

        let values: Vec<BlastValue> = (0..self.records.len())
            .map(|r| {
                let mut args = [0.0f32; crate::config::MAX_EXTERNAL_PARAMETERS];
                for (arg, param) in args.iter_mut().zip(params) {
                    *arg = self.operand_value(param, r).x();
                }
                BlastValue::scalar(function.call(&args[..params.len()]))
            })
            .collect();
        Ok(self.register_from(&values))
    }

    // ═══════════════════════════════════════════════════════════════
    // BITS
    // ═══════════════════════════════════════════════════════════════

    /// Bits do slot `slot` em cada registro
    fn target_bits(&self, slot: usize) -> Vec<u32> {
        let datatype = datatype_of(self.meta(slot));
        self.records
            .iter()
            .map(|record| slot_bits(simd::read_lanes::<1>(record.as_ref(), slot * 4)[0], datatype))
            .collect()
    }

    fn bit_function(&mut self, op: BlastOpcode, at: usize) -> BlastResult<SsmdOperand> {
        let slot = self.read_bit_target(at)?;
        let bits = self.target_bits(slot);

        let values: Vec<BlastValue> = match op {
            BlastOpcode::GetBit | BlastOpcode::GetBits => {
                let param = self.read_parameter()?;
                let get = |bits: u32, selector: &BlastValue| match op {
                    BlastOpcode::GetBit => functions::get_bit(bits, selector.x()),
                    _ => functions::get_bits(bits, selector.mask_bits()),
                };
                match param {
                    SsmdOperand::Constant(selector) => bits
                        .iter()
                        .map(|b| BlastValue::scalar(get(*b, &selector)))
                        .collect(),
                    _ => bits
                        .iter()
                        .enumerate()
                        .map(|(r, b)| BlastValue::scalar(get(*b, &self.operand_value(&param, r))))
                        .collect(),
                }
            }
            _ => bits
                .iter()
                .map(|b| BlastValue::scalar(functions::count(op, *b)))
                .collect(),
        };
        Ok(self.register_from(&values))
    }

    fn bit_statement(&mut self, op: BlastOpcode, at: usize) -> BlastResult<()> {
        let slot = self.read_bit_target(at)?;
        let datatype = datatype_of(self.meta(slot));
        let bits = self.target_bits(slot);

        let results: Vec<f32> = match op {
            BlastOpcode::SetBit | BlastOpcode::SetBits => {
                let selector = self.read_parameter()?;
                let value = self.read_parameter()?;
                let set = |bits: u32, selector: &BlastValue, on: bool| match op {
                    BlastOpcode::SetBit => functions::set_bit(bits, selector.x(), on),
                    _ => functions::set_bits(bits, selector.mask_bits(), on),
                };
                let results = match (selector, value) {
                    (SsmdOperand::Constant(s), SsmdOperand::Constant(v)) => {
                        let on = v.is_truthy();
                        bits.iter().map(|b| f32::from_bits(set(*b, &s, on))).collect()
                    }
                    _ => bits
                        .iter()
                        .enumerate()
                        .map(|(r, b)| {
                            let s = self.operand_value(&selector, r);
                            let on = self.operand_value(&value, r).is_truthy();
                            f32::from_bits(set(*b, &s, on))
                        })
                        .collect(),
                };
                retag_metadata(self.metadata, slot, BlastDataType::Bool32);
                results
            }
            _ => {
                let amount = self.read_parameter()?;
                match amount {
                    SsmdOperand::Constant(a) => bits
                        .iter()
                        .map(|b| bits_to_slot(functions::shift(op, *b, a.x()), datatype))
                        .collect(),
                    _ => bits
                        .iter()
                        .enumerate()
                        .map(|(r, b)| {
                            let a = self.operand_value(&amount, r).x();
                            bits_to_slot(functions::shift(op, *b, a), datatype)
                        })
                        .collect(),
                }
            }
        };

        simd::store_indexed::<1, R>(self.records, slot * 4, &results);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // CDATA
    // ═══════════════════════════════════════════════════════════════

    /// `assigncd`: o bloco CDATA vive no código, compartilhado por todos os
    /// registros, então índice e valor precisam ser uniformes
    fn assign_cdata(&mut self, at: usize) -> BlastResult<()> {
        let reference = self.cursor.position();
        let target = follow_cdataref::<V>(self.cursor.code(), reference)?;
        self.cursor.skip(3);
        let index = self.read_operand()?;
        let value = self.eval_sequence(BlastOpcode::Nop)?;

        let (SsmdOperand::Constant(index), SsmdOperand::Constant(value)) = (index, value) else {
            return Err(BlastError::UnsupportedInSsmd {
                opcode: BlastOpcode::AssignCData.mnemonic(),
                at,
            });
        };
        write_cdata_element(self.cursor.code_mut(), &target, index.x(), &value)
    }

    // ═══════════════════════════════════════════════════════════════
    // FASTLANE
    // ═══════════════════════════════════════════════════════════════

    fn compound_assign(
        &mut self,
        op: BlastOpcode,
        offset: usize,
        width: u8,
        operand: SsmdOperand,
        at: usize,
    ) -> BlastResult<()> {
        let binary = BinaryOp::from_fastlane(op).ok_or(BlastError::UnsupportedOpcode {
            opcode: op.mnemonic(),
            at,
        })?;
        if V::CHECKED && operand.width() != width && operand.width() != 1 {
            return Err(BlastError::VectorSizeMismatch {
                left: width,
                right: operand.width(),
                at,
            });
        }

        dispatch_op!(binary, O => dispatch_width!(width, W => match operand {
            SsmdOperand::Constant(c) => simd::op_indexed_constant::<W, O, R>(
                self.records,
                offset,
                c.lanes::<W>(),
                simd::offset_is_aligned(offset),
            ),
            SsmdOperand::Indexed { offset: src, width: w, .. } if w as usize == W || w == 1 => {
                simd::op_indexed_indexed::<W, O, R>(self.records, offset, src, w as usize != W)
            }
            SsmdOperand::Register { reg, width: w, .. } if w as usize == W || w == 1 => {
                simd::op_indexed_array::<W, O, R>(self.records, offset, self.scratch.get(reg), w as usize != W)
            }
            _ => {
                let reg = self.materialize(operand, width);
                simd::op_indexed_array::<W, O, R>(self.records, offset, self.scratch.get(reg), false);
            }
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::assembler::BytecodeWriter;
    use crate::package::{BlastPackageBuilder, PackageMode};
    use crate::validation::{Checked, Fast};

    fn ssmd(builder: BlastPackageBuilder) -> BlastPackage {
        builder.build(PackageMode::Ssmd).unwrap()
    }

    fn run_block(package: &mut BlastPackage, block: &mut BlastDataBlock) -> BlastResult<Exit> {
        BlastSSMDInterpretor::<Checked>::new().execute_block(&BlastEngine::default(), package, block)
    }

    #[test]
    fn test_constant_expression_all_records() {
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.assign(a).constant(1.0).op(BlastOpcode::Add).constant(2.0).nop();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(32);
        assert_eq!(run_block(&mut package, &mut block).unwrap(), Exit::Completed);
        for r in 0..32 {
            assert_eq!(block.read_f32(r, 0), Some(3.0));
        }
    }

    #[test]
    fn test_per_record_values() {
        // b = a * 2 + (a - 1)
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let b = builder.scalar("b", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.assign(b)
            .id(a)
            .op(BlastOpcode::Multiply)
            .constant(2.0)
            .op(BlastOpcode::Add)
            .op(BlastOpcode::Begin)
            .id(a)
            .op(BlastOpcode::Substract)
            .constant(1.0)
            .op(BlastOpcode::End)
            .nop();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(8);
        for r in 0..8 {
            block.write_f32(r, 0, r as f32).unwrap();
        }
        run_block(&mut package, &mut block).unwrap();
        for r in 0..8 {
            assert_eq!(block.read_f32(r, 1), Some(r as f32 * 3.0 - 1.0));
        }
    }

    #[test]
    fn test_vector_broadcast_and_functions() {
        let mut builder = BlastPackageBuilder::new();
        let s = builder.scalar("s", 0.0).unwrap();
        let v = builder.vector("v", &[1.0, 2.0, 3.0]).unwrap();
        let m = builder.scalar("m", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.assign(v).id(v).op(BlastOpcode::Multiply).id(s).nop();
        w.assign(m).op(BlastOpcode::Max).id(s).constant(2.0).op(BlastOpcode::Add).op(BlastOpcode::Abs).op(BlastOpcode::Substract).id(s).nop();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(4);
        for r in 0..4 {
            block.write_f32(r, 0, r as f32).unwrap();
        }
        run_block(&mut package, &mut block).unwrap();
        for r in 0..4 {
            let f = r as f32;
            assert_eq!(block.read_f32(r, 1), Some(f));
            assert_eq!(block.read_f32(r, 3), Some(3.0 * f));
            assert_eq!(block.read_f32(r, 4), Some(f.max(2.0) + f));
        }
    }

    #[test]
    fn test_stack_and_fastlane() {
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.push().id(a).op(BlastOpcode::Add).constant(10.0).nop();
        w.pushv(&[1.0, 2.0]);
        w.op(BlastOpcode::Pop);
        w.assign(a).op(BlastOpcode::Pop).nop();
        w.fastlane(BlastOpcode::AssignMul, a).id(a);
        w.increment(a);
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(3);
        for r in 0..3 {
            block.write_f32(r, 0, r as f32).unwrap();
        }
        run_block(&mut package, &mut block).unwrap();
        for r in 0..3 {
            let pushed = r as f32 + 10.0;
            assert_eq!(block.read_f32(r, 0), Some(pushed * pushed + 1.0));
        }
    }

    #[test]
    fn test_uniform_branch_loops_in_lockstep() {
        let mut builder = BlastPackageBuilder::new();
        let i = builder.scalar("i", 0.0).unwrap();
        let acc = builder.scalar("acc", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        let top = w.position();
        let exit = w.jz();
        w.id(i).op(BlastOpcode::Smaller).constant(4.0).nop();
        w.increment(i);
        w.fastlane(BlastOpcode::AssignAdd, acc).id(i);
        w.jump_back_to(top).unwrap();
        w.patch(exit).unwrap();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(16);
        run_block(&mut package, &mut block).unwrap();
        for r in 0..16 {
            assert_eq!(block.read_f32(r, 1), Some(10.0));
        }
    }

    #[test]
    fn test_divergent_branch_matches_scalar() {
        // if (a > 1) b = 100 else b = a
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let b = builder.scalar("b", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        let otherwise = w.jz();
        w.id(a).op(BlastOpcode::Greater).constant(1.0).nop();
        w.assigns(b, 100.0);
        let done = w.jump();
        w.patch(otherwise).unwrap();
        w.assign(b).id(a).nop();
        w.patch(done).unwrap();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(4);
        for r in 0..4 {
            block.write_f32(r, 0, r as f32).unwrap();
        }
        run_block(&mut package, &mut block).unwrap();
        let results: Vec<f32> = (0..4).filter_map(|r| block.read_f32(r, 1)).collect();
        assert_eq!(results, vec![0.0, 1.0, 100.0, 100.0]);
    }

    #[test]
    fn test_divergent_yield_is_error() {
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        let skip = w.jz();
        w.id(a).nop();
        w.op(BlastOpcode::Yield);
        w.patch(skip).unwrap();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(2);
        block.write_f32(1, 0, 1.0).unwrap();
        assert!(matches!(
            run_block(&mut package, &mut block),
            Err(BlastError::DivergentYield { at: 0 })
        ));
    }

    #[test]
    fn test_divergent_condition_evaluated_once_per_record() {
        // if (call(1, a)) b = 100 else b = a
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let engine = BlastEngine::default()
            .with_function(1, "pred", 1, move |p| {
                counter.fetch_add(1, Ordering::SeqCst);
                p[0] - 1.0
            })
            .unwrap();

        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let b = builder.scalar("b", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        let otherwise = w.jz();
        w.call(1).id(a).nop();
        w.assigns(b, 100.0);
        let done = w.jump();
        w.patch(otherwise).unwrap();
        w.assign(b).id(a).nop();
        w.patch(done).unwrap();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(4);
        for r in 0..4 {
            block.write_f32(r, 0, r as f32).unwrap();
        }
        BlastSSMDInterpretor::<Checked>::new()
            .execute_block(&engine, &mut package, &mut block)
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let results: Vec<f32> = (0..4).filter_map(|r| block.read_f32(r, 1)).collect();
        assert_eq!(results, vec![100.0, 1.0, 100.0, 100.0]);
    }

    #[test]
    fn test_constant_on_the_left() {
        // v = 10 - v; s = 1 / s
        let mut builder = BlastPackageBuilder::new();
        let s = builder.scalar("s", 0.0).unwrap();
        let v = builder.vector("v", &[1.0, 2.0, 3.0]).unwrap();
        let mut w = BytecodeWriter::new();
        w.assign(v).constant(10.0).op(BlastOpcode::Substract).id(v).nop();
        w.assign(s).constant(1.0).op(BlastOpcode::Divide).id(s).nop();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(3);
        for r in 0..3 {
            block.write_f32(r, 0, r as f32 + 1.0).unwrap();
            block.write_f32(r, 2, r as f32).unwrap();
        }
        run_block(&mut package, &mut block).unwrap();
        for r in 0..3 {
            assert_eq!(block.read_f32(r, 0), Some(1.0 / (r as f32 + 1.0)));
            assert_eq!(block.read_f32(r, 1), Some(9.0));
            assert_eq!(block.read_f32(r, 2), Some(10.0 - r as f32));
            assert_eq!(block.read_f32(r, 3), Some(7.0));
        }
    }

    #[test]
    fn test_yield_and_resume() {
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 1.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.fastlane(BlastOpcode::AssignAdd, a).constant(1.0);
        w.op(BlastOpcode::Yield);
        w.fastlane(BlastOpcode::AssignMul, a).constant(10.0);
        let mut package = ssmd(builder.with_code(w.finish()));
        let engine = BlastEngine::default();
        let mut interpretor = BlastSSMDInterpretor::<Checked>::new();

        let mut block = package.clone_data_stack(5);
        let mut records = block.records_mut();
        let Exit::Yielded(point) = interpretor.execute(&engine, &mut package, &mut records).unwrap() else {
            panic!("expected yield");
        };
        let exit = interpretor.resume(&engine, &mut package, &mut records, point).unwrap();
        assert_eq!(exit, Exit::Completed);
        drop(records);
        assert_eq!(block.read_f32(4, 0), Some(20.0));
    }

    #[test]
    fn test_id_slots_must_be_uniform() {
        let mut builder = BlastPackageBuilder::new();
        let k = builder.variable("k", BlastDataType::Id, &[2.0]).unwrap();
        let a = builder.scalar("a", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.assign(a).id(k).op(BlastOpcode::Multiply).constant(3.0).nop();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(3);
        run_block(&mut package, &mut block).unwrap();
        assert_eq!(block.read_f32(2, 1), Some(6.0));

        block.write_f32(1, 0, 5.0).unwrap();
        assert!(matches!(
            run_block(&mut package, &mut block),
            Err(BlastError::ConstantNotConstant { .. })
        ));

        let fast = BlastSSMDInterpretor::<Fast>::new().execute_block(
            &BlastEngine::default(),
            &mut package,
            &mut block,
        );
        assert!(fast.is_ok());
    }

    #[test]
    fn test_bit_operations_per_record() {
        let mut builder = BlastPackageBuilder::new();
        let flags = builder.bits("flags", 0).unwrap();
        let n = builder.scalar("n", 0.0).unwrap();
        let count = builder.scalar("count", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.op(BlastOpcode::SetBit).id(flags).id(n).constant(1.0);
        w.op(BlastOpcode::Shl).id(flags).constant(1.0);
        w.assign(count).op(BlastOpcode::Tzcnt).id(flags).nop();
        let mut package = ssmd(builder.with_code(w.finish()));

        let mut block = package.clone_data_stack(4);
        for r in 0..4 {
            block.write_f32(r, 1, r as f32).unwrap();
        }
        run_block(&mut package, &mut block).unwrap();
        for r in 0..4 {
            assert_eq!(block.read_f32(r, 0).map(f32::to_bits), Some(1 << (r + 1)));
            assert_eq!(block.read_f32(r, 2), Some(r as f32 + 1.0));
        }
    }

    /// Executa `emit` no SSMD e, registro a registro, no escalar; os slots
    /// `flags`, `n`, `out` precisam ter os mesmos bits nos dois
    fn assert_bits_match_scalar(emit: impl Fn(&mut BytecodeWriter, u8, u8, u8)) {
        let patterns = [0u32, 1, 0b1011_0110, 0x8000_0001, 0xF0F0_F0F0, u32::MAX];

        let program = |flags_value: u32, n_value: f32| {
            let mut builder = BlastPackageBuilder::new();
            let flags = builder.bits("flags", flags_value).unwrap();
            let n = builder.scalar("n", n_value).unwrap();
            let out = builder.scalar("out", 0.0).unwrap();
            let mut w = BytecodeWriter::new();
            emit(&mut w, flags, n, out);
            builder.with_code(w.finish())
        };

        let mut package = ssmd(program(0, 0.0));
        let mut block = package.clone_data_stack(patterns.len());
        for (r, pattern) in patterns.iter().enumerate() {
            block.write_f32(r, 0, f32::from_bits(*pattern)).unwrap();
            block.write_f32(r, 1, r as f32 * 3.0).unwrap();
        }
        run_block(&mut package, &mut block).unwrap();

        for (r, pattern) in patterns.iter().enumerate() {
            let mut scalar = program(*pattern, r as f32 * 3.0).build(PackageMode::Normal).unwrap();
            BlastInterpretor::<Checked>::new()
                .execute(&BlastEngine::default(), &mut scalar)
                .unwrap();
            for slot in 0..3 {
                assert_eq!(
                    block.read_f32(r, slot).map(f32::to_bits),
                    scalar.read_data(slot).map(f32::to_bits),
                    "record {} slot {}",
                    r,
                    slot
                );
            }
        }
    }

    #[test]
    fn test_shifts_and_rotates_match_scalar() {
        for op in [BlastOpcode::Rol, BlastOpcode::Ror, BlastOpcode::Shl, BlastOpcode::Shr] {
            assert_bits_match_scalar(|w, flags, _, _| {
                w.op(op).id(flags).constant(3.0);
            });
            assert_bits_match_scalar(|w, flags, n, _| {
                w.op(op).id(flags).id(n);
            });
        }
    }

    #[test]
    fn test_get_bit_and_get_bits_match_scalar() {
        assert_bits_match_scalar(|w, flags, _, out| {
            w.assign(out).op(BlastOpcode::GetBit).id(flags).constant(2.0).nop();
        });
        assert_bits_match_scalar(|w, flags, n, out| {
            w.assign(out).op(BlastOpcode::GetBit).id(flags).id(n).nop();
        });
        assert_bits_match_scalar(|w, flags, _, out| {
            w.assign(out).op(BlastOpcode::GetBits).id(flags).constant(6.0).nop();
        });
        assert_bits_match_scalar(|w, flags, n, out| {
            w.assign(out).op(BlastOpcode::GetBits).id(flags).id(n).nop();
        });
    }

    #[test]
    fn test_set_bit_and_set_bits_match_scalar() {
        for op in [BlastOpcode::SetBit, BlastOpcode::SetBits] {
            assert_bits_match_scalar(|w, flags, _, _| {
                w.op(op).id(flags).constant(4.0).constant(1.0);
            });
            assert_bits_match_scalar(|w, flags, n, _| {
                w.op(op).id(flags).id(n).constant(0.0);
            });
            assert_bits_match_scalar(|w, flags, n, _| {
                w.op(op).id(flags).constant(1.0).id(n);
            });
        }
    }

    #[test]
    fn test_external_call_per_record() {
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        w.assign(a).call(1).id(a).nop();
        let mut package = ssmd(builder.with_code(w.finish()));
        let engine = BlastEngine::default()
            .with_function(1, "square", 1, |p| p[0] * p[0])
            .unwrap();

        let mut block = package.clone_data_stack(3);
        for r in 0..3 {
            block.write_f32(r, 0, r as f32 + 1.0).unwrap();
        }
        BlastSSMDInterpretor::<Checked>::new()
            .execute_block(&engine, &mut package, &mut block)
            .unwrap();
        assert_eq!(block.read_f32(2, 0), Some(9.0));
    }

    /// Código com um bloco CDATA fp32 `[1, 2, 3]` seguido de `assigncd`
    fn cdata_package(emit: impl FnOnce(&mut BytecodeWriter, usize, u8)) -> BlastPackage {
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 0.0).unwrap();
        let mut w = BytecodeWriter::new();
        let skip = w.jump();
        let block = w.cdata_block(CDataEncoding::Fp32Fp32, &[1.0, 2.0, 3.0]).unwrap();
        w.patch(skip).unwrap();
        emit(&mut w, block, a);
        w.ret();
        ssmd(builder.with_code(w.finish()))
    }

    #[test]
    fn test_uniform_cdata_write() {
        let mut package = cdata_package(|w, block, a| {
            w.assigncd(block).unwrap();
            w.constant(1.0).constant(42.0).nop();
            w.assign(a).cdataref(block).unwrap();
            w.constant(1.0).op(BlastOpcode::Add).id(a).nop();
        });

        let mut block = package.clone_data_stack(4);
        for r in 0..4 {
            block.write_f32(r, 0, r as f32).unwrap();
        }
        assert_eq!(run_block(&mut package, &mut block).unwrap(), Exit::Completed);
        for r in 0..4 {
            assert_eq!(block.read_f32(r, 0), Some(42.0 + r as f32));
        }
    }

    #[test]
    fn test_per_record_cdata_write_is_unsupported() {
        let mut package = cdata_package(|w, block, a| {
            w.assigncd(block).unwrap();
            w.constant(0.0).id(a).nop();
        });
        let mut block = package.clone_data_stack(2);
        assert!(matches!(
            run_block(&mut package, &mut block),
            Err(BlastError::UnsupportedInSsmd { opcode: "assigncd", .. })
        ));

        let mut package = cdata_package(|w, block, a| {
            w.assigncd(block).unwrap();
            w.id(a).constant(5.0).nop();
        });
        let mut block = package.clone_data_stack(2);
        assert!(matches!(
            run_block(&mut package, &mut block),
            Err(BlastError::UnsupportedInSsmd { .. })
        ));
    }

    #[test]
    fn test_record_size() {
        let mut builder = BlastPackageBuilder::new();
        builder.scalar("a", 0.0).unwrap();
        let mut package = ssmd(builder.with_code(vec![BlastOpcode::Ret as u8]));

        let mut short = vec![vec![0u8; 2]];
        let code = BlastSSMDInterpretor::<Checked>::new().execute_code(
            &BlastEngine::default(),
            &mut package,
            &mut short,
        );
        assert_eq!(code, BlastError::RecordTooSmall { index: 0, expected: 0, found: 0 }.code());
    }

    #[test]
    fn test_scratch_is_reused() {
        let mut builder = BlastPackageBuilder::new();
        let a = builder.scalar("a", 1.0).unwrap();
        let mut w = BytecodeWriter::new();
        for _ in 0..4 {
            w.assign(a).id(a).op(BlastOpcode::Add).id(a).op(BlastOpcode::Multiply).id(a).nop();
        }
        let mut package = ssmd(builder.with_code(w.finish()));
        let mut interpretor = BlastSSMDInterpretor::<Checked>::new();
        let mut block = package.clone_data_stack(2);
        interpretor
            .execute_block(&BlastEngine::default(), &mut package, &mut block)
            .unwrap();
        assert!(interpretor.scratch().capacity() <= 2);
    }
}
