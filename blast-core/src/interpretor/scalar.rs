//! Interpretador escalar
//!
//! Executes one package once against one data/stack buffer pair. The code
//! cursor walks statements until `ret`, `yield` or the end of the code segment.
//! Expressions evaluate strictly left to right; the producer encodes precedence
//! with `begin`/`end` groups.

use std::marker::PhantomData;

use tracing::{debug, trace};

use crate::cdata::{self, follow_cdataref};
use crate::cursor::CodeCursor;
use crate::engine::BlastEngine;
use crate::error::{BlastError, BlastResult};
use crate::opcode::{BlastOpcode, ID_BASE, is_id};
use crate::package::{
    BlastDataType, BlastPackage, Segments, datatype_of, pack_metadata, retag_metadata,
    vector_size_of,
};
use crate::validation::{DefaultValidation, Validation};
use crate::value::{BinaryOp, BlastValue};

use super::functions::{self, bits_to_slot, slot_bits};
use super::{Exit, ResumePoint, cdata_element, exit_code, resolve_constant_ref, write_cdata_element};

/// Maximum components of a pushed vector
const MAX_VECTOR_SIZE: usize = 4;

/// Single-instance interpretor
#[derive(Debug, Clone, Copy, Default)]
pub struct BlastInterpretor<V: Validation = DefaultValidation> {
    _validation: PhantomData<V>,
}

impl<V: Validation> BlastInterpretor<V> {
    pub fn new() -> Self {
        Self {
            _validation: PhantomData,
        }
    }

    /// Runs the package from the first instruction with an empty stack
    pub fn execute(&self, engine: &BlastEngine, package: &mut BlastPackage) -> BlastResult<Exit> {
        self.resume(engine, package, ResumePoint::default())
    }

    /// Continues a package that previously yielded
    pub fn resume(
        &self,
        engine: &BlastEngine,
        package: &mut BlastPackage,
        point: ResumePoint,
    ) -> BlastResult<Exit> {
        let segments = package.segments_mut()?;
        self.execute_segments(engine, segments, point)
    }

    /// Integer exit contract: 0 completed, 1 yielded, negative error
    pub fn execute_code(&self, engine: &BlastEngine, package: &mut BlastPackage) -> i32 {
        exit_code(&self.execute(engine, package))
    }

    /// Runs over explicit segments (used by the SSMD divergent-branch fallback)
    pub fn execute_segments(
        &self,
        engine: &BlastEngine,
        segments: Segments<'_>,
        start: ResumePoint,
    ) -> BlastResult<Exit> {
        trace!(
            code_pointer = start.code_pointer,
            stack_pointer = start.stack_pointer,
            "scalar execution start"
        );

        let mut frame = ScalarFrame::<V> {
            data_slots: segments.data.len() / 4,
            stack_capacity: segments.stack.len() / 4,
            cursor: CodeCursor::new(segments.code, start.code_pointer),
            metadata: segments.metadata,
            data: segments.data,
            stack: segments.stack,
            sp: start.stack_pointer,
            engine,
            _validation: PhantomData,
        };

        let result = frame.run();
        match &result {
            Ok(exit) => trace!(?exit, "scalar execution finished"),
            Err(err) => debug!(error = %err, code = err.code(), "scalar execution failed"),
        }
        result
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRAME
// ═══════════════════════════════════════════════════════════════════════════════

struct ScalarFrame<'a, V: Validation> {
    cursor: CodeCursor<&'a mut [u8]>,
    metadata: &'a mut [u8],
    data: &'a mut [u8],
    stack: &'a mut [u8],
    data_slots: usize,
    stack_capacity: usize,
    sp: usize,
    engine: &'a BlastEngine,
    _validation: PhantomData<V>,
}

#[inline(always)]
fn read_f32(bytes: &[u8], at: usize) -> f32 {
    let b = &bytes[at..at + 4];
    f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

#[inline(always)]
fn write_f32(bytes: &mut [u8], at: usize, value: f32) {
    bytes[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

impl<V: Validation> ScalarFrame<'_, V> {
    fn run(&mut self) -> BlastResult<Exit> {
        loop {
            if self.cursor.at_end() {
                return Ok(Exit::Completed);
            }

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
                    let slot = self.read_target(at)?;
                    let value = self.eval_sequence(BlastOpcode::Nop)?;
                    self.write_slot(slot, value, at)?;
                }
                BlastOpcode::Assigns => {
                    let slot = self.read_target(at)?;
                    let value = self.read_leading_operand()?;
                    self.write_slot(slot, value, at)?;
                }
                BlastOpcode::Assignv => {
                    let slot = self.read_target(at)?;
                    let width = vector_size_of(self.meta(slot)) as usize;
                    let mut lanes = [0.0f32; MAX_VECTOR_SIZE];
                    for lane in lanes.iter_mut().take(width) {
                        *lane = self.read_leading_operand()?.x();
                    }
                    self.write_slot(slot, BlastValue::vector(&lanes[..width]), at)?;
                }
                BlastOpcode::AssignCData => self.assign_cdata()?,

                BlastOpcode::Push => {
                    let value = self.eval_sequence(BlastOpcode::Nop)?;
                    self.push(value)?;
                }
                BlastOpcode::Pushv => {
                    let value = self.read_pushv(at)?;
                    self.push(value)?;
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
                    let condition = self.eval_sequence(BlastOpcode::Nop)?.is_truthy();
                    if condition == (op == BlastOpcode::Jnz) {
                        self.cursor.jump_to(at + offset);
                    }
                }

                BlastOpcode::Increment | BlastOpcode::Decrement => {
                    let slot = self.read_target(at)?;
                    self.compound_assign(op, slot, BlastValue::scalar(1.0), at)?;
                }
                BlastOpcode::AssignAdd
                | BlastOpcode::AssignSub
                | BlastOpcode::AssignMul
                | BlastOpcode::AssignDiv => {
                    let slot = self.read_target(at)?;
                    let operand = self.read_leading_operand()?;
                    self.compound_assign(op, slot, operand, at)?;
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

    // ═══════════════════════════════════════════════════════════════
    // DATA AND STACK
    // ═══════════════════════════════════════════════════════════════

    #[inline(always)]
    fn meta(&self, slot: usize) -> u8 {
        self.metadata
            .get(slot)
            .copied()
            .unwrap_or(pack_metadata(BlastDataType::Numeric, 1))
    }

    /// Reads a data id that must be the assignment target
    fn read_target(&mut self, at: usize) -> BlastResult<usize> {
        let byte = self.cursor.read_u8()?;
        if is_id(byte) {
            Ok((byte - ID_BASE) as usize)
        } else {
            Err(BlastError::UnsupportedOpcode {
                opcode: BlastOpcode::from_byte(byte).map_or("unknown", |op| op.mnemonic()),
                at,
            })
        }
    }

    /// Bit operations must address a literal data id
    fn read_bit_target(&mut self, at: usize) -> BlastResult<usize> {
        let byte = self.cursor.read_u8()?;
        if is_id(byte) {
            Ok((byte - ID_BASE) as usize)
        } else if V::CHECKED {
            Err(BlastError::InvalidBitOperationTarget { at })
        } else {
            Ok((byte & 0x7F) as usize)
        }
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

    fn read_slot(&self, slot: usize) -> BlastResult<BlastValue> {
        let meta = self.meta(slot);
        let width = vector_size_of(meta) as usize;
        self.check_slot(slot, width)?;

        let mut lanes = [0.0f32; MAX_VECTOR_SIZE];
        for (k, lane) in lanes.iter_mut().enumerate().take(width) {
            *lane = read_f32(self.data, (slot + k) * 4);
        }
        Ok(BlastValue::vector(&lanes[..width]).with_datatype(datatype_of(meta)))
    }

    fn write_slot(&mut self, slot: usize, value: BlastValue, at: usize) -> BlastResult<()> {
        let width = vector_size_of(self.meta(slot));
        if V::CHECKED && value.width() != width && value.width() != 1 {
            return Err(BlastError::VectorSizeMismatch {
                left: width,
                right: value.width(),
                at,
            });
        }
        self.check_slot(slot, width as usize)?;

        for k in 0..width as usize {
            write_f32(self.data, (slot + k) * 4, value.lane(k));
        }
        Ok(())
    }

    fn push(&mut self, value: BlastValue) -> BlastResult<()> {
        let width = value.width() as usize;
        if self.sp + width > self.stack_capacity {
            return Err(BlastError::StackOverflow);
        }

        let meta = pack_metadata(value.datatype(), value.width());
        for k in 0..width {
            write_f32(self.stack, (self.sp + k) * 4, value.lane(k));
            if let Some(m) = self.metadata.get_mut(self.data_slots + self.sp + k) {
                *m = meta;
            }
        }
        self.sp += width;
        Ok(())
    }

    fn top(&self) -> BlastResult<(usize, u8)> {
        if self.sp == 0 {
            return Err(BlastError::StackUnderflow);
        }
        let meta = self.meta(self.data_slots + self.sp - 1);
        let width = vector_size_of(meta) as usize;
        if width > self.sp {
            return Err(BlastError::StackUnderflow);
        }
        Ok((self.sp - width, meta))
    }

    fn read_stack(&self, base: usize, meta: u8) -> BlastValue {
        let width = vector_size_of(meta) as usize;
        let mut lanes = [0.0f32; MAX_VECTOR_SIZE];
        for (k, lane) in lanes.iter_mut().enumerate().take(width) {
            *lane = read_f32(self.stack, (base + k) * 4);
        }
        BlastValue::vector(&lanes[..width]).with_datatype(datatype_of(meta))
    }

    fn pop(&mut self) -> BlastResult<BlastValue> {
        let (base, meta) = self.top()?;
        self.sp = base;
        Ok(self.read_stack(base, meta))
    }

    fn peek(&self) -> BlastResult<BlastValue> {
        let (base, meta) = self.top()?;
        Ok(self.read_stack(base, meta))
    }

    // ═══════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════

    /// Evaluates `operand (op operand)*` up to and including `terminator`
    fn eval_sequence(&mut self, terminator: BlastOpcode) -> BlastResult<BlastValue> {
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
            acc = acc.binary::<V>(binary, rhs, at)?;
        }
    }

    /// Operand optionally preceded by unary `substract` or `not`
    fn read_leading_operand(&mut self) -> BlastResult<BlastValue> {
        let byte = self.cursor.peek()?;
        if byte == BlastOpcode::Substract as u8 {
            self.cursor.skip(1);
            Ok(self.read_operand()?.negate())
        } else if byte == BlastOpcode::Not as u8 {
            self.cursor.skip(1);
            Ok(self.read_operand()?.logical_not())
        } else {
            self.read_operand()
        }
    }

    fn read_operand(&mut self) -> BlastResult<BlastValue> {
        let at = self.cursor.position();
        let byte = self.cursor.read_u8()?;
        if is_id(byte) {
            return self.read_slot((byte - ID_BASE) as usize);
        }

        let op = BlastOpcode::from_byte(byte).ok_or(BlastError::UnknownOpcode { opcode: byte, at })?;
        if let Some(value) = op.constant_value() {
            return Ok(BlastValue::scalar(value));
        }

        match op {
            BlastOpcode::ConstantF1 => Ok(BlastValue::scalar(self.cursor.read_f32()?)),
            BlastOpcode::ConstantF1H => Ok(BlastValue::scalar(self.cursor.read_f16()?)),
            BlastOpcode::ConstantShortRef => {
                let delta = self.cursor.read_u8()? as usize;
                Ok(BlastValue::scalar(resolve_constant_ref::<V>(self.cursor.code(), at, delta)?))
            }
            BlastOpcode::ConstantLongRef => {
                let delta = self.cursor.read_u16_be()? as usize;
                Ok(BlastValue::scalar(resolve_constant_ref::<V>(self.cursor.code(), at, delta)?))
            }
            BlastOpcode::Pop => self.pop(),
            BlastOpcode::Peek => self.peek(),
            BlastOpcode::Begin => self.eval_sequence(BlastOpcode::End),
            BlastOpcode::CDataRef => self.read_cdata(at),
            _ if op.is_function() => self.call_function(op, at),
            _ => Err(BlastError::UnsupportedOpcode {
                opcode: op.mnemonic(),
                at,
            }),
        }
    }

    /// Function parameter: a single operand, never a group or another function
    fn read_parameter(&mut self) -> BlastResult<BlastValue> {
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
            return Ok(self.read_parameter()?.negate());
        }
        self.read_operand()
    }

    fn read_pushv(&mut self, at: usize) -> BlastResult<BlastValue> {
        let count = self.cursor.read_u8()? as usize;
        if count == 0 || count > MAX_VECTOR_SIZE {
            return Err(BlastError::TooManyParameters {
                count,
                max: MAX_VECTOR_SIZE,
                at,
            });
        }
        let mut lanes = [0.0f32; MAX_VECTOR_SIZE];
        for lane in lanes.iter_mut().take(count) {
            *lane = self.read_leading_operand()?.x();
        }
        Ok(BlastValue::vector(&lanes[..count]))
    }

    fn read_cdata(&mut self, at: usize) -> BlastResult<BlastValue> {
        let target = follow_cdataref::<V>(self.cursor.code(), at)?;
        self.cursor.skip(2);
        let index = self.read_operand()?.x();
        let value = cdata_element(self.cursor.code(), &target, index, self.engine.config().trace);
        Ok(match target.encoding {
            cdata::CDataEncoding::Bool32 => {
                BlastValue::scalar(value).with_datatype(BlastDataType::Bool32)
            }
            _ => BlastValue::scalar(value),
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // FUNCTIONS
    // ═══════════════════════════════════════════════════════════════

    fn call_function(&mut self, op: BlastOpcode, at: usize) -> BlastResult<BlastValue> {
        match op {
            BlastOpcode::Call => self.call_external(at),
            BlastOpcode::GetBit | BlastOpcode::GetBits => {
                let slot = self.read_bit_target(at)?;
                let target = self.read_slot(slot)?;
                let bits = slot_bits(target.x(), target.datatype());
                let param = self.read_parameter()?;
                Ok(BlastValue::scalar(match op {
                    BlastOpcode::GetBit => functions::get_bit(bits, param.x()),
                    _ => functions::get_bits(bits, param.mask_bits()),
                }))
            }
            BlastOpcode::Tzcnt | BlastOpcode::Lzcnt | BlastOpcode::CountBits => {
                let slot = self.read_bit_target(at)?;
                let target = self.read_slot(slot)?;
                let bits = slot_bits(target.x(), target.datatype());
                Ok(BlastValue::scalar(functions::count(op, bits)))
            }
            _ => {
                let count = op.builtin_parameter_count().unwrap_or(0);
                let mut params = [BlastValue::default(); 3];
                for param in params.iter_mut().take(count) {
                    *param = self.read_parameter()?;
                }
                functions::builtin::<V>(op, &params[..count], at)
            }
        }
    }

    fn call_external(&mut self, at: usize) -> BlastResult<BlastValue> {
        let id = self.cursor.read_u8()?;
        let engine = self.engine;
        let function = engine.function(id)?;

        let mut params = [0.0f32; crate::config::MAX_EXTERNAL_PARAMETERS];
        if function.parameter_count > params.len() {
            return Err(BlastError::TooManyParameters {
                count: function.parameter_count,
                max: params.len(),
                at,
            });
        }
        for param in params.iter_mut().take(function.parameter_count) {
            *param = self.read_parameter()?.x();
        }
        Ok(BlastValue::scalar(function.call(&params[..function.parameter_count])))
    }

    // ═══════════════════════════════════════════════════════════════
    // DIRECT MUTATION
    // ═══════════════════════════════════════════════════════════════

    fn compound_assign(
        &mut self,
        op: BlastOpcode,
        slot: usize,
        operand: BlastValue,
        at: usize,
    ) -> BlastResult<()> {
        let binary = BinaryOp::from_fastlane(op).ok_or(BlastError::UnsupportedOpcode {
            opcode: op.mnemonic(),
            at,
        })?;
        let current = self.read_slot(slot)?;
        let value = current.binary::<V>(binary, operand, at)?;
        self.write_slot(slot, value, at)
    }

    fn bit_statement(&mut self, op: BlastOpcode, at: usize) -> BlastResult<()> {
        let slot = self.read_bit_target(at)?;
        let target = self.read_slot(slot)?;
        let datatype = target.datatype();
        let bits = slot_bits(target.x(), datatype);

        let value = match op {
            BlastOpcode::SetBit | BlastOpcode::SetBits => {
                let selector = self.read_parameter()?;
                let on = self.read_parameter()?.is_truthy();
                let bits = match op {
                    BlastOpcode::SetBit => functions::set_bit(bits, selector.x(), on),
                    _ => functions::set_bits(bits, selector.mask_bits(), on),
                };
                retag_metadata(self.metadata, slot, BlastDataType::Bool32);
                f32::from_bits(bits)
            }
            _ => {
                let amount = self.read_parameter()?.x();
                bits_to_slot(functions::shift(op, bits, amount), datatype)
            }
        };

        write_f32(self.data, slot * 4, value);
        Ok(())
    }

    fn assign_cdata(&mut self) -> BlastResult<()> {
        let reference = self.cursor.position();
        let target = follow_cdataref::<V>(self.cursor.code(), reference)?;
        self.cursor.skip(3);
        let index = self.read_operand()?.x();
        let value = self.eval_sequence(BlastOpcode::Nop)?;
        write_cdata_element(self.cursor.code_mut(), &target, index, &value)
    }
}
