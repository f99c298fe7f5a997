//! Interpretadores Blast
//!
//! - [`BlastInterpretor`]: um script contra um buffer de dados
//! - [`BlastSSMDInterpretor`]: o mesmo script contra N registros em lockstep
//!
//! Ambos devolvem `Ok(Exit::Completed)`, `Ok(Exit::Yielded(..))` ou
//! `Err(BlastError)`; [`exit_code`] traduz para o contrato inteiro
//! (`0` sucesso, `1` yield, negativo erro).

pub mod functions;
pub mod scalar;
pub mod ssmd;

pub use scalar::BlastInterpretor;
pub use ssmd::{BlastSSMDInterpretor, SsmdScratch};

use serde::{Deserialize, Serialize};

use crate::cdata;
use crate::cursor::CodeCursor;
use crate::error::{BlastError, BlastResult, EXIT_SUCCESS, EXIT_YIELD};
use crate::opcode::BlastOpcode;
use crate::validation::Validation;

/// Ponto de retomada após `yield`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Próxima instrução
    pub code_pointer: usize,
    /// Slots ocupados na stack
    pub stack_pointer: usize,
}

/// Resultado de uma execução sem erro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exit {
    Completed,
    Yielded(ResumePoint),
}

impl Exit {
    pub fn code(&self) -> i32 {
        match self {
            Self::Completed => EXIT_SUCCESS,
            Self::Yielded(_) => EXIT_YIELD,
        }
    }
}

/// Código inteiro de um resultado de execução
pub fn exit_code(result: &BlastResult<Exit>) -> i32 {
    match result {
        Ok(exit) => exit.code(),
        Err(err) => err.code(),
    }
}

/// Resolve `constant_short_ref`/`constant_long_ref` em `at` com distância `delta`
pub(crate) fn resolve_constant_ref<V: Validation>(
    code: &[u8],
    at: usize,
    delta: usize,
) -> BlastResult<f32> {
    let invalid = || BlastError::UnsupportedOpcode {
        opcode: "constant_ref",
        at,
    };
    let target = at.checked_sub(delta).ok_or_else(invalid)?;
    let mut cursor = CodeCursor::new(code, target);

    match cursor.read_u8()? {
        b if b == BlastOpcode::ConstantF1H as u8 => cursor.read_f16(),
        b if b == BlastOpcode::ConstantF1 as u8 || !V::CHECKED => cursor.read_f32(),
        _ => Err(invalid()),
    }
}

/// Índice CDATA a partir de um float (negativo/NaN vira fora do range)
#[inline]
pub(crate) fn cdata_index(value: f32) -> usize {
    if value >= 0.0 { value as usize } else { usize::MAX }
}

/// Lê um elemento CDATA com falha suave
#[inline]
pub(crate) fn cdata_element(code: &[u8], target: &cdata::CDataRef, index: f32, trace: bool) -> f32 {
    cdata::index_cdata_f1(code, target.offset, cdata_index(index), target.length, trace)
}

/// Escreve `value` no elemento `index`; a largura do valor escolhe o writer
pub(crate) fn write_cdata_element(
    code: &mut [u8],
    target: &cdata::CDataRef,
    index: f32,
    value: &crate::value::BlastValue,
) -> BlastResult<()> {
    let index = cdata_index(index);
    match value.width() {
        1 => cdata::set_cdata_float(code, target.offset, index, value.x()),
        2 => cdata::set_cdata_float2(code, target.offset, index, value.lanes::<2>()),
        3 => cdata::set_cdata_float3(code, target.offset, index, value.lanes::<3>()),
        _ => cdata::set_cdata_float4(code, target.offset, index, value.lanes::<4>()),
    }
}
