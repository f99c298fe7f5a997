//! Erros do Blast
//!
//! Todo erro carrega um código inteiro estável (`BlastError::code`), que é o
//! contrato de saída dos interpretadores: `0` = sucesso, `1` = yield, negativo = erro.

use thiserror::Error;

use crate::package::PackageMode;
use crate::cdata::CDataEncoding;

/// Tipo de resultado do Blast
pub type BlastResult<T> = Result<T, BlastError>;

/// Código de saída de uma execução concluída
pub const EXIT_SUCCESS: i32 = 0;

/// Código de saída de uma execução suspensa por `yield`
pub const EXIT_YIELD: i32 = 1;

/// Erros do Blast
#[derive(Debug, Error)]
pub enum BlastError {
    #[error("Unknown opcode 0x{opcode:02X} at {at}")]
    UnknownOpcode { opcode: u8, at: usize },

    #[error("Opcode {opcode} not supported at {at} in this position")]
    UnsupportedOpcode { opcode: &'static str, at: usize },

    #[error("Opcode {opcode} at {at} is not supported by the SSMD interpretor")]
    UnsupportedInSsmd { opcode: &'static str, at: usize },

    #[error("Vector size mismatch at {at}: left {left}, right {right}")]
    VectorSizeMismatch { left: u8, right: u8, at: usize },

    #[error("Too many parameters at {at}: {count} > {max}")]
    TooManyParameters { count: usize, max: usize, at: usize },

    #[error("Non-flat parameter list at {at}")]
    NonFlatParameterList { at: usize },

    #[error("Function used as parameter at {at}")]
    FunctionAsParameter { at: usize },

    #[error("Unknown external function: {0}")]
    UnknownExternalFunction(u8),

    #[error("Data index out of bounds: slot {index}, {count} slots available")]
    DataIndexOutOfBounds { index: usize, count: usize },

    #[error("Bit operation at {at} requires a direct data id target")]
    InvalidBitOperationTarget { at: usize },

    #[error("Operand at {at} was classified constant but differs across records")]
    ConstantNotConstant { at: usize },

    #[error("Stack overflow")]
    StackOverflow,

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Unexpected end of code at {0}")]
    UnexpectedEndOfCode(usize),

    #[error("Invalid cdata reference at {at}")]
    InvalidCDataReference { at: usize },

    #[error("CDATA encoding {encoding:?} does not support {operation}")]
    UnsupportedCDataEncoding {
        encoding: CDataEncoding,
        operation: &'static str,
    },

    #[error("Package mode {mode:?} does not support {operation}")]
    UnsupportedPackageMode {
        mode: PackageMode,
        operation: &'static str,
    },

    #[error("Package is not allocated")]
    PackageNotAllocated,

    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    #[error("Record {index} too small: {found} bytes, {expected} required")]
    RecordTooSmall {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Record yielded inside a divergent branch at {at}")]
    DivergentYield { at: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown CDATA encoding: {0}")]
    UnknownCDataEncoding(String),
}

impl BlastError {
    /// Código inteiro do erro (sempre negativo)
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownOpcode { .. } => -1,
            Self::UnsupportedOpcode { .. } => -2,
            Self::UnsupportedInSsmd { .. } => -3,
            Self::VectorSizeMismatch { .. } => -4,
            Self::TooManyParameters { .. } => -5,
            Self::NonFlatParameterList { .. } => -6,
            Self::FunctionAsParameter { .. } => -7,
            Self::UnknownExternalFunction(_) => -8,
            Self::DataIndexOutOfBounds { .. } => -9,
            Self::InvalidBitOperationTarget { .. } => -10,
            Self::ConstantNotConstant { .. } => -11,
            Self::StackOverflow => -12,
            Self::StackUnderflow => -13,
            Self::UnexpectedEndOfCode(_) => -14,
            Self::InvalidCDataReference { .. } => -15,
            Self::UnsupportedCDataEncoding { .. } => -16,
            Self::UnsupportedPackageMode { .. } => -17,
            Self::PackageNotAllocated => -18,
            Self::InvalidPackage(_) => -19,
            Self::RecordTooSmall { .. } => -20,
            Self::DivergentYield { .. } => -21,
            Self::Io(_) => -22,
            Self::UnknownCDataEncoding(_) => -23,
        }
    }

    /// Erro estrutural do bytecode (fatal, não recuperável)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnknownOpcode { .. }
                | Self::UnsupportedOpcode { .. }
                | Self::VectorSizeMismatch { .. }
                | Self::TooManyParameters { .. }
                | Self::NonFlatParameterList { .. }
                | Self::FunctionAsParameter { .. }
                | Self::InvalidBitOperationTarget { .. }
                | Self::UnexpectedEndOfCode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BlastError::UnknownOpcode { opcode: 0xEE, at: 3 };
        assert!(err.to_string().contains("0xEE"));

        let err = BlastError::StackOverflow;
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_error_codes_are_negative_and_distinct() {
        let errors = [
            BlastError::UnknownOpcode { opcode: 0, at: 0 },
            BlastError::VectorSizeMismatch { left: 2, right: 3, at: 0 },
            BlastError::StackOverflow,
            BlastError::StackUnderflow,
            BlastError::PackageNotAllocated,
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_structural() {
        assert!(BlastError::NonFlatParameterList { at: 1 }.is_structural());
        assert!(!BlastError::StackOverflow.is_structural());
    }
}
