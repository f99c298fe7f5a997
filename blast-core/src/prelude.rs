//! # Prelude — Re-exportações Convenientes
//!
//! ```
//! use blast_core::prelude::*;
//! ```

// Package
pub use crate::package::{
    BlastDataBlock,
    BlastDataType,
    BlastPackage,
    BlastPackageBuilder,
    LanguageVersion,
    PackageAllocator,
    PackageFlags,
    PackageInfo,
    PackageMode,
};

// Bytecode
pub use crate::assembler::{BytecodeWriter, JumpPatch, disassemble};
pub use crate::cdata::CDataEncoding;
pub use crate::opcode::BlastOpcode;

// Execução
pub use crate::config::BlastConfig;
pub use crate::engine::BlastEngine;
pub use crate::error::{BlastError, BlastResult};
pub use crate::interpretor::{BlastInterpretor, BlastSSMDInterpretor, Exit, ResumePoint, exit_code};
pub use crate::parallel::{ParallelRun, execute_ssmd_parallel, resume_ssmd_parallel};
pub use crate::validation::{Checked, DefaultValidation, Fast, Validation};
pub use crate::value::BlastValue;
