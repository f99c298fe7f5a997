//! # Blast-Core
//!
//! Formato de package BlastScript e os interpretadores de bytecode que o executam.
//!
//! > *"Um script, milhares de registros."*
//!
//! ## O Modelo
//!
//! 1. Um **package** carrega código, metadata, dados e stack em segmentos
//! 2. Todo valor é **f32**, escalar ou vetor de até 4 componentes
//! 3. O interpretador **escalar** roda o script contra um buffer de dados
//! 4. O interpretador **SSMD** roda o mesmo script contra N registros em lockstep
//!
//! ## Módulos
//!
//! - [`package`]: header, layout de segmentos, builder e replicação de dados
//! - [`opcode`]: tabela de opcodes e categorias
//! - [`cdata`]: blocos de dados constantes embutidos no código
//! - [`interpretor`]: interpretadores escalar e SSMD, builtins
//! - [`simd`]: kernels de lote usados pelo interpretador SSMD
//! - [`assembler`]: emissor de bytecode e disassembler
//! - [`parallel`]: execução SSMD dividida em chunks no rayon
//!
//! ## Quick Start
//!
//! ```
//! use blast_core::prelude::*;
//!
//! let mut builder = BlastPackageBuilder::new();
//! let a = builder.scalar("a", 0.0).unwrap();
//!
//! let mut w = BytecodeWriter::new();
//! w.assign(a).constant(1.0).op(BlastOpcode::Add).constant(2.0).nop().ret();
//!
//! let mut package = builder.with_code(w.finish()).build(PackageMode::Normal).unwrap();
//! let exit = BlastInterpretor::<Checked>::new()
//!     .execute(&BlastEngine::default(), &mut package)
//!     .unwrap();
//!
//! assert_eq!(exit, Exit::Completed);
//! assert_eq!(package.read_data(a as usize), Some(3.0));
//! ```

pub mod assembler;
pub mod cdata;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod interpretor;
pub mod opcode;
pub mod package;
pub mod parallel;
pub mod prelude;
pub mod simd;
pub mod validation;
pub mod value;

// Re-exportações de nível superior
pub use config::{BlastConfig, ENV_CONFIG};
pub use engine::BlastEngine;
pub use error::{BlastError, BlastResult};
pub use interpretor::{BlastInterpretor, BlastSSMDInterpretor, Exit, ResumePoint};
pub use package::{BlastDataBlock, BlastPackage, BlastPackageBuilder, PackageMode};
