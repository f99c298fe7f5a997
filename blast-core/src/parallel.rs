//! Execução SSMD paralela
//!
//! Divide os registros de um [`BlastDataBlock`] em chunks de
//! `BlastConfig::ssmd_chunk` e executa cada chunk com seu próprio
//! interpretador e sua própria cópia do package no pool do rayon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::BlastEngine;
use crate::error::{BlastError, BlastResult};
use crate::interpretor::{BlastSSMDInterpretor, Exit, ResumePoint};
use crate::package::{BlastDataBlock, BlastPackage, PackageAllocator};
use crate::validation::Validation;

/// Resultado por chunk de uma execução paralela
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelRun {
    /// Registros por chunk
    pub chunk: usize,
    /// Saída de cada chunk, na ordem dos registros
    pub exits: Vec<Exit>,
}

impl ParallelRun {
    /// Todos os chunks concluíram
    pub fn is_completed(&self) -> bool {
        self.exits.iter().all(|exit| *exit == Exit::Completed)
    }

    /// Primeiro yield, ou `Completed`
    pub fn exit(&self) -> Exit {
        self.exits
            .iter()
            .copied()
            .find(|exit| matches!(exit, Exit::Yielded(_)))
            .unwrap_or(Exit::Completed)
    }

    pub fn code(&self) -> i32 {
        self.exit().code()
    }
}

/// Executa o package sobre todos os registros do bloco em paralelo
pub fn execute_ssmd_parallel<V: Validation>(
    engine: &BlastEngine,
    package: &mut BlastPackage,
    block: &mut BlastDataBlock,
) -> BlastResult<ParallelRun> {
    let chunk = engine.config().ssmd_chunk.max(1);
    let chunks = block.len().div_ceil(chunk);
    let start = vec![Exit::Yielded(ResumePoint::default()); chunks];
    run_chunks::<V>(engine, package, block, chunk, &start)
}

/// Retoma os chunks que executaram `yield`; chunks concluídos não rodam de novo
pub fn resume_ssmd_parallel<V: Validation>(
    engine: &BlastEngine,
    package: &mut BlastPackage,
    block: &mut BlastDataBlock,
    previous: &ParallelRun,
) -> BlastResult<ParallelRun> {
    let chunk = previous.chunk.max(1);
    if block.len().div_ceil(chunk) != previous.exits.len() {
        return Err(BlastError::InvalidPackage(format!(
            "resume of {} chunks over a block of {} records",
            previous.exits.len(),
            block.len()
        )));
    }
    run_chunks::<V>(engine, package, block, chunk, &previous.exits)
}

fn run_chunks<V: Validation>(
    engine: &BlastEngine,
    package: &mut BlastPackage,
    block: &mut BlastDataBlock,
    chunk: usize,
    starts: &[Exit],
) -> BlastResult<ParallelRun> {
    if !package.is_allocated() {
        return Err(BlastError::PackageNotAllocated);
    }
    let template: &BlastPackage = package;
    let mut records = block.records_mut();

    debug!(records = records.len(), chunk, chunks = starts.len(), "parallel ssmd start");

    let results: Vec<BlastResult<(Exit, Option<BlastPackage>)>> = records
        .par_chunks_mut(chunk)
        .zip(starts.par_iter())
        .map(|(records, start)| {
            let Exit::Yielded(point) = *start else {
                return Ok((Exit::Completed, None));
            };
            let mut local = template.clone_with(PackageAllocator::Owned);
            let exit = BlastSSMDInterpretor::<V>::new().resume(engine, &mut local, records, point)?;
            Ok((exit, Some(local)))
        })
        .collect();

    let mut exits = Vec::with_capacity(results.len());
    let mut executed = None;
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok((exit, local)) => {
                if executed.is_none() {
                    executed = local;
                }
                exits.push(exit);
            }
            Err(err) => {
                warn!(chunk = index, error = %err, "parallel ssmd chunk failed");
                return Err(err);
            }
        }
    }

    // set_bit/set_bits retagueiam a metadata; assigncd escreve no código
    if let Some(local) = executed {
        let segments = package.segments_mut()?;
        if let Some(metadata) = local.metadata() {
            segments.metadata.copy_from_slice(metadata);
        }
        if let Some(code) = local.code() {
            segments.code.copy_from_slice(code);
        }
    }

    let run = ParallelRun { chunk, exits };
    debug!(exit = ?run.exit(), "parallel ssmd finished");
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::BytecodeWriter;
    use crate::cdata::{self, CDataEncoding};
    use crate::config::BlastConfig;
    use crate::interpretor::BlastSSMDInterpretor;
    use crate::opcode::BlastOpcode;
    use crate::package::{BlastDataType, BlastPackageBuilder, PackageMode};
    use crate::validation::Checked;

    fn package(code: Vec<u8>) -> BlastPackage {
        let mut builder = BlastPackageBuilder::new();
        builder.scalar("a", 0.0).unwrap();
        builder.scalar("b", 0.0).unwrap();
        builder.with_code(code).build(PackageMode::Ssmd).unwrap()
    }

    fn block(package: &BlastPackage, n: usize) -> BlastDataBlock {
        let mut block = package.clone_data_stack(n);
        for i in 0..n {
            block.write_f32(i, 0, i as f32).unwrap();
        }
        block
    }

    #[test]
    fn test_parallel_matches_sequential() {
        // b = a * 3 - 1
        let mut w = BytecodeWriter::new();
        w.assign(1).id(0).op(BlastOpcode::Multiply).constant(3.0);
        w.op(BlastOpcode::Substract).constant(1.0).nop().ret();

        let engine = BlastEngine::new(BlastConfig::default().with_ssmd_chunk(7));
        let mut parallel_package = package(w.finish());
        let mut parallel = block(&parallel_package, 50);
        let run = execute_ssmd_parallel::<Checked>(&engine, &mut parallel_package, &mut parallel).unwrap();
        assert_eq!(run.exits.len(), 8);
        assert!(run.is_completed());

        let mut sequential_package = package(w.finish());
        let mut sequential = block(&sequential_package, 50);
        BlastSSMDInterpretor::<Checked>::new()
            .execute_block(&engine, &mut sequential_package, &mut sequential)
            .unwrap();
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.read_f32(49, 1), Some(146.0));
    }

    #[test]
    fn test_parallel_yield_and_resume() {
        let mut w = BytecodeWriter::new();
        w.assigns(1, 5.0).op(BlastOpcode::Yield);
        w.assign(1).id(1).op(BlastOpcode::Add).id(0).nop().ret();

        let engine = BlastEngine::new(BlastConfig::default().with_ssmd_chunk(4));
        let mut package = package(w.finish());
        let mut data = block(&package, 10);

        let run = execute_ssmd_parallel::<Checked>(&engine, &mut package, &mut data).unwrap();
        assert_eq!(run.code(), 1);
        assert_eq!(data.read_f32(9, 1), Some(5.0));

        let run = resume_ssmd_parallel::<Checked>(&engine, &mut package, &mut data, &run).unwrap();
        assert!(run.is_completed());
        assert_eq!(data.read_f32(9, 1), Some(14.0));
    }

    #[test]
    fn test_parallel_propagates_errors() {
        let mut w = BytecodeWriter::new();
        w.op(BlastOpcode::Pop).ret();
        let engine = BlastEngine::new(BlastConfig::default().with_ssmd_chunk(2));
        let mut package = package(w.finish());
        let mut data = block(&package, 5);
        let result = execute_ssmd_parallel::<Checked>(&engine, &mut package, &mut data);
        assert!(matches!(result, Err(BlastError::StackUnderflow)));
    }

    #[test]
    fn test_parallel_retag_reaches_package() {
        let mut w = BytecodeWriter::new();
        w.op(BlastOpcode::SetBit).id(1).constant(0.0).constant(1.0).ret();
        let engine = BlastEngine::new(BlastConfig::default().with_ssmd_chunk(3));
        let mut package = package(w.finish());
        let mut data = block(&package, 6);
        execute_ssmd_parallel::<Checked>(&engine, &mut package, &mut data).unwrap();
        let metadata = package.metadata().unwrap();
        assert_eq!(crate::package::datatype_of(metadata[1]), BlastDataType::Bool32);
    }

    #[test]
    fn test_parallel_cdata_write_reaches_package() {
        let mut w = BytecodeWriter::new();
        let skip = w.jump();
        let table = w.cdata_block(CDataEncoding::Fp32Fp32, &[0.0, 0.0]).unwrap();
        w.patch(skip).unwrap();
        w.assigncd(table).unwrap();
        w.constant(1.0).constant(7.0).nop();
        w.ret();
        let engine = BlastEngine::new(BlastConfig::default().with_ssmd_chunk(2));
        let mut package = package(w.finish());
        let mut data = block(&package, 5);
        execute_ssmd_parallel::<Checked>(&engine, &mut package, &mut data).unwrap();

        let code = package.code().unwrap();
        let length = cdata::cdata_content_byte_size(code, table);
        assert_eq!(cdata::index_cdata_f1(code, table, 1, length, false), 7.0);
        assert_eq!(cdata::index_cdata_f1(code, table, 0, length, false), 0.0);
    }
}
