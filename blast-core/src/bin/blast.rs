//! # blast — CLI de packages BlastScript
//!
//! ```bash
//! blast demo demo.blast                 # Gera package de exemplo
//! blast info demo.blast --json          # Header e layout
//! blast dis demo.blast                  # Disassembla o segmento de código
//! blast run demo.blast                  # Executa no interpretador escalar
//! blast run demo.blast --ssmd 1024      # Executa sobre 1024 registros
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blast_core::prelude::*;

#[derive(Parser)]
#[command(name = "blast")]
#[command(author = "Silvano Neto <dev@silvanoneto.com>")]
#[command(version)]
#[command(about = "BlastScript package inspector and runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header and segment layout of a package
    Info {
        #[arg(value_name = "PACKAGE")]
        path: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Disassemble the code segment
    Dis {
        #[arg(value_name = "PACKAGE")]
        path: PathBuf,
    },

    /// Execute a package and print its data slots
    Run {
        #[arg(value_name = "PACKAGE")]
        path: PathBuf,

        /// Run over N replicated records with the SSMD interpretor
        #[arg(long, value_name = "N")]
        ssmd: Option<usize>,

        /// Split SSMD records across the rayon pool
        #[arg(long, requires = "ssmd")]
        parallel: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a small demo package
    Demo {
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Package mode: normal, ssmd, entity
        #[arg(long, default_value = "ssmd")]
        mode: PackageMode,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blast_core=warn,blast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { path, json } => info_command(&path, json),
        Commands::Dis { path } => dis_command(&path),
        Commands::Run {
            path,
            ssmd,
            parallel,
            json,
        } => run_command(&path, ssmd, parallel, json),
        Commands::Demo { output, mode } => demo_command(&output, mode),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<u8, Box<dyn std::error::Error>>;

fn info_command(path: &Path, json: bool) -> CliResult {
    let package = BlastPackage::load(path)?;
    let info = package.info();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(0);
    }

    println!("{}", path.display());
    println!("  mode:           {:?}", info.mode);
    println!("  language:       {:?}", info.language);
    println!("  flags:          0x{:02X}", info.flags);
    println!("  offsets:        {:?}", info.offsets);
    println!("  code:           {} bytes", info.code_size);
    println!("  metadata:       {} bytes", info.metadata_size);
    println!("  data:           {} bytes ({} slots)", info.data_size, info.data_size / 4);
    println!("  stack:          {} bytes ({} slots)", info.stack_size, info.stack_capacity);
    Ok(0)
}

fn dis_command(path: &Path) -> CliResult {
    let package = BlastPackage::load(path)?;
    let code = package.code().ok_or(BlastError::PackageNotAllocated)?;
    print!("{}", disassemble(code)?);
    Ok(0)
}

#[derive(Serialize)]
struct RunReport {
    exit: Exit,
    code: i32,
    records: usize,
    /// Slots de dados do primeiro registro
    data: Vec<f32>,
}

fn run_command(path: &Path, ssmd: Option<usize>, parallel: bool, json: bool) -> CliResult {
    let mut package = BlastPackage::load(path)?;
    let engine = BlastEngine::from_env();
    debug!(config = ?engine.config(), "engine ready");

    let report = match ssmd {
        None => {
            let exit = BlastInterpretor::<DefaultValidation>::new().execute(&engine, &mut package)?;
            let data = (0..package.data_slots()).filter_map(|slot| package.read_data(slot)).collect();
            RunReport {
                exit,
                code: exit.code(),
                records: 1,
                data,
            }
        }
        Some(count) => {
            let mut block = package.clone_data_stack(count);
            let exit = if parallel {
                execute_ssmd_parallel::<DefaultValidation>(&engine, &mut package, &mut block)?.exit()
            } else {
                BlastSSMDInterpretor::<DefaultValidation>::new().execute_block(&engine, &mut package, &mut block)?
            };
            let data = (0..package.data_slots()).filter_map(|slot| block.read_f32(0, slot)).collect();
            RunReport {
                exit,
                code: exit.code(),
                records: count,
                data,
            }
        }
    };

    info!(exit = ?report.exit, records = report.records, "execution finished");

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("exit:    {:?} ({})", report.exit, report.code);
        println!("records: {}", report.records);
        for (slot, value) in report.data.iter().enumerate() {
            println!("  id({:>3}) = {}", slot, value);
        }
    }
    Ok(report.code as u8)
}

/// `result = 1 + 2; scaled = result * factor; factor` fica em `id(1)`
fn demo_command(output: &Path, mode: PackageMode) -> CliResult {
    let mut builder = BlastPackageBuilder::new();
    let result = builder.scalar("result", 0.0)?;
    let factor = builder.scalar("factor", 4.0)?;
    let scaled = builder.scalar("scaled", 0.0)?;
    let table = builder.scalar("table", 0.0)?;

    let mut w = BytecodeWriter::new();
    let skip = w.jump();
    let block = w.cdata_block(CDataEncoding::U8Fp32, &[10.0, 200.0, 30.0])?;
    w.patch(skip)?;
    w.assign(result).constant(1.0).op(BlastOpcode::Add).constant(2.0).nop();
    w.assign(scaled).id(result).op(BlastOpcode::Multiply).id(factor).nop();
    w.assign(table).cdataref(block)?;
    w.constant(1.0).nop();
    w.ret();

    let package = builder.with_code(w.finish()).build(mode)?;
    package.save(output)?;
    info!(path = %output.display(), ?mode, "demo package written");
    println!("wrote {} ({} bytes of code)", output.display(), package.code_size());
    Ok(0)
}
