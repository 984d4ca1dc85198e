// chip8recomp - CHIP-8 static recompiler
//
// Compiles CHIP-8 ROMs to standalone Rust projects.
//
// Usage:
//   chip8recomp rom.ch8 -o out/
//   chip8recomp --batch roms/ -o collection/

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use std::path::PathBuf;

use chip8_recomp::batch::{compile_batch, BatchOptions};
use chip8_recomp::cfg;
use chip8_recomp::decode;
use chip8_recomp::emit::{self, EmitError, EmitOptions};
use chip8_recomp::meta;
use chip8_recomp::rom;

#[derive(Parser, Debug)]
#[command(name = "chip8recomp")]
#[command(about = "CHIP-8 to Rust static recompiler")]
#[command(version)]
struct Args {
    /// Input ROM file
    #[arg(required_unless_present = "batch")]
    input: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// ROM name (default: derived from the file name)
    #[arg(short, long)]
    name: Option<String>,

    /// Compile every ROM in a directory into one launcher
    #[arg(long, conflicts_with = "input")]
    batch: Option<PathBuf>,

    /// JSON metadata file for the batch catalog
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Don't emit disassembly comments
    #[arg(long)]
    no_comments: bool,

    /// Put all code in one routine (for complex ROMs)
    #[arg(long)]
    single_function: bool,

    /// Disable the automatic single-function fallback
    #[arg(long)]
    no_auto: bool,

    /// Extra debug output (ROM info, hex dump, analysis summary)
    #[arg(long)]
    debug: bool,

    /// Print the disassembly and exit
    #[arg(long)]
    disasm: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut gen_opts = EmitOptions {
        emit_comments: !args.no_comments,
        single_function_mode: args.single_function,
        debug: args.debug,
        ..EmitOptions::default()
    };

    if let Some(rom_dir) = args.batch {
        let options = BatchOptions {
            rom_dir,
            output_dir: args.output.clone(),
            metadata_file: args.metadata,
            gen_opts,
            auto_mode: !args.no_auto,
        };
        let summary = compile_batch(&options)?;
        println!(
            "Compiled {} ROMs into {}",
            summary.roms.len(),
            args.output.display()
        );
        for rom in &summary.roms {
            let mode = if rom.single_function {
                "single-function"
            } else {
                "per-function"
            };
            println!("  {} ({}, {})", rom.prefix, rom.title, mode);
        }
        return Ok(());
    }

    let input = args.input.expect("clap requires input without --batch");

    // Phase 1: load
    println!("Loading ROM: {}", input.display());
    let mut rom = rom::load(&input).context("load phase failed")?;
    if let Some(name) = args.name {
        rom.name = name;
    }
    rom::print_rom_info(&rom);

    let variant = rom::detect_variant(&rom);
    if variant != rom::Variant::Chip8 {
        eprintln!(
            "warning: {} opcodes detected; only base CHIP-8 is recompiled",
            variant
        );
    }
    if args.debug {
        print!("{}", rom::dump_rom_hex(&rom));
    }

    // Phase 2: decode
    println!("Decoding instructions...");
    let instructions = decode::decode_rom(&rom.data, 0x200);
    println!("  Decoded {} instructions", instructions.len());

    if args.disasm {
        for instr in &instructions {
            println!("{}", decode::disassemble(instr));
        }
        return Ok(());
    }

    // Phase 3: analyze
    println!("Analyzing control flow...");
    let analysis = cfg::analyze(instructions, 0x200);
    println!(
        "  {} functions, {} basic blocks, {} labels",
        analysis.stats.total_functions,
        analysis.stats.total_blocks,
        analysis.label_addresses.len()
    );
    if args.debug {
        cfg::print_analysis_summary(&analysis);
    }

    // Phase 4: generate
    println!("Generating Rust code...");
    gen_opts.rom_name = rom.name.clone();
    gen_opts.title = meta::pretty_title(&rom.name);
    if let Some(path) = &args.metadata {
        let metadata = meta::load_metadata_file(path).context("load phase failed")?;
        if let Some(m) = metadata.get(&rom.name) {
            if let Some(title) = &m.title {
                gen_opts.title = title.clone();
            }
            if m.cpu_hz > 0 {
                gen_opts.recommended_cpu_hz = m.cpu_hz;
            }
        }
    }

    let output = match emit::generate(&analysis, &rom.data, &gen_opts) {
        Ok(output) => output,
        Err(EmitError::NeedsSingleFunction(reason)) if !args.no_auto => {
            println!("  Falling back to single-function mode: {}", reason);
            gen_opts.single_function_mode = true;
            emit::generate(&analysis, &rom.data, &gen_opts).context("generate phase failed")?
        }
        Err(EmitError::NeedsSingleFunction(reason)) => {
            bail!("generate phase failed: {} (retry with --single-function)", reason);
        }
        Err(e) => return Err(e).context("generate phase failed"),
    };
    if gen_opts.single_function_mode {
        println!("  Using single-function mode");
    }

    emit::write_output(&output, &args.output).context("generate phase failed")?;

    println!("\nGenerated files in {}:", args.output.display());
    for file in [
        &output.cargo_file,
        &output.header_file,
        &output.source_file,
        &output.rom_data_file,
        &output.main_file,
    ] {
        if !file.is_empty() {
            println!("  {}", file);
        }
    }
    println!("\nBuild and run:");
    println!("  cd {} && cargo run --release", args.output.display());

    Ok(())
}
