//! Command-line driver: compile a Pascal source file to NASM assembly,
//! then assemble and link it with the external `nasm` and `ld` tools.

use std::fs;
use std::path::PathBuf;
use std::process::{self, Command};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about = "Compile a Pascal-subset source file to an x86-64 executable")]
struct Args {
  /// Pascal source file
  input: PathBuf,

  /// Stop after writing the assembly file; skip nasm and ld
  #[arg(short = 'S', long)]
  assembly_only: bool,
}

fn main() {
  let args = Args::parse();
  if let Err(message) = run(&args) {
    eprintln!("{message}");
    process::exit(1);
  }
}

fn run(args: &Args) -> Result<(), String> {
  let input = &args.input;
  let source = fs::read_to_string(input)
    .map_err(|err| format!("cannot read {}: {err}", input.display()))?;

  println!("1. Compile {}", input.display());
  let asm = rpascal::compile(&source).map_err(|err| err.to_string())?;

  let asm_path = input.with_extension("asm");
  println!("2. Write {}", asm_path.display());
  fs::write(&asm_path, asm)
    .map_err(|err| format!("cannot write {}: {err}", asm_path.display()))?;

  if args.assembly_only {
    return Ok(());
  }

  let obj_path = input.with_extension("o");
  println!("3. Assemble {}", obj_path.display());
  run_tool(
    Command::new("nasm")
      .arg("-f")
      .arg("elf64")
      .arg("-o")
      .arg(&obj_path)
      .arg(&asm_path),
    "nasm",
  )?;

  let exe_path = input.with_extension("");
  println!("4. Link {}", exe_path.display());
  run_tool(
    Command::new("ld").arg("-o").arg(&exe_path).arg(&obj_path),
    "ld",
  )?;

  Ok(())
}

fn run_tool(command: &mut Command, name: &str) -> Result<(), String> {
  let status = command
    .status()
    .map_err(|err| format!("failed to run {name}: {err}"))?;
  if status.success() {
    Ok(())
  } else {
    Err(format!("{name} exited with {status}"))
  }
}
