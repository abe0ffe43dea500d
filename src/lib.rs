//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and builds the program AST.
//! - `symtab` collects the global symbol table and resolves names.
//! - `typecheck` assigns every expression its type and rejects mismatches.
//! - `codegen` lowers the checked program into x86-64 NASM assembly.
//! - `error` centralises reporting utilities shared by the other modules.
//!
//! Each stage either succeeds completely or aborts the compilation with a
//! [`CompileError`]; no output is produced for a rejected program.

pub mod ast;
pub mod error;
pub mod parser;
pub mod symtab;
pub mod tokenizer;
pub mod ty;
pub mod typecheck;

mod codegen;

pub use error::{CompileError, CompileResult};

/// Compile a source string into NASM assembly text.
pub fn compile(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let mut program = parser::parse(tokens, source)?;
  let globals = symtab::collect_globals(&program, source)?;
  typecheck::check(&mut program, &globals, source)?;
  codegen::generate(&program, &globals)
}
