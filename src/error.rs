//! Shared error utilities used across the compilation pipeline.
//!
//! Diagnostics are kept lightweight on purpose: lexical and syntactic
//! errors point at the offending source line with a caret, later stages
//! report line and column only. The first error aborts the compilation;
//! there is no recovery or multi-error reporting.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("lex error at line {line}, column {column}: {message}\n{source_line}\n{marker}"))]
  Lex {
    message: String,
    line: usize,
    column: usize,
    source_line: String,
    marker: String,
  },

  #[snafu(display("parse error at line {line}, column {column}: {message}\n{source_line}\n{marker}"))]
  Parse {
    message: String,
    line: usize,
    column: usize,
    source_line: String,
    marker: String,
  },

  #[snafu(display("type error at line {line}, column {column}: {message}"))]
  Type {
    message: String,
    line: usize,
    column: usize,
  },

  #[snafu(display("undefined symbol `{name}`"))]
  Undefined { name: String },

  #[snafu(display("duplicate symbol `{name}`"))]
  Duplicate { name: String },

  #[snafu(display("unsupported construct at line {line}, column {column}: {message}"))]
  Unsupported {
    message: String,
    line: usize,
    column: usize,
  },
}

impl CompileError {
  /// Lexical error anchored at a byte offset in the source.
  pub fn lex(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (line, column, source_line, marker) = locate(source, loc);
    Self::Lex {
      message: message.into(),
      line,
      column,
      source_line,
      marker,
    }
  }

  /// Syntax error anchored at a byte offset in the source.
  pub fn parse(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (line, column, source_line, marker) = locate(source, loc);
    Self::Parse {
      message: message.into(),
      line,
      column,
      source_line,
      marker,
    }
  }

  /// Type-rule violation anchored at a byte offset in the source.
  pub fn type_error(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (line, column, _, _) = locate(source, loc);
    Self::Type {
      message: message.into(),
      line,
      column,
    }
  }

  /// A construct the compiler recognises but deliberately refuses to lower.
  pub fn unsupported(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let (line, column, _, _) = locate(source, loc);
    Self::Unsupported {
      message: message.into(),
      line,
      column,
    }
  }

  pub fn undefined(name: impl Into<String>) -> Self {
    Self::Undefined { name: name.into() }
  }

  pub fn duplicate(name: impl Into<String>) -> Self {
    Self::Duplicate { name: name.into() }
  }
}

/// Map a byte offset to (line, column, source line, caret marker), all
/// one-based. Offsets past the end clamp to the last line.
fn locate(source: &str, loc: usize) -> (usize, usize, String, String) {
  let safe_loc = loc.min(source.len());
  let line_start = source[..safe_loc].rfind('\n').map(|p| p + 1).unwrap_or(0);
  let line_end = source[safe_loc..]
    .find('\n')
    .map(|p| safe_loc + p)
    .unwrap_or(source.len());
  let line = source[..safe_loc].matches('\n').count() + 1;
  let column = source[line_start..safe_loc].chars().count() + 1;
  let source_line = source[line_start..line_end].to_string();
  let marker = format!("{}^", " ".repeat(column - 1));
  (line, column, source_line, marker)
}
