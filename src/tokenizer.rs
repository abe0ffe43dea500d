//! Lexical analysis: turns the raw source text into a vector of tokens.
//!
//! The tokenizer knows nothing about the grammar beyond recognising the
//! token set: literals, identifiers, keywords, operators, and punctuation.
//! Multi-character operators are matched before single-character ones to
//! avoid ambiguity, and a numeric literal only becomes a real once a decimal
//! point followed by a digit has been seen (two characters of lookahead past
//! the integer part, so `end.` still lexes as `end` + `.`).
//!
//! Comments `{ ... }` are skipped transparently between tokens. String
//! literals are single-quoted with a doubled-quote escape for an embedded
//! quote. Keywords are matched case-insensitively, as in classical Pascal.

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Ident,
  IntLit,
  RealLit,
  StrLit,
  Plus,
  Minus,
  Star,
  Slash,
  Div,
  Mod,
  Assign,
  Equal,
  NotEqual,
  Less,
  LessEq,
  Greater,
  GreaterEq,
  LParen,
  RParen,
  Comma,
  Colon,
  Semicolon,
  Period,
  Program,
  Var,
  Begin,
  End,
  If,
  Then,
  Else,
  While,
  Do,
  Function,
  Procedure,
  Write,
  Writeln,
  Concat,
  Eof,
}

/// Decoded payload of a literal token.
#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
  Int(i64),
  Real(f64),
  Str(String),
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub value: Option<LitValue>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize, value: Option<LitValue>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
    }
  }
}

/// Reserved words; `integer`/`real`/`string` stay ordinary identifiers
/// because Pascal treats type names as predefined, not reserved.
fn keyword_kind(word: &str) -> Option<TokenKind> {
  let kind = match word {
    "program" => TokenKind::Program,
    "var" => TokenKind::Var,
    "begin" => TokenKind::Begin,
    "end" => TokenKind::End,
    "if" => TokenKind::If,
    "then" => TokenKind::Then,
    "else" => TokenKind::Else,
    "while" => TokenKind::While,
    "do" => TokenKind::Do,
    "function" => TokenKind::Function,
    "procedure" => TokenKind::Procedure,
    "div" => TokenKind::Div,
    "mod" => TokenKind::Mod,
    "write" => TokenKind::Write,
    "writeln" => TokenKind::Writeln,
    "concat" => TokenKind::Concat,
    _ => return None,
  };
  Some(kind)
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];

    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if c == b'{' {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i] != b'}' {
        i += 1;
      }
      if i >= bytes.len() {
        return Err(CompileError::lex(input, start, "unterminated comment"));
      }
      i += 1; // closing brace
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      // A real literal needs a dot followed by at least one digit; a bare
      // dot belongs to the enclosing grammar (`end.`).
      let is_real =
        i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit();
      if is_real {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
          i += 1;
        }
        let text = &input[start..i];
        let value = text
          .parse::<f64>()
          .map_err(|err| CompileError::lex(input, start, format!("invalid number: {err}")))?;
        tokens.push(Token::new(
          TokenKind::RealLit,
          start,
          i - start,
          Some(LitValue::Real(value)),
        ));
      } else {
        let text = &input[start..i];
        let value = text
          .parse::<i64>()
          .map_err(|err| CompileError::lex(input, start, format!("invalid number: {err}")))?;
        tokens.push(Token::new(
          TokenKind::IntLit,
          start,
          i - start,
          Some(LitValue::Int(value)),
        ));
      }
      continue;
    }

    if c.is_ascii_alphabetic() {
      let start = i;
      i += 1;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let word = input[start..i].to_ascii_lowercase();
      let kind = keyword_kind(&word).unwrap_or(TokenKind::Ident);
      let value = if kind == TokenKind::Ident {
        Some(LitValue::Str(word))
      } else {
        None
      };
      tokens.push(Token::new(kind, start, i - start, value));
      continue;
    }

    if c == b'\'' {
      let start = i;
      i += 1;
      let mut text = String::new();
      loop {
        if i >= bytes.len() || bytes[i] == b'\n' {
          return Err(CompileError::lex(input, start, "unterminated string literal"));
        }
        if bytes[i] == b'\'' {
          // A doubled quote is an escaped quote; a single one terminates.
          if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
            text.push('\'');
            i += 2;
            continue;
          }
          i += 1;
          break;
        }
        let ch = input[i..].chars().next().unwrap_or('\0');
        text.push(ch);
        i += ch.len_utf8();
      }
      tokens.push(Token::new(
        TokenKind::StrLit,
        start,
        i - start,
        Some(LitValue::Str(text)),
      ));
      continue;
    }

    if let Some((op, kind)) = [
      (":=", TokenKind::Assign),
      ("<=", TokenKind::LessEq),
      (">=", TokenKind::GreaterEq),
      ("<>", TokenKind::NotEqual),
    ]
    .into_iter()
    .find(|(op, _)| input[i..].starts_with(op))
    {
      tokens.push(Token::new(kind, i, op.len(), None));
      i += op.len();
      continue;
    }

    let single = match c {
      b'+' => Some(TokenKind::Plus),
      b'-' => Some(TokenKind::Minus),
      b'*' => Some(TokenKind::Star),
      b'/' => Some(TokenKind::Slash),
      b'=' => Some(TokenKind::Equal),
      b'<' => Some(TokenKind::Less),
      b'>' => Some(TokenKind::Greater),
      b'(' => Some(TokenKind::LParen),
      b')' => Some(TokenKind::RParen),
      b',' => Some(TokenKind::Comma),
      b':' => Some(TokenKind::Colon),
      b';' => Some(TokenKind::Semicolon),
      b'.' => Some(TokenKind::Period),
      _ => None,
    };
    if let Some(kind) = single {
      tokens.push(Token::new(kind, i, 1, None));
      i += 1;
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::lex(
      input,
      i,
      format!("invalid token: '{invalid_char}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None));
  Ok(tokens)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}
