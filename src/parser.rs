//! Recursive-descent parser producing the program AST.
//!
//! One function per grammar production: program, variable declarations,
//! procedure/function declarations, compound statement, statement,
//! expression, simple expression, term, factor. Operator precedence is
//! encoded structurally (`simple_expr` wraps `term` wraps `factor`), and a
//! statement-position identifier is disambiguated by one token of lookahead
//! after it is consumed: `:=` makes it an assignment target, `(` a call
//! with arguments, anything else a bare procedure call.
//!
//! The parser performs no recovery; the first grammar error aborts the
//! whole parse with the offending location and lookahead text.

use crate::ast::{
  BinaryOp, Expr, ExprKind, Parameter, ProcFuncHeading, Program, Routine, Stmt, VarDecl,
};
use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{LitValue, Token, TokenKind, describe_token};
use crate::ty::ExprType;

/// Parse a token stream into a program.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  let mut stream = TokenStream::new(tokens, source);

  stream.expect(TokenKind::Program)?;
  let (name, _) = stream.get_ident()?;
  stream.expect(TokenKind::Semicolon)?;

  let globals = if stream.check(TokenKind::Var) {
    parse_var_decls(&mut stream)?
  } else {
    Vec::new()
  };

  let mut routines = Vec::new();
  while stream.check(TokenKind::Function) || stream.check(TokenKind::Procedure) {
    routines.push(parse_routine(&mut stream)?);
  }

  let body = parse_compound(&mut stream)?;
  stream.expect(TokenKind::Period)?;
  stream.expect(TokenKind::Eof)?;

  Ok(Program {
    name,
    globals,
    routines,
    body,
  })
}

/// `var` followed by one or more `name {, name} : type ;` groups.
fn parse_var_decls(stream: &mut TokenStream) -> CompileResult<Vec<VarDecl>> {
  stream.expect(TokenKind::Var)?;
  let mut decls = Vec::new();

  loop {
    let mut names = vec![stream.get_ident()?];
    while stream.at(TokenKind::Comma) {
      names.push(stream.get_ident()?);
    }
    stream.expect(TokenKind::Colon)?;
    let ty = parse_type_name(stream)?;
    stream.expect(TokenKind::Semicolon)?;
    for (name, loc) in names {
      decls.push(VarDecl { name, ty, loc });
    }

    if !stream.check(TokenKind::Ident) {
      break;
    }
  }

  Ok(decls)
}

/// Type names are predefined identifiers, not reserved words.
fn parse_type_name(stream: &mut TokenStream) -> CompileResult<ExprType> {
  let (name, loc) = stream.get_ident()?;
  match name.as_str() {
    "integer" => Ok(ExprType::Integer),
    "real" => Ok(ExprType::Real),
    "string" => Ok(ExprType::Str),
    other => Err(CompileError::parse(
      stream.source,
      loc,
      format!("expected a type name, but got \"{other}\""),
    )),
  }
}

fn parse_routine(stream: &mut TokenStream) -> CompileResult<Routine> {
  let is_function = stream.at(TokenKind::Function);
  if !is_function {
    stream.expect(TokenKind::Procedure)?;
  }
  let (name, loc) = stream.get_ident()?;

  let params = if stream.at(TokenKind::LParen) {
    parse_params(stream)?
  } else {
    Vec::new()
  };

  let return_type = if is_function {
    stream.expect(TokenKind::Colon)?;
    let type_loc = stream.loc();
    let ty = parse_type_name(stream)?;
    if ty == ExprType::Str {
      // String results would need caller-provided buffers; rejected instead
      // of silently miscompiled.
      return Err(CompileError::unsupported(
        stream.source,
        type_loc,
        "a function cannot return a string",
      ));
    }
    Some(ty)
  } else {
    None
  };

  stream.expect(TokenKind::Semicolon)?;

  let locals = if stream.check(TokenKind::Var) {
    parse_var_decls(stream)?
  } else {
    Vec::new()
  };

  let body = parse_compound(stream)?;
  stream.expect(TokenKind::Semicolon)?;

  Ok(Routine {
    heading: ProcFuncHeading {
      name,
      params,
      return_type,
    },
    locals,
    body,
    loc,
  })
}

/// `["var"] name ":" type {";" ["var"] name ":" type}` up to the closing paren.
fn parse_params(stream: &mut TokenStream) -> CompileResult<Vec<Parameter>> {
  let mut params = Vec::new();

  loop {
    let by_ref = stream.at(TokenKind::Var);
    let (name, _) = stream.get_ident()?;
    stream.expect(TokenKind::Colon)?;
    let ty = parse_type_name(stream)?;
    params.push(Parameter { name, ty, by_ref });

    if !stream.at(TokenKind::Semicolon) {
      break;
    }
  }

  stream.expect(TokenKind::RParen)?;
  Ok(params)
}

fn parse_compound(stream: &mut TokenStream) -> CompileResult<Stmt> {
  stream.expect(TokenKind::Begin)?;
  let mut body = vec![parse_statement(stream)?];
  while stream.at(TokenKind::Semicolon) {
    body.push(parse_statement(stream)?);
  }
  stream.expect(TokenKind::End)?;
  Ok(Stmt::Compound { body })
}

fn parse_statement(stream: &mut TokenStream) -> CompileResult<Stmt> {
  match stream.peek_kind() {
    TokenKind::Begin => parse_compound(stream),
    TokenKind::If => {
      stream.advance();
      let cond = parse_expr(stream)?;
      stream.expect(TokenKind::Then)?;
      let then_branch = Box::new(parse_statement(stream)?);
      let else_branch = if stream.at(TokenKind::Else) {
        Some(Box::new(parse_statement(stream)?))
      } else {
        None
      };
      Ok(Stmt::If {
        cond,
        then_branch,
        else_branch,
      })
    }
    TokenKind::While => {
      stream.advance();
      let cond = parse_expr(stream)?;
      stream.expect(TokenKind::Do)?;
      let body = Box::new(parse_statement(stream)?);
      Ok(Stmt::While { cond, body })
    }
    TokenKind::Write | TokenKind::Writeln => {
      let newline = stream.peek_kind() == TokenKind::Writeln;
      stream.advance();
      stream.expect(TokenKind::LParen)?;
      let args = parse_arg_list(stream)?;
      stream.expect(TokenKind::RParen)?;
      Ok(Stmt::Write { args, newline })
    }
    TokenKind::Ident => {
      let (name, loc) = stream.get_ident()?;
      if stream.at(TokenKind::Assign) {
        let value = parse_simple_expr(stream)?;
        return Ok(Stmt::Assign { name, loc, value });
      }
      let args = if stream.at(TokenKind::LParen) {
        let args = parse_arg_list(stream)?;
        stream.expect(TokenKind::RParen)?;
        args
      } else {
        Vec::new()
      };
      Ok(Stmt::Call { name, loc, args })
    }
    _ => {
      let got = describe_token(stream.peek(), stream.source);
      Err(CompileError::parse(
        stream.source,
        stream.loc(),
        format!("expected a statement, but got \"{got}\""),
      ))
    }
  }
}

/// One or more comma-separated simple expressions (the `args` production).
fn parse_arg_list(stream: &mut TokenStream) -> CompileResult<Vec<Expr>> {
  let mut args = vec![parse_simple_expr(stream)?];
  while stream.at(TokenKind::Comma) {
    args.push(parse_simple_expr(stream)?);
  }
  Ok(args)
}

/// `expr ::= simpleExpr [relop simpleExpr]`, at most one relational level.
fn parse_expr(stream: &mut TokenStream) -> CompileResult<Expr> {
  let lhs = parse_simple_expr(stream)?;

  let op = match stream.peek_kind() {
    TokenKind::Equal => BinaryOp::Eq,
    TokenKind::NotEqual => BinaryOp::Ne,
    TokenKind::Less => BinaryOp::Lt,
    TokenKind::LessEq => BinaryOp::Le,
    TokenKind::Greater => BinaryOp::Gt,
    TokenKind::GreaterEq => BinaryOp::Ge,
    _ => return Ok(lhs),
  };
  let loc = stream.loc();
  stream.advance();
  let rhs = parse_simple_expr(stream)?;

  Ok(Expr::new(
    ExprKind::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    },
    loc,
  ))
}

fn parse_simple_expr(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_term(stream)?;

  loop {
    let op = match stream.peek_kind() {
      TokenKind::Plus => BinaryOp::Add,
      TokenKind::Minus => BinaryOp::Sub,
      _ => break,
    };
    let loc = stream.loc();
    stream.advance();
    let rhs = parse_term(stream)?;
    node = Expr::new(
      ExprKind::Binary {
        op,
        lhs: Box::new(node),
        rhs: Box::new(rhs),
      },
      loc,
    );
  }

  Ok(node)
}

fn parse_term(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_factor(stream)?;

  loop {
    let op = match stream.peek_kind() {
      TokenKind::Star => BinaryOp::Mul,
      TokenKind::Slash => BinaryOp::FDiv,
      TokenKind::Div => BinaryOp::IntDiv,
      TokenKind::Mod => BinaryOp::Mod,
      _ => break,
    };
    let loc = stream.loc();
    stream.advance();
    let rhs = parse_factor(stream)?;
    node = Expr::new(
      ExprKind::Binary {
        op,
        lhs: Box::new(node),
        rhs: Box::new(rhs),
      },
      loc,
    );
  }

  Ok(node)
}

fn parse_factor(stream: &mut TokenStream) -> CompileResult<Expr> {
  match stream.peek_kind() {
    TokenKind::IntLit | TokenKind::RealLit | TokenKind::StrLit => parse_literal(stream, false),
    TokenKind::Minus => {
      // Unary minus folds into an immediately following numeric literal
      // only; `-(a+b)` is outside the grammar and stays rejected.
      let loc = stream.loc();
      stream.advance();
      match stream.peek_kind() {
        TokenKind::IntLit | TokenKind::RealLit => parse_literal(stream, true),
        _ => {
          let got = describe_token(stream.peek(), stream.source);
          Err(CompileError::parse(
            stream.source,
            loc,
            format!("unary minus must be followed by a numeric literal, but got \"{got}\""),
          ))
        }
      }
    }
    TokenKind::LParen => {
      stream.advance();
      let node = parse_simple_expr(stream)?;
      stream.expect(TokenKind::RParen)?;
      Ok(node)
    }
    TokenKind::Concat => {
      let loc = stream.loc();
      stream.advance();
      stream.expect(TokenKind::LParen)?;
      let args = parse_arg_list(stream)?;
      stream.expect(TokenKind::RParen)?;
      if args.len() < 2 {
        return Err(CompileError::parse(
          stream.source,
          loc,
          "concat needs at least two arguments",
        ));
      }
      Ok(Expr::new(ExprKind::Concat { args }, loc))
    }
    TokenKind::Ident => {
      let (name, loc) = stream.get_ident()?;
      if stream.at(TokenKind::LParen) {
        let args = parse_arg_list(stream)?;
        stream.expect(TokenKind::RParen)?;
        return Ok(Expr::new(ExprKind::Call { name, args }, loc));
      }
      Ok(Expr::new(ExprKind::Var { name }, loc))
    }
    _ => {
      let got = describe_token(stream.peek(), stream.source);
      Err(CompileError::parse(
        stream.source,
        stream.loc(),
        format!("expected an expression, but got \"{got}\""),
      ))
    }
  }
}

/// Consume a literal token, negating numeric values when requested.
fn parse_literal(stream: &mut TokenStream, negate: bool) -> CompileResult<Expr> {
  let loc = stream.loc();
  let token = stream.advance().ok_or_else(|| {
    CompileError::parse(stream.source, loc, "unexpected end of input in expression")
  })?;
  let kind = match token.value {
    Some(LitValue::Int(v)) => ExprKind::IntLit(if negate { -v } else { v }),
    Some(LitValue::Real(v)) => ExprKind::RealLit(if negate { -v } else { v }),
    Some(LitValue::Str(v)) => ExprKind::StrLit(v),
    None => {
      return Err(CompileError::parse(
        stream.source,
        loc,
        "internal error: literal token missing value",
      ));
    }
  };
  Ok(Expr::new(kind, loc))
}

/// Lightweight cursor over the token vector with one-token lookahead.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_kind(&self) -> TokenKind {
    self.peek().map(|t| t.kind).unwrap_or(TokenKind::Eof)
  }

  /// Byte offset of the current token, used to anchor diagnostics.
  fn loc(&self) -> usize {
    self.peek().map(|t| t.loc).unwrap_or(self.source.len())
  }

  fn advance(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    if token.is_some() {
      self.pos += 1;
    }
    token
  }

  /// Non-consuming kind test.
  fn check(&self, kind: TokenKind) -> bool {
    self.peek_kind() == kind
  }

  /// Consume the current token if it has the given kind.
  fn at(&mut self, kind: TokenKind) -> bool {
    if self.peek_kind() == kind {
      self.pos += 1;
      return true;
    }
    false
  }

  fn expect(&mut self, kind: TokenKind) -> CompileResult<Token> {
    if self.peek_kind() == kind {
      let token = self.tokens[self.pos].clone();
      self.pos += 1;
      return Ok(token);
    }
    let got = describe_token(self.peek(), self.source);
    Err(CompileError::parse(
      self.source,
      self.loc(),
      format!("expected {}, but got \"{got}\"", kind_spelling(kind)),
    ))
  }

  /// Consume the current token as an identifier, returning its normalized
  /// name and location.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
      && let Some(LitValue::Str(name)) = token.value.clone()
    {
      let loc = token.loc;
      self.pos += 1;
      return Ok((name, loc));
    }
    let got = describe_token(self.peek(), self.source);
    Err(CompileError::parse(
      self.source,
      self.loc(),
      format!("expected an identifier, but got \"{got}\""),
    ))
  }
}

/// Spelling used in "expected ..." diagnostics.
fn kind_spelling(kind: TokenKind) -> &'static str {
  match kind {
    TokenKind::Ident => "an identifier",
    TokenKind::IntLit => "an integer literal",
    TokenKind::RealLit => "a real literal",
    TokenKind::StrLit => "a string literal",
    TokenKind::Plus => "\"+\"",
    TokenKind::Minus => "\"-\"",
    TokenKind::Star => "\"*\"",
    TokenKind::Slash => "\"/\"",
    TokenKind::Div => "\"div\"",
    TokenKind::Mod => "\"mod\"",
    TokenKind::Assign => "\":=\"",
    TokenKind::Equal => "\"=\"",
    TokenKind::NotEqual => "\"<>\"",
    TokenKind::Less => "\"<\"",
    TokenKind::LessEq => "\"<=\"",
    TokenKind::Greater => "\">\"",
    TokenKind::GreaterEq => "\">=\"",
    TokenKind::LParen => "\"(\"",
    TokenKind::RParen => "\")\"",
    TokenKind::Comma => "\",\"",
    TokenKind::Colon => "\":\"",
    TokenKind::Semicolon => "\";\"",
    TokenKind::Period => "\".\"",
    TokenKind::Program => "\"program\"",
    TokenKind::Var => "\"var\"",
    TokenKind::Begin => "\"begin\"",
    TokenKind::End => "\"end\"",
    TokenKind::If => "\"if\"",
    TokenKind::Then => "\"then\"",
    TokenKind::Else => "\"else\"",
    TokenKind::While => "\"while\"",
    TokenKind::Do => "\"do\"",
    TokenKind::Function => "\"function\"",
    TokenKind::Procedure => "\"procedure\"",
    TokenKind::Write => "\"write\"",
    TokenKind::Writeln => "\"writeln\"",
    TokenKind::Concat => "\"concat\"",
    TokenKind::Eof => "EOF",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;

  fn parse_source(source: &str) -> CompileResult<Program> {
    parse(tokenize(source)?, source)
  }

  #[test]
  fn precedence_binds_multiplication_tighter() {
    let program = parse_source("program p; begin writeln(2+3*4) end.").expect("parse failed");
    let Stmt::Compound { body } = &program.body else {
      panic!("body is not a compound");
    };
    let Stmt::Write { args, newline } = &body[0] else {
      panic!("expected a writeln");
    };
    assert!(*newline);
    let ExprKind::Binary { op, rhs, .. } = &args[0].kind else {
      panic!("expected a binary root");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(
      rhs.kind,
      ExprKind::Binary {
        op: BinaryOp::Mul,
        ..
      }
    ));
  }

  #[test]
  fn statement_identifier_disambiguates_on_lookahead() {
    let program =
      parse_source("program p; var x: integer; begin x := 1; foo; bar(2) end.")
        .expect("parse failed");
    let Stmt::Compound { body } = &program.body else {
      panic!("body is not a compound");
    };
    assert!(matches!(&body[0], Stmt::Assign { name, .. } if name == "x"));
    assert!(matches!(&body[1], Stmt::Call { name, args, .. } if name == "foo" && args.is_empty()));
    assert!(matches!(&body[2], Stmt::Call { name, args, .. } if name == "bar" && args.len() == 1));
  }

  #[test]
  fn else_attaches_to_nearest_if() {
    let program = parse_source(
      "program p; var x: integer; begin if 1 then if 2 then x := 1 else x := 2 end.",
    )
    .expect("parse failed");
    let Stmt::Compound { body } = &program.body else {
      panic!("body is not a compound");
    };
    let Stmt::If {
      then_branch,
      else_branch,
      ..
    } = &body[0]
    else {
      panic!("expected an if");
    };
    assert!(else_branch.is_none());
    assert!(matches!(
      then_branch.as_ref(),
      Stmt::If {
        else_branch: Some(_),
        ..
      }
    ));
  }

  #[test]
  fn unary_minus_folds_into_numeric_literals_only() {
    let program = parse_source("program p; begin writeln(-2 * 7) end.").expect("parse failed");
    let Stmt::Compound { body } = &program.body else {
      panic!("body is not a compound");
    };
    let Stmt::Write { args, .. } = &body[0] else {
      panic!("expected a write");
    };
    let ExprKind::Binary { lhs, .. } = &args[0].kind else {
      panic!("expected a binary root");
    };
    assert!(matches!(lhs.kind, ExprKind::IntLit(-2)));

    let err = parse_source("program p; var a: integer; begin a := -(a+1) end.")
      .expect_err("should reject");
    assert!(err.to_string().contains("unary minus"));
  }

  #[test]
  fn routine_headings_record_parameters_and_return_type() {
    let program = parse_source(
      "program p; \
       function f(n: integer; var r: real): integer; begin f := n end; \
       procedure q; begin writeln(1) end; \
       begin q end.",
    )
    .expect("parse failed");
    assert_eq!(program.routines.len(), 2);
    let f = &program.routines[0].heading;
    assert_eq!(f.name, "f");
    assert_eq!(f.return_type, Some(ExprType::Integer));
    assert_eq!(f.params.len(), 2);
    assert!(!f.params[0].by_ref);
    assert!(f.params[1].by_ref);
    assert_eq!(f.params[1].ty, ExprType::Real);
    assert!(!program.routines[1].heading.is_function());
  }

  #[test]
  fn string_function_return_is_unsupported() {
    let err = parse_source("program p; function f: string; begin f := 'x' end; begin f end.")
      .expect_err("should reject");
    assert!(matches!(err, CompileError::Unsupported { .. }));
  }

  #[test]
  fn concat_requires_two_arguments() {
    let err =
      parse_source("program p; begin writeln(concat('a')) end.").expect_err("should reject");
    assert!(err.to_string().contains("at least two"));

    let program =
      parse_source("program p; begin writeln(concat('a', 'b', 'c')) end.").expect("parse failed");
    let Stmt::Compound { body } = &program.body else {
      panic!("body is not a compound");
    };
    let Stmt::Write { args, .. } = &body[0] else {
      panic!("expected a write");
    };
    assert!(matches!(&args[0].kind, ExprKind::Concat { args } if args.len() == 3));
  }

  #[test]
  fn grammar_errors_carry_location_and_lookahead() {
    let err = parse_source("program p; begin x := end.").expect_err("should reject");
    let text = err.to_string();
    assert!(text.contains("line 1"));
    assert!(text.contains("\"end\""));
  }

  #[test]
  fn trailing_tokens_after_the_final_period_are_rejected() {
    let err = parse_source("program p; begin writeln(1) end. extra").expect_err("should reject");
    assert!(text_of(&err).contains("expected EOF"));
  }

  fn text_of(err: &CompileError) -> String {
    err.to_string()
  }
}
