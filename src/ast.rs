//! AST data model shared by the parser, type checker, and code generator.
//!
//! The tree is plain owned data: a `Program` owns its routines, every node
//! owns its children. Expression nodes carry an `ExprType` slot that the
//! parser leaves `Unresolved` and the type checker fills in exactly once.
//! Identifier occurrences are disambiguated at parse time into distinct
//! variants (assignment target, call, plain variable) instead of retyping a
//! shared token in place.

use crate::ty::ExprType;

/// Binary operators. Relational operators produce a boolean encoded as the
/// integers `0` (false) and `-1` (true).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  /// `/`, which always yields a real, whatever the operands.
  FDiv,
  /// `div`, integer division.
  IntDiv,
  /// `mod`, integer remainder.
  Mod,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl BinaryOp {
  /// Source spelling, used in diagnostics.
  pub fn symbol(self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Mul => "*",
      BinaryOp::FDiv => "/",
      BinaryOp::IntDiv => "div",
      BinaryOp::Mod => "mod",
      BinaryOp::Eq => "=",
      BinaryOp::Ne => "<>",
      BinaryOp::Lt => "<",
      BinaryOp::Le => "<=",
      BinaryOp::Gt => ">",
      BinaryOp::Ge => ">=",
    }
  }

  pub fn is_relational(self) -> bool {
    matches!(
      self,
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
    )
  }
}

/// Expression node: a kind plus the type slot and the source offset of the
/// token that introduced it.
#[derive(Debug, Clone)]
pub struct Expr {
  pub kind: ExprKind,
  pub ty: ExprType,
  pub loc: usize,
}

impl Expr {
  pub fn new(kind: ExprKind, loc: usize) -> Self {
    Self {
      kind,
      ty: ExprType::Unresolved,
      loc,
    }
  }

  pub fn is_relational(&self) -> bool {
    matches!(&self.kind, ExprKind::Binary { op, .. } if op.is_relational())
  }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
  IntLit(i64),
  RealLit(f64),
  StrLit(String),
  /// An identifier in evaluation position. May resolve to a parameter, a
  /// local, the enclosing function's return slot, a global variable, or a
  /// zero-argument function call.
  Var { name: String },
  /// A parenthesized call of a function.
  Call { name: String, args: Vec<Expr> },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  /// Variadic string concatenation into a per-occurrence temporary buffer.
  Concat { args: Vec<Expr> },
}

#[derive(Debug, Clone)]
pub enum Stmt {
  Assign {
    name: String,
    loc: usize,
    value: Expr,
  },
  /// Procedure call statement; `args` is empty for the bare-identifier form.
  Call {
    name: String,
    loc: usize,
    args: Vec<Expr>,
  },
  If {
    cond: Expr,
    then_branch: Box<Stmt>,
    else_branch: Option<Box<Stmt>>,
  },
  While {
    cond: Expr,
    body: Box<Stmt>,
  },
  /// `write` or `writeln`.
  Write { args: Vec<Expr>, newline: bool },
  Compound { body: Vec<Stmt> },
}

/// A `var` declaration entry.
#[derive(Debug, Clone)]
pub struct VarDecl {
  pub name: String,
  pub ty: ExprType,
  pub loc: usize,
}

#[derive(Debug, Clone)]
pub struct Parameter {
  pub name: String,
  pub ty: ExprType,
  pub by_ref: bool,
}

/// Signature of a declared procedure or function. `return_type` is `None`
/// for procedures and restricted to integer/real for functions.
#[derive(Debug, Clone)]
pub struct ProcFuncHeading {
  pub name: String,
  pub params: Vec<Parameter>,
  pub return_type: Option<ExprType>,
}

impl ProcFuncHeading {
  pub fn is_function(&self) -> bool {
    self.return_type.is_some()
  }

  /// Number of integer-class argument registers this signature consumes:
  /// integer and string values plus every by-reference parameter.
  pub fn int_class_arity(&self) -> usize {
    self
      .params
      .iter()
      .filter(|p| p.by_ref || p.ty != ExprType::Real)
      .count()
  }

  /// Number of real-class argument registers: by-value reals only.
  pub fn real_class_arity(&self) -> usize {
    self
      .params
      .iter()
      .filter(|p| !p.by_ref && p.ty == ExprType::Real)
      .count()
  }
}

/// One declared procedure or function with its locals and body.
#[derive(Debug, Clone)]
pub struct Routine {
  pub heading: ProcFuncHeading,
  pub locals: Vec<VarDecl>,
  pub body: Stmt,
  pub loc: usize,
}

/// Root of the tree: `program <name>; <vars> <routines> <body>.`
#[derive(Debug, Clone)]
pub struct Program {
  pub name: String,
  pub globals: Vec<VarDecl>,
  pub routines: Vec<Routine>,
  pub body: Stmt,
}
