//! Symbol tables and scope resolution.
//!
//! Two tables exist at most at any time: the global table built by a
//! pre-pass over the AST (variables first, then procedure/function
//! signatures so forward references resolve), and a per-routine local table
//! built by the code generator immediately before lowering a body.
//!
//! Name lookup is a fixed walk (parameter list, declared locals, the
//! enclosing function's own name as its return slot, then the global
//! table), implemented once in [`Scope::resolve`] and shared by the type
//! checker and the code generator so the two passes can never drift.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Parameter, ProcFuncHeading, Program, VarDecl};
use crate::error::{CompileError, CompileResult};
use crate::ty::ExprType;

/// What a symbol denotes and how its storage is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
  Integer,
  Real,
  Str,
  /// By-reference parameter slots hold a pointer to the caller's storage.
  IntegerPtr,
  RealPtr,
  StrPtr,
  /// Stack slot holding the buffer pointer for one static `concat` site.
  ConcatTemp,
  Function,
  Procedure,
}

impl SymbolKind {
  /// Kind of a by-value slot of the given type.
  pub fn of_value(ty: ExprType) -> SymbolKind {
    match ty {
      ExprType::Integer => SymbolKind::Integer,
      ExprType::Real => SymbolKind::Real,
      ExprType::Str => SymbolKind::Str,
      ExprType::Unresolved => unreachable!("declarations always carry a concrete type"),
    }
  }

  /// Kind of a by-reference slot of the given type.
  pub fn of_reference(ty: ExprType) -> SymbolKind {
    match ty {
      ExprType::Integer => SymbolKind::IntegerPtr,
      ExprType::Real => SymbolKind::RealPtr,
      ExprType::Str => SymbolKind::StrPtr,
      ExprType::Unresolved => unreachable!("declarations always carry a concrete type"),
    }
  }

  /// Value type seen by an expression reading through this symbol, if any.
  pub fn value_type(self) -> Option<ExprType> {
    match self {
      SymbolKind::Integer | SymbolKind::IntegerPtr => Some(ExprType::Integer),
      SymbolKind::Real | SymbolKind::RealPtr => Some(ExprType::Real),
      SymbolKind::Str | SymbolKind::StrPtr | SymbolKind::ConcatTemp => Some(ExprType::Str),
      SymbolKind::Function | SymbolKind::Procedure => None,
    }
  }

  pub fn is_reference(self) -> bool {
    matches!(
      self,
      SymbolKind::IntegerPtr | SymbolKind::RealPtr | SymbolKind::StrPtr
    )
  }
}

/// Where a symbol's storage lives: a data/bss label for globals, a
/// displacement below the frame pointer for locals. Exactly one of the two,
/// by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
  Label(String),
  /// `[rbp - offset]`, offset positive and 8-byte aligned.
  Offset(i64),
}

#[derive(Debug, Clone)]
pub struct Symbol {
  pub kind: SymbolKind,
  pub storage: Storage,
  /// Present for `Function`/`Procedure` symbols; call sites reach the
  /// declared signature through here.
  pub heading: Option<Rc<ProcFuncHeading>>,
}

/// Flat name-to-symbol mapping for one scope. Shadowing within a scope is
/// an error; a local table deliberately does not consult the global table.
#[derive(Debug, Default)]
pub struct SymbolTable {
  symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn exists(&self, name: &str) -> bool {
    self.symbols.contains_key(name)
  }

  pub fn insert(&mut self, name: &str, symbol: Symbol) -> CompileResult<()> {
    if self.exists(name) {
      return Err(CompileError::duplicate(name));
    }
    self.symbols.insert(name.to_string(), symbol);
    Ok(())
  }

  pub fn get(&self, name: &str) -> CompileResult<&Symbol> {
    self
      .symbols
      .get(name)
      .ok_or_else(|| CompileError::undefined(name))
  }
}

/// Assembly label for a global variable.
pub fn global_var_label(name: &str) -> String {
  format!("glob_{name}")
}

/// Assembly label for a procedure or function.
pub fn routine_label(name: &str) -> String {
  format!("pf_{name}")
}

/// Build the global table: variables first, then routine signatures, so a
/// routine body may call routines declared after it. Signatures that exceed
/// the register calling convention are rejected here rather than at the
/// call site.
pub fn collect_globals(program: &Program, source: &str) -> CompileResult<SymbolTable> {
  let mut table = SymbolTable::new();

  for decl in &program.globals {
    table.insert(
      &decl.name,
      Symbol {
        kind: SymbolKind::of_value(decl.ty),
        storage: Storage::Label(global_var_label(&decl.name)),
        heading: None,
      },
    )?;
  }

  for routine in &program.routines {
    let heading = &routine.heading;
    if heading.int_class_arity() > 6 {
      return Err(CompileError::unsupported(
        source,
        routine.loc,
        format!(
          "`{}` takes more than six integer-class parameters",
          heading.name
        ),
      ));
    }
    if heading.real_class_arity() > 8 {
      return Err(CompileError::unsupported(
        source,
        routine.loc,
        format!("`{}` takes more than eight real parameters", heading.name),
      ));
    }
    let kind = if heading.is_function() {
      SymbolKind::Function
    } else {
      SymbolKind::Procedure
    };
    table.insert(
      &heading.name,
      Symbol {
        kind,
        storage: Storage::Label(routine_label(&heading.name)),
        heading: Some(Rc::new(heading.clone())),
      },
    )?;
  }

  Ok(table)
}

/// Resolution result of a name at a program point.
#[derive(Debug)]
pub enum Binding<'a> {
  Parameter { index: usize, param: &'a Parameter },
  Local(&'a VarDecl),
  /// The enclosing function's own name: its return-value slot.
  ReturnSlot(ExprType),
  Global(&'a Symbol),
}

/// View of the names visible at a program point: the global table plus,
/// inside a routine body, its heading and declared locals.
pub struct Scope<'a> {
  globals: &'a SymbolTable,
  heading: Option<&'a ProcFuncHeading>,
  locals: &'a [VarDecl],
}

impl<'a> Scope<'a> {
  pub fn global(globals: &'a SymbolTable) -> Self {
    Self {
      globals,
      heading: None,
      locals: &[],
    }
  }

  pub fn routine(globals: &'a SymbolTable, heading: &'a ProcFuncHeading, locals: &'a [VarDecl]) -> Self {
    Self {
      globals,
      heading: Some(heading),
      locals,
    }
  }

  pub fn in_routine(&self) -> bool {
    self.heading.is_some()
  }

  /// The three-step lookup: parameters, locals, the function's own name,
  /// then globals.
  pub fn resolve(&self, name: &str) -> CompileResult<Binding<'a>> {
    if let Some(heading) = self.heading {
      if let Some((index, param)) = heading
        .params
        .iter()
        .enumerate()
        .find(|(_, p)| p.name == name)
      {
        return Ok(Binding::Parameter { index, param });
      }
      if let Some(decl) = self.locals.iter().find(|d| d.name == name) {
        return Ok(Binding::Local(decl));
      }
      if heading.name == name
        && let Some(return_type) = heading.return_type
      {
        return Ok(Binding::ReturnSlot(return_type));
      }
    }
    self.globals.get(name).map(Binding::Global)
  }
}
