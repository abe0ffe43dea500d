//! Static type checking: a post-order walk that assigns every expression
//! node its type exactly once and rejects type-incompatible operations.
//!
//! The checker shares the scope resolver with the code generator, so the
//! two passes always agree on which declaration a name refers to. Any rule
//! violation aborts the compilation; there is no recovery.

use std::rc::Rc;

use crate::ast::{BinaryOp, Expr, ExprKind, Program, Routine, Stmt};
use crate::error::{CompileError, CompileResult};
use crate::symtab::{Binding, Scope, SymbolKind, SymbolTable};
use crate::ty::ExprType;

/// Type-check the whole program against the pre-collected global table.
pub fn check(program: &mut Program, globals: &SymbolTable, source: &str) -> CompileResult<()> {
  let checker = Checker { globals, source };

  for routine in &mut program.routines {
    let Routine {
      heading,
      locals,
      body,
      ..
    } = routine;
    let scope = Scope::routine(globals, heading, locals);
    checker.check_stmt(body, &scope)?;
  }

  let scope = Scope::global(globals);
  checker.check_stmt(&mut program.body, &scope)
}

struct Checker<'a> {
  globals: &'a SymbolTable,
  source: &'a str,
}

impl Checker<'_> {
  fn check_stmt(&self, stmt: &mut Stmt, scope: &Scope) -> CompileResult<()> {
    match stmt {
      Stmt::Assign { name, loc, value } => {
        let value_ty = self.check_expr(value, scope)?;
        let target_ty = self.assign_target_type(name, *loc, scope)?;
        self.check_assignable(target_ty, value_ty, name, *loc)
      }
      Stmt::Call { name, loc, args } => {
        let result = self.check_call(name, *loc, args, scope)?;
        if result.is_some() {
          return Err(CompileError::type_error(
            self.source,
            *loc,
            format!("`{name}` is a function; its result cannot be discarded"),
          ));
        }
        Ok(())
      }
      Stmt::If {
        cond,
        then_branch,
        else_branch,
      } => {
        self.check_condition(cond, scope)?;
        self.check_stmt(then_branch, scope)?;
        if let Some(else_branch) = else_branch {
          self.check_stmt(else_branch, scope)?;
        }
        Ok(())
      }
      Stmt::While { cond, body } => {
        self.check_condition(cond, scope)?;
        self.check_stmt(body, scope)
      }
      Stmt::Write { args, .. } => {
        for arg in args {
          self.check_expr(arg, scope)?;
        }
        Ok(())
      }
      Stmt::Compound { body } => {
        for stmt in body {
          self.check_stmt(stmt, scope)?;
        }
        Ok(())
      }
    }
  }

  fn check_condition(&self, cond: &mut Expr, scope: &Scope) -> CompileResult<()> {
    let ty = self.check_expr(cond, scope)?;
    if !ty.is_numeric() {
      return Err(CompileError::type_error(
        self.source,
        cond.loc,
        format!("condition must be numeric, but has type {ty}"),
      ));
    }
    Ok(())
  }

  /// Type of the storage an assignment writes into.
  fn assign_target_type(&self, name: &str, loc: usize, scope: &Scope) -> CompileResult<ExprType> {
    match scope.resolve(name)? {
      Binding::Parameter { param, .. } => Ok(param.ty),
      Binding::Local(decl) => Ok(decl.ty),
      Binding::ReturnSlot(ty) => Ok(ty),
      Binding::Global(symbol) => symbol.kind.value_type().ok_or_else(|| {
        CompileError::type_error(
          self.source,
          loc,
          format!("`{name}` is not a variable and cannot be assigned to"),
        )
      }),
    }
  }

  fn check_assignable(
    &self,
    target: ExprType,
    value: ExprType,
    name: &str,
    loc: usize,
  ) -> CompileResult<()> {
    let ok = target == value || (target == ExprType::Real && value == ExprType::Integer);
    if ok {
      Ok(())
    } else {
      Err(CompileError::type_error(
        self.source,
        loc,
        format!("cannot assign a {value} value to `{name}` of type {target}"),
      ))
    }
  }

  fn check_expr(&self, expr: &mut Expr, scope: &Scope) -> CompileResult<ExprType> {
    let ty = match &mut expr.kind {
      ExprKind::IntLit(_) => ExprType::Integer,
      ExprKind::RealLit(_) => ExprType::Real,
      ExprKind::StrLit(_) => ExprType::Str,
      ExprKind::Var { name } => {
        let name = name.clone();
        self.var_type(&name, expr.loc, scope)?
      }
      ExprKind::Call { name, args } => {
        let name = name.clone();
        let loc = expr.loc;
        self
          .check_call(&name, loc, args, scope)?
          .ok_or_else(|| {
            CompileError::type_error(
              self.source,
              loc,
              format!("procedure `{name}` cannot be used in an expression"),
            )
          })?
      }
      ExprKind::Binary { op, lhs, rhs } => {
        let op = *op;
        let loc = expr.loc;
        let lhs_ty = self.check_expr(lhs, scope)?;
        let rhs_ty = self.check_expr(rhs, scope)?;
        self.binary_type(op, lhs_ty, rhs_ty, loc)?
      }
      ExprKind::Concat { args } => {
        for arg in args.iter_mut() {
          let ty = self.check_expr(arg, scope)?;
          if ty != ExprType::Str {
            return Err(CompileError::type_error(
              self.source,
              arg.loc,
              format!("concat arguments must be strings, but got {ty}"),
            ));
          }
        }
        ExprType::Str
      }
    };
    expr.ty = ty;
    Ok(ty)
  }

  /// Type of an identifier in evaluation position. A bare global function
  /// name is a zero-argument call.
  fn var_type(&self, name: &str, loc: usize, scope: &Scope) -> CompileResult<ExprType> {
    match scope.resolve(name)? {
      Binding::Parameter { param, .. } => Ok(param.ty),
      Binding::Local(decl) => Ok(decl.ty),
      Binding::ReturnSlot(ty) => Ok(ty),
      Binding::Global(symbol) => match symbol.kind {
        SymbolKind::Procedure => Err(CompileError::type_error(
          self.source,
          loc,
          format!("procedure `{name}` cannot be used in an expression"),
        )),
        SymbolKind::Function => {
          let heading = symbol
            .heading
            .as_ref()
            .unwrap_or_else(|| unreachable!("function symbol without a heading"));
          if !heading.params.is_empty() {
            return Err(CompileError::type_error(
              self.source,
              loc,
              format!(
                "function `{name}` expects {} argument(s)",
                heading.params.len()
              ),
            ));
          }
          Ok(
            heading
              .return_type
              .unwrap_or_else(|| unreachable!("function without a return type")),
          )
        }
        kind => Ok(
          kind
            .value_type()
            .unwrap_or_else(|| unreachable!("variable symbol without a value type")),
        ),
      },
    }
  }

  /// Check a call's arguments against the callee's signature. Returns the
  /// return type (`None` for procedures).
  fn check_call(
    &self,
    name: &str,
    loc: usize,
    args: &mut [Expr],
    scope: &Scope,
  ) -> CompileResult<Option<ExprType>> {
    // The resolver maps a function's own name to its return slot; a
    // parenthesized or statement-position use is a recursive call, so go
    // straight to the global table for the signature.
    let symbol = match scope.resolve(name)? {
      Binding::Global(symbol) => symbol,
      Binding::ReturnSlot(_) => self.globals.get(name)?,
      Binding::Parameter { .. } | Binding::Local(_) => {
        return Err(CompileError::type_error(
          self.source,
          loc,
          format!("`{name}` is a variable, not a procedure or function"),
        ));
      }
    };
    let heading = match (&symbol.kind, &symbol.heading) {
      (SymbolKind::Function | SymbolKind::Procedure, Some(heading)) => Rc::clone(heading),
      (SymbolKind::Function | SymbolKind::Procedure, None) => {
        unreachable!("routine symbol without a heading")
      }
      _ => {
        return Err(CompileError::type_error(
          self.source,
          loc,
          format!("`{name}` is a variable, not a procedure or function"),
        ));
      }
    };

    if args.len() != heading.params.len() {
      return Err(CompileError::type_error(
        self.source,
        loc,
        format!(
          "`{name}` expects {} argument(s), but got {}",
          heading.params.len(),
          args.len()
        ),
      ));
    }

    for (param, arg) in heading.params.iter().zip(args.iter_mut()) {
      let arg_ty = self.check_expr(arg, scope)?;
      if param.by_ref {
        // A routine name resolves to a value type too, but it has no
        // storage to take the address of.
        let is_plain_var = match &arg.kind {
          ExprKind::Var { name } => !matches!(
            scope.resolve(name)?,
            Binding::Global(symbol)
              if matches!(symbol.kind, SymbolKind::Function | SymbolKind::Procedure)
          ),
          _ => false,
        };
        if !is_plain_var {
          return Err(CompileError::unsupported(
            self.source,
            arg.loc,
            format!(
              "argument for by-reference parameter `{}` must be a plain variable",
              param.name
            ),
          ));
        }
        if arg_ty != param.ty {
          return Err(CompileError::type_error(
            self.source,
            arg.loc,
            format!(
              "by-reference parameter `{}` has type {}, but the argument is {arg_ty}",
              param.name, param.ty
            ),
          ));
        }
      } else {
        let ok = arg_ty == param.ty || (param.ty == ExprType::Real && arg_ty == ExprType::Integer);
        if !ok {
          return Err(CompileError::type_error(
            self.source,
            arg.loc,
            format!(
              "parameter `{}` has type {}, but the argument is {arg_ty}",
              param.name, param.ty
            ),
          ));
        }
      }
    }

    Ok(heading.return_type)
  }

  /// Result type of a binary operator, or the error naming the operator and
  /// both operand types.
  fn binary_type(
    &self,
    op: BinaryOp,
    lhs: ExprType,
    rhs: ExprType,
    loc: usize,
  ) -> CompileResult<ExprType> {
    let mismatch = |hint: &str| {
      CompileError::type_error(
        self.source,
        loc,
        format!(
          "operator `{}` cannot be applied to {lhs} and {rhs}{hint}",
          op.symbol()
        ),
      )
    };

    if op.is_relational() {
      if lhs.is_numeric() && lhs == rhs {
        // The tag follows the operand type; the value is the integer
        // encoding 0 (false) / -1 (true).
        return Ok(lhs);
      }
      return Err(mismatch(""));
    }

    match op {
      BinaryOp::Add => {
        if lhs.is_numeric() && rhs.is_numeric() {
          Ok(lhs.promote(rhs))
        } else if lhs == ExprType::Str && rhs == ExprType::Str {
          Err(mismatch("; use concat to join strings"))
        } else {
          Err(mismatch(""))
        }
      }
      BinaryOp::Sub | BinaryOp::Mul => {
        if lhs.is_numeric() && rhs.is_numeric() {
          Ok(lhs.promote(rhs))
        } else {
          Err(mismatch(""))
        }
      }
      BinaryOp::FDiv => {
        if lhs.is_numeric() && rhs.is_numeric() {
          Ok(ExprType::Real)
        } else {
          Err(mismatch(""))
        }
      }
      BinaryOp::IntDiv | BinaryOp::Mod => {
        if lhs == ExprType::Integer && rhs == ExprType::Integer {
          Ok(ExprType::Integer)
        } else {
          Err(mismatch(""))
        }
      }
      _ => unreachable!("relational operators are handled above"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser;
  use crate::symtab;
  use crate::tokenizer;

  fn checked(source: &str) -> CompileResult<Program> {
    let mut program = parser::parse(tokenizer::tokenize(source)?, source)?;
    let globals = symtab::collect_globals(&program, source)?;
    check(&mut program, &globals, source)?;
    Ok(program)
  }

  fn first_write_arg(program: &Program) -> &Expr {
    let Stmt::Compound { body } = &program.body else {
      panic!("body is not a compound");
    };
    let Stmt::Write { args, .. } = &body[0] else {
      panic!("expected a write statement");
    };
    &args[0]
  }

  #[test]
  fn literals_and_mixed_arithmetic_promote() {
    let program = checked("program p; begin writeln(1 + 2.5) end.").expect("check failed");
    assert_eq!(first_write_arg(&program).ty, ExprType::Real);

    let program = checked("program p; begin writeln(1 + 2) end.").expect("check failed");
    assert_eq!(first_write_arg(&program).ty, ExprType::Integer);
  }

  #[test]
  fn slash_always_yields_real() {
    let program = checked("program p; begin writeln(7 / 2) end.").expect("check failed");
    assert_eq!(first_write_arg(&program).ty, ExprType::Real);
  }

  #[test]
  fn div_and_mod_require_integers() {
    assert!(checked("program p; begin writeln(7 div 2) end.").is_ok());
    let err = checked("program p; begin writeln(7.0 div 2) end.").expect_err("should reject");
    let text = err.to_string();
    assert!(text.contains("`div`"));
    assert!(text.contains("real"));
    assert!(text.contains("integer"));
  }

  #[test]
  fn string_plus_integer_is_a_type_error() {
    let err = checked("program p; begin writeln('a' + 1) end.").expect_err("should reject");
    assert!(matches!(err, CompileError::Type { .. }));
    let text = err.to_string();
    assert!(text.contains("`+`"));
    assert!(text.contains("string"));
    assert!(text.contains("integer"));
  }

  #[test]
  fn string_plus_string_points_to_concat() {
    let err = checked("program p; begin writeln('a' + 'b') end.").expect_err("should reject");
    assert!(err.to_string().contains("concat"));
  }

  #[test]
  fn relational_operands_must_share_a_numeric_type() {
    assert!(checked("program p; var x: integer; begin if x < 2 then writeln(1) end.").is_ok());
    let err = checked("program p; begin if 1 < 2.0 then writeln(1) end.")
      .expect_err("should reject");
    assert!(matches!(err, CompileError::Type { .. }));
  }

  #[test]
  fn assignment_allows_integer_into_real_but_not_the_reverse() {
    assert!(checked("program p; var r: real; begin r := 5 end.").is_ok());
    let err =
      checked("program p; var i: integer; begin i := 5.0 end.").expect_err("should reject");
    assert!(matches!(err, CompileError::Type { .. }));
  }

  #[test]
  fn string_into_integer_variable_is_rejected() {
    let err = checked("program p; var i: integer; begin i := 'oops' end.")
      .expect_err("should reject");
    assert!(matches!(err, CompileError::Type { .. }));
  }

  #[test]
  fn real_into_integer_returning_function_is_rejected() {
    let err = checked(
      "program p; function f: integer; begin f := 1.5 end; begin writeln(f) end.",
    )
    .expect_err("should reject");
    assert!(matches!(err, CompileError::Type { .. }));
  }

  #[test]
  fn local_shadows_global_inside_its_routine_only() {
    let program = checked(
      "program p; var x: string; \
       procedure q; var x: integer; begin x := 1 end; \
       begin x := 'ok' end.",
    )
    .expect("check failed");
    // The local assignment typed against integer, the global one against
    // string; both succeeded, so resolution picked the right binding.
    let Stmt::Compound { body } = &program.routines[0].body else {
      panic!("routine body is not a compound");
    };
    assert!(matches!(&body[0], Stmt::Assign { name, value, .. }
      if name == "x" && value.ty == ExprType::Integer));
  }

  #[test]
  fn recursive_call_and_return_slot_coexist() {
    let program = checked(
      "program p; \
       function f(n: integer): integer; \
       begin if n <= 1 then f := 1 else f := n * f(n - 1) end; \
       begin writeln(f(5)) end.",
    )
    .expect("check failed");
    assert_eq!(program.routines.len(), 1);
  }

  #[test]
  fn by_reference_argument_must_be_a_plain_variable() {
    let err = checked(
      "program p; var x: integer; \
       procedure q(var n: integer); begin n := 1 end; \
       begin q(x + 1) end.",
    )
    .expect_err("should reject");
    assert!(matches!(err, CompileError::Unsupported { .. }));
  }

  #[test]
  fn by_reference_argument_cannot_be_a_function_name() {
    let err = checked(
      "program p; \
       function f: integer; begin f := 1 end; \
       procedure q(var n: integer); begin n := 1 end; \
       begin q(f) end.",
    )
    .expect_err("should reject");
    assert!(matches!(err, CompileError::Unsupported { .. }));
  }

  #[test]
  fn argument_count_and_types_are_checked() {
    let err = checked(
      "program p; function f(n: integer): integer; begin f := n end; \
       begin writeln(f(1, 2)) end.",
    )
    .expect_err("should reject");
    assert!(err.to_string().contains("expects 1 argument"));

    let err = checked(
      "program p; function f(n: integer): integer; begin f := n end; \
       begin writeln(f('x')) end.",
    )
    .expect_err("should reject");
    assert!(matches!(err, CompileError::Type { .. }));
  }

  #[test]
  fn calling_an_undeclared_routine_is_undefined() {
    let err = checked("program p; begin mystery(1) end.").expect_err("should reject");
    assert!(matches!(err, CompileError::Undefined { .. }));
  }

  #[test]
  fn procedures_cannot_appear_in_expressions() {
    let err = checked(
      "program p; procedure q; begin writeln(1) end; begin writeln(q) end.",
    )
    .expect_err("should reject");
    assert!(err.to_string().contains("cannot be used in an expression"));
  }
}
