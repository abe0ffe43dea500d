//! End-to-end tests over the public pipeline.
//!
//! Assembly is never executed here. Integer-valued programs are instead run
//! through a small reference interpreter over the checked AST, so the
//! front-end and the middle-end are validated against the language's
//! observable semantics, while the backend is checked structurally against
//! the instruction sequences it is expected to produce.

use std::collections::HashMap;

use rpascal::ast::{BinaryOp, Expr, ExprKind, Program, Routine, Stmt};
use rpascal::ty::ExprType;
use rpascal::{CompileError, compile, parser, symtab, tokenizer, typecheck};

fn checked_program(source: &str) -> Program {
  let tokens = tokenizer::tokenize(source).expect("tokenize failed");
  let mut program = parser::parse(tokens, source).expect("parse failed");
  let globals = symtab::collect_globals(&program, source).expect("collect failed");
  typecheck::check(&mut program, &globals, source).expect("typecheck failed");
  program
}

fn assembly(source: &str) -> String {
  compile(source).expect("compilation failed")
}

// ---- reference interpreter ------------------------------------------------

/// Variables live in numbered slots so a by-reference parameter can share
/// its caller's slot; an environment maps visible names to slots.
struct Machine<'a> {
  program: &'a Program,
  slots: Vec<i64>,
  output: Vec<i64>,
}

type Env = HashMap<String, usize>;

/// Run an integer-only program and return the sequence of written values.
fn interpret(source: &str) -> Vec<i64> {
  let program = checked_program(source);
  let mut machine = Machine {
    program: &program,
    slots: Vec::new(),
    output: Vec::new(),
  };
  let mut env = Env::new();
  for decl in &program.globals {
    assert_eq!(decl.ty, ExprType::Integer, "interpreter handles integers only");
    env.insert(decl.name.clone(), machine.alloc(0));
  }
  machine.exec(&program.body, &mut env);
  machine.output
}

impl<'a> Machine<'a> {
  fn alloc(&mut self, value: i64) -> usize {
    self.slots.push(value);
    self.slots.len() - 1
  }

  fn routine(&self, name: &str) -> Option<&'a Routine> {
    self
      .program
      .routines
      .iter()
      .find(|r| r.heading.name == name)
  }

  fn exec(&mut self, stmt: &Stmt, env: &mut Env) {
    match stmt {
      Stmt::Compound { body } => {
        for stmt in body {
          self.exec(stmt, env);
        }
      }
      Stmt::Assign { name, value, .. } => {
        let value = self.eval(value, env);
        let slot = env[name.as_str()];
        self.slots[slot] = value;
      }
      Stmt::Call { name, args, .. } => {
        self.call(name, args, env);
      }
      Stmt::If {
        cond,
        then_branch,
        else_branch,
      } => {
        if self.eval(cond, env) != 0 {
          self.exec(then_branch, env);
        } else if let Some(else_branch) = else_branch {
          self.exec(else_branch, env);
        }
      }
      Stmt::While { cond, body } => {
        while self.eval(cond, env) != 0 {
          self.exec(body, env);
        }
      }
      Stmt::Write { args, .. } => {
        for arg in args {
          let value = self.eval(arg, env);
          self.output.push(value);
        }
      }
    }
  }

  fn eval(&mut self, expr: &Expr, env: &mut Env) -> i64 {
    match &expr.kind {
      ExprKind::IntLit(value) => *value,
      ExprKind::Var { name } => match env.get(name.as_str()) {
        Some(&slot) => self.slots[slot],
        // A bare global function name is a zero-argument call.
        None => self.call(name, &[], env),
      },
      ExprKind::Call { name, args } => self.call(name, args, env),
      ExprKind::Binary { op, lhs, rhs } => {
        let lhs = self.eval(lhs, env);
        let rhs = self.eval(rhs, env);
        let boolean = |cond: bool| if cond { -1 } else { 0 };
        match op {
          BinaryOp::Add => lhs + rhs,
          BinaryOp::Sub => lhs - rhs,
          BinaryOp::Mul => lhs * rhs,
          BinaryOp::IntDiv => lhs / rhs,
          BinaryOp::Mod => lhs % rhs,
          BinaryOp::Eq => boolean(lhs == rhs),
          BinaryOp::Ne => boolean(lhs != rhs),
          BinaryOp::Lt => boolean(lhs < rhs),
          BinaryOp::Le => boolean(lhs <= rhs),
          BinaryOp::Gt => boolean(lhs > rhs),
          BinaryOp::Ge => boolean(lhs >= rhs),
          BinaryOp::FDiv => panic!("interpreter handles integers only"),
        }
      }
      ExprKind::RealLit(_) | ExprKind::StrLit(_) | ExprKind::Concat { .. } => {
        panic!("interpreter handles integers only")
      }
    }
  }

  fn call(&mut self, name: &str, args: &[Expr], env: &mut Env) -> i64 {
    let routine = self.routine(name).expect("call to unknown routine");
    let mut callee_env = Env::new();
    for (param, arg) in routine.heading.params.iter().zip(args) {
      let slot = if param.by_ref {
        let ExprKind::Var { name } = &arg.kind else {
          panic!("by-reference argument is always a variable");
        };
        env[name.as_str()]
      } else {
        let value = self.eval(arg, env);
        self.alloc(value)
      };
      callee_env.insert(param.name.clone(), slot);
    }
    if routine.heading.return_type.is_some() {
      let slot = self.alloc(0);
      callee_env.insert(routine.heading.name.clone(), slot);
    }
    for decl in &routine.locals {
      let slot = self.alloc(0);
      callee_env.insert(decl.name.clone(), slot);
    }
    self.exec(&routine.body, &mut callee_env);
    match routine.heading.return_type {
      Some(_) => self.slots[callee_env[name]],
      None => 0,
    }
  }
}

// ---- language scenarios ---------------------------------------------------

#[test]
fn arithmetic_precedence() {
  let source = "program P; begin writeln(2+3*4) end.";
  assert_eq!(interpret(source), vec![14]);
  let asm = assembly(source);
  assert!(asm.contains("call _writeINT"));
  assert!(asm.contains("call _writeCRLF"));
}

#[test]
fn global_variable_assignment() {
  assert_eq!(
    interpret("program P; var x: integer; begin x := 5; writeln(x-9) end."),
    vec![-4]
  );
}

#[test]
fn recursive_factorial() {
  let source = "program P; \
    function f(n: integer): integer; \
    begin if n <= 1 then f := 1 else f := n * f(n-1) end; \
    begin writeln(f(5)) end.";
  assert_eq!(interpret(source), vec![120]);
  let asm = assembly(source);
  assert!(asm.contains("pf_f:"));
  assert!(asm.contains("call pf_f"));
}

#[test]
fn concat_builds_its_result_in_a_temporary() {
  let asm = assembly("program P; begin writeln(concat('ab','cd','ef')) end.");
  assert!(asm.contains("strlit_0 db \"ab\", 0"));
  assert!(asm.contains("strlit_1 db \"cd\", 0"));
  assert!(asm.contains("strlit_2 db \"ef\", 0"));
  assert_eq!(asm.matches("call _strCopy").count(), 1);
  assert_eq!(asm.matches("call _strAppend").count(), 2);
  assert!(asm.contains("call _writeSTR"));
}

#[test]
fn integer_division_by_slash_produces_a_real() {
  let asm = assembly("program P; var r: real; begin r := 7 / 2; writeln(r) end.");
  assert!(asm.contains("cvtsi2sd xmm0, rax"));
  assert!(asm.contains("divsd xmm1, xmm0"));
  assert!(asm.contains("call _writeREAL"));
}

#[test]
fn string_into_integer_is_rejected_with_no_output() {
  let result = compile("program P; var i: integer; begin i := 'oops' end.");
  match result {
    Err(CompileError::Type { .. }) => {}
    other => panic!("expected a type error, got {other:?}"),
  }
}

#[test]
fn by_reference_mutates_and_by_value_does_not() {
  let source = "program P; var x: integer; \
    procedure bump(var n: integer); begin n := n + 1 end; \
    procedure keep(n: integer); begin n := n + 1 end; \
    begin x := 1; bump(x); writeln(x); keep(x); writeln(x) end.";
  assert_eq!(interpret(source), vec![2, 2]);
  let asm = assembly(source);
  assert!(asm.contains("mov rax, glob_x"));
}

#[test]
fn while_loop_accumulates() {
  let source = "program P; var i: integer; s: integer; begin \
    i := 1; s := 0; \
    while i <= 10 do begin s := s + i; i := i + 1 end; \
    writeln(s) end.";
  assert_eq!(interpret(source), vec![55]);
}

#[test]
fn bare_function_name_is_a_zero_argument_call() {
  let source = "program P; \
    function five: integer; begin five := 5 end; \
    begin writeln(five) end.";
  assert_eq!(interpret(source), vec![5]);
  let asm = assembly(source);
  assert!(asm.contains("call pf_five"));
}

#[test]
fn conditions_compare_and_branch() {
  let source = "program P; var x: integer; begin \
    x := 3; \
    if x >= 3 then writeln(1) else writeln(0); \
    if x <> 3 then writeln(1) else writeln(0) \
    end.";
  assert_eq!(interpret(source), vec![1, 0]);
}

#[test]
fn integer_div_and_mod() {
  assert_eq!(
    interpret("program P; begin writeln(17 div 5, 17 mod 5) end."),
    vec![3, 2]
  );
}

#[test]
fn compiling_twice_is_byte_identical() {
  let source = "program P; var x: integer; r: real; \
    function f(n: integer): integer; begin f := n * 2 end; \
    begin x := f(21); r := x / 2; \
    writeln(x, ' and ', r, concat('a', 'b', 'c')) end.";
  assert_eq!(assembly(source), assembly(source));
}

#[test]
fn parse_errors_carry_line_and_caret() {
  let err = compile("program P;\nbegin\n  writeln(2 +)\nend.").expect_err("should fail");
  let text = err.to_string();
  assert!(text.contains("line 3"), "missing location in: {text}");
  assert!(text.contains('^'), "missing caret in: {text}");
}

#[test]
fn type_errors_carry_line_and_column() {
  let err = compile("program P;\nbegin\n  writeln('a' + 1)\nend.").expect_err("should fail");
  let text = err.to_string();
  assert!(text.contains("line 3"), "missing location in: {text}");
}
