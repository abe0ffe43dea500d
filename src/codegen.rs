//! Code generation: lower the typed AST into x86-64 NASM assembly.
//!
//! The emitter keeps a single-accumulator convention: every expression
//! leaves an integer or string-pointer result in `rax` and a real result in
//! `xmm0`. Binary operators evaluate the left operand, park it on the
//! stack, evaluate the right operand, pop the left back into a scratch
//! register, and combine. All expression pushes use 16-byte slots so `rsp`
//! stays 16-aligned at every `call`.
//!
//! Literal pools, the label counter, and the per-routine frame tables live
//! in one `CodeGen` value per compilation, so compiling the same source
//! twice produces byte-identical assembly.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, ExprKind, Program, Routine, Stmt};
use crate::error::CompileResult;
use crate::symtab::{
  Binding, Scope, Storage, Symbol, SymbolKind, SymbolTable, global_var_label, routine_label,
};
use crate::ty::ExprType;

/// Integer-class argument registers in positional order (System V AMD64).
const INT_ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Real-class argument registers in positional order.
const REAL_ARG_REGS: [&str; 8] = [
  "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
];

/// Runtime routines the generated code expects at link time. Every entry
/// is called by at least one emission path below.
const RUNTIME_EXTERNS: [&str; 8] = [
  "_writeINT",
  "_writeREAL",
  "_writeSTR",
  "_writeCRLF",
  "_strNew",
  "_strCopy",
  "_strAppend",
  "_exitProcess",
];

/// Generate the complete assembly text for a checked program.
pub fn generate(program: &Program, globals: &SymbolTable) -> CompileResult<String> {
  let mut cg = CodeGen {
    program,
    globals,
    strings: LiteralPool::new("strlit"),
    reals: LiteralPool::new("reallit"),
    global_concats: 0,
    next_label: 0,
    asm: String::new(),
  };
  cg.run()?;
  Ok(cg.asm)
}

/// Deduplicated literal-to-label mapping, iterated in insertion order so
/// the emitted data section is deterministic.
struct LiteralPool {
  prefix: &'static str,
  entries: Vec<String>,
  index: HashMap<String, usize>,
}

impl LiteralPool {
  fn new(prefix: &'static str) -> Self {
    Self {
      prefix,
      entries: Vec::new(),
      index: HashMap::new(),
    }
  }

  fn intern(&mut self, value: &str) -> String {
    let idx = match self.index.get(value) {
      Some(&idx) => idx,
      None => {
        let idx = self.entries.len();
        self.entries.push(value.to_string());
        self.index.insert(value.to_string(), idx);
        idx
      }
    };
    format!("{}_{idx}", self.prefix)
  }

  fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn iter(&self) -> impl Iterator<Item = (String, &str)> {
    self
      .entries
      .iter()
      .enumerate()
      .map(|(idx, value)| (format!("{}_{idx}", self.prefix), value.as_str()))
  }
}

/// Per-body emission state: the local table (absent for the program body),
/// the scope view shared with the type checker, and the running index of
/// the next static `concat` occurrence.
struct FrameCtx<'f> {
  locals: Option<&'f SymbolTable>,
  scope: Scope<'f>,
  concat_next: usize,
}

struct CodeGen<'a> {
  program: &'a Program,
  globals: &'a SymbolTable,
  strings: LiteralPool,
  reals: LiteralPool,
  global_concats: usize,
  next_label: usize,
  asm: String,
}

impl<'a> CodeGen<'a> {
  fn run(&mut self) -> CompileResult<()> {
    self.collect_literals();
    self.emit_bss();
    self.emit_data();
    self.emit_text_header();
    for routine in &self.program.routines {
      self.emit_routine(routine)?;
    }
    self.emit_program_body()?;
    Ok(())
  }

  // ---- literal collection -------------------------------------------------

  /// Walk the whole tree once, interning string and real literals so the
  /// data section can be emitted before any code, and counting the
  /// program-body concat sites that need start-up allocation.
  fn collect_literals(&mut self) {
    let routines = self.program.routines.as_slice();
    for routine in routines {
      self.collect_stmt(&routine.body);
    }
    self.collect_stmt(&self.program.body);
    self.global_concats = count_concats_stmt(&self.program.body);
  }

  fn collect_stmt(&mut self, stmt: &Stmt) {
    match stmt {
      Stmt::Assign { value, .. } => self.collect_expr(value),
      Stmt::Call { args, .. } | Stmt::Write { args, .. } => {
        for arg in args {
          self.collect_expr(arg);
        }
      }
      Stmt::If {
        cond,
        then_branch,
        else_branch,
      } => {
        self.collect_expr(cond);
        self.collect_stmt(then_branch);
        if let Some(else_branch) = else_branch {
          self.collect_stmt(else_branch);
        }
      }
      Stmt::While { cond, body } => {
        self.collect_expr(cond);
        self.collect_stmt(body);
      }
      Stmt::Compound { body } => {
        for stmt in body {
          self.collect_stmt(stmt);
        }
      }
    }
  }

  fn collect_expr(&mut self, expr: &Expr) {
    match &expr.kind {
      ExprKind::StrLit(value) => {
        self.strings.intern(value);
      }
      ExprKind::RealLit(value) => {
        self.reals.intern(&format_real(*value));
      }
      ExprKind::Binary { lhs, rhs, .. } => {
        self.collect_expr(lhs);
        self.collect_expr(rhs);
      }
      ExprKind::Call { args, .. } | ExprKind::Concat { args } => {
        for arg in args {
          self.collect_expr(arg);
        }
      }
      ExprKind::IntLit(_) | ExprKind::Var { .. } => {}
    }
  }

  // ---- emission helpers ---------------------------------------------------

  fn raw(&mut self, line: &str) {
    self.asm.push_str(line);
    self.asm.push('\n');
  }

  fn label(&mut self, name: &str) {
    self.raw(&format!("{name}:"));
  }

  fn code(&mut self, instr: &str) {
    self.raw(&format!("    {instr}"));
  }

  fn blank(&mut self) {
    self.asm.push('\n');
  }

  /// Fresh control-flow label; the counter is never reset or reused within
  /// one compilation.
  fn new_label(&mut self) -> String {
    let label = format!(".L{}", self.next_label);
    self.next_label += 1;
    label
  }

  // Expression temporaries occupy 16-byte stack slots; anything narrower
  // would break the ABI alignment requirement at nested calls.

  fn push_int(&mut self) {
    self.code("sub rsp, 16");
    self.code("mov [rsp], rax");
  }

  fn pop_int(&mut self, reg: &str) {
    self.code(&format!("mov {reg}, [rsp]"));
    self.code("add rsp, 16");
  }

  fn push_real(&mut self) {
    self.code("sub rsp, 16");
    self.code("movsd [rsp], xmm0");
  }

  fn pop_real(&mut self, reg: &str) {
    self.code(&format!("movsd {reg}, [rsp]"));
    self.code("add rsp, 16");
  }

  fn save_reg(&mut self, reg: &str) {
    self.code("sub rsp, 16");
    self.code(&format!("mov [rsp], {reg}"));
  }

  fn restore_reg(&mut self, reg: &str) {
    self.code(&format!("mov {reg}, [rsp]"));
    self.code("add rsp, 16");
  }

  fn save_xmm(&mut self, reg: &str) {
    self.code("sub rsp, 16");
    self.code(&format!("movsd [rsp], {reg}"));
  }

  fn restore_xmm(&mut self, reg: &str) {
    self.code(&format!("movsd {reg}, [rsp]"));
    self.code("add rsp, 16");
  }

  // ---- sections -----------------------------------------------------------

  fn emit_bss(&mut self) {
    if self.program.globals.is_empty() && self.global_concats == 0 {
      return;
    }
    self.raw("section .bss");
    for decl in &self.program.globals {
      let label = global_var_label(&decl.name);
      self.code(&format!("{label} resq 1"));
    }
    for idx in 0..self.global_concats {
      let label = global_concat_label(idx);
      self.code(&format!("{label} resq 1"));
    }
    self.blank();
  }

  fn emit_data(&mut self) {
    if self.strings.is_empty() && self.reals.is_empty() {
      return;
    }
    self.raw("section .data");
    let string_lines: Vec<String> = self
      .strings
      .iter()
      .map(|(label, value)| format!("{label} db {}", nasm_string_bytes(value)))
      .collect();
    let real_lines: Vec<String> = self
      .reals
      .iter()
      .map(|(label, value)| format!("{label} dq {value}"))
      .collect();
    for line in string_lines {
      self.code(&line);
    }
    for line in real_lines {
      self.code(&line);
    }
    self.blank();
  }

  fn emit_text_header(&mut self) {
    self.raw("section .text");
    self.code("global _start");
    for name in RUNTIME_EXTERNS {
      self.code(&format!("extern {name}"));
    }
  }

  // ---- routines -----------------------------------------------------------

  /// Lay out one routine's frame: parameters in declaration order, the
  /// function's return slot under its own name, declared locals, then one
  /// pointer slot per static `concat` occurrence. Offsets grow downward in
  /// 8-byte steps; the frame is rounded up to 16 bytes.
  fn build_frame(&self, routine: &Routine) -> CompileResult<(SymbolTable, i64)> {
    let mut table = SymbolTable::new();
    let mut next = 0i64;
    let slot = |next: &mut i64| {
      *next += 8;
      *next
    };

    for param in &routine.heading.params {
      let kind = if param.by_ref {
        SymbolKind::of_reference(param.ty)
      } else {
        SymbolKind::of_value(param.ty)
      };
      let offset = slot(&mut next);
      table.insert(
        &param.name,
        Symbol {
          kind,
          storage: Storage::Offset(offset),
          heading: None,
        },
      )?;
    }

    if let Some(return_type) = routine.heading.return_type {
      let offset = slot(&mut next);
      table.insert(
        &routine.heading.name,
        Symbol {
          kind: SymbolKind::of_value(return_type),
          storage: Storage::Offset(offset),
          heading: None,
        },
      )?;
    }

    for decl in &routine.locals {
      let offset = slot(&mut next);
      table.insert(
        &decl.name,
        Symbol {
          kind: SymbolKind::of_value(decl.ty),
          storage: Storage::Offset(offset),
          heading: None,
        },
      )?;
    }

    let concats = count_concats_stmt(&routine.body);
    for idx in 0..concats {
      let offset = slot(&mut next);
      table.insert(
        &concat_temp_name(idx),
        Symbol {
          kind: SymbolKind::ConcatTemp,
          storage: Storage::Offset(offset),
          heading: None,
        },
      )?;
    }

    let frame = (next + 15) & !15;
    Ok((table, frame))
  }

  fn emit_routine(&mut self, routine: &Routine) -> CompileResult<()> {
    let (table, frame) = self.build_frame(routine)?;

    self.blank();
    self.label(&routine_label(&routine.heading.name));
    self.code("push rbp");
    self.code("mov rbp, rsp");
    if frame > 0 {
      self.code(&format!("sub rsp, {frame}"));
    }

    // Spill incoming parameters into their slots. Integer and by-reference
    // parameters arrive in the integer register sequence, by-value reals in
    // the floating-point sequence.
    let mut int_idx = 0;
    let mut real_idx = 0;
    for param in &routine.heading.params {
      let offset = offset_of(table.get(&param.name)?);
      if param.by_ref || param.ty != ExprType::Real {
        let reg = INT_ARG_REGS[int_idx];
        int_idx += 1;
        self.code(&format!("mov [rbp-{offset}], {reg}"));
      } else {
        let reg = REAL_ARG_REGS[real_idx];
        real_idx += 1;
        self.code(&format!("movsd [rbp-{offset}], {reg}"));
      }
    }

    // By-value string parameters get their own heap buffer; aliasing the
    // caller's string would make the copy semantics observable.
    for param in &routine.heading.params {
      if param.by_ref || param.ty != ExprType::Str {
        continue;
      }
      let offset = offset_of(table.get(&param.name)?);
      self.code("call _strNew");
      self.code("mov rdi, rax");
      self.code(&format!("mov rsi, [rbp-{offset}]"));
      self.code("call _strCopy");
      self.code(&format!("mov [rbp-{offset}], rax"));
    }

    // One fresh buffer per static concat occurrence, allocated at entry so
    // a concat inside a loop reuses its buffer instead of leaking one per
    // iteration.
    let concats = count_concats_stmt(&routine.body);
    for idx in 0..concats {
      let offset = offset_of(table.get(&concat_temp_name(idx))?);
      self.code("call _strNew");
      self.code(&format!("mov [rbp-{offset}], rax"));
    }

    let mut ctx = FrameCtx {
      locals: Some(&table),
      scope: Scope::routine(self.globals, &routine.heading, &routine.locals),
      concat_next: 0,
    };
    self.emit_stmt(&routine.body, &mut ctx)?;

    if let Some(return_type) = routine.heading.return_type {
      let offset = offset_of(table.get(&routine.heading.name)?);
      match return_type {
        ExprType::Real => self.code(&format!("movsd xmm0, [rbp-{offset}]")),
        _ => self.code(&format!("mov rax, [rbp-{offset}]")),
      }
    }
    self.code("mov rsp, rbp");
    self.code("pop rbp");
    self.code("ret");
    Ok(())
  }

  fn emit_program_body(&mut self) -> CompileResult<()> {
    self.blank();
    self.label("_start");
    // Concat buffers in the program body are allocated once, before any
    // user code runs.
    for idx in 0..self.global_concats {
      let label = global_concat_label(idx);
      self.code("call _strNew");
      self.code(&format!("mov [{label}], rax"));
    }

    let mut ctx = FrameCtx {
      locals: None,
      scope: Scope::global(self.globals),
      concat_next: 0,
    };
    self.emit_stmt(&self.program.body, &mut ctx)?;

    self.code("mov rdi, 0");
    self.code("call _exitProcess");
    Ok(())
  }

  // ---- statements ---------------------------------------------------------

  fn emit_stmt(&mut self, stmt: &Stmt, ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    match stmt {
      Stmt::Compound { body } => {
        for stmt in body {
          self.emit_stmt(stmt, ctx)?;
        }
        Ok(())
      }
      Stmt::Assign { name, value, .. } => {
        self.emit_expr(value, ctx)?;
        self.emit_store(name, value.ty, ctx)
      }
      Stmt::Call { name, args, .. } => self.emit_call(name, args, ctx),
      Stmt::If {
        cond,
        then_branch,
        else_branch,
      } => {
        self.emit_condition(cond, ctx)?;
        let false_label = self.new_label();
        self.code("cmp rax, 0");
        self.code(&format!("je {false_label}"));
        self.emit_stmt(then_branch, ctx)?;
        match else_branch {
          Some(else_branch) => {
            let end_label = self.new_label();
            self.code(&format!("jmp {end_label}"));
            self.label(&false_label);
            self.emit_stmt(else_branch, ctx)?;
            self.label(&end_label);
          }
          None => self.label(&false_label),
        }
        Ok(())
      }
      Stmt::While { cond, body } => {
        let top_label = self.new_label();
        let end_label = self.new_label();
        self.label(&top_label);
        self.emit_condition(cond, ctx)?;
        self.code("cmp rax, 0");
        self.code(&format!("je {end_label}"));
        self.emit_stmt(body, ctx)?;
        self.code(&format!("jmp {top_label}"));
        self.label(&end_label);
        Ok(())
      }
      Stmt::Write { args, newline } => {
        for arg in args {
          self.emit_expr(arg, ctx)?;
          match arg.ty {
            ExprType::Real => self.code("call _writeREAL"),
            ExprType::Str => {
              self.code("mov rdi, rax");
              self.code("call _writeSTR");
            }
            _ => {
              self.code("mov rdi, rax");
              self.code("call _writeINT");
            }
          }
        }
        if *newline {
          self.code("call _writeCRLF");
        }
        Ok(())
      }
    }
  }

  /// Evaluate a condition into `rax` for a `cmp rax, 0` test.
  fn emit_condition(&mut self, cond: &Expr, ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    self.emit_expr(cond, ctx)?;
    if !cond.is_relational() && cond.ty == ExprType::Real {
      self.code("cvttsd2si rax, xmm0");
    }
    Ok(())
  }

  // ---- expressions --------------------------------------------------------

  fn emit_expr(&mut self, expr: &Expr, ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    match &expr.kind {
      ExprKind::IntLit(value) => {
        self.code(&format!("mov rax, {value}"));
        Ok(())
      }
      ExprKind::RealLit(value) => {
        let label = self.reals.intern(&format_real(*value));
        self.code(&format!("movsd xmm0, [{label}]"));
        Ok(())
      }
      ExprKind::StrLit(value) => {
        let label = self.strings.intern(value);
        self.code(&format!("mov rax, {label}"));
        Ok(())
      }
      ExprKind::Var { name } => self.emit_load(name, ctx),
      ExprKind::Call { name, args } => self.emit_call(name, args, ctx),
      ExprKind::Binary { op, lhs, rhs } => {
        if op.is_relational() {
          self.emit_relational(*op, lhs, rhs, ctx)
        } else if expr.ty == ExprType::Real {
          self.emit_real_binary(*op, lhs, rhs, ctx)
        } else {
          self.emit_int_binary(*op, lhs, rhs, ctx)
        }
      }
      ExprKind::Concat { args } => self.emit_concat(args, ctx),
    }
  }

  fn emit_int_binary(
    &mut self,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut FrameCtx<'_>,
  ) -> CompileResult<()> {
    self.emit_expr(lhs, ctx)?;
    self.push_int();
    self.emit_expr(rhs, ctx)?;
    self.pop_int("rcx");
    // Left operand in rcx, right operand in rax.
    match op {
      BinaryOp::Add => self.code("add rax, rcx"),
      BinaryOp::Sub => {
        self.code("sub rcx, rax");
        self.code("mov rax, rcx");
      }
      BinaryOp::Mul => self.code("imul rax, rcx"),
      BinaryOp::IntDiv => {
        self.code("xchg rax, rcx");
        self.code("cqo");
        self.code("idiv rcx");
      }
      BinaryOp::Mod => {
        self.code("xchg rax, rcx");
        self.code("cqo");
        self.code("idiv rcx");
        self.code("mov rax, rdx");
      }
      _ => unreachable!("not an integer arithmetic operator"),
    }
    Ok(())
  }

  fn emit_real_binary(
    &mut self,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut FrameCtx<'_>,
  ) -> CompileResult<()> {
    self.emit_expr(lhs, ctx)?;
    if lhs.ty == ExprType::Integer {
      self.code("cvtsi2sd xmm0, rax");
    }
    self.push_real();
    self.emit_expr(rhs, ctx)?;
    if rhs.ty == ExprType::Integer {
      self.code("cvtsi2sd xmm0, rax");
    }
    self.pop_real("xmm1");
    // Left operand in xmm1, right operand in xmm0.
    let instr = match op {
      BinaryOp::Add => "addsd",
      BinaryOp::Sub => "subsd",
      BinaryOp::Mul => "mulsd",
      BinaryOp::FDiv => "divsd",
      _ => unreachable!("not a real arithmetic operator"),
    };
    self.code(&format!("{instr} xmm1, xmm0"));
    self.code("movsd xmm0, xmm1");
    Ok(())
  }

  /// Relational result: integer 0 (false) / -1 (true) in `rax`.
  fn emit_relational(
    &mut self,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut FrameCtx<'_>,
  ) -> CompileResult<()> {
    if lhs.ty == ExprType::Real {
      self.emit_expr(lhs, ctx)?;
      self.push_real();
      self.emit_expr(rhs, ctx)?;
      self.pop_real("xmm1");
      self.code("comisd xmm1, xmm0");
      let set = match op {
        BinaryOp::Eq => "sete",
        BinaryOp::Ne => "setne",
        BinaryOp::Lt => "setb",
        BinaryOp::Le => "setbe",
        BinaryOp::Gt => "seta",
        BinaryOp::Ge => "setae",
        _ => unreachable!("not a relational operator"),
      };
      self.code(&format!("{set} al"));
    } else {
      self.emit_expr(lhs, ctx)?;
      self.push_int();
      self.emit_expr(rhs, ctx)?;
      self.pop_int("rcx");
      self.code("cmp rcx, rax");
      let set = match op {
        BinaryOp::Eq => "sete",
        BinaryOp::Ne => "setne",
        BinaryOp::Lt => "setl",
        BinaryOp::Le => "setle",
        BinaryOp::Gt => "setg",
        BinaryOp::Ge => "setge",
        _ => unreachable!("not a relational operator"),
      };
      self.code(&format!("{set} al"));
    }
    self.code("movzx rax, al");
    self.code("neg rax");
    Ok(())
  }

  fn emit_concat(&mut self, args: &[Expr], ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    let idx = ctx.concat_next;
    ctx.concat_next += 1;
    let slot = match ctx.locals {
      Some(table) => {
        let offset = offset_of(table.get(&concat_temp_name(idx))?);
        format!("[rbp-{offset}]")
      }
      None => format!("[{}]", global_concat_label(idx)),
    };

    for (pos, arg) in args.iter().enumerate() {
      self.emit_expr(arg, ctx)?;
      self.code("mov rsi, rax");
      self.code(&format!("mov rdi, {slot}"));
      let routine = if pos == 0 { "_strCopy" } else { "_strAppend" };
      self.code(&format!("call {routine}"));
    }
    self.code(&format!("mov rax, {slot}"));
    Ok(())
  }

  // ---- variables and calls ------------------------------------------------

  fn local_symbol<'f>(&self, ctx: &FrameCtx<'f>, name: &str) -> CompileResult<&'f Symbol> {
    match ctx.locals {
      Some(table) => table.get(name),
      None => unreachable!("local binding outside a routine frame"),
    }
  }

  /// Load a variable into the accumulator for its type.
  fn emit_load(&mut self, name: &str, ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    match ctx.scope.resolve(name)? {
      Binding::Parameter { .. } | Binding::Local(_) | Binding::ReturnSlot(_) => {
        let symbol = self.local_symbol(ctx, name)?;
        let offset = offset_of(symbol);
        match symbol.kind {
          SymbolKind::Real => self.code(&format!("movsd xmm0, [rbp-{offset}]")),
          SymbolKind::IntegerPtr | SymbolKind::StrPtr => {
            self.code(&format!("mov rax, [rbp-{offset}]"));
            self.code("mov rax, [rax]");
          }
          SymbolKind::RealPtr => {
            self.code(&format!("mov rax, [rbp-{offset}]"));
            self.code("movsd xmm0, [rax]");
          }
          _ => self.code(&format!("mov rax, [rbp-{offset}]")),
        }
        Ok(())
      }
      Binding::Global(symbol) => match symbol.kind {
        SymbolKind::Function => {
          // A bare global function name is a zero-argument call.
          self.emit_call(name, &[], ctx)
        }
        SymbolKind::Real => {
          let label = label_of(symbol);
          self.code(&format!("movsd xmm0, [{label}]"));
          Ok(())
        }
        SymbolKind::Integer | SymbolKind::Str => {
          let label = label_of(symbol);
          self.code(&format!("mov rax, [{label}]"));
          Ok(())
        }
        _ => unreachable!("global symbol with local-only kind"),
      },
    }
  }

  /// Store the accumulator into a variable, converting an integer value on
  /// the way into a real target.
  fn emit_store(&mut self, name: &str, value_ty: ExprType, ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    let binding = ctx.scope.resolve(name)?;
    let target_ty = match &binding {
      Binding::Parameter { param, .. } => param.ty,
      Binding::Local(decl) => decl.ty,
      Binding::ReturnSlot(ty) => *ty,
      Binding::Global(symbol) => match symbol.kind.value_type() {
        Some(ty) => ty,
        None => unreachable!("assignment to a routine symbol survived type checking"),
      },
    };
    if target_ty == ExprType::Real && value_ty == ExprType::Integer {
      self.code("cvtsi2sd xmm0, rax");
    }

    match binding {
      Binding::Parameter { .. } | Binding::Local(_) | Binding::ReturnSlot(_) => {
        let symbol = self.local_symbol(ctx, name)?;
        let offset = offset_of(symbol);
        match symbol.kind {
          SymbolKind::Real => self.code(&format!("movsd [rbp-{offset}], xmm0")),
          SymbolKind::IntegerPtr | SymbolKind::StrPtr => {
            self.code(&format!("mov rcx, [rbp-{offset}]"));
            self.code("mov [rcx], rax");
          }
          SymbolKind::RealPtr => {
            self.code(&format!("mov rcx, [rbp-{offset}]"));
            self.code("movsd [rcx], xmm0");
          }
          _ => self.code(&format!("mov [rbp-{offset}], rax")),
        }
      }
      Binding::Global(symbol) => {
        let label = label_of(symbol);
        match symbol.kind {
          SymbolKind::Real => self.code(&format!("movsd [{label}], xmm0")),
          _ => self.code(&format!("mov [{label}], rax")),
        }
      }
    }
    Ok(())
  }

  /// Address of a by-reference argument: the variable's storage for plain
  /// variables, a pass-through of the pointer for by-reference parameters.
  fn emit_addr(&mut self, arg: &Expr, ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    let ExprKind::Var { name } = &arg.kind else {
      unreachable!("by-reference argument is always a plain variable");
    };
    match ctx.scope.resolve(name)? {
      Binding::Parameter { param, .. } if param.by_ref => {
        let offset = offset_of(self.local_symbol(ctx, name)?);
        self.code(&format!("mov rax, [rbp-{offset}]"));
      }
      Binding::Parameter { .. } | Binding::Local(_) | Binding::ReturnSlot(_) => {
        let offset = offset_of(self.local_symbol(ctx, name)?);
        self.code(&format!("lea rax, [rbp-{offset}]"));
      }
      Binding::Global(symbol) => {
        let label = label_of(symbol);
        self.code(&format!("mov rax, {label}"));
      }
    }
    Ok(())
  }

  /// Shared call sequence for procedure statements, function-call
  /// expressions, and bare zero-argument function references.
  fn emit_call(&mut self, name: &str, args: &[Expr], ctx: &mut FrameCtx<'_>) -> CompileResult<()> {
    let symbol = self.globals.get(name)?;
    let heading = match &symbol.heading {
      Some(heading) => std::rc::Rc::clone(heading),
      None => unreachable!("call target without a heading"),
    };
    let n_int = heading.int_class_arity();
    let n_real = heading.real_class_arity();

    // Caller-save exactly the argument registers this arity consumes.
    for reg in &INT_ARG_REGS[..n_int] {
      self.save_reg(reg);
    }
    for reg in &REAL_ARG_REGS[..n_real] {
      self.save_xmm(reg);
    }

    // Evaluate arguments left to right, parking each on the stack; an inner
    // call is free to clobber the accumulators in between.
    let mut slots: Vec<(bool, &'static str)> = Vec::new();
    let mut int_idx = 0;
    let mut real_idx = 0;
    for (param, arg) in heading.params.iter().zip(args.iter()) {
      if param.by_ref {
        self.emit_addr(arg, ctx)?;
        self.push_int();
        slots.push((false, INT_ARG_REGS[int_idx]));
        int_idx += 1;
      } else if param.ty == ExprType::Real {
        self.emit_expr(arg, ctx)?;
        if arg.ty == ExprType::Integer {
          self.code("cvtsi2sd xmm0, rax");
        }
        self.push_real();
        slots.push((true, REAL_ARG_REGS[real_idx]));
        real_idx += 1;
      } else {
        self.emit_expr(arg, ctx)?;
        self.push_int();
        slots.push((false, INT_ARG_REGS[int_idx]));
        int_idx += 1;
      }
    }

    // Pop into the positional registers, last argument first.
    for (is_real, reg) in slots.iter().rev() {
      if *is_real {
        self.pop_real(reg);
      } else {
        self.pop_int(reg);
      }
    }

    self.code(&format!("call {}", routine_label(name)));

    // A real return value sits in xmm0, which the restore below would
    // clobber when the callee consumed real argument registers.
    let stash_real = heading.return_type == Some(ExprType::Real) && n_real > 0;
    if stash_real {
      self.push_real();
    }
    for reg in REAL_ARG_REGS[..n_real].iter().rev() {
      self.restore_xmm(reg);
    }
    for reg in INT_ARG_REGS[..n_int].iter().rev() {
      self.restore_reg(reg);
    }
    if stash_real {
      self.pop_real("xmm0");
    }
    Ok(())
  }
}

fn offset_of(symbol: &Symbol) -> i64 {
  match &symbol.storage {
    Storage::Offset(offset) => *offset,
    Storage::Label(_) => unreachable!("frame symbol with label storage"),
  }
}

fn label_of(symbol: &Symbol) -> &str {
  match &symbol.storage {
    Storage::Label(label) => label,
    Storage::Offset(_) => unreachable!("global symbol with stack storage"),
  }
}

fn concat_temp_name(idx: usize) -> String {
  // The `$` keeps the slot out of the user identifier namespace.
  format!("$concat{idx}")
}

fn global_concat_label(idx: usize) -> String {
  format!("concattmp_{idx}")
}

/// Count the static `concat` occurrences in a body, in the same pre-order
/// the emitter walks, so slot indices line up.
fn count_concats_stmt(stmt: &Stmt) -> usize {
  match stmt {
    Stmt::Assign { value, .. } => count_concats_expr(value),
    Stmt::Call { args, .. } | Stmt::Write { args, .. } => {
      args.iter().map(count_concats_expr).sum()
    }
    Stmt::If {
      cond,
      then_branch,
      else_branch,
    } => {
      count_concats_expr(cond)
        + count_concats_stmt(then_branch)
        + else_branch.as_deref().map(count_concats_stmt).unwrap_or(0)
    }
    Stmt::While { cond, body } => count_concats_expr(cond) + count_concats_stmt(body),
    Stmt::Compound { body } => body.iter().map(count_concats_stmt).sum(),
  }
}

fn count_concats_expr(expr: &Expr) -> usize {
  match &expr.kind {
    ExprKind::Concat { args } => 1 + args.iter().map(count_concats_expr).sum::<usize>(),
    ExprKind::Binary { lhs, rhs, .. } => count_concats_expr(lhs) + count_concats_expr(rhs),
    ExprKind::Call { args, .. } => args.iter().map(count_concats_expr).sum(),
    _ => 0,
  }
}

/// NASM-compatible spelling of a real literal; `dq` needs a dot or an
/// exponent with a fractional part to treat the operand as floating point.
fn format_real(value: f64) -> String {
  let mut text = format!("{value:?}");
  if !text.contains('.') {
    match text.find(['e', 'E']) {
      Some(pos) => text.insert_str(pos, ".0"),
      None => text.push_str(".0"),
    }
  }
  text
}

/// Render a string literal as a NASM `db` operand list, null-terminated.
/// Printable runs stay quoted; quotes and non-ASCII bytes are emitted as
/// numeric bytes.
fn nasm_string_bytes(value: &str) -> String {
  let mut parts: Vec<String> = Vec::new();
  let mut run = String::new();
  for ch in value.chars() {
    let printable = (' '..='~').contains(&ch) && ch != '"';
    if printable {
      run.push(ch);
    } else {
      if !run.is_empty() {
        parts.push(format!("\"{run}\""));
        run.clear();
      }
      let mut buf = [0u8; 4];
      for byte in ch.encode_utf8(&mut buf).bytes() {
        parts.push(byte.to_string());
      }
    }
  }
  if !run.is_empty() {
    parts.push(format!("\"{run}\""));
  }
  parts.push("0".to_string());
  parts.join(", ")
}
