use std::sync::Arc;

use crate::ast::*;
use crate::bytecode::{Chunk, Constant, MAX_REGISTERS, Opcode};
use crate::value::{FrameKind, Function};

/// Name given to the function wrapping the top-level statements.
pub const MAIN: &str = "<main>";

const MAX_ARGS: usize = 255;
const MAX_GLOBALS: usize = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error("branch spans {distance} bytes, more than a 16-bit offset can hold")]
    BranchTooFar { distance: usize },
    #[error("too many {what} in one function (limit {limit})")]
    RegisterOverflow { what: &'static str, limit: usize },
    #[error("`break` outside of a loop")]
    BreakOutsideLoop,
    #[error("`continue` outside of a loop")]
    ContinueOutsideLoop,
    #[error("unresolved name `{name}`")]
    UnresolvedName { name: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Compile error at line {line}: {kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: u32,
}

type Result<T> = std::result::Result<T, CompileError>;

/// Output of a successful compile: the top-level function and the name of
/// every global slot, indexed by slot.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub main: Arc<Function>,
    pub globals: Vec<String>,
}

impl CompiledProgram {
    pub fn global_slot(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|g| g == name)
    }
}

pub fn compile(program: &Program) -> Result<CompiledProgram> {
    let mut globals = Vec::new();
    collect_globals(&program.body, &mut globals)?;

    let mut compiler = Compiler {
        globals,
        state: FunctionState::new(MAIN, &[], FrameKind::Program),
        line: program.body.first().map(|s| s.line).unwrap_or(0),
    };
    compiler.body(&program.body)?;
    let main = compiler.state.finish();
    Ok(CompiledProgram { main: Arc::new(main), globals: compiler.globals })
}

/// Every name bound at top level, including inside top-level control flow,
/// gets a dense global slot before any code is emitted. Function bodies are
/// not searched.
fn collect_globals(stmts: &[Stmt], globals: &mut Vec<String>) -> Result<()> {
    let none: &[Stmt] = &[];
    for stmt in stmts {
        let (name, nested) = match &stmt.node {
            StmtKind::Assign { name, .. } | StmtKind::Func { name, .. } | StmtKind::Sub { name, .. } => {
                (Some(name), [none, none])
            }
            StmtKind::For { name, body, .. } => (Some(name), [body.as_slice(), none]),
            StmtKind::If { then_branch, else_branch, .. } => (None, [then_branch.as_slice(), else_branch.as_slice()]),
            StmtKind::While { body, .. } => (None, [body.as_slice(), none]),
            _ => (None, [none, none]),
        };
        if let Some(name) = name {
            if !globals.contains(name) {
                if globals.len() >= MAX_GLOBALS {
                    return Err(CompileError {
                        kind: CompileErrorKind::RegisterOverflow { what: "globals", limit: MAX_GLOBALS },
                        line: stmt.line,
                    });
                }
                globals.push(name.clone());
            }
        }
        for block in nested {
            collect_globals(block, globals)?;
        }
    }
    Ok(())
}

// ── Per-function state ───────────────────────────────────────────────

struct LoopContext {
    /// Where `continue` and the loop's back edge go.
    start: usize,
    /// Forward jumps patched to the loop exit.
    breaks: Vec<usize>,
}

struct FunctionState {
    name: String,
    params: Vec<String>,
    kind: FrameKind,
    chunk: Chunk,
    locals: Vec<(String, u8)>,
    /// Registers below this hold locals or hidden loop state; every
    /// statement starts and ends with `next_reg == reserved`.
    reserved: u16,
    next_reg: u16,
    max_reg: u16,
    loops: Vec<LoopContext>,
    /// Hidden `for` registers of loops that ended inside another loop. They
    /// stay live until the outermost loop ends, since the inner loop runs
    /// again on the next outer iteration.
    retired: Vec<u8>,
    /// Dead registers below `reserved`, handed out before growing the window.
    spare: Vec<u8>,
}

impl FunctionState {
    fn new(name: &str, params: &[String], kind: FrameKind) -> Self {
        let arity = params.len() as u16;
        FunctionState {
            name: name.to_string(),
            params: params.to_vec(),
            kind,
            chunk: Chunk::new(),
            locals: params.iter().enumerate().map(|(i, p)| (p.clone(), i as u8)).collect(),
            reserved: arity,
            next_reg: arity,
            max_reg: arity,
            loops: Vec::new(),
            retired: Vec::new(),
            spare: Vec::new(),
        }
    }

    fn finish(mut self) -> Function {
        self.chunk.register_count = self.max_reg;
        tracing::debug!(
            function = %self.name,
            bytes = self.chunk.code.len(),
            constants = self.chunk.constants.len(),
            registers = self.max_reg,
            "compiled function"
        );
        Function { name: self.name, params: self.params, kind: self.kind, chunk: self.chunk }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Place {
    Local(u8),
    Global(u8),
}

// ── Compiler ─────────────────────────────────────────────────────────

struct Compiler {
    globals: Vec<String>,
    state: FunctionState,
    /// Source line tagged onto emitted bytes.
    line: u32,
}

impl Compiler {
    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError { kind, line: self.line }
    }

    fn emit(&mut self, op: Opcode, operands: &[u8]) {
        debug_assert_eq!(operands.len(), op.operand_len(), "{:?}", op);
        self.state.chunk.write_op(op, operands, self.line);
    }

    /// Emit a branch with a 0xFFFF placeholder offset; returns the offset of
    /// the placeholder for `patch_jump`.
    fn emit_jump(&mut self, op: Opcode, operands: &[u8]) -> usize {
        debug_assert_eq!(operands.len() + 2, op.operand_len(), "{:?}", op);
        self.state.chunk.write_op(op, operands, self.line);
        self.state.chunk.write_u16(0xFFFF, self.line);
        self.state.chunk.len() - 2
    }

    /// Point the placeholder at `offset` to the current end of code.
    fn patch_jump(&mut self, offset: usize) -> Result<()> {
        let distance = self.state.chunk.len() - offset - 2;
        let distance = u16::try_from(distance)
            .map_err(|_| self.error(CompileErrorKind::BranchTooFar { distance }))?;
        self.state.chunk.patch_u16(offset, distance);
        Ok(())
    }

    fn emit_loop(&mut self, start: usize) -> Result<()> {
        self.state.chunk.write(Opcode::Loop as u8, self.line);
        let distance = self.state.chunk.len() - start + 2;
        let distance = u16::try_from(distance)
            .map_err(|_| self.error(CompileErrorKind::BranchTooFar { distance }))?;
        self.state.chunk.write_u16(distance, self.line);
        Ok(())
    }

    fn alloc_reg(&mut self) -> Result<u8> {
        if self.state.next_reg as usize >= MAX_REGISTERS {
            return Err(self.error(CompileErrorKind::RegisterOverflow { what: "registers", limit: MAX_REGISTERS }));
        }
        let r = self.state.next_reg as u8;
        self.state.next_reg += 1;
        self.state.max_reg = self.state.max_reg.max(self.state.next_reg);
        Ok(r)
    }

    /// Allocate a register that outlives the current statement. Only
    /// called while `next_reg == reserved`.
    fn reserve_reg(&mut self) -> Result<u8> {
        if let Some(r) = self.state.spare.pop() {
            return Ok(r);
        }
        let r = self.alloc_reg()?;
        self.state.reserved = self.state.next_reg;
        Ok(r)
    }

    fn load_constant(&mut self, constant: Constant, dest: u8) -> Result<()> {
        let idx = self.state.chunk.add_constant(constant).ok_or_else(|| {
            self.error(CompileErrorKind::RegisterOverflow { what: "constants", limit: crate::bytecode::MAX_CONSTANTS })
        })?;
        self.emit(Opcode::Load, &[idx, dest]);
        Ok(())
    }

    // ── Names ──

    fn local(&self, name: &str) -> Option<u8> {
        if self.state.kind == FrameKind::Program {
            return None;
        }
        self.state.locals.iter().rev().find(|(n, _)| n == name).map(|(_, r)| *r)
    }

    fn lookup(&self, name: &str) -> Option<Place> {
        if let Some(r) = self.local(name) {
            return Some(Place::Local(r));
        }
        self.globals.iter().position(|g| g == name).map(|slot| Place::Global(slot as u8))
    }

    fn resolve(&self, name: &str) -> Result<Place> {
        self.lookup(name)
            .ok_or_else(|| self.error(CompileErrorKind::UnresolvedName { name: name.to_string() }))
    }

    /// Where a plain assignment to `name` writes, declaring a new local if
    /// inside a function and the name is not bound yet.
    fn assign_target(&mut self, name: &str) -> Result<Place> {
        if let Some(place) = self.lookup(name) {
            return Ok(place);
        }
        if self.state.kind == FrameKind::Program {
            // Only reachable for names the global pre-pass did not see
            if self.globals.len() >= MAX_GLOBALS {
                return Err(self.error(CompileErrorKind::RegisterOverflow { what: "globals", limit: MAX_GLOBALS }));
            }
            self.globals.push(name.to_string());
            return Ok(Place::Global((self.globals.len() - 1) as u8));
        }
        let r = self.reserve_reg()?;
        self.state.locals.push((name.to_string(), r));
        Ok(Place::Local(r))
    }

    /// Bind a new local for a value already computed into `temp`, the first
    /// register above the reserved ones. A spare register is used if there
    /// is one; otherwise `temp` itself becomes the local.
    fn declare_local(&mut self, name: &str, temp: u8) -> u8 {
        let r = match self.state.spare.pop() {
            Some(r) => r,
            None => {
                debug_assert_eq!(temp as u16, self.state.reserved);
                self.state.reserved = temp as u16 + 1;
                temp
            }
        };
        self.state.locals.push((name.to_string(), r));
        r
    }

    fn store(&mut self, src: u8, place: Place) {
        match place {
            Place::Local(r) => {
                if r != src {
                    self.emit(Opcode::Store, &[src, r]);
                }
            }
            Place::Global(slot) => self.emit(Opcode::StoreGlobal, &[src, slot]),
        }
    }

    /// Register holding the current value of `place`, loading globals into
    /// a fresh temporary.
    fn read_place(&mut self, place: Place) -> Result<u8> {
        match place {
            Place::Local(r) => Ok(r),
            Place::Global(slot) => {
                let r = self.alloc_reg()?;
                self.emit(Opcode::LoadGlobal, &[slot, r]);
                Ok(r)
            }
        }
    }

    // ── Functions ──

    fn function(&mut self, name: &str, params: &[String], body: &[Stmt], kind: FrameKind) -> Result<Function> {
        if params.len() > MAX_ARGS {
            return Err(self.error(CompileErrorKind::RegisterOverflow { what: "parameters", limit: MAX_ARGS }));
        }
        let enclosing = std::mem::replace(&mut self.state, FunctionState::new(name, params, kind));
        let saved_line = self.line;
        self.body(body)?;
        let finished = std::mem::replace(&mut self.state, enclosing);
        self.line = saved_line;
        Ok(finished.finish())
    }

    /// Statements plus an implicit `return nil` unless the last statement
    /// already returns.
    fn body(&mut self, body: &[Stmt]) -> Result<()> {
        self.block(body)?;
        if !matches!(body.last().map(|s| &s.node), Some(StmtKind::Return(_))) {
            let r = self.alloc_reg()?;
            self.load_constant(Constant::Nil, r)?;
            self.emit(Opcode::Return, &[r]);
        }
        Ok(())
    }

    // ── Statements ──

    fn block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        if stmt.line != 0 {
            self.line = stmt.line;
        }
        match &stmt.node {
            StmtKind::If { condition, then_branch, else_branch } => {
                let else_jump = self.condition(condition)?;
                self.block(then_branch)?;
                if else_branch.is_empty() {
                    self.patch_jump(else_jump)?;
                } else {
                    let end_jump = self.emit_jump(Opcode::Jump, &[]);
                    self.patch_jump(else_jump)?;
                    self.block(else_branch)?;
                    self.patch_jump(end_jump)?;
                }
            }

            StmtKind::While { condition, body } => {
                let start = self.state.chunk.len();
                let exit = self.condition(condition)?;
                self.loop_body(start, body)?;
                self.patch_jump(exit)?;
                self.end_loop()?;
            }

            StmtKind::For { name, iterable, body } => self.for_loop(name, iterable, body)?,

            StmtKind::Func { name, params, body } => self.bind_function(name, params, body, FrameKind::Function)?,
            StmtKind::Sub { name, params, body } => self.bind_function(name, params, body, FrameKind::Subroutine)?,

            StmtKind::Return(value) => {
                let r = match value {
                    Some(e) => self.operand(e)?,
                    None => {
                        let r = self.alloc_reg()?;
                        self.load_constant(Constant::Nil, r)?;
                        r
                    }
                };
                self.emit(Opcode::Return, &[r]);
            }

            StmtKind::Break => {
                let jump = self.emit_jump(Opcode::Jump, &[]);
                match self.state.loops.last_mut() {
                    Some(ctx) => ctx.breaks.push(jump),
                    None => return Err(self.error(CompileErrorKind::BreakOutsideLoop)),
                }
            }

            StmtKind::Continue => match self.state.loops.last() {
                Some(ctx) => {
                    let start = ctx.start;
                    self.emit_loop(start)?;
                }
                None => return Err(self.error(CompileErrorKind::ContinueOutsideLoop)),
            },

            StmtKind::Assign { name, op, value } => self.assign(name, *op, value)?,

            StmtKind::AssignIndex { name, index, op, value } => {
                let list = self.resolve(name)?;
                let list = self.read_place(list)?;
                let i = self.operand(index)?;
                match op.binary() {
                    None => {
                        let v = self.operand(value)?;
                        self.emit(Opcode::IndexAssign, &[list, i, v]);
                    }
                    Some(bin) => {
                        let current = self.alloc_reg()?;
                        self.emit(Opcode::Index, &[list, i, current]);
                        let v = self.operand(value)?;
                        self.apply_in_place(bin, current, v);
                        self.emit(Opcode::IndexAssign, &[list, i, current]);
                    }
                }
            }

            StmtKind::Expr(e) => {
                self.expr(e)?;
            }
        }
        self.state.next_reg = self.state.reserved;
        Ok(())
    }

    fn assign(&mut self, name: &str, op: AssignOp, value: &Expr) -> Result<()> {
        let Some(bin) = op.binary() else {
            // The value is compiled before `name` is declared, so `x = x + 1`
            // with no earlier `x` is unresolved
            let r = self.expr(value)?;
            let place = match self.lookup(name) {
                Some(place) => place,
                None if self.state.kind != FrameKind::Program => Place::Local(self.declare_local(name, r)),
                None => self.assign_target(name)?,
            };
            self.store(r, place);
            return Ok(());
        };
        let place = self.resolve(name)?;
        let target = self.read_place(place)?;
        let v = self.operand(value)?;
        self.apply_in_place(bin, target, v);
        if let Place::Global(_) = place {
            self.store(target, place);
        }
        Ok(())
    }

    /// `target = target OP v`, with AddTo/SubFrom where they exist.
    fn apply_in_place(&mut self, op: BinOp, target: u8, v: u8) {
        match op {
            BinOp::Add => self.emit(Opcode::AddTo, &[target, v]),
            BinOp::Subtract => self.emit(Opcode::SubFrom, &[target, v]),
            other => self.emit(binary_opcode(other), &[target, v, target]),
        }
    }

    fn bind_function(&mut self, name: &str, params: &[String], body: &[Stmt], kind: FrameKind) -> Result<()> {
        let place = self.assign_target(name)?;
        let function = self.function(name, params, body, kind)?;
        let r = self.alloc_reg()?;
        self.load_constant(Constant::Function(Arc::new(function)), r)?;
        self.store(r, place);
        Ok(())
    }

    fn loop_body(&mut self, start: usize, body: &[Stmt]) -> Result<()> {
        self.state.loops.push(LoopContext { start, breaks: Vec::new() });
        self.block(body)?;
        self.emit_loop(start)
    }

    /// Patch the innermost loop's breaks to here and pop it. Leaving the
    /// outermost loop frees every retired `for` register.
    fn end_loop(&mut self) -> Result<()> {
        if let Some(ctx) = self.state.loops.pop() {
            for jump in ctx.breaks {
                self.patch_jump(jump)?;
            }
        }
        if self.state.loops.is_empty() {
            let retired = std::mem::take(&mut self.state.retired);
            self.state.spare.extend(retired);
        }
        Ok(())
    }

    /// `for v, list` keeps the list and an index in hidden registers:
    ///
    /// ```text
    /// start: LEN list, t; LESS idx, t, t; JUMP_IF_FALSE t, exit
    ///        v = list[idx]; idx += 1
    ///        body
    ///        LOOP start
    /// exit:
    /// ```
    fn for_loop(&mut self, name: &str, iterable: &Expr, body: &[Stmt]) -> Result<()> {
        let list = self.reserve_reg()?;
        self.expr_to(iterable, list)?;
        let idx = self.reserve_reg()?;
        self.load_constant(Constant::Number(0.0), idx)?;
        let var = self.assign_target(name)?;

        let start = self.state.chunk.len();
        let t = self.alloc_reg()?;
        self.emit(Opcode::Len, &[list, t]);
        self.emit(Opcode::Less, &[idx, t, t]);
        let exit = self.emit_jump(Opcode::JumpIfFalse, &[t]);
        match var {
            Place::Local(r) => self.emit(Opcode::Index, &[list, idx, r]),
            Place::Global(_) => {
                self.emit(Opcode::Index, &[list, idx, t]);
                self.store(t, var);
            }
        }
        self.load_constant(Constant::Number(1.0), t)?;
        self.emit(Opcode::AddTo, &[idx, t]);
        self.state.next_reg = self.state.reserved;

        self.loop_body(start, body)?;
        self.patch_jump(exit)?;
        self.state.retired.extend([list, idx]);
        self.end_loop()
    }

    /// Emit a test of `condition` and a forward branch taken when it is
    /// false. Returns the placeholder to patch.
    fn condition(&mut self, condition: &Expr) -> Result<usize> {
        let saved_line = self.enter_line(condition.line);
        let mark = self.state.next_reg;
        let jump = match &condition.node {
            ExprKind::Binary { op: op @ (BinOp::Equals | BinOp::NotEquals), left, right } => {
                let a = self.operand(left)?;
                let b = self.operand(right)?;
                let branch = if *op == BinOp::Equals { Opcode::JumpIfNotEqual } else { Opcode::JumpIfEqual };
                self.emit_jump(branch, &[a, b])
            }
            _ => {
                let r = self.operand(condition)?;
                self.emit_jump(Opcode::JumpIfFalse, &[r])
            }
        };
        self.state.next_reg = mark;
        self.line = saved_line;
        Ok(jump)
    }

    // ── Expressions ──

    fn enter_line(&mut self, line: u32) -> u32 {
        let saved = self.line;
        if line != 0 {
            self.line = line;
        }
        saved
    }

    /// Compile into a fresh register.
    fn expr(&mut self, e: &Expr) -> Result<u8> {
        let r = self.alloc_reg()?;
        self.expr_to(e, r)?;
        Ok(r)
    }

    /// Register holding the value of `e` for reading only. Locals are used
    /// in place; anything else goes to a fresh register.
    fn operand(&mut self, e: &Expr) -> Result<u8> {
        if let ExprKind::Variable(name) = &e.node {
            if let Some(r) = self.local(name) {
                return Ok(r);
            }
        }
        self.expr(e)
    }

    fn expr_to(&mut self, e: &Expr, dest: u8) -> Result<()> {
        let saved_line = self.enter_line(e.line);
        let mark = self.state.next_reg;
        match &e.node {
            ExprKind::Number(n) => self.load_constant(Constant::Number(*n), dest)?,
            ExprKind::Text(s) => self.load_constant(Constant::Text(Arc::from(s.as_str())), dest)?,
            ExprKind::Bool(b) => self.load_constant(Constant::Bool(*b), dest)?,
            ExprKind::List(items) => self.list_literal(items, dest)?,

            ExprKind::Variable(name) => match self.resolve(name)? {
                Place::Local(r) => {
                    if r != dest {
                        self.emit(Opcode::Store, &[r, dest]);
                    }
                }
                Place::Global(slot) => self.emit(Opcode::LoadGlobal, &[slot, dest]),
            },

            ExprKind::Unary { op, operand } => {
                let a = self.operand(operand)?;
                let opcode = match op {
                    UnaryOp::Negate => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                };
                self.emit(opcode, &[a, dest]);
            }

            ExprKind::Binary { op: op @ (BinOp::And | BinOp::Or), left, right } => {
                self.expr_to(left, dest)?;
                let branch = if *op == BinOp::And { Opcode::JumpIfFalse } else { Opcode::JumpIfTrue };
                let skip = self.emit_jump(branch, &[dest]);
                self.expr_to(right, dest)?;
                self.patch_jump(skip)?;
            }

            ExprKind::Binary { op, left, right } => {
                let a = self.operand(left)?;
                let b = self.operand(right)?;
                self.emit(binary_opcode(*op), &[a, b, dest]);
            }

            ExprKind::Index { object, index } => {
                let a = self.operand(object)?;
                let b = self.operand(index)?;
                self.emit(Opcode::Index, &[a, b, dest]);
            }

            ExprKind::Call { callee, args } => {
                if args.len() > MAX_ARGS {
                    return Err(self.error(CompileErrorKind::RegisterOverflow { what: "arguments", limit: MAX_ARGS }));
                }
                let f = self.operand(callee)?;
                let mut base = 0;
                for (i, arg) in args.iter().enumerate() {
                    let r = self.alloc_reg()?;
                    if i == 0 {
                        base = r;
                    }
                    self.expr_to(arg, r)?;
                }
                self.emit(Opcode::Call, &[f, args.len() as u8, base, dest]);
            }
        }
        self.state.next_reg = mark;
        self.line = saved_line;
        Ok(())
    }

    /// Load a template holding every constant element, then fill in the
    /// rest with IndexAssign.
    fn list_literal(&mut self, items: &[Expr], dest: u8) -> Result<()> {
        let template = items.iter().map(|item| constant_of(item).unwrap_or(Constant::Nil)).collect();
        self.load_constant(Constant::List(template), dest)?;
        for (i, item) in items.iter().enumerate() {
            if constant_of(item).is_some() {
                continue;
            }
            let mark = self.state.next_reg;
            let idx = self.alloc_reg()?;
            self.load_constant(Constant::Number(i as f64), idx)?;
            let v = self.operand(item)?;
            self.emit(Opcode::IndexAssign, &[dest, idx, v]);
            self.state.next_reg = mark;
        }
        Ok(())
    }
}

/// Literal expressions that can live in a list template.
fn constant_of(e: &Expr) -> Option<Constant> {
    match &e.node {
        ExprKind::Number(n) => Some(Constant::Number(*n)),
        ExprKind::Text(s) => Some(Constant::Text(Arc::from(s.as_str()))),
        ExprKind::Bool(b) => Some(Constant::Bool(*b)),
        ExprKind::List(items) => items.iter().map(constant_of).collect::<Option<Vec<_>>>().map(Constant::List),
        _ => None,
    }
}

fn binary_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Subtract => Opcode::Sub,
        BinOp::Multiply => Opcode::Mul,
        BinOp::Divide => Opcode::Div,
        BinOp::Modulo => Opcode::Mod,
        BinOp::Equals => Opcode::Equal,
        BinOp::NotEquals => Opcode::NotEqual,
        BinOp::Less => Opcode::Less,
        BinOp::LessOrEqual => Opcode::LessEqual,
        BinOp::Greater => Opcode::Greater,
        BinOp::GreaterOrEqual => Opcode::GreaterEqual,
        // Lowered to branches before reaching here
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators have no opcode"),
    }
}
