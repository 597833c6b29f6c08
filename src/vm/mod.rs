use std::sync::Arc;

use crate::bytecode::Opcode;
use crate::compiler::CompiledProgram;
use crate::value::{FrameKind, Function, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("`{name}` takes {expected} argument(s) but {found} were supplied")]
    ArityMismatch { name: String, expected: usize, found: usize },
    #[error("index {index} out of range for a list of length {len}")]
    IndexOutOfRange { index: f64, len: usize },
    #[error("return with an empty call stack")]
    StackUnderflow,
    #[error("call depth exceeded the limit of {limit}")]
    CallDepthExceeded { limit: usize },
    #[error("malformed chunk: {reason}")]
    MalformedChunk { reason: String },
}

/// A runtime failure, located at the function and source line of the
/// instruction that raised it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Runtime error at line {line} in `{function}`: {kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub function: String,
    pub line: u32,
}

type VmResult<T> = std::result::Result<T, RuntimeErrorKind>;

fn malformed(reason: impl Into<String>) -> RuntimeErrorKind {
    RuntimeErrorKind::MalformedChunk { reason: reason.into() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames allowed on the call stack at once, the program frame included.
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { max_call_depth: 1024 }
    }
}

/// Outcome of executing one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Continue,
    Finished(Value),
    Failed(RuntimeError),
}

struct CallFrame {
    function: Arc<Function>,
    pc: usize,
    /// Start of this frame's register window in `Vm::stack`.
    base: usize,
    /// Caller register that receives the return value.
    dest: u8,
    kind: FrameKind,
}

enum Status {
    Running,
    Finished(Value),
    Failed(RuntimeError),
}

// ── VM ───────────────────────────────────────────────────────────────

pub struct Vm {
    frames: Vec<CallFrame>,
    /// Register windows of every live frame, innermost last.
    stack: Vec<Value>,
    globals: Vec<Value>,
    global_names: Vec<String>,
    config: VmConfig,
    status: Status,
    steps: u64,
    /// Offset of the instruction being executed, for error lines.
    op_start: usize,
}

/// Compile-free convenience: run a program to completion on a fresh VM.
pub fn run(program: &CompiledProgram) -> Result<Value, RuntimeError> {
    Vm::new(program).run()
}

impl Vm {
    pub fn new(program: &CompiledProgram) -> Self {
        Vm::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: &CompiledProgram, config: VmConfig) -> Self {
        let main = Arc::clone(&program.main);
        let window = main.chunk.register_count as usize;
        Vm {
            frames: vec![CallFrame { function: main, pc: 0, base: 0, dest: 0, kind: FrameKind::Program }],
            stack: vec![Value::Nil; window],
            globals: vec![Value::Nil; program.globals.len()],
            global_names: program.globals.clone(),
            config,
            status: Status::Running,
            steps: 0,
            op_start: 0,
        }
    }

    /// Run until the program frame returns or an instruction fails.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            match self.step() {
                StepResult::Continue => {}
                StepResult::Finished(value) => return Ok(value),
                StepResult::Failed(err) => return Err(err),
            }
        }
    }

    /// Execute exactly one instruction. Once the program has finished or
    /// failed, returns that outcome again without executing anything.
    pub fn step(&mut self) -> StepResult {
        match &self.status {
            Status::Finished(value) => return StepResult::Finished(value.clone()),
            Status::Failed(err) => return StepResult::Failed(err.clone()),
            Status::Running => {}
        }
        self.steps += 1;
        match self.execute() {
            Ok(None) => StepResult::Continue,
            Ok(Some(value)) => {
                tracing::debug!(steps = self.steps, result = %value, "program finished");
                self.status = Status::Finished(value.clone());
                StepResult::Finished(value)
            }
            Err(kind) => {
                let err = self.locate(kind);
                tracing::debug!(steps = self.steps, error = %err, "program failed");
                self.status = Status::Failed(err.clone());
                StepResult::Failed(err)
            }
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        let slot = self.global_names.iter().position(|g| g == name)?;
        self.globals.get(slot)
    }

    /// Every global in slot order.
    pub fn globals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.global_names.iter().map(String::as_str).zip(self.globals.iter())
    }

    /// Active frames; zero once the program has returned.
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn locate(&self, kind: RuntimeErrorKind) -> RuntimeError {
        match self.frames.last() {
            Some(frame) => RuntimeError {
                kind,
                function: frame.function.name.clone(),
                line: frame.function.chunk.line_at(self.op_start),
            },
            None => RuntimeError { kind, function: String::new(), line: 0 },
        }
    }

    // ── Frame access ──

    fn frame(&self) -> VmResult<&CallFrame> {
        self.frames.last().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.frames.last_mut().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    /// Stack index of register `r` in the current frame's window.
    fn slot(&self, r: u8) -> VmResult<usize> {
        let frame = self.frame()?;
        let window = frame.function.chunk.register_count;
        if (r as u16) < window {
            Ok(frame.base + r as usize)
        } else {
            Err(malformed(format!("register r{} outside a window of {}", r, window)))
        }
    }

    fn reg(&self, r: u8) -> VmResult<&Value> {
        let i = self.slot(r)?;
        Ok(&self.stack[i])
    }

    fn set_reg(&mut self, r: u8, value: Value) -> VmResult<()> {
        let i = self.slot(r)?;
        self.stack[i] = value;
        Ok(())
    }

    fn number(&self, r: u8) -> VmResult<f64> {
        self.reg(r)?.as_number()
    }

    fn global_slot(&self, slot: u8) -> VmResult<usize> {
        let slot = slot as usize;
        if slot < self.globals.len() {
            Ok(slot)
        } else {
            Err(malformed(format!("global slot {} of {}", slot, self.globals.len())))
        }
    }

    /// Decode the next instruction and advance past it.
    fn fetch(&mut self) -> VmResult<(Opcode, [u8; 4])> {
        let frame = self.frames.last_mut().ok_or(RuntimeErrorKind::StackUnderflow)?;
        let code = &frame.function.chunk.code;
        let pc = frame.pc;
        let byte = *code.get(pc).ok_or_else(|| malformed(format!("pc {} past end of code", pc)))?;
        let op = Opcode::try_from(byte).map_err(|b| malformed(format!("unknown opcode {} at {}", b, pc)))?;
        let n = op.operand_len();
        let bytes = code
            .get(pc + 1..pc + 1 + n)
            .ok_or_else(|| malformed(format!("truncated {} at {}", op.mnemonic(), pc)))?;
        let mut operands = [0u8; 4];
        operands[..n].copy_from_slice(bytes);
        frame.pc = pc + 1 + n;
        self.op_start = pc;
        Ok((op, operands))
    }

    // ── Dispatch ──

    /// One instruction. `Some` carries the program's result once the
    /// program frame returns.
    fn execute(&mut self) -> VmResult<Option<Value>> {
        let (op, [a, b, c, d]) = self.fetch()?;
        tracing::trace!(pc = self.op_start, op = op.mnemonic(), a, b, c, d, "exec");

        match op {
            Opcode::Load => {
                let constant = self
                    .frame()?
                    .function
                    .chunk
                    .constants
                    .get(a as usize)
                    .ok_or_else(|| malformed(format!("constant {} out of range", a)))?
                    .to_value();
                self.set_reg(b, constant)?;
            }
            Opcode::Store => {
                let value = self.reg(a)?.clone();
                self.set_reg(b, value)?;
            }
            Opcode::StoreGlobal => {
                let value = self.reg(a)?.clone();
                let slot = self.global_slot(b)?;
                self.globals[slot] = value;
            }
            Opcode::LoadGlobal => {
                let slot = self.global_slot(a)?;
                let value = self.globals[slot].clone();
                self.set_reg(b, value)?;
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let result = arith(op, self.number(a)?, self.number(b)?);
                self.set_reg(c, Value::Number(result))?;
            }
            Opcode::AddTo | Opcode::SubFrom => {
                let op = if op == Opcode::AddTo { Opcode::Add } else { Opcode::Sub };
                let result = arith(op, self.number(a)?, self.number(b)?);
                self.set_reg(a, Value::Number(result))?;
            }
            Opcode::Neg => {
                let n = self.number(a)?;
                self.set_reg(b, Value::Number(-n))?;
            }
            Opcode::Not => {
                let v = self.reg(a)?.as_bool()?;
                self.set_reg(b, Value::Bool(!v))?;
            }

            Opcode::Equal | Opcode::NotEqual => {
                let eq = self.reg(a)? == self.reg(b)?;
                self.set_reg(c, Value::Bool(eq == (op == Opcode::Equal)))?;
            }
            Opcode::Less | Opcode::LessEqual | Opcode::Greater | Opcode::GreaterEqual => {
                let (x, y) = (self.number(a)?, self.number(b)?);
                let result = match op {
                    Opcode::Less => x < y,
                    Opcode::LessEqual => x <= y,
                    Opcode::Greater => x > y,
                    _ => x >= y,
                };
                self.set_reg(c, Value::Bool(result))?;
            }

            Opcode::Jump => self.jump(offset(a, b))?,
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                let test = self.reg(a)?.as_bool()?;
                if test == (op == Opcode::JumpIfTrue) {
                    self.jump(offset(b, c))?;
                }
            }
            Opcode::JumpIfEqual | Opcode::JumpIfNotEqual => {
                let eq = self.reg(a)? == self.reg(b)?;
                if eq == (op == Opcode::JumpIfEqual) {
                    self.jump(offset(c, d))?;
                }
            }
            Opcode::Loop => {
                let frame = self.frame_mut()?;
                frame.pc = frame
                    .pc
                    .checked_sub(offset(a, b))
                    .ok_or_else(|| malformed("loop before start of code"))?;
            }

            Opcode::Call => self.call(a, b, c, d)?,
            Opcode::Return => return self.ret(a),

            Opcode::Index => {
                let value = self.reg(a)?.get(self.reg(b)?)?;
                self.set_reg(c, value)?;
            }
            Opcode::IndexAssign => {
                let value = self.reg(c)?.clone();
                self.reg(a)?.set(self.reg(b)?, value)?;
            }
            Opcode::Len => {
                let len = self.reg(a)?.len()?;
                self.set_reg(b, Value::Number(len as f64))?;
            }
        }
        Ok(None)
    }

    fn jump(&mut self, offset: usize) -> VmResult<()> {
        self.frame_mut()?.pc += offset;
        Ok(())
    }

    /// Push a frame for the function in `func` with `argc` arguments copied
    /// from consecutive registers at `arg_base`. Nothing is pushed if the
    /// call is rejected.
    fn call(&mut self, func: u8, argc: u8, arg_base: u8, dest: u8) -> VmResult<()> {
        let function = Arc::clone(self.reg(func)?.as_function()?);
        let argc = argc as usize;
        if function.arity() != argc {
            return Err(RuntimeErrorKind::ArityMismatch {
                name: function.name.clone(),
                expected: function.arity(),
                found: argc,
            });
        }
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeErrorKind::CallDepthExceeded { limit: self.config.max_call_depth });
        }

        let args = if argc == 0 {
            0..0
        } else {
            let first = self.slot(arg_base)?;
            let last = self.slot(arg_base.checked_add(argc as u8 - 1).ok_or_else(|| malformed("argument window overflows"))?)?;
            first..last + 1
        };
        let window = function.chunk.register_count as usize;
        if window < argc {
            return Err(malformed(format!("`{}` has {} registers for {} parameters", function.name, window, argc)));
        }

        let base = self.stack.len();
        self.stack.resize(base + window, Value::Nil);
        for (i, from) in args.enumerate() {
            self.stack[base + i] = self.stack[from].clone();
        }
        tracing::debug!(function = %function.name, depth = self.frames.len() + 1, "call");
        let kind = function.kind;
        self.frames.push(CallFrame { function, pc: 0, base, dest, kind });
        Ok(())
    }

    /// Pop the current frame and hand `value` to the caller's destination
    /// register, or finish the program when the outermost frame returns.
    fn ret(&mut self, value: u8) -> VmResult<Option<Value>> {
        let value = self.reg(value)?.clone();
        let frame = self.frames.pop().ok_or(RuntimeErrorKind::StackUnderflow)?;
        self.stack.truncate(frame.base);
        let value = match frame.kind {
            FrameKind::Subroutine => Value::Nil,
            FrameKind::Program | FrameKind::Function => value,
        };
        tracing::debug!(function = %frame.function.name, depth = self.frames.len(), "return");
        if self.frames.is_empty() {
            return Ok(Some(value));
        }
        self.set_reg(frame.dest, value)?;
        Ok(None)
    }
}

fn offset(hi: u8, lo: u8) -> usize {
    u16::from_be_bytes([hi, lo]) as usize
}

/// IEEE-754 arithmetic: division by zero gives ±inf (NaN for 0/0) and
/// modulo by zero gives NaN.
fn arith(op: Opcode, x: f64, y: f64) -> f64 {
    match op {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x * y,
        Opcode::Div => x / y,
        _ => x % y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, Constant};

    fn compile(source: &str) -> CompiledProgram {
        crate::compile_source(source).unwrap()
    }

    fn eval(source: &str) -> Result<Value, RuntimeError> {
        run(&compile(source))
    }

    fn num(source: &str) -> f64 {
        match eval(source) {
            Ok(Value::Number(n)) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    fn run_vm(source: &str) -> Vm {
        let program = compile(source);
        let mut vm = Vm::new(&program);
        vm.run().unwrap();
        vm
    }

    fn kind(source: &str) -> RuntimeErrorKind {
        eval(source).unwrap_err().kind
    }

    #[test]
    fn arithmetic_matches_native() {
        let pairs = [(1.0, 2.0), (7.0, 2.0), (-3.5, 1.25), (10.0, -4.0), (0.1, 0.2)];
        for (a, b) in pairs {
            let src = |op: &str| {
                // Literals are unsigned; negatives go through unary minus
                let lit = |n: f64| if n < 0.0 { format!("(-{})", -n) } else { n.to_string() };
                format!("return {} {} {}", lit(a), op, lit(b))
            };
            assert_eq!(num(&src("+")), a + b);
            assert_eq!(num(&src("-")), a - b);
            assert_eq!(num(&src("*")), a * b);
            assert_eq!(num(&src("/")), a / b);
            assert_eq!(num(&src("%")), a % b);
        }
        assert_eq!(num("return 1 + 2"), 3.0);
        assert_eq!(num("return 7 % 2"), 1.0);
        assert_eq!(num("return 2 + 3 * 4 - 6 / 2"), 11.0);
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("return 1 < 2"), Ok(Value::Bool(true)));
        assert_eq!(eval("return 2 <= 1"), Ok(Value::Bool(false)));
        assert_eq!(eval("return 3 >= 3 and not false"), Ok(Value::Bool(true)));
        assert_eq!(eval("return \"a\" == \"a\""), Ok(Value::Bool(true)));
        assert_eq!(eval("return 1 == true"), Ok(Value::Bool(false)));
        assert_eq!(eval("return 1 != \"1\""), Ok(Value::Bool(true)));
    }

    #[test]
    fn division_by_zero_is_ieee() {
        assert_eq!(num("return 1 / 0"), f64::INFINITY);
        assert_eq!(num("return -1 / 0"), f64::NEG_INFINITY);
        assert!(num("return 0 / 0").is_nan());
        assert!(num("return 5 % 0").is_nan());
    }

    #[test]
    fn if_runs_exactly_one_branch() {
        for (cond, taken) in [("true", "then"), ("false", "else"), ("1 < 2", "then"), ("2 == 3", "else")] {
            let vm = run_vm(&format!(
                "a = 0\nb = 0\nif {} then\n  a = 1\nelse\n  b = 1\nend\n",
                cond
            ));
            let (a, b) = if taken == "then" { (1.0, 0.0) } else { (0.0, 1.0) };
            assert_eq!(vm.global("a"), Some(&Value::Number(a)), "{}", cond);
            assert_eq!(vm.global("b"), Some(&Value::Number(b)), "{}", cond);
        }
    }

    #[test]
    fn while_runs_body_n_times() {
        for n in 0..12 {
            let vm = run_vm(&format!("n = {}\ncount = 0\nwhile n > 0 do\n  n -= 1\n  count += 1\nend\n", n));
            assert_eq!(vm.global("count"), Some(&Value::Number(n as f64)));
            assert_eq!(vm.global("n"), Some(&Value::Number(0.0)));
        }
    }

    #[test]
    fn break_and_continue() {
        let vm = run_vm("i = 0\nhits = 0\nwhile true\n  i += 1\n  if i > 10 then break end\n  if i % 2 == 0 then continue end\n  hits += 1\nend\n");
        assert_eq!(vm.global("i"), Some(&Value::Number(11.0)));
        assert_eq!(vm.global("hits"), Some(&Value::Number(5.0)));
    }

    #[test]
    fn for_iterates_lists() {
        let vm = run_vm("total = 0\nodd = 0\nfor v, {1, 2, 3, 4} do\n  total += v\n  if v % 2 == 0 then continue end\n  odd += 1\nend\n");
        assert_eq!(vm.global("total"), Some(&Value::Number(10.0)));
        assert_eq!(vm.global("odd"), Some(&Value::Number(2.0)));
        assert_eq!(vm.global("v"), Some(&Value::Number(4.0)));

        let vm = run_vm("seen = 0\nfor v, {} do seen += 1 end\n");
        assert_eq!(vm.global("seen"), Some(&Value::Number(0.0)));
    }

    #[test]
    fn for_inside_function_uses_locals() {
        assert_eq!(num("fn sum l\n  s = 0\n  for x, l do s += x end\n  return s\nend\nreturn sum({5, 6, 7})"), 18.0);
    }

    #[test]
    fn inner_loop_registers_stay_out_of_later_locals() {
        let source = "fn f\n  n = 0\n  total = 0\n  while n < 3 do\n    for v, {5, 6} do end\n    if n == 0 then last = 100 end\n    total += last\n    n += 1\n  end\n  return total\nend\nreturn f()\n";
        assert_eq!(num(source), 300.0);
    }

    #[test]
    fn locals_reuse_finished_loop_registers() {
        assert_eq!(num("fn f l\n  for v, l do end\n  a = v * 2\n  for w, l do end\n  b = w\n  return a + b\nend\nreturn f({1, 2, 3})"), 9.0);
    }

    #[test]
    fn arity_checked_at_every_call() {
        let header = "fn f a, b -> a\n";
        for argc in 0..5 {
            let args = vec!["1"; argc].join(", ");
            let result = eval(&format!("{}return f({})", header, args));
            match argc {
                2 => assert_eq!(result, Ok(Value::Number(1.0))),
                _ => assert_eq!(
                    result.unwrap_err().kind,
                    RuntimeErrorKind::ArityMismatch { name: "f".to_string(), expected: 2, found: argc }
                ),
            }
        }
    }

    #[test]
    fn arity_failure_leaves_caller_frame() {
        let program = compile("fn f a -> a\nx = 1\nf()\n");
        let mut vm = Vm::new(&program);
        let err = vm.run().unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::ArityMismatch { .. }));
        assert_eq!(err.function, crate::compiler::MAIN);
        assert_eq!(err.line, 3);
        assert_eq!(vm.call_depth(), 1);
    }

    #[test]
    fn list_indexing() {
        assert_eq!(num("return {1, 2, 3}:0"), 1.0);
        assert_eq!(kind("return {1, 2, 3}:3"), RuntimeErrorKind::IndexOutOfRange { index: 3.0, len: 3 });
        assert_eq!(kind("return {1, 2, 3}:(-1)"), RuntimeErrorKind::IndexOutOfRange { index: -1.0, len: 3 });
        assert_eq!(num("l = {1, 2, 3}\nl:0 = 9\nreturn l:0"), 9.0);
        assert_eq!(num("l = {1, 2, 3}\nl:2 += 4\nreturn l:2"), 7.0);
        assert!(matches!(kind("return {1, 2}:0.5"), RuntimeErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn list_literals_never_alias() {
        let vm = run_vm("fn mk -> {0, {1}}\na = mk()\nb = mk()\na:0 = 5\ninner = a:1\ninner:0 = 7\nx = b:0\ny = (b:1):0\nsame = a == b\n");
        assert_eq!(vm.global("x"), Some(&Value::Number(0.0)));
        assert_eq!(vm.global("y"), Some(&Value::Number(1.0)));
        assert_eq!(vm.global("same"), Some(&Value::Bool(false)));
    }

    #[test]
    fn lists_are_shared_by_reference() {
        let vm = run_vm("a = {1, 2}\nb = a\nb:0 = 9\nx = a:0\nsame = a == b\n");
        assert_eq!(vm.global("x"), Some(&Value::Number(9.0)));
        assert_eq!(vm.global("same"), Some(&Value::Bool(true)));
    }

    #[test]
    fn list_elements_are_evaluated() {
        let vm = run_vm("a = 2\nl = {a, a * 2, \"s\", {a}}\nn = l:1\nm = (l:3):0\n");
        assert_eq!(vm.global("n"), Some(&Value::Number(4.0)));
        assert_eq!(vm.global("m"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn recursion_is_isolated_per_frame() {
        let program = compile("fn fact n\n  if n <= 1 then return 1 end\n  return n * fact(n - 1)\nend\nreturn fact(5)\n");
        let mut vm = Vm::new(&program);
        assert_eq!(vm.run(), Ok(Value::Number(120.0)));
        assert_eq!(vm.call_depth(), 0);

        assert_eq!(num("fn fib n\n  if n < 2 then return n end\n  return fib(n - 1) + fib(n - 2)\nend\nreturn fib(15)"), 610.0);
    }

    #[test]
    fn functions_write_globals() {
        let vm = run_vm("count = 0\nsub bump by\n  count += by\nend\nbump 2\nbump(3)\n");
        assert_eq!(vm.global("count"), Some(&Value::Number(5.0)));
    }

    #[test]
    fn subroutines_deliver_nil() {
        assert_eq!(eval("sub s -> return 5\nreturn s()"), Ok(Value::Nil));
        assert_eq!(eval("fn f -> 5\nreturn f()"), Ok(Value::Number(5.0)));
        assert_eq!(eval("fn f\n  x = 1\nend\nreturn f()"), Ok(Value::Nil));
    }

    #[test]
    fn functions_are_values() {
        assert_eq!(num("fn twice f, x -> f(f(x))\nfn inc x -> x + 1\nreturn twice(inc, 3)"), 5.0);
        assert_eq!(num("fns = {0}\nfn sq x -> x * x\nfns:0 = sq\nreturn fns:0(4)"), 16.0);
    }

    #[test]
    fn short_circuit_skips_right_operand() {
        assert_eq!(eval("l = {1}\nreturn false and l:5 == 1"), Ok(Value::Bool(false)));
        assert_eq!(eval("l = {1}\nreturn true or l:5 == 1"), Ok(Value::Bool(true)));
        assert_eq!(eval("return true and false"), Ok(Value::Bool(false)));
    }

    #[test]
    fn type_mismatches() {
        assert_eq!(kind("return 1 + true"), RuntimeErrorKind::TypeMismatch { expected: "number", found: "boolean" });
        assert_eq!(kind("return -\"a\""), RuntimeErrorKind::TypeMismatch { expected: "number", found: "text" });
        assert_eq!(kind("return not 1"), RuntimeErrorKind::TypeMismatch { expected: "boolean", found: "number" });
        assert_eq!(kind("if 1 then x = 1 end"), RuntimeErrorKind::TypeMismatch { expected: "boolean", found: "number" });
        assert_eq!(kind("x = 1\nx()"), RuntimeErrorKind::TypeMismatch { expected: "function", found: "number" });
        assert_eq!(kind("return 1:0"), RuntimeErrorKind::TypeMismatch { expected: "list", found: "number" });
        assert_eq!(kind("for v, 3 do end"), RuntimeErrorKind::TypeMismatch { expected: "list", found: "number" });
    }

    #[test]
    fn errors_name_function_and_line() {
        let err = eval("fn bad x\n  y = x\n  return y + true\nend\nbad(1)\n").unwrap_err();
        assert_eq!(err.function, "bad");
        assert_eq!(err.line, 3);
        assert_eq!(err.to_string(), "Runtime error at line 3 in `bad`: type mismatch: expected number, found boolean");
    }

    #[test]
    fn call_depth_is_bounded() {
        let program = compile("fn down n -> down(n + 1)\ndown(0)\n");
        let err = Vm::with_config(&program, VmConfig { max_call_depth: 50 }).run().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::CallDepthExceeded { limit: 50 });
        assert_eq!(err.function, "down");

        let err = run(&program).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::CallDepthExceeded { limit: 1024 });
    }

    #[test]
    fn stepping_is_bounded_and_terminal_results_repeat() {
        let program = compile("x = 1\nwhile true do x += 1 end\n");
        let mut vm = Vm::new(&program);
        for _ in 0..1000 {
            assert_eq!(vm.step(), StepResult::Continue);
        }
        assert_eq!(vm.steps(), 1000);
        assert!(matches!(vm.global("x"), Some(Value::Number(n)) if *n > 1.0));

        let program = compile("return 2");
        let mut vm = Vm::new(&program);
        let mut result = vm.step();
        while result == StepResult::Continue {
            result = vm.step();
        }
        assert_eq!(result, StepResult::Finished(Value::Number(2.0)));
        let steps = vm.steps();
        assert_eq!(vm.step(), StepResult::Finished(Value::Number(2.0)));
        assert_eq!(vm.steps(), steps);

        let program = compile("return 1 + true");
        let mut vm = Vm::new(&program);
        let err = vm.run().unwrap_err();
        assert_eq!(vm.step(), StepResult::Failed(err));
    }

    fn hand_built(code: Vec<u8>, constants: Vec<Constant>, registers: u16) -> CompiledProgram {
        let lines = vec![1; code.len()];
        let chunk = Chunk { code, lines, constants, register_count: registers };
        let main = Function { name: "main".to_string(), params: vec![], kind: FrameKind::Program, chunk };
        CompiledProgram { main: Arc::new(main), globals: vec![] }
    }

    #[test]
    fn malformed_chunks_fail_cleanly() {
        let cases = [
            hand_built(vec![200], vec![], 1),
            hand_built(vec![Opcode::Load as u8, 3, 0], vec![], 1),
            hand_built(vec![Opcode::Load as u8, 0, 9], vec![Constant::Nil], 1),
            hand_built(vec![Opcode::StoreGlobal as u8, 0, 0], vec![], 1),
            hand_built(vec![Opcode::Add as u8, 0], vec![], 1),
            hand_built(vec![Opcode::Jump as u8, 0, 0], vec![], 1),
            hand_built(vec![Opcode::Loop as u8, 0, 9], vec![], 1),
        ];
        for program in &cases {
            let err = run(program).unwrap_err();
            assert!(matches!(err.kind, RuntimeErrorKind::MalformedChunk { .. }), "{:?}", err);
        }
    }

    #[test]
    fn compiled_programs_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledProgram>();

        let program = compile("fn sq x -> x * x\nreturn sq(12)");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let program = program.clone();
                std::thread::spawn(move || match run(&program) {
                    Ok(Value::Number(n)) => n,
                    _ => f64::NAN,
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 144.0);
        }
    }
}
