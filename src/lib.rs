//! Aurora: a small scripting language compiled to byte-oriented bytecode and
//! run on a register-based virtual machine.
//!
//! ```text
//! source -> lexer -> parser -> ast::Program -> compiler -> Chunk -> vm::Vm
//! ```
//!
//! The compiler and the VM share one instruction encoding, described by
//! [`bytecode::Opcode`]. Hosts either run a program to completion with
//! [`vm::run`] or drive it one instruction at a time with [`vm::Vm::step`].

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod value;
pub mod vm;

pub use compiler::{CompileError, CompileErrorKind, CompiledProgram, compile};
pub use value::Value;
pub use vm::{RuntimeError, RuntimeErrorKind, StepResult, Vm, VmConfig};

/// Any failure between source text and a finished run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Lex and parse source text, tagging every node with its line.
pub fn parse_source(source: &str) -> Result<ast::Program, Error> {
    let tokens = lexer::lex(source)?;
    let map = ast::SourceMap::new(source);
    let tokens = tokens.into_iter().map(|(tok, span)| (tok, map.line_of(span.start))).collect();
    Ok(parser::parse(tokens)?)
}

pub fn compile_source(source: &str) -> Result<CompiledProgram, Error> {
    Ok(compile(&parse_source(source)?)?)
}

/// Compile and run source text, returning the program's result.
pub fn eval(source: &str) -> Result<Value, Error> {
    Ok(vm::run(&compile_source(source)?)?)
}
