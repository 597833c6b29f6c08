//! Human-readable listing of compiled bytecode.

use std::fmt::{self, Write};

use super::{Chunk, Constant, Opcode};
use crate::value::{FrameKind, Function};

/// Disassemble a function and, after it, every function nested in its
/// constant pool.
pub fn disassemble(function: &Function) -> String {
    Listing(function).to_string()
}

struct Listing<'a>(&'a Function);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function = self.0;
        let kind = match function.kind {
            FrameKind::Program => "program",
            FrameKind::Function => "fn",
            FrameKind::Subroutine => "sub",
        };
        writeln!(
            f,
            "== {} ({}/{}, {} registers) ==",
            function.name,
            kind,
            function.arity(),
            function.chunk.register_count
        )?;

        let chunk = &function.chunk;
        let mut offset = 0;
        while offset < chunk.code.len() {
            offset = instruction(chunk, offset, &mut *f)?;
        }

        for constant in &chunk.constants {
            if let Constant::Function(nested) = constant {
                writeln!(f)?;
                write!(f, "{}", Listing(nested))?;
            }
        }
        Ok(())
    }
}

/// Write one instruction, returning the offset of the next one.
fn instruction(chunk: &Chunk, offset: usize, out: &mut impl Write) -> Result<usize, fmt::Error> {
    write!(out, "{:04} ", offset)?;
    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        write!(out, "   | ")?;
    } else {
        write!(out, "{:4} ", line)?;
    }

    let byte = chunk.code[offset];
    let op = match Opcode::try_from(byte) {
        Ok(op) => op,
        Err(byte) => {
            writeln!(out, "<unknown opcode {}>", byte)?;
            return Ok(offset + 1);
        }
    };
    let next = offset + 1 + op.operand_len();
    let Some(operands) = chunk.code.get(offset + 1..next) else {
        writeln!(out, "{} <truncated>", op.mnemonic())?;
        return Ok(chunk.code.len());
    };

    write!(out, "{:<18}", op.mnemonic())?;
    match op {
        Opcode::Load => {
            write!(out, "c{} r{}", operands[0], operands[1])?;
            if let Some(c) = chunk.constants.get(operands[0] as usize) {
                write!(out, "\t; {}", describe(c))?;
            }
        }
        Opcode::Store => write!(out, "r{} r{}", operands[0], operands[1])?,
        Opcode::StoreGlobal => write!(out, "r{} g{}", operands[0], operands[1])?,
        Opcode::LoadGlobal => write!(out, "g{} r{}", operands[0], operands[1])?,
        Opcode::Jump | Opcode::Loop | Opcode::JumpIfFalse | Opcode::JumpIfTrue | Opcode::JumpIfEqual
        | Opcode::JumpIfNotEqual => {
            let regs = &operands[..operands.len() - 2];
            for r in regs {
                write!(out, "r{} ", r)?;
            }
            let distance = chunk.read_u16(next - 2) as usize;
            let target = if op == Opcode::Loop { next.wrapping_sub(distance) } else { next + distance };
            write!(out, "-> {:04}", target)?;
        }
        Opcode::Call => write!(
            out,
            "r{} argc={} args=r{} r{}",
            operands[0], operands[1], operands[2], operands[3]
        )?,
        _ => {
            let regs: Vec<String> = operands.iter().map(|r| format!("r{}", r)).collect();
            write!(out, "{}", regs.join(" "))?;
        }
    }
    writeln!(out)?;
    Ok(next)
}

fn describe(constant: &Constant) -> String {
    match constant {
        Constant::Nil => "nil".to_string(),
        Constant::Function(f) => format!("<fn {}/{}>", f.name, f.arity()),
        other => other.to_value().to_string(),
    }
}
