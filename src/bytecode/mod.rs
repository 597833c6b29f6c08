use std::sync::Arc;

use crate::value::{Function, Value};

pub mod disasm;
pub use disasm::disassemble;

// ── Byte-oriented opcodes ───────────────────────────────────────────
//
// One opcode byte followed by a fixed number of operand bytes. Operands are
// raw register, constant-pool or global-slot indices; branch offsets are two
// bytes, big-endian, relative to the byte after the offset field.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Load = 0,          // constant, dest
    Store,             // src, local
    StoreGlobal,       // src, global
    Add,               // a, b, dest
    AddTo,             // a, b        (a += b)
    Sub,               // a, b, dest
    SubFrom,           // a, b        (a -= b)
    Mul,               // a, b, dest
    Div,               // a, b, dest
    Mod,               // a, b, dest
    Neg,               // a, dest
    Not,               // a, dest
    Equal,             // a, b, dest
    NotEqual,          // a, b, dest
    Less,              // a, b, dest
    LessEqual,         // a, b, dest
    Greater,           // a, b, dest
    GreaterEqual,      // a, b, dest
    Jump,              // offset16
    JumpIfFalse,       // test, offset16
    JumpIfTrue,        // test, offset16
    JumpIfEqual,       // a, b, offset16
    JumpIfNotEqual,    // a, b, offset16
    Loop,              // offset16    (backward)
    Call,              // func, arity, arg_base, dest
    Return,            // value
    Index,             // a, b, dest
    IndexAssign,       // a, b, c     (a[b] = c)
    LoadGlobal,        // global, dest
    Len,               // a, dest
}

const OPCODES: [Opcode; 30] = [
    Opcode::Load,
    Opcode::Store,
    Opcode::StoreGlobal,
    Opcode::Add,
    Opcode::AddTo,
    Opcode::Sub,
    Opcode::SubFrom,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Mod,
    Opcode::Neg,
    Opcode::Not,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::Less,
    Opcode::LessEqual,
    Opcode::Greater,
    Opcode::GreaterEqual,
    Opcode::Jump,
    Opcode::JumpIfFalse,
    Opcode::JumpIfTrue,
    Opcode::JumpIfEqual,
    Opcode::JumpIfNotEqual,
    Opcode::Loop,
    Opcode::Call,
    Opcode::Return,
    Opcode::Index,
    Opcode::IndexAssign,
    Opcode::LoadGlobal,
    Opcode::Len,
];

impl Opcode {
    /// Operand bytes following the opcode, branch offsets included. The
    /// compiler's emitter, the VM's decoder and the disassembler all read
    /// this one table.
    pub const fn operand_len(self) -> usize {
        match self {
            Opcode::Return => 1,
            Opcode::Jump | Opcode::Loop => 2,
            Opcode::Load
            | Opcode::Store
            | Opcode::StoreGlobal
            | Opcode::LoadGlobal
            | Opcode::AddTo
            | Opcode::SubFrom
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Len => 2,
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => 3,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Less
            | Opcode::LessEqual
            | Opcode::Greater
            | Opcode::GreaterEqual
            | Opcode::Index
            | Opcode::IndexAssign => 3,
            Opcode::JumpIfEqual | Opcode::JumpIfNotEqual | Opcode::Call => 4,
        }
    }

    /// Whether the last two operand bytes are a branch offset.
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpIfFalse
                | Opcode::JumpIfTrue
                | Opcode::JumpIfEqual
                | Opcode::JumpIfNotEqual
                | Opcode::Loop
        )
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::Add => "ADD",
            Opcode::AddTo => "ADD_TO",
            Opcode::Sub => "SUB",
            Opcode::SubFrom => "SUB_FROM",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::Equal => "EQUAL",
            Opcode::NotEqual => "NOT_EQUAL",
            Opcode::Less => "LESS",
            Opcode::LessEqual => "LESS_EQUAL",
            Opcode::Greater => "GREATER",
            Opcode::GreaterEqual => "GREATER_EQUAL",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::JumpIfTrue => "JUMP_IF_TRUE",
            Opcode::JumpIfEqual => "JUMP_IF_EQUAL",
            Opcode::JumpIfNotEqual => "JUMP_IF_NOT_EQUAL",
            Opcode::Loop => "LOOP",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::Index => "INDEX",
            Opcode::IndexAssign => "INDEX_ASSIGN",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::Len => "LEN",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        OPCODES.get(byte as usize).copied().ok_or(byte)
    }
}

// ── Constant pool ───────────────────────────────────────────────────

/// Immutable literal stored in a chunk. Unlike `Value` it holds no `Rc`, so
/// a compiled program can be shared between threads.
#[derive(Debug, Clone)]
pub enum Constant {
    Nil,
    Number(f64),
    Bool(bool),
    Text(Arc<str>),
    /// Template for a list literal; every load builds a fresh list.
    List(Vec<Constant>),
    Function(Arc<Function>),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Nil => Value::Nil,
            Constant::Number(n) => Value::Number(*n),
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Text(s) => Value::Text(Arc::clone(s)),
            Constant::List(items) => Value::list(items.iter().map(Constant::to_value).collect()),
            Constant::Function(f) => Value::Function(Arc::clone(f)),
        }
    }

    /// Scalars are interned; lists and functions always get a fresh slot.
    fn same_scalar(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Text(a), Constant::Text(b)) => a == b,
            _ => false,
        }
    }
}

// ── Chunk ────────────────────────────────────────────────────────────

pub const MAX_CONSTANTS: usize = 256;
pub const MAX_REGISTERS: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    /// Source line of every byte in `code`.
    pub lines: Vec<u32>,
    pub constants: Vec<Constant>,
    /// Registers a frame running this chunk needs.
    pub register_count: u16,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: Opcode, operands: &[u8], line: u32) {
        self.write(op as u8, line);
        for &b in operands {
            self.write(b, line);
        }
    }

    pub fn write_u16(&mut self, value: u16, line: u32) {
        let [hi, lo] = value.to_be_bytes();
        self.write(hi, line);
        self.write(lo, line);
    }

    /// Overwrite two bytes at `offset` in place (jump backpatching).
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.code[offset] = hi;
        self.code[offset + 1] = lo;
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// Index of `constant` in the pool, appending it if needed. `None` once
    /// the pool is full.
    pub fn add_constant(&mut self, constant: Constant) -> Option<u8> {
        if let Some(i) = self.constants.iter().position(|c| c.same_scalar(&constant)) {
            return Some(i as u8);
        }
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(constant);
        Some((self.constants.len() - 1) as u8)
    }

    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}
