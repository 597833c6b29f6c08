use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Line infrastructure ----

/// Wraps a node with the 1-based source line it started on. Transparent to
/// serde (serializes as the inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    pub node: T,
    pub line: u32,
}

impl<T> Located<T> {
    pub fn new(node: T, line: u32) -> Self {
        Located { node, line }
    }

    pub fn unknown(node: T) -> Self {
        Located { node, line: 0 }
    }
}

impl<T> std::ops::Deref for Located<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Located<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Located<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Located::unknown)
    }
}

pub type Stmt = Located<StmtKind>;
pub type Expr = Located<ExprKind>;

// ---- Core AST types ----

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `if cond then ... else ... end`
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },

    /// `while cond do ... end`
    While { condition: Expr, body: Vec<Stmt> },

    /// `for name, iterable do ... end`
    For {
        name: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },

    /// `fn name a, b ... end` or `fn name a -> expr`
    Func {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },

    /// `sub name a, b ... end`; like `Func` but the caller always receives nil
    Sub {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },

    Return(Option<Expr>),
    Break,
    Continue,

    /// `name = expr`, `name += expr`, ...
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
    },

    /// `name:index = expr`, `name:index += expr`, ...
    AssignIndex {
        name: String,
        index: Expr,
        op: AssignOp,
        value: Expr,
    },

    /// Expression evaluated for its effect (a call)
    Expr(Expr),
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Number(f64),
    Text(String),
    Bool(bool),

    /// `{a, b, c}`
    List(Vec<Expr>),

    /// Variable reference
    Variable(String),

    /// `-expr` or `not expr`
    Unary { op: UnaryOp, operand: Box<Expr> },

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `list:index`
    Index { object: Box<Expr>, index: Box<Expr> },

    /// `callee(args)`
    Call { callee: Box<Expr>, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl AssignOp {
    /// The binary operator a compound assignment applies, `None` for plain `=`.
    pub fn binary(self) -> Option<BinOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Subtract => Some(BinOp::Subtract),
            AssignOp::Multiply => Some(BinOp::Multiply),
            AssignOp::Divide => Some(BinOp::Divide),
            AssignOp::Modulo => Some(BinOp::Modulo),
        }
    }
}

/// A complete program is the list of top-level statements
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Stmt>,
}
