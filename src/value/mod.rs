use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::bytecode::Chunk;
use crate::vm::RuntimeErrorKind;

/// What kind of frame an invocation of a function runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Program,
    Function,
    /// The caller always receives nil, whatever the body returns.
    Subroutine,
}

/// A compiled function. Immutable once built and shared by every call.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub kind: FrameKind,
    pub chunk: Chunk,
}

impl Function {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Runtime value held in registers, globals and list slots.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Number(f64),
    Bool(bool),
    Text(Arc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Function(Arc<Function>),
}

type Result<T> = std::result::Result<T, RuntimeErrorKind>;

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn text(s: &str) -> Self {
        Value::Text(Arc::from(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Function(_) => "function",
        }
    }

    fn mismatch(&self, expected: &'static str) -> RuntimeErrorKind {
        RuntimeErrorKind::TypeMismatch { expected, found: self.type_name() }
    }

    pub fn as_number(&self) -> Result<f64> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(other.mismatch("number")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("boolean")),
        }
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            Value::Text(s) => Ok(&**s),
            other => Err(other.mismatch("text")),
        }
    }

    pub fn as_list(&self) -> Result<&Rc<RefCell<Vec<Value>>>> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_function(&self) -> Result<&Arc<Function>> {
        match self {
            Value::Function(f) => Ok(f),
            other => Err(other.mismatch("function")),
        }
    }

    /// `self[index]` for a list and an integral number.
    pub fn get(&self, index: &Value) -> Result<Value> {
        let items = self.as_list()?.borrow();
        let i = list_index(index, items.len())?;
        Ok(items[i].clone())
    }

    /// `self[index] = value` for a list and an integral number.
    pub fn set(&self, index: &Value, value: Value) -> Result<()> {
        let mut items = self.as_list()?.borrow_mut();
        let i = list_index(index, items.len())?;
        items[i] = value;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.as_list()?.borrow().len())
    }
}

/// Non-integral indices are a type error rather than being truncated.
fn list_index(index: &Value, len: usize) -> Result<usize> {
    let n = index.as_number()?;
    if n.fract() != 0.0 || !n.is_finite() {
        return Err(RuntimeErrorKind::TypeMismatch { expected: "integral number", found: "fractional number" });
    }
    if n < 0.0 || n >= len as f64 {
        return Err(RuntimeErrorKind::IndexOutOfRange { index: n, len });
    }
    Ok(n as usize)
}

/// Variants never compare equal to each other; lists and functions compare
/// by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Lists currently being printed, innermost last. A list can hold itself
/// (`l:0 = l`), so formatting stops at a list that is already open.
type Open = Vec<*const RefCell<Vec<Value>>>;

impl Value {
    fn write_display(&self, f: &mut fmt::Formatter<'_>, open: &mut Open) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items);
                if open.contains(&ptr) {
                    return write!(f, "{{...}}");
                }
                open.push(ptr);
                write!(f, "{{")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::Text(s) => write!(f, "{:?}", s)?,
                        other => other.write_display(f, open)?,
                    }
                }
                open.pop();
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "<fn {}/{}>", func.name, func.arity()),
        }
    }

    fn write_debug(&self, f: &mut fmt::Formatter<'_>, open: &mut Open) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Number(n) => write!(f, "Number({:?})", n),
            Value::Bool(b) => write!(f, "Bool({:?})", b),
            Value::Text(s) => write!(f, "Text({:?})", s),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items);
                if open.contains(&ptr) {
                    return write!(f, "List(...)");
                }
                open.push(ptr);
                write!(f, "List([")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.write_debug(f, open)?;
                }
                open.pop();
                write!(f, "])")
            }
            Value::Function(func) => write!(f, "Function({}/{})", func.name, func.arity()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_display(f, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_debug(f, &mut Vec::new())
    }
}
