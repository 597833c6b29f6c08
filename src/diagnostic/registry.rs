/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,
    pub long: &'static str,
}

/// Every stable error code, in code order.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer and parser ─────────────────────────────────────────────────────
    ErrorEntry {
        code: "AUR-L001",
        short: "unexpected character",
        long: r#"## AUR-L001: unexpected character

A character was found that does not start any token.

**Example:**

    x = 1 ! 2

Use `not` for negation and `!=` for inequality. Strings must be closed
with `"` on the line they start on.
"#,
    },
    ErrorEntry {
        code: "AUR-P001",
        short: "syntax error",
        long: r#"## AUR-P001: syntax error

The token stream does not match the grammar. Common causes are a missing
`end` after `if`, `while`, `for`, `fn` or `sub`, and an unbalanced `(`
or `{`.

**Example:**

    while x > 0
      x -= 1

**Fix:**

    while x > 0
      x -= 1
    end
"#,
    },
    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "AUR-C001",
        short: "branch too far",
        long: r#"## AUR-C001: branch too far

Jumps are encoded with a 16-bit offset, so the body of a single `if`,
`while` or `for` cannot exceed 65535 bytes of bytecode.

Move part of the body into a function.
"#,
    },
    ErrorEntry {
        code: "AUR-C002",
        short: "register, constant or argument limit exceeded",
        long: r#"## AUR-C002: limit exceeded

Instruction operands are single bytes, which bounds one function to 256
registers and 256 constants, a call to 255 arguments, and a program to
256 globals.

Split large functions, or keep data in lists instead of separate names.
"#,
    },
    ErrorEntry {
        code: "AUR-C003",
        short: "`break` outside a loop",
        long: r#"## AUR-C003: `break` outside a loop

`break` exits the innermost `while` or `for`. A function body does not
see the loops of the code that defines it.

**Example:**

    fn f
      break
    end
"#,
    },
    ErrorEntry {
        code: "AUR-C004",
        short: "`continue` outside a loop",
        long: r#"## AUR-C004: `continue` outside a loop

`continue` restarts the innermost `while` or `for`. It has no meaning
outside one.
"#,
    },
    ErrorEntry {
        code: "AUR-C005",
        short: "unresolved name",
        long: r#"## AUR-C005: unresolved name

A name was read, or updated with `+=` and friends, but is never assigned
at top level or in the current function.

Functions do not capture the locals of an enclosing function; pass the
value as an argument or make it a global.

**Example:**

    fn outer
      a = 1
      fn inner -> a
    end
"#,
    },
    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "AUR-R001",
        short: "type mismatch",
        long: r#"## AUR-R001: type mismatch

An operator got a value of the wrong type. There are no implicit
conversions: arithmetic and ordering need numbers, `not` and conditions
need booleans, indexing needs a list and a whole number, and only
functions can be called.

**Example:**

    x = 1 + true
"#,
    },
    ErrorEntry {
        code: "AUR-R002",
        short: "wrong number of arguments",
        long: r#"## AUR-R002: wrong number of arguments

A function was called with a different number of arguments than it
declares parameters.

**Example:**

    fn add a, b -> a + b
    add(1)
"#,
    },
    ErrorEntry {
        code: "AUR-R003",
        short: "index out of range",
        long: r#"## AUR-R003: index out of range

List indices start at 0 and must be less than the length of the list.

**Example:**

    l = {1, 2, 3}
    x = l:3
"#,
    },
    ErrorEntry {
        code: "AUR-R004",
        short: "call stack underflow",
        long: r#"## AUR-R004: call stack underflow

The VM executed a return with no frame to return from. This indicates a
bug in the compiler or VM, not in the program.
"#,
    },
    ErrorEntry {
        code: "AUR-R005",
        short: "call depth exceeded",
        long: r#"## AUR-R005: call depth exceeded

Too many calls were active at once, usually from recursion without a
base case. Raise the limit with `--max-depth` if the depth is intended.
"#,
    },
    ErrorEntry {
        code: "AUR-R006",
        short: "malformed bytecode",
        long: r#"## AUR-R006: malformed bytecode

An instruction referenced a register, constant or global outside its
chunk, or the program counter left the code. This indicates a bug in the
compiler or VM, not in the program.
"#,
    },
];

pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}
