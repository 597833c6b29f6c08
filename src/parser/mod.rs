use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, u32)>,
    pos: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Parse error at line {line}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a line-tagged token stream into a program.
pub fn parse(tokens: Vec<(Token, u32)>) -> Result<Program> {
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<(Token, u32)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(1)
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Consume `expected` if it is next. Returns whether it was.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<u32> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let line = self.peek_line();
                self.pos += 1;
                Ok(line)
            }
            Some(tok) => Err(self.error(format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error(format!("expected {:?}, got end of input", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            Some(tok) => Err(self.error(format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("expected identifier, got end of input".into())),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError { line: self.peek_line(), message }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    /// A statement ends at a newline, at end of input, or right before one of
    /// the block terminators (which lets `if c then x = 1 else x = 2 end`
    /// fit on one line).
    fn end_statement(&mut self, terminators: &[Token]) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(Token::Newline) => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) if terminators.contains(tok) => Ok(()),
            Some(tok) => Err(self.error(format!("expected end of statement, got {:?}", tok))),
        }
    }

    // ---- Statements ----

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_end() {
                break;
            }
            body.push(self.parse_stmt()?);
            self.end_statement(&[])?;
        }
        Ok(Program { body })
    }

    /// Statements up to (not including) one of `terminators`.
    fn parse_block(&mut self, terminators: &[Token]) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                None => {
                    return Err(self.error(format!("expected {:?} before end of input", terminators[0])));
                }
                Some(tok) if terminators.contains(tok) => return Ok(stmts),
                Some(_) => {
                    stmts.push(self.parse_stmt()?);
                    self.end_statement(terminators)?;
                }
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => {
                self.pos += 1;
                let condition = self.parse_expr()?;
                self.eat(&Token::Do);
                let body = self.parse_block(&[Token::End])?;
                self.expect(&Token::End)?;
                Ok(Located::new(StmtKind::While { condition, body }, line))
            }
            Some(Token::For) => {
                self.pos += 1;
                let name = self.expect_ident()?;
                self.expect(&Token::Comma)?;
                let iterable = self.parse_expr()?;
                self.eat(&Token::Do);
                let body = self.parse_block(&[Token::End])?;
                self.expect(&Token::End)?;
                Ok(Located::new(StmtKind::For { name, iterable, body }, line))
            }
            Some(Token::Fn) => self.parse_callable(false),
            Some(Token::Sub) => self.parse_callable(true),
            Some(Token::Return) => {
                self.pos += 1;
                let value = match self.peek() {
                    None | Some(Token::Newline | Token::End | Token::Else) => None,
                    Some(_) => Some(self.parse_expr()?),
                };
                Ok(Located::new(StmtKind::Return(value), line))
            }
            Some(Token::Break) => {
                self.pos += 1;
                Ok(Located::new(StmtKind::Break, line))
            }
            Some(Token::Continue) => {
                self.pos += 1;
                Ok(Located::new(StmtKind::Continue, line))
            }
            Some(Token::Ident(_)) => self.parse_ident_stmt(),
            Some(tok) => Err(self.error(format!("unexpected token {:?} at start of statement", tok))),
            None => Err(self.error("expected statement, got end of input".into())),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let line = self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        self.eat(&Token::Then);
        let then_branch = self.parse_block(&[Token::Else, Token::End])?;
        let else_branch = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                // `else if` shares the closing `end` of the chain
                vec![self.parse_if()?]
            } else {
                let block = self.parse_block(&[Token::End])?;
                self.expect(&Token::End)?;
                block
            }
        } else {
            self.expect(&Token::End)?;
            Vec::new()
        };
        Ok(Located::new(StmtKind::If { condition, then_branch, else_branch }, line))
    }

    /// `fn name a, b ... end`, `fn name(a, b) ... end` or `fn name a -> expr`;
    /// `sub` takes a statement after `->` instead of an expression.
    fn parse_callable(&mut self, is_sub: bool) -> Result<Stmt> {
        let line = self.peek_line();
        self.pos += 1;
        let name = self.expect_ident()?;
        let mut params = Vec::new();
        if self.eat(&Token::LParen) {
            if !self.eat(&Token::RParen) {
                loop {
                    params.push(self.expect_ident()?);
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.expect(&Token::Comma)?;
                }
            }
        } else {
            while matches!(self.peek(), Some(Token::Ident(_))) {
                params.push(self.expect_ident()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let body = if self.eat(&Token::Arrow) {
            let body_line = self.peek_line();
            if is_sub {
                vec![self.parse_stmt()?]
            } else {
                let value = self.parse_expr()?;
                vec![Located::new(StmtKind::Return(Some(value)), body_line)]
            }
        } else {
            if !self.check(&Token::Newline) {
                return Err(self.error(format!("expected newline or `->` after parameters of `{}`", name)));
            }
            let body = self.parse_block(&[Token::End])?;
            self.expect(&Token::End)?;
            body
        };

        let kind = if is_sub {
            StmtKind::Sub { name, params, body }
        } else {
            StmtKind::Func { name, params, body }
        };
        Ok(Located::new(kind, line))
    }

    fn assign_op(&self) -> Option<AssignOp> {
        match self.peek()? {
            Token::Assign => Some(AssignOp::Assign),
            Token::PlusAssign => Some(AssignOp::Add),
            Token::MinusAssign => Some(AssignOp::Subtract),
            Token::StarAssign => Some(AssignOp::Multiply),
            Token::SlashAssign => Some(AssignOp::Divide),
            Token::PercentAssign => Some(AssignOp::Modulo),
            _ => None,
        }
    }

    /// Assignment, indexed assignment, or a call statement.
    fn parse_ident_stmt(&mut self) -> Result<Stmt> {
        let line = self.peek_line();
        let start = self.pos;
        let name = self.expect_ident()?;

        if let Some(op) = self.assign_op() {
            self.pos += 1;
            let value = self.parse_expr()?;
            return Ok(Located::new(StmtKind::Assign { name, op, value }, line));
        }

        if self.eat(&Token::Colon) {
            let index = self.parse_primary()?;
            if let Some(op) = self.assign_op() {
                self.pos += 1;
                let value = self.parse_expr()?;
                return Ok(Located::new(StmtKind::AssignIndex { name, index, op, value }, line));
            }
            // Not an assignment: reparse as an expression statement
            self.pos = start;
            let expr = self.parse_expr()?;
            return Ok(Located::new(StmtKind::Expr(expr), line));
        }

        match self.peek() {
            Some(Token::LParen) => {
                self.pos = start;
                let expr = self.parse_expr()?;
                Ok(Located::new(StmtKind::Expr(expr), line))
            }
            // Command-style call: `name arg, arg`
            _ => {
                let mut args = Vec::new();
                if !matches!(self.peek(), None | Some(Token::Newline | Token::End | Token::Else)) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                let callee = Located::new(ExprKind::Variable(name), line);
                let call = ExprKind::Call { callee: Box::new(callee), args };
                Ok(Located::new(StmtKind::Expr(Located::new(call, line)), line))
            }
        }
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn binary(op: BinOp, left: Expr, right: Expr, line: u32) -> Expr {
        Located::new(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, line)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;
        while self.check(&Token::Or) {
            let line = self.peek_line();
            self.pos += 1;
            let right = self.parse_and()?;
            expr = Self::binary(BinOp::Or, expr, right, line);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_equality()?;
        while self.check(&Token::And) {
            let line = self.peek_line();
            self.pos += 1;
            let right = self.parse_equality()?;
            expr = Self::binary(BinOp::And, expr, right, line);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqualEqual) => BinOp::Equals,
                Some(Token::BangEqual) => BinOp::NotEquals,
                _ => return Ok(expr),
            };
            let line = self.peek_line();
            self.pos += 1;
            let right = self.parse_comparison()?;
            expr = Self::binary(op, expr, right, line);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Less) => BinOp::Less,
                Some(Token::LessEqual) => BinOp::LessOrEqual,
                Some(Token::Greater) => BinOp::Greater,
                Some(Token::GreaterEqual) => BinOp::GreaterOrEqual,
                _ => return Ok(expr),
            };
            let line = self.peek_line();
            self.pos += 1;
            let right = self.parse_term()?;
            expr = Self::binary(op, expr, right, line);
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Subtract,
                _ => return Ok(expr),
            };
            let line = self.peek_line();
            self.pos += 1;
            let right = self.parse_factor()?;
            expr = Self::binary(op, expr, right, line);
        }
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Multiply,
                Some(Token::Slash) => BinOp::Divide,
                Some(Token::Percent) => BinOp::Modulo,
                _ => return Ok(expr),
            };
            let line = self.peek_line();
            self.pos += 1;
            let right = self.parse_unary()?;
            expr = Self::binary(op, expr, right, line);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let line = self.peek_line();
        self.pos += 1;
        let operand = self.parse_unary()?;
        Ok(Located::new(ExprKind::Unary { op, operand: Box::new(operand) }, line))
    }

    /// Calls `f(a, b)` and indexing `l:i`, left to right.
    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let line = self.peek_line();
            if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                expr = Located::new(ExprKind::Call { callee: Box::new(expr), args }, line);
            } else if self.eat(&Token::Colon) {
                let index = self.parse_primary()?;
                expr = Located::new(ExprKind::Index { object: Box::new(expr), index: Box::new(index) }, line);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let line = self.peek_line();
        let kind = match self.advance() {
            Some(Token::Number(n)) => ExprKind::Number(n),
            Some(Token::Text(s)) => ExprKind::Text(s),
            Some(Token::True) => ExprKind::Bool(true),
            Some(Token::False) => ExprKind::Bool(false),
            Some(Token::Ident(name)) => ExprKind::Variable(name),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Some(Token::LBrace) => {
                let mut items = Vec::new();
                self.skip_newlines();
                if !self.eat(&Token::RBrace) {
                    loop {
                        items.push(self.parse_expr()?);
                        self.skip_newlines();
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                        self.skip_newlines();
                    }
                }
                ExprKind::List(items)
            }
            Some(tok) => {
                self.pos -= 1;
                return Err(self.error(format!("expected expression, got {:?}", tok)));
            }
            None => return Err(self.error("expected expression, got end of input".into())),
        };
        Ok(Located::new(kind, line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(source: &str) -> Program {
        crate::parse_source(source).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        match crate::parse_source(source) {
            Err(crate::Error::Parse(e)) => e,
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    fn single_expr(source: &str) -> Expr {
        let prog = parse_str(&format!("return {}", source));
        match &prog.body[0].node {
            StmtKind::Return(Some(e)) => e.clone(),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn parse_precedence_mul_over_add() {
        let e = single_expr("1 + 2 * 3");
        match &e.node {
            ExprKind::Binary { op: BinOp::Add, right, .. } => {
                assert!(matches!(right.node, ExprKind::Binary { op: BinOp::Multiply, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_left_associative_subtraction() {
        let e = single_expr("10 - 4 - 3");
        match &e.node {
            ExprKind::Binary { op: BinOp::Subtract, left, right } => {
                assert!(matches!(left.node, ExprKind::Binary { op: BinOp::Subtract, .. }));
                assert_eq!(right.node, ExprKind::Number(3.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_or_binds_looser_than_and() {
        let e = single_expr("a or b and c");
        match &e.node {
            ExprKind::Binary { op: BinOp::Or, right, .. } => {
                assert!(matches!(right.node, ExprKind::Binary { op: BinOp::And, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_comparison_below_equality() {
        let e = single_expr("a < b == c > d");
        assert!(matches!(e.node, ExprKind::Binary { op: BinOp::Equals, .. }));
    }

    #[test]
    fn parse_index_binds_to_primary() {
        let e = single_expr("l:i + 1");
        match &e.node {
            ExprKind::Binary { op: BinOp::Add, left, .. } => {
                assert!(matches!(left.node, ExprKind::Index { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_list_literal_and_index() {
        let e = single_expr("{1, 2, 3}:0");
        match &e.node {
            ExprKind::Index { object, index } => {
                assert!(matches!(&object.node, ExprKind::List(items) if items.len() == 3));
                assert_eq!(index.node, ExprKind::Number(0.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_inline_if_else() {
        let prog = parse_str("if true then x = 1 else x = 2 end");
        match &prog.body[0].node {
            StmtKind::If { then_branch, else_branch, .. } => {
                assert_eq!(then_branch.len(), 1);
                assert_eq!(else_branch.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_else_if_chain_shares_end() {
        let prog = parse_str("if a\n x = 1\nelse if b\n x = 2\nelse\n x = 3\nend\n");
        assert_eq!(prog.body.len(), 1);
        match &prog.body[0].node {
            StmtKind::If { else_branch, .. } => {
                assert!(matches!(else_branch[0].node, StmtKind::If { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_function_forms() {
        let prog = parse_str("fn add a, b\n  return a + b\nend\nfn sq(x) -> x * x\nsub show x -> y = x\n");
        assert_eq!(prog.body.len(), 3);
        match &prog.body[0].node {
            StmtKind::Func { name, params, body } => {
                assert_eq!(name, "add");
                assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&prog.body[1].node, StmtKind::Func { body, .. } if matches!(body[0].node, StmtKind::Return(Some(_)))));
        assert!(matches!(&prog.body[2].node, StmtKind::Sub { body, .. } if matches!(body[0].node, StmtKind::Assign { .. })));
    }

    #[test]
    fn parse_assignment_forms() {
        let prog = parse_str("x = 1\nx += 2\nl:0 = 9\nl:1 -= 1\n");
        assert!(matches!(prog.body[0].node, StmtKind::Assign { op: AssignOp::Assign, .. }));
        assert!(matches!(prog.body[1].node, StmtKind::Assign { op: AssignOp::Add, .. }));
        assert!(matches!(prog.body[2].node, StmtKind::AssignIndex { op: AssignOp::Assign, .. }));
        assert!(matches!(prog.body[3].node, StmtKind::AssignIndex { op: AssignOp::Subtract, .. }));
    }

    #[test]
    fn parse_call_statements() {
        let prog = parse_str("f(1, 2)\ng 1, 2\nh\nfs:0(3)\n");
        for stmt in &prog.body {
            assert!(matches!(&stmt.node, StmtKind::Expr(e) if matches!(e.node, ExprKind::Call { .. })), "{:?}", stmt);
        }
        match &prog.body[1].node {
            StmtKind::Expr(Located { node: ExprKind::Call { args, .. }, .. }) => assert_eq!(args.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_loops_and_control() {
        let prog = parse_str("while x > 0 do\n x -= 1\n if x == 2 then break end\n continue\nend\nfor v, {1, 2} do total += v end\n");
        assert!(matches!(prog.body[0].node, StmtKind::While { .. }));
        assert!(matches!(&prog.body[1].node, StmtKind::For { name, .. } if name == "v"));
    }

    #[test]
    fn parse_records_lines() {
        let prog = parse_str("x = 1\n\n\ny = 2\n");
        assert_eq!(prog.body[0].line, 1);
        assert_eq!(prog.body[1].line, 4);
    }

    #[test]
    fn parse_bare_return() {
        let prog = parse_str("sub s\n  return\nend\n");
        match &prog.body[0].node {
            StmtKind::Sub { body, .. } => assert_eq!(body[0].node, StmtKind::Return(None)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_missing_end_is_error() {
        let e = parse_err("while true\n x = 1\n");
        assert!(e.message.contains("End"), "{}", e.message);
    }

    #[test]
    fn parse_error_line() {
        let e = parse_err("x = 1\ny = )\n");
        assert_eq!(e.line, 2);
    }
}
