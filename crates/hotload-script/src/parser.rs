//! Recursive-descent parser for unit script.
//!
//! The parser keeps going after an error so that one compilation reports
//! every independent syntax problem. Statement-level errors resynchronize at
//! the next `;` (or the `}` closing the block); member-level errors
//! resynchronize at the next `fn`, `private`, `field` or `unit` keyword.
//!
//! Nesting (units, blocks, parentheses, unary operators, member chains) is
//! capped at [`MAX_NESTING`] levels and reported as an error past that.
//! Left-associative operator chains are parsed in a loop and do not count.

use crate::ast::*;
use crate::lexer::{Pos, Spanned, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub pos: Pos,
    pub message: String,
}

/// Marker for "an error was recorded, unwind to the nearest recovery point".
struct Abort;

type PResult<T> = Result<T, Abort>;

const MAX_ARGS: usize = u8::MAX as usize;

/// Deepest syntactic nesting accepted before an error is reported.
pub const MAX_NESTING: usize = 128;

pub struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    errors: Vec<ParseError>,
    depth: usize,
}

/// Parse a token stream (as produced by [`crate::lexer::Lexer::tokenize`])
/// into top-level unit declarations.
pub fn parse(tokens: Vec<Spanned>) -> (Vec<UnitDecl>, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    let units = parser.parse_file();
    (units, parser.errors)
}

impl Parser {
    pub fn new(mut tokens: Vec<Spanned>) -> Self {
        if tokens.last().map(|t| &t.token) != Some(&Token::Eof) {
            let pos = tokens.last().map(|t| t.pos).unwrap_or_default();
            tokens.push(Spanned {
                token: Token::Eof,
                pos,
            });
        }
        Parser {
            tokens,
            cursor: 0,
            errors: Vec::new(),
            depth: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.cursor].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.cursor + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn here(&self) -> Pos {
        self.tokens[self.cursor].pos
    }

    fn bump(&mut self) -> Spanned {
        let token = self.tokens[self.cursor].clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error<T>(&mut self, message: String) -> PResult<T> {
        let pos = self.here();
        self.errors.push(ParseError { pos, message });
        Err(Abort)
    }

    fn expect(&mut self, token: Token) -> PResult<Pos> {
        if self.check(&token) {
            Ok(self.bump().pos)
        } else {
            let found = self.peek().to_string();
            self.error(format!("expected {}, found {}", token, found))
        }
    }

    fn expect_ident(&mut self, context: &str) -> PResult<(String, Pos)> {
        if let Token::Ident(name) = self.peek() {
            let name = name.clone();
            let pos = self.bump().pos;
            Ok((name, pos))
        } else {
            let found = self.peek().to_string();
            self.error(format!("expected identifier {}, found {}", context, found))
        }
    }

    fn qualified_name(&mut self, context: &str) -> PResult<(String, Pos)> {
        let (mut name, pos) = self.expect_ident(context)?;
        while self.check(&Token::Dot) && matches!(self.peek_at(1), Token::Ident(_)) {
            self.bump();
            let (segment, _) = self.expect_ident(context)?;
            name.push('.');
            name.push_str(&segment);
        }
        Ok((name, pos))
    }

    // ------------------------------------------------------------------
    // Nesting
    // ------------------------------------------------------------------

    fn too_deep<T>(&mut self, what: &str) -> PResult<T> {
        self.error(format!("{} nested too deeply (limit {})", what, MAX_NESTING))
    }

    /// Runs `parse` one level deeper.
    fn nested<T>(&mut self, what: &str, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return self.too_deep(what);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Reports a body that would exceed [`MAX_NESTING`] and skips past its
    /// closing brace. The opening brace has already been consumed.
    fn skip_deep_body(&mut self, what: &str) {
        let _ = self.too_deep::<()>(what);
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::RBrace if depth == 0 => {
                    self.bump();
                    return;
                }
                Token::LBrace => depth += 1,
                Token::RBrace => depth -= 1,
                _ => {}
            }
            self.bump();
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    fn recover_statement(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::Semi if depth == 0 => {
                    self.bump();
                    return;
                }
                Token::RBrace if depth == 0 => return,
                Token::LBrace => depth += 1,
                Token::RBrace => depth -= 1,
                _ => {}
            }
            self.bump();
        }
    }

    fn recover_member(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::Fn | Token::Private | Token::Field | Token::Unit if depth == 0 => return,
                Token::RBrace if depth == 0 => return,
                Token::LBrace => depth += 1,
                Token::RBrace => depth -= 1,
                _ => {}
            }
            self.bump();
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn parse_file(&mut self) -> Vec<UnitDecl> {
        let mut units = Vec::new();
        while !self.check(&Token::Eof) {
            if self.check(&Token::Unit) {
                if let Ok(unit) = self.parse_unit(true) {
                    units.push(unit);
                }
                continue;
            }
            let found = self.peek().to_string();
            let _ = self.error::<()>(format!("expected 'unit', found {}", found));
            while !self.check(&Token::Eof) && !self.check(&Token::Unit) {
                self.bump();
            }
        }
        units
    }

    fn parse_unit(&mut self, top_level: bool) -> PResult<UnitDecl> {
        let pos = self.expect(Token::Unit)?;
        let (name, name_pos) = self.qualified_name("after 'unit'")?;
        if !top_level && name.contains('.') {
            self.errors.push(ParseError {
                pos: name_pos,
                message: format!("nested unit name '{}' must be a simple identifier", name),
            });
        }
        self.expect(Token::LBrace)?;

        let mut unit = UnitDecl {
            name,
            pos,
            fields: Vec::new(),
            functions: Vec::new(),
            units: Vec::new(),
        };
        if self.depth >= MAX_NESTING {
            self.skip_deep_body("unit");
            return Ok(unit);
        }
        self.nested("unit", |p| p.parse_members(&mut unit))?;
        self.expect(Token::RBrace)?;
        Ok(unit)
    }

    fn parse_members(&mut self, unit: &mut UnitDecl) -> PResult<()> {
        loop {
            let result = match self.peek() {
                Token::RBrace => break,
                Token::Eof => {
                    let name = unit.name.clone();
                    return self.error(format!("expected '}}' to close unit {}, found end of input", name));
                }
                Token::Field => self.parse_field().map(|f| unit.fields.push(f)),
                Token::Fn | Token::Private => self.parse_fn().map(|f| unit.functions.push(f)),
                Token::Unit => self.parse_unit(false).map(|u| unit.units.push(u)),
                other => {
                    let found = other.to_string();
                    self.error(format!(
                        "expected 'field', 'fn', 'private' or 'unit', found {}",
                        found
                    ))
                }
            };
            if result.is_err() {
                self.recover_member();
            }
        }
        Ok(())
    }

    fn parse_type(&mut self) -> PResult<TypeRef> {
        let (text, pos) = self.qualified_name("for type")?;
        Ok(TypeRef { text, pos })
    }

    fn parse_field(&mut self) -> PResult<FieldDecl> {
        let pos = self.expect(Token::Field)?;
        let (name, _) = self.expect_ident("after 'field'")?;
        self.expect(Token::Colon)?;
        let ty = self.parse_type()?;
        let default = if self.eat(&Token::Assign) {
            Some(self.parse_literal()?)
        } else {
            None
        };
        self.expect(Token::Semi)?;
        Ok(FieldDecl {
            name,
            ty,
            default,
            pos,
        })
    }

    fn parse_literal(&mut self) -> PResult<Literal> {
        let literal = match self.peek().clone() {
            Token::Int(v) => Literal::Int(v),
            Token::Minus => {
                self.bump();
                match self.peek().clone() {
                    Token::Int(v) => Literal::Int(-v),
                    other => return self.error(format!("expected integer after '-', found {}", other)),
                }
            }
            Token::Str(s) => Literal::Str(s),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Nil => Literal::Nil,
            other => return self.error(format!("expected literal, found {}", other)),
        };
        self.bump();
        Ok(literal)
    }

    fn parse_fn(&mut self) -> PResult<FnDecl> {
        let pos = self.here();
        let private = self.eat(&Token::Private);
        self.expect(Token::Fn)?;
        let (name, _) = self.expect_ident("after 'fn'")?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let (pname, ppos) = self.expect_ident("for parameter name")?;
                self.expect(Token::Colon)?;
                let ty = self.parse_type()?;
                params.push(Param {
                    name: pname,
                    ty,
                    pos: ppos,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        if params.len() > MAX_ARGS {
            return self.error(format!("fn {} declares more than {} parameters", name, MAX_ARGS));
        }
        let returns = if self.eat(&Token::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(FnDecl {
            name,
            private,
            params,
            returns,
            body,
            pos,
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace)?;
        if self.depth >= MAX_NESTING {
            self.skip_deep_body("block");
            return Ok(Vec::new());
        }
        let stmts = self.nested("block", Self::parse_stmts)?;
        self.expect(Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmts(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Token::RBrace => break,
                Token::Eof => return self.error("expected '}', found end of input".to_string()),
                _ => match self.parse_stmt() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(Abort) => self.recover_statement(),
                },
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        match self.peek() {
            Token::Let => {
                self.bump();
                let (name, _) = self.expect_ident("after 'let'")?;
                self.expect(Token::Assign)?;
                let value = self.parse_expr()?;
                self.expect(Token::Semi)?;
                Ok(Stmt::Let { name, value, pos })
            }
            Token::If => self.parse_if(),
            Token::While => {
                self.bump();
                self.expect(Token::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body, pos })
            }
            Token::Return => {
                self.bump();
                let value = if self.check(&Token::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(Token::Semi)?;
                Ok(Stmt::Return { value, pos })
            }
            _ => {
                let expr = self.parse_expr()?;
                if self.eat(&Token::Assign) {
                    if !matches!(expr, Expr::Var(..) | Expr::Field { .. }) {
                        return self.error("invalid assignment target".to_string());
                    }
                    let value = self.parse_expr()?;
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Assign {
                        target: expr,
                        value,
                        pos,
                    })
                } else {
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Expr(expr))
                }
            }
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let pos = self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                Some(vec![self.nested("statement", Self::parse_if)?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            pos,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.nested("expression", |p| p.parse_binary(0))
    }

    fn binary_op(token: &Token) -> Option<(BinOp, u8)> {
        Some(match token {
            Token::OrOr => (BinOp::Or, 0),
            Token::AndAnd => (BinOp::And, 1),
            Token::EqEq => (BinOp::Eq, 2),
            Token::NotEq => (BinOp::Ne, 2),
            Token::Lt => (BinOp::Lt, 3),
            Token::Le => (BinOp::Le, 3),
            Token::Gt => (BinOp::Gt, 3),
            Token::Ge => (BinOp::Ge, 3),
            Token::Plus => (BinOp::Add, 4),
            Token::Minus => (BinOp::Sub, 4),
            Token::Star => (BinOp::Mul, 5),
            Token::Slash => (BinOp::Div, 5),
            Token::Percent => (BinOp::Rem, 5),
            _ => return None,
        })
    }

    /// Precedence climbing; all binary operators are left-associative.
    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = Self::binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            let pos = self.bump().pos;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        let pos = self.bump().pos;
        let operand = self.nested("expression", Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            pos,
        })
    }

    /// Each `.member` link nests the receiver one level deeper.
    fn parse_postfix(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let result = self.parse_member_chain();
        self.depth = base;
        result
    }

    fn parse_member_chain(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        while self.check(&Token::Dot) {
            if self.depth >= MAX_NESTING {
                return self.too_deep("expression");
            }
            self.depth += 1;
            let pos = self.bump().pos;
            let (name, _) = self.expect_ident("after '.'")?;
            if self.check(&Token::LParen) {
                let args = self.parse_args()?;
                expr = Expr::Call {
                    receiver: Some(Box::new(expr)),
                    name,
                    args,
                    pos,
                };
            } else {
                expr = Expr::Field {
                    object: Box::new(expr),
                    name,
                    pos,
                };
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let pos = self.here();
        let expr = match self.peek().clone() {
            Token::Int(v) => Expr::Literal(Literal::Int(v), pos),
            Token::Str(s) => Expr::Literal(Literal::Str(s), pos),
            Token::True => Expr::Literal(Literal::Bool(true), pos),
            Token::False => Expr::Literal(Literal::Bool(false), pos),
            Token::Nil => Expr::Literal(Literal::Nil, pos),
            Token::SelfKw => Expr::SelfRef(pos),
            Token::Ident(name) => {
                self.bump();
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::Call {
                        receiver: None,
                        name,
                        args,
                        pos,
                    });
                }
                return Ok(Expr::Var(name, pos));
            }
            Token::New => {
                self.bump();
                let (unit, _) = self.qualified_name("after 'new'")?;
                let args = self.parse_args()?;
                return Ok(Expr::New { unit, args, pos });
            }
            Token::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            other => return self.error(format!("expected expression, found {}", other)),
        };
        self.bump();
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        if args.len() > MAX_ARGS {
            return self.error(format!("call passes more than {} arguments", MAX_ARGS));
        }
        Ok(args)
    }
}
