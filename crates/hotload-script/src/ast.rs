//! Syntax tree for unit script.

use std::mem;

use crate::lexer::Pos;

#[derive(Debug, Clone, PartialEq)]
pub struct UnitDecl {
    /// Name as written; may be dotted for top-level units.
    pub name: String,
    pub pos: Pos,
    pub fields: Vec<FieldDecl>,
    pub functions: Vec<FnDecl>,
    pub units: Vec<UnitDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub text: String,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Literal>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub private: bool,
    pub params: Vec<Param>,
    pub returns: Option<TypeRef>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Int(i64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal, Pos),
    Var(String, Pos),
    SelfRef(Pos),
    Field {
        object: Box<Expr>,
        name: String,
        pos: Pos,
    },
    /// `receiver.name(args)`, or `name(args)` when `receiver` is `None`.
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
        pos: Pos,
    },
    New {
        unit: String,
        args: Vec<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        pos: Pos,
    },
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Literal(_, pos) | Expr::Var(_, pos) | Expr::SelfRef(pos) => *pos,
            Expr::Field { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::New { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Unary { pos, .. } => *pos,
        }
    }

    /// Moves every boxed or listed child expression into `out`, leaving
    /// leaves in their place.
    fn take_children(&mut self, out: &mut Vec<Expr>) {
        let leaf = |pos: Pos| Expr::SelfRef(pos);
        match self {
            Expr::Literal(..) | Expr::Var(..) | Expr::SelfRef(_) => {}
            Expr::Field { object, pos, .. } => out.push(mem::replace(object.as_mut(), leaf(*pos))),
            Expr::Call {
                receiver, args, pos, ..
            } => {
                if let Some(receiver) = receiver {
                    out.push(mem::replace(receiver.as_mut(), leaf(*pos)));
                }
                out.append(args);
            }
            Expr::New { args, .. } => out.append(args),
            Expr::Binary { lhs, rhs, pos, .. } => {
                out.push(mem::replace(lhs.as_mut(), leaf(*pos)));
                out.push(mem::replace(rhs.as_mut(), leaf(*pos)));
            }
            Expr::Unary { operand, pos, .. } => out.push(mem::replace(operand.as_mut(), leaf(*pos))),
        }
    }
}

// Operator chains nest once per operator; dropping them recursively would
// use one stack frame per link.
impl Drop for Expr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(mut expr) = pending.pop() {
            expr.take_children(&mut pending);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
        pos: Pos,
    },
    Assign {
        target: Expr,
        value: Expr,
        pos: Pos,
    },
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
        pos: Pos,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        pos: Pos,
    },
    Return {
        value: Option<Expr>,
        pos: Pos,
    },
    Expr(Expr),
}

impl Stmt {
    pub fn pos(&self) -> Pos {
        match self {
            Stmt::Let { pos, .. }
            | Stmt::Assign { pos, .. }
            | Stmt::If { pos, .. }
            | Stmt::While { pos, .. }
            | Stmt::Return { pos, .. } => *pos,
            Stmt::Expr(expr) => expr.pos(),
        }
    }
}
