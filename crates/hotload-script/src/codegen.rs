//! Code generation: syntax tree → [`UnitImage`]s.
//!
//! One image is produced per declared unit, nested units included. Name
//! resolution happens here: simple unit names are resolved against the units
//! declared in the same source (innermost enclosing unit first), while dotted
//! names are emitted verbatim and linked by the loader at run time.

use std::collections::{BTreeSet, HashMap};

use hotload_types::name::{namespace, nested_name, simple_name};
use hotload_types::{
    Constant, Diagnostic, FieldImage, FunctionImage, Intrinsic, Op, Shape, UnitImage, Visibility,
};

use crate::ast::*;
use crate::lexer::Pos;

/// Qualified names declared by one source, used to resolve simple names.
struct Names {
    declared: BTreeSet<String>,
    top_level: Vec<String>,
}

impl Names {
    /// Resolve a unit name as written inside `scope` (outermost unit first).
    fn resolve(&self, text: &str, scope: &[String]) -> Option<String> {
        if text.contains('.') {
            return Some(text.to_string());
        }
        for enclosing in scope.iter().rev() {
            let candidate = nested_name(enclosing, text);
            if self.declared.contains(&candidate) {
                return Some(candidate);
            }
            if simple_name(enclosing) == text {
                return Some(enclosing.clone());
            }
        }
        self.top_level
            .iter()
            .find(|top| simple_name(top) == text)
            .cloned()
    }
}

#[derive(Default)]
struct ConstPool {
    constants: Vec<Constant>,
    index: HashMap<Constant, u32>,
}

impl ConstPool {
    fn intern(&mut self, constant: Constant) -> u32 {
        if let Some(idx) = self.index.get(&constant) {
            return *idx;
        }
        let idx = self.constants.len() as u32;
        self.constants.push(constant.clone());
        self.index.insert(constant, idx);
        idx
    }
}

/// Compiles the units of one source.
pub struct UnitCompiler<'a> {
    source: &'a str,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> UnitCompiler<'a> {
    /// `source` is the qualified name of the source unit being compiled; it
    /// provides the namespace for top-level units declared with a simple name.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, pos: Pos, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(self.source, message).at(pos.line, pos.col));
    }

    fn qualify_top_level(&self, name: &str) -> String {
        if name.contains('.') {
            return name.to_string();
        }
        match namespace(self.source) {
            Some(ns) => format!("{}.{}", ns, name),
            None => name.to_string(),
        }
    }

    pub fn compile(mut self, units: &[UnitDecl]) -> (Vec<UnitImage>, Vec<Diagnostic>) {
        let mut names = Names {
            declared: BTreeSet::new(),
            top_level: Vec::new(),
        };
        for unit in units {
            let qualified = self.qualify_top_level(&unit.name);
            names.top_level.push(qualified.clone());
            self.declare(unit, qualified, &mut names.declared);
        }

        if !names.top_level.iter().any(|n| n == self.source) {
            let pos = units.first().map(|u| u.pos).unwrap_or(Pos::new(1, 1));
            self.diagnostics.push(
                Diagnostic::warning(
                    self.source,
                    format!("source unit {} declares no unit named {}", self.source, self.source),
                )
                .at(pos.line, pos.col),
            );
        }

        let mut images = Vec::new();
        for (unit, qualified) in units.iter().zip(names.top_level.clone()) {
            self.gen_unit(unit, qualified, &[], &names, &mut images);
        }
        (images, self.diagnostics)
    }

    fn declare(&mut self, unit: &UnitDecl, qualified: String, declared: &mut BTreeSet<String>) {
        if !declared.insert(qualified.clone()) {
            self.error(unit.pos, format!("duplicate unit '{}'", qualified));
        }
        for nested in &unit.units {
            self.declare(nested, nested_name(&qualified, &nested.name), declared);
        }
    }

    fn resolve_type(&mut self, ty: &TypeRef, scope: &[String], names: &Names) -> Shape {
        match ty.text.as_str() {
            "int" => Shape::Int,
            "str" => Shape::Str,
            "bool" => Shape::Bool,
            other => match names.resolve(other, scope) {
                Some(qualified) => Shape::Unit(qualified),
                None => {
                    self.error(ty.pos, format!("unknown type '{}'", other));
                    Shape::Nil
                }
            },
        }
    }

    fn gen_unit(
        &mut self,
        decl: &UnitDecl,
        qualified: String,
        outer: &[String],
        names: &Names,
        images: &mut Vec<UnitImage>,
    ) {
        let mut scope = outer.to_vec();
        scope.push(qualified.clone());

        let mut image = UnitImage::new(qualified.clone());
        let mut pool = ConstPool::default();

        for field in &decl.fields {
            if image.field_index(&field.name).is_some() {
                self.error(field.pos, format!("duplicate field '{}'", field.name));
                continue;
            }
            let shape = self.resolve_type(&field.ty, &scope, names);
            let default = self.field_default(field, &shape);
            image.fields.push(FieldImage {
                name: field.name.clone(),
                shape,
                default,
            });
        }

        let field_names: BTreeSet<String> = image.fields.iter().map(|f| f.name.clone()).collect();
        let function_names: BTreeSet<String> =
            decl.functions.iter().map(|f| f.name.clone()).collect();

        let mut signatures = BTreeSet::new();
        for function in &decl.functions {
            let mut params = Vec::with_capacity(function.params.len());
            let mut param_names = BTreeSet::new();
            for param in &function.params {
                if !param_names.insert(param.name.as_str()) {
                    self.error(param.pos, format!("duplicate parameter '{}'", param.name));
                }
                params.push(self.resolve_type(&param.ty, &scope, names));
            }
            let returns = function
                .returns
                .as_ref()
                .map(|ty| self.resolve_type(ty, &scope, names));

            let ctx = FnContext {
                scope: &scope,
                names,
                field_names: &field_names,
                function_names: &function_names,
            };
            let mut body = FnGen::new(self.source, ctx, &mut pool);
            for param in &function.params {
                body.declare_local(&param.name, param.pos);
            }
            body.block(&function.body);
            body.constant(Constant::Nil);
            body.emit(Op::Return);
            let (code, locals, diagnostics) = body.finish();
            self.diagnostics.extend(diagnostics);

            let compiled = FunctionImage {
                name: function.name.clone(),
                visibility: if function.private {
                    Visibility::Private
                } else {
                    Visibility::Public
                },
                params,
                returns,
                locals,
                code,
            };
            if !signatures.insert((compiled.name.clone(), compiled.params.clone())) {
                self.error(function.pos, format!("duplicate operation {}", compiled.signature()));
                continue;
            }
            image.functions.push(compiled);
        }

        image.constants = pool.constants;
        images.push(image);

        for nested in &decl.units {
            let nested_qualified = nested_name(&qualified, &nested.name);
            self.gen_unit(nested, nested_qualified, &scope, names, images);
        }
    }

    fn field_default(&mut self, field: &FieldDecl, shape: &Shape) -> Constant {
        let Some(literal) = &field.default else {
            return match shape {
                Shape::Int => Constant::Int(0),
                Shape::Str => Constant::Str(String::new()),
                Shape::Bool => Constant::Bool(false),
                Shape::Nil | Shape::Unit(_) => Constant::Nil,
            };
        };
        let constant = literal_constant(literal);
        let fits = match (&constant, shape) {
            (Constant::Nil, Shape::Unit(_)) => true,
            (c, s) => &c.shape() == s,
        };
        if !fits {
            self.error(
                field.pos,
                format!("default for field '{}' does not match type {}", field.name, shape),
            );
        }
        constant
    }
}

fn literal_constant(literal: &Literal) -> Constant {
    match literal {
        Literal::Nil => Constant::Nil,
        Literal::Int(v) => Constant::Int(*v),
        Literal::Bool(b) => Constant::Bool(*b),
        Literal::Str(s) => Constant::Str(s.clone()),
    }
}

struct FnContext<'c> {
    scope: &'c [String],
    names: &'c Names,
    field_names: &'c BTreeSet<String>,
    function_names: &'c BTreeSet<String>,
}

/// Code generator for a single function body.
struct FnGen<'c> {
    source: &'c str,
    ctx: FnContext<'c>,
    pool: &'c mut ConstPool,
    code: Vec<Op>,
    /// Lexical scopes, innermost last. Slots are never reused.
    scopes: Vec<Vec<(String, u16)>>,
    next_slot: u32,
    diagnostics: Vec<Diagnostic>,
}

impl<'c> FnGen<'c> {
    fn new(source: &'c str, ctx: FnContext<'c>, pool: &'c mut ConstPool) -> Self {
        Self {
            source,
            ctx,
            pool,
            code: Vec::new(),
            scopes: vec![Vec::new()],
            next_slot: 0,
            diagnostics: Vec::new(),
        }
    }

    fn finish(self) -> (Vec<Op>, u16, Vec<Diagnostic>) {
        let locals = u16::try_from(self.next_slot).unwrap_or(u16::MAX);
        (self.code, locals, self.diagnostics)
    }

    fn error(&mut self, pos: Pos, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(self.source, message).at(pos.line, pos.col));
    }

    fn warning(&mut self, pos: Pos, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(self.source, message).at(pos.line, pos.col));
    }

    fn emit(&mut self, op: Op) -> usize {
        self.code.push(op);
        self.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    fn patch(&mut self, at: usize) {
        let target = self.here();
        match &mut self.code[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) => *t = target,
            _ => {}
        }
    }

    fn constant(&mut self, constant: Constant) {
        let idx = self.pool.intern(constant);
        self.emit(Op::Const(idx));
    }

    fn declare_local(&mut self, name: &str, pos: Pos) -> u16 {
        let Ok(slot) = u16::try_from(self.next_slot) else {
            self.error(pos, "too many local variables");
            return 0;
        };
        self.next_slot += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), slot));
        }
        slot
    }

    fn lookup_local(&self, name: &str) -> Option<u16> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self, stmts: &[Stmt]) {
        self.scopes.push(Vec::new());
        let mut returned = false;
        let mut warned = false;
        for stmt in stmts {
            if returned && !warned {
                self.warning(stmt.pos(), "unreachable statement");
                warned = true;
            }
            self.stmt(stmt);
            if matches!(stmt, Stmt::Return { .. }) {
                returned = true;
            }
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, pos } => {
                self.expr(value);
                let slot = self.declare_local(name, *pos);
                self.emit(Op::StoreLocal(slot));
            }
            Stmt::Assign { target, value, pos } => match target {
                Expr::Var(name, _) => {
                    if let Some(slot) = self.lookup_local(name) {
                        self.expr(value);
                        self.emit(Op::StoreLocal(slot));
                    } else if self.ctx.field_names.contains(name) {
                        self.emit(Op::LoadSelf);
                        self.expr(value);
                        self.emit(Op::SetField(name.clone()));
                    } else {
                        self.error(*pos, format!("assignment to undeclared variable '{}'", name));
                    }
                }
                Expr::Field { object, name, .. } => {
                    self.expr(object);
                    self.expr(value);
                    self.emit(Op::SetField(name.clone()));
                }
                _ => self.error(*pos, "invalid assignment target"),
            },
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.expr(cond);
                let to_else = self.emit(Op::JumpIfFalse(0));
                self.block(then_block);
                match else_block {
                    Some(else_block) => {
                        let to_end = self.emit(Op::Jump(0));
                        self.patch(to_else);
                        self.block(else_block);
                        self.patch(to_end);
                    }
                    None => self.patch(to_else),
                }
            }
            Stmt::While { cond, body, .. } => {
                let start = self.here();
                self.expr(cond);
                let to_end = self.emit(Op::JumpIfFalse(0));
                self.block(body);
                self.emit(Op::Jump(start));
                self.patch(to_end);
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(value) => self.expr(value),
                    None => self.constant(Constant::Nil),
                }
                self.emit(Op::Return);
            }
            Stmt::Expr(expr) => {
                self.expr(expr);
                self.emit(Op::Pop);
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn args(&mut self, args: &[Expr]) -> u8 {
        for arg in args {
            self.expr(arg);
        }
        // The parser caps argument lists at u8::MAX.
        args.len() as u8
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(literal, _) => self.constant(literal_constant(literal)),
            Expr::Var(name, pos) => {
                if let Some(slot) = self.lookup_local(name) {
                    self.emit(Op::LoadLocal(slot));
                } else if self.ctx.field_names.contains(name) {
                    self.emit(Op::LoadSelf);
                    self.emit(Op::GetField(name.clone()));
                } else {
                    self.error(*pos, format!("undefined variable '{}'", name));
                    self.constant(Constant::Nil);
                }
            }
            Expr::SelfRef(_) => {
                self.emit(Op::LoadSelf);
            }
            Expr::Field { object, name, .. } => {
                self.expr(object);
                self.emit(Op::GetField(name.clone()));
            }
            Expr::Call {
                receiver: Some(receiver),
                name,
                args,
                ..
            } => {
                self.expr(receiver);
                let argc = self.args(args);
                self.emit(Op::Call {
                    member: name.clone(),
                    argc,
                });
            }
            Expr::Call {
                receiver: None,
                name,
                args,
                pos,
            } => {
                if self.ctx.function_names.contains(name) {
                    self.emit(Op::LoadSelf);
                    let argc = self.args(args);
                    self.emit(Op::Call {
                        member: name.clone(),
                        argc,
                    });
                } else if let Some(intrinsic) = Intrinsic::from_name(name) {
                    let argc = self.args(args);
                    if argc != intrinsic.arity() {
                        self.error(
                            *pos,
                            format!("{}() takes {} argument(s), got {}", intrinsic, intrinsic.arity(), argc),
                        );
                    }
                    self.emit(Op::Intrinsic { intrinsic, argc });
                } else {
                    self.error(*pos, format!("undefined operation '{}'", name));
                    self.constant(Constant::Nil);
                }
            }
            Expr::New { unit, args, pos } => {
                let resolved = self.ctx.names.resolve(unit, self.ctx.scope);
                let argc = self.args(args);
                match resolved {
                    Some(qualified) => {
                        self.emit(Op::New {
                            unit: qualified,
                            argc,
                        });
                    }
                    None => {
                        self.error(*pos, format!("unknown type '{}'", unit));
                        self.constant(Constant::Nil);
                    }
                }
            }
            Expr::Binary { .. } => self.binary_chain(expr),
            Expr::Unary { op, operand, .. } => {
                self.expr(operand);
                self.emit(match op {
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Neg => Op::Neg,
                });
            }
        }
    }

    /// Lowers `a op b op c ...` with a loop over the left spine, so long
    /// chains do not recurse once per operator.
    fn binary_chain(&mut self, expr: &Expr) {
        let mut links = Vec::new();
        let mut leftmost = expr;
        while let Expr::Binary { op, lhs, rhs, .. } = leftmost {
            links.push((*op, rhs.as_ref()));
            leftmost = lhs.as_ref();
        }
        self.expr(leftmost);
        for (op, rhs) in links.into_iter().rev() {
            self.binary_rhs(op, rhs);
        }
    }

    /// Applies `op` to the value on the stack and `rhs`.
    fn binary_rhs(&mut self, op: BinOp, rhs: &Expr) {
        let op = match op {
            BinOp::And => {
                let to_false = self.emit(Op::JumpIfFalse(0));
                self.expr(rhs);
                let to_end = self.emit(Op::Jump(0));
                self.patch(to_false);
                self.constant(Constant::Bool(false));
                self.patch(to_end);
                return;
            }
            BinOp::Or => {
                let to_rhs = self.emit(Op::JumpIfFalse(0));
                self.constant(Constant::Bool(true));
                let to_end = self.emit(Op::Jump(0));
                self.patch(to_rhs);
                self.expr(rhs);
                self.patch(to_end);
                return;
            }
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Rem => Op::Rem,
            BinOp::Eq => Op::Eq,
            BinOp::Ne => Op::Ne,
            BinOp::Lt => Op::Lt,
            BinOp::Le => Op::Le,
            BinOp::Gt => Op::Gt,
            BinOp::Ge => Op::Ge,
        };
        self.expr(rhs);
        self.emit(op);
    }
}
