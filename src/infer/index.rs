use std::collections::HashMap;

use crate::parser::ast::*;
use crate::resolve::SymbolTable;
use crate::resolve::scope::SymbolId;
use crate::span::Spanned;

/// Lookup from node id to expression, plus the enclosing definitions of
/// each expression.
pub struct ExprIndex<'m> {
    pub nodes: HashMap<NodeId, &'m Spanned<Expr>>,
    /// Innermost function or method around an expression.
    pub function: HashMap<NodeId, SymbolId>,
    /// Class whose body (or method) contains an expression.
    pub class: HashMap<NodeId, SymbolId>,
    /// Node ids in source order.
    pub order: Vec<NodeId>,
}

impl<'m> ExprIndex<'m> {
    pub fn build(module: &'m Module, table: &SymbolTable) -> Self {
        let mut index = ExprIndex {
            nodes: HashMap::new(),
            function: HashMap::new(),
            class: HashMap::new(),
            order: Vec::new(),
        };
        index.stmts(&module.body, table, None, None);
        index
    }

    pub fn get(&self, id: NodeId) -> Option<&'m Spanned<Expr>> {
        self.nodes.get(&id).copied()
    }

    fn stmts(&mut self, body: &'m [Spanned<Stmt>], t: &SymbolTable, func: Option<SymbolId>, class: Option<SymbolId>) {
        for stmt in body {
            self.stmt(stmt, t, func, class);
        }
    }

    fn stmt(&mut self, stmt: &'m Spanned<Stmt>, t: &SymbolTable, func: Option<SymbolId>, class: Option<SymbolId>) {
        match &stmt.node {
            Stmt::Expr(e) | Stmt::Del(e) => self.expr(e, func, class),
            Stmt::Assign { target, value, .. } => {
                if let Some(v) = value {
                    self.expr(v, func, class);
                }
                self.expr(target, func, class);
            }
            Stmt::AugAssign { target, value, .. } => {
                self.expr(value, func, class);
                self.expr(target, func, class);
            }
            Stmt::Return(v) | Stmt::Raise(v) => {
                if let Some(v) = v {
                    self.expr(v, func, class);
                }
            }
            Stmt::If { condition, then_body, else_body } => {
                self.expr(condition, func, class);
                self.stmts(then_body, t, func, class);
                self.stmts(else_body, t, func, class);
            }
            Stmt::While { condition, body } => {
                self.expr(condition, func, class);
                self.stmts(body, t, func, class);
            }
            Stmt::For { target, iterable, body } => {
                self.expr(iterable, func, class);
                self.expr(target, func, class);
                self.stmts(body, t, func, class);
            }
            Stmt::With { context, body, .. } => {
                self.expr(context, func, class);
                self.stmts(body, t, func, class);
            }
            Stmt::FunctionDef(f) => {
                let sym = t.defs.get(&f.name.span).copied();
                for p in &f.params {
                    if let Some(d) = &p.default {
                        self.expr(d, func, class);
                    }
                }
                self.stmts(&f.body, t, sym, class);
            }
            Stmt::ClassDef(c) => {
                let sym = t.defs.get(&c.name.span).copied();
                self.stmts(&c.body, t, None, sym);
            }
            Stmt::Pass | Stmt::Break | Stmt::Continue | Stmt::Import { .. } | Stmt::FromImport { .. } => {}
        }
    }

    fn expr(&mut self, e: &'m Spanned<Expr>, func: Option<SymbolId>, class: Option<SymbolId>) {
        let id = e.node.id;
        self.nodes.insert(id, e);
        self.order.push(id);
        if let Some(f) = func {
            self.function.insert(id, f);
        }
        if let Some(c) = class {
            self.class.insert(id, c);
        }
        match &e.node.kind {
            ExprKind::Attribute { value, .. } => self.expr(value, func, class),
            ExprKind::Call { func: callee, args } => {
                self.expr(callee, func, class);
                for a in args {
                    self.expr(a, func, class);
                }
            }
            ExprKind::BinOp { left, right, .. }
            | ExprKind::BoolOp { left, right, .. }
            | ExprKind::Compare { left, right, .. } => {
                self.expr(left, func, class);
                self.expr(right, func, class);
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand, func, class),
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for i in items {
                    self.expr(i, func, class);
                }
            }
            ExprKind::Dict(entries) => {
                for (k, v) in entries {
                    self.expr(k, func, class);
                    self.expr(v, func, class);
                }
            }
            ExprKind::Subscript { value, index } => {
                self.expr(value, func, class);
                self.expr(index, func, class);
            }
            _ => {}
        }
    }
}
