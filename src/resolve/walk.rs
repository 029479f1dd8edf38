use std::collections::HashMap;

use indexmap::IndexMap;

use crate::diagnostics::CompileError;
use crate::parser::ast::*;
use crate::resolve::builtins::{is_runtime_module, Builtin};
use crate::resolve::evidence::{AttrSite, AttrUse, Evidence, MutationSite, Side};
use crate::resolve::scope::{Scope, ScopeId, ScopeKind, Symbol, SymbolId, SymbolKind};
use crate::resolve::{BaseRef, ClassInfo, ExportKind, ExternalCall, FunctionInfo, Interfaces, SymbolTable};
use crate::span::{Span, Spanned};
use crate::types::Type;

enum PendingCall {
    Function { func: SymbolId, call: NodeId, args: Vec<NodeId> },
    Class { class: SymbolId, call: NodeId, args: Vec<NodeId> },
}

pub(crate) struct Resolver<'a> {
    table: SymbolTable,
    interfaces: &'a Interfaces,
    /// Name scope currently in effect (module, class, function or entry).
    scope: ScopeId,
    /// Innermost block, for declaration placement.
    block: ScopeId,
    function: Option<SymbolId>,
    class: Option<SymbolId>,
    pending: Vec<PendingCall>,
    builtin_syms: HashMap<String, SymbolId>,
    /// Module of an unresolvable `from m import *`; unknown names fall back to it.
    wildcard: Option<String>,
    module_assignments: HashMap<String, usize>,
}

const MUTATORS: &[&str] = &["append", "add", "insert", "setdefault"];

impl<'a> Resolver<'a> {
    pub(crate) fn new(module: &Module, interfaces: &'a Interfaces) -> Self {
        let table = SymbolTable {
            module: module.name.clone(),
            symbols: Vec::new(),
            scopes: vec![Scope { kind: ScopeKind::Module, parent: None, names: IndexMap::new() }],
            bindings: HashMap::new(),
            classes: IndexMap::new(),
            functions: IndexMap::new(),
            defs: HashMap::new(),
            attr_sites: Vec::new(),
            mutation_sites: Vec::new(),
            external_calls: Vec::new(),
            constants: Vec::new(),
            entry: None,
            nullable: Default::default(),
            parents: IndexMap::new(),
            imported_modules: Vec::new(),
        };
        Self {
            table,
            interfaces,
            scope: ScopeId(0),
            block: ScopeId(0),
            function: None,
            class: None,
            pending: Vec::new(),
            builtin_syms: HashMap::new(),
            wildcard: None,
            module_assignments: HashMap::new(),
        }
    }

    pub(crate) fn run(mut self, module: &Module) -> Result<SymbolTable, CompileError> {
        self.declare_module(&module.body)?;
        self.resolve_bases(&module.body)?;
        self.collect_fields(&module.body);
        self.collect_parents();
        for stmt in &module.body {
            self.walk_module_stmt(stmt)?;
        }
        self.apply_pending_calls();
        self.collect_constants(&module.body);
        Ok(self.table)
    }

    // ---- declaration pass -------------------------------------------------

    fn new_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.table.scopes.len() as u32);
        self.table.scopes.push(Scope { kind, parent, names: IndexMap::new() });
        id
    }

    fn new_symbol(&mut self, name: &str, kind: SymbolKind, scope: ScopeId, span: Span) -> SymbolId {
        let id = SymbolId(self.table.symbols.len() as u32);
        self.table.symbols.push(Symbol::new(id, name, kind, scope, span));
        id
    }

    fn declare(&mut self, name: &str, kind: SymbolKind, scope: ScopeId, span: Span) -> SymbolId {
        if let Some(existing) = self.table.scopes[scope.0 as usize].names.get(name) {
            return *existing;
        }
        let id = self.new_symbol(name, kind, scope, span);
        self.table.scopes[scope.0 as usize].names.insert(name.to_string(), id);
        id
    }

    fn declare_module(&mut self, body: &[Spanned<Stmt>]) -> Result<(), CompileError> {
        let module_scope = ScopeId(0);
        for stmt in body {
            match &stmt.node {
                Stmt::FunctionDef(f) => {
                    let id = self.declare(&f.name.node, SymbolKind::Function, module_scope, f.name.span);
                    self.table.defs.insert(f.name.span, id);
                }
                Stmt::ClassDef(c) => self.declare_class(c)?,
                Stmt::Import { path, alias } => {
                    let full = dotted(path);
                    if is_runtime_module(&full) {
                        continue;
                    }
                    let bound = match alias {
                        Some(a) => a.clone(),
                        None => path[0].clone(),
                    };
                    let target = if alias.is_some() { full.clone() } else { path[0].node.clone() };
                    let id = self.declare(&bound.node, SymbolKind::Module, module_scope, bound.span);
                    self.table.symbol_mut(id).origin = Some((target, String::new()));
                    self.table.imported_modules.push(full);
                }
                Stmt::FromImport { module, names } => {
                    let from = dotted(module);
                    if is_runtime_module(&from) {
                        for (name, alias) in names {
                            if name.node != "*" {
                                let bound = alias.as_ref().unwrap_or(name);
                                let id = self.declare(&bound.node, SymbolKind::Module, module_scope, bound.span);
                                self.table.symbol_mut(id).origin = Some((from.clone(), name.node.clone()));
                            }
                        }
                        continue;
                    }
                    if !self.table.imported_modules.contains(&from) {
                        self.table.imported_modules.push(from.clone());
                    }
                    for (name, alias) in names {
                        if name.node == "*" {
                            match self.interfaces.get(&from) {
                                Some(iface) => {
                                    let exports: Vec<String> = iface.exports.keys().cloned().collect();
                                    for export in exports {
                                        let id = self.declare(&export, SymbolKind::Imported, module_scope, name.span);
                                        self.table.symbol_mut(id).origin = Some((from.clone(), export));
                                    }
                                }
                                None => self.wildcard = Some(from.clone()),
                            }
                            continue;
                        }
                        let bound = alias.as_ref().unwrap_or(name);
                        let id = self.declare(&bound.node, SymbolKind::Imported, module_scope, bound.span);
                        self.table.symbol_mut(id).origin = Some((from.clone(), name.node.clone()));
                    }
                }
                Stmt::If { condition, then_body, else_body } if is_main_guard(condition) => {
                    let entry = self.new_scope(ScopeKind::Entry, Some(module_scope));
                    self.table.entry = Some((entry, stmt.span));
                    for (name, span) in assigned_names(then_body) {
                        if !self.table.scopes[0].names.contains_key(&name) {
                            self.declare(&name, SymbolKind::Variable, entry, span);
                        }
                    }
                    self.declare_module_names(else_body);
                }
                _ => self.declare_module_names(std::slice::from_ref(stmt)),
            }
        }
        Ok(())
    }

    fn declare_module_names(&mut self, body: &[Spanned<Stmt>]) {
        for (name, span) in assigned_names(body) {
            *self.module_assignments.entry(name.clone()).or_insert(0) += 1;
            self.declare(&name, SymbolKind::Variable, ScopeId(0), span);
        }
    }

    fn declare_class(&mut self, c: &ClassDef) -> Result<(), CompileError> {
        let id = self.declare(&c.name.node, SymbolKind::Class, ScopeId(0), c.name.span);
        self.table.defs.insert(c.name.span, id);
        let scope = self.new_scope(ScopeKind::Class(id), Some(ScopeId(0)));
        let qualified = format!("{}.{}", self.table.module, c.name.node);
        self.table.symbol_mut(id).ty = Type::class(qualified.clone());
        let mut methods = IndexMap::new();
        for stmt in &c.body {
            match &stmt.node {
                Stmt::FunctionDef(f) => {
                    let m = self.declare(&f.name.node, SymbolKind::Method, scope, f.name.span);
                    self.table.symbol_mut(m).owner = Some(id);
                    self.table.defs.insert(f.name.span, m);
                    methods.insert(f.name.node.clone(), m);
                }
                Stmt::ClassDef(inner) => {
                    return Err(CompileError::unsupported("nested class definitions are not supported", inner.name.span));
                }
                _ => {}
            }
        }
        self.table.classes.insert(
            id,
            ClassInfo {
                symbol: id,
                name: c.name.node.clone(),
                qualified,
                scope,
                bases: Vec::new(),
                fields: IndexMap::new(),
                methods,
                decorators: c.decorators.iter().map(|d| d.node.clone()).collect(),
                span: c.name.span,
            },
        );
        Ok(())
    }

    fn resolve_bases(&mut self, body: &[Spanned<Stmt>]) -> Result<(), CompileError> {
        for stmt in body {
            let Stmt::ClassDef(c) = &stmt.node else { continue };
            let Some(&id) = self.table.defs.get(&c.name.span) else { continue };
            let mut bases = Vec::new();
            for base in &c.bases {
                let Some(path) = base.node.dotted_path() else {
                    return Err(CompileError::unsupported("unsupported base class expression", base.span));
                };
                if path == "object" {
                    continue;
                }
                let head = path.split('.').next().unwrap_or(&path).to_string();
                match self.table.scopes[0].names.get(&head).copied() {
                    Some(sym) if self.table.symbol(sym).kind == SymbolKind::Class && head == path => {
                        if sym == id {
                            return Err(CompileError::unsupported("class cannot inherit from itself", base.span));
                        }
                        bases.push(BaseRef::Local(sym));
                    }
                    Some(sym) => {
                        let s = self.table.symbol(sym);
                        let qualified = match (&s.kind, &s.origin) {
                            (SymbolKind::Imported, Some((module, name))) => format!("{module}.{name}"),
                            (SymbolKind::Module, Some((module, _))) => {
                                format!("{module}{}", &path[head.len()..])
                            }
                            _ => path.clone(),
                        };
                        bases.push(BaseRef::External(qualified));
                    }
                    None => match &self.wildcard {
                        Some(module) => bases.push(BaseRef::External(format!("{module}.{path}"))),
                        None => return Err(CompileError::unresolved(path, base.span)),
                    },
                }
            }
            if let Some(info) = self.table.classes.get_mut(&id) {
                info.bases = bases;
            }
        }
        Ok(())
    }

    /// Fields come from class-level declarations and `self.x = ...` in
    /// methods. A name already provided by a base class is not redeclared.
    fn collect_fields(&mut self, body: &[Spanned<Stmt>]) {
        let mut order: Vec<SymbolId> = Vec::new();
        let classes: Vec<SymbolId> = self.table.classes.keys().copied().collect();
        fn visit(t: &SymbolTable, c: SymbolId, order: &mut Vec<SymbolId>, depth: usize) {
            if order.contains(&c) || depth > 64 {
                return;
            }
            if let Some(info) = t.class(c) {
                for b in info.local_bases() {
                    visit(t, b, order, depth + 1);
                }
            }
            order.push(c);
        }
        for c in classes {
            visit(&self.table, c, &mut order, 0);
        }

        let defs: HashMap<SymbolId, &ClassDef> = body
            .iter()
            .filter_map(|s| match &s.node {
                Stmt::ClassDef(c) => self.table.defs.get(&c.name.span).map(|id| (*id, c)),
                _ => None,
            })
            .collect();

        for class in order {
            let Some(def) = defs.get(&class) else { continue };
            let mut names: Vec<(String, Span)> = Vec::new();
            for stmt in &def.body {
                match &stmt.node {
                    Stmt::Assign { target, .. } => {
                        if let ExprKind::Name(n) = &target.node.kind {
                            names.push((n.clone(), target.span));
                        }
                    }
                    Stmt::FunctionDef(f) if !f.has_decorator("staticmethod") => {
                        if let Some(self_name) = f.params.first().map(|p| p.name.node.clone()) {
                            collect_self_stores(&f.body, &self_name, &mut names);
                        }
                    }
                    _ => {}
                }
            }
            let scope = self.table.classes[&class].scope;
            for (name, span) in names {
                if self.table.lookup_member(class, &name).is_some() {
                    continue;
                }
                let id = self.declare(&name, SymbolKind::Field, scope, span);
                self.table.symbol_mut(id).owner = Some(class);
                if let Some(info) = self.table.classes.get_mut(&class) {
                    info.fields.insert(name, id);
                }
            }
        }
    }

    fn collect_parents(&mut self) {
        for iface in self.interfaces.values() {
            for (class, bases) in &iface.class_bases {
                self.table.parents.insert(class.clone(), bases.clone());
            }
        }
        let local: Vec<(String, Vec<String>)> = self
            .table
            .classes
            .values()
            .map(|c| {
                let bases = c
                    .bases
                    .iter()
                    .map(|b| match b {
                        BaseRef::Local(id) => self.table.classes[id].qualified.clone(),
                        BaseRef::External(q) => q.clone(),
                    })
                    .collect();
                (c.qualified.clone(), bases)
            })
            .collect();
        for (class, bases) in local {
            self.table.parents.insert(class, bases);
        }
    }

    // ---- resolution walk --------------------------------------------------

    fn walk_module_stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), CompileError> {
        match &stmt.node {
            Stmt::FunctionDef(f) => {
                let id = self.table.defs[&f.name.span];
                self.walk_function(f, id, None)
            }
            Stmt::ClassDef(c) => self.walk_class(c),
            Stmt::Import { .. } | Stmt::FromImport { .. } => Ok(()),
            Stmt::If { condition, then_body, else_body } if is_main_guard(condition) => {
                let Some((entry, _)) = self.table.entry else { return Ok(()) };
                self.walk_expr(condition)?;
                let (saved_scope, saved_block) = (self.scope, self.block);
                self.scope = entry;
                self.block = entry;
                let result = self.walk_body(then_body);
                self.scope = saved_scope;
                self.block = saved_block;
                result?;
                self.walk_body(else_body)
            }
            _ => self.walk_stmt(stmt),
        }
    }

    fn walk_class(&mut self, c: &ClassDef) -> Result<(), CompileError> {
        let id = self.table.defs[&c.name.span];
        let scope = self.table.classes[&id].scope;
        let (saved_scope, saved_class) = (self.scope, self.class);
        self.class = Some(id);
        for stmt in &c.body {
            match &stmt.node {
                Stmt::FunctionDef(f) => {
                    let m = self.table.defs[&f.name.span];
                    self.walk_function(f, m, Some(id))?;
                }
                Stmt::Assign { target, annotation, value } => {
                    self.scope = scope;
                    if let Some(v) = value {
                        self.walk_expr(v)?;
                    }
                    self.scope = saved_scope;
                    let ExprKind::Name(name) = &target.node.kind else {
                        return Err(CompileError::unsupported("unsupported class-level assignment", target.span));
                    };
                    let Some(field) = self.table.classes[&id].fields.get(name).copied() else { continue };
                    self.table.bindings.insert(target.node.id, field);
                    if let Some(a) = annotation {
                        let ty = self.annotation_type(&a.node);
                        self.table.symbol_mut(field).add_evidence(Evidence::Annotated(ty));
                    }
                    if let Some(v) = value {
                        let ev = value_evidence(v);
                        self.table.symbol_mut(field).add_evidence(ev);
                    }
                }
                Stmt::Pass | Stmt::Expr(Spanned { node: Expr { kind: ExprKind::Str(_), .. }, .. }) => {}
                _ => return Err(CompileError::unsupported("unsupported statement in class body", stmt.span)),
            }
        }
        self.scope = saved_scope;
        self.class = saved_class;
        Ok(())
    }

    fn walk_function(&mut self, f: &FunctionDef, id: SymbolId, class: Option<SymbolId>) -> Result<(), CompileError> {
        let scope = self.new_scope(ScopeKind::Function(id), Some(ScopeId(0)));
        let is_static = f.has_decorator("staticmethod");
        let has_self = class.is_some() && !is_static;
        if has_self && f.params.is_empty() {
            return Err(CompileError::unsupported("method requires a 'self' parameter", f.name.span));
        }

        let mut params = Vec::new();
        for (i, p) in f.params.iter().enumerate() {
            if let Some(default) = &p.default {
                self.walk_expr(default)?;
            }
            let pid = self.declare(&p.name.node, SymbolKind::Parameter, scope, p.name.span);
            self.table.symbol_mut(pid).owner = Some(id);
            self.table.symbol_mut(pid).decl_block = Some(scope);
            if i == 0 && has_self {
                if let Some(c) = class {
                    let ty = self.table.class_type(c);
                    self.table.symbol_mut(pid).add_evidence(Evidence::Annotated(ty));
                }
            } else if let Some(a) = &p.annotation {
                let ty = self.annotation_type(&a.node);
                self.table.symbol_mut(pid).add_evidence(Evidence::Annotated(ty));
            }
            if let Some(default) = &p.default {
                self.table.symbol_mut(pid).add_evidence(Evidence::Default(default.node.id));
            }
            params.push(pid);
        }

        let mut locals = Vec::new();
        for (name, span) in assigned_names(&f.body) {
            if self.table.scopes[scope.0 as usize].names.contains_key(&name) {
                continue;
            }
            let lid = self.declare(&name, SymbolKind::Variable, scope, span);
            self.table.symbol_mut(lid).owner = Some(id);
            locals.push(lid);
        }

        if let Some(ret) = &f.returns {
            let ty = self.annotation_type(&ret.node);
            self.table.symbol_mut(id).add_evidence(Evidence::Annotated(ty));
        }

        let special = matches!(f.name.node.as_str(), "__init__" | "__del__");
        let is_abstract = !special && (f.has_decorator("abstract") || raises_not_implemented(&f.body));
        let is_stub = !special && class.is_some() && f.body.iter().all(|s| matches!(s.node, Stmt::Pass));
        self.table.functions.insert(
            id,
            FunctionInfo {
                symbol: id,
                scope,
                params,
                class,
                is_static,
                is_const: f.has_decorator("const"),
                is_abstract,
                is_stub,
                locals,
            },
        );

        let saved = (self.scope, self.block, self.function);
        self.scope = scope;
        self.block = scope;
        self.function = Some(id);
        let result = self.walk_body(&f.body);
        (self.scope, self.block, self.function) = saved;
        result?;

        if !is_abstract && !is_stub && !always_returns(&f.body) {
            self.table.symbol_mut(id).add_evidence(Evidence::ReturnedNone);
        }
        Ok(())
    }

    fn walk_body(&mut self, body: &[Spanned<Stmt>]) -> Result<(), CompileError> {
        for stmt in body {
            self.walk_stmt(stmt)?;
        }
        Ok(())
    }

    fn walk_block(&mut self, body: &[Spanned<Stmt>]) -> Result<(), CompileError> {
        let block = self.new_scope(ScopeKind::Block, Some(self.block));
        let saved = self.block;
        self.block = block;
        let result = self.walk_body(body);
        self.block = saved;
        result
    }

    fn walk_stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<(), CompileError> {
        match &stmt.node {
            Stmt::Expr(e) => self.walk_expr(e),
            Stmt::Assign { target, annotation, value } => {
                if let Some(v) = value {
                    self.walk_expr(v)?;
                }
                self.walk_target(target)?;
                let ann = annotation.as_ref().map(|a| self.annotation_type(&a.node));
                self.record_assignment(target, value.as_ref(), ann)
            }
            Stmt::AugAssign { target, op, value } => {
                self.walk_expr(value)?;
                self.walk_target(target)?;
                if let Some(sym) = self.target_symbol(target) {
                    self.table.symbol_mut(sym).add_evidence(Evidence::AugAssigned { op: *op, value: value.node.id });
                }
                Ok(())
            }
            Stmt::Return(value) => {
                let Some(func) = self.function else {
                    return Err(CompileError::unsupported("'return' outside function", stmt.span));
                };
                match value {
                    Some(v) => {
                        self.walk_expr(v)?;
                        self.table.symbol_mut(func).add_evidence(Evidence::Returned(v.node.id));
                    }
                    None => {
                        self.table.symbol_mut(func).add_evidence(Evidence::ReturnedNone);
                    }
                }
                Ok(())
            }
            Stmt::If { condition, then_body, else_body } => {
                self.walk_expr(condition)?;
                self.walk_block(then_body)?;
                if !else_body.is_empty() {
                    self.walk_block(else_body)?;
                }
                Ok(())
            }
            Stmt::While { condition, body } => {
                self.walk_expr(condition)?;
                self.walk_block(body)
            }
            Stmt::For { target, iterable, body } => {
                self.walk_expr(iterable)?;
                let block = self.new_scope(ScopeKind::Block, Some(self.block));
                let saved = self.block;
                self.block = block;
                self.walk_target(target)?;
                match &target.node.kind {
                    ExprKind::Tuple(items) => {
                        for (i, item) in items.iter().enumerate() {
                            if let Some(sym) = self.table.binding(item.node.id) {
                                let ev = Evidence::Iterated { iterable: iterable.node.id, index: Some(i) };
                                self.table.symbol_mut(sym).add_evidence(ev);
                            }
                        }
                    }
                    _ => {
                        if let Some(sym) = self.table.binding(target.node.id) {
                            let ev = Evidence::Iterated { iterable: iterable.node.id, index: None };
                            self.table.symbol_mut(sym).add_evidence(ev);
                        }
                    }
                }
                let result = self.walk_body(body);
                self.block = saved;
                result
            }
            Stmt::With { context, binding, body } => {
                self.walk_expr(context)?;
                let block = self.new_scope(ScopeKind::Block, Some(self.block));
                let saved = self.block;
                self.block = block;
                if let Some(b) = binding {
                    let sym = self.lookup(&b.node, b.span)?;
                    self.note_block(sym, true);
                    self.table.symbol_mut(sym).add_evidence(Evidence::Context(context.node.id));
                }
                let result = self.walk_body(body);
                self.block = saved;
                result
            }
            Stmt::FunctionDef(f) => Err(CompileError::unsupported("nested function definitions are not supported", f.name.span)),
            Stmt::ClassDef(c) => Err(CompileError::unsupported("nested class definitions are not supported", c.name.span)),
            Stmt::Raise(value) => match value {
                Some(v) => self.walk_expr(v),
                None => Ok(()),
            },
            Stmt::Del(target) => self.walk_expr(target),
            Stmt::Import { path, .. } | Stmt::FromImport { module: path, .. } => {
                if self.function.is_some() {
                    return Err(CompileError::unsupported("imports inside functions are not supported", path[0].span));
                }
                Ok(())
            }
            Stmt::Pass | Stmt::Break | Stmt::Continue => Ok(()),
        }
    }

    /// Resolve an assignment target: names bind, attribute receivers and
    /// subscripts are walked as expressions.
    fn walk_target(&mut self, target: &Spanned<Expr>) -> Result<(), CompileError> {
        match &target.node.kind {
            ExprKind::Name(name) => {
                let sym = self.lookup(name, target.span)?;
                self.table.bindings.insert(target.node.id, sym);
                self.note_block(sym, true);
                Ok(())
            }
            ExprKind::Tuple(items) => items.iter().try_for_each(|i| self.walk_target(i)),
            ExprKind::Attribute { value, attr } => {
                self.walk_expr(value)?;
                self.attribute_site(target, value, &attr.node, AttrUse::Load);
                Ok(())
            }
            ExprKind::Subscript { value, index } => {
                self.walk_expr(value)?;
                self.walk_expr(index)
            }
            _ => Err(CompileError::unsupported("cannot assign to expression", target.span)),
        }
    }

    fn record_assignment(
        &mut self,
        target: &Spanned<Expr>,
        value: Option<&Spanned<Expr>>,
        annotation: Option<Type>,
    ) -> Result<(), CompileError> {
        match &target.node.kind {
            ExprKind::Name(_) => {
                let Some(sym) = self.table.binding(target.node.id) else { return Ok(()) };
                if let Some(ty) = annotation {
                    self.table.symbol_mut(sym).add_evidence(Evidence::Annotated(ty));
                }
                if let Some(v) = value {
                    self.table.symbol_mut(sym).add_evidence(value_evidence(v));
                }
            }
            ExprKind::Tuple(items) => {
                let Some(v) = value else { return Ok(()) };
                for (i, item) in items.iter().enumerate() {
                    match &v.node.kind {
                        ExprKind::Tuple(values) if values.len() == items.len() => {
                            self.record_assignment(item, Some(&values[i]), None)?;
                        }
                        _ => {
                            if let Some(sym) = self.target_symbol(item) {
                                let ev = Evidence::Unpacked { value: v.node.id, index: i };
                                self.table.symbol_mut(sym).add_evidence(ev);
                            } else {
                                self.retarget_attr_store(item, v.node.id);
                            }
                        }
                    }
                }
            }
            ExprKind::Attribute { .. } => {
                if let Some(v) = value {
                    self.retarget_attr_store(target, v.node.id);
                }
            }
            ExprKind::Subscript { value: container, index } => {
                if let Some(v) = value {
                    self.table.mutation_sites.push(MutationSite {
                        receiver: container.node.id,
                        key: Some(index.node.id),
                        value: v.node.id,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Turn the load site recorded by `walk_target` into a store.
    fn retarget_attr_store(&mut self, target: &Spanned<Expr>, value: NodeId) {
        if let Some(site) = self.table.attr_sites.iter_mut().rev().find(|s| s.node == target.node.id) {
            site.usage = AttrUse::Store { value };
        }
    }

    fn target_symbol(&self, target: &Spanned<Expr>) -> Option<SymbolId> {
        match &target.node.kind {
            ExprKind::Name(_) => self.table.binding(target.node.id),
            _ => None,
        }
    }

    fn walk_expr(&mut self, expr: &Spanned<Expr>) -> Result<(), CompileError> {
        match &expr.node.kind {
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::NoneLit => Ok(()),
            ExprKind::Name(name) => {
                let sym = self.lookup(name, expr.span)?;
                self.table.bindings.insert(expr.node.id, sym);
                self.note_block(sym, false);
                Ok(())
            }
            ExprKind::Attribute { value, attr } => {
                self.walk_expr(value)?;
                self.attribute_site(expr, value, &attr.node, AttrUse::Load);
                Ok(())
            }
            ExprKind::Call { func, args } => {
                for a in args {
                    self.walk_expr(a)?;
                }
                let arg_ids: Vec<NodeId> = args.iter().map(|a| a.node.id).collect();
                match &func.node.kind {
                    ExprKind::Attribute { value, attr } => {
                        self.walk_expr(value)?;
                        let usage = AttrUse::Call { call: expr.node.id, args: arg_ids.clone() };
                        self.attribute_site(func, value, &attr.node, usage);
                        if MUTATORS.contains(&attr.node.as_str()) && !args.is_empty() {
                            let (key, v) = match (attr.node.as_str(), args.len()) {
                                ("insert", 2) => (None, args[1].node.id),
                                ("setdefault", 2) => (Some(args[0].node.id), args[1].node.id),
                                _ => (None, args[0].node.id),
                            };
                            self.table.mutation_sites.push(MutationSite { receiver: value.node.id, key, value: v });
                        }
                        if let Some(module) = self.module_path_of(value)
                            && self.interfaces.contains_key(&module)
                        {
                            self.table.external_calls.push(ExternalCall {
                                module,
                                name: attr.node.clone(),
                                call: expr.node.id,
                                args: arg_ids,
                            });
                        }
                    }
                    _ => {
                        self.walk_expr(func)?;
                        if let Some(sym) = self.table.binding(func.node.id) {
                            self.record_call(sym, expr.node.id, arg_ids);
                        }
                    }
                }
                Ok(())
            }
            ExprKind::BinOp { op, left, right } => {
                self.walk_expr(left)?;
                self.walk_expr(right)?;
                self.operand_evidence(*op, left, right, Side::Left);
                self.operand_evidence(*op, right, left, Side::Right);
                Ok(())
            }
            ExprKind::UnaryOp { operand, .. } => self.walk_expr(operand),
            ExprKind::BoolOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
                self.walk_expr(left)?;
                self.walk_expr(right)
            }
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                items.iter().try_for_each(|i| self.walk_expr(i))
            }
            ExprKind::Dict(entries) => {
                for (k, v) in entries {
                    self.walk_expr(k)?;
                    self.walk_expr(v)?;
                }
                Ok(())
            }
            ExprKind::Subscript { value, index } => {
                self.walk_expr(value)?;
                self.walk_expr(index)
            }
        }
    }

    fn attribute_site(&mut self, node: &Spanned<Expr>, receiver: &Spanned<Expr>, attr: &str, usage: AttrUse) {
        if self.module_path_of(receiver).is_some() {
            return;
        }
        if let Some(sym) = self.table.binding(receiver.node.id)
            && self.table.symbol(sym).kind.is_inferred()
        {
            let ev = Evidence::AttributeAccess { attr: attr.to_string(), node: node.node.id };
            self.table.symbol_mut(sym).add_evidence(ev);
        }
        self.table.attr_sites.push(AttrSite {
            node: node.node.id,
            receiver: receiver.node.id,
            attr: attr.to_string(),
            usage,
            scope: self.scope,
        });
    }

    /// Dotted module path when `expr` names an imported module.
    fn module_path_of(&self, expr: &Spanned<Expr>) -> Option<String> {
        match &expr.node.kind {
            ExprKind::Name(_) => {
                let sym = self.table.symbol(self.table.binding(expr.node.id)?);
                match (&sym.kind, &sym.origin) {
                    (SymbolKind::Module, Some((module, member))) if member.is_empty() => Some(module.clone()),
                    _ => None,
                }
            }
            ExprKind::Attribute { value, attr } => {
                let base = self.module_path_of(value)?;
                let candidate = format!("{base}.{}", attr.node);
                self.interfaces.contains_key(&candidate).then_some(candidate)
            }
            _ => None,
        }
    }

    fn record_call(&mut self, callee: SymbolId, call: NodeId, args: Vec<NodeId>) {
        let kind = self.table.symbol(callee).kind;
        match kind {
            SymbolKind::Function => {
                self.table.symbol_mut(callee).add_evidence(Evidence::CallSite(call));
                self.pending.push(PendingCall::Function { func: callee, call, args });
            }
            SymbolKind::Class => {
                self.table.symbol_mut(callee).add_evidence(Evidence::Instantiated(call));
                self.pending.push(PendingCall::Class { class: callee, call, args });
            }
            SymbolKind::Imported => {
                if let Some((module, name)) = self.table.symbol(callee).origin.clone()
                    && self.interfaces.contains_key(&module)
                {
                    self.table.external_calls.push(ExternalCall { module, name, call, args });
                }
            }
            _ => {}
        }
    }

    fn operand_evidence(&mut self, op: BinOp, operand: &Spanned<Expr>, partner: &Spanned<Expr>, side: Side) {
        if let Some(sym) = self.table.binding(operand.node.id)
            && self.table.symbol(sym).kind.is_inferred()
        {
            let ev = Evidence::Operand { op, partner: partner.node.id, side };
            self.table.symbol_mut(sym).add_evidence(ev);
        }
    }

    fn apply_pending_calls(&mut self) {
        for call in std::mem::take(&mut self.pending) {
            let (params, skip, call_id, args) = match call {
                PendingCall::Function { func, call, args } => {
                    let Some(info) = self.table.function(func) else { continue };
                    (info.params.clone(), 0, call, args)
                }
                PendingCall::Class { class, call, args } => {
                    let Some(init) = self.table.lookup_method(class, "__init__") else { continue };
                    let Some(info) = self.table.function(init) else { continue };
                    (info.params.clone(), 1, call, args)
                }
            };
            for (param, arg) in params.iter().skip(skip).zip(args) {
                self.table.symbol_mut(*param).add_evidence(Evidence::Argument { call: call_id, value: arg });
            }
        }
    }

    fn note_block(&mut self, sym: SymbolId, assigning: bool) {
        let block = self.block;
        let s = self.table.symbol_mut(sym);
        if !matches!(s.kind, SymbolKind::Variable | SymbolKind::Parameter) {
            return;
        }
        if assigning && s.decl_block.is_none() {
            s.decl_block = Some(block);
        }
        if !s.blocks.contains(&block) {
            s.blocks.push(block);
        }
    }

    fn lookup(&mut self, name: &str, span: Span) -> Result<SymbolId, CompileError> {
        let mut scope = Some(self.scope);
        while let Some(s) = scope {
            let sc = &self.table.scopes[s.0 as usize];
            if let Some(id) = sc.names.get(name) {
                return Ok(*id);
            }
            // class bodies are not visible from nested functions
            scope = sc.parent;
        }
        if Builtin::lookup(name).is_some() {
            if let Some(id) = self.builtin_syms.get(name) {
                return Ok(*id);
            }
            let id = self.new_symbol(name, SymbolKind::Builtin, ScopeId(0), Span::dummy());
            self.table.symbol_mut(id).ty = Type::Dynamic;
            self.builtin_syms.insert(name.to_string(), id);
            return Ok(id);
        }
        if let Some(module) = self.wildcard.clone() {
            let id = self.declare(name, SymbolKind::Imported, ScopeId(0), span);
            self.table.symbol_mut(id).origin = Some((module, name.to_string()));
            return Ok(id);
        }
        Err(CompileError::unresolved(name, span))
    }

    fn collect_constants(&mut self, body: &[Spanned<Stmt>]) {
        for stmt in body {
            let Stmt::Assign { target, value: Some(_), .. } = &stmt.node else { continue };
            let ExprKind::Name(name) = &target.node.kind else { continue };
            if self.module_assignments.get(name) != Some(&1) {
                continue;
            }
            if let Some(sym) = self.table.binding(target.node.id)
                && self.table.symbol(sym).scope == ScopeId(0)
                && !self.table.constants.contains(&sym)
            {
                self.table.constants.push(sym);
            }
        }
    }

    /// Convert an annotation into a type. Names that do not denote a known
    /// type become `Dynamic`.
    fn annotation_type(&mut self, ann: &TypeExpr) -> Type {
        match ann {
            TypeExpr::Named(name) => self.named_type(name),
            TypeExpr::Generic { name, args } => {
                let arg = |r: &mut Self, i: usize| args.get(i).map_or(Type::Unknown, |a| r.annotation_type(&a.node));
                match name.as_str() {
                    "List" | "list" | "Sequence" => Type::list(arg(self, 0)),
                    "Set" | "set" => Type::set(arg(self, 0)),
                    "Dict" | "dict" | "Mapping" => {
                        let k = arg(self, 0);
                        Type::dict(k, arg(self, 1))
                    }
                    "Tuple" | "tuple" => {
                        let items = args.iter().map(|a| self.annotation_type(&a.node)).collect();
                        Type::tuple(items)
                    }
                    "Optional" => {
                        let inner = arg(self, 0);
                        if let Some(c) = inner.class_name() {
                            self.table.nullable.insert(c.to_string());
                        }
                        inner
                    }
                    "Callable" => {
                        let params = match args.first().map(|a| &a.node) {
                            Some(TypeExpr::Generic { name, args }) if name == "[]" => {
                                args.iter().map(|a| self.annotation_type(&a.node)).collect()
                            }
                            _ => Vec::new(),
                        };
                        Type::Function(params, Box::new(arg(self, 1)))
                    }
                    _ => Type::Dynamic,
                }
            }
        }
    }

    fn named_type(&mut self, name: &str) -> Type {
        match name {
            "int" | "long" => return Type::int(),
            "float" | "double" => return Type::float(),
            "bool" => return Type::boolean(),
            "str" | "String" => return Type::str(),
            "None" | "void" => return Type::none(),
            "List" | "list" => return Type::list(Type::Unknown),
            "Dict" | "dict" => return Type::dict(Type::Unknown, Type::Unknown),
            "Set" | "set" => return Type::set(Type::Unknown),
            "Any" | "object" => return Type::Dynamic,
            _ => {}
        }
        let head = name.split('.').next().unwrap_or(name);
        if let Some(&sym) = self.table.scopes[0].names.get(head) {
            let s = self.table.symbol(sym);
            match (&s.kind, &s.origin) {
                (SymbolKind::Class, _) if head == name => return self.table.class_type(sym),
                (SymbolKind::Imported, Some((module, member))) => {
                    let is_class = self
                        .interfaces
                        .get(module)
                        .is_some_and(|i| i.exports.get(member) == Some(&ExportKind::Class));
                    if is_class && head == name {
                        return Type::class(format!("{module}.{member}"));
                    }
                }
                (SymbolKind::Module, Some((module, member))) if member.is_empty() => {
                    return Type::class(format!("{module}{}", &name[head.len()..]));
                }
                _ => {}
            }
        }
        if name.contains('.') {
            return Type::class(name);
        }
        Type::Dynamic
    }
}

fn dotted(path: &[Spanned<String>]) -> String {
    path.iter().map(|p| p.node.as_str()).collect::<Vec<_>>().join(".")
}

fn value_evidence(v: &Spanned<Expr>) -> Evidence {
    match &v.node.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::List(_)
        | ExprKind::Dict(_)
        | ExprKind::Set(_) => Evidence::Literal(v.node.id),
        ExprKind::UnaryOp { op: UnaryOp::Neg, operand } if matches!(operand.node.kind, ExprKind::Int(_) | ExprKind::Float(_)) => {
            Evidence::Literal(v.node.id)
        }
        _ => Evidence::Assigned(v.node.id),
    }
}

/// `if __name__ == '__main__':`
pub(crate) fn is_main_guard(cond: &Spanned<Expr>) -> bool {
    match &cond.node.kind {
        ExprKind::Compare { op: CmpOp::Eq, left, right } => {
            matches!((&left.node.kind, &right.node.kind), (ExprKind::Name(n), ExprKind::Str(s)) if n == "__name__" && s == "__main__")
        }
        _ => false,
    }
}

/// Names bound by assignment, loop or `with` anywhere in a body, excluding
/// nested definitions. First occurrence order.
fn assigned_names(body: &[Spanned<Stmt>]) -> Vec<(String, Span)> {
    fn target_names(t: &Spanned<Expr>, out: &mut Vec<(String, Span)>) {
        match &t.node.kind {
            ExprKind::Name(n) => {
                if !out.iter().any(|(x, _)| x == n) {
                    out.push((n.clone(), t.span));
                }
            }
            ExprKind::Tuple(items) => items.iter().for_each(|i| target_names(i, out)),
            _ => {}
        }
    }
    fn visit(body: &[Spanned<Stmt>], out: &mut Vec<(String, Span)>) {
        for stmt in body {
            match &stmt.node {
                Stmt::Assign { target, .. } | Stmt::AugAssign { target, .. } => target_names(target, out),
                Stmt::For { target, body, .. } => {
                    target_names(target, out);
                    visit(body, out);
                }
                Stmt::If { then_body, else_body, .. } => {
                    visit(then_body, out);
                    visit(else_body, out);
                }
                Stmt::While { body, .. } => visit(body, out),
                Stmt::With { binding, body, .. } => {
                    if let Some(b) = binding
                        && !out.iter().any(|(x, _)| x == &b.node)
                    {
                        out.push((b.node.clone(), b.span));
                    }
                    visit(body, out);
                }
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    visit(body, &mut out);
    out
}

fn collect_self_stores(body: &[Spanned<Stmt>], self_name: &str, out: &mut Vec<(String, Span)>) {
    fn target(t: &Spanned<Expr>, self_name: &str, out: &mut Vec<(String, Span)>) {
        match &t.node.kind {
            ExprKind::Attribute { value, attr } if value.node.name() == Some(self_name) => {
                if !out.iter().any(|(n, _)| n == &attr.node) {
                    out.push((attr.node.clone(), attr.span));
                }
            }
            ExprKind::Tuple(items) => items.iter().for_each(|i| target(i, self_name, out)),
            _ => {}
        }
    }
    for stmt in body {
        match &stmt.node {
            Stmt::Assign { target: t, .. } => target(t, self_name, out),
            Stmt::If { then_body, else_body, .. } => {
                collect_self_stores(then_body, self_name, out);
                collect_self_stores(else_body, self_name, out);
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::With { body, .. } => {
                collect_self_stores(body, self_name, out)
            }
            _ => {}
        }
    }
}

/// Body consisting only of `raise NotImplemented[Error][(...)]`.
fn raises_not_implemented(body: &[Spanned<Stmt>]) -> bool {
    let [only] = body else { return false };
    let Stmt::Raise(Some(e)) = &only.node else { return false };
    let callee = match &e.node.kind {
        ExprKind::Call { func, .. } => &func.node,
        _ => &e.node,
    };
    matches!(callee.name(), Some("NotImplemented" | "NotImplementedError"))
}

/// Does every path through `body` end in `return` or `raise`?
pub(crate) fn always_returns(body: &[Spanned<Stmt>]) -> bool {
    body.last().is_some_and(|last| match &last.node {
        Stmt::Return(_) | Stmt::Raise(_) => true,
        Stmt::If { then_body, else_body, .. } => always_returns(then_body) && always_returns(else_body),
        Stmt::While { condition, .. } => matches!(condition.node.kind, ExprKind::Bool(true)),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_module;
    use crate::resolve::evidence::Evidence;
    use crate::resolve::scope::SymbolKind;
    use crate::resolve::{resolve, Interfaces, ModuleInterface, SymbolTable};

    fn table(src: &str) -> SymbolTable {
        let module = parse_module(src, "m").unwrap();
        resolve(&module, &Interfaces::new()).unwrap()
    }

    fn named<'t>(t: &'t SymbolTable, name: &str) -> &'t crate::resolve::scope::Symbol {
        t.symbols.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn unresolved_name_is_fatal_with_position() {
        let module = parse_module("x = 1\ny = z + x\n", "m").unwrap();
        let err = resolve(&module, &Interfaces::new()).unwrap_err();
        assert!(err.to_string().contains("'z'"));
        assert_eq!(err.span().map(|s| s.start), Some(10));
    }

    #[test]
    fn functions_are_hoisted() {
        let t = table("def f():\n    return g()\ndef g():\n    return 1\n");
        assert_eq!(t.functions.len(), 2);
    }

    #[test]
    fn locals_are_function_scoped() {
        let t = table("x = 1\ndef f():\n    x = 2\n    return x\n");
        let xs: Vec<_> = t.symbols.iter().filter(|s| s.name == "x").collect();
        assert_eq!(xs.len(), 2);
        assert!(xs.iter().any(|s| s.owner.is_some()));
    }

    #[test]
    fn class_scope_not_visible_in_methods() {
        let module = parse_module("class A:\n    k = 1\n    def f(self):\n        return k\n", "m").unwrap();
        assert!(resolve(&module, &Interfaces::new()).is_err());
    }

    #[test]
    fn fields_from_self_assignments() {
        let t = table("class P:\n    def __init__(self, x, y):\n        self.x = x\n        self.y = y\n");
        let class = t.classes.values().next().unwrap();
        assert_eq!(class.fields.keys().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn subclass_does_not_redeclare_base_field() {
        let t = table(
            "class A:\n    def __init__(self, v):\n        self.v = v\nclass B(A):\n    def __init__(self, v):\n        A.__init__(self, v)\n        self.v = v\n",
        );
        let fields: usize = t.classes.values().map(|c| c.fields.len()).sum();
        assert_eq!(fields, 1);
    }

    #[test]
    fn evidence_recorded_in_source_order() {
        let t = table("def f(a):\n    return a\nf(1)\nf(2.5)\n");
        let a = named(&t, "a");
        let args: Vec<_> = a.evidence.iter().filter(|e| matches!(e, Evidence::Argument { .. })).collect();
        assert_eq!(args.len(), 2);
        match (args[0], args[1]) {
            (Evidence::Argument { value: v1, .. }, Evidence::Argument { value: v2, .. }) => assert!(v1 < v2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn constructor_arguments_reach_init_params() {
        let t = table("class P:\n    def __init__(self, x):\n        self.x = x\np = P(3)\n");
        let x = t.symbols.iter().find(|s| s.name == "x" && s.kind == SymbolKind::Parameter).unwrap();
        assert!(x.evidence.iter().any(|e| matches!(e, Evidence::Argument { .. })));
        let p = named(&t, "P");
        assert!(p.evidence.iter().any(|e| matches!(e, Evidence::Instantiated(_))));
    }

    #[test]
    fn self_parameter_is_annotated_with_class() {
        let t = table("class P:\n    def f(self):\n        return 1\n");
        let s = named(&t, "self");
        assert!(matches!(&s.evidence[0], Evidence::Annotated(ty) if ty.class_name() == Some("m.P")));
    }

    #[test]
    fn not_implemented_body_marks_abstract() {
        let t = table("class E:\n    def visit(self):\n        raise NotImplementedError()\n    def name(self):\n        pass\n");
        let infos: Vec<_> = t.functions.values().collect();
        assert!(infos[0].is_abstract);
        assert!(infos[1].is_stub);
        assert!(!infos[1].is_abstract);
    }

    #[test]
    fn entry_block_gets_its_own_scope() {
        let t = table("def f():\n    return 1\nif __name__ == '__main__':\n    r = f()\n    print(r)\n");
        assert!(t.entry.is_some());
        let r = named(&t, "r");
        assert_ne!(r.scope, t.module_scope());
    }

    #[test]
    fn constants_are_single_assignment_module_names() {
        let t = table("one = 1\ntwo = one + one\ncounter = 0\ncounter = counter + 1\n");
        let names: Vec<_> = t.constants.iter().map(|c| t.symbol(*c).name.clone()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn operand_evidence_links_partner() {
        let t = table("def f(a):\n    return a + 1\n");
        let a = named(&t, "a");
        assert!(a.evidence.iter().any(|e| matches!(e, Evidence::Operand { .. })));
    }

    #[test]
    fn mutation_sites_recorded() {
        let t = table("xs = []\nxs.append(1)\nd = {}\nd['k'] = 2.0\n");
        assert_eq!(t.mutation_sites.len(), 2);
    }

    #[test]
    fn imports_bind_modules_and_names() {
        let other = parse_module("def helper(x):\n    return x\n", "pkg.util").unwrap();
        let mut ifaces = Interfaces::new();
        ifaces.insert("pkg.util".into(), ModuleInterface::of(&other));
        let module = parse_module("import math\nfrom pkg.util import helper\ny = helper(math.sqrt(2.0))\n", "m").unwrap();
        let t = resolve(&module, &ifaces).unwrap();
        assert_eq!(t.external_calls.len(), 1);
        assert_eq!(t.external_calls[0].module, "pkg.util");
        assert!(t.imported_modules.contains(&"math".to_string()));
    }

    #[test]
    fn runtime_imports_are_ignored() {
        let t = table("from tide.runtime.kiwi import *\nfrom typing import List\nx: List[int] = []\n");
        assert!(t.imported_modules.is_empty());
    }

    #[test]
    fn locals_track_blocks_for_placement() {
        let t = table("def f(c):\n    if c:\n        y = 1\n    else:\n        y = 2\n    return y\n");
        let y = named(&t, "y");
        assert!(y.decl_block.is_some());
        assert!(y.blocks.len() >= 3);
    }

    #[test]
    fn fall_through_records_none_return() {
        let t = table("def f(x):\n    if x:\n        return 1\n");
        let f = named(&t, "f");
        assert!(f.evidence.contains(&Evidence::ReturnedNone));
        let t = table("def g(x):\n    if x:\n        return 1\n    return 2\n");
        let g = named(&t, "g");
        assert!(!g.evidence.contains(&Evidence::ReturnedNone));
    }

    #[test]
    fn optional_annotation_marks_nullable() {
        let t = table("class N:\n    pass\ndef f(n: Optional[N]) -> int:\n    return 1\n");
        assert!(t.nullable.contains("m.N"));
    }
}
