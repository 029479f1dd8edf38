//! Statements, assignment targets and loops.

use crate::diagnostics::{CompileError, DiagnosticKind};
use crate::infer::expr::Member;
use crate::infer::ExternalKind;
use crate::parser::ast::{ExprKind, Stmt};
use crate::resolve::builtins::Builtin;
use crate::resolve::scope::{SymbolId, SymbolKind};
use crate::span::Spanned;
use crate::types::{Head, Type};

use super::expr::{container_kind, elem_slot, Node};
use super::ir::*;
use super::Lowerer;

impl<'a, 'm> Lowerer<'a, 'm> {
    pub(super) fn block(&mut self, body: &[Spanned<Stmt>]) -> Result<Vec<LStmt>, CompileError> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            self.stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    pub(super) fn stmt(&mut self, stmt: &Spanned<Stmt>, out: &mut Vec<LStmt>) -> Result<(), CompileError> {
        match &stmt.node {
            Stmt::Expr(e) => {
                if self.frame.in_ctor
                    && let Some(init) = self.base_init(e)?
                {
                    self.frame.base_inits.push(init);
                    return Ok(());
                }
                if !matches!(e.node.kind, ExprKind::Str(_)) {
                    out.push(LStmt::Expr(self.expr(e)?));
                }
            }
            Stmt::Assign { target, value: Some(value), .. } => {
                let vt = self.type_of(value);
                let v = self.expr(value)?;
                out.extend(self.store(target, v, &vt)?);
            }
            Stmt::Assign { target, value: None, .. } => {
                if let Some(sym) = self.table.binding(target.node.id)
                    && self.is_local(sym)
                    && self.frame.declared.insert(sym)
                {
                    let s = self.table.symbol(sym);
                    out.push(LStmt::Declare { name: s.name.clone(), ty: self.symbol_type(sym), init: None });
                }
            }
            Stmt::AugAssign { target, op, value } => {
                let l = self.operand(target)?;
                let r = self.operand(value)?;
                let (v, t) = self.binary(stmt.span, *op, l, r)?;
                out.extend(self.store(target, v, &t)?);
            }
            Stmt::Return(value) => out.extend(self.ret(value.as_ref())?),
            Stmt::If { condition, then_body, else_body } => {
                let cond = self.condition(condition)?;
                match cond {
                    LExpr::StaticBool(true) => out.extend(self.block(then_body)?),
                    LExpr::StaticBool(false) => out.extend(self.block(else_body)?),
                    cond => {
                        let then = self.block(then_body)?;
                        let els = self.block(else_body)?;
                        out.push(LStmt::If { cond, then, els });
                    }
                }
            }
            Stmt::While { condition, body } => {
                let cond = self.condition(condition)?;
                let body = self.block(body)?;
                out.push(LStmt::While { cond, body });
            }
            Stmt::For { target, iterable, body } => self.for_loop(target, iterable, body, out)?,
            Stmt::FunctionDef(f) => {
                return Err(CompileError::unsupported("nested function definitions are not supported", f.name.span));
            }
            Stmt::ClassDef(c) => {
                return Err(CompileError::unsupported("nested class definitions are not supported", c.name.span));
            }
            Stmt::Raise(value) => out.push(self.raise(value.as_ref())?),
            Stmt::With { context, binding, body } => out.push(self.with_block(context, binding.as_ref(), body)?),
            Stmt::Del(target) => {
                if let Some(del) = self.delete(target)? {
                    out.push(del);
                }
            }
            Stmt::Break => out.push(LStmt::Break),
            Stmt::Continue => out.push(LStmt::Continue),
            Stmt::Pass | Stmt::Import { .. } | Stmt::FromImport { .. } => {}
        }
        Ok(())
    }

    /// Locals of the body being lowered (as opposed to module globals).
    fn is_local(&self, sym: SymbolId) -> bool {
        let s = self.table.symbol(sym);
        matches!(s.kind, SymbolKind::Variable | SymbolKind::Parameter) && s.scope != self.table.module_scope()
    }

    /// `Base.__init__(self, ...)`, `super().__init__(...)` or the same on an
    /// imported base, inside a constructor.
    fn base_init(&mut self, e: &Node) -> Result<Option<(String, Vec<LExpr>)>, CompileError> {
        let ExprKind::Call { func, args } = &e.node.kind else { return Ok(None) };
        let ExprKind::Attribute { value, attr } = &func.node.kind else { return Ok(None) };
        if attr.node != "__init__" {
            return Ok(None);
        }
        let (base, args) = if let Some(class) = self.class_named(value) {
            match args.split_first() {
                Some((first, rest)) if self.is_self(first) => (self.qualified(class), rest),
                _ => return Ok(None),
            }
        } else if let Some(key) = self.external_class_named(value) {
            match args.split_first() {
                Some((first, rest)) if self.is_self(first) => (key, rest),
                _ => return Ok(None),
            }
        } else if self.is_super_call(value) {
            match self.first_base() {
                Some(base) => (base, args.as_slice()),
                None => return Err(CompileError::unsupported("super() used outside a derived class", value.span)),
            }
        } else {
            return Ok(None);
        };

        let params = match self.table.class_by_name(&base).map(|c| c.symbol) {
            Some(class) => self.table.lookup_method(class, "__init__").map(|m| self.param_types(m)).unwrap_or_default(),
            None => self.external_params(&base),
        };
        let mut lowered = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            lowered.push(match params.get(i) {
                Some(p) => self.expr_as(a, p)?,
                None => self.expr(a)?,
            });
        }
        Ok(Some((base, lowered)))
    }

    fn ret(&mut self, value: Option<&Node>) -> Result<Vec<LStmt>, CompileError> {
        if self.frame.in_ctor {
            return Ok(vec![LStmt::Return(None)]);
        }
        let Some(value) = value else { return Ok(vec![LStmt::Return(None)]) };
        let ret = self.frame.ret.clone().unwrap_or(Type::Dynamic);
        if ret.is_none() {
            let mut out = Vec::new();
            if !matches!(value.node.kind, ExprKind::NoneLit) {
                out.push(LStmt::Expr(self.expr(value)?));
            }
            out.push(LStmt::Return(None));
            return Ok(out);
        }
        Ok(vec![LStmt::Return(Some(self.expr_as(value, &ret)?))])
    }

    // ---- assignment -------------------------------------------------------

    /// Store `value` (of type `vt`) into an assignment target.
    pub(super) fn store(&mut self, target: &Node, value: LExpr, vt: &Type) -> Result<Vec<LStmt>, CompileError> {
        let table = self.table;
        match &target.node.kind {
            ExprKind::Name(n) => {
                let Some(sym) = table.binding(target.node.id) else {
                    return Err(CompileError::unresolved(n, target.span));
                };
                let ty = self.symbol_type(sym);
                let value = self.coerce(value, vt, &ty);
                if !self.is_local(sym) {
                    return Ok(vec![LStmt::Assign { target: LPlace::Global(table.qualified_name(sym)), value }]);
                }
                if self.frame.declared.insert(sym) {
                    return Ok(vec![LStmt::Declare { name: n.clone(), ty, init: Some(value) }]);
                }
                Ok(vec![LStmt::Assign { target: LPlace::Local(n.clone()), value }])
            }
            ExprKind::Attribute { value: object, attr } => {
                if let Some(module) = self.module_of(object) {
                    let place = LPlace::Global(format!("{module}.{}", attr.node));
                    return Ok(vec![LStmt::Assign { target: place, value }]);
                }
                if self.class_named(object).is_some() {
                    return Err(CompileError::unsupported("class attributes cannot be assigned", target.span));
                }
                let ot = self.type_of(object);
                let o = self.expr(object)?;
                match self.field_place(o.clone(), &ot, &attr.node) {
                    Some((place, ty)) => {
                        let value = self.coerce(value, vt, &ty);
                        Ok(vec![LStmt::Assign { target: place, value }])
                    }
                    None => {
                        if !ot.is_dynamic() {
                            self.warn(
                                DiagnosticKind::AmbiguousAttribute,
                                format!("attribute '{}' of '{ot}' cannot be resolved statically", attr.node),
                                target.span,
                            );
                        }
                        let args = vec![(LExpr::Str(attr.node.clone()), Type::str()), (value, vt.clone())];
                        let call = self.dynamic_call(o, &ot, "__setattr__", args);
                        Ok(vec![LStmt::Expr(call)])
                    }
                }
            }
            ExprKind::Subscript { value: container, index } => {
                let ct = self.type_of(container);
                let c = self.expr(container)?;
                match container_kind(&ct) {
                    Some(ContainerKind::List) => {
                        let i = self.position(c.clone(), index)?;
                        let value = self.coerce(value, vt, &elem_slot(ct.arg(0)));
                        let place = LPlace::Index { container: c, index: i };
                        Ok(vec![LStmt::Assign { target: place, value }])
                    }
                    Some(ContainerKind::Dict) => {
                        let key = self.expr_as(index, &elem_slot(ct.arg(0)))?;
                        let value = self.coerce(value, vt, &elem_slot(ct.arg(1)));
                        Ok(vec![LStmt::Assign { target: LPlace::Index { container: c, index: key }, value }])
                    }
                    Some(_) => Err(CompileError::unsupported(format!("'{ct}' does not support item assignment"), target.span)),
                    None => {
                        let it = self.type_of(index);
                        let i = self.expr(index)?;
                        let args = vec![(i, it), (value, vt.clone())];
                        if let Some(class) = ct.class_name().map(str::to_string)
                            && let Some((call, _)) = self.invoke(c.clone(), &class, "__setitem__", args.clone())
                        {
                            return Ok(vec![LStmt::Expr(call)]);
                        }
                        Ok(vec![LStmt::Expr(self.dynamic_call(c, &ct, "__setitem__", args))])
                    }
                }
            }
            ExprKind::Tuple(items) => {
                let mut out = Vec::new();
                let mut places = Vec::with_capacity(items.len());
                for item in items {
                    let ExprKind::Name(n) = &item.node.kind else {
                        return Err(CompileError::unsupported("tuple targets must be names", item.span));
                    };
                    let Some(sym) = table.binding(item.node.id) else {
                        return Err(CompileError::unresolved(n, item.span));
                    };
                    if !self.is_local(sym) {
                        places.push(LPlace::Global(table.qualified_name(sym)));
                        continue;
                    }
                    if self.frame.declared.insert(sym) {
                        out.push(LStmt::Declare { name: n.clone(), ty: self.symbol_type(sym), init: None });
                    }
                    places.push(LPlace::Local(n.clone()));
                }
                out.push(LStmt::Unpack { targets: places, value });
                Ok(out)
            }
            _ => Err(CompileError::unsupported("invalid assignment target", target.span)),
        }
    }

    /// Field slot `object.attr` and its type, when statically known.
    fn field_place(&self, object: LExpr, ot: &Type, attr: &str) -> Option<(LPlace, Type)> {
        let class = ot.class_name()?;
        let repr = self.shapes.repr_of(class);
        let field = |f: SymbolId| self.table.symbol(f).kind == SymbolKind::Field;
        match self.typed.member(class, attr) {
            Member::Local(f) if field(f) => {
                Some((LPlace::Field { object, field: attr.to_string(), repr }, self.symbol_type(f)))
            }
            Member::Downcast { class: sub, symbol } if field(symbol) => {
                let object = LExpr::Downcast { value: object.boxed(), class: self.qualified(sub) };
                Some((LPlace::Field { object, field: attr.to_string(), repr: Repr::Reference }, self.symbol_type(symbol)))
            }
            Member::External(key) if self.external_kind(&key) == Some(ExternalKind::Field) => {
                let ty = self.typed.externals.get(&key).map_or(Type::Dynamic, |e| self.slot(&e.ty));
                Some((LPlace::Field { object, field: attr.to_string(), repr }, ty))
            }
            _ => None,
        }
    }

    // ---- loops ------------------------------------------------------------

    fn for_loop(
        &mut self,
        target: &Node,
        iterable: &Node,
        body: &[Spanned<Stmt>],
        out: &mut Vec<LStmt>,
    ) -> Result<(), CompileError> {
        let table = self.table;
        let names: Vec<&Node> = match &target.node.kind {
            ExprKind::Tuple(items) => items.iter().collect(),
            _ => vec![target],
        };
        let mut syms = Vec::with_capacity(names.len());
        for n in &names {
            match table.binding(n.node.id) {
                Some(sym) if n.node.name().is_some() => syms.push(sym),
                _ => return Err(CompileError::unsupported("loop targets must be names", n.span)),
            }
        }

        let declare = syms.iter().all(|s| self.is_local(*s) && !self.frame.declared.contains(s));
        if !declare {
            for s in &syms {
                if self.is_local(*s) && self.frame.declared.insert(*s) {
                    let sym = table.symbol(*s);
                    out.push(LStmt::Declare { name: sym.name.clone(), ty: self.symbol_type(*s), init: None });
                }
            }
        }
        let vars: Vec<LPlace> = syms
            .iter()
            .map(|s| {
                if self.is_local(*s) {
                    LPlace::Local(table.symbol(*s).name.clone())
                } else {
                    LPlace::Global(table.qualified_name(*s))
                }
            })
            .collect();
        if declare {
            self.frame.declared.extend(syms.iter().copied());
        }

        let it = self.type_of(iterable);
        let is_range = matches!(&iterable.node.kind, ExprKind::Call { func, .. }
            if table.binding(func.node.id).and_then(|s| table.builtin(s)) == Some(Builtin::Range));

        let lowered = if is_range && vars.len() == 1 {
            let LExpr::Range { start, stop, step } = self.expr(iterable)? else {
                return Err(CompileError::internal("range call did not lower to a range"));
            };
            let body = self.block(body)?;
            let var = vars.into_iter().next().unwrap_or(LPlace::Local(String::new()));
            LStmt::ForRange { var, start: *start, stop: *stop, step: *step, body, declare }
        } else {
            let (iterable, elem) = self.iteration(iterable, &it)?;
            let elem = match syms.as_slice() {
                [only] => self.symbol_type(*only),
                _ => elem,
            };
            let body = self.block(body)?;
            LStmt::ForEach { vars, elem, iterable, body, declare }
        };
        if declare {
            for s in &syms {
                self.frame.declared.remove(s);
            }
        }
        out.push(lowered);
        Ok(())
    }

    /// Iterable expression and element type for a `for` loop.
    fn iteration(&mut self, iterable: &Node, it: &Type) -> Result<(LExpr, Type), CompileError> {
        let v = self.expr(iterable)?;
        match (it.head(), it) {
            (Some(Head::Dict), _) => {
                let keys = LExpr::ContainerCall {
                    receiver: v.boxed(),
                    kind: ContainerKind::Dict,
                    of: it.clone(),
                    method: "keys".to_string(),
                    args: Vec::new(),
                };
                Ok((keys, elem_slot(it.arg(0))))
            }
            (Some(Head::Class(class)), _) => {
                let class = class.clone();
                match self.invoke(v, &class, "__iter__", Vec::new()) {
                    Some((call, t)) => {
                        let elem = elem_slot(t.element_type());
                        Ok((call, elem))
                    }
                    None => Err(CompileError::unsupported(format!("'{it}' is not iterable"), iterable.span)),
                }
            }
            (Some(_), _) => Ok((v, elem_slot(it.element_type()))),
            (None, Type::Dynamic) => {
                let list = Type::list(Type::Dynamic);
                Ok((LExpr::Unbox { value: v.boxed(), to: list }, Type::Dynamic))
            }
            (None, t) if t.scalar() == Some(crate::types::ScalarKind::Str) => {
                let chars = LExpr::ContainerCall {
                    receiver: v.boxed(),
                    kind: ContainerKind::Str,
                    of: Type::str(),
                    method: "chars".to_string(),
                    args: Vec::new(),
                };
                Ok((chars, Type::str()))
            }
            _ => Err(CompileError::unsupported(format!("'{it}' is not iterable"), iterable.span)),
        }
    }

    // ---- raise, with, del -------------------------------------------------

    fn raise(&mut self, value: Option<&Node>) -> Result<LStmt, CompileError> {
        let Some(value) = value else { return Ok(LStmt::Rethrow) };
        let table = self.table;
        let builtin_of = |e: &Node| table.binding(e.node.id).and_then(|s| table.builtin(s)).filter(|b| b.is_exception());
        match &value.node.kind {
            ExprKind::Call { func, args } if builtin_of(func).is_some() => {
                let exception = builtin_of(func).map_or("Exception", Builtin::runtime_exception).to_string();
                let mut texts = Vec::with_capacity(args.len());
                for a in args {
                    let t = self.type_of(a);
                    let v = self.expr(a)?;
                    texts.push(self.text(v, &t));
                }
                let mut texts = texts.into_iter();
                let message = texts.next();
                Ok(LStmt::Throw { exception, message, args: texts.collect() })
            }
            ExprKind::Name(_) if builtin_of(value).is_some() => {
                let exception = builtin_of(value).map_or("Exception", Builtin::runtime_exception).to_string();
                Ok(LStmt::Throw { exception, message: None, args: Vec::new() })
            }
            _ => {
                let t = self.type_of(value);
                let v = self.expr(value)?;
                let message = Some(self.text(v, &t));
                Ok(LStmt::Throw { exception: "Exception".to_string(), message, args: Vec::new() })
            }
        }
    }

    fn with_block(
        &mut self,
        context: &Node,
        binding: Option<&Spanned<String>>,
        body: &[Spanned<Stmt>],
    ) -> Result<LStmt, CompileError> {
        let ct = self.type_of(context);
        let init = self.expr(context)?;
        let (repr, enter) = match ct.class_name() {
            Some(class) => {
                let enter = !matches!(self.typed.member(class, "__enter__"), Member::Missing | Member::Ambiguous);
                (self.shapes.repr_of(class), enter)
            }
            None => {
                if ct.is_dynamic() {
                    self.dynamic.note("__enter__", 0);
                    self.dynamic.note("__exit__", 0);
                }
                (Repr::Reference, ct.is_dynamic())
            }
        };
        let (name, sym) = match binding {
            Some(b) => (b.node.clone(), self.local_named(&b.node)),
            None => (self.temp("scope"), None),
        };
        let fresh = sym.is_some_and(|s| self.frame.declared.insert(s));
        let body = self.block(body)?;
        if fresh && let Some(s) = sym {
            self.frame.declared.remove(&s);
        }
        Ok(LStmt::Scoped { name, ty: self.slot(&ct), init, repr, enter, body })
    }

    fn local_named(&self, name: &str) -> Option<SymbolId> {
        let scope = self.frame.scope?;
        self.table.scope(scope).names.get(name).copied()
    }

    fn delete(&mut self, target: &Node) -> Result<Option<LStmt>, CompileError> {
        match &target.node.kind {
            ExprKind::Subscript { value, index } => {
                let ct = self.type_of(value);
                let c = self.expr(value)?;
                match ct.head() {
                    Some(Head::Dict | Head::Set) => {
                        let key = self.expr_as(index, &elem_slot(ct.arg(0)))?;
                        Ok(Some(LStmt::DelItem { container: c, key, is_dict: true }))
                    }
                    Some(Head::List) => {
                        let i = self.position(c.clone(), index)?;
                        Ok(Some(LStmt::DelItem { container: c, key: i, is_dict: false }))
                    }
                    _ => {
                        let it = self.type_of(index);
                        let i = self.expr(index)?;
                        let call = self.dynamic_call(c, &ct, "__delitem__", vec![(i, it)]);
                        Ok(Some(LStmt::Expr(call)))
                    }
                }
            }
            ExprKind::Name(_) => Ok(None),
            _ => Err(CompileError::unsupported("only names and subscripts can be deleted", target.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use crate::infer::{Engine, InferOptions};
    use crate::lower::ir::*;
    use crate::lower::shapes::Shapes;
    use crate::lower::{dispatch, lower_module, LowerOptions, Lowered};
    use crate::parser::parse_module;
    use crate::resolve::{resolve, Interfaces};

    fn lower(src: &str) -> Lowered {
        let module = Box::leak(Box::new(parse_module(src, "m").unwrap()));
        let table = resolve(module, &Interfaces::new()).unwrap();
        let mut engine = Engine::new(module, table, InferOptions::default());
        for _ in 0..4 {
            engine.run();
            let ev = dispatch::operator_evidence(&engine);
            if engine.add_evidence(ev) == 0 {
                break;
            }
        }
        let typed = engine.finish();
        let shapes = Shapes::decide(&typed.table, &typed.facts, &typed.externals, &HashMap::new(), &HashSet::new());
        lower_module(&typed, &shapes, &LowerOptions::default()).unwrap()
    }

    fn body(l: &Lowered) -> &[LStmt] {
        &l.module.functions[0].body
    }

    #[test]
    fn range_loop_becomes_counted_loop() {
        let l = lower("def f(n):\n    t = 0\n    for i in range(n):\n        t += i\n    return t\nf(3)\n");
        assert!(body(&l).iter().any(|s| matches!(s, LStmt::ForRange { declare: true, .. })));
    }

    #[test]
    fn dict_iteration_walks_keys() {
        let l = lower("def f(d):\n    for k in d:\n        print(k)\nf({'a': 1})\n");
        let LStmt::ForEach { iterable, .. } = &body(&l)[0] else { panic!("loop expected") };
        assert!(matches!(iterable, LExpr::ContainerCall { method, kind: ContainerKind::Dict, .. } if method == "keys"));
    }

    #[test]
    fn tuple_assignment_unpacks() {
        let l = lower("def f():\n    a, b = 1, 2\n    a, b = b, a\n    return a\nf()\n");
        let unpacks = body(&l).iter().filter(|s| matches!(s, LStmt::Unpack { .. })).count();
        assert_eq!(unpacks, 2);
        let declares = body(&l).iter().filter(|s| matches!(s, LStmt::Declare { .. })).count();
        assert_eq!(declares, 2);
    }

    #[test]
    fn builtin_raise_uses_runtime_exception() {
        let l = lower("def f(x):\n    if x < 0:\n        raise KeyError('negative')\n    return x\nf(1)\n");
        let LStmt::If { then, .. } = &body(&l)[0] else { panic!("if expected") };
        assert!(matches!(&then[0], LStmt::Throw { exception, message: Some(_), .. } if exception == "ValueError"));
    }

    #[test]
    fn bare_raise_rethrows() {
        let l = lower("def f():\n    raise\nf()\n");
        assert!(matches!(body(&l)[0], LStmt::Rethrow));
    }

    #[test]
    fn statically_false_branch_is_dropped() {
        let l = lower("def f(x):\n    if isinstance(x, str):\n        return 1\n    return 2\nf(3)\n");
        assert!(matches!(body(&l)[0], LStmt::Return(Some(LExpr::Int(2)))));
    }

    #[test]
    fn dict_delete() {
        let l = lower("def f():\n    d = {'a': 1}\n    del d['a']\n    return d\nf()\n");
        assert!(body(&l).iter().any(|s| matches!(s, LStmt::DelItem { is_dict: true, .. })));
    }
}
