//! Calls: functions, constructors, methods, builtins and `math`.

use crate::diagnostics::{CompileError, DiagnosticKind};
use crate::infer::expr::Member;
use crate::infer::ExternalKind;
use crate::parser::ast::ExprKind;
use crate::resolve::builtins::{math_member, Builtin, MathMember};
use crate::resolve::scope::{SymbolId, SymbolKind};
use crate::resolve::BaseRef;
use crate::span::Span;
use crate::types::{ClassHierarchy, Head, ScalarKind, Type};

use super::expr::{container_kind, elem_slot, Node};
use super::ir::*;
use super::Lowerer;

impl<'a, 'm> Lowerer<'a, 'm> {
    pub(super) fn call(&mut self, e: &Node, func: &Node, args: &[Node]) -> Result<LExpr, CompileError> {
        let table = self.table;
        match &func.node.kind {
            ExprKind::Name(n) => {
                let Some(sym) = table.binding(func.node.id) else {
                    return Err(CompileError::unresolved(n, func.span));
                };
                let s = table.symbol(sym);
                match s.kind {
                    SymbolKind::Builtin => match table.builtin(sym) {
                        Some(b) => self.builtin_call(e, b, args),
                        None => Err(CompileError::unresolved(n, func.span)),
                    },
                    SymbolKind::Class => self.construct(sym, args),
                    SymbolKind::Function => {
                        let params = self.param_types(sym);
                        let args = self.args(args, &params)?;
                        Ok(LExpr::Call { callee: Callee::Function(table.qualified_name(sym)), args })
                    }
                    SymbolKind::Imported => match &s.origin {
                        Some((module, member)) if module == "math" => self.math_call(member, args, e.span),
                        Some((module, member)) => self.external_call(&format!("{module}.{member}"), args),
                        None => Err(CompileError::unresolved(n, func.span)),
                    },
                    SymbolKind::Module => Err(CompileError::unsupported(format!("'{n}' cannot be called"), func.span)),
                    _ => self.value_call(func, args),
                }
            }
            ExprKind::Attribute { value, attr } => self.attribute_call(e, value, &attr.node, args),
            _ => self.value_call(func, args),
        }
    }

    /// Arguments converted to the callee's parameter types.
    fn args(&mut self, args: &[Node], params: &[Type]) -> Result<Vec<LExpr>, CompileError> {
        args.iter()
            .enumerate()
            .map(|(i, a)| match params.get(i) {
                Some(p) => self.expr_as(a, p),
                None => self.expr(a),
            })
            .collect()
    }

    fn typed_args(&mut self, args: &[Node]) -> Result<Vec<(LExpr, Type)>, CompileError> {
        args.iter().map(|a| Ok((self.expr(a)?, self.type_of(a)))).collect()
    }

    fn coerce_args(&mut self, args: Vec<(LExpr, Type)>, params: &[Type]) -> Vec<LExpr> {
        args.into_iter()
            .enumerate()
            .map(|(i, (v, t))| match params.get(i) {
                Some(p) => self.coerce(v, &t, p),
                None => v,
            })
            .collect()
    }

    fn construct(&mut self, class: SymbolId, args: &[Node]) -> Result<LExpr, CompileError> {
        let table = self.table;
        let q = self.qualified(class);
        let params = match table.lookup_method(class, "__init__") {
            Some(init) => self.param_types(init),
            None => table
                .ancestors(&q)
                .iter()
                .find_map(|a| {
                    self.typed.externals.get(a).filter(|e| e.kind == ExternalKind::Class).map(|_| self.external_params(a))
                })
                .unwrap_or_default(),
        };
        let args = self.args(args, &params)?;
        Ok(LExpr::Construct { repr: self.shapes.repr_of(&q), class: q, args })
    }

    fn external_call(&mut self, key: &str, args: &[Node]) -> Result<LExpr, CompileError> {
        let params = self.external_params(key);
        let args = self.args(args, &params)?;
        Ok(match self.external_kind(key) {
            Some(ExternalKind::Class) => {
                LExpr::Construct { class: key.to_string(), repr: self.shapes.repr_of(key), args }
            }
            _ => LExpr::Call { callee: Callee::Function(key.to_string()), args },
        })
    }

    /// Call of a function-typed value, or of a dynamic callable.
    fn value_call(&mut self, func: &Node, args: &[Node]) -> Result<LExpr, CompileError> {
        let ft = self.type_of(func);
        let f = self.expr(func)?;
        match &ft {
            Type::Function(params, _) => {
                let params: Vec<Type> = params.iter().map(|p| self.slot(p)).collect();
                let args = self.args(args, &params)?;
                Ok(LExpr::Call { callee: Callee::Value(f.boxed()), args })
            }
            Type::Dynamic => {
                let args = self.typed_args(args)?;
                Ok(self.dynamic_call(f, &ft, "__call__", args))
            }
            other => Err(CompileError::unsupported(format!("value of type '{other}' is not callable"), func.span)),
        }
    }

    fn attribute_call(&mut self, e: &Node, value: &Node, attr: &str, args: &[Node]) -> Result<LExpr, CompileError> {
        if let Some(module) = self.module_of(value) {
            if module == "math" {
                return self.math_call(attr, args, e.span);
            }
            return self.external_call(&format!("{module}.{attr}"), args);
        }
        if let Some(class) = self.class_named(value) {
            return self.class_method_call(class, attr, args, e.span);
        }
        if let Some(key) = self.external_class_named(value) {
            let rest = self.receiver_args(args)?;
            let params = self.external_params(&format!("{key}.{attr}"));
            let rest = self.coerce_args(rest, &params);
            return Ok(LExpr::BaseCall { base: key, method: attr.to_string(), args: rest });
        }
        if self.is_super_call(value) {
            let Some(base) = self.first_base() else {
                return Err(CompileError::unsupported("super() used outside a derived class", value.span));
            };
            let args = self.typed_args(args)?;
            let params = self.base_method_params(&base, attr);
            let args = self.coerce_args(args, &params);
            return Ok(LExpr::BaseCall { base, method: attr.to_string(), args });
        }

        let vt = self.type_of(value);
        let v = self.expr(value)?;
        let args = self.typed_args(args)?;
        if let Some(class) = vt.class_name().map(str::to_string) {
            return self.instance_call(e.span, v, &vt, &class, attr, args);
        }
        if let Some(kind) = container_kind(&vt) {
            return Ok(self.container_call(v, &vt, kind, attr, args));
        }
        Ok(self.dynamic_call(v, &vt, attr, args))
    }

    /// Arguments of `Base.method(self, ...)` without the receiver.
    fn receiver_args(&mut self, args: &[Node]) -> Result<Vec<(LExpr, Type)>, CompileError> {
        match args.split_first() {
            Some((first, rest)) if self.is_self(first) => self.typed_args(rest),
            _ => Err(CompileError::unsupported(
                "base class method must be called with 'self' as first argument",
                args.first().map_or(Span::dummy(), |a| a.span),
            )),
        }
    }

    pub(super) fn is_self(&self, e: &Node) -> bool {
        self.frame.self_sym.is_some() && self.table.binding(e.node.id) == self.frame.self_sym
    }

    pub(super) fn is_super_call(&self, e: &Node) -> bool {
        let ExprKind::Call { func, .. } = &e.node.kind else { return false };
        self.table.binding(func.node.id).and_then(|s| self.table.builtin(s)) == Some(Builtin::Super)
    }

    /// Qualified name of the first base of the class being lowered.
    pub(super) fn first_base(&self) -> Option<String> {
        let info = self.table.class(self.frame.class?)?;
        info.bases.first().map(|b| match b {
            BaseRef::Local(id) => self.qualified(*id),
            BaseRef::External(key) => key.clone(),
        })
    }

    fn base_method_params(&self, base: &str, method: &str) -> Vec<Type> {
        match self.table.class_by_name(base).and_then(|c| self.table.lookup_method(c.symbol, method)) {
            Some(m) => self.param_types(m),
            None => self.external_params(&format!("{base}.{method}")),
        }
    }

    /// `Class.method(...)`: a static call, an explicit base call on `self`,
    /// or an unbound call on the first argument.
    fn class_method_call(&mut self, class: SymbolId, attr: &str, args: &[Node], span: Span) -> Result<LExpr, CompileError> {
        let table = self.table;
        let q = self.qualified(class);
        let Some(m) = table.lookup_method(class, attr) else {
            return Err(CompileError::unsupported(format!("'{q}' has no method '{attr}'"), span));
        };
        let owner = table.symbol(m).owner.map_or_else(|| q.clone(), |o| self.qualified(o));
        let params = self.param_types(m);
        if table.function(m).is_some_and(|f| f.is_static) {
            let args = self.args(args, &params)?;
            return Ok(LExpr::StaticCall { class: owner, method: attr.to_string(), args });
        }
        let Some((first, rest)) = args.split_first() else {
            return Err(CompileError::unsupported(format!("'{q}.{attr}' needs an instance argument"), span));
        };
        let rest = self.args(rest, &params)?;
        if self.is_self(first) {
            return Ok(LExpr::BaseCall { base: owner, method: attr.to_string(), args: rest });
        }
        let target = self.class_type(&q);
        let receiver = self.expr_as(first, &target)?;
        Ok(LExpr::MethodCall { receiver: receiver.boxed(), method: attr.to_string(), args: rest, repr: self.shapes.repr_of(&q) })
    }

    /// Call `method` on a value of class `class` when it resolves to a
    /// method. Returns the call and its settled result type.
    pub(super) fn invoke(
        &mut self,
        receiver: LExpr,
        class: &str,
        method: &str,
        args: Vec<(LExpr, Type)>,
    ) -> Option<(LExpr, Type)> {
        let table = self.table;
        let (receiver, member, repr) = self.dunder(receiver, class, method)?;
        let params = self.member_params(&member);
        let ret = self.member_return(&member);
        let args = self.coerce_args(args, &params);
        if let Member::Local(m) = &member
            && table.function(*m).is_some_and(|f| f.is_static)
        {
            let owner = table.symbol(*m).owner.map_or_else(|| class.to_string(), |o| self.qualified(o));
            return Some((LExpr::StaticCall { class: owner, method: method.to_string(), args }, ret));
        }
        Some((LExpr::MethodCall { receiver: receiver.boxed(), method: method.to_string(), args, repr }, ret))
    }

    fn instance_call(
        &mut self,
        span: Span,
        v: LExpr,
        vt: &Type,
        class: &str,
        attr: &str,
        args: Vec<(LExpr, Type)>,
    ) -> Result<LExpr, CompileError> {
        if let Some((call, _)) = self.invoke(v.clone(), class, attr, args.clone()) {
            return Ok(call);
        }
        let member = self.typed.member(class, attr);
        let field_ty = match &member {
            Member::Local(f) | Member::Downcast { symbol: f, .. } => Some(self.table.symbol(*f).ty.clone()),
            Member::External(key) => self.typed.externals.get(key).map(|e| e.ty.clone()),
            Member::Ambiguous | Member::Missing => None,
        };
        if let Some(ft) = field_ty {
            let field = self.member_access(span, v, vt, attr)?;
            return match ft {
                Type::Function(params, _) => {
                    let params: Vec<Type> = params.iter().map(|p| self.slot(p)).collect();
                    let args = self.coerce_args(args, &params);
                    Ok(LExpr::Call { callee: Callee::Value(field.boxed()), args })
                }
                _ => Ok(self.dynamic_call(field, &Type::Dynamic, "__call__", args)),
            };
        }
        self.warn(
            DiagnosticKind::AmbiguousAttribute,
            format!("method '{attr}' of '{vt}' cannot be resolved statically"),
            span,
        );
        Ok(self.dynamic_call(v, vt, attr, args))
    }

    /// Methods of the runtime list, dict, set, tuple and string types.
    fn container_call(
        &mut self,
        v: LExpr,
        vt: &Type,
        kind: ContainerKind,
        method: &str,
        args: Vec<(LExpr, Type)>,
    ) -> LExpr {
        let elem = match kind {
            ContainerKind::Str => Type::str(),
            _ => elem_slot(vt.arg(0)),
        };
        let value = elem_slot(vt.arg(1));
        let params: Vec<Type> = match (kind, method) {
            (ContainerKind::List, "append" | "remove" | "index" | "count") => vec![elem],
            (ContainerKind::List, "insert") => vec![Type::int(), elem],
            (ContainerKind::List, "pop") => vec![Type::int()],
            (ContainerKind::List, "extend") => vec![vt.clone()],
            (ContainerKind::Dict, "get" | "setdefault") => vec![elem, value],
            (ContainerKind::Dict, "pop") => vec![elem],
            (ContainerKind::Set, "add" | "remove" | "discard") => vec![elem],
            (ContainerKind::Str, _) => args.iter().map(|(_, t)| if t.scalar().is_some() { t.clone() } else { Type::str() }).collect(),
            _ => Vec::new(),
        };
        let args = self.coerce_args(args, &params);
        LExpr::ContainerCall { receiver: v.boxed(), kind, of: vt.clone(), method: method.to_string(), args }
    }

    fn math_call(&mut self, name: &str, args: &[Node], span: Span) -> Result<LExpr, CompileError> {
        match math_member(name) {
            Some(MathMember::FloatFn(func)) => {
                let params = vec![Type::float(); args.len()];
                let args = self.args(args, &params)?;
                Ok(LExpr::Math { func: func.to_string(), args })
            }
            Some(MathMember::IntFn(func)) if name == "gcd" => {
                let params = vec![Type::int(); args.len()];
                let args = self.args(args, &params)?;
                Ok(LExpr::Math { func: func.to_string(), args })
            }
            Some(MathMember::IntFn(func)) => {
                let params = vec![Type::float(); args.len()];
                let args = self.args(args, &params)?;
                let value = LExpr::Math { func: func.to_string(), args };
                Ok(LExpr::Cast { to: Type::int(), from: Type::float(), value: value.boxed() })
            }
            Some(MathMember::Constant(_)) => Err(CompileError::unsupported(format!("math.{name} is not callable"), span)),
            None => Err(CompileError::unsupported(format!("math.{name} is not supported"), span)),
        }
    }

    // ---- builtins ---------------------------------------------------------

    fn builtin_call(&mut self, e: &Node, builtin: Builtin, args: &[Node]) -> Result<LExpr, CompileError> {
        let result = self.type_of(e);
        match builtin {
            Builtin::Print => {
                self.uses_print = true;
                let mut parts = Vec::with_capacity(args.len());
                for a in args {
                    let t = self.type_of(a);
                    let v = self.expr(a)?;
                    parts.push(self.text(v, &t));
                }
                Ok(LExpr::Print(parts))
            }
            Builtin::Len => {
                let [arg] = args else { return Err(arity(e, "len", 1)) };
                let t = self.type_of(arg);
                let v = self.expr(arg)?;
                if let Some(class) = t.class_name().map(str::to_string)
                    && let Some((call, _)) = self.invoke(v.clone(), &class, "__len__", Vec::new())
                {
                    return Ok(call);
                }
                if t.is_dynamic() {
                    let call = self.dynamic_call(v, &t, "__len__", Vec::new());
                    return Ok(LExpr::Unbox { value: call.boxed(), to: Type::int() });
                }
                Ok(LExpr::Builtin { func: BuiltinFn::Len, args: vec![v] })
            }
            Builtin::Range => {
                let ints = vec![Type::int(); args.len()];
                let mut lowered = self.args(args, &ints)?.into_iter();
                let (start, stop, step) = match args.len() {
                    1 => (LExpr::Int(0), lowered.next(), LExpr::Int(1)),
                    2 => {
                        let start = lowered.next().unwrap_or(LExpr::Int(0));
                        (start, lowered.next(), LExpr::Int(1))
                    }
                    3 => {
                        let start = lowered.next().unwrap_or(LExpr::Int(0));
                        let stop = lowered.next();
                        (start, stop, lowered.next().unwrap_or(LExpr::Int(1)))
                    }
                    _ => return Err(arity(e, "range", 3)),
                };
                let stop = stop.unwrap_or(LExpr::Int(0));
                Ok(LExpr::Range { start: start.boxed(), stop: stop.boxed(), step: step.boxed() })
            }
            Builtin::Int | Builtin::Float => {
                let (to, zero, dunder) = if builtin == Builtin::Int {
                    (Type::int(), LExpr::Int(0), "__int__")
                } else {
                    (Type::float(), LExpr::Float(0.0), "__float__")
                };
                let Some(arg) = args.first() else { return Ok(zero) };
                let from = self.type_of(arg);
                let v = self.expr(arg)?;
                if let Some(class) = from.class_name().map(str::to_string)
                    && let Some((call, _)) = self.invoke(v.clone(), &class, dunder, Vec::new())
                {
                    return Ok(call);
                }
                Ok(match &from {
                    t if *t == to => v,
                    Type::Dynamic => self.coerce(v, &from, &to),
                    _ => LExpr::Cast { to, from, value: v.boxed() },
                })
            }
            Builtin::Bool => match args.first() {
                Some(arg) => self.condition(arg),
                None => Ok(LExpr::Bool(false)),
            },
            Builtin::Str => match args.first() {
                Some(arg) => {
                    let t = self.type_of(arg);
                    let v = self.expr(arg)?;
                    Ok(self.text(v, &t))
                }
                None => Ok(LExpr::Str(String::new())),
            },
            Builtin::Repr => {
                let [arg] = args else { return Err(arity(e, "repr", 1)) };
                let t = self.type_of(arg);
                let v = self.expr(arg)?;
                if let Some(class) = t.class_name().map(str::to_string)
                    && let Some((call, _)) = self.invoke(v.clone(), &class, "__repr__", Vec::new())
                {
                    return Ok(call);
                }
                if t.is_dynamic() {
                    let call = self.dynamic_call(v, &t, "__repr__", Vec::new());
                    return Ok(LExpr::Unbox { value: call.boxed(), to: Type::str() });
                }
                Ok(LExpr::Builtin { func: BuiltinFn::Repr, args: vec![v] })
            }
            Builtin::Abs => {
                let [arg] = args else { return Err(arity(e, "abs", 1)) };
                let t = self.type_of(arg);
                let v = self.expr(arg)?;
                if let Some(class) = t.class_name().map(str::to_string)
                    && let Some((call, _)) = self.invoke(v.clone(), &class, "__abs__", Vec::new())
                {
                    return Ok(call);
                }
                Ok(LExpr::Builtin { func: BuiltinFn::Abs, args: vec![v] })
            }
            Builtin::Min | Builtin::Max | Builtin::Sum => {
                let func = match builtin {
                    Builtin::Min => BuiltinFn::Min,
                    Builtin::Max => BuiltinFn::Max,
                    _ => BuiltinFn::Sum,
                };
                let lowered = if args.len() > 1 && result.scalar().is_some() {
                    let params = vec![result.clone(); args.len()];
                    self.args(args, &params)?
                } else {
                    self.args(args, &[])?
                };
                Ok(LExpr::Builtin { func, args: lowered })
            }
            Builtin::List | Builtin::Set | Builtin::Sorted => {
                let elem = elem_slot(result.arg(0));
                let into = if builtin == Builtin::Set { ContainerKind::Set } else { ContainerKind::List };
                match args.first() {
                    None if builtin == Builtin::Sorted => Err(arity(e, "sorted", 1)),
                    None if builtin == Builtin::List => Ok(LExpr::List { elem, items: Vec::new() }),
                    None => Ok(LExpr::Set { elem, items: Vec::new() }),
                    Some(arg) => {
                        let from = self.type_of(arg);
                        let v = self.expr(arg)?;
                        let source = if from.is_dynamic() {
                            LExpr::Unbox { value: v.boxed(), to: Type::list(Type::Dynamic) }
                        } else {
                            v
                        };
                        let sorted = builtin == Builtin::Sorted;
                        Ok(LExpr::Collect { into, elem, source: source.boxed(), from, sorted })
                    }
                }
            }
            Builtin::Dict => match args.first() {
                None => Ok(LExpr::Dict { key: elem_slot(result.arg(0)), value: elem_slot(result.arg(1)), entries: Vec::new() }),
                Some(arg) => {
                    let of = self.type_of(arg);
                    let v = self.expr(arg)?;
                    Ok(LExpr::ContainerCall {
                        receiver: v.boxed(),
                        kind: ContainerKind::Dict,
                        of,
                        method: "copy".to_string(),
                        args: Vec::new(),
                    })
                }
            },
            Builtin::Tuple => match args.first() {
                Some(arg) => self.expr(arg),
                None => Ok(LExpr::Tuple(Vec::new())),
            },
            Builtin::IsInstance => self.isinstance(e, args),
            Builtin::HasAttr => {
                let [subject, name] = args else { return Err(arity(e, "hasattr", 2)) };
                let ExprKind::Str(attr) = &name.node.kind else {
                    return Err(CompileError::unsupported("hasattr needs a literal attribute name", name.span));
                };
                let t = self.type_of(subject);
                let found = t.class_name().is_some_and(|c| {
                    !matches!(self.typed.member(c, attr), Member::Missing | Member::Ambiguous)
                });
                Ok(LExpr::StaticBool(found))
            }
            Builtin::GetAttr => {
                let [subject, name] = args else { return Err(arity(e, "getattr", 2)) };
                let ExprKind::Str(attr) = &name.node.kind else {
                    return Err(CompileError::unsupported("getattr needs a literal attribute name", name.span));
                };
                let t = self.type_of(subject);
                let v = self.expr(subject)?;
                self.member_access(e.span, v, &t, attr)
            }
            Builtin::Type => Err(CompileError::unsupported("type() is only supported in comparisons", e.span)),
            Builtin::Super => match self.frame.class {
                Some(class) => {
                    let q = self.qualified(class);
                    Ok(self.self_ref(&q))
                }
                None => Err(CompileError::unsupported("super() used outside a method", e.span)),
            },
            b if b.is_exception() => {
                Err(CompileError::unsupported("exception objects can only be raised", e.span))
            }
            Builtin::Object => Err(CompileError::unsupported("object() cannot be instantiated", e.span)),
            _ => Ok(LExpr::Null),
        }
    }

    fn isinstance(&mut self, e: &Node, args: &[Node]) -> Result<LExpr, CompileError> {
        let table = self.table;
        let [subject, classes] = args else { return Err(arity(e, "isinstance", 2)) };
        if let Some(of) = self.type_call_arg(classes) {
            return self.same_class(subject, of);
        }
        let names: Vec<String> = match &classes.node.kind {
            ExprKind::Tuple(items) => items.iter().filter_map(|i| i.node.dotted_path()).collect(),
            _ => classes.node.dotted_path().into_iter().collect(),
        };
        if names.is_empty() {
            return Err(CompileError::unsupported("isinstance needs class names or type(...)", classes.span));
        }
        let st = self.type_of(subject);
        let resolved: Vec<String> = names.iter().map(|n| self.resolve_class_path(n)).collect();

        if let Some(class) = st.class_name().map(str::to_string) {
            if resolved.iter().any(|n| table.is_subclass(&class, n)) {
                return Ok(LExpr::StaticBool(true));
            }
            return match self.shapes.hierarchy_of(&class).cloned() {
                Some(h) => {
                    let v = self.expr(subject)?;
                    Ok(LExpr::IsInstance {
                        value: v.boxed(),
                        test: TagTest::Classes(self.expand_classes(&names)),
                        root: h.root,
                        open: h.open,
                    })
                }
                None => Ok(LExpr::StaticBool(false)),
            };
        }
        if st.is_dynamic() {
            let v = self.expr(subject)?;
            return Ok(LExpr::IsInstance {
                value: v.boxed(),
                test: TagTest::Classes(self.expand_classes(&names)),
                root: String::new(),
                open: true,
            });
        }
        Ok(LExpr::StaticBool(names.iter().any(|n| builtin_type_matches(n, &st))))
    }
}

/// `isinstance(x, int)` and friends on a statically typed `x`.
fn builtin_type_matches(name: &str, t: &Type) -> bool {
    match (name, t.scalar(), t.head()) {
        ("int", Some(ScalarKind::Int | ScalarKind::Bool), _) => true,
        ("float", Some(ScalarKind::Float), _) => true,
        ("str", Some(ScalarKind::Str), _) => true,
        ("bool", Some(ScalarKind::Bool), _) => true,
        ("list", _, Some(Head::List)) | ("dict", _, Some(Head::Dict)) => true,
        ("set", _, Some(Head::Set)) | ("tuple", _, Some(Head::Tuple)) => true,
        ("object", ..) => true,
        _ => false,
    }
}

fn arity(e: &Node, name: &str, expected: usize) -> CompileError {
    CompileError::unsupported(format!("{name}() takes {expected} argument(s)"), e.span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_isinstance_on_scalars() {
        assert!(builtin_type_matches("int", &Type::boolean()));
        assert!(builtin_type_matches("float", &Type::float()));
        assert!(!builtin_type_matches("str", &Type::int()));
        assert!(builtin_type_matches("list", &Type::list(Type::int())));
    }
}
