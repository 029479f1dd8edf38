//! Expression typing against the current symbol snapshot.

use crate::infer::operators::{canonical_key, primitive_binary, primitive_unary};
use crate::infer::{Engine, ExternalKind, Externals};
use crate::parser::ast::*;
use crate::resolve::builtins::{math_member, Builtin, MathMember};
use crate::resolve::scope::{SymbolId, SymbolKind};
use crate::resolve::SymbolTable;
use crate::span::Spanned;
use crate::types::{ClassHierarchy, Head, ScalarKind, Type};

/// Where an attribute of a class-typed receiver lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// Defined on the class or one of its local ancestors.
    Local(SymbolId),
    /// Defined only below the receiver's class, in exactly one subclass.
    Downcast { class: SymbolId, symbol: SymbolId },
    /// Provided by a class in another module; the key is the qualified name.
    External(String),
    /// Defined by several unrelated subclasses.
    Ambiguous,
    Missing,
}

impl<'m> Engine<'m> {
    /// Type of expression `id` under the current snapshot, memoised per pass.
    pub fn type_of(&self, id: NodeId) -> Type {
        if let Some(t) = self.memo.borrow().get(&id) {
            return t.clone();
        }
        let Some(expr) = self.index.get(id) else { return Type::Unknown };
        let t = self.compute_type(expr);
        self.memo.borrow_mut().insert(id, t.clone());
        t
    }

    fn compute_type(&self, e: &Spanned<Expr>) -> Type {
        match &e.node.kind {
            ExprKind::Int(_) => Type::int(),
            ExprKind::Float(_) => Type::float(),
            ExprKind::Str(_) => Type::str(),
            ExprKind::Bool(_) => Type::boolean(),
            ExprKind::NoneLit => Type::none(),
            ExprKind::Name(_) => match self.table.binding(e.node.id) {
                Some(sym) => self.name_type(sym),
                None => Type::Dynamic,
            },
            ExprKind::Attribute { value, attr } => self.attribute_type(value, &attr.node),
            ExprKind::Call { func, args } => self.call_type(e.node.id, func, args),
            ExprKind::BinOp { op, left, right } => {
                let l = self.type_of(left.node.id);
                let r = self.type_of(right.node.id);
                self.binary_type(*op, &l, &r)
            }
            ExprKind::UnaryOp { op, operand } => {
                let t = self.type_of(operand.node.id);
                if t.is_unknown() && *op != UnaryOp::Not {
                    return Type::Unknown;
                }
                if let Some(r) = primitive_unary(*op, &t) {
                    return r;
                }
                match (op.dunder(), t.class_name()) {
                    (Some(dunder), Some(class)) => self.method_return(class, dunder),
                    _ => Type::Dynamic,
                }
            }
            ExprKind::BoolOp { .. } | ExprKind::Compare { .. } => Type::boolean(),
            ExprKind::List(items) => Type::list(self.join_all(items)),
            ExprKind::Set(items) => Type::set(self.join_all(items)),
            ExprKind::Tuple(items) => Type::tuple(items.iter().map(|i| self.type_of(i.node.id)).collect()),
            ExprKind::Dict(entries) => {
                let mut k = Type::Unknown;
                let mut v = Type::Unknown;
                for (key, value) in entries {
                    k = k.join(&self.type_of(key.node.id), &self.table);
                    v = v.join(&self.type_of(value.node.id), &self.table);
                }
                Type::dict(k, v)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.type_of(value.node.id);
                self.subscript_type(&container, index)
            }
        }
    }

    fn join_all(&self, items: &[Spanned<Expr>]) -> Type {
        items.iter().fold(Type::Unknown, |acc, i| acc.join(&self.type_of(i.node.id), &self.table))
    }

    fn name_type(&self, sym: SymbolId) -> Type {
        let s = self.table.symbol(sym);
        match s.kind {
            SymbolKind::Variable | SymbolKind::Parameter | SymbolKind::Field => s.ty.clone(),
            SymbolKind::Function | SymbolKind::Method => self.function_type(sym),
            SymbolKind::Imported => match self.imported(sym) {
                Some(ext) if ext.kind == ExternalKind::Function => Type::Function(ext.params.clone(), Box::new(ext.ty.clone())),
                Some(ext) if ext.kind == ExternalKind::Variable => ext.ty.clone(),
                _ => Type::Dynamic,
            },
            SymbolKind::Builtin if s.name == "__name__" => Type::str(),
            SymbolKind::Class | SymbolKind::Module | SymbolKind::Builtin => Type::Dynamic,
        }
    }

    /// `(params) -> ret` for a function or method, receiver excluded.
    pub fn function_type(&self, func: SymbolId) -> Type {
        let params = match self.table.function(func) {
            Some(info) => info.value_params().iter().map(|p| self.table.symbol(*p).ty.clone()).collect(),
            None => Vec::new(),
        };
        Type::Function(params, Box::new(self.table.symbol(func).ty.clone()))
    }

    fn imported(&self, sym: SymbolId) -> Option<&crate::infer::ExternalSymbol> {
        let (module, name) = self.table.symbol(sym).origin.as_ref()?;
        self.externals.get(&format!("{module}.{name}"))
    }

    /// Dotted module path named by `expr`, if it names an imported module.
    pub fn module_of(&self, expr: &Spanned<Expr>) -> Option<String> {
        match &expr.node.kind {
            ExprKind::Name(_) => {
                let sym = self.table.symbol(self.table.binding(expr.node.id)?);
                match (&sym.kind, &sym.origin) {
                    (SymbolKind::Module, Some((module, member))) if member.is_empty() => Some(module.clone()),
                    _ => None,
                }
            }
            ExprKind::Attribute { value, attr } => {
                let base = self.module_of(value)?;
                let candidate = format!("{base}.{}", attr.node);
                self.externals.keys().any(|k| k.starts_with(&format!("{candidate}."))).then_some(candidate)
            }
            _ => None,
        }
    }

    /// Local class named directly by `expr` (`Base` in `Base.__init__`).
    pub fn class_named(&self, expr: &Spanned<Expr>) -> Option<SymbolId> {
        let sym = self.table.binding(expr.node.id)?;
        (self.table.symbol(sym).kind == SymbolKind::Class).then_some(sym)
    }

    /// For a `super()` call node, the first local base of the enclosing class.
    pub fn super_class(&self, call: &Spanned<Expr>) -> Option<SymbolId> {
        let ExprKind::Call { func, .. } = &call.node.kind else { return None };
        let sym = self.table.binding(func.node.id)?;
        if self.table.builtin(sym) != Some(Builtin::Super) {
            return None;
        }
        let class = self.index.class.get(&call.node.id)?;
        self.table.class(*class)?.local_bases().next()
    }

    /// Resolve `attr` on a value of class `qualified`.
    pub fn member(&self, qualified: &str, attr: &str) -> Member {
        resolve_member(&self.table, &self.externals, qualified, attr)
    }

    fn member_value_type(&self, member: &Member) -> Type {
        match member {
            Member::Local(sym) | Member::Downcast { symbol: sym, .. } => self.name_type(*sym),
            Member::External(key) => match self.externals.get(key) {
                Some(ext) if ext.kind == ExternalKind::Method => {
                    Type::Function(ext.params.clone(), Box::new(ext.ty.clone()))
                }
                Some(ext) => ext.ty.clone(),
                None => Type::Dynamic,
            },
            Member::Ambiguous | Member::Missing => Type::Dynamic,
        }
    }

    fn member_call_type(&self, member: &Member) -> Type {
        match member {
            Member::Local(sym) | Member::Downcast { symbol: sym, .. } => {
                let s = self.table.symbol(*sym);
                if s.kind.is_callable() {
                    return s.ty.clone();
                }
                callable_result(&s.ty)
            }
            Member::External(key) => match self.externals.get(key) {
                Some(ext) if ext.kind == ExternalKind::Method => ext.ty.clone(),
                Some(ext) => callable_result(&ext.ty),
                None => Type::Dynamic,
            },
            Member::Ambiguous | Member::Missing => Type::Dynamic,
        }
    }

    /// Return type of `class.method`, or `Dynamic` when it is not defined.
    pub fn method_return(&self, class: &str, method: &str) -> Type {
        match self.member(class, method) {
            m @ (Member::Local(_) | Member::Downcast { .. } | Member::External(_)) => self.member_call_type(&m),
            _ => Type::Dynamic,
        }
    }

    fn attribute_type(&self, value: &Spanned<Expr>, attr: &str) -> Type {
        if let Some(module) = self.module_of(value) {
            if module == "math" {
                return match math_member(attr) {
                    Some(MathMember::Constant(_)) => Type::float(),
                    _ => Type::Dynamic,
                };
            }
            return match self.externals.get(&format!("{module}.{attr}")) {
                Some(ext) if ext.kind == ExternalKind::Variable => ext.ty.clone(),
                Some(ext) if ext.kind == ExternalKind::Function => {
                    Type::Function(ext.params.clone(), Box::new(ext.ty.clone()))
                }
                _ => Type::Dynamic,
            };
        }
        if let Some(class) = self.class_named(value) {
            return match self.table.lookup_member(class, attr) {
                Some(sym) => self.name_type(sym),
                None => Type::Dynamic,
            };
        }
        let receiver = self.type_of(value.node.id);
        match &receiver {
            Type::Unknown => Type::Unknown,
            Type::Nominal(n) => match &n.head {
                Head::Class(class) => self.member_value_type(&self.member(class, attr)),
                _ => Type::Dynamic,
            },
            _ => Type::Dynamic,
        }
    }

    fn call_type(&self, call: NodeId, func: &Spanned<Expr>, args: &[Spanned<Expr>]) -> Type {
        match &func.node.kind {
            ExprKind::Name(_) => {
                let Some(sym) = self.table.binding(func.node.id) else { return Type::Dynamic };
                let s = self.table.symbol(sym);
                match s.kind {
                    SymbolKind::Builtin => match Builtin::lookup(&s.name) {
                        Some(b) => self.builtin_type(b, call, args),
                        None => Type::Dynamic,
                    },
                    SymbolKind::Class => self.table.class_type(sym),
                    SymbolKind::Function | SymbolKind::Method => s.ty.clone(),
                    SymbolKind::Imported => match (self.imported(sym), &s.origin) {
                        (Some(ext), Some((module, name))) if ext.kind == ExternalKind::Class => {
                            Type::class(format!("{module}.{name}"))
                        }
                        (Some(ext), _) => ext.ty.clone(),
                        (None, _) => Type::Dynamic,
                    },
                    SymbolKind::Variable | SymbolKind::Parameter | SymbolKind::Field => callable_result(&s.ty),
                    SymbolKind::Module => Type::Dynamic,
                }
            }
            ExprKind::Attribute { value, attr } => {
                if let Some(module) = self.module_of(value) {
                    if module == "math" {
                        return match math_member(&attr.node) {
                            Some(MathMember::FloatFn(_)) => Type::float(),
                            Some(MathMember::IntFn(_)) => Type::int(),
                            _ => Type::Dynamic,
                        };
                    }
                    let key = format!("{module}.{}", attr.node);
                    return match self.externals.get(&key) {
                        Some(ext) if ext.kind == ExternalKind::Class => Type::class(key),
                        Some(ext) => ext.ty.clone(),
                        None => Type::Dynamic,
                    };
                }
                if let Some(class) = self.class_named(value).or_else(|| self.super_class(value)) {
                    return match self.table.lookup_method(class, &attr.node) {
                        Some(m) => self.table.symbol(m).ty.clone(),
                        None => Type::Dynamic,
                    };
                }
                let receiver = self.type_of(value.node.id);
                match &receiver {
                    Type::Unknown => Type::Unknown,
                    Type::Nominal(n) => match &n.head {
                        Head::Class(class) => self.member_call_type(&self.member(class, &attr.node)),
                        _ => container_method(&receiver, &attr.node),
                    },
                    Type::Scalar(ScalarKind::Str) => container_method(&receiver, &attr.node),
                    _ => Type::Dynamic,
                }
            }
            _ => callable_result(&self.type_of(func.node.id)),
        }
    }

    fn builtin_type(&self, b: Builtin, call: NodeId, args: &[Spanned<Expr>]) -> Type {
        let arg = |i: usize| args.get(i).map_or(Type::Unknown, |a| self.type_of(a.node.id));
        match b {
            Builtin::Print => Type::none(),
            Builtin::Len => Type::int(),
            Builtin::Range => Type::list(Type::int()),
            Builtin::Int => Type::int(),
            Builtin::Float => Type::float(),
            Builtin::Str | Builtin::Repr => Type::str(),
            Builtin::Bool | Builtin::IsInstance | Builtin::HasAttr => Type::boolean(),
            Builtin::Abs => {
                let t = arg(0);
                if t.is_unknown() || t.is_numeric() { primitive_unary(UnaryOp::Neg, &t).unwrap_or(t) } else { Type::Dynamic }
            }
            Builtin::Min | Builtin::Max => {
                if args.len() == 1 {
                    return arg(0).element_type();
                }
                let mut out = Type::Unknown;
                for a in args {
                    let t = self.type_of(a.node.id);
                    if t.is_unknown() {
                        return Type::Unknown;
                    }
                    out = out.join(&t, &self.table);
                }
                out
            }
            Builtin::Sum => match arg(0).element_type() {
                Type::Scalar(ScalarKind::Bool) => Type::int(),
                t => t,
            },
            Builtin::List => match args.first() {
                Some(_) => Type::list(arg(0).element_type()),
                None => Type::list(Type::Unknown),
            },
            Builtin::Sorted => Type::list(arg(0).element_type()),
            Builtin::Set => match args.first() {
                Some(_) => Type::set(arg(0).element_type()),
                None => Type::set(Type::Unknown),
            },
            Builtin::Dict => match args.first() {
                Some(_) => arg(0),
                None => Type::dict(Type::Unknown, Type::Unknown),
            },
            Builtin::Tuple => match arg(0).head() {
                Some(Head::Tuple) => arg(0),
                _ => Type::Dynamic,
            },
            Builtin::Super => match self.index.class.get(&call).and_then(|c| self.table.class(*c)) {
                Some(info) => match info.local_bases().next() {
                    Some(base) => self.table.class_type(base),
                    None => Type::Dynamic,
                },
                None => Type::Dynamic,
            },
            Builtin::DunderName => Type::str(),
            Builtin::Type
            | Builtin::GetAttr
            | Builtin::Object
            | Builtin::NotImplemented
            | Builtin::NotImplementedError
            | Builtin::Exception
            | Builtin::ValueError
            | Builtin::TypeError
            | Builtin::KeyError
            | Builtin::IndexError
            | Builtin::RuntimeError => Type::Dynamic,
        }
    }

    /// Result of `l op r` under the current snapshot. `Unknown` while either
    /// operand is unknown.
    pub fn binary_type(&self, op: BinOp, l: &Type, r: &Type) -> Type {
        if l.is_unknown() || r.is_unknown() {
            return Type::Unknown;
        }
        let key = canonical_key(op, l, r);
        if let Some(t) = self.op_memo.borrow().get(&key) {
            return t.clone();
        }
        let t = self.compute_binary(op, l, r);
        self.op_memo.borrow_mut().insert(key, t.clone());
        t
    }

    fn compute_binary(&self, op: BinOp, l: &Type, r: &Type) -> Type {
        if let Some(t) = primitive_binary(op, l, r) {
            return t;
        }
        if matches!(l, Type::Union(_)) || matches!(r, Type::Union(_)) {
            return Type::Dynamic;
        }
        if let Some(class) = l.class_name()
            && !matches!(self.member(class, op.dunder()), Member::Missing | Member::Ambiguous)
        {
            return self.method_return(class, op.dunder());
        }
        if let Some(class) = r.class_name()
            && !matches!(self.member(class, op.reflected_dunder()), Member::Missing | Member::Ambiguous)
        {
            return self.method_return(class, op.reflected_dunder());
        }
        Type::Dynamic
    }

    fn subscript_type(&self, container: &Type, index: &Spanned<Expr>) -> Type {
        match container {
            Type::Unknown => Type::Unknown,
            Type::Scalar(ScalarKind::Str) => Type::str(),
            Type::Nominal(n) => match &n.head {
                Head::List => container.arg(0),
                Head::Dict => container.arg(1),
                Head::Tuple => match &index.node.kind {
                    ExprKind::Int(i) => {
                        let i = if *i < 0 { n.args.len() as i64 + i } else { *i };
                        usize::try_from(i).ok().and_then(|i| n.args.get(i).cloned()).unwrap_or(Type::Dynamic)
                    }
                    _ => n.args.iter().fold(Type::Unknown, |acc, a| acc.join(a, &self.table)),
                },
                Head::Set => Type::Dynamic,
                Head::Class(class) => self.method_return(class, "__getitem__"),
            },
            _ => Type::Dynamic,
        }
    }
}

/// Find `attr` on class `qualified`: its local ancestry first, then classes
/// of other modules it derives from, then the unique topmost subclass
/// defining it.
pub fn resolve_member(table: &SymbolTable, externals: &Externals, qualified: &str, attr: &str) -> Member {
    let local = table.class_by_name(qualified).map(|c| c.symbol);
    if let Some(class) = local
        && let Some(sym) = table.lookup_member(class, attr)
    {
        return Member::Local(sym);
    }
    for ancestor in table.ancestors(qualified) {
        let key = format!("{ancestor}.{attr}");
        if externals.contains_key(&key) {
            return Member::External(key);
        }
    }
    let Some(class) = local else { return Member::Missing };
    let definers: Vec<SymbolId> = table
        .descendants(class)
        .into_iter()
        .filter(|d| table.class(*d).is_some_and(|c| c.fields.contains_key(attr) || c.methods.contains_key(attr)))
        .collect();
    let top: Vec<SymbolId> = definers
        .iter()
        .copied()
        .filter(|d| !definers.iter().any(|e| e != d && table.mro(*d).contains(e)))
        .collect();
    match top.as_slice() {
        [] => Member::Missing,
        [only] => match table.lookup_member(*only, attr) {
            Some(symbol) => Member::Downcast { class: *only, symbol },
            None => Member::Missing,
        },
        _ => Member::Ambiguous,
    }
}

fn callable_result(t: &Type) -> Type {
    match t {
        Type::Function(_, ret) => (**ret).clone(),
        Type::Unknown => Type::Unknown,
        _ => Type::Dynamic,
    }
}

/// Result type of a runtime container or string method.
pub fn container_method(receiver: &Type, method: &str) -> Type {
    let Some(head) = receiver.head() else {
        return match (receiver.scalar(), method) {
            (Some(ScalarKind::Str), "split") => Type::list(Type::str()),
            (Some(ScalarKind::Str), "startswith" | "endswith" | "isdigit" | "isalpha" | "isspace") => Type::boolean(),
            (Some(ScalarKind::Str), "find" | "count" | "index") => Type::int(),
            (Some(ScalarKind::Str), _) => Type::str(),
            _ => Type::Dynamic,
        };
    };
    let elem = receiver.arg(0);
    match (head, method) {
        (Head::List, "append" | "insert" | "extend" | "remove" | "sort" | "reverse" | "clear") => Type::none(),
        (Head::List, "pop") => elem,
        (Head::List, "index" | "count") => Type::int(),
        (Head::Dict, "get" | "pop" | "setdefault") => receiver.arg(1),
        (Head::Dict, "popitem") => Type::tuple(vec![elem, receiver.arg(1)]),
        (Head::Dict, "items") => Type::list(Type::tuple(vec![elem, receiver.arg(1)])),
        (Head::Dict, "keys") => Type::list(elem),
        (Head::Dict, "values") => Type::list(receiver.arg(1)),
        (Head::Dict, "update" | "clear") => Type::none(),
        (Head::Set, "add" | "remove" | "discard" | "clear" | "update") => Type::none(),
        (Head::Set, "pop") => elem,
        (Head::Tuple, "index" | "count") => Type::int(),
        (_, "copy") => receiver.clone(),
        _ => Type::Dynamic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_methods() {
        let xs = Type::list(Type::float());
        assert_eq!(container_method(&xs, "pop"), Type::float());
        assert_eq!(container_method(&xs, "append"), Type::none());
        assert_eq!(container_method(&xs, "count"), Type::int());
    }

    #[test]
    fn dict_methods() {
        let d = Type::dict(Type::str(), Type::int());
        assert_eq!(container_method(&d, "items"), Type::list(Type::tuple(vec![Type::str(), Type::int()])));
        assert_eq!(container_method(&d, "popitem"), Type::tuple(vec![Type::str(), Type::int()]));
        assert_eq!(container_method(&d, "get"), Type::int());
        assert_eq!(container_method(&d, "frobnicate"), Type::Dynamic);
    }

    #[test]
    fn string_methods() {
        assert_eq!(container_method(&Type::str(), "split"), Type::list(Type::str()));
        assert_eq!(container_method(&Type::str(), "upper"), Type::str());
        assert_eq!(container_method(&Type::int(), "upper"), Type::Dynamic);
    }
}
