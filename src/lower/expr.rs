//! Expressions: names, operators, comparisons, attributes and subscripts.

use crate::diagnostics::{CompileError, DiagnosticKind};
use crate::infer::expr::Member;
use crate::infer::operators::{primitive_binary, primitive_unary, should_swap};
use crate::infer::ExternalKind;
use crate::parser::ast::{BinOp, BoolOp, CmpOp, Expr, ExprKind, UnaryOp};
use crate::resolve::builtins::{math_member, Builtin, MathMember};
use crate::resolve::scope::{SymbolId, SymbolKind};
use crate::span::{Span, Spanned};
use crate::types::{Head, ScalarKind, Type};

use super::ir::*;
use super::Lowerer;

pub(super) type Node = Spanned<Expr>;

/// Element slot of a container type; holes become `Dynamic`.
pub(super) fn elem_slot(t: Type) -> Type {
    if t.is_unknown() || t.is_none() { Type::Dynamic } else { t }
}

pub(super) fn container_kind(t: &Type) -> Option<ContainerKind> {
    match (t.head(), t.scalar()) {
        (Some(Head::List), _) => Some(ContainerKind::List),
        (Some(Head::Dict), _) => Some(ContainerKind::Dict),
        (Some(Head::Set), _) => Some(ContainerKind::Set),
        (Some(Head::Tuple), _) => Some(ContainerKind::Tuple),
        (_, Some(ScalarKind::Str)) => Some(ContainerKind::Str),
        _ => None,
    }
}

/// `a < b` is `b > a`.
fn mirrored(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Gt,
        CmpOp::LtEq => CmpOp::GtEq,
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::GtEq => CmpOp::LtEq,
        other => other,
    }
}

impl<'a, 'm> Lowerer<'a, 'm> {
    pub(super) fn expr(&mut self, e: &Node) -> Result<LExpr, CompileError> {
        match &e.node.kind {
            ExprKind::Int(i) => Ok(LExpr::Int(*i)),
            ExprKind::Float(f) => Ok(LExpr::Float(*f)),
            ExprKind::Str(s) => Ok(LExpr::Str(s.clone())),
            ExprKind::Bool(b) => Ok(LExpr::Bool(*b)),
            ExprKind::NoneLit => Ok(LExpr::Null),
            ExprKind::Name(n) => self.name(e, n),
            ExprKind::Attribute { value, attr } => self.attribute(e, value, &attr.node),
            ExprKind::Call { func, args } => self.call(e, func, args),
            ExprKind::BinOp { op, left, right } => {
                let l = self.operand(left)?;
                let r = self.operand(right)?;
                Ok(self.binary(e.span, *op, l, r)?.0)
            }
            ExprKind::UnaryOp { op, operand } => self.unary(*op, operand),
            ExprKind::BoolOp { op, left, right } => {
                let l = self.condition(left)?;
                let r = self.condition(right)?;
                Ok(LExpr::Logical { op: *op, left: l.boxed(), right: r.boxed() })
            }
            ExprKind::Compare { op, left, right } => self.compare(e, *op, left, right),
            ExprKind::List(items) => {
                let elem = elem_slot(self.type_of(e).arg(0));
                let items = items.iter().map(|i| self.expr_as(i, &elem)).collect::<Result<_, _>>()?;
                Ok(LExpr::List { elem, items })
            }
            ExprKind::Set(items) => {
                let elem = elem_slot(self.type_of(e).arg(0));
                let items = items.iter().map(|i| self.expr_as(i, &elem)).collect::<Result<_, _>>()?;
                Ok(LExpr::Set { elem, items })
            }
            ExprKind::Dict(entries) => {
                let ty = self.type_of(e);
                let (key, value) = (elem_slot(ty.arg(0)), elem_slot(ty.arg(1)));
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((self.expr_as(k, &key)?, self.expr_as(v, &value)?));
                }
                Ok(LExpr::Dict { key, value, entries: out })
            }
            ExprKind::Tuple(items) => {
                Ok(LExpr::Tuple(items.iter().map(|i| self.expr(i)).collect::<Result<_, _>>()?))
            }
            ExprKind::Subscript { value, index } => self.subscript(value, index),
        }
    }

    /// Lower `e` and convert it to the slot type `to`.
    pub(super) fn expr_as(&mut self, e: &Node, to: &Type) -> Result<LExpr, CompileError> {
        let v = self.expr(e)?;
        let from = self.type_of(e);
        Ok(self.coerce(v, &from, to))
    }

    /// Lowered operand with its settled and raw types.
    pub(super) fn operand(&mut self, e: &Node) -> Result<Operand, CompileError> {
        Ok(Operand { value: self.expr(e)?, ty: self.type_of(e), raw: self.raw_type(e), pure: pure_node(e) })
    }

    pub(super) fn condition(&mut self, e: &Node) -> Result<LExpr, CompileError> {
        let v = self.expr(e)?;
        let t = self.type_of(e);
        Ok(self.truthy(v, &t))
    }

    fn name(&mut self, e: &Node, n: &str) -> Result<LExpr, CompileError> {
        let table = self.table;
        let Some(sym) = table.binding(e.node.id) else {
            return Err(CompileError::unresolved(n, e.span));
        };
        if Some(sym) == self.frame.self_sym
            && let Some(class) = self.frame.class
        {
            let q = self.qualified(class);
            return Ok(self.self_ref(&q));
        }
        let s = table.symbol(sym);
        let value = match s.kind {
            SymbolKind::Variable if s.scope == table.module_scope() => LExpr::Global(table.qualified_name(sym)),
            SymbolKind::Variable | SymbolKind::Parameter => LExpr::Local(s.name.clone()),
            SymbolKind::Imported => match &s.origin {
                Some((module, member)) if module == "math" => match math_member(member) {
                    Some(MathMember::Constant(c)) => LExpr::MathConst(c.to_string()),
                    _ => return Err(CompileError::unsupported(format!("math.{member} cannot be used as a value"), e.span)),
                },
                _ => LExpr::Global(table.qualified_name(sym)),
            },
            SymbolKind::Function | SymbolKind::Class => LExpr::Global(table.qualified_name(sym)),
            SymbolKind::Builtin if table.builtin(sym) == Some(Builtin::DunderName) => LExpr::Str(table.module.clone()),
            SymbolKind::Builtin | SymbolKind::Module | SymbolKind::Method | SymbolKind::Field => LExpr::Null,
        };
        Ok(value)
    }

    /// Dotted path of an imported module named by `e`.
    pub(super) fn module_of(&self, e: &Node) -> Option<String> {
        let table = self.table;
        match &e.node.kind {
            ExprKind::Name(_) => {
                let sym = table.symbol(table.binding(e.node.id)?);
                match (&sym.kind, &sym.origin) {
                    (SymbolKind::Module, Some((module, member))) if member.is_empty() => Some(module.clone()),
                    _ => None,
                }
            }
            ExprKind::Attribute { value, attr } => {
                let base = self.module_of(value)?;
                let candidate = format!("{base}.{}", attr.node);
                let prefix = format!("{candidate}.");
                let known = table.imported_modules.contains(&candidate)
                    || self.typed.externals.keys().any(|k| k.starts_with(&prefix));
                known.then_some(candidate)
            }
            _ => None,
        }
    }

    /// Local class named directly by `e`.
    pub(super) fn class_named(&self, e: &Node) -> Option<SymbolId> {
        let sym = self.table.binding(e.node.id)?;
        (self.table.symbol(sym).kind == SymbolKind::Class).then_some(sym)
    }

    /// Qualified name of another module's class named directly by `e`.
    pub(super) fn external_class_named(&self, e: &Node) -> Option<String> {
        let table = self.table;
        let sym = table.symbol(table.binding(e.node.id)?);
        let (module, name) = sym.origin.as_ref()?;
        let key = format!("{module}.{name}");
        (sym.kind == SymbolKind::Imported && self.external_kind(&key) == Some(ExternalKind::Class)).then_some(key)
    }

    // ---- operators --------------------------------------------------------

    /// Lower `l op r`. Returns the expression and its settled type.
    pub(super) fn binary(
        &mut self,
        span: Span,
        op: BinOp,
        l: Operand,
        r: Operand,
    ) -> Result<(LExpr, Type), CompileError> {
        if op == BinOp::Mod && l.ty.scalar() == Some(ScalarKind::Str) {
            let args = match r.value {
                LExpr::Tuple(items) => match r.ty.nominal() {
                    Some(n) => items
                        .into_iter()
                        .zip(n.args.clone())
                        .map(|(v, t)| self.format_arg(v, &t))
                        .collect(),
                    None => items,
                },
                other => vec![self.format_arg(other, &r.ty)],
            };
            return Ok((LExpr::Format { template: l.value.boxed(), args }, Type::str()));
        }

        if l.raw.contains_union() || r.raw.contains_union() {
            self.warn(
                DiagnosticKind::AmbiguousOperatorResolution,
                format!("operands of '{}' have union types ({} and {})", op.symbol(), l.raw, r.raw),
                span,
            );
            return Ok((self.dynamic_binary(op, l, r), Type::Dynamic));
        }

        if let Some(result) = primitive_binary(op, &l.ty, &r.ty) {
            let result = self.norm(&result);
            let (l, r) = if l.ty.is_numeric() && r.ty.is_numeric() && l.pure && r.pure && should_swap_values(op, &l, &r)
            {
                (r, l)
            } else {
                (l, r)
            };
            let value = LExpr::Binary {
                op,
                left: l.value.boxed(),
                right: r.value.boxed(),
                dispatch: Dispatch::Primitive,
                ty: result.clone(),
            };
            return Ok((value, result));
        }

        if let Some(class) = l.ty.class_name().map(str::to_string)
            && let Some((receiver, member, repr)) = self.dunder(l.value.clone(), &class, op.dunder())
        {
            let params = self.member_params(&member);
            let arg = match params.first() {
                Some(p) => self.coerce(r.value, &r.ty, p),
                None => r.value,
            };
            let ret = self.member_return(&member);
            let dispatch = match op {
                BinOp::FloorDiv | BinOp::Pow => Dispatch::Method { name: op.dunder().to_string(), repr },
                _ => Dispatch::Overload { repr },
            };
            let value = LExpr::Binary { op, left: receiver.boxed(), right: arg.boxed(), dispatch, ty: ret.clone() };
            return Ok((value, ret));
        }

        if let Some(class) = r.ty.class_name().map(str::to_string)
            && let Some((receiver, member, repr)) = self.dunder(r.value.clone(), &class, op.reflected_dunder())
        {
            let params = self.member_params(&member);
            let arg = match params.first() {
                Some(p) => self.coerce(l.value, &l.ty, p),
                None => l.value,
            };
            let ret = self.member_return(&member);
            let dispatch = Dispatch::Reflected { name: op.reflected_dunder().to_string(), repr };
            let value = LExpr::Binary { op, left: arg.boxed(), right: receiver.boxed(), dispatch, ty: ret.clone() };
            return Ok((value, ret));
        }

        if !(l.ty.is_dynamic() || r.ty.is_dynamic()) {
            self.warn(
                DiagnosticKind::AmbiguousOperatorResolution,
                format!("no '{}' defined for {} and {}", op.symbol(), l.ty, r.ty),
                span,
            );
        }
        Ok((self.dynamic_binary(op, l, r), Type::Dynamic))
    }

    fn dynamic_binary(&mut self, op: BinOp, l: Operand, r: Operand) -> LExpr {
        let left = self.coerce(l.value, &l.ty, &Type::Dynamic);
        let right = self.coerce(r.value, &r.ty, &Type::Dynamic);
        self.dynamic.note(op.dunder(), 1);
        LExpr::Binary {
            op,
            left: left.boxed(),
            right: right.boxed(),
            dispatch: Dispatch::Dynamic { name: op.dunder().to_string() },
            ty: Type::Dynamic,
        }
    }

    fn format_arg(&mut self, v: LExpr, t: &Type) -> LExpr {
        if t.scalar().is_some() { v } else { self.text(v, t) }
    }

    /// Receiver (narrowed when the dunder lives in a subclass), member and
    /// dispatch representation for a dunder defined on `class`.
    pub(super) fn dunder(&self, receiver: LExpr, class: &str, dunder: &str) -> Option<(LExpr, Member, Repr)> {
        let member = self.typed.member(class, dunder);
        match &member {
            Member::Local(m) if self.table.symbol(*m).kind.is_callable() => {
                Some((receiver, member, self.shapes.repr_of(class)))
            }
            Member::Downcast { class: sub, symbol } if self.table.symbol(*symbol).kind.is_callable() => {
                let receiver = LExpr::Downcast { value: receiver.boxed(), class: self.qualified(*sub) };
                Some((receiver, member, Repr::Reference))
            }
            Member::External(key) if self.external_kind(key) == Some(ExternalKind::Method) => {
                Some((receiver, member, self.shapes.repr_of(class)))
            }
            _ => None,
        }
    }

    /// Settled return type (or value type) of a member.
    pub(super) fn member_return(&self, member: &Member) -> Type {
        match member {
            Member::Local(m) | Member::Downcast { symbol: m, .. } => self.norm(&self.table.symbol(*m).ty),
            Member::External(key) => self.typed.externals.get(key).map_or(Type::Dynamic, |e| self.norm(&e.ty)),
            Member::Ambiguous | Member::Missing => Type::Dynamic,
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Node) -> Result<LExpr, CompileError> {
        if op == UnaryOp::Not {
            return Ok(LExpr::Not(self.condition(operand)?.boxed()));
        }
        let t = self.type_of(operand);
        let v = self.expr(operand)?;
        if primitive_unary(op, &t).is_some() {
            return Ok(LExpr::Unary { op, operand: v.boxed(), dispatch: Dispatch::Primitive });
        }
        let Some(dunder) = op.dunder() else { return Ok(v) };
        if let Some(class) = t.class_name()
            && let Some((receiver, _, repr)) = self.dunder(v.clone(), class, dunder)
        {
            return Ok(LExpr::Unary { op, operand: receiver.boxed(), dispatch: Dispatch::Overload { repr } });
        }
        let boxed = self.coerce(v, &t, &Type::Dynamic);
        self.dynamic.note(dunder, 0);
        Ok(LExpr::Unary { op, operand: boxed.boxed(), dispatch: Dispatch::Dynamic { name: dunder.to_string() } })
    }

    // ---- comparisons ------------------------------------------------------

    fn compare(&mut self, e: &Node, op: CmpOp, left: &Node, right: &Node) -> Result<LExpr, CompileError> {
        if matches!(op, CmpOp::Eq | CmpOp::NotEq)
            && let Some(test) = self.type_comparison(left, right)?
        {
            return Ok(if op == CmpOp::NotEq { LExpr::Not(test.boxed()) } else { test });
        }
        match op {
            CmpOp::Is | CmpOp::IsNot => {
                let negated = op == CmpOp::IsNot;
                let (lt, rt) = (self.type_of(left), self.type_of(right));
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                Ok(match (&r, &l) {
                    (LExpr::Null, _) => self.none_test(l, &lt, negated),
                    (_, LExpr::Null) => self.none_test(r, &rt, negated),
                    _ => LExpr::Identity { left: l.boxed(), right: r.boxed(), negated },
                })
            }
            CmpOp::In | CmpOp::NotIn => {
                let test = self.contains(e.span, left, right)?;
                Ok(if op == CmpOp::NotIn { LExpr::Not(test.boxed()) } else { test })
            }
            _ => {
                let l = self.operand(left)?;
                let r = self.operand(right)?;
                Ok(self.compare_values(e.span, op, l.value, &l.raw, r.value, &r.raw))
            }
        }
    }

    /// `type(a) == type(b)` or `type(a) == C`.
    fn type_comparison(&mut self, left: &Node, right: &Node) -> Result<Option<LExpr>, CompileError> {
        let (a, b) = (self.type_call_arg(left), self.type_call_arg(right));
        match (a, b) {
            (Some(a), Some(b)) => self.same_class(a, b).map(Some),
            (Some(subject), None) | (None, Some(subject)) => {
                let other = if self.type_call_arg(left).is_some() { right } else { left };
                let Some(path) = other.node.dotted_path() else { return Ok(None) };
                let q = self.resolve_class_path(&path);
                let st = self.type_of(subject);
                let Some(class) = st.class_name().map(str::to_string) else {
                    return Ok(Some(LExpr::StaticBool(false)));
                };
                match self.shapes.hierarchy_of(&class).cloned() {
                    Some(h) => {
                        let v = self.expr(subject)?;
                        Ok(Some(LExpr::IsInstance {
                            value: v.boxed(),
                            test: TagTest::Classes(vec![q]),
                            root: h.root,
                            open: h.open,
                        }))
                    }
                    None => Ok(Some(LExpr::StaticBool(class == q))),
                }
            }
            (None, None) => Ok(None),
        }
    }

    /// `type(a) == type(b)`: a runtime check between two handles, static
    /// otherwise.
    pub(super) fn same_class(&mut self, a: &Node, b: &Node) -> Result<LExpr, CompileError> {
        let (at, bt) = (self.type_of(a), self.type_of(b));
        let both_handles = [&at, &bt].iter().all(|t| {
            t.class_name().is_some_and(|c| self.shapes.repr_of(c) == Repr::Reference) || t.is_dynamic()
        });
        if both_handles {
            let l = self.expr(a)?;
            let r = self.expr(b)?;
            return Ok(LExpr::SameClass { left: l.boxed(), right: r.boxed() });
        }
        Ok(LExpr::StaticBool(at.head() == bt.head() && at.scalar() == bt.scalar()))
    }

    pub(super) fn type_call_arg<'e>(&self, e: &'e Node) -> Option<&'e Node> {
        let ExprKind::Call { func, args } = &e.node.kind else { return None };
        let sym = self.table.binding(func.node.id)?;
        match (self.table.builtin(sym), args.as_slice()) {
            (Some(Builtin::Type), [only]) => Some(only),
            _ => None,
        }
    }

    /// `v is None`: a real test only for handle types.
    fn none_test(&mut self, v: LExpr, t: &Type, negated: bool) -> LExpr {
        let handle = t.is_dynamic()
            || t.is_none()
            || matches!(v, LExpr::Null)
            || t.class_name().is_some_and(|c| self.shapes.repr_of(c) == Repr::Reference);
        if handle {
            LExpr::Identity { left: v.boxed(), right: LExpr::Null.boxed(), negated }
        } else {
            LExpr::StaticBool(negated)
        }
    }

    /// Equality and ordering between two lowered values of the given raw
    /// types.
    pub(super) fn compare_values(
        &mut self,
        span: Span,
        op: CmpOp,
        l: LExpr,
        lt_raw: &Type,
        r: LExpr,
        rt_raw: &Type,
    ) -> LExpr {
        let (lt, rt) = (self.norm(lt_raw), self.norm(rt_raw));
        let equality = matches!(op, CmpOp::Eq | CmpOp::NotEq);

        if equality && (matches!(r, LExpr::Null) || rt.is_none()) {
            return self.none_test(l, &lt, op == CmpOp::NotEq);
        }
        if equality && (matches!(l, LExpr::Null) || lt.is_none()) {
            return self.none_test(r, &rt, op == CmpOp::NotEq);
        }

        if lt_raw.contains_union() || rt_raw.contains_union() {
            self.warn(
                DiagnosticKind::AmbiguousOperatorResolution,
                format!("operands of '{}' have union types ({lt_raw} and {rt_raw})", op.symbol()),
                span,
            );
            return self.dynamic_compare(op, l, &lt, r, &rt);
        }

        if let Some(class) = lt.class_name().map(str::to_string) {
            if let Some(dunder) = op.dunder()
                && let Some(test) = self.overloaded_compare(op, l.clone(), &class, dunder, r.clone(), &rt)
            {
                return test;
            }
            if op == CmpOp::NotEq
                && let Some(test) = self.overloaded_compare(CmpOp::Eq, l.clone(), &class, "__eq__", r.clone(), &rt)
            {
                return LExpr::Not(test.boxed());
            }
        }
        if let Some(class) = rt.class_name().map(str::to_string)
            && !lt.is_dynamic()
        {
            let flipped = mirrored(op);
            if let Some(dunder) = flipped.dunder()
                && let Some(test) = self.overloaded_compare(flipped, r.clone(), &class, dunder, l.clone(), &lt)
            {
                return test;
            }
        }

        match (lt.is_dynamic(), rt.is_dynamic()) {
            (true, true) => return self.dynamic_compare(op, l, &lt, r, &rt),
            (true, false) if rt.class_name().is_none() => {
                let l = self.coerce(l, &lt, &rt);
                return self.compare_values(span, op, l, &rt, r, &rt);
            }
            (false, true) if lt.class_name().is_none() => {
                let r = self.coerce(r, &rt, &lt);
                return self.compare_values(span, op, l, &lt, r, &lt);
            }
            (true, false) | (false, true) => return self.dynamic_compare(op, l, &lt, r, &rt),
            (false, false) => {}
        }

        if lt.class_name().is_some() || rt.class_name().is_some() {
            if equality {
                let negated = op == CmpOp::NotEq;
                let same_handles = lt.class_name().is_some_and(|c| self.shapes.repr_of(c) == Repr::Reference)
                    && rt.class_name().is_some_and(|c| self.shapes.repr_of(c) == Repr::Reference);
                return if same_handles {
                    LExpr::Identity { left: l.boxed(), right: r.boxed(), negated }
                } else {
                    LExpr::StaticBool(negated)
                };
            }
            self.warn(
                DiagnosticKind::AmbiguousOperatorResolution,
                format!("no '{}' defined for {lt} and {rt}", op.symbol()),
                span,
            );
            return self.dynamic_compare(op, l, &lt, r, &rt);
        }

        let comparable = (lt.is_numeric() && rt.is_numeric()) || lt.scalar() == rt.scalar() && lt.scalar().is_some();
        if comparable {
            return LExpr::Compare { op, left: l.boxed(), right: r.boxed(), dispatch: Dispatch::Primitive };
        }
        if lt.head() == Some(&Head::Tuple) && rt.head() == Some(&Head::Tuple) && equality {
            return LExpr::Compare { op, left: l.boxed(), right: r.boxed(), dispatch: Dispatch::Primitive };
        }
        if lt.head().is_some() && lt.head() == rt.head() {
            if equality {
                let test = LExpr::Builtin { func: BuiltinFn::Equal, args: vec![l, r] };
                return if op == CmpOp::NotEq { LExpr::Not(test.boxed()) } else { test };
            }
            return self.dynamic_compare(op, l, &lt, r, &rt);
        }
        if equality {
            return LExpr::StaticBool(op == CmpOp::NotEq);
        }
        self.warn(
            DiagnosticKind::AmbiguousOperatorResolution,
            format!("'{}' is not defined between {lt} and {rt}", op.symbol()),
            span,
        );
        self.dynamic_compare(op, l, &lt, r, &rt)
    }

    fn overloaded_compare(
        &mut self,
        op: CmpOp,
        receiver: LExpr,
        class: &str,
        dunder: &str,
        arg: LExpr,
        arg_ty: &Type,
    ) -> Option<LExpr> {
        let (receiver, member, repr) = self.dunder(receiver, class, dunder)?;
        let params = self.member_params(&member);
        let arg = match params.first() {
            Some(p) => self.coerce(arg, arg_ty, p),
            None => arg,
        };
        Some(LExpr::Compare { op, left: receiver.boxed(), right: arg.boxed(), dispatch: Dispatch::Overload { repr } })
    }

    fn dynamic_compare(&mut self, op: CmpOp, l: LExpr, lt: &Type, r: LExpr, rt: &Type) -> LExpr {
        let name = op.dunder().unwrap_or("__eq__");
        let l = self.coerce(l, lt, &Type::Dynamic);
        let r = self.coerce(r, rt, &Type::Dynamic);
        self.dynamic.note(name, 1);
        LExpr::Compare { op, left: l.boxed(), right: r.boxed(), dispatch: Dispatch::Dynamic { name: name.to_string() } }
    }

    /// `item in container`.
    fn contains(&mut self, span: Span, item: &Node, container: &Node) -> Result<LExpr, CompileError> {
        let ct = self.type_of(container);
        let it = self.type_of(item);
        let c = self.expr(container)?;
        let i = self.expr(item)?;
        if let Some(class) = ct.class_name().map(str::to_string) {
            if let Some(call) = self.invoke(c.clone(), &class, "__contains__", vec![(i.clone(), it.clone())]) {
                return Ok(call.0);
            }
            self.warn(
                DiagnosticKind::AmbiguousAttribute,
                format!("'{}' has no __contains__", ct),
                span,
            );
        }
        if container_kind(&ct).is_some() {
            let key = match ct.head() {
                Some(Head::Tuple) => it.clone(),
                Some(_) => elem_slot(ct.arg(0)),
                None => Type::str(),
            };
            let i = self.coerce(i, &it, &key);
            return Ok(LExpr::Builtin { func: BuiltinFn::Contains, args: vec![c, i] });
        }
        let call = self.dynamic_call(c, &ct, "__contains__", vec![(i, it)]);
        Ok(LExpr::Unbox { value: call.boxed(), to: Type::boolean() })
    }

    // ---- conversions ------------------------------------------------------

    /// Boolean test of a value, following the truthiness of its type.
    pub(super) fn truthy(&mut self, v: LExpr, t: &Type) -> LExpr {
        let nonzero = |v: LExpr, zero: LExpr| LExpr::Compare {
            op: CmpOp::NotEq,
            left: v.boxed(),
            right: zero.boxed(),
            dispatch: Dispatch::Primitive,
        };
        let non_empty = |v: LExpr| LExpr::Compare {
            op: CmpOp::Gt,
            left: LExpr::Builtin { func: BuiltinFn::Len, args: vec![v] }.boxed(),
            right: LExpr::Int(0).boxed(),
            dispatch: Dispatch::Primitive,
        };
        match t {
            Type::Scalar(ScalarKind::Bool) => v,
            Type::Scalar(ScalarKind::Int) => nonzero(v, LExpr::Int(0)),
            Type::Scalar(ScalarKind::Float) => nonzero(v, LExpr::Float(0.0)),
            Type::Scalar(ScalarKind::Str) => non_empty(v),
            Type::Scalar(ScalarKind::None) => LExpr::Bool(false),
            Type::Nominal(n) => match &n.head {
                Head::List | Head::Dict | Head::Set => non_empty(v),
                Head::Tuple => LExpr::Bool(!n.args.is_empty()),
                Head::Class(class) => {
                    let class = class.clone();
                    let reference = self.shapes.repr_of(&class) == Repr::Reference;
                    let custom = self
                        .invoke(v.clone(), &class, "__bool__", Vec::new())
                        .or_else(|| {
                            self.invoke(v.clone(), &class, "__len__", Vec::new()).map(|(len, t)| (non_empty_len(len), t))
                        })
                        .map(|(test, _)| test);
                    let present = LExpr::Identity { left: v.boxed(), right: LExpr::Null.boxed(), negated: true };
                    match (reference, custom) {
                        (true, Some(test)) => {
                            LExpr::Logical { op: BoolOp::And, left: present.boxed(), right: test.boxed() }
                        }
                        (true, None) => present,
                        (false, Some(test)) => test,
                        (false, None) => LExpr::Bool(true),
                    }
                }
            },
            Type::Function(..) => LExpr::Bool(true),
            Type::Dynamic | Type::Unknown | Type::Union(_) => {
                let call = self.dynamic_call(v, &Type::Dynamic, "__bool__", Vec::new());
                LExpr::Unbox { value: call.boxed(), to: Type::boolean() }
            }
        }
    }

    /// String form of a value, as `str()` gives it.
    pub(super) fn text(&mut self, v: LExpr, t: &Type) -> LExpr {
        match t {
            Type::Scalar(ScalarKind::Str) => v,
            Type::Scalar(ScalarKind::None) => LExpr::Str("None".to_string()),
            Type::Nominal(n) if matches!(n.head, Head::Class(_)) => {
                let class = t.class_name().unwrap_or_default().to_string();
                self.invoke(v.clone(), &class, "__str__", Vec::new())
                    .or_else(|| self.invoke(v.clone(), &class, "__repr__", Vec::new()))
                    .map_or_else(|| LExpr::Builtin { func: BuiltinFn::Repr, args: vec![v] }, |(call, _)| call)
            }
            Type::Dynamic | Type::Unknown | Type::Union(_) => {
                let call = self.dynamic_call(v, &Type::Dynamic, "__str__", Vec::new());
                LExpr::Unbox { value: call.boxed(), to: Type::str() }
            }
            _ => LExpr::Builtin { func: BuiltinFn::Repr, args: vec![v] },
        }
    }

    // ---- attributes and subscripts ----------------------------------------

    fn attribute(&mut self, e: &Node, value: &Node, attr: &str) -> Result<LExpr, CompileError> {
        if let Some(module) = self.module_of(value) {
            if module == "math" {
                return match math_member(attr) {
                    Some(MathMember::Constant(c)) => Ok(LExpr::MathConst(c.to_string())),
                    _ => Err(CompileError::unsupported(format!("math.{attr} cannot be used as a value"), e.span)),
                };
            }
            return Ok(LExpr::Global(format!("{module}.{attr}")));
        }
        if let Some(class) = self.class_named(value) {
            return self.class_attribute(class, attr, e.span);
        }
        let vt = self.type_of(value);
        let v = self.expr(value)?;
        self.member_access(e.span, v, &vt, attr)
    }

    /// `Class.name`: only literal class-level defaults are readable.
    fn class_attribute(&mut self, class: SymbolId, attr: &str, span: Span) -> Result<LExpr, CompileError> {
        let q = self.qualified(class);
        match self.class_level_value(class, attr) {
            Some(v) if is_literal_value(v) => self.expr(v),
            Some(_) => Err(CompileError::unsupported(
                format!("class attribute '{q}.{attr}' must be a literal to be read through the class"),
                span,
            )),
            None => Err(CompileError::unsupported(format!("'{q}' has no class attribute '{attr}'"), span)),
        }
    }

    /// Read `attr` from a value of type `vt`.
    pub(super) fn member_access(&mut self, span: Span, v: LExpr, vt: &Type, attr: &str) -> Result<LExpr, CompileError> {
        let table = self.table;
        let Some(class) = vt.class_name().map(str::to_string) else {
            if vt.is_dynamic() {
                self.dynamic.note("__getattr__", 1);
                return Ok(LExpr::DynamicAttr { object: v.boxed(), attr: attr.to_string() });
            }
            return Err(CompileError::unsupported(format!("'{vt}' has no attribute '{attr}'"), span));
        };
        let repr = self.shapes.repr_of(&class);
        match self.typed.member(&class, attr) {
            Member::Local(f) if table.symbol(f).kind == SymbolKind::Field => {
                Ok(LExpr::Field { object: v.boxed(), field: attr.to_string(), repr })
            }
            Member::Downcast { class: sub, symbol } if table.symbol(symbol).kind == SymbolKind::Field => {
                let object = LExpr::Downcast { value: v.boxed(), class: self.qualified(sub) };
                Ok(LExpr::Field { object: object.boxed(), field: attr.to_string(), repr: Repr::Reference })
            }
            Member::External(key) if self.external_kind(&key) == Some(ExternalKind::Field) => {
                Ok(LExpr::Field { object: v.boxed(), field: attr.to_string(), repr })
            }
            Member::Local(_) | Member::Downcast { .. } | Member::External(_) => {
                Err(CompileError::unsupported(format!("method '{attr}' of '{vt}' used as a value"), span))
            }
            Member::Ambiguous | Member::Missing => {
                self.warn(
                    DiagnosticKind::AmbiguousAttribute,
                    format!("attribute '{attr}' of '{vt}' cannot be resolved statically"),
                    span,
                );
                let object = self.coerce(v, vt, &Type::Dynamic);
                self.dynamic.note("__getattr__", 1);
                Ok(LExpr::DynamicAttr { object: object.boxed(), attr: attr.to_string() })
            }
        }
    }

    fn subscript(&mut self, value: &Node, index: &Node) -> Result<LExpr, CompileError> {
        let vt = self.type_of(value);
        let it = self.type_of(index);
        let v = self.expr(value)?;
        match container_kind(&vt) {
            Some(kind @ (ContainerKind::List | ContainerKind::Str)) => {
                let i = self.position(v.clone(), index)?;
                Ok(match kind {
                    ContainerKind::Str => LExpr::Builtin { func: BuiltinFn::CharAt, args: vec![v, i] },
                    _ => LExpr::Index { value: v.boxed(), index: i.boxed() },
                })
            }
            Some(ContainerKind::Dict) => {
                let key = self.expr_as(index, &elem_slot(vt.arg(0)))?;
                Ok(LExpr::Index { value: v.boxed(), index: key.boxed() })
            }
            Some(ContainerKind::Tuple) => {
                let len = vt.nominal().map_or(0, |n| n.args.len());
                match literal_int(index) {
                    Some(k) if k >= 0 && (k as usize) < len => Ok(LExpr::TupleGet { value: v.boxed(), index: k as usize }),
                    Some(k) if k < 0 && k.unsigned_abs() as usize <= len => {
                        Ok(LExpr::TupleGet { value: v.boxed(), index: len - k.unsigned_abs() as usize })
                    }
                    _ => Err(CompileError::unsupported("tuple index must be an integer literal in range", index.span)),
                }
            }
            Some(ContainerKind::Set) => Err(CompileError::unsupported("sets cannot be indexed", index.span)),
            None => {
                let i = self.expr(index)?;
                if let Some(class) = vt.class_name().map(str::to_string) {
                    if let Some((call, _)) = self.invoke(v.clone(), &class, "__getitem__", vec![(i.clone(), it.clone())])
                    {
                        return Ok(call);
                    }
                    self.warn(
                        DiagnosticKind::AmbiguousAttribute,
                        format!("'{vt}' has no __getitem__"),
                        index.span,
                    );
                }
                Ok(self.dynamic_call(v, &vt, "__getitem__", vec![(i, it)]))
            }
        }
    }

    /// Sequence position; a negative literal counts from the end.
    pub(super) fn position(&mut self, sequence: LExpr, index: &Node) -> Result<LExpr, CompileError> {
        if let Some(k) = literal_int(index)
            && k < 0
        {
            return Ok(LExpr::Binary {
                op: BinOp::Sub,
                left: LExpr::Builtin { func: BuiltinFn::Len, args: vec![sequence] }.boxed(),
                right: LExpr::Int(k.unsigned_abs() as i64).boxed(),
                dispatch: Dispatch::Primitive,
                ty: Type::int(),
            });
        }
        self.expr_as(index, &Type::int())
    }

    /// Call through the capability interface. `v` is boxed when it has a
    /// static type.
    pub(super) fn dynamic_call(&mut self, v: LExpr, vt: &Type, method: &str, args: Vec<(LExpr, Type)>) -> LExpr {
        let object = self.coerce(v, vt, &Type::Dynamic);
        let arity = args.len();
        let args = args.into_iter().map(|(a, t)| self.coerce(a, &t, &Type::Dynamic)).collect();
        self.dynamic.note(method, arity);
        LExpr::DynamicCall { object: object.boxed(), method: method.to_string(), args }
    }
}

/// A lowered operand with its types.
#[derive(Debug, Clone)]
pub(super) struct Operand {
    pub value: LExpr,
    pub ty: Type,
    pub raw: Type,
    /// Literal or plain name: safe to reorder.
    pub pure: bool,
}

fn pure_node(e: &Node) -> bool {
    e.node.is_literal() || matches!(e.node.kind, ExprKind::Name(_))
}

fn should_swap_values(op: BinOp, l: &Operand, r: &Operand) -> bool {
    let as_expr = |v: &LExpr| -> Option<Expr> {
        let kind = match v {
            LExpr::Int(i) => ExprKind::Int(*i),
            LExpr::Float(f) => ExprKind::Float(*f),
            LExpr::Bool(b) => ExprKind::Bool(*b),
            LExpr::Local(n) | LExpr::Global(n) => ExprKind::Name(n.clone()),
            _ => return None,
        };
        Some(Expr { id: crate::parser::ast::NodeId(0), kind })
    };
    match (as_expr(&l.value), as_expr(&r.value)) {
        (Some(a), Some(b)) => should_swap(op, &a, &b),
        _ => false,
    }
}

fn non_empty_len(len: LExpr) -> LExpr {
    LExpr::Compare { op: CmpOp::Gt, left: len.boxed(), right: LExpr::Int(0).boxed(), dispatch: Dispatch::Primitive }
}

/// Integer literal, including a negated one.
pub(super) fn literal_int(e: &Node) -> Option<i64> {
    match &e.node.kind {
        ExprKind::Int(i) => Some(*i),
        ExprKind::UnaryOp { op: UnaryOp::Neg, operand } => literal_int(operand).map(|i| -i),
        _ => None,
    }
}

fn is_literal_value(e: &Node) -> bool {
    e.node.is_literal() || literal_int(e).is_some()
        || matches!(&e.node.kind, ExprKind::UnaryOp { op: UnaryOp::Neg, operand } if matches!(operand.node.kind, ExprKind::Float(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn first_expr(src: &str) -> Node {
        let module = parse_module(src, "m").unwrap();
        match &module.body[0].node {
            crate::parser::ast::Stmt::Expr(e) => e.clone(),
            other => panic!("expression expected, got {other:?}"),
        }
    }

    #[test]
    fn negative_literals_are_recognised() {
        assert_eq!(literal_int(&first_expr("-3\n")), Some(-3));
        assert_eq!(literal_int(&first_expr("7\n")), Some(7));
        assert_eq!(literal_int(&first_expr("x\n")), None);
    }

    #[test]
    fn container_kinds() {
        assert_eq!(container_kind(&Type::list(Type::int())), Some(ContainerKind::List));
        assert_eq!(container_kind(&Type::str()), Some(ContainerKind::Str));
        assert_eq!(container_kind(&Type::class("m.P")), None);
    }

    #[test]
    fn ordering_mirrors() {
        assert_eq!(mirrored(CmpOp::Lt), CmpOp::Gt);
        assert_eq!(mirrored(CmpOp::GtEq), CmpOp::LtEq);
        assert_eq!(mirrored(CmpOp::Eq), CmpOp::Eq);
    }
}
