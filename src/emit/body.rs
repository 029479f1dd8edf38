//! Statements and expressions of function bodies, field defaults and the
//! module initialiser.

use crate::diagnostics::CompileError;
use crate::lower::ir::*;
use crate::parser::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::types::{Head, ScalarKind, Type};

use super::names::{capability, escape, method_name};
use super::{Emitter, Writer};

/// `s` without one pair of parentheses wrapping all of it.
pub(super) fn bare(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'(' || bytes[bytes.len() - 1] != b')' {
        return s;
    }
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 && i + 1 < bytes.len() {
                    return s;
                }
            }
            _ => {}
        }
    }
    &s[1..s.len() - 1]
}

/// C++ string literal. Control characters use octal escapes, which never
/// swallow a following digit beyond three.
pub(super) fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Operands that may be repeated without re-evaluating anything.
fn is_simple(e: &LExpr) -> bool {
    matches!(
        e,
        LExpr::Int(_) | LExpr::Float(_) | LExpr::Bool(_) | LExpr::Str(_) | LExpr::Null | LExpr::Local(_) | LExpr::Global(_)
    ) || matches!(e, LExpr::MathConst(_))
}

fn literal_step(e: &LExpr) -> Option<i64> {
    match e {
        LExpr::Int(k) => Some(*k),
        LExpr::Unary { op: UnaryOp::Neg, operand, dispatch: Dispatch::Primitive } => match operand.as_ref() {
            LExpr::Int(k) => Some(-*k),
            _ => None,
        },
        _ => None,
    }
}

impl<'a> Emitter<'a> {
    /// Lambda introducer: captures only inside function bodies.
    pub(super) fn capture(&self) -> &'static str {
        if self.ctx.in_block { "[&]" } else { "[]" }
    }

    /// Element slot of a container; a `None` element is `Any`.
    pub(super) fn slot(&self, t: &Type) -> Result<String, CompileError> {
        match t {
            Type::Scalar(ScalarKind::None) => self.names.ty(&Type::Dynamic),
            t => self.names.ty(t),
        }
    }

    pub(super) fn args(&mut self, args: &[LExpr]) -> Result<String, CompileError> {
        Ok(self.arg_list(args)?.join(", "))
    }

    pub(super) fn arg_list(&mut self, args: &[LExpr]) -> Result<Vec<String>, CompileError> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            let text = self.expr(a)?;
            out.push(bare(&text).to_string());
        }
        Ok(out)
    }

    // ── Statements ───────────────────────────────────────────────────

    pub(super) fn block(&mut self, w: &mut Writer, body: &[LStmt]) -> Result<(), CompileError> {
        for s in body {
            self.stmt(w, s)?;
        }
        Ok(())
    }

    fn stmt(&mut self, w: &mut Writer, s: &LStmt) -> Result<(), CompileError> {
        match s {
            LStmt::Declare { name, ty, init } => {
                let ty = self.names.ty(ty)?;
                match init {
                    Some(v) => {
                        let v = self.expr(v)?;
                        w.line(&format!("{ty} {} = {};", escape(name), bare(&v)));
                    }
                    None => w.line(&format!("{ty} {}{{}};", escape(name))),
                }
            }
            LStmt::Assign { target, value } => {
                let target = self.place(target)?;
                let v = self.expr(value)?;
                w.line(&format!("{target} = {};", bare(&v)));
            }
            LStmt::Unpack { targets, value } => {
                let mut places = Vec::with_capacity(targets.len());
                for t in targets {
                    places.push(self.place(t)?);
                }
                let v = self.expr(value)?;
                w.line(&format!("std::tie({}) = {};", places.join(", "), bare(&v)));
            }
            LStmt::Expr(e) => {
                let v = self.expr(e)?;
                w.line(&format!("{};", bare(&v)));
            }
            LStmt::Return(None) => w.line(if self.ctx.entry { "return 0;" } else { "return;" }),
            LStmt::Return(Some(v)) => {
                let v = self.expr(v)?;
                w.line(&format!("return {};", bare(&v)));
            }
            LStmt::If { cond, then, els } => self.if_chain(w, cond, then, els)?,
            LStmt::While { cond, body } => {
                let c = self.expr(cond)?;
                w.open(&format!("while ({}) {{", bare(&c)));
                self.block(w, body)?;
                w.close("}");
            }
            LStmt::ForEach { vars, elem, iterable, body, declare } => {
                self.for_each(w, vars, elem, iterable, body, *declare)?
            }
            LStmt::ForRange { var, start, stop, step, body, declare } => {
                self.for_range(w, var, start, stop, step, body, *declare)?
            }
            LStmt::Throw { exception, message, args } => {
                let mut parts = Vec::with_capacity(args.len() + 2);
                match message {
                    None => parts.push("\"\"".to_string()),
                    Some(m) => {
                        parts.push(string_literal(&vec!["{}"; args.len() + 1].join(", ")));
                        let m = self.expr(m)?;
                        parts.push(bare(&m).to_string());
                        parts.extend(self.arg_list(args)?);
                    }
                }
                w.line(&format!("throw kiwi::{exception}({});", parts.join(", ")));
            }
            LStmt::Rethrow => w.line("throw;"),
            LStmt::Scoped { name, ty, init, repr, enter, body } => self.scoped(w, name, ty, init, *repr, *enter, body)?,
            LStmt::Break => w.line("break;"),
            LStmt::Continue => w.line("continue;"),
            LStmt::IdentityGuard { other } => {
                w.open(&format!("if ({}.get() == this) {{", escape(other)));
                w.line("return true;");
                w.close("}");
            }
            LStmt::TagGuard { other, test, root, open } => {
                let o = escape(other);
                let cond = match test {
                    TagTest::SameAsSelf if !*open => format!("{o} && {o}->__tag() == this->__tag()"),
                    TagTest::SameAsSelf => format!("{o} && typeid(*{o}) == typeid(*this)"),
                    TagTest::Classes(classes) => self.class_test(&o, classes, root, *open),
                };
                w.open(&format!("if (!({cond})) {{"));
                w.line("return false;");
                w.close("}");
            }
            LStmt::DelItem { container, key, is_dict } => {
                let c = self.expr(container)?;
                let k = self.expr(key)?;
                let method = if *is_dict { "remove" } else { "pop" };
                w.line(&format!("{c}.{method}({});", bare(&k)));
            }
        }
        Ok(())
    }

    fn if_chain(&mut self, w: &mut Writer, cond: &LExpr, then: &[LStmt], els: &[LStmt]) -> Result<(), CompileError> {
        let c = self.expr(cond)?;
        w.open(&format!("if ({}) {{", bare(&c)));
        self.block(w, then)?;
        let mut rest = els;
        loop {
            match rest {
                [] => break,
                [LStmt::If { cond, then, els }] => {
                    let c = self.expr(cond)?;
                    w.dedent();
                    w.open(&format!("}} else if ({}) {{", bare(&c)));
                    self.block(w, then)?;
                    rest = els;
                }
                _ => {
                    w.dedent();
                    w.open("} else {");
                    self.block(w, rest)?;
                    break;
                }
            }
        }
        w.close("}");
        Ok(())
    }

    /// Loop source: dictionary views are iterated in place.
    fn iterable(&mut self, e: &LExpr) -> Result<String, CompileError> {
        if let LExpr::ContainerCall { receiver, kind: ContainerKind::Dict, method, args, .. } = e
            && args.is_empty()
            && matches!(method.as_str(), "keys" | "values" | "items")
        {
            let r = self.expr(receiver)?;
            return Ok(format!("{r}.{method}()"));
        }
        let text = self.expr(e)?;
        Ok(bare(&text).to_string())
    }

    fn for_each(
        &mut self,
        w: &mut Writer,
        vars: &[LPlace],
        elem: &Type,
        iterable: &LExpr,
        body: &[LStmt],
        declare: bool,
    ) -> Result<(), CompileError> {
        let it = self.iterable(iterable)?;
        let mut places = Vec::with_capacity(vars.len());
        for v in vars {
            places.push(self.place(v)?);
        }
        if declare {
            let head = match places.as_slice() {
                [one] => format!("{} {one}", self.slot(elem)?),
                many => format!("auto [{}]", many.join(", ")),
            };
            w.open(&format!("for ({head} : {it}) {{"));
        } else {
            let item = self.temp("item");
            w.open(&format!("for (auto const& {item} : {it}) {{"));
            match places.as_slice() {
                [one] => w.line(&format!("{one} = {item};")),
                many => w.line(&format!("std::tie({}) = {item};", many.join(", "))),
            }
        }
        self.block(w, body)?;
        w.close("}");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn for_range(
        &mut self,
        w: &mut Writer,
        var: &LPlace,
        start: &LExpr,
        stop: &LExpr,
        step: &LExpr,
        body: &[LStmt],
        declare: bool,
    ) -> Result<(), CompileError> {
        let v = self.place(var)?;
        let start = self.expr(start)?;
        let step_lit = literal_step(step);
        let mut scoped = false;

        let stop_text = self.expr(stop)?;
        let stop_text = if is_simple(stop) {
            bare(&stop_text).to_string()
        } else {
            w.open("{");
            scoped = true;
            let t = self.temp("stop");
            w.line(&format!("int {t} = {};", bare(&stop_text)));
            t
        };
        let step_text = match step_lit {
            Some(k) => k.to_string(),
            None => {
                let s = self.expr(step)?;
                if is_simple(step) {
                    bare(&s).to_string()
                } else {
                    if !scoped {
                        w.open("{");
                        scoped = true;
                    }
                    let t = self.temp("step");
                    w.line(&format!("int {t} = {};", bare(&s)));
                    t
                }
            }
        };

        let cond = match step_lit {
            Some(k) if k < 0 => format!("{v} > {stop_text}"),
            Some(_) => format!("{v} < {stop_text}"),
            None => format!("({step_text} > 0 ? {v} < {stop_text} : {v} > {stop_text})"),
        };
        let incr = match step_lit {
            Some(1) => format!("++{v}"),
            Some(-1) => format!("--{v}"),
            Some(k) if k < 0 => format!("{v} -= {}", -k),
            _ => format!("{v} += {step_text}"),
        };
        let init = if declare { format!("int {v} = {}", bare(&start)) } else { format!("{v} = {}", bare(&start)) };
        w.open(&format!("for ({init}; {cond}; {incr}) {{"));
        self.block(w, body)?;
        w.close("}");
        if scoped {
            w.close("}");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn scoped(
        &mut self,
        w: &mut Writer,
        name: &str,
        ty: &Type,
        init: &LExpr,
        repr: Repr,
        enter: bool,
        body: &[LStmt],
    ) -> Result<(), CompileError> {
        let n = escape(name);
        let init = self.expr(init)?;
        w.open("{");
        w.line(&format!("auto {n} = {};", bare(&init)));
        let access = match repr {
            Repr::Reference => "->",
            Repr::Value => ".",
        };
        let exit = if ty.is_dynamic() {
            if enter {
                w.line(&format!("{n}->dyn_enter();"));
            }
            Some(format!("{n}->dyn_exit()"))
        } else {
            if enter {
                w.line(&format!("{n}{access}__enter__();"));
            }
            let local = ty.class_name().and_then(|c| self.classes.get(c).copied());
            match local {
                Some(class) => class.method("__exit__").map(|m| {
                    let holes = vec!["{}"; m.params.len()].join(", ");
                    format!("{n}{access}__exit__({holes})")
                }),
                None => Some(format!("{n}{access}__exit__()")),
            }
        };
        if let Some(exit) = exit {
            let guard = self.temp("guard");
            w.line(&format!("kiwi::defer {guard}([&]() {{ {exit}; }});"));
        }
        self.block(w, body)?;
        w.close("}");
        Ok(())
    }

    fn place(&mut self, p: &LPlace) -> Result<String, CompileError> {
        match p {
            LPlace::Local(n) => Ok(escape(n)),
            LPlace::Global(q) => Ok(self.names.value(q)),
            LPlace::Field { object, field, repr } => self.field(object, field, *repr),
            LPlace::Index { container, index } => {
                let c = self.expr(container)?;
                let i = self.expr(index)?;
                Ok(format!("{c}[{}]", bare(&i)))
            }
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    pub(super) fn expr(&mut self, e: &LExpr) -> Result<String, CompileError> {
        Ok(match e {
            LExpr::Int(i) => i.to_string(),
            LExpr::Float(f) => self.float(*f),
            LExpr::Bool(b) => b.to_string(),
            LExpr::Str(s) => format!("kiwi::String({})", string_literal(s)),
            LExpr::Null => "nullptr".to_string(),
            LExpr::Local(n) => escape(n),
            LExpr::Global(q) => self.names.value(q),
            LExpr::SelfRef { class, repr } => self.self_ref(class, *repr),
            LExpr::Field { object, field, repr } => self.field(object, field, *repr)?,
            LExpr::Downcast { value, class } => {
                let v = self.expr(value)?;
                format!("std::dynamic_pointer_cast<{}>({})", self.names.structure(class), bare(&v))
            }
            LExpr::Call { callee, args } => {
                let args = self.args(args)?;
                match callee {
                    Callee::Function(q) => format!("{}({args})", self.names.value(q)),
                    Callee::Value(f) => format!("{}({args})", self.expr(f)?),
                }
            }
            LExpr::MethodCall { receiver, method, args, repr } => {
                let r = self.receiver(receiver, *repr)?;
                let args = self.args(args)?;
                format!("{r}{}({args})", method_name(method))
            }
            LExpr::BaseCall { base: class, method, args } | LExpr::StaticCall { class, method, args } => {
                let args = self.args(args)?;
                format!("{}::{}({args})", self.names.structure(class), method_name(method))
            }
            LExpr::Construct { class, repr, args } => {
                let args = self.args(args)?;
                match repr {
                    Repr::Reference => format!("std::make_shared<{}>({args})", self.names.structure(class)),
                    Repr::Value => format!("{}({args})", self.names.value(class)),
                }
            }
            LExpr::Binary { op, left, right, dispatch, ty } => self.binary(*op, left, right, dispatch, ty)?,
            LExpr::Unary { op, operand, dispatch } => self.unary(*op, operand, dispatch)?,
            LExpr::Compare { op, left, right, dispatch } => self.compare(*op, left, right, dispatch)?,
            LExpr::Logical { op, left, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                let sym = match op {
                    BoolOp::And => "&&",
                    BoolOp::Or => "||",
                };
                format!("({l} {sym} {r})")
            }
            LExpr::Not(v) => format!("(!{})", self.expr(v)?),
            LExpr::Identity { left, right, negated } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                format!("({l} {} {r})", if *negated { "!=" } else { "==" })
            }
            LExpr::IsInstance { value, test, root, open } => {
                let TagTest::Classes(classes) = test else {
                    return Err(CompileError::internal("isinstance against the receiver's own class"));
                };
                if is_simple(value) {
                    let v = self.expr(value)?;
                    format!("({})", self.class_test(&v, classes, root, *open))
                } else {
                    let v = self.expr(value)?;
                    let test = self.class_test("__v", classes, root, *open);
                    format!("{}(auto const& __v) {{ return {test}; }}({})", self.capture(), bare(&v))
                }
            }
            LExpr::StaticBool(b) => b.to_string(),
            LExpr::SameClass { left, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                format!("(typeid(*{l}) == typeid(*{r}))")
            }
            LExpr::List { elem, items } => self.list_literal(elem, items)?,
            LExpr::Dict { key, value, entries } => self.dict_literal(key, value, entries)?,
            LExpr::Set { elem, items } => self.set_literal(elem, items)?,
            LExpr::Tuple(items) if items.is_empty() => "std::tuple<>()".to_string(),
            LExpr::Tuple(items) => format!("std::make_tuple({})", self.args(items)?),
            LExpr::TupleGet { value, index } => {
                let v = self.expr(value)?;
                format!("std::get<{index}>({})", bare(&v))
            }
            LExpr::Index { value, index } => {
                let v = self.expr(value)?;
                let i = self.expr(index)?;
                format!("{v}[{}]", bare(&i))
            }
            LExpr::Range { start, stop, step } => {
                let start = self.expr(start)?;
                let stop = self.expr(stop)?;
                let step = self.expr(step)?;
                format!(
                    "{}() {{ kiwi::List<int> __r; int __stop = {}; int __step = {}; \
                     for (int __i = {}; __step > 0 ? __i < __stop : __i > __stop; __i += __step) {{ __r.append(__i); }} \
                     return __r; }}()",
                    self.capture(),
                    bare(&stop),
                    bare(&step),
                    bare(&start)
                )
            }
            LExpr::Builtin { func, args } => self.builtin(*func, args)?,
            LExpr::Print(args) => {
                let parts = self.arg_list(args)?;
                if parts.is_empty() {
                    "(std::cout << std::endl)".to_string()
                } else {
                    format!("(std::cout << {} << std::endl)", parts.join(" << \" \" << "))
                }
            }
            LExpr::Format { template, args } => self.format(template, args)?,
            LExpr::Cast { to, from, value } => self.cast(to, from, value)?,
            LExpr::Math { func, args } => {
                self.needs.cmath = true;
                if func == "std::gcd" {
                    self.needs.numeric = true;
                }
                format!("{func}({})", self.args(args)?)
            }
            LExpr::MathConst(c) => {
                self.needs.cmath = true;
                c.clone()
            }
            LExpr::Box(v) => {
                let v = self.expr(v)?;
                format!("box({})", bare(&v))
            }
            LExpr::Unbox { value, to } => {
                let v = self.expr(value)?;
                format!("unbox<{}>({})", self.names.ty(to)?, bare(&v))
            }
            LExpr::DynamicAttr { object, attr } => {
                let o = self.expr(object)?;
                format!("{o}->dyn_getattr(box(kiwi::String({})))", string_literal(attr))
            }
            LExpr::DynamicCall { object, method, args } => {
                let o = self.expr(object)?;
                format!("{o}->{}({})", capability(method), self.args(args)?)
            }
            LExpr::ContainerCall { receiver, kind, of, method, args } => {
                self.container_call(receiver, *kind, of, method, args)?
            }
            LExpr::Collect { into, elem, source, from, sorted } => self.collect(*into, elem, source, from, *sorted)?,
        })
    }

    fn float(&mut self, f: f64) -> String {
        if f.is_nan() {
            self.needs.cmath = true;
            "NAN".to_string()
        } else if f.is_infinite() {
            self.needs.cmath = true;
            if f > 0.0 { "INFINITY".to_string() } else { "(-INFINITY)".to_string() }
        } else {
            format!("{f:?}")
        }
    }

    fn self_ref(&self, class: &str, repr: Repr) -> String {
        match repr {
            Repr::Value => "(*this)".to_string(),
            Repr::Reference => {
                let st = self.names.structure(class);
                let derived = self.classes.get(class).is_some_and(|c| !c.bases.is_empty());
                if self.ctx.is_const {
                    format!("std::const_pointer_cast<{st}>(std::static_pointer_cast<const {st}>(shared_from_this()))")
                } else if derived {
                    format!("std::static_pointer_cast<{st}>(shared_from_this())")
                } else {
                    "shared_from_this()".to_string()
                }
            }
        }
    }

    fn field(&mut self, object: &LExpr, field: &str, repr: Repr) -> Result<String, CompileError> {
        let r = self.receiver(object, repr)?;
        Ok(format!("{r}{}", escape(field)))
    }

    /// Object expression followed by its member access operator.
    fn receiver(&mut self, object: &LExpr, repr: Repr) -> Result<String, CompileError> {
        if let LExpr::SelfRef { .. } = object {
            return Ok("this->".to_string());
        }
        let o = self.expr(object)?;
        Ok(match repr {
            Repr::Reference => format!("{o}->"),
            Repr::Value => format!("{o}."),
        })
    }

    /// Runtime class test of the handle `v` against `classes`.
    fn class_test(&self, v: &str, classes: &[String], root: &str, open: bool) -> String {
        let members = if open { None } else { self.hierarchy(root).map(|h| &h.members) };
        let tests: Vec<String> = classes
            .iter()
            .map(|c| match members {
                Some(m) if m.contains(c) => format!("{v}->__tag() == {}", self.names.tag(root, c)),
                _ => format!("std::dynamic_pointer_cast<{}>({v}) != nullptr", self.names.structure(c)),
            })
            .collect();
        if tests.is_empty() {
            return "false".to_string();
        }
        format!("{v} && ({})", tests.join(" || "))
    }

    fn binary(&mut self, op: BinOp, left: &LExpr, right: &LExpr, dispatch: &Dispatch, ty: &Type) -> Result<String, CompileError> {
        let l = self.expr(left)?;
        let r = self.expr(right)?;
        Ok(match dispatch {
            Dispatch::Primitive => self.primitive_binary(op, &l, &r, ty)?,
            Dispatch::Overload { repr: Repr::Value } => format!("({l} {} {r})", op.symbol()),
            Dispatch::Overload { repr: Repr::Reference } => {
                format!("{l}->{}({})", method_name(op.dunder()), bare(&r))
            }
            Dispatch::Method { name, repr } => {
                let access = if *repr == Repr::Value { "." } else { "->" };
                format!("{l}{access}{}({})", method_name(name), bare(&r))
            }
            Dispatch::Reflected { name, repr } => {
                let access = if *repr == Repr::Value { "." } else { "->" };
                format!("{r}{access}{}({})", method_name(name), bare(&l))
            }
            Dispatch::Dynamic { name } => format!("{l}->{}({})", capability(name), bare(&r)),
        })
    }

    fn primitive_binary(&mut self, op: BinOp, l: &str, r: &str, ty: &Type) -> Result<String, CompileError> {
        let (l, r) = (bare(l), bare(r));
        let float = ty.scalar() == Some(ScalarKind::Float);
        Ok(match (op, ty.head()) {
            (BinOp::Add, Some(Head::List)) => {
                let t = self.names.ty(ty)?;
                format!(
                    "{}() {{ {t} __r; for (auto const& __x : {l}) {{ __r.append(__x); }} for (auto const& __x : {r}) {{ __r.append(__x); }} return __r; }}()",
                    self.capture()
                )
            }
            (BinOp::Mul, Some(Head::List)) => {
                let t = self.names.ty(ty)?;
                let rep = format!(
                    "[](auto const& __s, int __n) {{ {t} __r; for (int __i = 0; __i < __n; ++__i) {{ for (auto const& __x : __s) {{ __r.append(__x); }} }} return __r; }}"
                );
                self.repeat(&rep, l, r)
            }
            (BinOp::Mul, _) if ty.scalar() == Some(ScalarKind::Str) => {
                let rep = "[](auto const& __s, int __n) { kiwi::String __r; for (int __i = 0; __i < __n; ++__i) { __r += __s; } return __r; }";
                self.repeat(rep, l, r)
            }
            (BinOp::Div, _) => format!("(static_cast<double>({l}) / {r})"),
            (BinOp::FloorDiv, _) => {
                self.needs.cmath = true;
                if float {
                    format!("std::floor(static_cast<double>({l}) / {r})")
                } else {
                    format!("static_cast<int>(std::floor(static_cast<double>({l}) / {r}))")
                }
            }
            (BinOp::Mod, _) if float => {
                self.needs.cmath = true;
                format!("std::fmod({l}, {r})")
            }
            (BinOp::Pow, _) => {
                self.needs.cmath = true;
                if float {
                    format!("std::pow({l}, {r})")
                } else {
                    format!("static_cast<int>(std::pow({l}, {r}))")
                }
            }
            _ => format!("({l} {} {r})", op.symbol()),
        })
    }

    /// Sequence repetition where either side may be the count.
    fn repeat(&self, rep: &str, l: &str, r: &str) -> String {
        format!(
            "{}(auto const& __a, auto const& __b) {{ auto __rep = {rep}; \
             if constexpr (std::is_integral_v<std::decay_t<decltype(__a)>>) {{ return __rep(__b, __a); }} \
             else {{ return __rep(__a, __b); }} }}({l}, {r})",
            self.capture()
        )
    }

    fn unary(&mut self, op: UnaryOp, operand: &LExpr, dispatch: &Dispatch) -> Result<String, CompileError> {
        let v = self.expr(operand)?;
        let sym = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => return Ok(format!("(!{v})")),
        };
        Ok(match dispatch {
            Dispatch::Primitive | Dispatch::Overload { repr: Repr::Value } => format!("({sym}{v})"),
            Dispatch::Overload { repr: Repr::Reference } => format!("{v}->operator{sym}()"),
            Dispatch::Method { name, repr } | Dispatch::Reflected { name, repr } => {
                let access = if *repr == Repr::Value { "." } else { "->" };
                format!("{v}{access}{}()", method_name(name))
            }
            Dispatch::Dynamic { name } => format!("{v}->{}()", capability(name)),
        })
    }

    fn compare(&mut self, op: CmpOp, left: &LExpr, right: &LExpr, dispatch: &Dispatch) -> Result<String, CompileError> {
        let l = self.expr(left)?;
        let r = self.expr(right)?;
        Ok(match dispatch {
            Dispatch::Primitive | Dispatch::Overload { repr: Repr::Value } => match op {
                CmpOp::Is => format!("({l} == {r})"),
                CmpOp::IsNot => format!("({l} != {r})"),
                CmpOp::In => format!("kiwi::contains({}, {})", bare(&r), bare(&l)),
                CmpOp::NotIn => format!("(!kiwi::contains({}, {}))", bare(&r), bare(&l)),
                _ => format!("({l} {} {r})", op.symbol()),
            },
            Dispatch::Overload { repr: Repr::Reference } => {
                format!("{l}->operator{}({})", op.symbol(), bare(&r))
            }
            Dispatch::Method { name, repr } => {
                let access = if *repr == Repr::Value { "." } else { "->" };
                format!("{l}{access}{}({})", method_name(name), bare(&r))
            }
            Dispatch::Reflected { name, repr } => {
                let access = if *repr == Repr::Value { "." } else { "->" };
                format!("{r}{access}{}({})", method_name(name), bare(&l))
            }
            Dispatch::Dynamic { name } => match op {
                CmpOp::In => format!("unbox<bool>({r}->{}({}))", capability(name), bare(&l)),
                CmpOp::NotIn => format!("(!unbox<bool>({r}->{}({})))", capability(name), bare(&l)),
                _ => format!("unbox<bool>({l}->{}({}))", capability(name), bare(&r)),
            },
        })
    }

    fn list_literal(&mut self, elem: &Type, items: &[LExpr]) -> Result<String, CompileError> {
        let ty = format!("kiwi::List<{}>", self.slot(elem)?);
        if items.is_empty() {
            return Ok(format!("{ty}()"));
        }
        let l = self.temp("list");
        let mut body = format!("{ty} {l}; ");
        for item in self.arg_list(items)? {
            body.push_str(&format!("{l}.append({item}); "));
        }
        Ok(format!("{}() {{ {body}return {l}; }}()", self.capture()))
    }

    fn dict_literal(&mut self, key: &Type, value: &Type, entries: &[(LExpr, LExpr)]) -> Result<String, CompileError> {
        let ty = format!("kiwi::Dict<{}, {}>", self.slot(key)?, self.slot(value)?);
        if entries.is_empty() {
            return Ok(format!("{ty}()"));
        }
        let d = self.temp("dict");
        let mut body = format!("{ty} {d}; ");
        for (k, v) in entries {
            let k = self.expr(k)?;
            let v = self.expr(v)?;
            body.push_str(&format!("{d}[{}] = {}; ", bare(&k), bare(&v)));
        }
        Ok(format!("{}() {{ {body}return {d}; }}()", self.capture()))
    }

    fn set_literal(&mut self, elem: &Type, items: &[LExpr]) -> Result<String, CompileError> {
        let ty = format!("kiwi::Dict<{}, bool>", self.slot(elem)?);
        if items.is_empty() {
            return Ok(format!("{ty}()"));
        }
        let s = self.temp("set");
        let mut body = format!("{ty} {s}; ");
        for item in self.arg_list(items)? {
            body.push_str(&format!("{s}[{item}] = true; "));
        }
        Ok(format!("{}() {{ {body}return {s}; }}()", self.capture()))
    }

    fn builtin(&mut self, func: BuiltinFn, args: &[LExpr]) -> Result<String, CompileError> {
        let rendered = self.arg_list(args)?;
        let cap = self.capture();
        Ok(match (func, rendered.as_slice()) {
            (BuiltinFn::Len, [x]) => format!("kiwi::len({x})"),
            (BuiltinFn::Repr, [x]) => format!("kiwi::repr({x})"),
            (BuiltinFn::Abs, [x]) => {
                self.needs.cmath = true;
                format!("std::abs({x})")
            }
            (BuiltinFn::Min | BuiltinFn::Max, [x]) => {
                let f = if func == BuiltinFn::Min { "min" } else { "max" };
                format!("{cap}() {{ auto __c = {x}; return *std::{f}_element(__c.begin(), __c.end()); }}()")
            }
            (BuiltinFn::Min | BuiltinFn::Max, many) if !many.is_empty() => {
                let f = if func == BuiltinFn::Min { "min" } else { "max" };
                format!("std::{f}({{{}}})", many.join(", "))
            }
            (BuiltinFn::Sum, [x]) => format!("kiwi::sum({x})"),
            (BuiltinFn::Sum, [x, start]) => format!("({start} + kiwi::sum({x}))"),
            (BuiltinFn::Contains, [c, x]) => match &args[0] {
                LExpr::Tuple(_) => format!("std::apply({cap}(auto const&... __e) {{ return ((__e == {x}) || ...); }}, {c})"),
                _ => format!("kiwi::contains({c}, {x})"),
            },
            (BuiltinFn::Equal, [a, b]) => format!(
                "{cap}() {{ auto __a = {a}; auto __b = {b}; \
                 return kiwi::len(__a) == kiwi::len(__b) && std::equal(__a.begin(), __a.end(), __b.begin()); }}()"
            ),
            (BuiltinFn::CharAt, [s, i]) => {
                self.needs.string = true;
                format!("kiwi::String(1, {s}[{i}])")
            }
            (func, args) => {
                return Err(CompileError::internal(format!("{func:?} with {} arguments reached emission", args.len())));
            }
        })
    }

    fn format(&mut self, template: &LExpr, args: &[LExpr]) -> Result<String, CompileError> {
        let template = match template {
            LExpr::Str(s) => string_literal(&super::strings::percent_template(s)),
            other => {
                let t = self.expr(other)?;
                bare(&t).to_string()
            }
        };
        let mut parts = vec![template];
        parts.extend(self.arg_list(args)?);
        Ok(format!("kiwi::String(kiwi::Exception({}).what())", parts.join(", ")))
    }

    fn cast(&mut self, to: &Type, from: &Type, value: &LExpr) -> Result<String, CompileError> {
        let v = self.expr(value)?;
        let v = bare(&v);
        Ok(match (to.scalar(), from.scalar()) {
            (Some(ScalarKind::Int), Some(ScalarKind::Str)) => {
                self.needs.string = true;
                format!("std::stoi({v})")
            }
            (Some(ScalarKind::Float), Some(ScalarKind::Str)) => {
                self.needs.string = true;
                format!("std::stod({v})")
            }
            (Some(_), _) => format!("static_cast<{}>({v})", self.names.ty(to)?),
            _ => return Err(CompileError::internal(format!("cast from '{from}' to '{to}'"))),
        })
    }

    fn collect(&mut self, into: ContainerKind, elem: &Type, source: &LExpr, from: &Type, sorted: bool) -> Result<String, CompileError> {
        let e = self.slot(elem)?;
        let src = self.iterable(source)?;
        let r = self.temp("items");
        let (ty, add) = match into {
            ContainerKind::Set => (format!("kiwi::Dict<{e}, bool>"), format!("{r}[__y] = true;")),
            _ => (format!("kiwi::List<{e}>"), format!("{r}.append(__y);")),
        };
        let convert = if from.is_dynamic() && !elem.is_dynamic() && !elem.is_unknown() {
            format!("unbox<{e}>(__x)")
        } else {
            "__x".to_string()
        };
        let fill = if from.scalar() == Some(ScalarKind::Str) {
            self.needs.string = true;
            format!("for (char __c : {src}) {{ auto __y = kiwi::String(1, __c); {add} }}")
        } else if from.head() == Some(&Head::Tuple) {
            format!("std::apply([&](auto const&... __x) {{ ((void)[&](auto const& __y) {{ {add} }}(__x), ...); }}, {src});")
        } else {
            format!("for (auto const& __x : {src}) {{ auto __y = {convert}; {add} }}")
        };
        let sort = if sorted { format!("{r}.sort(); ") } else { String::new() };
        Ok(format!("{}() {{ {ty} {r}; {fill} {sort}return {r}; }}()", self.capture()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{EmitOptions, Emitter};

    fn module() -> LModule {
        LModule {
            name: "m".into(),
            includes: Vec::new(),
            imports: Vec::new(),
            hierarchies: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            init: Vec::new(),
            entry: None,
            dynamic: DynamicSurface::default(),
            uses_print: false,
            reprs: Default::default(),
        }
    }

    fn render(stmts: &[LStmt]) -> String {
        let m = module();
        let options = EmitOptions::default();
        let mut e = Emitter::new(&m, &options);
        e.ctx.in_block = true;
        let mut w = Writer::default();
        e.block(&mut w, stmts).unwrap();
        w.finish()
    }

    fn expr(x: &LExpr) -> String {
        let m = module();
        let options = EmitOptions::default();
        let mut e = Emitter::new(&m, &options);
        e.ctx.in_block = true;
        e.expr(x).unwrap()
    }

    fn local(n: &str) -> LExpr {
        LExpr::Local(n.into())
    }

    #[test]
    fn bare_strips_only_a_wrapping_pair() {
        assert_eq!(bare("(a + b)"), "a + b");
        assert_eq!(bare("(a) + (b)"), "(a) + (b)");
        assert_eq!(bare("f(x)"), "f(x)");
        assert_eq!(bare("(s == \")\")"), "s == \")\"");
    }

    #[test]
    fn string_literals_escape_quotes_and_controls() {
        assert_eq!(string_literal("a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(string_literal("\u{1}"), "\"\\001\"");
    }

    #[test]
    fn primitive_arithmetic_follows_source_semantics() {
        let div = LExpr::Binary {
            op: BinOp::Div,
            left: local("a").boxed(),
            right: local("b").boxed(),
            dispatch: Dispatch::Primitive,
            ty: Type::float(),
        };
        assert_eq!(expr(&div), "(static_cast<double>(a) / b)");
        let floor = LExpr::Binary {
            op: BinOp::FloorDiv,
            left: local("a").boxed(),
            right: LExpr::Int(2).boxed(),
            dispatch: Dispatch::Primitive,
            ty: Type::int(),
        };
        assert_eq!(expr(&floor), "static_cast<int>(std::floor(static_cast<double>(a) / 2))");
    }

    #[test]
    fn dispatch_variants_pick_their_call_shape() {
        let bin = |dispatch| LExpr::Binary {
            op: BinOp::Add,
            left: local("a").boxed(),
            right: local("b").boxed(),
            dispatch,
            ty: Type::Dynamic,
        };
        assert_eq!(expr(&bin(Dispatch::Overload { repr: Repr::Reference })), "a->operator+(b)");
        assert_eq!(expr(&bin(Dispatch::Overload { repr: Repr::Value })), "(a + b)");
        assert_eq!(
            expr(&bin(Dispatch::Reflected { name: "__radd__".into(), repr: Repr::Reference })),
            "b->__radd__(a)"
        );
        assert_eq!(expr(&bin(Dispatch::Dynamic { name: "__add__".into() })), "a->__add__(b)");
    }

    #[test]
    fn literal_step_ranges_use_a_fixed_comparison() {
        let out = render(&[LStmt::ForRange {
            var: LPlace::Local("i".into()),
            start: LExpr::Int(10),
            stop: LExpr::Int(0),
            step: LExpr::Unary { op: UnaryOp::Neg, operand: LExpr::Int(2).boxed(), dispatch: Dispatch::Primitive },
            body: vec![LStmt::Break],
            declare: true,
        }]);
        assert_eq!(out, "for (int i = 10; i > 0; i -= 2) {\n  break;\n}\n");
    }

    #[test]
    fn computed_range_bounds_are_evaluated_once() {
        let out = render(&[LStmt::ForRange {
            var: LPlace::Local("i".into()),
            start: LExpr::Int(0),
            stop: LExpr::Builtin { func: BuiltinFn::Len, args: vec![local("xs")] },
            step: local("k"),
            body: Vec::new(),
            declare: true,
        }]);
        assert!(out.starts_with("{\n  int __stop1 = kiwi::len(xs);\n"));
        assert!(out.contains("for (int i = 0; (k > 0 ? i < __stop1 : i > __stop1); i += k) {"));
    }

    #[test]
    fn else_if_chains_stay_flat() {
        let out = render(&[LStmt::If {
            cond: local("a"),
            then: vec![LStmt::Break],
            els: vec![LStmt::If { cond: local("b"), then: vec![LStmt::Continue], els: vec![LStmt::Break] }],
        }]);
        assert_eq!(out, "if (a) {\n  break;\n} else if (b) {\n  continue;\n} else {\n  break;\n}\n");
    }

    #[test]
    fn throws_format_every_argument() {
        let out = render(&[LStmt::Throw {
            exception: "ValueError".into(),
            message: Some(LExpr::Str("bad".into())),
            args: vec![local("x")],
        }]);
        assert_eq!(out, "throw kiwi::ValueError(\"{}, {}\", kiwi::String(\"bad\"), x);\n");
    }

    #[test]
    fn scoped_blocks_register_exit_with_defer() {
        let out = render(&[LStmt::Scoped {
            name: "f".into(),
            ty: Type::class("io.File"),
            init: local("open_file"),
            repr: Repr::Reference,
            enter: true,
            body: vec![LStmt::Expr(LExpr::Print(vec![LExpr::Str("hi".into())]))],
        }]);
        assert!(out.contains("auto f = open_file;"));
        assert!(out.contains("f->__enter__();"));
        assert!(out.contains("kiwi::defer __guard1([&]() { f->__exit__(); });"));
        assert!(out.contains("std::cout << kiwi::String(\"hi\") << std::endl;"));
    }

    #[test]
    fn list_literals_fill_a_fresh_list() {
        let out = expr(&LExpr::List { elem: Type::int(), items: vec![LExpr::Int(1), LExpr::Int(2)] });
        assert_eq!(out, "[&]() { kiwi::List<int> __list1; __list1.append(1); __list1.append(2); return __list1; }()");
        assert_eq!(expr(&LExpr::List { elem: Type::str(), items: Vec::new() }), "kiwi::List<kiwi::String>()");
    }

    #[test]
    fn unsettled_element_types_are_internal_errors() {
        let m = module();
        let options = EmitOptions::default();
        let mut e = Emitter::new(&m, &options);
        let list = LExpr::List { elem: Type::Unknown, items: Vec::new() };
        assert!(matches!(e.expr(&list), Err(CompileError::Internal { .. })));
        let none = LExpr::List { elem: Type::none(), items: Vec::new() };
        assert_eq!(e.expr(&none).unwrap(), "kiwi::List<Any>()");
    }

    #[test]
    fn percent_templates_become_brace_templates() {
        let out = expr(&LExpr::Format {
            template: LExpr::Str("%s has %.2f {x}".into()).boxed(),
            args: vec![local("a"), local("b")],
        });
        assert_eq!(out, "kiwi::String(kiwi::Exception(\"{} has {:.2f} {{x}}\", a, b).what())");
    }
}
