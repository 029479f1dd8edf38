//! C++ emission: one declaration unit and one definition unit per lowered
//! module.
//!
//! Emission is a pure function of the [`LModule`]. It makes no type
//! decisions; a slot that lowering left unsettled is an internal error.

mod body;
pub mod names;
mod prelude;
mod strings;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::diagnostics::CompileError;
use crate::lower::ir::*;
use crate::types::{Head, Type};
use names::{capability, escape, header_guard, header_path, method_name, source_path, Names};

#[derive(Debug, Clone)]
pub struct EmitOptions {
    /// Extra namespace wrapped around every module namespace.
    pub namespace_root: Option<String>,
    /// Emit a global `main` for modules with an entry block.
    pub emit_entry_point: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self { namespace_root: None, emit_entry_point: true }
    }
}

/// Text of one translated module.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub module: String,
    pub header_path: PathBuf,
    pub source_path: PathBuf,
    pub header: String,
    pub source: String,
}

pub fn emit_module(module: &LModule, options: &EmitOptions) -> Result<Emitted, CompileError> {
    let mut emitter = Emitter::new(module, options);
    let header_body = emitter.header_body()?;
    let source = emitter.source()?;
    let header = emitter.header(&header_body);
    tracing::debug!(
        module = %module.name,
        header_bytes = header.len(),
        source_bytes = source.len(),
        "emitted"
    );
    Ok(Emitted {
        module: module.name.clone(),
        header_path: header_path(&module.name),
        source_path: source_path(&module.name),
        header,
        source,
    })
}

/// Indented text buffer.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: String,
    indent: usize,
}

impl Writer {
    fn write(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    fn newline(&mut self) {
        self.buf.push('\n');
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.buf.push_str("  ");
        }
    }

    fn indent(&mut self) {
        self.indent += 1;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    fn line(&mut self, s: &str) {
        if !s.is_empty() {
            self.write_indent();
            self.write(s);
        }
        self.newline();
    }

    /// Line ending in `{`; indents what follows.
    fn open(&mut self, s: &str) {
        self.line(s);
        self.indent();
    }

    fn close(&mut self, s: &str) {
        self.dedent();
        self.line(s);
    }

    fn section(&mut self, title: &str) {
        self.line(&format!("// ── {title} ──"));
    }

    fn finish(self) -> String {
        self.buf
    }
}

/// Headers pulled in by constructs met while rendering bodies.
#[derive(Debug, Default)]
struct Needs {
    cmath: bool,
    cctype: bool,
    numeric: bool,
    string: bool,
}

/// Where the code being rendered sits.
#[derive(Debug, Default, Clone)]
struct Context {
    /// Inside a function body: lambdas may capture.
    in_block: bool,
    /// Inside the entry function: a bare `return` exits with status 0.
    entry: bool,
    /// Inside a `const` member function.
    is_const: bool,
}

pub(crate) struct Emitter<'a> {
    module: &'a LModule,
    options: &'a EmitOptions,
    names: Names,
    classes: HashMap<&'a str, &'a LClass>,
    needs: Needs,
    ctx: Context,
    temps: usize,
}

impl<'a> Emitter<'a> {
    fn new(module: &'a LModule, options: &'a EmitOptions) -> Self {
        Self {
            module,
            options,
            names: Names::new(&module.name, options.namespace_root.clone(), module.reprs.clone()),
            classes: module.classes.iter().map(|c| (c.name.as_str(), c)).collect(),
            needs: Needs::default(),
            ctx: Context::default(),
            temps: 0,
        }
    }

    fn temp(&mut self, prefix: &str) -> String {
        self.temps += 1;
        format!("__{prefix}{}", self.temps)
    }

    // ── Declaration unit ─────────────────────────────────────────────

    fn header(&self, body: &str) -> String {
        let module = self.module;
        let guard = header_guard(&module.name);
        let mut w = Writer::default();
        w.line(&format!("#ifndef {guard}"));
        w.line(&format!("#define {guard}"));
        w.newline();

        let mut system: Vec<String> = Vec::new();
        let mut local: Vec<String> = Vec::new();
        let mut runtime: Vec<String> = Vec::new();
        for include in &module.includes {
            match include {
                Include::Runtime(h) => runtime.push(h.clone()),
                Include::System(h) => system.push(h.clone()),
                Include::Local(m) => local.push(header_path(m).to_string_lossy().replace('\\', "/")),
            }
        }
        let mut extra = Vec::new();
        if self.needs.cmath {
            extra.push("cmath");
        }
        if self.needs.cctype {
            extra.push("cctype");
        }
        if self.needs.numeric {
            extra.push("numeric");
        }
        if self.needs.string {
            extra.push("string");
        }
        let dynamic = self.uses_any();
        if dynamic {
            extra.extend(["type_traits", "utility"]);
        }
        for h in extra {
            if !system.iter().any(|s| s == h) {
                system.push(h.to_string());
            }
        }

        for h in &runtime {
            w.line(&format!("#include \"{h}\""));
        }
        for h in &system {
            w.line(&format!("#include <{h}>"));
        }
        for h in &local {
            w.line(&format!("#include \"{h}\""));
        }
        w.newline();
        let ns = self.names.namespace();
        w.line(&format!("namespace {ns} {{"));
        if dynamic {
            w.newline();
            w.section("Dynamic values");
            w.write(&prelude::render(&module.dynamic));
        }
        w.write(body);
        w.newline();
        w.line(&format!("}} // {ns}"));
        w.newline();
        w.line(&format!("#endif // {guard}"));
        w.finish()
    }

    /// Declarations inside the header's namespace block, after the dynamic
    /// prelude.
    fn header_body(&mut self) -> Result<String, CompileError> {
        let module = self.module;
        let mut w = Writer::default();

        if !module.classes.is_empty() {
            w.newline();
            w.section("Forward declarations");
            for class in &module.classes {
                let name = escape(class.short_name());
                match class.repr {
                    Repr::Reference => {
                        w.line(&format!("struct _{name};"));
                        w.line(&format!("using {name} = std::shared_ptr<_{name}>;"));
                    }
                    Repr::Value => w.line(&format!("struct {name};")),
                }
            }
        }

        for h in module.hierarchies.iter().filter(|h| !h.open) {
            w.newline();
            let (_, root) = names::split_qualified(&h.root);
            let members: Vec<&str> = h.members.iter().map(|m| names::split_qualified(m).1).collect();
            w.line(&format!("enum class {root}Kind {{ {} }};", members.join(", ")));
        }

        if !module.classes.is_empty() {
            w.newline();
            w.section("Classes");
            for class in self.definition_order() {
                w.newline();
                self.class_decl(&mut w, class)?;
            }
        }

        w.newline();
        w.section("Module");
        for g in &module.globals {
            let ty = self.names.ty(&g.ty)?;
            w.line(&format!("extern {ty} {};", escape(names::split_qualified(&g.name).1)));
        }
        for f in &module.functions {
            let params = self.params(&f.params, true)?;
            let ret = self.names.ret(&f.ret)?;
            w.line(&format!("{ret} {}({params});", escape(names::split_qualified(&f.name).1)));
        }
        w.line("void __module_init__();");
        if module.entry.is_some() {
            w.line("int __main__(int argc, const char* argv[]);");
        }
        Ok(w.finish())
    }

    /// Classes with bases and by-value fields defined before their users.
    fn definition_order(&self) -> Vec<&'a LClass> {
        let module = self.module;
        let mut order: Vec<&'a LClass> = Vec::new();
        let mut pending: Vec<&'a LClass> = module.classes.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut i = 0;
            while i < pending.len() {
                let class = pending[i];
                let mut deps: Vec<String> = class.bases.clone();
                for f in &class.fields {
                    self.value_classes_in(&f.ty, &mut deps);
                }
                let ready = deps.iter().all(|d| {
                    d == &class.name || !self.classes.contains_key(d.as_str()) || order.iter().any(|c| &c.name == d)
                });
                if ready {
                    order.push(pending.remove(i));
                } else {
                    i += 1;
                }
            }
            if pending.len() == before {
                order.append(&mut pending);
            }
        }
        order
    }

    fn value_classes_in(&self, t: &Type, out: &mut Vec<String>) {
        let Some(n) = t.nominal() else { return };
        match &n.head {
            Head::Class(c) if self.names.repr(c) == Repr::Value => out.push(c.clone()),
            Head::Tuple => n.args.iter().for_each(|a| self.value_classes_in(a, out)),
            _ => {}
        }
    }

    /// Reference classes whose root lives here derive the capability
    /// interface when the module dispatches dynamically.
    fn derives_object(&self, class: &LClass) -> bool {
        if !self.module.dynamic.used || class.repr != Repr::Reference {
            return false;
        }
        let mut current = class;
        loop {
            match current.bases.first() {
                None => return true,
                Some(b) => match self.classes.get(b.as_str()) {
                    Some(base) => current = base,
                    None => return false,
                },
            }
        }
    }

    fn class_decl(&mut self, w: &mut Writer, class: &LClass) -> Result<(), CompileError> {
        let st = self.names.structure(&class.name);
        let mut bases: Vec<String> = class.bases.iter().map(|b| self.names.structure(b)).collect();
        if class.repr == Repr::Reference && class.bases.is_empty() {
            bases.push(format!("std::enable_shared_from_this<{st}>"));
            if self.derives_object(class) {
                bases.push("Object".to_string());
            }
        }
        let inherit = if bases.is_empty() { String::new() } else { format!(" : {}", bases.join(", ")) };
        w.open(&format!("struct {st}{inherit} {{"));

        self.ctx = Context::default();
        for f in &class.fields {
            let ty = self.names.ty(&f.ty)?;
            match &f.default {
                Some(d) => {
                    let d = self.expr(d)?;
                    w.line(&format!("{ty} {} = {};", escape(&f.name), body::bare(&d)));
                }
                None => w.line(&format!("{ty} {}{{}};", escape(&f.name))),
            }
        }

        if let Some(ctor) = &class.ctor {
            let params = self.params(&ctor.params, true)?;
            let needs_default =
                class.repr == Repr::Value && !ctor.params.is_empty() && ctor.params.iter().any(|p| p.default.is_none());
            if needs_default {
                w.line(&format!("{st}() = default;"));
            }
            let explicit = if ctor.params.len() == 1 { "explicit " } else { "" };
            w.line(&format!("{explicit}{st}({params});"));
        } else if let Some(base) = &class.inherit_ctor {
            let base = self.names.structure(base);
            let short = base.rsplit("::").next().unwrap_or(&base).to_string();
            w.line(&format!("using {base}::{short};"));
        }

        match (class.repr, class.bases.is_empty(), class.dtor.is_some()) {
            (Repr::Reference, true, true) => w.line(&format!("virtual ~{st}();")),
            (Repr::Reference, true, false) => w.line(&format!("virtual ~{st}() = default;")),
            (Repr::Reference, false, true) => w.line(&format!("~{st}() override;")),
            (Repr::Value, _, true) => w.line(&format!("~{st}();")),
            _ => {}
        }

        if let Some(root) = &class.hierarchy
            && self.module.hierarchies.iter().any(|h| &h.root == root && !h.open)
        {
            let kind = self.names.tag_enum(root);
            let tag = self.names.tag(root, &class.name);
            if &class.name == root {
                w.line(&format!("virtual {kind} __tag() const {{ return {tag}; }}"));
            } else {
                w.line(&format!("{kind} __tag() const override {{ return {tag}; }}"));
            }
        }

        for m in &class.methods {
            let params = self.params(&m.params, true)?;
            let ret = self.names.ret(&m.ret)?;
            let mut decl = String::new();
            if m.is_static {
                decl.push_str("static ");
            } else if m.is_virtual && !m.is_override {
                decl.push_str("virtual ");
            }
            decl.push_str(&format!("{ret} {}({params})", method_name(&m.name)));
            if m.is_const && !m.is_static {
                decl.push_str(" const");
            }
            if m.is_override {
                decl.push_str(" override");
            }
            if m.body.is_none() {
                decl.push_str(" = 0");
            }
            decl.push(';');
            w.line(&decl);
        }

        if self.derives_object(class) {
            self.adapters(w, class)?;
        }
        self.ctx = Context::default();
        w.close("};");
        Ok(())
    }

    /// Capability-interface overrides forwarding to the typed members.
    fn adapters(&mut self, w: &mut Writer, class: &LClass) -> Result<(), CompileError> {
        let surface = &self.module.dynamic;
        let inherited = |name: &str| {
            let mut current = class;
            while let Some(base) = current.bases.first().and_then(|b| self.classes.get(b.as_str())) {
                if base.method(name).is_some() {
                    return true;
                }
                current = base;
            }
            false
        };
        let parent = match class.bases.first() {
            Some(b) => self.names.structure(b),
            None => "Object".to_string(),
        };

        let mut lines = Vec::new();
        for (method, arity) in &surface.methods {
            match (method.as_str(), *arity) {
                ("__getattr__", 1) if !class.fields.is_empty() => {
                    lines.push("Any dyn_getattr(Any a0) override {".to_string());
                    lines.push("  auto __name = unbox<kiwi::String>(a0);".to_string());
                    for f in &class.fields {
                        lines.push(format!("  if (__name == \"{0}\") {{ return box(this->{1}); }}", f.name, escape(&f.name)));
                    }
                    lines.push(format!("  return {parent}::dyn_getattr(a0);"));
                    lines.push("}".to_string());
                }
                ("__setattr__", 2) if !class.fields.is_empty() => {
                    lines.push("Any dyn_setattr(Any a0, Any a1) override {".to_string());
                    lines.push("  auto __name = unbox<kiwi::String>(a0);".to_string());
                    for f in &class.fields {
                        let ty = self.names.ty(&f.ty)?;
                        lines.push(format!(
                            "  if (__name == \"{0}\") {{ this->{1} = unbox<{ty}>(a1); return nullptr; }}",
                            f.name,
                            escape(&f.name)
                        ));
                    }
                    lines.push(format!("  return {parent}::dyn_setattr(a0, a1);"));
                    lines.push("}".to_string());
                }
                _ => {
                    let Some(m) = class.method(method) else { continue };
                    if m.is_static || m.params.len() != *arity || inherited(method) {
                        continue;
                    }
                    let params: Vec<String> = (0..*arity).map(|i| format!("Any a{i}")).collect();
                    let mut args = Vec::with_capacity(*arity);
                    for (i, p) in m.params.iter().enumerate() {
                        if p.ty.is_dynamic() {
                            args.push(format!("a{i}"));
                        } else {
                            args.push(format!("unbox<{}>(a{i})", self.names.ty(&p.ty)?));
                        }
                    }
                    let call = format!("this->{}({})", method_name(&m.name), args.join(", "));
                    let body = if m.ret.is_none() {
                        format!("{call}; return nullptr;")
                    } else if m.ret.is_dynamic() {
                        format!("return {call};")
                    } else {
                        format!("return box({call});")
                    };
                    lines.push(format!("Any {}({}) override {{ {body} }}", capability(method), params.join(", ")));
                }
            }
        }
        for l in lines {
            w.line(&l);
        }
        Ok(())
    }

    /// Parameter list; defaults only in declarations.
    fn params(&mut self, params: &[LParam], defaults: bool) -> Result<String, CompileError> {
        let saved = std::mem::replace(&mut self.ctx.in_block, false);
        let mut out = Vec::with_capacity(params.len());
        for p in params {
            let ty = self.names.ty(&p.ty)?;
            match (&p.default, defaults) {
                (Some(d), true) => {
                    let d = self.expr(d)?;
                    out.push(format!("{ty} {} = {}", escape(&p.name), body::bare(&d)));
                }
                _ => out.push(format!("{ty} {}", escape(&p.name))),
            }
        }
        self.ctx.in_block = saved;
        Ok(out.join(", "))
    }

    // ── Definition unit ──────────────────────────────────────────────

    fn source(&mut self) -> Result<String, CompileError> {
        let module = self.module;
        let ns = self.names.namespace();
        let mut w = Writer::default();
        w.line(&format!("#include \"{}\"", header_path(&module.name).to_string_lossy().replace('\\', "/")));
        w.newline();
        w.line(&format!("namespace {ns} {{"));

        if !module.globals.is_empty() {
            w.newline();
            for g in &module.globals {
                let ty = self.names.ty(&g.ty)?;
                w.line(&format!("{ty} {}{{}};", escape(names::split_qualified(&g.name).1)));
            }
        }

        for class in &module.classes {
            self.class_defs(&mut w, class)?;
        }

        for f in &module.functions {
            w.newline();
            let params = self.params(&f.params, false)?;
            let ret = self.names.ret(&f.ret)?;
            w.open(&format!("{ret} {}({params}) {{", escape(names::split_qualified(&f.name).1)));
            self.ctx = Context { in_block: true, ..Context::default() };
            self.block(&mut w, &f.body)?;
            self.ctx = Context::default();
            w.close("}");
        }

        w.newline();
        w.open("void __module_init__() {");
        w.line("static bool done = false;");
        w.open("if (done) {");
        w.line("return;");
        w.close("}");
        w.line("done = true;");
        for import in &module.imports {
            w.line(&format!("{}::__module_init__();", self.names.namespace_of(import)));
        }
        self.ctx = Context { in_block: true, ..Context::default() };
        self.block(&mut w, &module.init)?;
        self.ctx = Context::default();
        w.close("}");

        if let Some(entry) = &module.entry {
            w.newline();
            w.open("int __main__(int argc, const char* argv[]) {");
            self.ctx = Context { in_block: true, entry: true, ..Context::default() };
            self.block(&mut w, entry)?;
            self.ctx = Context::default();
            w.line("return 0;");
            w.close("}");
        }

        w.newline();
        w.line(&format!("}} // {ns}"));

        if module.entry.is_some() && self.options.emit_entry_point {
            w.newline();
            w.open("int main(int argc, const char* argv[]) {");
            w.line(&format!("{ns}::__module_init__();"));
            w.line(&format!("return {ns}::__main__(argc, argv);"));
            w.close("}");
        }
        Ok(w.finish())
    }

    fn class_defs(&mut self, w: &mut Writer, class: &LClass) -> Result<(), CompileError> {
        let st = self.names.structure(&class.name);
        let member = Context { in_block: true, ..Context::default() };

        if let Some(ctor) = &class.ctor {
            w.newline();
            let params = self.params(&ctor.params, false)?;
            self.ctx = member.clone();
            let mut inits = Vec::with_capacity(ctor.base_inits.len());
            for (base, args) in &ctor.base_inits {
                let args = self.args(args)?;
                inits.push(format!("{}({args})", self.names.structure(base)));
            }
            let inits = if inits.is_empty() { String::new() } else { format!(" : {}", inits.join(", ")) };
            w.open(&format!("{st}::{st}({params}){inits} {{"));
            self.block(w, &ctor.body)?;
            w.close("}");
        }

        if let Some(dtor) = &class.dtor {
            w.newline();
            self.ctx = member.clone();
            w.open(&format!("{st}::~{st}() {{"));
            self.block(w, dtor)?;
            w.close("}");
        }

        for m in &class.methods {
            let Some(body) = &m.body else { continue };
            w.newline();
            self.ctx = Context { is_const: m.is_const && !m.is_static, ..member.clone() };
            let params = self.params(&m.params, false)?;
            let ret = self.names.ret(&m.ret)?;
            let constness = if m.is_const && !m.is_static { " const" } else { "" };
            w.open(&format!("{ret} {st}::{}({params}){constness} {{", method_name(&m.name)));
            self.block(w, body)?;
            w.close("}");
        }
        self.ctx = Context::default();
        Ok(())
    }

    /// Tagged hierarchy rooted at `root`.
    fn hierarchy(&self, root: &str) -> Option<&'a LHierarchy> {
        self.module.hierarchies.iter().find(|h| h.root == root)
    }

    /// The prelude is needed by dynamic dispatch and by any `Any` slot.
    fn uses_any(&self) -> bool {
        self.module.dynamic.used || self.names.mentions_any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::{BinOp, CmpOp};

    fn param(name: &str, ty: Type) -> LParam {
        LParam { name: name.into(), ty, default: None }
    }

    fn method(name: &str, kind: MethodKind, params: Vec<LParam>, ret: Type, body: Vec<LStmt>) -> LMethod {
        LMethod {
            name: name.into(),
            kind,
            params,
            ret,
            body: Some(body),
            is_virtual: false,
            is_override: false,
            is_const: false,
            is_static: false,
        }
    }

    fn module(classes: Vec<LClass>) -> LModule {
        let reprs = classes.iter().map(|c| (c.name.clone(), c.repr)).collect();
        LModule {
            name: "geo.point".into(),
            includes: vec![Include::Runtime("kiwi".into()), Include::System("memory".into())],
            imports: Vec::new(),
            hierarchies: Vec::new(),
            classes,
            functions: Vec::new(),
            globals: Vec::new(),
            init: Vec::new(),
            entry: None,
            dynamic: DynamicSurface::default(),
            uses_print: false,
            reprs,
        }
    }

    fn point() -> LClass {
        let p = Type::class("geo.point.Point");
        let field = |f: &str| LExpr::Field { object: LExpr::SelfRef { class: "geo.point.Point".into(), repr: Repr::Value }.boxed(), field: f.into(), repr: Repr::Value };
        let other = |f: &str| LExpr::Field { object: LExpr::Local("other".into()).boxed(), field: f.into(), repr: Repr::Value };
        let sum = |f: &str| LExpr::Binary {
            op: BinOp::Add,
            left: field(f).boxed(),
            right: other(f).boxed(),
            dispatch: Dispatch::Primitive,
            ty: Type::float(),
        };
        LClass {
            name: "geo.point.Point".into(),
            repr: Repr::Value,
            bases: Vec::new(),
            hierarchy: None,
            fields: vec![
                LField { name: "x".into(), ty: Type::float(), default: None },
                LField { name: "y".into(), ty: Type::float(), default: None },
            ],
            ctor: Some(LCtor {
                params: vec![param("x", Type::float()), param("y", Type::float())],
                base_inits: Vec::new(),
                body: vec![
                    LStmt::Assign {
                        target: LPlace::Field { object: LExpr::SelfRef { class: "geo.point.Point".into(), repr: Repr::Value }, field: "x".into(), repr: Repr::Value },
                        value: LExpr::Local("x".into()),
                    },
                    LStmt::Assign {
                        target: LPlace::Field { object: LExpr::SelfRef { class: "geo.point.Point".into(), repr: Repr::Value }, field: "y".into(), repr: Repr::Value },
                        value: LExpr::Local("y".into()),
                    },
                ],
            }),
            inherit_ctor: None,
            dtor: None,
            methods: vec![
                method(
                    "__add__",
                    MethodKind::Operator,
                    vec![param("other", p.clone())],
                    p.clone(),
                    vec![LStmt::Return(Some(LExpr::Construct {
                        class: "geo.point.Point".into(),
                        repr: Repr::Value,
                        args: vec![sum("x"), sum("y")],
                    }))],
                ),
                method(
                    "__eq__",
                    MethodKind::Operator,
                    vec![param("other", p)],
                    Type::boolean(),
                    vec![LStmt::Return(Some(LExpr::Logical {
                        op: crate::parser::ast::BoolOp::And,
                        left: LExpr::Compare { op: CmpOp::Eq, left: field("x").boxed(), right: other("x").boxed(), dispatch: Dispatch::Primitive }.boxed(),
                        right: LExpr::Compare { op: CmpOp::Eq, left: field("y").boxed(), right: other("y").boxed(), dispatch: Dispatch::Primitive }.boxed(),
                    }))],
                ),
            ],
            is_abstract: false,
        }
    }

    #[test]
    fn writer_indents_two_spaces() {
        let mut w = Writer::default();
        w.open("struct A {");
        w.line("int x;");
        w.close("};");
        assert_eq!(w.finish(), "struct A {\n  int x;\n};\n");
    }

    #[test]
    fn value_class_is_a_plain_struct() {
        let out = emit_module(&module(vec![point()]), &EmitOptions::default()).unwrap();
        assert!(out.header.starts_with("#ifndef GEO_POINT_HEADER\n#define GEO_POINT_HEADER\n"));
        assert!(out.header.contains("#include \"kiwi\""));
        assert!(out.header.contains("namespace geo::point {"));
        assert!(out.header.contains("struct Point {"));
        assert!(out.header.contains("  double x{};"));
        assert!(out.header.contains("  Point() = default;"));
        assert!(out.header.contains("  Point(double x, double y);"));
        assert!(out.header.contains("  Point operator+(Point other);"));
        assert!(out.header.contains("  bool operator==(Point other);"));
        assert!(out.header.contains("} // geo::point"));
        assert!(!out.header.contains("shared_ptr<Point"));
        assert!(out.source.contains("Point::Point(double x, double y) {"));
        assert!(out.source.contains("this->x = x;"));
        assert!(out.source.contains("return Point((this->x + other.x), (this->y + other.y));"));
        assert!(out.source.contains("return (this->x == other.x) && (this->y == other.y);"));
        assert_eq!(out.header_path, PathBuf::from("geo/point.h"));
    }

    #[test]
    fn reference_hierarchy_gets_handles_and_tags() {
        let base = LClass {
            name: "geo.point.Shape".into(),
            repr: Repr::Reference,
            bases: Vec::new(),
            hierarchy: Some("geo.point.Shape".into()),
            fields: Vec::new(),
            ctor: None,
            inherit_ctor: None,
            dtor: None,
            methods: vec![LMethod {
                body: None,
                is_virtual: true,
                ..method("area", MethodKind::Regular, Vec::new(), Type::float(), Vec::new())
            }],
            is_abstract: true,
        };
        let square = LClass {
            name: "geo.point.Square".into(),
            repr: Repr::Reference,
            bases: vec!["geo.point.Shape".into()],
            hierarchy: Some("geo.point.Shape".into()),
            fields: vec![LField { name: "side".into(), ty: Type::float(), default: Some(LExpr::Float(1.0)) }],
            ctor: None,
            inherit_ctor: None,
            dtor: None,
            methods: vec![LMethod {
                is_virtual: true,
                is_override: true,
                ..method("area", MethodKind::Regular, Vec::new(), Type::float(), vec![LStmt::Return(Some(LExpr::Float(4.0)))])
            }],
            is_abstract: false,
        };
        let mut m = module(vec![base, square]);
        m.hierarchies.push(LHierarchy {
            root: "geo.point.Shape".into(),
            members: vec!["geo.point.Shape".into(), "geo.point.Square".into()],
            open: false,
        });
        let out = emit_module(&m, &EmitOptions::default()).unwrap();
        assert!(out.header.contains("struct _Shape;\nusing Shape = std::shared_ptr<_Shape>;"));
        assert!(out.header.contains("enum class ShapeKind { Shape, Square };"));
        assert!(out.header.contains("struct _Shape : std::enable_shared_from_this<_Shape> {"));
        assert!(out.header.contains("  virtual ~_Shape() = default;"));
        assert!(out.header.contains("  virtual ShapeKind __tag() const { return ShapeKind::Shape; }"));
        assert!(out.header.contains("  virtual double area() = 0;"));
        assert!(out.header.contains("struct _Square : _Shape {"));
        assert!(out.header.contains("  double side = 1.0;"));
        assert!(out.header.contains("  double area() override;"));
        assert!(out.source.contains("double _Square::area() {"));
        assert!(!out.source.contains("_Shape::area"));
    }

    #[test]
    fn entry_point_runs_initialiser_first() {
        let mut m = module(Vec::new());
        m.entry = Some(vec![LStmt::Return(None)]);
        let out = emit_module(&m, &EmitOptions::default()).unwrap();
        assert!(out.source.contains("int __main__(int argc, const char* argv[]) {\n  return 0;"));
        assert!(out.source.contains("int main(int argc, const char* argv[]) {\n  geo::point::__module_init__();\n  return geo::point::__main__(argc, argv);\n}"));

        let quiet = emit_module(&m, &EmitOptions { emit_entry_point: false, ..EmitOptions::default() }).unwrap();
        assert!(!quiet.source.contains("int main("));
    }

    #[test]
    fn module_initialiser_runs_once_and_imports_first() {
        let mut m = module(Vec::new());
        m.imports.push("geo.base".into());
        m.globals.push(LGlobal { name: "geo.point.ORIGIN".into(), ty: Type::int(), constant: true });
        m.init.push(LStmt::Assign { target: LPlace::Global("geo.point.ORIGIN".into()), value: LExpr::Int(0) });
        let out = emit_module(&m, &EmitOptions::default()).unwrap();
        assert!(out.header.contains("extern int ORIGIN;"));
        assert!(out.source.contains("int ORIGIN{};"));
        let init = out.source.find("void __module_init__() {").unwrap();
        let import = out.source.find("geo::base::__module_init__();").unwrap();
        let assign = out.source.find("ORIGIN = 0;").unwrap();
        assert!(init < import && import < assign);
    }

    #[test]
    fn leftover_union_is_an_internal_error() {
        let mut m = module(Vec::new());
        m.globals.push(LGlobal { name: "geo.point.g".into(), ty: Type::Union(vec![Type::int(), Type::str()]), constant: false });
        let err = emit_module(&m, &EmitOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Internal { .. }));
    }
}
