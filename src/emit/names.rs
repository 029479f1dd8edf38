//! C++ spelling of source names and settled types.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::diagnostics::CompileError;
use crate::lower::ir::{operator_symbol, Repr};
use crate::types::{Head, ScalarKind, Type};

const KEYWORDS: &[&str] = &[
    "alignas", "alignof", "asm", "auto", "bool", "case", "catch", "char", "class", "const", "const_cast",
    "constexpr", "decltype", "default", "delete", "do", "double", "dynamic_cast", "else", "enum", "explicit",
    "export", "extern", "float", "friend", "goto", "inline", "int", "long", "mutable", "namespace", "new",
    "noexcept", "nullptr", "operator", "private", "protected", "public", "register", "reinterpret_cast",
    "short", "signed", "sizeof", "static", "static_assert", "static_cast", "struct", "switch", "template",
    "this", "thread_local", "throw", "typedef", "typeid", "typename", "union", "unsigned", "using", "virtual",
    "void", "volatile", "wchar_t", "std", "kiwi", "Any", "Object", "box", "unbox",
];

/// Identifier safe to use in C++: keywords get a trailing underscore.
pub fn escape(name: &str) -> String {
    if KEYWORDS.contains(&name) { format!("{name}_") } else { name.to_string() }
}

/// `a.b` -> `A_B_HEADER`.
pub fn header_guard(module: &str) -> String {
    format!("{}_HEADER", module.replace('.', "_").to_uppercase())
}

/// `a.b` -> `a/b.h`.
pub fn header_path(module: &str) -> PathBuf {
    PathBuf::from(format!("{}.h", module.replace('.', "/")))
}

/// `a.b` -> `a/b.cpp`.
pub fn source_path(module: &str) -> PathBuf {
    PathBuf::from(format!("{}.cpp", module.replace('.', "/")))
}

/// Member name of a source method: dunders with an operator spelling become
/// `operator<sym>`.
pub fn method_name(source: &str) -> String {
    match operator_symbol(source) {
        Some(sym) => format!("operator{sym}"),
        None => escape(source),
    }
}

/// Name of a capability-interface method. Operator dunders keep their
/// name; everything else is prefixed so it cannot clash with the typed
/// member of the same name.
pub fn capability(method: &str) -> String {
    if operator_symbol(method).is_some() || matches!(method, "__floordiv__" | "__pow__") {
        method.to_string()
    } else {
        format!("dyn_{}", method.trim_matches('_'))
    }
}

/// `(module, last segment)` of a qualified name.
pub fn split_qualified(qualified: &str) -> (&str, &str) {
    match qualified.rsplit_once('.') {
        Some((module, name)) => (module, name),
        None => ("", qualified),
    }
}

/// Name resolution relative to the module being emitted.
#[derive(Debug, Clone)]
pub struct Names {
    module: String,
    namespace_root: Option<String>,
    reprs: HashMap<String, Repr>,
    /// Set once any type spelled as the dynamic placeholder.
    any: Cell<bool>,
}

impl Names {
    pub fn new(module: &str, namespace_root: Option<String>, reprs: HashMap<String, Repr>) -> Self {
        Self { module: module.to_string(), namespace_root, reprs, any: Cell::new(false) }
    }

    /// Whether `Any` appeared in any spelled type so far.
    pub fn mentions_any(&self) -> bool {
        self.any.get()
    }

    fn placeholder(&self) -> String {
        self.any.set(true);
        "Any".to_string()
    }

    /// Namespace of a module path.
    pub fn namespace_of(&self, module: &str) -> String {
        let path = module.split('.').map(escape).collect::<Vec<_>>().join("::");
        match &self.namespace_root {
            Some(root) if !root.is_empty() => format!("{root}::{path}"),
            _ => path,
        }
    }

    pub fn namespace(&self) -> String {
        self.namespace_of(&self.module)
    }

    pub fn repr(&self, class: &str) -> Repr {
        self.reprs.get(class).copied().unwrap_or(Repr::Reference)
    }

    fn qualify(&self, qualified: &str, name: String) -> String {
        let (module, _) = split_qualified(qualified);
        if module.is_empty() || module == self.module {
            name
        } else {
            format!("{}::{name}", self.namespace_of(module))
        }
    }

    /// Path of a global, function or class handle type.
    pub fn value(&self, qualified: &str) -> String {
        let (_, name) = split_qualified(qualified);
        self.qualify(qualified, escape(name))
    }

    /// Path of the struct behind a class: `_Name` for shared objects.
    pub fn structure(&self, qualified: &str) -> String {
        let (_, name) = split_qualified(qualified);
        let local = match self.repr(qualified) {
            Repr::Reference => format!("_{name}"),
            Repr::Value => escape(name),
        };
        self.qualify(qualified, local)
    }

    /// Enumeration holding the tags of a closed hierarchy.
    pub fn tag_enum(&self, root: &str) -> String {
        let (_, name) = split_qualified(root);
        self.qualify(root, format!("{name}Kind"))
    }

    /// Tag of one class of a closed hierarchy.
    pub fn tag(&self, root: &str, class: &str) -> String {
        format!("{}::{}", self.tag_enum(root), split_qualified(class).1)
    }

    /// C++ type of a settled slot. Leftover `Unknown` or `Union` is an
    /// internal error: lowering must have settled it.
    pub fn ty(&self, t: &Type) -> Result<String, CompileError> {
        Ok(match t {
            Type::Scalar(ScalarKind::Bool) => "bool".to_string(),
            Type::Scalar(ScalarKind::Int) => "int".to_string(),
            Type::Scalar(ScalarKind::Float) => "double".to_string(),
            Type::Scalar(ScalarKind::Str) => "kiwi::String".to_string(),
            Type::Scalar(ScalarKind::None) => {
                return Err(CompileError::internal("None type reached a value slot"));
            }
            Type::Dynamic => self.placeholder(),
            Type::Nominal(n) => match &n.head {
                Head::Class(c) => self.value(c),
                Head::List => format!("kiwi::List<{}>", self.arg(t, 0)?),
                Head::Dict => format!("kiwi::Dict<{}, {}>", self.arg(t, 0)?, self.arg(t, 1)?),
                Head::Set => format!("kiwi::Dict<{}, bool>", self.arg(t, 0)?),
                Head::Tuple => {
                    let items = n.args.iter().map(|a| self.ty(a)).collect::<Result<Vec<_>, _>>()?;
                    format!("std::tuple<{}>", items.join(", "))
                }
            },
            Type::Function(params, ret) => {
                let params = params.iter().map(|p| self.ty(p)).collect::<Result<Vec<_>, _>>()?;
                format!("std::function<{}({})>", self.ret(ret)?, params.join(", "))
            }
            Type::Unknown => return Err(CompileError::internal("unresolved type reached emission")),
            Type::Union(_) => return Err(CompileError::internal(format!("union type '{t}' reached emission"))),
        })
    }

    /// Container argument; a `None` element is the dynamic placeholder.
    pub fn arg(&self, t: &Type, i: usize) -> Result<String, CompileError> {
        match t.arg(i) {
            Type::Scalar(ScalarKind::None) => Ok(self.placeholder()),
            a => self.ty(&a),
        }
    }

    /// Return type: `None` is `void`.
    pub fn ret(&self, t: &Type) -> Result<String, CompileError> {
        if t.is_none() { Ok("void".to_string()) } else { self.ty(t) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Names {
        let mut reprs = HashMap::new();
        reprs.insert("m.P".to_string(), Repr::Value);
        reprs.insert("m.E".to_string(), Repr::Reference);
        reprs.insert("lib.shapes.S".to_string(), Repr::Reference);
        Names::new("m", None, reprs)
    }

    #[test]
    fn keywords_are_suffixed() {
        assert_eq!(escape("new"), "new_");
        assert_eq!(escape("value"), "value");
    }

    #[test]
    fn module_paths() {
        assert_eq!(header_guard("symdiff.expr"), "SYMDIFF_EXPR_HEADER");
        assert_eq!(header_path("symdiff.expr"), PathBuf::from("symdiff/expr.h"));
        assert_eq!(source_path("point"), PathBuf::from("point.cpp"));
    }

    #[test]
    fn structs_follow_representation() {
        let n = names();
        assert_eq!(n.structure("m.P"), "P");
        assert_eq!(n.structure("m.E"), "_E");
        assert_eq!(n.structure("lib.shapes.S"), "lib::shapes::_S");
        assert_eq!(n.value("lib.shapes.S"), "lib::shapes::S");
    }

    #[test]
    fn namespace_root_prefixes_paths() {
        let n = Names::new("a.b", Some("app".into()), HashMap::new());
        assert_eq!(n.namespace(), "app::a::b");
        assert_eq!(n.value("c.d.f"), "app::c::d::f");
        assert_eq!(n.value("a.b.f"), "f");
    }

    #[test]
    fn types() {
        let n = names();
        assert_eq!(n.ty(&Type::list(Type::int())).unwrap(), "kiwi::List<int>");
        assert_eq!(n.ty(&Type::set(Type::str())).unwrap(), "kiwi::Dict<kiwi::String, bool>");
        assert_eq!(n.ty(&Type::dict(Type::str(), Type::Dynamic)).unwrap(), "kiwi::Dict<kiwi::String, Any>");
        assert_eq!(n.ty(&Type::list(Type::none())).unwrap(), "kiwi::List<Any>");
        assert_eq!(n.ty(&Type::tuple(vec![Type::float(), Type::boolean()])).unwrap(), "std::tuple<double, bool>");
        assert_eq!(n.ret(&Type::none()).unwrap(), "void");
        assert_eq!(
            n.ty(&Type::Function(vec![Type::int()], Box::new(Type::none()))).unwrap(),
            "std::function<void(int)>"
        );
        assert!(n.ty(&Type::Unknown).is_err());
        assert!(n.mentions_any());
        assert!(matches!(
            n.ty(&Type::list(Type::Unknown)),
            Err(CompileError::Internal { .. })
        ));
        assert!(n.ty(&Type::Union(vec![Type::int(), Type::str()])).is_err());
    }

    #[test]
    fn capability_names() {
        assert_eq!(capability("__add__"), "__add__");
        assert_eq!(capability("__str__"), "dyn_str");
        assert_eq!(capability("evaluate"), "dyn_evaluate");
        assert_eq!(method_name("__mul__"), "operator*");
        assert_eq!(method_name("__getitem__"), "operator[]");
    }
}
