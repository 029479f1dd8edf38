//! Names available without a definition, and the `math` module surface.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Int,
    Float,
    Str,
    Bool,
    Repr,
    Abs,
    Min,
    Max,
    Sum,
    IsInstance,
    Type,
    GetAttr,
    HasAttr,
    List,
    Dict,
    Set,
    Tuple,
    Sorted,
    Super,
    Object,
    NotImplemented,
    NotImplementedError,
    Exception,
    ValueError,
    TypeError,
    KeyError,
    IndexError,
    RuntimeError,
    DunderName,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        let b = match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "bool" => Builtin::Bool,
            "repr" => Builtin::Repr,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "sum" => Builtin::Sum,
            "isinstance" => Builtin::IsInstance,
            "type" => Builtin::Type,
            "getattr" => Builtin::GetAttr,
            "hasattr" => Builtin::HasAttr,
            "list" => Builtin::List,
            "dict" => Builtin::Dict,
            "set" => Builtin::Set,
            "tuple" => Builtin::Tuple,
            "sorted" => Builtin::Sorted,
            "super" => Builtin::Super,
            "object" => Builtin::Object,
            "NotImplemented" => Builtin::NotImplemented,
            "NotImplementedError" => Builtin::NotImplementedError,
            "Exception" => Builtin::Exception,
            "ValueError" => Builtin::ValueError,
            "TypeError" => Builtin::TypeError,
            "KeyError" => Builtin::KeyError,
            "IndexError" => Builtin::IndexError,
            "RuntimeError" => Builtin::RuntimeError,
            "__name__" => Builtin::DunderName,
            _ => return None,
        };
        Some(b)
    }

    /// Exception classes usable in `raise`.
    pub fn is_exception(self) -> bool {
        matches!(
            self,
            Builtin::NotImplementedError
                | Builtin::Exception
                | Builtin::ValueError
                | Builtin::TypeError
                | Builtin::KeyError
                | Builtin::IndexError
                | Builtin::RuntimeError
        )
    }

    /// The "not implemented" sentinels that mark an interface requirement.
    pub fn is_not_implemented(self) -> bool {
        matches!(self, Builtin::NotImplemented | Builtin::NotImplementedError)
    }

    /// Runtime exception type a raise of this builtin is lowered to.
    pub fn runtime_exception(self) -> &'static str {
        match self {
            Builtin::ValueError | Builtin::TypeError | Builtin::KeyError | Builtin::IndexError => "ValueError",
            _ => "Exception",
        }
    }
}

/// Modules whose imports carry no runtime meaning for the emitted code.
pub fn is_runtime_module(path: &str) -> bool {
    matches!(path, "kiwi" | "tide.runtime.kiwi" | "typing" | "__future__" | "abc")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathMember {
    /// Function returning float.
    FloatFn(&'static str),
    /// Function returning int.
    IntFn(&'static str),
    Constant(&'static str),
}

/// Map a `math.<name>` member to its `<cmath>` spelling.
pub fn math_member(name: &str) -> Option<MathMember> {
    let m = match name {
        "sqrt" => MathMember::FloatFn("std::sqrt"),
        "exp" => MathMember::FloatFn("std::exp"),
        "log" => MathMember::FloatFn("std::log"),
        "log10" => MathMember::FloatFn("std::log10"),
        "sin" => MathMember::FloatFn("std::sin"),
        "cos" => MathMember::FloatFn("std::cos"),
        "tan" => MathMember::FloatFn("std::tan"),
        "atan2" => MathMember::FloatFn("std::atan2"),
        "pow" => MathMember::FloatFn("std::pow"),
        "fabs" => MathMember::FloatFn("std::fabs"),
        "floor" => MathMember::IntFn("std::floor"),
        "ceil" => MathMember::IntFn("std::ceil"),
        "gcd" => MathMember::IntFn("std::gcd"),
        "pi" => MathMember::Constant("M_PI"),
        "e" => MathMember::Constant("M_E"),
        "inf" => MathMember::Constant("INFINITY"),
        _ => return None,
    };
    Some(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_names() {
        assert_eq!(Builtin::lookup("len"), Some(Builtin::Len));
        assert_eq!(Builtin::lookup("__name__"), Some(Builtin::DunderName));
        assert_eq!(Builtin::lookup("Point"), None);
    }

    #[test]
    fn exception_classification() {
        assert!(Builtin::ValueError.is_exception());
        assert!(!Builtin::NotImplemented.is_exception());
        assert!(Builtin::NotImplementedError.is_not_implemented());
        assert_eq!(Builtin::KeyError.runtime_exception(), "ValueError");
        assert_eq!(Builtin::RuntimeError.runtime_exception(), "Exception");
    }

    #[test]
    fn math_members() {
        assert_eq!(math_member("sqrt"), Some(MathMember::FloatFn("std::sqrt")));
        assert_eq!(math_member("gcd"), Some(MathMember::IntFn("std::gcd")));
        assert_eq!(math_member("pi"), Some(MathMember::Constant("M_PI")));
        assert!(math_member("frobnicate").is_none());
    }
}
