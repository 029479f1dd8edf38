//! The capability interface `Object` behind the dynamic placeholder `Any`,
//! with the boxing helpers that move typed values in and out of it.

use crate::lower::ir::DynamicSurface;

use super::names::capability;

/// Capabilities that boxed builtin values answer themselves.
fn boxed_body(method: &str) -> Option<&'static str> {
    let body = match method {
        "__add__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String>) { return box(value + unbox<T>(a0)); }",
        "__sub__" => "if constexpr (std::is_arithmetic_v<T>) { return box(value - unbox<T>(a0)); }",
        "__mul__" => "if constexpr (std::is_arithmetic_v<T>) { return box(value * unbox<T>(a0)); }",
        "__truediv__" => "if constexpr (std::is_arithmetic_v<T>) { return box(static_cast<double>(value) / unbox<double>(a0)); }",
        "__mod__" => "if constexpr (std::is_integral_v<T>) { return box(value % unbox<T>(a0)); }",
        "__neg__" => "if constexpr (std::is_arithmetic_v<T>) { return box(-value); }",
        "__eq__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String>) { return box(value == unbox<T>(a0)); }",
        "__ne__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String>) { return box(value != unbox<T>(a0)); }",
        "__lt__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String>) { return box(value < unbox<T>(a0)); }",
        "__le__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String>) { return box(value <= unbox<T>(a0)); }",
        "__gt__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String>) { return box(value > unbox<T>(a0)); }",
        "__ge__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String>) { return box(value >= unbox<T>(a0)); }",
        "__str__" | "__repr__" => "if constexpr (std::is_arithmetic_v<T> || std::is_same_v<T, kiwi::String> || has_repr<T>::value) { return box(kiwi::repr(value)); }",
        "__len__" => "if constexpr (std::is_same_v<T, kiwi::String> || has_len<T>::value) { return box(kiwi::len(value)); }",
        "__bool__" => {
            "if constexpr (std::is_arithmetic_v<T>) { return box(value != 0); } \
             else if constexpr (std::is_same_v<T, kiwi::String> || has_len<T>::value) { return box(kiwi::len(value) > 0); } \
             else { return box(true); }"
        }
        _ => return None,
    };
    Some(body)
}

fn params(arity: usize) -> String {
    (0..arity).map(|i| format!("Any a{i}")).collect::<Vec<_>>().join(", ")
}

fn args(arity: usize) -> String {
    (0..arity).map(|i| format!("a{i}")).collect::<Vec<_>>().join(", ")
}

/// Declarations of `Object`, `Any`, `Boxed<T>`, `box` and `unbox` for the
/// capabilities this module dispatches dynamically.
pub fn render(surface: &DynamicSurface) -> String {
    let mut out = String::new();
    let mut line = |s: &str| {
        out.push_str(s);
        out.push('\n');
    };

    line("struct Object;");
    line("using Any = std::shared_ptr<Object>;");
    line("");
    line("template <typename T> struct is_handle : std::false_type {};");
    line("template <typename U> struct is_handle<std::shared_ptr<U>> : std::true_type {};");
    line("template <typename T, typename = void> struct has_repr : std::false_type {};");
    line("template <typename T> struct has_repr<T, std::void_t<decltype(std::declval<T const&>().__repr__())>> : std::true_type {};");
    line("template <typename T, typename = void> struct has_len : std::false_type {};");
    line("template <typename T> struct has_len<T, std::void_t<decltype(std::declval<T const&>().__len__())>> : std::true_type {};");
    line("");
    line("template <typename T> Any box(T value);");
    line("template <typename T> T unbox(Any const& value);");
    line("");
    line("struct Object {");
    line("  virtual ~Object() = default;");
    for (method, arity) in &surface.methods {
        line(&format!(
            "  virtual Any {}({}) {{ throw kiwi::Exception(\"unsupported dynamic operation '{{}}'\", \"{method}\"); }}",
            capability(method),
            params(*arity)
        ));
    }
    line("};");
    line("");
    line("template <typename T>");
    line("struct Boxed final : Object {");
    line("  T value;");
    line("  explicit Boxed(T value) : value(std::move(value)) {}");
    for (method, arity) in &surface.methods {
        let Some(body) = boxed_body(method) else { continue };
        let name = capability(method);
        line(&format!("  Any {name}({}) override {{", params(*arity)));
        line(&format!("    {body}"));
        if !body.contains("else {") {
            line(&format!("    return Object::{name}({});", args(*arity)));
        }
        line("  }");
    }
    line("};");
    line("");
    line("template <typename T>");
    line("Any box(T value) {");
    line("  if constexpr (is_handle<T>::value) {");
    line("    if constexpr (std::is_base_of_v<Object, typename T::element_type>) { return value; }");
    line("    else { return std::make_shared<Boxed<T>>(std::move(value)); }");
    line("  } else {");
    line("    return std::make_shared<Boxed<T>>(std::move(value));");
    line("  }");
    line("}");
    line("");
    line("template <typename T>");
    line("T unbox(Any const& value) {");
    line("  if constexpr (is_handle<T>::value && std::is_base_of_v<Object, typename T::element_type>) {");
    line("    auto cast = std::dynamic_pointer_cast<typename T::element_type>(value);");
    line("    if (value && !cast) { throw kiwi::ValueError(\"dynamic value has the wrong class\"); }");
    line("    return cast;");
    line("  } else {");
    line("    if (auto boxed = std::dynamic_pointer_cast<Boxed<T>>(value)) { return boxed->value; }");
    line("    if constexpr (std::is_arithmetic_v<T>) {");
    line("      if (auto i = std::dynamic_pointer_cast<Boxed<int>>(value)) { return static_cast<T>(i->value); }");
    line("      if (auto f = std::dynamic_pointer_cast<Boxed<double>>(value)) { return static_cast<T>(f->value); }");
    line("      if (auto b = std::dynamic_pointer_cast<Boxed<bool>>(value)) { return static_cast<T>(b->value); }");
    line("    }");
    line("    throw kiwi::ValueError(\"dynamic value does not hold the expected type\");");
    line("  }");
    line("}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_lists_each_capability_once() {
        let mut surface = DynamicSurface::default();
        surface.note("__add__", 1);
        surface.note("__add__", 1);
        surface.note("evaluate", 0);
        let text = render(&surface);
        assert_eq!(text.matches("virtual Any __add__(Any a0)").count(), 1);
        assert!(text.contains("virtual Any dyn_evaluate()"));
        assert!(text.contains("Any __add__(Any a0) override"));
        assert!(!text.contains("Any dyn_evaluate() override"));
    }

    #[test]
    fn boxing_helpers_are_declared_before_object() {
        let text = render(&DynamicSurface::default());
        let decl = text.find("template <typename T> Any box(T value);").unwrap();
        let object = text.find("struct Object {").unwrap();
        assert!(decl < object);
    }
}
