//! Methods of the runtime containers and of strings, plus `%` templates.

use crate::diagnostics::CompileError;
use crate::lower::ir::{ContainerKind, LExpr};
use crate::types::Type;

use super::body::{bare, string_literal};
use super::Emitter;

const WHITESPACE: &str = "\" \\t\\n\\r\\f\\v\"";

/// `%`-style template in the runtime's brace syntax. Literal braces are
/// doubled; unknown conversions are kept as written.
pub(super) fn percent_template(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => out.push_str("{{"),
            '}' => out.push_str("}}"),
            '%' => {
                if chars.peek() == Some(&'%') {
                    chars.next();
                    out.push('%');
                    continue;
                }
                let mut spec = String::new();
                while let Some(&n) = chars.peek() {
                    if "-+ #0123456789.".contains(n) {
                        spec.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let spec = match spec.strip_prefix('-') {
                    Some(rest) => format!("<{rest}"),
                    None => spec,
                };
                match chars.next() {
                    Some('s' | 'r') if spec.is_empty() => out.push_str("{}"),
                    Some('s' | 'r') => out.push_str(&format!("{{:{spec}}}")),
                    Some('d' | 'i') if spec.is_empty() => out.push_str("{}"),
                    Some('d' | 'i') => out.push_str(&format!("{{:{spec}d}}")),
                    Some(conv @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o')) => {
                        out.push_str(&format!("{{:{spec}{conv}}}"))
                    }
                    Some(other) => {
                        out.push('%');
                        out.push_str(&spec);
                        out.push(other);
                    }
                    None => {
                        out.push('%');
                        out.push_str(&spec);
                    }
                }
            }
            c => out.push(c),
        }
    }
    out
}

impl<'a> Emitter<'a> {
    pub(super) fn container_call(
        &mut self,
        receiver: &LExpr,
        kind: ContainerKind,
        of: &Type,
        method: &str,
        args: &[LExpr],
    ) -> Result<String, CompileError> {
        if kind == ContainerKind::Str && method == "format" {
            return self.str_format(receiver, args);
        }
        let r = self.expr(receiver)?;
        let a = self.arg_list(args)?;
        match kind {
            ContainerKind::List => self.list_method(&r, of, method, &a),
            ContainerKind::Dict => self.dict_method(&r, of, method, &a),
            ContainerKind::Set => self.set_method(&r, of, method, &a),
            ContainerKind::Str => self.str_method(&r, method, &a),
            ContainerKind::Tuple => Err(CompileError::internal(format!("tuple method '{method}' reached emission"))),
        }
    }

    fn list_method(&mut self, r: &str, of: &Type, method: &str, a: &[String]) -> Result<String, CompileError> {
        let cap = self.capture();
        Ok(match method {
            "copy" => {
                let ty = self.names.ty(of)?;
                format!("{cap}() {{ {ty} __r; for (auto const& __x : {r}) {{ __r.append(__x); }} return __r; }}()")
            }
            _ => format!("{r}.{method}({})", a.join(", ")),
        })
    }

    fn dict_method(&mut self, r: &str, of: &Type, method: &str, a: &[String]) -> Result<String, CompileError> {
        let cap = self.capture();
        Ok(match (method, a) {
            ("get", [k]) => format!("{r}.get({k}, {}())", self.names.arg(of, 1)?),
            ("keys", []) => {
                let k = self.names.arg(of, 0)?;
                format!("{cap}() {{ kiwi::List<{k}> __r; for (auto const& __x : {r}.keys()) {{ __r.append(__x); }} return __r; }}()")
            }
            ("values", []) => {
                let v = self.names.arg(of, 1)?;
                format!("{cap}() {{ kiwi::List<{v}> __r; for (auto const& __x : {r}.values()) {{ __r.append(__x); }} return __r; }}()")
            }
            ("items", []) => {
                let (k, v) = (self.names.arg(of, 0)?, self.names.arg(of, 1)?);
                format!(
                    "{cap}() {{ kiwi::List<std::tuple<{k}, {v}>> __r; for (auto const& __x : {r}.items()) {{ __r.append(__x); }} return __r; }}()"
                )
            }
            ("copy", []) => {
                let ty = self.names.ty(of)?;
                format!("{cap}() {{ auto __s = {r}; {ty} __r; for (auto const& __k : __s) {{ __r[__k] = __s[__k]; }} return __r; }}()")
            }
            _ => format!("{r}.{method}({})", a.join(", ")),
        })
    }

    fn set_method(&mut self, r: &str, of: &Type, method: &str, a: &[String]) -> Result<String, CompileError> {
        let cap = self.capture();
        Ok(match (method, a) {
            ("add", [x]) => format!("({r}[{x}] = true)"),
            ("discard", [x]) => format!("{r}.pop({x}, false)"),
            ("pop", []) => format!("std::get<0>({r}.popitem())"),
            ("update", [other]) => {
                format!("{cap}() {{ auto __s = {r}; for (auto const& __x : {other}) {{ __s[__x] = true; }} }}()")
            }
            ("copy", []) => {
                let ty = self.names.ty(of)?;
                format!("{cap}() {{ {ty} __r; for (auto const& __x : {r}) {{ __r[__x] = true; }} return __r; }}()")
            }
            ("union", [other]) => {
                let ty = self.names.ty(of)?;
                format!(
                    "{cap}() {{ {ty} __r; for (auto const& __x : {r}) {{ __r[__x] = true; }} for (auto const& __x : {other}) {{ __r[__x] = true; }} return __r; }}()"
                )
            }
            ("intersection", [other]) => {
                let ty = self.names.ty(of)?;
                format!(
                    "{cap}() {{ {ty} __r; auto __o = {other}; for (auto const& __x : {r}) {{ if (kiwi::contains(__o, __x)) {{ __r[__x] = true; }} }} return __r; }}()"
                )
            }
            ("difference", [other]) => {
                let ty = self.names.ty(of)?;
                format!(
                    "{cap}() {{ {ty} __r; auto __o = {other}; for (auto const& __x : {r}) {{ if (!kiwi::contains(__o, __x)) {{ __r[__x] = true; }} }} return __r; }}()"
                )
            }
            _ => format!("{r}.{method}({})", a.join(", ")),
        })
    }

    fn str_method(&mut self, r: &str, method: &str, a: &[String]) -> Result<String, CompileError> {
        let cap = self.capture();
        let s = format!("kiwi::String __s = {r};");
        Ok(match (method, a) {
            ("upper" | "lower", []) => {
                self.needs.cctype = true;
                let f = if method == "upper" { "toupper" } else { "tolower" };
                format!(
                    "{cap}() {{ {s} for (auto& __c : __s) {{ __c = static_cast<char>(std::{f}(static_cast<unsigned char>(__c))); }} return __s; }}()"
                )
            }
            ("strip", []) => format!(
                "{cap}() {{ {s} auto __b = __s.find_first_not_of({WHITESPACE}); if (__b == kiwi::String::npos) {{ return kiwi::String(); }} \
                 auto __e = __s.find_last_not_of({WHITESPACE}); return __s.substr(__b, __e - __b + 1); }}()"
            ),
            ("lstrip", []) => format!(
                "{cap}() {{ {s} auto __b = __s.find_first_not_of({WHITESPACE}); if (__b == kiwi::String::npos) {{ return kiwi::String(); }} return __s.substr(__b); }}()"
            ),
            ("rstrip", []) => format!(
                "{cap}() {{ {s} auto __e = __s.find_last_not_of({WHITESPACE}); if (__e == kiwi::String::npos) {{ return kiwi::String(); }} return __s.substr(0, __e + 1); }}()"
            ),
            ("startswith", [p]) => format!("({r}.rfind({p}, 0) == 0)"),
            ("endswith", [p]) => format!(
                "{cap}() {{ {s} kiwi::String __p = {p}; return __s.size() >= __p.size() && __s.compare(__s.size() - __p.size(), __p.size(), __p) == 0; }}()"
            ),
            ("find", [x]) => format!(
                "{cap}() {{ auto __i = {r}.find({x}); return __i == kiwi::String::npos ? -1 : static_cast<int>(__i); }}()"
            ),
            ("index", [x]) => format!(
                "{cap}() {{ auto __i = {r}.find({x}); if (__i == kiwi::String::npos) {{ throw kiwi::ValueError(\"substring not found\"); }} return static_cast<int>(__i); }}()"
            ),
            ("count", [x]) => format!(
                "{cap}() {{ {s} kiwi::String __x = {x}; if (__x.empty()) {{ return static_cast<int>(__s.size()) + 1; }} \
                 int __n = 0; for (auto __i = __s.find(__x); __i != kiwi::String::npos; __i = __s.find(__x, __i + __x.size())) {{ ++__n; }} return __n; }}()"
            ),
            ("replace", [from, to]) => format!(
                "{cap}() {{ {s} kiwi::String __f = {from}; kiwi::String __t = {to}; if (__f.empty()) {{ return __s; }} \
                 kiwi::String __r; std::size_t __at = 0; \
                 for (auto __i = __s.find(__f); __i != kiwi::String::npos; __i = __s.find(__f, __at)) {{ __r += __s.substr(__at, __i - __at); __r += __t; __at = __i + __f.size(); }} \
                 __r += __s.substr(__at); return __r; }}()"
            ),
            ("split", []) => {
                self.needs.cctype = true;
                format!(
                    "{cap}() {{ {s} kiwi::List<kiwi::String> __r; kiwi::String __w; \
                     for (char __c : __s) {{ if (std::isspace(static_cast<unsigned char>(__c))) {{ if (!__w.empty()) {{ __r.append(__w); __w.clear(); }} }} else {{ __w += __c; }} }} \
                     if (!__w.empty()) {{ __r.append(__w); }} return __r; }}()"
                )
            }
            ("split", [sep]) => format!(
                "{cap}() {{ {s} kiwi::String __p = {sep}; kiwi::List<kiwi::String> __r; std::size_t __at = 0; \
                 for (auto __i = __s.find(__p); __i != kiwi::String::npos; __i = __s.find(__p, __at)) {{ __r.append(__s.substr(__at, __i - __at)); __at = __i + __p.size(); }} \
                 __r.append(__s.substr(__at)); return __r; }}()"
            ),
            ("join", [items]) => format!(
                "{cap}() {{ {s} kiwi::String __r; bool __first = true; \
                 for (auto const& __x : {items}) {{ if (!__first) {{ __r += __s; }} __first = false; __r += __x; }} return __r; }}()"
            ),
            ("isdigit" | "isalpha" | "isspace" | "isalnum" | "isupper" | "islower", []) => {
                self.needs.cctype = true;
                format!(
                    "{cap}() {{ {s} return !__s.empty() && std::all_of(__s.begin(), __s.end(), [](unsigned char __c) {{ return std::{method}(__c) != 0; }}); }}()"
                )
            }
            ("chars", []) => format!(
                "{cap}() {{ {s} kiwi::List<kiwi::String> __r; for (char __c : __s) {{ __r.append(kiwi::String(1, __c)); }} return __r; }}()"
            ),
            _ => {
                return Err(CompileError::internal(format!(
                    "string method '{method}' with {} arguments has no runtime counterpart",
                    a.len()
                )));
            }
        })
    }

    /// `"...".format(args)`: the template goes to the runtime exception's
    /// formatter as written.
    fn str_format(&mut self, receiver: &LExpr, args: &[LExpr]) -> Result<String, CompileError> {
        let template = match receiver {
            LExpr::Str(s) => string_literal(s),
            other => {
                let t = self.expr(other)?;
                bare(&t).to_string()
            }
        };
        let mut parts = vec![template];
        parts.extend(self.arg_list(args)?);
        Ok(format!("kiwi::String(kiwi::Exception({}).what())", parts.join(", ")))
    }
}
