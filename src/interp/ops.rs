//! Primitive operations on runtime values.

use std::cmp::Ordering;

use indexmap::IndexMap;

use super::value::{float_repr, Value};
use super::RunError;
use crate::lower::ir::{BuiltinFn, ContainerKind};
use crate::parser::ast::{BinOp, CmpOp, UnaryOp};
use crate::types::{ScalarKind, Type};

type Result<T> = std::result::Result<T, RunError>;

fn int_of(v: &Value, what: &str) -> Result<i64> {
    v.as_int().ok_or_else(|| RunError::runtime(format!("{what}: expected a number, got {}", v.repr())))
}

fn float_of(v: &Value, what: &str) -> Result<f64> {
    v.as_float().ok_or_else(|| RunError::runtime(format!("{what}: expected a number, got {}", v.repr())))
}

fn str_of<'v>(v: &'v Value, what: &str) -> Result<&'v str> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(RunError::runtime(format!("{what}: expected a string, got {}", other.repr()))),
    }
}

fn is_integral(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_))
}

fn zero_division() -> RunError {
    RunError::raised("ZeroDivisionError", "division by zero")
}

pub fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            return Ok(Value::list(items));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            return Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()));
        }
        (BinOp::Mul, Value::List(a), n) | (BinOp::Mul, n, Value::List(a)) if is_integral(n) => {
            let times = int_of(n, "repeat")?.max(0) as usize;
            let items = a.borrow();
            return Ok(Value::list(items.iter().cloned().cycle().take(items.len() * times).collect()));
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if is_integral(n) => {
            return Ok(Value::Str(s.repeat(int_of(n, "repeat")?.max(0) as usize)));
        }
        _ => {}
    }
    if is_integral(l) && is_integral(r) {
        let (a, b) = (int_of(l, op.symbol())?, int_of(r, op.symbol())?);
        return Ok(match op {
            BinOp::Add => Value::Int(a.wrapping_add(b)),
            BinOp::Sub => Value::Int(a.wrapping_sub(b)),
            BinOp::Mul => Value::Int(a.wrapping_mul(b)),
            BinOp::Div if b == 0 => return Err(zero_division()),
            BinOp::Div => Value::Float(a as f64 / b as f64),
            BinOp::FloorDiv if b == 0 => return Err(zero_division()),
            BinOp::FloorDiv => Value::Int((a as f64 / b as f64).floor() as i64),
            BinOp::Mod if b == 0 => return Err(zero_division()),
            BinOp::Mod => Value::Int(a.wrapping_rem(b)),
            BinOp::Pow => Value::Int((a as f64).powf(b as f64) as i64),
        });
    }
    let (a, b) = (float_of(l, op.symbol())?, float_of(r, op.symbol())?);
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a % b,
        BinOp::Pow => a.powf(b),
    }))
}

pub fn unary(op: UnaryOp, v: &Value) -> Result<Value> {
    Ok(match (op, v) {
        (UnaryOp::Not, v) => Value::Bool(!v.truthy()),
        (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
        (UnaryOp::Neg, v) => Value::Int(int_of(v, "-")?.wrapping_neg()),
        (UnaryOp::Pos, Value::Float(f)) => Value::Float(*f),
        (UnaryOp::Pos, v) => Value::Int(int_of(v, "+")?),
    })
}

pub fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool> {
    let ordered = |want: fn(Ordering) -> bool| -> Result<bool> {
        l.compare(r)
            .map(want)
            .ok_or_else(|| RunError::runtime(format!("cannot order {} and {}", l.repr(), r.repr())))
    };
    match op {
        CmpOp::Eq => Ok(l.equals(r)),
        CmpOp::NotEq => Ok(!l.equals(r)),
        CmpOp::Lt => ordered(Ordering::is_lt),
        CmpOp::LtEq => ordered(Ordering::is_le),
        CmpOp::Gt => ordered(Ordering::is_gt),
        CmpOp::GtEq => ordered(Ordering::is_ge),
        CmpOp::In => contains(r, l),
        CmpOp::NotIn => contains(r, l).map(|b| !b),
        CmpOp::Is => Ok(l.identical(r)),
        CmpOp::IsNot => Ok(!l.identical(r)),
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    Ok(match container {
        Value::Str(s) => s.contains(str_of(item, "in")?),
        Value::Dict(d) => d.borrow().contains_key(&item.key()),
        Value::Set(s) => s.borrow().contains_key(&item.key()),
        Value::List(l) => l.borrow().iter().any(|v| v.equals(item)),
        Value::Tuple(t) => t.iter().any(|v| v.equals(item)),
        other => return Err(RunError::runtime(format!("{} is not a container", other.repr()))),
    })
}

fn extreme(items: Vec<Value>, want: Ordering) -> Result<Value> {
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            Some(b) if item.compare(&b) == Some(want) => Some(item),
            Some(b) => Some(b),
            None => Some(item),
        };
    }
    best.ok_or_else(|| RunError::raised("ValueError", "arg is an empty sequence"))
}

pub fn builtin(func: BuiltinFn, args: Vec<Value>) -> Result<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::None);
    match func {
        BuiltinFn::Len => {
            let v = arg(0);
            v.len()
                .map(|n| Value::Int(n as i64))
                .ok_or_else(|| RunError::runtime(format!("{} has no length", v.repr())))
        }
        BuiltinFn::Repr => Ok(Value::Str(arg(0).repr())),
        BuiltinFn::Abs => Ok(match arg(0) {
            Value::Float(f) => Value::Float(f.abs()),
            v => Value::Int(int_of(&v, "abs")?.wrapping_abs()),
        }),
        BuiltinFn::Min | BuiltinFn::Max => {
            let want = if func == BuiltinFn::Min { Ordering::Less } else { Ordering::Greater };
            let items = if args.len() == 1 {
                args[0].items().ok_or_else(|| RunError::runtime("min/max of a non-iterable"))?
            } else {
                args
            };
            extreme(items, want)
        }
        BuiltinFn::Sum => {
            let items = arg(0).items().ok_or_else(|| RunError::runtime("sum of a non-iterable"))?;
            let start = args.get(1).cloned().unwrap_or(Value::Int(0));
            items.iter().try_fold(start, |acc, v| binary(BinOp::Add, &acc, v))
        }
        BuiltinFn::Contains => Ok(Value::Bool(contains(&arg(0), &arg(1))?)),
        BuiltinFn::Equal => Ok(Value::Bool(arg(0).equals(&arg(1)))),
        BuiltinFn::CharAt => {
            let s = arg(0);
            let i = int_of(&arg(1), "index")?;
            str_of(&s, "index")?
                .chars()
                .nth(usize::try_from(i).unwrap_or(usize::MAX))
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| RunError::raised("IndexError", "string index out of range"))
        }
    }
}

/// Conversion between scalar kinds.
pub fn cast(to: &Type, v: Value) -> Result<Value> {
    Ok(match (to.scalar(), &v) {
        (Some(ScalarKind::Int), Value::Str(s)) => Value::Int(
            s.trim()
                .parse()
                .map_err(|_| RunError::raised("ValueError", format!("invalid literal for int(): '{s}'")))?,
        ),
        (Some(ScalarKind::Float), Value::Str(s)) => Value::Float(
            s.trim()
                .parse()
                .map_err(|_| RunError::raised("ValueError", format!("could not convert string to float: '{s}'")))?,
        ),
        (Some(ScalarKind::Int), _) => Value::Int(int_of(&v, "int")?),
        (Some(ScalarKind::Float), _) => Value::Float(float_of(&v, "float")?),
        (Some(ScalarKind::Bool), _) => Value::Bool(v.truthy()),
        (Some(ScalarKind::Str), _) => Value::Str(v.text()),
        _ => v,
    })
}

pub fn math(func: &str, args: &[Value]) -> Result<Value> {
    let f = |i: usize| args.get(i).map_or(Ok(0.0), |v| float_of(v, func));
    Ok(Value::Float(match func.trim_start_matches("std::") {
        "sqrt" => f(0)?.sqrt(),
        "exp" => f(0)?.exp(),
        "log" if args.len() > 1 => f(0)?.ln() / f(1)?.ln(),
        "log" => f(0)?.ln(),
        "log10" => f(0)?.log10(),
        "sin" => f(0)?.sin(),
        "cos" => f(0)?.cos(),
        "tan" => f(0)?.tan(),
        "atan2" => f(0)?.atan2(f(1)?),
        "pow" => f(0)?.powf(f(1)?),
        "fabs" => f(0)?.abs(),
        "floor" => f(0)?.floor(),
        "ceil" => f(0)?.ceil(),
        "gcd" => {
            let (mut a, mut b) = (
                int_of(args.first().unwrap_or(&Value::Int(0)), func)?.abs(),
                int_of(args.get(1).unwrap_or(&Value::Int(0)), func)?.abs(),
            );
            while b != 0 {
                (a, b) = (b, a % b);
            }
            return Ok(Value::Int(a));
        }
        other => return Err(RunError::runtime(format!("unknown math function {other}"))),
    }))
}

pub fn math_const(name: &str) -> Result<Value> {
    Ok(Value::Float(match name {
        "M_PI" => std::f64::consts::PI,
        "M_E" => std::f64::consts::E,
        "INFINITY" => f64::INFINITY,
        other => return Err(RunError::runtime(format!("unknown math constant {other}"))),
    }))
}

/// Converts a dynamic value to a static slot of type `to`.
pub fn unbox(to: &Type, v: Value) -> Result<Value> {
    match (to.scalar(), &v) {
        (Some(ScalarKind::Int), Value::Float(_)) | (Some(ScalarKind::Float), Value::Int(_)) => cast(to, v),
        (Some(ScalarKind::Bool), Value::Bool(_)) | (Some(ScalarKind::Str), Value::Str(_)) => Ok(v),
        (Some(ScalarKind::Bool), _) => Ok(Value::Bool(v.truthy())),
        _ => Ok(v),
    }
}

fn sorted(mut items: Vec<Value>) -> Vec<Value> {
    items.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
    items
}

/// Fresh list or set from the items of `source`.
pub fn collect(into: ContainerKind, source: &Value, sort: bool) -> Result<Value> {
    let items = source.items().ok_or_else(|| RunError::runtime(format!("{} is not iterable", source.repr())))?;
    let items = if sort { sorted(items) } else { items };
    Ok(match into {
        ContainerKind::Set => Value::set(items),
        ContainerKind::Tuple => Value::tuple(items),
        _ => Value::list(items),
    })
}

pub fn range(start: i64, stop: i64, step: i64) -> Result<Value> {
    if step == 0 {
        return Err(RunError::raised("ValueError", "range() arg 3 must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        i += step;
    }
    Ok(Value::list(items))
}

fn index_error(what: &str) -> RunError {
    RunError::raised("IndexError", format!("{what} index out of range"))
}

fn position(len: usize, i: i64) -> Option<usize> {
    let i = if i < 0 { i + len as i64 } else { i };
    usize::try_from(i).ok().filter(|&i| i < len)
}

/// `container[index]` read.
pub fn index(container: &Value, index: &Value) -> Result<Value> {
    match container {
        Value::List(l) => {
            let l = l.borrow();
            position(l.len(), int_of(index, "index")?).map(|i| l[i].clone()).ok_or_else(|| index_error("list"))
        }
        Value::Tuple(t) => position(t.len(), int_of(index, "index")?).map(|i| t[i].clone()).ok_or_else(|| index_error("tuple")),
        Value::Dict(d) => d
            .borrow()
            .get(&index.key())
            .map(|(_, v)| v.clone())
            .ok_or_else(|| RunError::raised("KeyError", index.repr())),
        Value::Str(_) => builtin(BuiltinFn::CharAt, vec![container.clone(), index.clone()]),
        other => Err(RunError::runtime(format!("{} is not subscriptable", other.repr()))),
    }
}

/// `container[index] = value`.
pub fn set_index(container: &Value, index: &Value, value: Value) -> Result<()> {
    match container {
        Value::List(l) => {
            let mut l = l.borrow_mut();
            let i = position(l.len(), int_of(index, "index")?).ok_or_else(|| index_error("list assignment"))?;
            l[i] = value;
        }
        Value::Dict(d) => {
            d.borrow_mut().insert(index.key(), (index.clone(), value));
        }
        Value::Set(s) => {
            if value.truthy() {
                s.borrow_mut().insert(index.key(), index.clone());
            } else {
                s.borrow_mut().shift_remove(&index.key());
            }
        }
        other => return Err(RunError::runtime(format!("{} does not support item assignment", other.repr()))),
    }
    Ok(())
}

/// `del container[key]`.
pub fn del_item(container: &Value, key: &Value) -> Result<()> {
    match container {
        Value::Dict(d) => {
            d.borrow_mut().shift_remove(&key.key()).ok_or_else(|| RunError::raised("KeyError", key.repr()))?;
        }
        Value::List(l) => {
            let mut l = l.borrow_mut();
            let i = position(l.len(), int_of(key, "index")?).ok_or_else(|| index_error("list assignment"))?;
            l.remove(i);
        }
        other => return Err(RunError::runtime(format!("cannot delete from {}", other.repr()))),
    }
    Ok(())
}

/// Method of a runtime container.
pub fn container_call(kind: ContainerKind, receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
    match (kind, receiver) {
        (ContainerKind::Str, Value::Str(s)) => str_method(s, method, &args),
        (_, Value::List(_)) => list_method(receiver, method, args),
        (_, Value::Dict(_)) => dict_method(receiver, method, args),
        (_, Value::Set(_)) => set_method(receiver, method, args),
        (_, Value::Tuple(t)) => match method {
            "count" => Ok(Value::Int(t.iter().filter(|v| args.first().is_some_and(|a| v.equals(a))).count() as i64)),
            "index" => t
                .iter()
                .position(|v| args.first().is_some_and(|a| v.equals(a)))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| RunError::raised("ValueError", "tuple.index(x): x not in tuple")),
            _ => Err(unknown(receiver, method)),
        },
        _ => Err(unknown(receiver, method)),
    }
}

fn unknown(receiver: &Value, method: &str) -> RunError {
    RunError::runtime(format!("{} has no method {method}", receiver.repr()))
}

fn list_method(receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
    let Value::List(list) = receiver else { return Err(unknown(receiver, method)) };
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::None);
    let mut l = list.borrow_mut();
    Ok(match method {
        "append" => {
            l.push(arg(0));
            Value::None
        }
        "extend" => {
            let items = arg(0).items().ok_or_else(|| RunError::runtime("extend with a non-iterable"))?;
            l.extend(items);
            Value::None
        }
        "insert" => {
            let i = int_of(&arg(0), "insert")?;
            let len = l.len() as i64;
            let at = if i < 0 { (i + len).max(0) } else { i.min(len) };
            l.insert(at as usize, arg(1));
            Value::None
        }
        "pop" => {
            let at = match args.first() {
                Some(i) => position(l.len(), int_of(i, "pop")?),
                None => l.len().checked_sub(1),
            };
            let at = at.ok_or_else(|| index_error("pop"))?;
            l.remove(at)
        }
        "remove" => {
            let at = l.iter().position(|v| v.equals(&arg(0)));
            let at = at.ok_or_else(|| RunError::raised("ValueError", "list.remove(x): x not in list"))?;
            l.remove(at);
            Value::None
        }
        "index" => l
            .iter()
            .position(|v| v.equals(&arg(0)))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| RunError::raised("ValueError", format!("{} is not in list", arg(0).repr())))?,
        "count" => Value::Int(l.iter().filter(|v| v.equals(&arg(0))).count() as i64),
        "clear" => {
            l.clear();
            Value::None
        }
        "reverse" => {
            l.reverse();
            Value::None
        }
        "sort" => {
            let items = std::mem::take(&mut *l);
            *l = sorted(items);
            Value::None
        }
        "copy" => Value::list(l.clone()),
        _ => {
            drop(l);
            return Err(unknown(receiver, method));
        }
    })
}

fn dict_method(receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
    let Value::Dict(dict) = receiver else { return Err(unknown(receiver, method)) };
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::None);
    let mut d = dict.borrow_mut();
    Ok(match method {
        "get" => d.get(&arg(0).key()).map_or_else(|| arg(1), |(_, v)| v.clone()),
        "keys" => Value::list(d.values().map(|(k, _)| k.clone()).collect()),
        "values" => Value::list(d.values().map(|(_, v)| v.clone()).collect()),
        "items" => Value::list(d.values().map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()])).collect()),
        "copy" => Value::dict(d.clone()),
        "clear" => {
            d.clear();
            Value::None
        }
        "pop" => match d.shift_remove(&arg(0).key()) {
            Some((_, v)) => v,
            None if args.len() > 1 => arg(1),
            None => return Err(RunError::raised("KeyError", arg(0).repr())),
        },
        "popitem" => {
            let (_, (k, v)) = d.pop().ok_or_else(|| RunError::raised("KeyError", "popitem(): dictionary is empty"))?;
            Value::tuple(vec![k, v])
        }
        "setdefault" => {
            let key = arg(0);
            d.entry(key.key()).or_insert_with(|| (key.clone(), arg(1))).1.clone()
        }
        "update" => {
            if let Value::Dict(other) = arg(0) {
                let entries: Vec<_> = other.borrow().iter().map(|(k, e)| (k.clone(), e.clone())).collect();
                d.extend(entries);
            }
            Value::None
        }
        _ => {
            drop(d);
            return Err(unknown(receiver, method));
        }
    })
}

fn set_method(receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
    let Value::Set(set) = receiver else { return Err(unknown(receiver, method)) };
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::None);
    let other_items = || arg(0).items().ok_or_else(|| RunError::runtime(format!("set.{method} with a non-iterable")));
    let mut s = set.borrow_mut();
    Ok(match method {
        "add" => {
            let v = arg(0);
            s.insert(v.key(), v);
            Value::None
        }
        "discard" => {
            s.shift_remove(&arg(0).key());
            Value::None
        }
        "remove" => {
            s.shift_remove(&arg(0).key()).ok_or_else(|| RunError::raised("KeyError", arg(0).repr()))?;
            Value::None
        }
        "pop" => s.pop().map(|(_, v)| v).ok_or_else(|| RunError::raised("KeyError", "pop from an empty set"))?,
        "clear" => {
            s.clear();
            Value::None
        }
        "update" => {
            for v in other_items()? {
                s.insert(v.key(), v);
            }
            Value::None
        }
        "copy" => Value::Set(std::rc::Rc::new(std::cell::RefCell::new(s.clone()))),
        "union" => {
            let mut out = s.clone();
            for v in other_items()? {
                out.insert(v.key(), v);
            }
            Value::Set(std::rc::Rc::new(std::cell::RefCell::new(out)))
        }
        "intersection" => {
            let keep: IndexMap<_, _> = other_items()?.into_iter().map(|v| (v.key(), v)).collect();
            Value::set(s.iter().filter(|(k, _)| keep.contains_key(*k)).map(|(_, v)| v.clone()).collect::<Vec<_>>())
        }
        "difference" => {
            let remove: IndexMap<_, _> = other_items()?.into_iter().map(|v| (v.key(), v)).collect();
            Value::set(s.iter().filter(|(k, _)| !remove.contains_key(*k)).map(|(_, v)| v.clone()).collect::<Vec<_>>())
        }
        _ => {
            drop(s);
            return Err(unknown(receiver, method));
        }
    })
}

fn str_method(s: &str, method: &str, args: &[Value]) -> Result<Value> {
    let text = |i: usize| -> Result<&str> {
        match args.get(i) {
            Some(v) => str_of(v, method),
            None => Err(RunError::runtime(format!("str.{method} is missing an argument"))),
        }
    };
    let all = |pred: fn(char) -> bool| Value::Bool(!s.is_empty() && s.chars().all(pred));
    Ok(match method {
        "upper" => Value::Str(s.to_uppercase()),
        "lower" => Value::Str(s.to_lowercase()),
        "strip" => Value::Str(s.trim().to_string()),
        "lstrip" => Value::Str(s.trim_start().to_string()),
        "rstrip" => Value::Str(s.trim_end().to_string()),
        "startswith" => Value::Bool(s.starts_with(text(0)?)),
        "endswith" => Value::Bool(s.ends_with(text(0)?)),
        "find" => Value::Int(s.find(text(0)?).map_or(-1, |i| s[..i].chars().count() as i64)),
        "index" => match s.find(text(0)?) {
            Some(i) => Value::Int(s[..i].chars().count() as i64),
            None => return Err(RunError::raised("ValueError", "substring not found")),
        },
        "count" => {
            let needle = text(0)?;
            Value::Int(if needle.is_empty() { s.chars().count() as i64 + 1 } else { s.matches(needle).count() as i64 })
        }
        "replace" => Value::Str(s.replace(text(0)?, text(1)?)),
        "split" if args.is_empty() => Value::list(s.split_whitespace().map(|p| Value::Str(p.to_string())).collect()),
        "split" => Value::list(s.split(text(0)?).map(|p| Value::Str(p.to_string())).collect()),
        "join" => {
            let items = args
                .first()
                .and_then(Value::items)
                .ok_or_else(|| RunError::runtime("str.join with a non-iterable"))?;
            Value::Str(items.iter().map(Value::text).collect::<Vec<_>>().join(s))
        }
        "isdigit" => all(|c| c.is_ascii_digit()),
        "isalpha" => all(char::is_alphabetic),
        "isspace" => all(char::is_whitespace),
        "isalnum" => all(char::is_alphanumeric),
        "isupper" => Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)),
        "islower" => Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase)),
        "chars" => Value::list(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        "format" => Value::Str(brace_format(s, args)?),
        _ => return Err(unknown(&Value::Str(s.to_string()), method)),
    })
}

/// One conversion spec: flags, width, precision.
#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        if self.left {
            format!("{body}{}", " ".repeat(fill))
        } else if self.zero && numeric {
            let (sign, digits) = match body.strip_prefix('-') {
                Some(rest) => ("-", rest.to_string()),
                None => ("", body),
            };
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{body}", " ".repeat(fill))
        }
    }

    fn render(&self, conversion: char, v: &Value) -> Result<String> {
        let signed = |body: String| if self.plus && !body.starts_with('-') { format!("+{body}") } else { body };
        let (body, numeric) = match conversion {
            's' => (truncate(v.text(), self.precision), false),
            'r' => (truncate(v.repr(), self.precision), false),
            'd' | 'i' => (signed(int_of(v, "%d")?.to_string()), true),
            'f' | 'F' => (signed(format!("{:.*}", self.precision.unwrap_or(6), float_of(v, "%f")?)), true),
            'e' | 'E' => {
                let body = exponent(float_of(v, "%e")?, self.precision.unwrap_or(6));
                (signed(if conversion == 'E' { body.to_uppercase() } else { body }), true)
            }
            'g' | 'G' => (signed(float_repr(float_of(v, "%g")?).trim_end_matches(".0").to_string()), true),
            'x' => (format!("{:x}", int_of(v, "%x")?), true),
            'X' => (format!("{:X}", int_of(v, "%X")?), true),
            'o' => (format!("{:o}", int_of(v, "%o")?), true),
            other => return Err(RunError::runtime(format!("unsupported format character '{other}'"))),
        };
        Ok(self.pad(body, numeric))
    }
}

fn truncate(s: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) => s.chars().take(p).collect(),
        None => s,
    }
}

/// `1.5e+02` spelling with a signed two-digit exponent.
fn exponent(f: f64, precision: usize) -> String {
    let raw = format!("{f:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw,
    }
}

/// `template % args` with printf-style conversions.
pub fn percent_format(template: &str, args: &[Value]) -> Result<String> {
    let mut out = String::new();
    let mut next = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + d as usize;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            spec.precision = Some(p);
        }
        let conversion = chars.next().ok_or_else(|| RunError::raised("ValueError", "incomplete format"))?;
        let value = next
            .next()
            .ok_or_else(|| RunError::raised("TypeError", "not enough arguments for format string"))?;
        out.push_str(&spec.render(conversion, value)?);
    }
    Ok(out)
}

/// `template.format(args)` with `{}`, `{N}` and `{:spec}` fields.
pub fn brace_format(template: &str, args: &[Value]) -> Result<String> {
    let mut out = String::new();
    let mut auto = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    field.push(c);
                }
                let (index, format) = field.split_once(':').unwrap_or((&field, ""));
                let at = if index.is_empty() {
                    auto += 1;
                    auto - 1
                } else {
                    index.parse().map_err(|_| RunError::raised("KeyError", index.to_string()))?
                };
                let value = args.get(at).ok_or_else(|| RunError::raised("IndexError", "replacement index out of range"))?;
                out.push_str(&format_field(value, format)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_field(v: &Value, format: &str) -> Result<String> {
    let mut spec = Spec::default();
    let mut rest = format;
    if let Some(r) = rest.strip_prefix('<') {
        spec.left = true;
        rest = r;
    } else if let Some(r) = rest.strip_prefix('>') {
        rest = r;
    }
    if let Some(r) = rest.strip_prefix('+') {
        spec.plus = true;
        rest = r;
    }
    if let Some(r) = rest.strip_prefix('0') {
        spec.zero = true;
        rest = r;
    }
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    spec.width = rest[..digits].parse().unwrap_or(0);
    rest = &rest[digits..];
    if let Some(r) = rest.strip_prefix('.') {
        let digits = r.chars().take_while(char::is_ascii_digit).count();
        spec.precision = r[..digits].parse().ok();
        rest = &r[digits..];
    }
    let conversion = match rest.chars().next() {
        Some(c) => c,
        None if spec.precision.is_some() && matches!(v, Value::Float(_)) => 'f',
        None => 's',
    };
    spec.render(conversion, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_matches_the_generated_code() {
        assert!(matches!(binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(f) if f == 3.5));
        assert!(matches!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4)));
        assert!(matches!(binary(BinOp::Pow, &Value::Int(2), &Value::Int(10)).unwrap(), Value::Int(1024)));
        assert!(matches!(
            binary(BinOp::Mod, &Value::Int(1), &Value::Int(0)),
            Err(RunError::Raised { exception, .. }) if exception == "ZeroDivisionError"
        ));
    }

    #[test]
    fn sequences_concatenate_and_repeat() {
        let l = Value::list(vec![Value::Int(1)]);
        assert_eq!(binary(BinOp::Mul, &l, &Value::Int(3)).unwrap().repr(), "[1, 1, 1]");
        assert_eq!(binary(BinOp::Add, &Value::Str("a".into()), &Value::Str("b".into())).unwrap().text(), "ab");
        assert_eq!(binary(BinOp::Mul, &Value::Int(2), &Value::Str("ab".into())).unwrap().text(), "abab");
    }

    #[test]
    fn membership() {
        let l = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(compare(CmpOp::In, &Value::Int(2), &l).unwrap());
        assert!(compare(CmpOp::NotIn, &Value::Str("z".into()), &Value::Str("abc".into())).unwrap());
    }

    #[test]
    fn percent_formatting() {
        let args = [Value::Str("x".into()), Value::Float(3.14159), Value::Int(7)];
        assert_eq!(percent_format("%s=%.2f (%03d) 100%%", &args).unwrap(), "x=3.14 (007) 100%");
        assert_eq!(percent_format("[%-4s]", &[Value::Str("ab".into())]).unwrap(), "[ab  ]");
        assert!(percent_format("%s %s", &args[..1]).is_err());
    }

    #[test]
    fn brace_formatting() {
        let args = [Value::Int(1), Value::Float(2.5)];
        assert_eq!(brace_format("{} and {:.3f} {{x}}", &args).unwrap(), "1 and 2.500 {x}");
        assert_eq!(brace_format("{1}-{0}", &args).unwrap(), "2.5-1");
        assert_eq!(brace_format("[{:>4}]", &args).unwrap(), "[   1]");
    }

    #[test]
    fn list_methods() {
        let l = Value::list(vec![Value::Int(3), Value::Int(1)]);
        list_method(&l, "append", vec![Value::Int(2)]).unwrap();
        list_method(&l, "sort", vec![]).unwrap();
        assert_eq!(l.repr(), "[1, 2, 3]");
        assert!(matches!(list_method(&l, "pop", vec![]).unwrap(), Value::Int(3)));
        assert!(list_method(&l, "frobnicate", vec![]).is_err());
    }

    #[test]
    fn dict_methods_keep_insertion_order() {
        let d = Value::dict(IndexMap::new());
        set_index(&d, &Value::Str("b".into()), Value::Int(1)).unwrap();
        set_index(&d, &Value::Str("a".into()), Value::Int(2)).unwrap();
        assert_eq!(dict_method(&d, "keys", vec![]).unwrap().repr(), "['b', 'a']");
        assert!(matches!(dict_method(&d, "get", vec![Value::Str("z".into()), Value::Int(0)]).unwrap(), Value::Int(0)));
        assert!(index(&d, &Value::Str("z".into())).is_err());
    }

    #[test]
    fn string_methods() {
        let s = "a,b,c";
        assert_eq!(str_method(s, "split", &[Value::Str(",".into())]).unwrap().repr(), "['a', 'b', 'c']");
        assert!(matches!(str_method(s, "find", &[Value::Str("b".into())]).unwrap(), Value::Int(2)));
        assert!(matches!(str_method("123", "isdigit", &[]).unwrap(), Value::Bool(true)));
        assert!(matches!(str_method("", "isdigit", &[]).unwrap(), Value::Bool(false)));
    }

    #[test]
    fn ranges_honour_negative_steps() {
        assert_eq!(range(5, 0, -2).unwrap().repr(), "[5, 3, 1]");
        assert!(range(0, 3, 0).is_err());
    }
}
