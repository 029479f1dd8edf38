//! Runtime values of the reference evaluator.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
/// Insertion-ordered map; each entry keeps the original key value.
pub type DictRef = Rc<RefCell<IndexMap<Key, (Value, Value)>>>;
pub type SetRef = Rc<RefCell<IndexMap<Key, Value>>>;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Set(SetRef),
    Tuple(Rc<Vec<Value>>),
    /// Object of a reference class, shared by every handle.
    Object(Rc<RefCell<Instance>>),
    /// Struct of a value class, copied with the value.
    Struct(Instance),
    /// A free function used as a value.
    Function(String),
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub class: String,
    pub fields: IndexMap<String, Value>,
}

/// Hashable identity of a value used as a dictionary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<Key>),
    Struct(String, Vec<Key>),
    Ref(usize),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: IndexMap<Key, (Value, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
        let map = items.into_iter().map(|v| (v.key(), v)).collect();
        Value::Set(Rc::new(RefCell::new(map)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn key(&self) -> Key {
        match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => Key::Int(*f as i64),
            Value::Float(f) => Key::Float(f.to_bits()),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => Key::Tuple(items.iter().map(Value::key).collect()),
            Value::Struct(inst) => Key::Struct(inst.class.clone(), inst.fields.values().map(Value::key).collect()),
            Value::List(l) => Key::Ref(Rc::as_ptr(l) as *const u8 as usize),
            Value::Dict(d) => Key::Ref(Rc::as_ptr(d) as *const u8 as usize),
            Value::Set(s) => Key::Ref(Rc::as_ptr(s) as *const u8 as usize),
            Value::Object(o) => Key::Ref(Rc::as_ptr(o) as *const u8 as usize),
            Value::Function(f) => Key::Str(f.clone()),
        }
    }

    /// Class of an object or struct.
    pub fn class(&self) -> Option<String> {
        match self {
            Value::Object(o) => Some(o.borrow().class.clone()),
            Value::Struct(inst) => Some(inst.class.clone()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Object(_) | Value::Struct(_) | Value::Function(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Items seen when iterating: keys for dictionaries, one-character
    /// strings for strings.
    pub fn items(&self) -> Option<Vec<Value>> {
        Some(match self {
            Value::List(l) => l.borrow().clone(),
            Value::Dict(d) => d.borrow().values().map(|(k, _)| k.clone()).collect(),
            Value::Set(s) => s.borrow().values().cloned().collect(),
            Value::Tuple(t) => t.as_ref().clone(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            _ => return None,
        })
    }

    pub fn len(&self) -> Option<usize> {
        Some(match self {
            Value::List(l) => l.borrow().len(),
            Value::Dict(d) => d.borrow().len(),
            Value::Set(s) => s.borrow().len(),
            Value::Tuple(t) => t.len(),
            Value::Str(s) => s.chars().count(),
            _ => return None,
        })
    }

    /// Value equality: numbers across kinds, containers element-wise,
    /// objects by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_equal(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equal(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, (_, v))| b.get(k).is_some_and(|(_, w)| v.equals(w)))
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => {
                a.class == b.class && a.fields.len() == b.fields.len()
                    && a.fields.iter().all(|(n, v)| b.fields.get(n).is_some_and(|w| v.equals(w)))
            }
            (Value::Function(a), Value::Function(b)) => a == b,
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Tuple(a), Value::Tuple(b)) => seq_compare(a, b),
            (Value::List(a), Value::List(b)) => seq_compare(&a.borrow(), &b.borrow()),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) => a.as_float()?.partial_cmp(&b.as_float()?),
        }
    }

    /// Handle identity.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::None, _) | (_, Value::None) => false,
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            (a, b) => a.equals(b),
        }
    }

    /// `str(value)`.
    pub fn text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(l) => format!("[{}]", join_repr(l.borrow().iter())),
            Value::Tuple(t) if t.len() == 1 => format!("({},)", t[0].repr()),
            Value::Tuple(t) => format!("({})", join_repr(t.iter())),
            Value::Dict(d) => {
                let parts: Vec<String> = d.borrow().values().map(|(k, v)| format!("{}: {}", k.repr(), v.repr())).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(s) if s.borrow().is_empty() => "set()".to_string(),
            Value::Set(s) => format!("{{{}}}", join_repr(s.borrow().values())),
            Value::Object(o) => format!("<{} object>", o.borrow().class),
            Value::Struct(inst) => format!("<{} object>", inst.class),
            Value::Function(f) => format!("<function {f}>"),
        }
    }
}

fn seq_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

fn seq_compare(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn join_repr<'v>(items: impl Iterator<Item = &'v Value>) -> String {
    items.map(Value::repr).collect::<Vec<_>>().join(", ")
}

/// Shortest round-trip spelling; whole numbers keep one decimal.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_share_storage_between_handles() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = a.clone();
        if let Value::List(l) = &b {
            l.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(a.len(), Some(2));
        assert!(a.identical(&b));
    }

    #[test]
    fn structs_copy_on_clone() {
        let mut fields = IndexMap::new();
        fields.insert("x".to_string(), Value::Int(1));
        let a = Value::Struct(Instance { class: "m.P".into(), fields });
        let mut b = a.clone();
        if let Value::Struct(inst) = &mut b {
            inst.fields.insert("x".into(), Value::Int(5));
        }
        assert!(!a.equals(&b));
    }

    #[test]
    fn numbers_compare_across_kinds() {
        assert!(Value::Int(2).equals(&Value::Float(2.0)));
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::Float(2.0).key(), Value::Int(2).key());
    }

    #[test]
    fn reprs() {
        assert_eq!(Value::Float(3.0).repr(), "3.0");
        assert_eq!(Value::Float(0.1).repr(), "0.1");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::list(vec![Value::Str("a".into()), Value::Bool(true)]).repr(), "['a', True]");
        assert_eq!(Value::Str("x".into()).text(), "x");
    }
}
