use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Str,
    None,
}

impl ScalarKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarKind::Bool | ScalarKind::Int | ScalarKind::Float)
    }

    fn numeric_rank(self) -> u8 {
        match self {
            ScalarKind::Bool => 0,
            ScalarKind::Int => 1,
            _ => 2,
        }
    }
}

/// How a nominal type is held. Classes start `Pending` and are settled by the
/// representation decision; runtime containers are always `Shared`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ownership {
    Pending,
    Value,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Head {
    /// Qualified dotted class name, e.g. `symdiff.expr.Add`.
    Class(String),
    List,
    Dict,
    Set,
    Tuple,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nominal {
    pub head: Head,
    pub args: Vec<Type>,
    pub ownership: Ownership,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Unknown,
    Dynamic,
    Scalar(ScalarKind),
    Nominal(Nominal),
    Function(Vec<Type>, Box<Type>),
    Union(Vec<Type>),
}

/// Inheritance view used when two class types meet.
pub trait ClassHierarchy {
    /// `class` followed by its ancestors, nearest first.
    fn ancestors(&self, class: &str) -> Vec<String>;

    fn common_ancestor(&self, a: &str, b: &str) -> Option<String> {
        let theirs = self.ancestors(b);
        self.ancestors(a).into_iter().find(|c| theirs.contains(c))
    }

    fn is_subclass(&self, class: &str, of: &str) -> bool {
        self.ancestors(class).iter().any(|c| c == of)
    }
}

/// Hierarchy with no inheritance at all.
pub struct FlatHierarchy;

impl ClassHierarchy for FlatHierarchy {
    fn ancestors(&self, class: &str) -> Vec<String> {
        vec![class.to_string()]
    }
}

/// Side facts observed while joining, consumed by the representation
/// decision.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinFacts {
    /// Classes that ended up holding two or more distinct subclasses.
    pub polymorphic: BTreeSet<String>,
    /// Classes that met `None`.
    pub nullable: BTreeSet<String>,
}

impl JoinFacts {
    pub fn absorb(&mut self, other: JoinFacts) {
        self.polymorphic.extend(other.polymorphic);
        self.nullable.extend(other.nullable);
    }
}

impl Type {
    pub fn int() -> Type {
        Type::Scalar(ScalarKind::Int)
    }

    pub fn float() -> Type {
        Type::Scalar(ScalarKind::Float)
    }

    pub fn boolean() -> Type {
        Type::Scalar(ScalarKind::Bool)
    }

    pub fn str() -> Type {
        Type::Scalar(ScalarKind::Str)
    }

    pub fn none() -> Type {
        Type::Scalar(ScalarKind::None)
    }

    pub fn class(name: impl Into<String>) -> Type {
        Type::Nominal(Nominal { head: Head::Class(name.into()), args: Vec::new(), ownership: Ownership::Pending })
    }

    fn container(head: Head, args: Vec<Type>) -> Type {
        Type::Nominal(Nominal { head, args, ownership: Ownership::Shared })
    }

    pub fn list(elem: Type) -> Type {
        Type::container(Head::List, vec![elem])
    }

    pub fn dict(key: Type, value: Type) -> Type {
        Type::container(Head::Dict, vec![key, value])
    }

    pub fn set(elem: Type) -> Type {
        Type::container(Head::Set, vec![elem])
    }

    pub fn tuple(items: Vec<Type>) -> Type {
        Type::container(Head::Tuple, items)
    }

    /// Build a union, folding members that join without conflict.
    pub fn union(members: Vec<Type>, h: &dyn ClassHierarchy) -> Type {
        let mut facts = JoinFacts::default();
        normalize_union(members, h, &mut facts)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Type::Dynamic)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::None))
    }

    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            Type::Scalar(k) => Some(*k),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.scalar().is_some_and(ScalarKind::is_numeric)
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Nominal(Nominal { head: Head::Class(name), .. }) => Some(name),
            _ => None,
        }
    }

    pub fn nominal(&self) -> Option<&Nominal> {
        match self {
            Type::Nominal(n) => Some(n),
            _ => None,
        }
    }

    pub fn head(&self) -> Option<&Head> {
        self.nominal().map(|n| &n.head)
    }

    pub fn arg(&self, index: usize) -> Type {
        self.nominal().and_then(|n| n.args.get(index).cloned()).unwrap_or(Type::Unknown)
    }

    /// Type produced by iterating a value of this type.
    pub fn element_type(&self) -> Type {
        match self {
            Type::Nominal(n) => match n.head {
                Head::List | Head::Set | Head::Dict => self.arg(0),
                Head::Tuple => n.args.first().cloned().unwrap_or(Type::Unknown),
                Head::Class(_) => Type::Dynamic,
            },
            Type::Scalar(ScalarKind::Str) => Type::str(),
            Type::Dynamic => Type::Dynamic,
            _ => Type::Unknown,
        }
    }

    pub fn contains_unknown(&self) -> bool {
        match self {
            Type::Unknown => true,
            Type::Dynamic | Type::Scalar(_) => false,
            Type::Nominal(n) => n.args.iter().any(Type::contains_unknown),
            Type::Function(params, ret) => params.iter().any(Type::contains_unknown) || ret.contains_unknown(),
            Type::Union(members) => members.iter().any(Type::contains_unknown),
        }
    }

    pub fn contains_union(&self) -> bool {
        match self {
            Type::Union(_) => true,
            Type::Nominal(n) => n.args.iter().any(Type::contains_union),
            Type::Function(params, ret) => params.iter().any(Type::contains_union) || ret.contains_union(),
            _ => false,
        }
    }

    /// Coarse specificity level: 0 unknown, 1 dynamic, 2 partially known,
    /// 3 fully known. Joins never lower it.
    pub fn specificity(&self) -> u8 {
        match self {
            Type::Unknown => 0,
            Type::Dynamic => 1,
            Type::Union(members) => members.iter().map(Type::specificity).max().unwrap_or(0),
            other if other.contains_unknown() => 2,
            _ => 3,
        }
    }

    pub fn join(&self, other: &Type, h: &dyn ClassHierarchy) -> Type {
        let mut facts = JoinFacts::default();
        self.join_with(other, h, &mut facts)
    }

    /// Least upper bound in the inference lattice:
    /// `Unknown ⊑ Dynamic ⊑ concrete ⊑ Union`.
    pub fn join_with(&self, other: &Type, h: &dyn ClassHierarchy, facts: &mut JoinFacts) -> Type {
        match (self, other) {
            (Type::Unknown, x) | (x, Type::Unknown) => x.clone(),
            (Type::Dynamic, x) | (x, Type::Dynamic) => x.clone(),
            (a, b) if a == b => a.clone(),
            (Type::Union(members), x) | (x, Type::Union(members)) => {
                let mut all = members.clone();
                all.push(x.clone());
                normalize_union(all, h, facts)
            }
            (Type::Scalar(a), Type::Scalar(b)) if a.is_numeric() && b.is_numeric() => {
                Type::Scalar(if a.numeric_rank() >= b.numeric_rank() { *a } else { *b })
            }
            (Type::Scalar(ScalarKind::None), Type::Nominal(n)) | (Type::Nominal(n), Type::Scalar(ScalarKind::None)) => {
                if let Head::Class(name) = &n.head {
                    facts.nullable.insert(name.clone());
                }
                Type::Nominal(n.clone())
            }
            (Type::Nominal(a), Type::Nominal(b)) => join_nominal(a, b, h, facts)
                .unwrap_or_else(|| normalize_union(vec![self.clone(), other.clone()], h, facts)),
            (Type::Function(pa, ra), Type::Function(pb, rb)) if pa.len() == pb.len() => {
                let params = pa.iter().zip(pb).map(|(x, y)| x.join_with(y, h, facts)).collect();
                Type::Function(params, Box::new(ra.join_with(rb, h, facts)))
            }
            _ => normalize_union(vec![self.clone(), other.clone()], h, facts),
        }
    }

    /// Replace every pending class ownership using `decide`.
    pub fn with_ownership(&self, decide: &dyn Fn(&str) -> Ownership) -> Type {
        match self {
            Type::Nominal(n) => {
                let ownership = match &n.head {
                    Head::Class(name) => decide(name),
                    _ => Ownership::Shared,
                };
                Type::Nominal(Nominal {
                    head: n.head.clone(),
                    args: n.args.iter().map(|a| a.with_ownership(decide)).collect(),
                    ownership,
                })
            }
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| p.with_ownership(decide)).collect(),
                Box::new(ret.with_ownership(decide)),
            ),
            Type::Union(members) => Type::Union(members.iter().map(|m| m.with_ownership(decide)).collect()),
            other => other.clone(),
        }
    }

    /// Replace leftover `Unknown` (and, when `unions` is set, `Union`)
    /// anywhere in the type with `Dynamic`.
    pub fn settle(&self, unions: bool) -> Type {
        match self {
            Type::Unknown => Type::Dynamic,
            Type::Union(_) if unions => Type::Dynamic,
            Type::Union(members) => Type::Union(members.iter().map(|m| m.settle(unions)).collect()),
            Type::Nominal(n) => Type::Nominal(Nominal {
                head: n.head.clone(),
                args: n.args.iter().map(|a| a.settle(unions)).collect(),
                ownership: n.ownership,
            }),
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| p.settle(unions)).collect(),
                Box::new(ret.settle(unions)),
            ),
            other => other.clone(),
        }
    }
}

fn join_nominal(a: &Nominal, b: &Nominal, h: &dyn ClassHierarchy, facts: &mut JoinFacts) -> Option<Type> {
    let ownership = a.ownership.max(b.ownership);
    match (&a.head, &b.head) {
        (Head::Class(x), Head::Class(y)) if x == y => {
            Some(Type::Nominal(Nominal { head: a.head.clone(), args: Vec::new(), ownership }))
        }
        (Head::Class(x), Head::Class(y)) => {
            let lca = h.common_ancestor(x, y)?;
            facts.polymorphic.insert(lca.clone());
            Some(Type::Nominal(Nominal { head: Head::Class(lca), args: Vec::new(), ownership }))
        }
        (ha, hb) if ha == hb && a.args.len() == b.args.len() => {
            let args = a.args.iter().zip(&b.args).map(|(x, y)| x.join_with(y, h, facts)).collect();
            Some(Type::Nominal(Nominal { head: ha.clone(), args, ownership }))
        }
        _ => None,
    }
}

fn normalize_union(members: Vec<Type>, h: &dyn ClassHierarchy, facts: &mut JoinFacts) -> Type {
    let mut flat = Vec::new();
    for m in members {
        match m {
            Type::Union(inner) => flat.extend(inner),
            Type::Unknown | Type::Dynamic => {}
            other => flat.push(other),
        }
    }

    let mut out: Vec<Type> = Vec::new();
    let mut pending = flat;
    while let Some(next) = pending.pop() {
        let mut merged = None;
        for (i, existing) in out.iter().enumerate() {
            if existing == &next {
                merged = Some((i, None));
                break;
            }
            let mut local = JoinFacts::default();
            let joined = pairwise(existing, &next, h, &mut local);
            if let Some(joined) = joined {
                facts.absorb(local);
                merged = Some((i, Some(joined)));
                break;
            }
        }
        match merged {
            Some((_, None)) => {}
            Some((i, Some(joined))) => {
                // the widened member may now absorb others; re-queue it
                out.remove(i);
                pending.push(joined);
            }
            None => out.push(next),
        }
    }

    out.sort();
    match out.len() {
        0 => Type::Unknown,
        1 => out.remove(0),
        _ => Type::Union(out),
    }
}

/// Join of two non-union members, or `None` when they conflict.
fn pairwise(a: &Type, b: &Type, h: &dyn ClassHierarchy, facts: &mut JoinFacts) -> Option<Type> {
    match (a, b) {
        (Type::Scalar(x), Type::Scalar(y)) if x.is_numeric() && y.is_numeric() => {
            Some(Type::Scalar(if x.numeric_rank() >= y.numeric_rank() { *x } else { *y }))
        }
        (Type::Scalar(ScalarKind::None), Type::Nominal(_)) | (Type::Nominal(_), Type::Scalar(ScalarKind::None)) => {
            Some(a.join_with(b, h, facts))
        }
        (Type::Nominal(x), Type::Nominal(y)) => join_nominal(x, y, h, facts),
        (Type::Function(pa, _), Type::Function(pb, _)) if pa.len() == pb.len() => Some(a.join_with(b, h, facts)),
        _ => None,
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => write!(f, "?"),
            Type::Dynamic => write!(f, "Dynamic"),
            Type::Scalar(k) => write!(f, "{}", match k {
                ScalarKind::Bool => "bool",
                ScalarKind::Int => "int",
                ScalarKind::Float => "float",
                ScalarKind::Str => "str",
                ScalarKind::None => "None",
            }),
            Type::Nominal(n) => {
                let name = match &n.head {
                    Head::Class(c) => c.rsplit('.').next().unwrap_or(c),
                    Head::List => "List",
                    Head::Dict => "Dict",
                    Head::Set => "Set",
                    Head::Tuple => "Tuple",
                };
                write!(f, "{name}")?;
                if !n.args.is_empty() || n.head == Head::Tuple {
                    write!(f, "[")?;
                    for (i, a) in n.args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    write!(f, "]")?;
                }
                if n.ownership == Ownership::Shared && matches!(n.head, Head::Class(_)) {
                    write!(f, "&")?;
                }
                Ok(())
            }
            Type::Function(params, ret) => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
            Type::Union(members) => {
                write!(f, "Union[")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{m}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Tree(HashMap<&'static str, &'static str>);

    impl ClassHierarchy for Tree {
        fn ancestors(&self, class: &str) -> Vec<String> {
            let mut out = vec![class.to_string()];
            let mut cur = class;
            while let Some(parent) = self.0.get(cur) {
                out.push(parent.to_string());
                cur = parent;
            }
            out
        }
    }

    fn shapes() -> Tree {
        Tree(HashMap::from([("m.Add", "m.Binary"), ("m.Mul", "m.Binary"), ("m.Binary", "m.Expr"), ("m.Neg", "m.Expr")]))
    }

    #[test]
    fn unknown_and_dynamic_are_bottom() {
        let h = FlatHierarchy;
        assert_eq!(Type::Unknown.join(&Type::int(), &h), Type::int());
        assert_eq!(Type::Dynamic.join(&Type::int(), &h), Type::int());
        assert_eq!(Type::Unknown.join(&Type::Dynamic, &h), Type::Dynamic);
    }

    #[test]
    fn numeric_promotion() {
        let h = FlatHierarchy;
        assert_eq!(Type::int().join(&Type::float(), &h), Type::float());
        assert_eq!(Type::boolean().join(&Type::int(), &h), Type::int());
    }

    #[test]
    fn incompatible_scalars_form_union() {
        let h = FlatHierarchy;
        let u = Type::int().join(&Type::str(), &h);
        assert_eq!(u, Type::Union(vec![Type::int(), Type::str()]));
        // a wider numeric folds into the existing member
        assert_eq!(u.join(&Type::float(), &h), Type::Union(vec![Type::float(), Type::str()]));
    }

    #[test]
    fn sibling_classes_join_to_common_base() {
        let h = shapes();
        let mut facts = JoinFacts::default();
        let t = Type::class("m.Add").join_with(&Type::class("m.Neg"), &h, &mut facts);
        assert_eq!(t, Type::class("m.Expr"));
        assert!(facts.polymorphic.contains("m.Expr"));
    }

    #[test]
    fn unrelated_classes_form_union() {
        let h = shapes();
        let t = Type::class("m.Add").join(&Type::class("other.Point"), &h);
        assert!(matches!(t, Type::Union(ref m) if m.len() == 2));
    }

    #[test]
    fn none_marks_class_nullable() {
        let h = FlatHierarchy;
        let mut facts = JoinFacts::default();
        let t = Type::none().join_with(&Type::class("m.Node"), &h, &mut facts);
        assert_eq!(t, Type::class("m.Node"));
        assert!(facts.nullable.contains("m.Node"));
    }

    #[test]
    fn containers_join_componentwise() {
        let h = FlatHierarchy;
        let a = Type::list(Type::Unknown);
        let b = Type::list(Type::int());
        assert_eq!(a.join(&b, &h), Type::list(Type::int()));
        let d = Type::dict(Type::str(), Type::int()).join(&Type::dict(Type::str(), Type::float()), &h);
        assert_eq!(d, Type::dict(Type::str(), Type::float()));
    }

    #[test]
    fn specificity_levels() {
        assert_eq!(Type::Unknown.specificity(), 0);
        assert_eq!(Type::Dynamic.specificity(), 1);
        assert_eq!(Type::list(Type::Unknown).specificity(), 2);
        assert_eq!(Type::list(Type::int()).specificity(), 3);
    }

    #[test]
    fn settle_replaces_unknown() {
        let t = Type::dict(Type::str(), Type::Unknown).settle(false);
        assert_eq!(t, Type::dict(Type::str(), Type::Dynamic));
        let u = Type::Union(vec![Type::int(), Type::str()]).settle(true);
        assert_eq!(u, Type::Dynamic);
    }

    #[test]
    fn ownership_assignment() {
        let t = Type::list(Type::class("m.Expr"));
        let owned = t.with_ownership(&|_| Ownership::Shared);
        assert_eq!(owned.arg(0).nominal().map(|n| n.ownership), Some(Ownership::Shared));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Type::dict(Type::str(), Type::list(Type::float())).to_string(), "Dict[str, List[float]]");
        assert_eq!(Type::class("a.b.Point").to_string(), "Point");
        assert_eq!(Type::Function(vec![Type::int()], Box::new(Type::none())).to_string(), "(int) -> None");
    }
}
