//! Per-hierarchy representation: plain value structs versus shared heap
//! objects, tag enumerations, and which methods are virtual.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::infer::{hierarchy_root, Externals};
use crate::lower::ir::{LHierarchy, Repr};
use crate::resolve::evidence::Evidence;
use crate::resolve::scope::SymbolId;
use crate::resolve::SymbolTable;
use crate::types::{ClassHierarchy, JoinFacts, Ownership};

/// Representation facts for one module.
#[derive(Debug, Clone, Default)]
pub struct Shapes {
    /// Local classes by qualified name.
    pub repr: HashMap<String, Repr>,
    /// Classes of other modules, as decided there.
    pub external: HashMap<String, Repr>,
    pub hierarchies: Vec<LHierarchy>,
    member_of: HashMap<String, usize>,
    pub virtuals: HashSet<SymbolId>,
    pub overrides: HashSet<SymbolId>,
    /// Methods declared without a body.
    pub pure: HashSet<SymbolId>,
}

impl Shapes {
    /// Decide representations for every local class. `forced` names local
    /// classes that other modules derive from; they must be references.
    pub fn decide(
        table: &SymbolTable,
        facts: &JoinFacts,
        externals: &Externals,
        external: &HashMap<String, Repr>,
        forced: &HashSet<String>,
    ) -> Self {
        let mut components: BTreeMap<SymbolId, Vec<SymbolId>> = BTreeMap::new();
        for class in table.classes.keys() {
            components.entry(hierarchy_root(table, *class)).or_default().push(*class);
        }

        let mut shapes = Shapes { external: external.clone(), ..Default::default() };
        for members in components.values() {
            let reason = reference_reason(table, facts, forced, members);
            let repr = if reason.is_some() { Repr::Reference } else { Repr::Value };
            if let Some(reason) = reason {
                tracing::debug!(
                    classes = ?members.iter().map(|c| table.symbol(*c).name.as_str()).collect::<Vec<_>>(),
                    reason,
                    "reference representation"
                );
            }
            for c in members {
                if let Some(info) = table.class(*c) {
                    shapes.repr.insert(info.qualified.clone(), repr);
                }
            }
            if repr == Repr::Reference && (members.len() > 1 || members.iter().any(|c| has_external_base(table, *c))) {
                let root = members
                    .iter()
                    .copied()
                    .find(|c| table.class(*c).is_some_and(|i| i.local_bases().next().is_none()))
                    .unwrap_or(members[0]);
                let open = members.iter().any(|c| has_external_base(table, *c));
                let names: Vec<String> =
                    members.iter().filter_map(|c| table.class(*c).map(|i| i.qualified.clone())).collect();
                let index = shapes.hierarchies.len();
                for n in &names {
                    shapes.member_of.insert(n.clone(), index);
                }
                let root = table.class(root).map(|i| i.qualified.clone()).unwrap_or_default();
                shapes.hierarchies.push(LHierarchy { root, members: names, open });
            }
        }
        shapes.mark_methods(table, externals);
        shapes
    }

    fn mark_methods(&mut self, table: &SymbolTable, externals: &Externals) {
        for class in table.classes.values() {
            if self.repr.get(&class.qualified) != Some(&Repr::Reference) {
                continue;
            }
            let ancestors: Vec<SymbolId> = table.mro(class.symbol).into_iter().skip(1).collect();
            for (name, m) in &class.methods {
                if matches!(name.as_str(), "__init__" | "__del__") {
                    continue;
                }
                let Some(info) = table.function(*m) else { continue };
                if info.is_static {
                    continue;
                }
                let overridden = !table.overrides_of(*m).is_empty();
                let overrides = ancestors
                    .iter()
                    .any(|a| table.class(*a).is_some_and(|i| i.methods.contains_key(name)))
                    || table.ancestors(&class.qualified).iter().any(|a| externals.contains_key(&format!("{a}.{name}")));
                if overridden || overrides || info.is_abstract {
                    self.virtuals.insert(*m);
                }
                if overrides {
                    self.overrides.insert(*m);
                }
                let bodiless = info.is_abstract || (info.is_stub && overridden);
                if bodiless && !instantiated_without_override(table, class.symbol, name) {
                    self.pure.insert(*m);
                }
            }
        }
    }

    pub fn repr_of(&self, qualified: &str) -> Repr {
        self.repr
            .get(qualified)
            .or_else(|| self.external.get(qualified))
            .copied()
            .unwrap_or(Repr::Reference)
    }

    pub fn ownership(&self, qualified: &str) -> Ownership {
        match self.repr_of(qualified) {
            Repr::Value => Ownership::Value,
            Repr::Reference => Ownership::Shared,
        }
    }

    pub fn hierarchy_of(&self, qualified: &str) -> Option<&LHierarchy> {
        self.member_of.get(qualified).map(|i| &self.hierarchies[*i])
    }
}

fn has_external_base(table: &SymbolTable, class: SymbolId) -> bool {
    table.class(class).is_some_and(|c| c.has_external_base())
}

/// Why a connected class group needs shared handles, if it does.
fn reference_reason(
    table: &SymbolTable,
    facts: &JoinFacts,
    forced: &HashSet<String>,
    members: &[SymbolId],
) -> Option<&'static str> {
    for c in members {
        let Some(info) = table.class(*c) else { continue };
        if info.has_external_base() {
            return Some("external base");
        }
        if forced.contains(&info.qualified) {
            return Some("extended by another module");
        }
        if facts.polymorphic.contains(&info.qualified) {
            return Some("polymorphic use");
        }
        if facts.nullable.contains(&info.qualified) {
            return Some("nullable");
        }
        for (name, m) in &info.methods {
            if matches!(name.as_str(), "__init__" | "__del__") {
                continue;
            }
            if table.function(*m).is_some_and(|f| f.is_abstract) {
                return Some("abstract method");
            }
            if !table.overrides_of(*m).is_empty() {
                return Some("overridden method");
            }
        }
    }
    None
}

/// Is `class`, or a subclass that inherits `method` unchanged, ever
/// constructed?
fn instantiated_without_override(table: &SymbolTable, class: SymbolId, method: &str) -> bool {
    let instantiated = |c: SymbolId| table.symbol(c).evidence.iter().any(|e| matches!(e, Evidence::Instantiated(_)));
    if instantiated(class) {
        return true;
    }
    table.descendants(class).into_iter().any(|d| {
        let own = table.lookup_method(d, method).and_then(|m| table.symbol(m).owner) == Some(class);
        own && instantiated(d)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::resolve::{resolve, Interfaces};

    fn shapes(src: &str, facts: JoinFacts) -> Shapes {
        let module = parse_module(src, "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        Shapes::decide(&table, &facts, &Externals::new(), &HashMap::new(), &HashSet::new())
    }

    #[test]
    fn plain_class_is_value() {
        let s = shapes("class P:\n    def __init__(self, x):\n        self.x = x\n", JoinFacts::default());
        assert_eq!(s.repr_of("m.P"), Repr::Value);
        assert!(s.hierarchies.is_empty());
    }

    #[test]
    fn override_makes_whole_hierarchy_reference() {
        let src = "class A:\n    def f(self):\n        return 1\nclass B(A):\n    def f(self):\n        return 2\nclass C:\n    pass\n";
        let s = shapes(src, JoinFacts::default());
        assert_eq!(s.repr_of("m.A"), Repr::Reference);
        assert_eq!(s.repr_of("m.B"), Repr::Reference);
        assert_eq!(s.repr_of("m.C"), Repr::Value);
        let h = s.hierarchy_of("m.B").unwrap();
        assert_eq!(h.root, "m.A");
        assert!(!h.open);
    }

    #[test]
    fn nullable_fact_forces_reference() {
        let mut facts = JoinFacts::default();
        facts.nullable.insert("m.Node".into());
        let s = shapes("class Node:\n    pass\n", facts);
        assert_eq!(s.repr_of("m.Node"), Repr::Reference);
    }

    #[test]
    fn abstract_method_without_instances_is_pure() {
        let src = "class E:\n    def ev(self):\n        raise NotImplementedError()\nclass S(E):\n    def ev(self):\n        return 1\ns = S()\n";
        let module = parse_module(src, "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        let s = Shapes::decide(&table, &JoinFacts::default(), &Externals::new(), &HashMap::new(), &HashSet::new());
        let e = table.class_by_name("m.E").unwrap();
        let ev = e.methods["ev"];
        assert!(s.pure.contains(&ev));
        assert!(s.virtuals.contains(&ev));
        let sub = table.class_by_name("m.S").unwrap().methods["ev"];
        assert!(s.overrides.contains(&sub));
    }

    #[test]
    fn unknown_external_classes_default_to_reference() {
        let s = Shapes::default();
        assert_eq!(s.repr_of("other.Thing"), Repr::Reference);
        assert_eq!(s.ownership("other.Thing"), Ownership::Shared);
    }
}
