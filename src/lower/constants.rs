//! Initialisation order of module constants.
//!
//! A constant depends on every constant its initialiser reads, directly or
//! through the functions, methods and constructors it calls. Top-level
//! statements keep their source order; a constant is pulled forward only
//! ahead of the constants that read it.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::diagnostics::CompileError;
use crate::infer::index::ExprIndex;
use crate::parser::ast::{Expr, ExprKind, Module, NodeId, Stmt};
use crate::resolve::evidence::AttrUse;
use crate::resolve::scope::{SymbolId, SymbolKind};
use crate::resolve::SymbolTable;
use crate::span::Spanned;
use crate::types::{ClassHierarchy, Type};

/// Which constants each constant reads, checked to be acyclic.
#[derive(Debug, Clone)]
pub struct ConstantGraph {
    constants: Vec<SymbolId>,
    deps: Vec<BTreeSet<usize>>,
}

impl ConstantGraph {
    /// `types` gives receiver types, so calls through attributes reach
    /// the methods they name.
    pub fn build(module: &Module, table: &SymbolTable, types: &HashMap<NodeId, Type>) -> Result<Self, CompileError> {
        let index = ExprIndex::build(module, table);
        let mut refs: HashMap<SymbolId, Vec<SymbolId>> = HashMap::new();
        for (node, func) in &index.function {
            if let Some(sym) = table.binding(*node) {
                push_unique(refs.entry(*func).or_default(), sym);
            }
        }
        for site in &table.attr_sites {
            let AttrUse::Call { .. } = site.usage else { continue };
            let Some(func) = index.function.get(&site.node) else { continue };
            for m in attr_methods(table, types.get(&site.receiver), &site.attr) {
                push_unique(refs.entry(*func).or_default(), m);
            }
        }

        let constants = table.constants.clone();
        let position: HashMap<SymbolId, usize> = constants.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        let values = initializers(module, table);

        let mut deps: Vec<BTreeSet<usize>> = Vec::with_capacity(constants.len());
        for c in &constants {
            let mut direct = Vec::new();
            if let Some(v) = values.get(c) {
                names_in(v, table, types, &mut direct);
            }
            let mut seen = HashSet::new();
            let mut reached = BTreeSet::new();
            for name in direct {
                reach(table, &refs, &position, name, &mut seen, &mut reached);
            }
            deps.push(reached);
        }

        let graph = ConstantGraph { constants, deps };
        let order = graph.topological();
        if order.len() < graph.constants.len() {
            let remaining: Vec<usize> = (0..graph.constants.len()).filter(|i| !order.contains(i)).collect();
            let cycle = find_cycle(&graph.deps, &remaining);
            let names: Vec<String> = cycle.iter().map(|i| table.symbol(graph.constants[*i]).name.clone()).collect();
            let span = table.symbol(graph.constants[cycle[0]]).span;
            return Err(CompileError::ConstantInitCycle { cycle: names, span });
        }
        Ok(graph)
    }

    pub fn is_constant(&self, sym: SymbolId) -> bool {
        self.constants.contains(&sym)
    }

    /// Constants `c` reads, earliest declaration first.
    pub fn prerequisites(&self, c: SymbolId) -> Vec<SymbolId> {
        let Some(i) = self.constants.iter().position(|x| *x == c) else { return Vec::new() };
        self.deps[i].iter().map(|d| self.constants[*d]).collect()
    }

    /// Constants alone in dependency order, earliest declaration first
    /// among the ready ones.
    pub fn order(&self) -> Vec<SymbolId> {
        self.topological().into_iter().map(|i| self.constants[i]).collect()
    }

    fn topological(&self) -> Vec<usize> {
        let mut indegree: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.constants.len()).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(self.constants.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for (i, d) in self.deps.iter().enumerate() {
                if d.contains(&next) {
                    indegree[i] -= 1;
                    if indegree[i] == 0 {
                        ready.insert(i);
                    }
                }
            }
        }
        order
    }
}

fn push_unique(list: &mut Vec<SymbolId>, sym: SymbolId) {
    if !list.contains(&sym) {
        list.push(sym);
    }
}

/// Methods a call `recv.attr(...)` may run: the receiver class's method and
/// every override below it, or every local method of that name when the
/// receiver type is not a local class.
fn attr_methods(table: &SymbolTable, receiver: Option<&Type>, attr: &str) -> Vec<SymbolId> {
    let class = receiver.and_then(Type::class_name).filter(|c| table.class_by_name(c).is_some());
    let mut out = Vec::new();
    for info in table.classes.values() {
        let related = match class {
            Some(c) => table.is_subclass(&info.qualified, c) || table.is_subclass(c, &info.qualified),
            None => true,
        };
        if related && let Some(m) = info.methods.get(attr) {
            push_unique(&mut out, *m);
        }
    }
    out
}

/// Constants reachable from `sym`: itself if it is one, otherwise whatever
/// the function (or the constructor of the class) it names reads.
fn reach(
    table: &SymbolTable,
    refs: &HashMap<SymbolId, Vec<SymbolId>>,
    position: &HashMap<SymbolId, usize>,
    sym: SymbolId,
    seen: &mut HashSet<SymbolId>,
    out: &mut BTreeSet<usize>,
) {
    if let Some(i) = position.get(&sym) {
        out.insert(*i);
        return;
    }
    if !seen.insert(sym) {
        return;
    }
    let target = match table.symbol(sym).kind {
        SymbolKind::Function | SymbolKind::Method => Some(sym),
        SymbolKind::Class => table.lookup_method(sym, "__init__"),
        _ => None,
    };
    let Some(target) = target else { return };
    for r in refs.get(&target).into_iter().flatten() {
        reach(table, refs, position, *r, seen, out);
    }
}

fn find_cycle(deps: &[BTreeSet<usize>], remaining: &[usize]) -> Vec<usize> {
    let mut path: Vec<usize> = Vec::new();
    let mut cur = remaining[0];
    loop {
        if let Some(start) = path.iter().position(|p| *p == cur) {
            let mut cycle = path[start..].to_vec();
            cycle.push(cur);
            return cycle;
        }
        path.push(cur);
        match deps[cur].iter().find(|d| remaining.contains(d)) {
            Some(next) => cur = *next,
            None => return path,
        }
    }
}

fn initializers<'m>(module: &'m Module, table: &SymbolTable) -> HashMap<SymbolId, &'m Spanned<Expr>> {
    let mut out = HashMap::new();
    for stmt in &module.body {
        if let Stmt::Assign { target, value: Some(v), .. } = &stmt.node
            && let Some(sym) = table.binding(target.node.id)
            && table.constants.contains(&sym)
        {
            out.insert(sym, v);
        }
    }
    out
}

fn names_in(e: &Spanned<Expr>, table: &SymbolTable, types: &HashMap<NodeId, Type>, out: &mut Vec<SymbolId>) {
    if let Some(sym) = table.binding(e.node.id) {
        out.push(sym);
    }
    match &e.node.kind {
        ExprKind::Attribute { value, attr } => {
            names_in(value, table, types, out);
            out.extend(attr_methods(table, types.get(&value.node.id), &attr.node));
        }
        ExprKind::UnaryOp { operand, .. } => names_in(operand, table, types, out),
        ExprKind::Call { func, args } => {
            names_in(func, table, types, out);
            for a in args {
                names_in(a, table, types, out);
            }
        }
        ExprKind::BinOp { left, right, .. } | ExprKind::BoolOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            names_in(left, table, types, out);
            names_in(right, table, types, out);
        }
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
            for i in items {
                names_in(i, table, types, out);
            }
        }
        ExprKind::Dict(entries) => {
            for (k, v) in entries {
                names_in(k, table, types, out);
                names_in(v, table, types, out);
            }
        }
        ExprKind::Subscript { value, index } => {
            names_in(value, table, types, out);
            names_in(index, table, types, out);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::infer::{Engine, InferOptions};
    use crate::resolve::{resolve, Interfaces};

    fn graph(src: &str) -> (Result<ConstantGraph, CompileError>, SymbolTable) {
        let module = parse_module(src, "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        let typed = engine.finish();
        (ConstantGraph::build(&module, &typed.table, &typed.exprs), typed.table)
    }

    fn order(src: &str) -> Result<Vec<String>, CompileError> {
        let (graph, table) = graph(src);
        graph.map(|g| g.order().iter().map(|i| table.symbol(*i).name.clone()).collect())
    }

    #[test]
    fn declaration_order_when_independent() {
        assert_eq!(order("a = 1\nb = 2\nc = 3\n").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn dependency_through_function_moves_constant_later() {
        let src = "def twice():\n    return B * 2\nA = twice()\nB = 21\n";
        assert_eq!(order(src).unwrap(), vec!["B", "A"]);
    }

    #[test]
    fn dependency_through_constructor() {
        let src = "class Box:\n    def __init__(self):\n        self.v = SEED\nA = Box()\nSEED = 4\n";
        assert_eq!(order(src).unwrap(), vec!["SEED", "A"]);
    }

    #[test]
    fn dependency_through_a_method_on_self() {
        let src = "class Box:\n    def __init__(self):\n        self.v = self.seed()\n    def seed(self):\n        return SEED\nA = Box()\nSEED = 4\n";
        assert_eq!(order(src).unwrap(), vec!["SEED", "A"]);
    }

    #[test]
    fn dependency_through_a_method_on_another_constant() {
        let src = "class F:\n    def make(self):\n        return BASE\nf = F()\nA = f.make()\nBASE = 3\n";
        assert_eq!(order(src).unwrap(), vec!["f", "BASE", "A"]);
        let (graph, table) = graph(src);
        let graph = graph.unwrap();
        let a = table.constants[1];
        let names: Vec<&str> = graph.prerequisites(a).iter().map(|p| table.symbol(*p).name.as_str()).collect();
        assert_eq!(names, vec!["f", "BASE"]);
    }

    #[test]
    fn cycle_is_reported_with_its_path() {
        let src = "def f():\n    return B\ndef g():\n    return A\nA = f()\nB = g()\n";
        match order(src) {
            Err(CompileError::ConstantInitCycle { cycle, .. }) => assert_eq!(cycle, vec!["A", "B", "A"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }
}
