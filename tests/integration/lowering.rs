mod common;
use common::{diagnostics_of, fatal, lower};

use tide::diagnostics::{CompileError, DiagnosticKind};
use tide::lower::ir::{Dispatch, LExpr, LModule, LStmt, MethodKind, Repr};

fn repr_of(m: &LModule, class: &str) -> Repr {
    m.classes.iter().find(|c| c.name == class).map(|c| c.repr).unwrap_or_else(|| panic!("no class {class}"))
}

const POINT: &str = "\
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y

    def __add__(self, other):
        return Point(self.x + other.x, self.y + other.y)

a = Point(1.0, 2.0)
b = Point(3.0, 4.0)
c = a + b
";

#[test]
fn plain_aggregate_is_a_value_type() {
    let m = lower(POINT);
    assert_eq!(repr_of(&m, "m.Point"), Repr::Value);
    let add = m.classes[0].method("__add__").unwrap();
    assert!(matches!(add.kind, MethodKind::Operator));
    assert!(!add.is_virtual);
}

#[test]
fn concrete_operands_call_the_overload_directly() {
    let m = lower(POINT);
    let dispatch = m.init.iter().find_map(|s| match s {
        LStmt::Assign { value: LExpr::Binary { dispatch, .. }, .. } => Some(dispatch.clone()),
        _ => None,
    });
    assert!(matches!(dispatch, Some(Dispatch::Overload { repr: Repr::Value })));
}

const FAMILY: &str = "\
class Animal:
    def __init__(self, name):
        self.name = name

class Dog(Animal):
    pass

class Cat(Animal):
    pass
";

#[test]
fn base_handle_holding_two_subclasses_flips_to_reference() {
    let plain = lower(&format!("{FAMILY}d = Dog('rex')\nc = Cat('tom')\n"));
    assert_eq!(repr_of(&plain, "m.Animal"), Repr::Value);

    let mixed = lower(&format!("{FAMILY}pet = Dog('rex')\npet = Cat('tom')\n"));
    assert_eq!(repr_of(&mixed, "m.Animal"), Repr::Reference);
    assert_eq!(repr_of(&mixed, "m.Dog"), Repr::Reference);
    assert_eq!(repr_of(&mixed, "m.Cat"), Repr::Reference);
}

#[test]
fn representation_is_stable_under_reordering_unrelated_declarations() {
    let unrelated = "def helper(v):\n    return v + 1\nK = helper(1)\n";
    let before = lower(&format!("{unrelated}{FAMILY}pet = Dog('rex')\npet = Cat('tom')\n"));
    let after = lower(&format!("{FAMILY}pet = Dog('rex')\npet = Cat('tom')\n{unrelated}"));
    for class in ["m.Animal", "m.Dog", "m.Cat"] {
        assert_eq!(repr_of(&before, class), repr_of(&after, class));
    }
}

#[test]
fn not_implemented_sentinel_becomes_pure_virtual() {
    let src = "\
class Shape:
    def area(self):
        raise NotImplementedError()

class Square(Shape):
    def __init__(self, side):
        self.side = side

    def area(self):
        return self.side * self.side

s = Square(2.0)
";
    let m = lower(src);
    let shape = m.classes.iter().find(|c| c.name == "m.Shape").unwrap();
    assert!(shape.is_abstract);
    let area = shape.method("area").unwrap();
    assert!(area.body.is_none());
    assert!(area.is_virtual);
    let square = m.classes.iter().find(|c| c.name == "m.Square").unwrap();
    assert!(square.method("area").unwrap().is_override);
    assert_eq!(square.repr, Repr::Reference);
}

#[test]
fn equality_checks_identity_then_tag_then_fields() {
    let src = "\
class Node:
    def __eq__(self, other):
        return self is other

class Leaf(Node):
    def __init__(self, v):
        self.v = v

    def __eq__(self, other):
        if self is other:
            return True
        if isinstance(other, Leaf):
            return self.v == other.v
        return False

class Other(Node):
    def __init__(self, v):
        self.v = v

n = Leaf(1)
n = Other(1)
";
    let m = lower(src);
    let leaf = m.classes.iter().find(|c| c.name == "m.Leaf").unwrap();
    let eq = leaf.method("__eq__").unwrap();
    assert!(matches!(eq.kind, MethodKind::Equality));
    let body = eq.body.as_ref().unwrap();
    assert!(matches!(body[0], LStmt::IdentityGuard { .. }));
    assert!(matches!(body[1], LStmt::TagGuard { .. }));
    assert!(matches!(body.last(), Some(LStmt::Return(Some(_)))));
}

#[test]
fn isinstance_against_a_computed_class_compares_runtime_classes() {
    let src = "\
class Shape:
    def area(self):
        raise NotImplementedError()

class Square(Shape):
    def area(self):
        return 1.0

class Circle(Shape):
    def area(self):
        return 2.0

def alike(a: Shape, b: Shape):
    return isinstance(a, type(b))

print(alike(Square(), Circle()))
";
    let m = lower(src);
    let f = m.functions.iter().find(|f| f.name == "m.alike").unwrap();
    assert!(matches!(f.body.last(), Some(LStmt::Return(Some(LExpr::SameClass { .. })))));
}

#[test]
fn constants_initialise_in_dependency_order() {
    let m = lower("def double():\n    return BASE * 2\nTOTAL = double()\nBASE = 21\n");
    let order: Vec<&str> = m
        .init
        .iter()
        .filter_map(|s| match s {
            LStmt::Assign { target: tide::lower::ir::LPlace::Global(name), .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["m.BASE", "m.TOTAL"]);
}

#[test]
fn constant_cycle_is_fatal() {
    let err = fatal("def f():\n    return B\ndef g():\n    return A\nA = f()\nB = g()\n");
    match err {
        CompileError::ConstantInitCycle { cycle, .. } => assert_eq!(cycle.first(), cycle.last()),
        other => panic!("expected a cycle, got {other}"),
    }
}

#[test]
fn none_in_a_class_slot_forces_reference() {
    let src = "\
class Link:
    def __init__(self, v):
        self.v = v

head = Link(1)
head = None
";
    assert_eq!(repr_of(&lower(src), "m.Link"), Repr::Reference);
}

#[test]
fn decorators_map_to_member_qualifiers() {
    let src = "\
class Vec2:
    def __init__(self, x):
        self.x = x

    @staticmethod
    def unit():
        return Vec2(1.0)

    @const
    def length(self):
        return self.x

    def __del__(self):
        return

v = Vec2.unit()
n = v.length()
";
    let m = lower(src);
    let class = &m.classes[0];
    assert!(class.method("unit").unwrap().is_static);
    assert!(class.method("length").unwrap().is_const);
    assert!(class.dtor.is_some());
    assert!(class.method("__del__").is_none());
}

#[test]
fn base_initialisers_are_lifted_from_the_constructor() {
    let src = "\
class Base:
    def __init__(self, tag):
        self.tag = tag

class Child(Base):
    def __init__(self, tag, extra):
        super().__init__(tag)
        self.extra = extra

c = Child('a', 2)
";
    let m = lower(src);
    let child = m.classes.iter().find(|c| c.name == "m.Child").unwrap();
    let ctor = child.ctor.as_ref().unwrap();
    assert_eq!(ctor.base_inits.len(), 1);
    assert_eq!(ctor.base_inits[0].0, "m.Base");
}

#[test]
fn member_owned_by_one_subclass_is_a_checked_downcast() {
    let src = "\
class Expr:
    def kind(self):
        return 0

class Num(Expr):
    def __init__(self, value):
        self.value = value

    def kind(self):
        return 1

class Neg(Expr):
    def __init__(self, inner):
        self.inner = inner

    def kind(self):
        return 2

def value_of(e: Expr):
    if e.kind() == 1:
        return e.value
    return 0.0

value_of(Num(2.0))
value_of(Neg(Num(1.0)))
";
    let m = lower(src);
    let f = m.functions.iter().find(|f| f.name == "m.value_of").unwrap();
    let text = format!("{:?}", f.body);
    assert!(text.contains("Downcast"), "{text}");
}

#[test]
fn member_shared_by_several_subclasses_is_ambiguous() {
    let src = "\
class Expr:
    def kind(self):
        return 0

class A(Expr):
    def __init__(self, v):
        self.v = v

    def kind(self):
        return 1

class B(Expr):
    def __init__(self, v):
        self.v = v

    def kind(self):
        return 2

def read(e: Expr):
    return e.v

read(A(1))
read(B(2))
";
    assert!(!diagnostics_of(src, DiagnosticKind::AmbiguousAttribute).is_empty());
}

#[test]
fn locals_first_assigned_in_a_branch_are_hoisted() {
    let m = lower("def pick(c):\n    if c:\n        r = 1\n    else:\n        r = 2\n    return r\npick(True)\n");
    let body = &m.functions[0].body;
    assert!(matches!(&body[0], LStmt::Declare { name, init: None, .. } if name == "r"));
}

#[test]
fn main_guard_becomes_the_entry_point() {
    let m = lower("def f():\n    return 1\nif __name__ == '__main__':\n    print(f())\n");
    assert!(m.entry.is_some());
    assert!(m.uses_print);
}
