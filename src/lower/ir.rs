//! Lowered module: every construct is a concrete static construct and every
//! type is settled. Class, function and global names are qualified source
//! names (`pkg.mod.Name`); the emitter maps them to C++ paths.

use std::collections::HashMap;

use crate::parser::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repr {
    /// Plain struct, copied on assignment.
    Value,
    /// Heap object behind a shared handle.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Include {
    System(String),
    Local(String),
    Runtime(String),
}

#[derive(Debug, Clone)]
pub struct LModule {
    pub name: String,
    pub includes: Vec<Include>,
    /// Modules whose initialiser must run before this one.
    pub imports: Vec<String>,
    pub hierarchies: Vec<LHierarchy>,
    /// Base classes before derived ones.
    pub classes: Vec<LClass>,
    pub functions: Vec<LFunction>,
    pub globals: Vec<LGlobal>,
    /// Body of the module initialiser: constants in dependency order, then
    /// the remaining top-level statements in source order.
    pub init: Vec<LStmt>,
    pub entry: Option<Vec<LStmt>>,
    pub dynamic: DynamicSurface,
    pub uses_print: bool,
    /// Representation of every class this module names, local or imported.
    pub reprs: HashMap<String, Repr>,
}

/// Capability interface needed by dynamically dispatched operations.
#[derive(Debug, Clone, Default)]
pub struct DynamicSurface {
    pub used: bool,
    /// Method name and argument count.
    pub methods: Vec<(String, usize)>,
}

impl DynamicSurface {
    pub fn note(&mut self, method: &str, arity: usize) {
        self.used = true;
        if !self.methods.iter().any(|(m, a)| m == method && *a == arity) {
            self.methods.push((method.to_string(), arity));
        }
    }
}

/// A class tree lowered with a closed tag enumeration (or, when `open`,
/// with checked casts because some base lives outside the module).
#[derive(Debug, Clone)]
pub struct LHierarchy {
    pub root: String,
    pub members: Vec<String>,
    pub open: bool,
}

#[derive(Debug, Clone)]
pub struct LGlobal {
    pub name: String,
    pub ty: Type,
    pub constant: bool,
}

#[derive(Debug, Clone)]
pub struct LClass {
    pub name: String,
    pub repr: Repr,
    pub bases: Vec<String>,
    /// Root of the tagged hierarchy this class belongs to.
    pub hierarchy: Option<String>,
    pub fields: Vec<LField>,
    pub ctor: Option<LCtor>,
    /// Base whose constructors are inherited when the class has none.
    pub inherit_ctor: Option<String>,
    pub dtor: Option<Vec<LStmt>>,
    pub methods: Vec<LMethod>,
    pub is_abstract: bool,
}

impl LClass {
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn method(&self, source_name: &str) -> Option<&LMethod> {
        self.methods.iter().find(|m| m.name == source_name)
    }
}

#[derive(Debug, Clone)]
pub struct LField {
    pub name: String,
    pub ty: Type,
    pub default: Option<LExpr>,
}

#[derive(Debug, Clone)]
pub struct LParam {
    pub name: String,
    pub ty: Type,
    pub default: Option<LExpr>,
}

#[derive(Debug, Clone)]
pub struct LCtor {
    pub params: Vec<LParam>,
    /// Base class and its constructor arguments.
    pub base_inits: Vec<(String, Vec<LExpr>)>,
    pub body: Vec<LStmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Regular,
    /// Maps to a C++ operator.
    Operator,
    /// `__eq__` rewritten into identity, tag, field order.
    Equality,
}

#[derive(Debug, Clone)]
pub struct LMethod {
    /// Source name, e.g. `__add__`.
    pub name: String,
    pub kind: MethodKind,
    pub params: Vec<LParam>,
    pub ret: Type,
    /// `None` for pure virtual methods.
    pub body: Option<Vec<LStmt>>,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_const: bool,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct LFunction {
    pub name: String,
    pub params: Vec<LParam>,
    pub ret: Type,
    pub body: Vec<LStmt>,
}

#[derive(Debug, Clone)]
pub enum LPlace {
    Local(String),
    Global(String),
    Field { object: LExpr, field: String, repr: Repr },
    Index { container: LExpr, index: LExpr },
}

/// Runtime class test.
#[derive(Debug, Clone, PartialEq)]
pub enum TagTest {
    /// Tag is one of these classes.
    Classes(Vec<String>),
    /// Same concrete class as `self`.
    SameAsSelf,
}

#[derive(Debug, Clone)]
pub enum LStmt {
    Declare { name: String, ty: Type, init: Option<LExpr> },
    Assign { target: LPlace, value: LExpr },
    /// `std::tie(a, b) = value`.
    Unpack { targets: Vec<LPlace>, value: LExpr },
    Expr(LExpr),
    Return(Option<LExpr>),
    If { cond: LExpr, then: Vec<LStmt>, els: Vec<LStmt> },
    While { cond: LExpr, body: Vec<LStmt> },
    /// Iterate `iterable`; `vars` names the loop variable (or the tuple
    /// components it is unpacked into). When `declare` is false the
    /// variables are hoisted locals and are assigned instead.
    ForEach { vars: Vec<LPlace>, elem: Type, iterable: LExpr, body: Vec<LStmt>, declare: bool },
    ForRange { var: LPlace, start: LExpr, stop: LExpr, step: LExpr, body: Vec<LStmt>, declare: bool },
    Throw { exception: String, message: Option<LExpr>, args: Vec<LExpr> },
    Rethrow,
    /// `with`: bind `name`, run `body`, call `__exit__` once on scope exit.
    Scoped { name: String, ty: Type, init: LExpr, repr: Repr, enter: bool, body: Vec<LStmt> },
    Break,
    Continue,
    /// `if (this == other) return true;`
    IdentityGuard { other: String },
    /// `if (!tag-test(other)) return false;`
    TagGuard { other: String, test: TagTest, root: String, open: bool },
    DelItem { container: LExpr, key: LExpr, is_dict: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Primitive,
    /// C++ operator on a user class.
    Overload { repr: Repr },
    /// Named dunder on the left operand.
    Method { name: String, repr: Repr },
    /// Reflected dunder on the right operand.
    Reflected { name: String, repr: Repr },
    /// Through the capability interface.
    Dynamic { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    Len,
    Repr,
    Abs,
    Min,
    Max,
    Sum,
    Contains,
    /// Element-wise equality of two containers.
    Equal,
    /// One-character string at an index.
    CharAt,
}

/// Runtime container a method is called on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    Dict,
    Set,
    Tuple,
    Str,
}

#[derive(Debug, Clone)]
pub enum Callee {
    /// Free function by qualified name.
    Function(String),
    /// Function-typed value.
    Value(Box<LExpr>),
}

#[derive(Debug, Clone)]
pub enum LExpr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    Local(String),
    Global(String),
    /// `self` used as a value.
    SelfRef { class: String, repr: Repr },
    Field { object: Box<LExpr>, field: String, repr: Repr },
    /// Unchecked cast of a base handle to a subclass.
    Downcast { value: Box<LExpr>, class: String },
    Call { callee: Callee, args: Vec<LExpr> },
    MethodCall { receiver: Box<LExpr>, method: String, args: Vec<LExpr>, repr: Repr },
    /// Call of a base-class implementation on the current object.
    BaseCall { base: String, method: String, args: Vec<LExpr> },
    StaticCall { class: String, method: String, args: Vec<LExpr> },
    Construct { class: String, repr: Repr, args: Vec<LExpr> },
    Binary { op: BinOp, left: Box<LExpr>, right: Box<LExpr>, dispatch: Dispatch, ty: Type },
    Unary { op: UnaryOp, operand: Box<LExpr>, dispatch: Dispatch },
    Compare { op: CmpOp, left: Box<LExpr>, right: Box<LExpr>, dispatch: Dispatch },
    Logical { op: BoolOp, left: Box<LExpr>, right: Box<LExpr> },
    Not(Box<LExpr>),
    Identity { left: Box<LExpr>, right: Box<LExpr>, negated: bool },
    IsInstance { value: Box<LExpr>, test: TagTest, root: String, open: bool },
    /// Class test decided at translation time.
    StaticBool(bool),
    /// `type(a) == type(b)` on two handles.
    SameClass { left: Box<LExpr>, right: Box<LExpr> },
    List { elem: Type, items: Vec<LExpr> },
    Dict { key: Type, value: Type, entries: Vec<(LExpr, LExpr)> },
    /// Sets are dictionaries to `bool`.
    Set { elem: Type, items: Vec<LExpr> },
    Tuple(Vec<LExpr>),
    TupleGet { value: Box<LExpr>, index: usize },
    Index { value: Box<LExpr>, index: Box<LExpr> },
    Range { start: Box<LExpr>, stop: Box<LExpr>, step: Box<LExpr> },
    Builtin { func: BuiltinFn, args: Vec<LExpr> },
    /// Arguments are already text.
    Print(Vec<LExpr>),
    /// Template formatting through the runtime exception type.
    Format { template: Box<LExpr>, args: Vec<LExpr> },
    Cast { to: Type, from: Type, value: Box<LExpr> },
    Math { func: String, args: Vec<LExpr> },
    MathConst(String),
    Box(Box<LExpr>),
    Unbox { value: Box<LExpr>, to: Type },
    DynamicAttr { object: Box<LExpr>, attr: String },
    DynamicCall { object: Box<LExpr>, method: String, args: Vec<LExpr> },
    /// Method of a runtime container; `of` is the receiver's type.
    ContainerCall { receiver: Box<LExpr>, kind: ContainerKind, of: Type, method: String, args: Vec<LExpr> },
    /// Fresh list or set filled from an iterable of type `from`.
    Collect { into: ContainerKind, elem: Type, source: Box<LExpr>, from: Type, sorted: bool },
}

impl LExpr {
    pub fn boxed(self) -> Box<LExpr> {
        Box::new(self)
    }
}

impl LPlace {
    pub fn name(&self) -> Option<&str> {
        match self {
            LPlace::Local(n) | LPlace::Global(n) => Some(n),
            _ => None,
        }
    }
}

/// Dunder methods spelled as C++ operators.
pub fn operator_symbol(dunder: &str) -> Option<&'static str> {
    let op = match dunder {
        "__add__" => "+",
        "__sub__" => "-",
        "__mul__" => "*",
        "__truediv__" => "/",
        "__mod__" => "%",
        "__neg__" => "-",
        "__pos__" => "+",
        "__eq__" => "==",
        "__ne__" => "!=",
        "__lt__" => "<",
        "__le__" => "<=",
        "__gt__" => ">",
        "__ge__" => ">=",
        "__getitem__" => "[]",
        _ => return None,
    };
    Some(op)
}
