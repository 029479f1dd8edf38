use crate::span::Spanned;

/// Identity of an expression node. Unique within one parsed module; used as
/// the key for name bindings and inferred expression types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone)]
pub struct Module {
    /// Dotted module path, e.g. `symdiff.expression`.
    pub name: String,
    pub docstring: Option<String>,
    pub body: Vec<Spanned<Stmt>>,
    pub node_count: u32,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Spanned<Expr>),
    /// `target [: annotation] [= value]`; `value` is absent for bare
    /// declarations such as class-level `x: float`.
    Assign {
        target: Spanned<Expr>,
        annotation: Option<Spanned<TypeExpr>>,
        value: Option<Spanned<Expr>>,
    },
    AugAssign {
        target: Spanned<Expr>,
        op: BinOp,
        value: Spanned<Expr>,
    },
    Return(Option<Spanned<Expr>>),
    If {
        condition: Spanned<Expr>,
        then_body: Vec<Spanned<Stmt>>,
        else_body: Vec<Spanned<Stmt>>,
    },
    While {
        condition: Spanned<Expr>,
        body: Vec<Spanned<Stmt>>,
    },
    For {
        /// A `Name` or a `Tuple` of names.
        target: Spanned<Expr>,
        iterable: Spanned<Expr>,
        body: Vec<Spanned<Stmt>>,
    },
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Raise(Option<Spanned<Expr>>),
    Pass,
    Break,
    Continue,
    Import {
        path: Vec<Spanned<String>>,
        alias: Option<Spanned<String>>,
    },
    FromImport {
        module: Vec<Spanned<String>>,
        names: Vec<(Spanned<String>, Option<Spanned<String>>)>,
    },
    With {
        context: Spanned<Expr>,
        binding: Option<Spanned<String>>,
        body: Vec<Spanned<Stmt>>,
    },
    Del(Spanned<Expr>),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub returns: Option<Spanned<TypeExpr>>,
    pub body: Vec<Spanned<Stmt>>,
    pub decorators: Vec<Spanned<String>>,
    pub docstring: Option<String>,
}

impl FunctionDef {
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d.node == name)
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Spanned<String>,
    pub annotation: Option<Spanned<TypeExpr>>,
    pub default: Option<Spanned<Expr>>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: Spanned<String>,
    /// Base class references: names or dotted attribute chains.
    pub bases: Vec<Spanned<Expr>>,
    pub body: Vec<Spanned<Stmt>>,
    pub decorators: Vec<Spanned<String>>,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    Name(String),
    Attribute {
        value: Box<Spanned<Expr>>,
        attr: Spanned<String>,
    },
    Call {
        func: Box<Spanned<Expr>>,
        args: Vec<Spanned<Expr>>,
    },
    BinOp {
        op: BinOp,
        left: Box<Spanned<Expr>>,
        right: Box<Spanned<Expr>>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Spanned<Expr>>,
        right: Box<Spanned<Expr>>,
    },
    Compare {
        op: CmpOp,
        left: Box<Spanned<Expr>>,
        right: Box<Spanned<Expr>>,
    },
    List(Vec<Spanned<Expr>>),
    Tuple(Vec<Spanned<Expr>>),
    Set(Vec<Spanned<Expr>>),
    Dict(Vec<(Spanned<Expr>, Spanned<Expr>)>),
    Subscript {
        value: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
}

impl Expr {
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::NoneLit
        )
    }

    /// Dotted path of a `Name`/`Attribute` chain, e.g. `math.pi`.
    pub fn dotted_path(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(n) => Some(n.clone()),
            ExprKind::Attribute { value, attr } => {
                value.node.dotted_path().map(|base| format!("{base}.{}", attr.node))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }

    /// Name of the dunder method implementing this operator.
    pub fn dunder(self) -> &'static str {
        match self {
            BinOp::Add => "__add__",
            BinOp::Sub => "__sub__",
            BinOp::Mul => "__mul__",
            BinOp::Div => "__truediv__",
            BinOp::FloorDiv => "__floordiv__",
            BinOp::Mod => "__mod__",
            BinOp::Pow => "__pow__",
        }
    }

    /// Reflected dunder, tried on the right operand.
    pub fn reflected_dunder(self) -> &'static str {
        match self {
            BinOp::Add => "__radd__",
            BinOp::Sub => "__rsub__",
            BinOp::Mul => "__rmul__",
            BinOp::Div => "__rtruediv__",
            BinOp::FloorDiv => "__rfloordiv__",
            BinOp::Mod => "__rmod__",
            BinOp::Pow => "__rpow__",
        }
    }

    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

impl UnaryOp {
    pub fn dunder(self) -> Option<&'static str> {
        match self {
            UnaryOp::Neg => Some("__neg__"),
            UnaryOp::Pos => Some("__pos__"),
            UnaryOp::Not => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }

    pub fn dunder(self) -> Option<&'static str> {
        match self {
            CmpOp::Eq => Some("__eq__"),
            CmpOp::NotEq => Some("__ne__"),
            CmpOp::Lt => Some("__lt__"),
            CmpOp::LtEq => Some("__le__"),
            CmpOp::Gt => Some("__gt__"),
            CmpOp::GtEq => Some("__ge__"),
            CmpOp::In | CmpOp::NotIn => Some("__contains__"),
            CmpOp::Is | CmpOp::IsNot => None,
        }
    }
}

/// Type annotation as written. String annotations are parsed into the same
/// shape with pointer/reference decorations removed.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named(String),
    Generic {
        name: String,
        args: Vec<Spanned<TypeExpr>>,
    },
}

impl TypeExpr {
    pub fn head(&self) -> &str {
        match self {
            TypeExpr::Named(n) => n,
            TypeExpr::Generic { name, .. } => name,
        }
    }
}
