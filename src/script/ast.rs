use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Const,
    Let,
    Var,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub target: Pattern,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Declaration {
        kind: DeclKind,
        declarators: Vec<Declarator>,
    },
    Function(Rc<FunctionDef>),
    Expression(Expr),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: Option<DeclKind>,
        target: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        kind: Option<DeclKind>,
        target: Pattern,
        object: Expr,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<Pattern>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Block(Vec<Stmt>),
    Empty,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// `None` for `default:`.
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Identifier(String),
    Object {
        properties: Vec<PatternProperty>,
        rest: Option<String>,
    },
    Array {
        elements: Vec<Option<PatternElement>>,
        rest: Option<Box<Pattern>>,
    },
}

#[derive(Debug, Clone)]
pub struct PatternProperty {
    pub key: String,
    pub value: PatternElement,
}

#[derive(Debug, Clone)]
pub struct PatternElement {
    pub target: Pattern,
    pub default: Option<Expr>,
}

impl Pattern {
    pub fn bound_names(&self, out: &mut Vec<String>) {
        match self {
            Self::Identifier(name) => out.push(name.clone()),
            Self::Object { properties, rest } => {
                for property in properties {
                    property.value.target.bound_names(out);
                }
                if let Some(rest) = rest {
                    out.push(rest.clone());
                }
            }
            Self::Array { elements, rest } => {
                for element in elements.iter().flatten() {
                    element.target.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub target: Pattern,
    pub default: Option<Expr>,
    pub rest: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expression(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub is_arrow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
    BitNot,
    Typeof,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    UnsignedShiftRight,
    In,
    Instanceof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Arithmetic(BinaryOp),
    Logical(LogicalOp),
}

#[derive(Debug, Clone)]
pub enum PropertyKey {
    Static(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum ArrayElement {
    Item(Expr),
    Spread(Expr),
    Hole,
}

#[derive(Debug, Clone)]
pub enum ObjectProperty {
    KeyValue(PropertyKey, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum Argument {
    Positional(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(Rc<str>),
    Template {
        quasis: Vec<String>,
        exprs: Vec<Expr>,
    },
    Bool(bool),
    Null,
    Identifier(String),
    This,
    Array(Vec<ArrayElement>),
    Object(Vec<ObjectProperty>),
    Function(Rc<FunctionDef>),
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Argument>,
        optional: bool,
    },
    New {
        callee: Box<Expr>,
        arguments: Vec<Argument>,
    },
    Member {
        object: Box<Expr>,
        property: PropertyKey,
        optional: bool,
    },
    /// Wraps a member/call chain containing `?.` so a nullish link short-circuits it.
    OptionalChain(Box<Expr>),
    Sequence(Vec<Expr>),
}

impl Expr {
    /// Source-like rendering used in error messages (`s.addPart is not a function`).
    pub fn describe(&self) -> String {
        match self {
            Self::Identifier(name) => name.clone(),
            Self::This => "this".to_string(),
            Self::Member {
                object, property, ..
            } => match property {
                PropertyKey::Static(name) => format!("{}.{}", object.describe(), name),
                PropertyKey::Computed(_) => format!("{}[...]", object.describe()),
            },
            Self::Call { callee, .. } => format!("{}(...)", callee.describe()),
            Self::OptionalChain(inner) => inner.describe(),
            Self::Function(_) => "function".to_string(),
            _ => "expression".to_string(),
        }
    }
}
