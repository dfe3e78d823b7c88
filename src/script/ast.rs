use std::sync::Arc;

/// Literal constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `None`.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal (adjacent literals already concatenated).
    Str(String),
    /// Bytes literal.
    Bytes(Vec<u8>),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
    /// `not x`
    Not,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
}

impl BinOp {
    /// Operator symbol for error messages.
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
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `is`
    Is,
    /// `is not`
    IsNot,
}

impl CmpOp {
    /// Operator symbol for error messages.
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Literal),
    /// Identifier lookup.
    Name(String),
    /// `[a, b]`
    List(Vec<Expr>),
    /// `(a, b)` or a bare comma list.
    Tuple(Vec<Expr>),
    /// `{k: v}`
    Dict(Vec<(Expr, Expr)>),
    /// `f"..."`
    FString(Vec<FStringPart>),
    /// `value.attr`
    Attribute {
        /// Receiver.
        value: Box<Expr>,
        /// Attribute name.
        attr: String,
    },
    /// `value[index]`
    Subscript {
        /// Container.
        value: Box<Expr>,
        /// Index or [`Expr::Slice`].
        index: Box<Expr>,
    },
    /// `lower:upper:step`, only valid as a subscript index.
    Slice {
        /// Start bound.
        lower: Option<Box<Expr>>,
        /// End bound.
        upper: Option<Box<Expr>>,
        /// Stride.
        step: Option<Box<Expr>>,
    },
    /// Function call.
    Call {
        /// Callee.
        func: Box<Expr>,
        /// Arguments in source order.
        args: Vec<Argument>,
        /// Source line of the call.
        line: usize,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Arithmetic.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Short-circuit `and`.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit `or`.
    Or(Box<Expr>, Box<Expr>),
    /// Chained comparison `a < b <= c`.
    Compare {
        /// First operand.
        left: Box<Expr>,
        /// Remaining operator/operand pairs.
        rest: Vec<(CmpOp, Expr)>,
    },
    /// `body if test else orelse`
    IfExp {
        /// Condition.
        test: Box<Expr>,
        /// Value when true.
        body: Box<Expr>,
        /// Value when false.
        orelse: Box<Expr>,
    },
    /// List comprehension (generator expressions are evaluated eagerly as lists).
    ListComp {
        /// Produced element.
        element: Box<Expr>,
        /// `for ... in ... if ...` clauses.
        clauses: Vec<Comprehension>,
    },
    /// Dict comprehension.
    DictComp {
        /// Produced key.
        key: Box<Expr>,
        /// Produced value.
        value: Box<Expr>,
        /// `for ... in ... if ...` clauses.
        clauses: Vec<Comprehension>,
    },
    /// `lambda params: body`
    Lambda(Arc<FunctionDef>),
}

/// Call-site argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// `f(x)`
    Positional(Expr),
    /// `f(name=x)`
    Keyword(String, Expr),
    /// `f(*xs)`
    Star(Expr),
    /// `f(**kw)`
    DoubleStar(Expr),
}

/// One `for target in iter if cond...` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    /// Loop target.
    pub target: Target,
    /// Iterated expression.
    pub iter: Expr,
    /// Filters.
    pub conditions: Vec<Expr>,
}

/// Piece of an f-string.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    /// Literal text.
    Literal(String),
    /// Replacement field.
    Field {
        /// Expression inside the braces.
        expr: Expr,
        /// `!r` / `!s` conversion.
        conversion: Option<char>,
        /// Format spec after `:`.
        spec: Option<String>,
    },
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Plain name.
    Name(String),
    /// Destructuring.
    Tuple(Vec<Target>),
    /// `container[index] = ...`
    Subscript {
        /// Container expression.
        value: Expr,
        /// Index expression.
        index: Expr,
    },
}

/// Function parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Regular (optionally defaulted) parameter.
    Normal,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwArgs,
}

/// Function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Default value expression, evaluated at definition time.
    pub default: Option<Expr>,
    /// Parameter kind.
    pub kind: ParamKind,
}

/// `def` or `lambda`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Function name (`<lambda>` for lambdas).
    pub name: String,
    /// Parameters in order.
    pub params: Vec<Param>,
    /// Body statements; a lambda body is a single `return`.
    pub body: Vec<Stmt>,
}

/// `except` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Exception class expression (`None` catches everything).
    pub exc_type: Option<Expr>,
    /// Name bound with `as`.
    pub name: Option<String>,
    /// Handler body.
    pub body: Vec<Stmt>,
}

/// Statement with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Statement kind.
    pub kind: StmtKind,
    /// 1-based source line.
    pub line: usize,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement.
    Expr(Expr),
    /// `a = b = value`
    Assign {
        /// Targets, left to right.
        targets: Vec<Target>,
        /// Assigned value.
        value: Expr,
    },
    /// `a += value`
    AugAssign {
        /// Target.
        target: Target,
        /// Operator.
        op: BinOp,
        /// Right-hand side.
        value: Expr,
    },
    /// `if`/`elif`/`else`.
    If {
        /// `(condition, body)` for `if` and each `elif`.
        branches: Vec<(Expr, Vec<Stmt>)>,
        /// `else` body.
        orelse: Vec<Stmt>,
    },
    /// `for target in iter:`
    For {
        /// Loop target.
        target: Target,
        /// Iterated expression.
        iter: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// `while test:`
    While {
        /// Condition.
        test: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `pass`
    Pass,
    /// `return [value]`
    Return(Option<Expr>),
    /// `def`
    FunctionDef(Arc<FunctionDef>),
    /// `try`/`except`/`else`/`finally`.
    Try {
        /// Protected body.
        body: Vec<Stmt>,
        /// Handlers in order.
        handlers: Vec<ExceptHandler>,
        /// `else` body (runs when no exception was raised).
        orelse: Vec<Stmt>,
        /// `finally` body.
        finalbody: Vec<Stmt>,
    },
    /// `raise [exc]`
    Raise(Option<Expr>),
    /// `assert test[, msg]`
    Assert {
        /// Condition.
        test: Expr,
        /// Optional message.
        msg: Option<Expr>,
    },
    /// `global a, b`
    Global(Vec<String>),
}
