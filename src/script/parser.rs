use std::sync::Arc;
use thiserror::Error;

use super::ast::{
    Argument, BinOp, CmpOp, Comprehension, ExceptHandler, Expr, FStringPart, FunctionDef,
    Literal, Param, ParamKind, Stmt, StmtKind, Target, UnaryOp,
};
use super::lexer::{Tok, Token, tokenize, unescape};

/// Syntax error with its source position.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (line {line}, column {col})")]
pub struct ParseError {
    /// Description of the problem.
    pub message: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub col: usize,
}

impl ParseError {
    /// Construct a parse error.
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

type ParseResult<T> = std::result::Result<T, ParseError>;

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not",
    "or", "pass", "raise", "return", "try", "while", "with", "yield", "True", "False", "None",
];

/// Parse a module into its statement list.
pub fn parse_module(source: &str) -> ParseResult<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        function_depth: 0,
        loop_depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.parse_statement()?);
    }
    Ok(body)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    function_depth: usize,
    loop_depth: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // The token stream always ends with `Eof`.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_tok(&self, offset: usize) -> &Tok {
        let idx = (self.index + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn at(&self, tok: &Tok) -> bool {
        &self.current().tok == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(&self.current().tok, Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(&self.current().tok, Tok::Name(n) if n == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.current();
        ParseError::new(message, token.line, token.col)
    }

    fn unexpected(&self) -> ParseError {
        let what = match &self.current().tok {
            Tok::Name(n) => format!("'{n}'"),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) | Tok::Bytes(_) => "string literal".to_string(),
            Tok::Op(op) => format!("'{op}'"),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax: unexpected {what}"))
    }

    fn expect_op(&mut self, op: &str) -> ParseResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}'")))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> ParseResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match &self.current().tok {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                let name = n.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn expect_line_end(&mut self) -> ParseResult<()> {
        if self.eat(&Tok::Newline) || self.at(&Tok::Eof) || self.at(&Tok::Dedent) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    // ----- statements -----

    fn parse_statement(&mut self) -> ParseResult<Vec<Stmt>> {
        let line = self.line();
        let keyword = match &self.current().tok {
            Tok::Name(n) => Some(n.clone()),
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => None,
        };
        let kind = match keyword.as_deref() {
            Some(kw) => match kw {
                "if" => Some(self.parse_if()?),
                "while" => Some(self.parse_while()?),
                "for" => Some(self.parse_for()?),
                "def" => Some(self.parse_def()?),
                "try" => Some(self.parse_try()?),
                "class" => return Err(self.error("class definitions are not supported")),
                "with" => return Err(self.error("'with' statements are not supported")),
                "import" | "from" => return Err(self.error("import statements are not supported")),
                _ => None,
            },
            None => None,
        };
        if let Some(kind) = kind {
            return Ok(vec![Stmt { kind, line }]);
        }
        self.parse_simple_line()
    }

    /// Simple statements separated by `;`, terminated by a newline.
    fn parse_simple_line(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.parse_simple_statement()?;
            stmts.push(Stmt { kind, line });
            if !self.eat_op(";") {
                break;
            }
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
        }
        self.expect_line_end()?;
        Ok(stmts)
    }

    fn parse_simple_statement(&mut self) -> ParseResult<StmtKind> {
        if self.eat_keyword("pass") {
            return Ok(StmtKind::Pass);
        }
        if self.at_keyword("break") || self.at_keyword("continue") {
            if self.loop_depth == 0 {
                return Err(self.error("'break' or 'continue' outside loop"));
            }
            let is_break = self.at_keyword("break");
            self.advance();
            return Ok(if is_break {
                StmtKind::Break
            } else {
                StmtKind::Continue
            });
        }
        if self.at_keyword("return") {
            if self.function_depth == 0 {
                return Err(self.error("'return' outside function"));
            }
            self.advance();
            if self.at_statement_end() {
                return Ok(StmtKind::Return(None));
            }
            return Ok(StmtKind::Return(Some(self.parse_expr_list()?)));
        }
        if self.eat_keyword("raise") {
            if self.at_statement_end() {
                return Ok(StmtKind::Raise(None));
            }
            let exc = self.parse_expr()?;
            if self.eat_keyword("from") {
                // Exception chaining is accepted and ignored.
                self.parse_expr()?;
            }
            return Ok(StmtKind::Raise(Some(exc)));
        }
        if self.eat_keyword("assert") {
            let test = self.parse_expr()?;
            let msg = if self.eat_op(",") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(StmtKind::Assert { test, msg });
        }
        if self.eat_keyword("global") || self.eat_keyword("nonlocal") {
            let mut names = vec![self.expect_name()?];
            while self.eat_op(",") {
                names.push(self.expect_name()?);
            }
            return Ok(StmtKind::Global(names));
        }
        if self.at_keyword("del") || self.at_keyword("yield") || self.at_keyword("import") {
            return Err(self.error(format!(
                "'{}' statements are not supported",
                match &self.current().tok {
                    Tok::Name(n) => n.clone(),
                    _ => String::new(),
                }
            )));
        }

        let first = self.parse_expr_list()?;

        // Annotated assignment: `name: type [= value]`.
        if self.at_op(":") {
            if !matches!(first, Expr::Name(_)) {
                return Err(self.error("only single names can be annotated"));
            }
            self.advance();
            self.parse_expr()?;
            if self.eat_op("=") {
                let value = self.parse_expr_list()?;
                let target = self.to_target(first)?;
                return Ok(StmtKind::Assign {
                    targets: vec![target],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        if let Some(op) = self.aug_assign_op() {
            self.advance();
            let target = self.to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.parse_expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.at_op("=") {
            let mut targets = vec![self.to_target(first)?];
            let mut value;
            loop {
                self.expect_op("=")?;
                value = self.parse_expr_list()?;
                if self.at_op("=") {
                    targets.push(self.to_target(value)?);
                } else {
                    break;
                }
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current().tok,
            Tok::Newline | Tok::Eof | Tok::Dedent | Tok::Op(";")
        )
    }

    fn aug_assign_op(&self) -> Option<BinOp> {
        match &self.current().tok {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        }
    }

    fn to_target(&self, expr: Expr) -> ParseResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|item| self.to_target(item))
                    .collect::<ParseResult<Vec<_>>>()?,
            )),
            Expr::Subscript { value, index } => Ok(Target::Subscript {
                value: *value,
                index: *index,
            }),
            Expr::Attribute { .. } => Err(self.error("attribute assignment is not supported")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            // Single-line suite: `if x: y = 1`
            return self.parse_simple_line();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let test = self.parse_named_expr()?;
        let body = self.parse_block()?;
        branches.push((test, body));
        let mut orelse = Vec::new();
        loop {
            if self.eat_keyword("elif") {
                let test = self.parse_named_expr()?;
                let body = self.parse_block()?;
                branches.push((test, body));
            } else if self.eat_keyword("else") {
                orelse = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn parse_while(&mut self) -> ParseResult<StmtKind> {
        self.expect_keyword("while")?;
        let test = self.parse_named_expr()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Ok(StmtKind::While { test, body: body? })
    }

    fn parse_for(&mut self) -> ParseResult<StmtKind> {
        self.expect_keyword("for")?;
        let target = self.parse_target_list()?;
        self.expect_keyword("in")?;
        let iter = self.parse_expr_list()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Ok(StmtKind::For {
            target,
            iter,
            body: body?,
        })
    }

    /// Loop targets stop before `in`, so they are parsed at the arithmetic level.
    fn parse_target_list(&mut self) -> ParseResult<Target> {
        let mut items = vec![self.parse_arith()?];
        let mut trailing = false;
        while self.eat_op(",") {
            if self.at_keyword("in") {
                trailing = true;
                break;
            }
            items.push(self.parse_arith()?);
        }
        let expr = if items.len() == 1 && !trailing {
            items.remove(0)
        } else {
            Expr::Tuple(items)
        };
        self.to_target(expr)
    }

    fn parse_def(&mut self) -> ParseResult<StmtKind> {
        self.expect_keyword("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parse_params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.parse_expr()?;
        }
        let saved_loops = self.loop_depth;
        self.loop_depth = 0;
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        Ok(StmtKind::FunctionDef(Arc::new(FunctionDef {
            name,
            params,
            body: body?,
        })))
    }

    fn parse_params(&mut self, closing: &str) -> ParseResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        let mut seen_default = false;
        while !self.at_op(closing) {
            let kind = if self.eat_op("**") {
                ParamKind::KwArgs
            } else if self.eat_op("*") {
                ParamKind::VarArgs
            } else {
                ParamKind::Normal
            };
            let name = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!(
                    "duplicate argument '{name}' in function definition"
                )));
            }
            // Annotations are only allowed in `def`, where the closing token is ')'.
            if closing == ")" && self.eat_op(":") {
                self.parse_expr()?;
            }
            let default = if kind == ParamKind::Normal && self.eat_op("=") {
                seen_default = true;
                Some(self.parse_expr()?)
            } else {
                if kind == ParamKind::Normal && seen_default {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param {
                name,
                default,
                kind,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn parse_try(&mut self) -> ParseResult<StmtKind> {
        self.expect_keyword("try")?;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.eat_keyword("except") {
            let (exc_type, name) = if self.at_op(":") {
                (None, None)
            } else {
                let exc_type = self.parse_expr()?;
                let name = if self.eat_keyword("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(exc_type), name)
            };
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                exc_type,
                name,
                body,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_keyword("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_keyword("finally") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    // ----- expressions -----

    /// Comma-separated expressions; more than one (or a trailing comma) builds a tuple.
    fn parse_expr_list(&mut self) -> ParseResult<Expr> {
        let first = self.parse_expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_statement_end() || self.at_op("=") || self.at_op(")") {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// `if`/`while` conditions allow (and ignore the binding of) nothing extra.
    fn parse_named_expr(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_expr()?;
        if self.at_op(":=") {
            return Err(self.error("assignment expressions are not supported"));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword("lambda") {
            let params = self.parse_params(":")?;
            self.expect_op(":")?;
            let line = self.line();
            self.function_depth += 1;
            let body = self.parse_expr();
            self.function_depth -= 1;
            return Ok(Expr::Lambda(Arc::new(FunctionDef {
                name: "<lambda>".to_string(),
                params,
                body: vec![Stmt {
                    kind: StmtKind::Return(Some(body?)),
                    line,
                }],
            })));
        }
        let body = self.parse_or()?;
        if self.at_keyword("if") {
            // Don't swallow the `if` of a comprehension clause.
            let save = self.index;
            self.advance();
            let test = self.parse_or()?;
            if self.eat_keyword("else") {
                let orelse = self.parse_expr()?;
                return Ok(Expr::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                });
            }
            self.index = save;
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let next_is =
            |parser: &Self, kw: &str| matches!(parser.peek_tok(1), Tok::Name(m) if m == kw);
        let (op, width) = match &self.current().tok {
            Tok::Op("==") => (CmpOp::Eq, 1),
            Tok::Op("!=") => (CmpOp::NotEq, 1),
            Tok::Op("<") => (CmpOp::Lt, 1),
            Tok::Op("<=") => (CmpOp::LtE, 1),
            Tok::Op(">") => (CmpOp::Gt, 1),
            Tok::Op(">=") => (CmpOp::GtE, 1),
            Tok::Name(n) if n == "in" => (CmpOp::In, 1),
            Tok::Name(n) if n == "not" && next_is(self, "in") => (CmpOp::NotIn, 2),
            Tok::Name(n) if n == "is" && next_is(self, "not") => (CmpOp::IsNot, 2),
            Tok::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        };
        for _ in 0..width {
            self.advance();
        }
        Some(op)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.parse_arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn parse_arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.at_op("+") {
                BinOp::Add
            } else if self.at_op("-") {
                BinOp::Sub
            } else if self.at_op("|") || self.at_op("&") || self.at_op("^") {
                return Err(self.error("bitwise operators are not supported"));
            } else {
                break;
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match &self.current().tok {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> ParseResult<Expr> {
        let op = if self.at_op("-") {
            Some(UnaryOp::Neg)
        } else if self.at_op("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_factor()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_primary()?;
        if self.eat_op("**") {
            let exponent = self.parse_factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.at_op("(") {
                let line = self.line();
                self.advance();
                let args = self.parse_call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    line,
                };
            } else if self.eat_op("[") {
                let index = self.parse_subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                let attr = match &self.current().tok {
                    Tok::Name(n) => n.clone(),
                    _ => return Err(self.error("expected attribute name")),
                };
                self.advance();
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self) -> ParseResult<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            let expr = self.parse_expr_list_until("]")?;
            if !self.at_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;
        let upper = if self.at_op(":") || self.at_op("]") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.eat_op(":") && !self.at_op("]") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_expr_list_until(&mut self, closing: &str) -> ParseResult<Expr> {
        let first = self.parse_expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(closing) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Argument>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        while !self.at_op(")") {
            if self.eat_op("**") {
                args.push(Argument::DoubleStar(self.parse_expr()?));
                seen_keyword = true;
            } else if self.eat_op("*") {
                args.push(Argument::Star(self.parse_expr()?));
            } else if matches!(&self.current().tok, Tok::Name(n) if !KEYWORDS.contains(&n.as_str()))
                && matches!(self.peek_tok(1), Tok::Op("="))
            {
                let name = self.expect_name()?;
                self.advance();
                if args
                    .iter()
                    .any(|a| matches!(a, Argument::Keyword(k, _) if *k == name))
                {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                args.push(Argument::Keyword(name, self.parse_expr()?));
                seen_keyword = true;
            } else {
                if seen_keyword {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let expr = self.parse_expr()?;
                if self.at_keyword("for") {
                    // Generator expression as the sole argument.
                    let clauses = self.parse_comprehension_clauses()?;
                    args.push(Argument::Positional(Expr::ListComp {
                        element: Box::new(expr),
                        clauses,
                    }));
                } else {
                    args.push(Argument::Positional(expr));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn parse_comprehension_clauses(&mut self) -> ParseResult<Vec<Comprehension>> {
        let mut clauses = Vec::new();
        while self.eat_keyword("for") {
            let target = self.parse_target_list()?;
            self.expect_keyword("in")?;
            let iter = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat_keyword("if") {
                conditions.push(self.parse_or()?);
            }
            clauses.push(Comprehension {
                target,
                iter,
                conditions,
            });
        }
        Ok(clauses)
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        match token.tok {
            Tok::Int(i) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(i)))
            }
            Tok::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.parse_strings(),
            Tok::Bytes(_) => {
                let mut bytes = Vec::new();
                while let Tok::Bytes(b) = self.current().tok.clone() {
                    bytes.extend(b);
                    self.advance();
                }
                Ok(Expr::Literal(Literal::Bytes(bytes)))
            }
            Tok::Name(name) => match name.as_str() {
                "True" => {
                    self.advance();
                    Ok(Expr::Literal(Literal::Bool(true)))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::Literal(Literal::Bool(false)))
                }
                "None" => {
                    self.advance();
                    Ok(Expr::Literal(Literal::None))
                }
                n if KEYWORDS.contains(&n) => Err(self.unexpected()),
                _ => {
                    self.advance();
                    Ok(Expr::Name(name))
                }
            },
            Tok::Op("(") => {
                self.advance();
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.at_keyword("for") {
                    let clauses = self.parse_comprehension_clauses()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clauses,
                    });
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.advance();
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.at_keyword("for") {
                    let clauses = self.parse_comprehension_clauses()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clauses,
                    });
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.advance();
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                if self.eat_op("**") {
                    return Err(self.error("dict unpacking in literals is not supported"));
                }
                let key = self.parse_expr()?;
                if !self.eat_op(":") {
                    return Err(self.error("set literals are not supported"));
                }
                let value = self.parse_expr()?;
                if self.at_keyword("for") {
                    let clauses = self.parse_comprehension_clauses()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp {
                        key: Box::new(key),
                        value: Box::new(value),
                        clauses,
                    });
                }
                let mut items = vec![(key, value)];
                while self.eat_op(",") {
                    if self.at_op("}") {
                        break;
                    }
                    let key = self.parse_expr()?;
                    self.expect_op(":")?;
                    let value = self.parse_expr()?;
                    items.push((key, value));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(items))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent string literals (plain and f-strings) concatenate.
    fn parse_strings(&mut self) -> ParseResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut has_fstring = false;
        loop {
            let token = self.current().clone();
            match token.tok {
                Tok::Str(s) => {
                    self.advance();
                    parts.push(FStringPart::Literal(s));
                }
                Tok::FStr(body) => {
                    self.advance();
                    has_fstring = true;
                    parts.extend(parse_fstring(&body, token.line, token.col)?);
                }
                _ => break,
            }
        }
        if !has_fstring {
            let text: String = parts
                .into_iter()
                .map(|p| match p {
                    FStringPart::Literal(s) => s,
                    FStringPart::Field { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Literal(Literal::Str(text)));
        }
        Ok(Expr::FString(parts))
    }
}

/// Split an f-string body into literal text and replacement fields.
fn parse_fstring(body: &str, line: usize, col: usize) -> ParseResult<Vec<FStringPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    let flush = |literal: &mut String, parts: &mut Vec<FStringPart>| -> ParseResult<()> {
        if !literal.is_empty() {
            let text = unescape(literal).map_err(|msg| ParseError::new(msg, line, col))?;
            parts.push(FStringPart::Literal(text));
            literal.clear();
        }
        Ok(())
    };

    while i < chars.len() {
        let ch = chars[i];
        if ch == '{' {
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            flush(&mut literal, &mut parts)?;
            // Find the matching close brace, respecting nesting and quotes.
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            let start = i + 1;
            let mut j = start;
            let mut split: Option<usize> = None;
            let mut conversion_at: Option<usize> = None;
            while j < chars.len() {
                let c = chars[j];
                if let Some(q) = quote {
                    if c == q {
                        quote = None;
                    }
                } else {
                    match c {
                        '\'' | '"' => quote = Some(c),
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' => depth = depth.saturating_sub(1),
                        '}' if depth == 0 => break,
                        '}' => depth -= 1,
                        ':' if depth == 0 && split.is_none() => split = Some(j),
                        '!' if depth == 0
                            && split.is_none()
                            && chars.get(j + 1) != Some(&'=')
                            && conversion_at.is_none() =>
                        {
                            conversion_at = Some(j)
                        }
                        _ => {}
                    }
                }
                j += 1;
            }
            if j >= chars.len() {
                return Err(ParseError::new("f-string: expecting '}'", line, col));
            }
            let expr_end = conversion_at.or(split).unwrap_or(j);
            let expr_text: String = chars[start..expr_end].iter().collect();
            if expr_text.trim().is_empty() {
                return Err(ParseError::new(
                    "f-string: empty expression not allowed",
                    line,
                    col,
                ));
            }
            let conversion = conversion_at.and_then(|at| chars.get(at + 1).copied());
            let spec = split.map(|at| chars[at + 1..j].iter().collect::<String>());
            let expr = parse_embedded_expr(&expr_text, line, col)?;
            parts.push(FStringPart::Field {
                expr,
                conversion,
                spec,
            });
            i = j + 1;
            continue;
        }
        if ch == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(ParseError::new("f-string: single '}' is not allowed", line, col));
        }
        literal.push(ch);
        i += 1;
    }
    flush(&mut literal, &mut parts)?;
    Ok(parts)
}

fn parse_embedded_expr(text: &str, line: usize, col: usize) -> ParseResult<Expr> {
    let tokens = tokenize(text.trim()).map_err(|e| ParseError::new(e.message, line, col))?;
    let mut parser = Parser {
        tokens,
        index: 0,
        function_depth: 0,
        loop_depth: 0,
    };
    let expr = parser
        .parse_expr_list()
        .map_err(|e| ParseError::new(format!("f-string: {}", e.message), line, col))?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(ParseError::new("f-string: invalid syntax", line, col));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_expr(src: &str) -> Expr {
        let body = parse_module(src).expect("parse");
        match &body[0].kind {
            StmtKind::Expr(e) => e.clone(),
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let expr = single_expr("1 + 2 * 3");
        match expr {
            Expr::Binary { op: BinOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_calls_with_keywords() {
        let expr = single_expr("echo('hi', text='x', **extra)");
        match expr {
            Expr::Call { args, .. } => {
                assert_eq!(args.len(), 3);
                assert!(matches!(&args[1], Argument::Keyword(k, _) if k == "text"));
                assert!(matches!(&args[2], Argument::DoubleStar(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_compound_statements() {
        let src = "\
def f(a, b=2):
    if a:
        return a
    else:
        return b
for i in range(3):
    pass
try:
    f(1)
except ValueError as e:
    pass
finally:
    pass
";
        let body = parse_module(src).expect("parse");
        assert_eq!(body.len(), 3);
        assert!(matches!(body[0].kind, StmtKind::FunctionDef(_)));
        assert!(matches!(body[1].kind, StmtKind::For { .. }));
        assert!(matches!(body[2].kind, StmtKind::Try { .. }));
        assert_eq!(body[2].line, 8);
    }

    #[test]
    fn parses_fstrings_with_specs() {
        let expr = single_expr("f'{name!r} costs {price:.2f} {{literal}}'");
        match expr {
            Expr::FString(parts) => {
                assert_eq!(parts.len(), 5);
                assert!(matches!(&parts[0], FStringPart::Field { conversion: Some('r'), .. }));
                assert!(matches!(
                    &parts[2],
                    FStringPart::Field { spec: Some(s), .. } if s == ".2f"
                ));
                assert!(matches!(&parts[4], FStringPart::Literal(s) if s == " {literal}"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_comprehensions_and_conditionals() {
        let expr = single_expr("[x * 2 for x in items if x > 1]");
        assert!(matches!(expr, Expr::ListComp { .. }));
        let expr = single_expr("a if b else c");
        assert!(matches!(expr, Expr::IfExp { .. }));
        let expr = single_expr("sum(x for x in y)");
        assert!(matches!(expr, Expr::Call { .. }));
    }

    #[test]
    fn rejects_return_outside_function() {
        let err = parse_module("x = 1\nreturn x\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("outside function"));
    }

    #[test]
    fn reports_line_of_syntax_error() {
        let err = parse_module("x = 1\ny = (2 +\n").unwrap_err();
        assert!(err.line >= 2, "line was {}", err.line);
        let err = parse_module("a = 1\nb = = 2\n").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
