//! Tree-walking evaluator.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use super::ast::{
    Argument, Comprehension, ExceptHandler, Expr, FStringPart, FunctionDef, Literal, ParamKind,
    Stmt, StmtKind, Target,
};
use super::builtins;
use super::exception::{ExcType, ScriptException};
use super::format::format_value;
use super::ops;
use super::run::{ExternalCaller, ExternalResult, PrintWriter};
use super::value::{Closure, Number, Scope, Value, as_number, check_len};

/// Non-local exit from evaluation.
pub enum Unwind {
    /// Script-visible exception.
    Raise(Box<Raised>),
    /// Execution deadline passed.
    Timeout,
    /// The host stopped answering external calls.
    Abandoned,
}

/// A raised exception and the frames it passed through.
pub struct Raised {
    pub exc: ScriptException,
    /// `(function, line)` from outermost to innermost, captured at the raise site.
    pub trace: Option<Vec<(String, usize)>>,
}

impl From<ScriptException> for Unwind {
    fn from(exc: ScriptException) -> Self {
        Unwind::Raise(Box::new(Raised { exc, trace: None }))
    }
}

pub type Eval<T> = Result<T, Unwind>;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    name: String,
    line: usize,
}

pub struct Interpreter<'a> {
    scope: Rc<Scope>,
    globals: Rc<Scope>,
    externals: &'a HashSet<String>,
    caller: &'a mut dyn ExternalCaller,
    printer: &'a mut dyn PrintWriter,
    deadline: Option<Instant>,
    max_depth: usize,
    frames: Vec<Frame>,
    handling: Vec<Rc<ScriptException>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        externals: &'a HashSet<String>,
        caller: &'a mut dyn ExternalCaller,
        printer: &'a mut dyn PrintWriter,
        deadline: Option<Instant>,
        max_depth: usize,
    ) -> Self {
        let globals = Scope::module();
        Self {
            scope: globals.clone(),
            globals,
            externals,
            caller,
            printer,
            deadline,
            max_depth,
            frames: Vec::new(),
            handling: Vec::new(),
        }
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals.assign(name, value);
    }

    /// Execute a module. The value of a trailing expression statement is the result.
    pub fn run_module(&mut self, body: &[Stmt]) -> Eval<Value> {
        self.frames.push(Frame {
            name: "<module>".to_string(),
            line: 0,
        });
        let result = self.run_module_body(body);
        self.frames.pop();
        self.globals.clear();
        result
    }

    fn run_module_body(&mut self, body: &[Stmt]) -> Eval<Value> {
        let Some((last, init)) = body.split_last() else {
            return Ok(Value::None);
        };
        self.exec_block(init)?;
        if let StmtKind::Expr(expr) = &last.kind {
            self.tick(last)?;
            return self.eval(expr).map_err(|u| self.attach_trace(u));
        }
        self.exec_block(std::slice::from_ref(last))?;
        Ok(Value::None)
    }

    pub fn write_output(&mut self, text: &str) {
        self.printer.write(text);
    }

    pub fn check_deadline(&self) -> Eval<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Unwind::Timeout),
            _ => Ok(()),
        }
    }

    fn tick(&mut self, stmt: &Stmt) -> Eval<()> {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = stmt.line;
        }
        self.check_deadline()
    }

    fn attach_trace(&self, unwind: Unwind) -> Unwind {
        match unwind {
            Unwind::Raise(mut raised) if raised.trace.is_none() => {
                raised.trace = Some(
                    self.frames
                        .iter()
                        .map(|f| (f.name.clone(), f.line))
                        .collect(),
                );
                Unwind::Raise(raised)
            }
            other => other,
        }
    }

    // ----- statements -----

    fn exec_block(&mut self, body: &[Stmt]) -> Eval<Flow> {
        for stmt in body {
            self.tick(stmt)?;
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(unwind) => return Err(self.attach_trace(unwind)),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => match target {
                Target::Name(name) => {
                    let current = self.lookup(name)?;
                    let rhs = self.eval(value)?;
                    let updated = ops::inplace(*op, &current, &rhs)?;
                    self.scope.assign(name, updated);
                }
                Target::Subscript { value: container, index } => {
                    let container = self.eval(container)?;
                    let index = self.eval(index)?;
                    let current = ops::get_item(&container, &index)?;
                    let rhs = self.eval(value)?;
                    let updated = ops::inplace(*op, &current, &rhs)?;
                    ops::set_item(&container, &index, updated)?;
                }
                Target::Tuple(_) => {
                    return Err(ScriptException::type_error(
                        "illegal expression for augmented assignment",
                    )
                    .into());
                }
            },
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in ops::iterate(&iterable)? {
                    self.check_deadline()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::While { test, body } => loop {
                self.check_deadline()?;
                if !self.eval(test)?.truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.scope.assign(&def.name, function);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Raise(exc) => {
                let exc = match exc {
                    Some(expr) => {
                        let value = self.eval(expr)?;
                        exception_from_value(&value)?
                    }
                    None => match self.handling.last() {
                        Some(active) => (**active).clone(),
                        None => ScriptException::runtime_error("No active exception to reraise"),
                    },
                };
                return Err(exc.into());
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(expr) => self.eval(expr)?.to_str(),
                        None => String::new(),
                    };
                    return Err(ScriptException::new(ExcType::AssertionError, message).into());
                }
            }
            StmtKind::Global(names) => {
                for name in names {
                    self.scope.declare_outer(name);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Eval<Flow> {
        let outcome = match self.exec_block(body) {
            Err(Unwind::Raise(raised)) => {
                let exc = Rc::new(raised.exc.clone());
                let mut handled = None;
                for handler in handlers {
                    let matches = match &handler.exc_type {
                        None => true,
                        Some(expr) => {
                            let class = self.eval(expr)?;
                            handler_matches(&class, exc.exc_type)?
                        }
                    };
                    if matches {
                        if let Some(name) = &handler.name {
                            self.scope.assign(name, Value::Exception(exc.clone()));
                        }
                        self.handling.push(exc.clone());
                        let result = self.exec_block(&handler.body);
                        self.handling.pop();
                        handled = Some(result);
                        break;
                    }
                }
                handled.unwrap_or(Err(Unwind::Raise(raised)))
            }
            Ok(Flow::Normal) => self.exec_block(orelse),
            other => other,
        };
        if finalbody.is_empty() || matches!(outcome, Err(Unwind::Timeout | Unwind::Abandoned)) {
            return outcome;
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Eval<()> {
        match target {
            Target::Name(name) => {
                self.scope.assign(name, value);
                Ok(())
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                ops::set_item(&container, &index, value)?;
                Ok(())
            }
            Target::Tuple(targets) => {
                let items: Vec<Value> = ops::materialize(&value)?;
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(ScriptException::value_error(message).into());
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn lookup(&self, name: &str) -> Eval<Value> {
        if let Some(value) = self.scope.lookup(name) {
            return Ok(value);
        }
        if let Some(builtin) = builtins::lookup(name) {
            return Ok(builtin);
        }
        if let Some(exc_type) = ExcType::from_name(name) {
            return Ok(Value::ExcClass(exc_type));
        }
        if self.externals.contains(name) {
            return Ok(Value::External(Rc::from(name)));
        }
        Err(ScriptException::name_error(name).into())
    }

    fn make_function(&mut self, def: &Arc<FunctionDef>) -> Eval<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            defaults,
            scope: self.scope.clone(),
        })))
    }

    // ----- expressions -----

    pub fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::str(s),
                Literal::Bytes(b) => Value::Bytes(Rc::from(b.as_slice())),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut evaluated = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    evaluated.push((self.eval(k)?, self.eval(v)?));
                }
                Ok(Value::dict_from_pairs(evaluated)?)
            }
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field {
                            expr,
                            conversion,
                            spec,
                        } => {
                            let value = self.eval(expr)?;
                            let value = match conversion {
                                Some('r') => Value::str(&value.repr()),
                                Some('s') => Value::str(&value.to_str()),
                                _ => value,
                            };
                            out.push_str(&format_value(&value, spec.as_deref().unwrap_or(""))?);
                        }
                    }
                }
                Ok(Value::str(&out))
            }
            Expr::Attribute { value, attr } => {
                let receiver = self.eval(value)?;
                Ok(builtins::get_attribute(&receiver, attr)?)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                if let Expr::Slice { lower, upper, step } = &**index {
                    let lower = self.eval_slice_bound(lower.as_deref())?;
                    let upper = self.eval_slice_bound(upper.as_deref())?;
                    let step = self.eval_slice_bound(step.as_deref())?;
                    return Ok(ops::get_slice(&container, lower, upper, step)?);
                }
                let index = self.eval(index)?;
                Ok(ops::get_item(&container, &index)?)
            }
            Expr::Slice { .. } => {
                Err(ScriptException::type_error("slice outside of a subscript").into())
            }
            Expr::Call { func, args, .. } => {
                let callee = self.eval(func)?;
                let (positional, keywords) = self.eval_args(args)?;
                self.call_value(&callee, positional, keywords)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(ops::unary(*op, &value)?)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                Ok(ops::binary(*op, &l, &r)?)
            }
            Expr::And(left, right) => {
                let l = self.eval(left)?;
                if !l.truthy() {
                    return Ok(l);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let l = self.eval(left)?;
                if l.truthy() {
                    return Ok(l);
                }
                self.eval(right)
            }
            Expr::Compare { left, rest } => {
                let mut l = self.eval(left)?;
                for (op, right) in rest {
                    let r = self.eval(right)?;
                    if !ops::compare(*op, &l, &r)? {
                        return Ok(Value::Bool(false));
                    }
                    l = r;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::ListComp { element, clauses } => {
                let mut out = Vec::new();
                self.with_comprehension_scope(|interp| {
                    interp.comprehend(clauses, &mut |interp: &mut Self| {
                        check_len(out.len() + 1, "list")?;
                        out.push(interp.eval(element)?);
                        Ok(())
                    })
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp {
                key,
                value,
                clauses,
            } => {
                let mut pairs = Vec::new();
                self.with_comprehension_scope(|interp| {
                    interp.comprehend(clauses, &mut |interp: &mut Self| {
                        let k = interp.eval(key)?;
                        let v = interp.eval(value)?;
                        check_len(pairs.len() + 1, "dict")?;
                        pairs.push((k, v));
                        Ok(())
                    })
                })?;
                Ok(Value::dict_from_pairs(pairs)?)
            }
            Expr::Lambda(def) => self.make_function(def),
        }
    }

    fn eval_all(&mut self, items: &[Expr]) -> Eval<Vec<Value>> {
        items.iter().map(|item| self.eval(item)).collect()
    }

    fn eval_slice_bound(&mut self, expr: Option<&Expr>) -> Eval<Option<i64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            value => match as_number(&value) {
                Some(Number::Int(i)) => Ok(Some(i)),
                _ => Err(ScriptException::type_error(
                    "slice indices must be integers or None",
                )
                .into()),
            },
        }
    }

    fn eval_args(&mut self, args: &[Argument]) -> Eval<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::new();
        let mut keywords: Vec<(String, Value)> = Vec::new();
        for arg in args {
            match arg {
                Argument::Positional(expr) => positional.push(self.eval(expr)?),
                Argument::Keyword(name, expr) => keywords.push((name.clone(), self.eval(expr)?)),
                Argument::Star(expr) => {
                    let value = self.eval(expr)?;
                    positional.extend(ops::materialize(&value)?);
                }
                Argument::DoubleStar(expr) => match self.eval(expr)? {
                    Value::Dict(map) => {
                        for (key, value) in map.borrow().values() {
                            let Value::Str(name) = key else {
                                return Err(
                                    ScriptException::type_error("keywords must be strings").into()
                                );
                            };
                            if keywords.iter().any(|(k, _)| k.as_str() == &**name) {
                                return Err(ScriptException::type_error(format!(
                                    "got multiple values for keyword argument '{name}'"
                                ))
                                .into());
                            }
                            keywords.push((name.to_string(), value.clone()));
                        }
                    }
                    other => {
                        return Err(ScriptException::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        ))
                        .into());
                    }
                },
            }
        }
        Ok((positional, keywords))
    }

    fn with_comprehension_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> Eval<T>) -> Eval<T> {
        let inner = Scope::child(&self.scope);
        let saved = std::mem::replace(&mut self.scope, inner);
        let result = f(self);
        self.scope = saved;
        result
    }

    fn comprehend(
        &mut self,
        clauses: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Eval<()>,
    ) -> Eval<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&clause.iter)?;
        'items: for item in ops::iterate(&iterable)? {
            self.check_deadline()?;
            self.assign(&clause.target, item)?;
            for condition in &clause.conditions {
                if !self.eval(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, emit)?;
        }
        Ok(())
    }

    // ----- calls -----

    /// Call any callable value.
    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        match callee {
            Value::Function(closure) => self.call_function(closure.clone(), args, kwargs),
            Value::Builtin(name) => builtins::call_builtin(self, name, args, kwargs),
            Value::Method(receiver, name) => {
                builtins::call_method(self, receiver, name, args, kwargs)
            }
            Value::External(name) => self.call_external(name, args, kwargs),
            Value::ExcClass(exc_type) => {
                if !kwargs.is_empty() {
                    return Err(ScriptException::type_error(format!(
                        "{exc_type}() takes no keyword arguments"
                    ))
                    .into());
                }
                let message = match args.as_slice() {
                    [] => String::new(),
                    [single] => single.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::exception(ScriptException::new(*exc_type, message)))
            }
            other => Err(ScriptException::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))
            .into()),
        }
    }

    fn call_function(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if self.frames.len() > self.max_depth {
            return Err(ScriptException::new(
                ExcType::RecursionError,
                "maximum recursion depth exceeded",
            )
            .into());
        }
        let scope = Scope::child(&closure.scope);
        bind_params(&closure, args, kwargs, &scope)?;
        self.frames.push(Frame {
            name: closure.def.name.clone(),
            line: closure.def.body.first().map_or(0, |s| s.line),
        });
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = self.exec_block(&closure.def.body);
        self.scope = saved;
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn call_external(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let args = args.iter().map(Value::to_object).collect();
        let kwargs = kwargs
            .into_iter()
            .map(|(k, v)| (k, v.to_object()))
            .collect();
        match self.caller.call_external(name, args, kwargs) {
            Some(ExternalResult::Return(obj)) => Ok(Value::from_object(&obj)),
            Some(ExternalResult::Raise(exc)) => Err(exc.into()),
            None => Err(Unwind::Abandoned),
        }
    }
}

fn bind_params(
    closure: &Closure,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
    scope: &Rc<Scope>,
) -> Result<(), ScriptException> {
    let def = &closure.def;
    let name = &def.name;
    let normal: Vec<usize> = def
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.kind == ParamKind::Normal)
        .map(|(i, _)| i)
        .collect();
    let var_args = def.params.iter().find(|p| p.kind == ParamKind::VarArgs);
    let kw_args = def.params.iter().find(|p| p.kind == ParamKind::KwArgs);

    let mut args = args.into_iter();
    let mut bound: HashSet<&str> = HashSet::new();
    for &index in &normal {
        let param = &def.params[index];
        if let Some(value) = args.next() {
            scope.assign(&param.name, value);
            bound.insert(param.name.as_str());
        }
    }
    let extra: Vec<Value> = args.collect();
    match var_args {
        Some(param) => scope.assign(&param.name, Value::tuple(extra)),
        None if !extra.is_empty() => {
            return Err(ScriptException::type_error(format!(
                "{name}() takes {} positional argument{} but {} were given",
                normal.len(),
                if normal.len() == 1 { "" } else { "s" },
                normal.len() + extra.len()
            )));
        }
        None => {}
    }

    let mut leftover = Vec::new();
    for (key, value) in kwargs.drain(..) {
        match normal.iter().find(|&&i| def.params[i].name == key) {
            Some(&index) => {
                let param = &def.params[index];
                if bound.contains(param.name.as_str()) {
                    return Err(ScriptException::type_error(format!(
                        "{name}() got multiple values for argument '{key}'"
                    )));
                }
                scope.assign(&param.name, value);
                bound.insert(param.name.as_str());
            }
            None => leftover.push((key, value)),
        }
    }
    match kw_args {
        Some(param) => {
            let pairs = leftover.into_iter().map(|(k, v)| (Value::str(&k), v));
            scope.assign(&param.name, Value::dict_from_pairs(pairs)?);
        }
        None => {
            if let Some((key, _)) = leftover.first() {
                return Err(ScriptException::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
        }
    }

    let mut missing = Vec::new();
    for &index in &normal {
        let param = &def.params[index];
        if bound.contains(param.name.as_str()) {
            continue;
        }
        match &closure.defaults[index] {
            Some(default) => scope.assign(&param.name, default.clone()),
            None => missing.push(format!("'{}'", param.name)),
        }
    }
    if !missing.is_empty() {
        return Err(ScriptException::type_error(format!(
            "{name}() missing {} required positional argument{}: {}",
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            missing.join(" and ")
        )));
    }
    Ok(())
}

fn handler_matches(class: &Value, raised: ExcType) -> Result<bool, ScriptException> {
    match class {
        Value::ExcClass(handler) => Ok(raised.is_subclass_of(*handler)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if handler_matches(class, raised)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ScriptException::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

fn exception_from_value(value: &Value) -> Result<ScriptException, ScriptException> {
    match value {
        Value::ExcClass(exc_type) => Ok(ScriptException::new(*exc_type, "")),
        Value::Exception(exc) => Ok((**exc).clone()),
        _ => Err(ScriptException::type_error(
            "exceptions must derive from BaseException",
        )),
    }
}
