use crate::script::ast::*;
use crate::script::builtins::{self, MAX_ARRAY_LENGTH, MAX_STRING_LENGTH};
use crate::script::value::*;
use crate::script::{HostBridge, HostError, HostGlobal, Limits, ScriptError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

struct Binding {
    value: Value,
    mutable: bool,
    initialized: bool,
}

/// One lexical environment.
pub struct Scope {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
}

enum Lookup {
    Found(Value),
    Uninitialized,
    Missing,
}

enum Assignment {
    Done,
    Immutable,
    Uninitialized,
    Missing,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn child(self: &Rc<Self>) -> Rc<Self> {
        Self::new(Some(self.clone()))
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.bindings.borrow_mut().insert(
            name.to_string(),
            Binding {
                value,
                mutable,
                initialized: true,
            },
        );
    }

    fn declare_uninitialized(&self, name: &str, mutable: bool) {
        self.bindings.borrow_mut().insert(
            name.to_string(),
            Binding {
                value: Value::Undefined,
                mutable,
                initialized: false,
            },
        );
    }

    fn has_own(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    fn lookup(&self, name: &str) -> Lookup {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.bindings.borrow().get(name) {
                return if binding.initialized {
                    Lookup::Found(binding.value.clone())
                } else {
                    Lookup::Uninitialized
                };
            }
            match &scope.parent {
                Some(parent) => scope = parent,
                None => return Lookup::Missing,
            }
        }
    }

    fn assign(&self, name: &str, value: Value) -> Assignment {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.bindings.borrow_mut().get_mut(name) {
                if !binding.initialized {
                    return Assignment::Uninitialized;
                }
                if !binding.mutable {
                    return Assignment::Immutable;
                }
                binding.value = value;
                return Assignment::Done;
            }
            match &scope.parent {
                Some(parent) => scope = parent,
                None => return Assignment::Missing,
            }
        }
    }
}

pub(crate) enum Interrupt {
    Throw(Value),
    Timeout,
    /// A nullish link in an optional chain; the enclosing chain evaluates to `undefined`.
    ShortCircuit,
}

pub(crate) type Eval<T> = Result<T, Interrupt>;

enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Clone, Copy)]
enum BindMode {
    Declare(DeclKind),
    Assign,
}

enum Reference {
    Name(String),
    Member(Value, String),
}

pub struct Interpreter<'h> {
    pub(crate) host: &'h mut dyn HostBridge,
    script_scope: Rc<Scope>,
    deadline: Instant,
    limit_ms: u64,
    max_call_depth: usize,
    depth: usize,
    ticks: u32,
    current_line: usize,
    throw_line: Option<usize>,
    captured_scopes: Vec<Weak<Scope>>,
    prune_at: usize,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn HostBridge, limits: &Limits) -> Self {
        let globals = Scope::new(None);
        builtins::install_globals(&globals);
        for global in host.globals() {
            match global {
                HostGlobal::Function(name) => {
                    globals.declare(name, Value::native(Builtin::Host(Rc::from(name)), Value::Undefined), true)
                }
                HostGlobal::Class(name) => {
                    globals.declare(name, Value::native(Builtin::HostClass(name), Value::Undefined), true)
                }
            }
        }
        let script_scope = globals.child();

        Self {
            host,
            script_scope,
            deadline: Instant::now() + limits.timeout,
            limit_ms: limits.timeout.as_millis() as u64,
            max_call_depth: limits.max_call_depth,
            depth: 0,
            ticks: 0,
            current_line: 1,
            throw_line: None,
            captured_scopes: Vec::new(),
            prune_at: 4096,
        }
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<(), ScriptError> {
        let scope = self.script_scope.clone();
        self.hoist_vars(program, &scope);
        self.hoist_block(program, &scope);

        match self.exec_statements(program, &scope) {
            Ok(_) | Err(Interrupt::ShortCircuit) => Ok(()),
            Err(Interrupt::Timeout) => Err(ScriptError::Timeout {
                limit_ms: self.limit_ms,
            }),
            Err(Interrupt::Throw(thrown)) => Err(ScriptError::Uncaught {
                message: thrown.to_js_string(),
                line: self.throw_line,
            }),
        }
    }

    pub(crate) fn tick(&mut self) -> Eval<()> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % 64 == 0 && Instant::now() >= self.deadline {
            return Err(Interrupt::Timeout);
        }
        Ok(())
    }

    pub(crate) fn throw_error<T>(&mut self, kind: ErrorKind, message: impl AsRef<str>) -> Eval<T> {
        self.throw_line = Some(self.current_line);
        Err(Interrupt::Throw(Value::error(kind, message.as_ref())))
    }

    pub(crate) fn host_error(&mut self, error: HostError) -> Interrupt {
        self.throw_line = Some(self.current_line);
        Interrupt::Throw(Value::error(error.kind, &error.message))
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Value {
        if self.captured_scopes.len() >= self.prune_at {
            self.captured_scopes.retain(|weak| weak.strong_count() > 0);
            self.prune_at = (self.captured_scopes.len() * 2).max(4096);
        }
        self.captured_scopes.push(Rc::downgrade(scope));
        Value::Function(Rc::new(Closure {
            def: def.clone(),
            scope: scope.clone(),
        }))
    }

    // ---- declarations --------------------------------------------------

    fn hoist_vars(&mut self, body: &[Stmt], function_scope: &Rc<Scope>) {
        let mut names = Vec::new();
        collect_var_names(body, &mut names);
        for name in names {
            if !function_scope.has_own(&name) {
                function_scope.declare(&name, Value::Undefined, true);
            }
        }
    }

    fn hoist_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Declaration { kind, declarators } if *kind != DeclKind::Var => {
                    let mut names = Vec::new();
                    for declarator in declarators {
                        declarator.target.bound_names(&mut names);
                    }
                    for name in names {
                        scope.declare_uninitialized(&name, *kind == DeclKind::Let);
                    }
                }
                StmtKind::Function(def) => {
                    if let Some(name) = &def.name {
                        let closure = self.make_closure(def, scope);
                        scope.declare(name, closure, true);
                    }
                }
                _ => {}
            }
        }
    }

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Value,
        scope: &Rc<Scope>,
        mode: BindMode,
    ) -> Eval<()> {
        match pattern {
            Pattern::Identifier(name) => self.bind_name(name, value, scope, mode),
            Pattern::Object { properties, rest } => {
                if value.is_nullish() {
                    return self.throw_error(
                        ErrorKind::TypeError,
                        format!("Cannot destructure '{}' as it is {}.", value.to_js_string(), value.to_js_string()),
                    );
                }
                for property in properties {
                    let mut item = self.get_member(&value, &property.key)?;
                    if let (Value::Undefined, Some(default)) = (&item, &property.value.default) {
                        item = self.eval(default, scope)?;
                    }
                    self.bind_pattern(&property.value.target, item, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let used: Vec<&str> = properties.iter().map(|p| p.key.as_str()).collect();
                    let remaining = self
                        .own_entries(&value)
                        .into_iter()
                        .filter(|(key, _)| !used.contains(&key.as_str()))
                        .collect();
                    self.bind_name(rest, Value::object(remaining), scope, mode)?;
                }
                Ok(())
            }
            Pattern::Array { elements, rest } => {
                let items = self.iterate(&value)?;
                for (index, element) in elements.iter().enumerate() {
                    let Some(element) = element else { continue };
                    let mut item = items.get(index).cloned().unwrap_or(Value::Undefined);
                    if let (Value::Undefined, Some(default)) = (&item, &element.default) {
                        item = self.eval(default, scope)?;
                    }
                    self.bind_pattern(&element.target, item, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let tail = items.get(elements.len()..).map(<[Value]>::to_vec).unwrap_or_default();
                    self.bind_pattern(rest, Value::array(tail), scope, mode)?;
                }
                Ok(())
            }
        }
    }

    fn bind_name(&mut self, name: &str, value: Value, scope: &Rc<Scope>, mode: BindMode) -> Eval<()> {
        match mode {
            BindMode::Declare(DeclKind::Let) => {
                scope.declare(name, value, true);
                Ok(())
            }
            BindMode::Declare(DeclKind::Const) => {
                scope.declare(name, value, false);
                Ok(())
            }
            BindMode::Declare(DeclKind::Var) | BindMode::Assign => self.assign_name(name, value, scope),
        }
    }

    fn assign_name(&mut self, name: &str, value: Value, scope: &Rc<Scope>) -> Eval<()> {
        match scope.assign(name, value.clone()) {
            Assignment::Done => Ok(()),
            Assignment::Immutable => self.throw_error(ErrorKind::TypeError, "Assignment to constant variable."),
            Assignment::Uninitialized => self.throw_error(
                ErrorKind::ReferenceError,
                format!("Cannot access '{}' before initialization", name),
            ),
            Assignment::Missing => {
                // sloppy-mode implicit global
                self.script_scope.declare(name, value, true);
                Ok(())
            }
        }
    }

    fn lookup(&mut self, name: &str, scope: &Rc<Scope>) -> Eval<Value> {
        match scope.lookup(name) {
            Lookup::Found(value) => Ok(value),
            Lookup::Uninitialized => self.throw_error(
                ErrorKind::ReferenceError,
                format!("Cannot access '{}' before initialization", name),
            ),
            Lookup::Missing => self.throw_error(ErrorKind::ReferenceError, format!("{} is not defined", name)),
        }
    }

    // ---- statements ----------------------------------------------------

    fn exec_statements(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Eval<Completion> {
        for stmt in body {
            match self.exec(stmt, scope)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_block(&mut self, body: &[Stmt], parent: &Rc<Scope>) -> Eval<Completion> {
        let scope = parent.child();
        self.hoist_block(body, &scope);
        self.exec_statements(body, &scope)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Eval<Completion> {
        self.current_line = stmt.line;
        self.tick()?;

        match &stmt.kind {
            StmtKind::Declaration { kind, declarators } => {
                for declarator in declarators {
                    let value = match &declarator.init {
                        Some(init) => self.eval(init, scope)?,
                        None if *kind == DeclKind::Var => continue,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(&declarator.target, value, scope, BindMode::Declare(*kind))?;
                }
                Ok(Completion::Normal)
            }
            StmtKind::Function(_) | StmtKind::Empty => Ok(Completion::Normal),
            StmtKind::Expression(expression) => {
                self.eval(expression, scope)?;
                Ok(Completion::Normal)
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, scope),
            StmtKind::ForOf {
                kind,
                target,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, scope)?;
                let items = self.iterate(&iterable)?;
                self.exec_for_each(*kind, target, items, body, scope)
            }
            StmtKind::ForIn {
                kind,
                target,
                object,
                body,
            } => {
                let object = self.eval(object, scope)?;
                let keys = self
                    .enumerate_keys(&object)
                    .into_iter()
                    .map(|key| Value::str(&key))
                    .collect();
                self.exec_for_each(*kind, target, keys, body, scope)
            }
            StmtKind::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                    match self.exec(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::DoWhile { body, test } => {
                loop {
                    self.tick()?;
                    match self.exec(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::Break => Ok(Completion::Break),
            StmtKind::Continue => Ok(Completion::Continue),
            StmtKind::Return(argument) => {
                let value = match argument {
                    Some(argument) => self.eval(argument, scope)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            StmtKind::Throw(argument) => {
                let value = self.eval(argument, scope)?;
                self.throw_line = Some(stmt.line);
                Err(Interrupt::Throw(value))
            }
            StmtKind::Try {
                block,
                param,
                handler,
                finalizer,
            } => self.exec_try(block, param.as_ref(), handler.as_deref(), finalizer.as_deref(), scope),
            StmtKind::Switch {
                discriminant,
                cases,
            } => self.exec_switch(discriminant, cases, scope),
            StmtKind::Block(body) => self.exec_block(body, scope),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Eval<Completion> {
        // `let` bindings get a fresh copy per iteration so closures see that iteration's value
        let mut per_iteration = Vec::new();
        if let Some(Stmt {
            kind: StmtKind::Declaration { kind, declarators },
            ..
        }) = init
        {
            if *kind != DeclKind::Var {
                for declarator in declarators {
                    declarator.target.bound_names(&mut per_iteration);
                }
            }
        }

        let mut iteration_scope = scope.child();
        if let Some(init) = init {
            self.exec(init, &iteration_scope)?;
        }

        loop {
            self.tick()?;
            if let Some(test) = test {
                if !self.eval(test, &iteration_scope)?.truthy() {
                    break;
                }
            }
            match self.exec(body, &iteration_scope)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            if !per_iteration.is_empty() {
                let next = scope.child();
                for name in &per_iteration {
                    if let Lookup::Found(value) = iteration_scope.lookup(name) {
                        next.declare(name, value, true);
                    }
                }
                iteration_scope = next;
            }
            if let Some(update) = update {
                self.eval(update, &iteration_scope)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for_each(
        &mut self,
        kind: Option<DeclKind>,
        target: &Pattern,
        items: Vec<Value>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Eval<Completion> {
        for item in items {
            self.tick()?;
            let (iteration_scope, mode) = match kind {
                Some(kind) => (scope.child(), BindMode::Declare(kind)),
                None => (scope.clone(), BindMode::Assign),
            };
            self.bind_pattern(target, item, &iteration_scope, mode)?;
            match self.exec(body, &iteration_scope)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        param: Option<&Pattern>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        scope: &Rc<Scope>,
    ) -> Eval<Completion> {
        let mut result = self.exec_block(block, scope);

        if let (Err(Interrupt::Throw(thrown)), Some(handler)) = (&result, handler) {
            let thrown = thrown.clone();
            let catch_scope = scope.child();
            result = match param {
                Some(param) => self
                    .bind_pattern(param, thrown, &catch_scope, BindMode::Declare(DeclKind::Let))
                    .map(|_| Completion::Normal),
                None => Ok(Completion::Normal),
            };
            if result.is_ok() {
                result = self.exec_block(handler, &catch_scope);
            }
        }

        if let Some(finalizer) = finalizer {
            if matches!(result, Err(Interrupt::Timeout)) {
                return result;
            }
            match self.exec_block(finalizer, scope)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        result
    }

    fn exec_switch(
        &mut self,
        discriminant: &Expr,
        cases: &[SwitchCase],
        scope: &Rc<Scope>,
    ) -> Eval<Completion> {
        let value = self.eval(discriminant, scope)?;
        let switch_scope = scope.child();
        for case in cases {
            self.hoist_block(&case.body, &switch_scope);
        }

        let mut start = None;
        for (index, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                let candidate = self.eval(test, &switch_scope)?;
                if value.strict_equals(&candidate) {
                    start = Some(index);
                    break;
                }
            }
        }
        let start = start.or_else(|| cases.iter().position(|case| case.test.is_none()));

        if let Some(start) = start {
            for case in &cases[start..] {
                match self.exec_statements(&case.body, &switch_scope)? {
                    Completion::Normal => {}
                    Completion::Break => break,
                    abrupt => return Ok(abrupt),
                }
            }
        }
        Ok(Completion::Normal)
    }

    // ---- expressions ---------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Eval<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (index, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(expression) = exprs.get(index) {
                        let value = self.eval(expression, scope)?;
                        out.push_str(&value.to_js_string());
                    }
                }
                self.checked_string(out)
            }
            Expr::Identifier(name) => self.lookup(name, scope),
            Expr::This => match scope.lookup("this") {
                Lookup::Found(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
            Expr::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        ArrayElement::Item(expression) => items.push(self.eval(expression, scope)?),
                        ArrayElement::Spread(expression) => {
                            let spread = self.eval(expression, scope)?;
                            items.extend(self.iterate(&spread)?);
                        }
                        ArrayElement::Hole => items.push(Value::Undefined),
                    }
                }
                Ok(Value::array(items))
            }
            Expr::Object(properties) => {
                let mut object = JsObject::new();
                for property in properties {
                    match property {
                        ObjectProperty::KeyValue(key, value) => {
                            let key = self.property_key(key, scope)?;
                            let value = self.eval(value, scope)?;
                            object.properties.insert(key, value);
                        }
                        ObjectProperty::Spread(expression) => {
                            let source = self.eval(expression, scope)?;
                            object.properties.extend(self.own_entries(&source));
                        }
                    }
                }
                Ok(Value::Object(Rc::new(RefCell::new(object))))
            }
            Expr::Function(def) => Ok(self.make_closure(def, scope)),
            Expr::Unary { op, argument } => self.eval_unary(*op, argument, scope),
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let reference = self.reference(target, scope)?;
                let old = self.get_reference(&reference, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.put_reference(reference, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuits = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let reference = self.reference(target, scope)?;
                match op {
                    AssignOp::Assign => {
                        let value = self.eval(value, scope)?;
                        self.put_reference(reference, value.clone(), scope)?;
                        Ok(value)
                    }
                    AssignOp::Arithmetic(op) => {
                        let current = self.get_reference(&reference, scope)?;
                        let rhs = self.eval(value, scope)?;
                        let value = self.binary(*op, current, rhs)?;
                        self.put_reference(reference, value.clone(), scope)?;
                        Ok(value)
                    }
                    AssignOp::Logical(op) => {
                        let current = self.get_reference(&reference, scope)?;
                        let assigns = match op {
                            LogicalOp::And => current.truthy(),
                            LogicalOp::Or => !current.truthy(),
                            LogicalOp::Nullish => current.is_nullish(),
                        };
                        if !assigns {
                            return Ok(current);
                        }
                        let value = self.eval(value, scope)?;
                        self.put_reference(reference, value.clone(), scope)?;
                        Ok(value)
                    }
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Call {
                callee,
                arguments,
                optional,
            } => {
                let (function, this) = match callee.as_ref() {
                    Expr::Member {
                        object,
                        property,
                        optional: member_optional,
                    } => {
                        let object = self.eval(object, scope)?;
                        if *member_optional && object.is_nullish() {
                            return Err(Interrupt::ShortCircuit);
                        }
                        let key = self.property_key(property, scope)?;
                        (self.get_member(&object, &key)?, object)
                    }
                    other => (self.eval(other, scope)?, Value::Undefined),
                };
                if *optional && function.is_nullish() {
                    return Err(Interrupt::ShortCircuit);
                }
                if !function.is_callable() {
                    return self.throw_error(
                        ErrorKind::TypeError,
                        format!("{} is not a function", callee.describe()),
                    );
                }
                let arguments = self.eval_arguments(arguments, scope)?;
                self.call_function(&function, this, arguments)
            }
            Expr::New { callee, arguments } => {
                let constructor = self.eval(callee, scope)?;
                let arguments = self.eval_arguments(arguments, scope)?;
                self.construct(&constructor, arguments, &callee.describe())
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Err(Interrupt::ShortCircuit);
                }
                let key = self.property_key(property, scope)?;
                self.get_member(&object, &key)
            }
            Expr::OptionalChain(inner) => match self.eval(inner, scope) {
                Err(Interrupt::ShortCircuit) => Ok(Value::Undefined),
                other => other,
            },
            Expr::Sequence(expressions) => {
                let mut last = Value::Undefined;
                for expression in expressions {
                    last = self.eval(expression, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, argument: &Expr, scope: &Rc<Scope>) -> Eval<Value> {
        match op {
            UnaryOp::Typeof => {
                if let Expr::Identifier(name) = argument {
                    if let Lookup::Missing = scope.lookup(name) {
                        return Ok(Value::str("undefined"));
                    }
                }
                let value = self.eval(argument, scope)?;
                Ok(Value::str(value.type_of()))
            }
            UnaryOp::Delete => {
                if let Expr::Member {
                    object, property, ..
                } = argument
                {
                    let object = self.eval(object, scope)?;
                    let key = self.property_key(property, scope)?;
                    match &object {
                        Value::Object(target) => {
                            target.borrow_mut().properties.shift_remove(&key);
                        }
                        Value::Array(items) => {
                            if let Some(index) = parse_index(&key) {
                                if let Some(slot) = items.borrow_mut().get_mut(index) {
                                    *slot = Value::Undefined;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Value::Bool(true))
            }
            _ => {
                let value = self.eval(argument, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Negate => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::BitNot => Value::Number(!to_int32(value.to_number()) as f64),
                    _ => Value::Undefined,
                })
            }
        }
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Eval<Value> {
        let value = match op {
            BinaryOp::Add => {
                let left = to_primitive(left);
                let right = to_primitive(right);
                if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                    let mut out = left.to_js_string();
                    out.push_str(&right.to_js_string());
                    return self.checked_string(out);
                }
                Value::Number(left.to_number() + right.to_number())
            }
            BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
            BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
            BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
            BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
            BinaryOp::Pow => Value::Number(js_pow(left.to_number(), right.to_number())),
            BinaryOp::Eq => Value::Bool(left.loose_equals(&right)),
            BinaryOp::NotEq => Value::Bool(!left.loose_equals(&right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(&right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(&right)),
            BinaryOp::Less => Value::Bool(compare(left, right, |o| o.is_lt())),
            BinaryOp::Greater => Value::Bool(compare(left, right, |o| o.is_gt())),
            BinaryOp::LessEq => Value::Bool(compare(left, right, |o| o.is_le())),
            BinaryOp::GreaterEq => Value::Bool(compare(left, right, |o| o.is_ge())),
            BinaryOp::BitAnd => Value::Number((to_int32(left.to_number()) & to_int32(right.to_number())) as f64),
            BinaryOp::BitOr => Value::Number((to_int32(left.to_number()) | to_int32(right.to_number())) as f64),
            BinaryOp::BitXor => Value::Number((to_int32(left.to_number()) ^ to_int32(right.to_number())) as f64),
            BinaryOp::ShiftLeft => {
                let shift = to_int32(right.to_number()) as u32 & 31;
                Value::Number(to_int32(left.to_number()).wrapping_shl(shift) as f64)
            }
            BinaryOp::ShiftRight => {
                let shift = to_int32(right.to_number()) as u32 & 31;
                Value::Number((to_int32(left.to_number()) >> shift) as f64)
            }
            BinaryOp::UnsignedShiftRight => {
                let shift = to_int32(right.to_number()) as u32 & 31;
                Value::Number(((to_int32(left.to_number()) as u32) >> shift) as f64)
            }
            BinaryOp::In => {
                let key = left.to_property_key();
                let found = match &right {
                    Value::Object(object) => object.borrow().properties.contains_key(&key),
                    Value::Array(items) => {
                        key == "length" || parse_index(&key).is_some_and(|i| i < items.borrow().len())
                    }
                    Value::Host(target) => self.host.get_member(*target, &key).is_some(),
                    _ => {
                        return self.throw_error(
                            ErrorKind::TypeError,
                            format!("Cannot use 'in' operator to search for '{}' in {}", key, right.to_js_string()),
                        )
                    }
                };
                Value::Bool(found)
            }
            BinaryOp::Instanceof => {
                let Value::Native(constructor) = &right else {
                    if right.is_callable() {
                        return Ok(Value::Bool(false));
                    }
                    return self.throw_error(ErrorKind::TypeError, "Right-hand side of 'instanceof' is not callable");
                };
                Value::Bool(builtins::instance_of(&left, &constructor.kind))
            }
        };
        Ok(value)
    }

    fn checked_string(&mut self, out: String) -> Eval<Value> {
        if out.len() > MAX_STRING_LENGTH {
            return self.throw_error(ErrorKind::RangeError, "Invalid string length");
        }
        Ok(Value::Str(Rc::from(out)))
    }

    fn property_key(&mut self, key: &PropertyKey, scope: &Rc<Scope>) -> Eval<String> {
        match key {
            PropertyKey::Static(name) => Ok(name.clone()),
            PropertyKey::Computed(expression) => Ok(self.eval(expression, scope)?.to_property_key()),
        }
    }

    fn reference(&mut self, target: &Expr, scope: &Rc<Scope>) -> Eval<Reference> {
        match target {
            Expr::Identifier(name) => Ok(Reference::Name(name.clone())),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                let key = self.property_key(property, scope)?;
                Ok(Reference::Member(object, key))
            }
            other => self.throw_error(
                ErrorKind::SyntaxError,
                format!("Invalid assignment target: {}", other.describe()),
            ),
        }
    }

    fn get_reference(&mut self, reference: &Reference, scope: &Rc<Scope>) -> Eval<Value> {
        match reference {
            Reference::Name(name) => self.lookup(name, scope),
            Reference::Member(object, key) => self.get_member(object, key),
        }
    }

    fn put_reference(&mut self, reference: Reference, value: Value, scope: &Rc<Scope>) -> Eval<()> {
        match reference {
            Reference::Name(name) => self.assign_name(&name, value, scope),
            Reference::Member(object, key) => self.set_member(&object, &key, value),
        }
    }

    fn eval_arguments(&mut self, arguments: &[Argument], scope: &Rc<Scope>) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match argument {
                Argument::Positional(expression) => values.push(self.eval(expression, scope)?),
                Argument::Spread(expression) => {
                    let spread = self.eval(expression, scope)?;
                    values.extend(self.iterate(&spread)?);
                }
            }
        }
        Ok(values)
    }

    // ---- objects -------------------------------------------------------

    pub(crate) fn get_member(&mut self, object: &Value, key: &str) -> Eval<Value> {
        let value = match object {
            Value::Undefined | Value::Null => {
                return self.throw_error(
                    ErrorKind::TypeError,
                    format!("Cannot read properties of {} (reading '{}')", object.to_js_string(), key),
                )
            }
            Value::Array(items) => {
                if key == "length" {
                    Value::Number(items.borrow().len() as f64)
                } else if let Some(index) = parse_index(key) {
                    items.borrow().get(index).cloned().unwrap_or(Value::Undefined)
                } else if let Some(method) = ArrayMethod::from_name(key) {
                    Value::native(Builtin::ArrayMethod(method), object.clone())
                } else {
                    builtins::common_method(key, object)
                }
            }
            Value::Str(s) => {
                if key == "length" {
                    Value::Number(s.chars().count() as f64)
                } else if let Some(index) = parse_index(key) {
                    s.chars()
                        .nth(index)
                        .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                        .unwrap_or(Value::Undefined)
                } else if let Some(method) = StringMethod::from_name(key) {
                    Value::native(Builtin::StringMethod(method), object.clone())
                } else {
                    builtins::common_method(key, object)
                }
            }
            Value::Number(_) => match key {
                "toFixed" => Value::native(Builtin::NumberMethod(NumberMethod::ToFixed), object.clone()),
                "toString" => Value::native(Builtin::NumberMethod(NumberMethod::ToString), object.clone()),
                _ => Value::Undefined,
            },
            Value::Object(target) => {
                let own = target.borrow().properties.get(key).cloned();
                match own {
                    Some(value) => value,
                    None => builtins::common_method(key, object),
                }
            }
            Value::Native(native) => builtins::static_member(&native.kind, key).unwrap_or(Value::Undefined),
            Value::Host(target) => self.host.get_member(*target, key).unwrap_or(Value::Undefined),
            Value::Bool(_) | Value::Function(_) => builtins::common_method(key, object),
        };
        Ok(value)
    }

    pub(crate) fn set_member(&mut self, object: &Value, key: &str, value: Value) -> Eval<()> {
        match object {
            Value::Undefined | Value::Null => self.throw_error(
                ErrorKind::TypeError,
                format!("Cannot set properties of {} (setting '{}')", object.to_js_string(), key),
            ),
            Value::Array(items) => {
                if key == "length" {
                    let length = value.to_number();
                    if length < 0.0 || length.fract() != 0.0 || length > MAX_ARRAY_LENGTH as f64 {
                        return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                    }
                    items.borrow_mut().resize(length as usize, Value::Undefined);
                } else if let Some(index) = parse_index(key) {
                    if index >= MAX_ARRAY_LENGTH {
                        return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                    }
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Object(target) => {
                target.borrow_mut().properties.insert(key.to_string(), value);
                Ok(())
            }
            Value::Host(target) => {
                let target = *target;
                self.host
                    .set_member(target, key, value)
                    .map_err(|error| self.host_error(error))
            }
            _ => Ok(()),
        }
    }

    /// Own enumerable entries, as used by spread and rest patterns.
    pub(crate) fn own_entries(&mut self, value: &Value) -> Vec<(String, Value)> {
        match value {
            Value::Object(object) => ordered_properties(&object.borrow().properties)
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            Value::Str(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (i.to_string(), Value::str(c.encode_utf8(&mut [0; 4]))))
                .collect(),
            Value::Host(target) => {
                let target = *target;
                self.host
                    .keys(target)
                    .into_iter()
                    .map(|key| {
                        let value = self.host.get_member(target, &key).unwrap_or(Value::Undefined);
                        (key, value)
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn enumerate_keys(&mut self, value: &Value) -> Vec<String> {
        match value {
            Value::Object(object) => ordered_properties(&object.borrow().properties)
                .into_iter()
                .map(|(k, _)| k.clone())
                .collect(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
            Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
            Value::Host(target) => self.host.keys(*target),
            _ => Vec::new(),
        }
    }

    pub(crate) fn iterate(&mut self, value: &Value) -> Eval<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect()),
            other => self.throw_error(
                ErrorKind::TypeError,
                format!("{} is not iterable", other.to_js_string()),
            ),
        }
    }

    // ---- calls ---------------------------------------------------------

    pub(crate) fn call_function(&mut self, function: &Value, this: Value, arguments: Vec<Value>) -> Eval<Value> {
        self.tick()?;
        if self.depth >= self.max_call_depth {
            return self.throw_error(ErrorKind::RangeError, "Maximum call stack size exceeded");
        }

        self.depth += 1;
        let line = self.current_line;
        let result = match function {
            Value::Function(closure) => self.call_closure(closure, this, arguments),
            Value::Native(native) => self.call_native(native, arguments),
            other => self.throw_error(
                ErrorKind::TypeError,
                format!("{} is not a function", other.to_js_string()),
            ),
        };
        self.depth -= 1;
        self.current_line = line;
        result
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, this: Value, arguments: Vec<Value>) -> Eval<Value> {
        let def = &closure.def;
        let params_scope = closure.scope.child();
        if !def.is_arrow {
            params_scope.declare("this", this, false);
            params_scope.declare("arguments", Value::array(arguments.clone()), true);
            if let Some(name) = &def.name {
                params_scope.declare(name, Value::Function(closure.clone()), true);
            }
        }

        for (index, param) in def.params.iter().enumerate() {
            let mut value = if param.rest {
                Value::array(arguments.get(index..).map(<[Value]>::to_vec).unwrap_or_default())
            } else {
                arguments.get(index).cloned().unwrap_or(Value::Undefined)
            };
            if let (Value::Undefined, Some(default)) = (&value, &param.default) {
                value = self.eval(default, &params_scope)?;
            }
            self.bind_pattern(&param.target, value, &params_scope, BindMode::Declare(DeclKind::Let))?;
        }

        match &def.body {
            FunctionBody::Expression(expression) => self.eval(expression, &params_scope),
            FunctionBody::Block(body) => {
                self.hoist_vars(body, &params_scope);
                let body_scope = params_scope.child();
                self.hoist_block(body, &body_scope);
                match self.exec_statements(body, &body_scope)? {
                    Completion::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }

    fn construct(&mut self, constructor: &Value, arguments: Vec<Value>, described: &str) -> Eval<Value> {
        match constructor {
            Value::Native(native) => match &native.kind {
                Builtin::HostClass(class) => {
                    let class = *class;
                    self.host
                        .construct(class, &arguments)
                        .map_err(|error| self.host_error(error))
                }
                Builtin::ErrorCtor(_) | Builtin::ArrayCtor | Builtin::ObjectCtor | Builtin::NumberCtor
                | Builtin::StringCtor | Builtin::BooleanCtor => self.call_function(constructor, Value::Undefined, arguments),
                _ => self.throw_error(ErrorKind::TypeError, format!("{} is not a constructor", described)),
            },
            Value::Function(closure) if !closure.def.is_arrow => {
                let instance = Value::object(Default::default());
                let result = self.call_function(constructor, instance.clone(), arguments)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) => result,
                    _ => instance,
                })
            }
            _ => self.throw_error(ErrorKind::TypeError, format!("{} is not a constructor", described)),
        }
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        // closures and the scopes they capture reference each other; break the cycles
        for weak in self.captured_scopes.drain(..) {
            if let Some(scope) = weak.upgrade() {
                scope.bindings.borrow_mut().clear();
            }
        }
        self.script_scope.bindings.borrow_mut().clear();
    }
}

fn collect_var_names(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        collect_stmt_var_names(stmt, out);
    }
}

fn collect_stmt_var_names(stmt: &Stmt, out: &mut Vec<String>) {
    match &stmt.kind {
        StmtKind::Declaration {
            kind: DeclKind::Var,
            declarators,
        } => {
            for declarator in declarators {
                declarator.target.bound_names(out);
            }
        }
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => {
            collect_stmt_var_names(consequent, out);
            if let Some(alternate) = alternate {
                collect_stmt_var_names(alternate, out);
            }
        }
        StmtKind::For { init, body, .. } => {
            if let Some(init) = init {
                collect_stmt_var_names(init, out);
            }
            collect_stmt_var_names(body, out);
        }
        StmtKind::ForOf {
            kind, target, body, ..
        }
        | StmtKind::ForIn {
            kind, target, body, ..
        } => {
            if *kind == Some(DeclKind::Var) {
                target.bound_names(out);
            }
            collect_stmt_var_names(body, out);
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            collect_stmt_var_names(body, out)
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            collect_var_names(block, out);
            if let Some(handler) = handler {
                collect_var_names(handler, out);
            }
            if let Some(finalizer) = finalizer {
                collect_var_names(finalizer, out);
            }
        }
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                collect_var_names(&case.body, out);
            }
        }
        StmtKind::Block(body) => collect_var_names(body, out),
        _ => {}
    }
}

fn to_primitive(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Native(_) | Value::Host(_) => {
            Value::Str(Rc::from(value.to_js_string()))
        }
        primitive => primitive,
    }
}

fn compare(left: Value, right: Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let left = to_primitive(left);
    let right = to_primitive(right);
    if let (Value::Str(a), Value::Str(b)) = (&left, &right) {
        return accept(a.cmp(b));
    }
    left.to_number()
        .partial_cmp(&right.to_number())
        .is_some_and(accept)
}

pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() % 4_294_967_296.0) as i64 as u32 as i32
}

fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}
