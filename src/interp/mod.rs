//! Reference evaluator for lowered modules.
//!
//! Runs an [`LModule`] set with the semantics the generated C++ has against
//! the kiwi runtime: lists and dictionaries are shared handles, value
//! classes copy on assignment, reference classes share one object and
//! dispatch virtually, and `with` blocks run their exit hook exactly once.
//! Tests use it as the behavioural oracle for translated programs.

pub mod ops;
pub mod value;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::lower::ir::{
    Callee, Dispatch, LClass, LExpr, LFunction, LModule, LParam, LPlace, LStmt, Repr, TagTest,
};
use crate::parser::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::types::{Head, ScalarKind, Type};

pub use value::{Instance, Value};

#[derive(Debug, Error)]
pub enum RunError {
    /// A source-level exception reached the top of the program.
    #[error("{exception}: {message}")]
    Raised { exception: String, message: String },
    #[error("{0}")]
    Runtime(String),
    #[error("evaluation exceeded {0} steps")]
    StepLimit(u64),
    #[error("call depth exceeded {0}")]
    Recursion(usize),
}

impl RunError {
    pub fn raised(exception: impl Into<String>, message: impl Into<String>) -> Self {
        RunError::Raised { exception: exception.into(), message: message.into() }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        RunError::Runtime(msg.into())
    }
}

type Result<T> = std::result::Result<T, RunError>;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub steps: u64,
    pub depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { steps: 5_000_000, depth: 160 }
    }
}

/// Printed output and exit status of a run.
#[derive(Debug)]
pub struct Outcome {
    pub output: String,
    pub result: Result<i64>,
}

/// Initialise `main` (and everything it imports) and run its entry point.
pub fn run_program(modules: &[LModule], main: &str) -> Outcome {
    let mut interp = Interpreter::new(modules);
    let result = interp.run_entry(main);
    Outcome { output: interp.into_output(), result }
}

#[derive(Debug, Default)]
struct Frame {
    locals: HashMap<String, Value>,
    this: Option<Value>,
}

impl Frame {
    fn method(locals: HashMap<String, Value>, this: Value) -> Self {
        Self { locals, this: Some(this) }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter<'a> {
    modules: HashMap<&'a str, &'a LModule>,
    classes: HashMap<&'a str, &'a LClass>,
    functions: HashMap<&'a str, &'a LFunction>,
    globals: HashMap<String, Value>,
    initialised: HashSet<String>,
    out: String,
    steps: u64,
    depth: usize,
    limits: Limits,
}

impl<'a> Interpreter<'a> {
    pub fn new(modules: &'a [LModule]) -> Self {
        let mut interp = Self {
            modules: HashMap::new(),
            classes: HashMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
            initialised: HashSet::new(),
            out: String::new(),
            steps: 0,
            depth: 0,
            limits: Limits::default(),
        };
        for m in modules {
            interp.modules.insert(m.name.as_str(), m);
            interp.classes.extend(m.classes.iter().map(|c| (c.name.as_str(), c)));
            interp.functions.extend(m.functions.iter().map(|f| (f.name.as_str(), f)));
        }
        interp
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn output(&self) -> &str {
        &self.out
    }

    pub fn into_output(self) -> String {
        self.out
    }

    pub fn global(&self, qualified: &str) -> Option<&Value> {
        self.globals.get(qualified)
    }

    /// Run a module initialiser once, after the initialisers it imports.
    /// Modules outside the program are treated as already initialised.
    pub fn init_module(&mut self, name: &str) -> Result<()> {
        if !self.initialised.insert(name.to_string()) {
            return Ok(());
        }
        let Some(module) = self.modules.get(name).copied() else {
            return Ok(());
        };
        for import in &module.imports {
            self.init_module(import)?;
        }
        for g in &module.globals {
            let v = self.default_of(&g.ty)?;
            self.globals.insert(g.name.clone(), v);
        }
        let mut frame = Frame::default();
        self.exec_block(&mut frame, &module.init)?;
        tracing::debug!(module = name, steps = self.steps, "module initialised");
        Ok(())
    }

    /// Initialise `name` and run its entry point; the result is the
    /// program's exit status.
    pub fn run_entry(&mut self, name: &str) -> Result<i64> {
        self.init_module(name)?;
        let module = self
            .modules
            .get(name)
            .copied()
            .ok_or_else(|| RunError::runtime(format!("module '{name}' is not part of the program")))?;
        let Some(entry) = &module.entry else {
            return Ok(0);
        };
        let mut frame = Frame::default();
        let status = match self.exec_block(&mut frame, entry)? {
            Flow::Return(v) => v.as_int().unwrap_or(0),
            _ => 0,
        };
        tracing::debug!(module = name, status, steps = self.steps, "entry point finished");
        Ok(status)
    }

    pub fn call_function(&mut self, qualified: &str, args: Vec<Value>) -> Result<Value> {
        let f = self
            .functions
            .get(qualified)
            .copied()
            .ok_or_else(|| RunError::raised("NameError", format!("name '{qualified}' is not defined")))?;
        let locals = self.bind(&f.params, args)?;
        let mut frame = Frame { locals, this: None };
        self.run_body(&mut frame, &f.body)
    }

    /// Construct an instance of `class` as the generated constructor would.
    pub fn construct(&mut self, class: &str, args: Vec<Value>) -> Result<Value> {
        let c = self.class(class)?;
        let blank = self.blank(class)?;
        let this = match c.repr {
            Repr::Reference => Value::Object(Rc::new(RefCell::new(blank))),
            Repr::Value => Value::Struct(blank),
        };
        self.run_ctor(class, this, args)
    }

    /// Call a method on `receiver` with virtual dispatch.
    pub fn call_method(&mut self, receiver: Value, method: &str, args: Vec<Value>) -> Result<Value> {
        self.invoke(receiver, None, method, args).map(|(ret, _)| ret)
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limits.steps {
            return Err(RunError::StepLimit(self.limits.steps));
        }
        Ok(())
    }

    fn class(&self, name: &str) -> Result<&'a LClass> {
        self.classes
            .get(name)
            .copied()
            .ok_or_else(|| RunError::runtime(format!("class '{name}' is not part of the program")))
    }

    // ---- classes ------------------------------------------------------------

    /// `class` followed by its ancestors, depth first.
    fn lineage(&self, class: &str) -> Vec<&'a LClass> {
        let mut out: Vec<&'a LClass> = Vec::new();
        let mut stack = vec![class.to_string()];
        while let Some(name) = stack.pop() {
            if let Some(c) = self.classes.get(name.as_str()).copied()
                && !out.iter().any(|seen| seen.name == c.name)
            {
                out.push(c);
                stack.extend(c.bases.iter().rev().cloned());
            }
        }
        out
    }

    fn is_subclass(&self, class: &str, of: &str) -> bool {
        class == of || self.lineage(class).iter().any(|c| c.name == of)
    }

    fn find_method(&self, class: &str, name: &str) -> Option<&'a crate::lower::ir::LMethod> {
        self.lineage(class).into_iter().find_map(|c| c.method(name).filter(|m| m.body.is_some()))
    }

    fn has_method(&self, v: &Value, name: &str) -> bool {
        v.class().is_some_and(|c| self.find_method(&c, name).is_some())
    }

    /// Instance with every field at its declared default, bases first.
    fn blank(&mut self, class: &str) -> Result<Instance> {
        let mut fields = IndexMap::new();
        for c in self.lineage(class).into_iter().rev() {
            for f in &c.fields {
                let v = match &f.default {
                    Some(d) => self.eval(&mut Frame::default(), d)?,
                    None => self.default_of(&f.ty)?,
                };
                fields.insert(f.name.clone(), v);
            }
        }
        Ok(Instance { class: class.to_string(), fields })
    }

    fn default_constructible(&self, class: &str) -> bool {
        match self.classes.get(class) {
            Some(c) => match &c.ctor {
                Some(ctor) => ctor.params.iter().all(|p| p.default.is_some()),
                None => c.inherit_ctor.as_deref().is_none_or(|b| self.default_constructible(b)),
            },
            None => false,
        }
    }

    fn run_ctor(&mut self, class: &str, this: Value, args: Vec<Value>) -> Result<Value> {
        let Some(c) = self.classes.get(class).copied() else {
            return Ok(this);
        };
        match (&c.ctor, &c.inherit_ctor) {
            (Some(ctor), _) => {
                let locals = self.bind(&ctor.params, args)?;
                let mut frame = Frame::method(locals, this);
                for base in &c.bases {
                    let init = ctor.base_inits.iter().find(|(b, _)| b == base);
                    let values = match init {
                        Some((_, exprs)) => self.eval_all(&mut frame, exprs)?,
                        None if self.default_constructible(base) => Vec::new(),
                        None => continue,
                    };
                    let current = frame.this.take().unwrap_or(Value::None);
                    frame.this = Some(self.run_ctor(base, current, values)?);
                }
                self.run_body(&mut frame, &ctor.body)?;
                Ok(frame.this.unwrap_or(Value::None))
            }
            (None, Some(base)) => self.run_ctor(base, this, args),
            (None, None) => {
                let mut this = this;
                for base in &c.bases {
                    if self.default_constructible(base) {
                        this = self.run_ctor(base, this, Vec::new())?;
                    }
                }
                Ok(this)
            }
        }
    }

    /// Zero value of a settled slot type.
    fn default_of(&mut self, ty: &Type) -> Result<Value> {
        Ok(match ty {
            Type::Scalar(ScalarKind::Int) => Value::Int(0),
            Type::Scalar(ScalarKind::Float) => Value::Float(0.0),
            Type::Scalar(ScalarKind::Bool) => Value::Bool(false),
            Type::Scalar(ScalarKind::Str) => Value::Str(String::new()),
            Type::Nominal(n) => match &n.head {
                Head::List => Value::list(Vec::new()),
                Head::Dict => Value::dict(IndexMap::new()),
                Head::Set => Value::set(Vec::new()),
                Head::Tuple => {
                    let items = n.args.iter().map(|a| self.default_of(a)).collect::<Result<Vec<_>>>()?;
                    Value::tuple(items)
                }
                Head::Class(c) if self.classes.get(c.as_str()).is_some_and(|c| c.repr == Repr::Value) => {
                    Value::Struct(self.blank(c)?)
                }
                Head::Class(_) => Value::None,
            },
            _ => Value::None,
        })
    }

    // ---- calls --------------------------------------------------------------

    fn bind(&mut self, params: &'a [LParam], args: Vec<Value>) -> Result<HashMap<String, Value>> {
        let mut args = args.into_iter();
        let mut locals = HashMap::new();
        for p in params {
            let v = match (args.next(), &p.default) {
                (Some(v), _) => v,
                (None, Some(d)) => self.eval(&mut Frame::default(), d)?,
                (None, None) => {
                    return Err(RunError::raised("TypeError", format!("missing argument '{}'", p.name)));
                }
            };
            locals.insert(p.name.clone(), v);
        }
        Ok(locals)
    }

    fn run_body(&mut self, frame: &mut Frame, body: &'a [LStmt]) -> Result<Value> {
        if self.depth >= self.limits.depth {
            return Err(RunError::Recursion(self.limits.depth));
        }
        self.depth += 1;
        let flow = self.exec_block(frame, body);
        self.depth -= 1;
        Ok(match flow? {
            Flow::Return(v) => v,
            _ => Value::None,
        })
    }

    /// Calls `method` on `this`, searching from `start` (or the runtime
    /// class). Returns the result and the receiver as the method left it.
    fn invoke(
        &mut self,
        this: Value,
        start: Option<&str>,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(Value, Option<Value>)> {
        let class = match start {
            Some(c) => c.to_string(),
            None => this.class().ok_or_else(|| {
                RunError::raised("AttributeError", format!("{} has no attribute '{method}'", this.repr()))
            })?,
        };
        let m = self
            .find_method(&class, method)
            .ok_or_else(|| RunError::raised("AttributeError", format!("'{class}' has no method '{method}'")))?;
        let Some(body) = &m.body else {
            return Err(RunError::runtime(format!("abstract method '{class}.{method}' called")));
        };
        let locals = self.bind(&m.params, args)?;
        let mut frame = Frame { locals, this: (!m.is_static).then_some(this) };
        let ret = self.run_body(&mut frame, body)?;
        Ok((ret, frame.this))
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Function(name) => self.call_function(&name, args),
            other if other.class().is_some() => self.call_method(other, "__call__", args),
            other => Err(RunError::raised("TypeError", format!("{} is not callable", other.repr()))),
        }
    }

    // ---- statements ---------------------------------------------------------

    fn exec_block(&mut self, frame: &mut Frame, body: &'a [LStmt]) -> Result<Flow> {
        for s in body {
            match self.exec(frame, s)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, frame: &mut Frame, stmt: &'a LStmt) -> Result<Flow> {
        self.tick()?;
        match stmt {
            LStmt::Declare { name, ty, init } => {
                let v = match init {
                    Some(e) => self.eval(frame, e)?,
                    None => self.default_of(ty)?,
                };
                frame.locals.insert(name.clone(), v);
            }
            LStmt::Assign { target, value } => {
                let v = self.eval(frame, value)?;
                self.store(frame, target, v)?;
            }
            LStmt::Unpack { targets, value } => {
                let v = self.eval(frame, value)?;
                self.unpack(frame, targets, v)?;
            }
            LStmt::Expr(e) => {
                self.eval(frame, e)?;
            }
            LStmt::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(frame, e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            LStmt::If { cond, then, els } => {
                let branch = if self.eval(frame, cond)?.truthy() { then } else { els };
                return self.exec_block(frame, branch);
            }
            LStmt::While { cond, body } => {
                while self.eval(frame, cond)?.truthy() {
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            LStmt::ForEach { vars, iterable, body, .. } => return self.for_each(frame, vars, iterable, body),
            LStmt::ForRange { var, start, stop, step, body, .. } => {
                return self.for_range(frame, var, [start, stop, step], body);
            }
            LStmt::Throw { exception, message, args } => {
                let mut parts = Vec::new();
                for e in message.iter().chain(args) {
                    parts.push(self.eval(frame, e)?.text());
                }
                return Err(RunError::raised(exception.clone(), parts.join(", ")));
            }
            LStmt::Rethrow => return Err(RunError::raised("RuntimeError", "no active exception to re-raise")),
            LStmt::Scoped { name, init, enter, body, .. } => {
                let v = self.eval(frame, init)?;
                frame.locals.insert(name.clone(), v.clone());
                if *enter && self.has_method(&v, "__enter__") {
                    self.call_method(v, "__enter__", Vec::new())?;
                }
                let result = self.exec_block(frame, body);
                let holder = frame.locals.get(name).cloned().unwrap_or(Value::None);
                let exited = self.exit_scope(holder);
                let flow = result?;
                exited?;
                return Ok(flow);
            }
            LStmt::Break => return Ok(Flow::Break),
            LStmt::Continue => return Ok(Flow::Continue),
            LStmt::IdentityGuard { other } => {
                let other = self.local(frame, other)?;
                if frame.this.as_ref().is_some_and(|this| this.identical(&other)) {
                    return Ok(Flow::Return(Value::Bool(true)));
                }
            }
            LStmt::TagGuard { other, test, .. } => {
                let other = self.local(frame, other)?;
                if !self.tag_test(frame, &other, test) {
                    return Ok(Flow::Return(Value::Bool(false)));
                }
            }
            LStmt::DelItem { container, key, .. } => {
                let c = self.eval(frame, container)?;
                let k = self.eval(frame, key)?;
                ops::del_item(&c, &k)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn for_each(&mut self, frame: &mut Frame, vars: &'a [LPlace], iterable: &'a LExpr, body: &'a [LStmt]) -> Result<Flow> {
        let source = self.eval(frame, iterable)?;
        let snapshot = match &source {
            Value::List(_) => None,
            other => Some(other.items().ok_or_else(|| {
                RunError::raised("TypeError", format!("{} is not iterable", other.repr()))
            })?),
        };
        let mut i = 0;
        loop {
            let item = match (&source, &snapshot) {
                // Lists are iterated live: appends during the loop are seen.
                (Value::List(l), None) => l.borrow().get(i).cloned(),
                (_, Some(items)) => items.get(i).cloned(),
                _ => None,
            };
            let Some(item) = item else { break };
            i += 1;
            match vars {
                [single] => self.store(frame, single, item)?,
                many => self.unpack(frame, many, item)?,
            }
            match self.exec_block(frame, body)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    /// Counted loop: the variable is re-read after every iteration.
    fn for_range(&mut self, frame: &mut Frame, var: &'a LPlace, bounds: [&'a LExpr; 3], body: &'a [LStmt]) -> Result<Flow> {
        let [start, stop, step] = bounds;
        let start = self.int(frame, start)?;
        let stop = self.int(frame, stop)?;
        let step = self.int(frame, step)?;
        if step == 0 {
            return Err(RunError::raised("ValueError", "range() arg 3 must not be zero"));
        }
        self.store(frame, var, Value::Int(start))?;
        loop {
            let i = self.load(frame, var)?.as_int().unwrap_or(stop);
            if !((step > 0 && i < stop) || (step < 0 && i > stop)) {
                break;
            }
            match self.exec_block(frame, body)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
            let i = self.load(frame, var)?.as_int().unwrap_or(stop);
            self.store(frame, var, Value::Int(i + step))?;
        }
        Ok(Flow::Normal)
    }

    fn exit_scope(&mut self, holder: Value) -> Result<()> {
        let Some(class) = holder.class() else {
            return Ok(());
        };
        if let Some(m) = self.find_method(&class, "__exit__") {
            let args = vec![Value::None; m.params.len()];
            self.call_method(holder, "__exit__", args)?;
        }
        Ok(())
    }

    fn tag_test(&self, frame: &Frame, v: &Value, test: &TagTest) -> bool {
        let Some(class) = v.class() else {
            return false;
        };
        match test {
            TagTest::SameAsSelf => frame.this.as_ref().and_then(Value::class).is_some_and(|c| c == class),
            TagTest::Classes(classes) => classes.iter().any(|c| self.is_subclass(&class, c)),
        }
    }

    // ---- places -------------------------------------------------------------

    fn local(&self, frame: &Frame, name: &str) -> Result<Value> {
        frame
            .locals
            .get(name)
            .cloned()
            .ok_or_else(|| RunError::raised("UnboundLocalError", format!("local '{name}' referenced before assignment")))
    }

    fn load(&mut self, frame: &mut Frame, place: &'a LPlace) -> Result<Value> {
        match place {
            LPlace::Local(n) => self.local(frame, n),
            LPlace::Global(n) => self.global_value(n),
            LPlace::Field { object, field, .. } => {
                let o = self.eval(frame, object)?;
                get_field(&o, field)
            }
            LPlace::Index { container, index } => {
                let c = self.eval(frame, container)?;
                let i = self.eval(frame, index)?;
                ops::index(&c, &i)
            }
        }
    }

    fn store(&mut self, frame: &mut Frame, place: &'a LPlace, value: Value) -> Result<()> {
        match place {
            LPlace::Local(n) => {
                frame.locals.insert(n.clone(), value);
            }
            LPlace::Global(n) => {
                self.globals.insert(n.clone(), value);
            }
            LPlace::Field { object, field, .. } => {
                if is_place(object) {
                    self.modify(frame, object, &mut |slot| put_field(slot, field, value.clone()))?;
                } else {
                    let mut target = self.eval(frame, object)?;
                    put_field(&mut target, field, value)?;
                }
            }
            LPlace::Index { container, index } => {
                let c = self.eval(frame, container)?;
                let i = self.eval(frame, index)?;
                ops::set_index(&c, &i, value)?;
            }
        }
        Ok(())
    }

    fn unpack(&mut self, frame: &mut Frame, targets: &'a [LPlace], value: Value) -> Result<()> {
        let items = value
            .items()
            .ok_or_else(|| RunError::raised("TypeError", format!("cannot unpack {}", value.repr())))?;
        if items.len() != targets.len() {
            return Err(RunError::raised(
                "ValueError",
                format!("expected {} values to unpack, got {}", targets.len(), items.len()),
            ));
        }
        for (target, item) in targets.iter().zip(items) {
            self.store(frame, target, item)?;
        }
        Ok(())
    }

    /// Applies `update` to the storage `expr` denotes, so value structs
    /// reached through locals, globals, `self` and fields change in place.
    fn modify(
        &mut self,
        frame: &mut Frame,
        expr: &'a LExpr,
        update: &mut dyn FnMut(&mut Value) -> Result<()>,
    ) -> Result<()> {
        match expr {
            LExpr::Local(n) => match frame.locals.get_mut(n) {
                Some(slot) => update(slot),
                None => Err(RunError::raised("UnboundLocalError", format!("local '{n}' referenced before assignment"))),
            },
            LExpr::Global(n) => match self.globals.get_mut(n) {
                Some(slot) => update(slot),
                None => Err(RunError::raised("NameError", format!("name '{n}' is not defined"))),
            },
            LExpr::SelfRef { .. } => match frame.this.as_mut() {
                Some(slot) => update(slot),
                None => Err(RunError::runtime("self used outside a method")),
            },
            LExpr::Field { object, field, .. } => self.modify(frame, object, &mut |outer| match outer {
                Value::Struct(inst) => match inst.fields.get_mut(field) {
                    Some(slot) => update(slot),
                    None => Err(missing_attribute(&inst.class, field)),
                },
                Value::Object(o) => {
                    let current = o.borrow().fields.get(field).cloned();
                    match current {
                        // Shared objects are updated through their own handle.
                        Some(mut inner @ Value::Object(_)) => update(&mut inner),
                        Some(_) => {
                            let mut o = o.borrow_mut();
                            let slot = o.fields.get_mut(field).ok_or_else(|| RunError::runtime("field vanished"))?;
                            update(slot)
                        }
                        None => Err(missing_attribute(&o.borrow().class, field)),
                    }
                }
                other => Err(RunError::raised("AttributeError", format!("{} has no attribute '{field}'", other.repr()))),
            }),
            LExpr::Index { value, index } => {
                let c = self.eval(frame, value)?;
                let i = self.eval(frame, index)?;
                let mut item = ops::index(&c, &i)?;
                update(&mut item)?;
                ops::set_index(&c, &i, item)
            }
            other => {
                let mut temp = self.eval(frame, other)?;
                update(&mut temp)
            }
        }
    }

    fn global_value(&self, name: &str) -> Result<Value> {
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if self.functions.contains_key(name) {
            return Ok(Value::Function(name.to_string()));
        }
        Err(RunError::raised("NameError", format!("name '{name}' is not defined")))
    }

    // ---- expressions --------------------------------------------------------

    fn int(&mut self, frame: &mut Frame, e: &'a LExpr) -> Result<i64> {
        let v = self.eval(frame, e)?;
        v.as_int().ok_or_else(|| RunError::raised("TypeError", format!("{} is not an integer", v.repr())))
    }

    fn eval_all(&mut self, frame: &mut Frame, exprs: &'a [LExpr]) -> Result<Vec<Value>> {
        exprs.iter().map(|e| self.eval(frame, e)).collect()
    }

    fn eval(&mut self, frame: &mut Frame, expr: &'a LExpr) -> Result<Value> {
        self.tick()?;
        Ok(match expr {
            LExpr::Int(i) => Value::Int(*i),
            LExpr::Float(f) => Value::Float(*f),
            LExpr::Bool(b) => Value::Bool(*b),
            LExpr::Str(s) => Value::Str(s.clone()),
            LExpr::Null => Value::None,
            LExpr::Local(n) => self.local(frame, n)?,
            LExpr::Global(n) => self.global_value(n)?,
            LExpr::SelfRef { .. } => frame.this.clone().ok_or_else(|| RunError::runtime("self used outside a method"))?,
            LExpr::Field { object, field, .. } => {
                let o = self.eval(frame, object)?;
                get_field(&o, field)?
            }
            LExpr::Downcast { value, .. } | LExpr::Box(value) => self.eval(frame, value)?,
            LExpr::Call { callee, args } => {
                let args = self.eval_all(frame, args)?;
                match callee {
                    Callee::Function(name) => self.call_function(name, args)?,
                    Callee::Value(f) => {
                        let f = self.eval(frame, f)?;
                        self.call_value(f, args)?
                    }
                }
            }
            LExpr::MethodCall { receiver, method, args, repr } => {
                let recv = self.eval(frame, receiver)?;
                let args = self.eval_all(frame, args)?;
                let (ret, after) = self.invoke(recv, None, method, args)?;
                if *repr == Repr::Value
                    && is_place(receiver)
                    && let Some(after @ Value::Struct(_)) = after
                {
                    self.modify(frame, receiver, &mut |slot| {
                        *slot = after.clone();
                        Ok(())
                    })?;
                }
                ret
            }
            LExpr::BaseCall { base, method, args } => {
                let this = frame.this.clone().ok_or_else(|| RunError::runtime("base call outside a method"))?;
                let args = self.eval_all(frame, args)?;
                let (ret, after) = self.invoke(this, Some(base), method, args)?;
                if let Some(after @ Value::Struct(_)) = after {
                    frame.this = Some(after);
                }
                ret
            }
            LExpr::StaticCall { class, method, args } => {
                let args = self.eval_all(frame, args)?;
                let m = self
                    .find_method(class, method)
                    .ok_or_else(|| RunError::raised("AttributeError", format!("'{class}' has no method '{method}'")))?;
                let locals = self.bind(&m.params, args)?;
                let mut inner = Frame { locals, this: None };
                match &m.body {
                    Some(body) => self.run_body(&mut inner, body)?,
                    None => Value::None,
                }
            }
            LExpr::Construct { class, args, .. } => {
                let args = self.eval_all(frame, args)?;
                self.construct(class, args)?
            }
            LExpr::Binary { op, left, right, dispatch, .. } => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                self.binary(*op, dispatch, l, r)?
            }
            LExpr::Unary { op, operand, dispatch } => {
                let v = self.eval(frame, operand)?;
                match (dispatch, op.dunder()) {
                    (Dispatch::Primitive, _) | (_, None) => ops::unary(*op, &v)?,
                    (Dispatch::Dynamic { .. }, Some(_)) if v.class().is_none() => ops::unary(*op, &v)?,
                    (_, Some(dunder)) => self.call_method(v, dunder, Vec::new())?,
                }
            }
            LExpr::Compare { op, left, right, dispatch } => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                Value::Bool(self.compare(*op, dispatch, l, r)?)
            }
            LExpr::Logical { op, left, right } => {
                let l = self.eval(frame, left)?.truthy();
                let result = match op {
                    BoolOp::And => l && self.eval(frame, right)?.truthy(),
                    BoolOp::Or => l || self.eval(frame, right)?.truthy(),
                };
                Value::Bool(result)
            }
            LExpr::Not(v) => Value::Bool(!self.eval(frame, v)?.truthy()),
            LExpr::Identity { left, right, negated } => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                Value::Bool(l.identical(&r) != *negated)
            }
            LExpr::IsInstance { value, test, .. } => {
                let v = self.eval(frame, value)?;
                Value::Bool(self.tag_test(frame, &v, test))
            }
            LExpr::StaticBool(b) => Value::Bool(*b),
            LExpr::SameClass { left, right } => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                Value::Bool(l.class().is_some() && l.class() == r.class())
            }
            LExpr::List { items, .. } => Value::list(self.eval_all(frame, items)?),
            LExpr::Set { items, .. } => Value::set(self.eval_all(frame, items)?),
            LExpr::Tuple(items) => Value::tuple(self.eval_all(frame, items)?),
            LExpr::Dict { entries, .. } => {
                let mut map = IndexMap::new();
                for (k, v) in entries {
                    let k = self.eval(frame, k)?;
                    let v = self.eval(frame, v)?;
                    map.insert(k.key(), (k, v));
                }
                Value::dict(map)
            }
            LExpr::TupleGet { value, index } => {
                let v = self.eval(frame, value)?;
                ops::index(&v, &Value::Int(*index as i64))?
            }
            LExpr::Index { value, index } => {
                let v = self.eval(frame, value)?;
                let i = self.eval(frame, index)?;
                ops::index(&v, &i)?
            }
            LExpr::Range { start, stop, step } => {
                let (start, stop, step) = (self.int(frame, start)?, self.int(frame, stop)?, self.int(frame, step)?);
                ops::range(start, stop, step)?
            }
            LExpr::Builtin { func, args } => {
                let args = self.eval_all(frame, args)?;
                ops::builtin(*func, args)?
            }
            LExpr::Print(parts) => {
                let parts = self.eval_all(frame, parts)?;
                let line = parts.iter().map(Value::text).collect::<Vec<_>>().join(" ");
                self.out.push_str(&line);
                self.out.push('\n');
                Value::None
            }
            LExpr::Format { template, args } => {
                let template = self.eval(frame, template)?.text();
                let args = self.eval_all(frame, args)?;
                Value::Str(ops::percent_format(&template, &args)?)
            }
            LExpr::Cast { to, value, .. } => {
                let v = self.eval(frame, value)?;
                ops::cast(to, v)?
            }
            LExpr::Math { func, args } => {
                let args = self.eval_all(frame, args)?;
                ops::math(func, &args)?
            }
            LExpr::MathConst(name) => ops::math_const(name)?,
            LExpr::Unbox { value, to } => {
                let v = self.eval(frame, value)?;
                ops::unbox(to, v)?
            }
            LExpr::DynamicAttr { object, attr } => {
                let o = self.eval(frame, object)?;
                get_field(&o, attr)?
            }
            LExpr::DynamicCall { object, method, args } => {
                let o = self.eval(frame, object)?;
                let args = self.eval_all(frame, args)?;
                self.dynamic_call(o, method, args)?
            }
            LExpr::ContainerCall { receiver, kind, of, method, args } => {
                let recv = self.eval(frame, receiver)?;
                let mut args = self.eval_all(frame, args)?;
                if matches!(recv, Value::Dict(_)) && method == "get" && args.len() == 1 {
                    args.push(self.default_of(&of.arg(1))?);
                }
                ops::container_call(*kind, &recv, method, args)?
            }
            LExpr::Collect { into, source, sorted, .. } => {
                let source = self.eval(frame, source)?;
                ops::collect(*into, &source, *sorted)?
            }
        })
    }

    fn binary(&mut self, op: BinOp, dispatch: &Dispatch, l: Value, r: Value) -> Result<Value> {
        match dispatch {
            Dispatch::Primitive => ops::binary(op, &l, &r),
            Dispatch::Overload { .. } => self.call_method(l, op.dunder(), vec![r]),
            Dispatch::Method { name, .. } => self.call_method(l, name, vec![r]),
            Dispatch::Reflected { name, .. } => self.call_method(r, name, vec![l]),
            Dispatch::Dynamic { name } => {
                if self.has_method(&l, name) {
                    self.call_method(l, name, vec![r])
                } else if self.has_method(&r, op.reflected_dunder()) {
                    self.call_method(r, op.reflected_dunder(), vec![l])
                } else {
                    ops::binary(op, &l, &r)
                }
            }
        }
    }

    fn compare(&mut self, op: CmpOp, dispatch: &Dispatch, l: Value, r: Value) -> Result<bool> {
        let negated = matches!(op, CmpOp::NotIn);
        let (receiver, arg, name) = match (op, dispatch) {
            (_, Dispatch::Primitive) => return ops::compare(op, &l, &r),
            (CmpOp::Is | CmpOp::IsNot, _) => return ops::compare(op, &l, &r),
            (_, Dispatch::Reflected { name, .. }) => (r, l, name.clone()),
            (CmpOp::In | CmpOp::NotIn, _) => (r, l, "__contains__".to_string()),
            (_, Dispatch::Method { name, .. } | Dispatch::Dynamic { name }) => (l, r, name.clone()),
            (_, Dispatch::Overload { .. }) => (l, r, op.dunder().unwrap_or("__eq__").to_string()),
        };
        if self.has_method(&receiver, &name) {
            let hit = self.call_method(receiver, &name, vec![arg])?.truthy();
            return Ok(hit != negated);
        }
        if op == CmpOp::NotEq && self.has_method(&receiver, "__eq__") {
            return Ok(!self.call_method(receiver, "__eq__", vec![arg])?.truthy());
        }
        match op {
            CmpOp::In | CmpOp::NotIn => ops::compare(op, &arg, &receiver),
            _ => ops::compare(op, &receiver, &arg),
        }
    }

    /// Capability-interface call: user methods first, then the behaviour
    /// the runtime gives primitive values.
    fn dynamic_call(&mut self, object: Value, method: &str, args: Vec<Value>) -> Result<Value> {
        if self.has_method(&object, method) {
            return self.call_method(object, method, args);
        }
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::None);
        Ok(match method {
            "__str__" if self.has_method(&object, "__repr__") => self.call_method(object, "__repr__", Vec::new())?,
            "__str__" => Value::Str(object.text()),
            "__repr__" => Value::Str(object.repr()),
            "__bool__" => Value::Bool(object.truthy()),
            "__len__" => ops::builtin(crate::lower::ir::BuiltinFn::Len, vec![object])?,
            "__getitem__" => ops::index(&object, &arg(0))?,
            "__setitem__" => {
                ops::set_index(&object, &arg(0), arg(1))?;
                Value::None
            }
            "__delitem__" => {
                ops::del_item(&object, &arg(0))?;
                Value::None
            }
            "__contains__" => Value::Bool(ops::contains(&object, &arg(0))?),
            "__getattr__" => get_field(&object, &arg(0).text())?,
            "__setattr__" => {
                let mut target = object;
                put_field(&mut target, &arg(0).text(), arg(1))?;
                Value::None
            }
            "__call__" => self.call_value(object, args)?,
            "__enter__" | "__iter__" => object,
            "__exit__" => Value::None,
            "__neg__" => ops::unary(UnaryOp::Neg, &object)?,
            "__pos__" => ops::unary(UnaryOp::Pos, &object)?,
            name => {
                if let Some(op) = binary_of(name) {
                    ops::binary(op, &object, &arg(0))?
                } else if let Some(op) = reflected_of(name) {
                    ops::binary(op, &arg(0), &object)?
                } else if let Some(op) = compare_of(name) {
                    Value::Bool(ops::compare(op, &object, &arg(0))?)
                } else if object.class().is_some() {
                    // Attribute holding a callable.
                    let f = get_field(&object, name)?;
                    self.call_value(f, args)?
                } else {
                    return Err(RunError::raised(
                        "AttributeError",
                        format!("{} has no attribute '{name}'", object.repr()),
                    ));
                }
            }
        })
    }
}

const BINARY_OPS: [BinOp; 7] =
    [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::FloorDiv, BinOp::Mod, BinOp::Pow];

fn binary_of(dunder: &str) -> Option<BinOp> {
    BINARY_OPS.into_iter().find(|op| op.dunder() == dunder)
}

fn reflected_of(dunder: &str) -> Option<BinOp> {
    BINARY_OPS.into_iter().find(|op| op.reflected_dunder() == dunder)
}

fn compare_of(dunder: &str) -> Option<CmpOp> {
    [CmpOp::Eq, CmpOp::NotEq, CmpOp::Lt, CmpOp::LtEq, CmpOp::Gt, CmpOp::GtEq]
        .into_iter()
        .find(|op| op.dunder() == Some(dunder))
}

fn is_place(e: &LExpr) -> bool {
    match e {
        LExpr::Local(_) | LExpr::Global(_) | LExpr::SelfRef { .. } => true,
        LExpr::Field { object, .. } => is_place(object),
        LExpr::Index { value, .. } => is_place(value),
        _ => false,
    }
}

fn missing_attribute(class: &str, field: &str) -> RunError {
    RunError::raised("AttributeError", format!("'{class}' object has no attribute '{field}'"))
}

fn get_field(object: &Value, field: &str) -> Result<Value> {
    match object {
        Value::Object(o) => {
            let o = o.borrow();
            o.fields.get(field).cloned().ok_or_else(|| missing_attribute(&o.class, field))
        }
        Value::Struct(inst) => inst.fields.get(field).cloned().ok_or_else(|| missing_attribute(&inst.class, field)),
        Value::None => Err(RunError::raised("AttributeError", format!("'NoneType' object has no attribute '{field}'"))),
        other => Err(RunError::raised("AttributeError", format!("{} has no attribute '{field}'", other.repr()))),
    }
}

fn put_field(slot: &mut Value, field: &str, value: Value) -> Result<()> {
    match slot {
        Value::Object(o) => {
            o.borrow_mut().fields.insert(field.to_string(), value);
        }
        Value::Struct(inst) => {
            inst.fields.insert(field.to_string(), value);
        }
        other => {
            return Err(RunError::raised("AttributeError", format!("cannot set '{field}' on {}", other.repr())));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{lower_sources, SourceFile};

    fn run(src: &str) -> Outcome {
        let modules = lower_sources(&[SourceFile::new("m", src)]).unwrap();
        run_program(&modules, "m")
    }

    fn output(src: &str) -> String {
        let outcome = run(src);
        if let Err(e) = &outcome.result {
            panic!("program failed: {e}\n{}", outcome.output);
        }
        outcome.output
    }

    #[test]
    fn prints_module_level_statements() {
        assert_eq!(output("x = 2\ny = x * 3 + 1\nprint(y, x / 4)\n"), "7 0.5\n");
    }

    #[test]
    fn lists_are_shared_between_names() {
        let src = "def f():\n    a = [1, 2]\n    b = a\n    b.append(3)\n    return len(a)\nprint(f())\n";
        assert_eq!(output(src), "3\n");
    }

    #[test]
    fn value_structs_copy_on_assignment() {
        let src = "\
class P:
    def __init__(self, x):
        self.x = x

def f():
    a = P(1)
    b = a
    b.x = 5
    return a.x

print(f())
";
        assert_eq!(output(src), "1\n");
    }

    #[test]
    fn methods_mutate_value_receivers_in_place() {
        let src = "\
class Counter:
    def __init__(self):
        self.n = 0
    def bump(self):
        self.n = self.n + 1

def f():
    c = Counter()
    c.bump()
    c.bump()
    return c.n

print(f())
";
        assert_eq!(output(src), "2\n");
    }

    #[test]
    fn virtual_dispatch_follows_the_runtime_class() {
        let src = "\
class Shape:
    def area(self):
        return 0.0

class Square(Shape):
    def __init__(self, s):
        self.s = s
    def area(self):
        return self.s * self.s

class Circle(Shape):
    def __init__(self, r):
        self.r = r
    def area(self):
        return 3.0 * self.r * self.r

def total(shapes):
    t = 0.0
    for s in shapes:
        t = t + s.area()
    return t

print(total([Square(2.0), Circle(1.0)]))
";
        assert_eq!(output(src), "7.0\n");
    }

    #[test]
    fn dictionaries_iterate_in_insertion_order() {
        let src = "\
def f():
    d = {}
    d['b'] = 1
    d['a'] = 2
    d['b'] = 3
    out = []
    for k in d:
        out.append(k)
    return out

print(f())
";
        assert_eq!(output(src), "['b', 'a']\n");
    }

    #[test]
    fn raise_reaches_the_top_with_its_message() {
        let outcome = run("def f(x):\n    if x < 0:\n        raise ValueError('negative')\n    return x\nprint(f(1))\nprint(f(-1))\n");
        assert_eq!(outcome.output, "1\n");
        assert!(matches!(outcome.result, Err(RunError::Raised { ref exception, ref message }) if exception == "ValueError" && message == "negative"));
    }

    #[test]
    fn with_blocks_call_exit_once() {
        let src = "\
class Res:
    def __init__(self):
        self.open = True
    def __exit__(self):
        print('closed')

def f():
    with Res() as r:
        print('body')
        return 1
    return 2

print(f())
";
        assert_eq!(output(src), "body\nclosed\n1\n");
    }

    #[test]
    fn runaway_loops_hit_the_step_limit() {
        let modules = lower_sources(&[SourceFile::new("m", "def f():\n    while True:\n        pass\nf()\n")]).unwrap();
        let mut interp = Interpreter::new(&modules).with_limits(Limits { steps: 10_000, depth: 16 });
        assert!(matches!(interp.run_entry("m"), Err(RunError::StepLimit(10_000))));
    }

    #[test]
    fn entry_point_runs_after_initialiser() {
        let src = "print('init')\nif __name__ == '__main__':\n    print('main')\n";
        assert_eq!(output(src), "init\nmain\n");
    }
}
