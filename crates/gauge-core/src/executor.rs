//! Gauge Executor — runs compiled scripts in a budgeted sandbox
//!
//! Each invocation gets a fresh namespace seeded for its mode, its own
//! output buffer, and capabilities pre-bound to one user. Nothing survives
//! between invocations. Faults raised by the script end the run and are
//! recorded on the [`Execution`]; they never escape as host errors.
//!
//! Every run meters itself through one [`Budget`]. The [`Execution`] keeps
//! it so shaping is charged to the same run, and releases the containers
//! the script mutated when it is dropped.

use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::NaiveDate;

use crate::budget::{Budget, SLOT_BYTES};
use crate::builtins::{self, bind_arguments, Builtin};
use crate::capability::{Capabilities, CapabilityFn, DataSource, LookupPolicy, UserId};
use crate::compiler::{CompiledUnit, Mode};
use crate::config::ExecutionLimits;
use crate::error::{Error, FaultKind, Result, RuntimeFault};
use crate::guards::{self, collection_fault};
use crate::ops::{binary_op, unary_op};
use crate::output::OutputBuffer;
use crate::parser::ast::*;
use crate::value::{compare, values_equal, Callable, Dict, Value};

/// Script variables by name, in deterministic order
pub type Namespace = BTreeMap<String, Value>;

// ── Execution Context ─────────────────────────────────────

/// Everything one invocation may touch. Built per call and consumed by
/// [`Sandbox::execute`].
pub struct ExecutionContext<'a> {
    mode: Mode,
    capabilities: Capabilities<'a>,
    today: Option<NaiveDate>,
    output: OutputBuffer,
}

impl<'a> ExecutionContext<'a> {
    /// Decision mode: `today` is seeded and lookups are lenient
    pub fn decision(store: &'a dyn DataSource, user: UserId, today: NaiveDate) -> Self {
        ExecutionContext {
            mode: Mode::Decision,
            capabilities: Capabilities::new(user, store, LookupPolicy::Lenient),
            today: Some(today),
            output: OutputBuffer::default(),
        }
    }

    /// Results mode: no `today`, lookups are strict
    pub fn results(store: &'a dyn DataSource, user: UserId) -> Self {
        ExecutionContext {
            mode: Mode::Results,
            capabilities: Capabilities::new(user, store, LookupPolicy::Strict),
            today: None,
            output: OutputBuffer::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn user(&self) -> UserId {
        self.capabilities.user()
    }

    fn seed(&self) -> Namespace {
        let mut namespace = Namespace::new();
        match self.mode {
            Mode::Decision => {
                namespace.insert("decision".into(), Value::Bool(false));
                if let Some(today) = self.today {
                    namespace.insert("today".into(), Value::Date(today));
                }
            }
            Mode::Results => {
                namespace.insert("results".into(), Value::list(Vec::new()));
            }
        }
        namespace
    }
}

// ── Execution Result ──────────────────────────────────────

/// What one run left behind
#[derive(Debug)]
pub struct Execution {
    mode: Mode,
    namespace: Namespace,
    output: String,
    outcome: std::result::Result<(), RuntimeFault>,
    budget: Budget,
    uses_print: bool,
}

impl Execution {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.namespace.get(name)
    }

    /// Everything the script printed, in order
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn outcome(&self) -> &std::result::Result<(), RuntimeFault> {
        &self.outcome
    }

    pub fn fault(&self) -> Option<&RuntimeFault> {
        self.outcome.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Statements, loop iterations and builtin items charged
    pub fn steps(&self) -> u64 {
        self.budget.steps()
    }

    /// The run's meter; shaping charges its value walks here
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn uses_print(&self) -> bool {
        self.uses_print
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.budget.release();
    }
}

// ── Sandbox ───────────────────────────────────────────────

/// Budgeted interpreter for compiled units
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: ExecutionLimits,
}

impl Sandbox {
    pub fn new(limits: ExecutionLimits) -> Self {
        Sandbox { limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Run a unit to completion.
    ///
    /// # Errors
    /// Only [`Error::ModeMismatch`]; script faults are recorded on the
    /// returned [`Execution`].
    pub fn execute(&self, unit: CompiledUnit, mut ctx: ExecutionContext<'_>) -> Result<Execution> {
        if unit.mode() != ctx.mode {
            return Err(Error::ModeMismatch {
                expected: unit.mode().to_string(),
                found: ctx.mode.to_string(),
            });
        }

        ctx.output.reset();
        ctx.output.set_capacity(self.limits.max_output_bytes);
        tracing::debug!(mode = %ctx.mode, fingerprint = unit.fingerprint(), user = %ctx.user(), "executing script");

        let budget = Budget::new(self.limits.clone());
        let mut interpreter = Interpreter {
            globals: ctx.seed(),
            frames: Vec::new(),
            capabilities: &ctx.capabilities,
            output: &mut ctx.output,
            budget: &budget,
            capability_calls: 0,
        };

        let outcome = match interpreter.exec_block(&unit.program().body) {
            Ok(Flow::Normal) | Ok(Flow::Return(_)) => Ok(()),
            Ok(Flow::Break) | Ok(Flow::Continue) => Err(RuntimeFault::type_error(
                "'break' or 'continue' outside loop",
            )),
            Err(fault) => Err(fault),
        };
        let namespace = std::mem::take(&mut interpreter.globals);
        drop(interpreter);
        let steps = budget.steps();

        match &outcome {
            Ok(()) => tracing::debug!(mode = %ctx.mode, steps, allocated = budget.allocated(), "script finished"),
            Err(fault) => tracing::warn!(
                mode = %ctx.mode,
                steps,
                kind = %fault.kind,
                at = ?fault.span.as_ref().map(|s| s.to_string()),
                "script faulted"
            ),
        }

        Ok(Execution {
            mode: ctx.mode,
            namespace,
            output: ctx.output.collect(),
            outcome,
            budget,
            uses_print: unit.uses_print(),
        })
    }
}

// ── Interpreter ───────────────────────────────────────────

/// Control flow out of a statement
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Interpreter<'c, 'a> {
    globals: Namespace,
    /// Local scopes of active user function calls
    frames: Vec<Namespace>,
    capabilities: &'c Capabilities<'a>,
    output: &'c mut OutputBuffer,
    budget: &'c Budget,
    capability_calls: u64,
}

impl Interpreter<'_, '_> {
    fn step(&mut self) -> std::result::Result<(), RuntimeFault> {
        self.budget.step(1)
    }

    // ── Names ──

    fn scope_mut(&mut self) -> &mut Namespace {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        }
    }

    fn lookup(&self, name: &str) -> std::result::Result<Value, RuntimeFault> {
        if let Some(value) = self.frames.last().and_then(|frame| frame.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(Value::Function(Callable::Builtin(builtin)));
        }
        if let Some(function) = CapabilityFn::lookup(name) {
            return Ok(Value::Function(Callable::Capability(function)));
        }
        Err(RuntimeFault::new(
            FaultKind::Name,
            format!("name '{}' is not defined", name),
        ))
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.scope_mut().insert(name.to_string(), value);
    }

    // ── Statements ──

    fn exec_block(&mut self, body: &[Stmt]) -> std::result::Result<Flow, RuntimeFault> {
        for stmt in body {
            match self.exec(stmt).map_err(|fault| fault.at(&stmt.span))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> std::result::Result<Flow, RuntimeFault> {
        self.step()?;
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
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.is_truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body } => {
                while self.eval(test)?.is_truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                    self.step()?;
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in guards::safe_getiter(&iterable)? {
                    self.step()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                self.bind(&def.name, Value::Function(Callable::User(Rc::clone(def))));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Try { body, handlers } => return self.exec_try(body, handlers),
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Import { module } => {
                return Err(RuntimeFault::type_error(format!(
                    "import of '{}' is not allowed",
                    module
                )))
            }
            StmtKind::Forbidden { construct } => {
                return Err(RuntimeFault::type_error(format!(
                    "'{}' statements are not allowed",
                    construct
                )))
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
    ) -> std::result::Result<Flow, RuntimeFault> {
        let fault = match self.exec_block(body) {
            Ok(flow) => return Ok(flow),
            Err(fault) => fault,
        };
        let handler = handlers.iter().find(|h| match &h.class {
            None => fault.kind.is_catchable(),
            Some(class) => fault.kind.matches(class),
        });
        match handler {
            Some(handler) => {
                tracing::trace!(kind = %fault.kind, "fault handled by script");
                if let Some(binding) = &handler.binding {
                    self.bind(binding, Value::str(fault.message));
                }
                self.exec_block(&handler.body)
            }
            None => Err(fault),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> std::result::Result<(), RuntimeFault> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = guards::materialize(&value, self.budget)?;
                if items.len() > targets.len() {
                    return Err(RuntimeFault::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(RuntimeFault::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            ExprKind::Subscript { value: container, index } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                guards::set_item(&container, index, value, self.budget)
            }
            _ => Err(RuntimeFault::type_error("cannot assign to expression").at(&target.span)),
        }
    }

    fn aug_assign(
        &mut self,
        target: &Expr,
        op: BinOp,
        value: &Expr,
    ) -> std::result::Result<(), RuntimeFault> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.lookup(name)?;
                let operand = self.eval(value)?;
                let updated = self.combine_in_place(current, op, &operand)?;
                self.bind(name, updated);
                Ok(())
            }
            ExprKind::Subscript { value: container, index } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                let current = guards::get_item(&container, &index, self.budget)?;
                let operand = self.eval(value)?;
                let updated = self.combine_in_place(current, op, &operand)?;
                guards::set_item(&container, index, updated, self.budget)
            }
            _ => Err(RuntimeFault::type_error("illegal expression for augmented assignment")),
        }
    }

    /// `current op= operand`; lists extend in place so aliases observe it
    fn combine_in_place(
        &mut self,
        current: Value,
        op: BinOp,
        operand: &Value,
    ) -> std::result::Result<Value, RuntimeFault> {
        if let (Value::List(items), BinOp::Add) = (&current, op) {
            let extra = guards::materialize(operand, self.budget)?;
            self.budget.track_list(items);
            let mut items = items.borrow_mut();
            if items.len() + extra.len() > self.budget.max_collection_len {
                return Err(collection_fault(self.budget.max_collection_len));
            }
            items.extend(extra);
            drop(items);
            return Ok(current);
        }
        binary_op(op, &current, operand, self.budget)
    }

    // ── Expressions ──

    fn eval(&mut self, expr: &Expr) -> std::result::Result<Value, RuntimeFault> {
        self.eval_kind(expr).map_err(|fault| fault.at(&expr.span))
    }

    fn eval_kind(&mut self, expr: &Expr) -> std::result::Result<Value, RuntimeFault> {
        Ok(match &expr.kind {
            ExprKind::None => Value::None,
            ExprKind::Bool(b) => Value::Bool(*b),
            ExprKind::Int(i) => Value::Int(*i),
            ExprKind::Float(f) => Value::Float(*f),
            ExprKind::Str(s) => self.budget.string(s.clone())?,
            ExprKind::Name(name) => self.lookup(name)?,
            ExprKind::List(items) => Value::list(self.eval_items(items)?),
            ExprKind::Tuple(items) => Value::tuple(self.eval_items(items)?),
            ExprKind::Dict(pairs) => {
                self.budget.collection(pairs.len())?;
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value, self.budget)?;
                }
                Value::dict(dict)
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                conditions,
            } => self.eval_list_comp(element, target, iter, conditions)?,
            ExprKind::Attribute { value, name } => {
                let value = self.eval(value)?;
                guards::safe_getattr(&value, name)?
            }
            ExprKind::Subscript { value, index } => {
                let value = self.eval(value)?;
                let index = self.eval(index)?;
                guards::get_item(&value, &index, self.budget)?
            }
            ExprKind::Slice { value, lower, upper } => {
                let value = self.eval(value)?;
                let lower = lower.as_ref().map(|e| self.eval(e)).transpose()?;
                let upper = upper.as_ref().map(|e| self.eval(e)).transpose()?;
                guards::get_slice(&value, lower.as_ref(), upper.as_ref(), self.budget)?
            }
            ExprKind::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let args = self.eval_items(args)?;
                let kwargs = kwargs
                    .iter()
                    .map(|(name, value)| self.eval(value).map(|v| (name.clone(), v)))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.call(callee, args, kwargs)?
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                unary_op(*op, &operand)?
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right, self.budget)?
            }
            ExprKind::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    BoolOp::And => !left.is_truthy(),
                    BoolOp::Or => left.is_truthy(),
                };
                if short_circuit {
                    left
                } else {
                    self.eval(right)?
                }
            }
            ExprKind::Compare { left, ops } => {
                let mut left = self.eval(left)?;
                for (op, right) in ops {
                    let right = self.eval(right)?;
                    if !compare_op(*op, &left, &right, self.budget)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(body)?
                } else {
                    self.eval(orelse)?
                }
            }
        })
    }

    fn eval_items(&mut self, items: &[Expr]) -> std::result::Result<Vec<Value>, RuntimeFault> {
        self.budget.collection(items.len())?;
        items.iter().map(|item| self.eval(item)).collect()
    }

    fn eval_list_comp(
        &mut self,
        element: &Expr,
        target: &Expr,
        iter: &Expr,
        conditions: &[Expr],
    ) -> std::result::Result<Value, RuntimeFault> {
        let iterable = self.eval(iter)?;

        // The loop variable does not leak into the enclosing scope
        let mut names = Vec::new();
        target_names(target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|name| {
                let previous = self.scope_mut().get(&name).cloned();
                (name, previous)
            })
            .collect();

        let result = self.run_comprehension(element, target, &iterable, conditions);

        let scope = self.scope_mut();
        for (name, previous) in saved {
            match previous {
                Some(value) => scope.insert(name, value),
                None => scope.remove(&name),
            };
        }
        result.map(Value::list)
    }

    fn run_comprehension(
        &mut self,
        element: &Expr,
        target: &Expr,
        iterable: &Value,
        conditions: &[Expr],
    ) -> std::result::Result<Vec<Value>, RuntimeFault> {
        let mut out = Vec::new();
        'items: for item in guards::safe_getiter(iterable)? {
            self.step()?;
            self.assign(target, item)?;
            for condition in conditions {
                if !self.eval(condition)?.is_truthy() {
                    continue 'items;
                }
            }
            if out.len() >= self.budget.max_collection_len {
                return Err(collection_fault(self.budget.max_collection_len));
            }
            self.budget.alloc(SLOT_BYTES)?;
            out.push(self.eval(element)?);
        }
        Ok(out)
    }

    // ── Calls ──

    fn call(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> std::result::Result<Value, RuntimeFault> {
        match callee {
            Value::Function(Callable::Builtin(builtin)) => {
                builtins::call(builtin, args, kwargs, self.output, self.budget)
            }
            Value::Function(Callable::Capability(function)) => {
                self.capability_calls += 1;
                if self.capability_calls > self.budget.max_capability_calls {
                    return Err(RuntimeFault::limit(format!(
                        "capability call limit of {} exceeded",
                        self.budget.max_capability_calls
                    )));
                }
                self.capabilities.invoke(function, args, kwargs)
            }
            Value::Function(Callable::Method(receiver, method)) => {
                guards::call_method(&receiver, method, args, kwargs, self.budget)
            }
            Value::Function(Callable::User(def)) => self.call_user(&def, args, kwargs),
            other => Err(RuntimeFault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_user(
        &mut self,
        def: &FunctionDef,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> std::result::Result<Value, RuntimeFault> {
        if self.frames.len() >= self.budget.max_call_depth {
            return Err(RuntimeFault::limit(format!(
                "maximum call depth of {} exceeded",
                self.budget.max_call_depth
            )));
        }
        let values = bind_arguments(&def.name, def.params.as_slice(), args, kwargs)?;
        let frame: Namespace = def.params.iter().cloned().zip(values).collect();

        self.frames.push(frame);
        let flow = self.exec_block(&def.body);
        self.frames.pop();

        Ok(match flow? {
            Flow::Return(value) => value,
            _ => Value::None,
        })
    }
}

fn target_names(target: &Expr, out: &mut Vec<String>) {
    match &target.kind {
        ExprKind::Name(name) => out.push(name.clone()),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                target_names(item, out);
            }
        }
        _ => {}
    }
}

/// `a is b`: identity for shared containers, value identity for scalars
fn is_same(a: &Value, b: &Value, budget: &Budget) -> std::result::Result<bool, RuntimeFault> {
    Ok(match (a, b) {
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Category(x), Value::Category(y)) => Rc::ptr_eq(x, y),
        (Value::Measurement(x), Value::Measurement(y)) => Rc::ptr_eq(x, y),
        _ => a.type_name() == b.type_name() && values_equal(a, b, budget)?,
    })
}

fn compare_op(op: CmpOp, left: &Value, right: &Value, budget: &Budget) -> std::result::Result<bool, RuntimeFault> {
    use std::cmp::Ordering::*;
    let symbol = op.symbol();
    Ok(match op {
        CmpOp::Eq => values_equal(left, right, budget)?,
        CmpOp::NotEq => !values_equal(left, right, budget)?,
        CmpOp::Lt => compare(left, right, symbol, budget)? == Some(Less),
        CmpOp::LtE => matches!(compare(left, right, symbol, budget)?, Some(Less | Equal)),
        CmpOp::Gt => compare(left, right, symbol, budget)? == Some(Greater),
        CmpOp::GtE => matches!(compare(left, right, symbol, budget)?, Some(Greater | Equal)),
        CmpOp::In => guards::contains(right, left, budget)?,
        CmpOp::NotIn => !guards::contains(right, left, budget)?,
        CmpOp::Is => is_same(left, right, budget)?,
        CmpOp::IsNot => !is_same(left, right, budget)?,
    })
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CategoryId;
    use crate::compiler::compile;
    use crate::store::InMemoryStore;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn store() -> InMemoryStore {
        InMemoryStore::new()
            .with_category(UserId(1), CategoryId(7), "Biceps", "cm")
            .with_measurement(UserId(1), CategoryId(7), date("2024-03-01"), 31.5)
            .with_measurement(UserId(1), CategoryId(7), date("2024-03-08"), 32.0)
            .with_weight(UserId(1), date("2024-03-08"), 84.5)
            .with_weight(UserId(2), date("2024-03-08"), 60.0)
    }

    fn decide_with(source: &str, store: &InMemoryStore, limits: ExecutionLimits) -> Execution {
        let unit = compile(source, Mode::Decision).unwrap();
        let ctx = ExecutionContext::decision(store, UserId(1), date("2024-03-08"));
        Sandbox::new(limits).execute(unit, ctx).unwrap()
    }

    fn decide(source: &str) -> Execution {
        decide_with(source, &store(), ExecutionLimits::default())
    }

    fn results(source: &str) -> Execution {
        let store = store();
        let unit = compile(source, Mode::Results).unwrap();
        let ctx = ExecutionContext::results(&store, UserId(1));
        Sandbox::default().execute(unit, ctx).unwrap()
    }

    fn var(execution: &Execution, name: &str) -> String {
        execution.get(name).unwrap().to_repr(10_000).unwrap()
    }

    fn fault(execution: &Execution) -> &RuntimeFault {
        execution.fault().expect("expected a fault")
    }

    // ── Seeding ───────────────────────────────────────────

    #[test]
    fn test_decision_namespace_seeded() {
        let execution = decide("");
        assert!(execution.is_ok());
        assert_eq!(var(&execution, "decision"), "False");
        assert_eq!(var(&execution, "today"), "datetime.date(2024, 3, 8)");
        assert!(execution.get("results").is_none());
    }

    #[test]
    fn test_results_namespace_seeded() {
        let execution = results("");
        assert_eq!(var(&execution, "results"), "[]");
        assert!(execution.get("today").is_none());
        assert!(execution.get("decision").is_none());
    }

    #[test]
    fn test_mode_mismatch_is_host_error() {
        let store = store();
        let unit = compile("x = 1", Mode::Results).unwrap();
        let ctx = ExecutionContext::decision(&store, UserId(1), date("2024-03-08"));
        let err = Sandbox::default().execute(unit, ctx).unwrap_err();
        assert!(matches!(err, Error::ModeMismatch { .. }));
    }

    // ── Statements ────────────────────────────────────────

    #[test]
    fn test_weight_threshold_decision() {
        let execution = decide(
            "w = get_weight_by_date(today)\nif w is not None and w > 80:\n    decision = True\n",
        );
        assert!(execution.is_ok());
        assert_eq!(var(&execution, "decision"), "True");
    }

    #[test]
    fn test_loops_break_and_continue() {
        let execution = decide(
            "total = 0\nfor i in range(10):\n    if i % 2:\n        continue\n    if i > 6:\n        break\n    total += i\nn = 0\nwhile n < 5:\n    n += 1\n",
        );
        assert_eq!(var(&execution, "total"), "12");
        assert_eq!(var(&execution, "n"), "5");
    }

    #[test]
    fn test_tuple_unpacking() {
        let execution = decide("a, b = 1, 2\na, b = b, a\nfor k, v in [('x', 1)]:\n    pair = k + str(v)\n");
        assert_eq!(var(&execution, "a"), "2");
        assert_eq!(var(&execution, "b"), "1");
        assert_eq!(var(&execution, "pair"), "'x1'");
        let execution = decide("a, b = [1, 2, 3]");
        assert_eq!(fault(&execution).message, "too many values to unpack (expected 2)");
    }

    #[test]
    fn test_functions_and_scopes() {
        let execution = decide(
            "x = 10\ndef add(a, b):\n    y = a + b + x\n    return y\nz = add(1, b=2)\n",
        );
        assert_eq!(var(&execution, "z"), "13");
        assert!(execution.get("y").is_none());
        assert!(execution.get("a").is_none());
    }

    #[test]
    fn test_function_mutates_shared_list() {
        let execution = results("def emit(v):\n    results.append({'value': v})\nemit(1)\nemit(2)\n");
        assert_eq!(var(&execution, "results"), "[{'value': 1}, {'value': 2}]");
    }

    #[test]
    fn test_augmented_list_add_is_in_place() {
        let execution = decide("a = [1]\nb = a\nb += [2]\nd = {'k': 1}\nd['k'] += 5\n");
        assert_eq!(var(&execution, "a"), "[1, 2]");
        assert_eq!(var(&execution, "d"), "{'k': 6}");
    }

    #[test]
    fn test_list_comprehension_does_not_leak() {
        let execution = decide("i = 'kept'\nsquares = [i * i for i in range(5) if i % 2 == 0]\n");
        assert_eq!(var(&execution, "squares"), "[0, 4, 16]");
        assert_eq!(var(&execution, "i"), "'kept'");
    }

    #[test]
    fn test_chained_comparison_and_short_circuit() {
        let execution = decide("a = 1 < 2 <= 2 < 3\nb = 3 > 2 > 2\nc = None or 'x'\nd = 0 and 1 / 0\n");
        assert_eq!(var(&execution, "a"), "True");
        assert_eq!(var(&execution, "b"), "False");
        assert_eq!(var(&execution, "c"), "'x'");
        assert_eq!(var(&execution, "d"), "0");
    }

    // ── Faults ────────────────────────────────────────────

    #[test]
    fn test_fault_carries_message_and_position() {
        let execution = decide("x = 1\ny = x / 0\n");
        let fault = fault(&execution);
        assert_eq!(fault.kind, FaultKind::ZeroDivision);
        assert_eq!(fault.message, "division by zero");
        assert_eq!(fault.span.as_ref().map(|s| s.line), Some(2));
        // Namespace up to the fault is kept
        assert_eq!(var(&execution, "x"), "1");
    }

    #[test]
    fn test_undefined_name_is_name_error() {
        let execution = decide("decision = missing > 1");
        assert_eq!(fault(&execution).kind, FaultKind::Name);
        assert_eq!(fault(&execution).message, "name 'missing' is not defined");
    }

    #[test]
    fn test_try_except_catches_by_class() {
        let execution = decide(
            "try:\n    x = [][0]\nexcept KeyError:\n    x = 'key'\nexcept LookupError as e:\n    x = e\n",
        );
        assert!(execution.is_ok());
        assert_eq!(var(&execution, "x"), "'list index out of range'");
    }

    #[test]
    fn test_uncaught_class_propagates() {
        let execution = decide("try:\n    x = 1 / 0\nexcept ValueError:\n    x = 0\n");
        assert_eq!(fault(&execution).kind, FaultKind::ZeroDivision);
    }

    #[test]
    fn test_strict_lookup_raises_in_results_mode() {
        let execution = results("w = get_weight_by_date('2020-01-01')");
        assert_eq!(fault(&execution).kind, FaultKind::Lookup);
        assert_eq!(fault(&execution).message, "WeightEntry matching query does not exist.");
    }

    #[test]
    fn test_lenient_lookup_in_decision_mode() {
        let execution = decide("w = get_weight_by_date('2020-01-01')\nc = get_category_by_name('Nope')\n");
        assert!(execution.is_ok());
        assert_eq!(var(&execution, "w"), "None");
        assert_eq!(var(&execution, "c"), "None");
    }

    #[test]
    fn test_capabilities_are_scoped_to_user() {
        // User 2 also logged a weight on that day; user 1 must see their own
        let execution = decide("w = get_weight_by_date(today)");
        assert_eq!(var(&execution, "w"), "84.5");
    }

    #[test]
    fn test_measurement_records() {
        let execution = decide(
            "ms = get_measurements_by_category_name('Biceps')\nlatest = ms[0].value\nname = ms[0].category.name\ndelta = ms[0].date - ms[-1].date\n",
        );
        assert!(execution.is_ok());
        assert_eq!(var(&execution, "latest"), "32.0");
        assert_eq!(var(&execution, "name"), "'Biceps'");
        assert_eq!(var(&execution, "delta"), "datetime.timedelta(days=7)");
    }

    // ── Budgets ───────────────────────────────────────────

    #[test]
    fn test_infinite_loop_hits_step_limit() {
        let limits = ExecutionLimits::default().with_max_steps(1_000);
        let execution = decide_with("while True:\n    pass\n", &store(), limits);
        let fault = fault(&execution);
        assert_eq!(fault.kind, FaultKind::Limit);
        assert_eq!(fault.message, "step limit of 1000 exceeded");
    }

    #[test]
    fn test_limit_fault_cannot_be_caught() {
        let limits = ExecutionLimits::default().with_max_steps(100);
        let execution = decide_with(
            "try:\n    while True:\n        pass\nexcept Exception:\n    decision = True\n",
            &store(),
            limits,
        );
        assert_eq!(fault(&execution).kind, FaultKind::Limit);
        assert_eq!(var(&execution, "decision"), "False");
    }

    #[test]
    fn test_recursion_hits_call_depth() {
        let execution = decide("def f(n):\n    return f(n + 1)\nf(0)\n");
        let fault = fault(&execution);
        assert_eq!(fault.kind, FaultKind::Limit);
        assert!(fault.message.contains("maximum call depth"));
    }

    #[test]
    fn test_capability_call_limit() {
        let limits = ExecutionLimits::default().with_max_capability_calls(3);
        let execution = decide_with(
            "for i in range(10):\n    get_weight_by_date(today)\n",
            &store(),
            limits,
        );
        assert_eq!(fault(&execution).message, "capability call limit of 3 exceeded");
    }

    #[test]
    fn test_collection_limit() {
        let limits = ExecutionLimits::default().with_max_collection_len(100);
        let execution = decide_with("x = list(range(1000))", &store(), limits);
        assert_eq!(fault(&execution).kind, FaultKind::Limit);
    }

    #[test]
    fn test_output_limit() {
        let limits = ExecutionLimits::default().with_max_output_bytes(16);
        let execution = decide_with("for i in range(100):\n    print(i)\n", &store(), limits);
        assert_eq!(fault(&execution).kind, FaultKind::Limit);
        assert!(execution.output().len() <= 16);
    }

    #[test]
    fn test_timeout_ends_unbounded_loop() {
        let limits = ExecutionLimits::default().with_max_steps(u64::MAX).with_timeout_ms(1);
        let execution = decide_with("while True:\n    pass\n", &store(), limits);
        let fault = fault(&execution);
        assert_eq!(fault.kind, FaultKind::Limit);
        assert_eq!(fault.message, "execution exceeded timeout of 1ms");
    }

    #[test]
    fn test_builtins_over_huge_ranges_hit_step_limit() {
        for source in ["x = all(range(1, 3000000000))", "x = sum(range(3000000000))", "x = max(range(3000000000))"] {
            let execution = decide_with(source, &store(), ExecutionLimits::strict());
            let fault = fault(&execution);
            assert_eq!(fault.kind, FaultKind::Limit, "{}", source);
            assert_eq!(fault.message, "step limit of 10000 exceeded");
        }
    }

    #[test]
    fn test_equality_of_shared_subtrees_is_bounded() {
        let limits = ExecutionLimits::default().with_max_steps(2_000);
        let execution = decide_with(
            "a = [0]\nb = [0]\nfor i in range(40):\n    a = [a, a]\n    b = [b, b]\nsame = a == b\n",
            &store(),
            limits,
        );
        let fault = fault(&execution);
        assert_eq!(fault.kind, FaultKind::Limit);
        assert!(fault.message.starts_with("value traversal exceeded"), "{}", fault.message);
        assert!(execution.get("same").is_none());
    }

    #[test]
    fn test_repeated_string_is_shared_not_copied() {
        let execution = decide("s = 'x' * 1000000\nl = [s] * 2000\n");
        assert!(execution.is_ok());
        let Some(Value::List(items)) = execution.get("l") else {
            panic!("expected a list");
        };
        let items = items.borrow();
        assert_eq!(items.len(), 2000);
        match (&items[0], &items[1999]) {
            (Value::Str(a), Value::Str(b)) => assert!(Rc::ptr_eq(a, b)),
            other => panic!("expected strings, got {:?}", other),
        }
        assert!(execution.budget().allocated() < 2_000_000);
    }

    #[test]
    fn test_allocation_budget_bounds_distinct_strings() {
        let limits = ExecutionLimits::default().with_max_memory_bytes(4_000_000);
        let execution = decide_with(
            "s = 'x' * 100000\nl = [s + str(i) for i in range(100)]\n",
            &store(),
            limits,
        );
        let fault = fault(&execution);
        assert_eq!(fault.kind, FaultKind::Limit);
        assert_eq!(fault.message, "allocation budget of 4000000 bytes exceeded");
    }

    #[test]
    fn test_self_referencing_containers_are_freed_with_execution() {
        let execution = decide("a = []\na.append(a)\nd = {'items': []}\nd['items'].append(d)\n");
        assert!(execution.is_ok());
        let (Some(Value::List(a)), Some(Value::Dict(d))) = (execution.get("a"), execution.get("d")) else {
            panic!("expected a list and a dict");
        };
        let (a, d) = (Rc::downgrade(a), Rc::downgrade(d));
        drop(execution);
        assert!(a.upgrade().is_none());
        assert!(d.upgrade().is_none());
    }

    // ── Output & determinism ──────────────────────────────

    #[test]
    fn test_print_output_collected_in_order() {
        let execution = decide("print('a', 1)\nprint('b', end='')\n");
        assert_eq!(execution.output(), "a 1\nb");
        assert!(execution.uses_print());
    }

    #[test]
    fn test_fresh_context_per_invocation() {
        let store = store();
        let first = decide_with("print('once')\nleaked = 1\n", &store, ExecutionLimits::default());
        let second = decide_with("x = 1", &store, ExecutionLimits::default());
        assert_eq!(first.output(), "once\n");
        assert_eq!(second.output(), "");
        assert!(second.get("leaked").is_none());
    }

    #[test]
    fn test_determinism_100_iterations() {
        let source = "ms = get_measurements_by_category_name('Biceps')\nvals = sorted([m.value for m in ms])\nprint(vals, sum(vals) / len(vals))\ndecision = vals[-1] > 31\n";
        let store = store();
        let first = decide_with(source, &store, ExecutionLimits::default());
        for _ in 0..100 {
            let again = decide_with(source, &store, ExecutionLimits::default());
            assert_eq!(again.output(), first.output());
            assert_eq!(var(&again, "decision"), var(&first, "decision"));
            assert_eq!(again.steps(), first.steps());
        }
    }
}
