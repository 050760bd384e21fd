//! Environments and the frame-machine evaluator.
//!
//! ## Environments
//!
//! An environment is itself a heap value: a pair `(parent . bindings)`
//! whose bindings are a list of `(symbol . value)` pairs. Lookup walks the
//! binding list innermost-out and then ascends the parent chain; `define`
//! always targets the innermost frame, rebinding in place or prepending a
//! fresh binding. Because closures capture the environment *pair* by
//! handle, definitions added to a frame after a closure was created are
//! visible through it - which is exactly what makes recursive and mutually
//! recursive functions work.
//!
//! ## The evaluator
//!
//! [`Interp::eval`] is an iterative tree-walker. Instead of recursing on
//! the host stack it keeps an explicit stack of 6-slot continuation
//! frames, themselves pair chains on the heap (so the evaluation stack
//! participates in reclamation like everything else):
//!
//! | slot | meaning                                             |
//! |------|-----------------------------------------------------|
//! | 0    | parent frame, or `nil` at the bottom                |
//! | 1    | environment of the form being evaluated             |
//! | 2    | operator: `nil` while it is still being evaluated,  |
//! |      | the resolved procedure, or a special-form symbol    |
//! | 3    | argument expressions still pending, in source order |
//! | 4    | evaluated arguments, accumulated in reverse         |
//! | 5    | remaining body expressions of a running closure     |
//!
//! Each loop iteration evaluates one expression; when a value is produced
//! and frames remain, the return dispatcher advances the topmost frame.
//! Closure application *reuses* the current frame rather than pushing a
//! new one, and the selected arm of `if`, the last body expression, the
//! RHS of `define`, and the target of `apply` are all dispatched with the
//! frame already popped - together this yields proper tail-call
//! elimination: a million-step tail recursion runs in constant stack and
//! bounded heap.
//!
//! Macro calls take a different path through the same machinery: when the
//! operator turns out to be a macro, the *unevaluated* pending arguments
//! are bound as if calling a closure, and the value its body returns
//! becomes the new expression, re-evaluated in the caller's environment.
//!
//! Special forms (`quote`, `define`, `lambda`, `if`, `defmacro`, `apply`,
//! `and`) are recognized by interned-symbol identity before the operator
//! is evaluated, so rebinding those names does not change how operator
//! position parses them.

use crate::ast::{DisplayValue, Value};
use crate::builtinops::BUILTIN_OPS;
use crate::heap::Heap;
use crate::reader::{self, ReadResult};
use crate::{Error, GC_INTERVAL};

// Frame slot indices; see the module docs for the layout.
const FRAME_PARENT: usize = 0;
const FRAME_ENV: usize = 1;
const FRAME_OP: usize = 2;
const FRAME_PENDING: usize = 3;
const FRAME_ARGS: usize = 4;
const FRAME_BODY: usize = 5;

/// Interned symbols the evaluator recognizes by identity.
struct Specials {
    t: Value,
    quote: Value,
    define: Value,
    lambda: Value,
    if_: Value,
    defmacro: Value,
    apply: Value,
    and: Value,
}

/// Create a fresh, empty environment frame under `parent`.
pub(crate) fn env_create(heap: &mut Heap, parent: Value) -> Value {
    heap.cons(parent, Value::Nil)
}

/// Look `symbol` up, innermost frame first. Symbols compare by identity.
pub(crate) fn env_get(heap: &Heap, mut env: Value, symbol: Value) -> Result<Value, Error> {
    loop {
        let mut bindings = heap.cdr(env);
        while !bindings.is_nil() {
            let binding = heap.car(bindings);
            if heap.car(binding) == symbol {
                return Ok(heap.cdr(binding));
            }
            bindings = heap.cdr(bindings);
        }
        env = heap.car(env);
        if env.is_nil() {
            return Err(Error::Unbound);
        }
    }
}

/// Bind `symbol` in exactly this frame: rebind in place when it is already
/// bound here, otherwise prepend a new binding. Never ascends to parents.
pub(crate) fn env_set(heap: &mut Heap, env: Value, symbol: Value, value: Value) {
    let mut bindings = heap.cdr(env);
    while !bindings.is_nil() {
        let binding = heap.car(bindings);
        if heap.car(binding) == symbol {
            heap.set_cdr(binding, value);
            return;
        }
        bindings = heap.cdr(bindings);
    }
    let binding = heap.cons(symbol, value);
    let bindings = heap.cdr(env);
    let extended = heap.cons(binding, bindings);
    heap.set_cdr(env, extended);
}

/// Build a closure value capturing `env`. The body must be a proper list;
/// params may be a proper list of symbols, a bare rest symbol, or a dotted
/// combination of the two.
fn make_closure(heap: &mut Heap, env: Value, params: Value, body: Value) -> Result<Value, Error> {
    if !heap.is_proper_list(body) {
        return Err(Error::Syntax);
    }
    let mut p = params;
    loop {
        match p {
            Value::Nil | Value::Symbol(_) => break,
            Value::Pair(_) => {
                if !matches!(heap.car(p), Value::Symbol(_)) {
                    return Err(Error::Type);
                }
                p = heap.cdr(p);
            }
            _ => return Err(Error::Type),
        }
    }
    let tail = heap.cons(params, body);
    Ok(Value::Closure(heap.alloc(env, tail)))
}

/// Bind formals to actuals in `env`. A bare trailing symbol captures the
/// remaining actuals as a list; otherwise counts must match exactly.
fn bind_params(heap: &mut Heap, env: Value, mut params: Value, mut args: Value) -> Result<(), Error> {
    while !params.is_nil() {
        if let Value::Symbol(_) = params {
            env_set(heap, env, params, args);
            return Ok(());
        }
        // Non-symbol tails were rejected when the closure was created.
        if args.is_nil() {
            return Err(Error::Args);
        }
        let formal = heap.car(params);
        let actual = heap.car(args);
        env_set(heap, env, formal, actual);
        params = heap.cdr(params);
        args = heap.cdr(args);
    }
    if !args.is_nil() {
        return Err(Error::Args);
    }
    Ok(())
}

fn make_frame(heap: &mut Heap, parent: Value, env: Value, pending: Value) -> Value {
    heap.list_from_slice(&[parent, env, Value::Nil, pending, Value::Nil, Value::Nil])
}

/// The interpreter: heap, root environment, and the evaluation machine.
pub struct Interp {
    pub(crate) heap: Heap,
    specials: Specials,
    root_env: Value,
    /// Main-loop iterations since the last periodic collection; shared
    /// across nested evaluations like the trigger it throttles.
    steps: usize,
    /// One `[expr, env, stack]` entry per active `eval` call, kept current
    /// so that a collection triggered in a nested evaluation still sees
    /// every suspended evaluation's live data.
    eval_roots: Vec<[Value; 3]>,
    /// Values registered by callers that must survive collections, e.g.
    /// the REPL's remaining forms of a multi-form line.
    protected: Vec<Value>,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    /// A fresh interpreter: empty heap, builtins installed in the root
    /// environment, and `t` bound to itself.
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let specials = Specials {
            t: heap.intern("t"),
            quote: heap.intern("quote"),
            define: heap.intern("define"),
            lambda: heap.intern("lambda"),
            if_: heap.intern("if"),
            defmacro: heap.intern("defmacro"),
            apply: heap.intern("apply"),
            and: heap.intern("and"),
        };
        let root_env = env_create(&mut heap, Value::Nil);
        for op in BUILTIN_OPS {
            let name = heap.intern(op.name);
            env_set(&mut heap, root_env, name, Value::Builtin(*op));
        }
        env_set(&mut heap, root_env, specials.t, specials.t);
        Interp {
            heap,
            specials,
            root_env,
            steps: 0,
            eval_roots: Vec::new(),
            protected: Vec::new(),
        }
    }

    /// The top-level environment builtins and user definitions live in.
    pub fn root_env(&self) -> Value {
        self.root_env
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Intern a symbol name.
    pub fn intern(&mut self, name: &str) -> Value {
        self.heap.intern(name)
    }

    /// The canonical true value, the symbol `t`.
    pub(crate) fn true_value(&self) -> Value {
        self.specials.t
    }

    /// Read one expression from `input`; see [`reader::read_expr`].
    pub fn read<'a>(&mut self, input: &'a str) -> ReadResult<'a> {
        reader::read_expr(&mut self.heap, input)
    }

    /// Readable rendering of `value`.
    pub fn display(&self, value: Value) -> DisplayValue<'_> {
        self.heap.display(value)
    }

    /// Keep `value` alive across collections until the matching
    /// [`Interp::unprotect`].
    pub fn protect(&mut self, value: Value) {
        self.protected.push(value);
    }

    pub fn unprotect(&mut self) {
        self.protected.pop();
    }

    /// Mark everything reachable from the root environment, every active
    /// evaluation, every protected value, and `extra`; sweep the rest.
    pub fn collect(&mut self, extra: &[Value]) {
        let mut roots: Vec<Value> =
            Vec::with_capacity(1 + 3 * self.eval_roots.len() + self.protected.len() + extra.len());
        roots.push(self.root_env);
        roots.extend(self.eval_roots.iter().flatten().copied());
        roots.extend_from_slice(&self.protected);
        roots.extend_from_slice(extra);
        self.heap.collect(&roots);
    }

    /// Read and evaluate every form in `source` in the root environment,
    /// collecting after each; returns the last form's value.
    pub fn eval_source(&mut self, source: &str) -> Result<Value, Error> {
        let mut rest = source;
        let mut last = Value::Nil;
        while !reader::is_blank(rest) {
            let (form, next) = reader::read_expr(&mut self.heap, rest)?;
            rest = next;
            let root = self.root_env;
            last = self.eval(form, root)?;
            self.collect(&[last]);
        }
        Ok(last)
    }

    /// Evaluate `expr` in `env`.
    pub fn eval(&mut self, expr: Value, env: Value) -> Result<Value, Error> {
        let slot = self.eval_roots.len();
        self.eval_roots.push([expr, env, Value::Nil]);
        let outcome = self.eval_loop(slot, expr, env);
        self.eval_roots.truncate(slot);
        outcome
    }

    fn eval_loop(&mut self, slot: usize, mut expr: Value, mut env: Value) -> Result<Value, Error> {
        let mut stack = Value::Nil;
        let mut result = Value::Nil;
        loop {
            // Everything live in this evaluation is reachable from these
            // three values; keep the root slot current before anything can
            // trigger a collection.
            self.eval_roots[slot] = [expr, env, stack];
            self.steps += 1;
            if self.steps >= GC_INTERVAL {
                self.steps = 0;
                self.collect(&[result]);
            }

            let current = expr;
            let produced: Option<Value> = match current {
                Value::Symbol(_) => Some(env_get(&self.heap, env, current)?),
                Value::Pair(_) => {
                    if !self.heap.is_proper_list(current) {
                        return Err(Error::Syntax);
                    }
                    self.dispatch(&mut expr, &mut env, &mut stack)?
                }
                atom => Some(atom),
            };

            match produced {
                None => continue,
                Some(value) => {
                    result = value;
                    if stack.is_nil() {
                        return Ok(result);
                    }
                    self.do_return(&mut stack, &mut expr, &mut env, &mut result)?;
                }
            }
        }
    }

    /// Application dispatch for a proper-list form. Either produces a value
    /// immediately (`Some`), or updates `expr`/`env`/`stack` so the loop
    /// continues with the next expression to evaluate (`None`).
    fn dispatch(
        &mut self,
        expr: &mut Value,
        env: &mut Value,
        stack: &mut Value,
    ) -> Result<Option<Value>, Error> {
        let form = *expr;
        let op = self.heap.car(form);
        let args = self.heap.cdr(form);

        if let Value::Symbol(_) = op {
            if op == self.specials.quote {
                let [quoted] = self.heap.take_args::<1>(args)?;
                return Ok(Some(quoted));
            }
            if op == self.specials.define {
                if args.is_nil() || self.heap.cdr(args).is_nil() {
                    return Err(Error::Args);
                }
                let target = self.heap.car(args);
                let rest = self.heap.cdr(args);
                return match target {
                    // (define (name . params) body...) completes at once
                    Value::Pair(_) => {
                        let name = self.heap.car(target);
                        if !matches!(name, Value::Symbol(_)) {
                            return Err(Error::Type);
                        }
                        let params = self.heap.cdr(target);
                        let closure = make_closure(&mut self.heap, *env, params, rest)?;
                        env_set(&mut self.heap, *env, name, closure);
                        Ok(Some(name))
                    }
                    // (define sym value-expr): evaluate the RHS in tail
                    // context under a frame that remembers the target
                    Value::Symbol(_) => {
                        if !self.heap.cdr(rest).is_nil() {
                            return Err(Error::Args);
                        }
                        *stack = make_frame(&mut self.heap, *stack, *env, Value::Nil);
                        self.heap.list_set(*stack, FRAME_OP, self.specials.define);
                        self.heap.list_set(*stack, FRAME_ARGS, target);
                        *expr = self.heap.car(rest);
                        Ok(None)
                    }
                    _ => Err(Error::Type),
                };
            }
            if op == self.specials.lambda {
                if args.is_nil() || self.heap.cdr(args).is_nil() {
                    return Err(Error::Args);
                }
                let params = self.heap.car(args);
                let body = self.heap.cdr(args);
                let closure = make_closure(&mut self.heap, *env, params, body)?;
                return Ok(Some(closure));
            }
            if op == self.specials.if_ {
                let [test, _then, _else] = self.heap.take_args::<3>(args)?;
                let arms = self.heap.cdr(args);
                *stack = make_frame(&mut self.heap, *stack, *env, arms);
                self.heap.list_set(*stack, FRAME_OP, self.specials.if_);
                *expr = test;
                return Ok(None);
            }
            if op == self.specials.defmacro {
                // (defmacro (name . params) body...)
                if args.is_nil() || self.heap.cdr(args).is_nil() {
                    return Err(Error::Args);
                }
                let head = self.heap.car(args);
                if !matches!(head, Value::Pair(_)) {
                    return Err(Error::Syntax);
                }
                let name = self.heap.car(head);
                if !matches!(name, Value::Symbol(_)) {
                    return Err(Error::Type);
                }
                let params = self.heap.cdr(head);
                let body = self.heap.cdr(args);
                let closure = make_closure(&mut self.heap, *env, params, body)?;
                let macro_value = match closure {
                    Value::Closure(cell) => Value::Macro(cell),
                    other => other,
                };
                env_set(&mut self.heap, *env, name, macro_value);
                return Ok(Some(name));
            }
            if op == self.specials.apply {
                let [proc_expr, _list_expr] = self.heap.take_args::<2>(args)?;
                let pending = self.heap.cdr(args);
                *stack = make_frame(&mut self.heap, *stack, *env, pending);
                self.heap.list_set(*stack, FRAME_OP, self.specials.apply);
                *expr = proc_expr;
                return Ok(None);
            }
            if op == self.specials.and {
                // Left to right; the first nil wins, the last argument is
                // evaluated in tail position, the empty form is true.
                if args.is_nil() {
                    return Ok(Some(self.specials.t));
                }
                let first = self.heap.car(args);
                let rest = self.heap.cdr(args);
                if rest.is_nil() {
                    *expr = first;
                    return Ok(None);
                }
                *stack = make_frame(&mut self.heap, *stack, *env, rest);
                self.heap.list_set(*stack, FRAME_OP, self.specials.and);
                *expr = first;
                return Ok(None);
            }
        }

        if let Value::Builtin(op) = op {
            // A builtin directly in operator position is invoked with the
            // raw argument list; the return dispatcher re-enters here after
            // evaluating arguments for the ordinary path.
            return (op.func)(self, args).map(Some);
        }

        // Ordinary application: evaluate the operator first.
        *stack = make_frame(&mut self.heap, *stack, *env, args);
        *expr = op;
        Ok(None)
    }

    /// Advance the topmost frame with the value just produced.
    fn do_return(
        &mut self,
        stack: &mut Value,
        expr: &mut Value,
        env: &mut Value,
        result: &mut Value,
    ) -> Result<(), Error> {
        *env = self.heap.list_get(*stack, FRAME_ENV);
        let op = self.heap.list_get(*stack, FRAME_OP);
        let body = self.heap.list_get(*stack, FRAME_BODY);

        if !body.is_nil() {
            // Mid-body value of a running closure; ignored.
            return self.do_apply(stack, expr, env);
        }

        if op.is_nil() {
            // The operator itself just finished evaluating.
            let op = *result;
            self.heap.list_set(*stack, FRAME_OP, op);
            if let Value::Macro(cell) = op {
                // Macro call: bind the *unevaluated* pending arguments by
                // running the macro as a closure in a fresh frame.
                let raw_args = self.heap.list_get(*stack, FRAME_PENDING);
                *stack = make_frame(&mut self.heap, *stack, *env, Value::Nil);
                self.heap.list_set(*stack, FRAME_OP, Value::Closure(cell));
                self.heap.list_set(*stack, FRAME_ARGS, raw_args);
                return self.do_bind(stack, expr, env);
            }
        } else if let Value::Symbol(_) = op {
            if op == self.specials.define {
                let target = self.heap.list_get(*stack, FRAME_ARGS);
                env_set(&mut self.heap, *env, target, *result);
                *stack = self.heap.list_get(*stack, FRAME_PARENT);
                *expr = self.quoted(target);
                return Ok(());
            }
            if op == self.specials.if_ {
                let arms = self.heap.list_get(*stack, FRAME_PENDING);
                *expr = if result.is_nil() {
                    self.heap.list_get(arms, 1)
                } else {
                    self.heap.car(arms)
                };
                *stack = self.heap.list_get(*stack, FRAME_PARENT);
                return Ok(());
            }
            if op == self.specials.and {
                if result.is_nil() {
                    *stack = self.heap.list_get(*stack, FRAME_PARENT);
                    *expr = self.quoted(Value::Nil);
                    return Ok(());
                }
                let pending = self.heap.list_get(*stack, FRAME_PENDING);
                let rest = self.heap.cdr(pending);
                *expr = self.heap.car(pending);
                if rest.is_nil() {
                    // Last argument: tail position.
                    *stack = self.heap.list_get(*stack, FRAME_PARENT);
                } else {
                    self.heap.list_set(*stack, FRAME_PENDING, rest);
                }
                return Ok(());
            }
            // `apply` (and any symbol an operator evaluated to): store the
            // evaluated argument like an ordinary procedure would.
            self.store_arg(*stack, *result);
        } else if let Value::Macro(_) = op {
            // The macro body finished; its value is the expansion,
            // re-evaluated in the caller's environment.
            *expr = *result;
            *stack = self.heap.list_get(*stack, FRAME_PARENT);
            return Ok(());
        } else {
            self.store_arg(*stack, *result);
        }

        let pending = self.heap.list_get(*stack, FRAME_PENDING);
        if pending.is_nil() {
            return self.do_apply(stack, expr, env);
        }
        // Evaluate the next argument.
        *expr = self.heap.car(pending);
        let rest = self.heap.cdr(pending);
        self.heap.list_set(*stack, FRAME_PENDING, rest);
        Ok(())
    }

    fn store_arg(&mut self, stack: Value, value: Value) {
        let acc = self.heap.list_get(stack, FRAME_ARGS);
        let acc = self.heap.cons(value, acc);
        self.heap.list_set(stack, FRAME_ARGS, acc);
    }

    /// All arguments are evaluated; apply the frame's operator.
    fn do_apply(&mut self, stack: &mut Value, expr: &mut Value, env: &mut Value) -> Result<(), Error> {
        let mut op = self.heap.list_get(*stack, FRAME_OP);
        let mut args = self.heap.list_get(*stack, FRAME_ARGS);

        if !args.is_nil() {
            // Arguments accumulated in reverse; restore source order.
            args = self.heap.list_reverse(args);
            self.heap.list_set(*stack, FRAME_ARGS, args);
        }

        if op == self.specials.apply {
            // (apply proc list): replace this frame rather than stacking a
            // new one, preserving the tail-call discipline.
            let parent = self.heap.list_get(*stack, FRAME_PARENT);
            *stack = make_frame(&mut self.heap, parent, *env, Value::Nil);
            op = self.heap.car(args);
            args = self.heap.list_get(args, 1);
            if !self.heap.is_proper_list(args) {
                return Err(Error::Syntax);
            }
            self.heap.list_set(*stack, FRAME_OP, op);
            self.heap.list_set(*stack, FRAME_ARGS, args);
        }

        match op {
            Value::Builtin(_) => {
                // Pop and let the main loop invoke the builtin on the
                // already-evaluated arguments.
                *stack = self.heap.list_get(*stack, FRAME_PARENT);
                *expr = self.heap.cons(op, args);
                Ok(())
            }
            Value::Closure(_) => self.do_bind(stack, expr, env),
            _ => Err(Error::Type),
        }
    }

    /// Enter the frame's closure: fresh environment over the captured one,
    /// formals bound to actuals, body installed. Reusing the frame instead
    /// of pushing is what makes calls in tail position free.
    fn do_bind(&mut self, stack: &mut Value, expr: &mut Value, env: &mut Value) -> Result<(), Error> {
        let body = self.heap.list_get(*stack, FRAME_BODY);
        if !body.is_nil() {
            return self.do_exec(stack, expr, env);
        }

        let op = self.heap.list_get(*stack, FRAME_OP);
        let args = self.heap.list_get(*stack, FRAME_ARGS);
        let captured = self.heap.car(op);
        let rest = self.heap.cdr(op);
        let params = self.heap.car(rest);
        let body = self.heap.cdr(rest);

        let new_env = env_create(&mut self.heap, captured);
        *env = new_env;
        self.heap.list_set(*stack, FRAME_ENV, new_env);
        self.heap.list_set(*stack, FRAME_BODY, body);
        bind_params(&mut self.heap, new_env, params, args)?;
        self.heap.list_set(*stack, FRAME_ARGS, Value::Nil);
        self.do_exec(stack, expr, env)
    }

    /// Step to the next body expression; pop the frame when it is the last
    /// one so it evaluates in tail position.
    fn do_exec(&mut self, stack: &mut Value, expr: &mut Value, env: &mut Value) -> Result<(), Error> {
        *env = self.heap.list_get(*stack, FRAME_ENV);
        let body = self.heap.list_get(*stack, FRAME_BODY);
        *expr = self.heap.car(body);
        let rest = self.heap.cdr(body);
        if rest.is_nil() {
            *stack = self.heap.list_get(*stack, FRAME_PARENT);
        } else {
            self.heap.list_set(*stack, FRAME_BODY, rest);
        }
        Ok(())
    }

    /// `(quote value)`, used to hand a finished value back through the
    /// main loop as an expression.
    fn quoted(&mut self, value: Value) -> Value {
        let quote = self.specials.quote;
        self.heap.list_from_slice(&[quote, value])
    }

    /// Direct application, used by the first-class `apply` builtin. For
    /// closures this re-enters the evaluator once per body expression; the
    /// operator-position `apply` special form never comes through here.
    pub(crate) fn apply(&mut self, func: Value, args: Value) -> Result<Value, Error> {
        match func {
            Value::Builtin(op) => (op.func)(self, args),
            Value::Closure(_) => {
                let captured = self.heap.car(func);
                let rest = self.heap.cdr(func);
                let params = self.heap.car(rest);
                let mut body = self.heap.cdr(rest);
                let env = env_create(&mut self.heap, captured);
                bind_params(&mut self.heap, env, params, args)?;
                let mut result = Value::Nil;
                while !body.is_nil() {
                    let form = self.heap.car(body);
                    result = self.eval(form, env)?;
                    body = self.heap.cdr(body);
                }
                Ok(result)
            }
            _ => Err(Error::Type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Expected {
        Prints(&'static str),
        Fails(Error),
    }
    use Expected::*;

    /// Evaluate each case in one shared interpreter, comparing the printed
    /// result (or error kind) against the expectation.
    fn run_session(interp: &mut Interp, cases: &[(&str, Expected)]) {
        for (i, (input, expected)) in cases.iter().enumerate() {
            let outcome = interp.eval_source(input);
            match (outcome, expected) {
                (Ok(value), Prints(text)) => {
                    let shown = interp.display(value).to_string();
                    assert_eq!(&shown, text, "case #{}: {input}", i + 1);
                }
                (Err(err), Fails(kind)) => {
                    assert_eq!(err, *kind, "case #{}: {input}", i + 1);
                }
                (Ok(value), Fails(kind)) => panic!(
                    "case #{}: {input}: expected {kind:?}, got {}",
                    i + 1,
                    interp.display(value)
                ),
                (Err(err), Prints(text)) => {
                    panic!("case #{}: {input}: expected {text}, got error {err:?}", i + 1)
                }
            }
        }
    }

    /// Each case in a fresh interpreter.
    fn run_isolated(cases: &[(&str, Expected)]) {
        for case in cases {
            run_session(&mut Interp::new(), std::slice::from_ref(case));
        }
    }

    fn with_prelude() -> Interp {
        let mut interp = Interp::new();
        interp
            .eval_source(include_str!("../library.lisp"))
            .expect("prelude must evaluate");
        interp
    }

    #[test]
    fn test_self_evaluating_and_lookup() {
        run_isolated(&[
            ("42", Prints("42")),
            ("-7", Prints("-7")),
            ("nil", Prints("nil")),
            ("t", Prints("t")),
            ("car", Prints("#<BUILTIN:car>")),
            ("no-such-thing", Fails(Error::Unbound)),
        ]);
    }

    #[test]
    fn test_quote() {
        run_isolated(&[
            ("(quote a)", Prints("a")),
            ("'a", Prints("a")),
            ("'(1 2 3)", Prints("(1 2 3)")),
            ("''a", Prints("(quote a)")),
            ("'(1 . 2)", Prints("(1 . 2)")),
            ("(quote)", Fails(Error::Args)),
            ("(quote a b)", Fails(Error::Args)),
        ]);
    }

    #[test]
    fn test_if_and_truthiness() {
        run_isolated(&[
            ("(if t 1 2)", Prints("1")),
            ("(if nil 1 2)", Prints("2")),
            // Anything that is not nil is true, including zero
            ("(if 0 'yes 'no)", Prints("yes")),
            ("(if '(1) 'yes 'no)", Prints("yes")),
            ("(if (= 1 2) 'yes 'no)", Prints("no")),
            ("(if t 1)", Fails(Error::Args)),
            ("(if t 1 2 3)", Fails(Error::Args)),
            // Only the selected arm is evaluated
            ("(if t 'ok (undefined))", Prints("ok")),
            ("(if nil (undefined) 'ok)", Prints("ok")),
        ]);
    }

    #[test]
    fn test_define_contract() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                // define returns the defined symbol
                ("(define x 42)", Prints("x")),
                ("x", Prints("42")),
                ("(+ x 8)", Prints("50")),
                ("(define x 100)", Prints("x")),
                ("x", Prints("100")),
                // function shorthand
                ("(define (square n) (* n n))", Prints("square")),
                ("(square 9)", Prints("81")),
                // the RHS is evaluated, and errors propagate
                ("(define y (+ 1 'a))", Fails(Error::Type)),
                ("y", Fails(Error::Unbound)),
            ],
        );
        run_isolated(&[
            ("(define 1 2)", Fails(Error::Type)),
            ("(define x)", Fails(Error::Args)),
            ("(define x 1 2)", Fails(Error::Args)),
            ("(define (1 y) y)", Fails(Error::Type)),
        ]);
    }

    #[test]
    fn test_lambda_and_scope() {
        run_isolated(&[
            ("((lambda (x) x) 7)", Prints("7")),
            ("((lambda (x y) (+ x y)) 3 4)", Prints("7")),
            ("((lambda () 42))", Prints("42")),
            // Shadowing: innermost binding wins; outer capture is lexical
            ("((lambda (x) ((lambda (x) x) 2)) 1)", Prints("2")),
            ("((lambda (x) ((lambda (y) x) 2)) 1)", Prints("1")),
            // Rest parameters
            ("((lambda args args) 1 2 3)", Prints("(1 2 3)")),
            ("((lambda args args))", Prints("nil")),
            ("((lambda (a . rest) rest) 1 2 3)", Prints("(2 3)")),
            ("((lambda (a . rest) a) 1)", Prints("1")),
            // Arity
            ("((lambda (x) x))", Fails(Error::Args)),
            ("((lambda (x) x) 1 2)", Fails(Error::Args)),
            ("((lambda (a . rest) a))", Fails(Error::Args)),
            // Malformed lambdas
            ("(lambda (x))", Fails(Error::Args)),
            ("(lambda)", Fails(Error::Args)),
            ("(lambda (1) 2)", Fails(Error::Type)),
            // Multi-expression bodies evaluate in order
            ("((lambda (x) (define y 5) (+ x y)) 1)", Prints("6")),
        ]);
    }

    #[test]
    fn test_closures_capture_environment() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                ("(define (make-adder n) (lambda (x) (+ x n)))", Prints("make-adder")),
                ("(define add5 (make-adder 5))", Prints("add5")),
                ("(add5 3)", Prints("8")),
                ("(add5 30)", Prints("35")),
                ("((make-adder 3) 7)", Prints("10")),
            ],
        );
    }

    #[test]
    fn test_application_errors() {
        run_isolated(&[
            ("(1 2)", Fails(Error::Type)),
            ("((quote foo) 1)", Fails(Error::Type)),
            ("(undef)", Fails(Error::Unbound)),
            ("(1 . 2)", Fails(Error::Syntax)),
            ("((lambda (x) x) . 3)", Fails(Error::Syntax)),
        ]);
    }

    #[test]
    fn test_recursion() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                (
                    "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))",
                    Prints("fact"),
                ),
                ("(fact 6)", Prints("720")),
                ("(fact 10)", Prints("3628800")),
            ],
        );
    }

    #[test]
    fn test_tail_calls_run_in_constant_stack() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                (
                    "(define (count n) (if (= n 0) 'done (count (- n 1))))",
                    Prints("count"),
                ),
                ("(count 1000000)", Prints("done")),
            ],
        );
    }

    #[test]
    fn test_mutual_tail_recursion() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                ("(define (even? n) (if (= n 0) t (odd? (- n 1))))", Prints("even?")),
                ("(define (odd? n) (if (= n 0) nil (even? (- n 1))))", Prints("odd?")),
                ("(even? 100000)", Prints("t")),
                ("(odd? 100001)", Prints("t")),
                ("(even? 100001)", Prints("nil")),
            ],
        );
    }

    #[test]
    fn test_collection_preserves_live_data_under_load() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                (
                    "(define (build n acc) (if (= n 0) acc (build (- n 1) (cons n acc))))",
                    Prints("build"),
                ),
                // Enough allocation to cross several periodic collections
                // while the accumulator must stay alive.
                ("(define l (build 100000 nil))", Prints("l")),
                ("(car l)", Prints("1")),
                ("(car (cdr l))", Prints("2")),
            ],
        );
    }

    #[test]
    fn test_heap_stays_bounded_across_deep_recursion() {
        let mut interp = Interp::new();
        interp
            .eval_source("(define (count n) (if (= n 0) 'done (count (- n 1)))) (count 1000000)")
            .unwrap();
        // Frames and argument lists from a million calls must have been
        // reclaimed; only the root environment remains.
        assert!(
            interp.heap().live_cells() < 500,
            "live cells: {}",
            interp.heap().live_cells()
        );
    }

    #[test]
    fn test_macros_expand_and_reevaluate() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                ("(defmacro (m) '(+ 1 2))", Prints("m")),
                // the expansion is evaluated, not returned as data
                ("(m)", Prints("3")),
                // arguments arrive unevaluated
                ("(defmacro (twice x) (cons '+ (cons x (cons x nil))))", Prints("twice")),
                ("(twice 21)", Prints("42")),
                ("(twice (* 2 10))", Prints("40")),
                // malformed defmacro
                ("(defmacro m '(+ 1 2))", Fails(Error::Syntax)),
                ("(defmacro (1) 'x)", Fails(Error::Type)),
                ("(defmacro (m))", Fails(Error::Args)),
            ],
        );
    }

    #[test]
    fn test_apply_special_form() {
        run_isolated(&[
            ("(apply + '(1 2))", Prints("3")),
            ("(apply cons '(1 2))", Prints("(1 . 2)")),
            ("(apply (lambda (a b) (- a b)) '(10 4))", Prints("6")),
            ("(apply + 5)", Fails(Error::Syntax)),
            ("(apply +)", Fails(Error::Args)),
            ("(apply + '(1 2) '(3))", Fails(Error::Args)),
        ]);
    }

    #[test]
    fn test_apply_is_tail_call_preserving() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                (
                    "(define (count n) (if (= n 0) 'done (apply count (cons (- n 1) nil))))",
                    Prints("count"),
                ),
                ("(count 200000)", Prints("done")),
            ],
        );
    }

    #[test]
    fn test_and_special_form() {
        run_isolated(&[
            ("(and)", Prints("t")),
            ("(and 1)", Prints("1")),
            ("(and nil)", Prints("nil")),
            ("(and 1 2 3)", Prints("3")),
            ("(and 1 nil 3)", Prints("nil")),
            // Short-circuit: later arguments are not evaluated
            ("(and nil (undefined))", Prints("nil")),
            ("(and (undefined))", Fails(Error::Unbound)),
        ]);
    }

    #[test]
    fn test_special_forms_resolve_before_bindings() {
        let mut interp = Interp::new();
        run_session(
            &mut interp,
            &[
                // Rebinding `if` does not change operator-position parsing
                ("(define if 99)", Prints("if")),
                ("(if t 'yes 'no)", Prints("yes")),
                ("(define quote 1)", Prints("quote")),
                ("'(a b)", Prints("(a b)")),
            ],
        );
    }

    #[test]
    fn test_symbol_identity_and_case() {
        run_isolated(&[
            ("(eq? 'foo 'foo)", Prints("t")),
            ("(eq? 'foo 'Foo)", Prints("nil")),
            ("(eq? 'a (car '(a b)))", Prints("t")),
        ]);
    }

    #[test]
    fn test_prelude_loads() {
        let mut interp = with_prelude();
        run_session(
            &mut interp,
            &[
                ("(list 1 2 3)", Prints("(1 2 3)")),
                ("(list)", Prints("nil")),
                ("(foldl + 0 '(1 2 3 4))", Prints("10")),
                ("(foldr cons nil '(1 2 3))", Prints("(1 2 3)")),
                ("(reverse '(a b c))", Prints("(c b a)")),
                ("(append '(1 2) '(3 4))", Prints("(1 2 3 4)")),
                ("(map (lambda (x) (* x x)) '(1 2 3 4))", Prints("(1 4 9 16)")),
                ("(map + '(1 2 3) '(10 20 30))", Prints("(11 22 33)")),
            ],
        );
    }

    #[test]
    fn test_prelude_let() {
        let mut interp = with_prelude();
        run_session(
            &mut interp,
            &[
                ("(let ((x 2) (y 3)) (+ x y))", Prints("5")),
                ("(let ((x 1)) (let ((x 2)) x))", Prints("2")),
                ("(define z 10) (let ((x 2)) (+ x z))", Prints("12")),
            ],
        );
    }

    #[test]
    fn test_prelude_quasiquote() {
        let mut interp = with_prelude();
        run_session(
            &mut interp,
            &[
                ("`x", Prints("x")),
                ("`(1 2 3)", Prints("(1 2 3)")),
                ("`(1 ,(+ 1 1) 3)", Prints("(1 2 3)")),
                ("`(0 ,@(list 1 2) 3)", Prints("(0 1 2 3)")),
                ("(define n 5) `(value ,n)", Prints("(value 5)")),
            ],
        );
    }

    #[test]
    fn test_when_macro_scenario() {
        let mut interp = with_prelude();
        run_session(
            &mut interp,
            &[
                (
                    "(define (begin . xs) (if xs (if (cdr xs) (apply begin (cdr xs)) (car xs)) nil))",
                    Prints("begin"),
                ),
                (
                    "(defmacro (when c . body) `(if ,c (begin ,@body) nil))",
                    Prints("when"),
                ),
                ("(when (< 0 1) 7)", Prints("7")),
                ("(when (< 1 0) 7)", Prints("nil")),
                ("(when t 1 2 3)", Prints("3")),
            ],
        );
    }

    #[test]
    fn test_eval_source_reports_reader_errors() {
        let mut interp = Interp::new();
        assert_eq!(interp.eval_source("(+ 1"), Err(Error::Syntax));
        assert_eq!(interp.eval_source(""), Ok(Value::Nil));
        // Later forms see earlier definitions within one source string.
        let value = interp.eval_source("(define x 3) (+ x x)").unwrap();
        assert_eq!(value, Value::Integer(6));
    }
}
