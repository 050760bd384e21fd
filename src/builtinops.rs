//! Built-in procedure registry.
//!
//! Every builtin receives its (already evaluated) argument list as a heap
//! value and validates its own arity exactly: missing or extra arguments
//! raise `Args`, operand type mismatches raise `Type`. The registry table
//! [`BUILTIN_OPS`] is installed into the root environment at interpreter
//! startup; the canonical true value `t` is bound there as well, to
//! itself.
//!
//! Implementation-defined corners, decided here:
//! - integer arithmetic wraps on overflow;
//! - division truncates toward zero, and division by zero (or the one
//!   wrapping quotient `MIN / -1`) raises `Type` rather than aborting the
//!   process.

use crate::ast::{NumberType, Value};
use crate::evaluator::Interp;
use crate::Error;

/// A host-implemented procedure: a name for printing and identity, and the
/// implementation itself. Builtins get the whole interpreter because a few
/// of them (`apply`) re-enter the evaluator; most only touch the heap.
#[derive(Clone, Copy)]
pub struct BuiltinFn {
    pub name: &'static str,
    pub func: fn(&mut Interp, Value) -> Result<Value, Error>,
}

impl std::fmt::Debug for BuiltinFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinFn({})", self.name)
    }
}

impl PartialEq for BuiltinFn {
    fn eq(&self, other: &Self) -> bool {
        // Each name is registered exactly once, so the name is the
        // identity; function pointer comparison is not stable in Rust.
        self.name == other.name
    }
}

/// The builtins bound in the root environment.
pub(crate) const BUILTIN_OPS: &[BuiltinFn] = &[
    BuiltinFn { name: "car", func: builtin_car },
    BuiltinFn { name: "cdr", func: builtin_cdr },
    BuiltinFn { name: "cons", func: builtin_cons },
    BuiltinFn { name: "+", func: builtin_add },
    BuiltinFn { name: "-", func: builtin_subtract },
    BuiltinFn { name: "*", func: builtin_multiply },
    BuiltinFn { name: "/", func: builtin_divide },
    BuiltinFn { name: "=", func: builtin_numeq },
    BuiltinFn { name: "<", func: builtin_less },
    BuiltinFn { name: "apply", func: builtin_apply },
    BuiltinFn { name: "eq?", func: builtin_eq },
    BuiltinFn { name: "pair?", func: builtin_pairp },
];

fn builtin_car(interp: &mut Interp, args: Value) -> Result<Value, Error> {
    let [x] = interp.heap.take_args::<1>(args)?;
    match x {
        Value::Nil => Ok(Value::Nil),
        Value::Pair(_) => Ok(interp.heap.car(x)),
        _ => Err(Error::Type),
    }
}

fn builtin_cdr(interp: &mut Interp, args: Value) -> Result<Value, Error> {
    let [x] = interp.heap.take_args::<1>(args)?;
    match x {
        Value::Nil => Ok(Value::Nil),
        Value::Pair(_) => Ok(interp.heap.cdr(x)),
        _ => Err(Error::Type),
    }
}

fn builtin_cons(interp: &mut Interp, args: Value) -> Result<Value, Error> {
    let [car, cdr] = interp.heap.take_args::<2>(args)?;
    Ok(interp.heap.cons(car, cdr))
}

/// Pull two integer operands out of an argument list.
fn two_integers(interp: &Interp, args: Value) -> Result<(NumberType, NumberType), Error> {
    let [a, b] = interp.heap.take_args::<2>(args)?;
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => Ok((a, b)),
        _ => Err(Error::Type),
    }
}

// Binary integer arithmetic; overflow wraps.
macro_rules! arithmetic_op {
    ($name:ident, $method:ident) => {
        fn $name(interp: &mut Interp, args: Value) -> Result<Value, Error> {
            let (a, b) = two_integers(interp, args)?;
            Ok(Value::Integer(a.$method(b)))
        }
    };
}

arithmetic_op!(builtin_add, wrapping_add);
arithmetic_op!(builtin_subtract, wrapping_sub);
arithmetic_op!(builtin_multiply, wrapping_mul);

fn builtin_divide(interp: &mut Interp, args: Value) -> Result<Value, Error> {
    let (a, b) = two_integers(interp, args)?;
    match a.checked_div(b) {
        Some(q) => Ok(Value::Integer(q)),
        None => Err(Error::Type),
    }
}

// Integer comparisons yield the symbol `t` or `nil`.
macro_rules! comparison_op {
    ($name:ident, $op:tt) => {
        fn $name(interp: &mut Interp, args: Value) -> Result<Value, Error> {
            let (a, b) = two_integers(interp, args)?;
            Ok(if a $op b { interp.true_value() } else { Value::Nil })
        }
    };
}

comparison_op!(builtin_numeq, ==);
comparison_op!(builtin_less, <);

/// First-class `apply`: invoked when the `apply` binding is passed around
/// as a value. The common operator-position spelling is handled by the
/// evaluator as a frame-replacing special form instead, which preserves
/// tail calls; this fallback re-enters the evaluator.
fn builtin_apply(interp: &mut Interp, args: Value) -> Result<Value, Error> {
    let [func, arg_list] = interp.heap.take_args::<2>(args)?;
    if !interp.heap.is_proper_list(arg_list) {
        return Err(Error::Syntax);
    }
    interp.apply(func, arg_list)
}

fn builtin_eq(interp: &mut Interp, args: Value) -> Result<Value, Error> {
    let [a, b] = interp.heap.take_args::<2>(args)?;
    Ok(if a == b { interp.true_value() } else { Value::Nil })
}

fn builtin_pairp(interp: &mut Interp, args: Value) -> Result<Value, Error> {
    let [x] = interp.heap.take_args::<1>(args)?;
    Ok(if matches!(x, Value::Pair(_)) {
        interp.true_value()
    } else {
        Value::Nil
    })
}
