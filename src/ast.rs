//! This module defines the core value representation of the interpreter.
//! The main enum, [`Value`], covers every Lisp datum: the `nil` sentinel,
//! machine integers, interned symbols, cons pairs, built-in procedures, and
//! the two closure-shaped variants (`Closure` and `Macro`) whose payload is
//! an `(env . (params . body))` chain on the pair heap. Compound variants
//! hold a [`CellRef`] handle into the [`Heap`](crate::heap::Heap); `Value`
//! itself is a small `Copy` tag-and-payload word, so values are passed
//! around freely and never own heap storage.
//!
//! Equality on `Value` is *identity* equality, the semantics of the `eq?`
//! builtin: two values are equal when they have the same variant and the
//! same payload identity (integer value, interned symbol, cell handle, or
//! builtin). Structural comparison of trees is a heap traversal and lives
//! on the heap type.
//!
//! Printing also lives here: [`DisplayValue`] is a borrowed adapter that
//! renders a value in readable form against the heap that owns its cells.

use std::fmt;

use string_interner::DefaultSymbol;

use crate::builtinops::BuiltinFn;
use crate::heap::{CellRef, Heap};

/// Type alias for integer values in the interpreter
pub type NumberType = i64;

/// A Lisp value
///
/// `Nil` is the only false value. Lists are right-nested `Pair` chains
/// terminated by `Nil`. `Closure` and `Macro` reuse the pair heap for their
/// payload; the tag alone distinguishes them from ordinary pairs and from
/// each other (a macro's arguments are not evaluated before application,
/// and its result is re-evaluated).
#[derive(Clone, Copy, Debug)]
pub enum Value {
    /// The empty list / false sentinel
    Nil,
    /// Signed machine integer
    Integer(NumberType),
    /// Interned symbol; equality is interner-slot identity
    Symbol(DefaultSymbol),
    /// Cons cell handle
    Pair(CellRef),
    /// Host-implemented procedure
    Builtin(BuiltinFn),
    /// User procedure: handle to an `(env . (params . body))` chain
    Closure(CellRef),
    /// Like `Closure`, but applied to unevaluated arguments
    Macro(CellRef),
}

impl Value {
    /// Check if this value is `nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// The heap handle carried by this value, if any. Only pairs, closures
    /// and macros reference heap cells; every other variant is a leaf.
    pub(crate) fn handle(&self) -> Option<CellRef> {
        match self {
            Value::Pair(cell) | Value::Closure(cell) | Value::Macro(cell) => Some(*cell),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Identity equality: same variant and same payload identity. This is
    /// exactly what the `eq?` builtin exposes to user code. Two lists with
    /// equal elements but different cells are *not* equal here.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Pair(a), Value::Pair(b))
            | (Value::Closure(a), Value::Closure(b))
            | (Value::Macro(a), Value::Macro(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

/// Borrowed display adapter created by [`Heap::display`].
///
/// Rendering rules:
/// - `nil`, integers and symbols print as single tokens;
/// - pairs print as `(a b c)`, with a non-nil tail written `(a b . c)`;
/// - builtins print as an opaque `#<BUILTIN:name>` marker;
/// - closures and macros print their `(params . body)` payload.
///
/// Output round-trips through the reader for every value that contains no
/// builtin, closure, or macro.
pub struct DisplayValue<'a> {
    pub(crate) heap: &'a Heap,
    pub(crate) value: Value,
}

impl fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(self.heap, self.value, f)
    }
}

fn write_value(heap: &Heap, value: Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Nil => write!(f, "nil"),
        Value::Integer(n) => write!(f, "{n}"),
        Value::Symbol(sym) => write!(f, "{}", heap.sym_name(sym)),
        Value::Builtin(op) => write!(f, "#<BUILTIN:{}>", op.name),
        Value::Closure(_) | Value::Macro(_) => {
            // (params . body) portion; the captured environment is omitted
            write_value(heap, heap.cdr(value), f)
        }
        Value::Pair(cell) => {
            write!(f, "(")?;
            write_value(heap, heap.car(Value::Pair(cell)), f)?;
            // Iterate the spine so long lists do not recurse
            let mut tail = heap.cdr(Value::Pair(cell));
            loop {
                match tail {
                    Value::Nil => break,
                    Value::Pair(_) => {
                        write!(f, " ")?;
                        write_value(heap, heap.car(tail), f)?;
                        tail = heap.cdr(tail);
                    }
                    atom => {
                        write!(f, " . ")?;
                        write_value(heap, atom, f)?;
                        break;
                    }
                }
            }
            write!(f, ")")
        }
    }
}
