//! Text-to-value reader.
//!
//! The reader is restartable: [`read_expr`] consumes exactly one
//! S-expression from the front of its input and returns the unconsumed
//! remainder, so callers drive it in a loop over a buffer until end of
//! input (reported as a syntax error, which doubles as the loop
//! termination signal) or a real error.
//!
//! Tokenization is a small nom parser. Tokens are `(`, `)`, the quote
//! prefixes `'`, `` ` ``, `,` and `,@`, or a maximal run of bytes up to
//! the next delimiter (whitespace or a paren). Everything above the token
//! level is hand-written recursive descent, because list parsing allocates
//! cells into the heap as it goes.
//!
//! Quote prefixes expand to their explicit forms while reading:
//! `'x` becomes `(quote x)`, `` `x `` becomes `(quasiquote x)`, `,x`
//! becomes `(unquote x)` and `,@x` becomes `(unquote-splicing x)`.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::multispace0,
    sequence::preceded,
    IResult, Parser,
};
use smallvec::SmallVec;

use crate::ast::{NumberType, Value};
use crate::heap::Heap;
use crate::{Error, MAX_READ_DEPTH};

/// One parsed value plus the unconsumed remainder of the input.
pub type ReadResult<'a> = Result<(Value, &'a str), Error>;

/// Token delimiters: whitespace plus the list parentheses.
const DELIMITERS: &str = "() \t\r\n";

/// True when `input` holds no further token. Callers use this to tell end
/// of input apart from a genuine syntax error after `read_expr` fails.
pub fn is_blank(input: &str) -> bool {
    input.chars().all(|c| DELIMITERS[2..].contains(c))
}

/// Produce the next token and the input after it. Leading whitespace is
/// skipped; end of input is a (nom) error.
fn lex(input: &str) -> IResult<&str, &str> {
    preceded(
        multispace0,
        alt((
            tag("("),
            tag(")"),
            tag("'"),
            tag("`"),
            tag(",@"),
            tag(","),
            take_till1(|c: char| DELIMITERS.contains(c)),
        )),
    )
    .parse(input)
}

/// Read one S-expression from the front of `input`.
pub fn read_expr<'a>(heap: &mut Heap, input: &'a str) -> ReadResult<'a> {
    read_at_depth(heap, input, 0)
}

fn read_at_depth<'a>(heap: &mut Heap, input: &'a str, depth: usize) -> ReadResult<'a> {
    if depth > MAX_READ_DEPTH {
        return Err(Error::Syntax);
    }
    let (rest, token) = lex(input).map_err(|_| Error::Syntax)?;
    match token {
        "(" => read_list(heap, rest, depth + 1),
        ")" => Err(Error::Syntax),
        "'" => read_prefixed(heap, rest, "quote", depth),
        "`" => read_prefixed(heap, rest, "quasiquote", depth),
        "," => read_prefixed(heap, rest, "unquote", depth),
        ",@" => read_prefixed(heap, rest, "unquote-splicing", depth),
        atom => Ok((parse_atom(heap, atom), rest)),
    }
}

/// Expand a quote-family prefix: read the next expression and wrap it in a
/// two-element list headed by `form`.
fn read_prefixed<'a>(heap: &mut Heap, input: &'a str, form: &str, depth: usize) -> ReadResult<'a> {
    let (inner, rest) = read_at_depth(heap, input, depth + 1)?;
    let head = heap.intern(form);
    let value = heap.list_from_slice(&[head, inner]);
    Ok((value, rest))
}

/// Read list elements up to the matching `)`. A lone `.` before the final
/// element attaches it as the tail of a dotted pair.
fn read_list<'a>(heap: &mut Heap, mut input: &'a str, depth: usize) -> ReadResult<'a> {
    let mut items: SmallVec<[Value; 8]> = SmallVec::new();
    loop {
        let (rest, token) = lex(input).map_err(|_| Error::Syntax)?;
        match token {
            ")" => return Ok((heap.list_from_slice(&items), rest)),
            "." => {
                // Dotted tail; needs at least one prior element and a
                // closing paren right after the tail expression.
                if items.is_empty() {
                    return Err(Error::Syntax);
                }
                let (tail, rest) = read_at_depth(heap, rest, depth + 1)?;
                let (rest, token) = lex(rest).map_err(|_| Error::Syntax)?;
                if token != ")" {
                    return Err(Error::Syntax);
                }
                return Ok((heap.list_with_tail(&items, tail), rest));
            }
            _ => {
                // Re-read from the token start so full dispatch applies.
                let (item, rest) = read_at_depth(heap, input, depth + 1)?;
                items.push(item);
                input = rest;
            }
        }
    }
}

/// An atom is an integer when the signed-decimal scan consumes the whole
/// token; the exact spelling `nil` reads as the nil value; anything else
/// interns as a case-preserving symbol. A decimal token too large for the
/// integer type fails the scan and reads as a symbol.
fn parse_atom(heap: &mut Heap, token: &str) -> Value {
    if let Ok(n) = token.parse::<NumberType>() {
        return Value::Integer(n);
    }
    if token == "nil" {
        Value::Nil
    } else {
        heap.intern(token)
    }
}
