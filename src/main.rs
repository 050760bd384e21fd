//! Line-oriented REPL and file loader.
//!
//! The prompt reads one physical line, wraps it in parentheses so bare
//! forms like `+ 1 2` work, then evaluates each top-level form of the
//! wrapped buffer and prints each result (or diagnostic) on its own line.
//! At startup, `library.lisp` from the current directory is loaded if
//! present. End of input exits with status 0.

use std::fs;
use std::path::Path;
use std::process;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use minilisp::ast::Value;
use minilisp::evaluator::Interp;

const LIBRARY_PATH: &str = "library.lisp";

fn main() {
    let mut interp = Interp::new();

    if Path::new(LIBRARY_PATH).exists() {
        load_file(&mut interp, LIBRARY_PATH);
    }

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                run_line(&mut interp, &line);
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("{err}");
                break;
            }
        }
    }
}

/// Evaluate one input line: wrap it in parentheses, read the wrapped
/// buffer, then evaluate and print each form independently - an error in
/// one form does not stop the rest of the line.
fn run_line(interp: &mut Interp, line: &str) {
    let wrapped = format!("({line})");
    let forms = match interp.read(&wrapped) {
        Ok((forms, _)) => forms,
        Err(err) => {
            println!("{err}");
            return;
        }
    };

    // The unevaluated remainder of the line must survive the per-form
    // collections below.
    interp.protect(forms);
    let mut rest = forms;
    while let Value::Pair(_) = rest {
        let form = interp.heap().car(rest);
        rest = interp.heap().cdr(rest);
        let root = interp.root_env();
        match interp.eval(form, root) {
            Ok(value) => println!("{}", interp.display(value)),
            Err(err) => println!("{err}"),
        }
        interp.collect(&[rest]);
    }
    interp.unprotect();
}

/// Feed a whole file through the reader and evaluator, echoing each form's
/// value. A failing form is reported with the offending expression and the
/// loader continues with the next one.
fn load_file(interp: &mut Interp, path: &str) {
    println!("Reading {path}...");
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let mut rest = text.as_str();
    while !minilisp::reader::is_blank(rest) {
        let (form, next) = match interp.read(rest) {
            Ok(read) => read,
            Err(err) => {
                println!("{err}");
                return;
            }
        };
        rest = next;
        let root = interp.root_env();
        match interp.eval(form, root) {
            Ok(value) => println!("{}", interp.display(value)),
            Err(err) => {
                println!("Error in expression:");
                println!("\t{}", interp.display(form));
                println!("{err}");
            }
        }
        interp.collect(&[]);
    }
}
