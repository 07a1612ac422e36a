use std::path::Path;

use crate::call::{self, ResultCount};
use crate::context::Context;
use crate::error::Status;
use crate::gc;
use crate::value::Value;

/// Leading byte of a precompiled binary chunk (ESC). Anything else is text
/// source. The core only branches on it; the loaders own the formats.
pub const CHUNK_SENTINEL: u8 = 27;

// ---------------------------------------------------------------------------
// Protected call
// ---------------------------------------------------------------------------

/// Call the value sitting `nargs` slots below the top, with those slots as
/// its arguments, under a fresh recovery point. On any failure the stack is
/// cut back to the callee's slot, removing callee and arguments.
pub fn protected_call(cx: &mut Context, nargs: usize, results: ResultCount) -> Status {
    if cx.top() < nargs + 1 {
        return cx.run_protected(|cx| {
            Err(cx.raise("not enough values on the stack for the requested call"))
        });
    }
    let func = cx.top() - nargs - 1;
    let status = cx.run_protected(|cx| call::call(cx, func, results));
    if !status.is_ok() {
        // remove the callee and its arguments
        while cx.top() > func {
            cx.pop();
        }
    }
    status
}

// ---------------------------------------------------------------------------
// Protected parse / load
// ---------------------------------------------------------------------------

/// Run the appropriate loader over `source` inside a protected region and,
/// on success, leave a zero-upvalue closure over the new prototype on the
/// stack. A RuntimeError status out of the parse phase is remapped to
/// SyntaxError.
pub fn load_buffer(cx: &mut Context, source: &[u8], name: &str) -> Status {
    let binary = source.first() == Some(&CHUNK_SENTINEL);
    protected_parse(cx, source, name, binary)
}

fn protected_parse(cx: &mut Context, source: &[u8], name: &str, binary: bool) -> Status {
    // before parsing, give the collector a (good) chance
    if cx.heap().units() / 8 >= cx.gc.threshold / 10 {
        let status = cx.run_protected(|cx| gc::collect(cx, 0).map(|_| ()));
        if !status.is_ok() {
            return status;
        }
    }
    let old_units = cx.heap().units();
    let status = cx.run_protected(|cx| {
        let loader = if binary {
            cx.binary_loader
        } else {
            cx.text_parser
        };
        let load = match loader {
            Some(f) => f,
            None => return Err(cx.raise("no parser installed for this chunk kind")),
        };
        let proto = load(cx, source, name)?;
        let closure = cx.heap_mut().simple_closure(proto);
        cx.push(Value::Closure(closure))
    });
    match status {
        Status::Ok => {
            // newly retained compilation output will probably stay; let the
            // threshold absorb it
            let grown = cx.heap().units().saturating_sub(old_units);
            cx.gc.threshold += grown;
            Status::Ok
        }
        Status::RuntimeError => Status::SyntaxError,
        other => other,
    }
}

/// Source name for a chunk read from a file or stdin. The `@` decoration
/// marks real file paths; stdin has none.
fn chunk_name(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("@{}", p.display()),
        None => "(stdin)".to_string(),
    }
}

/// Load a chunk from a file (or stdin when `path` is None). The source name
/// is the decorated `@path` (or `(stdin)`). Unopenable files yield
/// FileError.
pub fn load_file(cx: &mut Context, path: Option<&Path>) -> Status {
    let name = chunk_name(path);
    let bytes = match path {
        Some(p) => match std::fs::read(p) {
            Ok(bytes) => bytes,
            Err(_) => return Status::FileError,
        },
        None => {
            use std::io::Read;
            let mut bytes = Vec::new();
            if std::io::stdin().read_to_end(&mut bytes).is_err() {
                return Status::FileError;
            }
            bytes
        }
    };
    let binary = bytes.first() == Some(&CHUNK_SENTINEL);
    protected_parse(cx, &bytes, &name, binary)
}

// ---------------------------------------------------------------------------
// Load-and-run conveniences
// ---------------------------------------------------------------------------

/// Load a buffer and, on success, run the unit body with all results kept.
pub fn do_buffer(cx: &mut Context, source: &[u8], name: &str) -> Status {
    let status = load_buffer(cx, source, name);
    if status.is_ok() {
        protected_call(cx, 0, ResultCount::All)
    } else {
        status
    }
}

pub fn do_string(cx: &mut Context, source: &str) -> Status {
    do_buffer(cx, source.as_bytes(), source)
}

pub fn do_file(cx: &mut Context, path: Option<&Path>) -> Status {
    let status = load_file(cx, path);
    if status.is_ok() {
        protected_call(cx, 0, ResultCount::All)
    } else {
        status
    }
}

/// Force a collection pass, returning the allocation units recovered, or
/// the error status if a finalizer raised.
pub fn collect_garbage(cx: &mut Context, increment: usize) -> Result<usize, Status> {
    let mut recovered = 0;
    let status = cx.run_protected(|cx| {
        recovered = gc::collect(cx, increment)?;
        Ok(())
    });
    if status.is_ok() {
        Ok(recovered)
    } else {
        Err(status)
    }
}
