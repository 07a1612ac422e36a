use crate::context::{Context, DebugEvent, Hook, HookKind};
use crate::error::ExecResult;
use crate::gc;
use crate::heap::ClosureKind;
use crate::stack::MIN_STACK;
use crate::tagmethod::TagEvent;
use crate::value::{ClosureId, FrameInfo, Value, PC_INACTIVE};

// ---------------------------------------------------------------------------
// Result counts
// ---------------------------------------------------------------------------

/// How many results the caller wants left on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCount {
    /// Exactly `n`, nil-padded if the callee produced fewer, truncated if
    /// it produced more.
    Exactly(usize),
    /// Whatever the callee produced.
    All,
}

// ---------------------------------------------------------------------------
// Call protocol
// ---------------------------------------------------------------------------

/// Call the value at stack slot `func`, with its arguments immediately
/// above it. On return, exactly the requested results start at `func` and
/// `top` sits just past them; the callee and arguments are gone.
///
/// A non-callable callee is substituted through its `call` tag method (a
/// slot is opened so the original value becomes the first argument);
/// without one this is a type error.
pub fn call(cx: &mut Context, func: usize, results: ResultCount) -> ExecResult<()> {
    let callee = cx.get(func);
    let closure_id = match callee {
        Value::Closure(id) => id,
        other => match cx.tag_method_for(other, TagEvent::Call) {
            Some(Value::Closure(id)) => {
                cx.open_slot(func)?;
                cx.set(func, Value::Closure(id));
                id
            }
            Some(_) | None => return Err(cx.type_error(other, "call")),
        },
    };

    cx.set(
        func,
        Value::Frame(FrameInfo {
            closure: closure_id,
            pc: PC_INACTIVE,
        }),
    );

    // The hook active at entry brackets this call: the matching return
    // notification uses the same hook even if the body swaps hooks.
    let hook = cx.call_hook;
    if let Some(h) = hook {
        fire_call_hook(cx, func, h, HookKind::Call)?;
    }

    let kind = cx.heap.closure(closure_id).kind;
    let first_result = match kind {
        ClosureKind::Native(f) => call_native(cx, closure_id, f, func + 1)?,
        ClosureKind::Interpreted(_) => match cx.interpreter {
            Some(interp) => interp(cx, closure_id, func + 1)?,
            None => return Err(cx.raise("no opcode interpreter installed")),
        },
    };

    if let Some(h) = hook {
        fire_call_hook(cx, func, h, HookKind::Return)?;
    }

    debug_assert!(matches!(cx.get(func), Value::Frame(_)));
    move_results(cx, func, first_result, results)?;
    gc::check_gc(cx)?;
    Ok(())
}

/// Native dispatch: the callee sees `base` as the start of its argument
/// window, with its captured upvalues copied on top as trailing
/// pseudo-arguments. Returns the index of the first result.
fn call_native(
    cx: &mut Context,
    closure: ClosureId,
    f: crate::context::NativeFn,
    base: usize,
) -> ExecResult<usize> {
    let nup = cx.heap.closure(closure).upvalues.len();
    let old_base = cx.stack.base;
    cx.stack.base = base;
    cx.check_stack(nup + MIN_STACK)?;
    for i in 0..nup {
        let upvalue = cx.heap.closure(closure).upvalues[i];
        cx.stack.push_unchecked(upvalue);
    }
    let n = f(cx)?;
    cx.stack.base = old_base;
    Ok(cx.top() - n)
}

/// Collapse the callee's results into the callee slot per the requested
/// count. Padding nils goes through the headroom check.
fn move_results(cx: &mut Context, func: usize, first: usize, want: ResultCount) -> ExecResult<()> {
    let produced = cx.top() - first;
    match want {
        ResultCount::All => {
            for i in 0..produced {
                let v = cx.get(first + i);
                cx.set(func + i, v);
            }
            cx.stack.top = func + produced;
        }
        ResultCount::Exactly(n) => {
            let ncopy = n.min(produced);
            for i in 0..ncopy {
                let v = cx.get(first + i);
                cx.set(func + i, v);
            }
            cx.stack.top = func + ncopy;
            for _ in ncopy..n {
                cx.push(Value::Nil)?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Run a hook behind a private call-frame boundary: fresh native base at
/// the current top, guaranteed headroom, hooking disabled for the hook's
/// own duration, everything restored afterwards.
fn do_hook(cx: &mut Context, hook: Hook, event: &DebugEvent) -> ExecResult<()> {
    let old_base = cx.stack.base;
    let old_top = cx.stack.top;
    cx.stack.base = old_top;
    cx.check_stack(MIN_STACK)?;
    cx.allow_hooks = false;
    hook(cx, event);
    cx.allow_hooks = true;
    cx.stack.top = old_top;
    cx.stack.base = old_base;
    Ok(())
}

fn fire_call_hook(cx: &mut Context, func: usize, hook: Hook, kind: HookKind) -> ExecResult<()> {
    if !cx.allow_hooks {
        return Ok(());
    }
    let closure = match cx.get(func) {
        Value::Frame(info) => Some(info.closure),
        _ => None,
    };
    let event = DebugEvent {
        kind,
        line: None,
        closure,
    };
    do_hook(cx, hook, &event)
}

/// Entry point for the external opcode interpreter: fire the line hook for
/// the frame marker at `func`, if one is installed and enabled.
pub fn line_hook(cx: &mut Context, func: usize, line: u32) -> ExecResult<()> {
    if !cx.allow_hooks {
        return Ok(());
    }
    if let Some(hook) = cx.line_hook {
        let closure = match cx.get(func) {
            Value::Frame(info) => Some(info.closure),
            _ => None,
        };
        let event = DebugEvent {
            kind: HookKind::Line,
            line: Some(line),
            closure,
        };
        do_hook(cx, hook, &event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn push_native(cx: &mut Context, f: crate::context::NativeFn) -> usize {
        let id = cx.heap_mut().new_closure(ClosureKind::Native(f), Vec::new());
        let slot = cx.top();
        cx.push(Value::Closure(id)).unwrap();
        slot
    }

    fn two_results(cx: &mut Context) -> ExecResult<usize> {
        cx.push(Value::Number(1.0))?;
        cx.push(Value::Number(2.0))?;
        Ok(2)
    }

    fn no_results(_cx: &mut Context) -> ExecResult<usize> {
        Ok(0)
    }

    fn echo_args(cx: &mut Context) -> ExecResult<usize> {
        // pushes a copy of every argument in its window
        let base = cx.base();
        let n = cx.top() - base;
        for i in 0..n {
            let v = cx.get(base + i);
            cx.push(v)?;
        }
        Ok(n)
    }

    fn raising_native(cx: &mut Context) -> ExecResult<usize> {
        Err(cx.raise("native failure"))
    }

    #[test]
    fn exact_count_pads_with_nil() {
        let mut cx = Context::default();
        let func = push_native(&mut cx, no_results);
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::Exactly(3)));
        assert_eq!(status, Status::Ok);
        assert_eq!(cx.top(), func + 3);
        assert_eq!(cx.get(func), Value::Nil);
        assert_eq!(cx.get(func + 2), Value::Nil);
    }

    #[test]
    fn exact_count_truncates_extras() {
        let mut cx = Context::default();
        let func = push_native(&mut cx, two_results);
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::Exactly(1)));
        assert_eq!(status, Status::Ok);
        assert_eq!(cx.top(), func + 1);
        assert_eq!(cx.get(func), Value::Number(1.0));
    }

    #[test]
    fn all_results_leaves_everything() {
        let mut cx = Context::default();
        let func = push_native(&mut cx, two_results);
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::Ok);
        assert_eq!(cx.top(), func + 2);
        assert_eq!(cx.get(func), Value::Number(1.0));
        assert_eq!(cx.get(func + 1), Value::Number(2.0));
    }

    #[test]
    fn arguments_reach_the_native_window() {
        let mut cx = Context::default();
        let func = push_native(&mut cx, echo_args);
        cx.push(Value::Number(7.0)).unwrap();
        cx.push(Value::Bool(true)).unwrap();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::Ok);
        assert_eq!(cx.top(), func + 2);
        assert_eq!(cx.get(func), Value::Number(7.0));
        assert_eq!(cx.get(func + 1), Value::Bool(true));
    }

    #[test]
    fn upvalues_arrive_as_trailing_pseudo_arguments() {
        let mut cx = Context::default();
        let id = cx.heap_mut().new_closure(
            ClosureKind::Native(echo_args),
            vec![Value::Number(42.0)],
        );
        let func = cx.top();
        cx.push(Value::Closure(id)).unwrap();
        cx.push(Value::Number(1.0)).unwrap();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::Ok);
        // window was [arg, upvalue]
        assert_eq!(cx.top(), func + 2);
        assert_eq!(cx.get(func), Value::Number(1.0));
        assert_eq!(cx.get(func + 1), Value::Number(42.0));
    }

    #[test]
    fn native_base_is_restored_after_the_call() {
        let mut cx = Context::default();
        let func = push_native(&mut cx, two_results);
        let before = cx.base();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::Exactly(0)));
        assert_eq!(status, Status::Ok);
        assert_eq!(cx.base(), before);
    }

    #[test]
    fn calling_nil_is_a_type_error() {
        let mut cx = Context::default();
        let func = cx.top();
        cx.push(Value::Nil).unwrap();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::RuntimeError);
    }

    #[test]
    fn call_tag_method_substitutes_the_callee() {
        let mut cx = Context::default();
        // metatable whose __call is a native that echoes its window
        let handler = cx
            .heap_mut()
            .new_closure(ClosureKind::Native(echo_args), Vec::new());
        let meta = cx.heap_mut().new_table();
        let t = cx.heap_mut().new_table();
        cx.heap_mut().set_metatable(t, Some(meta));
        let key = Value::String(cx.tm_names[TagEvent::Call as usize]);
        cx.heap_mut().table_set(meta, key, Value::Closure(handler));

        let func = cx.top();
        cx.push(Value::Table(t)).unwrap();
        cx.push(Value::Number(5.0)).unwrap();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::Ok);
        // handler saw [table, 5.0]: the proxied value became argument one
        assert_eq!(cx.top(), func + 2);
        assert_eq!(cx.get(func), Value::Table(t));
        assert_eq!(cx.get(func + 1), Value::Number(5.0));
    }

    #[test]
    fn table_without_call_override_is_not_callable() {
        let mut cx = Context::default();
        let t = cx.heap_mut().new_table();
        let func = cx.top();
        cx.push(Value::Table(t)).unwrap();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::RuntimeError);
    }

    static CALL_HOOKS: AtomicUsize = AtomicUsize::new(0);
    static RETURN_HOOKS: AtomicUsize = AtomicUsize::new(0);

    fn counting_hook(_cx: &mut Context, event: &DebugEvent) {
        match event.kind {
            HookKind::Call => CALL_HOOKS.fetch_add(1, Ordering::SeqCst),
            HookKind::Return => RETURN_HOOKS.fetch_add(1, Ordering::SeqCst),
            HookKind::Line => 0,
        };
    }

    #[test]
    fn hooks_bracket_a_successful_call() {
        CALL_HOOKS.store(0, Ordering::SeqCst);
        RETURN_HOOKS.store(0, Ordering::SeqCst);
        let mut cx = Context::default();
        cx.set_call_hook(Some(counting_hook));
        let func = push_native(&mut cx, two_results);
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::Ok);
        assert_eq!(CALL_HOOKS.load(Ordering::SeqCst), 1);
        assert_eq!(RETURN_HOOKS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn return_hook_never_fires_when_the_body_raises() {
        CALL_HOOKS.store(0, Ordering::SeqCst);
        RETURN_HOOKS.store(0, Ordering::SeqCst);
        let mut cx = Context::default();
        cx.set_call_hook(Some(counting_hook));
        let func = push_native(&mut cx, raising_native);
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::RuntimeError);
        assert_eq!(CALL_HOOKS.load(Ordering::SeqCst), 1);
        assert_eq!(RETURN_HOOKS.load(Ordering::SeqCst), 0);
    }

    fn nested_calling_hook(cx: &mut Context, event: &DebugEvent) {
        // a hook that itself calls a native must not re-trigger hooks
        if event.kind == HookKind::Call {
            let inner = cx
                .heap_mut()
                .new_closure(ClosureKind::Native(no_results), Vec::new());
            let slot = cx.top();
            cx.push(Value::Closure(inner)).unwrap();
            call(cx, slot, ResultCount::Exactly(0)).unwrap();
        }
        counting_hook(cx, event);
    }

    #[test]
    fn hooks_do_not_recurse() {
        CALL_HOOKS.store(0, Ordering::SeqCst);
        RETURN_HOOKS.store(0, Ordering::SeqCst);
        let mut cx = Context::default();
        cx.set_call_hook(Some(nested_calling_hook));
        let func = push_native(&mut cx, no_results);
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::Exactly(0)));
        assert_eq!(status, Status::Ok);
        // one call event and one return event for the outer call only
        assert_eq!(CALL_HOOKS.load(Ordering::SeqCst), 1);
        assert_eq!(RETURN_HOOKS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn line_hook_reports_line_and_closure() {
        static LINES: AtomicUsize = AtomicUsize::new(0);
        fn line_recorder(_cx: &mut Context, event: &DebugEvent) {
            assert_eq!(event.kind, HookKind::Line);
            LINES.store(event.line.unwrap() as usize, Ordering::SeqCst);
        }
        let mut cx = Context::default();
        cx.set_line_hook(Some(line_recorder));
        let id = cx
            .heap_mut()
            .new_closure(ClosureKind::Native(no_results), Vec::new());
        let func = cx.top();
        cx.push(Value::Frame(FrameInfo {
            closure: id,
            pc: 0,
        }))
        .unwrap();
        let status = cx.run_protected(|cx| line_hook(cx, func, 17));
        assert_eq!(status, Status::Ok);
        assert_eq!(LINES.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn interpreted_call_without_interpreter_raises() {
        let mut cx = Context::default();
        let src = cx.intern("chunk");
        let p = cx
            .heap_mut()
            .new_proto(Vec::new(), Vec::new(), Vec::new(), src, 0);
        let id = cx.heap_mut().simple_closure(p);
        let func = cx.top();
        cx.push(Value::Closure(id)).unwrap();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::RuntimeError);
    }

    #[test]
    fn interpreted_call_routes_through_the_installed_interpreter() {
        fn consts_interp(cx: &mut Context, id: ClosureId, _base: usize) -> ExecResult<usize> {
            // stand-in opcode engine: returns the prototype's constants
            let proto = match cx.heap().closure(id).kind {
                ClosureKind::Interpreted(p) => p,
                ClosureKind::Native(_) => unreachable!(),
            };
            let first = cx.top();
            let n = cx.heap().proto(proto).consts.len();
            for i in 0..n {
                let v = cx.heap().proto(proto).consts[i];
                cx.push(v)?;
            }
            Ok(first)
        }
        let mut cx = Context::default();
        cx.set_interpreter(Some(consts_interp));
        let src = cx.intern("chunk");
        let consts = vec![Value::Number(8.0), Value::Bool(false)];
        let p = cx
            .heap_mut()
            .new_proto(Vec::new(), consts, Vec::new(), src, 0);
        let id = cx.heap_mut().simple_closure(p);
        let func = cx.top();
        cx.push(Value::Closure(id)).unwrap();
        let status = cx.run_protected(|cx| call(cx, func, ResultCount::All));
        assert_eq!(status, Status::Ok);
        assert_eq!(cx.top(), func + 2);
        assert_eq!(cx.get(func), Value::Number(8.0));
        assert_eq!(cx.get(func + 1), Value::Bool(false));
    }
}
