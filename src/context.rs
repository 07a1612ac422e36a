use std::collections::HashMap;

use crate::call;
use crate::error::{ExecResult, Status, Unwind};
use crate::gc::GcState;
use crate::heap::Heap;
use crate::refs::{Ref, RefLookup, RefTable};
use crate::stack::{ExecStack, DEFAULT_STACK};
use crate::tagmethod::{self, TagEvent};
use crate::value::{ClosureId, ProtoId, StrId, Value};

/// Global consulted by the raise path to format/deliver error messages.
/// An ordinary callable, invoked with the message string as its argument.
pub const ERROR_REPORTER_GLOBAL: &str = "_ERRORMESSAGE";

// ---------------------------------------------------------------------------
// Host-supplied hooks
// ---------------------------------------------------------------------------

/// Native callee ABI: receives the context with its argument window at
/// `[base, top)` (captured upvalues trailing the real arguments) and returns
/// how many results it pushed on top.
pub type NativeFn = fn(&mut Context) -> ExecResult<usize>;

/// External opcode interpreter: runs a compiled closure body with arguments
/// starting at `base` and returns the stack index of its first result.
pub type InterpFn = fn(&mut Context, ClosureId, usize) -> ExecResult<usize>;

/// External parser / binary-chunk loader: turns a named source buffer into
/// a prototype or raises.
pub type LoadFn = fn(&mut Context, &[u8], &str) -> ExecResult<ProtoId>;

/// Debug hook. Runs with hooking disabled and a private call-frame
/// boundary; may not re-enter hooks.
pub type Hook = fn(&mut Context, &DebugEvent);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Call,
    Return,
    Line,
}

/// Record handed to debug hooks.
#[derive(Debug, Clone, Copy)]
pub struct DebugEvent {
    pub kind: HookKind,
    /// Current line, for line events.
    pub line: Option<u32>,
    /// The closure the annotated frame is running.
    pub closure: Option<ClosureId>,
}

// ---------------------------------------------------------------------------
// Recovery points
// ---------------------------------------------------------------------------

/// Saved state for one protected region. Restored wholesale when an unwind
/// reaches this point, which re-establishes every stack invariant that held
/// before the region began.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecoveryPoint {
    base: usize,
    top: usize,
    allow_hooks: bool,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// One execution context: stack, heap, globals, reference table, recovery
/// chain and hook state. Every core operation takes the context explicitly;
/// there is no process-wide interpreter state.
pub struct Context {
    pub(crate) stack: ExecStack,
    pub(crate) heap: Heap,
    pub(crate) refs: RefTable,
    pub(crate) globals: HashMap<StrId, Value>,
    pub(crate) tm_names: [StrId; TagEvent::COUNT],
    pub(crate) recovery: Vec<RecoveryPoint>,
    pub(crate) call_hook: Option<Hook>,
    pub(crate) line_hook: Option<Hook>,
    pub(crate) allow_hooks: bool,
    pub(crate) interpreter: Option<InterpFn>,
    pub(crate) text_parser: Option<LoadFn>,
    pub(crate) binary_loader: Option<LoadFn>,
    pub(crate) gc: GcState,
    /// Callable invoked with nil after every collection pass, if installed.
    pub(crate) gc_sentinel: Value,
}

impl Context {
    /// Create a context with the given value-stack capacity (clamped up to
    /// [`crate::MIN_STACK`], plus the fixed overflow reserve). Tag-method
    /// event names are interned and pinned here, once.
    pub fn new(stack_capacity: usize) -> Self {
        let mut heap = Heap::new();
        let tm_names = tagmethod::init_names(&mut heap);
        Context {
            stack: ExecStack::new(stack_capacity),
            heap,
            refs: RefTable::new(),
            globals: HashMap::new(),
            tm_names,
            recovery: Vec::new(),
            call_hook: None,
            line_hook: None,
            allow_hooks: true,
            interpreter: None,
            text_parser: None,
            binary_loader: None,
            gc: GcState::new(),
            gc_sentinel: Value::Nil,
        }
    }

    // -- Stack access --

    pub fn top(&self) -> usize {
        self.stack.top()
    }

    /// Lowest stack slot visible to the currently active native call.
    pub fn base(&self) -> usize {
        self.stack.base()
    }

    pub fn get(&self, slot: usize) -> Value {
        self.stack.get(slot)
    }

    /// Slots still available below the current limit.
    pub fn free_slots(&self) -> usize {
        self.stack.free_slots()
    }

    pub fn set(&mut self, slot: usize, value: Value) {
        self.stack.set(slot, value);
    }

    /// Fail with Stack-Overflow if fewer than `n` free slots remain below
    /// the limit. Overflow while already handling overflow escalates with
    /// a distinct status and no message construction.
    pub fn check_stack(&mut self, n: usize) -> ExecResult<()> {
        if self.stack.free_slots() < n {
            if self.stack.reserve_in_use() {
                // overflow while handling overflow
                return Err(self.breakrun(Status::ErrorInError));
            }
            // hand out the reserve so the message below has room
            self.stack.grant_reserve();
            return Err(self.raise("stack overflow"));
        }
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> ExecResult<()> {
        self.check_stack(1)?;
        self.stack.push_unchecked(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop_unchecked()
    }

    /// Set `top = base + extra`, nil-padding (with a headroom check) when
    /// growing and truncating when shrinking.
    pub fn adjust_top(&mut self, base: usize, extra: usize) -> ExecResult<()> {
        let want = base + extra;
        if want <= self.stack.top() {
            self.stack.top = want;
        } else {
            let diff = want - self.stack.top();
            self.check_stack(diff)?;
            for _ in 0..diff {
                self.stack.push_unchecked(Value::Nil);
            }
        }
        Ok(())
    }

    /// Open a hole at `pos`, shifting `[pos, top)` rightward.
    pub(crate) fn open_slot(&mut self, pos: usize) -> ExecResult<()> {
        self.check_stack(1)?;
        self.stack.open_slot(pos);
        Ok(())
    }

    pub fn push_string(&mut self, s: &str) -> ExecResult<()> {
        let id = self.heap.intern(s);
        self.push(Value::String(id))
    }

    // -- Heap access --

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn intern(&mut self, s: &str) -> StrId {
        self.heap.intern(s)
    }

    // -- Globals --

    pub fn set_global(&mut self, name: &str, value: Value) {
        let id = self.heap.intern(name);
        if value.is_nil() {
            self.globals.remove(&id);
        } else {
            self.globals.insert(id, value);
        }
    }

    pub fn get_global(&mut self, name: &str) -> Value {
        let id = self.heap.intern(name);
        self.globals.get(&id).copied().unwrap_or(Value::Nil)
    }

    // -- Tag methods --

    /// Behavior override for `value`, or None when its type has none
    /// installed for `event`.
    pub fn tag_method_for(&mut self, value: Value, event: TagEvent) -> Option<Value> {
        tagmethod::tag_method_for(&mut self.heap, &self.tm_names, value, event)
    }

    // -- Protected execution --

    /// Run `body` under a new recovery point. On a raise anywhere inside,
    /// the saved top, native-call base and hook-enable flag are restored,
    /// the overflow reserve is recomputed, and the raising status is
    /// returned. Nested regions compose; each restores only its own state.
    pub fn run_protected<F>(&mut self, body: F) -> Status
    where
        F: FnOnce(&mut Context) -> ExecResult<()>,
    {
        let saved = RecoveryPoint {
            base: self.stack.base,
            top: self.stack.top,
            allow_hooks: self.allow_hooks,
        };
        self.recovery.push(saved);
        let result = body(self);
        self.recovery.pop();
        match result {
            Ok(()) => Status::Ok,
            Err(unwind) => {
                self.allow_hooks = saved.allow_hooks;
                self.stack.base = saved.base;
                self.stack.top = saved.top;
                self.stack.restore_limit();
                unwind.status
            }
        }
    }

    /// Raise a runtime error: deliver `message` through the user-installed
    /// error reporter (an ordinary call), then start unwinding toward the
    /// nearest recovery point.
    pub fn raise(&mut self, message: &str) -> Unwind {
        if let Err(unwind) = self.deliver_message(message) {
            return unwind;
        }
        self.breakrun(Status::RuntimeError)
    }

    /// "attempt to <op> a <type> value"
    pub(crate) fn type_error(&mut self, value: Value, op: &str) -> Unwind {
        let message = format!("attempt to {} a {} value", op, value.type_name());
        self.raise(&message)
    }

    /// Allocation-limit failure. Deliberately skips the error reporter so
    /// the failure path never allocates.
    pub(crate) fn memory_error(&mut self) -> Unwind {
        self.breakrun(Status::OutOfMemory)
    }

    /// Begin unwinding with `status`. With no recovery point installed this
    /// is fatal by design: the embedding API guarantees one exists for every
    /// entry point, so this path is a programming error in the embedding.
    pub(crate) fn breakrun(&mut self, status: Status) -> Unwind {
        if self.recovery.is_empty() {
            if status != Status::OutOfMemory {
                eprintln!("lantern: unable to recover; exiting");
            }
            std::process::exit(1);
        }
        Unwind::new(status)
    }

    fn deliver_message(&mut self, message: &str) -> ExecResult<()> {
        let reporter = self.get_global(ERROR_REPORTER_GLOBAL);
        if reporter.is_callable() {
            let slot = self.stack.top();
            self.push(reporter)?;
            self.push_string(message)?;
            call::call(self, slot, call::ResultCount::Exactly(0))?;
        }
        Ok(())
    }

    // -- References --

    /// Store a value in the reference table. Locked handles are permanent
    /// GC roots; held handles are invalidated (not reused) once the value
    /// becomes unreachable from true roots.
    pub fn acquire_ref(&mut self, value: Value, lock: bool) -> ExecResult<Ref> {
        if self.refs.slot_count() >= i32::MAX as usize {
            return Err(self.memory_error());
        }
        Ok(self.refs.acquire(value, lock))
    }

    /// Release a handle back to the free list. An invalid handle is an API
    /// usage error, reported through the normal error path.
    pub fn release_ref(&mut self, handle: Ref) -> ExecResult<()> {
        match self.refs.release(handle) {
            Ok(()) => Ok(()),
            Err(_) => Err(self.raise("invalid reference handle passed to release")),
        }
    }

    pub fn resolve_ref(&self, handle: Ref) -> RefLookup {
        self.refs.resolve(handle)
    }

    // -- Hooks & collaborators --

    pub fn set_call_hook(&mut self, hook: Option<Hook>) {
        self.call_hook = hook;
    }

    pub fn set_line_hook(&mut self, hook: Option<Hook>) {
        self.line_hook = hook;
    }

    pub fn set_interpreter(&mut self, interp: Option<InterpFn>) {
        self.interpreter = interp;
    }

    pub fn set_text_parser(&mut self, parser: Option<LoadFn>) {
        self.text_parser = parser;
    }

    pub fn set_binary_loader(&mut self, loader: Option<LoadFn>) {
        self.binary_loader = loader;
    }

    /// Install a callable invoked with nil at the end of every collection
    /// pass (one-shot end-of-collection logic for the embedding). The
    /// sentinel itself is a GC root.
    pub fn set_gc_sentinel(&mut self, sentinel: Value) {
        self.gc_sentinel = sentinel;
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new(DEFAULT_STACK)
    }
}
