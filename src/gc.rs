use std::fmt;

use serde::Serialize;

use crate::call::{self, ResultCount};
use crate::context::Context;
use crate::error::ExecResult;
use crate::heap::Heap;
use crate::tagmethod::{self, TagEvent};
use crate::trace;
use crate::value::{ClosureId, ProtoId, StrId, TableId, UserDataId, Value};

/// Threshold the first pass fires at, in allocation units.
const INITIAL_THRESHOLD: usize = 150;

// ---------------------------------------------------------------------------
// Collector state
// ---------------------------------------------------------------------------

pub(crate) struct GcState {
    /// Allocation-unit level the next pass triggers at. Doubled (or bumped
    /// by an explicit increment) after each pass, damping frequency as the
    /// live set grows.
    pub(crate) threshold: usize,
    /// Reentrancy latch: finalizers run through the ordinary call protocol,
    /// whose allocation paths must not start a pass inside a pass.
    collecting: bool,
    passes: u64,
    last_recovered: usize,
}

impl GcState {
    pub(crate) fn new() -> Self {
        GcState {
            threshold: INITIAL_THRESHOLD,
            collecting: false,
            passes: 0,
            last_recovered: 0,
        }
    }
}

/// Point-in-time collector statistics, for host tooling.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GcStats {
    pub units_in_use: usize,
    pub threshold: usize,
    pub passes: u64,
    pub last_recovered: usize,
}

impl fmt::Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gc: {} units live, threshold {}, {} passes, last pass recovered {}",
            self.units_in_use, self.threshold, self.passes, self.last_recovered
        )
    }
}

impl Context {
    pub fn gc_stats(&self) -> GcStats {
        GcStats {
            units_in_use: self.heap.units(),
            threshold: self.gc.threshold,
            passes: self.gc.passes,
            last_recovered: self.gc.last_recovered,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// The only collector entry allocation paths call: run a full pass once the
/// live total reaches the adaptive threshold.
pub fn check_gc(cx: &mut Context) -> ExecResult<()> {
    if cx.heap.units() >= cx.gc.threshold {
        collect(cx, 0)?;
    }
    Ok(())
}

/// Force a stop-the-world mark-and-sweep pass and report the allocation
/// units recovered. `increment` of zero doubles the threshold off the new
/// live total; nonzero sets `live + increment`.
pub fn collect(cx: &mut Context, increment: usize) -> ExecResult<usize> {
    if cx.gc.collecting {
        return Ok(0);
    }
    cx.gc.collecting = true;
    let before = cx.heap.units();

    mark_roots(cx);
    cx.refs.invalidate_unreachable(&cx.heap);
    let doomed = sweep(&mut cx.heap);

    // Finalizers allocate through the ordinary call protocol; keep the
    // threshold well out of reach until the pass is over.
    cx.gc.threshold = before.saturating_mul(4).max(INITIAL_THRESHOLD);
    if let Err(unwind) = run_finalizers(cx, &doomed) {
        cx.gc.collecting = false;
        return Err(unwind);
    }
    // measure around the free alone: finalizers and the sentinel allocate
    // through the ordinary call protocol, which must not skew (or
    // underflow) the recovery figure
    let before_free = cx.heap.units();
    free_doomed(&mut cx.heap, &doomed);
    let recovered = before_free - cx.heap.units();
    cx.gc.threshold = if increment == 0 {
        (2 * cx.heap.units()).max(INITIAL_THRESHOLD)
    } else {
        cx.heap.units() + increment
    };
    cx.gc.passes += 1;
    cx.gc.last_recovered = recovered;
    cx.gc.collecting = false;

    if trace::enabled(trace::Level::Debug) {
        trace::emit(
            trace::Level::Debug,
            "gc",
            &format!(
                "pass {}: recovered {} units, {} live, next threshold {}",
                cx.gc.passes,
                recovered,
                cx.heap.units(),
                cx.gc.threshold
            ),
        );
    }
    Ok(recovered)
}

// ---------------------------------------------------------------------------
// Mark phase
// ---------------------------------------------------------------------------

/// Roots: the execution stack, global bindings (values pin their names),
/// Locked reference entries and the end-of-pass sentinel. Tag-method event
/// names are pinned at interning time and never considered.
fn mark_roots(cx: &mut Context) {
    for slot in 0..cx.stack.top() {
        let v = cx.stack.get(slot);
        mark_value(&mut cx.heap, v);
    }
    let globals: Vec<(StrId, Value)> = cx.globals.iter().map(|(k, v)| (*k, *v)).collect();
    for (name, value) in globals {
        mark_string(&mut cx.heap, name);
        mark_value(&mut cx.heap, value);
    }
    let locked: Vec<Value> = cx.refs.locked_values().collect();
    for value in locked {
        mark_value(&mut cx.heap, value);
    }
    let sentinel = cx.gc_sentinel;
    mark_value(&mut cx.heap, sentinel);
}

/// Type-directed recursive visit. Idempotent: a marked node is skipped, so
/// cycles terminate.
fn mark_value(heap: &mut Heap, value: Value) {
    match value {
        Value::String(id) => mark_string(heap, id),
        Value::Table(id) => mark_table(heap, id),
        Value::Closure(id) => mark_closure(heap, id),
        Value::Proto(id) => mark_proto(heap, id),
        Value::UserData(id) => mark_userdata(heap, id),
        Value::Frame(info) => mark_closure(heap, info.closure),
        Value::Nil | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn mark_string(heap: &mut Heap, id: StrId) {
    heap.strings.get_mut(id.0).mark = true;
}

fn mark_table(heap: &mut Heap, id: TableId) {
    if heap.table(id).mark {
        return;
    }
    heap.table_mut(id).mark = true;
    if let Some(meta) = heap.table(id).meta {
        mark_table(heap, meta);
    }
    let n = heap.table(id).pairs.len();
    for i in 0..n {
        let (k, v) = heap.table(id).pairs[i];
        mark_value(heap, k);
        mark_value(heap, v);
    }
}

fn mark_closure(heap: &mut Heap, id: ClosureId) {
    if heap.closure(id).mark {
        return;
    }
    heap.closures.get_mut(id.0).mark = true;
    if let crate::heap::ClosureKind::Interpreted(proto) = heap.closure(id).kind {
        mark_proto(heap, proto);
    }
    let n = heap.closure(id).upvalues.len();
    for i in 0..n {
        let v = heap.closure(id).upvalues[i];
        mark_value(heap, v);
    }
}

fn mark_proto(heap: &mut Heap, id: ProtoId) {
    if heap.proto(id).mark {
        return;
    }
    heap.protos.get_mut(id.0).mark = true;
    let source = heap.proto(id).source;
    mark_string(heap, source);
    let nconsts = heap.proto(id).consts.len();
    for i in 0..nconsts {
        let v = heap.proto(id).consts[i];
        mark_value(heap, v);
    }
    let nvars = heap.proto(id).locvars.len();
    for i in 0..nvars {
        let name = heap.proto(id).locvars[i].name;
        mark_string(heap, name);
    }
}

fn mark_userdata(heap: &mut Heap, id: UserDataId) {
    if heap.userdata(id).mark {
        return;
    }
    heap.userdata.get_mut(id.0).mark = true;
    if let Some(meta) = heap.userdata(id).meta {
        mark_table(heap, meta);
    }
}

// ---------------------------------------------------------------------------
// Sweep phase
// ---------------------------------------------------------------------------

/// Everything the mark phase did not reach, detached but not yet freed so
/// finalizers can still see intact objects (including their metatables).
struct Doomed {
    strings: Vec<StrId>,
    tables: Vec<TableId>,
    protos: Vec<ProtoId>,
    closures: Vec<ClosureId>,
    userdata: Vec<UserDataId>,
}

/// Scan each arena: collect unmarked (non-fixed) entries as doomed and
/// clear survivor marks so the next pass starts clean.
fn sweep(heap: &mut Heap) -> Doomed {
    let mut doomed = Doomed {
        strings: Vec::new(),
        tables: Vec::new(),
        protos: Vec::new(),
        closures: Vec::new(),
        userdata: Vec::new(),
    };
    for id in heap.strings.live_ids().collect::<Vec<_>>() {
        let s = heap.strings.get_mut(id);
        if s.mark || s.fixed {
            s.mark = false;
        } else {
            doomed.strings.push(StrId(id));
        }
    }
    for id in heap.tables.live_ids().collect::<Vec<_>>() {
        let t = heap.tables.get_mut(id);
        if t.mark {
            t.mark = false;
        } else {
            doomed.tables.push(TableId(id));
        }
    }
    for id in heap.protos.live_ids().collect::<Vec<_>>() {
        let p = heap.protos.get_mut(id);
        if p.mark {
            p.mark = false;
        } else {
            doomed.protos.push(ProtoId(id));
        }
    }
    for id in heap.closures.live_ids().collect::<Vec<_>>() {
        let c = heap.closures.get_mut(id);
        if c.mark {
            c.mark = false;
        } else {
            doomed.closures.push(ClosureId(id));
        }
    }
    for id in heap.userdata.live_ids().collect::<Vec<_>>() {
        let u = heap.userdata.get_mut(id);
        if u.mark {
            u.mark = false;
        } else {
            doomed.userdata.push(UserDataId(id));
        }
    }
    doomed
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// Invoke the `gc` tag method for every doomed table and userdata, then the
/// installed end-of-pass sentinel with nil. Backing storage is released
/// only after all of these ran.
fn run_finalizers(cx: &mut Context, doomed: &Doomed) -> ExecResult<()> {
    for &id in &doomed.tables {
        finalize_value(cx, Value::Table(id))?;
    }
    for &id in &doomed.userdata {
        finalize_value(cx, Value::UserData(id))?;
    }
    let sentinel = cx.gc_sentinel;
    if sentinel.is_callable() {
        call_finalizer(cx, sentinel, Value::Nil)?;
    }
    Ok(())
}

fn finalize_value(cx: &mut Context, value: Value) -> ExecResult<()> {
    let tm = tagmethod::tag_method_for(&mut cx.heap, &cx.tm_names, value, TagEvent::Gc);
    if let Some(finalizer) = tm {
        call_finalizer(cx, finalizer, value)?;
    }
    Ok(())
}

fn call_finalizer(cx: &mut Context, finalizer: Value, value: Value) -> ExecResult<()> {
    let slot = cx.top();
    cx.push(finalizer)?;
    cx.push(value)?;
    call::call(cx, slot, ResultCount::Exactly(0))
}

fn free_doomed(heap: &mut Heap, doomed: &Doomed) {
    for &id in &doomed.tables {
        heap.free_table(id);
    }
    for &id in &doomed.closures {
        heap.free_closure(id);
    }
    for &id in &doomed.protos {
        heap.free_proto(id);
    }
    for &id in &doomed.userdata {
        heap.free_userdata(id);
    }
    for &id in &doomed.strings {
        heap.free_string(id);
    }
}
