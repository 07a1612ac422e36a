use crate::value::Value;

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Minimum free slots a native callee or hook can rely on.
pub const MIN_STACK: usize = 20;

/// Reserve kept above the soft limit so the overflow handler has room to
/// build and deliver its error message.
pub const EXTRA_STACK: usize = 2 * MIN_STACK;

/// Default value-stack capacity for [`crate::Context::new`].
pub const DEFAULT_STACK: usize = 1024;

// ---------------------------------------------------------------------------
// Execution Stack
// ---------------------------------------------------------------------------

/// The value stack shared by all nested calls in one execution context.
///
/// Three cursors: `base` (lowest slot visible to the active native call),
/// `top` (first free slot) and `limit` (index of the last usable slot).
/// Invariant at every observable boundary: `base <= top <= limit < len`.
///
/// The stack is sized once at construction with [`EXTRA_STACK`] slots of
/// overflow reserve; it never grows mid-call. Exhausting the headroom is a
/// reported error, not a resize.
pub struct ExecStack {
    slots: Vec<Value>,
    pub(crate) base: usize,
    pub(crate) top: usize,
    pub(crate) limit: usize,
}

impl ExecStack {
    /// A requested capacity below [`MIN_STACK`] is clamped up to it, so the
    /// soft limit always leaves usable room below the reserve.
    pub fn new(capacity: usize) -> Self {
        let mut stack = ExecStack {
            slots: vec![Value::Nil; capacity.max(MIN_STACK) + EXTRA_STACK],
            base: 0,
            top: 0,
            limit: 0,
        };
        stack.restore_limit();
        stack
    }

    /// Last usable slot when the overflow reserve is untouched.
    fn soft_limit(&self) -> usize {
        self.slots.len() - EXTRA_STACK - 1
    }

    /// Last slot, period. The limit only reaches this while an overflow
    /// error message is being built.
    fn hard_limit(&self) -> usize {
        self.slots.len() - 1
    }

    /// Free slots below the current limit.
    pub fn free_slots(&self) -> usize {
        self.limit - self.top
    }

    /// True while the overflow reserve has been handed out, i.e. we are
    /// already inside overflow handling.
    pub(crate) fn reserve_in_use(&self) -> bool {
        self.limit == self.hard_limit()
    }

    /// Extend the limit into the reserve so the overflow error path can
    /// push its message and call the reporter.
    pub(crate) fn grant_reserve(&mut self) {
        self.limit = self.hard_limit();
    }

    /// Recompute the limit after an unwind. If the top is still inside the
    /// reserve the extended limit stays in force.
    pub(crate) fn restore_limit(&mut self) {
        if self.top < self.soft_limit() {
            self.limit = self.soft_limit();
        }
    }

    pub fn get(&self, slot: usize) -> Value {
        self.slots[slot]
    }

    pub fn set(&mut self, slot: usize, value: Value) {
        self.slots[slot] = value;
    }

    /// Push without a headroom check. Callers must have verified headroom.
    pub(crate) fn push_unchecked(&mut self, value: Value) {
        debug_assert!(self.top <= self.limit);
        self.slots[self.top] = value;
        self.top += 1;
    }

    pub(crate) fn pop_unchecked(&mut self) -> Value {
        debug_assert!(self.top > self.base);
        self.top -= 1;
        self.slots[self.top]
    }

    /// Shift every value in `[pos, top)` one slot rightward, leaving a hole
    /// at `pos`. Used to synthesize a callee in front of an already-pushed
    /// non-callable value. Caller ensures one slot of headroom.
    pub(crate) fn open_slot(&mut self, pos: usize) {
        debug_assert!(pos <= self.top);
        for i in (pos..self.top).rev() {
            self.slots[i + 1] = self.slots[i];
        }
        self.top += 1;
    }

    pub fn top(&self) -> usize {
        self.top
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// `base <= top <= limit < len`. Checked by tests and debug assertions.
    pub fn invariant_holds(&self) -> bool {
        self.base <= self.top && self.top <= self.limit && self.limit < self.slots.len()
    }
}
