use crate::heap::Heap;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Host-visible handle into the reference table. Independent of any stack
/// position, so it stays valid across calls and collections (subject to the
/// Locked/Held lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ref(pub i32);

impl Ref {
    /// Reserved handle for nil. Never occupies a slot.
    pub const NIL: Ref = Ref(-1);
}

/// What a handle currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefLookup {
    /// The handle is live; here is its value.
    Value(Value),
    /// The collector reclaimed the referent (the handle was Held and no
    /// other root kept the value alive). Terminal until released.
    Collected,
    /// Never a valid handle, or already released.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Permanent GC root.
    Locked,
    /// Root only until a collection finds it unreachable from true roots.
    Held,
    /// Reclaimed by the collector. Distinguishable from Invalid; never
    /// auto-reused, only explicit release frees the slot.
    Collected,
    /// On the free list; `next` is the next free slot (-1 terminates).
    Free { next: i32 },
}

struct RefSlot {
    value: Value,
    state: SlotState,
}

// ---------------------------------------------------------------------------
// Reference table
// ---------------------------------------------------------------------------

/// Handle table mapping small integers to heap values on behalf of the
/// host, outside the collector's normal root scan. Locked entries are
/// roots; Held entries are invalidated (not reused) when unreachable.
pub struct RefTable {
    slots: Vec<RefSlot>,
    free_head: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidHandle;

impl RefTable {
    pub(crate) fn new() -> Self {
        RefTable {
            slots: Vec::new(),
            free_head: -1,
        }
    }

    /// Store a value and hand back a handle. Nil maps to the reserved
    /// sentinel. A free slot is reused if one exists, else the table grows.
    pub fn acquire(&mut self, value: Value, lock: bool) -> Ref {
        if value.is_nil() {
            return Ref::NIL;
        }
        let state = if lock {
            SlotState::Locked
        } else {
            SlotState::Held
        };
        let index = if self.free_head >= 0 {
            let index = self.free_head as usize;
            match self.slots[index].state {
                SlotState::Free { next } => self.free_head = next,
                _ => unreachable!("free list points at a non-free slot"),
            }
            index
        } else {
            self.slots.push(RefSlot {
                value: Value::Nil,
                state: SlotState::Free { next: -1 },
            });
            self.slots.len() - 1
        };
        self.slots[index] = RefSlot { value, state };
        Ref(index as i32)
    }

    /// Return a slot to the free list. Legal on Locked, Held and Collected
    /// handles (and a no-op on the nil sentinel); anything else is an API
    /// usage error the caller reports through the error path.
    pub(crate) fn release(&mut self, handle: Ref) -> Result<(), InvalidHandle> {
        if handle == Ref::NIL {
            return Ok(());
        }
        let index = handle.0;
        if index < 0 || index as usize >= self.slots.len() {
            return Err(InvalidHandle);
        }
        let slot = &mut self.slots[index as usize];
        if matches!(slot.state, SlotState::Free { .. }) {
            return Err(InvalidHandle);
        }
        slot.value = Value::Nil;
        slot.state = SlotState::Free {
            next: self.free_head,
        };
        self.free_head = index;
        Ok(())
    }

    /// Three-way lookup: the value for Locked/Held handles, `Collected` when
    /// the collector reclaimed the referent, `Invalid` otherwise.
    pub fn resolve(&self, handle: Ref) -> RefLookup {
        if handle == Ref::NIL {
            return RefLookup::Value(Value::Nil);
        }
        if handle.0 < 0 {
            return RefLookup::Invalid;
        }
        match self.slots.get(handle.0 as usize) {
            Some(slot) => match slot.state {
                SlotState::Locked | SlotState::Held => RefLookup::Value(slot.value),
                SlotState::Collected => RefLookup::Collected,
                SlotState::Free { .. } => RefLookup::Invalid,
            },
            None => RefLookup::Invalid,
        }
    }

    /// Values of Locked entries, for the collector's root scan. Held
    /// entries are deliberately not roots.
    pub(crate) fn locked_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Locked)
            .map(|s| s.value)
    }

    /// After marking: every Held entry whose value did not get marked by a
    /// true root becomes Collected. Runs only inside a collection pass.
    pub(crate) fn invalidate_unreachable(&mut self, heap: &Heap) {
        for slot in &mut self.slots {
            if slot.state == SlotState::Held && !is_marked(heap, slot.value) {
                slot.state = SlotState::Collected;
            }
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// Whether the mark phase reached this value. Non-collectable values count
/// as always marked.
fn is_marked(heap: &Heap, value: Value) -> bool {
    match value {
        Value::String(id) => heap.strings.get(id.0).mark || heap.strings.get(id.0).fixed,
        Value::Table(id) => heap.table(id).mark,
        Value::Closure(id) => heap.closure(id).mark,
        Value::Proto(id) => heap.proto(id).mark,
        Value::UserData(id) => heap.userdata(id).mark,
        _ => true,
    }
}
