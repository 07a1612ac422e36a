use std::collections::HashMap;

use crate::context::NativeFn;
use crate::value::{ClosureId, ProtoId, StrId, TableId, UserDataId, Value};

// ---------------------------------------------------------------------------
// Allocation units
// ---------------------------------------------------------------------------
//
// Collection pressure is measured in abstract units, not bytes. Each object
// kind carries a fixed cost; the collector fires when the live total crosses
// an adaptive threshold and reports recovery in the same units.

pub(crate) const UNITS_STRING: usize = 1;
pub(crate) const UNITS_TABLE: usize = 2;
pub(crate) const UNITS_CLOSURE: usize = 1;
pub(crate) const UNITS_PROTO: usize = 5;
pub(crate) const UNITS_USERDATA: usize = 1;

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Slotted pool with an index free list. Freed slots are reused by later
/// allocations; ids are only minted here and only retired by the collector,
/// so a live id always resolves.
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> u32 {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(value);
            id
        } else {
            self.slots.push(Some(value));
            (self.slots.len() - 1) as u32
        }
    }

    pub(crate) fn get(&self, id: u32) -> &T {
        self.slots[id as usize].as_ref().expect("dangling heap id")
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> &mut T {
        self.slots[id as usize].as_mut().expect("dangling heap id")
    }

    fn remove(&mut self, id: u32) -> T {
        let value = self.slots[id as usize].take().expect("dangling heap id");
        self.free.push(id);
        value
    }

    pub(crate) fn live_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as u32))
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

// ---------------------------------------------------------------------------
// Heap objects
// ---------------------------------------------------------------------------

pub(crate) struct Interned {
    pub(crate) text: String,
    /// Fixed strings (tag-method event names) are permanent roots the
    /// collector never considers.
    pub(crate) fixed: bool,
    pub(crate) mark: bool,
}

/// Association-list table with an optional metatable and a per-table
/// negative cache of absent tag methods (one bit per event).
pub struct Table {
    pub pairs: Vec<(Value, Value)>,
    pub meta: Option<TableId>,
    pub(crate) absent: u32,
    pub(crate) mark: bool,
}

/// Local-variable debug record: the name is live on `[start_line, end_line]`.
#[derive(Debug, Clone, Copy)]
pub struct LocVar {
    pub name: StrId,
    pub start_line: u32,
    pub end_line: u32,
}

/// Immutable compiled function descriptor. One prototype may back many
/// closures, each with its own upvalue bindings.
pub struct Proto {
    /// Opaque instruction words, interpreted by the external opcode engine.
    pub code: Vec<u32>,
    pub consts: Vec<Value>,
    pub locvars: Vec<LocVar>,
    pub source: StrId,
    pub line_defined: u32,
    pub(crate) mark: bool,
}

#[derive(Clone, Copy)]
pub enum ClosureKind {
    /// Host function obeying the native ABI.
    Native(NativeFn),
    /// Compiled body, run by the external opcode interpreter.
    Interpreted(ProtoId),
}

/// Callable heap object: native code or a prototype, plus captured upvalues.
pub struct Closure {
    pub kind: ClosureKind,
    pub upvalues: Vec<Value>,
    pub(crate) mark: bool,
}

/// Host payload with an optional metatable (for finalizers and operator
/// overrides). The `data` token is opaque to the core.
pub struct UserData {
    pub data: u64,
    pub meta: Option<TableId>,
    pub(crate) mark: bool,
}

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

/// Arenas for every collectable object kind, plus the string intern map and
/// the allocation-unit ledger the collector's threshold works against.
pub struct Heap {
    pub(crate) strings: Arena<Interned>,
    pub(crate) tables: Arena<Table>,
    pub(crate) protos: Arena<Proto>,
    pub(crate) closures: Arena<Closure>,
    pub(crate) userdata: Arena<UserData>,
    intern_map: HashMap<String, StrId>,
    units: usize,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Heap {
            strings: Arena::new(),
            tables: Arena::new(),
            protos: Arena::new(),
            closures: Arena::new(),
            userdata: Arena::new(),
            intern_map: HashMap::new(),
            units: 0,
        }
    }

    /// Live allocation units.
    pub fn units(&self) -> usize {
        self.units
    }

    // -- Strings --

    pub fn intern(&mut self, s: &str) -> StrId {
        if let Some(&id) = self.intern_map.get(s) {
            return id;
        }
        let id = StrId(self.strings.insert(Interned {
            text: s.to_string(),
            fixed: false,
            mark: false,
        }));
        self.intern_map.insert(s.to_string(), id);
        self.units += UNITS_STRING;
        id
    }

    /// Intern and pin: the string is never swept. Used for tag-method event
    /// names so the collector never has to consider them.
    pub(crate) fn intern_fixed(&mut self, s: &str) -> StrId {
        let id = self.intern(s);
        self.strings.get_mut(id.0).fixed = true;
        id
    }

    pub fn str_text(&self, id: StrId) -> &str {
        &self.strings.get(id.0).text
    }

    pub(crate) fn free_string(&mut self, id: StrId) {
        let interned = self.strings.remove(id.0);
        self.intern_map.remove(&interned.text);
        self.units -= UNITS_STRING;
    }

    // -- Tables --

    pub fn new_table(&mut self) -> TableId {
        self.units += UNITS_TABLE;
        TableId(self.tables.insert(Table {
            pairs: Vec::new(),
            meta: None,
            absent: 0,
            mark: false,
        }))
    }

    pub fn table(&self, id: TableId) -> &Table {
        self.tables.get(id.0)
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        self.tables.get_mut(id.0)
    }

    pub fn table_get(&self, id: TableId, key: Value) -> Value {
        self.table(id)
            .pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or(Value::Nil)
    }

    /// Insert, replace or (for a nil value) remove a pair. Mutating a table
    /// invalidates its negative tag-method cache, since the table may be in
    /// use as a metatable.
    pub fn table_set(&mut self, id: TableId, key: Value, value: Value) {
        let table = self.table_mut(id);
        table.absent = 0;
        match table.pairs.iter().position(|(k, _)| *k == key) {
            Some(i) if value.is_nil() => {
                table.pairs.remove(i);
            }
            Some(i) => table.pairs[i].1 = value,
            None if !value.is_nil() => table.pairs.push((key, value)),
            None => {}
        }
    }

    pub fn set_metatable(&mut self, id: TableId, meta: Option<TableId>) {
        let table = self.table_mut(id);
        table.meta = meta;
        table.absent = 0;
    }

    pub(crate) fn free_table(&mut self, id: TableId) {
        self.tables.remove(id.0);
        self.units -= UNITS_TABLE;
    }

    // -- Prototypes --

    pub fn new_proto(
        &mut self,
        code: Vec<u32>,
        consts: Vec<Value>,
        locvars: Vec<LocVar>,
        source: StrId,
        line_defined: u32,
    ) -> ProtoId {
        self.units += UNITS_PROTO;
        ProtoId(self.protos.insert(Proto {
            code,
            consts,
            locvars,
            source,
            line_defined,
            mark: false,
        }))
    }

    pub fn proto(&self, id: ProtoId) -> &Proto {
        self.protos.get(id.0)
    }

    /// Name of the n-th local variable (1-based) alive at `line`, for debug
    /// hooks and error messages.
    pub fn local_name(&self, id: ProtoId, n: usize, line: u32) -> Option<&str> {
        let proto = self.proto(id);
        let mut count = 0;
        for lv in &proto.locvars {
            if lv.start_line <= line && line <= lv.end_line {
                count += 1;
                if count == n {
                    return Some(self.str_text(lv.name));
                }
            }
        }
        None
    }

    pub(crate) fn free_proto(&mut self, id: ProtoId) {
        self.protos.remove(id.0);
        self.units -= UNITS_PROTO;
    }

    // -- Closures --

    pub fn new_closure(&mut self, kind: ClosureKind, upvalues: Vec<Value>) -> ClosureId {
        self.units += UNITS_CLOSURE;
        ClosureId(self.closures.insert(Closure {
            kind,
            upvalues,
            mark: false,
        }))
    }

    /// Wrap a prototype in a zero-upvalue closure (compilation units,
    /// loader results).
    pub fn simple_closure(&mut self, proto: ProtoId) -> ClosureId {
        self.new_closure(ClosureKind::Interpreted(proto), Vec::new())
    }

    pub fn closure(&self, id: ClosureId) -> &Closure {
        self.closures.get(id.0)
    }

    pub(crate) fn free_closure(&mut self, id: ClosureId) {
        self.closures.remove(id.0);
        self.units -= UNITS_CLOSURE;
    }

    // -- Userdata --

    pub fn new_userdata(&mut self, data: u64, meta: Option<TableId>) -> UserDataId {
        self.units += UNITS_USERDATA;
        UserDataId(self.userdata.insert(UserData {
            data,
            meta,
            mark: false,
        }))
    }

    pub fn userdata(&self, id: UserDataId) -> &UserData {
        self.userdata.get(id.0)
    }

    pub fn userdata_mut(&mut self, id: UserDataId) -> &mut UserData {
        self.userdata.get_mut(id.0)
    }

    pub(crate) fn free_userdata(&mut self, id: UserDataId) {
        self.userdata.remove(id.0);
        self.units -= UNITS_USERDATA;
    }
}
