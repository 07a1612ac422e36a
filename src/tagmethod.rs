use crate::heap::Heap;
use crate::value::{StrId, TableId, Value};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Behavior-override events a metatable can supply. The discriminant order
/// is fixed: it indexes the interned-name array and the per-table negative
/// cache bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TagEvent {
    Index = 0,
    NewIndex,
    Gc,
    Eq,
    Mode,
    GetTable,
    SetTable,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Unm,
    Lt,
    Le,
    Concat,
    Call,
}

impl TagEvent {
    pub const COUNT: usize = 17;

    pub const ALL: [TagEvent; Self::COUNT] = [
        TagEvent::Index,
        TagEvent::NewIndex,
        TagEvent::Gc,
        TagEvent::Eq,
        TagEvent::Mode,
        TagEvent::GetTable,
        TagEvent::SetTable,
        TagEvent::Add,
        TagEvent::Sub,
        TagEvent::Mul,
        TagEvent::Div,
        TagEvent::Pow,
        TagEvent::Unm,
        TagEvent::Lt,
        TagEvent::Le,
        TagEvent::Concat,
        TagEvent::Call,
    ];

    /// Key under which the override is stored in a metatable.
    pub fn name(self) -> &'static str {
        match self {
            TagEvent::Index => "__index",
            TagEvent::NewIndex => "__newindex",
            TagEvent::Gc => "__gc",
            TagEvent::Eq => "__eq",
            TagEvent::Mode => "__mode",
            TagEvent::GetTable => "__gettable",
            TagEvent::SetTable => "__settable",
            TagEvent::Add => "__add",
            TagEvent::Sub => "__sub",
            TagEvent::Mul => "__mul",
            TagEvent::Div => "__div",
            TagEvent::Pow => "__pow",
            TagEvent::Unm => "__unm",
            TagEvent::Lt => "__lt",
            TagEvent::Le => "__le",
            TagEvent::Concat => "__concat",
            TagEvent::Call => "__call",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Intern every event name once, pinned so the collector never considers
/// them. Called exactly once per context, at construction.
pub(crate) fn init_names(heap: &mut Heap) -> [StrId; TagEvent::COUNT] {
    let mut names = [StrId(0); TagEvent::COUNT];
    for ev in TagEvent::ALL {
        names[ev as usize] = heap.intern_fixed(ev.name());
    }
    names
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Probe a metatable for an event override. Absence is cached in the
/// table's bitmask so hot events on override-free tables skip the probe.
pub fn tag_method(
    heap: &mut Heap,
    names: &[StrId; TagEvent::COUNT],
    table: TableId,
    event: TagEvent,
) -> Option<Value> {
    if heap.table(table).absent & event.bit() != 0 {
        return None;
    }
    let key = Value::String(names[event as usize]);
    let found = heap.table_get(table, key);
    if found.is_nil() {
        heap.table_mut(table).absent |= event.bit();
        None
    } else {
        Some(found)
    }
}

/// Event override for an arbitrary value: routed through the metatable for
/// tables and userdata, absent for every other type.
pub fn tag_method_for(
    heap: &mut Heap,
    names: &[StrId; TagEvent::COUNT],
    value: Value,
    event: TagEvent,
) -> Option<Value> {
    let meta = match value {
        Value::Table(id) => heap.table(id).meta,
        Value::UserData(id) => heap.userdata(id).meta,
        _ => None,
    };
    meta.and_then(|m| tag_method(heap, names, m, event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Heap, [StrId; TagEvent::COUNT]) {
        let mut heap = Heap::new();
        let names = init_names(&mut heap);
        (heap, names)
    }

    #[test]
    fn lookup_finds_installed_override() {
        let (mut heap, names) = setup();
        let meta = heap.new_table();
        let t = heap.new_table();
        heap.set_metatable(t, Some(meta));
        let handler = Value::Number(99.0); // any non-nil stand-in
        let key = Value::String(names[TagEvent::Call as usize]);
        heap.table_set(meta, key, handler);
        assert_eq!(
            tag_method_for(&mut heap, &names, Value::Table(t), TagEvent::Call),
            Some(handler)
        );
    }

    #[test]
    fn absence_is_cached_per_table() {
        let (mut heap, names) = setup();
        let meta_a = heap.new_table();
        let meta_b = heap.new_table();
        assert_eq!(tag_method(&mut heap, &names, meta_a, TagEvent::Add), None);
        assert_ne!(heap.table(meta_a).absent & (1 << TagEvent::Add as u32), 0);
        // the cache is per-table: meta_b is untouched
        assert_eq!(heap.table(meta_b).absent, 0);
    }

    #[test]
    fn table_mutation_clears_the_cache() {
        let (mut heap, names) = setup();
        let meta = heap.new_table();
        assert_eq!(tag_method(&mut heap, &names, meta, TagEvent::Index), None);
        let key = Value::String(names[TagEvent::Index as usize]);
        heap.table_set(meta, key, Value::Number(1.0));
        assert_eq!(
            tag_method(&mut heap, &names, meta, TagEvent::Index),
            Some(Value::Number(1.0))
        );
    }

    #[test]
    fn non_table_values_have_no_overrides() {
        let (mut heap, names) = setup();
        assert_eq!(
            tag_method_for(&mut heap, &names, Value::Number(1.0), TagEvent::Add),
            None
        );
        assert_eq!(
            tag_method_for(&mut heap, &names, Value::Nil, TagEvent::Call),
            None
        );
    }

    #[test]
    fn event_names_are_fixed_strings() {
        let (heap, names) = setup();
        for ev in TagEvent::ALL {
            assert_eq!(heap.str_text(names[ev as usize]), ev.name());
        }
    }
}
