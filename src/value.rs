use std::fmt;

// ---------------------------------------------------------------------------
// Heap ids
// ---------------------------------------------------------------------------

/// Interned string identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrId(pub u32);

/// Table identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub u32);

/// Closure identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureId(pub u32);

/// Compiled prototype identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoId(pub u32);

/// Userdata identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserDataId(pub u32);

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Program counter value recorded in a frame marker while the frame is not
/// yet executing (e.g. observed by a call hook before the body starts).
pub const PC_INACTIVE: u32 = u32::MAX;

/// Data carried by an in-stack call-frame marker: the closure being run and
/// its current program counter (updated by the opcode interpreter, read by
/// debug hooks).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub closure: ClosureId,
    pub pc: u32,
}

/// Tagged value. Heap variants hold typed ids into the [`crate::heap::Heap`]
/// arenas, so `Value` itself stays `Copy` and assignment is a plain copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(StrId),
    Table(TableId),
    Closure(ClosureId),
    Proto(ProtoId),
    UserData(UserDataId),
    /// In-stack call-frame marker. Written into the callee slot for the
    /// duration of a call and destroyed when results collapse into place.
    /// Never a legal operand anywhere else.
    Frame(FrameInfo),
}

impl Value {
    /// User-visible type name, as it appears in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Closure(_) | Value::Proto(_) | Value::Frame(_) => "function",
            Value::UserData(_) => "userdata",
        }
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Directly callable without tag-method mediation.
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(id) => write!(f, "string: {:#x}", id.0),
            Value::Table(id) => write!(f, "table: {:#x}", id.0),
            Value::Closure(id) => write!(f, "function: {:#x}", id.0),
            Value::Proto(id) => write!(f, "function: {:#x}", id.0),
            Value::UserData(id) => write!(f, "userdata: {:#x}", id.0),
            Value::Frame(info) => write!(f, "frame: {:#x}", info.closure.0),
        }
    }
}
