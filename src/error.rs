use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// Outcome of a protected operation. Numeric values are part of the
/// embedding ABI and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    /// An error raised during execution (type errors, stack overflow,
    /// explicit raises from natives).
    RuntimeError = 1,
    /// A source file could not be opened.
    FileError = 2,
    /// The parser or binary loader rejected its input.
    SyntaxError = 3,
    /// Allocation limits exhausted. Never routed through the user
    /// error reporter.
    OutOfMemory = 4,
    /// A failure occurred while already handling a failure (stack
    /// overflow inside the overflow handler). No message is built for
    /// this status.
    ErrorInError = 5,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::RuntimeError => "runtime error",
            Status::FileError => "file error",
            Status::SyntaxError => "syntax error",
            Status::OutOfMemory => "out of memory",
            Status::ErrorInError => "error while handling error",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Unwind
// ---------------------------------------------------------------------------

/// The payload carried by an in-flight unwind. Any human-readable message
/// was already delivered to the error reporter at the raise site, so only
/// the status travels up to the recovery point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind {
    pub status: Status,
}

impl Unwind {
    pub(crate) fn new(status: Status) -> Self {
        Self { status }
    }
}

impl fmt::Display for Unwind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unwinding: {}", self.status)
    }
}

/// Result alias used by every fallible core operation. `Err` means an
/// unwind is in flight toward the nearest recovery point.
pub type ExecResult<T> = Result<T, Unwind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::RuntimeError.code(), 1);
        assert_eq!(Status::FileError.code(), 2);
        assert_eq!(Status::SyntaxError.code(), 3);
        assert_eq!(Status::OutOfMemory.code(), 4);
        assert_eq!(Status::ErrorInError.code(), 5);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::RuntimeError).unwrap();
        assert_eq!(json, "\"runtime_error\"");
    }
}
