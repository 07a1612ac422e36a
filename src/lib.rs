//! Execution core of the Lantern embeddable dynamic language.
//!
//! This crate owns the four coupled runtime concerns: the growable value
//! stack shared by native and interpreted calls, the recovery-point
//! mechanism that unwinds errors back to a known-good state, the
//! stop-the-world mark-and-sweep collector, and the host-facing reference
//! table that stays consistent across collections. Tag-method dispatch lets
//! values without native support for an operation defer to per-type
//! overrides.
//!
//! The parser, the binary-chunk format and the opcode interpreter are
//! external collaborators, plugged in through [`Context::set_text_parser`],
//! [`Context::set_binary_loader`] and [`Context::set_interpreter`].
//!
//! ```
//! use lantern_core::{api, Context, ResultCount, Status, Value};
//!
//! fn greet(cx: &mut Context) -> lantern_core::ExecResult<usize> {
//!     cx.push_string("hello from native code")?;
//!     Ok(1)
//! }
//!
//! let mut cx = Context::default();
//! let f = cx.heap_mut().new_closure(
//!     lantern_core::heap::ClosureKind::Native(greet),
//!     Vec::new(),
//! );
//! cx.push(Value::Closure(f)).unwrap();
//! let status = api::protected_call(&mut cx, 0, ResultCount::All);
//! assert_eq!(status, Status::Ok);
//! ```

pub mod api;
pub mod call;
pub mod context;
pub mod error;
pub mod gc;
pub mod heap;
pub mod refs;
pub mod stack;
pub mod tagmethod;
pub mod value;

mod trace;

pub use api::CHUNK_SENTINEL;
pub use call::{line_hook, ResultCount};
pub use context::{
    Context, DebugEvent, Hook, HookKind, InterpFn, LoadFn, NativeFn, ERROR_REPORTER_GLOBAL,
};
pub use error::{ExecResult, Status, Unwind};
pub use gc::GcStats;
pub use refs::{Ref, RefLookup};
pub use stack::{DEFAULT_STACK, EXTRA_STACK, MIN_STACK};
pub use tagmethod::TagEvent;
pub use value::{ClosureId, ProtoId, StrId, TableId, UserDataId, Value};
