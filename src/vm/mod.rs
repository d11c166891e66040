pub mod exec;
pub mod native;
pub mod ops;
pub mod reference;
pub mod thread;
pub mod value;
pub mod variable;

pub use exec::{run, ExecContext};
pub use native::{Host, NativeCall, NativeFn, NativeRegistry, OutputHook, VARIADIC};
pub use ops::{BinaryOp, UnaryOp};
pub use reference::{Accessor, Origin, ValueRef};
pub use thread::{InlineFrame, Thread, ThreadId, ThreadStatus};
pub use value::{Constness, Field, Structure, Value, ValueKind};
pub use variable::{Variable, VariableTable};
