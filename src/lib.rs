// Skein Scripting Language
// An embeddable interpreter whose scripts run as pausable, cooperative threads

pub mod ast;
pub mod binary;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod scheduler;
pub mod vm;

pub use binary::{ByteSink, ByteSource, PersistError, SliceSource};
pub use compiler::Program;
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::{ErrorCode, ErrorPhase, ScriptError, SkeinResult, SourcePos};
pub use scheduler::Clock;
pub use vm::{
    Constness, NativeCall, NativeFn, Structure, Thread, ThreadId, ThreadStatus, Value, VARIADIC,
};
