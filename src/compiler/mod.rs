pub mod action;
mod compiler;

pub use action::{Action, ActionKind, InlineFunction, Program, Scope};
pub use compiler::Compiler;
