// Skein Actions
// The linear instruction list a compiled program executes

use crate::error::SourcePos;
use crate::lexer::Directive;
use crate::vm::ops::{BinaryOp, UnaryOp};
use crate::vm::value::Constness;
use crate::vm::Value;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Which variable table a get/declare addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Scope {
    /// Engine-owned globals
    Global = 0,
    /// The thread's script-level locals
    Script = 1,
    /// The innermost inline call's locals
    Frame = 2,
}

impl Scope {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Scope::Global),
            1 => Some(Scope::Script),
            2 => Some(Scope::Frame),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Push `literal`
    PushLiteral,
    Pop,
    /// Duplicate the top item
    Dup,
    /// Copy the top item below the second: `a b` -> `b a b`
    DupX1,
    /// Pop a value into slot `argument`; `literal` is the name
    Declare { scope: Scope, constness: Constness },
    /// Push a reference to slot `argument`; `literal` is the name
    Get(Scope),
    /// Pop a value and a reference, write the value through the reference
    Set,
    /// Pop a key, step the reference below it into that element or field.
    /// `argument` 1 marks the last link of a store target.
    Access,
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Jump to `argument`
    Jump,
    /// Pop the condition, jump when falsy
    JumpIfFalse,
    /// Pop the condition, jump when truthy
    JumpIfTrue,
    /// `&&`: falsy top stays and jumps, truthy top is popped
    AndBranch,
    /// `||`: truthy top stays and jumps, falsy top is popped
    OrBranch,
    /// Pop a case value; on a match with the header below it, pop the header and jump
    SwitchJump,
    /// Call host function `literal` with `argument` arguments
    CallNative,
    /// Call inline function `literal` with `argument` arguments
    CallInline,
    /// Leave the current program; `argument` = 1 when a value is on the stack
    Return,
    /// Register the embedded inline function with the thread
    DefineInline,
    /// Pop `argument` values into an array
    BuildArray,
    /// Pop one value per field; `literal` lists `[name, constness]` pairs,
    /// `argument` = 1 for a static structure
    BuildStruct,
    /// Apply a directive with `literal` as its argument
    Directive(Directive),
}

impl ActionKind {
    /// Kinds whose `argument` is an absolute action index
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            ActionKind::Jump
                | ActionKind::JumpIfFalse
                | ActionKind::JumpIfTrue
                | ActionKind::AndBranch
                | ActionKind::OrBranch
                | ActionKind::SwitchJump
        )
    }

    /// Wire code: tag byte plus one operand byte
    pub fn code(&self) -> (u8, u8) {
        match self {
            ActionKind::PushLiteral => (0, 0),
            ActionKind::Pop => (1, 0),
            ActionKind::Dup => (2, 0),
            ActionKind::DupX1 => (3, 0),
            ActionKind::Declare { scope, constness } => (4, (*scope as u8) << 4 | *constness as u8),
            ActionKind::Get(scope) => (5, *scope as u8),
            ActionKind::Set => (6, 0),
            ActionKind::Access => (7, 0),
            ActionKind::Unary(op) => (8, *op as u8),
            ActionKind::Binary(op) => (9, *op as u8),
            ActionKind::Jump => (10, 0),
            ActionKind::JumpIfFalse => (11, 0),
            ActionKind::JumpIfTrue => (12, 0),
            ActionKind::AndBranch => (13, 0),
            ActionKind::OrBranch => (14, 0),
            ActionKind::SwitchJump => (15, 0),
            ActionKind::CallNative => (16, 0),
            ActionKind::CallInline => (17, 0),
            ActionKind::Return => (18, 0),
            ActionKind::DefineInline => (19, 0),
            ActionKind::BuildArray => (20, 0),
            ActionKind::BuildStruct => (21, 0),
            ActionKind::Directive(d) => (22, *d as u8),
        }
    }

    pub fn from_code(tag: u8, operand: u8) -> Option<Self> {
        let kind = match tag {
            0 => ActionKind::PushLiteral,
            1 => ActionKind::Pop,
            2 => ActionKind::Dup,
            3 => ActionKind::DupX1,
            4 => ActionKind::Declare {
                scope: Scope::from_u8(operand >> 4)?,
                constness: Constness::from_u8(operand & 0x0F)?,
            },
            5 => ActionKind::Get(Scope::from_u8(operand)?),
            6 => ActionKind::Set,
            7 => ActionKind::Access,
            8 => ActionKind::Unary(UnaryOp::from_u8(operand)?),
            9 => ActionKind::Binary(BinaryOp::from_u8(operand)?),
            10 => ActionKind::Jump,
            11 => ActionKind::JumpIfFalse,
            12 => ActionKind::JumpIfTrue,
            13 => ActionKind::AndBranch,
            14 => ActionKind::OrBranch,
            15 => ActionKind::SwitchJump,
            16 => ActionKind::CallNative,
            17 => ActionKind::CallInline,
            18 => ActionKind::Return,
            19 => ActionKind::DefineInline,
            20 => ActionKind::BuildArray,
            21 => ActionKind::BuildStruct,
            22 => ActionKind::Directive(Directive::from_u8(operand)?),
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Declare { scope, constness } => {
                write!(f, "Declare.{:?}", scope)?;
                if constness.is_const() {
                    write!(f, ".const")?;
                }
                Ok(())
            }
            ActionKind::Get(scope) => write!(f, "Get.{:?}", scope),
            ActionKind::Unary(op) => write!(f, "Unary {}", op),
            ActionKind::Binary(op) => write!(f, "Binary {}", op),
            ActionKind::Directive(d) => write!(f, "Directive #{}", d.name()),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One instruction
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub pos: SourcePos,
    pub literal: Value,
    pub argument: i64,
    /// Only set on `DefineInline`
    pub inline: Option<Arc<InlineFunction>>,
}

impl Action {
    pub fn new(kind: ActionKind, pos: SourcePos) -> Self {
        Self {
            kind,
            pos,
            literal: Value::Int(0),
            argument: 0,
            inline: None,
        }
    }

    pub fn with_literal(mut self, literal: Value) -> Self {
        self.literal = literal;
        self
    }

    pub fn with_argument(mut self, argument: i64) -> Self {
        self.argument = argument;
        self
    }

    /// The name carried by get/declare/call actions
    pub fn name(&self) -> &str {
        self.literal.as_str().unwrap_or("")
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<18}", self.kind.to_string())?;
        match self.kind {
            ActionKind::PushLiteral | ActionKind::Directive(_) => {
                write!(f, " {}", self.literal.repr())
            }
            ActionKind::Get(_) | ActionKind::Declare { .. } => {
                write!(f, " {} @{}", self.name(), self.argument)
            }
            ActionKind::CallNative | ActionKind::CallInline => {
                write!(f, " {}/{}", self.name(), self.argument)
            }
            ActionKind::DefineInline => match &self.inline {
                Some(func) => write!(f, " {}/{}", func.name, func.arity()),
                None => Ok(()),
            },
            ActionKind::BuildArray | ActionKind::BuildStruct | ActionKind::Return => {
                write!(f, " {}", self.argument)
            }
            ActionKind::Access if self.argument == 1 => write!(f, " store"),
            kind if kind.is_jump() => write!(f, " -> {:04}", self.argument),
            _ => Ok(()),
        }
    }
}

/// A function compiled into its own action list
#[derive(Debug, Clone)]
pub struct InlineFunction {
    pub name: String,
    pub params: Vec<String>,
    /// Parameters occupy the first slots of `program.locals()`
    pub program: Program,
}

impl InlineFunction {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A compiled action list plus the names of the locals it declares.
/// Cloning shares the actions.
#[derive(Debug, Clone)]
pub struct Program {
    actions: Arc<[Action]>,
    locals: Arc<[String]>,
}

impl Program {
    pub fn new(actions: Vec<Action>, locals: Vec<String>) -> Self {
        Self {
            actions: actions.into(),
            locals: locals.into(),
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn get(&self, ip: usize) -> Option<&Action> {
        self.actions.get(ip)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Local names in slot order
    pub fn locals(&self) -> &[String] {
        &self.locals
    }

    /// Programs are the same if they share the same action list
    pub fn ptr_eq(&self, other: &Program) -> bool {
        Arc::ptr_eq(&self.actions, &other.actions)
    }

    /// Render a readable listing, inline functions nested below their definition
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, name, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, name: &str, indent: usize) {
        let prefix = "  ".repeat(indent);
        let _ = writeln!(out, "{}--- {} ---", prefix, name);
        if !self.locals.is_empty() {
            let _ = writeln!(out, "{}locals: {}", prefix, self.locals.join(", "));
        }
        for (ip, action) in self.actions.iter().enumerate() {
            let _ = writeln!(out, "{}{:04} {:>8}  {}", prefix, ip, action.pos.to_string(), action);
            if let Some(func) = &action.inline {
                func.program.disassemble_into(out, &func.name, indent + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        let kinds = [
            ActionKind::Declare {
                scope: Scope::Frame,
                constness: Constness::Unassigned,
            },
            ActionKind::Get(Scope::Global),
            ActionKind::Binary(BinaryOp::Or),
            ActionKind::Unary(UnaryOp::BitNot),
            ActionKind::Directive(Directive::Limit),
            ActionKind::SwitchJump,
        ];
        for kind in kinds {
            let (tag, operand) = kind.code();
            assert_eq!(ActionKind::from_code(tag, operand), Some(kind));
        }
        assert_eq!(ActionKind::from_code(99, 0), None);
    }

    #[test]
    fn test_disassemble_lists_actions() {
        let pos = SourcePos::new(1, 1);
        let program = Program::new(
            vec![
                Action::new(ActionKind::PushLiteral, pos).with_literal(Value::Int(3)),
                Action::new(ActionKind::Jump, pos).with_argument(0),
            ],
            vec!["x".into()],
        );
        let listing = program.disassemble("main");
        assert!(listing.contains("--- main ---"));
        assert!(listing.contains("locals: x"));
        assert!(listing.contains("PushLiteral"));
        assert!(listing.contains("-> 0000"));
    }
}
