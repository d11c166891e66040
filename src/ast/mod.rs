// Skein AST Module
// Build nodes produced by the parser and consumed by the compiler.
// Every node has the same shape; the kind decides how `literal`, `name`,
// `argument` and `children` are read.

use crate::error::SourcePos;
use crate::vm::ops::{BinaryOp, UnaryOp};
use crate::vm::Value;
use std::fmt;

/// Block `argument` marking a `var a, b;` list, whose names belong to the
/// enclosing scope
pub const DECLARATION_LIST: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    // ==================== Expressions ====================
    /// `literal` holds the value
    Literal,
    /// `name` holds the identifier
    Identifier,
    /// `argument` = UnaryOp code; children: [operand]
    Unary,
    /// `argument` = BinaryOp code; children: [left, right]
    Binary,
    /// `name` = callee; children: arguments
    Call,
    /// children: elements
    Array,
    /// `argument` = 1 when static; children: StructField nodes
    Structure,
    /// `name` = field, `argument` = const flag; children: [value]
    StructField,
    /// One accessor link: children: [base, key]
    Access,
    /// `argument` = delta; children: [target]. Yields the new value.
    PreAdjust,
    /// `argument` = delta; children: [target]. Yields the old value.
    PostAdjust,

    // ==================== Statements ====================
    /// `argument` = DECLARATION_LIST for `var a, b;`; children: statements
    Block,
    /// Statement-level `x++` / `--x`: `argument` = delta; children: [target]
    Adjust,
    /// `argument` = BinaryOp code for compound forms, -1 for plain `=`;
    /// children: [target, value]
    Assign,
    /// A call whose result is discarded; children: [call]
    Discard,
    /// `name` = variable, `argument` = const flag; children: [] or [init]
    Declare,
    /// children: [condition, then] or [condition, then, else]
    If,
    /// children: [condition, body]
    While,
    /// children: [body, condition]
    DoWhile,
    /// children: [init, condition, step, body]; absent parts are Empty
    For,
    /// children: [header, Case...]
    Switch,
    /// `argument` = 1 for default; children: [value, body] or [body]
    Case,
    Break,
    Continue,
    /// children: [] or [value]
    Return,
    /// `name` = function, `literal` = array of parameter names; children: [body]
    Function,
    /// `name` = directive, `literal` = its argument
    Directive,
    Empty,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One node of the build tree. Children are owned, never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildNode {
    pub kind: NodeKind,
    pub pos: SourcePos,
    pub literal: Value,
    pub name: String,
    pub argument: i64,
    pub children: Vec<BuildNode>,
}

impl BuildNode {
    pub fn new(kind: NodeKind, pos: SourcePos) -> Self {
        Self {
            kind,
            pos,
            literal: Value::Int(0),
            name: String::new(),
            argument: 0,
            children: Vec::new(),
        }
    }

    pub fn literal(value: Value, pos: SourcePos) -> Self {
        let mut node = Self::new(NodeKind::Literal, pos);
        node.literal = value;
        node
    }

    pub fn named(kind: NodeKind, name: impl Into<String>, pos: SourcePos) -> Self {
        let mut node = Self::new(kind, pos);
        node.name = name.into();
        node
    }

    pub fn empty(pos: SourcePos) -> Self {
        Self::new(NodeKind::Empty, pos)
    }

    pub fn with_argument(mut self, argument: i64) -> Self {
        self.argument = argument;
        self
    }

    pub fn with_child(mut self, child: BuildNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: Vec<BuildNode>) -> Self {
        self.children = children;
        self
    }

    pub fn unary(op: UnaryOp, operand: BuildNode, pos: SourcePos) -> Self {
        Self::new(NodeKind::Unary, pos)
            .with_argument(op as i64)
            .with_child(operand)
    }

    pub fn binary(op: BinaryOp, left: BuildNode, right: BuildNode, pos: SourcePos) -> Self {
        Self::new(NodeKind::Binary, pos)
            .with_argument(op as i64)
            .with_children(vec![left, right])
    }

    pub fn is_literal(&self) -> bool {
        self.kind == NodeKind::Literal
    }

    pub fn is_empty(&self) -> bool {
        self.kind == NodeKind::Empty
    }

    /// Identifiers and accessor chains can be written to
    pub fn is_assignable(&self) -> bool {
        matches!(self.kind, NodeKind::Identifier | NodeKind::Access)
    }

    pub fn binary_op(&self) -> Option<BinaryOp> {
        u8::try_from(self.argument).ok().and_then(BinaryOp::from_u8)
    }

    pub fn unary_op(&self) -> Option<UnaryOp> {
        u8::try_from(self.argument).ok().and_then(UnaryOp::from_u8)
    }

    /// The innermost base of an accessor chain
    pub fn chain_root(&self) -> &BuildNode {
        let mut node = self;
        while node.kind == NodeKind::Access {
            match node.children.first() {
                Some(base) => node = base,
                None => break,
            }
        }
        node
    }

    /// Count nodes in the subtree, used by tests and debug logging
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(BuildNode::size).sum::<usize>()
    }
}
