// Skein Token Definitions

use crate::error::SourcePos;
use crate::vm::ops::{BinaryOp, UnaryOp};
use crate::vm::Value;
use std::fmt;

/// All token types in Skein
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals (numbers, strings and substituted named constants)
    Literal(Value),

    // Identifiers
    Identifier(String),
    /// `#name`, already checked against the directive table
    Directive(String),

    // Keywords
    Var,
    Const,
    Function,
    If,
    Else,
    While,
    Do,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Static,

    // Arithmetic
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %

    // Bitwise
    LessLess,       // <<
    GreaterGreater, // >>
    Ampersand,      // &
    Caret,          // ^
    Pipe,           // |
    Tilde,          // ~

    // Logical and comparison
    Bang,         // !
    And,          // &&
    Or,           // ||
    EqualEqual,   // ==
    BangEqual,    // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=

    // Assignment
    Equal,               // =
    PlusEqual,           // +=
    MinusEqual,          // -=
    StarEqual,           // *=
    SlashEqual,          // /=
    PercentEqual,        // %=
    LessLessEqual,       // <<=
    GreaterGreaterEqual, // >>=
    AmpersandEqual,      // &=
    CaretEqual,          // ^=
    PipeEqual,           // |=
    PlusPlus,            // ++
    MinusMinus,          // --

    // Delimiters
    LeftParen,    // (
    RightParen,   // )
    LeftBrace,    // {
    RightBrace,   // }
    LeftBracket,  // [
    RightBracket, // ]
    Comma,        // ,
    Semicolon,    // ;
    Dot,          // .
    Colon,        // :

    Eof,
}

impl TokenKind {
    /// The binary operator this token spells, if any
    pub fn binary_op(&self) -> Option<BinaryOp> {
        match self {
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            TokenKind::Percent => Some(BinaryOp::Mod),
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            TokenKind::LessLess => Some(BinaryOp::Shl),
            TokenKind::GreaterGreater => Some(BinaryOp::Shr),
            TokenKind::Ampersand => Some(BinaryOp::BitAnd),
            TokenKind::Caret => Some(BinaryOp::BitXor),
            TokenKind::Pipe => Some(BinaryOp::BitOr),
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessEqual => Some(BinaryOp::LessEqual),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterEqual => Some(BinaryOp::GreaterEqual),
            TokenKind::EqualEqual => Some(BinaryOp::Equal),
            TokenKind::BangEqual => Some(BinaryOp::NotEqual),
            TokenKind::And => Some(BinaryOp::And),
            TokenKind::Or => Some(BinaryOp::Or),
            _ => None,
        }
    }

    /// The operator folded into a compound assignment (`+=` -> `+`)
    pub fn compound_op(&self) -> Option<BinaryOp> {
        match self {
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::PercentEqual => Some(BinaryOp::Mod),
            TokenKind::LessLessEqual => Some(BinaryOp::Shl),
            TokenKind::GreaterGreaterEqual => Some(BinaryOp::Shr),
            TokenKind::AmpersandEqual => Some(BinaryOp::BitAnd),
            TokenKind::CaretEqual => Some(BinaryOp::BitXor),
            TokenKind::PipeEqual => Some(BinaryOp::BitOr),
            _ => None,
        }
    }

    pub fn unary_op(&self) -> Option<UnaryOp> {
        match self {
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        }
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Var
                | TokenKind::Const
                | TokenKind::Function
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::Do
                | TokenKind::For
                | TokenKind::Switch
                | TokenKind::Case
                | TokenKind::Default
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Return
                | TokenKind::Static
        )
    }
}

pub fn keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "var" => TokenKind::Var,
        "const" => TokenKind::Const,
        "function" => TokenKind::Function,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "for" => TokenKind::For,
        "switch" => TokenKind::Switch,
        "case" => TokenKind::Case,
        "default" => TokenKind::Default,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "return" => TokenKind::Return,
        "static" => TokenKind::Static,
        _ => return None,
    };
    Some(kind)
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Literal(Value::Str(s)) => write!(f, "\"{}\"", s),
            TokenKind::Literal(v) => write!(f, "{}", v),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::Directive(s) => write!(f, "#{}", s),
            TokenKind::Var => write!(f, "var"),
            TokenKind::Const => write!(f, "const"),
            TokenKind::Function => write!(f, "function"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::While => write!(f, "while"),
            TokenKind::Do => write!(f, "do"),
            TokenKind::For => write!(f, "for"),
            TokenKind::Switch => write!(f, "switch"),
            TokenKind::Case => write!(f, "case"),
            TokenKind::Default => write!(f, "default"),
            TokenKind::Break => write!(f, "break"),
            TokenKind::Continue => write!(f, "continue"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::Static => write!(f, "static"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::LessLess => write!(f, "<<"),
            TokenKind::GreaterGreater => write!(f, ">>"),
            TokenKind::Ampersand => write!(f, "&"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Tilde => write!(f, "~"),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::And => write!(f, "&&"),
            TokenKind::Or => write!(f, "||"),
            TokenKind::EqualEqual => write!(f, "=="),
            TokenKind::BangEqual => write!(f, "!="),
            TokenKind::Less => write!(f, "<"),
            TokenKind::LessEqual => write!(f, "<="),
            TokenKind::Greater => write!(f, ">"),
            TokenKind::GreaterEqual => write!(f, ">="),
            TokenKind::Equal => write!(f, "="),
            TokenKind::PlusEqual => write!(f, "+="),
            TokenKind::MinusEqual => write!(f, "-="),
            TokenKind::StarEqual => write!(f, "*="),
            TokenKind::SlashEqual => write!(f, "/="),
            TokenKind::PercentEqual => write!(f, "%="),
            TokenKind::LessLessEqual => write!(f, "<<="),
            TokenKind::GreaterGreaterEqual => write!(f, ">>="),
            TokenKind::AmpersandEqual => write!(f, "&="),
            TokenKind::CaretEqual => write!(f, "^="),
            TokenKind::PipeEqual => write!(f, "|="),
            TokenKind::PlusPlus => write!(f, "++"),
            TokenKind::MinusMinus => write!(f, "--"),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::LeftBrace => write!(f, "{{"),
            TokenKind::RightBrace => write!(f, "}}"),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// A token with its kind and position information
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
}

impl Token {
    pub fn new(kind: TokenKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
