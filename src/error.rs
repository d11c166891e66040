// Skein Error Handling Module
// Position-tagged errors shared by every phase: lex, build, compile, runtime, host

use colored::*;
use std::fmt;

/// Largest column that fits in a packed source position
pub const MAX_COLUMN: u32 = 31_999;
const LINE_STRIDE: u32 = 32_000;

/// A packed source position: `line * 32000 + min(column, 31999)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourcePos(pub u32);

impl SourcePos {
    pub const NONE: SourcePos = SourcePos(0);

    pub fn new(line: u32, column: u32) -> Self {
        SourcePos(
            line.saturating_mul(LINE_STRIDE)
                .saturating_add(column.min(MAX_COLUMN)),
        )
    }

    pub fn line(&self) -> u32 {
        self.0 / LINE_STRIDE
    }

    pub fn column(&self) -> u32 {
        self.0 % LINE_STRIDE
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line(), self.column())
    }
}

/// The phase boundary an error unwinds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    Lex,
    Build,
    Compile,
    Runtime,
    Host,
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPhase::Lex => write!(f, "ParseError"),
            ErrorPhase::Build => write!(f, "BuildError"),
            ErrorPhase::Compile => write!(f, "CompileError"),
            ErrorPhase::Runtime => write!(f, "RuntimeError"),
            ErrorPhase::Host => write!(f, "HostError"),
        }
    }
}

/// Stable error codes; the numeric value is what hosts branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Lex / build
    UnterminatedString = 100,
    UnknownDirective = 101,
    UnexpectedChar = 102,
    MalformedLiteral = 103,
    UnexpectedToken = 110,
    FuncRedefinition = 111,
    DuplicateDefault = 112,
    MisplacedControl = 113,

    // Compile
    UnknownNode = 200,
    UndefinedSymbol = 201,
    Redefinition = 202,
    ConstViolation = 203,
    ArityMismatch = 204,

    // Runtime
    InvalidVariable = 300,
    BadOperand = 301,
    DivisionByZero = 302,
    EmptyIndex = 303,
    IndexOutOfBounds = 304,
    BadAccessor = 305,
    MissingCallee = 306,
    PauseNotAllowed = 307,
    StackOverflow = 308,
    StepLimit = 309,
    Cancelled = 310,

    // Host
    TypeAssertion = 400,
    HostFailure = 401,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        use ErrorCode::*;
        let all = [
            UnterminatedString,
            UnknownDirective,
            UnexpectedChar,
            MalformedLiteral,
            UnexpectedToken,
            FuncRedefinition,
            DuplicateDefault,
            MisplacedControl,
            UnknownNode,
            UndefinedSymbol,
            Redefinition,
            ConstViolation,
            ArityMismatch,
            InvalidVariable,
            BadOperand,
            DivisionByZero,
            EmptyIndex,
            IndexOutOfBounds,
            BadAccessor,
            MissingCallee,
            PauseNotAllowed,
            StackOverflow,
            StepLimit,
            Cancelled,
            TypeAssertion,
            HostFailure,
        ];
        all.into_iter().find(|c| c.as_u16() == code)
    }

    /// The phase a code belongs to
    pub fn phase(self) -> ErrorPhase {
        match self as u16 {
            100..=109 => ErrorPhase::Lex,
            110..=199 => ErrorPhase::Build,
            200..=299 => ErrorPhase::Compile,
            300..=399 => ErrorPhase::Runtime,
            _ => ErrorPhase::Host,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Main error type for Skein
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub phase: ErrorPhase,
    pub code: ErrorCode,
    pub message: String,
    pub pos: SourcePos,
    pub help: Option<String>,
    /// Name of the host callable that raised the error, if any
    pub callee: Option<String>,
    source_line: Option<String>,
}

impl ScriptError {
    pub fn new(code: ErrorCode, message: impl Into<String>, pos: SourcePos) -> Self {
        Self {
            phase: code.phase(),
            code,
            message: message.into(),
            pos,
            help: None,
            callee: None,
            source_line: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_callee(mut self, callee: impl Into<String>) -> Self {
        self.phase = ErrorPhase::Host;
        self.callee = Some(callee.into());
        self
    }

    /// Tag an error that has no position yet (host errors are raised without one)
    pub fn at(mut self, pos: SourcePos) -> Self {
        if self.pos.is_none() {
            self.pos = pos;
        }
        self
    }

    /// Attach the offending source line for display
    pub fn with_source(mut self, source: &str) -> Self {
        let line = self.pos.line() as usize;
        if line > 0 {
            self.source_line = source.lines().nth(line - 1).map(String::from);
        }
        self
    }

    /// Format the error for terminal display
    pub fn format(&self) -> String {
        let mut output = String::new();

        let header = match &self.callee {
            Some(callee) => format!(
                "{}[{}]: {} in '{}' at {}",
                self.phase.to_string().red().bold(),
                self.code.as_u16(),
                self.message.white().bold(),
                callee,
                self.pos
            ),
            None => format!(
                "{}[{}]: {} at {}",
                self.phase.to_string().red().bold(),
                self.code.as_u16(),
                self.message.white().bold(),
                self.pos
            ),
        };
        output.push_str(&header);
        output.push('\n');

        if let Some(ref line_content) = self.source_line {
            let line_num_str = format!("{:>4} |", self.pos.line());
            output.push_str(&format!("{} {}\n", line_num_str.red(), line_content));
            let spaces = " ".repeat(6 + self.pos.column() as usize);
            output.push_str(&format!("{}{}\n", spaces, "^".red().bold()));
        }

        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }

        output
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.callee {
            Some(callee) => write!(
                f,
                "{} {}: {} (in {} at {})",
                self.phase, self.code, self.message, callee, self.pos
            ),
            None => write!(
                f,
                "{} {}: {} at {}",
                self.phase, self.code, self.message, self.pos
            ),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Result type for Skein operations
pub type SkeinResult<T> = Result<T, ScriptError>;

// Convenience constructors for common errors
impl ScriptError {
    pub fn parse(code: ErrorCode, message: impl Into<String>, pos: SourcePos) -> Self {
        Self::new(code, message, pos)
    }

    pub fn syntax(message: impl Into<String>, pos: SourcePos) -> Self {
        Self::new(ErrorCode::UnexpectedToken, message, pos)
    }

    pub fn undefined(name: &str, pos: SourcePos) -> Self {
        Self::new(
            ErrorCode::UndefinedSymbol,
            format!("Undefined symbol '{}'", name),
            pos,
        )
    }

    pub fn const_violation(name: &str, pos: SourcePos) -> Self {
        Self::new(
            ErrorCode::ConstViolation,
            format!("Cannot assign to constant '{}'", name),
            pos,
        )
    }

    pub fn bad_operand(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadOperand, message, SourcePos::NONE)
    }

    /// A runtime failure; codes shared with the compiler (const violations)
    /// still report the runtime phase
    pub fn runtime(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut err = Self::new(code, message, SourcePos::NONE);
        err.phase = ErrorPhase::Runtime;
        err
    }

    /// A host callable argument had the wrong type
    pub fn type_assertion(index: usize, expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorCode::TypeAssertion,
            format!(
                "Argument {} must be {}, got {}",
                index + 1,
                expected,
                actual
            ),
            SourcePos::NONE,
        )
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::HostFailure, message, SourcePos::NONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_packing() {
        let pos = SourcePos::new(12, 7);
        assert_eq!(pos.0, 12 * 32_000 + 7);
        assert_eq!(pos.line(), 12);
        assert_eq!(pos.column(), 7);
    }

    #[test]
    fn test_position_column_clamped() {
        let pos = SourcePos::new(3, 50_000);
        assert_eq!(pos.line(), 3);
        assert_eq!(pos.column(), MAX_COLUMN);
    }

    #[test]
    fn test_code_phase_and_roundtrip() {
        assert_eq!(ErrorCode::UnknownDirective.phase(), ErrorPhase::Lex);
        assert_eq!(ErrorCode::DuplicateDefault.phase(), ErrorPhase::Build);
        assert_eq!(ErrorCode::ArityMismatch.phase(), ErrorPhase::Compile);
        assert_eq!(ErrorCode::BadAccessor.phase(), ErrorPhase::Runtime);
        assert_eq!(ErrorCode::TypeAssertion.phase(), ErrorPhase::Host);
        assert_eq!(
            ErrorCode::from_u16(ErrorCode::StepLimit.as_u16()),
            Some(ErrorCode::StepLimit)
        );
        assert_eq!(ErrorCode::from_u16(9999), None);
    }

    #[test]
    fn test_callee_marks_host_phase() {
        let err = ScriptError::host("boom").with_callee("explode").at(SourcePos::new(2, 4));
        assert_eq!(err.phase, ErrorPhase::Host);
        assert_eq!(err.callee.as_deref(), Some("explode"));
        assert_eq!(err.pos, SourcePos::new(2, 4));
        assert!(err.to_string().contains("explode"));
    }
}
