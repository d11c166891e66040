// Skein Scanner (Lexer)
// Converts source code into a flat token sequence in a single pass

use super::directive::Directive;
use super::token::{keyword, Token, TokenKind};
use crate::error::{ErrorCode, ScriptError, SkeinResult, SourcePos};
use crate::vm::Value;
use rustc_hash::FxHashMap;

/// Scanner that tokenizes Skein source code
pub struct Scanner<'a> {
    source: Vec<char>,
    tokens: Vec<Token>,
    constants: Option<&'a FxHashMap<String, Value>>,
    start: usize,
    current: usize,
    line: u32,
    column: u32,
    start_line: u32,
    start_column: u32,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            constants: None,
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
        }
    }

    /// Identifiers matching a named constant are emitted as literal tokens
    pub fn with_constants(mut self, constants: &'a FxHashMap<String, Value>) -> Self {
        self.constants = Some(constants);
        self
    }

    /// Scan all tokens from the source
    pub fn scan_tokens(mut self) -> SkeinResult<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            SourcePos::new(self.line, self.column),
        ));

        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> SkeinResult<()> {
        let c = self.advance();

        match c {
            // Single character tokens
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),
            '~' => self.add_token(TokenKind::Tilde),
            '.' => {
                if self.peek().is_ascii_digit() {
                    self.number()?;
                } else {
                    self.add_token(TokenKind::Dot);
                }
            }

            // Operators (potentially multi-character)
            '+' => {
                let kind = if self.match_char('+') {
                    TokenKind::PlusPlus
                } else if self.match_char('=') {
                    TokenKind::PlusEqual
                } else {
                    TokenKind::Plus
                };
                self.add_token(kind);
            }
            '-' => {
                let kind = if self.match_char('-') {
                    TokenKind::MinusMinus
                } else if self.match_char('=') {
                    TokenKind::MinusEqual
                } else {
                    TokenKind::Minus
                };
                self.add_token(kind);
            }
            '*' => self.with_assign(TokenKind::Star, TokenKind::StarEqual),
            '%' => self.with_assign(TokenKind::Percent, TokenKind::PercentEqual),
            '^' => self.with_assign(TokenKind::Caret, TokenKind::CaretEqual),
            '/' => {
                if self.match_char('/') {
                    // Line comment
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment()?;
                } else {
                    self.with_assign(TokenKind::Slash, TokenKind::SlashEqual);
                }
            }
            '!' => self.with_assign(TokenKind::Bang, TokenKind::BangEqual),
            '=' => self.with_assign(TokenKind::Equal, TokenKind::EqualEqual),
            '<' => {
                if self.match_char('<') {
                    self.with_assign(TokenKind::LessLess, TokenKind::LessLessEqual);
                } else {
                    self.with_assign(TokenKind::Less, TokenKind::LessEqual);
                }
            }
            '>' => {
                if self.match_char('>') {
                    self.with_assign(TokenKind::GreaterGreater, TokenKind::GreaterGreaterEqual);
                } else {
                    self.with_assign(TokenKind::Greater, TokenKind::GreaterEqual);
                }
            }
            '&' => {
                if self.match_char('&') {
                    self.add_token(TokenKind::And);
                } else {
                    self.with_assign(TokenKind::Ampersand, TokenKind::AmpersandEqual);
                }
            }
            '|' => {
                if self.match_char('|') {
                    self.add_token(TokenKind::Or);
                } else {
                    self.with_assign(TokenKind::Pipe, TokenKind::PipeEqual);
                }
            }

            '#' => self.directive()?,

            // Whitespace
            ' ' | '\r' | '\t' => {}
            '\n' => self.newline(),

            '"' | '\'' => self.string(c)?,

            c if c.is_ascii_digit() => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => {
                return Err(self
                    .error(
                        ErrorCode::UnexpectedChar,
                        &format!("Unexpected character '{}'", c),
                    )
                    .with_help("Remove this character or check for typos"));
            }
        }

        Ok(())
    }

    fn with_assign(&mut self, plain: TokenKind, assign: TokenKind) {
        let kind = if self.match_char('=') { assign } else { plain };
        self.add_token(kind);
    }

    fn string(&mut self, quote_char: char) -> SkeinResult<()> {
        let mut value = String::new();

        while self.peek() != quote_char && !self.is_at_end() {
            let c = self.advance();
            match c {
                '\\' => {
                    if self.is_at_end() {
                        break;
                    }
                    let escaped = self.advance();
                    match escaped {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        '0' => value.push('\0'),
                        '"' => value.push('"'),
                        '\'' => value.push('\''),
                        '\\' => value.push('\\'),
                        other => {
                            return Err(self
                                .error(
                                    ErrorCode::MalformedLiteral,
                                    &format!("Invalid escape sequence '\\{}'", other),
                                )
                                .with_help("Valid escapes: \\n, \\r, \\t, \\0, \\\", \\', \\\\"));
                        }
                    }
                }
                '\n' => {
                    self.newline();
                    value.push('\n');
                }
                c => value.push(c),
            }
        }

        if self.is_at_end() {
            let quote_name = if quote_char == '"' { "double" } else { "single" };
            return Err(self
                .error(ErrorCode::UnterminatedString, "Unterminated string")
                .with_help(format!(
                    "Add a closing {} quote to terminate the string",
                    quote_name
                )));
        }

        // Closing quote
        self.advance();
        self.add_token(TokenKind::Literal(Value::Str(value)));
        Ok(())
    }

    fn number(&mut self) -> SkeinResult<()> {
        let first = self.source[self.start];

        // 0x / 0X forces hex
        if first == '0' && (self.peek() == 'x' || self.peek() == 'X') {
            self.advance();
            while self.peek().is_ascii_hexdigit() {
                self.advance();
            }
            let digits: String = self.source[self.start + 2..self.current].iter().collect();
            self.reject_suffix()?;
            let value = u64::from_str_radix(&digits, 16).map_err(|_| {
                self.error(
                    ErrorCode::MalformedLiteral,
                    &format!("Invalid hex literal '0x{}'", digits),
                )
            })?;
            self.add_token(TokenKind::Literal(Value::Int(value as i64)));
            return Ok(());
        }

        let mut is_float = first == '.';
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // A '.' before any alphabetic suffix makes a float
        if !is_float && self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        if (self.peek() == 'e' || self.peek() == 'E')
            && (self.peek_next().is_ascii_digit()
                || ((self.peek_next() == '+' || self.peek_next() == '-')
                    && self.peek_at(2).is_ascii_digit()))
        {
            is_float = true;
            self.advance();
            if self.peek() == '+' || self.peek() == '-' {
                self.advance();
            }
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        self.reject_suffix()?;

        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let value = if is_float {
            Value::Float(lexeme.parse::<f64>().map_err(|_| {
                self.error(
                    ErrorCode::MalformedLiteral,
                    &format!("Invalid number '{}'", lexeme),
                )
            })?)
        } else {
            Value::Int(lexeme.parse::<i64>().map_err(|_| {
                self.error(
                    ErrorCode::MalformedLiteral,
                    &format!("Integer literal '{}' is out of range", lexeme),
                )
            })?)
        };

        self.add_token(TokenKind::Literal(value));
        Ok(())
    }

    fn reject_suffix(&self) -> SkeinResult<()> {
        if self.peek().is_alphanumeric() || self.peek() == '_' {
            return Err(self.error(
                ErrorCode::MalformedLiteral,
                &format!("Unexpected '{}' after number", self.peek()),
            ));
        }
        Ok(())
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let kind = if let Some(kw) = keyword(&text) {
            kw
        } else if let Some(value) = self.constants.and_then(|c| c.get(&text)) {
            TokenKind::Literal(value.clone())
        } else {
            TokenKind::Identifier(text)
        };
        self.add_token(kind);
    }

    fn directive(&mut self) -> SkeinResult<()> {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }
        let name: String = self.source[self.start + 1..self.current].iter().collect();
        if Directive::from_name(&name).is_none() {
            return Err(self
                .error(
                    ErrorCode::UnknownDirective,
                    &format!("Unknown directive '#{}'", name),
                )
                .with_help("Known directives: #trace, #label, #limit"));
        }
        self.add_token(TokenKind::Directive(name));
        Ok(())
    }

    fn block_comment(&mut self) -> SkeinResult<()> {
        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            if self.advance() == '\n' {
                self.newline();
            }
        }

        Err(self
            .error(ErrorCode::UnexpectedChar, "Unterminated block comment")
            .with_help("Add '*/' to close the block comment"))
    }

    // Helper methods
    fn newline(&mut self) {
        self.line += 1;
        self.column = 1;
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_next(&self) -> char {
        self.peek_at(1)
    }

    fn peek_at(&self, n: usize) -> char {
        self.source.get(self.current + n).copied().unwrap_or('\0')
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            false
        } else {
            self.current += 1;
            self.column += 1;
            true
        }
    }

    fn add_token(&mut self, kind: TokenKind) {
        let pos = SourcePos::new(self.start_line, self.start_column);
        self.tokens.push(Token::new(kind, pos));
    }

    fn error(&self, code: ErrorCode, message: &str) -> ScriptError {
        ScriptError::parse(code, message, SourcePos::new(self.start_line, self.start_column))
    }
}

/// Tokenize a source string without named constants
pub fn tokenize(source: &str) -> SkeinResult<Vec<Token>> {
    Scanner::new(source).scan_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("12 0x1f 1.5 2e3 .5"),
            vec![
                TokenKind::Literal(Value::Int(12)),
                TokenKind::Literal(Value::Int(31)),
                TokenKind::Literal(Value::Float(1.5)),
                TokenKind::Literal(Value::Float(2000.0)),
                TokenKind::Literal(Value::Float(0.5)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_malformed_number() {
        let err = tokenize("12abc").unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedLiteral);
        let err = tokenize("99999999999999999999").unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedLiteral);
    }

    #[test]
    fn test_operators_and_compound_assign() {
        assert_eq!(
            kinds("a += 1; b <<= 2; c++; --d; e && f || !g"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::PlusEqual,
                TokenKind::Literal(Value::Int(1)),
                TokenKind::Semicolon,
                TokenKind::Identifier("b".into()),
                TokenKind::LessLessEqual,
                TokenKind::Literal(Value::Int(2)),
                TokenKind::Semicolon,
                TokenKind::Identifier("c".into()),
                TokenKind::PlusPlus,
                TokenKind::Semicolon,
                TokenKind::MinusMinus,
                TokenKind::Identifier("d".into()),
                TokenKind::Semicolon,
                TokenKind::Identifier("e".into()),
                TokenKind::And,
                TokenKind::Identifier("f".into()),
                TokenKind::Or,
                TokenKind::Bang,
                TokenKind::Identifier("g".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n" 'it\'s'"#),
            vec![
                TokenKind::Literal(Value::str("a\tb\n")),
                TokenKind::Literal(Value::str("it's")),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            tokenize("\"open").unwrap_err().code,
            ErrorCode::UnterminatedString
        );
        assert_eq!(
            tokenize("\"bad \\q\"").unwrap_err().code,
            ErrorCode::MalformedLiteral
        );
    }

    #[test]
    fn test_comments_track_lines() {
        let tokens = tokenize("// one\n/* two\nthree */ x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier("x".into()));
        assert_eq!(tokens[0].pos.line(), 3);
        assert_eq!(tokens[0].pos.column(), 10);
    }

    #[test]
    fn test_directives() {
        assert_eq!(
            kinds("#trace 1"),
            vec![
                TokenKind::Directive("trace".into()),
                TokenKind::Literal(Value::Int(1)),
                TokenKind::Eof,
            ]
        );
        let err = tokenize("#bogus 1").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownDirective);
    }

    #[test]
    fn test_named_constants_become_literals() {
        let mut constants = FxHashMap::default();
        constants.insert("LIMIT".to_string(), Value::Int(10));
        let tokens = Scanner::new("LIMIT limit")
            .with_constants(&constants)
            .scan_tokens()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Literal(Value::Int(10)));
        assert_eq!(tokens[1].kind, TokenKind::Identifier("limit".into()));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a @ b").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedChar);
        assert_eq!(err.pos, SourcePos::new(1, 3));
    }
}
