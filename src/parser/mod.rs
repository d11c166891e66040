// Skein Parser
// Recursive descent builder that converts tokens into a build tree

mod expr;

use crate::ast::{BuildNode, NodeKind, DECLARATION_LIST};
use crate::error::{ErrorCode, ScriptError, SkeinResult, SourcePos};
use crate::lexer::{Directive, Token, TokenKind};
use crate::vm::value::Constness;
use crate::vm::Value;
use rustc_hash::FxHashSet;

/// Build a tree from tokens. Script mode wraps all statements in a block;
/// expression mode parses exactly one expression.
pub fn build(tokens: Vec<Token>, as_expression: bool) -> SkeinResult<BuildNode> {
    let mut parser = Parser::new(tokens);
    if as_expression {
        parser.parse_expression()
    } else {
        parser.parse_script()
    }
}

/// Recursive descent parser for Skein
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    /// Nesting depth of blocks and control bodies; functions need 0
    depth: usize,
    can_break: bool,
    can_continue: bool,
    in_function: bool,
    functions: FxHashSet<String>,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !tokens.last().is_some_and(Token::is_eof) {
            let pos = tokens.last().map(|t| t.pos).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, pos));
        }
        Self {
            tokens,
            current: 0,
            depth: 0,
            can_break: false,
            can_continue: false,
            in_function: false,
            functions: FxHashSet::default(),
        }
    }

    /// Parse the entire script
    pub fn parse_script(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.peek().pos;
        let mut statements = Vec::new();

        while !self.is_at_end() {
            statements.push(self.statement()?);
        }

        Ok(BuildNode::new(NodeKind::Block, pos).with_children(statements))
    }

    /// Parse a single expression that must consume every token
    pub fn parse_expression(&mut self) -> SkeinResult<BuildNode> {
        let expr = self.expression()?;
        self.match_token(&TokenKind::Semicolon);
        if !self.is_at_end() {
            return Err(self.error(&format!(
                "Unexpected '{}' after expression",
                self.peek().kind
            )));
        }
        Ok(expr)
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> SkeinResult<BuildNode> {
        match &self.peek().kind {
            TokenKind::LeftBrace => self.block(),
            TokenKind::Function => self.function_declaration(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Do => self.do_while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Switch => self.switch_statement(),
            TokenKind::Break => self.break_statement(),
            TokenKind::Continue => self.continue_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Directive(_) => self.directive_statement(),
            TokenKind::Semicolon => {
                let pos = self.advance().pos;
                Ok(BuildNode::empty(pos))
            }
            _ => {
                let stmt = self.simple_statement()?;
                self.consume(&TokenKind::Semicolon, "Expected ';' after statement")?;
                Ok(stmt)
            }
        }
    }

    /// Parse a nested statement, tracking depth for the top-level function rule
    fn nested(&mut self) -> SkeinResult<BuildNode> {
        self.depth += 1;
        let result = self.statement();
        self.depth -= 1;
        result
    }

    fn block(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume '{'
        self.depth += 1;
        let mut statements = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.depth -= 1;
                    return Err(e);
                }
            }
        }
        self.depth -= 1;

        self.consume(&TokenKind::RightBrace, "Expected '}' after block")?;
        Ok(BuildNode::new(NodeKind::Block, pos).with_children(statements))
    }

    /// Assignment, adjust, call or declaration without the trailing ';'
    fn simple_statement(&mut self) -> SkeinResult<BuildNode> {
        if self.check(&TokenKind::Var) || self.check(&TokenKind::Const) {
            return self.declaration();
        }

        let pos = self.peek().pos;
        let expr = self.expression()?;

        let compound = self.peek().kind.compound_op();
        if compound.is_some() || self.check(&TokenKind::Equal) {
            if !expr.is_assignable() {
                return Err(ScriptError::syntax("Invalid assignment target", pos)
                    .with_help("Only variables and element accessors can be assigned"));
            }
            self.advance();
            let value = self.expression()?;
            let op = compound.map(|op| op as i64).unwrap_or(-1);
            return Ok(BuildNode::new(NodeKind::Assign, pos)
                .with_argument(op)
                .with_children(vec![expr, value]));
        }

        match expr.kind {
            NodeKind::Call => Ok(BuildNode::new(NodeKind::Discard, pos).with_child(expr)),
            NodeKind::PreAdjust | NodeKind::PostAdjust => {
                let mut adjust = expr;
                adjust.kind = NodeKind::Adjust;
                Ok(adjust)
            }
            _ => Err(ScriptError::syntax(
                "Expected an assignment, call or increment statement",
                pos,
            )
            .with_help("An expression on its own has no effect")),
        }
    }

    /// `var a = 1, b;` or `const c = 2;`
    fn declaration(&mut self) -> SkeinResult<BuildNode> {
        let token = self.advance().clone(); // consume 'var' or 'const'
        let constness = if token.kind == TokenKind::Const {
            Constness::Unassigned
        } else {
            Constness::Mutable
        };

        let mut declarations = Vec::new();
        loop {
            let pos = self.peek().pos;
            let name = self.consume_identifier("Expected variable name")?;
            let mut node =
                BuildNode::named(NodeKind::Declare, name, pos).with_argument(constness as i64);
            if self.match_token(&TokenKind::Equal) {
                node.children.push(self.expression()?);
            }
            declarations.push(node);

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        if declarations.len() == 1 {
            Ok(declarations.remove(0))
        } else {
            Ok(BuildNode::new(NodeKind::Block, token.pos)
                .with_argument(DECLARATION_LIST)
                .with_children(declarations))
        }
    }

    fn function_declaration(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'function'

        if self.depth > 0 || self.in_function {
            return Err(
                ScriptError::syntax("Functions can only be declared at the top level", pos)
                    .with_help("Move this function out of the enclosing block"),
            );
        }

        let name = self.consume_identifier("Expected function name")?;
        if !self.functions.insert(name.clone()) {
            return Err(ScriptError::new(
                ErrorCode::FuncRedefinition,
                format!("Function '{}' is already defined", name),
                pos,
            ));
        }

        self.consume(&TokenKind::LeftParen, "Expected '(' after function name")?;
        let mut params: Vec<Value> = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let param_pos = self.peek().pos;
                let param = self.consume_identifier("Expected parameter name")?;
                if params.iter().any(|p| p.as_str() == Some(param.as_str())) {
                    return Err(ScriptError::syntax(
                        format!("Duplicate parameter '{}'", param),
                        param_pos,
                    ));
                }
                params.push(Value::Str(param));
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expected ')' after parameters")?;

        if !self.check(&TokenKind::LeftBrace) {
            return Err(self.error("Expected '{' before function body"));
        }

        let saved = (self.can_break, self.can_continue);
        self.can_break = false;
        self.can_continue = false;
        self.in_function = true;
        let body = self.block();
        self.in_function = false;
        (self.can_break, self.can_continue) = saved;

        let mut node = BuildNode::named(NodeKind::Function, name, pos).with_child(body?);
        node.literal = Value::Array(params);
        Ok(node)
    }

    /// Parse a loop body with break and continue enabled
    fn loop_body(&mut self) -> SkeinResult<BuildNode> {
        let saved = (self.can_break, self.can_continue);
        self.can_break = true;
        self.can_continue = true;
        let body = self.nested();
        (self.can_break, self.can_continue) = saved;
        body
    }

    fn condition(&mut self, keyword: &str) -> SkeinResult<BuildNode> {
        self.consume(
            &TokenKind::LeftParen,
            &format!("Expected '(' after '{}'", keyword),
        )?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "Expected ')' after condition")?;
        Ok(condition)
    }

    fn if_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'if'

        let condition = self.condition("if")?;
        let then_branch = self.nested()?;
        let mut node = BuildNode::new(NodeKind::If, pos).with_children(vec![condition, then_branch]);

        if self.match_token(&TokenKind::Else) {
            node.children.push(self.nested()?);
        }

        Ok(node)
    }

    fn while_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'while'

        let condition = self.condition("while")?;
        let body = self.loop_body()?;

        Ok(BuildNode::new(NodeKind::While, pos).with_children(vec![condition, body]))
    }

    fn do_while_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'do'

        let body = self.loop_body()?;
        self.consume(&TokenKind::While, "Expected 'while' after do body")?;
        let condition = self.condition("while")?;
        self.consume(&TokenKind::Semicolon, "Expected ';' after do-while")?;

        Ok(BuildNode::new(NodeKind::DoWhile, pos).with_children(vec![body, condition]))
    }

    /// `for (init; cond; step) body` or `for init; cond; step { body }`
    fn for_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'for'
        let parens = self.match_token(&TokenKind::LeftParen);

        let init = if self.check(&TokenKind::Semicolon) {
            BuildNode::empty(self.peek().pos)
        } else {
            self.simple_statement()?
        };
        self.consume(&TokenKind::Semicolon, "Expected ';' after loop initializer")?;

        let condition = if self.check(&TokenKind::Semicolon) {
            BuildNode::empty(self.peek().pos)
        } else {
            self.expression()?
        };
        self.consume(&TokenKind::Semicolon, "Expected ';' after loop condition")?;

        let step_done = if parens {
            self.check(&TokenKind::RightParen)
        } else {
            self.check(&TokenKind::LeftBrace)
        };
        let step = if step_done {
            BuildNode::empty(self.peek().pos)
        } else {
            self.simple_statement()?
        };

        if parens {
            self.consume(&TokenKind::RightParen, "Expected ')' after for clauses")?;
        } else if !self.check(&TokenKind::LeftBrace) {
            return Err(self
                .error("Expected '{' before loop body")
                .with_help("Without parentheses the loop body must be a block"));
        }

        let body = self.loop_body()?;
        Ok(BuildNode::new(NodeKind::For, pos).with_children(vec![init, condition, step, body]))
    }

    fn switch_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'switch'

        let header = self.condition("switch")?;
        self.consume(&TokenKind::LeftBrace, "Expected '{' after switch header")?;

        let saved_break = self.can_break;
        self.can_break = true;
        self.depth += 1;
        let cases = self.switch_cases();
        self.depth -= 1;
        self.can_break = saved_break;

        let mut node = BuildNode::new(NodeKind::Switch, pos).with_child(header);
        node.children.extend(cases?);
        self.consume(&TokenKind::RightBrace, "Expected '}' after switch cases")?;
        Ok(node)
    }

    fn switch_cases(&mut self) -> SkeinResult<Vec<BuildNode>> {
        let mut cases = Vec::new();
        let mut seen_default = false;

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let pos = self.peek().pos;
            let mut case = if self.match_token(&TokenKind::Case) {
                let value = self.expression()?;
                BuildNode::new(NodeKind::Case, pos).with_child(value)
            } else if self.match_token(&TokenKind::Default) {
                if seen_default {
                    return Err(ScriptError::new(
                        ErrorCode::DuplicateDefault,
                        "Switch has more than one default case",
                        pos,
                    ));
                }
                seen_default = true;
                BuildNode::new(NodeKind::Case, pos).with_argument(1)
            } else {
                return Err(self.error("Expected 'case' or 'default'"));
            };
            self.consume(&TokenKind::Colon, "Expected ':' after case label")?;

            let body_pos = self.peek().pos;
            let mut body = Vec::new();
            while !self.check(&TokenKind::Case)
                && !self.check(&TokenKind::Default)
                && !self.check(&TokenKind::RightBrace)
                && !self.is_at_end()
            {
                body.push(self.statement()?);
            }
            case.children
                .push(BuildNode::new(NodeKind::Block, body_pos).with_children(body));
            cases.push(case);
        }

        Ok(cases)
    }

    fn break_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'break'
        if !self.can_break {
            return Err(ScriptError::new(
                ErrorCode::MisplacedControl,
                "'break' outside of a loop or switch",
                pos,
            ));
        }
        self.consume(&TokenKind::Semicolon, "Expected ';' after 'break'")?;
        Ok(BuildNode::new(NodeKind::Break, pos))
    }

    fn continue_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'continue'
        if !self.can_continue {
            return Err(ScriptError::new(
                ErrorCode::MisplacedControl,
                "'continue' outside of a loop",
                pos,
            ));
        }
        self.consume(&TokenKind::Semicolon, "Expected ';' after 'continue'")?;
        Ok(BuildNode::new(NodeKind::Continue, pos))
    }

    fn return_statement(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume 'return'
        let mut node = BuildNode::new(NodeKind::Return, pos);
        if !self.check(&TokenKind::Semicolon) {
            node.children.push(self.expression()?);
        }
        self.consume(&TokenKind::Semicolon, "Expected ';' after return")?;
        Ok(node)
    }

    /// `#name literal;`
    fn directive_statement(&mut self) -> SkeinResult<BuildNode> {
        let token = self.advance().clone();
        let TokenKind::Directive(name) = token.kind else {
            return Err(ScriptError::syntax("Expected directive", token.pos));
        };
        let directive = Directive::from_name(&name).ok_or_else(|| {
            ScriptError::new(
                ErrorCode::UnknownDirective,
                format!("Unknown directive '#{}'", name),
                token.pos,
            )
        })?;

        let value = match &self.peek().kind {
            TokenKind::Literal(value) if value.kind() == directive.required_kind() => {
                value.clone()
            }
            _ => {
                return Err(self.error(&format!(
                    "Directive '#{}' expects a {} literal",
                    name,
                    directive.required_kind()
                )))
            }
        };
        self.advance();
        self.consume(&TokenKind::Semicolon, "Expected ';' after directive")?;

        let mut node = BuildNode::named(NodeKind::Directive, name, token.pos)
            .with_argument(directive as i64);
        node.literal = value;
        Ok(node)
    }

    // ==================== Helpers ====================

    fn is_at_end(&self) -> bool {
        self.peek().is_eof()
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.current + 1).min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> SkeinResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> SkeinResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(message)),
        }
    }

    fn error(&self, message: &str) -> ScriptError {
        let token = self.peek();
        let found = if token.is_eof() {
            "end of input".to_string()
        } else {
            format!("'{}'", token.kind)
        };
        ScriptError::syntax(format!("{}, found {}", message, found), token.pos)
    }

    fn pos(&self) -> SourcePos {
        self.peek().pos
    }
}
