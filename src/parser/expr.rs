// Skein Expression Parsing
// Terms are parsed recursively; binary operator chains are collected flat
// and resolved by priority, folding any operator whose operands are both
// literals.

use super::Parser;
use crate::ast::{BuildNode, NodeKind};
use crate::error::{ScriptError, SkeinResult, SourcePos};
use crate::lexer::TokenKind;
use crate::vm::ops::BinaryOp;
use crate::vm::value::Constness;
use crate::vm::Value;

impl Parser {
    pub(super) fn expression(&mut self) -> SkeinResult<BuildNode> {
        let mut operands = vec![self.unary()?];
        let mut operators: Vec<(BinaryOp, SourcePos)> = Vec::new();

        while let Some(op) = self.peek().kind.binary_op() {
            let pos = self.advance().pos;
            operators.push((op, pos));
            operands.push(self.unary()?);
        }

        Ok(resolve_chain(operands, operators))
    }

    fn unary(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.pos();

        if let Some(op) = self.peek().kind.unary_op() {
            self.advance();
            let operand = self.unary()?;
            if operand.is_literal() {
                if let Ok(value) = op.apply(&operand.literal) {
                    return Ok(BuildNode::literal(value, pos));
                }
            }
            return Ok(BuildNode::unary(op, operand, pos));
        }

        if self.check(&TokenKind::PlusPlus) || self.check(&TokenKind::MinusMinus) {
            let delta = if self.advance().kind == TokenKind::PlusPlus { 1 } else { -1 };
            let target = self.postfix()?;
            if !target.is_assignable() {
                return Err(ScriptError::syntax(
                    "Increment and decrement need a variable or element",
                    pos,
                ));
            }
            return Ok(BuildNode::new(NodeKind::PreAdjust, pos)
                .with_argument(delta)
                .with_child(target));
        }

        self.postfix()
    }

    /// An accessor chain, optionally followed by `++` or `--`
    fn postfix(&mut self) -> SkeinResult<BuildNode> {
        let expr = self.accessor_chain()?;

        if expr.is_assignable()
            && (self.check(&TokenKind::PlusPlus) || self.check(&TokenKind::MinusMinus))
        {
            let token = self.advance();
            let delta = if token.kind == TokenKind::PlusPlus { 1 } else { -1 };
            let pos = token.pos;
            return Ok(BuildNode::new(NodeKind::PostAdjust, pos)
                .with_argument(delta)
                .with_child(expr));
        }

        Ok(expr)
    }

    /// `base[i].name[j]...`
    fn accessor_chain(&mut self) -> SkeinResult<BuildNode> {
        let mut expr = self.primary()?;

        loop {
            let pos = self.pos();
            let key = if self.match_token(&TokenKind::LeftBracket) {
                let key = self.expression()?;
                self.consume(&TokenKind::RightBracket, "Expected ']' after index")?;
                key
            } else if self.match_token(&TokenKind::Dot) {
                let name = self.consume_identifier("Expected field name after '.'")?;
                BuildNode::literal(Value::Str(name), pos)
            } else {
                break;
            };
            expr = access(expr, key, pos);
        }

        Ok(expr)
    }

    fn primary(&mut self) -> SkeinResult<BuildNode> {
        let token = self.peek().clone();

        match token.kind {
            TokenKind::Literal(value) => {
                self.advance();
                let value = match value {
                    Value::Str(mut text) => {
                        // Adjacent string literals merge at build time
                        while let TokenKind::Literal(Value::Str(next)) = &self.peek().kind {
                            text.push_str(next);
                            self.advance();
                        }
                        Value::Str(text)
                    }
                    other => other,
                };
                Ok(BuildNode::literal(value, token.pos))
            }
            TokenKind::Identifier(name) => {
                if self.peek_next().kind == TokenKind::LeftParen {
                    self.call(name)
                } else {
                    self.advance();
                    Ok(BuildNode::named(NodeKind::Identifier, name, token.pos))
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(&TokenKind::RightParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::LeftBracket => self.array_literal(),
            TokenKind::LeftBrace => self.structure_literal(false),
            TokenKind::Static => {
                self.advance();
                if !self.check(&TokenKind::LeftBrace) {
                    return Err(self.error("Expected '{' after 'static'"));
                }
                self.structure_literal(true)
            }
            _ => Err(self
                .error("Expected expression")
                .with_help("Expressions start with a literal, name, '(', '[' or '{'")),
        }
    }

    fn call(&mut self, name: String) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume name
        self.advance(); // consume '('

        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expected ')' after arguments")?;

        Ok(BuildNode::named(NodeKind::Call, name, pos).with_children(args))
    }

    fn array_literal(&mut self) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume '['

        let mut elements = Vec::new();
        while !self.check(&TokenKind::RightBracket) && !self.is_at_end() {
            elements.push(self.expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RightBracket, "Expected ']' after array elements")?;

        if elements.iter().all(BuildNode::is_literal) {
            let values = elements.into_iter().map(|e| e.literal).collect();
            return Ok(BuildNode::literal(Value::Array(values), pos));
        }
        Ok(BuildNode::new(NodeKind::Array, pos).with_children(elements))
    }

    /// `{ [var|const] name = expr, ... }`, each evaluation makes a new structure
    fn structure_literal(&mut self, is_static: bool) -> SkeinResult<BuildNode> {
        let pos = self.advance().pos; // consume '{'

        let mut fields: Vec<BuildNode> = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let field_pos = self.pos();
            let constness = if self.match_token(&TokenKind::Const) {
                Constness::Unassigned
            } else {
                self.match_token(&TokenKind::Var);
                Constness::Mutable
            };
            let name = self.consume_identifier("Expected field name")?;
            if fields.iter().any(|f| f.name == name) {
                return Err(ScriptError::syntax(
                    format!("Duplicate field '{}'", name),
                    field_pos,
                ));
            }
            self.consume(&TokenKind::Equal, "Expected '=' after field name")?;
            let value = self.expression()?;
            fields.push(
                BuildNode::named(NodeKind::StructField, name, field_pos)
                    .with_argument(constness as i64)
                    .with_child(value),
            );
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "Expected '}' after structure fields")?;

        Ok(BuildNode::new(NodeKind::Structure, pos)
            .with_argument(is_static as i64)
            .with_children(fields))
    }
}

/// Resolve a flat operand/operator chain: repeatedly combine the leftmost
/// operator with the tightest priority
fn resolve_chain(mut operands: Vec<BuildNode>, mut operators: Vec<(BinaryOp, SourcePos)>) -> BuildNode {
    while !operators.is_empty() {
        let mut best = 0;
        for (i, (op, _)) in operators.iter().enumerate().skip(1) {
            if op.priority() < operators[best].0.priority() {
                best = i;
            }
        }

        let (op, pos) = operators.remove(best);
        let right = operands.remove(best + 1);
        let left = std::mem::replace(&mut operands[best], BuildNode::empty(pos));
        operands[best] = fold_binary(op, left, right, pos);
    }

    operands.pop().unwrap_or_else(|| BuildNode::empty(SourcePos::NONE))
}

fn fold_binary(op: BinaryOp, left: BuildNode, right: BuildNode, pos: SourcePos) -> BuildNode {
    if left.is_literal() && right.is_literal() {
        // Operations that fail are left for the runtime to report
        if let Ok(value) = op.apply(&left.literal, &right.literal) {
            return BuildNode::literal(value, left.pos);
        }
    }
    BuildNode::binary(op, left, right, pos)
}

/// One accessor link; a literal base indexed by a literal key folds away
fn access(base: BuildNode, key: BuildNode, pos: SourcePos) -> BuildNode {
    if base.is_literal() && key.is_literal() {
        let folded = match (&base.literal, &key.literal) {
            (Value::Structure(_), Value::Str(name)) => base.literal.field(name),
            (_, key) => base.literal.index(key),
        };
        if let Ok(value) = folded {
            return BuildNode::literal(value, base.pos);
        }
    }
    BuildNode::new(NodeKind::Access, pos).with_children(vec![base, key])
}

#[cfg(test)]
mod tests {
    use crate::ast::{BuildNode, NodeKind};
    use crate::lexer::tokenize;
    use crate::parser::build;
    use crate::vm::ops::BinaryOp;
    use crate::vm::Value;

    fn expr(source: &str) -> BuildNode {
        build(tokenize(source).unwrap(), true).unwrap()
    }

    #[test]
    fn test_literals_fold() {
        assert_eq!(expr("2 + 3 * 4").literal, Value::Int(14));
        assert_eq!(expr("(2 + 3) * 4").literal, Value::Int(20));
        assert_eq!(expr("10 - 4 - 3").literal, Value::Int(3));
        assert_eq!(expr("-5").literal, Value::Int(-5));
        assert_eq!(expr("!0").literal, Value::Int(1));
        assert_eq!(expr("1 << 2 + 1").literal, Value::Int(8));
        assert_eq!(expr("6 & 3 | 8").literal, Value::Int(10));
    }

    #[test]
    fn test_priority_with_variables() {
        let tree = expr("a + b * c");
        assert_eq!(tree.kind, NodeKind::Binary);
        assert_eq!(tree.binary_op(), Some(BinaryOp::Add));
        assert_eq!(tree.children[1].binary_op(), Some(BinaryOp::Mul));

        let tree = expr("a < b == c");
        assert_eq!(tree.binary_op(), Some(BinaryOp::Equal));
        assert_eq!(tree.children[0].binary_op(), Some(BinaryOp::Less));
    }

    #[test]
    fn test_partial_folding() {
        // 2 * 3 folds even though the chain contains a variable
        let tree = expr("x + 2 * 3");
        assert_eq!(tree.children[1].literal, Value::Int(6));
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let tree = expr("1 / 0");
        assert_eq!(tree.kind, NodeKind::Binary);
    }

    #[test]
    fn test_adjacent_strings_merge() {
        assert_eq!(expr("\"ab\" 'cd' \"e\"").literal, Value::str("abcde"));
    }

    #[test]
    fn test_accessor_chain() {
        let tree = expr("a[1].b[2]");
        assert_eq!(tree.kind, NodeKind::Access);
        assert_eq!(tree.children[1].literal, Value::Int(2));
        assert_eq!(tree.children[0].children[1].literal, Value::str("b"));
        assert_eq!(tree.chain_root().name, "a");
    }

    #[test]
    fn test_literal_chain_folds() {
        assert_eq!(expr("[10, 20, 30][1]").literal, Value::Int(20));
        assert_eq!(expr("\"xyz\"[2]").literal, Value::str("z"));
    }

    #[test]
    fn test_postfix_applies_to_whole_chain() {
        let tree = expr("a[0]++");
        assert_eq!(tree.kind, NodeKind::PostAdjust);
        assert_eq!(tree.children[0].kind, NodeKind::Access);
        let tree = expr("--a.count");
        assert_eq!(tree.kind, NodeKind::PreAdjust);
        assert_eq!(tree.argument, -1);
    }

    #[test]
    fn test_structure_literal() {
        let tree = expr("static { x = 1, const y = 2 }");
        assert_eq!(tree.kind, NodeKind::Structure);
        assert_eq!(tree.argument, 1);
        assert_eq!(tree.children[1].name, "y");
        assert_eq!(tree.children[1].argument, 1);
    }

    #[test]
    fn test_array_of_literals_folds() {
        let tree = expr("[1, 2 + 3, \"x\"]");
        assert_eq!(
            tree.literal,
            Value::Array(vec![Value::Int(1), Value::Int(5), Value::str("x")])
        );
        assert_eq!(expr("[1, y]").kind, NodeKind::Array);
    }
}
