// Skein Compiler
// Walks the build tree depth-first and emits a flat action list.
// Control flow is resolved into absolute action indices by back-patching.

use super::action::{Action, ActionKind, InlineFunction, Program, Scope};
use crate::ast::{BuildNode, NodeKind, DECLARATION_LIST};
use crate::error::{ErrorCode, ScriptError, SkeinResult, SourcePos};
use crate::lexer::Directive;
use crate::vm::native::NativeRegistry;
use crate::vm::ops::BinaryOp;
use crate::vm::value::Constness;
use crate::vm::variable::VariableTable;
use crate::vm::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::debug;

/// Placeholder targets rewritten once the enclosing loop or switch is laid out
const BREAK_TARGET: i64 = -1;
const CONTINUE_TARGET: i64 = -2;
const UNPATCHED: i64 = -3;

/// Names declared in one scope, in slot order
#[derive(Debug, Default)]
struct LocalScope {
    names: Vec<String>,
    slots: FxHashMap<String, usize>,
}

impl LocalScope {
    fn add(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        let slot = self.names.len();
        self.names.push(name.to_string());
        self.slots.insert(name.to_string(), slot);
        slot
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }
}

/// Where an identifier resolved to
#[derive(Debug, Clone, Copy)]
enum Resolved {
    Local(Scope, usize),
    Global(usize),
}

pub struct Compiler<'a> {
    globals: &'a VariableTable,
    natives: &'a NativeRegistry,
    actions: Vec<Action>,
    script: LocalScope,
    /// Locals of the inline function being compiled, if any
    function: Option<LocalScope>,
    /// Inline function name -> arity, collected before code generation
    signatures: FxHashMap<String, usize>,
}

impl<'a> Compiler<'a> {
    pub fn new(globals: &'a VariableTable, natives: &'a NativeRegistry) -> Self {
        Self {
            globals,
            natives,
            actions: Vec::new(),
            script: LocalScope::default(),
            function: None,
            signatures: FxHashMap::default(),
        }
    }

    /// Script locals the host will seed before running, in slot order
    pub fn with_locals<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            self.script.add(name.as_ref());
        }
        self
    }

    /// Compile a whole script (a block from the parser)
    pub fn compile_script(mut self, root: &BuildNode) -> SkeinResult<Program> {
        // host-seeded locals share a slot with a script declaration of the same name
        for name in declared_names(root, &[])? {
            self.script.add(&name);
        }
        self.collect_signatures(root)?;

        self.compile_stmt(root)?;

        debug!(
            actions = self.actions.len(),
            locals = self.script.names.len(),
            functions = self.signatures.len(),
            "compiled script"
        );
        Ok(Program::new(self.actions, self.script.names))
    }

    /// Compile a single expression whose value is left on the stack
    pub fn compile_expression(mut self, root: &BuildNode) -> SkeinResult<Program> {
        self.compile_expr(root)?;
        debug!(actions = self.actions.len(), "compiled expression");
        Ok(Program::new(self.actions, self.script.names))
    }

    fn collect_signatures(&mut self, root: &BuildNode) -> SkeinResult<()> {
        let top_level: &[BuildNode] = if root.kind == NodeKind::Block {
            &root.children
        } else {
            std::slice::from_ref(root)
        };
        for node in top_level.iter().filter(|n| n.kind == NodeKind::Function) {
            let arity = node.literal.len().unwrap_or(0);
            if self.signatures.insert(node.name.clone(), arity).is_some() {
                return Err(ScriptError::new(
                    ErrorCode::Redefinition,
                    format!("Function '{}' is defined twice", node.name),
                    node.pos,
                ));
            }
        }
        Ok(())
    }

    // ==================== Statements ====================

    fn compile_stmt(&mut self, node: &BuildNode) -> SkeinResult<()> {
        match node.kind {
            NodeKind::Block => {
                for child in &node.children {
                    self.compile_stmt(child)?;
                }
                Ok(())
            }
            NodeKind::Empty => Ok(()),
            NodeKind::Declare => self.compile_declare(node),
            NodeKind::Assign => self.compile_assign(node),
            NodeKind::Adjust => {
                self.compile_target(child(node, 0)?)?;
                self.emit_adjust(node.argument, node.pos);
                self.emit(ActionKind::Set, node.pos);
                Ok(())
            }
            NodeKind::Discard => {
                self.compile_expr(child(node, 0)?)?;
                self.emit(ActionKind::Pop, node.pos);
                Ok(())
            }
            NodeKind::If => self.compile_if(node),
            NodeKind::While => self.compile_while(node),
            NodeKind::DoWhile => self.compile_do_while(node),
            NodeKind::For => self.compile_for(node),
            NodeKind::Switch => self.compile_switch(node),
            NodeKind::Break => {
                self.emit_jump(ActionKind::Jump, node.pos, BREAK_TARGET);
                Ok(())
            }
            NodeKind::Continue => {
                self.emit_jump(ActionKind::Jump, node.pos, CONTINUE_TARGET);
                Ok(())
            }
            NodeKind::Return => {
                let has_value = match node.children.first() {
                    Some(value) => {
                        self.compile_expr(value)?;
                        1
                    }
                    None => 0,
                };
                self.actions
                    .push(Action::new(ActionKind::Return, node.pos).with_argument(has_value));
                Ok(())
            }
            NodeKind::Function => self.compile_function(node),
            NodeKind::Directive => {
                let directive = u8::try_from(node.argument)
                    .ok()
                    .and_then(Directive::from_u8)
                    .ok_or_else(|| unknown_node(node))?;
                self.actions.push(
                    Action::new(ActionKind::Directive(directive), node.pos)
                        .with_literal(node.literal.clone()),
                );
                Ok(())
            }
            _ => Err(unknown_node(node)),
        }
    }

    fn compile_declare(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let declared_const = node.argument != Constness::Mutable as i64;
        match node.children.first() {
            Some(init) => self.compile_expr(init)?,
            None => self.emit_literal(Value::Int(0), node.pos),
        }
        let constness = match (declared_const, node.children.is_empty()) {
            (false, _) => Constness::Mutable,
            (true, true) => Constness::Unassigned,
            (true, false) => Constness::Assigned,
        };

        let (scope, slot) = match &self.function {
            Some(locals) => (Scope::Frame, locals.get(&node.name)),
            None => (Scope::Script, self.script.get(&node.name)),
        };
        let slot = slot.ok_or_else(|| ScriptError::undefined(&node.name, node.pos))?;

        self.actions.push(
            Action::new(ActionKind::Declare { scope, constness }, node.pos)
                .with_literal(Value::str(node.name.as_str()))
                .with_argument(slot as i64),
        );
        Ok(())
    }

    /// `target = value` and the compound forms `target op= value`
    fn compile_assign(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let target = child(node, 0)?;
        let value = child(node, 1)?;
        self.compile_target(target)?;

        if node.argument < 0 {
            if target.kind == NodeKind::Access {
                // a plain store may create the field it names
                if let Some(access) = self.actions.last_mut() {
                    access.argument = 1;
                }
            }
            self.compile_expr(value)?;
        } else {
            let op = node.binary_op().ok_or_else(|| unknown_node(node))?;
            self.emit(ActionKind::Dup, node.pos);
            self.compile_expr(value)?;
            self.emit(ActionKind::Binary(op), node.pos);
        }

        self.emit(ActionKind::Set, node.pos);
        Ok(())
    }

    fn compile_if(&mut self, node: &BuildNode) -> SkeinResult<()> {
        self.compile_expr(child(node, 0)?)?;
        let then_jump = self.emit_jump(ActionKind::JumpIfFalse, node.pos, UNPATCHED);
        self.compile_stmt(child(node, 1)?)?;

        match node.children.get(2) {
            Some(else_branch) => {
                let else_jump = self.emit_jump(ActionKind::Jump, node.pos, UNPATCHED);
                self.patch_jump(then_jump);
                self.compile_stmt(else_branch)?;
                self.patch_jump(else_jump);
            }
            None => self.patch_jump(then_jump),
        }
        Ok(())
    }

    fn compile_while(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let loop_start = self.actions.len();
        self.compile_expr(child(node, 0)?)?;
        let exit_jump = self.emit_jump(ActionKind::JumpIfFalse, node.pos, UNPATCHED);

        self.compile_stmt(child(node, 1)?)?;
        self.emit_jump(ActionKind::Jump, node.pos, loop_start as i64);

        self.patch_jump(exit_jump);
        let exit = self.actions.len();
        self.patch_loop_exits(loop_start, exit, Some(loop_start));
        Ok(())
    }

    fn compile_do_while(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let loop_start = self.actions.len();
        self.compile_stmt(child(node, 0)?)?;

        let condition_start = self.actions.len();
        self.compile_expr(child(node, 1)?)?;
        self.emit_jump(ActionKind::JumpIfTrue, node.pos, loop_start as i64);

        let exit = self.actions.len();
        self.patch_loop_exits(loop_start, exit, Some(condition_start));
        Ok(())
    }

    fn compile_for(&mut self, node: &BuildNode) -> SkeinResult<()> {
        self.compile_stmt(child(node, 0)?)?;

        let loop_start = self.actions.len();
        let condition = child(node, 1)?;
        let exit_jump = if condition.is_empty() {
            None
        } else {
            self.compile_expr(condition)?;
            Some(self.emit_jump(ActionKind::JumpIfFalse, node.pos, UNPATCHED))
        };

        self.compile_stmt(child(node, 3)?)?;

        let step_start = self.actions.len();
        self.compile_stmt(child(node, 2)?)?;
        self.emit_jump(ActionKind::Jump, node.pos, loop_start as i64);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
        }
        let exit = self.actions.len();
        self.patch_loop_exits(loop_start, exit, Some(step_start));
        Ok(())
    }

    /// Cases are tested in order, then bodies are laid out in source order
    /// so a body without `break` falls through into the next one.
    fn compile_switch(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let switch_start = self.actions.len();
        let (header, cases) = node
            .children
            .split_first()
            .ok_or_else(|| unknown_node(node))?;
        self.compile_expr(header)?;

        let mut case_jumps: Vec<Option<usize>> = Vec::with_capacity(cases.len());
        for case in cases {
            if case.argument == 1 {
                case_jumps.push(None);
                continue;
            }
            self.compile_expr(child(case, 0)?)?;
            case_jumps.push(Some(self.emit_jump(ActionKind::SwitchJump, case.pos, UNPATCHED)));
        }

        self.emit(ActionKind::Pop, node.pos);
        let fallback = self.emit_jump(ActionKind::Jump, node.pos, UNPATCHED);

        let mut default_start = None;
        for (case, jump) in cases.iter().zip(case_jumps) {
            let body_start = self.actions.len();
            match jump {
                Some(jump) => self.patch_jump(jump),
                None => default_start = Some(body_start),
            }
            let body = case.children.last().ok_or_else(|| unknown_node(case))?;
            self.compile_stmt(body)?;
        }

        let end = self.actions.len();
        self.actions[fallback].argument = default_start.unwrap_or(end) as i64;
        self.patch_loop_exits(switch_start, end, None);
        Ok(())
    }

    fn compile_function(&mut self, node: &BuildNode) -> SkeinResult<()> {
        if self.function.is_some() {
            return Err(ScriptError::new(
                ErrorCode::UnknownNode,
                "Functions cannot be nested",
                node.pos,
            ));
        }

        let params: Vec<String> = node
            .literal
            .as_array()
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.as_str().map(String::from))
            .collect();

        let mut scope = LocalScope::default();
        for param in &params {
            scope.add(param);
        }
        let body = child(node, 0)?;
        for name in declared_names(body, &params)? {
            scope.add(&name);
        }

        let outer = std::mem::take(&mut self.actions);
        self.function = Some(scope);
        let compiled = self.compile_stmt(body);
        let scope = self.function.take().unwrap_or_default();
        let body_actions = std::mem::replace(&mut self.actions, outer);
        compiled?;

        debug!(
            function = %node.name,
            actions = body_actions.len(),
            "compiled inline function"
        );

        let function = InlineFunction {
            name: node.name.clone(),
            params,
            program: Program::new(body_actions, scope.names),
        };
        let mut definition = Action::new(ActionKind::DefineInline, node.pos)
            .with_literal(Value::str(node.name.as_str()));
        definition.inline = Some(Arc::new(function));
        self.insert_definition(definition);
        Ok(())
    }

    /// Put a definition at index 0 so it runs before any call, shifting every
    /// resolved jump target behind it
    fn insert_definition(&mut self, definition: Action) {
        for action in self.actions.iter_mut() {
            if action.kind.is_jump() && action.argument >= 0 {
                action.argument += 1;
            }
        }
        self.actions.insert(0, definition);
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, node: &BuildNode) -> SkeinResult<()> {
        match node.kind {
            NodeKind::Literal => {
                self.emit_literal(node.literal.clone(), node.pos);
                Ok(())
            }
            NodeKind::Identifier => {
                let resolved = self.resolve(&node.name, node.pos)?;
                self.emit_get(resolved, &node.name, node.pos);
                Ok(())
            }
            NodeKind::Unary => {
                let op = node.unary_op().ok_or_else(|| unknown_node(node))?;
                self.compile_expr(child(node, 0)?)?;
                self.emit(ActionKind::Unary(op), node.pos);
                Ok(())
            }
            NodeKind::Binary => self.compile_binary(node),
            NodeKind::Call => self.compile_call(node),
            NodeKind::Array => {
                for element in &node.children {
                    self.compile_expr(element)?;
                }
                self.actions.push(
                    Action::new(ActionKind::BuildArray, node.pos)
                        .with_argument(node.children.len() as i64),
                );
                Ok(())
            }
            NodeKind::Structure => self.compile_structure(node),
            NodeKind::Access => {
                self.compile_expr(child(node, 0)?)?;
                self.compile_expr(child(node, 1)?)?;
                self.emit(ActionKind::Access, node.pos);
                Ok(())
            }
            NodeKind::PreAdjust => {
                // ref ref+delta -> new ref new -> new
                self.compile_target(child(node, 0)?)?;
                self.emit_adjust(node.argument, node.pos);
                self.emit(ActionKind::DupX1, node.pos);
                self.emit(ActionKind::Set, node.pos);
                Ok(())
            }
            NodeKind::PostAdjust => {
                // ref ref ref+delta -> ref (holding the old value)
                self.compile_target(child(node, 0)?)?;
                self.emit(ActionKind::Dup, node.pos);
                self.emit_adjust(node.argument, node.pos);
                self.emit(ActionKind::Set, node.pos);
                Ok(())
            }
            _ => Err(unknown_node(node)),
        }
    }

    fn compile_binary(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let op = node.binary_op().ok_or_else(|| unknown_node(node))?;
        self.compile_expr(child(node, 0)?)?;

        if op.is_short_circuit() {
            let kind = if op == BinaryOp::And {
                ActionKind::AndBranch
            } else {
                ActionKind::OrBranch
            };
            let branch = self.emit_jump(kind, node.pos, UNPATCHED);
            self.compile_expr(child(node, 1)?)?;
            self.patch_jump(branch);
            return Ok(());
        }

        self.compile_expr(child(node, 1)?)?;
        self.emit(ActionKind::Binary(op), node.pos);
        Ok(())
    }

    fn compile_call(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let count = node.children.len();

        let kind = if let Some(&arity) = self.signatures.get(&node.name) {
            if arity != count {
                return Err(arity_mismatch(&node.name, arity.to_string(), count, node.pos));
            }
            ActionKind::CallInline
        } else if let Some(entry) = self.natives.get(&node.name) {
            if !entry.accepts(count) {
                return Err(arity_mismatch(&node.name, entry.arity.to_string(), count, node.pos));
            }
            ActionKind::CallNative
        } else {
            return Err(ScriptError::undefined(&node.name, node.pos)
                .with_help("Declare the function at the top level or register it with the engine"));
        };

        for arg in &node.children {
            self.compile_expr(arg)?;
        }
        self.actions.push(
            Action::new(kind, node.pos)
                .with_literal(Value::str(node.name.as_str()))
                .with_argument(count as i64),
        );
        Ok(())
    }

    fn compile_structure(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let mut layout = Vec::with_capacity(node.children.len());
        for field in &node.children {
            if field.kind != NodeKind::StructField {
                return Err(unknown_node(field));
            }
            self.compile_expr(child(field, 0)?)?;
            layout.push(Value::Array(vec![
                Value::str(field.name.as_str()),
                Value::Int(field.argument),
            ]));
        }
        self.actions.push(
            Action::new(ActionKind::BuildStruct, node.pos)
                .with_literal(Value::Array(layout))
                .with_argument(node.argument),
        );
        Ok(())
    }

    /// Compile an assignment target, leaving a reference on the stack
    fn compile_target(&mut self, node: &BuildNode) -> SkeinResult<()> {
        let root = node.chain_root();
        if root.kind == NodeKind::Identifier {
            if let Resolved::Global(slot) = self.resolve(&root.name, root.pos)? {
                let is_const = self
                    .globals
                    .get(slot)
                    .is_some_and(|var| var.constness == Constness::Assigned);
                if is_const {
                    return Err(ScriptError::const_violation(&root.name, node.pos));
                }
            }
        }
        self.compile_expr(node)
    }

    fn resolve(&self, name: &str, pos: SourcePos) -> SkeinResult<Resolved> {
        if let Some(slot) = self.function.as_ref().and_then(|f| f.get(name)) {
            return Ok(Resolved::Local(Scope::Frame, slot));
        }
        if let Some(slot) = self.script.get(name) {
            return Ok(Resolved::Local(Scope::Script, slot));
        }
        if let Some(slot) = self.globals.lookup(name) {
            return Ok(Resolved::Global(slot));
        }
        Err(ScriptError::undefined(name, pos))
    }

    // ==================== Emission ====================

    fn emit(&mut self, kind: ActionKind, pos: SourcePos) {
        self.actions.push(Action::new(kind, pos));
    }

    fn emit_literal(&mut self, value: Value, pos: SourcePos) {
        self.actions
            .push(Action::new(ActionKind::PushLiteral, pos).with_literal(value));
    }

    fn emit_get(&mut self, resolved: Resolved, name: &str, pos: SourcePos) {
        let (scope, slot) = match resolved {
            Resolved::Local(scope, slot) => (scope, slot),
            Resolved::Global(slot) => (Scope::Global, slot),
        };
        self.actions.push(
            Action::new(ActionKind::Get(scope), pos)
                .with_literal(Value::str(name))
                .with_argument(slot as i64),
        );
    }

    /// With a reference on top: duplicate it and add `delta` to the copy
    fn emit_adjust(&mut self, delta: i64, pos: SourcePos) {
        self.emit(ActionKind::Dup, pos);
        self.emit_literal(Value::Int(delta), pos);
        self.emit(ActionKind::Binary(BinaryOp::Add), pos);
    }

    fn emit_jump(&mut self, kind: ActionKind, pos: SourcePos, target: i64) -> usize {
        self.actions
            .push(Action::new(kind, pos).with_argument(target));
        self.actions.len() - 1
    }

    /// Point a placeholder jump at the next action to be emitted
    fn patch_jump(&mut self, index: usize) {
        let target = self.actions.len() as i64;
        self.actions[index].argument = target;
    }

    /// Rewrite break (and, for loops, continue) placeholders in `from..` that
    /// inner loops and switches left behind
    fn patch_loop_exits(&mut self, from: usize, exit: usize, continue_to: Option<usize>) {
        for action in &mut self.actions[from..] {
            if action.kind != ActionKind::Jump {
                continue;
            }
            match (action.argument, continue_to) {
                (BREAK_TARGET, _) => action.argument = exit as i64,
                (CONTINUE_TARGET, Some(target)) => action.argument = target as i64,
                _ => {}
            }
        }
    }
}

/// Distinct `var`/`const` names in source order, skipping function bodies.
///
/// Every name gets one slot for the whole program, but a name may be declared
/// again once the block holding its earlier declaration has closed, so two
/// sibling `for (var i ...)` loops compile. Redeclaring a name that is still
/// open, including any of `outer`, is a redefinition.
fn declared_names(root: &BuildNode, outer: &[String]) -> SkeinResult<Vec<String>> {
    let mut open = vec![outer.iter().cloned().collect::<FxHashSet<String>>()];
    let mut names = Vec::new();
    walk_declarations(root, &mut open, &mut names)?;
    Ok(names)
}

fn walk_declarations(
    node: &BuildNode,
    open: &mut Vec<FxHashSet<String>>,
    names: &mut Vec<String>,
) -> SkeinResult<()> {
    match node.kind {
        NodeKind::Function => Ok(()),
        NodeKind::Declare => {
            if open.iter().any(|scope| scope.contains(&node.name)) {
                return Err(redefinition(&node.name, node.pos));
            }
            if let Some(innermost) = open.last_mut() {
                innermost.insert(node.name.clone());
            }
            if !names.contains(&node.name) {
                names.push(node.name.clone());
            }
            Ok(())
        }
        _ => {
            let scoped = opens_scope(node);
            if scoped {
                open.push(FxHashSet::default());
            }
            let walked = node
                .children
                .iter()
                .try_for_each(|child| walk_declarations(child, open, names));
            if scoped {
                open.pop();
            }
            walked
        }
    }
}

/// Statements whose declarations close with them
fn opens_scope(node: &BuildNode) -> bool {
    match node.kind {
        NodeKind::Block => node.argument != DECLARATION_LIST,
        NodeKind::If
        | NodeKind::While
        | NodeKind::DoWhile
        | NodeKind::For
        | NodeKind::Switch => true,
        _ => false,
    }
}

fn child(node: &BuildNode, index: usize) -> SkeinResult<&BuildNode> {
    node.children.get(index).ok_or_else(|| {
        ScriptError::new(
            ErrorCode::UnknownNode,
            format!("Malformed {} node", node.kind),
            node.pos,
        )
    })
}

fn unknown_node(node: &BuildNode) -> ScriptError {
    ScriptError::new(
        ErrorCode::UnknownNode,
        format!("Cannot compile {} node here", node.kind),
        node.pos,
    )
}

fn redefinition(name: &str, pos: SourcePos) -> ScriptError {
    ScriptError::new(
        ErrorCode::Redefinition,
        format!("'{}' is already declared in this scope", name),
        pos,
    )
}

fn arity_mismatch(name: &str, expected: String, got: usize, pos: SourcePos) -> ScriptError {
    ScriptError::new(
        ErrorCode::ArityMismatch,
        format!(
            "Function '{}' expects {} arguments, got {}",
            name, expected, got
        ),
        pos,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::build;
    use crate::vm::native::{NativeCall, VARIADIC};
    use crate::error::ErrorPhase;

    fn noop(_: &mut NativeCall<'_>) -> SkeinResult<Value> {
        Ok(Value::Int(0))
    }

    fn setup() -> (VariableTable, NativeRegistry) {
        let mut globals = VariableTable::new();
        globals.declare("G", Value::Int(1), Constness::Assigned);
        globals.declare("counter", Value::Int(0), Constness::Mutable);
        let mut natives = NativeRegistry::new();
        natives.register("print", VARIADIC, noop);
        natives.register("fail", 0, noop);
        (globals, natives)
    }

    fn script(source: &str) -> SkeinResult<Program> {
        let (globals, natives) = setup();
        let tree = build(tokenize(source)?, false)?;
        Compiler::new(&globals, &natives).compile_script(&tree)
    }

    fn kinds(program: &Program) -> Vec<ActionKind> {
        program.actions().iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_folded_expression_is_one_literal() {
        let (globals, natives) = setup();
        let tree = build(tokenize("1 + 2").unwrap(), true).unwrap();
        let program = Compiler::new(&globals, &natives)
            .compile_expression(&tree)
            .unwrap();
        assert_eq!(kinds(&program), vec![ActionKind::PushLiteral]);
        assert_eq!(program.actions()[0].literal, Value::Int(3));
    }

    #[test]
    fn test_short_circuit_branch_patched() {
        let program = script("var a = 0 || fail();").unwrap();
        let branch = &program.actions()[1];
        assert_eq!(branch.kind, ActionKind::OrBranch);
        // jumps past the call to the declare
        assert_eq!(branch.argument, 3);
        assert_eq!(program.actions()[3].kind.code().0, 4);
    }

    #[test]
    fn test_undefined_symbol() {
        let err = script("x = 1;").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedSymbol);
        assert_eq!(err.phase, ErrorPhase::Compile);
        let err = script("nothing(1);").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedSymbol);
    }

    #[test]
    fn test_global_const_is_compile_error() {
        let err = script("G = 2;").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConstViolation);
        assert_eq!(err.phase, ErrorPhase::Compile);
        assert!(script("counter += 1;").is_ok());
    }

    #[test]
    fn test_arity_checked() {
        let err = script("fail(1);").unwrap_err();
        assert_eq!(err.code, ErrorCode::ArityMismatch);
        let err = script("function f(a) { return a; } var x = f();").unwrap_err();
        assert_eq!(err.code, ErrorCode::ArityMismatch);
        assert!(script("print(1, 2, 3);").is_ok());
    }

    #[test]
    fn test_redefinition() {
        let err = script("var a = 1; var a = 2;").unwrap_err();
        assert_eq!(err.code, ErrorCode::Redefinition);
        let err = script("function f(a) { var a = 1; }").unwrap_err();
        assert_eq!(err.code, ErrorCode::Redefinition);
        let err = script("var a, b; var b = 1;").unwrap_err();
        assert_eq!(err.code, ErrorCode::Redefinition);
        let err = script("var i = 0; for (var i = 0; i < 2; i++) {}").unwrap_err();
        assert_eq!(err.code, ErrorCode::Redefinition);
    }

    #[test]
    fn test_sibling_blocks_reuse_a_name() {
        let program = script(
            "for (var i = 0; i < 2; i++) {} for (var i = 0; i < 3; i++) {} { var t = 1; } var t = 2;",
        )
        .unwrap();
        assert_eq!(program.locals(), &["i".to_string(), "t".to_string()][..]);
        assert!(script("function f() { if (1) { var x = 1; } else { var x = 2; } return 0; }").is_ok());
    }

    #[test]
    fn test_definition_inserted_first_and_jumps_shifted() {
        let program = script("var i = 0; while (i < 2) { i++; } function f() { return 1; }").unwrap();
        assert_eq!(program.actions()[0].kind, ActionKind::DefineInline);
        let back_jump = program
            .actions()
            .iter()
            .find(|a| a.kind == ActionKind::Jump)
            .unwrap();
        // loop start was index 2 before the definition moved in
        assert_eq!(back_jump.argument, 3);
        assert_eq!(program.actions()[3].kind, ActionKind::Get(Scope::Script));
    }

    #[test]
    fn test_forward_call_and_scopes() {
        let program = script("var r = twice(2); function twice(n) { var t = n * 2; return t; }").unwrap();
        let func = program.actions()[0].inline.clone().unwrap();
        assert_eq!(func.params, vec!["n".to_string()]);
        assert_eq!(func.program.locals(), &["n".to_string(), "t".to_string()]);
        assert!(program
            .actions()
            .iter()
            .any(|a| a.kind == ActionKind::CallInline && a.name() == "twice"));
    }

    #[test]
    fn test_break_and_continue_patched() {
        let program = script("for (var i = 0; i < 5; i++) { if (i == 1) { continue; } if (i == 3) { break; } }").unwrap();
        assert!(program
            .actions()
            .iter()
            .all(|a| !a.kind.is_jump() || a.argument >= 0));
    }

    #[test]
    fn test_switch_layout() {
        let program = script("var r = 0; switch (2) { case 1: r = 1; break; default: r = 9; case 2: r = 2; }").unwrap();
        let actions = program.actions();
        let switch_jumps: Vec<&Action> = actions
            .iter()
            .filter(|a| a.kind == ActionKind::SwitchJump)
            .collect();
        assert_eq!(switch_jumps.len(), 2);
        assert!(actions.iter().all(|a| !a.kind.is_jump() || a.argument >= 0));
    }

    #[test]
    fn test_host_locals_get_first_slots() {
        let (globals, natives) = setup();
        let tree = build(tokenize("var y = x + 1;").unwrap(), false).unwrap();
        let program = Compiler::new(&globals, &natives)
            .with_locals(&["x"])
            .compile_script(&tree)
            .unwrap();
        assert_eq!(program.locals(), &["x".to_string(), "y".to_string()]);
    }
}
