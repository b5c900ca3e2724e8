//! Fixed-point statement rewriting: dead-code pruning, constant-condition
//! shortcutting, redundant-store removal, augmented-assignment expansion
//! and strength reduction, jump threading, and lowering of idiomatic
//! print calls. Rules replace statements in place with `Nop` markers; the
//! sweep pass drains those afterwards.

use crate::{
    ast::{
        AnonymousScope, AssignTarget, Assignment, BinaryOperator, Expression, ForLoop,
        FunctionCall, FunctionCallStatement, Identifier, IfStatement, IncrDecr, Jump, JumpTarget,
        Label, Module, PostIncrDecr, Position, PrefixOperator, Statement, Subroutine, VarDecl,
        VarDeclType,
    },
    diagnostics::Diagnostics,
    middle::namespace::{Namespace, ScopePath},
    value::{
        heap::{ArrayCell, HeapEntry, HeapValues},
        DataType, LiteralValue,
    },
};

pub fn optimize_module_statements(
    module: &mut Module,
    namespace: &Namespace,
    heap: &HeapValues,
    diagnostics: &mut Diagnostics,
) -> usize {
    let mut optimizer = StatementOptimizer {
        namespace,
        heap,
        diagnostics,
        optimizations: 0,
    };

    let root = ScopePath::root();
    optimizer.optimize_statement_list(&mut module.statements, &root);
    optimizer.optimizations
}

struct StatementOptimizer<'a> {
    namespace: &'a Namespace,
    heap: &'a HeapValues,
    diagnostics: &'a mut Diagnostics,
    optimizations: usize,
}

impl StatementOptimizer<'_> {
    fn optimize_statement_list(&mut self, statements: &mut Vec<Statement>, scope: &ScopePath) {
        for statement in statements.iter_mut() {
            self.optimize_statement(statement, scope);
        }

        self.remove_redundant_stores(statements, scope);
    }

    fn optimize_statement(&mut self, statement: &mut Statement, scope: &ScopePath) {
        // recurse into nested statement lists first
        match statement {
            Statement::Block(block) => {
                let inner = scope.entered(&block.name);
                self.optimize_statement_list(&mut block.statements, &inner);
            }
            Statement::Subroutine(sub) => {
                let inner = scope.entered(&sub.name);
                self.optimize_statement_list(&mut sub.statements, &inner);
            }
            Statement::AnonymousScope(anon) => {
                self.optimize_statement_list(&mut anon.statements, scope)
            }
            Statement::If(if_stmt) => {
                self.optimize_statement_list(&mut if_stmt.truepart, scope);
                self.optimize_statement_list(&mut if_stmt.elsepart, scope);
            }
            Statement::For(for_loop) => self.optimize_statement_list(&mut for_loop.body, scope),
            Statement::While(while_loop) => {
                self.optimize_statement_list(&mut while_loop.body, scope)
            }
            Statement::Repeat(repeat_loop) => {
                self.optimize_statement_list(&mut repeat_loop.body, scope)
            }
            _ => {}
        }

        if let Some(replacement) = self.rewrite_statement(statement, scope) {
            self.optimizations += 1;
            *statement = replacement;
        }
    }

    /// Applies a single rewrite rule to the statement, returning its
    /// replacement when one fires.
    fn rewrite_statement(&mut self, statement: &mut Statement, scope: &ScopePath) -> Option<Statement> {
        match statement {
            Statement::Block(block) => {
                if block.statements.is_empty() && !block.force_output {
                    return Some(nop(&block.position));
                }
                None
            }
            Statement::Subroutine(sub) => self.rewrite_subroutine(sub),
            Statement::If(if_stmt) => self.rewrite_if(if_stmt),
            Statement::While(while_loop) => {
                if while_loop.body.is_empty() {
                    self.diagnostics
                        .warn("empty loop body", &while_loop.position);
                    return Some(nop(&while_loop.position));
                }
                self.rewrite_constant_while(while_loop)
            }
            Statement::Repeat(repeat_loop) => {
                if repeat_loop.body.is_empty() {
                    self.diagnostics
                        .warn("empty loop body", &repeat_loop.position);
                    return Some(nop(&repeat_loop.position));
                }
                self.rewrite_constant_repeat(repeat_loop)
            }
            Statement::For(for_loop) => {
                if for_loop.body.is_empty() {
                    self.diagnostics.warn("empty loop body", &for_loop.position);
                    return Some(nop(&for_loop.position));
                }
                self.rewrite_single_value_for(for_loop)
            }
            Statement::Assignment(assignment) => self.rewrite_assignment(assignment, scope),
            Statement::FunctionCall(call) => self.rewrite_call_statement(call, scope),
            Statement::Jump(jump) => self.rewrite_jump(jump, scope),
            _ => None,
        }
    }

    fn rewrite_subroutine(&mut self, sub: &mut Subroutine) -> Option<Statement> {
        if sub.is_asm || sub.asm_address.is_some() {
            return None;
        }

        // entry points stay even when they do nothing
        if sub.name == "start" || sub.name == "irq" {
            return None;
        }

        if sub.statements.is_empty() {
            self.diagnostics
                .warn(format!("removing empty subroutine '{}'", sub.name), &sub.position);
            return Some(nop(&sub.position));
        }

        // a subroutine that only ever returns does nothing worth calling
        let trivial = sub.statements.len() == 1
            && matches!(&sub.statements[0], Statement::Return(ret) if ret.values.is_empty());

        if trivial {
            self.diagnostics.warn(
                format!("removing subroutine '{}' that only returns", sub.name),
                &sub.position,
            );
            return Some(nop(&sub.position));
        }

        None
    }

    fn rewrite_if(&mut self, if_stmt: &mut IfStatement) -> Option<Statement> {
        if if_stmt.truepart.is_empty() && if_stmt.elsepart.is_empty() {
            return Some(nop(&if_stmt.position));
        }

        if let Some(condition) = if_stmt.condition.as_literal() {
            let truthy = condition.as_boolean();
            self.diagnostics.warn(
                if truthy {
                    "condition is always true"
                } else {
                    "condition is always false"
                },
                &if_stmt.position,
            );

            let taken = if truthy {
                std::mem::take(&mut if_stmt.truepart)
            } else {
                std::mem::take(&mut if_stmt.elsepart)
            };

            return Some(Statement::AnonymousScope(AnonymousScope {
                statements: taken,
                position: if_stmt.position.clone(),
            }));
        }

        if if_stmt.truepart.is_empty() {
            // swap the branches and negate the condition
            let position = if_stmt.condition.position().clone();
            let condition = std::mem::replace(
                &mut if_stmt.condition,
                Expression::Literal(LiteralValue::from_boolean(false, position.clone())),
            );

            if_stmt.condition = Expression::Prefix {
                operator: PrefixOperator::Not,
                expression: Box::new(condition),
                position,
            };

            if_stmt.truepart = std::mem::take(&mut if_stmt.elsepart);
            self.optimizations += 1;
        }

        None
    }

    fn rewrite_constant_while(&mut self, while_loop: &mut crate::ast::WhileLoop) -> Option<Statement> {
        let condition = while_loop.condition.as_literal()?;
        let position = while_loop.position.clone();

        if condition.as_boolean() {
            self.diagnostics.warn("condition is always true", &position);

            // while true -> label; body; jump label
            let label_name = synthesized_label("while", &position);
            let mut statements = vec![Statement::Label(Label {
                name: label_name.clone(),
                position: position.clone(),
            })];
            statements.append(&mut while_loop.body);
            statements.push(Statement::Jump(Jump {
                target: JumpTarget::Identifier(label_name),
                position: position.clone(),
            }));

            Some(Statement::AnonymousScope(AnonymousScope {
                statements,
                position,
            }))
        } else {
            self.diagnostics.warn("condition is always false", &position);
            Some(nop(&position))
        }
    }

    fn rewrite_constant_repeat(&mut self, repeat_loop: &mut crate::ast::RepeatLoop) -> Option<Statement> {
        let condition = repeat_loop.until.as_literal()?;
        let position = repeat_loop.position.clone();

        if condition.as_boolean() {
            // the body runs exactly once
            self.diagnostics.warn("condition is always true", &position);
            Some(Statement::AnonymousScope(AnonymousScope {
                statements: std::mem::take(&mut repeat_loop.body),
                position,
            }))
        } else {
            self.diagnostics.warn("condition is always false", &position);

            let label_name = synthesized_label("repeat", &position);
            let mut statements = vec![Statement::Label(Label {
                name: label_name.clone(),
                position: position.clone(),
            })];
            statements.append(&mut repeat_loop.body);
            statements.push(Statement::Jump(Jump {
                target: JumpTarget::Identifier(label_name),
                position: position.clone(),
            }));

            Some(Statement::AnonymousScope(AnonymousScope {
                statements,
                position,
            }))
        }
    }

    /// `for i in v to v { body }` collapses to `i = v ; body`.
    fn rewrite_single_value_for(&mut self, for_loop: &mut ForLoop) -> Option<Statement> {
        let single_value = match &for_loop.iterable {
            Expression::Range { from, to, .. } => {
                let (a, b) = (from.as_literal()?, to.as_literal()?);
                (a.as_integer()? == b.as_integer()?).then(|| a.clone())
            }
            Expression::Literal(literal) => {
                let id = literal.heap_id()?;
                match self.heap.get(id) {
                    HeapEntry::Array { cells, .. } if cells.len() == 1 => match &cells[0] {
                        ArrayCell::Int(v) => {
                            let element = literal.datatype.element_type()?;
                            LiteralValue::from_number(
                                *v as f64,
                                element,
                                literal.position.clone(),
                            )
                            .ok()
                        }
                        ArrayCell::AddressOf(_) => None,
                    },
                    _ => None,
                }
            }
            _ => None,
        }?;

        let position = for_loop.position.clone();

        let target = match (&for_loop.loop_register, &for_loop.loop_var) {
            (Some(register), _) => AssignTarget::Register {
                register: *register,
                position: position.clone(),
            },
            (None, Some(loop_var)) => AssignTarget::Identifier(loop_var.clone()),
            (None, None) => return None,
        };

        let mut statements = Vec::new();

        if let (Some(datatype), Some(loop_var)) = (for_loop.decl_datatype, &for_loop.loop_var) {
            statements.push(Statement::VarDecl(VarDecl {
                decl_type: VarDeclType::Var,
                datatype,
                name: loop_var.name.clone(),
                value: None,
                array_size: None,
                zeropage: false,
                position: loop_var.position.clone(),
            }));
        }

        statements.push(Statement::Assignment(Assignment {
            targets: vec![target],
            aug_op: None,
            value: Expression::Literal(single_value),
            position: position.clone(),
        }));
        statements.append(&mut for_loop.body);

        Some(Statement::AnonymousScope(AnonymousScope {
            statements,
            position,
        }))
    }

    fn rewrite_assignment(&mut self, assignment: &mut Assignment, scope: &ScopePath) -> Option<Statement> {
        // expand augmented assignment first; later passes see the plain form
        if let Some(operator) = assignment.aug_op.take() {
            if assignment.targets.len() == 1 {
                let target_expr = assignment.targets[0].to_expression();
                let position = assignment.position.clone();
                let value = std::mem::replace(
                    &mut assignment.value,
                    Expression::Literal(LiteralValue::from_boolean(false, position.clone())),
                );

                assignment.value = Expression::Binary {
                    left: Box::new(target_expr),
                    operator,
                    right: Box::new(value),
                    position,
                };
                self.optimizations += 1;
                return None;
            }

            assignment.aug_op = Some(operator);
            return None;
        }

        if assignment.targets.len() != 1 {
            return None;
        }

        let target = assignment.targets[0].clone();
        let target_expr = target.to_expression();

        // self assignment
        if assignment.value.same_expression(&target_expr) {
            return Some(nop(&assignment.position));
        }

        // x = x + x  ->  x = x * 2
        if let Expression::Binary {
            left,
            operator: BinaryOperator::Add,
            right,
            position,
        } = &assignment.value
        {
            if left.same_expression(&target_expr) && right.same_expression(&target_expr) {
                if let Some(datatype) = self.target_datatype(&target, scope) {
                    if datatype.is_integer() {
                        assignment.value = Expression::Binary {
                            left: Box::new(target_expr.clone()),
                            operator: BinaryOperator::Multiply,
                            right: Box::new(Expression::Literal(LiteralValue::byte(
                                DataType::UByte,
                                2,
                                position.clone(),
                            ))),
                            position: position.clone(),
                        };
                        self.optimizations += 1;
                        return None;
                    }
                }
            }
        }

        self.reduce_strength(assignment, &target, &target_expr, scope)
    }

    /// Strength reduction over `target = target op literal`.
    fn reduce_strength(
        &mut self,
        assignment: &mut Assignment,
        target: &AssignTarget,
        target_expr: &Expression,
        scope: &ScopePath,
    ) -> Option<Statement> {
        let Expression::Binary {
            left,
            operator,
            right,
            ..
        } = &assignment.value
        else {
            return None;
        };

        if !left.same_expression(target_expr) {
            return None;
        }

        let literal = right.as_literal()?;
        let amount = literal.as_integer()?;
        let position = assignment.position.clone();

        use BinaryOperator::*;

        let is_identity = match operator {
            Add | Subtract | BitOr | BitXor | ShiftLeft | ShiftRight => amount == 0,
            Multiply | Divide | Power => amount == 1,
            _ => false,
        };

        if is_identity {
            return Some(nop(&position));
        }

        let on_memory = self.is_memory_target(target, scope);

        match operator {
            Add | Subtract => {
                let limit = if on_memory { 3 } else { 8 };
                if (1..=limit).contains(&amount) {
                    let op = if *operator == Add {
                        IncrDecr::Increment
                    } else {
                        IncrDecr::Decrement
                    };

                    let statements = (0..amount)
                        .map(|_| {
                            Statement::PostIncrDecr(PostIncrDecr {
                                target: target.clone(),
                                operator: op,
                                position: position.clone(),
                            })
                        })
                        .collect();

                    return Some(Statement::AnonymousScope(AnonymousScope {
                        statements,
                        position,
                    }));
                }
                None
            }
            ShiftLeft | ShiftRight => {
                let datatype = self.target_datatype(target, scope)?;
                let width: i64 = if datatype.is_byte() {
                    8
                } else if datatype.is_word() {
                    16
                } else {
                    return None;
                };

                if amount >= width {
                    // everything is shifted out
                    assignment.value = Expression::Literal(LiteralValue::byte(
                        DataType::UByte,
                        0,
                        position.clone(),
                    ));
                    self.optimizations += 1;
                    return None;
                }

                if amount < 1 {
                    return None;
                }

                let callee = if *operator == ShiftLeft { "lsl" } else { "lsr" };
                let statements = (0..amount)
                    .map(|_| {
                        Statement::FunctionCall(FunctionCallStatement {
                            call: FunctionCall {
                                target: Identifier {
                                    name: callee.into(),
                                    position: position.clone(),
                                },
                                args: vec![target_expr.clone()],
                                position: position.clone(),
                            },
                            position: position.clone(),
                        })
                    })
                    .collect();

                Some(Statement::AnonymousScope(AnonymousScope {
                    statements,
                    position,
                }))
            }
            _ => None,
        }
    }

    fn rewrite_call_statement(
        &mut self,
        call_stmt: &mut FunctionCallStatement,
        scope: &ScopePath,
    ) -> Option<Statement> {
        if let Some(lowered) = self.lower_print_literal(call_stmt) {
            return Some(lowered);
        }

        // a call to a subroutine that does nothing is itself nothing,
        // provided evaluating the arguments cannot have side effects
        let trivial_target = self
            .namespace
            .resolve_subroutine(&call_stmt.call.target.name, scope)
            .is_some_and(|s| s.is_trivial);

        if trivial_target
            && !call_stmt
                .call
                .args
                .iter()
                .any(|a| matches!(a, Expression::FunctionCall(_)))
        {
            self.diagnostics.warn(
                format!("removing call to trivial subroutine '{}'", call_stmt.call.target.name),
                &call_stmt.position,
            );
            return Some(nop(&call_stmt.position));
        }

        self.thread_call_target(&mut call_stmt.call, scope);
        None
    }

    /// `call S` where S immediately jumps to L becomes `call L`.
    fn thread_call_target(&mut self, call: &mut FunctionCall, scope: &ScopePath) {
        let Some(symbol) = self.namespace.resolve_subroutine(&call.target.name, scope) else {
            return;
        };

        let Some(redirect) = symbol.jump_redirect.clone() else {
            return;
        };

        if !self.safe_thread_target(&call.target.name, &redirect, scope) {
            return;
        }

        call.target.name = redirect;
        self.optimizations += 1;
    }

    /// `goto S` where S immediately jumps to L becomes `goto L`.
    fn rewrite_jump(&mut self, jump: &mut Jump, scope: &ScopePath) -> Option<Statement> {
        let JumpTarget::Identifier(name) = &jump.target else {
            return None;
        };

        let symbol = self.namespace.resolve_subroutine(name, scope)?;
        let redirect = symbol.jump_redirect.clone()?;

        if self.safe_thread_target(name, &redirect, scope) {
            jump.target = JumpTarget::Identifier(redirect);
            self.optimizations += 1;
        }

        None
    }

    /// One-hop threading only: never retarget onto a subroutine that
    /// itself redirects, so that redirect cycles cannot ping-pong and
    /// break the fixed point.
    fn safe_thread_target(&self, current: &str, redirect: &str, scope: &ScopePath) -> bool {
        if redirect == current {
            return false;
        }

        if let Some((qualified, _)) = self.namespace.resolve(current, scope) {
            if qualified == *redirect {
                return false;
            }
        }

        match self.namespace.get(redirect) {
            Some(crate::middle::namespace::SymbolEntry::Subroutine(s)) => s.jump_redirect.is_none(),
            _ => true,
        }
    }

    /// `c64scr.print("h")` becomes `c64.CHROUT('h')`; a two character
    /// string becomes two CHROUT calls in a scope of their own.
    fn lower_print_literal(&mut self, call_stmt: &FunctionCallStatement) -> Option<Statement> {
        let call = &call_stmt.call;
        if call.target.name != "c64scr.print" || call.args.len() != 1 {
            return None;
        }

        let literal = call.args[0].as_literal()?;
        if !literal.datatype.is_string() {
            return None;
        }

        let value = self.heap.str_value(literal.heap_id()?)?;
        if value.is_empty() || value.len() > 2 {
            return None;
        }

        let codes: Option<Vec<u8>> = value.chars().map(encode_petscii).collect();
        let codes = codes?;
        let position = call_stmt.position.clone();

        let mut calls: Vec<Statement> = codes
            .into_iter()
            .map(|code| {
                Statement::FunctionCall(FunctionCallStatement {
                    call: FunctionCall {
                        target: Identifier {
                            name: "c64.CHROUT".into(),
                            position: position.clone(),
                        },
                        args: vec![Expression::Literal(LiteralValue::byte(
                            DataType::UByte,
                            code,
                            position.clone(),
                        ))],
                        position: position.clone(),
                    },
                    position: position.clone(),
                })
            })
            .collect();

        if calls.len() == 1 {
            calls.pop()
        } else {
            Some(Statement::AnonymousScope(AnonymousScope {
                statements: calls,
                position,
            }))
        }
    }

    /// Removes the earlier of two consecutive stores to the same target
    /// when the later one cannot observe it.
    fn remove_redundant_stores(&mut self, statements: &mut [Statement], scope: &ScopePath) {
        for i in 1..statements.len() {
            let (before, after) = statements.split_at_mut(i);
            let earlier = before.last_mut().unwrap();
            let later = &after[0];

            let (Statement::Assignment(first), Statement::Assignment(second)) = (&*earlier, later)
            else {
                continue;
            };

            if first.aug_op.is_some() || second.aug_op.is_some() {
                continue;
            }

            let ([a], [b]) = (first.targets.as_slice(), second.targets.as_slice()) else {
                continue;
            };

            if !a.same_target(b) {
                continue;
            }

            // never elide stores to memory-mapped locations
            if matches!(a, AssignTarget::MemoryAddress { .. }) {
                continue;
            }
            if let AssignTarget::Identifier(ident) = a {
                let memory_mapped = self
                    .namespace
                    .resolve_variable(&ident.name, scope)
                    .is_some_and(|v| v.decl_type == VarDeclType::Memory);
                if memory_mapped {
                    continue;
                }
            }

            if expression_observes_target(&second.value, a) {
                continue;
            }

            let position = first.position.clone();
            *earlier = nop(&position);
            self.optimizations += 1;
        }
    }

    fn target_datatype(&self, target: &AssignTarget, scope: &ScopePath) -> Option<DataType> {
        match target {
            AssignTarget::Register { register, .. } => Some(if register.is_pair() {
                DataType::UWord
            } else {
                DataType::UByte
            }),
            AssignTarget::Identifier(ident) => self
                .namespace
                .resolve_variable(&ident.name, scope)
                .map(|v| v.datatype),
            AssignTarget::ArrayIndexed(indexed) => self
                .namespace
                .resolve_variable(&indexed.identifier.name, scope)
                .and_then(|v| v.datatype.element_type()),
            AssignTarget::MemoryAddress { .. } => Some(DataType::UByte),
        }
    }

    fn is_memory_target(&self, target: &AssignTarget, scope: &ScopePath) -> bool {
        match target {
            AssignTarget::MemoryAddress { .. } => true,
            AssignTarget::Identifier(ident) => self
                .namespace
                .resolve_variable(&ident.name, scope)
                .is_some_and(|v| v.decl_type == VarDeclType::Memory),
            _ => false,
        }
    }
}

fn nop(position: &Position) -> Statement {
    Statement::Nop {
        position: position.clone(),
    }
}

fn synthesized_label(kind: &str, position: &Position) -> String {
    format!("_{}_{}_{}", kind, position.line, position.column)
}

/// Conservative check whether evaluating `value` could read through
/// `target`. Function calls and memory reads count as observations.
fn expression_observes_target(value: &Expression, target: &AssignTarget) -> bool {
    match value {
        Expression::Literal(_) | Expression::AddressOf(_) => false,
        Expression::Identifier(ident) => match target {
            AssignTarget::Identifier(t) => t.name == ident.name,
            // reading the whole array aliases any element store
            AssignTarget::ArrayIndexed(t) => t.identifier.name == ident.name,
            _ => false,
        },
        Expression::Register { register, .. } => match target {
            AssignTarget::Register { register: t, .. } => t == register,
            _ => false,
        },
        Expression::ArrayIndexed(indexed) => {
            let aliases = match target {
                AssignTarget::ArrayIndexed(t) => t.identifier.name == indexed.identifier.name,
                AssignTarget::Identifier(t) => t.name == indexed.identifier.name,
                _ => false,
            };
            aliases || expression_observes_target(&indexed.index, target)
        }
        Expression::DirectMemoryRead { address, .. } => {
            matches!(target, AssignTarget::MemoryAddress { .. })
                || expression_observes_target(address, target)
        }
        // calls may read anything
        Expression::FunctionCall(_) => true,
        Expression::Prefix { expression, .. } => expression_observes_target(expression, target),
        Expression::Binary { left, right, .. } => {
            expression_observes_target(left, target) || expression_observes_target(right, target)
        }
        Expression::Typecast { expression, .. } => expression_observes_target(expression, target),
        Expression::Range { from, to, step, .. } => {
            expression_observes_target(from, target)
                || expression_observes_target(to, target)
                || step
                    .as_ref()
                    .is_some_and(|s| expression_observes_target(s, target))
        }
    }
}

/// Translates a source character to its PETSCII code. Characters without
/// a mapping inhibit print lowering.
pub fn encode_petscii(c: char) -> Option<u8> {
    match c {
        ' '..='?' => Some(c as u8),
        'a'..='z' => Some(c as u8 - b'a' + 0x41),
        'A'..='Z' => Some(c as u8 - b'A' + 0xc1),
        '@' => Some(0x00),
        '[' => Some(0x5b),
        '\\' => Some(0x5c),
        ']' => Some(0x5d),
        '\n' | '\r' => Some(0x0d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{sweep_statements, Block, WhileLoop};

    fn pos() -> Position {
        Position::internal()
    }

    fn ident(name: &str) -> Identifier {
        Identifier {
            name: name.into(),
            position: pos(),
        }
    }

    fn assign_var(name: &str, value: Expression) -> Statement {
        Statement::Assignment(Assignment {
            targets: vec![AssignTarget::Identifier(ident(name))],
            aug_op: None,
            value,
            position: pos(),
        })
    }

    fn ub_lit(v: u8) -> Expression {
        Expression::Literal(LiteralValue::byte(DataType::UByte, v, pos()))
    }

    fn wrap_in_module(statements: Vec<Statement>) -> Module {
        Module {
            name: "test".into(),
            statements: vec![Statement::Block(Box::new(Block {
                name: "main".into(),
                address: None,
                force_output: false,
                position: pos(),
                statements: vec![Statement::Subroutine(Subroutine {
                    name: "start".into(),
                    parameters: vec![],
                    return_types: vec![],
                    statements,
                    is_asm: false,
                    asm_address: None,
                    asm_parameter_registers: vec![],
                    asm_return_registers: vec![],
                    asm_clobbers: vec![],
                    position: pos(),
                })],
            }))],
            position: pos(),
        }
    }

    fn sub_statements(module: &Module) -> &[Statement] {
        let block = module.blocks().next().unwrap();
        let Statement::Subroutine(sub) = &block.statements[0] else {
            panic!("expected subroutine");
        };
        &sub.statements
    }

    fn var_decl(name: &str) -> Statement {
        Statement::VarDecl(VarDecl {
            decl_type: VarDeclType::Var,
            datatype: DataType::UByte,
            name: name.into(),
            value: Some(ub_lit(0)),
            array_size: None,
            zeropage: false,
            position: pos(),
        })
    }

    fn run_to_fixed_point(module: &mut Module, heap: &HeapValues) -> usize {
        let mut total = 0;
        loop {
            let namespace = Namespace::build(module, heap);
            let mut diagnostics = Diagnostics::new();
            let count =
                optimize_module_statements(module, &namespace, heap, &mut diagnostics);
            sweep_statements(&mut module.statements);
            total += count;
            if count == 0 {
                return total;
            }
        }
    }

    #[test]
    fn false_condition_keeps_only_the_else_branch() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![
            var_decl("x"),
            Statement::If(IfStatement {
                condition: ub_lit(0),
                truepart: vec![assign_var("x", ub_lit(1))],
                elsepart: vec![assign_var("x", ub_lit(2))],
                position: pos(),
            }),
        ]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        assert_eq!(statements.len(), 2);
        let Statement::Assignment(assignment) = &statements[1] else {
            panic!("expected surviving else-branch assignment");
        };
        assert_eq!(assignment.value.as_literal().unwrap().as_integer(), Some(2));
    }

    #[test]
    fn infinite_while_becomes_label_body_jump() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![
            var_decl("x"),
            Statement::While(WhileLoop {
                condition: ub_lit(1),
                body: vec![assign_var("x", ub_lit(1))],
                position: pos(),
            }),
        ]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        assert!(matches!(statements[1], Statement::Label(_)));
        assert!(matches!(statements[2], Statement::Assignment(_)));
        assert!(matches!(statements[3], Statement::Jump(_)));
    }

    #[test]
    fn redundant_store_is_removed() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![
            var_decl("x"),
            assign_var("x", ub_lit(1)),
            assign_var("x", ub_lit(2)),
        ]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        assert_eq!(statements.len(), 2);
        let Statement::Assignment(assignment) = &statements[1] else {
            panic!("expected assignment");
        };
        assert_eq!(assignment.value.as_literal().unwrap().as_integer(), Some(2));
    }

    #[test]
    fn store_read_by_the_next_assignment_is_kept() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![
            var_decl("x"),
            assign_var("x", ub_lit(5)),
            assign_var(
                "x",
                Expression::Binary {
                    left: Box::new(Expression::Identifier(ident("x"))),
                    operator: BinaryOperator::Add,
                    right: Box::new(ub_lit(1)),
                    position: pos(),
                },
            ),
        ]);

        run_to_fixed_point(&mut module, &heap);
        assert_eq!(sub_statements(&module).len(), 3);
    }

    #[test]
    fn small_additions_become_increments() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![var_decl("x"), {
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(ident("x"))],
                aug_op: Some(BinaryOperator::Add),
                value: ub_lit(3),
                position: pos(),
            })
        }]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        assert_eq!(statements.len(), 4);
        for statement in &statements[1..] {
            assert!(matches!(
                statement,
                Statement::PostIncrDecr(PostIncrDecr {
                    operator: IncrDecr::Increment,
                    ..
                })
            ));
        }
    }

    #[test]
    fn shift_expansion_and_overshift() {
        let heap = HeapValues::default();

        // x <<= 3 expands to three lsl calls
        let mut module = wrap_in_module(vec![var_decl("x"), {
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(ident("x"))],
                aug_op: Some(BinaryOperator::ShiftLeft),
                value: ub_lit(3),
                position: pos(),
            })
        }]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        assert_eq!(statements.len(), 4);
        for statement in &statements[1..] {
            let Statement::FunctionCall(call) = statement else {
                panic!("expected lsl call");
            };
            assert_eq!(call.call.target.name, "lsl");
        }

        // x <<= 9 on a ubyte clears it instead
        let mut module = wrap_in_module(vec![var_decl("x"), {
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(ident("x"))],
                aug_op: Some(BinaryOperator::ShiftLeft),
                value: ub_lit(9),
                position: pos(),
            })
        }]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        assert_eq!(statements.len(), 2);
        let Statement::Assignment(assignment) = &statements[1] else {
            panic!("expected assignment");
        };
        assert_eq!(assignment.value.as_literal().unwrap().as_integer(), Some(0));
    }

    #[test]
    fn identity_operations_vanish() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![var_decl("x"), {
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(ident("x"))],
                aug_op: Some(BinaryOperator::Add),
                value: ub_lit(0),
                position: pos(),
            })
        }]);

        run_to_fixed_point(&mut module, &heap);
        assert_eq!(sub_statements(&module).len(), 1);
    }

    #[test]
    fn x_plus_x_becomes_times_two() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![var_decl("x"), {
            assign_var(
                "x",
                Expression::Binary {
                    left: Box::new(Expression::Identifier(ident("x"))),
                    operator: BinaryOperator::Add,
                    right: Box::new(Expression::Identifier(ident("x"))),
                    position: pos(),
                },
            )
        }]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        let Statement::Assignment(assignment) = &statements[1] else {
            panic!("expected assignment");
        };
        let Expression::Binary { operator, right, .. } = &assignment.value else {
            panic!("expected binary value");
        };
        assert_eq!(*operator, BinaryOperator::Multiply);
        assert_eq!(right.as_literal().unwrap().as_integer(), Some(2));
    }

    #[test]
    fn print_of_short_literal_lowers_to_chrout() {
        let mut heap = HeapValues::default();
        let id = heap.add_str(DataType::Str, "Hi");
        let mut module = wrap_in_module(vec![Statement::FunctionCall(FunctionCallStatement {
            call: FunctionCall {
                target: ident("c64scr.print"),
                args: vec![Expression::Literal(LiteralValue::heap(
                    DataType::Str,
                    id,
                    pos(),
                ))],
                position: pos(),
            },
            position: pos(),
        })]);

        run_to_fixed_point(&mut module, &heap);

        let statements = sub_statements(&module);
        assert_eq!(statements.len(), 2);

        let expected = [encode_petscii('H').unwrap(), encode_petscii('i').unwrap()];
        for (statement, code) in statements.iter().zip(expected) {
            let Statement::FunctionCall(call) = statement else {
                panic!("expected CHROUT call");
            };
            assert_eq!(call.call.target.name, "c64.CHROUT");
            assert_eq!(
                call.call.args[0].as_literal().unwrap().as_integer(),
                Some(code as i64)
            );
        }
    }

    #[test]
    fn optimizer_is_idempotent_after_stabilizing() {
        let heap = HeapValues::default();
        let mut module = wrap_in_module(vec![
            var_decl("x"),
            assign_var("x", ub_lit(1)),
            assign_var("x", ub_lit(2)),
            Statement::If(IfStatement {
                condition: ub_lit(1),
                truepart: vec![assign_var("y", ub_lit(1))],
                elsepart: vec![],
                position: pos(),
            }),
        ]);

        run_to_fixed_point(&mut module, &heap);

        let namespace = Namespace::build(&module, &heap);
        let mut diagnostics = Diagnostics::new();
        let second_run =
            optimize_module_statements(&mut module, &namespace, &heap, &mut diagnostics);
        assert_eq!(second_run, 0);
    }
}
