//! Read-only traversal over the AST, used by the namespace builder and the
//! semantic checker. Statement lists are visited in source order and
//! expressions left-to-right.

use super::{
    AnonymousScope, AssignTarget, Assignment, Block, Directive, Expression, ForLoop,
    FunctionCallStatement, IfStatement, InlineAssembly, Jump, Label, Module, PostIncrDecr,
    RepeatLoop, Return, Statement, Subroutine, VarDecl, WhileLoop,
};

pub trait Visitor: Sized {
    fn visit_module(&mut self, module: &Module) {
        walk_module(self, module)
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block)
    }

    fn visit_statement(&mut self, statement: &Statement) {
        walk_statement(self, statement)
    }

    fn visit_subroutine(&mut self, subroutine: &Subroutine) {
        walk_subroutine(self, subroutine)
    }

    fn visit_var_decl(&mut self, decl: &VarDecl) {
        walk_var_decl(self, decl)
    }

    fn visit_directive(&mut self, _directive: &Directive) {}

    fn visit_label(&mut self, _label: &Label) {}

    fn visit_inline_assembly(&mut self, _asm: &InlineAssembly) {}

    fn visit_jump(&mut self, _jump: &Jump) {}

    fn visit_return(&mut self, ret: &Return) {
        walk_return(self, ret)
    }

    fn visit_if(&mut self, if_stmt: &IfStatement) {
        walk_if(self, if_stmt)
    }

    fn visit_for(&mut self, for_loop: &ForLoop) {
        walk_for(self, for_loop)
    }

    fn visit_while(&mut self, while_loop: &WhileLoop) {
        walk_while(self, while_loop)
    }

    fn visit_repeat(&mut self, repeat_loop: &RepeatLoop) {
        walk_repeat(self, repeat_loop)
    }

    fn visit_assignment(&mut self, assignment: &Assignment) {
        walk_assignment(self, assignment)
    }

    fn visit_assign_target(&mut self, target: &AssignTarget) {
        walk_assign_target(self, target)
    }

    fn visit_post_incr_decr(&mut self, incr_decr: &PostIncrDecr) {
        walk_post_incr_decr(self, incr_decr)
    }

    fn visit_function_call_statement(&mut self, call: &FunctionCallStatement) {
        walk_function_call_statement(self, call)
    }

    fn visit_anonymous_scope(&mut self, scope: &AnonymousScope) {
        walk_anonymous_scope(self, scope)
    }

    fn visit_expression(&mut self, expression: &Expression) {
        walk_expression(self, expression)
    }
}

pub fn walk_module(visitor: &mut impl Visitor, module: &Module) {
    for statement in &module.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_block(visitor: &mut impl Visitor, block: &Block) {
    for statement in &block.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_statement(visitor: &mut impl Visitor, statement: &Statement) {
    match statement {
        Statement::Block(block) => visitor.visit_block(block),
        Statement::Directive(directive) => visitor.visit_directive(directive),
        Statement::VarDecl(decl) => visitor.visit_var_decl(decl),
        Statement::Subroutine(subroutine) => visitor.visit_subroutine(subroutine),
        Statement::Label(label) => visitor.visit_label(label),
        Statement::Return(ret) => visitor.visit_return(ret),
        Statement::Jump(jump) => visitor.visit_jump(jump),
        Statement::If(if_stmt) => visitor.visit_if(if_stmt),
        Statement::For(for_loop) => visitor.visit_for(for_loop),
        Statement::While(while_loop) => visitor.visit_while(while_loop),
        Statement::Repeat(repeat_loop) => visitor.visit_repeat(repeat_loop),
        Statement::Assignment(assignment) => visitor.visit_assignment(assignment),
        Statement::PostIncrDecr(incr_decr) => visitor.visit_post_incr_decr(incr_decr),
        Statement::FunctionCall(call) => visitor.visit_function_call_statement(call),
        Statement::InlineAssembly(asm) => visitor.visit_inline_assembly(asm),
        Statement::AnonymousScope(scope) => visitor.visit_anonymous_scope(scope),
        Statement::Nop { .. } | Statement::BuiltinPlaceholder { .. } => {}
    }
}

pub fn walk_subroutine(visitor: &mut impl Visitor, subroutine: &Subroutine) {
    for statement in &subroutine.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_var_decl(visitor: &mut impl Visitor, decl: &VarDecl) {
    if let Some(size) = &decl.array_size {
        visitor.visit_expression(size);
    }

    if let Some(value) = &decl.value {
        visitor.visit_expression(value);
    }
}

pub fn walk_return(visitor: &mut impl Visitor, ret: &Return) {
    for value in &ret.values {
        visitor.visit_expression(value);
    }
}

pub fn walk_if(visitor: &mut impl Visitor, if_stmt: &IfStatement) {
    visitor.visit_expression(&if_stmt.condition);

    for statement in &if_stmt.truepart {
        visitor.visit_statement(statement);
    }

    for statement in &if_stmt.elsepart {
        visitor.visit_statement(statement);
    }
}

pub fn walk_for(visitor: &mut impl Visitor, for_loop: &ForLoop) {
    visitor.visit_expression(&for_loop.iterable);

    for statement in &for_loop.body {
        visitor.visit_statement(statement);
    }
}

pub fn walk_while(visitor: &mut impl Visitor, while_loop: &WhileLoop) {
    visitor.visit_expression(&while_loop.condition);

    for statement in &while_loop.body {
        visitor.visit_statement(statement);
    }
}

pub fn walk_repeat(visitor: &mut impl Visitor, repeat_loop: &RepeatLoop) {
    for statement in &repeat_loop.body {
        visitor.visit_statement(statement);
    }

    visitor.visit_expression(&repeat_loop.until);
}

pub fn walk_assignment(visitor: &mut impl Visitor, assignment: &Assignment) {
    for target in &assignment.targets {
        visitor.visit_assign_target(target);
    }

    visitor.visit_expression(&assignment.value);
}

pub fn walk_assign_target(visitor: &mut impl Visitor, target: &AssignTarget) {
    match target {
        AssignTarget::Register { .. } | AssignTarget::Identifier(_) => {}
        AssignTarget::ArrayIndexed(indexed) => visitor.visit_expression(&indexed.index),
        AssignTarget::MemoryAddress { address, .. } => visitor.visit_expression(address),
    }
}

pub fn walk_post_incr_decr(visitor: &mut impl Visitor, incr_decr: &PostIncrDecr) {
    visitor.visit_assign_target(&incr_decr.target);
}

pub fn walk_function_call_statement(visitor: &mut impl Visitor, call: &FunctionCallStatement) {
    for arg in &call.call.args {
        visitor.visit_expression(arg);
    }
}

pub fn walk_anonymous_scope(visitor: &mut impl Visitor, scope: &AnonymousScope) {
    for statement in &scope.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_expression(visitor: &mut impl Visitor, expression: &Expression) {
    match expression {
        Expression::Literal(_)
        | Expression::Identifier(_)
        | Expression::AddressOf(_)
        | Expression::Register { .. } => {}
        Expression::Prefix { expression, .. } => visitor.visit_expression(expression),
        Expression::Binary { left, right, .. } => {
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        Expression::FunctionCall(call) => {
            for arg in &call.args {
                visitor.visit_expression(arg);
            }
        }
        Expression::ArrayIndexed(indexed) => visitor.visit_expression(&indexed.index),
        Expression::Typecast { expression, .. } => visitor.visit_expression(expression),
        Expression::Range { from, to, step, .. } => {
            visitor.visit_expression(from);
            visitor.visit_expression(to);

            if let Some(step) = step {
                visitor.visit_expression(step);
            }
        }
        Expression::DirectMemoryRead { address, .. } => visitor.visit_expression(address),
    }
}
