//! Lowers the validated, optimized AST into stack-machine instructions.
//! Expressions emit in left-to-right post order; loops and conditionals
//! become labels and conditional branches. Inconsistencies found here are
//! fatal: they mean the checker or optimizer let an invariant slip.

use crate::{
    ast::{
        AssignTarget, Assignment, BinaryOperator, Block, Expression, ForLoop, FunctionCall,
        IfStatement, IncrDecr, Jump, JumpTarget, Module, Position, PostIncrDecr, PrefixOperator,
        RepeatLoop, Return, Statement, Subroutine, VarDecl, VarDeclType, WhileLoop,
    },
    backend::ir::{BlockVariable, Instruction, IrProgram, IrValue, Opcode, ProgramBlock},
    builtins,
    diagnostics::CompilerError,
    middle::{
        check::infer_type,
        namespace::{Namespace, ScopePath, SubroutineSymbol, SymbolEntry},
    },
    value::{
        heap::{HeapEntry, HeapValues},
        DataType, LiteralValue, Payload,
    },
};

/// Operand width on the value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Word,
    Float,
}

fn width_of(datatype: DataType) -> Width {
    match datatype {
        DataType::UByte | DataType::Byte => Width::Byte,
        DataType::UWord | DataType::Word => Width::Word,
        DataType::Float => Width::Float,
        // iterables are passed around as addresses
        _ => Width::Word,
    }
}

pub fn emit_module(
    module: &Module,
    namespace: &Namespace,
    heap: &HeapValues,
) -> Result<IrProgram, CompilerError> {
    let mut blocks = Vec::new();

    for block in module.blocks() {
        let mut emitter = Emitter {
            namespace,
            heap,
            scope: ScopePath::root().entered(&block.name),
            block: ProgramBlock::new(&block.name, block.address, block.force_output),
            next_label: 0,
        };

        emitter.emit_block_body(block)?;

        let mut program_block = emitter.block;
        program_block.reindex_labels();
        blocks.push(program_block);
    }

    Ok(IrProgram {
        name: module.name.clone(),
        blocks,
        allocated_zeropage: Default::default(),
    })
}

struct Emitter<'a> {
    namespace: &'a Namespace,
    heap: &'a HeapValues,
    scope: ScopePath,
    block: ProgramBlock,
    next_label: usize,
}

impl Emitter<'_> {
    fn push(&mut self, instruction: Instruction) {
        self.block.instructions.push(instruction);
    }

    fn fresh_label(&mut self) -> String {
        self.next_label += 1;
        self.scope.qualified(&format!("_l{}", self.next_label))
    }

    fn infer(&self, expression: &Expression) -> Result<DataType, CompilerError> {
        infer_type(expression, self.namespace, &self.scope).ok_or_else(|| {
            CompilerError(format!(
                "expression type unknown at {}",
                expression.position()
            ))
        })
    }

    fn qualify(&self, name: &str, position: &Position) -> Result<String, CompilerError> {
        self.namespace
            .resolve(name, &self.scope)
            .map(|(qualified, _)| qualified)
            .ok_or_else(|| CompilerError(format!("unresolved name '{name}' at {position}")))
    }

    fn emit_block_body(&mut self, block: &Block) -> Result<(), CompilerError> {
        self.emit_statements(&block.statements)
    }

    fn emit_statements(&mut self, statements: &[Statement]) -> Result<(), CompilerError> {
        for statement in statements {
            self.emit_statement(statement)?;
        }
        Ok(())
    }

    fn emit_statement(&mut self, statement: &Statement) -> Result<(), CompilerError> {
        match statement {
            Statement::VarDecl(decl) => self.collect_var_decl(decl),
            Statement::Subroutine(sub) => self.emit_subroutine(sub),
            Statement::Label(label) => {
                let qualified = self.scope.qualified(&label.name);
                self.push(Instruction::label(qualified));
                Ok(())
            }
            Statement::Assignment(assignment) => {
                self.push(Instruction::line(&assignment.position));
                self.emit_assignment(assignment)
            }
            Statement::PostIncrDecr(incr_decr) => {
                self.push(Instruction::line(&incr_decr.position));
                self.emit_post_incr_decr(incr_decr)
            }
            Statement::FunctionCall(call_stmt) => {
                self.push(Instruction::line(&call_stmt.position));
                let returned = self.emit_call(&call_stmt.call)?;
                if let Some(datatype) = returned {
                    let discard = match width_of(datatype) {
                        Width::Byte => Opcode::DiscardByte,
                        Width::Word => Opcode::DiscardWord,
                        Width::Float => Opcode::DiscardFloat,
                    };
                    self.push(Instruction::new(discard));
                }
                Ok(())
            }
            Statement::Return(ret) => {
                self.push(Instruction::line(&ret.position));
                self.emit_return(ret)
            }
            Statement::Jump(jump) => {
                self.push(Instruction::line(&jump.position));
                self.emit_jump(jump)
            }
            Statement::If(if_stmt) => {
                self.push(Instruction::line(&if_stmt.position));
                self.emit_if(if_stmt)
            }
            Statement::While(while_loop) => {
                self.push(Instruction::line(&while_loop.position));
                self.emit_while(while_loop)
            }
            Statement::Repeat(repeat_loop) => {
                self.push(Instruction::line(&repeat_loop.position));
                self.emit_repeat(repeat_loop)
            }
            Statement::For(for_loop) => {
                self.push(Instruction::line(&for_loop.position));
                self.emit_for(for_loop)
            }
            Statement::InlineAssembly(asm) => {
                self.push(Instruction::with_label(Opcode::InlineAsm, asm.assembly.clone()));
                Ok(())
            }
            Statement::AnonymousScope(anon) => self.emit_statements(&anon.statements),
            Statement::Directive(_)
            | Statement::Nop { .. }
            | Statement::BuiltinPlaceholder { .. } => Ok(()),
            Statement::Block(block) => Err(CompilerError(format!(
                "nested block '{}' survived until emission",
                block.name
            ))),
        }
    }

    fn collect_var_decl(&mut self, decl: &VarDecl) -> Result<(), CompilerError> {
        let qualified = self.scope.qualified(&decl.name);

        match decl.decl_type {
            VarDeclType::Const => Ok(()),
            VarDeclType::Memory => {
                let address = decl
                    .value
                    .as_ref()
                    .and_then(|v| v.as_literal())
                    .and_then(|lit| lit.as_integer())
                    .ok_or_else(|| {
                        CompilerError(format!(
                            "memory declaration '{qualified}' has no constant address"
                        ))
                    })?;

                self.block
                    .memory_pointers
                    .insert(qualified, (address as u16, decl.datatype));
                Ok(())
            }
            VarDeclType::Var => {
                let value = decl.value.as_ref().and_then(|v| v.as_literal()).cloned();
                self.block.variables.insert(
                    qualified,
                    BlockVariable {
                        datatype: decl.datatype,
                        value,
                        zeropage: decl.zeropage,
                    },
                );
                Ok(())
            }
        }
    }

    fn emit_subroutine(&mut self, sub: &Subroutine) -> Result<(), CompilerError> {
        // asm subroutines at a fixed address have no body of their own
        if sub.asm_address.is_some() {
            return Ok(());
        }

        let qualified = self.scope.qualified(&sub.name);
        self.push(Instruction::label(qualified));

        self.scope.push(&sub.name);

        for parameter in &sub.parameters {
            let name = self.scope.qualified(&parameter.name);
            self.block.variables.insert(
                name,
                BlockVariable {
                    datatype: parameter.datatype,
                    value: None,
                    zeropage: false,
                },
            );
        }

        // nested subroutines are hoisted past the enclosing body so that
        // fall-through never runs into them
        let (nested, body): (Vec<_>, Vec<_>) = sub
            .statements
            .iter()
            .partition(|s| matches!(s, Statement::Subroutine(_)));

        for statement in body {
            self.emit_statement(statement)?;
        }

        let falls_through = !matches!(
            self.block.instructions.last(),
            Some(instruction) if matches!(instruction.opcode, Opcode::Return | Opcode::Jump)
        );

        if falls_through && !sub.is_asm {
            self.push(Instruction::new(Opcode::Return));
        }

        for statement in nested {
            self.emit_statement(statement)?;
        }

        self.scope.pop();
        Ok(())
    }

    fn emit_assignment(&mut self, assignment: &Assignment) -> Result<(), CompilerError> {
        // augmented forms are expanded by the optimizer; emit the desugared
        // shape if one slipped through
        if let Some(operator) = assignment.aug_op {
            let desugared = Assignment {
                targets: assignment.targets.clone(),
                aug_op: None,
                value: Expression::Binary {
                    left: Box::new(assignment.targets[0].to_expression()),
                    operator,
                    right: Box::new(assignment.value.clone()),
                    position: assignment.position.clone(),
                },
                position: assignment.position.clone(),
            };
            return self.emit_assignment(&desugared);
        }

        let value_type = self.emit_expression(&assignment.value)?;

        for target in &assignment.targets {
            self.emit_store(target, value_type)?;
        }

        Ok(())
    }

    fn emit_store(
        &mut self,
        target: &AssignTarget,
        value_type: DataType,
    ) -> Result<(), CompilerError> {
        match target {
            AssignTarget::Register { register, .. } => {
                let target_type = if register.is_pair() {
                    DataType::UWord
                } else {
                    DataType::UByte
                };
                self.emit_cast(value_type, target_type)?;

                let opcode = match width_of(target_type) {
                    Width::Byte => Opcode::PopVarByte,
                    _ => Opcode::PopVarWord,
                };
                self.push(Instruction::with_label(opcode, register.to_string()));
                Ok(())
            }
            AssignTarget::Identifier(ident) => {
                let qualified = self.qualify(&ident.name, &ident.position)?;
                let datatype = self
                    .namespace
                    .resolve_variable(&ident.name, &self.scope)
                    .map(|v| v.datatype)
                    .ok_or_else(|| {
                        CompilerError(format!("assignment to non-variable '{}'", ident.name))
                    })?;

                self.emit_cast(value_type, datatype)?;

                let opcode = match width_of(datatype) {
                    Width::Byte => Opcode::PopVarByte,
                    Width::Word => Opcode::PopVarWord,
                    Width::Float => Opcode::PopVarFloat,
                };
                self.push(Instruction::with_label(opcode, qualified));
                Ok(())
            }
            AssignTarget::ArrayIndexed(indexed) => {
                let qualified = self.qualify(&indexed.identifier.name, &indexed.position)?;
                let element = self
                    .namespace
                    .resolve_variable(&indexed.identifier.name, &self.scope)
                    .and_then(|v| v.datatype.element_type())
                    .ok_or_else(|| {
                        CompilerError(format!(
                            "indexed store into non-iterable '{}'",
                            indexed.identifier.name
                        ))
                    })?;

                self.emit_cast(value_type, element)?;
                self.emit_expression(&indexed.index)?;

                let opcode = match width_of(element) {
                    Width::Byte => Opcode::PopIndexedByte,
                    Width::Word => Opcode::PopIndexedWord,
                    Width::Float => Opcode::PopIndexedFloat,
                };
                self.push(Instruction::with_label(opcode, qualified));
                Ok(())
            }
            AssignTarget::MemoryAddress { address, position } => {
                let address = address
                    .as_literal()
                    .and_then(|lit| lit.as_integer())
                    .ok_or_else(|| {
                        CompilerError(format!(
                            "memory store needs a constant address at {position}"
                        ))
                    })?;

                self.emit_cast(value_type, DataType::UByte)?;
                self.push(Instruction::with_arg(
                    Opcode::PopMemByte,
                    IrValue::Word(address as u16),
                ));
                Ok(())
            }
        }
    }

    fn emit_post_incr_decr(&mut self, incr_decr: &PostIncrDecr) -> Result<(), CompilerError> {
        let target_expr = incr_decr.target.to_expression();
        let datatype = self.infer(&target_expr)?;

        self.emit_expression(&target_expr)?;
        self.push_one(datatype)?;

        let opcode = match (incr_decr.operator, width_of(datatype)) {
            (IncrDecr::Increment, Width::Byte) => Opcode::AddB,
            (IncrDecr::Increment, Width::Word) => Opcode::AddW,
            (IncrDecr::Increment, Width::Float) => Opcode::AddF,
            (IncrDecr::Decrement, Width::Byte) => Opcode::SubB,
            (IncrDecr::Decrement, Width::Word) => Opcode::SubW,
            (IncrDecr::Decrement, Width::Float) => Opcode::SubF,
        };
        self.push(Instruction::new(opcode));

        self.emit_store(&incr_decr.target, datatype)
    }

    fn push_one(&mut self, datatype: DataType) -> Result<(), CompilerError> {
        let instruction = match width_of(datatype) {
            Width::Byte => Instruction::with_arg(Opcode::PushByte, IrValue::Byte(1)),
            Width::Word => Instruction::with_arg(Opcode::PushWord, IrValue::Word(1)),
            Width::Float => Instruction::with_arg(Opcode::PushFloat, IrValue::Float(1.0)),
        };
        self.push(instruction);
        Ok(())
    }

    fn emit_return(&mut self, ret: &Return) -> Result<(), CompilerError> {
        for value in &ret.values {
            self.emit_expression(value)?;
        }
        self.push(Instruction::new(Opcode::Return));
        Ok(())
    }

    fn emit_jump(&mut self, jump: &Jump) -> Result<(), CompilerError> {
        match &jump.target {
            JumpTarget::Address(address) => {
                self.push(Instruction::with_arg(Opcode::Jump, IrValue::Word(*address)));
            }
            JumpTarget::Identifier(name) => {
                let qualified = self.qualify(name, &jump.position)?;
                self.push(Instruction::with_label(Opcode::Jump, qualified));
            }
        }
        Ok(())
    }

    /// Emits the condition and a branch to `target` taken when the
    /// condition is false (zero).
    fn emit_branch_if_false(
        &mut self,
        condition: &Expression,
        target: &str,
    ) -> Result<(), CompilerError> {
        let datatype = self.emit_expression(condition)?;

        let opcode = match width_of(datatype) {
            Width::Byte => Opcode::Jz,
            Width::Word => Opcode::Jzw,
            Width::Float => {
                // truthiness of a float: compare against 0.0 first
                self.push(Instruction::with_arg(Opcode::PushFloat, IrValue::Float(0.0)));
                self.push(Instruction::new(Opcode::NotequalF));
                Opcode::Jz
            }
        };

        self.push(Instruction::with_label(opcode, target));
        Ok(())
    }

    fn emit_if(&mut self, if_stmt: &IfStatement) -> Result<(), CompilerError> {
        let else_label = self.fresh_label();

        self.emit_branch_if_false(&if_stmt.condition, &else_label)?;
        self.emit_statements(&if_stmt.truepart)?;

        if if_stmt.elsepart.is_empty() {
            self.push(Instruction::label(else_label));
        } else {
            let end_label = self.fresh_label();
            self.push(Instruction::with_label(Opcode::Jump, end_label.clone()));
            self.push(Instruction::label(else_label));
            self.emit_statements(&if_stmt.elsepart)?;
            self.push(Instruction::label(end_label));
        }

        Ok(())
    }

    fn emit_while(&mut self, while_loop: &WhileLoop) -> Result<(), CompilerError> {
        let check_label = self.fresh_label();
        let end_label = self.fresh_label();

        self.push(Instruction::label(check_label.clone()));
        self.emit_branch_if_false(&while_loop.condition, &end_label)?;
        self.emit_statements(&while_loop.body)?;
        self.push(Instruction::with_label(Opcode::Jump, check_label));
        self.push(Instruction::label(end_label));
        Ok(())
    }

    fn emit_repeat(&mut self, repeat_loop: &RepeatLoop) -> Result<(), CompilerError> {
        let loop_label = self.fresh_label();

        self.push(Instruction::label(loop_label.clone()));
        self.emit_statements(&repeat_loop.body)?;
        // loop again while the until-condition is still false
        self.emit_branch_if_false(&repeat_loop.until, &loop_label)?;
        Ok(())
    }

    fn loop_target(&self, for_loop: &ForLoop) -> Result<(AssignTarget, DataType), CompilerError> {
        if let Some(register) = for_loop.loop_register {
            let datatype = if register.is_pair() {
                DataType::UWord
            } else {
                DataType::UByte
            };
            return Ok((
                AssignTarget::Register {
                    register,
                    position: for_loop.position.clone(),
                },
                datatype,
            ));
        }

        let loop_var = for_loop.loop_var.as_ref().ok_or_else(|| {
            CompilerError(format!("for loop without loop variable at {}", for_loop.position))
        })?;

        let datatype = for_loop
            .decl_datatype
            .or_else(|| {
                self.namespace
                    .resolve_variable(&loop_var.name, &self.scope)
                    .map(|v| v.datatype)
            })
            .ok_or_else(|| {
                CompilerError(format!("loop variable '{}' has no type", loop_var.name))
            })?;

        Ok((AssignTarget::Identifier(loop_var.clone()), datatype))
    }

    fn emit_for(&mut self, for_loop: &ForLoop) -> Result<(), CompilerError> {
        let (target, loop_type) = self.loop_target(for_loop)?;

        // a loop-declared variable becomes a regular block variable
        if let (Some(datatype), Some(loop_var)) = (for_loop.decl_datatype, &for_loop.loop_var) {
            self.block.variables.insert(
                self.scope.qualified(&loop_var.name),
                BlockVariable {
                    datatype,
                    value: None,
                    zeropage: false,
                },
            );
        }

        match &for_loop.iterable {
            Expression::Range { from, to, step, .. } => {
                self.emit_range_for(for_loop, &target, loop_type, from, to, step.as_deref())
            }
            iterable => self.emit_iterable_for(for_loop, &target, loop_type, iterable),
        }
    }

    fn emit_range_for(
        &mut self,
        for_loop: &ForLoop,
        target: &AssignTarget,
        loop_type: DataType,
        from: &Expression,
        to: &Expression,
        step: Option<&Expression>,
    ) -> Result<(), CompilerError> {
        let step_value = match step {
            None => 1,
            Some(expression) => expression
                .as_literal()
                .and_then(|lit| lit.as_integer())
                .ok_or_else(|| {
                    CompilerError(format!(
                        "range step must be constant at {}",
                        for_loop.position
                    ))
                })?,
        };

        let check_label = self.fresh_label();
        let end_label = self.fresh_label();

        // loopvar = from
        let from_type = self.emit_expression(from)?;
        self.emit_cast(from_type, loop_type)?;
        self.emit_store(target, loop_type)?;

        // while loopvar has not passed `to`
        self.push(Instruction::label(check_label.clone()));
        let target_expr = target.to_expression();
        self.emit_expression(&target_expr)?;
        let to_type = self.emit_expression(to)?;
        self.emit_cast(to_type, loop_type)?;

        let compare = if step_value > 0 {
            comparison_opcode(BinaryOperator::LessEqual, loop_type)?
        } else {
            comparison_opcode(BinaryOperator::GreaterEqual, loop_type)?
        };
        self.push(Instruction::new(compare));
        self.push(Instruction::with_label(Opcode::Jz, end_label.clone()));

        self.emit_statements(&for_loop.body)?;

        // loopvar += step
        self.emit_expression(&target_expr)?;
        let magnitude = step_value.unsigned_abs();
        match width_of(loop_type) {
            Width::Byte => self.push(Instruction::with_arg(
                Opcode::PushByte,
                IrValue::Byte(magnitude as u8),
            )),
            Width::Word => self.push(Instruction::with_arg(
                Opcode::PushWord,
                IrValue::Word(magnitude as u16),
            )),
            Width::Float => self.push(Instruction::with_arg(
                Opcode::PushFloat,
                IrValue::Float(magnitude as f64),
            )),
        }

        let advance = match (step_value > 0, width_of(loop_type)) {
            (true, Width::Byte) => Opcode::AddB,
            (true, Width::Word) => Opcode::AddW,
            (true, Width::Float) => Opcode::AddF,
            (false, Width::Byte) => Opcode::SubB,
            (false, Width::Word) => Opcode::SubW,
            (false, Width::Float) => Opcode::SubF,
        };
        self.push(Instruction::new(advance));
        self.emit_store(target, loop_type)?;

        self.push(Instruction::with_label(Opcode::Jump, check_label));
        self.push(Instruction::label(end_label));
        Ok(())
    }

    fn emit_iterable_for(
        &mut self,
        for_loop: &ForLoop,
        target: &AssignTarget,
        loop_type: DataType,
        iterable: &Expression,
    ) -> Result<(), CompilerError> {
        let (qualified, element, length) = match iterable {
            Expression::Identifier(ident) => {
                let qualified = self.qualify(&ident.name, &ident.position)?;
                let symbol = self
                    .namespace
                    .resolve_variable(&ident.name, &self.scope)
                    .ok_or_else(|| {
                        CompilerError(format!("cannot iterate over '{}'", ident.name))
                    })?;
                let element = symbol.datatype.element_type().ok_or_else(|| {
                    CompilerError(format!("'{}' is not iterable", ident.name))
                })?;
                let length = symbol.length.ok_or_else(|| {
                    CompilerError(format!("iterable '{}' has unknown length", ident.name))
                })?;
                (qualified, element, length)
            }
            Expression::Literal(literal) => {
                let id = literal.heap_id().ok_or_else(|| {
                    CompilerError("iterable literal is not on the heap".to_string())
                })?;
                let element = literal.datatype.element_type().ok_or_else(|| {
                    CompilerError("literal is not iterable".to_string())
                })?;

                // materialize the literal as a hidden block variable
                let name = self.scope.qualified(&format!(
                    "_iter_{}_{}",
                    literal.position.line, literal.position.column
                ));
                self.block.variables.insert(
                    name.clone(),
                    BlockVariable {
                        datatype: literal.datatype,
                        value: Some(literal.clone()),
                        zeropage: false,
                    },
                );
                (name, element, self.heap.length_of(id))
            }
            other => {
                return Err(CompilerError(format!(
                    "cannot iterate over expression at {}",
                    other.position()
                )))
            }
        };

        let index_type = if length > 255 {
            DataType::UWord
        } else {
            DataType::UByte
        };

        let index_name = self.scope.qualified(&format!(
            "_idx_{}_{}",
            for_loop.position.line, for_loop.position.column
        ));
        self.block.variables.insert(
            index_name.clone(),
            BlockVariable {
                datatype: index_type,
                value: None,
                zeropage: false,
            },
        );

        let (push_index, pop_index, push_limit, add_one, less): (
            Instruction,
            Instruction,
            Instruction,
            Opcode,
            Opcode,
        ) = match width_of(index_type) {
            Width::Byte => (
                Instruction::with_label(Opcode::PushVarByte, index_name.clone()),
                Instruction::with_label(Opcode::PopVarByte, index_name.clone()),
                Instruction::with_arg(Opcode::PushByte, IrValue::Byte(length as u8)),
                Opcode::AddB,
                Opcode::LessUb,
            ),
            _ => (
                Instruction::with_label(Opcode::PushVarWord, index_name.clone()),
                Instruction::with_label(Opcode::PopVarWord, index_name.clone()),
                Instruction::with_arg(Opcode::PushWord, IrValue::Word(length as u16)),
                Opcode::AddW,
                Opcode::LessUw,
            ),
        };

        let check_label = self.fresh_label();
        let end_label = self.fresh_label();

        // index = 0
        match width_of(index_type) {
            Width::Byte => self.push(Instruction::with_arg(Opcode::PushByte, IrValue::Byte(0))),
            _ => self.push(Instruction::with_arg(Opcode::PushWord, IrValue::Word(0))),
        }
        self.push(pop_index.clone());

        // while index < length
        self.push(Instruction::label(check_label.clone()));
        self.push(push_index.clone());
        self.push(push_limit);
        self.push(Instruction::new(less));
        self.push(Instruction::with_label(Opcode::Jz, end_label.clone()));

        // loopvar = iterable[index]
        self.push(push_index.clone());
        let read = match width_of(element) {
            Width::Byte => Opcode::PushIndexedByte,
            Width::Word => Opcode::PushIndexedWord,
            Width::Float => Opcode::PushIndexedFloat,
        };
        self.push(Instruction::with_label(read, qualified));
        self.emit_cast(element, loop_type)?;
        self.emit_store(target, loop_type)?;

        self.emit_statements(&for_loop.body)?;

        // index += 1
        self.push(push_index);
        match width_of(index_type) {
            Width::Byte => self.push(Instruction::with_arg(Opcode::PushByte, IrValue::Byte(1))),
            _ => self.push(Instruction::with_arg(Opcode::PushWord, IrValue::Word(1))),
        }
        self.push(Instruction::new(add_one));
        self.push(pop_index);

        self.push(Instruction::with_label(Opcode::Jump, check_label));
        self.push(Instruction::label(end_label));
        Ok(())
    }

    /// Emits the expression and reports the type of the value it leaves
    /// on the stack.
    fn emit_expression(&mut self, expression: &Expression) -> Result<DataType, CompilerError> {
        match expression {
            Expression::Literal(literal) => self.emit_literal(literal),
            Expression::Identifier(ident) => {
                let qualified = self.qualify(&ident.name, &ident.position)?;

                match self.namespace.resolve(&ident.name, &self.scope) {
                    Some((_, SymbolEntry::Variable(symbol))) => {
                        let datatype = symbol.datatype;
                        let opcode = if datatype.is_iterable() {
                            Opcode::PushAddrVar
                        } else {
                            match width_of(datatype) {
                                Width::Byte => Opcode::PushVarByte,
                                Width::Word => Opcode::PushVarWord,
                                Width::Float => Opcode::PushVarFloat,
                            }
                        };
                        self.push(Instruction::with_label(opcode, qualified));
                        Ok(datatype)
                    }
                    _ => Err(CompilerError(format!(
                        "'{}' is not a value at {}",
                        ident.name, ident.position
                    ))),
                }
            }
            Expression::Register { register, .. } => {
                let datatype = if register.is_pair() {
                    DataType::UWord
                } else {
                    DataType::UByte
                };
                let opcode = match width_of(datatype) {
                    Width::Byte => Opcode::PushVarByte,
                    _ => Opcode::PushVarWord,
                };
                self.push(Instruction::with_label(opcode, register.to_string()));
                Ok(datatype)
            }
            Expression::Prefix {
                operator,
                expression,
                ..
            } => {
                let datatype = self.emit_expression(expression)?;
                self.emit_prefix_op(*operator, datatype)
            }
            Expression::Binary {
                left,
                operator,
                right,
                ..
            } => self.emit_binary(left, *operator, right),
            Expression::FunctionCall(call) => {
                let returned = self.emit_call(call)?;
                returned.ok_or_else(|| {
                    CompilerError(format!(
                        "call to '{}' produces no value at {}",
                        call.target.name, call.position
                    ))
                })
            }
            Expression::ArrayIndexed(indexed) => {
                let qualified = self.qualify(&indexed.identifier.name, &indexed.position)?;
                let element = self
                    .namespace
                    .resolve_variable(&indexed.identifier.name, &self.scope)
                    .and_then(|v| v.datatype.element_type())
                    .ok_or_else(|| {
                        CompilerError(format!(
                            "indexed read from non-iterable '{}'",
                            indexed.identifier.name
                        ))
                    })?;

                self.emit_expression(&indexed.index)?;

                let opcode = match width_of(element) {
                    Width::Byte => Opcode::PushIndexedByte,
                    Width::Word => Opcode::PushIndexedWord,
                    Width::Float => Opcode::PushIndexedFloat,
                };
                self.push(Instruction::with_label(opcode, qualified));
                Ok(element)
            }
            Expression::AddressOf(addr) => {
                let scoped = addr.scoped_name.clone().ok_or_else(|| {
                    CompilerError(format!(
                        "address-of '{}' was never resolved at {}",
                        addr.identifier.name, addr.position
                    ))
                })?;
                self.push(Instruction::with_label(Opcode::PushAddrVar, scoped));
                Ok(DataType::UWord)
            }
            Expression::Typecast {
                expression,
                datatype,
                ..
            } => {
                let from = self.emit_expression(expression)?;
                self.emit_cast(from, *datatype)?;
                Ok(*datatype)
            }
            Expression::DirectMemoryRead { address, position } => {
                let address = address
                    .as_literal()
                    .and_then(|lit| lit.as_integer())
                    .ok_or_else(|| {
                        CompilerError(format!(
                            "memory read needs a constant address at {position}"
                        ))
                    })?;
                self.push(Instruction::with_arg(
                    Opcode::PushMemByte,
                    IrValue::Word(address as u16),
                ));
                Ok(DataType::UByte)
            }
            Expression::Range { position, .. } => Err(CompilerError(format!(
                "un-materialized range expression at {position}"
            ))),
        }
    }

    fn emit_literal(&mut self, literal: &LiteralValue) -> Result<DataType, CompilerError> {
        match literal.payload {
            Payload::Byte(value) => {
                self.push(Instruction::with_arg(Opcode::PushByte, IrValue::Byte(value)));
            }
            Payload::Word(value) => {
                self.push(Instruction::with_arg(Opcode::PushWord, IrValue::Word(value)));
            }
            Payload::Float(value) => {
                self.push(Instruction::with_arg(
                    Opcode::PushFloat,
                    IrValue::Float(value),
                ));
            }
            Payload::Heap(id) => {
                debug_assert!(matches!(
                    self.heap.get(id),
                    HeapEntry::Str { .. } | HeapEntry::Array { .. } | HeapEntry::FloatArray { .. }
                ));
                self.push(Instruction::with_arg(Opcode::PushAddrHeap, IrValue::Heap(id)));
            }
        }
        Ok(literal.datatype)
    }

    fn emit_prefix_op(
        &mut self,
        operator: PrefixOperator,
        datatype: DataType,
    ) -> Result<DataType, CompilerError> {
        match operator {
            PrefixOperator::Plus => Ok(datatype),
            PrefixOperator::Minus => {
                let opcode = match width_of(datatype) {
                    Width::Byte => Opcode::NegB,
                    Width::Word => Opcode::NegW,
                    Width::Float => Opcode::NegF,
                };
                self.push(Instruction::new(opcode));
                Ok(datatype)
            }
            PrefixOperator::Invert => {
                let opcode = match width_of(datatype) {
                    Width::Byte => Opcode::InvB,
                    _ => Opcode::InvW,
                };
                self.push(Instruction::new(opcode));
                Ok(datatype)
            }
            PrefixOperator::Not => {
                let opcode = match width_of(datatype) {
                    Width::Byte => Opcode::NotB,
                    Width::Word => Opcode::NotW,
                    Width::Float => {
                        self.push(Instruction::with_arg(
                            Opcode::PushFloat,
                            IrValue::Float(0.0),
                        ));
                        self.push(Instruction::new(Opcode::EqualF));
                        return Ok(DataType::UByte);
                    }
                };
                self.push(Instruction::new(opcode));
                Ok(DataType::UByte)
            }
        }
    }

    fn emit_binary(
        &mut self,
        left: &Expression,
        operator: BinaryOperator,
        right: &Expression,
    ) -> Result<DataType, CompilerError> {
        let left_type = self.infer(left)?;
        let right_type = self.infer(right)?;
        let common = promote(left_type, right_type);

        self.emit_expression(left)?;
        self.emit_cast(left_type, common)?;
        self.emit_expression(right)?;
        self.emit_cast(right_type, common)?;

        use BinaryOperator::*;
        let result_type = match operator {
            Less | Greater | LessEqual | GreaterEqual | Equal | NotEqual | LogicalAnd
            | LogicalOr | LogicalXor => DataType::UByte,
            _ => common,
        };

        let opcode = match operator {
            Add => width_op(common, Opcode::AddB, Opcode::AddW, Opcode::AddF),
            Subtract => width_op(common, Opcode::SubB, Opcode::SubW, Opcode::SubF),
            Multiply => width_op(common, Opcode::MulB, Opcode::MulW, Opcode::MulF),
            Divide => match common {
                DataType::UByte => Opcode::IdivUb,
                DataType::Byte => Opcode::IdivB,
                DataType::UWord => Opcode::IdivUw,
                DataType::Word => Opcode::IdivW,
                _ => Opcode::DivF,
            },
            Remainder => {
                if width_of(common) == Width::Byte {
                    Opcode::RemainderUb
                } else {
                    Opcode::RemainderUw
                }
            }
            Power => Opcode::PowF,
            BitAnd => width_op(common, Opcode::BitandB, Opcode::BitandW, Opcode::BitandW),
            BitOr => width_op(common, Opcode::BitorB, Opcode::BitorW, Opcode::BitorW),
            BitXor => width_op(common, Opcode::BitxorB, Opcode::BitxorW, Opcode::BitxorW),
            ShiftLeft => width_op(common, Opcode::ShlB, Opcode::ShlW, Opcode::ShlW),
            ShiftRight => match common {
                DataType::UByte => Opcode::ShrUb,
                DataType::Byte => Opcode::ShrB,
                DataType::Word => Opcode::ShrW,
                _ => Opcode::ShrUw,
            },
            LogicalAnd => width_op(common, Opcode::AndB, Opcode::AndW, Opcode::AndW),
            LogicalOr => width_op(common, Opcode::OrB, Opcode::OrW, Opcode::OrW),
            LogicalXor => width_op(common, Opcode::XorB, Opcode::XorW, Opcode::XorW),
            Less | Greater | LessEqual | GreaterEqual | Equal | NotEqual => {
                comparison_opcode(operator, common)?
            }
        };

        self.push(Instruction::new(opcode));
        Ok(result_type)
    }

    /// Emits a call; returns the type of the value it leaves on the
    /// stack, if any.
    fn emit_call(&mut self, call: &FunctionCall) -> Result<Option<DataType>, CompilerError> {
        match self.namespace.resolve(&call.target.name, &self.scope) {
            Some((_, SymbolEntry::Builtin { name })) => {
                let function = builtins::builtin_function(name).ok_or_else(|| {
                    CompilerError(format!("builtin '{name}' has no table entry"))
                })?;

                // builtins that modify their operand get its address
                let by_address = matches!(
                    *name,
                    "lsl" | "lsr" | "rol" | "ror" | "rol2" | "ror2" | "swap"
                );

                for arg in &call.args {
                    match arg {
                        Expression::Identifier(ident) if by_address => {
                            let qualified = self.qualify(&ident.name, &ident.position)?;
                            self.push(Instruction::with_label(Opcode::PushAddrVar, qualified));
                        }
                        Expression::Register { register, .. } if by_address => {
                            self.push(Instruction::with_label(
                                Opcode::PushAddrVar,
                                register.to_string(),
                            ));
                        }
                        _ => {
                            self.emit_expression(arg)?;
                        }
                    }
                }

                self.push(Instruction::with_label(Opcode::Syscall, *name));

                if function.returns_value {
                    Ok(Some(
                        builtins::builtin_return_type(name).unwrap_or(DataType::UByte),
                    ))
                } else {
                    Ok(None)
                }
            }
            Some((qualified, SymbolEntry::Subroutine(symbol))) => {
                let symbol: SubroutineSymbol = symbol.clone();
                self.emit_subroutine_call(call, &qualified, &symbol)
            }
            Some((qualified, SymbolEntry::Label { .. })) => {
                self.push(Instruction::with_label(Opcode::Call, qualified));
                Ok(None)
            }
            _ => Err(CompilerError(format!(
                "cannot call '{}' at {}",
                call.target.name, call.position
            ))),
        }
    }

    fn emit_subroutine_call(
        &mut self,
        call: &FunctionCall,
        qualified: &str,
        symbol: &SubroutineSymbol,
    ) -> Result<Option<DataType>, CompilerError> {
        if symbol.is_asm {
            // the code generator moves these stack values into registers
            for arg in &call.args {
                self.emit_expression(arg)?;
            }

            match symbol.asm_address {
                Some(address) => self.push(Instruction::with_arg(
                    Opcode::Call,
                    IrValue::Word(address),
                )),
                None => self.push(Instruction::with_label(Opcode::Call, qualified)),
            }
        } else {
            // arguments land in the callee's parameter variables
            for (arg, parameter) in call.args.iter().zip(&symbol.parameters) {
                let arg_type = self.emit_expression(arg)?;
                self.emit_cast(arg_type, parameter.datatype)?;

                let parameter_name = format!("{qualified}.{}", parameter.name);
                let opcode = match width_of(parameter.datatype) {
                    Width::Byte => Opcode::PopVarByte,
                    Width::Word => Opcode::PopVarWord,
                    Width::Float => Opcode::PopVarFloat,
                };
                self.push(Instruction::with_label(opcode, parameter_name));
            }

            self.push(Instruction::with_label(Opcode::Call, qualified));
        }

        Ok(symbol.return_types.first().copied())
    }

    fn emit_cast(&mut self, from: DataType, to: DataType) -> Result<(), CompilerError> {
        let (from_width, to_width) = (width_of(from), width_of(to));
        if from_width == to_width {
            return Ok(());
        }

        let opcode = match (from_width, to_width) {
            (Width::Byte, Width::Word) => Opcode::CastByteToWord,
            (Width::Word, Width::Byte) => Opcode::CastWordToByte,
            (Width::Byte, Width::Float) => Opcode::CastByteToFloat,
            (Width::Word, Width::Float) => Opcode::CastWordToFloat,
            (Width::Float, Width::Byte) => Opcode::CastFloatToByte,
            (Width::Float, Width::Word) => Opcode::CastFloatToWord,
            _ => unreachable!(),
        };

        self.push(Instruction::new(opcode));
        Ok(())
    }
}

fn width_op(datatype: DataType, byte: Opcode, word: Opcode, float: Opcode) -> Opcode {
    match width_of(datatype) {
        Width::Byte => byte,
        Width::Word => word,
        Width::Float => float,
    }
}

fn promote(a: DataType, b: DataType) -> DataType {
    if a == DataType::Float || b == DataType::Float {
        return DataType::Float;
    }

    let signed = a.is_signed() || b.is_signed();
    let word = width_of(a) == Width::Word || width_of(b) == Width::Word;

    match (word, signed) {
        (false, false) => DataType::UByte,
        (false, true) => DataType::Byte,
        (true, false) => DataType::UWord,
        (true, true) => DataType::Word,
    }
}

fn comparison_opcode(
    operator: BinaryOperator,
    datatype: DataType,
) -> Result<Opcode, CompilerError> {
    use BinaryOperator::*;

    let opcode = match operator {
        Less => match datatype {
            DataType::UByte => Opcode::LessUb,
            DataType::Byte => Opcode::LessB,
            DataType::UWord => Opcode::LessUw,
            DataType::Word => Opcode::LessW,
            _ => Opcode::LessF,
        },
        Greater => match datatype {
            DataType::UByte => Opcode::GreaterUb,
            DataType::Byte => Opcode::GreaterB,
            DataType::UWord => Opcode::GreaterUw,
            DataType::Word => Opcode::GreaterW,
            _ => Opcode::GreaterF,
        },
        LessEqual => match datatype {
            DataType::UByte => Opcode::LesseqUb,
            DataType::Byte => Opcode::LesseqB,
            DataType::UWord => Opcode::LesseqUw,
            DataType::Word => Opcode::LesseqW,
            _ => Opcode::LesseqF,
        },
        GreaterEqual => match datatype {
            DataType::UByte => Opcode::GreatereqUb,
            DataType::Byte => Opcode::GreatereqB,
            DataType::UWord => Opcode::GreatereqUw,
            DataType::Word => Opcode::GreatereqW,
            _ => Opcode::GreatereqF,
        },
        Equal => width_op(datatype, Opcode::EqualB, Opcode::EqualW, Opcode::EqualF),
        NotEqual => width_op(
            datatype,
            Opcode::NotequalB,
            Opcode::NotequalW,
            Opcode::NotequalF,
        ),
        other => {
            return Err(CompilerError(format!(
                "operator {other} is not a comparison"
            )))
        }
    };

    Ok(opcode)
}
