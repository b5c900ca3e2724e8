//! Bottom-up expression rewriting: fold literal subexpressions, inline
//! CONST identifiers, materialize constant ranges and fold calls to pure
//! builtins. Every replacement bumps a counter; the caller loops until a
//! whole pass performs no rewrites.

use crate::{
    ast::{
        AssignTarget, Expression, Module, Position, Register, Statement,
    },
    builtins,
    diagnostics::Diagnostics,
    middle::{
        const_eval,
        namespace::{Namespace, ScopePath, SymbolEntry},
    },
    value::heap::HeapValues,
};

pub fn optimize_module_expressions(
    module: &mut Module,
    namespace: &Namespace,
    heap: &mut HeapValues,
    diagnostics: &mut Diagnostics,
) -> usize {
    let mut optimizer = ExpressionOptimizer {
        namespace,
        heap,
        diagnostics,
        optimizations: 0,
    };

    let root = ScopePath::root();
    optimizer.rewrite_statements(&mut module.statements, &root);
    optimizer.optimizations
}

struct ExpressionOptimizer<'a> {
    namespace: &'a Namespace,
    heap: &'a mut HeapValues,
    diagnostics: &'a mut Diagnostics,
    optimizations: usize,
}

impl ExpressionOptimizer<'_> {
    fn rewrite_statements(&mut self, statements: &mut [Statement], scope: &ScopePath) {
        for statement in statements {
            match statement {
                Statement::Block(block) => {
                    let inner = scope.entered(&block.name);
                    self.rewrite_statements(&mut block.statements, &inner);
                }
                Statement::Subroutine(sub) => {
                    let inner = scope.entered(&sub.name);
                    self.rewrite_statements(&mut sub.statements, &inner);
                }
                Statement::AnonymousScope(anon) => {
                    self.rewrite_statements(&mut anon.statements, scope)
                }
                Statement::VarDecl(decl) => {
                    if let Some(size) = &mut decl.array_size {
                        self.rewrite(size, scope);
                    }
                    if let Some(value) = &mut decl.value {
                        self.rewrite(value, scope);
                    }
                }
                Statement::Return(ret) => {
                    for value in &mut ret.values {
                        self.rewrite(value, scope);
                    }
                }
                Statement::If(if_stmt) => {
                    self.rewrite(&mut if_stmt.condition, scope);
                    self.rewrite_statements(&mut if_stmt.truepart, scope);
                    self.rewrite_statements(&mut if_stmt.elsepart, scope);
                }
                Statement::For(for_loop) => {
                    self.rewrite(&mut for_loop.iterable, scope);
                    self.rewrite_statements(&mut for_loop.body, scope);
                }
                Statement::While(while_loop) => {
                    self.rewrite(&mut while_loop.condition, scope);
                    self.rewrite_statements(&mut while_loop.body, scope);
                }
                Statement::Repeat(repeat_loop) => {
                    self.rewrite_statements(&mut repeat_loop.body, scope);
                    self.rewrite(&mut repeat_loop.until, scope);
                }
                Statement::Assignment(assignment) => {
                    for target in &mut assignment.targets {
                        self.rewrite_target(target, scope);
                    }
                    self.rewrite(&mut assignment.value, scope);
                }
                Statement::PostIncrDecr(incr_decr) => {
                    self.rewrite_target(&mut incr_decr.target, scope)
                }
                Statement::FunctionCall(call) => {
                    for arg in &mut call.call.args {
                        self.rewrite(arg, scope);
                    }
                }
                _ => {}
            }
        }
    }

    fn rewrite_target(&mut self, target: &mut AssignTarget, scope: &ScopePath) {
        match target {
            AssignTarget::ArrayIndexed(indexed) => self.rewrite(&mut indexed.index, scope),
            AssignTarget::MemoryAddress { address, .. } => self.rewrite(address, scope),
            AssignTarget::Register { .. } | AssignTarget::Identifier(_) => {}
        }
    }

    /// A call to a subroutine whose body is a single jump goes straight
    /// to the jump's target, mirroring the statement-level rewrite.
    fn thread_call_target(&mut self, call: &mut crate::ast::FunctionCall, scope: &ScopePath) {
        let Some(symbol) = self.namespace.resolve_subroutine(&call.target.name, scope) else {
            return;
        };

        let Some(redirect) = symbol.jump_redirect.clone() else {
            return;
        };

        if redirect == call.target.name {
            return;
        }

        if let Some((qualified, _)) = self.namespace.resolve(&call.target.name, scope) {
            if qualified == redirect {
                return;
            }
        }

        // never retarget onto another redirecting subroutine; cycles must
        // not ping-pong the fixed point
        if let Some(SymbolEntry::Subroutine(target)) = self.namespace.get(&redirect) {
            if target.jump_redirect.is_some() {
                return;
            }
        }

        call.target.name = redirect;
        self.optimizations += 1;
    }

    fn rewrite(&mut self, slot: &mut Expression, scope: &ScopePath) {
        let placeholder = Expression::Register {
            register: Register::A,
            position: Position::internal(),
        };
        let owned = std::mem::replace(slot, placeholder);
        *slot = self.fold(owned, scope);
    }

    fn fold(&mut self, expression: Expression, scope: &ScopePath) -> Expression {
        match expression {
            Expression::Identifier(ident) => {
                if let Some(value) = self.namespace.constant_value(&ident.name, scope) {
                    self.optimizations += 1;
                    let mut literal = value.clone();
                    literal.position = ident.position.clone();
                    return Expression::Literal(literal);
                }
                Expression::Identifier(ident)
            }
            Expression::Prefix {
                operator,
                mut expression,
                position,
            } => {
                self.rewrite(&mut expression, scope);

                if let Some(literal) = expression.as_literal() {
                    match const_eval::evaluate_prefix(operator, literal) {
                        Ok(folded) => {
                            self.optimizations += 1;
                            return Expression::Literal(folded);
                        }
                        Err(error) => {
                            self.diagnostics
                                .expression_error(error.message, error.position);
                        }
                    }
                }

                Expression::Prefix {
                    operator,
                    expression,
                    position,
                }
            }
            Expression::Binary {
                mut left,
                operator,
                mut right,
                position,
            } => {
                self.rewrite(&mut left, scope);
                self.rewrite(&mut right, scope);

                if let (Some(a), Some(b)) = (left.as_literal(), right.as_literal()) {
                    match const_eval::evaluate(a, operator, b, self.heap) {
                        Ok(folded) => {
                            self.optimizations += 1;
                            return Expression::Literal(folded);
                        }
                        Err(error) => {
                            self.diagnostics
                                .expression_error(error.message, error.position);
                        }
                    }
                }

                Expression::Binary {
                    left,
                    operator,
                    right,
                    position,
                }
            }
            Expression::Range {
                mut from,
                mut to,
                mut step,
                position,
            } => {
                self.rewrite(&mut from, scope);
                self.rewrite(&mut to, scope);
                if let Some(step) = &mut step {
                    self.rewrite(step, scope);
                }

                let step_is_constant = match &step {
                    None => true,
                    Some(expr) => expr.as_literal().is_some(),
                };

                if step_is_constant {
                    if let (Some(a), Some(b)) = (from.as_literal(), to.as_literal()) {
                        let step_literal = step.as_ref().and_then(|s| s.as_literal());

                        // failures are left for the checker to diagnose; a
                        // range that is merely too large to materialize is
                        // still a valid loop iterable
                        if let Ok(folded) =
                            const_eval::evaluate_range(a, b, step_literal, self.heap, &position)
                        {
                            self.optimizations += 1;
                            return Expression::Literal(folded);
                        }
                    }
                }

                Expression::Range {
                    from,
                    to,
                    step,
                    position,
                }
            }
            Expression::FunctionCall(mut call) => {
                for arg in &mut call.args {
                    self.rewrite(arg, scope);
                }

                self.thread_call_target(&mut call, scope);

                let is_builtin = matches!(
                    self.namespace.resolve(&call.target.name, scope),
                    Some((_, SymbolEntry::Builtin { .. }))
                );

                if is_builtin && builtins::is_pure_builtin(&call.target.name) {
                    let literal_args: Option<Vec<_>> =
                        call.args.iter().map(|a| a.as_literal().cloned()).collect();

                    if let Some(args) = literal_args {
                        match builtins::fold_builtin(
                            &call.target.name,
                            &args,
                            self.heap,
                            &call.position,
                        ) {
                            Ok(Some(folded)) => {
                                self.optimizations += 1;
                                return Expression::Literal(folded);
                            }
                            Ok(None) => {}
                            Err(error) => {
                                self.diagnostics
                                    .expression_error(error.message, error.position);
                            }
                        }
                    }
                }

                Expression::FunctionCall(call)
            }
            Expression::Typecast {
                mut expression,
                datatype,
                position,
            } => {
                self.rewrite(&mut expression, scope);

                if let Some(literal) = expression.as_literal() {
                    match const_eval::evaluate_cast(literal, datatype) {
                        Ok(folded) => {
                            self.optimizations += 1;
                            return Expression::Literal(folded);
                        }
                        Err(error) => {
                            self.diagnostics
                                .expression_error(error.message, error.position);
                        }
                    }
                }

                Expression::Typecast {
                    expression,
                    datatype,
                    position,
                }
            }
            Expression::AddressOf(mut addr) => {
                if addr.scoped_name.is_none() {
                    // resolving the qualified name is bookkeeping, not an
                    // optimization; unresolved names are the checker's to
                    // report
                    if let Some((qualified, _)) =
                        self.namespace.resolve(&addr.identifier.name, scope)
                    {
                        addr.scoped_name = Some(qualified);
                    }
                }
                Expression::AddressOf(addr)
            }
            Expression::ArrayIndexed(mut indexed) => {
                self.rewrite(&mut indexed.index, scope);
                Expression::ArrayIndexed(indexed)
            }
            Expression::DirectMemoryRead { mut address, position } => {
                self.rewrite(&mut address, scope);
                Expression::DirectMemoryRead { address, position }
            }
            Expression::Literal(_) | Expression::Register { .. } => expression,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Block, Identifier, Subroutine, VarDecl, VarDeclType},
        value::{DataType, LiteralValue},
    };

    fn pos() -> Position {
        Position::internal()
    }

    fn literal(v: u8) -> Expression {
        Expression::Literal(LiteralValue::byte(DataType::UByte, v, pos()))
    }

    fn binary(left: Expression, operator: crate::ast::BinaryOperator, right: Expression) -> Expression {
        Expression::Binary {
            left: Box::new(left),
            operator,
            right: Box::new(right),
            position: pos(),
        }
    }

    fn module_with_initializer(value: Expression) -> Module {
        Module {
            name: "test".into(),
            statements: vec![Statement::Block(Box::new(Block {
                name: "main".into(),
                address: None,
                force_output: false,
                position: pos(),
                statements: vec![
                    Statement::Subroutine(Subroutine {
                        name: "start".into(),
                        parameters: vec![],
                        return_types: vec![],
                        statements: vec![Statement::VarDecl(VarDecl {
                            decl_type: VarDeclType::Var,
                            datatype: DataType::UByte,
                            name: "x".into(),
                            value: Some(value),
                            array_size: None,
                            zeropage: false,
                            position: pos(),
                        })],
                        is_asm: false,
                        asm_address: None,
                        asm_parameter_registers: vec![],
                        asm_return_registers: vec![],
                        asm_clobbers: vec![],
                        position: pos(),
                    }),
                ],
            }))],
            position: pos(),
        }
    }

    fn initializer(module: &Module) -> &Expression {
        let block = module.blocks().next().unwrap();
        let sub = block
            .statements
            .iter()
            .find_map(|statement| match statement {
                Statement::Subroutine(sub) => Some(sub),
                _ => None,
            })
            .expect("expected subroutine");
        let Statement::VarDecl(decl) = &sub.statements[0] else {
            panic!("expected var decl");
        };
        decl.value.as_ref().unwrap()
    }

    #[test]
    fn nested_arithmetic_folds_to_a_single_literal() {
        use crate::ast::BinaryOperator::{Add, Multiply};

        // 1 + 2 * 3
        let mut module =
            module_with_initializer(binary(literal(1), Add, binary(literal(2), Multiply, literal(3))));
        let mut heap = HeapValues::default();
        let mut diagnostics = Diagnostics::new();
        let namespace = Namespace::build(&module, &heap);

        let count =
            optimize_module_expressions(&mut module, &namespace, &mut heap, &mut diagnostics);
        assert_eq!(count, 2);

        let folded = initializer(&module).as_literal().unwrap();
        assert_eq!(folded.datatype, DataType::UByte);
        assert_eq!(folded.as_integer(), Some(7));

        // a second pass finds nothing left to do
        let count =
            optimize_module_expressions(&mut module, &namespace, &mut heap, &mut diagnostics);
        assert_eq!(count, 0);
    }

    #[test]
    fn const_identifiers_are_inlined() {
        let mut module = module_with_initializer(Expression::Identifier(Identifier {
            name: "limit".into(),
            position: pos(),
        }));

        // add `const ubyte limit = 42` to the block
        if let Statement::Block(block) = &mut module.statements[0] {
            block.statements.insert(
                0,
                Statement::VarDecl(VarDecl {
                    decl_type: VarDeclType::Const,
                    datatype: DataType::UByte,
                    name: "limit".into(),
                    value: Some(literal(42)),
                    array_size: None,
                    zeropage: false,
                    position: pos(),
                }),
            );
        }

        let mut heap = HeapValues::default();
        let mut diagnostics = Diagnostics::new();
        let namespace = Namespace::build(&module, &heap);

        optimize_module_expressions(&mut module, &namespace, &mut heap, &mut diagnostics);

        let folded = initializer(&module).as_literal().unwrap();
        assert_eq!(folded.as_integer(), Some(42));
    }

    #[test]
    fn pure_builtin_calls_fold() {
        let mut module = module_with_initializer(Expression::FunctionCall(
            crate::ast::FunctionCall {
                target: Identifier {
                    name: "msb".into(),
                    position: pos(),
                },
                args: vec![Expression::Literal(LiteralValue::word(
                    DataType::UWord,
                    0x1234,
                    pos(),
                ))],
                position: pos(),
            },
        ));

        let mut heap = HeapValues::default();
        let mut diagnostics = Diagnostics::new();
        let namespace = Namespace::build(&module, &heap);

        optimize_module_expressions(&mut module, &namespace, &mut heap, &mut diagnostics);

        let folded = initializer(&module).as_literal().unwrap();
        assert_eq!(folded.as_integer(), Some(0x12));
    }

    #[test]
    fn folding_errors_become_diagnostics_and_leave_the_node() {
        use crate::ast::BinaryOperator::Divide;

        let mut module = module_with_initializer(binary(literal(1), Divide, literal(0)));
        let mut heap = HeapValues::default();
        let mut diagnostics = Diagnostics::new();
        let namespace = Namespace::build(&module, &heap);

        let count =
            optimize_module_expressions(&mut module, &namespace, &mut heap, &mut diagnostics);
        assert_eq!(count, 0);
        assert!(diagnostics.has_errors());
        assert!(matches!(initializer(&module), Expression::Binary { .. }));
    }
}
