//! The semantic rule set. Runs against the optimizer-stabilized tree and
//! accumulates recoverable diagnostics; the only mutation performed here
//! is injecting default initializers into uninitialized VAR declarations.

use hashbrown::HashSet;

use crate::{
    ast::{
        visit::{self, Visitor},
        AssignTarget, Assignment, Block, Directive, DirectiveArg, Expression, ForLoop,
        FunctionCall, FunctionCallStatement, IfStatement, InlineAssembly, Jump, JumpTarget, Label,
        Module, PostIncrDecr, Register, RegisterOrStatusflag, RepeatLoop, Return, Statement,
        Subroutine, VarDecl, VarDeclType, WhileLoop,
    },
    builtins::{self, BuiltinFunction},
    diagnostics::Diagnostics,
    middle::namespace::{Namespace, ScopePath, SubroutineSymbol, SymbolEntry},
    options::{CompilerOptions, LauncherType, OutputType, ZeropageType},
    value::{heap::HeapValues, DataType, LiteralValue},
};

pub fn check_module(
    module: &mut Module,
    namespace: &Namespace,
    heap: &mut HeapValues,
    options: &CompilerOptions,
    diagnostics: &mut Diagnostics,
) {
    inject_default_initializers(module, heap);

    for (qualified, position) in &namespace.duplicates {
        diagnostics.name_error(
            format!("name conflict for '{qualified}'"),
            position.clone(),
        );
    }

    check_module_structure(module, diagnostics);

    let mut checker = Checker {
        namespace,
        heap,
        options,
        diagnostics,
        scope: ScopePath::root(),
        module_name: module.name.clone(),
        current_subroutine: None,
        labels_allowed: false,
        subroutines_allowed: false,
        in_block_body: false,
    };

    checker.visit_module(module);
}

/// Uninitialized VAR declarations get a zero of their type, or the shared
/// empty-string sentinel.
fn inject_default_initializers(module: &mut Module, heap: &mut HeapValues) {
    fn walk(statements: &mut [Statement], heap: &mut HeapValues) {
        for statement in statements {
            match statement {
                Statement::Block(block) => walk(&mut block.statements, heap),
                Statement::Subroutine(sub) => walk(&mut sub.statements, heap),
                Statement::AnonymousScope(anon) => walk(&mut anon.statements, heap),
                Statement::If(if_stmt) => {
                    walk(&mut if_stmt.truepart, heap);
                    walk(&mut if_stmt.elsepart, heap);
                }
                Statement::For(for_loop) => walk(&mut for_loop.body, heap),
                Statement::While(while_loop) => walk(&mut while_loop.body, heap),
                Statement::Repeat(repeat_loop) => walk(&mut repeat_loop.body, heap),
                Statement::VarDecl(decl) => {
                    if decl.decl_type != VarDeclType::Var || decl.value.is_some() {
                        continue;
                    }

                    let position = decl.position.clone();
                    decl.value = match decl.datatype {
                        DataType::UByte | DataType::Byte => Some(Expression::Literal(
                            LiteralValue::byte(decl.datatype, 0, position),
                        )),
                        DataType::UWord | DataType::Word => Some(Expression::Literal(
                            LiteralValue::word(decl.datatype, 0, position),
                        )),
                        DataType::Float => {
                            Some(Expression::Literal(LiteralValue::float(0.0, position)))
                        }
                        DataType::Str | DataType::StrS => {
                            let id = heap.empty_string();
                            Some(Expression::Literal(LiteralValue::heap(
                                decl.datatype,
                                id,
                                position,
                            )))
                        }
                        _ => None,
                    };
                }
                _ => {}
            }
        }
    }

    walk(&mut module.statements, heap);
}

fn check_module_structure(module: &Module, diagnostics: &mut Diagnostics) {
    /* exactly one main block with a parameterless, no-return start sub */

    let main_blocks: Vec<_> = module.blocks().filter(|b| b.name == "main").collect();

    match main_blocks.as_slice() {
        [] => diagnostics.syntax_error(
            "module must have a 'main' block",
            module.position.clone(),
        ),
        [main] => {
            let start = main.statements.iter().find_map(|s| match s {
                Statement::Subroutine(sub) if sub.name == "start" => Some(sub),
                _ => None,
            });

            match start {
                None => diagnostics.syntax_error(
                    "'main' block must contain a 'start' subroutine",
                    main.position.clone(),
                ),
                Some(start) => {
                    if !start.parameters.is_empty() || !start.return_types.is_empty() {
                        diagnostics.syntax_error(
                            "'start' subroutine must take no parameters and return nothing",
                            start.position.clone(),
                        );
                    }
                }
            }
        }
        [_, extra, ..] => diagnostics.syntax_error(
            "module can have only one 'main' block",
            extra.position.clone(),
        ),
    }

    /* at most one of each singleton module-level directive */

    let mut seen = HashSet::new();
    for statement in &module.statements {
        let Statement::Directive(directive) = statement else {
            continue;
        };

        if matches!(
            directive.name.as_str(),
            "%output" | "%launcher" | "%zeropage" | "%address"
        ) && !seen.insert(directive.name.clone())
        {
            diagnostics.syntax_error(
                format!("directive {} can occur only once", directive.name),
                directive.position.clone(),
            );
        }
    }
}

struct Checker<'a> {
    namespace: &'a Namespace,
    heap: &'a HeapValues,
    options: &'a CompilerOptions,
    diagnostics: &'a mut Diagnostics,
    scope: ScopePath,
    module_name: String,
    current_subroutine: Option<SubroutineSymbol>,
    labels_allowed: bool,
    subroutines_allowed: bool,
    in_block_body: bool,
}

impl Checker<'_> {
    fn error(&mut self, message: impl Into<String>, position: &crate::ast::Position) {
        self.diagnostics.syntax_error(message, position.clone());
    }

    fn expression_error(&mut self, message: impl Into<String>, position: &crate::ast::Position) {
        self.diagnostics.expression_error(message, position.clone());
    }

    fn name_error(&mut self, message: impl Into<String>, position: &crate::ast::Position) {
        self.diagnostics.name_error(message, position.clone());
    }

    /// Static type of an expression, when it can be determined.
    fn infer_type(&self, expression: &Expression) -> Option<DataType> {
        infer_type(expression, self.namespace, &self.scope)
    }

    fn constant_of(&self, expression: &Expression) -> Option<LiteralValue> {
        match expression {
            Expression::Literal(literal) => Some(literal.clone()),
            Expression::Identifier(ident) => self
                .namespace
                .constant_value(&ident.name, &self.scope)
                .cloned(),
            _ => None,
        }
    }

    fn require_float_enabled(&mut self, datatype: DataType, position: &crate::ast::Position) {
        if matches!(datatype, DataType::Float | DataType::ArrayF) && !self.options.float_enabled {
            self.error(
                "floating point is used but not enabled via %option enable_floats",
                position,
            );
        }
    }

    fn check_var_decl(&mut self, decl: &VarDecl) {
        self.require_float_enabled(decl.datatype, &decl.position);

        if decl.decl_type == VarDeclType::Const && !decl.datatype.is_numeric() {
            self.error(
                format!("const declaration needs a numeric type, not {}", decl.datatype),
                &decl.position,
            );
        }

        if decl.datatype.is_array() {
            self.check_array_decl(decl);
        }

        if decl.decl_type == VarDeclType::Memory {
            match decl.value.as_ref().and_then(|v| v.as_literal()) {
                Some(literal) => match literal.as_integer() {
                    Some(address) if (0..=65535).contains(&address) => {}
                    _ => self.expression_error(
                        "memory address must be an integer in 0..65535",
                        &decl.position,
                    ),
                },
                None => self.expression_error(
                    "memory declaration needs a constant address",
                    &decl.position,
                ),
            }
        }

        // recursive initializers are forbidden
        if let Some(value) = &decl.value {
            if expression_mentions(value, &decl.name) {
                self.expression_error(
                    format!("initializer of '{}' refers to itself", decl.name),
                    &decl.position,
                );
            }

            if decl.decl_type != VarDeclType::Memory {
                self.check_initializer_type(decl, value);
            }
        }
    }

    fn check_array_decl(&mut self, decl: &VarDecl) {
        let declared_size = decl
            .array_size
            .as_ref()
            .and_then(|size| self.constant_of(size))
            .and_then(|lit| lit.as_integer());

        let initializer_length = decl
            .value
            .as_ref()
            .and_then(|v| v.as_literal())
            .and_then(|lit| lit.heap_id())
            .map(|id| self.heap.length_of(id));

        if decl.array_size.is_none() && initializer_length.is_none() {
            self.error(
                format!("array '{}' without size needs an iterable initializer", decl.name),
                &decl.position,
            );
        }

        if decl.decl_type == VarDeclType::Memory && decl.array_size.is_none() {
            self.error(
                format!("memory mapped array '{}' needs an explicit size", decl.name),
                &decl.position,
            );
        }

        let length = declared_size.map(|n| n as usize).or(initializer_length);

        if let (Some(length), Some((lo, hi))) = (length, decl.datatype.array_size_bounds()) {
            if length < lo || length > hi {
                self.expression_error(
                    format!(
                        "array length {length} out of bounds for {} ({lo}..{hi})",
                        decl.datatype
                    ),
                    &decl.position,
                );
            }
        }
    }

    fn check_initializer_type(&mut self, decl: &VarDecl, value: &Expression) {
        if decl.datatype.is_iterable() {
            if let Some(literal) = value.as_literal() {
                let compatible = match decl.datatype {
                    DataType::Str => literal.datatype == DataType::Str,
                    DataType::StrS => literal.datatype == DataType::StrS,
                    // an integer array initializer may come from a range
                    // or list of any narrower integer type
                    dt if dt.is_array() => literal.datatype.is_array(),
                    _ => false,
                };

                if !compatible {
                    self.expression_error(
                        format!(
                            "initializer type {} does not match {}",
                            literal.datatype, decl.datatype
                        ),
                        &decl.position,
                    );
                }
            }
            return;
        }

        self.check_value_against(decl.datatype, value, &decl.position);
    }

    /// Type compatibility of a value flowing into a target of the given
    /// type. Literal numeric values are checked by range rather than by
    /// declared type.
    fn check_value_against(
        &mut self,
        target: DataType,
        value: &Expression,
        position: &crate::ast::Position,
    ) {
        if let Some(literal) = self.constant_of(value) {
            if literal.datatype.is_numeric() && target.is_numeric() {
                if target == DataType::Float {
                    return;
                }

                if literal.datatype == DataType::Float {
                    self.expression_error(
                        format!("cannot assign float to {target}"),
                        position,
                    );
                    return;
                }

                if let Some(n) = literal.as_number() {
                    let (lo, hi) = target.value_range().unwrap();
                    if n < lo || n > hi {
                        self.expression_error(
                            format!("value {n} out of range for {target}"),
                            position,
                        );
                    }
                }
                return;
            }
        }

        let Some(value_type) = self.infer_type(value) else {
            return;
        };

        if target.assignable_from(value_type) {
            return;
        }

        if target.is_byte() && value_type.is_word() {
            self.expression_error(
                format!("cannot assign {value_type} to {target}, use msb() or lsb()"),
                position,
            );
        } else if target.is_integer() && value_type == DataType::Float {
            self.expression_error(
                format!("cannot assign float to {target}"),
                position,
            );
        } else {
            self.expression_error(
                format!("cannot assign {value_type} to {target}"),
                position,
            );
        }
    }

    fn check_subroutine_signature(&mut self, sub: &Subroutine) {
        let mut names = HashSet::new();
        for parameter in &sub.parameters {
            if !names.insert(parameter.name.as_str()) {
                self.error(
                    format!("duplicate parameter name '{}'", parameter.name),
                    &sub.position,
                );
            }
        }

        if sub.name == "irq" && (!sub.parameters.is_empty() || !sub.return_types.is_empty()) {
            self.error(
                "'irq' entrypoint must take no parameters and return nothing",
                &sub.position,
            );
        }

        if !sub.is_asm {
            if sub.return_types.len() > 1 {
                self.error(
                    "subroutines can return at most one value",
                    &sub.position,
                );
            }

            for parameter in &sub.parameters {
                if !parameter.datatype.is_numeric() {
                    self.error(
                        format!(
                            "parameter '{}' must be numeric, not {}",
                            parameter.name, parameter.datatype
                        ),
                        &sub.position,
                    );
                }
            }
        } else {
            self.check_asm_subroutine_registers(sub);
        }

        for datatype in &sub.return_types {
            self.require_float_enabled(*datatype, &sub.position);
        }

        if !sub.return_types.is_empty() && !sub.is_asm && !subroutine_can_return(sub) {
            self.error(
                format!(
                    "subroutine '{}' has a return type but never returns",
                    sub.name
                ),
                &sub.position,
            );
        }
    }

    fn check_asm_subroutine_registers(&mut self, sub: &Subroutine) {
        if sub.parameters.len() != sub.asm_parameter_registers.len() {
            self.error(
                "asm subroutine needs a register assignment for every parameter",
                &sub.position,
            );
        }

        if sub.return_types.len() != sub.asm_return_registers.len() {
            self.error(
                "asm subroutine needs a register assignment for every return value",
                &sub.position,
            );
        }

        let mut parameter_registers = HashSet::new();
        for spec in &sub.asm_parameter_registers {
            if !registers_of(spec, &mut parameter_registers) {
                self.error(
                    "register is used by more than one parameter",
                    &sub.position,
                );
            }
        }

        let mut return_registers = HashSet::new();
        for spec in &sub.asm_return_registers {
            if !registers_of(spec, &mut return_registers) {
                self.error(
                    "register is used by more than one return value",
                    &sub.position,
                );
            }
        }

        for clobbered in &sub.asm_clobbers {
            if return_registers.contains(clobbered) {
                self.error(
                    format!("return register {clobbered} is also declared clobbered"),
                    &sub.position,
                );
            }
        }
    }

    fn check_call(&mut self, call: &FunctionCall, as_statement: bool) {
        let resolved = self.namespace.resolve(&call.target.name, &self.scope);

        match resolved {
            None => {
                self.name_error(
                    format!("undefined function '{}'", call.target.name),
                    &call.position,
                );
            }
            Some((_, SymbolEntry::Builtin { name })) => {
                let function = builtins::builtin_function(name)
                    .expect("builtin entries always have a table row");
                self.check_builtin_call(function, call);
            }
            Some((_, SymbolEntry::Subroutine(symbol))) => {
                let symbol = symbol.clone();
                self.check_subroutine_call(&symbol, call);
            }
            Some((_, SymbolEntry::Label { .. })) if as_statement => {
                // calling a label is a plain jump in disguise; allowed
            }
            Some(_) => {
                self.name_error(
                    format!("cannot call '{}'", call.target.name),
                    &call.position,
                );
            }
        }
    }

    fn check_builtin_call(&mut self, function: &BuiltinFunction, call: &FunctionCall) {
        if call.args.len() != function.parameters.len() {
            self.error(
                format!(
                    "{} expects {} argument(s), got {}",
                    function.name,
                    function.parameters.len(),
                    call.args.len()
                ),
                &call.position,
            );
            return;
        }

        for (arg, spec) in call.args.iter().zip(function.parameters) {
            if let Some(datatype) = self.infer_type(arg) {
                if !spec.admits(datatype) {
                    self.expression_error(
                        format!("{} cannot take a {} argument", function.name, datatype),
                        arg.position(),
                    );
                }
            }
        }

        if function.name == "swap" {
            self.check_swap_call(call);
        }
    }

    fn check_swap_call(&mut self, call: &FunctionCall) {
        let [first, second] = call.args.as_slice() else {
            return;
        };

        if first.same_expression(second) {
            self.expression_error("swap needs two different targets", &call.position);
        }

        let types = (self.infer_type(first), self.infer_type(second));
        if let (Some(a), Some(b)) = types {
            if a != b {
                self.expression_error(
                    format!("swap needs arguments of the same type, got {a} and {b}"),
                    &call.position,
                );
            }
        }

        for arg in [first, second] {
            let constant = match arg {
                Expression::Literal(_) => true,
                Expression::Identifier(ident) => self
                    .namespace
                    .resolve_variable(&ident.name, &self.scope)
                    .is_some_and(|v| v.decl_type == VarDeclType::Const),
                _ => false,
            };

            if constant {
                self.expression_error("swap cannot operate on constants", arg.position());
            }
        }
    }

    fn check_subroutine_call(&mut self, symbol: &SubroutineSymbol, call: &FunctionCall) {
        if call.args.len() != symbol.parameters.len() {
            self.error(
                format!(
                    "'{}' expects {} argument(s), got {}",
                    call.target.name,
                    symbol.parameters.len(),
                    call.args.len()
                ),
                &call.position,
            );
            return;
        }

        if symbol.is_asm {
            for (arg, spec) in call.args.iter().zip(&symbol.asm_parameter_registers) {
                let Some(datatype) = self.infer_type(arg) else {
                    continue;
                };

                let compatible = match spec {
                    RegisterOrStatusflag::Statusflag(_) => datatype.is_byte(),
                    RegisterOrStatusflag::Register(register) if register.is_pair() => {
                        datatype.is_word() || datatype.is_iterable()
                    }
                    RegisterOrStatusflag::Register(_) => datatype.is_byte(),
                };

                if !compatible {
                    self.expression_error(
                        format!("argument type {datatype} does not fit the register"),
                        arg.position(),
                    );
                }
            }
            return;
        }

        for (arg, parameter) in call.args.iter().zip(&symbol.parameters) {
            self.check_value_against(parameter.datatype, arg, arg.position());
        }
    }

    fn check_assignment(&mut self, assignment: &Assignment) {
        for target in &assignment.targets {
            self.check_assign_target_shape(target);
        }

        if assignment.targets.len() > 1 {
            self.check_multi_assignment(assignment);
            return;
        }

        let Some(target) = assignment.targets.first() else {
            return;
        };

        let target_type = self.target_datatype(target);

        // an augmented assignment checks as its desugared form
        if let Some(operator) = assignment.aug_op {
            let virtual_value = Expression::Binary {
                left: Box::new(target.to_expression()),
                operator,
                right: Box::new(assignment.value.clone()),
                position: assignment.position.clone(),
            };
            self.check_binary_operands(&virtual_value);

            if let Some(target_type) = target_type {
                if !target_type.is_numeric() {
                    self.expression_error(
                        format!("cannot use augmented assignment on {target_type}"),
                        &assignment.position,
                    );
                }
            }
            return;
        }

        if let Some(target_type) = target_type {
            self.check_value_against(target_type, &assignment.value, &assignment.position);
        }
    }

    fn check_assign_target_shape(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Identifier(ident) => {
                match self.namespace.resolve(&ident.name, &self.scope) {
                    None => self.name_error(
                        format!("undefined symbol '{}'", ident.name),
                        &ident.position,
                    ),
                    Some((_, SymbolEntry::Variable(symbol))) => {
                        if symbol.decl_type == VarDeclType::Const {
                            self.error(
                                format!("cannot assign to constant '{}'", ident.name),
                                &ident.position,
                            );
                        }
                    }
                    Some(_) => self.error(
                        format!("cannot assign to '{}'", ident.name),
                        &ident.position,
                    ),
                }
            }
            AssignTarget::ArrayIndexed(indexed) => {
                self.check_indexing(&indexed.identifier, &indexed.index, &indexed.position);
            }
            AssignTarget::Register { .. } | AssignTarget::MemoryAddress { .. } => {}
        }
    }

    fn check_multi_assignment(&mut self, assignment: &Assignment) {
        let Expression::FunctionCall(call) = &assignment.value else {
            self.error(
                "multiple assignment targets need an asm subroutine call",
                &assignment.position,
            );
            return;
        };

        let Some(symbol) = self
            .namespace
            .resolve_subroutine(&call.target.name, &self.scope)
            .cloned()
        else {
            self.error(
                "multiple assignment targets need an asm subroutine call",
                &assignment.position,
            );
            return;
        };

        if !symbol.is_asm {
            self.error(
                "multiple assignment targets need an asm subroutine call",
                &assignment.position,
            );
            return;
        }

        if symbol.return_types.len() != assignment.targets.len() {
            self.error(
                format!(
                    "'{}' returns {} value(s) but there are {} assignment targets",
                    call.target.name,
                    symbol.return_types.len(),
                    assignment.targets.len()
                ),
                &assignment.position,
            );
            return;
        }

        for (target, datatype) in assignment.targets.iter().zip(&symbol.return_types) {
            if let Some(target_type) = self.target_datatype(target) {
                if !target_type.assignable_from(*datatype) {
                    self.expression_error(
                        format!("cannot assign {datatype} to {target_type}"),
                        target.position(),
                    );
                }
            }
        }
    }

    fn target_datatype(&self, target: &AssignTarget) -> Option<DataType> {
        match target {
            AssignTarget::Register { register, .. } => Some(if register.is_pair() {
                DataType::UWord
            } else {
                DataType::UByte
            }),
            AssignTarget::Identifier(ident) => self
                .namespace
                .resolve_variable(&ident.name, &self.scope)
                .map(|v| v.datatype),
            AssignTarget::ArrayIndexed(indexed) => self
                .namespace
                .resolve_variable(&indexed.identifier.name, &self.scope)
                .and_then(|v| v.datatype.element_type()),
            AssignTarget::MemoryAddress { .. } => Some(DataType::UByte),
        }
    }

    fn check_indexing(
        &mut self,
        identifier: &crate::ast::Identifier,
        index: &Expression,
        position: &crate::ast::Position,
    ) {
        let Some(symbol) = self.namespace.resolve_variable(&identifier.name, &self.scope) else {
            self.name_error(
                format!("undefined symbol '{}'", identifier.name),
                position,
            );
            return;
        };

        if !symbol.datatype.is_iterable() {
            self.expression_error(
                format!("cannot index into {}", symbol.datatype),
                position,
            );
            return;
        }

        let length = symbol.length;

        if let Some(literal) = self.constant_of(index) {
            match literal.as_integer() {
                Some(value) if value < 0 => {
                    self.expression_error("index out of bounds", position)
                }
                Some(value) => {
                    if let Some(length) = length {
                        if value as usize >= length {
                            self.expression_error("index out of bounds", position);
                        }
                    }
                }
                None => self.expression_error("index must be an integer", position),
            }
        } else if let Some(index_type) = self.infer_type(index) {
            if !index_type.is_byte() {
                self.expression_error(
                    format!("index must be a byte value, not {index_type}"),
                    position,
                );
            }
        }
    }

    fn check_binary_operands(&mut self, expression: &Expression) {
        let Expression::Binary {
            left,
            operator,
            right,
            position,
        } = expression
        else {
            return;
        };

        use crate::ast::BinaryOperator::*;

        let left_type = self.infer_type(left);
        let right_type = self.infer_type(right);

        match operator {
            Divide | Remainder => {
                if let Some(divisor) = self.constant_of(right) {
                    if divisor.as_number() == Some(0.0) {
                        self.expression_error("division by zero", position);
                    }
                }

                if *operator == Remainder {
                    for datatype in [left_type, right_type].into_iter().flatten() {
                        if !datatype.is_integer() || datatype.is_signed() {
                            self.expression_error(
                                "remainder needs unsigned integer operands",
                                position,
                            );
                            break;
                        }
                    }
                }
            }
            Power => {
                let has_float = left_type == Some(DataType::Float)
                    || right_type == Some(DataType::Float);
                if left_type.is_some() && right_type.is_some() && !has_float {
                    self.expression_error(
                        "exponentiation needs at least one float operand",
                        position,
                    );
                }
            }
            LogicalAnd | LogicalOr | LogicalXor => {
                for datatype in [left_type, right_type].into_iter().flatten() {
                    if !datatype.is_integer() {
                        self.expression_error(
                            format!("operator {operator} needs integer operands"),
                            position,
                        );
                        break;
                    }
                }

                for operand in [left, right] {
                    if let Some(literal) = operand.as_literal() {
                        if !matches!(literal.as_integer(), Some(0) | Some(1)) {
                            self.diagnostics.warn(
                                format!("operand of {operator} is not 0 or 1"),
                                operand.position(),
                            );
                        }
                    }
                }
            }
            BitAnd | BitOr | BitXor | ShiftLeft | ShiftRight => {
                for datatype in [left_type, right_type].into_iter().flatten() {
                    if !datatype.is_integer() {
                        self.expression_error(
                            format!("operator {operator} needs integer operands"),
                            position,
                        );
                        break;
                    }
                }
            }
            Equal | NotEqual => {
                // strings and arrays may be compared for equality; mixed
                // iterable/numeric comparisons make no sense
                if let (Some(a), Some(b)) = (left_type, right_type) {
                    if a.is_iterable() != b.is_iterable() {
                        self.expression_error(
                            format!("cannot compare {a} and {b}"),
                            position,
                        );
                    }
                }
            }
            _ => {
                for datatype in [left_type, right_type].into_iter().flatten() {
                    if !datatype.is_numeric() {
                        self.expression_error(
                            format!("operator {operator} needs numeric operands"),
                            position,
                        );
                        break;
                    }
                }
            }
        }
    }

    fn check_for_loop(&mut self, for_loop: &ForLoop) {
        if for_loop.body.is_empty() {
            self.diagnostics.warn("empty loop body", &for_loop.position);
        }

        let element_type = match &for_loop.iterable {
            Expression::Range { from, to, step, .. } => {
                self.check_range(from, to, step.as_deref(), &for_loop.position);
                // both endpoints matter: 1 to 1000 iterates word values
                match (self.infer_type(from), self.infer_type(to)) {
                    (Some(a), Some(b)) => Some(promoted_type(a, b)),
                    (a, b) => a.or(b),
                }
            }
            Expression::Identifier(ident) => {
                match self.namespace.resolve_variable(&ident.name, &self.scope) {
                    Some(symbol) if symbol.datatype.is_iterable() => {
                        symbol.datatype.element_type()
                    }
                    Some(symbol) => {
                        self.expression_error(
                            format!("cannot loop over {}", symbol.datatype),
                            &for_loop.position,
                        );
                        None
                    }
                    None => {
                        self.name_error(
                            format!("undefined symbol '{}'", ident.name),
                            &ident.position,
                        );
                        None
                    }
                }
            }
            Expression::Literal(literal) if literal.datatype.is_iterable() => {
                literal.datatype.element_type()
            }
            other => {
                self.expression_error("cannot loop over this expression", other.position());
                None
            }
        };

        let loop_type = if let Some(register) = for_loop.loop_register {
            Some(if register.is_pair() {
                DataType::UWord
            } else {
                DataType::UByte
            })
        } else if let Some(datatype) = for_loop.decl_datatype {
            Some(datatype)
        } else if let Some(loop_var) = &for_loop.loop_var {
            match self.namespace.resolve_variable(&loop_var.name, &self.scope) {
                Some(symbol) => Some(symbol.datatype),
                None => {
                    self.name_error(
                        format!("undefined symbol '{}'", loop_var.name),
                        &loop_var.position,
                    );
                    None
                }
            }
        } else {
            self.error("for loop needs a loop variable or register", &for_loop.position);
            None
        };

        if let (Some(loop_type), Some(element_type)) = (loop_type, element_type) {
            if !loop_variable_admits(loop_type, element_type) {
                self.expression_error(
                    format!("loop variable of type {loop_type} cannot hold {element_type} values"),
                    &for_loop.position,
                );
            }
        }
    }

    fn check_range(
        &mut self,
        from: &Expression,
        to: &Expression,
        step: Option<&Expression>,
        position: &crate::ast::Position,
    ) {
        let from_value = self.constant_of(from);
        let to_value = self.constant_of(to);

        if from_value.is_none() || to_value.is_none() {
            self.expression_error("range endpoints must be constant", position);
            return;
        }

        let (from_value, to_value) = (from_value.unwrap(), to_value.unwrap());

        for endpoint in [&from_value, &to_value] {
            if endpoint.datatype.is_string() {
                let single = endpoint
                    .heap_id()
                    .and_then(|id| self.heap.str_value(id))
                    .is_some_and(|s| s.chars().count() == 1);
                if !single {
                    self.expression_error(
                        "string range endpoints must be single characters",
                        position,
                    );
                    return;
                }
            }
        }

        let step_value = match step {
            None => 1,
            Some(step) => match self.constant_of(step).and_then(|s| s.as_integer()) {
                Some(0) => {
                    self.expression_error("range step cannot be zero", position);
                    return;
                }
                Some(v) => v,
                None => {
                    self.expression_error("range step must be a constant integer", position);
                    return;
                }
            },
        };

        if let (Some(a), Some(b)) = (from_value.as_number(), to_value.as_number()) {
            if b > a && step_value < 0 {
                self.expression_error("ascending range requires a positive step", position);
            }
            if b < a && step_value > 0 {
                self.expression_error("descending range requires a negative step", position);
            }
        }
    }

    fn check_post_incr_decr(&mut self, incr_decr: &PostIncrDecr) {
        match &incr_decr.target {
            AssignTarget::Register { .. } | AssignTarget::MemoryAddress { .. } => {}
            AssignTarget::Identifier(ident) => {
                match self.namespace.resolve_variable(&ident.name, &self.scope) {
                    Some(symbol) if symbol.datatype.is_numeric() => {
                        if symbol.decl_type == VarDeclType::Const {
                            self.error(
                                format!("cannot modify constant '{}'", ident.name),
                                &incr_decr.position,
                            );
                        }
                    }
                    Some(symbol) => self.expression_error(
                        format!("cannot increment or decrement {}", symbol.datatype),
                        &incr_decr.position,
                    ),
                    None => self.name_error(
                        format!("undefined symbol '{}'", ident.name),
                        &incr_decr.position,
                    ),
                }
            }
            AssignTarget::ArrayIndexed(indexed) => {
                let element = self
                    .namespace
                    .resolve_variable(&indexed.identifier.name, &self.scope)
                    .and_then(|v| v.datatype.element_type());

                if element.is_some_and(|dt| !dt.is_numeric()) {
                    self.expression_error(
                        "cannot increment or decrement this element",
                        &incr_decr.position,
                    );
                }
            }
        }
    }

    fn check_directive(&mut self, directive: &Directive) {
        match directive.name.as_str() {
            "%output" => self.check_enum_directive_arg::<OutputType>(directive),
            "%launcher" => self.check_enum_directive_arg::<LauncherType>(directive),
            "%zeropage" => self.check_enum_directive_arg::<ZeropageType>(directive),
            "%address" => {
                let valid = matches!(
                    directive.args.as_slice(),
                    [DirectiveArg::Int(address)] if (0..=65535).contains(address)
                );
                if !valid {
                    self.error(
                        "%address needs an integer address argument",
                        &directive.position,
                    );
                }
            }
            "%zpreserved" => {
                let valid = matches!(
                    directive.args.as_slice(),
                    [DirectiveArg::Int(from), DirectiveArg::Int(to)]
                        if (0..=255).contains(from) && (0..=255).contains(to)
                );
                if !valid {
                    self.error(
                        "%zpreserved needs two integer addresses",
                        &directive.position,
                    );
                }
            }
            "%import" => match directive.args.as_slice() {
                [DirectiveArg::Name(name)] | [DirectiveArg::Str(name)] => {
                    if *name == self.module_name {
                        self.error("module cannot import itself", &directive.position);
                    }
                }
                _ => self.error("%import needs a module name", &directive.position),
            },
            "%asminclude" | "%asmbinary" => match directive.args.first() {
                Some(DirectiveArg::Str(filename)) => {
                    if !asm_file_exists(filename, &directive.position.file) {
                        self.error(
                            format!("included file not found: {filename}"),
                            &directive.position,
                        );
                    }
                }
                _ => self.error(
                    format!("{} needs a file name argument", directive.name),
                    &directive.position,
                ),
            },
            "%option" | "%breakpoint" | "%asm" => {}
            other => self.error(format!("invalid directive {other}"), &directive.position),
        }
    }

    fn check_enum_directive_arg<T: std::str::FromStr + strum::IntoEnumIterator + core::fmt::Display>(
        &mut self,
        directive: &Directive,
    ) {
        let valid = matches!(
            directive.args.as_slice(),
            [DirectiveArg::Name(name)] if name.parse::<T>().is_ok()
        );

        if !valid {
            let choices = T::iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            self.error(
                format!("{} needs one of: {choices}", directive.name),
                &directive.position,
            );
        }
    }

    fn check_expression(&mut self, expression: &Expression) {
        match expression {
            Expression::Identifier(ident) => {
                if self.namespace.resolve(&ident.name, &self.scope).is_none() {
                    self.name_error(
                        format!("undefined symbol '{}'", ident.name),
                        &ident.position,
                    );
                }
            }
            Expression::Binary { .. } => self.check_binary_operands(expression),
            Expression::FunctionCall(call) => self.check_call(call, false),
            Expression::ArrayIndexed(indexed) => {
                self.check_indexing(&indexed.identifier, &indexed.index, &indexed.position)
            }
            Expression::Typecast { datatype, position, .. } => {
                if datatype.is_iterable() {
                    self.expression_error(
                        format!("cannot cast to {datatype}"),
                        position,
                    );
                }
                self.require_float_enabled(*datatype, position);
            }
            Expression::AddressOf(addr) => {
                if self
                    .namespace
                    .resolve(&addr.identifier.name, &self.scope)
                    .is_none()
                {
                    self.name_error(
                        format!("undefined symbol '{}'", addr.identifier.name),
                        &addr.position,
                    );
                }
            }
            Expression::Literal(literal) => {
                self.require_float_enabled(literal.datatype, &literal.position);
            }
            _ => {}
        }
    }
}

impl Visitor for Checker<'_> {
    fn visit_block(&mut self, block: &Block) {
        self.scope.push(&block.name);

        let saved = (self.labels_allowed, self.subroutines_allowed, self.in_block_body);
        self.labels_allowed = true;
        self.subroutines_allowed = true;
        self.in_block_body = true;

        for statement in &block.statements {
            if self.in_block_body && !allowed_in_block(statement) {
                self.error(
                    "only declarations, directives, labels, subroutines, inline assembly \
                     and initialization assignments are allowed directly in a block",
                    statement.position(),
                );
            }

            self.visit_statement(statement);
        }

        (self.labels_allowed, self.subroutines_allowed, self.in_block_body) = saved;
        self.scope.pop();
    }

    fn visit_subroutine(&mut self, sub: &Subroutine) {
        if !self.subroutines_allowed {
            self.error(
                "subroutines can only be defined in a block or another subroutine",
                &sub.position,
            );
        }

        self.check_subroutine_signature(sub);

        self.scope.push(&sub.name);
        let saved = (self.labels_allowed, self.subroutines_allowed, self.in_block_body);
        self.labels_allowed = true;
        self.subroutines_allowed = true;
        self.in_block_body = false;

        let symbol = self
            .namespace
            .resolve_subroutine(&sub.name, &self.scope)
            .cloned()
            .unwrap_or_else(|| SubroutineSymbol {
                parameters: sub.parameters.clone(),
                return_types: sub.return_types.clone(),
                is_asm: sub.is_asm,
                asm_address: sub.asm_address,
                asm_parameter_registers: sub.asm_parameter_registers.clone(),
                asm_return_registers: sub.asm_return_registers.clone(),
                asm_clobbers: sub.asm_clobbers.clone(),
                jump_redirect: None,
                is_trivial: false,
                position: sub.position.clone(),
            });
        let previous = self.current_subroutine.replace(symbol);

        visit::walk_subroutine(self, sub);

        self.current_subroutine = previous;
        (self.labels_allowed, self.subroutines_allowed, self.in_block_body) = saved;
        self.scope.pop();
    }

    fn visit_var_decl(&mut self, decl: &VarDecl) {
        self.check_var_decl(decl);
        visit::walk_var_decl(self, decl);
    }

    fn visit_directive(&mut self, directive: &Directive) {
        self.check_directive(directive);
    }

    fn visit_label(&mut self, label: &Label) {
        if !self.labels_allowed {
            self.error(
                "labels can only appear in a block, subroutine or anonymous scope",
                &label.position,
            );
        }
    }

    fn visit_jump(&mut self, jump: &Jump) {
        let JumpTarget::Identifier(name) = &jump.target else {
            return;
        };

        match self.namespace.resolve(name, &self.scope) {
            None => self.name_error(format!("undefined symbol '{name}'"), &jump.position),
            Some((_, SymbolEntry::Label { .. } | SymbolEntry::Subroutine(_))) => {}
            Some(_) => self.error(format!("cannot jump to '{name}'"), &jump.position),
        }
    }

    fn visit_return(&mut self, ret: &Return) {
        let return_types = self
            .current_subroutine
            .as_ref()
            .map(|s| s.return_types.clone())
            .unwrap_or_default();

        if ret.values.len() != return_types.len() {
            self.error(
                format!(
                    "expected {} return value(s), got {}",
                    return_types.len(),
                    ret.values.len()
                ),
                &ret.position,
            );
        } else if let ([value], [datatype]) = (ret.values.as_slice(), return_types.as_slice()) {
            // a call's result type is the callee's concern
            if !matches!(value, Expression::FunctionCall(_)) {
                self.check_value_against(*datatype, value, &ret.position);
            }
        }

        visit::walk_return(self, ret);
    }

    fn visit_if(&mut self, if_stmt: &IfStatement) {
        let saved = (self.labels_allowed, self.subroutines_allowed);
        self.labels_allowed = false;
        self.subroutines_allowed = false;
        visit::walk_if(self, if_stmt);
        (self.labels_allowed, self.subroutines_allowed) = saved;
    }

    fn visit_for(&mut self, for_loop: &ForLoop) {
        self.check_for_loop(for_loop);

        let saved = (self.labels_allowed, self.subroutines_allowed);
        self.labels_allowed = false;
        self.subroutines_allowed = false;
        visit::walk_for(self, for_loop);
        (self.labels_allowed, self.subroutines_allowed) = saved;
    }

    fn visit_while(&mut self, while_loop: &WhileLoop) {
        let saved = (self.labels_allowed, self.subroutines_allowed);
        self.labels_allowed = false;
        self.subroutines_allowed = false;
        visit::walk_while(self, while_loop);
        (self.labels_allowed, self.subroutines_allowed) = saved;
    }

    fn visit_repeat(&mut self, repeat_loop: &RepeatLoop) {
        let saved = (self.labels_allowed, self.subroutines_allowed);
        self.labels_allowed = false;
        self.subroutines_allowed = false;
        visit::walk_repeat(self, repeat_loop);
        (self.labels_allowed, self.subroutines_allowed) = saved;
    }

    fn visit_assignment(&mut self, assignment: &Assignment) {
        self.check_assignment(assignment);
        visit::walk_assignment(self, assignment);
    }

    fn visit_post_incr_decr(&mut self, incr_decr: &PostIncrDecr) {
        self.check_post_incr_decr(incr_decr);
        visit::walk_post_incr_decr(self, incr_decr);
    }

    fn visit_function_call_statement(&mut self, call: &FunctionCallStatement) {
        self.check_call(&call.call, true);
        visit::walk_function_call_statement(self, call);
    }

    fn visit_inline_assembly(&mut self, _asm: &InlineAssembly) {}

    fn visit_expression(&mut self, expression: &Expression) {
        self.check_expression(expression);

        if let Expression::Range { from, to, step, position } = expression {
            self.check_range(from, to, step.as_deref(), position);
        }

        visit::walk_expression(self, expression);
    }
}

fn allowed_in_block(statement: &Statement) -> bool {
    match statement {
        Statement::VarDecl(_)
        | Statement::Directive(_)
        | Statement::Label(_)
        | Statement::Subroutine(_)
        | Statement::InlineAssembly(_)
        | Statement::AnonymousScope(_)
        | Statement::Nop { .. }
        | Statement::BuiltinPlaceholder { .. } => true,
        // variable initialization assignments are fine at block level
        Statement::Assignment(assignment) => assignment.aug_op.is_none(),
        _ => false,
    }
}

/// A fixed compatibility table: which element types a loop variable of
/// the given type can iterate over.
fn loop_variable_admits(loop_type: DataType, element: DataType) -> bool {
    match loop_type {
        DataType::UByte => element == DataType::UByte,
        DataType::Byte => element == DataType::Byte,
        DataType::UWord => matches!(element, DataType::UByte | DataType::UWord),
        DataType::Word => matches!(element, DataType::Byte | DataType::UByte | DataType::Word),
        DataType::Float => element.is_numeric(),
        _ => false,
    }
}

fn subroutine_can_return(sub: &Subroutine) -> bool {
    fn scan(statements: &[Statement]) -> bool {
        statements.iter().any(|statement| match statement {
            Statement::Return(_) | Statement::Jump(_) => true,
            Statement::InlineAssembly(asm) => {
                asm.assembly.contains("rts") || asm.assembly.contains("jmp")
            }
            Statement::AnonymousScope(anon) => scan(&anon.statements),
            Statement::If(if_stmt) => scan(&if_stmt.truepart) || scan(&if_stmt.elsepart),
            Statement::For(for_loop) => scan(&for_loop.body),
            Statement::While(while_loop) => scan(&while_loop.body),
            Statement::Repeat(repeat_loop) => scan(&repeat_loop.body),
            _ => false,
        })
    }

    scan(&sub.statements)
}

fn expression_mentions(expression: &Expression, name: &str) -> bool {
    fn matches_name(candidate: &str, name: &str) -> bool {
        candidate == name || candidate.rsplit('.').next() == Some(name)
    }

    match expression {
        Expression::Identifier(ident) => matches_name(&ident.name, name),
        Expression::ArrayIndexed(indexed) => {
            matches_name(&indexed.identifier.name, name)
                || expression_mentions(&indexed.index, name)
        }
        Expression::AddressOf(addr) => matches_name(&addr.identifier.name, name),
        Expression::Prefix { expression, .. } => expression_mentions(expression, name),
        Expression::Binary { left, right, .. } => {
            expression_mentions(left, name) || expression_mentions(right, name)
        }
        Expression::FunctionCall(call) => {
            call.args.iter().any(|a| expression_mentions(a, name))
        }
        Expression::Typecast { expression, .. } => expression_mentions(expression, name),
        Expression::Range { from, to, step, .. } => {
            expression_mentions(from, name)
                || expression_mentions(to, name)
                || step.as_ref().is_some_and(|s| expression_mentions(s, name))
        }
        Expression::DirectMemoryRead { address, .. } => expression_mentions(address, name),
        Expression::Literal(_) | Expression::Register { .. } => false,
    }
}

fn asm_file_exists(filename: &str, module_file: &str) -> bool {
    if let Some(library_name) = filename.strip_prefix("library:") {
        return !library_name.is_empty();
    }

    let base = std::path::Path::new(module_file)
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."));

    base.join(filename).exists()
}

/// Static type of an expression, when determinable without evaluation.
pub fn infer_type(
    expression: &Expression,
    namespace: &Namespace,
    scope: &ScopePath,
) -> Option<DataType> {
    use crate::ast::BinaryOperatorClass;

    match expression {
        Expression::Literal(literal) => Some(literal.datatype),
        Expression::Identifier(ident) => {
            namespace.resolve_variable(&ident.name, scope).map(|v| v.datatype)
        }
        Expression::Register { register, .. } => Some(if register.is_pair() {
            DataType::UWord
        } else {
            DataType::UByte
        }),
        Expression::Prefix { operator, expression, .. } => match operator {
            crate::ast::PrefixOperator::Not => Some(DataType::UByte),
            _ => infer_type(expression, namespace, scope),
        },
        Expression::Binary { left, operator, right, .. } => match operator.class() {
            BinaryOperatorClass::Comparison | BinaryOperatorClass::Logical => {
                Some(DataType::UByte)
            }
            BinaryOperatorClass::Bitwise => infer_type(left, namespace, scope),
            BinaryOperatorClass::Arithmetic => {
                let a = infer_type(left, namespace, scope)?;
                let b = infer_type(right, namespace, scope)?;
                Some(promoted_type(a, b))
            }
        },
        Expression::FunctionCall(call) => {
            match namespace.resolve(&call.target.name, scope) {
                Some((_, SymbolEntry::Builtin { name })) => builtins::builtin_return_type(name),
                Some((_, SymbolEntry::Subroutine(_))) => namespace
                    .resolve_subroutine(&call.target.name, scope)
                    .and_then(|s| match s.return_types.as_slice() {
                        [single] => Some(*single),
                        _ => None,
                    }),
                _ => None,
            }
        }
        Expression::ArrayIndexed(indexed) => namespace
            .resolve_variable(&indexed.identifier.name, scope)
            .and_then(|v| v.datatype.element_type()),
        Expression::AddressOf(_) => Some(DataType::UWord),
        Expression::Typecast { datatype, .. } => Some(*datatype),
        Expression::DirectMemoryRead { .. } => Some(DataType::UByte),
        Expression::Range { .. } => None,
    }
}

fn promoted_type(a: DataType, b: DataType) -> DataType {
    if a == DataType::Float || b == DataType::Float {
        return DataType::Float;
    }

    let signed = a.is_signed() || b.is_signed();
    let word = a.is_word() || b.is_word();

    match (word, signed) {
        (false, false) => DataType::UByte,
        (false, true) => DataType::Byte,
        (true, false) => DataType::UWord,
        (true, true) => DataType::Word,
    }
}

fn registers_of(spec: &RegisterOrStatusflag, seen: &mut HashSet<Register>) -> bool {
    match spec {
        RegisterOrStatusflag::Statusflag(_) => true,
        RegisterOrStatusflag::Register(register) => {
            let parts: &[Register] = match register {
                Register::AX => &[Register::A, Register::X],
                Register::AY => &[Register::A, Register::Y],
                Register::XY => &[Register::X, Register::Y],
                single => std::slice::from_ref(single),
            };

            let mut fresh = true;
            for part in parts {
                if !seen.insert(*part) {
                    fresh = false;
                }
            }
            fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Identifier, Position};

    fn pos() -> Position {
        Position::internal()
    }

    fn ub_lit(v: u8) -> Expression {
        Expression::Literal(LiteralValue::byte(DataType::UByte, v, pos()))
    }

    fn simple_sub(name: &str, statements: Vec<Statement>) -> Statement {
        Statement::Subroutine(Subroutine {
            name: name.into(),
            parameters: vec![],
            return_types: vec![],
            statements,
            is_asm: false,
            asm_address: None,
            asm_parameter_registers: vec![],
            asm_return_registers: vec![],
            asm_clobbers: vec![],
            position: pos(),
        })
    }

    fn module_with_start(statements: Vec<Statement>) -> Module {
        let mut block_statements = Vec::new();
        let mut sub_statements = Vec::new();

        for statement in statements {
            match statement {
                Statement::VarDecl(_) => block_statements.push(statement),
                other => sub_statements.push(other),
            }
        }

        block_statements.push(simple_sub("start", sub_statements));

        Module {
            name: "test".into(),
            statements: vec![Statement::Block(Box::new(Block {
                name: "main".into(),
                address: None,
                force_output: false,
                statements: block_statements,
                position: pos(),
            }))],
            position: pos(),
        }
    }

    fn run_check(module: &mut Module) -> Diagnostics {
        let mut heap = HeapValues::default();
        run_check_with_heap(module, &mut heap)
    }

    fn run_check_with_heap(module: &mut Module, heap: &mut HeapValues) -> Diagnostics {
        let namespace = Namespace::build(module, heap);
        let options = CompilerOptions::default();
        let mut diagnostics = Diagnostics::new();
        check_module(module, &namespace, heap, &options, &mut diagnostics);
        diagnostics
    }

    fn var(name: &str, datatype: DataType, value: Option<Expression>) -> Statement {
        Statement::VarDecl(VarDecl {
            decl_type: VarDeclType::Var,
            datatype,
            name: name.into(),
            value,
            array_size: None,
            zeropage: false,
            position: pos(),
        })
    }

    #[test]
    fn minimal_program_is_clean() {
        let mut module = module_with_start(vec![
            var("x", DataType::UByte, Some(ub_lit(1))),
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(Identifier {
                    name: "x".into(),
                    position: pos(),
                })],
                aug_op: None,
                value: ub_lit(2),
                position: pos(),
            }),
        ]);

        let diagnostics = run_check(&mut module);
        assert!(
            !diagnostics.has_errors(),
            "unexpected: {:?}",
            diagnostics.errors()
        );
    }

    #[test]
    fn module_needs_exactly_one_main_with_start() {
        let mut module = Module {
            name: "test".into(),
            statements: vec![],
            position: pos(),
        };

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("'main' block")));

        let mut module = Module {
            name: "test".into(),
            statements: vec![Statement::Block(Box::new(Block {
                name: "main".into(),
                address: None,
                force_output: false,
                statements: vec![],
                position: pos(),
            }))],
            position: pos(),
        };

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("'start' subroutine")));
    }

    #[test]
    fn assigning_to_a_constant_is_an_error() {
        let mut module = module_with_start(vec![
            Statement::VarDecl(VarDecl {
                decl_type: VarDeclType::Const,
                datatype: DataType::UByte,
                name: "limit".into(),
                value: Some(ub_lit(10)),
                array_size: None,
                zeropage: false,
                position: pos(),
            }),
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(Identifier {
                    name: "limit".into(),
                    position: pos(),
                })],
                aug_op: None,
                value: ub_lit(2),
                position: pos(),
            }),
        ]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("cannot assign to constant")));
    }

    #[test]
    fn floats_require_the_option() {
        let mut module = module_with_start(vec![var(
            "f",
            DataType::Float,
            Some(Expression::Literal(LiteralValue::float(1.5, pos()))),
        )]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("enable_floats")));
    }

    #[test]
    fn word_into_byte_target_suggests_msb_lsb() {
        let mut module = module_with_start(vec![
            var("small", DataType::UByte, Some(ub_lit(0))),
            var("wide", DataType::UWord, None),
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(Identifier {
                    name: "small".into(),
                    position: pos(),
                })],
                aug_op: None,
                value: Expression::Identifier(Identifier {
                    name: "wide".into(),
                    position: pos(),
                }),
                position: pos(),
            }),
        ]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("msb() or lsb()")));
    }

    #[test]
    fn uninitialized_vars_get_default_initializers() {
        let mut module = module_with_start(vec![
            var("x", DataType::UByte, None),
            var("s", DataType::Str, None),
        ]);

        let mut heap = HeapValues::default();
        run_check_with_heap(&mut module, &mut heap);

        let block = module.blocks().next().unwrap();
        let Statement::VarDecl(x_decl) = &block.statements[0] else {
            panic!("expected decl");
        };
        assert_eq!(
            x_decl.value.as_ref().unwrap().as_literal().unwrap().as_integer(),
            Some(0)
        );

        let Statement::VarDecl(s_decl) = &block.statements[1] else {
            panic!("expected decl");
        };
        let id = s_decl
            .value
            .as_ref()
            .unwrap()
            .as_literal()
            .unwrap()
            .heap_id()
            .unwrap();
        assert_eq!(heap.str_value(id), Some(""));
    }

    #[test]
    fn constant_zero_divisor_is_reported() {
        let mut module = module_with_start(vec![
            var("x", DataType::UByte, None),
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(Identifier {
                    name: "x".into(),
                    position: pos(),
                })],
                aug_op: None,
                value: Expression::Binary {
                    left: Box::new(Expression::Identifier(Identifier {
                        name: "x".into(),
                        position: pos(),
                    })),
                    operator: crate::ast::BinaryOperator::Divide,
                    right: Box::new(ub_lit(0)),
                    position: pos(),
                },
                position: pos(),
            }),
        ]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("division by zero")));
    }

    #[test]
    fn remainder_rejects_signed_operands() {
        let mut module = module_with_start(vec![
            var("x", DataType::Byte, None),
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::Identifier(Identifier {
                    name: "x".into(),
                    position: pos(),
                })],
                aug_op: None,
                value: Expression::Binary {
                    left: Box::new(Expression::Identifier(Identifier {
                        name: "x".into(),
                        position: pos(),
                    })),
                    operator: crate::ast::BinaryOperator::Remainder,
                    right: Box::new(ub_lit(3)),
                    position: pos(),
                },
                position: pos(),
            }),
        ]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("unsigned integer operands")));
    }

    #[test]
    fn constant_index_bounds_are_enforced() {
        let mut heap = HeapValues::default();
        let id = heap.add_array(
            DataType::ArrayUb,
            vec![
                crate::value::heap::ArrayCell::Int(1),
                crate::value::heap::ArrayCell::Int(2),
            ],
        );

        let mut module = module_with_start(vec![
            Statement::VarDecl(VarDecl {
                decl_type: VarDeclType::Var,
                datatype: DataType::ArrayUb,
                name: "arr".into(),
                value: Some(Expression::Literal(LiteralValue::heap(
                    DataType::ArrayUb,
                    id,
                    pos(),
                ))),
                array_size: None,
                zeropage: false,
                position: pos(),
            }),
            Statement::Assignment(Assignment {
                targets: vec![AssignTarget::ArrayIndexed(crate::ast::ArrayIndexed {
                    identifier: Identifier {
                        name: "arr".into(),
                        position: pos(),
                    },
                    index: Box::new(ub_lit(5)),
                    position: pos(),
                })],
                aug_op: None,
                value: ub_lit(0),
                position: pos(),
            }),
        ]);

        let diagnostics = run_check_with_heap(&mut module, &mut heap);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("index out of bounds")));
    }

    #[test]
    fn labels_are_rejected_inside_loop_bodies() {
        let mut module = module_with_start(vec![Statement::While(WhileLoop {
            condition: Expression::Identifier(Identifier {
                name: "x".into(),
                position: pos(),
            }),
            body: vec![Statement::Label(crate::ast::Label {
                name: "inside".into(),
                position: pos(),
            })],
            position: pos(),
        })]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("labels can only appear")));
    }

    #[test]
    fn directive_arguments_are_validated() {
        let mut module = module_with_start(vec![]);
        module.statements.insert(
            0,
            Statement::Directive(Directive {
                name: "%output".into(),
                args: vec![DirectiveArg::Name("floppy".into())],
                position: pos(),
            }),
        );

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("%output needs one of")));
    }

    #[test]
    fn duplicate_singleton_directives_are_reported() {
        let mut module = module_with_start(vec![]);
        for _ in 0..2 {
            module.statements.insert(
                0,
                Statement::Directive(Directive {
                    name: "%zeropage".into(),
                    args: vec![DirectiveArg::Name("full".into())],
                    position: pos(),
                }),
            );
        }

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("can occur only once")));
    }

    #[test]
    fn asm_subroutine_register_conflicts_are_reported() {
        let mut module = module_with_start(vec![]);
        if let Statement::Block(block) = &mut module.statements[0] {
            block.statements.push(Statement::Subroutine(Subroutine {
                name: "routine".into(),
                parameters: vec![
                    crate::ast::SubroutineParameter {
                        name: "a".into(),
                        datatype: DataType::UByte,
                    },
                    crate::ast::SubroutineParameter {
                        name: "b".into(),
                        datatype: DataType::UByte,
                    },
                ],
                return_types: vec![],
                statements: vec![],
                is_asm: true,
                asm_address: Some(0xffd2),
                asm_parameter_registers: vec![
                    RegisterOrStatusflag::Register(Register::A),
                    RegisterOrStatusflag::Register(Register::AX),
                ],
                asm_return_registers: vec![],
                asm_clobbers: vec![],
                position: pos(),
            }));
        }

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("more than one parameter")));
    }

    #[test]
    fn swap_rejects_identical_targets() {
        let mut module = module_with_start(vec![
            var("x", DataType::UByte, None),
            Statement::FunctionCall(FunctionCallStatement {
                call: FunctionCall {
                    target: Identifier {
                        name: "swap".into(),
                        position: pos(),
                    },
                    args: vec![
                        Expression::Identifier(Identifier {
                            name: "x".into(),
                            position: pos(),
                        }),
                        Expression::Identifier(Identifier {
                            name: "x".into(),
                            position: pos(),
                        }),
                    ],
                    position: pos(),
                },
                position: pos(),
            }),
        ]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("two different targets")));
    }

    #[test]
    fn return_arity_is_checked() {
        let mut module = module_with_start(vec![]);
        if let Statement::Block(block) = &mut module.statements[0] {
            block.statements.push(Statement::Subroutine(Subroutine {
                name: "answer".into(),
                parameters: vec![],
                return_types: vec![DataType::UByte],
                statements: vec![Statement::Return(Return {
                    values: vec![],
                    position: pos(),
                })],
                is_asm: false,
                asm_address: None,
                asm_parameter_registers: vec![],
                asm_return_registers: vec![],
                asm_clobbers: vec![],
                position: pos(),
            }));
        }

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("expected 1 return value(s), got 0")));
    }

    #[test]
    fn loop_variable_type_must_admit_elements() {
        let mut module = module_with_start(vec![
            var("i", DataType::UByte, None),
            Statement::For(ForLoop {
                loop_register: None,
                loop_var: Some(Identifier {
                    name: "i".into(),
                    position: pos(),
                }),
                decl_datatype: None,
                iterable: Expression::Range {
                    from: Box::new(ub_lit(1)),
                    to: Box::new(Expression::Literal(LiteralValue::word(
                        DataType::UWord,
                        1000,
                        pos(),
                    ))),
                    step: None,
                    position: pos(),
                },
                body: vec![Statement::Assignment(Assignment {
                    targets: vec![AssignTarget::Identifier(Identifier {
                        name: "i".into(),
                        position: pos(),
                    })],
                    aug_op: None,
                    value: ub_lit(0),
                    position: pos(),
                })],
                position: pos(),
            }),
        ]);

        let diagnostics = run_check(&mut module);
        assert!(diagnostics
            .errors()
            .iter()
            .any(|e| e.message.contains("loop variable")));
    }
}
