//! Symbol table over the module's nested scopes. Scopes form a tree and
//! are keyed by fully-qualified dotted name; lookups walk the lexical
//! parent chain outwards. Built from the AST after parsing and rebuilt at
//! the start of every optimization round so that rewrites which introduce
//! or fold names are re-registered.

use hashbrown::HashMap;

use crate::{
    ast::{
        Block, JumpTarget, Module, Position, Register, RegisterOrStatusflag, Statement, Subroutine,
        SubroutineParameter, VarDecl, VarDeclType,
    },
    builtins,
    value::{heap::HeapValues, DataType, LiteralValue},
};

/// Lexical scope path, outermost first (`["main", "start"]`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopePath(Vec<String>);

impl ScopePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    pub fn entered(&self, segment: &str) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    pub fn qualified(&self, name: &str) -> String {
        if self.0.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.0.join("."), name)
        }
    }

    /// All enclosing scope prefixes, innermost first, ending with the
    /// module root.
    fn chain(&self) -> impl Iterator<Item = &[String]> {
        (0..=self.0.len()).rev().map(|n| &self.0[..n])
    }
}

#[derive(Debug, Clone)]
pub struct VariableSymbol {
    pub decl_type: VarDeclType,
    pub datatype: DataType,
    /// Folded value for CONST declarations, memory address for MEMORY ones
    pub constant_value: Option<LiteralValue>,
    /// Element count for iterable variables, when known
    pub length: Option<usize>,
    pub zeropage: bool,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct SubroutineSymbol {
    pub parameters: Vec<SubroutineParameter>,
    pub return_types: Vec<DataType>,
    pub is_asm: bool,
    pub asm_address: Option<u16>,
    pub asm_parameter_registers: Vec<RegisterOrStatusflag>,
    pub asm_return_registers: Vec<RegisterOrStatusflag>,
    pub asm_clobbers: Vec<Register>,
    /// Set when the subroutine's first executable statement is a plain
    /// jump, resolved to the jump's qualified target. Drives tail-call
    /// threading.
    pub jump_redirect: Option<String>,
    /// An empty body or a lone bare `return`; calls to such subroutines
    /// are dropped along with the subroutine itself.
    pub is_trivial: bool,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub enum SymbolEntry {
    Block {
        position: Position,
    },
    Subroutine(SubroutineSymbol),
    Variable(VariableSymbol),
    Label {
        position: Position,
    },
    Builtin {
        name: &'static str,
    },
}

#[derive(Debug, Default)]
pub struct Namespace {
    symbols: HashMap<String, SymbolEntry>,
    /// Name clashes found while registering, reported by the checker
    pub duplicates: Vec<(String, Position)>,
}

impl Namespace {
    pub fn build(module: &Module, heap: &HeapValues) -> Self {
        let mut namespace = Self::default();

        for builtin in builtins_iter() {
            namespace
                .symbols
                .insert(builtin.to_string(), SymbolEntry::Builtin { name: builtin });
        }

        let root = ScopePath::root();
        for block in module.blocks() {
            namespace.register_block(block, &root, heap);
        }

        namespace.resolve_subroutine_redirects(module);

        namespace
    }

    fn register(&mut self, qualified: String, entry: SymbolEntry, position: &Position) {
        if self.symbols.contains_key(&qualified) {
            self.duplicates.push((qualified, position.clone()));
        } else {
            self.symbols.insert(qualified, entry);
        }
    }

    fn register_block(&mut self, block: &Block, scope: &ScopePath, heap: &HeapValues) {
        self.register(
            scope.qualified(&block.name),
            SymbolEntry::Block {
                position: block.position.clone(),
            },
            &block.position,
        );

        let inner = scope.entered(&block.name);
        self.register_statements(&block.statements, &inner, heap);
    }

    fn register_statements(&mut self, statements: &[Statement], scope: &ScopePath, heap: &HeapValues) {
        for statement in statements {
            match statement {
                Statement::VarDecl(decl) => self.register_var_decl(decl, scope, heap),
                Statement::Subroutine(sub) => self.register_subroutine(sub, scope, heap),
                Statement::Label(label) => self.register(
                    scope.qualified(&label.name),
                    SymbolEntry::Label {
                        position: label.position.clone(),
                    },
                    &label.position,
                ),
                // anonymous scopes are transparent for naming purposes
                Statement::AnonymousScope(anon) => {
                    self.register_statements(&anon.statements, scope, heap)
                }
                Statement::If(if_stmt) => {
                    self.register_statements(&if_stmt.truepart, scope, heap);
                    self.register_statements(&if_stmt.elsepart, scope, heap);
                }
                Statement::For(for_loop) => {
                    if let (Some(datatype), Some(loop_var)) =
                        (for_loop.decl_datatype, &for_loop.loop_var)
                    {
                        let qualified = scope.qualified(&loop_var.name);
                        // a loop-declared variable may shadow a previous
                        // round's registration
                        self.symbols.entry(qualified).or_insert_with(|| {
                            SymbolEntry::Variable(VariableSymbol {
                                decl_type: VarDeclType::Var,
                                datatype,
                                constant_value: None,
                                length: None,
                                zeropage: false,
                                position: loop_var.position.clone(),
                            })
                        });
                    }
                    self.register_statements(&for_loop.body, scope, heap);
                }
                Statement::While(while_loop) => {
                    self.register_statements(&while_loop.body, scope, heap)
                }
                Statement::Repeat(repeat_loop) => {
                    self.register_statements(&repeat_loop.body, scope, heap)
                }
                Statement::BuiltinPlaceholder { .. } => {}
                _ => {}
            }
        }
    }

    fn register_var_decl(&mut self, decl: &VarDecl, scope: &ScopePath, heap: &HeapValues) {
        let constant_value = match decl.decl_type {
            VarDeclType::Const | VarDeclType::Memory => decl
                .value
                .as_ref()
                .and_then(|v| v.as_literal())
                .cloned(),
            VarDeclType::Var => None,
        };

        let length = if decl.datatype.is_iterable() {
            decl.value
                .as_ref()
                .and_then(|v| v.as_literal())
                .and_then(|lit| lit.heap_id())
                .map(|id| heap.length_of(id))
                .or_else(|| {
                    decl.array_size
                        .as_ref()
                        .and_then(|size| size.as_literal())
                        .and_then(|lit| lit.as_integer())
                        .map(|n| n as usize)
                })
        } else {
            None
        };

        self.register(
            scope.qualified(&decl.name),
            SymbolEntry::Variable(VariableSymbol {
                decl_type: decl.decl_type,
                datatype: decl.datatype,
                constant_value,
                length,
                zeropage: decl.zeropage,
                position: decl.position.clone(),
            }),
            &decl.position,
        );
    }

    fn register_subroutine(&mut self, sub: &Subroutine, scope: &ScopePath, heap: &HeapValues) {
        let is_trivial = !sub.is_asm
            && sub.asm_address.is_none()
            && (sub.statements.is_empty()
                || (sub.statements.len() == 1
                    && matches!(&sub.statements[0], Statement::Return(ret) if ret.values.is_empty())));

        self.register(
            scope.qualified(&sub.name),
            SymbolEntry::Subroutine(SubroutineSymbol {
                parameters: sub.parameters.clone(),
                return_types: sub.return_types.clone(),
                is_asm: sub.is_asm,
                asm_address: sub.asm_address,
                asm_parameter_registers: sub.asm_parameter_registers.clone(),
                asm_return_registers: sub.asm_return_registers.clone(),
                asm_clobbers: sub.asm_clobbers.clone(),
                jump_redirect: None,
                is_trivial,
                position: sub.position.clone(),
            }),
            &sub.position,
        );

        let inner = scope.entered(&sub.name);

        for parameter in &sub.parameters {
            self.register(
                inner.qualified(&parameter.name),
                SymbolEntry::Variable(VariableSymbol {
                    decl_type: VarDeclType::Var,
                    datatype: parameter.datatype,
                    constant_value: None,
                    length: None,
                    zeropage: false,
                    position: sub.position.clone(),
                }),
                &sub.position,
            );
        }

        self.register_statements(&sub.statements, &inner, heap);
    }

    /// Second phase: for every subroutine whose first executable statement
    /// is a plain jump to an identifier, resolve that target now that all
    /// names are registered.
    fn resolve_subroutine_redirects(&mut self, module: &Module) {
        let mut redirects = Vec::new();

        for block in module.blocks() {
            let scope = ScopePath::root().entered(&block.name);
            collect_redirects(&block.statements, &scope, &mut redirects);
        }

        for (qualified, target_name, sub_scope) in redirects {
            let Some((target_qualified, _)) = self.resolve(&target_name, &sub_scope) else {
                continue;
            };

            if let Some(SymbolEntry::Subroutine(symbol)) = self.symbols.get_mut(&qualified) {
                symbol.jump_redirect = Some(target_qualified);
            }
        }
    }

    pub fn get(&self, qualified: &str) -> Option<&SymbolEntry> {
        self.symbols.get(qualified)
    }

    /// Resolves `name` (possibly dotted) from `scope`, walking the lexical
    /// chain outwards. Returns the fully-qualified name and its entry.
    pub fn resolve(&self, name: &str, scope: &ScopePath) -> Option<(String, &SymbolEntry)> {
        for prefix in scope.chain() {
            let candidate = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix.join("."), name)
            };

            if let Some(entry) = self.symbols.get(&candidate) {
                return Some((candidate, entry));
            }
        }

        None
    }

    pub fn resolve_variable(&self, name: &str, scope: &ScopePath) -> Option<&VariableSymbol> {
        match self.resolve(name, scope) {
            Some((_, SymbolEntry::Variable(symbol))) => Some(symbol),
            _ => None,
        }
    }

    pub fn resolve_subroutine(&self, name: &str, scope: &ScopePath) -> Option<&SubroutineSymbol> {
        match self.resolve(name, scope) {
            Some((_, SymbolEntry::Subroutine(symbol))) => Some(symbol),
            _ => None,
        }
    }

    /// The folded constant value of a CONST declaration, if `name` refers
    /// to one.
    pub fn constant_value(&self, name: &str, scope: &ScopePath) -> Option<&LiteralValue> {
        match self.resolve_variable(name, scope) {
            Some(symbol) if symbol.decl_type == VarDeclType::Const => {
                symbol.constant_value.as_ref()
            }
            _ => None,
        }
    }
}

fn collect_redirects(
    statements: &[Statement],
    scope: &ScopePath,
    out: &mut Vec<(String, String, ScopePath)>,
) {
    for statement in statements {
        if let Statement::Subroutine(sub) = statement {
            let inner = scope.entered(&sub.name);

            if !sub.is_asm && sub.asm_address.is_none() {
                if let Some(Statement::Jump(jump)) = sub.first_executable_statement() {
                    if let JumpTarget::Identifier(target) = &jump.target {
                        out.push((scope.qualified(&sub.name), target.clone(), inner.clone()));
                    }
                }
            }

            collect_redirects(&sub.statements, &inner, out);
        }
    }
}

fn builtins_iter() -> impl Iterator<Item = &'static str> {
    [
        "sin", "cos", "tan", "asin", "acos", "atan", "ln", "log2", "sqrt", "rad", "deg", "round",
        "floor", "ceil", "abs", "max", "min", "avg", "sum", "len", "any", "all", "lsb", "msb",
        "lsl", "lsr", "rol", "ror", "rol2", "ror2", "rnd", "rndw", "rndf", "set_carry",
        "clear_carry", "set_irqd", "clear_irqd", "swap", "memset", "memcopy",
    ]
    .into_iter()
    .filter(|name| builtins::builtin_function(name).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_var() -> (Module, HeapValues) {
        let pos = Position::internal;
        let module = Module {
            name: "test".into(),
            statements: vec![Statement::Block(Box::new(Block {
                name: "main".into(),
                address: None,
                force_output: false,
                position: pos(),
                statements: vec![
                    Statement::VarDecl(VarDecl {
                        decl_type: VarDeclType::Const,
                        datatype: DataType::UByte,
                        name: "limit".into(),
                        value: Some(crate::ast::Expression::Literal(LiteralValue::byte(
                            DataType::UByte,
                            99,
                            pos(),
                        ))),
                        array_size: None,
                        zeropage: false,
                        position: pos(),
                    }),
                    Statement::Subroutine(Subroutine {
                        name: "start".into(),
                        parameters: vec![],
                        return_types: vec![],
                        statements: vec![],
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
        };

        (module, HeapValues::default())
    }

    #[test]
    fn lookup_walks_the_lexical_chain() {
        let (module, heap) = module_with_var();
        let namespace = Namespace::build(&module, &heap);

        let inner = ScopePath::root().entered("main").entered("start");
        let (qualified, entry) = namespace.resolve("limit", &inner).unwrap();
        assert_eq!(qualified, "main.limit");
        assert!(matches!(entry, SymbolEntry::Variable(_)));

        // dotted absolute names resolve from anywhere
        let (qualified, _) = namespace.resolve("main.start", &ScopePath::root()).unwrap();
        assert_eq!(qualified, "main.start");
    }

    #[test]
    fn const_values_are_available_for_inlining() {
        let (module, heap) = module_with_var();
        let namespace = Namespace::build(&module, &heap);

        let scope = ScopePath::root().entered("main");
        let value = namespace.constant_value("limit", &scope).unwrap();
        assert_eq!(value.as_integer(), Some(99));
    }

    #[test]
    fn duplicate_names_are_recorded() {
        let pos = Position::internal;
        let (mut module, heap) = module_with_var();
        if let Statement::Block(block) = &mut module.statements[0] {
            block.statements.push(Statement::Label(crate::ast::Label {
                name: "limit".into(),
                position: pos(),
            }));
        }

        let namespace = Namespace::build(&module, &heap);
        assert_eq!(namespace.duplicates.len(), 1);
        assert_eq!(namespace.duplicates[0].0, "main.limit");
    }

    #[test]
    fn builtins_resolve_from_any_scope() {
        let (module, heap) = module_with_var();
        let namespace = Namespace::build(&module, &heap);
        let scope = ScopePath::root().entered("main").entered("start");
        assert!(matches!(
            namespace.resolve("len", &scope),
            Some((_, SymbolEntry::Builtin { .. }))
        ));
    }
}
