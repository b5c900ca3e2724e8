//! AST for the source language: modules of `~ name { ... }` blocks holding
//! declarations, subroutines, labels, statements and inline assembly.
//! Nodes are produced by the (external) parser or synthesized by the
//! optimizers; rewrites return replacement nodes which callers substitute
//! in place, and removals are deferred to a sweep pass.

use strum::{Display, EnumString};

use crate::value::{DataType, LiteralValue};

pub mod visit;

/// Source location, attached to every node and literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Position for nodes synthesized by the compiler itself.
    pub fn internal() -> Self {
        Self::new("<internal>", 0, 0)
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Register {
    A,
    X,
    Y,
    AX,
    AY,
    XY,
}

impl Register {
    pub fn is_pair(self) -> bool {
        matches!(self, Self::AX | Self::AY | Self::XY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Statusflag {
    Pc,
    Pz,
    Pn,
    Pv,
}

/// A register or status flag used in asm-subroutine signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterOrStatusflag {
    Register(Register),
    Statusflag(Statusflag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum VarDeclType {
    #[strum(serialize = "var")]
    Var,
    #[strum(serialize = "const")]
    Const,
    #[strum(serialize = "memory")]
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOperator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Remainder,
    #[strum(serialize = "**")]
    Power,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    ShiftLeft,
    #[strum(serialize = ">>")]
    ShiftRight,
    #[strum(serialize = "and")]
    LogicalAnd,
    #[strum(serialize = "or")]
    LogicalOr,
    #[strum(serialize = "xor")]
    LogicalXor,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Bitwise,
    Logical,
    Comparison,
}

impl BinaryOperator {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Remainder
            | Self::Power => BinaryOperatorClass::Arithmetic,
            Self::BitAnd | Self::BitOr | Self::BitXor | Self::ShiftLeft | Self::ShiftRight => {
                BinaryOperatorClass::Bitwise
            }
            Self::LogicalAnd | Self::LogicalOr | Self::LogicalXor => BinaryOperatorClass::Logical,
            Self::Less
            | Self::Greater
            | Self::LessEqual
            | Self::GreaterEqual
            | Self::Equal
            | Self::NotEqual => BinaryOperatorClass::Comparison,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PrefixOperator {
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "~")]
    Invert,
    #[strum(serialize = "not")]
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IncrDecr {
    #[strum(serialize = "++")]
    Increment,
    #[strum(serialize = "--")]
    Decrement,
}

/* Module structure */

#[derive(Debug)]
pub struct Module {
    pub name: String,
    /// Top level statements: blocks and module-scope directives
    pub statements: Vec<Statement>,
    pub position: Position,
}

impl Module {
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Block(b) => Some(&**b),
            _ => None,
        })
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.statements.iter_mut().filter_map(|s| match s {
            Statement::Block(b) => Some(&mut **b),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct Block {
    pub name: String,
    pub address: Option<u16>,
    pub statements: Vec<Statement>,
    /// Emit this block even when it contains no executable code
    pub force_output: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubroutineParameter {
    pub name: String,
    pub datatype: DataType,
}

#[derive(Debug)]
pub struct Subroutine {
    pub name: String,
    pub parameters: Vec<SubroutineParameter>,
    pub return_types: Vec<DataType>,
    pub statements: Vec<Statement>,
    pub is_asm: bool,
    pub asm_address: Option<u16>,
    pub asm_parameter_registers: Vec<RegisterOrStatusflag>,
    pub asm_return_registers: Vec<RegisterOrStatusflag>,
    pub asm_clobbers: Vec<Register>,
    pub position: Position,
}

impl Subroutine {
    /// First statement that is not a declaration, directive or label.
    pub fn first_executable_statement(&self) -> Option<&Statement> {
        self.statements.iter().find(|s| {
            !matches!(
                s,
                Statement::VarDecl(_)
                    | Statement::Directive(_)
                    | Statement::Label(_)
                    | Statement::Subroutine(_)
            )
        })
    }
}

#[derive(Debug)]
pub struct VarDecl {
    pub decl_type: VarDeclType,
    pub datatype: DataType,
    pub name: String,
    pub value: Option<Expression>,
    pub array_size: Option<Expression>,
    pub zeropage: bool,
    pub position: Position,
}

/* Statements */

#[derive(Debug)]
pub enum Statement {
    Block(Box<Block>),
    Directive(Directive),
    VarDecl(VarDecl),
    Subroutine(Subroutine),
    Label(Label),
    Return(Return),
    Jump(Jump),
    If(IfStatement),
    For(ForLoop),
    While(WhileLoop),
    Repeat(RepeatLoop),
    Assignment(Assignment),
    PostIncrDecr(PostIncrDecr),
    FunctionCall(FunctionCallStatement),
    InlineAssembly(InlineAssembly),
    AnonymousScope(AnonymousScope),
    Nop { position: Position },
    /// Placeholder that gives builtin functions a namespace entry
    BuiltinPlaceholder { name: String, position: Position },
}

impl Statement {
    pub fn position(&self) -> &Position {
        match self {
            Statement::Block(s) => &s.position,
            Statement::Directive(s) => &s.position,
            Statement::VarDecl(s) => &s.position,
            Statement::Subroutine(s) => &s.position,
            Statement::Label(s) => &s.position,
            Statement::Return(s) => &s.position,
            Statement::Jump(s) => &s.position,
            Statement::If(s) => &s.position,
            Statement::For(s) => &s.position,
            Statement::While(s) => &s.position,
            Statement::Repeat(s) => &s.position,
            Statement::Assignment(s) => &s.position,
            Statement::PostIncrDecr(s) => &s.position,
            Statement::FunctionCall(s) => &s.position,
            Statement::InlineAssembly(s) => &s.position,
            Statement::AnonymousScope(s) => &s.position,
            Statement::Nop { position } => position,
            Statement::BuiltinPlaceholder { position, .. } => position,
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Statement::Nop { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveArg {
    Str(String),
    Name(String),
    Int(i64),
}

#[derive(Debug, Clone)]
pub struct Directive {
    pub name: String,
    pub args: Vec<DirectiveArg>,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub position: Position,
}

#[derive(Debug)]
pub struct Return {
    pub values: Vec<Expression>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JumpTarget {
    Address(u16),
    Identifier(String),
}

#[derive(Debug, Clone)]
pub struct Jump {
    pub target: JumpTarget,
    pub position: Position,
}

#[derive(Debug)]
pub struct IfStatement {
    pub condition: Expression,
    pub truepart: Vec<Statement>,
    pub elsepart: Vec<Statement>,
    pub position: Position,
}

#[derive(Debug)]
pub struct ForLoop {
    /// Either a register or a (possibly newly declared) loop variable
    pub loop_register: Option<Register>,
    pub loop_var: Option<Identifier>,
    /// Set when the loop declares its own variable (`for ubyte i in ...`)
    pub decl_datatype: Option<DataType>,
    pub iterable: Expression,
    pub body: Vec<Statement>,
    pub position: Position,
}

#[derive(Debug)]
pub struct WhileLoop {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub position: Position,
}

#[derive(Debug)]
pub struct RepeatLoop {
    pub body: Vec<Statement>,
    pub until: Expression,
    pub position: Position,
}

#[derive(Debug)]
pub struct Assignment {
    pub targets: Vec<AssignTarget>,
    /// Augmented operator (`+=` etc); desugared to `target = target op value`
    pub aug_op: Option<BinaryOperator>,
    pub value: Expression,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Register { register: Register, position: Position },
    Identifier(Identifier),
    ArrayIndexed(ArrayIndexed),
    MemoryAddress { address: Box<Expression>, position: Position },
}

impl AssignTarget {
    pub fn position(&self) -> &Position {
        match self {
            AssignTarget::Register { position, .. } => position,
            AssignTarget::Identifier(ident) => &ident.position,
            AssignTarget::ArrayIndexed(indexed) => &indexed.position,
            AssignTarget::MemoryAddress { position, .. } => position,
        }
    }

    /// Structural equality, used to spot redundant stores and
    /// self-assignments.
    pub fn same_target(&self, other: &AssignTarget) -> bool {
        match (self, other) {
            (AssignTarget::Register { register: a, .. }, AssignTarget::Register { register: b, .. }) => a == b,
            (AssignTarget::Identifier(a), AssignTarget::Identifier(b)) => a.name == b.name,
            (AssignTarget::ArrayIndexed(a), AssignTarget::ArrayIndexed(b)) => {
                a.identifier.name == b.identifier.name && a.index.same_expression(&b.index)
            }
            (
                AssignTarget::MemoryAddress { address: a, .. },
                AssignTarget::MemoryAddress { address: b, .. },
            ) => a.same_expression(b),
            _ => false,
        }
    }

    /// The expression this target reads back as, for augmented-assignment
    /// desugaring.
    pub fn to_expression(&self) -> Expression {
        match self {
            AssignTarget::Register { register, position } => Expression::Register {
                register: *register,
                position: position.clone(),
            },
            AssignTarget::Identifier(ident) => Expression::Identifier(ident.clone()),
            AssignTarget::ArrayIndexed(indexed) => Expression::ArrayIndexed(indexed.clone()),
            AssignTarget::MemoryAddress { address, position } => Expression::DirectMemoryRead {
                address: address.clone(),
                position: position.clone(),
            },
        }
    }
}

#[derive(Debug)]
pub struct PostIncrDecr {
    pub target: AssignTarget,
    pub operator: IncrDecr,
    pub position: Position,
}

#[derive(Debug)]
pub struct FunctionCallStatement {
    pub call: FunctionCall,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct InlineAssembly {
    pub assembly: String,
    pub position: Position,
}

#[derive(Debug)]
pub struct AnonymousScope {
    pub statements: Vec<Statement>,
    pub position: Position,
}

/* Expressions */

#[derive(Debug, Clone)]
pub struct Identifier {
    /// Name as written in the source, possibly dotted (`c64scr.print`)
    pub name: String,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub target: Identifier,
    pub args: Vec<Expression>,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct ArrayIndexed {
    pub identifier: Identifier,
    pub index: Box<Expression>,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct AddressOf {
    pub identifier: Identifier,
    /// Fully qualified name, resolved before IR emission
    pub scoped_name: Option<String>,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub enum Expression {
    Literal(LiteralValue),
    Identifier(Identifier),
    Prefix {
        operator: PrefixOperator,
        expression: Box<Expression>,
        position: Position,
    },
    Binary {
        left: Box<Expression>,
        operator: BinaryOperator,
        right: Box<Expression>,
        position: Position,
    },
    FunctionCall(FunctionCall),
    ArrayIndexed(ArrayIndexed),
    AddressOf(AddressOf),
    Typecast {
        expression: Box<Expression>,
        datatype: DataType,
        position: Position,
    },
    Range {
        from: Box<Expression>,
        to: Box<Expression>,
        step: Option<Box<Expression>>,
        position: Position,
    },
    Register {
        register: Register,
        position: Position,
    },
    DirectMemoryRead {
        address: Box<Expression>,
        position: Position,
    },
}

impl Expression {
    pub fn position(&self) -> &Position {
        match self {
            Expression::Literal(lit) => &lit.position,
            Expression::Identifier(ident) => &ident.position,
            Expression::Prefix { position, .. } => position,
            Expression::Binary { position, .. } => position,
            Expression::FunctionCall(call) => &call.position,
            Expression::ArrayIndexed(indexed) => &indexed.position,
            Expression::AddressOf(addr) => &addr.position,
            Expression::Typecast { position, .. } => position,
            Expression::Range { position, .. } => position,
            Expression::Register { position, .. } => position,
            Expression::DirectMemoryRead { position, .. } => position,
        }
    }

    pub fn as_literal(&self) -> Option<&LiteralValue> {
        match self {
            Expression::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// Structural equality, ignoring positions. Conservative: anything with
    /// side effects (function calls, registers) never matches.
    pub fn same_expression(&self, other: &Expression) -> bool {
        match (self, other) {
            (Expression::Literal(a), Expression::Literal(b)) => {
                a.datatype == b.datatype && a.payload == b.payload
            }
            (Expression::Identifier(a), Expression::Identifier(b)) => a.name == b.name,
            (
                Expression::Prefix {
                    operator: op_a,
                    expression: a,
                    ..
                },
                Expression::Prefix {
                    operator: op_b,
                    expression: b,
                    ..
                },
            ) => op_a == op_b && a.same_expression(b),
            (
                Expression::Binary {
                    left: la,
                    operator: op_a,
                    right: ra,
                    ..
                },
                Expression::Binary {
                    left: lb,
                    operator: op_b,
                    right: rb,
                    ..
                },
            ) => op_a == op_b && la.same_expression(lb) && ra.same_expression(rb),
            (Expression::ArrayIndexed(a), Expression::ArrayIndexed(b)) => {
                a.identifier.name == b.identifier.name && a.index.same_expression(&b.index)
            }
            (Expression::AddressOf(a), Expression::AddressOf(b)) => {
                a.identifier.name == b.identifier.name
            }
            (
                Expression::Typecast {
                    expression: a,
                    datatype: dt_a,
                    ..
                },
                Expression::Typecast {
                    expression: b,
                    datatype: dt_b,
                    ..
                },
            ) => dt_a == dt_b && a.same_expression(b),
            (
                Expression::DirectMemoryRead { address: a, .. },
                Expression::DirectMemoryRead { address: b, .. },
            ) => a.same_expression(b),
            _ => false,
        }
    }
}

/// Drops statements optimized into nops and splices anonymous scopes into
/// the enclosing statement list (scopes are transparent for naming, so
/// splicing changes nothing the namespace can see). Runs once after each
/// rewrite traversal rather than during it.
pub fn sweep_statements(statements: &mut Vec<Statement>) {
    let drained = std::mem::take(statements);

    for mut statement in drained {
        match &mut statement {
            Statement::Nop { .. } => continue,
            Statement::AnonymousScope(scope) => {
                sweep_statements(&mut scope.statements);
                statements.append(&mut scope.statements);
                continue;
            }
            Statement::Block(block) => sweep_statements(&mut block.statements),
            Statement::Subroutine(sub) => sweep_statements(&mut sub.statements),
            Statement::If(if_stmt) => {
                sweep_statements(&mut if_stmt.truepart);
                sweep_statements(&mut if_stmt.elsepart);
            }
            Statement::For(for_loop) => sweep_statements(&mut for_loop.body),
            Statement::While(while_loop) => sweep_statements(&mut while_loop.body),
            Statement::Repeat(repeat_loop) => sweep_statements(&mut repeat_loop.body),
            _ => {}
        }

        statements.push(statement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_removes_nops_and_splices_transparent_scopes() {
        let pos = Position::internal;
        let mut statements = vec![
            Statement::Nop { position: pos() },
            Statement::AnonymousScope(AnonymousScope {
                statements: vec![
                    Statement::Nop { position: pos() },
                    Statement::Jump(Jump {
                        target: JumpTarget::Address(0xc000),
                        position: pos(),
                    }),
                ],
                position: pos(),
            }),
        ];

        sweep_statements(&mut statements);

        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Statement::Jump(_)));
    }

    #[test]
    fn nested_scopes_splice_recursively() {
        let pos = Position::internal;
        let mut statements = vec![Statement::AnonymousScope(AnonymousScope {
            statements: vec![
                Statement::Label(Label {
                    name: "here".into(),
                    position: pos(),
                }),
                Statement::AnonymousScope(AnonymousScope {
                    statements: vec![Statement::Nop { position: pos() }],
                    position: pos(),
                }),
            ],
            position: pos(),
        })];

        sweep_statements(&mut statements);

        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Statement::Label(_)));
    }
}
