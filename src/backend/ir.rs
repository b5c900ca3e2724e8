//! The stack-machine IR. Each source block lowers to a `ProgramBlock`
//! holding a flat instruction list plus its variables, memory pointers
//! and label positions. Expression trees are flattened into post-order
//! stack operations; loops and conditionals become labels and branches.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use strum::Display;

use crate::value::{heap::HeapId, DataType, LiteralValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    Nop,
    Line,
    Label,

    /* stack pushes */
    PushByte,
    PushWord,
    PushFloat,
    PushVarByte,
    PushVarWord,
    PushVarFloat,
    PushMemByte,
    PushMemWord,
    PushAddrVar,
    PushAddrHeap,
    PushIndexedByte,
    PushIndexedWord,
    PushIndexedFloat,
    PeekVarByte,
    PeekVarWord,

    /* stack pops */
    PopVarByte,
    PopVarWord,
    PopVarFloat,
    PopMemByte,
    PopMemWord,
    PopIndexedByte,
    PopIndexedWord,
    PopIndexedFloat,
    DiscardByte,
    DiscardWord,
    DiscardFloat,

    /* type conversion */
    CastByteToWord,
    CastWordToByte,
    CastByteToFloat,
    CastWordToFloat,
    CastFloatToByte,
    CastFloatToWord,

    /* arithmetic */
    AddB,
    AddW,
    AddF,
    SubB,
    SubW,
    SubF,
    MulB,
    MulW,
    MulF,
    IdivUb,
    IdivB,
    IdivUw,
    IdivW,
    DivF,
    RemainderUb,
    RemainderUw,
    PowF,
    NegB,
    NegW,
    NegF,
    InvB,
    InvW,

    /* logical (results are 0/1 bytes) */
    NotB,
    NotW,
    AndB,
    AndW,
    OrB,
    OrW,
    XorB,
    XorW,

    /* bitwise */
    BitandB,
    BitandW,
    BitorB,
    BitorW,
    BitxorB,
    BitxorW,
    ShlB,
    ShlW,
    ShrUb,
    ShrB,
    ShrUw,
    ShrW,

    /* comparisons (result is a 0/1 byte) */
    LessUb,
    LessB,
    LessUw,
    LessW,
    LessF,
    GreaterUb,
    GreaterB,
    GreaterUw,
    GreaterW,
    GreaterF,
    LesseqUb,
    LesseqB,
    LesseqUw,
    LesseqW,
    LesseqF,
    GreatereqUb,
    GreatereqB,
    GreatereqUw,
    GreatereqW,
    GreatereqF,
    EqualB,
    EqualW,
    EqualF,
    NotequalB,
    NotequalW,
    NotequalF,

    /* control flow */
    Jz,
    Jnz,
    Jzw,
    Jnzw,
    Jump,
    Call,
    Return,
    Syscall,

    /* verbatim assembly carried through to the code generator */
    InlineAsm,
}

impl Opcode {
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jz | Opcode::Jnz | Opcode::Jzw | Opcode::Jnzw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrValue {
    Byte(u8),
    Word(u16),
    Float(f64),
    Heap(HeapId),
}

impl IrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            IrValue::Byte(v) => Some(*v as i64),
            IrValue::Word(v) => Some(*v as i64),
            IrValue::Float(_) | IrValue::Heap(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub arg: Option<IrValue>,
    pub arg2: Option<IrValue>,
    pub call_label: Option<String>,
    pub call_label2: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            arg: None,
            arg2: None,
            call_label: None,
            call_label2: None,
        }
    }

    pub fn with_arg(opcode: Opcode, arg: IrValue) -> Self {
        Self {
            arg: Some(arg),
            ..Self::new(opcode)
        }
    }

    pub fn with_label(opcode: Opcode, label: impl Into<String>) -> Self {
        Self {
            call_label: Some(label.into()),
            ..Self::new(opcode)
        }
    }

    /// A label is a distinguished no-op that also appears in the owning
    /// block's label map.
    pub fn label(name: impl Into<String>) -> Self {
        Self::with_label(Opcode::Label, name)
    }

    pub fn line(position: &crate::ast::Position) -> Self {
        Self::with_label(Opcode::Line, format!("{}:{}", position.file, position.line))
    }
}

#[derive(Debug, Clone)]
pub struct BlockVariable {
    pub datatype: DataType,
    pub value: Option<LiteralValue>,
    pub zeropage: bool,
}

#[derive(Debug)]
pub struct ProgramBlock {
    pub name: String,
    pub address: Option<u16>,
    pub instructions: Vec<Instruction>,
    pub variables: BTreeMap<String, BlockVariable>,
    pub memory_pointers: BTreeMap<String, (u16, DataType)>,
    pub labels: BTreeMap<String, usize>,
    pub force_output: bool,
}

impl ProgramBlock {
    pub fn new(name: impl Into<String>, address: Option<u16>, force_output: bool) -> Self {
        Self {
            name: name.into(),
            address,
            instructions: Vec::new(),
            variables: BTreeMap::new(),
            memory_pointers: BTreeMap::new(),
            labels: BTreeMap::new(),
            force_output,
        }
    }

    /// Recomputes the label index map after instructions moved around.
    pub fn reindex_labels(&mut self) {
        self.labels.clear();
        for (index, instruction) in self.instructions.iter().enumerate() {
            if instruction.opcode == Opcode::Label {
                if let Some(name) = &instruction.call_label {
                    self.labels.insert(name.clone(), index);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct IrProgram {
    pub name: String,
    pub blocks: Vec<ProgramBlock>,
    /// `@zp` variables that received a zero-page address
    pub allocated_zeropage: HashMap<String, u16>,
}
