//! Literal values and their datatypes. Every literal carries exactly one
//! payload variant consistent with its declared type; strings and arrays
//! live out-of-line on the heap and are referenced by id.

use std::cmp::Ordering;

use strum::{Display, EnumIter};

use crate::ast::Position;

pub mod heap;

use heap::{HeapEntry, HeapId, HeapValues};

/// Largest magnitude representable in the target's 5-byte MFLPT float format.
pub const FLOAT_MAX: f64 = 1.7014118345e38;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DataType {
    #[strum(serialize = "ubyte")]
    UByte,
    #[strum(serialize = "byte")]
    Byte,
    #[strum(serialize = "uword")]
    UWord,
    #[strum(serialize = "word")]
    Word,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "str_s")]
    StrS,
    #[strum(serialize = "ubyte[]")]
    ArrayUb,
    #[strum(serialize = "byte[]")]
    ArrayB,
    #[strum(serialize = "uword[]")]
    ArrayUw,
    #[strum(serialize = "word[]")]
    ArrayW,
    #[strum(serialize = "float[]")]
    ArrayF,
}

impl DataType {
    pub fn is_byte(self) -> bool {
        matches!(self, Self::UByte | Self::Byte)
    }

    pub fn is_word(self) -> bool {
        matches!(self, Self::UWord | Self::Word)
    }

    pub fn is_integer(self) -> bool {
        self.is_byte() || self.is_word()
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self == Self::Float
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Byte | Self::Word | Self::Float)
    }

    pub fn is_string(self) -> bool {
        matches!(self, Self::Str | Self::StrS)
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            Self::ArrayUb | Self::ArrayB | Self::ArrayUw | Self::ArrayW | Self::ArrayF
        )
    }

    pub fn is_iterable(self) -> bool {
        self.is_string() || self.is_array()
    }

    /// Element type of an iterable (strings iterate as unsigned bytes).
    pub fn element_type(self) -> Option<DataType> {
        match self {
            Self::Str | Self::StrS | Self::ArrayUb => Some(Self::UByte),
            Self::ArrayB => Some(Self::Byte),
            Self::ArrayUw => Some(Self::UWord),
            Self::ArrayW => Some(Self::Word),
            Self::ArrayF => Some(Self::Float),
            _ => None,
        }
    }

    /// The array type whose elements are of this numeric type.
    pub fn array_of(self) -> Option<DataType> {
        match self {
            Self::UByte => Some(Self::ArrayUb),
            Self::Byte => Some(Self::ArrayB),
            Self::UWord => Some(Self::ArrayUw),
            Self::Word => Some(Self::ArrayW),
            Self::Float => Some(Self::ArrayF),
            _ => None,
        }
    }

    /// Inclusive element-count bounds for array declarations.
    pub fn array_size_bounds(self) -> Option<(usize, usize)> {
        match self {
            Self::ArrayUb | Self::ArrayB => Some((1, 256)),
            Self::ArrayUw | Self::ArrayW => Some((1, 128)),
            Self::ArrayF => Some((1, 51)),
            _ => None,
        }
    }

    /// Inclusive numeric value range, for the numeric types.
    pub fn value_range(self) -> Option<(f64, f64)> {
        match self {
            Self::UByte => Some((0.0, 255.0)),
            Self::Byte => Some((-128.0, 127.0)),
            Self::UWord => Some((0.0, 65535.0)),
            Self::Word => Some((-32768.0, 32767.0)),
            Self::Float => Some((-FLOAT_MAX, FLOAT_MAX)),
            _ => None,
        }
    }

    /// Whether a value of type `other` may be assigned to a target of this
    /// type without an explicit conversion.
    pub fn assignable_from(self, other: DataType) -> bool {
        match self {
            Self::UByte => other == Self::UByte,
            Self::Byte => other == Self::Byte,
            Self::UWord => matches!(other, Self::UByte | Self::UWord),
            Self::Word => matches!(other, Self::Byte | Self::UByte | Self::Word),
            Self::Float => other.is_numeric(),
            Self::Str => other == Self::Str,
            Self::StrS => other == Self::StrS,
            _ => self == other,
        }
    }
}

/// Raised when literal evaluation is impossible (overflow, division by
/// zero, a type that does not admit the operation). Callers convert this
/// into a regular expression diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
    pub position: Position,
}

impl EvalError {
    pub fn new(message: impl Into<String>, position: Position) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Byte(u8),
    Word(u16),
    Float(f64),
    Heap(HeapId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralValue {
    pub datatype: DataType,
    pub payload: Payload,
    pub position: Position,
}

impl LiteralValue {
    pub fn byte(datatype: DataType, value: u8, position: Position) -> Self {
        debug_assert!(datatype.is_byte());
        Self {
            datatype,
            payload: Payload::Byte(value),
            position,
        }
    }

    pub fn word(datatype: DataType, value: u16, position: Position) -> Self {
        debug_assert!(datatype.is_word());
        Self {
            datatype,
            payload: Payload::Word(value),
            position,
        }
    }

    pub fn float(value: f64, position: Position) -> Self {
        Self {
            datatype: DataType::Float,
            payload: Payload::Float(value),
            position,
        }
    }

    pub fn heap(datatype: DataType, id: HeapId, position: Position) -> Self {
        debug_assert!(datatype.is_iterable());
        Self {
            datatype,
            payload: Payload::Heap(id),
            position,
        }
    }

    /// Picks the smallest integer type that contains `n`.
    pub fn optimal_integer(n: i64, position: Position) -> Result<Self, EvalError> {
        match n {
            0..=255 => Ok(Self::byte(DataType::UByte, n as u8, position)),
            -128..=-1 => Ok(Self::byte(DataType::Byte, n as i8 as u8, position)),
            256..=65535 => Ok(Self::word(DataType::UWord, n as u16, position)),
            -32768..=-129 => Ok(Self::word(DataType::Word, n as i16 as u16, position)),
            _ => Err(EvalError::new(
                format!("integer overflow: {n}"),
                position,
            )),
        }
    }

    /// Canonicalizes an arbitrary number: floats stay floats, integral
    /// values narrow to the smallest integer type that holds them.
    pub fn optimal_numeric(x: f64, position: Position) -> Result<Self, EvalError> {
        if x.fract() != 0.0 || x < -32768.0 || x > 65535.0 {
            if !x.is_finite() || x.abs() > FLOAT_MAX {
                return Err(EvalError::new(
                    format!("floating point overflow: {x}"),
                    position,
                ));
            }
            Ok(Self::float(x, position))
        } else {
            Self::optimal_integer(x as i64, position)
        }
    }

    pub fn from_boolean(b: bool, position: Position) -> Self {
        Self::byte(DataType::UByte, b as u8, position)
    }

    /// Coerces `n` into the requested type, bounds-checked.
    pub fn from_number(n: f64, datatype: DataType, position: Position) -> Result<Self, EvalError> {
        let Some((lo, hi)) = datatype.value_range() else {
            return Err(EvalError::new(
                format!("type {datatype} cannot hold a number"),
                position,
            ));
        };

        if n < lo || n > hi {
            return Err(EvalError::new(
                format!("value {n} out of range for {datatype}"),
                position,
            ));
        }

        Ok(match datatype {
            DataType::UByte => Self::byte(DataType::UByte, n as u8, position),
            DataType::Byte => Self::byte(DataType::Byte, n as i64 as i8 as u8, position),
            DataType::UWord => Self::word(DataType::UWord, n as u16, position),
            DataType::Word => Self::word(DataType::Word, n as i64 as i16 as u16, position),
            DataType::Float => Self::float(n, position),
            _ => unreachable!(),
        })
    }

    /// Sign-extended integer value, for the integral types.
    pub fn as_integer(&self) -> Option<i64> {
        match self.payload {
            Payload::Byte(b) => Some(match self.datatype {
                DataType::Byte => b as i8 as i64,
                _ => b as i64,
            }),
            Payload::Word(w) => Some(match self.datatype {
                DataType::Word => w as i16 as i64,
                _ => w as i64,
            }),
            Payload::Float(_) | Payload::Heap(_) => None,
        }
    }

    /// Float-coerced numeric value.
    pub fn as_number(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(f) => Some(f),
            Payload::Heap(_) => None,
            _ => self.as_integer().map(|i| i as f64),
        }
    }

    /// Truthiness: any nonzero number; heap values are always truthy.
    pub fn as_boolean(&self) -> bool {
        match self.payload {
            Payload::Float(f) => f != 0.0,
            Payload::Heap(_) => true,
            _ => self.as_integer() != Some(0),
        }
    }

    pub fn heap_id(&self) -> Option<HeapId> {
        match self.payload {
            Payload::Heap(id) => Some(id),
            _ => None,
        }
    }

    /// Language-level equality: numeric values compare by value across
    /// types, heap values compare by content (two equal strings with
    /// different ids are equal).
    pub fn equals(&self, other: &Self, heap: &HeapValues) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                let (Some(a), Some(b)) = (self.heap_id(), other.heap_id()) else {
                    return false;
                };
                if a == b {
                    return true;
                }
                match (heap.get(a), heap.get(b)) {
                    (
                        HeapEntry::Str { value: va, .. },
                        HeapEntry::Str { value: vb, .. },
                    ) => va == vb,
                    (
                        HeapEntry::Array { cells: ca, .. },
                        HeapEntry::Array { cells: cb, .. },
                    ) => ca == cb,
                    (HeapEntry::FloatArray { values: va }, HeapEntry::FloatArray { values: vb }) => {
                        va == vb
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Ordering is defined over numeric pairs only.
    pub fn compare_numeric(&self, other: &Self) -> Option<Ordering> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        }
    }
}

impl core::fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.payload {
            Payload::Float(v) => write!(f, "{v}"),
            Payload::Heap(id) => write!(f, "&{id:?}"),
            _ => write!(f, "{}", self.as_integer().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::internal()
    }

    #[test]
    fn optimal_integer_picks_smallest_containing_type() {
        assert_eq!(
            LiteralValue::optimal_integer(0, pos()).unwrap().datatype,
            DataType::UByte
        );
        assert_eq!(
            LiteralValue::optimal_integer(255, pos()).unwrap().datatype,
            DataType::UByte
        );
        assert_eq!(
            LiteralValue::optimal_integer(-1, pos()).unwrap().datatype,
            DataType::Byte
        );
        assert_eq!(
            LiteralValue::optimal_integer(256, pos()).unwrap().datatype,
            DataType::UWord
        );
        assert_eq!(
            LiteralValue::optimal_integer(-129, pos()).unwrap().datatype,
            DataType::Word
        );
        assert!(LiteralValue::optimal_integer(65536, pos()).is_err());
        assert!(LiteralValue::optimal_integer(-32769, pos()).is_err());
    }

    #[test]
    fn optimal_integer_never_narrows() {
        for n in [-32768i64, -129, -128, -1, 0, 255, 256, 65535] {
            let v = LiteralValue::optimal_integer(n, pos()).unwrap();
            let (lo, hi) = v.datatype.value_range().unwrap();
            assert!((n as f64) >= lo && (n as f64) <= hi, "narrowed {n}");
            assert_eq!(v.as_integer(), Some(n));
        }
    }

    #[test]
    fn optimal_numeric_keeps_fractions_as_float() {
        let v = LiteralValue::optimal_numeric(3.5, pos()).unwrap();
        assert_eq!(v.datatype, DataType::Float);
        let v = LiteralValue::optimal_numeric(3.0, pos()).unwrap();
        assert_eq!(v.datatype, DataType::UByte);
        assert!(LiteralValue::optimal_numeric(1.0e39, pos()).is_err());
    }

    #[test]
    fn cross_type_numeric_equality() {
        let heap = HeapValues::default();
        let a = LiteralValue::byte(DataType::UByte, 5, pos());
        let b = LiteralValue::word(DataType::UWord, 5, pos());
        assert!(a.equals(&b, &heap));
        let c = LiteralValue::float(5.0, pos());
        assert!(a.equals(&c, &heap));
    }

    #[test]
    fn signed_bytes_sign_extend() {
        let v = LiteralValue::from_number(-2.0, DataType::Byte, pos()).unwrap();
        assert_eq!(v.as_integer(), Some(-2));
        let v = LiteralValue::from_number(-300.0, DataType::Word, pos()).unwrap();
        assert_eq!(v.as_integer(), Some(-300));
    }
}
