//! The builtin function table: per-function arity, accepted parameter
//! types and a purity flag. Pure builtins with all-literal arguments are
//! folded by the expression optimizer; everything else is lowered to a
//! call.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::{
    ast::Position,
    value::{
        heap::{ArrayCell, HeapEntry, HeapValues},
        DataType, EvalError, LiteralValue,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSpec {
    Numeric,
    Integer,
    Iterable,
    /// Numeric scalar or anything iterable (len, max, ...)
    NumericOrIterable,
}

impl ParamSpec {
    pub fn admits(self, datatype: DataType) -> bool {
        match self {
            ParamSpec::Numeric => datatype.is_numeric(),
            ParamSpec::Integer => datatype.is_integer(),
            ParamSpec::Iterable => datatype.is_iterable(),
            ParamSpec::NumericOrIterable => datatype.is_numeric() || datatype.is_iterable(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub parameters: &'static [ParamSpec],
    pub pure: bool,
    pub returns_value: bool,
}

use ParamSpec::{Integer, Iterable, Numeric, NumericOrIterable};

const BUILTINS: &[BuiltinFunction] = &[
    // math, all pure
    b("sin", &[Numeric], true, true),
    b("cos", &[Numeric], true, true),
    b("tan", &[Numeric], true, true),
    b("asin", &[Numeric], true, true),
    b("acos", &[Numeric], true, true),
    b("atan", &[Numeric], true, true),
    b("ln", &[Numeric], true, true),
    b("log2", &[Numeric], true, true),
    b("sqrt", &[Numeric], true, true),
    b("rad", &[Numeric], true, true),
    b("deg", &[Numeric], true, true),
    b("round", &[Numeric], true, true),
    b("floor", &[Numeric], true, true),
    b("ceil", &[Numeric], true, true),
    b("abs", &[Numeric], true, true),
    // aggregates over iterables
    b("max", &[Iterable], true, true),
    b("min", &[Iterable], true, true),
    b("avg", &[Iterable], true, true),
    b("sum", &[Iterable], true, true),
    b("len", &[NumericOrIterable], true, true),
    b("any", &[Iterable], true, true),
    b("all", &[Iterable], true, true),
    // byte access
    b("lsb", &[Integer], true, true),
    b("msb", &[Integer], true, true),
    // in-place bit shuffling, mutates its argument
    b("lsl", &[Integer], false, false),
    b("lsr", &[Integer], false, false),
    b("rol", &[Integer], false, false),
    b("ror", &[Integer], false, false),
    b("rol2", &[Integer], false, false),
    b("ror2", &[Integer], false, false),
    // randomness and flags
    b("rnd", &[], false, true),
    b("rndw", &[], false, true),
    b("rndf", &[], false, true),
    b("set_carry", &[], false, false),
    b("clear_carry", &[], false, false),
    b("set_irqd", &[], false, false),
    b("clear_irqd", &[], false, false),
    // memory and variables
    b("swap", &[Numeric, Numeric], false, false),
    b("memset", &[Integer, Integer, Integer], false, false),
    b("memcopy", &[Integer, Integer, Integer], false, false),
];

const fn b(
    name: &'static str,
    parameters: &'static [ParamSpec],
    pure: bool,
    returns_value: bool,
) -> BuiltinFunction {
    BuiltinFunction {
        name,
        parameters,
        pure,
        returns_value,
    }
}

static BUILTIN_TABLE: Lazy<HashMap<&'static str, BuiltinFunction>> =
    Lazy::new(|| BUILTINS.iter().map(|f| (f.name, *f)).collect());

pub fn builtin_function(name: &str) -> Option<&'static BuiltinFunction> {
    BUILTIN_TABLE.get(name)
}

/// Whether a call to `name` may be folded at compile time. Unknown names
/// are treated as non-pure.
pub fn is_pure_builtin(name: &str) -> bool {
    builtin_function(name).is_some_and(|f| f.pure)
}

/// The result type of a builtin, where it is fixed. Aggregates such as
/// max/min/sum depend on their argument and report no static type.
pub fn builtin_return_type(name: &str) -> Option<DataType> {
    match name {
        "sin" | "cos" | "tan" | "asin" | "acos" | "atan" | "ln" | "log2" | "sqrt" | "rad"
        | "deg" | "avg" | "rndf" => Some(DataType::Float),
        "lsb" | "msb" | "any" | "all" | "rnd" => Some(DataType::UByte),
        "len" | "rndw" => Some(DataType::UWord),
        _ => None,
    }
}

/// Folds a call to a pure builtin over literal arguments. Returns `None`
/// for non-pure or unknown functions; errors when a pure builtin is handed
/// an argument it cannot evaluate.
pub fn fold_builtin(
    name: &str,
    args: &[LiteralValue],
    heap: &HeapValues,
    position: &Position,
) -> Result<Option<LiteralValue>, EvalError> {
    if !is_pure_builtin(name) {
        return Ok(None);
    }

    let pos = position.clone();

    let result = match name {
        "sin" | "cos" | "tan" | "asin" | "acos" | "atan" | "ln" | "log2" | "sqrt" | "rad"
        | "deg" => {
            let x = numeric_arg(name, args, 0, &pos)?;
            let value = match name {
                "sin" => x.sin(),
                "cos" => x.cos(),
                "tan" => x.tan(),
                "asin" => x.asin(),
                "acos" => x.acos(),
                "atan" => x.atan(),
                "ln" => x.ln(),
                "log2" => x.log2(),
                "sqrt" => x.sqrt(),
                "rad" => x.to_radians(),
                "deg" => x.to_degrees(),
                _ => unreachable!(),
            };

            if !value.is_finite() {
                return Err(EvalError::new(format!("invalid argument to {name}"), pos));
            }

            LiteralValue::float(value, pos)
        }
        "round" => LiteralValue::optimal_numeric(numeric_arg(name, args, 0, &pos)?.round(), pos)?,
        "floor" => LiteralValue::optimal_numeric(numeric_arg(name, args, 0, &pos)?.floor(), pos)?,
        "ceil" => LiteralValue::optimal_numeric(numeric_arg(name, args, 0, &pos)?.ceil(), pos)?,
        "abs" => LiteralValue::optimal_numeric(numeric_arg(name, args, 0, &pos)?.abs(), pos)?,
        "lsb" => {
            let v = integer_arg(name, args, 0, &pos)?;
            LiteralValue::byte(DataType::UByte, (v & 0xff) as u8, pos)
        }
        "msb" => {
            let v = integer_arg(name, args, 0, &pos)?;
            LiteralValue::byte(DataType::UByte, ((v >> 8) & 0xff) as u8, pos)
        }
        "len" => {
            let length = iterable_length(name, args, heap, &pos)?;
            LiteralValue::optimal_integer(length as i64, pos)?
        }
        "max" | "min" | "sum" | "avg" | "any" | "all" => {
            let values = iterable_values(name, args, heap, &pos)?;
            if values.is_empty() {
                return Err(EvalError::new(format!("{name} of empty iterable"), pos));
            }

            match name {
                "max" => {
                    LiteralValue::optimal_numeric(values.iter().copied().fold(f64::MIN, f64::max), pos)?
                }
                "min" => {
                    LiteralValue::optimal_numeric(values.iter().copied().fold(f64::MAX, f64::min), pos)?
                }
                "sum" => LiteralValue::optimal_numeric(values.iter().sum(), pos)?,
                "avg" => LiteralValue::float(values.iter().sum::<f64>() / values.len() as f64, pos),
                "any" => LiteralValue::from_boolean(values.iter().any(|v| *v != 0.0), pos),
                "all" => LiteralValue::from_boolean(values.iter().all(|v| *v != 0.0), pos),
                _ => unreachable!(),
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(result))
}

fn numeric_arg(
    name: &str,
    args: &[LiteralValue],
    index: usize,
    position: &Position,
) -> Result<f64, EvalError> {
    args.get(index).and_then(|a| a.as_number()).ok_or_else(|| {
        EvalError::new(
            format!("{name} requires a numeric argument"),
            position.clone(),
        )
    })
}

fn integer_arg(
    name: &str,
    args: &[LiteralValue],
    index: usize,
    position: &Position,
) -> Result<i64, EvalError> {
    args.get(index).and_then(|a| a.as_integer()).ok_or_else(|| {
        EvalError::new(
            format!("{name} requires an integer argument"),
            position.clone(),
        )
    })
}

fn iterable_length(
    name: &str,
    args: &[LiteralValue],
    heap: &HeapValues,
    position: &Position,
) -> Result<usize, EvalError> {
    let id = args.first().and_then(|a| a.heap_id()).ok_or_else(|| {
        EvalError::new(
            format!("{name} requires an iterable argument"),
            position.clone(),
        )
    })?;

    Ok(heap.length_of(id))
}

fn iterable_values(
    name: &str,
    args: &[LiteralValue],
    heap: &HeapValues,
    position: &Position,
) -> Result<Vec<f64>, EvalError> {
    let id = args.first().and_then(|a| a.heap_id()).ok_or_else(|| {
        EvalError::new(
            format!("{name} requires an iterable argument"),
            position.clone(),
        )
    })?;

    match heap.get(id) {
        HeapEntry::Str { value, .. } => Ok(value.bytes().map(|b| b as f64).collect()),
        HeapEntry::Array { cells, .. } => cells
            .iter()
            .map(|cell| match cell {
                ArrayCell::Int(v) => Ok(*v as f64),
                ArrayCell::AddressOf(_) => Err(EvalError::new(
                    format!("{name} cannot evaluate an address reference"),
                    position.clone(),
                )),
            })
            .collect(),
        HeapEntry::FloatArray { values } => Ok(values.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::internal()
    }

    #[test]
    fn purity_classification() {
        assert!(is_pure_builtin("sin"));
        assert!(is_pure_builtin("len"));
        assert!(!is_pure_builtin("rnd"));
        assert!(!is_pure_builtin("lsl"));
        // unknown builtins are non-pure
        assert!(!is_pure_builtin("frobnicate"));
    }

    #[test]
    fn lsb_msb_fold() {
        let heap = HeapValues::default();
        let arg = LiteralValue::word(DataType::UWord, 0xea31, pos());
        let lsb = fold_builtin("lsb", &[arg.clone()], &heap, &pos())
            .unwrap()
            .unwrap();
        assert_eq!(lsb.as_integer(), Some(0x31));
        let msb = fold_builtin("msb", &[arg], &heap, &pos()).unwrap().unwrap();
        assert_eq!(msb.as_integer(), Some(0xea));
    }

    #[test]
    fn aggregates_fold_over_heap_arrays() {
        let mut heap = HeapValues::default();
        let id = heap.add_array(
            DataType::ArrayUb,
            vec![ArrayCell::Int(1), ArrayCell::Int(2), ArrayCell::Int(3)],
        );
        let arg = LiteralValue::heap(DataType::ArrayUb, id, pos());

        let sum = fold_builtin("sum", &[arg.clone()], &heap, &pos())
            .unwrap()
            .unwrap();
        assert_eq!(sum.as_integer(), Some(6));

        let len = fold_builtin("len", &[arg.clone()], &heap, &pos())
            .unwrap()
            .unwrap();
        assert_eq!(len.as_integer(), Some(3));

        let all = fold_builtin("all", &[arg], &heap, &pos()).unwrap().unwrap();
        assert_eq!(all.as_integer(), Some(1));
    }

    #[test]
    fn non_pure_builtins_do_not_fold() {
        let heap = HeapValues::default();
        assert_eq!(fold_builtin("rnd", &[], &heap, &pos()).unwrap(), None);
    }
}
