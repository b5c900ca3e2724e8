//! Local rewrites over a block's instruction list, repeated until a pass
//! changes nothing. Every rule strictly shrinks the list or removes a
//! NOT, so the fixed point is reached quickly.

use crate::{
    backend::ir::{Instruction, IrValue, Opcode, ProgramBlock},
    diagnostics::CompilerError,
};

pub fn optimize_block(block: &mut ProgramBlock) -> Result<usize, CompilerError> {
    let mut total = 0;

    loop {
        let changed = run_pass(block)?;
        total += changed;
        if changed == 0 {
            break;
        }
    }

    block.reindex_labels();
    Ok(total)
}

fn run_pass(block: &mut ProgramBlock) -> Result<usize, CompilerError> {
    let mut changed = 0;
    let mut out: Vec<Instruction> = Vec::with_capacity(block.instructions.len());

    for current in block.instructions.drain(..) {
        // plain no-ops vanish; labels are their own opcode and survive
        if current.opcode == Opcode::Nop {
            changed += 1;
            continue;
        }

        // consecutive source-line markers collapse to the last one
        if current.opcode == Opcode::Line
            && out.last().is_some_and(|prev| prev.opcode == Opcode::Line)
        {
            *out.last_mut().unwrap() = current;
            changed += 1;
            continue;
        }

        // CALL X directly followed by RETURN is a tail call
        if current.opcode == Opcode::Return
            && out.last().is_some_and(|prev| prev.opcode == Opcode::Call)
        {
            let call = out.pop().unwrap();
            out.push(Instruction {
                opcode: Opcode::Jump,
                ..call
            });
            changed += 1;
            continue;
        }

        if current.opcode.is_branch() {
            // a branch on a just-pushed constant goes one way only
            if let Some(value) = out.last().and_then(push_constant) {
                let taken = match current.opcode {
                    Opcode::Jz | Opcode::Jzw => value == 0,
                    _ => value != 0,
                };

                out.pop();
                if taken {
                    out.push(Instruction {
                        opcode: Opcode::Jump,
                        ..current
                    });
                }
                changed += 1;
                continue;
            }

            // NOT before a branch inverts the branch instead
            if let Some(prev) = out.last() {
                if matches!(prev.opcode, Opcode::NotB | Opcode::NotW) {
                    let inverted = match current.opcode {
                        Opcode::Jz => Opcode::Jnz,
                        Opcode::Jnz => Opcode::Jz,
                        Opcode::Jzw => Opcode::Jnzw,
                        Opcode::Jnzw => Opcode::Jzw,
                        _ => unreachable!(),
                    };

                    out.pop();
                    out.push(Instruction {
                        opcode: inverted,
                        ..current
                    });
                    changed += 1;
                    continue;
                }
            }
        }

        // storing a variable into itself does nothing
        if let Some(push_opcode) = matching_var_push(current.opcode) {
            if let Some(prev) = out.last() {
                if prev.opcode == push_opcode && prev.call_label == current.call_label {
                    out.pop();
                    changed += 1;
                    continue;
                }
            }
        }

        if let Some(push_opcode) = matching_mem_push(current.opcode) {
            if let Some(prev) = out.last() {
                if prev.opcode == push_opcode && prev.arg == current.arg {
                    out.pop();
                    changed += 1;
                    continue;
                }
            }
        }

        // casting a just-pushed literal re-types the push itself
        if let Some(rewritten) = fold_cast(&mut out, &current)? {
            if rewritten {
                changed += 1;
            }
            continue;
        }

        // pushing a value only to discard it is nothing at all
        if let Some(discard_width) = discard_width(current.opcode) {
            if let Some(prev) = out.last() {
                if let Some(push_width) = push_width(prev.opcode) {
                    if push_width != discard_width {
                        return Err(CompilerError(format!(
                            "discard width does not match the pushed value ({} after {})",
                            current.opcode, prev.opcode
                        )));
                    }

                    out.pop();
                    changed += 1;
                    continue;
                }
            }
        }

        out.push(current);
    }

    block.instructions = out;
    Ok(changed)
}

fn push_constant(instruction: &Instruction) -> Option<i64> {
    match instruction.opcode {
        Opcode::PushByte | Opcode::PushWord => instruction.arg.as_ref().and_then(IrValue::as_int),
        _ => None,
    }
}

fn matching_var_push(pop: Opcode) -> Option<Opcode> {
    match pop {
        Opcode::PopVarByte => Some(Opcode::PushVarByte),
        Opcode::PopVarWord => Some(Opcode::PushVarWord),
        Opcode::PopVarFloat => Some(Opcode::PushVarFloat),
        _ => None,
    }
}

fn matching_mem_push(pop: Opcode) -> Option<Opcode> {
    match pop {
        Opcode::PopMemByte => Some(Opcode::PushMemByte),
        Opcode::PopMemWord => Some(Opcode::PushMemWord),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackWidth {
    Byte,
    Word,
    Float,
}

fn discard_width(opcode: Opcode) -> Option<StackWidth> {
    match opcode {
        Opcode::DiscardByte => Some(StackWidth::Byte),
        Opcode::DiscardWord => Some(StackWidth::Word),
        Opcode::DiscardFloat => Some(StackWidth::Float),
        _ => None,
    }
}

fn push_width(opcode: Opcode) -> Option<StackWidth> {
    match opcode {
        Opcode::PushByte | Opcode::PushVarByte | Opcode::PushMemByte => Some(StackWidth::Byte),
        Opcode::PushWord
        | Opcode::PushVarWord
        | Opcode::PushMemWord
        | Opcode::PushAddrVar
        | Opcode::PushAddrHeap => Some(StackWidth::Word),
        Opcode::PushFloat | Opcode::PushVarFloat => Some(StackWidth::Float),
        _ => None,
    }
}

/// Applies the cast-after-literal-push rule. Returns `None` when the
/// instruction is not a cast (caller continues with other rules),
/// `Some(true)` when the pair was rewritten and `Some(false)` when the
/// cast must be kept as-is.
fn fold_cast(
    out: &mut Vec<Instruction>,
    current: &Instruction,
) -> Result<Option<bool>, CompilerError> {
    let expected_source = match current.opcode {
        Opcode::CastByteToWord | Opcode::CastByteToFloat => StackWidth::Byte,
        Opcode::CastWordToByte | Opcode::CastWordToFloat => StackWidth::Word,
        Opcode::CastFloatToByte | Opcode::CastFloatToWord => StackWidth::Float,
        _ => return Ok(None),
    };

    let Some(prev) = out.last() else {
        out.push(current.clone());
        return Ok(Some(false));
    };

    let literal = match (prev.opcode, &prev.arg) {
        (Opcode::PushByte, Some(IrValue::Byte(v))) => Some((StackWidth::Byte, *v as f64)),
        (Opcode::PushWord, Some(IrValue::Word(v))) => Some((StackWidth::Word, *v as f64)),
        (Opcode::PushFloat, Some(IrValue::Float(v))) => Some((StackWidth::Float, *v)),
        _ => None,
    };

    let Some((source_width, value)) = literal else {
        out.push(current.clone());
        return Ok(Some(false));
    };

    if source_width != expected_source {
        return Err(CompilerError(format!(
            "cast source does not match the pushed value ({} after {})",
            current.opcode, prev.opcode
        )));
    }

    let replacement = match current.opcode {
        Opcode::CastByteToWord => Instruction::with_arg(Opcode::PushWord, IrValue::Word(value as u16)),
        // narrowing keeps the low byte
        Opcode::CastWordToByte => {
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte((value as u16 & 0xff) as u8))
        }
        Opcode::CastByteToFloat | Opcode::CastWordToFloat => {
            Instruction::with_arg(Opcode::PushFloat, IrValue::Float(value))
        }
        Opcode::CastFloatToByte => {
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(value as i64 as u8))
        }
        Opcode::CastFloatToWord => {
            Instruction::with_arg(Opcode::PushWord, IrValue::Word(value as i64 as u16))
        }
        _ => unreachable!(),
    };

    out.pop();
    out.push(replacement);
    Ok(Some(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(instructions: Vec<Instruction>) -> ProgramBlock {
        let mut block = ProgramBlock::new("main", None, false);
        block.instructions = instructions;
        block
    }

    #[test]
    fn consecutive_lines_fold_to_one() {
        let mut block = block_with(vec![
            Instruction::with_label(Opcode::Line, "a:1"),
            Instruction::with_label(Opcode::Line, "a:2"),
            Instruction::with_label(Opcode::Line, "a:3"),
            Instruction::new(Opcode::Return),
        ]);

        optimize_block(&mut block).unwrap();

        assert_eq!(block.instructions.len(), 2);
        assert_eq!(block.instructions[0].call_label.as_deref(), Some("a:3"));
    }

    #[test]
    fn call_return_becomes_jump() {
        let mut block = block_with(vec![
            Instruction::with_label(Opcode::Call, "main.other"),
            Instruction::new(Opcode::Return),
        ]);

        optimize_block(&mut block).unwrap();

        assert_eq!(block.instructions.len(), 1);
        assert_eq!(block.instructions[0].opcode, Opcode::Jump);
        assert_eq!(
            block.instructions[0].call_label.as_deref(),
            Some("main.other")
        );
    }

    #[test]
    fn branch_on_pushed_constant_folds() {
        // JZ after pushing 0 always branches
        let mut block = block_with(vec![
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(0)),
            Instruction::with_label(Opcode::Jz, "main._l1"),
        ]);
        optimize_block(&mut block).unwrap();
        assert_eq!(block.instructions.len(), 1);
        assert_eq!(block.instructions[0].opcode, Opcode::Jump);

        // JZ after pushing nonzero never branches
        let mut block = block_with(vec![
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(1)),
            Instruction::with_label(Opcode::Jz, "main._l1"),
        ]);
        optimize_block(&mut block).unwrap();
        assert!(block.instructions.is_empty());
    }

    #[test]
    fn not_before_branch_inverts_it() {
        let mut block = block_with(vec![
            Instruction::new(Opcode::NotB),
            Instruction::with_label(Opcode::Jz, "main._l1"),
        ]);

        optimize_block(&mut block).unwrap();

        assert_eq!(block.instructions.len(), 1);
        assert_eq!(block.instructions[0].opcode, Opcode::Jnz);
    }

    #[test]
    fn push_pop_of_same_variable_elides() {
        let mut block = block_with(vec![
            Instruction::with_label(Opcode::PushVarByte, "main.start.x"),
            Instruction::with_label(Opcode::PopVarByte, "main.start.x"),
        ]);

        optimize_block(&mut block).unwrap();
        assert!(block.instructions.is_empty());
    }

    #[test]
    fn push_pop_of_different_variables_is_kept() {
        let mut block = block_with(vec![
            Instruction::with_label(Opcode::PushVarByte, "main.start.x"),
            Instruction::with_label(Opcode::PopVarByte, "main.start.y"),
        ]);

        optimize_block(&mut block).unwrap();
        assert_eq!(block.instructions.len(), 2);
    }

    #[test]
    fn cast_after_literal_push_retypes_the_push() {
        let mut block = block_with(vec![
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(40)),
            Instruction::new(Opcode::CastByteToWord),
        ]);

        optimize_block(&mut block).unwrap();

        assert_eq!(block.instructions.len(), 1);
        assert_eq!(block.instructions[0].opcode, Opcode::PushWord);
        assert_eq!(block.instructions[0].arg, Some(IrValue::Word(40)));

        // narrowing masks to the low byte
        let mut block = block_with(vec![
            Instruction::with_arg(Opcode::PushWord, IrValue::Word(0x1234)),
            Instruction::new(Opcode::CastWordToByte),
        ]);

        optimize_block(&mut block).unwrap();
        assert_eq!(block.instructions[0].arg, Some(IrValue::Byte(0x34)));
    }

    #[test]
    fn discard_after_push_elides_both() {
        let mut block = block_with(vec![
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(9)),
            Instruction::new(Opcode::DiscardByte),
        ]);

        optimize_block(&mut block).unwrap();
        assert!(block.instructions.is_empty());
    }

    #[test]
    fn mismatched_discard_is_fatal() {
        let mut block = block_with(vec![
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(9)),
            Instruction::new(Opcode::DiscardWord),
        ]);

        assert!(optimize_block(&mut block).is_err());
    }

    #[test]
    fn mismatched_cast_is_fatal() {
        let mut block = block_with(vec![
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(9)),
            Instruction::new(Opcode::CastWordToByte),
        ]);

        assert!(optimize_block(&mut block).is_err());
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut block = block_with(vec![
            Instruction::with_label(Opcode::Line, "a:1"),
            Instruction::with_label(Opcode::Line, "a:2"),
            Instruction::with_arg(Opcode::PushByte, IrValue::Byte(0)),
            Instruction::with_label(Opcode::Jz, "main._l1"),
            Instruction::label("main._l1"),
            Instruction::new(Opcode::Return),
        ]);

        optimize_block(&mut block).unwrap();
        let after_first: Vec<_> = block.instructions.clone();

        let changed = optimize_block(&mut block).unwrap();
        assert_eq!(changed, 0);
        assert_eq!(block.instructions, after_first);
    }
}
