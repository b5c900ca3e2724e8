//! Colored debug dump of an IR program, for inspecting what the emitter
//! and peephole pass produced.

use colored::Colorize;
use itertools::Itertools;

use crate::backend::ir::{Instruction, IrProgram, IrValue, Opcode, ProgramBlock};

pub fn pretty_print_ir(program: &IrProgram) {
    for block in &program.blocks {
        pretty_print_block(block);
    }
}

pub fn pretty_print_block(block: &ProgramBlock) {
    print!("{} {}", "block".magenta(), block.name.blue());

    if let Some(address) = block.address {
        print!(" {}", format!("@ ${address:04x}").white());
    }

    println!(" {}", "{".white());

    if !block.variables.is_empty() {
        println!(
            "  {} {}",
            "vars".cyan(),
            block
                .variables
                .iter()
                .map(|(name, var)| format!("{name}: {}", var.datatype))
                .join(", ")
                .white()
        );
    }

    if !block.memory_pointers.is_empty() {
        println!(
            "  {} {}",
            "memory".cyan(),
            block
                .memory_pointers
                .iter()
                .map(|(name, (address, datatype))| format!("{name}: {datatype} @ ${address:04x}"))
                .join(", ")
                .white()
        );
    }

    for instruction in &block.instructions {
        if instruction.opcode == Opcode::Label {
            println!(
                "{}",
                format!("{}:", instruction.call_label.as_deref().unwrap_or("?")).bright_red()
            );
        } else {
            println!("    {instruction}");
        }
    }

    println!("{}", "}".white())
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode.to_string().to_lowercase().cyan())?;

        for arg in [&self.arg, &self.arg2].into_iter().flatten() {
            write!(f, " {arg}")?;
        }

        for label in [&self.call_label, &self.call_label2].into_iter().flatten() {
            write!(f, " {}", label.blue())?;
        }

        Ok(())
    }
}

impl core::fmt::Display for IrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrValue::Byte(v) => write!(f, "{}", format!("${v:02x}").purple()),
            IrValue::Word(v) => write!(f, "{}", format!("${v:04x}").purple()),
            IrValue::Float(v) => write!(f, "{}", v.to_string().purple()),
            IrValue::Heap(id) => write!(f, "{}", format!("heap:{}", id.0).purple()),
        }
    }
}
