//! Lowering of the validated AST into the stack-machine IR, plus the
//! passes that run over the finished instruction lists.

use crate::{
    ast::Module,
    diagnostics::{CompilerError, Diagnostics},
    middle::namespace::Namespace,
    options::CompilerOptions,
    value::heap::HeapValues,
};

pub mod emit;
pub mod ir;
pub mod peephole;
pub mod pretty_print;
pub mod zeropage;

use ir::IrProgram;
use zeropage::Zeropage;

/// Emits the IR program, allocates `@zp` variables and runs the peephole
/// pass over every block.
pub fn generate_program(
    module: &Module,
    namespace: &Namespace,
    heap: &HeapValues,
    options: &CompilerOptions,
    diagnostics: &mut Diagnostics,
) -> Result<IrProgram, CompilerError> {
    let mut program = emit::emit_module(module, namespace, heap)?;

    allocate_zeropage_variables(&mut program, options, diagnostics);

    for block in &mut program.blocks {
        peephole::optimize_block(block)?;
    }

    Ok(program)
}

/// Walks all blocks and asks the allocator for an address for every
/// variable flagged `@zp`. Depletion leaves the variable in normal memory
/// with a warning.
fn allocate_zeropage_variables(
    program: &mut IrProgram,
    options: &CompilerOptions,
    diagnostics: &mut Diagnostics,
) {
    let mut zeropage = Zeropage::new(options);
    let IrProgram {
        blocks,
        allocated_zeropage,
        ..
    } = program;

    for block in blocks.iter() {
        for (name, variable) in &block.variables {
            if !variable.zeropage {
                continue;
            }

            match zeropage.allocate(name, variable.datatype) {
                Ok(address) => {
                    allocated_zeropage.insert(name.clone(), address);
                }
                Err(error) => diagnostics.warn(
                    format!("'{name}' stays in normal memory: {error}"),
                    &crate::ast::Position::internal(),
                ),
            }
        }
    }
}
