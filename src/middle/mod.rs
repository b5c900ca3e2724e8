//! The analysis and optimization passes that run between parsing and IR
//! emission.

use crate::{
    ast::{sweep_statements, Module},
    diagnostics::{AstError, Diagnostics},
    value::heap::HeapValues,
};

pub mod check;
pub mod const_eval;
pub mod namespace;
pub mod optimize_expressions;
pub mod optimize_statements;

use namespace::Namespace;

/// Guard against a rewrite rule that fails to shrink its measure; real
/// programs stabilize in a handful of rounds.
const MAX_OPTIMIZE_ROUNDS: usize = 100;

/// Runs expression and statement optimization until neither performs a
/// rewrite. The namespace is rebuilt per round so that names introduced
/// or folded by the previous round are registered.
pub fn optimize_until_stable(
    module: &mut Module,
    heap: &mut HeapValues,
    diagnostics: &mut Diagnostics,
) -> Result<(), AstError> {
    for _ in 0..MAX_OPTIMIZE_ROUNDS {
        let namespace = Namespace::build(module, heap);

        let mut performed =
            optimize_expressions::optimize_module_expressions(module, &namespace, heap, diagnostics);
        performed +=
            optimize_statements::optimize_module_statements(module, &namespace, heap, diagnostics);

        sweep_statements(&mut module.statements);

        if performed == 0 {
            return Ok(());
        }
    }

    Err(AstError(format!(
        "optimization did not reach a fixed point within {MAX_OPTIMIZE_ROUNDS} rounds"
    )))
}
