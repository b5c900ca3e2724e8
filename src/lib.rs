//! Semantic analysis and optimization core for a small statically-typed
//! systems language targeting the Commodore 64. The (external) parser
//! hands over an AST plus a heap of string/array literals; this crate
//! validates the program, folds constants, simplifies statements to a
//! fixed point, and lowers the result into a linear stack-machine IR for
//! downstream code generation.

pub mod ast;
pub mod backend;
pub mod builtins;
pub mod diagnostics;
pub mod index;
pub mod middle;
pub mod options;
pub mod value;

use ast::Module;
use backend::ir::IrProgram;
use diagnostics::Diagnostics;
use middle::namespace::Namespace;
use options::CompilerOptions;
use value::heap::HeapValues;

/// Why a compilation run produced no program.
#[derive(Debug)]
pub enum CompileFailure {
    /// Recoverable diagnostics were reported; the count is the number of
    /// distinct errors printed.
    Errors(usize),
    /// An internal invariant did not hold.
    Internal(String),
}

impl core::fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileFailure::Errors(count) => write!(f, "{count} error(s)"),
            CompileFailure::Internal(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CompileFailure {}

/// Runs the whole pipeline over a parsed module: optimize to a fixed
/// point, check, emit IR, and clean the IR up with the peephole pass.
///
/// Errors are printed to stderr (with a closing summary line) before this
/// returns; warnings appear as they happen and never fail the build.
pub fn compile_module(
    module: &mut Module,
    heap: &mut HeapValues,
    options: &CompilerOptions,
) -> Result<IrProgram, CompileFailure> {
    let mut diagnostics = Diagnostics::new();

    let result = run_pipeline(module, heap, options, &mut diagnostics);

    if diagnostics.has_errors() {
        let count = diagnostics.report_all(&module.name);
        return Err(CompileFailure::Errors(count));
    }

    result
}

fn run_pipeline(
    module: &mut Module,
    heap: &mut HeapValues,
    options: &CompilerOptions,
    diagnostics: &mut Diagnostics,
) -> Result<IrProgram, CompileFailure> {
    middle::optimize_until_stable(module, heap, diagnostics)
        .map_err(|e| CompileFailure::Internal(e.to_string()))?;

    let namespace = Namespace::build(module, heap);
    middle::check::check_module(module, &namespace, heap, options, diagnostics);

    if diagnostics.has_errors() {
        // the caller reports; any count works as a placeholder here
        return Err(CompileFailure::Errors(diagnostics.errors().len()));
    }

    // initializers injected by the checker may introduce heap entries
    let namespace = Namespace::build(module, heap);

    backend::generate_program(module, &namespace, heap, options, diagnostics)
        .map_err(|e| CompileFailure::Internal(e.to_string()))
}
