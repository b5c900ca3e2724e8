//! Error accumulation and reporting. Recoverable diagnostics collect into
//! a batch with duplicate suppression; warnings print immediately and
//! never stop compilation. Internal inconsistencies are fatal.

use colored::Colorize;
use hashbrown::HashSet;

use crate::ast::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Expression,
    Name,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Position,
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.position, self.message)
    }
}

/// Internal invariant violation in the AST (fatal, no recovery).
#[derive(Debug, Clone, PartialEq)]
pub struct AstError(pub String);

/// Internal inconsistency detected in the IR emitter (fatal). Indicates
/// the checker or optimizer failed to enforce an invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerError(pub String);

impl core::fmt::Display for AstError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "internal ast error: {}", self.0)
    }
}

impl core::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "internal compiler error: {}", self.0)
    }
}

impl std::error::Error for AstError {}
impl std::error::Error for CompilerError {}

#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<Diagnostic>,
    seen: HashSet<String>,
    warning_count: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: ErrorKind, message: String, position: Position) {
        // duplicates are suppressed by message + position equality
        let key = format!("{position} {message}");
        if self.seen.insert(key) {
            self.errors.push(Diagnostic {
                kind,
                message,
                position,
            });
        }
    }

    pub fn syntax_error(&mut self, message: impl Into<String>, position: Position) {
        self.push(ErrorKind::Syntax, message.into(), position);
    }

    pub fn expression_error(&mut self, message: impl Into<String>, position: Position) {
        self.push(ErrorKind::Expression, message.into(), position);
    }

    pub fn name_error(&mut self, message: impl Into<String>, position: Position) {
        self.push(ErrorKind::Name, message.into(), position);
    }

    /// Warnings go straight to stderr and compilation continues.
    pub fn warn(&mut self, message: impl core::fmt::Display, position: &Position) {
        self.warning_count += 1;
        eprintln!(
            "{} {}",
            format!("warning: {message}").yellow(),
            format!("(at {position})").white()
        );
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Prints every distinct error plus the closing summary line, and
    /// returns the error count.
    pub fn report_all(&self, module_name: &str) -> usize {
        for error in &self.errors {
            let tag = match error.kind {
                ErrorKind::Syntax => "syntax error",
                ErrorKind::Expression => "expression error",
                ErrorKind::Name => "name error",
            };

            eprintln!(
                "{}: {} {}",
                tag.red(),
                error.message,
                format!("(at {})", error.position).white()
            );
        }

        if !self.errors.is_empty() {
            eprintln!(
                "There are {} errors in module '{}'.",
                self.errors.len(),
                module_name
            );
        }

        self.errors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_messages_are_suppressed() {
        let mut diagnostics = Diagnostics::new();
        let pos = Position::internal();
        diagnostics.syntax_error("no such thing", pos.clone());
        diagnostics.syntax_error("no such thing", pos.clone());
        diagnostics.name_error("no such thing", pos);
        assert_eq!(diagnostics.errors().len(), 1);
    }

    #[test]
    fn same_message_at_other_position_is_kept() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.syntax_error("bad", Position::new("a.ill", 1, 1));
        diagnostics.syntax_error("bad", Position::new("a.ill", 2, 1));
        assert_eq!(diagnostics.errors().len(), 2);
    }
}
