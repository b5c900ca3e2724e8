//! Compilation options collected from the module-level directives. Passed
//! explicitly to every pass; there are no globals.

use strum::{Display, EnumIter, EnumString};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum OutputType {
    Raw,
    #[default]
    Prg,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum LauncherType {
    #[default]
    Basic,
    None,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ZeropageType {
    #[default]
    Basicsafe,
    Floatsafe,
    Kernalsafe,
    Full,
}

#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    pub output: OutputType,
    pub launcher: LauncherType,
    pub zeropage: ZeropageType,
    /// `%zpreserved` address ranges the allocator must not touch
    pub zp_reserved: Vec<(u16, u16)>,
    /// `%option enable_floats`
    pub float_enabled: bool,
}

impl CompilerOptions {
    /// Collects the options from the module-level directives. Malformed
    /// arguments are left at their defaults here; the checker reports
    /// them.
    pub fn from_module(module: &crate::ast::Module) -> Self {
        use crate::ast::{DirectiveArg, Statement};

        let mut options = Self::default();

        for statement in &module.statements {
            let Statement::Directive(directive) = statement else {
                continue;
            };

            match (directive.name.as_str(), directive.args.as_slice()) {
                ("%output", [DirectiveArg::Name(name)]) => {
                    if let Ok(output) = name.parse() {
                        options.output = output;
                    }
                }
                ("%launcher", [DirectiveArg::Name(name)]) => {
                    if let Ok(launcher) = name.parse() {
                        options.launcher = launcher;
                    }
                }
                ("%zeropage", [DirectiveArg::Name(name)]) => {
                    if let Ok(zeropage) = name.parse() {
                        options.zeropage = zeropage;
                    }
                }
                ("%zpreserved", [DirectiveArg::Int(from), DirectiveArg::Int(to)]) => {
                    if (0..=255).contains(from) && (0..=255).contains(to) {
                        options.zp_reserved.push((*from as u16, *to as u16));
                    }
                }
                ("%option", args) => {
                    let enables_floats = args.iter().any(|arg| {
                        matches!(arg, DirectiveArg::Name(name) if name == "enable_floats")
                    });
                    options.float_enabled |= enables_floats;
                }
                _ => {}
            }
        }

        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Directive, DirectiveArg, Module, Position, Statement};

    #[test]
    fn directive_arguments_parse_by_name() {
        assert_eq!("raw".parse(), Ok(OutputType::Raw));
        assert_eq!("basic".parse(), Ok(LauncherType::Basic));
        assert_eq!("kernalsafe".parse(), Ok(ZeropageType::Kernalsafe));
        assert!("petscii".parse::<OutputType>().is_err());
    }

    #[test]
    fn options_collect_from_module_directives() {
        let pos = Position::internal;
        let directive = |name: &str, args: Vec<DirectiveArg>| {
            Statement::Directive(Directive {
                name: name.into(),
                args,
                position: pos(),
            })
        };

        let module = Module {
            name: "test".into(),
            statements: vec![
                directive("%output", vec![DirectiveArg::Name("raw".into())]),
                directive("%zeropage", vec![DirectiveArg::Name("full".into())]),
                directive(
                    "%zpreserved",
                    vec![DirectiveArg::Int(0x10), DirectiveArg::Int(0x1f)],
                ),
                directive("%option", vec![DirectiveArg::Name("enable_floats".into())]),
            ],
            position: pos(),
        };

        let options = CompilerOptions::from_module(&module);
        assert_eq!(options.output, OutputType::Raw);
        assert_eq!(options.zeropage, ZeropageType::Full);
        assert_eq!(options.zp_reserved, vec![(0x10, 0x1f)]);
        assert!(options.float_enabled);
    }
}
