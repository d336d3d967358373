//! The compilation pipeline: parse, extract, lower, infer capabilities,
//! optimize, generate, and write the container.
//!
//! The pipeline is purely functional over its inputs; file reads happen
//! only in [`compile_file`] and writes belong to the CLI.

use crate::diag::{Diagnostic, Diagnostics};
use crate::extract::{extract, Extraction};
use crate::lower::build_ir;
use crate::parser::Parser;
use akm_bytecode::container::FLAG_DEBUG;
use akm_bytecode::{generate, optimize_module, write_module, IrModule};
use akm_module::api_by_name;
use akm_module::caps::{CAP_COMMAND, CAP_LOG};
use std::fmt;
use std::path::Path;

#[derive(Clone, Debug, Default)]
pub struct CompileOptions {
    /// Run the optimizer passes before code generation.
    pub optimize: bool,
    /// Set header flag bit 0 (DEBUG).
    pub debug: bool,
    /// Extra capability bits OR'd into the inferred mask.
    pub extra_capabilities: u32,
}

#[derive(Clone, Debug)]
pub struct CompileOutput {
    /// The assembled artifact.
    pub artifact: Vec<u8>,
    /// The IR as it was handed to the code generator (post-optimization
    /// when enabled).
    pub ir: IrModule,
    pub warnings: Vec<Diagnostic>,
}

/// The aggregated errors of the stage that aborted compilation, plus any
/// warnings gathered before it.
#[derive(Clone, Debug, Default)]
pub struct CompileFailure {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for CompileFailure {}

/// Capability inference: declared bits, `COMMAND` when any command is
/// registered, the bit of every recognized API method, and always `LOG`.
fn infer_capabilities(module: &mut IrModule, extraction: &Extraction, diags: &mut Diagnostics) {
    let mut mask = module.info.capabilities;
    if !module.commands.is_empty() {
        mask |= CAP_COMMAND;
    }
    for call in &extraction.api_calls {
        match api_by_name(&call.method) {
            Some(api) => {
                mask |= api.cap;
                if call.args.len() as u8 != api.argc {
                    diags.warn(
                        format!(
                            "AKM.{} takes {} argument(s), {} given",
                            call.method,
                            api.argc,
                            call.args.len()
                        ),
                        call.span,
                    );
                }
            }
            None => diags.warn(
                format!("unknown host API method `AKM.{}`", call.method),
                call.span,
            ),
        }
    }
    mask |= CAP_LOG;
    module.info.capabilities = mask;
}

/// Compiles one source module to an AKM artifact.
pub fn compile(source: &str, opts: &CompileOptions) -> Result<CompileOutput, CompileFailure> {
    let program = Parser::new(source)
        .and_then(|mut p| p.parse_program())
        .map_err(|err| CompileFailure {
            errors: vec![Diagnostic::new(err.message, err.span)],
            warnings: Vec::new(),
        })?;

    let mut diags = Diagnostics::default();
    let extraction = extract(&program, &mut diags);

    if extraction.function("init").is_none() {
        diags.error_global("module must define an `init` function");
    }
    if extraction.function("exit").is_none() {
        diags.error_global("module must define an `exit` function");
    }
    if diags.has_errors() {
        return Err(CompileFailure {
            errors: diags.errors,
            warnings: diags.warnings,
        });
    }

    let mut module = build_ir(&extraction);
    infer_capabilities(&mut module, &extraction, &mut diags);
    module.info.capabilities |= opts.extra_capabilities;

    if opts.optimize {
        optimize_module(&mut module);
    }

    let generated = match generate(&module) {
        Ok(generated) => generated,
        Err(err) => {
            diags.error_global(err.message);
            return Err(CompileFailure {
                errors: diags.errors,
                warnings: diags.warnings,
            });
        }
    };

    let mut flags = extraction.flags;
    if opts.debug {
        flags |= FLAG_DEBUG;
    }
    let artifact = write_module(&module, &generated, flags);

    Ok(CompileOutput {
        artifact,
        ir: module,
        warnings: diags.warnings,
    })
}

/// Reads and compiles a source file.
pub fn compile_file(path: &Path, opts: &CompileOptions) -> Result<CompileOutput, CompileFailure> {
    let source = std::fs::read_to_string(path).map_err(|err| CompileFailure {
        errors: vec![Diagnostic::global(format!(
            "failed to read {}: {err}",
            path.display()
        ))],
        warnings: Vec::new(),
    })?;
    compile(&source, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use akm_module::caps::{CAP_PCI, CAP_PORT_IO};

    const MINIMAL: &str =
        "AKM.module({ name: \"a\" });\nfunction init() { return 0; }\nfunction exit() {}\n";

    #[test]
    fn minimal_module_compiles() {
        let out = compile(MINIMAL, &CompileOptions::default()).expect("compile");
        assert_eq!(&out.artifact[..4], b"AKM2");
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn missing_init_or_exit_is_structural() {
        let err = compile(
            "AKM.module({ name: \"a\" });\nfunction exit() {}",
            &CompileOptions::default(),
        )
        .expect_err("should fail");
        assert!(err.errors.iter().any(|e| e.message.contains("`init`")));
    }

    #[test]
    fn parse_error_carries_location() {
        let err = compile("function init( {", &CompileOptions::default()).expect_err("should fail");
        assert_eq!(err.errors.len(), 1);
        assert!(err.errors[0].span.is_some());
    }

    #[test]
    fn log_capability_is_always_inferred() {
        let out = compile(MINIMAL, &CompileOptions::default()).expect("compile");
        assert_eq!(out.ir.info.capabilities, CAP_LOG);
    }

    #[test]
    fn api_calls_contribute_their_capability_bits() {
        let src = "AKM.module({ name: \"a\" });\nfunction init() { AKM.pciScan(); AKM.inb(0x60); return 0; }\nfunction exit() {}";
        let out = compile(src, &CompileOptions::default()).expect("compile");
        assert_eq!(out.ir.info.capabilities, CAP_LOG | CAP_PCI | CAP_PORT_IO);
    }

    #[test]
    fn unknown_api_method_warns_but_compiles() {
        let src = "AKM.module({ name: \"a\" });\nfunction init() { AKM.frobnicate(); }\nfunction exit() {}";
        let out = compile(src, &CompileOptions::default()).expect("compile");
        assert!(out
            .warnings
            .iter()
            .any(|w| w.message.contains("frobnicate")));
        assert_eq!(out.ir.info.capabilities, CAP_LOG);
    }

    #[test]
    fn extra_capabilities_are_merged() {
        let opts = CompileOptions {
            extra_capabilities: CAP_PCI,
            ..CompileOptions::default()
        };
        let out = compile(MINIMAL, &opts).expect("compile");
        assert_eq!(out.ir.info.capabilities, CAP_LOG | CAP_PCI);
    }

    #[test]
    fn call_to_undefined_function_fails_codegen() {
        let src = "AKM.module({ name: \"a\" });\nfunction init() { ghost(); }\nfunction exit() {}";
        let err = compile(src, &CompileOptions::default()).expect_err("should fail");
        assert!(err.errors.iter().any(|e| e.message.contains("ghost")));
    }
}
