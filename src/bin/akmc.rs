use akmc::source_map::SourceMap;
use akmc::{compile, CompileOptions, Diagnostic};
use akm_bytecode::{dump, inspect, verify};
use akm_module::caps::capability_bit;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

const USAGE: &str = "usage: akmc <input> [options]

options:
  -o, --output <path>   output artifact path
  -v, --verbose         report pipeline progress on stderr
  -d, --debug           set the DEBUG header flag
  -O, --optimize        run the optimizer passes
  -c, --caps <mask>     extra capabilities (hex, or names like LOG,NET)
      --dry-run         compile without writing the artifact
      --emit-ir         print the IR to stdout
  -i, --info            inspect an existing artifact instead of compiling
      --version         print the compiler version
  -h, --help            print this help";

#[derive(Debug, Default)]
struct Options {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    verbose: bool,
    debug: bool,
    optimize: bool,
    extra_caps: u32,
    dry_run: bool,
    emit_ir: bool,
    info: bool,
}

fn parse_caps(arg: &str) -> Result<u32, String> {
    let hex = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X"));
    if let Some(hex) = hex {
        return u32::from_str_radix(hex, 16)
            .map_err(|_| format!("invalid capability mask `{arg}`"));
    }
    let mut mask = 0u32;
    for name in arg.split(',') {
        let name = name.trim();
        match capability_bit(&name.to_uppercase()) {
            Some(bit) => mask |= bit,
            None => return Err(format!("unknown capability name `{name}`")),
        }
    }
    Ok(mask)
}

fn parse_args() -> Result<Options, String> {
    let mut opts = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => {
                let path = args.next().ok_or("missing argument for --output")?;
                opts.output = Some(PathBuf::from(path));
            }
            "-v" | "--verbose" => opts.verbose = true,
            "-d" | "--debug" => opts.debug = true,
            "-O" | "--optimize" => opts.optimize = true,
            "-c" | "--caps" => {
                let mask = args.next().ok_or("missing argument for --caps")?;
                opts.extra_caps |= parse_caps(&mask)?;
            }
            "--dry-run" => opts.dry_run = true,
            "--emit-ir" => opts.emit_ir = true,
            "-i" | "--info" => opts.info = true,
            "--version" => {
                println!("akmc {}", env!("CARGO_PKG_VERSION"));
                process::exit(0);
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option `{other}`"));
            }
            _ => {
                if opts.input.is_some() {
                    return Err("expected exactly one input file".to_string());
                }
                opts.input = Some(PathBuf::from(arg));
            }
        }
    }
    Ok(opts)
}

/// `mod.akm.js` -> `mod.akm`, `mod.js` -> `mod.akm`, anything else gets
/// `.akm` appended.
fn default_output(input: &Path) -> PathBuf {
    let text = input.to_string_lossy();
    let stem = text
        .strip_suffix(".akm.js")
        .or_else(|| text.strip_suffix(".js"))
        .unwrap_or(&text);
    PathBuf::from(format!("{stem}.akm"))
}

fn report(kind: &str, diag: &Diagnostic, map: &SourceMap) {
    match diag.span {
        Some(span) => eprintln!("{kind}: {} ({})", diag.message, map.render(span)),
        None => eprintln!("{kind}: {}", diag.message),
    }
}

fn run_info(path: &Path) -> i32 {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("error: failed to read {}: {err}", path.display());
            return 1;
        }
    };
    let report = match inspect(&bytes) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };
    println!("{report}");
    if let Err(err) = verify(&bytes) {
        eprintln!("error: {err}");
        return 1;
    }
    0
}

fn run() -> i32 {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!("{USAGE}");
            return 2;
        }
    };
    let Some(input) = opts.input.clone() else {
        eprintln!("{USAGE}");
        return 2;
    };

    if opts.info {
        return run_info(&input);
    }

    let source = match fs::read_to_string(&input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: failed to read {}: {err}", input.display());
            return 1;
        }
    };
    let map = SourceMap::new(input.display().to_string(), &source);

    let compile_opts = CompileOptions {
        optimize: opts.optimize,
        debug: opts.debug,
        extra_capabilities: opts.extra_caps,
    };
    let output = match compile(&source, &compile_opts) {
        Ok(output) => output,
        Err(failure) => {
            for warning in &failure.warnings {
                report("warning", warning, &map);
            }
            for error in &failure.errors {
                report("error", error, &map);
            }
            return 1;
        }
    };

    for warning in &output.warnings {
        report("warning", warning, &map);
    }
    if opts.verbose {
        eprintln!(
            "compiled {}: {} function(s), {} command(s), capabilities 0x{:08X}",
            map.name(),
            output.ir.functions.len(),
            output.ir.commands.len(),
            output.ir.info.capabilities
        );
    }
    if opts.emit_ir {
        print!("{}", dump(&output.ir));
    }
    if opts.dry_run {
        if opts.verbose {
            eprintln!("dry run: skipped writing {} bytes", output.artifact.len());
        }
        return 0;
    }

    let out_path = opts.output.unwrap_or_else(|| default_output(&input));
    if let Err(err) = fs::write(&out_path, &output.artifact) {
        eprintln!("error: failed to write {}: {err}", out_path.display());
        return 1;
    }
    if opts.verbose {
        eprintln!(
            "wrote {} ({} bytes)",
            out_path.display(),
            output.artifact.len()
        );
    }
    0
}

fn main() {
    process::exit(run());
}
