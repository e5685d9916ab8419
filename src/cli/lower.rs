use std::fs;
use std::io::{self, Write};
use std::process;

use colored::Colorize;
use structopt::StructOpt;

use crate::{
    ast,
    codegen::{codegen_module, CodegenOptions, DebugLevel},
    errors::LowerError,
    pathlib::FilePath,
    target::Target,
};

#[derive(Debug, StructOpt)]
pub struct LowerOptions {
    #[structopt(help = "bincode-encoded typed module from the frontend")]
    input: FilePath,

    #[structopt(long, default_value = "x86_64-linux", help = "target triple")]
    target: Target,

    #[structopt(short = "g", help = "emit debug info")]
    debug: bool,

    #[structopt(
        long = "gc",
        help = "emit debug info tagged as C for debuggers without D support"
    )]
    debug_c: bool,

    #[structopt(short = "O", help = "mark the output as optimized")]
    optimize: bool,

    #[structopt(short, long, help = "write the IR here instead of stdout")]
    output: Option<FilePath>,
}

impl LowerOptions {
    fn codegen_options(&self) -> CodegenOptions {
        let debug = if self.debug_c {
            DebugLevel::CCompat
        } else if self.debug {
            DebugLevel::Full
        } else {
            DebugLevel::None
        };
        CodegenOptions {
            target: self.target,
            debug,
            optimize: self.optimize,
            ..CodegenOptions::default()
        }
    }
}

pub(super) fn action(options: LowerOptions) {
    if let Err(errs) = lower(&options) {
        let n = errs.len();
        for err in errs {
            err.emit();
        }
        let msg = format!("lowering failed with {} error{}", n, if n == 1 { "" } else { "s" });
        eprintln!("{}", msg.as_str().bold().red());
        process::exit(1);
    }
}

fn lower(options: &LowerOptions) -> Result<(), Vec<LowerError>> {
    log::debug!("reading {}", options.input);
    let buf = fs::read(&options.input).map_err(LowerError::from)?;
    let module: ast::Module = bincode::deserialize(&buf).map_err(LowerError::from)?;
    let ir = codegen_module(&module, options.codegen_options())?;

    let text = ir.to_string();
    match &options.output {
        Some(path) => {
            fs::write(path, text).map_err(LowerError::from)?;
            log::info!("wrote {}", path);
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(text.as_bytes()).map_err(LowerError::from)?;
        }
    }
    Ok(())
}
