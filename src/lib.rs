#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod macros;

pub mod ast;
pub mod cli;
pub mod codegen;
pub mod debug;
pub mod errors;
pub mod lir;
pub mod pathlib;
pub mod span;
pub mod target;
pub mod utils;
