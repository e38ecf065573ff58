//! snuplc — a whole-program compiler for SnuPL/2, a small Pascal-family
//! language, targeting AMD64 System V assembly.
//!
//! Pipeline: scan/parse → semantic analysis → three-address code →
//! stack-frame planning → instruction selection. The first failing pass
//! reports a single located error and nothing later runs.

pub mod amd64_gen;
pub mod ast;
pub mod error;
pub mod parser;
pub mod scanner;
pub mod semantic_analysis;
pub mod symbol;
pub mod tac;
pub mod token;
pub mod types;

use error::CompileResult;

/// Compile SnuPL/2 source text to AMD64 assembly text.
pub fn compile_to_string(src: &str) -> CompileResult<String> {
    let mut prog = parser::parse(src)?;
    semantic_analysis::analyse(&prog)?;
    let tac = tac::generate_tac(&mut prog);
    Ok(amd64_gen::tac_to_asm(&mut prog, &tac))
}
