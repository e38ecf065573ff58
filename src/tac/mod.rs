pub mod pretty_print;
pub mod tac_def;
pub mod tac_gen;

use log::debug;

use crate::ast::{Program, ScopeId};
use tac_def::TacProgram;

/// Lower every scope's statement list into three-address code.
pub fn generate_tac(prog: &mut Program) -> TacProgram {
    let mut blocks = Vec::with_capacity(prog.scopes.len());
    for id in 0..prog.scopes.len() {
        let scope = ScopeId(id as u32);
        let cb = tac_gen::lower_scope(prog, scope);
        debug!(
            "tac: scope '{}', {} instruction(s)",
            prog.scope(scope).name,
            cb.instrs.len()
        );
        blocks.push(cb);
    }
    TacProgram { blocks }
}
