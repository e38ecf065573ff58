pub mod emit;
pub mod frame;

use crate::ast::{Program, ScopeId};
use crate::tac::tac_def::TacProgram;

/// Plan every scope's stack frame, then emit the whole module as AMD64
/// assembly text.
pub fn tac_to_asm(prog: &mut Program, tac: &TacProgram) -> String {
    let frames: Vec<frame::StackFrame> = (0..prog.scopes.len())
        .map(|i| frame::compute_stack_offsets(prog, tac.block(ScopeId(i as u32))))
        .collect();

    emit::Backend::new(prog, tac, &frames).run()
}
