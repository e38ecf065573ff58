mod type_check;

use log::debug;

use crate::ast::Program;
use crate::error::CompileResult;

/// Run semantic analysis over a parsed program. The AST is read-only; the
/// first violation is returned and no later pass runs.
pub fn analyse(prog: &Program) -> CompileResult<()> {
    debug!(
        "semantic analysis: module '{}', {} subroutine(s)",
        prog.scope(crate::ast::MODULE_SCOPE).name,
        prog.scopes.len() - 1
    );

    type_check::TypeChecker::new(prog).check()
}
