//! Stack-frame layout under the AMD64 System V convention.
//!
//! Frame shape, top of frame at high addresses:
//!
//! ```text
//!   [caller stack args 7..]            rbp + 8*(index+1)
//!   return address                     rbp + 8
//!   saved callee-saved registers (6x8)
//!   rbp (old)                          <- rbp after prologue
//!   saved register parameters (<=6x8)  rbp - 8*(index+1)
//!   local variables                    rsp + argbuild + offset
//!   argument build area                rsp + 0 ..
//! ```
//!
//! Locals are addressed off `rsp`, parameters off `rbp`; with that split
//! the prologue can align `rsp` freely without disturbing either.

use log::debug;

use crate::ast::Program;
use crate::symbol::{Storage, SymId, SymKind, Symbol};
use crate::tac::tac_def::{CodeBlock, Opcode, TacOp};

/// Planned frame for one scope. All sizes in bytes.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub return_address: u32,
    pub saved_registers: u32,
    pub saved_parameters: u32,
    pub local_variables: u32,
    pub argument_build: u32,
    pub size: u32,
    /// Temporaries mapped onto the argument build slots (`ab0`, `ab1`, ...).
    pub argbuild: Vec<SymId>,
}

impl StackFrame {
    /// What the prologue subtracts from `rsp` (the pushes already accounted
    /// for the return address and saved registers).
    pub fn rsp_adjustment(&self) -> u32 {
        self.size - self.saved_registers - self.return_address
    }
}

/// Assign a storage location to every symbol in the block's scope and
/// compute the frame size.
pub fn compute_stack_offsets(prog: &mut Program, cb: &CodeBlock) -> StackFrame {
    let scope = cb.scope;
    let mut frame = StackFrame {
        return_address: 8,
        saved_registers: 6 * 8,
        saved_parameters: 0,
        local_variables: 0,
        argument_build: 0,
        size: 0,
        argbuild: Vec::new(),
    };

    let symbols: Vec<SymId> = prog.scope(scope).symtab.symbols().to_vec();

    // non-locals first; locals float above the argument build area, which
    // is not known until the outgoing call arity is
    for &id in &symbols {
        let location = match &prog.sym(id).kind {
            SymKind::Global | SymKind::Constant { .. } => Storage::LabelRelative {
                label: prog.sym(id).name.clone(),
            },
            SymKind::Procedure { .. } => Storage::Absolute {
                label: prog.sym(id).name.clone(),
            },
            SymKind::Param { index } => {
                let index = *index as i64 + 1; // 1-indexed
                if index <= 6 {
                    frame.saved_parameters += 8;
                    Storage::Relative {
                        base: "rbp",
                        offset: -index * 8,
                    }
                } else {
                    // spilled arguments sit just above the return address;
                    // index 7 lands at rbp+56
                    Storage::Relative {
                        base: "rbp",
                        offset: index * 8,
                    }
                }
            }
            SymKind::Local | SymKind::Reserved => continue,
        };
        prog.syms.get_mut(id).location = location;
    }

    // the argument build area serves the widest outgoing call
    let max_args = outgoing_arity(cb);
    if max_args > 6 {
        frame.argument_build = (max_args - 6) * 8;
    }

    for &id in &symbols {
        if !matches!(prog.sym(id).kind, SymKind::Local) {
            continue;
        }
        prog.syms.get_mut(id).location = Storage::Relative {
            base: "rsp",
            offset: (frame.argument_build + frame.local_variables) as i64,
        };
        frame.local_variables += prog.types.size(prog.sym(id).ty);
        frame.local_variables += (8 - frame.local_variables % 8) % 8;
    }

    // synthesize the ab<i> slot temporaries
    if max_args > 6 {
        let long = prog.types.longint();
        for i in 0..max_args - 6 {
            let mut n = i;
            let id = loop {
                let name = format!("ab{}", n);
                if prog.scope(scope).symtab.lookup(&name).is_some() {
                    n += max_args;
                    continue;
                }
                let mut sym = Symbol::new(&name, SymKind::Local, long);
                sym.location = Storage::Relative {
                    base: "rsp",
                    offset: (i * 8) as i64,
                };
                let id = prog.syms.add(sym);
                prog.scope_mut(scope).symtab.add(&name, id);
                break id;
            };
            frame.argbuild.push(id);
        }
    }

    frame.size = frame.return_address
        + frame.saved_registers
        + frame.saved_parameters
        + frame.local_variables
        + frame.argument_build;

    debug!(
        "frame '{}': size {} (params {}, locals {}, argbuild {})",
        prog.scope(scope).name,
        frame.size,
        frame.saved_parameters,
        frame.local_variables,
        frame.argument_build
    );

    frame
}

/// Largest outgoing call arity: one past the highest `Param` index in the
/// block.
fn outgoing_arity(cb: &CodeBlock) -> u32 {
    cb.instrs
        .iter()
        .filter(|i| i.op == Opcode::Param)
        .filter_map(|i| match i.dest {
            Some(TacOp::Const { value, .. }) => Some(value as u32 + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ScopeId, MODULE_SCOPE};
    use crate::parser::parse;
    use crate::symbol::SymScope;

    fn plan(src: &str) -> (Program, Vec<StackFrame>) {
        let mut prog = parse(src).unwrap();
        crate::semantic_analysis::analyse(&prog).unwrap();
        let tac = crate::tac::generate_tac(&mut prog);
        let frames = (0..prog.scopes.len())
            .map(|i| compute_stack_offsets(&mut prog, tac.block(ScopeId(i as u32))))
            .collect();
        (prog, frames)
    }

    #[test]
    fn globals_are_label_relative() {
        let (prog, _) = plan("module M; var x: integer; begin x := 0 end M.");
        let x = prog.find_symbol(MODULE_SCOPE, "x", SymScope::Local).unwrap();
        assert_eq!(
            prog.sym(x).location,
            Storage::LabelRelative {
                label: "x".to_string()
            }
        );
    }

    #[test]
    fn register_parameters_are_saved_below_rbp() {
        let (prog, frames) = plan(
            "module M;
             function f(a, b: integer): integer;
             begin return a + b end f;
             begin end M.",
        );
        let f = ScopeId(1);
        let a = prog.find_symbol(f, "a", SymScope::Local).unwrap();
        let b = prog.find_symbol(f, "b", SymScope::Local).unwrap();
        assert_eq!(
            prog.sym(a).location,
            Storage::Relative {
                base: "rbp",
                offset: -8
            }
        );
        assert_eq!(
            prog.sym(b).location,
            Storage::Relative {
                base: "rbp",
                offset: -16
            }
        );
        assert_eq!(frames[1].saved_parameters, 16);
    }

    #[test]
    fn seventh_parameter_comes_from_the_caller_frame() {
        let (prog, _) = plan(
            "module M;
             function f(p1, p2, p3, p4, p5, p6, p7: integer): integer;
             begin return p7 end f;
             begin end M.",
        );
        let f = ScopeId(1);
        let p7 = prog.find_symbol(f, "p7", SymScope::Local).unwrap();
        assert_eq!(
            prog.sym(p7).location,
            Storage::Relative {
                base: "rbp",
                offset: 56
            }
        );
    }

    #[test]
    fn wide_calls_reserve_an_argument_build_area() {
        let (prog, frames) = plan(
            "module M;
             function f(p1, p2, p3, p4, p5, p6, p7, p8: integer): integer;
             begin return p1 end f;
             var x: integer;
             begin x := f(1, 2, 3, 4, 5, 6, 7, 8) end M.",
        );
        // the module calls an 8-ary function: two spill slots
        assert_eq!(frames[0].argument_build, 16);
        assert_eq!(frames[0].argbuild.len(), 2);
        let ab0 = frames[0].argbuild[0];
        assert_eq!(
            prog.sym(ab0).location,
            Storage::Relative {
                base: "rsp",
                offset: 0
            }
        );
        // the function itself makes no calls
        assert_eq!(frames[1].argument_build, 0);
    }

    #[test]
    fn locals_sit_above_the_argument_build_area() {
        let (prog, frames) = plan(
            "module M;
             procedure p();
             var x: integer; y: longint;
             begin x := 0; y := 1L end p;
             begin end M.",
        );
        let scope = ScopeId(1);
        let x = prog.find_symbol(scope, "x", SymScope::Local).unwrap();
        let y = prog.find_symbol(scope, "y", SymScope::Local).unwrap();
        assert_eq!(
            prog.sym(x).location,
            Storage::Relative {
                base: "rsp",
                offset: 0
            }
        );
        // x is rounded up to 8 bytes
        assert_eq!(
            prog.sym(y).location,
            Storage::Relative {
                base: "rsp",
                offset: 8
            }
        );
        assert!(frames[1].local_variables >= 16);
    }

    #[test]
    fn frame_size_sums_the_sections() {
        let (_, frames) = plan("module M; begin end M.");
        let f = &frames[0];
        assert_eq!(
            f.size,
            f.return_address
                + f.saved_registers
                + f.saved_parameters
                + f.local_variables
                + f.argument_build
        );
        assert_eq!(f.rsp_adjustment(), f.size - 56);
    }
}
