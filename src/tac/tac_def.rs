//! Three-address code.
//!
//! A `CodeBlock` holds the ordered instruction list for one scope and mints
//! fresh labels and temporaries. Instructions are appended once and only
//! edited by the terminal cleanup sweep.

use std::collections::HashSet;

use crate::ast::{Program, ScopeId};
use crate::symbol::{SymId, SymKind, Symbol};
use crate::types::TypeId;

/// TAC operations. The short-circuit boolean operators of the source
/// language never appear here; they are lowered to control flow during
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pos,

    // memory
    Assign,
    Address,

    // control flow; relational opcodes branch to their destination label
    Goto,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    BiggerThan,
    BiggerEqual,

    // calls
    Call,
    Return,
    Param,

    // markers
    Label,
    Nop,
}

impl Opcode {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Opcode::Equal
                | Opcode::NotEqual
                | Opcode::LessThan
                | Opcode::LessEqual
                | Opcode::BiggerThan
                | Opcode::BiggerEqual
        )
    }

    /// Instructions that transfer control to a label.
    pub fn is_branch(self) -> bool {
        self == Opcode::Goto || self.is_relational()
    }
}

/// A code-block-local label. The numeric id is unique within the block;
/// the suffix only makes the assembly easier to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub id: u32,
    pub suffix: Option<&'static str>,
}

/// Render a label in its `l_<scope>_<id>[_<suffix>]` form.
pub fn label_name(scope_name: &str, label: Label) -> String {
    match label.suffix {
        Some(s) => format!("l_{}_{}_{}", scope_name, label.id, s),
        None => format!("l_{}_{}", scope_name, label.id),
    }
}

/// TAC operand.
#[derive(Debug, Clone, PartialEq)]
pub enum TacOp {
    Const { value: i64, ty: TypeId },
    /// A named symbol: global, local, parameter, temporary, or procedure.
    Name(SymId),
    /// The value at the address stored in `holder`; `deref` names the array
    /// the address points into (its element type sizes the access).
    Reference { holder: SymId, deref: SymId },
    Label(Label),
}

impl TacOp {
    pub fn as_label(&self) -> Option<Label> {
        match self {
            TacOp::Label(l) => Some(*l),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instr {
    pub op: Opcode,
    pub dest: Option<TacOp>,
    pub src1: Option<TacOp>,
    pub src2: Option<TacOp>,
}

impl Instr {
    pub fn new(op: Opcode, dest: Option<TacOp>, src1: Option<TacOp>, src2: Option<TacOp>) -> Self {
        Self {
            op,
            dest,
            src1,
            src2,
        }
    }

    /// The branch target, if this instruction is a branch.
    pub fn branch_target(&self) -> Option<Label> {
        if self.op.is_branch() {
            self.dest.as_ref().and_then(|d| d.as_label())
        } else {
            None
        }
    }
}

/// Per-scope instruction list plus label/temporary factories.
#[derive(Debug)]
pub struct CodeBlock {
    pub scope: ScopeId,
    pub instrs: Vec<Instr>,
    next_label: u32,
    next_temp: u32,
}

impl CodeBlock {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            instrs: Vec::new(),
            next_label: 0,
            next_temp: 0,
        }
    }

    pub fn new_label(&mut self, suffix: Option<&'static str>) -> Label {
        self.next_label += 1;
        Label {
            id: self.next_label,
            suffix,
        }
    }

    /// Mint a fresh typed temporary `t<n>` in the block's scope. Bumps the
    /// counter past any colliding user identifiers.
    pub fn new_temp(&mut self, prog: &mut Program, ty: TypeId) -> SymId {
        loop {
            let name = format!("t{}", self.next_temp);
            self.next_temp += 1;
            if prog.scope(self.scope).symtab.lookup(&name).is_some() {
                continue;
            }
            let id = prog.syms.add(Symbol::new(&name, SymKind::Local, ty));
            prog.scope_mut(self.scope).symtab.add(&name, id);
            return id;
        }
    }

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    pub fn emit_label(&mut self, label: Label) {
        self.emit(Instr::new(
            Opcode::Label,
            Some(TacOp::Label(label)),
            None,
            None,
        ));
    }

    pub fn emit_goto(&mut self, label: Label) {
        self.emit(Instr::new(
            Opcode::Goto,
            Some(TacOp::Label(label)),
            None,
            None,
        ));
    }

    fn referenced_labels(&self) -> HashSet<Label> {
        self.instrs
            .iter()
            .filter_map(|i| i.branch_target())
            .collect()
    }

    /// Terminal control-flow cleanup:
    /// - drop instructions between an unconditional `Goto` and the next
    ///   referenced label (they are unreachable),
    /// - collapse `Goto L` immediately followed by `L:`.
    ///
    /// Runs to a fixed point; collapsing a goto can strand another label.
    pub fn cleanup(&mut self) {
        loop {
            let referenced = self.referenced_labels();
            let mut out: Vec<Instr> = Vec::with_capacity(self.instrs.len());
            let mut dead = false;
            let mut changed = false;

            for instr in self.instrs.drain(..) {
                if dead {
                    match instr.op {
                        Opcode::Label
                            if instr
                                .dest
                                .as_ref()
                                .and_then(|d| d.as_label())
                                .map(|l| referenced.contains(&l))
                                .unwrap_or(false) =>
                        {
                            dead = false;
                            out.push(instr);
                        }
                        _ => changed = true,
                    }
                    continue;
                }

                if instr.op == Opcode::Goto {
                    dead = true;
                }
                out.push(instr);
            }

            // collapse goto-to-next-label pairs
            let mut collapsed: Vec<Instr> = Vec::with_capacity(out.len());
            for instr in out {
                if instr.op == Opcode::Label {
                    let label = instr.dest.as_ref().and_then(|d| d.as_label());
                    if let (Some(last), Some(label)) = (collapsed.last(), label) {
                        if last.op == Opcode::Goto && last.branch_target() == Some(label) {
                            collapsed.pop();
                            changed = true;
                        }
                    }
                }
                collapsed.push(instr);
            }

            self.instrs = collapsed;
            if !changed {
                return;
            }
        }
    }
}

/// All code blocks of a compilation, indexed by scope.
#[derive(Debug)]
pub struct TacProgram {
    pub blocks: Vec<CodeBlock>,
}

impl TacProgram {
    pub fn block(&self, scope: ScopeId) -> &CodeBlock {
        &self.blocks[scope.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::MODULE_SCOPE;

    fn goto(l: Label) -> Instr {
        Instr::new(Opcode::Goto, Some(TacOp::Label(l)), None, None)
    }

    fn label(l: Label) -> Instr {
        Instr::new(Opcode::Label, Some(TacOp::Label(l)), None, None)
    }

    fn nop() -> Instr {
        Instr::new(Opcode::Nop, None, None, None)
    }

    #[test]
    fn cleanup_drops_unreachable_instructions() {
        let mut cb = CodeBlock::new(MODULE_SCOPE);
        let l1 = cb.new_label(None);
        let l2 = cb.new_label(None);

        cb.emit(goto(l2));
        cb.emit(nop()); // unreachable
        cb.emit_label(l1); // unreferenced, dropped with the dead region
        cb.emit(nop()); // still unreachable
        cb.emit_label(l2);
        cb.emit(nop());

        cb.cleanup();

        // the dead region between the goto and l2 is gone, and the goto
        // then collapses into the adjacent label
        assert_eq!(cb.instrs.len(), 2);
        assert_eq!(cb.instrs[0].op, Opcode::Label);
        assert_eq!(cb.instrs[1].op, Opcode::Nop);
    }

    #[test]
    fn cleanup_collapses_goto_to_next() {
        let mut cb = CodeBlock::new(MODULE_SCOPE);
        let l = cb.new_label(None);
        // l is also a real branch target elsewhere
        cb.emit(Instr::new(
            Opcode::Equal,
            Some(TacOp::Label(l)),
            Some(TacOp::Const {
                value: 0,
                ty: crate::types::TypeCtx::new().integer(),
            }),
            Some(TacOp::Const {
                value: 0,
                ty: crate::types::TypeCtx::new().integer(),
            }),
        ));
        cb.emit(goto(l));
        cb.emit(label(l));
        cb.emit(nop());

        cb.cleanup();

        assert!(cb.instrs.iter().all(|i| i.op != Opcode::Goto));
        assert_eq!(cb.instrs[1].op, Opcode::Label);
    }

    #[test]
    fn labels_are_unique_and_named() {
        let mut cb = CodeBlock::new(MODULE_SCOPE);
        let a = cb.new_label(None);
        let b = cb.new_label(Some("if_true"));
        assert_ne!(a.id, b.id);
        assert_eq!(label_name("main", a), "l_main_1");
        assert_eq!(label_name("f", b), "l_f_2_if_true");
    }
}
