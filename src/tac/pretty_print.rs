//! Readable rendering of TAC instructions.
//!
//! Operand names live in the symbol arena, so rendering needs the program;
//! this is used for the instruction comments in the emitted assembly and
//! for debug logging.

use crate::ast::Program;
use crate::tac::tac_def::{label_name, CodeBlock, Instr, Opcode, TacOp};

pub fn opcode_str(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "add",
        Opcode::Sub => "sub",
        Opcode::Mul => "mul",
        Opcode::Div => "div",
        Opcode::Neg => "neg",
        Opcode::Pos => "pos",
        Opcode::Assign => "assign",
        Opcode::Address => "&()",
        Opcode::Goto => "goto",
        Opcode::Equal => "=",
        Opcode::NotEqual => "#",
        Opcode::LessThan => "<",
        Opcode::LessEqual => "<=",
        Opcode::BiggerThan => ">",
        Opcode::BiggerEqual => ">=",
        Opcode::Call => "call",
        Opcode::Return => "return",
        Opcode::Param => "param",
        Opcode::Label => "label",
        Opcode::Nop => "nop",
    }
}

pub fn operand_to_string(prog: &Program, scope_name: &str, op: &TacOp) -> String {
    match op {
        TacOp::Const { value, .. } => value.to_string(),
        TacOp::Name(sym) => prog.sym(*sym).name.clone(),
        TacOp::Reference { holder, .. } => format!("@{}", prog.sym(*holder).name),
        TacOp::Label(l) => label_name(scope_name, *l),
    }
}

pub fn instr_to_string(prog: &Program, cb: &CodeBlock, instr: &Instr) -> String {
    let scope_name = &prog.scope(cb.scope).name;
    let opnd = |o: &Option<TacOp>| {
        o.as_ref()
            .map(|o| operand_to_string(prog, scope_name, o))
            .unwrap_or_default()
    };

    match instr.op {
        Opcode::Label => format!("{}:", opnd(&instr.dest)),
        Opcode::Goto => format!("goto {}", opnd(&instr.dest)),
        Opcode::Nop => "nop".to_string(),
        Opcode::Return => {
            if instr.src1.is_some() {
                format!("return {}", opnd(&instr.src1))
            } else {
                "return".to_string()
            }
        }
        Opcode::Param => format!("param {} <- {}", opnd(&instr.dest), opnd(&instr.src1)),
        Opcode::Call => {
            if instr.dest.is_some() {
                format!("{} <- call {}", opnd(&instr.dest), opnd(&instr.src1))
            } else {
                format!("call {}", opnd(&instr.src1))
            }
        }
        op if op.is_relational() => format!(
            "if {} {} {} goto {}",
            opnd(&instr.src1),
            opcode_str(op),
            opnd(&instr.src2),
            opnd(&instr.dest)
        ),
        Opcode::Assign => format!("{} <- {}", opnd(&instr.dest), opnd(&instr.src1)),
        Opcode::Address => format!("{} <- &{}", opnd(&instr.dest), opnd(&instr.src1)),
        Opcode::Neg | Opcode::Pos => format!(
            "{} <- {} {}",
            opnd(&instr.dest),
            opcode_str(instr.op),
            opnd(&instr.src1)
        ),
        _ => format!(
            "{} <- {} {} {}",
            opnd(&instr.dest),
            opnd(&instr.src1),
            opcode_str(instr.op),
            opnd(&instr.src2)
        ),
    }
}
