//! AMD64 instruction selection and assembly emission.
//!
//! One-to-few selection per TAC opcode through two fixed scratch registers
//! (`rax`, `rbx`). `Reference` operands resolve through `r15`: the holder's
//! value is fetched first and the memory access goes through `(%r15)`.
//! Output is GNU assembler syntax; every TAC instruction is echoed as a
//! comment next to its first machine instruction.

use std::fmt::Write as _;

use crate::ast::{Program, ScopeId, MODULE_SCOPE};
use crate::symbol::{Storage, SymData, SymId, SymKind};
use crate::tac::pretty_print;
use crate::tac::tac_def::{label_name, CodeBlock, Instr, Opcode, TacOp, TacProgram};
use crate::types::Ty;

use super::frame::StackFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R15,
}

impl Reg {
    fn name(self, size: u32) -> &'static str {
        match (self, size) {
            (Reg::Rax, 8) => "rax",
            (Reg::Rax, 4) => "eax",
            (Reg::Rax, 2) => "ax",
            (Reg::Rax, 1) => "al",
            (Reg::Rbx, 8) => "rbx",
            (Reg::Rbx, 4) => "ebx",
            (Reg::Rbx, 2) => "bx",
            (Reg::Rbx, 1) => "bl",
            (Reg::Rcx, 8) => "rcx",
            (Reg::Rcx, 4) => "ecx",
            (Reg::Rcx, 2) => "cx",
            (Reg::Rcx, 1) => "cl",
            (Reg::Rdx, 8) => "rdx",
            (Reg::Rdx, 4) => "edx",
            (Reg::Rdx, 2) => "dx",
            (Reg::Rdx, 1) => "dl",
            (Reg::Rsi, 8) => "rsi",
            (Reg::Rsi, 4) => "esi",
            (Reg::Rsi, 2) => "si",
            (Reg::Rsi, 1) => "sil",
            (Reg::Rdi, 8) => "rdi",
            (Reg::Rdi, 4) => "edi",
            (Reg::Rdi, 2) => "di",
            (Reg::Rdi, 1) => "dil",
            (Reg::R8, 8) => "r8",
            (Reg::R8, 4) => "r8d",
            (Reg::R8, 2) => "r8w",
            (Reg::R8, 1) => "r8b",
            (Reg::R9, 8) => "r9",
            (Reg::R9, 4) => "r9d",
            (Reg::R9, 2) => "r9w",
            (Reg::R9, 1) => "r9b",
            (Reg::R15, 8) => "r15",
            (Reg::R15, 4) => "r15d",
            (Reg::R15, 2) => "r15w",
            (Reg::R15, 1) => "r15b",
            _ => panic!("no register name for size {}", size),
        }
    }
}

/// System V integer argument registers, in index order.
const PARAM_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

const IND: &str = "    ";

pub struct Backend<'p> {
    prog: &'p Program,
    tac: &'p TacProgram,
    frames: &'p [StackFrame],
    out: String,
}

impl<'p> Backend<'p> {
    pub fn new(prog: &'p Program, tac: &'p TacProgram, frames: &'p [StackFrame]) -> Self {
        Self {
            prog,
            tac,
            frames,
            out: String::new(),
        }
    }

    pub fn run(mut self) -> String {
        self.emit_header();
        self.emit_code();
        self.emit_data();
        self.emit_footer();
        self.out
    }

    //
    // sections
    //

    fn emit_header(&mut self) {
        let name = &self.prog.scope(MODULE_SCOPE).name;
        let _ = writeln!(self.out, "##################################################");
        let _ = writeln!(self.out, "# {}", name);
        let _ = writeln!(self.out, "#");
        self.blank();
    }

    fn emit_code(&mut self) {
        self.raw(&format!("{IND}#-----------------------------------------"));
        self.raw(&format!("{IND}# text section"));
        self.raw(&format!("{IND}#"));
        self.raw(&format!("{IND}.text"));
        self.raw(&format!("{IND}.align 8"));
        self.blank();
        self.raw(&format!("{IND}# entry point"));
        self.raw(&format!("{IND}.global main"));
        self.blank();

        self.raw(&format!("{IND}# external subroutines"));
        for &id in self.prog.scope(MODULE_SCOPE).symtab.symbols() {
            let sym = self.prog.sym(id);
            if sym.is_external() {
                self.raw(&format!("{IND}.extern {}", sym.name));
            }
        }
        self.blank();
        self.blank();

        // subroutines first, the module body last
        let children = self.prog.scope(MODULE_SCOPE).children.clone();
        for scope in children {
            self.emit_scope(scope);
        }
        self.emit_scope(MODULE_SCOPE);

        self.raw(&format!("{IND}# end of text section"));
        self.raw(&format!("{IND}#-----------------------------------------"));
        self.blank();
    }

    fn emit_scope(&mut self, scope: ScopeId) {
        let node = self.prog.scope(scope);
        let label = if node.parent.is_none() {
            "main"
        } else {
            node.name.as_str()
        };
        let frame = self.frames[scope.0 as usize].clone();

        self.raw(&format!("{IND}# scope {}", node.name));
        self.raw(&format!("{}:", label));

        // prologue: save callee-saved registers, set up rbp, carve the
        // frame, align rsp for the calls below us
        self.raw(&format!("{IND}# prologue"));
        self.instr("pushq", "%rbx", "save callee saved registers");
        self.instr("pushq", "%r12", "");
        self.instr("pushq", "%r13", "");
        self.instr("pushq", "%r14", "");
        self.instr("pushq", "%r15", "");
        self.instr("pushq", "%rbp", "");
        self.instr("movq", "%rsp, %rbp", "");
        self.instr(
            "subq",
            &format!("${}, %rsp", frame.rsp_adjustment()),
            "",
        );
        self.instr("andq", "$-16, %rsp", "align to 16 bytes");

        // spill register parameters into their slots
        if let Some(decl) = self.prog.scope(scope).decl {
            if let SymKind::Procedure { params, .. } = &self.prog.sym(decl).kind {
                let n = params.len().min(6);
                let mut comment = "store parameters to stack";
                for i in (0..n).rev() {
                    self.store(scope, &TacOp::Name(params[i]), PARAM_REGS[i], comment);
                    comment = "";
                }
            }
        }

        // zero the locals and the argument build area
        let zero_size = frame.local_variables + frame.argument_build;
        if zero_size > 0 {
            self.instr("cld", "", "zero out local variables");
            self.instr("xorq", "%rax, %rax", "");
            self.instr("movl", &format!("${}, %ecx", zero_size / 8), "");
            self.instr("movq", "%rsp, %rdi", "");
            self.instr("rep", "stosq", "");
        }

        self.emit_local_data(scope);
        self.blank();

        self.raw(&format!("{IND}# function body"));
        let cb = self.tac.block(scope);
        for i in &cb.instrs {
            self.emit_tac_instr(scope, &frame, cb, i);
        }
        self.blank();

        self.raw(&format!("{}{}:", IND, self.exit_label(scope)));
        self.raw(&format!("{IND}# epilogue"));
        self.instr("leave", "", "");
        self.instr("popq", "%r15", "");
        self.instr("popq", "%r14", "");
        self.instr("popq", "%r13", "");
        self.instr("popq", "%r12", "");
        self.instr("popq", "%rbx", "");
        self.instr("ret", "", "");
        self.blank();
    }

    /// Initialize the headers of local arrays in place: dimension count,
    /// then one element count per dimension.
    fn emit_local_data(&mut self, scope: ScopeId) {
        for &id in self.prog.scope(scope).symtab.symbols() {
            let sym = self.prog.sym(id);
            if !matches!(sym.kind, SymKind::Local) {
                continue;
            }
            if !matches!(self.prog.types.get(sym.ty), Ty::Array { .. }) {
                continue;
            }

            let dims = self.prog.types.dims(sym.ty);
            self.instr(
                "movl",
                &format!("${}, {}", dims.len(), self.location(id, 0)),
                "",
            );
            for (d, nelem) in dims.iter().enumerate() {
                let nelem = nelem.expect("local arrays have concrete dimensions");
                self.instr(
                    "movl",
                    &format!("${}, {}", nelem, self.location(id, 4 * (d as i64 + 1))),
                    "",
                );
            }
        }
    }

    //
    // instruction selection
    //

    fn emit_tac_instr(&mut self, scope: ScopeId, frame: &StackFrame, cb: &CodeBlock, i: &Instr) {
        let cmt = pretty_print::instr_to_string(self.prog, cb, i);

        match i.op {
            Opcode::Add | Opcode::Sub => {
                self.load(scope, Reg::Rax, i.src1.as_ref().unwrap(), &cmt);
                self.load(scope, Reg::Rbx, i.src2.as_ref().unwrap(), "");
                let mnm = if i.op == Opcode::Add { "addq" } else { "subq" };
                self.instr(mnm, "%rbx, %rax", "");
                self.store(scope, i.dest.as_ref().unwrap(), Reg::Rax, "");
            }

            Opcode::Mul => {
                self.load(scope, Reg::Rax, i.src1.as_ref().unwrap(), &cmt);
                self.load(scope, Reg::Rbx, i.src2.as_ref().unwrap(), "");
                self.instr("imulq", "%rbx", "");
                self.store(scope, i.dest.as_ref().unwrap(), Reg::Rax, "");
            }

            Opcode::Div => {
                self.load(scope, Reg::Rax, i.src1.as_ref().unwrap(), &cmt);
                self.load(scope, Reg::Rbx, i.src2.as_ref().unwrap(), "");
                self.instr("cdq", "", "");
                self.instr("idivq", "%rbx", "");
                self.store(scope, i.dest.as_ref().unwrap(), Reg::Rax, "");
            }

            Opcode::Neg => {
                self.load(scope, Reg::Rax, i.src1.as_ref().unwrap(), &cmt);
                self.instr("negq", "%rax", "");
                self.store(scope, i.dest.as_ref().unwrap(), Reg::Rax, "");
            }

            // unary plus is a plain move
            Opcode::Pos | Opcode::Assign => {
                self.load(scope, Reg::Rax, i.src1.as_ref().unwrap(), &cmt);
                self.store(scope, i.dest.as_ref().unwrap(), Reg::Rax, "");
            }

            Opcode::Address => {
                let opnd = self.operand(scope, i.src1.as_ref().unwrap());
                self.instr("leaq", &format!("{}, %rax", opnd), &cmt);
                self.store(scope, i.dest.as_ref().unwrap(), Reg::Rax, "");
            }

            Opcode::Goto => {
                let target = self.operand(scope, i.dest.as_ref().unwrap());
                self.instr("jmp", &target, &cmt);
            }

            Opcode::Equal
            | Opcode::NotEqual
            | Opcode::LessThan
            | Opcode::LessEqual
            | Opcode::BiggerThan
            | Opcode::BiggerEqual => {
                self.load(scope, Reg::Rax, i.src1.as_ref().unwrap(), &cmt);
                self.load(scope, Reg::Rbx, i.src2.as_ref().unwrap(), "");
                self.instr("cmp", "%rbx, %rax", "");
                let target = self.operand(scope, i.dest.as_ref().unwrap());
                self.instr(&format!("j{}", condition(i.op)), &target, "");
            }

            Opcode::Call => {
                let target = self.operand(scope, i.src1.as_ref().unwrap());
                self.instr("call", &target, &cmt);
                if let Some(dest) = &i.dest {
                    self.store(scope, dest, Reg::Rax, "");
                }
            }

            Opcode::Return => {
                let mut cmt = cmt.as_str();
                if let Some(src) = &i.src1 {
                    self.load(scope, Reg::Rax, src, cmt);
                    cmt = "";
                }
                let exit = self.exit_label(scope);
                self.instr("jmp", &exit, cmt);
            }

            Opcode::Param => {
                let index = match i.dest.as_ref().unwrap() {
                    TacOp::Const { value, .. } => *value as usize,
                    _ => panic!("param index must be a constant"),
                };
                if index < 6 {
                    self.load(scope, PARAM_REGS[index], i.src1.as_ref().unwrap(), &cmt);
                } else {
                    self.load(scope, Reg::Rax, i.src1.as_ref().unwrap(), &cmt);
                    let slot = TacOp::Name(frame.argbuild[index - 6]);
                    self.store(scope, &slot, Reg::Rax, "");
                }
            }

            Opcode::Label => {
                let l = i.dest.as_ref().and_then(|d| d.as_label()).unwrap();
                let name = label_name(&self.prog.scope(scope).name, l);
                self.raw(&format!("{}:", name));
            }

            Opcode::Nop => {
                self.instr("nop", "", &cmt);
            }
        }
    }

    //
    // operand handling
    //

    /// Load `src` into the 64-bit form of `dst`, widening by operand size.
    fn load(&mut self, scope: ScopeId, dst: Reg, src: &TacOp, comment: &str) {
        let size = self.operand_size(src);
        let modifier = match size {
            1 => "zbq",
            2 => "zwq",
            4 => "slq",
            8 => "q",
            _ => panic!("data type not supported by this backend"),
        };
        let opnd = self.operand(scope, src);
        self.instr(
            &format!("mov{}", modifier),
            &format!("{}, %{}", opnd, dst.name(8)),
            comment,
        );
    }

    /// Store the sized form of `src` into `dst`.
    fn store(&mut self, scope: ScopeId, dst: &TacOp, src: Reg, comment: &str) {
        let size = self.operand_size(dst);
        let modifier = match size {
            1 => "b",
            2 => "w",
            4 => "l",
            8 => "q",
            _ => panic!("data type not supported by this backend"),
        };
        let opnd = self.operand(scope, dst);
        self.instr(
            &format!("mov{}", modifier),
            &format!("%{}, {}", src.name(size), opnd),
            comment,
        );
    }

    /// Render an operand. References load the held address into `r15`
    /// first and hand back `(%r15)` as the memory operand.
    fn operand(&mut self, scope: ScopeId, op: &TacOp) -> String {
        match op {
            TacOp::Const { value, .. } => format!("${}", value),
            TacOp::Reference { holder, .. } => {
                let loc = self.location(*holder, 0);
                self.instr("movq", &format!("{}, %r15", loc), "");
                "(%r15)".to_string()
            }
            TacOp::Name(sym) => self.location(*sym, 0),
            TacOp::Label(l) => label_name(&self.prog.scope(scope).name, *l),
        }
    }

    fn location(&self, sym: SymId, ofs: i64) -> String {
        let s = self.prog.sym(sym);
        match &s.location {
            Storage::Undefined => panic!("undefined storage location for '{}'", s.name),
            Storage::Absolute { label } => label.clone(),
            Storage::Relative { base, offset } => {
                if offset + ofs != 0 {
                    format!("{}(%{})", offset + ofs, base)
                } else {
                    format!("(%{})", base)
                }
            }
            Storage::Register { name } => format!("%{}", name),
            Storage::LabelRelative { label } => format!("{}(%rip)", label),
        }
    }

    /// Operand size in bytes. Immediates count as 8 bytes; references are
    /// sized by the element type of the array they point into.
    fn operand_size(&self, op: &TacOp) -> u32 {
        match op {
            TacOp::Const { .. } => 8,
            TacOp::Reference { deref, .. } => {
                let mut ty = self.prog.sym(*deref).ty;
                if let Some(p) = self.prog.types.pointee(ty) {
                    ty = p;
                }
                let base = self.prog.types.base_type(ty);
                self.prog.types.data_size(base)
            }
            TacOp::Name(sym) => {
                let ty = self.prog.sym(*sym).ty;
                if matches!(self.prog.types.get(ty), Ty::Array { .. }) {
                    panic!("array value has no operand size");
                }
                self.prog.types.data_size(ty)
            }
            TacOp::Label(_) => panic!("labels have no operand size"),
        }
    }

    fn exit_label(&self, scope: ScopeId) -> String {
        format!("l_{}_exit", self.prog.scope(scope).name)
    }

    //
    // data sections
    //

    fn emit_data(&mut self) {
        self.raw(&format!("{IND}#-----------------------------------------"));
        self.raw(&format!("{IND}# global data section"));
        self.raw(&format!("{IND}#"));
        self.raw(&format!("{IND}.data"));
        self.raw(&format!("{IND}.align 8"));
        self.blank();

        self.emit_global_data(MODULE_SCOPE);

        self.raw(&format!("{IND}# end of global data section"));
        self.raw(&format!("{IND}#-----------------------------------------"));
        self.blank();
    }

    fn emit_global_data(&mut self, scope: ScopeId) {
        let symbols = self.prog.scope(scope).symtab.symbols().to_vec();
        let mut header = false;
        let mut size: u32 = 0;

        for id in symbols {
            let sym = self.prog.sym(id);
            if !matches!(sym.kind, SymKind::Global) {
                continue;
            }

            if !header {
                self.raw(&format!("{IND}# scope: {}", self.prog.scope(scope).name));
                header = true;
            }

            let ty = sym.ty;
            let align = self.prog.types.align(ty);
            if align > 1 && size % align != 0 {
                size += align - size % align;
                self.instr(".align", &align.to_string(), "");
            }

            self.raw(&format!(
                "{:<36}# {}",
                format!("{}:", sym.name),
                self.prog.types.name(ty)
            ));

            if matches!(self.prog.types.get(ty), Ty::Array { .. }) {
                let dims = self.prog.types.dims(ty);
                self.instr(".long", &dims.len().to_string(), "dimensions");
                for (d, nelem) in dims.iter().enumerate() {
                    let n = nelem.expect("global arrays have concrete dimensions");
                    self.instr(".long", &n.to_string(), &format!("dimension {}", d + 1));
                }
                if dims.len() % 2 == 0 {
                    // element data is 8-byte aligned after the header
                    self.instr(".skip", "4", "pad");
                }
            }

            match &self.prog.sym(id).data {
                SymData::Str(s) => {
                    self.instr(".asciz", &format!("\"{}\"", crate::token::escape(s)), "");
                }
                SymData::None => {
                    self.instr(".skip", &self.prog.types.data_size(ty).to_string(), "");
                }
            }

            size += self.prog.types.size(ty);
        }

        self.blank();
    }

    fn emit_footer(&mut self) {
        self.raw(&format!("{IND}# identifier and stack options"));
        self.raw(&format!("{IND}.ident \"snuplc\""));
        self.raw(&format!("{IND}.section .note.GNU-stack,\"\",@progbits"));
        self.blank();
        self.raw(&format!("{IND}.end"));
        self.raw("##################################################");
    }

    //
    // output helpers
    //

    fn instr(&mut self, mnemonic: &str, args: &str, comment: &str) {
        let has_args = !args.is_empty();
        let has_comment = !comment.is_empty();

        let mut line = String::from(IND);
        if has_args || has_comment {
            let _ = write!(line, "{:<7} ", mnemonic);
            if has_comment {
                let _ = write!(line, "{:<23} # {}", args, comment);
            } else {
                line.push_str(args);
            }
        } else {
            line.push_str(mnemonic);
        }

        self.out.push_str(line.trim_end());
        self.out.push('\n');
    }

    fn raw(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }
}

fn condition(op: Opcode) -> &'static str {
    match op {
        Opcode::Equal => "e",
        Opcode::NotEqual => "ne",
        Opcode::LessThan => "l",
        Opcode::LessEqual => "le",
        Opcode::BiggerThan => "g",
        Opcode::BiggerEqual => "ge",
        _ => panic!("not a condition"),
    }
}
