//! AST → TAC lowering.
//!
//! Expressions lower in one of two contexts: value context produces an
//! operand holding the result, branch context emits code that transfers to
//! one of two labels. Boolean operators only ever lower in branch context,
//! so `and`/`or`/`not` never surface as TAC opcodes.
//!
//! Array designators are lowered by synthesizing the address computation
//! `base + offset * element_size + DOFS(base)` as ordinary AST nodes
//! (with `DIM(base, k)` calls for the inner dimensions) and handing the
//! tree to the normal value lowering; integer arithmetic is implemented
//! exactly once that way.

use crate::ast::{ArrayDesignator, CallExpr, Expr, Op, Program, ScopeId, Stmt, MODULE_SCOPE};
use crate::symbol::{SymId, SymKind, SymScope};
use crate::tac::tac_def::{CodeBlock, Instr, Label, Opcode, TacOp};
use crate::token::Token;

pub fn lower_scope(prog: &mut Program, scope: ScopeId) -> CodeBlock {
    let dim = prog
        .find_symbol(MODULE_SCOPE, "DIM", SymScope::Local)
        .expect("runtime symbol DIM");
    let dofs = prog
        .find_symbol(MODULE_SCOPE, "DOFS", SymScope::Local)
        .expect("runtime symbol DOFS");

    let body = prog.scope(scope).body.clone();
    let mut gen = Generator {
        prog,
        cb: CodeBlock::new(scope),
        dim,
        dofs,
    };

    for stmt in &body {
        gen.lower_stmt(stmt);
    }

    gen.cb.cleanup();
    gen.cb
}

struct Generator<'p> {
    prog: &'p mut Program,
    cb: CodeBlock,
    dim: SymId,
    dofs: SymId,
}

impl<'p> Generator<'p> {
    /// Lower one statement with its own fresh join label.
    fn lower_stmt(&mut self, stmt: &Stmt) {
        let next = self.cb.new_label(None);
        self.stmt_to_tac(stmt, next);
        self.cb.emit_label(next);
    }

    fn stmt_to_tac(&mut self, stmt: &Stmt, next: Label) {
        match stmt {
            Stmt::Assign { lhs, rhs, .. } => {
                let r = self.expr_value(rhs);
                let l = self.expr_value(lhs);
                self.cb
                    .emit(Instr::new(Opcode::Assign, Some(l), Some(r), None));
                self.cb.emit_goto(next);
            }

            Stmt::Call { call, .. } => {
                self.call_value(call);
                self.cb.emit_goto(next);
            }

            Stmt::Return { expr, .. } => {
                let v = expr.as_ref().map(|e| self.expr_value(e));
                self.cb.emit(Instr::new(Opcode::Return, None, v, None));
                // fall-through is irrelevant after a return
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let lt = self.cb.new_label(Some("if_true"));
                let lf = self.cb.new_label(Some("if_false"));

                self.expr_branch(cond, lt, lf);

                self.cb.emit_label(lt);
                for s in then_body {
                    self.lower_stmt(s);
                }
                self.cb.emit_goto(next);

                self.cb.emit_label(lf);
                for s in else_body {
                    self.lower_stmt(s);
                }
                self.cb.emit_goto(next);
            }

            Stmt::While { cond, body, .. } => {
                let lc = self.cb.new_label(Some("while_cond"));
                let lb = self.cb.new_label(Some("while_body"));

                self.cb.emit_label(lc);
                self.expr_branch(cond, lb, next);

                self.cb.emit_label(lb);
                for s in body {
                    self.lower_stmt(s);
                }
                self.cb.emit_goto(lc);
            }
        }
    }

    //
    // value context
    //

    fn expr_value(&mut self, e: &Expr) -> TacOp {
        match e {
            Expr::Constant { ty, value, .. } => TacOp::Const {
                value: *value,
                ty: *ty,
            },

            Expr::StringConst { sym, .. } => TacOp::Name(*sym),

            Expr::Designator { sym, .. } => match self.prog.sym(*sym).kind {
                // scalar constants fold to immediates
                SymKind::Constant { value } => TacOp::Const {
                    value,
                    ty: self.prog.sym(*sym).ty,
                },
                _ => TacOp::Name(*sym),
            },

            Expr::ArrayDesignator(ad) => {
                let holder = self.array_address(ad);
                TacOp::Reference {
                    holder,
                    deref: ad.sym,
                }
            }

            Expr::Binary { op, lhs, rhs, .. } => {
                if matches!(op, Op::And | Op::Or) || op.is_relational() {
                    return self.bool_value(e);
                }
                let ty = e.ty(self.prog);
                let v1 = self.expr_value(lhs);
                let v2 = self.expr_value(rhs);
                let d = self.cb.new_temp(self.prog, ty);
                let opc = match op {
                    Op::Add => Opcode::Add,
                    Op::Sub => Opcode::Sub,
                    Op::Mul => Opcode::Mul,
                    Op::Div => Opcode::Div,
                    _ => unreachable!("boolean operator in arithmetic lowering"),
                };
                self.cb
                    .emit(Instr::new(opc, Some(TacOp::Name(d)), Some(v1), Some(v2)));
                TacOp::Name(d)
            }

            Expr::Unary { op, operand, .. } => {
                if *op == Op::Not {
                    return self.bool_value(e);
                }
                let ty = e.ty(self.prog);
                let v = self.expr_value(operand);
                let d = self.cb.new_temp(self.prog, ty);
                let opc = if *op == Op::Neg { Opcode::Neg } else { Opcode::Pos };
                self.cb
                    .emit(Instr::new(opc, Some(TacOp::Name(d)), Some(v), None));
                TacOp::Name(d)
            }

            Expr::Special {
                op: Op::Address,
                ty,
                operand,
                ..
            } => match operand.as_ref() {
                // an array designator already computes an address
                Expr::ArrayDesignator(ad) => TacOp::Name(self.array_address(ad)),
                Expr::Designator { sym, .. } | Expr::StringConst { sym, .. } => {
                    let d = self.cb.new_temp(self.prog, *ty);
                    self.cb.emit(Instr::new(
                        Opcode::Address,
                        Some(TacOp::Name(d)),
                        Some(TacOp::Name(*sym)),
                        None,
                    ));
                    TacOp::Name(d)
                }
                _ => panic!("cannot take the address of this operand"),
            },

            Expr::Special { .. } => unreachable!("unknown special operation"),

            Expr::Call(call) => self
                .call_value(call)
                .expect("procedure without return value used as expression"),
        }
    }

    /// Materialize a boolean expression as a value: branch into two stubs
    /// assigning 1/0 to a fresh temporary that both jump to a join label.
    fn bool_value(&mut self, e: &Expr) -> TacOp {
        let lt = self.cb.new_label(None);
        let lf = self.cb.new_label(None);
        let join = self.cb.new_label(None);
        let bt = self.prog.types.boolean();
        let d = self.cb.new_temp(self.prog, bt);

        self.expr_branch(e, lt, lf);

        self.cb.emit_label(lt);
        self.cb.emit(Instr::new(
            Opcode::Assign,
            Some(TacOp::Name(d)),
            Some(TacOp::Const { value: 1, ty: bt }),
            None,
        ));
        self.cb.emit_goto(join);

        self.cb.emit_label(lf);
        self.cb.emit(Instr::new(
            Opcode::Assign,
            Some(TacOp::Name(d)),
            Some(TacOp::Const { value: 0, ty: bt }),
            None,
        ));
        self.cb.emit_goto(join);

        self.cb.emit_label(join);
        TacOp::Name(d)
    }

    //
    // branch context
    //

    fn expr_branch(&mut self, e: &Expr, ltrue: Label, lfalse: Label) {
        match e {
            Expr::Binary { op: Op::And, lhs, rhs, .. } => {
                let mid = self.cb.new_label(None);
                self.expr_branch(lhs, mid, lfalse);
                self.cb.emit_label(mid);
                self.expr_branch(rhs, ltrue, lfalse);
            }

            Expr::Binary { op: Op::Or, lhs, rhs, .. } => {
                let mid = self.cb.new_label(None);
                self.expr_branch(lhs, ltrue, mid);
                self.cb.emit_label(mid);
                self.expr_branch(rhs, ltrue, lfalse);
            }

            Expr::Binary { op, lhs, rhs, .. } if op.is_relational() => {
                let v1 = self.expr_value(lhs);
                let v2 = self.expr_value(rhs);
                self.cb.emit(Instr::new(
                    relational_opcode(*op),
                    Some(TacOp::Label(ltrue)),
                    Some(v1),
                    Some(v2),
                ));
                self.cb.emit_goto(lfalse);
            }

            Expr::Unary { op: Op::Not, operand, .. } => {
                self.expr_branch(operand, lfalse, ltrue);
            }

            Expr::Constant { value, .. } => {
                self.cb.emit_goto(if *value != 0 { ltrue } else { lfalse });
            }

            // boolean designators, array elements, and function results:
            // compare the value against true
            _ => {
                let bt = self.prog.types.boolean();
                let v = self.expr_value(e);
                self.cb.emit(Instr::new(
                    Opcode::Equal,
                    Some(TacOp::Label(ltrue)),
                    Some(v),
                    Some(TacOp::Const { value: 1, ty: bt }),
                ));
                self.cb.emit_goto(lfalse);
            }
        }
    }

    //
    // calls
    //

    /// Evaluate arguments left to right, then emit `Param` instructions in
    /// reverse index order (preserves push semantics when earlier arguments
    /// alias later ones).
    fn call_value(&mut self, call: &CallExpr) -> Option<TacOp> {
        let mut vals = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            vals.push(self.expr_value(arg));
        }

        let int = self.prog.types.integer();
        for (i, v) in vals.into_iter().enumerate().rev() {
            self.cb.emit(Instr::new(
                Opcode::Param,
                Some(TacOp::Const {
                    value: i as i64,
                    ty: int,
                }),
                Some(v),
                None,
            ));
        }

        let ret_ty = self.prog.sym(call.sym).ty;
        if ret_ty == self.prog.types.null() {
            self.cb.emit(Instr::new(
                Opcode::Call,
                None,
                Some(TacOp::Name(call.sym)),
                None,
            ));
            None
        } else {
            let d = self.cb.new_temp(self.prog, ret_ty);
            self.cb.emit(Instr::new(
                Opcode::Call,
                Some(TacOp::Name(d)),
                Some(TacOp::Name(call.sym)),
                None,
            ));
            Some(TacOp::Name(d))
        }
    }

    //
    // array addressing
    //

    /// Compute the address of an array element (or sub-array) into a fresh
    /// temporary and return its symbol.
    fn array_address(&mut self, ad: &ArrayDesignator) -> SymId {
        let tok = ad.token.clone();
        let sym_ty = self.prog.sym(ad.sym).ty;

        // the base address: the symbol itself when it is already a pointer,
        // its address otherwise
        let (base, arr_ty) = match self.prog.types.pointee(sym_ty) {
            Some(p) => (
                Expr::Designator {
                    token: tok.clone(),
                    sym: ad.sym,
                },
                p,
            ),
            None => {
                let pty = self.prog.types.pointer(sym_ty);
                (
                    Expr::Special {
                        token: tok.clone(),
                        op: Op::Address,
                        ty: pty,
                        operand: Box::new(Expr::Designator {
                            token: tok.clone(),
                            sym: ad.sym,
                        }),
                    },
                    sym_ty,
                )
            }
        };

        let int = self.prog.types.integer();
        let ndim = self.prog.types.ndim(arr_ty);
        let elem_size = {
            let base_ty = self.prog.types.base_type(arr_ty);
            self.prog.types.data_size(base_ty)
        };

        // linearize the indices left to right; the first dimension drops
        // out, the remaining extents come from DIM at run time
        let mut off = ad.indices[0].clone();
        for k in 1..ad.indices.len() as u32 {
            off = bin(Op::Mul, off, self.dim_call(&tok, &base, k + 1), &tok);
            off = bin(Op::Add, off, ad.indices[k as usize].clone(), &tok);
        }
        // scale through any unindexed trailing dimensions (sub-array access)
        for k in ad.indices.len() as u32..ndim {
            off = bin(Op::Mul, off, self.dim_call(&tok, &base, k + 1), &tok);
        }

        let off_bytes = bin(
            Op::Mul,
            off,
            Expr::Constant {
                token: tok.clone(),
                ty: int,
                value: elem_size as i64,
            },
            &tok,
        );

        let dofs = Expr::Call(CallExpr {
            token: tok.clone(),
            sym: self.dofs,
            args: vec![base.clone()],
        });

        let addr = bin(Op::Add, bin(Op::Add, base, off_bytes, &tok), dofs, &tok);

        match self.expr_value(&addr) {
            TacOp::Name(sym) => sym,
            _ => unreachable!("address computation yields a temporary"),
        }
    }

    fn dim_call(&self, tok: &Token, base: &Expr, k: u32) -> Expr {
        let int = self.prog.types.integer();
        Expr::Call(CallExpr {
            token: tok.clone(),
            sym: self.dim,
            args: vec![
                base.clone(),
                Expr::Constant {
                    token: tok.clone(),
                    ty: int,
                    value: k as i64,
                },
            ],
        })
    }
}

fn relational_opcode(op: Op) -> Opcode {
    match op {
        Op::Equal => Opcode::Equal,
        Op::NotEqual => Opcode::NotEqual,
        Op::LessThan => Opcode::LessThan,
        Op::LessEqual => Opcode::LessEqual,
        Op::BiggerThan => Opcode::BiggerThan,
        Op::BiggerEqual => Opcode::BiggerEqual,
        _ => unreachable!("not a relational operator"),
    }
}

fn bin(op: Op, lhs: Expr, rhs: Expr, tok: &Token) -> Expr {
    Expr::Binary {
        token: tok.clone(),
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::MODULE_SCOPE;
    use crate::parser::parse;
    use crate::tac::tac_def::TacProgram;

    fn lower(src: &str) -> (Program, TacProgram) {
        let mut prog = parse(src).unwrap();
        crate::semantic_analysis::analyse(&prog).unwrap();
        let tac = crate::tac::generate_tac(&mut prog);
        (prog, tac)
    }

    fn opcodes(tac: &TacProgram, scope: ScopeId) -> Vec<Opcode> {
        tac.block(scope).instrs.iter().map(|i| i.op).collect()
    }

    #[test]
    fn assignment_lowers_to_assign_opcode() {
        let (_, tac) = lower("module M; var x: integer; begin x := 1 + 2 end M.");
        let ops = opcodes(&tac, MODULE_SCOPE);
        assert!(ops.contains(&Opcode::Add));
        assert!(ops.contains(&Opcode::Assign));
    }

    #[test]
    fn no_boolean_opcodes_in_tac() {
        let (_, tac) = lower(
            "module M;
             var a, b, c: boolean;
             begin
                c := (a && b) || !a;
                if (a || (b && !c)) then c := true end
             end M.",
        );
        // the opcode set simply has no And/Or/Not members; every opcode in
        // the block must be one of the lowered forms
        for i in &tac.block(MODULE_SCOPE).instrs {
            assert!(matches!(
                i.op,
                Opcode::Assign
                    | Opcode::Goto
                    | Opcode::Equal
                    | Opcode::Label
                    | Opcode::NotEqual
            ));
        }
    }

    #[test]
    fn param_indices_are_emitted_in_reverse() {
        let (_, tac) = lower(
            "module M;
             function f(a, b, c: integer): integer;
             begin return a end f;
             var x: integer;
             begin x := f(1, 2, 3) end M.",
        );
        let params: Vec<i64> = tac
            .block(MODULE_SCOPE)
            .instrs
            .iter()
            .filter(|i| i.op == Opcode::Param)
            .map(|i| match i.dest {
                Some(TacOp::Const { value, .. }) => value,
                _ => panic!("param without index"),
            })
            .collect();
        assert_eq!(params, vec![2, 1, 0]);
    }

    #[test]
    fn array_store_goes_through_a_reference() {
        let (prog, tac) = lower(
            "module M; var s: char[3]; i: integer; begin s[i] := 'a' end M.",
        );
        let assign = tac
            .block(MODULE_SCOPE)
            .instrs
            .iter()
            .find(|i| i.op == Opcode::Assign && matches!(i.dest, Some(TacOp::Reference { .. })))
            .expect("array assignment through a reference");
        match &assign.dest {
            Some(TacOp::Reference { deref, .. }) => {
                assert_eq!(prog.sym(*deref).name, "s");
            }
            _ => unreachable!(),
        }
        // the address computation calls DOFS on the array base
        let calls: Vec<&str> = tac
            .block(MODULE_SCOPE)
            .instrs
            .iter()
            .filter(|i| i.op == Opcode::Call)
            .map(|i| match &i.src1 {
                Some(TacOp::Name(s)) => prog.sym(*s).name.as_str(),
                _ => panic!(),
            })
            .collect();
        assert!(calls.contains(&"DOFS"));
    }

    #[test]
    fn multi_dimensional_indexing_calls_dim() {
        let (prog, tac) = lower(
            "module M; var a: integer[3][4]; begin a[1][2] := 0 end M.",
        );
        let dim_calls = tac
            .block(MODULE_SCOPE)
            .instrs
            .iter()
            .filter(|i| {
                i.op == Opcode::Call
                    && matches!(&i.src1, Some(TacOp::Name(s)) if prog.sym(*s).name == "DIM")
            })
            .count();
        assert_eq!(dim_calls, 1);
    }

    #[test]
    fn short_circuit_and_skips_rhs() {
        let (_, tac) = lower(
            "module M;
             var a, x: integer;
             begin
                if ((a # 0) && (10 / a > 0)) then x := 1 end
             end M.",
        );
        // the division must be preceded by the a # 0 test: find positions
        let instrs = &tac.block(MODULE_SCOPE).instrs;
        let ne_pos = instrs.iter().position(|i| i.op == Opcode::NotEqual).unwrap();
        let div_pos = instrs.iter().position(|i| i.op == Opcode::Div).unwrap();
        assert!(ne_pos < div_pos);
        // and the NotEqual branch targets a label, falling through to a
        // goto that bypasses the division
        assert_eq!(instrs[ne_pos + 1].op, Opcode::Goto);
    }

    #[test]
    fn while_loops_back_to_condition() {
        let (_, tac) = lower(
            "module M; var i: integer; begin while (i < 10) do i := i + 1 end end M.",
        );
        let ops = opcodes(&tac, MODULE_SCOPE);
        assert!(ops.contains(&Opcode::LessThan));
        // at least one backward goto for the loop
        assert!(ops.iter().filter(|o| **o == Opcode::Goto).count() >= 1);
    }

    #[test]
    fn return_lowers_with_value() {
        let (_, tac) = lower(
            "module M;
             function f(x: integer): integer;
             begin return x + x end f;
             begin end M.",
        );
        let f_scope = ScopeId(1);
        let ops = opcodes(&tac, f_scope);
        assert!(ops.contains(&Opcode::Return));
        assert!(ops.contains(&Opcode::Add));
    }

    #[test]
    fn constant_symbols_fold_to_immediates() {
        let (_, tac) = lower(
            "module M; const n: integer = 5; var x: integer; begin x := n end M.",
        );
        let assign = tac
            .block(MODULE_SCOPE)
            .instrs
            .iter()
            .find(|i| i.op == Opcode::Assign)
            .unwrap();
        assert!(matches!(
            assign.src1,
            Some(TacOp::Const { value: 5, .. })
        ));
    }
}
