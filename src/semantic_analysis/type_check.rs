//! Type checking for SnuPL/2.
//!
//! One recursion over every scope's statement list. Expression checking
//! returns the expression's type; statement checking validates the
//! surrounding contracts (assignability, condition types, return types,
//! call signatures).
//!
//! Arithmetic and relational operators accept `longint` symmetrically with
//! `integer`; mixing the two widths is rejected by `Match`, never coerced.

use crate::ast::{ArrayDesignator, CallExpr, Expr, Op, Program, ScopeId, Stmt};
use crate::error::{CompileError, CompileResult};
use crate::symbol::SymKind;
use crate::types::TypeId;

pub struct TypeChecker<'p> {
    prog: &'p Program,
}

impl<'p> TypeChecker<'p> {
    pub fn new(prog: &'p Program) -> Self {
        Self { prog }
    }

    pub fn check(&self) -> CompileResult<()> {
        for id in 0..self.prog.scopes.len() {
            let scope = ScopeId(id as u32);
            for stmt in &self.prog.scope(scope).body {
                self.check_stmt(scope, stmt)?;
            }
        }
        Ok(())
    }

    fn check_stmt(&self, scope: ScopeId, stmt: &Stmt) -> CompileResult<()> {
        let tc = &self.prog.types;

        match stmt {
            Stmt::Assign { token, lhs, rhs } => {
                let lt = self.check_expr(scope, lhs)?;
                let rt = self.check_expr(scope, rhs)?;

                if !(tc.is_boolean(lt) || lt == tc.char() || tc.is_integral(lt)) {
                    return Err(CompileError::at(
                        token,
                        "assignments to compound types are not supported.",
                    ));
                }
                if !tc.matches(lt, rt) {
                    return Err(CompileError::at(token, "incompatible types in assignment."));
                }
                Ok(())
            }

            Stmt::Call { call, .. } => {
                self.check_call(scope, call)?;
                Ok(())
            }

            Stmt::Return { token, expr } => {
                let ret = self.prog.return_type(scope);
                match expr {
                    None if ret == tc.null() => Ok(()),
                    None => Err(CompileError::at(token, "expression expected after return.")),
                    Some(e) => {
                        if ret == tc.null() {
                            return Err(CompileError::at(
                                token,
                                "superfluous expression after return.",
                            ));
                        }
                        let et = self.check_expr(scope, e)?;
                        if !tc.matches(ret, et) {
                            return Err(CompileError::at(e.token(), "return type mismatch."));
                        }
                        Ok(())
                    }
                }
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let ct = self.check_expr(scope, cond)?;
                if !tc.is_boolean(ct) {
                    return Err(CompileError::at(cond.token(), "boolean expression expected."));
                }
                for s in then_body {
                    self.check_stmt(scope, s)?;
                }
                for s in else_body {
                    self.check_stmt(scope, s)?;
                }
                Ok(())
            }

            Stmt::While { cond, body, .. } => {
                let ct = self.check_expr(scope, cond)?;
                if !tc.is_boolean(ct) {
                    return Err(CompileError::at(cond.token(), "boolean expression expected."));
                }
                for s in body {
                    self.check_stmt(scope, s)?;
                }
                Ok(())
            }
        }
    }

    fn check_expr(&self, scope: ScopeId, expr: &Expr) -> CompileResult<TypeId> {
        let tc = &self.prog.types;

        match expr {
            Expr::Binary {
                token,
                op,
                lhs,
                rhs,
            } => {
                let lt = self.check_expr(scope, lhs)?;
                let rt = self.check_expr(scope, rhs)?;

                match op {
                    Op::And | Op::Or => {
                        if !tc.is_boolean(lt) || !tc.is_boolean(rt) {
                            return Err(CompileError::at(token, "boolean operands expected."));
                        }
                    }
                    Op::Add | Op::Sub | Op::Mul | Op::Div => {
                        if !tc.is_integral(lt) || !tc.is_integral(rt) {
                            return Err(CompileError::at(
                                token,
                                "integer or longint operands expected.",
                            ));
                        }
                        if !tc.matches(lt, rt) {
                            return Err(CompileError::at(token, "operand type mismatch."));
                        }
                    }
                    Op::Equal | Op::NotEqual => {
                        if !tc.is_scalar(lt) || !tc.is_scalar(rt) {
                            return Err(CompileError::at(token, "scalar operands expected."));
                        }
                        if !tc.matches(lt, rt) {
                            return Err(CompileError::at(token, "operand type mismatch."));
                        }
                    }
                    Op::LessThan | Op::LessEqual | Op::BiggerThan | Op::BiggerEqual => {
                        if !(tc.is_integral(lt) || lt == tc.char())
                            || !(tc.is_integral(rt) || rt == tc.char())
                        {
                            return Err(CompileError::at(
                                token,
                                "integer, longint, or char operands expected.",
                            ));
                        }
                        if !tc.matches(lt, rt) {
                            return Err(CompileError::at(token, "operand type mismatch."));
                        }
                    }
                    _ => {
                        return Err(CompileError::at(token, "invalid binary operator."));
                    }
                }

                Ok(expr.ty(self.prog))
            }

            Expr::Unary { token, op, operand } => {
                let ot = self.check_expr(scope, operand)?;
                match op {
                    Op::Neg | Op::Pos => {
                        if !tc.is_integral(ot) {
                            return Err(CompileError::at(
                                token,
                                "integer or longint operand expected.",
                            ));
                        }
                    }
                    Op::Not => {
                        if !tc.is_boolean(ot) {
                            return Err(CompileError::at(token, "boolean operand expected."));
                        }
                    }
                    _ => {
                        return Err(CompileError::at(token, "invalid unary operator."));
                    }
                }
                Ok(expr.ty(self.prog))
            }

            Expr::Special { token, operand, ty, .. } => {
                let ot = self.check_expr(scope, operand)?;
                if ot == tc.null() {
                    return Err(CompileError::at(token, "cannot take the address of this."));
                }
                Ok(*ty)
            }

            Expr::Call(call) => self.check_call(scope, call),

            Expr::Designator { token, sym } => {
                let s = self.prog.sym(*sym);
                if matches!(s.kind, SymKind::Reserved) {
                    return Err(CompileError::at(token, "invalid use of reserved identifier."));
                }
                // a subroutine name is not a value; calls carry their own node
                if matches!(s.kind, SymKind::Procedure { .. }) {
                    return Err(CompileError::at(token, "invalid use of subroutine name."));
                }
                Ok(s.ty)
            }

            Expr::ArrayDesignator(ad) => self.check_array_designator(scope, ad),

            Expr::Constant { token, ty, value } => {
                if tc.is_integer(*ty) && (*value < -2_147_483_648 || *value > 2_147_483_647) {
                    return Err(CompileError::at(token, "integer constant out of range."));
                }
                Ok(*ty)
            }

            Expr::StringConst { sym, .. } => Ok(self.prog.sym(*sym).ty),
        }
    }

    fn check_call(&self, scope: ScopeId, call: &CallExpr) -> CompileResult<TypeId> {
        let tc = &self.prog.types;
        let sym = self.prog.sym(call.sym);

        let params = match &sym.kind {
            SymKind::Procedure { params, .. } => params,
            _ => return Err(CompileError::at(&call.token, "not a procedure.")),
        };

        if call.args.len() != params.len() {
            return Err(CompileError::at(&call.token, "argument count mismatch."));
        }

        for (arg, &param) in call.args.iter().zip(params.iter()) {
            let at = self.check_expr(scope, arg)?;
            let pt = self.prog.sym(param).ty;
            if !tc.matches(pt, at) {
                return Err(CompileError::at(arg.token(), "argument type mismatch."));
            }
        }

        Ok(sym.ty)
    }

    fn check_array_designator(&self, scope: ScopeId, ad: &ArrayDesignator) -> CompileResult<TypeId> {
        let tc = &self.prog.types;
        assert!(ad.done);

        for idx in &ad.indices {
            let it = self.check_expr(scope, idx)?;
            if !tc.is_integer(it) {
                return Err(CompileError::at(
                    idx.token(),
                    "array index must be of type integer.",
                ));
            }
        }

        // open arrays arrive through a pointer
        let mut base = self.prog.sym(ad.sym).ty;
        if let Some(p) = tc.pointee(base) {
            base = p;
        }

        if !tc.is_array(base) {
            return Err(CompileError::at(&ad.token, "designated object is not an array."));
        }
        if tc.ndim(base) < ad.indices.len() as u32 {
            return Err(CompileError::at(&ad.token, "too many indices for array."));
        }

        // validated above, the strip cannot fail
        Ok(tc.strip_dims(base, ad.indices.len() as u32).unwrap())
    }
}
