//! Abstract syntax tree for SnuPL/2.
//!
//! The tree is produced by the parser and read-only afterwards. Scopes live
//! in an arena on `Program` (the module at index 0); statements and
//! expressions are owned enum trees. The constant evaluator folds literal
//! expressions at parse time.

use crate::error::{CompileError, CompileResult};
use crate::symbol::{SymArena, SymId, SymKind, SymScope, SymTab, Symbol};
use crate::token::Token;
use crate::types::{TypeCtx, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(pub u32);

pub const MODULE_SCOPE: ScopeId = ScopeId(0);

/// A whole parsed module: type context, symbol arena, and the scope tree.
#[derive(Debug)]
pub struct Program {
    pub types: TypeCtx,
    pub syms: SymArena,
    pub scopes: Vec<ScopeNode>,
}

/// Module or procedure scope.
#[derive(Debug)]
pub struct ScopeNode {
    pub name: String,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub symtab: SymTab,
    /// The procedure symbol this scope implements; `None` for the module.
    pub decl: Option<SymId>,
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            types: TypeCtx::new(),
            syms: SymArena::new(),
            scopes: vec![ScopeNode {
                name: module_name.into(),
                parent: None,
                children: Vec::new(),
                symtab: SymTab::new(),
                decl: None,
                body: Vec::new(),
            }],
        }
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeNode {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeNode {
        &mut self.scopes[id.0 as usize]
    }

    pub fn add_scope(&mut self, name: impl Into<String>, parent: ScopeId, decl: SymId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeNode {
            name: name.into(),
            parent: Some(parent),
            children: Vec::new(),
            symtab: SymTab::new(),
            decl: Some(decl),
            body: Vec::new(),
        });
        self.scope_mut(parent).children.push(id);
        id
    }

    pub fn sym(&self, id: SymId) -> &Symbol {
        self.syms.get(id)
    }

    /// Look up `name` starting at `scope`, walking outward unless the
    /// filter restricts the search to the innermost table.
    pub fn find_symbol(&self, scope: ScopeId, name: &str, filter: SymScope) -> Option<SymId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(id) = self.scope(s).symtab.lookup(name) {
                return Some(id);
            }
            if filter == SymScope::Local {
                return None;
            }
            current = self.scope(s).parent;
        }
        None
    }

    /// Return type of the procedure a scope implements; `Null` for the
    /// module body.
    pub fn return_type(&self, scope: ScopeId) -> TypeId {
        match self.scope(scope).decl {
            Some(sym) => self.sym(sym).ty,
            None => self.types.null(),
        }
    }
}

/// Operators as they appear in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    BiggerThan,
    BiggerEqual,
    Neg,
    Pos,
    Not,
    Address,
}

impl Op {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Op::Equal
                | Op::NotEqual
                | Op::LessThan
                | Op::LessEqual
                | Op::BiggerThan
                | Op::BiggerEqual
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, Op::Add | Op::Sub | Op::Mul | Op::Div)
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign {
        token: Token,
        lhs: Expr,
        rhs: Expr,
    },
    Call {
        token: Token,
        call: CallExpr,
    },
    Return {
        token: Token,
        expr: Option<Expr>,
    },
    If {
        token: Token,
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        token: Token,
        cond: Expr,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub token: Token,
    pub sym: SymId,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct ArrayDesignator {
    pub token: Token,
    pub sym: SymId,
    pub indices: Vec<Expr>,
    /// Set once all indices have been attached by the parser.
    pub done: bool,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Binary {
        token: Token,
        op: Op,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        token: Token,
        op: Op,
        operand: Box<Expr>,
    },
    /// Synthesized operations, currently only address-of. The result type
    /// is interned at construction time.
    Special {
        token: Token,
        op: Op,
        ty: TypeId,
        operand: Box<Expr>,
    },
    Call(CallExpr),
    Designator {
        token: Token,
        sym: SymId,
    },
    ArrayDesignator(ArrayDesignator),
    Constant {
        token: Token,
        ty: TypeId,
        value: i64,
    },
    StringConst {
        token: Token,
        sym: SymId,
    },
}

impl Expr {
    pub fn token(&self) -> &Token {
        match self {
            Expr::Binary { token, .. }
            | Expr::Unary { token, .. }
            | Expr::Special { token, .. }
            | Expr::Designator { token, .. }
            | Expr::Constant { token, .. }
            | Expr::StringConst { token, .. } => token,
            Expr::Call(call) => &call.token,
            Expr::ArrayDesignator(ad) => &ad.token,
        }
    }

    /// The static type of the expression. Assumes a tree the semantic
    /// checker accepts (or will reject before the result is used).
    pub fn ty(&self, prog: &Program) -> TypeId {
        match self {
            Expr::Binary { op, lhs, rhs, .. } => {
                if op.is_relational() || matches!(op, Op::And | Op::Or) {
                    prog.types.boolean()
                } else {
                    // mixed widths resolve to the non-integer side
                    let lt = lhs.ty(prog);
                    if !prog.types.is_integer(lt) {
                        lt
                    } else {
                        rhs.ty(prog)
                    }
                }
            }
            Expr::Unary { operand, op, .. } => {
                if *op == Op::Not {
                    prog.types.boolean()
                } else {
                    operand.ty(prog)
                }
            }
            Expr::Special { ty, .. } => *ty,
            Expr::Call(call) => prog.sym(call.sym).ty,
            Expr::Designator { sym, .. } => prog.sym(*sym).ty,
            Expr::ArrayDesignator(ad) => {
                let mut t = prog.sym(ad.sym).ty;
                // open arrays are accessed through a pointer
                if let Some(p) = prog.types.pointee(t) {
                    t = p;
                }
                prog.types
                    .strip_dims(t, ad.indices.len() as u32)
                    .unwrap_or_else(|| prog.types.null())
            }
            Expr::Constant { ty, .. } => *ty,
            Expr::StringConst { sym, .. } => prog.sym(*sym).ty,
        }
    }
}

/// A folded compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstVal {
    pub ty: TypeId,
    pub value: i64,
}

impl Expr {
    /// Fold the expression to a typed literal if it is compile-time
    /// constant. Arithmetic widens to longint when either operand is
    /// longint; division by zero is a compile-time error; non-constant
    /// expressions yield `Ok(None)`.
    pub fn evaluate(&self, prog: &Program) -> CompileResult<Option<ConstVal>> {
        match self {
            Expr::Constant { ty, value, .. } => Ok(Some(ConstVal {
                ty: *ty,
                value: *value,
            })),

            Expr::Designator { sym, .. } => match prog.sym(*sym).kind {
                SymKind::Constant { value } => Ok(Some(ConstVal {
                    ty: prog.sym(*sym).ty,
                    value,
                })),
                _ => Ok(None),
            },

            Expr::Unary { token, op, operand } => {
                let v = match operand.evaluate(prog)? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                let tc = &prog.types;
                match op {
                    Op::Neg if tc.is_integral(v.ty) => Ok(Some(ConstVal {
                        ty: v.ty,
                        value: v.value.wrapping_neg(),
                    })),
                    Op::Pos if tc.is_integral(v.ty) => Ok(Some(v)),
                    Op::Not if tc.is_boolean(v.ty) => Ok(Some(ConstVal {
                        ty: v.ty,
                        value: (v.value == 0) as i64,
                    })),
                    _ => Err(CompileError::at(token, "invalid constant expression.")),
                }
            }

            Expr::Binary { token, op, lhs, rhs } => {
                let (a, b) = match (lhs.evaluate(prog)?, rhs.evaluate(prog)?) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Ok(None),
                };
                let tc = &prog.types;

                if op.is_arithmetic() {
                    if !tc.is_integral(a.ty) || !tc.is_integral(b.ty) {
                        return Err(CompileError::at(token, "invalid constant expression."));
                    }
                    let ty = if tc.is_longint(a.ty) || tc.is_longint(b.ty) {
                        tc.longint()
                    } else {
                        tc.integer()
                    };
                    let value = match op {
                        Op::Add => a.value.wrapping_add(b.value),
                        Op::Sub => a.value.wrapping_sub(b.value),
                        Op::Mul => a.value.wrapping_mul(b.value),
                        Op::Div => {
                            if b.value == 0 {
                                return Err(CompileError::at(
                                    token,
                                    "division by zero in constant expression.",
                                ));
                            }
                            a.value.wrapping_div(b.value)
                        }
                        _ => unreachable!(),
                    };
                    return Ok(Some(ConstVal { ty, value }));
                }

                if op.is_relational() {
                    let value = match op {
                        Op::Equal => a.value == b.value,
                        Op::NotEqual => a.value != b.value,
                        Op::LessThan => a.value < b.value,
                        Op::LessEqual => a.value <= b.value,
                        Op::BiggerThan => a.value > b.value,
                        Op::BiggerEqual => a.value >= b.value,
                        _ => unreachable!(),
                    };
                    return Ok(Some(ConstVal {
                        ty: tc.boolean(),
                        value: value as i64,
                    }));
                }

                // && and || are evaluated strictly on constant booleans
                if !tc.is_boolean(a.ty) || !tc.is_boolean(b.ty) {
                    return Err(CompileError::at(token, "invalid constant expression."));
                }
                let value = match op {
                    Op::And => (a.value != 0) && (b.value != 0),
                    Op::Or => (a.value != 0) || (b.value != 0),
                    _ => unreachable!(),
                };
                Ok(Some(ConstVal {
                    ty: tc.boolean(),
                    value: value as i64,
                }))
            }

            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn konst(ty: TypeId, value: i64) -> Expr {
        Expr::Constant {
            token: Token::synthetic(),
            ty,
            value,
        }
    }

    fn binary(op: Op, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            token: Token::synthetic(),
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[test]
    fn evaluate_round_trips_literals() {
        let prog = Program::new("m");
        let it = prog.types.integer();
        let e = konst(it, 42);
        assert_eq!(
            e.evaluate(&prog).unwrap(),
            Some(ConstVal { ty: it, value: 42 })
        );
    }

    #[test]
    fn evaluate_folds_arithmetic_with_widening() {
        let prog = Program::new("m");
        let it = prog.types.integer();
        let lt = prog.types.longint();

        let e = binary(Op::Add, konst(it, 1), konst(it, 2));
        assert_eq!(e.evaluate(&prog).unwrap(), Some(ConstVal { ty: it, value: 3 }));

        let e = binary(Op::Mul, konst(lt, 5), konst(it, 6));
        assert_eq!(
            e.evaluate(&prog).unwrap(),
            Some(ConstVal { ty: lt, value: 30 })
        );
    }

    #[test]
    fn evaluate_comparisons_yield_booleans() {
        let prog = Program::new("m");
        let it = prog.types.integer();
        let e = binary(Op::LessThan, konst(it, 2), konst(it, 3));
        let v = e.evaluate(&prog).unwrap().unwrap();
        assert_eq!(v.ty, prog.types.boolean());
        assert_eq!(v.value, 1);
    }

    #[test]
    fn evaluate_rejects_constant_division_by_zero() {
        let prog = Program::new("m");
        let it = prog.types.integer();
        let e = binary(Op::Div, konst(it, 7), konst(it, 0));
        let err = e.evaluate(&prog).unwrap_err();
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn evaluate_strict_short_circuit_ops() {
        let prog = Program::new("m");
        let bt = prog.types.boolean();
        let e = binary(Op::And, konst(bt, 1), konst(bt, 0));
        assert_eq!(
            e.evaluate(&prog).unwrap(),
            Some(ConstVal { ty: bt, value: 0 })
        );
        let e = binary(Op::Or, konst(bt, 0), konst(bt, 1));
        assert_eq!(
            e.evaluate(&prog).unwrap(),
            Some(ConstVal { ty: bt, value: 1 })
        );
    }

    #[test]
    fn non_constant_expressions_are_not_folded() {
        let mut prog = Program::new("m");
        let it = prog.types.integer();
        let x = prog.syms.add(Symbol::new("x", SymKind::Global, it));
        let d = Expr::Designator {
            token: Token::synthetic(),
            sym: x,
        };
        assert_eq!(d.evaluate(&prog).unwrap(), None);
    }

    #[test]
    fn scope_lookup_walks_outward() {
        let mut prog = Program::new("m");
        let it = prog.types.integer();
        let g = prog.syms.add(Symbol::new("g", SymKind::Global, it));
        prog.scope_mut(MODULE_SCOPE).symtab.add("g", g);

        let nt = prog.types.null();
        let p = prog.syms.add(Symbol::new(
            "p",
            SymKind::Procedure {
                params: Vec::new(),
                external: false,
            },
            nt,
        ));
        let inner = prog.add_scope("p", MODULE_SCOPE, p);
        let l = prog.syms.add(Symbol::new("l", SymKind::Local, it));
        prog.scope_mut(inner).symtab.add("l", l);

        assert_eq!(prog.find_symbol(inner, "g", SymScope::Global), Some(g));
        assert_eq!(prog.find_symbol(inner, "g", SymScope::Local), None);
        assert_eq!(prog.find_symbol(inner, "l", SymScope::Local), Some(l));
    }
}
