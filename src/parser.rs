//! Recursive-descent parser for SnuPL/2.
//!
//! Builds the `Program` (scope tree, symbols, statements) directly while
//! parsing. Errors short-circuit with `?`; the first failure aborts the
//! parse. Array dimensions and constant initializers are folded with the
//! constant evaluator as they are parsed.
//!
//! Grammar:
//!   module        ::= "module" ident ";"
//!                     { constDeclaration | varDeclaration | subroutineDecl }
//!                     [ "begin" statSequence ] "end" ident ".".
//!   varDecl       ::= ident { "," ident } ":" type.
//!   constDecl     ::= varDecl "=" expression.
//!   subroutineDecl::= (procedureDecl | functionDecl)
//!                     ( "extern" | subroutineBody ident ) ";".
//!   statSequence  ::= [ statement { ";" statement } ].
//!   statement     ::= assignment | subroutineCall | ifStatement
//!                     | whileStatement | returnStatement.
//!   expression    ::= simpleexpr [ relOp simpleexpr ].
//!   simpleexpr    ::= ["+"|"-"] term { termOp term }.
//!   term          ::= factor { factOp factor }.
//!   factor        ::= qualident | number | boolean | char | string |
//!                     "(" expression ")" | subroutineCall | "!" factor.

use crate::ast::{ArrayDesignator, CallExpr, Expr, Op, Program, ScopeId, Stmt, MODULE_SCOPE};
use crate::error::{CompileError, CompileResult};
use crate::scanner::Scanner;
use crate::symbol::{SymData, SymId, SymKind, SymScope, Symbol};
use crate::token::{Token, TokenKind};
use crate::types::TypeId;

pub fn parse(src: &str) -> CompileResult<Program> {
    Parser::new(src).parse()
}

struct Parser<'a> {
    scanner: Scanner<'a>,
    prog: Program,
    str_count: u32,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            scanner: Scanner::new(src),
            prog: Program::new(""),
            str_count: 0,
        }
    }

    fn parse(mut self) -> CompileResult<Program> {
        self.module()?;
        Ok(self.prog)
    }

    fn peek(&self) -> &Token {
        self.scanner.peek()
    }

    fn peek_kind(&self) -> TokenKind {
        self.scanner.peek().kind
    }

    fn consume(&mut self, kind: TokenKind) -> CompileResult<Token> {
        let t = self.scanner.get();
        if t.kind != kind {
            return Err(Self::unexpected(&t, kind));
        }
        Ok(t)
    }

    fn unexpected(t: &Token, expected: TokenKind) -> CompileError {
        if let Some(msg) = lex_error_message(t.kind) {
            return CompileError::at(t, msg);
        }
        CompileError::at(
            t,
            format!("expected {}, got {}.", expected.name(), t.kind.name()),
        )
    }

    //
    // declarations
    //

    fn module(&mut self) -> CompileResult<()> {
        self.consume(TokenKind::Module)?;
        let t = self.consume(TokenKind::Ident)?;
        self.consume(TokenKind::Semicolon)?;

        self.prog.scope_mut(MODULE_SCOPE).name = t.value.clone();
        self.init_symbol_table();

        loop {
            match self.peek_kind() {
                TokenKind::Const => self.const_declarations(MODULE_SCOPE)?,
                TokenKind::Var => self.var_declarations(MODULE_SCOPE)?,
                TokenKind::Procedure | TokenKind::Function => self.subroutine_decl()?,
                TokenKind::Begin | TokenKind::End => break,
                _ => {
                    let t = self.scanner.get();
                    return Err(Self::unexpected(&t, TokenKind::Begin));
                }
            }
        }

        if self.peek_kind() == TokenKind::Begin {
            self.consume(TokenKind::Begin)?;
            let body = self.stat_sequence(MODULE_SCOPE)?;
            self.prog.scope_mut(MODULE_SCOPE).body = body;
        }

        self.consume(TokenKind::End)?;
        let t = self.consume(TokenKind::Ident)?;
        if t.value != self.prog.scope(MODULE_SCOPE).name {
            return Err(CompileError::at(&t, "mismatched module closing ident."));
        }
        self.consume(TokenKind::Dot)?;

        Ok(())
    }

    /// Predefined symbols: the reserved `main` label and the external
    /// runtime procedures.
    fn init_symbol_table(&mut self) {
        let (null, int, long, ch, void_ptr, str_ptr) = {
            let tc = &mut self.prog.types;
            let null = tc.null();
            let void_ptr = tc.pointer(null);
            let ch = tc.char();
            let open_char = tc.array(None, ch);
            let str_ptr = tc.pointer(open_char);
            (null, tc.integer(), tc.longint(), ch, void_ptr, str_ptr)
        };

        let main = self.prog.syms.add(Symbol::new("main", SymKind::Reserved, null));
        self.prog.scope_mut(MODULE_SCOPE).symtab.add("main", main);

        self.add_external("DIM", int, &[("array", void_ptr), ("dim", int)]);
        self.add_external("DOFS", int, &[("array", void_ptr)]);
        self.add_external("ReadInt", int, &[]);
        self.add_external("ReadLong", long, &[]);
        self.add_external("WriteInt", null, &[("v", int)]);
        self.add_external("WriteLong", null, &[("v", long)]);
        self.add_external("WriteChar", null, &[("v", ch)]);
        self.add_external("WriteStr", null, &[("v", str_ptr)]);
        self.add_external("WriteLn", null, &[]);
    }

    fn add_external(&mut self, name: &str, ret: TypeId, params: &[(&str, TypeId)]) {
        let mut ids = Vec::with_capacity(params.len());
        for (i, (pname, pty)) in params.iter().enumerate() {
            ids.push(self.prog.syms.add(Symbol::new(
                *pname,
                SymKind::Param { index: i as u32 },
                *pty,
            )));
        }
        let id = self.prog.syms.add(Symbol::new(
            name,
            SymKind::Procedure {
                params: ids,
                external: true,
            },
            ret,
        ));
        self.prog.scope_mut(MODULE_SCOPE).symtab.add(name, id);
    }

    fn var_declarations(&mut self, scope: ScopeId) -> CompileResult<()> {
        self.consume(TokenKind::Var)?;

        loop {
            let (idents, ty) = self.var_decl(scope, false)?;
            for t in idents {
                let kind = if scope == MODULE_SCOPE {
                    SymKind::Global
                } else {
                    SymKind::Local
                };
                let id = self.prog.syms.add(Symbol::new(&t.value, kind, ty));
                if !self.prog.scope_mut(scope).symtab.add(&t.value, id) {
                    return Err(CompileError::at(&t, "variable redeclared."));
                }
            }
            self.consume(TokenKind::Semicolon)?;

            if self.peek_kind() != TokenKind::Ident {
                break;
            }
        }

        Ok(())
    }

    fn const_declarations(&mut self, scope: ScopeId) -> CompileResult<()> {
        self.consume(TokenKind::Const)?;

        loop {
            let (idents, ty) = self.var_decl(scope, false)?;
            let eq = self.consume(TokenKind::RelOp)?;
            if eq.value != "=" {
                return Err(CompileError::at(&eq, "expected '=' in constant declaration."));
            }
            let expr = self.expression(scope)?;
            let val = match expr.evaluate(&self.prog)? {
                Some(v) => v,
                None => {
                    return Err(CompileError::at(
                        expr.token(),
                        "constant expression expected.",
                    ))
                }
            };
            if !self.prog.types.matches(ty, val.ty) {
                return Err(CompileError::at(
                    expr.token(),
                    "type mismatch in constant declaration.",
                ));
            }

            for t in idents {
                let id = self.prog.syms.add(Symbol::new(
                    &t.value,
                    SymKind::Constant { value: val.value },
                    ty,
                ));
                if !self.prog.scope_mut(scope).symtab.add(&t.value, id) {
                    return Err(CompileError::at(&t, "constant redeclared."));
                }
            }
            self.consume(TokenKind::Semicolon)?;

            if self.peek_kind() != TokenKind::Ident {
                break;
            }
        }

        Ok(())
    }

    /// varDecl ::= ident { "," ident } ":" type.
    fn var_decl(&mut self, scope: ScopeId, allow_open: bool) -> CompileResult<(Vec<Token>, TypeId)> {
        let mut idents = Vec::new();

        loop {
            let t = self.consume(TokenKind::Ident)?;
            idents.push(t);

            match self.peek_kind() {
                TokenKind::Comma => {
                    self.consume(TokenKind::Comma)?;
                }
                _ => {
                    self.consume(TokenKind::Colon)?;
                    break;
                }
            }
        }

        let ty = self.cctype(scope, allow_open)?;
        Ok((idents, ty))
    }

    fn subroutine_decl(&mut self) -> CompileResult<()> {
        let (name, params, ret_ty) = if self.peek_kind() == TokenKind::Procedure {
            self.procedure_decl()?
        } else {
            self.function_decl()?
        };

        // parameters of array type are passed by reference
        let mut param_ids = Vec::with_capacity(params.len());
        for (i, (t, ty)) in params.iter().enumerate() {
            let ty = if self.prog.types.is_array(*ty) {
                self.prog.types.pointer(*ty)
            } else {
                *ty
            };
            param_ids.push((
                t.clone(),
                self.prog.syms.add(Symbol::new(
                    &t.value,
                    SymKind::Param { index: i as u32 },
                    ty,
                )),
            ));
        }

        let proc_id = self.prog.syms.add(Symbol::new(
            &name.value,
            SymKind::Procedure {
                params: param_ids.iter().map(|(_, id)| *id).collect(),
                external: false,
            },
            ret_ty,
        ));
        if !self.prog.scope_mut(MODULE_SCOPE).symtab.add(&name.value, proc_id) {
            return Err(CompileError::at(&name, "subroutine redeclared."));
        }

        if self.peek_kind() == TokenKind::Extern {
            self.consume(TokenKind::Extern)?;
            self.consume(TokenKind::Semicolon)?;
            if let SymKind::Procedure { external, .. } = &mut self.prog.syms.get_mut(proc_id).kind
            {
                *external = true;
            }
            return Ok(());
        }

        let scope = self.prog.add_scope(&name.value, MODULE_SCOPE, proc_id);
        for (t, id) in &param_ids {
            if !self.prog.scope_mut(scope).symtab.add(&t.value, *id) {
                return Err(CompileError::at(t, "parameter redeclared."));
            }
        }

        let body = self.subroutine_body(scope)?;
        self.prog.scope_mut(scope).body = body;

        let t = self.consume(TokenKind::Ident)?;
        if t.value != name.value {
            return Err(CompileError::at(&t, "mismatched subroutine closing ident."));
        }
        self.consume(TokenKind::Semicolon)?;

        Ok(())
    }

    /// procedureDecl ::= "procedure" ident [ formalParam ] ";".
    fn procedure_decl(&mut self) -> CompileResult<(Token, Vec<(Token, TypeId)>, TypeId)> {
        self.consume(TokenKind::Procedure)?;
        let name = self.consume(TokenKind::Ident)?;

        let params = if self.peek_kind() == TokenKind::LParen {
            self.formal_param()?
        } else {
            Vec::new()
        };

        self.consume(TokenKind::Semicolon)?;
        Ok((name, params, self.prog.types.null()))
    }

    /// functionDecl ::= "function" ident [ formalParam ] ":" type ";".
    fn function_decl(&mut self) -> CompileResult<(Token, Vec<(Token, TypeId)>, TypeId)> {
        self.consume(TokenKind::Function)?;
        let name = self.consume(TokenKind::Ident)?;

        let params = if self.peek_kind() == TokenKind::LParen {
            self.formal_param()?
        } else {
            Vec::new()
        };

        self.consume(TokenKind::Colon)?;
        let colon_pos = self.peek().clone();
        let ret_ty = self.cctype(MODULE_SCOPE, false)?;
        if self.prog.types.is_array(ret_ty) {
            return Err(CompileError::at(
                &colon_pos,
                "subroutines cannot return array types.",
            ));
        }

        self.consume(TokenKind::Semicolon)?;
        Ok((name, params, ret_ty))
    }

    /// formalParam ::= "(" [ varDeclSequence ] ")".
    fn formal_param(&mut self) -> CompileResult<Vec<(Token, TypeId)>> {
        self.consume(TokenKind::LParen)?;

        let mut params = Vec::new();
        if self.peek_kind() == TokenKind::RParen {
            self.consume(TokenKind::RParen)?;
            return Ok(params);
        }

        loop {
            let (idents, ty) = self.var_decl(MODULE_SCOPE, true)?;
            for t in idents {
                params.push((t, ty));
            }

            if self.peek_kind() != TokenKind::Semicolon {
                break;
            }
            self.consume(TokenKind::Semicolon)?;
        }

        self.consume(TokenKind::RParen)?;
        Ok(params)
    }

    /// subroutineBody ::= constDeclaration varDeclaration
    ///                    "begin" statSequence "end".
    fn subroutine_body(&mut self, scope: ScopeId) -> CompileResult<Vec<Stmt>> {
        if self.peek_kind() == TokenKind::Const {
            self.const_declarations(scope)?;
        }
        if self.peek_kind() == TokenKind::Var {
            self.var_declarations(scope)?;
        }

        self.consume(TokenKind::Begin)?;
        let body = self.stat_sequence(scope)?;
        self.consume(TokenKind::End)?;
        Ok(body)
    }

    //
    // statements
    //

    fn stat_sequence(&mut self, scope: ScopeId) -> CompileResult<Vec<Stmt>> {
        let mut stmts = Vec::new();

        if matches!(self.peek_kind(), TokenKind::End | TokenKind::Else) {
            return Ok(stmts);
        }

        loop {
            let st = match self.peek_kind() {
                TokenKind::Ident => {
                    let t = self.peek().clone();
                    let expr = self.ident_or_call(scope)?;
                    match expr {
                        Expr::Call(call) => Stmt::Call { token: t, call },
                        lhs @ (Expr::Designator { .. } | Expr::ArrayDesignator(_)) => {
                            self.assignment(scope, lhs)?
                        }
                        _ => return Err(CompileError::at(&t, "statement expected.")),
                    }
                }
                TokenKind::If => self.if_statement(scope)?,
                TokenKind::While => self.while_statement(scope)?,
                TokenKind::Return => self.return_statement(scope)?,
                _ => {
                    let t = self.scanner.get();
                    return Err(CompileError::at(&t, "statement expected."));
                }
            };
            stmts.push(st);

            if self.peek_kind() != TokenKind::Semicolon {
                break;
            }
            self.consume(TokenKind::Semicolon)?;
        }

        Ok(stmts)
    }

    /// assignment ::= qualident ":=" expression.
    fn assignment(&mut self, scope: ScopeId, lhs: Expr) -> CompileResult<Stmt> {
        let t = self.consume(TokenKind::Assign)?;
        let rhs = self.expression(scope)?;
        Ok(Stmt::Assign { token: t, lhs, rhs })
    }

    /// ifStatement ::= "if" "(" expression ")" "then" statSequence
    ///                 [ "else" statSequence ] "end".
    fn if_statement(&mut self, scope: ScopeId) -> CompileResult<Stmt> {
        let t = self.consume(TokenKind::If)?;

        self.consume(TokenKind::LParen)?;
        let cond = self.expression(scope)?;
        self.consume(TokenKind::RParen)?;

        self.consume(TokenKind::Then)?;
        let then_body = self.stat_sequence(scope)?;

        let else_body = if self.peek_kind() == TokenKind::Else {
            self.consume(TokenKind::Else)?;
            self.stat_sequence(scope)?
        } else {
            Vec::new()
        };

        self.consume(TokenKind::End)?;
        Ok(Stmt::If {
            token: t,
            cond,
            then_body,
            else_body,
        })
    }

    /// whileStatement ::= "while" "(" expression ")" "do" statSequence "end".
    fn while_statement(&mut self, scope: ScopeId) -> CompileResult<Stmt> {
        let t = self.consume(TokenKind::While)?;

        self.consume(TokenKind::LParen)?;
        let cond = self.expression(scope)?;
        self.consume(TokenKind::RParen)?;

        self.consume(TokenKind::Do)?;
        let body = self.stat_sequence(scope)?;
        self.consume(TokenKind::End)?;

        Ok(Stmt::While {
            token: t,
            cond,
            body,
        })
    }

    /// returnStatement ::= "return" [ expression ].
    fn return_statement(&mut self, scope: ScopeId) -> CompileResult<Stmt> {
        let t = self.consume(TokenKind::Return)?;

        let expr = match self.peek_kind() {
            TokenKind::Semicolon | TokenKind::End | TokenKind::Else => None,
            _ => Some(self.expression(scope)?),
        };

        Ok(Stmt::Return { token: t, expr })
    }

    //
    // expressions
    //

    fn expression(&mut self, scope: ScopeId) -> CompileResult<Expr> {
        let left = self.simpleexpr(scope)?;

        if self.peek_kind() != TokenKind::RelOp {
            return Ok(left);
        }

        let t = self.consume(TokenKind::RelOp)?;
        let right = self.simpleexpr(scope)?;

        let op = match t.value.as_str() {
            "=" => Op::Equal,
            "#" => Op::NotEqual,
            "<" => Op::LessThan,
            "<=" => Op::LessEqual,
            ">" => Op::BiggerThan,
            ">=" => Op::BiggerEqual,
            _ => return Err(CompileError::at(&t, "invalid relation.")),
        };

        Ok(Expr::Binary {
            token: t,
            op,
            lhs: Box::new(left),
            rhs: Box::new(right),
        })
    }

    fn simpleexpr(&mut self, scope: ScopeId) -> CompileResult<Expr> {
        let mut n = if self.peek_kind() == TokenKind::PlusMinus {
            let t = self.consume(TokenKind::PlusMinus)?;
            let term = self.term(scope)?;
            self.apply_sign(t, term)
        } else {
            self.term(scope)?
        };

        loop {
            let (t, op) = match self.peek_kind() {
                TokenKind::PlusMinus => {
                    let t = self.consume(TokenKind::PlusMinus)?;
                    let op = if t.value == "+" { Op::Add } else { Op::Sub };
                    (t, op)
                }
                TokenKind::OrOr => (self.consume(TokenKind::OrOr)?, Op::Or),
                _ => break,
            };

            let r = self.term(scope)?;
            n = Expr::Binary {
                token: t,
                op,
                lhs: Box::new(n),
                rhs: Box::new(r),
            };
        }

        Ok(n)
    }

    /// Apply a leading sign. A minus in front of a numeric literal is folded
    /// into the literal so that the most negative integer is representable.
    fn apply_sign(&self, t: Token, term: Expr) -> Expr {
        if t.value == "-" {
            if let Expr::Constant { token, ty, value } = &term {
                if self.prog.types.is_integral(*ty) {
                    return Expr::Constant {
                        token: token.clone(),
                        ty: *ty,
                        value: value.wrapping_neg(),
                    };
                }
            }
        }
        let op = if t.value == "+" { Op::Pos } else { Op::Neg };
        Expr::Unary {
            token: t,
            op,
            operand: Box::new(term),
        }
    }

    fn term(&mut self, scope: ScopeId) -> CompileResult<Expr> {
        let mut n = self.factor(scope)?;

        loop {
            let (t, op) = match self.peek_kind() {
                TokenKind::MulDiv => {
                    let t = self.consume(TokenKind::MulDiv)?;
                    let op = if t.value == "*" { Op::Mul } else { Op::Div };
                    (t, op)
                }
                TokenKind::AndAnd => (self.consume(TokenKind::AndAnd)?, Op::And),
                _ => break,
            };

            let r = self.factor(scope)?;
            n = Expr::Binary {
                token: t,
                op,
                lhs: Box::new(n),
                rhs: Box::new(r),
            };
        }

        Ok(n)
    }

    fn factor(&mut self, scope: ScopeId) -> CompileResult<Expr> {
        match self.peek_kind() {
            TokenKind::Number => self.number(),
            TokenKind::BoolConst => self.bool_const(),
            TokenKind::CharConst => self.char_const(),
            TokenKind::StringConst => self.string_const(),
            TokenKind::LParen => {
                self.consume(TokenKind::LParen)?;
                let n = self.expression(scope)?;
                self.consume(TokenKind::RParen)?;
                Ok(n)
            }
            TokenKind::Not => {
                let t = self.consume(TokenKind::Not)?;
                let n = self.factor(scope)?;
                Ok(Expr::Unary {
                    token: t,
                    op: Op::Not,
                    operand: Box::new(n),
                })
            }
            TokenKind::Ident => self.ident_or_call(scope),
            _ => {
                let t = self.scanner.get();
                if let Some(msg) = lex_error_message(t.kind) {
                    return Err(CompileError::at(&t, msg));
                }
                Err(CompileError::at(&t, "factor expected."))
            }
        }
    }

    /// identOrCall ::= ident ( { "[" simpleexpr "]" }
    ///               | "(" [ expression { "," expression } ] ")" ).
    fn ident_or_call(&mut self, scope: ScopeId) -> CompileResult<Expr> {
        let t = self.consume(TokenKind::Ident)?;
        let sym = self
            .prog
            .find_symbol(scope, &t.value, SymScope::Global)
            .ok_or_else(|| CompileError::at(&t, "undeclared identifier."))?;

        match self.peek_kind() {
            TokenKind::LBrak => {
                let mut ad = ArrayDesignator {
                    token: t,
                    sym,
                    indices: Vec::new(),
                    done: false,
                };
                while self.peek_kind() == TokenKind::LBrak {
                    self.consume(TokenKind::LBrak)?;
                    ad.indices.push(self.simpleexpr(scope)?);
                    self.consume(TokenKind::RBrak)?;
                }
                ad.done = true;
                Ok(Expr::ArrayDesignator(ad))
            }
            TokenKind::LParen => {
                if !matches!(self.prog.sym(sym).kind, SymKind::Procedure { .. }) {
                    return Err(CompileError::at(&t, "not a procedure."));
                }
                self.consume(TokenKind::LParen)?;

                let mut call = CallExpr {
                    token: t,
                    sym,
                    args: Vec::new(),
                };

                if self.peek_kind() == TokenKind::RParen {
                    self.consume(TokenKind::RParen)?;
                    return Ok(Expr::Call(call));
                }

                loop {
                    let arg = self.expression(scope)?;
                    call.args.push(self.wrap_array_arg(arg));
                    match self.peek_kind() {
                        TokenKind::RParen => {
                            self.consume(TokenKind::RParen)?;
                            return Ok(Expr::Call(call));
                        }
                        TokenKind::Comma => {
                            self.consume(TokenKind::Comma)?;
                        }
                        _ => {
                            let t = self.scanner.get();
                            return Err(Self::unexpected(&t, TokenKind::RParen));
                        }
                    }
                }
            }
            _ => Ok(Expr::Designator { token: t, sym }),
        }
    }

    /// Arrays are passed by reference; wrap array-typed arguments in an
    /// address-of node so the types line up with the rewritten formals.
    fn wrap_array_arg(&mut self, arg: Expr) -> Expr {
        let ty = arg.ty(&self.prog);
        if !self.prog.types.is_array(ty) {
            return arg;
        }
        let pty = self.prog.types.pointer(ty);
        Expr::Special {
            token: arg.token().clone(),
            op: Op::Address,
            ty: pty,
            operand: Box::new(arg),
        }
    }

    fn number(&mut self) -> CompileResult<Expr> {
        let t = self.consume(TokenKind::Number)?;

        let (digits, ty) = match t.value.strip_suffix('L') {
            Some(d) => (d, self.prog.types.longint()),
            None => (t.value.as_str(), self.prog.types.integer()),
        };

        let value: i64 = digits
            .parse()
            .map_err(|_| CompileError::at(&t, "invalid number."))?;

        // 2^31 is allowed without a suffix so a folded leading minus can
        // produce the most negative integer
        if ty == self.prog.types.integer() && value > 2_147_483_648 {
            return Err(CompileError::at(&t, "invalid number."));
        }

        Ok(Expr::Constant {
            token: t,
            ty,
            value,
        })
    }

    fn bool_const(&mut self) -> CompileResult<Expr> {
        let t = self.consume(TokenKind::BoolConst)?;
        let value = (t.value == "true") as i64;
        Ok(Expr::Constant {
            token: t,
            ty: self.prog.types.boolean(),
            value,
        })
    }

    fn char_const(&mut self) -> CompileResult<Expr> {
        let t = self.consume(TokenKind::CharConst)?;
        let value = t.value.bytes().next().unwrap_or(0) as i64;
        Ok(Expr::Constant {
            token: t,
            ty: self.prog.types.char(),
            value,
        })
    }

    /// A string literal materializes as a fresh global symbol of type
    /// `char[len+1]` in the module scope, initialized with the string data.
    fn string_const(&mut self) -> CompileResult<Expr> {
        let t = self.consume(TokenKind::StringConst)?;

        let ty = {
            let len = t.value.len() as u32 + 1;
            let ch = self.prog.types.char();
            self.prog.types.array(Some(len), ch)
        };

        let sym = loop {
            self.str_count += 1;
            let name = format!("_str_{}", self.str_count);
            if self.prog.scope(MODULE_SCOPE).symtab.lookup(&name).is_some() {
                continue;
            }
            let mut s = Symbol::new(&name, SymKind::Global, ty);
            s.data = SymData::Str(t.value.clone());
            let id = self.prog.syms.add(s);
            self.prog.scope_mut(MODULE_SCOPE).symtab.add(&name, id);
            break id;
        };

        Ok(Expr::StringConst { token: t, sym })
    }

    /// type ::= basetype { "[" [ simpleexpr ] "]" }.
    ///
    /// Dimension expressions are evaluated at parse time. Empty brackets
    /// denote an open dimension and are only allowed in formal parameters.
    fn cctype(&mut self, scope: ScopeId, allow_open: bool) -> CompileResult<TypeId> {
        let mut ty = match self.peek_kind() {
            TokenKind::Boolean => {
                self.consume(TokenKind::Boolean)?;
                self.prog.types.boolean()
            }
            TokenKind::Char => {
                self.consume(TokenKind::Char)?;
                self.prog.types.char()
            }
            TokenKind::Integer => {
                self.consume(TokenKind::Integer)?;
                self.prog.types.integer()
            }
            TokenKind::Longint => {
                self.consume(TokenKind::Longint)?;
                self.prog.types.longint()
            }
            _ => {
                let t = self.scanner.get();
                return Err(CompileError::at(&t, "expected type."));
            }
        };

        let mut dims = Vec::new();
        while self.peek_kind() == TokenKind::LBrak {
            let t = self.consume(TokenKind::LBrak)?;

            if self.peek_kind() == TokenKind::RBrak {
                if !allow_open {
                    return Err(CompileError::at(
                        &t,
                        "open arrays are only allowed as parameters.",
                    ));
                }
                dims.push(None);
            } else {
                let e = self.simpleexpr(scope)?;
                let v = match e.evaluate(&self.prog)? {
                    Some(v) => v,
                    None => {
                        return Err(CompileError::at(
                            e.token(),
                            "constant expression expected.",
                        ))
                    }
                };
                if !self.prog.types.is_integral(v.ty) || v.value <= 0 {
                    return Err(CompileError::at(
                        e.token(),
                        "array dimension must be a positive integer constant.",
                    ));
                }
                dims.push(Some(v.value as u32));
            }
            self.consume(TokenKind::RBrak)?;
        }

        // the first bracket is the outermost dimension
        for d in dims.into_iter().rev() {
            ty = self.prog.types.array(d, ty);
        }

        Ok(ty)
    }
}

fn lex_error_message(kind: TokenKind) -> Option<&'static str> {
    match kind {
        TokenKind::InvCharConst => Some("invalid character constant."),
        TokenKind::InvStringConst => Some("invalid string constant."),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::MODULE_SCOPE;

    #[test]
    fn parses_empty_module() {
        let prog = parse("module M; begin end M.").unwrap();
        assert_eq!(prog.scope(MODULE_SCOPE).name, "M");
        assert!(prog.scope(MODULE_SCOPE).body.is_empty());
    }

    #[test]
    fn rejects_mismatched_closing_ident() {
        let err = parse("module M; begin end N.").unwrap_err();
        assert!(err.message.contains("mismatched module closing ident"));
    }

    #[test]
    fn declares_globals_and_statements() {
        let prog = parse("module M; var x: integer; begin x := 1+2 end M.").unwrap();
        let x = prog.find_symbol(MODULE_SCOPE, "x", SymScope::Local).unwrap();
        assert_eq!(prog.sym(x).ty, prog.types.integer());
        assert_eq!(prog.scope(MODULE_SCOPE).body.len(), 1);
        assert!(matches!(
            prog.scope(MODULE_SCOPE).body[0],
            Stmt::Assign { .. }
        ));
    }

    #[test]
    fn rejects_redeclaration() {
        let err = parse("module M; var x: integer; var x: char; begin end M.").unwrap_err();
        assert!(err.message.contains("redeclared"));
    }

    #[test]
    fn rejects_undeclared_identifier() {
        let err = parse("module M; begin x := 1 end M.").unwrap_err();
        assert!(err.message.contains("undeclared identifier"));
    }

    #[test]
    fn array_dimensions_are_folded_at_parse_time() {
        let prog = parse("module M; const n: integer = 4; var a: integer[n*2]; begin end M.")
            .unwrap();
        let a = prog.find_symbol(MODULE_SCOPE, "a", SymScope::Local).unwrap();
        assert_eq!(prog.types.dims(prog.sym(a).ty), vec![Some(8)]);
    }

    #[test]
    fn open_arrays_only_in_parameters() {
        assert!(parse("module M; var a: integer[]; begin end M.").is_err());

        let prog =
            parse("module M; procedure p(a: integer[]); begin end p; begin end M.").unwrap();
        let p = prog.find_symbol(MODULE_SCOPE, "p", SymScope::Local).unwrap();
        let params = match &prog.sym(p).kind {
            SymKind::Procedure { params, .. } => params.clone(),
            k => panic!("expected procedure, got {:?}", k),
        };
        // array parameter was rewritten to pointer-to-open-array
        let aty = prog.sym(params[0]).ty;
        assert!(prog.types.is_pointer(aty));
        let inner = prog.types.pointee(aty).unwrap();
        assert_eq!(prog.types.dims(inner), vec![None]);
    }

    #[test]
    fn subroutines_support_recursion() {
        let src = "module M;
            function f(x: integer): integer;
            begin
                if (x <= 1) then return 1 end;
                return x * f(x-1)
            end f;
            begin end M.";
        let prog = parse(src).unwrap();
        assert_eq!(prog.scope(MODULE_SCOPE).children.len(), 1);
    }

    #[test]
    fn string_literals_become_globals() {
        let prog = parse("module M; begin WriteStr(\"hi\") end M.").unwrap();
        let s = prog
            .find_symbol(MODULE_SCOPE, "_str_1", SymScope::Local)
            .unwrap();
        assert_eq!(prog.sym(s).data, SymData::Str("hi".to_string()));
        // char[3]: payload plus the terminating NUL
        assert_eq!(prog.types.dims(prog.sym(s).ty), vec![Some(3)]);
    }

    #[test]
    fn negative_literal_folds_into_constant() {
        let prog = parse("module M; var x: integer; begin x := -2147483648 end M.").unwrap();
        match &prog.scope(MODULE_SCOPE).body[0] {
            Stmt::Assign { rhs, .. } => match rhs {
                Expr::Constant { value, .. } => assert_eq!(*value, -2147483648),
                e => panic!("expected folded constant, got {:?}", e),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn constant_division_by_zero_is_reported() {
        let err = parse("module M; const n: integer = 1/0; begin end M.").unwrap_err();
        assert!(err.message.contains("division by zero"));
    }
}
