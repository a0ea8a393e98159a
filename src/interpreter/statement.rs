//! Statement evaluation and control flow.
//!
//! Statements run directly off the token stream. Control flow is carried by
//! the context's [`ExecState`]: loops observe `Break`/`Continue` and reset to
//! `Running`, `Return` propagates until a function scope catches it. Skipped
//! regions (untaken `if` arms, loop bodies with a false condition) advance
//! the cursor under the dry-run flag without evaluating.

use std::rc::Rc;

use crate::error::{ErrorKind, Exec, Interrupt, PawError};
use crate::lexer::TokenKind;
use crate::scope::ScopeKind;
use crate::types::TypeKind;

use super::value::Value;
use super::{tok, ExecState, PawScriptContext, TokenList};

impl PawScriptContext {
    pub(crate) fn eval_statement(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<()> {
        let mut token = tok(ts, *i).clone();
        let mut is_extern = false;
        let mut is_typedef = false;
        if token.kind == TokenKind::Extern {
            token = self.next(ts, end, i)?.clone();
            is_extern = true;
        } else if token.kind == TokenKind::Typedef {
            token = self.next(ts, end, i)?.clone();
            is_typedef = true;
        }

        if let Some(ty) = self.parse_type(ts, end, i)? {
            return self.eval_declaration(ts, end, i, ty, is_extern, is_typedef);
        }
        if is_extern {
            return self.err(ErrorKind::Parse, &token, "Expected type");
        }

        // `name { body }` attaches code to an already declared function
        if token.kind == TokenKind::Identifier {
            let saved = *i;
            let name = token.text().to_string();
            let after = self.next(ts, end, i)?.clone();
            if after.kind == TokenKind::BraceOpen {
                return self.attach_function_body(ts, end, i, &token, &name);
            }
            *i = saved;
            token = tok(ts, *i).clone();
        }

        match token.kind {
            TokenKind::If => self.stmt_if(ts, end, i),
            TokenKind::While => self.stmt_while(ts, end, i),
            TokenKind::For => self.stmt_for(ts, end, i),
            TokenKind::Continue => {
                let token = self.next(ts, end, i)?.clone();
                if token.kind != TokenKind::Semicolon {
                    return self.err(ErrorKind::Parse, &token, "Expected ';'");
                }
                self.next(ts, end, i)?;
                if !self.dry_run {
                    self.set_state(ExecState::Continue, None);
                }
                Ok(())
            }
            TokenKind::Break => {
                let token = self.next(ts, end, i)?.clone();
                if token.kind != TokenKind::Semicolon {
                    return self.err(ErrorKind::Parse, &token, "Expected ';'");
                }
                self.next(ts, end, i)?;
                if !self.dry_run {
                    self.set_state(ExecState::Break, None);
                }
                Ok(())
            }
            TokenKind::Return => self.stmt_return(ts, end, i),
            TokenKind::Include => self.stmt_include(ts, end, i),
            TokenKind::BraceOpen | TokenKind::Arrow | TokenKind::Semicolon => {
                self.run_codeblock(ts, end, i)
            }
            _ => {
                let value = self.eval_expression(ts, end, i, false)?;
                if value.is_none() && !self.dry_run {
                    return Err(Interrupt);
                }
                self.next(ts, end, i)?;
                Ok(())
            }
        }
    }

    /// A block (`{ ... }`), an arrow body (`-> stmt`) or an empty statement.
    pub(crate) fn run_codeblock(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<()> {
        let token = tok(ts, *i).clone();
        match token.kind {
            TokenKind::BraceOpen => {
                self.scopes.push(ScopeKind::Regular);
                self.next(ts, end, i)?;
                let mut level = 0u32;
                loop {
                    let token = tok(ts, *i);
                    if token.kind == TokenKind::BraceClose {
                        if level == 0 {
                            break;
                        }
                        level -= 1;
                    }
                    if self.dry_run {
                        if token.kind == TokenKind::BraceOpen {
                            level += 1;
                        }
                        self.next(ts, end, i)?;
                    } else {
                        if let Err(error) = self.eval_statement(ts, end, i) {
                            self.scopes.pop(&self.bridge);
                            return Err(error);
                        }
                        if self.state != ExecState::Running {
                            break;
                        }
                    }
                }
                self.scopes.pop(&self.bridge);
                self.next(ts, end, i)?;
                Ok(())
            }
            TokenKind::Arrow => {
                self.scopes.push(ScopeKind::Regular);
                self.next(ts, end, i)?;
                let result = self.eval_statement(ts, end, i);
                self.scopes.pop(&self.bridge);
                result
            }
            TokenKind::Semicolon => {
                self.next(ts, end, i)?;
                Ok(())
            }
            _ => self.err(ErrorKind::Parse, &token, "Expected code block"),
        }
    }

    fn stmt_if(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<()> {
        self.next(ts, end, i)?;
        let previous_dry = self.dry_run;
        let mut first = true;
        loop {
            if self.dry_run {
                self.eval_expression(ts, end, i, false)?;
                if first && self.is_arm_form(ts, i) {
                    self.next(ts, end, i)?;
                    self.next(ts, end, i)?;
                    self.eval_conditional_arms(ts, end, i, None)?;
                    self.dry_run = previous_dry;
                    return Ok(());
                }
                self.run_codeblock(ts, end, i)?;
            } else {
                let Some(condition) = self.eval_expression(ts, end, i, true)? else {
                    return Err(Interrupt);
                };
                let truthy = condition.is_truthy(&self.arena);
                // `if expr -> [ then ; else ]` used as a statement selects an
                // arm and discards the value
                if first && self.is_arm_form(ts, i) {
                    self.next(ts, end, i)?;
                    self.next(ts, end, i)?;
                    self.eval_conditional_arms(ts, end, i, Some(truthy))?;
                    self.dry_run = previous_dry;
                    return Ok(());
                }
                self.dry_run = !truthy;
                self.run_codeblock(ts, end, i)?;
                // flip: a taken branch skips every elif/else that follows
                self.dry_run ^= true;
                if self.state != ExecState::Running {
                    break;
                }
            }
            first = false;
            let token = tok(ts, *i);
            if token.kind == TokenKind::Elif {
                self.next(ts, end, i)?;
                continue;
            }
            if token.kind == TokenKind::Else {
                self.next(ts, end, i)?;
                self.run_codeblock(ts, end, i)?;
            }
            break;
        }
        self.dry_run = previous_dry;
        Ok(())
    }

    fn is_arm_form(&self, ts: &TokenList, i: &usize) -> bool {
        tok(ts, *i).kind == TokenKind::Arrow
            && ts
                .get(*i + 1)
                .map(|token| token.kind == TokenKind::BracketOpen)
                .unwrap_or(false)
    }

    fn stmt_while(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<()> {
        self.next(ts, end, i)?;
        if self.dry_run {
            self.eval_expression(ts, end, i, false)?;
            return self.run_codeblock(ts, end, i);
        }
        let start = *i;
        loop {
            *i = start;
            let Some(condition) = self.eval_expression(ts, end, i, true)? else {
                return Err(Interrupt);
            };
            let truthy = condition.is_truthy(&self.arena);
            self.dry_run = !truthy;
            let body = self.run_codeblock(ts, end, i);
            self.dry_run = false;
            body?;
            if !truthy {
                break;
            }
            if self.state == ExecState::Continue {
                self.set_state(ExecState::Running, None);
            }
            if self.state == ExecState::Break {
                self.set_state(ExecState::Running, None);
                break;
            }
            if self.state == ExecState::Return {
                break;
            }
        }
        Ok(())
    }

    fn stmt_for(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<()> {
        let token = self.next(ts, end, i)?.clone();
        let (bytes, unsigned) = match token.kind {
            TokenKind::Bool | TokenKind::U8 => (1, true),
            TokenKind::U16 => (2, true),
            TokenKind::U32 => (4, true),
            TokenKind::U64 => (8, true),
            TokenKind::S8 => (1, false),
            TokenKind::S16 => (2, false),
            TokenKind::S32 => (4, false),
            TokenKind::S64 => (8, false),
            _ => {
                return self.err(ErrorKind::Parse, &token, "Expected non-const integer type");
            }
        };
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::Identifier {
            return self.err(ErrorKind::Parse, &token, "Expected identifier");
        }
        let name = token.text().to_string();
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::In {
            return self.err(ErrorKind::Parse, &token, "Expected 'in'");
        }
        let token = self.next(ts, end, i)?.clone();
        let left_exclusive = match token.kind {
            TokenKind::ParenOpen => true,
            TokenKind::BracketOpen => false,
            _ => return self.err(ErrorKind::Parse, &token, "Expected '(' or '['"),
        };
        self.next(ts, end, i)?;
        let left = self.eval_expression(ts, end, i, false)?;
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::Comma {
            return self.err(ErrorKind::Parse, &token, "Expected ','");
        }
        self.next(ts, end, i)?;
        let right = self.eval_expression(ts, end, i, false)?;
        let token = tok(ts, *i).clone();
        let right_exclusive = match token.kind {
            TokenKind::ParenClose => true,
            TokenKind::BracketClose => false,
            _ => return self.err(ErrorKind::Parse, &token, "Expected ')' or ']'"),
        };
        let at = token;
        self.next(ts, end, i)?;

        let start = *i;
        if self.dry_run {
            return self.run_codeblock(ts, end, i);
        }
        // measure the body once so the cursor can land after it
        self.dry_run = true;
        self.run_codeblock(ts, end, i)?;
        self.dry_run = false;
        let after_body = *i;

        let (Some(left), Some(right)) = (left, right) else {
            return Err(Interrupt);
        };
        let iter_ty = self.arena.alloc(TypeKind::Int(bytes));
        self.arena.get_mut(iter_ty).is_unsigned = unsigned;
        let casted_left = self.cast_value(iter_ty, &left, false);
        let casted_right = self.cast_value(iter_ty, &right, false);

        let less = self.apply_operator(
            TokenKind::LessThan,
            &at,
            Some(casted_left.clone()),
            Some(casted_right.clone()),
        )?;
        let direction: i64 = if less.is_truthy(&self.arena) {
            1
        } else {
            let greater = self.apply_operator(
                TokenKind::GreaterThan,
                &at,
                Some(casted_left.clone()),
                Some(casted_right.clone()),
            )?;
            if greater.is_truthy(&self.arena) {
                -1
            } else {
                0
            }
        };
        if direction == 0 && (left_exclusive || right_exclusive) {
            *i = after_body;
            return Ok(());
        }
        let mut iter = casted_left.as_integer(&self.arena).unwrap_or(0);
        let mut to = casted_right.as_integer(&self.arena).unwrap_or(0);
        if left_exclusive {
            iter = iter.wrapping_add_signed(direction);
        }
        if !right_exclusive {
            to = to.wrapping_add_signed(direction);
        }

        self.scopes.push(ScopeKind::Breakable);
        let slot = self
            .scopes
            .declare_variable(&mut self.arena, &self.bridge, &name, iter_ty, None);
        let iter_addr = slot.map(|slot| self.scopes.variable(slot).addr);
        let width = bytes as usize;
        let store = |addr: Option<*mut u8>, value: u64| {
            if let Some(addr) = addr {
                // SAFETY: iterator storage of at least `width` bytes
                unsafe {
                    std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), addr, width);
                }
            }
        };
        store(iter_addr, iter);
        loop {
            if direction != 0 && iter == to {
                break;
            }
            *i = start;
            if let Err(error) = self.run_codeblock(ts, end, i) {
                self.scopes.pop(&self.bridge);
                return Err(error);
            }
            if self.state == ExecState::Continue {
                self.set_state(ExecState::Running, None);
            }
            if self.state == ExecState::Break {
                self.set_state(ExecState::Running, None);
                break;
            }
            if self.state == ExecState::Return {
                break;
            }
            // equal inclusive bounds run the body exactly once
            if direction == 0 {
                break;
            }
            iter = iter.wrapping_add_signed(direction);
            store(iter_addr, iter);
        }
        *i = after_body;
        self.scopes.pop(&self.bridge);
        Ok(())
    }

    fn stmt_return(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<()> {
        let token = self.next(ts, end, i)?.clone();
        if token.kind == TokenKind::Semicolon {
            self.next(ts, end, i)?;
            if !self.dry_run {
                self.set_state(ExecState::Return, None);
            }
            return Ok(());
        }
        let value = self.eval_expression(ts, end, i, false)?;
        let value = value.filter(|v| !matches!(self.arena.get(v.ty).kind, TypeKind::Void));
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::Semicolon {
            return self.err(ErrorKind::Parse, &token, "Expected ';'");
        }
        self.next(ts, end, i)?;
        if !self.dry_run {
            self.set_state(ExecState::Return, value.as_ref());
        }
        Ok(())
    }

    fn stmt_include(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<()> {
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::StringLit {
            return self.err(ErrorKind::Parse, &token, "Expected string literal");
        }
        if self.dry_run {
            self.next(ts, end, i)?;
            return Ok(());
        }
        let base = token.file.as_ref().map(|f| f.to_string());
        let path = token.text().to_string();
        let loaded = self.resolver.load(base.as_deref(), &path);
        let (resolved, source) = match loaded {
            Ok(loaded) => loaded,
            Err(error) => {
                self.errors.push(PawError::new(
                    ErrorKind::Io,
                    &token,
                    format!("Cannot open file '{path}' for reading: {error}"),
                ));
                return Err(Interrupt);
            }
        };
        // includes extend the globals: run against the root scope only
        let detached = self.scopes.detach_to_root();
        let ok = self.run_unit(&source, Some(Rc::from(resolved.as_str())));
        self.scopes.restore(detached);
        self.next(ts, end, i)?;
        if ok {
            Ok(())
        } else {
            Err(Interrupt)
        }
    }

    fn attach_function_body(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        at: &crate::lexer::Token,
        name: &str,
    ) -> Exec<()> {
        let Some(slot) = self.scopes.find_variable(name) else {
            return self.err(
                ErrorKind::Parse,
                at,
                format!("Undefined variable '{name}'"),
            );
        };
        let variable = self.scopes.variable(slot);
        let (ty, addr) = (variable.ty, variable.addr);
        if !matches!(self.arena.get(ty).kind, TypeKind::Function { .. }) {
            return self.err(
                ErrorKind::Type,
                at,
                "Cannot attach code to a non-function type",
            );
        }
        self.next(ts, end, i)?;
        let start = *i;
        *i -= 1;
        self.scan_until(ts, end, i, TokenKind::BraceClose)?;
        let len = *i - start - 1;
        let Some(function) = self.create_function_checked(ty, ts, start, len)? else {
            return Err(Interrupt);
        };
        // SAFETY: function variables own an 8-byte slot
        unsafe {
            std::ptr::copy_nonoverlapping((function as u64).to_le_bytes().as_ptr(), addr, 8);
        }
        Ok(())
    }

    fn eval_declaration(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        ty: crate::types::TypeId,
        is_extern: bool,
        is_typedef: bool,
    ) -> Exec<()> {
        let token = tok(ts, *i).clone();
        if self.arena.get(ty).name.is_none() {
            if is_extern || is_typedef {
                return self.err(ErrorKind::Parse, &token, "Expected identifier");
            }
            if token.kind != TokenKind::Semicolon {
                return self.err(ErrorKind::Parse, &token, "Expected identifier or ';'");
            }
            self.next(ts, end, i)?;
            return Ok(());
        }
        if !is_typedef {
            match self.arena.get(ty).kind {
                TypeKind::Void => {
                    return self.err(ErrorKind::Type, &token, "Cannot declare void variable");
                }
                TypeKind::Struct(_) => {
                    return self.err(
                        ErrorKind::Type,
                        &token,
                        "Cannot declare non-pointer struct variable",
                    );
                }
                _ => {}
            }
        }
        if is_extern {
            self.arena.make_native(ty, true);
        }
        // first declarator name comes from the parsed type; further names
        // chain with commas
        let mut name = self.arena.get(ty).name.clone().unwrap_or_default();
        loop {
            let token = tok(ts, *i).clone();
            if name.is_empty() {
                if token.kind != TokenKind::Identifier {
                    return self.err(ErrorKind::Parse, &token, "Expected identifier");
                }
                name = token.text().to_string();
                self.next(ts, end, i)?;
            }
            if is_typedef {
                if !self.scopes.declare_typedef(&mut self.arena, &name, ty) {
                    return self.err(ErrorKind::Parse, &token, "Identifier already defined");
                }
            } else {
                let mut symbol = None;
                if is_extern {
                    let Some(resolved) = self.bridge.lookup_symbol(&name) else {
                        return self.err(
                            ErrorKind::Linkage,
                            &token,
                            format!("Cannot find symbol '{name}' in native context"),
                        );
                    };
                    if !self.is_symbol_allowed(resolved) {
                        return self.err(
                            ErrorKind::Linkage,
                            &token,
                            format!("The use of '{name}' is disallowed"),
                        );
                    }
                    symbol = Some(resolved);
                }
                let is_function = matches!(self.arena.get(ty).kind, TypeKind::Function { .. });
                let address = if is_function { None } else { symbol };
                let Some(slot) = self.scopes.declare_variable(
                    &mut self.arena,
                    &self.bridge,
                    &name,
                    ty,
                    address,
                ) else {
                    return self.err(ErrorKind::Parse, &token, "Identifier already defined");
                };
                let declared = tok(ts, *i).clone();
                if !is_extern {
                    if declared.kind == TokenKind::Equals {
                        self.next(ts, end, i)?;
                        let value = self.eval_expression(ts, end, i, true)?;
                        if let Some(value) = value {
                            let variable = self.scopes.variable(slot);
                            let (vty, vaddr) = (variable.ty, variable.addr);
                            let was_const = self.arena.get(vty).is_const;
                            self.arena.get_mut(vty).is_const = false;
                            let target = Value::lvalue(vty, vaddr);
                            self.assign_values(&declared, target, value)?;
                            self.arena.get_mut(vty).is_const = was_const;
                        } else if !self.dry_run {
                            return Err(Interrupt);
                        }
                    } else if declared.kind == TokenKind::BraceOpen {
                        let variable = self.scopes.variable(slot);
                        let (vty, vaddr) = (variable.ty, variable.addr);
                        if !matches!(self.arena.get(vty).kind, TypeKind::Function { .. }) {
                            return self.err(
                                ErrorKind::Type,
                                &declared,
                                "Cannot attach code to a non-function type",
                            );
                        }
                        self.next(ts, end, i)?;
                        let start = *i;
                        *i -= 1;
                        self.scan_until(ts, end, i, TokenKind::BraceClose)?;
                        let len = *i - start - 1;
                        let Some(function) = self.create_function_checked(vty, ts, start, len)?
                        else {
                            return Err(Interrupt);
                        };
                        // SAFETY: function variables own an 8-byte slot
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                (function as u64).to_le_bytes().as_ptr(),
                                vaddr,
                                8,
                            );
                        }
                        return Ok(());
                    }
                } else if is_function {
                    if let Some(symbol) = symbol {
                        let variable = self.scopes.variable(slot);
                        // SAFETY: function variables own an 8-byte slot
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                (symbol as u64).to_le_bytes().as_ptr(),
                                variable.addr,
                                8,
                            );
                        }
                    }
                }
            }
            name.clear();
            let token = tok(ts, *i).clone();
            if token.kind == TokenKind::Comma {
                self.next(ts, end, i)?;
                continue;
            }
            if token.kind == TokenKind::Semicolon {
                self.next(ts, end, i)?;
                return Ok(());
            }
            return self.err(ErrorKind::Parse, &token, "Expected ',' or ';'");
        }
    }
}
