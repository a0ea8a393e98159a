//! Parsing of type expressions.
//!
//! Types appear in declarations, `cast<...>`, `new<...>`, `offsetof<...>`
//! and vararg descriptors. Parsing is cursor-based over the token stream;
//! when the tokens do not start a type the cursor is restored and `None`
//! comes back so the caller can retry the tokens as an expression.

use crate::error::{ErrorKind, Exec};
use crate::lexer::TokenKind;
use crate::scope::ScopeKind;
use crate::types::{Field, TypeId, TypeKind};

use super::{tok, PawScriptContext, TokenList};

impl PawScriptContext {
    pub(crate) fn parse_type(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
    ) -> Exec<Option<TypeId>> {
        let start = *i;
        let mut token = tok(ts, *i);
        let mut is_const = false;
        if token.kind == TokenKind::Const {
            token = self.next(ts, end, i)?;
            is_const = true;
        }

        let mut ty = match token.kind {
            TokenKind::Bool | TokenKind::U8 => self.fresh_int(ts, end, i, 1, true, is_const)?,
            TokenKind::U16 => self.fresh_int(ts, end, i, 2, true, is_const)?,
            TokenKind::U32 => self.fresh_int(ts, end, i, 4, true, is_const)?,
            TokenKind::U64 => self.fresh_int(ts, end, i, 8, true, is_const)?,
            TokenKind::S8 => self.fresh_int(ts, end, i, 1, false, is_const)?,
            TokenKind::S16 => self.fresh_int(ts, end, i, 2, false, is_const)?,
            TokenKind::S32 => self.fresh_int(ts, end, i, 4, false, is_const)?,
            TokenKind::S64 => self.fresh_int(ts, end, i, 8, false, is_const)?,
            TokenKind::F32 => self.fresh_prim(ts, end, i, TypeKind::Float(4), is_const)?,
            TokenKind::F64 => self.fresh_prim(ts, end, i, TypeKind::Float(8), is_const)?,
            TokenKind::Void => self.fresh_prim(ts, end, i, TypeKind::Void, is_const)?,
            TokenKind::Struct => self.parse_struct_body(ts, end, i)?,
            TokenKind::Identifier => {
                let name = token.text().to_string();
                match self.scopes.find_type(&name) {
                    Some(found) => {
                        let copy = self.arena.copy(found);
                        self.arena.get_mut(copy).is_const = is_const;
                        self.arena.get_mut(copy).name = None;
                        self.next(ts, end, i)?;
                        copy
                    }
                    None => {
                        if is_const {
                            let at = token.clone();
                            return self.err(
                                ErrorKind::Parse,
                                &at,
                                format!("Undefined type '{name}'"),
                            );
                        }
                        if self.scopes.find_variable(&name).is_some() {
                            *i = start;
                            return Ok(None);
                        }
                        let at = token.clone();
                        return self.err(
                            ErrorKind::Parse,
                            &at,
                            format!("Undefined identifier '{name}'"),
                        );
                    }
                }
            }
            _ => {
                if is_const {
                    let at = token.clone();
                    return self.err(ErrorKind::Parse, &at, "Invalid token");
                }
                *i = start;
                return Ok(None);
            }
        };

        // pointer, const, signature and binding-name suffixes
        loop {
            let token = tok(ts, *i).clone();
            match token.kind {
                TokenKind::DoubleAsterisk => {
                    let inner = self.arena.alloc(TypeKind::Pointer(ty));
                    ty = self.arena.alloc(TypeKind::Pointer(inner));
                    self.next(ts, end, i)?;
                }
                TokenKind::Asterisk => {
                    ty = self.arena.alloc(TypeKind::Pointer(ty));
                    self.next(ts, end, i)?;
                }
                TokenKind::Const => {
                    if self.arena.get(ty).is_const {
                        return self.err(ErrorKind::Parse, &token, "Already const");
                    }
                    self.arena.get_mut(ty).is_const = true;
                    self.next(ts, end, i)?;
                }
                TokenKind::ParenOpen => {
                    ty = self.parse_signature(ts, end, i, ty)?;
                }
                TokenKind::Identifier => {
                    let name = token.text().to_string();
                    self.next(ts, end, i)?;
                    // `T name(args)` binds the name to the function type,
                    // `T(args) name` and plain `T name` bind it directly
                    if tok(ts, *i).kind == TokenKind::ParenOpen {
                        ty = self.parse_signature(ts, end, i, ty)?;
                        self.arena.get_mut(ty).name = Some(name);
                        continue;
                    }
                    self.arena.get_mut(ty).name = Some(name);
                    break;
                }
                _ => break,
            }
        }
        Ok(Some(ty))
    }

    fn fresh_int(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        bytes: u8,
        unsigned: bool,
        is_const: bool,
    ) -> Exec<TypeId> {
        let id = self.arena.alloc(TypeKind::Int(bytes));
        self.arena.get_mut(id).is_unsigned = unsigned;
        self.arena.get_mut(id).is_const = is_const;
        self.next(ts, end, i)?;
        Ok(id)
    }

    fn fresh_prim(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        kind: TypeKind,
        is_const: bool,
    ) -> Exec<TypeId> {
        let id = self.arena.alloc(kind);
        self.arena.get_mut(id).is_const = is_const;
        self.next(ts, end, i)?;
        Ok(id)
    }

    fn parse_struct_body(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<TypeId> {
        let mut ty = self.arena.alloc(TypeKind::Struct(vec![]));
        self.arena.get_mut(ty).is_incomplete = true;
        let mut token = self.next(ts, end, i)?.clone();

        let mut struct_name = None;
        if token.kind == TokenKind::Identifier {
            let name = token.text().to_string();
            if !self.scopes.declare_typedef(&mut self.arena, &name, ty) {
                return self.err(ErrorKind::Parse, &token, "Identifier already taken");
            }
            struct_name = Some(name);
            token = self.next(ts, end, i)?.clone();
        }

        // struct Name : Base { ... } starts from a copy of the base's fields
        if token.kind == TokenKind::Colon {
            token = self.next(ts, end, i)?.clone();
            if token.kind != TokenKind::Identifier {
                return self.err(ErrorKind::Parse, &token, "Expected identifier");
            }
            let base_name = token.text().to_string();
            let Some(base) = self.scopes.find_type(&base_name) else {
                return self.err(
                    ErrorKind::Parse,
                    &token,
                    format!("Undefined type '{base_name}'"),
                );
            };
            if !matches!(self.arena.get(base).kind, TypeKind::Struct(_)) {
                return self.err(
                    ErrorKind::Type,
                    &token,
                    format!("Type '{base_name}' is not a struct"),
                );
            }
            ty = self.arena.copy(base);
            self.arena.get_mut(ty).name = None;
            token = self.next(ts, end, i)?.clone();
        }

        if token.kind != TokenKind::BraceOpen {
            return self.err(ErrorKind::Parse, &token, "Expected '{'");
        }
        token = self.next(ts, end, i)?.clone();

        loop {
            if token.kind == TokenKind::BraceClose {
                break;
            }
            if token.kind == TokenKind::Semicolon {
                token = self.next(ts, end, i)?.clone();
                continue;
            }
            let field = match self.parse_type(ts, end, i)? {
                Some(field) => field,
                None => {
                    let at = tok(ts, *i).clone();
                    if at.kind == TokenKind::Identifier {
                        return self.err(
                            ErrorKind::Parse,
                            &at,
                            format!("Undefined type '{}'", at.text()),
                        );
                    }
                    return self.err(ErrorKind::Parse, &at, "Invalid token");
                }
            };
            token = tok(ts, *i).clone();
            let mut offset = self.arena.next_field_offset(ty, field);

            // `@ expr` overrides the default offset; the expression sees the
            // field names declared so far bound to their offsets
            if token.kind == TokenKind::At {
                self.next(ts, end, i)?;
                self.scopes.push(ScopeKind::Regular);
                let u64_ty = self.arena.int_ty(8, true);
                let mut bindings: Vec<(String, u64)> = Vec::new();
                if let TypeKind::Struct(fields) = &self.arena.get(ty).kind {
                    for existing in fields {
                        bindings.push((existing.name.clone(), existing.offset as u64));
                    }
                }
                if let Some(name) = self.arena.get(field).name.clone() {
                    bindings.push((name, offset as u64));
                }
                for (name, value) in bindings {
                    if let Some(at) = self.scopes.declare_variable(
                        &mut self.arena,
                        &self.bridge,
                        &name,
                        u64_ty,
                        None,
                    ) {
                        let addr = self.scopes.variable(at).addr;
                        // SAFETY: fresh 8-byte binding storage
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                value.to_le_bytes().as_ptr(),
                                addr,
                                8,
                            );
                        }
                    }
                }
                let result = self.eval_expression(ts, end, i, true)?;
                let custom = result.and_then(|value| value.as_integer(&self.arena));
                self.scopes.pop(&self.bridge);
                let Some(custom) = custom else {
                    let at = tok(ts, *i).clone();
                    return self.err(ErrorKind::Type, &at, "Expression must return an integer");
                };
                offset = custom as usize;
                token = tok(ts, *i).clone();
            }

            if token.kind != TokenKind::Semicolon {
                return self.err(ErrorKind::Parse, &token, "Expected ';'");
            }
            let Some(field_name) = self.arena.get(field).name.clone() else {
                return self.err(ErrorKind::Parse, &token, "Nameless field");
            };
            let field_node = self.arena.get(field);
            if matches!(field_node.kind, TypeKind::Void) || field_node.is_incomplete {
                return self.err(
                    ErrorKind::Type,
                    &token,
                    "Cannot define field with incomplete or void type",
                );
            }
            if let TypeKind::Struct(fields) = &mut self.arena.get_mut(ty).kind {
                fields.push(Field {
                    name: field_name,
                    ty: field,
                    offset,
                });
            }
            token = self.next(ts, end, i)?.clone();
        }
        self.next(ts, end, i)?;

        self.arena.get_mut(ty).is_incomplete = false;
        self.arena.replace_incompletes(ty);
        if let Some(name) = struct_name {
            self.scopes.declare_typedef(&mut self.arena, &name, ty);
        }
        Ok(ty)
    }

    fn parse_signature(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        ret: TypeId,
    ) -> Exec<TypeId> {
        if matches!(self.arena.get(ret).kind, TypeKind::Struct(_)) {
            let at = tok(ts, *i).clone();
            return self.err(
                ErrorKind::Type,
                &at,
                "Cannot define a function that returns a non-pointer struct",
            );
        }
        let mut token = self.next(ts, end, i)?.clone();
        let func = self.arena.alloc(TypeKind::Function { ret, args: vec![] });
        if token.kind == TokenKind::ParenClose {
            self.next(ts, end, i)?;
            return Ok(func);
        }
        loop {
            if token.kind == TokenKind::TripleDot {
                let varargs = self.arena.alloc(TypeKind::Varargs);
                self.arena.get_mut(varargs).name = Some("...".into());
                token = self.next(ts, end, i)?.clone();
                self.push_arg(func, varargs);
                if token.kind != TokenKind::ParenClose {
                    return self.err(ErrorKind::Parse, &token, "Expected ')'");
                }
                break;
            }
            let arg = match self.parse_type(ts, end, i)? {
                Some(arg) => arg,
                None => {
                    let at = tok(ts, *i).clone();
                    if at.kind == TokenKind::Identifier {
                        return self.err(
                            ErrorKind::Parse,
                            &at,
                            format!("Undefined type '{}'", at.text()),
                        );
                    }
                    return self.err(ErrorKind::Parse, &at, "Invalid token");
                }
            };
            self.push_arg(func, arg);
            match self.arena.get(arg).kind {
                TypeKind::Void => {
                    let at = tok(ts, *i).clone();
                    return self.err(
                        ErrorKind::Type,
                        &at,
                        "Cannot define argument with void type",
                    );
                }
                TypeKind::Struct(_) => {
                    let at = tok(ts, *i).clone();
                    return self.err(
                        ErrorKind::Type,
                        &at,
                        "Cannot define argument with struct type",
                    );
                }
                _ => {}
            }
            token = tok(ts, *i).clone();
            if token.kind == TokenKind::Comma {
                token = self.next(ts, end, i)?.clone();
                continue;
            }
            if token.kind == TokenKind::ParenClose {
                break;
            }
            return self.err(ErrorKind::Parse, &token, "Expected ',' or ')'");
        }
        self.next(ts, end, i)?;
        Ok(func)
    }

    fn push_arg(&mut self, func: TypeId, arg: TypeId) {
        if let TypeKind::Function { args, .. } = &mut self.arena.get_mut(func).kind {
            args.push(arg);
        }
    }
}
