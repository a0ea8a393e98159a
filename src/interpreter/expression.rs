//! Expression evaluation.
//!
//! Expressions are processed in two phases: a delimiter-balanced operand
//! scan that measures each operand's token span without evaluating, and a
//! shunting-yard pass building a tree that is then evaluated recursively.
//! `&&`/`||` short-circuit by skipping the right subtree entirely; the
//! conditional expression and statement-level constructs skip token ranges
//! through the context's dry-run flag instead.

use crate::error::{ErrorKind, Exec};
use crate::ffi::CallFrame;
use crate::lexer::{Token, TokenKind, TokenValue};
use crate::scope::{ScopeKind, VarargsPack};
use crate::types::{Field, TypeId, TypeKind};

use super::value::{matches_category, Category, Value};
use super::{tok, ExecState, PawScriptContext, TokenList};

/// Binary operator precedence; zero means "not a binary operator".
pub(crate) fn precedence(kind: TokenKind) -> u8 {
    use TokenKind::*;
    match kind {
        Equals | PlusEquals | MinusEquals | AsteriskEquals | SlashEquals | PercentEquals
        | DoubleAsteriskEquals | DoubleLessThanEquals | DoubleGreaterThanEquals
        | AmpersandEquals | CaretEquals | PipeEquals => 1,
        DoublePipe => 2,
        DoubleAmpersand => 3,
        Pipe => 4,
        Caret => 5,
        Ampersand => 6,
        DoubleEquals | NotEquals => 7,
        LessThan | GreaterThan | LessThanEquals | GreaterThanEquals => 8,
        DoubleLessThan | DoubleGreaterThan => 9,
        Plus | Minus => 10,
        Asterisk | Slash | Percent => 11,
        DoubleAsterisk => 12,
        _ => 0,
    }
}

fn is_unary_prefix(kind: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        kind,
        Plus | Minus
            | DoublePlus
            | DoubleMinus
            | Ampersand
            | Asterisk
            | DoubleAsterisk
            | Exclamation
            | Tilde
    )
}

enum ExprItem {
    Operand { lo: usize, len: usize },
    Operator(usize),
}

enum ExprNode {
    Leaf {
        lo: usize,
        len: usize,
    },
    Branch {
        op: usize,
        a: Box<ExprNode>,
        b: Box<ExprNode>,
    },
}

fn build_tree(ts: &TokenList, items: Vec<ExprItem>) -> ExprNode {
    let mut nodes: Vec<ExprNode> = Vec::new();
    let mut ops: Vec<usize> = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match item {
            ExprItem::Operator(at) if index % 2 == 1 => {
                let prec = precedence(ts[at].kind);
                let right_assoc = prec == 1;
                while let Some(&top) = ops.last() {
                    let top_prec = precedence(ts[top].kind);
                    let reduce = if right_assoc {
                        top_prec > prec
                    } else {
                        top_prec >= prec
                    };
                    if !reduce {
                        break;
                    }
                    let b = nodes.pop().expect("operand stack underflow");
                    let a = nodes.pop().expect("operand stack underflow");
                    nodes.push(ExprNode::Branch {
                        op: ops.pop().expect("operator stack underflow"),
                        a: Box::new(a),
                        b: Box::new(b),
                    });
                }
                ops.push(at);
            }
            ExprItem::Operand { lo, len } => nodes.push(ExprNode::Leaf { lo, len }),
            ExprItem::Operator(at) => nodes.push(ExprNode::Leaf { lo: at, len: 0 }),
        }
    }
    while let Some(op) = ops.pop() {
        let b = nodes.pop().expect("operand stack underflow");
        let a = nodes.pop().expect("operand stack underflow");
        nodes.push(ExprNode::Branch {
            op,
            a: Box::new(a),
            b: Box::new(b),
        });
    }
    nodes.pop().expect("expression without operands")
}

impl PawScriptContext {
    /// Evaluate one expression starting at the cursor. Returns `None` when
    /// the context is in dry-run mode (tokens consumed, nothing evaluated).
    pub(crate) fn eval_expression(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        no_void: bool,
    ) -> Exec<Option<Value>> {
        let start = tok(ts, *i).clone();
        let mut items = Vec::new();
        loop {
            let lo = *i;
            let len = self.scan_operand(ts, end, i)?;
            items.push(ExprItem::Operand { lo, len });
            let token = tok(ts, *i);
            if precedence(token.kind) != 0 {
                items.push(ExprItem::Operator(*i));
            } else {
                break;
            }
            self.next(ts, end, i)?;
        }
        if self.dry_run {
            return Ok(None);
        }
        let tree = build_tree(ts, items);
        let out = self.eval_tree(ts, &tree)?;
        if no_void && matches!(self.arena.get(out.ty).kind, TypeKind::Void) {
            return self.err(ErrorKind::Type, &start, "Expression cannot return void");
        }
        Ok(Some(out))
    }

    fn eval_tree(&mut self, ts: &TokenList, node: &ExprNode) -> Exec<Value> {
        match node {
            ExprNode::Leaf { lo, len } => self.eval_leaf(ts, *lo, *lo + *len),
            ExprNode::Branch { op, a, b } => {
                let left = self.eval_tree(ts, a)?;
                let kind = ts[*op].kind;
                // short-circuit: the left operand passes through unevaluated
                if kind == TokenKind::DoubleAmpersand && !left.is_truthy(&self.arena) {
                    return Ok(left);
                }
                if kind == TokenKind::DoublePipe && left.is_truthy(&self.arena) {
                    return Ok(left);
                }
                let right = self.eval_tree(ts, b)?;
                let at = ts[*op].clone();
                self.apply_operator(kind, &at, Some(left), Some(right))
            }
        }
    }

    /// Measure one operand's token span without evaluating anything.
    pub(crate) fn scan_operand(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<usize> {
        use TokenKind::*;
        let start = *i;
        let mut token = tok(ts, *i);
        while is_unary_prefix(token.kind) {
            token = self.next(ts, end, i)?;
        }
        match token.kind {
            IntegerLit | FloatLit | StringLit | Identifier | False | True | Null | This => {
                self.next(ts, end, i)?;
            }
            ParenOpen => self.scan_until(ts, end, i, ParenClose)?,
            TripleDot => {
                let token = self.next(ts, end, i)?;
                if token.kind == BracketOpen {
                    self.scan_until(ts, end, i, BracketClose)?;
                }
            }
            New => {
                let mut token = self.next(ts, end, i)?;
                if token.kind == Scoped {
                    token = self.next(ts, end, i)?;
                }
                if token.kind == LessThan {
                    self.scan_until(ts, end, i, GreaterThan)?;
                }
                if tok(ts, *i).kind == ParenOpen {
                    self.scan_until(ts, end, i, ParenClose)?;
                }
                if tok(ts, *i).kind == BraceOpen {
                    self.scan_until(ts, end, i, BraceClose)?;
                }
            }
            Promote => {
                let token = self.next(ts, end, i)?;
                if token.kind == IntegerLit || token.kind == Global {
                    self.next(ts, end, i)?;
                }
                if tok(ts, *i).kind == ParenOpen {
                    self.scan_until(ts, end, i, ParenClose)?;
                }
                if tok(ts, *i).kind == Arrow {
                    self.next(ts, end, i)?;
                }
                if tok(ts, *i).kind == BracketOpen {
                    self.scan_until(ts, end, i, BracketClose)?;
                }
            }
            Delete | Adopt => {
                let token = self.next(ts, end, i)?;
                if token.kind == ParenOpen {
                    self.scan_until(ts, end, i, ParenClose)?;
                }
            }
            Cast | Bitcast => {
                let token = self.next(ts, end, i)?;
                if token.kind == LessThan {
                    self.scan_until(ts, end, i, GreaterThan)?;
                }
                if tok(ts, *i).kind == ParenOpen {
                    self.scan_until(ts, end, i, ParenClose)?;
                }
            }
            Sizeof | Scopeof | Infoof => {
                let token = self.next(ts, end, i)?;
                if token.kind == ParenOpen {
                    self.scan_until(ts, end, i, ParenClose)?;
                }
            }
            Offsetof => {
                let token = self.next(ts, end, i)?;
                if token.kind == LessThan {
                    self.scan_until(ts, end, i, GreaterThan)?;
                }
                if tok(ts, *i).kind == Dot {
                    self.next(ts, end, i)?;
                }
                if tok(ts, *i).kind == Identifier {
                    self.next(ts, end, i)?;
                }
            }
            If => {
                self.scan_until(ts, end, i, Arrow)?;
                if tok(ts, *i).kind == BracketOpen {
                    self.scan_until(ts, end, i, BracketClose)?;
                }
            }
            _ => {}
        }
        // postfix chain: members, calls, indexing, ++/--/?/??
        loop {
            let token = tok(ts, *i);
            match token.kind {
                DoublePlus | DoubleMinus | Question | DoubleQuestion => {
                    self.next(ts, end, i)?;
                }
                Dot => {
                    self.next(ts, end, i)?;
                    if tok(ts, *i).kind == Identifier {
                        self.next(ts, end, i)?;
                    }
                }
                BracketOpen => self.scan_until(ts, end, i, BracketClose)?,
                ParenOpen => self.scan_until(ts, end, i, ParenClose)?,
                _ => break,
            }
        }
        Ok(*i - start)
    }

    /// Evaluate a single operand: literal or intrinsic head plus its postfix
    /// chain, with any unary prefixes applied afterwards.
    fn eval_leaf(&mut self, ts: &TokenList, lo: usize, end: usize) -> Exec<Value> {
        use TokenKind::*;
        let mut cursor = lo;
        let i = &mut cursor;
        let mut token = tok(ts, *i).clone();

        let mut unary: Vec<Token> = Vec::new();
        while is_unary_prefix(token.kind) {
            // two consecutive dereferences lex as the power symbol
            if token.kind == DoubleAsterisk {
                unary.push(token.clone());
            }
            unary.push(token.clone());
            token = self.next(ts, end, i)?.clone();
        }

        let mut variable: Value = match token.kind {
            IntegerLit => {
                let num = token.int();
                let ty = if num < 2147483648 {
                    self.arena.int_ty(4, false)
                } else if num < 9223372036854775808 {
                    self.arena.int_ty(8, false)
                } else {
                    self.arena.int_ty(8, true)
                };
                self.next(ts, end, i)?;
                Value::from_raw(&self.arena, ty, num)
            }
            FloatLit => {
                let ty = self.arena.float_ty(8);
                let value = Value::rvalue(ty, token.float().to_le_bytes().to_vec());
                self.next(ts, end, i)?;
                value
            }
            StringLit => {
                // the pointer aims at the token's retained, NUL-terminated bytes
                let address = match &ts[*i].value {
                    TokenValue::Str(s) => s.as_ptr() as u64,
                    _ => 0,
                };
                let base = self.arena.const_s8_ty();
                let ty = self.arena.pointer_to(base);
                self.next(ts, end, i)?;
                Value::from_raw(&self.arena, ty, address)
            }
            True | False => {
                let ty = self.arena.int_ty(1, true);
                let value = Value::rvalue(ty, vec![(token.kind == True) as u8]);
                self.next(ts, end, i)?;
                value
            }
            Null => {
                let ty = self.arena.void_pointer_ty();
                self.next(ts, end, i)?;
                Value::from_raw(&self.arena, ty, 0)
            }
            Identifier => {
                let name = token.text().to_string();
                let Some(at) = self.scopes.find_variable(&name) else {
                    return self.err(
                        ErrorKind::Parse,
                        &token,
                        format!("Undefined variable '{name}'"),
                    );
                };
                let var = self.scopes.variable(at);
                let value = Value::lvalue(var.ty, var.addr);
                self.next(ts, end, i)?;
                value
            }
            This => {
                let Some(at) = self.scopes.find_variable("this") else {
                    return self.err(ErrorKind::Parse, &token, "Undefined variable 'this'");
                };
                let var = self.scopes.variable(at);
                let value = Value::lvalue(var.ty, var.addr);
                self.next(ts, end, i)?;
                value
            }
            TripleDot => return self.eval_vararg_index(ts, end, i),
            ParenOpen => {
                self.next(ts, end, i)?;
                let Some(value) = self.eval_expression(ts, end, i, true)? else {
                    return Err(crate::error::Interrupt);
                };
                let close = tok(ts, *i).clone();
                if close.kind != ParenClose {
                    return self.err(ErrorKind::Parse, &close, "Expected ')'");
                }
                self.next(ts, end, i)?;
                value
            }
            Cast | Bitcast => {
                let bitcast = token.kind == Bitcast;
                let token = self.next(ts, end, i)?.clone();
                if token.kind != LessThan {
                    return self.err(ErrorKind::Parse, &token, "Expected '<'");
                }
                self.next(ts, end, i)?;
                let target = self.expect_type(ts, end, i)?;
                let token = tok(ts, *i).clone();
                if token.kind != GreaterThan {
                    return self.err(ErrorKind::Parse, &token, "Expected '>'");
                }
                let token = self.next(ts, end, i)?.clone();
                if token.kind != ParenOpen {
                    return self.err(ErrorKind::Parse, &token, "Expected '('");
                }
                self.next(ts, end, i)?;
                let Some(input) = self.eval_expression(ts, end, i, true)? else {
                    return Err(crate::error::Interrupt);
                };
                let token = tok(ts, *i).clone();
                if token.kind != ParenClose {
                    return self.err(ErrorKind::Parse, &token, "Expected ')'");
                }
                self.next(ts, end, i)?;
                self.cast_value(target, &input, bitcast)
            }
            Sizeof => {
                let token = self.next(ts, end, i)?.clone();
                if token.kind != ParenOpen {
                    return self.err(ErrorKind::Parse, &token, "Expected '('");
                }
                self.next(ts, end, i)?;
                let ty = match self.parse_type(ts, end, i)? {
                    Some(ty) => ty,
                    None => {
                        let Some(value) = self.eval_expression(ts, end, i, true)? else {
                            return Err(crate::error::Interrupt);
                        };
                        value.ty
                    }
                };
                let size = self.arena.size_of(ty) as u64;
                let token = tok(ts, *i).clone();
                if token.kind != ParenClose {
                    return self.err(ErrorKind::Parse, &token, "Expected ')'");
                }
                self.next(ts, end, i)?;
                let u64_ty = self.arena.int_ty(8, true);
                Value::from_raw(&self.arena, u64_ty, size)
            }
            Offsetof => self.eval_offsetof(ts, end, i)?,
            Scopeof => self.eval_scopeof(ts, end, i)?,
            Infoof => self.eval_infoof(ts, end, i)?,
            New => self.eval_new(ts, end, i)?,
            Delete => {
                let ptr = self.eval_pointer_intrinsic(ts, end, i, "delete")?;
                self.scopes
                    .free_allocation(&self.bridge, ptr as *mut u8, false);
                let ty = self.arena.void_pointer_ty();
                Value::from_raw(&self.arena, ty, 0)
            }
            Adopt => {
                let ptr = self.eval_pointer_intrinsic(ts, end, i, "adopt")?;
                let current = self.scopes.current_index();
                self.scopes.move_allocation(current, ptr as *mut u8);
                let ty = self.arena.void_pointer_ty();
                Value::from_raw(&self.arena, ty, ptr)
            }
            Promote => self.eval_promote(ts, end, i)?,
            If => self.eval_conditional(ts, end, i)?,
            _ => return self.err(ErrorKind::Parse, &token, "Expected expression"),
        };

        // postfix chain
        let mut receiver: Option<Value> = None;
        loop {
            let token = tok(ts, *i).clone();
            match token.kind {
                Dot => {
                    let (next_var, next_receiver) =
                        self.eval_member_access(ts, end, i, variable)?;
                    variable = next_var;
                    receiver = next_receiver;
                }
                DoublePlus | DoubleMinus | Question | DoubleQuestion => {
                    variable = self.apply_operator(token.kind, &token, None, Some(variable))?;
                }
                ParenOpen => {
                    variable =
                        self.eval_call(ts, end, i, variable, receiver.take(), &token)?;
                }
                BracketOpen => {
                    if !matches!(self.arena.get(variable.ty).kind, TypeKind::Pointer(_)) {
                        return self.err(
                            ErrorKind::Memory,
                            &token,
                            "Cannot dereference a non-pointer type",
                        );
                    }
                    if !self.can_dereference(&variable) {
                        let addr = variable.raw_u64(&self.arena);
                        return self.err(
                            ErrorKind::Memory,
                            &token,
                            format!("Invalid dereference of pointer 0x{addr:x}"),
                        );
                    }
                    self.next(ts, end, i)?;
                    let Some(offset) = self.eval_expression(ts, end, i, true)? else {
                        return Err(crate::error::Interrupt);
                    };
                    if !matches_category(&self.arena, Category::Integer, Some(&offset)) {
                        let at = tok(ts, *i).clone();
                        return self.err(
                            ErrorKind::Type,
                            &at,
                            "Expression must return an integer",
                        );
                    }
                    let close = tok(ts, *i).clone();
                    if close.kind != BracketClose {
                        return self.err(ErrorKind::Parse, &close, "Expected ']'");
                    }
                    // p[i] is *(p + i)
                    variable = self.apply_operator(
                        TokenKind::Plus,
                        &close,
                        Some(variable),
                        Some(offset),
                    )?;
                    variable =
                        self.apply_operator(TokenKind::Asterisk, &close, Some(variable), None)?;
                }
                _ => break,
            }
            self.next(ts, end, i)?;
        }

        // unary prefixes, innermost first
        while let Some(token) = unary.pop() {
            let kind = if token.kind == DoubleAsterisk {
                TokenKind::Asterisk
            } else {
                token.kind
            };
            variable = self.apply_operator(kind, &token, Some(variable), None)?;
        }
        Ok(variable)
    }

    fn expect_type(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<TypeId> {
        match self.parse_type(ts, end, i)? {
            Some(ty) => Ok(ty),
            None => {
                let at = tok(ts, *i).clone();
                if at.kind == TokenKind::Identifier {
                    return self.err(
                        ErrorKind::Parse,
                        &at,
                        format!("Undefined type '{}'", at.text()),
                    );
                }
                self.err(ErrorKind::Parse, &at, "Expected type")
            }
        }
    }

    fn eval_vararg_index(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<Value> {
        let at = tok(ts, *i).clone();
        let Some(slot) = self.scopes.find_variable("...") else {
            return self.err(
                ErrorKind::Runtime,
                &at,
                "Function doesn't take any variadic arguments",
            );
        };
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::BracketOpen {
            return self.err(ErrorKind::Parse, &token, "Expected '['");
        }
        self.next(ts, end, i)?;
        let Some(index) = self.eval_expression(ts, end, i, true)? else {
            return Err(crate::error::Interrupt);
        };
        let Some(index) = index.as_integer(&self.arena) else {
            let at = tok(ts, *i).clone();
            return self.err(ErrorKind::Type, &at, "Expression must return an integer");
        };
        let args: Vec<Value> = self
            .scopes
            .variable(slot)
            .pack
            .as_ref()
            .map(|pack| pack.args.clone())
            .unwrap_or_default();
        if index as usize >= args.len() {
            let at = tok(ts, *i).clone();
            return self.err(ErrorKind::Runtime, &at, "Index out of bounds");
        }
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::BracketClose {
            return self.err(ErrorKind::Parse, &token, "Expected ']'");
        }
        self.next(ts, end, i)?;
        let arg = &args[index as usize];
        Ok(self.cast_value(arg.ty, arg, false))
    }

    fn eval_offsetof(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<Value> {
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::LessThan {
            return self.err(ErrorKind::Parse, &token, "Expected '<'");
        }
        self.next(ts, end, i)?;
        let ty = self.expect_type(ts, end, i)?;
        let TypeKind::Struct(fields) = self.arena.get(ty).kind.clone() else {
            let at = tok(ts, *i).clone();
            return self.err(ErrorKind::Type, &at, "Type must specify a struct");
        };
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::GreaterThan {
            return self.err(ErrorKind::Parse, &token, "Expected '>'");
        }
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::Dot {
            return self.err(ErrorKind::Parse, &token, "Expected '.'");
        }
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::Identifier {
            return self.err(ErrorKind::Parse, &token, "Expected identifier");
        }
        let Some(offset) = fields
            .iter()
            .find(|field| field.name == token.text())
            .map(|field| field.offset as u64)
        else {
            return self.err(
                ErrorKind::Type,
                &token,
                format!("Unknown field name '{}'", token.text()),
            );
        };
        self.next(ts, end, i)?;
        let u64_ty = self.arena.int_ty(8, true);
        Ok(Value::from_raw(&self.arena, u64_ty, offset))
    }

    fn eval_scopeof(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<Value> {
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::ParenOpen {
            return self.err(ErrorKind::Parse, &token, "Expected '('");
        }
        let token = self.next(ts, end, i)?.clone();
        let depth = match token.kind {
            TokenKind::This => self.scopes.current_index() as u64,
            TokenKind::Identifier => {
                let Some(at) = self.scopes.find_variable(token.text()) else {
                    return self.err(
                        ErrorKind::Parse,
                        &token,
                        format!("Undefined variable '{}'", token.text()),
                    );
                };
                at.0 as u64
            }
            _ => {
                return self.err(ErrorKind::Parse, &token, "Expected identifier or 'this'");
            }
        };
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::ParenClose {
            return self.err(ErrorKind::Parse, &token, "Expected ')'");
        }
        self.next(ts, end, i)?;
        let s32 = self.arena.int_ty(4, false);
        Ok(Value::from_raw(&self.arena, s32, depth))
    }

    fn infoof_type(&mut self) -> TypeId {
        if let Some(ty) = self.infoof_ty {
            return ty;
        }
        let void_ptr = self.arena.void_pointer_ty();
        let u64_ty = self.arena.int_ty(8, true);
        let s32_ty = self.arena.int_ty(4, false);
        let u8_ty = self.arena.int_ty(1, true);
        let fields = [
            ("pointer", void_ptr, 0),
            ("bytes", u64_ty, 8),
            ("length", u64_ty, 16),
            ("scope", s32_ty, 24),
            ("is_valid", u8_ty, 28),
        ]
        .map(|(name, ty, offset)| {
            let ty = self.arena.copy(ty);
            self.arena.get_mut(ty).name = Some(name.to_string());
            Field {
                name: name.to_string(),
                ty,
                offset,
            }
        });
        let info = self.arena.alloc(TypeKind::Struct(fields.to_vec()));
        let ty = self.arena.alloc(TypeKind::Pointer(info));
        self.infoof_ty = Some(ty);
        ty
    }

    fn eval_infoof(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<Value> {
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::ParenOpen {
            return self.err(ErrorKind::Parse, &token, "Expected '('");
        }
        self.next(ts, end, i)?;
        let Some(value) = self.eval_expression(ts, end, i, true)? else {
            return Err(crate::error::Interrupt);
        };
        if !self.arena.is_pointer_like(value.ty) {
            let at = tok(ts, *i).clone();
            return self.err(ErrorKind::Type, &at, "Expression must return a pointer");
        }
        let ptr = value.raw_u64(&self.arena) as *mut u8;
        let mut info = [0u8; 32];
        if let Some((scope, base, size)) = self.scopes.find_allocation(ptr, 1) {
            let element = match self.arena.get(value.ty).kind {
                TypeKind::Pointer(base) => self.arena.size_of(base).max(1),
                _ => 1,
            };
            info[0..8].copy_from_slice(&(base as u64).to_le_bytes());
            info[8..16].copy_from_slice(&(size as u64).to_le_bytes());
            info[16..24].copy_from_slice(&((size / element) as u64).to_le_bytes());
            info[24..28].copy_from_slice(&(scope as i32).to_le_bytes());
            info[28] = 1;
        }
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::ParenClose {
            return self.err(ErrorKind::Parse, &token, "Expected ')'");
        }
        self.next(ts, end, i)?;
        let ty = self.infoof_type();
        let current = self.scopes.current_index();
        let Some(storage) = self
            .scopes
            .allocate(&self.bridge, current, info.len(), false, false)
        else {
            return self.err(ErrorKind::Memory, &token, "Allocation failure");
        };
        // SAFETY: fresh mapping of at least 32 bytes
        unsafe {
            std::ptr::copy_nonoverlapping(info.as_ptr(), storage, info.len());
        }
        Ok(Value::from_raw(&self.arena, ty, storage as u64))
    }

    fn eval_pointer_intrinsic(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        _what: &str,
    ) -> Exec<u64> {
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::ParenOpen {
            return self.err(ErrorKind::Parse, &token, "Expected '('");
        }
        self.next(ts, end, i)?;
        let Some(value) = self.eval_expression(ts, end, i, true)? else {
            return Err(crate::error::Interrupt);
        };
        if !self.arena.is_pointer_like(value.ty) {
            let at = tok(ts, *i).clone();
            return self.err(ErrorKind::Type, &at, "Expression must return a pointer");
        }
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::ParenClose {
            return self.err(ErrorKind::Parse, &token, "Expected ')'");
        }
        self.next(ts, end, i)?;
        Ok(value.raw_u64(&self.arena))
    }

    fn eval_promote(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<Value> {
        let mut token = self.next(ts, end, i)?.clone();
        let mut levels: u64 = 1;
        let mut global = false;
        if token.kind == TokenKind::Global {
            levels = u64::MAX;
            global = true;
            token = self.next(ts, end, i)?.clone();
        } else if token.kind == TokenKind::IntegerLit {
            levels = token.int();
            token = self.next(ts, end, i)?.clone();
        }
        if token.kind != TokenKind::ParenOpen {
            return self.err(ErrorKind::Parse, &token, "Expected '('");
        }
        self.next(ts, end, i)?;
        let Some(value) = self.eval_expression(ts, end, i, true)? else {
            return Err(crate::error::Interrupt);
        };
        if !self.arena.is_pointer_like(value.ty) {
            let at = tok(ts, *i).clone();
            return self.err(ErrorKind::Type, &at, "Expression must return a pointer");
        }
        let ptr = value.raw_u64(&self.arena) as *mut u8;
        let mut target = self.scopes.find_allocation_scope(ptr);
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::ParenClose {
            return self.err(ErrorKind::Parse, &token, "Expected ')'");
        }
        let token = self.next(ts, end, i)?.clone();
        if token.kind == TokenKind::Arrow {
            if global {
                return self.err(ErrorKind::Parse, &token, "Cannot mix 'global' and '->'");
            }
            let token = self.next(ts, end, i)?.clone();
            if token.kind != TokenKind::BracketOpen {
                return self.err(ErrorKind::Parse, &token, "Expected '['");
            }
            self.next(ts, end, i)?;
            let Some(depth) = self.eval_expression(ts, end, i, true)? else {
                return Err(crate::error::Interrupt);
            };
            let Some(depth) = depth.as_integer(&self.arena) else {
                let at = tok(ts, *i).clone();
                return self.err(ErrorKind::Type, &at, "Expression must return an integer");
            };
            let token = tok(ts, *i).clone();
            if token.kind != TokenKind::BracketClose {
                return self.err(ErrorKind::Parse, &token, "Expected ']'");
            }
            self.next(ts, end, i)?;
            let depth = depth as i64;
            let current = self.scopes.current_index() as i64;
            target = Some(if depth > current {
                current as usize
            } else if depth >= 0 {
                depth as usize
            } else {
                0
            });
        } else if let Some(mut at) = target {
            // walk outward; crossing a function boundary jumps to global
            let mut remaining = levels;
            while remaining > 0 && at > 0 {
                if self.scopes.scope(at).kind == ScopeKind::Function {
                    at = 0;
                    break;
                }
                at -= 1;
                remaining -= 1;
            }
            target = Some(at);
        }
        if let Some(target) = target {
            self.scopes.move_allocation(target, ptr);
        }
        let ty = self.arena.void_pointer_ty();
        Ok(Value::from_raw(&self.arena, ty, ptr as u64))
    }

    fn eval_new(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<Value> {
        let mut token = self.next(ts, end, i)?.clone();
        let mut scoped = false;
        if token.kind == TokenKind::Scoped {
            scoped = true;
            token = self.next(ts, end, i)?.clone();
        }
        let mut target: Option<TypeId> = None;
        let mut size: u64 = 0;
        let mut function: Option<*mut u8> = None;
        if token.kind == TokenKind::ParenOpen {
            self.next(ts, end, i)?;
            let Some(value) = self.eval_expression(ts, end, i, true)? else {
                return Err(crate::error::Interrupt);
            };
            if !matches_category(&self.arena, Category::Integer, Some(&value)) {
                let at = tok(ts, *i).clone();
                return self.err(ErrorKind::Type, &at, "Expression must return an integer");
            }
            size = value.raw_u64(&self.arena);
            let token = tok(ts, *i).clone();
            if token.kind != TokenKind::ParenClose {
                return self.err(ErrorKind::Parse, &token, "Expected ')'");
            }
            self.next(ts, end, i)?;
        } else if token.kind == TokenKind::LessThan {
            self.next(ts, end, i)?;
            let parsed = self.expect_type(ts, end, i)?;
            target = Some(parsed);
            size = self.arena.size_of(parsed) as u64;
            let token = tok(ts, *i).clone();
            if token.kind != TokenKind::GreaterThan {
                return self.err(ErrorKind::Parse, &token, "Expected '>'");
            }
            let token = self.next(ts, end, i)?.clone();
            if token.kind == TokenKind::BraceOpen {
                if !matches!(self.arena.get(parsed).kind, TypeKind::Function { .. }) {
                    return self.err(
                        ErrorKind::Type,
                        &token,
                        "Cannot attach code to a non-function type",
                    );
                }
                self.next(ts, end, i)?;
                let start = *i;
                *i -= 1;
                self.scan_until(ts, end, i, TokenKind::BraceClose)?;
                let len = *i - start - 1;
                let Some(created) = self.create_function_checked(parsed, ts, start, len)? else {
                    return Err(crate::error::Interrupt);
                };
                function = Some(created);
            } else if token.kind == TokenKind::ParenOpen {
                let token = self.next(ts, end, i)?.clone();
                if token.kind != TokenKind::ParenClose {
                    let Some(count) = self.eval_expression(ts, end, i, true)? else {
                        return Err(crate::error::Interrupt);
                    };
                    let Some(count) = count.as_integer(&self.arena) else {
                        let at = tok(ts, *i).clone();
                        return self.err(
                            ErrorKind::Type,
                            &at,
                            "Expression must return an integer",
                        );
                    };
                    let close = tok(ts, *i).clone();
                    if close.kind != TokenKind::ParenClose {
                        return self.err(ErrorKind::Parse, &close, "Expected ')'");
                    }
                    size = size.wrapping_mul(count);
                }
                self.next(ts, end, i)?;
                // a brace list after the count is scanned as part of the
                // operand; its entries evaluate for effect only
                if tok(ts, *i).kind == TokenKind::BraceOpen {
                    self.next(ts, end, i)?;
                    loop {
                        if tok(ts, *i).kind == TokenKind::BraceClose {
                            self.next(ts, end, i)?;
                            break;
                        }
                        if self.eval_expression(ts, end, i, true)?.is_none() {
                            return Err(crate::error::Interrupt);
                        }
                    }
                }
            }
        } else {
            return self.err(ErrorKind::Parse, &token, "Expected '(' or '<'");
        }

        let target = match target {
            Some(target) => target,
            None => self.arena.void_ty(),
        };
        let scope = if scoped { self.scopes.current_index() } else { 0 };
        if let Some(function) = function {
            self.scopes.move_allocation(scope, function);
            return Ok(Value::from_raw(&self.arena, target, function as u64));
        }
        let address = if size == 0 {
            0
        } else {
            self.scopes
                .allocate(&self.bridge, scope, size as usize, false, false)
                .map(|ptr| ptr as u64)
                .unwrap_or(0)
        };
        let ty = self.arena.alloc(TypeKind::Pointer(target));
        Ok(Value::from_raw(&self.arena, ty, address))
    }

    fn eval_conditional(&mut self, ts: &TokenList, end: usize, i: &mut usize) -> Exec<Value> {
        self.next(ts, end, i)?;
        let Some(condition) = self.eval_expression(ts, end, i, true)? else {
            return Err(crate::error::Interrupt);
        };
        let truthy = condition.is_truthy(&self.arena);
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::Arrow {
            return self.err(ErrorKind::Parse, &token, "Expected '->'");
        }
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::BracketOpen {
            return self.err(ErrorKind::Parse, &token, "Expected '['");
        }
        self.next(ts, end, i)?;
        let out = self.eval_conditional_arms(ts, end, i, Some(truthy))?;
        Ok(match out {
            Some(value) => value,
            None => {
                let void = self.arena.void_ty();
                Value::zeroed(&self.arena, void)
            }
        })
    }

    /// The `[ then ; else ]` arm pair of a conditional, cursor just past the
    /// opening bracket. Only the selected arm evaluates; the other is
    /// parse-skipped under dry-run. Arms may be empty and a trailing
    /// semicolon before the closing bracket is tolerated.
    pub(crate) fn eval_conditional_arms(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        select: Option<bool>,
    ) -> Exec<Option<Value>> {
        let previous_dry = self.dry_run;
        let mut out = None;
        for arm in [true, false] {
            let empty = matches!(
                tok(ts, *i).kind,
                TokenKind::Semicolon | TokenKind::BracketClose
            );
            if !empty {
                let active = select == Some(arm);
                self.dry_run = previous_dry || !active;
                let value = self.eval_expression(ts, end, i, false);
                let was_dry = self.dry_run;
                self.dry_run = previous_dry;
                let value = value?;
                if !was_dry {
                    out = value;
                }
            }
            if arm {
                let token = tok(ts, *i).clone();
                if token.kind != TokenKind::Semicolon {
                    return self.err(ErrorKind::Parse, &token, "Expected ';'");
                }
                self.next(ts, end, i)?;
            }
        }
        if tok(ts, *i).kind == TokenKind::Semicolon {
            self.next(ts, end, i)?;
        }
        let token = tok(ts, *i).clone();
        if token.kind != TokenKind::BracketClose {
            return self.err(ErrorKind::Parse, &token, "Expected ']'");
        }
        self.next(ts, end, i)?;
        Ok(out)
    }

    fn eval_member_access(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        variable: Value,
    ) -> Exec<(Value, Option<Value>)> {
        let at = tok(ts, *i).clone();
        let TypeKind::Pointer(base) = self.arena.get(variable.ty).kind else {
            return self.err(ErrorKind::Type, &at, "Expected pointer to struct");
        };
        let TypeKind::Struct(fields) = self.arena.get(base).kind.clone() else {
            return self.err(ErrorKind::Type, &at, "Expected pointer to struct");
        };
        if !self.can_dereference(&variable) {
            let addr = variable.raw_u64(&self.arena);
            return self.err(
                ErrorKind::Memory,
                &at,
                format!("Invalid dereference of pointer 0x{addr:x}"),
            );
        }
        let token = self.next(ts, end, i)?.clone();
        if token.kind != TokenKind::Identifier {
            return self.err(ErrorKind::Parse, &token, "Identifier expected");
        }
        let Some(field) = fields.iter().find(|field| field.name == token.text()) else {
            return self.err(
                ErrorKind::Type,
                &token,
                format!("Struct doesn't have field '{}'", token.text()),
            );
        };
        let address = variable
            .raw_u64(&self.arena)
            .wrapping_add(field.offset as u64);
        match self.arena.get(field.ty).kind {
            TypeKind::Struct(_) => {
                // nested struct fields come back as a pointer to the inner struct
                let ptr = self.arena.alloc(TypeKind::Pointer(field.ty));
                let native = self.arena.get(field.ty).is_native;
                self.arena.get_mut(ptr).is_native = native;
                Ok((Value::from_raw(&self.arena, ptr, address), None))
            }
            TypeKind::Function { .. } => Ok((
                Value::lvalue(field.ty, address as *mut u8),
                Some(variable),
            )),
            _ => Ok((Value::lvalue(field.ty, address as *mut u8), None)),
        }
    }

    fn eval_call(
        &mut self,
        ts: &TokenList,
        end: usize,
        i: &mut usize,
        variable: Value,
        receiver: Option<Value>,
        at: &Token,
    ) -> Exec<Value> {
        let TypeKind::Function { args: signature, .. } = self.arena.get(variable.ty).kind.clone()
        else {
            return self.err(ErrorKind::Type, at, "Cannot call a non-function type");
        };
        if !self.can_dereference(&variable) {
            let addr = variable.raw_u64(&self.arena);
            return self.err(
                ErrorKind::Memory,
                at,
                format!("Invalid dereference of pointer 0x{addr:x}"),
            );
        }
        let mut token = self.next(ts, end, i)?.clone();
        let mut call_args: Vec<Value> = Vec::new();
        if token.kind != TokenKind::ParenClose {
            loop {
                let mut forwarded = false;
                if token.kind == TokenKind::TripleDot {
                    let prev = *i;
                    let after = self.next(ts, end, i)?.clone();
                    if after.kind == TokenKind::BracketOpen {
                        *i = prev;
                    } else {
                        let in_varargs_slot = call_args.len() < signature.len()
                            && matches!(
                                self.arena.get(signature[call_args.len()]).kind,
                                TypeKind::Varargs
                            );
                        if !in_varargs_slot {
                            return self.err(
                                ErrorKind::Runtime,
                                &token,
                                "Variadic argument forward not allowed at this position",
                            );
                        }
                        let Some(slot) = self.scopes.find_variable("...") else {
                            return self.err(
                                ErrorKind::Runtime,
                                &token,
                                "Function doesn't take any variadic arguments",
                            );
                        };
                        let forwarded_args: Vec<Value> = self
                            .scopes
                            .variable(slot)
                            .pack
                            .as_ref()
                            .map(|pack| pack.args.clone())
                            .unwrap_or_default();
                        for arg in &forwarded_args {
                            call_args.push(arg.to_rvalue(&self.arena));
                        }
                        if after.kind != TokenKind::ParenClose {
                            return self.err(ErrorKind::Parse, &after, "Expected ')'");
                        }
                        forwarded = true;
                    }
                }
                if forwarded {
                    break;
                }
                let Some(argument) = self.eval_expression(ts, end, i, true)? else {
                    return Err(crate::error::Interrupt);
                };
                call_args.push(argument);
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
        }
        self.call_function(at, variable, call_args, receiver)
    }

    /// Invoke a function value: script functions run their token bodies in a
    /// fresh function scope, native functions go through the FFI caller.
    pub(crate) fn call_function(
        &mut self,
        at: &Token,
        func: Value,
        call_args: Vec<Value>,
        receiver: Option<Value>,
    ) -> Exec<Value> {
        let TypeKind::Function { ret, args: signature } = self.arena.get(func.ty).kind.clone()
        else {
            return self.err(ErrorKind::Type, at, "Cannot call a non-function type");
        };
        let has_varargs = signature
            .last()
            .map(|arg| matches!(self.arena.get(*arg).kind, TypeKind::Varargs))
            .unwrap_or(false);
        if has_varargs {
            if call_args.len() < signature.len() - 1 {
                let wanted = signature.len() - 1;
                let plural = if signature.len() == 2 { "" } else { "s" };
                return self.err(
                    ErrorKind::Runtime,
                    at,
                    format!(
                        "Function expects at least {wanted} parameter{plural}, but {} provided",
                        call_args.len()
                    ),
                );
            }
        } else if signature.len() != call_args.len() {
            let plural = if signature.len() == 1 { "" } else { "s" };
            return self.err(
                ErrorKind::Runtime,
                at,
                format!(
                    "Function expects exactly {} parameter{plural}, but {} provided",
                    signature.len(),
                    call_args.len()
                ),
            );
        }

        // cast fixed parameters to the declared types; the tail goes into a
        // varargs pack untouched
        let mut fixed: Vec<(TypeId, Value, bool)> = Vec::new();
        let mut pack: Option<VarargsPack> = None;
        let mut index = 0;
        for sig_arg in &signature {
            if matches!(self.arena.get(*sig_arg).kind, TypeKind::Varargs) {
                let mut collected = VarargsPack::default();
                while index < call_args.len() {
                    collected.args.push(call_args[index].clone());
                    index += 1;
                }
                pack = Some(collected);
                break;
            }
            let native = self.arena.get(call_args[index].ty).is_native;
            let casted = self.cast_value(*sig_arg, &call_args[index], false);
            fixed.push((*sig_arg, casted, native));
            index += 1;
        }

        let address = func.raw_u64(&self.arena) as *mut u8;
        if self.scopes.find_allocation_scope(address).is_some() {
            self.call_script_function(address, ret, fixed, pack, receiver)
        } else {
            self.call_native_function(address, ret, fixed, pack)
        }
    }

    fn call_script_function(
        &mut self,
        address: *mut u8,
        ret: TypeId,
        fixed: Vec<(TypeId, Value, bool)>,
        pack: Option<VarargsPack>,
        receiver: Option<Value>,
    ) -> Exec<Value> {
        // SAFETY: address points at a function header allocated by
        // create_function; the registry check above guarantees it
        let body = unsafe {
            let header = &*(address as *const crate::ffi::trampoline::FunctionHeader);
            &*header.body
        };
        let (tokens, start, len) = (body.tokens.clone(), body.start, body.len);

        self.scopes.push(ScopeKind::Function);
        if let Some(receiver) = receiver {
            let bytes = receiver.read_bytes(&self.arena);
            if let Some(slot) = self.scopes.declare_variable(
                &mut self.arena,
                &self.bridge,
                "this",
                receiver.ty,
                None,
            ) {
                let variable = self.scopes.variable(slot);
                // SAFETY: fresh storage sized for the receiver pointer
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), variable.addr, bytes.len());
                }
            }
        }
        for (sig_arg, value, native) in &fixed {
            let Some(name) = self.arena.get(*sig_arg).name.clone() else {
                continue;
            };
            let bytes = value.read_bytes(&self.arena);
            if let Some(slot) =
                self.scopes
                    .declare_variable(&mut self.arena, &self.bridge, &name, *sig_arg, None)
            {
                let variable = self.scopes.variable(slot);
                let ty = variable.ty;
                // SAFETY: fresh storage of the parameter type's size
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), variable.addr, bytes.len());
                }
                self.arena.make_native(ty, *native);
            }
        }
        if let Some(pack) = pack {
            let varargs_ty = self.arena.varargs_ty();
            if let Some(slot) = self.scopes.declare_variable(
                &mut self.arena,
                &self.bridge,
                "...",
                varargs_ty,
                Some(std::ptr::null_mut()),
            ) {
                self.attach_varargs(slot, Box::new(pack));
            }
        }

        let result = self.evaluate_range(&tokens, start, start + len);
        self.scopes.pop(&self.bridge);
        result?;

        let mut retval = Value::zeroed(&self.arena, ret);
        let slot = self.state_slot;
        retval.write_bytes(&self.arena, &slot.to_le_bytes());
        self.set_state(ExecState::Running, None);
        Ok(retval)
    }

    fn call_native_function(
        &mut self,
        address: *mut u8,
        ret: TypeId,
        fixed: Vec<(TypeId, Value, bool)>,
        pack: Option<VarargsPack>,
    ) -> Exec<Value> {
        let mut frame = CallFrame::new();
        for (_, value, _) in &fixed {
            self.push_ffi_value(&mut frame, value);
        }
        if let Some(pack) = &pack {
            frame.set_varargs();
            for value in &pack.args {
                self.push_ffi_value(&mut frame, value);
            }
        }
        // SAFETY: the address passed symbol policy or deref checks upstream;
        // invoking it under the declared signature is the embedder's contract
        let (int_ret, flt_ret) = unsafe { frame.invoke(address) };

        let out = match self.arena.get(ret).kind {
            TypeKind::Float(4) => {
                let ty = self.arena.float_ty(4);
                let bits = flt_ret.to_bits().to_le_bytes();
                Value::rvalue(ty, bits[..4].to_vec())
            }
            TypeKind::Float(_) => {
                let ty = self.arena.float_ty(8);
                Value::rvalue(ty, flt_ret.to_le_bytes().to_vec())
            }
            _ => {
                let ty = self.arena.int_ty(8, true);
                Value::from_raw(&self.arena, ty, int_ret)
            }
        };
        let ret_copy = self.arena.copy(ret);
        let retval = self.cast_value(ret_copy, &out, false);
        self.arena.make_native(ret_copy, true);
        Ok(retval)
    }

    fn push_ffi_value(&self, frame: &mut CallFrame, value: &Value) {
        match self.arena.get(value.ty).kind {
            TypeKind::Float(4) => {
                let bytes = value.read_bytes(&self.arena);
                let bits = f32::from_le_bytes(bytes[..4].try_into().unwrap_or_default());
                frame.push_float(bits);
            }
            TypeKind::Float(_) => frame.push_double(value.as_f64(&self.arena)),
            TypeKind::Int(_) => {
                frame.push_int(value.as_integer(&self.arena).unwrap_or(0));
            }
            _ => frame.push_int(value.raw_u64(&self.arena)),
        }
    }

    pub(crate) fn create_function_checked(
        &mut self,
        ty: TypeId,
        ts: &TokenList,
        start: usize,
        len: usize,
    ) -> Exec<Option<*mut u8>> {
        if let TypeKind::Function { args, .. } = self.arena.get(ty).kind.clone() {
            for arg in args {
                let node = self.arena.get(arg);
                if node.name.is_none() && !matches!(node.kind, TypeKind::Varargs) {
                    let at = tok(ts, start).clone();
                    return self.err(
                        ErrorKind::Parse,
                        &at,
                        "Function definitions require named arguments",
                    );
                }
            }
        }
        Ok(self.create_function(ty, ts, start, len))
    }
}
