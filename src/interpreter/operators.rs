//! Operator dispatch.
//!
//! Every operator is a row keyed by `(token kind, left category, right
//! category)`; the first matching row fires. Unary forms use the `Null`
//! category on the missing side. Compound assignments are synthesised from
//! the binary form plus an assign.

use crate::error::{ErrorKind, Exec};
use crate::lexer::{Token, TokenKind};
use crate::types::{TypeId, TypeKind};

use super::value::{matches_category, Category, Value};
use super::PawScriptContext;

pub(crate) type OpHandler =
    fn(&mut PawScriptContext, &Token, Option<Value>, Option<Value>) -> Exec<Value>;

pub(crate) struct OpRule {
    pub kind: TokenKind,
    pub left: Category,
    pub right: Category,
    pub run: OpHandler,
}

macro_rules! rule {
    ($kind:ident, $left:ident, $right:ident, $run:ident) => {
        OpRule {
            kind: TokenKind::$kind,
            left: Category::$left,
            right: Category::$right,
            run: $run,
        }
    };
}

pub(crate) static OPERATOR_TABLE: &[OpRule] = &[
    // unary suffix
    rule!(DoublePlus, Null, Assignable, op_assign_increment),
    rule!(DoubleMinus, Null, Assignable, op_assign_decrement),
    rule!(DoubleQuestion, Null, Assignable, op_promote_native),
    rule!(Question, Null, Any, op_cast_native),
    // unary prefix
    rule!(DoublePlus, Assignable, Null, op_increment_assign),
    rule!(DoubleMinus, Assignable, Null, op_decrement_assign),
    rule!(Ampersand, Assignable, Null, op_address_of),
    rule!(Asterisk, Pointer, Null, op_dereference),
    rule!(Plus, Number, Null, op_unary_plus),
    rule!(Minus, Number, Null, op_arithmetic_negate),
    rule!(Exclamation, Any, Null, op_logic_negate),
    rule!(Tilde, Integer, Null, op_binary_negate),
    // assignments
    rule!(Equals, Assignable, Any, op_assign),
    rule!(PlusEquals, Assignable, Number, op_add_assign),
    rule!(MinusEquals, Assignable, Number, op_subtract_assign),
    rule!(AsteriskEquals, Assignable, Number, op_multiply_assign),
    rule!(DoubleAsteriskEquals, Assignable, Number, op_power_assign),
    rule!(SlashEquals, Assignable, Number, op_divide_assign),
    rule!(PercentEquals, Assignable, Number, op_modulo_assign),
    rule!(DoubleLessThanEquals, Assignable, Integer, op_shift_left_assign),
    rule!(DoubleGreaterThanEquals, Assignable, Integer, op_shift_right_assign),
    rule!(AmpersandEquals, Assignable, Integer, op_bit_and_assign),
    rule!(PipeEquals, Assignable, Integer, op_bit_or_assign),
    rule!(CaretEquals, Assignable, Integer, op_bit_xor_assign),
    // binary
    rule!(Plus, Number, Number, op_add),
    rule!(Plus, Pointer, Integer, op_add),
    rule!(Plus, Integer, Pointer, op_add),
    rule!(Minus, Number, Number, op_subtract),
    rule!(Minus, Pointer, Integer, op_subtract),
    rule!(Minus, Integer, Pointer, op_subtract),
    rule!(Asterisk, Number, Number, op_multiply),
    rule!(DoubleAsterisk, Number, Number, op_power),
    rule!(Slash, Number, Number, op_divide),
    rule!(Percent, Number, Number, op_modulo),
    rule!(DoubleLessThan, Integer, Integer, op_shift_left),
    rule!(DoubleGreaterThan, Integer, Integer, op_shift_right),
    rule!(Ampersand, Integer, Integer, op_bit_and),
    rule!(Pipe, Integer, Integer, op_bit_or),
    rule!(Caret, Integer, Integer, op_bit_xor),
    rule!(DoubleAmpersand, Any, Any, op_logic_and),
    rule!(DoublePipe, Any, Any, op_logic_or),
    rule!(NotEquals, Any, Any, op_not_equals),
    rule!(DoubleEquals, Any, Any, op_equals),
    rule!(LessThan, Any, Any, op_less_than),
    rule!(GreaterThan, Any, Any, op_greater_than),
    rule!(LessThanEquals, Any, Any, op_less_than_equals),
    rule!(GreaterThanEquals, Any, Any, op_greater_than_equals),
];

impl PawScriptContext {
    /// Find the first matching table row and run it.
    pub(crate) fn apply_operator(
        &mut self,
        kind: TokenKind,
        at: &Token,
        left: Option<Value>,
        right: Option<Value>,
    ) -> Exec<Value> {
        for rule in OPERATOR_TABLE {
            if rule.kind != kind
                || !matches_category(&self.arena, rule.left, left.as_ref())
                || !matches_category(&self.arena, rule.right, right.as_ref())
            {
                continue;
            }
            return (rule.run)(self, at, left, right);
        }
        self.err(ErrorKind::Type, at, "Cannot find matching operator")
    }

    /// Convert `src` to `target` by value-category rules, or reinterpret the
    /// raw bytes when `bitcast`.
    pub(crate) fn cast_value(&mut self, target: TypeId, src: &Value, bitcast: bool) -> Value {
        let mut dst = Value::zeroed(&self.arena, target);
        let dst_node = self.arena.get(target);
        if matches!(dst_node.kind, TypeKind::Void) {
            return dst;
        }
        if bitcast {
            let raw = src.raw_u64(&self.arena);
            dst.write_bytes(&self.arena, &raw.to_le_bytes());
            return dst;
        }
        let src_node = self.arena.get(src.ty);
        match (&dst_node.kind, &src_node.kind) {
            (TypeKind::Int(_), TypeKind::Int(_)) => {
                let value = src.as_integer(&self.arena).unwrap_or(0);
                dst.write_bytes(&self.arena, &value.to_le_bytes());
            }
            (TypeKind::Int(_), TypeKind::Float(_)) => {
                let value = src.as_f64(&self.arena) as i64;
                dst.write_bytes(&self.arena, &value.to_le_bytes());
            }
            (TypeKind::Int(_), _) => {
                let value = src.raw_u64(&self.arena);
                dst.write_bytes(&self.arena, &value.to_le_bytes());
            }
            (TypeKind::Float(width), _) => {
                let value = match src_node.kind {
                    TypeKind::Float(_) => src.as_f64(&self.arena),
                    TypeKind::Int(_) => {
                        src.as_integer(&self.arena).unwrap_or(0) as i64 as f64
                    }
                    _ => src.raw_u64(&self.arena) as i64 as f64,
                };
                if *width == 4 {
                    dst.write_bytes(&self.arena, &(value as f32).to_le_bytes());
                } else {
                    dst.write_bytes(&self.arena, &value.to_le_bytes());
                }
            }
            (TypeKind::Pointer(_) | TypeKind::Function { .. }, TypeKind::Float(_)) => {
                let value = src.as_f64(&self.arena) as i64;
                dst.write_bytes(&self.arena, &value.to_le_bytes());
            }
            (TypeKind::Pointer(_) | TypeKind::Function { .. }, TypeKind::Int(_)) => {
                let value = src.as_integer(&self.arena).unwrap_or(0);
                dst.write_bytes(&self.arena, &value.to_le_bytes());
            }
            (TypeKind::Pointer(_) | TypeKind::Function { .. }, _) => {
                let value = src.raw_u64(&self.arena);
                dst.write_bytes(&self.arena, &value.to_le_bytes());
            }
            _ => {}
        }
        dst
    }

    /// Promote both operands for binary arithmetic and return the result
    /// type: f64 beats f32 beats 64-bit beats 32-bit; pointers count as
    /// unsigned 64-bit; integer results are unsigned if either side is.
    fn arithmetic_promotion(&mut self, left: &Value, right: &Value) -> (TypeId, Value, Value) {
        let mut float: Option<u8> = None;
        let mut wide = false;
        let mut pointer = false;
        let mut unsigned = false;
        for ty in [left.ty, right.ty] {
            let node = self.arena.get(ty);
            match node.kind {
                TypeKind::Float(width) => float = Some(float.unwrap_or(0).max(width)),
                TypeKind::Int(8) => wide = true,
                TypeKind::Pointer(_) | TypeKind::Function { .. } => pointer = true,
                _ => {}
            }
            unsigned |= node.is_unsigned;
        }
        let target = if let Some(width) = float {
            self.arena.float_ty(width)
        } else {
            let width = if wide || pointer { 8 } else { 4 };
            self.arena.int_ty(width, unsigned || pointer)
        };
        let casted_left = self.cast_value(target, left, false);
        let casted_right = self.cast_value(target, right, false);
        (target, casted_left, casted_right)
    }
}

fn take2(left: Option<Value>, right: Option<Value>) -> (Value, Value) {
    (
        left.expect("binary operator without left operand"),
        right.expect("binary operator without right operand"),
    )
}

// ---- assignment ----

fn assign_into(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Value,
    right: Value,
) -> Exec<Value> {
    if ctx.arena.get(left.ty).is_const {
        return ctx.err(ErrorKind::Memory, at, "Cannot mutate a constant");
    }
    let orig = ctx.arena.get(left.ty).orig;
    let native = ctx.arena.get(right.ty).is_native;
    ctx.arena.make_native(orig, native);
    let casted = ctx.cast_value(left.ty, &right, false);
    let bytes = casted.read_bytes(&ctx.arena);
    let mut target = left;
    target.write_bytes(&ctx.arena, &bytes);
    Ok(casted)
}

impl PawScriptContext {
    /// Assignment entry point for declarations with initialisers.
    pub(crate) fn assign_values(
        &mut self,
        at: &Token,
        left: Value,
        right: Value,
    ) -> Exec<Value> {
        assign_into(self, at, left, right)
    }
}

fn op_assign(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    assign_into(ctx, at, left, right)
}

macro_rules! compound {
    ($name:ident, $binary:ident) => {
        fn $name(
            ctx: &mut PawScriptContext,
            at: &Token,
            left: Option<Value>,
            right: Option<Value>,
        ) -> Exec<Value> {
            let (left, right) = take2(left, right);
            let result = $binary(ctx, at, Some(left.clone()), Some(right))?;
            assign_into(ctx, at, left, result)
        }
    };
}

compound!(op_add_assign, op_add);
compound!(op_subtract_assign, op_subtract);
compound!(op_multiply_assign, op_multiply);
compound!(op_divide_assign, op_divide);
compound!(op_modulo_assign, op_modulo);
compound!(op_power_assign, op_power);
compound!(op_shift_left_assign, op_shift_left);
compound!(op_shift_right_assign, op_shift_right);
compound!(op_bit_and_assign, op_bit_and);
compound!(op_bit_or_assign, op_bit_or);
compound!(op_bit_xor_assign, op_bit_xor);

// ---- arithmetic ----

/// `ptr ± int` scales the integer by the size of the pointee. Returns
/// `None` when neither operand is a pointer so plain arithmetic applies.
fn pointer_arithmetic(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: &Value,
    right: &Value,
    negative: bool,
) -> Exec<Option<Value>> {
    let l_ptr = ctx.arena.is_pointer_like(left.ty);
    let r_ptr = ctx.arena.is_pointer_like(right.ty);
    let (ptr, off) = if l_ptr {
        (left, right)
    } else if r_ptr {
        (right, left)
    } else {
        return Ok(None);
    };
    if matches!(ctx.arena.get(ptr.ty).kind, TypeKind::Function { .. }) {
        return ctx.err(
            ErrorKind::Memory,
            at,
            "Cannot perform pointer arithmetic on a function",
        );
    }
    let Some(offset) = off.as_integer(&ctx.arena) else {
        return ctx.err(ErrorKind::Type, at, "Cannot find matching operator");
    };
    let TypeKind::Pointer(base) = ctx.arena.get(ptr.ty).kind else {
        return Ok(None);
    };
    let stride = ctx.arena.size_of(base) as u64;
    let step = stride.wrapping_mul(offset);
    let addr = ptr.raw_u64(&ctx.arena);
    let moved = if negative {
        addr.wrapping_sub(step)
    } else {
        addr.wrapping_add(step)
    };
    Ok(Some(Value::from_raw(&ctx.arena, ptr.ty, moved)))
}

fn arith(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Value,
    right: Value,
    int_op: fn(i64, i64) -> i64,
    uint_op: fn(u64, u64) -> u64,
    flt_op: fn(f64, f64) -> f64,
) -> Exec<Value> {
    if !matches_category(&ctx.arena, Category::Number, Some(&left))
        || !matches_category(&ctx.arena, Category::Number, Some(&right))
    {
        return ctx.err(ErrorKind::Type, at, "Cannot find matching operator");
    }
    let (target, l, r) = ctx.arithmetic_promotion(&left, &right);
    let node = ctx.arena.get(target);
    match node.kind {
        TypeKind::Int(_) => {
            let a = l.as_integer(&ctx.arena).unwrap_or(0);
            let b = r.as_integer(&ctx.arena).unwrap_or(0);
            let out = if node.is_unsigned {
                uint_op(a, b)
            } else {
                int_op(a as i64, b as i64) as u64
            };
            Ok(Value::from_raw(&ctx.arena, target, out))
        }
        TypeKind::Float(width) => {
            let out = flt_op(l.as_f64(&ctx.arena), r.as_f64(&ctx.arena));
            let mut value = Value::zeroed(&ctx.arena, target);
            if width == 4 {
                value.write_bytes(&ctx.arena, &(out as f32).to_le_bytes());
            } else {
                value.write_bytes(&ctx.arena, &out.to_le_bytes());
            }
            Ok(value)
        }
        _ => ctx.err(ErrorKind::Type, at, "Cannot find matching operator"),
    }
}

fn op_add(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    if let Some(out) = pointer_arithmetic(ctx, at, &left, &right, false)? {
        return Ok(out);
    }
    arith(
        ctx,
        at,
        left,
        right,
        |a, b| a.wrapping_add(b),
        |a, b| a.wrapping_add(b),
        |a, b| a + b,
    )
}

fn op_subtract(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    if let Some(out) = pointer_arithmetic(ctx, at, &left, &right, true)? {
        return Ok(out);
    }
    arith(
        ctx,
        at,
        left,
        right,
        |a, b| a.wrapping_sub(b),
        |a, b| a.wrapping_sub(b),
        |a, b| a - b,
    )
}

fn op_multiply(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    arith(
        ctx,
        at,
        left,
        right,
        |a, b| a.wrapping_mul(b),
        |a, b| a.wrapping_mul(b),
        |a, b| a * b,
    )
}

fn op_divide(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    arith(
        ctx,
        at,
        left,
        right,
        |a, b| if b == 0 { 0 } else { a.wrapping_div(b) },
        |a, b| if b == 0 { 0 } else { a / b },
        |a, b| a / b,
    )
}

fn op_modulo(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    arith(
        ctx,
        at,
        left,
        right,
        |a, b| if b == 0 { 0 } else { a.wrapping_rem(b) },
        |a, b| if b == 0 { 0 } else { a % b },
        // IEEE remainder, matching remainder(3)
        |a, b| {
            let q = (a / b).round_ties_even();
            a - q * b
        },
    )
}

fn op_power(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    arith(
        ctx,
        at,
        left,
        right,
        |a, b| (a as f64).powf(b as f64) as i64,
        |a, b| (a as f64).powf(b as f64) as u64,
        f64::powf,
    )
}

// ---- bit operations: the result keeps the left operand's type ----

fn bitop(
    ctx: &mut PawScriptContext,
    left: Value,
    right: Value,
    op: fn(u64, u64) -> u64,
) -> Exec<Value> {
    let a = left.as_integer(&ctx.arena).unwrap_or(0);
    let b = right.as_integer(&ctx.arena).unwrap_or(0);
    Ok(Value::from_raw(&ctx.arena, left.ty, op(a, b)))
}

fn op_shift_left(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    bitop(ctx, left, right, |a, b| a.wrapping_shl(b as u32))
}

fn op_shift_right(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    bitop(ctx, left, right, |a, b| a.wrapping_shr(b as u32))
}

fn op_bit_and(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    bitop(ctx, left, right, |a, b| a & b)
}

fn op_bit_or(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    bitop(ctx, left, right, |a, b| a | b)
}

fn op_bit_xor(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let (left, right) = take2(left, right);
    bitop(ctx, left, right, |a, b| a ^ b)
}

// ---- comparisons and logic ----

#[derive(Clone, Copy)]
enum LogicOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

fn logic(
    ctx: &mut PawScriptContext,
    left: Value,
    right: Value,
    op: LogicOp,
) -> Exec<Value> {
    let bool_ty = ctx.arena.int_ty(1, true);
    let left_unsigned = ctx.arena.get(left.ty).is_unsigned;
    let right_unsigned = ctx.arena.get(right.ty).is_unsigned;
    let (target, l, r) = ctx.arithmetic_promotion(&left, &right);

    let result = match op {
        LogicOp::And => l.is_truthy(&ctx.arena) && r.is_truthy(&ctx.arena),
        LogicOp::Or => l.is_truthy(&ctx.arena) || r.is_truthy(&ctx.arena),
        _ => {
            if matches!(ctx.arena.get(target).kind, TypeKind::Float(_)) {
                let a = l.as_f64(&ctx.arena);
                let b = r.as_f64(&ctx.arena);
                match op {
                    LogicOp::Eq => a == b,
                    LogicOp::Ne => a != b,
                    LogicOp::Lt => a < b,
                    LogicOp::Gt => a > b,
                    LogicOp::Le => a <= b,
                    LogicOp::Ge => a >= b,
                    _ => unreachable!(),
                }
            } else {
                let a = l.as_integer(&ctx.arena).unwrap_or_else(|| l.raw_u64(&ctx.arena));
                let b = r.as_integer(&ctx.arena).unwrap_or_else(|| r.raw_u64(&ctx.arena));
                let neg_a = !left_unsigned && (a >> 63) & 1 == 1;
                let neg_b = !right_unsigned && (b >> 63) & 1 == 1;
                // negative operands compare by sign first, then by unsigned
                // magnitude with the order flipped
                let (a, b, flip) = match (neg_a, neg_b) {
                    (true, true) => (a.wrapping_neg(), b.wrapping_neg(), true),
                    _ => (a, b, false),
                };
                let cmp = |a: u64, b: u64| match op {
                    LogicOp::Eq => a == b,
                    LogicOp::Ne => a != b,
                    LogicOp::Lt => a < b,
                    LogicOp::Gt => a > b,
                    LogicOp::Le => a <= b,
                    LogicOp::Ge => a >= b,
                    _ => unreachable!(),
                };
                if neg_a != neg_b {
                    cmp(neg_b as u64, neg_a as u64)
                } else if flip {
                    cmp(b, a)
                } else {
                    cmp(a, b)
                }
            }
        }
    };
    Ok(Value::rvalue(bool_ty, vec![result as u8]))
}

macro_rules! logic_rule {
    ($name:ident, $op:ident) => {
        fn $name(
            ctx: &mut PawScriptContext,
            _at: &Token,
            left: Option<Value>,
            right: Option<Value>,
        ) -> Exec<Value> {
            let (left, right) = take2(left, right);
            logic(ctx, left, right, LogicOp::$op)
        }
    };
}

logic_rule!(op_logic_and, And);
logic_rule!(op_logic_or, Or);
logic_rule!(op_equals, Eq);
logic_rule!(op_not_equals, Ne);
logic_rule!(op_less_than, Lt);
logic_rule!(op_greater_than, Gt);
logic_rule!(op_less_than_equals, Le);
logic_rule!(op_greater_than_equals, Ge);

// ---- unary ----

fn increment(ctx: &mut PawScriptContext, at: &Token, var: &mut Value, delta: i64) -> Exec<()> {
    if ctx.arena.get(var.ty).is_const {
        return ctx.err(ErrorKind::Memory, at, "Cannot mutate a constant");
    }
    match ctx.arena.get(var.ty).kind {
        TypeKind::Int(_) => {
            let value = var.as_integer(&ctx.arena).unwrap_or(0);
            let value = value.wrapping_add_signed(delta);
            var.write_bytes(&ctx.arena, &value.to_le_bytes());
        }
        TypeKind::Function { .. } => {
            return ctx.err(
                ErrorKind::Memory,
                at,
                "Cannot perform pointer arithmetic on a function",
            );
        }
        TypeKind::Pointer(base) => {
            let stride = ctx.arena.size_of(base) as u64;
            let addr = var
                .raw_u64(&ctx.arena)
                .wrapping_add_signed(delta.wrapping_mul(stride as i64));
            var.write_bytes(&ctx.arena, &addr.to_le_bytes());
        }
        TypeKind::Float(4) => {
            let value = var.as_f64(&ctx.arena) + delta as f64;
            var.write_bytes(&ctx.arena, &(value as f32).to_le_bytes());
        }
        TypeKind::Float(_) => {
            let value = var.as_f64(&ctx.arena) + delta as f64;
            var.write_bytes(&ctx.arena, &value.to_le_bytes());
        }
        _ => {}
    }
    Ok(())
}

fn op_assign_increment(
    ctx: &mut PawScriptContext,
    at: &Token,
    _left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let mut var = right.expect("postfix operator without operand");
    let old = var.to_rvalue(&ctx.arena);
    increment(ctx, at, &mut var, 1)?;
    Ok(old)
}

fn op_assign_decrement(
    ctx: &mut PawScriptContext,
    at: &Token,
    _left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let mut var = right.expect("postfix operator without operand");
    let old = var.to_rvalue(&ctx.arena);
    increment(ctx, at, &mut var, -1)?;
    Ok(old)
}

fn op_increment_assign(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let mut var = left.expect("prefix operator without operand");
    increment(ctx, at, &mut var, 1)?;
    Ok(var.to_rvalue(&ctx.arena))
}

fn op_decrement_assign(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let mut var = left.expect("prefix operator without operand");
    increment(ctx, at, &mut var, -1)?;
    Ok(var.to_rvalue(&ctx.arena))
}

fn op_address_of(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let var = left.expect("prefix operator without operand");
    let addr = var.addr().expect("assignable operand is a view") as u64;
    let ptr = ctx.arena.pointer_to(var.ty);
    Ok(Value::from_raw(&ctx.arena, ptr, addr))
}

fn op_dereference(
    ctx: &mut PawScriptContext,
    at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let var = left.expect("prefix operator without operand");
    if !ctx.can_dereference(&var) {
        let addr = var.raw_u64(&ctx.arena);
        return ctx.err(
            ErrorKind::Memory,
            at,
            format!("Invalid dereference of pointer 0x{addr:x}"),
        );
    }
    let TypeKind::Pointer(base) = ctx.arena.get(var.ty).kind else {
        return ctx.err(
            ErrorKind::Memory,
            at,
            "Cannot dereference a struct pointer or a function",
        );
    };
    if matches!(ctx.arena.get(base).kind, TypeKind::Struct(_)) {
        return ctx.err(
            ErrorKind::Memory,
            at,
            "Cannot dereference a struct pointer or a function",
        );
    }
    let addr = var.raw_u64(&ctx.arena) as *mut u8;
    Ok(Value::lvalue(base, addr))
}

fn op_unary_plus(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let var = left.expect("prefix operator without operand");
    Ok(var.to_rvalue(&ctx.arena))
}

fn op_arithmetic_negate(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let var = left.expect("prefix operator without operand");
    match ctx.arena.get(var.ty).kind {
        TypeKind::Int(_) => {
            let value = var.as_integer(&ctx.arena).unwrap_or(0).wrapping_neg();
            Ok(Value::from_raw(&ctx.arena, var.ty, value))
        }
        TypeKind::Float(4) => {
            let value = -(var.as_f64(&ctx.arena)) as f32;
            Ok(Value::rvalue(var.ty, value.to_le_bytes().to_vec()))
        }
        _ => {
            let value = -var.as_f64(&ctx.arena);
            Ok(Value::rvalue(var.ty, value.to_le_bytes().to_vec()))
        }
    }
}

fn op_logic_negate(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let var = left.expect("prefix operator without operand");
    let bool_ty = ctx.arena.int_ty(1, true);
    let value = !var.is_truthy(&ctx.arena);
    Ok(Value::rvalue(bool_ty, vec![value as u8]))
}

fn op_binary_negate(
    ctx: &mut PawScriptContext,
    _at: &Token,
    left: Option<Value>,
    _right: Option<Value>,
) -> Exec<Value> {
    let var = left.expect("prefix operator without operand");
    let value = !var.as_integer(&ctx.arena).unwrap_or(0);
    Ok(Value::from_raw(&ctx.arena, var.ty, value))
}

// ---- native marking ----

fn op_promote_native(
    ctx: &mut PawScriptContext,
    _at: &Token,
    _left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let var = right.expect("postfix operator without operand");
    let orig = ctx.arena.get(var.ty).orig;
    ctx.arena.make_native(orig, true);
    Ok(Value::rvalue(orig, var.read_bytes(&ctx.arena)))
}

fn op_cast_native(
    ctx: &mut PawScriptContext,
    _at: &Token,
    _left: Option<Value>,
    right: Option<Value>,
) -> Exec<Value> {
    let var = right.expect("postfix operator without operand");
    let ty = ctx.arena.copy(var.ty);
    ctx.arena.make_native(ty, true);
    Ok(Value::rvalue(ty, var.read_bytes(&ctx.arena)))
}
