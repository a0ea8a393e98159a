//! Script → native trampolines.
//!
//! Every script-defined function lives in an executable page opening with a
//! [`FunctionHeader`]: a five-byte relative jump over the header metadata
//! into a generated stub. The stub spills the native caller's arguments onto
//! the stack, copies the function's serialized type descriptor after them,
//! and calls [`trampoline_driver`] with `(context, descriptor, frame base,
//! header)`. The driver rebuilds argument values, runs the script body and
//! returns the raw result register, which the stub mirrors into `xmm0` so
//! float-returning callers read the right register.

use std::ffi::CStr;
use std::rc::Rc;

use crate::error::{ErrorKind, PawError};
use crate::interpreter::value::Value;
use crate::interpreter::{FunctionBody, PawScriptContext};
use crate::lexer::{lex, Token};
use crate::types::{TypeId, TypeKind};

use super::{NUM_FLT_REGS, NUM_INT_REGS};

/// Head of every function allocation. The block's base address is directly
/// callable: the jump lands on the trampoline that follows the header.
#[repr(C)]
pub struct FunctionHeader {
    pub jmp: [u8; 5],
    pub pad: [u8; 3],
    pub body: *const FunctionBody,
}

/// One host-supplied variadic argument: a PawScript type expression naming
/// its type, and its raw value bits.
#[repr(C)]
pub struct VarargItem {
    pub type_str: *const libc::c_char,
    pub data: u64,
}

/// Emit the spill of one argument slot into `[rsp]`.
fn emit_arg(
    code: &mut Vec<u8>,
    int_reg: &mut usize,
    flt_reg: &mut usize,
    stack_off: &mut usize,
    is_float: bool,
) {
    code.extend([0x48, 0x83, 0xEC, 0x08]); // sub rsp, 8
    if is_float {
        if *flt_reg < NUM_FLT_REGS {
            // movsd [rsp], xmmN
            code.extend([0xF2, 0x0F, 0x11, 0x04 + (*flt_reg as u8) * 8, 0x24]);
            *flt_reg += 1;
            return;
        }
    } else if *int_reg < NUM_INT_REGS {
        let mov: [u8; 4] = match *int_reg {
            0 => [0x48, 0x89, 0x3C, 0x24], // mov [rsp], rdi
            1 => [0x48, 0x89, 0x34, 0x24], // mov [rsp], rsi
            2 => [0x48, 0x89, 0x14, 0x24], // mov [rsp], rdx
            3 => [0x48, 0x89, 0x0C, 0x24], // mov [rsp], rcx
            4 => [0x4C, 0x89, 0x04, 0x24], // mov [rsp], r8
            _ => [0x4C, 0x89, 0x0C, 0x24], // mov [rsp], r9
        };
        code.extend(mov);
        *int_reg += 1;
        return;
    }
    // overflow argument from the caller's stack; skip the return address and
    // the saved rbx
    code.extend([0x48, 0x8B, 0x83]); // mov rax, [rbx + disp]
    code.extend((((*stack_off + 2) * 8) as u32).to_le_bytes());
    code.extend([0x48, 0x89, 0x04, 0x24]); // mov [rsp], rax
    *stack_off += 1;
}

/// Generate the trampoline for `ty`, allocate the function block in the
/// current scope and return its base address.
pub(crate) fn install_function(
    ctx: &mut PawScriptContext,
    ty: TypeId,
    body: *const FunctionBody,
) -> Option<*mut u8> {
    let TypeKind::Function { args, .. } = ctx.arena.get(ty).kind.clone() else {
        return None;
    };
    let data = ctx.arena.serialize(ty);
    let mut blob = Vec::with_capacity(data.len() + 4);
    blob.extend((data.len() as u32).to_le_bytes());
    blob.extend(&data);

    let mut code: Vec<u8> = Vec::new();
    code.push(0x53); // push rbx
    code.extend([0x48, 0x89, 0xE3]); // mov rbx, rsp
    let (mut int_reg, mut flt_reg, mut stack_off) = (0, 0, 0);
    let mut cells = 0usize;
    for arg in &args {
        match ctx.arena.get(*arg).kind {
            TypeKind::Varargs => {
                // a count and an item pointer
                emit_arg(&mut code, &mut int_reg, &mut flt_reg, &mut stack_off, false);
                emit_arg(&mut code, &mut int_reg, &mut flt_reg, &mut stack_off, false);
                cells += 2;
            }
            TypeKind::Float(_) => {
                emit_arg(&mut code, &mut int_reg, &mut flt_reg, &mut stack_off, true);
                cells += 1;
            }
            _ => {
                emit_arg(&mut code, &mut int_reg, &mut flt_reg, &mut stack_off, false);
                cells += 1;
            }
        }
    }
    if cells % 2 == 1 {
        code.extend([0x48, 0x83, 0xEC, 0x08]); // sub rsp, 8 (realign)
    }
    code.extend([0x48, 0x81, 0xEC]); // sub rsp, imm32
    code.extend((blob.len() as u32).to_le_bytes());
    for (offset, byte) in blob.iter().enumerate() {
        code.extend([0xC6, 0x84, 0x24]); // mov byte [rsp + disp32], imm8
        code.extend((offset as u32).to_le_bytes());
        code.push(*byte);
    }
    code.extend([0x48, 0xB8]); // mov rax, imm64 (driver)
    code.extend((trampoline_driver as usize as u64).to_le_bytes());
    code.extend([0x48, 0xBF]); // mov rdi, imm64 (context)
    code.extend((ctx as *mut PawScriptContext as u64).to_le_bytes());
    code.extend([0x48, 0x89, 0xE6]); // mov rsi, rsp (descriptor)
    code.extend([0x48, 0x89, 0xDA]); // mov rdx, rbx (frame base)
    code.extend([0x48, 0xB9]); // mov rcx, imm64 (function, patched below)
    let patch_at = code.len();
    code.extend([0u8; 8]);
    if blob.len() % 16 != 0 {
        code.extend([0x48, 0x83, 0xEC, (16 - blob.len() % 16) as u8]); // realign
    }
    code.extend([0xFF, 0xD0]); // call rax
    code.extend([0x66, 0x48, 0x0F, 0x6E, 0xC0]); // movq xmm0, rax
    code.extend([0x48, 0x89, 0xDC]); // mov rsp, rbx
    code.push(0x5B); // pop rbx
    code.push(0xC3); // ret

    let header_size = std::mem::size_of::<FunctionHeader>();
    let total = header_size + code.len();
    let scope = ctx.scopes.current_index();
    let page = ctx.scopes.allocate(&ctx.bridge, scope, total, true, false)?;
    code[patch_at..patch_at + 8].copy_from_slice(&(page as u64).to_le_bytes());

    // SAFETY: page is a fresh rwx mapping of at least `total` bytes
    unsafe {
        page.write(0xE9); // jmp rel32 over the header
        let rel = (header_size as i32 - 5).to_le_bytes();
        std::ptr::copy_nonoverlapping(rel.as_ptr(), page.add(1), 4);
        (page.add(8) as *mut *const FunctionBody).write(body);
        std::ptr::copy_nonoverlapping(code.as_ptr(), page.add(header_size), code.len());
    }
    Some(page)
}

/// Uniform entry point every trampoline funnels into.
///
/// # Safety
///
/// Called from generated code with the pointers the trampoline assembled.
/// The context behind `ctx` must not be executing concurrently; re-entrant
/// calls on the same thread nest scopes normally.
pub(crate) unsafe extern "C" fn trampoline_driver(
    ctx: *mut PawScriptContext,
    descriptor: *const u8,
    frame: *const u64,
    func: *const FunctionHeader,
) -> u64 {
    let ctx = &mut *ctx;
    let len = u32::from_le_bytes(
        std::slice::from_raw_parts(descriptor, 4)
            .try_into()
            .unwrap_or_default(),
    ) as usize;
    let data = std::slice::from_raw_parts(descriptor.add(4), len);
    let Some(ty) = ctx.arena.deserialize(data) else {
        return 0;
    };
    let TypeKind::Function { args, .. } = ctx.arena.get(ty).kind.clone() else {
        return 0;
    };

    let mut call_args: Vec<Value> = Vec::new();
    for (index, arg) in args.iter().enumerate() {
        if matches!(ctx.arena.get(*arg).kind, TypeKind::Varargs) {
            let count = *frame.offset(-(index as isize + 1));
            let items = *frame.offset(-(index as isize + 2)) as *const VarargItem;
            for j in 0..count {
                let item = &*items.add(j as usize);
                let type_str = CStr::from_ptr(item.type_str).to_string_lossy().into_owned();
                let Some(tokens) = lex(&mut ctx.errors, &type_str, None) else {
                    return 0;
                };
                let tokens = Rc::new(tokens);
                let end = tokens.len() - 1;
                let mut cursor = 0;
                let parsed = ctx.parse_type(&tokens, end, &mut cursor);
                let Ok(Some(item_ty)) = parsed else {
                    if parsed.is_ok() {
                        ctx.errors.push(PawError::new(
                            ErrorKind::Parse,
                            &tokens[0],
                            format!("Undefined type '{}'", tokens[0].text()),
                        ));
                    }
                    return 0;
                };
                let node = &ctx.arena.get(item_ty).kind;
                if matches!(node, TypeKind::Struct(_) | TypeKind::Void) {
                    ctx.errors.push(PawError::new(
                        ErrorKind::Type,
                        &tokens[0],
                        "Cannot define vararg of struct or void type",
                    ));
                    return 0;
                }
                let size = ctx.arena.size_of(item_ty).min(8);
                call_args.push(Value::rvalue(
                    item_ty,
                    item.data.to_le_bytes()[..size].to_vec(),
                ));
            }
            break;
        }
        let cell = *frame.offset(-(index as isize + 1));
        let size = ctx.arena.size_of(*arg).min(8);
        call_args.push(Value::rvalue(*arg, cell.to_le_bytes()[..size].to_vec()));
    }

    let func_value = Value::from_raw(&ctx.arena, ty, func as u64);
    let at = Token::eof();
    match ctx.call_function(&at, func_value, call_args, None) {
        Ok(out) => out.raw_u64(&ctx.arena),
        Err(_) => 0,
    }
}
