//! The raw-register leaf of the FFI caller.
//!
//! Contract: given a marshalled [`RawCallFrame`], invoke the function
//! pointer under the System V AMD64 convention and store the return
//! registers back into the frame. Nothing else in the crate manipulates
//! registers or the stack pointer.

/// One native call, laid out for the assembly below. Field offsets are part
/// of the contract with the asm and must not be reordered.
#[repr(C)]
pub struct RawCallFrame {
    pub int_regs: [u64; 6], // 0
    pub flt_regs: [f64; 8], // 48
    pub flt_count: u64,     // 112
    pub func: u64,          // 120
    pub stack_ptr: u64,     // 128
    pub stack_len: u64,     // 136, even number of 8-byte slots
    pub ret_int: u64,       // 144
    pub ret_flt: f64,       // 152
}

#[cfg(all(unix, target_arch = "x86_64"))]
std::arch::global_asm!(
    r#"
.globl pawscript_raw_call
pawscript_raw_call:
    push rbp
    mov rbp, rsp
    push rbx
    mov rbx, rdi
    // spill overflow arguments below a 16-byte aligned stack top
    mov rcx, [rbx + 136]
    mov rsi, [rbx + 128]
    test rcx, rcx
    jz 2f
    mov rax, rcx
    shl rax, 3
    sub rsp, rax
    and rsp, -16
    xor edx, edx
1:
    mov rax, [rsi + rdx*8]
    mov [rsp + rdx*8], rax
    inc rdx
    cmp rdx, rcx
    jne 1b
    jmp 3f
2:
    and rsp, -16
3:
    movsd xmm0, [rbx + 48]
    movsd xmm1, [rbx + 56]
    movsd xmm2, [rbx + 64]
    movsd xmm3, [rbx + 72]
    movsd xmm4, [rbx + 80]
    movsd xmm5, [rbx + 88]
    movsd xmm6, [rbx + 96]
    movsd xmm7, [rbx + 104]
    mov rax, [rbx + 112]
    mov r10, [rbx + 120]
    mov rdi, [rbx + 0]
    mov rsi, [rbx + 8]
    mov rdx, [rbx + 16]
    mov rcx, [rbx + 24]
    mov r8,  [rbx + 32]
    mov r9,  [rbx + 40]
    call r10
    mov [rbx + 144], rax
    movsd [rbx + 152], xmm0
    lea rsp, [rbp - 8]
    pop rbx
    pop rbp
    ret
"#
);

#[cfg(all(unix, target_arch = "x86_64"))]
extern "C" {
    fn pawscript_raw_call(frame: *mut RawCallFrame);
}

/// # Safety
///
/// `frame.func` must be callable and consistent with the marshalled
/// registers and stack slots.
#[cfg(all(unix, target_arch = "x86_64"))]
pub unsafe fn raw_call(frame: &mut RawCallFrame) {
    pawscript_raw_call(frame);
}

#[cfg(not(all(unix, target_arch = "x86_64")))]
pub unsafe fn raw_call(_frame: &mut RawCallFrame) {
    unimplemented!("the FFI bridge supports x86-64 Unix targets only");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_offsets_match_assembly() {
        assert_eq!(std::mem::offset_of!(RawCallFrame, flt_regs), 48);
        assert_eq!(std::mem::offset_of!(RawCallFrame, flt_count), 112);
        assert_eq!(std::mem::offset_of!(RawCallFrame, func), 120);
        assert_eq!(std::mem::offset_of!(RawCallFrame, stack_ptr), 128);
        assert_eq!(std::mem::offset_of!(RawCallFrame, stack_len), 136);
        assert_eq!(std::mem::offset_of!(RawCallFrame, ret_int), 144);
        assert_eq!(std::mem::offset_of!(RawCallFrame, ret_flt), 152);
    }
}
