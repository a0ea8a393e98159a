use std::ffi::CStr;

use pawscript::memory::NativeBridge;
use pawscript::{PawScriptContext, SymbolVisibility, RESULT_NAME};

fn result_u64(context: &PawScriptContext) -> u64 {
    let mut out = [0u8; 8];
    assert!(context.get(RESULT_NAME, &mut out), "no result bound");
    u64::from_le_bytes(out)
}

#[test]
fn whitelisted_symbol_resolves() {
    let mut context = PawScriptContext::new();
    context.symbol_visibility(SymbolVisibility::Whitelist);
    let puts = NativeBridge::new()
        .lookup_symbol("puts")
        .expect("puts resolves");
    context.register_symbol(puts);
    context
        .run("extern void puts(const s8*); puts(\"hi\");")
        .unwrap();
}

#[test]
fn unregistered_symbol_is_disallowed_under_whitelist() {
    let mut context = PawScriptContext::new();
    context.symbol_visibility(SymbolVisibility::Whitelist);
    let error = context
        .run("extern void puts(const s8*);")
        .expect_err("whitelist without registration");
    assert!(error.message.contains("disallowed"));
}

#[test]
fn blacklist_blocks_registered_symbols() {
    let mut context = PawScriptContext::new();
    let strlen = NativeBridge::new()
        .lookup_symbol("strlen")
        .expect("strlen resolves");
    context.register_symbol(strlen);
    let error = context
        .run("extern u64 strlen(const s8*);")
        .expect_err("blacklisted symbol");
    assert!(error.message.contains("disallowed"));
}

#[test]
fn missing_symbol_reports_linkage_error() {
    let mut context = PawScriptContext::new();
    let error = context
        .run("extern void surely_not_a_symbol_42();")
        .expect_err("unknown symbol");
    assert!(error.message.contains("Cannot find symbol"));
}

#[test]
fn native_call_returns_value() {
    let mut context = PawScriptContext::new();
    context
        .run("extern u64 strlen(const s8*); return strlen(\"pawscript\");")
        .unwrap();
    assert_eq!(result_u64(&context), 9);
}

#[test]
fn variadic_native_call_with_mixed_types() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "extern s32 snprintf(s8* buf, u64 n, const s8* fmt, ...);
             s8* buf = cast<s8*>(new(64));
             snprintf(buf, 64, \"%d-%.1f\", 42, 1.5);",
        )
        .unwrap();
    let mut out = [0u8; 8];
    assert!(context.get("buf", &mut out));
    let address = u64::from_le_bytes(out);
    // SAFETY: the script wrote a NUL-terminated string into a live 64-byte
    // allocation owned by the context
    let written = unsafe { CStr::from_ptr(address as *const libc::c_char) };
    assert_eq!(written.to_str().unwrap(), "42-1.5");
}

#[test]
fn builtin_constants_are_installed() {
    let mut context = PawScriptContext::new();
    context.run("return __builtin_SEEK_END;").unwrap();
    assert_eq!(result_u64(&context), 2);
    let mut out = [0u8; 8];
    assert!(context.get("__builtin_PLATFORM", &mut out));
    assert!(context.get("__builtin_EOF", &mut out));
    assert_eq!(i64::from_le_bytes(out), -1);
}

#[test]
fn builtins_are_const() {
    let mut context = PawScriptContext::new();
    let error = context
        .run("__builtin_EOF = 0;")
        .expect_err("builtins are constants");
    assert!(error.message.contains("Cannot mutate a constant"));
}
