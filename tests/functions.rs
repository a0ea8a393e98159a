use std::ffi::CString;

use pawscript::{PawScriptContext, VarargItem, RESULT_NAME};

fn result_u64(context: &PawScriptContext) -> u64 {
    let mut out = [0u8; 8];
    assert!(context.get(RESULT_NAME, &mut out), "no result bound");
    u64::from_le_bytes(out)
}

fn function_pointer(context: &PawScriptContext, name: &str) -> u64 {
    let mut out = [0u8; 8];
    assert!(context.get(name, &mut out), "function not found");
    u64::from_le_bytes(out)
}

#[test]
fn functions_see_globals_but_not_locals() {
    let mut context = PawScriptContext::new();
    let error = context
        .run(
            "u32 global = 1;
             {
                 u32 local = 2;
                 u32 f() { return local; }
                 f();
             }",
        )
        .expect_err("caller locals must not be visible");
    assert!(error.message.contains("Undefined variable 'local'"));

    let mut context = PawScriptContext::new();
    context
        .run("u32 global = 1; u32 f() { return global + 1; } return f();")
        .unwrap();
    assert_eq!(result_u64(&context), 2);
}

#[test]
fn script_varargs_access_and_forward() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u64 inner(u64 n, ...) { return n + cast<u64>(...[0]); }
             u64 outer(u64 n, ...) { return inner(n, ...); }
             return outer(10, 32);",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 42);
}

#[test]
fn vararg_index_out_of_bounds_is_an_error() {
    let mut context = PawScriptContext::new();
    let error = context
        .run("u64 f(...) { return cast<u64>(...[2]); } return f(1);")
        .expect_err("index past the provided arguments");
    assert!(error.message.contains("Index out of bounds"));
}

#[test]
fn methods_receive_the_hidden_receiver() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "struct Counter { s32 value; s32() bump; };
             Counter* c = new<Counter>;
             c.value = 10;
             c.bump = new< s32() >{ this.value++; return 0; };
             c.bump();
             c.bump();
             return c.value;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 12);
}

#[test]
fn native_round_trip_mixed_arguments() {
    let mut context = PawScriptContext::new();
    context
        .run("u64 mix(u32 a, f64 b, u32 c, f32 d) { return a + cast<u32>(b) + c + cast<u32>(d); }")
        .unwrap();
    let address = function_pointer(&context, "mix");
    // SAFETY: the trampoline exposes the script function under this exact
    // native signature
    let mix: extern "C" fn(u32, f64, u32, f32) -> u64 =
        unsafe { std::mem::transmute(address) };
    assert_eq!(mix(2, 3.0, 4, 5.0), 14);
}

#[test]
fn native_round_trip_float_return() {
    let mut context = PawScriptContext::new();
    context
        .run("f64 halve(f64 x) { return x / 2.0; }")
        .unwrap();
    let address = function_pointer(&context, "halve");
    // SAFETY: signature matches the script declaration
    let halve: extern "C" fn(f64) -> f64 = unsafe { std::mem::transmute(address) };
    assert_eq!(halve(9.0), 4.5);
}

#[test]
fn native_round_trip_many_arguments_spill_to_stack() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u64 total(u64 a, u64 b, u64 c, u64 d, u64 e, u64 f, u64 g, u64 h) {
                 return a + b + c + d + e + f + g + h;
             }",
        )
        .unwrap();
    let address = function_pointer(&context, "total");
    // SAFETY: signature matches the script declaration
    let total: extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64) -> u64 =
        unsafe { std::mem::transmute(address) };
    assert_eq!(total(1, 2, 3, 4, 5, 6, 7, 8), 36);
}

#[test]
fn host_supplied_varargs_reach_the_script() {
    let mut context = PawScriptContext::new();
    context
        .run("u64 sum(...) { return cast<u64>(...[0]) + cast<u64>(...[1]); }")
        .unwrap();
    let address = function_pointer(&context, "sum");
    let u32_name = CString::new("u32").unwrap();
    let items = [
        VarargItem {
            type_str: u32_name.as_ptr(),
            data: 5,
        },
        VarargItem {
            type_str: u32_name.as_ptr(),
            data: 7,
        },
    ];
    // SAFETY: varargs-taking script functions accept (count, items)
    let sum: extern "C" fn(u64, *const VarargItem) -> u64 =
        unsafe { std::mem::transmute(address) };
    assert_eq!(sum(2, items.as_ptr()), 12);
}

#[test]
fn host_pointer_assigned_into_script_function() {
    extern "C" fn triple(x: u64) -> u64 {
        x * 3
    }
    let mut context = PawScriptContext::new();
    context.run("u64 f(u64 x);").unwrap();
    assert!(context.set_function("f", triple as *const u8));
    context.run("return f(14);").unwrap();
    assert_eq!(result_u64(&context), 42);
}

#[test]
fn arity_mismatch_is_an_error() {
    let mut context = PawScriptContext::new();
    let error = context
        .run("u32 f(u32 a) { return a; } return f(1, 2);")
        .expect_err("too many arguments");
    assert!(error.message.contains("expects exactly 1 parameter"));
}
