use pawscript::{PawScriptContext, RESULT_NAME};

fn result_u64(context: &PawScriptContext) -> u64 {
    let mut out = [0u8; 8];
    assert!(context.get(RESULT_NAME, &mut out), "no result bound");
    u64::from_le_bytes(out)
}

#[test]
fn integer_arithmetic() {
    let mut context = PawScriptContext::new();
    context.run("u32 x = 3; u32 y = 4; return x + y;").unwrap();
    assert_eq!(result_u64(&context), 7);
}

#[test]
fn script_function_with_floats() {
    let mut context = PawScriptContext::new();
    context
        .run("f64 h(f64 a, f64 b) { return a*a + b*b; } return cast<u32>(h(3.0, 4.0));")
        .unwrap();
    assert_eq!(result_u64(&context), 25);
}

#[test]
fn struct_fields_through_pointer() {
    let mut context = PawScriptContext::new();
    context
        .run("struct P { s32 x; s32 y; }; P* p = new<P>; p.x = 2; p.y = 5; return p.x + p.y;")
        .unwrap();
    assert_eq!(result_u64(&context), 7);
}

#[test]
fn inclusive_range_sum() {
    let mut context = PawScriptContext::new();
    context
        .run("u64 s = 0; for s32 i in [1,5] { s += i; } return s;")
        .unwrap();
    assert_eq!(result_u64(&context), 15);
}

#[test]
fn short_circuit_skips_side_effects() {
    let mut context = PawScriptContext::new();
    context
        .run("u8 count = 0; u8 f() { count++; return 0; } if 1 || f() -> [ ; ; ] return count;")
        .unwrap();
    assert_eq!(result_u64(&context), 0);
}

#[test]
fn and_short_circuit() {
    let mut context = PawScriptContext::new();
    context
        .run("u8 count = 0; u8 f() { count++; return 1; } if 0 && f() -> [ ; ; ] return count;")
        .unwrap();
    assert_eq!(result_u64(&context), 0);
}

#[test]
fn allocation_length_via_infoof() {
    let mut context = PawScriptContext::new();
    context
        .run("u32* p = new<u32>(8); u32 n = infoof(p).length; return n;")
        .unwrap();
    assert_eq!(result_u64(&context), 8);
}

#[test]
fn sizeof_type_and_expression_agree() {
    let mut context = PawScriptContext::new();
    context
        .run("u32* p = new<u32>; return sizeof(u32) * 100 + sizeof(*p);")
        .unwrap();
    assert_eq!(result_u64(&context), 404);
}

#[test]
fn offsetof_matches_field_distance() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "struct S { u8 a; u64 b; };
             S* s = new<S>;
             u64 direct = cast<u64>(&s.b) - cast<u64>(s);
             return offsetof<S>.b * 100 + direct;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 808);
}

#[test]
fn bitcast_roundtrip() {
    let mut context = PawScriptContext::new();
    context
        .run("f32 x = 1.5; return cast<u32>(bitcast<f32>(bitcast<u32>(x)) == x);")
        .unwrap();
    assert_eq!(result_u64(&context), 1);
}

#[test]
fn char_literals_fold_big_endian() {
    let mut context = PawScriptContext::new();
    context.run("return 'ab';").unwrap();
    assert_eq!(result_u64(&context), 0x6162);
}

#[test]
fn native_cast_operators_pass_value_through() {
    let mut context = PawScriptContext::new();
    context.run("u32 x = 5; return x?? + 5?;").unwrap();
    assert_eq!(result_u64(&context), 10);
}
