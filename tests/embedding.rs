use pawscript::{PawScriptContext, RESULT_NAME};

fn result_u64(context: &PawScriptContext) -> u64 {
    let mut out = [0u8; 8];
    assert!(context.get(RESULT_NAME, &mut out), "no result bound");
    u64::from_le_bytes(out)
}

#[test]
fn get_and_set_variables() {
    let mut context = PawScriptContext::new();
    context.run("u32 x = 1;").unwrap();
    assert!(context.set("x", &5u32.to_le_bytes()));
    context.run("return x + 1;").unwrap();
    assert_eq!(result_u64(&context), 6);
}

#[test]
fn set_rejects_const_and_missing() {
    let mut context = PawScriptContext::new();
    context.run("const u32 c = 1;").unwrap();
    assert!(!context.set("c", &2u32.to_le_bytes()));
    assert!(!context.set("missing", &[0u8; 4]));
    let mut out = [0u8; 4];
    assert!(!context.get("missing", &mut out));
}

#[test]
fn get_type_reports_layout() {
    let mut context = PawScriptContext::new();
    context
        .run("struct V { f32 x; f32 y; f32 z; }; V* origin = new<V>;")
        .unwrap();
    let ty = context.get_type("origin").expect("variable exists");
    assert_eq!(context.types().size_of(ty), 8);
    let f64_ty = {
        context.run("f64 d;").unwrap();
        context.get_type("d").unwrap()
    };
    assert_eq!(context.types().size_of(f64_ty), 8);
    assert_eq!(context.types().align_of(f64_ty), 8);
}

#[test]
fn errors_drain_in_order() {
    let mut context = PawScriptContext::new();
    let first = context
        .run("u32 x = missing_one;")
        .expect_err("undefined variable");
    assert!(first.message.contains("missing_one"));
    assert!(!context.any_errors());
    assert!(context.next_error().is_none());
}

#[test]
fn render_result_for_driver() {
    let mut context = PawScriptContext::new();
    context.run("return 41 + 1;").unwrap();
    assert_eq!(context.render_variable(RESULT_NAME).as_deref(), Some("42"));
    context.run("return 0 - 1;").unwrap();
    assert_eq!(context.render_variable(RESULT_NAME).as_deref(), Some("-1"));
}

#[test]
fn contexts_are_independent() {
    let mut a = PawScriptContext::new();
    let mut b = PawScriptContext::new();
    a.run("u32 only_in_a = 1;").unwrap();
    let mut out = [0u8; 4];
    assert!(a.get("only_in_a", &mut out));
    assert!(!b.get("only_in_a", &mut out));
    b.run("return 2;").unwrap();
    assert_eq!(result_u64(&b), 2);
}

#[test]
fn typedefs_and_struct_inheritance() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "typedef u32 Id;
             Id me = 7;
             struct Base { s32 x; };
             struct Derived : Base { s32 y; };
             return offsetof<Derived>.y * 100 + me;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 407);
}

#[test]
fn custom_field_offsets() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "struct Packed { u8 a; u8 b @ a + 10; };
             return offsetof<Packed>.b * 100 + sizeof(Packed);",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 1011);
}

#[test]
fn self_referential_struct() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "struct Node { s32 value; Node* next; };
             Node* a = new<Node>;
             Node* b = new<Node>;
             a.value = 1;
             b.value = 2;
             a.next = b;
             return a.next.value;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 2);
}
