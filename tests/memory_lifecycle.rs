use pawscript::{PawScriptContext, RESULT_NAME};

fn result_u64(context: &PawScriptContext) -> u64 {
    let mut out = [0u8; 8];
    assert!(context.get(RESULT_NAME, &mut out), "no result bound");
    u64::from_le_bytes(out)
}

#[test]
fn new_is_valid_until_delete() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* p = new<u32>;
             u8 before = infoof(p).is_valid;
             delete(p);
             u8 after = infoof(p).is_valid;
             return before * 10 + after;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 10);
}

#[test]
fn scoped_allocation_dies_with_its_scope() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* p = null;
             { p = new scoped <u32>; }
             return infoof(p).is_valid;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 0);
}

#[test]
fn plain_new_outlives_the_block() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* p = null;
             { p = new<u32>; *p = 9; }
             return *p;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 9);
}

#[test]
fn adopt_pins_allocation_to_the_current_scope() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* q = null;
             { q = new<u32>; adopt(q); }
             return infoof(q).is_valid;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 0);
}

#[test]
fn promote_global_survives_scope_pop() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* keep = null;
             {
                 u32* p = new scoped <u32>;
                 *p = 77;
                 promote global (p);
                 keep = p;
             }
             return *keep;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 77);
}

#[test]
fn promote_by_level() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* keep = null;
             {
                 {
                     u32* p = new scoped <u32>;
                     *p = 5;
                     promote 1 (p);
                     keep = p;
                 }
                 *keep += 1;
             }
             return infoof(keep).is_valid;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 0);
}

#[test]
fn promote_to_explicit_depth() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* keep = null;
             {
                 {
                     keep = new scoped <u32>;
                     *keep = 3;
                     promote (keep) -> [0];
                 }
             }
             return *keep;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 3);
}

#[test]
fn infoof_reports_scope_depth() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* p = new<u32>;
             u32* q = new scoped <u32>;
             return infoof(p).scope * 10 + infoof(q).scope;",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 0);
}

#[test]
fn scopeof_reports_declaration_depth() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32 g = 0;
             {
                 u32 inner = 0;
                 return scopeof(inner) * 10 + scopeof(g);
             }",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 10);
}

#[test]
fn pointer_arithmetic_scales_by_element() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* p = new<u32>(4);
             u32* q = p + 2;
             return cast<u64>(q) - cast<u64>(p);",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 8);
}

#[test]
fn indexing_reads_and_writes() {
    let mut context = PawScriptContext::new();
    context
        .run(
            "u32* p = new<u32>(4);
             p[0] = 10;
             p[2] = 20;
             return p[0] + p[2];",
        )
        .unwrap();
    assert_eq!(result_u64(&context), 30);
}

#[test]
fn dereference_outside_allocations_is_an_error() {
    let mut context = PawScriptContext::new();
    let error = context
        .run("s8* s = \"hi\"; return s[0];")
        .expect_err("literal storage is not script memory");
    assert!(error.message.contains("Invalid dereference"));
}

#[test]
fn delete_then_use_is_an_error() {
    let mut context = PawScriptContext::new();
    let error = context
        .run("u32* p = new<u32>; delete(p); return *p;")
        .expect_err("freed allocation is not dereferencable");
    assert!(error.message.contains("Invalid dereference"));
}
