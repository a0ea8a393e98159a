use pawscript::{PawScriptContext, RESULT_NAME};

fn result_u64(context: &PawScriptContext) -> u64 {
    let mut out = [0u8; 8];
    assert!(context.get(RESULT_NAME, &mut out), "no result bound");
    u64::from_le_bytes(out)
}

fn run_for_u64(code: &str) -> u64 {
    let mut context = PawScriptContext::new();
    context.run(code).unwrap();
    result_u64(&context)
}

#[test]
fn while_with_break_and_continue() {
    let total = run_for_u64(
        "u64 s = 0;
         s32 i = 0;
         while i < 10 {
             i++;
             if i % 2 == 0 { continue; }
             if i > 7 { break; }
             s += i;
         }
         return s;",
    );
    assert_eq!(total, 16);
}

#[test]
fn while_false_never_runs() {
    assert_eq!(run_for_u64("u64 s = 1; while 0 { s = 2; } return s;"), 1);
}

#[test]
fn elif_chain_takes_first_match() {
    assert_eq!(
        run_for_u64(
            "s32 x = 5;
             if x < 3 { return 1; }
             elif x < 7 { return 2; }
             else { return 3; }"
        ),
        2
    );
}

#[test]
fn else_takes_unmatched() {
    assert_eq!(
        run_for_u64(
            "s32 x = 9;
             if x < 3 { return 1; }
             elif x < 7 { return 2; }
             else { return 3; }"
        ),
        3
    );
}

#[test]
fn arrow_bodies_run_one_statement() {
    assert_eq!(
        run_for_u64("u64 s = 0; if 1 -> s = 5; return s;"),
        5
    );
}

#[test]
fn conditional_expression_selects_one_arm() {
    assert_eq!(
        run_for_u64(
            "u8 taken = 0;
             u8 pick(u8 v) { taken = v; return v; }
             u32 x = if 1 -> [ pick(4) ; pick(9) ];
             return x * 10 + taken;"
        ),
        44
    );
}

#[test]
fn range_directions_and_exclusivity() {
    // descending with both ends exclusive: 4, 3, 2
    assert_eq!(
        run_for_u64("u64 s = 0; for s32 i in (5,1) { s += i; } return s;"),
        9
    );
    // half-open ascending: 1..4
    assert_eq!(
        run_for_u64("u64 s = 0; for s32 i in [1,5) { s += i; } return s;"),
        10
    );
}

#[test]
fn equal_bounds_inclusive_runs_once() {
    assert_eq!(
        run_for_u64("u64 n = 0; for s32 i in [3,3] { n++; } return n;"),
        1
    );
    assert_eq!(
        run_for_u64("u64 n = 0; for s32 i in [3,3) { n++; } return n;"),
        0
    );
}

#[test]
fn return_propagates_out_of_loops() {
    assert_eq!(
        run_for_u64(
            "u64 f() {
                 for s32 i in [0,100] {
                     if i == 7 { return i; }
                 }
                 return 0;
             }
             return f();"
        ),
        7
    );
}

#[test]
fn stray_break_is_silently_absorbed() {
    let mut context = PawScriptContext::new();
    // no diagnostic, but the rest of the unit does not run
    context.run("u64 s = 1; break; s = 2;").unwrap();
    let mut out = [0u8; 8];
    assert!(context.get("s", &mut out));
    assert_eq!(u64::from_le_bytes(out), 1);
    // the context stays usable
    context.run("return 4;").unwrap();
    assert_eq!(result_u64(&context), 4);
}

#[test]
fn signed_comparisons_with_negatives() {
    assert_eq!(run_for_u64("s32 a = -5; s32 b = -3; return a < b;"), 1);
    assert_eq!(run_for_u64("s32 a = -5; u32 b = 3; return a < b;"), 1);
    assert_eq!(run_for_u64("f64 a = -1.5; return a < 0.0;"), 1);
}

#[test]
fn include_runs_in_the_global_scope() {
    use std::collections::HashMap;
    use std::io;

    struct MapResolver(HashMap<String, String>);

    impl pawscript::SourceResolver for MapResolver {
        fn load(&self, _base: Option<&str>, path: &str) -> io::Result<(String, String)> {
            self.0
                .get(path)
                .map(|source| (path.to_string(), source.clone()))
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing source"))
        }
    }

    let mut sources = HashMap::new();
    sources.insert(
        "lib.paw".to_string(),
        "u64 helper(u64 x) { return x + 1; }".to_string(),
    );
    let mut context = PawScriptContext::new();
    context.set_resolver(Box::new(MapResolver(sources)));
    context
        .run("{ include \"lib.paw\"; } return helper(20);")
        .unwrap();
    assert_eq!(result_u64(&context), 21);

    let error = context
        .run("include \"nope.paw\";")
        .expect_err("missing include");
    assert!(error.message.contains("Cannot open file"));
}
