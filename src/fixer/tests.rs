use super::*;

fn fixer() -> LocalFixer {
    LocalFixer::new(Arc::new(PatternStore::new()))
}

/// Code/error pairs where a built-in rule fires.
fn known_cases() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            ". = parse_json!(.message)\nparts = split(.message, \" \") ?? []\n.host = parts[1]",
            "error[E651]: unnecessary error coalescing operation",
        ),
        (
            ".user = upcase(.user) ?? \"\"\n.ok = contains(.message, \"sshd\") ?? false",
            "error[E651]: unnecessary error coalescing operation",
        ),
        (
            ".has_pid = exists(.pid) ?? false\n.n = length(.tags) ?? 0\n.x = .y ?? null",
            "error[E651]: unnecessary error coalescing operation",
        ),
        (
            "parts = split(.message, \" \")\n.ts = parse_timestamp(.time, \"%b %d %H:%M:%S\")",
            "error[E103]: unhandled fallible assignment",
        ),
        (
            ".level = lowercase(.level)\n.ok = startswith(.message, \"Dec\")",
            "error[E105]: call to undefined function",
        ),
        (
            "if parse_int(.code) {\n  .ok = true\n}",
            "error[E110]: fallible predicate",
        ),
        (
            ".a = 1\nabort\nif .b == null { abort }",
            "error[E620]: can't abort infallible function",
        ),
        (
            "if .x == 1 {\n  return .\n}\n.last = parts[length(parts) - 1]",
            "error[E203]: syntax error",
        ),
    ]
}

#[test]
fn returns_none_for_unknown_errors() {
    assert_eq!(fixer().fix_locally(".a = 1", "engine exploded"), None);
}

#[test]
fn returns_none_when_no_pattern_matches() {
    assert_eq!(
        fixer().fix_locally(".a = to_string(.b)", "error[E651]: unnecessary coalescing"),
        None
    );
}

#[test]
fn removes_redundant_coalescing() {
    let fixed = fixer()
        .fix_locally(
            "parts = split(.message, \" \") ?? []\n.ok = contains(.m, \"x\") ?? false",
            "error[E651]: unnecessary error coalescing operation",
        )
        .unwrap();
    assert_eq!(fixed, "parts = split(.message, \" \")\n.ok = contains(.m, \"x\")");
}

#[test]
fn adds_fallback_to_fallible_assignments() {
    let fixed = fixer()
        .fix_locally(
            "parts = split(.message, \" \")\n.ts = parse_timestamp(.time, \"%s\")",
            "error[E103]: unhandled fallible assignment",
        )
        .unwrap();
    assert_eq!(
        fixed,
        "parts = split(.message, \" \") ?? []\n.ts = parse_timestamp(.time, \"%s\") ?? null"
    );
}

#[test]
fn comment_lines_are_never_rewritten() {
    let code = "# parts = split(.message) ?? []\n.a = 1";
    assert_eq!(
        fixer().fix_locally(code, "error[E651]: unnecessary coalescing"),
        None
    );
}

#[test]
fn one_rule_per_line_per_pass_still_reaches_fixed_point() {
    // Two redundant fallbacks on one line need two passes.
    let fixed = fixer()
        .fix_locally(
            ".a = split(.m, \",\") ?? [] ; .b = length(.c) ?? 0",
            "error[E651]: unnecessary error coalescing operation",
        )
        .unwrap();
    assert_eq!(fixed, ".a = split(.m, \",\") ; .b = length(.c)");
}

#[test]
fn drops_abort_lines_and_blocks() {
    let fixed = fixer()
        .fix_locally(
            ".a = 1\nabort\nif .b == null { abort }",
            "error[E620]: can't abort infallible function",
        )
        .unwrap();
    assert_eq!(fixed, ".a = 1\nif .b == null {}");
}

#[test]
fn fix_locally_is_idempotent_for_every_known_pattern() {
    for (code, error) in known_cases() {
        let fixer = fixer();
        let once = fixer
            .fix_locally(code, error)
            .unwrap_or_else(|| panic!("expected a fix for {error}"));
        assert_ne!(once, code);
        assert_eq!(
            fixer.fix_locally(&once, error),
            None,
            "second application changed output for {error}:\n{once}"
        );
    }
}

#[test]
fn learns_commented_return_from_syntax_diagnostic() {
    let fixer = fixer();
    let error = "error[E203]: syntax error\n  ┌─ :3:5\n  │\n3 │     if .x { return . }\n  │             ^^^^^^ unexpected token";
    let code = ".a = 1\nif .x { return . }\n.b = 2";
    let fixed = fixer.fix_locally(code, error).unwrap();
    assert_eq!(fixed, ".a = 1\n# if .x { return . }\n.b = 2");
    assert_eq!(fixer.store().len(), 1);

    // Learned once per construct.
    assert_eq!(fixer.fix_locally(&fixed, error), None);
    assert_eq!(fixer.store().len(), 1);
}

#[test]
fn learned_patterns_are_shared_through_the_store() {
    let store = Arc::new(PatternStore::new());
    let first = LocalFixer::new(store.clone());
    let second = LocalFixer::new(store.clone());
    let error = "error[E103]: unhandled fallible expression `parse_key_value(.kv)`";

    let fixed = first
        .fix_locally("if parse_key_value(.kv) != {} { .ok = true }", error)
        .unwrap();
    assert_eq!(fixed, "if (parse_key_value(.kv) ?? null) != {} { .ok = true }");

    // A different fixer sees the learned rule even with an uninformative message.
    let fixed_again = second
        .fix_locally(
            ".x = parse_key_value(.kv).a",
            "error[E103]: unhandled fallible expression",
        )
        .unwrap();
    assert_eq!(fixed_again, ".x = (parse_key_value(.kv) ?? null).a");
    assert_eq!(store.len(), 1);
}

#[test]
fn learned_wrap_does_not_stack_on_existing_fallback() {
    let fixer = fixer();
    let error = "error[E103]: unhandled fallible expression `split(.a)`";
    let fixed = fixer.fix_locally("x = split(.a)", error).unwrap();
    assert_eq!(fixed, "x = split(.a) ?? []");
    assert_eq!(fixer.fix_locally(&fixed, error), None);
}

#[test]
fn apply_reports_rule_names() {
    let fix = fixer()
        .apply("  return .", "error[E203]: syntax error")
        .unwrap();
    assert_eq!(fix.error_code, ErrorCode::Syntax);
    assert_eq!(fix.rules_applied, vec!["comment_bare_return".to_string()]);
    assert_eq!(fix.code, "  # return .");
}
