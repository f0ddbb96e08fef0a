use super::{glob_match, Condition, FieldValue, Operator, Query};

#[test]
fn glob_star_matches_any_run() {
    assert!(glob_match("wid*", "widget"));
    assert!(glob_match("*get", "widget"));
    assert!(glob_match("*", ""));
    assert!(!glob_match("wid*get", "wid"));
}

#[test]
fn glob_question_matches_exactly_one_char() {
    assert!(glob_match("w?dget", "widget"));
    assert!(!glob_match("w?dget", "wdget"));
    assert!(!glob_match("w?dget", "widdget"));
}

#[test]
fn glob_escaped_wildcards_are_literal() {
    assert!(glob_match(r"100\*off", "100*off"));
    assert!(!glob_match(r"100\*off", "100xoff"));
}

#[test]
fn glob_is_case_sensitive() {
    assert!(!glob_match("Widget", "widget"));
}

#[test]
fn query_builder_accumulates_conditions_and_paging() {
    let q = Query::new()
        .with(Condition::eq_str("name", "bolt"))
        .with(Condition::gt_i64("stock", 0))
        .limit(10)
        .offset(5);
    assert_eq!(q.conditions.len(), 2);
    assert_eq!(q.limit, 10);
    assert_eq!(q.offset, 5);
}

#[test]
fn between_condition_carries_both_bounds() {
    let c = Condition::between_i64("price", 1, 10);
    assert_eq!(c.op, Operator::Between);
    assert_eq!(c.value, Some(FieldValue::I64(1)));
    assert_eq!(c.upper, Some(FieldValue::I64(10)));
}

#[test]
fn is_null_condition_carries_no_value() {
    let c = Condition::is_null("name");
    assert_eq!(c.op, Operator::IsNull);
    assert!(c.value.is_none());
}
