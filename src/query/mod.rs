//! The field-query engine: a thin layer over [`crate::store::Database::foreach`].
//!
//! Conditions carry a tagged-union [`FieldValue`] rather than leaning on runtime type
//! reflection — callers build them through the type-specific constructors on [`Condition`].

#[cfg(test)]
mod tests;

use crate::error::{Result, StoreError};
use crate::record::Record;
use crate::store::Database;

/// A tagged-union value used both as a field's current value and as a condition operand.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

/// Equality tolerance used when comparing two floating-point field values.
pub const FLOAT_EPSILON: f64 = 1e-9;

/// A comparison operator usable in a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    Like,
    IsNull,
    NotNull,
}

/// A single `field OP value[, upper]` predicate.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: &'static str,
    pub op: Operator,
    pub value: Option<FieldValue>,
    pub upper: Option<FieldValue>,
}

impl Condition {
    pub fn eq_i64(field: &'static str, v: i64) -> Self {
        Self { field, op: Operator::Eq, value: Some(FieldValue::I64(v)), upper: None }
    }
    pub fn ne_i64(field: &'static str, v: i64) -> Self {
        Self { field, op: Operator::Ne, value: Some(FieldValue::I64(v)), upper: None }
    }
    pub fn lt_i64(field: &'static str, v: i64) -> Self {
        Self { field, op: Operator::Lt, value: Some(FieldValue::I64(v)), upper: None }
    }
    pub fn le_i64(field: &'static str, v: i64) -> Self {
        Self { field, op: Operator::Le, value: Some(FieldValue::I64(v)), upper: None }
    }
    pub fn gt_i64(field: &'static str, v: i64) -> Self {
        Self { field, op: Operator::Gt, value: Some(FieldValue::I64(v)), upper: None }
    }
    pub fn ge_i64(field: &'static str, v: i64) -> Self {
        Self { field, op: Operator::Ge, value: Some(FieldValue::I64(v)), upper: None }
    }
    pub fn between_i64(field: &'static str, lo: i64, hi: i64) -> Self {
        Self {
            field,
            op: Operator::Between,
            value: Some(FieldValue::I64(lo)),
            upper: Some(FieldValue::I64(hi)),
        }
    }
    pub fn eq_f64(field: &'static str, v: f64) -> Self {
        Self { field, op: Operator::Eq, value: Some(FieldValue::F64(v)), upper: None }
    }
    pub fn between_f64(field: &'static str, lo: f64, hi: f64) -> Self {
        Self {
            field,
            op: Operator::Between,
            value: Some(FieldValue::F64(lo)),
            upper: Some(FieldValue::F64(hi)),
        }
    }
    pub fn eq_bool(field: &'static str, v: bool) -> Self {
        Self { field, op: Operator::Eq, value: Some(FieldValue::Bool(v)), upper: None }
    }
    pub fn ne_bool(field: &'static str, v: bool) -> Self {
        Self { field, op: Operator::Ne, value: Some(FieldValue::Bool(v)), upper: None }
    }
    pub fn eq_str(field: &'static str, v: impl Into<String>) -> Self {
        Self { field, op: Operator::Eq, value: Some(FieldValue::Str(v.into())), upper: None }
    }
    pub fn like(field: &'static str, pattern: impl Into<String>) -> Self {
        Self { field, op: Operator::Like, value: Some(FieldValue::Str(pattern.into())), upper: None }
    }
    pub fn is_null(field: &'static str) -> Self {
        Self { field, op: Operator::IsNull, value: None, upper: None }
    }
    pub fn not_null(field: &'static str) -> Self {
        Self { field, op: Operator::NotNull, value: None, upper: None }
    }
}

/// A query against one record type: a conjunction of [`Condition`]s plus optional
/// `limit`/`offset`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub conditions: Vec<Condition>,
    /// 0 means unlimited.
    pub limit: usize,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cond: Condition) -> Self {
        self.conditions.push(cond);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = n;
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }
}

/// `IS_NULL` is defined as "the field's value equals its type's zero/empty value" — the
/// only null model this store has, since there is no dedicated null bit.
fn is_null_value(v: &FieldValue) -> bool {
    match v {
        FieldValue::I64(n) => *n == 0,
        FieldValue::F64(n) => *n == 0.0,
        FieldValue::Bool(b) => !*b,
        FieldValue::Str(s) => s.is_empty(),
    }
}

fn matches_condition(actual: &FieldValue, cond: &Condition) -> Result<bool> {
    match cond.op {
        Operator::IsNull => return Ok(is_null_value(actual)),
        Operator::NotNull => return Ok(!is_null_value(actual)),
        _ => {}
    }
    let value = cond
        .value
        .as_ref()
        .ok_or_else(|| StoreError::InvalidArg("condition missing value".into()))?;

    match cond.op {
        Operator::Like => {
            let (FieldValue::Str(s), FieldValue::Str(pattern)) = (actual, value) else {
                return Err(StoreError::InvalidArg("LIKE requires string field".into()));
            };
            Ok(glob_match(pattern, s))
        }
        Operator::Between => {
            let upper = cond
                .upper
                .as_ref()
                .ok_or_else(|| StoreError::InvalidArg("BETWEEN requires an upper bound".into()))?;
            let (lo, v, hi) = (as_f64(value)?, as_f64(actual)?, as_f64(upper)?);
            Ok(v >= lo && v <= hi)
        }
        Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            compare(actual, cond.op, value)
        }
        Operator::IsNull | Operator::NotNull => unreachable!(),
    }
}

fn compare(actual: &FieldValue, op: Operator, value: &FieldValue) -> Result<bool> {
    match (actual, value) {
        (FieldValue::Bool(a), FieldValue::Bool(b)) => match op {
            Operator::Eq => Ok(a == b),
            Operator::Ne => Ok(a != b),
            _ => Err(StoreError::InvalidArg("bool supports only = and !=".into())),
        },
        (FieldValue::Str(a), FieldValue::Str(b)) => Ok(match op {
            Operator::Eq => a == b,
            Operator::Ne => a != b,
            Operator::Lt => a < b,
            Operator::Le => a <= b,
            Operator::Gt => a > b,
            Operator::Ge => a >= b,
            _ => unreachable!(),
        }),
        _ => {
            let a = as_f64(actual)?;
            let b = as_f64(value)?;
            let is_float = matches!(actual, FieldValue::F64(_)) || matches!(value, FieldValue::F64(_));
            Ok(match op {
                Operator::Eq => {
                    if is_float {
                        (a - b).abs() < FLOAT_EPSILON
                    } else {
                        a == b
                    }
                }
                Operator::Ne => {
                    if is_float {
                        (a - b).abs() >= FLOAT_EPSILON
                    } else {
                        a != b
                    }
                }
                Operator::Lt => a < b,
                Operator::Le => a <= b,
                Operator::Gt => a > b,
                Operator::Ge => a >= b,
                _ => unreachable!(),
            })
        }
    }
}

fn as_f64(v: &FieldValue) -> Result<f64> {
    match v {
        FieldValue::I64(n) => Ok(*n as f64),
        FieldValue::F64(n) => Ok(*n),
        _ => Err(StoreError::InvalidArg(
            "expected a numeric field value".into(),
        )),
    }
}

/// Greedy, backtracking glob match: `*` = any sequence (including empty), `?` = exactly
/// one character, `\*`/`\?` = literal. Case-sensitive.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let txt: Vec<char> = text.chars().collect();
    glob_match_tokens(&tokenize(pattern), &txt)
}

#[derive(Clone, Copy, PartialEq)]
enum PatToken {
    Star,
    Any,
    Lit(char),
}

fn tokenize(pattern: &str) -> Vec<PatToken> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() && (chars[i + 1] == '*' || chars[i + 1] == '?') => {
                out.push(PatToken::Lit(chars[i + 1]));
                i += 2;
            }
            '*' => {
                out.push(PatToken::Star);
                i += 1;
            }
            '?' => {
                out.push(PatToken::Any);
                i += 1;
            }
            c => {
                out.push(PatToken::Lit(c));
                i += 1;
            }
        }
    }
    out
}

fn glob_match_tokens(pat: &[PatToken], txt: &[char]) -> bool {
    match pat.first() {
        None => txt.is_empty(),
        Some(PatToken::Star) => {
            // try consuming 0..=txt.len() characters for the star, greedily from the
            // longest match backwards (pure greedy-with-backtrack, order doesn't affect
            // correctness, only which failing attempts are tried first).
            for split in (0..=txt.len()).rev() {
                if glob_match_tokens(&pat[1..], &txt[split..]) {
                    return true;
                }
            }
            false
        }
        Some(PatToken::Any) => {
            if txt.is_empty() {
                false
            } else {
                glob_match_tokens(&pat[1..], &txt[1..])
            }
        }
        Some(PatToken::Lit(c)) => {
            if txt.first() == Some(c) {
                glob_match_tokens(&pat[1..], &txt[1..])
            } else {
                false
            }
        }
    }
}

/// Runs `query` via `db.foreach` for type `T`, invoking `on_match` for each matching
/// record (honoring `offset`/`limit`); `on_match` returning `false` stops iteration early.
pub fn exec<T: Record>(
    db: &Database,
    query: &Query,
    mut on_match: impl FnMut(&T) -> bool,
) -> Result<()> {
    let mut skipped = 0usize;
    let mut emitted = 0usize;
    db.foreach::<T>(|record| {
        if query.limit != 0 && emitted >= query.limit {
            return false;
        }
        match record_matches::<T>(record, query) {
            Ok(true) => {}
            Ok(false) => return true,
            Err(_) => return true,
        }
        if skipped < query.offset {
            skipped += 1;
            return true;
        }
        emitted += 1;
        let keep_going = on_match(record);
        keep_going && !(query.limit != 0 && emitted >= query.limit)
    })
}

/// Counts matches for `query` against type `T`, ignoring `limit`/`offset`.
pub fn count<T: Record>(db: &Database, query: &Query) -> Result<usize> {
    let mut n = 0usize;
    let unbounded = Query {
        conditions: query.conditions.clone(),
        limit: 0,
        offset: 0,
    };
    db.foreach::<T>(|record| {
        if matches!(record_matches::<T>(record, &unbounded), Ok(true)) {
            n += 1;
        }
        true
    })?;
    Ok(n)
}

fn record_matches<T: Record>(record: &T, query: &Query) -> Result<bool> {
    for cond in &query.conditions {
        let field = T::fields()
            .iter()
            .find(|f| f.name == cond.field)
            .ok_or_else(|| StoreError::InvalidArg(format!("unknown field `{}`", cond.field)))?;
        let actual = (field.get)(record);
        if !matches_condition(&actual, cond)? {
            return Ok(false);
        }
    }
    Ok(true)
}
