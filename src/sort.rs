/// Value ordering used by in-memory sorting
///
/// Records are JSON documents, so sort keys can be any JSON value. This module
/// defines one total order over them: missing and null values come first,
/// numbers compare numerically (integers exactly), booleans as false < true,
/// and strings through an ICU collator so the order matches what a user
/// expects from a locale-aware table.
use std::cmp::Ordering;

use icu_collator::{options::CollatorOptions, Collator};
use serde_json::{Number, Value};

use crate::query::{SortDirection, SortEntry};
use crate::utils::Utils;

/// Compare two optional JSON values.
///
/// `compare_str` is the string comparison to use; callers build one collator
/// per sort and pass it in.
pub fn compare_values(
    a: Option<&Value>,
    b: Option<&Value>,
    compare_str: &dyn Fn(&str, &str) -> Ordering,
) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => compare_str(x, y),
        (Some(x), Some(y)) => {
            // Mixed types fall back to comparing their string forms
            let xs = Utils::display_string(x).unwrap_or_default();
            let ys = Utils::display_string(y).unwrap_or_default();
            compare_str(&xs, &ys)
        }
    }
}

/// Integers compare exactly even beyond f64 precision; anything involving a
/// float compares as f64.
pub fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a.cmp(&b);
    }
    // One side is u64 above i64::MAX and the other a negative i64
    if x.as_u64().is_some() && y.as_i64().is_some() {
        return Ordering::Greater;
    }
    if x.as_i64().is_some() && y.as_u64().is_some() {
        return Ordering::Less;
    }

    let a = x.as_f64().unwrap_or(f64::NAN);
    let b = y.as_f64().unwrap_or(f64::NAN);
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Stable multi-key sort of `rows` by the given entries, in priority order.
/// `lookup` extracts the value at a path from a row.
pub fn sort_rows<T, F>(rows: &mut [T], sorts: &[SortEntry], lookup: F)
where
    F: for<'a> Fn(&'a T, &str) -> Option<&'a Value>,
{
    if sorts.is_empty() {
        return;
    }

    let collator = Collator::try_new(Default::default(), CollatorOptions::default()).ok();
    let compare_str = |a: &str, b: &str| match &collator {
        Some(collator) => collator.compare(a, b),
        None => a.cmp(b),
    };

    rows.sort_by(|ra, rb| {
        for entry in sorts {
            let cmp = compare_values(
                lookup(ra, &entry.path),
                lookup(rb, &entry.path),
                &compare_str,
            );
            if cmp != Ordering::Equal {
                return match entry.value {
                    SortDirection::Asc => cmp,
                    SortDirection::Desc => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ordinal(a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }

    #[test]
    fn test_nulls_sort_first() {
        assert_eq!(compare_values(None, Some(&json!(1)), &ordinal), Ordering::Less);
        assert_eq!(
            compare_values(Some(&Value::Null), Some(&json!("a")), &ordinal),
            Ordering::Less
        );
        assert_eq!(compare_values(Some(&Value::Null), None, &ordinal), Ordering::Equal);
        assert_eq!(compare_values(Some(&json!(false)), None, &ordinal), Ordering::Greater);
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(
            compare_values(Some(&json!(9)), Some(&json!(10)), &ordinal),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(2.5)), Some(&json!(2)), &ordinal),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(Some(&json!(-3)), Some(&json!(u64::MAX)), &ordinal),
            Ordering::Less
        );
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        // Both round to the same f64
        let a = json!(9_007_199_254_740_993_u64);
        let b = json!(9_007_199_254_740_992_u64);
        assert_eq!(compare_values(Some(&a), Some(&b), &ordinal), Ordering::Greater);
    }

    #[test]
    fn test_sort_rows_multi_key_is_stable() {
        let mut rows = vec![
            json!({"id": 1, "role": "user", "age": 30}),
            json!({"id": 2, "role": "admin", "age": 30}),
            json!({"id": 3, "role": "user", "age": 25}),
            json!({"id": 4, "role": "admin", "age": 41}),
        ];
        let sorts = vec![
            SortEntry::new("age", SortDirection::Desc),
            SortEntry::new("role", SortDirection::Asc),
        ];
        sort_rows(&mut rows, &sorts, |row, path| Utils::value_at_path(row, path));

        let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_sort_rows_locale_strings() {
        let mut rows = vec![json!({"n": "beta"}), json!({"n": "Alpha"}), json!({"n": "alpha"})];
        let sorts = vec![SortEntry::new("n", SortDirection::Asc)];
        sort_rows(&mut rows, &sorts, |row, path| Utils::value_at_path(row, path));

        let names: Vec<&str> = rows.iter().map(|r| r["n"].as_str().unwrap()).collect();
        // Collation groups case variants together ahead of "beta"
        assert_eq!(names[2], "beta");
    }
}
