//! The Result algebra.
//!
//! Every fallible operation of the toolkit returns [`Result`]. The helpers
//! here cover what `std` does not: combining many results without stopping
//! at the first failure, and re-tagging an error with the field it is about.

use crate::error::Error;
use std::{collections::HashMap, hash::Hash};

/// Result of a fallible toolkit operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Combine a sequence of results.
///
/// Every input is inspected. If all succeed the values come back in input
/// order; otherwise the outcome is an `invalid_field` aggregate holding every
/// failure in input order.
pub fn combine<T, I>(results: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Result<T>>,
{
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(Error::aggregate(errors))
    }
}

/// Combine keyed results.
///
/// Same rules as [`combine`], keeping each value under its key.
pub fn combine_map<K, T, I>(results: I) -> Result<HashMap<K, T>>
where
    K: Eq + Hash,
    I: IntoIterator<Item = (K, Result<T>)>,
{
    let mut values = HashMap::new();
    let mut errors = Vec::new();
    for (key, result) in results {
        match result {
            Ok(value) => {
                values.insert(key, value);
            }
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(Error::aggregate(errors))
    }
}

/// Extension methods on [`Result`].
pub trait ResultExt<T> {
    /// Tag a failure with `field`, replacing any field it already had.
    fn at(self, field: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn at(self, field: impl Into<String>) -> Result<T> {
        self.map_err(|err| err.at(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn combine_keeps_order_on_success() {
        let combined = combine(vec![Ok(1), Ok(2), Ok(3)]);
        assert_eq!(combined, Ok(vec![1, 2, 3]));
    }

    #[test]
    fn combine_collects_every_failure() {
        let combined: Result<Vec<i32>> = combine(vec![
            Ok(1),
            Err(Error::missing_field("a")),
            Ok(3),
            Err(Error::missing_field("b")),
        ]);
        let err = combined.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
        let fields: Vec<_> = err.errors().iter().map(|e| e.field()).collect();
        assert_eq!(fields, vec![Some("a"), Some("b")]);
    }

    #[test]
    fn combine_of_nothing_is_empty_success() {
        let combined: Result<Vec<i32>> = combine(Vec::new());
        assert_eq!(combined, Ok(Vec::new()));
    }

    #[test]
    fn combine_map_keeps_keys() {
        let combined = combine_map(vec![("a", Ok(1)), ("b", Ok(2))]).unwrap();
        assert_eq!(combined["a"], 1);
        assert_eq!(combined["b"], 2);

        let failed: Result<HashMap<&str, i32>> =
            combine_map(vec![("a", Ok(1)), ("b", Err(Error::invalid_field().at("b")))]);
        assert_eq!(failed.unwrap_err().errors().len(), 1);
    }

    #[test]
    fn at_retags_failures_only() {
        let ok: Result<i32> = Ok(1);
        assert_eq!(ok.at("x"), Ok(1));
        let err: Result<i32> = Err(Error::invalid_field().at("inner"));
        assert_eq!(err.at("outer").unwrap_err().field(), Some("outer"));
    }
}
