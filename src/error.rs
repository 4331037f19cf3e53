//! Error types for the scan pipeline.
//!
//! Per-asset failures are recorded rather than propagated, so most of the
//! pipeline reports through [`ScanError`] values that end up in the report
//! aggregator. [`Errors`] accumulates several failures without losing the
//! individual entries.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::DataType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// The job is malformed; raised before any asset is touched.
    #[error("invalid scan job: {0}")]
    Validation(String),

    #[error("failed to connect to asset {asset}: {message}")]
    Connection { asset: String, message: String },

    #[error("failed to compile query '{query}': {message}")]
    Compile { query: String, message: String },

    #[error("type mismatch for datapoint {checksum}: expected {expected}, got {actual}")]
    TypeMismatch {
        checksum: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("execution timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// A store lookup missed; this points at a caller ordering bug.
    #[error("{kind} '{mrn}' not found")]
    NotFound { kind: &'static str, mrn: String },

    #[error("asset {asset} isn't supported by any querypacks: {reason}")]
    NotApplicable { asset: String, reason: String },

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("{0}")]
    Multiple(Errors),
}

impl ScanError {
    pub fn not_found(kind: &'static str, mrn: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            mrn: mrn.into(),
        }
    }

    pub fn connection(asset: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Connection {
            asset: asset.into(),
            message: message.to_string(),
        }
    }

    pub fn compile(query: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Compile {
            query: query.into(),
            message: message.to_string(),
        }
    }

    /// True when the asset was skipped because nothing applies to it.
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Self::NotApplicable { .. })
    }
}

/// An ordered list of errors collected while processing a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Errors {
    errors: Vec<ScanError>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error unless an identical message was already recorded.
    pub fn add(&mut self, err: ScanError) {
        if let ScanError::Multiple(nested) = err {
            self.extend(nested);
            return;
        }

        let msg = err.to_string();
        if self.errors.iter().any(|e| e.to_string() == msg) {
            return;
        }
        self.errors.push(err);
    }

    pub fn extend(&mut self, other: Errors) {
        for err in other.errors {
            self.add(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanError> {
        self.errors.iter()
    }

    /// Folds the list into a single result: nothing, the one error, or all of them.
    pub fn into_result(mut self) -> Result<(), ScanError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(ScanError::Multiple(self)),
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "received {} errors:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  - {}", err)?;
        }
        Ok(())
    }
}

impl FromIterator<ScanError> for Errors {
    fn from_iter<I: IntoIterator<Item = ScanError>>(iter: I) -> Self {
        let mut errs = Errors::new();
        for err in iter {
            errs.add(err);
        }
        errs
    }
}

impl IntoIterator for Errors {
    type Item = ScanError;
    type IntoIter = std::vec::IntoIter<ScanError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_errors_fold_to_ok() {
        assert_eq!(Errors::new().into_result(), Ok(()));
    }

    #[test]
    fn test_single_error_is_returned_as_is() {
        let mut errs = Errors::new();
        errs.add(ScanError::Timeout(Duration::from_secs(5)));

        let err = errs.into_result().unwrap_err();
        assert_eq!(err, ScanError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.to_string(), "execution timed out after 5s");
    }

    #[test]
    fn test_multiple_errors_keep_every_entry() {
        let mut errs = Errors::new();
        errs.add(ScanError::compile("q1", "unexpected token"));
        errs.add(ScanError::not_found("asset", "//a/b"));
        errs.add(ScanError::compile("q1", "unexpected token"));

        assert_eq!(errs.len(), 2);
        let err = errs.into_result().unwrap_err();
        match &err {
            ScanError::Multiple(list) => {
                assert!(matches!(list.iter().next(), Some(ScanError::Compile { .. })));
            }
            other => panic!("expected multiple errors, got {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("unexpected token"));
        assert!(msg.contains("asset '//a/b' not found"));
    }

    #[test]
    fn test_nested_multiple_is_flattened() {
        let inner: Errors = vec![
            ScanError::Execution("a".to_string()),
            ScanError::Execution("b".to_string()),
        ]
        .into_iter()
        .collect();

        let mut outer = Errors::new();
        outer.add(ScanError::Multiple(inner));
        outer.add(ScanError::Execution("c".to_string()));
        assert_eq!(outer.len(), 3);
    }
}
