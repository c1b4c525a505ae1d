//! Freshness predicates: checks beyond "the file exists and is non-empty".
//!
//! The built-in predicate is [`ColumnSchema`], which reads only the header row
//! of a delimited file and requires a set of column names to be present.

use std::fmt;
use std::path::Path;

/// Verdict of a freshness predicate on a readable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale(String),
}

/// A check that an artifact still matches the current configuration.
///
/// Implementations must only read. An `Err` means the content could not be
/// read at all; the probe then reports the artifact as unreadable.
pub trait FreshnessPredicate: fmt::Debug + Send + Sync {
    fn check(&self, path: &Path) -> Result<Freshness, ProbeError>;

    /// Canonical description, used in pipeline fingerprints and reports.
    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("cannot parse header of {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Required header columns of a delimited (CSV) artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    required: Vec<String>,
    delimiter: u8,
}

impl ColumnSchema {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Required columns absent from `header`, in declaration order.
    pub fn missing<'a>(&'a self, header: &csv::StringRecord) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|col| !header.iter().any(|h| h.trim() == col.as_str()))
            .map(String::as_str)
            .collect()
    }
}

impl FreshnessPredicate for ColumnSchema {
    fn check(&self, path: &Path) -> Result<Freshness, ProbeError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|source| ProbeError::Csv {
                path: path.display().to_string(),
                source,
            })?;

        let header = reader.headers().map_err(|source| ProbeError::Csv {
            path: path.display().to_string(),
            source,
        })?;

        let missing = self.missing(header);
        if missing.is_empty() {
            Ok(Freshness::Fresh)
        } else {
            Ok(Freshness::Stale(format!(
                "missing column(s): {}",
                missing.join(", ")
            )))
        }
    }

    fn describe(&self) -> String {
        format!(
            "columns[{}]{}",
            self.required.join(","),
            self.delimiter as char
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn header_without_marker_column_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        fs::write(&path, "open,close,volume\n1,2,3\n").unwrap();

        let schema = ColumnSchema::new(["vol_regime"]);
        assert_eq!(
            schema.check(&path).unwrap(),
            Freshness::Stale("missing column(s): vol_regime".into())
        );
    }

    #[test]
    fn header_with_marker_column_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        fs::write(&path, "open,close,volume,vol_regime\n1,2,3,0\n").unwrap();

        let schema = ColumnSchema::new(["vol_regime"]);
        assert_eq!(schema.check(&path).unwrap(), Freshness::Fresh);
    }

    #[test]
    fn column_match_is_structural_not_substring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        // "vol_regime_old" contains the marker as a substring but is a different column.
        fs::write(&path, "open,vol_regime_old\n1,2\n").unwrap();

        let schema = ColumnSchema::new(["vol_regime"]);
        assert!(matches!(schema.check(&path).unwrap(), Freshness::Stale(_)));
    }

    #[test]
    fn honours_custom_delimiter_and_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.tsv");
        fs::write(&path, "open\t vol_regime \tlabel\n").unwrap();

        let schema = ColumnSchema::new(["vol_regime", "label"]).with_delimiter(b'\t');
        assert_eq!(schema.check(&path).unwrap(), Freshness::Fresh);
    }

    #[test]
    fn reports_every_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        fs::write(&path, "open\n").unwrap();

        let schema = ColumnSchema::new(["vol_regime", "atr"]);
        assert_eq!(
            schema.check(&path).unwrap(),
            Freshness::Stale("missing column(s): vol_regime, atr".into())
        );
    }
}
