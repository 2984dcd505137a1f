//! In-memory tabular data handed over by the presentation layer

use crate::{EpiError, RawValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One row: column name → raw cell value
pub type Record = HashMap<String, RawValue>;

static NULL: RawValue = RawValue::Null;

/// Ordered sequence of records
///
/// Row order carries no meaning except for the positional trimming
/// scenarios of the sensitivity analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Build from a header row and text rows (short rows are padded with empty cells)
    pub fn from_rows(headers: &[&str], rows: &[Vec<&str>]) -> Self {
        let records = rows
            .iter()
            .map(|row| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.to_string(), RawValue::from(row.get(i).copied().unwrap_or(""))))
                    .collect()
            })
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Cell value; absent cells read as null
    pub fn value<'a>(record: &'a Record, column: &str) -> &'a RawValue {
        record.get(column).unwrap_or(&NULL)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.records.iter().any(|r| r.contains_key(column))
    }

    /// All column names, sorted
    pub fn columns(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.records.iter().flat_map(|r| r.keys()).collect();
        names.into_iter().cloned().collect()
    }

    pub fn column(&self, column: &str) -> Vec<&RawValue> {
        self.records.iter().map(|r| Self::value(r, column)).collect()
    }

    /// Distinct non-missing labels of a column, in lexicographic order
    pub fn levels(&self, column: &str) -> Vec<String> {
        let levels: BTreeSet<String> = self
            .records
            .iter()
            .filter_map(|r| Self::value(r, column).label())
            .collect();
        levels.into_iter().collect()
    }

    /// Records whose label in `column` equals `level`
    pub fn subset(&self, column: &str, level: &str) -> Dataset {
        self.filter(|r| Self::value(r, column).label().as_deref() == Some(level))
    }

    pub fn filter<F: Fn(&Record) -> bool>(&self, keep: F) -> Dataset {
        Dataset {
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// True when no cell of the record is missing
    pub fn is_complete(record: &Record) -> bool {
        record.values().all(|v| !v.is_missing())
    }

    /// Reject empty selections, unknown columns and one column in two roles.
    ///
    /// `roles` pairs a role name ("outcome", "exposure", ...) with the
    /// selected column.
    pub fn validate_roles(&self, roles: &[(&str, &str)]) -> Result<(), EpiError> {
        for (role, column) in roles {
            if column.trim().is_empty() {
                return Err(EpiError::missing_column(role));
            }
        }
        for (i, (role_a, col_a)) in roles.iter().enumerate() {
            for (role_b, col_b) in &roles[i + 1..] {
                if col_a == col_b {
                    return Err(EpiError::same_column(role_a, role_b, col_a));
                }
            }
        }
        if !self.is_empty() {
            for (_, column) in roles {
                if !self.has_column(column) {
                    return Err(EpiError::unknown_column(column));
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<Record>> for Dataset {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    fn sample() -> Dataset {
        Dataset::from_rows(
            &["exposed", "died", "sex"],
            &[
                vec!["1", "0", "M"],
                vec!["0", "1", "F"],
                vec!["1", "1", ""],
                vec!["0", "0", "F"],
            ],
        )
    }

    #[test]
    fn test_levels_sorted_and_skip_missing() {
        assert_eq!(sample().levels("sex"), vec!["F".to_string(), "M".to_string()]);
    }

    #[test]
    fn test_subset_and_complete() {
        let ds = sample();
        assert_eq!(ds.subset("sex", "F").len(), 2);
        let complete = ds.filter(Dataset::is_complete);
        assert_eq!(complete.len(), 3);
    }

    #[test]
    fn test_absent_cell_is_null() {
        let ds = Dataset::from_rows(&["a", "b"], &[vec!["1"]]);
        assert!(Dataset::value(&ds.records()[0], "b").is_missing());
        assert!(Dataset::value(&ds.records()[0], "zzz").is_missing());
    }

    #[test]
    fn test_validate_roles() {
        let ds = sample();
        assert!(ds.validate_roles(&[("outcome", "died"), ("exposure", "exposed")]).is_ok());

        let err = ds.validate_roles(&[("outcome", "died"), ("exposure", "died")]).unwrap_err();
        assert_eq!(err.code, codes::VALIDATION_ERROR);

        let err = ds.validate_roles(&[("outcome", ""), ("exposure", "exposed")]).unwrap_err();
        assert!(err.message.contains("outcome"));

        let err = ds.validate_roles(&[("outcome", "dead"), ("exposure", "exposed")]).unwrap_err();
        assert!(err.message.contains("dead"));
    }

    #[test]
    fn test_empty_dataset_skips_column_check() {
        let ds = Dataset::default();
        assert!(ds.validate_roles(&[("outcome", "y"), ("exposure", "x")]).is_ok());
    }

    #[test]
    fn test_json_round_shape() {
        let ds: Dataset = serde_json::from_str(r#"[{"x": 1, "y": "yes"}, {"x": 0, "y": null}]"#).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.columns(), vec!["x".to_string(), "y".to_string()]);
    }
}
