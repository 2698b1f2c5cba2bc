//! Calibration lookup by token.

use std::collections::HashMap;

use thiserror::Error;

use super::records::CalibrationRecord;

/// Raised when a calibration token has no record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("calibration not found: {0}")]
pub struct CalibrationNotFound(pub String);

/// Token-indexed calibration table, built once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    records: HashMap<String, CalibrationRecord>,
}

impl CalibrationTable {
    /// Build the table from an iterator of records. Later duplicates win.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = CalibrationRecord>,
    {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.token.clone(), record))
                .collect(),
        }
    }

    /// Resolve a calibration token.
    pub fn resolve(&self, token: &str) -> Result<&CalibrationRecord, CalibrationNotFound> {
        self.records
            .get(token)
            .ok_or_else(|| CalibrationNotFound(token.to_string()))
    }

    pub fn insert(&mut self, record: CalibrationRecord) {
        self.records.insert(record.token.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibrationRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, tx: f64) -> CalibrationRecord {
        CalibrationRecord {
            token: token.to_string(),
            sensor_token: format!("sensor-{token}"),
            translation: [tx, 0.0, 0.0],
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn test_resolve_known_token() {
        let table = CalibrationTable::from_records(vec![record("a", 1.0), record("b", 2.0)]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("b").unwrap().translation[0], 2.0);
    }

    #[test]
    fn test_resolve_unknown_token() {
        let table = CalibrationTable::from_records(vec![record("a", 1.0)]);

        let err = table.resolve("zzz").unwrap_err();
        assert_eq!(err, CalibrationNotFound("zzz".to_string()));
        assert_eq!(err.to_string(), "calibration not found: zzz");
    }

    #[test]
    fn test_duplicate_token_last_wins() {
        let table = CalibrationTable::from_records(vec![record("a", 1.0), record("a", 5.0)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve("a").unwrap().translation[0], 5.0);
    }
}
