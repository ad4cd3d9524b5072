//! Dynamic extraction: turns the rows of a custom query into labeled samples.
//!
//! Per row the columns are scanned once, in the order the database returned
//! them:
//!
//! - a declared label column is copied into the label set (stringified);
//! - otherwise, while no value column is known and no value has been seen,
//!   the first numeric column becomes the inferred value column;
//! - otherwise a column named like the value column (explicit or inferred)
//!   replaces the value.
//!
//! Everything else is ignored. A row without a value yields no sample.

use ahash::AHashMap as HashMap;
use tracing::{debug, warn};

use crate::connector::{Connection, Row};
use crate::instruments::DB_LABEL;
use crate::queries::{BoundQuery, QueryDefinition};

/// One labeled value ready to be applied to an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: HashMap<String, String>,
    pub value: f64,
    /// Column the value was read from.
    pub value_field: String,
}

/// Applies the inference scan to a single row.
pub fn extract_row(definition: &QueryDefinition, target: &str, row: &Row) -> Option<Sample> {
    let mut labels = HashMap::new();
    labels.insert(DB_LABEL.to_string(), target.to_string());

    let mut value_field: Option<&str> = definition.value_field.as_deref();
    let mut value: Option<f64> = None;

    for (column, field) in row.iter() {
        if definition.is_label(column) {
            labels.insert(column.to_string(), field.to_string());
        } else if value_field.is_none() && value.is_none() && field.is_numeric() {
            value_field = Some(column);
            value = field.as_number();
        } else if value_field == Some(column) {
            // Re-entering the inferred column overwrites the value. Kept as
            // observed behaviour for rows with repeated column names.
            value = field.as_number();
        }
    }

    let value = value?;
    Some(Sample {
        labels,
        value,
        value_field: value_field.unwrap_or_default().to_string(),
    })
}

/// Extracts samples from every row, logging rows that carry no value.
pub fn extract_samples(definition: &QueryDefinition, target: &str, rows: &[Row]) -> Vec<Sample> {
    rows.iter()
        .filter_map(|row| {
            let sample = extract_row(definition, target, row);
            if sample.is_none() {
                warn!(
                    metric = %definition.name,
                    db = %target,
                    "[CUSTOM] No numeric value found in row: {:?}",
                    row
                );
            }
            sample
        })
        .collect()
}

/// Writes samples into the bound instrument. Returns how many were applied.
pub fn apply_samples(bound: &BoundQuery, samples: &[Sample]) -> usize {
    let mut applied = 0;
    for sample in samples {
        match bound.instrument.apply(&sample.labels, sample.value) {
            Ok(()) => {
                applied += 1;
                debug!(
                    metric = %bound.definition.name,
                    "[CUSTOM] Set {:?} = {} (from \"{}\")",
                    sample.labels,
                    sample.value,
                    sample.value_field
                );
            }
            Err(e) => {
                warn!(metric = %bound.definition.name, "[CUSTOM] Sample rejected: {}", e);
            }
        }
    }
    applied
}

/// Result of running all custom queries for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomScrapeSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub samples: usize,
}

/// Runs every custom query on `conn` in definition order.
///
/// Each definition is isolated: a failing query is logged and contributes no
/// samples, and never fails the target or the remaining definitions.
pub async fn collect_custom_metrics(
    conn: &mut dyn Connection,
    target: &str,
    queries: &[BoundQuery],
) -> CustomScrapeSummary {
    let mut summary = CustomScrapeSummary::default();

    for bound in queries {
        match conn.query(&bound.definition.query).await {
            Ok(rows) => {
                let samples = extract_samples(&bound.definition, target, &rows);
                summary.samples += apply_samples(bound, &samples);
                summary.succeeded += 1;
            }
            Err(e) => {
                summary.failed += 1;
                warn!(
                    metric = %bound.definition.name,
                    db = %target,
                    "[CUSTOM] Failed to run query: {}",
                    e
                );
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::MetricKind;

    fn definition(labels: &[&str], value_field: Option<&str>) -> QueryDefinition {
        QueryDefinition {
            name: "test_metric".to_string(),
            help: "test".to_string(),
            kind: MetricKind::Gauge,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            query: "SELECT 1".to_string(),
            value_field: value_field.map(str::to_string),
        }
    }

    #[test]
    fn test_first_numeric_column_wins() {
        let def = definition(&[], None);
        let row = Row::new().with("a", 1i64).with("b", 2i64);
        let sample = extract_row(&def, "main", &row).unwrap();
        assert_eq!(sample.value, 1.0);
        assert_eq!(sample.value_field, "a");
    }

    #[test]
    fn test_label_column_never_becomes_value() {
        let def = definition(&["shard"], None);
        let row = Row::new().with("shard", 3i64).with("size", 10i64);
        let sample = extract_row(&def, "main", &row).unwrap();
        assert_eq!(sample.value, 10.0);
        assert_eq!(sample.labels.get("shard").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_explicit_value_field_not_numeric() {
        let def = definition(&[], Some("total"));
        let row = Row::new().with("total", "n/a").with("other", 5i64);
        assert!(extract_row(&def, "main", &row).is_none());
    }

    #[test]
    fn test_repeated_inferred_column_overwrites() {
        let def = definition(&[], None);
        let row = Row::new().with("v", 1i64).with("x", 9i64).with("v", 4i64);
        let sample = extract_row(&def, "main", &row).unwrap();
        assert_eq!(sample.value, 4.0);
    }

    #[test]
    fn test_missing_label_column_is_absent() {
        let def = definition(&["region"], None);
        let row = Row::new().with("count", 1i64);
        let sample = extract_row(&def, "main", &row).unwrap();
        assert!(!sample.labels.contains_key("region"));
        assert_eq!(sample.labels.get("db").map(String::as_str), Some("main"));
    }
}
