//! Custom query definitions.
//!
//! The queries file is an ordered list of `{name, help, type, labels, query,
//! valueField}` records. A broken file is fatal, a broken entry is not: it is
//! skipped with a warning and the remaining definitions load normally. Each
//! accepted definition is bound to exactly one instrument for the lifetime
//! of the process.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::instruments::{InstrumentRegistry, InstrumentSpec, MetricInstrument, MetricKind};
use crate::loader::{parse_list, read_regular_file, FileFormat};

/// Validated custom metric definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub name: String,
    pub help: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Declared label columns, in declaration order, without duplicates.
    pub labels: Vec<String>,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_field: Option<String>,
}

impl QueryDefinition {
    pub fn is_label(&self, column: &str) -> bool {
        self.labels.iter().any(|l| l == column)
    }

    pub fn instrument_spec(&self) -> InstrumentSpec {
        InstrumentSpec {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: self.kind,
            label_keys: self.labels.clone(),
        }
    }
}

/// A definition together with the instrument it writes to.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub definition: QueryDefinition,
    pub instrument: MetricInstrument,
}

fn required_string(entry: &Value, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Validates one raw entry. Returns `None` (after logging) when it must be
/// skipped.
fn parse_entry(index: usize, entry: &Value) -> Option<QueryDefinition> {
    if !entry.is_object() {
        warn!("[SKIP] Query entry #{} is not an object", index);
        return None;
    }

    let (name, help, query) = match (
        required_string(entry, "name"),
        required_string(entry, "help"),
        required_string(entry, "query"),
    ) {
        (Some(name), Some(help), Some(query)) => (name, help, query),
        _ => {
            warn!("[SKIP] Query entry #{} is missing required fields", index);
            return None;
        }
    };

    let kind = match entry.get("type") {
        None | Some(Value::Null) => MetricKind::Gauge,
        Some(Value::String(t)) if t == "gauge" => MetricKind::Gauge,
        Some(Value::String(t)) if t == "counter" => MetricKind::Counter,
        Some(other) => {
            warn!("[SKIP] Unsupported metric type {} for {}", other, name);
            return None;
        }
    };

    let mut labels: Vec<String> = Vec::new();
    match entry.get("labels") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                match item.as_str() {
                    Some(label) => {
                        if !labels.iter().any(|l| l == label) {
                            labels.push(label.to_string());
                        }
                    }
                    None => {
                        warn!("[SKIP] Query {} has a non-string label: {}", name, item);
                        return None;
                    }
                }
            }
        }
        Some(other) => {
            warn!("[SKIP] Query {} labels must be a list, got {}", name, other);
            return None;
        }
    }

    let value_field = match entry.get("valueField").or_else(|| entry.get("value_field")) {
        None | Some(Value::Null) => None,
        Some(Value::String(f)) if !f.is_empty() => Some(f.clone()),
        Some(other) => {
            warn!("[SKIP] Query {} has an invalid valueField: {}", name, other);
            return None;
        }
    };

    Some(QueryDefinition {
        name,
        help,
        kind,
        labels,
        query,
        value_field,
    })
}

/// Parses the queries document, skipping malformed entries.
pub fn parse_query_definitions(
    content: &str,
    format: FileFormat,
) -> Result<Vec<QueryDefinition>, ConfigError> {
    let entries = parse_list(content, format, "queries", "queries")?;
    Ok(entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| parse_entry(i, entry))
        .collect())
}

/// Loads query definitions. No path means no custom metrics.
pub fn load_query_definitions(path: Option<&Path>) -> Result<Vec<QueryDefinition>, ConfigError> {
    let Some(path) = path else {
        warn!("No queries file specified; no custom metrics loaded");
        return Ok(Vec::new());
    };

    let content = read_regular_file(path)?;
    let definitions = parse_query_definitions(&content, FileFormat::from_path(path))?;
    info!(
        "Parsed {} query definition(s) from: {}",
        definitions.len(),
        path.display()
    );
    Ok(definitions)
}

/// Registers an instrument per definition. Collisions and invalid names are
/// skipped with a warning; earlier definitions win.
pub fn bind_query_definitions(
    registry: &InstrumentRegistry,
    definitions: Vec<QueryDefinition>,
) -> Vec<BoundQuery> {
    let mut bound = Vec::with_capacity(definitions.len());

    for definition in definitions {
        match registry.register(&definition.instrument_spec()) {
            Ok(instrument) => bound.push(BoundQuery {
                definition,
                instrument,
            }),
            Err(e) => {
                warn!("[SKIP] Failed to register metric {}: {}", definition.name, e);
            }
        }
    }

    info!("Loaded {} custom metrics", bound.len());
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_applied() {
        let def = parse_entry(0, &json!({"name": "m", "help": "h", "query": "SELECT 1"})).unwrap();
        assert_eq!(def.kind, MetricKind::Gauge);
        assert!(def.labels.is_empty());
        assert_eq!(def.value_field, None);
    }

    #[test]
    fn test_missing_required_fields_skipped() {
        assert!(parse_entry(0, &json!({"name": "m", "query": "SELECT 1"})).is_none());
        assert!(parse_entry(0, &json!({"name": "", "help": "h", "query": "SELECT 1"})).is_none());
        assert!(parse_entry(0, &json!({"name": "m", "help": "h"})).is_none());
        assert!(parse_entry(0, &json!("SELECT 1")).is_none());
    }

    #[test]
    fn test_unsupported_type_skipped() {
        let entry = json!({"name": "m", "help": "h", "query": "q", "type": "histogram"});
        assert!(parse_entry(0, &entry).is_none());
    }

    #[test]
    fn test_labels_deduplicated_in_order() {
        let entry = json!({"name": "m", "help": "h", "query": "q", "labels": ["b", "a", "b"]});
        let def = parse_entry(0, &entry).unwrap();
        assert_eq!(def.labels, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_value_field_aliases() {
        let camel = json!({"name": "m", "help": "h", "query": "q", "valueField": "total"});
        let snake = json!({"name": "m", "help": "h", "query": "q", "value_field": "total"});
        assert_eq!(parse_entry(0, &camel).unwrap().value_field.as_deref(), Some("total"));
        assert_eq!(parse_entry(0, &snake).unwrap().value_field.as_deref(), Some("total"));
    }

    #[test]
    fn test_serializes_with_camel_case_value_field() {
        let def = parse_entry(
            0,
            &json!({"name": "m", "help": "h", "query": "q", "type": "counter", "valueField": "v"}),
        )
        .unwrap();
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "counter");
        assert_eq!(value["valueField"], "v");
    }
}
