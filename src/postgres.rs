//! PostgreSQL implementation of the [`Connector`] seam, backed by an sqlx pool.

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row as _, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::{debug, info};

use crate::connector::{Connection, Connector, FieldValue, Row};
use crate::error::ConnectorError;
use crate::targets::TargetConfig;

const APPLICATION_NAME: &str = "pg-custom-exporter";

/// Pooled connector for one database target.
///
/// The pool is created lazily so the exporter can start while a target is
/// down; the first scrape surfaces the failure as `pg_scrape_success 0`.
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    pub fn from_config(cfg: &TargetConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database)
            .application_name(APPLICATION_NAME);

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .idle_timeout(Some(Duration::from_millis(cfg.idle_timeout_ms)))
            .connect_lazy_with(options);

        debug!(
            target_name = %cfg.name,
            host = %cfg.host,
            port = cfg.port,
            database = %cfg.database,
            "PostgreSQL pool configured"
        );

        Self { pool }
    }
}

impl Connector for PgConnector {
    fn acquire(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, ConnectorError>> {
        Box::pin(async move {
            let conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| ConnectorError::Acquire(e.to_string()))?;
            Ok(Box::new(PgConnection(conn)) as Box<dyn Connection>)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pool.close().await;
            info!("Database pool closed");
        })
    }
}

struct PgConnection(PoolConnection<Postgres>);

impl Connection for PgConnection {
    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, ConnectorError>> {
        Box::pin(async move {
            // Simple protocol: every value comes back in its text form.
            let rows = sqlx::Executor::fetch_all(&mut *self.0, sqlx::raw_sql(sql))
                .await
                .map_err(|e| ConnectorError::Query(e.to_string()))?;
            rows.iter().map(convert_row).collect()
        })
    }
}

fn decode_error(e: sqlx::Error) -> ConnectorError {
    ConnectorError::Decode(e.to_string())
}

/// Converts a driver row into the generic column-ordered [`Row`].
fn convert_row(row: &PgRow) -> Result<Row, ConnectorError> {
    let mut out = Row::new();

    for column in row.columns() {
        let name = column.name();
        let raw = row.try_get_raw(column.ordinal()).map_err(decode_error)?;

        if raw.is_null() {
            out.push(name, FieldValue::Null);
            continue;
        }

        let text = raw
            .as_str()
            .map_err(|e| ConnectorError::Decode(format!("column '{name}': {e}")))?;
        out.push(name, classify_text(column.type_info().name(), text));
    }

    Ok(out)
}

/// Maps a text-format value to a [`FieldValue`] by its PostgreSQL type name.
///
/// Integer, floating point and NUMERIC columns are numbers, BOOL is a
/// boolean. Everything else (inet, uuid, timestamps, enums, ...) keeps the
/// server's text rendering, as does a numeric value that does not parse.
pub(crate) fn classify_text(type_name: &str, text: &str) -> FieldValue {
    let parsed = match type_name {
        "INT2" | "INT4" | "INT8" | "OID" => text.parse::<i64>().ok().map(FieldValue::Int),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => text.parse::<f64>().ok().map(FieldValue::Float),
        "BOOL" => match text {
            "t" => Some(FieldValue::Bool(true)),
            "f" => Some(FieldValue::Bool(false)),
            _ => None,
        },
        _ => None,
    };

    parsed.unwrap_or_else(|| FieldValue::Text(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_types_are_ints() {
        assert_eq!(classify_text("INT2", "-3"), FieldValue::Int(-3));
        assert_eq!(classify_text("INT8", "9007199254740993"), FieldValue::Int(9007199254740993));
        assert_eq!(classify_text("OID", "16384"), FieldValue::Int(16384));
    }

    #[test]
    fn test_numeric_aggregates_are_numbers() {
        assert_eq!(classify_text("NUMERIC", "12345.678"), FieldValue::Float(12345.678));
        assert_eq!(classify_text("NUMERIC", "42"), FieldValue::Float(42.0));
        assert_eq!(classify_text("FLOAT8", "0.25"), FieldValue::Float(0.25));
        assert!(classify_text("NUMERIC", "NaN").is_numeric());
        assert_eq!(
            classify_text("FLOAT8", "-Infinity").as_number(),
            Some(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn test_other_types_keep_text_form() {
        let cases = [
            ("INET", "10.0.0.7"),
            ("UUID", "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"),
            ("TIMESTAMPTZ", "2024-05-01 12:00:00+00"),
            ("DATE", "2024-05-01"),
            ("CHAR", "r"),
            ("TEXT", "mail"),
            ("my_enum", "pending"),
        ];
        for (type_name, text) in cases {
            assert_eq!(classify_text(type_name, text), FieldValue::Text(text.to_string()));
        }
    }

    #[test]
    fn test_distinct_addresses_stay_distinct() {
        let a = classify_text("INET", "10.0.0.1").to_string();
        let b = classify_text("INET", "10.0.0.2").to_string();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_bool_and_unparsable_numbers() {
        assert_eq!(classify_text("BOOL", "t"), FieldValue::Bool(true));
        assert_eq!(classify_text("BOOL", "f"), FieldValue::Bool(false));
        assert_eq!(classify_text("NUMERIC", "n/a"), FieldValue::Text("n/a".to_string()));
        assert!(!classify_text("MONEY", "$1.00").is_numeric());
    }
}
