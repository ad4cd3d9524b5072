//! Shared file loading for the targets and queries documents.
//!
//! Both files are lists of records. The format is picked from the file
//! extension: `.json`, `.toml`, anything else is read as YAML (YAML is a
//! superset of JSON, so a `queries.json` written for older deployments still
//! loads under any name).

use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => FileFormat::Json,
            Some("toml") => FileFormat::Toml,
            _ => FileFormat::Yaml,
        }
    }
}

/// Reads a file that must exist and be a regular file.
pub fn read_regular_file(path: &Path) -> Result<String, ConfigError> {
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    if !meta.is_file() {
        return Err(ConfigError::NotAFile(path.to_path_buf()));
    }

    fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parses a document into its list of entries.
///
/// TOML has no top-level arrays, so a TOML document must hold the list under
/// a single key (e.g. `[[targets]]` or `[[queries]]`); `list_key` names it.
pub fn parse_list(
    content: &str,
    format: FileFormat,
    what: &str,
    list_key: &str,
) -> Result<Vec<serde_json::Value>, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        what: what.to_string(),
        message,
    };

    let doc: serde_json::Value = match format {
        FileFormat::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        FileFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        FileFormat::Toml => {
            let table: serde_json::Value =
                toml::from_str(content).map_err(|e| parse_err(e.to_string()))?;
            table
                .get(list_key)
                .cloned()
                .unwrap_or(serde_json::Value::Null)
        }
    };

    match doc {
        serde_json::Value::Array(entries) => Ok(entries),
        _ => Err(ConfigError::NotAList(what.to_string())),
    }
}
