use serde::Deserialize;

use crate::Config;
use crate::shared::{PgConnectionConfig, SnapshotConfig, ValidationError};

/// Configuration of the `snapshotter` binary.
///
/// Only implements [`Deserialize`] because the source password must never be written back out.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotterConfig {
    /// Source database to snapshot.
    pub source: PgConnectionConfig,
    /// Tuning of the snapshot run.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Tables to snapshot, as `table`, `schema.table` or `schema.*` selectors. Unqualified
    /// selectors refer to the `public` schema.
    #[serde(default)]
    pub tables: Vec<String>,
}

impl SnapshotterConfig {
    /// Validates the configuration, including the shape of every table selector.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.snapshot.validate()?;

        for selector in &self.tables {
            validate_table_selector(selector)?;
        }

        Ok(())
    }
}

impl Config for SnapshotterConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["tables"];
}

fn validate_table_selector(selector: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidTableSelector(selector.to_string());

    match selector.split_once('.') {
        Some((schema, table)) => {
            if schema.is_empty() || table.is_empty() || table.contains('.') {
                return Err(invalid());
            }
        }
        None if selector.is_empty() => return Err(invalid()),
        None => {}
    }

    Ok(())
}
