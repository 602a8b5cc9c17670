use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deadline::Deadline;
use crate::error::MigrationError;

pub const DB_PATH_ENV: &str = "INVOICE_MIGRATION_DB";
const DEFAULT_LEDGER_DB_RELATIVE_PATH: &str = "data/ledger/invoice_migration.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub db_path: PathBuf,
    /// Offset applied to `YYYY-MM-DD` cells before they are stored as UTC.
    pub timezone_offset_hours: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_LEDGER_DB_RELATIVE_PATH),
            timezone_offset_hours: 0,
            deadline_secs: None,
        }
    }
}

impl MigrationConfig {
    /// Reads the JSON config at `path` when given, falling back to defaults,
    /// then applies the `INVOICE_MIGRATION_DB` override.
    pub fn load(path: Option<&Path>) -> Result<Self, MigrationError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let data = fs::read_to_string(path)?;
                serde_json::from_str::<MigrationConfig>(&data)?
            }
            Some(path) => {
                return Err(MigrationError::Config(format!(
                    "config file not found: {}",
                    path.to_string_lossy()
                )))
            }
            None => MigrationConfig::default(),
        };
        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            let db_path = db_path.trim();
            if !db_path.is_empty() {
                config.db_path = PathBuf::from(db_path);
            }
        }
        config.timezone()?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<FixedOffset, MigrationError> {
        self.timezone_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                MigrationError::Config(format!(
                    "timezone_offset_hours out of range: {}",
                    self.timezone_offset_hours
                ))
            })
    }

    pub fn deadline(&self) -> Deadline {
        match self.deadline_secs {
            Some(secs) => Deadline::after(Duration::from_secs(secs)),
            None => Deadline::none(),
        }
    }
}

/// Per-call settings shared by the importer and the reconciliation job.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub timezone: FixedOffset,
    pub deadline: Deadline,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            timezone: Utc.fix(),
            deadline: Deadline::none(),
        }
    }
}

impl RunContext {
    pub fn from_config(config: &MigrationConfig) -> Result<Self, MigrationError> {
        Ok(Self {
            timezone: config.timezone()?,
            deadline: config.deadline(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn missing_path_uses_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.timezone_offset_hours, 0);
        assert!(config.deadline_secs.is_none());
        assert!(config.timezone().is_ok());
    }

    #[test]
    fn json_config_is_read_with_partial_fields() {
        let path = std::env::temp_dir().join(format!(
            "invoice_migration_config_{}_{}.json",
            std::process::id(),
            Uuid::new_v4()
        ));
        fs::write(&path, r#"{"timezone_offset_hours": 9, "deadline_secs": 30}"#)
            .expect("write temp config");

        let config = MigrationConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.timezone_offset_hours, 9);
        assert_eq!(config.deadline_secs, Some(30));
        assert_eq!(
            config.timezone().expect("valid offset").local_minus_utc(),
            9 * 3600
        );

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let config = MigrationConfig {
            timezone_offset_hours: 30,
            ..MigrationConfig::default()
        };
        assert!(matches!(config.timezone(), Err(MigrationError::Config(_))));
    }
}
