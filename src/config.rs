// ⚙️ Configuration - JSON file + environment overrides

use crate::assignment::EligibilityPolicy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Accepted range for `ingest.expiry_days`, one day to a century
pub const EXPIRY_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Days after ingestion a file expires when the sheet has no expiry date
    pub expiry_days: i64,
    /// Marks file numbers synthesized from a serial column
    pub file_no_prefix: String,
    pub id_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    pub eligibility: EligibilityPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub assignment: AssignmentConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            expiry_days: 365,
            file_no_prefix: "AUTO-".to_string(),
            id_prefix: "CF".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database_path: "case_files.db".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (if it exists) with environment overrides.
    /// A missing file means defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: AppConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            info!(path = %path.display(), "configuration loaded");
            config
        } else {
            info!(path = %path.display(), "no config file, using defaults");
            AppConfig::default()
        };

        if !EXPIRY_DAYS_RANGE.contains(&config.ingest.expiry_days) {
            bail!(
                "ingest.expiry_days must be between {} and {}, got {} in {}",
                EXPIRY_DAYS_RANGE.start(),
                EXPIRY_DAYS_RANGE.end(),
                config.ingest.expiry_days,
                path.display()
            );
        }

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Apply `CASEFILE_*` overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("CASEFILE_DB") {
            self.storage.database_path = db;
        }

        if let Some(bind) = lookup("CASEFILE_BIND") {
            self.server.bind_addr = bind;
        }

        if let Some(policy) = lookup("CASEFILE_ELIGIBILITY") {
            match EligibilityPolicy::parse(&policy) {
                Some(parsed) => self.assignment.eligibility = parsed,
                None => warn!(value = %policy, "ignoring unknown CASEFILE_ELIGIBILITY"),
            }
        }

        if let Some(days) = lookup("CASEFILE_EXPIRY_DAYS") {
            match days.trim().parse::<i64>() {
                Ok(parsed) if EXPIRY_DAYS_RANGE.contains(&parsed) => self.ingest.expiry_days = parsed,
                Ok(_) => warn!(value = %days, "ignoring out-of-range CASEFILE_EXPIRY_DAYS"),
                Err(_) => warn!(value = %days, "ignoring non-numeric CASEFILE_EXPIRY_DAYS"),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
