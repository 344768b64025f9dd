use crate::errors::{StackError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transaction: TransactionSettings,
    pub merge: MergeSettings,
    pub lock: LockSettings,
}

/// What a transaction does when a push conflicts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Publish the stack up to and including the conflicting patch
    #[default]
    PublishPartial,
    /// Leave the repository exactly as it was before the transaction
    Abort,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "publish_partial" | "publish-partial" => Ok(ConflictPolicy::PublishPartial),
            "abort" => Ok(ConflictPolicy::Abort),
            _ => Err(StackError::config(format!(
                "Invalid conflict policy: {s}. Valid options: publish_partial, abort"
            ))),
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::PublishPartial => write!(f, "publish_partial"),
            ConflictPolicy::Abort => write!(f, "abort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    pub conflict_policy: ConflictPolicy,
}

/// Settings specific to pushing patches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Try applying the patch diff directly before falling back to a full merge
    pub direct_apply: bool,
    /// Track renames during the three-way merge
    pub find_renames: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// How long a second writer waits for the stack lock
    pub timeout_ms: u64,
    /// Age after which a leftover lock file is considered abandoned
    pub stale_after_secs: u64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::PublishPartial,
        }
    }
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            direct_apply: true,
            find_renames: true,
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            stale_after_secs: 600,
        }
    }
}

impl Settings {
    /// Load settings from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::load_layered(&[path])
    }

    /// Load settings from several files, later files overriding individual keys of earlier ones.
    /// Missing files are skipped.
    pub fn load_layered<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut merged = serde_json::Value::Object(Default::default());

        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }

            let content = fs::read_to_string(path)
                .map_err(|e| StackError::config(format!("Failed to read config file: {e}")))?;
            let layer: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                StackError::config(format!(
                    "Failed to parse config file {}: {e}",
                    path.display()
                ))
            })?;

            tracing::debug!("Loaded config layer {}", path.display());
            overlay(&mut merged, layer);
        }

        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| StackError::config(format!("Invalid configuration: {e}")))?;
        settings.validate()?;

        Ok(settings)
    }

    /// Save settings to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| StackError::config(format!("Failed to serialize config: {e}")))?;

        crate::utils::atomic_file::write_string(path, &content)
    }

    /// Update a configuration value by key
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() != 2 {
            return Err(StackError::config(format!(
                "Invalid config key format: {key}"
            )));
        }

        match (parts[0], parts[1]) {
            ("transaction", "conflict_policy") => {
                self.transaction.conflict_policy = value.parse()?;
            }
            ("merge", "direct_apply") => self.merge.direct_apply = parse_bool(value)?,
            ("merge", "find_renames") => self.merge.find_renames = parse_bool(value)?,
            ("lock", "timeout_ms") => {
                self.lock.timeout_ms = value
                    .parse()
                    .map_err(|_| StackError::config(format!("Invalid number: {value}")))?;
            }
            ("lock", "stale_after_secs") => {
                self.lock.stale_after_secs = value
                    .parse()
                    .map_err(|_| StackError::config(format!("Invalid number: {value}")))?;
            }
            _ => return Err(StackError::config(format!("Unknown config key: {key}"))),
        }

        self.validate()
    }

    /// Get a configuration value by key
    pub fn get_value(&self, key: &str) -> Result<String> {
        let value = match key {
            "transaction.conflict_policy" => self.transaction.conflict_policy.to_string(),
            "merge.direct_apply" => self.merge.direct_apply.to_string(),
            "merge.find_renames" => self.merge.find_renames.to_string(),
            "lock.timeout_ms" => self.lock.timeout_ms.to_string(),
            "lock.stale_after_secs" => self.lock.stale_after_secs.to_string(),
            _ => return Err(StackError::config(format!("Unknown config key: {key}"))),
        };

        Ok(value)
    }

    /// All dotted keys with their current values
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        [
            "transaction.conflict_policy",
            "merge.direct_apply",
            "merge.find_renames",
            "lock.timeout_ms",
            "lock.stale_after_secs",
        ]
        .into_iter()
        .filter_map(|key| self.get_value(key).ok().map(|value| (key, value)))
        .collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.lock.timeout_ms == 0 {
            return Err(StackError::config(
                "lock.timeout_ms must be greater than zero",
            ));
        }

        if self.lock.stale_after_secs * 1000 < self.lock.timeout_ms {
            return Err(StackError::config(
                "lock.stale_after_secs must cover at least lock.timeout_ms",
            ));
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse()
        .map_err(|_| StackError::config(format!("Invalid boolean value: {value}")))
}

/// Recursively merge `layer` into `base`; objects merge per key, everything else is replaced.
fn overlay(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                overlay(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, layer) => *base = layer,
    }
}
