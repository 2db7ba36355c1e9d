use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ConfigError;
use crate::events::{self, Event, EventPolicy, EventSink};
use crate::step::ReplaceStrategy;

/// Schema version written by [`save_config`]. Older documents are upgraded
/// by [`migrate`] on load.
pub const CURRENT_VERSION: u32 = 1;

/// Engine settings. Every field has a default, so an empty JSON object is a
/// valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema version. Absent in documents written before versioning.
    pub config_version: u32,
    /// Maximum provider operations in flight at once.
    pub parallel: usize,
    /// Capacity of the event channel.
    pub event_buffer: usize,
    pub event_policy: EventPolicy,
    /// Replacement ordering for resources that do not choose one.
    pub replace_strategy: ReplaceStrategy,
    /// Skip the confirmation prompt after a preview.
    pub auto_approve: bool,
    /// Apply without running a preview first.
    pub skip_preview: bool,
    /// Constrain the real run to the plan the preview produced.
    pub reuse_preview_plan: bool,
    /// Integrity-check every snapshot before it is saved.
    pub verify_snapshots: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_VERSION,
            parallel: 10,
            event_buffer: 256,
            event_policy: EventPolicy::Block,
            replace_strategy: ReplaceStrategy::CreateBeforeDelete,
            auto_approve: false,
            skip_preview: false,
            reuse_preview_plan: false,
            verify_snapshots: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::Invalid("parallel must be at least 1".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// An event channel with this config's capacity and overflow policy.
    pub fn event_channel(&self) -> (EventSink, mpsc::Receiver<Event>) {
        events::channel(self.event_buffer, self.event_policy)
    }
}

pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&contents)
}

/// Parse, migrate and validate a config document.
pub fn parse_config(contents: &str) -> Result<EngineConfig, ConfigError> {
    let raw: serde_json::Value = serde_json::from_str(contents)?;
    let found = raw
        .get("config_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    let found = u32::try_from(found).unwrap_or(u32::MAX);

    let config: EngineConfig = serde_json::from_value(migrate(raw, found)?)?;
    config.validate()?;
    Ok(config)
}

/// Upgrade a raw document from `found` to [`CURRENT_VERSION`], one step at
/// a time. Steps only reshape JSON; defaults fill whatever is still missing.
fn migrate(mut raw: serde_json::Value, found: u32) -> Result<serde_json::Value, ConfigError> {
    if found > CURRENT_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            found,
            supported: CURRENT_VERSION,
        });
    }

    // v0 to v1: the `delete_before_replace` flag became `replace_strategy`.
    if found < 1 {
        let obj = raw.as_object_mut().ok_or(ConfigError::NotAnObject)?;
        if let Some(flag) = obj.remove("delete_before_replace") {
            let strategy = match flag.as_bool() {
                Some(true) => ReplaceStrategy::DeleteBeforeCreate,
                _ => ReplaceStrategy::CreateBeforeDelete,
            };
            if !obj.contains_key("replace_strategy") {
                obj.insert("replace_strategy".into(), serde_json::to_value(strategy)?);
            }
        }
        obj.insert("config_version".into(), 1.into());
        tracing::info!(from = found, to = 1, "migrated engine config");
    }

    Ok(raw)
}

/// Write `config` stamped with [`CURRENT_VERSION`], replacing `path`
/// atomically.
pub fn save_config(path: &Path, config: &EngineConfig) -> Result<(), ConfigError> {
    config.validate()?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let stamped = EngineConfig {
        config_version: CURRENT_VERSION,
        ..config.clone()
    };
    let body = serde_json::to_vec_pretty(&stamped)?;

    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, body)?;
    std::fs::rename(&staging, path)?;

    tracing::info!(path = %path.display(), version = CURRENT_VERSION, "engine config saved");
    Ok(())
}
