use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::debug;

use crate::vm::VmSettings;

/// Parse a JSON settings document.
///
/// The document must be an object; every field is optional and a missing or
/// zero field falls back to the built-in default:
///
/// ```json
/// { "stack_rows": 20, "call_rows": 20, "output_words": 40, "instructions_per_cycle": 2000 }
/// ```
pub fn parse_settings(json: &str) -> Result<VmSettings> {
    let root: Value = serde_json::from_str(json).context("settings are not valid JSON")?;
    if !root.is_object() {
        return Err(anyhow!("settings must be a JSON object"));
    }
    let settings: VmSettings =
        serde_json::from_value(root).context("settings have an unexpected shape")?;
    debug!(?settings, "settings parsed");
    Ok(settings)
}

pub fn load_settings(path: &Path) -> Result<VmSettings> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Reading {}", path.display()))?;
    parse_settings(&json).with_context(|| format!("Parsing {}", path.display()))
}
