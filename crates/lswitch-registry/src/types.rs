//! Type definitions for program configs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, RegistryResult};

/// Longest accepted program name, in bytes.
pub const MAX_PROGRAM_NAME_LEN: usize = 128;

/// Lifecycle state of a registered program config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    /// Staged, not yet acknowledged by the runtime.
    Pending,
    /// Linked into the running pipeline.
    Active,
    /// Being unlinked from the running pipeline.
    Removing,
}

impl ConfigState {
    /// Returns the state name as reported to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigState::Pending => "pending",
            ConfigState::Active => "active",
            ConfigState::Removing => "removing",
        }
    }
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that a program name can be used as a registry key.
///
/// Names are split on whitespace by the operator shell, so whitespace and
/// control characters are refused along with empty or oversized names.
pub fn validate_program_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() {
        return Err(RegistryError::invalid_input(
            "program_name",
            "must not be empty",
        ));
    }
    if name.len() > MAX_PROGRAM_NAME_LEN {
        return Err(RegistryError::invalid_input(
            "program_name",
            format!("longer than {} bytes", MAX_PROGRAM_NAME_LEN),
        ));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RegistryError::invalid_input(
            "program_name",
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

/// A structurally validated program config document.
///
/// The internal schema belongs to the data-plane runtime; this type only
/// guarantees the text is a well-formed JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramPayload {
    raw: String,
    document: Value,
}

impl ProgramPayload {
    /// Parses and validates a config string.
    pub fn parse(config_str: &str) -> RegistryResult<Self> {
        let document: Value = serde_json::from_str(config_str)
            .map_err(|e| RegistryError::invalid_input("config_str", e.to_string()))?;

        if !document.is_object() {
            return Err(RegistryError::invalid_input(
                "config_str",
                "top-level value must be a JSON object",
            ));
        }

        Ok(Self {
            raw: config_str.to_string(),
            document,
        })
    }

    /// Returns the text exactly as submitted.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Counts the top-level object groups the runtime links on.
    pub fn summary(&self) -> PayloadSummary {
        let count = |key: &str| {
            self.document
                .get(key)
                .and_then(Value::as_array)
                .map_or(0, Vec::len)
        };

        PayloadSummary {
            header_types: count("header_types"),
            headers: count("headers"),
            parsers: count("parsers"),
            pipelines: count("pipelines"),
            size_bytes: self.raw.len(),
        }
    }
}

/// Object counts of a program payload, for logs and `show`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSummary {
    pub header_types: usize,
    pub headers: usize,
    pub parsers: usize,
    pub pipelines: usize,
    pub size_bytes: usize,
}

/// Read-only snapshot of a registered program.
///
/// `payload` and `version` describe the config currently enforced by the
/// runtime; while nothing has been acknowledged yet they describe the staged
/// config instead and `state` is `Pending`.
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Program name (registry key).
    pub name: String,
    /// Config document.
    pub payload: Arc<ProgramPayload>,
    /// Version of `payload`.
    pub version: u64,
    /// Lifecycle state.
    pub state: ConfigState,
    /// Version of a replacement waiting to be linked, if any.
    pub staged_version: Option<u64>,
}

/// Serializable view of a [`ProgramConfig`] for RPC responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramInfo {
    pub name: String,
    pub version: u64,
    pub state: ConfigState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_version: Option<u64>,
    pub summary: PayloadSummary,
}

impl From<&ProgramConfig> for ProgramInfo {
    fn from(config: &ProgramConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version,
            state: config.state,
            staged_version: config.staged_version,
            summary: config.payload.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_program_name() {
        assert!(validate_program_name("router").is_ok());
        assert!(validate_program_name("l2_switch.v2").is_ok());

        assert!(validate_program_name("").is_err());
        assert!(validate_program_name("two words").is_err());
        assert!(validate_program_name("tab\there").is_err());
        assert!(validate_program_name(&"x".repeat(MAX_PROGRAM_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_payload_parse_object() {
        let payload = ProgramPayload::parse(r#"{"header_types": []}"#).unwrap();
        assert_eq!(payload.raw(), r#"{"header_types": []}"#);
        assert!(payload.document().is_object());
    }

    #[test]
    fn test_payload_rejects_malformed() {
        let err = ProgramPayload::parse("not-json").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { ref field, .. } if field == "config_str"));

        assert!(ProgramPayload::parse("").is_err());
        assert!(ProgramPayload::parse(r#"{"a": 1"#).is_err());
    }

    #[test]
    fn test_payload_rejects_non_object() {
        assert!(ProgramPayload::parse("[1, 2, 3]").is_err());
        assert!(ProgramPayload::parse("42").is_err());
        assert!(ProgramPayload::parse(r#""text""#).is_err());
    }

    #[test]
    fn test_payload_summary() {
        let payload = ProgramPayload::parse(
            r#"{
                "header_types": [{"name": "ethernet_t"}, {"name": "ipv4_t"}],
                "headers": [{"name": "ethernet"}],
                "parsers": [{"name": "parser"}],
                "pipelines": "not-an-array"
            }"#,
        )
        .unwrap();

        let summary = payload.summary();
        assert_eq!(summary.header_types, 2);
        assert_eq!(summary.headers, 1);
        assert_eq!(summary.parsers, 1);
        assert_eq!(summary.pipelines, 0);
    }

    #[test]
    fn test_config_state_display() {
        assert_eq!(ConfigState::Pending.to_string(), "pending");
        assert_eq!(ConfigState::Active.as_str(), "active");
        assert_eq!(ConfigState::Removing.as_str(), "removing");
    }
}
