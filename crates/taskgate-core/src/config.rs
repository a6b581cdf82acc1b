//! Gateway configuration.
//!
//! All sections have defaults, so an empty YAML document is a valid config:
//!
//! ```yaml
//! engine:
//!   defaultMaxRetries: 3
//!   defaultRetryDelayMs: 1000
//!   defaultTimeoutMs: 30000
//!   slowStepThresholdMs: 5000
//!   runArchiveLimit: 1000
//! router:
//!   discoveryLimit: 10
//!   maxConcurrentDiscoveries: 8
//!   publicBaseUrl: "http://127.0.0.1:3220"
//! gateway:
//!   workflowKeywords: [workflow, pipeline, multi-step]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub engine: EngineConfig,
    pub router: RouterConfig,
    pub gateway: GatewaySettings,
}

impl GatewayConfig {
    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, GatewayError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Validation(format!("Failed to parse config YAML: {}", e)))
    }

    /// Load a config from a file path.
    pub fn from_file(path: &str) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Validation(format!("Failed to read config file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }
}

/// Defaults applied to workflow steps that don't override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub default_max_retries: u32,
    pub default_retry_delay_ms: u64,
    pub default_timeout_ms: u64,
    /// Steps slower than this get a non-fatal warning attached.
    pub slow_step_threshold_ms: u64,
    /// Finished runs kept for polling before the oldest are dropped.
    pub run_archive_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_retry_delay_ms: 1000,
            default_timeout_ms: 30_000,
            slow_step_threshold_ms: 5000,
            run_archive_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    /// Maximum number of candidates returned by discovery.
    pub discovery_limit: usize,
    /// Global cap on simultaneous candidate evaluations (None = unbounded).
    pub max_concurrent_discoveries: Option<usize>,
    /// Base URL external agents use to reach the status callback endpoint.
    pub public_base_url: String,
    /// Timeout for the outbound submission to an external agent.
    pub external_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            discovery_limit: 10,
            max_concurrent_discoveries: None,
            public_base_url: "http://127.0.0.1:3220".to_string(),
            external_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Description keywords that hand a submission to the workflow engine.
    pub workflow_keywords: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            workflow_keywords: vec![
                "workflow".to_string(),
                "pipeline".to_string(),
                "multi-step".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.engine.default_max_retries, 3);
        assert_eq!(config.router.discovery_limit, 10);
        assert!(config.router.max_concurrent_discoveries.is_none());
        assert_eq!(config.gateway.workflow_keywords.len(), 3);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
engine:
  defaultTimeoutMs: 500
router:
  maxConcurrentDiscoveries: 4
  publicBaseUrl: "https://gate.example.com"
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.engine.default_timeout_ms, 500);
        assert_eq!(config.engine.default_retry_delay_ms, 1000);
        assert_eq!(config.router.max_concurrent_discoveries, Some(4));
        assert_eq!(config.router.public_base_url, "https://gate.example.com");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gateway:\n  workflowKeywords: [flow]").unwrap();
        let config = GatewayConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.gateway.workflow_keywords, vec!["flow".to_string()]);
    }

    #[test]
    fn test_missing_file_is_validation_error() {
        let err = GatewayConfig::from_file("/nonexistent/taskgate.yaml").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
