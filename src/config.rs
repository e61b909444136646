use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub scanning: ScanningConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub glm: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            glm: ProviderConfig::default(),
            openai: ProviderConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}

/// Connection settings for one chat-completions endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanningConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_factor: default_backoff_factor(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_factor() -> u32 {
    2
}
fn default_base_delay_secs() -> u64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComplianceConfig {
    /// When false, reports carry the analysis snapshot only and every
    /// score column is left NULL (simplified mode).
    #[serde(default)]
    pub enable_multi_dimension_assessment: bool,
    #[serde(default)]
    pub scoring: ScoringWeights,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enable_multi_dimension_assessment: false,
            scoring: ScoringWeights::default(),
        }
    }
}

/// Per-dimension weights for the overall score. Normalized to sum to 1
/// at scoring time, so they only need to be relative.
#[derive(Debug, Deserialize, Clone)]
pub struct ScoringWeights {
    #[serde(default = "default_w_security")]
    pub security: f64,
    #[serde(default = "default_w_license")]
    pub license: f64,
    #[serde(default = "default_w_maintenance")]
    pub maintenance: f64,
    #[serde(default = "default_w_performance")]
    pub performance: f64,
    #[serde(default)]
    pub tos: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            security: default_w_security(),
            license: default_w_license(),
            maintenance: default_w_maintenance(),
            performance: default_w_performance(),
            tos: 0.0,
        }
    }
}

fn default_w_security() -> f64 {
    0.4
}
fn default_w_license() -> f64 {
    0.3
}
fn default_w_maintenance() -> f64 {
    0.2
}
fn default_w_performance() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportingConfig {
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./reports")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Redact a secret for log output, keeping only the last 4 characters.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "(unset)".to_string();
    }
    let chars = secret.chars().count();
    if chars <= 4 {
        return "****".to_string();
    }
    let tail = secret
        .char_indices()
        .nth(chars - 4)
        .map(|(idx, _)| &secret[idx..])
        .unwrap_or(secret);
    format!("****{tail}")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate scanning
    if config.scanning.max_concurrent == 0 {
        anyhow::bail!("scanning.max_concurrent must be > 0");
    }
    if config.scanning.retry.max_attempts == 0 {
        anyhow::bail!("scanning.retry.max_attempts must be > 0");
    }
    if config.scanning.retry.backoff_factor == 0 {
        anyhow::bail!("scanning.retry.backoff_factor must be > 0");
    }

    // Validate scoring weights
    let w = &config.compliance.scoring;
    for (name, value) in [
        ("security", w.security),
        ("license", w.license),
        ("maintenance", w.maintenance),
        ("performance", w.performance),
        ("tos", w.tos),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("compliance.scoring.{} must be in [0.0, 1.0]", name);
        }
    }
    if w.security + w.license + w.maintenance + w.performance + w.tos <= 0.0 {
        anyhow::bail!("compliance.scoring weights must not all be zero");
    }

    match config.ai.provider.as_str() {
        "disabled" | "glm" | "openai" => {}
        other => anyhow::bail!(
            "Unknown AI provider: '{}'. Must be disabled, glm, or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let f = write_config(
            r#"[db]
path = "/tmp/toolscan.sqlite"

[server]
bind = "127.0.0.1:8080"
"#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.ai.provider, "disabled");
        assert_eq!(cfg.scanning.max_concurrent, 5);
        assert_eq!(cfg.scanning.retry.max_attempts, 3);
        assert_eq!(cfg.scanning.retry.backoff_factor, 2);
        assert!(!cfg.compliance.enable_multi_dimension_assessment);
        assert!((cfg.compliance.scoring.security - 0.4).abs() < 1e-9);
        assert!(cfg.compliance.scoring.tos.abs() < 1e-9);
    }

    #[test]
    fn unknown_provider_rejected() {
        let f = write_config(
            r#"[db]
path = "/tmp/toolscan.sqlite"

[ai]
provider = "watson"

[server]
bind = "127.0.0.1:8080"
"#,
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown AI provider"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let f = write_config(
            r#"[db]
path = "/tmp/toolscan.sqlite"

[scanning]
max_concurrent = 0

[server]
bind = "127.0.0.1:8080"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn mask_secret_redacts() {
        assert_eq!(mask_secret(""), "(unset)");
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret("sk-123456789"), "****6789");
        // Multi-byte secrets must not split a character.
        assert_eq!(mask_secret("秘密秘密abcd"), "****abcd");
        assert_eq!(mask_secret("pass-密钥密钥"), "****密钥密钥");
    }
}
