use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
}

/// Everything persisted lives under `root`: `index.json`, `uploads/`, `cache/`.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl StorageConfig {
    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extracted syllabus text is truncated to this many characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_input_chars() -> usize {
    45_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InsightsConfig {
    /// Compute every insight kind in the background right after an upload.
    #[serde(default)]
    pub precompute_on_upload: bool,
}

impl Config {
    /// Defaults used when no config file exists: `./data`, placeholder
    /// generation, loopback bind.
    pub fn minimal() -> Self {
        Self {
            storage: StorageConfig {
                root: PathBuf::from("./data"),
                max_upload_bytes: default_max_upload_bytes(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:8000".to_string(),
            },
            generation: GenerationConfig {
                provider: "placeholder".to_string(),
                ..GenerationConfig::default()
            },
            insights: InsightsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.max_upload_bytes == 0 {
        anyhow::bail!("storage.max_upload_bytes must be > 0");
    }

    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }

    if config.generation.max_input_chars == 0 {
        anyhow::bail!("generation.max_input_chars must be > 0");
    }

    match config.generation.provider.as_str() {
        "openai" | "placeholder" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be openai, placeholder, or disabled.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let config: Config = toml::from_str(
            r#"
[storage]
root = "/tmp/syl"

[server]
bind = "127.0.0.1:0"
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.generation.provider, "openai");
        assert_eq!(config.generation.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.generation.max_input_chars, 45_000);
        assert!(!config.insights.precompute_on_upload);
        assert_eq!(config.storage.cache_dir(), PathBuf::from("/tmp/syl/cache"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = Config::minimal();
        config.generation.provider = "gemini".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }
}
