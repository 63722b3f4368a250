use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = ".civitai-link.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin of the host application serving the `/civitai/*` endpoints
    pub base_url: String,
    pub selectors: Selectors,
    pub timing: Timing,
    pub bridge: BridgeConfig,
    pub status: StatusConfig,
    pub decorate: DecorateConfig,

    // This field is not serialized, just used at runtime
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Selectors for the host controls the bridge drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub container: String,
    pub prompt: String,
    pub paste: String,
    pub generate: String,
    pub refresh_models: String,
    pub card_button: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub element_timeout_ms: u64,
    pub poll_tick_ms: u64,
    /// Pause before clicking generate when launched from URL parameters
    pub settle_delay_ms: u64,
    /// Pause before clicking generate when asked by the companion
    pub remote_settle_delay_ms: u64,
    pub status_interval_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Only envelopes claiming this origin are dispatched
    pub origin: String,
    pub socket_path: PathBuf,
    pub pump_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    /// Also poll the alpha-only endpoint on the same interval
    pub alpha_poll: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecorateConfig {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7860".to_string(),
            selectors: Selectors::default(),
            timing: Timing::default(),
            bridge: BridgeConfig::default(),
            status: StatusConfig::default(),
            decorate: DecorateConfig::default(),
            config_path: None,
        }
    }
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            container: ".gradio-container".to_string(),
            prompt: "#txt2img_prompt textarea".to_string(),
            paste: "#paste".to_string(),
            generate: "#txt2img_generate".to_string(),
            refresh_models: "#refresh_sd_model_checkpoint".to_string(),
            card_button: ".copy-path-button.card-button".to_string(),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            element_timeout_ms: 10_000,
            poll_tick_ms: 100,
            settle_delay_ms: 3_000,
            remote_settle_delay_ms: 500,
            status_interval_ms: 10_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl Timing {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn poll_tick(&self) -> Duration {
        Duration::from_millis(self.poll_tick_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn remote_settle_delay(&self) -> Duration {
        Duration::from_millis(self.remote_settle_delay_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            socket_path: std::env::temp_dir().join("civitai-link.sock"),
            pump_interval_ms: 50,
        }
    }
}

impl BridgeConfig {
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha_poll: false,
        }
    }
}

impl Default for DecorateConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| anyhow::anyhow!("base_url '{}' is not a valid URL: {}", self.base_url, e))?;

        if self.bridge.origin.trim().is_empty() {
            anyhow::bail!("bridge.origin cannot be empty");
        }

        let selectors = [
            ("container", &self.selectors.container),
            ("prompt", &self.selectors.prompt),
            ("paste", &self.selectors.paste),
            ("generate", &self.selectors.generate),
            ("refresh_models", &self.selectors.refresh_models),
            ("card_button", &self.selectors.card_button),
        ];
        for (name, selector) in selectors {
            if selector.trim().is_empty() {
                anyhow::bail!("selectors.{} cannot be empty", name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_host_layout() {
        let config = Config::default();
        assert_eq!(config.selectors.prompt, "#txt2img_prompt textarea");
        assert_eq!(config.selectors.generate, "#txt2img_generate");
        assert_eq!(config.timing.poll_tick(), Duration::from_millis(100));
        assert_eq!(config.timing.remote_settle_delay(), Duration::from_millis(500));
        assert_eq!(config.timing.status_interval(), Duration::from_secs(10));
        assert!(!config.status.alpha_poll);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
base_url = "http://10.0.0.2:7860"

[timing]
settle_delay_ms = 1200

[bridge]
origin = "https://civitai.com"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.base_url, "http://10.0.0.2:7860");
        assert_eq!(config.timing.settle_delay_ms, 1200);
        assert_eq!(config.timing.element_timeout_ms, 10_000);
        assert_eq!(config.bridge.origin, "https://civitai.com");
        assert_eq!(config.selectors, Selectors::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.status.alpha_poll = true;
        config.selectors.paste = "#apply".to_string();
        config.save(file.path()).unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert!(loaded.status.alpha_poll);
        assert_eq!(loaded.selectors.paste, "#apply");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.base_url, Config::default().base_url);
        assert_eq!(config.config_path, Some(path));
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let config = Config {
            base_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_selector() {
        let mut config = Config::default();
        config.selectors.generate = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("selectors.generate"));
    }
}
