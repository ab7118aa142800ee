// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file or a partial file is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub application: ApplicationConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Project".to_string(),
            width: 1920,
            height: 1280,
            resizable: false,
        }
    }
}

/// Names reported to the driver in `VkApplicationInfo`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub engine_name: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Hello Triangle".to_string(),
            engine_name: "No Engine".to_string(),
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
        }
    }
}

/// How the configuration was obtained. Loading happens before the logger
/// exists, so this is reported once logging is up.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn report(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid(e) => {
                log::warn!("Failed to load config: {:#}. Using defaults.", e)
            }
        }
    }
}

impl Config {
    /// Load `config.toml`, falling back to defaults if it is missing or broken
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();

        match Self::load_from_path(path) {
            Ok(Some(config)) => (config, ConfigSource::File(path.to_path_buf())),
            Ok(None) => (Config::default(), ConfigSource::Missing(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path; `None` if there is no file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(Some(config))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation layers only ever run in debug builds.
    pub fn enable_validation(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Get the preferred present mode as a Vulkan enum
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Parse `debug.log_level`, falling back to `Info` on junk input.
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug
            .log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "Vulkan Project");
        assert_eq!((config.window.width, config.window.height), (1920, 1280));
        assert!(!config.window.resizable);
        assert_eq!(config.application.name, "Hello Triangle");
        assert_eq!(config.application.engine_name, "No Engine");
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 800
            resizable = true

            [graphics]
            present_mode = "FIFO"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 1280);
        assert!(config.window.resizable);
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let mut config = Config::default();
        config.graphics.present_mode = "triple-buffer-please".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn log_level_parses_and_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "debug".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);

        config.debug.log_level = "loud".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let (config, source) = Config::load_or_default("does/not/exist/config.toml");
        assert_eq!(config.window.title, "Vulkan Project");
        assert!(matches!(source, ConfigSource::Missing(_)));
    }

    #[test]
    fn broken_file_falls_back_and_keeps_the_error() {
        let path = std::env::temp_dir().join(format!(
            "vulkan-project-broken-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window\nwidth = ").unwrap();

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 1920);
        match source {
            ConfigSource::Invalid(e) => {
                assert!(format!("{:#}", e).contains("Failed to parse config file"))
            }
            other => panic!("expected a parse failure, got {:?}", other),
        }
    }

    #[test]
    fn valid_file_is_loaded() {
        let path = std::env::temp_dir().join(format!(
            "vulkan-project-valid-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window]\ntitle = \"Triangle\"\n").unwrap();

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert!(matches!(source, ConfigSource::File(p) if p == path));
    }
}
