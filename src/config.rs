// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every key is optional. A missing or broken config file falls back to the
// defaults below so the renderer always has something to start from.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Frame Pipeline".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    /// Number of frame slots (F). Independent of the swap image count.
    pub max_frames_in_flight: usize,
    /// Vertices issued by the single recorded draw.
    pub vertex_count: u32,
    /// Bound on the per-frame fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.6, 0.65, 0.4, 1.0],
            max_frames_in_flight: 2,
            vertex_count: 3,
            fence_timeout_ms: None,
        }
    }
}

impl GraphicsConfig {
    /// Fence timeout in nanoseconds, as the Vulkan wait calls expect it
    pub fn fence_timeout_ns(&self) -> u64 {
        match self.fence_timeout_ms {
            Some(ms) => ms.saturating_mul(1_000_000),
            None => u64::MAX,
        }
    }
}

/// Precompiled SPIR-V locations, relative to the working directory
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vert.spv"),
            fragment: PathBuf::from("shaders/frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the renderer cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            anyhow::bail!(
                "window size must be non-zero, got {}x{}",
                self.window.width,
                self.window.height
            );
        }
        if self.graphics.max_frames_in_flight == 0 {
            anyhow::bail!("graphics.max_frames_in_flight must be at least 1");
        }
        if self.graphics.vertex_count == 0 {
            anyhow::bail!("graphics.vertex_count must be at least 1");
        }
        Ok(())
    }

    /// Validation layers are compiled in for debug builds only
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.graphics.vertex_count, 3);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("shaders/frag.spv"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            max_frames_in_flight = 3

            [debug]
            show_fps = false
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(config.graphics.clear_color, [0.6, 0.65, 0.4, 1.0]);
        assert!(!config.debug.show_fps);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn fence_timeout_defaults_to_infinite() {
        let config = Config::default();
        assert_eq!(config.graphics.fence_timeout_ns(), u64::MAX);

        let config = Config::from_toml_str("[graphics]\nfence_timeout_ms = 250").unwrap();
        assert_eq!(config.graphics.fence_timeout_ns(), 250_000_000);
    }

    #[test]
    fn rejects_zero_frames_in_flight() {
        let err = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 0").unwrap_err();
        assert!(format!("{:#}", err).contains("max_frames_in_flight"));
    }

    #[test]
    fn rejects_zero_window_size() {
        assert!(Config::from_toml_str("[window]\nwidth = 0").is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(Config::from_toml_str("[graphics\nvertex_count = 3").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.title, "Vulkan Frame Pipeline");
    }
}
