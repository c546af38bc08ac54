//! # Engine Configuration
//!
//! Configuration for the window extent, renderer, physics stepping and
//! logging. Every section uses `serde(default)` so partial files are valid.

use serde::{Serialize, Deserialize};

use crate::config::{Config, ConfigError};

/// Initial surface size requested from the windowing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
    /// Whether to start in fullscreen
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// # Renderer Configuration
///
/// Frames-in-flight count and synchronization limits for the Vulkan backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots the CPU may record ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Fence wait timeout in nanoseconds; exceeding it is fatal
    pub fence_timeout_ns: u64,
    /// Whether to enable Vulkan validation layers
    pub enable_validation: bool,
    /// Clear color for the main render pass
    pub clear_color: [f32; 4],
    /// Directory holding the compiled SPIR-V shaders
    pub shader_dir: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            fence_timeout_ns: 1_000_000_000,
            enable_validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shader_dir: "target/shaders".to_string(),
        }
    }
}

impl RendererConfig {
    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Path of a compiled shader inside `shader_dir`
    pub fn shader_path(&self, file_name: &str) -> String {
        std::path::Path::new(&self.shader_dir)
            .join(file_name)
            .to_string_lossy()
            .into_owned()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid("Max frames in flight must be at least 1".to_string()));
        }

        if self.max_frames_in_flight > 8 {
            return Err(ConfigError::Invalid(
                "Max frames in flight should not exceed 8".to_string(),
            ));
        }

        if self.fence_timeout_ns == 0 {
            return Err(ConfigError::Invalid("Fence timeout must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Fixed-rate physics stepping parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// World gravity in m/s^2
    pub gravity: [f32; 3],
    /// Simulation step length in seconds
    pub fixed_timestep: f32,
    /// Upper bound on steps taken in one frame, drops time beyond it
    pub max_substeps: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 5,
        }
    }
}

impl PhysicsConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_timestep.is_finite() && self.fixed_timestep > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "Fixed timestep must be positive, got {}",
                self.fixed_timestep
            )));
        }
        if self.max_substeps == 0 {
            return Err(ConfigError::Invalid("Max substeps must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// # Engine Configuration
///
/// Top-level configuration consumed by `Engine::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application name
    pub app_name: String,
    /// Application version
    pub app_version: u32,
    /// Default log filter when `RUST_LOG` is not set
    pub log_level: String,
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Physics settings
    pub physics: PhysicsConfig,
    /// Stop after this many frames; used by headless runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_limit: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "Forge Engine Application".to_string(),
            app_version: 1,
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
            physics: PhysicsConfig::default(),
            frame_limit: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("Window extent must be non-zero".to_string()));
        }
        self.renderer.validate()?;
        self.physics.validate()
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            app_name = "ball"

            [renderer]
            max_frames_in_flight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.app_name, "ball");
        assert_eq!(config.renderer.max_frames_in_flight, 3);
        assert_eq!(config.renderer.fence_timeout_ns, 1_000_000_000);
        assert_eq!(config.window.width, 1280);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_out_of_range_rejected() {
        let mut config = EngineConfig::default();
        config.renderer.max_frames_in_flight = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.renderer.max_frames_in_flight = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ron_config_parses() {
        let config: EngineConfig = ron::from_str(
            "(app_name: \"ron app\", physics: (fixed_timestep: 0.01))",
        )
        .unwrap();
        assert_eq!(config.app_name, "ron app");
        assert!((config.physics.fixed_timestep - 0.01).abs() < f32::EPSILON);
    }
}
