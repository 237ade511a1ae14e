//! Renderer configuration.
//!
//! Configuration is read once at startup from a TOML file. Every field has a
//! default, so an empty file (or no file at all) yields a working setup.
//!
//! # Example
//!
//! ```
//! use inflight_core::RendererConfig;
//!
//! let config = RendererConfig::from_toml_str(
//!     r#"
//!     frames_in_flight = 2
//!     fence_timeout_ms = 5000
//!
//!     [demo]
//!     frames = 120
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.frames_in_flight, 2);
//! assert_eq!(config.demo.frames, 120);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Largest pipelining depth accepted by [`RendererConfig::validate`].
pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

/// Largest `max_objects` accepted by [`RendererConfig::validate`].
pub const MAX_OBJECTS: u32 = 65_536;

/// Largest `max_materials` accepted by [`RendererConfig::validate`].
pub const MAX_MATERIALS: u32 = 16_384;

/// Largest `max_instances` accepted by [`RendererConfig::validate`].
pub const MAX_INSTANCES: u32 = 1 << 20;

/// GPU backend selection for the demo driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Software timeline, no GPU required.
    #[default]
    Headless,
    /// Vulkan device via ash.
    Vulkan,
}

/// Settings for the demo frame loop.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    /// Number of frames to run before shutting down.
    pub frames: u64,
    /// Which backend the demo drives.
    pub backend: Backend,
    /// Simulated GPU time per submission on the headless backend.
    pub gpu_latency_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            backend: Backend::Headless,
            gpu_latency_ms: 4,
        }
    }
}

/// Frame pipeline configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Pipelining depth: number of frame resources in the ring.
    pub frames_in_flight: u32,
    /// Watchdog for fence waits in milliseconds. `0` waits forever.
    pub fence_timeout_ms: u64,
    /// Capacity of the per-object constant buffers.
    pub max_objects: u32,
    /// Capacity of the per-material constant buffers.
    pub max_materials: u32,
    /// Capacity of the shared per-instance buffers.
    pub max_instances: u32,
    /// Initial render target width.
    pub width: u32,
    /// Initial render target height.
    pub height: u32,
    /// Fence waits longer than this are logged as stalls.
    pub stall_warn_ms: u64,
    /// Demo loop settings.
    pub demo: DemoConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            fence_timeout_ms: 0,
            max_objects: 256,
            max_materials: 64,
            max_instances: 4096,
            width: 1280,
            height: 720,
            stall_warn_ms: 50,
            demo: DemoConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    ///
    /// Nothing is clamped: an out-of-range value is an error.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        for (name, value, limit) in [
            ("max_objects", self.max_objects, MAX_OBJECTS),
            ("max_materials", self.max_materials, MAX_MATERIALS),
            ("max_instances", self.max_instances, MAX_INSTANCES),
        ] {
            if value == 0 || value > limit {
                return Err(Error::Config(format!(
                    "{name} must be in 1..={limit}, got {value}"
                )));
            }
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "render target size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Fence watchdog as a duration, `None` for an unbounded wait.
    pub fn fence_timeout(&self) -> Option<Duration> {
        (self.fence_timeout_ms > 0).then(|| Duration::from_millis(self.fence_timeout_ms))
    }

    /// Stall warning threshold as a duration.
    pub fn stall_warn(&self) -> Duration {
        Duration::from_millis(self.stall_warn_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.fence_timeout(), None);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 2
            fence_timeout_ms = 250

            [demo]
            backend = "vulkan"
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.fence_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.demo.backend, Backend::Vulkan);
        assert_eq!(config.demo.frames, DemoConfig::default().frames);
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let result = RendererConfig::from_toml_str("frames_in_flight = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_too_many_frames_in_flight_rejected() {
        let result = RendererConfig::from_toml_str("frames_in_flight = 9");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = RendererConfig::from_toml_str("max_materials = 0");
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("max_materials")));
    }

    #[test]
    fn test_huge_capacity_rejected() {
        let result = RendererConfig::from_toml_str("max_instances = 4000000000");
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("max_instances")));

        let config = RendererConfig {
            max_objects: MAX_OBJECTS,
            max_materials: MAX_MATERIALS,
            max_instances: MAX_INSTANCES,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = RendererConfig::from_toml_str("frames_in_fligt = 3");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = RendererConfig::load(Path::new("/nonexistent/inflight.toml"));
        assert!(matches!(result, Err(Error::ConfigRead { .. })));
    }
}
