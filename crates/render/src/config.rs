use std::path::Path;
use std::time::Duration;

use leapbox_common::ClearColor;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Renderer configuration. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Background color every frame is cleared to.
    pub clear_color: [f32; 4],
    /// Upper bound on any single fence wait. `None` blocks until the device answers.
    pub wait_timeout_ms: Option<u64>,
    /// Ask the backend for a software/fallback adapter.
    pub use_warp_device: bool,
    pub vsync: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: ClearColor::default().to_array(),
            wait_timeout_ms: None,
            use_warp_device: false,
            vsync: true,
        }
    }
}

impl RendererConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&data)
    }

    pub fn clear_color(&self) -> ClearColor {
        ClearColor::from(self.clear_color)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.clear_color, [0.0, 0.6, 0.8, 1.0]);
        assert_eq!(config.wait_timeout(), None);
        assert!(!config.use_warp_device);
        assert!(config.vsync);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = RendererConfig::from_yaml_str("wait_timeout_ms: 250\nvsync: false\n").unwrap();
        assert_eq!(config.wait_timeout(), Some(Duration::from_millis(250)));
        assert!(!config.vsync);
        assert_eq!(config.clear_color, [0.0, 0.6, 0.8, 1.0]);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clear_color: [0.1, 0.2, 0.3, 1.0]").unwrap();
        writeln!(file, "use_warp_device: true").unwrap();

        let config = RendererConfig::load(file.path()).unwrap();
        assert_eq!(config.clear_color().g, 0.2);
        assert!(config.use_warp_device);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = RendererConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let err = RendererConfig::from_yaml_str("clear_color: purple").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
