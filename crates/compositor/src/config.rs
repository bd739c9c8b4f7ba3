use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tilexr_render::ArbiterConfig;

use crate::runtime::{AppInfo, GraphicsBinding, SwapchainExtent};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for the XR subsystem. Every field has a default, so a partial
/// JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub app: AppInfo,
    /// Start the subsystem as soon as the host launches.
    pub start_on_launch: bool,
    /// Refresh rate assumed before the runtime reports its own frame period.
    pub target_refresh_hz: f32,
    /// Grace before a 2D renderer holding the context is flagged. Defaults
    /// to one frame interval.
    pub lease_grace_ms: Option<u64>,
    /// Consecutive contended frames before the contention warning.
    pub contention_escalation: u32,
    /// Time reserved at the end of each frame period for submission.
    pub submit_margin_ms: u64,
    /// Deadline for `XrSubsystem::start` to bring the runtime up, and the
    /// bound passed to the support query and session creation.
    pub runtime_timeout_ms: u64,
    /// Poll interval while no session is running.
    pub idle_poll_ms: u64,
    pub reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub graphics: GraphicsBinding,
    pub swapchain: SwapchainExtent,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            app: AppInfo::default(),
            start_on_launch: false,
            target_refresh_hz: 90.0,
            lease_grace_ms: None,
            contention_escalation: 3,
            submit_margin_ms: 2,
            runtime_timeout_ms: 2_000,
            idle_poll_ms: 100,
            reconnect: true,
            reconnect_interval_ms: 5_000,
            graphics: GraphicsBinding::default(),
            swapchain: SwapchainExtent::default(),
        }
    }
}

impl CompositorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_refresh_hz.is_finite() && self.target_refresh_hz > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "target_refresh_hz must be positive, got {}",
                self.target_refresh_hz
            )));
        }
        if self.runtime_timeout_ms == 0 {
            return Err(ConfigError::Invalid("runtime_timeout_ms must be non-zero".into()));
        }
        if self.idle_poll_ms == 0 {
            return Err(ConfigError::Invalid("idle_poll_ms must be non-zero".into()));
        }
        if self.reconnect && self.reconnect_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_interval_ms must be non-zero when reconnect is on".into(),
            ));
        }
        if self.contention_escalation == 0 {
            return Err(ConfigError::Invalid("contention_escalation must be at least 1".into()));
        }
        if self.swapchain.width == 0 || self.swapchain.height == 0 {
            return Err(ConfigError::Invalid("swapchain extent must be non-zero".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_refresh_hz))
    }

    pub fn lease_grace(&self) -> Duration {
        self.lease_grace_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.frame_interval())
    }

    pub fn submit_margin(&self) -> Duration {
        Duration::from_millis(self.submit_margin_ms)
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// `None` when reconnecting after a loss is disabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.reconnect
            .then(|| Duration::from_millis(self.reconnect_interval_ms))
    }

    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig {
            grace: self.lease_grace(),
            escalate_after: self.contention_escalation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::GraphicsApi;

    #[test]
    fn empty_document_yields_defaults() {
        let config = CompositorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CompositorConfig::default());
        assert_eq!(config.arbiter_config().escalate_after, 3);
    }

    #[test]
    fn grace_defaults_to_one_frame() {
        let config = CompositorConfig::default();
        let grace = config.lease_grace();
        assert!(grace > Duration::from_millis(11) && grace < Duration::from_millis(12));

        let config = CompositorConfig::from_json_str(r#"{ "lease_grace_ms": 4 }"#).unwrap();
        assert_eq!(config.lease_grace(), Duration::from_millis(4));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let json = r#"{
            "start_on_launch": true,
            "target_refresh_hz": 120.0,
            "graphics": { "api": "vulkan", "context_version": [1, 3] }
        }"#;
        let config = CompositorConfig::from_json_str(json).unwrap();
        assert!(config.start_on_launch);
        assert_eq!(config.graphics.api, GraphicsApi::Vulkan);
        assert_eq!(config.graphics.context_version, (1, 3));
        assert_eq!(config.runtime_timeout_ms, 2_000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for json in [
            r#"{ "target_refresh_hz": 0.0 }"#,
            r#"{ "runtime_timeout_ms": 0 }"#,
            r#"{ "contention_escalation": 0 }"#,
            r#"{ "swapchain": { "width": 0, "height": 10 } }"#,
        ] {
            assert!(
                matches!(CompositorConfig::from_json_str(json), Err(ConfigError::Invalid(_))),
                "{json}"
            );
        }
        assert!(matches!(
            CompositorConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn reconnect_can_be_disabled() {
        let config = CompositorConfig::from_json_str(r#"{ "reconnect": false }"#).unwrap();
        assert_eq!(config.reconnect_interval(), None);
    }

    #[test]
    fn round_trips_through_json() {
        let config = CompositorConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(CompositorConfig::from_json_str(&json).unwrap(), config);
    }
}
