//! TOML configuration loading and validation.
//!
//! Follows the shared pattern of one nested struct per subsystem with
//! `#[serde(default = "...")]` field defaults, so a partial file (or none
//! at all) yields a runnable configuration. `validate()` performs the
//! semantic checks that serde cannot express.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Serial port settings for both MCU links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_motion_port")]
    pub motion_port: String,
    #[serde(default = "default_face_port")]
    pub face_port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
}

fn default_motion_port() -> String {
    "/dev/rover_motion".into()
}
fn default_face_port() -> String {
    "/dev/rover_face".into()
}
fn default_baudrate() -> u32 {
    115_200
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            motion_port: default_motion_port(),
            face_port: default_face_port(),
            baudrate: default_baudrate(),
        }
    }
}

/// Control loop rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    #[serde(default = "default_telemetry_hz")]
    pub telemetry_hz: u32,
    #[serde(default = "default_low_battery_mv")]
    pub low_battery_mv: u16,
}

fn default_tick_hz() -> u32 {
    50
}
fn default_telemetry_hz() -> u32 {
    20
}
fn default_low_battery_mv() -> u16 {
    6400
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            telemetry_hz: default_telemetry_hz(),
            low_battery_mv: default_low_battery_mv(),
        }
    }
}

/// Safety-gate tunables (vision thresholds are also runtime params).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_vision_stale_ms")]
    pub vision_stale_ms: f64,
    #[serde(default = "default_vision_clear_low")]
    pub vision_clear_low: f64,
    #[serde(default = "default_vision_clear_high")]
    pub vision_clear_high: f64,
}

fn default_vision_stale_ms() -> f64 {
    500.0
}
fn default_vision_clear_low() -> f64 {
    0.3
}
fn default_vision_clear_high() -> f64 {
    0.6
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            vision_stale_ms: default_vision_stale_ms(),
            vision_clear_low: default_vision_clear_low(),
            vision_clear_high: default_vision_clear_high(),
        }
    }
}

/// One managed worker subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Worker supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
    #[serde(default = "default_heartbeat_timeout_s")]
    pub heartbeat_timeout_s: f64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_backoff_min_s")]
    pub restart_backoff_min_s: f64,
    #[serde(default = "default_backoff_max_s")]
    pub restart_backoff_max_s: f64,
}

fn default_heartbeat_timeout_s() -> f64 {
    5.0
}
fn default_max_restarts() -> u32 {
    5
}
fn default_backoff_min_s() -> f64 {
    1.0
}
fn default_backoff_max_s() -> f64 {
    5.0
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            heartbeat_timeout_s: default_heartbeat_timeout_s(),
            max_restarts: default_max_restarts(),
            restart_backoff_min_s: default_backoff_min_s(),
            restart_backoff_max_s: default_backoff_max_s(),
        }
    }
}

/// Planner (AI worker) coupling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlannerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub robot_id: String,
}

/// Personality axis positions, each in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityConfig {
    #[serde(default = "default_energy")]
    pub energy: f64,
    #[serde(default = "default_reactivity")]
    pub reactivity: f64,
    #[serde(default = "default_initiative")]
    pub initiative: f64,
    #[serde(default = "default_vulnerability")]
    pub vulnerability: f64,
    #[serde(default = "default_predictability")]
    pub predictability: f64,
}

fn default_energy() -> f64 {
    0.40
}
fn default_reactivity() -> f64 {
    0.50
}
fn default_initiative() -> f64 {
    0.30
}
fn default_vulnerability() -> f64 {
    0.35
}
fn default_predictability() -> f64 {
    0.75
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            energy: default_energy(),
            reactivity: default_reactivity(),
            initiative: default_initiative(),
            vulnerability: default_vulnerability(),
            predictability: default_predictability(),
        }
    }
}

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub personality: PersonalityConfig,
}

impl SupervisorConfig {
    /// Load from a TOML file. A missing file is an error; use
    /// [`Default::default`] when running without one.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: Self =
            toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.tick_hz == 0 || self.control.tick_hz > 1000 {
            return Err(ConfigError::ValidationError(format!(
                "tick_hz out of range: {}",
                self.control.tick_hz
            )));
        }
        if self.control.telemetry_hz == 0 || self.control.telemetry_hz > self.control.tick_hz {
            return Err(ConfigError::ValidationError(format!(
                "telemetry_hz must be in 1..=tick_hz, got {}",
                self.control.telemetry_hz
            )));
        }
        if self.safety.vision_clear_low >= self.safety.vision_clear_high {
            return Err(ConfigError::ValidationError(
                "vision_clear_low must be below vision_clear_high".into(),
            ));
        }
        for axis in [
            self.personality.energy,
            self.personality.reactivity,
            self.personality.initiative,
            self.personality.vulnerability,
            self.personality.predictability,
        ] {
            if !(0.0..=1.0).contains(&axis) {
                return Err(ConfigError::ValidationError(format!(
                    "personality axis out of [0,1]: {axis}"
                )));
            }
        }
        for w in &self.workers.workers {
            if w.name.is_empty() || w.command.is_empty() {
                return Err(ConfigError::ValidationError(
                    "worker name and command cannot be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control.tick_hz, 50);
        assert_eq!(config.serial.baudrate, 115_200);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[control]\ntick_hz = 100\n[planner]\nenabled = true").unwrap();
        let config = SupervisorConfig::load(f.path()).unwrap();
        assert_eq!(config.control.tick_hz, 100);
        assert!(config.planner.enabled);
        assert_eq!(config.control.telemetry_hz, 20);
    }

    #[test]
    fn rejects_bad_tick_rate() {
        let config = SupervisorConfig {
            control: ControlConfig { tick_hz: 0, ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_clear_thresholds() {
        let config = SupervisorConfig {
            safety: SafetyConfig {
                vision_clear_low: 0.7,
                vision_clear_high: 0.6,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            SupervisorConfig::load(Path::new("/nonexistent/rover.toml")),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
