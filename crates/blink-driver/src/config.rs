//! TOML configuration for the panel driver.
//!
//! One file describes the device defaults (variant, timeouts, appearance),
//! the reconnect policy, and the panel grid.  Example:
//!
//! ```toml
//! [device]
//! variant = "square32"
//! brightness = 0.8
//! rotation = 0
//!
//! [reconnect]
//! base_delay_ms = 500
//! max_attempts = 6
//!
//! [panels]
//! columns = 2
//! rows = 1
//! startup = "wait_all"
//! failure = "best_effort"
//!
//! [[panels.list]]
//! name = "left"
//! address = "AA:BB:CC:DD:EE:01"
//! column = 0
//! row = 0
//! ```
//!
//! Every field is annotated with a `#[serde(default = "fn")]` helper so a
//! partial file (or none at all, on first run) loads cleanly with sensible
//! defaults.  Panels may override brightness and rotation per entry;
//! anything unspecified falls back to the `[device]` value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use blink_core::{GridGeometry, PanelPlacement, PanelVariant, Rotation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manager::{FailurePolicy, StartupPolicy};
use crate::session::supervisor::ReconnectPolicy;
use crate::session::SessionConfig;

/// Environment variable naming the config file; falls back to `blink.toml`
/// in the working directory.
pub const CONFIG_PATH_ENV: &str = "BLINK_CONFIG";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A rotation outside {0, 90, 180, 270}.
    #[error("invalid rotation {0}; must be 0, 90, 180, or 270 degrees")]
    InvalidRotation(u16),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level driver configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub panels: PanelsConfig,
}

/// Defaults shared by every panel unless overridden per entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Panel hardware variant: `"square32"` or `"wide64x16"`.
    #[serde(default = "default_variant")]
    pub variant: PanelVariant,
    /// Largest single link-layer write in bytes.
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Brightness fraction; clamped to `[0.1, 1.0]` on use.
    #[serde(default = "default_brightness")]
    pub brightness: f32,
    /// Display rotation in degrees.
    #[serde(default)]
    pub rotation: u16,
    /// Per-stage ack deadline in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Deadline for one whole session request in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Whether to send the commit command after each acknowledged frame.
    #[serde(default = "default_true")]
    pub send_commit: bool,
    /// Handshake/frame retries absorbed before reconnect handling.
    #[serde(default = "default_max_stage_retries")]
    pub max_stage_retries: u32,
}

/// Backoff parameters for re-establishing panel links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// The panel grid and its orchestration policies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelsConfig {
    #[serde(default = "default_one")]
    pub columns: u32,
    #[serde(default = "default_one")]
    pub rows: u32,
    #[serde(default = "default_startup")]
    pub startup: StartupPolicy,
    /// Bound on `best_effort` startup, in seconds.
    #[serde(default = "default_startup_window_secs")]
    pub startup_window_secs: u64,
    #[serde(default = "default_failure")]
    pub failure: FailurePolicy,
    #[serde(default)]
    pub list: Vec<PanelEntry>,
}

/// One configured panel and its grid position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelEntry {
    /// Unique name; keys the per-panel outcome maps.
    pub name: String,
    /// Link address of the panel.
    pub address: String,
    /// Grid column, 0-based from the left.
    pub column: u32,
    /// Grid row, 0-based from the top.
    pub row: u32,
    /// Brightness override; `[device].brightness` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    /// Rotation override in degrees; `[device].rotation` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<u16>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_variant() -> PanelVariant {
    PanelVariant::Square32
}
fn default_mtu() -> usize {
    512
}
fn default_brightness() -> f32 {
    0.8
}
fn default_ack_timeout_ms() -> u64 {
    2_000
}
fn default_send_timeout_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_max_stage_retries() -> u32 {
    1
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    15_000
}
fn default_max_attempts() -> u32 {
    6
}
fn default_one() -> u32 {
    1
}
fn default_startup() -> StartupPolicy {
    StartupPolicy::WaitAll
}
fn default_startup_window_secs() -> u64 {
    15
}
fn default_failure() -> FailurePolicy {
    FailurePolicy::BestEffort
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            mtu: default_mtu(),
            brightness: default_brightness(),
            rotation: 0,
            ack_timeout_ms: default_ack_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            send_commit: default_true(),
            max_stage_retries: default_max_stage_retries(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for PanelsConfig {
    fn default() -> Self {
        Self {
            columns: default_one(),
            rows: default_one(),
            startup: default_startup(),
            startup_window_secs: default_startup_window_secs(),
            failure: default_failure(),
            list: Vec::new(),
        }
    }
}

// ── Runtime conversions ───────────────────────────────────────────────────────

/// Clamps a brightness fraction to the range the firmware behaves sanely in.
pub fn clamp_brightness(fraction: f32) -> f32 {
    fraction.clamp(0.1, 1.0)
}

/// Converts a brightness fraction to the wire level byte.
pub fn brightness_level(fraction: f32) -> u8 {
    (clamp_brightness(fraction) * 255.0).round() as u8
}

impl AppConfig {
    /// Validates the parts serde cannot: rotation values, device and
    /// per-panel alike.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_rotation(self.device.rotation)?;
        for entry in &self.panels.list {
            if let Some(rotation) = entry.rotation {
                parse_rotation(rotation)?;
            }
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            multiplier: self.reconnect.multiplier,
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            variant: self.device.variant,
            mtu: self.device.mtu.max(1),
            ack_timeout: Duration::from_millis(self.device.ack_timeout_ms),
            send_timeout: Duration::from_millis(self.device.send_timeout_ms),
            max_stage_retries: self.device.max_stage_retries,
            send_commit: self.device.send_commit,
            reconnect: self.reconnect_policy(),
        }
    }

    /// The grid the panel list describes; tile dimensions come from the
    /// hardware variant.
    pub fn grid_geometry(&self) -> GridGeometry {
        let (tile_width, tile_height) = self.device.variant.tile_size();
        GridGeometry {
            columns: self.panels.columns,
            rows: self.panels.rows,
            tile_width,
            tile_height,
        }
    }

    pub fn placements(&self) -> Vec<PanelPlacement> {
        self.panels
            .list
            .iter()
            .map(|entry| PanelPlacement {
                name: entry.name.clone(),
                address: entry.address.clone(),
                column: entry.column,
                row: entry.row,
            })
            .collect()
    }

    pub fn startup_window(&self) -> Duration {
        Duration::from_secs(self.panels.startup_window_secs)
    }
}

impl PanelEntry {
    /// Wire brightness level for this panel, override or device default.
    pub fn effective_brightness(&self, device: &DeviceConfig) -> u8 {
        brightness_level(self.brightness.unwrap_or(device.brightness))
    }

    /// Rotation for this panel, override or device default.
    pub fn effective_rotation(&self, device: &DeviceConfig) -> Result<Rotation, ConfigError> {
        parse_rotation(self.rotation.unwrap_or(device.rotation))
    }
}

fn parse_rotation(degrees: u16) -> Result<Rotation, ConfigError> {
    Rotation::try_from(degrees).map_err(ConfigError::InvalidRotation)
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the config file path from `BLINK_CONFIG`, defaulting to
/// `blink.toml` in the working directory.
pub fn config_file_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("blink.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_default_config_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.device.variant, PanelVariant::Square32);
        assert_eq!(cfg.device.mtu, 512);
        assert_eq!(cfg.device.ack_timeout_ms, 2_000);
        assert_eq!(cfg.reconnect.max_attempts, 6);
        assert_eq!(cfg.panels.startup, StartupPolicy::WaitAll);
        assert_eq!(cfg.panels.failure, FailurePolicy::BestEffort);
        assert!(cfg.panels.list.is_empty());
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_device_overrides_defaults() {
        let toml_str = r#"
[device]
variant = "wide64x16"
ack_timeout_ms = 500
"#;
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");
        assert_eq!(cfg.device.variant, PanelVariant::Wide64x16);
        assert_eq!(cfg.device.ack_timeout_ms, 500);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.device.mtu, 512);
        assert!(cfg.device.send_commit);
    }

    // ── Round trip ────────────────────────────────────────────────────────────

    #[test]
    fn test_config_round_trips_through_toml() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.panels.columns = 2;
        cfg.panels.failure = FailurePolicy::Atomic;
        cfg.panels.list.push(PanelEntry {
            name: "left".to_string(),
            address: "AA:BB:CC:DD:EE:01".to_string(),
            column: 0,
            row: 0,
            brightness: Some(0.5),
            rotation: None,
        });

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_absent_overrides_are_omitted_from_toml() {
        let mut cfg = AppConfig::default();
        cfg.panels.list.push(PanelEntry {
            name: "solo".to_string(),
            address: "AA:BB:CC:DD:EE:02".to_string(),
            column: 0,
            row: 0,
            brightness: None,
            rotation: None,
        });

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");

        // The entry after the [[panels.list]] header must carry no override
        // keys; the [device] section keeps its own brightness/rotation.
        let entry = toml_str
            .split("[[panels.list]]")
            .nth(1)
            .expect("panel entry serialized");
        assert!(!entry.contains("brightness"), "None override must be omitted");
        assert!(!entry.contains("rotation"), "None override must be omitted");

        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(restored.panels.list[0].brightness, None);
        assert_eq!(restored.panels.list[0].rotation, None);
    }

    // ── Brightness and rotation ───────────────────────────────────────────────

    #[test]
    fn test_brightness_is_clamped() {
        assert_eq!(clamp_brightness(0.0), 0.1);
        assert_eq!(clamp_brightness(0.5), 0.5);
        assert_eq!(clamp_brightness(7.0), 1.0);
        assert_eq!(brightness_level(1.0), 255);
        assert_eq!(brightness_level(0.0), 26); // 0.1 * 255, rounded
    }

    #[test]
    fn test_panel_overrides_fall_back_to_device() {
        let device = DeviceConfig {
            brightness: 0.8,
            rotation: 180,
            ..DeviceConfig::default()
        };
        let plain = PanelEntry {
            name: "plain".to_string(),
            address: "addr".to_string(),
            column: 0,
            row: 0,
            brightness: None,
            rotation: None,
        };
        let tuned = PanelEntry {
            brightness: Some(0.5),
            rotation: Some(90),
            ..plain.clone()
        };

        assert_eq!(plain.effective_brightness(&device), brightness_level(0.8));
        assert_eq!(plain.effective_rotation(&device).unwrap(), Rotation::Deg180);
        assert_eq!(tuned.effective_brightness(&device), brightness_level(0.5));
        assert_eq!(tuned.effective_rotation(&device).unwrap(), Rotation::Deg90);
    }

    #[test]
    fn test_validate_rejects_bad_rotation() {
        let mut cfg = AppConfig::default();
        cfg.device.rotation = 45;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidRotation(45))
        ));

        cfg.device.rotation = 0;
        cfg.panels.list.push(PanelEntry {
            name: "bad".to_string(),
            address: "addr".to_string(),
            column: 0,
            row: 0,
            brightness: None,
            rotation: Some(123),
        });
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidRotation(123))
        ));
    }

    // ── Runtime conversion ────────────────────────────────────────────────────

    #[test]
    fn test_session_config_conversion() {
        let mut cfg = AppConfig::default();
        cfg.device.ack_timeout_ms = 750;
        cfg.reconnect.base_delay_ms = 100;

        let session = cfg.session_config();
        assert_eq!(session.ack_timeout, Duration::from_millis(750));
        assert_eq!(session.reconnect.base_delay, Duration::from_millis(100));
        assert_eq!(session.variant, PanelVariant::Square32);
    }

    #[test]
    fn test_grid_geometry_uses_variant_tile_size() {
        let mut cfg = AppConfig::default();
        cfg.device.variant = PanelVariant::Wide64x16;
        cfg.panels.columns = 3;
        cfg.panels.rows = 2;

        let geom = cfg.grid_geometry();
        assert_eq!(geom.tile_width, 64);
        assert_eq!(geom.tile_height, 16);
        assert_eq!(geom.canvas_width(), 192);
        assert_eq!(geom.canvas_height(), 32);
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = Path::new("/nonexistent/path/that/cannot/exist/blink.toml");
        let cfg = load_config(path).expect("absent file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }
}
