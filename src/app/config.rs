use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::{AppError, AutomationError};
use crate::app::profile::{find_profile, profile_for_resolution, DeviceProfile, DEFAULT_PROFILE};

pub const AUTO_PROFILE: &str = "auto";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdbSettings {
    pub command_path: String,
    pub serial: String,
    pub input_timeout_ms: u64,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            command_path: String::new(),
            serial: String::new(),
            input_timeout_ms: 30_000,
        }
    }
}

impl AdbSettings {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn preferred_serial(&self) -> Option<String> {
        Some(self.serial.trim().to_string()).filter(|serial| !serial.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutomationSettings {
    /// Profile name, or `auto` to match the device's screen size.
    pub profile: String,
    /// Skip every settle delay. Only safe against an emulator or for dry runs.
    pub no_delays: bool,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            profile: AUTO_PROFILE.to_string(),
            no_delays: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub automation: AutomationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Extra profiles; a name matching a built-in replaces it.
    #[serde(default)]
    pub profiles: Vec<DeviceProfile>,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adb: AdbSettings::default(),
            automation: AutomationSettings::default(),
            logging: LoggingSettings::default(),
            profiles: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    /// Picks the profile to drive the device with. `screen_size` is only
    /// consulted in `auto` mode; no match falls back to the default profile.
    pub fn resolve_profile(
        &self,
        screen_size: Option<(u32, u32)>,
    ) -> Result<DeviceProfile, AutomationError> {
        let name = self.automation.profile.trim();
        let found = if name.eq_ignore_ascii_case(AUTO_PROFILE) {
            screen_size
                .and_then(|(width, height)| profile_for_resolution(width, height, &self.profiles))
                .or_else(|| find_profile(DEFAULT_PROFILE, &self.profiles))
        } else {
            find_profile(name, &self.profiles)
        };
        let profile =
            found.ok_or_else(|| AutomationError::Config(format!("unknown profile {name}")))?;

        profile.validate()?;
        Ok(if self.automation.no_delays {
            profile.without_delays()
        } else {
            profile
        })
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TRANSFER_PILOT_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    home_dir().join(".transfer_pilot_config.json")
}

pub fn backup_config_path() -> PathBuf {
    home_dir().join(".transfer_pilot_config.backup.json")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    let mut config: AppConfig = serde_json::from_value(value.clone())
        .map_err(|err| AppError::new("ERR_CONFIG", format!("Invalid config: {err}"), ""))?;
    config = apply_legacy_overrides(config, &value);
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

/// Flat keys written by older setups (`adb_path`, `device_serial`).
fn apply_legacy_overrides(mut config: AppConfig, value: &serde_json::Value) -> AppConfig {
    if let Some(adb_path) = value.get("adb_path").and_then(|v| v.as_str()) {
        if config.adb.command_path.trim().is_empty() {
            config.adb.command_path = adb_path.to_string();
        }
    }
    if let Some(serial) = value.get("device_serial").and_then(|v| v.as_str()) {
        if config.adb.serial.trim().is_empty() {
            config.adb.serial = serial.to_string();
        }
    }
    config
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    if !(1_000..=300_000).contains(&config.adb.input_timeout_ms) {
        config.adb.input_timeout_ms = 30_000;
    }
    config.adb.serial = config.adb.serial.trim().to_string();
    if config.automation.profile.trim().is_empty() {
        config.automation.profile = AUTO_PROFILE.to_string();
    }
    let level = config.logging.log_level.trim().to_uppercase();
    config.logging.log_level = match level.as_str() {
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR" => level,
        _ => "INFO".to_string(),
    };
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::profile::KEYPAD_PROFILE;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.automation.profile, AUTO_PROFILE);
    }

    #[test]
    fn partial_sections_keep_their_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"automation":{"profile":"keypad_portrait_1080x2400"},"adb":{"serial":"emu-1"}}"#,
        )
        .expect("write");

        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.automation.profile, KEYPAD_PROFILE);
        assert!(!config.automation.no_delays);
        assert_eq!(config.adb.serial, "emu-1");
        assert_eq!(config.adb.input_timeout_ms, 30_000);
        assert_eq!(config.logging, LoggingSettings::default());
        assert_eq!(config.resolve_profile(None).unwrap().name, KEYPAD_PROFILE);
    }

    #[test]
    fn merges_legacy_values() {
        let value = serde_json::json!({
            "adb_path": "/opt/sdk/platform-tools/adb",
            "device_serial": "R58M"
        });
        let config: AppConfig = serde_json::from_value(value.clone()).expect("parse");
        let config = apply_legacy_overrides(config, &value);
        assert_eq!(config.adb.command_path, "/opt/sdk/platform-tools/adb");
        assert_eq!(config.adb.serial, "R58M");
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.adb.input_timeout_ms = 5;
        config.adb.serial = "  emu-1 ".to_string();
        config.automation.profile = " ".to_string();
        config.logging.log_level = "loud".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.adb.input_timeout_ms, 30_000);
        assert_eq!(validated.adb.serial, "emu-1");
        assert_eq!(validated.automation.profile, AUTO_PROFILE);
        assert_eq!(validated.logging.log_level, "INFO");
    }

    #[test]
    fn save_keeps_a_backup_of_the_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");

        let mut config = AppConfig::default();
        save_config_to_path(&config, &path, &backup).expect("first save");
        assert!(!backup.exists());

        config.adb.serial = "emu-2".to_string();
        save_config_to_path(&config, &path, &backup).expect("second save");
        let previous = load_config_from_path(&backup).expect("backup");
        assert_eq!(previous.adb.serial, "");
        assert_eq!(load_config_from_path(&path).expect("load").adb.serial, "emu-2");
    }

    #[test]
    fn rejects_malformed_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("write");
        let err = load_config_from_path(&path).unwrap_err();
        assert_eq!(err.code, "ERR_SYSTEM");
    }

    #[test]
    fn resolves_profiles_by_name_or_screen_size() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.resolve_profile(Some((1080, 2400))).unwrap().name,
            KEYPAD_PROFILE
        );
        assert_eq!(config.resolve_profile(None).unwrap().name, DEFAULT_PROFILE);

        config.automation.profile = KEYPAD_PROFILE.to_string();
        assert_eq!(
            config.resolve_profile(Some((2400, 1080))).unwrap().name,
            KEYPAD_PROFILE
        );

        config.automation.profile = "tablet_9000".to_string();
        assert_eq!(config.resolve_profile(None).unwrap_err().code(), "ERR_CONFIG");
    }

    #[test]
    fn custom_profiles_are_validated_and_can_drop_delays() {
        let mut config = AppConfig::default();
        let mut custom = find_profile(DEFAULT_PROFILE, &[]).unwrap();
        custom.name = "shop_floor".to_string();
        custom.timing.sync_ms = 3500;
        config.profiles.push(custom);
        config.automation.profile = "shop_floor".to_string();
        assert_eq!(config.resolve_profile(None).unwrap().timing.sync_ms, 3500);

        config.automation.no_delays = true;
        assert_eq!(config.resolve_profile(None).unwrap().timing.sync_ms, 0);

        config.profiles[0].submit = crate::app::profile::StepAction::tap("missing");
        assert!(config.resolve_profile(None).is_err());
    }
}
