use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::app::error::AutomationError;

pub const SETUP_HINT: &str = "Install Android SDK Platform Tools \
(https://developer.android.com/studio/releases/platform-tools) or set ADB_PATH \
or adb.command_path in the config to the adb executable";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}

/// Search order: configured path, `ADB_PATH`, `PATH`, then the usual SDK folders.
pub fn locate_adb(config_command_path: &str) -> Result<String, AutomationError> {
    locate_adb_with(
        config_command_path,
        std::env::var_os("ADB_PATH"),
        std::env::var_os("PATH"),
        dirs::home_dir(),
    )
}

fn locate_adb_with(
    config_command_path: &str,
    env_adb: Option<OsString>,
    env_path: Option<OsString>,
    home: Option<PathBuf>,
) -> Result<String, AutomationError> {
    let configured = normalize_command_path(config_command_path);
    if !configured.is_empty() {
        return validate_adb_program(&configured)
            .map(|_| configured)
            .map_err(|message| AutomationError::BridgeUnavailable(format!("{message}. {SETUP_HINT}")));
    }

    if let Some(path) = env_adb.map(PathBuf::from).filter(|path| path.is_file()) {
        return Ok(path.to_string_lossy().to_string());
    }

    if let Some(path) = env_path.and_then(|value| find_on_path(&value, adb_binary_name())) {
        return Ok(path.to_string_lossy().to_string());
    }

    sdk_candidates(home.as_deref())
        .into_iter()
        .find(|candidate| candidate.is_file())
        .map(|path| path.to_string_lossy().to_string())
        .ok_or_else(|| {
            AutomationError::BridgeUnavailable(format!("adb executable not found. {SETUP_HINT}"))
        })
}

fn adb_binary_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

fn find_on_path(path_var: &OsString, binary: &str) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

fn sdk_candidates(home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if cfg!(windows) {
        if let Some(home) = home {
            candidates.push(home.join("AppData/Local/Android/Sdk/platform-tools/adb.exe"));
        }
        candidates.push(PathBuf::from("C:/Android/sdk/platform-tools/adb.exe"));
        candidates.push(PathBuf::from("C:/Program Files/Android/sdk/platform-tools/adb.exe"));
        candidates.push(PathBuf::from(
            "C:/Program Files (x86)/Android/sdk/platform-tools/adb.exe",
        ));
    } else if cfg!(target_os = "macos") {
        if let Some(home) = home {
            candidates.push(home.join("Library/Android/sdk/platform-tools/adb"));
        }
        candidates.push(PathBuf::from("/usr/local/bin/adb"));
        candidates.push(PathBuf::from("/opt/homebrew/bin/adb"));
    } else {
        if let Some(home) = home {
            candidates.push(home.join("Android/Sdk/platform-tools/adb"));
            candidates.push(home.join("android-sdk/platform-tools/adb"));
        }
        candidates.push(PathBuf::from("/usr/bin/adb"));
        candidates.push(PathBuf::from("/usr/local/bin/adb"));
        candidates.push(PathBuf::from("/opt/android-sdk/platform-tools/adb"));
    }
    candidates
}
