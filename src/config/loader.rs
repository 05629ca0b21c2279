//! Settings file loader and serialization.

use crate::config::AppSettings;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_DIR: &str = ".config/fastboot-flasher";

/// Get the global settings path: ~/.config/fastboot-flasher/settings.json
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;
    Ok(home.join(SETTINGS_DIR).join("settings.json"))
}

/// Load settings from a JSON file.
pub fn load_settings_from_file(path: &Path) -> Result<AppSettings, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!("Settings file not found at: {}", path.display()))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: AppSettings = serde_json::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings, falling back to defaults when the file is missing.
///
/// A file that exists but does not parse or validate is still an error.
pub fn load_or_default(path: &Path) -> Result<AppSettings, ConfigError> {
    match load_settings_from_file(path) {
        Err(ConfigError::FileNotFound(_)) => {
            log::info!("[Config] No settings at {}, using defaults", path.display());
            Ok(AppSettings::default())
        }
        other => other,
    }
}

/// Save settings to a JSON file, creating parent directories.
pub fn save_settings_to_file(settings: &AppSettings, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;
    settings.validate()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(settings)?;
    fs::write(path, json_content)?;
    log::debug!("[Config] Saved settings to {}", path.display());
    Ok(())
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Configuration file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Configuration file must have .json extension".to_string(),
            ))
        }
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/settings.json");

        let original = AppSettings {
            fastboot_path: Some(PathBuf::from("/opt/platform-tools/fastboot")),
            max_concurrent_downloads: 4,
            erase_partitions: vec!["cache".to_string(), "userdata".to_string()],
            ..AppSettings::default()
        };

        save_settings_to_file(&original, &path).expect("Failed to save settings");
        assert!(path.exists());

        let loaded = load_settings_from_file(&path).expect("Failed to load settings");
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.json");
        assert!(matches!(
            load_settings_from_file(&path),
            Err(ConfigError::FileNotFound(_))
        ));
        assert_eq!(load_or_default(&path).unwrap(), AppSettings::default());
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_settings_from_file(&path),
            Err(ConfigError::InvalidJson(_))
        ));
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn test_validate_config_path() {
        assert!(validate_config_path(Path::new("settings.json")).is_ok());
        assert!(validate_config_path(Path::new("settings.toml")).is_err());
        assert!(validate_config_path(Path::new("settings")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }

    #[test]
    fn test_global_settings_path_shape() {
        if let Ok(path) = get_global_settings_path() {
            assert!(path.ends_with(".config/fastboot-flasher/settings.json"));
        }
    }
}
