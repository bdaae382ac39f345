use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::{ConnectionProfile, SqlDialect};
use crate::error::{WorkbenchError, WorkbenchResult};

const MAX_SAVED_CONNECTIONS: usize = 10;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub connections: Vec<ConnectionProfile>,
    pub last_connection: Option<String>,
    pub dialect: SqlDialect,
    pub autosave_enabled: bool,
    pub autosave_delay_ms: u64,
    pub max_cell_display_chars: usize,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            last_connection: None,
            dialect: SqlDialect::default(),
            autosave_enabled: true,
            autosave_delay_ms: 1000,
            max_cell_display_chars: 60,
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("space_workbench");
            path.push("config.json");
            path
        })
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::new(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!("Could not read config {}: {err}", path.display());
                return Self::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!("Ignoring malformed config {}: {err}", path.display());
                Self::new()
            }
        }
    }

    pub fn save(&self) -> WorkbenchResult<()> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> WorkbenchResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| WorkbenchError::Config(err.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|err| WorkbenchError::Config(err.to_string()))?;
        fs::write(path, content).map_err(|err| WorkbenchError::Config(err.to_string()))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn add_connection(&mut self, profile: ConnectionProfile) {
        self.connections.retain(|c| c.name != profile.name);
        self.connections.insert(0, profile);
        self.connections.truncate(MAX_SAVED_CONNECTIONS);
    }

    pub fn get_connection_by_name(&self, name: &str) -> Option<&ConnectionProfile> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn remove_connection(&mut self, name: &str) {
        self.connections.retain(|c| c.name != name);
        if self.last_connection.as_deref() == Some(name) {
            self.last_connection = None;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("nope.json"));
        assert!(config.connections.is_empty());
        assert_eq!(config.autosave_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn save_and_reload_keeps_profiles_without_passwords() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::new();
        let mut profile = ConnectionProfile::new("dev", "scott", "tiger", "db.local", 3306);
        profile.database = Some("sales".to_string());
        config.add_connection(profile);
        config.dialect = SqlDialect::Oracle;
        config.save_to(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("tiger"), "password must not be written: {raw}");

        let loaded = AppConfig::load_from(&path);
        let profile = loaded.get_connection_by_name("dev").unwrap();
        assert_eq!(profile.database.as_deref(), Some("sales"));
        assert!(profile.password.is_empty());
        assert_eq!(loaded.dialect, SqlDialect::Oracle);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_from(&path);
        assert!(config.autosave_enabled);
    }

    #[test]
    fn add_connection_moves_existing_name_to_front_and_caps_list() {
        let mut config = AppConfig::new();
        for i in 0..12 {
            config.add_connection(ConnectionProfile::new(&format!("c{i}"), "u", "", "h", 1));
        }
        config.add_connection(ConnectionProfile::new("c5", "u", "", "h", 1));
        assert_eq!(config.connections.len(), MAX_SAVED_CONNECTIONS);
        assert_eq!(config.connections[0].name, "c5");
        assert_eq!(
            config.connections.iter().filter(|c| c.name == "c5").count(),
            1
        );
    }
}
