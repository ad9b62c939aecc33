use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::affinity::AffinitySettings;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Leaderboard sizing.
    pub leaderboard: LeaderboardConfig,
    /// Neighbor scoring constants and fan-out size.
    pub affinity: AffinitySettings,
}

const MAX_WINDOW_DAYS: i64 = 3650;

/// Leaderboard configuration.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// Rows per ranked list.
    pub page_size: usize,
    /// Trailing window for weekly counts and billboard comparisons.
    pub window_days: i64,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            page_size: crate::leaderboard::PAGE_SIZE,
            window_days: 7,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/whoknows/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path, falling back to defaults on any error.
    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Invalid config {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Check values serde can't rule out on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.leaderboard.page_size == 0 {
            return Err("leaderboard.page_size must be at least 1".into());
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.leaderboard.window_days) {
            return Err(format!(
                "leaderboard.window_days must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                self.leaderboard.window_days
            ));
        }
        self.affinity.validate().map_err(|e| e.to_string())
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("whoknows.db")
    } else {
        // Fallback: current directory
        PathBuf::from("whoknows.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.leaderboard.page_size, 14);
        assert_eq!(config.leaderboard.window_days, 7);
        assert_eq!(config.affinity.noise_floor, 30);
        assert_eq!(config.affinity.cache_ttl_hours, 12);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "db_path = \"/tmp/wk.db\"\n\n[affinity]\nmatch_scale = 3.0\nworkers = 4\n\n[leaderboard]\npage_size = 10"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path());
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/wk.db")));
        assert_eq!(config.affinity.match_scale, 3.0);
        assert_eq!(config.affinity.workers, 4);
        assert_eq!(config.affinity.target_boost, 24.0);
        assert_eq!(config.leaderboard.page_size, 10);
        assert_eq!(config.leaderboard.window_days, 7);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[affinity\nnoise_floor = ").unwrap();
        let config = AppConfig::load_from(file.path());
        assert_eq!(config.affinity.noise_floor, 30);
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        for bad in [
            "[affinity]\nmatch_cap = -1.0",
            "[affinity]\nmatch_cap = nan",
            "[affinity]\npeer_base = -1.0",
            "[affinity]\ntarget_boost = inf",
            "[affinity]\ncache_ttl_hours = 9223372036854775807",
            "[leaderboard]\nwindow_days = 100000000",
            "[leaderboard]\npage_size = 0",
        ] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "db_path = \"/tmp/wk.db\"\n{bad}").unwrap();
            let config = AppConfig::load_from(file.path());
            assert_eq!(config.db_path, None, "accepted: {bad}");
            assert_eq!(config.affinity.match_cap, 100.0);
            assert_eq!(config.affinity.peer_base, 1.0);
            assert_eq!(config.leaderboard.window_days, 7);
        }
    }
}
