pub mod affinity;
pub mod billboard;
pub mod cache;
pub mod config;
pub mod db;
pub mod guild;
pub mod import;
pub mod leaderboard;

/// Application name for XDG paths
pub const APP_NAME: &str = "whoknows";
