//! Application-level configuration loading: game rules, upload limits, polling cadence
//! and the development seed profiles.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::state_machine::GameRules;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MYSTERY_ANIMAL_BACK_CONFIG_PATH";

const DEFAULT_UPLOAD_CAP: usize = 10;
const DEFAULT_INITIAL_GUESSES: u32 = 3;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_READ_URL_TTL_SECS: u64 = 3_600;
const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 1_800;

/// Profile inserted into the memory backend at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedSession {
    pub participant_id: String,
    pub hidden_target: String,
    pub hidden_target_image_url: String,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    rules: GameRules,
    max_upload_bytes: usize,
    allowed_content_types: Vec<String>,
    poll_interval: Duration,
    read_url_ttl: Duration,
    session_idle_timeout: Duration,
    seed_sessions: Vec<SeedSession>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        upload_cap = app_config.rules.upload_cap,
                        seeds = app_config.seed_sessions.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Whether `content_type` starts with one of the allowed prefixes (case-insensitive).
    pub fn is_allowed_content_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.allowed_content_types
            .iter()
            .any(|prefix| content_type.starts_with(prefix.as_str()))
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn read_url_ttl(&self) -> Duration {
        self.read_url_ttl
    }

    pub fn session_idle_timeout(&self) -> Duration {
        self.session_idle_timeout
    }

    pub fn seed_sessions(&self) -> &[SeedSession] {
        &self.seed_sessions
    }

    /// Override the polling period.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the game rules.
    pub fn with_rules(mut self, rules: GameRules) -> Self {
        self.rules = rules;
        self
    }

    /// Override the per-upload size limit.
    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    upload_cap: usize,
    initial_guesses: u32,
    max_upload_bytes: usize,
    allowed_content_types: Vec<String>,
    poll_interval_ms: u64,
    read_url_ttl_secs: u64,
    session_idle_timeout_secs: u64,
    seed_sessions: Vec<SeedSession>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            upload_cap: DEFAULT_UPLOAD_CAP,
            initial_guesses: DEFAULT_INITIAL_GUESSES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_content_types: vec!["image/".to_owned()],
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_url_ttl_secs: DEFAULT_READ_URL_TTL_SECS,
            session_idle_timeout_secs: DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
            seed_sessions: default_seed_sessions(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            rules: GameRules {
                upload_cap: value.upload_cap.max(1),
                initial_guesses: value.initial_guesses.max(1),
            },
            max_upload_bytes: value.max_upload_bytes,
            allowed_content_types: value
                .allowed_content_types
                .into_iter()
                .map(|prefix| prefix.trim().to_ascii_lowercase())
                .filter(|prefix| !prefix.is_empty())
                .collect(),
            poll_interval: Duration::from_millis(value.poll_interval_ms.max(1)),
            read_url_ttl: Duration::from_secs(value.read_url_ttl_secs),
            session_idle_timeout: Duration::from_secs(value.session_idle_timeout_secs),
            seed_sessions: value.seed_sessions,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Demo profiles shipped with the binary.
fn default_seed_sessions() -> Vec<SeedSession> {
    ["student1", "student2", "demo", "test"]
        .into_iter()
        .map(|participant_id| SeedSession {
            participant_id: participant_id.to_owned(),
            hidden_target: "lion".to_owned(),
            hidden_target_image_url: "/images/lion.jpg".to_owned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_game_rules() {
        let config = AppConfig::default();
        assert_eq!(config.rules().upload_cap, 10);
        assert_eq!(config.rules().initial_guesses, 3);
        assert_eq!(config.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.read_url_ttl(), Duration::from_secs(3600));
        assert_eq!(config.seed_sessions().len(), 4);
    }

    #[test]
    fn partial_files_keep_defaults_for_missing_keys() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "upload_cap": 2, "seed_sessions": [] }"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.rules().upload_cap, 2);
        assert_eq!(config.rules().initial_guesses, 3);
        assert!(config.seed_sessions().is_empty());
    }

    #[test]
    fn content_types_match_by_prefix() {
        let config = AppConfig::default();
        assert!(config.is_allowed_content_type("image/png"));
        assert!(config.is_allowed_content_type("IMAGE/JPEG"));
        assert!(!config.is_allowed_content_type("application/pdf"));
        assert!(!config.is_allowed_content_type(""));
    }
}
