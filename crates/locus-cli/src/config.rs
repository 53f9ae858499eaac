//! Configuration vault at `~/.locus/config.toml`.

use locus_runtime::{DefaultLocation, InterpreterConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted operator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file backing the agent's memory. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// How far back UNDO looks, in clock units.
    #[serde(default = "default_undo_window")]
    pub undo_window: i64,

    /// Window used by `/recent`, in clock units.
    #[serde(default = "default_recency_window")]
    pub recency_window: i64,

    /// Ticks per clock unit.
    #[serde(default = "default_time_resolution")]
    pub time_resolution: i64,

    /// Where MOVE goes when the command names no location.
    #[serde(default)]
    pub default_location: DefaultLocation,

    /// Phrase table file or directory of `*.txt` tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_path: Option<PathBuf>,

    /// Name of the player the operator speaks as.
    #[serde(default = "default_speaker")]
    pub speaker_name: String,
}

fn default_undo_window() -> i64 {
    300
}
fn default_recency_window() -> i64 {
    12_000
}
fn default_time_resolution() -> i64 {
    1
}
fn default_speaker() -> String {
    "operator".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            undo_window: default_undo_window(),
            recency_window: default_recency_window(),
            time_resolution: default_time_resolution(),
            default_location: DefaultLocation::default(),
            ground_truth_path: None,
            speaker_name: default_speaker(),
        }
    }
}

impl Config {
    pub fn interpreter_config(&self) -> InterpreterConfig {
        InterpreterConfig {
            default_location: self.default_location,
            undo_window: self.undo_window,
        }
    }
}

/// `~/.locus/config.toml`, falling back to the working directory when no
/// home directory is known.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".locus").join("config.toml")
}

/// Load the vault with environment overrides applied. `None` if there is
/// no file yet.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {e}", path.display()))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {e}"))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `LOCUS_*` overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `LOCUS_DB_PATH` | `db_path` |
/// | `LOCUS_UNDO_WINDOW` | `undo_window` (ignored unless an integer) |
/// | `LOCUS_SPEAKER` | `speaker_name` |
/// | `LOCUS_GROUND_TRUTH` | `ground_truth_path` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LOCUS_DB_PATH") {
        cfg.db_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("LOCUS_UNDO_WINDOW")
        && let Ok(window) = v.trim().parse::<i64>()
    {
        cfg.undo_window = window;
    }
    if let Ok(v) = std::env::var("LOCUS_SPEAKER")
        && !v.trim().is_empty()
    {
        cfg.speaker_name = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("LOCUS_GROUND_TRUTH") {
        cfg.ground_truth_path = Some(PathBuf::from(v));
    }
}

pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Write the vault, owner-only on Unix.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {e}"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {e}"))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {e}"))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {e}", path.display()))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {e}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_in(dir: &tempfile::TempDir) -> PathBuf {
        config_path_for_home(&dir.path().to_string_lossy())
    }

    #[test]
    fn default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = vault_in(&dir);
        save_to(&Config::default(), &path).unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.undo_window, 300);
        assert_eq!(loaded.recency_window, 12_000);
        assert_eq!(loaded.default_location, DefaultLocation::SpeakerLook);
        assert_eq!(loaded.speaker_name, "operator");
    }

    #[test]
    fn default_location_is_written_in_command_vocabulary() {
        let cfg = Config {
            default_location: DefaultLocation::AgentPos,
            ..Config::default()
        };
        let raw = toml::to_string_pretty(&cfg).unwrap();
        assert!(raw.contains("AGENT_POS"));
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.interpreter_config().default_location, DefaultLocation::AgentPos);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("undo_window = 50").unwrap();
        assert_eq!(cfg.undo_window, 50);
        assert_eq!(cfg.time_resolution, 1);
        assert_eq!(cfg.speaker_name, "operator");
        assert!(cfg.db_path.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn vault_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = vault_in(&dir);
        save_to(&Config::default(), &path).unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn load_from_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(&vault_in(&dir)).unwrap().is_none());
    }

    #[test]
    fn env_overrides_apply_and_bad_numbers_are_ignored() {
        // SAFETY: the only test in this crate that touches these variables.
        unsafe {
            std::env::set_var("LOCUS_SPEAKER", "alice");
            std::env::set_var("LOCUS_UNDO_WINDOW", "not-a-number");
            std::env::set_var("LOCUS_DB_PATH", "/tmp/locus.db");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.speaker_name, "alice");
        assert_eq!(cfg.undo_window, 300);
        assert_eq!(cfg.db_path, Some(PathBuf::from("/tmp/locus.db")));

        unsafe { std::env::set_var("LOCUS_UNDO_WINDOW", "42") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.undo_window, 42);
        unsafe {
            std::env::remove_var("LOCUS_SPEAKER");
            std::env::remove_var("LOCUS_UNDO_WINDOW");
            std::env::remove_var("LOCUS_DB_PATH");
        }
    }
}
