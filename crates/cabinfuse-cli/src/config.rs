//! Configuration vault – reads/writes `~/.cabinfuse/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use cabinfuse_runtime::FusionConfig;
use cabinfuse_types::CabinError;
use serde::{Deserialize, Serialize};

/// Persisted CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Confidence used by REPL commands that omit one.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,

    #[serde(default)]
    pub fusion: FusionConfig,
}

fn default_confidence() -> f64 {
    0.9
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_confidence: default_confidence(),
            fusion: FusionConfig::default(),
        }
    }
}

/// Return the path to `~/.cabinfuse/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cabinfuse").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, CabinError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, CabinError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| CabinError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| CabinError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    cfg.fusion.validate()?;
    Ok(Some(cfg))
}

/// Apply `CABINFUSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CABINFUSE_REMINDER_DELAY_SECS` | `fusion.reminder_delay_secs` |
/// | `CABINFUSE_BUS_CAPACITY` | `fusion.bus_capacity` |
/// | `CABINFUSE_DISTRACTION_TIMEOUT_SECS` | `fusion.distraction_timeout_secs` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CABINFUSE_REMINDER_DELAY_SECS")
        && let Ok(secs) = v.trim().parse::<f64>()
    {
        cfg.fusion.reminder_delay_secs = secs;
    }
    if let Some(v) = lookup("CABINFUSE_BUS_CAPACITY")
        && let Ok(capacity) = v.trim().parse::<usize>()
    {
        cfg.fusion.bus_capacity = capacity;
    }
    if let Some(v) = lookup("CABINFUSE_DISTRACTION_TIMEOUT_SECS")
        && let Ok(secs) = v.trim().parse::<f64>()
    {
        cfg.fusion.distraction_timeout_secs = secs;
    }
}

/// Save the config to disk, creating `~/.cabinfuse/` if necessary.
pub fn save(cfg: &Config) -> Result<(), CabinError> {
    save_to(cfg, &config_path())
}

/// Write `cfg` with owner-only permissions on Unix (`0o700` directory,
/// `0o600` file).
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), CabinError> {
    let io_err = |what: &str, e: std::io::Error| CabinError::Config(format!("{what} {}: {e}", path.display()));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create directory for", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to restrict directory for", e))?;
        }
    }

    let raw = toml::to_string_pretty(cfg).map_err(|e| CabinError::Serialization(e.to_string()))?;

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
            .map_err(|e| io_err("failed to write", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("failed to write", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn path_points_to_cabinfuse_dir() {
        let p = config_path_for_home("/home/driver");
        assert_eq!(p, PathBuf::from("/home/driver/.cabinfuse/config.toml"));
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_preserves_fusion_settings() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.fusion.reminder_delay_secs = 3.5;
        cfg.fusion.bus_capacity = 250;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.fusion.reminder_delay_secs, 3.5);
        assert_eq!(loaded.fusion.bus_capacity, 250);
        assert_eq!(loaded.default_confidence, 0.9);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[fusion]\ndistraction_timeout_secs = 20.0\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.fusion.distraction_timeout_secs, 20.0);
        assert_eq!(loaded.fusion.session_history, 100);
        assert_eq!(loaded.default_confidence, 0.9);
    }

    #[test]
    fn invalid_values_are_reported() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[fusion]\nbus_capacity = 0\n").unwrap();
        assert!(matches!(load_from(&path), Err(CabinError::Config(_))));

        fs::write(&path, "not = [valid").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn overrides_apply_parsed_values() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            lookup_from(&[
                ("CABINFUSE_REMINDER_DELAY_SECS", "2.5"),
                ("CABINFUSE_BUS_CAPACITY", " 64 "),
                ("CABINFUSE_DISTRACTION_TIMEOUT_SECS", "30"),
            ]),
        );
        assert_eq!(cfg.fusion.reminder_delay_secs, 2.5);
        assert_eq!(cfg.fusion.bus_capacity, 64);
        assert_eq!(cfg.fusion.distraction_timeout_secs, 30.0);
    }

    #[test]
    fn overrides_ignore_garbage() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, lookup_from(&[("CABINFUSE_BUS_CAPACITY", "lots")]));
        assert_eq!(cfg.fusion.bus_capacity, 1000);
    }
}
