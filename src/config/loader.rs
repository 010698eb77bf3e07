//! Config loading: load-or-default with warnings, never a startup crash.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use super::schema::Config;

/// Load the config file, falling back to defaults when the file is absent
/// or unreadable. A malformed file warns and uses defaults rather than
/// aborting the run.
pub fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
            return Config::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config malformed, using defaults");
            Config::default()
        }
    }
}

pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing config to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/config.json")));
        assert_eq!(config.run.num_trials, 3);
    }

    #[test]
    fn test_none_uses_defaults() {
        let config = load_config(None);
        assert_eq!(config.run.max_concurrency, 4);
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.run.num_trials, 3);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.run.num_trials = 7;
        save_config(&config, &path).unwrap();

        let loaded = load_config(Some(&path));
        assert_eq!(loaded.run.num_trials, 7);
    }
}
