//! Per-run YAML config files.
//!
//! Layout:
//!
//! ```yaml
//! sweep_version: 1
//!
//! lr:
//!   value: 0.01
//! batch_size:
//!   value: 64
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use sweep_types::{AgentError, AgentResult, HyperParams, ParameterValue};

pub const VERSION_KEY: &str = "sweep_version";
pub const CONFIG_VERSION: u64 = 1;

/// Persists a run's hyperparameters where the trial can read them.
pub trait ConfigWriter: Send + Sync {
    fn save(&self, path: &Path, params: &HyperParams) -> AgentResult<()>;
}

/// Writes the versioned YAML document described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlConfigWriter;

impl ConfigWriter for YamlConfigWriter {
    fn save(&self, path: &Path, params: &HyperParams) -> AgentResult<()> {
        save_config_file(path, params)
    }
}

/// `<work_dir>/sweep-<sweep_id>/config-<run_id>.yaml`
pub fn config_file_path(work_dir: &Path, sweep_id: &str, run_id: &str) -> PathBuf {
    work_dir
        .join(format!("sweep-{sweep_id}"))
        .join(format!("config-{run_id}.yaml"))
}

pub fn save_config_file(path: &Path, params: &HyperParams) -> AgentResult<()> {
    let mut document = format!("{VERSION_KEY}: {CONFIG_VERSION}");
    // An empty mapping would serialize as `{}` and break the document.
    if !params.is_empty() {
        let body = serde_yaml::to_string(params).map_err(|e| file_error(path, e))?;
        document.push_str("\n\n");
        document.push_str(&body);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| file_error(path, e))?;
    }
    fs::write(path, document).map_err(|e| file_error(path, e))?;

    debug!(path = %path.display(), params = params.len(), "config file written");
    Ok(())
}

/// Read a config file back into name -> value, in file order.
pub fn load_config_file(path: &Path) -> AgentResult<HyperParams> {
    let text = fs::read_to_string(path).map_err(|e| file_error(path, e))?;
    let mut mapping: serde_yaml::Mapping =
        serde_yaml::from_str(&text).map_err(|e| file_error(path, e))?;

    if let Some(version) = mapping.remove(VERSION_KEY) {
        if version.as_u64() != Some(CONFIG_VERSION) {
            return Err(file_error(path, format!("unknown config version {version:?}")));
        }
    }

    let mut params = HyperParams::new();
    for (key, entry) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| file_error(path, format!("non-string key {key:?}")))?
            .to_string();
        let raw = entry
            .get("value")
            .cloned()
            .ok_or_else(|| file_error(path, format!("{name} has no value")))?;
        let value: ParameterValue =
            serde_yaml::from_value(raw).map_err(|e| file_error(path, e))?;
        params.insert(name, value);
    }
    Ok(params)
}

fn file_error(path: &Path, err: impl ToString) -> AgentError {
    AgentError::ConfigFile {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn path_layout() {
        let path = config_file_path(Path::new("/work"), "q7x2k", "r1");
        assert_eq!(path, PathBuf::from("/work/sweep-q7x2k/config-r1.yaml"));
    }

    #[test]
    fn save_creates_parent_dirs_and_versioned_document() {
        let dir = tempdir().unwrap();
        let path = config_file_path(dir.path(), "q7x2k", "r1");
        let params = HyperParams::new().with("lr", 0.01).with("optimizer", "adam");

        YamlConfigWriter.save(&path, &params).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("sweep_version: 1\n\n"));
        let lr_at = text.find("lr:").unwrap();
        let opt_at = text.find("optimizer:").unwrap();
        assert!(lr_at < opt_at);
    }

    #[test]
    fn empty_params_write_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        save_config_file(&path, &HyperParams::new()).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "sweep_version: 1");
        assert!(load_config_file(&path).unwrap().is_empty());
    }

    #[test]
    fn load_reads_values_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let params = HyperParams::new()
            .with("depth", 6)
            .with("lr", 0.25)
            .with("warmup", true);
        save_config_file(&path, &params).unwrap();

        let loaded = load_config_file(&path).unwrap();
        let names: Vec<&str> = loaded.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["depth", "lr", "warmup"]);
        assert_eq!(loaded.get("depth"), Some(&ParameterValue::Int(6)));
        assert_eq!(loaded.get("warmup"), Some(&ParameterValue::Bool(true)));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "sweep_version: 2\n\nlr:\n  value: 0.1\n").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, AgentError::ConfigFile { .. }));
    }

    #[test]
    fn entry_without_value_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "sweep_version: 1\n\nlr: 0.1\n").unwrap();

        assert!(load_config_file(&path).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempdir().unwrap();
        let err = load_config_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("nope.yaml"));
    }
}
