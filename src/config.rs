use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Filesystem layout for one core instance. Multiple isolated instances
/// (e.g. in tests) just use different directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Directory holding the four durable table files.
    pub data_dir: PathBuf,
    /// SQLite database the flush migrates into.
    pub db_path: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            db_path: PathBuf::from("data/inspection.sqlite3"),
        }
    }
}

impl CoreConfig {
    /// Loads a JSON config, falling back to defaults when the file is
    /// missing or unparsable.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|err| CoreError::io(path, err))?;
        Ok(serde_json::from_str(&contents).unwrap_or_default())
    }

    /// Both paths rooted under one directory, the usual deployment shape.
    pub fn under(dir: &Path) -> Self {
        Self {
            data_dir: dir.to_path_buf(),
            db_path: dir.join("inspection.sqlite3"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = CoreConfig::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = CoreConfig::under(dir.path());
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = CoreConfig::load(&path).unwrap();
        assert_eq!(loaded.db_path, config.db_path);
    }
}
