//! Data directory layout shared by the Spotter binaries
//!
//! Directory layout:
//! ```text
//! spotter_data/
//! └── local/           # SQLite database, local config
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable that overrides every other root source.
pub const ROOT_ENV: &str = "SPOTTER_ROOT";

const DEFAULT_ROOT: &str = "spotter_data";
const DATABASE_FILE: &str = "spotter.sqlite";

#[derive(Deserialize, Debug, Default)]
struct SpotterConfig {
    spotter_root: Option<PathBuf>,
}

/// Get the global configuration path
fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("spotter").join("config.json"))
}

fn read_root_from(path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<SpotterConfig>(&content) {
            Ok(config) => config.spotter_root,
            Err(e) => {
                warn!("Failed to parse config file at {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read config file at {:?}: {}", path, e);
            None
        }
    }
}

/// Load the persistent root from the user's config file
pub fn load_persistent_root() -> Option<PathBuf> {
    read_root_from(&config_path()?)
}

/// Resolve the data root from environment, persistent config, or default
pub fn spotter_root() -> PathBuf {
    if let Ok(val) = std::env::var(ROOT_ENV) {
        return PathBuf::from(val);
    }

    if let Some(root) = load_persistent_root() {
        return root;
    }

    PathBuf::from(DEFAULT_ROOT)
}

/// Local data directory (SQLite, config)
pub fn local_dir() -> PathBuf {
    local_dir_in(&spotter_root())
}

pub fn local_dir_in(root: &Path) -> PathBuf {
    root.join("local")
}

/// Database file path under the resolved root
pub fn database_path() -> PathBuf {
    database_path_in(&spotter_root())
}

pub fn database_path_in(root: &Path) -> PathBuf {
    local_dir_in(root).join(DATABASE_FILE)
}

/// Ensure a single directory exists
pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Create the directory structure under `root` and return its canonical form
pub fn init_structure_in(root: &Path) -> anyhow::Result<PathBuf> {
    ensure_dir(root)?;
    ensure_dir(&local_dir_in(root))?;

    let canonical = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    info!("Spotter directory structure initialized at: {:?}", canonical);
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn database_lives_under_local_dir() {
        let root = PathBuf::from("/srv/spotter");
        assert_eq!(
            database_path_in(&root),
            PathBuf::from("/srv/spotter/local/spotter.sqlite")
        );
    }

    #[test]
    fn init_structure_creates_local_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        init_structure_in(&root).unwrap();
        assert!(local_dir_in(&root).is_dir());
    }

    #[test]
    fn persisted_root_is_read_from_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spotter").join("config.json");
        assert_eq!(read_root_from(&path), None);

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "spotter_root": "/data/gym" }"#).unwrap();
        assert_eq!(read_root_from(&path), Some(PathBuf::from("/data/gym")));
    }

    #[test]
    fn malformed_config_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(read_root_from(&path), None);
    }
}
