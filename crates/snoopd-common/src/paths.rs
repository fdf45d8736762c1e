//! Project root discovery and well-known file layout (spec §4.1).
//!
//! Resolution is pure given (start directory, override): it only stats
//! candidate paths, it never creates or writes anything.

use std::path::{Path, PathBuf};

/// Name of the per-project data directory snoopd owns.
pub const DATA_DIR_NAME: &str = ".snoopd";

/// All paths snoopd derives from a single project data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    /// The resolved project root (parent of `data_dir` unless an override was given).
    pub root: PathBuf,
    /// The per-project data directory; every other path is a child of this one.
    pub data_dir: PathBuf,
}

impl ProjectPaths {
    /// Resolve project paths starting from `start`, honoring an explicit
    /// `override_dir` (used as the data directory verbatim, without search).
    pub fn resolve(start: &Path, override_dir: Option<&Path>) -> Self {
        if let Some(dir) = override_dir {
            let root = dir.parent().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            return ProjectPaths { root, data_dir: dir.to_path_buf() };
        }

        let root = find_project_root(start);
        let data_dir = root.join(DATA_DIR_NAME);
        ProjectPaths { root, data_dir }
    }

    pub fn ca_key(&self) -> PathBuf {
        self.data_dir.join("ca-key.pem")
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.data_dir.join("ca.pem")
    }

    pub fn database(&self) -> PathBuf {
        self.data_dir.join("requests.db")
    }

    pub fn control_socket(&self) -> PathBuf {
        self.data_dir.join("control.sock")
    }

    pub fn port_file(&self) -> PathBuf {
        self.data_dir.join("proxy.port")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("daemon.pid")
    }

    pub fn preferred_port_file(&self) -> PathBuf {
        self.data_dir.join("preferred.port")
    }

    pub fn interceptors_dir(&self) -> PathBuf {
        self.data_dir.join("interceptors")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("procsi.log")
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }
}

/// Walk ancestors of `start` looking first for an existing `.snoopd` directory,
/// then for a `.git` marker. Falls back to `start` itself.
fn find_project_root(start: &Path) -> PathBuf {
    let mut candidate = Some(start);
    let mut git_fallback: Option<PathBuf> = None;

    while let Some(dir) = candidate {
        if dir.join(DATA_DIR_NAME).is_dir() {
            return dir.to_path_buf();
        }
        if git_fallback.is_none() && dir.join(".git").exists() {
            git_fallback = Some(dir.to_path_buf());
        }
        candidate = dir.parent();
    }

    git_fallback.unwrap_or_else(|| start.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn resolves_existing_data_dir_over_git_marker() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        let nested = root.join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(root.join("a").join(DATA_DIR_NAME)).unwrap();

        let paths = ProjectPaths::resolve(&nested, None);
        assert_eq!(paths.root, root.join("a"));
    }

    #[test]
    fn falls_back_to_git_marker_when_no_data_dir() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        let nested = root.join("x/y");
        fs::create_dir_all(&nested).unwrap();

        let paths = ProjectPaths::resolve(&nested, None);
        assert_eq!(paths.root, root);
        assert_eq!(paths.data_dir, root.join(DATA_DIR_NAME));
    }

    #[test]
    fn override_is_used_verbatim() {
        let tmp = tempdir().unwrap();
        let explicit = tmp.path().join("custom-data");
        let paths = ProjectPaths::resolve(tmp.path(), Some(&explicit));
        assert_eq!(paths.data_dir, explicit);
    }

    #[test]
    fn derived_paths_are_children_of_data_dir() {
        let tmp = tempdir().unwrap();
        let paths = ProjectPaths::resolve(tmp.path(), Some(&tmp.path().join(DATA_DIR_NAME)));
        assert!(paths.ca_cert().starts_with(&paths.data_dir));
        assert!(paths.control_socket().starts_with(&paths.data_dir));
        assert!(paths.interceptors_dir().starts_with(&paths.data_dir));
    }
}
